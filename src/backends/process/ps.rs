// Parsers for the command output used where /proc is unavailable (macOS)
#![cfg_attr(not(target_os = "macos"), allow(dead_code))]

use super::state::expand_bsd_state;
use std::time::Duration;

/// Column list handed to `ps -o`; every column has an empty header
pub const PS_COLUMNS: &str = "rss=,vsz=,time=,etime=,%cpu=,state=,pri=,nice=,uid=,gid=,comm=,command=";

/// Fields of one `ps -o` line built from [`PS_COLUMNS`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PsSnapshot {
    pub rss_kb: Option<i64>,
    pub vsz_kb: Option<i64>,
    pub cpu_time_secs: f64,
    pub elapsed: Option<Duration>,
    pub cpu_percent: Option<f64>,
    pub state: String,
    pub priority: Option<i32>,
    pub nice: Option<i32>,
    pub uid: Option<i32>,
    pub gid: Option<i32>,
}

/// Parse the single line printed by `ps -p <pid> -o <PS_COLUMNS>`
///
/// Returns `None` when fewer than the ten numeric/state columns are present.
pub fn parse_ps_line(output: &str) -> Option<PsSnapshot> {
    let line = output.lines().find(|l| !l.trim().is_empty())?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 {
        return None;
    }

    Some(PsSnapshot {
        rss_kb: fields[0].parse().ok(),
        vsz_kb: fields[1].parse().ok(),
        cpu_time_secs: parse_cpu_time(fields[2]),
        elapsed: parse_elapsed(fields[3]).filter(|d| !d.is_zero()),
        cpu_percent: fields[4].parse().ok(),
        state: expand_bsd_state(fields[5]),
        priority: fields[6].parse().ok(),
        nice: fields[7].parse().ok(),
        uid: fields[8].parse().ok(),
        gid: fields[9].parse().ok(),
    })
}

/// `MM:SS.ss` or `HH:MM:SS[.ss]` to seconds
pub fn parse_cpu_time(value: &str) -> f64 {
    let parts: Vec<f64> = value
        .split(':')
        .map(|p| p.parse::<f64>().unwrap_or(0.0))
        .collect();

    match parts.as_slice() {
        [minutes, seconds] => minutes * 60.0 + seconds,
        [hours, minutes, seconds] => hours * 3600.0 + minutes * 60.0 + seconds,
        _ => 0.0,
    }
}

/// `[[DD-]HH:]MM:SS` elapsed time
pub fn parse_elapsed(value: &str) -> Option<Duration> {
    let (days, clock) = match value.split_once('-') {
        Some((days, clock)) => (days.parse::<u64>().ok()?, clock),
        None => (0, value),
    };

    let parts: Vec<u64> = clock
        .split(':')
        .map(|p| p.parse::<u64>())
        .collect::<Result<_, _>>()
        .ok()?;

    let (hours, minutes, seconds) = match parts.as_slice() {
        [minutes, seconds] => (0, *minutes, *seconds),
        [hours, minutes, seconds] => (*hours, *minutes, *seconds),
        _ => return None,
    };

    Some(Duration::from_secs(
        days * 86_400 + hours * 3_600 + minutes * 60 + seconds,
    ))
}

/// Non-empty lines after a one-line header (`ps -M`, `lsof -p`)
pub fn count_rows_after_header(output: &str) -> usize {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .count()
        .saturating_sub(1)
}

/// Non-empty lines (`pgrep -P`)
pub fn count_rows(output: &str) -> usize {
    output.lines().filter(|l| !l.trim().is_empty()).count()
}

/// Environment entries printed by `ps -E`: non-empty lines after the
/// header and the process line
pub fn count_env_rows(output: &str) -> usize {
    output
        .lines()
        .skip(2)
        .filter(|l| !l.trim().is_empty())
        .count()
}

/// Soft limit from `launchctl limit maxfiles` (`maxfiles 256 unlimited`)
pub fn parse_maxfiles(output: &str) -> Option<i32> {
    output.split_whitespace().nth(1)?.parse().ok()
}

/// Working directory from `lsof -p <pid> -d cwd -Fn`
pub fn parse_lsof_cwd(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|l| l.strip_prefix('n'))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ps_line() {
        let snapshot = parse_ps_line(
            " 51200 4194304   1:02.50 02:03:04   1.5 Ss+   31    0   501    20 node node server.js --port 8080\n",
        )
        .unwrap();

        assert_eq!(snapshot.rss_kb, Some(51200));
        assert_eq!(snapshot.vsz_kb, Some(4194304));
        assert_eq!(snapshot.cpu_time_secs, 62.5);
        assert_eq!(snapshot.elapsed, Some(Duration::from_secs(7384)));
        assert_eq!(snapshot.cpu_percent, Some(1.5));
        assert_eq!(snapshot.state, "Sleeping (session leader, foreground)");
        assert_eq!(snapshot.priority, Some(31));
        assert_eq!(snapshot.nice, Some(0));
        assert_eq!(snapshot.uid, Some(501));
        assert_eq!(snapshot.gid, Some(20));
    }

    #[test]
    fn test_parse_ps_line_plain_state() {
        let snapshot = parse_ps_line("1 2 0:00.01 00:05 0.0 S 31 0 0 0 launchd").unwrap();
        assert_eq!(snapshot.state, "Sleeping");
    }

    #[test]
    fn test_parse_ps_line_too_short() {
        assert_eq!(parse_ps_line("51200 4194304 1:02.50"), None);
        assert_eq!(parse_ps_line(""), None);
    }

    #[test]
    fn test_parse_cpu_time() {
        assert_eq!(parse_cpu_time("0:00.25"), 0.25);
        assert_eq!(parse_cpu_time("12:30.00"), 750.0);
        assert_eq!(parse_cpu_time("01:00:05"), 3605.0);
        assert_eq!(parse_cpu_time("garbage"), 0.0);
    }

    #[test]
    fn test_parse_elapsed() {
        assert_eq!(parse_elapsed("00:42"), Some(Duration::from_secs(42)));
        assert_eq!(parse_elapsed("01:00:00"), Some(Duration::from_secs(3600)));
        assert_eq!(
            parse_elapsed("3-04:05:06"),
            Some(Duration::from_secs(3 * 86_400 + 4 * 3600 + 5 * 60 + 6))
        );
        assert_eq!(parse_elapsed("nonsense"), None);
    }

    #[test]
    fn test_row_counts() {
        assert_eq!(count_rows_after_header("USER PID\nme 1\nme 2\n"), 2);
        assert_eq!(count_rows_after_header(""), 0);
        assert_eq!(count_rows("101\n102\n\n"), 2);
        assert_eq!(count_rows(""), 0);
        assert_eq!(
            count_env_rows("  PID TTY TIME CMD\n  1 ?? 0:00 node\nPATH=/bin\nHOME=/Users/me\n"),
            2
        );
    }

    #[test]
    fn test_parse_maxfiles() {
        assert_eq!(parse_maxfiles("\tmaxfiles    256            unlimited\n"), Some(256));
        assert_eq!(parse_maxfiles("maxfiles"), None);
    }

    #[test]
    fn test_parse_lsof_cwd() {
        assert_eq!(
            parse_lsof_cwd("p123\nfcwd\nn/Users/me/project\n"),
            Some("/Users/me/project".to_string())
        );
        assert_eq!(parse_lsof_cwd("p123\n"), None);
    }
}
