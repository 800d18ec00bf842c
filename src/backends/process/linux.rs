// Linux process enrichment using procfs

use super::socket_mapper::{ProcfsSocketMapper, Protocol, SocketMapper};
use super::state::expand_linux_state;
use super::{ProcessEnricher, best_effort};
use crate::process::{ProcessRecord, format_uptime};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, TimeZone};
use procfs::process::Process;
use std::cell::OnceCell;
use std::fs;
use std::path::{Path, PathBuf};

/// Kernel clock ticks per second assumed for stat times
const CLOCK_TICKS: i64 = 100;

const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Enriches records from a proc mount (normally /proc)
pub struct LinuxEnricher {
    root: PathBuf,
    max_child_scan: usize,
    socket_mapper: ProcfsSocketMapper,
    boot_time: OnceCell<i64>,
}

impl LinuxEnricher {
    pub fn new(root: impl Into<PathBuf>, max_child_scan: usize) -> Self {
        let root = root.into();
        let socket_mapper = ProcfsSocketMapper::new(root.clone());

        log::debug!(
            "Using socket mapper backend: {} (root {:?})",
            socket_mapper.name(),
            root
        );

        Self {
            root,
            max_child_scan,
            socket_mapper,
            boot_time: OnceCell::new(),
        }
    }

    fn pid_dir(&self, pid: i32) -> PathBuf {
        self.root.join(pid.to_string())
    }

    fn process(&self, pid: i32) -> Result<Process> {
        Process::new_with_root(self.pid_dir(pid))
            .with_context(|| format!("PID {} not found under {:?}", pid, self.root))
    }

    fn read(&self, pid: i32, file: &str) -> Result<String> {
        let path = self.pid_dir(pid).join(file);
        fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))
    }

    /// System boot time in seconds since the epoch, read once per enricher
    fn boot_time(&self) -> i64 {
        *self.boot_time.get_or_init(|| {
            fs::read_to_string(self.root.join("stat"))
                .ok()
                .and_then(|text| parse_boot_time(&text))
                .unwrap_or_else(|| {
                    log::debug!("Boot time unavailable, assuming now");
                    Local::now().timestamp()
                })
        })
    }

    fn read_cmdline(&self, pid: i32) -> Result<String> {
        Ok(self.process(pid)?.cmdline()?.join(" "))
    }

    fn enrich_cmdline(&self, record: &mut ProcessRecord) -> Result<()> {
        record.full_command = self.read_cmdline(record.pid)?;
        Ok(())
    }

    fn enrich_stat(&self, record: &mut ProcessRecord) -> Result<()> {
        let text = self.read(record.pid, "stat")?;
        let times = parse_stat(&text, self.boot_time(), Local::now())?;

        record.priority = times.priority;
        record.nice_value = times.nice;
        record.cpu_time_secs = times.cpu_time_secs;
        record.cpu_percent = times.cpu_percent;
        record.start_time = times.start.format(START_TIME_FORMAT).to_string();
        record.uptime = format_uptime(times.uptime);
        Ok(())
    }

    fn enrich_fs(&self, record: &mut ProcessRecord) {
        let pid = record.pid;

        best_effort(pid, "working directory", || {
            record.working_dir = self.process(pid)?.cwd()?.display().to_string();
            Ok(())
        });

        best_effort(pid, "executable", || {
            record.exe_path = self.process(pid)?.exe()?.display().to_string();
            // Follows the exe link, which stays valid even if the binary was replaced
            record.exe_size = fs::metadata(self.pid_dir(pid).join("exe"))?.len() as i64;
            Ok(())
        });

        best_effort(pid, "open fds", || {
            let fd_dir = self.pid_dir(pid).join("fd");
            record.open_fds = fs::read_dir(&fd_dir)
                .with_context(|| format!("Failed to list {:?}", fd_dir))?
                .count() as i32;
            Ok(())
        });
    }

    fn enrich_parent(&self, record: &mut ProcessRecord) -> Result<()> {
        if record.ppid <= 0 {
            return Ok(());
        }

        let from_cmdline = self
            .read_cmdline(record.ppid)
            .ok()
            .and_then(|cmdline| argv0_basename(&cmdline));

        record.parent_command = match from_cmdline {
            Some(name) => name,
            None => self.read(record.ppid, "comm")?.trim().to_string(),
        };
        Ok(())
    }

    fn enrich_connections(&self, record: &mut ProcessRecord) {
        let pid = record.pid;

        best_effort(pid, "tcp connections", || {
            record.tcp_connections = self.socket_mapper.connections(pid, Protocol::Tcp)?;
            Ok(())
        });
        best_effort(pid, "udp connections", || {
            record.udp_connections = self.socket_mapper.connections(pid, Protocol::Udp)?;
            Ok(())
        });

        record.update_connection_count();
    }
}

impl ProcessEnricher for LinuxEnricher {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn enrich(&self, record: &mut ProcessRecord) {
        let pid = record.pid;

        best_effort(pid, "cmdline", || self.enrich_cmdline(record));
        if record.full_command.is_empty() {
            record.full_command = record.command.clone();
        }
        best_effort(pid, "status", || {
            parse_status(&self.read(pid, "status")?, record);
            Ok(())
        });
        best_effort(pid, "stat", || self.enrich_stat(record));
        best_effort(pid, "io", || {
            parse_io(&self.read(pid, "io")?, record);
            Ok(())
        });
        best_effort(pid, "limits", || {
            record.memory_limit_kb = parse_limits(&self.read(pid, "limits")?);
            Ok(())
        });

        self.enrich_fs(record);

        best_effort(pid, "environment", || {
            let environ = fs::read(self.pid_dir(pid).join("environ"))?;
            record.env_count = count_env(&environ);
            Ok(())
        });
        best_effort(pid, "children", || {
            record.child_count = count_children(&self.root, pid, self.max_child_scan)?;
            Ok(())
        });
        best_effort(pid, "parent command", || self.enrich_parent(record));

        self.enrich_connections(record);
    }
}

/// CPU and timing facts derived from /proc/<pid>/stat
#[derive(Debug, Clone, PartialEq)]
pub struct StatTimes {
    pub cpu_time_secs: f64,
    pub cpu_percent: f64,
    pub priority: i32,
    pub nice: i32,
    pub start: DateTime<Local>,
    pub uptime: std::time::Duration,
}

/// Apply the `Key:\tvalue` lines of /proc/<pid>/status
pub fn parse_status(text: &str, record: &mut ProcessRecord) {
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 2 {
            continue;
        }

        match fields[0].trim_end_matches(':') {
            "PPid" => record.ppid = fields[1].parse().unwrap_or(0),
            "State" => record.state = expand_linux_state(fields[1]),
            "Threads" => record.threads = fields[1].parse().unwrap_or(0),
            "VmRSS" => record.memory_rss_kb = fields[1].parse().unwrap_or(0),
            "VmSize" => record.memory_vms_kb = fields[1].parse().unwrap_or(0),
            // Real, effective, saved, filesystem: keep the real id
            "Uid" => record.uid = fields[1].parse().unwrap_or(0),
            "Gid" => record.gid = fields[1].parse().unwrap_or(0),
            "Groups" => record.groups = fields[1..].join(" "),
            "FDSize" => record.max_fds = fields[1].parse().unwrap_or(0),
            _ => {}
        }
    }
}

/// PPid field of a status file
pub fn status_ppid(text: &str) -> Option<i32> {
    text.lines()
        .find_map(|line| line.strip_prefix("PPid:"))
        .and_then(|value| value.trim().parse().ok())
}

/// Parse /proc/<pid>/stat
///
/// The command name in field 2 may contain spaces and parentheses, so the
/// positional fields are taken from after the last `)`.
pub fn parse_stat(text: &str, boot_time: i64, now: DateTime<Local>) -> Result<StatTimes> {
    let Some((_, after_comm)) = text.rsplit_once(')') else {
        bail!("stat has no command name");
    };

    // rest[0] is field 3 (state)
    let rest: Vec<&str> = after_comm.split_whitespace().collect();
    if rest.len() < 20 {
        bail!("stat has only {} fields after the command name", rest.len());
    }

    let field = |index: usize| -> i64 { rest[index].parse().unwrap_or(0) };

    let utime = field(11);
    let stime = field(12);
    let priority = field(15) as i32;
    let nice = field(16) as i32;
    let start_ticks = field(19);

    let cpu_time_secs = (utime + stime) as f64 / CLOCK_TICKS as f64;

    let start_secs = boot_time + start_ticks / CLOCK_TICKS;
    let start = Local
        .timestamp_opt(start_secs, 0)
        .single()
        .with_context(|| format!("invalid start timestamp {}", start_secs))?;

    let uptime = now.signed_duration_since(start).to_std().unwrap_or_default();
    let uptime_secs = uptime.as_secs_f64();
    let cpu_percent = if uptime_secs > 0.0 {
        cpu_time_secs / uptime_secs * 100.0
    } else {
        0.0
    };

    Ok(StatTimes {
        cpu_time_secs,
        cpu_percent,
        priority,
        nice,
        start,
        uptime,
    })
}

/// `btime` line of the global /proc/stat
pub fn parse_boot_time(text: &str) -> Option<i64> {
    text.lines()
        .find_map(|line| line.strip_prefix("btime"))
        .and_then(|value| value.trim().parse().ok())
}

/// Apply the counters of /proc/<pid>/io
pub fn parse_io(text: &str, record: &mut ProcessRecord) {
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value: i64 = value.trim().parse().unwrap_or(0);

        match key.trim() {
            "read_bytes" => record.io_read_bytes = value,
            "write_bytes" => record.io_write_bytes = value,
            "syscr" => record.io_read_syscalls = value,
            "syscw" => record.io_write_syscalls = value,
            _ => {}
        }
    }
}

/// Memory limit in KB from /proc/<pid>/limits
///
/// The smaller finite soft limit of "Max address space" and "Max data size"
/// wins. Returns -1 when both are unlimited and 0 when neither row is present.
pub fn parse_limits(text: &str) -> i64 {
    let mut seen = false;
    let mut smallest: Option<i64> = None;

    for line in text.lines() {
        if !(line.starts_with("Max address space") || line.starts_with("Max data size")) {
            continue;
        }
        seen = true;

        // Both names are three words, so the soft limit is the fourth field
        let Some(soft) = line.split_whitespace().nth(3) else {
            continue;
        };
        if soft == "unlimited" {
            continue;
        }

        if let Ok(bytes) = soft.parse::<i64>() {
            smallest = Some(smallest.map_or(bytes, |s| s.min(bytes)));
        }
    }

    match smallest {
        Some(bytes) => bytes / 1024,
        None if seen => -1,
        None => 0,
    }
}

/// Number of NUL-separated entries in an environ block
pub fn count_env(environ: &[u8]) -> i32 {
    environ.split(|b| *b == 0).filter(|entry| !entry.is_empty()).count() as i32
}

/// Count processes whose parent is `pid`
///
/// Reads the status file of every numeric entry under `root`, so the cost is
/// linear in the size of the process table. At most `limit` entries are read.
pub fn count_children(root: &Path, pid: i32, limit: usize) -> Result<i32> {
    let mut children = 0;
    let mut scanned = 0;

    for entry in fs::read_dir(root).with_context(|| format!("Failed to list {:?}", root))? {
        let Ok(entry) = entry else { continue };
        if entry.file_name().to_str().and_then(|n| n.parse::<i32>().ok()).is_none() {
            continue;
        }

        if scanned >= limit {
            log::warn!(
                "Stopped counting children of PID {} after {} processes",
                pid,
                limit
            );
            break;
        }
        scanned += 1;

        // Processes can exit mid-scan
        let Ok(status) = fs::read_to_string(entry.path().join("status")) else {
            continue;
        };
        if status_ppid(&status) == Some(pid) {
            children += 1;
        }
    }

    Ok(children)
}

/// Basename of the first word of a command line
fn argv0_basename(cmdline: &str) -> Option<String> {
    let argv0 = cmdline.split_whitespace().next()?;
    Path::new(argv0)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use std::time::Duration;

    const STATUS: &str = "Name:\tnode
Umask:\t0022
State:\tS (sleeping)
Tgid:\t4242
Pid:\t4242
PPid:\t1000
Uid:\t1001\t1001\t1001\t1001
Gid:\t1002\t1002\t1002\t1002
FDSize:\t128
Groups:\t4 24 27
VmSize:\t 1048576 kB
VmRSS:\t   51200 kB
Threads:\t11
";

    const LIMITS: &str = "Limit                     Soft Limit           Hard Limit           Units
Max cpu time              unlimited            unlimited            seconds
Max data size             unlimited            unlimited            bytes
Max open files            1024                 1048576              files
Max address space         unlimited            unlimited            bytes
";

    const IO: &str = "rchar: 323934931
wchar: 323929600
syscr: 632687
syscw: 632675
read_bytes: 4096
write_bytes: 323932160
cancelled_write_bytes: 0
";

    fn stat_line(comm: &str, utime: u64, stime: u64, start_ticks: u64) -> String {
        format!(
            "4242 ({}) S 1000 4242 4242 0 -1 4194560 100 0 0 0 {} {} 0 0 20 0 11 0 {} 1073741824 12800 18446744073709551615 0 0 0 0 0 0 0 4096 0 0 0 17 3 0 0 0 0 0",
            comm, utime, stime, start_ticks
        )
    }

    fn write_process(root: &Path, pid: i32, status: &str, cmdline: &[u8]) {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(dir.join("fd")).unwrap();
        fs::write(dir.join("status"), status).unwrap();
        fs::write(dir.join("cmdline"), cmdline).unwrap();
    }

    fn record_for(pid: i32) -> ProcessRecord {
        ProcessRecord {
            command: "node".to_string(),
            pid,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_status() {
        let mut record = ProcessRecord::default();
        parse_status(STATUS, &mut record);

        assert_eq!(record.ppid, 1000);
        assert_eq!(record.state, "Sleeping (interruptible)");
        assert_eq!(record.threads, 11);
        assert_eq!(record.memory_rss_kb, 51200);
        assert_eq!(record.memory_vms_kb, 1048576);
        assert_eq!(record.uid, 1001);
        assert_eq!(record.gid, 1002);
        assert_eq!(record.groups, "4 24 27");
        assert_eq!(record.max_fds, 128);
    }

    #[test]
    fn test_status_ppid() {
        assert_eq!(status_ppid(STATUS), Some(1000));
        assert_eq!(status_ppid("Name:\tinit\n"), None);
    }

    #[test]
    fn test_parse_stat() {
        let boot = 1_700_000_000;
        // started 100s after boot, observed 200s later
        let start = Local.timestamp_opt(boot + 100, 0).unwrap();
        let now = start + chrono::Duration::seconds(200);

        let times = parse_stat(&stat_line("node", 1500, 500, 10_000), boot, now).unwrap();
        assert_eq!(times.cpu_time_secs, 20.0);
        assert_eq!(times.cpu_percent, 10.0);
        assert_eq!(times.priority, 20);
        assert_eq!(times.nice, 0);
        assert_eq!(times.start, start);
        assert_eq!(times.uptime, Duration::from_secs(200));
    }

    #[test]
    fn test_parse_stat_comm_with_spaces() {
        let boot = 1_700_000_000;
        let now = Local.timestamp_opt(boot + 1000, 0).unwrap();
        let times = parse_stat(&stat_line("tmux: server (1)", 250, 0, 0), boot, now).unwrap();
        assert_eq!(times.cpu_time_secs, 2.5);
        assert_eq!(times.uptime, Duration::from_secs(1000));
    }

    #[test]
    fn test_parse_stat_zero_uptime() {
        let boot = 1_700_000_000;
        let now = Local.timestamp_opt(boot, 0).unwrap();
        let times = parse_stat(&stat_line("node", 100, 0, 0), boot, now).unwrap();
        assert_eq!(times.cpu_percent, 0.0);
    }

    #[test]
    fn test_parse_stat_truncated() {
        let now = Local::now();
        assert!(parse_stat("4242 (node) S 1 2 3", 0, now).is_err());
        assert!(parse_stat("garbage", 0, now).is_err());
    }

    #[test]
    fn test_parse_boot_time() {
        let stat = "cpu  1 2 3 4\nintr 1\nctxt 99\nbtime 1700000000\nprocesses 5\n";
        assert_eq!(parse_boot_time(stat), Some(1_700_000_000));
        assert_eq!(parse_boot_time("cpu 1 2 3\n"), None);
    }

    #[test]
    fn test_parse_io() {
        let mut record = ProcessRecord::default();
        parse_io(IO, &mut record);
        assert_eq!(record.io_read_bytes, 4096);
        assert_eq!(record.io_write_bytes, 323932160);
        assert_eq!(record.io_read_syscalls, 632687);
        assert_eq!(record.io_write_syscalls, 632675);
    }

    fn limits(data_size: &str, address_space: &str) -> String {
        format!(
            "Limit                     Soft Limit           Hard Limit           Units\n\
             Max data size             {:<20} unlimited            bytes\n\
             Max address space         {:<20} unlimited            bytes\n",
            data_size, address_space
        )
    }

    #[test]
    fn test_parse_limits() {
        assert_eq!(parse_limits(LIMITS), -1);
        assert_eq!(parse_limits(&limits("unlimited", "unlimited")), -1);
        assert_eq!(parse_limits(""), 0);
        assert_eq!(parse_limits(&limits("8388608", "4194304")), 4096);
        assert_eq!(parse_limits(&limits("unlimited", "2097152")), 2048);
        assert_eq!(parse_limits(&limits("1048576", "unlimited")), 1024);
    }

    #[test]
    fn test_count_env() {
        assert_eq!(count_env(b"PATH=/bin\0HOME=/root\0"), 2);
        assert_eq!(count_env(b"PATH=/bin\0HOME=/root"), 2);
        assert_eq!(count_env(b""), 0);
        assert_eq!(count_env(b"\0"), 0);
    }

    #[test]
    fn test_count_children() {
        let root = tempfile::tempdir().unwrap();
        write_process(root.path(), 4242, STATUS, b"node\0");
        write_process(root.path(), 5001, "PPid:\t4242\n", b"");
        write_process(root.path(), 5002, "PPid:\t4242\n", b"");
        write_process(root.path(), 5003, "PPid:\t1\n", b"");
        fs::create_dir_all(root.path().join("net")).unwrap();
        fs::write(root.path().join("stat"), "btime 1\n").unwrap();

        assert_eq!(count_children(root.path(), 4242, 1000).unwrap(), 2);
        assert_eq!(count_children(root.path(), 1, 1000).unwrap(), 1);
        assert_eq!(count_children(root.path(), 4242, 0).unwrap(), 0);
    }

    #[test]
    fn test_argv0_basename() {
        assert_eq!(argv0_basename("/usr/bin/python3 -m http.server"), Some("python3".to_string()));
        assert_eq!(argv0_basename("bash"), Some("bash".to_string()));
        assert_eq!(argv0_basename(""), None);
    }

    #[test]
    fn test_enrich_from_fake_proc() {
        let root = tempfile::tempdir().unwrap();
        let proc_root = root.path();

        fs::write(proc_root.join("stat"), "cpu 1 2 3\nbtime 1700000000\n").unwrap();

        write_process(proc_root, 4242, STATUS, b"node\0server.js\0--port\x008080\0");
        let dir = proc_root.join("4242");
        fs::write(dir.join("stat"), stat_line("node", 1500, 500, 10_000)).unwrap();
        fs::write(dir.join("io"), IO).unwrap();
        fs::write(dir.join("limits"), LIMITS).unwrap();
        fs::write(dir.join("environ"), b"PATH=/bin\0HOME=/home/me\0LANG=C\0").unwrap();

        let exe = proc_root.join("node-binary");
        fs::write(&exe, vec![0u8; 2048]).unwrap();
        symlink(&exe, dir.join("exe")).unwrap();
        symlink("/srv/app", dir.join("cwd")).unwrap();

        symlink("/dev/null", dir.join("fd").join("0")).unwrap();
        symlink("socket:[5001]", dir.join("fd").join("3")).unwrap();

        fs::create_dir_all(proc_root.join("net")).unwrap();
        fs::write(
            proc_root.join("net").join("tcp"),
            "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n   0: 00000000:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1001        0 5001 1\n",
        )
        .unwrap();
        fs::write(proc_root.join("net").join("udp"), "  sl  local_address\n").unwrap();

        write_process(proc_root, 1000, "PPid:\t1\n", b"/usr/bin/bash\0-l\0");
        write_process(proc_root, 4300, "PPid:\t4242\n", b"");

        let enricher = LinuxEnricher::new(proc_root, 1000);
        let mut record = record_for(4242);
        enricher.enrich(&mut record);

        assert_eq!(record.full_command, "node server.js --port 8080");
        assert_eq!(record.ppid, 1000);
        assert_eq!(record.parent_command, "bash");
        assert_eq!(record.state, "Sleeping (interruptible)");
        assert_eq!(record.cpu_time_secs, 20.0);
        assert_eq!(record.memory_limit_kb, -1);
        assert_eq!(record.io_write_bytes, 323932160);
        assert_eq!(record.env_count, 3);
        assert_eq!(record.child_count, 1);
        assert_eq!(record.exe_path, exe.display().to_string());
        assert_eq!(record.exe_size, 2048);
        assert_eq!(record.working_dir, "/srv/app");
        assert_eq!(record.open_fds, 2);
        assert_eq!(record.tcp_connections, vec!["*:8080 -> *:0 [LISTEN]"]);
        assert!(record.udp_connections.is_empty());
        assert_eq!(record.network_conns, 1);
        assert!(!record.start_time.is_empty());
    }

    #[test]
    fn test_enrich_missing_process_keeps_zero_values() {
        let root = tempfile::tempdir().unwrap();
        let enricher = LinuxEnricher::new(root.path(), 1000);
        let mut record = record_for(77);
        enricher.enrich(&mut record);

        assert_eq!(record.command, "node");
        assert_eq!(record.full_command, "node");
        assert_eq!(record.ppid, 0);
        assert_eq!(record.memory_limit_kb, 0);
        assert_eq!(record.network_conns, 0);
    }

    #[test]
    fn test_empty_cmdline_falls_back_to_command() {
        let root = tempfile::tempdir().unwrap();
        write_process(root.path(), 4242, STATUS, b"");
        let enricher = LinuxEnricher::new(root.path(), 1000);
        let mut record = record_for(4242);
        enricher.enrich(&mut record);
        assert_eq!(record.full_command, "node");
    }

    #[test]
    fn test_unreadable_cmdline_falls_back_to_command() {
        let root = tempfile::tempdir().unwrap();
        write_process(root.path(), 4242, STATUS, b"");
        fs::remove_file(root.path().join("4242").join("cmdline")).unwrap();
        let enricher = LinuxEnricher::new(root.path(), 1000);
        let mut record = record_for(4242);
        enricher.enrich(&mut record);
        assert_eq!(record.full_command, "node");
        assert_eq!(record.ppid, 1000);
    }

    #[test]
    fn test_parent_falls_back_to_comm() {
        let root = tempfile::tempdir().unwrap();
        write_process(root.path(), 4242, STATUS, b"node\0");
        write_process(root.path(), 1000, "PPid:\t1\n", b"");
        fs::write(root.path().join("1000").join("comm"), "kthreadd\n").unwrap();

        let enricher = LinuxEnricher::new(root.path(), 1000);
        let mut record = record_for(4242);
        enricher.enrich(&mut record);
        assert_eq!(record.parent_command, "kthreadd");
    }
}
