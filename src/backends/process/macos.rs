// macOS process enrichment using ps/lsof plus native lookups
//
// There is no /proc here, so each attribute costs one command invocation.
// I/O counters and the memory limit are not exposed and stay at zero.

use super::ps::{
    PS_COLUMNS, count_env_rows, count_rows, count_rows_after_header, parse_lsof_cwd,
    parse_maxfiles, parse_ps_line,
};
use super::socket_mapper::{LsofSocketMapper, Protocol, SocketMapper};
use super::{ProcessEnricher, best_effort};
use crate::backends::command::CommandRunner;
use crate::process::{ProcessRecord, format_uptime};
use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use sysinfo::{Pid, System};

const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Enriches records from `ps`, `lsof`, `launchctl`, and `pgrep`
pub struct MacOSEnricher {
    runner: Rc<dyn CommandRunner>,
    lsof_binary: String,
    socket_mapper: LsofSocketMapper,
}

impl MacOSEnricher {
    pub fn new(runner: Rc<dyn CommandRunner>, lsof_binary: impl Into<String>) -> Self {
        let lsof_binary = lsof_binary.into();
        let socket_mapper = LsofSocketMapper::new(runner.clone(), lsof_binary.clone());

        log::debug!("Using socket mapper backend: {}", socket_mapper.name());

        Self {
            runner,
            lsof_binary,
            socket_mapper,
        }
    }

    fn ps(&self, args: &[&str]) -> Result<String> {
        self.runner.stdout("ps", args).context("ps failed")
    }

    fn enrich_ps(&self, record: &mut ProcessRecord) -> Result<()> {
        let pid = record.pid.to_string();
        let output = self.ps(&["-p", &pid, "-o", PS_COLUMNS])?;
        let snapshot = parse_ps_line(&output).context("unexpected ps output")?;

        record.memory_rss_kb = snapshot.rss_kb.unwrap_or(0);
        record.memory_vms_kb = snapshot.vsz_kb.unwrap_or(0);
        record.cpu_time_secs = snapshot.cpu_time_secs;
        record.cpu_percent = snapshot.cpu_percent.unwrap_or(0.0);
        record.state = snapshot.state;
        record.priority = snapshot.priority.unwrap_or(0);
        record.nice_value = snapshot.nice.unwrap_or(0);
        record.uid = snapshot.uid.unwrap_or(0);
        record.gid = snapshot.gid.unwrap_or(0);

        if let Some(elapsed) = snapshot.elapsed {
            record.uptime = format_uptime(elapsed);
            if let Ok(elapsed) = chrono::Duration::from_std(elapsed) {
                record.start_time = (Local::now() - elapsed).format(START_TIME_FORMAT).to_string();
            }
        }

        Ok(())
    }

    fn enrich_identity(&self, record: &mut ProcessRecord) {
        let pid = record.pid;
        let pid_arg = pid.to_string();

        best_effort(pid, "command line", || {
            let command = self.ps(&["-p", &pid_arg, "-o", "command="])?;
            record.full_command = command.trim().to_string();
            Ok(())
        });
        if record.full_command.is_empty() {
            record.full_command = record.command.clone();
        }

        best_effort(pid, "parent pid", || {
            let ppid = self.ps(&["-p", &pid_arg, "-o", "ppid="])?;
            record.ppid = ppid.trim().parse().context("non-numeric ppid")?;
            Ok(())
        });

        best_effort(pid, "parent command", || {
            if record.ppid > 0 {
                record.parent_command = self.parent_name(record.ppid)?;
            }
            Ok(())
        });

        best_effort(pid, "executable", || {
            let path = libproc::libproc::proc_pid::pidpath(pid).map_err(anyhow::Error::msg)?;
            record.exe_size = fs::metadata(&path)?.len() as i64;
            record.exe_path = path;
            Ok(())
        });

        best_effort(pid, "working directory", || {
            let output = self
                .runner
                .stdout(&self.lsof_binary, &["-p", &pid_arg, "-d", "cwd", "-Fn"])?;
            record.working_dir = parse_lsof_cwd(&output).unwrap_or_default();
            Ok(())
        });
    }

    fn parent_name(&self, ppid: i32) -> Result<String> {
        let sys = System::new_all();
        if let Some(parent) = sys.process(Pid::from_u32(ppid as u32)) {
            return Ok(parent.name().to_string_lossy().into_owned());
        }

        let comm = self.ps(&["-p", &ppid.to_string(), "-o", "comm="])?;
        let comm = comm.trim();
        Ok(Path::new(comm)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| comm.to_string()))
    }

    fn enrich_counts(&self, record: &mut ProcessRecord) {
        let pid = record.pid;
        let pid_arg = pid.to_string();

        best_effort(pid, "threads", || {
            record.threads = count_rows_after_header(&self.ps(&["-M", "-p", &pid_arg])?) as i32;
            Ok(())
        });

        best_effort(pid, "open fds", || {
            let output = self.runner.stdout(&self.lsof_binary, &["-p", &pid_arg])?;
            record.open_fds = count_rows_after_header(&output) as i32;
            Ok(())
        });

        best_effort(pid, "fd limit", || {
            let output = self.runner.stdout("launchctl", &["limit", "maxfiles"])?;
            record.max_fds = parse_maxfiles(&output).context("unexpected launchctl output")?;
            Ok(())
        });

        best_effort(pid, "environment", || {
            record.env_count = count_env_rows(&self.ps(&["-p", &pid_arg, "-E"])?) as i32;
            Ok(())
        });

        best_effort(pid, "children", || {
            // pgrep exits 1 when nothing matches
            let output = self.runner.output("pgrep", &["-P", &pid_arg])?;
            record.child_count = count_rows(&output.stdout) as i32;
            Ok(())
        });
    }
}

impl ProcessEnricher for MacOSEnricher {
    fn name(&self) -> &'static str {
        "ps"
    }

    fn enrich(&self, record: &mut ProcessRecord) {
        let pid = record.pid;

        best_effort(pid, "ps", || self.enrich_ps(record));
        self.enrich_identity(record);
        self.enrich_counts(record);

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
