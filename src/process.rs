use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Everything known about the process that owns a listening port.
///
/// The first nine fields come from a single line of `lsof` output and are
/// never touched again. Everything after them is filled in, best effort, by
/// a [`ProcessEnricher`](crate::backends::process::ProcessEnricher); a field
/// whose source was unavailable keeps its zero value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    // Socket origin (lsof columns)
    pub command: String,
    #[serde(rename = "id")]
    pub pid: i32,
    pub user: String,
    pub fd: String,
    #[serde(rename = "type")]
    pub family: String,
    pub device: String,
    pub size_offset: String,
    pub node: String,
    pub name: String,

    // Identity
    pub full_command: String,
    pub ppid: i32,
    pub parent_command: String,
    pub uid: i32,
    pub gid: i32,
    pub groups: String,

    // Runtime state
    pub state: String,
    pub threads: i32,
    pub nice_value: i32,
    pub priority: i32,
    pub start_time: String,
    pub uptime: String,
    #[serde(rename = "cpu_time_seconds")]
    pub cpu_time_secs: f64,
    pub cpu_percent: f64,

    // Resource usage
    pub memory_rss_kb: i64,
    pub memory_vms_kb: i64,
    pub memory_limit_kb: i64, // -1 when every limit is unlimited
    pub open_fds: i32,
    pub max_fds: i32,
    pub io_read_bytes: i64,
    pub io_write_bytes: i64,
    pub io_read_syscalls: i64,
    pub io_write_syscalls: i64,
    pub exe_path: String,
    #[serde(rename = "exe_size_bytes")]
    pub exe_size: i64,
    pub env_count: i32,
    pub child_count: i32,
    pub working_dir: String,

    // Network
    #[serde(rename = "network_connections")]
    pub network_conns: i32,
    pub tcp_connections: Vec<String>,
    pub udp_connections: Vec<String>,
}

/// The nine `lsof` columns, in output order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOrigin {
    pub command: String,
    pub pid: i32,
    pub user: String,
    pub fd: String,
    pub family: String,
    pub device: String,
    pub size_offset: String,
    pub node: String,
    pub name: String,
}

impl ProcessRecord {
    pub fn new(origin: SocketOrigin) -> Self {
        Self {
            command: origin.command,
            pid: origin.pid,
            user: origin.user,
            fd: origin.fd,
            family: origin.family,
            device: origin.device,
            size_offset: origin.size_offset,
            node: origin.node,
            name: origin.name,
            ..Default::default()
        }
    }

    /// Recompute the connection total from the TCP and UDP lists
    pub fn update_connection_count(&mut self) {
        self.network_conns = (self.tcp_connections.len() + self.udp_connections.len()) as i32;
    }

    pub fn format_bytes(bytes: i64) -> String {
        if bytes < 1024 {
            format!("{} B", bytes)
        } else if bytes < 1024 * 1024 {
            format!("{:.2} KB", bytes as f64 / 1024.0)
        } else if bytes < 1024 * 1024 * 1024 {
            format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
        } else {
            format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
        }
    }

    pub fn format_memory_kb(kb: i64) -> String {
        if kb < 1024 {
            format!("{} KB", kb)
        } else if kb < 1024 * 1024 {
            format!("{:.2} MB", kb as f64 / 1024.0)
        } else {
            format!("{:.2} GB", kb as f64 / (1024.0 * 1024.0))
        }
    }
}

/// Compact uptime string such as `2d 3h 0m 12s`.
///
/// Leading zero units are dropped, but once a larger unit is shown every
/// smaller one is too. Seconds are always present.
pub fn format_uptime(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total / 3_600) % 24;
    let minutes = (total / 60) % 60;
    let seconds = total % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 || days > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 || hours > 0 || days > 0 {
        parts.push(format!("{}m", minutes));
    }
    parts.push(format!("{}s", seconds));

    parts.join(" ")
}
