// Per-process socket-to-connection mapping
//
// Each platform answers the same question differently:
// - Linux: socket inodes from /proc/<pid>/fd matched against /proc/net/{tcp,udp}
// - macOS: `lsof -a -i -n -P -p <pid>`

use anyhow::Result;

#[cfg(target_os = "linux")]
mod procfs;
#[cfg(target_os = "linux")]
pub use procfs::ProcfsSocketMapper;

mod lsof;
#[cfg(target_os = "macos")]
pub use lsof::LsofSocketMapper;

/// Transport protocol of a connection table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Table name under `<proc>/net/`
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    pub fn table_name(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }

    /// Protocol keyword in lsof's NODE column
    pub fn lsof_name(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

/// Lists the connections owned by one process
pub trait SocketMapper {
    /// Backend name (e.g., "procfs", "lsof")
    fn name(&self) -> &'static str;

    /// Human-readable `local -> remote [STATE]` strings for every socket of
    /// `pid` speaking `protocol`, in the order the source lists them
    fn connections(&self, pid: i32, protocol: Protocol) -> Result<Vec<String>>;
}
