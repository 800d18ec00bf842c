// Linux procfs-based socket mapper

use super::{Protocol, SocketMapper};
use anyhow::{Context, Result};
use procfs::process::{FDTarget, Process};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

/// Column holding the socket inode in /proc/net/{tcp,udp}
const INODE_COLUMN: usize = 9;

/// TCP states as encoded in /proc/net/tcp (include/net/tcp_states.h)
const TCP_STATES: &[(&str, &str)] = &[
    ("01", "ESTABLISHED"),
    ("02", "SYN_SENT"),
    ("03", "SYN_RECV"),
    ("04", "FIN_WAIT1"),
    ("05", "FIN_WAIT2"),
    ("06", "TIME_WAIT"),
    ("07", "CLOSE"),
    ("08", "CLOSE_WAIT"),
    ("09", "LAST_ACK"),
    ("0A", "LISTEN"),
    ("0B", "CLOSING"),
];

/// Socket mapper using the Linux /proc filesystem
///
/// This backend reads socket information from:
/// - <root>/<pid>/fd/ - for socket inodes
/// - <root>/net/tcp - for TCP IPv4 connections
/// - <root>/net/udp - for UDP IPv4 connections
pub struct ProcfsSocketMapper {
    root: PathBuf,
}

impl ProcfsSocketMapper {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Inodes of every socket the process holds open
    pub fn socket_inodes(&self, pid: i32) -> Result<HashSet<u64>> {
        let process = Process::new_with_root(self.root.join(pid.to_string()))
            .with_context(|| format!("PID {} not found under {:?}", pid, self.root))?;

        let mut inodes = HashSet::new();
        for fd_result in process.fd()? {
            // fds can close between readdir and readlink
            if let Ok(fd_info) = fd_result {
                if let FDTarget::Socket(inode) = fd_info.target {
                    inodes.insert(inode);
                }
            }
        }

        Ok(inodes)
    }
}

impl SocketMapper for ProcfsSocketMapper {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn connections(&self, pid: i32, protocol: Protocol) -> Result<Vec<String>> {
        let inodes = self.socket_inodes(pid)?;
        if inodes.is_empty() {
            return Ok(Vec::new());
        }

        let path = self.root.join("net").join(protocol.table_name());
        let table = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {:?}", path))?;

        Ok(match_connections(&table, &inodes, protocol))
    }
}

/// Rows of a /proc/net/{tcp,udp} table whose inode is in `inodes`, rendered
/// as `local -> remote [STATE]` in table order
pub fn match_connections(table: &str, inodes: &HashSet<u64>, protocol: Protocol) -> Vec<String> {
    let mut connections = Vec::new();

    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() <= INODE_COLUMN {
            continue;
        }

        let Ok(inode) = fields[INODE_COLUMN].parse::<u64>() else {
            continue;
        };
        if !inodes.contains(&inode) {
            continue;
        }

        let mut connection = format!(
            "{} -> {}",
            decode_address(fields[1]),
            decode_address(fields[2])
        );

        if protocol == Protocol::Tcp {
            let state = tcp_state(fields[3]);
            if !state.is_empty() {
                connection.push_str(&format!(" [{}]", state));
            }
        }

        connections.push(connection);
    }

    connections
}

/// `HEXIP:HEXPORT` to `ip:port`, with the unspecified address shown as `*`
pub fn decode_address(field: &str) -> String {
    let Some((hex_ip, hex_port)) = field.split_once(':') else {
        return field.to_string();
    };

    let port = u32::from_str_radix(hex_port, 16).unwrap_or(0);

    if !hex_ip.is_empty() && hex_ip.chars().all(|c| c == '0') {
        return format!("*:{}", port);
    }

    format!("{}:{}", hex_to_ip(hex_ip), port)
}

/// Decode the kernel's little-endian hex IPv4 form (`0100007F` -> `127.0.0.1`)
///
/// Anything other than eight hex digits is reported as `IPv6`.
pub fn hex_to_ip(hex: &str) -> String {
    if hex.len() != 8 || !hex.is_ascii() {
        return "IPv6".to_string();
    }

    (0..4)
        .rev()
        .map(|i| {
            u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .unwrap_or(0)
                .to_string()
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Name of a hex TCP state code; unknown codes are returned unchanged
pub fn tcp_state(hex: &str) -> String {
    let normalized = hex.to_ascii_uppercase();
    TCP_STATES
        .iter()
        .find(|(code, _)| *code == normalized)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| hex.to_string())
}
