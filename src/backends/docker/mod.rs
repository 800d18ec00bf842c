// Docker integration: decide whether a process belongs to a container,
// describe that container, and act on it

mod action;
mod detector;
mod retriever;

pub use action::{ContainerAction, ContainerActions};
pub use detector::ContainerDetector;
pub use retriever::ContainerRetriever;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Length of the abbreviated container and image ids docker prints
pub const SHORT_ID_LEN: usize = 12;

/// Everything known about the container that owns a port
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    // Identity
    pub id: String,
    pub short_id: String,
    pub name: String,
    pub image: String,
    pub image_id: String,
    pub platform: String,
    pub command: String,

    // Lifecycle
    pub state: String,
    pub status: String,
    pub created_at: String,
    pub running_for: String,

    // Ports
    pub ports: Vec<PortMapping>,
    pub port_string: String,

    // Network (address details come from the first network by name)
    pub networks: Vec<String>,
    pub ip_address: String,
    pub gateway: String,
    pub mac_address: String,

    /// Live resource snapshot; `None` when `docker stats` was unavailable
    pub stats: Option<ContainerStats>,

    // Configuration
    pub labels: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub restart_policy: String,

    // The process that led to detection
    pub process_id: i32,
    pub process_cmd: String,
}

/// One published port
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_ip: String,
    pub host_port: String,
    pub container_port: String,
    pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub destination: String,
    pub mode: String,
}

/// `docker stats` columns, kept as docker formats them (e.g. "12.5MiB / 1GiB")
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub cpu_percent: Option<String>,
    pub mem_usage: Option<String>,
    pub mem_percent: Option<String>,
    pub net_io: Option<String>,
    pub block_io: Option<String>,
    pub pids: Option<String>,
}

/// First twelve characters of an id
pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}
