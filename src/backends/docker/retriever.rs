// Container details from `docker inspect` and `docker stats`

use super::{ContainerRecord, ContainerStats, Mount, PortMapping, SHORT_ID_LEN, short_id};
use crate::backends::command::CommandRunner;
use crate::process::ProcessRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

const STATS_TEMPLATE: &str =
    "{{.CPUPerc}}|{{.MemUsage}}|{{.MemPerc}}|{{.NetIO}}|{{.BlockIO}}|{{.PIDs}}";

const IMAGE_DIGEST_PREFIX: &str = "sha256:";

// Shapes of the `docker inspect` fields we read. Docker emits null for
// several of these, hence the Options.

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Inspect {
    id: String,
    name: String,
    image: String,
    platform: String,
    config: InspectConfig,
    state: InspectState,
    host_config: HostConfig,
    network_settings: NetworkSettings,
    mounts: Option<Vec<InspectMount>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectConfig {
    image: String,
    cmd: Option<Vec<String>>,
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectState {
    status: String,
    started_at: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct HostConfig {
    restart_policy: RestartPolicy,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RestartPolicy {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct NetworkSettings {
    /// "80/tcp" -> host bindings (null when exposed but unpublished)
    ports: Option<BTreeMap<String, Option<Vec<PortBinding>>>>,
    networks: Option<BTreeMap<String, Network>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct PortBinding {
    host_ip: String,
    host_port: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Network {
    #[serde(rename = "IPAddress")]
    ip_address: String,
    #[serde(rename = "Gateway")]
    gateway: String,
    #[serde(rename = "MacAddress")]
    mac_address: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectMount {
    #[serde(rename = "Type")]
    kind: String,
    source: String,
    destination: String,
    #[serde(rename = "RW")]
    rw: bool,
}

/// Builds a [`ContainerRecord`] from the docker CLI
pub struct ContainerRetriever {
    runner: Rc<dyn CommandRunner>,
    docker: String,
}

impl ContainerRetriever {
    pub fn new(runner: Rc<dyn CommandRunner>, docker: impl Into<String>) -> Self {
        Self {
            runner,
            docker: docker.into(),
        }
    }

    /// Inspect `container_id`; a missing stats snapshot is tolerated, a failed
    /// inspect is not
    pub fn retrieve(&self, container_id: &str, process: &ProcessRecord) -> Result<ContainerRecord> {
        let output = self
            .runner
            .stdout(&self.docker, &["inspect", container_id])
            .context("failed to inspect container")?;

        let mut record = parse_inspect(&output, container_id, Utc::now())?;
        record.process_id = process.pid;
        record.process_cmd = process.command.clone();

        record.stats = match self.runner.stdout(
            &self.docker,
            &["stats", "--no-stream", "--format", STATS_TEMPLATE, container_id],
        ) {
            Ok(line) => parse_stats(&line),
            Err(e) => {
                log::debug!("No stats for container {}: {}", container_id, e);
                None
            }
        };

        Ok(record)
    }
}

/// Map `docker inspect <id>` output onto a record
pub fn parse_inspect(json: &str, container_id: &str, now: DateTime<Utc>) -> Result<ContainerRecord> {
    let mut inspected: Vec<Inspect> =
        serde_json::from_str(json).context("unexpected docker inspect output")?;
    if inspected.is_empty() {
        anyhow::bail!("docker inspect returned no containers");
    }
    let data = inspected.swap_remove(0);

    let id = if data.id.is_empty() {
        container_id.to_string()
    } else {
        data.id
    };

    let ports = port_mappings(data.network_settings.ports.unwrap_or_default());
    let networks = data.network_settings.networks.unwrap_or_default();
    let first_network = networks.values().next();

    let running_for = DateTime::parse_from_rfc3339(&data.state.started_at)
        .ok()
        .and_then(|started| now.signed_duration_since(started).to_std().ok())
        .map(format_running_for)
        .unwrap_or_default();

    Ok(ContainerRecord {
        short_id: short_id(&id),
        id,
        name: data.name.trim_start_matches('/').to_string(),
        image: data.config.image,
        image_id: short_image_id(&data.image),
        platform: data.platform,
        command: data.config.cmd.unwrap_or_default().join(" "),
        state: data.state.status.clone(),
        status: data.state.status,
        created_at: data.state.started_at,
        running_for,
        port_string: port_string(&ports),
        ports,
        ip_address: first_network.map(|n| n.ip_address.clone()).unwrap_or_default(),
        gateway: first_network.map(|n| n.gateway.clone()).unwrap_or_default(),
        mac_address: first_network.map(|n| n.mac_address.clone()).unwrap_or_default(),
        networks: networks.keys().cloned().collect(),
        stats: None,
        labels: data.config.labels.unwrap_or_default(),
        mounts: data
            .mounts
            .unwrap_or_default()
            .into_iter()
            .map(|m| Mount {
                kind: m.kind,
                source: m.source,
                destination: m.destination,
                mode: if m.rw { "rw" } else { "ro" }.to_string(),
            })
            .collect(),
        restart_policy: data.host_config.restart_policy.name,
        process_id: 0,
        process_cmd: String::new(),
    })
}

fn port_mappings(ports: BTreeMap<String, Option<Vec<PortBinding>>>) -> Vec<PortMapping> {
    let mut mappings: Vec<PortMapping> = ports
        .into_iter()
        .flat_map(|(container_port, bindings)| {
            let (port, protocol) = match container_port.split_once('/') {
                Some((port, protocol)) => (port.to_string(), protocol.to_string()),
                None => (container_port.clone(), String::new()),
            };
            bindings
                .unwrap_or_default()
                .into_iter()
                .map(move |binding| PortMapping {
                    host_ip: binding.host_ip,
                    host_port: binding.host_port,
                    container_port: port.clone(),
                    protocol: protocol.clone(),
                })
        })
        .collect();

    mappings.sort_by_key(|m| {
        (
            m.container_port.parse::<u32>().unwrap_or(u32::MAX),
            m.protocol.clone(),
            m.host_ip.clone(),
        )
    });
    mappings
}

/// `[hostip:]hostport->containerport/proto` fragments joined by `, `;
/// the wildcard host ip is left out
pub fn port_string(ports: &[PortMapping]) -> String {
    ports
        .iter()
        .map(|p| {
            let host = if p.host_ip.is_empty() || p.host_ip == "0.0.0.0" {
                p.host_port.clone()
            } else {
                format!("{}:{}", p.host_ip, p.host_port)
            };
            format!("{}->{}/{}", host, p.container_port, p.protocol)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `sha256:<digest>` shortened to the twelve characters docker prints
fn short_image_id(image: &str) -> String {
    match image.strip_prefix(IMAGE_DIGEST_PREFIX) {
        Some(digest) if digest.len() > SHORT_ID_LEN => digest[..SHORT_ID_LEN].to_string(),
        _ => image.to_string(),
    }
}

/// Coarse "running for" text: `42 seconds`, `5 minutes`, `3 hours 12 minutes`, `2 days 4 hours`
pub fn format_running_for(duration: Duration) -> String {
    let secs = duration.as_secs();
    let minutes = secs / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if secs < 60 {
        format!("{} seconds", secs)
    } else if minutes < 60 {
        format!("{} minutes", minutes)
    } else if hours < 24 {
        match minutes % 60 {
            0 => format!("{} hours", hours),
            m => format!("{} hours {} minutes", hours, m),
        }
    } else {
        match hours % 24 {
            0 => format!("{} days", days),
            h => format!("{} days {} hours", days, h),
        }
    }
}

/// One `docker stats` line rendered with [`STATS_TEMPLATE`]
pub fn parse_stats(line: &str) -> Option<ContainerStats> {
    let parts: Vec<&str> = line.trim().split('|').map(str::trim).collect();
    if parts.len() < 6 {
        return None;
    }

    let field = |i: usize| Some(parts[i].to_string()).filter(|s| !s.is_empty());

    Some(ContainerStats {
        cpu_percent: field(0),
        mem_usage: field(1),
        mem_percent: field(2),
        net_io: field(3),
        block_io: field(4),
        pids: field(5),
    })
}
