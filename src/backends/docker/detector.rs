// Container detection: four independent strategies, first hit wins

use crate::backends::command::CommandRunner;
use crate::process::ProcessRecord;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::cell::OnceCell;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

/// Template printing every network IP of a container, concatenated
const NETWORK_IP_TEMPLATE: &str = "{{range .NetworkSettings.Networks}}{{.IPAddress}}{{end}}";

/// How a container was (or was not) identified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Docker's own process holds the port; match published ports
    Port,
    /// docker-proxy forwards the port; match the container IP it targets
    Proxy,
    /// The process runs inside a docker cgroup
    Cgroup,
    /// The process's HOSTNAME is a container id prefix
    Hostname,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Port,
        Strategy::Proxy,
        Strategy::Cgroup,
        Strategy::Hostname,
    ];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Port => "published port",
            Strategy::Proxy => "docker-proxy",
            Strategy::Cgroup => "cgroup",
            Strategy::Hostname => "hostname",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of [`ContainerDetector::detect`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detection {
    pub container_id: Option<String>,
    /// Strategy that produced the id
    pub strategy: Option<Strategy>,
    /// Strategies run, in order
    pub attempted: Vec<Strategy>,
}

impl Detection {
    pub fn is_container(&self) -> bool {
        self.container_id.is_some()
    }
}

/// One line of `docker ps --format json`
#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Ports", default)]
    ports: String,
}

/// Decides whether a process is a Docker container (or forwards to one)
pub struct ContainerDetector {
    runner: Rc<dyn CommandRunner>,
    docker: String,
    proc_root: PathBuf,
    max_inspections: usize,
    available: OnceCell<bool>,
    proxy_ip: Regex,
    cgroup_id: Regex,
}

impl ContainerDetector {
    pub fn new(
        runner: Rc<dyn CommandRunner>,
        docker: impl Into<String>,
        proc_root: impl Into<PathBuf>,
        max_inspections: usize,
    ) -> Result<Self> {
        Ok(Self {
            runner,
            docker: docker.into(),
            proc_root: proc_root.into(),
            max_inspections,
            available: OnceCell::new(),
            proxy_ip: Regex::new(r"-container-ip\s+([0-9.]+)")?,
            // /docker/<id> (cgroup v1) or /docker-<id>.scope (systemd, cgroup v2)
            cgroup_id: Regex::new(r"/docker[/-]([a-f0-9]{64})")?,
        })
    }

    /// Whether the docker CLI can reach a daemon; checked once
    pub fn docker_available(&self) -> bool {
        *self.available.get_or_init(|| {
            let available = self.runner.succeeds(
                &self.docker,
                &["version", "--format", "{{.Server.Version}}"],
            );
            log::debug!("Docker available: {}", available);
            available
        })
    }

    /// Run every strategy in order until one yields a container id
    ///
    /// A strategy whose precondition does not hold (e.g. the process is not
    /// docker-proxy) still counts as attempted. Failing strategies are
    /// logged and treated as negative.
    pub fn detect(&self, record: &ProcessRecord, port: u16) -> Detection {
        let mut detection = Detection::default();

        if !self.docker_available() {
            log::debug!("Docker CLI unavailable, skipping container detection");
            return detection;
        }

        for strategy in Strategy::ALL {
            detection.attempted.push(strategy);

            let found = match strategy {
                Strategy::Port => self.by_port(record, port),
                Strategy::Proxy => self.by_proxy(record),
                Strategy::Cgroup => self.by_cgroup(record.pid),
                Strategy::Hostname => self.by_hostname(record.pid),
            };

            match found {
                Ok(Some(id)) => {
                    log::info!("PID {} belongs to container {} ({})", record.pid, id, strategy);
                    detection.container_id = Some(id);
                    detection.strategy = Some(strategy);
                    return detection;
                }
                Ok(None) => log::debug!("PID {}: no container by {}", record.pid, strategy),
                Err(e) => log::debug!("PID {}: {} strategy failed: {:#}", record.pid, strategy, e),
            }
        }

        detection
    }

    fn docker_stdout(&self, args: &[&str]) -> Result<String> {
        self.runner
            .stdout(&self.docker, args)
            .with_context(|| format!("{} {} failed", self.docker, args.join(" ")))
    }

    fn by_port(&self, record: &ProcessRecord, port: u16) -> Result<Option<String>> {
        let looks_like_docker = record.command.to_lowercase().contains("docker")
            || record.full_command.to_lowercase().contains("docker");
        if !looks_like_docker {
            return Ok(None);
        }

        let output = self.docker_stdout(&["ps", "--format", "json"])?;
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            let entry: PsEntry = match serde_json::from_str(line) {
                Ok(entry) => entry,
                Err(e) => {
                    log::debug!("Skipping unparseable docker ps line: {}", e);
                    continue;
                }
            };

            if container_has_port(&entry.ports, port) {
                return Ok(Some(entry.id));
            }
        }

        Ok(None)
    }

    fn by_proxy(&self, record: &ProcessRecord) -> Result<Option<String>> {
        // lsof truncates COMMAND, so the full command line is checked too
        if !record.command.contains("docker-proxy") && !record.full_command.contains("docker-proxy") {
            return Ok(None);
        }

        let ip = match self.container_ip_from_cmdline(&record.full_command) {
            Some(ip) => ip,
            None => match self.container_ip_from_argv(record.pid)? {
                Some(ip) => ip,
                None => return Ok(None),
            },
        };

        self.find_container_by_ip(&ip)
    }

    /// `-container-ip` argument of a space-joined command line
    pub fn container_ip_from_cmdline(&self, cmdline: &str) -> Option<String> {
        self.proxy_ip
            .captures(cmdline)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn container_ip_from_argv(&self, pid: i32) -> Result<Option<String>> {
        let path = self.proc_root.join(pid.to_string()).join("cmdline");
        let raw = fs::read(&path).with_context(|| format!("Failed to read {:?}", path))?;
        let argv: Vec<String> = raw
            .split(|b| *b == 0)
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect();

        Ok(argv
            .iter()
            .position(|arg| arg == "-container-ip")
            .and_then(|i| argv.get(i + 1))
            .filter(|ip| !ip.is_empty())
            .cloned())
    }

    /// Inspect running containers one at a time until one has `ip`
    fn find_container_by_ip(&self, ip: &str) -> Result<Option<String>> {
        let output = self.docker_stdout(&["ps", "-q"])?;
        let ids: Vec<&str> = output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        if ids.len() > self.max_inspections {
            log::warn!(
                "Only inspecting the first {} of {} running containers",
                self.max_inspections,
                ids.len()
            );
        }

        for id in ids.into_iter().take(self.max_inspections) {
            let Ok(addresses) = self.docker_stdout(&["inspect", "-f", NETWORK_IP_TEMPLATE, id]) else {
                continue;
            };
            if addresses.trim() == ip {
                return Ok(Some(id.to_string()));
            }
        }

        Ok(None)
    }

    fn by_cgroup(&self, pid: i32) -> Result<Option<String>> {
        let path = self.proc_root.join(pid.to_string()).join("cgroup");
        let text = fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
        Ok(self.container_id_from_cgroup(&text))
    }

    /// First 64-hex docker id in a cgroup membership file
    pub fn container_id_from_cgroup(&self, text: &str) -> Option<String> {
        text.lines().find_map(|line| {
            self.cgroup_id
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        })
    }

    fn by_hostname(&self, pid: i32) -> Result<Option<String>> {
        let path = self.proc_root.join(pid.to_string()).join("environ");
        let environ = fs::read(&path).with_context(|| format!("Failed to read {:?}", path))?;

        let Some(hostname) = hostname_from_environ(&environ) else {
            return Ok(None);
        };

        let filter = format!("id={}", hostname);
        let output = self.docker_stdout(&["ps", "-q", "--filter", &filter])?;
        Ok(output
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string))
    }
}

/// Non-empty `HOSTNAME` value of a NUL-separated environ block
fn hostname_from_environ(environ: &[u8]) -> Option<String> {
    environ
        .split(|b| *b == 0)
        .find_map(|entry| entry.strip_prefix(b"HOSTNAME="))
        .map(|value| String::from_utf8_lossy(value).into_owned())
        .filter(|value| !value.is_empty())
}

/// Whether a `docker ps` port column publishes `port` on the host
///
/// The column is a comma-separated list of `[host]:hostport->containerport/proto`
/// fragments; host ports may be ranges such as `8000-8010`.
pub fn container_has_port(ports: &str, port: u16) -> bool {
    ports.split(',').any(|mapping| {
        let host_part = mapping.trim().split("->").next().unwrap_or_default();
        let Some((_, host_port)) = host_part.rsplit_once(':') else {
            return false;
        };

        match host_port.split_once('-') {
            Some((start, end)) => match (start.parse::<u16>(), end.parse::<u16>()) {
                (Ok(start), Ok(end)) => (start..=end).contains(&port),
                _ => false,
            },
            None => host_port.parse::<u16>() == Ok(port),
        }
    })
}
