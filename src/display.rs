// Terminal and JSON rendering of process and container reports

use crate::backends::docker::ContainerRecord;
use crate::process::ProcessRecord;
use anyhow::{Context, Result};
use crossterm::style::{Color, Stylize};
use serde::Serialize;
use std::io::Write;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const REPORT_WIDTH: usize = 90;
const LABEL_WIDTH: usize = 20;
const BAR_WIDTH: usize = 30;

const MAX_TCP_SHOWN: usize = 8;
const MAX_UDP_SHOWN: usize = 5;
const MAX_CONFIG_SHOWN: usize = 5;

#[derive(Serialize)]
struct CombinedReport<'a> {
    process: &'a ProcessRecord,
    container: &'a ContainerRecord,
}

/// Pretty-printed JSON: the process alone, or `{"process", "container"}`
pub fn write_json<W: Write>(
    process: &ProcessRecord,
    container: Option<&ContainerRecord>,
    out: &mut W,
) -> Result<()> {
    let json = match container {
        Some(container) => serde_json::to_string_pretty(&CombinedReport { process, container }),
        None => serde_json::to_string_pretty(process),
    }
    .context("failed to serialize report")?;

    writeln!(out, "{}", json)?;
    Ok(())
}

/// Pad `text` with spaces to `width` terminal columns
pub fn pad_to_width(text: &str, width: usize) -> String {
    let current = text.width();
    if current >= width {
        text.to_string()
    } else {
        format!("{}{}", text, " ".repeat(width - current))
    }
}

/// Cut `text` to at most `max` terminal columns, ending in "..." when cut
pub fn truncate_to_width(text: &str, max: usize) -> String {
    if text.width() <= max {
        return text.to_string();
    }

    let budget = max.saturating_sub(3);
    let mut used = 0;
    let mut result = String::new();
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        result.push(c);
    }
    result.push_str("...");
    result
}

/// Keep the last `max` columns of `text`, prefixed with "..." when cut
fn truncate_left(text: &str, max: usize) -> String {
    if text.width() <= max {
        return text.to_string();
    }

    let budget = max.saturating_sub(3);
    let mut used = 0;
    let mut tail = Vec::new();
    for c in text.chars().rev() {
        let w = c.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        tail.push(c);
    }
    format!("...{}", tail.into_iter().rev().collect::<String>())
}

fn state_color(state: &str) -> Color {
    if state.contains("Running") {
        Color::Green
    } else if state.contains("Sleeping") || state.contains("Idle") {
        Color::Cyan
    } else if state.contains("Zombie") || state.contains("Dead") {
        Color::Red
    } else if state.contains("Stopped") {
        Color::Yellow
    } else {
        Color::White
    }
}

fn container_state_color(state: &str) -> Color {
    match state {
        "running" => Color::Green,
        "paused" | "restarting" => Color::Yellow,
        "exited" | "dead" => Color::Red,
        _ => Color::White,
    }
}

fn usage_bar(percent: f64) -> String {
    let clamped = percent.clamp(0.0, 100.0);
    let filled = ((BAR_WIDTH as f64) * clamped / 100.0) as usize;
    format!(
        "[{}{}]",
        "█".repeat(filled),
        "░".repeat(BAR_WIDTH - filled)
    )
}

fn usage_color(percent: f64) -> Color {
    if percent > 90.0 {
        Color::Red
    } else if percent > 75.0 {
        Color::DarkYellow
    } else {
        Color::Green
    }
}

/// Line-oriented report writer shared by the process and container views
struct Report<'a, W: Write> {
    out: &'a mut W,
    accent: Color,
}

impl<'a, W: Write> Report<'a, W> {
    fn new(out: &'a mut W, accent: Color) -> Self {
        Self { out, accent }
    }

    fn banner(&mut self, title: &str) -> Result<()> {
        let inner = (REPORT_WIDTH - 2).max(title.width() + 2);
        let left = (inner - title.width()) / 2;
        let right = inner - title.width() - left;

        let rule = "═".repeat(inner);
        writeln!(self.out, "{}", format!("╔{}╗", rule).bold().with(self.accent))?;
        writeln!(
            self.out,
            "{}{}{}{}{}",
            "║".bold().with(self.accent),
            " ".repeat(left),
            title.bold().cyan(),
            " ".repeat(right),
            "║".bold().with(self.accent)
        )?;
        writeln!(self.out, "{}", format!("╚{}╝", rule).bold().with(self.accent))?;
        Ok(())
    }

    fn section(&mut self, title: &str) -> Result<()> {
        writeln!(self.out)?;
        writeln!(
            self.out,
            "  {} {}",
            "▌".bold().with(self.accent),
            title.bold()
        )?;
        Ok(())
    }

    fn field(&mut self, label: &str, value: impl AsRef<str>, color: Color) -> Result<()> {
        let label = pad_to_width(&format!("{}:", label), LABEL_WIDTH);
        writeln!(
            self.out,
            "  {} {}",
            label.bold().blue(),
            value.as_ref().with(color)
        )?;
        Ok(())
    }

    /// Indented list that shows at most `limit` items and then a count of the rest
    fn list<I, S>(&mut self, heading: Option<&str>, items: I, limit: usize, color: Color) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if let Some(heading) = heading {
            writeln!(self.out, "  {}", format!("▸ {}", heading).bold().cyan())?;
        }

        let mut hidden = 0;
        for (i, item) in items.into_iter().enumerate() {
            if i < limit {
                writeln!(self.out, "    {} {}", "┃".blue(), item.as_ref().with(color))?;
            } else {
                hidden += 1;
            }
        }
        if hidden > 0 {
            writeln!(
                self.out,
                "    {}",
                format!("┗━ and {} more...", hidden).dark_grey()
            )?;
        }
        Ok(())
    }

    fn line(&mut self, text: impl std::fmt::Display) -> Result<()> {
        writeln!(self.out, "  {}", text)?;
        Ok(())
    }

    fn divider(&mut self) -> Result<()> {
        writeln!(self.out, "{}", "─".repeat(REPORT_WIDTH).bold().with(self.accent))?;
        Ok(())
    }
}

/// Sectioned, colored report for the process listening on `port`
pub fn write_process_report<W: Write>(record: &ProcessRecord, port: u16, out: &mut W) -> Result<()> {
    let mut report = Report::new(out, Color::Magenta);
    report.banner(&format!("PORT {} ANALYSIS", port))?;

    report.section("PROCESS IDENTITY")?;
    report.field("Command", &record.command, Color::Green)?;
    if !record.full_command.is_empty() {
        report.field("Full Command", truncate_to_width(&record.full_command, 60), Color::Green)?;
    }
    report.field("Process ID", record.pid.to_string(), Color::DarkYellow)?;
    report.field("Parent PID", record.ppid.to_string(), Color::DarkYellow)?;
    if !record.parent_command.is_empty() {
        report.field("Parent Process", &record.parent_command, Color::Magenta)?;
    }
    report.field("User", &record.user, Color::Yellow)?;
    report.field("UID / GID", format!("{} / {}", record.uid, record.gid), Color::DarkGrey)?;
    if !record.groups.is_empty() {
        report.field("Groups", &record.groups, Color::DarkGrey)?;
    }
    if record.child_count > 0 {
        report.field("Child Processes", record.child_count.to_string(), Color::Cyan)?;
    }

    if !record.exe_path.is_empty() {
        report.section("BINARY INFORMATION")?;
        report.field("Executable Path", &record.exe_path, Color::Cyan)?;
        if record.exe_size > 0 {
            report.field("Binary Size", ProcessRecord::format_bytes(record.exe_size), Color::DarkCyan)?;
        }
        report.field("Environment Vars", record.env_count.to_string(), Color::Magenta)?;
        if !record.working_dir.is_empty() {
            report.field("Working Directory", &record.working_dir, Color::Blue)?;
        }
    }

    report.section("PROCESS STATE")?;
    report.field("State", &record.state, state_color(&record.state))?;
    report.field("Threads", record.threads.to_string(), Color::Magenta)?;
    if record.nice_value != 0 || record.priority != 0 {
        report.field(
            "Nice / Priority",
            format!("{} / {}", record.nice_value, record.priority),
            Color::DarkYellow,
        )?;
    }
    if !record.start_time.is_empty() {
        report.field("Started", &record.start_time, Color::Cyan)?;
    }
    if !record.uptime.is_empty() {
        report.field("Uptime", &record.uptime, Color::Green)?;
    }
    if record.cpu_time_secs > 0.0 {
        let mut cpu = format!("{:.2}s", record.cpu_time_secs);
        if record.cpu_percent > 0.0 {
            cpu.push_str(&format!(" ({:.2}%)", record.cpu_percent));
        }
        report.field("CPU Time", cpu, Color::DarkYellow)?;
    }

    report.section("MEMORY USAGE")?;
    if record.memory_rss_kb > 0 {
        report.field("Resident Set (RSS)", ProcessRecord::format_memory_kb(record.memory_rss_kb), Color::Green)?;
        if record.memory_vms_kb > 0 {
            let percent = record.memory_rss_kb as f64 / record.memory_vms_kb as f64 * 100.0;
            report.line(usage_bar(percent).green())?;
        }
    }
    if record.memory_vms_kb > 0 {
        report.field("Virtual Memory", ProcessRecord::format_memory_kb(record.memory_vms_kb), Color::Blue)?;
    }
    match record.memory_limit_kb {
        -1 => report.field("Memory Limit", "unlimited", Color::DarkGrey)?,
        0 => {}
        limit => report.field("Memory Limit", ProcessRecord::format_memory_kb(limit), Color::DarkGrey)?,
    }

    if record.io_read_bytes > 0 || record.io_write_bytes > 0 {
        report.section("I/O STATISTICS")?;
        if record.io_read_bytes > 0 {
            report.field("Read", ProcessRecord::format_bytes(record.io_read_bytes), Color::Cyan)?;
            if record.io_read_syscalls > 0 {
                report.field("  Read Syscalls", record.io_read_syscalls.to_string(), Color::DarkGrey)?;
            }
        }
        if record.io_write_bytes > 0 {
            report.field("Write", ProcessRecord::format_bytes(record.io_write_bytes), Color::Red)?;
            if record.io_write_syscalls > 0 {
                report.field("  Write Syscalls", record.io_write_syscalls.to_string(), Color::DarkGrey)?;
            }
        }
    }

    report.section("FILE DESCRIPTORS")?;
    if record.max_fds > 0 {
        let percent = record.open_fds as f64 / record.max_fds as f64 * 100.0;
        report.field(
            "Open FDs",
            format!("{} / {} ({:.1}%)", record.open_fds, record.max_fds, percent),
            Color::Yellow,
        )?;
        report.line(usage_bar(percent).with(usage_color(percent)))?;
    } else {
        report.field("Open FDs", format!("{} / N/A", record.open_fds), Color::Yellow)?;
    }

    report.section("NETWORK")?;
    report.field("Protocol", record.family.to_uppercase(), Color::Cyan)?;
    report.field("Listening On", &record.name, Color::Green)?;
    report.field("Node Type", &record.node, Color::Magenta)?;
    report.field("File Descriptor", &record.fd, Color::DarkGrey)?;
    report.field("Total Connections", record.network_conns.to_string(), Color::DarkYellow)?;
    if !record.tcp_connections.is_empty() {
        report.list(Some("TCP Connections"), &record.tcp_connections, MAX_TCP_SHOWN, Color::Green)?;
    }
    if !record.udp_connections.is_empty() {
        report.list(Some("UDP Connections"), &record.udp_connections, MAX_UDP_SHOWN, Color::Magenta)?;
    }

    report.divider()
}

/// Sectioned, colored report for the container publishing `port`
pub fn write_container_report<W: Write>(
    container: &ContainerRecord,
    port: u16,
    out: &mut W,
) -> Result<()> {
    let mut report = Report::new(out, Color::Blue);
    report.banner(&format!("PORT {} -> DOCKER CONTAINER", port))?;

    report.section("CONTAINER IDENTITY")?;
    report.field("Container Name", &container.name, Color::Cyan)?;
    report.field("Container ID", &container.short_id, Color::Magenta)?;
    if container.id.len() > container.short_id.len() {
        report.field("  Full ID", &container.id, Color::DarkGrey)?;
    }
    report.field(
        "State",
        container.state.to_uppercase(),
        container_state_color(&container.state),
    )?;
    if !container.running_for.is_empty() {
        report.field("Running For", &container.running_for, Color::Green)?;
    }

    report.section("IMAGE")?;
    report.field("Image", &container.image, Color::Green)?;
    if !container.image_id.is_empty() {
        report.field("Image ID", &container.image_id, Color::DarkGrey)?;
    }
    if !container.platform.is_empty() {
        report.field("Platform", &container.platform, Color::DarkYellow)?;
    }
    if !container.command.is_empty() {
        report.field("Command", truncate_to_width(&container.command, 60), Color::DarkYellow)?;
    }

    report.section("NETWORK & PORTS")?;
    if !container.ports.is_empty() {
        report.field("Port Mappings", &container.port_string, Color::Cyan)?;
        let queried = port.to_string();
        for mapping in &container.ports {
            let host = match mapping.host_ip.as_str() {
                "" | "0.0.0.0" | "::" => format!("*:{}", mapping.host_port),
                ip => format!("{}:{}", ip, mapping.host_port),
            };
            let marker = if mapping.host_port == queried { "=>" } else { "  " };
            let line = format!(
                "{} {} -> {}/{}",
                marker, host, mapping.container_port, mapping.protocol
            );
            if mapping.host_port == queried {
                report.line(line.bold().green())?;
            } else {
                report.line(line.cyan())?;
            }
        }
    }
    if !container.ip_address.is_empty() {
        report.field("IP Address", &container.ip_address, Color::Blue)?;
    }
    if !container.gateway.is_empty() {
        report.field("Gateway", &container.gateway, Color::DarkGrey)?;
    }
    if !container.mac_address.is_empty() {
        report.field("MAC Address", &container.mac_address, Color::DarkGrey)?;
    }
    if !container.networks.is_empty() {
        report.field("Networks", container.networks.join(", "), Color::Magenta)?;
    }

    if let Some(stats) = &container.stats {
        report.section("RESOURCE USAGE")?;
        if let Some(cpu) = &stats.cpu_percent {
            report.field("CPU Usage", cpu, Color::DarkYellow)?;
        }
        if let Some(mem) = &stats.mem_usage {
            let shown = match &stats.mem_percent {
                Some(percent) => format!("{} ({})", mem, percent),
                None => mem.clone(),
            };
            report.field("Memory Usage", shown, Color::Green)?;
        }
        if let Some(net) = &stats.net_io {
            report.field("Network I/O", net, Color::Cyan)?;
        }
        if let Some(block) = &stats.block_io {
            report.field("Block I/O", block, Color::Red)?;
        }
        if let Some(pids) = &stats.pids {
            report.field("PIDs", pids, Color::Magenta)?;
        }
    }

    report.section("CONFIGURATION")?;
    if !container.restart_policy.is_empty() {
        report.field("Restart Policy", &container.restart_policy, Color::Yellow)?;
    }
    if !container.mounts.is_empty() {
        report.field("Mounts", format!("{} volume(s)", container.mounts.len()), Color::Cyan)?;
        let mounts = container.mounts.iter().map(|mount| {
            format!(
                "{} -> {} ({}, {})",
                truncate_left(&mount.source, 40),
                truncate_left(&mount.destination, 30),
                mount.kind,
                mount.mode
            )
        });
        report.list(None, mounts, MAX_CONFIG_SHOWN, Color::DarkGrey)?;
    }
    if !container.labels.is_empty() {
        report.field("Labels", format!("{} label(s)", container.labels.len()), Color::Magenta)?;
        let labels = container
            .labels
            .iter()
            .map(|(key, value)| truncate_to_width(&format!("{}={}", key, value), 70));
        report.list(None, labels, MAX_CONFIG_SHOWN, Color::DarkGrey)?;
    }

    if container.process_id > 0 {
        report.section("UNDERLYING PROCESS")?;
        report.field("Process ID", container.process_id.to_string(), Color::DarkGrey)?;
        if !container.process_cmd.is_empty() {
            report.field("Process Command", &container.process_cmd, Color::DarkGrey)?;
        }
        report.line("Actions below affect the container, not just this process.".dark_grey())?;
    }

    report.divider()
}
