// lsof-based port lookup

use super::PortExecutor;
use crate::backends::command::CommandRunner;
use crate::error::LookupError;
use crate::process::SocketOrigin;
use anyhow::{Context, Result};
use std::rc::Rc;

/// Number of whitespace-separated lsof columns before NAME
const FIXED_COLUMNS: usize = 8;

/// Executes `lsof -nP -i :<port>` and keeps only listening sockets
pub struct LsofExecutor {
    runner: Rc<dyn CommandRunner>,
    binary: String,
}

impl LsofExecutor {
    pub fn new(runner: Rc<dyn CommandRunner>, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
        }
    }
}

impl PortExecutor for LsofExecutor {
    fn execute(&self, port: u16) -> Result<String> {
        // -n: Don't resolve hostnames
        // -P: Don't resolve port names, so NAME reads "*:8080" not "*:http-alt"
        let selector = format!(":{}", port);
        let output = self
            .runner
            .output(&self.binary, &["-nP", "-i", &selector])
            .with_context(|| format!("failed to execute {}", self.binary))?;

        // lsof exits 1 when nothing matches; that is an empty answer, not a failure
        if !output.success && !output.stderr.trim().is_empty() {
            log::debug!("{} reported: {}", self.binary, output.stderr.trim());
        }

        Ok(listening_lines(&output.stdout))
    }
}

/// Keep only the lines describing a listening socket
pub fn listening_lines(output: &str) -> String {
    output
        .lines()
        .filter(|line| line.contains("LISTEN"))
        .map(|line| format!("{}\n", line))
        .collect()
}

/// Parse one line of lsof output
///
/// Format: `COMMAND PID USER FD TYPE DEVICE SIZE/OFF NODE NAME...`
///
/// The first eight columns are taken verbatim; every remaining token is
/// rejoined with single spaces to form NAME, which is how a name such as
/// `*:8080 (LISTEN)` survives tokenisation. Only the first non-blank line of
/// `output` is considered.
pub fn parse_lsof_line(output: &str) -> Result<SocketOrigin, LookupError> {
    let line = output
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or(LookupError::NoServiceFound)?;

    let tokens: Vec<&str> = line
        .split(' ')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.len() <= FIXED_COLUMNS {
        return Err(LookupError::NoServiceFound);
    }

    let pid = tokens[1]
        .parse::<i32>()
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| LookupError::MalformedPid(tokens[1].to_string()))?;

    Ok(SocketOrigin {
        command: tokens[0].to_string(),
        pid,
        user: tokens[2].to_string(),
        fd: tokens[3].to_string(),
        family: tokens[4].to_string(),
        device: tokens[5].to_string(),
        size_offset: tokens[6].to_string(),
        node: tokens[7].to_string(),
        name: tokens[FIXED_COLUMNS..].join(" "),
    })
}
