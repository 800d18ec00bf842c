// Port lookup: turn a port number into the record of the process listening on it

mod lsof;

pub use lsof::{LsofExecutor, parse_lsof_line};

use crate::process::ProcessRecord;
use anyhow::{Context, Result};

/// Produces raw, line-oriented socket listing output for one port
pub trait PortExecutor {
    fn execute(&self, port: u16) -> Result<String>;
}

/// Executor + parser: the only stage whose failure ends the query
pub struct PortLookup {
    executor: Box<dyn PortExecutor>,
}

impl PortLookup {
    pub fn new(executor: Box<dyn PortExecutor>) -> Self {
        Self { executor }
    }

    /// Find the process listening on `port`
    ///
    /// A [`LookupError::NoServiceFound`](crate::error::LookupError) in the
    /// returned error chain means nothing is listening.
    pub fn process_by_port(&self, port: u16) -> Result<ProcessRecord> {
        let output = self
            .executor
            .execute(port)
            .context("failed to execute lsof")?;

        let origin = parse_lsof_line(&output).context("failed to parse lsof output")?;

        log::debug!(
            "Port {} is owned by {} (PID {})",
            port,
            origin.command,
            origin.pid
        );

        Ok(ProcessRecord::new(origin))
    }
}
