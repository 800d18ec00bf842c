// lsof-based socket mapper (macOS)
#![cfg_attr(not(target_os = "macos"), allow(dead_code))]

use super::{Protocol, SocketMapper};
use crate::backends::command::CommandRunner;
use anyhow::{Context, Result};
use std::rc::Rc;

/// Column holding the protocol keyword (NODE)
const NODE_COLUMN: usize = 7;

/// Socket mapper that asks `lsof` for the internet files of one PID
pub struct LsofSocketMapper {
    runner: Rc<dyn CommandRunner>,
    binary: String,
}

impl LsofSocketMapper {
    pub fn new(runner: Rc<dyn CommandRunner>, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
        }
    }
}

impl SocketMapper for LsofSocketMapper {
    fn name(&self) -> &'static str {
        "lsof"
    }

    fn connections(&self, pid: i32, protocol: Protocol) -> Result<Vec<String>> {
        // -a: AND the selectors, so only internet files of this PID
        let pid = pid.to_string();
        let output = self
            .runner
            .stdout(&self.binary, &["-a", "-i", "-n", "-P", "-p", &pid])
            .with_context(|| format!("{} could not list sockets of PID {}", self.binary, pid))?;

        Ok(filter_connections(&output, protocol))
    }
}

/// NAME column (plus any trailing `(STATE)`) of every row whose NODE starts
/// with the protocol keyword, in lsof's order
pub fn filter_connections(output: &str, protocol: Protocol) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() <= NODE_COLUMN + 1 {
                return None;
            }
            if !fields[NODE_COLUMN].starts_with(protocol.lsof_name()) {
                return None;
            }
            Some(fields[NODE_COLUMN + 1..].join(" "))
        })
        .collect()
}
