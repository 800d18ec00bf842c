// Container actions: stop and/or remove through the docker CLI

use super::ContainerRecord;
use crate::backends::command::CommandRunner;
use anyhow::{Context, Result};
use crossterm::style::Stylize;
use std::io::Write;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAction {
    Cancel,
    /// `docker stop`
    Stop,
    /// `docker stop` then `docker rm`
    StopAndRemove,
    /// `docker rm -f`
    Remove,
}

impl ContainerAction {
    /// Action implied by the `--kill` / `--term` flags, if any
    pub fn from_flags(kill: bool, term: bool) -> Option<Self> {
        if kill {
            Some(ContainerAction::StopAndRemove)
        } else if term {
            Some(ContainerAction::Stop)
        } else {
            None
        }
    }
}

pub struct ContainerActions {
    runner: Rc<dyn CommandRunner>,
    docker: String,
}

impl ContainerActions {
    pub fn new(runner: Rc<dyn CommandRunner>, docker: impl Into<String>) -> Self {
        Self {
            runner,
            docker: docker.into(),
        }
    }

    /// Carry out `action`, reporting progress on `out`
    pub fn execute<W: Write>(
        &self,
        action: ContainerAction,
        container: &ContainerRecord,
        out: &mut W,
    ) -> Result<()> {
        match action {
            ContainerAction::Cancel => Ok(()),
            ContainerAction::Stop => self.stop(container, out),
            ContainerAction::StopAndRemove => {
                self.stop(container, out)?;
                self.remove(container, false, out)
            }
            ContainerAction::Remove => self.remove(container, true, out),
        }
    }

    fn stop<W: Write>(&self, container: &ContainerRecord, out: &mut W) -> Result<()> {
        writeln!(out, "{}", format!("Stopping container {}...", container.name).cyan())?;

        self.runner
            .stdout(&self.docker, &["stop", &container.id])
            .context("failed to stop container")?;

        writeln!(
            out,
            "{}",
            format!("Container {} stopped", container.name).green()
        )?;
        Ok(())
    }

    fn remove<W: Write>(&self, container: &ContainerRecord, force: bool, out: &mut W) -> Result<()> {
        let verb = if force { "Force removing" } else { "Removing" };
        writeln!(out, "{}", format!("{} container {}...", verb, container.name).cyan())?;

        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        args.push(&container.id);

        self.runner
            .stdout(&self.docker, &args)
            .context("failed to remove container")?;

        writeln!(
            out,
            "{}",
            format!("Container {} removed", container.name).green()
        )?;
        Ok(())
    }
}
