// Process enrichment: fill in a ProcessRecord from platform-specific sources
//
// Every enrichment step is best effort. A step that fails leaves its fields at
// their zero value and the remaining steps still run.

use crate::backends::command::CommandRunner;
use crate::config::Config;
use crate::process::ProcessRecord;
use anyhow::Result;
use std::rc::Rc;

pub mod ps;
pub mod socket_mapper;
pub mod state;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::LinuxEnricher;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub use macos::MacOSEnricher;

/// Platform-agnostic process enrichment interface
pub trait ProcessEnricher {
    /// Backend name (e.g., "procfs", "ps")
    fn name(&self) -> &'static str;

    /// Populate every enrichment field it can; never fails as a whole
    fn enrich(&self, record: &mut ProcessRecord);
}

/// Run one enrichment step, logging and discarding its error
pub(crate) fn best_effort<F>(pid: i32, step: &str, f: F)
where
    F: FnOnce() -> Result<()>,
{
    if let Err(e) = f() {
        log::debug!("PID {}: {} unavailable: {:#}", pid, step, e);
    }
}

/// Factory function to create the platform-specific enricher
pub fn create_enricher(config: &Config, runner: Rc<dyn CommandRunner>) -> Box<dyn ProcessEnricher> {
    #[cfg(target_os = "linux")]
    {
        let _ = runner;
        Box::new(LinuxEnricher::new(config.proc_root(), config.max_child_scan))
    }

    #[cfg(target_os = "macos")]
    {
        Box::new(MacOSEnricher::new(runner, config.lsof_binary.clone()))
    }
}
