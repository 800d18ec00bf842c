mod action;
mod backends;
mod config;
mod display;
mod error;
mod process;

use anyhow::Result;
use clap::Parser;
use crossterm::style::Stylize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use crate::action::ProcessAction;
use crate::backends::Platform;
use crate::backends::command::{CommandRunner, SystemCommandRunner};
use crate::backends::docker::{
    ContainerAction, ContainerActions, ContainerDetector, ContainerRecord, ContainerRetriever,
};
use crate::backends::lookup::{LsofExecutor, PortLookup};
use crate::backends::process::create_enricher;
use crate::config::Config;
use crate::error::LookupError;
use crate::process::ProcessRecord;

#[derive(Parser, Debug)]
#[command(name = "whoseport")]
#[command(version = "0.3.0")]
#[command(about = "Show which process (or Docker container) owns a listening port", long_about = None)]
struct Args {
    /// Port to inspect
    #[arg(required_unless_present = "save_config")]
    port: Option<u16>,

    /// SIGKILL the process, or stop and remove its container
    #[arg(short = 'k', long, conflicts_with = "term")]
    kill: bool,

    /// SIGTERM the process, or stop its container
    #[arg(short = 't', long)]
    term: bool,

    /// Show the report only, never prompt for an action
    #[arg(short = 'n', long)]
    no_interactive: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Skip container detection
    #[arg(long)]
    no_docker: bool,

    /// Timeout for each external command
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Read process details from this proc mount instead of /proc
    #[arg(long, value_name = "PATH")]
    proc_root: Option<PathBuf>,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    save_config: bool,
}

impl Args {
    /// Fold command-line overrides into the loaded configuration
    fn apply_to(&self, config: &mut Config) {
        if let Some(timeout) = self.timeout {
            config.command_timeout_secs = timeout;
        }
        if let Some(ref root) = self.proc_root {
            config.proc_root = Some(root.clone());
        }
        if self.no_interactive {
            config.interactive = false;
        }
    }

    /// Prompting only makes sense for the colored report without a preset action
    fn should_prompt(&self, config: &Config) -> bool {
        config.interactive && !self.json && !self.kill && !self.term
    }
}

fn main() -> ExitCode {
    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::formatted_builder()
            .parse_default_env()
            .init();
    }

    let args = Args::parse();

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ExitCode> {
    let mut config = Config::load().unwrap_or_else(|e| {
        log::warn!("Ignoring unreadable config file: {:#}", e);
        Config::default()
    });
    args.apply_to(&mut config);

    if args.save_config {
        let path = config.save()?;
        println!("Saved configuration to {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let Some(port) = args.port else {
        anyhow::bail!("missing port number");
    };

    log::debug!("Platform: {:?}", Platform::current());

    let runner: Rc<dyn CommandRunner> = 
        Rc::new(SystemCommandRunner::new(config.command_timeout())?);

    let lookup = PortLookup::new(Box::new(LsofExecutor::new(
        runner.clone(),
        config.lsof_binary.clone(),
    )));

    let mut record = match lookup.process_by_port(port) {
        Ok(record) => record,
        Err(e) if LookupError::is_no_service(&e) => {
            eprintln!("No process is listening on port {}", port);
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e),
    };

    let enricher = create_enricher(&config, runner.clone());
    log::debug!("Using process enricher backend: {}", enricher.name());
    enricher.enrich(&mut record);

    if !args.no_docker {
        if let Some(container) = find_container(&config, runner.clone(), &record, port)? {
            return handle_container(args, &config, runner, &record, &container, port);
        }
    }

    handle_process(args, &config, &record, port)
}

/// Detect and describe the container behind `record`, if any
fn find_container(
    config: &Config,
    runner: Rc<dyn CommandRunner>,
    record: &ProcessRecord,
    port: u16,
) -> Result<Option<ContainerRecord>> {
    let detector = ContainerDetector::new(
        runner.clone(),
        config.docker_binary.clone(),
        config.proc_root(),
        config.max_container_inspections,
    )?;

    let detection = detector.detect(record, port);
    log::debug!(
        "Container detection tried {:?}, matched by {:?}",
        detection.attempted,
        detection.strategy
    );

    let Some(container_id) = detection.container_id else {
        return Ok(None);
    };

    let retriever = ContainerRetriever::new(runner, config.docker_binary.clone());
    match retriever.retrieve(&container_id, record) {
        Ok(container) => Ok(Some(container)),
        Err(e) => {
            eprintln!(
                "{} Failed to retrieve container info: {:#}",
                "error:".red(),
                e
            );
            Ok(None)
        }
    }
}

fn handle_container(
    args: &Args,
    config: &Config,
    runner: Rc<dyn CommandRunner>,
    record: &ProcessRecord,
    container: &ContainerRecord,
    port: u16,
) -> Result<ExitCode> {
    let mut stdout = io::stdout().lock();

    if args.json {
        display::write_json(record, Some(container), &mut stdout)?;
    } else {
        display::write_container_report(container, port, &mut stdout)?;
    }

    let action = match ContainerAction::from_flags(args.kill, args.term) {
        Some(action) => action,
        None if args.should_prompt(config) => {
            action::prompt_container_action(container, &mut io::stdin().lock(), &mut stdout)?
        }
        None => ContainerAction::Cancel,
    };

    let actions = ContainerActions::new(runner, config.docker_binary.clone());
    if let Err(e) = actions.execute(action, container, &mut stdout) {
        writeln!(stdout, "{} {:#}", "✗ Failed to execute action:".red(), e)?;
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}

fn handle_process(
    args: &Args,
    config: &Config,
    record: &ProcessRecord,
    port: u16,
) -> Result<ExitCode> {
    let mut stdout = io::stdout().lock();

    if args.json {
        display::write_json(record, None, &mut stdout)?;
    } else {
        display::write_process_report(record, port, &mut stdout)?;
    }

    let action = match ProcessAction::from_flags(args.kill, args.term) {
        Some(action) => action,
        None if args.should_prompt(config) => {
            action::prompt_process_action(record, &mut io::stdin().lock(), &mut stdout)?
        }
        None => ProcessAction::Cancel,
    };

    let Some(signal) = action.signal() else {
        return Ok(ExitCode::SUCCESS);
    };

    match action::send_signal(record.pid, signal) {
        Ok(()) => {
            let message = format!("✓ Sent {} to process {}", signal, record.pid);
            writeln!(stdout, "{}", message.green())?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            writeln!(stdout, "{} {:#}", "✗ Failed to signal process:".red(), e)?;
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kill_and_term_conflict() {
        assert!(Args::try_parse_from(["whoseport", "-k", "-t", "8080"]).is_err());
    }

    #[test]
    fn test_port_required_unless_saving_config() {
        assert!(Args::try_parse_from(["whoseport"]).is_err());
        assert!(Args::try_parse_from(["whoseport", "--save-config"]).is_ok());
        assert!(Args::try_parse_from(["whoseport", "70000"]).is_err());
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let args = Args::try_parse_from([
            "whoseport",
            "-n",
            "--timeout",
            "9",
            "--proc-root",
            "/host/proc",
            "8080",
        ])
        .unwrap();

        let mut config = Config::default();
        args.apply_to(&mut config);

        assert_eq!(args.port, Some(8080));
        assert_eq!(config.command_timeout_secs, 9);
        assert_eq!(config.proc_root, Some(PathBuf::from("/host/proc")));
        assert!(!config.interactive);
    }

    #[test]
    fn test_should_prompt() {
        let config = Config::default();
        let parse = |argv: &[&str]| Args::try_parse_from(argv).unwrap();

        assert!(parse(&["whoseport", "8080"]).should_prompt(&config));
        assert!(!parse(&["whoseport", "--json", "8080"]).should_prompt(&config));
        assert!(!parse(&["whoseport", "-t", "8080"]).should_prompt(&config));

        let quiet = Config {
            interactive: false,
            ..Config::default()
        };
        assert!(!parse(&["whoseport", "8080"]).should_prompt(&quiet));
    }
}
