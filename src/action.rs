// Process signalling and the interactive action prompts

use crate::backends::docker::{ContainerAction, ContainerRecord};
use crate::process::ProcessRecord;
use anyhow::{Context, Result};
use crossterm::style::Stylize;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, Write};

/// What to do with the process that owns the port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessAction {
    Cancel,
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

impl ProcessAction {
    /// Action implied by the `--kill` / `--term` flags, if any
    pub fn from_flags(kill: bool, term: bool) -> Option<Self> {
        if kill {
            Some(ProcessAction::Kill)
        } else if term {
            Some(ProcessAction::Terminate)
        } else {
            None
        }
    }

    pub fn signal(&self) -> Option<Signal> {
        match self {
            ProcessAction::Cancel => None,
            ProcessAction::Terminate => Some(Signal::SIGTERM),
            ProcessAction::Kill => Some(Signal::SIGKILL),
        }
    }
}

/// Send `sig` to `pid` after checking the process exists and is reachable
pub fn send_signal(pid: i32, sig: Signal) -> Result<()> {
    // 0 and negative PIDs address process groups
    anyhow::ensure!(pid > 0, "refusing to signal PID {}", pid);

    let target = Pid::from_raw(pid);

    signal::kill(target, None)
        .with_context(|| format!("process with PID {} does not exist or is not accessible", pid))?;

    signal::kill(target, sig).with_context(|| format!("failed to send {} to PID {}", sig, pid))?;

    log::info!("Sent {} to PID {}", sig, pid);
    Ok(())
}

/// Ask which signal to send; empty input or end of input cancels
pub fn prompt_process_action<R: BufRead, W: Write>(
    process: &ProcessRecord,
    input: &mut R,
    out: &mut W,
) -> Result<ProcessAction> {
    let title = format!(
        "Process {} ({}) - Select action:",
        process.pid, process.command
    );
    writeln!(out, "{}", title.bold().yellow())?;
    writeln!(out, "  [1] SIGTERM (15) - Graceful termination")?;
    writeln!(out, "  [2] SIGKILL (9)  - Force kill (cannot be caught)")?;
    writeln!(out, "  [3] Cancel")?;

    prompt_choice(input, out, "3", |choice| match choice {
        "1" => Some(ProcessAction::Terminate),
        "2" => Some(ProcessAction::Kill),
        "3" => Some(ProcessAction::Cancel),
        _ => None,
    })
    .map(|choice| choice.unwrap_or(ProcessAction::Cancel))
}

/// Ask what to do with a container; empty input or end of input cancels
pub fn prompt_container_action<R: BufRead, W: Write>(
    container: &ContainerRecord,
    input: &mut R,
    out: &mut W,
) -> Result<ContainerAction> {
    let title = format!(
        "Container {} ({}) - Select action:",
        container.name, container.short_id
    );
    writeln!(out, "{}", title.bold().yellow())?;
    writeln!(out, "  [1] Stop container (docker stop)")?;
    writeln!(out, "  [2] Stop and remove container (docker stop + docker rm)")?;
    writeln!(out, "  [3] Force remove running container (docker rm -f)")?;
    writeln!(out, "  [4] Cancel")?;

    prompt_choice(input, out, "4", |choice| match choice {
        "1" => Some(ContainerAction::Stop),
        "2" => Some(ContainerAction::StopAndRemove),
        "3" => Some(ContainerAction::Remove),
        "4" => Some(ContainerAction::Cancel),
        _ => None,
    })
    .map(|choice| choice.unwrap_or(ContainerAction::Cancel))
}

/// Read lines until `parse` accepts one; `None` at end of input
fn prompt_choice<R, W, T, F>(input: &mut R, out: &mut W, default: &str, parse: F) -> Result<Option<T>>
where
    R: BufRead,
    W: Write,
    F: Fn(&str) -> Option<T>,
{
    let prompt = format!("Choice [{}]:", default);
    write!(out, "{} ", prompt.as_str().bold())?;
    out.flush()?;

    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line).context("failed to read choice")? == 0 {
            writeln!(out)?;
            return Ok(None);
        }

        let choice = match line.trim() {
            "" => default,
            other => other,
        };

        if let Some(value) = parse(choice) {
            return Ok(Some(value));
        }

        writeln!(
            out,
            "{}",
            format!("Invalid choice. Please enter 1-{}.", default).yellow()
        )?;
        write!(out, "{} ", prompt.as_str().bold())?;
        out.flush()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn process() -> ProcessRecord {
        ProcessRecord {
            command: "node".to_string(),
            pid: 4242,
            ..Default::default()
        }
    }

    fn container() -> ContainerRecord {
        ContainerRecord {
            name: "web".to_string(),
            short_id: "8f3c2a1b9d0e".to_string(),
            ..Default::default()
        }
    }

    fn ask_process(input: &str) -> (ProcessAction, String) {
        let mut out = Vec::new();
        let action = prompt_process_action(&process(), &mut Cursor::new(input), &mut out).unwrap();
        (action, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_from_flags() {
        assert_eq!(ProcessAction::from_flags(true, false), Some(ProcessAction::Kill));
        assert_eq!(ProcessAction::from_flags(false, true), Some(ProcessAction::Terminate));
        assert_eq!(ProcessAction::from_flags(false, false), None);
    }

    #[test]
    fn test_signals() {
        assert_eq!(ProcessAction::Terminate.signal(), Some(Signal::SIGTERM));
        assert_eq!(ProcessAction::Kill.signal(), Some(Signal::SIGKILL));
        assert_eq!(ProcessAction::Cancel.signal(), None);
    }

    #[test]
    fn test_process_prompt_choices() {
        assert_eq!(ask_process("1\n").0, ProcessAction::Terminate);
        assert_eq!(ask_process("2\n").0, ProcessAction::Kill);
        assert_eq!(ask_process(" 3 \n").0, ProcessAction::Cancel);
    }

    #[test]
    fn test_process_prompt_defaults_to_cancel() {
        assert_eq!(ask_process("\n").0, ProcessAction::Cancel);
        assert_eq!(ask_process("").0, ProcessAction::Cancel);
    }

    #[test]
    fn test_process_prompt_reprompts_on_invalid_input() {
        let (action, output) = ask_process("9\nkill\n2\n");
        assert_eq!(action, ProcessAction::Kill);
        assert_eq!(output.matches("Invalid choice. Please enter 1-3.").count(), 2);
        assert!(output.contains("Process 4242 (node)"));
    }

    #[test]
    fn test_container_prompt() {
        let ask = |input: &str| {
            prompt_container_action(&container(), &mut Cursor::new(input), &mut Vec::new()).unwrap()
        };
        assert_eq!(ask("1\n"), ContainerAction::Stop);
        assert_eq!(ask("2\n"), ContainerAction::StopAndRemove);
        assert_eq!(ask("3\n"), ContainerAction::Remove);
        assert_eq!(ask("\n"), ContainerAction::Cancel);
        assert_eq!(ask("x\n4\n"), ContainerAction::Cancel);
        assert_eq!(ask(""), ContainerAction::Cancel);
    }

    #[test]
    fn test_send_signal_to_missing_process() {
        // PIDs are capped well below i32::MAX on every supported kernel
        assert!(send_signal(i32::MAX, Signal::SIGTERM).is_err());
    }

    #[test]
    fn test_send_signal_rejects_process_group_targets() {
        for pid in [0, -1, -42] {
            let err = send_signal(pid, Signal::SIGTERM).unwrap_err();
            assert!(err.to_string().contains("refusing to signal"));
        }
    }

    #[test]
    fn test_send_signal_terminates_child() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        send_signal(child.id() as i32, Signal::SIGTERM).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
