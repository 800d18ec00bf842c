// Bounded external command execution
//
// Every lsof/ps/docker invocation goes through `CommandRunner` so that a hung
// tool cannot hang the whole query, and so tests can script the outputs.

use std::io;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::runtime::Runtime;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0} not found in PATH")]
    NotFound(String),

    #[error("{program} did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("{program} exited unsuccessfully: {stderr}")]
    Failed { program: String, stderr: String },

    #[error("failed to run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs external programs and captures their output
pub trait CommandRunner {
    /// Run `program` with `args`, returning its output whatever the exit status
    fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError>;

    /// Run `program` and return stdout, treating a non-zero exit as an error
    fn stdout(&self, program: &str, args: &[&str]) -> Result<String, CommandError> {
        let output = self.output(program, args)?;
        if !output.success {
            return Err(CommandError::Failed {
                program: program.to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// True when `program` runs and exits successfully
    fn succeeds(&self, program: &str, args: &[&str]) -> bool {
        self.output(program, args)
            .map(|o| o.success)
            .unwrap_or(false)
    }
}

/// Runs real processes, killing any that outlive the timeout
///
/// Owns a current-thread tokio runtime; each command is spawned with
/// `kill_on_drop`, so a command abandoned by the timeout is killed.
pub struct SystemCommandRunner {
    timeout: Duration,
    runtime: Runtime,
}

impl SystemCommandRunner {
    pub fn new(timeout: Duration) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self { timeout, runtime })
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null()).kill_on_drop(true);

        let output = match timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(|source| {
                if source.kind() == io::ErrorKind::NotFound {
                    CommandError::NotFound(program.to_string())
                } else {
                    CommandError::Io {
                        program: program.to_string(),
                        source,
                    }
                }
            })?,
            Err(_) => {
                return Err(CommandError::TimedOut {
                    program: program.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl CommandRunner for SystemCommandRunner {
    fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
        log::trace!("exec: {} {}", program, args.join(" "));
        self.runtime.block_on(self.run(program, args))
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// In-memory runner: returns canned stdout per command line and records calls
    #[derive(Default)]
    pub struct ScriptedRunner {
        responses: HashMap<String, CommandOutput>,
        calls: RefCell<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(mut self, command_line: &str, stdout: &str) -> Self {
            self.responses.insert(
                command_line.to_string(),
                CommandOutput {
                    success: true,
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                },
            );
            self
        }

        pub fn fail(mut self, command_line: &str, stderr: &str) -> Self {
            self.responses.insert(
                command_line.to_string(),
                CommandOutput {
                    success: false,
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                },
            );
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        pub fn was_called(&self, prefix: &str) -> bool {
            self.calls.borrow().iter().any(|c| c.starts_with(prefix))
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
            let mut line = program.to_string();
            for arg in args {
                line.push(' ');
                line.push_str(arg);
            }
            self.calls.borrow_mut().push(line.clone());

            self.responses
                .get(&line)
                .cloned()
                .ok_or(CommandError::NotFound(program.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_captures_stdout() {
        let runner = SystemCommandRunner::new(Duration::from_secs(5)).unwrap();
        let out = runner.stdout("echo", &["hello", "world"]).unwrap();
        assert_eq!(out.trim(), "hello world");
    }

    #[test]
    fn test_missing_binary() {
        let runner = SystemCommandRunner::new(Duration::from_secs(5)).unwrap();
        let err = runner
            .output("definitely-not-a-real-binary-whoseport", &[])
            .unwrap_err();
        assert!(matches!(err, CommandError::NotFound(_)));
    }

    #[test]
    fn test_non_zero_exit() {
        let runner = SystemCommandRunner::new(Duration::from_secs(5)).unwrap();
        let out = runner.output("false", &[]).unwrap();
        assert!(!out.success);
        assert!(matches!(
            runner.stdout("false", &[]),
            Err(CommandError::Failed { .. })
        ));
        assert!(!runner.succeeds("false", &[]));
        assert!(runner.succeeds("true", &[]));
    }

    #[test]
    fn test_timeout_kills_child() {
        let runner = SystemCommandRunner::new(Duration::from_millis(100)).unwrap();
        let started = Instant::now();
        let err = runner.output("sleep", &["5"]).unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
