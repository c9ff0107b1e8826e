use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Failed to start `{command}`: {source}")]
    SpawnError {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {status}: {stderr}")]
    CommandError {
        command: String,
        status: i32,
        stderr: String,
    },
}

pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// stdout and stderr together, the way a terminal would show them.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr).trim().to_string()
    }
}

/// Runs processes on the local host.
#[derive(Debug, Default, Clone, Copy)]
pub struct Runner;

impl Runner {
    pub fn new() -> Self {
        Self
    }

    pub fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ExecError> {
        let command_line = display_command(program, args);
        debug!(command = %command_line, "running");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ExecError::SpawnError {
                command: command_line.clone(),
                source,
            })?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_status: output.status.code().unwrap_or(-1),
        };
        debug!(command = %command_line, status = result.exit_status, "finished");

        Ok(result)
    }

    /// Runs a command, failing on a non-zero exit status.
    pub fn run(&self, program: &str, args: &[&str]) -> Result<String, ExecError> {
        let output = self.output(program, args)?;
        Self::check(program, args, output)
    }

    fn check(program: &str, args: &[&str], output: CommandOutput) -> Result<String, ExecError> {
        if !output.success() {
            return Err(ExecError::CommandError {
                command: display_command(program, args),
                status: output.exit_status,
                stderr: output.combined(),
            });
        }
        Ok(output.stdout)
    }
}

fn display_command(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_captures_stdout() {
        let output = Runner::new().run("echo", &["hello"]).unwrap();
        assert_eq!(output.trim(), "hello");
    }

    #[test]
    fn test_non_zero_exit_is_error() {
        let err = Runner::new()
            .run("sh", &["-c", "echo broken >&2; exit 3"])
            .unwrap_err();
        match err {
            ExecError::CommandError { status, stderr, .. } => {
                assert_eq!(status, 3);
                assert!(stderr.contains("broken"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let err = Runner::new()
            .run("svp-definitely-not-a-command", &[])
            .unwrap_err();
        assert!(matches!(err, ExecError::SpawnError { .. }));
    }

    #[test]
    fn test_display_command() {
        assert_eq!(display_command("nginx", &["-t"]), "nginx -t");
    }
}
