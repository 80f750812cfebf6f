//! Running external programs.

use super::ExecEnv;
use crate::errors::ExternalToolError;
use std::ffi::OsString;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

/// A single invocation of an external program.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    action: String,
    args: Vec<OsString>,
    stdin: Option<Vec<u8>>,
}

impl ToolCommand {
    /// Creates an invocation; `action` names it in errors and logs.
    #[must_use]
    pub fn new(program: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            action: action.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feeds `input` to the program's standard input.
    #[must_use]
    pub fn with_stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Returns the arguments.
    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Runs the program under `env`, failing on a nonzero exit status.
    pub async fn run(&self, env: &ExecEnv) -> Result<ToolOutput, ExternalToolError> {
        debug!(program = %self.program, action = %self.action, "running external tool");

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        env.apply(&mut command);

        let spawn_error =
            |err: std::io::Error| ExternalToolError::new(&self.program, &self.action, -1, &err.to_string());

        let mut child = command.spawn().map_err(spawn_error)?;
        if let (Some(input), Some(mut stdin)) = (&self.stdin, child.stdin.take()) {
            stdin.write_all(input).await.map_err(spawn_error)?;
            drop(stdin);
        }

        let output = child.wait_with_output().await.map_err(spawn_error)?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            Ok(ToolOutput { stdout, stderr })
        } else {
            let detail = if stderr.trim().is_empty() { &stdout } else { &stderr };
            Err(ExternalToolError::new(
                &self.program,
                &self.action,
                output.status.code().unwrap_or(-1),
                detail,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> ExecEnv {
        ExecEnv::new("/usr/local/bin:/usr/bin:/bin")
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let Ok(output) = ToolCommand::new("echo", "greet").arg("hello").run(&env()).await else {
            return;
        };
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_pipes_stdin() {
        let Ok(output) = ToolCommand::new("cat", "echo stdin")
            .with_stdin("from stdin")
            .run(&env())
            .await
        else {
            return;
        };
        assert_eq!(output.stdout, "from stdin");
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_error() {
        let err = ToolCommand::new("definitely-not-a-real-binary-xyz", "check version")
            .run(&env())
            .await
            .unwrap_err();
        assert_eq!(err.status, -1);
        assert_eq!(err.action, "check version");
    }

    #[test]
    fn test_builder_collects_args() {
        let command = ToolCommand::new("kubectl", "apply").args(["apply", "-f", "-"]).arg("--wait");
        assert_eq!(command.arguments().len(), 4);
    }
}
