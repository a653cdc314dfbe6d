use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// Captured result of an external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CommandOutput {
    fn from_output(output: std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        }
    }

    pub fn into_result(self) -> Result<String> {
        if self.success {
            Ok(self.stdout)
        } else {
            anyhow::bail!("{}", self.stderr.trim())
        }
    }
}

/// Builder around `tokio::process::Command` with piped output.
pub struct CommandBuilder {
    program: String,
    command: Command,
    context_msg: Option<String>,
}

impl CommandBuilder {
    pub fn new(program: &str) -> Self {
        let mut command = Command::new(program);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Self {
            program: program.to_string(),
            command,
            context_msg: None,
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.command.arg(arg);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.command.args(args);
        self
    }

    /// Add `flag value` only when a value is present.
    pub fn opt_arg(self, flag: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) if !v.is_empty() => self.arg(flag).arg(v),
            _ => self,
        }
    }

    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.command.env(key, val);
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.command.current_dir(dir);
        self
    }

    pub fn context<S: Into<String>>(mut self, msg: S) -> Self {
        self.context_msg = Some(msg.into());
        self
    }

    pub async fn output(mut self) -> Result<CommandOutput> {
        debug!(program = %self.program, command = ?self.command.as_std(), "running");
        let ctx = self
            .context_msg
            .clone()
            .unwrap_or_else(|| format!("run {}", self.program));
        let output = self.command.output().await.context(ctx)?;
        Ok(CommandOutput::from_output(output))
    }

    /// Stdout on success, stderr as the error otherwise.
    pub async fn run(self) -> Result<String> {
        self.output().await?.into_result()
    }

    /// Feed `input` on stdin and capture the output.
    pub async fn output_with_stdin(mut self, input: &str) -> Result<CommandOutput> {
        use tokio::io::AsyncWriteExt;

        self.command.stdin(Stdio::piped());
        let mut child = self
            .command
            .spawn()
            .with_context(|| format!("spawn {}", self.program))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;
        Ok(CommandOutput::from_output(output))
    }

    /// Start without waiting. The child is killed when dropped.
    pub fn spawn(mut self) -> Result<Child> {
        debug!(program = %self.program, command = ?self.command.as_std(), "spawning");
        self.command.kill_on_drop(true);
        let ctx = self
            .context_msg
            .clone()
            .unwrap_or_else(|| format!("spawn {}", self.program));
        self.command.spawn().context(ctx)
    }

    /// Feed `input` on stdin and return stdout on success.
    pub async fn run_with_stdin(self, input: &str) -> Result<String> {
        self.output_with_stdin(input).await?.into_result()
    }
}

/// Find an executable on PATH.
pub fn find_in_path(tool: &str) -> Option<std::path::PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(tool))
        .find(|candidate| candidate.is_file())
}

pub fn require_tool(tool: &str, install_hint: &str) -> Result<std::path::PathBuf> {
    find_in_path(tool).ok_or_else(|| {
        anyhow::anyhow!("{} is not installed or not in PATH, {}", tool, install_hint)
    })
}
