//! External process execution for stage commands and toolchains.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Per-stream cap on captured output; the tail is kept.
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("cannot tokenize command: {0}")]
    Tokenize(#[from] shell_words::ParseError),

    #[error("empty command")]
    Empty,

    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    /// stdout followed by stderr.
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Working directory, environment and cancellation shared by one stage.
#[derive(Debug, Clone)]
pub struct ExecContext {
    cwd: PathBuf,
    env: Vec<(String, String)>,
    cancel: CancellationToken,
}

impl ExecContext {
    pub fn new(cwd: impl Into<PathBuf>, cancel: CancellationToken) -> Self {
        Self {
            cwd: cwd.into(),
            env: vec![("CI".to_string(), "true".to_string())],
            cancel,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Tokenize a command line (shell quoting rules, no shell) and run it.
    pub async fn run_line(&self, line: &str) -> Result<CommandOutput, CommandError> {
        let argv = shell_words::split(line)?;
        let (program, rest) = argv.split_first().ok_or(CommandError::Empty)?;
        let args: Vec<&str> = rest.iter().map(String::as_str).collect();
        self.run(program, &args, &[]).await
    }

    pub async fn run(
        &self,
        program: &str,
        args: &[&str],
        extra_env: &[(&str, String)],
    ) -> Result<CommandOutput, CommandError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        for (key, value) in extra_env {
            command.env(key, value);
        }

        let output = tokio::select! {
            result = command.output() => result.map_err(|source| CommandError::Spawn {
                program: program.to_string(),
                source,
            })?,
            _ = self.cancel.cancelled() => return Err(CommandError::Cancelled),
        };

        let mut combined = tail(&String::from_utf8_lossy(&output.stdout));
        let stderr = tail(&String::from_utf8_lossy(&output.stderr));
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        Ok(CommandOutput {
            // killed by a signal
            exit_code: output.status.code().unwrap_or(-1),
            output: combined,
        })
    }
}

fn tail(text: &str) -> String {
    if text.len() <= MAX_CAPTURE_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - MAX_CAPTURE_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...truncated...\n{}", &text[start..])
}
