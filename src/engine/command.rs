//! External command execution for transforms and quality gates

use crate::config::ENV_WAREHOUSE;
use crate::error::{Error, Result};
use crate::warehouse::Warehouse;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Bytes of stdout/stderr kept for reports
const OUTPUT_TAIL_BYTES: usize = 2048;

/// Program, arguments and environment of an external step
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    /// Program to run
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables
    pub env: HashMap<String, String>,
}

/// Exit status and captured output of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal
    pub code: Option<i32>,
    /// Whether the command exited with status 0
    pub success: bool,
    /// Last bytes of stdout
    pub stdout: String,
    /// Last bytes of stderr
    pub stderr: String,
}

impl CommandSpec {
    /// Command line for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the command with the warehouse detached so the child can open it.
    ///
    /// The warehouse is reattached whether or not the command succeeds.
    pub async fn run_detached(&self, warehouse: &Warehouse) -> Result<CommandOutput> {
        warehouse.detach()?;
        let output = self.run(warehouse).await;
        warehouse.reattach()?;
        output
    }

    async fn run(&self, warehouse: &Warehouse) -> Result<CommandOutput> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = warehouse.path() {
            command.env(ENV_WAREHOUSE, path);
        }
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        tracing::info!(command = %self.display(), "Running external command");
        let output = command
            .output()
            .await
            .map_err(|e| Error::command(self.display(), format!("failed to start: {e}")))?;

        Ok(CommandOutput {
            code: output.status.code(),
            success: output.status.success(),
            stdout: tail(&output.stdout),
            stderr: tail(&output.stderr),
        })
    }
}

impl CommandOutput {
    /// One-line description of a failed run
    pub fn failure_summary(&self) -> String {
        let status = self
            .code
            .map_or_else(|| "signal".to_string(), |code| code.to_string());
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        format!("exit status {status}: {detail}")
    }
}

fn tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(OUTPUT_TAIL_BYTES);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}
