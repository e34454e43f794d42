//! Processor chain backed by an external command.
//!
//! One process per invocation. The request goes to stdin as JSON:
//! ```json
//! {"recipe": "com.example.munki.Firefox", "steps": [...], "inputs": {...}}
//! ```
//! and the command prints the output variables as a JSON object on stdout.
//!
//! Exit status 75 (`EX_TEMPFAIL`) marks a transient failure and 64
//! (`EX_USAGE`) bad arguments; any other non-zero status is a permanent
//! failure. Stderr becomes the error message.

use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::CommandConfig;
use crate::interfaces::{ProcessorChain, ProcessorError, ProcessorErrorKind};
use crate::model::{ProcessorStep, RecipeId, Variables};

pub const EXIT_TEMPFAIL: i32 = 75;
pub const EXIT_USAGE: i32 = 64;

#[derive(Serialize)]
struct Request<'a> {
    recipe: &'a RecipeId,
    steps: &'a [ProcessorStep],
    inputs: &'a Variables,
}

pub struct CommandProcessorChain {
    program: String,
    args: Vec<String>,
}

impl CommandProcessorChain {
    pub fn new(config: &CommandConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }

    fn classify_exit(code: Option<i32>) -> ProcessorErrorKind {
        match code {
            Some(EXIT_TEMPFAIL) => ProcessorErrorKind::Unavailable,
            Some(EXIT_USAGE) => ProcessorErrorKind::InvalidArguments,
            _ => ProcessorErrorKind::Failed,
        }
    }
}

#[async_trait]
impl ProcessorChain for CommandProcessorChain {
    async fn invoke(
        &self,
        recipe: &RecipeId,
        steps: &[ProcessorStep],
        inputs: &Variables,
    ) -> Result<Variables, ProcessorError> {
        let request = serde_json::to_vec(&Request {
            recipe,
            steps,
            inputs,
        })
        .map_err(|e| ProcessorError::new(ProcessorErrorKind::InvalidArguments, e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropped on executor timeout; take the process down with it.
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let kind = match e.kind() {
                    ErrorKind::NotFound | ErrorKind::PermissionDenied => ProcessorErrorKind::Failed,
                    _ => ProcessorErrorKind::Unavailable,
                };
                ProcessorError::new(kind, format!("failed to spawn '{}': {e}", self.program))
            })?;

        debug!(recipe = %recipe, program = %self.program, pid = ?child.id(), "Processor command started");

        let mut stdin = child.stdin.take().ok_or_else(|| {
            ProcessorError::new(ProcessorErrorKind::Unavailable, "processor stdin unavailable")
        })?;
        let write = async move {
            stdin.write_all(&request).await?;
            stdin.shutdown().await
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());

        let output = output
            .map_err(|e| ProcessorError::new(ProcessorErrorKind::Unavailable, e.to_string()))?;
        if let Err(e) = written {
            // Commands that never read stdin close the pipe early.
            if e.kind() != ErrorKind::BrokenPipe {
                warn!(recipe = %recipe, error = %e, "Failed to send request to processor");
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let kind = Self::classify_exit(output.status.code());
            let message = if stderr.is_empty() {
                format!("processor exited with {}", output.status)
            } else {
                stderr
            };
            return Err(ProcessorError::new(kind, message));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            ProcessorError::new(
                ProcessorErrorKind::InvalidOutput,
                format!("processor output is not a JSON object: {e}"),
            )
        })
    }
}
