//! Post-install verification: the smoke test.
//!
//! The only correctness signal after an install is that the entry point
//! starts and prints the expected text. Command execution sits behind the
//! [`CommandRunner`] trait so tests can script outputs without spawning
//! processes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
#[cfg(test)]
use mockall::automock;
use std::path::Path;

use crate::descriptor::VerificationSpec;
use crate::error::PipelineError;

/// Captured output of one command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Stdout and stderr together; the expected pattern may appear in either.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Executes a program and captures its output.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput>;
}

/// Real command runner backed by tokio::process.
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    #[tracing::instrument(skip(self))]
    async fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput> {
        debug!("Running {:?} {:?}", program, args);
        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to execute {:?}", program))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run a verification spec against an installed entry point.
#[tracing::instrument(skip(runner, spec))]
pub async fn run_check<C: CommandRunner + ?Sized>(
    runner: &C,
    package_name: &str,
    entry_point: &Path,
    spec: &VerificationSpec,
) -> Result<(), PipelineError> {
    let output = runner
        .run(entry_point, &spec.args)
        .await
        .map_err(|e| PipelineError::Verification {
            name: package_name.to_string(),
            reason: format!("{:#}", e),
        })?;

    if !output.success {
        warn!(
            "Verification command for '{}' exited unsuccessfully",
            package_name
        );
    }

    let combined = output.combined();
    if combined.contains(&spec.expect) {
        debug!("Verification output matched {:?}", spec.expect);
        Ok(())
    } else {
        Err(PipelineError::Verification {
            name: package_name.to_string(),
            reason: format!(
                "expected output to contain {:?}, got: {:?}",
                spec.expect,
                excerpt(&combined)
            ),
        })
    }
}

/// Bound the amount of captured output echoed back in an error message.
fn excerpt(output: &str) -> String {
    const MAX: usize = 200;
    if output.len() <= MAX {
        output.to_string()
    } else {
        let cut = output
            .char_indices()
            .take_while(|(i, _)| *i < MAX)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(MAX);
        format!("{}...", &output[..cut])
    }
}
