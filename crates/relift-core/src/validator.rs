//! External validation of candidate infrastructure documents.
//!
//! Validation runs two sub-checks in order: an initialization-style check
//! (provider/module resolution) and a structural validation check. Either
//! failing produces an `Invalid` verdict carrying the raw diagnostic text,
//! which the repair loop embeds into its follow-up prompt.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ReliftError, Result};

/// Which sub-check produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckPhase {
    /// Provider/module resolution (`terraform init`).
    Init,
    /// Structural validation (`terraform validate`).
    Structural,
}

impl std::fmt::Display for CheckPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Structural => write!(f, "validate"),
        }
    }
}

/// Outcome of one validation pass over a document pair.
#[derive(Debug, Clone)]
pub enum Verdict {
    Valid,
    Invalid {
        phase: CheckPhase,
        diagnostic: String,
    },
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Syntax/consistency check over a candidate document pair.
#[async_trait]
pub trait ConfigValidator: Send + Sync {
    /// Materialize `main` and `variables` to a scratch location and run the
    /// external checks against it.
    async fn validate(
        &self,
        main: &str,
        variables: &str,
        cancel: &CancellationToken,
    ) -> Result<Verdict>;
}

/// Production validator: shells out to the `terraform` CLI in a fresh
/// scratch directory per pass.
pub struct TerraformValidator {
    binary: String,
    command_timeout: Duration,
}

impl Default for TerraformValidator {
    fn default() -> Self {
        Self {
            binary: "terraform".into(),
            command_timeout: Duration::from_secs(120),
        }
    }
}

impl TerraformValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Run one terraform subcommand in `dir`, returning `Ok(None)` on
    /// success and `Ok(Some(diagnostic))` on a non-zero exit.
    async fn run(
        &self,
        args: &[&str],
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let mut command = Command::new(&self.binary);
        command.args(args).current_dir(dir).kill_on_drop(true);

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ReliftError::Cancelled(format!(
                    "{} {}", self.binary, args.join(" ")
                )));
            }
            output = tokio::time::timeout(self.command_timeout, command.output()) => {
                output.map_err(|_| {
                    std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!(
                            "{} {} timed out after {:?}",
                            self.binary,
                            args.join(" "),
                            self.command_timeout
                        ),
                    )
                })??
            }
        };

        if output.status.success() {
            return Ok(None);
        }

        let mut diagnostic = String::from_utf8_lossy(&output.stdout).into_owned();
        diagnostic.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(Some(diagnostic))
    }
}

#[async_trait]
impl ConfigValidator for TerraformValidator {
    async fn validate(
        &self,
        main: &str,
        variables: &str,
        cancel: &CancellationToken,
    ) -> Result<Verdict> {
        let scratch = tempfile::tempdir()?;
        tokio::fs::write(scratch.path().join("main.tf"), main).await?;
        tokio::fs::write(scratch.path().join("variables.tf"), variables).await?;

        if let Some(diagnostic) = self
            .run(&["init", "-input=false", "-no-color"], scratch.path(), cancel)
            .await?
        {
            debug!(phase = %CheckPhase::Init, "validation check failed");
            return Ok(Verdict::Invalid {
                phase: CheckPhase::Init,
                diagnostic,
            });
        }

        if let Some(diagnostic) = self
            .run(&["validate", "-json", "-no-color"], scratch.path(), cancel)
            .await?
        {
            debug!(phase = %CheckPhase::Structural, "validation check failed");
            return Ok(Verdict::Invalid {
                phase: CheckPhase::Structural,
                diagnostic,
            });
        }

        Ok(Verdict::Valid)
    }
}
