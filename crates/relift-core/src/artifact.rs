//! Generated artifacts and their status lifecycle.
//!
//! An artifact is created `Pending`, mutated in place by repair iterations,
//! and frozen once it reaches a terminal status. The freeze is enforced
//! here, not left to caller discipline: `mark_valid` / `mark_failed` refuse
//! to move an artifact out of a terminal state, and `set_content` refuses
//! to rewrite frozen content.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which document this artifact is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Dockerfile,
    InfraMain,
    InfraVariables,
}

/// Lifecycle status. `Valid` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Pending,
    Valid,
    Failed { diagnostic: String },
}

impl ArtifactStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Attempted to mutate an artifact that already reached a terminal status.
#[derive(Debug, Clone, Error)]
#[error("artifact is already terminal ({status:?})")]
pub struct AlreadyTerminal {
    pub status: ArtifactStatus,
}

/// One produced document plus the context an operator needs to retry it by
/// hand: the most recent prompt and (on failure) the last diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub app_name: String,
    pub kind: ArtifactKind,
    pub content: String,
    /// Most recent prompt used to produce `content`; retained for
    /// diagnostics and manual re-runs.
    pub last_prompt: String,
    status: ArtifactStatus,
}

impl GeneratedArtifact {
    pub fn new(app_name: impl Into<String>, kind: ArtifactKind) -> Self {
        Self {
            app_name: app_name.into(),
            kind,
            content: String::new(),
            last_prompt: String::new(),
            status: ArtifactStatus::Pending,
        }
    }

    pub fn status(&self) -> &ArtifactStatus {
        &self.status
    }

    /// Overwrite content and remember the prompt that produced it. Only
    /// legal while the artifact is still `Pending`.
    pub fn set_content(
        &mut self,
        content: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Result<(), AlreadyTerminal> {
        self.ensure_pending()?;
        self.content = content.into();
        self.last_prompt = prompt.into();
        Ok(())
    }

    pub fn mark_valid(&mut self) -> Result<(), AlreadyTerminal> {
        self.ensure_pending()?;
        self.status = ArtifactStatus::Valid;
        Ok(())
    }

    pub fn mark_failed(&mut self, diagnostic: impl Into<String>) -> Result<(), AlreadyTerminal> {
        self.ensure_pending()?;
        self.status = ArtifactStatus::Failed {
            diagnostic: diagnostic.into(),
        };
        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), AlreadyTerminal> {
        if self.status.is_terminal() {
            return Err(AlreadyTerminal {
                status: self.status.clone(),
            });
        }
        Ok(())
    }
}

/// The main + variables infrastructure configuration pair for one app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraPair {
    pub main: GeneratedArtifact,
    pub variables: GeneratedArtifact,
}

impl InfraPair {
    pub fn new(app_name: &str) -> Self {
        Self {
            main: GeneratedArtifact::new(app_name, ArtifactKind::InfraMain),
            variables: GeneratedArtifact::new(app_name, ArtifactKind::InfraVariables),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.main.app_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_artifact_accepts_content_and_terminal_status() {
        let mut artifact = GeneratedArtifact::new("web", ArtifactKind::Dockerfile);
        artifact.set_content("FROM rust:1.79", "prompt-1").unwrap();
        assert_eq!(artifact.content, "FROM rust:1.79");
        assert_eq!(artifact.last_prompt, "prompt-1");

        artifact.mark_valid().unwrap();
        assert!(artifact.status().is_terminal());
    }

    #[test]
    fn terminal_artifact_is_frozen() {
        let mut artifact = GeneratedArtifact::new("web", ArtifactKind::InfraMain);
        artifact.set_content("resource {}", "p").unwrap();
        artifact.mark_failed("unexpected block").unwrap();

        assert!(artifact.set_content("other", "p2").is_err());
        assert!(artifact.mark_valid().is_err());
        assert!(artifact.mark_failed("again").is_err());
        assert_eq!(
            artifact.status(),
            &ArtifactStatus::Failed {
                diagnostic: "unexpected block".into()
            }
        );
        // Content from before the freeze survives for operator inspection.
        assert_eq!(artifact.content, "resource {}");
    }

    #[test]
    fn infra_pair_shares_app_identity() {
        let pair = InfraPair::new("billing-api");
        assert_eq!(pair.app_name(), "billing-api");
        assert_eq!(pair.main.kind, ArtifactKind::InfraMain);
        assert_eq!(pair.variables.kind, ArtifactKind::InfraVariables);
    }
}
