//! The produced asset collection and its on-disk layout.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifact::{ArtifactStatus, GeneratedArtifact, InfraPair};
use crate::error::Result;

/// Everything generated for one application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppAssets {
    pub dockerfile: GeneratedArtifact,
    pub infra: InfraPair,
}

impl AppAssets {
    /// Whether every artifact for this app reached `Valid`.
    pub fn is_fully_valid(&self) -> bool {
        self.dockerfile.status() == &ArtifactStatus::Valid
            && self.infra.main.status() == &ArtifactStatus::Valid
            && self.infra.variables.status() == &ArtifactStatus::Valid
    }
}

/// The generated assets for a whole migration run, keyed by application
/// name. Ordered, so a run writes and serializes deterministically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Assets {
    pub readme: String,
    pub apps: BTreeMap<String, AppAssets>,
}

impl Assets {
    /// Write the asset tree under `output_dir`:
    ///
    /// ```text
    /// output_dir/
    ///   README.md
    ///   <app>/main.tf
    ///   <app>/variables.tf
    ///   <app>/Dockerfile
    ///   artifacts_with_prompts.json   (when write_prompts)
    /// ```
    pub async fn write_to(&self, output_dir: &Path, write_prompts: bool) -> Result<()> {
        tokio::fs::create_dir_all(output_dir).await?;
        tokio::fs::write(output_dir.join("README.md"), &self.readme).await?;

        for (name, assets) in &self.apps {
            let app_dir = output_dir.join(sanitize_app_name(name));
            tokio::fs::create_dir_all(&app_dir).await?;
            tokio::fs::write(app_dir.join("main.tf"), &assets.infra.main.content).await?;
            tokio::fs::write(
                app_dir.join("variables.tf"),
                &assets.infra.variables.content,
            )
            .await?;
            tokio::fs::write(app_dir.join("Dockerfile"), &assets.dockerfile.content).await?;
        }

        if write_prompts {
            let dump = serde_json::to_string_pretty(&self.apps)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            tokio::fs::write(output_dir.join("artifacts_with_prompts.json"), dump).await?;
        }

        info!(apps = self.apps.len(), dir = %output_dir.display(), "assets written");
        Ok(())
    }
}

/// Directory-safe app name: lowercase, spaces and dashes to underscores.
pub fn sanitize_app_name(name: &str) -> String {
    name.replace([' ', '-'], "_").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactKind;

    fn valid_app(name: &str) -> AppAssets {
        let mut dockerfile = GeneratedArtifact::new(name, ArtifactKind::Dockerfile);
        let _ = dockerfile.set_content("FROM scratch", "dockerfile prompt");
        let _ = dockerfile.mark_valid();
        let mut infra = InfraPair::new(name);
        let _ = infra.main.set_content("resource {}", "infra prompt");
        let _ = infra.variables.set_content("variable {}", "infra prompt");
        let _ = infra.main.mark_valid();
        let _ = infra.variables.mark_valid();
        AppAssets { dockerfile, infra }
    }

    #[test]
    fn sanitize_flattens_name() {
        assert_eq!(sanitize_app_name("My Billing-API"), "my_billing_api");
        assert_eq!(sanitize_app_name("plain"), "plain");
    }

    #[test]
    fn fully_valid_requires_all_three_artifacts() {
        let mut assets = valid_app("web");
        assert!(assets.is_fully_valid());

        assets = valid_app("web");
        // Rebuild with a failed infra main.
        let mut infra = InfraPair::new("web");
        let _ = infra.main.mark_failed("boom");
        let _ = infra.variables.mark_failed("boom");
        assets.infra = infra;
        assert!(!assets.is_fully_valid());
    }

    #[tokio::test]
    async fn write_to_lays_out_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let mut assets = Assets {
            readme: "# migration output\n".into(),
            apps: BTreeMap::new(),
        };
        assets.apps.insert("My App".into(), valid_app("My App"));

        assets.write_to(dir.path(), true).await.unwrap();

        let readme = std::fs::read_to_string(dir.path().join("README.md")).unwrap();
        assert_eq!(readme, "# migration output\n");
        let main = std::fs::read_to_string(dir.path().join("my_app/main.tf")).unwrap();
        assert_eq!(main, "resource {}");
        let dockerfile = std::fs::read_to_string(dir.path().join("my_app/Dockerfile")).unwrap();
        assert_eq!(dockerfile, "FROM scratch");

        let dump =
            std::fs::read_to_string(dir.path().join("artifacts_with_prompts.json")).unwrap();
        assert!(dump.contains("dockerfile prompt"));
    }
}
