//! Reference corpus: named example and documentation blobs appended to
//! generation prompts as static context.
//!
//! The corpus is fetched once per run and passed to the orchestrator as an
//! explicit configuration value — there is no compiled-in content.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ReliftError, Result};

/// One named text blob (an example configuration or a documentation page).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedDoc {
    pub name: String,
    pub content: String,
}

/// Static context for prompt construction. Treated as a constant input for
/// the duration of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceCorpus {
    /// Complete example configurations for the target provider.
    pub examples: Vec<NamedDoc>,
    /// Provider documentation pages (markdown).
    pub provider_docs: Vec<NamedDoc>,
}

impl ReferenceCorpus {
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty() && self.provider_docs.is_empty()
    }
}

/// Produces the reference corpus for a run.
#[async_trait]
pub trait CorpusFetcher: Send + Sync {
    async fn fetch(&self) -> Result<ReferenceCorpus>;
}

const GITHUB_API_ROOT: &str = "https://api.github.com";

/// Fetches examples and provider docs from GitHub repositories via the
/// contents API.
pub struct GithubCorpusFetcher {
    http: reqwest::Client,
    token: Option<String>,
    base_url: String,
    /// `(owner, repo, directory)` triples whose subdirectories each hold a
    /// `main.tf` example.
    example_sources: Vec<(String, String, String)>,
    /// `(owner, repo, branch)` whose `docs/` tree holds provider markdown.
    doc_source: Option<(String, String, String)>,
}

impl GithubCorpusFetcher {
    pub fn new(token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
            base_url: GITHUB_API_ROOT.into(),
            example_sources: Vec::new(),
            doc_source: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_example_source(
        mut self,
        owner: impl Into<String>,
        repo: impl Into<String>,
        directory: impl Into<String>,
    ) -> Self {
        self.example_sources
            .push((owner.into(), repo.into(), directory.into()));
        self
    }

    pub fn with_doc_source(
        mut self,
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        self.doc_source = Some((owner.into(), repo.into(), branch.into()));
        self
    }

    async fn get(&self, path: &str, accept: &str) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header("Accept", accept)
            .header("User-Agent", "relift");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        request
            .send()
            .await
            .map_err(|e| ReliftError::Corpus(format!("request to {path} failed: {e}")))
    }

    /// List a repository directory. Returns an empty list for missing paths.
    async fn list_dir(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Vec<Value>> {
        let mut api_path = format!("/repos/{owner}/{repo}/contents/{path}");
        if !git_ref.is_empty() {
            api_path.push_str(&format!("?ref={git_ref}"));
        }
        let response = self.get(&api_path, "application/vnd.github+json").await?;
        if response.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(ReliftError::Corpus(format!(
                "listing {api_path}: status {}",
                response.status()
            )));
        }
        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| ReliftError::Corpus(format!("decoding listing of {api_path}: {e}")))
    }

    /// Fetch one file's raw content. Returns `None` for missing files.
    async fn file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>> {
        let mut api_path = format!("/repos/{owner}/{repo}/contents/{path}");
        if !git_ref.is_empty() {
            api_path.push_str(&format!("?ref={git_ref}"));
        }
        let response = self.get(&api_path, "application/vnd.github.raw+json").await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ReliftError::Corpus(format!(
                "fetching {api_path}: status {}",
                response.status()
            )));
        }
        let text = response
            .text()
            .await
            .map_err(|e| ReliftError::Corpus(format!("reading {api_path}: {e}")))?;
        Ok(Some(text))
    }
}

#[async_trait]
impl CorpusFetcher for GithubCorpusFetcher {
    async fn fetch(&self) -> Result<ReferenceCorpus> {
        let mut corpus = ReferenceCorpus::default();

        for (owner, repo, directory) in &self.example_sources {
            let entries = self.list_dir(owner, repo, directory, "").await?;
            for entry in entries {
                if entry.get("type").and_then(Value::as_str) != Some("dir") {
                    continue;
                }
                let Some(name) = entry.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let example_path = format!("{directory}/{name}/main.tf");
                // Subdirectories without a main.tf are skipped, not errors.
                if let Some(content) =
                    self.file_content(owner, repo, &example_path, "").await?
                {
                    corpus.examples.push(NamedDoc {
                        name: name.to_owned(),
                        content,
                    });
                }
            }
        }

        if let Some((owner, repo, branch)) = &self.doc_source {
            for folder in ["", "data-sources", "resources"] {
                let path = if folder.is_empty() {
                    "docs".to_owned()
                } else {
                    format!("docs/{folder}")
                };
                for entry in self.list_dir(owner, repo, &path, branch).await? {
                    if entry.get("type").and_then(Value::as_str) != Some("file") {
                        continue;
                    }
                    let Some(name) = entry.get("name").and_then(Value::as_str) else {
                        continue;
                    };
                    if !name.ends_with(".md") {
                        continue;
                    }
                    let doc_path = format!("{path}/{name}");
                    if let Some(content) =
                        self.file_content(owner, repo, &doc_path, branch).await?
                    {
                        corpus.provider_docs.push(NamedDoc {
                            name: doc_path,
                            content,
                        });
                    }
                }
            }
        }

        debug!(
            examples = corpus.examples.len(),
            provider_docs = corpus.provider_docs.len(),
            "reference corpus fetched"
        );
        Ok(corpus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_corpus_reports_empty() {
        assert!(ReferenceCorpus::default().is_empty());
        let corpus = ReferenceCorpus {
            examples: vec![NamedDoc {
                name: "basic".into(),
                content: "provider {}".into(),
            }],
            provider_docs: Vec::new(),
        };
        assert!(!corpus.is_empty());
    }
}
