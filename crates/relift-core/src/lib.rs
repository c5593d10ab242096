//! relift-core — concurrent generation-and-repair pipeline for
//! PaaS-to-cloud replatforming.
//!
//! The pipeline turns a list of application descriptions into deployment
//! artifacts (Dockerfiles, infrastructure configuration) by delegating
//! content synthesis to a generative text-completion service, then
//! mechanically validating and repairing the result:
//!
//! ```text
//! [AppDescriptor] → Orchestrator → (parallel per-app pipelines) → Assets
//!                        │
//!                        ├─ ResilientClient (rate budget + retry + backoff)
//!                        ├─ generators (dockerfile, infra pair)
//!                        └─ ValidateRepairLoop (external checker ⇄ repair)
//! ```
//!
//! External collaborators are traits: [`service::GenerationService`],
//! [`validator::ConfigValidator`], [`sources::SourceProvider`], and
//! [`corpus::CorpusFetcher`], each with one production implementation.

pub mod artifact;
pub mod assets;
pub mod client;
pub mod config;
pub mod corpus;
pub mod descriptor;
pub mod error;
pub mod generate;
pub mod limiter;
pub mod orchestrator;
pub mod progress;
pub mod prompts;
pub mod repair;
pub mod service;
pub mod sources;
pub mod target;
pub mod validator;

pub use artifact::{ArtifactKind, ArtifactStatus, GeneratedArtifact, InfraPair};
pub use assets::{AppAssets, Assets};
pub use client::ResilientClient;
pub use config::{ClientConfig, PipelineConfig};
pub use corpus::{CorpusFetcher, GithubCorpusFetcher, ReferenceCorpus};
pub use descriptor::AppDescriptor;
pub use error::{ReliftError, Result};
pub use generate::ResponseFormat;
pub use orchestrator::{AppFailure, Orchestrator};
pub use progress::{ProgressReporter, ProgressUpdate};
pub use service::{GenerationService, MessagesClient};
pub use sources::{HerokuSource, SourceProvider};
pub use validator::{ConfigValidator, TerraformValidator};
