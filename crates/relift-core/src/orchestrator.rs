//! Orchestration: fan one pipeline out per application, fan results back
//! in keyed by application identity.
//!
//! Per app the pipeline is strictly sequential: translate → generate
//! Dockerfile → generate infrastructure configuration → validate-repair.
//! Across apps nothing is ordered; tasks share only the two admission
//! gates (rate budget, in-flight semaphore) and the fan-out ceiling.
//!
//! Failure policy: the run always waits for every task and always returns
//! whatever artifacts were produced, alongside the aggregated per-app
//! error list. One application's failure never aborts its siblings —
//! callers decide whether a partial result is acceptable.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactKind, GeneratedArtifact, InfraPair};
use crate::assets::{AppAssets, Assets};
use crate::client::ResilientClient;
use crate::config::PipelineConfig;
use crate::corpus::ReferenceCorpus;
use crate::descriptor::AppDescriptor;
use crate::generate::{self, ResponseFormat};
use crate::progress::{self, ProgressReporter};
use crate::repair::ValidateRepairLoop;
use crate::target;
use crate::validator::ConfigValidator;

/// One application's failure record: enough context for an operator to
/// retry that app without rerunning the batch (the matching artifacts in
/// `Assets` retain the last documents and prompts).
#[derive(Debug, Clone)]
pub struct AppFailure {
    pub app_name: String,
    pub error: String,
}

/// The generation-and-repair pipeline over a batch of applications.
pub struct Orchestrator {
    client: Arc<ResilientClient>,
    validator: Arc<dyn ConfigValidator>,
    corpus: Arc<ReferenceCorpus>,
    config: PipelineConfig,
    format: ResponseFormat,
}

struct AppOutcome {
    name: String,
    dockerfile: GeneratedArtifact,
    infra: InfraPair,
    error: Option<String>,
}

impl Orchestrator {
    /// The reference corpus is injected here — prompt context is explicit
    /// per-run configuration, never compiled-in state.
    pub fn new(
        client: Arc<ResilientClient>,
        validator: Arc<dyn ConfigValidator>,
        corpus: ReferenceCorpus,
        config: PipelineConfig,
    ) -> Self {
        Self {
            client,
            validator,
            corpus: Arc::new(corpus),
            config,
            format: ResponseFormat::default(),
        }
    }

    /// Select the infrastructure response contract (structured JSON by
    /// default; the legacy delimited tuple for compatibility).
    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    /// Process every app and return best-effort assets plus all per-app
    /// failures. Waits for every task; never aborts the batch for one app.
    pub async fn run(
        &self,
        apps: Vec<AppDescriptor>,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> (Assets, Vec<AppFailure>) {
        let total = apps.len();
        let names: Vec<String> = apps.iter().map(|app| app.name.clone()).collect();
        reporter.emit("processing configs", progress::PROCESSING);
        info!(total, destination = %self.config.destination, "starting migration run");

        // Fan-in channel sized to the app count: every task sends exactly
        // one outcome, so sends never block even if the drain runs late.
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<AppOutcome>(total.max(1));
        let ctx = Arc::new(TaskCtx {
            client: self.client.clone(),
            validator: self.validator.clone(),
            corpus: self.corpus.clone(),
            destination: self.config.destination.clone(),
            max_repair_iterations: self.config.max_repair_iterations,
            format: self.format,
            reporter: reporter.clone(),
            gate: Arc::new(Semaphore::new(self.config.max_parallel_apps.max(1))),
            dockerfiles_done: AtomicUsize::new(0),
            infra_done: AtomicUsize::new(0),
            total,
            cancel: cancel.clone(),
        });

        let mut tasks: JoinSet<()> = JoinSet::new();
        for descriptor in apps {
            let ctx = ctx.clone();
            let outcome_tx = outcome_tx.clone();
            tasks.spawn(async move {
                let outcome = process_app(ctx, descriptor).await;
                let _ = outcome_tx.send(outcome).await;
            });
        }
        drop(outcome_tx);

        // Wait-for-all barrier. A panicked task loses its outcome; the
        // missing slot is synthesized below so no app ever drops out of
        // the output collection.
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("app pipeline task aborted: {e}");
            }
        }

        let mut assets = Assets {
            readme: self.config.readme.clone(),
            apps: BTreeMap::new(),
        };
        let mut failures = Vec::new();
        while let Some(outcome) = outcome_rx.recv().await {
            if let Some(error) = outcome.error {
                failures.push(AppFailure {
                    app_name: outcome.name.clone(),
                    error,
                });
            }
            assets.apps.insert(
                outcome.name,
                AppAssets {
                    dockerfile: outcome.dockerfile,
                    infra: outcome.infra,
                },
            );
        }

        for name in &names {
            if !assets.apps.contains_key(name) {
                let message = "pipeline task aborted before producing a result";
                assets.apps.insert(name.clone(), failed_slot(name, message));
                failures.push(AppFailure {
                    app_name: name.clone(),
                    error: message.into(),
                });
            }
        }

        reporter.emit("infrastructure configurations generated", progress::INFRA_DONE);
        reporter.emit("completed", 1.0);
        info!(
            apps = assets.apps.len(),
            failures = failures.len(),
            "migration run finished"
        );
        (assets, failures)
    }
}

struct TaskCtx {
    client: Arc<ResilientClient>,
    validator: Arc<dyn ConfigValidator>,
    corpus: Arc<ReferenceCorpus>,
    destination: String,
    max_repair_iterations: u32,
    format: ResponseFormat,
    reporter: ProgressReporter,
    gate: Arc<Semaphore>,
    dockerfiles_done: AtomicUsize,
    infra_done: AtomicUsize,
    total: usize,
    cancel: CancellationToken,
}

/// A slot for an app whose pipeline never produced artifacts: every input
/// still yields exactly one terminal artifact set.
fn failed_slot(name: &str, message: &str) -> AppAssets {
    let mut dockerfile = GeneratedArtifact::new(name, ArtifactKind::Dockerfile);
    let _ = dockerfile.mark_failed(message);
    let mut infra = InfraPair::new(name);
    let _ = infra.main.mark_failed(message);
    let _ = infra.variables.mark_failed(message);
    AppAssets { dockerfile, infra }
}

async fn process_app(ctx: Arc<TaskCtx>, descriptor: AppDescriptor) -> AppOutcome {
    let name = descriptor.name.clone();
    let mut dockerfile = GeneratedArtifact::new(&name, ArtifactKind::Dockerfile);
    let mut infra = InfraPair::new(&name);

    let _slot = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            let message = "cancelled before processing started";
            let _ = dockerfile.mark_failed(message);
            let _ = infra.main.mark_failed(message);
            let _ = infra.variables.mark_failed(message);
            return AppOutcome { name, dockerfile, infra, error: Some(message.into()) };
        }
        permit = ctx.gate.acquire() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                let message = "fan-out gate closed";
                let _ = dockerfile.mark_failed(message);
                let _ = infra.main.mark_failed(message);
                let _ = infra.variables.mark_failed(message);
                return AppOutcome { name, dockerfile, infra, error: Some(message.into()) };
            }
        },
    };

    let spec = target::translate(&descriptor, &ctx.destination);
    debug!(app = %name, "translated to target description");

    match generate::generate_dockerfile(&ctx.client, &spec, &ctx.cancel).await {
        Ok(generated) => {
            let _ = dockerfile.set_content(generated.content, generated.prompt);
            let _ = dockerfile.mark_valid();
        }
        Err(e) => {
            let message = e.to_string();
            warn!(app = %name, "dockerfile generation failed: {message}");
            let _ = dockerfile.mark_failed(message.as_str());
            let skipped = "skipped: dockerfile generation failed";
            let _ = infra.main.mark_failed(skipped);
            let _ = infra.variables.mark_failed(skipped);
            return AppOutcome {
                name,
                dockerfile,
                infra,
                error: Some(message),
            };
        }
    }

    let done = ctx.dockerfiles_done.fetch_add(1, Ordering::SeqCst) + 1;
    ctx.reporter.emit(
        format!("app {done}/{} dockerfile generated", ctx.total),
        ProgressReporter::span_fraction(
            progress::PROCESSING,
            progress::DOCKERFILES_DONE,
            done,
            ctx.total,
        ),
    );

    match generate::generate_infra(&ctx.client, &spec, &ctx.corpus, ctx.format, &ctx.cancel).await
    {
        Ok(generated) => {
            let _ = infra.main.set_content(generated.main, generated.prompt.as_str());
            let _ = infra
                .variables
                .set_content(generated.variables, generated.prompt.as_str());
        }
        Err(e) => {
            let message = e.to_string();
            warn!(app = %name, "infrastructure generation failed: {message}");
            let _ = infra.main.mark_failed(message.as_str());
            let _ = infra.variables.mark_failed(message.as_str());
            finish_infra(&ctx);
            return AppOutcome {
                name,
                dockerfile,
                infra,
                error: Some(message),
            };
        }
    }

    let repair_loop = ValidateRepairLoop::new(
        &ctx.client,
        ctx.validator.as_ref(),
        ctx.max_repair_iterations,
    );
    let error = match repair_loop.run(&mut infra, &ctx.cancel).await {
        Ok(repairs) => {
            debug!(app = %name, repairs, "infrastructure configuration valid");
            None
        }
        Err(e) => {
            let message = e.to_string();
            warn!(app = %name, "infrastructure validation failed: {message}");
            Some(message)
        }
    };

    finish_infra(&ctx);
    AppOutcome {
        name,
        dockerfile,
        infra,
        error,
    }
}

fn finish_infra(ctx: &TaskCtx) {
    let done = ctx.infra_done.fetch_add(1, Ordering::SeqCst) + 1;
    ctx.reporter.emit(
        format!("app {done}/{} infrastructure configuration", ctx.total),
        ProgressReporter::span_fraction(
            progress::DOCKERFILES_DONE,
            progress::INFRA_DONE,
            done,
            ctx.total,
        ),
    );
}
