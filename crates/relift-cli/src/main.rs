use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relift_core::corpus::CorpusFetcher;
use relift_core::{
    progress, ClientConfig, GithubCorpusFetcher, HerokuSource, MessagesClient, Orchestrator,
    PipelineConfig, ProgressReporter, ReferenceCorpus, ResilientClient, ResponseFormat,
    SourceProvider, TerraformValidator,
};

#[derive(Parser)]
#[command(name = "relift", version, about = "Replatform PaaS applications with AI-generated deployment artifacts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate applications from a source platform to a destination cloud.
    Migrate(MigrateArgs),
}

#[derive(Args)]
struct MigrateArgs {
    /// Source platform (currently only "heroku").
    #[arg(short = 'f', long = "from")]
    from: String,

    /// Destination cloud provider.
    #[arg(short = 't', long = "to", value_parser = ["aws", "gcp", "scaleway"])]
    to: String,

    /// Output directory for generated files; prints to stdout when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write artifacts with their prompts as JSON for debugging.
    #[arg(long)]
    write_prompts: bool,

    /// Ask the generation service for the legacy "(main|||variables)"
    /// response instead of the structured JSON contract.
    #[arg(long)]
    delimited: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Migrate(args) => migrate(args).await,
    }
}

async fn migrate(args: MigrateArgs) -> Result<()> {
    if args.from != "heroku" {
        bail!("unsupported source platform {:?}; only \"heroku\" is supported", args.from);
    }

    let heroku_api_key =
        std::env::var("HEROKU_API_KEY").context("HEROKU_API_KEY must be set for a heroku source")?;
    let generation_api_key =
        std::env::var("ANTHROPIC_API_KEY").context("ANTHROPIC_API_KEY must be set")?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, unwinding in-flight work");
                cancel.cancel();
            }
        });
    }

    let (reporter, mut progress_stream) = ProgressReporter::channel();
    let progress_task = tokio::spawn(async move {
        while let Some(update) = progress_stream.recv().await {
            info!(
                stage = %update.stage,
                percent = (update.fraction * 100.0).round() as u32,
                "progress"
            );
        }
    });

    reporter.emit("fetching configs", 0.0);
    let source = HerokuSource::new(heroku_api_key);
    let apps = source.fetch_all().await?;
    reporter.emit("configs fetched", progress::FETCHED);
    info!(apps = apps.len(), "source applications fetched");

    let corpus = fetch_corpus().await;

    let client = Arc::new(ResilientClient::new(
        Arc::new(MessagesClient::new(generation_api_key)),
        ClientConfig::from_env(),
    ));
    let orchestrator = Orchestrator::new(
        client,
        Arc::new(TerraformValidator::new()),
        corpus,
        PipelineConfig {
            destination: args.to.clone(),
            readme: README.to_owned(),
            ..PipelineConfig::default()
        },
    )
    .with_response_format(if args.delimited {
        ResponseFormat::Delimited
    } else {
        ResponseFormat::Structured
    });

    let (assets, failures) = orchestrator.run(apps, &reporter, &cancel).await;
    drop(reporter);
    let _ = progress_task.await;

    for failure in &failures {
        warn!(app = %failure.app_name, "application failed: {}", failure.error);
    }

    match &args.output {
        Some(output_dir) => {
            assets.write_to(output_dir, args.write_prompts).await?;
            println!("Migration assets written to {}", output_dir.display());
        }
        None => render_to_stdout(&assets),
    }

    if !failures.is_empty() {
        bail!(
            "{} of {} application(s) failed; their artifacts carry the last \
             diagnostic and prompt for manual completion",
            failures.len(),
            assets.apps.len()
        );
    }
    Ok(())
}

/// Corpus repositories come from the environment so prompt context stays a
/// deployment decision: `RELIFT_EXAMPLES_REPO=owner/repo/dir` and
/// `RELIFT_PROVIDER_DOCS_REPO=owner/repo@branch`.
async fn fetch_corpus() -> ReferenceCorpus {
    let mut fetcher = GithubCorpusFetcher::new(std::env::var("GITHUB_TOKEN").ok());
    let mut configured = false;

    if let Ok(spec) = std::env::var("RELIFT_EXAMPLES_REPO") {
        let parts: Vec<&str> = spec.splitn(3, '/').collect();
        if parts.len() == 3 {
            fetcher = fetcher.with_example_source(parts[0], parts[1], parts[2]);
            configured = true;
        } else {
            warn!(%spec, "ignoring malformed RELIFT_EXAMPLES_REPO (want owner/repo/dir)");
        }
    }
    if let Ok(spec) = std::env::var("RELIFT_PROVIDER_DOCS_REPO") {
        if let Some((repo_part, branch)) = spec.split_once('@') {
            if let Some((owner, repo)) = repo_part.split_once('/') {
                fetcher = fetcher.with_doc_source(owner, repo, branch);
                configured = true;
            }
        } else {
            warn!(%spec, "ignoring malformed RELIFT_PROVIDER_DOCS_REPO (want owner/repo@branch)");
        }
    }

    if !configured {
        return ReferenceCorpus::default();
    }
    match fetcher.fetch().await {
        Ok(corpus) => corpus,
        Err(e) => {
            warn!("reference corpus unavailable, prompting without examples: {e}");
            ReferenceCorpus::default()
        }
    }
}

fn render_to_stdout(assets: &relift_core::Assets) {
    for (name, app) in &assets.apps {
        println!("=== {name} ===");
        println!("--- Dockerfile ---");
        println!("{}", app.dockerfile.content);
        println!("--- main.tf ---");
        println!("{}", app.infra.main.content);
        println!("--- variables.tf ---");
        println!("{}", app.infra.variables.content);
        println!();
    }
}

const README: &str = "\
# Migration output

Each application directory contains the generated Dockerfile and the
Terraform configuration pair (main.tf, variables.tf). Review every file
before applying: generated configuration is validated for syntax, not for
intent. Artifacts marked failed retain the last diagnostic and prompt in
artifacts_with_prompts.json (written with --write-prompts) so a single
application can be finished by hand without rerunning the batch.
";
