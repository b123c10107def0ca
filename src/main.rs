use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hivemind_policy::config::{LoggingConfig, PolicyServiceConfig};
use hivemind_policy::ratelimit::{
    Descriptor, EffectiveLimit, Limit, PolicyStore, RateLimitPolicy, RequestAttributes,
    MAX_STAGE_NUMBER,
};

#[derive(Parser, Debug)]
#[command(name = "hivemind-policy", version, about = "Rate limit descriptor generation")]
struct Cli {
    /// Service configuration file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a rate limit policy and report its stages
    Validate {
        /// Rate limit rules file
        policy: PathBuf,
    },
    /// Evaluate a request against a policy and print descriptors as JSON lines
    Evaluate {
        /// Rate limit rules file
        policy: PathBuf,
        /// Request attributes file
        request: PathBuf,
        /// Only evaluate this stage (all stages when omitted)
        #[arg(long)]
        stage: Option<u64>,
    },
    /// Keep reloading a policy file until interrupted
    Watch {
        /// Rate limit rules file (defaults to `policy.path` from the config)
        policy: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct DescriptorOutput<'a> {
    stage: u64,
    descriptor: &'a Descriptor,
    limit: Option<Limit>,
    limit_source: &'static str,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PolicyServiceConfig::from_file(path)
            .with_context(|| format!("failed to load service config {path}"))?,
        None => PolicyServiceConfig::default(),
    };
    init_tracing(&config.logging);

    match cli.command {
        Command::Validate { policy } => validate(&policy),
        Command::Evaluate {
            policy,
            request,
            stage,
        } => evaluate(&policy, &request, stage),
        Command::Watch { policy } => {
            let path = match policy.or_else(|| config.policy.path.clone().map(PathBuf::from)) {
                Some(path) => path,
                None => bail!("no policy file given and policy.path is not configured"),
            };
            watch(&path, &config).await
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let policy = RateLimitPolicy::from_file(path)
        .with_context(|| format!("invalid rate limit policy {}", path.display()))?;

    println!("{}: {} rate limit entries", path.display(), policy.len());
    for (stage, count) in policy.stage_counts().iter().enumerate() {
        if *count > 0 {
            println!("  stage {stage}: {count}");
        }
    }
    Ok(())
}

fn evaluate(policy_path: &Path, request_path: &Path, stage: Option<u64>) -> anyhow::Result<()> {
    let policy = RateLimitPolicy::from_file(policy_path)
        .with_context(|| format!("invalid rate limit policy {}", policy_path.display()))?;

    let contents = std::fs::read_to_string(request_path)
        .with_context(|| format!("failed to read {}", request_path.display()))?;
    let request: RequestAttributes = serde_yaml::from_str(&contents)
        .with_context(|| format!("invalid request attributes {}", request_path.display()))?;

    let stages = match stage {
        Some(stage) if stage > MAX_STAGE_NUMBER => {
            bail!("stage {stage} exceeds maximum stage number {MAX_STAGE_NUMBER}")
        }
        Some(stage) => stage..=stage,
        None => 0..=MAX_STAGE_NUMBER,
    };

    for stage in stages {
        for produced in policy.populate_descriptors(stage, &request) {
            let output = DescriptorOutput {
                stage,
                descriptor: &produced.descriptor,
                limit: produced.limit.limit(),
                limit_source: match produced.limit {
                    EffectiveLimit::Override(_) => "override",
                    EffectiveLimit::Static(_) => "static",
                    EffectiveLimit::Unspecified => "unspecified",
                },
            };
            println!("{}", serde_json::to_string(&output)?);
        }
    }
    Ok(())
}

async fn watch(path: &Path, config: &PolicyServiceConfig) -> anyhow::Result<()> {
    info!("Starting Hivemind policy watcher");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let store = PolicyStore::default();
    store
        .watch_file(path, config.policy.reload_interval(), shutdown_signal())
        .await;

    info!(
        generation = store.generation(),
        "Hivemind policy watcher stopped"
    );
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
