use anyhow::Context;
use clap::Parser;
use harvester_engine::backend::Backend;
use harvester_engine::config::{ConfigLoader, RunConfig};
use harvester_engine::context::RunContext;
use harvester_engine::controller::{RunController, RunError};
use harvester_engine::http::ReqwestClient;
use harvester_engine::storage::{FileKeyValueStore, JsonLinesDataset};
use harvester_h::ChromiumBackend;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "harvester",
    version,
    about = "Log in to a web app and export its CSV report"
)]
struct Args {
    /// Run input (YAML or JSON). Defaults to ./harvester.yaml or ~/.harvester/config.yaml
    #[arg(long)]
    input: Option<PathBuf>,

    /// Directory backing the key-value store and the run dataset
    #[arg(long, default_value = "./storage")]
    store_dir: PathBuf,

    /// Launch browser in visible mode (not headless)
    #[arg(long)]
    visible: bool,

    /// Override the number of whole-flow attempts
    #[arg(long)]
    max_retries: Option<u32>,

    /// Override the job identifier copied into the run record
    #[arg(long)]
    job_id: Option<String>,
}

async fn load_config(args: &Args) -> anyhow::Result<RunConfig> {
    let config = match &args.input {
        Some(path) => ConfigLoader::load_from(path)
            .await
            .with_context(|| format!("reading input {}", path.display()))?,
        None => ConfigLoader::load_default().await?,
    };
    let mut config = ConfigLoader::apply_env(config);
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(job_id) = &args.job_id {
        config.job_id = job_id.clone();
    }
    Ok(config)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args).await?;

    let store = Arc::new(FileKeyValueStore::new(args.store_dir.join("key_value_store")));
    let dataset = Arc::new(JsonLinesDataset::new(args.store_dir.join("dataset.jsonl")));
    let http = Arc::new(ReqwestClient::new()?);
    let ctx = RunContext::new(store, dataset, http);

    let visible = args.visible;
    let factory = move || -> Box<dyn Backend> {
        Box::new(ChromiumBackend::new_with_visibility(visible))
    };
    let controller = RunController::new(ctx, factory);

    match controller.run(&config).await {
        Ok(record) => {
            println!("{}", serde_json::to_string(&record)?);
            Ok(())
        }
        Err(e) => {
            let RunError::Exhausted { record, .. } = &e;
            println!("{}", serde_json::to_string(record)?);
            Err(e.into())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries the run record
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    // A run refused for missing credentials still exits 0; its record says why.
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Critical error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
