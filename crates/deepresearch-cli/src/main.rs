use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use deepresearch_core::{
    write_bundle, ClaimVerifier, Config, ConfigLoader, DynEntailment, DynSearch, Executor,
    HttpEntailment, HttpSearch, Planner, Query, SimulatedSearch, StubCompletion, StubEntailment,
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Single entry point per ยง6: `--query --provider --output --verbose`.
#[derive(Parser, Debug)]
#[command(name = "hdrp", version, about = "Hierarchical Deep Research Planner")]
struct Cli {
    /// Natural-language research question.
    #[arg(long, value_name = "TEXT")]
    query: String,

    /// Search provider: simulated, google, tavily, ... (overrides
    /// SEARCH_PROVIDER and config.toml when given).
    #[arg(long)]
    provider: Option<String>,

    /// Write the markdown report to this path instead of stdout.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Raise the log level to debug.
    #[arg(long)]
    verbose: bool,
}

#[derive(Serialize)]
struct ExecuteResponse {
    success: bool,
    run_id: String,
    report: String,
    error_message: String,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let env_filter = if cli.verbose {
        EnvFilter::new("debug,deepresearch_core=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,deepresearch_core=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let response = rt.block_on(run(cli));

    if let Err(err) = emit(&response) {
        eprintln!("failed to emit response: {err}");
    }

    if response.success {
        std::process::ExitCode::SUCCESS
    } else {
        std::process::ExitCode::FAILURE
    }
}

async fn run(cli: Cli) -> ExecuteResponse {
    let run_id = Uuid::new_v4().to_string();

    let query = match Query::new(cli.query.clone()) {
        Ok(query) => query,
        Err(err) => return failure(run_id, err.to_string()),
    };

    let mut config = match ConfigLoader::load(None) {
        Ok(config) => config,
        Err(err) => return failure(run_id, err.to_string()),
    };
    apply_env_overrides(&mut config);
    if let Some(provider) = cli.provider.clone() {
        config.search.provider = provider;
    }

    let search = match build_search(&config) {
        Ok(search) => search,
        Err(err) => return failure(run_id, err),
    };
    let entailment = build_entailment(&config);
    let completion = Arc::new(StubCompletion::new());

    let planner = Planner::new(completion);
    let verifier = Arc::new(ClaimVerifier::new(entailment, config.nli.clone()));
    let executor = Executor::new(
        search,
        verifier,
        config.executor.worker_pool_size,
        config.executor.run_deadline_secs,
        config.executor.top_k_results,
    );

    info!(run_id = %run_id, provider = %config.search.provider, "starting run");

    let graph = planner.decompose(&query, &run_id).await;

    match executor.execute(graph, query.as_str(), &run_id).await {
        Ok(execution) => {
            write_report_output(cli.output.as_deref(), &execution.report.report);

            let report_title = format!("HDRP Research Report: {}", query.as_str());
            write_bundle(
                &run_id,
                query.as_str(),
                &report_title,
                &execution.report.report,
                &execution.report.sources,
                execution.claim_stats,
                true,
            );

            ExecuteResponse {
                success: true,
                run_id,
                report: execution.report.report,
                error_message: String::new(),
            }
        }
        Err(err) => {
            warn!(run_id = %run_id, error = %err, "run failed");
            failure(run_id, err.to_string())
        }
    }
}

fn failure(run_id: String, error_message: String) -> ExecuteResponse {
    ExecuteResponse {
        success: false,
        run_id,
        report: String::new(),
        error_message,
    }
}

fn write_report_output(output: Option<&std::path::Path>, report: &str) {
    match output {
        Some(path) => {
            if let Err(err) = std::fs::write(path, report) {
                warn!(path = %path.display(), error = %err, "failed to write report to output path");
                println!("{report}");
            }
        }
        None => println!("{report}"),
    }
}

fn emit(response: &ExecuteResponse) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}

fn build_search(config: &Config) -> Result<DynSearch, String> {
    if config.search.provider == "simulated" {
        return Ok(Arc::new(SimulatedSearch::new()));
    }

    let endpoint = config
        .search
        .endpoint
        .clone()
        .ok_or_else(|| format!("search.endpoint must be configured for provider '{}'", config.search.provider))?;

    let api_key = match config.search_api_key() {
        Ok(secret) => secret.map(|s| s.expose().to_string()),
        Err(err) => return Err(err.to_string()),
    };

    Ok(Arc::new(HttpSearch::new(
        endpoint,
        api_key,
        Duration::from_secs(config.search.timeout_secs),
    )))
}

fn build_entailment(config: &Config) -> DynEntailment {
    match &config.nli.endpoint {
        Some(endpoint) => Arc::new(HttpEntailment::new(
            endpoint.clone(),
            Duration::from_secs_f64(config.nli.timeout_secs),
        )),
        None => Arc::new(StubEntailment::new()),
    }
}

/// Overlay the ยง6 environment variables on top of the file-loaded config.
/// These names are the ones the spec's external interface contract
/// documents; they take precedence over `config.toml` and `HDRP_CONFIG`.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(provider) = std::env::var("SEARCH_PROVIDER") {
        if !provider.trim().is_empty() {
            config.search.provider = provider;
        }
    }
    if std::env::var("SEARCH_API_KEY").is_ok() {
        config.search.api_key_env = Some("SEARCH_API_KEY".to_string());
    }
    if let Ok(endpoint) = std::env::var("NLI_ENDPOINT") {
        if !endpoint.trim().is_empty() {
            config.nli.endpoint = Some(endpoint);
        }
    }
    if let Ok(timeout) = std::env::var("NLI_TIMEOUT_SECONDS") {
        if let Ok(timeout) = timeout.parse() {
            config.nli.timeout_secs = timeout;
        }
    }
    if let Ok(variant) = std::env::var("NLI_VARIANT_DEFAULT") {
        if !variant.trim().is_empty() {
            config.nli.variant_default = variant;
        }
    }
    if let Ok(deadline) = std::env::var("RUN_DEADLINE_SECONDS") {
        if let Ok(deadline) = deadline.parse() {
            config.executor.run_deadline_secs = deadline;
        }
    }
    if let Ok(pool_size) = std::env::var("WORKER_POOL_SIZE") {
        if let Ok(pool_size) = pool_size.parse() {
            config.executor.worker_pool_size = pool_size;
        }
    }
}
