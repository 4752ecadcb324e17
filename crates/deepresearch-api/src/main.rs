use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use deepresearch_core::{
    write_bundle, ClaimVerifier, Config, ConfigLoader, DynEntailment, DynSearch, Executor,
    HdrpError, HttpEntailment, HttpSearch, Planner, Query, SimulatedSearch, StubCompletion,
    StubEntailment,
};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    signal,
    sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    entailment: DynEntailment,
    run_permits: Arc<Semaphore>,
    max_runs: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,deepresearch_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let addr: SocketAddr = std::env::var("DEEPRESEARCH_API_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()
        .expect("invalid DEEPRESEARCH_API_ADDR");

    let config = ConfigLoader::load(None)?;
    let entailment = build_entailment(&config);

    let run_limit = std::env::var("DEEPRESEARCH_MAX_CONCURRENT_RUNS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|limit| *limit > 0)
        .unwrap_or(5);

    let state = AppState {
        config: Arc::new(config),
        entailment,
        run_permits: Arc::new(Semaphore::new(run_limit)),
        max_runs: run_limit,
    };

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/execute", post(handle_execute))
        .with_state(state);

    info!("HDRP API listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<HdrpError> for AppError {
    fn from(error: HdrpError) -> Self {
        let status = match error {
            HdrpError::InvalidArgument(_) | HdrpError::Parse(_) => StatusCode::BAD_REQUEST,
            HdrpError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            HdrpError::ExternalUnavailable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, error.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, AppError>;

fn acquire_run_permit(state: &AppState) -> ApiResult<OwnedSemaphorePermit> {
    match state.run_permits.clone().try_acquire_owned() {
        Ok(permit) => Ok(permit),
        Err(TryAcquireError::NoPermits) => Err(AppError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "run capacity reached; retry once a slot frees up",
        )),
        Err(TryAcquireError::Closed) => Err(AppError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "executor unavailable",
        )),
    }
}

#[derive(Debug, Serialize)]
struct CapacityReport {
    max_runs: usize,
    available_runs: usize,
    active_runs: usize,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    capacity: CapacityReport,
}

fn capacity_report(state: &AppState) -> CapacityReport {
    let available = state.run_permits.available_permits();
    let active = state.max_runs.saturating_sub(available);
    CapacityReport {
        max_runs: state.max_runs,
        available_runs: available,
        active_runs: active,
    }
}

async fn handle_health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "ok",
        capacity: capacity_report(&state),
    }))
}

/// `ExecuteRequest` per ยง6: `{ query, provider, run_id? }`.
#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    query: String,
    provider: String,
    run_id: Option<String>,
}

/// `ExecuteResponse` per ยง6: status 200 even for logical failures, which
/// are surfaced via `success`/`error_message`. Transport failures (bad
/// input, capacity, unreachable collaborators) use 4xx/5xx instead.
#[derive(Debug, Serialize)]
struct ExecuteResponse {
    success: bool,
    run_id: String,
    report: String,
    error_message: String,
}

async fn handle_execute(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> ApiResult<Json<ExecuteResponse>> {
    let _permit = acquire_run_permit(&state)?;

    let run_id = request.run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let query = Query::new(request.query)?;

    let search = build_search(&state.config, &request.provider)?;
    let completion = Arc::new(StubCompletion::new());
    let verifier = Arc::new(ClaimVerifier::new(
        state.entailment.clone(),
        state.config.nli.clone(),
    ));
    let executor = Executor::new(
        search,
        verifier,
        state.config.executor.worker_pool_size,
        state.config.executor.run_deadline_secs,
        state.config.executor.top_k_results,
    );

    let planner = Planner::new(completion);
    let graph = planner.decompose(&query, &run_id).await;

    match executor.execute(graph, query.as_str(), &run_id).await {
        Ok(execution) => {
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

            Ok(Json(ExecuteResponse {
                success: true,
                run_id,
                report: execution.report.report,
                error_message: String::new(),
            }))
        }
        Err(err) => {
            warn!(run_id = %run_id, error = %err, "run failed");
            Ok(Json(ExecuteResponse {
                success: false,
                run_id,
                report: String::new(),
                error_message: err.to_string(),
            }))
        }
    }
}

fn build_search(config: &Config, provider: &str) -> ApiResult<DynSearch> {
    if provider == "simulated" {
        return Ok(Arc::new(SimulatedSearch::new()));
    }

    let endpoint = config.search.endpoint.clone().ok_or_else(|| {
        AppError::new(
            StatusCode::BAD_REQUEST,
            format!("search.endpoint must be configured for provider '{provider}'"),
        )
    })?;

    let api_key = config
        .search_api_key()
        .map_err(AppError::from)?
        .map(|secret| secret.expose().to_string());

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_limit_returns_429() {
        let state = AppState {
            config: Arc::new(Config::default()),
            entailment: Arc::new(StubEntailment::new()),
            run_permits: Arc::new(Semaphore::new(1)),
            max_runs: 1,
        };

        let permit = acquire_run_permit(&state).expect("first permit should succeed");
        let err = acquire_run_permit(&state).expect_err("second permit should fail");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        drop(permit);
    }

    #[test]
    fn unconfigured_endpoint_is_a_bad_request() {
        let config = Config::default();
        let err = build_search(&config, "google").expect_err("missing endpoint should error");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
