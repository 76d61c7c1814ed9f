//! HTTP surface.
//!
//! # Endpoints
//!
//! | Method | Path | Auth header | Description |
//! |--------|------|-------------|-------------|
//! | `GET`  | `/health` | none | Health check (service and version) |
//! | `POST` | `/v1/agents/run` | `x-agent-runtime-secret` | Grounded agent answer |
//! | `POST` | `/internal/cron/sync-daily` | `x-cron-secret` | Daily provider sync |
//! | `POST` | `/internal/cron/weekly-reports` | `x-cron-secret` | Weekly report job |
//! | `POST` | `/intelligence/generate` | `x-intel-api-key` | Insight generation |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unauthorized", "message": "Invalid cron secret" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `internal` (500),
//! `bad_gateway` (502), `not_configured` (503).
//!
//! Secrets are checked before the body is parsed. A secret that is not set
//! in the environment turns its endpoints into 503s.

use anyhow::bail;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_http::cors::{Any, CorsLayer};

use crate::agent::AgentRuntime;
use crate::answer::VerifiedAnswer;
use crate::callback::RunNotifier;
use crate::config::{Config, Secrets};
use crate::db;
use crate::intelligence::{
    generate_insight, InsightRequest, InsightResult, ERR_LLM_FAILED, ERR_NONE_SELECTED,
    ERR_NO_SIGNALS, ERR_PERIOD_ORDER,
};
use crate::llm::{JsonCompleter, OpenAiClient, UnconfiguredCompleter};
use crate::lock::{JobLock, SqliteJobLock};
use crate::migrate;
use crate::models::AgentRunInput;
use crate::providers::{Ga4Provider, MetricsProvider};
use crate::report::{run_weekly_reports, WeeklyReportsOutcome, WeeklyReportsRequest};
use crate::retrieve::SqliteRetriever;
use crate::sync::{run_sync_daily, SyncOutcome, SyncRequest};

pub const AGENT_SECRET_HEADER: &str = "x-agent-runtime-secret";
pub const CRON_SECRET_HEADER: &str = "x-cron-secret";
pub const INTEL_KEY_HEADER: &str = "x-intel-api-key";

/// Local frontend origin always allowed by CORS.
const DEV_ORIGIN: &str = "http://localhost:3000";

/// Shared state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub secrets: Arc<Secrets>,
    pub pool: SqlitePool,
    pub agent: Arc<AgentRuntime>,
    pub llm: Arc<dyn JsonCompleter>,
    pub lock: Arc<dyn JobLock>,
    pub providers: Arc<Vec<Arc<dyn MetricsProvider>>>,
}

impl AppState {
    /// Wires the components around an open pool and a model client.
    pub fn new(
        config: Config,
        secrets: Secrets,
        pool: SqlitePool,
        llm: Arc<dyn JsonCompleter>,
        providers: Vec<Arc<dyn MetricsProvider>>,
    ) -> anyhow::Result<Self> {
        let notifier = Arc::new(RunNotifier::new(&secrets, &config.callback)?);
        let retriever = Arc::new(SqliteRetriever::new(pool.clone(), config.retrieval.clone()));
        let agent = Arc::new(AgentRuntime::new(&config, retriever, llm.clone(), notifier));
        let lock = Arc::new(SqliteJobLock::new(pool.clone(), config.jobs.lock_ttl_secs));

        Ok(Self {
            config: Arc::new(config),
            secrets: Arc::new(secrets),
            pool,
            agent,
            llm,
            lock,
            providers: Arc::new(providers),
        })
    }

    /// Production wiring: opens the database and builds the upstream clients.
    pub async fn connect(config: &Config, secrets: &Secrets) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;

        let llm = build_llm(config, secrets)?;
        let providers: Vec<Arc<dyn MetricsProvider>> =
            vec![Arc::new(Ga4Provider::new(&config.providers, secrets)?)];

        Self::new(config.clone(), secrets.clone(), pool, llm, providers)
    }
}

/// OpenAI client when a key is set, otherwise a completer that always fails.
pub fn build_llm(config: &Config, secrets: &Secrets) -> anyhow::Result<Arc<dyn JsonCompleter>> {
    Ok(match &secrets.openai_api_key {
        Some(key) => Arc::new(OpenAiClient::new(&config.llm, key)?),
        None => Arc::new(UnconfiguredCompleter),
    })
}

pub fn build_router(state: AppState) -> Router {
    let mut origins = vec![HeaderValue::from_static(DEV_ORIGIN)];
    if let Some(origin) = &state.config.server.frontend_origin {
        match HeaderValue::from_str(origin) {
            Ok(v) => origins.push(v),
            Err(_) => tracing::warn!(origin = %origin, "ignoring invalid frontend origin"),
        }
    }
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/v1/agents/run", post(handle_agent_run))
        .route("/internal/cron/sync-daily", post(handle_sync_daily))
        .route("/internal/cron/weekly-reports", post(handle_weekly_reports))
        .route("/intelligence/generate", post(handle_generate_insight))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`.
///
/// Fails before binding when `AGENT_RUNTIME_SECRET` is not set.
pub async fn run_server(config: &Config, secrets: &Secrets) -> anyhow::Result<()> {
    if secrets.agent_runtime_secret.is_none() {
        bail!("AGENT_RUNTIME_SECRET must be set to serve");
    }
    for warning in secrets.warnings() {
        tracing::warn!("{}", warning);
    }

    let state = AppState::connect(config, secrets).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "bureau runtime listening");
    println!("Listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

fn not_configured(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::SERVICE_UNAVAILABLE, "not_configured", message)
}

/// Internal failures are logged in full and reported without detail.
fn internal(context: &str, err: anyhow::Error) -> AppError {
    tracing::error!(error = %err, "{}", context);
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", context.to_string())
}

fn classify_insight_error(err: anyhow::Error) -> AppError {
    let msg = err.to_string();
    if [ERR_PERIOD_ORDER, ERR_NO_SIGNALS, ERR_NONE_SELECTED].contains(&msg.as_str()) {
        bad_request(msg)
    } else if msg == ERR_LLM_FAILED {
        AppError::new(StatusCode::BAD_GATEWAY, "bad_gateway", msg)
    } else {
        internal("insight generation failed", err)
    }
}

// ============ Auth ============

/// Checks `header` against the configured secret in constant time.
fn require_secret(
    headers: &HeaderMap,
    header: &str,
    expected: Option<&str>,
    label: &str,
) -> Result<(), AppError> {
    let Some(expected) = expected else {
        return Err(not_configured(format!("{} not configured", label)));
    };
    let matches = headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(|provided| bool::from(provided.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false);
    if !matches {
        return Err(unauthorized(format!("Invalid or missing {}", label)));
    }
    Ok(())
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| bad_request(format!("invalid request body: {}", e)))
}

/// Like [`parse_body`], but an empty body yields the default request.
fn parse_optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_body(body)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST /v1/agents/run ============

async fn handle_agent_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<VerifiedAnswer>, AppError> {
    require_secret(
        &headers,
        AGENT_SECRET_HEADER,
        state.secrets.agent_runtime_secret.as_deref(),
        "agent runtime secret",
    )?;
    let input: AgentRunInput = parse_body(&body)?;
    Ok(Json(state.agent.run(&input).await))
}

// ============ POST /internal/cron/* ============

async fn handle_sync_daily(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SyncOutcome>, AppError> {
    require_secret(
        &headers,
        CRON_SECRET_HEADER,
        state.secrets.cron_secret.as_deref(),
        "cron secret",
    )?;
    let request: SyncRequest = parse_optional_body(&body)?;

    run_sync_daily(&state.pool, state.lock.as_ref(), &state.providers, &request)
        .await
        .map(Json)
        .map_err(|e| internal("daily sync failed", e))
}

async fn handle_weekly_reports(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WeeklyReportsOutcome>, AppError> {
    require_secret(
        &headers,
        CRON_SECRET_HEADER,
        state.secrets.cron_secret.as_deref(),
        "cron secret",
    )?;
    let request: WeeklyReportsRequest = parse_optional_body(&body)?;

    run_weekly_reports(
        &state.pool,
        state.lock.as_ref(),
        state.llm.as_ref(),
        state.config.llm.analysis_temperature,
        &request,
    )
    .await
    .map(Json)
    .map_err(|e| internal("weekly reports failed", e))
}

// ============ POST /intelligence/generate ============

async fn handle_generate_insight(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<InsightResult>, AppError> {
    require_secret(
        &headers,
        INTEL_KEY_HEADER,
        state.secrets.intel_api_key.as_deref(),
        "intel API key",
    )?;
    if state.secrets.openai_api_key.is_none() {
        return Err(not_configured("OPENAI_API_KEY not configured for intel service"));
    }
    let request: InsightRequest = parse_body(&body)?;

    generate_insight(
        &state.pool,
        state.llm.as_ref(),
        state.config.llm.analysis_temperature,
        &request,
    )
    .await
    .map(Json)
    .map_err(classify_insight_error)
}
