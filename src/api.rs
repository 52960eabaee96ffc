//! REST API for the governance control plane
//!
//! Deep path (`/api/audit`), hot path (`/api/safety/check`,
//! `/api/execute`), session workflow and hybrid generation.
//! Every governed unit of work is handed to the telemetry sampler.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::audit::log::AuditLog;
use crate::audit::{AuditInput, AuditStatus, PlanAuditor};
use crate::config::GovernanceConfig;
use crate::execution::{HttpMarketPreparation, OptimisticCoordinator};
use crate::inference::{GeminiModel, HybridRouter};
use crate::models::{Plan, SessionContext, Turn};
use crate::policy::{HttpPolicyGate, PolicyGate};
use crate::safety::SafetyInterceptor;
use crate::state::InMemorySessionStore;
use crate::telemetry::{
    ArchiveStore, FileArchive, InMemoryArchive, LogExporter, SpanRecord, TieredSampler,
    OUTCOME_ATTRIBUTE, UNIT_KIND_ATTRIBUTE,
};
use crate::workflow::{Intent, WorkflowGate};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct AuditRequest {
    pub plan: AuditInput,
    #[serde(default)]
    pub history: Vec<Turn>,
}

#[derive(Debug, Deserialize)]
pub struct SafetyCheckRequest {
    #[serde(default)]
    pub plan: Option<Plan>,
    pub session: SessionContext,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub plan: Plan,
    pub session: SessionContext,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub session_id: String,
    pub intent: Intent,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub system_instruction: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub auditor: Arc<PlanAuditor>,
    pub audit_log: Arc<AuditLog>,
    pub interceptor: Arc<SafetyInterceptor>,
    pub coordinator: Arc<OptimisticCoordinator>,
    pub workflow: Arc<WorkflowGate>,
    pub router: Arc<HybridRouter>,
    pub sampler: Arc<TieredSampler>,
}

impl ApiState {
    /// Wire the production components from configuration
    pub fn from_config(config: &GovernanceConfig) -> crate::Result<Self> {
        let gate: Arc<dyn PolicyGate> = Arc::new(HttpPolicyGate::new(
            config.policy_url.clone(),
            config.policy_timeout,
        )?);

        let auditor = PlanAuditor::from_config(gate.clone(), config);

        let interceptor = Arc::new(SafetyInterceptor::new(gate, config.interceptor));
        let preparation = Arc::new(HttpMarketPreparation::new(&config.financial_api_base_url)?);
        let coordinator = OptimisticCoordinator::new(interceptor.clone(), preparation);

        let api_key = config.gemini_api_key.clone().unwrap_or_default();
        let fast = Arc::new(GeminiModel::new(api_key.clone(), &config.fast_model)?);
        let reliable = Arc::new(GeminiModel::new(api_key, &config.reliable_model)?);
        let router = HybridRouter::new(fast, reliable, config.ttft_threshold);

        let archive: Arc<dyn ArchiveStore> = match &config.telemetry_archive_dir {
            Some(dir) => Arc::new(FileArchive::new(dir.clone())),
            None => Arc::new(InMemoryArchive::new()),
        };
        let sampler = TieredSampler::new(
            Arc::new(LogExporter),
            archive,
            config.telemetry_sample_rate,
        );

        Ok(Self {
            auditor: Arc::new(auditor),
            audit_log: Arc::new(AuditLog::new()),
            interceptor,
            coordinator: Arc::new(coordinator),
            workflow: Arc::new(WorkflowGate::new(Arc::new(InMemorySessionStore::new()))),
            router: Arc::new(router),
            sampler: Arc::new(sampler),
        })
    }

    /// Telemetry failures never fail the request
    async fn observe(&self, span: SpanRecord) {
        if let Err(e) = self.sampler.on_unit_complete(span).await {
            warn!(error = %e, "Telemetry sampling failed");
        }
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Deep Path
/// =============================

async fn audit_plan(State(state): State<ApiState>, Json(req): Json<AuditRequest>) -> ApiResult {
    let started = Utc::now();
    let history = (!req.history.is_empty()).then_some(req.history.as_slice());

    let verdict = state.auditor.audit(&req.plan, history).await;
    let audit_id = state.audit_log.record(&req.plan, history, &verdict).await;

    info!(%audit_id, status = ?verdict.status, "Plan audited");

    let outcome = match verdict.status {
        AuditStatus::Approved => "APPROVED",
        AuditStatus::Rejected => "BLOCKED",
        AuditStatus::Error => "ERROR",
    };
    let plan_text = match &req.plan {
        AuditInput::Text(text) => text.clone(),
        AuditInput::Structured(plan) => plan.to_plan_text(),
    };
    state
        .observe(
            SpanRecord::new("governance.audit", started)
                .with_attribute(UNIT_KIND_ATTRIBUTE, "audit")
                .with_attribute(OUTCOME_ATTRIBUTE, outcome)
                .with_attribute("audit.id", audit_id.to_string())
                .with_attribute("input.value", plan_text)
                .with_attribute("output.value", verdict.feedback.clone()),
        )
        .await;

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "audit_id": audit_id,
            "verdict": verdict,
        }))),
    )
}

/// =============================
/// Hot Path
/// =============================

async fn safety_check(
    State(state): State<ApiState>,
    Json(req): Json<SafetyCheckRequest>,
) -> ApiResult {
    let started = Utc::now();
    let report = state.interceptor.check(req.plan.as_ref(), &req.session).await;

    let mut span = governed_span("governance.safety_check", started, &req.session)
        .with_attribute("safety.status", report.status.to_string());
    if !report.status.may_proceed() {
        span = span.with_attribute(OUTCOME_ATTRIBUTE, "BLOCKED");
    }
    state.observe(span).await;

    (StatusCode::OK, Json(ApiResponse::success(report)))
}

async fn execute_plan(
    State(state): State<ApiState>,
    Json(req): Json<ExecuteRequest>,
) -> ApiResult {
    let started = Utc::now();
    let outcome = state.coordinator.execute(&req.plan, &req.session).await;

    let kind = if req.plan.action.is_write() { "write" } else { "tool" };
    let mut span = governed_span("governance.execute", started, &req.session)
        .with_attribute(UNIT_KIND_ATTRIBUTE, kind)
        .with_attribute("plan.action", req.plan.action.as_str())
        .with_attribute("safety.status", outcome.safety.status.to_string());
    if !outcome.safety.status.may_proceed() {
        span = span.with_attribute(OUTCOME_ATTRIBUTE, "BLOCKED");
    }
    state.observe(span).await;

    (StatusCode::OK, Json(ApiResponse::success(outcome)))
}

fn governed_span(name: &str, started: DateTime<Utc>, session: &SessionContext) -> SpanRecord {
    SpanRecord::new(name, started)
        .with_attribute("session.id", session.session_id.clone())
        .with_attribute("user.id", session.user_id.to_string())
}

/// =============================
/// Session Workflow
/// =============================

async fn transition_workflow(
    State(state): State<ApiState>,
    Json(req): Json<TransitionRequest>,
) -> ApiResult {
    match state.workflow.transition(&req.session_id, req.intent).await {
        Ok(next) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": req.session_id,
                "state": next,
            }))),
        ),
        Err(e) => (StatusCode::CONFLICT, Json(ApiResponse::error(e.to_string()))),
    }
}

async fn workflow_state(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> ApiResult {
    match state.workflow.current_state(&session_id).await {
        Ok(current) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": session_id,
                "state": current,
            }))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// =============================
/// Generation
/// =============================

async fn generate(State(state): State<ApiState>, Json(req): Json<GenerateRequest>) -> ApiResult {
    let started = Utc::now();
    let result = state
        .router
        .generate(&req.prompt, req.system_instruction.as_deref())
        .await;

    let mut span = SpanRecord::new("chat.generate", started)
        .with_attribute(UNIT_KIND_ATTRIBUTE, "chat")
        .with_attribute("gen_ai.prompt", req.prompt.clone());

    let response = match result {
        Ok(generation) => {
            let path = serde_json::to_value(generation.path).unwrap_or_default();
            span = span
                .with_attribute("inference.path", path)
                .with_attribute("gen_ai.completion", generation.text.clone());
            (StatusCode::OK, Json(ApiResponse::success(generation)))
        }
        Err(e) => {
            span = span.with_attribute("error", e.to_string());
            (
                StatusCode::BAD_GATEWAY,
                Json(ApiResponse::error(format!("Generation failed: {}", e))),
            )
        }
    };

    state.observe(span).await;
    response
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/audit", post(audit_plan))
        .route("/api/safety/check", post(safety_check))
        .route("/api/execute", post(execute_plan))
        .route("/api/workflow/transition", post(transition_workflow))
        .route("/api/workflow/:session_id", get(workflow_state))
        .route("/api/generate", post(generate))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("Governance API listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
