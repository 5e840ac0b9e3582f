//! HTTP surface for the consultation pipeline.

mod error;

pub use error::ServerError;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use cdss_rs_config::CdssConfig;
use cdss_rs_core::{ConsultationPipeline, IdentityResolver, resolver_from_config};
use cdss_rs_protocol::{ConsultationRequest, ConsultationResponse};
use log::{debug, info, warn};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

const INVALID_QUESTION: &str = "Missing or invalid \"question\" field";

/// Shared state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ConsultationPipeline>,
    pub identity: Arc<dyn IdentityResolver>,
}

impl AppState {
    pub fn new(pipeline: Arc<ConsultationPipeline>, identity: Arc<dyn IdentityResolver>) -> Self {
        Self { pipeline, identity }
    }

    /// Build the production state from a config.
    pub fn from_config(config: &CdssConfig) -> Result<Self, ServerError> {
        let pipeline = Arc::new(ConsultationPipeline::from_config(config)?);
        let identity = resolver_from_config(&config.auth)?;
        Ok(Self::new(pipeline, identity))
    }
}

/// Router exposing the consultation endpoint, health check and CORS preflight.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
            CONTENT_TYPE,
        ]);
    Router::new()
        .route("/", post(consult))
        .route("/chat-consultation", post(consult))
        .route("/healthz", get(healthz))
        .layer(cors)
        .with_state(state)
}

/// Bind the configured address and serve until ctrl-c.
pub async fn serve(config: &CdssConfig) -> Result<(), ServerError> {
    let state = AppState::from_config(config)?;
    if let Err(err) = state.pipeline.ensure_configured() {
        warn!("completion endpoint not configured; requests will fail (error={})", err);
    }
    let addr = config.server.bind.clone();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!("consultation server listening (addr={})", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("consultation server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c (error={})", err);
        std::future::pending::<()>().await;
    }
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn consult(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ConsultationResponse>, ServerError> {
    let request = parse_request(&body)?;
    let identity = state.identity.resolve(bearer_token(&headers)).await?;
    state.pipeline.ensure_configured()?;
    let reply = state.pipeline.handle(request, identity).await;
    debug!(
        "consultation reply ready (outcome={:?}, states={})",
        reply.outcome,
        reply.trace.len()
    );
    Ok(Json(reply.into_response()))
}

fn parse_request(body: &[u8]) -> Result<ConsultationRequest, ServerError> {
    let request: ConsultationRequest = serde_json::from_slice(body).map_err(|err| {
        debug!("rejecting request body (len={}, error={})", body.len(), err);
        ServerError::InvalidRequest(INVALID_QUESTION.to_string())
    })?;
    if request.question.trim().is_empty() {
        return Err(ServerError::InvalidRequest(INVALID_QUESTION.to_string()));
    }
    Ok(request)
}

/// Token from `Authorization: Bearer <token>`; a bare value is taken as-is.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = match value.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        None if value.eq_ignore_ascii_case("bearer") => "",
        _ => value,
    };
    (!token.is_empty()).then_some(token)
}
