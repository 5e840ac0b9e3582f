//! HTTP-facing error type and its status mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cdss_rs_config::ConfigError;
use cdss_rs_core::{CdssCoreError, CompletionError, IdentityError};
use cdss_rs_protocol::ConsultationResponse;
use log::{error, warn};
use thiserror::Error;

/// Errors surfaced by the consultation server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Body was not JSON or carried no usable question.
    #[error("{0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    /// Required runtime configuration is absent.
    #[error(transparent)]
    Configuration(#[from] CompletionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Core(#[from] CdssCoreError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Identity(_) => StatusCode::UNAUTHORIZED,
            ServerError::Configuration(_)
            | ServerError::Config(_)
            | ServerError::Core(_)
            | ServerError::Bind { .. }
            | ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message placed in the `error` field of the response body.
    fn public_message(&self) -> String {
        match self {
            ServerError::Identity(IdentityError::MissingCredential) => {
                "Missing authorization header".to_string()
            }
            ServerError::Identity(_) => "Unauthorized".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed (status={}, error={})", status.as_u16(), self);
        } else {
            warn!("request rejected (status={}, error={})", status.as_u16(), self);
        }
        (
            status,
            Json(ConsultationResponse::error(self.public_message())),
        )
            .into_response()
    }
}
