//! Error handling for the Stormcast engine
//!
//! Every failure maps onto one of four kinds: data absence, external call
//! failure, parse failure or internal error. None of them is fatal to the
//! engine; the coordinating loop logs them and carries on.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Data absence
    #[error("No usable data: {0}")]
    NoData(String),

    #[error("Insufficient history: {0}")]
    InsufficientHistory(String),

    // External call failures
    #[error("Reasoning service error: {0}")]
    ReasoningService(String),

    #[error("Reasoning call timed out after {0}s")]
    ReasoningTimeout(u64),

    #[error("Prompt too large: {size} chars exceeds limit of {limit}")]
    PromptTooLarge { size: usize, limit: usize },

    #[error("Measurement source error: {0}")]
    MeasurementSource(String),

    #[error("Warning source error: {0}")]
    WarningSource(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    // Parse failures
    #[error("Could not parse reasoning response: {0}")]
    ParseFailure(String),

    // Internal errors
    #[error("A reasoning analysis is already in flight")]
    AnalysisInFlight,

    #[error("No forecast methods produced output")]
    NoForecastMethods,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

/// Failure classes used for logging and cycle accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DataAbsence,
    ExternalCallFailure,
    ParseFailure,
    Internal,
}

impl AppError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AppError::NoData(_) | AppError::InsufficientHistory(_) => FailureKind::DataAbsence,
            AppError::ReasoningService(_)
            | AppError::ReasoningTimeout(_)
            | AppError::PromptTooLarge { .. }
            | AppError::MeasurementSource(_)
            | AppError::WarningSource(_)
            | AppError::Delivery(_) => FailureKind::ExternalCallFailure,
            AppError::ParseFailure(_) => FailureKind::ParseFailure,
            AppError::AnalysisInFlight
            | AppError::NoForecastMethods
            | AppError::NotFound(_)
            | AppError::Storage(_)
            | AppError::Configuration(_)
            | AppError::DatabaseError(_)
            | AppError::Internal(_)
            | AppError::InternalError(_) => FailureKind::Internal,
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NoData(_) => (StatusCode::NOT_FOUND, "NO_DATA"),
            AppError::InsufficientHistory(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_HISTORY")
            }
            AppError::ReasoningService(_) => (StatusCode::BAD_GATEWAY, "REASONING_SERVICE_ERROR"),
            AppError::ReasoningTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "REASONING_TIMEOUT"),
            AppError::PromptTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "PROMPT_TOO_LARGE"),
            AppError::MeasurementSource(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "MEASUREMENT_SOURCE_UNAVAILABLE")
            }
            AppError::WarningSource(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "WARNING_SOURCE_UNAVAILABLE")
            }
            AppError::Delivery(_) => (StatusCode::BAD_GATEWAY, "DELIVERY_ERROR"),
            AppError::ParseFailure(_) => (StatusCode::BAD_GATEWAY, "PARSE_FAILURE"),
            AppError::AnalysisInFlight => (StatusCode::CONFLICT, "ANALYSIS_IN_FLIGHT"),
            AppError::NoForecastMethods => (StatusCode::SERVICE_UNAVAILABLE, "NO_FORECAST"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Storage(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_ERROR"),
            AppError::Configuration(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION_ERROR")
            }
            AppError::DatabaseError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            AppError::Internal(_) | AppError::InternalError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub kind: FailureKind,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Database and internal details stay in the log
        let message = match &self {
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalError(_) => "An internal server error occurred".to_string(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!("Error: {:?}", self);
        } else {
            tracing::debug!("Request failed: {}", self);
        }

        let detail = ErrorDetail {
            code: code.to_string(),
            message,
            kind: self.kind(),
        };

        (status, Json(ErrorResponse { error: detail })).into_response()
    }
}

/// Result type alias for services and handlers
pub type AppResult<T> = Result<T, AppError>;
