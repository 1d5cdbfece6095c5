use crate::store::StoreError;
use hyper::StatusCode;
use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;

/// Field name to the list of problems found with it.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Errors that prevent the pipeline from starting or keep it from serving
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] crate::config::ValidationError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors surfaced synchronously to API callers
#[derive(Error, Debug, PartialEq)]
pub enum ApiError {
    #[error("API key missing")]
    Unauthenticated,

    #[error("Invalid API key")]
    Forbidden,

    #[error("invalid payload")]
    BadPayload(FieldErrors),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Not found")]
    NotFound,

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("method not allowed")]
    MethodNotAllowed,
}

impl ApiError {
    /// Builds a `BadPayload` error for a single field.
    pub fn bad_field<F, M>(field: F, message: M) -> Self
    where
        F: Into<String>,
        M: Into<String>,
    {
        ApiError::BadPayload(FieldErrors::from([(field.into(), vec![message.into()])]))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    /// Short label used to tag rejection metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "unauthenticated",
            ApiError::Forbidden => "forbidden",
            ApiError::BadPayload(_) => "bad_payload",
            ApiError::ServiceUnavailable(_) => "unavailable",
            ApiError::NotFound => "not_found",
            ApiError::PayloadTooLarge(_) => "too_large",
            ApiError::MethodNotAllowed => "method_not_allowed",
        }
    }

    /// JSON body returned to the caller. Field errors are echoed as-is.
    pub fn body(&self) -> serde_json::Value {
        match self {
            ApiError::BadPayload(fields) => json!(fields),
            // Internal detail stays in the logs
            ApiError::ServiceUnavailable(_) => json!({"error": "Service unavailable"}),
            other => json!({"error": other.to_string()}),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::ServiceUnavailable(err.to_string())
    }
}
