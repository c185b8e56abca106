//! Unified gateway error model and HTTP mapping.
//! Layer errors (paths, credentials, upstream) converge here; the DAV
//! dispatcher and gatekeeper turn them into protocol responses.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::ident::PathError;
use crate::identity::CredentialError;
use crate::upstream::UpstreamError;

/// Methods the gateway serves; everything else is rejected.
pub const ALLOWED_METHODS: &str = "OPTIONS, GET, HEAD, PROPFIND, REPORT";

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("malformed credentials: {0}")]
    CredentialFormat(#[from] CredentialError),
    #[error("upstream rejected credentials: {0}")]
    UpstreamAuth(String),
    #[error("invalid resource path: {0}")]
    PathParse(#[from] PathError),
    #[error("upstream unavailable: {0}")]
    UpstreamTransient(String),
    #[error("operation not supported")]
    Unsupported,
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl GatewayError {
    pub fn code_str(&self) -> &'static str {
        match self {
            GatewayError::CredentialFormat(_) => "credential_format",
            GatewayError::UpstreamAuth(_) => "upstream_auth",
            GatewayError::PathParse(_) => "path_parse",
            GatewayError::UpstreamTransient(_) => "upstream_transient",
            GatewayError::Unsupported => "unsupported_operation",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::BadRequest(_) => "bad_request",
        }
    }

    /// Both credential failures surface identically to the caller.
    pub fn is_auth(&self) -> bool {
        matches!(self, GatewayError::CredentialFormat(_) | GatewayError::UpstreamAuth(_))
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        match self {
            GatewayError::CredentialFormat(_) | GatewayError::UpstreamAuth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::PathParse(_) | GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::UpstreamTransient(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Unsupported => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<UpstreamError> for GatewayError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Unauthorized(msg) => GatewayError::UpstreamAuth(msg),
            UpstreamError::NotFound(msg) => GatewayError::NotFound(msg),
            other => GatewayError::UpstreamTransient(other.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        // Bodies carry the status text only; upstream detail stays in the logs.
        let body = status.canonical_reason().unwrap_or("error").to_string();
        let mut resp = (status, body).into_response();
        if matches!(self, GatewayError::Unsupported) {
            resp.headers_mut().insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
        }
        resp
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
