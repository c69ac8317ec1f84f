//! HTTP helpers for Lambda functions.

use lambda_http::{Body, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, warn};

use crate::{Error, Result};

/// Standard API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: None,
            error: Some(message.into()),
        }
    }
}

/// Create a JSON response with the given status code and body.
pub fn json_response<T: Serialize>(status: u16, data: &T) -> Result<Response<Body>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(data)?))
        .map_err(|e| Error::Internal(format!("Failed to build response: {}", e)))
}

/// Wrap `data` in a successful envelope.
pub fn success<T: Serialize>(status: u16, data: T, message: &str) -> Result<Response<Body>> {
    json_response(status, &ApiResponse::success(data, message))
}

/// Create an error response with the given status code and message.
pub fn error_response(
    status: u16,
    message: impl Into<String>,
) -> std::result::Result<Response<Body>, lambda_http::Error> {
    Ok(json_response(status, &ApiResponse::error(message))?)
}

/// Turn a handler error into the response the client sees.
pub fn from_error(err: Error) -> std::result::Result<Response<Body>, lambda_http::Error> {
    let status = err.status_code();
    if status >= 500 {
        error!(error = %err, "Request failed");
    } else {
        warn!(status, error = %err, "Request rejected");
    }
    error_response(status, err.public_message())
}

/// Parse request body as JSON.
pub fn parse_json_body<T: DeserializeOwned>(body: &Body) -> Result<T> {
    serde_json::from_slice(body.as_ref())
        .map_err(|e| Error::Validation(format!("Invalid request body: {}", e)))
}

/// Create a downloadable CSV response.
pub fn csv_response(filename: &str, contents: Vec<u8>) -> Result<Response<Body>> {
    Response::builder()
        .status(200)
        .header("content-type", "text/csv; charset=utf-8")
        .header(
            "content-disposition",
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(Body::from(contents))
        .map_err(|e| Error::Internal(format!("Failed to build response: {}", e)))
}

/// Strip the API Gateway stage prefix from a raw request path.
pub fn route_path(raw_path: &str) -> &str {
    let path = raw_path.strip_prefix("/api").unwrap_or(raw_path);
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// Non-empty path segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}
