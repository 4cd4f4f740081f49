// src/error.rs
// Request-time error type of the gateway and its conversion into the
// HTML failure page.

use crate::size_limit::{LimitedReadError, SizeLimitExceeded};
use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use std::time::Duration;

// Template of the message page, with `$title$` and `$description$` placeholders.
const MESSAGE_PAGE_TEMPLATE: &str = include_str!("../assets/message.html");

const FAILURE_TITLE: &str = "Failure";
const GENERIC_FAILURE_DESCRIPTION: &str = "Processing request was not successful.";

#[derive(Debug)]
pub enum GatewayError {
    // A submitted part is bigger than allowed
    SizeLimitExceeded(SizeLimitExceeded),
    // Path containment failure, malformed parameter shape or malformed multipart body
    Validation(String),
    // Spawn failure, stream failure, process not exited or non-zero exit code
    Process(String),
    // The invocation did not finish in time
    Timeout(Duration),
}

impl GatewayError {
    /// Human-readable description shown on the failure page.
    ///
    /// Only the size limit gets a specific message, everything else is reported
    /// generically so that nothing about the command leaks to the client.
    pub fn description(&self) -> String {
        match self {
            Self::SizeLimitExceeded(limit) => format!(
                "Submitted content is bigger than size limit ({}kB maximum, {}kB received).",
                limit.max_size / 1024,
                limit.current_size / 1024
            ),
            _ => GENERIC_FAILURE_DESCRIPTION.to_string(),
        }
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SizeLimitExceeded(limit) => write!(f, "{}", limit),
            Self::Validation(msg) => write!(f, "Validation failed: {}", msg),
            Self::Process(msg) => write!(f, "Process failed: {}", msg),
            Self::Timeout(after) => write!(f, "Process timed out after {:?}", after),
        }
    }
}

impl std::error::Error for GatewayError {}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let page = render_message_page(FAILURE_TITLE, &self.description());
        (StatusCode::INTERNAL_SERVER_ERROR, Html(page)).into_response()
    }
}

// Fills the message page template.
pub fn render_message_page(title: &str, description: &str) -> String {
    MESSAGE_PAGE_TEMPLATE
        .replace("$title$", title)
        .replace("$description$", description)
}

impl From<SizeLimitExceeded> for GatewayError {
    fn from(err: SizeLimitExceeded) -> Self {
        GatewayError::SizeLimitExceeded(err)
    }
}

impl From<MultipartError> for GatewayError {
    fn from(err: MultipartError) -> Self {
        GatewayError::Validation(format!("Invalid multipart request: {}", err))
    }
}

impl From<MultipartRejection> for GatewayError {
    fn from(err: MultipartRejection) -> Self {
        GatewayError::Validation(format!("Invalid multipart request: {}", err))
    }
}

impl From<LimitedReadError<MultipartError>> for GatewayError {
    fn from(err: LimitedReadError<MultipartError>) -> Self {
        match err {
            LimitedReadError::Limit(limit) => limit.into(),
            LimitedReadError::Source(err) => err.into(),
        }
    }
}
