//! Error types for the REST transport, interaction contexts and the creator.

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::rest::HttpMethod;

/// Error type returned by user command code and callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Call stack captured before a request enters its bucket, so an error
/// raised after the network round trip still points at the caller.
#[derive(Clone)]
pub struct CapturedStack(Arc<Backtrace>);

impl CapturedStack {
    pub fn capture() -> Self {
        Self(Arc::new(Backtrace::capture()))
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.0
    }
}

impl fmt::Debug for CapturedStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A non-success response from Discord.
#[derive(Debug, Error)]
#[error("{message} ({method} {path}, status {status})")]
pub struct DiscordHttpError {
    pub status: u16,
    /// Discord's JSON error code, when the body carried one.
    pub code: Option<u64>,
    /// Top-level message followed by any flattened field errors.
    pub message: String,
    /// Field-level validation messages, `path.to.field[CODE]: message`.
    pub errors: Vec<String>,
    /// Raw response body (JSON, or a string when it was not JSON).
    pub body: serde_json::Value,
    pub method: HttpMethod,
    pub path: String,
    pub stack: CapturedStack,
}

impl DiscordHttpError {
    pub fn new(
        status: u16,
        body: serde_json::Value,
        method: HttpMethod,
        path: impl Into<String>,
        stack: CapturedStack,
    ) -> Self {
        let code = body.get("code").and_then(|c| c.as_u64());
        let errors = body
            .get("errors")
            .map(crate::util::flatten_errors)
            .unwrap_or_default();
        let base = body
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .or_else(|| body.as_str().filter(|s| !s.is_empty()).map(str::to_string))
            .unwrap_or_else(|| format!("HTTP {}", status));
        let message = if errors.is_empty() {
            base
        } else {
            format!("{}\n{}", base, errors.join("\n"))
        };

        Self {
            status,
            code,
            message,
            errors,
            body,
            method,
            path: path.into(),
            stack,
        }
    }
}

#[derive(Debug, Error)]
pub enum RestError {
    #[error(transparent)]
    Http(#[from] DiscordHttpError),

    #[error("request timed out after {}ms ({method} {path})", .timeout.as_millis())]
    Timeout {
        method: HttpMethod,
        path: String,
        timeout: Duration,
        stack: CapturedStack,
    },

    #[error("HTTP transport error ({method} {path}): {message}")]
    Transport {
        method: HttpMethod,
        path: String,
        message: String,
        stack: CapturedStack,
    },

    #[error("serialisation error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl RestError {
    /// HTTP status for errors that came back from Discord.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http(e) => Some(e.status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("this interaction has expired")]
    Expired,

    #[error("this interaction has already responded")]
    AlreadyResponded,

    #[error("you must send a message before registering components")]
    NotResponded,

    #[error("fetch the original message or use deferred messages before registering components")]
    NoMessageId,

    #[error("interaction is missing {0}")]
    MissingData(&'static str),

    #[error(transparent)]
    Rest(#[from] RestError),

    #[error("serialisation error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CreatorError {
    #[error("a command named {name:?} is already registered ({key})")]
    DuplicateCommand { name: String, key: String },

    #[error("{0} is not configured")]
    MissingOption(&'static str),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error(transparent)]
    Rest(#[from] RestError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn http_error_flattens_body() {
        let body = json!({
            "code": 50035,
            "message": "Invalid Form Body",
            "errors": { "content": { "_errors": [{ "code": "BASE_TYPE_MAX_LENGTH", "message": "Too long" }] } }
        });
        let err = DiscordHttpError::new(400, body, HttpMethod::Post, "/channels/1/messages", CapturedStack::capture());
        assert_eq!(err.code, Some(50035));
        assert_eq!(err.errors, vec!["content[BASE_TYPE_MAX_LENGTH]: Too long".to_string()]);
        assert!(err.message.starts_with("Invalid Form Body\n"));
        assert!(err.to_string().contains("POST /channels/1/messages"));
    }

    #[test]
    fn http_error_without_json_body() {
        let err = DiscordHttpError::new(
            502,
            json!("Bad Gateway"),
            HttpMethod::Get,
            "/gateway",
            CapturedStack::capture(),
        );
        assert_eq!(err.code, None);
        assert_eq!(err.message, "Bad Gateway");
        assert_eq!(RestError::from(err).status(), Some(502));
    }
}
