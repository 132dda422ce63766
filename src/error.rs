//! Error handling module for weft
//!
//! A consolidated error system in the same shape across the whole crate:
//!
//! 1. **Error Consolidation**: all internal errors map to one of the
//!    `ErrorKind` categories
//! 2. **Structured Context**: each error can carry structured JSON details
//!    and a human-readable suggestion
//! 3. **JSON Support**: errors serialize to JSON for programmatic consumers
//!    (the sandbox entry point reports through this path)

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::borrow::Cow;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Essential external errors that can't be consolidated
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    // Consolidated error variant
    #[error("{kind}: {message}")]
    Internal {
        kind: ErrorKind,
        message: Cow<'static, str>,
        context: Option<ErrorContext>,
    },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Error categories for consolidated error handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Workflow document structure errors (missing metadata, bad graph)
    Workflow,
    /// Input validation and configuration errors
    Validation,
    /// Expression parse/evaluation errors
    Expression,
    /// Authentication configuration errors
    Authentication,
    /// Network connectivity and transport setup errors
    Network,
    /// Executor dispatch and process execution errors
    Execution,
    /// Serialization errors (JSON marshal/unmarshal)
    Serialization,
    /// Runtime operation errors
    Runtime,
}

impl ErrorKind {
    /// String identifier for this error kind
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Workflow => "Workflow",
            Self::Validation => "Validation",
            Self::Expression => "Expression",
            Self::Authentication => "Authentication",
            Self::Network => "Network",
            Self::Execution => "Execution",
            Self::Serialization => "Serialization",
            Self::Runtime => "Runtime",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Additional context for consolidated errors
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Structured details for programmatic access
    pub details: Option<serde_json::Value>,
    /// Human-readable suggestion for resolving the error
    pub suggestion: Option<Cow<'static, str>>,
}

impl ErrorContext {
    /// Create error context with only details
    #[must_use]
    pub const fn with_details(details: serde_json::Value) -> Self {
        Self {
            details: Some(details),
            suggestion: None,
        }
    }

    /// Create error context with only a suggestion
    #[must_use]
    pub const fn with_suggestion(suggestion: Cow<'static, str>) -> Self {
        Self {
            details: None,
            suggestion: Some(suggestion),
        }
    }
}

/// JSON representation of an error for structured output
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonError {
    pub error_type: Cow<'static, str>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<Cow<'static, str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Error {
    fn internal(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal {
            kind,
            message: message.into(),
            context: None,
        }
    }

    fn internal_with(
        kind: ErrorKind,
        message: impl Into<Cow<'static, str>>,
        context: ErrorContext,
    ) -> Self {
        Self::Internal {
            kind,
            message: message.into(),
            context: Some(context),
        }
    }

    /// Prefix an error message with additional context
    #[must_use]
    pub fn with_context(self, context: &str) -> Self {
        match self {
            Self::Internal {
                kind,
                message,
                context: ctx,
            } => Self::Internal {
                kind,
                message: Cow::Owned(format!("{context}: {message}")),
                context: ctx,
            },
            other => Self::internal(ErrorKind::Runtime, format!("{context}: {other}")),
        }
    }

    /// Convert error to JSON representation for structured output
    #[must_use]
    pub fn to_json(&self) -> JsonError {
        match self {
            Self::Internal {
                kind,
                message,
                context,
            } => JsonError {
                error_type: Cow::Borrowed(kind.as_str()),
                message: message.to_string(),
                suggestion: context.as_ref().and_then(|c| c.suggestion.clone()),
                details: context.as_ref().and_then(|c| c.details.clone()),
            },
            Self::Io(e) => JsonError {
                error_type: Cow::Borrowed("FileSystem"),
                message: e.to_string(),
                suggestion: None,
                details: None,
            },
            Self::Network(e) => JsonError {
                error_type: Cow::Borrowed("Network"),
                message: e.to_string(),
                suggestion: None,
                details: None,
            },
            Self::Yaml(e) => JsonError {
                error_type: Cow::Borrowed("YAMLParsing"),
                message: e.to_string(),
                suggestion: None,
                details: None,
            },
            Self::Json(e) => JsonError {
                error_type: Cow::Borrowed("JSONParsing"),
                message: e.to_string(),
                suggestion: None,
                details: None,
            },
            Self::Sql(e) => JsonError {
                error_type: Cow::Borrowed("Sql"),
                message: e.to_string(),
                suggestion: None,
                details: None,
            },
            Self::Anyhow(e) => JsonError {
                error_type: Cow::Borrowed("Runtime"),
                message: e.to_string(),
                suggestion: None,
                details: None,
            },
        }
    }

    // ── Workflow / validation ───────────────────────────────────────────

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::internal(ErrorKind::Validation, message.into())
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::internal(ErrorKind::Validation, reason.into())
    }

    pub fn invalid_workflow(errors: &[String]) -> Self {
        Self::internal_with(
            ErrorKind::Workflow,
            format!("workflow validation failed: {}", errors.join("; ")),
            ErrorContext::with_details(json!({ "errors": errors })),
        )
    }

    pub fn duplicate_action_id(id: impl Into<String>, first: usize, second: usize) -> Self {
        let id = id.into();
        Self::internal(
            ErrorKind::Workflow,
            format!("duplicate action id '{id}': found at index {first} and {second}"),
        )
    }

    pub fn missing_dependency(action_id: &str, dep: &str) -> Self {
        Self::internal(
            ErrorKind::Workflow,
            format!("resource '{action_id}' depends on unknown action id '{dep}'"),
        )
    }

    pub fn cycle_detected(ids: &[String]) -> Self {
        Self::internal(
            ErrorKind::Workflow,
            format!("dependency cycle detected involving: {}", ids.join(", ")),
        )
    }

    // ── Executor dispatch ───────────────────────────────────────────────

    pub fn invalid_config_type(kind: &str) -> Self {
        Self::internal(
            ErrorKind::Execution,
            format!("invalid config type for {kind} executor"),
        )
    }

    pub fn missing_adapter(kind: &str) -> Self {
        Self::internal_with(
            ErrorKind::Execution,
            format!("no executor registered for kind '{kind}'"),
            ErrorContext::with_suggestion(Cow::Borrowed(
                "sandbox deployments omit the exec and python executors",
            )),
        )
    }

    // ── Expressions ─────────────────────────────────────────────────────

    pub fn expression_parse(fragment: &str, reason: impl Into<String>) -> Self {
        Self::internal(
            ErrorKind::Expression,
            format!("failed to parse expression '{fragment}': {}", reason.into()),
        )
    }

    pub fn expression_eval(reason: impl Into<String>) -> Self {
        Self::internal(ErrorKind::Expression, reason.into())
    }

    pub fn field_evaluation(field: &str, reason: impl Into<String>) -> Self {
        Self::internal(
            ErrorKind::Expression,
            format!("failed to evaluate {field}: {}", reason.into()),
        )
    }

    // ── HTTP executor ───────────────────────────────────────────────────

    pub const fn url_required() -> Self {
        Self::Internal {
            kind: ErrorKind::Validation,
            message: Cow::Borrowed("URL is required"),
            context: None,
        }
    }

    pub fn invalid_proxy_url(url: &str) -> Self {
        Self::internal(ErrorKind::Network, format!("invalid proxy URL: {url}"))
    }

    pub fn unsupported_auth_type(auth_type: &str) -> Self {
        Self::internal(
            ErrorKind::Authentication,
            format!("unsupported auth type: {auth_type}"),
        )
    }

    pub fn client_certificate(reason: impl Into<String>) -> Self {
        Self::internal(
            ErrorKind::Network,
            format!("failed to load client certificate: {}", reason.into()),
        )
    }

    pub fn ca_certificate(reason: impl Into<String>) -> Self {
        Self::internal(
            ErrorKind::Network,
            format!("failed to load CA certificate: {}", reason.into()),
        )
    }

    pub fn invalid_http_method(method: impl Into<String>) -> Self {
        Self::internal(
            ErrorKind::Validation,
            format!("invalid HTTP method: {}", method.into()),
        )
    }

    pub fn network_request_failed(reason: impl Into<String>) -> Self {
        Self::internal(ErrorKind::Network, reason.into())
    }

    // ── Misc ────────────────────────────────────────────────────────────

    pub fn serialization_error(reason: impl Into<String>) -> Self {
        Self::internal(ErrorKind::Serialization, reason.into())
    }

    pub fn execution_error(reason: impl Into<String>) -> Self {
        Self::internal(ErrorKind::Execution, reason.into())
    }

    pub fn io_error(message: impl Into<String>) -> Self {
        Self::internal(ErrorKind::Runtime, message.into())
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::internal(ErrorKind::Runtime, message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_type_names_the_kind() {
        let err = Error::invalid_config_type("http");
        assert!(err
            .to_string()
            .contains("invalid config type for http executor"));
    }

    #[test]
    fn url_required_message() {
        assert!(Error::url_required().to_string().contains("URL is required"));
    }

    #[test]
    fn unsupported_auth_type_names_the_type() {
        let err = Error::unsupported_auth_type("digest");
        assert!(err.to_string().contains("unsupported auth type: digest"));
    }

    #[test]
    fn with_context_prefixes_message() {
        let err = Error::validation_error("bad field").with_context("resource 'a'");
        assert!(err.to_string().contains("resource 'a': bad field"));
    }

    #[test]
    fn to_json_carries_kind_and_details() {
        let err = Error::invalid_workflow(&["missing name".to_string()]);
        let json = err.to_json();
        assert_eq!(json.error_type, "Workflow");
        assert!(json.details.is_some());
    }

    #[test]
    fn cycle_error_lists_ids() {
        let err = Error::cycle_detected(&["a".into(), "b".into()]);
        let msg = err.to_string();
        assert!(msg.contains("cycle"));
        assert!(msg.contains('a') && msg.contains('b'));
    }
}
