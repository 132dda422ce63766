//! Tracing initialization and secret redaction.
//!
//! Executors log requests and responses through `tracing`; anything that
//! could carry a credential (authorization headers, api-key style headers,
//! bearer tokens) is redacted before it reaches a log line.

use crate::constants;
use tracing_subscriber::EnvFilter;

const REDACTED: &str = "[REDACTED]";

/// Wrapper type to write logs to file or stderr.
struct FileOrStderr {
    file: Option<std::sync::Mutex<std::fs::File>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FileOrStderr {
    type Writer = Box<dyn std::io::Write + 'a>;

    fn make_writer(&'a self) -> Self::Writer {
        self.file
            .as_ref()
            .and_then(|mutex| mutex.lock().ok())
            .and_then(|file| file.try_clone().ok())
            .map_or_else(
                || Box::new(std::io::stderr()) as Self::Writer,
                |cloned| Box::new(cloned) as Self::Writer,
            )
    }
}

/// Initialize tracing-subscriber for engine and executor logging.
///
/// Level comes from `verbosity` (1 = debug, 2+ = trace) or the `WEFT_LOG`
/// env var; format from `WEFT_LOG_FORMAT` (`text` or `json`); destination
/// from `WEFT_LOG_FILE` (falls back to stderr).
pub fn init_tracing(verbosity: u8) {
    use std::fs::OpenOptions;
    use std::sync::Mutex;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let log_level_str = if verbosity > 0 {
        match verbosity {
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    } else {
        std::env::var(constants::ENV_LOG).unwrap_or_else(|_| "error".to_string())
    };

    let env_filter = EnvFilter::try_new(&log_level_str)
        .or_else(|_| EnvFilter::try_new("error"))
        .unwrap_or_else(|_| EnvFilter::new("error"));

    let log_format = std::env::var(constants::ENV_LOG_FORMAT)
        .map_or_else(|_| "text".to_string(), |s| s.to_lowercase());

    let writer = std::env::var(constants::ENV_LOG_FILE).ok().map_or_else(
        || FileOrStderr { file: None },
        |path| match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => FileOrStderr {
                file: Some(Mutex::new(file)),
            },
            Err(_) => FileOrStderr { file: None },
        },
    );

    if log_format == "json" {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer),
            )
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .try_init();
    }
}

/// Whether a header name carries credentials and must never be logged.
#[must_use]
pub fn should_redact_header(name: &str) -> bool {
    let lower = name.to_lowercase();
    matches!(
        lower.as_str(),
        "authorization" | "proxy-authorization" | "cookie" | "set-cookie" | "api_key" | "apikey"
    ) || lower.starts_with("x-api-")
        || lower.starts_with("x-auth-")
}

/// Redacts a header value when the header is sensitive.
#[must_use]
pub fn redact_header_value(name: &str, value: &str) -> String {
    if should_redact_header(name) {
        REDACTED.to_string()
    } else {
        value.to_string()
    }
}

/// Renders a header map for logging with sensitive values redacted.
#[must_use]
pub fn redacted_headers<'a, I>(headers: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    headers
        .into_iter()
        .map(|(k, v)| format!("{k}: {}", redact_header_value(k, v)))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_authorization_case_insensitively() {
        assert!(should_redact_header("Authorization"));
        assert!(should_redact_header("authorization"));
        assert!(should_redact_header("AUTHORIZATION"));
    }

    #[test]
    fn redacts_api_key_style_headers() {
        assert!(should_redact_header("X-Api-Key"));
        assert!(should_redact_header("x-auth-token"));
        assert!(should_redact_header("api_key"));
        assert!(should_redact_header("Proxy-Authorization"));
    }

    #[test]
    fn leaves_ordinary_headers_alone() {
        assert!(!should_redact_header("Content-Type"));
        assert!(!should_redact_header("Accept"));
        assert_eq!(redact_header_value("Accept", "text/html"), "text/html");
    }

    #[test]
    fn redact_header_value_masks_token() {
        let out = redact_header_value("Authorization", "Bearer token123");
        assert_eq!(out, "[REDACTED]");
    }

    #[test]
    fn redacted_headers_joins_pairs() {
        let auth = ("Authorization".to_string(), "Bearer abc".to_string());
        let accept = ("Accept".to_string(), "application/json".to_string());
        let rendered = redacted_headers([(&auth.0, &auth.1), (&accept.0, &accept.1)]);
        assert!(rendered.contains("Authorization: [REDACTED]"));
        assert!(rendered.contains("Accept: application/json"));
    }
}
