//! Centralized string constants for weft
//!
//! Commonly used string literals live here to reduce duplication and keep
//! header names, content types, and cache key prefixes consistent across
//! the executors.

// HTTP Headers
pub const HEADER_AUTHORIZATION: &str = "Authorization";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_USER_AGENT: &str = "User-Agent";

// Content Types
pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

// Authentication scheme discriminators (matched case-insensitively)
pub const AUTH_TYPE_BASIC: &str = "basic";
pub const AUTH_TYPE_BEARER: &str = "bearer";
pub const AUTH_TYPE_API_KEY: &str = "api_key";
pub const AUTH_TYPE_OAUTH2: &str = "oauth2";

// Cache key prefixes (one per caching executor)
pub const CACHE_PREFIX_HTTP: &str = "http_cache_";
pub const CACHE_PREFIX_SQL: &str = "sql_cache_";
pub const CACHE_PREFIX_CHAT: &str = "chat_cache_";

/// Length of the `Authorization` header suffix mixed into derived cache keys.
pub const CACHE_AUTH_SUFFIX_LEN: usize = 12;

/// Default transport timeout applied when `timeoutDuration` is absent or
/// unparseable.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default retry backoff base when `backoff` is absent or unparseable.
pub const DEFAULT_BACKOFF_MS: u64 = 1000;

/// `User-Agent` value injected when the header map carries none.
pub const USER_AGENT_VALUE: &str = concat!("weft/", env!("CARGO_PKG_VERSION"));

// Environment variables
pub const ENV_LOG: &str = "WEFT_LOG";
pub const ENV_LOG_FORMAT: &str = "WEFT_LOG_FORMAT";
pub const ENV_LOG_FILE: &str = "WEFT_LOG_FILE";

// Result map keys shared by the process-backed executors
pub const RESULT_KEY_SUCCESS: &str = "success";
pub const RESULT_KEY_EXIT_CODE: &str = "exitCode";
pub const RESULT_KEY_STDOUT: &str = "stdout";
pub const RESULT_KEY_STDERR: &str = "stderr";
pub const RESULT_KEY_TIMED_OUT: &str = "timedOut";
pub const RESULT_KEY_RESULT: &str = "result";
pub const RESULT_KEY_ERROR: &str = "error";

// Chat backends allowed in sandbox (remote-only) deployments
pub const ONLINE_CHAT_BACKENDS: &[&str] = &["openai", "anthropic", "openrouter", "groq"];
// Chat backends that require a local process or socket
pub const LOCAL_CHAT_BACKENDS: &[&str] = &["ollama", "local"];
