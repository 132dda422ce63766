//! Workflow document model and loader.
//!
//! A workflow is a YAML document: `metadata` (name and target action id)
//! plus an ordered sequence of resources. Each resource declares its kind
//! through the tagged `run` payload (exactly one of `exec`, `http`,
//! `sql`, `chat`, or `python`) alongside optional `dependsOn` edges and
//! an optional `items` iteration expression. The document is immutable
//! after load.

pub mod validator;

use crate::error::Error;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level workflow document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub metadata: WorkflowMetadata,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// Workflow identity and entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    /// Workflow name.
    #[serde(default)]
    pub name: String,
    /// Action id of the target (entry) resource.
    #[serde(default)]
    pub target_action_id: String,
}

/// A single declarative work unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub metadata: ResourceMetadata,
    /// Explicit dependencies on other resources by action id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
    /// Iteration source expression; must evaluate to a sequence. The
    /// resource executes once per element with the iteration frame bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<String>,
    pub run: RunSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    pub action_id: String,
}

impl Resource {
    #[must_use]
    pub fn action_id(&self) -> &str {
        &self.metadata.action_id
    }

    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.run.kind()
    }
}

/// Kind discriminator determining which executor handles a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Exec,
    Http,
    Sql,
    Chat,
    Python,
}

impl ResourceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exec => "exec",
            Self::Http => "http",
            Self::Sql => "sql",
            Self::Chat => "chat",
            Self::Python => "python",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tagged kind payload: exactly one variant per resource, selected by the
/// YAML key under `run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunSpec {
    Exec(ExecConfig),
    Http(HttpConfig),
    Sql(SqlConfig),
    Chat(ChatConfig),
    Python(PythonConfig),
}

impl RunSpec {
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Exec(_) => ResourceKind::Exec,
            Self::Http(_) => ResourceKind::Http,
            Self::Sql(_) => ResourceKind::Sql,
            Self::Chat(_) => ResourceKind::Chat,
            Self::Python(_) => ResourceKind::Python,
        }
    }
}

/// Shell command configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecConfig {
    /// Script text; `{{…}}` fragments interpolate leniently with shell
    /// quoting applied to substituted values.
    pub command: String,
    /// Shell binary, default `/bin/sh`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    /// Extra environment variables (values expression-bearing).
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    /// Working directory (tilde-expanded); falls back to the run's
    /// filesystem root hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Kill the process group when this expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_duration: Option<String>,
}

/// HTTP call configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    /// Request URL (required, expression-bearing).
    #[serde(default)]
    pub url: String,
    /// HTTP method, default GET.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Request headers; values may bear expressions.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: IndexMap<String, String>,
    /// Body payload: a string expression or a nested map whose leaves are
    /// expressions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    /// Tri-state redirect policy: unset follows (standard hop cap),
    /// `false` returns the first response as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_redirects: Option<bool>,
    /// Proxy URL (expression-bearing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    /// Transport timeout, default 30s; unparseable values keep the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,
}

/// Authentication scheme configuration. `type` selects the scheme
/// (case-insensitive); all string fields are expression-bearing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub auth_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Attempt budget; values ≤ 0 are treated as 1.
    #[serde(default)]
    pub max_attempts: i64,
    /// Backoff base duration string, default 1s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<String>,
    /// Cap applied to the computed delay when parseable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff: Option<String>,
    /// Explicit status set that warrants retry. When unset, the default
    /// policy retries on status ≥ 500 or 429. An explicitly empty set
    /// retries on nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_on: Option<Vec<u16>>,
}

/// Response cache configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Custom cache key (expression-bearing). When empty, a default is
    /// derived from method, URL, and the `Authorization` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Reserved: stored but not enforced at this layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

/// TLS configuration for the HTTP transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    #[serde(default)]
    pub insecure_skip_verify: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,
}

/// SQL query configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlConfig {
    /// Driver name: `postgres` or `sqlite`.
    #[serde(default)]
    pub driver: String,
    /// Connection string (expression-bearing).
    #[serde(default)]
    pub dsn: String,
    /// Query text (expression-bearing).
    #[serde(default)]
    pub query: String,
    /// Positional bind parameters; leaves are expressions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,
}

/// LLM chat-completion configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    /// Backend name, default `openai`. Local backends (`ollama`, `local`)
    /// are unavailable in sandbox deployments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default)]
    pub model: String,
    /// User prompt (expression-bearing).
    #[serde(default)]
    pub prompt: String,
    /// Optional system prompt (expression-bearing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// API token (expression-bearing); falls back to the backend's
    /// conventional environment variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Override the backend's base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,
}

/// Python script configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PythonConfig {
    /// Script source passed to the interpreter.
    pub script: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_duration: Option<String>,
}

/// Parses a workflow document from YAML text (JSON is accepted as a YAML
/// subset).
///
/// # Errors
///
/// Returns an error when the document is not valid YAML or does not match
/// the workflow shape.
pub fn load_workflow(text: &str) -> Result<Workflow, Error> {
    // serde_yaml's enum deserializer only accepts externally tagged enums
    // via `!tag` syntax, not the map-keyed form (`exec: {...}`) this
    // document format relies on. Route through serde_json::Value, whose
    // enum handling does support the map-keyed form, to work around that.
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(text)?;
    let json_value: Value = serde_json::to_value(yaml_value)?;
    let workflow: Workflow = serde_json::from_value(json_value)?;
    Ok(workflow)
}
