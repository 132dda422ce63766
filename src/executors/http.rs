//! HTTP resource executor.
//!
//! The most elaborate executor and the reference for the shared
//! resolve → evaluate → cache → transport → retry → shape pipeline:
//!
//! 1. resolve expression-bearing config fields into a resolved copy;
//! 2. evaluate URL, method, and headers; synthesize auth headers;
//! 3. consult the response cache;
//! 4. prepare the body (form-encoded or JSON);
//! 5. construct the transport (timeout, redirect policy, proxy, TLS);
//! 6. execute with retry;
//! 7. shape the response map and store it in the cache.
//!
//! Transport failures (DNS, TCP, proxy connect, TLS handshake) are data:
//! the executor returns `{error: "…"}` with no engine-level error, while
//! configuration failures abort the run.

use crate::constants;
use crate::duration::parse_duration_or;
use crate::engine::context::ExecutionContext;
use crate::engine::registry::Executor;
use crate::error::Error;
use crate::executors::cache::{self, ResolvedCache};
use crate::executors::retry::RetryPolicy;
use crate::executors::{eval_field, eval_opt_field};
use crate::expr::{self, EvalScope};
use crate::logging;
use crate::workflow::{AuthConfig, HttpConfig, ResourceKind, RunSpec, TlsConfig};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use indexmap::IndexMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

pub struct HttpExecutor;

#[async_trait]
impl Executor for HttpExecutor {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Http
    }

    async fn execute(&self, ctx: &ExecutionContext, run: &RunSpec) -> Result<Value, Error> {
        let RunSpec::Http(config) = run else {
            return Err(Error::invalid_config_type("http"));
        };
        execute_http(ctx, config).await
    }
}

/// Transport-relevant configuration with expressions resolved. The
/// original config is never mutated.
#[derive(Debug, Clone)]
struct ResolvedTransport {
    timeout: Duration,
    follow_redirects: Option<bool>,
    proxy: Option<String>,
    tls: Option<ResolvedTls>,
}

#[derive(Debug, Clone)]
struct ResolvedTls {
    insecure_skip_verify: bool,
    cert_file: Option<String>,
    key_file: Option<String>,
    ca_file: Option<String>,
}

async fn execute_http(ctx: &ExecutionContext, config: &HttpConfig) -> Result<Value, Error> {
    let scope = ctx.expression_scope();

    // 1. Resolve dynamic config
    let transport = resolve_transport(config, &scope)?;
    let retry = RetryPolicy::resolve(config.retry.as_ref(), &scope)?;
    let resolved_cache = ResolvedCache::resolve(config.cache.as_ref(), &scope)?;

    // 2. Request surface
    let url = eval_field(&config.url, &scope, "url")?;
    if url.trim().is_empty() {
        return Err(Error::url_required());
    }
    let method = resolve_method(config.method.as_deref(), &scope)?;
    let mut headers = resolve_headers(config, &scope)?;

    // 3. Cache consult
    let auth_value = header_value(&headers, constants::HEADER_AUTHORIZATION);
    let cache_key = resolved_cache
        .as_ref()
        .filter(|c| c.enabled)
        .map(|c| cache::http_cache_key(c, &method, &url, auth_value.as_deref()));
    if let Some(key) = &cache_key {
        if let Some(hit) = cache::check(&ctx.memory, key) {
            return Ok(hit);
        }
    }

    // 4. Body
    let body = prepare_body(config.data.as_ref(), &mut headers, &scope)?;

    // 5. Transport
    let client = build_client(&transport)?;
    let header_map = build_header_map(&headers)?;

    debug!(
        %method,
        %url,
        headers = %logging::redacted_headers(headers.iter()),
        "dispatching http request"
    );

    // 6 + 7. Retry loop, then shape
    let result = send_with_retry(&client, &method, &url, &header_map, body, retry.as_ref()).await?;

    if let Some(key) = &cache_key {
        if result.get(constants::RESULT_KEY_ERROR).is_none() {
            cache::put(&ctx.memory, key, &result);
        }
    }

    Ok(result)
}

fn resolve_transport(config: &HttpConfig, scope: &EvalScope) -> Result<ResolvedTransport, Error> {
    let timeout_text = eval_opt_field(
        config.timeout_duration.as_deref(),
        scope,
        "timeoutDuration",
    )?;
    let timeout = parse_duration_or(
        timeout_text.as_deref(),
        Duration::from_secs(constants::DEFAULT_TIMEOUT_SECS),
    );

    let proxy = eval_opt_field(config.proxy.as_deref(), scope, "proxy")?.filter(|p| !p.is_empty());

    let tls = config
        .tls
        .as_ref()
        .map(|t| resolve_tls(t, scope))
        .transpose()?;

    Ok(ResolvedTransport {
        timeout,
        follow_redirects: config.follow_redirects,
        proxy,
        tls,
    })
}

fn resolve_tls(tls: &TlsConfig, scope: &EvalScope) -> Result<ResolvedTls, Error> {
    Ok(ResolvedTls {
        insecure_skip_verify: tls.insecure_skip_verify,
        cert_file: eval_opt_field(tls.cert_file.as_deref(), scope, "tls.certFile")?,
        key_file: eval_opt_field(tls.key_file.as_deref(), scope, "tls.keyFile")?,
        ca_file: eval_opt_field(tls.ca_file.as_deref(), scope, "tls.caFile")?,
    })
}

fn resolve_method(method: Option<&str>, scope: &EvalScope) -> Result<String, Error> {
    let evaluated = eval_opt_field(method, scope, "method")?.unwrap_or_default();
    let method = if evaluated.trim().is_empty() {
        "GET".to_string()
    } else {
        evaluated.trim().to_uppercase()
    };
    // Validate early so a bad method is a configuration error, not a
    // transport failure.
    reqwest::Method::from_bytes(method.as_bytes())
        .map_err(|_| Error::invalid_http_method(&method))?;
    Ok(method)
}

fn resolve_headers(
    config: &HttpConfig,
    scope: &EvalScope,
) -> Result<IndexMap<String, String>, Error> {
    let mut headers = IndexMap::with_capacity(config.headers.len() + 2);
    for (name, value) in &config.headers {
        let evaluated = eval_field(value, scope, &format!("header '{name}'"))?;
        headers.insert(name.clone(), evaluated);
    }

    if header_value(&headers, constants::HEADER_USER_AGENT).is_none() {
        headers.insert(
            constants::HEADER_USER_AGENT.to_string(),
            constants::USER_AGENT_VALUE.to_string(),
        );
    }

    if let Some(auth) = &config.auth {
        for (name, value) in auth_headers(auth, scope)? {
            // Auth wins on collision
            remove_header(&mut headers, &name);
            headers.insert(name, value);
        }
    }

    Ok(headers)
}

/// Synthesizes headers for a resolved auth configuration.
fn auth_headers(auth: &AuthConfig, scope: &EvalScope) -> Result<Vec<(String, String)>, Error> {
    let auth_type = eval_field(&auth.auth_type, scope, "auth type")?.to_lowercase();
    match auth_type.as_str() {
        constants::AUTH_TYPE_BASIC => {
            let username = eval_opt_field(auth.username.as_deref(), scope, "username")?
                .unwrap_or_default();
            let password = eval_opt_field(auth.password.as_deref(), scope, "password")?
                .unwrap_or_default();
            let encoded = BASE64.encode(format!("{username}:{password}"));
            Ok(vec![(
                constants::HEADER_AUTHORIZATION.to_string(),
                format!("Basic {encoded}"),
            )])
        }
        constants::AUTH_TYPE_BEARER | constants::AUTH_TYPE_OAUTH2 => {
            let token =
                eval_opt_field(auth.token.as_deref(), scope, "token")?.unwrap_or_default();
            Ok(vec![(
                constants::HEADER_AUTHORIZATION.to_string(),
                format!("Bearer {token}"),
            )])
        }
        constants::AUTH_TYPE_API_KEY => {
            let key = eval_opt_field(auth.key.as_deref(), scope, "key")?.unwrap_or_default();
            let value = eval_opt_field(auth.value.as_deref(), scope, "value")?.unwrap_or_default();
            if key.is_empty() {
                return Err(Error::field_evaluation("key", "api_key auth requires a key"));
            }
            Ok(vec![(key, value)])
        }
        other => Err(Error::unsupported_auth_type(other)),
    }
}

/// Evaluates the body payload and encodes it per the effective content
/// type. Form-encoded bodies flatten a top-level map; everything else
/// marshals to JSON and overwrites `Content-Type`.
fn prepare_body(
    data: Option<&Value>,
    headers: &mut IndexMap<String, String>,
    scope: &EvalScope,
) -> Result<Option<Vec<u8>>, Error> {
    let Some(data) = data else {
        return Ok(None);
    };
    let evaluated = expr::evaluate_value(data, scope)
        .map_err(|e| Error::field_evaluation("data", e.to_json().message))?;

    let content_type = header_value(headers, constants::HEADER_CONTENT_TYPE)
        .map(|v| v.to_lowercase())
        .unwrap_or_default();

    if content_type.contains(constants::CONTENT_TYPE_FORM) {
        return form_encode(&evaluated).map(Some);
    }

    let bytes = match &evaluated {
        // A string payload is already rendered text (commonly via
        // `json()`); marshalling it again would double-encode.
        Value::String(s) => s.clone().into_bytes(),
        other => serde_json::to_vec(other)
            .map_err(|e| Error::serialization_error(format!("failed to marshal body: {e}")))?,
    };
    remove_header(headers, constants::HEADER_CONTENT_TYPE);
    headers.insert(
        constants::HEADER_CONTENT_TYPE.to_string(),
        constants::CONTENT_TYPE_JSON.to_string(),
    );
    Ok(Some(bytes))
}

fn form_encode(evaluated: &Value) -> Result<Vec<u8>, Error> {
    match evaluated {
        Value::Object(map) => {
            let pairs: Vec<String> = map
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}={}",
                        urlencoding::encode(k),
                        urlencoding::encode(&expr::stringify(v))
                    )
                })
                .collect();
            Ok(pairs.join("&").into_bytes())
        }
        Value::String(s) => Ok(s.clone().into_bytes()),
        _ => Err(Error::invalid_config(
            "form-encoded body requires a mapping payload",
        )),
    }
}

fn build_client(transport: &ResolvedTransport) -> Result<reqwest::Client, Error> {
    let mut builder = reqwest::Client::builder().timeout(transport.timeout);

    builder = match transport.follow_redirects {
        // Explicit false: hand back the first response untouched
        Some(false) => builder.redirect(reqwest::redirect::Policy::none()),
        // Unset or true: follow with the standard hop cap
        _ => builder.redirect(reqwest::redirect::Policy::default()),
    };

    if let Some(proxy_url) = &transport.proxy {
        let proxy =
            reqwest::Proxy::all(proxy_url).map_err(|_| Error::invalid_proxy_url(proxy_url))?;
        builder = builder.proxy(proxy);
    }

    if let Some(tls) = &transport.tls {
        if tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(ca_file) = &tls.ca_file {
            let pem = std::fs::read(ca_file)
                .map_err(|e| Error::ca_certificate(format!("{ca_file}: {e}")))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| Error::ca_certificate(format!("{ca_file}: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        if let (Some(cert_file), Some(key_file)) = (&tls.cert_file, &tls.key_file) {
            let mut pem = std::fs::read(cert_file)
                .map_err(|e| Error::client_certificate(format!("{cert_file}: {e}")))?;
            let key = std::fs::read(key_file)
                .map_err(|e| Error::client_certificate(format!("{key_file}: {e}")))?;
            pem.extend_from_slice(&key);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| Error::client_certificate(e.to_string()))?;
            builder = builder.identity(identity);
        }
    }

    builder
        .build()
        .map_err(|e| Error::network_request_failed(format!("failed to build HTTP client: {e}")))
}

fn build_header_map(headers: &IndexMap<String, String>) -> Result<HeaderMap, Error> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::invalid_config(format!("invalid header name '{name}': {e}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| Error::invalid_config(format!("invalid value for header '{name}': {e}")))?;
        map.append(header_name, header_value);
    }
    Ok(map)
}

/// Issues the request up to the policy's attempt budget. Transport errors
/// retry whenever a retry config is present; responses retry per the
/// status predicate. The final transport failure comes back as result-map
/// data, never as an engine-level error.
async fn send_with_retry(
    client: &reqwest::Client,
    method: &str,
    url: &str,
    headers: &HeaderMap,
    body: Option<Vec<u8>>,
    retry: Option<&RetryPolicy>,
) -> Result<Value, Error> {
    let method = reqwest::Method::from_bytes(method.as_bytes())
        .map_err(|_| Error::invalid_http_method(method))?;
    let attempts = retry.map_or(1, |r| r.max_attempts.max(1));

    for attempt in 1..=attempts {
        let mut request = client
            .request(method.clone(), url)
            .headers(headers.clone());
        if let Some(bytes) = &body {
            request = request.body(bytes.clone());
        }

        match request.send().await {
            Err(e) => {
                let message = e.to_string();
                if attempt < attempts {
                    if let Some(policy) = retry {
                        debug!(attempt, error = %message, "transport error, retrying");
                        tokio::time::sleep(policy.delay_for(attempt)).await;
                        continue;
                    }
                }
                debug!(attempt, error = %message, "transport failed");
                return Ok(json!({ constants::RESULT_KEY_ERROR: message }));
            }
            Ok(response) => {
                let status = response.status().as_u16();
                if attempt < attempts {
                    if let Some(policy) = retry {
                        if policy.should_retry_status(status) {
                            debug!(attempt, status, "status warrants retry");
                            drop(response);
                            tokio::time::sleep(policy.delay_for(attempt)).await;
                            continue;
                        }
                    }
                }
                return Ok(shape_response(response).await);
            }
        }
    }

    // The loop always returns; attempts is ≥ 1.
    Ok(json!({ constants::RESULT_KEY_ERROR: "no attempts executed" }))
}

/// Shapes a response into the canonical result map: `statusCode`,
/// `status`, `headers` (first value per key), `body`, and `data` when the
/// body parses as JSON. Reading the body consumes the response, closing it
/// on every path.
async fn shape_response(response: reqwest::Response) -> Value {
    let status = response.status();
    let status_line = status.canonical_reason().map_or_else(
        || status.as_u16().to_string(),
        |reason| format!("{} {reason}", status.as_u16()),
    );

    let mut headers = Map::new();
    for name in response.headers().keys() {
        if let Some(value) = response.headers().get(name) {
            headers.insert(
                name.as_str().to_string(),
                Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            );
        }
    }

    let body = match response.text().await {
        Ok(text) => text,
        Err(e) => {
            return json!({ constants::RESULT_KEY_ERROR: format!("failed to read response body: {e}") })
        }
    };

    let mut result = Map::new();
    result.insert("statusCode".to_string(), json!(status.as_u16()));
    result.insert("status".to_string(), Value::String(status_line));
    result.insert("headers".to_string(), Value::Object(headers));
    result.insert("body".to_string(), Value::String(body.clone()));
    if let Ok(parsed) = serde_json::from_str::<Value>(&body) {
        result.insert("data".to_string(), parsed);
    }
    Value::Object(result)
}

fn header_value(headers: &IndexMap<String, String>, name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
}

fn remove_header(headers: &mut IndexMap<String, String>, name: &str) {
    headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> EvalScope {
        EvalScope::new(json!({
            "input": {"user": "ada", "pass": "pw", "n": 2},
            "outputs": {"t": "K"},
        }))
    }

    fn headers_from(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn basic_auth_encodes_credentials() {
        let auth = AuthConfig {
            auth_type: "basic".to_string(),
            username: Some("{{input.user}}".to_string()),
            password: Some("{{input.pass}}".to_string()),
            ..AuthConfig::default()
        };
        let headers = auth_headers(&auth, &scope()).unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].0, "Authorization");
        let expected = format!("Basic {}", BASE64.encode("ada:pw"));
        assert_eq!(headers[0].1, expected);
    }

    #[test]
    fn bearer_and_oauth2_share_shape() {
        for auth_type in ["bearer", "OAuth2", "BEARER"] {
            let auth = AuthConfig {
                auth_type: auth_type.to_string(),
                token: Some("{{get('t')}}".to_string()),
                ..AuthConfig::default()
            };
            let headers = auth_headers(&auth, &scope()).unwrap();
            assert_eq!(headers[0], ("Authorization".to_string(), "Bearer K".to_string()));
        }
    }

    #[test]
    fn api_key_uses_custom_header() {
        let auth = AuthConfig {
            auth_type: "api_key".to_string(),
            key: Some("X-Api-Key".to_string()),
            value: Some("{{get('t')}}".to_string()),
            ..AuthConfig::default()
        };
        let headers = auth_headers(&auth, &scope()).unwrap();
        assert_eq!(headers[0], ("X-Api-Key".to_string(), "K".to_string()));
    }

    #[test]
    fn unknown_auth_type_is_rejected() {
        let auth = AuthConfig {
            auth_type: "digest".to_string(),
            ..AuthConfig::default()
        };
        let err = auth_headers(&auth, &scope()).unwrap_err().to_string();
        assert!(err.contains("unsupported auth type: digest"));
    }

    #[test]
    fn auth_field_eval_failure_names_the_field() {
        let auth = AuthConfig {
            auth_type: "bearer".to_string(),
            token: Some("{{1 / 0}}".to_string()),
            ..AuthConfig::default()
        };
        let err = auth_headers(&auth, &scope()).unwrap_err().to_string();
        assert!(err.contains("failed to evaluate token"));
    }

    #[test]
    fn method_defaults_to_get_and_uppercases() {
        assert_eq!(resolve_method(None, &scope()).unwrap(), "GET");
        assert_eq!(resolve_method(Some(""), &scope()).unwrap(), "GET");
        assert_eq!(resolve_method(Some("post"), &scope()).unwrap(), "POST");
    }

    #[test]
    fn json_body_sets_content_type() {
        let mut headers = headers_from(&[("Content-Type", "text/plain")]);
        let data = json!({"count": "{{input.n}}"});
        let body = prepare_body(Some(&data), &mut headers, &scope())
            .unwrap()
            .unwrap();
        assert_eq!(body, br#"{"count":2}"#);
        assert_eq!(
            header_value(&headers, "Content-Type").as_deref(),
            Some("application/json")
        );
    }

    #[test]
    fn string_body_is_sent_raw() {
        let mut headers = IndexMap::new();
        let data = json!("{{json(input)}}");
        let body = prepare_body(Some(&data), &mut headers, &scope())
            .unwrap()
            .unwrap();
        let text = String::from_utf8(body).unwrap();
        // Raw JSON text, not a double-encoded JSON string
        assert!(text.starts_with('{'));
        assert!(serde_json::from_str::<Value>(&text).is_ok());
    }

    #[test]
    fn form_body_flattens_top_level_map() {
        let mut headers = headers_from(&[("Content-Type", "application/x-www-form-urlencoded")]);
        let data = json!({"a": "x y", "n": "{{input.n}}", "nested": {"k": 1}});
        let body = prepare_body(Some(&data), &mut headers, &scope())
            .unwrap()
            .unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("a=x%20y"));
        assert!(text.contains("n=2"));
        // Nested values stringify to JSON text before encoding
        assert!(text.contains("nested="));
        // Form routing leaves Content-Type alone
        assert!(header_value(&headers, "Content-Type")
            .unwrap()
            .contains("form-urlencoded"));
    }

    #[test]
    fn absent_data_means_no_body() {
        let mut headers = IndexMap::new();
        assert!(prepare_body(None, &mut headers, &scope())
            .unwrap()
            .is_none());
        assert!(headers.is_empty());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = headers_from(&[("authorization", "Bearer x")]);
        assert_eq!(
            header_value(&headers, "Authorization").as_deref(),
            Some("Bearer x")
        );
        let mut headers = headers;
        remove_header(&mut headers, "AUTHORIZATION");
        assert!(headers.is_empty());
    }

    #[test]
    fn invalid_proxy_url_is_a_config_error() {
        let transport = ResolvedTransport {
            timeout: Duration::from_secs(5),
            follow_redirects: None,
            proxy: Some("::not a url::".to_string()),
            tls: None,
        };
        let err = build_client(&transport).unwrap_err().to_string();
        assert!(err.contains("invalid proxy URL"));
    }

    #[test]
    fn missing_client_certificate_files_fail() {
        let transport = ResolvedTransport {
            timeout: Duration::from_secs(5),
            follow_redirects: None,
            proxy: None,
            tls: Some(ResolvedTls {
                insecure_skip_verify: false,
                cert_file: Some("/nonexistent/cert.pem".to_string()),
                key_file: Some("/nonexistent/key.pem".to_string()),
                ca_file: None,
            }),
        };
        let err = build_client(&transport).unwrap_err().to_string();
        assert!(err.contains("failed to load client certificate"));
    }

    #[test]
    fn header_expression_failures_propagate() {
        let config = HttpConfig {
            url: "http://example.com".to_string(),
            headers: headers_from(&[("X-Calc", "{{1 / 0}}")]),
            ..HttpConfig::default()
        };
        let err = resolve_headers(&config, &scope()).unwrap_err().to_string();
        assert!(err.contains("failed to evaluate header 'X-Calc'"));
    }

    #[test]
    fn user_agent_injected_when_absent() {
        let config = HttpConfig {
            url: "http://example.com".to_string(),
            ..HttpConfig::default()
        };
        let headers = resolve_headers(&config, &scope()).unwrap();
        assert!(header_value(&headers, "User-Agent")
            .unwrap()
            .starts_with("weft/"));
    }

    #[test]
    fn explicit_user_agent_is_kept() {
        let config = HttpConfig {
            url: "http://example.com".to_string(),
            headers: headers_from(&[("user-agent", "custom/1.0")]),
            ..HttpConfig::default()
        };
        let headers = resolve_headers(&config, &scope()).unwrap();
        assert_eq!(
            header_value(&headers, "User-Agent").as_deref(),
            Some("custom/1.0")
        );
    }

    #[test]
    fn auth_wins_over_explicit_header() {
        let config = HttpConfig {
            url: "http://example.com".to_string(),
            headers: headers_from(&[("Authorization", "Bearer stale")]),
            auth: Some(AuthConfig {
                auth_type: "bearer".to_string(),
                token: Some("fresh".to_string()),
                ..AuthConfig::default()
            }),
            ..HttpConfig::default()
        };
        let headers = resolve_headers(&config, &scope()).unwrap();
        assert_eq!(
            header_value(&headers, "Authorization").as_deref(),
            Some("Bearer fresh")
        );
    }
}
