//! Response caching over the run's memory store.
//!
//! Each caching executor derives a string key, either from the
//! configured custom key or from the request identity, prefixed per
//! kind, and stores the shaped result map under it. Entries round-trip
//! through the memory store's JSON path, so numeric fields may come back
//! widened to floating point. TTL is resolved but not enforced here; the
//! store owns eviction policy.

use crate::constants;
use crate::error::Error;
use crate::executors::eval_opt_field;
use crate::expr::EvalScope;
use crate::store::MemoryStore;
use crate::workflow::CacheConfig;
use serde_json::Value;
use tracing::debug;

/// Cache configuration with its expression-bearing fields resolved.
#[derive(Debug, Clone, Default)]
pub struct ResolvedCache {
    pub enabled: bool,
    pub key: Option<String>,
    /// Resolved but unused: eviction is the store's concern.
    pub ttl: Option<String>,
}

impl ResolvedCache {
    /// Evaluates the `key` and `ttl` expressions of a cache configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when a field expression fails to evaluate.
    pub fn resolve(
        config: Option<&CacheConfig>,
        scope: &EvalScope,
    ) -> Result<Option<Self>, Error> {
        let Some(config) = config else {
            return Ok(None);
        };
        let key = eval_opt_field(config.key.as_deref(), scope, "cache.key")?
            .filter(|k| !k.is_empty());
        let ttl = eval_opt_field(config.ttl.as_deref(), scope, "cache.ttl")?;
        Ok(Some(Self {
            enabled: config.enabled,
            key,
            ttl,
        }))
    }
}

/// Computes the HTTP cache key: the custom key when configured, otherwise
/// method + URL, suffixed with the tail of the `Authorization` header when
/// one is present so differently-authenticated calls stay distinct.
#[must_use]
pub fn http_cache_key(
    cache: &ResolvedCache,
    method: &str,
    url: &str,
    auth_header: Option<&str>,
) -> String {
    if let Some(custom) = &cache.key {
        return format!("{}{custom}", constants::CACHE_PREFIX_HTTP);
    }
    let mut key = format!("{}{method}_{url}", constants::CACHE_PREFIX_HTTP);
    if let Some(auth) = auth_header {
        key.push('_');
        key.push_str(tail(auth, constants::CACHE_AUTH_SUFFIX_LEN));
    }
    key
}

/// Derives a cache key for a non-HTTP executor from its identity parts.
#[must_use]
pub fn derived_cache_key(prefix: &str, cache: &ResolvedCache, parts: &[&str]) -> String {
    cache.key.as_ref().map_or_else(
        || format!("{prefix}{}", parts.join("_")),
        |custom| format!("{prefix}{custom}"),
    )
}

/// Returns a cached result map when caching is enabled and the key hits.
#[must_use]
pub fn check(store: &MemoryStore, key: &str) -> Option<Value> {
    let hit = store.get(key);
    if hit.is_some() {
        debug!(%key, "cache hit");
    }
    hit
}

/// Stores a shaped result map under the key. Storage failures are logged
/// and swallowed; a failed cache write must not fail the resource.
pub fn put(store: &MemoryStore, key: &str, value: &Value) {
    if let Err(e) = store.set(key, value) {
        debug!(%key, error = %e, "cache store failed");
    }
}

/// Last `n` characters of a string (char-boundary safe).
fn tail(s: &str, n: usize) -> &str {
    let count = s.chars().count();
    if count <= n {
        return s;
    }
    let skip = count - n;
    let (idx, _) = s.char_indices().nth(skip).unwrap_or((0, ' '));
    &s[idx..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> EvalScope {
        EvalScope::new(json!({"input": {"k": "dyn"}}))
    }

    #[test]
    fn resolve_absent_config() {
        assert!(ResolvedCache::resolve(None, &scope()).unwrap().is_none());
    }

    #[test]
    fn resolve_evaluates_key_expression() {
        let cfg = CacheConfig {
            enabled: true,
            key: Some("{{input.k}}".to_string()),
            ttl: None,
        };
        let resolved = ResolvedCache::resolve(Some(&cfg), &scope())
            .unwrap()
            .unwrap();
        assert_eq!(resolved.key.as_deref(), Some("dyn"));
    }

    #[test]
    fn empty_key_falls_back_to_derived() {
        let cfg = CacheConfig {
            enabled: true,
            key: Some(String::new()),
            ttl: None,
        };
        let resolved = ResolvedCache::resolve(Some(&cfg), &scope())
            .unwrap()
            .unwrap();
        assert!(resolved.key.is_none());
    }

    #[test]
    fn custom_key_wins() {
        let cache = ResolvedCache {
            enabled: true,
            key: Some("K1".to_string()),
            ttl: None,
        };
        assert_eq!(
            http_cache_key(&cache, "GET", "http://x", None),
            "http_cache_K1"
        );
    }

    #[test]
    fn derived_key_includes_method_and_url() {
        let cache = ResolvedCache {
            enabled: true,
            key: None,
            ttl: None,
        };
        assert_eq!(
            http_cache_key(&cache, "GET", "http://srv/ok", None),
            "http_cache_GET_http://srv/ok"
        );
    }

    #[test]
    fn auth_header_suffix_distinguishes_callers() {
        let cache = ResolvedCache {
            enabled: true,
            key: None,
            ttl: None,
        };
        let k1 = http_cache_key(&cache, "GET", "http://srv", Some("Bearer aaaaaaaaaaaa"));
        let k2 = http_cache_key(&cache, "GET", "http://srv", Some("Bearer bbbbbbbbbbbb"));
        assert_ne!(k1, k2);
        assert!(k1.ends_with("aaaaaaaaaaaa"));
    }

    #[test]
    fn identical_auth_yields_identical_key() {
        let cache = ResolvedCache {
            enabled: true,
            key: None,
            ttl: None,
        };
        let a = http_cache_key(&cache, "GET", "http://srv", Some("Bearer tok"));
        let b = http_cache_key(&cache, "GET", "http://srv", Some("Bearer tok"));
        assert_eq!(a, b);
    }

    #[test]
    fn tail_is_char_boundary_safe() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
        assert_eq!(tail("héllo", 2), "lo");
    }

    #[test]
    fn check_and_put_round_trip() {
        let store = MemoryStore::new();
        assert!(check(&store, "k").is_none());
        put(&store, "k", &json!({"statusCode": 200}));
        let hit = check(&store, "k").unwrap();
        assert_eq!(hit["statusCode"], 200);
    }

    #[test]
    fn derived_cache_key_joins_parts() {
        let cache = ResolvedCache {
            enabled: true,
            key: None,
            ttl: None,
        };
        assert_eq!(
            derived_cache_key("sql_cache_", &cache, &["sqlite", "SELECT 1"]),
            "sql_cache_sqlite_SELECT 1"
        );
    }
}
