use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    db::store::{Filter, Store, StoreError},
    models::{content::WEBSITES, website::Website},
    services::{cache::Cache, metrics},
};

/// Query parameters that name a website explicitly, in precedence order.
pub const OVERRIDE_PARAMS: [&str; 2] = ["site", "website"];

/// First labels that mean "no tenant, serve the app shell".
const RESERVED_LABELS: [&str; 2] = ["www", "admin"];

/// Picks the tenant key for a request.
///
/// An explicit `site`/`website` query parameter wins and is returned as given.
/// Otherwise the first label of a `sub.domain.tld` host is used, unless it is
/// reserved. Loopback and other IP literals never name a tenant.
pub fn identify_tenant(host: &str, query: &HashMap<String, String>) -> Option<String> {
    if let Some(key) = OVERRIDE_PARAMS
        .iter()
        .filter_map(|p| query.get(*p))
        .find(|v| !v.is_empty())
    {
        return Some(key.clone());
    }

    let domain = strip_port(host.trim());
    if domain.eq_ignore_ascii_case("localhost") || domain.parse::<IpAddr>().is_ok() {
        return None;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 3 || labels.iter().any(|l| l.is_empty()) {
        return None;
    }

    let subdomain = labels[0].to_ascii_lowercase();
    if RESERVED_LABELS.contains(&subdomain.as_str()) {
        return None;
    }
    Some(subdomain)
}

/// `example.com:8080` -> `example.com`, `[::1]:3000` -> `::1`.
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    // A bare IPv6 literal has several colons and no port
    if host.matches(':').count() > 1 {
        return host;
    }
    host.split(':').next().unwrap_or(host)
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Tenant not found")]
    NotFound,

    /// The website exists but is hidden from anonymous callers.
    #[error("Tenant is inactive")]
    Inactive,

    #[error("Tenant lookup failed: {0}")]
    Store(#[from] StoreError),
}

/// Maps tenant keys to website records, caching hits for a short TTL.
pub struct TenantResolver {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache<Website>>,
}

impl TenantResolver {
    pub fn new(store: Arc<dyn Store>, cache: Arc<dyn Cache<Website>>) -> Self {
        Self { store, cache }
    }

    /// Anonymous callers only see active websites; authenticated callers also
    /// see inactive ones so they can preview them.
    pub async fn resolve(
        &self,
        key: Option<&str>,
        authenticated: bool,
    ) -> Result<Website, ResolveError> {
        let result = self.lookup(key, authenticated).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(ResolveError::NotFound) => "not_found",
            Err(ResolveError::Inactive) => "inactive",
            Err(ResolveError::Store(_)) => "error",
        };
        metrics::RESOLUTIONS_COUNTER.with_label_values(&[outcome]).inc();
        result
    }

    async fn lookup(&self, key: Option<&str>, authenticated: bool) -> Result<Website, ResolveError> {
        let key = key.ok_or(ResolveError::NotFound)?;
        let cache_key = format!("{key}:{authenticated}");

        if let Some(website) = self.cache.get(&cache_key) {
            metrics::RESOLVER_CACHE_COUNTER.with_label_values(&["hit"]).inc();
            return Ok(website);
        }
        metrics::RESOLVER_CACHE_COUNTER.with_label_values(&["miss"]).inc();

        let mut filters = vec![Filter::eq("subdomain", key)];
        if !authenticated {
            filters.push(Filter::eq("is_active", true));
        }

        let rows = self.store.select(WEBSITES, &filters, &[]).await?;
        if let Some(row) = rows.into_iter().next() {
            let website: Website = serde_json::from_value(Value::Object(row))
                .map_err(StoreError::from)?;
            self.cache.set(cache_key, website.clone());
            return Ok(website);
        }

        if authenticated {
            return Err(ResolveError::NotFound);
        }

        // Only existence matters here; nothing from the hidden row is returned.
        let exists = !self
            .store
            .select(WEBSITES, &[Filter::eq("subdomain", key)], &[])
            .await?
            .is_empty();
        if exists {
            debug!("website {key} exists but is inactive");
            Err(ResolveError::Inactive)
        } else {
            Err(ResolveError::NotFound)
        }
    }
}

/// Logs store failures with the key that triggered them.
pub fn log_resolve_failure(key: Option<&str>, err: &ResolveError) {
    if let ResolveError::Store(e) = err {
        warn!("tenant resolution for {:?} failed: {e}", key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::services::cache::MemoryCache;
    use serde_json::json;
    use std::time::Duration;

    fn no_query() -> HashMap<String, String> {
        HashMap::new()
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn short_hosts_have_no_tenant() {
        for host in ["", "localhost", "example", "example.com", "example.com:443", "localhost:3000"] {
            assert_eq!(identify_tenant(host, &no_query()), None, "{host}");
        }
    }

    #[test]
    fn reserved_labels_have_no_tenant() {
        for host in ["www.example.com", "admin.example.com", "WWW.example.co.uk", "admin.a.b.c"] {
            assert_eq!(identify_tenant(host, &no_query()), None, "{host}");
        }
    }

    #[test]
    fn subdomain_is_extracted() {
        assert_eq!(identify_tenant("acme.example.com", &no_query()), Some("acme".into()));
        assert_eq!(identify_tenant("Acme.example.com:8080", &no_query()), Some("acme".into()));
        assert_eq!(identify_tenant("cafe-12.sites.example.com", &no_query()), Some("cafe-12".into()));
    }

    #[test]
    fn ip_literals_and_empty_labels_have_no_tenant() {
        for host in ["127.0.0.1", "127.0.0.1:8080", "10.0.0.5", "[::1]:3000", "::1", "a..b"] {
            assert_eq!(identify_tenant(host, &no_query()), None, "{host}");
        }
    }

    #[test]
    fn override_parameter_wins_regardless_of_host() {
        for host in ["", "localhost", "www.example.com", "acme.example.com"] {
            assert_eq!(identify_tenant(host, &query(&[("site", "x")])), Some("x".into()));
        }
        assert_eq!(
            identify_tenant("acme.example.com", &query(&[("website", "Bistro")])),
            Some("Bistro".into())
        );
        assert_eq!(
            identify_tenant("a.b.c", &query(&[("site", "one"), ("website", "two")])),
            Some("one".into())
        );
        assert_eq!(
            identify_tenant("acme.example.com", &query(&[("site", "")])),
            Some("acme".into())
        );
    }

    async fn seeded() -> (Arc<MemoryStore>, Website, Website) {
        let store = Arc::new(MemoryStore::new());
        let rows = store
            .insert(
                WEBSITES,
                vec![
                    json!({ "subdomain": "acme", "display_title": "Acme", "is_active": true }),
                    json!({ "subdomain": "hidden", "display_title": "Hidden", "is_active": false }),
                ]
                .into_iter()
                .map(|v| v.as_object().cloned().unwrap())
                .collect(),
            )
            .await
            .unwrap();
        let parse = |i: usize| -> Website { serde_json::from_value(Value::Object(rows[i].clone())).unwrap() };
        (store.clone(), parse(0), parse(1))
    }

    fn resolver(store: Arc<MemoryStore>) -> TenantResolver {
        TenantResolver::new(store, Arc::new(MemoryCache::with_ttl(Duration::from_secs(5))))
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let (store, _, _) = seeded().await;
        let err = resolver(store.clone()).resolve(None, true).await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound));
        assert_eq!(store.select_count(), 0);
    }

    #[tokio::test]
    async fn inactive_website_is_visible_only_when_authenticated() {
        let (store, _, hidden) = seeded().await;
        let resolver = resolver(store);

        let err = resolver.resolve(Some("hidden"), false).await.unwrap_err();
        assert!(matches!(err, ResolveError::Inactive));

        let website = resolver.resolve(Some("hidden"), true).await.unwrap();
        assert_eq!(website.id, hidden.id);
    }

    #[tokio::test]
    async fn unknown_website_is_not_found_for_everyone() {
        let (store, _, _) = seeded().await;
        let resolver = resolver(store);
        assert!(matches!(
            resolver.resolve(Some("nope"), false).await,
            Err(ResolveError::NotFound)
        ));
        assert!(matches!(
            resolver.resolve(Some("nope"), true).await,
            Err(ResolveError::NotFound)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn hits_are_cached_for_the_ttl() {
        let (store, acme, _) = seeded().await;
        let resolver = resolver(store.clone());

        assert_eq!(resolver.resolve(Some("acme"), false).await.unwrap().id, acme.id);
        assert_eq!(resolver.resolve(Some("acme"), false).await.unwrap().id, acme.id);
        assert_eq!(store.select_count(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(resolver.resolve(Some("acme"), false).await.unwrap().id, acme.id);
        assert_eq!(store.select_count(), 2);
    }

    #[tokio::test]
    async fn authentication_is_part_of_the_cache_key() {
        let (store, _, _) = seeded().await;
        let resolver = resolver(store.clone());

        resolver.resolve(Some("acme"), false).await.unwrap();
        resolver.resolve(Some("acme"), true).await.unwrap();
        assert_eq!(store.select_count(), 2);
    }

    #[tokio::test]
    async fn misses_and_failures_are_not_cached() {
        let (store, _, _) = seeded().await;
        let resolver = resolver(store.clone());

        store.fail_table(WEBSITES);
        assert!(matches!(
            resolver.resolve(Some("acme"), false).await,
            Err(ResolveError::Store(_))
        ));
        store.heal(WEBSITES);

        assert!(resolver.resolve(Some("acme"), false).await.is_ok());
        let _ = resolver.resolve(Some("nope"), true).await;
        let _ = resolver.resolve(Some("nope"), true).await;
        // 1 failed + 1 success + 2 uncached misses
        assert_eq!(store.select_count(), 4);
    }
}
