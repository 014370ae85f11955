// Library exports for the API binary, the provisioning CLI and tests
pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use config::Config;
use db::store::Store;
use services::{
    cache::MemoryCache, provisioning::TemplateProvisioner, sections::SectionGate,
    tenant::TenantResolver,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
    pub resolver: Arc<TenantResolver>,
    pub sections: Arc<SectionGate>,
    pub provisioner: Arc<TemplateProvisioner>,
}

impl AppState {
    /// Wires the resolver, gate and provisioner around one store.
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        let resolver = Arc::new(TenantResolver::new(
            store.clone(),
            Arc::new(MemoryCache::with_ttl(Duration::from_secs(
                config.resolver_cache_ttl_secs,
            ))),
        ));
        let sections = Arc::new(SectionGate::new(
            store.clone(),
            Arc::new(MemoryCache::unbounded()),
        ));
        let provisioner = Arc::new(TemplateProvisioner::new(
            store.clone(),
            sections.clone(),
            config.template_subdomain.clone(),
        ));

        Self {
            store,
            config,
            resolver,
            sections,
            provisioner,
        }
    }
}
