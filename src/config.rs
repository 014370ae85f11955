use std::env;

use crate::models::website::DEFAULT_TEMPLATE_SUBDOMAIN;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub super_admin_key: String,
    pub host: String,
    pub port: u16,
    pub app_base_url: String,
    /// Subdomain of the website cloned into new websites by default.
    pub template_subdomain: String,
    pub resolver_cache_ttl_secs: u64,
    /// Upper bound for a single store round trip.
    pub store_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            super_admin_key: env::var("SUPER_ADMIN_KEY")
                .unwrap_or_else(|_| "change_this_super_admin_key".into()),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            app_base_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost".into()),
            template_subdomain: env::var("TEMPLATE_SUBDOMAIN")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_TEMPLATE_SUBDOMAIN.into()),
            resolver_cache_ttl_secs: env::var("RESOLVER_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "5".into())
                .parse()?,
            store_timeout_secs: env::var("STORE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "5".into())
                .parse()?,
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {}", key))
}
