use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sitebuilder_api::{config::Config, db, db::store::PgStore, routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database connected and migrations applied");

    let store = Arc::new(PgStore::new(
        pool,
        Duration::from_secs(config.store_timeout_secs),
    ));
    let state = AppState::new(store, config.clone());

    // Public pages are served from tenant subdomains of the app base domain.
    // In development (localhost), all local origins are allowed.
    let base_url = config.app_base_url.clone();
    let cors_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let Ok(o) = origin.to_str() else {
            return false;
        };
        if o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1") {
            return true;
        }
        if o == base_url {
            return true;
        }
        if let Some(idx) = base_url.find("://") {
            let after_scheme = &base_url[idx + 3..];
            let domain = after_scheme.split('/').next().unwrap_or(after_scheme);
            let domain_clean = domain.split(':').next().unwrap_or(domain);
            if o.contains(&format!(".{domain_clean}")) {
                return true;
            }
        }
        false
    });

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::HeaderName::from_static("x-super-admin-key"),
        ]))
        .allow_origin(cors_origin);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::metrics_handler))
        // Public site
        .route("/site", get(routes::site::get_site))
        .route("/site/sections/{section}", get(routes::site::get_section))
        // Super-admin
        .route(
            "/super-admin/websites/{id}/sections/{section}",
            put(routes::websites::set_section),
        )
        .route(
            "/super-admin/websites/{id}/provision",
            post(routes::websites::provision_website),
        )
        .route(
            "/super-admin/sections/invalidate",
            post(routes::websites::invalidate_sections),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("site builder API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
