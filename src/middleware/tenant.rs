use std::collections::HashMap;

use axum::{
    extract::{FromRequestParts, Query},
    http::{request::Parts, StatusCode},
    Json,
};
use serde_json::{json, Value};

use crate::{
    middleware::auth::MaybeUser,
    models::website::Website,
    services::tenant::{identify_tenant, log_resolve_failure, ResolveError},
    AppState,
};

/// The website a request belongs to, identified from the `site`/`website`
/// query parameter or the Host subdomain.
///
/// Anonymous callers only reach active websites; callers with a valid bearer
/// token may also open inactive ones.
#[derive(Debug, Clone)]
pub struct CurrentWebsite(pub Website);

impl FromRequestParts<AppState> for CurrentWebsite {
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let query: HashMap<String, String> = Query::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .unwrap_or_default();
        let host = parts
            .headers
            .get("Host")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let key = identify_tenant(host, &query);

        let user = MaybeUser::from_request_parts(parts, state)
            .await
            .map_err(|(status, msg)| (status, Json(json!({ "error": msg }))))?;

        state
            .resolver
            .resolve(key.as_deref(), user.is_authenticated())
            .await
            .map(CurrentWebsite)
            .map_err(|e| {
                log_resolve_failure(key.as_deref(), &e);
                rejection(&e)
            })
    }
}

fn rejection(err: &ResolveError) -> (StatusCode, Json<Value>) {
    match err {
        ResolveError::NotFound => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Site not found", "code": "site_not_found" })),
        ),
        ResolveError::Inactive => (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "This site is currently unavailable", "code": "site_inactive" })),
        ),
        ResolveError::Store(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "Site lookup temporarily unavailable" })),
        ),
    }
}
