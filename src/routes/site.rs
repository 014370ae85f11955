use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::{middleware::tenant::CurrentWebsite, models::website::Section, AppState};

/// GET /site: the resolved website and the sections its page renders.
pub async fn get_site(
    State(state): State<AppState>,
    CurrentWebsite(website): CurrentWebsite,
) -> Json<Value> {
    let sections = state.sections.list_enabled(website.id).await;
    Json(json!({
        "id": website.id,
        "subdomain": website.subdomain,
        "display_title": website.display_title,
        "is_active": website.is_active,
        "sections": sections,
    }))
}

/// GET /site/sections/{section}
pub async fn get_section(
    State(state): State<AppState>,
    CurrentWebsite(website): CurrentWebsite,
    Path(name): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let section = name
        .parse::<Section>()
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))))?;

    let enabled = state.sections.is_enabled(website.id, section).await;
    Ok(Json(json!({ "section": section, "enabled": enabled })))
}
