use std::collections::BTreeSet;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    middleware::super_admin::SuperAdminAuth,
    models::{
        provision::{InvalidateSectionsRequest, ProvisionRequest, SetSectionRequest},
        website::Section,
    },
    services::provisioning::ProvisionError,
    AppState,
};

type ApiError = (StatusCode, Json<Value>);

fn bad_request(message: String) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

/// Parses caller-supplied section names; unknown names are rejected.
fn parse_sections(names: &[String]) -> Result<BTreeSet<Section>, ApiError> {
    names
        .iter()
        .map(|n| n.parse::<Section>().map_err(|e| bad_request(e.to_string())))
        .collect()
}

/// PUT /super-admin/websites/{id}/sections/{section}
pub async fn set_section(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path((website_id, name)): Path<(Uuid, String)>,
    Json(body): Json<SetSectionRequest>,
) -> Result<Json<Value>, ApiError> {
    let section = name
        .parse::<Section>()
        .map_err(|e| bad_request(e.to_string()))?;

    state
        .sections
        .set_section(website_id, section, body.is_enabled, body.display_order)
        .await
        .map(|flag| Json(json!(flag)))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))))
}

/// POST /super-admin/websites/{id}/provision
pub async fn provision_website(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(website_id): Path<Uuid>,
    Json(body): Json<ProvisionRequest>,
) -> Result<Json<Value>, ApiError> {
    let enabled = body
        .enabled_sections
        .as_deref()
        .map(parse_sections)
        .transpose()?;

    let report = state
        .provisioner
        .provision(website_id, body.source_website_id, enabled.as_ref())
        .await
        .map_err(|e| provision_rejection(&e))?;

    Ok(Json(json!(report)))
}

fn provision_rejection(err: &ProvisionError) -> ApiError {
    match err {
        ProvisionError::Step {
            table, operation, ..
        } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": format!("Provisioning failed: {err}"),
                "table": table,
                "operation": operation.to_string(),
                "retryable": true,
            })),
        ),
        ProvisionError::TemplateNotFound(_)
        | ProvisionError::SourceNotFound(_)
        | ProvisionError::TargetNotFound(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": err.to_string() })),
        ),
        ProvisionError::SameTenant(_) => bad_request(err.to_string()),
        ProvisionError::AlreadyRunning(_) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": err.to_string() })),
        ),
    }
}

/// POST /super-admin/sections/invalidate. An empty body `{}` clears every website.
pub async fn invalidate_sections(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Json(body): Json<InvalidateSectionsRequest>,
) -> Json<Value> {
    let website_id = body.website_id;
    state.sections.invalidate(website_id);
    Json(json!({ "invalidated": website_id.map_or_else(|| "all".to_string(), |id| id.to_string()) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::StoreError;
    use crate::services::provisioning::Operation;

    #[test]
    fn section_lists_are_validated() {
        let parsed = parse_sections(&["hero".to_string(), "menu".to_string(), "hero".to_string()]).unwrap();
        assert_eq!(parsed, BTreeSet::from([Section::Hero, Section::Menu]));

        let (status, Json(body)) = parse_sections(&["hero".to_string(), "blog".to_string()]).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unknown section: blog");
    }

    #[test]
    fn step_failures_report_table_and_operation() {
        let err = ProvisionError::Step {
            table: "menu_items",
            operation: Operation::Insert,
            source: StoreError::Unavailable("down".into()),
        };
        let (status, Json(body)) = provision_rejection(&err);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["table"], "menu_items");
        assert_eq!(body["operation"], "insert");

        assert_eq!(
            provision_rejection(&ProvisionError::AlreadyRunning(Uuid::nil())).0,
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn unknown_websites_are_not_found() {
        let id = Uuid::new_v4();
        for err in [ProvisionError::SourceNotFound(id), ProvisionError::TargetNotFound(id)] {
            let (status, Json(body)) = provision_rejection(&err);
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert!(body["error"].as_str().unwrap().contains(&id.to_string()));
        }
    }
}
