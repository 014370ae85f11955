use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body for POST /super-admin/websites/{id}/provision.
#[derive(Debug, Default, Deserialize)]
pub struct ProvisionRequest {
    /// Defaults to the template website.
    pub source_website_id: Option<Uuid>,
    /// Section names to enable. When absent the source's own flags are copied.
    pub enabled_sections: Option<Vec<String>>,
}

/// Body for PUT /super-admin/websites/{id}/sections/{section}.
#[derive(Debug, Deserialize)]
pub struct SetSectionRequest {
    pub is_enabled: bool,
    pub display_order: Option<i32>,
}

/// Body for POST /super-admin/sections/invalidate.
#[derive(Debug, Default, Deserialize)]
pub struct InvalidateSectionsRequest {
    pub website_id: Option<Uuid>,
}

/// Outcome of a successful provisioning run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisionReport {
    pub source_website_id: Uuid,
    pub target_website_id: Uuid,
    /// Rows written per table.
    pub rows: BTreeMap<&'static str, usize>,
}
