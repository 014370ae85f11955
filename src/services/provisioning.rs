use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    db::store::{row_from, row_id, Filter, OrderBy, Row, Store, StoreError},
    models::{
        content::{
            Hierarchy, HIERARCHIES, INDEPENDENT_COLLECTIONS, SECTION_SETTINGS, SINGLETON_TABLES,
            SYSTEM_COLUMNS, TENANT_COLUMN, WEBSITES,
        },
        provision::ProvisionReport,
        website::{Section, TenantId},
    },
    services::{metrics, sections::SectionGate},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Select => "select",
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// A store call failed. Earlier steps are not rolled back; rerunning is safe.
    #[error("{operation} on {table} failed: {source}")]
    Step {
        table: &'static str,
        operation: Operation,
        #[source]
        source: StoreError,
    },

    #[error("template website '{0}' not found")]
    TemplateNotFound(String),

    #[error("source website {0} not found")]
    SourceNotFound(Uuid),

    #[error("target website {0} not found")]
    TargetNotFound(Uuid),

    #[error("source and target website are the same ({0})")]
    SameTenant(Uuid),

    #[error("provisioning already in progress for website {0}")]
    AlreadyRunning(Uuid),
}

fn step(table: &'static str, operation: Operation) -> impl FnOnce(StoreError) -> ProvisionError {
    move |source| ProvisionError::Step {
        table,
        operation,
        source,
    }
}

/// Copy of a source row ready to insert for `target`: store-owned columns
/// dropped, tenant column rewritten.
fn content_of(row: &Row, target: TenantId) -> Row {
    let mut copy: Row = row
        .iter()
        .filter(|(column, _)| !SYSTEM_COLUMNS.contains(&column.as_str()))
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect();
    copy.insert(TENANT_COLUMN.into(), Value::String(target.to_string()));
    copy
}

fn collection_order() -> [OrderBy; 2] {
    [OrderBy::asc("display_order"), OrderBy::asc("created_at")]
}

/// Removes the target from the in-flight set when a run ends, however it ends.
struct RunGuard<'a> {
    running: &'a Mutex<HashSet<TenantId>>,
    target: TenantId,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.lock().remove(&self.target);
    }
}

/// Clones a source website's content graph into a target website.
///
/// Every step is delete-then-insert or upsert, so a run that failed halfway can
/// simply be started again.
pub struct TemplateProvisioner {
    store: Arc<dyn Store>,
    gate: Arc<SectionGate>,
    template_subdomain: String,
    running: Mutex<HashSet<TenantId>>,
}

impl TemplateProvisioner {
    pub fn new(store: Arc<dyn Store>, gate: Arc<SectionGate>, template_subdomain: impl Into<String>) -> Self {
        Self {
            store,
            gate,
            template_subdomain: template_subdomain.into(),
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Looks up a website id by subdomain regardless of its active flag.
    pub async fn website_id(&self, subdomain: &str) -> Result<Option<TenantId>, ProvisionError> {
        let rows = self
            .store
            .select(WEBSITES, &[Filter::eq("subdomain", subdomain)], &[])
            .await
            .map_err(step(WEBSITES, Operation::Select))?;
        Ok(rows.first().and_then(row_id))
    }

    async fn website_exists(&self, id: TenantId) -> Result<bool, ProvisionError> {
        let rows = self
            .store
            .select(WEBSITES, &[Filter::eq("id", id.to_string())], &[])
            .await
            .map_err(step(WEBSITES, Operation::Select))?;
        Ok(!rows.is_empty())
    }

    /// Copies every content table from `source` (the template website when
    /// `None`) into `target`.
    ///
    /// With `enabled_sections`, membership in that set decides every section
    /// flag. Without it the source flags are copied, except that special offers
    /// start disabled.
    pub async fn provision(
        &self,
        target: TenantId,
        source: Option<TenantId>,
        enabled_sections: Option<&BTreeSet<Section>>,
    ) -> Result<ProvisionReport, ProvisionError> {
        if !self.running.lock().insert(target) {
            return Err(ProvisionError::AlreadyRunning(target));
        }
        let _guard = RunGuard {
            running: &self.running,
            target,
        };

        let result = self.run(target, source, enabled_sections).await;
        // Flags may have been replaced even when a later step failed
        self.gate.invalidate(Some(target));

        match &result {
            Ok(report) => {
                metrics::PROVISION_RUNS_COUNTER.with_label_values(&["ok"]).inc();
                for (table, count) in &report.rows {
                    metrics::PROVISION_ROWS_COUNTER
                        .with_label_values(&[*table])
                        .inc_by(*count as f64);
                }
                info!(
                    "provisioned website {target} from {}: {} rows",
                    report.source_website_id,
                    report.rows.values().sum::<usize>()
                );
            }
            Err(e) => {
                metrics::PROVISION_RUNS_COUNTER.with_label_values(&["error"]).inc();
                error!("provisioning website {target} aborted: {e}");
            }
        }
        result
    }

    async fn run(
        &self,
        target: TenantId,
        source: Option<TenantId>,
        enabled_sections: Option<&BTreeSet<Section>>,
    ) -> Result<ProvisionReport, ProvisionError> {
        let source = match source {
            Some(id) => id,
            None => self
                .website_id(&self.template_subdomain)
                .await?
                .ok_or_else(|| ProvisionError::TemplateNotFound(self.template_subdomain.clone()))?,
        };
        if source == target {
            return Err(ProvisionError::SameTenant(target));
        }

        // Checked before anything is deleted from the target
        let (source_exists, target_exists) =
            tokio::try_join!(self.website_exists(source), self.website_exists(target))?;
        if !target_exists {
            return Err(ProvisionError::TargetNotFound(target));
        }
        if !source_exists {
            return Err(ProvisionError::SourceNotFound(source));
        }
        info!("provisioning website {target} from {source}");

        let mut rows = BTreeMap::new();

        for table in SINGLETON_TABLES {
            if self.copy_singleton(table, source, target).await? {
                rows.insert(table, 1);
            }
        }

        let flags = self.copy_sections(source, target, enabled_sections).await?;
        rows.insert(SECTION_SETTINGS, flags);

        let [a, b, c] = INDEPENDENT_COLLECTIONS;
        let (na, nb, nc) = tokio::try_join!(
            self.copy_collection(a, source, target),
            self.copy_collection(b, source, target),
            self.copy_collection(c, source, target),
        )?;
        rows.extend([(a, na), (b, nb), (c, nc)]);

        for hierarchy in HIERARCHIES {
            let (parents, children) = self.copy_hierarchy(hierarchy, source, target).await?;
            rows.insert(hierarchy.parent, parents);
            rows.insert(hierarchy.child, children);
        }

        Ok(ProvisionReport {
            source_website_id: source,
            target_website_id: target,
            rows,
        })
    }

    /// Upserts the target's single row from the source's. Returns whether the
    /// source had a row at all.
    async fn copy_singleton(
        &self,
        table: &'static str,
        source: TenantId,
        target: TenantId,
    ) -> Result<bool, ProvisionError> {
        let source_scope = [Filter::website(source)];
        let target_scope = [Filter::website(target)];
        let (source_rows, target_rows) = tokio::try_join!(
            self.store.select(table, &source_scope, &[]),
            self.store.select(table, &target_scope, &[]),
        )
        .map_err(step(table, Operation::Select))?;

        let Some(row) = source_rows.first() else {
            return Ok(false);
        };
        let content = content_of(row, target);

        match target_rows.first().and_then(row_id) {
            Some(id) => {
                self.store
                    .update(table, id, content)
                    .await
                    .map_err(step(table, Operation::Update))?;
            }
            None => {
                self.store
                    .insert(table, vec![content])
                    .await
                    .map_err(step(table, Operation::Insert))?;
            }
        }
        Ok(true)
    }

    /// Replaces the target's section flags. Returns the number of rows written.
    async fn copy_sections(
        &self,
        source: TenantId,
        target: TenantId,
        enabled_sections: Option<&BTreeSet<Section>>,
    ) -> Result<usize, ProvisionError> {
        let source_rows = self
            .store
            .select(SECTION_SETTINGS, &[Filter::website(source)], &collection_order())
            .await
            .map_err(step(SECTION_SETTINGS, Operation::Select))?;

        self.store
            .delete(SECTION_SETTINGS, &[Filter::website(target)])
            .await
            .map_err(step(SECTION_SETTINGS, Operation::Delete))?;

        let mut seen = HashSet::new();
        let mut next_order: i64 = 0;
        let mut rows: Vec<Row> = Vec::with_capacity(source_rows.len());
        for row in &source_rows {
            let name = row.get("section_name").and_then(Value::as_str).unwrap_or_default();
            let section = name.parse::<Section>().ok();
            let source_enabled = row.get("is_enabled").and_then(Value::as_bool).unwrap_or(true);

            let is_enabled = match enabled_sections {
                Some(allowed) => section.is_some_and(|s| allowed.contains(&s)),
                None => source_enabled && section != Some(Section::SpecialOffers),
            };

            if let Some(order) = row.get("display_order").and_then(Value::as_i64) {
                next_order = next_order.max(order + 1);
            }
            seen.insert(name.to_string());

            let mut copy = content_of(row, target);
            copy.insert("is_enabled".into(), Value::Bool(is_enabled));
            rows.push(copy);
        }

        // Sections the source never stored still get an explicit row wherever
        // the outcome must be "disabled", since a missing row reads as enabled.
        // An allowlist decides every section; otherwise only special offers.
        let missing = Section::ALL
            .into_iter()
            .filter(|s| !seen.contains(s.as_str()))
            .filter_map(|section| match enabled_sections {
                Some(allowed) => Some((section, allowed.contains(&section))),
                None if section == Section::SpecialOffers => Some((section, false)),
                None => None,
            });
        for (section, is_enabled) in missing {
            rows.push(row_from(json!({
                "website_id": target,
                "section_name": section.as_str(),
                "is_enabled": is_enabled,
                "display_order": next_order,
            })));
            next_order += 1;
        }

        let count = rows.len();
        self.store
            .insert(SECTION_SETTINGS, rows)
            .await
            .map_err(step(SECTION_SETTINGS, Operation::Insert))?;
        Ok(count)
    }

    async fn copy_collection(
        &self,
        table: &'static str,
        source: TenantId,
        target: TenantId,
    ) -> Result<usize, ProvisionError> {
        let source_rows = self
            .store
            .select(table, &[Filter::website(source)], &collection_order())
            .await
            .map_err(step(table, Operation::Select))?;

        self.store
            .delete(table, &[Filter::website(target)])
            .await
            .map_err(step(table, Operation::Delete))?;

        let rows: Vec<Row> = source_rows.iter().map(|r| content_of(r, target)).collect();
        let count = rows.len();
        self.store
            .insert(table, rows)
            .await
            .map_err(step(table, Operation::Insert))?;
        Ok(count)
    }

    /// Copies parents, then children with their foreign key translated from the
    /// source parent id to the id of its copy.
    async fn copy_hierarchy(
        &self,
        hierarchy: Hierarchy,
        source: TenantId,
        target: TenantId,
    ) -> Result<(usize, usize), ProvisionError> {
        let Hierarchy {
            parent,
            child,
            foreign_key,
        } = hierarchy;

        let scope = [Filter::website(source)];
        let order = collection_order();
        let (source_parents, source_children) = tokio::try_join!(
            async {
                self.store
                    .select(parent, &scope, &order)
                    .await
                    .map_err(step(parent, Operation::Select))
            },
            async {
                self.store
                    .select(child, &scope, &order)
                    .await
                    .map_err(step(child, Operation::Select))
            },
        )?;

        // Children first so no target child is left pointing at a deleted parent
        self.store
            .delete(child, &[Filter::website(target)])
            .await
            .map_err(step(child, Operation::Delete))?;
        self.store
            .delete(parent, &[Filter::website(target)])
            .await
            .map_err(step(parent, Operation::Delete))?;

        // Copies get their ids up front so children can be remapped without
        // relying on the order the store returns inserted rows in
        let mut id_map: HashMap<Uuid, Uuid> = HashMap::with_capacity(source_parents.len());
        let parents: Vec<Row> = source_parents
            .iter()
            .map(|row| {
                let new_id = Uuid::new_v4();
                if let Some(old_id) = row_id(row) {
                    id_map.insert(old_id, new_id);
                }
                let mut copy = content_of(row, target);
                copy.insert("id".into(), Value::String(new_id.to_string()));
                copy
            })
            .collect();

        let inserted = self
            .store
            .insert(parent, parents)
            .await
            .map_err(step(parent, Operation::Insert))?;
        if inserted.len() != source_parents.len() {
            return Err(step(parent, Operation::Insert)(StoreError::RowCount {
                table: parent.into(),
                expected: source_parents.len(),
                actual: inserted.len(),
            }));
        }

        let children: Vec<Row> = source_children
            .iter()
            .map(|row| {
                let mut copy = content_of(row, target);
                let remapped = match row.get(foreign_key) {
                    None | Some(Value::Null) => Value::Null,
                    Some(old) => {
                        let new = old
                            .as_str()
                            .and_then(|s| s.parse::<Uuid>().ok())
                            .and_then(|id| id_map.get(&id));
                        match new {
                            Some(id) => Value::String(id.to_string()),
                            None => {
                                warn!(
                                    "{child} row {:?} references missing {parent} {old}; clearing {foreign_key}",
                                    row_id(row)
                                );
                                Value::Null
                            }
                        }
                    }
                };
                copy.insert(foreign_key.into(), remapped);
                copy
            })
            .collect();

        let count = children.len();
        self.store
            .insert(child, children)
            .await
            .map_err(step(child, Operation::Insert))?;
        Ok((inserted.len(), count))
    }
}
