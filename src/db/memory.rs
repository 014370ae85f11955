use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use super::store::{Filter, OrderBy, Row, Store, StoreError};

/// In-process store used by tests and local runs without PostgreSQL.
///
/// Rows keep insertion order; ids and `created_at` are assigned on insert when
/// the caller leaves them out, mirroring the column defaults of the schema.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    failing: Mutex<HashSet<String>>,
    selects: AtomicUsize,
    reverse_inserts: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation on `table` fails with `StoreError::Unavailable` until
    /// `heal` is called.
    pub fn fail_table(&self, table: &str) {
        self.failing.lock().insert(table.to_string());
    }

    pub fn heal(&self, table: &str) {
        self.failing.lock().remove(table);
    }

    /// Number of `select` calls served so far.
    pub fn select_count(&self) -> usize {
        self.selects.load(AtomicOrdering::SeqCst)
    }

    /// Makes `insert` hand back its rows in reverse, like a backend that gives
    /// no ordering guarantee for returned rows.
    pub fn reverse_insert_results(&self) {
        self.reverse_inserts.store(true, AtomicOrdering::SeqCst);
    }

    /// Snapshot of every row currently in `table`, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.lock().get(table).cloned().unwrap_or_default()
    }

    fn check(&self, table: &str) -> Result<(), StoreError> {
        if self.failing.lock().contains(table) {
            return Err(StoreError::Unavailable(format!("{table} is failing")));
        }
        Ok(())
    }
}

fn matches(row: &Row, filters: &[Filter]) -> bool {
    filters
        .iter()
        .all(|f| row.get(&f.column).unwrap_or(&Value::Null) == &f.value)
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        order: &[OrderBy],
    ) -> Result<Vec<Row>, StoreError> {
        self.selects.fetch_add(1, AtomicOrdering::SeqCst);
        self.check(table)?;

        let mut rows: Vec<Row> = self
            .tables
            .lock()
            .get(table)
            .map(|rows| rows.iter().filter(|r| matches(r, filters)).cloned().collect())
            .unwrap_or_default();

        // sort_by is stable, so ties keep insertion order
        rows.sort_by(|a, b| {
            order.iter().fold(Ordering::Equal, |acc, o| {
                acc.then_with(|| {
                    let null = Value::Null;
                    let ord = compare(
                        a.get(&o.column).unwrap_or(&null),
                        b.get(&o.column).unwrap_or(&null),
                    );
                    if o.descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                })
            })
        });
        Ok(rows)
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, StoreError> {
        self.check(table)?;

        let now = Utc::now().to_rfc3339();
        let inserted: Vec<Row> = rows
            .into_iter()
            .map(|mut row| {
                if row.get("id").map_or(true, Value::is_null) {
                    row.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
                }
                row.entry("created_at")
                    .or_insert_with(|| Value::String(now.clone()));
                row
            })
            .collect();

        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .extend(inserted.iter().cloned());

        let mut inserted = inserted;
        if self.reverse_inserts.load(AtomicOrdering::SeqCst) {
            inserted.reverse();
        }
        Ok(inserted)
    }

    async fn update(&self, table: &str, id: Uuid, patch: Row) -> Result<Option<Row>, StoreError> {
        self.check(table)?;

        let id = Value::String(id.to_string());
        let mut tables = self.tables.lock();
        let Some(row) = tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|r| r.get("id") == Some(&id)))
        else {
            return Ok(None);
        };
        for (column, value) in patch {
            row.insert(column, value);
        }
        row.insert("updated_at".into(), Value::String(Utc::now().to_rfc3339()));
        Ok(Some(row.clone()))
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        self.check(table)?;
        if filters.is_empty() {
            return Err(StoreError::Unscoped(table.to_string()));
        }

        let mut tables = self.tables.lock();
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !matches(r, filters));
        Ok((before - rows.len()) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_preserves_order() {
        let store = MemoryStore::new();
        let inserted = store
            .insert("faqs", vec![row(json!({ "q": "a" })), row(json!({ "q": "b" }))])
            .await
            .unwrap();
        assert_eq!(inserted.len(), 2);
        assert_eq!(inserted[0]["q"], "a");
        assert_eq!(inserted[1]["q"], "b");
        assert!(inserted.iter().all(|r| r["id"].is_string()));
        assert_ne!(inserted[0]["id"], inserted[1]["id"]);
    }

    #[tokio::test]
    async fn select_filters_and_sorts_stably() {
        let store = MemoryStore::new();
        store
            .insert(
                "items",
                vec![
                    row(json!({ "w": "x", "display_order": 2, "n": "first-2" })),
                    row(json!({ "w": "x", "display_order": 1, "n": "only-1" })),
                    row(json!({ "w": "y", "display_order": 0, "n": "other" })),
                    row(json!({ "w": "x", "display_order": 2, "n": "second-2" })),
                ],
            )
            .await
            .unwrap();

        let rows = store
            .select("items", &[Filter::eq("w", "x")], &[OrderBy::asc("display_order")])
            .await
            .unwrap();
        let names: Vec<_> = rows.iter().map(|r| r["n"].as_str().unwrap()).collect();
        assert_eq!(names, ["only-1", "first-2", "second-2"]);
        assert_eq!(store.select_count(), 1);
    }

    #[tokio::test]
    async fn update_and_delete() {
        let store = MemoryStore::new();
        let inserted = store
            .insert("hero", vec![row(json!({ "title": "old", "w": "x" }))])
            .await
            .unwrap();
        let id = crate::db::store::row_id(&inserted[0]).unwrap();

        let updated = store
            .update("hero", id, row(json!({ "title": "new" })))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["title"], "new");
        assert!(store
            .update("hero", Uuid::new_v4(), Row::new())
            .await
            .unwrap()
            .is_none());

        assert_eq!(store.delete("hero", &[Filter::eq("w", "x")]).await.unwrap(), 1);
        assert!(store.rows("hero").is_empty());
        assert!(matches!(
            store.delete("hero", &[]).await,
            Err(StoreError::Unscoped(_))
        ));
    }

    #[tokio::test]
    async fn failing_table_errors_until_healed() {
        let store = MemoryStore::new();
        store.fail_table("faqs");
        assert!(store.select("faqs", &[], &[]).await.is_err());
        store.heal("faqs");
        assert!(store.select("faqs", &[], &[]).await.unwrap().is_empty());
    }
}
