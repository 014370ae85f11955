use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::warn;

use crate::{
    db::store::{row_from, Filter, OrderBy, Row, Store, StoreError},
    models::{
        content::SECTION_SETTINGS,
        website::{Section, SectionFlag, TenantId},
    },
    services::{cache::Cache, metrics},
};

/// Decides which page sections a website shows.
///
/// Lookups fail open: a section with no row, or whose lookup errors, counts as
/// enabled. Section visibility is cosmetic, so availability wins over strictness
/// and a section type added after a website was created still shows up.
///
/// The cache never expires on its own; it is cleared through `invalidate`
/// whenever flags change.
pub struct SectionGate {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache<bool>>,
    generations: Mutex<Generations>,
}

/// Invalidation counters. A lookup only caches its answer if no invalidation
/// touching its website happened while it was reading the store.
#[derive(Default)]
struct Generations {
    all: u64,
    per_website: HashMap<TenantId, u64>,
}

impl Generations {
    fn of(&self, website_id: TenantId) -> (u64, u64) {
        (
            self.all,
            self.per_website.get(&website_id).copied().unwrap_or(0),
        )
    }
}

impl SectionGate {
    pub fn new(store: Arc<dyn Store>, cache: Arc<dyn Cache<bool>>) -> Self {
        Self {
            store,
            cache,
            generations: Mutex::new(Generations::default()),
        }
    }

    pub async fn is_enabled(&self, website_id: TenantId, section: Section) -> bool {
        let key = format!("{website_id}:{section}");
        if let Some(enabled) = self.cache.get(&key) {
            return enabled;
        }

        let started = self.generations.lock().of(website_id);
        match self.find(website_id, section).await {
            Ok(flag) => {
                let enabled = flag.map_or(true, |f| f.is_enabled);
                let generations = self.generations.lock();
                if generations.of(website_id) == started {
                    self.cache.set(key, enabled);
                }
                enabled
            }
            Err(e) => {
                metrics::SECTION_FAIL_OPEN_COUNTER.inc();
                warn!("section lookup {key} failed, defaulting to enabled: {e}");
                true
            }
        }
    }

    /// Enabled sections in display order, followed by recognized sections that
    /// have no row at all.
    pub async fn list_enabled(&self, website_id: TenantId) -> Vec<Section> {
        match self.flags(website_id).await {
            Ok(flags) => {
                let present: HashSet<&str> = flags.iter().map(|f| f.section_name.as_str()).collect();
                let explicit = flags
                    .iter()
                    .filter(|f| f.is_enabled)
                    .filter_map(|f| f.section_name.parse::<Section>().ok());
                let implicit = Section::ALL
                    .into_iter()
                    .filter(|s| !present.contains(s.as_str()));
                explicit.chain(implicit).collect()
            }
            Err(e) => {
                metrics::SECTION_FAIL_OPEN_COUNTER.inc();
                warn!("section list for {website_id} failed, defaulting to all: {e}");
                Section::ALL.to_vec()
            }
        }
    }

    /// Clears cached flags for one website, or for all of them.
    pub fn invalidate(&self, website_id: Option<TenantId>) {
        let mut generations = self.generations.lock();
        match website_id {
            Some(id) => {
                *generations.per_website.entry(id).or_default() += 1;
                self.cache.remove_prefix(&format!("{id}:"));
            }
            None => {
                generations.all += 1;
                self.cache.clear();
            }
        }
    }

    /// All flag rows of a website, ordered by `display_order` then insertion.
    pub async fn flags(&self, website_id: TenantId) -> Result<Vec<SectionFlag>, StoreError> {
        let rows = self
            .store
            .select(
                SECTION_SETTINGS,
                &[Filter::website(website_id)],
                &[OrderBy::asc("display_order"), OrderBy::asc("created_at")],
            )
            .await?;
        rows.into_iter().map(parse_flag).collect()
    }

    async fn find(
        &self,
        website_id: TenantId,
        section: Section,
    ) -> Result<Option<SectionFlag>, StoreError> {
        let rows = self
            .store
            .select(
                SECTION_SETTINGS,
                &[
                    Filter::website(website_id),
                    Filter::eq("section_name", section.as_str()),
                ],
                &[],
            )
            .await?;
        rows.into_iter().next().map(parse_flag).transpose()
    }

    /// Admin save path: creates the row for the pair if it is missing, otherwise
    /// updates it in place, then drops the website's cached flags.
    pub async fn set_section(
        &self,
        website_id: TenantId,
        section: Section,
        is_enabled: bool,
        display_order: Option<i32>,
    ) -> Result<SectionFlag, StoreError> {
        let existing = self.find(website_id, section).await?;

        let row = match existing {
            Some(flag) => {
                let mut patch = Row::new();
                patch.insert("is_enabled".into(), Value::Bool(is_enabled));
                if let Some(order) = display_order {
                    patch.insert("display_order".into(), json!(order));
                }
                self.store
                    .update(SECTION_SETTINGS, flag.id, patch)
                    .await?
                    .ok_or_else(|| StoreError::Unavailable(format!("section row {} vanished", flag.id)))?
            }
            None => {
                let row = row_from(json!({
                    "website_id": website_id,
                    "section_name": section.as_str(),
                    "is_enabled": is_enabled,
                    "display_order": display_order.unwrap_or_else(|| section.default_order()),
                }));
                self.store
                    .insert(SECTION_SETTINGS, vec![row])
                    .await?
                    .pop()
                    .ok_or_else(|| StoreError::RowCount {
                        table: SECTION_SETTINGS.into(),
                        expected: 1,
                        actual: 0,
                    })?
            }
        };

        self.invalidate(Some(website_id));
        parse_flag(row)
    }
}

fn parse_flag(row: Row) -> Result<SectionFlag, StoreError> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::services::cache::MemoryCache;
    use async_trait::async_trait;
    use tokio::sync::oneshot;
    use uuid::Uuid;

    /// Returns what it read, but only after the test releases it, so writes can
    /// land between the read and the caller seeing the result.
    struct HeldStore {
        inner: MemoryStore,
        hold: Mutex<Option<oneshot::Receiver<()>>>,
    }

    #[async_trait]
    impl Store for HeldStore {
        async fn select(
            &self,
            table: &str,
            filters: &[Filter],
            order: &[OrderBy],
        ) -> Result<Vec<Row>, StoreError> {
            let rows = self.inner.select(table, filters, order).await?;
            let hold = self.hold.lock().take();
            if let Some(release) = hold {
                let _ = release.await;
            }
            Ok(rows)
        }

        async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, StoreError> {
            self.inner.insert(table, rows).await
        }

        async fn update(&self, table: &str, id: Uuid, patch: Row) -> Result<Option<Row>, StoreError> {
            self.inner.update(table, id, patch).await
        }

        async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError> {
            self.inner.delete(table, filters).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn gate(store: Arc<MemoryStore>) -> SectionGate {
        SectionGate::new(store, Arc::new(MemoryCache::unbounded()))
    }

    async fn seed_flag(store: &MemoryStore, website: Uuid, name: &str, enabled: bool, order: i32) {
        let row = row_from(json!({
            "website_id": website,
            "section_name": name,
            "is_enabled": enabled,
            "display_order": order,
        }));
        store.insert(SECTION_SETTINGS, vec![row]).await.unwrap();
    }

    #[tokio::test]
    async fn sections_default_to_enabled() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate(store);
        let website = Uuid::new_v4();

        assert!(gate.is_enabled(website, Section::Hero).await);
        assert_eq!(gate.list_enabled(website).await, Section::ALL.to_vec());
    }

    #[tokio::test]
    async fn explicit_rows_are_respected_and_ordered() {
        let store = Arc::new(MemoryStore::new());
        let website = Uuid::new_v4();
        seed_flag(&store, website, "menu", true, 2).await;
        seed_flag(&store, website, "hero", true, 1).await;
        seed_flag(&store, website, "about", false, 0).await;
        seed_flag(&store, website, "faq", true, 2).await;
        let gate = gate(store);

        assert!(!gate.is_enabled(website, Section::About).await);
        assert!(gate.is_enabled(website, Section::Menu).await);

        let listed = gate.list_enabled(website).await;
        assert_eq!(&listed[..3], &[Section::Hero, Section::Menu, Section::Faq]);
        assert!(!listed.contains(&Section::About));
        // Sections without rows follow in page order
        assert_eq!(listed[3], Section::WhyChooseUs);
        assert_eq!(listed.len(), Section::ALL.len() - 1);
    }

    #[tokio::test]
    async fn lookup_failures_fail_open() {
        let store = Arc::new(MemoryStore::new());
        let website = Uuid::new_v4();
        seed_flag(&store, website, "hero", false, 0).await;
        store.fail_table(SECTION_SETTINGS);
        let gate = gate(store.clone());

        assert!(gate.is_enabled(website, Section::Hero).await);
        assert_eq!(gate.list_enabled(website).await, Section::ALL.to_vec());

        // The fail-open answer was not cached
        store.heal(SECTION_SETTINGS);
        assert!(!gate.is_enabled(website, Section::Hero).await);
    }

    #[tokio::test]
    async fn cache_serves_until_invalidated() {
        let store = Arc::new(MemoryStore::new());
        let website = Uuid::new_v4();
        seed_flag(&store, website, "hero", true, 0).await;
        let gate = gate(store.clone());

        assert!(gate.is_enabled(website, Section::Hero).await);
        store
            .delete(SECTION_SETTINGS, &[Filter::website(website)])
            .await
            .unwrap();
        seed_flag(&store, website, "hero", false, 0).await;

        assert!(gate.is_enabled(website, Section::Hero).await);
        let selects = store.select_count();

        gate.invalidate(Some(Uuid::new_v4()));
        assert!(gate.is_enabled(website, Section::Hero).await);
        assert_eq!(store.select_count(), selects);

        gate.invalidate(Some(website));
        assert!(!gate.is_enabled(website, Section::Hero).await);

        gate.invalidate(None);
        assert!(!gate.is_enabled(website, Section::Hero).await);
        assert_eq!(store.select_count(), selects + 2);
    }

    #[tokio::test]
    async fn set_section_creates_then_updates_a_single_row() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate(store.clone());
        let website = Uuid::new_v4();

        assert!(gate.is_enabled(website, Section::Team).await);

        let created = gate.set_section(website, Section::Team, false, None).await.unwrap();
        assert_eq!(created.display_order, Section::Team.default_order());
        assert!(!gate.is_enabled(website, Section::Team).await);

        let updated = gate.set_section(website, Section::Team, true, Some(9)).await.unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.display_order, 9);
        assert!(gate.is_enabled(website, Section::Team).await);

        assert_eq!(store.rows(SECTION_SETTINGS).len(), 1);
    }

    #[tokio::test]
    async fn lookups_racing_an_invalidation_are_not_cached() {
        let website = Uuid::new_v4();
        let inner = MemoryStore::new();
        seed_flag(&inner, website, "hero", true, 0).await;
        let (release, held) = oneshot::channel();
        let store = Arc::new(HeldStore {
            inner,
            hold: Mutex::new(Some(held)),
        });
        let gate = SectionGate::new(store, Arc::new(MemoryCache::unbounded()));

        // The first lookup reads `true`, then the flag is switched off before it returns
        let admin = &gate;
        let (stale, _) = tokio::join!(gate.is_enabled(website, Section::Hero), async move {
            admin.set_section(website, Section::Hero, false, None).await.unwrap();
            release.send(()).unwrap();
        });
        assert!(stale);

        assert!(!gate.is_enabled(website, Section::Hero).await);
    }
}
