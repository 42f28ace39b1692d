//! Merged catalog and merge policy.
//!
//! A [`Catalog`] maps each identifier to one canonical entry plus the set of
//! appstores that have reported it. [`Catalog::ingest`] picks the canonical
//! entry with a total order over `(priority, updated_at, appstore, entry)`,
//! so the result never depends on the order sources are ingested in.
//!
//! [`Registry`] publishes immutable catalog snapshots for readers and keeps a
//! single writer for sync passes.

use osm_core::{AppstoreId, Identifier, SkillEntry};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Canonical entry for one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub entry: SkillEntry,
    /// Priority of the appstore that supplied `entry` when it was adopted.
    pub priority: i64,
    /// Every appstore that reported this identifier.
    pub provenance: BTreeSet<AppstoreId>,
}

/// Counts for one `ingest` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Entries that became (or stayed) canonical.
    pub adopted: usize,
    /// Entries only recorded as provenance.
    pub provenance_only: usize,
}

/// `Less` when `incoming` should replace `current`.
///
/// Lower priority wins; then strictly newer `updated_at`; then the smaller
/// appstore id; then the byte-smaller canonical JSON.
fn precedence(incoming: (&SkillEntry, i64), current: (&SkillEntry, i64)) -> Ordering {
    let (a, a_priority) = incoming;
    let (b, b_priority) = current;
    a_priority
        .cmp(&b_priority)
        .then_with(|| b.updated_at.cmp(&a.updated_at))
        .then_with(|| a.source_appstore.cmp(&b.source_appstore))
        .then_with(|| canonical_json(a).cmp(&canonical_json(b)))
}

fn canonical_json(entry: &SkillEntry) -> Vec<u8> {
    serde_json::to_vec(entry).unwrap_or_default()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    records: BTreeMap<Identifier, CatalogRecord>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge entries from a source with the given priority.
    pub fn ingest<I>(&mut self, entries: I, priority: i64) -> IngestStats
    where
        I: IntoIterator<Item = SkillEntry>,
    {
        let mut stats = IngestStats::default();
        for entry in entries {
            let id = entry.identifier.clone();
            match self.records.get_mut(&id) {
                None => {
                    let provenance = BTreeSet::from([entry.source_appstore]);
                    self.records.insert(
                        id,
                        CatalogRecord {
                            entry,
                            priority,
                            provenance,
                        },
                    );
                    stats.adopted += 1;
                }
                Some(record) => {
                    record.provenance.insert(entry.source_appstore);
                    if precedence((&entry, priority), (&record.entry, record.priority))
                        == Ordering::Less
                    {
                        debug!(
                            identifier = %id,
                            from = %record.entry.source_appstore,
                            to = %entry.source_appstore,
                            "canonical entry replaced"
                        );
                        record.entry = entry;
                        record.priority = priority;
                        stats.adopted += 1;
                    } else if record.entry == entry && record.priority == priority {
                        stats.adopted += 1;
                    } else {
                        stats.provenance_only += 1;
                    }
                }
            }
        }
        stats
    }

    /// Copy records for `ids` from `previous`, merging them in with the
    /// normal policy. Used by rebuilds to keep what this pass did not see.
    ///
    /// An old entry whose source already contributed to the record in this
    /// catalog is outdated and never replaces the current entry.
    pub fn carry_over(&mut self, previous: &Catalog, ids: impl IntoIterator<Item = Identifier>) {
        for id in ids {
            let Some(old) = previous.records.get(&id) else {
                continue;
            };
            match self.records.get_mut(&id) {
                None => {
                    self.records.insert(id, old.clone());
                }
                Some(record) => {
                    let superseded = record.provenance.contains(&old.entry.source_appstore);
                    record.provenance.extend(old.provenance.iter().copied());
                    if !superseded
                        && precedence((&old.entry, old.priority), (&record.entry, record.priority))
                            == Ordering::Less
                    {
                        record.entry = old.entry.clone();
                        record.priority = old.priority;
                    }
                }
            }
        }
    }

    pub fn get(&self, id: &Identifier) -> Option<&SkillEntry> {
        self.records.get(id).map(|r| &r.entry)
    }

    pub fn record(&self, id: &Identifier) -> Option<&CatalogRecord> {
        self.records.get(id)
    }

    pub fn provenance(&self, id: &Identifier) -> Option<&BTreeSet<AppstoreId>> {
        self.records.get(id).map(|r| &r.provenance)
    }

    /// Entries in identifier order.
    pub fn entries(&self) -> impl Iterator<Item = &SkillEntry> {
        self.records.values().map(|r| &r.entry)
    }

    pub fn records(&self) -> impl Iterator<Item = &CatalogRecord> {
        self.records.values()
    }

    pub fn identifiers(&self) -> HashSet<Identifier> {
        self.records.keys().cloned().collect()
    }

    /// Identifiers reported by `appstore`.
    pub fn reported_by(&self, appstore: AppstoreId) -> Vec<Identifier> {
        self.records
            .iter()
            .filter(|(_, r)| r.provenance.contains(&appstore))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Snapshot holder with a single writer.
///
/// Readers call [`Registry::snapshot`] and keep the `Arc` for as long as
/// they need; a sync pass holds [`Registry::writer`] while it merges and
/// swaps the new catalog in with [`Registry::publish`].
#[derive(Debug, Default)]
pub struct Registry {
    current: RwLock<Arc<Catalog>>,
    writer: Mutex<()>,
}

impl Registry {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
            writer: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<Catalog> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Exclusive right to build and publish the next catalog.
    pub async fn writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }

    pub fn publish(&self, catalog: Catalog) {
        let next = Arc::new(catalog);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(url: &str, source: AppstoreId, updated_at: Option<i64>) -> SkillEntry {
        SkillEntry::from_url(url, source)
            .unwrap()
            .with_updated_at(updated_at)
    }

    #[test]
    fn lower_priority_number_wins_regardless_of_timestamp() {
        let local = entry("https://gh.com/x/y", AppstoreId::Local, Some(100));
        let andlo = entry("https://gh.com/x/y", AppstoreId::Andlo, Some(200));

        let mut catalog = Catalog::new();
        catalog.ingest([local.clone()], 0);
        let stats = catalog.ingest([andlo], 5);

        let id = local.identifier.clone();
        assert_eq!(catalog.get(&id), Some(&local));
        assert_eq!(stats, IngestStats { adopted: 0, provenance_only: 1 });
        assert_eq!(
            catalog.provenance(&id).unwrap().iter().copied().collect::<Vec<_>>(),
            vec![AppstoreId::Andlo, AppstoreId::Local]
        );
    }

    #[test]
    fn equal_priority_prefers_strictly_newer() {
        let older = entry("https://github.com/a/b", AppstoreId::Ovos, Some(1));
        let newer = entry("https://github.com/a/b", AppstoreId::Neon, Some(2));
        let mut catalog = Catalog::new();
        catalog.ingest([older], 3);
        catalog.ingest([newer.clone()], 3);
        assert_eq!(catalog.get(&newer.identifier), Some(&newer));
    }

    #[test]
    fn full_tie_falls_back_to_appstore_id() {
        let neon = entry("https://github.com/a/b", AppstoreId::Neon, Some(1));
        let andlo = entry("https://github.com/a/b", AppstoreId::Andlo, Some(1));
        let mut catalog = Catalog::new();
        catalog.ingest([neon], 3);
        catalog.ingest([andlo.clone()], 3);
        assert_eq!(catalog.get(&andlo.identifier), Some(&andlo));
    }

    #[test]
    fn carry_over_keeps_old_records() {
        let a = entry("https://github.com/a/one", AppstoreId::Andlo, None);
        let b = entry("https://github.com/a/two", AppstoreId::Pling, None);
        let mut previous = Catalog::new();
        previous.ingest([a.clone()], 100);
        previous.ingest([b.clone()], 10);

        let mut next = Catalog::new();
        next.carry_over(&previous, previous.reported_by(AppstoreId::Pling));
        assert_eq!(next.len(), 1);
        assert_eq!(next.get(&b.identifier), Some(&b));
        assert!(next.get(&a.identifier).is_none());
    }

    #[test]
    fn carry_over_never_reverts_a_source_to_its_old_entry() {
        let url = "https://github.com/a/skill-x";
        let mut previous = Catalog::new();
        previous.ingest([entry(url, AppstoreId::Andlo, None)], 100);
        previous.ingest([entry(url, AppstoreId::Pling, None).with_description("a old")], 10);

        let fresh = entry(url, AppstoreId::Pling, None).with_description("b new");
        let mut next = Catalog::new();
        next.ingest([fresh.clone()], 10);
        next.carry_over(&previous, previous.reported_by(AppstoreId::Andlo));

        assert_eq!(next.get(&fresh.identifier), Some(&fresh));
        assert_eq!(
            next.provenance(&fresh.identifier).unwrap().iter().copied().collect::<Vec<_>>(),
            vec![AppstoreId::Andlo, AppstoreId::Pling]
        );
    }

    #[test]
    fn carry_over_still_restores_a_better_entry() {
        let url = "https://github.com/a/skill-x";
        let old = entry(url, AppstoreId::Local, None);
        let mut previous = Catalog::new();
        previous.ingest([old.clone()], 1);

        let mut next = Catalog::new();
        next.ingest([entry(url, AppstoreId::Pling, None)], 10);
        next.carry_over(&previous, previous.reported_by(AppstoreId::Local));
        assert_eq!(next.get(&old.identifier), Some(&old));
    }

    #[test]
    fn snapshots_are_isolated_from_publish() {
        let registry = Registry::default();
        let before = registry.snapshot();
        let mut catalog = Catalog::new();
        catalog.ingest([entry("https://github.com/a/b", AppstoreId::Ovos, None)], 2);
        registry.publish(catalog);
        assert!(before.is_empty());
        assert_eq!(registry.snapshot().len(), 1);
    }

    fn arb_source() -> impl Strategy<Value = (AppstoreId, i64)> {
        prop_oneof![
            Just((AppstoreId::Local, 1)),
            Just((AppstoreId::Ovos, 2)),
            Just((AppstoreId::MycroftMarketplace, 5)),
            Just((AppstoreId::Pling, 5)),
            Just((AppstoreId::Neon, 50)),
            Just((AppstoreId::Andlo, 50)),
        ]
    }

    /// A source batch: its appstore, priority and entries over a small id space.
    fn arb_batch() -> impl Strategy<Value = (i64, Vec<SkillEntry>)> {
        (
            arb_source(),
            prop::collection::vec((0u8..6, prop::option::of(0i64..4), "[a-c]{0,2}"), 0..6),
        )
            .prop_map(|((source, priority), raw)| {
                let entries = raw
                    .into_iter()
                    .map(|(n, updated, desc)| {
                        entry(&format!("https://github.com/o/skill-{n}"), source, updated)
                            .with_description(desc)
                    })
                    .collect();
                (priority, entries)
            })
    }

    fn merged(batches: &[(i64, Vec<SkillEntry>)]) -> Catalog {
        let mut catalog = Catalog::new();
        for (priority, entries) in batches {
            catalog.ingest(entries.iter().cloned(), *priority);
        }
        catalog
    }

    proptest! {
        #[test]
        fn ingest_is_commutative(a in arb_batch(), b in arb_batch()) {
            prop_assert_eq!(
                merged(&[a.clone(), b.clone()]),
                merged(&[b, a])
            );
        }

        #[test]
        fn ingest_is_associative(a in arb_batch(), b in arb_batch(), c in arb_batch()) {
            let left = merged(&[a.clone(), b.clone(), c.clone()]);
            let right = merged(&[c, a, b]);
            prop_assert_eq!(left, right);
        }

        #[test]
        fn identifiers_are_unique(batches in prop::collection::vec(arb_batch(), 0..4)) {
            let catalog = merged(&batches);
            let ids: Vec<_> = catalog.entries().map(|e| e.identifier.clone()).collect();
            let unique: HashSet<_> = ids.iter().cloned().collect();
            prop_assert_eq!(ids.len(), unique.len());
        }
    }
}
