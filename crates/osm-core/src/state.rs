//! Device skill state: what is actually installed here.
//!
//! The ledger is kept apart from the catalog and keyed by skill name. It is
//! persisted as a JSON array sorted by name in `<data_dir>/skills.json`, and
//! a content hash over its canonical serialization gates redundant writes.

use crate::error::{Error, Result};
use crate::events::{EventPayload, EventSink, StateChangedPayload};
use crate::persist::{read_json, write_json_atomic};
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// File name of the ledger inside the data directory.
pub const STATE_FILE: &str = "skills.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillStatus {
    Active,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallationStatus {
    Installed,
    Failed,
    Removed,
}

/// One installed skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillState {
    pub name: String,
    /// Where the skill was installed from.
    pub origin: String,
    pub beta: bool,
    pub status: SkillStatus,
    /// Install time; 0 until the installer reports one.
    pub installed: Timestamp,
    /// Last update time; 0 until the installer reports one.
    pub updated: Timestamp,
    pub installation: InstallationStatus,
    pub skill_gid: String,
}

impl SkillState {
    /// Fresh entry for a just-installed skill. Timestamps stay at the 0
    /// sentinel until the installer supplies real ones.
    pub fn initialize(name: &str, origin: &str, beta: bool, skill_gid: &str) -> Self {
        Self {
            name: name.to_string(),
            origin: origin.to_string(),
            beta,
            status: SkillStatus::Active,
            installed: 0,
            updated: 0,
            installation: InstallationStatus::Installed,
            skill_gid: skill_gid.to_string(),
        }
    }
}

/// See [`SkillState::initialize`].
pub fn initialize_skill_state(name: &str, origin: &str, beta: bool, skill_gid: &str) -> SkillState {
    SkillState::initialize(name, origin, beta, skill_gid)
}

/// In-memory ledger, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkillStateLedger {
    entries: BTreeMap<String, SkillState>,
}

impl SkillStateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&SkillState> {
        self.entries.get(name)
    }

    /// Insert or replace by name, returning the previous entry.
    pub fn upsert(&mut self, entry: SkillState) -> Option<SkillState> {
        self.entries.insert(entry.name.clone(), entry)
    }

    pub fn remove(&mut self, name: &str) -> Option<SkillState> {
        self.entries.remove(name)
    }

    /// Entries sorted by name.
    pub fn list(&self) -> impl Iterator<Item = &SkillState> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_status(&mut self, name: &str, status: SkillStatus) -> Result<()> {
        self.entry_mut(name)?.status = status;
        Ok(())
    }

    /// Uninstall keeps the record with `installation = removed`.
    pub fn mark_removed(&mut self, name: &str) -> Result<()> {
        self.entry_mut(name)?.installation = InstallationStatus::Removed;
        Ok(())
    }

    pub fn record_install(&mut self, name: &str, ts: Timestamp) -> Result<()> {
        let entry = self.entry_mut(name)?;
        entry.installed = ts;
        entry.installation = InstallationStatus::Installed;
        Ok(())
    }

    pub fn record_update(&mut self, name: &str, ts: Timestamp) -> Result<()> {
        self.entry_mut(name)?.updated = ts;
        Ok(())
    }

    /// Stable SHA-256 over the key-sorted serialization of every entry.
    pub fn hash(&self) -> String {
        // serde_json::Value objects keep keys sorted, so field order in the
        // struct never leaks into the digest.
        let canonical = serde_json::to_value(self.entries.values().collect::<Vec<_>>())
            .and_then(|v| serde_json::to_vec(&v))
            .unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        format!("{:x}", hasher.finalize())
    }

    fn entry_mut(&mut self, name: &str) -> Result<&mut SkillState> {
        self.entries
            .get_mut(name)
            .ok_or_else(|| Error::not_found(format!("skill not in ledger: {name}")))
    }
}

impl FromIterator<SkillState> for SkillStateLedger {
    fn from_iter<I: IntoIterator<Item = SkillState>>(iter: I) -> Self {
        let mut ledger = Self::new();
        for entry in iter {
            ledger.upsert(entry);
        }
        ledger
    }
}

/// Ledger bound to its file, with change detection.
pub struct SkillStateTracker {
    path: PathBuf,
    ledger: SkillStateLedger,
    persisted: SkillStateLedger,
    persisted_hash: String,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for SkillStateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillStateTracker")
            .field("path", &self.path)
            .field("entries", &self.ledger.len())
            .field("persisted_hash", &self.persisted_hash)
            .finish_non_exhaustive()
    }
}

impl SkillStateTracker {
    /// Load `<data_dir>/skills.json`; a missing file is an empty ledger.
    pub fn open(data_dir: &Path, sink: Arc<dyn EventSink>) -> Result<Self> {
        let path = data_dir.join(STATE_FILE);
        let ledger: SkillStateLedger = read_json::<Vec<SkillState>>(&path)?
            .unwrap_or_default()
            .into_iter()
            .collect();
        let persisted_hash = ledger.hash();
        debug!(path = %path.display(), entries = ledger.len(), "loaded skill state");
        Ok(Self {
            path,
            persisted: ledger.clone(),
            ledger,
            persisted_hash,
            sink,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ledger(&self) -> &SkillStateLedger {
        &self.ledger
    }

    pub fn get(&self, name: &str) -> Option<&SkillState> {
        self.ledger.get(name)
    }

    pub fn upsert(&mut self, entry: SkillState) -> Option<SkillState> {
        self.ledger.upsert(entry)
    }

    pub fn remove(&mut self, name: &str) -> Option<SkillState> {
        self.ledger.remove(name)
    }

    pub fn set_status(&mut self, name: &str, status: SkillStatus) -> Result<()> {
        self.ledger.set_status(name, status)
    }

    pub fn mark_removed(&mut self, name: &str) -> Result<()> {
        self.ledger.mark_removed(name)
    }

    pub fn record_install(&mut self, name: &str, ts: Timestamp) -> Result<()> {
        self.ledger.record_install(name, ts)
    }

    pub fn record_update(&mut self, name: &str, ts: Timestamp) -> Result<()> {
        self.ledger.record_update(name, ts)
    }

    pub fn hash(&self) -> String {
        self.ledger.hash()
    }

    /// Whether the in-memory ledger differs from what is on disk.
    pub fn is_dirty(&self) -> bool {
        self.ledger.hash() != self.persisted_hash
    }

    /// Persist if changed. Returns `false` when the write was skipped.
    ///
    /// Emits `skill.state.changed` for each added, modified or removed name.
    pub fn save(&mut self) -> Result<bool> {
        let hash = self.ledger.hash();
        if hash == self.persisted_hash {
            debug!(%hash, "skill state unchanged, skipping write");
            return Ok(false);
        }

        let entries: Vec<&SkillState> = self.ledger.list().collect();
        write_json_atomic(&self.path, &entries)?;

        let names: BTreeSet<&String> = self
            .ledger
            .entries
            .keys()
            .chain(self.persisted.entries.keys())
            .collect();
        for name in names {
            if self.ledger.entries.get(name) != self.persisted.entries.get(name) {
                self.sink.emit(EventPayload::StateChanged(StateChangedPayload {
                    name: name.clone(),
                    hash: hash.clone(),
                }));
            }
        }

        info!(path = %self.path.display(), %hash, entries = entries.len(), "skill state saved");
        self.persisted = self.ledger.clone();
        self.persisted_hash = hash;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::MemorySink;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn initialize_leaves_timestamps_unknown() {
        let state = initialize_skill_state("demo", "local", false, "demo|local");
        assert_eq!(state.status, SkillStatus::Active);
        assert_eq!(state.installed, 0);
        assert_eq!(state.updated, 0);
        assert_eq!(state.installation, InstallationStatus::Installed);
        assert_eq!(state.skill_gid, "demo|local");

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["installation"], "installed");
    }

    #[test]
    fn mutators_require_existing_entry() {
        let mut ledger = SkillStateLedger::new();
        let err = ledger.set_status("ghost", SkillStatus::Disabled).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn lifecycle_updates_fields() {
        let mut ledger = SkillStateLedger::new();
        ledger.upsert(SkillState::initialize("demo", "ovos", true, "@|demo"));
        ledger.record_install("demo", 1_700_000_000).unwrap();
        ledger.record_update("demo", 1_700_000_500).unwrap();
        ledger.set_status("demo", SkillStatus::Disabled).unwrap();
        ledger.mark_removed("demo").unwrap();

        let demo = ledger.get("demo").unwrap();
        assert_eq!(demo.installed, 1_700_000_000);
        assert_eq!(demo.updated, 1_700_000_500);
        assert_eq!(demo.status, SkillStatus::Disabled);
        assert_eq!(demo.installation, InstallationStatus::Removed);
    }

    #[test]
    fn hash_changes_with_content() {
        let mut ledger = SkillStateLedger::new();
        let empty = ledger.hash();
        ledger.upsert(SkillState::initialize("a", "local", false, "a|local"));
        assert_ne!(ledger.hash(), empty);
        ledger.remove("a");
        assert_eq!(ledger.hash(), empty);
    }

    #[test]
    fn save_skips_unchanged_and_emits_changes() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::new());
        let mut tracker = SkillStateTracker::open(dir.path(), Arc::clone(&sink) as Arc<dyn EventSink>).unwrap();
        assert!(!tracker.save().unwrap());
        assert!(!tracker.path().exists());

        tracker.upsert(SkillState::initialize("demo", "local", false, "demo|local"));
        assert!(tracker.is_dirty());
        assert!(tracker.save().unwrap());
        assert!(!tracker.save().unwrap());
        assert_eq!(sink.names(), vec!["skill.state.changed"]);

        let reopened = SkillStateTracker::open(dir.path(), Arc::clone(&sink) as Arc<dyn EventSink>).unwrap();
        assert_eq!(reopened.hash(), tracker.hash());
        assert_eq!(reopened.get("demo").unwrap().origin, "local");
    }

    #[test]
    fn corrupt_ledger_is_persistence_failure() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(STATE_FILE), "[{").unwrap();
        let err = SkillStateTracker::open(dir.path(), Arc::new(MemorySink::new())).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PersistenceFailure);
    }

    fn arb_state() -> impl Strategy<Value = SkillState> {
        ("[a-z]{1,8}", "[a-z]{0,6}", any::<bool>(), 0i64..2_000_000_000, any::<bool>()).prop_map(
            |(name, origin, beta, ts, disabled)| {
                let mut state = SkillState::initialize(&name, &origin, beta, &format!("{name}|{origin}"));
                state.installed = ts;
                if disabled {
                    state.status = SkillStatus::Disabled;
                }
                state
            },
        )
    }

    proptest! {
        #[test]
        fn hash_is_insertion_order_independent(
            states in proptest::collection::vec(arb_state(), 0..12),
            seed in any::<u64>(),
        ) {
            // Keep one entry per name so both orders describe the same ledger.
            let unique: BTreeMap<String, SkillState> =
                states.into_iter().map(|s| (s.name.clone(), s)).collect();
            let forward: SkillStateLedger = unique.values().cloned().collect();

            let mut shuffled: Vec<SkillState> = unique.values().cloned().collect();
            let len = shuffled.len();
            if len > 1 {
                let mut x = seed;
                for i in (1..len).rev() {
                    x = x.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                    shuffled.swap(i, (x % (i as u64 + 1)) as usize);
                }
            }
            let permuted: SkillStateLedger = shuffled.into_iter().collect();

            prop_assert_eq!(forward.hash(), permuted.hash());
        }
    }
}
