//! Process-wide credential store for rate-limited appstores.
//!
//! Reads are concurrent; rotations are serialized by the write lock and bump
//! a per-store generation. A request remembers the generation it was issued
//! with, so a 401 on a rotated credential is reported as an authentication
//! failure instead of being silently retried with the new token.

use osm_core::{AppstoreId, AppstoreSettings};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// A token snapshot handed to one request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub generation: u64,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("generation", &self.generation)
            .finish()
    }
}

#[derive(Debug, Default)]
struct Slot {
    token: Option<String>,
    generation: u64,
}

/// Shared token store keyed by appstore.
#[derive(Debug, Default)]
pub struct TokenStore {
    slots: RwLock<HashMap<AppstoreId, Slot>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from persisted appstore configuration.
    pub fn from_settings(settings: &AppstoreSettings) -> Self {
        let store = Self::new();
        for config in settings.iter() {
            if let Some(token) = &config.auth_token {
                store.rotate(config.appstore_id, Some(token.clone()));
            }
        }
        store
    }

    /// Current credential, if a token is set.
    pub fn credential(&self, appstore: AppstoreId) -> Option<Credential> {
        let slots = self.slots.read().ok()?;
        let slot = slots.get(&appstore)?;
        slot.token.as_ref().map(|token| Credential {
            token: token.clone(),
            generation: slot.generation,
        })
    }

    /// Current generation (0 when never set).
    pub fn generation(&self, appstore: AppstoreId) -> u64 {
        self.slots
            .read()
            .ok()
            .and_then(|slots| slots.get(&appstore).map(|s| s.generation))
            .unwrap_or(0)
    }

    /// Replace (or clear) the token, returning the new generation.
    pub fn rotate(&self, appstore: AppstoreId, token: Option<String>) -> u64 {
        let Ok(mut slots) = self.slots.write() else {
            return 0;
        };
        let slot = slots.entry(appstore).or_default();
        slot.token = token;
        slot.generation += 1;
        slot.generation
    }

    /// Whether a credential issued at `generation` has since been rotated.
    pub fn is_stale(&self, appstore: AppstoreId, generation: u64) -> bool {
        self.generation(appstore) > generation
    }
}
