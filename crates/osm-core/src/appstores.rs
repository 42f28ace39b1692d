//! Per-appstore configuration: enable flag, merge priority, credentials.
//!
//! Persisted as `<data_dir>/appstores.json`. Stores missing from the file are
//! back-filled with their defaults on load; stores already present are never
//! overwritten.

use crate::error::Result;
use crate::persist::{read_json, write_json_atomic};
use crate::types::AppstoreId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// File name of the appstore configuration inside the data directory.
pub const APPSTORES_FILE: &str = "appstores.json";

/// Configuration for one appstore.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppstoreConfig {
    pub appstore_id: AppstoreId,
    pub active: bool,
    /// Lower value wins merge conflicts.
    pub priority: i64,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Fetch per-repository README/LICENSE to enrich entries.
    #[serde(default)]
    pub parse_github: bool,
    /// Homepage, or the skills directory for `local`.
    #[serde(default)]
    pub url: String,
}

impl fmt::Debug for AppstoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppstoreConfig")
            .field("appstore_id", &self.appstore_id)
            .field("active", &self.active)
            .field("priority", &self.priority)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("parse_github", &self.parse_github)
            .field("url", &self.url)
            .finish()
    }
}

impl AppstoreConfig {
    /// Built-in defaults: `local` and `ovos` active, the rest opt-in.
    pub fn default_for(id: AppstoreId) -> Self {
        let (active, priority, url) = match id {
            AppstoreId::Local => (true, 1, ""),
            AppstoreId::Ovos => (true, 2, "https://github.com/OpenVoiceOS/OVOS-appstore"),
            AppstoreId::MycroftMarketplace => (false, 5, "https://market.mycroft.ai/"),
            AppstoreId::Pling => (false, 10, "https://apps.plasma-bigscreen.org/"),
            AppstoreId::Neon => (
                false,
                50,
                "https://github.com/NeonGeckoCom/neon-skills-submodules/",
            ),
            AppstoreId::Andlo => (false, 100, "https://andlo.gitbook.io/mycroft-skills-list/"),
        };
        Self {
            appstore_id: id,
            active,
            priority,
            auth_token: None,
            parse_github: false,
            url: url.to_string(),
        }
    }
}

/// All appstore configurations, keyed by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppstoreSettings {
    stores: BTreeMap<AppstoreId, AppstoreConfig>,
}

impl Default for AppstoreSettings {
    fn default() -> Self {
        let stores = AppstoreId::ALL
            .iter()
            .map(|id| (*id, AppstoreConfig::default_for(*id)))
            .collect();
        Self { stores }
    }
}

impl AppstoreSettings {
    /// Load from `<data_dir>/appstores.json`, back-filling missing stores.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(APPSTORES_FILE);
        let Some(mut stores) = read_json::<BTreeMap<AppstoreId, AppstoreConfig>>(&path)? else {
            return Ok(Self::default());
        };
        for (id, config) in &mut stores {
            config.appstore_id = *id;
        }
        for id in AppstoreId::ALL {
            stores
                .entry(id)
                .or_insert_with(|| AppstoreConfig::default_for(id));
        }
        Ok(Self { stores })
    }

    /// Atomically write to `<data_dir>/appstores.json`.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        write_json_atomic(&data_dir.join(APPSTORES_FILE), &self.stores)
    }

    pub fn get(&self, id: AppstoreId) -> AppstoreConfig {
        self.stores
            .get(&id)
            .cloned()
            .unwrap_or_else(|| AppstoreConfig::default_for(id))
    }

    fn get_mut(&mut self, id: AppstoreId) -> &mut AppstoreConfig {
        self.stores
            .entry(id)
            .or_insert_with(|| AppstoreConfig::default_for(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppstoreConfig> {
        self.stores.values()
    }

    /// Active stores ordered by priority, then id.
    pub fn active(&self) -> Vec<AppstoreConfig> {
        let mut active: Vec<AppstoreConfig> =
            self.stores.values().filter(|c| c.active).cloned().collect();
        active.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.appstore_id.cmp(&b.appstore_id))
        });
        active
    }

    /// Returns whether the flag changed.
    pub fn enable(&mut self, id: AppstoreId) -> bool {
        let config = self.get_mut(id);
        let changed = !config.active;
        config.active = true;
        changed
    }

    /// Returns whether the flag changed. Catalog entries are left alone.
    pub fn disable(&mut self, id: AppstoreId) -> bool {
        let config = self.get_mut(id);
        let changed = config.active;
        config.active = false;
        changed
    }

    /// Takes effect on the next sync; nothing is re-merged here.
    pub fn set_priority(&mut self, id: AppstoreId, priority: i64) {
        self.get_mut(id).priority = priority;
    }

    pub fn set_parse_github(&mut self, id: AppstoreId, parse_github: bool) {
        self.get_mut(id).parse_github = parse_github;
    }

    /// Store or clear a credential. Blank tokens clear.
    pub fn set_auth_token(&mut self, id: AppstoreId, token: Option<String>) {
        self.get_mut(id).auth_token = token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
    }
}
