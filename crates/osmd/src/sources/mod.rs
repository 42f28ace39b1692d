//! Appstore adapters.
//!
//! Every appstore is an [`AppstoreSource`]: one `list_skills` call fetches
//! the source once and yields per-entry results. Entry-level failures
//! (`MalformedEntry`, `InvalidIdentifier`) travel inside the listing; only a
//! failure of the source as a whole is returned as `Err`.

pub mod git_api;
pub mod github;
pub mod json_catalog;
pub mod local;
pub mod record;

use crate::fetch::FetchContext;
use async_trait::async_trait;
use osm_core::{AppstoreConfig, AppstoreId, Config, Identifier, Result, SkillEntry};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::time::Instant;

pub use git_api::GitApiSource;
pub use github::GithubEnricher;
pub use json_catalog::{CatalogFormat, JsonCatalogSource};
pub use local::LocalSource;

/// Mycroft marketplace metadata, per release branch.
pub const MARKETPLACE_URL_TEMPLATE: &str =
    "https://raw.githubusercontent.com/MycroftAI/mycroft-skills-data/{branch}/skill-metadata.json";
/// Community list maintained by andlo.
pub const ANDLO_URL: &str =
    "https://raw.githubusercontent.com/andlo/mycroft-skills-list/master/skills.json";
/// Plasma Bigscreen skill listing.
pub const PLING_URL: &str = "https://apps.plasma-bigscreen.org/skills.json";

/// Result of one `list_skills` call.
#[derive(Debug, Default)]
pub struct Listing {
    /// Entries withheld because their identifier was in the skiplist.
    pub skipped: usize,
    /// Accepted entries and per-entry errors, in source order.
    pub items: Vec<Result<SkillEntry>>,
}

impl Listing {
    /// Add an item unless it is a skiplisted entry.
    pub fn offer(&mut self, item: Result<SkillEntry>, skiplist: &HashSet<Identifier>) {
        if let Ok(entry) = &item {
            if skiplist.contains(&entry.identifier) {
                self.skipped += 1;
                return;
            }
        }
        self.items.push(item);
    }

    pub fn from_items(
        items: impl IntoIterator<Item = Result<SkillEntry>>,
        skiplist: &HashSet<Identifier>,
    ) -> Self {
        let mut listing = Self::default();
        for item in items {
            listing.offer(item, skiplist);
        }
        listing
    }

    pub fn entries(&self) -> impl Iterator<Item = &SkillEntry> {
        self.items.iter().filter_map(|r| r.as_ref().ok())
    }
}

/// A source of skill metadata.
#[async_trait]
pub trait AppstoreSource: Send + Sync {
    fn appstore_id(&self) -> AppstoreId;

    /// Fetch the source and list its skills, withholding skiplisted ids.
    /// Each call re-fetches.
    async fn list_skills(
        &self,
        ctx: &FetchContext,
        skiplist: &HashSet<Identifier>,
    ) -> Result<Listing>;

    /// Fill in extra metadata for a listing until `deadline`. Never fails:
    /// entries not reached in time are returned as listed.
    async fn enrich(&self, _ctx: &FetchContext, listing: Listing, _deadline: Instant) -> Listing {
        listing
    }
}

/// Build the adapter for an appstore, wrapped in GitHub enrichment when the
/// store (or the pass) asks for it.
pub fn build_source(
    store: &AppstoreConfig,
    settings: &Config,
    parse_github: bool,
) -> Box<dyn AppstoreSource> {
    let id = store.appstore_id;
    let source: Box<dyn AppstoreSource> = match id {
        AppstoreId::Local => {
            let dir = if store.url.trim().is_empty() {
                settings.skills_dir.clone()
            } else {
                PathBuf::from(store.url.trim())
            };
            Box::new(LocalSource::new(dir))
        }
        AppstoreId::MycroftMarketplace => Box::new(JsonCatalogSource::new(
            id,
            MARKETPLACE_URL_TEMPLATE.replace("{branch}", &settings.marketplace_branch),
            CatalogFormat::MarketplaceMap,
        )),
        AppstoreId::Andlo => Box::new(JsonCatalogSource::new(
            id,
            ANDLO_URL.to_string(),
            CatalogFormat::FlatList,
        )),
        AppstoreId::Pling => Box::new(JsonCatalogSource::new(
            id,
            PLING_URL.to_string(),
            CatalogFormat::FlatList,
        )),
        AppstoreId::Ovos => Box::new(GitApiSource::new(
            id,
            "OpenVoiceOS",
            "OVOS-appstore",
            "index.json",
            "master",
        )),
        AppstoreId::Neon => Box::new(GitApiSource::new(
            id,
            "NeonGeckoCom",
            "neon-skills-submodules",
            "skill_metadata.json",
            "master",
        )),
    };
    // Local manifests are authoritative; never enrich them over the network.
    if (store.parse_github || parse_github) && id != AppstoreId::Local {
        Box::new(GithubEnricher::new(source))
    } else {
        source
    }
}
