//! osmd - skills manager engine and sync daemon.
//!
//! [`SkillsManager`] ties the pieces together: appstore settings and
//! credentials, the source adapters, the sync engine, the catalog search and
//! the device state ledger. [`Daemon`] runs periodic sync passes on top of it.

pub mod fetch;
pub mod registry;
pub mod search;
pub mod sources;
pub mod storage;
pub mod sync;
pub mod tokens;

use fetch::{Fetch, FetchContext, HttpFetcher, RetryPolicy};
use osm_core::events::{
    EventPayload, EventSink, SearchFinishedPayload, SearchStartedPayload, StorePayload,
    StorePriorityPayload,
};
use osm_core::state::{InstallationStatus, SkillStateTracker};
use osm_core::{AppstoreConfig, AppstoreId, AppstoreSettings, Config, Identifier, Result};
use registry::{Catalog, Registry};
use search::{SearchHit, SearchQuery};
use std::sync::Arc;
use std::time::Duration;
use storage::CatalogStore;
use sync::{PlannedSource, SyncEngine, SyncLimits, SyncOptions, SyncReport};
use tokens::TokenStore;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use registry::CatalogRecord;
pub use search::SearchField;
pub use sync::{SourceOutcome, SyncPhase};

/// Entry point for every skills-manager operation.
pub struct SkillsManager {
    config: Config,
    settings: Mutex<AppstoreSettings>,
    tokens: Arc<TokenStore>,
    fetcher: Arc<dyn Fetch>,
    engine: SyncEngine,
    state: Mutex<SkillStateTracker>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for SkillsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillsManager")
            .field("data_dir", &self.config.data_dir)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl SkillsManager {
    /// Open with the HTTP fetcher described by `config`.
    pub fn open(config: Config, sink: Arc<dyn EventSink>) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.user_agent, config.fetch_timeout(), config.cache_ttl())?;
        Self::with_fetcher(config, Arc::new(fetcher), sink)
    }

    /// Open with a custom fetcher.
    ///
    /// Loads appstore settings, the catalog cache and the state ledger from
    /// `config.data_dir`. An unreadable catalog cache is logged and replaced
    /// by an empty catalog; the next sync rewrites it.
    pub fn with_fetcher(
        config: Config,
        fetcher: Arc<dyn Fetch>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let settings = AppstoreSettings::load(&config.data_dir)?;
        let tokens = Arc::new(TokenStore::from_settings(&settings));

        let store = CatalogStore::new(&config.data_dir);
        let catalog = match store.load() {
            Ok(doc) => doc.catalog,
            Err(e) => {
                warn!(path = %store.path().display(), error = %e, "ignoring unreadable catalog cache");
                Catalog::new()
            }
        };
        let engine = SyncEngine::new(
            Arc::new(Registry::new(catalog)),
            store,
            Arc::clone(&sink),
            SyncLimits {
                max_concurrent: config.max_concurrent_fetches,
                fetch_timeout: config.fetch_timeout(),
                enrich_timeout: config.enrich_timeout(),
            },
        );
        let state = SkillStateTracker::open(&config.data_dir, Arc::clone(&sink))?;

        info!(
            data_dir = %config.data_dir.display(),
            catalog = engine.registry().snapshot().len(),
            "skills manager ready"
        );
        Ok(Self {
            config,
            settings: Mutex::new(settings),
            tokens,
            fetcher,
            engine,
            state: Mutex::new(state),
            sink,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Snapshot of every appstore's configuration.
    pub async fn settings(&self) -> AppstoreSettings {
        self.settings.lock().await.clone()
    }

    pub async fn appstore(&self, id: AppstoreId) -> AppstoreConfig {
        self.settings.lock().await.get(id)
    }

    /// Activate an appstore. Returns whether it was inactive.
    pub async fn enable(&self, id: AppstoreId) -> Result<bool> {
        let mut settings = self.settings.lock().await;
        let changed = settings.enable(id);
        if changed {
            settings.save(&self.config.data_dir)?;
            info!(appstore = %id, "appstore enabled");
            self.sink
                .emit(EventPayload::StoreEnabled(StorePayload { appstore: id }));
        }
        Ok(changed)
    }

    /// Deactivate an appstore. Its catalog entries stay until a rebuild.
    pub async fn disable(&self, id: AppstoreId) -> Result<bool> {
        let mut settings = self.settings.lock().await;
        let changed = settings.disable(id);
        if changed {
            settings.save(&self.config.data_dir)?;
            info!(appstore = %id, "appstore disabled");
            self.sink
                .emit(EventPayload::StoreDisabled(StorePayload { appstore: id }));
        }
        Ok(changed)
    }

    /// Change merge priority. Takes effect on the next sync.
    pub async fn set_priority(&self, id: AppstoreId, priority: i64) -> Result<()> {
        let mut settings = self.settings.lock().await;
        settings.set_priority(id, priority);
        settings.save(&self.config.data_dir)?;
        info!(appstore = %id, priority, "appstore priority changed");
        self.sink
            .emit(EventPayload::StorePriorityChanged(StorePriorityPayload {
                appstore: id,
                priority,
            }));
        Ok(())
    }

    pub async fn set_parse_github(&self, id: AppstoreId, parse_github: bool) -> Result<()> {
        let mut settings = self.settings.lock().await;
        settings.set_parse_github(id, parse_github);
        settings.save(&self.config.data_dir)
    }

    /// Store (or clear) a credential and rotate it in the token store.
    /// Passes already in flight keep the credential they started with.
    pub async fn set_auth_token(&self, id: AppstoreId, token: Option<String>) -> Result<u64> {
        let mut settings = self.settings.lock().await;
        settings.set_auth_token(id, token);
        settings.save(&self.config.data_dir)?;
        let generation = self.tokens.rotate(id, settings.get(id).auth_token);
        info!(appstore = %id, generation, "appstore token changed");
        self.sink
            .emit(EventPayload::StoreTokenChanged(StorePayload { appstore: id }));
        Ok(generation)
    }

    /// Current catalog snapshot.
    pub fn catalog(&self) -> Arc<Catalog> {
        self.engine.registry().snapshot()
    }

    /// Run one sync pass over the active appstores.
    pub async fn sync(&self, options: SyncOptions, cancel: CancellationToken) -> Result<SyncReport> {
        let active = self.settings.lock().await.active();
        let plan: Vec<PlannedSource> = active
            .iter()
            .map(|store| PlannedSource {
                priority: store.priority,
                source: sources::build_source(store, &self.config, options.parse_github),
            })
            .collect();
        let ctx = FetchContext::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.tokens),
            RetryPolicy {
                retries: self.config.fetch_retries,
                backoff: self.config.retry_backoff(),
            },
        );
        self.engine.sync(plan, ctx, options, cancel).await
    }

    /// Search one field of the current catalog.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        self.sink.emit(EventPayload::SearchStarted(SearchStartedPayload {
            field: query.field.to_string(),
            query: query.query.clone(),
        }));
        let hits = search::search(&self.catalog(), query)?;
        self.sink.emit(EventPayload::SearchFinished(SearchFinishedPayload {
            field: query.field.to_string(),
            query: query.query.clone(),
            count: hits.len(),
        }));
        Ok(hits)
    }

    /// Search every field, broadest match last.
    pub fn search_any(
        &self,
        query: &str,
        fuzzy: bool,
        ignore_case: bool,
        threshold: f64,
    ) -> Result<Vec<SearchHit>> {
        self.sink.emit(EventPayload::SearchStarted(SearchStartedPayload {
            field: "any".to_string(),
            query: query.to_string(),
        }));
        let hits = search::search_any(&self.catalog(), query, fuzzy, ignore_case, threshold)?;
        self.sink.emit(EventPayload::SearchFinished(SearchFinishedPayload {
            field: "any".to_string(),
            query: query.to_string(),
            count: hits.len(),
        }));
        Ok(hits)
    }

    /// Exclusive access to the device state ledger.
    pub async fn state(&self) -> MutexGuard<'_, SkillStateTracker> {
        self.state.lock().await
    }

    /// Whether the catalog entry for `id` is installed on this device.
    ///
    /// The entry's install folder is looked up in the state ledger; only
    /// `installation = installed` counts.
    pub async fn installed(&self, id: &Identifier) -> bool {
        let catalog = self.catalog();
        let Some(entry) = catalog.get(id) else {
            return false;
        };
        let state = self.state.lock().await;
        state
            .get(&entry.foldername)
            .is_some_and(|s| s.installation == InstallationStatus::Installed)
    }
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub interval: Duration,
    /// Run a single pass and exit.
    pub once: bool,
    pub options: SyncOptions,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            once: false,
            options: SyncOptions::default(),
        }
    }
}

/// Periodic sync loop.
#[derive(Debug)]
pub struct Daemon {
    manager: Arc<SkillsManager>,
    config: DaemonConfig,
    shutdown: CancellationToken,
}

impl Daemon {
    pub fn new(manager: Arc<SkillsManager>, config: DaemonConfig) -> Self {
        Self {
            manager,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn manager(&self) -> &Arc<SkillsManager> {
        &self.manager
    }

    /// Sync now, then every interval, until shut down.
    ///
    /// Per-source failures are logged and retried next interval; a
    /// persistence failure ends the loop.
    pub async fn run(&self) -> Result<()> {
        info!(
            interval_sec = self.config.interval.as_secs(),
            once = self.config.once,
            "osmd starting"
        );
        loop {
            let report = self
                .manager
                .sync(self.config.options, self.shutdown.child_token())
                .await?;
            if report.all_failed() {
                error!(pass_id = %report.pass_id, "every appstore failed this pass");
            }

            if self.config.once || self.shutdown.is_cancelled() {
                break;
            }
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(self.config.interval) => {}
            }
        }
        info!("osmd stopped");
        Ok(())
    }

    /// Stop after the current pass; sources not yet started are skipped.
    pub fn shutdown(&self) {
        info!("shutdown requested");
        self.shutdown.cancel();
    }
}

