//! Sync engine.
//!
//! A pass fetches every planned source concurrently (bounded by a
//! semaphore), then merges the listings one at a time into a working copy of
//! the catalog, persists it and publishes it. A source that fails, times out
//! or never starts is recorded in the report and does not fail the pass.
//! Only persistence errors propagate.

use crate::fetch::FetchContext;
use crate::registry::{Catalog, Registry};
use crate::sources::{AppstoreSource, Listing};
use crate::storage::{CatalogMeta, CatalogStore};
use chrono::{DateTime, Utc};
use osm_core::events::{
    EventPayload, EventSink, StorePayload, StoreSyncFailedPayload, StoreSyncFinishedPayload,
    SyncCompletedPayload, SyncStartedPayload,
};
use osm_core::{AppstoreId, Error, ErrorKind, Identifier, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the engine is in the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "appstore", rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Fetching(AppstoreId),
    Merging(AppstoreId),
}

/// Options for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Skip identifiers already in the catalog.
    pub new_only: bool,
    /// Add to the existing catalog instead of rebuilding it.
    pub merge: bool,
    /// Enrich every source from GitHub, not only stores that opt in.
    pub parse_github: bool,
}

/// One source to sync.
pub struct PlannedSource {
    pub priority: i64,
    pub source: Box<dyn AppstoreSource>,
}

impl std::fmt::Debug for PlannedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedSource")
            .field("appstore", &self.source.appstore_id())
            .field("priority", &self.priority)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceOutcome {
    Merged {
        fetched: usize,
        adopted: usize,
        skipped: usize,
        rejected: usize,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
    /// Cancelled before the fetch began.
    NotStarted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub appstore: AppstoreId,
    pub priority: i64,
    #[serde(flatten)]
    pub outcome: SourceOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub pass_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub sources: Vec<SourceReport>,
    pub catalog_size: usize,
}

impl SyncReport {
    /// Sources that were attempted and failed.
    pub fn failed(&self) -> Vec<AppstoreId> {
        self.sources
            .iter()
            .filter(|s| matches!(s.outcome, SourceOutcome::Failed { .. }))
            .map(|s| s.appstore)
            .collect()
    }

    pub fn not_started(&self) -> Vec<AppstoreId> {
        self.sources
            .iter()
            .filter(|s| s.outcome == SourceOutcome::NotStarted)
            .map(|s| s.appstore)
            .collect()
    }

    /// True when at least one source was attempted and every attempt failed.
    pub fn all_failed(&self) -> bool {
        let mut attempted = self
            .sources
            .iter()
            .filter(|s| s.outcome != SourceOutcome::NotStarted)
            .peekable();
        attempted.peek().is_some()
            && attempted.all(|s| matches!(s.outcome, SourceOutcome::Failed { .. }))
    }
}

/// Limits for one engine.
#[derive(Debug, Clone, Copy)]
pub struct SyncLimits {
    pub max_concurrent: usize,
    /// Applies to a source's listing only.
    pub fetch_timeout: Duration,
    /// Budget for enriching a listing once it arrived.
    pub enrich_timeout: Duration,
}

impl Default for SyncLimits {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            fetch_timeout: Duration::from_secs(30),
            enrich_timeout: Duration::from_secs(120),
        }
    }
}

pub struct SyncEngine {
    registry: Arc<Registry>,
    store: CatalogStore,
    sink: Arc<dyn EventSink>,
    phase: Arc<watch::Sender<SyncPhase>>,
    limits: SyncLimits,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("store", &self.store)
            .field("phase", &*self.phase.borrow())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

type FetchOutcome = (AppstoreId, Option<Result<Listing>>);

impl SyncEngine {
    pub fn new(
        registry: Arc<Registry>,
        store: CatalogStore,
        sink: Arc<dyn EventSink>,
        limits: SyncLimits,
    ) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            registry,
            store,
            sink,
            phase: Arc::new(phase),
            limits: SyncLimits {
                max_concurrent: limits.max_concurrent.max(1),
                ..limits
            },
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Follow the engine's phase.
    pub fn subscribe(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    /// Run one pass over `plan`.
    pub async fn sync(
        &self,
        plan: Vec<PlannedSource>,
        ctx: FetchContext,
        options: SyncOptions,
        cancel: CancellationToken,
    ) -> Result<SyncReport> {
        let _writer = self.registry.writer().await;
        let started_at = Utc::now();
        let pass_id = uuid::Uuid::now_v7().to_string();
        let previous = self.registry.snapshot();

        let skiplist: Arc<HashSet<Identifier>> = Arc::new(if options.new_only {
            previous.identifiers()
        } else {
            HashSet::new()
        });
        let priorities: HashMap<AppstoreId, i64> = plan
            .iter()
            .map(|p| (p.source.appstore_id(), p.priority))
            .collect();
        let mut order: Vec<(i64, AppstoreId)> =
            priorities.iter().map(|(id, priority)| (*priority, *id)).collect();
        order.sort_unstable();

        info!(
            %pass_id,
            sources = order.len(),
            new_only = options.new_only,
            merge = options.merge,
            "sync pass started"
        );
        self.sink.emit(EventPayload::SyncStarted(SyncStartedPayload {
            pass_id: pass_id.clone(),
            sources: order.iter().map(|(_, id)| *id).collect(),
            new_only: options.new_only,
            merge: options.merge,
        }));

        let mut fetched = self.fetch_all(plan, &ctx, &skiplist, &cancel).await;

        // Merge serially in priority order.
        let mut working = if options.merge {
            (*previous).clone()
        } else {
            Catalog::new()
        };
        let mut reports = Vec::with_capacity(order.len());
        let mut carry: Vec<AppstoreId> = Vec::new();
        for (priority, appstore) in order {
            let outcome = match fetched.remove(&appstore).flatten() {
                None => {
                    debug!(%appstore, "source not started");
                    carry.push(appstore);
                    SourceOutcome::NotStarted
                }
                Some(Err(e)) => {
                    warn!(%appstore, kind = %e.kind, error = %e.message, "source failed");
                    self.sink.emit(EventPayload::StoreSyncFailed(StoreSyncFailedPayload {
                        appstore,
                        kind: e.kind,
                        message: e.message.clone(),
                    }));
                    carry.push(appstore);
                    SourceOutcome::Failed {
                        kind: e.kind,
                        message: e.message,
                    }
                }
                Some(Ok(listing)) => {
                    self.phase.send_replace(SyncPhase::Merging(appstore));
                    let outcome = merge_listing(&mut working, appstore, priority, listing);
                    if let SourceOutcome::Merged {
                        fetched,
                        adopted,
                        rejected,
                        ..
                    } = &outcome
                    {
                        self.sink
                            .emit(EventPayload::StoreSyncFinished(StoreSyncFinishedPayload {
                                appstore,
                                fetched: *fetched,
                                adopted: *adopted,
                                rejected: *rejected,
                            }));
                    }
                    if options.new_only && !options.merge {
                        // Skiplisted ids were withheld, not dropped upstream.
                        working.carry_over(&previous, previous.reported_by(appstore));
                    }
                    outcome
                }
            };
            reports.push(SourceReport {
                appstore,
                priority,
                outcome,
            });
        }

        if !options.merge {
            for appstore in carry {
                working.carry_over(&previous, previous.reported_by(appstore));
            }
        }

        let finished_at = Utc::now();
        let meta = CatalogMeta {
            last_sync: Some(finished_at.timestamp()),
            pass_id: Some(pass_id.clone()),
        };
        let saved = self.store.save(&working, meta);
        self.phase.send_replace(SyncPhase::Idle);
        saved?;

        let catalog_size = working.len();
        self.registry.publish(working);

        let report = SyncReport {
            pass_id,
            started_at,
            finished_at,
            cancelled: cancel.is_cancelled(),
            sources: reports,
            catalog_size,
        };
        info!(
            pass_id = %report.pass_id,
            catalog_size,
            failed = report.failed().len(),
            not_started = report.not_started().len(),
            "sync pass completed"
        );
        self.sink.emit(EventPayload::SyncCompleted(SyncCompletedPayload {
            pass_id: report.pass_id.clone(),
            sources_failed: report.failed(),
            catalog_size,
        }));
        Ok(report)
    }

    /// Fetch every source; `None` marks a source that never started.
    async fn fetch_all(
        &self,
        plan: Vec<PlannedSource>,
        ctx: &FetchContext,
        skiplist: &Arc<HashSet<Identifier>>,
        cancel: &CancellationToken,
    ) -> HashMap<AppstoreId, Option<Result<Listing>>> {
        let semaphore = Arc::new(Semaphore::new(self.limits.max_concurrent));
        let ids: Vec<AppstoreId> = plan.iter().map(|p| p.source.appstore_id()).collect();
        let mut jobs: JoinSet<FetchOutcome> = JoinSet::new();

        for planned in plan {
            let semaphore = Arc::clone(&semaphore);
            let ctx = ctx.clone();
            let skiplist = Arc::clone(skiplist);
            let cancel = cancel.clone();
            let sink = Arc::clone(&self.sink);
            let phase = Arc::clone(&self.phase);
            let timeout = self.limits.fetch_timeout;
            let enrich_timeout = self.limits.enrich_timeout;

            jobs.spawn(async move {
                let appstore = planned.source.appstore_id();
                let permit = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                // Cancellation is only honored before a fetch begins.
                let Some(_permit) = permit.filter(|_| !cancel.is_cancelled()) else {
                    return (appstore, None);
                };

                phase.send_replace(SyncPhase::Fetching(appstore));
                sink.emit(EventPayload::StoreSyncStarted(StorePayload { appstore }));
                debug!(%appstore, "fetching source");

                let listing = match tokio::time::timeout(
                    timeout,
                    planned.source.list_skills(&ctx, &skiplist),
                )
                .await
                {
                    Ok(Ok(listing)) => listing,
                    Ok(Err(e)) => return (appstore, Some(Err(e))),
                    Err(_) => {
                        let e = Error::timeout(format!(
                            "{appstore}: no response within {}s",
                            timeout.as_secs_f64()
                        ));
                        return (appstore, Some(Err(e)));
                    }
                };
                let deadline = Instant::now() + enrich_timeout;
                let listing = planned.source.enrich(&ctx, listing, deadline).await;
                (appstore, Some(Ok(listing)))
            });
        }

        let mut results = HashMap::with_capacity(ids.len());
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok((appstore, result)) => {
                    results.insert(appstore, result);
                }
                Err(e) => warn!(error = %e, "fetch task aborted"),
            }
        }
        // A task that panicked still needs an outcome.
        for id in ids {
            results.entry(id).or_insert_with(|| {
                Some(Err(Error::source_unavailable(format!("{id}: fetch task aborted"))))
            });
        }
        results
    }
}

/// Ingest the accepted entries of one listing, logging rejects.
fn merge_listing(
    working: &mut Catalog,
    appstore: AppstoreId,
    priority: i64,
    listing: Listing,
) -> SourceOutcome {
    let fetched = listing.items.len();
    let mut rejected = 0;
    let mut entries = Vec::with_capacity(fetched);
    for item in listing.items {
        match item {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                rejected += 1;
                warn!(%appstore, kind = %e.kind, error = %e.message, "entry rejected");
            }
        }
    }
    let stats = working.ingest(entries, priority);
    info!(
        %appstore,
        fetched,
        adopted = stats.adopted,
        skipped = listing.skipped,
        rejected,
        "source merged"
    );
    SourceOutcome::Merged {
        fetched,
        adopted: stats.adopted,
        skipped: listing.skipped,
        rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{Fetch, FetchError, RetryPolicy, StaticFetcher};
    use crate::sources::{CatalogFormat, GithubEnricher, JsonCatalogSource};
    use crate::tokens::TokenStore;
    use osm_core::events::MemorySink;
    use serde_json::json;
    use tempfile::TempDir;

    const ANDLO: &str = "https://example.com/andlo.json";
    const PLING: &str = "https://example.com/pling.json";

    struct Harness {
        dir: TempDir,
        engine: SyncEngine,
        fetcher: Arc<StaticFetcher>,
        sink: Arc<MemorySink>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let sink = Arc::new(MemorySink::new());
            let engine = SyncEngine::new(
                Arc::new(Registry::default()),
                CatalogStore::new(dir.path()),
                Arc::clone(&sink) as Arc<dyn EventSink>,
                SyncLimits {
                    max_concurrent: 2,
                    fetch_timeout: Duration::from_millis(200),
                    enrich_timeout: Duration::from_millis(100),
                },
            );
            Self {
                dir,
                engine,
                fetcher: Arc::new(StaticFetcher::new()),
                sink,
            }
        }

        fn ctx(&self) -> FetchContext {
            FetchContext::new(
                Arc::clone(&self.fetcher) as Arc<dyn Fetch>,
                Arc::new(TokenStore::new()),
                RetryPolicy::none(),
            )
        }

        fn plan(&self) -> Vec<PlannedSource> {
            vec![
                PlannedSource {
                    priority: 100,
                    source: Box::new(JsonCatalogSource::new(
                        AppstoreId::Andlo,
                        ANDLO.into(),
                        CatalogFormat::FlatList,
                    )),
                },
                PlannedSource {
                    priority: 10,
                    source: Box::new(JsonCatalogSource::new(
                        AppstoreId::Pling,
                        PLING.into(),
                        CatalogFormat::FlatList,
                    )),
                },
            ]
        }

        async fn run(&self, options: SyncOptions) -> SyncReport {
            self.engine
                .sync(self.plan(), self.ctx(), options, CancellationToken::new())
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn failed_source_does_not_fail_the_pass() {
        let h = Harness::new();
        h.fetcher.set_json(ANDLO, &json!([{"url": "https://github.com/a/skill-one"}]));
        h.fetcher.set_error(
            PLING,
            FetchError::Transport {
                url: PLING.into(),
                message: "refused".into(),
            },
        );

        let report = h.run(SyncOptions::default()).await;
        assert_eq!(report.failed(), vec![AppstoreId::Pling]);
        assert!(!report.all_failed());
        assert_eq!(report.catalog_size, 1);
        assert_eq!(h.engine.registry().snapshot().len(), 1);
        assert_eq!(h.engine.phase(), SyncPhase::Idle);

        let names = h.sink.names();
        assert_eq!(names.first(), Some(&"skill.sync.started"));
        assert_eq!(names.last(), Some(&"skill.sync.completed"));
        assert!(names.contains(&"skill.store.sync.failed"));
    }

    #[tokio::test]
    async fn rebuild_carries_failed_source_entries() {
        let h = Harness::new();
        h.fetcher.set_json(ANDLO, &json!([{"url": "https://github.com/a/skill-one"}]));
        h.fetcher.set_json(PLING, &json!([{"url": "https://github.com/b/skill-two"}]));
        assert_eq!(h.run(SyncOptions::default()).await.catalog_size, 2);

        h.fetcher.set_error(PLING, FetchError::Http { url: PLING.into(), status: 503 });
        let report = h.run(SyncOptions::default()).await;
        assert_eq!(report.failed(), vec![AppstoreId::Pling]);
        assert_eq!(report.catalog_size, 2);
    }

    #[tokio::test]
    async fn rebuild_keeps_the_fresh_entry_over_a_carried_one() {
        let h = Harness::new();
        let url = "https://github.com/a/skill-x";
        h.fetcher.set_json(ANDLO, &json!([{"url": url}]));
        h.fetcher.set_json(PLING, &json!([{"url": url, "description": "a old"}]));
        h.run(SyncOptions::default()).await;

        h.fetcher.set_error(ANDLO, FetchError::Http { url: ANDLO.into(), status: 503 });
        h.fetcher.set_json(PLING, &json!([{"url": url, "description": "b new"}]));
        let report = h.run(SyncOptions::default()).await;
        assert_eq!(report.failed(), vec![AppstoreId::Andlo]);

        let catalog = h.engine.registry().snapshot();
        let record = catalog.record(&Identifier::from_url(url).unwrap()).unwrap();
        assert_eq!(record.entry.source_appstore, AppstoreId::Pling);
        assert_eq!(record.entry.description, "b new");
        assert!(record.provenance.contains(&AppstoreId::Andlo));
    }

    #[tokio::test]
    async fn failed_save_publishes_nothing() {
        let h = Harness::new();
        h.fetcher.set_json(ANDLO, &json!([{"url": "https://github.com/a/skill-one"}]));
        h.fetcher.set_json(PLING, &json!([]));
        h.run(SyncOptions::default()).await;
        let catalog_path = h.dir.path().join("catalog.json");
        let bytes = std::fs::read(&catalog_path).unwrap();
        let before = h.engine.registry().snapshot();

        // Rooted at a regular file, so the data directory cannot be created.
        let engine = SyncEngine::new(
            Arc::clone(h.engine.registry()),
            CatalogStore::new(&catalog_path),
            Arc::clone(&h.sink) as Arc<dyn EventSink>,
            SyncLimits::default(),
        );
        h.fetcher.set_json(PLING, &json!([{"url": "https://github.com/b/skill-two"}]));
        let err = engine
            .sync(h.plan(), h.ctx(), SyncOptions::default(), CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::PersistenceFailure);
        assert_eq!(*h.engine.registry().snapshot(), *before);
        assert_eq!(std::fs::read(&catalog_path).unwrap(), bytes);
        assert_eq!(engine.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn slow_enrichment_keeps_the_listing() {
        let h = Harness::new();
        h.fetcher.set_json(ANDLO, &json!([{"url": "https://github.com/a/skill-one"}]));
        h.fetcher.set_json(PLING, &json!([]));
        h.fetcher
            .set_delay_for("https://raw.githubusercontent.com/", Duration::from_secs(5));
        let mut plan = h.plan();
        plan[0].source = Box::new(GithubEnricher::new(Box::new(JsonCatalogSource::new(
            AppstoreId::Andlo,
            ANDLO.into(),
            CatalogFormat::FlatList,
        ))));

        let report = h
            .engine
            .sync(plan, h.ctx(), SyncOptions::default(), CancellationToken::new())
            .await
            .unwrap();
        assert!(report.failed().is_empty());
        let andlo = report
            .sources
            .iter()
            .find(|s| s.appstore == AppstoreId::Andlo)
            .unwrap();
        assert!(matches!(andlo.outcome, SourceOutcome::Merged { adopted: 1, .. }));
        let catalog = h.engine.registry().snapshot();
        let entry = catalog
            .get(&Identifier::from_url("https://github.com/a/skill-one").unwrap())
            .unwrap();
        assert!(entry.license.is_none());
    }

    #[tokio::test]
    async fn rebuild_drops_entries_no_longer_listed() {
        let h = Harness::new();
        h.fetcher.set_json(
            ANDLO,
            &json!([
                {"url": "https://github.com/a/skill-one"},
                {"url": "https://github.com/a/skill-gone"}
            ]),
        );
        h.fetcher.set_json(PLING, &json!([]));
        assert_eq!(h.run(SyncOptions::default()).await.catalog_size, 2);

        h.fetcher.set_json(ANDLO, &json!([{"url": "https://github.com/a/skill-one"}]));
        assert_eq!(h.run(SyncOptions::default()).await.catalog_size, 1);
        let merged = h
            .run(SyncOptions {
                merge: true,
                ..SyncOptions::default()
            })
            .await;
        assert_eq!(merged.catalog_size, 1);
    }

    #[tokio::test]
    async fn rejected_entries_are_counted() {
        let h = Harness::new();
        h.fetcher.set_json(
            ANDLO,
            &json!([{"url": "https://github.com/a/skill-one"}, {"name": "no url"}, {"url": 3}]),
        );
        h.fetcher.set_json(PLING, &json!([]));
        let report = h.run(SyncOptions::default()).await;
        let andlo = report
            .sources
            .iter()
            .find(|s| s.appstore == AppstoreId::Andlo)
            .unwrap();
        assert_eq!(
            andlo.outcome,
            SourceOutcome::Merged {
                fetched: 3,
                adopted: 1,
                skipped: 0,
                rejected: 2
            }
        );
    }

    #[tokio::test]
    async fn slow_sources_time_out() {
        let h = Harness::new();
        h.fetcher.set_json(ANDLO, &json!([{"url": "https://github.com/a/skill-one"}]));
        h.fetcher.set_json(PLING, &json!([]));
        h.fetcher.set_delay(Some(Duration::from_secs(5)));

        let report = h.run(SyncOptions::default()).await;
        assert!(report.all_failed());
        assert!(report
            .sources
            .iter()
            .all(|s| matches!(s.outcome, SourceOutcome::Failed { kind: ErrorKind::Timeout, .. })));
    }

    #[tokio::test]
    async fn cancelled_pass_starts_nothing() {
        let h = Harness::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = h
            .engine
            .sync(h.plan(), h.ctx(), SyncOptions::default(), cancel)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.not_started().len(), 2);
        assert!(!report.all_failed());
        assert!(h.fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn phase_is_observable() {
        let h = Harness::new();
        let mut rx = h.engine.subscribe();
        h.fetcher.set_json(ANDLO, &json!([]));
        h.fetcher.set_json(PLING, &json!([]));
        h.run(SyncOptions::default()).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), SyncPhase::Idle);
    }
}
