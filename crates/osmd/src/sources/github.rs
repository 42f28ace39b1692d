//! GitHub enrichment of listed entries.
//!
//! Wraps another source and, in the enrich step, fills in what its catalog
//! left empty: the license from the repository's LICENSE file, the
//! description from the first paragraph of README.md. Lookups that fail or
//! miss the deadline leave the entry as the wrapped source reported it.

use super::{AppstoreSource, Listing};
use crate::fetch::FetchContext;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use osm_core::licenses::detect_license;
use osm_core::{AppstoreId, Identifier, Result, SkillEntry};
use std::collections::HashSet;
use tokio::time::Instant;
use tracing::{debug, warn};

const RAW_CONTENT_URL: &str = "https://raw.githubusercontent.com";
/// Entries looked up at once.
const ENRICH_CONCURRENCY: usize = 4;

pub struct GithubEnricher {
    inner: Box<dyn AppstoreSource>,
}

impl std::fmt::Debug for GithubEnricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubEnricher")
            .field("appstore", &self.inner.appstore_id())
            .finish_non_exhaustive()
    }
}

impl GithubEnricher {
    pub fn new(inner: Box<dyn AppstoreSource>) -> Self {
        Self { inner }
    }

    async fn enrich_entry(&self, ctx: &FetchContext, mut entry: SkillEntry) -> SkillEntry {
        let Ok((owner, repo)) = entry.owner_repo() else {
            return entry;
        };
        let reference = if entry.branch.is_empty() {
            "HEAD".to_string()
        } else {
            entry.branch.clone()
        };
        let appstore = self.inner.appstore_id();

        if entry.license.is_none() {
            let url = raw_url(&owner, &repo, &reference, "LICENSE");
            match ctx.get(&url, appstore).await {
                Ok(body) => {
                    entry.license = detect_license(&String::from_utf8_lossy(&body));
                }
                Err(e) => debug!(%url, error = %e, "no license file"),
            }
        }

        if entry.description.is_empty() {
            let url = raw_url(&owner, &repo, &reference, "README.md");
            match ctx.get(&url, appstore).await {
                Ok(body) => {
                    let summary = readme_summary(&String::from_utf8_lossy(&body));
                    if entry.short_description.is_empty() {
                        entry.short_description = summary.clone();
                    }
                    entry.description = summary;
                }
                Err(e) => debug!(%url, error = %e, "no readme"),
            }
        }
        entry
    }
}

fn raw_url(owner: &str, repo: &str, reference: &str, file: &str) -> String {
    format!(
        "{RAW_CONTENT_URL}/{owner}/{repo}/{}/{file}",
        urlencoding::encode(reference)
    )
}

/// First prose paragraph of a README: headings, badges, images and HTML
/// lines are skipped.
pub fn readme_summary(readme: &str) -> String {
    let mut paragraph: Vec<&str> = Vec::new();
    for line in readme.lines().map(str::trim) {
        let skip = line.starts_with('#')
            || line.starts_with("[![")
            || line.starts_with("![")
            || line.starts_with('<')
            || line.starts_with("---")
            || line.starts_with("```");
        if line.is_empty() || skip {
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        paragraph.push(line);
    }
    paragraph.join(" ")
}

#[async_trait]
impl AppstoreSource for GithubEnricher {
    fn appstore_id(&self) -> AppstoreId {
        self.inner.appstore_id()
    }

    async fn list_skills(
        &self,
        ctx: &FetchContext,
        skiplist: &HashSet<Identifier>,
    ) -> Result<Listing> {
        self.inner.list_skills(ctx, skiplist).await
    }

    async fn enrich(&self, ctx: &FetchContext, listing: Listing, deadline: Instant) -> Listing {
        let mut listing = self.inner.enrich(ctx, listing, deadline).await;
        let appstore = self.appstore_id();

        let lookups: Vec<(usize, SkillEntry)> = listing
            .items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| item.as_ref().ok().map(|entry| (i, entry)))
            .filter(|(_, entry)| needs_lookup(entry))
            .map(|(i, entry)| (i, entry.clone()))
            .collect();
        let wanted = lookups.len();

        let results = stream::iter(lookups)
            .map(|(i, entry)| async move { (i, self.enrich_entry(ctx, entry).await) })
            .buffered(ENRICH_CONCURRENCY);
        let mut results = std::pin::pin!(results);

        let mut done = 0;
        let mut found_nothing = 0;
        loop {
            match tokio::time::timeout_at(deadline, results.next()).await {
                Ok(Some((i, entry))) => {
                    done += 1;
                    if entry.license.is_none() && entry.description.is_empty() {
                        found_nothing += 1;
                    }
                    listing.items[i] = Ok(entry);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        %appstore,
                        enriched = done,
                        remaining = wanted - done,
                        "github enrichment budget exhausted, keeping remaining entries as listed"
                    );
                    break;
                }
            }
        }

        if found_nothing > 0 {
            warn!(
                %appstore,
                failures = found_nothing,
                "github enrichment found nothing for some entries"
            );
        }
        listing
    }
}

fn needs_lookup(entry: &SkillEntry) -> bool {
    entry.identifier.as_str().starts_with("https://github.com/")
        && (entry.license.is_none() || entry.description.is_empty())
}
