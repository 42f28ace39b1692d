//! Catalogs stored as a file in a GitHub repository, read through the
//! contents API. The API wraps the file in a JSON object whose `content`
//! is line-wrapped base64.

use super::record::parse_flat_list;
use super::{AppstoreSource, Listing};
use crate::fetch::FetchContext;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use osm_core::{AppstoreId, Error, Identifier, Result};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::debug;

/// GitHub API base URL
const GITHUB_API_URL: &str = "https://api.github.com";

/// Contents API response (fields we use).
#[derive(Debug, Deserialize)]
struct ContentsResponse {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GitApiSource {
    appstore: AppstoreId,
    owner: String,
    repo: String,
    path: String,
    reference: String,
}

impl GitApiSource {
    pub fn new(appstore: AppstoreId, owner: &str, repo: &str, path: &str, reference: &str) -> Self {
        Self {
            appstore,
            owner: owner.to_string(),
            repo: repo.to_string(),
            path: path.to_string(),
            reference: reference.to_string(),
        }
    }

    pub fn contents_url(&self) -> String {
        format!(
            "{GITHUB_API_URL}/repos/{}/{}/contents/{}?ref={}",
            self.owner,
            self.repo,
            self.path,
            urlencoding::encode(&self.reference)
        )
    }
}

/// Unwrap the base64 payload of a contents API response.
pub fn decode_contents(body: &[u8], appstore: AppstoreId) -> Result<Vec<u8>> {
    let response: ContentsResponse = serde_json::from_slice(body)
        .map_err(|e| Error::source_unavailable(format!("{appstore}: bad contents response: {e}")))?;
    if let Some(encoding) = response.encoding.as_deref() {
        if encoding != "base64" {
            return Err(Error::source_unavailable(format!(
                "{appstore}: unsupported content encoding '{encoding}'"
            )));
        }
    }
    let content = response
        .content
        .ok_or_else(|| Error::source_unavailable(format!("{appstore}: response has no content")))?;
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| Error::source_unavailable(format!("{appstore}: invalid base64 content: {e}")))
}

#[async_trait]
impl AppstoreSource for GitApiSource {
    fn appstore_id(&self) -> AppstoreId {
        self.appstore
    }

    async fn list_skills(
        &self,
        ctx: &FetchContext,
        skiplist: &HashSet<Identifier>,
    ) -> Result<Listing> {
        let url = self.contents_url();
        let body = ctx.get(&url, self.appstore).await?;
        let decoded = decode_contents(&body, self.appstore)?;
        let items = parse_flat_list(&decoded, self.appstore)?;
        debug!(appstore = %self.appstore, %url, records = items.len(), "contents decoded");
        Ok(Listing::from_items(items, skiplist))
    }
}
