//! Remote JSON catalogs served from a fixed URL.

use super::record::{parse_flat_list, parse_marketplace};
use super::{AppstoreSource, Listing};
use crate::fetch::FetchContext;
use async_trait::async_trait;
use osm_core::{AppstoreId, Identifier, Result};
use std::collections::HashSet;
use tracing::debug;

/// Document shape of a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFormat {
    /// `{ name: record }` as published for the mycroft marketplace.
    MarketplaceMap,
    /// `[record, ...]` flat descriptors.
    FlatList,
}

#[derive(Debug, Clone)]
pub struct JsonCatalogSource {
    appstore: AppstoreId,
    url: String,
    format: CatalogFormat,
}

impl JsonCatalogSource {
    pub fn new(appstore: AppstoreId, url: String, format: CatalogFormat) -> Self {
        Self {
            appstore,
            url,
            format,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AppstoreSource for JsonCatalogSource {
    fn appstore_id(&self) -> AppstoreId {
        self.appstore
    }

    async fn list_skills(
        &self,
        ctx: &FetchContext,
        skiplist: &HashSet<Identifier>,
    ) -> Result<Listing> {
        let body = ctx.get(&self.url, self.appstore).await?;
        let items = match self.format {
            CatalogFormat::MarketplaceMap => parse_marketplace(&body, self.appstore)?,
            CatalogFormat::FlatList => parse_flat_list(&body, self.appstore)?,
        };
        debug!(appstore = %self.appstore, url = %self.url, records = items.len(), "catalog parsed");
        Ok(Listing::from_items(items, skiplist))
    }
}
