//! On-disk catalog cache.
//!
//! `<data_dir>/catalog.json` holds the merged catalog plus metadata about the
//! pass that wrote it. The `catalog` member serializes from ordered maps and
//! sets only, so two passes that merge the same data write the same bytes
//! there; only `meta` differs.

use crate::registry::Catalog;
use osm_core::persist::{read_json, write_json_atomic};
use osm_core::{Error, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CATALOG_FILE: &str = "catalog.json";
pub const CATALOG_VERSION: u32 = 1;

/// Metadata of the pass that wrote the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogMeta {
    pub last_sync: Option<Timestamp>,
    pub pass_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub version: u32,
    pub meta: CatalogMeta,
    pub catalog: Catalog,
}

#[derive(Debug, Clone)]
pub struct CatalogStore {
    path: PathBuf,
}

impl CatalogStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(CATALOG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached catalog; a missing file is an empty catalog.
    pub fn load(&self) -> Result<CatalogDocument> {
        let Some(doc) = read_json::<CatalogDocument>(&self.path)? else {
            debug!(path = %self.path.display(), "no catalog cache yet");
            return Ok(CatalogDocument {
                version: CATALOG_VERSION,
                ..Default::default()
            });
        };
        if doc.version > CATALOG_VERSION {
            return Err(Error::persistence(format!(
                "{}: catalog version {} is newer than supported {}",
                self.path.display(),
                doc.version,
                CATALOG_VERSION
            )));
        }
        info!(
            path = %self.path.display(),
            entries = doc.catalog.len(),
            "catalog cache loaded"
        );
        Ok(doc)
    }

    /// Atomically replace the cache.
    pub fn save(&self, catalog: &Catalog, meta: CatalogMeta) -> Result<()> {
        let doc = DocumentRef {
            version: CATALOG_VERSION,
            meta: &meta,
            catalog,
        };
        write_json_atomic(&self.path, &doc)?;
        info!(path = %self.path.display(), entries = catalog.len(), "catalog cache written");
        Ok(())
    }
}

/// Borrowing twin of [`CatalogDocument`] for writes.
#[derive(Serialize)]
struct DocumentRef<'a> {
    version: u32,
    meta: &'a CatalogMeta,
    catalog: &'a Catalog,
}
