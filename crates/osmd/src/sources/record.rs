//! Source-native skill records and their mapping into [`SkillEntry`].
//!
//! Each record is decoded from its own `serde_json::Value` so one bad record
//! fails alone instead of failing the whole document.

use chrono::{DateTime, NaiveDate};
use osm_core::{AppstoreId, Error, Result, SkillEntry, Timestamp};
use serde::Deserialize;

/// A list that some catalogs store as one comma-separated string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Strings {
    One(String),
    Many(Vec<String>),
}

impl Default for Strings {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl Strings {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => s.split(',').map(|p| p.trim().to_string()).collect(),
            Self::Many(v) => v,
        }
    }
}

/// Timestamps arrive as epoch seconds, floats, or date strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl TimeValue {
    pub fn to_timestamp(&self) -> Option<Timestamp> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Float(f) if f.is_finite() => Some(*f as i64),
            Self::Float(_) => None,
            Self::Text(s) => parse_time_text(s),
        }
    }
}

fn parse_time_text(s: &str) -> Option<Timestamp> {
    let s = s.trim();
    if let Ok(n) = s.parse::<i64>() {
        return Some(n);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

/// Flat skill descriptor used by andlo, pling, ovos, neon and local
/// `skill.json` manifests.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SkillRecord {
    pub url: Option<String>,
    pub name: Option<String>,
    pub skillname: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub authorname: Option<String>,
    pub author: Option<String>,
    pub foldername: Option<String>,
    pub category: Option<String>,
    pub tags: Strings,
    pub platforms: Strings,
    pub license: Option<String>,
    pub branch: Option<String>,
    pub created_at: Option<TimeValue>,
    pub updated_at: Option<TimeValue>,
    pub stars: Option<u64>,
}

impl SkillRecord {
    /// Best label for error messages.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.skillname.as_deref())
            .or(self.name.as_deref())
            .unwrap_or("<unnamed>")
    }

    /// Map into an entry; a record without a URL is rejected.
    pub fn into_entry(self, appstore: AppstoreId) -> Result<SkillEntry> {
        let url = self
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                Error::invalid_identifier(format!("record '{}' has no url", self.label()))
            })?;
        let entry = SkillEntry::from_url(url, appstore)?;
        let name = self
            .display_name
            .or(self.skillname)
            .or(self.name)
            .unwrap_or_default();
        let mut entry = entry
            .with_display_name(name)
            .with_description(self.description.unwrap_or_default())
            .with_short_description(self.short_description.unwrap_or_default())
            .with_author(self.authorname.or(self.author).unwrap_or_default())
            .with_foldername(self.foldername.unwrap_or_default())
            .with_branch(self.branch.unwrap_or_default())
            .with_category(self.category)
            .with_tags(self.tags.into_vec())
            .with_platforms(self.platforms.into_vec())
            .with_license(self.license)
            .with_created_at(self.created_at.and_then(|t| t.to_timestamp()))
            .with_updated_at(self.updated_at.and_then(|t| t.to_timestamp()))
            .with_stars(self.stars);
        if entry.short_description.is_empty() {
            entry.short_description = first_sentence(&entry.description);
        }
        Ok(entry)
    }
}

/// Entry of the mycroft marketplace `skill-metadata.json` map.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MarketplaceRecord {
    pub display_name: String,
    pub name: String,
    pub repo: String,
    pub tree: String,
    pub description: String,
    pub short_desc: String,
    pub github_username: String,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub platforms: Vec<String>,
    pub license: Option<String>,
    pub created: Option<TimeValue>,
    pub modified: Option<TimeValue>,
}

impl MarketplaceRecord {
    pub fn into_entry(self, appstore: AppstoreId) -> Result<SkillEntry> {
        if self.repo.trim().is_empty() {
            return Err(Error::invalid_identifier(format!(
                "marketplace skill '{}' has no repo",
                self.name
            )));
        }
        Ok(SkillEntry::from_url(&self.repo, appstore)?
            .with_display_name(self.display_name)
            .with_foldername(self.name)
            .with_branch(self.tree)
            .with_description(self.description)
            .with_short_description(self.short_desc)
            .with_author(self.github_username)
            .with_category(self.categories.first().cloned())
            .with_tags(self.tags.iter().chain(self.categories.iter()))
            .with_platforms(self.platforms)
            .with_license(self.license)
            .with_created_at(self.created.and_then(|t| t.to_timestamp()))
            .with_updated_at(self.modified.and_then(|t| t.to_timestamp())))
    }
}

/// Decode one flat record.
pub fn parse_record(value: serde_json::Value, appstore: AppstoreId) -> Result<SkillEntry> {
    let record: SkillRecord = serde_json::from_value(value)
        .map_err(|e| Error::malformed_entry(format!("{appstore}: {e}")))?;
    record.into_entry(appstore)
}

/// Decode a flat list document into per-record results.
///
/// Accepts a bare array, an object with a `skills` array, or an object
/// whose values are records. Anything else is `SourceUnavailable`.
pub fn parse_flat_list(bytes: &[u8], appstore: AppstoreId) -> Result<Vec<Result<SkillEntry>>> {
    let doc: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| Error::source_unavailable(format!("{appstore}: unparseable catalog: {e}")))?;
    let records = match doc {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("skills") {
            Some(serde_json::Value::Array(items)) => items,
            Some(_) => {
                return Err(Error::source_unavailable(format!(
                    "{appstore}: 'skills' is not a list"
                )))
            }
            None => map.into_iter().map(|(_, v)| v).collect(),
        },
        _ => {
            return Err(Error::source_unavailable(format!(
                "{appstore}: catalog is not a list"
            )))
        }
    };
    Ok(records
        .into_iter()
        .map(|value| parse_record(value, appstore))
        .collect())
}

/// Decode the marketplace map (`name -> record`).
pub fn parse_marketplace(bytes: &[u8], appstore: AppstoreId) -> Result<Vec<Result<SkillEntry>>> {
    let doc: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(bytes)
        .map_err(|e| Error::source_unavailable(format!("{appstore}: unparseable catalog: {e}")))?;
    Ok(doc
        .into_iter()
        .map(|(key, value)| {
            serde_json::from_value::<MarketplaceRecord>(value)
                .map_err(|e| Error::malformed_entry(format!("{appstore}: {key}: {e}")))
                .and_then(|record| record.into_entry(appstore))
        })
        .collect())
}

fn first_sentence(text: &str) -> String {
    let text = text.trim();
    match text.find(". ") {
        Some(idx) => text[..=idx].to_string(),
        None => text.to_string(),
    }
}
