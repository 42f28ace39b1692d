//! Core data model: appstore ids and skill entries.

use crate::error::{Error, Result};
use crate::identifier::{
    branch_from_url, default_display_name, default_foldername, normalize_url, owner_repo,
    Identifier,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Seconds since the Unix epoch. Zero means unknown where a sentinel is needed.
pub type Timestamp = i64;

/// The fixed set of appstores the manager knows how to read.
///
/// Variants are declared in the lexicographic order of their names so the
/// derived `Ord` agrees with `as_str()` ordering (used as a merge tie-break).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppstoreId {
    Andlo,
    Local,
    MycroftMarketplace,
    Neon,
    Ovos,
    Pling,
}

impl AppstoreId {
    pub const ALL: [AppstoreId; 6] = [
        Self::Andlo,
        Self::Local,
        Self::MycroftMarketplace,
        Self::Neon,
        Self::Ovos,
        Self::Pling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Andlo => "andlo",
            Self::Local => "local",
            Self::MycroftMarketplace => "mycroft-marketplace",
            Self::Neon => "neon",
            Self::Ovos => "ovos",
            Self::Pling => "pling",
        }
    }
}

impl fmt::Display for AppstoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppstoreId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pling" | "bigscreen" => Ok(Self::Pling),
            "mycroft" | "mycroft_marketplace" | "mycroft-marketplace" => {
                Ok(Self::MycroftMarketplace)
            }
            "andlo" | "andlo_skill_list" => Ok(Self::Andlo),
            "ovos" | "ovos_appstore" | "ovos_marketplace" => Ok(Self::Ovos),
            "neon" | "neon_gecko" | "neon_skills" => Ok(Self::Neon),
            "local" | "local_skills" | "installed" | "installed_skills" => Ok(Self::Local),
            other => Err(Error::config(format!("unknown appstore: {other}"))),
        }
    }
}

/// Canonical metadata for one skill, independent of the appstore that
/// reported it. Entries are immutable once built; the `with_*` builders
/// consume and return a new value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SkillEntry {
    pub identifier: Identifier,
    pub url: String,
    pub display_name: String,
    pub short_description: String,
    pub description: String,
    pub authorname: String,
    pub foldername: String,
    pub branch: String,
    pub category: Option<String>,
    pub tags: BTreeSet<String>,
    pub platforms: BTreeSet<String>,
    pub license: Option<String>,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
    pub stars: Option<u64>,
    pub source_appstore: AppstoreId,
}

impl SkillEntry {
    /// Build an entry from its repository URL, deriving identifier, author,
    /// install folder, display name and any branch pinned in the URL.
    pub fn from_url(url: &str, source: AppstoreId) -> Result<Self> {
        let normalized = normalize_url(url)?;
        let identifier = Identifier::from_url(&normalized)?;
        let (owner, repo) = owner_repo(&normalized)?;
        Ok(Self {
            identifier,
            display_name: default_display_name(&repo),
            short_description: String::new(),
            description: String::new(),
            foldername: default_foldername(&owner, &repo),
            authorname: owner,
            branch: branch_from_url(url).unwrap_or_default(),
            url: normalized,
            category: None,
            tags: BTreeSet::new(),
            platforms: BTreeSet::new(),
            license: None,
            created_at: None,
            updated_at: None,
            stars: None,
            source_appstore: source,
        })
    }

    /// `(owner, repo)` of the entry's repository.
    pub fn owner_repo(&self) -> Result<(String, String)> {
        owner_repo(&self.url)
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.display_name = name.trim().to_string();
        }
        self
    }

    pub fn with_short_description(mut self, text: impl Into<String>) -> Self {
        self.short_description = text.into().trim().to_string();
        self
    }

    pub fn with_description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into().trim().to_string();
        self
    }

    /// Override the author; an empty value keeps the URL owner.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        let author = author.into();
        if !author.trim().is_empty() {
            self.authorname = author.trim().to_string();
        }
        self
    }

    pub fn with_foldername(mut self, folder: impl Into<String>) -> Self {
        let folder = folder.into();
        if !folder.trim().is_empty() {
            self.foldername = folder.trim().to_string();
        }
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        let branch = branch.into();
        if !branch.trim().is_empty() {
            self.branch = branch.trim().to_string();
        }
        self
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags.extend(clean_set(tags));
        self
    }

    pub fn with_platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.platforms.extend(clean_set(platforms));
        self
    }

    pub fn with_license(mut self, license: Option<String>) -> Self {
        self.license = license
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        self
    }

    pub fn with_created_at(mut self, ts: Option<Timestamp>) -> Self {
        self.created_at = ts;
        self
    }

    pub fn with_updated_at(mut self, ts: Option<Timestamp>) -> Self {
        self.updated_at = ts;
        self
    }

    pub fn with_stars(mut self, stars: Option<u64>) -> Self {
        self.stars = stars;
        self
    }
}

fn clean_set<I, S>(items: I) -> impl Iterator<Item = String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn appstore_aliases_resolve() {
        assert_eq!("bigscreen".parse::<AppstoreId>().unwrap(), AppstoreId::Pling);
        assert_eq!("mycroft".parse::<AppstoreId>().unwrap(), AppstoreId::MycroftMarketplace);
        assert_eq!("andlo_skill_list".parse::<AppstoreId>().unwrap(), AppstoreId::Andlo);
        assert_eq!("OVOS".parse::<AppstoreId>().unwrap(), AppstoreId::Ovos);
        assert_eq!("neon_gecko".parse::<AppstoreId>().unwrap(), AppstoreId::Neon);
        assert_eq!("installed_skills".parse::<AppstoreId>().unwrap(), AppstoreId::Local);
        assert_eq!("nope".parse::<AppstoreId>().unwrap_err().kind, ErrorKind::Config);
    }

    #[test]
    fn appstore_ord_matches_name_order() {
        let mut by_ord = AppstoreId::ALL.to_vec();
        by_ord.sort();
        let mut by_name = AppstoreId::ALL.to_vec();
        by_name.sort_by_key(AppstoreId::as_str);
        assert_eq!(by_ord, by_name);
    }

    #[test]
    fn appstore_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&AppstoreId::MycroftMarketplace).unwrap(),
            "\"mycroft-marketplace\""
        );
    }

    #[test]
    fn entry_from_url_derives_install_fields() {
        let entry = SkillEntry::from_url(
            "https://github.com/OpenVoiceOS/skill-weather.git@dev",
            AppstoreId::Ovos,
        )
        .unwrap();
        assert_eq!(entry.identifier.as_str(), "https://github.com/openvoiceos/skill-weather");
        assert_eq!(entry.url, "https://github.com/OpenVoiceOS/skill-weather");
        assert_eq!(entry.authorname, "OpenVoiceOS");
        assert_eq!(entry.foldername, "skill-weather.openvoiceos");
        assert_eq!(entry.display_name, "Weather Skill");
        assert_eq!(entry.branch, "dev");
        assert!(entry.description.is_empty());
    }

    #[test]
    fn builders_ignore_blank_overrides() {
        let entry = SkillEntry::from_url("https://github.com/a/skill-x", AppstoreId::Andlo)
            .unwrap()
            .with_author("  ")
            .with_display_name("")
            .with_category(Some(" ".into()))
            .with_tags(["b", "a", "", "a "]);
        assert_eq!(entry.authorname, "a");
        assert_eq!(entry.display_name, "X Skill");
        assert_eq!(entry.category, None);
        assert_eq!(entry.tags.iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn entry_without_url_is_rejected() {
        let err = SkillEntry::from_url("", AppstoreId::Local).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidIdentifier);
    }
}
