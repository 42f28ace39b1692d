//! Installed skills on this device.
//!
//! Each sub-directory of the skills directory is one skill. Metadata comes
//! from an in-tree `skill.json`, the git remote in `.git/config`, and the
//! `<repo>.<author>` folder convention, in that order. A directory that
//! fails is reported and the scan continues.

use super::record::SkillRecord;
use super::{AppstoreSource, Listing};
use crate::fetch::FetchContext;
use async_trait::async_trait;
use osm_core::licenses::detect_license;
use osm_core::{AppstoreId, Error, Identifier, Result, SkillEntry, Timestamp};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

/// Manifest locations, first match wins.
const MANIFEST_FILES: &[&str] = &["skill.json", "store/skill.json", "res/desktop/skill.json"];
const LICENSE_FILES: &[&str] = &["LICENSE", "LICENSE.md", "LICENSE.txt", "COPYING"];

#[derive(Debug, Clone)]
pub struct LocalSource {
    dir: PathBuf,
}

impl LocalSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl AppstoreSource for LocalSource {
    fn appstore_id(&self) -> AppstoreId {
        AppstoreId::Local
    }

    async fn list_skills(
        &self,
        _ctx: &FetchContext,
        skiplist: &HashSet<Identifier>,
    ) -> Result<Listing> {
        let dir = self.dir.clone();
        let items = tokio::task::spawn_blocking(move || scan_skills_dir(&dir))
            .await
            .map_err(|e| Error::source_unavailable(format!("local scan aborted: {e}")))??;
        Ok(Listing::from_items(items, skiplist))
    }
}

/// Scan every sub-directory. A missing skills directory means nothing is
/// installed; an unreadable one fails the source.
pub fn scan_skills_dir(dir: &Path) -> Result<Vec<Result<SkillEntry>>> {
    if !dir.exists() {
        debug!(dir = %dir.display(), "skills directory does not exist");
        return Ok(Vec::new());
    }
    let read = fs::read_dir(dir)
        .map_err(|e| Error::source_unavailable(format!("read {}: {e}", dir.display())))?;

    let mut paths: Vec<PathBuf> = read
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('.'))
        })
        .collect();
    paths.sort();

    Ok(paths
        .iter()
        .map(|path| {
            let result = skill_from_directory(path);
            if let Err(e) = &result {
                warn!(dir = %path.display(), error = %e, "skipping local skill");
            }
            result
        })
        .collect())
}

/// Build an entry for one installed skill directory.
pub fn skill_from_directory(path: &Path) -> Result<SkillEntry> {
    let folder = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let manifest = read_manifest(path)?.unwrap_or_default();
    let git = read_git_config(path);

    let url = manifest
        .url
        .clone()
        .filter(|u| !u.trim().is_empty())
        .or_else(|| git.url.clone())
        .or_else(|| url_from_folder(&folder))
        .ok_or_else(|| {
            Error::invalid_identifier(format!(
                "{}: no skill.json url, git remote or <repo>.<author> folder name",
                path.display()
            ))
        })?;

    let mut record = manifest;
    record.url = Some(url);
    if record.branch.as_deref().map_or(true, str::is_empty) {
        record.branch = git.branch;
    }
    if record.license.is_none() {
        record.license = read_license(path);
    }

    let mut entry = record.into_entry(AppstoreId::Local)?;
    // The installed folder is authoritative for where this skill lives.
    entry.foldername = folder;
    if entry.updated_at.is_none() {
        entry.updated_at = dir_mtime(path);
    }
    Ok(entry)
}

fn read_manifest(path: &Path) -> Result<Option<SkillRecord>> {
    let Some(manifest) = MANIFEST_FILES
        .iter()
        .map(|f| path.join(f))
        .find(|p| p.is_file())
    else {
        return Ok(None);
    };
    let bytes = fs::read(&manifest)
        .map_err(|e| Error::malformed_entry(format!("read {}: {e}", manifest.display())))?;
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::malformed_entry(format!("{}: {e}", manifest.display())))
}

#[derive(Debug, Default, PartialEq, Eq)]
struct GitRemote {
    url: Option<String>,
    branch: Option<String>,
}

fn read_git_config(path: &Path) -> GitRemote {
    fs::read_to_string(path.join(".git").join("config"))
        .map(|text| parse_git_config(&text))
        .unwrap_or_default()
}

/// First `url = ...` (preferring `[remote "origin"]`) and first
/// `[branch "..."]` section.
fn parse_git_config(text: &str) -> GitRemote {
    let mut remote = GitRemote::default();
    let mut section = String::new();
    let mut origin_url = None;
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('[') && line.ends_with(']') {
            section = line[1..line.len() - 1].trim().to_string();
            if remote.branch.is_none() {
                if let Some(name) = section.strip_prefix("branch ") {
                    remote.branch = Some(name.trim_matches('"').to_string());
                }
            }
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() != "url" {
            continue;
        }
        let value = value.trim().to_string();
        if section == "remote \"origin\"" {
            origin_url.get_or_insert(value);
        } else if remote.url.is_none() {
            remote.url = Some(value);
        }
    }
    if origin_url.is_some() {
        remote.url = origin_url;
    }
    remote
}

/// `skill-weather.openvoiceos` -> `https://github.com/openvoiceos/skill-weather`.
fn url_from_folder(folder: &str) -> Option<String> {
    let (repo, author) = folder.rsplit_once('.')?;
    (!repo.is_empty() && !author.is_empty())
        .then(|| format!("https://github.com/{author}/{repo}"))
}

fn read_license(path: &Path) -> Option<String> {
    LICENSE_FILES
        .iter()
        .map(|f| path.join(f))
        .find(|p| p.is_file())
        .and_then(|p| fs::read_to_string(p).ok())
        .and_then(|text| detect_license(&text))
}

fn dir_mtime(path: &Path) -> Option<Timestamp> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    let secs = modified.duration_since(UNIX_EPOCH).ok()?.as_secs();
    i64::try_from(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{Fetch, RetryPolicy, StaticFetcher};
    use crate::tokens::TokenStore;
    use osm_core::ErrorKind;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn git_config_prefers_origin() {
        let text = r#"
[core]
	bare = false
[remote "upstream"]
	url = https://github.com/up/skill-x
[remote "origin"]
	url = https://github.com/me/skill-x.git
	fetch = +refs/heads/*:refs/remotes/origin/*
[branch "dev"]
	remote = origin
"#;
        let remote = parse_git_config(text);
        assert_eq!(remote.url.as_deref(), Some("https://github.com/me/skill-x.git"));
        assert_eq!(remote.branch.as_deref(), Some("dev"));
    }

    #[test]
    fn folder_convention() {
        assert_eq!(
            url_from_folder("skill-weather.openvoiceos").as_deref(),
            Some("https://github.com/openvoiceos/skill-weather")
        );
        assert_eq!(url_from_folder("plainfolder"), None);
        assert_eq!(url_from_folder(".hidden"), None);
    }

    #[test]
    fn manifest_git_and_folder_sources() {
        let dir = TempDir::new().unwrap();
        write(
            &dir.path().join("from-manifest/skill.json"),
            r#"{"url": "https://github.com/a/skill-manifest", "name": "Manifest Skill"}"#,
        );
        write(
            &dir.path().join("from-git/.git/config"),
            "[remote \"origin\"]\n\turl = git@github.com:b/skill-git.git\n[branch \"main\"]\n",
        );
        write(&dir.path().join("skill-folder.c/__init__.py"), "");
        write(
            &dir.path().join("skill-folder.c/LICENSE"),
            "Apache License\nVersion 2.0, January 2004\n",
        );

        let items = scan_skills_dir(dir.path()).unwrap();
        let entries: Vec<SkillEntry> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(entries.len(), 3);

        let git = &entries[0];
        assert_eq!(git.identifier.as_str(), "https://github.com/b/skill-git");
        assert_eq!(git.branch, "main");
        assert_eq!(git.foldername, "from-git");

        let manifest = &entries[1];
        assert_eq!(manifest.display_name, "Manifest Skill");
        assert_eq!(manifest.foldername, "from-manifest");

        let folder = &entries[2];
        assert_eq!(folder.identifier.as_str(), "https://github.com/c/skill-folder");
        assert_eq!(folder.license.as_deref(), Some("apache-2.0"));
        assert!(folder.updated_at.is_some());
        assert_eq!(folder.source_appstore, AppstoreId::Local);
    }

    #[test]
    fn corrupt_manifest_does_not_stop_scan() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("broken.me/skill.json"), "{ nope");
        write(&dir.path().join("nameless/__init__.py"), "");
        write(&dir.path().join("skill-ok.me/__init__.py"), "");

        let items = scan_skills_dir(dir.path()).unwrap();
        let kinds: Vec<_> = items
            .iter()
            .map(|r| r.as_ref().map(|e| e.foldername.clone()).map_err(|e| e.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                Err(ErrorKind::MalformedEntry),
                Err(ErrorKind::InvalidIdentifier),
                Ok("skill-ok.me".to_string()),
            ]
        );
    }

    #[test]
    fn missing_dir_lists_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(scan_skills_dir(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_skills_applies_skiplist() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("skill-a.me/__init__.py"), "");
        write(&dir.path().join("skill-b.me/__init__.py"), "");
        let ctx = FetchContext::new(
            Arc::new(StaticFetcher::new()) as Arc<dyn Fetch>,
            Arc::new(TokenStore::new()),
            RetryPolicy::none(),
        );
        let skiplist: HashSet<Identifier> =
            [Identifier::from_url("https://github.com/me/skill-a").unwrap()]
                .into_iter()
                .collect();
        let listing = LocalSource::new(dir.path().to_path_buf())
            .list_skills(&ctx, &skiplist)
            .await
            .unwrap();
        assert_eq!(listing.skipped, 1);
        assert_eq!(listing.entries().count(), 1);
    }
}
