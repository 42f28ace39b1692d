//! Canonical skill identifiers derived from source URLs.
//!
//! Every appstore reports skills by repository URL, in whatever shape the
//! appstore happens to store it (`.git` suffixes, `@branch` pins, raw-content
//! or API hosts, ssh remotes). [`normalize_url`] folds those shapes into one
//! `https://host/owner/repo` form and [`Identifier`] is its lower-cased key.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable de-duplication key for a skill.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Derive the identifier for a source URL.
    pub fn from_url(url: &str) -> Result<Self> {
        Ok(Self(normalize_url(url)?.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize a repository URL to `https://host/owner/repo`.
///
/// Host is lower-cased; owner and repo keep their case so the result can
/// still be used to build fetch URLs.
pub fn normalize_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_identifier("empty url"));
    }

    // ssh remotes: git@github.com:owner/repo.git
    let mut url = match trimmed.strip_prefix("git@") {
        Some(rest) => match rest.split_once(':') {
            Some((host, path)) => format!("https://{host}/{path}"),
            None => return Err(Error::invalid_identifier(format!("bad ssh url: {raw}"))),
        },
        None => trimmed.to_string(),
    };

    url = url.replace("www.github.com", "github.com");
    if let Some(rest) = url.strip_prefix("git://") {
        url = format!("https://{rest}");
    }
    for (from, to) in [
        ("raw.githubusercontent.com/", "github.com/"),
        ("api.github.com/repos/", "github.com/"),
    ] {
        if let Some(idx) = url.find(from) {
            url.replace_range(idx..idx + from.len(), to);
        }
    }

    let Some((scheme, rest)) = url.split_once("://") else {
        return Err(Error::invalid_identifier(format!("missing scheme: {raw}")));
    };
    if !matches!(scheme.to_ascii_lowercase().as_str(), "http" | "https") {
        return Err(Error::invalid_identifier(format!(
            "unsupported scheme '{scheme}': {raw}"
        )));
    }

    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let (Some(host), Some(owner), Some(repo)) = (segments.next(), segments.next(), segments.next())
    else {
        return Err(Error::invalid_identifier(format!(
            "expected host/owner/repo: {raw}"
        )));
    };

    let repo = repo.split('@').next().unwrap_or(repo);
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if repo.is_empty() || host.contains('@') {
        return Err(Error::invalid_identifier(format!("no repository in url: {raw}")));
    }

    Ok(format!("https://{}/{owner}/{repo}", host.to_ascii_lowercase()))
}

/// Split a URL into `(owner, repo)` after normalization.
pub fn owner_repo(url: &str) -> Result<(String, String)> {
    let normalized = normalize_url(url)?;
    let mut parts = normalized.rsplit('/');
    match (parts.next(), parts.next()) {
        (Some(repo), Some(owner)) => Ok((owner.to_string(), repo.to_string())),
        _ => Err(Error::invalid_identifier(format!("no owner/repo in {url}"))),
    }
}

/// Extract a branch (or tag/commit) pinned in a repository URL, if any.
pub fn branch_from_url(url: &str) -> Option<String> {
    let url = url.replace("/blob/", "/tree/");
    for marker in ["/tree/", "/commit/", "/tag/"] {
        if let Some((_, tail)) = url.split_once(marker) {
            return tail
                .split('/')
                .next()
                .filter(|b| !b.is_empty())
                .map(str::to_string);
        }
    }

    // Only the last path segment may carry `@branch`; ssh remotes use `@` too.
    let last = url.trim_end_matches('/').rsplit('/').next()?;
    let (_, branch) = last.split_once('@')?;
    let branch = branch.strip_suffix(".git").unwrap_or(branch);
    (!branch.is_empty()).then(|| branch.to_string())
}

/// Install folder convention: `<repo>.<owner>`, lower-cased.
pub fn default_foldername(owner: &str, repo: &str) -> String {
    format!("{repo}.{owner}").to_lowercase()
}

/// Human-friendly name from a repository name.
///
/// `skill-weather` and `WeatherSkill` both become `Weather Skill`.
pub fn default_display_name(repo: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in repo.chars() {
        if c == '-' || c == '_' || c == '.' || c.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .iter()
        .map(String::as_str)
        .filter(|w| *w != "skill")
        .chain(std::iter::once("skill"))
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn normalize_strips_git_suffix_and_trailing_slash() {
        assert_eq!(
            normalize_url("https://github.com/OpenVoiceOS/skill-weather.git/").unwrap(),
            "https://github.com/OpenVoiceOS/skill-weather"
        );
    }

    #[test]
    fn normalize_rewrites_hosts() {
        for url in [
            "https://www.github.com/a/b",
            "git://github.com/a/b",
            "https://raw.githubusercontent.com/a/b/dev/README.md",
            "https://api.github.com/repos/a/b/contents/x.json",
            "git@github.com:a/b.git",
            "https://github.com/a/b@dev",
            "https://github.com/a/b/tree/dev",
        ] {
            assert_eq!(normalize_url(url).unwrap(), "https://github.com/a/b", "{url}");
        }
    }

    #[test]
    fn normalize_accepts_other_hosts() {
        assert_eq!(
            normalize_url("https://GitLab.com/me/thing").unwrap(),
            "https://gitlab.com/me/thing"
        );
    }

    #[test]
    fn normalize_rejects_incomplete_urls() {
        for url in ["", "   ", "github.com/a/b", "https://github.com/a", "ftp://x/a/b"] {
            let err = normalize_url(url).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidIdentifier, "{url}");
        }
    }

    #[test]
    fn identifier_is_case_insensitive() {
        let a = Identifier::from_url("https://github.com/JarbasSkills/Skill-Wiki").unwrap();
        let b = Identifier::from_url("https://github.com/jarbasskills/skill-wiki/").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "https://github.com/jarbasskills/skill-wiki");
    }

    #[test]
    fn owner_repo_splits() {
        let (owner, repo) = owner_repo("https://github.com/OpenVoiceOS/skill-ovos-date-time.git").unwrap();
        assert_eq!(owner, "OpenVoiceOS");
        assert_eq!(repo, "skill-ovos-date-time");
    }

    #[test]
    fn branch_extraction() {
        assert_eq!(branch_from_url("https://github.com/a/b/tree/dev"), Some("dev".into()));
        assert_eq!(branch_from_url("https://github.com/a/b/blob/v1/x.py"), Some("v1".into()));
        assert_eq!(branch_from_url("https://github.com/a/b/commit/abc123"), Some("abc123".into()));
        assert_eq!(branch_from_url("https://github.com/a/b/releases/tag/0.1"), Some("0.1".into()));
        assert_eq!(branch_from_url("https://github.com/a/b@master"), Some("master".into()));
        assert_eq!(branch_from_url("git@github.com:a/b.git"), None);
        assert_eq!(branch_from_url("https://github.com/a/b"), None);
    }

    #[test]
    fn display_name_from_repo() {
        assert_eq!(default_display_name("skill-weather"), "Weather Skill");
        assert_eq!(default_display_name("WeatherSkill"), "Weather Skill");
        assert_eq!(default_display_name("ovos-skill-date-time"), "Ovos Date Time Skill");
        assert_eq!(default_display_name("skill"), "Skill");
    }

    #[test]
    fn foldername_convention() {
        assert_eq!(default_foldername("OpenVoiceOS", "Skill-Weather"), "skill-weather.openvoiceos");
    }
}
