//! Exact and fuzzy search over a catalog snapshot.
//!
//! Scores are in `[0, 1]`. A value containing the query scores 1.0; fuzzy
//! matches that do not contain it score strictly below 1.0, so a threshold
//! of 1.0 returns exactly the exact-mode result.

use crate::registry::Catalog;
use osm_core::{Error, Identifier, Result, SkillEntry};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Highest score a non-containing fuzzy match can reach.
const FUZZY_CEILING: f64 = 0.999;
/// Threshold relaxation for the author fallback of [`search_any`].
const RELAXED_AUTHOR_DELTA: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchField {
    Name,
    Url,
    Category,
    Author,
    Tag,
    Description,
}

impl SearchField {
    pub const ALL: [SearchField; 6] = [
        Self::Name,
        Self::Url,
        Self::Category,
        Self::Author,
        Self::Tag,
        Self::Description,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Url => "url",
            Self::Category => "category",
            Self::Author => "author",
            Self::Tag => "tag",
            Self::Description => "description",
        }
    }

    /// Field values of `entry`; an entry matches when any value does.
    fn values<'a>(&self, entry: &'a SkillEntry) -> Vec<&'a str> {
        match self {
            Self::Name => vec![entry.display_name.as_str()],
            Self::Url => vec![entry.identifier.as_str()],
            Self::Category => entry.category.as_deref().into_iter().collect(),
            Self::Author => vec![entry.authorname.as_str()],
            Self::Tag => entry.tags.iter().map(String::as_str).collect(),
            Self::Description => vec![
                entry.short_description.as_str(),
                entry.description.as_str(),
            ],
        }
    }
}

impl fmt::Display for SearchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "url" => Ok(Self::Url),
            "category" => Ok(Self::Category),
            "author" => Ok(Self::Author),
            "tag" | "tags" => Ok(Self::Tag),
            "description" => Ok(Self::Description),
            other => Err(Error::query(format!("unknown search field: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub field: SearchField,
    pub query: String,
    pub fuzzy: bool,
    pub ignore_case: bool,
    pub threshold: f64,
}

impl SearchQuery {
    pub fn new(field: SearchField, query: impl Into<String>) -> Self {
        Self {
            field,
            query: query.into(),
            fuzzy: false,
            ignore_case: true,
            threshold: 0.85,
        }
    }

    pub fn fuzzy(mut self, fuzzy: bool) -> Self {
        self.fuzzy = fuzzy;
        self
    }

    pub fn ignore_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(Error::query("empty query"));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(Error::query(format!(
                "threshold {} outside [0, 1]",
                self.threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub score: f64,
    pub entry: SkillEntry,
}

/// Evaluate `query` against every entry of `catalog`.
///
/// Hits are ordered by score descending, then identifier ascending.
pub fn search(catalog: &Catalog, query: &SearchQuery) -> Result<Vec<SearchHit>> {
    query.validate()?;

    if query.field == SearchField::Url {
        let wanted = Identifier::from_url(&query.query)
            .map_err(|e| Error::query(format!("url search needs a repository url: {}", e.message)))?;
        return Ok(catalog
            .get(&wanted)
            .map(|entry| SearchHit {
                score: 1.0,
                entry: entry.clone(),
            })
            .into_iter()
            .collect());
    }

    let needle = fold(query.query.trim(), query.ignore_case);
    let mut hits: Vec<SearchHit> = catalog
        .entries()
        .filter_map(|entry| {
            let score = query
                .field
                .values(entry)
                .into_iter()
                .filter(|v| !v.is_empty())
                .map(|v| score(&needle, &fold(v, query.ignore_case), query.fuzzy))
                .fold(0.0_f64, f64::max);
            let matched = if query.fuzzy {
                score > 0.0 && score >= query.threshold
            } else {
                score >= 1.0
            };
            matched.then(|| SearchHit {
                score,
                entry: entry.clone(),
            })
        })
        .collect();
    sort_hits(&mut hits);
    Ok(hits)
}

/// Broad lookup: URL, then name, author, tags and description, then a
/// relaxed author match and category. Hits are de-duplicated by identifier
/// keeping the first (best) stage's score.
pub fn search_any(
    catalog: &Catalog,
    query: &str,
    fuzzy: bool,
    ignore_case: bool,
    threshold: f64,
) -> Result<Vec<SearchHit>> {
    let base = SearchQuery::new(SearchField::Name, query)
        .fuzzy(fuzzy)
        .ignore_case(ignore_case)
        .threshold(threshold);
    base.validate()?;

    // A URL query is answered by the URL index alone.
    if Identifier::from_url(query).is_ok() {
        let hits = search(catalog, &SearchQuery { field: SearchField::Url, ..base.clone() })?;
        if !hits.is_empty() {
            return Ok(hits);
        }
    }

    let relaxed = (threshold - RELAXED_AUTHOR_DELTA).max(0.0);
    let stages = [
        SearchQuery { field: SearchField::Name, ..base.clone() },
        SearchQuery { field: SearchField::Author, ..base.clone() },
        SearchQuery { field: SearchField::Tag, ..base.clone() },
        SearchQuery { field: SearchField::Description, ..base.clone() },
        SearchQuery {
            field: SearchField::Author,
            threshold: relaxed,
            ..base.clone()
        },
        SearchQuery { field: SearchField::Category, ..base },
    ];

    let mut seen = HashSet::new();
    let mut hits = Vec::new();
    for stage in &stages {
        for hit in search(catalog, stage)? {
            if seen.insert(hit.entry.identifier.clone()) {
                hits.push(hit);
            }
        }
    }
    sort_hits(&mut hits);
    Ok(hits)
}

fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.entry.identifier.cmp(&b.entry.identifier))
    });
}

fn fold(s: &str, ignore_case: bool) -> String {
    if ignore_case {
        s.to_lowercase()
    } else {
        s.to_string()
    }
}

fn score(needle: &str, value: &str, fuzzy: bool) -> f64 {
    if value.contains(needle) {
        return 1.0;
    }
    if !fuzzy {
        return 0.0;
    }
    let whole = similarity(needle, value);
    let best_token = tokens(value)
        .map(|token| similarity(needle, token))
        .fold(0.0_f64, f64::max);
    let overlap = word_jaccard(needle, value);
    whole.max(best_token).max(overlap).min(FUZZY_CEILING)
}

fn tokens(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty())
}

/// Normalized Levenshtein similarity: `1 - distance / max_len`.
fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            let cost = usize::from(ca != cb);
            row[j + 1] = (above + 1).min(row[j] + 1).min(diagonal + cost);
            diagonal = above;
        }
    }
    row[b.len()]
}

/// Word-level Jaccard overlap.
fn word_jaccard(a: &str, b: &str) -> f64 {
    let a_words: HashSet<&str> = tokens(a).collect();
    let b_words: HashSet<&str> = tokens(b).collect();
    let union = a_words.union(&b_words).count();
    if union == 0 {
        return 0.0;
    }
    a_words.intersection(&b_words).count() as f64 / union as f64
}
