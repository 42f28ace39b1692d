//! Output rendering for osmctl.
//!
//! Formats appstore settings, search hits, sync reports and the device
//! state ledger for terminal display.

use osm_core::state::{InstallationStatus, SkillState, SkillStatus};
use osm_core::{AppstoreConfig, AppstoreSettings, SkillEntry, Timestamp};
use osmd::search::SearchHit;
use osmd::sync::SyncReport;
use osmd::SourceOutcome;

/// Print every appstore in tabular format.
pub fn print_appstore_list(settings: &AppstoreSettings) {
    println!(
        "{:<20}  {:<6}  {:>8}  {:<6}  {:<6}  {:<40}",
        "APPSTORE", "ACTIVE", "PRIORITY", "TOKEN", "GITHUB", "URL"
    );
    println!("{}", "-".repeat(96));

    for store in settings.iter() {
        println!(
            "{:<20}  {:<6}  {:>8}  {:<6}  {:<6}  {:<40}",
            store.appstore_id.to_string(),
            yes_no(store.active),
            store.priority,
            token_marker(store),
            yes_no(store.parse_github),
            truncate(&store.url, 40),
        );
    }
}

/// Print one appstore's configuration. Tokens are never shown.
pub fn print_appstore(store: &AppstoreConfig) {
    println!("Appstore: {}", store.appstore_id);
    println!();
    println!("  Active:       {}", yes_no(store.active));
    println!("  Priority:     {}", store.priority);
    println!("  Auth Token:   {}", token_marker(store));
    println!("  Parse GitHub: {}", yes_no(store.parse_github));
    if !store.url.is_empty() {
        println!("  URL:          {}", store.url);
    }
}

/// Print search hits, best first.
pub fn print_hits(hits: &[SearchHit], limit: Option<usize>) {
    if hits.is_empty() {
        println!("No skills found.");
        return;
    }

    println!(
        "{:>5}  {:<28}  {:<16}  {:<12}  {:<50}",
        "SCORE", "NAME", "AUTHOR", "APPSTORE", "URL"
    );
    println!("{}", "-".repeat(117));

    let shown = limit.unwrap_or(hits.len()).min(hits.len());
    for hit in &hits[..shown] {
        print_hit_row(hit.score, &hit.entry);
    }

    println!();
    if shown < hits.len() {
        println!("{} of {} skill(s)", shown, hits.len());
    } else {
        println!("{} skill(s)", hits.len());
    }
}

fn print_hit_row(score: f64, entry: &SkillEntry) {
    println!(
        "{:>5.2}  {:<28}  {:<16}  {:<12}  {:<50}",
        score,
        truncate(&entry.display_name, 28),
        truncate(&entry.authorname, 16),
        entry.source_appstore.to_string(),
        entry.url,
    );
}

/// Print the outcome of a sync pass.
pub fn print_sync_report(report: &SyncReport) {
    println!("Sync pass: {}", report.pass_id);
    if report.cancelled {
        println!("  (cancelled)");
    }
    println!();
    println!(
        "  {:<20}  {:>8}  {:<10}  {:>7}  {:>7}  {:>7}  {:>8}",
        "APPSTORE", "PRIORITY", "RESULT", "FETCHED", "ADOPTED", "SKIPPED", "REJECTED"
    );
    println!("  {}", "-".repeat(84));

    for source in &report.sources {
        match &source.outcome {
            SourceOutcome::Merged {
                fetched,
                adopted,
                skipped,
                rejected,
            } => println!(
                "  {:<20}  {:>8}  {:<10}  {:>7}  {:>7}  {:>7}  {:>8}",
                source.appstore.to_string(),
                source.priority,
                "OK",
                fetched,
                adopted,
                skipped,
                rejected,
            ),
            SourceOutcome::Failed { kind, message } => println!(
                "  {:<20}  {:>8}  {:<10}  {}: {}",
                source.appstore.to_string(),
                source.priority,
                "FAILED",
                kind,
                truncate(message, 60),
            ),
            SourceOutcome::NotStarted => println!(
                "  {:<20}  {:>8}  {:<10}",
                source.appstore.to_string(),
                source.priority,
                "SKIPPED",
            ),
        }
    }

    println!();
    println!("  Catalog:  {} skill(s)", report.catalog_size);
    println!(
        "  Duration: {} ms",
        (report.finished_at - report.started_at).num_milliseconds()
    );
}

/// Print the device state ledger.
pub fn print_state_list<'a>(states: impl Iterator<Item = &'a SkillState>) {
    let states: Vec<&SkillState> = states.collect();
    if states.is_empty() {
        println!("No skills installed.");
        return;
    }

    println!(
        "{:<36}  {:<10}  {:<10}  {:<12}  {:<20}",
        "NAME", "STATUS", "INSTALL", "ORIGIN", "INSTALLED"
    );
    println!("{}", "-".repeat(96));

    for state in &states {
        println!(
            "{:<36}  {:<10}  {:<10}  {:<12}  {:<20}",
            truncate(&state.name, 36),
            format_status(state.status),
            format_installation(state.installation),
            truncate(&state.origin, 12),
            format_time(state.installed),
        );
    }

    println!();
    println!("{} skill(s)", states.len());
}

/// Print one ledger entry.
pub fn print_state(state: &SkillState) {
    println!("Skill: {}", state.name);
    println!();
    println!("  Origin:       {}", state.origin);
    println!("  Beta:         {}", yes_no(state.beta));
    println!("  Status:       {}", format_status(state.status));
    println!("  Installation: {}", format_installation(state.installation));
    println!("  Installed:    {}", format_time(state.installed));
    println!("  Updated:      {}", format_time(state.updated));
    println!("  Skill GID:    {}", state.skill_gid);
}

fn format_status(status: SkillStatus) -> &'static str {
    match status {
        SkillStatus::Active => "ACTIVE",
        SkillStatus::Disabled => "DISABLED",
    }
}

fn format_installation(status: InstallationStatus) -> &'static str {
    match status {
        InstallationStatus::Installed => "INSTALLED",
        InstallationStatus::Failed => "FAILED",
        InstallationStatus::Removed => "REMOVED",
    }
}

/// Unix seconds rendered in UTC; 0 means unknown.
fn format_time(ts: Timestamp) -> String {
    if ts == 0 {
        return "-".to_string();
    }
    chrono::DateTime::from_timestamp(ts, 0)
        .map_or_else(|| ts.to_string(), |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn token_marker(store: &AppstoreConfig) -> &'static str {
    if store.auth_token.is_some() {
        "set"
    } else {
        "-"
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("skill-weather-forecast", 10), "skill-w...");
        assert_eq!(truncate("météo-météo-météo", 8), "météo...");
    }

    #[test]
    fn zero_timestamp_is_unknown() {
        assert_eq!(format_time(0), "-");
        assert_eq!(format_time(86_400), "1970-01-02 00:00:00");
    }
}
