//! osmctl - command line client for the skills manager
//!
//! Operates directly on the manager's data directory: appstore settings,
//! the catalog cache and the device state ledger.

mod render;

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::{Parser, Subcommand};
use osm_core::events::{EventSink, TracingSink};
use osm_core::{AppstoreId, Config, Error, Result};
use osmd::search::{SearchField, SearchQuery};
use osmd::sync::SyncOptions;
use osmd::SkillsManager;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

/// Manage skill appstores, the merged catalog and installed skills.
#[derive(Parser)]
#[command(name = "osmctl")]
#[command(about = "Skills manager: appstores, catalog search and sync")]
#[command(version)]
struct Cli {
    /// Settings file (key=value)
    #[arg(long, global = true, env = "OSM_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (overrides data_dir from settings)
    #[arg(long, global = true, env = "OSM_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Activate an appstore
    Enable {
        #[arg(value_parser = parse_appstore)]
        appstore: AppstoreId,
    },

    /// Deactivate an appstore (entries stay until the next rebuild)
    Disable {
        #[arg(value_parser = parse_appstore)]
        appstore: AppstoreId,
    },

    /// Set an appstore's merge priority (lower wins)
    Priority {
        #[arg(value_parser = parse_appstore)]
        appstore: AppstoreId,
        #[arg(allow_negative_numbers = true)]
        priority: i64,
    },

    /// Store or rotate an appstore credential; omit the token to clear it
    Auth {
        #[arg(value_parser = parse_appstore)]
        appstore: AppstoreId,
        token: Option<String>,
    },

    /// Show appstore configuration
    Config {
        #[arg(value_parser = parse_appstore)]
        appstore: Option<AppstoreId>,
    },

    /// Search the catalog
    Search {
        /// name, url, category, author, tag, description or any
        field: String,

        query: String,

        /// Enable approximate matching
        #[arg(long)]
        fuzzy: bool,

        /// Minimum similarity score for fuzzy matches (0.0 - 1.0)
        #[arg(long)]
        thresh: Option<f64>,

        /// Compare case-sensitively
        #[arg(long)]
        case_sensitive: bool,

        /// Show at most this many results
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Sync the catalog from the active appstores
    Sync {
        /// Refetch every skill instead of only new ones
        #[arg(long)]
        rebuild: bool,

        /// Keep entries from sources that dropped them
        #[arg(long)]
        merge: bool,

        /// Enrich entries from GitHub README and LICENSE files
        #[arg(long)]
        github: bool,
    },

    /// Inspect the installed skills ledger
    State {
        #[command(subcommand)]
        command: StateCommand,
    },
}

#[derive(Subcommand)]
enum StateCommand {
    /// List installed skills
    List,

    /// Show one installed skill
    Show { name: String },

    /// Print the ledger content hash
    Hash,
}

fn parse_appstore(s: &str) -> std::result::Result<AppstoreId, String> {
    s.parse::<AppstoreId>().map_err(|e| e.message)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Returns `false` when the command ran but should exit non-zero.
async fn run(cli: Cli) -> Result<bool> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    let search_threshold = config.search_threshold;
    let search_ignore_case = config.search_ignore_case;

    let sink: Arc<dyn EventSink> = Arc::new(TracingSink);
    let manager = SkillsManager::open(config, sink)?;

    match cli.command {
        Command::Enable { appstore } => {
            if manager.enable(appstore).await? {
                println!("Enabled {}", appstore);
            } else {
                println!("{} is already enabled", appstore);
            }
        }
        Command::Disable { appstore } => {
            if manager.disable(appstore).await? {
                println!("Disabled {}", appstore);
            } else {
                println!("{} is already disabled", appstore);
            }
        }
        Command::Priority { appstore, priority } => {
            manager.set_priority(appstore, priority).await?;
            println!("{} priority set to {}", appstore, priority);
        }
        Command::Auth { appstore, token } => {
            let clearing = token.is_none();
            manager.set_auth_token(appstore, token).await?;
            if clearing {
                println!("Cleared {} token", appstore);
            } else {
                println!("Stored {} token", appstore);
            }
        }
        Command::Config { appstore } => match appstore {
            Some(id) => render::print_appstore(&manager.appstore(id).await),
            None => render::print_appstore_list(&manager.settings().await),
        },
        Command::Search {
            field,
            query,
            fuzzy,
            thresh,
            case_sensitive,
            limit,
        } => {
            let threshold = thresh.unwrap_or(search_threshold);
            let ignore_case = search_ignore_case && !case_sensitive;
            let hits = if field.eq_ignore_ascii_case("any") {
                manager.search_any(&query, fuzzy, ignore_case, threshold)?
            } else {
                let field: SearchField = field.parse()?;
                manager.search(
                    &SearchQuery::new(field, query)
                        .fuzzy(fuzzy)
                        .ignore_case(ignore_case)
                        .threshold(threshold),
                )?
            };
            render::print_hits(&hits, limit);
        }
        Command::Sync {
            rebuild,
            merge,
            github,
        } => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("interrupted, finishing started sources");
                    on_interrupt.cancel();
                }
            });

            let report = manager
                .sync(
                    SyncOptions {
                        new_only: !rebuild,
                        merge,
                        parse_github: github,
                    },
                    cancel,
                )
                .await?;
            render::print_sync_report(&report);
            return Ok(!report.all_failed());
        }
        Command::State { command } => {
            let state = manager.state().await;
            match command {
                StateCommand::List => render::print_state_list(state.ledger().list()),
                StateCommand::Show { name } => {
                    let entry = state
                        .get(&name)
                        .ok_or_else(|| Error::not_found(format!("no installed skill named {name}")))?;
                    render::print_state(entry);
                }
                StateCommand::Hash => println!("{}", state.hash()),
            }
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn appstore_aliases_parse() {
        assert_eq!(parse_appstore("bigscreen").unwrap(), AppstoreId::Pling);
        assert!(parse_appstore("nope").is_err());
    }

    #[test]
    fn sync_flags() {
        let cli = Cli::try_parse_from(["osmctl", "sync", "--rebuild", "--github"]).unwrap();
        match cli.command {
            Command::Sync {
                rebuild,
                merge,
                github,
            } => {
                assert!(rebuild);
                assert!(!merge);
                assert!(github);
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn negative_priority_accepted() {
        let cli = Cli::try_parse_from(["osmctl", "priority", "ovos", "-3"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Priority {
                appstore: AppstoreId::Ovos,
                priority: -3
            }
        ));
    }
}
