//! Core types for the skills manager: the skill data model, identifier
//! derivation, settings, lifecycle events and the device state ledger.

pub mod appstores;
pub mod config;
pub mod error;
pub mod events;
pub mod identifier;
pub mod licenses;
pub mod persist;
pub mod state;
pub mod types;

pub use appstores::{AppstoreConfig, AppstoreSettings};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use identifier::Identifier;
pub use types::*;
