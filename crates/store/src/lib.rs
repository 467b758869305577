//! Durable JSON-backed registries for the tether gateway.
//!
//! Each registry owns one file under the data directory: the file is read at
//! startup and rewritten after every mutation. The premium and admin lists
//! are additionally hot-reloaded when the files change on disk.

pub mod errlog;
pub mod error;
pub mod history;
pub mod json;
pub mod tiers;
pub mod watch;

pub use {
    errlog::ErrorLog,
    error::{Error, Result},
    history::{ActorHistoryRecord, HistoryStore},
    tiers::{AdminStore, TierMembership, TierStore},
    watch::{ReloadEvent, StoreWatcher},
};
