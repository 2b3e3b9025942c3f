//! # pmoscan
//!
//! Autoscan engine: keeps the catalog coherent with the filesystem through
//! two cooperating scanners over the same [`AutoscanDirectory`] collection.
//!
//! - [`TimedScanner`]: a single scheduler thread that fires full rescans at
//!   `last_scan + interval` and re-arms after completion.
//! - [`EventScanner`]: a single thread consuming kernel filesystem events
//!   through the [`FsNotifier`] abstraction, replaying every change through
//!   the content manager. It tracks one watch per directory, move watches on
//!   ancestors of each start point, and "non-existing" watch chains that let
//!   persistent autoscans re-attach when a vanished path reappears.
//!
//! On platforms without a kernel notification facility the event scanner is
//! simply not constructed and timed scanning carries the load alone.
//!
//! [`AutoscanDirectory`]: pmocatalog::AutoscanDirectory

pub mod event_scanner;
pub mod notifier;
pub mod notify_backend;
pub mod timed;
mod watch;

pub use event_scanner::EventScanner;
pub use notifier::{mask, FsEvent, FsNotifier, WatchDescriptor};
pub use notify_backend::NotifyBackend;
pub use timed::TimedScanner;

use std::path::PathBuf;

use thiserror::Error;

/// Autoscan engine errors.
#[derive(Error, Debug)]
pub enum ScanError {
    /// The notification facility rejected a watch.
    #[error("notifier error on {path}: {msg}")]
    Notifier { path: PathBuf, msg: String },

    #[error(transparent)]
    Import(#[from] pmoimport::ImportError),

    #[error(transparent)]
    Catalog(#[from] pmocatalog::CatalogError),

    #[error("shutdown in progress")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, ScanError>;
