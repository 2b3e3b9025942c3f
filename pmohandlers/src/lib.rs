//! # pmohandlers - Handlers de métadonnées et service de ressources
//!
//! Chaque handler remplit deux rôles symétriques :
//!
//! - [`MetadataHandler::fill_metadata`] : inspecter le fichier source d'un
//!   objet et lui ajouter métadonnées, auxdata et ressources. L'opération est
//!   idempotente : le handler purge d'abord les ressources qu'il possède.
//! - [`MetadataHandler::serve_content`] : ouvrir une source d'octets pour une
//!   ressource qu'il a créée (fichier original, pochette embarquée, fichier
//!   annexe, flux transcodé).
//!
//! Les handlers sont sélectionnés par type MIME et extension via la
//! [`HandlerRegistry`], et chacun s'exécute sous un budget temps mur
//! ([`budget::run_with_budget`]) : un handler qui dépasse son budget est
//! ignoré pour cet objet, l'item est catalogué avec ce qui a déjà été
//! recueilli.
//!
//! Le dispatch de lecture ([`ResourceDispatcher`]) résout
//! `(objet, index de ressource)` vers le handler propriétaire, en suivant
//! les liens `USE_RESOURCE_REF` vers l'objet source.

pub mod audiotag;
pub mod budget;
pub mod content_path;
pub mod dispatch;
pub mod exif;
pub mod file;
pub mod mediaprobe;
pub mod metacontent;
pub mod mime;
pub mod registry;
pub mod transcode;

pub use content_path::{ContentPathConfig, ContentPathSetup};
pub use dispatch::ResourceDispatcher;
pub use mime::Mime;
pub use registry::{HandlerRegistry, MetadataHandler};
pub use transcode::{TranscodeCache, TranscodeProfile};

use std::io::{Read, Seek};
use std::path::PathBuf;
use std::time::Duration;

use pmocds::{HandlerType, ObjectId};
use thiserror::Error;

/// Source d'octets paresseuse renvoyée par les handlers.
///
/// La gestion des en-têtes Range reste à la charge de l'appelant, qui
/// dispose de `seek`.
pub trait ContentSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> ContentSource for T {}

/// Erreurs des handlers et du dispatch.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Le handler a échoué sur cet objet ; il est ignoré, l'import continue.
    #[error("handler {handler} failed: {cause}")]
    Failed {
        handler: &'static str,
        cause: String,
    },

    /// Budget temps mur dépassé ; même disposition que [`Self::Failed`].
    #[error("handler {handler} exceeded its budget of {budget:?}")]
    Timeout {
        handler: &'static str,
        budget: Duration,
    },

    #[error("object {id} has no resource {index}")]
    ResourceNotFound { id: ObjectId, index: usize },

    #[error("no handler registered for '{}'", .0.as_str())]
    NoHandler(HandlerType),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Catalog(#[from] pmocatalog::CatalogError),

    #[error("shutdown in progress")]
    Shutdown,
}

impl HandlerError {
    pub fn failed(handler: &'static str, cause: impl std::fmt::Display) -> Self {
        HandlerError::Failed {
            handler,
            cause: cause.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HandlerError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, HandlerError>;
