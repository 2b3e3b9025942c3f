//! # pmocatalog - Catalogue persistant du ContentDirectory
//!
//! Ce crate matérialise l'arborescence CDS dans une base SQLite embarquée :
//! objets, métadonnées, ressources et configuration autoscan. Il définit le
//! comportement du stockage, pas seulement le SQL :
//!
//! - **CRUD objets** : insertion transactionnelle (objet + métadonnées +
//!   ressources + incrément de l'update-id parent), chargement, mise à jour
//!   différentielle, suppression de sous-arbre avec intégrité des références
//! - **Index chemin → id** : [`Catalog::find_by_path`]
//! - **Navigation** : [`Catalog::browse`] trié par priorité puis titre replié
//!   en casse, puis id
//! - **Recherche** : prédicats compilés par `pmosearch`, restreints aux
//!   descendants du container interrogé
//! - **Update-ids** : compteurs par container, strictement croissants et
//!   persistants d'un démarrage à l'autre
//!
//! ## Concurrence
//!
//! Un seul écrivain à la fois : la connexion est protégée par un `Mutex`,
//! le journal WAL fournit des instantanés cohérents aux lectures. Les
//! migrations de schéma s'exécutent une fois à l'ouverture, gardées par une
//! ligne de version.

pub mod autoscan;
pub mod catalog;
mod schema;

pub use autoscan::{AutoscanDirectory, ScanMode};
pub use catalog::{BrowseResult, Catalog};

use std::path::PathBuf;

use pmocds::ObjectId;
use thiserror::Error;

/// Erreurs du catalogue.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// L'objet demandé n'existe pas ; jamais fatal pour le pipeline.
    #[error("object {0} not found")]
    NotFound(ObjectId),

    /// Suppression refusée : des références extérieures au sous-arbre
    /// existent encore.
    #[error("object {0} is still referenced outside the subtree")]
    InUse(ObjectId),

    /// Les racines réservées ne se suppriment pas.
    #[error("refusing to remove protected object {0}")]
    Protected(ObjectId),

    #[error(transparent)]
    InvalidObject(#[from] pmocds::ObjectError),

    #[error(transparent)]
    Search(#[from] pmosearch::SearchError),

    /// Erreur du moteur SQLite ; fatale pour la tâche courante.
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CatalogError>;
