//! # pmoimport - Pipeline d'import du catalogue
//!
//! Ce crate orchestre la transformation du filesystem en arborescence CDS :
//!
//! 1. **Découverte** : [`ContentManager::add_file`] parcourt fichiers et
//!    répertoires, en direct ou via le pool de tâches borné
//! 2. **Extraction** : les handlers de `pmohandlers` enrichissent chaque
//!    item (tags, résolutions, pochettes, fichiers annexes)
//! 3. **Transformation** : l'interpréteur embarqué, derrière le contrat
//!    [`ImportTransformer`], matérialise les hiérarchies virtuelles
//!    (Artistes → X → Albums → Y) par les callbacks du [`TransformerHost`]
//! 4. **Écriture** : tout passe par `pmocatalog`, qui sérialise les
//!    écrivains et tient les update-ids
//!
//! ## Pool de tâches
//!
//! Deux files FIFO (normale et basse priorité, cette dernière drainée
//! seulement quand la première est vide) alimentent un nombre borné de
//! threads. Chaque tâche porte un jeton d'annulation ; annuler un parent
//! annule ses descendants. Les paniques sont piégées à la frontière du
//! pool.

pub mod manager;
pub mod pool;
pub mod transformer;

pub use manager::{AutoScanSetting, ContentManager};
pub use pool::TaskPool;
pub use transformer::{ImportTransformer, TransformerHost};

use std::path::PathBuf;

use thiserror::Error;

/// Erreurs du pipeline d'import.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error(transparent)]
    Catalog(#[from] pmocatalog::CatalogError),

    #[error(transparent)]
    Object(#[from] pmocds::ObjectError),

    /// Arrêt en cours : les opérations longues se terminent au plus vite.
    #[error("shutdown in progress")]
    Shutdown,

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ImportError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ImportError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;
