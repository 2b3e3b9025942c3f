//! # pmocds - Modèle d'objets ContentDirectory
//!
//! Ce crate fournit la représentation en mémoire des entités du service
//! ContentDirectory (CDS) : containers, items physiques et items externes,
//! avec leurs métadonnées, ressources et liens de référence.
//!
//! ## Fonctionnalités
//!
//! - **Objets CDS** : [`CdsObject`] est une somme étiquetée
//!   (container / item / item externe) avec un en-tête commun
//! - **Métadonnées ordonnées** : paires `(clé, valeur)` avec clés dupliquées
//!   autorisées (une piste peut avoir deux artistes)
//! - **Ressources** : chaque [`CdsResource`] décrit une représentation
//!   servable (fichier original, vignette embarquée, flux transcodé…)
//! - **Sérialisation** : aller-retour texte des ressources via
//!   [`CdsResource::encode`] / [`CdsResource::decode`]
//!
//! ## Identifiants réservés
//!
//! - `0` : racine virtuelle du CDS
//! - `1` : racine de l'arborescence physique (configurable côté catalogue)
//! - `-1` : sentinelle invalide / non assigné

pub mod object;
pub mod resource;

pub use object::{
    AutoscanType, CdsObject, ContainerInfo, ItemInfo, MetaField, ObjectFlags, ObjectKind,
};
pub use resource::{
    decode_dict, encode_dict, render_protocol_info, CdsResource, HandlerType, ResAttr,
    CONTENT_TYPE_ALBUM_ART, CONTENT_TYPE_SUBTITLE, CONTENT_TYPE_THUMBNAIL,
    RESOURCE_CONTENT_TYPE,
};

use thiserror::Error;

/// Identifiant d'un objet dans le ContentDirectory.
pub type ObjectId = i32;

/// Sentinelle : objet invalide ou non encore assigné.
pub const INVALID_OBJECT_ID: ObjectId = -1;

/// Racine virtuelle du CDS.
pub const ROOT_ID: ObjectId = 0;

/// Racine de l'arborescence physique (valeur par défaut).
pub const FS_ROOT_ID: ObjectId = 1;

/// Classes upnp:class usuelles.
pub const UPNP_CLASS_CONTAINER: &str = "object.container";
pub const UPNP_CLASS_ITEM: &str = "object.item";
pub const UPNP_CLASS_AUDIO_ITEM: &str = "object.item.audioItem";
pub const UPNP_CLASS_MUSIC_TRACK: &str = "object.item.audioItem.musicTrack";
pub const UPNP_CLASS_VIDEO_ITEM: &str = "object.item.videoItem";
pub const UPNP_CLASS_IMAGE_ITEM: &str = "object.item.imageItem";
pub const UPNP_CLASS_PHOTO: &str = "object.item.imageItem.photo";

/// Erreurs du modèle d'objets.
#[derive(Error, Debug)]
pub enum ObjectError {
    /// Un champ obligatoire est absent ou mal formé.
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// Une ressource sérialisée ne peut pas être relue.
    #[error("cannot parse resource: {0}")]
    ResourceParse(String),
}

pub type Result<T> = std::result::Result<T, ObjectError>;
