//! Objets du ContentDirectory : en-tête commun + variante par type.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::resource::{CdsResource, HandlerType};
use crate::{ObjectError, ObjectId, Result, INVALID_OBJECT_ID, UPNP_CLASS_CONTAINER};

/// Jeu d'indicateurs attachés à un objet.
///
/// Les valeurs sont stables car elles sont persistées telles quelles par le
/// catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectFlags(pub u32);

impl ObjectFlags {
    pub const RESTRICTED: u32 = 0x0000_0001;
    pub const SEARCHABLE: u32 = 0x0000_0002;
    pub const USE_RESOURCE_REF: u32 = 0x0000_0004;
    pub const PERSISTENT_CONTAINER: u32 = 0x0000_0008;
    pub const PLAYLIST_REF: u32 = 0x0000_0010;
    pub const PROXY_URL: u32 = 0x0000_0020;
    pub const ONLINE_SERVICE: u32 = 0x0000_0040;
    pub const PLAYED: u32 = 0x0000_0200;

    pub fn empty() -> Self {
        ObjectFlags(0)
    }

    pub fn has(&self, mask: u32) -> bool {
        self.0 & mask != 0
    }

    pub fn set(&mut self, mask: u32) {
        self.0 |= mask;
    }

    pub fn clear(&mut self, mask: u32) {
        self.0 &= !mask;
    }

    /// Positionne ou efface `mask` selon `value`.
    pub fn change(&mut self, mask: u32, value: bool) {
        if value {
            self.set(mask)
        } else {
            self.clear(mask)
        }
    }
}

impl Default for ObjectFlags {
    fn default() -> Self {
        ObjectFlags(Self::RESTRICTED)
    }
}

/// Clés de métadonnées du vocabulaire UPnP/DC.
///
/// Les clés hors de cet ensemble restent possibles via
/// [`CdsObject::add_meta_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaField {
    Title,
    Creator,
    Artist,
    Album,
    AlbumArtist,
    Genre,
    Date,
    Description,
    LongDescription,
    TrackNumber,
    PartNumber,
    Composer,
    AlbumArtUri,
}

impl MetaField {
    /// Nom DIDL-Lite de la clé.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaField::Title => "dc:title",
            MetaField::Creator => "dc:creator",
            MetaField::Artist => "upnp:artist",
            MetaField::Album => "upnp:album",
            MetaField::AlbumArtist => "upnp:albumArtist",
            MetaField::Genre => "upnp:genre",
            MetaField::Date => "dc:date",
            MetaField::Description => "dc:description",
            MetaField::LongDescription => "upnp:longDescription",
            MetaField::TrackNumber => "upnp:originalTrackNumber",
            MetaField::PartNumber => "upnp:episodeSeason",
            MetaField::Composer => "upnp:composer",
            MetaField::AlbumArtUri => "upnp:albumArtURI",
        }
    }
}

/// Statut autoscan d'un container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoscanType {
    #[default]
    None,
    /// Point de départ configuré via l'interface.
    Ui,
    /// Point de départ issu du fichier de configuration.
    Config,
}

/// Champs propres aux containers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerInfo {
    /// Compteur CDS, incrémenté à chaque modification du contenu.
    pub update_id: u32,
    /// Nombre d'enfants, mis en cache par le catalogue.
    pub child_count: Option<u32>,
    pub autoscan_type: AutoscanType,
}

/// Champs propres aux items (physiques ou externes).
#[derive(Debug, Clone, PartialEq)]
pub struct ItemInfo {
    pub mime_type: String,
    /// Numéro de partie (disque, saison…).
    pub part_number: i32,
    /// Numéro de piste ou d'épisode.
    pub track_number: i32,
    /// Identifiant de service en ligne, vide sinon.
    pub service_id: String,
    /// Position de lecture mémorisée, en millisecondes.
    pub bookmark_pos_ms: u64,
}

impl Default for ItemInfo {
    fn default() -> Self {
        ItemInfo {
            mime_type: "application/octet-stream".to_string(),
            part_number: 0,
            track_number: 0,
            service_id: String::new(),
            bookmark_pos_ms: 0,
        }
    }
}

/// Variante d'un objet CDS.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKind {
    Container(ContainerInfo),
    Item(ItemInfo),
    /// Item dont `location` est une URL ; le service d'octets délègue
    /// au proxy ou redirige.
    ExternalItem(ItemInfo),
}

/// Un nœud de l'arborescence ContentDirectory.
///
/// Type valeur : les composants reçoivent des copies qu'ils modifient
/// librement avant de les republier vers le catalogue.
#[derive(Debug, Clone, PartialEq)]
pub struct CdsObject {
    /// Identifiant stable, assigné par le catalogue ; `-1` tant que l'objet
    /// n'est pas inséré.
    pub id: ObjectId,
    pub parent_id: ObjectId,
    /// Lien vers l'objet physique source pour les entrées virtuelles.
    pub ref_id: ObjectId,
    /// dc:title
    pub title: String,
    /// upnp:class
    pub upnp_class: String,
    /// Chemin filesystem pour les objets physiques, URL pour les items
    /// externes, chemin synthétique pour les containers virtuels.
    pub location: PathBuf,
    /// mtime du fichier sous-jacent, secondes depuis l'epoch.
    pub mtime: i64,
    /// Dernière écriture dans le catalogue, secondes depuis l'epoch.
    pub utime: i64,
    /// Taille sur disque en octets ; 0 pour les containers et les externes.
    pub size_on_disk: u64,
    /// Vrai si l'objet n'existe que dans l'arbre virtuel.
    pub is_virtual: bool,
    pub flags: ObjectFlags,
    /// Ordonne les frères avant le tri par titre.
    pub sort_priority: i32,
    /// Paires ordonnées ; les clés peuvent se répéter.
    pub metadata: Vec<(String, String)>,
    /// Données annexes clé → valeur (remplacement à l'écriture).
    pub auxdata: BTreeMap<String, String>,
    /// Ressources servables ; `res_id` == position dans ce vecteur.
    pub resources: Vec<CdsResource>,
    pub kind: ObjectKind,
}

impl CdsObject {
    fn base(kind: ObjectKind) -> Self {
        CdsObject {
            id: INVALID_OBJECT_ID,
            parent_id: INVALID_OBJECT_ID,
            ref_id: INVALID_OBJECT_ID,
            title: String::new(),
            upnp_class: String::new(),
            location: PathBuf::new(),
            mtime: 0,
            utime: 0,
            size_on_disk: 0,
            is_virtual: false,
            flags: ObjectFlags::default(),
            sort_priority: 0,
            metadata: Vec::new(),
            auxdata: BTreeMap::new(),
            resources: Vec::new(),
            kind,
        }
    }

    /// Crée un container avec la classe `object.container`.
    pub fn container(title: impl Into<String>) -> Self {
        let mut obj = Self::base(ObjectKind::Container(ContainerInfo::default()));
        obj.title = title.into();
        obj.upnp_class = UPNP_CLASS_CONTAINER.to_string();
        obj
    }

    /// Crée un item physique.
    pub fn item(location: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        let mut obj = Self::base(ObjectKind::Item(ItemInfo {
            mime_type: mime_type.into(),
            ..ItemInfo::default()
        }));
        obj.location = location.into();
        obj.upnp_class = crate::UPNP_CLASS_ITEM.to_string();
        obj
    }

    /// Crée un item dont la localisation est une URL.
    pub fn external_item(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        let mut obj = Self::base(ObjectKind::ExternalItem(ItemInfo {
            mime_type: mime_type.into(),
            ..ItemInfo::default()
        }));
        obj.location = PathBuf::from(url.into());
        obj.upnp_class = crate::UPNP_CLASS_ITEM.to_string();
        obj
    }

    pub fn is_container(&self) -> bool {
        matches!(self.kind, ObjectKind::Container(_))
    }

    pub fn is_item(&self) -> bool {
        matches!(self.kind, ObjectKind::Item(_) | ObjectKind::ExternalItem(_))
    }

    /// Item physique uniquement (exclut les items externes).
    pub fn is_pure_item(&self) -> bool {
        matches!(self.kind, ObjectKind::Item(_))
    }

    pub fn is_external_item(&self) -> bool {
        matches!(self.kind, ObjectKind::ExternalItem(_))
    }

    pub fn container_info(&self) -> Option<&ContainerInfo> {
        match &self.kind {
            ObjectKind::Container(c) => Some(c),
            _ => None,
        }
    }

    pub fn container_info_mut(&mut self) -> Option<&mut ContainerInfo> {
        match &mut self.kind {
            ObjectKind::Container(c) => Some(c),
            _ => None,
        }
    }

    pub fn item_info(&self) -> Option<&ItemInfo> {
        match &self.kind {
            ObjectKind::Item(i) | ObjectKind::ExternalItem(i) => Some(i),
            _ => None,
        }
    }

    pub fn item_info_mut(&mut self) -> Option<&mut ItemInfo> {
        match &mut self.kind {
            ObjectKind::Item(i) | ObjectKind::ExternalItem(i) => Some(i),
            _ => None,
        }
    }

    /// Type MIME de l'item, chaîne vide pour un container.
    pub fn mime_type(&self) -> &str {
        self.item_info().map(|i| i.mime_type.as_str()).unwrap_or("")
    }

    /// Première valeur associée à `field`, s'il y en a une.
    pub fn meta(&self, field: MetaField) -> Option<&str> {
        self.meta_str(field.as_str())
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn add_meta(&mut self, field: MetaField, value: impl Into<String>) {
        self.metadata.push((field.as_str().to_string(), value.into()));
    }

    pub fn add_meta_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.push((key.into(), value.into()));
    }

    /// Supprime toutes les occurrences de la clé.
    pub fn remove_meta(&mut self, field: MetaField) {
        let key = field.as_str();
        self.metadata.retain(|(k, _)| k != key);
    }

    /// Ajoute une ressource en fin de séquence ; sa position devient son
    /// `res_id`.
    pub fn add_resource(&mut self, resource: CdsResource) -> usize {
        self.resources.push(resource);
        self.resources.len() - 1
    }

    pub fn has_resource(&self, handler: HandlerType) -> bool {
        self.resources.iter().any(|r| r.handler == handler)
    }

    /// Retire toutes les ressources appartenant à `handler`.
    ///
    /// Utilisé par les handlers pour rester idempotents : ils purgent leur
    /// production précédente avant de la régénérer.
    pub fn remove_resources_of(&mut self, handler: HandlerType) {
        self.resources.retain(|r| r.handler != handler);
    }

    /// Compare deux objets.
    ///
    /// `exact=false` ne compare que les champs visibles en DIDL-Lite (titre,
    /// classe, localisation, mime, métadonnées, ressources).
    /// `exact=true` compare en plus id, parent, référence, flags, temps et
    /// taille. La position de lecture mémorisée n'est jamais comparée,
    /// comportement hérité de l'implémentation d'origine.
    pub fn equals(&self, other: &CdsObject, exact: bool) -> bool {
        let didl = self.title == other.title
            && self.upnp_class == other.upnp_class
            && self.location == other.location
            && self.metadata == other.metadata
            && self.resources == other.resources
            && match (&self.kind, &other.kind) {
                (ObjectKind::Container(_), ObjectKind::Container(_)) => true,
                (ObjectKind::Item(a), ObjectKind::Item(b))
                | (ObjectKind::ExternalItem(a), ObjectKind::ExternalItem(b)) => {
                    a.mime_type == b.mime_type
                        && a.track_number == b.track_number
                        && a.part_number == b.part_number
                }
                _ => false,
            };
        if !exact {
            return didl;
        }
        didl
            && self.id == other.id
            && self.parent_id == other.parent_id
            && self.ref_id == other.ref_id
            && self.flags == other.flags
            && self.utime == other.utime
            && self.mtime == other.mtime
            && self.size_on_disk == other.size_on_disk
            && self.is_virtual == other.is_virtual
            && self.sort_priority == other.sort_priority
            && self.auxdata == other.auxdata
    }

    /// Vérifie que les champs minimum requis sont présents.
    ///
    /// # Errors
    ///
    /// [`ObjectError::InvalidObject`] si un champ obligatoire manque :
    /// titre non vide pour un container, localisation et type MIME non vides
    /// pour un item, localisation en forme d'URL pour un item externe.
    pub fn validate(&self) -> Result<()> {
        match &self.kind {
            ObjectKind::Container(_) => {
                if self.title.is_empty() {
                    return Err(ObjectError::InvalidObject(
                        "container without title".to_string(),
                    ));
                }
            }
            ObjectKind::Item(info) => {
                if self.location.as_os_str().is_empty() {
                    return Err(ObjectError::InvalidObject(
                        "item without location".to_string(),
                    ));
                }
                if info.mime_type.is_empty() {
                    return Err(ObjectError::InvalidObject(
                        "item without mime type".to_string(),
                    ));
                }
            }
            ObjectKind::ExternalItem(info) => {
                if !is_url(&self.location) {
                    return Err(ObjectError::InvalidObject(format!(
                        "external item location is not a URL: {}",
                        self.location.display()
                    )));
                }
                if info.mime_type.is_empty() {
                    return Err(ObjectError::InvalidObject(
                        "external item without mime type".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn is_url(location: &Path) -> bool {
    location.to_string_lossy().contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResAttr;

    #[test]
    fn container_requires_title() {
        let mut c = CdsObject::container("Musique");
        assert!(c.validate().is_ok());
        c.title.clear();
        assert!(matches!(c.validate(), Err(ObjectError::InvalidObject(_))));
    }

    #[test]
    fn item_requires_location_and_mime() {
        let item = CdsObject::item("/media/a.mp3", "audio/mpeg");
        assert!(item.validate().is_ok());

        let mut no_mime = item.clone();
        no_mime.item_info_mut().unwrap().mime_type.clear();
        assert!(no_mime.validate().is_err());

        let mut no_loc = item;
        no_loc.location = PathBuf::new();
        assert!(no_loc.validate().is_err());
    }

    #[test]
    fn external_item_requires_url() {
        let ok = CdsObject::external_item("http://radio.example/stream", "audio/mpeg");
        assert!(ok.validate().is_ok());

        let bad = CdsObject::external_item("/pas/une/url", "audio/mpeg");
        assert!(bad.validate().is_err());
    }

    #[test]
    fn duplicate_metadata_keys_are_kept_in_order() {
        let mut item = CdsObject::item("/media/a.flac", "audio/flac");
        item.add_meta(MetaField::Artist, "Alice");
        item.add_meta(MetaField::Artist, "Bob");
        let artists: Vec<&str> = item
            .metadata
            .iter()
            .filter(|(k, _)| k == "upnp:artist")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(artists, vec!["Alice", "Bob"]);
        assert_eq!(item.meta(MetaField::Artist), Some("Alice"));
    }

    #[test]
    fn equals_loose_ignores_internal_fields() {
        let mut a = CdsObject::item("/media/a.mp3", "audio/mpeg");
        a.title = "A".to_string();
        let mut b = a.clone();
        b.id = 42;
        b.parent_id = 7;
        b.utime = 1000;
        assert!(a.equals(&b, false));
        assert!(!a.equals(&b, true));

        b.title = "B".to_string();
        assert!(!a.equals(&b, false));
    }

    #[test]
    fn equals_exact_ignores_bookmark_position() {
        let mut a = CdsObject::item("/media/a.mkv", "video/x-matroska");
        a.id = 3;
        let mut b = a.clone();
        b.item_info_mut().unwrap().bookmark_pos_ms = 90_000;
        assert!(a.equals(&b, true));
    }

    #[test]
    fn resource_positions_follow_insertion() {
        let mut item = CdsObject::item("/media/a.jpg", "image/jpeg");
        let first = item.add_resource(CdsResource::new(HandlerType::Default));
        let mut thumb = CdsResource::new(HandlerType::Exif);
        thumb.set_attr(ResAttr::Resolution, "160x120");
        let second = item.add_resource(thumb);
        assert_eq!((first, second), (0, 1));
        assert!(item.has_resource(HandlerType::Exif));

        item.remove_resources_of(HandlerType::Exif);
        assert!(!item.has_resource(HandlerType::Exif));
        assert_eq!(item.resources.len(), 1);
    }
}
