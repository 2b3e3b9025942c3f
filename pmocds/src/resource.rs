//! Ressources servables et leur sérialisation texte.
//!
//! Une ressource décrit une représentation d'un item que la couche HTTP peut
//! servir : fichier original, pochette embarquée, fichier annexe, flux
//! transcodé. La forme sérialisée circule dans les fragments d'URL, d'où
//! l'encodage pourcent des dictionnaires.

use std::collections::BTreeMap;

use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};

use crate::{ObjectError, Result};

const RESOURCE_PART_SEP: char = '~';
const DICT_ENTRY_SEP: char = '/';

/// Plugin responsable d'une ressource.
///
/// La valeur numérique est persistée et sérialisée, ne pas renuméroter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerType {
    /// Le fichier original.
    Default = 0,
    /// Champs EXIF et vignette des images.
    Exif = 1,
    /// Tags audio et pochette embarquée.
    AudioTag = 2,
    /// Ré-encodage à la demande.
    Transcode = 3,
    /// Item servi par URL externe.
    ExternalUrl = 4,
    /// Sonde de conteneur multimédia + extraction d'image.
    MediaProbe = 5,
    /// Pochette en fichier annexe.
    FanArt = 6,
    /// Illustration de container.
    ContainerArt = 7,
    /// Sous-titres en fichier annexe.
    Subtitle = 8,
    /// Fichier annexe générique.
    ResourceFile = 9,
}

impl HandlerType {
    pub fn tag(&self) -> i32 {
        *self as i32
    }

    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(HandlerType::Default),
            1 => Some(HandlerType::Exif),
            2 => Some(HandlerType::AudioTag),
            3 => Some(HandlerType::Transcode),
            4 => Some(HandlerType::ExternalUrl),
            5 => Some(HandlerType::MediaProbe),
            6 => Some(HandlerType::FanArt),
            7 => Some(HandlerType::ContainerArt),
            8 => Some(HandlerType::Subtitle),
            9 => Some(HandlerType::ResourceFile),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerType::Default => "default",
            HandlerType::Exif => "exif",
            HandlerType::AudioTag => "audiotag",
            HandlerType::Transcode => "transcode",
            HandlerType::ExternalUrl => "external",
            HandlerType::MediaProbe => "mediaprobe",
            HandlerType::FanArt => "fanart",
            HandlerType::ContainerArt => "containerart",
            HandlerType::Subtitle => "subtitle",
            HandlerType::ResourceFile => "resource",
        }
    }
}

/// Attributs normalisés d'une ressource (rendus en `res@…` dans DIDL-Lite).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResAttr {
    ProtocolInfo,
    Resolution,
    Duration,
    Bitrate,
    Size,
    NrAudioChannels,
    SampleFrequency,
    /// Chemin du fichier annexe détenu par le handler.
    ResourceFile,
    Type,
    Language,
}

impl ResAttr {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResAttr::ProtocolInfo => "protocolInfo",
            ResAttr::Resolution => "resolution",
            ResAttr::Duration => "duration",
            ResAttr::Bitrate => "bitrate",
            ResAttr::Size => "size",
            ResAttr::NrAudioChannels => "nrAudioChannels",
            ResAttr::SampleFrequency => "sampleFrequency",
            ResAttr::ResourceFile => "resourceFile",
            ResAttr::Type => "type",
            ResAttr::Language => "language",
        }
    }
}

/// Clé de paramètre portant l'indication de contenu pour le dispatch.
pub const RESOURCE_CONTENT_TYPE: &str = "contentType";
/// Valeurs usuelles de `contentType`.
pub const CONTENT_TYPE_ALBUM_ART: &str = "albumart";
pub const CONTENT_TYPE_THUMBNAIL: &str = "thumbnail";
pub const CONTENT_TYPE_SUBTITLE: &str = "subtitle";

/// Construit le champ `protocolInfo` http-get pour un type MIME.
pub fn render_protocol_info(mime_type: &str) -> String {
    format!("http-get:*:{mime_type}:*")
}

/// Une représentation servable d'un objet.
#[derive(Debug, Clone, PartialEq)]
pub struct CdsResource {
    pub handler: HandlerType,
    /// Description de la représentation (protocolInfo, resolution…).
    pub attributes: BTreeMap<String, String>,
    /// Indices de dispatch (contentType…).
    pub parameters: BTreeMap<String, String>,
    /// Réglages privés du handler.
    pub options: BTreeMap<String, String>,
}

impl CdsResource {
    pub fn new(handler: HandlerType) -> Self {
        CdsResource {
            handler,
            attributes: BTreeMap::new(),
            parameters: BTreeMap::new(),
            options: BTreeMap::new(),
        }
    }

    pub fn attr(&self, key: ResAttr) -> Option<&str> {
        self.attributes.get(key.as_str()).map(String::as_str)
    }

    pub fn set_attr(&mut self, key: ResAttr, value: impl Into<String>) {
        self.attributes.insert(key.as_str().to_string(), value.into());
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.parameters.insert(name.into(), value.into());
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    pub fn set_option(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.options.insert(name.into(), value.into());
    }

    /// Sérialise la ressource en quatre champs séparés par `~`.
    pub fn encode(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}",
            self.handler.tag(),
            encode_dict(&self.attributes),
            encode_dict(&self.parameters),
            encode_dict(&self.options),
            sep = RESOURCE_PART_SEP,
        )
    }

    /// Relit une ressource sérialisée.
    ///
    /// Accepte de 2 à 4 champs ; les dictionnaires absents deviennent vides.
    ///
    /// # Errors
    ///
    /// [`ObjectError::ResourceParse`] si le nombre de champs est hors bornes
    /// ou si l'étiquette de handler est inconnue.
    pub fn decode(serial: &str) -> Result<Self> {
        let parts: Vec<&str> = serial.split(RESOURCE_PART_SEP).collect();
        if parts.len() < 2 || parts.len() > 4 {
            return Err(ObjectError::ResourceParse(format!(
                "expected 2 to 4 fields, got {}",
                parts.len()
            )));
        }

        let tag: i32 = parts[0]
            .parse()
            .map_err(|_| ObjectError::ResourceParse(format!("bad handler tag '{}'", parts[0])))?;
        let handler = HandlerType::from_tag(tag)
            .ok_or_else(|| ObjectError::ResourceParse(format!("unknown handler tag {tag}")))?;

        Ok(CdsResource {
            handler,
            attributes: decode_dict(parts[1])?,
            parameters: parts.get(2).map_or(Ok(BTreeMap::new()), |p| decode_dict(p))?,
            options: parts.get(3).map_or(Ok(BTreeMap::new()), |p| decode_dict(p))?,
        })
    }
}

/// Encode un dictionnaire en entrées `clé=valeur` pourcent-encodées,
/// jointes par `/`. Forme partagée avec la persistance de l'auxdata.
pub fn encode_dict(dict: &BTreeMap<String, String>) -> String {
    dict.iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, NON_ALPHANUMERIC),
                utf8_percent_encode(v, NON_ALPHANUMERIC)
            )
        })
        .collect::<Vec<_>>()
        .join(&DICT_ENTRY_SEP.to_string())
}

/// Opération inverse de [`encode_dict`]. La chaîne vide donne un
/// dictionnaire vide.
pub fn decode_dict(encoded: &str) -> Result<BTreeMap<String, String>> {
    let mut dict = BTreeMap::new();
    if encoded.is_empty() {
        return Ok(dict);
    }
    for entry in encoded.split(DICT_ENTRY_SEP) {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| ObjectError::ResourceParse(format!("bad dict entry '{entry}'")))?;
        let key = percent_decode_str(key)
            .decode_utf8()
            .map_err(|e| ObjectError::ResourceParse(e.to_string()))?;
        let value = percent_decode_str(value)
            .decode_utf8()
            .map_err(|e| ObjectError::ResourceParse(e.to_string()))?;
        dict.insert(key.into_owned(), value.into_owned());
    }
    Ok(dict)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_info_rendering() {
        assert_eq!(
            render_protocol_info("image/jpeg"),
            "http-get:*:image/jpeg:*"
        );
    }

    #[test]
    fn encode_decode_round_trip() {
        // Scénario : vignette id3 avec protocolInfo et contentType
        let mut res = CdsResource::new(HandlerType::AudioTag);
        res.set_attr(ResAttr::ProtocolInfo, "http-get:*:image/jpeg:*");
        res.set_parameter(RESOURCE_CONTENT_TYPE, CONTENT_TYPE_THUMBNAIL);

        let decoded = CdsResource::decode(&res.encode()).unwrap();
        assert_eq!(decoded, res);
        assert_eq!(decoded.handler.tag(), 2);
    }

    #[test]
    fn decode_accepts_missing_tails() {
        let res = CdsResource::decode("0~").unwrap();
        assert_eq!(res.handler, HandlerType::Default);
        assert!(res.attributes.is_empty());
        assert!(res.parameters.is_empty());
        assert!(res.options.is_empty());
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert!(CdsResource::decode("0").is_err());
        assert!(CdsResource::decode("0~a~b~c~d").is_err());
        assert!(CdsResource::decode("999~").is_err());
        assert!(CdsResource::decode("x~").is_err());
    }

    #[test]
    fn dict_encoding_escapes_separators() {
        let mut res = CdsResource::new(HandlerType::FanArt);
        res.set_attr(ResAttr::ResourceFile, "/media/Album Art/cover~v2.jpg");
        res.set_option("note", "a=b/c");

        let decoded = CdsResource::decode(&res.encode()).unwrap();
        assert_eq!(
            decoded.attr(ResAttr::ResourceFile),
            Some("/media/Album Art/cover~v2.jpg")
        );
        assert_eq!(decoded.option("note"), Some("a=b/c"));
    }
}
