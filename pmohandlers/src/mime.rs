//! Détection de type MIME : quelques signatures magiques, puis l'extension.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use pmocds::{UPNP_CLASS_ITEM, UPNP_CLASS_MUSIC_TRACK, UPNP_CLASS_PHOTO, UPNP_CLASS_VIDEO_ITEM};

const EXTENSION_TABLE: &[(&str, &str)] = &[
    ("mp3", "audio/mpeg"),
    ("flac", "audio/flac"),
    ("ogg", "audio/ogg"),
    ("oga", "audio/ogg"),
    ("wav", "audio/x-wav"),
    ("m4a", "audio/mp4"),
    ("aac", "audio/aac"),
    ("wma", "audio/x-ms-wma"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("mp4", "video/mp4"),
    ("m4v", "video/mp4"),
    ("mkv", "video/x-matroska"),
    ("avi", "video/x-msvideo"),
    ("webm", "video/webm"),
    ("mov", "video/quicktime"),
    ("mpg", "video/mpeg"),
    ("mpeg", "video/mpeg"),
    ("srt", "text/srt"),
    ("sub", "text/sub"),
    ("vtt", "text/vtt"),
];

/// Sonde MIME minimale.
///
/// Les premiers octets du fichier sont comparés à une table de signatures ;
/// en cas d'échec on retombe sur l'extension puis sur le fallback fourni.
#[derive(Debug, Default, Clone)]
pub struct Mime;

impl Mime {
    pub fn new() -> Self {
        Mime
    }

    /// Type MIME par extension seule.
    pub fn by_extension(path: &Path) -> Option<&'static str> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        EXTENSION_TABLE
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, m)| *m)
    }

    /// Sonde un fichier, avec `fallback` si rien ne matche.
    pub fn probe(&self, path: &Path, fallback: &str) -> String {
        if let Some(mime) = Self::sniff(path) {
            return mime.to_string();
        }
        Self::by_extension(path)
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string())
    }

    fn sniff(path: &Path) -> Option<&'static str> {
        let mut header = [0u8; 12];
        let mut file = File::open(path).ok()?;
        let read = file.read(&mut header).ok()?;
        let header = &header[..read];

        match header {
            [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
            [0x89, b'P', b'N', b'G', ..] => Some("image/png"),
            [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
            [b'I', b'D', b'3', ..] => Some("audio/mpeg"),
            [b'f', b'L', b'a', b'C', ..] => Some("audio/flac"),
            [b'O', b'g', b'g', b'S', ..] => Some("audio/ogg"),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E'] => Some("audio/x-wav"),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'A', b'V', b'I', b' '] => Some("video/x-msvideo"),
            [0x1A, 0x45, 0xDF, 0xA3, ..] => Some("video/x-matroska"),
            _ => None,
        }
    }
}

/// Classe upnp:class déduite du type MIME.
pub fn classify_mime(mime: &str) -> &'static str {
    if mime.starts_with("audio/") {
        UPNP_CLASS_MUSIC_TRACK
    } else if mime.starts_with("image/") {
        UPNP_CLASS_PHOTO
    } else if mime.starts_with("video/") {
        UPNP_CLASS_VIDEO_ITEM
    } else {
        UPNP_CLASS_ITEM
    }
}
