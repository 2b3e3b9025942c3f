//! Handlers de fichiers annexes : fanart, illustration de container,
//! sous-titres et ressources génériques.
//!
//! Tous partagent la même mécanique : un [`ContentPathSetup`] résout les
//! fichiers candidats, `fill_metadata` matérialise une ressource par
//! trouvaille avec le chemin dans l'attribut `resourceFile`, et
//! `serve_content` rouvre ce chemin (ou relance la résolution si l'attribut
//! manque, cas des catalogues migrés).

use std::path::PathBuf;

use pmocds::{
    render_protocol_info, CdsObject, CdsResource, HandlerType, ResAttr, CONTENT_TYPE_ALBUM_ART,
    CONTENT_TYPE_SUBTITLE, RESOURCE_CONTENT_TYPE,
};

use crate::content_path::{ContentPathConfig, ContentPathSetup};
use crate::file::open_file;
use crate::mime::Mime;
use crate::registry::MetadataHandler;
use crate::{ContentSource, HandlerError, Result};

fn extension_of(path: &std::path::Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn resource_file_of(obj: &CdsObject, res_index: usize) -> Result<Option<PathBuf>> {
    let res = obj
        .resources
        .get(res_index)
        .ok_or(HandlerError::ResourceNotFound {
            id: obj.id,
            index: res_index,
        })?;
    Ok(res.attr(ResAttr::ResourceFile).map(PathBuf::from))
}

fn serve_sidecar(
    obj: &CdsObject,
    res_index: usize,
    setup: &ContentPathSetup,
    handler: &'static str,
) -> Result<Box<dyn ContentSource>> {
    let path = match resource_file_of(obj, res_index)? {
        Some(path) => path,
        None => setup
            .content_paths(obj, None)
            .into_iter()
            .next()
            .ok_or_else(|| HandlerError::failed(handler, "sidecar no longer present"))?,
    };
    open_file(&path)
}

/// Pochette en fichier annexe, à côté du média.
pub struct FanArtHandler {
    setup: ContentPathSetup,
    mime: Mime,
}

impl FanArtHandler {
    pub fn new(config: ContentPathConfig) -> Self {
        FanArtHandler {
            setup: ContentPathSetup::new(config),
            mime: Mime::new(),
        }
    }
}

impl MetadataHandler for FanArtHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::FanArt
    }

    fn accepts(&self, mime_type: &str, _extension: &str) -> bool {
        !mime_type.is_empty()
    }

    fn fill_metadata(&self, obj: &mut CdsObject) -> Result<()> {
        obj.remove_resources_of(HandlerType::FanArt);
        for path in self.setup.content_paths(obj, None) {
            let ext = extension_of(&path);
            let mime = self.mime.probe(&path, &format!("image/{ext}"));
            let mut res = CdsResource::new(HandlerType::FanArt);
            res.set_attr(ResAttr::ProtocolInfo, render_protocol_info(&mime));
            res.set_attr(ResAttr::ResourceFile, path.to_string_lossy());
            res.set_parameter(RESOURCE_CONTENT_TYPE, CONTENT_TYPE_ALBUM_ART);
            obj.add_resource(res);
        }
        Ok(())
    }

    fn serve_content(&self, obj: &CdsObject, res_index: usize) -> Result<Box<dyn ContentSource>> {
        serve_sidecar(obj, res_index, &self.setup, "fanart")
    }
}

/// Illustration des containers, avec un dossier commun optionnel consulté
/// avant le dossier du container.
pub struct ContainerArtHandler {
    setup: ContentPathSetup,
    shared_location: Option<PathBuf>,
    mime: Mime,
}

impl ContainerArtHandler {
    pub fn new(config: ContentPathConfig, shared_location: Option<PathBuf>) -> Self {
        ContainerArtHandler {
            setup: ContentPathSetup::new(config),
            shared_location,
            mime: Mime::new(),
        }
    }

    fn resolve(&self, obj: &CdsObject) -> Vec<PathBuf> {
        if let Some(shared) = &self.shared_location {
            let found = self.setup.content_paths(obj, Some(shared));
            if !found.is_empty() {
                return found;
            }
        }
        self.setup.content_paths(obj, None)
    }
}

impl MetadataHandler for ContainerArtHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::ContainerArt
    }

    fn accepts(&self, mime_type: &str, _extension: &str) -> bool {
        // Les containers n'ont pas de type MIME
        mime_type.is_empty()
    }

    fn fill_metadata(&self, obj: &mut CdsObject) -> Result<()> {
        if !obj.is_container() {
            return Ok(());
        }
        obj.remove_resources_of(HandlerType::ContainerArt);
        for path in self.resolve(obj) {
            let ext = extension_of(&path);
            let mime = self.mime.probe(&path, &format!("image/{ext}"));
            let mut res = CdsResource::new(HandlerType::ContainerArt);
            res.set_attr(ResAttr::ProtocolInfo, render_protocol_info(&mime));
            res.set_attr(ResAttr::ResourceFile, path.to_string_lossy());
            res.set_parameter(RESOURCE_CONTENT_TYPE, CONTENT_TYPE_ALBUM_ART);
            obj.add_resource(res);
        }
        Ok(())
    }

    fn serve_content(&self, obj: &CdsObject, res_index: usize) -> Result<Box<dyn ContentSource>> {
        let path = match resource_file_of(obj, res_index)? {
            Some(path) => path,
            None => self
                .resolve(obj)
                .into_iter()
                .next()
                .ok_or_else(|| HandlerError::failed("containerart", "artwork no longer present"))?,
        };
        open_file(&path)
    }
}

/// Sous-titres en fichiers annexes des vidéos.
pub struct SubtitleHandler {
    setup: ContentPathSetup,
    mime: Mime,
}

impl SubtitleHandler {
    pub fn new(config: ContentPathConfig) -> Self {
        SubtitleHandler {
            setup: ContentPathSetup::new(config),
            mime: Mime::new(),
        }
    }
}

impl MetadataHandler for SubtitleHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::Subtitle
    }

    fn accepts(&self, mime_type: &str, _extension: &str) -> bool {
        mime_type.starts_with("video/")
    }

    fn fill_metadata(&self, obj: &mut CdsObject) -> Result<()> {
        obj.remove_resources_of(HandlerType::Subtitle);
        for path in self.setup.content_paths(obj, None) {
            let ext = extension_of(&path);
            let mime = self.mime.probe(&path, &format!("text/{ext}"));
            let mut res = CdsResource::new(HandlerType::Subtitle);
            res.set_attr(ResAttr::ProtocolInfo, render_protocol_info(&mime));
            res.set_attr(ResAttr::ResourceFile, path.to_string_lossy());
            res.set_attr(ResAttr::Type, &ext);
            // Le radical porte en général la langue (film.fr.srt)
            if let Some(stem) = path.file_stem() {
                res.set_attr(ResAttr::Language, stem.to_string_lossy());
            }
            res.set_parameter(RESOURCE_CONTENT_TYPE, CONTENT_TYPE_SUBTITLE);
            res.set_parameter("type", ext);
            obj.add_resource(res);
        }
        Ok(())
    }

    fn serve_content(&self, obj: &CdsObject, res_index: usize) -> Result<Box<dyn ContentSource>> {
        serve_sidecar(obj, res_index, &self.setup, "subtitle")
    }
}

/// Fichier annexe générique piloté par configuration.
pub struct ResourceFileHandler {
    setup: ContentPathSetup,
}

impl ResourceFileHandler {
    pub fn new(config: ContentPathConfig) -> Self {
        ResourceFileHandler {
            setup: ContentPathSetup::new(config),
        }
    }
}

impl MetadataHandler for ResourceFileHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::ResourceFile
    }

    fn accepts(&self, _mime_type: &str, _extension: &str) -> bool {
        true
    }

    fn fill_metadata(&self, obj: &mut CdsObject) -> Result<()> {
        obj.remove_resources_of(HandlerType::ResourceFile);
        for path in self.setup.content_paths(obj, None) {
            let mut res = CdsResource::new(HandlerType::ResourceFile);
            res.set_attr(ResAttr::ProtocolInfo, render_protocol_info("res"));
            res.set_attr(ResAttr::ResourceFile, path.to_string_lossy());
            obj.add_resource(res);
        }
        Ok(())
    }

    fn serve_content(&self, obj: &CdsObject, res_index: usize) -> Result<Box<dyn ContentSource>> {
        serve_sidecar(obj, res_index, &self.setup, "resource")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fanart_resource_points_to_the_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cover.jpg"), &[0xFF, 0xD8, 0xFF, 0xE0])
            .unwrap();
        let track = dir.path().join("piste.mp3");
        std::fs::write(&track, b"mp3").unwrap();
        let mut obj = CdsObject::item(&track, "audio/mpeg");

        let handler = FanArtHandler::new(ContentPathConfig {
            names: vec!["cover.jpg".to_string()],
            patterns: vec![],
            case_sensitive: false,
        });
        handler.fill_metadata(&mut obj).unwrap();

        assert_eq!(obj.resources.len(), 1);
        let res = &obj.resources[0];
        assert_eq!(res.handler, HandlerType::FanArt);
        assert_eq!(
            res.parameter(RESOURCE_CONTENT_TYPE),
            Some(CONTENT_TYPE_ALBUM_ART)
        );
        assert_eq!(
            res.attr(ResAttr::ResourceFile),
            Some(dir.path().join("cover.jpg").to_str().unwrap())
        );

        // Deux passages ne créent pas de doublon
        handler.fill_metadata(&mut obj).unwrap();
        assert_eq!(obj.resources.len(), 1);
    }

    #[test]
    fn container_art_resolves_in_the_container_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("folder.jpg"), &[0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
        let mut album = CdsObject::container("Album");
        album.location = dir.path().to_path_buf();

        let handler = ContainerArtHandler::new(
            ContentPathConfig {
                names: vec!["folder.jpg".to_string()],
                patterns: vec![],
                case_sensitive: false,
            },
            None,
        );
        // Les containers n'ont pas de type MIME, c'est leur critère
        assert!(handler.accepts("", ""));
        assert!(!handler.accepts("audio/flac", "flac"));

        handler.fill_metadata(&mut album).unwrap();
        assert!(album.has_resource(HandlerType::ContainerArt));
        assert_eq!(
            album.resources[0].attr(ResAttr::ResourceFile),
            Some(dir.path().join("folder.jpg").to_str().unwrap())
        );
    }

    #[test]
    fn subtitle_resource_carries_type_and_language() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("film.fr.srt"), b"1").unwrap();
        let video = dir.path().join("film.mkv");
        std::fs::write(&video, b"mkv").unwrap();
        let mut obj = CdsObject::item(&video, "video/x-matroska");

        let handler = SubtitleHandler::new(ContentPathConfig {
            names: vec!["%filename%.fr.srt".to_string()],
            patterns: vec![],
            case_sensitive: false,
        });
        handler.fill_metadata(&mut obj).unwrap();

        assert_eq!(obj.resources.len(), 1);
        let res = &obj.resources[0];
        assert_eq!(res.attr(ResAttr::Type), Some("srt"));
        assert_eq!(res.attr(ResAttr::Language), Some("film.fr"));
    }
}
