//! Dimensions et vignette des images.
//!
//! Le décodage s'appuie sur le crate `image` : résolution relevée sur la
//! ressource principale, vignette recalculée à la demande plutôt que lue
//! depuis le segment EXIF.

use std::io::Cursor;

use image::ImageFormat;

use pmocds::{
    render_protocol_info, CdsObject, CdsResource, HandlerType, ResAttr, CONTENT_TYPE_THUMBNAIL,
    RESOURCE_CONTENT_TYPE,
};

use crate::registry::MetadataHandler;
use crate::{ContentSource, HandlerError, Result};

const HANDLER_NAME: &str = "exif";

/// Taille de vignette par défaut, en pixels sur le grand côté.
pub const DEFAULT_THUMB_SIZE: u32 = 160;

#[derive(Debug)]
pub struct ExifHandler {
    thumb_size: u32,
}

impl ExifHandler {
    pub fn new(thumb_size: u32) -> Self {
        ExifHandler { thumb_size }
    }
}

impl Default for ExifHandler {
    fn default() -> Self {
        Self::new(DEFAULT_THUMB_SIZE)
    }
}

impl MetadataHandler for ExifHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::Exif
    }

    fn accepts(&self, mime_type: &str, _extension: &str) -> bool {
        mime_type.starts_with("image/")
    }

    fn fill_metadata(&self, obj: &mut CdsObject) -> Result<()> {
        let (width, height) = image::image_dimensions(&obj.location)
            .map_err(|e| HandlerError::failed(HANDLER_NAME, e))?;

        if let Some(main) = obj
            .resources
            .iter_mut()
            .find(|r| r.handler == HandlerType::Default)
        {
            main.set_attr(ResAttr::Resolution, format!("{width}x{height}"));
        }

        obj.remove_resources_of(HandlerType::Exif);
        if width > self.thumb_size || height > self.thumb_size {
            let mut thumb = CdsResource::new(HandlerType::Exif);
            thumb.set_attr(ResAttr::ProtocolInfo, render_protocol_info("image/jpeg"));
            let scale = self.thumb_size as f64 / width.max(height) as f64;
            thumb.set_attr(
                ResAttr::Resolution,
                format!(
                    "{}x{}",
                    (width as f64 * scale).round() as u32,
                    (height as f64 * scale).round() as u32
                ),
            );
            thumb.set_parameter(RESOURCE_CONTENT_TYPE, CONTENT_TYPE_THUMBNAIL);
            obj.add_resource(thumb);
        }
        Ok(())
    }

    fn serve_content(&self, obj: &CdsObject, _res_index: usize) -> Result<Box<dyn ContentSource>> {
        let img = image::open(&obj.location).map_err(|e| HandlerError::failed(HANDLER_NAME, e))?;
        let thumb = img.thumbnail(self.thumb_size, self.thumb_size);
        let mut buffer = Cursor::new(Vec::new());
        thumb
            .to_rgb8()
            .write_to(&mut buffer, ImageFormat::Jpeg)
            .map_err(|e| HandlerError::failed(HANDLER_NAME, e))?;
        buffer.set_position(0);
        Ok(Box::new(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn write_png(path: &std::path::Path, width: u32, height: u32) {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |x, y| {
                Rgb([(x % 256) as u8, (y % 256) as u8, 0])
            });
        img.save(path).unwrap();
    }

    #[test]
    fn resolution_lands_on_the_main_resource() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        write_png(&path, 320, 200);

        let mut obj = CdsObject::item(&path, "image/png");
        obj.add_resource(CdsResource::new(HandlerType::Default));

        let handler = ExifHandler::default();
        handler.fill_metadata(&mut obj).unwrap();
        assert_eq!(obj.resources[0].attr(ResAttr::Resolution), Some("320x200"));

        // Une vignette est proposée pour les images plus grandes que la cible
        assert!(obj.has_resource(HandlerType::Exif));

        // Idempotence : un second passage ne duplique rien
        let before = obj.clone();
        handler.fill_metadata(&mut obj).unwrap();
        assert!(before.equals(&obj, false));
    }

    #[test]
    fn small_images_get_no_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("icone.png");
        write_png(&path, 64, 64);

        let mut obj = CdsObject::item(&path, "image/png");
        obj.add_resource(CdsResource::new(HandlerType::Default));
        ExifHandler::default().fill_metadata(&mut obj).unwrap();
        assert!(!obj.has_resource(HandlerType::Exif));
    }

    #[test]
    fn thumbnail_bytes_are_jpeg() {
        use std::io::Read;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grande.png");
        write_png(&path, 640, 480);
        let obj = CdsObject::item(&path, "image/png");

        let mut source = ExifHandler::default().serve_content(&obj, 1).unwrap();
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes).unwrap();
        assert!(bytes.starts_with(&[0xFF, 0xD8]));
    }
}
