//! Handler par défaut : le fichier original.

use std::fs::File;
use std::path::Path;

use pmocds::{render_protocol_info, CdsObject, CdsResource, HandlerType, ResAttr};

use crate::registry::MetadataHandler;
use crate::{ContentSource, HandlerError, Result};

/// Ouvre un fichier en source d'octets.
pub fn open_file(path: &Path) -> Result<Box<dyn ContentSource>> {
    let file = File::open(path).map_err(|e| HandlerError::io(path, e))?;
    Ok(Box::new(file))
}

/// Sert le fichier pointé par la localisation de l'objet et garantit la
/// présence de la ressource principale en tête de séquence.
#[derive(Debug, Default)]
pub struct DefaultHandler;

impl MetadataHandler for DefaultHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::Default
    }

    fn accepts(&self, mime_type: &str, _extension: &str) -> bool {
        !mime_type.is_empty()
    }

    fn fill_metadata(&self, obj: &mut CdsObject) -> Result<()> {
        if !obj.is_pure_item() {
            return Ok(());
        }
        obj.remove_resources_of(HandlerType::Default);
        let mut res = CdsResource::new(HandlerType::Default);
        res.set_attr(ResAttr::ProtocolInfo, render_protocol_info(obj.mime_type()));
        if obj.size_on_disk > 0 {
            res.set_attr(ResAttr::Size, obj.size_on_disk.to_string());
        }
        // La ressource principale occupe toujours l'indice 0
        obj.resources.insert(0, res);
        Ok(())
    }

    fn serve_content(&self, obj: &CdsObject, _res_index: usize) -> Result<Box<dyn ContentSource>> {
        open_file(&obj.location)
    }
}
