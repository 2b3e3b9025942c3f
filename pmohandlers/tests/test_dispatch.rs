use std::io::Read;
use std::sync::Arc;

use pmocatalog::Catalog;
use pmocds::{CdsObject, CdsResource, HandlerType, ObjectFlags, ResAttr, FS_ROOT_ID, ROOT_ID};
use pmohandlers::file::DefaultHandler;
use pmohandlers::{HandlerError, HandlerRegistry, ResourceDispatcher};

fn registry() -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(DefaultHandler));
    Arc::new(registry)
}

#[test]
fn default_resource_serves_the_original_file() {
    let dir = tempfile::tempdir().unwrap();
    let media = dir.path().join("morceau.mp3");
    std::fs::write(&media, b"contenu audio").unwrap();

    let catalog = Catalog::open_in_memory().unwrap();
    let mut item = CdsObject::item(&media, "audio/mpeg");
    item.parent_id = FS_ROOT_ID;
    item.title = "Morceau".to_string();
    let mut res = CdsResource::new(HandlerType::Default);
    res.set_attr(ResAttr::ProtocolInfo, "http-get:*:audio/mpeg:*");
    item.add_resource(res);
    catalog.insert(&mut item).unwrap();

    let dispatcher = ResourceDispatcher::new(registry());
    let mut source = dispatcher.open(&catalog, item.id, 0).unwrap();
    let mut bytes = Vec::new();
    source.read_to_end(&mut bytes).unwrap();
    assert_eq!(bytes, b"contenu audio");
}

#[test]
fn resource_ref_follows_the_physical_source() {
    let dir = tempfile::tempdir().unwrap();
    let media = dir.path().join("original.flac");
    std::fs::write(&media, b"flac physique").unwrap();

    let catalog = Catalog::open_in_memory().unwrap();
    let mut original = CdsObject::item(&media, "audio/flac");
    original.parent_id = FS_ROOT_ID;
    original.title = "Original".to_string();
    original.add_resource(CdsResource::new(HandlerType::Default));
    catalog.insert(&mut original).unwrap();

    // Miroir virtuel sans ressources propres
    let mut mirror = CdsObject::item(&media, "audio/flac");
    mirror.parent_id = ROOT_ID;
    mirror.title = "Miroir".to_string();
    mirror.is_virtual = true;
    mirror.ref_id = original.id;
    mirror.flags.set(ObjectFlags::USE_RESOURCE_REF);
    catalog.insert(&mut mirror).unwrap();

    let dispatcher = ResourceDispatcher::new(registry());
    let mut source = dispatcher.open(&catalog, mirror.id, 0).unwrap();
    let mut bytes = Vec::new();
    source.read_to_end(&mut bytes).unwrap();
    assert_eq!(bytes, b"flac physique");
}

#[test]
fn out_of_range_resource_index_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let media = dir.path().join("x.mp3");
    std::fs::write(&media, b"x").unwrap();

    let catalog = Catalog::open_in_memory().unwrap();
    let mut item = CdsObject::item(&media, "audio/mpeg");
    item.parent_id = FS_ROOT_ID;
    item.title = "X".to_string();
    catalog.insert(&mut item).unwrap();

    let dispatcher = ResourceDispatcher::new(registry());
    assert!(matches!(
        dispatcher.open(&catalog, item.id, 3),
        Err(HandlerError::ResourceNotFound { .. })
    ));
}

#[test]
fn unknown_object_surfaces_not_found() {
    let catalog = Catalog::open_in_memory().unwrap();
    let dispatcher = ResourceDispatcher::new(registry());
    assert!(matches!(
        dispatcher.open(&catalog, 4242, 0),
        Err(HandlerError::Catalog(pmocatalog::CatalogError::NotFound(_)))
    ));
}
