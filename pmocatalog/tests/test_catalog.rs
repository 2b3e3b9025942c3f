use std::path::PathBuf;
use std::time::Duration;

use pmocatalog::{AutoscanDirectory, Catalog, CatalogError, ScanMode};
use pmocds::{
    CdsObject, CdsResource, HandlerType, MetaField, ObjectFlags, ResAttr, FS_ROOT_ID, ROOT_ID,
};

fn new_catalog() -> Catalog {
    Catalog::open_in_memory().unwrap()
}

/// Insère une piste complète sous le parent donné.
fn sample_track(catalog: &Catalog, parent: i32, path: &str, title: &str) -> CdsObject {
    let mut item = CdsObject::item(path, "audio/mpeg");
    item.parent_id = parent;
    item.title = title.to_string();
    item.upnp_class = pmocds::UPNP_CLASS_MUSIC_TRACK.to_string();
    item.add_meta(MetaField::Title, title);
    item.add_meta(MetaField::Artist, "Kyuss");
    let mut res = CdsResource::new(HandlerType::Default);
    res.set_attr(ResAttr::ProtocolInfo, "http-get:*:audio/mpeg:*");
    item.add_resource(res);
    catalog.insert(&mut item).unwrap();
    item
}

#[test]
fn reserved_roots_exist() {
    let catalog = new_catalog();
    let root = catalog.load(ROOT_ID).unwrap();
    assert!(root.is_container());
    let fs_root = catalog.load(FS_ROOT_ID).unwrap();
    assert_eq!(fs_root.parent_id, ROOT_ID);
}

#[test]
fn insert_then_load_round_trips_didl_fields() {
    // Propriété 1 : load(insert(o)) equals o en mode loose
    let catalog = new_catalog();
    let inserted = sample_track(&catalog, FS_ROOT_ID, "/media/track.mp3", "Gardenia");
    assert!(inserted.id > FS_ROOT_ID);

    let loaded = catalog.load(inserted.id).unwrap();
    assert!(inserted.equals(&loaded, false));
    assert_eq!(loaded.meta(MetaField::Artist), Some("Kyuss"));
    assert_eq!(loaded.resources.len(), 1);
}

#[test]
fn load_unknown_id_is_not_found() {
    let catalog = new_catalog();
    assert!(matches!(
        catalog.load(9999),
        Err(CatalogError::NotFound(9999))
    ));
}

#[test]
fn find_by_path_ignores_virtual_entries() {
    let catalog = new_catalog();
    let track = sample_track(&catalog, FS_ROOT_ID, "/media/track.mp3", "Gardenia");

    // Entrée virtuelle partageant la localisation de sa source
    let mut virtual_item = track.clone();
    virtual_item.id = -1;
    virtual_item.ref_id = track.id;
    virtual_item.is_virtual = true;
    virtual_item.flags.set(ObjectFlags::USE_RESOURCE_REF);
    catalog.insert(&mut virtual_item).unwrap();

    let found = catalog
        .find_by_path(&PathBuf::from("/media/track.mp3"), true)
        .unwrap();
    assert_eq!(found, Some(track.id));
    assert_eq!(
        catalog.find_by_path(&PathBuf::from("/ailleurs"), false).unwrap(),
        None
    );
}

#[test]
fn child_count_follows_mutations() {
    // Propriété 2 : childCount == nombre d'objets dont parent_id == id
    let catalog = new_catalog();
    let mut album = CdsObject::container("Welcome to Sky Valley");
    album.parent_id = FS_ROOT_ID;
    catalog.insert(&mut album).unwrap();

    assert_eq!(
        catalog.load(album.id).unwrap().container_info().unwrap().child_count,
        Some(0)
    );

    let a = sample_track(&catalog, album.id, "/media/01.mp3", "Gardenia");
    sample_track(&catalog, album.id, "/media/02.mp3", "Asteroid");
    assert_eq!(
        catalog.load(album.id).unwrap().container_info().unwrap().child_count,
        Some(2)
    );

    catalog.remove_subtree(a.id, false).unwrap();
    assert_eq!(
        catalog.load(album.id).unwrap().container_info().unwrap().child_count,
        Some(1)
    );
}

#[test]
fn update_id_bumps_exactly_on_didl_visible_changes() {
    // Propriété 3 : update_id strictement croissant, incrémenté seulement
    // quand un champ visible change
    let catalog = new_catalog();
    let mut album = CdsObject::container("Blues for the Red Sun");
    album.parent_id = FS_ROOT_ID;
    catalog.insert(&mut album).unwrap();

    let before = catalog
        .load(album.id)
        .unwrap()
        .container_info()
        .unwrap()
        .update_id;

    let mut track = sample_track(&catalog, album.id, "/media/t.mp3", "Thumb");
    let after_insert = catalog
        .load(album.id)
        .unwrap()
        .container_info()
        .unwrap()
        .update_id;
    assert_eq!(after_insert, before + 1);

    // utime seul : pas de changement visible, pas d'incrément
    catalog.touch_utime(track.id).unwrap();
    catalog.update(&track).unwrap();
    let after_noop = catalog
        .load(album.id)
        .unwrap()
        .container_info()
        .unwrap()
        .update_id;
    assert_eq!(after_noop, after_insert);

    // changement de titre : incrément
    track.title = "Green Machine".to_string();
    catalog.update(&track).unwrap();
    let after_edit = catalog
        .load(album.id)
        .unwrap()
        .container_info()
        .unwrap()
        .update_id;
    assert_eq!(after_edit, after_insert + 1);
}

#[test]
fn update_ids_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("catalog.db");
    let album_id;
    let update_id;
    {
        let catalog = Catalog::open(&db_path).unwrap();
        let mut album = CdsObject::container("Persistance");
        album.parent_id = FS_ROOT_ID;
        catalog.insert(&mut album).unwrap();
        album_id = album.id;
        catalog.increment_update_id(album_id).unwrap();
        update_id = catalog.increment_update_id(album_id).unwrap();
    }
    let reopened = Catalog::open(&db_path).unwrap();
    let next = reopened.increment_update_id(album_id).unwrap();
    assert_eq!(next, update_id + 1);
}

#[test]
fn remove_subtree_honors_external_referrers() {
    let catalog = new_catalog();
    let mut album = CdsObject::container("Physique");
    album.parent_id = FS_ROOT_ID;
    catalog.insert(&mut album).unwrap();
    let track = sample_track(&catalog, album.id, "/media/t.flac", "Morceau");

    // Arbre virtuel référant la piste physique
    let mut artists = CdsObject::container("Artistes");
    artists.parent_id = ROOT_ID;
    artists.is_virtual = true;
    catalog.insert(&mut artists).unwrap();
    let mut virtual_track = track.clone();
    virtual_track.id = -1;
    virtual_track.parent_id = artists.id;
    virtual_track.ref_id = track.id;
    virtual_track.is_virtual = true;
    catalog.insert(&mut virtual_track).unwrap();

    // Référent hors du sous-arbre : refus sans allow_refs
    assert!(matches!(
        catalog.remove_subtree(album.id, false),
        Err(CatalogError::InUse(_))
    ));

    // Avec allow_refs la cascade emporte le référent
    catalog.remove_subtree(album.id, true).unwrap();
    assert!(catalog.load(track.id).is_err());
    assert!(catalog.load(virtual_track.id).is_err());
    assert!(catalog.load(artists.id).is_ok());
}

#[test]
fn remove_subtree_keeps_playlist_referrers_dangling() {
    let catalog = new_catalog();
    let track = sample_track(&catalog, FS_ROOT_ID, "/media/t.ogg", "Piste");

    let mut playlist_entry = track.clone();
    playlist_entry.id = -1;
    playlist_entry.parent_id = ROOT_ID;
    playlist_entry.ref_id = track.id;
    playlist_entry.is_virtual = true;
    playlist_entry.flags.set(ObjectFlags::PLAYLIST_REF);
    catalog.insert(&mut playlist_entry).unwrap();

    // Le référent playlist n'empêche pas la suppression et reste en suspens
    catalog.remove_subtree(track.id, false).unwrap();
    assert!(catalog.load(track.id).is_err());
    assert!(catalog.load(playlist_entry.id).is_ok());
}

#[test]
fn reserved_roots_are_protected() {
    let catalog = new_catalog();
    assert!(matches!(
        catalog.remove_subtree(ROOT_ID, true),
        Err(CatalogError::Protected(_))
    ));
    assert!(matches!(
        catalog.remove_subtree(FS_ROOT_ID, true),
        Err(CatalogError::Protected(_))
    ));
}

#[test]
fn browse_orders_by_priority_then_folded_title() {
    let catalog = new_catalog();
    let mut parent = CdsObject::container("Dossier");
    parent.parent_id = FS_ROOT_ID;
    catalog.insert(&mut parent).unwrap();

    sample_track(&catalog, parent.id, "/m/b.mp3", "banane");
    sample_track(&catalog, parent.id, "/m/a.mp3", "Ananas");
    let mut first = CdsObject::item("/m/z.mp3", "audio/mpeg");
    first.parent_id = parent.id;
    first.title = "Zéro mais prioritaire".to_string();
    first.sort_priority = -1;
    catalog.insert(&mut first).unwrap();

    let result = catalog.browse(parent.id, 0, 0).unwrap();
    assert_eq!(result.total, 3);
    let titles: Vec<&str> = result.objects.iter().map(|o| o.title.as_str()).collect();
    assert_eq!(titles, vec!["Zéro mais prioritaire", "Ananas", "banane"]);

    // Pagination
    let page = catalog.browse(parent.id, 1, 1).unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.objects.len(), 1);
    assert_eq!(page.objects[0].title, "Ananas");
}

#[test]
fn search_is_scoped_to_descendants() {
    // Propriété 7 : p = "v" et p contains "v" incluent les objets dont
    // metadata[p] == v
    let catalog = new_catalog();
    let mut inside = CdsObject::container("Dedans");
    inside.parent_id = FS_ROOT_ID;
    catalog.insert(&mut inside).unwrap();
    let track = sample_track(&catalog, inside.id, "/m/in.mp3", "Gardenia");
    sample_track(&catalog, ROOT_ID, "/m/out.mp3", "Gardenia");

    let eq = catalog
        .search(inside.id, "dc:title = \"Gardenia\"", "", 0, 0)
        .unwrap();
    assert_eq!(eq.total, 1);
    assert_eq!(eq.objects[0].id, track.id);

    let contains = catalog
        .search(inside.id, "dc:title contains \"Gardenia\"", "", 0, 0)
        .unwrap();
    assert_eq!(contains.total, 1);

    // La recherche par classe passe par la colonne de l'objet
    let by_class = catalog
        .search(
            FS_ROOT_ID,
            "upnp:class derivedfrom \"object.item.audioItem\"",
            "",
            0,
            0,
        )
        .unwrap();
    assert_eq!(by_class.total, 1);
}

#[test]
fn search_sort_criteria_apply() {
    let catalog = new_catalog();
    let mut parent = CdsObject::container("Tri");
    parent.parent_id = FS_ROOT_ID;
    catalog.insert(&mut parent).unwrap();
    sample_track(&catalog, parent.id, "/m/1.mp3", "Alpha");
    sample_track(&catalog, parent.id, "/m/2.mp3", "Beta");

    let result = catalog
        .search(parent.id, "upnp:artist = \"Kyuss\"", "-dc:title", 0, 0)
        .unwrap();
    let titles: Vec<&str> = result.objects.iter().map(|o| o.title.as_str()).collect();
    assert_eq!(titles, vec!["Beta", "Alpha"]);
}

#[test]
fn edit_propagates_to_resource_ref_referrers() {
    let catalog = new_catalog();
    let track = sample_track(&catalog, FS_ROOT_ID, "/m/t.mp3", "Original");

    let mut mirror = track.clone();
    mirror.id = -1;
    mirror.parent_id = ROOT_ID;
    mirror.ref_id = track.id;
    mirror.is_virtual = true;
    mirror.flags.set(ObjectFlags::USE_RESOURCE_REF);
    catalog.insert(&mut mirror).unwrap();

    let mut edited = catalog.load(track.id).unwrap();
    edited.title = "Renommé".to_string();
    edited.metadata.clear();
    edited.add_meta(MetaField::Title, "Renommé");
    catalog.update(&edited).unwrap();

    let mirrored = catalog.load(mirror.id).unwrap();
    assert_eq!(mirrored.title, "Renommé");
    assert_eq!(mirrored.meta(MetaField::Title), Some("Renommé"));
}

#[test]
fn autoscan_rows_round_trip() {
    let catalog = new_catalog();
    let mut adir = AutoscanDirectory::new("/media/musique", ScanMode::Inotify);
    adir.recursive = true;
    adir.persistent = true;
    adir.interval = Duration::from_secs(600);
    catalog.autoscan_save(&adir).unwrap();

    let listed = catalog.autoscan_list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].location, PathBuf::from("/media/musique"));
    assert_eq!(listed[0].scan_mode, ScanMode::Inotify);
    assert!(listed[0].recursive && listed[0].persistent);

    catalog.autoscan_touch(&adir.location, 12345).unwrap();
    assert_eq!(catalog.autoscan_list().unwrap()[0].last_scan, 12345);

    catalog.autoscan_remove(&adir.location).unwrap();
    assert!(catalog.autoscan_list().unwrap().is_empty());
}
