//! Implémentation du catalogue sur SQLite.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use pmocds::{
    decode_dict, encode_dict, AutoscanType, CdsObject, CdsResource, ContainerInfo, HandlerType,
    ItemInfo, ObjectFlags, ObjectId, ObjectKind, FS_ROOT_ID, INVALID_OBJECT_ID, ROOT_ID,
    UPNP_CLASS_CONTAINER,
};
use pmosearch::{DefaultSqlEmitter, SearchParser, SortParser, TableColumnMapper};

use crate::schema;
use crate::{CatalogError, Result};

const OBJECT_COLUMNS: &str = "id, parent_id, ref_id, object_type, title, class, location, \
     mime_type, mtime, utime, size_on_disk, virtual, flags, sort_priority, update_id, \
     autoscan_type, part_number, track_number, service_id, bookmark_pos, auxdata";

const TYPE_CONTAINER: i64 = 0;
const TYPE_ITEM: i64 = 1;
const TYPE_EXTERNAL: i64 = 2;

/// Page de résultats d'un browse ou d'une recherche.
#[derive(Debug)]
pub struct BrowseResult {
    pub objects: Vec<CdsObject>,
    /// Nombre total d'objets satisfaisant la requête, pagination ignorée.
    pub total: u32,
}

/// Catalogue persistant.
///
/// Les écritures sont sérialisées par le mutex sur la connexion ; le mode
/// WAL donne aux lectures des instantanés cohérents.
#[derive(Debug)]
pub struct Catalog {
    conn: Mutex<Connection>,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn search_mapper() -> &'static std::sync::Arc<TableColumnMapper> {
    static MAPPER: OnceLock<std::sync::Arc<TableColumnMapper>> = OnceLock::new();
    MAPPER.get_or_init(|| {
        std::sync::Arc::new(TableColumnMapper::new(
            ("", ""),
            None,
            "name",
            "value",
            &[
                ("@id", "objects.id"),
                ("@refID", "ref_id"),
                ("last_updated", "utime"),
            ],
            &[("upnp:class", "class")],
            &[
                ("dc:title", "title"),
                ("upnp:class", "class"),
                ("upnp:originalTrackNumber", "track_number"),
                ("last_updated", "utime"),
                ("id", "id"),
            ],
        ))
    })
}

impl Catalog {
    /// Ouvre (ou crée) le catalogue au chemin donné.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::setup(conn)
    }

    /// Catalogue en mémoire, pour les tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::setup(Connection::open_in_memory()?)
    }

    fn setup(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::migrate(&conn)?;
        Self::ensure_roots(&conn)?;
        Ok(Catalog {
            conn: Mutex::new(conn),
        })
    }

    /// Crée les deux racines réservées si elles manquent.
    fn ensure_roots(conn: &Connection) -> Result<()> {
        let restricted = ObjectFlags::RESTRICTED | ObjectFlags::SEARCHABLE;
        conn.execute(
            "INSERT OR IGNORE INTO objects
                 (id, parent_id, object_type, title, class, flags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ROOT_ID,
                INVALID_OBJECT_ID,
                TYPE_CONTAINER,
                "Root",
                UPNP_CLASS_CONTAINER,
                restricted
            ],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO objects
                 (id, parent_id, object_type, title, class, flags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                FS_ROOT_ID,
                ROOT_ID,
                TYPE_CONTAINER,
                "Filesystem",
                UPNP_CLASS_CONTAINER,
                restricted
            ],
        )?;
        Ok(())
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock().unwrap();
        f(&mut conn)
    }

    /// Insère un objet et renvoie son id.
    ///
    /// L'insertion est transactionnelle : ligne objet, métadonnées,
    /// ressources et incrément de l'update-id du parent. `obj` reçoit son id
    /// et son utime.
    pub fn insert(&self, obj: &mut CdsObject) -> Result<ObjectId> {
        obj.validate()?;
        let utime = now_secs();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        insert_object_row(&tx, obj, utime)?;
        let id = tx.last_insert_rowid() as ObjectId;
        write_metadata(&tx, id, &obj.metadata)?;
        write_resources(&tx, id, &obj.resources)?;
        bump_update_id(&tx, obj.parent_id)?;

        tx.commit()?;
        obj.id = id;
        obj.utime = utime;
        debug!(id, parent = obj.parent_id, title = %obj.title, "object inserted");
        Ok(id)
    }

    /// Charge un objet complet.
    ///
    /// # Errors
    ///
    /// [`CatalogError::NotFound`] si l'id est inconnu.
    pub fn load(&self, id: ObjectId) -> Result<CdsObject> {
        let conn = self.conn.lock().unwrap();
        load_object(&conn, id)
    }

    /// Résout un chemin vers l'id de l'objet physique correspondant.
    ///
    /// Renvoie `None` si le chemin n'est pas catalogué. Les objets virtuels
    /// sont ignorés : eux partagent la localisation de leur source.
    pub fn find_by_path(&self, path: &Path, items_only: bool) -> Result<Option<ObjectId>> {
        let conn = self.conn.lock().unwrap();
        let location = path.to_string_lossy();
        let sql = if items_only {
            "SELECT id FROM objects
             WHERE location = ?1 AND virtual = 0 AND object_type != 0 LIMIT 1"
        } else {
            "SELECT id FROM objects WHERE location = ?1 AND virtual = 0 LIMIT 1"
        };
        Ok(conn
            .query_row(sql, params![location.as_ref()], |row| row.get(0))
            .optional()?)
    }

    /// Cherche un container enfant direct par titre, pour la construction
    /// des chaînes virtuelles.
    pub fn find_container(&self, parent_id: ObjectId, title: &str) -> Result<Option<ObjectId>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT id FROM objects
                 WHERE parent_id = ?1 AND title = ?2 AND object_type = 0 LIMIT 1",
                params![parent_id, title],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Met à jour un objet existant.
    ///
    /// L'id et le rattachement au parent sont préservés. L'update-id du
    /// parent n'est incrémenté que si un champ visible en DIDL-Lite a changé ;
    /// dans ce cas les référents porteurs de `USE_RESOURCE_REF` reçoivent
    /// titre, classe et métadonnées.
    pub fn update(&self, obj: &CdsObject) -> Result<()> {
        obj.validate()?;
        let mut conn = self.conn.lock().unwrap();
        let existing = load_object(&conn, obj.id)?;
        let didl_changed = !existing.equals(obj, false);
        let utime = now_secs();

        let tx = conn.transaction()?;
        update_object_row(&tx, obj, utime)?;
        tx.execute("DELETE FROM metadata WHERE item_id = ?1", params![obj.id])?;
        tx.execute("DELETE FROM resources WHERE item_id = ?1", params![obj.id])?;
        write_metadata(&tx, obj.id, &obj.metadata)?;
        write_resources(&tx, obj.id, &obj.resources)?;

        if didl_changed {
            bump_update_id(&tx, existing.parent_id)?;
            propagate_to_referrers(&tx, obj)?;
        }
        tx.commit()?;
        debug!(id = obj.id, didl_changed, "object updated");
        Ok(())
    }

    /// Supprime le sous-arbre enraciné en `id`.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::Protected`] pour les racines réservées
    /// - [`CatalogError::InUse`] si `allow_refs` est faux et qu'un référent
    ///   hors du sous-arbre existe (hors référents playlist, autorisés à
    ///   rester en suspens et réparés à l'import suivant)
    pub fn remove_subtree(&self, id: ObjectId, allow_refs: bool) -> Result<()> {
        if id == ROOT_ID || id == FS_ROOT_ID {
            return Err(CatalogError::Protected(id));
        }
        let mut conn = self.conn.lock().unwrap();
        // Vérifie l'existence avant d'ouvrir la transaction
        load_row_type(&conn, id)?;

        let tx = conn.transaction()?;
        tx.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS removal (id INTEGER PRIMARY KEY);
             DELETE FROM removal;",
        )?;
        tx.execute(
            "INSERT INTO removal
             WITH RECURSIVE subtree(sid) AS (
                 SELECT ?1
                 UNION
                 SELECT o.id FROM objects o JOIN subtree s ON o.parent_id = s.sid
             )
             SELECT sid FROM subtree",
            params![id],
        )?;

        // Clôture des référents : un objet virtuel pointant dans le
        // sous-arbre tombe avec lui, sauf les référents playlist.
        loop {
            let outside: Vec<(ObjectId, u32)> = {
                let mut stmt = tx.prepare(
                    "SELECT id, flags FROM objects
                     WHERE ref_id IN (SELECT id FROM removal)
                       AND id NOT IN (SELECT id FROM removal)",
                )?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect::<rusqlite::Result<_>>()?
            };
            let cascading: Vec<ObjectId> = outside
                .iter()
                .filter(|(_, flags)| flags & ObjectFlags::PLAYLIST_REF == 0)
                .map(|(rid, _)| *rid)
                .collect();
            if cascading.is_empty() {
                break;
            }
            if !allow_refs {
                tx.execute("DROP TABLE removal", [])?;
                tx.commit()?;
                return Err(CatalogError::InUse(cascading[0]));
            }
            for rid in cascading {
                tx.execute("INSERT OR IGNORE INTO removal VALUES (?1)", params![rid])?;
            }
        }

        // Parents survivants dont le contenu change
        let parents: Vec<ObjectId> = {
            let mut stmt = tx.prepare(
                "SELECT DISTINCT parent_id FROM objects
                 WHERE id IN (SELECT id FROM removal)
                   AND parent_id NOT IN (SELECT id FROM removal)",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let removed = tx.execute(
            "DELETE FROM objects WHERE id IN (SELECT id FROM removal)",
            [],
        )?;
        tx.execute(
            "DELETE FROM autoscan WHERE obj_id IN (SELECT id FROM removal)",
            [],
        )?;
        for parent in parents {
            bump_update_id(&tx, parent)?;
        }
        tx.execute("DROP TABLE removal", [])?;
        tx.commit()?;
        info!(root = id, removed, "subtree removed");
        Ok(())
    }

    /// Liste les enfants directs d'un container.
    ///
    /// Tri : `sort_priority`, puis titre replié en casse, puis id comme
    /// départage stable. `count == 0` signifie « tout ».
    pub fn browse(&self, parent_id: ObjectId, offset: u32, count: u32) -> Result<BrowseResult> {
        let conn = self.conn.lock().unwrap();
        let total: u32 = conn.query_row(
            "SELECT COUNT(*) FROM objects WHERE parent_id = ?1",
            params![parent_id],
            |row| row.get(0),
        )?;

        let limit = if count == 0 { -1 } else { count as i64 };
        let ids: Vec<ObjectId> = {
            let mut stmt = conn.prepare(
                "SELECT id FROM objects WHERE parent_id = ?1
                 ORDER BY sort_priority, LOWER(title), id
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt.query_map(params![parent_id, limit, offset], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let objects = ids
            .into_iter()
            .map(|id| load_object(&conn, id))
            .collect::<Result<Vec<_>>>()?;
        Ok(BrowseResult { objects, total })
    }

    /// Recherche dans les descendants de `container_id`.
    ///
    /// `expr` est compilé par `pmosearch` ; `sort` suit la forme
    /// `+col1,-col2`. Le container lui-même est exclu des résultats.
    pub fn search(
        &self,
        container_id: ObjectId,
        expr: &str,
        sort: &str,
        offset: u32,
        count: u32,
    ) -> Result<BrowseResult> {
        let mapper = search_mapper().clone();
        let emitter = DefaultSqlEmitter::new(mapper.clone());
        let predicate = SearchParser::new(&emitter, expr)?.parse()?;
        let sort_criteria = SortParser::new(mapper).parse(sort);
        let order_by = if sort_criteria.is_empty() {
            "sort_priority, LOWER(title), id".to_string()
        } else {
            format!("{}, id", sort_criteria.to_sql())
        };

        let matching = format!(
            "SELECT DISTINCT objects.id FROM objects
             LEFT JOIN metadata ON metadata.item_id = objects.id
             WHERE objects.id IN (
                 WITH RECURSIVE subtree(sid) AS (
                     SELECT ?1
                     UNION
                     SELECT o.id FROM objects o JOIN subtree s ON o.parent_id = s.sid
                 )
                 SELECT sid FROM subtree
             )
             AND objects.id != ?1
             AND ({predicate})"
        );

        let conn = self.conn.lock().unwrap();
        let total: u32 = conn.query_row(
            &format!("SELECT COUNT(*) FROM ({matching})"),
            params![container_id],
            |row| row.get(0),
        )?;

        let limit = if count == 0 { -1 } else { count as i64 };
        let page = format!(
            "SELECT id FROM objects WHERE id IN ({matching})
             ORDER BY {order_by} LIMIT ?2 OFFSET ?3"
        );
        let ids: Vec<ObjectId> = {
            let mut stmt = conn.prepare(&page)?;
            let rows = stmt.query_map(params![container_id, limit, offset], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        let objects = ids
            .into_iter()
            .map(|id| load_object(&conn, id))
            .collect::<Result<Vec<_>>>()?;
        Ok(BrowseResult { objects, total })
    }

    /// Incrémente l'update-id d'un container et renvoie la nouvelle valeur.
    pub fn increment_update_id(&self, container_id: ObjectId) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE objects SET update_id = update_id + 1
             WHERE id = ?1 AND object_type = 0",
            params![container_id],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(container_id));
        }
        Ok(conn.query_row(
            "SELECT update_id FROM objects WHERE id = ?1",
            params![container_id],
            |row| row.get(0),
        )?)
    }

    /// Instantané `id -> update_id` de tous les containers, pour la
    /// production des trames LastChange.
    pub fn snapshot_update_ids(&self) -> Result<HashMap<ObjectId, u32>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, update_id FROM objects WHERE object_type = 0")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Ne touche que l'utime, pour les rescans sans changement de mtime.
    pub fn touch_utime(&self, id: ObjectId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE objects SET utime = ?1 WHERE id = ?2",
            params![now_secs(), id],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(id));
        }
        Ok(())
    }

    /// Mémorise la position de lecture d'un item, en millisecondes.
    pub fn set_bookmark_pos(&self, id: ObjectId, pos_ms: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE objects SET bookmark_pos = ?1 WHERE id = ?2 AND object_type != 0",
            params![pos_ms as i64, id],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(id));
        }
        Ok(())
    }
}

fn location_param(obj: &CdsObject) -> Option<String> {
    if obj.location.as_os_str().is_empty() {
        None
    } else {
        Some(obj.location.to_string_lossy().into_owned())
    }
}

fn object_type(obj: &CdsObject) -> i64 {
    match obj.kind {
        ObjectKind::Container(_) => TYPE_CONTAINER,
        ObjectKind::Item(_) => TYPE_ITEM,
        ObjectKind::ExternalItem(_) => TYPE_EXTERNAL,
    }
}

fn autoscan_type_code(t: AutoscanType) -> i64 {
    match t {
        AutoscanType::None => 0,
        AutoscanType::Ui => 1,
        AutoscanType::Config => 2,
    }
}

fn autoscan_type_from(code: i64) -> AutoscanType {
    match code {
        1 => AutoscanType::Ui,
        2 => AutoscanType::Config,
        _ => AutoscanType::None,
    }
}

fn insert_object_row(conn: &Connection, obj: &CdsObject, utime: i64) -> Result<()> {
    let item = obj.item_info();
    conn.execute(
        "INSERT INTO objects (parent_id, ref_id, object_type, title, class, location,
             mime_type, mtime, utime, size_on_disk, virtual, flags, sort_priority,
             update_id, autoscan_type, part_number, track_number, service_id,
             bookmark_pos, auxdata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
             ?16, ?17, ?18, ?19, ?20)",
        params![
            obj.parent_id,
            (obj.ref_id != INVALID_OBJECT_ID).then_some(obj.ref_id),
            object_type(obj),
            obj.title,
            obj.upnp_class,
            location_param(obj),
            item.map(|i| i.mime_type.as_str()),
            obj.mtime,
            utime,
            obj.size_on_disk as i64,
            obj.is_virtual,
            obj.flags.0,
            obj.sort_priority,
            obj.container_info().map_or(0, |c| c.update_id),
            autoscan_type_code(
                obj.container_info()
                    .map_or(AutoscanType::None, |c| c.autoscan_type)
            ),
            item.map_or(0, |i| i.part_number),
            item.map_or(0, |i| i.track_number),
            item.map_or("", |i| i.service_id.as_str()),
            item.map_or(0, |i| i.bookmark_pos_ms as i64),
            encode_dict(&obj.auxdata),
        ],
    )?;
    Ok(())
}

fn update_object_row(conn: &Connection, obj: &CdsObject, utime: i64) -> Result<()> {
    let item = obj.item_info();
    // L'id, le parent et le compteur update_id restent propriété du catalogue.
    conn.execute(
        "UPDATE objects SET ref_id = ?2, title = ?3, class = ?4, location = ?5,
             mime_type = ?6, mtime = ?7, utime = ?8, size_on_disk = ?9, virtual = ?10,
             flags = ?11, sort_priority = ?12, autoscan_type = ?13, part_number = ?14,
             track_number = ?15, service_id = ?16, bookmark_pos = ?17, auxdata = ?18
         WHERE id = ?1",
        params![
            obj.id,
            (obj.ref_id != INVALID_OBJECT_ID).then_some(obj.ref_id),
            obj.title,
            obj.upnp_class,
            location_param(obj),
            item.map(|i| i.mime_type.as_str()),
            obj.mtime,
            utime,
            obj.size_on_disk as i64,
            obj.is_virtual,
            obj.flags.0,
            obj.sort_priority,
            autoscan_type_code(
                obj.container_info()
                    .map_or(AutoscanType::None, |c| c.autoscan_type)
            ),
            item.map_or(0, |i| i.part_number),
            item.map_or(0, |i| i.track_number),
            item.map_or("", |i| i.service_id.as_str()),
            item.map_or(0, |i| i.bookmark_pos_ms as i64),
            encode_dict(&obj.auxdata),
        ],
    )?;
    Ok(())
}

fn write_metadata(conn: &Connection, id: ObjectId, metadata: &[(String, String)]) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO metadata (item_id, seq, name, value) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (seq, (name, value)) in metadata.iter().enumerate() {
        stmt.execute(params![id, seq as i64, name, value])?;
    }
    Ok(())
}

fn write_resources(conn: &Connection, id: ObjectId, resources: &[CdsResource]) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO resources (item_id, res_id, handler_type, attributes, parameters, options)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (res_id, res) in resources.iter().enumerate() {
        stmt.execute(params![
            id,
            res_id as i64,
            res.handler.tag(),
            encode_dict(&res.attributes),
            encode_dict(&res.parameters),
            encode_dict(&res.options),
        ])?;
    }
    Ok(())
}

fn bump_update_id(conn: &Connection, container_id: ObjectId) -> Result<()> {
    if container_id == INVALID_OBJECT_ID {
        return Ok(());
    }
    conn.execute(
        "UPDATE objects SET update_id = update_id + 1
         WHERE id = ?1 AND object_type = 0",
        params![container_id],
    )?;
    Ok(())
}

/// Recopie titre, classe et métadonnées vers les référents `USE_RESOURCE_REF`.
fn propagate_to_referrers(conn: &Connection, obj: &CdsObject) -> Result<()> {
    let referrers: Vec<ObjectId> = {
        let mut stmt = conn.prepare(
            "SELECT id FROM objects WHERE ref_id = ?1 AND (flags & ?2) != 0",
        )?;
        let rows = stmt.query_map(params![obj.id, ObjectFlags::USE_RESOURCE_REF], |row| {
            row.get(0)
        })?;
        rows.collect::<rusqlite::Result<_>>()?
    };
    for rid in referrers {
        conn.execute(
            "UPDATE objects SET title = ?2, class = ?3 WHERE id = ?1",
            params![rid, obj.title, obj.upnp_class],
        )?;
        conn.execute("DELETE FROM metadata WHERE item_id = ?1", params![rid])?;
        write_metadata(conn, rid, &obj.metadata)?;
    }
    Ok(())
}

fn load_row_type(conn: &Connection, id: ObjectId) -> Result<i64> {
    conn.query_row(
        "SELECT object_type FROM objects WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(CatalogError::NotFound(id))
}

pub(crate) fn load_object(conn: &Connection, id: ObjectId) -> Result<CdsObject> {
    let mut obj = conn
        .query_row(
            &format!("SELECT {OBJECT_COLUMNS} FROM objects WHERE id = ?1"),
            params![id],
            object_from_row,
        )
        .optional()?
        .ok_or(CatalogError::NotFound(id))?;

    let mut stmt = conn.prepare_cached(
        "SELECT name, value FROM metadata WHERE item_id = ?1 ORDER BY seq",
    )?;
    let rows = stmt.query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?;
    obj.metadata = rows.collect::<rusqlite::Result<_>>()?;

    let mut stmt = conn.prepare_cached(
        "SELECT handler_type, attributes, parameters, options
         FROM resources WHERE item_id = ?1 ORDER BY res_id",
    )?;
    let rows = stmt.query_map(params![id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;
    for row in rows {
        let (tag, attributes, parameters, options) = row?;
        let handler = HandlerType::from_tag(tag as i32).ok_or_else(|| {
            CatalogError::InvalidObject(pmocds::ObjectError::ResourceParse(format!(
                "unknown handler tag {tag} stored for object {id}"
            )))
        })?;
        let mut res = CdsResource::new(handler);
        res.attributes = decode_dict(&attributes)?;
        res.parameters = decode_dict(&parameters)?;
        res.options = decode_dict(&options)?;
        obj.resources.push(res);
    }

    if let Some(info) = obj.container_info_mut() {
        info.child_count = Some(conn.query_row(
            "SELECT COUNT(*) FROM objects WHERE parent_id = ?1",
            params![id],
            |row| row.get(0),
        )?);
    }
    Ok(obj)
}

fn object_from_row(row: &Row) -> rusqlite::Result<CdsObject> {
    let object_type: i64 = row.get(3)?;
    let kind = match object_type {
        TYPE_CONTAINER => ObjectKind::Container(ContainerInfo {
            update_id: row.get(14)?,
            child_count: None,
            autoscan_type: autoscan_type_from(row.get(15)?),
        }),
        _ => {
            let info = ItemInfo {
                mime_type: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                part_number: row.get(16)?,
                track_number: row.get(17)?,
                service_id: row.get(18)?,
                bookmark_pos_ms: row.get::<_, i64>(19)? as u64,
            };
            if object_type == TYPE_EXTERNAL {
                ObjectKind::ExternalItem(info)
            } else {
                ObjectKind::Item(info)
            }
        }
    };

    let mut obj = CdsObject::container("");
    obj.kind = kind;
    obj.id = row.get(0)?;
    obj.parent_id = row.get(1)?;
    obj.ref_id = row
        .get::<_, Option<ObjectId>>(2)?
        .unwrap_or(INVALID_OBJECT_ID);
    obj.title = row.get(4)?;
    obj.upnp_class = row.get(5)?;
    obj.location = row
        .get::<_, Option<String>>(6)?
        .map(PathBuf::from)
        .unwrap_or_default();
    obj.mtime = row.get(8)?;
    obj.utime = row.get(9)?;
    obj.size_on_disk = row.get::<_, i64>(10)? as u64;
    obj.is_virtual = row.get(11)?;
    obj.flags = ObjectFlags(row.get(12)?);
    obj.sort_priority = row.get(13)?;
    let auxdata: String = row.get(20)?;
    obj.auxdata = decode_dict(&auxdata).unwrap_or_else(|_| BTreeMap::new());
    Ok(obj)
}
