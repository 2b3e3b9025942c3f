//! Schéma SQLite et migrations.

use rusqlite::Connection;
use tracing::info;

/// Version courante du schéma.
pub const SCHEMA_VERSION: i64 = 1;

const CREATE_V1: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS objects (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_id     INTEGER NOT NULL,
    ref_id        INTEGER,
    object_type   INTEGER NOT NULL,
    title         TEXT NOT NULL,
    class         TEXT NOT NULL,
    location      TEXT,
    mime_type     TEXT,
    mtime         INTEGER NOT NULL DEFAULT 0,
    utime         INTEGER NOT NULL DEFAULT 0,
    size_on_disk  INTEGER NOT NULL DEFAULT 0,
    virtual       INTEGER NOT NULL DEFAULT 0,
    flags         INTEGER NOT NULL DEFAULT 1,
    sort_priority INTEGER NOT NULL DEFAULT 0,
    update_id     INTEGER NOT NULL DEFAULT 0,
    autoscan_type INTEGER NOT NULL DEFAULT 0,
    part_number   INTEGER NOT NULL DEFAULT 0,
    track_number  INTEGER NOT NULL DEFAULT 0,
    service_id    TEXT NOT NULL DEFAULT '',
    bookmark_pos  INTEGER NOT NULL DEFAULT 0,
    auxdata       TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_objects_parent ON objects (parent_id);
CREATE INDEX IF NOT EXISTS idx_objects_ref ON objects (ref_id);
CREATE INDEX IF NOT EXISTS idx_objects_location ON objects (location);

-- La localisation est unique pour les items physiques non virtuels ;
-- les entrées virtuelles partagent celle de leur source.
CREATE UNIQUE INDEX IF NOT EXISTS idx_objects_physical_location
    ON objects (location)
    WHERE object_type != 0 AND virtual = 0 AND location IS NOT NULL;

CREATE TABLE IF NOT EXISTS metadata (
    item_id INTEGER NOT NULL REFERENCES objects (id) ON DELETE CASCADE,
    seq     INTEGER NOT NULL,
    name    TEXT NOT NULL,
    value   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_metadata_item ON metadata (item_id);
CREATE INDEX IF NOT EXISTS idx_metadata_name ON metadata (name, value);

CREATE TABLE IF NOT EXISTS resources (
    item_id      INTEGER NOT NULL REFERENCES objects (id) ON DELETE CASCADE,
    res_id       INTEGER NOT NULL,
    handler_type INTEGER NOT NULL,
    attributes   TEXT NOT NULL DEFAULT '',
    parameters   TEXT NOT NULL DEFAULT '',
    options      TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (item_id, res_id)
);

CREATE TABLE IF NOT EXISTS autoscan (
    obj_id     INTEGER PRIMARY KEY,
    scan_mode  TEXT NOT NULL,
    location   TEXT NOT NULL UNIQUE,
    recursive  INTEGER NOT NULL DEFAULT 0,
    hidden     INTEGER NOT NULL DEFAULT 0,
    interval_s INTEGER NOT NULL DEFAULT 0,
    persistent INTEGER NOT NULL DEFAULT 0,
    last_scan  INTEGER NOT NULL DEFAULT 0
);
";

/// Applique les migrations manquantes.
///
/// La table `schema_version` contient une seule ligne ; une base vierge est
/// créée directement en dernière version.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CREATE_V1)?;

    let version: Option<i64> = conn
        .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    match version {
        None => {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [SCHEMA_VERSION],
            )?;
            info!(version = SCHEMA_VERSION, "catalog schema created");
        }
        Some(v) if v == SCHEMA_VERSION => {}
        Some(v) => {
            // Les migrations incrémentales s'insèrent ici au fil des versions.
            info!(from = v, to = SCHEMA_VERSION, "catalog schema migrated");
            conn.execute("UPDATE schema_version SET version = ?1", [SCHEMA_VERSION])?;
        }
    }
    Ok(())
}
