//! Configuration autoscan persistée.
//!
//! Chaque ligne attache une politique de surveillance à un répertoire :
//! mode (minuterie ou notifications noyau), récursivité, fichiers cachés,
//! intervalle et persistance. Le moteur de scan (`pmoscan`) consomme cette
//! collection et réécrit `last_scan` après chaque passage.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::params;

use pmocds::{ObjectId, INVALID_OBJECT_ID};

use crate::catalog::Catalog;
use crate::Result;

/// Mode de surveillance d'un répertoire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Rescan périodique piloté par minuterie.
    Timed,
    /// Notifications filesystem du noyau.
    Inotify,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Timed => "timed",
            ScanMode::Inotify => "inotify",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "timed" => Some(ScanMode::Timed),
            "inotify" => Some(ScanMode::Inotify),
            _ => None,
        }
    }
}

/// Un point de départ autoscan.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoscanDirectory {
    /// Id du container correspondant, `-1` tant qu'il n'est pas catalogué.
    pub object_id: ObjectId,
    pub scan_mode: ScanMode,
    pub location: PathBuf,
    pub recursive: bool,
    /// Inclure les fichiers cachés (dotfiles).
    pub hidden: bool,
    pub interval: Duration,
    /// Les points persistants survivent à la disparition du chemin : le
    /// moteur pose des veilles « non existant » et se réarme au retour.
    pub persistent: bool,
    /// Epoch du dernier scan complet, 0 si jamais scanné.
    pub last_scan: i64,
}

impl AutoscanDirectory {
    pub fn new(location: impl Into<PathBuf>, scan_mode: ScanMode) -> Self {
        AutoscanDirectory {
            object_id: INVALID_OBJECT_ID,
            scan_mode,
            location: location.into(),
            recursive: false,
            hidden: false,
            interval: Duration::from_secs(1800),
            persistent: false,
            last_scan: 0,
        }
    }
}

impl Catalog {
    /// Insère ou remplace la configuration d'un répertoire autoscan.
    pub fn autoscan_save(&self, adir: &AutoscanDirectory) -> Result<()> {
        let location = adir.location.to_string_lossy().into_owned();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO autoscan (obj_id, scan_mode, location, recursive, hidden,
                     interval_s, persistent, last_scan)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (location) DO UPDATE SET
                     obj_id = excluded.obj_id,
                     scan_mode = excluded.scan_mode,
                     recursive = excluded.recursive,
                     hidden = excluded.hidden,
                     interval_s = excluded.interval_s,
                     persistent = excluded.persistent,
                     last_scan = excluded.last_scan",
                params![
                    adir.object_id,
                    adir.scan_mode.as_str(),
                    location,
                    adir.recursive,
                    adir.hidden,
                    adir.interval.as_secs() as i64,
                    adir.persistent,
                    adir.last_scan,
                ],
            )?;
            Ok(())
        })
    }

    /// Toutes les configurations connues.
    pub fn autoscan_list(&self) -> Result<Vec<AutoscanDirectory>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT obj_id, scan_mode, location, recursive, hidden, interval_s,
                        persistent, last_scan
                 FROM autoscan ORDER BY location",
            )?;
            let rows = stmt.query_map([], |row| {
                let mode: String = row.get(1)?;
                let location: String = row.get(2)?;
                Ok(AutoscanDirectory {
                    object_id: row.get(0)?,
                    scan_mode: ScanMode::from_str(&mode).unwrap_or(ScanMode::Timed),
                    location: PathBuf::from(location),
                    recursive: row.get(3)?,
                    hidden: row.get(4)?,
                    interval: Duration::from_secs(row.get::<_, i64>(5)? as u64),
                    persistent: row.get(6)?,
                    last_scan: row.get(7)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Retire la configuration attachée à `location`.
    pub fn autoscan_remove(&self, location: &Path) -> Result<()> {
        let location = location.to_string_lossy().into_owned();
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM autoscan WHERE location = ?1",
                params![location],
            )?;
            Ok(())
        })
    }

    /// Réécrit l'epoch du dernier scan.
    pub fn autoscan_touch(&self, location: &Path, last_scan: i64) -> Result<()> {
        let location = location.to_string_lossy().into_owned();
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE autoscan SET last_scan = ?2 WHERE location = ?1",
                params![location, last_scan],
            )?;
            Ok(())
        })
    }
}
