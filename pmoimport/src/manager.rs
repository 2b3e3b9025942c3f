//! Orchestrateur d'import.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pmocatalog::{AutoscanDirectory, Catalog};
use pmocds::{
    CdsObject, ObjectFlags, ObjectId, FS_ROOT_ID, INVALID_OBJECT_ID, ROOT_ID,
    UPNP_CLASS_CONTAINER,
};
use pmohandlers::mime::classify_mime;
use pmohandlers::{HandlerRegistry, Mime};

use crate::pool::TaskPool;
use crate::transformer::{ImportTransformer, TransformerHost};
use crate::{ImportError, Result};

/// Options d'un import ou d'un rescan.
#[derive(Clone, Default)]
pub struct AutoScanSetting {
    /// Suivre les liens symboliques ; sinon les enfants liés sont ignorés.
    pub follow_symlinks: bool,
    /// Descendre dans les sous-répertoires.
    pub recursive: bool,
    /// Inclure les fichiers cachés.
    pub hidden: bool,
    /// Relancer les handlers même à mtime inchangé.
    pub rescan_resource: bool,
    /// Contexte autoscan, ou `None` pour un import ponctuel.
    pub adir: Option<AutoscanDirectory>,
}

impl AutoScanSetting {
    /// Réglages dérivés d'un répertoire autoscan.
    pub fn from_autoscan(adir: &AutoscanDirectory) -> Self {
        AutoScanSetting {
            follow_symlinks: true,
            recursive: adir.recursive,
            hidden: adir.hidden,
            rescan_resource: false,
            adir: Some(adir.clone()),
        }
    }
}

/// Pilote des imports : découverte, extraction, écriture, arbres virtuels.
pub struct ContentManager {
    catalog: Arc<Catalog>,
    registry: Arc<HandlerRegistry>,
    transformer: Option<Arc<dyn ImportTransformer>>,
    mime: Mime,
    pool: Mutex<TaskPool>,
    shutdown: CancellationToken,
}

fn epoch_secs(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn now_secs() -> i64 {
    epoch_secs(SystemTime::now())
}

impl ContentManager {
    /// # Arguments
    ///
    /// * `workers` - taille du pool de tâches ; 0 prend le nombre de cœurs
    pub fn new(
        catalog: Arc<Catalog>,
        registry: Arc<HandlerRegistry>,
        transformer: Option<Arc<dyn ImportTransformer>>,
        workers: usize,
    ) -> Self {
        let workers = if workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
        } else {
            workers
        };
        ContentManager {
            catalog,
            registry,
            transformer,
            mime: Mime::new(),
            pool: Mutex::new(TaskPool::new(workers)),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Importe un fichier ou un répertoire.
    ///
    /// En mode asynchrone la tâche part dans le pool (file basse priorité
    /// sur demande) et la fonction rend `-1` ; en mode synchrone elle rend
    /// l'id de l'objet importé.
    pub fn add_file(
        self: &Arc<Self>,
        path: &Path,
        setting: &AutoScanSetting,
        r#async: bool,
        low_priority: bool,
        cancellable: CancellationToken,
    ) -> Result<ObjectId> {
        if r#async {
            let manager = self.clone();
            let path = path.to_path_buf();
            let setting = setting.clone();
            self.pool.lock().unwrap().submit(low_priority, move || {
                if let Err(e) = manager.import_path(&path, &setting, &cancellable, true) {
                    warn!(path = %path.display(), error = %e, "import task failed");
                }
            })?;
            Ok(INVALID_OBJECT_ID)
        } else {
            self.import_path(path, setting, &cancellable, false)
        }
    }

    /// Rescan complet d'un répertoire autoscan : réimporte le contenu et
    /// purge du catalogue ce qui a disparu du disque.
    pub fn rescan_directory(
        self: &Arc<Self>,
        adir: &AutoscanDirectory,
        container_id: ObjectId,
        location: &Path,
        cancellable: &CancellationToken,
    ) -> Result<()> {
        info!(location = %location.display(), "rescanning directory");
        let setting = AutoScanSetting::from_autoscan(adir);
        self.import_path(location, &setting, cancellable, false)?;
        self.prune_vanished(container_id, cancellable)?;
        self.catalog.autoscan_touch(&adir.location, now_secs())?;
        Ok(())
    }

    /// Retire un objet (et son sous-arbre) du catalogue.
    pub fn remove_object(
        &self,
        adir: Option<&AutoscanDirectory>,
        id: ObjectId,
    ) -> Result<()> {
        debug!(
            id,
            autoscan = adir.map(|a| a.location.display().to_string()),
            "removing object"
        );
        self.catalog.remove_subtree(id, true)?;
        Ok(())
    }

    /// Garantit la chaîne de containers physiques menant à `path` et rend
    /// l'id du dernier maillon.
    pub fn ensure_path_existence(&self, path: &Path) -> Result<ObjectId> {
        let mut parent = FS_ROOT_ID;
        let mut partial = PathBuf::new();
        for component in path.components() {
            match component {
                Component::RootDir => partial.push("/"),
                Component::Normal(name) => {
                    partial.push(name);
                    match self.catalog.find_by_path(&partial, false)? {
                        Some(id) => parent = id,
                        None => {
                            let mut container =
                                CdsObject::container(name.to_string_lossy());
                            container.parent_id = parent;
                            container.location = partial.clone();
                            self.catalog.insert(&mut container)?;
                            parent = container.id;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(parent)
    }

    /// Garantit une chaîne de containers virtuels sous la racine CDS.
    ///
    /// Renvoie l'id du container terminal et un booléen indiquant si au
    /// moins un maillon a été créé.
    pub fn add_container_tree(&self, chain: Vec<CdsObject>) -> Result<(ObjectId, bool)> {
        let mut parent = ROOT_ID;
        let mut created = false;
        for mut node in chain {
            if !node.is_container() || node.title.is_empty() {
                warn!(title = %node.title, "skipping invalid link in container chain");
                continue;
            }
            match self.catalog.find_container(parent, &node.title)? {
                Some(id) => parent = id,
                None => {
                    node.parent_id = parent;
                    node.is_virtual = true;
                    if node.upnp_class.is_empty() {
                        node.upnp_class = UPNP_CLASS_CONTAINER.to_string();
                    }
                    self.catalog.insert(&mut node)?;
                    parent = node.id;
                    created = true;
                }
            }
        }
        Ok((parent, created))
    }

    /// Détache un point autoscan persistant dont le chemin a disparu :
    /// le sous-arbre catalogué part, la configuration reste.
    pub fn handle_persistent_autoscan_remove(&self, adir: &AutoscanDirectory) -> Result<()> {
        if let Some(id) = self.catalog.find_by_path(&adir.location, false)? {
            info!(location = %adir.location.display(), "persistent autoscan path vanished");
            self.catalog.remove_subtree(id, true)?;
        }
        Ok(())
    }

    /// Rattache un point autoscan persistant réapparu.
    pub fn handle_persistent_autoscan_recreate(
        &self,
        adir: &AutoscanDirectory,
    ) -> Result<ObjectId> {
        info!(location = %adir.location.display(), "persistent autoscan path is back");
        self.ensure_path_existence(&adir.location)
    }

    /// Arrêt ordonné : signal global, arrêt du transformateur, drain des
    /// files et jointure des travailleurs.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(transformer) = &self.transformer {
            transformer.shutdown();
        }
        self.pool.lock().unwrap().shutdown();
    }

    fn check_cancel(&self, cancellable: &CancellationToken) -> Result<()> {
        if self.shutdown.is_cancelled() || cancellable.is_cancelled() {
            return Err(ImportError::Shutdown);
        }
        Ok(())
    }

    fn import_path(
        self: &Arc<Self>,
        path: &Path,
        setting: &AutoScanSetting,
        cancellable: &CancellationToken,
        enqueue_children: bool,
    ) -> Result<ObjectId> {
        self.check_cancel(cancellable)?;

        let link_meta =
            fs::symlink_metadata(path).map_err(|e| ImportError::io(path, e))?;
        if link_meta.is_symlink() && !setting.follow_symlinks {
            debug!(path = %path.display(), "symlink skipped");
            return Ok(INVALID_OBJECT_ID);
        }
        let meta = fs::metadata(path).map_err(|e| ImportError::io(path, e))?;

        if !meta.is_dir() {
            return self.import_file(path, &meta, setting, cancellable);
        }

        let container_id = self.ensure_path_existence(path)?;
        // Les handlers de containers (illustrations de dossier) passent ici ;
        // update() ne touche l'update-id du parent que si quelque chose de
        // visible a changé
        if let Ok(mut container) = self.catalog.load(container_id) {
            self.registry.fill(&mut container);
            if let Err(e) = self.catalog.update(&container) {
                warn!(path = %path.display(), error = %e, "container refresh failed");
            }
        }
        let mut entries: Vec<PathBuf> = fs::read_dir(path)
            .map_err(|e| ImportError::io(path, e))?
            .flatten()
            .map(|e| e.path())
            .collect();
        entries.sort();

        for child in entries {
            // Point d'annulation à chaque frontière d'itération
            self.check_cancel(cancellable)?;

            let name = child
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !setting.hidden && name.starts_with('.') {
                continue;
            }
            let child_link = match fs::symlink_metadata(&child) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %child.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if child_link.is_symlink() && !setting.follow_symlinks {
                continue;
            }
            let is_dir = fs::metadata(&child).map(|m| m.is_dir()).unwrap_or(false);
            if is_dir && !setting.recursive {
                continue;
            }

            if enqueue_children {
                let manager = self.clone();
                let setting = setting.clone();
                let child_cancel = cancellable.child_token();
                self.pool.lock().unwrap().submit(false, move || {
                    if let Err(e) =
                        manager.import_path(&child, &setting, &child_cancel, true)
                    {
                        warn!(path = %child.display(), error = %e, "import task failed");
                    }
                })?;
            } else {
                match self.import_path(&child, setting, cancellable, false) {
                    Ok(_) => {}
                    Err(ImportError::Shutdown) => return Err(ImportError::Shutdown),
                    // Par fichier : on journalise et on continue
                    Err(e) => {
                        warn!(path = %child.display(), error = %e, "entry skipped")
                    }
                }
            }
        }
        Ok(container_id)
    }

    fn import_file(
        self: &Arc<Self>,
        path: &Path,
        meta: &fs::Metadata,
        setting: &AutoScanSetting,
        cancellable: &CancellationToken,
    ) -> Result<ObjectId> {
        let mtime = meta.modified().map(epoch_secs).unwrap_or(0);
        let existing = self.catalog.find_by_path(path, true)?;

        if let Some(id) = existing {
            let current = self.catalog.load(id)?;
            if current.mtime == mtime && !setting.rescan_resource {
                // Rescan sans changement : seul l'utime bouge
                self.catalog.touch_utime(id)?;
                return Ok(id);
            }
        }

        let mime = self.mime.probe(path, "application/octet-stream");
        let mut item = CdsObject::item(path, mime.clone());
        item.title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        item.upnp_class = classify_mime(&mime).to_string();
        item.mtime = mtime;
        item.size_on_disk = meta.len();

        self.check_cancel(cancellable)?;
        self.registry.fill(&mut item);

        let id = match existing {
            Some(id) => {
                item.id = id;
                self.catalog.update(&item)?;
                id
            }
            None => {
                let parent = match path.parent() {
                    Some(parent) => self.ensure_path_existence(parent)?,
                    None => FS_ROOT_ID,
                };
                item.parent_id = parent;
                self.catalog.insert(&mut item)?
            }
        };

        if let Some(transformer) = &self.transformer {
            let host = Host {
                manager: self.as_ref(),
                orig_id: id,
            };
            match transformer.import(&item, &host) {
                Ok(()) => {}
                Err(ImportError::Shutdown) => return Err(ImportError::Shutdown),
                // Une erreur du transformateur n'empoisonne pas le pipeline
                Err(e) => warn!(path = %path.display(), error = %e, "import transformer failed"),
            }
        }
        debug!(id, path = %path.display(), "file imported");
        Ok(id)
    }

    /// Retire du catalogue les objets physiques dont le fichier a disparu.
    fn prune_vanished(&self, container_id: ObjectId, cancellable: &CancellationToken) -> Result<()> {
        self.check_cancel(cancellable)?;
        let children = self.catalog.browse(container_id, 0, 0)?;
        for child in children.objects {
            if child.is_virtual {
                continue;
            }
            let location = child.location.clone();
            if !location.as_os_str().is_empty() && !location.exists() {
                info!(path = %location.display(), "pruning vanished entry");
                self.catalog.remove_subtree(child.id, true)?;
                continue;
            }
            if child.is_container() {
                self.prune_vanished(child.id, cancellable)?;
            }
        }
        Ok(())
    }
}

/// Callbacks liés à un import en cours.
struct Host<'a> {
    manager: &'a ContentManager,
    orig_id: ObjectId,
}

impl TransformerHost for Host<'_> {
    fn copy_object(&self, obj: &CdsObject) -> CdsObject {
        let mut copy = obj.clone();
        copy.id = INVALID_OBJECT_ID;
        copy
    }

    fn add_container_tree(&self, chain: Vec<CdsObject>) -> Result<ObjectId> {
        if self.manager.shutdown.is_cancelled() {
            return Err(ImportError::Shutdown);
        }
        self.manager.add_container_tree(chain).map(|(id, _)| id)
    }

    fn add_cds_object(&self, mut obj: CdsObject, parent_id: ObjectId) -> Result<ObjectId> {
        if self.manager.shutdown.is_cancelled() {
            return Err(ImportError::Shutdown);
        }
        obj.parent_id = parent_id;
        if obj.is_pure_item() {
            obj.ref_id = self.orig_id;
            obj.is_virtual = true;
            if !obj.flags.has(ObjectFlags::PLAYLIST_REF) {
                obj.flags.set(ObjectFlags::USE_RESOURCE_REF);
            }
        }
        Ok(self.manager.catalog.insert(&mut obj)?)
    }
}
