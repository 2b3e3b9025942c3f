//! [`FsNotifier`] implementation over the `notify` crate.
//!
//! One non-recursive OS watch per directory; events arrive on the watcher's
//! callback thread, get translated into inotify-style `(wd, mask, name)`
//! tuples against the path table, and are queued for the single consumer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};
use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::notifier::{mask, FsEvent, FsNotifier, WatchDescriptor};
use crate::{Result, ScanError};

enum Message {
    Event(FsEvent),
    Wake,
    Stop,
}

#[derive(Default)]
struct PathTable {
    by_wd: HashMap<WatchDescriptor, PathBuf>,
    by_path: HashMap<PathBuf, WatchDescriptor>,
}

/// Production notifier backed by `notify::RecommendedWatcher`.
pub struct NotifyBackend {
    watcher: Mutex<RecommendedWatcher>,
    table: Arc<Mutex<PathTable>>,
    next_wd: AtomicI32,
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl NotifyBackend {
    pub fn new() -> Result<Self> {
        let (tx, rx) = unbounded();
        let table: Arc<Mutex<PathTable>> = Arc::new(Mutex::new(PathTable::default()));

        let callback_tx = tx.clone();
        let callback_table = table.clone();
        let watcher = RecommendedWatcher::new(
            move |outcome: notify::Result<notify::Event>| match outcome {
                Ok(event) => {
                    for fs_event in translate(&event, &callback_table) {
                        let _ = callback_tx.send(Message::Event(fs_event));
                    }
                }
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            },
            Config::default(),
        )
        .map_err(|e| ScanError::Notifier {
            path: PathBuf::new(),
            msg: e.to_string(),
        })?;

        Ok(NotifyBackend {
            watcher: Mutex::new(watcher),
            table,
            next_wd: AtomicI32::new(1),
            tx,
            rx,
        })
    }
}

impl FsNotifier for NotifyBackend {
    fn add_watch(&self, path: &Path, _event_mask: u32) -> Result<WatchDescriptor> {
        let mut table = self.table.lock().unwrap();
        if let Some(wd) = table.by_path.get(path) {
            return Ok(*wd);
        }
        self.watcher
            .lock()
            .unwrap()
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| ScanError::Notifier {
                path: path.to_path_buf(),
                msg: e.to_string(),
            })?;
        let wd = self.next_wd.fetch_add(1, Ordering::SeqCst);
        table.by_wd.insert(wd, path.to_path_buf());
        table.by_path.insert(path.to_path_buf(), wd);
        debug!(wd, path = %path.display(), "watch added");
        Ok(wd)
    }

    fn remove_watch(&self, wd: WatchDescriptor) -> Result<()> {
        let path = {
            let mut table = self.table.lock().unwrap();
            let Some(path) = table.by_wd.remove(&wd) else {
                return Ok(());
            };
            table.by_path.remove(&path);
            path
        };
        // L'échec d'unwatch est attendu si le répertoire a déjà disparu
        if let Err(e) = self.watcher.lock().unwrap().unwatch(&path) {
            debug!(path = %path.display(), error = %e, "unwatch failed");
        }
        let _ = self.tx.send(Message::Event(FsEvent {
            wd,
            mask: mask::IGNORED,
            name: String::new(),
        }));
        Ok(())
    }

    fn next_event(&self) -> Option<FsEvent> {
        loop {
            match self.rx.recv().ok()? {
                Message::Event(event) => return Some(event),
                Message::Wake => return Some(FsEvent::wakeup()),
                Message::Stop => return None,
            }
        }
    }

    fn poke(&self) {
        let _ = self.tx.send(Message::Wake);
    }

    fn stop(&self) {
        let _ = self.tx.send(Message::Stop);
    }
}

/// Translates one `notify` event into inotify-style tuples.
fn translate(event: &notify::Event, table: &Mutex<PathTable>) -> Vec<FsEvent> {
    let table = table.lock().unwrap();
    let mut out = Vec::new();

    let mut push = |path: &Path, event_mask: u32| {
        let is_dir = path.is_dir();
        // Événement rapporté au répertoire parent surveillé
        if let Some(parent) = path.parent() {
            if let Some(wd) = table.by_path.get(parent) {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                out.push(FsEvent {
                    wd: *wd,
                    mask: if is_dir {
                        event_mask | mask::ISDIR
                    } else {
                        event_mask
                    },
                    name,
                });
            }
        }
        // Événement « self » si le chemin est lui-même surveillé
        if let Some(wd) = table.by_path.get(path) {
            let self_mask = match event_mask {
                m if m & mask::DELETE != 0 => Some(mask::DELETE_SELF),
                m if m & mask::MOVED_FROM != 0 => Some(mask::MOVE_SELF),
                _ => None,
            };
            if let Some(self_mask) = self_mask {
                out.push(FsEvent {
                    wd: *wd,
                    mask: self_mask | mask::ISDIR,
                    name: String::new(),
                });
            }
        }
    };

    match &event.kind {
        EventKind::Create(kind) => {
            let extra = matches!(kind, CreateKind::Folder)
                .then_some(mask::ISDIR)
                .unwrap_or(0);
            for path in &event.paths {
                push(path, mask::CREATE | extra);
            }
        }
        EventKind::Remove(kind) => {
            let extra = matches!(kind, RemoveKind::Folder)
                .then_some(mask::ISDIR)
                .unwrap_or(0);
            for path in &event.paths {
                push(path, mask::DELETE | extra);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            for path in &event.paths {
                push(path, mask::MOVED_FROM);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in &event.paths {
                push(path, mask::MOVED_TO);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = event.paths.as_slice() {
                push(from, mask::MOVED_FROM);
                push(to, mask::MOVED_TO);
            }
        }
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
            for path in &event.paths {
                push(path, mask::CLOSE_WRITE);
            }
        }
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            // Les backends sans close-write remontent une modification
            for path in &event.paths {
                if path.is_file() {
                    push(path, mask::CLOSE_WRITE);
                }
            }
        }
        _ => {}
    }
    out
}
