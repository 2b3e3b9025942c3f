//! Event-driven scanner.
//!
//! A single thread consumes notifier events in order and replays them
//! through the content manager: new files are imported (low-priority async
//! tasks), vanished ones removed, new directories under a recursive
//! autoscan get watches of their own. Persistent start points whose path
//! disappears are converted into "non-existing" watch chains on the closest
//! surviving ancestor, so the autoscan re-attaches when the path returns.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pmocatalog::AutoscanDirectory;
use pmoimport::{AutoScanSetting, ContentManager};

use crate::notifier::{mask, FsNotifier, WatchDescriptor, INVALID_WD};
use crate::watch::{Watch, WatchAutoscan, WdEntry};

#[derive(Default)]
struct Queues {
    monitor: VecDeque<AutoscanDirectory>,
    unmonitor: VecDeque<AutoscanDirectory>,
}

struct Shared {
    notifier: Arc<dyn FsNotifier>,
    queues: Mutex<Queues>,
    shutdown: CancellationToken,
}

/// Event-driven scanner handle.
pub struct EventScanner {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl EventScanner {
    /// Spawns the consumer thread.
    pub fn new(
        manager: Arc<ContentManager>,
        notifier: Arc<dyn FsNotifier>,
        follow_symlinks: bool,
    ) -> Self {
        let shared = Arc::new(Shared {
            notifier: notifier.clone(),
            queues: Mutex::new(Queues::default()),
            shutdown: CancellationToken::new(),
        });
        let engine_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("autoscan-events".to_string())
            .spawn(move || {
                let mut engine = Engine {
                    manager,
                    notifier,
                    shared: engine_shared,
                    watches: HashMap::new(),
                    follow_symlinks,
                };
                engine.run();
            })
            .expect("failed to spawn autoscan event thread");
        EventScanner {
            shared,
            thread: Some(thread),
        }
    }

    /// Requests monitoring of an autoscan directory.
    pub fn monitor(&self, adir: AutoscanDirectory) {
        debug!(location = %adir.location.display(), "monitor requested");
        self.shared.queues.lock().unwrap().monitor.push_back(adir);
        self.shared.notifier.poke();
    }

    /// Requests the removal of a (non-persistent) autoscan directory.
    pub fn unmonitor(&self, adir: AutoscanDirectory) {
        debug_assert!(!adir.persistent, "persistent autoscans are never unmonitored");
        debug!(location = %adir.location.display(), "unmonitor requested");
        self.shared.queues.lock().unwrap().unmonitor.push_back(adir);
        self.shared.notifier.poke();
    }

    /// Stops the consumer thread and joins it.
    pub fn shutdown(&mut self) {
        self.shared.shutdown.cancel();
        self.shared.notifier.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("autoscan event thread terminated by panic");
            }
        }
    }
}

impl Drop for EventScanner {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown();
        }
    }
}

struct Engine {
    manager: Arc<ContentManager>,
    notifier: Arc<dyn FsNotifier>,
    shared: Arc<Shared>,
    watches: HashMap<WatchDescriptor, WdEntry>,
    follow_symlinks: bool,
}

impl Engine {
    fn run(&mut self) {
        loop {
            if self.shared.shutdown.is_cancelled() {
                break;
            }
            self.process_queues();
            let Some(event) = self.notifier.next_event() else {
                break;
            };
            if event.wd == INVALID_WD {
                // Wake-up: loop back to drain the request queues
                continue;
            }
            self.handle_event(event.wd, event.mask, &event.name);
        }
        debug!("autoscan event loop stopped");
    }

    fn process_queues(&mut self) {
        loop {
            let (to_unmonitor, to_monitor) = {
                let mut queues = self.shared.queues.lock().unwrap();
                (
                    queues.unmonitor.pop_front(),
                    if queues.unmonitor.is_empty() {
                        queues.monitor.pop_front()
                    } else {
                        None
                    },
                )
            };
            match (to_unmonitor, to_monitor) {
                (Some(adir), _) => {
                    let location = adir.location.clone();
                    if adir.recursive {
                        self.monitor_unmonitor_recursive(&location, true, &adir, true);
                    } else {
                        self.unmonitor_directory(&location, &adir);
                    }
                }
                (None, Some(adir)) => self.start_monitoring(adir),
                (None, None) => break,
            }
        }
    }

    fn start_monitoring(&mut self, adir: AutoscanDirectory) {
        let location = adir.location.clone();
        if location.is_dir() {
            if adir.recursive {
                info!(location = %location.display(), "adding recursive watch");
                self.monitor_unmonitor_recursive(&location, false, &adir, true);
            } else {
                info!(location = %location.display(), "adding non-recursive watch");
                self.monitor_directory(&location, &adir, true, None);
            }
            match self.manager.ensure_path_existence(&location) {
                Ok(container_id) => {
                    if let Err(e) = self.manager.rescan_directory(
                        &adir,
                        container_id,
                        &location,
                        &self.shared.shutdown.child_token(),
                    ) {
                        warn!(location = %location.display(), error = %e, "initial rescan failed");
                    }
                }
                Err(e) => warn!(location = %location.display(), error = %e, "cannot catalog autoscan root"),
            }
        } else if adir.persistent {
            // The path will be picked up when it reappears
            self.monitor_nonexisting(&location, &adir);
        } else {
            warn!(location = %location.display(), "autoscan location unavailable");
        }
    }

    fn handle_event(&mut self, wd: WatchDescriptor, event_mask: u32, name: &str) {
        let Some(entry) = self.watches.get(&wd) else {
            let _ = self.notifier.remove_watch(wd);
            return;
        };
        let self_event = event_mask & (mask::DELETE_SELF | mask::MOVE_SELF | mask::UNMOUNT) != 0;
        let path = if self_event {
            entry.path.clone()
        } else {
            entry.path.join(name)
        };
        let adir = entry.appropriate_autoscan(&path).map(|a| a.adir.clone());
        debug!(wd, mask = event_mask, path = %path.display(), "fs event");

        if event_mask & mask::MOVE_SELF != 0 {
            self.check_move_watches(wd);
        }
        if self_event {
            self.recheck_nonexisting_monitors(wd);
        }

        if event_mask & mask::ISDIR != 0 {
            if event_mask & (mask::CREATE | mask::MOVED_TO) != 0 {
                self.recheck_nonexisting_monitors(wd);
            }
            if let Some(adir) = &adir {
                if adir.recursive && event_mask & mask::CREATE != 0 {
                    if adir.hidden || !name.starts_with('.') {
                        debug!(path = %path.display(), "new directory, extending watch");
                        self.monitor_unmonitor_recursive(&path, false, adir, false);
                    } else {
                        debug!(path = %path.display(), "new hidden directory ignored");
                    }
                }
            }
        }

        if let Some(adir) = adir {
            let changed = event_mask & mask::SCAN_EVENTS != 0;
            if changed {
                if event_mask & (mask::MOVED_TO | mask::CREATE) == 0 {
                    // Deletion side
                    if self_event {
                        if event_mask & mask::MOVE_SELF != 0 {
                            let _ = self.notifier.remove_watch(wd);
                        }
                        let start = self
                            .watches
                            .get(&wd)
                            .and_then(WdEntry::start_point)
                            .map(|w| w.adir.clone());
                        if let Some(sp_adir) = start {
                            if sp_adir.persistent {
                                self.monitor_nonexisting(&path, &sp_adir);
                                if let Err(e) =
                                    self.manager.handle_persistent_autoscan_remove(&sp_adir)
                                {
                                    warn!(error = %e, "persistent autoscan detach failed");
                                }
                            }
                        }
                    }
                    let items_only = event_mask & mask::ISDIR == 0;
                    match self.manager.catalog().find_by_path(&path, items_only) {
                        Ok(Some(id)) => {
                            if let Err(e) = self.manager.remove_object(Some(&adir), id) {
                                warn!(path = %path.display(), error = %e, "removal failed");
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!(path = %path.display(), error = %e, "path lookup failed"),
                    }
                }
                if event_mask & (mask::CLOSE_WRITE | mask::MOVED_TO | mask::CREATE) != 0 {
                    let mut setting = AutoScanSetting::from_autoscan(&adir);
                    setting.follow_symlinks = self.follow_symlinks;
                    setting.rescan_resource = true;
                    debug!(path = %path.display(), "importing changed entry");
                    if let Err(e) = self.manager.add_file(
                        &path,
                        &setting,
                        true,
                        true,
                        self.shared.shutdown.child_token(),
                    ) {
                        warn!(path = %path.display(), error = %e, "import dispatch failed");
                    }
                    if event_mask & mask::ISDIR != 0 {
                        self.monitor_unmonitor_recursive(&path, false, &adir, false);
                    }
                }
            }
        }

        if event_mask & mask::IGNORED != 0 {
            self.remove_watch_moves(wd);
            self.remove_descendants(wd);
            self.watches.remove(&wd);
        }
    }

    /// Watches one directory for `adir`. `nonexisting` marks a placeholder
    /// waiting for that full path to reappear.
    fn monitor_directory(
        &mut self,
        path: &Path,
        adir: &AutoscanDirectory,
        start_point: bool,
        nonexisting: Option<PathBuf>,
    ) -> Option<WatchDescriptor> {
        let wd = match self.notifier.add_watch(path, mask::SCAN_EVENTS) {
            Ok(wd) => wd,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "watch refused");
                if start_point && adir.persistent && nonexisting.is_none() {
                    self.monitor_nonexisting(path, adir);
                }
                return None;
            }
        };

        let parent_wd = if start_point && nonexisting.is_none() {
            self.watch_path_for_moves(path, wd)
        } else {
            INVALID_WD
        };

        let entry = self
            .watches
            .entry(wd)
            .or_insert_with(|| WdEntry::new(path.to_path_buf(), parent_wd));
        if entry.parent_wd < 0 && parent_wd >= 0 {
            entry.parent_wd = parent_wd;
        }
        let already = nonexisting.is_none() && entry.autoscan_for(adir).is_some();
        if !already {
            let register_descendant = !start_point && nonexisting.is_none();
            entry.watches.push(Watch::Autoscan(WatchAutoscan {
                start_point,
                adir: adir.clone(),
                nonexisting_path: nonexisting,
                descendants: Vec::new(),
            }));
            if register_descendant {
                if let Ok(start_wd) = self.notifier.add_watch(&adir.location, mask::SCAN_EVENTS) {
                    self.add_descendant(start_wd, wd, adir);
                }
            }
        }
        Some(wd)
    }

    fn unmonitor_directory(&mut self, path: &Path, adir: &AutoscanDirectory) {
        // add_watch resolves the path to its existing descriptor
        let Ok(wd) = self.notifier.add_watch(path, mask::SCAN_EVENTS) else {
            debug!(path = %path.display(), "unmonitor of an unwatched path");
            return;
        };
        let Some(entry) = self.watches.get_mut(&wd) else {
            return;
        };
        let Some(index) = entry.watches.iter().position(|w| {
            matches!(w, Watch::Autoscan(a)
                if a.nonexisting_path.is_none() && a.adir.location == adir.location)
        }) else {
            debug!(path = %path.display(), "autoscan not attached to this watch");
            return;
        };
        if entry.watches.len() == 1 {
            // The IGNORED event cleans the table
            let _ = self.notifier.remove_watch(wd);
        } else {
            entry.watches.remove(index);
        }
    }

    fn monitor_unmonitor_recursive(
        &mut self,
        path: &Path,
        unmonitor: bool,
        adir: &AutoscanDirectory,
        start_point: bool,
    ) {
        if unmonitor {
            self.unmonitor_directory(path, adir);
        } else if self.monitor_directory(path, adir, start_point, None).is_none() {
            return;
        }

        let Ok(entries) = std::fs::read_dir(path) else {
            return;
        };
        for entry in entries.flatten() {
            if self.shared.shutdown.is_cancelled() {
                break;
            }
            let child = entry.path();
            let Ok(link_meta) = std::fs::symlink_metadata(&child) else {
                continue;
            };
            if link_meta.is_symlink() && !self.follow_symlinks {
                debug!(path = %child.display(), "symlink skipped");
                continue;
            }
            if child.is_dir() && adir.recursive {
                self.monitor_unmonitor_recursive(&child, unmonitor, adir, false);
            }
        }
    }

    /// Move watches on every ancestor of a start point, each pointing back
    /// at the watched child.
    fn watch_path_for_moves(&mut self, path: &Path, wd: WatchDescriptor) -> WatchDescriptor {
        let components: Vec<_> = path.components().collect();
        let mut watch_path = PathBuf::new();
        let mut parent_wd = INVALID_WD;
        for component in components.iter().take(components.len().saturating_sub(1)) {
            watch_path.push(component.as_os_str());
            debug!(path = %watch_path.display(), "adding move watch");
            let ancestor = watch_path.clone();
            if let Some(new_wd) = self.add_move_watch(&ancestor, wd, parent_wd) {
                parent_wd = new_wd;
            }
        }
        parent_wd
    }

    fn add_move_watch(
        &mut self,
        path: &Path,
        remove_wd: WatchDescriptor,
        parent_wd: WatchDescriptor,
    ) -> Option<WatchDescriptor> {
        let wd = self.notifier.add_watch(path, mask::SCAN_EVENTS).ok()?;
        let entry = self
            .watches
            .entry(wd)
            .or_insert_with(|| WdEntry::new(path.to_path_buf(), parent_wd));
        if entry.parent_wd < 0 && parent_wd >= 0 {
            entry.parent_wd = parent_wd;
        }
        let duplicate = entry
            .watches
            .iter()
            .any(|w| matches!(w, Watch::Move { remove_wd: r } if *r == remove_wd));
        if !duplicate {
            entry.watches.push(Watch::Move { remove_wd });
        }
        Some(wd)
    }

    fn monitor_nonexisting(&mut self, path: &Path, adir: &AutoscanDirectory) {
        self.recheck_nonexisting(None, path, adir);
    }

    /// Walks from `target` towards the root and watches the deepest
    /// existing directory. When `target` itself is back, the autoscan is
    /// re-armed and a full rescan runs.
    fn recheck_nonexisting(
        &mut self,
        current_wd: Option<WatchDescriptor>,
        target: &Path,
        adir: &AutoscanDirectory,
    ) {
        let mut probe = Some(target.to_path_buf());
        let mut is_target = true;
        while let Some(path) = probe {
            if path.is_dir() {
                if let Some(wd) = current_wd {
                    self.remove_nonexisting_watch(wd, target);
                }
                if is_target {
                    info!(location = %target.display(), "autoscan path reappeared");
                    self.monitor_directory(&path, adir, true, None);
                    match self.manager.handle_persistent_autoscan_recreate(adir) {
                        Ok(container_id) => {
                            if let Err(e) = self.manager.rescan_directory(
                                adir,
                                container_id,
                                &path,
                                &self.shared.shutdown.child_token(),
                            ) {
                                warn!(error = %e, "rescan after reappearance failed");
                            }
                        }
                        Err(e) => warn!(error = %e, "autoscan re-attach failed"),
                    }
                } else {
                    debug!(
                        existing = %path.display(),
                        waiting_for = %target.display(),
                        "watching closest existing ancestor"
                    );
                    self.monitor_directory(&path, adir, false, Some(target.to_path_buf()));
                }
                return;
            }
            is_target = false;
            probe = path.parent().map(Path::to_path_buf);
        }
    }

    fn recheck_nonexisting_monitors(&mut self, wd: WatchDescriptor) {
        let pending: Vec<(PathBuf, AutoscanDirectory)> = self
            .watches
            .get(&wd)
            .map(|entry| {
                entry
                    .watches
                    .iter()
                    .filter_map(|w| match w {
                        Watch::Autoscan(a) => a
                            .nonexisting_path
                            .as_ref()
                            .map(|p| (p.clone(), a.adir.clone())),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        for (target, adir) in pending {
            self.recheck_nonexisting(Some(wd), &target, &adir);
        }
    }

    fn remove_nonexisting_watch(&mut self, wd: WatchDescriptor, target: &Path) {
        let Some(entry) = self.watches.get_mut(&wd) else {
            return;
        };
        let Some(index) = entry.watches.iter().position(|w| {
            matches!(w, Watch::Autoscan(a) if a.nonexisting_path.as_deref() == Some(target))
        }) else {
            return;
        };
        if entry.watches.len() == 1 {
            let _ = self.notifier.remove_watch(wd);
        } else {
            entry.watches.remove(index);
        }
    }

    /// An ancestor moved: the start points it tracks are gone from their
    /// catalogued paths.
    fn check_move_watches(&mut self, wd: WatchDescriptor) {
        let moved: Vec<WatchDescriptor> = self
            .watches
            .get_mut(&wd)
            .map(|entry| {
                let moved = entry
                    .watches
                    .iter()
                    .filter_map(|w| match w {
                        Watch::Move { remove_wd } => Some(*remove_wd),
                        _ => None,
                    })
                    .collect();
                entry.watches.retain(|w| !matches!(w, Watch::Move { .. }));
                moved
            })
            .unwrap_or_default();

        for remove_wd in moved {
            let Some(child_path) = self.watches.get(&remove_wd).map(|e| e.path.clone()) else {
                continue;
            };
            debug!(wd = remove_wd, path = %child_path.display(), "watched directory moved away");
            self.recheck_nonexisting_monitors(remove_wd);

            let start = self
                .watches
                .get(&remove_wd)
                .and_then(WdEntry::start_point)
                .map(|w| w.adir.clone());
            let _ = self.notifier.remove_watch(remove_wd);
            if let Some(adir) = start {
                if adir.persistent {
                    self.monitor_nonexisting(&child_path, &adir);
                    if let Err(e) = self.manager.handle_persistent_autoscan_remove(&adir) {
                        warn!(error = %e, "persistent autoscan detach failed");
                    }
                }
                if let Ok(Some(id)) = self.manager.catalog().find_by_path(&child_path, false) {
                    if let Err(e) = self.manager.remove_object(Some(&adir), id) {
                        warn!(error = %e, "removal after move failed");
                    }
                }
            }
        }
    }

    /// Cleans the move watches that point at a dying descriptor.
    fn remove_watch_moves(&mut self, wd: WatchDescriptor) {
        let mut check = self
            .watches
            .get(&wd)
            .map(|e| e.parent_wd)
            .unwrap_or(INVALID_WD);
        while check >= 0 {
            let Some(entry) = self.watches.get_mut(&check) else {
                break;
            };
            entry
                .watches
                .retain(|w| !matches!(w, Watch::Move { remove_wd } if *remove_wd == wd));
            let next = entry.parent_wd;
            if entry.watches.is_empty() {
                let _ = self.notifier.remove_watch(check);
            }
            check = next;
        }
    }

    fn add_descendant(
        &mut self,
        start_wd: WatchDescriptor,
        descendant: WatchDescriptor,
        adir: &AutoscanDirectory,
    ) {
        let Some(entry) = self.watches.get_mut(&start_wd) else {
            return;
        };
        for watch in &mut entry.watches {
            if let Watch::Autoscan(a) = watch {
                if a.nonexisting_path.is_none() && a.adir.location == adir.location {
                    if !a.descendants.contains(&descendant) {
                        a.descendants.push(descendant);
                    }
                    return;
                }
            }
        }
    }

    fn remove_descendants(&mut self, wd: WatchDescriptor) {
        let descendants: Vec<WatchDescriptor> = self
            .watches
            .get(&wd)
            .map(|entry| {
                entry
                    .watches
                    .iter()
                    .filter_map(|w| match w {
                        Watch::Autoscan(a) => Some(a.descendants.clone()),
                        _ => None,
                    })
                    .flatten()
                    .collect()
            })
            .unwrap_or_default();
        for descendant in descendants {
            let _ = self.notifier.remove_watch(descendant);
        }
    }
}
