//! Event-scanner scenarios driven by a scripted notifier.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use pmocatalog::{AutoscanDirectory, Catalog, ScanMode};
use pmocds::ObjectId;
use pmohandlers::file::DefaultHandler;
use pmohandlers::HandlerRegistry;
use pmoimport::ContentManager;
use pmoscan::{mask, EventScanner, FsEvent, FsNotifier, WatchDescriptor};

enum Message {
    Event(FsEvent),
    Wake,
    Stop,
}

#[derive(Default)]
struct MockState {
    next_wd: WatchDescriptor,
    by_path: HashMap<PathBuf, WatchDescriptor>,
    by_wd: HashMap<WatchDescriptor, PathBuf>,
}

/// Notifier scripté : les veilles réussissent si le chemin existe, les
/// événements sont injectés par le test.
struct MockNotifier {
    state: Mutex<MockState>,
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl MockNotifier {
    fn new() -> Arc<Self> {
        let (tx, rx) = unbounded();
        Arc::new(MockNotifier {
            state: Mutex::new(MockState::default()),
            tx,
            rx,
        })
    }

    fn wd_of(&self, path: &Path) -> Option<WatchDescriptor> {
        self.state.lock().unwrap().by_path.get(path).copied()
    }

    fn is_watched(&self, path: &Path) -> bool {
        self.wd_of(path).is_some()
    }

    fn inject(&self, wd: WatchDescriptor, event_mask: u32, name: &str) {
        self.tx
            .send(Message::Event(FsEvent {
                wd,
                mask: event_mask,
                name: name.to_string(),
            }))
            .unwrap();
    }
}

impl FsNotifier for MockNotifier {
    fn add_watch(&self, path: &Path, _event_mask: u32) -> pmoscan::Result<WatchDescriptor> {
        if !path.is_dir() {
            return Err(pmoscan::ScanError::Notifier {
                path: path.to_path_buf(),
                msg: "no such directory".to_string(),
            });
        }
        let mut state = self.state.lock().unwrap();
        if let Some(wd) = state.by_path.get(path) {
            return Ok(*wd);
        }
        state.next_wd += 1;
        let wd = state.next_wd;
        state.by_path.insert(path.to_path_buf(), wd);
        state.by_wd.insert(wd, path.to_path_buf());
        Ok(wd)
    }

    fn remove_watch(&self, wd: WatchDescriptor) -> pmoscan::Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(path) = state.by_wd.remove(&wd) {
            state.by_path.remove(&path);
        }
        drop(state);
        self.tx
            .send(Message::Event(FsEvent {
                wd,
                mask: mask::IGNORED,
                name: String::new(),
            }))
            .unwrap();
        Ok(())
    }

    fn next_event(&self) -> Option<FsEvent> {
        match self.rx.recv().ok()? {
            Message::Event(event) => Some(event),
            Message::Wake => Some(FsEvent::wakeup()),
            Message::Stop => None,
        }
    }

    fn poke(&self) {
        let _ = self.tx.send(Message::Wake);
    }

    fn stop(&self) {
        let _ = self.tx.send(Message::Stop);
    }
}

struct Fixture {
    catalog: Arc<Catalog>,
    manager: Arc<ContentManager>,
    notifier: Arc<MockNotifier>,
    scanner: EventScanner,
}

fn fixture() -> Fixture {
    let catalog = Arc::new(Catalog::open_in_memory().unwrap());
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(DefaultHandler));
    let manager = Arc::new(ContentManager::new(
        catalog.clone(),
        Arc::new(registry),
        None,
        2,
    ));
    let notifier = MockNotifier::new();
    let scanner = EventScanner::new(manager.clone(), notifier.clone(), true);
    Fixture {
        catalog,
        manager,
        notifier,
        scanner,
    }
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timeout waiting for: {what}");
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn update_id_of(catalog: &Catalog, id: ObjectId) -> u32 {
    catalog
        .load(id)
        .unwrap()
        .container_info()
        .unwrap()
        .update_id
}

#[test]
fn recursive_create_events_grow_the_catalog() {
    // Scénario S6 : mkdir R/sub puis cp file.mp3 R/sub/
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("R");
    std::fs::create_dir(&root).unwrap();

    let f = fixture();
    let mut adir = AutoscanDirectory::new(&root, ScanMode::Inotify);
    adir.recursive = true;
    f.catalog.autoscan_save(&adir).unwrap();
    f.scanner.monitor(adir);

    wait_until("initial watch on R", || f.notifier.is_watched(&root));
    wait_until("R catalogued", || {
        f.catalog.find_by_path(&root, false).unwrap().is_some()
    });
    let root_id = f.catalog.find_by_path(&root, false).unwrap().unwrap();
    let root_update_before = update_id_of(&f.catalog, root_id);

    // mkdir R/sub
    let sub = root.join("sub");
    std::fs::create_dir(&sub).unwrap();
    f.notifier.inject(
        f.notifier.wd_of(&root).unwrap(),
        mask::CREATE | mask::ISDIR,
        "sub",
    );
    wait_until("watch on R/sub", || f.notifier.is_watched(&sub));
    wait_until("sub catalogued", || {
        f.catalog.find_by_path(&sub, false).unwrap().is_some()
    });
    let sub_id = f.catalog.find_by_path(&sub, false).unwrap().unwrap();
    let sub_update_before = update_id_of(&f.catalog, sub_id);

    // cp file.mp3 R/sub/
    let file = sub.join("file.mp3");
    std::fs::write(&file, b"mp3").unwrap();
    f.notifier.inject(
        f.notifier.wd_of(&sub).unwrap(),
        mask::CLOSE_WRITE,
        "file.mp3",
    );
    wait_until("file catalogued", || {
        f.catalog.find_by_path(&file, true).unwrap().is_some()
    });

    // Chaîne R → sub → file.mp3
    let file_id = f.catalog.find_by_path(&file, true).unwrap().unwrap();
    let item = f.catalog.load(file_id).unwrap();
    assert_eq!(item.parent_id, sub_id);
    assert_eq!(f.catalog.load(sub_id).unwrap().parent_id, root_id);

    // Chaque container n'a été incrémenté qu'une fois
    assert_eq!(update_id_of(&f.catalog, root_id), root_update_before + 1);
    assert_eq!(update_id_of(&f.catalog, sub_id), sub_update_before + 1);
}

#[test]
fn delete_events_remove_catalog_entries() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("musique");
    std::fs::create_dir(&root).unwrap();
    let file = root.join("piste.mp3");
    std::fs::write(&file, b"mp3").unwrap();

    let f = fixture();
    let mut adir = AutoscanDirectory::new(&root, ScanMode::Inotify);
    adir.recursive = true;
    f.scanner.monitor(adir);

    wait_until("file imported", || {
        f.catalog.find_by_path(&file, true).unwrap().is_some()
    });

    std::fs::remove_file(&file).unwrap();
    f.notifier
        .inject(f.notifier.wd_of(&root).unwrap(), mask::DELETE, "piste.mp3");
    wait_until("file removed from catalog", || {
        f.catalog.find_by_path(&file, true).unwrap().is_none()
    });
}

#[test]
fn persistent_unmount_installs_nonexisting_watches_and_rearms() {
    // Scénario S7 : UNMOUNT d'un point persistant, puis retour du chemin
    let dir = tempfile::tempdir().unwrap();
    let mount = dir.path().join("mnt");
    let share = mount.join("x");
    std::fs::create_dir_all(&share).unwrap();
    std::fs::write(share.join("avant.mp3"), b"mp3").unwrap();

    let f = fixture();
    let mut adir = AutoscanDirectory::new(&share, ScanMode::Inotify);
    adir.recursive = true;
    adir.persistent = true;
    f.catalog.autoscan_save(&adir).unwrap();
    f.scanner.monitor(adir);

    wait_until("initial import", || {
        f.catalog
            .find_by_path(&share.join("avant.mp3"), true)
            .unwrap()
            .is_some()
    });
    let share_wd = f.notifier.wd_of(&share).unwrap();

    // Démontage : le chemin disparaît puis l'événement arrive
    std::fs::remove_dir_all(&mount).unwrap();
    f.notifier.inject(share_wd, mask::UNMOUNT, "");

    wait_until("nonexisting watch on the surviving ancestor", || {
        f.notifier.is_watched(dir.path())
    });
    wait_until("catalog detached", || {
        f.catalog.find_by_path(&share, false).unwrap().is_none()
    });

    // Remontage avec un contenu différent
    std::fs::create_dir_all(&share).unwrap();
    std::fs::write(share.join("apres.mp3"), b"mp3").unwrap();
    f.notifier.inject(
        f.notifier.wd_of(dir.path()).unwrap(),
        mask::CREATE | mask::ISDIR,
        "mnt",
    );

    wait_until("autoscan re-armed", || f.notifier.is_watched(&share));
    wait_until("full rescan after remount", || {
        f.catalog
            .find_by_path(&share.join("apres.mp3"), true)
            .unwrap()
            .is_some()
    });
    assert!(f
        .catalog
        .find_by_path(&share.join("avant.mp3"), true)
        .unwrap()
        .is_none());
}

#[test]
fn shutdown_joins_the_consumer_thread() {
    let f = fixture();
    let mut scanner = f.scanner;
    scanner.shutdown();
    f.manager.shutdown();
}
