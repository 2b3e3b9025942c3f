//! Timer-driven scanner.
//!
//! One scheduler thread sleeps until the earliest `last_scan + interval`
//! among the registered autoscan directories, submits the rescan, then
//! re-arms. Registration changes wake the thread through a condvar.

use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pmocatalog::{AutoscanDirectory, ScanMode};
use pmoimport::ContentManager;

struct Shared {
    state: Mutex<Vec<AutoscanDirectory>>,
    wakeup: Condvar,
    shutdown: CancellationToken,
}

/// Timer-driven scanner handle.
pub struct TimedScanner {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl TimedScanner {
    pub fn new(manager: Arc<ContentManager>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(Vec::new()),
            wakeup: Condvar::new(),
            shutdown: CancellationToken::new(),
        });
        let thread_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("autoscan-timer".to_string())
            .spawn(move || scheduler_loop(thread_shared, manager))
            .expect("failed to spawn autoscan timer thread");
        TimedScanner {
            shared,
            thread: Some(thread),
        }
    }

    /// Registers (or replaces) a timed autoscan directory.
    pub fn monitor(&self, adir: AutoscanDirectory) {
        debug_assert_eq!(adir.scan_mode, ScanMode::Timed);
        let mut state = self.shared.state.lock().unwrap();
        state.retain(|existing| existing.location != adir.location);
        info!(location = %adir.location.display(), interval = ?adir.interval, "timed autoscan armed");
        state.push(adir);
        self.shared.wakeup.notify_one();
    }

    /// Drops the autoscan attached to `location`.
    pub fn unmonitor(&self, location: &Path) {
        let mut state = self.shared.state.lock().unwrap();
        state.retain(|existing| existing.location != location);
        self.shared.wakeup.notify_one();
    }

    /// Stops the scheduler and joins it.
    pub fn shutdown(&mut self) {
        self.shared.shutdown.cancel();
        self.shared.wakeup.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("autoscan timer thread terminated by panic");
            }
        }
    }
}

impl Drop for TimedScanner {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown();
        }
    }
}

fn scheduler_loop(shared: Arc<Shared>, manager: Arc<ContentManager>) {
    let mut state = shared.state.lock().unwrap();
    loop {
        if shared.shutdown.is_cancelled() {
            break;
        }

        let now = now_secs();
        let due = state
            .iter()
            .map(|adir| (adir.last_scan + adir.interval.as_secs() as i64, adir.clone()))
            .min_by_key(|(next_fire, _)| *next_fire);

        match due {
            None => {
                state = shared.wakeup.wait(state).unwrap();
            }
            Some((next_fire, _)) if next_fire > now => {
                let sleep = Duration::from_secs((next_fire - now) as u64);
                let (guard, _timeout) = shared.wakeup.wait_timeout(state, sleep).unwrap();
                state = guard;
            }
            Some((_, adir)) => {
                drop(state);
                run_rescan(&manager, &adir, &shared.shutdown);
                state = shared.state.lock().unwrap();
                // Réarmement après complétion
                if let Some(entry) = state.iter_mut().find(|e| e.location == adir.location) {
                    entry.last_scan = now_secs();
                }
            }
        }
    }
    debug!("autoscan timer loop stopped");
}

fn run_rescan(manager: &Arc<ContentManager>, adir: &AutoscanDirectory, shutdown: &CancellationToken) {
    match manager.ensure_path_existence(&adir.location) {
        Ok(container_id) => {
            if let Err(e) =
                manager.rescan_directory(adir, container_id, &adir.location, &shutdown.child_token())
            {
                warn!(location = %adir.location.display(), error = %e, "timed rescan failed");
            }
        }
        Err(e) => {
            warn!(location = %adir.location.display(), error = %e, "cannot catalog autoscan root")
        }
    }
}
