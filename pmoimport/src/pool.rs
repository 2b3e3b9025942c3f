//! Pool de threads borné à deux files FIFO.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{ImportError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pool de travailleurs drainant une file normale et une file basse
/// priorité, cette dernière seulement quand la première est vide.
pub struct TaskPool {
    normal_tx: Option<Sender<Job>>,
    low_tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl TaskPool {
    /// Démarre `workers` threads (au moins un).
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (normal_tx, normal_rx) = unbounded::<Job>();
        let (low_tx, low_rx) = unbounded::<Job>();
        let shutdown = CancellationToken::new();

        let handles = (0..workers)
            .map(|i| {
                let normal_rx = normal_rx.clone();
                let low_rx = low_rx.clone();
                let shutdown = shutdown.clone();
                std::thread::Builder::new()
                    .name(format!("import-{i}"))
                    .spawn(move || worker_loop(normal_rx, low_rx, shutdown))
                    .expect("failed to spawn import worker")
            })
            .collect();

        TaskPool {
            normal_tx: Some(normal_tx),
            low_tx: Some(low_tx),
            workers: handles,
            shutdown,
        }
    }

    /// Soumet une tâche.
    ///
    /// # Errors
    ///
    /// [`ImportError::Shutdown`] une fois l'arrêt engagé.
    pub fn submit(&self, low_priority: bool, job: impl FnOnce() + Send + 'static) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(ImportError::Shutdown);
        }
        let tx = if low_priority {
            self.low_tx.as_ref()
        } else {
            self.normal_tx.as_ref()
        };
        tx.ok_or(ImportError::Shutdown)?
            .send(Box::new(job))
            .map_err(|_| ImportError::Shutdown)
    }

    /// Jeton d'arrêt global observé par les tâches.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Engage l'arrêt : annule le jeton, ferme les files (les tâches non
    /// démarrées sont abandonnées) et joint les travailleurs.
    pub fn shutdown(&mut self) {
        self.shutdown.cancel();
        self.normal_tx.take();
        self.low_tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("import worker terminated by panic");
            }
        }
        debug!("task pool stopped");
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown();
        }
    }
}

fn worker_loop(normal_rx: Receiver<Job>, low_rx: Receiver<Job>, shutdown: CancellationToken) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        // La file normale passe toujours en premier
        if let Ok(job) = normal_rx.try_recv() {
            run_trapped(job);
            continue;
        }
        if let Ok(job) = low_rx.try_recv() {
            run_trapped(job);
            continue;
        }
        crossbeam_channel::select! {
            recv(normal_rx) -> job => match job {
                Ok(job) => run_trapped(job),
                Err(_) => break,
            },
            recv(low_rx) -> job => match job {
                Ok(job) => run_trapped(job),
                Err(_) => break,
            },
        }
    }
}

/// Les paniques d'une tâche ne tuent jamais le travailleur.
fn run_trapped(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("import task panicked, worker continues");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn tasks_run_and_pool_joins_cleanly() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pool = TaskPool::new(2);
        for _ in 0..16 {
            let counter = counter.clone();
            pool.submit(false, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        // Laisse les files se vider avant l'arrêt
        while counter.load(Ordering::SeqCst) < 16 {
            std::thread::sleep(Duration::from_millis(5));
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn panicking_task_does_not_kill_the_worker() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pool = TaskPool::new(1);
        pool.submit(false, || panic!("boum")).unwrap();
        let c = counter.clone();
        pool.submit(false, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        while counter.load(Ordering::SeqCst) < 1 {
            std::thread::sleep(Duration::from_millis(5));
        }
        pool.shutdown();
    }

    #[test]
    fn submit_after_shutdown_is_refused() {
        let mut pool = TaskPool::new(1);
        pool.shutdown();
        assert!(matches!(
            pool.submit(false, || {}),
            Err(ImportError::Shutdown)
        ));
    }
}
