//! Background workers for cache operations.
//!
//! Every manager operation has a blocking form on [`crate::CacheManager`];
//! this module supplies the non-blocking variants. Requests are queued on a
//! bounded channel and executed by one or more worker threads, and each
//! submission returns a [`JobHandle`] that delivers the identical `Result`
//! once the operation completes. The worker pool size doubles as a global
//! ceiling on simultaneous clone/fetch load.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::io;
use std::sync::Arc;
use std::sync::mpsc as oneshot;
use std::thread::{self, JoinHandle};

use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::manager::CacheManager;

/// Requests the workers can handle.
pub enum WorkerRequest {
    /// Mirror a source (create or implicit refresh).
    Cache {
        source: String,
        name: Option<String>,
        reply: oneshot::Sender<Result<CacheEntry, CacheError>>,
    },

    /// Force a re-check and mirror update.
    Refresh {
        name: String,
        reply: oneshot::Sender<Result<CacheEntry, CacheError>>,
    },

    /// Delete a mirror and its record.
    Remove {
        name: String,
        reply: oneshot::Sender<Result<(), CacheError>>,
    },

    /// Shut down one worker.
    Shutdown,
}

/// Awaitable result of a submitted operation.
pub struct JobHandle<T> {
    rx: oneshot::Receiver<Result<T, CacheError>>,
}

impl<T> JobHandle<T> {
    /// Block until the operation completes and return its result.
    pub fn wait(self) -> Result<T, CacheError> {
        self.rx.recv().unwrap_or_else(|_| {
            Err(CacheError::Io(io::Error::other(
                "cache worker disconnected before replying",
            )))
        })
    }

    /// Non-blocking poll; `None` while the operation is still running.
    pub fn try_wait(&self) -> Option<Result<T, CacheError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::TryRecvError::Empty) => None,
            Err(oneshot::TryRecvError::Disconnected) => Some(Err(CacheError::Io(
                io::Error::other("cache worker disconnected before replying"),
            ))),
        }
    }
}

/// Worker loop that processes cache operations.
struct Worker {
    receiver: Receiver<WorkerRequest>,
    manager: Arc<CacheManager>,
}

impl Worker {
    fn run(self) {
        loop {
            match self.receiver.recv() {
                Ok(WorkerRequest::Cache {
                    source,
                    name,
                    reply,
                }) => {
                    log::debug!("worker: cache request for {}", source);
                    let result = self.manager.cache(&source, name.as_deref());
                    let _ = reply.send(result);
                }
                Ok(WorkerRequest::Refresh { name, reply }) => {
                    log::debug!("worker: refresh request for '{}'", name);
                    let result = self.manager.refresh(&name);
                    let _ = reply.send(result);
                }
                Ok(WorkerRequest::Remove { name, reply }) => {
                    log::debug!("worker: remove request for '{}'", name);
                    let result = self.manager.remove(&name);
                    let _ = reply.send(result);
                }
                Ok(WorkerRequest::Shutdown) => {
                    log::debug!("worker: shutting down");
                    break;
                }
                Err(_) => {
                    // Channel closed, exit
                    break;
                }
            }
        }
    }
}

/// Handle for submitting non-blocking operations to the worker pool.
pub struct WorkerHandle {
    sender: Sender<WorkerRequest>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn a single worker thread.
    pub fn spawn(manager: Arc<CacheManager>) -> Self {
        Self::spawn_pool(manager, 1)
    }

    /// Spawn a pool of worker threads sharing one request queue.
    ///
    /// `workers` bounds how many mirror mutations run at once across the
    /// whole cache.
    pub fn spawn_pool(manager: Arc<CacheManager>, workers: usize) -> Self {
        let (sender, receiver) = bounded(100); // Buffer up to 100 requests

        let threads = (0..workers.max(1))
            .map(|i| {
                let worker = Worker {
                    receiver: receiver.clone(),
                    manager: Arc::clone(&manager),
                };
                thread::Builder::new()
                    .name(format!("repocache-worker-{}", i))
                    .spawn(move || worker.run())
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { sender, threads }
    }

    /// Submit a cache operation; identical semantics to
    /// [`CacheManager::cache`].
    pub fn cache_bg(&self, source: impl Into<String>, name: Option<String>) -> JobHandle<CacheEntry> {
        let (tx, rx) = oneshot::channel();
        let _ = self.sender.send(WorkerRequest::Cache {
            source: source.into(),
            name,
            reply: tx,
        });
        JobHandle { rx }
    }

    /// Submit a refresh operation; identical semantics to
    /// [`CacheManager::refresh`].
    pub fn refresh_bg(&self, name: impl Into<String>) -> JobHandle<CacheEntry> {
        let (tx, rx) = oneshot::channel();
        let _ = self.sender.send(WorkerRequest::Refresh {
            name: name.into(),
            reply: tx,
        });
        JobHandle { rx }
    }

    /// Submit a remove operation; identical semantics to
    /// [`CacheManager::remove`].
    pub fn remove_bg(&self, name: impl Into<String>) -> JobHandle<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.sender.send(WorkerRequest::Remove {
            name: name.into(),
            reply: tx,
        });
        JobHandle { rx }
    }

    /// Shut down all workers and wait for them to exit.
    pub fn shutdown(&mut self) {
        for _ in &self.threads {
            let _ = self.sender.send(WorkerRequest::Shutdown);
        }
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
