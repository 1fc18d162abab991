//! Execution contexts for the connection worker
//!
//! The connection manager does not care where its event loop runs. It is
//! handed a [`Worker`] that can spawn a task and later join it with a bound.

use async_trait::async_trait;
use futures_util::future::{abortable, AbortHandle};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A spawned, type-erased task
pub type BoxTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Spawns the connection worker
pub trait Worker: Send + Sync {
    fn spawn(&self, name: &str, task: BoxTask) -> Box<dyn WorkerHandle>;
}

/// Handle to a spawned worker
#[async_trait]
pub trait WorkerHandle: Send + Sync {
    /// Wait at most `timeout` for the worker to finish; `true` if it did
    async fn join(&mut self, timeout: Duration) -> bool;

    /// Stop the worker at its next await point
    fn abort(&self);

    fn is_finished(&self) -> bool;
}

/// Runs the worker as a task on a tokio runtime
///
/// Uses the given runtime handle, or the ambient one at spawn time. Outside
/// any runtime it falls back to a dedicated thread.
#[derive(Debug, Clone, Default)]
pub struct TaskWorker {
    runtime: Option<Handle>,
}

impl TaskWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self { runtime: Some(runtime) }
    }
}

impl Worker for TaskWorker {
    fn spawn(&self, name: &str, task: BoxTask) -> Box<dyn WorkerHandle> {
        match self.runtime.clone().or_else(|| Handle::try_current().ok()) {
            Some(runtime) => {
                tracing::debug!("Spawning {} as a runtime task", name);
                Box::new(TaskHandle {
                    handle: Some(runtime.spawn(task)),
                })
            }
            None => {
                tracing::debug!("No runtime available for {}, using a dedicated thread", name);
                ThreadWorker.spawn(name, task)
            }
        }
    }
}

struct TaskHandle {
    handle: Option<JoinHandle<()>>,
}

#[async_trait]
impl WorkerHandle for TaskHandle {
    async fn join(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return true;
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(result) => {
                if let Err(e) = result {
                    if e.is_panic() {
                        tracing::error!("Connection worker panicked");
                    }
                }
                self.handle = None;
                true
            }
            Err(_) => false,
        }
    }

    fn abort(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }

    fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |handle| handle.is_finished())
    }
}

/// Runs the worker on its own OS thread with a single-threaded runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadWorker;

impl Worker for ThreadWorker {
    fn spawn(&self, name: &str, task: BoxTask) -> Box<dyn WorkerHandle> {
        let (done_tx, done_rx) = oneshot::channel();
        let (task, abort) = abortable(task);
        let thread_name = name.to_string();

        let spawned = std::thread::Builder::new().name(thread_name.clone()).spawn(move || {
            match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => {
                    let _ = runtime.block_on(task);
                }
                Err(e) => tracing::error!("Failed to start runtime for {}: {}", thread_name, e),
            }
            let _ = done_tx.send(());
        });

        if let Err(e) = &spawned {
            tracing::error!("Failed to spawn worker thread {}: {}", name, e);
        }

        Box::new(ThreadHandle {
            done: Some(done_rx),
            abort,
            thread: spawned.ok(),
        })
    }
}

struct ThreadHandle {
    done: Option<oneshot::Receiver<()>>,
    abort: AbortHandle,
    thread: Option<std::thread::JoinHandle<()>>,
}

#[async_trait]
impl WorkerHandle for ThreadHandle {
    async fn join(&mut self, timeout: Duration) -> bool {
        let Some(done) = self.done.as_mut() else {
            return true;
        };

        // a dropped sender means the thread is gone as well
        if tokio::time::timeout(timeout, done).await.is_err() {
            return false;
        }
        self.done = None;
        self.thread = None;
        true
    }

    fn abort(&self) {
        self.abort.abort();
    }

    fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |thread| thread.is_finished())
    }
}
