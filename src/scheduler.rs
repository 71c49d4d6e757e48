// src/scheduler.rs
//! One cooperative scheduler for every background job: periodic upkeep,
//! delayed timers (vote expiry) and long-running tasks (history scans).
//!
//! All tasks share a shutdown token (`tokio::sync::watch`); `shutdown`
//! flips it and waits for the tasks to wind down.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Cloneable cancellation token handed to tasks.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown was requested (or the scheduler is gone).
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[derive(Debug)]
pub struct TaskScheduler {
    tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// Run `tick` every `every` (first run after one period) until shutdown.
    pub fn spawn_periodic<F, Fut>(&self, name: &'static str, every: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut token = self.token();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => tick().await,
                }
            }
            tracing::debug!(target: "scheduler", task = name, "periodic task stopped");
        });
        self.track(handle);
    }

    /// Run `fut` once after `delay`, unless shutdown comes first.
    pub fn spawn_after<Fut>(&self, name: &'static str, delay: Duration, fut: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut token = self.token();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(target: "scheduler", task = name, "delayed task dropped on shutdown");
                }
                _ = tokio::time::sleep(delay) => fut.await,
            }
        });
        self.track(handle);
    }

    /// Run `fut` now; it is dropped at its next await point on shutdown.
    pub fn spawn<Fut>(&self, name: &'static str, fut: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut token = self.token();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(target: "scheduler", task = name, "task aborted on shutdown");
                }
                _ = fut => {}
            }
        });
        self.track(handle);
    }

    /// Signal every task and wait for all of them.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(true);
        let handles: Vec<JoinHandle<()>> = {
            let mut h = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            h.drain(..).collect()
        };
        for h in handles {
            let _ = h.await;
        }
        tracing::info!(target: "scheduler", "scheduler shut down");
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut h = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        h.retain(|j| !j.is_finished());
        h.push(handle);
    }
}
