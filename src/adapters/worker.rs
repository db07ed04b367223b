//! Work queue between adapter event loops and blocking rank checks.
//!
//! Adapter callbacks never touch the database. They push [`WorkItem`]s onto a
//! crossbeam channel; a [`RankWorker`] thread reads stored ranks and drives the
//! correction on the runtime through a [`tokio::runtime::Handle`].

use super::PlatformAdapter;
use crate::ranks::check_and_correct;
use crate::storage::AccrualStore;
use crossbeam::channel::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Work pushed by an adapter event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// Compare stored ranks with the user's groups and repair them
    CheckRanks { platform_id: String },
    /// Stop the worker
    Shutdown,
}

/// Sending side of a worker's queue.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: Sender<WorkItem>,
}

impl WorkQueue {
    /// Create a queue and the receiver its worker consumes.
    pub fn new() -> (Self, Receiver<WorkItem>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, rx)
    }

    /// Queue a rank check for a user.
    pub fn check_ranks(&self, platform_id: impl Into<String>) {
        self.push(WorkItem::CheckRanks {
            platform_id: platform_id.into(),
        });
    }

    /// Ask the worker to stop after the items already queued.
    pub fn close(&self) {
        self.push(WorkItem::Shutdown);
    }

    fn push(&self, item: WorkItem) {
        if self.tx.send(item).is_err() {
            tracing::warn!("Work queue closed, dropping item");
        }
    }
}

/// Thread running rank checks for one adapter.
pub struct RankWorker {
    handle: Option<JoinHandle<()>>,
}

impl RankWorker {
    /// Start a worker consuming `rx`.
    pub fn spawn<A: PlatformAdapter>(
        adapter: Arc<A>,
        store: AccrualStore,
        rx: Receiver<WorkItem>,
        runtime: tokio::runtime::Handle,
    ) -> std::io::Result<Self> {
        let name = format!("{}-rank-worker", adapter.platform().as_str());
        let handle = std::thread::Builder::new().name(name).spawn(move || {
            for item in rx.iter() {
                match item {
                    WorkItem::CheckRanks { platform_id } => {
                        process_check(&*adapter, &store, &runtime, &platform_id);
                    }
                    WorkItem::Shutdown => break,
                }
            }
            tracing::debug!("{} rank worker stopped", adapter.platform());
        })?;

        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Wait for the worker thread to finish.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Rank worker panicked");
            }
        }
    }
}

fn process_check<A: PlatformAdapter>(
    adapter: &A,
    store: &AccrualStore,
    runtime: &tokio::runtime::Handle,
    platform_id: &str,
) {
    let stored = match store.stored_ranks(adapter.platform(), platform_id) {
        Ok(stored) => stored.unwrap_or_default(),
        Err(e) => {
            tracing::warn!("Rank check for {} skipped: {}", platform_id, e);
            return;
        }
    };

    match runtime.block_on(check_and_correct(adapter, platform_id, stored)) {
        Ok(outcome) if outcome.level_corrected || outcome.division_corrected => {
            tracing::info!(
                "Corrected {} groups of {} (level {}, division {})",
                adapter.platform(),
                platform_id,
                stored.level,
                stored.division
            );
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Rank correction for {} failed: {}", platform_id, e),
    }
}
