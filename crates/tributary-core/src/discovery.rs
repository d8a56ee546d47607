//! Source-node liveness for the merge index.
//!
//! The engine does not own cluster membership; it only needs to ask an
//! external collaborator whether a contributing node is still alive.
//! [`Discovery`] is that seam. [`StaticDiscovery`] is the in-process
//! implementation used for embedding and tests; real deployments adapt
//! their membership service behind the same trait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashSet;

use crate::intake::PageIntake;
use crate::source::SourceId;

/// Liveness probe consulted by the intake's sweep.
pub trait Discovery: Send + Sync {
    /// Whether the given source node is currently alive.
    fn is_alive(&self, source: SourceId) -> bool;
}

/// Discovery over a fixed, mutable set of live nodes.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    alive: RwLock<FxHashSet<SourceId>>,
}

impl StaticDiscovery {
    /// Discovery with no nodes alive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discovery with the given nodes alive.
    #[must_use]
    pub fn with_sources(sources: impl IntoIterator<Item = SourceId>) -> Self {
        Self {
            alive: RwLock::new(sources.into_iter().collect()),
        }
    }

    /// Mark a node alive.
    pub fn mark_alive(&self, source: SourceId) {
        self.alive.write().insert(source);
    }

    /// Mark a node dead.
    pub fn mark_dead(&self, source: SourceId) {
        self.alive.write().remove(&source);
    }
}

impl Discovery for StaticDiscovery {
    fn is_alive(&self, source: SourceId) -> bool {
        self.alive.read().contains(&source)
    }
}

/// Background thread running the liveness sweep on an interval.
///
/// Fails the index through the intake as soon as any registered source
/// is reported dead. Stopping is cooperative: [`stop`](Self::stop)
/// signals the thread, wakes it, and joins it.
pub struct LivenessChecker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LivenessChecker {
    /// Spawn the checker thread.
    #[must_use]
    pub fn spawn(
        intake: Arc<PageIntake>,
        discovery: Arc<dyn Discovery>,
        interval: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            tracing::debug!(?interval, "liveness checker started");
            while !flag.load(Ordering::Acquire) {
                intake.check_source_nodes_alive(discovery.as_ref());
                std::thread::park_timeout(interval);
            }
            tracing::debug!("liveness checker stopped");
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop and join the checker thread.
    pub fn stop(mut self) {
        self.signal();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn signal(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = &self.handle {
            handle.thread().unpark();
        }
    }
}

impl Drop for LivenessChecker {
    fn drop(&mut self) {
        // Best-effort signal; a detached checker exits on its next wake.
        self.signal();
    }
}
