//! Monitor: host-facing supervisor for all probe loops.
//!
//! Owns the target registry, the shared probe settings and one
//! [`LoopHandle`] per running target. Implements the global start/stop
//! control, cancel-then-restart on settings changes, and add/remove while
//! probing is active.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;

use crate::engine::{
    IcmpFactory, LoopHandle, ProbeError, ProbeSettings, TransportFactory, spawn_loop,
};
use crate::target::{Target, TargetId, TargetRegistry};

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Supervisor for the probe loops of every registered target.
pub struct Monitor<F: TransportFactory = IcmpFactory> {
    registry: Arc<TargetRegistry>,
    factory: F,
    settings: parking_lot::RwLock<ProbeSettings>,
    /// Serializes lifecycle operations; held across awaits.
    loops: Mutex<HashMap<TargetId, LoopHandle>>,
    running: AtomicBool,
}

impl Monitor<IcmpFactory> {
    /// Create a monitor probing over ICMP.
    pub fn new(registry: Arc<TargetRegistry>, settings: ProbeSettings) -> Self {
        Self::with_factory(registry, settings, IcmpFactory)
    }
}

impl<F: TransportFactory> Monitor<F> {
    /// Create a monitor with a custom transport factory.
    pub fn with_factory(
        registry: Arc<TargetRegistry>,
        settings: ProbeSettings,
        factory: F,
    ) -> Self {
        Self {
            registry,
            factory,
            settings: parking_lot::RwLock::new(settings),
            loops: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    /// Current probe settings.
    pub fn settings(&self) -> ProbeSettings {
        self.settings.read().clone()
    }

    /// Whether the global start control is on.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of loops currently held (including ones that already exited).
    pub async fn loop_count(&self) -> usize {
        self.loops.lock().await.len()
    }

    /// Register a target. If probing is on, its loop is started right away.
    ///
    /// # Errors
    /// Returns the setup failure if the loop could not be started. The target
    /// stays registered (stopped) in that case.
    pub async fn add_target(
        &self,
        name: impl Into<String>,
        addr: impl Into<String>,
        ring_capacity: usize,
    ) -> Result<Arc<Target>, ProbeError> {
        let mut loops = self.loops.lock().await;
        let target = self.registry.add_target(name, addr, ring_capacity);

        if self.is_running() {
            let handle = self.open_loop(Arc::clone(&target)).await?;
            loops.insert(target.id(), handle);
        }
        Ok(target)
    }

    /// Remove the target at `position`, stopping its loop first.
    ///
    /// Returns `false` if `position` is out of range.
    pub async fn remove_target_at(&self, position: usize) -> bool {
        let mut loops = self.loops.lock().await;
        let Some(target) = self.registry.take_target_at(position) else {
            return false;
        };

        if let Some(handle) = loops.remove(&target.id()) {
            log_exit(&target, handle.stop_and_join().await);
        }
        tracing::info!(target_name = %target.name(), "Target removed");
        true
    }

    /// Start a loop for every registered target that does not have one.
    ///
    /// Setup failures are logged and returned; the other targets keep running.
    pub async fn start_all(&self) -> Vec<(TargetId, ProbeError)> {
        let mut loops = self.loops.lock().await;
        self.running.store(true, Ordering::Release);
        self.start_missing(&mut loops).await
    }

    /// Stop and await every loop. Targets stay registered.
    pub async fn stop_all(&self) {
        let mut loops = self.loops.lock().await;
        self.running.store(false, Ordering::Release);
        Self::stop_loops(&mut loops).await;
    }

    /// Change the probe interval. Running loops are cancelled and restarted.
    pub async fn set_interval(&self, interval: Duration) -> Vec<(TargetId, ProbeError)> {
        let mut loops = self.loops.lock().await;
        self.settings.write().interval = interval;
        tracing::info!(interval_ms = interval.as_millis() as u64, "Probe interval changed");

        if !self.is_running() {
            return Vec::new();
        }
        Self::stop_loops(&mut loops).await;
        self.start_missing(&mut loops).await
    }

    /// Collect loops that exited on their own.
    ///
    /// Returns their runtime failures; those targets are left stopped until
    /// the next explicit start.
    pub async fn reap_finished(&self) -> Vec<(TargetId, ProbeError)> {
        let mut loops = self.loops.lock().await;
        let finished: Vec<TargetId> = loops
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        let mut failures = Vec::new();
        for id in finished {
            let Some(handle) = loops.remove(&id) else {
                continue;
            };
            let target = Arc::clone(handle.target());
            match handle.join().await {
                Err(e) if !e.is_cancelled() => {
                    tracing::error!(target_name = %target.name(), error = %e, "Probe loop exited");
                    failures.push((id, e));
                }
                _ => {}
            }
        }
        failures
    }

    /// Gracefully stop all loops with default timeout.
    pub async fn shutdown(&self) -> bool {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Stop all loops, giving up after `timeout`.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> bool {
        let loop_count = self.loop_count().await;
        match tokio::time::timeout(timeout, self.stop_all()).await {
            Ok(()) => {
                tracing::info!(loop_count, "Monitor shutdown complete");
                true
            }
            Err(_) => {
                tracing::warn!(loop_count, "Monitor shutdown timed out");
                false
            }
        }
    }

    // --- Private helpers ---

    async fn open_loop(&self, target: Arc<Target>) -> Result<LoopHandle, ProbeError> {
        let settings = self.settings();
        let transport = self
            .factory
            .open(&target, &settings)
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    target_name = %target.name(),
                    addr = %target.addr(),
                    error = %e,
                    "Failed to start probe loop"
                );
            })?;
        Ok(spawn_loop(target, &settings, transport))
    }

    async fn start_missing(
        &self,
        loops: &mut HashMap<TargetId, LoopHandle>,
    ) -> Vec<(TargetId, ProbeError)> {
        let mut failures = Vec::new();
        for target in self.registry.list_targets() {
            if loops.get(&target.id()).is_some_and(|h| !h.is_finished()) {
                continue;
            }
            match self.open_loop(Arc::clone(&target)).await {
                Ok(handle) => {
                    loops.insert(target.id(), handle);
                }
                Err(e) => failures.push((target.id(), e)),
            }
        }
        failures
    }

    async fn stop_loops(loops: &mut HashMap<TargetId, LoopHandle>) {
        // Signal everyone first so loops wind down in parallel.
        for handle in loops.values() {
            handle.stop();
        }
        for (_, handle) in loops.drain() {
            let target = Arc::clone(handle.target());
            log_exit(&target, handle.join().await);
        }
    }
}

impl<F: TransportFactory> std::fmt::Debug for Monitor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("target_count", &self.registry.count())
            .field("running", &self.is_running())
            .field(
                "loop_count",
                &self.loops.try_lock().map(|l| l.len()).unwrap_or(0),
            )
            .finish_non_exhaustive()
    }
}

fn log_exit(target: &Target, result: Result<(), ProbeError>) {
    match result {
        Err(e) if !e.is_cancelled() => {
            tracing::warn!(target_name = %target.name(), error = %e, "Probe loop had failed before stop");
        }
        _ => tracing::debug!(target_name = %target.name(), "Probe loop joined"),
    }
}
