//! Per-target probe loop.
//!
//! A loop sends one echo per interval, hands every exchange to the target's
//! [`PendingTracker`], and runs until its cancellation token fires or the
//! transport fails. Changing settings means cancel-then-restart; a running
//! loop is never reconfigured in place.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::engine::error::{EchoError, ProbeError};
use crate::engine::tracker::PendingTracker;
use crate::engine::transport::{EchoTransport, IcmpFactory, TransportFactory};
use crate::target::{RunState, Target};

/// Default probe interval (1 second).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Floor for the derived MaxRTT.
pub const MIN_DERIVED_MAX_RTT: Duration = Duration::from_millis(300);

/// Default grace window after MaxRTT (100ms).
pub const DEFAULT_GRACE_LATE: Duration = Duration::from_millis(100);

/// Default time the transport waits for a reply before giving up (10s).
pub const DEFAULT_REPLY_WINDOW: Duration = Duration::from_secs(10);

/// Default ICMP payload size in bytes.
pub const DEFAULT_PAYLOAD_SIZE: usize = 56;

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_payload_size() -> usize {
    DEFAULT_PAYLOAD_SIZE
}

/// Timing configuration shared by all loops.
///
/// Unset values are derived from `interval`; see the `effective_*` accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Time between probes (default: 1s).
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    /// Deadline after which a probe is presumed lost
    /// (default: max(2 × interval, 300ms)).
    #[serde(default, with = "humantime_serde")]
    pub max_rtt: Option<Duration>,
    /// Window after MaxRTT in which a reply converts its LOSS to LATE
    /// (default: 100ms).
    #[serde(default, with = "humantime_serde")]
    pub grace_late: Option<Duration>,
    /// How long a reply is still awaited at all (default: 10s).
    #[serde(default, with = "humantime_serde")]
    pub reply_window: Option<Duration>,
    /// ICMP payload size in bytes (default: 56).
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_rtt: None,
            grace_late: None,
            reply_window: None,
            payload_size: DEFAULT_PAYLOAD_SIZE,
        }
    }
}

impl ProbeSettings {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    /// Set the probe interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set an explicit MaxRTT.
    pub fn with_max_rtt(mut self, max_rtt: Duration) -> Self {
        self.max_rtt = Some(max_rtt);
        self
    }

    /// Set an explicit grace window.
    pub fn with_grace_late(mut self, grace_late: Duration) -> Self {
        self.grace_late = Some(grace_late);
        self
    }

    /// Set the reply window.
    pub fn with_reply_window(mut self, reply_window: Duration) -> Self {
        self.reply_window = Some(reply_window);
        self
    }

    /// Set the payload size.
    pub fn with_payload_size(mut self, payload_size: usize) -> Self {
        self.payload_size = payload_size;
        self
    }

    pub fn effective_interval(&self) -> Duration {
        if self.interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            self.interval
        }
    }

    pub fn effective_max_rtt(&self) -> Duration {
        self.max_rtt
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| (2 * self.effective_interval()).max(MIN_DERIVED_MAX_RTT))
    }

    pub fn effective_grace_late(&self) -> Duration {
        self.grace_late
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_GRACE_LATE)
    }

    /// Never shorter than MaxRTT + GraceLate, so a reconcilable reply is
    /// always still awaited.
    pub fn effective_reply_window(&self) -> Duration {
        let floor = self.effective_max_rtt() + self.effective_grace_late();
        self.reply_window
            .unwrap_or(DEFAULT_REPLY_WINDOW)
            .max(floor)
    }
}

/// Control handle for a spawned loop.
///
/// Dropping the handle does not stop the loop; call [`stop`](Self::stop).
#[derive(Debug)]
pub struct LoopHandle {
    target: Arc<Target>,
    token: CancellationToken,
    task: JoinHandle<Result<(), ProbeError>>,
}

impl LoopHandle {
    /// Request cancellation. Idempotent; safe after the loop has exited.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether the loop task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Target this loop probes.
    pub fn target(&self) -> &Arc<Target> {
        &self.target
    }

    /// Clone of the loop's cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for the loop to exit.
    ///
    /// `Err(ProbeError::Cancelled)` is a clean stop; anything else is a
    /// runtime failure.
    pub async fn join(self) -> Result<(), ProbeError> {
        self.task.await?
    }

    /// [`stop`](Self::stop) then [`join`](Self::join).
    pub async fn stop_and_join(self) -> Result<(), ProbeError> {
        self.stop();
        self.join().await
    }
}

/// Resolve/open the target over ICMP and start probing it.
///
/// # Errors
/// Returns a setup failure if the address cannot be resolved or the ICMP
/// socket cannot be opened. The loop is not started in that case.
pub async fn start_loop(
    target: Arc<Target>,
    settings: &ProbeSettings,
) -> Result<LoopHandle, ProbeError> {
    let transport = IcmpFactory.open(&target, settings).await?;
    Ok(spawn_loop(target, settings, transport))
}

/// Start probing `target` over an already opened transport.
pub fn spawn_loop<T: EchoTransport>(
    target: Arc<Target>,
    settings: &ProbeSettings,
    transport: T,
) -> LoopHandle {
    let token = CancellationToken::new();
    let probe = ProbeLoop::new(Arc::clone(&target), settings, Arc::new(transport));

    target.set_run_state(RunState::Running);
    let task = tokio::spawn(probe.run(token.clone()));

    LoopHandle {
        target,
        token,
        task,
    }
}

/// The loop itself. Owns its tracker; shares nothing with other loops.
pub struct ProbeLoop<T> {
    target: Arc<Target>,
    interval: Duration,
    tracker: Arc<PendingTracker>,
    transport: Arc<T>,
}

impl<T: EchoTransport> ProbeLoop<T> {
    pub fn new(target: Arc<Target>, settings: &ProbeSettings, transport: Arc<T>) -> Self {
        let tracker = PendingTracker::new(
            target.name(),
            Arc::clone(target.ring()),
            settings.effective_max_rtt(),
            settings.effective_grace_late(),
        );

        Self {
            interval: settings.effective_interval(),
            target,
            tracker,
            transport,
        }
    }

    /// Run until cancelled or the transport fails.
    ///
    /// Always returns `Err`: [`ProbeError::Cancelled`] for a clean stop,
    /// [`ProbeError::Runtime`] otherwise.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ProbeError> {
        tracing::info!(
            target_name = %self.target.name(),
            addr = %self.target.addr(),
            interval_ms = self.interval.as_millis() as u64,
            max_rtt_ms = self.tracker.max_rtt().as_millis() as u64,
            grace_late_ms = self.tracker.grace_late().as_millis() as u64,
            "Probe loop started"
        );

        let reason = self.drive(&cancel).await;
        self.target.set_run_state(RunState::Stopped);

        if reason.is_cancelled() {
            tracing::info!(target_name = %self.target.name(), "Probe loop stopped");
        } else {
            tracing::error!(target_name = %self.target.name(), error = %reason, "Probe loop failed");
        }
        Err(reason)
    }

    async fn drive(&self, cancel: &CancellationToken) -> ProbeError {
        let (failure_tx, mut failure_rx) = mpsc::channel::<String>(1);
        let mut in_flight = JoinSet::new();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut seq: u16 = 0;

        let reason = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break ProbeError::Cancelled,
                Some(msg) = failure_rx.recv() => break ProbeError::Runtime(msg),
                _ = ticker.tick() => {
                    while in_flight.try_join_next().is_some() {}
                    self.send_probe(seq, &mut in_flight, failure_tx.clone());
                    seq = seq.wrapping_add(1);
                }
            }
        };

        // Close first so an exchange finishing concurrently cannot write.
        self.tracker.close();
        in_flight.abort_all();
        reason
    }

    fn send_probe(&self, seq: u16, in_flight: &mut JoinSet<()>, failures: mpsc::Sender<String>) {
        self.tracker.on_send(seq);

        let tracker = Arc::clone(&self.tracker);
        let transport = Arc::clone(&self.transport);
        let name = self.target.name().to_string();
        in_flight.spawn(async move {
            match transport.echo(seq).await {
                Ok(rtt) => {
                    tracker.on_reply(seq, rtt);
                }
                Err(EchoError::Timeout) => tracker.abandon(seq),
                Err(EchoError::Unreachable(reason)) => {
                    tracing::debug!(target_name = %name, seq, reason = %reason, "Echo failed");
                    tracker.abandon(seq);
                }
                Err(EchoError::Fatal(reason)) => {
                    // The loop closes the tracker on exit; only the first failure matters.
                    let _ = failures.try_send(reason);
                }
            }
        });
    }
}

impl<T> std::fmt::Debug for ProbeLoop<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeLoop")
            .field("target", &self.target.name())
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
