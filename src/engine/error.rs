//! Probe engine error types.

use thiserror::Error;

/// Errors surfaced by [`start_loop`](crate::engine::start_loop) and by a
/// loop's terminal result.
///
/// # Error taxonomy
///
/// - **Setup failures** ([`Resolve`](Self::Resolve), [`Open`](Self::Open)):
///   returned synchronously by `start_loop`; the loop never starts.
/// - **Runtime failures** ([`Runtime`](Self::Runtime), [`Join`](Self::Join)):
///   the probing mechanism failed on its own; delivered through
///   [`LoopHandle::join`](crate::engine::LoopHandle::join). Not retried.
/// - **Cancellation** ([`Cancelled`](Self::Cancelled)): the clean result of a
///   stopped loop.
///
/// Benign races (a deadline firing after its reply, a late reply whose slot
/// was evicted) are never reported as errors.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Target address could not be resolved.
    #[error("failed to resolve '{host}': {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// Probing socket could not be opened.
    #[error("failed to open probe socket: {0}")]
    Open(#[source] std::io::Error),

    /// Underlying probing mechanism failed.
    #[error("probe runtime failure: {0}")]
    Runtime(String),

    /// Loop task panicked or was aborted.
    #[error("probe task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Loop stopped by its cancellation token.
    #[error("probe loop cancelled")]
    Cancelled,
}

impl ProbeError {
    /// Whether this is the clean cancellation result.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Failure of a single echo exchange, as reported by an
/// [`EchoTransport`](crate::engine::EchoTransport).
#[derive(Debug, Error)]
pub enum EchoError {
    /// No reply arrived within the transport's reply window.
    #[error("no reply within reply window")]
    Timeout,

    /// Per-packet failure (destination unreachable, malformed reply, ...).
    #[error("echo failed: {0}")]
    Unreachable(String),

    /// The probing mechanism itself failed; the loop must terminate.
    #[error("transport failure: {0}")]
    Fatal(String),
}
