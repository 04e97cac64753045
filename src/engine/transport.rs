//! Echo transport seam and the ICMP implementation.
//!
//! The probe loop only needs "send echo `seq`, tell me when (or whether) the
//! reply came back". [`EchoTransport`] captures that; [`IcmpTransport`]
//! implements it with `surge-ping`. Tests plug in scripted transports.

use std::net::IpAddr;
use std::time::Duration;

use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence, SurgeError};

use crate::engine::error::{EchoError, ProbeError};
use crate::engine::probe::ProbeSettings;
use crate::target::Target;

/// One echo request/reply exchange per call.
///
/// Calls for different sequence numbers may be in flight concurrently.
#[async_trait::async_trait]
pub trait EchoTransport: Send + Sync + 'static {
    /// Send echo `seq` and wait for its reply.
    ///
    /// Returns the measured round-trip time, or:
    /// - [`EchoError::Timeout`] if nothing arrived within the reply window
    /// - [`EchoError::Unreachable`] for per-packet failures
    /// - [`EchoError::Fatal`] if the transport can no longer probe
    async fn echo(&self, seq: u16) -> Result<Duration, EchoError>;
}

/// Opens a transport for a target. Failures here are setup failures.
#[async_trait::async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    type Transport: EchoTransport;

    async fn open(
        &self,
        target: &Target,
        settings: &ProbeSettings,
    ) -> Result<Self::Transport, ProbeError>;
}

/// Factory for [`IcmpTransport`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IcmpFactory;

#[async_trait::async_trait]
impl TransportFactory for IcmpFactory {
    type Transport = IcmpTransport;

    async fn open(
        &self,
        target: &Target,
        settings: &ProbeSettings,
    ) -> Result<IcmpTransport, ProbeError> {
        IcmpTransport::open(
            target.addr(),
            settings.effective_reply_window(),
            settings.payload_size,
        )
        .await
    }
}

/// ICMP echo transport.
///
/// All probes of one loop share a client and a random identifier; replies are
/// matched by sequence number.
pub struct IcmpTransport {
    client: Client,
    addr: IpAddr,
    ident: PingIdentifier,
    reply_window: Duration,
    payload: Vec<u8>,
}

impl IcmpTransport {
    /// Resolve `host` and open an ICMP client of the matching family.
    pub async fn open(
        host: &str,
        reply_window: Duration,
        payload_size: usize,
    ) -> Result<Self, ProbeError> {
        let addr = resolve_host(host)
            .await
            .map_err(|source| ProbeError::Resolve {
                host: host.to_string(),
                source,
            })?;

        let client = match addr {
            IpAddr::V4(_) => Client::new(&Config::default()),
            IpAddr::V6(_) => Client::new(&Config::builder().kind(ICMP::V6).build()),
        }
        .map_err(ProbeError::Open)?;

        tracing::debug!(host = %host, addr = %addr, "ICMP transport opened");

        Ok(Self {
            client,
            addr,
            ident: PingIdentifier(rand::random()),
            reply_window,
            payload: vec![0; payload_size],
        })
    }

    /// Resolved address being probed.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }
}

impl std::fmt::Debug for IcmpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IcmpTransport")
            .field("addr", &self.addr)
            .field("ident", &self.ident)
            .field("reply_window", &self.reply_window)
            .field("payload_size", &self.payload.len())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl EchoTransport for IcmpTransport {
    async fn echo(&self, seq: u16) -> Result<Duration, EchoError> {
        let mut pinger = self.client.pinger(self.addr, self.ident).await;
        pinger.timeout(self.reply_window);

        match pinger.ping(PingSequence(seq), &self.payload).await {
            Ok((_, rtt)) => Ok(rtt),
            Err(SurgeError::Timeout { .. }) => Err(EchoError::Timeout),
            Err(SurgeError::IOError(e)) => Err(classify_io_error(e)),
            Err(e) => Err(EchoError::Unreachable(e.to_string())),
        }
    }
}

/// Routing failures are per-packet; anything else means the socket is unusable.
fn classify_io_error(e: std::io::Error) -> EchoError {
    use std::io::ErrorKind;

    match e.kind() {
        ErrorKind::NetworkUnreachable | ErrorKind::HostUnreachable | ErrorKind::NetworkDown => {
            EchoError::Unreachable(e.to_string())
        }
        _ => EchoError::Fatal(e.to_string()),
    }
}

/// Literal addresses are used as-is; names go through the system resolver
/// and the first answer wins.
pub async fn resolve_host(host: &str) -> std::io::Result<IpAddr> {
    if let Ok(ip) = host.parse() {
        return Ok(ip);
    }

    tokio::net::lookup_host((host, 0))
        .await?
        .map(|sock| sock.ip())
        .next()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{host} has no address records"),
            )
        })
}
