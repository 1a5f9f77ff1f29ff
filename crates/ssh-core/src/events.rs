//! Structured forwarding events and the sinks that consume them.
//!
//! Every component of the engine receives a [`SharedEventSink`] at
//! construction and reports lifecycle changes through it.
//! [`TracingEventSink`] is what the binary installs.

use std::{fmt, io, net::SocketAddr, sync::Arc};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// One half of a relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Bytes read from the accepted local connection and written to the jump channel.
    LocalToRemote,
    /// Bytes read from the jump channel and written back to the local connection.
    RemoteToLocal,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::LocalToRemote => f.write_str("local->remote"),
            Direction::RemoteToLocal => f.write_str("remote->local"),
        }
    }
}

/// Terminal error of one relay direction. Terminates that relay only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayFailure {
    pub kind: io::ErrorKind,
    pub message: String,
}

impl RelayFailure {
    /// Resets and broken pipes after the peer went away, or a forced close.
    pub fn is_peer_close(&self) -> bool {
        matches!(
            self.kind,
            io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::UnexpectedEof
                | io::ErrorKind::Interrupted
        )
    }
}

impl From<&io::Error> for RelayFailure {
    fn from(err: &io::Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for RelayFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Why a tunnel left the `Listening` state (or never reached it).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Stopped on request: tunnel stop or engine shutdown.
    Cancelled,
    /// The accept loop hit an error other than a shutdown signal.
    AcceptFailed(String),
    /// The local listener could not be bound.
    BindFailed(String),
    /// The jump node's session could not be established.
    SessionUnavailable(String),
}

impl StopReason {
    pub fn is_failure(&self) -> bool {
        !matches!(self, StopReason::Cancelled)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Cancelled => f.write_str("cancelled"),
            StopReason::AcceptFailed(err) => write!(f, "accept failed: {err}"),
            StopReason::BindFailed(err) => write!(f, "bind failed: {err}"),
            StopReason::SessionUnavailable(err) => write!(f, "session unavailable: {err}"),
        }
    }
}

/// Observable lifecycle events of sessions, tunnels and relays.
///
/// `tunnel` fields carry the `local -> jump -> target` label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ForwardEvent {
    SessionEstablished {
        jump: String,
    },
    SessionFailed {
        jump: String,
        error: String,
    },
    SessionClosed {
        jump: String,
    },
    TunnelListening {
        tunnel: String,
        local: SocketAddr,
    },
    TunnelBindFailed {
        tunnel: String,
        error: String,
    },
    TunnelRestarting {
        tunnel: String,
        attempt: u32,
    },
    TunnelStopped {
        tunnel: String,
        reason: StopReason,
    },
    ConnectionAccepted {
        tunnel: String,
        peer: SocketAddr,
    },
    DialFailed {
        tunnel: String,
        peer: SocketAddr,
        error: String,
    },
    DirectionFinished {
        tunnel: String,
        peer: SocketAddr,
        direction: Direction,
        bytes: u64,
        error: Option<RelayFailure>,
    },
    RelayClosed {
        tunnel: String,
        peer: SocketAddr,
    },
}

/// Destination for [`ForwardEvent`]s.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: ForwardEvent);
}

pub type SharedEventSink = Arc<dyn EventSink>;

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: ForwardEvent) {}
}

/// Forwards events to a channel; a closed receiver silently drops them.
impl EventSink for UnboundedSender<ForwardEvent> {
    fn emit(&self, event: ForwardEvent) {
        let _ = self.send(event);
    }
}

/// Renders events as `tracing` records with structured fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: ForwardEvent) {
        match event {
            ForwardEvent::SessionEstablished { jump } => info!(%jump, "jump session established"),
            ForwardEvent::SessionFailed { jump, error } => warn!(%jump, %error, "jump session failed"),
            ForwardEvent::SessionClosed { jump } => info!(%jump, "jump session closed"),
            ForwardEvent::TunnelListening { tunnel, local } => info!(%tunnel, %local, "tunnel listening"),
            ForwardEvent::TunnelBindFailed { tunnel, error } => warn!(%tunnel, %error, "tunnel bind failed"),
            ForwardEvent::TunnelRestarting { tunnel, attempt } => warn!(%tunnel, attempt, "restarting tunnel"),
            ForwardEvent::TunnelStopped { tunnel, reason } => {
                if reason.is_failure() {
                    warn!(%tunnel, %reason, "tunnel stopped");
                } else {
                    info!(%tunnel, %reason, "tunnel stopped");
                }
            }
            ForwardEvent::ConnectionAccepted { tunnel, peer } => info!(%tunnel, %peer, "accepted connection"),
            ForwardEvent::DialFailed { tunnel, peer, error } => warn!(%tunnel, %peer, %error, "dial through jump failed"),
            ForwardEvent::DirectionFinished {
                tunnel,
                peer,
                direction,
                bytes,
                error,
            } => match error {
                None => info!(%tunnel, %peer, %direction, bytes, "relay direction finished"),
                Some(err) if err.is_peer_close() => {
                    debug!(%tunnel, %peer, %direction, bytes, error = %err, "relay direction closed by peer")
                }
                Some(err) => warn!(%tunnel, %peer, %direction, bytes, error = %err, "relay direction failed"),
            },
            ForwardEvent::RelayClosed { tunnel, peer } => debug!(%tunnel, %peer, "relay closed"),
        }
    }
}
