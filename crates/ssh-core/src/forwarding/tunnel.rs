use std::{fmt, net::SocketAddr, sync::Arc, time::Duration};

use tn_types::ssh::TunnelSpec;
use tokio::{net::TcpListener, task::JoinSet};
use tokio_util::sync::CancellationToken;

use super::{
    relay::{RelayContext, run_relay},
    traits::DialSession,
};
use crate::{
    SshCoreError,
    events::{ForwardEvent, SharedEventSink, StopReason},
};

type Result<T> = crate::SshResult<T>;

/// Stable identifier of a tunnel within one engine, assigned in configuration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TunnelId(pub(crate) usize);

impl TunnelId {
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tunnel#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TunnelState {
    Created,
    Listening,
    Stopped,
}

/// Cancellation handles for one tunnel.
///
/// `accept` ends the accept loop; relays then drain for up to
/// `drain_timeout`. `relays` force-closes in-flight relays. `done` fires once
/// the engine has fully retired the tunnel.
#[derive(Clone, Debug)]
pub(crate) struct TunnelControl {
    pub accept: CancellationToken,
    pub relays: CancellationToken,
    pub done: CancellationToken,
    pub drain_timeout: Duration,
}

/// One local listener forwarding to one target through a jump session.
pub struct Tunnel {
    id: TunnelId,
    spec: TunnelSpec,
    state: TunnelState,
    listener: Option<TcpListener>,
    ctx: Arc<RelayContext>,
}

impl Tunnel {
    pub fn new(id: TunnelId, spec: TunnelSpec, session: Arc<dyn DialSession>, events: SharedEventSink) -> Self {
        let ctx = Arc::new(RelayContext {
            tunnel: spec.label(),
            target: spec.target.clone(),
            session,
            events,
        });
        Self {
            id,
            spec,
            state: TunnelState::Created,
            listener: None,
            ctx,
        }
    }

    pub fn id(&self) -> TunnelId {
        self.id
    }

    pub fn spec(&self) -> &TunnelSpec {
        &self.spec
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// The `local -> jump -> target` label used in events and reports.
    pub fn label(&self) -> &str {
        &self.ctx.tunnel
    }

    /// `Created -> Listening`. A failure is terminal for this tunnel only.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let host = self.spec.local.host_string();
        let bound = TcpListener::bind((host.as_str(), self.spec.local.port()))
            .await
            .and_then(|listener| listener.local_addr().map(|addr| (listener, addr)));
        match bound {
            Ok((listener, local)) => {
                self.listener = Some(listener);
                self.state = TunnelState::Listening;
                self.ctx.events.emit(ForwardEvent::TunnelListening {
                    tunnel: self.ctx.tunnel.clone(),
                    local,
                });
                Ok(local)
            }
            Err(source) => {
                let err = SshCoreError::BindFailed {
                    address: self.spec.local.to_string(),
                    source,
                };
                self.ctx.events.emit(ForwardEvent::TunnelBindFailed {
                    tunnel: self.ctx.tunnel.clone(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Accept until cancelled or until accept fails, then retire the listener
    /// and in-flight relays. Always ends in `Stopped`.
    pub(crate) async fn run(&mut self, control: &TunnelControl) -> StopReason {
        let Some(listener) = self.listener.take() else {
            return self.finish(StopReason::AcceptFailed("tunnel is not bound".into()));
        };
        // Per-run child so a restarted tunnel starts with live relays.
        let relay_cancel = control.relays.child_token();
        let mut relays = JoinSet::new();

        let reason = loop {
            tokio::select! {
                biased;
                _ = control.accept.cancelled() => break StopReason::Cancelled,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.ctx.events.emit(ForwardEvent::ConnectionAccepted {
                            tunnel: self.ctx.tunnel.clone(),
                            peer,
                        });
                        relays.spawn(run_relay(self.ctx.clone(), stream, peer, relay_cancel.clone()));
                    }
                    Err(err) => break StopReason::AcceptFailed(err.to_string()),
                },
                Some(_) = relays.join_next(), if !relays.is_empty() => {}
            }
        };
        drop(listener);

        if !relays.is_empty() && !relay_cancel.is_cancelled() {
            let drained = tokio::time::timeout(control.drain_timeout, async {
                while relays.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::debug!(tunnel = %self.ctx.tunnel, pending = relays.len(), "drain timeout, closing relays");
            }
        }
        relay_cancel.cancel();
        while relays.join_next().await.is_some() {}

        self.finish(reason)
    }

    /// Mark the tunnel stopped and report why.
    pub(crate) fn finish(&mut self, reason: StopReason) -> StopReason {
        self.listener = None;
        self.state = TunnelState::Stopped;
        self.ctx.events.emit(ForwardEvent::TunnelStopped {
            tunnel: self.ctx.tunnel.clone(),
            reason: reason.clone(),
        });
        reason
    }
}
