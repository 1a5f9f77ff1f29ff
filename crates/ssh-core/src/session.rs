use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use russh::{
    Disconnect,
    client::{self, Handle},
};
use tn_types::EndpointAddress;
use tracing::debug;

use crate::{
    SshCoreError,
    events::{ForwardEvent, SharedEventSink},
    forwarding::{DialSession, ForwardStream},
};

pub type SessionHandle<H> = Handle<H>;

pub async fn disconnect<H>(session: &SessionHandle<H>)
where
    H: client::Handler,
{
    if let Err(err) = session.disconnect(Disconnect::ByApplication, "", "").await {
        debug!(?err, "disconnect on an already closed session");
    }
}

/// The one session of a jump node, shared by all of its tunnels.
///
/// `close` reaches the underlying session at most once no matter how many
/// tunnels race to release it; dials after that fail without touching it.
pub struct SharedSession<S> {
    jump: String,
    inner: S,
    closed: AtomicBool,
    events: SharedEventSink,
}

impl<S> SharedSession<S>
where
    S: DialSession,
{
    pub fn new(jump: impl Into<String>, inner: S, events: SharedEventSink) -> Self {
        Self {
            jump: jump.into(),
            inner,
            closed: AtomicBool::new(false),
            events,
        }
    }

    pub fn jump(&self) -> &str {
        &self.jump
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl<S> DialSession for SharedSession<S>
where
    S: DialSession,
{
    async fn dial(&self, target: &EndpointAddress, origin: std::net::SocketAddr) -> crate::SshResult<ForwardStream> {
        if self.is_closed() {
            return Err(SshCoreError::DialFailed {
                target: target.to_string(),
                jump: self.jump.clone(),
                source: "session is closed".into(),
            });
        }
        self.inner
            .dial(target, origin)
            .await
            .map_err(|err| SshCoreError::dial(target.to_string(), self.jump.as_str(), err))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.close().await;
        self.events.emit(ForwardEvent::SessionClosed { jump: self.jump.clone() });
    }
}
