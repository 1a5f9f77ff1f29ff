use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use russh::client;
use tn_types::EndpointAddress;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::session::SessionHandle;

// Internal Result type alias for convenience
type Result<T> = crate::SshResult<T>;

/// Trait for streams that can be used for forwarding.
pub trait ForwardStreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ForwardStreamIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type alias for boxed forward streams.
pub type ForwardStream = Box<dyn ForwardStreamIo>;

/// An established session that can open logical connections to remote targets.
///
/// `dial` takes `&self` and must be safe to call from many relays at once.
#[async_trait]
pub trait DialSession: Send + Sync + 'static {
    /// Open a connection to `target` on behalf of the local peer `origin`.
    async fn dial(&self, target: &EndpointAddress, origin: SocketAddr) -> Result<ForwardStream>;

    /// Tear the session down; every stream dialed through it is closed with it.
    async fn close(&self);
}

/// Produces the session for one jump node.
#[async_trait]
pub trait SessionConnector: Send + Sync + 'static {
    type Session: DialSession;

    /// Name of the jump node, used in events and errors.
    fn jump_label(&self) -> String;

    /// Handshake, verify and authenticate.
    async fn establish(&self) -> Result<Self::Session>;
}

#[async_trait]
impl<S> DialSession for Arc<S>
where
    S: DialSession + ?Sized,
{
    async fn dial(&self, target: &EndpointAddress, origin: SocketAddr) -> Result<ForwardStream> {
        self.as_ref().dial(target, origin).await
    }

    async fn close(&self) {
        self.as_ref().close().await
    }
}

// Trait implementations for russh types

#[async_trait]
impl<H> DialSession for SessionHandle<H>
where
    H: client::Handler + Send + Sync + 'static,
{
    async fn dial(&self, target: &EndpointAddress, origin: SocketAddr) -> Result<ForwardStream> {
        let channel = self
            .channel_open_direct_tcpip(
                target.host_string(),
                target.port().into(),
                origin.ip().to_string(),
                origin.port().into(),
            )
            .await?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn close(&self) {
        crate::session::disconnect(self).await;
    }
}
