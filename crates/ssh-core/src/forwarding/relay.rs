use std::{io, net::SocketAddr, sync::Arc};

use tn_types::EndpointAddress;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_util::sync::CancellationToken;

use super::traits::DialSession;
use crate::events::{Direction, ForwardEvent, RelayFailure, SharedEventSink};

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Per-tunnel state every relay of that tunnel needs.
pub(crate) struct RelayContext {
    pub tunnel: String,
    pub target: EndpointAddress,
    pub session: Arc<dyn DialSession>,
    pub events: SharedEventSink,
}

/// Serve one accepted connection: dial the target, then copy both ways until
/// both directions are done.
///
/// A clean end-of-stream in one direction only half-closes the other side;
/// the relay finishes when both directions have reported. An I/O error or
/// `cancel` aborts both directions.
pub(crate) async fn run_relay(ctx: Arc<RelayContext>, local: TcpStream, peer: SocketAddr, cancel: CancellationToken) {
    local.set_nodelay(true).ok();

    let dialed = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        dialed = ctx.session.dial(&ctx.target, peer) => dialed,
    };
    let remote = match dialed {
        Ok(remote) => remote,
        Err(err) => {
            ctx.events.emit(ForwardEvent::DialFailed {
                tunnel: ctx.tunnel.clone(),
                peer,
                error: err.to_string(),
            });
            return;
        }
    };

    let relay_cancel = cancel.child_token();
    let (local_read, local_write) = local.into_split();
    let (remote_read, remote_write) = tokio::io::split(remote);

    let upstream = tokio::spawn(pump(
        local_read,
        remote_write,
        Direction::LocalToRemote,
        peer,
        ctx.clone(),
        relay_cancel.clone(),
    ));
    let downstream = tokio::spawn(pump(
        remote_read,
        local_write,
        Direction::RemoteToLocal,
        peer,
        ctx.clone(),
        relay_cancel,
    ));
    let (up, down) = tokio::join!(upstream, downstream);
    for (direction, joined) in [(Direction::LocalToRemote, up), (Direction::RemoteToLocal, down)] {
        if let Err(err) = joined {
            ctx.events.emit(ForwardEvent::DirectionFinished {
                tunnel: ctx.tunnel.clone(),
                peer,
                direction,
                bytes: 0,
                error: Some(RelayFailure {
                    kind: io::ErrorKind::Other,
                    message: format!("relay task failed: {err}"),
                }),
            });
        }
    }

    ctx.events.emit(ForwardEvent::RelayClosed {
        tunnel: ctx.tunnel.clone(),
        peer,
    });
}

/// One direction of a relay. Reports its own outcome and returns once its
/// source reached end-of-stream, an I/O error happened, or the relay was
/// cancelled. Both halves are dropped on return.
async fn pump<R, W>(
    reader: R,
    writer: W,
    direction: Direction,
    peer: SocketAddr,
    ctx: Arc<RelayContext>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (bytes, result) = copy_counted(reader, writer, &cancel).await;
    let error = match result {
        Ok(()) => None,
        Err(err) => {
            // The sibling direction has nothing left to talk to.
            cancel.cancel();
            Some(RelayFailure::from(&err))
        }
    };
    ctx.events.emit(ForwardEvent::DirectionFinished {
        tunnel: ctx.tunnel.clone(),
        peer,
        direction,
        bytes,
        error,
    });
}

/// Copy until EOF, then shut the writer down so the far side sees EOF too.
/// The byte count is returned on every path, including errors.
async fn copy_counted<R, W>(mut reader: R, mut writer: W, cancel: &CancellationToken) -> (u64, io::Result<()>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut bytes = 0u64;
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return (bytes, Err(cancelled())),
            read = reader.read(&mut buf) => read,
        };
        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => return (bytes, Err(err)),
        };
        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => return (bytes, Err(cancelled())),
            written = writer.write_all(&buf[..n]) => written,
        };
        if let Err(err) = written {
            return (bytes, Err(err));
        }
        bytes += n as u64;
    }

    match writer.shutdown().await {
        Err(err) if !is_half_close_race(&err) => (bytes, Err(err)),
        _ => (bytes, Ok(())),
    }
}

fn cancelled() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "relay cancelled")
}

/// Shutting down a half that the peer already closed is not a failure.
fn is_half_close_race(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copy_counted_counts_and_half_closes() {
        let (mut client, server) = tokio::io::duplex(64);
        let (sink_writer, mut sink_reader) = tokio::io::duplex(4096);
        let cancel = CancellationToken::new();

        let copy = tokio::spawn(async move { copy_counted(server, sink_writer, &cancel).await });
        client.write_all(&[7u8; 1000]).await.unwrap();
        client.shutdown().await.unwrap();

        let mut received = Vec::new();
        sink_reader.read_to_end(&mut received).await.unwrap();
        let (bytes, result) = copy.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(bytes, 1000);
        assert_eq!(received.len(), 1000);
    }

    #[tokio::test]
    async fn copy_counted_stops_on_cancel() {
        let (_client, server) = tokio::io::duplex(64);
        let (sink_writer, _sink_reader) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (bytes, result) = copy_counted(server, sink_writer, &cancel).await;
        assert_eq!(bytes, 0);
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::Interrupted);
    }

    #[test]
    fn half_close_races_are_benign() {
        assert!(is_half_close_race(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_half_close_race(&io::Error::from(io::ErrorKind::NotConnected)));
        assert!(!is_half_close_race(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
