//! Socket plumbing shared by both session kinds.
//!
//! The framed TCP stream is driven by a dedicated future which feeds
//! inbound packets into a channel and drains an outbound channel into
//! the socket. Session logic only ever touches the channels, so other
//! parts of the server (duplicate login kicks for instance) can hold a
//! cheap [`PacketTx`] without touching the socket itself.

use std::{
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
};

use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_util::codec::Framed;

use super::packet::{Packet, PacketCodec};

/// Receiver half for packets arriving from the remote peer. Yields
/// `None` once the socket has closed.
pub type PacketRx = mpsc::UnboundedReceiver<Packet>;

/// Cloneable handle for queueing packets towards the remote peer
#[derive(Clone)]
pub struct PacketTx {
    tx: mpsc::UnboundedSender<Packet>,
}

impl PacketTx {
    /// Queues a packet for writing. Failures mean the socket is gone;
    /// the session will observe that through its inbound channel.
    pub fn send(&self, packet: Packet) {
        let _ = self.tx.send(packet);
    }
}

/// Creates the socket driver future for `stream` along with the
/// channel pair the owning session uses to talk through it
pub fn split(stream: TcpStream) -> (SocketFuture, PacketRx, PacketTx) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let future = SocketFuture {
        io: Framed::new(stream, PacketCodec),
        inbound_tx: Some(inbound_tx),
        outbound_rx,
        buffered_item: None,
    };

    (future, inbound_rx, PacketTx { tx: outbound_tx })
}

/// Channel pair without a socket behind it, for exercising session
/// logic in tests
#[cfg(test)]
pub fn test_channel() -> (PacketTx, PacketRx) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PacketTx { tx }, rx)
}

/// Future driving a session socket until either side closes it
pub struct SocketFuture {
    /// Framed socket being acted upon
    io: Framed<TcpStream, PacketCodec>,
    /// Channel for processing received packets
    inbound_tx: Option<mpsc::UnboundedSender<Packet>>,
    /// Channel for outbound packets
    outbound_rx: mpsc::UnboundedReceiver<Packet>,
    /// Currently accepted outbound item, ready to be written
    buffered_item: Option<Packet>,
}

impl Future for SocketFuture {
    type Output = Result<(), std::io::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        // Read packets from the socket
        while let Some(inbound_tx) = &mut this.inbound_tx {
            let packet = match this.io.poll_next_unpin(cx) {
                Poll::Ready(Some(result)) => result?,

                // Socket is already closed, cannot read anything more
                Poll::Ready(None) => return Poll::Ready(Ok(())),

                // Nothing yet, move onto the write polling
                Poll::Pending => break,
            };

            if inbound_tx.send(packet).is_err() {
                // Receiver for packets has dropped, stop reading
                this.inbound_tx.take();
                break;
            }
        }

        // Write packets to the socket
        loop {
            if this.buffered_item.is_some() {
                // Wait until the socket is ready
                ready!(this.io.poll_ready_unpin(cx))?;

                // Take and write the buffered item
                if let Some(packet) = this.buffered_item.take() {
                    this.io.start_send_unpin(packet)?;
                }
            }

            match this.outbound_rx.poll_recv(cx) {
                // Packet ready, set the buffered item
                Poll::Ready(Some(item)) => {
                    this.buffered_item = Some(item);
                }
                // All senders have dropped, close the socket
                Poll::Ready(None) => {
                    ready!(this.io.poll_close_unpin(cx))?;
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => {
                    // Flush whatever was started before parking
                    ready!(this.io.poll_flush_unpin(cx))?;
                    return Poll::Pending;
                }
            }
        }
    }
}
