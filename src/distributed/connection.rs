//! Write side of one master/worker stream
//!
//! A [`Connection`] owns the writer half of a socket. All frames go through
//! [`Connection::send`], which holds a per-connection async lock for the whole
//! frame, so concurrent senders (dispatcher, heartbeat task, result tasks)
//! never interleave bytes of two frames.
//!
//! Closing is idempotent and also wakes anyone parked in
//! [`Connection::closed`], which is how receive loops learn that the other
//! side of the system gave up on the connection.

use crate::distributed::protocol::{write_frame, Frame};
use crate::error::ProtocolError;
use tokio::io::AsyncWrite;
use tokio::sync::{watch, Mutex};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct Connection {
    peer: String,
    writer: Mutex<Option<BoxedWriter>>,
    closed: watch::Sender<bool>,
}

fn closed_error() -> ProtocolError {
    ProtocolError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "connection closed",
    ))
}

impl Connection {
    /// Wrap a writer; `peer` is only used for log context
    pub fn new<W>(writer: W, peer: impl Into<String>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed, _) = watch::channel(false);
        Self {
            peer: peer.into(),
            writer: Mutex::new(Some(Box::new(writer))),
            closed,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Send one frame, serialized against every other sender on this connection
    ///
    /// A write that is blocked when the connection is closed is abandoned.
    pub async fn send(&self, frame: &Frame) -> Result<(), ProtocolError> {
        if self.is_closed() {
            return Err(closed_error());
        }

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(closed_error());
        };

        let mut closed_rx = self.closed.subscribe();
        let result = tokio::select! {
            r = write_frame(writer, frame) => r,
            _ = closed_rx.wait_for(|c| *c) => Err(closed_error()),
        };

        if self.is_closed() {
            guard.take();
        }
        result
    }

    /// Close the connection
    ///
    /// Returns `true` for the call that actually closed it and `false` for
    /// every later call.
    pub fn close(&self) -> bool {
        let was_closed = self.closed.send_replace(true);
        // An in-flight send holds the lock; it drops the writer itself.
        if let Ok(mut guard) = self.writer.try_lock() {
            guard.take();
        }
        !was_closed
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection has been closed
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|c| *c).await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}
