//! The seam at which this crate consumes host-OS byte-stream primitives.
//!
//! Host named/anonymous pipes are, per design, an external collaborator:
//! the core only ever needs "wait for connection", "connected",
//! "disconnect" and "read/write" on a byte-stream handle. [`Transport`]
//! is that seam; [`local`] is the one concrete, cross-platform backend
//! this crate ships so the workspace is runnable without a second,
//! externally supplied implementation.

pub mod local;
pub mod spawn;

use ipc_support::error::IpcResult;
use std::time::Duration;

/// One simplex byte-stream endpoint: either the `-IN` or `-OUT` half of a
/// duplex pair, or (in `Stream` mode) a full-duplex stream used for both.
pub trait Transport: Send {
    /// True iff the underlying connection is currently live.
    fn is_connected(&self) -> bool;

    /// Reads up to `buf.len()` bytes. A short read (including zero)
    /// indicates message/stream boundary per the host pipe's
    /// message-transmission mode.
    fn read(&mut self, buf: &mut [u8]) -> IpcResult<usize>;

    /// Writes the entirety of `buf` as one OS-level write.
    fn write(&mut self, buf: &[u8]) -> IpcResult<()>;

    /// Tears the connection down; subsequent reads/writes are no-ops or
    /// errors, never panics.
    fn disconnect(&mut self);

    /// A thread-safe callback that forces a read blocked on another
    /// thread to return, without needing exclusive (`&mut`) access to
    /// this transport. Used to cancel a blocking read loop from a
    /// controller thread that does not own the transport's lock.
    /// Backends with no such mechanism return `None`.
    fn interrupt_handle(&self) -> Option<Box<dyn Fn() + Send + Sync>> {
        None
    }
}

/// Accepts incoming connections for the server side of a named pipe.
pub trait TransportListener: Send {
    type Stream: Transport;

    /// Blocks (up to `timeout`, if given) for the next inbound
    /// connection.
    fn accept(&mut self, timeout: Option<Duration>) -> IpcResult<Self::Stream>;
}
