//! Concrete [`Transport`] backed by the `interprocess` crate's local
//! sockets: Unix domain sockets on Unix, named pipes on Windows. This is
//! the one real backend the crate ships; anything else is an
//! externally-supplied implementation of the same trait.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use interprocess::local_socket::{LocalSocketListener, LocalSocketStream};
use ipc_support::error::{IpcError, IpcResult};

use crate::{Transport, TransportListener};

/// One simplex half of a named-pipe duplex pair (`<N>-IN` or `<N>-OUT`),
/// or the single stream used in `Stream` mode.
pub struct LocalTransport {
    stream: LocalSocketStream,
    connected: bool,
}

impl LocalTransport {
    fn new(stream: LocalSocketStream) -> Self {
        LocalTransport { stream, connected: true }
    }

    /// Client-side: connect to a pre-existing named endpoint, retrying
    /// until `timeout` elapses (mirrors the spec's `start(timeout?)` on
    /// the client side of a duplex channel).
    pub fn connect(name: &str, timeout: Option<Duration>) -> IpcResult<Self> {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            match LocalSocketStream::connect(name) {
                Ok(stream) => return Ok(LocalTransport::new(stream)),
                Err(err) => {
                    let retryable = matches!(
                        err.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                    );
                    match deadline {
                        Some(deadline) if retryable && Instant::now() < deadline => {
                            std::thread::sleep(Duration::from_millis(25));
                            continue;
                        }
                        _ => return Err(IpcError::Transport(err)),
                    }
                }
            }
        }
    }
}

impl Transport for LocalTransport {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn read(&mut self, buf: &mut [u8]) -> IpcResult<usize> {
        if !self.connected {
            return Ok(0);
        }
        match self.stream.read(buf) {
            Ok(0) => {
                self.connected = false;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(err) => {
                self.connected = false;
                Err(IpcError::Transport(err))
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> IpcResult<()> {
        if !self.connected {
            return Err(IpcError::protocol("write on a disconnected transport"));
        }
        self.stream.write_all(buf).map_err(|err| {
            self.connected = false;
            IpcError::Transport(err)
        })
    }

    /// Marks the transport disconnected and, on Unix, actually shuts
    /// down the underlying socket so a read blocked on another thread
    /// wakes up with an error/EOF instead of hanging forever (§5
    /// "outstanding reads are unblocked by disposing the stream").
    fn disconnect(&mut self) {
        self.connected = false;
        if let Some(handle) = self.interrupt_handle() {
            handle();
        }
    }

    fn interrupt_handle(&self) -> Option<Box<dyn Fn() + Send + Sync>> {
        interrupt_handle_for(&self.stream)
    }
}

#[cfg(unix)]
fn interrupt_handle_for(stream: &LocalSocketStream) -> Option<Box<dyn Fn() + Send + Sync>> {
    use std::os::unix::io::AsRawFd;
    let fd = stream.as_raw_fd();
    Some(Box::new(move || unsafe {
        libc::shutdown(fd, libc::SHUT_RDWR);
    }))
}

#[cfg(not(unix))]
fn interrupt_handle_for(_stream: &LocalSocketStream) -> Option<Box<dyn Fn() + Send + Sync>> {
    // Named pipes need `CancelIoEx` to unblock a pending read from
    // another thread; out of scope for this backend on non-Unix targets.
    None
}

/// Server-side listener for one named endpoint (`<N>-IN` or `<N>-OUT`).
pub struct LocalListener {
    listener: LocalSocketListener,
}

impl LocalListener {
    pub fn bind(name: &str) -> IpcResult<Self> {
        let listener = LocalSocketListener::bind(name).map_err(IpcError::Transport)?;
        Ok(LocalListener { listener })
    }
}

impl TransportListener for LocalListener {
    type Stream = LocalTransport;

    fn accept(&mut self, _timeout: Option<Duration>) -> IpcResult<Self::Stream> {
        // `interprocess`'s blocking listener has no built-in accept
        // timeout; the caller is expected to run `accept` on a dedicated
        // thread per the spec's "parallel threads with asynchronous I/O"
        // scheduling model, so a blocking accept here is correct.
        let stream = self.listener.accept().map_err(IpcError::Transport)?;
        Ok(LocalTransport::new(stream))
    }
}

/// Derives the two simplex endpoint names for a duplex pair from a base
/// pipe name, per §6: `"<N>-IN"` / `"<N>-OUT"`.
pub fn in_out_names(base: &str) -> (String, String) {
    (format!("{base}-IN"), format!("{base}-OUT"))
}

/// Generates a short-lived, unguessable name for an anonymous bootstrap
/// pipe. The returned string doubles as the `pipe_id` handle passed to
/// the spawned child's command line (§6 spawn-argument convention).
pub fn anonymous_pipe_id() -> String {
    let mut bytes = [0u8; 16];
    ipc_core_rand_bytes(&mut bytes);
    format!("ipc-anon-{}", hex_encode(&bytes))
}

fn ipc_core_rand_bytes(out: &mut [u8]) {
    use rand::RngCore;
    rand::rngs::OsRng.fill_bytes(out);
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
