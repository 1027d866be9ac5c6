use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ipc_core::{AesCbcCodec, Codec, DeflateCodec, KEY_SIZE};
use ipc_support::error::{IpcError, IpcResult};
use ipc_transport::local::{in_out_names, LocalListener, LocalTransport};
use ipc_transport::{Transport, TransportListener};
use slog::{debug, warn, Logger};

/// How a duplex channel was created (§3 data model).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Client,
    Server,
    Stream,
}

/// Which kind of pipe backs a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeKind {
    Anonymous,
    Named,
    RawStream,
}

/// Which halves of the duplex pair this channel owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    InOut,
}

/// Construction/runtime tunables for a single channel (§6).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub message_buffer_size: usize,
    pub write_cache_capacity: usize,
    pub use_encryption: bool,
    pub use_compression: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            message_buffer_size: 65536,
            write_cache_capacity: 256,
            use_encryption: true,
            use_compression: true,
        }
    }
}

/// Delivered when a message arrives on a standalone duplex channel's
/// message loop (§4.4 "Accept loop"). Returning `Some` writes a reply on
/// the same path.
pub trait ChannelHandler: Send {
    fn on_data_received(&mut self, request: &[u8]) -> Option<Vec<u8>>;
    fn on_disconnected(&mut self) {}
}

/// One logical bidirectional channel over two simplex byte streams (or
/// one shared stream in `Stream` mode). See §3/§4.4.
pub struct DuplexChannel {
    mode: Mode,
    direction: Direction,
    pipe_kind: PipeKind,
    in_stream: Option<Box<dyn Transport>>,
    out_stream: Option<Box<dyn Transport>>,
    compression: Option<DeflateCodec>,
    encryption: Option<AesCbcCodec>,
    write_cache: VecDeque<Vec<u8>>,
    write_cache_capacity: usize,
    message_buffer_size: usize,
    disposed: bool,
    log: Logger,
}

/// Length-prefix a frame's worth of already-encoded bytes and write it as
/// one call, so a single logical message survives being carried over a
/// plain byte stream with no OS-level message boundaries of its own.
fn write_frame(out: &mut dyn Transport, encoded: &[u8]) -> IpcResult<()> {
    let len = u32::try_from(encoded.len()).map_err(|_| IpcError::protocol("frame too large to length-prefix"))?;
    let mut framed = Vec::with_capacity(4 + encoded.len());
    framed.extend_from_slice(&len.to_le_bytes());
    framed.extend_from_slice(encoded);
    out.write(&framed)
}

/// Reads exactly `buf.len()` bytes, looping over short reads. `Ok(true)`
/// once `buf` is full; `Ok(false)` if the peer disconnected before any
/// byte of this call arrived (a clean frame boundary); an
/// `UnexpectedEof` transport error if the peer disconnected partway
/// through a frame.
fn read_exact(stream: &mut dyn Transport, buf: &mut [u8]) -> IpcResult<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..])?;
        if n == 0 {
            return if filled == 0 {
                Ok(false)
            } else {
                Err(IpcError::Transport(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)))
            };
        }
        filled += n;
    }
    Ok(true)
}

/// A shared handle to a single [`Transport`], used so `Stream` mode can
/// present one underlying duplex stream as separate in/out halves
/// without requiring `Transport` itself to be `Clone`.
struct SharedHandle(Arc<Mutex<Box<dyn Transport>>>);

impl Transport for SharedHandle {
    fn is_connected(&self) -> bool {
        self.0.lock().unwrap().is_connected()
    }

    fn read(&mut self, buf: &mut [u8]) -> IpcResult<usize> {
        self.0.lock().unwrap().read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> IpcResult<()> {
        self.0.lock().unwrap().write(buf)
    }

    fn disconnect(&mut self) {
        self.0.lock().unwrap().disconnect();
    }

    fn interrupt_handle(&self) -> Option<Box<dyn Fn() + Send + Sync>> {
        self.0.lock().unwrap().interrupt_handle()
    }
}

impl DuplexChannel {
    fn new(
        mode: Mode,
        direction: Direction,
        pipe_kind: PipeKind,
        in_stream: Option<Box<dyn Transport>>,
        out_stream: Option<Box<dyn Transport>>,
        cfg: &ChannelConfig,
        key: Option<[u8; KEY_SIZE]>,
        log: Logger,
    ) -> Self {
        DuplexChannel {
            mode,
            direction,
            pipe_kind,
            in_stream,
            out_stream,
            compression: cfg.use_compression.then(DeflateCodec::new),
            encryption: cfg.use_encryption.then(|| match key {
                Some(k) => AesCbcCodec::with_key(k),
                None => AesCbcCodec::new(),
            }),
            write_cache: VecDeque::new(),
            write_cache_capacity: cfg.write_cache_capacity,
            message_buffer_size: cfg.message_buffer_size,
            disposed: false,
            log,
        }
    }

    /// Wraps a single shared stream for `Stream` mode, in which "in" and
    /// "out" are the same underlying full-duplex connection.
    pub fn from_stream(stream: Box<dyn Transport>, cfg: &ChannelConfig, key: Option<[u8; KEY_SIZE]>) -> Self {
        let shared = Arc::new(Mutex::new(stream));
        let in_handle: Box<dyn Transport> = Box::new(SharedHandle(shared.clone()));
        let out_handle: Box<dyn Transport> = Box::new(SharedHandle(shared));
        Self::new(
            Mode::Stream,
            Direction::InOut,
            PipeKind::RawStream,
            Some(in_handle),
            Some(out_handle),
            cfg,
            key,
            ipc_support::logging::discard(),
        )
    }

    /// Client-side named pipe connect. The client's in-stream is the
    /// server's `-OUT` half and vice versa (§4.6.2).
    pub fn connect_named(
        base_name: &str,
        direction: Direction,
        cfg: &ChannelConfig,
        key: Option<[u8; KEY_SIZE]>,
        timeout: Option<Duration>,
    ) -> IpcResult<Self> {
        let (in_name, out_name) = in_out_names(base_name);

        let in_stream: Option<Box<dyn Transport>> = match direction {
            Direction::In | Direction::InOut => Some(Box::new(LocalTransport::connect(&out_name, timeout)?)),
            Direction::Out => None,
        };
        let out_stream: Option<Box<dyn Transport>> = match direction {
            Direction::Out | Direction::InOut => Some(Box::new(LocalTransport::connect(&in_name, timeout)?)),
            Direction::In => None,
        };

        Ok(Self::new(
            Mode::Client,
            direction,
            PipeKind::Named,
            in_stream,
            out_stream,
            cfg,
            key,
            ipc_support::logging::discard(),
        ))
    }

    pub(crate) fn from_accepted(
        in_stream: LocalTransport,
        out_stream: LocalTransport,
        cfg: &ChannelConfig,
        key: Option<[u8; KEY_SIZE]>,
        log: Logger,
    ) -> Self {
        Self::new(
            Mode::Server,
            Direction::InOut,
            PipeKind::Named,
            Some(Box::new(in_stream)),
            Some(Box::new(out_stream)),
            cfg,
            key,
            log,
        )
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn pipe_kind(&self) -> PipeKind {
        self.pipe_kind
    }

    /// True iff the underlying stream(s) are currently connected.
    pub fn ready(&self) -> bool {
        !self.disposed
            && self.in_stream.as_ref().map(|s| s.is_connected()).unwrap_or(true)
            && self.out_stream.as_ref().map(|s| s.is_connected()).unwrap_or(true)
    }

    /// Collects lock-free callbacks that force any in-flight blocking
    /// read on this channel's streams to return, one per half that
    /// supports it. Intended for a controller thread to cancel a read
    /// loop running on another thread without acquiring whatever lock
    /// guards the channel itself (the blocking read may be holding that
    /// lock for the call's entire duration).
    pub fn interrupt_handles(&self) -> Vec<Box<dyn Fn() + Send + Sync>> {
        [self.in_stream.as_deref(), self.out_stream.as_deref()]
            .into_iter()
            .flatten()
            .filter_map(|s| s.interrupt_handle())
            .collect()
    }

    /// Lazily initializes encryption (if not already present) and
    /// returns the 48-byte legacy key pack.
    pub fn key_data(&mut self) -> [u8; ipc_core::KEY_PACK_SIZE] {
        if self.encryption.is_none() {
            self.encryption = Some(AesCbcCodec::new());
        }
        self.encryption.as_ref().unwrap().key_pack().to_bytes()
    }

    fn encode_message(&mut self, data: &[u8]) -> IpcResult<Vec<u8>> {
        if data.is_empty() {
            return Err(IpcError::codec("write_bytes with empty input"));
        }
        let mut buf = data.to_vec();
        if let Some(c) = self.compression.as_mut() {
            buf = c.encode(&buf)?;
        }
        if let Some(e) = self.encryption.as_mut() {
            buf = e.encode(&buf)?;
        }
        Ok(buf)
    }

    fn decode_message(&mut self, data: &[u8]) -> IpcResult<Vec<u8>> {
        let mut buf = data.to_vec();
        if let Some(e) = self.encryption.as_mut() {
            buf = e.decode(&buf)?;
        }
        if let Some(c) = self.compression.as_mut() {
            buf = c.decode(&buf)?;
        }
        Ok(buf)
    }

    /// Flushes any cached writes once a server-side channel transitions
    /// from "accepted, not yet ready to be written to" into ready.
    fn flush_write_cache(&mut self) -> IpcResult<()> {
        while let Some(encoded) = self.write_cache.pop_front() {
            if let Some(out) = self.out_stream.as_deref_mut() {
                write_frame(out, &encoded)?;
            }
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> IpcResult<()> {
        if self.disposed {
            return Ok(());
        }
        if data.len() > self.message_buffer_size {
            return Err(IpcError::protocol(format!(
                "write of {} bytes exceeds message_buffer_size {}",
                data.len(),
                self.message_buffer_size
            )));
        }

        let encoded = self.encode_message(data)?;

        let connected = self.out_stream.as_deref().map(Transport::is_connected).unwrap_or(false);
        if connected {
            self.flush_write_cache()?;
            write_frame(self.out_stream.as_deref_mut().unwrap(), &encoded)
        } else {
            if self.write_cache.len() >= self.write_cache_capacity {
                return Err(IpcError::protocol("write cache full"));
            }
            self.write_cache.push_back(encoded);
            Ok(())
        }
    }

    pub fn write_utf8(&mut self, s: &str) -> IpcResult<()> {
        self.write_bytes(s.as_bytes())
    }

    /// Drains one logical message: reads a 4-byte little-endian length
    /// prefix, then exactly that many bytes, then decodes. The backing
    /// transport is a plain byte stream with no message boundaries of its
    /// own (unlike the message-mode named pipes the wire format was
    /// originally designed for), so framing is explicit rather than
    /// inferred from a short read. `Ok(None)` signals a disconnect (a
    /// clean EOF before any byte of the length prefix arrived).
    pub fn read_bytes(&mut self) -> IpcResult<Option<Vec<u8>>> {
        if self.disposed {
            return Ok(None);
        }
        let in_stream = match self.in_stream.as_deref_mut() {
            Some(s) => s,
            None => return Err(IpcError::config("channel has no in-stream to read from")),
        };

        let mut len_buf = [0u8; 4];
        if !read_exact(in_stream, &mut len_buf)? {
            return Ok(None);
        }
        let len = u32::from_le_bytes(len_buf) as usize;

        // Encoding (compression then encryption) can grow a message past
        // its plaintext `message_buffer_size`; bound the claimed frame
        // length generously rather than trusting it outright, so a
        // corrupt or hostile length prefix can't drive an unbounded
        // allocation.
        let max_len = self.message_buffer_size.saturating_mul(2).saturating_add(64);
        if len > max_len {
            return Err(IpcError::protocol(format!("frame length {len} exceeds maximum {max_len}")));
        }

        let mut message = vec![0u8; len];
        if !message.is_empty() && !read_exact(in_stream, &mut message)? {
            return Err(IpcError::Transport(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)));
        }

        self.decode_message(&message).map(Some)
    }

    pub fn read_utf8(&mut self) -> IpcResult<Option<String>> {
        match self.read_bytes()? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|err| IpcError::codec(format!("payload is not valid UTF-8: {err}"))),
            None => Ok(None),
        }
    }

    /// Runs the message loop described in §4.4: read, dispatch, optional
    /// reply, repeat until disconnect or a non-transient error.
    pub fn run_message_loop(&mut self, handler: &mut dyn ChannelHandler) -> IpcResult<()> {
        self.flush_write_cache()?;
        loop {
            match self.read_bytes() {
                Ok(Some(request)) => {
                    if let Some(response) = handler.on_data_received(&request) {
                        self.write_bytes(&response)?;
                    }
                }
                Ok(None) => {
                    debug!(self.log, "channel disconnected");
                    handler.on_disconnected();
                    self.dispose();
                    return Ok(());
                }
                Err(err) => {
                    warn!(self.log, "message loop error"; "error" => %err);
                    self.dispose();
                    return Err(err);
                }
            }
        }
    }

    /// After `dispose`, reads return `Ok(None)` and writes are no-ops.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if let Some(s) = self.in_stream.as_mut() {
            s.disconnect();
        }
        if let Some(s) = self.out_stream.as_mut() {
            s.disconnect();
        }
        self.write_cache.clear();
        self.disposed = true;
    }
}

impl Drop for DuplexChannel {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Pre-created listener pair for the server side of a named duplex
/// channel (§4.6.1 "Listener model"), reused directly by the server
/// multiplexer.
pub struct NamedChannelListener {
    base_name: String,
    in_listener: LocalListener,
    out_listener: LocalListener,
    cfg: ChannelConfig,
    key: Option<[u8; KEY_SIZE]>,
    log: Logger,
}

impl NamedChannelListener {
    pub fn bind(base_name: &str, cfg: ChannelConfig, key: Option<[u8; KEY_SIZE]>, log: Logger) -> IpcResult<Self> {
        let (in_name, out_name) = in_out_names(base_name);
        Ok(NamedChannelListener {
            base_name: base_name.to_string(),
            in_listener: LocalListener::bind(&in_name)?,
            out_listener: LocalListener::bind(&out_name)?,
            cfg,
            key,
            log,
        })
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Unblocks a thread parked in `accept` by opening and immediately
    /// dropping a spurious connection on the inbound half. Used by the
    /// server multiplexer's stop sequence to nudge a blocking accept loop
    /// toward noticing cancellation; best-effort, errors are ignored.
    pub fn wake(&self) {
        let (in_name, _) = in_out_names(&self.base_name);
        let _ = LocalTransport::connect(&in_name, Some(Duration::from_millis(50)));
    }

    /// Accepts one client: the inbound half first, then the outbound
    /// half. Per DESIGN.md decision D3, a failure to complete the
    /// outbound half tears the connection down as a transport error
    /// rather than raising a connected event.
    pub fn accept(&mut self, timeout: Option<Duration>) -> IpcResult<DuplexChannel> {
        let in_stream = self.in_listener.accept(timeout)?;
        let out_stream = match self.out_listener.accept(timeout) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(self.log, "outbound half failed to connect, tearing down"; "error" => %err);
                return Err(err);
            }
        };
        Ok(DuplexChannel::from_accepted(in_stream, out_stream, &self.cfg, self.key, self.log.clone()))
    }
}
