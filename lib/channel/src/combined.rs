//! Combined channel: the bootstrap key handshake over an anonymous pipe,
//! followed by a switch to an encrypted, compressed named-pipe channel
//! (§4.5).

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use ipc_core::KeyPack;
use ipc_support::error::{IpcError, IpcResult};
use ipc_transport::local::{anonymous_pipe_id, LocalListener, LocalTransport};
use ipc_transport::{Transport, TransportListener};
use slog::Logger;

use crate::duplex::{ChannelConfig, Direction, DuplexChannel, NamedChannelListener};

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs `f` on a worker thread, failing with [`IpcError::Timeout`] if it
/// has not produced a result within `timeout`. The worker is not
/// cancelled on timeout (the underlying blocking I/O has no cooperative
/// cancellation); it is abandoned and its result discarded.
fn with_timeout<T: Send + 'static>(timeout: Duration, f: impl FnOnce() -> IpcResult<T> + Send + 'static) -> IpcResult<T> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(IpcError::timeout("operation did not complete in time")),
    }
}

/// A request/notify timer shares the channel with a background reader via
/// a mutex rather than a raw pointer: if the timeout elapses before the
/// read completes, the reader thread is simply abandoned holding the
/// lock, and the channel is unusable (every future call blocks on that
/// lock) until the abandoned read eventually returns. This is the same
/// "lost cause after a timeout" outcome the spec's own one-shot timer
/// produces; callers are expected to treat a timed-out request/notify
/// channel as failed.
type SharedChannel = Arc<Mutex<DuplexChannel>>;

/// The spawner side of the bootstrap handshake: creates the anonymous
/// pipe, writes the key pack, then starts (and owns) the named channel.
pub struct CombinedChannelServer {
    anonymous_listener: LocalListener,
    initial_pipe_id: String,
    channel: SharedChannel,
    key_pack: KeyPack,
}

impl CombinedChannelServer {
    /// Creates the outbound anonymous pipe and the named channel server
    /// side, but does not yet spawn the child or hand off the key pack;
    /// call [`Self::handshake`] once the child has been spawned with
    /// `initial_pipe_id()` on its command line.
    pub fn bind(base_name: &str, cfg: ChannelConfig, log: Logger) -> IpcResult<(Self, NamedChannelListener)> {
        let initial_pipe_id = anonymous_pipe_id();
        let anonymous_listener = LocalListener::bind(&initial_pipe_id)?;

        let channel_key = ipc_core::AesCbcCodec::new();
        let key_pack = channel_key.key_pack();
        let named_listener = NamedChannelListener::bind(base_name, cfg, Some(*channel_key.get_key()), log)?;

        Ok((
            CombinedChannelServer {
                anonymous_listener,
                initial_pipe_id,
                // Placeholder until `handshake` accepts the real client
                // connection; never read from or written to before that.
                channel: Arc::new(Mutex::new(DuplexChannel::from_stream(
                    Box::new(NullTransport),
                    &ChannelConfig::default(),
                    None,
                ))),
                key_pack,
            },
            named_listener,
        ))
    }

    pub fn initial_pipe_id(&self) -> &str {
        &self.initial_pipe_id
    }

    /// Writes the key pack to the anonymous pipe (accepting its single
    /// connection), then accepts the named channel's first client and
    /// adopts it as the main channel.
    pub fn handshake(&mut self, named_listener: &mut NamedChannelListener, timeout: Option<Duration>) -> IpcResult<()> {
        let mut anon = self.anonymous_listener.accept(timeout)?;
        anon.write(&self.key_pack.to_bytes())?;
        anon.disconnect();

        let channel = named_listener.accept(timeout)?;
        self.channel = Arc::new(Mutex::new(channel));
        Ok(())
    }

    /// Re-sends the key pack on a fresh anonymous-pipe connection, used
    /// when the spawned child process is replaced.
    pub fn reinitialize(&mut self, timeout: Option<Duration>) -> IpcResult<()> {
        let mut anon = self.anonymous_listener.accept(timeout)?;
        anon.write(&self.key_pack.to_bytes())?;
        anon.disconnect();
        Ok(())
    }

    pub fn request(&mut self, data: &[u8], timeout: Duration) -> IpcResult<Vec<u8>> {
        request_over(&self.channel, data, timeout)
    }

    pub fn notify(&mut self, data: &[u8], timeout: Duration) -> IpcResult<()> {
        notify_over(&self.channel, data, timeout)
    }

    pub fn with_channel<R>(&self, f: impl FnOnce(&mut DuplexChannel) -> R) -> R {
        f(&mut self.channel.lock().unwrap())
    }
}

/// The spawned side of the bootstrap handshake: attaches to the inherited
/// anonymous pipe, reads the key pack, then connects the named channel.
pub struct CombinedChannelClient {
    channel: SharedChannel,
}

impl CombinedChannelClient {
    pub fn attach(pipe_id: &str, base_name: &str, cfg: ChannelConfig) -> IpcResult<Self> {
        Self::attach_with_timeout(pipe_id, base_name, cfg, DEFAULT_HANDSHAKE_TIMEOUT)
    }

    pub fn attach_with_timeout(pipe_id: &str, base_name: &str, cfg: ChannelConfig, timeout: Duration) -> IpcResult<Self> {
        let pipe_id_owned = pipe_id.to_string();
        let cfg_for_read = cfg.clone();

        let pack = with_timeout(timeout, move || -> IpcResult<KeyPack> {
            let mut anon = LocalTransport::connect(&pipe_id_owned, Some(timeout))?;
            let mut buf = [0u8; ipc_core::KEY_PACK_SIZE];
            let mut read = 0;
            while read < buf.len() {
                let n = anon.read(&mut buf[read..])?;
                if n == 0 {
                    return Err(IpcError::timeout("bootstrap pipe closed before full key pack was read"));
                }
                read += n;
            }
            let _ = &cfg_for_read;
            KeyPack::from_bytes(&buf)
        })?;

        let channel = DuplexChannel::connect_named(base_name, Direction::InOut, &cfg, Some(pack.key), Some(timeout))?;

        Ok(CombinedChannelClient {
            channel: Arc::new(Mutex::new(channel)),
        })
    }

    pub fn request(&mut self, data: &[u8], timeout: Duration) -> IpcResult<Vec<u8>> {
        request_over(&self.channel, data, timeout)
    }

    pub fn notify(&mut self, data: &[u8], timeout: Duration) -> IpcResult<()> {
        notify_over(&self.channel, data, timeout)
    }

    pub fn with_channel<R>(&self, f: impl FnOnce(&mut DuplexChannel) -> R) -> R {
        f(&mut self.channel.lock().unwrap())
    }
}

fn request_over(channel: &SharedChannel, data: &[u8], timeout: Duration) -> IpcResult<Vec<u8>> {
    channel.lock().unwrap().write_bytes(data)?;
    match wait_for_reply(channel, timeout)? {
        Some(reply) => Ok(reply),
        None => Err(IpcError::timeout("request: peer disconnected before replying")),
    }
}

fn notify_over(channel: &SharedChannel, data: &[u8], timeout: Duration) -> IpcResult<()> {
    let _ = timeout;
    channel.lock().unwrap().write_bytes(data)
}

fn wait_for_reply(channel: &SharedChannel, timeout: Duration) -> IpcResult<Option<Vec<u8>>> {
    let channel = channel.clone();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let result = channel.lock().unwrap().read_bytes();
        let _ = tx.send(result);
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(IpcError::timeout("request/notify timed out waiting for reply")),
    }
}

/// A transport placeholder used only before a real connection has been
/// accepted; any use before replacement is a programming error.
struct NullTransport;
impl Transport for NullTransport {
    fn is_connected(&self) -> bool {
        false
    }
    fn read(&mut self, _buf: &mut [u8]) -> IpcResult<usize> {
        Err(IpcError::config("combined channel used before handshake completed"))
    }
    fn write(&mut self, _buf: &[u8]) -> IpcResult<()> {
        Err(IpcError::config("combined channel used before handshake completed"))
    }
    fn disconnect(&mut self) {}
}
