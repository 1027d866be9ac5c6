//! Server multiplexer (§4.6.1): accepts named-pipe duplex connections,
//! runs one read loop per client, and tracks connection bookkeeping under
//! a lock the way the teacher's `Endpoint` tracks its `live` set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ipc_channel_core::duplex::{ChannelConfig, ChannelHandler, DuplexChannel, NamedChannelListener};
use ipc_support::error::{IpcError, IpcResult};
use parking_lot::Mutex;
use slog::{debug, info, warn, Logger};

use crate::cancel::{CancelSource, CancelToken};
use crate::semaphore::Semaphore;

pub type ClientId = usize;

/// Mirrors §4.6.1's `{Idle → Starting → Started → Stopping → Stopped/Disposed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Starting,
    Started,
    Stopping,
    Stopped,
    Disposed,
}

/// Observer for the events enumerated in §6: connect/disconnect and the
/// per-message request/response contract. Implementations are shared
/// across every connection's read-loop thread.
pub trait ServerHandler: Send + Sync {
    fn on_client_connected(&self, _id: ClientId) {}
    fn on_client_disconnected(&self, _id: ClientId) {}
    fn on_message_received(&self, _id: ClientId, _request: &[u8]) -> Option<Vec<u8>> {
        None
    }
    fn on_message_loop_exception(&self, _id: ClientId, _err: &IpcError) {}
}

struct RelayHandler<H: ServerHandler> {
    id: ClientId,
    handler: Arc<H>,
}

impl<H: ServerHandler> ChannelHandler for RelayHandler<H> {
    fn on_data_received(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        self.handler.on_message_received(self.id, request)
    }

    fn on_disconnected(&mut self) {
        self.handler.on_client_disconnected(self.id);
    }
}

/// Per-connection record state (§3's `{ in_stream, out_stream, state }`),
/// distinct from the server-wide `ServerState`: `Listening` is just-accepted
/// and not yet on its read-loop thread, `Connected` is running
/// `run_message_loop`, `Draining` is mid-disconnect after `stop()` has
/// signalled it, and `Closed` is set right before the record is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Listening,
    Connected,
    Draining,
    Closed,
}

struct Connection {
    channel: Arc<Mutex<DuplexChannel>>,
    /// Captured before `channel` is ever wrapped in its mutex, so `stop()`
    /// can force a blocked read to return without contending for the same
    /// lock the connection's read-loop thread holds for the duration of
    /// `run_message_loop` (see `DuplexChannel::interrupt_handles`).
    interrupt: Vec<Box<dyn Fn() + Send + Sync>>,
    state: ConnectionState,
}

/// Server-side configuration (§6 tunables), distinct from a single
/// channel's `ChannelConfig` only in its default `message_buffer_size`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub channel: ChannelConfig,
    pub max_clients: usize,
    pub connection_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            channel: ChannelConfig {
                message_buffer_size: 4096,
                ..ChannelConfig::default()
            },
            max_clients: 16,
            connection_timeout: Duration::from_millis(500),
        }
    }
}

/// State shared between `IpcServer` and its background accept thread.
/// Wrapped in `Arc` so the accept thread can outlive the call that
/// spawned it without borrowing `IpcServer` itself.
struct Shared {
    base_name: String,
    cfg: ServerConfig,
    log: Logger,
    state: Mutex<ServerState>,
    connections: Mutex<HashMap<ClientId, Connection>>,
    next_id: AtomicUsize,
    clients_connected: AtomicUsize,
    shutdown: Semaphore,
    listener: Mutex<Option<NamedChannelListener>>,
}

/// Accepts and multiplexes any number of duplex clients (up to
/// `max_clients`) over one named pipe base name.
pub struct IpcServer {
    shared: Arc<Shared>,
    cancel: Mutex<Option<CancelSource>>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl IpcServer {
    pub fn new(base_name: &str, cfg: ServerConfig, log: Logger) -> Self {
        IpcServer {
            shared: Arc::new(Shared {
                base_name: base_name.to_string(),
                cfg,
                log,
                state: Mutex::new(ServerState::Idle),
                connections: Mutex::new(HashMap::new()),
                next_id: AtomicUsize::new(0),
                clients_connected: AtomicUsize::new(0),
                shutdown: Semaphore::new(0),
                listener: Mutex::new(None),
            }),
            cancel: Mutex::new(None),
            accept_thread: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.shared.state.lock()
    }

    pub fn clients_connected(&self) -> usize {
        self.shared.clients_connected.load(Ordering::SeqCst)
    }

    /// Current state of one connection record, or `None` once it has been
    /// removed from the connection table (after its read loop exits).
    pub fn connection_state(&self, id: ClientId) -> Option<ConnectionState> {
        self.shared.connections.lock().get(&id).map(|c| c.state)
    }

    /// Starts the accept loop on a background thread. Idempotent in
    /// `Idle`/`Stopped`; rejected while `Starting`/`Stopping`/`Disposed`.
    pub fn start<H: ServerHandler + 'static>(&self, handler: Arc<H>) -> IpcResult<()> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                ServerState::Idle | ServerState::Stopped => *state = ServerState::Starting,
                other => return Err(IpcError::config(format!("cannot start server from state {other:?}"))),
            }
        }

        let named_listener = NamedChannelListener::bind(
            &self.shared.base_name,
            self.shared.cfg.channel.clone(),
            None,
            self.shared.log.clone(),
        )?;
        *self.shared.listener.lock() = Some(named_listener);

        let cancel_source = CancelSource::new();
        let token = cancel_source.token();
        *self.cancel.lock() = Some(cancel_source);

        *self.shared.state.lock() = ServerState::Started;
        info!(self.shared.log, "server started"; "base_name" => &self.shared.base_name);

        let shared = self.shared.clone();
        let handle = std::thread::spawn(move || accept_loop(shared, token, handler));
        *self.accept_thread.lock() = Some(handle);
        Ok(())
    }

    /// Writes to every currently-connected client, skipping any write
    /// that errors (§4.6.1 "Broadcast & Send"). Not atomic across clients.
    pub fn broadcast(&self, data: &[u8]) {
        let connections = self.shared.connections.lock();
        for connection in connections.values() {
            let _ = connection.channel.lock().write_bytes(data);
        }
    }

    pub fn send(&self, client: ClientId, data: &[u8]) -> IpcResult<()> {
        let connections = self.shared.connections.lock();
        match connections.get(&client) {
            Some(connection) => connection.channel.lock().write_bytes(data),
            None => Err(IpcError::protocol(format!("no such client {client}"))),
        }
    }

    /// Cancels the accept loop and every connection's read loop, waiting
    /// up to 1000 ms for in-flight read loops to exit cleanly.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if matches!(*state, ServerState::Stopping | ServerState::Stopped | ServerState::Disposed) {
                return;
            }
            *state = ServerState::Stopping;
        }

        self.cancel.lock().take();

        let had_clients = {
            let mut connections = self.shared.connections.lock();
            for connection in connections.values_mut() {
                connection.state = ConnectionState::Draining;
                for handle in &connection.interrupt {
                    handle();
                }
            }
            !connections.is_empty()
        };

        if let Some(listener) = self.shared.listener.lock().as_ref() {
            listener.wake();
        }

        if had_clients {
            self.shared.shutdown.wait_timeout(Duration::from_millis(1000));
        }

        if let Some(handle) = self.accept_thread.lock().take() {
            let _ = handle.join();
        }

        *self.shared.state.lock() = ServerState::Stopped;
        info!(self.shared.log, "server stopped"; "base_name" => &self.shared.base_name);
    }
}

fn accept_loop<H: ServerHandler + 'static>(shared: Arc<Shared>, token: CancelToken, handler: Arc<H>) {
    loop {
        if token.is_cancelled() {
            break;
        }
        if shared.clients_connected.load(Ordering::SeqCst) >= shared.cfg.max_clients {
            std::thread::sleep(Duration::from_millis(25));
            continue;
        }

        let accepted = {
            let mut guard = shared.listener.lock();
            match guard.as_mut() {
                Some(listener) => listener.accept(Some(shared.cfg.connection_timeout)),
                None => break,
            }
        };

        if token.is_cancelled() {
            break;
        }

        match accepted {
            Ok(channel) => spawn_connection(shared.clone(), token.clone(), handler.clone(), channel),
            Err(err) if err.is_transient() => continue,
            Err(_) => continue,
        }
    }
}

fn spawn_connection<H: ServerHandler + 'static>(shared: Arc<Shared>, token: CancelToken, handler: Arc<H>, channel: DuplexChannel) {
    let id = shared.next_id.fetch_add(1, Ordering::SeqCst);
    shared.clients_connected.fetch_add(1, Ordering::SeqCst);
    handler.on_client_connected(id);
    debug!(shared.log, "client connected"; "client_id" => id);

    let interrupt = channel.interrupt_handles();
    let wrapped = Arc::new(Mutex::new(channel));
    shared.connections.lock().insert(
        id,
        Connection { channel: wrapped.clone(), interrupt, state: ConnectionState::Listening },
    );

    std::thread::spawn(move || {
        if let Some(connection) = shared.connections.lock().get_mut(&id) {
            connection.state = ConnectionState::Connected;
        }

        let mut relay = RelayHandler { id, handler: handler.clone() };
        let result = wrapped.lock().run_message_loop(&mut relay);
        if let Err(err) = &result {
            handler.on_message_loop_exception(id, err);
            warn!(shared.log, "message loop exception"; "client_id" => id, "error" => %err);
        }

        if let Some(connection) = shared.connections.lock().get_mut(&id) {
            connection.state = ConnectionState::Closed;
        }
        shared.connections.lock().remove(&id);
        shared.clients_connected.fetch_sub(1, Ordering::SeqCst);
        if token.is_cancelled() && shared.clients_connected.load(Ordering::SeqCst) == 0 {
            shared.shutdown.release();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipc_channel_core::duplex::DuplexChannel;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::time::Duration as StdDuration;

    struct EchoHandler {
        connects: StdAtomicUsize,
        disconnects: StdAtomicUsize,
    }

    impl ServerHandler for EchoHandler {
        fn on_client_connected(&self, _id: ClientId) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }
        fn on_client_disconnected(&self, _id: ClientId) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        fn on_message_received(&self, _id: ClientId, request: &[u8]) -> Option<Vec<u8>> {
            Some(request.to_vec())
        }
    }

    fn unique_base(tag: &str) -> String {
        format!("ipc-test-server-{tag}-{}", ipc_transport::local::anonymous_pipe_id())
    }

    #[test]
    fn two_clients_exchange_many_messages_in_order() {
        let base = unique_base("multi");
        let server = IpcServer::new(
            &base,
            ServerConfig::default(),
            ipc_support::logging::discard(),
        );
        let handler = Arc::new(EchoHandler {
            connects: StdAtomicUsize::new(0),
            disconnects: StdAtomicUsize::new(0),
        });
        server.start(handler.clone()).unwrap();

        let channel_cfg = ServerConfig::default().channel;
        let base2 = base.clone();
        let cfg2 = channel_cfg.clone();
        let client_a = std::thread::spawn(move || {
            let mut channel =
                DuplexChannel::connect_named(&base2, ipc_channel_core::duplex::Direction::InOut, &cfg2, None, Some(StdDuration::from_secs(2))).unwrap();
            for i in 0..20u32 {
                channel.write_bytes(&i.to_le_bytes()).unwrap();
                let reply = channel.read_bytes().unwrap().unwrap();
                assert_eq!(reply, i.to_le_bytes());
            }
        });

        let base3 = base.clone();
        let cfg3 = channel_cfg;
        let client_b = std::thread::spawn(move || {
            let mut channel =
                DuplexChannel::connect_named(&base3, ipc_channel_core::duplex::Direction::InOut, &cfg3, None, Some(StdDuration::from_secs(2))).unwrap();
            for i in 0..20u32 {
                channel.write_bytes(&i.to_le_bytes()).unwrap();
                let reply = channel.read_bytes().unwrap().unwrap();
                assert_eq!(reply, i.to_le_bytes());
            }
        });

        client_a.join().unwrap();
        client_b.join().unwrap();

        server.stop();
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(server.clients_connected(), 0);
    }

    #[test]
    fn connection_state_tracks_connect_and_removal() {
        let base = unique_base("conn-state");
        let server = IpcServer::new(&base, ServerConfig::default(), ipc_support::logging::discard());
        let handler = Arc::new(EchoHandler {
            connects: StdAtomicUsize::new(0),
            disconnects: StdAtomicUsize::new(0),
        });
        server.start(handler.clone()).unwrap();

        let cfg = ServerConfig::default().channel;
        let mut channel = DuplexChannel::connect_named(
            &base,
            ipc_channel_core::duplex::Direction::InOut,
            &cfg,
            None,
            Some(StdDuration::from_secs(2)),
        )
        .unwrap();

        let id: ClientId = 0;
        let deadline = std::time::Instant::now() + StdDuration::from_secs(2);
        while server.connection_state(id) != Some(ConnectionState::Connected) {
            assert!(std::time::Instant::now() < deadline, "connection never reached Connected");
            std::thread::sleep(StdDuration::from_millis(5));
        }

        channel.write_bytes(b"ping").unwrap();
        assert_eq!(channel.read_bytes().unwrap().unwrap(), b"ping");

        drop(channel);
        let deadline = std::time::Instant::now() + StdDuration::from_secs(2);
        while server.connection_state(id).is_some() {
            assert!(std::time::Instant::now() < deadline, "connection record never removed");
            std::thread::sleep(StdDuration::from_millis(5));
        }

        server.stop();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[test]
    fn start_twice_without_stop_is_rejected() {
        let base = unique_base("double-start");
        let server = IpcServer::new(&base, ServerConfig::default(), ipc_support::logging::discard());
        let handler = Arc::new(EchoHandler {
            connects: StdAtomicUsize::new(0),
            disconnects: StdAtomicUsize::new(0),
        });
        server.start(handler.clone()).unwrap();
        assert!(server.start(handler).is_err());
        server.stop();
    }
}
