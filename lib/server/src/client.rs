//! Client endpoint (§4.6.2): connects to a server multiplexer's named
//! pipe pair, optionally polling to reconnect, and runs a message loop
//! mirroring the server's read loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ipc_channel_core::duplex::{ChannelConfig, Direction, DuplexChannel};
use ipc_support::error::{IpcError, IpcResult};
use parking_lot::Mutex;
use slog::{debug, info, warn, Logger};

use crate::cancel::{CancelSource, CancelToken};
use crate::semaphore::Semaphore;

/// Mirrors §4.6.2's `{Idle → Starting → Connected/Reconnecting → Stopping → Stopped}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Starting,
    Connected,
    Reconnecting,
    Stopping,
    Stopped,
}

pub trait ClientHandler: Send + Sync {
    fn on_server_connected(&self) {}
    fn on_server_disconnected(&self) {}
    fn on_message_received(&self, _request: &[u8]) -> Option<Vec<u8>> {
        None
    }
    fn on_message_loop_exception(&self, _err: &ipc_support::error::IpcError) {}
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub channel: ChannelConfig,
    pub connection_timeout: Duration,
    /// `Some(interval)` selects polling-reconnect mode; `None` selects
    /// one-shot connect (a single attempt, after which a failure leaves
    /// the endpoint `Stopped`).
    pub reconnect_polling_interval: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            channel: ChannelConfig::default(),
            connection_timeout: Duration::from_millis(500),
            reconnect_polling_interval: Some(Duration::from_millis(500)),
        }
    }
}

struct Shared {
    base_name: String,
    cfg: ClientConfig,
    log: Logger,
    state: Mutex<ClientState>,
    connected: AtomicBool,
    shutdown: Semaphore,
    channel: Mutex<Option<DuplexChannel>>,
    /// Populated right after each connect, before `channel` is ever
    /// locked by the read loop, so `stop()` can cancel a blocked read
    /// without contending for `channel`'s lock (see
    /// `DuplexChannel::interrupt_handles`).
    interrupt: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
}

/// Connects to a server multiplexer and runs its message loop, optionally
/// on a background polling-reconnect task.
pub struct IpcClientEndpoint {
    shared: Arc<Shared>,
    cancel: Mutex<Option<CancelSource>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IpcClientEndpoint {
    pub fn new(base_name: &str, cfg: ClientConfig, log: Logger) -> Self {
        IpcClientEndpoint {
            shared: Arc::new(Shared {
                base_name: base_name.to_string(),
                cfg,
                log,
                state: Mutex::new(ClientState::Idle),
                connected: AtomicBool::new(false),
                shutdown: Semaphore::new(0),
                channel: Mutex::new(None),
                interrupt: Mutex::new(Vec::new()),
            }),
            cancel: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ClientState {
        *self.shared.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Writes to the active connection, if any. Mirrors the combined
    /// channel's `notify` contract but without a timer: callers drive
    /// their own timeout if they need one.
    pub fn send(&self, data: &[u8]) -> IpcResult<()> {
        let mut guard = self.shared.channel.lock();
        match guard.as_mut() {
            Some(channel) => channel.write_bytes(data),
            None => Err(IpcError::protocol("client endpoint is not connected")),
        }
    }

    /// Starts the endpoint. In polling-reconnect mode this spawns a
    /// long-running task that keeps attempting to (re)connect whenever
    /// disconnected; in one-shot mode a single failed attempt leaves the
    /// endpoint `Stopped` without spawning anything further.
    pub fn start<H: ClientHandler + 'static>(&self, handler: Arc<H>) -> IpcResult<()> {
        {
            let mut state = self.shared.state.lock();
            *state = ClientState::Starting;
        }

        let cancel_source = CancelSource::new();
        let token = cancel_source.token();
        *self.cancel.lock() = Some(cancel_source);

        let shared = self.shared.clone();
        let worker = std::thread::spawn(move || client_loop(shared, token, handler));
        *self.worker.lock() = Some(worker);
        Ok(())
    }

    /// Cancels any in-flight reconnect loop, disposes the active
    /// connection, and waits up to 2500 ms for the worker thread to exit.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if matches!(*state, ClientState::Stopping | ClientState::Stopped) {
                return;
            }
            *state = ClientState::Stopping;
        }

        self.cancel.lock().take();
        for handle in self.shared.interrupt.lock().drain(..) {
            handle();
        }
        self.shared.shutdown.wait_timeout(Duration::from_millis(2500));

        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }

        *self.shared.state.lock() = ClientState::Stopped;
        info!(self.shared.log, "client stopped"; "base_name" => &self.shared.base_name);
    }
}

fn client_loop<H: ClientHandler + 'static>(shared: Arc<Shared>, token: CancelToken, handler: Arc<H>) {
    loop {
        if token.is_cancelled() {
            break;
        }

        let connected = DuplexChannel::connect_named(
            &shared.base_name,
            Direction::InOut,
            &shared.cfg.channel,
            None,
            Some(shared.cfg.connection_timeout),
        );

        match connected {
            Ok(channel) => {
                *shared.interrupt.lock() = channel.interrupt_handles();
                *shared.channel.lock() = Some(channel);
                *shared.state.lock() = ClientState::Connected;
                shared.connected.store(true, Ordering::SeqCst);
                handler.on_server_connected();
                debug!(shared.log, "server connected"; "base_name" => &shared.base_name);

                // Each iteration re-locks the channel rather than holding
                // it for the whole loop, so `send` can interleave a write
                // between reads; a read still occupies the lock for its
                // full blocking duration.
                loop {
                    if token.is_cancelled() {
                        break;
                    }

                    let read_result = {
                        let mut guard = shared.channel.lock();
                        match guard.as_mut() {
                            Some(channel) => channel.read_bytes(),
                            None => break,
                        }
                    };

                    match read_result {
                        Ok(Some(request)) => {
                            if let Some(response) = handler.on_message_received(&request) {
                                let mut guard = shared.channel.lock();
                                if let Some(channel) = guard.as_mut() {
                                    let _ = channel.write_bytes(&response);
                                }
                            }
                        }
                        Ok(None) => {
                            handler.on_server_disconnected();
                            break;
                        }
                        Err(err) => {
                            handler.on_message_loop_exception(&err);
                            warn!(shared.log, "message loop exception"; "error" => %err);
                            break;
                        }
                    }
                }

                shared.connected.store(false, Ordering::SeqCst);
                *shared.channel.lock() = None;
            }
            Err(err) => {
                warn!(shared.log, "connect attempt failed"; "error" => %err);
            }
        }

        if token.is_cancelled() {
            break;
        }

        match shared.cfg.reconnect_polling_interval {
            Some(interval) => {
                *shared.state.lock() = ClientState::Reconnecting;
                std::thread::sleep(interval);
            }
            None => break,
        }
    }

    shared.shutdown.release();
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipc_channel_core::duplex::{ChannelHandler, NamedChannelListener};
    use std::sync::atomic::AtomicUsize;

    struct Recorder {
        connects: AtomicUsize,
    }
    impl ClientHandler for Recorder {
        fn on_server_connected(&self) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }
        fn on_message_received(&self, request: &[u8]) -> Option<Vec<u8>> {
            Some(request.to_vec())
        }
    }

    struct Echo;
    impl ChannelHandler for Echo {
        fn on_data_received(&mut self, request: &[u8]) -> Option<Vec<u8>> {
            Some(request.to_vec())
        }
    }

    fn unique_base(tag: &str) -> String {
        format!("ipc-test-client-{tag}-{}", ipc_transport::local::anonymous_pipe_id())
    }

    #[test]
    fn one_shot_client_connects_once_then_stops() {
        let base = unique_base("oneshot");
        let mut listener =
            NamedChannelListener::bind(&base, ChannelConfig::default(), None, ipc_support::logging::discard()).unwrap();

        let server = std::thread::spawn(move || {
            let mut channel = listener.accept(None).unwrap();
            let mut handler = Echo;
            let _ = channel.run_message_loop(&mut handler);
        });

        let cfg = ClientConfig {
            reconnect_polling_interval: None,
            ..ClientConfig::default()
        };
        let client = IpcClientEndpoint::new(&base, cfg, ipc_support::logging::discard());
        let handler = Arc::new(Recorder { connects: AtomicUsize::new(0) });
        client.start(handler.clone()).unwrap();

        std::thread::sleep(Duration::from_millis(300));
        assert!(client.is_connected());

        client.stop();
        assert_eq!(client.state(), ClientState::Stopped);
        server.join().unwrap();
    }
}
