//! Server concurrency scenario: two clients against the default
//! `max_clients = 16`, each sending 100 messages; the server echoes every
//! one and both clients see their own 100 replies in order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ipc_channel_core::duplex::{ChannelConfig, Direction, DuplexChannel};
use ipc_server::{ClientId, IpcServer, ServerConfig, ServerHandler, ServerState};

struct EchoHandler {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
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
    format!("ipc-it-server-{tag}-{}", ipc_transport::local::anonymous_pipe_id())
}

fn run_client(base: String, cfg: ChannelConfig, tag: u32) {
    let mut channel = DuplexChannel::connect_named(
        &base,
        Direction::InOut,
        &cfg,
        None,
        Some(Duration::from_secs(5)),
    )
    .unwrap();

    for i in 0..100u32 {
        let payload = (tag, i);
        let mut bytes = Vec::with_capacity(8);
        bytes.extend_from_slice(&payload.0.to_le_bytes());
        bytes.extend_from_slice(&payload.1.to_le_bytes());
        channel.write_bytes(&bytes).unwrap();
        let reply = channel.read_bytes().unwrap().unwrap();
        assert_eq!(reply, bytes, "reply {i} out of order or corrupted for client {tag}");
    }
}

#[test]
fn two_clients_send_one_hundred_messages_each_under_default_max_clients() {
    let base = unique_base("concurrency");
    let cfg = ServerConfig::default();
    assert_eq!(cfg.max_clients, 16);

    let server = IpcServer::new(&base, cfg.clone(), ipc_support::logging::discard());
    let handler = Arc::new(EchoHandler {
        connects: AtomicUsize::new(0),
        disconnects: AtomicUsize::new(0),
    });
    server.start(handler.clone()).unwrap();

    let channel_cfg = cfg.channel.clone();
    let base_a = base.clone();
    let cfg_a = channel_cfg.clone();
    let client_a = std::thread::spawn(move || run_client(base_a, cfg_a, 1));

    let base_b = base.clone();
    let cfg_b = channel_cfg;
    let client_b = std::thread::spawn(move || run_client(base_b, cfg_b, 2));

    client_a.join().unwrap();
    client_b.join().unwrap();

    server.stop();
    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(server.clients_connected(), 0);
    assert_eq!(handler.connects.load(Ordering::SeqCst), 2);
    assert_eq!(handler.disconnects.load(Ordering::SeqCst), 2);
}
