//! End-to-end combined-channel handshake: spawner creates the server side,
//! the "spawned" side attaches using the handle string, reads the 48-byte
//! key pack, establishes the named channel, and the two exchange
//! `"HELLO"`/`"OK"` over the now-encrypted channel.

use std::time::Duration;

use ipc_channel_core::combined::{CombinedChannelClient, CombinedChannelServer};
use ipc_channel_core::duplex::ChannelConfig;
use ipc_transport::local::anonymous_pipe_id;

#[test]
fn handshake_then_hello_ok_round_trip() {
    let base = format!("ipc-it-combined-{}", anonymous_pipe_id());
    let cfg = ChannelConfig::default();

    let (mut server, mut named_listener) =
        CombinedChannelServer::bind(&base, cfg.clone(), ipc_support::logging::discard()).unwrap();
    let pipe_id = server.initial_pipe_id().to_string();

    let server_thread = std::thread::spawn(move || {
        server
            .handshake(&mut named_listener, Some(Duration::from_secs(2)))
            .unwrap();
        server.with_channel(|channel| {
            let request = channel.read_bytes().unwrap().unwrap();
            assert_eq!(request, b"HELLO");
            channel.write_bytes(b"OK").unwrap();
        });
        server
    });

    let client =
        CombinedChannelClient::attach_with_timeout(&pipe_id, &base, cfg, Duration::from_secs(2)).unwrap();
    client.with_channel(|channel| {
        channel.write_bytes(b"HELLO").unwrap();
        let reply = channel.read_bytes().unwrap().unwrap();
        assert_eq!(reply, b"OK");
    });

    let _server = server_thread.join().unwrap();
}
