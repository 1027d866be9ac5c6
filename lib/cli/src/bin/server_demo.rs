//! Demo server multiplexer binary: binds a named channel base name and
//! echoes every message it receives back to the sending client, logging
//! connects/disconnects. Modernized from the teacher's clap 2.x `App`
//! binaries (`gen_keys`, `test_listen`) into clap 4 derive style.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use ipc_server::{IpcServer, ServerConfig, ServerHandler};
use ipc_support::config::IpcConfig;
use ipc_support::logging::{self, LoggingConfig};
use slog::info;

#[derive(Parser)]
#[command(name = "ipc-server-demo", about = "Runs a demo IPC server multiplexer")]
struct Args {
    /// Base pipe name; the real endpoints are "<BASE>-IN" and "<BASE>-OUT"
    base_name: String,

    /// Optional JSON config file (see ipc_support::config::IpcConfig)
    #[arg(long)]
    config: Option<PathBuf>,
}

struct EchoHandler {
    log: slog::Logger,
}

impl ServerHandler for EchoHandler {
    fn on_client_connected(&self, id: usize) {
        info!(self.log, "client connected"; "client_id" => id);
    }

    fn on_client_disconnected(&self, id: usize) {
        info!(self.log, "client disconnected"; "client_id" => id);
    }

    fn on_message_received(&self, id: usize, request: &[u8]) -> Option<Vec<u8>> {
        info!(self.log, "message received"; "client_id" => id, "bytes" => request.len());
        Some(request.to_vec())
    }
}

fn main() {
    let args = Args::parse();
    let log = logging::init(&LoggingConfig::default()).expect("failed to initialize logging");

    let cfg = match &args.config {
        Some(path) => IpcConfig::load(path).expect("failed to load config file"),
        None => IpcConfig::for_multiplexer(),
    };

    let server_cfg = ServerConfig {
        channel: ipc_channel_core::ChannelConfig {
            message_buffer_size: cfg.message_buffer_size,
            write_cache_capacity: cfg.write_cache_capacity,
            use_encryption: cfg.use_encryption,
            use_compression: cfg.use_compression,
        },
        max_clients: cfg.max_clients,
        connection_timeout: cfg.connection_timeout(),
    };

    let server = IpcServer::new(&args.base_name, server_cfg, log.clone());
    server
        .start(Arc::new(EchoHandler { log: log.clone() }))
        .expect("failed to start server");

    info!(log, "server demo running, type `quit` and press enter to stop"; "base_name" => &args.base_name);

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        if let Ok(line) = line {
            if line.trim() == "quit" {
                break;
            }
        } else {
            break;
        }
    }

    server.stop();
}
