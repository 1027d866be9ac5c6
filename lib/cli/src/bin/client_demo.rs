//! Demo client endpoint binary: connects to a running server demo and
//! sends lines typed on stdin, printing each echoed reply.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ipc_server::{ClientConfig, ClientHandler, IpcClientEndpoint};
use ipc_support::config::IpcConfig;
use ipc_support::logging::{self, LoggingConfig};
use slog::info;

#[derive(Parser)]
#[command(name = "ipc-client-demo", about = "Connects to a demo IPC server multiplexer")]
struct Args {
    /// Base pipe name matching the server demo's argument
    base_name: String,

    /// Optional JSON config file (see ipc_support::config::IpcConfig)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disable the polling-reconnect loop (one-shot connect)
    #[arg(long)]
    no_reconnect: bool,
}

struct PrintingHandler {
    log: slog::Logger,
}

impl ClientHandler for PrintingHandler {
    fn on_server_connected(&self) {
        info!(self.log, "connected to server");
    }

    fn on_server_disconnected(&self) {
        info!(self.log, "disconnected from server");
    }

    fn on_message_received(&self, request: &[u8]) -> Option<Vec<u8>> {
        println!("server: {}", String::from_utf8_lossy(request));
        None
    }
}

fn main() {
    let args = Args::parse();
    let log = logging::init(&LoggingConfig::default()).expect("failed to initialize logging");

    let cfg = match &args.config {
        Some(path) => IpcConfig::load(path).expect("failed to load config file"),
        None => IpcConfig::default(),
    };

    let client_cfg = ClientConfig {
        channel: ipc_channel_core::ChannelConfig {
            message_buffer_size: cfg.message_buffer_size,
            write_cache_capacity: cfg.write_cache_capacity,
            use_encryption: cfg.use_encryption,
            use_compression: cfg.use_compression,
        },
        connection_timeout: cfg.connection_timeout(),
        reconnect_polling_interval: if args.no_reconnect {
            None
        } else {
            Some(cfg.reconnect_polling_interval())
        },
    };

    let client = IpcClientEndpoint::new(&args.base_name, client_cfg, log.clone());
    client
        .start(Arc::new(PrintingHandler { log: log.clone() }))
        .expect("failed to start client");

    info!(log, "client demo running, type a line to send it, `quit` to stop");

    std::thread::sleep(Duration::from_millis(200));

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        match line {
            Ok(line) if line.trim() == "quit" => break,
            Ok(line) => {
                if !client.is_connected() {
                    println!("not connected yet, dropping input");
                    continue;
                }
                if let Err(err) = client.send(line.as_bytes()) {
                    println!("send failed: {err}");
                }
            }
            Err(_) => break,
        }
    }

    client.stop();
}
