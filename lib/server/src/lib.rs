pub mod cancel;
pub mod client;
pub mod semaphore;
pub mod server;

pub use client::{ClientConfig, ClientHandler, ClientState, IpcClientEndpoint};
pub use server::{ClientId, ConnectionState, IpcServer, ServerConfig, ServerHandler, ServerState};
