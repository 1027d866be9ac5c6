//! Ambient stack shared by the rest of the workspace: logging, config
//! loading, the crate-wide error taxonomy, and a timestamp helper.

pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use config::IpcConfig;
pub use error::{IpcError, IpcResult};
