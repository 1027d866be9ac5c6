use crate::error::{IpcError, IpcResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// The tunable parameters enumerated for the duplex channel, combined
/// channel and server multiplexer. Loaded the way the teacher's
/// authenticator service loads its own config: a JSON file read in whole
/// and deserialized with `serde_json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    pub message_buffer_size: usize,
    pub max_clients: usize,
    pub connection_timeout_ms: u64,
    pub reconnect_polling_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub use_encryption: bool,
    pub use_compression: bool,
    /// Maximum number of queued messages a not-yet-connected server-side
    /// channel will buffer before refusing further writes.
    pub write_cache_capacity: usize,
}

impl Default for IpcConfig {
    fn default() -> Self {
        IpcConfig {
            message_buffer_size: 65536,
            max_clients: 16,
            connection_timeout_ms: 500,
            reconnect_polling_interval_ms: 500,
            request_timeout_ms: 5000,
            use_encryption: true,
            use_compression: true,
            write_cache_capacity: 256,
        }
    }
}

impl IpcConfig {
    /// Default tunables for the server multiplexer, whose message buffer
    /// defaults to 4096 rather than the channel's 65536 (per spec).
    pub fn for_multiplexer() -> Self {
        IpcConfig {
            message_buffer_size: 4096,
            ..IpcConfig::default()
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn reconnect_polling_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_polling_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn load(path: impl AsRef<Path>) -> IpcResult<Self> {
        let contents = fs::read_to_string(path).map_err(|err| IpcError::config(err.to_string()))?;
        serde_json::from_str(&contents).map_err(|err| IpcError::config(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = IpcConfig::default();
        assert_eq!(cfg.message_buffer_size, 65536);
        assert_eq!(cfg.max_clients, 16);
        assert_eq!(cfg.connection_timeout_ms, 500);
        assert_eq!(cfg.reconnect_polling_interval_ms, 500);
        assert_eq!(cfg.request_timeout_ms, 5000);
        assert!(cfg.use_encryption);
        assert!(cfg.use_compression);
    }

    #[test]
    fn multiplexer_defaults_to_4096_buffer() {
        assert_eq!(IpcConfig::for_multiplexer().message_buffer_size, 4096);
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let cfg: IpcConfig = serde_json::from_str(r#"{"max_clients": 4}"#).unwrap();
        assert_eq!(cfg.max_clients, 4);
        assert_eq!(cfg.message_buffer_size, IpcConfig::default().message_buffer_size);
    }

    #[test]
    fn load_from_file_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ipc.json");
        fs::write(&path, r#"{"max_clients": 32, "use_compression": false}"#).unwrap();

        let cfg = IpcConfig::load(&path).unwrap();
        assert_eq!(cfg.max_clients, 32);
        assert!(!cfg.use_compression);
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = IpcConfig::load("/nonexistent/path/ipc.json").unwrap_err();
        assert!(matches!(err, IpcError::Config(_)));
    }
}
