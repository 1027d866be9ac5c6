use sloggers::{Config, LoggerConfig};
use std::io;

/// Destination for the process-wide logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogDestination {
    Stderr,
    Stdout,
}

impl Default for LogDestination {
    fn default() -> Self {
        LogDestination::Stderr
    }
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub destination: LogDestination,
    /// Emit newline-delimited JSON instead of the human-oriented terminal format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".into(),
            destination: LogDestination::Stderr,
            json: false,
        }
    }
}

/// Builds the process-wide logger from a [`LoggingConfig`].
///
/// Mirrors the teacher's pattern of hand-assembling a `sloggers::Config`
/// from a small set of known fields rather than exposing the full
/// `sloggers` config surface.
pub fn init(cfg: &LoggingConfig) -> io::Result<slog::Logger> {
    let destination = match cfg.destination {
        LogDestination::Stderr => "stderr",
        LogDestination::Stdout => "stdout",
    };
    let kind = if cfg.json { "json" } else { "terminal" };

    let toml = format!(
        "type = \"{kind}\"\nlevel = \"{level}\"\ndestination = \"{destination}\"\n",
        kind = kind,
        level = cfg.level,
        destination = destination,
    );

    let config: LoggerConfig =
        serdeconv::from_toml_str(&toml).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

    config
        .build_logger()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
}

/// Convenience logger for unit tests and doctests; discards everything.
pub fn discard() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}
