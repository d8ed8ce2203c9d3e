//! Static bridge configuration file parser.
//!
//! Parses a `key = value` format, same shape as the teacher's `ac_client.conf`,
//! but for the handful of settings that are genuinely static for the life of
//! the process. Everything that changes at runtime (selected port, baud,
//! streaming flag, sentence cadence) lives in [`crate::state::PersistedConfig`]
//! instead.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};

const DEFAULT_UDP_SINK: &str = "host.docker.internal:27000";
const HISTORY_WINDOW_SECS: u64 = 900;

/// Static settings read once at startup.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Where the persisted state document ([`crate::state::PersistedConfig`])
    /// lives on disk.
    pub state_path: PathBuf,
    /// UDP fan-out destination. Defaults to `host.docker.internal:27000`
    /// (spec.md §4.7); overridable for hosts without Docker's internal DNS.
    pub udp_sink: String,
    /// How long a history series retains entries, in seconds (spec.md §3: 15
    /// minutes).
    pub history_window_secs: u64,
    /// Size of the most-recent-first raw-message ring buffer (spec.md §4.5).
    pub message_history_len: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("/var/lib/airmar-bridge/state.json"),
            udp_sink: DEFAULT_UDP_SINK.to_string(),
            history_window_secs: HISTORY_WINDOW_SECS,
            message_history_len: 100,
        }
    }
}

impl BridgeConfig {
    /// Resolve [`Self::udp_sink`] to a concrete socket address.
    ///
    /// `host.docker.internal` only resolves inside a container with Docker's
    /// embedded DNS; callers running outside Docker are expected to override
    /// `udp_sink` to a real host:port in the config file.
    pub fn udp_sink_addr(&self) -> Result<SocketAddr> {
        use std::net::ToSocketAddrs;
        self.udp_sink
            .to_socket_addrs()
            .map_err(BridgeError::Io)?
            .next()
            .ok_or_else(|| BridgeError::Config(format!("cannot resolve {}", self.udp_sink)))
    }
}

/// Parse `path` as a `key = value` configuration file. Missing file is not an
/// error — the caller gets compiled-in defaults.
pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    let mut cfg = BridgeConfig::default();

    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(cfg),
        Err(e) => return Err(BridgeError::Config(format!("cannot read {}: {e}", path.display()))),
    };

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, '=');
        let key = match parts.next() {
            Some(k) => k.trim().to_ascii_lowercase(),
            None => continue,
        };
        let val = match parts.next() {
            Some(v) => v.trim().to_string(),
            None => continue,
        };
        if val.is_empty() {
            continue;
        }

        match key.as_str() {
            "state_path" => cfg.state_path = PathBuf::from(&val),
            "udp_sink" => cfg.udp_sink = val,
            "history_window_secs" => {
                cfg.history_window_secs = val.parse().unwrap_or(HISTORY_WINDOW_SECS)
            }
            "message_history_len" => cfg.message_history_len = val.parse().unwrap_or(100),
            _ => {} // ignore unknown keys
        }
    }

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = load_config(Path::new("/nonexistent/path/for/test")).unwrap();
        assert_eq!(cfg.udp_sink, DEFAULT_UDP_SINK);
        assert_eq!(cfg.history_window_secs, HISTORY_WINDOW_SECS);
    }

    #[test]
    fn parses_overrides() {
        let dir = std::env::temp_dir().join(format!("airmar-bridge-cfg-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bridge.conf");
        std::fs::write(&path, "udp_sink = 192.168.2.2:27000\nhistory_window_secs = 60\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.udp_sink, "192.168.2.2:27000");
        assert_eq!(cfg.history_window_secs, 60);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
