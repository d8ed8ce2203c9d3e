//! Link Manager (C4): baud-rate negotiation state machine, the
//! mutex-guarded serial handle, and the device control dialogs that must
//! serialize with the Sentence Reader (spec.md §4.4).

use std::io::{Read, Write};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::warn;
use serde::Serialize;
use serialport::SerialPort;

use crate::dialect;
use crate::error::{BridgeError, Result};
use crate::framer;
use crate::registry;

/// Candidate baud rates tried in round-robin order (spec.md §4.4 step 2).
pub const CANDIDATE_BAUDS: [u32; 2] = [4800, 38400];
pub const MAX_ATTEMPTS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Disconnected,
    Trying4800,
    Trying38400,
    SwitchingBaud,
    EnablingSentences,
    Connected,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkState {
    pub status: LinkStatus,
    pub message: String,
    pub port: Option<String>,
    pub baud: Option<u32>,
    pub detected_baud: Option<u32>,
    pub connected_since: Option<i64>,
    pub messages_received: u64,
    pub streamed_messages: u64,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            status: LinkStatus::Disconnected,
            message: String::new(),
            port: None,
            baud: None,
            detected_baud: None,
            connected_since: None,
            messages_received: 0,
            streamed_messages: 0,
        }
    }
}

/// Serial-health counters, monotonic since connect (spec.md §4.5).
#[derive(Debug, Clone, Default, Serialize)]
pub struct SerialHealth {
    pub last_good_nmea_ts: Option<i64>,
    pub last_read_attempt_ts: Option<i64>,
    pub last_raw_len: usize,
    pub last_in_waiting: usize,
    pub read_timeouts: u64,
    pub empty_reads: u64,
    pub nodata_exceptions: u64,
    pub other_read_exceptions: u64,
    pub checksum_mismatch: u64,
    pub checksum_missing: u64,
    pub unmapped_messages: u64,
    pub last_unmapped_type: Option<String>,
}

/// Classification of a failed `read()` call on the serial handle.
pub enum ReadError {
    /// The read timed out with zero bytes (not an error condition).
    Timeout,
    /// The USB-serial driver's spurious "device reported readiness but
    /// returned no data" / "multiple access" condition.
    NoData,
    Other(std::io::Error),
}

fn classify_read_error(err: std::io::Error) -> ReadError {
    if err.kind() == std::io::ErrorKind::TimedOut {
        return ReadError::Timeout;
    }
    let msg = err.to_string().to_ascii_lowercase();
    if msg.contains("no data") || msg.contains("resource temporarily unavailable") || msg.contains("multiple access") {
        ReadError::NoData
    } else {
        ReadError::Other(err)
    }
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Owns the single open serial handle. Only one operation at a time may hold
/// the inner mutex — the Sentence Reader acquires it for the duration of a
/// single read; control dialogs acquire it for an entire exchange.
pub struct LinkManager {
    handle: Mutex<Option<Box<dyn SerialPort>>>,
}

impl LinkManager {
    pub fn new() -> Self {
        Self {
            handle: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.lock().unwrap().is_some()
    }

    fn open_at(&self, path: &str, baud: u32, timeout: Duration) -> Result<()> {
        let port = serialport::new(path, baud)
            .timeout(timeout)
            .open()
            .map_err(BridgeError::Serial)?;
        *self.handle.lock().unwrap() = Some(port);
        Ok(())
    }

    pub fn close(&self) {
        *self.handle.lock().unwrap() = None;
    }

    fn write_line(&self, s: &str) -> Result<()> {
        let mut guard = self.handle.lock().unwrap();
        let port = guard.as_mut().ok_or(BridgeError::NotConnected)?;
        port.write_all(s.as_bytes())?;
        port.flush()?;
        Ok(())
    }

    fn set_timeout(&self, timeout: Duration) -> Result<()> {
        let mut guard = self.handle.lock().unwrap();
        let port = guard.as_mut().ok_or(BridgeError::NotConnected)?;
        port.set_timeout(timeout).map_err(BridgeError::Serial)
    }

    fn clear_input(&self) -> Result<()> {
        let mut guard = self.handle.lock().unwrap();
        let port = guard.as_mut().ok_or(BridgeError::NotConnected)?;
        let _ = port.clear(serialport::ClearBuffer::Input);
        Ok(())
    }

    /// Read whatever bytes are currently available (a single `read()` call
    /// with the handle's configured timeout), decoded lossily as ASCII/UTF-8.
    /// Used both by the Sentence Reader and by the internal baud-detection
    /// loop. The lock is held only for this one call.
    pub fn read_chunk(&self) -> std::result::Result<String, ReadError> {
        let mut buf = [0u8; 512];
        let n = {
            let mut guard = self.handle.lock().unwrap();
            let Some(port) = guard.as_mut() else {
                return Ok(String::new());
            };
            match port.read(&mut buf) {
                Ok(n) => n,
                Err(e) => return Err(classify_read_error(e)),
            }
        };
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }

    /// Read chunks for up to `budget`, framing as we go, collecting every
    /// frame (regardless of checksum outcome — spec.md treats a bare `$...`
    /// line as valid evidence of traffic during detection).
    fn collect_frames(&self, budget: Duration) -> Vec<framer::Frame> {
        let deadline = Instant::now() + budget;
        let mut pending = String::new();
        let mut frames = Vec::new();
        while Instant::now() < deadline {
            match self.read_chunk() {
                Ok(chunk) if chunk.is_empty() => std::thread::sleep(Duration::from_millis(10)),
                Ok(chunk) => {
                    pending.push_str(&chunk);
                    frames.extend(framer::frame(&pending));
                    pending.clear();
                }
                Err(_) => std::thread::sleep(Duration::from_millis(10)),
            }
        }
        frames
    }

    /// Attempt to open `path` at `baud` and wait for the baud-specific
    /// threshold of valid `$...` lines (spec.md §4.4 step 3).
    pub fn try_baud_rate(&self, path: &str, baud: u32) -> Result<bool> {
        self.close();
        self.open_at(path, baud, Duration::from_secs(1))?;
        // Wake a device that was previously stopped.
        self.write_line(&dialect::encode_pamtx(true))?;
        std::thread::sleep(Duration::from_millis(300));

        let required = if baud == 4800 { 5 } else { 1 };
        let frames = self.collect_frames(Duration::from_secs(3));
        if frames.len() >= required {
            Ok(true)
        } else {
            self.close();
            Ok(false)
        }
    }

    /// Switch from a confirmed 4800-baud link to 38400 (spec.md §4.4 step 4).
    pub fn switch_to_38400(&self, path: &str) -> Result<bool> {
        self.write_line(&dialect::encode_pamtx(true))?;
        std::thread::sleep(Duration::from_millis(300));
        self.write_line(&dialect::encode_baud_change(38400))?;
        std::thread::sleep(Duration::from_secs(1));

        // Keep reading at 4800 with a 0.5s read timeout, restarting a 2.5s
        // watchdog on each complete read; exit on watchdog expiry or a
        // malformed (non-`$`-leading) line, both signs the device switched.
        self.set_timeout(Duration::from_millis(500))?;
        let watchdog = Duration::from_millis(2500);
        let mut deadline = Instant::now() + watchdog;
        loop {
            if Instant::now() >= deadline {
                break;
            }
            match self.read_chunk() {
                Ok(chunk) if !chunk.is_empty() => {
                    deadline = Instant::now() + watchdog;
                    if !chunk.trim_start().starts_with('$') {
                        break;
                    }
                }
                _ => std::thread::sleep(Duration::from_millis(10)),
            }
        }

        self.close();
        std::thread::sleep(Duration::from_millis(500));
        self.open_at(path, 38400, Duration::from_millis(500))?;

        let frames = self.collect_frames(Duration::from_secs(5));
        if !frames.is_empty() {
            Ok(true)
        } else {
            self.close();
            Ok(false)
        }
    }

    /// Force-enable the five required sentences immediately after a
    /// successful negotiation (spec.md §4.3/§4.4 step 5).
    pub fn enable_required(&self) -> Result<()> {
        for id in registry::REQUIRED_IDS {
            let spec = registry::find(id).expect("required id missing from registry");
            if let Err(e) = self.write_line(&dialect::encode_enable(spec.id, true, spec.default_interval_tenths)) {
                warn!("failed to enable required sentence {id}: {e}");
            }
            std::thread::sleep(Duration::from_millis(200));
        }
        Ok(())
    }

    /// Single-sentence configure (spec.md §4.4 "Single-sentence configure").
    pub fn configure_one(&self, id: &str, enabled: bool, interval_tenths: u8) -> Result<()> {
        self.write_line(&dialect::encode_enable(id, enabled, interval_tenths))
    }

    /// Batch configure: 0.15-0.2s between writes (spec.md §4.4).
    pub fn configure_batch(&self, entries: &[(String, bool, u8)]) -> Result<()> {
        for (id, enabled, interval) in entries {
            self.write_line(&dialect::encode_enable(id, *enabled, *interval))?;
            std::thread::sleep(Duration::from_millis(180));
        }
        Ok(())
    }

    /// Query current device sentence configuration, holding the mutex for
    /// the entire dialog so the reader task cannot steal reply lines
    /// (spec.md §4.4 "Query").
    pub fn query(&self) -> Result<Vec<dialect::PamtrEntry>> {
        self.clear_input()?;
        self.write_line(&dialect::encode_query())?;
        let frames = self.collect_frames(Duration::from_secs(5));
        Ok(frames
            .iter()
            .filter_map(|f| dialect::parse_pamtr(&f.raw))
            .collect())
    }

    pub fn save_eeprom(&self) -> Result<()> {
        self.write_line(&dialect::encode_save_eeprom())
    }

    pub fn load_defaults(&self) -> Result<()> {
        self.write_line(&dialect::encode_load_defaults())
    }

    /// Operator-initiated explicit baud change (spec.md §4.4 "Explicit
    /// change-baud").
    pub fn explicit_change_baud(&self, path: &str, new_rate: u32) -> Result<()> {
        self.write_line(&dialect::encode_pamtx(false))?;
        std::thread::sleep(Duration::from_millis(500));
        self.write_line(&dialect::encode_baud_change(new_rate))?;
        std::thread::sleep(Duration::from_secs(1));
        self.close();
        std::thread::sleep(Duration::from_millis(500));
        self.open_at(path, new_rate, Duration::from_secs(1))?;
        std::thread::sleep(Duration::from_millis(500));
        self.write_line(&dialect::encode_pamtx(true))
    }
}

impl Default for LinkManager {
    fn default() -> Self {
        Self::new()
    }
}

pub fn timestamp_now() -> i64 {
    now_epoch()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_state_defaults_to_disconnected() {
        let state = LinkState::default();
        assert_eq!(state.status, LinkStatus::Disconnected);
        assert_eq!(state.messages_received, 0);
    }

    #[test]
    fn classify_read_error_detects_timeout() {
        let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        assert!(matches!(classify_read_error(err), ReadError::Timeout));
    }

    #[test]
    fn classify_read_error_detects_nodata() {
        let err = std::io::Error::other("device reported readiness but returned no data");
        assert!(matches!(classify_read_error(err), ReadError::NoData));
    }

    #[test]
    fn link_manager_starts_closed() {
        let link = LinkManager::new();
        assert!(!link.is_open());
    }
}
