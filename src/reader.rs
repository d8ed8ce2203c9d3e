//! Sentence Reader (C5): the long-running background task that drains the
//! serial link, frames it, updates health counters, and hands frames off to
//! the Sensor Aggregator and UDP Fan-out (spec.md §4.5).
//!
//! Shaped after the teacher's blocking GNSS reader: a `spawn_blocking` loop
//! owns the device for its lifetime and communicates back through shared,
//! mutex-guarded state rather than a channel, since every consumer just
//! wants "the latest".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::aggregator::Aggregator;
use crate::framer::{self, ChecksumOutcome};
use crate::link::{LinkManager, LinkState, ReadError, SerialHealth};
use crate::registry;
use crate::udp::FanOut;

/// Default most-recent-first raw-message ring buffer length (spec.md §4.5),
/// overridable via [`crate::config::BridgeConfig::message_history_len`].
pub const DEFAULT_RAW_HISTORY_LEN: usize = 100;

pub struct Reader {
    link: Arc<LinkManager>,
    state: Arc<std::sync::Mutex<LinkState>>,
    health: Arc<std::sync::Mutex<SerialHealth>>,
    aggregator: Arc<Aggregator>,
    fanout: Arc<FanOut>,
    raw_history: std::sync::Mutex<std::collections::VecDeque<String>>,
    raw_history_len: usize,
    selected_types: std::sync::Mutex<std::collections::HashSet<String>>,
    /// `spec_id -> last-seen epoch` for every wire type that has ever
    /// resolved to a registry id (spec.md §4.5, exposed via `read`).
    sentence_last_seen: std::sync::Mutex<std::collections::HashMap<&'static str, i64>>,
    /// Invoked (outside any lock) the first time a wire type not already in
    /// `selected_types` is observed, so the caller can persist the addition
    /// (spec.md §4.5 "auto-add observed wire type ... + persist").
    on_newly_observed: Option<Arc<dyn Fn(String) + Send + Sync>>,
    stop: Arc<AtomicBool>,
}

impl Reader {
    pub fn new(
        link: Arc<LinkManager>,
        state: Arc<std::sync::Mutex<LinkState>>,
        health: Arc<std::sync::Mutex<SerialHealth>>,
        aggregator: Arc<Aggregator>,
        fanout: Arc<FanOut>,
        selected_types: std::collections::HashSet<String>,
    ) -> Self {
        Self::with_history_len(link, state, health, aggregator, fanout, selected_types, DEFAULT_RAW_HISTORY_LEN)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_history_len(
        link: Arc<LinkManager>,
        state: Arc<std::sync::Mutex<LinkState>>,
        health: Arc<std::sync::Mutex<SerialHealth>>,
        aggregator: Arc<Aggregator>,
        fanout: Arc<FanOut>,
        selected_types: std::collections::HashSet<String>,
        raw_history_len: usize,
    ) -> Self {
        Self {
            link,
            state,
            health,
            aggregator,
            fanout,
            raw_history: std::sync::Mutex::new(std::collections::VecDeque::with_capacity(raw_history_len)),
            raw_history_len,
            selected_types: std::sync::Mutex::new(selected_types),
            sentence_last_seen: std::sync::Mutex::new(std::collections::HashMap::new()),
            on_newly_observed: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Fn(String) + Send + Sync>) -> Self {
        self.on_newly_observed = Some(observer);
        self
    }

    pub fn selected_types_snapshot(&self) -> Vec<String> {
        let mut v: Vec<String> = self.selected_types.lock().unwrap().iter().cloned().collect();
        v.sort();
        v
    }

    pub fn replace_selected_types(&self, types: std::collections::HashSet<String>) {
        *self.selected_types.lock().unwrap() = types;
    }

    pub fn raw_history_snapshot(&self) -> Vec<String> {
        self.raw_history.lock().unwrap().iter().cloned().collect()
    }

    /// `spec_id -> last-seen epoch` for every registry-mapped sentence seen
    /// so far, exposed as `observed_sentence_last_seen` by `read` (spec.md §6).
    pub fn sentence_last_seen_snapshot(&self) -> std::collections::HashMap<&'static str, i64> {
        self.sentence_last_seen.lock().unwrap().clone()
    }

    /// Request the background loop to stop. The caller is responsible for
    /// joining the task with its own deadline.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// The blocking loop body, run inside `tokio::task::spawn_blocking`.
    pub fn run(self: Arc<Self>) {
        self.stop.store(false, Ordering::SeqCst);
        let mut pending = String::new();
        let mut last_nodata_log = std::time::Instant::now() - Duration::from_secs(60);

        while !self.stop.load(Ordering::SeqCst) {
            let attempt_ts = crate::link::timestamp_now();
            {
                let mut h = self.health.lock().unwrap();
                h.last_read_attempt_ts = Some(attempt_ts);
            }

            match self.link.read_chunk() {
                Ok(chunk) if chunk.is_empty() => {
                    self.health.lock().unwrap().empty_reads += 1;
                    std::thread::sleep(Duration::from_millis(20));
                }
                Ok(chunk) => {
                    self.health.lock().unwrap().last_raw_len = chunk.len();
                    pending.push_str(&chunk);
                    let frames = framer::frame(&pending);
                    pending.clear();
                    for f in frames {
                        self.handle_frame(f);
                    }
                }
                Err(ReadError::Timeout) => {
                    self.health.lock().unwrap().read_timeouts += 1;
                }
                Err(ReadError::NoData) => {
                    self.health.lock().unwrap().nodata_exceptions += 1;
                    if last_nodata_log.elapsed() >= Duration::from_secs(30) {
                        warn!("serial read returned no data (spurious driver condition)");
                        last_nodata_log = std::time::Instant::now();
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(ReadError::Other(e)) => {
                    self.health.lock().unwrap().other_read_exceptions += 1;
                    debug!("serial read error: {e}");
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }

    fn handle_frame(&self, frame: framer::Frame) {
        {
            let mut hist = self.raw_history.lock().unwrap();
            if hist.len() >= self.raw_history_len {
                hist.pop_back();
            }
            hist.push_front(frame.raw.clone());
        }

        // All three checksum outcomes are forwarded identically to the
        // Sensor Aggregator and counted; only the UDP fan-out is suppressed
        // for anything short of `Ok` (spec.md §4.1, §4.5).
        match frame.outcome {
            ChecksumOutcome::Mismatch => {
                self.health.lock().unwrap().checksum_mismatch += 1;
            }
            ChecksumOutcome::Missing => {
                self.health.lock().unwrap().checksum_missing += 1;
            }
            ChecksumOutcome::Ok => {
                let now = crate::link::timestamp_now();
                self.health.lock().unwrap().last_good_nmea_ts = Some(now);
            }
        }

        self.state.lock().unwrap().messages_received += 1;

        let wire_type = frame.talker_type();
        let spec_id = registry::wire_type_to_spec_id(&wire_type, frame.fields().get(2).copied());

        if let Some(id) = spec_id {
            let ts = crate::link::timestamp_now();
            self.sentence_last_seen.lock().unwrap().insert(id, ts);
        }

        // Every wire type that has ever been observed is, by definition,
        // streamed (spec.md §4.5): a type not yet in `selected_types` is
        // auto-added and streamed from its very first sighting. An operator
        // can still narrow this via `update_message_types`, which replaces
        // the whole set; a type dropped that way is streamed again the next
        // time the device happens to send it.
        let newly_observed = {
            let mut selected = self.selected_types.lock().unwrap();
            selected.insert(wire_type.clone())
        };
        if newly_observed {
            if let Some(cb) = &self.on_newly_observed {
                cb(wire_type.clone());
            }
        }

        if spec_id.is_none() {
            let mut h = self.health.lock().unwrap();
            h.unmapped_messages += 1;
            h.last_unmapped_type = Some(wire_type.clone());
        }

        self.aggregator.ingest(&frame);

        if frame.outcome == ChecksumOutcome::Ok {
            self.fanout.send(&frame.raw);
            self.state.lock().unwrap().streamed_messages += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Aggregator;
    use crate::link::LinkManager;
    use crate::udp::FanOut;

    fn make_reader() -> Arc<Reader> {
        let link = Arc::new(LinkManager::new());
        let state = Arc::new(std::sync::Mutex::new(LinkState::default()));
        let health = Arc::new(std::sync::Mutex::new(SerialHealth::default()));
        let aggregator = Arc::new(Aggregator::new(900));
        let fanout = Arc::new(FanOut::new());
        Arc::new(Reader::new(link, state, health, aggregator, fanout, Default::default()))
    }

    #[test]
    fn mismatch_and_missing_still_reach_aggregator_but_not_fanout() {
        let reader = make_reader();
        let body = "GPZDA,1";
        let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
        let bad = framer::frame(&format!("${body}*{:02X}", checksum ^ 0xFF));
        reader.handle_frame(bad.into_iter().next().unwrap());
        assert_eq!(reader.health.lock().unwrap().checksum_mismatch, 1);
        // messages_received and the spec-id lookup happen for every outcome.
        assert_eq!(reader.state.lock().unwrap().messages_received, 1);
        assert_eq!(reader.state.lock().unwrap().streamed_messages, 0);
        assert!(reader.sentence_last_seen_snapshot().contains_key("ZDA"));

        let missing = framer::frame(&format!("${body}"));
        reader.handle_frame(missing.into_iter().next().unwrap());
        assert_eq!(reader.health.lock().unwrap().checksum_missing, 1);
        assert_eq!(reader.state.lock().unwrap().messages_received, 2);
        assert_eq!(reader.state.lock().unwrap().streamed_messages, 0);
    }

    #[test]
    fn good_frame_increments_counters_and_history() {
        let reader = make_reader();
        let body = "GPZDA,120000,01,08,2026,00,00";
        let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
        let good = framer::frame(&format!("${body}*{checksum:02X}"));
        reader.handle_frame(good.into_iter().next().unwrap());
        assert_eq!(reader.state.lock().unwrap().messages_received, 1);
        assert_eq!(reader.state.lock().unwrap().streamed_messages, 1);
        assert_eq!(reader.raw_history_snapshot().len(), 1);
        assert_eq!(reader.sentence_last_seen_snapshot().get("ZDA").copied(), reader.health.lock().unwrap().last_good_nmea_ts);
    }

    #[test]
    fn unmapped_type_is_counted_but_still_streamed() {
        let reader = make_reader();
        let body = "GPXYZ,1,2,3";
        let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
        let frame = framer::frame(&format!("${body}*{checksum:02X}"));
        reader.handle_frame(frame.into_iter().next().unwrap());
        assert_eq!(reader.health.lock().unwrap().unmapped_messages, 1);
        assert_eq!(
            reader.health.lock().unwrap().last_unmapped_type,
            Some("GPXYZ".to_string())
        );
    }
}
