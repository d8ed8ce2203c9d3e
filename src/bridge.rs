//! The public `Bridge`: wires the Port Enumerator, Link Manager, Sentence
//! Reader, Sensor Aggregator, UDP Fan-out, and State Store together and
//! exposes every operation named in spec.md §6 as a plain async method
//! returning a serializable record. No network server lives in this crate;
//! a caller wanting an HTTP or RPC surface wraps these methods directly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;

use crate::aggregator::{Aggregator, History, SensorSnapshot};
use crate::config::BridgeConfig;
use crate::dialect::PamtrEntry;
use crate::error::{BridgeError, Result};
use crate::link::{LinkManager, LinkState, LinkStatus, SerialHealth, CANDIDATE_BAUDS, MAX_ATTEMPTS};
use crate::ports::{self, PortInfo};
use crate::reader::Reader;
use crate::registry::{self, SentenceConfig};
use crate::state::{self, PersistedConfig};
use crate::udp::FanOut;

#[derive(Debug, Clone, Serialize)]
pub struct SentenceDescriptor {
    pub id: &'static str,
    pub human_name: &'static str,
    pub description: &'static str,
    pub required: bool,
    pub enabled: bool,
    pub interval_tenths: u8,
}

/// Response shape for the `read` operation (spec.md §6).
#[derive(Debug, Clone, Serialize)]
pub struct ReadResult {
    pub messages: Vec<String>,
    pub available_types: Vec<String>,
    pub now: i64,
    pub connected_since: Option<i64>,
    pub observed_sentence_last_seen: HashMap<&'static str, i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SerialInfo {
    pub port: Option<String>,
    pub baud: Option<u32>,
    pub detected_baud: Option<u32>,
}

pub struct Bridge {
    config: BridgeConfig,
    link: Arc<LinkManager>,
    link_state: Arc<std::sync::Mutex<LinkState>>,
    health: Arc<std::sync::Mutex<SerialHealth>>,
    aggregator: Arc<Aggregator>,
    fanout: Arc<FanOut>,
    reader: std::sync::Mutex<Option<Arc<Reader>>>,
    reader_task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    persisted: std::sync::Mutex<PersistedConfig>,
}

impl Bridge {
    pub fn new(config: BridgeConfig, persisted: PersistedConfig) -> Arc<Self> {
        Arc::new(Self {
            aggregator: Arc::new(Aggregator::new(config.history_window_secs)),
            link: Arc::new(LinkManager::new()),
            link_state: Arc::new(std::sync::Mutex::new(LinkState::default())),
            health: Arc::new(std::sync::Mutex::new(SerialHealth::default())),
            fanout: Arc::new(FanOut::new()),
            reader: std::sync::Mutex::new(None),
            reader_task: tokio::sync::Mutex::new(None),
            persisted: std::sync::Mutex::new(persisted),
            config,
        })
    }

    /// If a port was persisted from a previous run, reconnect to it and
    /// resume streaming as it was left (spec.md §4.8).
    pub async fn auto_start(self: &Arc<Self>) {
        let (port, baud, was_streaming) = {
            let p = self.persisted.lock().unwrap();
            (p.port.clone(), p.baud_rate, p.is_streaming)
        };
        let Some(port) = port else { return };
        info!("auto-connecting to previously selected port {port}");
        match self.select_port(port, baud).await {
            Ok(_) if was_streaming => {
                if let Err(e) = self.start_streaming().await {
                    warn!("auto-start streaming failed: {e}");
                }
            }
            Ok(_) => {}
            Err(e) => warn!("auto-connect failed: {e}"),
        }
    }

    fn persist(&self) -> Result<()> {
        let snapshot = self.persisted.lock().unwrap().clone();
        state::save(&self.config.state_path, &snapshot)
    }

    fn set_status(&self, status: LinkStatus, message: impl Into<String>) {
        let mut s = self.link_state.lock().unwrap();
        s.status = status;
        s.message = message.into();
    }

    // ---- C1 Port Enumerator ----

    pub fn list_ports(&self) -> Vec<PortInfo> {
        ports::list_ports()
    }

    pub fn list_device_ids(&self) -> Vec<(String, String)> {
        ports::list_device_ids()
    }

    // ---- C4 Link Manager: connect / disconnect / status ----

    pub async fn select_port(self: &Arc<Self>, port: String, preferred_baud: Option<u32>) -> Result<LinkState> {
        if !ports::port_exists(&port) {
            return Err(BridgeError::PortNotFound(port));
        }
        self.disconnect().await.ok();

        let bridge = self.clone();
        let port_for_task = port.clone();
        let outcome =
            tokio::task::spawn_blocking(move || bridge.negotiate(&port_for_task, preferred_baud)).await?;

        let state = outcome?;
        self.spawn_reader().await;

        {
            let mut persisted = self.persisted.lock().unwrap();
            persisted.port = Some(port);
            persisted.baud_rate = Some(state.baud.unwrap_or(4800));
        }
        self.persist()?;
        Ok(state)
    }

    /// Blocking negotiation body, run inside `spawn_blocking` (spec.md §4.4).
    ///
    /// A candidate that is accepted at 4800 but fails to confirm the switch
    /// to 38400 is not retried in place: the outer loop moves on to the next
    /// candidate in `order` (spec.md §4.4 step 4, §7), since a device may
    /// have switched anyway and the next attempt will find it at 38400.
    fn negotiate(&self, port: &str, preferred_baud: Option<u32>) -> Result<LinkState> {
        let order = build_attempt_order(preferred_baud);
        let mut final_baud = None;
        let mut detected_baud = None;

        for (i, baud) in order.into_iter().enumerate() {
            self.set_status(
                if baud == 4800 { LinkStatus::Trying4800 } else { LinkStatus::Trying38400 },
                format!("attempt {} of {MAX_ATTEMPTS} at {baud} baud", i + 1),
            );
            let detected = match self.link.try_baud_rate(port, baud) {
                Ok(true) => baud,
                Ok(false) => continue,
                Err(e) => {
                    warn!("baud attempt at {baud} failed: {e}");
                    continue;
                }
            };

            if detected == 4800 && preferred_baud != Some(4800) {
                self.set_status(LinkStatus::SwitchingBaud, "switching to 38400");
                match self.link.switch_to_38400(port) {
                    Ok(true) => {
                        final_baud = Some(38400);
                        detected_baud = Some(detected);
                        break;
                    }
                    Ok(false) => {
                        warn!("38400 switch not confirmed, trying next candidate");
                        continue;
                    }
                    Err(e) => {
                        warn!("38400 switch failed: {e}, trying next candidate");
                        continue;
                    }
                }
            }

            final_baud = Some(detected);
            detected_baud = Some(detected);
            break;
        }

        let Some(final_baud) = final_baud else {
            self.set_status(LinkStatus::Failed, "exhausted baud detection attempts");
            return Err(BridgeError::BaudDetectionFailed { port: port.to_string() });
        };
        let detected_baud = detected_baud.unwrap_or(final_baud);

        self.set_status(LinkStatus::EnablingSentences, "enabling required sentences");
        self.link.enable_required()?;

        let entries: Vec<(String, bool, u8)> = {
            let persisted = self.persisted.lock().unwrap();
            persisted
                .sentence_config
                .iter()
                .map(|(id, cfg)| (id.clone(), cfg.enabled, cfg.interval_tenths))
                .collect()
        };
        self.link.configure_batch(&entries)?;

        let mut state = self.link_state.lock().unwrap();
        state.status = LinkStatus::Connected;
        state.message = "connected".to_string();
        state.port = Some(port.to_string());
        state.baud = Some(final_baud);
        state.detected_baud = Some(detected_baud);
        state.connected_since = Some(crate::link::timestamp_now());
        state.messages_received = 0;
        state.streamed_messages = 0;
        Ok(state.clone())
    }

    async fn spawn_reader(self: &Arc<Self>) {
        // Re-apply the default selected set whenever it's empty, not only on
        // first-ever-run: an operator can persist an explicitly empty set,
        // and a later reconnect must still fall back to the default rather
        // than stream nothing (spec.md §4.8).
        let selected: HashSet<String> = {
            let mut persisted = self.persisted.lock().unwrap();
            if persisted.selected_message_types.is_empty() {
                persisted.selected_message_types =
                    state::DEFAULT_SELECTED_TYPES.iter().map(|s| s.to_string()).collect();
            }
            persisted.selected_message_types.clone()
        };
        let bridge = self.clone();
        let observer: Arc<dyn Fn(String) + Send + Sync> = Arc::new(move |wire_type: String| {
            bridge.persisted.lock().unwrap().selected_message_types.insert(wire_type);
            if let Err(e) = bridge.persist() {
                warn!("failed to persist newly observed sentence type: {e}");
            }
        });
        let reader = Arc::new(
            Reader::with_history_len(
                self.link.clone(),
                self.link_state.clone(),
                self.health.clone(),
                self.aggregator.clone(),
                self.fanout.clone(),
                selected,
                self.config.message_history_len,
            )
            .with_observer(observer),
        );
        *self.reader.lock().unwrap() = Some(reader.clone());
        let handle = tokio::task::spawn_blocking(move || reader.run());
        *self.reader_task.lock().await = Some(handle);
    }

    pub async fn disconnect(self: &Arc<Self>) -> Result<LinkState> {
        self.fanout.stop();
        if let Some(reader) = self.reader.lock().unwrap().take() {
            reader.request_stop();
        }
        let handle = self.reader_task.lock().await.take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(1), handle).await.is_err() {
                warn!("reader task did not stop within 1s deadline");
            }
        }
        self.link.close();
        self.aggregator.reset();
        *self.health.lock().unwrap() = SerialHealth::default();

        {
            let mut persisted = self.persisted.lock().unwrap();
            persisted.is_streaming = false;
        }
        self.persist()?;

        let mut state = self.link_state.lock().unwrap();
        *state = LinkState::default();
        Ok(state.clone())
    }

    pub fn connection_status(&self) -> LinkState {
        self.link_state.lock().unwrap().clone()
    }

    pub fn current_serial_info(&self) -> SerialInfo {
        let s = self.link_state.lock().unwrap();
        SerialInfo {
            port: s.port.clone(),
            baud: s.baud,
            detected_baud: s.detected_baud,
        }
    }

    // ---- C6 Sensor Aggregator ----

    pub fn sensor_state(&self) -> SensorSnapshot {
        self.aggregator.snapshot()
    }

    pub fn sensor_history(&self) -> History {
        self.aggregator.history()
    }

    // ---- C9 Sentence Registry + device configure/query ----

    pub fn list_sentences(&self) -> Vec<SentenceDescriptor> {
        let persisted = self.persisted.lock().unwrap();
        registry::SENTENCES
            .iter()
            .map(|spec| {
                let cfg = persisted
                    .sentence_config
                    .get(spec.id)
                    .copied()
                    .unwrap_or(SentenceConfig {
                        enabled: spec.default_enabled,
                        interval_tenths: spec.default_interval_tenths,
                    });
                SentenceDescriptor {
                    id: spec.id,
                    human_name: spec.human_name,
                    description: spec.description,
                    required: spec.required,
                    enabled: cfg.enabled,
                    interval_tenths: cfg.interval_tenths,
                }
            })
            .collect()
    }

    pub async fn configure_sentence(self: &Arc<Self>, id: String, enabled: bool, interval_secs: f64) -> Result<()> {
        registry::find(&id).ok_or_else(|| BridgeError::Protocol(format!("unknown sentence id {id}")))?;
        let interval_tenths = registry::seconds_to_tenths(interval_secs);
        {
            let mut persisted = self.persisted.lock().unwrap();
            let mut cfg = SentenceConfig { enabled, interval_tenths };
            cfg.clamp_interval();
            persisted.sentence_config.insert(id.clone(), cfg);
        }
        self.persist()?;

        let link = self.link.clone();
        let id_for_task = id.clone();
        tokio::task::spawn_blocking(move || link.configure_one(&id_for_task, enabled, interval_tenths))
            .await??;
        Ok(())
    }

    pub async fn configure_sentences_batch(
        self: &Arc<Self>,
        entries: Vec<(String, bool, f64)>,
    ) -> Result<()> {
        let mut converted = Vec::with_capacity(entries.len());
        {
            let mut persisted = self.persisted.lock().unwrap();
            for (id, enabled, interval_secs) in &entries {
                if registry::find(id).is_none() {
                    continue;
                }
                let interval_tenths = registry::seconds_to_tenths(*interval_secs);
                let mut cfg = SentenceConfig { enabled: *enabled, interval_tenths };
                cfg.clamp_interval();
                persisted.sentence_config.insert(id.clone(), cfg);
                converted.push((id.clone(), *enabled, cfg.interval_tenths));
            }
        }
        self.persist()?;

        let link = self.link.clone();
        tokio::task::spawn_blocking(move || link.configure_batch(&converted)).await??;
        Ok(())
    }

    pub async fn query_sentences(self: &Arc<Self>) -> Result<Vec<PamtrEntry>> {
        let link = self.link.clone();
        tokio::task::spawn_blocking(move || link.query()).await?
    }

    pub async fn save_sentences_eeprom(self: &Arc<Self>) -> Result<()> {
        let link = self.link.clone();
        tokio::task::spawn_blocking(move || link.save_eeprom()).await?
    }

    pub async fn load_sentences_defaults(self: &Arc<Self>) -> Result<()> {
        let link = self.link.clone();
        tokio::task::spawn_blocking(move || link.load_defaults()).await?
    }

    // ---- C7 UDP Fan-out ----

    pub async fn start_streaming(self: &Arc<Self>) -> Result<()> {
        let sink = self.config.udp_sink_addr()?;
        let fresh_transition = self.fanout.start(sink);
        if fresh_transition {
            self.link_state.lock().unwrap().streamed_messages = 0;
        }
        self.persisted.lock().unwrap().is_streaming = true;
        self.persist()
    }

    pub async fn stop_streaming(self: &Arc<Self>) -> Result<()> {
        self.fanout.stop();
        self.persisted.lock().unwrap().is_streaming = false;
        self.persist()
    }

    pub fn streaming_status(&self) -> bool {
        self.fanout.is_streaming()
    }

    pub async fn update_message_types(self: &Arc<Self>, types: HashSet<String>) -> Result<()> {
        {
            let mut persisted = self.persisted.lock().unwrap();
            persisted.selected_message_types = types.clone();
        }
        self.persist()?;
        if let Some(reader) = self.reader.lock().unwrap().as_ref() {
            reader.replace_selected_types(types);
        }
        Ok(())
    }

    pub fn selected_message_types(&self) -> HashSet<String> {
        self.persisted.lock().unwrap().selected_message_types.clone()
    }

    /// The most-recent-first raw-message ring buffer, plus the auxiliary
    /// fields the `read` operation reports alongside it (spec.md §6).
    pub fn read(&self) -> ReadResult {
        let reader = self.reader.lock().unwrap();
        let (messages, available_types, observed_sentence_last_seen) = reader
            .as_ref()
            .map(|r| (r.raw_history_snapshot(), r.selected_types_snapshot(), r.sentence_last_seen_snapshot()))
            .unwrap_or_default();
        ReadResult {
            messages,
            available_types,
            now: crate::link::timestamp_now(),
            connected_since: self.link_state.lock().unwrap().connected_since,
            observed_sentence_last_seen,
        }
    }

    pub fn serial_health(&self) -> SerialHealth {
        self.health.lock().unwrap().clone()
    }

    // ---- C4 Link Manager: explicit baud change ----

    pub async fn change_baud(self: &Arc<Self>, new_rate: u32) -> Result<LinkState> {
        let (port, current_baud) = {
            let s = self.link_state.lock().unwrap();
            (s.port.clone(), s.baud)
        };
        let Some(port) = port else {
            return Err(BridgeError::NotConnected);
        };
        if current_baud == Some(new_rate) {
            return Err(BridgeError::Protocol(format!("already running at {new_rate} baud")));
        }

        self.set_status(LinkStatus::SwitchingBaud, format!("operator change to {new_rate} baud"));
        let link = self.link.clone();
        let port_for_task = port.clone();
        tokio::task::spawn_blocking(move || link.explicit_change_baud(&port_for_task, new_rate))
            .await?
            .map_err(|e| BridgeError::BaudSwitchFailed(e.to_string()))?;

        {
            let mut s = self.link_state.lock().unwrap();
            s.status = LinkStatus::Connected;
            s.message = "connected".to_string();
            s.baud = Some(new_rate);
        }
        {
            let mut persisted = self.persisted.lock().unwrap();
            persisted.baud_rate = Some(new_rate);
        }
        self.persist()?;
        Ok(self.link_state.lock().unwrap().clone())
    }
}

/// Build the baud attempt order: `preferred` (or 4800) first, then
/// round-robin through [`CANDIDATE_BAUDS`] for up to [`MAX_ATTEMPTS`]
/// total attempts (spec.md §4.4 step 2).
fn build_attempt_order(preferred: Option<u32>) -> Vec<u32> {
    let first = preferred.unwrap_or(CANDIDATE_BAUDS[0]);
    let second = CANDIDATE_BAUDS.iter().copied().find(|b| *b != first).unwrap_or(first);
    let pair = [first, second];
    (0..MAX_ATTEMPTS).map(|i| pair[i % 2]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_order_starts_with_preferred() {
        let order = build_attempt_order(Some(38400));
        assert_eq!(&order[..4], &[38400, 4800, 38400, 4800]);
        assert_eq!(order.len(), MAX_ATTEMPTS);
    }

    #[test]
    fn attempt_order_defaults_to_4800() {
        let order = build_attempt_order(None);
        assert_eq!(&order[..2], &[4800, 38400]);
    }
}
