//! Sentence Registry (C9): the static table of sentence IDs the Airmar
//! device supports, plus the per-id mutable cadence configuration.

use serde::{Deserialize, Serialize};

/// An immutable registry entry (spec.md §3).
#[derive(Debug, Clone, Copy)]
pub struct SentenceSpec {
    pub id: &'static str,
    pub human_name: &'static str,
    pub description: &'static str,
    pub default_enabled: bool,
    pub default_interval_tenths: u8,
    pub required: bool,
}

/// Per-id mutable cadence, persisted in [`crate::state::PersistedConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentenceConfig {
    pub enabled: bool,
    pub interval_tenths: u8,
}

impl SentenceConfig {
    pub fn clamp_interval(&mut self) {
        self.interval_tenths = self.interval_tenths.clamp(1, 50);
    }
}

/// The five ids force-enabled immediately after a successful baud
/// negotiation (spec.md §4.3).
pub const REQUIRED_IDS: &[&str] = &["MWVT", "MWD", "HDT", "ROT", "ZDA"];

macro_rules! spec {
    ($id:expr, $name:expr, $desc:expr, $enabled:expr, $interval:expr, $required:expr) => {
        SentenceSpec {
            id: $id,
            human_name: $name,
            description: $desc,
            default_enabled: $enabled,
            default_interval_tenths: $interval,
            required: $required,
        }
    };
}

/// The ~27 sentence ids the device supports. Default interval is uniformly
/// 10 tenths (1 Hz); five are `required` (spec.md §4.3).
pub static SENTENCES: &[SentenceSpec] = &[
    spec!("MWVR", "Apparent wind", "Apparent wind speed and angle", true, 10, false),
    spec!("MWVT", "True wind (vessel-relative)", "True wind speed and angle relative to bow", true, 10, true),
    spec!("MWD", "True wind (north-relative)", "Wind direction and speed relative to true/magnetic north", true, 10, true),
    spec!("MDA", "Meteorological composite", "Barometric pressure, air temperature, humidity, dew point", true, 10, false),
    spec!("HDT", "True heading", "Heading relative to true north", true, 10, true),
    spec!("HDG", "Magnetic heading", "Heading relative to magnetic north, with deviation/variation", true, 10, false),
    spec!("ROT", "Rate of turn", "Rate of turn, degrees per minute", true, 10, true),
    spec!("ZDA", "Time and date", "UTC time and date, with local zone offset", true, 10, true),
    spec!("XDRA", "Transducer A", "Generic transducer measurement, group A", false, 10, false),
    spec!("XDRB", "Pitch/roll", "Attitude transducer measurement (pitch, roll)", true, 10, false),
    spec!("XDRC", "Transducer C", "Generic transducer measurement, group C", false, 10, false),
    spec!("XDRD", "Transducer D", "Generic transducer measurement, group D", false, 10, false),
    spec!("XDRE", "Transducer E", "Generic transducer measurement, group E", false, 10, false),
    spec!("XDRF", "Transducer F", "Generic transducer measurement, group F", false, 10, false),
    spec!("XDRG", "Transducer G", "Generic transducer measurement, group G", false, 10, false),
    spec!("XDRH", "Transducer H", "Generic transducer measurement, group H", false, 10, false),
    spec!("XDRI", "Transducer I", "Generic transducer measurement, group I", false, 10, false),
    spec!("XDRJ", "Transducer J", "Generic transducer measurement, group J", false, 10, false),
    spec!("XDRK", "Transducer K", "Generic transducer measurement, group K", false, 10, false),
    spec!("XDRL", "Transducer L", "Generic transducer measurement, group L", false, 10, false),
    spec!("XDRM", "Transducer M", "Generic transducer measurement, group M", false, 10, false),
    spec!("XDRN", "Transducer N", "Generic transducer measurement, group N", false, 10, false),
    spec!("XDRO", "Transducer O", "Generic transducer measurement, group O", false, 10, false),
    spec!("XDRP", "Transducer P", "Generic transducer measurement, group P", false, 10, false),
    spec!("XDRQ", "Transducer Q", "Generic transducer measurement, group Q", false, 10, false),
    spec!("XDRR", "Transducer R", "Generic transducer measurement, group R", false, 10, false),
    spec!("XDRS", "Transducer S", "Generic transducer measurement, group S", false, 10, false),
    spec!("XDRT", "Transducer T", "Generic transducer measurement, group T", false, 10, false),
    spec!("XDRU", "Transducer U", "Generic transducer measurement, group U", false, 10, false),
    spec!("XDRV", "Transducer V", "Generic transducer measurement, group V", false, 10, false),
    spec!("XDRW", "Transducer W", "Generic transducer measurement, group W", false, 10, false),
];

/// Look up a registry entry by spec id (e.g. `"MWVT"`, `"XDRB"`).
pub fn find(id: &str) -> Option<&'static SentenceSpec> {
    SENTENCES.iter().find(|s| s.id == id)
}

/// Round a seconds interval to tenths, clamped to the wire protocol's
/// `[1, 50]` range (spec.md §3/§6). The single unit-conversion point named
/// by spec.md §6.
pub fn seconds_to_tenths(seconds: f64) -> u8 {
    let clamped = seconds.clamp(0.1, 5.0);
    let tenths = (clamped * 10.0).round() as i32;
    tenths.clamp(1, 50) as u8
}

/// Default cadence table: every registry entry at its default enabled flag
/// and interval.
pub fn default_sentence_config() -> std::collections::HashMap<String, SentenceConfig> {
    SENTENCES
        .iter()
        .map(|s| {
            (
                s.id.to_string(),
                SentenceConfig {
                    enabled: s.default_enabled,
                    interval_tenths: s.default_interval_tenths,
                },
            )
        })
        .collect()
}

/// Map a raw wire talker+type (e.g. `"WIMWV"` with reference field `"R"`) to
/// the registry's spec id. `reference` is only consulted for `WIMWV`.
pub fn wire_type_to_spec_id(wire_type: &str, reference: Option<&str>) -> Option<&'static str> {
    match wire_type {
        "WIMWV" => match reference {
            Some("R") => Some("MWVR"),
            Some("T") => Some("MWVT"),
            _ => None,
        },
        "WIMWD" => Some("MWD"),
        "WIMDA" => Some("MDA"),
        "HCHDT" => Some("HDT"),
        "HCHDG" | "CHDG" => Some("HDG"),
        "TIROT" => Some("ROT"),
        "GPZDA" => Some("ZDA"),
        _ => None,
    }
}

/// Map a `YXXDR` transducer group name (the fourth field of a group) to the
/// registry's `XDRA`..`XDRW` id. Currently only `PTCH`/`ROLL` are mapped
/// (spec.md §4.6); unknown names return `None`.
pub fn xdr_name_to_spec_id(name: &str) -> Option<&'static str> {
    match name {
        "PTCH" | "ROLL" => Some("XDRB"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_ids_are_in_registry() {
        for id in REQUIRED_IDS {
            assert!(find(id).is_some(), "missing required id {id}");
            assert!(find(id).unwrap().required);
        }
    }

    #[test]
    fn seconds_to_tenths_clamps_and_rounds() {
        assert_eq!(seconds_to_tenths(0.04), 1); // below 0.1, clamps
        assert_eq!(seconds_to_tenths(1.0), 10);
        assert_eq!(seconds_to_tenths(10.0), 50); // above 5.0, clamps
        assert_eq!(seconds_to_tenths(0.37), 4); // rounds to nearest tenth
    }

    #[test]
    fn wire_type_mapping_disambiguates_mwv() {
        assert_eq!(wire_type_to_spec_id("WIMWV", Some("R")), Some("MWVR"));
        assert_eq!(wire_type_to_spec_id("WIMWV", Some("T")), Some("MWVT"));
        assert_eq!(wire_type_to_spec_id("WIMWV", None), None);
    }

    #[test]
    fn xdr_group_mapping() {
        assert_eq!(xdr_name_to_spec_id("PTCH"), Some("XDRB"));
        assert_eq!(xdr_name_to_spec_id("ROLL"), Some("XDRB"));
        assert_eq!(xdr_name_to_spec_id("UNKNOWN"), None);
    }
}
