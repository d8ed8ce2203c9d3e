//! Port Enumerator (C1): lists candidate serial devices and annotates them
//! with stable by-id names and physical USB-port position (spec.md §4.9).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;

/// One candidate serial device, annotated for display.
#[derive(Debug, Clone, Serialize)]
pub struct PortInfo {
    /// Raw device path, e.g. `/dev/ttyUSB0`.
    pub path: String,
    /// Cleaned-up by-id display name, if a `/dev/serial/by-id` symlink
    /// resolves to this device.
    pub display_name: Option<String>,
    /// Physical USB-port position label, derived from `/dev/serial/by-path`.
    pub position: Option<String>,
}

/// Substring keys mapped to a physical position on Pi 3/4/5 USB topologies.
/// Matching is longest-prefix-first so a more specific hub key wins over a
/// shorter generic one.
const POSITION_KEYS: &[(&str, &str)] = &[
    // Raspberry Pi 4/5: two USB3 ports (top) share one root-hub path prefix,
    // two USB2 ports (bottom) share another.
    ("usb-0:1.1:1.0", "top-left"),
    ("usb-0:1.2:1.0", "top-right"),
    ("usb-0:1.3:1.0", "bottom-left"),
    ("usb-0:1.4:1.0", "bottom-right"),
    // Raspberry Pi 3: four ports behind a single internal hub.
    ("usb-0:1.1.2:1.0", "top-left"),
    ("usb-0:1.1.3:1.0", "top-right"),
    ("usb-0:1.1.4:1.0", "bottom-left"),
    ("usb-0:1.1.5:1.0", "bottom-right"),
];

/// List candidate serial devices: the union of fixed well-known device
/// nodes that exist, plus anything the platform's serial-port enumeration
/// returns.
pub fn list_ports() -> Vec<PortInfo> {
    let mut seen = BTreeMap::new();

    for i in 0..4 {
        let path = format!("/dev/ttyUSB{i}");
        if Path::new(&path).exists() {
            seen.entry(path.clone()).or_insert(path);
        }
    }
    for i in 0..2 {
        let path = format!("/dev/ttyAMA{i}");
        if Path::new(&path).exists() {
            seen.entry(path.clone()).or_insert(path);
        }
    }
    if let Ok(available) = serialport::available_ports() {
        for p in available {
            seen.entry(p.port_name.clone()).or_insert(p.port_name);
        }
    }

    let by_id = resolve_symlink_dir(Path::new("/dev/serial/by-id"));
    let by_path = resolve_symlink_dir(Path::new("/dev/serial/by-path"));

    seen.into_values()
        .map(|path| {
            let display_name = by_id
                .iter()
                .find(|(_, target)| *target == path)
                .map(|(name, _)| clean_display_name(name));
            let position = by_path
                .iter()
                .find(|(_, target)| *target == path)
                .and_then(|(name, _)| classify_position(name));
            PortInfo {
                path,
                display_name,
                position,
            }
        })
        .collect()
}

/// Read a `/dev/serial/by-*` symlink directory, returning `(link_name,
/// realpath_target)` pairs.
fn resolve_symlink_dir(dir: &Path) -> Vec<(String, String)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            let target = fs::canonicalize(e.path()).ok()?;
            Some((name, target.to_string_lossy().to_string()))
        })
        .collect()
}

/// Strip the common `usb-...-if00-port0` wrapper and replace underscores
/// with spaces, e.g. `usb-Airmar_WX220_12345-if00-port0` -> `Airmar WX220
/// 12345`.
fn clean_display_name(by_id_name: &str) -> String {
    let stripped = by_id_name
        .strip_prefix("usb-")
        .unwrap_or(by_id_name)
        .trim_end_matches("-if00-port0");
    stripped.replace('_', " ")
}

/// Classify a `/dev/serial/by-path` link name into a physical position,
/// matching the longest known substring key first. Falls back to hub
/// detection (`usb-0:X.Y.Z:1.0`) when no exact key matches.
fn classify_position(by_path_name: &str) -> Option<String> {
    let mut candidates: Vec<&(&str, &str)> = POSITION_KEYS
        .iter()
        .filter(|(key, _)| by_path_name.contains(key))
        .collect();
    candidates.sort_by_key(|(key, _)| std::cmp::Reverse(key.len()));
    if let Some((_, position)) = candidates.first() {
        return Some(position.to_string());
    }
    hub_port_label(by_path_name)
}

/// Detect a hub connection of the form `usb-0:X.Y.Z:1.0` (three or more
/// dot-separated hops means the device hangs off a hub) and report it as
/// `"Via hub, port Z"`.
fn hub_port_label(by_path_name: &str) -> Option<String> {
    let idx = by_path_name.find("usb-0:")?;
    let after = &by_path_name[idx + "usb-0:".len()..];
    let path_part = after.split(':').next()?;
    let hops: Vec<&str> = path_part.split('.').collect();
    if hops.len() >= 3 {
        let last = hops.last()?;
        Some(format!("Via hub, port {last}"))
    } else {
        None
    }
}

/// A candidate device with its by-id display name, suitable for a
/// `list-device-ids` response.
pub fn list_device_ids() -> Vec<(String, String)> {
    list_ports()
        .into_iter()
        .filter_map(|p| p.display_name.map(|n| (p.path, n)))
        .collect()
}

pub fn port_exists(path: &str) -> bool {
    Path::new(path).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_display_name_strips_wrapper() {
        assert_eq!(
            clean_display_name("usb-Airmar_WX220_A1B2C3-if00-port0"),
            "Airmar WX220 A1B2C3"
        );
    }

    #[test]
    fn classify_position_matches_known_keys() {
        assert_eq!(
            classify_position("pci-0000:01:00.0-usb-0:1.2:1.0-port0"),
            Some("top-right".to_string())
        );
    }

    #[test]
    fn classify_position_longest_prefix_first() {
        // "usb-0:1.1:1.0" and "usb-0:1.1.2:1.0" both could substring-match a
        // name containing the longer one; the longer, more specific key
        // must win.
        let name = "pci-0000:01:00.0-usb-0:1.1.2:1.0-port0";
        assert_eq!(classify_position(name), Some("top-left".to_string()));
    }

    #[test]
    fn hub_connection_reported_separately() {
        let name = "pci-0000:01:00.0-usb-0:1.2.4.3:1.0-port0";
        assert_eq!(classify_position(name), Some("Via hub, port 3".to_string()));
    }
}
