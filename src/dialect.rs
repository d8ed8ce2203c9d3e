//! Device Dialect (C3): encode/decode the Airmar `$PAMTX`/`$PAMTC`/`$PAMTR`
//! command set (spec.md §4.2).

/// A decoded `$PAMTR,EN,...` reply line: one sentence's current cadence as
/// reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PamtrEntry {
    pub id: &'static str,
    pub enabled: bool,
    pub interval_tenths: u8,
}

/// Encode `$PAMTX` (stop) or `$PAMTX,1` (resume) periodic transmission.
pub fn encode_pamtx(resume: bool) -> String {
    if resume {
        "$PAMTX,1\r\n".to_string()
    } else {
        "$PAMTX\r\n".to_string()
    }
}

/// Encode `$PAMTC,BAUD,<rate>`.
pub fn encode_baud_change(rate: u32) -> String {
    format!("$PAMTC,BAUD,{rate}\r\n")
}

/// Encode `$PAMTC,EN,<id>,<0|1>,<interval_tenths>`.
pub fn encode_enable(id: &str, enabled: bool, interval_tenths: u8) -> String {
    format!(
        "$PAMTC,EN,{id},{},{interval_tenths}\r\n",
        if enabled { 1 } else { 0 }
    )
}

/// Encode `$PAMTC,EN,Q` (query current sentence configuration).
pub fn encode_query() -> String {
    "$PAMTC,EN,Q\r\n".to_string()
}

/// Encode `$PAMTC,EN,S` (persist to device EEPROM).
pub fn encode_save_eeprom() -> String {
    "$PAMTC,EN,S\r\n".to_string()
}

/// Encode `$PAMTC,EN,LD` (load factory defaults into RAM).
pub fn encode_load_defaults() -> String {
    "$PAMTC,EN,LD\r\n".to_string()
}

/// Parse a `$PAMTR,EN,...` reply line. The implementer must accept two field
/// layouts and pick by checking which candidate position holds a known
/// [`crate::registry::SentenceSpec`] id (spec.md §4.2):
///
///   - `<id>,<enabled>,<interval>`
///   - `<total>,<index>,<id>,<enabled>,<interval>`
///
/// Returns `None` if the line isn't a `$PAMTR,EN,...` reply, or its id is
/// unknown to the registry (silently ignored per spec.md).
pub fn parse_pamtr(line: &str) -> Option<PamtrEntry> {
    let body = line.trim_start_matches('$').split('*').next()?;
    let mut fields = body.split(',');
    let head = fields.next()?;
    if head != "PAMTR" {
        return None;
    }
    let tag = fields.next()?;
    if tag != "EN" {
        return None;
    }
    let rest: Vec<&str> = fields.collect();

    // Short layout: <id>,<enabled>,<interval>
    if rest.len() == 3 {
        if let Some(entry) = try_layout(&rest, 0) {
            return Some(entry);
        }
    }
    // Long layout: <total>,<index>,<id>,<enabled>,<interval>
    if rest.len() == 5 {
        if let Some(entry) = try_layout(&rest, 2) {
            return Some(entry);
        }
    }
    None
}

fn try_layout(rest: &[&str], id_pos: usize) -> Option<PamtrEntry> {
    let id_str = rest.get(id_pos)?;
    let spec = crate::registry::find(id_str)?;
    let enabled = *rest.get(id_pos + 1)? == "1";
    let interval_tenths: u8 = rest.get(id_pos + 2)?.parse().ok()?;
    Some(PamtrEntry {
        id: spec.id,
        enabled,
        interval_tenths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_commands() {
        assert_eq!(encode_pamtx(false), "$PAMTX\r\n");
        assert_eq!(encode_pamtx(true), "$PAMTX,1\r\n");
        assert_eq!(encode_baud_change(38400), "$PAMTC,BAUD,38400\r\n");
        assert_eq!(encode_enable("ZDA", true, 10), "$PAMTC,EN,ZDA,1,10\r\n");
        assert_eq!(encode_query(), "$PAMTC,EN,Q\r\n");
    }

    #[test]
    fn parses_short_layout() {
        let entry = parse_pamtr("$PAMTR,EN,ZDA,1,10*00").unwrap();
        assert_eq!(entry.id, "ZDA");
        assert!(entry.enabled);
        assert_eq!(entry.interval_tenths, 10);
    }

    #[test]
    fn parses_long_layout() {
        let entry = parse_pamtr("$PAMTR,EN,27,3,HDT,0,20*00").unwrap();
        assert_eq!(entry.id, "HDT");
        assert!(!entry.enabled);
        assert_eq!(entry.interval_tenths, 20);
    }

    #[test]
    fn unknown_id_is_ignored() {
        assert!(parse_pamtr("$PAMTR,EN,ZZZ,1,10*00").is_none());
    }

    #[test]
    fn round_trip_every_spec_id() {
        for spec in crate::registry::SENTENCES {
            let cmd = encode_enable(spec.id, true, 25);
            assert_eq!(cmd, format!("$PAMTC,EN,{},1,25\r\n", spec.id));
            let reply = format!("$PAMTR,EN,{},1,25*00", spec.id);
            let decoded = parse_pamtr(&reply).unwrap();
            assert_eq!(decoded.id, spec.id);
            assert!(decoded.enabled);
            assert_eq!(decoded.interval_tenths, 25);
        }
    }
}
