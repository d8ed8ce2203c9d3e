//! Framer & Checksum (C2): turns a raw byte chunk from the serial port into
//! discrete candidate NMEA lines, verifies the XOR checksum, and classifies
//! talker+type.

/// Checksum verification outcome for a framed candidate line (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumOutcome {
    Ok,
    Mismatch,
    Missing,
}

/// A framed candidate line, checksum-classified but not yet parsed into
/// fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw ASCII line, without `$` stripped and without a line terminator.
    pub raw: String,
    pub outcome: ChecksumOutcome,
}

impl Frame {
    /// The talker+type code: the leading run of A-Z characters in the first
    /// comma-separated field, `$` dropped (e.g. `"HCHDG"`).
    ///
    /// This rule is essential: a truncated prior line can leave a fragment
    /// like `HCHDG31.0` whose type is still `HCHDG` (spec.md §4.1).
    pub fn talker_type(&self) -> String {
        let first_field = self.raw.trim_start_matches('$').split(',').next().unwrap_or("");
        first_field.chars().take_while(|c| c.is_ascii_uppercase()).collect()
    }

    /// Comma-separated fields of the sentence body (checksum suffix already
    /// stripped), including the leading `$TYPE` field at index 0.
    pub fn fields(&self) -> Vec<&str> {
        let body = self.raw.splitn(2, '*').next().unwrap_or(&self.raw);
        body.split(',').collect()
    }
}

/// Frame a raw chunk read from the serial port into candidate lines.
///
/// Handles the three field pathologies from spec.md §4.1: sentences
/// concatenated with no terminator, sentences separated by CR/LF, and a
/// truncated prefix/suffix with no terminator at all.
pub fn frame(chunk: &str) -> Vec<Frame> {
    // Normalize CR/LF to a single separator so concatenated-with-CRLF input
    // doesn't produce empty fragments between the two terminator bytes.
    let normalized = chunk.replace("\r\n", "\n").replace('\r', "\n");

    let mut frames = Vec::new();
    for segment in normalized.split('\n') {
        for fragment in segment.split('$') {
            if fragment.is_empty() || !fragment.contains(',') {
                continue;
            }
            let raw = format!("${fragment}");
            let outcome = verify_checksum(&raw);
            frames.push(Frame { raw, outcome });
        }
    }
    frames
}

/// Verify the XOR checksum of a candidate line (`$`-prefixed, no line
/// terminator). XOR is computed over every byte strictly between the
/// leading `$` and the `*`, as 8-bit ASCII.
fn verify_checksum(raw: &str) -> ChecksumOutcome {
    let body = raw.strip_prefix('$').unwrap_or(raw);
    let Some((inner, suffix)) = body.split_once('*') else {
        return ChecksumOutcome::Missing;
    };
    let declared_hex: String = suffix.chars().take(2).collect();
    if declared_hex.len() != 2 {
        return ChecksumOutcome::Missing;
    }
    let Ok(declared) = u8::from_str_radix(&declared_hex, 16) else {
        return ChecksumOutcome::Missing;
    };
    let actual = inner.bytes().fold(0u8, |acc, b| acc ^ b);
    if actual == declared {
        ChecksumOutcome::Ok
    } else {
        ChecksumOutcome::Mismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_concatenated_with_no_terminator() {
        let frames = frame("$HCHDG,123.4,,,5.0,E*7C$WIMWV,045.0,R,12.3,N,A*1A");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].talker_type(), "HCHDG");
        assert_eq!(frames[1].talker_type(), "WIMWV");
    }

    #[test]
    fn splits_on_crlf() {
        let frames = frame("$A,1*58\r\n$B,2*5B");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].talker_type(), "A");
        assert_eq!(frames[1].talker_type(), "B");
    }

    #[test]
    fn discards_garbage_prefix() {
        let frames = frame("garbage$A,1*58");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].talker_type(), "A");
    }

    #[test]
    fn truncated_prefix_still_yields_correct_type() {
        // A prior read left a truncated "HCHDG31.0,..." fragment with no
        // leading '$' recovered from a previous chunk boundary.
        let frames = frame("$HCHDG31.0,,,5.0,E*00\r\n$WIMWV,045.0,R,12.3,N,A*1A");
        assert_eq!(frames[0].talker_type(), "HCHDG");
    }

    #[test]
    fn checksum_ok_mismatch_missing_all_counted() {
        let body = "GPGGA,1";
        let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
        let good = format!("${body}*{checksum:02X}");
        let bad = format!("${body}*{:02X}", checksum ^ 0xFF);
        let missing = format!("${body}");

        assert_eq!(frame(&good)[0].outcome, ChecksumOutcome::Ok);
        assert_eq!(frame(&bad)[0].outcome, ChecksumOutcome::Mismatch);
        assert_eq!(frame(&missing)[0].outcome, ChecksumOutcome::Missing);
    }

    #[test]
    fn fields_strip_checksum_suffix() {
        let frames = frame("$WIMWV,045.0,R,12.3,N,A*1A");
        let fields = frames[0].fields();
        assert_eq!(fields[0], "$WIMWV");
        assert_eq!(fields[1], "045.0");
        assert_eq!(fields.last(), Some(&"A"));
    }
}
