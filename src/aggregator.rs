//! Sensor Aggregator (C6): turns validated frames into the latest
//! known reading for each sensor group, plus a bounded rolling history
//! (spec.md §4.6).

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;

use crate::framer::Frame;

fn now() -> i64 {
    crate::link::timestamp_now()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WindApparent {
    pub speed_knots: Option<f64>,
    pub angle_deg: Option<f64>,
    /// Sentence id that last wrote this sub-record (spec.md §3).
    pub source: Option<&'static str>,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WindTrue {
    pub speed_knots: Option<f64>,
    pub angle_deg: Option<f64>,
    pub direction_true_deg: Option<f64>,
    pub direction_magnetic_deg: Option<f64>,
    pub source: Option<&'static str>,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Atmosphere {
    pub barometric_pressure_bar: Option<f64>,
    pub air_temp_c: Option<f64>,
    pub relative_humidity_pct: Option<f64>,
    pub dew_point_c: Option<f64>,
    pub source: Option<&'static str>,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Attitude {
    pub heading_true_deg: Option<f64>,
    pub heading_magnetic_deg: Option<f64>,
    pub magnetic_variation_deg: Option<f64>,
    pub rate_of_turn_deg_per_min: Option<f64>,
    pub pitch_deg: Option<f64>,
    pub roll_deg: Option<f64>,
    /// Sentence id currently claiming `heading_true_deg`, per the priority
    /// chain in [`heading_priority`] (spec.md §3, §4.6).
    pub source: Option<&'static str>,
    pub updated_at: Option<i64>,
    #[serde(skip)]
    heading_priority: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Gps {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub fix_quality: Option<u8>,
    pub num_satellites: Option<u8>,
    pub hdop: Option<f64>,
    pub altitude_m: Option<f64>,
    pub course_over_ground_deg: Option<f64>,
    pub speed_over_ground_knots: Option<f64>,
    /// Sentence id currently claiming `source`: `GPGGA` outranks `GPVTG`
    /// (spec.md §4.6), since GGA carries the richer fix.
    pub source: Option<&'static str>,
    pub updated_at: Option<i64>,
    #[serde(skip)]
    gps_priority: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TimeOfDay {
    pub utc_time: Option<String>,
    pub day: Option<u8>,
    pub month: Option<u8>,
    pub year: Option<u16>,
    pub source: Option<&'static str>,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SensorSnapshot {
    pub wind_apparent: WindApparent,
    pub wind_true: WindTrue,
    pub atmosphere: Atmosphere,
    pub attitude: Attitude,
    pub gps: Gps,
    pub time: TimeOfDay,
}

/// Heading-source priority, lower wins on refresh (spec.md §4.6):
/// HCHDT > YXXDR > HCHDG/CHDG > TIROT. Only heading-producing sources are
/// ranked; TIROT only ever sets `rate_of_turn_deg_per_min`.
fn heading_priority(source: &'static str) -> u8 {
    match source {
        "HDT" => 0,
        "XDR" => 1,
        "HDG" => 2,
        "ROT" => 3,
        _ => 255,
    }
}

/// GPS-source priority, lower wins on refresh (spec.md §4.6): GPGGA > GPVTG.
fn gps_priority_rank(source: &'static str) -> u8 {
    match source {
        "GPGGA" => 0,
        "GPVTG" => 1,
        _ => 255,
    }
}

/// A single bounded, 15-minute-pruned time series (spec.md §4.6 "History").
#[derive(Debug, Clone, Default)]
pub struct TimeSeries {
    points: VecDeque<(i64, f64)>,
}

impl TimeSeries {
    fn push(&mut self, ts: i64, value: f64, window_secs: i64) {
        self.points.push_back((ts, value));
        let cutoff = ts - window_secs;
        while matches!(self.points.front(), Some((t, _)) if *t < cutoff) {
            self.points.pop_front();
        }
    }

    pub fn points(&self) -> Vec<(i64, f64)> {
        self.points.iter().copied().collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct History {
    pub wind_speed_apparent: TimeSeries,
    pub wind_angle_apparent: TimeSeries,
    pub wind_speed_true: TimeSeries,
    pub wind_direction_true: TimeSeries,
    pub air_temp_c: TimeSeries,
    pub humidity_pct: TimeSeries,
    pub barometric_pressure_bar: TimeSeries,
    pub heading_true_deg: TimeSeries,
    pub rate_of_turn_deg_per_min: TimeSeries,
    pub pitch_deg: TimeSeries,
    pub roll_deg: TimeSeries,
    pub gps_speed_over_ground_knots: TimeSeries,
    pub gps_course_over_ground_deg: TimeSeries,
    pub gps_satellites: TimeSeries,
}

pub struct Aggregator {
    snapshot: Mutex<SensorSnapshot>,
    history: Mutex<History>,
    window_secs: i64,
}

impl Aggregator {
    pub fn new(window_secs: u64) -> Self {
        Self {
            snapshot: Mutex::new(SensorSnapshot::default()),
            history: Mutex::new(History::default()),
            window_secs: window_secs as i64,
        }
    }

    pub fn snapshot(&self) -> SensorSnapshot {
        self.snapshot.lock().unwrap().clone()
    }

    pub fn history(&self) -> History {
        self.history.lock().unwrap().clone()
    }

    /// Clear all readings and history, e.g. on disconnect (spec.md §4.8).
    pub fn reset(&self) {
        *self.snapshot.lock().unwrap() = SensorSnapshot::default();
        *self.history.lock().unwrap() = History::default();
    }

    /// Ingest one checksum-verified frame. Unmapped or malformed sentences
    /// are silently skipped here; the Sentence Reader already counted them.
    pub fn ingest(&self, frame: &Frame) {
        let fields = frame.fields();
        match frame.talker_type().as_str() {
            "WIMWV" => self.ingest_mwv(&fields),
            "WIMWD" => self.ingest_mwd(&fields),
            "WIMDA" => self.ingest_mda(&fields),
            "HCHDT" => self.ingest_hdt(&fields),
            "HCHDG" | "CHDG" => self.ingest_hdg(&fields),
            "TIROT" => self.ingest_rot(&fields),
            "YXXDR" => self.ingest_xdr(&fields),
            "GPGGA" => self.ingest_gga(&fields),
            "GPVTG" => self.ingest_vtg(&fields),
            "GPZDA" => self.ingest_zda(&fields),
            _ => {}
        }
    }

    fn ingest_mwv(&self, f: &[&str]) {
        if f.len() < 6 || f[5] != "A" {
            return;
        }
        let angle: Option<f64> = f[1].parse().ok();
        let speed: Option<f64> = f[3].parse().ok();
        let ts = now();
        let mut snap = self.snapshot.lock().unwrap();
        match f[2] {
            "R" => {
                snap.wind_apparent.angle_deg = angle;
                snap.wind_apparent.speed_knots = speed;
                snap.wind_apparent.source = Some("WIMWV");
                snap.wind_apparent.updated_at = Some(ts);
                if let Some(s) = speed {
                    self.history.lock().unwrap().wind_speed_apparent.push(ts, s, self.window_secs);
                }
                if let Some(a) = angle {
                    self.history.lock().unwrap().wind_angle_apparent.push(ts, a, self.window_secs);
                }
            }
            "T" => {
                snap.wind_true.angle_deg = angle;
                snap.wind_true.speed_knots = speed;
                snap.wind_true.source = Some("WIMWV");
                snap.wind_true.updated_at = Some(ts);
                if let Some(s) = speed {
                    self.history.lock().unwrap().wind_speed_true.push(ts, s, self.window_secs);
                }
            }
            _ => {}
        }
    }

    fn ingest_mwd(&self, f: &[&str]) {
        if f.len() < 5 {
            return;
        }
        let direction_true: Option<f64> = f[1].parse().ok();
        let direction_magnetic: Option<f64> = f[3].parse().ok();
        let speed_knots: Option<f64> = f.get(5).and_then(|v| v.parse().ok());
        let ts = now();
        let mut snap = self.snapshot.lock().unwrap();
        snap.wind_true.direction_true_deg = direction_true;
        snap.wind_true.direction_magnetic_deg = direction_magnetic;
        if speed_knots.is_some() {
            snap.wind_true.speed_knots = speed_knots;
        }
        snap.wind_true.source = Some("WIMWD");
        snap.wind_true.updated_at = Some(ts);
        if let Some(d) = direction_true {
            self.history.lock().unwrap().wind_direction_true.push(ts, d, self.window_secs);
        }
    }

    fn ingest_mda(&self, f: &[&str]) {
        if f.len() < 12 {
            return;
        }
        let pressure_bar: Option<f64> = f[3].parse().ok();
        let air_temp: Option<f64> = f[5].parse().ok();
        let humidity: Option<f64> = f[9].parse().ok();
        let dew_point: Option<f64> = f.get(11).and_then(|v| v.parse().ok());
        let ts = now();
        let mut snap = self.snapshot.lock().unwrap();
        snap.atmosphere.barometric_pressure_bar = pressure_bar;
        snap.atmosphere.air_temp_c = air_temp;
        snap.atmosphere.relative_humidity_pct = humidity;
        snap.atmosphere.dew_point_c = dew_point;
        snap.atmosphere.source = Some("WIMDA");
        snap.atmosphere.updated_at = Some(ts);
        if let Some(p) = pressure_bar {
            self.history.lock().unwrap().barometric_pressure_bar.push(ts, p, self.window_secs);
        }
        if let Some(t) = air_temp {
            self.history.lock().unwrap().air_temp_c.push(ts, t, self.window_secs);
        }
        if let Some(h) = humidity {
            self.history.lock().unwrap().humidity_pct.push(ts, h, self.window_secs);
        }
    }

    /// Claim `source`/`heading_true_deg` for `source` if it outranks (or
    /// matches) whatever currently holds priority. `heading: None` is a
    /// bookkeeping-only call: it lets a source (e.g. ROT, which carries no
    /// heading value) still participate in the fallback chain so it can
    /// become the attributed source when nothing better has been seen yet,
    /// without touching `heading_true_deg` (spec.md §4.6).
    fn set_heading(&self, source: &'static str, heading: Option<f64>, ts: i64) {
        let mut snap = self.snapshot.lock().unwrap();
        let incoming = heading_priority(source);
        let should_claim = snap
            .attitude
            .heading_priority
            .map(|current| incoming <= current)
            .unwrap_or(true);
        if should_claim {
            if heading.is_some() {
                snap.attitude.heading_true_deg = heading;
            }
            snap.attitude.source = Some(source);
            snap.attitude.heading_priority = Some(incoming);
        }
        snap.attitude.updated_at = Some(ts);
        drop(snap);
        if let Some(h) = heading {
            self.history.lock().unwrap().heading_true_deg.push(ts, h, self.window_secs);
        }
    }

    fn ingest_hdt(&self, f: &[&str]) {
        if f.len() < 2 {
            return;
        }
        let heading: Option<f64> = f[1].parse().ok();
        self.set_heading("HDT", heading, now());
    }

    fn ingest_hdg(&self, f: &[&str]) {
        if f.len() < 6 {
            return;
        }
        let heading_mag: Option<f64> = f[1].parse().ok();
        let variation: Option<f64> = f[4].parse().ok();
        let var_dir = f[5];
        let ts = now();
        {
            let mut snap = self.snapshot.lock().unwrap();
            snap.attitude.heading_magnetic_deg = heading_mag;
            snap.attitude.magnetic_variation_deg = match (variation, var_dir) {
                (Some(v), "W") => Some(-v),
                (Some(v), _) => Some(v),
                (None, _) => None,
            };
        }
        self.set_heading("HDG", heading_mag, ts);
    }

    fn ingest_rot(&self, f: &[&str]) {
        if f.len() < 3 || f[2] != "A" {
            return;
        }
        let rot: Option<f64> = f[1].parse().ok();
        let ts = now();
        {
            let mut snap = self.snapshot.lock().unwrap();
            snap.attitude.rate_of_turn_deg_per_min = rot;
        }
        if let Some(r) = rot {
            self.history.lock().unwrap().rate_of_turn_deg_per_min.push(ts, r, self.window_secs);
        }
        // TIROT carries no heading value; this only lets ROT claim
        // `attitude.source` as the lowest-priority fallback.
        self.set_heading("ROT", None, ts);
    }

    /// `$YXXDR` carries repeating groups of four: type, value, units, name.
    /// Only `PTCH`/`ROLL` named groups are mapped (spec.md §4.6).
    fn ingest_xdr(&self, f: &[&str]) {
        let ts = now();
        let mut pitch = None;
        let mut roll = None;
        let body = &f[1..];
        for group in body.chunks(4) {
            if group.len() < 4 {
                continue;
            }
            let value: Option<f64> = group[1].parse().ok();
            match group[3] {
                "PTCH" => pitch = value,
                "ROLL" => roll = value,
                _ => {}
            }
        }
        if pitch.is_none() && roll.is_none() {
            return;
        }
        {
            let mut snap = self.snapshot.lock().unwrap();
            if pitch.is_some() {
                snap.attitude.pitch_deg = pitch;
            }
            if roll.is_some() {
                snap.attitude.roll_deg = roll;
            }
        }
        {
            let mut hist = self.history.lock().unwrap();
            if let Some(p) = pitch {
                hist.pitch_deg.push(ts, p, self.window_secs);
            }
            if let Some(r) = roll {
                hist.roll_deg.push(ts, r, self.window_secs);
            }
        }
        // YXXDR carries no heading value in this registry (only PTCH/ROLL);
        // this only lets XDR claim `attitude.source` per the priority chain.
        self.set_heading("XDR", None, ts);
    }

    fn ingest_gga(&self, f: &[&str]) {
        if f.len() < 10 {
            return;
        }
        let lat = decode_coord(f[2], f[3]);
        let lon = decode_coord(f[4], f[5]);
        let fix_quality: Option<u8> = f[6].parse().ok();
        let num_satellites: Option<u8> = f[7].parse().ok();
        let hdop: Option<f64> = f[8].parse().ok();
        let altitude: Option<f64> = f[9].parse().ok();
        let ts = now();
        {
            let mut snap = self.snapshot.lock().unwrap();
            snap.gps.latitude = lat;
            snap.gps.longitude = lon;
            snap.gps.fix_quality = fix_quality;
            snap.gps.num_satellites = num_satellites;
            snap.gps.hdop = hdop;
            snap.gps.altitude_m = altitude;
            self.claim_gps_source(&mut snap.gps, "GPGGA");
            snap.gps.updated_at = Some(ts);
        }
        if let Some(n) = num_satellites {
            self.history.lock().unwrap().gps_satellites.push(ts, n as f64, self.window_secs);
        }
    }

    fn ingest_vtg(&self, f: &[&str]) {
        if f.len() < 6 {
            return;
        }
        let course: Option<f64> = f[1].parse().ok();
        let speed_knots: Option<f64> = f[5].parse().ok();
        let ts = now();
        {
            let mut snap = self.snapshot.lock().unwrap();
            snap.gps.course_over_ground_deg = course;
            snap.gps.speed_over_ground_knots = speed_knots;
            self.claim_gps_source(&mut snap.gps, "GPVTG");
            snap.gps.updated_at = Some(ts);
        }
        let mut hist = self.history.lock().unwrap();
        if let Some(c) = course {
            hist.gps_course_over_ground_deg.push(ts, c, self.window_secs);
        }
        if let Some(s) = speed_knots {
            hist.gps_speed_over_ground_knots.push(ts, s, self.window_secs);
        }
    }

    /// Claim `gps.source` for `source` if it outranks (or matches) whatever
    /// currently holds priority (spec.md §4.6: `GPGGA > GPVTG`). The actual
    /// fields written by GGA and VTG never overlap, so this only gates the
    /// `source` label, not the field writes themselves.
    fn claim_gps_source(&self, gps: &mut Gps, source: &'static str) {
        let incoming = gps_priority_rank(source);
        if gps.gps_priority.map(|current| incoming <= current).unwrap_or(true) {
            gps.source = Some(source);
            gps.gps_priority = Some(incoming);
        }
    }

    fn ingest_zda(&self, f: &[&str]) {
        if f.len() < 5 {
            return;
        }
        let ts = now();
        let mut snap = self.snapshot.lock().unwrap();
        snap.time.utc_time = Some(f[1].to_string());
        snap.time.day = f[2].parse().ok();
        snap.time.month = f[3].parse().ok();
        snap.time.year = f[4].parse().ok();
        snap.time.source = Some("GPZDA");
        snap.time.updated_at = Some(ts);
    }
}

/// Decode a `ddmm.mmmm` / `dddmm.mmmm` coordinate field to signed decimal
/// degrees, rounded to 6 decimal places (spec.md §4.6).
fn decode_coord(raw: &str, hemisphere: &str) -> Option<f64> {
    if raw.is_empty() {
        return None;
    }
    let value: f64 = raw.parse().ok()?;
    let degrees = (value / 100.0).floor();
    let minutes = value - degrees * 100.0;
    let mut decimal = degrees + minutes / 60.0;
    if hemisphere == "S" || hemisphere == "W" {
        decimal = -decimal;
    }
    Some((decimal * 1_000_000.0).round() / 1_000_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::frame;

    fn checksummed(body: &str) -> crate::framer::Frame {
        let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
        frame(&format!("${body}*{checksum:02X}")).into_iter().next().unwrap()
    }

    #[test]
    fn mwv_requires_valid_status() {
        let agg = Aggregator::new(900);
        agg.ingest(&checksummed("WIMWV,045.0,R,12.3,N,V"));
        assert!(agg.snapshot().wind_apparent.speed_knots.is_none());
        agg.ingest(&checksummed("WIMWV,045.0,R,12.3,N,A"));
        assert_eq!(agg.snapshot().wind_apparent.speed_knots, Some(12.3));
    }

    #[test]
    fn heading_source_priority_favors_hdt_over_hdg() {
        let agg = Aggregator::new(900);
        agg.ingest(&checksummed("HCHDG,100.0,2.0,E,3.0,W"));
        assert_eq!(agg.snapshot().attitude.source, Some("HDG"));
        agg.ingest(&checksummed("HCHDT,123.4,T"));
        assert_eq!(agg.snapshot().attitude.source, Some("HDT"));
        assert_eq!(agg.snapshot().attitude.heading_true_deg, Some(123.4));
        // A lower-priority HDG update must not evict the HDT heading.
        agg.ingest(&checksummed("HCHDG,200.0,2.0,E,3.0,W"));
        assert_eq!(agg.snapshot().attitude.source, Some("HDT"));
    }

    #[test]
    fn rot_only_becomes_fallback_heading_source() {
        let agg = Aggregator::new(900);
        agg.ingest(&checksummed("TIROT,5.0,A"));
        // TIROT carries no heading value, but it still claims attribution
        // when nothing higher-priority has been seen yet.
        assert_eq!(agg.snapshot().attitude.source, Some("ROT"));
        assert_eq!(agg.snapshot().attitude.heading_true_deg, None);
        agg.ingest(&checksummed("HCHDT,90.0,T"));
        assert_eq!(agg.snapshot().attitude.source, Some("HDT"));
        assert_eq!(agg.snapshot().attitude.heading_true_deg, Some(90.0));
        // ROT must not evict HDT afterwards.
        agg.ingest(&checksummed("TIROT,5.0,A"));
        assert_eq!(agg.snapshot().attitude.source, Some("HDT"));
    }

    #[test]
    fn gps_source_priority_favors_gga_over_vtg() {
        let agg = Aggregator::new(900);
        agg.ingest(&checksummed("GPVTG,090.0,T,,M,12.3,N,,K"));
        assert_eq!(agg.snapshot().gps.source, Some("GPVTG"));
        agg.ingest(&checksummed("GPGGA,120000,4916.45,N,12311.12,W,1,08,0.9,545.4,M,46.9,M,,"));
        assert_eq!(agg.snapshot().gps.source, Some("GPGGA"));
        // A later VTG must not evict the higher-priority GGA source.
        agg.ingest(&checksummed("GPVTG,090.0,T,,M,12.3,N,,K"));
        assert_eq!(agg.snapshot().gps.source, Some("GPGGA"));
        assert_eq!(agg.snapshot().gps.speed_over_ground_knots, Some(12.3));
    }

    #[test]
    fn xdr_maps_pitch_and_roll() {
        let agg = Aggregator::new(900);
        agg.ingest(&checksummed("YXXDR,A,1.2,D,PTCH,A,-0.5,D,ROLL"));
        let snap = agg.snapshot();
        assert_eq!(snap.attitude.pitch_deg, Some(1.2));
        assert_eq!(snap.attitude.roll_deg, Some(-0.5));
    }

    #[test]
    fn gga_decodes_coordinates() {
        let agg = Aggregator::new(900);
        agg.ingest(&checksummed("GPGGA,120000,4916.45,N,12311.12,W,1,08,0.9,545.4,M,46.9,M,,"));
        let snap = agg.snapshot();
        assert_eq!(snap.gps.latitude, Some(49.2741666667_f64.round_to(6)));
    }

    trait RoundTo {
        fn round_to(self, places: i32) -> f64;
    }
    impl RoundTo for f64 {
        fn round_to(self, places: i32) -> f64 {
            let factor = 10f64.powi(places);
            (self * factor).round() / factor
        }
    }

    #[test]
    fn history_prunes_outside_window() {
        let ts_series = TimeSeries::default();
        let mut series = ts_series;
        series.push(100, 1.0, 900);
        series.push(1100, 2.0, 900);
        // 100 is now older than (1100 - 900) = 200, so it must be pruned.
        assert_eq!(series.points(), vec![(1100, 2.0)]);
    }
}
