//! TTML timestamp shifting, shared by the segment rewriter and the
//! time-based subtitle generator.
//!
//! Matches every `hh:mm:ss[.mmm]` substring and adds a millisecond offset;
//! the output always carries the milliseconds component, even when the
//! input omitted it.

use std::sync::OnceLock;

use regex::Regex;

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d\d+):(\d\d):(\d\d)(?:\.(\d\d\d))?").expect("static regex"))
}

/// Add `shift_ms` to every TTML clock-time-like substring of `input`.
/// Results are clamped at zero — a segment can never carry a negative cue
/// time.
pub fn shift_ttml_timestamps(input: &str, shift_ms: i64) -> String {
    timestamp_re()
        .replace_all(input, |caps: &regex::Captures| {
            let h: i64 = caps[1].parse().unwrap_or(0);
            let m: i64 = caps[2].parse().unwrap_or(0);
            let s: i64 = caps[3].parse().unwrap_or(0);
            let ms: i64 = caps.get(4).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            let total = (h * 3_600_000 + m * 60_000 + s * 1000 + ms + shift_ms).max(0);
            let hh = total / 3_600_000;
            let mm = (total % 3_600_000) / 60_000;
            let ss = (total % 60_000) / 1000;
            let mmm = total % 1000;
            format!("{hh:02}:{mm:02}:{ss:02}.{mmm:03}")
        })
        .into_owned()
}

/// `round(timeShiftTS*1000/timescale)` — the millisecond offset derived from
/// a media-timescale shift.
pub fn shift_ms_from_ts(shift_ts: i64, timescale: u32) -> i64 {
    ((shift_ts as f64) * 1000.0 / timescale as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_milliseconds_component_when_absent() {
        let out = shift_ttml_timestamps("begin=\"00:00:10\"", 500);
        assert_eq!(out, "begin=\"00:00:10.500\"");
    }

    #[test]
    fn adds_offset_preserving_existing_millis() {
        let out = shift_ttml_timestamps("00:00:01.250", 1750);
        assert_eq!(out, "00:00:03.000");
    }

    #[test]
    fn rewrites_every_timestamp_in_the_document() {
        let doc = r#"<p begin="00:00:01.000" end="00:00:02.500">hi</p>"#;
        let out = shift_ttml_timestamps(doc, 1000);
        assert_eq!(
            out,
            r#"<p begin="00:00:02.000" end="00:00:03.500">hi</p>"#
        );
    }

    #[test]
    fn round_trip_holds_when_nonnegative() {
        let original = "01:02:03.456";
        let shifted = shift_ttml_timestamps(original, 7_890);
        let back = shift_ttml_timestamps(&shifted, -7_890);
        assert_eq!(back, original);
    }

    #[test]
    fn clamps_at_zero_instead_of_going_negative() {
        let out = shift_ttml_timestamps("00:00:01.000", -5_000);
        assert_eq!(out, "00:00:00.000");
    }

    #[test]
    fn shift_ms_from_ts_rounds_to_nearest() {
        assert_eq!(shift_ms_from_ts(45, 90_000), 1); // 0.5ms rounds away from zero
        assert_eq!(shift_ms_from_ts(90, 90_000), 1);
        assert_eq!(shift_ms_from_ts(180_000, 90_000), 2000);
    }
}
