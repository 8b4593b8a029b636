//! Availability-window policy: `TooEarly` / `Gone` classification for a
//! resolved segment.

use crate::error::{LivesimError, Result};
use crate::options::Ato;

/// Checks whether `segMeta`'s end (at `new_time_ts + new_dur_ts`, relative
/// to stream start) is available at wall-clock `now_s`, given the
/// representation's `timescale`, the presentation's `ast_s`, an optional
/// `availabilityTimeOffset`, the configured `tsbd_s`, and the availability
/// `margin_s` tolerance (a small constant, e.g. 10s).
pub fn check(
    new_time_ts: u64,
    new_dur_ts: u64,
    timescale: u32,
    ast_s: f64,
    ato: Option<Ato>,
    now_s: f64,
    tsbd_s: u64,
    margin_s: u64,
) -> Result<()> {
    let mut seg_avail_time_s =
        ast_s + (new_time_ts + new_dur_ts) as f64 / timescale as f64;

    let is_infinite_ato = matches!(ato, Some(Ato::Infinite));
    if let Some(Ato::Finite(offset)) = ato {
        if offset > 0.0 {
            seg_avail_time_s -= offset;
        }
    }

    if !is_infinite_ato && seg_avail_time_s > now_s {
        let delta_ms = ((seg_avail_time_s - now_s) * 1000.0).round() as u64;
        return Err(LivesimError::TooEarly(delta_ms));
    }
    if seg_avail_time_s < now_s - (tsbd_s + margin_s) as f64 {
        return Err(LivesimError::Gone(format!(
            "segment available at {seg_avail_time_s}, now {now_s}, tsbd+margin {}",
            tsbd_s + margin_s
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_early_reports_exact_delta() {
        // segment ends at 50.0s (new_time=0, new_dur=50*90000 at ts=90000), now=49.5s
        let err = check(0, 50 * 90_000, 90_000, 0.0, None, 49.5, 60, 10).unwrap_err();
        match err {
            LivesimError::TooEarly(ms) => assert_eq!(ms, 500),
            other => panic!("expected TooEarly, got {other:?}"),
        }
    }

    #[test]
    fn gone_past_tsbd_plus_margin() {
        let err = check(0, 10 * 90_000, 90_000, 0.0, None, 200.0, 60, 10).unwrap_err();
        assert!(matches!(err, LivesimError::Gone(_)));
    }

    #[test]
    fn infinite_ato_is_always_available() {
        check(0, 1_000_000 * 90_000, 90_000, 0.0, Some(Ato::Infinite), 1.0, 60, 10).unwrap();
    }

    #[test]
    fn within_window_succeeds() {
        check(0, 10 * 90_000, 90_000, 0.0, None, 10.5, 60, 10).unwrap();
    }
}
