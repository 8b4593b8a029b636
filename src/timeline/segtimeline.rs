//! `SegmentTimeline` generation for the reference representation and its
//! projection onto audio representations.

use crate::asset::{RepData, Segment};
use crate::error::{LivesimError, Result};
use crate::timeline::wraptimes::WrapTimes;

/// One `<S t= d= r=>` run: `r` additional repeats of duration `d` after the
/// segment starting at `t`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimelineEntry {
    pub t: u64,
    pub d: u64,
    pub r: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LastSegInfo {
    pub start_time: u64,
    pub dur: u64,
    pub nr: i64,
    pub timescale: u32,
}

#[derive(Clone, Debug)]
pub struct GeneratedTimeline {
    pub entries: Vec<TimelineEntry>,
    /// -1 if no segment is available yet.
    pub start_nr: i64,
    pub last_seg: Option<LastSegInfo>,
}

fn rel_ms_to_ts(rel_ms: i64, timescale: i64) -> i64 {
    rel_ms * timescale / 1000
}

/// Index of the largest segment whose `endTime <= target`, or `None` if no
/// segment has finished by `target`.
fn locate_idx(segments: &[Segment], target: i64) -> Option<usize> {
    segments.iter().rposition(|s| (s.end_time as i64) <= target)
}

/// Generate the `SegmentTimeline` for the reference representation.
pub fn generate_reference_timeline(
    rep: &RepData,
    wrap: &WrapTimes,
    ato_ts: i64,
) -> Result<GeneratedTimeline> {
    let segments = &rep.segments;
    if segments.is_empty() {
        return Err(LivesimError::Internal(format!(
            "representation {} has no segments",
            rep.id
        )));
    }
    let nr_segs = segments.len() as i64;
    let timescale = rep.media_timescale as i64;
    let wrap_dur_ts = rep.duration() as i64;

    let start_target = rel_ms_to_ts(wrap.start_rel_ms, timescale) + ato_ts;
    let now_target = rel_ms_to_ts(wrap.now_rel_ms, timescale) + ato_ts;

    let mut start_wraps = wrap.start_wraps;
    let mut rel_start_idx = match locate_idx(segments, start_target) {
        Some(idx) => idx,
        None => {
            start_wraps -= 1;
            segments.len() - 1
        }
    };

    let mut now_wraps = wrap.now_wraps;
    let rel_now_idx = match locate_idx(segments, now_target) {
        Some(idx) => idx,
        None => {
            now_wraps -= 1;
            segments.len() - 1
        }
    };

    if now_wraps < 0 {
        return Ok(GeneratedTimeline {
            entries: Vec::new(),
            start_nr: -1,
            last_seg: None,
        });
    }
    // There's no wrap -1 to anchor a segment at a negative start time. Rather
    // than shifting the first presented segment's t negative, keep it at the
    // natural t=0 and shorten its duration to just the portion of the loop
    // that has actually elapsed so far.
    let mut first_seg_shortened_dur: Option<u64> = None;
    if start_wraps < 0 {
        let natural_dur = segments[rel_start_idx].duration();
        let elapsed = start_target.max(0) as u64;
        first_seg_shortened_dur = Some(elapsed.min(natural_dur));
        start_wraps = 0;
        rel_start_idx = 0;
    }

    let start_nr = start_wraps * nr_segs + rel_start_idx as i64;
    let now_nr = now_wraps * nr_segs + rel_now_idx as i64;

    let mut entries: Vec<TimelineEntry> = Vec::new();
    let mut last_seg: Option<LastSegInfo> = None;

    let mut nr = start_nr;
    while nr <= now_nr {
        let seg_wraps = nr.div_euclid(nr_segs);
        let seg_idx = nr.rem_euclid(nr_segs) as usize;
        let seg = &segments[seg_idx];
        let t = (seg_wraps * wrap_dur_ts) as u64 + seg.start_time;
        let d = if nr == start_nr {
            first_seg_shortened_dur.unwrap_or_else(|| seg.duration())
        } else {
            seg.duration()
        };

        if let Some(last) = entries.last_mut() {
            let expected_next_t = last.t + (last.r as u64 + 1) * last.d;
            if last.d == d && expected_next_t == t {
                last.r += 1;
            } else {
                entries.push(TimelineEntry { t, d, r: 0 });
            }
        } else {
            entries.push(TimelineEntry { t, d, r: 0 });
        }

        last_seg = Some(LastSegInfo {
            start_time: t,
            dur: d,
            nr,
            timescale: rep.media_timescale,
        });

        nr += 1;
    }

    Ok(GeneratedTimeline {
        entries,
        start_nr,
        last_seg,
    })
}

/// `calcAudioTimeFromRef`: the smallest multiple of `sampleDur` that is `>=`
/// the reference time projected into the audio timescale.
pub fn calc_audio_time_from_ref(ref_t: i64, ref_ts: i64, sample_dur: i64, audio_ts: i64) -> i64 {
    let numerator = ref_t as i128 * audio_ts as i128;
    let denom = ref_ts as i128 * sample_dur as i128;
    let q = numerator.div_euclid(denom);
    let r = numerator.rem_euclid(denom);
    let k = if r > 0 { q + 1 } else { q };
    (k * sample_dur as i128) as i64
}

/// Project a reference-rep timeline onto an audio representation, grouping
/// consecutive equal-duration segments into `S@r` runs.
pub fn project_timeline_to_audio(
    ref_entries: &[TimelineEntry],
    ref_timescale: u32,
    audio_timescale: u32,
    sample_dur: u32,
) -> Vec<TimelineEntry> {
    let mut audio_entries: Vec<TimelineEntry> = Vec::new();
    for entry in ref_entries {
        for i in 0..=entry.r as u64 {
            let t = entry.t + i * entry.d;
            let a_start = calc_audio_time_from_ref(
                t as i64,
                ref_timescale as i64,
                sample_dur as i64,
                audio_timescale as i64,
            ) as u64;
            let a_end = calc_audio_time_from_ref(
                (t + entry.d) as i64,
                ref_timescale as i64,
                sample_dur as i64,
                audio_timescale as i64,
            ) as u64;
            let a_dur = a_end.saturating_sub(a_start);

            if let Some(last) = audio_entries.last_mut() {
                let expected_next = last.t + (last.r as u64 + 1) * last.d;
                if last.d == a_dur && expected_next == a_start {
                    last.r += 1;
                    continue;
                }
            }
            audio_entries.push(TimelineEntry {
                t: a_start,
                d: a_dur,
                r: 0,
            });
        }
    }
    audio_entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{Addressing, ContentType};
    use crate::timeline::wraptimes;
    use regex::Regex;

    fn rep_with_segments(timescale: u32, seg_dur: u64, n: u64) -> RepData {
        let mut segments = Vec::new();
        for i in 0..n {
            segments.push(Segment {
                start_time: i * seg_dur,
                end_time: (i + 1) * seg_dur,
                nr: i,
                common_sample_dur: Some(seg_dur as u32),
            });
        }
        RepData {
            id: "V300".into(),
            content_type: ContentType::Video,
            codecs: "avc1".into(),
            mpd_timescale: timescale,
            media_timescale: timescale,
            init_template: "V300/init.mp4".into(),
            media_template: "V300/$Number$.m4s".into(),
            addressing: Addressing::Number,
            media_id_regex: Regex::new(r"(\d+)").unwrap(),
            init_segment: vec![],
            segments,
            default_sample_duration: seg_dur as u32,
            start_number: 0,
            constant_sample_duration: Some(seg_dur as u32),
        }
    }

    #[test]
    fn generates_contiguous_entries_across_one_wrap() {
        // 4 segments * 180000 ts @ 90000 ts/s = 2s segments, 8s loop.
        let rep = rep_with_segments(90_000, 180_000, 4);
        let wrap = wraptimes::compute(82_000, 0.0, 60_000, 8000);
        let tl = generate_reference_timeline(&rep, &wrap, 0).unwrap();
        assert!(tl.start_nr >= 0);
        assert!(!tl.entries.is_empty());
        let last = tl.last_seg.unwrap();
        assert_eq!(last.timescale, 90_000);
    }

    #[test]
    fn negative_start_wrap_shortens_first_segment_instead_of_going_negative() {
        // 4 segments * 180000 ts @ 90000 ts/s = 2s segments, 8s loop.
        let rep = rep_with_segments(90_000, 180_000, 4);
        // tsbd pulls the window start back into the middle of segment 0,
        // which has no predecessor wrap to borrow a segment from.
        let wrap = wraptimes::compute(3000, 0.0, 2900, 8000);
        let tl = generate_reference_timeline(&rep, &wrap, 0).unwrap();
        assert_eq!(tl.start_nr, 0);
        assert_eq!(tl.entries[0].t, 0);
        assert!(tl.entries[0].d < 180_000);
        assert_eq!(tl.entries[0].d, 9_000);
    }

    #[test]
    fn no_segment_available_yet_signals_minus_one() {
        let rep = rep_with_segments(90_000, 180_000, 4);
        // AST far in the future relative to now.
        let wrap = wraptimes::compute(0, 1_000_000.0, 0, 8000);
        let tl = generate_reference_timeline(&rep, &wrap, 0).unwrap();
        assert_eq!(tl.start_nr, -1);
        assert!(tl.entries.is_empty());
    }

    #[test]
    fn audio_projection_quantizes_up_to_sample_boundary() {
        let t = calc_audio_time_from_ref(180_000, 90_000, 1024, 48_000);
        // ref 180000/90000s = 2.0s -> 2.0*48000 = 96000 exactly -> multiple of 1024? 96000/1024 = 93.75
        // smallest multiple of 1024 >= 96000 is 94*1024 = 96256.
        assert_eq!(t, 96_256);
    }

    #[test]
    fn audio_projection_groups_equal_duration_runs() {
        let ref_entries = vec![TimelineEntry {
            t: 0,
            d: 180_000,
            r: 3,
        }];
        let audio = project_timeline_to_audio(&ref_entries, 90_000, 48_000, 1024);
        assert!(!audio.is_empty());
        let total_runs: u64 = audio.iter().map(|e| e.r as u64 + 1).sum();
        assert_eq!(total_runs, 4);
    }
}
