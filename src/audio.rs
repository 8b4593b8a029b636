//! Audio reconstruction: assembles each output audio segment from a recipe
//! of sample ranges drawn from the looped VoD audio.
//!
//! Audio frame boundaries rarely line up with the reference (video)
//! segment cadence, so every output audio segment is assembled from a
//! *recipe* describing which sample ranges of the looped VoD audio to
//! concatenate, quantized up to the audio representation's fixed sample
//! duration and carrying last-sample repetition across loop boundaries.

use crate::asset::{Asset, AssetIndex, RepData};
use crate::error::{LivesimError, Result};
use crate::mp4box::{self, FullSample};
use crate::timeline::calc_audio_time_from_ref;
use crate::timeline::resolve;

/// Which input sample ranges to glue together to synthesize one output
/// audio segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioRecipe {
    pub rep_id: String,
    pub seg_nr: i64,
    pub start_time: u64,
    pub end_time: u64,
    /// Position inside one loop of VoD audio where input starts.
    pub audio_in_start: u64,
    /// Position inside one loop of VoD audio where input ends, before any
    /// wraparound carve-off.
    pub audio_in_end: u64,
    /// Non-zero iff `audio_in_end` crossed the loop boundary: the amount of
    /// additional audio that must be drawn starting again from segment 0.
    pub audio_in_end_after_wrap: u64,
}

/// Compute the recipe for one output audio segment aligned to a reference
/// (video) segment's time range.
///
/// `ref_start`/`ref_end` are the reference (video) segment's `[startTime,
/// endTime)` in the reference timescale; `ref_total_dur` is one loop's
/// reference-timescale duration.
pub fn calc_audio_seg_recipe(
    ref_nr: i64,
    ref_start: u64,
    ref_end: u64,
    ref_total_dur: u64,
    ref_timescale: u32,
    audio_rep: &RepData,
) -> Result<AudioRecipe> {
    let sample_dur = audio_rep
        .constant_sample_duration
        .ok_or_else(|| LivesimError::Internal(format!(
            "audio representation {} has no constant sample duration",
            audio_rep.id
        )))? as i64;
    let audio_ts = audio_rep.media_timescale as i64;

    // Step 1: project + quantize up to the next sample boundary.
    let audio_start =
        calc_audio_time_from_ref(ref_start as i64, ref_timescale as i64, sample_dur, audio_ts) as u64;
    let audio_end =
        calc_audio_time_from_ref(ref_end as i64, ref_timescale as i64, sample_dur, audio_ts) as u64;

    // Step 2: audio-timescale length of one loop, via the same quantized
    // projection applied to the reference loop duration.
    let loop_dur_audio_ts =
        calc_audio_time_from_ref(ref_total_dur as i64, ref_timescale as i64, sample_dur, audio_ts) as u64;
    if loop_dur_audio_ts == 0 {
        return Err(LivesimError::Internal("zero-length audio loop duration".into()));
    }

    // Step 3: subtract the wrap base so audioInStart/audioInEnd live inside
    // one loop; carve off whatever crosses into the next loop.
    let start_wrap = audio_start / loop_dur_audio_ts;
    let audio_in_start = audio_start - start_wrap * loop_dur_audio_ts;
    let raw_in_end = audio_end - start_wrap * loop_dur_audio_ts;

    let (audio_in_end, audio_in_end_after_wrap) = if raw_in_end > loop_dur_audio_ts {
        (loop_dur_audio_ts, raw_in_end - loop_dur_audio_ts)
    } else {
        (raw_in_end, 0)
    };

    Ok(AudioRecipe {
        rep_id: audio_rep.id.clone(),
        seg_nr: ref_nr,
        start_time: audio_start,
        end_time: audio_end,
        audio_in_start,
        audio_in_end,
        audio_in_end_after_wrap,
    })
}

/// Build an audio recipe for a `$Number$`-addressed request: audio media
/// segments are addressed by the *reference* representation's global
/// segment number, not a number of their own.
pub fn recipe_for_nr(ref_rep: &RepData, audio_rep: &RepData, nr: i64) -> Result<AudioRecipe> {
    let ref_meta = resolve::from_nr(ref_rep, nr)?;
    calc_audio_seg_recipe(
        ref_meta.new_nr,
        ref_meta.new_time,
        ref_meta.new_time + ref_meta.new_dur,
        ref_rep.duration(),
        ref_rep.media_timescale,
        audio_rep,
    )
}

/// Build an audio recipe for a `$Time$`-addressed request, where
/// `audio_time_ts` is a value in the audio representation's own media
/// timescale (as produced by [`crate::timeline::project_timeline_to_audio`]
/// for the live `SegmentTimeline`). Reverses the projection by finding the
/// reference segment whose projected audio start matches `audio_time_ts`,
/// then reuses [`recipe_for_nr`]'s machinery against that reference segment
/// number.
pub fn recipe_for_time(ref_rep: &RepData, audio_rep: &RepData, audio_time_ts: u64) -> Result<AudioRecipe> {
    let sample_dur = audio_rep.constant_sample_duration.ok_or_else(|| {
        LivesimError::Internal(format!(
            "audio representation {} has no constant sample duration",
            audio_rep.id
        ))
    })? as i64;
    let audio_ts = audio_rep.media_timescale as i64;
    let ref_ts = ref_rep.media_timescale as i64;
    let ref_total_dur = ref_rep.duration();

    let loop_dur_audio_ts =
        calc_audio_time_from_ref(ref_total_dur as i64, ref_ts, sample_dur, audio_ts) as u64;
    if loop_dur_audio_ts == 0 {
        return Err(LivesimError::Internal("zero-length audio loop duration".into()));
    }
    let wraps = (audio_time_ts / loop_dur_audio_ts) as i64;
    let rel = audio_time_ts % loop_dur_audio_ts;
    let nr_segs = ref_rep.segments.len() as i64;

    let seg_idx = ref_rep
        .segments
        .iter()
        .position(|s| {
            calc_audio_time_from_ref(s.start_time as i64, ref_ts, sample_dur, audio_ts) as u64 == rel
        })
        .ok_or_else(|| {
            LivesimError::BadRequest(format!(
                "time {audio_time_ts} does not align with a reference segment boundary"
            ))
        })?;

    let ref_nr = wraps * nr_segs + seg_idx as i64;
    recipe_for_nr(ref_rep, audio_rep, ref_nr)
}

/// Sample-index interval drawn from one VoD audio segment (or a run of
/// repeated fill samples), used internally by [`create_audio_seg`].
struct Interval {
    seg_idx: usize,
    start_sample: u64,
    end_sample: u64,
    /// Repeat the last sample of this interval this many extra times (loop
    /// boundary fill).
    fill_samples: u64,
}

fn sample_count(seg: &crate::asset::Segment, sample_dur: u64) -> u64 {
    seg.duration() / sample_dur
}

/// Walk `audio_rep.segments` and build the list of intervals a recipe's
/// `[audio_in_start, audio_in_end)` (plus any after-wrap continuation)
/// spans.
fn build_intervals(audio_rep: &RepData, recipe: &AudioRecipe, sample_dur: u64) -> Result<Vec<Interval>> {
    let mut intervals = Vec::new();
    let segs = &audio_rep.segments;
    if segs.is_empty() {
        return Err(LivesimError::Internal(format!(
            "audio representation {} has no segments",
            audio_rep.id
        )));
    }

    let mut remaining_start = recipe.audio_in_start;
    let mut remaining_end = recipe.audio_in_end;
    let mut after_wrap = recipe.audio_in_end_after_wrap;

    let start_idx = segs
        .iter()
        .position(|s| remaining_start < s.end_time)
        .unwrap_or(segs.len() - 1);

    let mut idx = start_idx;
    while idx < segs.len() && remaining_start < remaining_end {
        let seg = &segs[idx];
        let seg_start_sample = (seg.start_time) / sample_dur;
        let window_start = remaining_start.max(seg.start_time);
        let window_end = remaining_end.min(seg.end_time);
        if window_start < window_end {
            let start_sample = window_start / sample_dur - seg_start_sample;
            let end_sample = window_end.div_ceil(sample_dur) - seg_start_sample;
            intervals.push(Interval {
                seg_idx: idx,
                start_sample,
                end_sample,
                fill_samples: 0,
            });
            remaining_start = window_end;
        }
        if seg.end_time >= remaining_end {
            break;
        }
        idx += 1;
    }

    // Loop-boundary fill: recipe reaches past the last VoD segment's end.
    if remaining_start < remaining_end {
        let last = segs.last().expect("checked non-empty above");
        let total_samples = sample_count(last, sample_dur);
        let fill = (remaining_end - remaining_start).div_ceil(sample_dur);
        intervals.push(Interval {
            seg_idx: segs.len() - 1,
            start_sample: total_samples.saturating_sub(1),
            end_sample: total_samples,
            fill_samples: fill.saturating_sub(1),
        });
    }

    // Continuation from segment 0 after a loop wrap.
    if after_wrap > 0 {
        let mut pos = 0u64;
        let mut idx = 0usize;
        while idx < segs.len() && pos < after_wrap {
            let seg = &segs[idx];
            let seg_dur = seg.duration();
            let take_end = (pos + seg_dur).min(after_wrap);
            let start_sample = 0;
            let end_sample = (take_end - pos) / sample_dur;
            if end_sample > 0 {
                intervals.push(Interval {
                    seg_idx: idx,
                    start_sample,
                    end_sample,
                    fill_samples: 0,
                });
            }
            pos += seg_dur;
            idx += 1;
        }
    }

    Ok(intervals)
}

/// Read every VoD segment an interval touches, slice out its samples, and
/// assemble the single synthesized fragment.
pub fn create_audio_seg(
    asset_index: &AssetIndex,
    asset: &Asset,
    audio_rep: &RepData,
    recipe: &AudioRecipe,
) -> Result<Vec<u8>> {
    let sample_dur = audio_rep.constant_sample_duration.ok_or_else(|| {
        LivesimError::Internal(format!(
            "audio representation {} has no constant sample duration",
            audio_rep.id
        ))
    })? as u64;

    let intervals = build_intervals(audio_rep, recipe, sample_dur)?;

    let mut collected: Vec<FullSample> = Vec::new();
    for interval in &intervals {
        let seg = &audio_rep.segments[interval.seg_idx];
        let path = asset_index.segment_path_for(asset, audio_rep, seg);
        let bytes = std::fs::read(&path)
            .map_err(|e| LivesimError::Internal(format!("{}: {e}", path.display())))?;
        let samples = mp4box::extract_full_samples(&bytes, audio_rep.default_sample_duration)?;
        let start = interval.start_sample as usize;
        let end = interval.end_sample.min(samples.len() as u64) as usize;
        if start >= samples.len() || start > end {
            return Err(LivesimError::Internal(format!(
                "audio recipe interval [{start},{end}) out of range for {}",
                path.display()
            )));
        }
        collected.extend_from_slice(&samples[start..end]);
        if interval.fill_samples > 0 {
            if let Some(last) = samples.get(end.saturating_sub(1)) {
                for _ in 0..interval.fill_samples {
                    collected.push(last.clone());
                }
            }
        }
    }

    let accumulated: u64 = collected.iter().map(|s| s.duration as u64).sum();
    let expected = recipe.end_time - recipe.start_time;
    if accumulated != expected {
        return Err(LivesimError::Internal(format!(
            "audio segment for {} accumulated {accumulated} ts but expected {expected}",
            recipe.rep_id
        )));
    }

    Ok(mp4box::build_single_fragment_segment(
        1,
        recipe.seg_nr as u32,
        recipe.start_time,
        &collected,
        false,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{Addressing, ContentType, Segment};
    use regex::Regex;

    fn audio_rep() -> RepData {
        let mut segments = Vec::new();
        // 4 segments of 6 samples each at 1024 ts per sample (6144 ts/seg).
        for i in 0..4u64 {
            segments.push(Segment {
                start_time: i * 6144,
                end_time: (i + 1) * 6144,
                nr: i,
                common_sample_dur: Some(1024),
            });
        }
        RepData {
            id: "A48".into(),
            content_type: ContentType::Audio,
            codecs: "mp4a.40.2".into(),
            mpd_timescale: 48_000,
            media_timescale: 48_000,
            init_template: "A48/init.mp4".into(),
            media_template: "A48/$Number$.m4s".into(),
            addressing: Addressing::Number,
            media_id_regex: Regex::new(r"(\d+)").unwrap(),
            init_segment: vec![],
            segments,
            default_sample_duration: 1024,
            start_number: 0,
            constant_sample_duration: Some(1024),
        }
    }

    #[test]
    fn recipe_quantizes_to_sample_boundary() {
        let rep = audio_rep();
        // reference 90000ts/s, 2s video segment = 180000 ref ts.
        let recipe = calc_audio_seg_recipe(0, 0, 180_000, 720_000, 90_000, &rep).unwrap();
        assert_eq!(recipe.start_time % 1024, 0);
        assert_eq!(recipe.end_time % 1024, 0);
        assert!(recipe.end_time > recipe.start_time);
    }

    #[test]
    fn recipe_carves_off_audio_past_loop_end() {
        let rep = audio_rep();
        // Loop is 4*6144=24576 ts. Put refEnd right past the loop boundary.
        let recipe = calc_audio_seg_recipe(3, 172_000, 184_000, 184_320, 90_000, &rep).unwrap();
        // end should have been clamped to the loop length with the
        // remainder carried in audio_in_end_after_wrap.
        assert!(recipe.audio_in_end <= 24_576);
    }

    fn ref_rep() -> RepData {
        let mut segments = Vec::new();
        for i in 0..4u64 {
            segments.push(Segment {
                start_time: i * 180_000,
                end_time: (i + 1) * 180_000,
                nr: i,
                common_sample_dur: Some(180_000),
            });
        }
        RepData {
            id: "V300".into(),
            content_type: ContentType::Video,
            codecs: "avc1".into(),
            mpd_timescale: 90_000,
            media_timescale: 90_000,
            init_template: "V300/init.mp4".into(),
            media_template: "V300/$Number$.m4s".into(),
            addressing: Addressing::Number,
            media_id_regex: Regex::new(r"(\d+)").unwrap(),
            init_segment: vec![],
            segments,
            default_sample_duration: 180_000,
            start_number: 0,
            constant_sample_duration: Some(180_000),
        }
    }

    #[test]
    fn recipe_for_nr_reuses_reference_numbering() {
        let rep = audio_rep();
        let vref = ref_rep();
        let recipe = recipe_for_nr(&vref, &rep, 40).unwrap();
        assert_eq!(recipe.seg_nr, 40);
        assert_eq!(recipe.start_time % 1024, 0);
    }

    #[test]
    fn recipe_for_time_round_trips_recipe_for_nr() {
        let rep = audio_rep();
        let vref = ref_rep();
        let by_nr = recipe_for_nr(&vref, &rep, 3).unwrap();
        let by_time = recipe_for_time(&vref, &rep, by_nr.start_time).unwrap();
        assert_eq!(by_time, by_nr);
    }

    #[test]
    fn build_intervals_covers_single_segment_window() {
        let rep = audio_rep();
        let recipe = AudioRecipe {
            rep_id: "A48".into(),
            seg_nr: 0,
            start_time: 0,
            end_time: 6144,
            audio_in_start: 0,
            audio_in_end: 6144,
            audio_in_end_after_wrap: 0,
        };
        let intervals = build_intervals(&rep, &recipe, 1024).unwrap();
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].seg_idx, 0);
        assert_eq!(intervals[0].start_sample, 0);
        assert_eq!(intervals[0].end_sample, 6);
    }
}
