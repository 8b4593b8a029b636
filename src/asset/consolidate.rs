//! Reference-representation selection and loop-duration validation.

use crate::asset::model::{Asset, ContentType};
use crate::error::{LivesimError, Result};

/// Pick the reference representation (first video, else first audio, in
/// sorted `id` order) and compute `LoopDurMS`, rejecting the asset if the
/// loop is not an integral number of milliseconds.
pub fn consolidate(asset: &mut Asset) -> Result<()> {
    let mut video_ids: Vec<&String> = asset
        .reps
        .iter()
        .filter(|(_, r)| r.content_type == ContentType::Video)
        .map(|(id, _)| id)
        .collect();
    video_ids.sort();

    let mut audio_ids: Vec<&String> = asset
        .reps
        .iter()
        .filter(|(_, r)| r.content_type == ContentType::Audio)
        .map(|(id, _)| id)
        .collect();
    audio_ids.sort();

    let reference_id = video_ids
        .first()
        .or_else(|| audio_ids.first())
        .ok_or_else(|| LivesimError::Internal(format!("{}: no video or audio representation", asset.path)))?
        .to_string();

    let reference = asset.reps.get(&reference_id).expect("just selected from reps");
    let duration = reference.duration();
    let timescale = reference.media_timescale as u64;

    let numerator = 1000u64 * duration;
    if numerator % timescale != 0 {
        return Err(LivesimError::Internal(format!(
            "{}: loop duration {}ms/{}ts is not an integral number of milliseconds",
            asset.path, duration, timescale
        )));
    }

    asset.reference_rep = reference_id;
    asset.loop_dur_ms = numerator / timescale;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::model::{Addressing, MpdMeta, RepData, Segment};
    use regex::Regex;
    use std::collections::HashMap;

    fn rep(id: &str, content_type: ContentType, timescale: u32, num_segs: u64, seg_dur: u64) -> RepData {
        let mut segments = Vec::new();
        for i in 0..num_segs {
            segments.push(Segment {
                start_time: i * seg_dur,
                end_time: (i + 1) * seg_dur,
                nr: i,
                common_sample_dur: Some(seg_dur as u32),
            });
        }
        RepData {
            id: id.to_string(),
            content_type,
            codecs: "avc1".into(),
            mpd_timescale: timescale,
            media_timescale: timescale,
            init_template: format!("{id}/init.mp4"),
            media_template: format!("{id}/$Number$.m4s"),
            addressing: Addressing::Number,
            media_id_regex: Regex::new(r"(\d+)").unwrap(),
            init_segment: vec![],
            segments,
            default_sample_duration: seg_dur as u32,
            start_number: 0,
            constant_sample_duration: Some(seg_dur as u32),
        }
    }

    fn base_asset() -> Asset {
        Asset {
            path: "testpic_2s".into(),
            mpds: HashMap::new(),
            reps: HashMap::new(),
            reference_rep: String::new(),
            segment_dur_ms: 0,
            loop_dur_ms: 0,
        }
    }

    #[test]
    fn video_preferred_over_audio() {
        let mut asset = base_asset();
        asset.reps.insert(
            "A48".into(),
            rep("A48", ContentType::Audio, 48_000, 4, 96_000),
        );
        asset.reps.insert(
            "V300".into(),
            rep("V300", ContentType::Video, 90_000, 4, 180_000),
        );
        consolidate(&mut asset).unwrap();
        assert_eq!(asset.reference_rep, "V300");
        assert_eq!(asset.loop_dur_ms, 8000);
    }

    #[test]
    fn falls_back_to_audio_when_no_video() {
        let mut asset = base_asset();
        asset.reps.insert(
            "A48".into(),
            rep("A48", ContentType::Audio, 48_000, 4, 96_000),
        );
        consolidate(&mut asset).unwrap();
        assert_eq!(asset.reference_rep, "A48");
    }

    #[test]
    fn non_integral_loop_duration_is_rejected() {
        let mut asset = base_asset();
        // 3 segments * 100 ts units at timescale 7 -> 300/7 ms is not integral.
        asset.reps.insert(
            "V300".into(),
            rep("V300", ContentType::Video, 7, 3, 100),
        );
        assert!(consolidate(&mut asset).is_err());
    }
}
