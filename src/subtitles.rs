//! Time-based subtitle generator.
//!
//! Synthesizes a minimal `stpp` (TTML) or `wvtt` (WebVTT) subtitle track:
//! a bare init segment carrying just enough `moov` structure to describe
//! the track, and, per request, a single-fragment media segment whose
//! samples are cues rendered from the requesting segment's wall-clock
//! window. Every subtitle media segment is resolved against the
//! *reference* representation's own numbering so its cadence always
//! matches the video timeline.

use crate::asset::RepData;
use crate::error::Result;
use crate::mp4box::{build_single_fragment_segment, FullSample};
use crate::timeline::resolve::{self, SegMeta};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubtitleCodec {
    Stpp,
    Wvtt,
}

impl SubtitleCodec {
    pub fn fourcc(&self) -> &'static [u8; 4] {
        match self {
            SubtitleCodec::Stpp => b"stpp",
            SubtitleCodec::Wvtt => b"wvtt",
        }
    }
}

/// Either addressing mode a subtitle media-segment request arrives as.
#[derive(Clone, Copy, Debug)]
pub enum SegmentId {
    Number(i64),
    Time(u64),
}

fn box_(ty: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(&((8 + body.len()) as u32).to_be_bytes());
    out.extend_from_slice(ty);
    out.extend_from_slice(body);
    out
}

fn fullbox_body(version: u8, flags: u32, rest: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + rest.len());
    out.push(version);
    out.extend_from_slice(&flags.to_be_bytes()[1..]);
    out.extend_from_slice(rest);
    out
}

fn identity_matrix() -> [u8; 36] {
    let mut m = [0u8; 36];
    m[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    m[16..20].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    m[32..36].copy_from_slice(&0x4000_0000u32.to_be_bytes());
    m
}

/// ISO-639-2/T language packed into `mdhd`'s 15-bit-per-letter field; falls
/// back to `und` (undetermined) for anything not exactly 3 lowercase ASCII
/// letters, which is all `mdhd` can represent.
fn pack_language(lang: &str) -> u16 {
    let bytes = lang.as_bytes();
    let chars: [u8; 3] = if bytes.len() == 3 && bytes.iter().all(u8::is_ascii_lowercase) {
        [bytes[0], bytes[1], bytes[2]]
    } else {
        *b"und"
    };
    chars
        .iter()
        .fold(0u16, |acc, c| (acc << 5) | ((c - b'a' + 1) as u16))
}

fn build_mvhd(timescale: u32, next_track_id: u32) -> Vec<u8> {
    let mut rest = Vec::new();
    rest.extend_from_slice(&0u32.to_be_bytes()); // creation_time
    rest.extend_from_slice(&0u32.to_be_bytes()); // modification_time
    rest.extend_from_slice(&timescale.to_be_bytes());
    rest.extend_from_slice(&0u32.to_be_bytes()); // duration (unknown, dynamic)
    rest.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate 1.0
    rest.extend_from_slice(&0x0100u16.to_be_bytes()); // volume 1.0
    rest.extend_from_slice(&[0u8; 2]); // reserved
    rest.extend_from_slice(&[0u8; 8]); // reserved
    rest.extend_from_slice(&identity_matrix());
    rest.extend_from_slice(&[0u8; 24]); // pre_defined
    rest.extend_from_slice(&next_track_id.to_be_bytes());
    box_(b"mvhd", &fullbox_body(0, 0, &rest))
}

fn build_tkhd(track_id: u32) -> Vec<u8> {
    let mut rest = Vec::new();
    rest.extend_from_slice(&0u32.to_be_bytes()); // creation_time
    rest.extend_from_slice(&0u32.to_be_bytes()); // modification_time
    rest.extend_from_slice(&track_id.to_be_bytes());
    rest.extend_from_slice(&[0u8; 4]); // reserved
    rest.extend_from_slice(&0u32.to_be_bytes()); // duration
    rest.extend_from_slice(&[0u8; 8]); // reserved
    rest.extend_from_slice(&0u16.to_be_bytes()); // layer
    rest.extend_from_slice(&0u16.to_be_bytes()); // alternate_group
    rest.extend_from_slice(&0u16.to_be_bytes()); // volume (0 for non-audio)
    rest.extend_from_slice(&[0u8; 2]); // reserved
    rest.extend_from_slice(&identity_matrix());
    rest.extend_from_slice(&0u32.to_be_bytes()); // width (fixed-point, 0: no visual presentation)
    rest.extend_from_slice(&0u32.to_be_bytes()); // height
    box_(b"tkhd", &fullbox_body(0, 0x000007, &rest))
}

fn build_mdhd(timescale: u32, lang: &str) -> Vec<u8> {
    let mut rest = Vec::new();
    rest.extend_from_slice(&0u32.to_be_bytes()); // creation_time
    rest.extend_from_slice(&0u32.to_be_bytes()); // modification_time
    rest.extend_from_slice(&timescale.to_be_bytes());
    rest.extend_from_slice(&0u32.to_be_bytes()); // duration
    rest.extend_from_slice(&pack_language(lang).to_be_bytes());
    rest.extend_from_slice(&0u16.to_be_bytes()); // pre_defined
    box_(b"mdhd", &fullbox_body(0, 0, &rest))
}

fn build_hdlr(handler_type: &[u8; 4], name: &str) -> Vec<u8> {
    let mut rest = Vec::new();
    rest.extend_from_slice(&[0u8; 4]); // pre_defined
    rest.extend_from_slice(handler_type);
    rest.extend_from_slice(&[0u8; 12]); // reserved
    rest.extend_from_slice(name.as_bytes());
    rest.push(0);
    box_(b"hdlr", &fullbox_body(0, 0, &rest))
}

fn build_dref() -> Vec<u8> {
    let url = box_(b"url ", &fullbox_body(0, 0x000001, &[]));
    let mut rest = Vec::new();
    rest.extend_from_slice(&1u32.to_be_bytes()); // entry_count
    rest.extend_from_slice(&url);
    box_(b"dref", &fullbox_body(0, 0, &rest))
}

fn build_dinf() -> Vec<u8> {
    box_(b"dinf", &build_dref())
}

fn build_stsd(codec: SubtitleCodec) -> Vec<u8> {
    let sample_entry = match codec {
        SubtitleCodec::Stpp => {
            let mut body = Vec::new();
            body.extend_from_slice(&[0u8; 6]); // reserved
            body.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
            body.extend_from_slice(b"http://www.w3.org/ns/ttml\0"); // namespace
            body.push(0); // schema_location (empty)
            body.push(0); // auxiliary_mime_types (empty)
            box_(b"stpp", &body)
        }
        SubtitleCodec::Wvtt => {
            let mut body = Vec::new();
            body.extend_from_slice(&[0u8; 6]); // reserved
            body.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
            body.extend_from_slice(&box_(b"vttC", b"WEBVTT\n"));
            box_(b"wvtt", &body)
        }
    };
    let mut rest = Vec::new();
    rest.extend_from_slice(&1u32.to_be_bytes()); // entry_count
    rest.extend_from_slice(&sample_entry);
    box_(b"stsd", &fullbox_body(0, 0, &rest))
}

fn build_stbl(codec: SubtitleCodec) -> Vec<u8> {
    let stts = box_(b"stts", &fullbox_body(0, 0, &0u32.to_be_bytes()));
    let stsc = box_(b"stsc", &fullbox_body(0, 0, &0u32.to_be_bytes()));
    let mut stsz_rest = Vec::new();
    stsz_rest.extend_from_slice(&0u32.to_be_bytes()); // sample_size
    stsz_rest.extend_from_slice(&0u32.to_be_bytes()); // sample_count
    let stsz = box_(b"stsz", &fullbox_body(0, 0, &stsz_rest));
    let stco = box_(b"stco", &fullbox_body(0, 0, &0u32.to_be_bytes()));

    let mut body = Vec::new();
    body.extend_from_slice(&build_stsd(codec));
    body.extend_from_slice(&stts);
    body.extend_from_slice(&stsc);
    body.extend_from_slice(&stsz);
    body.extend_from_slice(&stco);
    box_(b"stbl", &body)
}

fn build_minf(codec: SubtitleCodec) -> Vec<u8> {
    // SubtitleMediaHeaderBox: a bare FullBox, no payload beyond version/flags.
    let sthd = box_(b"sthd", &fullbox_body(0, 0, &[]));
    let mut body = Vec::new();
    body.extend_from_slice(&sthd);
    body.extend_from_slice(&build_dinf());
    body.extend_from_slice(&build_stbl(codec));
    box_(b"minf", &body)
}

fn build_mdia(timescale: u32, lang: &str, codec: SubtitleCodec) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&build_mdhd(timescale, lang));
    body.extend_from_slice(&build_hdlr(b"subt", "subtitle"));
    body.extend_from_slice(&build_minf(codec));
    box_(b"mdia", &body)
}

fn build_trak(track_id: u32, timescale: u32, lang: &str, codec: SubtitleCodec) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&build_tkhd(track_id));
    body.extend_from_slice(&build_mdia(timescale, lang, codec));
    box_(b"trak", &body)
}

fn build_trex(track_id: u32, default_sample_duration: u32) -> Vec<u8> {
    let mut rest = Vec::new();
    rest.extend_from_slice(&track_id.to_be_bytes());
    rest.extend_from_slice(&1u32.to_be_bytes()); // default_sample_description_index
    rest.extend_from_slice(&default_sample_duration.to_be_bytes());
    rest.extend_from_slice(&0u32.to_be_bytes()); // default_sample_size
    rest.extend_from_slice(&0u32.to_be_bytes()); // default_sample_flags
    box_(b"trex", &fullbox_body(0, 0, &rest))
}

fn build_mvex(track_id: u32, default_sample_duration: u32) -> Vec<u8> {
    box_(b"mvex", &build_trex(track_id, default_sample_duration))
}

fn build_ftyp() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(b"isom");
    body.extend_from_slice(&0u32.to_be_bytes());
    for brand in [b"isom", b"iso6", b"msdh", b"dash"] {
        body.extend_from_slice(brand);
    }
    box_(b"ftyp", &body)
}

/// Build a minimal init segment for a synthetic `stpp`/`wvtt` track with the
/// requested language.
pub fn build_init_segment(
    track_id: u32,
    timescale: u32,
    lang: &str,
    codec: SubtitleCodec,
    default_sample_duration: u32,
) -> Vec<u8> {
    let mut moov_body = Vec::new();
    moov_body.extend_from_slice(&build_mvhd(timescale, track_id + 1));
    moov_body.extend_from_slice(&build_trak(track_id, timescale, lang, codec));
    moov_body.extend_from_slice(&build_mvex(track_id, default_sample_duration));
    let moov = box_(b"moov", &moov_body);

    let mut out = build_ftyp();
    out.extend_from_slice(&moov);
    out
}

/// Smallest `cue period`, in whole seconds, at least `timesubsdur`.
/// Sub-second `timesubsdur` rounds up to the next integer second so cues
/// only ever fall on UTC-second boundaries.
fn cue_period_ms(timesubsdur_ms: Option<u64>) -> u64 {
    let dur = timesubsdur_ms.unwrap_or(1000).max(1);
    dur.div_ceil(1000) * 1000
}

/// Every cue start (in the subtitle track's media timescale, anchored at
/// AST) landing in `[interval_start_ts, interval_end_ts)`.
fn enumerate_cue_starts_ts(interval_start_ts: u64, interval_end_ts: u64, period_ts: u64) -> Vec<u64> {
    if period_ts == 0 {
        return Vec::new();
    }
    let first = interval_start_ts.div_ceil(period_ts) * period_ts;
    let mut out = Vec::new();
    let mut t = first;
    while t < interval_end_ts {
        out.push(t);
        t += period_ts;
    }
    out
}

fn ts_to_wall_clock(ts: u64, timescale: u32, ast_s: f64) -> String {
    let epoch_s = ast_s + ts as f64 / timescale as f64;
    let secs = epoch_s.floor() as i64;
    let millis = ((epoch_s - epoch_s.floor()) * 1000.0).round() as u32;
    chrono::DateTime::from_timestamp(secs, millis * 1_000_000)
        .unwrap_or_else(|| chrono::DateTime::from_timestamp(0, 0).expect("epoch is valid"))
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn ttml_clock(ts_offset: u64, timescale: u32) -> String {
    let total_ms = (ts_offset as f64 * 1000.0 / timescale as f64).round() as u64;
    let h = total_ms / 3_600_000;
    let m = (total_ms % 3_600_000) / 60_000;
    let s = (total_ms % 60_000) / 1000;
    let ms = total_ms % 1000;
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}

fn render_stpp_cue(lang: &str, wall_clock: &str, begin_ts: u64, end_ts: u64, timescale: u32) -> Vec<u8> {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><tt xmlns="http://www.w3.org/ns/ttml" xml:lang="{lang}"><body><div><p begin="{begin}" end="{end}">{wall_clock} ({lang})</p></div></body></tt>"#,
        begin = ttml_clock(0, timescale),
        end = ttml_clock(end_ts.saturating_sub(begin_ts), timescale),
    )
    .into_bytes()
}

fn render_wvtt_cue(lang: &str, wall_clock: &str) -> Vec<u8> {
    let payload = format!("{wall_clock} ({lang})");
    let payl = box_(b"payl", payload.as_bytes());
    box_(b"vttc", &payl)
}

/// Build one subtitle media segment. `ref_rep` supplies the cadence
/// (segment numbering and media timescale) the generated track is aligned
/// to.
pub fn build_media_segment(
    ref_rep: &RepData,
    requested: SegmentId,
    ast_s: f64,
    cue_dur_ms: Option<u64>,
    lang: &str,
    codec: SubtitleCodec,
    track_id: u32,
) -> Result<Vec<u8>> {
    let seg_meta = resolve_seg_meta(ref_rep, requested)?;
    let period_ts =
        (cue_period_ms(cue_dur_ms) * seg_meta.timescale as u64).div_ceil(1000);
    let cue_dur_ts = (cue_dur_ms.unwrap_or(1000) * seg_meta.timescale as u64).div_ceil(1000);

    let interval_start_ts = seg_meta.new_time;
    let interval_end_ts = seg_meta.new_time + seg_meta.new_dur;
    let cue_starts = enumerate_cue_starts_ts(interval_start_ts, interval_end_ts, period_ts);

    let samples: Vec<FullSample> = cue_starts
        .iter()
        .map(|&start_ts| {
            let end_ts = (start_ts + cue_dur_ts).min(interval_end_ts);
            let wall_clock = ts_to_wall_clock(start_ts, seg_meta.timescale, ast_s);
            let data = match codec {
                SubtitleCodec::Stpp => render_stpp_cue(lang, &wall_clock, start_ts, end_ts, seg_meta.timescale),
                SubtitleCodec::Wvtt => render_wvtt_cue(lang, &wall_clock),
            };
            FullSample {
                duration: period_ts.min(interval_end_ts - start_ts) as u32,
                data,
            }
        })
        .collect();

    Ok(build_single_fragment_segment(
        track_id,
        seg_meta.new_nr as u32,
        seg_meta.new_time,
        &samples,
        true,
    ))
}

fn resolve_seg_meta(ref_rep: &RepData, requested: SegmentId) -> Result<SegMeta> {
    match requested {
        SegmentId::Number(nr) => resolve::from_nr(ref_rep, nr),
        SegmentId::Time(t) => resolve::from_time(ref_rep, t),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{Addressing, ContentType, Segment};
    use crate::mp4box;
    use regex::Regex;

    fn ref_rep() -> RepData {
        let segments = (0..4)
            .map(|i| Segment {
                start_time: i * 180_000,
                end_time: (i + 1) * 180_000,
                nr: i,
                common_sample_dur: Some(3_003),
            })
            .collect();
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
            default_sample_duration: 3_003,
            start_number: 0,
            constant_sample_duration: Some(3_003),
        }
    }

    #[test]
    fn init_segment_carries_requested_codec_and_language() {
        let seg = build_init_segment(3, 90_000, "en", SubtitleCodec::Stpp, 90_000);
        let boxes = mp4box::split_boxes(&seg).unwrap();
        assert_eq!(&boxes[0].box_type, b"ftyp");
        assert_eq!(&boxes[1].box_type, b"moov");
        let moov_children = mp4box::container_children(&boxes[1]).unwrap();
        let trak = mp4box::find_box(&moov_children, b"trak").unwrap();
        let trak_children = mp4box::container_children(trak).unwrap();
        let mdia = mp4box::find_box(&trak_children, b"mdia").unwrap();
        let mdia_children = mp4box::container_children(mdia).unwrap();
        let minf = mp4box::find_box(&mdia_children, b"minf").unwrap();
        let minf_children = mp4box::container_children(minf).unwrap();
        let stbl = mp4box::find_box(&minf_children, b"stbl").unwrap();
        let stbl_children = mp4box::container_children(stbl).unwrap();
        let stsd = mp4box::find_box(&stbl_children, b"stsd").unwrap();
        assert!(stsd.body.windows(4).any(|w| w == b"stpp"));
    }

    #[test]
    fn media_segment_carries_expected_sequence_and_decode_time() {
        let rep = ref_rep();
        let seg = build_media_segment(
            &rep,
            SegmentId::Number(1),
            0.0,
            Some(1000),
            "en",
            SubtitleCodec::Wvtt,
            5,
        )
        .unwrap();
        let boxes = mp4box::split_boxes(&seg).unwrap();
        let moof = mp4box::find_box(&boxes, b"moof").unwrap();
        let children = mp4box::container_children(moof).unwrap();
        let mfhd = mp4box::Mfhd::parse(mp4box::find_box(&children, b"mfhd").unwrap()).unwrap();
        assert_eq!(mfhd.sequence_number, 1);
        let traf = mp4box::find_box(&children, b"traf").unwrap();
        let traf_children = mp4box::container_children(traf).unwrap();
        let tfdt = mp4box::Tfdt::parse(mp4box::find_box(&traf_children, b"tfdt").unwrap()).unwrap();
        assert_eq!(tfdt.base_media_decode_time, 180_000);
    }

    #[test]
    fn cue_period_rounds_subsecond_durations_up() {
        assert_eq!(cue_period_ms(Some(250)), 1000);
        assert_eq!(cue_period_ms(Some(1000)), 1000);
        assert_eq!(cue_period_ms(Some(1500)), 2000);
        assert_eq!(cue_period_ms(None), 1000);
    }

    #[test]
    fn enumerate_cue_starts_covers_whole_interval() {
        let starts = enumerate_cue_starts_ts(180_000, 360_000, 90_000);
        assert_eq!(starts, vec![180_000, 270_000]);
    }
}
