//! Segment rewriter: turns one VoD source segment into its live-projected
//! form.
//!
//! Takes one VoD source segment (`styp`? `sidx`? `moof` `mdat`) and a
//! resolved `SegMeta`, and produces the bytes of the corresponding live
//! segment: `mfhd`/`tfdt` rewritten to the live projection, `trun`/`saio`
//! offsets corrected for any `tfdt` 32→64-bit widening, TTML timestamps
//! shifted for `stpp` representations, and an optional `emsg` inserted for
//! SCTE-35.

use crate::asset::RepData;
use crate::error::{LivesimError, Result};
use crate::mp4box::{self, Mfhd, RawBox, Saio, Sidx, Tfdt, Trun};
use crate::scte35::Scte35Provider;
use crate::timeline::SegMeta;
use crate::ttml;

/// Everything [`rewrite_segment`] needs beyond the raw bytes.
#[derive(Default)]
pub struct RewriteOptions<'a> {
    pub is_last: bool,
    pub scte35_per_minute: Option<u64>,
    pub scte35_provider: Option<&'a dyn Scte35Provider>,
}

/// Rewrite one source segment into its live form.
///
/// VoD segments loaded by this system are single-fragment (one `moof` +
/// `mdat` pair per file); the rewriter processes exactly that fragment and
/// passes through any leading `styp`/`sidx` and everything else unmodified.
pub fn rewrite_segment(
    source: &[u8],
    rep: &RepData,
    seg: &SegMeta,
    opts: &RewriteOptions,
) -> Result<Vec<u8>> {
    let boxes = mp4box::split_boxes(source)?;

    let moof_idx = boxes
        .iter()
        .position(|b| &b.box_type == b"moof")
        .ok_or_else(|| LivesimError::Internal("segment has no moof box".into()))?;
    let mdat_idx = boxes
        .iter()
        .skip(moof_idx + 1)
        .position(|b| &b.box_type == b"mdat")
        .map(|i| i + moof_idx + 1)
        .ok_or_else(|| LivesimError::Internal("segment has no mdat box".into()))?;

    let moof = &boxes[moof_idx];
    let moof_children = mp4box::container_children(moof)?;
    let mfhd_raw = mp4box::find_box(&moof_children, b"mfhd")
        .ok_or_else(|| LivesimError::Internal("moof has no mfhd box".into()))?;
    let traf_raw = mp4box::find_box(&moof_children, b"traf")
        .ok_or_else(|| LivesimError::Internal("moof has no traf box".into()))?;
    let traf_children = mp4box::container_children(traf_raw)?;

    // Step 1: mfhd.sequenceNumber <- segMeta.newNr
    let mfhd = Mfhd {
        sequence_number: seg.new_nr as u32,
    };

    // Step 2: tfdt shift, tracking the width delta it cascades to trun/saio.
    let tfdt_raw = mp4box::find_box(&traf_children, b"tfdt")
        .ok_or_else(|| LivesimError::Internal("traf has no tfdt box".into()))?;
    let orig_tfdt = Tfdt::parse(tfdt_raw)?;
    let old_size = orig_tfdt.encoded_size();
    let new_base = (orig_tfdt.base_media_decode_time as i64 + (seg.new_time as i64 - seg.orig_time as i64))
        .max(0) as u64;
    let tfdt = Tfdt {
        base_media_decode_time: new_base,
    };
    let new_size = tfdt.encoded_size();
    let delta = new_size as i64 - old_size as i64;

    let trun_raw = mp4box::find_box(&traf_children, b"trun")
        .ok_or_else(|| LivesimError::Internal("traf has no trun box".into()))?;
    let mut trun = Trun::parse(trun_raw)?;
    if let Some(off) = trun.data_offset {
        trun.data_offset = Some(off + delta as i32);
    }

    // Step 3: TTML timestamp shift for stpp representations (single-sample
    // subtitle segments only; sample size is updated to match).
    let mut ttml_sample: Option<Vec<u8>> = None;
    if rep.codecs.starts_with("stpp") {
        let mdat = &boxes[mdat_idx];
        let payload = mdat_payload(mdat)?;
        let text = String::from_utf8_lossy(payload);
        let shift_ms = ttml::shift_ms_from_ts(seg.new_time as i64 - seg.orig_time as i64, rep.media_timescale);
        let rewritten = ttml::shift_ttml_timestamps(&text, shift_ms);
        if let Some(first) = trun.samples.first_mut() {
            first.size = Some(rewritten.len() as u32);
        }
        ttml_sample = Some(rewritten.into_bytes());
    }

    // tfdt sits before any saio in traf child order; only those after it
    // need the width-delta shift.
    let mut seen_tfdt = false;
    let mut rewritten_traf_children: Vec<RawBox> = Vec::with_capacity(traf_children.len());
    for child in &traf_children {
        if &child.box_type == b"tfdt" {
            seen_tfdt = true;
            rewritten_traf_children.push(tfdt.encode());
        } else if &child.box_type == b"trun" {
            rewritten_traf_children.push(trun.encode());
        } else if &child.box_type == b"saio" && seen_tfdt && delta != 0 {
            let mut saio = Saio::parse(child)?;
            saio.shift(delta);
            rewritten_traf_children.push(saio.encode());
        } else {
            rewritten_traf_children.push(child.clone());
        }
    }

    // Step 5: SCTE-35, only for video content, attaches an emsg ahead of moof.
    let mut emsg: Option<RawBox> = None;
    if rep.content_type == crate::asset::ContentType::Video {
        if let (Some(per_minute), Some(provider)) = (opts.scte35_per_minute, opts.scte35_provider) {
            emsg = provider
                .maybe_emit(seg.new_time, seg.new_time + seg.new_dur, seg.timescale, per_minute)
                .map(|e| e.encode());
        }
    }

    let traf = encode_container(b"traf", &rewritten_traf_children);
    let moof_bytes = encode_container(b"moof", &[mfhd.encode(), traf]);

    let mut out = Vec::with_capacity(source.len() + 32);
    for (idx, b) in boxes.iter().enumerate() {
        if idx == moof_idx {
            if let Some(e) = &emsg {
                out.extend_from_slice(&e.body);
            }
            out.extend_from_slice(&moof_bytes);
        } else if idx == mdat_idx {
            out.extend_from_slice(&encode_mdat(b, ttml_sample.as_deref())?);
        } else if &b.box_type == b"sidx" {
            // Step 4: sidx timescale/earliestPresentationTime rewrite.
            let mut sidx = Sidx::parse(b)?;
            sidx.timescale = seg.timescale;
            sidx.earliest_presentation_time = seg.new_time;
            out.extend_from_slice(&sidx.encode().body);
        } else if &b.box_type == b"styp" && opts.is_last {
            // Step 6: lmsg brand on the last segment of a bounded presentation.
            out.extend_from_slice(&mp4box::styp_add_lmsg(b).body);
        } else {
            out.extend_from_slice(&b.body);
        }
    }
    Ok(out)
}

fn mdat_payload(mdat: &RawBox) -> Result<&[u8]> {
    let b = &mdat.body;
    if b.len() < 8 {
        return Err(LivesimError::Internal("mdat too short".into()));
    }
    let size32 = u32::from_be_bytes(b[0..4].try_into().unwrap());
    let header_len = if size32 == 1 { 16 } else { 8 };
    Ok(&b[header_len..])
}

/// Re-encode an `mdat` box, substituting its payload with `replacement` when
/// present (the TTML rewrite path, where the sample text may have changed
/// length).
fn encode_mdat(mdat: &RawBox, replacement: Option<&[u8]>) -> Result<Vec<u8>> {
    match replacement {
        None => Ok(mdat.body.clone()),
        Some(payload) => {
            let size = 8 + payload.len() as u32;
            let mut body = Vec::with_capacity(size as usize);
            body.extend_from_slice(&size.to_be_bytes());
            body.extend_from_slice(b"mdat");
            body.extend_from_slice(payload);
            Ok(body)
        }
    }
}

fn encode_container(box_type: &[u8; 4], children: &[RawBox]) -> Vec<u8> {
    let mut body_len = 8u32;
    for c in children {
        body_len += c.body.len() as u32;
    }
    let mut out = Vec::with_capacity(body_len as usize);
    out.extend_from_slice(&body_len.to_be_bytes());
    out.extend_from_slice(box_type);
    for c in children {
        out.extend_from_slice(&c.body);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{Addressing, ContentType, Segment};
    use crate::mp4box::{Mfhd as MfhdBox, Tfdt as TfdtBox, Trun as TrunBox, TrunSample};
    use regex::Regex;

    fn sample_segment(base_time: u64, sample_size: u32, payload: &[u8]) -> Vec<u8> {
        let mfhd = MfhdBox { sequence_number: 5 }.encode();
        let tfdt = TfdtBox {
            base_media_decode_time: base_time,
        }
        .encode();
        let mut tfhd_body = Vec::new();
        tfhd_body.extend_from_slice(&16u32.to_be_bytes());
        tfhd_body.extend_from_slice(b"tfhd");
        tfhd_body.extend_from_slice(&[0, 0, 0, 0]);
        tfhd_body.extend_from_slice(&1u32.to_be_bytes());
        let trun = TrunBox {
            flags: 0x0000_0001 | 0x0000_0100 | 0x0000_0200,
            data_offset: Some(8),
            samples: vec![TrunSample {
                duration: Some(1000),
                size: Some(sample_size),
                flags: None,
                composition_time_offset: None,
            }],
        }
        .encode();

        let traf = encode_container(b"traf", &[
            RawBox { box_type: *b"tfhd", body: tfhd_body },
            tfdt,
            trun,
        ]);
        let moof = encode_container(b"moof", &[mfhd, traf]);

        let mut mdat_body = Vec::new();
        mdat_body.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
        mdat_body.extend_from_slice(b"mdat");
        mdat_body.extend_from_slice(payload);

        let mut out = Vec::new();
        out.extend_from_slice(&moof);
        out.extend_from_slice(&mdat_body);
        out
    }

    fn video_rep() -> RepData {
        RepData {
            id: "V300".into(),
            content_type: ContentType::Video,
            codecs: "avc1.64001f".into(),
            mpd_timescale: 90_000,
            media_timescale: 90_000,
            init_template: "V300/init.mp4".into(),
            media_template: "V300/$Number$.m4s".into(),
            addressing: Addressing::Number,
            media_id_regex: Regex::new(r"(\d+)").unwrap(),
            init_segment: vec![],
            segments: vec![Segment {
                start_time: 0,
                end_time: 180_000,
                nr: 0,
                common_sample_dur: Some(180_000),
            }],
            default_sample_duration: 180_000,
            start_number: 0,
            constant_sample_duration: None,
        }
    }

    fn seg_meta(orig_time: u64, new_time: u64, new_nr: i64) -> SegMeta {
        SegMeta {
            rep_id: "V300".into(),
            orig_time,
            orig_nr: 0,
            orig_dur: 180_000,
            new_time,
            new_nr,
            new_dur: 180_000,
            timescale: 90_000,
        }
    }

    #[test]
    fn rewrites_mfhd_and_tfdt() {
        let source = sample_segment(0, 4, b"data");
        let seg = seg_meta(0, 7_200_000, 40);
        let out = rewrite_segment(&source, &video_rep(), &seg, &RewriteOptions::default()).unwrap();

        let boxes = mp4box::split_boxes(&out).unwrap();
        let moof = mp4box::find_box(&boxes, b"moof").unwrap();
        let children = mp4box::container_children(moof).unwrap();
        let mfhd = Mfhd::parse(mp4box::find_box(&children, b"mfhd").unwrap()).unwrap();
        assert_eq!(mfhd.sequence_number, 40);

        let traf = mp4box::find_box(&children, b"traf").unwrap();
        let traf_children = mp4box::container_children(traf).unwrap();
        let tfdt = Tfdt::parse(mp4box::find_box(&traf_children, b"tfdt").unwrap()).unwrap();
        assert_eq!(tfdt.base_media_decode_time, 7_200_000);
    }

    #[test]
    fn tfdt_widening_shifts_trun_data_offset() {
        let source = sample_segment(0, 4, b"data");
        // new_time beyond u32::MAX forces tfdt to widen from 16 to 20 bytes.
        let seg = seg_meta(0, (u32::MAX as u64) + 1000, 1);
        let out = rewrite_segment(&source, &video_rep(), &seg, &RewriteOptions::default()).unwrap();

        let boxes = mp4box::split_boxes(&out).unwrap();
        let moof = mp4box::find_box(&boxes, b"moof").unwrap();
        let children = mp4box::container_children(moof).unwrap();
        let traf = mp4box::find_box(&children, b"traf").unwrap();
        let traf_children = mp4box::container_children(traf).unwrap();
        let trun = Trun::parse(mp4box::find_box(&traf_children, b"trun").unwrap()).unwrap();
        assert_eq!(trun.data_offset, Some(8 + 4));
    }

    #[test]
    fn stpp_rewrites_ttml_payload_and_sample_size() {
        let payload = br#"<p begin="00:00:01.000">hi</p>"#;
        let source = sample_segment(0, payload.len() as u32, payload);
        let mut rep = video_rep();
        rep.content_type = ContentType::Subtitle;
        rep.codecs = "stpp".into();
        let seg = seg_meta(0, 90_000, 1); // +1s shift

        let out = rewrite_segment(&source, &rep, &seg, &RewriteOptions::default()).unwrap();
        let boxes = mp4box::split_boxes(&out).unwrap();
        let mdat = mp4box::find_box(&boxes, b"mdat").unwrap();
        let text = String::from_utf8_lossy(mdat_payload(mdat).unwrap()).into_owned();
        assert!(text.contains("00:00:02.000"));
    }

    #[test]
    fn last_segment_adds_lmsg_brand() {
        let mut styp_body = Vec::new();
        styp_body.extend_from_slice(&16u32.to_be_bytes());
        styp_body.extend_from_slice(b"styp");
        styp_body.extend_from_slice(b"msdh");
        let styp = RawBox { box_type: *b"styp", body: styp_body };

        let mut source = styp.body.clone();
        source.extend_from_slice(&sample_segment(0, 4, b"data"));

        let seg = seg_meta(0, 0, 0);
        let opts = RewriteOptions {
            is_last: true,
            ..Default::default()
        };
        let out = rewrite_segment(&source, &video_rep(), &seg, &opts).unwrap();
        let boxes = mp4box::split_boxes(&out).unwrap();
        let styp_out = mp4box::find_box(&boxes, b"styp").unwrap();
        assert!(styp_out.body.windows(4).any(|w| w == b"lmsg"));
    }
}
