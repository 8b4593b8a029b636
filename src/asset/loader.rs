//! Asset index construction.
//!
//! Walks a read-only VoD filesystem tree, loads each `*.mpd` it finds, and
//! builds the immutable [`Asset`]/[`RepData`]/[`Segment`] model the rest of
//! the engine reads from.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use dash_mpd::{AdaptationSet, Representation, MPD};
use regex::Regex;

use crate::asset::model::{Addressing, Asset, ContentType, MpdMeta, RepData, Segment};
use crate::asset::sidecar;
use crate::error::{LivesimError, Result};
use crate::mp4box::{self, Tfdt, Trun};

/// Walk `root` and load every asset (a directory containing a `*.mpd`).
pub fn discover_assets(root: &Path, rep_data_root: Option<&Path>) -> Result<HashMap<String, Asset>> {
    let mut out = HashMap::new();
    for mpd_path in find_mpd_files(root)? {
        let asset_dir = mpd_path
            .parent()
            .expect("mpd file always has a parent directory")
            .to_path_buf();
        let rel = asset_dir
            .strip_prefix(root)
            .unwrap_or(&asset_dir)
            .to_string_lossy()
            .replace('\\', "/");
        match load_asset(root, &rel, &mpd_path, rep_data_root) {
            Ok(asset) => {
                out.insert(rel, asset);
            }
            Err(e) => {
                tracing::warn!(asset = %rel, error = %e, "skipping asset that failed to load");
            }
        }
    }
    Ok(out)
}

fn find_mpd_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == "mpd") {
                out.push(path);
            }
        }
    }
    Ok(out)
}

/// Load and validate a single asset rooted at `asset_dir`, whose MPD lives
/// at `mpd_path`.
pub fn load_asset(
    vod_root: &Path,
    asset_rel_path: &str,
    mpd_path: &Path,
    rep_data_root: Option<&Path>,
) -> Result<Asset> {
    let asset_dir = vod_root.join(asset_rel_path);
    let xml = fs::read_to_string(mpd_path)?;
    let mpd: MPD = dash_mpd::parse(&xml).map_err(|e| LivesimError::Internal(e.to_string()))?;

    if mpd.mpdtype.as_deref().unwrap_or("static") != "static" {
        return Err(LivesimError::Internal(format!(
            "{asset_rel_path}: only static (VoD) MPDs can be simulated as live"
        )));
    }
    if mpd.periods.len() != 1 {
        return Err(LivesimError::Internal(format!(
            "{asset_rel_path}: exactly one Period is supported, found {}",
            mpd.periods.len()
        )));
    }
    let period = &mpd.periods[0];

    let mut reps = HashMap::new();
    for adaptation in period.adaptations.iter().flatten() {
        let adaptation_template = adaptation.SegmentTemplate.as_ref();
        for rep in adaptation.representations.iter().flatten() {
            if rep.SegmentTemplate.is_some() {
                return Err(LivesimError::Internal(format!(
                    "{asset_rel_path}: representation-level SegmentTemplate is not supported"
                )));
            }
            let template = adaptation_template.ok_or_else(|| {
                LivesimError::Internal(format!(
                    "{asset_rel_path}: AdaptationSet has no SegmentTemplate"
                ))
            })?;
            let rep_id = rep.id.clone().ok_or_else(|| {
                LivesimError::Internal(format!("{asset_rel_path}: Representation has no @id"))
            })?;

            if let Some(cached) = rep_data_root.and_then(|root| {
                sidecar::load(root, asset_rel_path, &rep_id).ok().flatten()
            }) {
                reps.insert(rep_id, cached);
                continue;
            }

            let content_type = classify_content_type(adaptation, rep);
            let init_tmpl = substitute(template.initialization.as_deref().unwrap_or(""), rep, &rep_id);
            let media_tmpl = substitute(template.media.as_deref().unwrap_or(""), rep, &rep_id);
            let addressing = classify_addressing(&media_tmpl)?;
            let media_id_regex = build_id_regex(&media_tmpl, addressing)?;

            let init_path = asset_dir.join(&init_tmpl);
            let init_segment = fs::read(&init_path).map_err(|e| {
                LivesimError::Internal(format!("{}: {e}", init_path.display()))
            })?;
            let init_boxes = mp4box::split_boxes(&init_segment)?;
            let moov = mp4box::find_box(&init_boxes, b"moov")
                .ok_or_else(|| LivesimError::Internal("init segment has no moov".into()))?;
            let moov_children = mp4box::container_children(moov)?;
            let media_timescale = mp4box::find_nested(&moov_children, &[b"trak", b"mdia", b"mdhd"])?
                .map(|b| mp4box::parse_mdhd_timescale(&b))
                .transpose()?
                .ok_or_else(|| LivesimError::Internal("init segment has no mdhd".into()))?;
            let default_sample_duration = mp4box::find_nested(&moov_children, &[b"mvex", b"trex"])?
                .map(|b| mp4box::parse_trex_default_duration(&b))
                .transpose()?
                .unwrap_or(0);

            let segments = match addressing {
                Addressing::Time => enumerate_timeline_segments(
                    &asset_dir,
                    template,
                    &media_tmpl,
                    &rep_id,
                    rep,
                    default_sample_duration,
                )?,
                Addressing::Number => enumerate_numbered_segments(
                    &asset_dir,
                    template,
                    &media_tmpl,
                    &rep_id,
                    rep,
                    default_sample_duration,
                )?,
            };

            let start_number = match addressing {
                Addressing::Number => template.startNumber.unwrap_or(1),
                Addressing::Time => 0,
            };

            let constant_sample_duration = uniform_sample_duration(&segments);
            if content_type == ContentType::Audio && constant_sample_duration.is_none() {
                return Err(LivesimError::Internal(format!(
                    "{asset_rel_path}/{rep_id}: audio representation has no constant sample duration"
                )));
            }

            let rep_data = RepData {
                id: rep_id.clone(),
                content_type,
                codecs: rep
                    .codecs
                    .clone()
                    .or_else(|| adaptation.codecs.clone())
                    .unwrap_or_default(),
                mpd_timescale: template.timescale.unwrap_or(media_timescale as u64) as u32,
                media_timescale,
                init_template: init_tmpl,
                media_template: media_tmpl,
                addressing,
                media_id_regex,
                init_segment,
                segments,
                default_sample_duration,
                start_number,
                constant_sample_duration,
            };
            rep_data
                .check_invariants()
                .map_err(LivesimError::Internal)?;

            if let Some(root) = rep_data_root {
                let _ = sidecar::store(root, asset_rel_path, &rep_data);
            }
            reps.insert(rep_id, rep_data);
        }
    }

    if reps.is_empty() {
        return Err(LivesimError::Internal(format!(
            "{asset_rel_path}: no representations loaded"
        )));
    }

    let avg_seg_dur_ms = reps
        .values()
        .map(avg_segment_duration_ms)
        .fold(f64::INFINITY, f64::min);

    let mut mpds = HashMap::new();
    mpds.insert(
        mpd_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string(),
        MpdMeta {
            raw_xml: xml,
            title: mpd
                .ProgramInformation
                .as_ref()
                .and_then(|pi| pi.Title.as_ref())
                .and_then(|t| t.content.clone()),
            duration: mpd.mediaPresentationDuration.map(|d| format!("{d:?}")),
        },
    );

    let mut asset = Asset {
        path: asset_rel_path.to_string(),
        mpds,
        reps,
        reference_rep: String::new(),
        segment_dur_ms: avg_seg_dur_ms.round() as u64,
        loop_dur_ms: 0,
    };
    super::consolidate::consolidate(&mut asset)?;
    Ok(asset)
}

fn substitute(template: &str, rep: &Representation, rep_id: &str) -> String {
    let mut s = template.replace("$RepresentationID$", rep_id);
    if let Some(bw) = rep.bandwidth {
        s = s.replace("$Bandwidth$", &bw.to_string());
    }
    s
}

fn classify_addressing(media_template: &str) -> Result<Addressing> {
    let has_time = media_template.contains("$Time$");
    let has_number = media_template.contains("$Number$");
    match (has_time, has_number) {
        (true, false) => Ok(Addressing::Time),
        (false, true) => Ok(Addressing::Number),
        (true, true) => Err(LivesimError::Internal(
            "combined $Time$ and $Number$ addressing is not supported".into(),
        )),
        (false, false) => Err(LivesimError::Internal(
            "media template has neither $Time$ nor $Number$".into(),
        )),
    }
}

fn build_id_regex(media_template: &str, addressing: Addressing) -> Result<Regex> {
    let placeholder = match addressing {
        Addressing::Time => "$Time$",
        Addressing::Number => "$Number$",
    };
    let escaped = regex::escape(media_template).replace(&regex::escape(placeholder), r"(\d+)");
    Regex::new(&format!("^{escaped}$"))
        .map_err(|e| LivesimError::Internal(format!("bad media template regex: {e}")))
}

fn classify_content_type(adaptation: &AdaptationSet, rep: &Representation) -> ContentType {
    let hay = adaptation
        .contentType
        .clone()
        .or_else(|| adaptation.mimeType.clone())
        .or_else(|| rep.mimeType.clone())
        .unwrap_or_default();
    let codecs = rep
        .codecs
        .clone()
        .or_else(|| adaptation.codecs.clone())
        .unwrap_or_default();
    if hay.contains("image") {
        ContentType::Image
    } else if codecs.starts_with("stpp") || codecs.starts_with("wvtt") || hay.contains("text") {
        ContentType::Subtitle
    } else if hay.contains("audio") {
        ContentType::Audio
    } else {
        ContentType::Video
    }
}

fn segment_path(asset_dir: &Path, media_tmpl: &str, value: u64) -> PathBuf {
    let name = media_tmpl
        .replace("$Time$", &value.to_string())
        .replace("$Number$", &value.to_string());
    asset_dir.join(name)
}

/// Reads one fragment's timing. `default_sample_duration` is the
/// `trex`-derived fallback; if this fragment's `tfhd` carries its own
/// `default_sample_duration`, that value is used instead here and written
/// back so later fragments inherit it too, per the mp4 convention that a
/// `tfhd` override holds until the next fragment that overrides it again.
fn read_segment_timing(
    path: &Path,
    default_sample_duration: &mut u32,
) -> Result<(u64, u64, Option<u32>)> {
    let bytes = fs::read(path).map_err(|e| LivesimError::Internal(format!("{}: {e}", path.display())))?;
    let boxes = mp4box::split_boxes(&bytes)?;
    let moof = mp4box::find_box(&boxes, b"moof")
        .ok_or_else(|| LivesimError::Internal(format!("{}: no moof box", path.display())))?;
    let moof_children = mp4box::container_children(moof)?;
    let traf = mp4box::find_box(&moof_children, b"traf")
        .ok_or_else(|| LivesimError::Internal(format!("{}: no traf box", path.display())))?;
    let traf_children = mp4box::container_children(traf)?;
    let tfhd_raw = mp4box::find_box(&traf_children, b"tfhd")
        .ok_or_else(|| LivesimError::Internal(format!("{}: no tfhd box", path.display())))?;
    let tfhd = mp4box::Tfhd::parse(tfhd_raw)?;
    if let Some(d) = tfhd.default_sample_duration {
        *default_sample_duration = d;
    }
    let tfdt_raw = mp4box::find_box(&traf_children, b"tfdt")
        .ok_or_else(|| LivesimError::Internal(format!("{}: no tfdt box", path.display())))?;
    let tfdt = Tfdt::parse(tfdt_raw)?;
    let trun_raw = mp4box::find_box(&traf_children, b"trun")
        .ok_or_else(|| LivesimError::Internal(format!("{}: no trun box", path.display())))?;
    let trun = Trun::parse(trun_raw)?;
    let total = trun.total_duration(*default_sample_duration);
    let common = uniform_duration(&trun, *default_sample_duration);
    Ok((tfdt.base_media_decode_time, total, common))
}

fn uniform_duration(trun: &Trun, default_sample_duration: u32) -> Option<u32> {
    let mut it = trun
        .samples
        .iter()
        .map(|s| s.duration.unwrap_or(default_sample_duration));
    let first = it.next()?;
    if it.all(|d| d == first) {
        Some(first)
    } else {
        None
    }
}

fn enumerate_timeline_segments(
    asset_dir: &Path,
    template: &dash_mpd::SegmentTemplate,
    media_tmpl: &str,
    _rep_id: &str,
    _rep: &Representation,
    default_sample_duration: u32,
) -> Result<Vec<Segment>> {
    let timeline = template
        .SegmentTimeline
        .as_ref()
        .ok_or_else(|| LivesimError::Internal("$Time$ addressing requires a SegmentTimeline".into()))?;
    let mut segments = Vec::new();
    let mut cur_time: i64 = 0;
    let mut nr: u64 = 0;
    let mut default_sample_duration = default_sample_duration;
    for s in &timeline.segments {
        if let Some(t) = s.t {
            cur_time = t;
        }
        let repeat = s.r.unwrap_or(0).max(0);
        for _ in 0..=repeat {
            let start = cur_time as u64;
            let end = start + s.d as u64;
            let path = segment_path(asset_dir, media_tmpl, start);
            let (_tfdt, _dur, common) = read_segment_timing(&path, &mut default_sample_duration)?;
            segments.push(Segment {
                start_time: start,
                end_time: end,
                nr,
                common_sample_dur: common,
            });
            cur_time += s.d;
            nr += 1;
        }
    }
    Ok(segments)
}

fn enumerate_numbered_segments(
    asset_dir: &Path,
    template: &dash_mpd::SegmentTemplate,
    media_tmpl: &str,
    _rep_id: &str,
    _rep: &Representation,
    default_sample_duration: u32,
) -> Result<Vec<Segment>> {
    let start_number = template.startNumber.unwrap_or(1);
    let mut segments: Vec<Segment> = Vec::new();
    let mut nr = start_number;
    let mut default_sample_duration = default_sample_duration;
    loop {
        let path = segment_path(asset_dir, media_tmpl, nr);
        if !path.exists() {
            break;
        }
        let (start_time, duration, common) = read_segment_timing(&path, &mut default_sample_duration)?;
        if let Some(prev) = segments.last_mut() {
            prev.end_time = start_time;
        }
        segments.push(Segment {
            start_time,
            end_time: start_time + duration,
            nr: nr - start_number,
            common_sample_dur: common,
        });
        nr += 1;
    }
    Ok(segments)
}

fn uniform_sample_duration(segments: &[Segment]) -> Option<u32> {
    let mut it = segments.iter().map(|s| s.common_sample_dur);
    let first = it.next()??;
    if it.all(|d| d == Some(first)) {
        Some(first)
    } else {
        None
    }
}

fn avg_segment_duration_ms(rep: &RepData) -> f64 {
    if rep.segments.is_empty() {
        return f64::INFINITY;
    }
    let total_ms = rep.duration() as f64 * 1000.0 / rep.media_timescale as f64;
    total_ms / rep.segments.len() as f64
}
