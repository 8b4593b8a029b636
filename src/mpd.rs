//! Live-MPD generator.
//!
//! Converts a statically-packaged VoD MPD into a `type="dynamic"` manifest
//! for one request: `availabilityStartTime`/`publishTime`/`minimumUpdatePeriod`/
//! `timeShiftBufferDepth`, `UTCTiming`, per-`AdaptationSet` `SegmentTemplate`/
//! `SegmentTimeline` selection, optional period splitting, and optional
//! generated subtitle `AdaptationSet`s.
//!
//! Static per-representation attributes (`bandwidth`, `width`, `height`,
//! `audioSamplingRate`, `frameRate`, `mimeType`) aren't kept on `RepData` —
//! only what the live engine needs to resolve segments — so this module
//! re-parses the asset's cached `raw_xml` through `dash_mpd::parse` at
//! request time to recover them, the same way the asset loader itself reads
//! the VoD MPD once at startup.

use serde::Serialize;

use crate::asset::{Asset, ContentType, RepData};
use crate::audio::calc_audio_seg_recipe;
use crate::error::{LivesimError, Result};
use crate::options::{Ato, LiveMpdType, ResponseConfig, UtcMethod};
use crate::timeline::segtimeline::{generate_reference_timeline, project_timeline_to_audio, TimelineEntry};
use crate::timeline::wraptimes::{self, WrapTimes};

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename = "MPD")]
pub struct MpdXml {
    #[serde(rename = "@xmlns")]
    pub xmlns: String,
    #[serde(rename = "@type")]
    pub mpd_type: String,
    #[serde(rename = "@profiles", skip_serializing_if = "Option::is_none")]
    pub profiles: Option<String>,
    #[serde(rename = "@minBufferTime", skip_serializing_if = "Option::is_none")]
    pub min_buffer_time: Option<String>,
    #[serde(rename = "@availabilityStartTime", skip_serializing_if = "Option::is_none")]
    pub availability_start_time: Option<String>,
    #[serde(rename = "@publishTime", skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<String>,
    #[serde(rename = "@minimumUpdatePeriod", skip_serializing_if = "Option::is_none")]
    pub minimum_update_period: Option<String>,
    #[serde(rename = "@timeShiftBufferDepth", skip_serializing_if = "Option::is_none")]
    pub time_shift_buffer_depth: Option<String>,
    #[serde(rename = "@mediaPresentationDuration", skip_serializing_if = "Option::is_none")]
    pub media_presentation_duration: Option<String>,
    #[serde(rename = "@suggestedPresentationDelay", skip_serializing_if = "Option::is_none")]
    pub suggested_presentation_delay: Option<String>,
    #[serde(rename = "UTCTiming", skip_serializing_if = "Vec::is_empty", default)]
    pub utc_timing: Vec<UtcTimingXml>,
    #[serde(rename = "Period")]
    pub periods: Vec<PeriodXml>,
    #[serde(rename = "Location", skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SupplementalPropertyXml {
    #[serde(rename = "@schemeIdUri")]
    pub scheme_id_uri: String,
    #[serde(rename = "@value")]
    pub value: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct UtcTimingXml {
    #[serde(rename = "@schemeIdUri")]
    pub scheme_id_uri: String,
    #[serde(rename = "@value")]
    pub value: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct PeriodXml {
    #[serde(rename = "@id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "@start", skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(rename = "AdaptationSet")]
    pub adaptation_sets: Vec<AdaptationSetXml>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct AdaptationSetXml {
    #[serde(rename = "@id")]
    pub id: i64,
    #[serde(rename = "@contentType", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(rename = "@mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(rename = "@codecs", skip_serializing_if = "Option::is_none")]
    pub codecs: Option<String>,
    #[serde(rename = "@lang", skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(rename = "@frameRate", skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<String>,
    #[serde(rename = "@audioSamplingRate", skip_serializing_if = "Option::is_none")]
    pub audio_sampling_rate: Option<u64>,
    #[serde(rename = "@segmentAlignment", skip_serializing_if = "Option::is_none")]
    pub segment_alignment: Option<bool>,
    #[serde(rename = "ProducerReferenceTime", skip_serializing_if = "Option::is_none")]
    pub producer_reference_time: Option<ProducerReferenceTimeXml>,
    /// Period-continuity signal (`continuous` option): names the preceding
    /// sub-period's id so a client that already buffered it can keep
    /// decoding across the boundary without a gap.
    #[serde(rename = "SupplementalProperty", skip_serializing_if = "Option::is_none")]
    pub supplemental_property: Option<SupplementalPropertyXml>,
    #[serde(rename = "SegmentTemplate")]
    pub segment_template: SegmentTemplateXml,
    #[serde(rename = "Representation")]
    pub representations: Vec<RepresentationXml>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RepresentationXml {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@bandwidth", skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<u64>,
    #[serde(rename = "@width", skip_serializing_if = "Option::is_none")]
    pub width: Option<u64>,
    #[serde(rename = "@height", skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(rename = "@codecs", skip_serializing_if = "Option::is_none")]
    pub codecs: Option<String>,
    #[serde(rename = "@mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SegmentTemplateXml {
    #[serde(rename = "@initialization", skip_serializing_if = "Option::is_none")]
    pub initialization: Option<String>,
    #[serde(rename = "@media", skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    #[serde(rename = "@timescale", skip_serializing_if = "Option::is_none")]
    pub timescale: Option<u32>,
    #[serde(rename = "@duration", skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(rename = "@startNumber", skip_serializing_if = "Option::is_none")]
    pub start_number: Option<i64>,
    #[serde(rename = "@presentationTimeOffset", skip_serializing_if = "Option::is_none")]
    pub presentation_time_offset: Option<u64>,
    #[serde(rename = "@availabilityTimeOffset", skip_serializing_if = "Option::is_none")]
    pub availability_time_offset: Option<f64>,
    #[serde(rename = "@availabilityTimeComplete", skip_serializing_if = "Option::is_none")]
    pub availability_time_complete: Option<bool>,
    #[serde(rename = "SegmentTimeline", skip_serializing_if = "Option::is_none")]
    pub segment_timeline: Option<SegmentTimelineXml>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SegmentTimelineXml {
    #[serde(rename = "S")]
    pub s: Vec<SXml>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SXml {
    #[serde(rename = "@t")]
    pub t: u64,
    #[serde(rename = "@d")]
    pub d: u64,
    #[serde(rename = "@r", skip_serializing_if = "Option::is_none")]
    pub r: Option<u32>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ProducerReferenceTimeXml {
    #[serde(rename = "@id")]
    pub id: u32,
    #[serde(rename = "@type")]
    pub prt_type: String,
    #[serde(rename = "@wallClockTime")]
    pub wall_clock_time: String,
    #[serde(rename = "@presentationTime")]
    pub presentation_time: u64,
}

/// Everything [`build_live_mpd`] needs beyond the asset index and config.
pub struct MpdRequest<'a> {
    pub asset: &'a Asset,
    pub mpd_filename: &'a str,
    pub cfg: &'a ResponseConfig,
    pub now_ms: i64,
    /// Absolutized URL of this request with `startrel`/`stoprel` resolved to
    /// `start`/`stop`, precomputed by the server layer. `None` unless
    /// `startrel`/`stoprel` were used.
    pub location_url: Option<&'a str>,
    /// Base URL used to build `UTCTiming` server-time endpoints.
    pub base_url: &'a str,
}

/// Availability-start time in seconds since epoch, from `ast`/`startrel`.
fn resolve_ast_s(cfg: &ResponseConfig, now_ms: i64) -> f64 {
    if let Some(ast) = cfg.ast {
        return ast;
    }
    if let Some(startrel) = cfg.startrel {
        return now_ms as f64 / 1000.0 + startrel;
    }
    0.0
}

/// Wall-clock stop time in seconds since epoch, if configured.
fn resolve_stop_s(cfg: &ResponseConfig, now_ms: i64) -> Option<f64> {
    if let Some(stop) = cfg.stop {
        return Some(stop);
    }
    cfg.stoprel.map(|stoprel| now_ms as f64 / 1000.0 + stoprel)
}

fn ato_ts_for(cfg: &ResponseConfig, timescale: u32) -> i64 {
    match cfg.ato {
        Some(Ato::Finite(s)) if s > 0.0 => (s * timescale as f64).round() as i64,
        _ => 0,
    }
}

fn ato_s(cfg: &ResponseConfig) -> f64 {
    match cfg.ato {
        Some(Ato::Finite(s)) => s,
        _ => 0.0,
    }
}

fn iso8601_duration(seconds: f64) -> String {
    format!("PT{:.3}S", seconds.max(0.0))
}

fn rfc3339(epoch_s: f64) -> String {
    let secs = epoch_s.floor() as i64;
    let nanos = ((epoch_s - epoch_s.floor()) * 1_000_000_000.0).round() as u32;
    chrono::DateTime::from_timestamp(secs, nanos)
        .unwrap_or_else(|| chrono::DateTime::from_timestamp(0, 0).expect("epoch is valid"))
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Build the dynamic MPD XML document for one request.
pub fn build_live_mpd(req: &MpdRequest) -> Result<String> {
    let asset = req.asset;
    let cfg = req.cfg;
    let mpd_meta = asset.mpds.get(req.mpd_filename).ok_or_else(|| {
        LivesimError::NotFound(format!("unknown MPD {}", req.mpd_filename))
    })?;
    let vod: dash_mpd::MPD =
        dash_mpd::parse(&mpd_meta.raw_xml).map_err(|e| LivesimError::Internal(e.to_string()))?;
    let vod_period = vod
        .periods
        .first()
        .ok_or_else(|| LivesimError::Internal("VoD MPD has no Period".into()))?;

    let ast_s = resolve_ast_s(cfg, req.now_ms);
    let now_s = req.now_ms as f64 / 1000.0;
    let stop_s = resolve_stop_s(cfg, req.now_ms);
    let tsbd_s = cfg.tsbd.unwrap_or(60);
    let mode = cfg.live_mpd_type();

    let wrap = wraptimes::compute(req.now_ms, ast_s, tsbd_s as i64 * 1000, asset.loop_dur_ms);

    let ref_rep = asset.reference();
    let ref_ato_ts = ato_ts_for(cfg, ref_rep.media_timescale);
    let ref_gen = generate_reference_timeline(ref_rep, &wrap, ref_ato_ts)?;

    let is_finished = stop_s.is_some_and(|s| now_s >= s);

    let mut utc_timing = Vec::new();
    if !cfg.utc.iter().any(|m| matches!(m, UtcMethod::None_)) {
        if cfg.utc.is_empty() {
            utc_timing.push(default_utc_timing(req.base_url));
        } else {
            for method in &cfg.utc {
                if let Some(t) = utc_timing_for(*method, req.base_url, now_s, &vod) {
                    utc_timing.push(t);
                }
            }
        }
    }

    let mut next_subs_id: i64 = 100;
    let mut adaptation_sets = Vec::new();
    let mut publish_time_s = ast_s;

    for adaptation in vod_period.adaptations.iter().flatten() {
        let mut reps_xml = Vec::new();
        let mut content_type: Option<ContentType> = None;
        let mut any_rep: Option<&RepData> = None;

        for rep_static in adaptation.representations.iter().flatten() {
            let rep_id = rep_static
                .id
                .clone()
                .ok_or_else(|| LivesimError::Internal("Representation has no @id".into()))?;
            let rep = asset.rep(&rep_id).ok_or_else(|| {
                LivesimError::Internal(format!("Representation {rep_id} missing from asset index"))
            })?;
            content_type.get_or_insert(rep.content_type);
            any_rep.get_or_insert(rep);
            reps_xml.push(RepresentationXml {
                id: rep_id,
                bandwidth: rep_static.bandwidth,
                width: rep_static.width,
                height: rep_static.height,
                codecs: rep_static.codecs.clone().or_else(|| Some(rep.codecs.clone())),
                mime_type: rep_static.mimeType.clone(),
            });
        }
        let Some(rep) = any_rep else { continue };
        let content_type = content_type.unwrap_or(ContentType::Video);

        let effective_mode = if content_type == ContentType::Image {
            LiveMpdType::SegmentNumber
        } else {
            mode
        };

        let (template, start_nr, last_avail_s) =
            build_segment_template(asset, rep, &ref_gen, content_type, effective_mode, cfg, &wrap)?;

        if content_type != ContentType::Audio {
            if let Some(avail) = last_avail_s {
                publish_time_s = publish_time_s.max(avail);
            }
        }

        let ato_configured = cfg.ato.is_some();
        let producer_reference_time = if ato_configured {
            Some(ProducerReferenceTimeXml {
                id: 0,
                prt_type: "encoder".to_string(),
                wall_clock_time: rfc3339(ast_s),
                presentation_time: 0,
            })
        } else {
            None
        };

        adaptation_sets.push(AdaptationSetXml {
            id: adaptation.id.unwrap_or(adaptation_sets.len() as i64),
            content_type: Some(content_type_str(content_type).to_string()),
            mime_type: adaptation.mimeType.clone(),
            codecs: adaptation.codecs.clone(),
            lang: adaptation.lang.clone(),
            frame_rate: adaptation.frameRate.clone(),
            audio_sampling_rate: adaptation.audioSamplingRate,
            segment_alignment: adaptation.segmentAlignment,
            producer_reference_time,
            supplemental_property: None,
            segment_template: template,
            representations: reps_xml,
        });
        let _ = start_nr;
    }

    for lang in &cfg.timesubsstpp {
        adaptation_sets.push(build_generated_subtitle_as(
            next_subs_id, lang, "stpp", "timestpp", &ref_gen, ref_rep, mode,
        ));
        next_subs_id += 1;
    }
    for lang in &cfg.timesubswvtt {
        adaptation_sets.push(build_generated_subtitle_as(
            next_subs_id, lang, "wvtt", "timewvtt", &ref_gen, ref_rep, mode,
        ));
        next_subs_id += 1;
    }

    if mode == LiveMpdType::SegmentNumber {
        publish_time_s = ast_s;
    }

    let periods = if let Some(per_hour) = cfg.periods_per_hour {
        vec![split_current_period(per_hour, ast_s, now_s, cfg.continuous, asset, &mut adaptation_sets)?]
    } else {
        vec![PeriodXml {
            id: Some("P0".to_string()),
            start: Some(iso8601_duration(0.0)),
            adaptation_sets,
        }]
    };

    let mpd = MpdXml {
        xmlns: "urn:mpeg:dash:schema:mpd:2011".to_string(),
        mpd_type: if is_finished { "static".to_string() } else { "dynamic".to_string() },
        profiles: vod.profiles.clone(),
        min_buffer_time: vod.minBufferTime.clone(),
        availability_start_time: Some(rfc3339(ast_s)),
        publish_time: Some(rfc3339(publish_time_s)),
        minimum_update_period: if is_finished {
            None
        } else {
            Some(iso8601_duration(cfg.mup.unwrap_or(asset.segment_dur_ms as f64 / 1000.0)))
        },
        time_shift_buffer_depth: if is_finished { None } else { Some(iso8601_duration(tsbd_s as f64)) },
        media_presentation_duration: stop_s
            .filter(|_| is_finished)
            .map(|s| iso8601_duration((s - ast_s).max(0.0))),
        suggested_presentation_delay: None,
        utc_timing,
        periods,
        location: req.location_url.map(str::to_string),
    };

    let mut xml = quick_xml::se::to_string(&mpd)?;
    xml.insert_str(0, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    Ok(xml)
}

fn content_type_str(ct: ContentType) -> &'static str {
    match ct {
        ContentType::Video => "video",
        ContentType::Audio => "audio",
        ContentType::Text | ContentType::Subtitle => "text",
        ContentType::Image => "image",
    }
}

fn default_utc_timing(base_url: &str) -> UtcTimingXml {
    UtcTimingXml {
        scheme_id_uri: "urn:mpeg:dash:utc:http-iso:2014".to_string(),
        value: format!("{base_url}/time.iso"),
    }
}

fn utc_timing_for(
    method: UtcMethod,
    base_url: &str,
    now_s: f64,
    vod: &dash_mpd::MPD,
) -> Option<UtcTimingXml> {
    match method {
        UtcMethod::Direct => Some(UtcTimingXml {
            scheme_id_uri: "urn:mpeg:dash:utc:direct:2014".to_string(),
            value: rfc3339(now_s),
        }),
        UtcMethod::Head => Some(UtcTimingXml {
            scheme_id_uri: "urn:mpeg:dash:utc:http-head:2014".to_string(),
            value: format!("{base_url}/"),
        }),
        UtcMethod::Ntp => Some(UtcTimingXml {
            scheme_id_uri: "urn:mpeg:dash:utc:ntp:2014".to_string(),
            value: "pool.ntp.org".to_string(),
        }),
        UtcMethod::Sntp => Some(UtcTimingXml {
            scheme_id_uri: "urn:mpeg:dash:utc:sntp:2014".to_string(),
            value: "pool.ntp.org".to_string(),
        }),
        UtcMethod::HttpXsdate => Some(UtcTimingXml {
            scheme_id_uri: "urn:mpeg:dash:utc:http-xsdate:2014".to_string(),
            value: format!("{base_url}/time.xsdate"),
        }),
        UtcMethod::HttpIso => Some(default_utc_timing(base_url)),
        UtcMethod::Keep => vod.UTCTiming.as_ref().map(|t| UtcTimingXml {
            scheme_id_uri: t.schemeIdUri.clone().unwrap_or_default(),
            value: t.value.clone().unwrap_or_default(),
        }),
        UtcMethod::None_ => None,
    }
}

/// Build one `AdaptationSet`'s `SegmentTemplate` for the configured
/// `LiveMpdType`, returning it alongside the `startNumber` used and (for
/// non-audio reps) the wall-clock availability time of its last produced
/// segment, used to derive `publishTime`.
fn build_segment_template(
    asset: &Asset,
    rep: &RepData,
    ref_gen: &crate::timeline::segtimeline::GeneratedTimeline,
    content_type: ContentType,
    mode: LiveMpdType,
    cfg: &ResponseConfig,
    wrap: &WrapTimes,
) -> Result<(SegmentTemplateXml, i64, Option<f64>)> {
    let ato = cfg.ato;
    let ato_complete = cfg.availability_time_complete();
    let ref_rep = asset.reference();

    let (entries, start_nr, last_avail_s, timescale): (Vec<TimelineEntry>, i64, Option<f64>, u32) =
        if content_type == ContentType::Audio {
            let sample_dur = rep.constant_sample_duration.ok_or_else(|| {
                LivesimError::Internal(format!("audio representation {} has no constant sample duration", rep.id))
            })?;
            let entries = project_timeline_to_audio(
                &ref_gen.entries,
                ref_rep.media_timescale,
                rep.media_timescale,
                sample_dur,
            );
            let last_avail = ref_gen.last_seg.map(|last| {
                let recipe = calc_audio_seg_recipe(
                    last.nr,
                    last.start_time,
                    last.start_time + last.dur,
                    ref_rep.duration(),
                    ref_rep.media_timescale,
                    rep,
                )
                .expect("reference timeline segments are always representable as an audio recipe");
                recipe.end_time as f64 / rep.media_timescale as f64
            });
            (entries, ref_gen.start_nr, last_avail, rep.media_timescale)
        } else {
            let ato_ts = ato_ts_for(cfg, rep.media_timescale);
            let gen = generate_reference_timeline(rep, wrap, ato_ts)?;
            let last_avail = gen
                .last_seg
                .map(|l| (l.start_time + l.dur) as f64 / l.timescale as f64);
            (gen.entries, gen.start_nr, last_avail, rep.media_timescale)
        };

    let mut template = SegmentTemplateXml {
        initialization: Some(rep.init_template.clone()),
        timescale: Some(timescale),
        ..Default::default()
    };

    match mode {
        LiveMpdType::TimelineTime if content_type != ContentType::Image => {
            template.media = Some(rep.media_template.replace("$Number$", "$Time$"));
            template.segment_timeline = Some(SegmentTimelineXml { s: to_s_entries(&entries) });
        }
        LiveMpdType::TimelineNumber if content_type != ContentType::Image => {
            template.media = Some(rep.media_template.clone());
            template.start_number = Some(start_nr);
            template.segment_timeline = Some(SegmentTimelineXml { s: to_s_entries(&entries) });
        }
        _ => {
            template.media = Some(rep.media_template.replace("$Time$", "$Number$"));
            template.duration = Some(asset.segment_dur_ms * timescale as u64 / 1000);
            template.start_number = Some(cfg.snr.unwrap_or(start_nr));
        }
    }

    if let Some(ato) = ato {
        match ato {
            Ato::Finite(s) => template.availability_time_offset = Some(s),
            Ato::Infinite => template.availability_time_offset = Some(f64::INFINITY),
        }
        template.availability_time_complete = Some(ato_complete);
    }

    Ok((template, start_nr, last_avail_s.map(|s| s - ato_s(cfg))))
}

fn to_s_entries(entries: &[TimelineEntry]) -> Vec<SXml> {
    entries
        .iter()
        .map(|e| SXml {
            t: e.t,
            d: e.d,
            r: if e.r > 0 { Some(e.r) } else { None },
        })
        .collect()
}

fn build_generated_subtitle_as(
    id: i64,
    lang: &str,
    codec: &str,
    template_prefix: &str,
    ref_gen: &crate::timeline::segtimeline::GeneratedTimeline,
    ref_rep: &RepData,
    mode: LiveMpdType,
) -> AdaptationSetXml {
    let dir = format!("{template_prefix}-{lang}");
    let mut template = SegmentTemplateXml {
        initialization: Some(format!("{dir}/init.mp4")),
        timescale: Some(ref_rep.media_timescale),
        ..Default::default()
    };
    match mode {
        LiveMpdType::TimelineTime => {
            template.media = Some(format!("{dir}/$Time$.m4s"));
            template.segment_timeline = Some(SegmentTimelineXml { s: to_s_entries(&ref_gen.entries) });
        }
        LiveMpdType::TimelineNumber => {
            template.media = Some(format!("{dir}/$Number$.m4s"));
            template.start_number = Some(ref_gen.start_nr);
            template.segment_timeline = Some(SegmentTimelineXml { s: to_s_entries(&ref_gen.entries) });
        }
        LiveMpdType::SegmentNumber => {
            template.media = Some(format!("{dir}/$Number$.m4s"));
            template.start_number = Some(ref_gen.start_nr);
            template.duration = Some(ref_rep.duration() / ref_rep.num_segments().max(1));
        }
    }
    AdaptationSetXml {
        id,
        content_type: Some("text".to_string()),
        mime_type: Some("application/mp4".to_string()),
        codecs: Some(codec.to_string()),
        lang: Some(lang.to_string()),
        segment_template: template,
        representations: vec![RepresentationXml {
            id: dir,
            codecs: Some(codec.to_string()),
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Split the single VoD period into `3600/periodsPerHour`-second
/// sub-periods and return the one currently active, with
/// `presentationTimeOffset` recomputed per `AdaptationSet`.
///
/// Each request only serves the currently active sub-period rather than the
/// full historical back-catalog: a client walks the sequence by refreshing
/// the MPD as wall-clock time crosses each sub-period boundary, not by
/// having every past sub-period handed to it at once. When `continuous` is
/// set, every `AdaptationSet` in the active sub-period carries a
/// period-continuity `SupplementalProperty` naming the immediately
/// preceding sub-period's id, so a client need not treat the boundary as a
/// period switch requiring a new decoder pipeline.
fn split_current_period(
    periods_per_hour: u64,
    ast_s: f64,
    now_s: f64,
    continuous: bool,
    asset: &Asset,
    adaptation_sets: &mut [AdaptationSetXml],
) -> Result<PeriodXml> {
    if periods_per_hour == 0 {
        return Err(LivesimError::BadConfig("periodsPerHour must be > 0".into()));
    }
    let period_dur_s = 3600.0 / periods_per_hour as f64;
    let period_dur_ms = (period_dur_s * 1000.0).round() as u64;
    if asset.segment_dur_ms == 0 || period_dur_ms % asset.segment_dur_ms != 0 {
        return Err(LivesimError::BadConfig(
            "periodsPerHour sub-period duration must be a multiple of the segment duration".into(),
        ));
    }

    let elapsed_s = (now_s - ast_s).max(0.0);
    let period_idx = (elapsed_s / period_dur_s).floor() as u64;
    let period_start_s = ast_s + period_idx as f64 * period_dur_s;

    let continuity = if continuous && period_idx > 0 {
        Some(SupplementalPropertyXml {
            scheme_id_uri: "urn:mpeg:dash:period-continuity:2015".to_string(),
            value: format!("P{}", period_idx - 1),
        })
    } else {
        None
    };

    for aset in adaptation_sets.iter_mut() {
        let ts = aset.segment_template.timescale.unwrap_or(1) as f64;
        let offset_s = period_start_s - ast_s;
        aset.segment_template.presentation_time_offset = Some((offset_s * ts).round() as u64);
        if let Some(start_number) = aset.segment_template.start_number {
            let segs_per_period = (period_dur_ms / asset.segment_dur_ms.max(1)) as i64;
            aset.segment_template.start_number = Some(start_number + period_idx as i64 * segs_per_period);
        }
        aset.supplemental_property = continuity.clone();
    }

    Ok(PeriodXml {
        id: Some(format!("P{period_idx}")),
        start: Some(iso8601_duration(period_start_s - ast_s)),
        adaptation_sets: adaptation_sets.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{Addressing, MpdMeta, Segment};
    use regex::Regex;
    use std::collections::HashMap;

    fn rep(id: &str, ct: ContentType, ts: u32, seg_dur: u64, n: u64, sample_dur: Option<u32>) -> RepData {
        let mut segments = Vec::new();
        for i in 0..n {
            segments.push(Segment {
                start_time: i * seg_dur,
                end_time: (i + 1) * seg_dur,
                nr: i,
                common_sample_dur: sample_dur,
            });
        }
        RepData {
            id: id.to_string(),
            content_type: ct,
            codecs: if ct == ContentType::Audio { "mp4a.40.2".into() } else { "avc1.64001f".into() },
            mpd_timescale: ts,
            media_timescale: ts,
            init_template: format!("{id}/init.mp4"),
            media_template: format!("{id}/$Number$.m4s"),
            addressing: Addressing::Number,
            media_id_regex: Regex::new(r"(\d+)").unwrap(),
            init_segment: vec![],
            segments,
            default_sample_duration: sample_dur.unwrap_or(seg_dur as u32),
            start_number: 0,
            constant_sample_duration: sample_dur,
        }
    }

    fn test_asset() -> Asset {
        let v = rep("V300", ContentType::Video, 90_000, 180_000, 4, Some(3003));
        let a = rep("A48", ContentType::Audio, 48_000, 96_000, 4, Some(1024));
        let mut reps = HashMap::new();
        reps.insert("V300".to_string(), v);
        reps.insert("A48".to_string(), a);
        let mut mpds = HashMap::new();
        mpds.insert(
            "Manifest.mpd".to_string(),
            MpdMeta {
                raw_xml: SAMPLE_VOD_XML.to_string(),
                title: None,
                duration: None,
            },
        );
        Asset {
            path: "testpic_2s".to_string(),
            mpds,
            reps,
            reference_rep: "V300".to_string(),
            segment_dur_ms: 2000,
            loop_dur_ms: 8000,
        }
    }

    const SAMPLE_VOD_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT8S" minBufferTime="PT2S" profiles="urn:mpeg:dash:profile:isoff-live:2011">
  <Period>
    <AdaptationSet id="0" contentType="video" segmentAlignment="true">
      <SegmentTemplate initialization="V300/init.mp4" media="V300/$Number$.m4s" timescale="90000" duration="180000" startNumber="0"/>
      <Representation id="V300" mimeType="video/mp4" codecs="avc1.64001f" width="640" height="360" bandwidth="300000"/>
    </AdaptationSet>
    <AdaptationSet id="1" contentType="audio">
      <SegmentTemplate initialization="A48/init.mp4" media="A48/$Number$.m4s" timescale="48000" duration="96000" startNumber="0"/>
      <Representation id="A48" mimeType="audio/mp4" codecs="mp4a.40.2" audioSamplingRate="48000" bandwidth="48000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

    fn req<'a>(asset: &'a Asset, cfg: &'a ResponseConfig, now_ms: i64) -> MpdRequest<'a> {
        MpdRequest {
            asset,
            mpd_filename: "Manifest.mpd",
            cfg,
            now_ms,
            location_url: None,
            base_url: "http://localhost:8080",
        }
    }

    #[test]
    fn segment_number_mode_produces_dynamic_mpd_with_expected_attrs() {
        let asset = test_asset();
        let cfg = ResponseConfig::default();
        let xml = build_live_mpd(&req(&asset, &cfg, 20_000)).unwrap();
        assert!(xml.contains(r#"type="dynamic""#));
        assert!(xml.contains("V300/$Number$.m4s"));
        assert!(xml.contains("A48/$Number$.m4s"));
        assert!(xml.contains("urn:mpeg:dash:utc:http-iso:2014"));
        assert!(!xml.contains("mediaPresentationDuration"));
    }

    #[test]
    fn segtimeline_mode_emits_segment_timeline_and_time_addressing() {
        let asset = test_asset();
        let mut cfg = ResponseConfig::default();
        cfg.segtimeline = true;
        let xml = build_live_mpd(&req(&asset, &cfg, 20_000)).unwrap();
        assert!(xml.contains("SegmentTimeline"));
        assert!(xml.contains("V300/$Time$.m4s"));
        assert!(!xml.contains(r#"startNumber="#));
    }

    #[test]
    fn segtimelinenr_mode_keeps_number_addressing_with_start_number() {
        let asset = test_asset();
        let mut cfg = ResponseConfig::default();
        cfg.segtimelinenr = true;
        let xml = build_live_mpd(&req(&asset, &cfg, 20_000)).unwrap();
        assert!(xml.contains("SegmentTimeline"));
        assert!(xml.contains("V300/$Number$.m4s"));
        assert!(xml.contains("startNumber"));
    }

    #[test]
    fn ato_configured_sets_availability_time_offset_and_prt() {
        let asset = test_asset();
        let mut cfg = ResponseConfig::default();
        cfg.ato = Some(Ato::Finite(2.0));
        let xml = build_live_mpd(&req(&asset, &cfg, 20_000)).unwrap();
        assert!(xml.contains("availabilityTimeOffset=\"2\""));
        assert!(xml.contains("availabilityTimeComplete=\"false\""));
        assert!(xml.contains("ProducerReferenceTime"));
    }

    #[test]
    fn timesubsstpp_appends_generated_adaptation_set_starting_at_100() {
        let asset = test_asset();
        let mut cfg = ResponseConfig::default();
        cfg.timesubsstpp = vec!["en".to_string()];
        let xml = build_live_mpd(&req(&asset, &cfg, 20_000)).unwrap();
        assert!(xml.contains(r#"id="100""#));
        assert!(xml.contains("timestpp-en/init.mp4"));
    }

    #[test]
    fn utc_none_suppresses_all_utc_timing() {
        let asset = test_asset();
        let mut cfg = ResponseConfig::default();
        cfg.utc = vec![UtcMethod::None_];
        let xml = build_live_mpd(&req(&asset, &cfg, 20_000)).unwrap();
        assert!(!xml.contains("UTCTiming"));
    }

    #[test]
    fn continuous_periods_signal_continuity_with_preceding_period() {
        let asset = test_asset();
        let mut cfg = ResponseConfig::default();
        cfg.periods_per_hour = Some(1800); // 2s sub-periods, matches segment_dur_ms.
        cfg.continuous = true;
        let xml = build_live_mpd(&req(&asset, &cfg, 5_000)).unwrap();
        assert!(xml.contains(r#"id="P2""#));
        assert!(xml.contains("urn:mpeg:dash:period-continuity:2015"));
        assert!(xml.contains(r#"value="P1""#));
    }

    #[test]
    fn periods_without_continuous_emit_no_continuity_signal() {
        let asset = test_asset();
        let mut cfg = ResponseConfig::default();
        cfg.periods_per_hour = Some(1800);
        let xml = build_live_mpd(&req(&asset, &cfg, 5_000)).unwrap();
        assert!(!xml.contains("period-continuity"));
    }

    #[test]
    fn location_is_emitted_only_when_precomputed() {
        let asset = test_asset();
        let cfg = ResponseConfig::default();
        let mut r = req(&asset, &cfg, 20_000);
        r.location_url = Some("http://localhost:8080/livesim2/start_10/testpic_2s/Manifest.mpd");
        let xml = build_live_mpd(&r).unwrap();
        assert!(xml.contains("<Location>"));
    }
}
