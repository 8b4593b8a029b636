//! The `/livesim2/...` request dispatcher: URL option parsing, asset/rep
//! resolution, availability/statuscode checks, and the fan-out to the
//! segment rewriter, audio stitcher, subtitle generator, chunker, and live
//! MPD generator.

use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::asset::{Addressing, Asset, ContentType, RepData};
use crate::chunk;
use crate::error::{LivesimError, Result};
use crate::metrics::{self, RequestKind};
use crate::mp4box;
use crate::mp4segment::{self, RewriteOptions};
use crate::mpd;
use crate::options::{self, Ato, ResponseConfig};
use crate::scte35::PeriodicScte35;
use crate::server::state::AppState;
use crate::subtitles::{self, SegmentId, SubtitleCodec};
use crate::timeline::{availability, resolve};

const MEDIA_EXTS: &[&str] = &["m4s", "mp4", "cmfv", "cmfa", "cmft", "m4v", "m4a", "jpg", "jpeg"];
const SUBTITLE_TRACK_ID: u32 = 1;

/// Entry point wired into the router as `GET /livesim2/{*rest}`.
pub async fn serve(
    State(state): State<AppState>,
    Path(rest): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    match serve_inner(&state, &rest, &params).await {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

async fn serve_inner(
    state: &AppState,
    rest: &str,
    params: &HashMap<String, String>,
) -> Result<Response> {
    let start = Instant::now();
    let now_ms = resolve_now_ms(params)?;
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    let (cfg, opt_end) = options::parse_path_options(&segments)?;
    let tail = &segments[opt_end..];
    let (asset_len, asset) = state
        .assets
        .resolve_prefix(tail)
        .ok_or_else(|| LivesimError::NotFound(format!("unknown asset in path {rest}")))?;
    let file_tail = &tail[asset_len..];

    match file_tail {
        [filename] => serve_mpd(state, asset, &cfg, now_ms, filename, &segments, opt_end, start).await,
        [rep_id, filename] => serve_rep(state, asset, &cfg, now_ms, rep_id, filename, start).await,
        [rep_id, filename, chunk_idx] => {
            serve_chunk_index(state, asset, &cfg, now_ms, rep_id, filename, chunk_idx, start).await
        }
        _ => Err(LivesimError::NotFound(format!("unrecognized path {rest}"))),
    }
}

/// `nowMS`/`nowDate` query parameters; absent either, wall-clock
/// time is used.
fn resolve_now_ms(params: &HashMap<String, String>) -> Result<i64> {
    if let Some(v) = params.get("nowMS") {
        return v
            .parse()
            .map_err(|_| LivesimError::BadRequest(format!("bad nowMS {v}")));
    }
    if let Some(v) = params.get("nowDate") {
        return chrono::DateTime::parse_from_rfc3339(v)
            .map(|dt| dt.timestamp_millis())
            .map_err(|_| LivesimError::BadRequest(format!("bad nowDate {v}")));
    }
    Ok(chrono::Utc::now().timestamp_millis())
}

fn parse_id<T: std::str::FromStr>(s: &str) -> Result<T> {
    s.parse()
        .map_err(|_| LivesimError::BadRequest(format!("bad segment identifier {s}")))
}

fn ast_s_from(cfg: &ResponseConfig, now_ms: i64) -> f64 {
    cfg.ast
        .unwrap_or_else(|| cfg.startrel.map(|s| now_ms as f64 / 1000.0 + s).unwrap_or(0.0))
}

fn ato_s(cfg: &ResponseConfig) -> f64 {
    match cfg.ato {
        Some(Ato::Finite(s)) => s,
        _ => 0.0,
    }
}

fn ts_to_ms(ts: u64, timescale: u32) -> u64 {
    (ts as f64 * 1000.0 / timescale as f64).round() as u64
}

fn content_type_for(ct: ContentType) -> &'static str {
    match ct {
        ContentType::Video => "video/mp4",
        ContentType::Audio => "audio/mp4",
        ContentType::Text | ContentType::Subtitle => "application/mp4",
        ContentType::Image => "image/jpeg",
    }
}

fn parse_subtitle_track(rep_id: &str) -> Option<(SubtitleCodec, &str)> {
    if let Some(lang) = rep_id.strip_prefix("timestpp-") {
        Some((SubtitleCodec::Stpp, lang))
    } else if let Some(lang) = rep_id.strip_prefix("timewvtt-") {
        Some((SubtitleCodec::Wvtt, lang))
    } else {
        None
    }
}

fn check_subtitle_lang_allowed(cfg: &ResponseConfig, codec: SubtitleCodec, lang: &str) -> Result<()> {
    let langs = match codec {
        SubtitleCodec::Stpp => &cfg.timesubsstpp,
        SubtitleCodec::Wvtt => &cfg.timesubswvtt,
    };
    if langs.iter().any(|l| l == lang) {
        Ok(())
    } else {
        Err(LivesimError::NotFound(format!(
            "subtitle language {lang} not configured"
        )))
    }
}

/// A configured `statuscode` trigger fires when the resolved segment number
/// falls on its cycle.
fn check_statuscode(cfg: &ResponseConfig, rep_id: &str, new_nr: i64) -> Result<()> {
    for trigger in &cfg.statuscode {
        if trigger.rep == rep_id && trigger.cycle > 0 {
            let rsq = new_nr.rem_euclid(trigger.cycle as i64) as u64;
            if rsq == trigger.rsq {
                return Err(LivesimError::TriggeredStatus(trigger.code));
            }
        }
    }
    Ok(())
}

/// Rewrite any `startrel`/`stoprel` option segment into its resolved
/// absolute `ast`/`stop` form, for the `<Location>` the MPD carries so
/// refreshing clients don't drift.
fn absolutize_location(
    base_url: &str,
    segments: &[&str],
    opt_end: usize,
    ast_s: f64,
    stop_s: Option<f64>,
) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(segments.len());
    for seg in &segments[..opt_end] {
        if seg.starts_with("startrel_") {
            parts.push(format!("ast_{ast_s}"));
        } else if seg.starts_with("stoprel_") {
            parts.push(format!("stop_{}", stop_s.unwrap_or(0.0)));
        } else {
            parts.push((*seg).to_string());
        }
    }
    parts.extend(segments[opt_end..].iter().map(|s| s.to_string()));
    format!("{}/livesim2/{}", base_url.trim_end_matches('/'), parts.join("/"))
}

async fn serve_mpd(
    state: &AppState,
    asset: &Asset,
    cfg: &ResponseConfig,
    now_ms: i64,
    filename: &str,
    segments: &[&str],
    opt_end: usize,
    start: Instant,
) -> Result<Response> {
    if !filename.ends_with(".mpd") {
        return Err(LivesimError::NotFound(format!("{filename} is not an MPD")));
    }
    let ast_s = ast_s_from(cfg, now_ms);
    let stop_s = cfg.stop.or_else(|| cfg.stoprel.map(|s| now_ms as f64 / 1000.0 + s));
    let location_url = if cfg.startrel.is_some() || cfg.stoprel.is_some() {
        Some(absolutize_location(
            &state.config.base_url,
            segments,
            opt_end,
            ast_s,
            stop_s,
        ))
    } else {
        None
    };

    let req = mpd::MpdRequest {
        asset,
        mpd_filename: filename,
        cfg,
        now_ms,
        location_url: location_url.as_deref(),
        base_url: &state.config.base_url,
    };
    let xml = mpd::build_live_mpd(&req)?;
    metrics::record_request(RequestKind::Mpd, 200);
    metrics::record_duration(RequestKind::Mpd, start.elapsed());
    info!(asset = %asset.path, mpd = %filename, "served live MPD");
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/dash+xml")],
        xml,
    )
        .into_response())
}

async fn serve_rep(
    state: &AppState,
    asset: &Asset,
    cfg: &ResponseConfig,
    now_ms: i64,
    rep_id: &str,
    filename: &str,
    start: Instant,
) -> Result<Response> {
    if filename == "init.mp4" {
        return serve_init(asset, cfg, rep_id, start).await;
    }
    let (id_str, ext) = filename
        .rsplit_once('.')
        .ok_or_else(|| LivesimError::BadRequest(format!("malformed segment filename {filename}")))?;
    serve_media(state, asset, cfg, now_ms, rep_id, id_str, ext, start).await
}

async fn serve_init(asset: &Asset, cfg: &ResponseConfig, rep_id: &str, start: Instant) -> Result<Response> {
    if let Some(rep) = asset.rep(rep_id) {
        let bytes = mp4box::strip_mehd(&rep.init_segment)?;
        metrics::record_request(RequestKind::Init, 200);
        metrics::record_duration(RequestKind::Init, start.elapsed());
        return Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type_for(rep.content_type))],
            bytes,
        )
            .into_response());
    }
    if let Some((codec, lang)) = parse_subtitle_track(rep_id) {
        check_subtitle_lang_allowed(cfg, codec, lang)?;
        let ref_rep = asset.reference();
        let bytes = subtitles::build_init_segment(
            SUBTITLE_TRACK_ID,
            ref_rep.media_timescale,
            lang,
            codec,
            ref_rep.default_sample_duration,
        );
        metrics::record_request(RequestKind::Init, 200);
        metrics::record_duration(RequestKind::Init, start.elapsed());
        return Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/mp4")], bytes).into_response());
    }
    Err(LivesimError::NotFound(format!("unknown representation {rep_id}")))
}

async fn serve_media(
    state: &AppState,
    asset: &Asset,
    cfg: &ResponseConfig,
    now_ms: i64,
    rep_id: &str,
    id_str: &str,
    ext: &str,
    start: Instant,
) -> Result<Response> {
    if !MEDIA_EXTS.contains(&ext) {
        return Err(LivesimError::BadRequest(format!("unrecognized extension {ext}")));
    }
    if let Some(rep) = asset.rep(rep_id) {
        return serve_real_media(state, asset, cfg, now_ms, rep, id_str, start).await;
    }
    if let Some((codec, lang)) = parse_subtitle_track(rep_id) {
        check_subtitle_lang_allowed(cfg, codec, lang)?;
        return serve_subtitle_media(asset, cfg, now_ms, codec, lang, id_str, start).await;
    }
    Err(LivesimError::NotFound(format!("unknown representation {rep_id}")))
}

/// Everything [`build_real_segment`] produces: enough to either return the
/// bytes directly or feed them into the chunker.
struct BuiltSegment {
    new_time: u64,
    new_dur: u64,
    new_nr: i64,
    timescale: u32,
    bytes: Vec<u8>,
    content_type: &'static str,
}

/// Resolve the requested identifier against `rep`, run the availability and
/// `statuscode` checks, and produce the segment bytes — via the audio
/// recipe engine for audio, a plain read for images, or the segment
/// rewriter otherwise.
fn build_real_segment(
    state: &AppState,
    asset: &Asset,
    cfg: &ResponseConfig,
    now_ms: i64,
    rep: &RepData,
    id_str: &str,
) -> Result<BuiltSegment> {
    let ast_s = ast_s_from(cfg, now_ms);
    let now_s = now_ms as f64 / 1000.0;
    let tsbd_s = cfg.tsbd.unwrap_or(60);

    match rep.content_type {
        ContentType::Audio => {
            let ref_rep = asset.reference();
            let recipe = if matches!(rep.addressing, Addressing::Number) {
                crate::audio::recipe_for_nr(ref_rep, rep, parse_id(id_str)?)?
            } else {
                crate::audio::recipe_for_time(ref_rep, rep, parse_id(id_str)?)?
            };
            let ref_meta = resolve::from_nr(ref_rep, recipe.seg_nr)?;
            check_statuscode(cfg, &rep.id, ref_meta.new_nr)?;
            availability::check(
                ref_meta.new_time,
                ref_meta.new_dur,
                ref_rep.media_timescale,
                ast_s,
                cfg.ato,
                now_s,
                tsbd_s,
                state.config.availability_margin_s,
            )?;
            let bytes = crate::audio::create_audio_seg(&state.assets, asset, rep, &recipe)?;
            Ok(BuiltSegment {
                new_time: recipe.start_time,
                new_dur: recipe.end_time - recipe.start_time,
                new_nr: recipe.seg_nr,
                timescale: rep.media_timescale,
                bytes,
                content_type: "audio/mp4",
            })
        }
        ContentType::Image => {
            let seg = resolve::from_nr(rep, parse_id(id_str)?)?;
            check_statuscode(cfg, &rep.id, seg.new_nr)?;
            availability::check(
                seg.new_time,
                seg.new_dur,
                rep.media_timescale,
                ast_s,
                cfg.ato,
                now_s,
                tsbd_s,
                state.config.availability_margin_s,
            )?;
            let path = state.assets.source_segment_path(asset, rep, &seg);
            let bytes = std::fs::read(&path)?;
            Ok(BuiltSegment {
                new_time: seg.new_time,
                new_dur: seg.new_dur,
                new_nr: seg.new_nr,
                timescale: rep.media_timescale,
                bytes,
                content_type: "image/jpeg",
            })
        }
        _ => {
            let seg = match rep.addressing {
                Addressing::Number => resolve::from_nr(rep, parse_id(id_str)?)?,
                Addressing::Time => resolve::from_time(rep, parse_id(id_str)?)?,
            };
            check_statuscode(cfg, &rep.id, seg.new_nr)?;
            availability::check(
                seg.new_time,
                seg.new_dur,
                rep.media_timescale,
                ast_s,
                cfg.ato,
                now_s,
                tsbd_s,
                state.config.availability_margin_s,
            )?;
            let source_path = state.assets.source_segment_path(asset, rep, &seg);
            let source_bytes = std::fs::read(&source_path)?;
            let provider = PeriodicScte35;
            let rewrite_opts = RewriteOptions {
                is_last: false,
                scte35_per_minute: cfg.scte35_per_minute,
                scte35_provider: Some(&provider),
            };
            let bytes = mp4segment::rewrite_segment(&source_bytes, rep, &seg, &rewrite_opts)?;
            Ok(BuiltSegment {
                new_time: seg.new_time,
                new_dur: seg.new_dur,
                new_nr: seg.new_nr,
                timescale: rep.media_timescale,
                bytes,
                content_type: content_type_for(rep.content_type),
            })
        }
    }
}

fn chunk_avail_base_ms(new_time: u64, timescale: u32, ast_s: f64, ato: Option<Ato>) -> i64 {
    let mut avail_s = ast_s + new_time as f64 / timescale as f64;
    if let Some(Ato::Finite(offset)) = ato {
        if offset > 0.0 {
            avail_s -= offset;
        }
    }
    (avail_s * 1000.0).round() as i64
}

async fn serve_real_media(
    state: &AppState,
    asset: &Asset,
    cfg: &ResponseConfig,
    now_ms: i64,
    rep: &RepData,
    id_str: &str,
    start: Instant,
) -> Result<Response> {
    let built = build_real_segment(state, asset, cfg, now_ms, rep, id_str)?;

    if cfg.chunk_dur_s.is_some() && rep.content_type != ContentType::Image {
        let ast_s = ast_s_from(cfg, now_ms);
        let segment_dur_ms = ts_to_ms(built.new_dur, built.timescale);
        let chunk_dur_ts = chunk::chunk_duration_ts(cfg.chunk_dur_s, segment_dur_ms, ato_s(cfg), built.timescale);
        let chunks = chunk::split_into_chunks(
            &built.bytes,
            1,
            built.new_nr as u32,
            built.new_time,
            rep.default_sample_duration,
            chunk_dur_ts,
        )?;
        let segment_avail_base_ms = chunk_avail_base_ms(built.new_time, built.timescale, ast_s, cfg.ato);
        metrics::record_request(RequestKind::Chunk, 200);
        info!(asset = %asset.path, rep = %rep.id, chunks = chunks.len(), "streaming chunked segment");
        return Ok(stream_chunked_response(
            chunks,
            segment_avail_base_ms,
            built.timescale,
            now_ms,
            built.content_type,
        ));
    }

    metrics::record_request(RequestKind::Segment, 200);
    metrics::record_duration(RequestKind::Segment, start.elapsed());
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, built.content_type)], built.bytes).into_response())
}

async fn serve_subtitle_media(
    asset: &Asset,
    cfg: &ResponseConfig,
    now_ms: i64,
    codec: SubtitleCodec,
    lang: &str,
    id_str: &str,
    start: Instant,
) -> Result<Response> {
    let ref_rep = asset.reference();
    let nr: i64 = parse_id(id_str)?;
    let ast_s = ast_s_from(cfg, now_ms);
    let bytes = subtitles::build_media_segment(
        ref_rep,
        SegmentId::Number(nr),
        ast_s,
        cfg.timesubsdur_ms,
        lang,
        codec,
        SUBTITLE_TRACK_ID,
    )?;
    metrics::record_request(RequestKind::Subtitle, 200);
    metrics::record_duration(RequestKind::Subtitle, start.elapsed());
    info!(asset = %asset.path, lang, "served generated subtitle segment");
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/mp4")], bytes).into_response())
}

async fn serve_chunk_index(
    state: &AppState,
    asset: &Asset,
    cfg: &ResponseConfig,
    now_ms: i64,
    rep_id: &str,
    filename: &str,
    chunk_idx_str: &str,
    start: Instant,
) -> Result<Response> {
    let chunk_idx: usize = parse_id(chunk_idx_str)?;
    let (id_str, ext) = filename
        .rsplit_once('.')
        .ok_or_else(|| LivesimError::BadRequest(format!("malformed segment filename {filename}")))?;
    if !MEDIA_EXTS.contains(&ext) {
        return Err(LivesimError::BadRequest(format!("unrecognized extension {ext}")));
    }
    let rep = asset
        .rep(rep_id)
        .ok_or_else(|| LivesimError::NotFound(format!("unknown representation {rep_id}")))?;
    if rep.content_type == ContentType::Image {
        return Err(LivesimError::BadRequest(
            "image representations have no sub-fragments".into(),
        ));
    }

    let built = build_real_segment(state, asset, cfg, now_ms, rep, id_str)?;
    let segment_dur_ms = ts_to_ms(built.new_dur, built.timescale);
    let chunk_dur_ts = chunk::chunk_duration_ts(cfg.chunk_dur_s, segment_dur_ms, ato_s(cfg), built.timescale);
    let chunks = chunk::split_into_chunks(
        &built.bytes,
        1,
        built.new_nr as u32,
        built.new_time,
        rep.default_sample_duration,
        chunk_dur_ts,
    )?;
    let chosen = chunks
        .get(chunk_idx)
        .ok_or_else(|| LivesimError::NotFound(format!("chunk index {chunk_idx} out of range")))?;

    metrics::record_request(RequestKind::Chunk, 200);
    metrics::record_duration(RequestKind::Chunk, start.elapsed());
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, built.content_type)],
        chosen.bytes.clone(),
    )
        .into_response())
}

/// Wraps the duplex pipe's read half so that dropping the response body
/// (client disconnect) cancels the writer task promptly.
struct CancelOnDrop<R> {
    inner: R,
    cancel: CancellationToken,
}

impl<R> Drop for CancelOnDrop<R> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CancelOnDrop<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

/// Stream a segment as chunks on a real-time release schedule.
fn stream_chunked_response(
    chunks: Vec<chunk::Chunk>,
    segment_avail_base_ms: i64,
    timescale: u32,
    request_now_ms: i64,
    content_type: &'static str,
) -> Response {
    let (mut writer, reader) = tokio::io::duplex(64 * 1024);
    let cancel = CancellationToken::new();
    let writer_cancel = cancel.clone();
    let started = tokio::time::Instant::now();
    tokio::spawn(async move {
        let _ = chunk::stream_chunks(
            &mut writer,
            &chunks,
            segment_avail_base_ms,
            timescale,
            request_now_ms,
            started,
            &writer_cancel,
        )
        .await;
    });
    let guarded = CancelOnDrop { inner: reader, cancel };
    let body = Body::from_stream(ReaderStream::new(guarded));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(body)
        .expect("static response parts are always valid")
}
