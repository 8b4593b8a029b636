//! Chunker & low-latency delivery.
//!
//! Splits one synthesized media segment into `moof`+`mdat` sub-fragments
//! and releases them on a real-time schedule so a low-latency client can
//! start consuming a segment before it has fully "aired".

use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{LivesimError, Result};
use crate::mp4box::{self, FullSample};

/// One sub-fragment: its encoded bytes (first chunk carries `styp`, the
/// rest don't) plus the cumulative media-timescale duration through the end
/// of this chunk, used to derive its release time.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub index: usize,
    pub bytes: Vec<u8>,
    pub cumulative_dur_ts: u64,
}

/// Split a synthesized segment into chunks of (approximately) `chunk_dur_ts`
/// media-timescale duration each.
///
/// `styp` is the original segment's leading `styp` box, if any, reused
/// verbatim on the first chunk only.
pub fn split_into_chunks(
    segment: &[u8],
    track_id: u32,
    sequence_number: u32,
    base_media_decode_time: u64,
    default_sample_duration: u32,
    chunk_dur_ts: u64,
) -> Result<Vec<Chunk>> {
    if chunk_dur_ts == 0 {
        return Err(LivesimError::Internal("chunk duration must be > 0".into()));
    }
    let samples = mp4box::extract_full_samples(segment, default_sample_duration)?;
    if samples.is_empty() {
        return Err(LivesimError::Internal("segment has no samples to chunk".into()));
    }

    let mut chunks = Vec::new();
    let mut current: Vec<FullSample> = Vec::new();
    let mut current_decode_time = base_media_decode_time;
    let mut acc_in_chunk: u64 = 0;
    let mut cumulative: u64 = 0;
    let mut boundary = chunk_dur_ts;

    for sample in samples {
        let dur = sample.duration as u64;
        current.push(sample);
        acc_in_chunk += dur;
        cumulative += dur;

        if cumulative >= boundary {
            let is_first = chunks.is_empty();
            let bytes = mp4box::build_single_fragment_segment(
                track_id,
                sequence_number,
                current_decode_time,
                &current,
                is_first,
            );
            chunks.push(Chunk {
                index: chunks.len(),
                bytes,
                cumulative_dur_ts: cumulative,
            });
            current_decode_time += acc_in_chunk;
            current.clear();
            acc_in_chunk = 0;
            boundary += chunk_dur_ts;
        }
    }

    if !current.is_empty() {
        let is_first = chunks.is_empty();
        let bytes = mp4box::build_single_fragment_segment(
            track_id,
            sequence_number,
            current_decode_time,
            &current,
            is_first,
        );
        chunks.push(Chunk {
            index: chunks.len(),
            bytes,
            cumulative_dur_ts: cumulative,
        });
    }

    Ok(chunks)
}

/// Target chunk duration in the rep's media timescale: the explicit
/// `chunkDur`, or `(segmentDurMS - ato*1000)*ts/1000` derived from the
/// configured availability time offset.
pub fn chunk_duration_ts(
    explicit_chunk_dur_s: Option<f64>,
    segment_dur_ms: u64,
    ato_s: f64,
    timescale: u32,
) -> u64 {
    let dur_s = explicit_chunk_dur_s
        .unwrap_or_else(|| (segment_dur_ms as f64 / 1000.0 - ato_s).max(0.0));
    (dur_s * timescale as f64).round().max(0.0) as u64
}

/// Stream chunks to `writer` on a real-time release schedule.
/// `segment_avail_base_ms` is the wall-clock ms at
/// which the *segment itself* becomes available (`segMeta.newTime`,
/// projected through AST); each chunk additionally becomes available
/// `cumulative_dur_ts` media-timescale units later.
///
/// `request_now_ms` is the `nowMS` the request was served with;
/// `started_at` anchors the real-time clock used to compute
/// `nowUpdateMS = wallMS - startWallMS + nowMS`.
pub async fn stream_chunks<W>(
    writer: &mut W,
    chunks: &[Chunk],
    segment_avail_base_ms: i64,
    timescale: u32,
    request_now_ms: i64,
    started_at: Instant,
    cancel: &CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for chunk in chunks {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let chunk_avail_ms =
            segment_avail_base_ms + ts_to_ms(chunk.cumulative_dur_ts, timescale);
        let now_update_ms = started_at.elapsed().as_millis() as i64 + request_now_ms;
        let wait_ms = chunk_avail_ms - now_update_ms;
        if wait_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(wait_ms as u64)) => {}
                _ = cancel.cancelled() => return Ok(()),
            }
        }
        if cancel.is_cancelled() {
            return Ok(());
        }
        writer.write_all(&chunk.bytes).await?;
        writer.flush().await?;
    }
    Ok(())
}

fn ts_to_ms(ts: u64, timescale: u32) -> i64 {
    ((ts as f64) * 1000.0 / timescale as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4box::Mfhd;

    fn sample_segment(n_samples: u32, sample_dur: u32) -> Vec<u8> {
        let samples: Vec<FullSample> = (0..n_samples)
            .map(|i| FullSample {
                duration: sample_dur,
                data: vec![i as u8; 10],
            })
            .collect();
        mp4box::build_single_fragment_segment(1, 7, 0, &samples, true)
    }

    #[test]
    fn splits_into_expected_chunk_count() {
        // 8 samples of 1000 ts each, chunk duration 2000 ts -> 4 chunks.
        let seg = sample_segment(8, 1000);
        let chunks = split_into_chunks(&seg, 1, 7, 0, 1000, 2000).unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.last().unwrap().cumulative_dur_ts, 8000);
    }

    #[test]
    fn only_first_chunk_carries_styp() {
        let seg = sample_segment(4, 1000);
        let chunks = split_into_chunks(&seg, 1, 7, 0, 1000, 1000).unwrap();
        let first_boxes = mp4box::split_boxes(&chunks[0].bytes).unwrap();
        assert_eq!(&first_boxes[0].box_type, b"styp");
        let second_boxes = mp4box::split_boxes(&chunks[1].bytes).unwrap();
        assert_ne!(&second_boxes[0].box_type, b"styp");
    }

    #[test]
    fn every_chunk_keeps_parent_sequence_number() {
        let seg = sample_segment(4, 1000);
        let chunks = split_into_chunks(&seg, 1, 7, 0, 1000, 1000).unwrap();
        for c in &chunks {
            let boxes = mp4box::split_boxes(&c.bytes).unwrap();
            let moof = mp4box::find_box(&boxes, b"moof").unwrap();
            let children = mp4box::container_children(moof).unwrap();
            let mfhd = Mfhd::parse(mp4box::find_box(&children, b"mfhd").unwrap()).unwrap();
            assert_eq!(mfhd.sequence_number, 7);
        }
    }

    #[test]
    fn chunk_duration_ts_derives_from_ato() {
        let ts = chunk_duration_ts(None, 2000, 0.5, 90_000);
        // (2.0s - 0.5s) * 90000 = 135000
        assert_eq!(ts, 135_000);
    }

    #[tokio::test]
    async fn stream_chunks_writes_all_bytes_when_cancelled_late() {
        let seg = sample_segment(2, 1000);
        let chunks = split_into_chunks(&seg, 1, 7, 0, 1000, 1000).unwrap();
        let mut buf: Vec<u8> = Vec::new();
        let cancel = CancellationToken::new();
        let total_bytes: usize = chunks.iter().map(|c| c.bytes.len()).sum();
        stream_chunks(&mut buf, &chunks, 0, 90_000, 0, Instant::now(), &cancel)
            .await
            .unwrap();
        assert_eq!(buf.len(), total_bytes);
    }

    #[tokio::test]
    async fn stream_chunks_stops_immediately_when_precancelled() {
        let seg = sample_segment(2, 1000);
        let chunks = split_into_chunks(&seg, 1, 7, 0, 1000, 1000).unwrap();
        let mut buf: Vec<u8> = Vec::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        stream_chunks(&mut buf, &chunks, 0, 90_000, 0, Instant::now(), &cancel)
            .await
            .unwrap();
        assert!(buf.is_empty());
    }
}
