//! Segment-identifier resolution: map a requested `nr` or `time` to the
//! concrete VoD source segment and the live-projected `segMeta`.

use crate::asset::RepData;
use crate::error::{LivesimError, Result};

/// `{rep*, origTime, origNr, origDur, newTime, newNr, newDur, timescale}`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegMeta {
    pub rep_id: String,
    pub orig_time: u64,
    pub orig_nr: u64,
    pub orig_dur: u64,
    pub new_time: u64,
    pub new_nr: i64,
    pub new_dur: u64,
    pub timescale: u32,
}

/// `nr -> segMeta` for `$Number$`-addressed (or timeline-with-`$Number$`)
/// representations.
pub fn from_nr(rep: &RepData, nr: i64) -> Result<SegMeta> {
    if rep.segments.is_empty() {
        return Err(LivesimError::Internal(format!(
            "representation {} has no segments",
            rep.id
        )));
    }
    let nr_segs = rep.segments.len() as i64;
    let nr_wraps = nr.div_euclid(nr_segs);
    let rel_nr = nr.rem_euclid(nr_segs) as usize;
    let seg = &rep.segments[rel_nr];
    let wrap_dur = rep.duration();

    let new_time = (nr_wraps as i64 * wrap_dur as i64) as u64 + seg.start_time;
    Ok(SegMeta {
        rep_id: rep.id.clone(),
        orig_time: seg.start_time,
        orig_nr: seg.nr,
        orig_dur: seg.duration(),
        new_time,
        new_nr: nr,
        new_dur: seg.duration(),
        timescale: rep.media_timescale,
    })
}

/// `time -> segMeta` for `$Time$`-addressed representations. The requested
/// `time` must land exactly on a VoD segment boundary after removing whole
/// wraps; any other value is a hard error.
pub fn from_time(rep: &RepData, time_ts: u64) -> Result<SegMeta> {
    if rep.segments.is_empty() {
        return Err(LivesimError::Internal(format!(
            "representation {} has no segments",
            rep.id
        )));
    }
    let wrap_dur = rep.duration();
    let nr_wraps = time_ts / wrap_dur;
    let time_after_wrap = time_ts % wrap_dur;

    let (rel_idx, seg) = rep
        .segments
        .iter()
        .enumerate()
        .find(|(_, s)| s.start_time == time_after_wrap)
        .ok_or_else(|| {
            LivesimError::BadRequest(format!(
                "time {time_ts} does not align with a segment boundary in representation {}",
                rep.id
            ))
        })?;

    let nr_segs = rep.segments.len() as u64;
    let new_nr = (nr_wraps * nr_segs) as i64 + rel_idx as i64;
    Ok(SegMeta {
        rep_id: rep.id.clone(),
        orig_time: seg.start_time,
        orig_nr: seg.nr,
        orig_dur: seg.duration(),
        new_time: time_ts,
        new_nr,
        new_dur: seg.duration(),
        timescale: rep.media_timescale,
    })
}
