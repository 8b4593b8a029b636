//! The asset data model: `Asset`, `RepData`, `Segment`.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    Video,
    Audio,
    Text,
    Subtitle,
    Image,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Addressing {
    Number,
    Time,
}

/// One media segment in a representation's timeline, in that
/// representation's media timescale. `end_time > start_time` always holds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start_time: u64,
    pub end_time: u64,
    pub nr: u64,
    /// Present iff this segment's samples all share one duration.
    pub common_sample_dur: Option<u32>,
}

impl Segment {
    pub fn duration(&self) -> u64 {
        self.end_time - self.start_time
    }
}

/// Everything the live simulator needs about one representation.
///
/// `init_segment` holds the encoded init segment bytes so that a request for
/// `init.mp4` never touches disk after startup; `media_timescale`/
/// `default_sample_duration` come from parsing it (`mdhd`/`trex`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepData {
    pub id: String,
    pub content_type: ContentType,
    pub codecs: String,
    pub mpd_timescale: u32,
    pub media_timescale: u32,
    pub init_template: String,
    pub media_template: String,
    pub addressing: Addressing,
    #[serde(with = "regex_serde")]
    pub media_id_regex: Regex,
    pub init_segment: Vec<u8>,
    pub segments: Vec<Segment>,
    pub default_sample_duration: u32,
    /// `@startNumber` from the MPD's `SegmentTemplate`, used to recover the
    /// on-disk file name from a `$Number$`-addressed `Segment.nr` (which is
    /// stored 0-based relative to this offset). Always `0` for `$Time$`
    /// addressing, where the file name is the segment's `start_time`.
    pub start_number: u64,
    /// Present iff every segment has the same `common_sample_dur`. Required
    /// (non-`None`) for audio representations.
    pub constant_sample_duration: Option<u32>,
}

impl RepData {
    /// `refRep.duration()` — total media-timescale duration across all
    /// segments.
    pub fn duration(&self) -> u64 {
        self.segments
            .last()
            .map(|s| s.end_time)
            .unwrap_or(0)
            .saturating_sub(self.segments.first().map(|s| s.start_time).unwrap_or(0))
    }

    pub fn num_segments(&self) -> u64 {
        self.segments.len() as u64
    }

    /// Invariants: non-empty, monotone, contiguous.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.segments.is_empty() {
            return Err(format!("representation {} has no segments", self.id));
        }
        for w in self.segments.windows(2) {
            if w[0].end_time != w[1].start_time {
                return Err(format!(
                    "representation {} segments are not contiguous at nr={}",
                    self.id, w[0].nr
                ));
            }
            if w[1].start_time <= w[0].start_time {
                return Err(format!(
                    "representation {} segments are not strictly monotone at nr={}",
                    self.id, w[0].nr
                ));
            }
        }
        Ok(())
    }
}

/// Raw MPD metadata kept alongside the parsed `RepData`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MpdMeta {
    pub raw_xml: String,
    pub title: Option<String>,
    pub duration: Option<String>,
}

/// One statically-packaged DASH VoD asset, immutable after load.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Asset {
    /// Filesystem path relative to the VoD root, e.g. `"testpic_2s"`.
    pub path: String,
    pub mpds: HashMap<String, MpdMeta>,
    pub reps: HashMap<String, RepData>,
    pub reference_rep: String,
    pub segment_dur_ms: u64,
    pub loop_dur_ms: u64,
}

impl Asset {
    pub fn reference(&self) -> &RepData {
        self.reps
            .get(&self.reference_rep)
            .expect("reference_rep always names a present representation")
    }

    pub fn rep(&self, id: &str) -> Option<&RepData> {
        self.reps.get(id)
    }
}

/// (De)serialize `Regex` through its source pattern string, for the
/// sidecar-cache JSON representation.
mod regex_serde {
    use regex::Regex;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(re: &Regex, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(re.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Regex, D::Error> {
        let pattern = String::deserialize(d)?;
        Regex::new(&pattern).map_err(serde::de::Error::custom)
    }
}
