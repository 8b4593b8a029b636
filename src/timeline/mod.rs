//! The timeline engine: wrap computation, `SegmentTimeline` generation
//! and projection, identifier resolution, and availability-window policy.

pub mod availability;
pub mod resolve;
pub mod segtimeline;
pub mod wraptimes;

pub use resolve::SegMeta;
pub use segtimeline::{
    calc_audio_time_from_ref, generate_reference_timeline, project_timeline_to_audio,
    GeneratedTimeline, LastSegInfo, TimelineEntry,
};
pub use wraptimes::WrapTimes;
