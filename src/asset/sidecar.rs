//! Gzipped JSON sidecar cache for parsed `RepData`, so a restart doesn't
//! have to re-walk and re-parse every segment of every asset on disk.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::asset::model::RepData;
use crate::error::{LivesimError, Result};

fn sidecar_path(rep_data_root: &Path, asset_rel_path: &str, rep_id: &str) -> PathBuf {
    rep_data_root
        .join(asset_rel_path)
        .join(format!("{rep_id}_data.json.gz"))
}

/// Load a cached `RepData`, if a sidecar exists for this representation.
pub fn load(rep_data_root: &Path, asset_rel_path: &str, rep_id: &str) -> Result<Option<RepData>> {
    let path = sidecar_path(rep_data_root, asset_rel_path, rep_id);
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(&path)?;
    let mut decoder = GzDecoder::new(file);
    let mut json = String::new();
    decoder
        .read_to_string(&mut json)
        .map_err(|e| LivesimError::Internal(format!("{}: {e}", path.display())))?;
    let rep_data: RepData = serde_json::from_str(&json)
        .map_err(|e| LivesimError::Internal(format!("{}: {e}", path.display())))?;
    Ok(Some(rep_data))
}

/// Write a sidecar for a freshly parsed representation.
pub fn store(rep_data_root: &Path, asset_rel_path: &str, rep_data: &RepData) -> Result<()> {
    let path = sidecar_path(rep_data_root, asset_rel_path, &rep_data.id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string(rep_data)
        .map_err(|e| LivesimError::Internal(format!("serializing {}: {e}", rep_data.id)))?;
    let file = File::create(&path)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder
        .write_all(json.as_bytes())
        .map_err(|e| LivesimError::Internal(format!("{}: {e}", path.display())))?;
    encoder
        .finish()
        .map_err(|e| LivesimError::Internal(format!("{}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::model::{Addressing, ContentType, Segment};
    use regex::Regex;
    use tempfile::tempdir;

    fn sample_rep() -> RepData {
        RepData {
            id: "V300".into(),
            content_type: ContentType::Video,
            codecs: "avc1.64001f".into(),
            mpd_timescale: 90_000,
            media_timescale: 90_000,
            init_template: "V300/init.mp4".into(),
            media_template: "V300/$Number$.m4s".into(),
            addressing: Addressing::Number,
            media_id_regex: Regex::new(r"V300/(\d+)\.m4s").unwrap(),
            init_segment: vec![1, 2, 3],
            segments: vec![Segment {
                start_time: 0,
                end_time: 180_000,
                nr: 0,
                common_sample_dur: Some(3003),
            }],
            default_sample_duration: 3003,
            start_number: 0,
            constant_sample_duration: Some(3003),
        }
    }

    #[test]
    fn roundtrips_through_gzip_json() {
        let dir = tempdir().unwrap();
        let rep = sample_rep();
        store(dir.path(), "testpic_2s", &rep).unwrap();
        let loaded = load(dir.path(), "testpic_2s", "V300").unwrap().unwrap();
        assert_eq!(loaded.id, rep.id);
        assert_eq!(loaded.segments.len(), rep.segments.len());
        assert_eq!(loaded.media_id_regex.as_str(), rep.media_id_regex.as_str());
    }

    #[test]
    fn missing_sidecar_returns_none() {
        let dir = tempdir().unwrap();
        assert!(load(dir.path(), "testpic_2s", "V300").unwrap().is_none());
    }
}
