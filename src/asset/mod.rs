pub mod consolidate;
pub mod loader;
pub mod model;
pub mod sidecar;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use model::{Addressing, Asset, ContentType, MpdMeta, RepData, Segment};

use crate::error::{LivesimError, Result};
use crate::timeline::SegMeta;

/// The process-wide, read-only asset index.
/// Built once at startup; every accessor takes it by shared reference.
#[derive(Clone)]
pub struct AssetIndex {
    vod_root: Arc<PathBuf>,
    assets: Arc<HashMap<String, Asset>>,
}

impl AssetIndex {
    pub fn discover(vod_root: &Path, rep_data_root: Option<&Path>) -> Result<Self> {
        let assets = loader::discover_assets(vod_root, rep_data_root)?;
        if assets.is_empty() {
            tracing::warn!(root = %vod_root.display(), "no assets discovered under VoD root");
        }
        Ok(AssetIndex {
            vod_root: Arc::new(vod_root.to_path_buf()),
            assets: Arc::new(assets),
        })
    }

    pub fn get(&self, asset_path: &str) -> Result<&Asset> {
        self.assets
            .get(asset_path)
            .ok_or_else(|| LivesimError::NotFound(format!("unknown asset {asset_path}")))
    }

    /// Resolve the `<assetPath>` prefix of a request's path segments against
    /// the index, trying the longest candidate first (any directory
    /// containing an `*.mpd` file is an asset, and assetPath may itself span
    /// more than one path segment). Always leaves at least one
    /// segment unconsumed for `<file>`. Returns the number of segments
    /// consumed and the matched asset.
    pub fn resolve_prefix<'a>(&'a self, segments: &[&str]) -> Option<(usize, &'a Asset)> {
        if segments.len() < 2 {
            return None;
        }
        for len in (1..segments.len()).rev() {
            let candidate = segments[..len].join("/");
            if let Some(asset) = self.assets.get(&candidate) {
                return Some((len, asset));
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn vod_root(&self) -> &Path {
        &self.vod_root
    }

    /// Filesystem path of a representation's init segment, as packaged
    /// (already loaded into memory at startup; exposed for completeness and
    /// for the sidecar-miss / cold re-read path).
    pub fn init_segment_path(&self, asset: &Asset, rep: &RepData) -> PathBuf {
        self.vod_root.join(&asset.path).join(&rep.init_template)
    }

    /// Filesystem path of the original VoD segment backing a resolved
    /// `segMeta`, reconstructed from `rep.media_template` and the addressing
    /// kind (the rewriter and audio stitcher both need to re-read the
    /// original bytes for every request since only metadata is cached in
    /// memory).
    pub fn source_segment_path(&self, asset: &Asset, rep: &RepData, seg: &SegMeta) -> PathBuf {
        let value = match rep.addressing {
            Addressing::Number => rep.start_number + seg.orig_nr,
            Addressing::Time => seg.orig_time,
        };
        let name = rep
            .media_template
            .replace("$Number$", &value.to_string())
            .replace("$Time$", &value.to_string());
        self.vod_root.join(&asset.path).join(name)
    }

    /// Same as [`Self::source_segment_path`] but addressed by a `Segment`
    /// directly (the audio stitcher walks `rep.segments` by index rather
    /// than through a resolved `segMeta`).
    pub fn segment_path_for(&self, asset: &Asset, rep: &RepData, seg: &Segment) -> PathBuf {
        let value = match rep.addressing {
            Addressing::Number => rep.start_number + seg.nr,
            Addressing::Time => seg.start_time,
        };
        let name = rep
            .media_template
            .replace("$Number$", &value.to_string())
            .replace("$Time$", &value.to_string());
        self.vod_root.join(&asset.path).join(name)
    }
}
