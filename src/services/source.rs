use crate::core::asset::AssetId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("Asset source unavailable: {0}")]
    Unavailable(String),

    #[error("Asset not found: {0}")]
    NotFound(String),
}

/// What the source knows about a photo before its size is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetListing {
    pub id: AssetId,
    pub filename: String,
    pub locator: String,
    pub creation_time: i64,
    pub width: u32,
    pub height: u32,
}

pub trait AssetSource: Send + Sync {
    /// Up to `limit` photos. Failing here means the whole scan cannot run.
    fn list_photo_assets(&self, limit: usize) -> Result<Vec<AssetListing>, SourceError>;

    /// Size in bytes of one photo. `NotFound` skips the photo;
    /// `Unavailable` aborts the scan.
    fn byte_size(&self, locator: &str) -> Result<u64, SourceError>;
}

/// Photos under a directory tree.
pub struct FsAssetSource {
    root: PathBuf,
    supported_formats: HashSet<String>,
}

impl FsAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let supported_formats = ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp"]
            .iter()
            .map(|ext| ext.to_string())
            .collect();

        Self {
            root: root.into(),
            supported_formats,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_supported_format(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| self.supported_formats.contains(&ext.to_string_lossy().to_lowercase()))
            .unwrap_or(false)
    }

    fn listing_for(&self, path: &Path) -> AssetListing {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let digest = blake3::hash(relative.to_string_lossy().as_bytes());
        let id = AssetId(format!("ast_{}", &digest.to_hex()[..16]));

        let (width, height) = match image::image_dimensions(path) {
            Ok(dimensions) => dimensions,
            Err(e) => {
                log::warn!("Could not read dimensions for {}: {}", path.display(), e);
                (0, 0)
            }
        };

        AssetListing {
            id,
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            locator: path.to_string_lossy().into_owned(),
            creation_time: creation_millis(path),
            width,
            height,
        }
    }
}

/// Creation time (or modification time) in epoch milliseconds, 0 when the
/// platform reports neither.
fn creation_millis(path: &Path) -> i64 {
    fs::metadata(path)
        .and_then(|m| m.created().or_else(|_| m.modified()))
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

impl AssetSource for FsAssetSource {
    fn list_photo_assets(&self, limit: usize) -> Result<Vec<AssetListing>, SourceError> {
        if !self.root.is_dir() {
            return Err(SourceError::Unavailable(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }

        let mut paths: Vec<PathBuf> = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && self.is_supported_format(e.path()))
            .map(|e| e.into_path())
            .collect();
        paths.sort();
        paths.truncate(limit);

        Ok(paths.iter().map(|p| self.listing_for(p)).collect())
    }

    fn byte_size(&self, locator: &str) -> Result<u64, SourceError> {
        match fs::metadata(locator) {
            Ok(metadata) => Ok(metadata.len()),
            Err(_) if !self.root.is_dir() => Err(SourceError::Unavailable(format!(
                "{} disappeared during the scan",
                self.root.display()
            ))),
            Err(e) => {
                log::debug!("Metadata read failed for {}: {}", locator, e);
                Err(SourceError::NotFound(locator.to_string()))
            }
        }
    }
}

/// Listings and sizes supplied by the caller, for hosts that already hold photo
/// metadata. A listing without a size reads as `NotFound`.
#[derive(Debug, Default, Clone)]
pub struct MemoryAssetSource {
    listings: Vec<AssetListing>,
    sizes: HashMap<String, u64>,
}

impl MemoryAssetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(mut self, listing: AssetListing, byte_size: Option<u64>) -> Self {
        if let Some(size) = byte_size {
            self.sizes.insert(listing.locator.clone(), size);
        }
        self.listings.push(listing);
        self
    }
}

impl AssetSource for MemoryAssetSource {
    fn list_photo_assets(&self, limit: usize) -> Result<Vec<AssetListing>, SourceError> {
        Ok(self.listings.iter().take(limit).cloned().collect())
    }

    fn byte_size(&self, locator: &str) -> Result<u64, SourceError> {
        self.sizes
            .get(locator)
            .copied()
            .ok_or_else(|| SourceError::NotFound(locator.to_string()))
    }
}
