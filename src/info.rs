//! Per-file details shown alongside a selected image.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Local};

use crate::fsops::FsOpError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Bytes on disk.
    pub size: u64,
    pub size_str: String,
    pub modified: Option<SystemTime>,
    /// `%Y-%m-%d %H:%M` in local time, empty when unknown.
    pub modified_str: String,
}

/// Dimensions come from the header only; a file the codec cannot read
/// reports 0x0 rather than failing.
pub fn image_info(path: &Path) -> Result<ImageInfo, FsOpError> {
    let meta = fs::metadata(path).map_err(|e| FsOpError::io("stat", path, e))?;
    let (width, height) = match image::image_dimensions(path) {
        Ok(dims) => dims,
        Err(e) => {
            log::debug!("no dimensions for {}: {}", path.display(), e);
            (0, 0)
        }
    };
    let modified = meta.modified().ok();
    Ok(ImageInfo {
        width,
        height,
        size: meta.len(),
        size_str: format_file_size(meta.len()),
        modified,
        modified_str: modified.map(format_time).unwrap_or_default(),
    })
}

fn format_time(t: SystemTime) -> String {
    DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M").to_string()
}

/// `512 B`, `1.5 KB`, `2.0 MB`, ... (1024-based).
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
