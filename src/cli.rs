//! CLI subcommand implementations.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::warn;

use picsort::config::ConfigStore;
use picsort::decode::CodecSource;
use picsort::fsops;
use picsort::info;
use picsort::loader::ThumbLoader;
use picsort::rename;
use picsort::thumbs::{Bitmap, ThumbCache};

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Record `dir` as recently used. Failure only costs the history entry.
fn remember(dir: &Path) {
    match ConfigStore::open_default() {
        Ok(mut store) => {
            if let Err(e) = store.add_recent_folder(&canonical(dir)) {
                warn!("could not update recent folders: {}", e);
            }
        }
        Err(e) => warn!("no config store: {}", e),
    }
}

// ── Thumbnails ──────────────────────────────────────────────────────────

/// Decode thumbnails for every image under `paths` (folders expand to
/// their images) and optionally write them as PNGs into `out`.
pub fn thumbs(paths: &[PathBuf], size: u32, workers: usize, out: Option<&Path>) -> Result<()> {
    let mut files = Vec::new();
    for p in paths {
        if p.is_dir() {
            files.extend(fsops::image_files(p));
        } else {
            files.push(p.clone());
        }
    }
    if files.is_empty() {
        println!("No images.");
        return Ok(());
    }
    if let Some(out) = out {
        std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    }

    let cache = Arc::new(ThumbCache::default());
    let mut loader = ThumbLoader::with_source(cache, Arc::new(CodecSource), workers)
        .context("starting thumbnail workers")?;

    let results: Rc<RefCell<Vec<(PathBuf, Option<Bitmap>)>>> = Rc::default();
    for file in &files {
        let results = results.clone();
        let path = file.clone();
        loader.submit_load(file, size, move |bmp| results.borrow_mut().push((path, bmp)));
    }

    while loader.pending() > 0 {
        loader.pump_wait(Duration::from_millis(200));
        let stats = &loader.stats;
        eprint!(
            "\r  {} ok, {} failed, {} active...",
            stats.decoded.load(Ordering::Relaxed),
            stats.failed.load(Ordering::Relaxed),
            stats.active.load(Ordering::Relaxed)
        );
    }
    eprintln!();

    let mut failed = 0usize;
    for (path, bmp) in results.borrow().iter() {
        let Some(bmp) = bmp else {
            println!("{}: could not render", path.display());
            failed += 1;
            continue;
        };
        println!("{}: {}x{}", path.display(), bmp.width(), bmp.height());
        if let Some(out) = out {
            let stem = path.file_stem().unwrap_or_default().to_string_lossy();
            let target = out.join(format!("{}_{}.png", stem, size));
            bmp.save(&target)
                .with_context(|| format!("writing {}", target.display()))?;
        }
    }
    println!("Done. {} ok, {} failed.", files.len() - failed, failed);
    let last = loader.stats.last_error();
    if !last.is_empty() {
        println!("last error: {}", last);
    }
    Ok(())
}

// ── Rename engine ───────────────────────────────────────────────────────

pub fn move_into(file: &Path, folder: &Path) -> Result<()> {
    let target = rename::move_into(file, folder)?;
    println!("Moved to {}", target.display());
    Ok(())
}

pub fn rename_folder(folder: &Path, new_name: &str) -> Result<()> {
    let count = fsops::image_files(folder).len();
    let target = rename::rename_folder_with_contents(folder, new_name)?;
    println!("Renamed to {} ({} images renumbered)", target.display(), count);
    Ok(())
}

pub fn reorder(base: &str, paths: &[PathBuf]) -> Result<()> {
    let outcome = rename::reorder(paths, base)?;
    println!("{}", outcome);
    Ok(())
}

pub fn next_index(folder: &Path, base: Option<&str>) -> Result<()> {
    let base = match base {
        Some(b) => b.to_string(),
        None => canonical(folder)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("folder has no name")?,
    };
    println!("{}", rename::next_available_index(folder, &base));
    Ok(())
}

// ── Single-file operations ──────────────────────────────────────────────

pub fn rename_file(path: &Path, new_name: &str) -> Result<()> {
    let target = fsops::rename_file(path, new_name)?;
    println!("Renamed to {}", target.display());
    Ok(())
}

pub fn mkdir(parent: &Path, name: &str) -> Result<()> {
    let made = fsops::create_folder(parent, name)?;
    println!("Created {}", made.display());
    Ok(())
}

pub fn delete(path: &Path) -> Result<()> {
    let outcome = fsops::delete_path(path)?;
    println!("{}: {}", path.display(), outcome);
    Ok(())
}

pub fn reveal(path: &Path) -> Result<()> {
    fsops::reveal(path)?;
    Ok(())
}

pub fn info(path: &Path) -> Result<()> {
    let i = info::image_info(path)?;
    println!("{}", path.display());
    if i.width > 0 {
        println!("  dimensions: {}x{}", i.width, i.height);
    }
    println!("  size:       {}", i.size_str);
    if !i.modified_str.is_empty() {
        println!("  modified:   {}", i.modified_str);
    }
    Ok(())
}

/// Folder view: sub-folders with their file counts, then images.
pub fn ls(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!("not a folder: {}", dir.display());
    }
    for sub in fsops::subdirectories(dir) {
        let name = sub.file_name().unwrap_or_default().to_string_lossy();
        println!("{}/  ({} files)", name, fsops::count_files(&sub));
    }
    for img in fsops::image_files(dir) {
        println!("{}", img.file_name().unwrap_or_default().to_string_lossy());
    }
    remember(dir);
    Ok(())
}

// ── Preferences ─────────────────────────────────────────────────────────

pub fn recent() -> Result<()> {
    let store = ConfigStore::open_default()?;
    let recent = store.recent_folders();
    if recent.is_empty() {
        println!("No recent folders.");
    }
    for dir in recent {
        println!("{}", dir.display());
    }
    Ok(())
}

/// Show the theme, or set it when `choice` is given.
pub fn theme(choice: Option<Option<bool>>) -> Result<()> {
    let mut store = ConfigStore::open_default()?;
    if let Some(dark) = choice {
        store.set_dark_mode(dark)?;
    }
    let label = match store.dark_mode() {
        Some(true) => "dark",
        Some(false) => "light",
        None => "system",
    };
    println!("theme: {}", label);
    Ok(())
}
