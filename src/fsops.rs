//! File-system primitives: listing, no-replace rename/move, single-file
//! operations (rename, create folder, trash) and file-manager reveal.
//!
//! Everything that renames goes through [`rename_noreplace`], so a collision
//! is always an error and never silently clobbers the destination.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use filetime::FileTime;
use log::{debug, warn};
use thiserror::Error;
use walkdir::WalkDir;

/// Extensions treated as images (lowercase, no dot).
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "webp", "tiff", "ico", "svg",
];

#[derive(Debug, Error)]
pub enum FsOpError {
    #[error("source file does not exist: {}", .0.display())]
    SourceMissing(PathBuf),
    #[error("destination folder does not exist: {}", .0.display())]
    DestinationMissing(PathBuf),
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("'{}' already exists", .0.display())]
    AlreadyExists(PathBuf),
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),
    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FsOpError {
    /// Classify an I/O error from operation `op` on `path`.
    pub fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => FsOpError::NotFound(path.to_path_buf()),
            io::ErrorKind::AlreadyExists => FsOpError::AlreadyExists(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => FsOpError::PermissionDenied(path.to_path_buf()),
            _ => FsOpError::Io {
                op,
                path: path.to_path_buf(),
                source,
            },
        }
    }

    /// Classify a failed `from → to` rename: collisions name the target,
    /// everything else names the source.
    pub fn rename(from: &Path, to: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::AlreadyExists {
            FsOpError::AlreadyExists(to.to_path_buf())
        } else {
            FsOpError::io("rename", from, source)
        }
    }
}

// ── Listing ─────────────────────────────────────────────────────────────

fn ext_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

pub fn is_image_file(path: &Path) -> bool {
    IMAGE_EXTENSIONS.contains(&ext_of(path).as_str())
}

/// Direct children of `dir`, sorted by file name. Unreadable entries are
/// skipped; a missing or unreadable dir yields nothing.
fn children(dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
}

/// Image files directly inside `dir`, sorted by name.
pub fn image_files(dir: &Path) -> Vec<PathBuf> {
    children(dir)
        .filter(|e| e.file_type().is_file() && is_image_file(e.path()))
        .map(|e| e.into_path())
        .collect()
}

/// Sub-folders of `dir`, sorted by name.
pub fn subdirectories(dir: &Path) -> Vec<PathBuf> {
    children(dir)
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect()
}

/// Number of regular files (any kind) directly inside `dir`.
pub fn count_files(dir: &Path) -> usize {
    children(dir).filter(|e| e.file_type().is_file()).count()
}

/// Check a user-supplied file or folder name. Returns it trimmed.
pub fn validate_name(name: &str) -> Result<&str, FsOpError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.contains('\0')
    {
        return Err(FsOpError::InvalidName(name.to_string()));
    }
    Ok(trimmed)
}

fn exists_no_follow(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

// ── Rename / move ───────────────────────────────────────────────────────

/// Rename `from` to `to`, failing with `AlreadyExists` instead of replacing.
///
/// Linux uses `renameat2(RENAME_NOREPLACE)`, which is atomic. Where that is
/// unavailable we fall back to check-then-rename, which has a small window
/// against concurrent external writers.
pub fn rename_noreplace(from: &Path, to: &Path) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use nix::errno::Errno;
        use nix::fcntl::{renameat2, RenameFlags};
        use std::os::fd::BorrowedFd;

        // Safety: AT_FDCWD is a constant valid fd for CWD
        let cwd = unsafe { BorrowedFd::borrow_raw(libc::AT_FDCWD) };
        match renameat2(cwd, from, cwd, to, RenameFlags::RENAME_NOREPLACE) {
            Ok(()) => return Ok(()),
            Err(Errno::EINVAL) | Err(Errno::ENOSYS) | Err(Errno::EOPNOTSUPP) => {
                debug!("renameat2 unsupported for {}, falling back", from.display());
            }
            Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
        }
    }

    if exists_no_follow(to) {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", to.display()),
        ));
    }
    fs::rename(from, to)
}

fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::EXDEV)
    }
    #[cfg(not(unix))]
    {
        // ERROR_NOT_SAME_DEVICE
        err.raw_os_error() == Some(17)
    }
}

/// Move a file or folder without replacing anything. Files crossing a
/// device boundary are copied then removed; on failure the partial copy is
/// deleted and the source left where it was.
pub fn move_path(from: &Path, to: &Path) -> io::Result<()> {
    match rename_noreplace(from, to) {
        Err(e) if is_cross_device(&e) && from.is_file() => {
            debug!("cross-device move, copying {}", from.display());
            copy_then_remove(from, to)
        }
        other => other,
    }
}

fn copy_then_remove(from: &Path, to: &Path) -> io::Result<()> {
    let mut reader = fs::File::open(from)?;
    let metadata = reader.metadata()?;
    let mut writer = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(to)?;

    let copied = io::copy(&mut reader, &mut writer).and_then(|_| writer.sync_all());
    drop(writer);
    if let Err(e) = copied {
        let _ = fs::remove_file(to);
        return Err(e);
    }

    if let Err(e) = fs::set_permissions(to, metadata.permissions()) {
        warn!("failed to restore permissions on {}: {}", to.display(), e);
    }
    let mtime = FileTime::from_last_modification_time(&metadata);
    if let Err(e) = filetime::set_file_mtime(to, mtime) {
        warn!("failed to restore mtime on {}: {}", to.display(), e);
    }

    drop(reader);
    if let Err(e) = fs::remove_file(from) {
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

// ── Single-file operations ──────────────────────────────────────────────

/// Rename a file in place. Returns the new path.
pub fn rename_file(path: &Path, new_name: &str) -> Result<PathBuf, FsOpError> {
    let new_name = validate_name(new_name)?;
    if !exists_no_follow(path) {
        return Err(FsOpError::NotFound(path.to_path_buf()));
    }
    let target = path.with_file_name(new_name);
    if target == path {
        return Ok(target);
    }
    if exists_no_follow(&target) {
        return Err(FsOpError::AlreadyExists(target));
    }
    rename_noreplace(path, &target).map_err(|e| FsOpError::rename(path, &target, e))?;
    debug!("renamed {} -> {}", path.display(), target.display());
    Ok(target)
}

/// Create `parent/name`. Returns the new folder path.
pub fn create_folder(parent: &Path, name: &str) -> Result<PathBuf, FsOpError> {
    let name = validate_name(name)?;
    let target = parent.join(name);
    if exists_no_follow(&target) {
        return Err(FsOpError::AlreadyExists(target));
    }
    fs::create_dir_all(&target).map_err(|e| FsOpError::io("create folder", &target, e))?;
    Ok(target)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Moved to the system trash.
    Trashed,
    /// Trash unavailable, removed permanently.
    Deleted,
}

impl std::fmt::Display for DeleteOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeleteOutcome::Trashed => f.write_str("moved to trash"),
            DeleteOutcome::Deleted => f.write_str("deleted permanently"),
        }
    }
}

/// Send a file or folder to the trash, deleting it outright if the
/// platform has no usable trash.
pub fn delete_path(path: &Path) -> Result<DeleteOutcome, FsOpError> {
    if !exists_no_follow(path) {
        return Err(FsOpError::NotFound(path.to_path_buf()));
    }
    match trash::delete(path) {
        Ok(()) => Ok(DeleteOutcome::Trashed),
        Err(e) => {
            warn!("trash unavailable ({}), deleting {} permanently", e, path.display());
            let removed = if path.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };
            removed.map_err(|e| FsOpError::io("delete", path, e))?;
            Ok(DeleteOutcome::Deleted)
        }
    }
}

/// Open the OS file manager at `path` (selecting it where supported).
pub fn reveal(path: &Path) -> Result<(), FsOpError> {
    if !exists_no_follow(path) {
        return Err(FsOpError::NotFound(path.to_path_buf()));
    }
    let mut cmd = reveal_command(path);
    let status = cmd.status().map_err(|e| FsOpError::io("reveal", path, e))?;
    if !status.success() {
        return Err(FsOpError::Io {
            op: "reveal",
            path: path.to_path_buf(),
            source: io::Error::other(format!("file manager exited with {}", status)),
        });
    }
    Ok(())
}

fn reveal_command(path: &Path) -> Command {
    if cfg!(target_os = "macos") {
        let mut cmd = Command::new("open");
        if path.is_file() {
            cmd.arg("-R");
        }
        cmd.arg(path);
        cmd
    } else if cfg!(windows) {
        let mut cmd = Command::new("explorer");
        if path.is_file() {
            cmd.arg("/select,");
        }
        cmd.arg(path);
        cmd
    } else {
        let target = if path.is_file() {
            path.parent().unwrap_or(path)
        } else {
            path
        };
        let mut cmd = Command::new("xdg-open");
        cmd.arg(target);
        cmd
    }
}
