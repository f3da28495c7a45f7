//! Batch renumbering: `<name> (NNN).<ext>` over a whole folder or an
//! explicit ordering of files.
//!
//! Every batch runs in two phases (originals → `__temp_rename_NNNNN.ext`,
//! then temporaries → final names) so a final name may equal some other
//! file's current name. Each applied step is journaled; on the first failure
//! the journal is replayed in reverse and the caller sees the file system as
//! it was before the call.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use regex::Regex;
use thiserror::Error;

use crate::fsops::{self, FsOpError};

/// Prefix of the intermediate names used in phase 1.
pub const TEMP_PREFIX: &str = "__temp_rename_";

/// `"{base} ({index:03}){ext}"`; `ext` includes its dot or is empty.
pub fn numbered_name(base: &str, index: u32, ext: &str) -> String {
    format!("{} ({:03}){}", base, index, ext)
}

fn extension_with_dot(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

fn temp_name(index: usize, ext: &str) -> String {
    format!("{}{:05}{}", TEMP_PREFIX, index, ext)
}

/// One past the highest `NNN` among entries of `folder` named
/// `<base> (NNN).<ext>`. Gaps are not reused; missing folder → 1.
pub fn next_available_index(folder: &Path, base: &str) -> u32 {
    let pattern = format!(r"^{} \(([0-9]{{3,}})\)\.[^.]+$", regex::escape(base));
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            warn!("bad index pattern for {:?}: {}", base, e);
            return 1;
        }
    };
    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(_) => return 1,
    };

    let max = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name();
            let name = name.to_str()?;
            re.captures(name)?.get(1)?.as_str().parse::<u32>().ok()
        })
        .max()
        .unwrap_or(0);
    max.saturating_add(1)
}

/// Move `file` into `folder` as the next `<folder-name> (NNN).<ext>`,
/// leaving existing numbering alone. Returns the new path.
pub fn move_into(file: &Path, folder: &Path) -> Result<PathBuf, FsOpError> {
    if fs::symlink_metadata(file).is_err() {
        return Err(FsOpError::SourceMissing(file.to_path_buf()));
    }
    if !folder.is_dir() {
        return Err(FsOpError::DestinationMissing(folder.to_path_buf()));
    }
    let base = folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| FsOpError::InvalidName(folder.display().to_string()))?;

    let index = next_available_index(folder, &base);
    let target = folder.join(numbered_name(&base, index, &extension_with_dot(file)));
    fsops::move_path(file, &target).map_err(|e| FsOpError::rename(file, &target, e))?;
    info!("moved {} -> {}", file.display(), target.display());
    Ok(target)
}

// ── Journal ─────────────────────────────────────────────────────────────

/// A rename that has been applied and can be undone by swapping the paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenameStep {
    pub from: PathBuf,
    pub to: PathBuf,
}

impl fmt::Display for RenameStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from.display(), self.to.display())
    }
}

/// A step the rollback could not undo.
#[derive(Debug)]
pub struct RollbackFailure {
    pub step: RenameStep,
    pub error: io::Error,
}

impl fmt::Display for RollbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not undo {}: {}", self.step, self.error)
    }
}

/// Applied renames, in order.
#[derive(Debug, Default)]
pub struct RenameJournal {
    applied: Vec<RenameStep>,
}

impl RenameJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// No-replace rename; recorded only if it succeeded.
    pub fn apply(&mut self, from: &Path, to: &Path) -> Result<(), FsOpError> {
        fsops::rename_noreplace(from, to).map_err(|e| FsOpError::rename(from, to, e))?;
        debug!("rename {} -> {}", from.display(), to.display());
        self.applied.push(RenameStep {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    /// Undo every step, newest first. Keeps going past failures and
    /// returns the ones it could not undo.
    pub fn rollback(self) -> Vec<RollbackFailure> {
        let mut failures = Vec::new();
        for step in self.applied.into_iter().rev() {
            if let Err(e) = fsops::rename_noreplace(&step.to, &step.from) {
                error!("rollback: could not undo {}: {}", step, e);
                failures.push(RollbackFailure { step, error: e });
            }
        }
        failures
    }
}

// ── Batch errors ────────────────────────────────────────────────────────

/// Failure of a batch operation: the error that stopped it plus anything
/// the rollback could not restore.
#[derive(Debug, Error)]
#[error("{cause}{}", rollback_note(.rollback))]
pub struct BatchError {
    pub cause: FsOpError,
    pub rollback: Vec<RollbackFailure>,
}

fn rollback_note(failures: &[RollbackFailure]) -> String {
    if failures.is_empty() {
        String::new()
    } else {
        format!(" ({} rename(s) could not be undone)", failures.len())
    }
}

impl BatchError {
    /// True when the file system was fully restored.
    pub fn rolled_back_cleanly(&self) -> bool {
        self.rollback.is_empty()
    }
}

impl From<FsOpError> for BatchError {
    fn from(cause: FsOpError) -> Self {
        BatchError {
            cause,
            rollback: Vec::new(),
        }
    }
}

/// Next temporary name beside `src` that nothing on disk occupies.
/// `counter` only moves forward, so names are never reused within a batch.
fn free_temp_path(src: &Path, counter: &mut usize) -> PathBuf {
    let ext = extension_with_dot(src);
    loop {
        let candidate = src.with_file_name(temp_name(*counter, &ext));
        *counter += 1;
        if fs::symlink_metadata(&candidate).is_err() {
            return candidate;
        }
        debug!("temp name taken, skipping {}", candidate.display());
    }
}

/// Run both phases for `(source, final)` pairs. Each temporary lives next
/// to its source.
fn two_phase(journal: &mut RenameJournal, moves: &[(PathBuf, PathBuf)]) -> Result<(), FsOpError> {
    let mut counter = 0;
    let mut temps = Vec::with_capacity(moves.len());
    for (src, _) in moves {
        let temp = free_temp_path(src, &mut counter);
        journal.apply(src, &temp)?;
        temps.push(temp);
    }
    for (temp, (_, dst)) in temps.iter().zip(moves) {
        journal.apply(temp, dst)?;
    }
    Ok(())
}

fn abort(journal: RenameJournal, cause: FsOpError) -> BatchError {
    warn!("batch rename failed ({}), rolling back {} step(s)", cause, journal.len());
    let rollback = journal.rollback();
    if !rollback.is_empty() {
        error!("rollback incomplete: {} step(s) could not be undone", rollback.len());
    }
    BatchError { cause, rollback }
}

// ── Folder rename ───────────────────────────────────────────────────────

/// Renumber every image in `folder` as `<new_name> (001..).<ext>` in name
/// order, then rename the folder itself to `new_name`. Returns the new
/// folder path. All-or-nothing.
pub fn rename_folder_with_contents(folder: &Path, new_name: &str) -> Result<PathBuf, BatchError> {
    renumber_and_rename(folder, new_name, || {})
}

/// `before_folder_rename` runs after the files are renumbered and right
/// before the folder itself is renamed.
fn renumber_and_rename(
    folder: &Path,
    new_name: &str,
    before_folder_rename: impl FnOnce(),
) -> Result<PathBuf, BatchError> {
    let new_name = fsops::validate_name(new_name)?;
    if !folder.is_dir() {
        return Err(FsOpError::NotFound(folder.to_path_buf()).into());
    }
    if folder.file_name().and_then(|n| n.to_str()) == Some(new_name) {
        debug!("{} already named {:?}", folder.display(), new_name);
        return Ok(folder.to_path_buf());
    }
    let target = folder.with_file_name(new_name);
    if fs::symlink_metadata(&target).is_ok() {
        return Err(FsOpError::AlreadyExists(target).into());
    }

    let moves: Vec<(PathBuf, PathBuf)> = fsops::image_files(folder)
        .into_iter()
        .enumerate()
        .map(|(i, src)| {
            let dst = folder.join(numbered_name(new_name, i as u32 + 1, &extension_with_dot(&src)));
            (src, dst)
        })
        .collect();

    let mut journal = RenameJournal::new();
    let result = two_phase(&mut journal, &moves).and_then(|()| {
        before_folder_rename();
        journal.apply(folder, &target)
    });
    if let Err(cause) = result {
        return Err(abort(journal, cause));
    }

    info!(
        "renamed folder {} -> {} ({} files)",
        folder.display(),
        target.display(),
        moves.len()
    );
    Ok(target)
}

// ── Reorder ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReorderOutcome {
    pub renamed: usize,
    /// Missing or repeated paths that were ignored.
    pub skipped: usize,
}

impl fmt::Display for ReorderOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.renamed == 0 {
            f.write_str("no files to rename")?;
        } else {
            write!(f, "renamed {} files", self.renamed)?;
        }
        if self.skipped > 0 {
            write!(f, " ({} skipped)", self.skipped)?;
        }
        Ok(())
    }
}

/// Rename `paths` to `<base> (001..).<ext>` following the given order. Each
/// file stays in its own directory. Paths that no longer exist are skipped
/// and do not consume an index.
pub fn reorder(paths: &[PathBuf], base: &str) -> Result<ReorderOutcome, BatchError> {
    let base = fsops::validate_name(base)?;

    // Repeats are detected on the resolved path, so `dir/./a.jpg` and
    // `dir/a.jpg` count as one file.
    let mut seen = HashSet::new();
    let mut live: Vec<&PathBuf> = Vec::with_capacity(paths.len());
    for p in paths {
        if !p.is_file() {
            continue;
        }
        match fs::canonicalize(p) {
            Ok(resolved) if seen.insert(resolved.clone()) => live.push(p),
            Ok(_) => {}
            Err(e) => debug!("reorder: cannot resolve {}: {}", p.display(), e),
        }
    }
    let skipped = paths.len() - live.len();
    if skipped > 0 {
        debug!("reorder: skipping {} missing or repeated path(s)", skipped);
    }
    if live.is_empty() {
        return Ok(ReorderOutcome { renamed: 0, skipped });
    }

    let moves: Vec<(PathBuf, PathBuf)> = live
        .into_iter()
        .enumerate()
        .map(|(i, src)| {
            let dst = src.with_file_name(numbered_name(base, i as u32 + 1, &extension_with_dot(src)));
            (src.clone(), dst)
        })
        .collect();

    let mut journal = RenameJournal::new();
    if let Err(cause) = two_phase(&mut journal, &moves) {
        return Err(abort(journal, cause));
    }

    let outcome = ReorderOutcome {
        renamed: moves.len(),
        skipped,
    };
    info!("reorder {:?}: {}", base, outcome);
    Ok(outcome)
}
