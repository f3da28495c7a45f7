//! picsort: organize folders of images.
//!
//! Two cores sit under the `picsort` binary:
//! - `thumbs` / `loader` / `decode`: LRU thumbnail cache fed by a small pool
//!   of decode threads, results pumped back on the caller's thread.
//! - `rename` / `fsops`: `<name> (NNN).<ext>` batch renumbering with a
//!   two-phase rename and rollback, plus single-file operations.
//!
//! `info` and `config` are the small collaborators around them.

pub mod config;
pub mod decode;
pub mod fsops;
pub mod info;
pub mod loader;
pub mod rename;
pub mod thumbs;
