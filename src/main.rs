// picsort: thumbnails and batch renumbering for folders of images.
// Usage: picsort <command> [-d] ...

mod cli;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use flexi_logger::Logger;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");

#[derive(Parser, Debug)]
#[command(name = "picsort", version = VERSION, about = "Sort, renumber and preview folders of images")]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Theme {
    Light,
    Dark,
    System,
}

impl Theme {
    fn dark_mode(self) -> Option<bool> {
        match self {
            Theme::Light => Some(false),
            Theme::Dark => Some(true),
            Theme::System => None,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode thumbnails for images (folders expand to their images)
    Thumbs {
        paths: Vec<PathBuf>,
        /// Longest side in pixels
        #[arg(short, long, default_value_t = 120)]
        size: u32,
        #[arg(short, long, default_value_t = picsort::loader::DEFAULT_WORKERS)]
        workers: usize,
        /// Write each thumbnail as PNG into this folder
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Move a file into a folder as the next "<folder> (NNN)"
    Move { file: PathBuf, folder: PathBuf },
    /// Rename a folder and renumber its images to match
    RenameFolder { folder: PathBuf, new_name: String },
    /// Renumber files as "<base> (001..)" in the given order
    Reorder {
        base: String,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Print the next free index in a folder
    NextIndex {
        folder: PathBuf,
        /// Base name (defaults to the folder's name)
        #[arg(short, long)]
        base: Option<String>,
    },
    /// Rename a single file in place
    Rename { path: PathBuf, new_name: String },
    /// Create a sub-folder
    Mkdir { parent: PathBuf, name: String },
    /// Move a file or folder to the trash
    Delete { path: PathBuf },
    /// Show dimensions, size and modified time
    Info { path: PathBuf },
    /// List sub-folders and images (and remember the folder)
    Ls { dir: Option<PathBuf> },
    /// Show a file or folder in the system file manager
    Reveal { path: PathBuf },
    /// List recently opened folders
    Recent,
    /// Show or set the theme preference
    Theme { choice: Option<Theme> },
}

fn run(args: Cli) -> anyhow::Result<()> {
    match args.command {
        Commands::Thumbs {
            paths,
            size,
            workers,
            out,
        } => cli::thumbs(&paths, size, workers, out.as_deref()),
        Commands::Move { file, folder } => cli::move_into(&file, &folder),
        Commands::RenameFolder { folder, new_name } => cli::rename_folder(&folder, &new_name),
        Commands::Reorder { base, paths } => cli::reorder(&base, &paths),
        Commands::NextIndex { folder, base } => cli::next_index(&folder, base.as_deref()),
        Commands::Rename { path, new_name } => cli::rename_file(&path, &new_name),
        Commands::Mkdir { parent, name } => cli::mkdir(&parent, &name),
        Commands::Delete { path } => cli::delete(&path),
        Commands::Info { path } => cli::info(&path),
        Commands::Ls { dir } => cli::ls(&dir.unwrap_or_else(|| PathBuf::from("."))),
        Commands::Reveal { path } => cli::reveal(&path),
        Commands::Recent => cli::recent(),
        Commands::Theme { choice } => cli::theme(choice.map(Theme::dark_mode)),
    }
}

fn main() -> ExitCode {
    let args = Cli::parse();

    // ── Logging ─────────────────────────────────────────────────────────
    let level = if args.debug { "debug" } else { "info" };
    let _logger = match Logger::try_with_env_or_str(level).and_then(|l| l.log_to_stderr().start()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("picsort: logging disabled: {}", e);
            None
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("picsort: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
