//! Demo command-line frontend for the `tarview` library.
//!
//! `tarctl` lists archive members, writes a single member to stdout, or
//! extracts an archive into a directory. It exercises both backings: the
//! default buffered reader and, with `--mmap`, the memory-mapped one.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use tarview::{safe_join, Archive, Entry, EntryType};

/// tarctl
#[derive(Debug, Parser)]
#[clap(name = "tarctl", version)]
struct App {
    /// Use a memory-mapped backing instead of buffered file I/O
    #[clap(long)]
    mmap: bool,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the members of an archive
    List {
        /// Archive file to read
        archive: PathBuf,
        /// Show mode, ownership and size like `tar -tv`
        #[clap(long, short)]
        verbose: bool,
    },
    /// Write one member's content to stdout
    Cat {
        /// Archive file to read
        archive: PathBuf,
        /// Member path as stored in the archive
        member: PathBuf,
    },
    /// Extract the archive into a directory
    Extract {
        /// Archive file to read
        archive: PathBuf,
        /// Destination directory
        #[clap(long, short = 'C', default_value = ".")]
        directory: PathBuf,
    },
}

fn open(path: &Path, mmap: bool) -> Result<Archive> {
    let archive = if mmap {
        Archive::open_mapped(path)
    } else {
        Archive::open(path)
    };
    archive.with_context(|| format!("opening {}", path.display()))
}

fn type_char(entry_type: EntryType) -> char {
    match entry_type {
        EntryType::Directory => 'd',
        EntryType::Symlink => 'l',
        EntryType::HardLink => 'h',
        EntryType::CharDevice => 'c',
        EntryType::BlockDevice => 'b',
        EntryType::Fifo => 'p',
        _ => '-',
    }
}

fn list(archive: &mut Archive, verbose: bool) -> Result<()> {
    for entry in archive.entries() {
        let entry = entry?;
        let meta = entry.metadata();
        if verbose {
            let mut line = format!(
                "{}{:04o} {}/{} {:>10} {}",
                type_char(meta.entry_type),
                meta.mode,
                meta.uid,
                meta.gid,
                meta.size,
                entry.path().display()
            );
            if let Some(target) = &meta.link_target {
                line.push_str(&format!(" -> {}", target.display()));
            }
            if meta.is_sparse() {
                line.push_str(" (sparse)");
            }
            println!("{line}");
        } else {
            println!("{}", entry.path().display());
        }
    }
    Ok(())
}

fn cat(archive: &mut Archive, member: &Path) -> Result<()> {
    while let Some(entry) = archive.next_entry()? {
        if entry.path() == member {
            let mut stdout = std::io::stdout().lock();
            entry.copy_data_to(&mut stdout)?;
            stdout.flush()?;
            return Ok(());
        }
    }
    bail!("member {:?} not found in archive", member);
}

fn extract(archive: &mut Archive, directory: &Path) -> Result<()> {
    let mut hardlinks: Vec<Entry> = Vec::new();

    while let Some(entry) = archive.next_entry()? {
        if entry.entry_type() == EntryType::HardLink {
            // Link targets name other members; create these after the
            // files they point at exist.
            hardlinks.push(entry);
            continue;
        }
        let dest = safe_join(directory, entry.path())?;
        entry
            .extract_to_path(&dest)
            .with_context(|| format!("extracting {}", entry.path().display()))?;
    }

    for entry in hardlinks {
        let dest = safe_join(directory, entry.path())?;
        let target = entry
            .metadata()
            .link_target
            .as_deref()
            .context("hard link without a target")?;
        let target = safe_join(directory, target)?;
        std::fs::hard_link(&target, &dest)
            .with_context(|| format!("linking {} -> {}", dest.display(), target.display()))?;
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let app = App::parse();

    match &app.cmd {
        Command::List { archive, verbose } => {
            let mut archive = open(archive, app.mmap)?;
            list(&mut archive, *verbose)
        }
        Command::Cat { archive, member } => {
            let mut archive = open(archive, app.mmap)?;
            cat(&mut archive, member)
        }
        Command::Extract { archive, directory } => {
            std::fs::create_dir_all(directory)?;
            let mut archive = open(archive, app.mmap)?;
            extract(&mut archive, directory)
        }
    }
}
