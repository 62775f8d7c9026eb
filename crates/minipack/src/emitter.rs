//! Writing the generated program to its destination.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{debug, info};
use tempfile::NamedTempFile;

/// Where the bundle goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    File(PathBuf),
    Stdout,
}

/// Persist `text` at `destination`
///
/// A file destination is replaced atomically: the text is written to a
/// temporary file in the same directory and persisted over it, so readers
/// never observe a partial bundle. The temporary file is removed if anything
/// fails.
pub fn emit(text: &str, destination: &Destination) -> Result<()> {
    match destination {
        Destination::File(path) => write_atomically(path, text),
        Destination::Stdout => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(text.as_bytes())
                .and_then(|()| stdout.flush())
                .context("Failed to write bundle to stdout")
        }
    }
}

fn write_atomically(path: &Path, text: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create output directory {}", parent.display()))?;

    let mut staging = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create staging file in {}", parent.display()))?;
    debug!("Writing bundle to staging file {}", staging.path().display());
    staging
        .write_all(text.as_bytes())
        .and_then(|()| staging.flush())
        .with_context(|| format!("Failed to write {}", staging.path().display()))?;
    staging
        .persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to move bundle to {}", path.display()))?;

    info!("Wrote {} bytes to {}", text.len(), path.display());
    Ok(())
}
