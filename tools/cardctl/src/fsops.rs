use anyhow::{anyhow, bail, Result};
use embassy_futures::block_on;
use sdfat::fat::{self, DirCursor, EntryFilter, FatError, Volume};

use crate::image::ImageDisk;

pub fn mount(disk: &mut ImageDisk) -> Result<Volume> {
    block_on(Volume::mount(disk)).map_err(fat_err)
}

/// Walk the slash-separated directory path from the root.
pub fn resolve_dir(disk: &mut ImageDisk, vol: &Volume, path: &str) -> Result<DirCursor> {
    let mut cursor = DirCursor::root(vol);
    for component in path.split('/').filter(|c| !c.is_empty()) {
        block_on(fat::change_dir(disk, vol, &mut cursor, component)).map_err(|err| {
            match err {
                FatError::EndOfDirectory => anyhow!("directory not found: {}", component),
                other => fat_err(other),
            }
        })?;
    }
    Ok(cursor)
}

/// Split a file path into its parent directory cursor and file name.
pub fn resolve_parent<'p>(
    disk: &mut ImageDisk,
    vol: &Volume,
    path: &'p str,
) -> Result<(DirCursor, &'p str)> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        bail!("empty file path");
    }
    let (dir_part, name) = match trimmed.rfind('/') {
        Some(split) => (&trimmed[..split], &trimmed[split + 1..]),
        None => ("", trimmed),
    };
    let cursor = resolve_dir(disk, vol, dir_part)?;
    Ok((cursor, name))
}

pub fn fat_err(err: FatError<std::io::Error>) -> anyhow::Error {
    match err {
        FatError::Device(io) => anyhow!("image read failed: {}", io),
        other => anyhow!("{}", other),
    }
}

/// Translate listing switches into the engine's filter mask.
pub fn build_filter(
    all: bool,
    created: bool,
    accessed: bool,
    modified: bool,
    short: bool,
) -> EntryFilter {
    let mut filter = EntryFilter::default();
    if short {
        filter = EntryFilter::SHORT_NAME;
    }
    if all {
        filter = filter | EntryFilter::HIDDEN;
    }
    if created {
        filter = filter | EntryFilter::CREATION;
    }
    if accessed {
        filter = filter | EntryFilter::LAST_ACCESS;
    }
    if modified {
        filter = filter | EntryFilter::LAST_MODIFIED;
    }
    filter
}
