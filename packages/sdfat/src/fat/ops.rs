use heapless::String;

use crate::blockdev::{BlockDevice, SECTOR_SIZE};
use crate::console::Console;
use crate::{NAME_MAX, PATH_MAX};

use super::cursor::DirCursor;
use super::dir::{DirEntry, DirWalker, FatDate, FatTime, FoundEntry};
use super::names::valid_entry_name;
use super::volume::{next_cluster, Volume};
use super::{EntryFilter, FatError, DIR_ENTRY_SIZE};

/// Move the cursor to `name` within its current directory. `"."` is a
/// no-op, `".."` ascends via the parent link in the directory's own first
/// sector. The walk matches long or short names byte-exactly and only
/// commits on a directory entry.
pub async fn change_dir<D: BlockDevice>(
    dev: &mut D,
    vol: &Volume,
    cursor: &mut DirCursor,
    name: &str,
) -> Result<(), FatError<D::Error>> {
    if !valid_entry_name(name) {
        return Err(FatError::InvalidDirName);
    }
    if name == "." {
        return Ok(());
    }
    if name == ".." {
        return ascend(dev, vol, cursor).await;
    }

    let mut walker = DirWalker::new(cursor.first_cluster);
    while let Some(found) = walker.next(dev, vol).await? {
        if !found.entry.is_dir() || !found.matches(name) {
            continue;
        }

        let target = found.entry.first_cluster();
        let first_cluster = if target < 2 { vol.root_cluster } else { target };

        push_path_component(&mut cursor.long_parent_path, cursor.long_name.as_str())?;
        push_path_component(&mut cursor.short_parent_path, cursor.short_name.as_str())?;
        cursor.long_name = str_into::<NAME_MAX, D::Error>(found.display_name())?;
        cursor.short_name = found.short_text.clone();
        cursor.first_cluster = first_cluster;
        return Ok(());
    }
    Err(FatError::EndOfDirectory)
}

/// Print the cursor's directory to the console: a header row, then one line
/// per live entry with the columns the filter selects.
pub async fn list_dir<D: BlockDevice, C: Console>(
    dev: &mut D,
    vol: &Volume,
    cursor: &DirCursor,
    filter: EntryFilter,
    console: &mut C,
) -> Result<(), FatError<D::Error>> {
    console.write_str("\r\n");
    if filter.contains(EntryFilter::CREATION) {
        console.write_str(" CREATION DATE & TIME,");
    }
    if filter.contains(EntryFilter::LAST_ACCESS) {
        console.write_str(" LAST ACCESS DATE,");
    }
    if filter.contains(EntryFilter::LAST_MODIFIED) {
        console.write_str(" LAST MODIFIED DATE & TIME,");
    }
    console.write_str(" SIZE, TYPE, NAME\r\n");

    let show_long = filter.contains(EntryFilter::LONG_NAME);
    let show_short = filter.contains(EntryFilter::SHORT_NAME);

    let mut walker = DirWalker::new(cursor.first_cluster);
    while let Some(found) = walker.next(dev, vol).await? {
        if found.entry.is_hidden() && !filter.contains(EntryFilter::HIDDEN) {
            continue;
        }
        if !show_long && !show_short {
            continue;
        }
        write_entry_line(&found, filter, console);
    }
    Ok(())
}

/// Stream the named file's contents to the console. LF becomes CRLF and NUL
/// bytes are dropped; a zero-length file emits nothing.
pub async fn print_file<D: BlockDevice, C: Console>(
    dev: &mut D,
    vol: &Volume,
    cursor: &DirCursor,
    name: &str,
    console: &mut C,
) -> Result<(), FatError<D::Error>> {
    if !valid_entry_name(name) {
        return Err(FatError::InvalidFileName);
    }

    let mut walker = DirWalker::new(cursor.first_cluster);
    while let Some(found) = walker.next(dev, vol).await? {
        if found.entry.is_dir() || !found.matches(name) {
            continue;
        }
        return stream_file(dev, vol, &found.entry, console).await;
    }
    Err(FatError::EndOfDirectory)
}

/// Copy the named file's contents into `out`, returning the byte count.
pub async fn read_file<D: BlockDevice>(
    dev: &mut D,
    vol: &Volume,
    cursor: &DirCursor,
    name: &str,
    out: &mut [u8],
) -> Result<usize, FatError<D::Error>> {
    if !valid_entry_name(name) {
        return Err(FatError::InvalidFileName);
    }

    let mut walker = DirWalker::new(cursor.first_cluster);
    while let Some(found) = walker.next(dev, vol).await? {
        if found.entry.is_dir() || !found.matches(name) {
            continue;
        }
        return copy_file(dev, vol, &found.entry, out).await;
    }
    Err(FatError::FileNotFound)
}

async fn ascend<D: BlockDevice>(
    dev: &mut D,
    vol: &Volume,
    cursor: &mut DirCursor,
) -> Result<(), FatError<D::Error>> {
    if cursor.is_root(vol) {
        return Ok(());
    }

    // The ".." entry sits in the second slot of the directory's first
    // sector; its first-cluster field names the parent.
    let lba = vol
        .cluster_lba(cursor.first_cluster)
        .ok_or(FatError::BadCluster(cursor.first_cluster))?;
    let mut sector = [0u8; SECTOR_SIZE];
    dev.read_sector(lba, &mut sector)
        .await
        .map_err(FatError::Device)?;

    let dotdot = DirEntry::from_slice(&sector[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE]);
    let parent_cluster = dotdot.first_cluster();

    if parent_cluster == 0 {
        cursor.reset_to_root(vol);
        return Ok(());
    }

    pop_path_component(&mut cursor.long_parent_path, &mut cursor.long_name)?;
    pop_path_component(&mut cursor.short_parent_path, &mut cursor.short_name)?;
    cursor.first_cluster = parent_cluster;
    Ok(())
}

async fn stream_file<D: BlockDevice, C: Console>(
    dev: &mut D,
    vol: &Volume,
    entry: &DirEntry,
    console: &mut C,
) -> Result<(), FatError<D::Error>> {
    let size = entry.size() as usize;
    if size == 0 {
        return Ok(());
    }
    let first = entry.first_cluster();
    if first < 2 {
        return Err(FatError::BadCluster(first));
    }

    let mut sector = [0u8; SECTOR_SIZE];
    let mut remaining = size;
    let mut cluster = first;
    let mut visited = 0u32;

    loop {
        visited += 1;
        if visited > vol.walk_limit() {
            return Err(FatError::ChainTooLong);
        }

        for sector_in_cluster in 0..vol.sectors_per_cluster as u32 {
            if remaining == 0 {
                break;
            }
            let lba = vol
                .cluster_lba(cluster)
                .ok_or(FatError::BadCluster(cluster))?
                + sector_in_cluster;
            dev.read_sector(lba, &mut sector)
                .await
                .map_err(FatError::Device)?;

            let chunk = remaining.min(SECTOR_SIZE);
            for &byte in &sector[..chunk] {
                if byte == b'\n' {
                    console.write_str("\r\n");
                } else if byte != 0 {
                    console.write_byte(byte);
                }
            }
            remaining -= chunk;
        }

        if remaining == 0 {
            return Ok(());
        }
        cluster = next_cluster(dev, vol, cluster)
            .await?
            .ok_or(FatError::EndOfFile)?;
    }
}

async fn copy_file<D: BlockDevice>(
    dev: &mut D,
    vol: &Volume,
    entry: &DirEntry,
    out: &mut [u8],
) -> Result<usize, FatError<D::Error>> {
    let size = entry.size() as usize;
    if out.len() < size {
        return Err(FatError::BufferTooSmall { needed: size });
    }
    if size == 0 {
        return Ok(0);
    }
    let first = entry.first_cluster();
    if first < 2 {
        return Err(FatError::BadCluster(first));
    }

    let mut sector = [0u8; SECTOR_SIZE];
    let mut written = 0usize;
    let mut cluster = first;
    let mut visited = 0u32;

    while written < size {
        visited += 1;
        if visited > vol.walk_limit() {
            return Err(FatError::ChainTooLong);
        }

        for sector_in_cluster in 0..vol.sectors_per_cluster as u32 {
            if written >= size {
                break;
            }
            let lba = vol
                .cluster_lba(cluster)
                .ok_or(FatError::BadCluster(cluster))?
                + sector_in_cluster;
            dev.read_sector(lba, &mut sector)
                .await
                .map_err(FatError::Device)?;

            let chunk = (size - written).min(SECTOR_SIZE);
            out[written..written + chunk].copy_from_slice(&sector[..chunk]);
            written += chunk;
        }

        if written >= size {
            break;
        }
        cluster = next_cluster(dev, vol, cluster)
            .await?
            .ok_or(FatError::EndOfFile)?;
    }

    Ok(written)
}

/// Append the current directory's name to a parent path. The root keeps no
/// trailing separator of its own, so `"/"` is appended as-is and anything
/// else gains one: `"" + "/" -> "/"`, `"/" + "A" -> "/A/"`.
fn push_path_component<E>(
    path: &mut String<PATH_MAX>,
    name: &str,
) -> Result<(), FatError<E>> {
    path.push_str(name).map_err(|_| FatError::PathTooLong)?;
    if name != "/" {
        path.push('/').map_err(|_| FatError::PathTooLong)?;
    }
    Ok(())
}

/// Inverse of [`push_path_component`]: split the last component off the
/// parent path into `name`, leaving the path of the grandparent.
fn pop_path_component<const N: usize, E>(
    path: &mut String<PATH_MAX>,
    name: &mut String<N>,
) -> Result<(), FatError<E>> {
    let trimmed_len = path.len().saturating_sub(1);
    let trimmed = &path.as_str()[..trimmed_len];
    let split = trimmed.rfind('/').ok_or(FatError::CorruptEntry)?;

    name.clear();
    name.push_str(&trimmed[split + 1..])
        .map_err(|_| FatError::PathTooLong)?;

    let keep = split + 1;
    let mut rebuilt: String<PATH_MAX> = String::new();
    rebuilt
        .push_str(&path.as_str()[..keep])
        .map_err(|_| FatError::PathTooLong)?;
    *path = rebuilt;
    Ok(())
}

fn str_into<const N: usize, E>(s: &str) -> Result<String<N>, FatError<E>> {
    let mut out = String::new();
    out.push_str(s).map_err(|_| FatError::PathTooLong)?;
    Ok(out)
}

fn write_entry_line<C: Console>(found: &FoundEntry, filter: EntryFilter, console: &mut C) {
    if filter.contains(EntryFilter::CREATION) {
        let (date, time) = found.entry.created();
        console.write_str("    ");
        write_date(console, date);
        console.write_str("  ");
        write_time(console, time);
    }
    if filter.contains(EntryFilter::LAST_ACCESS) {
        console.write_str("     ");
        write_date(console, found.entry.accessed());
    }
    if filter.contains(EntryFilter::LAST_MODIFIED) {
        let (date, time) = found.entry.modified();
        console.write_str("     ");
        write_date(console, date);
        console.write_str("  ");
        write_time(console, time);
    }

    write_dec_padded(console, found.entry.size(), 10);
    if found.entry.is_dir() {
        console.write_str("  <DIR>   ");
    } else {
        console.write_str("  <FILE>  ");
    }

    let show_long = filter.contains(EntryFilter::LONG_NAME);
    let show_short = filter.contains(EntryFilter::SHORT_NAME);
    if show_long {
        console.write_str(found.display_name());
        if show_short && found.has_long_name {
            console.write_str("  ");
            console.write_str(found.short_text.as_str());
        }
    } else if show_short {
        console.write_str(found.short_text.as_str());
    }
    console.write_str("\r\n");
}

fn write_date<C: Console>(console: &mut C, date: FatDate) {
    write_dec_zero_padded(console, date.month() as u32);
    console.write_str("/");
    write_dec_zero_padded(console, date.day() as u32);
    console.write_str("/");
    console.write_dec(date.year() as u32);
}

fn write_time<C: Console>(console: &mut C, time: FatTime) {
    write_dec_zero_padded(console, time.hour() as u32);
    console.write_str(":");
    write_dec_zero_padded(console, time.minute() as u32);
    console.write_str(":");
    write_dec_zero_padded(console, time.second() as u32);
}

fn write_dec_zero_padded<C: Console>(console: &mut C, value: u32) {
    if value < 10 {
        console.write_str("0");
    }
    console.write_dec(value);
}

fn write_dec_padded<C: Console>(console: &mut C, value: u32, width: u32) {
    let mut digits = 1;
    let mut probe = value;
    while probe >= 10 {
        digits += 1;
        probe /= 10;
    }
    for _ in digits..width {
        console.write_str(" ");
    }
    console.write_dec(value);
}
