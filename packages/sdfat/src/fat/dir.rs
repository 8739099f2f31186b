use heapless::String;

use crate::blockdev::{BlockDevice, SECTOR_SIZE};
use crate::NAME_MAX;

use super::names::{short_name_matches, short_name_text, LfnAccept, LfnState};
use super::volume::{next_cluster, Volume};
use super::{
    FatError, ATTR_DIRECTORY, ATTR_HIDDEN, ATTR_LONG_NAME_MASK, ATTR_VOLUME_ID, DIR_ENTRY_SIZE,
};

/// Raw 32-byte short-name directory entry with field accessors.
#[derive(Clone, Copy)]
pub struct DirEntry {
    raw: [u8; DIR_ENTRY_SIZE],
}

impl DirEntry {
    pub(crate) fn from_slice(bytes: &[u8]) -> Self {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        raw.copy_from_slice(&bytes[..DIR_ENTRY_SIZE]);
        Self { raw }
    }

    pub fn attr(&self) -> u8 {
        self.raw[11]
    }

    pub fn is_dir(&self) -> bool {
        self.attr() & ATTR_DIRECTORY != 0
    }

    pub fn is_hidden(&self) -> bool {
        self.attr() & ATTR_HIDDEN != 0
    }

    pub fn short_name_raw(&self) -> [u8; 11] {
        let mut out = [0u8; 11];
        out.copy_from_slice(&self.raw[..11]);
        out
    }

    /// First cluster: high word at offset 20, low word at offset 26.
    pub fn first_cluster(&self) -> u32 {
        let hi = u16::from_le_bytes([self.raw[20], self.raw[21]]) as u32;
        let lo = u16::from_le_bytes([self.raw[26], self.raw[27]]) as u32;
        (hi << 16) | lo
    }

    pub fn size(&self) -> u32 {
        u32::from_le_bytes([self.raw[28], self.raw[29], self.raw[30], self.raw[31]])
    }

    pub fn created(&self) -> (FatDate, FatTime) {
        (
            FatDate(u16::from_le_bytes([self.raw[16], self.raw[17]])),
            FatTime(u16::from_le_bytes([self.raw[14], self.raw[15]])),
        )
    }

    pub fn accessed(&self) -> FatDate {
        FatDate(u16::from_le_bytes([self.raw[18], self.raw[19]]))
    }

    pub fn modified(&self) -> (FatDate, FatTime) {
        (
            FatDate(u16::from_le_bytes([self.raw[24], self.raw[25]])),
            FatTime(u16::from_le_bytes([self.raw[22], self.raw[23]])),
        )
    }
}

/// Packed FAT date: bits 15..9 year since 1980, 8..5 month, 4..0 day.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FatDate(pub u16);

impl FatDate {
    pub fn year(self) -> u16 {
        1980 + (self.0 >> 9)
    }
    pub fn month(self) -> u8 {
        ((self.0 >> 5) & 0x0F) as u8
    }
    pub fn day(self) -> u8 {
        (self.0 & 0x1F) as u8
    }
}

/// Packed FAT time: bits 15..11 hour, 10..5 minute, 4..0 seconds/2.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FatTime(pub u16);

impl FatTime {
    pub fn hour(self) -> u8 {
        (self.0 >> 11) as u8
    }
    pub fn minute(self) -> u8 {
        ((self.0 >> 5) & 0x3F) as u8
    }
    pub fn second(self) -> u8 {
        (self.0 & 0x1F) as u8 * 2
    }
}

/// A live entry yielded by the directory walker.
pub(crate) struct FoundEntry {
    pub entry: DirEntry,
    pub long_name: String<NAME_MAX>,
    pub has_long_name: bool,
    pub short_text: String<12>,
}

impl FoundEntry {
    /// The name a listing shows: the long name when one exists, otherwise
    /// the rendered 8.3 form.
    pub fn display_name(&self) -> &str {
        if self.has_long_name {
            self.long_name.as_str()
        } else {
            self.short_text.as_str()
        }
    }

    /// Byte-exact match against the long name, falling back to the packed
    /// 8.3 fields.
    pub fn matches(&self, name: &str) -> bool {
        if self.has_long_name && self.long_name.as_str() == name {
            return true;
        }
        short_name_matches(name, &self.entry.short_name_raw())
    }
}

/// Single directory walker behind cd, ls and cat: follows the cluster chain,
/// classifies 32-byte slots, and carries long-name state across sector and
/// cluster boundaries.
pub(crate) struct DirWalker {
    cluster: u32,
    sector_in_cluster: u32,
    entry_offset: usize,
    sector: [u8; SECTOR_SIZE],
    loaded: bool,
    visited: u32,
    lfn: LfnState,
    done: bool,
}

impl DirWalker {
    pub(crate) fn new(first_cluster: u32) -> Self {
        Self {
            cluster: first_cluster,
            sector_in_cluster: 0,
            entry_offset: 0,
            sector: [0; SECTOR_SIZE],
            loaded: false,
            visited: 0,
            lfn: LfnState::new(),
            done: false,
        }
    }

    pub(crate) async fn next<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        vol: &Volume,
    ) -> Result<Option<FoundEntry>, FatError<D::Error>> {
        if self.done {
            return Ok(None);
        }

        loop {
            if !self.loaded {
                let lba = vol
                    .cluster_lba(self.cluster)
                    .ok_or(FatError::BadCluster(self.cluster))?
                    + self.sector_in_cluster;
                dev.read_sector(lba, &mut self.sector)
                    .await
                    .map_err(FatError::Device)?;
                self.loaded = true;
            }

            while self.entry_offset < SECTOR_SIZE {
                let base = self.entry_offset;
                self.entry_offset += DIR_ENTRY_SIZE;

                let first = self.sector[base];
                if first == 0x00 {
                    // Free slot: this and everything after it is unused.
                    self.done = true;
                    return Ok(None);
                }
                if first == 0xE5 {
                    self.lfn.clear();
                    continue;
                }

                let attr = self.sector[base + 11];
                if attr & ATTR_LONG_NAME_MASK == ATTR_LONG_NAME_MASK {
                    match self
                        .lfn
                        .consume(&self.sector[base..base + DIR_ENTRY_SIZE])
                    {
                        LfnAccept::Ok => continue,
                        LfnAccept::Corrupt => return Err(FatError::CorruptEntry),
                    }
                }
                if attr & ATTR_VOLUME_ID != 0 {
                    self.lfn.clear();
                    continue;
                }

                let entry = DirEntry::from_slice(&self.sector[base..base + DIR_ENTRY_SIZE]);
                let mut long_name = String::new();
                let has_long_name = self
                    .lfn
                    .finish(&entry.short_name_raw(), &mut long_name)
                    .map_err(|_| FatError::CorruptEntry)?;
                let short_text = short_name_text(&entry.short_name_raw());
                return Ok(Some(FoundEntry {
                    entry,
                    long_name,
                    has_long_name,
                    short_text,
                }));
            }

            // Sector exhausted; advance within the cluster or follow the
            // chain. The long-name state stays armed across the load.
            self.entry_offset = 0;
            self.loaded = false;
            self.sector_in_cluster += 1;
            if self.sector_in_cluster >= vol.sectors_per_cluster as u32 {
                self.sector_in_cluster = 0;
                self.visited += 1;
                if self.visited > vol.walk_limit() {
                    return Err(FatError::ChainTooLong);
                }
                match next_cluster(dev, vol, self.cluster).await? {
                    Some(next) => self.cluster = next,
                    None => {
                        self.done = true;
                        return Ok(None);
                    }
                }
            }
        }
    }
}
