//! FAT32 read engine: boot-sector geometry, FAT chain walking, directory
//! traversal with VFAT long-name assembly, and the cursor-based
//! cd / ls / cat operations.

mod cursor;
mod dir;
mod names;
mod ops;
mod volume;

pub use cursor::DirCursor;
pub use dir::{DirEntry, FatDate, FatTime};
pub use ops::{change_dir, list_dir, print_file, read_file};
pub use volume::{next_cluster, Volume};

use core::fmt;
use core::ops::BitOr;

pub(crate) const DIR_ENTRY_SIZE: usize = 32;
pub(crate) const FAT32_EOC: u32 = 0x0FFF_FFF8;
pub(crate) const CLUSTER_MASK: u32 = 0x0FFF_FFFF;

pub(crate) const ATTR_HIDDEN: u8 = 0x02;
pub(crate) const ATTR_VOLUME_ID: u8 = 0x08;
pub(crate) const ATTR_DIRECTORY: u8 = 0x10;
pub(crate) const ATTR_LONG_NAME_MASK: u8 = 0x0F;

/// Failure of a FAT-level operation. `E` is the block device's error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatError<E> {
    /// Sector read failed in the underlying device.
    Device(E),
    BootSectorNotFound,
    NotBootSector,
    InvalidBytesPerSector(u16),
    InvalidSectorsPerCluster(u8),
    /// The walk exhausted the directory without satisfying the request.
    EndOfDirectory,
    /// A cluster chain ended before the recorded file size was reached.
    EndOfFile,
    FileNotFound,
    DirNotFound,
    InvalidFileName,
    InvalidDirName,
    /// A long-name group was malformed (missing ordinal 1, checksum
    /// mismatch, or an orphan slot).
    CorruptEntry,
    BadCluster(u32),
    /// A cluster chain ran past the volume's cluster count.
    ChainTooLong,
    /// A parent-path append overflowed the cursor's fixed capacity.
    PathTooLong,
    BufferTooSmall { needed: usize },
}

impl<E> fmt::Display for FatError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatError::Device(_) => write!(f, "FAILED_READ_SECTOR"),
            FatError::BootSectorNotFound => write!(f, "BOOT_SECTOR_NOT_FOUND"),
            FatError::NotBootSector => write!(f, "NOT_BOOT_SECTOR"),
            FatError::InvalidBytesPerSector(got) => {
                write!(f, "INVALID_BYTES_PER_SECTOR ({})", got)
            }
            FatError::InvalidSectorsPerCluster(got) => {
                write!(f, "INVALID_SECTORS_PER_CLUSTER ({})", got)
            }
            FatError::EndOfDirectory => write!(f, "END_OF_DIRECTORY"),
            FatError::EndOfFile => write!(f, "END_OF_FILE"),
            FatError::FileNotFound => write!(f, "FILE_NOT_FOUND"),
            FatError::DirNotFound => write!(f, "DIR_NOT_FOUND"),
            FatError::InvalidFileName => write!(f, "INVALID_FILE_NAME"),
            FatError::InvalidDirName => write!(f, "INVALID_DIR_NAME"),
            FatError::CorruptEntry => write!(f, "CORRUPT_FAT_ENTRY"),
            FatError::BadCluster(cluster) => write!(f, "BAD_CLUSTER ({})", cluster),
            FatError::ChainTooLong => write!(f, "CLUSTER_CHAIN_TOO_LONG"),
            FatError::PathTooLong => write!(f, "PATH_TOO_LONG"),
            FatError::BufferTooSmall { needed } => {
                write!(f, "BUFFER_TOO_SMALL (need {})", needed)
            }
        }
    }
}

/// Field selection for directory listings. Size, type and name columns are
/// always printed; these flags add the timestamp columns, choose the name
/// forms, and reveal hidden entries.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EntryFilter(u8);

impl EntryFilter {
    pub const SHORT_NAME: Self = Self(0x01);
    pub const LONG_NAME: Self = Self(0x02);
    pub const HIDDEN: Self = Self(0x04);
    pub const CREATION: Self = Self(0x08);
    pub const LAST_ACCESS: Self = Self(0x10);
    pub const LAST_MODIFIED: Self = Self(0x20);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x3F)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for EntryFilter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

impl Default for EntryFilter {
    fn default() -> Self {
        Self::LONG_NAME.with(Self::SHORT_NAME)
    }
}
