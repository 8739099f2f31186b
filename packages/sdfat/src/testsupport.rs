//! In-memory block device and async driving shared by the unit tests.

use crate::blockdev::{BlockDevice, SECTOR_SIZE};

pub(crate) use embassy_futures::block_on;

pub(crate) struct RamDisk {
    sectors: Vec<[u8; SECTOR_SIZE]>,
}

impl RamDisk {
    pub(crate) fn new(sector_count: usize) -> Self {
        Self {
            sectors: vec![[0u8; SECTOR_SIZE]; sector_count],
        }
    }

    pub(crate) fn set_sector(&mut self, lba: u32, data: &[u8; SECTOR_SIZE]) {
        let at = lba as usize;
        if at >= self.sectors.len() {
            self.sectors.resize(at + 1, [0u8; SECTOR_SIZE]);
        }
        self.sectors[at] = *data;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OutOfRange;

impl BlockDevice for RamDisk {
    type Error = OutOfRange;

    async fn read_sector(
        &mut self,
        lba: u32,
        out: &mut [u8; SECTOR_SIZE],
    ) -> Result<(), Self::Error> {
        let sector = self.sectors.get(lba as usize).ok_or(OutOfRange)?;
        out.copy_from_slice(sector);
        Ok(())
    }
}
