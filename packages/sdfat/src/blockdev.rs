//! Sector-level read interface consumed by the FAT engine.

pub const SECTOR_SIZE: usize = 512;

/// Source of 512-byte sectors addressed by LBA.
///
/// The SPI SD card implements this; host-side code implements it over a
/// disk-image file or a RAM image for tests.
pub trait BlockDevice {
    type Error;

    async fn read_sector(
        &mut self,
        lba: u32,
        out: &mut [u8; SECTOR_SIZE],
    ) -> Result<(), Self::Error>;
}
