use crate::blockdev::{BlockDevice, SECTOR_SIZE};

use super::{FatError, CLUSTER_MASK, FAT32_EOC};

/// Geometry of a mounted FAT32 volume, read once from the boot sector and
/// immutable afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Volume {
    pub boot_sector_lba: u32,
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub fat_size: u32,
    pub root_cluster: u32,
    /// First FAT sector, absolute. Includes the partition offset, so chain
    /// walking works on partitioned media.
    pub fat_start_lba: u32,
    /// First sector of the data region (cluster 2), absolute.
    pub data_start_lba: u32,
    /// Cluster count of the data region; bounds every chain walk.
    pub total_clusters: u32,
}

// Fallback walk bound for images that leave the total-sector fields zero.
const UNKNOWN_CLUSTER_COUNT: u32 = 0x0FFF_FFF5;

impl Volume {
    /// Locate and validate the FAT32 boot sector: directly at LBA 0, or via
    /// the first FAT-type MBR partition slot.
    pub async fn mount<D: BlockDevice>(dev: &mut D) -> Result<Self, FatError<D::Error>> {
        let mut sector = [0u8; SECTOR_SIZE];
        dev.read_sector(0, &mut sector)
            .await
            .map_err(FatError::Device)?;

        if !has_signature(&sector) {
            return Err(FatError::BootSectorNotFound);
        }
        if is_fat32_boot_sector(&sector) {
            return Self::parse(0, &sector);
        }
        match first_fat_partition_lba(&sector) {
            Some(start) => {
                dev.read_sector(start, &mut sector)
                    .await
                    .map_err(FatError::Device)?;
                Self::parse(start, &sector)
            }
            None => Err(FatError::BootSectorNotFound),
        }
    }

    fn parse<E>(boot_sector_lba: u32, boot: &[u8; SECTOR_SIZE]) -> Result<Self, FatError<E>> {
        if !has_signature(boot) {
            return Err(FatError::NotBootSector);
        }

        let bytes_per_sector = u16::from_le_bytes([boot[11], boot[12]]);
        if bytes_per_sector != SECTOR_SIZE as u16 {
            return Err(FatError::InvalidBytesPerSector(bytes_per_sector));
        }

        let sectors_per_cluster = boot[13];
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(FatError::InvalidSectorsPerCluster(sectors_per_cluster));
        }

        let reserved_sectors = u16::from_le_bytes([boot[14], boot[15]]);
        let fat_count = boot[16];
        let fat_size = u32::from_le_bytes([boot[36], boot[37], boot[38], boot[39]]);
        let root_cluster = u32::from_le_bytes([boot[44], boot[45], boot[46], boot[47]]);

        let total_16 = u16::from_le_bytes([boot[19], boot[20]]) as u32;
        let total_32 = u32::from_le_bytes([boot[32], boot[33], boot[34], boot[35]]);
        let total_sectors = if total_16 != 0 { total_16 } else { total_32 };

        let fat_start_lba = boot_sector_lba.saturating_add(reserved_sectors as u32);
        let data_start_lba =
            fat_start_lba.saturating_add(fat_size.saturating_mul(fat_count as u32));
        let used = (reserved_sectors as u32).saturating_add(fat_size.saturating_mul(fat_count as u32));
        let data_sectors = total_sectors.saturating_sub(used);
        let mut total_clusters = data_sectors / sectors_per_cluster as u32;
        if total_clusters == 0 {
            total_clusters = UNKNOWN_CLUSTER_COUNT;
        }

        Ok(Self {
            boot_sector_lba,
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            fat_count,
            fat_size,
            root_cluster,
            fat_start_lba,
            data_start_lba,
            total_clusters,
        })
    }

    /// First LBA of a data cluster. `None` for the reserved indices 0 and 1.
    pub fn cluster_lba(&self, cluster: u32) -> Option<u32> {
        if cluster < 2 {
            return None;
        }
        Some(
            self.data_start_lba
                .saturating_add((cluster - 2).saturating_mul(self.sectors_per_cluster as u32)),
        )
    }

    /// Bound for cluster-chain walks; crossing it means the FAT loops.
    pub(crate) fn walk_limit(&self) -> u32 {
        self.total_clusters.saturating_add(2)
    }
}

/// Next cluster in the chain, or `None` at the end-of-chain sentinel.
pub async fn next_cluster<D: BlockDevice>(
    dev: &mut D,
    vol: &Volume,
    cluster: u32,
) -> Result<Option<u32>, FatError<D::Error>> {
    let entries_per_sector = (SECTOR_SIZE / 4) as u32;
    let sector_offset = cluster / entries_per_sector;
    let index = (4 * (cluster % entries_per_sector)) as usize;
    if sector_offset >= vol.fat_size {
        return Err(FatError::BadCluster(cluster));
    }

    let lba = vol.fat_start_lba.saturating_add(sector_offset);
    let mut sector = [0u8; SECTOR_SIZE];
    dev.read_sector(lba, &mut sector)
        .await
        .map_err(FatError::Device)?;

    let raw = u32::from_le_bytes([
        sector[index],
        sector[index + 1],
        sector[index + 2],
        sector[index + 3],
    ]) & CLUSTER_MASK;

    if raw >= FAT32_EOC {
        return Ok(None);
    }
    if raw < 2 {
        return Err(FatError::BadCluster(raw));
    }
    Ok(Some(raw))
}

fn has_signature(sector: &[u8; SECTOR_SIZE]) -> bool {
    sector[510] == 0x55 && sector[511] == 0xAA
}

fn is_fat32_boot_sector(sector: &[u8; SECTOR_SIZE]) -> bool {
    &sector[82..87] == b"FAT32"
}

fn first_fat_partition_lba(sector: &[u8; SECTOR_SIZE]) -> Option<u32> {
    for slot in 0..4 {
        let base = 446 + slot * 16;
        let part_type = sector[base + 4];
        if !matches!(part_type, 0x0B | 0x0C | 0x0E | 0x06 | 0x04) {
            continue;
        }
        let start = u32::from_le_bytes([
            sector[base + 8],
            sector[base + 9],
            sector[base + 10],
            sector[base + 11],
        ]);
        if start != 0 {
            return Some(start);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{block_on, RamDisk};

    fn boot_sector(bytes_per_sector: u16, sectors_per_cluster: u8) -> [u8; SECTOR_SIZE] {
        let mut boot = [0u8; SECTOR_SIZE];
        boot[11..13].copy_from_slice(&bytes_per_sector.to_le_bytes());
        boot[13] = sectors_per_cluster;
        boot[14..16].copy_from_slice(&32u16.to_le_bytes());
        boot[16] = 2;
        boot[32..36].copy_from_slice(&20_000u32.to_le_bytes());
        boot[36..40].copy_from_slice(&1024u32.to_le_bytes());
        boot[44..48].copy_from_slice(&2u32.to_le_bytes());
        boot[82..87].copy_from_slice(b"FAT32");
        boot[510] = 0x55;
        boot[511] = 0xAA;
        boot
    }

    #[test]
    fn mounts_unpartitioned_volume() {
        let mut disk = RamDisk::new(4);
        disk.set_sector(0, &boot_sector(512, 8));
        let vol = block_on(Volume::mount(&mut disk)).unwrap();
        assert_eq!(vol.boot_sector_lba, 0);
        assert_eq!(vol.fat_start_lba, 32);
        assert_eq!(vol.data_start_lba, 32 + 2 * 1024);
        assert_eq!(vol.root_cluster, 2);
    }

    #[test]
    fn mounts_partitioned_volume_and_offsets_geometry() {
        let mut disk = RamDisk::new(9000);
        let mut mbr = [0u8; SECTOR_SIZE];
        mbr[446 + 4] = 0x0C;
        mbr[446 + 8..446 + 12].copy_from_slice(&8192u32.to_le_bytes());
        mbr[510] = 0x55;
        mbr[511] = 0xAA;
        disk.set_sector(0, &mbr);
        disk.set_sector(8192, &boot_sector(512, 8));

        let vol = block_on(Volume::mount(&mut disk)).unwrap();
        assert_eq!(vol.boot_sector_lba, 8192);
        assert_eq!(vol.fat_start_lba, 8192 + 32);
        // Matches the mount scenario: 8192 + 32 + 2 * 1024.
        assert_eq!(vol.data_start_lba, 10_272);
    }

    #[test]
    fn rejects_missing_signature() {
        let mut disk = RamDisk::new(1);
        let mut boot = boot_sector(512, 8);
        boot[510] = 0;
        disk.set_sector(0, &boot);
        assert_eq!(
            block_on(Volume::mount(&mut disk)),
            Err(FatError::BootSectorNotFound)
        );
    }

    #[test]
    fn rejects_bad_geometry_fields() {
        let mut disk = RamDisk::new(1);
        disk.set_sector(0, &boot_sector(1024, 8));
        assert_eq!(
            block_on(Volume::mount(&mut disk)),
            Err(FatError::InvalidBytesPerSector(1024))
        );

        disk.set_sector(0, &boot_sector(512, 3));
        assert_eq!(
            block_on(Volume::mount(&mut disk)),
            Err(FatError::InvalidSectorsPerCluster(3))
        );
    }

    #[test]
    fn walks_fat_chain_to_end_sentinel() {
        let mut disk = RamDisk::new(64);
        disk.set_sector(0, &boot_sector(512, 1));
        let mut fat = [0u8; SECTOR_SIZE];
        fat[2 * 4..2 * 4 + 4].copy_from_slice(&3u32.to_le_bytes());
        fat[3 * 4..3 * 4 + 4].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
        disk.set_sector(32, &fat);

        let vol = block_on(Volume::mount(&mut disk)).unwrap();
        assert_eq!(block_on(next_cluster(&mut disk, &vol, 2)), Ok(Some(3)));
        assert_eq!(block_on(next_cluster(&mut disk, &vol, 3)), Ok(None));
    }

    #[test]
    fn masks_reserved_top_bits_of_fat_entry() {
        let mut disk = RamDisk::new(64);
        disk.set_sector(0, &boot_sector(512, 1));
        let mut fat = [0u8; SECTOR_SIZE];
        fat[2 * 4..2 * 4 + 4].copy_from_slice(&0xF000_0005u32.to_le_bytes());
        disk.set_sector(32, &fat);

        let vol = block_on(Volume::mount(&mut disk)).unwrap();
        assert_eq!(block_on(next_cluster(&mut disk, &vol, 2)), Ok(Some(5)));
    }
}
