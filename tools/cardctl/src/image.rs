use std::{
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
};

use anyhow::{Context, Result};
use sdfat::{BlockDevice, Console, SECTOR_SIZE};

/// A FAT32 disk image on the host filesystem, exposed to the engine as a
/// sector source.
pub struct ImageDisk {
    file: File,
    pub sector_count: u64,
}

impl ImageDisk {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("opening image {}", path.display()))?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            sector_count: len / SECTOR_SIZE as u64,
        })
    }
}

impl BlockDevice for ImageDisk {
    type Error = std::io::Error;

    async fn read_sector(
        &mut self,
        lba: u32,
        out: &mut [u8; SECTOR_SIZE],
    ) -> Result<(), Self::Error> {
        self.file
            .seek(SeekFrom::Start(lba as u64 * SECTOR_SIZE as u64))?;
        self.file.read_exact(out)?;
        Ok(())
    }
}

/// Console over stdout. Raw file bytes go out unmodified.
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn write_str(&mut self, s: &str) {
        print!("{}", s);
    }

    fn write_byte(&mut self, byte: u8) {
        let _ = std::io::stdout().write_all(&[byte]);
    }
}

/// Columnized OFFSET | HEX | ASCII dump of one sector.
pub fn hexdump_sector(sector: &[u8; SECTOR_SIZE]) {
    println!("\n BLOCK OFFSET                HEX                                ASCII");
    for row in 0..SECTOR_SIZE / 16 {
        let offset = row * 16;
        print!("   0x{:04X}\t ", offset);
        for (at, byte) in sector[offset..offset + 16].iter().enumerate() {
            if at % 4 == 0 {
                print!(" ");
            }
            print!(" {:02X}", byte);
        }
        print!("\t\t");
        for &byte in &sector[offset..offset + 16] {
            let shown = if byte < 32 {
                ' '
            } else if byte < 128 {
                byte as char
            } else {
                '.'
            };
            print!("{}", shown);
        }
        println!();
    }
    println!();
}
