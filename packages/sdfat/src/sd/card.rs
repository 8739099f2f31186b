use embedded_hal::digital::OutputPin;
use embedded_hal_async::spi::SpiBus;

use crate::blockdev::{BlockDevice, SECTOR_SIZE};

use super::{cmd, token, R1, SdBus, SdError, Timeouts};

/// How block addresses go on the wire. Bring-up discovers this from the OCR
/// (CCS bit); standard-capacity cards take byte addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Addressing {
    Byte,
    Block,
}

/// An initialized SD card on an exclusively owned SPI bus.
pub struct SdCard<SPI, CS> {
    bus: SdBus<SPI, CS>,
    addressing: Addressing,
    cached_lba: Option<u32>,
    cache: [u8; SECTOR_SIZE],
}

impl<SPI, CS> SdCard<SPI, CS>
where
    SPI: SpiBus,
    CS: OutputPin,
{
    pub fn new(spi: SPI, cs: CS, addressing: Addressing) -> Result<Self, SdError<SPI::Error>> {
        Self::with_timeouts(spi, cs, addressing, Timeouts::default())
    }

    pub fn with_timeouts(
        spi: SPI,
        cs: CS,
        addressing: Addressing,
        timeouts: Timeouts,
    ) -> Result<Self, SdError<SPI::Error>> {
        Ok(Self {
            bus: SdBus::new(spi, cs, timeouts)?,
            addressing,
            cached_lba: None,
            cache: [0; SECTOR_SIZE],
        })
    }

    fn block_arg(&self, lba: u32) -> u32 {
        match self.addressing {
            Addressing::Block => lba,
            Addressing::Byte => lba.saturating_mul(SECTOR_SIZE as u32),
        }
    }

    /// Read one 512-byte block with CMD17.
    pub async fn read_block(
        &mut self,
        lba: u32,
        out: &mut [u8; SECTOR_SIZE],
    ) -> Result<(), SdError<SPI::Error>> {
        let result = self.read_block_inner(lba, out).await;
        self.bus.end_transaction().await;
        result
    }

    async fn read_block_inner(
        &mut self,
        lba: u32,
        out: &mut [u8; SECTOR_SIZE],
    ) -> Result<(), SdError<SPI::Error>> {
        let arg = self.block_arg(lba);
        let r1 = self.bus.command(cmd::READ_SINGLE_BLOCK, arg).await?;
        if r1.any_error() {
            return Err(SdError::CommandRejected {
                cmd: cmd::READ_SINGLE_BLOCK,
                r1,
            });
        }
        self.wait_start_token(r1).await?;
        for slot in out.iter_mut() {
            *slot = self.bus.transfer_byte(0xFF).await?;
        }
        // Data CRC16, discarded (CRC is off in SPI mode), plus one drain byte.
        let _ = self.bus.transfer_byte(0xFF).await?;
        let _ = self.bus.transfer_byte(0xFF).await?;
        let _ = self.bus.transfer_byte(0xFF).await?;
        Ok(())
    }

    /// Read consecutive blocks with CMD18, terminated by CMD12.
    pub async fn read_blocks(
        &mut self,
        lba: u32,
        out: &mut [[u8; SECTOR_SIZE]],
    ) -> Result<(), SdError<SPI::Error>> {
        let result = self.read_blocks_inner(lba, out).await;
        self.bus.end_transaction().await;
        result
    }

    async fn read_blocks_inner(
        &mut self,
        lba: u32,
        out: &mut [[u8; SECTOR_SIZE]],
    ) -> Result<(), SdError<SPI::Error>> {
        let arg = self.block_arg(lba);
        let r1 = self.bus.command(cmd::READ_MULTIPLE_BLOCK, arg).await?;
        if r1.any_error() {
            return Err(SdError::CommandRejected {
                cmd: cmd::READ_MULTIPLE_BLOCK,
                r1,
            });
        }
        for block in out.iter_mut() {
            self.wait_start_token(r1).await?;
            for slot in block.iter_mut() {
                *slot = self.bus.transfer_byte(0xFF).await?;
            }
            let _ = self.bus.transfer_byte(0xFF).await?;
            let _ = self.bus.transfer_byte(0xFF).await?;
        }
        // Stop the stream. The byte right after CMD12 is a stuff byte; the
        // R1b that follows is not interesting as long as busy clears.
        self.bus.command_frame(cmd::STOP_TRANSMISSION, 0).await?;
        let _ = self.bus.transfer_byte(0xFF).await?;
        let _ = self.bus.read_r1(cmd::STOP_TRANSMISSION).await;
        self.wait_not_busy(self.bus.timeouts.busy_polls, SdError::CardBusyTimeout { r1 })
            .await?;
        Ok(())
    }

    /// Write one 512-byte block with CMD24.
    pub async fn write_block(
        &mut self,
        lba: u32,
        data: &[u8; SECTOR_SIZE],
    ) -> Result<(), SdError<SPI::Error>> {
        let result = self.write_block_inner(lba, data).await;
        self.bus.end_transaction().await;
        if result.is_ok() {
            self.cache.copy_from_slice(data);
            self.cached_lba = Some(lba);
        }
        result
    }

    async fn write_block_inner(
        &mut self,
        lba: u32,
        data: &[u8; SECTOR_SIZE],
    ) -> Result<(), SdError<SPI::Error>> {
        let arg = self.block_arg(lba);
        let r1 = self.bus.command(cmd::WRITE_BLOCK, arg).await?;
        if r1.any_error() {
            return Err(SdError::CommandRejected {
                cmd: cmd::WRITE_BLOCK,
                r1,
            });
        }
        let _ = self.bus.transfer_byte(0xFF).await?;
        self.send_data_packet(token::START_BLOCK, data).await?;
        let response = self.wait_data_response(r1).await?;
        match response & token::DATA_RESPONSE_MASK {
            token::DATA_ACCEPTED => {
                self.wait_not_busy(self.bus.timeouts.busy_polls, SdError::CardBusyTimeout { r1 })
                    .await
            }
            token::DATA_CRC_ERROR => Err(SdError::CrcErrorToken { r1 }),
            token::DATA_WRITE_ERROR => Err(SdError::WriteErrorToken { r1 }),
            other => Err(SdError::InvalidDataResponse { token: other, r1 }),
        }
    }

    /// Write consecutive blocks with CMD25. On a CRC or write-error token
    /// the remaining blocks are dropped but the stream is still terminated
    /// with the stop-transmission token before the failure is reported.
    pub async fn write_blocks(
        &mut self,
        lba: u32,
        blocks: &[[u8; SECTOR_SIZE]],
    ) -> Result<(), SdError<SPI::Error>> {
        let result = self.write_blocks_inner(lba, blocks).await;
        self.bus.end_transaction().await;
        self.cached_lba = None;
        result
    }

    async fn write_blocks_inner(
        &mut self,
        lba: u32,
        blocks: &[[u8; SECTOR_SIZE]],
    ) -> Result<(), SdError<SPI::Error>> {
        let arg = self.block_arg(lba);
        let r1 = self.bus.command(cmd::WRITE_MULTIPLE_BLOCK, arg).await?;
        if r1.any_error() {
            return Err(SdError::CommandRejected {
                cmd: cmd::WRITE_MULTIPLE_BLOCK,
                r1,
            });
        }

        let mut failure = None;
        for block in blocks {
            let _ = self.bus.transfer_byte(0xFF).await?;
            self.send_data_packet(token::START_BLOCK_MULTI, block).await?;
            let response = self.wait_data_response(r1).await?;
            match response & token::DATA_RESPONSE_MASK {
                token::DATA_ACCEPTED => {
                    self.wait_not_busy(
                        self.bus.timeouts.busy_polls,
                        SdError::CardBusyTimeout { r1 },
                    )
                    .await?;
                }
                token::DATA_CRC_ERROR => {
                    failure = Some(SdError::CrcErrorToken { r1 });
                    break;
                }
                token::DATA_WRITE_ERROR => {
                    failure = Some(SdError::WriteErrorToken { r1 });
                    break;
                }
                other => {
                    failure = Some(SdError::InvalidDataResponse { token: other, r1 });
                    break;
                }
            }
        }

        let _ = self.bus.transfer_byte(token::STOP_TRAN).await?;
        let _ = self.bus.transfer_byte(0xFF).await?;
        self.wait_not_busy(self.bus.timeouts.busy_polls, SdError::CardBusyTimeout { r1 })
            .await?;
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Erase every block from `start` to `end` inclusive
    /// (CMD32, CMD33, CMD38).
    pub async fn erase_range(&mut self, start: u32, end: u32) -> Result<(), SdError<SPI::Error>> {
        let r1 = self.command_released(cmd::ERASE_WR_BLK_START_ADDR, self.block_arg(start)).await?;
        if r1.any_error() {
            return Err(SdError::EraseStartRejected { r1 });
        }
        let r1 = self.command_released(cmd::ERASE_WR_BLK_END_ADDR, self.block_arg(end)).await?;
        if r1.any_error() {
            return Err(SdError::EraseEndRejected { r1 });
        }

        let result = self.erase_inner().await;
        self.bus.end_transaction().await;
        self.cached_lba = None;
        result
    }

    async fn erase_inner(&mut self) -> Result<(), SdError<SPI::Error>> {
        let r1 = self.bus.command(cmd::ERASE, 0).await?;
        if r1.any_error() {
            return Err(SdError::EraseRejected { r1 });
        }
        self.wait_not_busy(
            self.bus.timeouts.erase_busy_polls,
            SdError::EraseBusyTimeout { r1 },
        )
        .await
    }

    /// Number of blocks a failed CMD25 burst wrote intact
    /// (CMD55 + ACMD22, big-endian counter).
    pub async fn well_written_blocks(&mut self) -> Result<u32, SdError<SPI::Error>> {
        let result = self.well_written_inner().await;
        self.bus.end_transaction().await;
        result
    }

    async fn well_written_inner(&mut self) -> Result<u32, SdError<SPI::Error>> {
        let r1 = self.bus.command(cmd::APP_CMD, 0).await?;
        if r1.any_error() {
            return Err(SdError::CommandRejected {
                cmd: cmd::APP_CMD,
                r1,
            });
        }
        let r1 = self.bus.command(cmd::SEND_NUM_WR_BLOCKS, 0).await?;
        if r1.any_error() {
            return Err(SdError::CommandRejected {
                cmd: cmd::SEND_NUM_WR_BLOCKS,
                r1,
            });
        }
        self.wait_start_token(r1).await?;
        let mut count = [0u8; 4];
        for slot in count.iter_mut() {
            *slot = self.bus.transfer_byte(0xFF).await?;
        }
        let _ = self.bus.transfer_byte(0xFF).await?;
        let _ = self.bus.transfer_byte(0xFF).await?;
        Ok(u32::from_be_bytes(count))
    }

    async fn command_released(&mut self, command: u8, arg: u32) -> Result<R1, SdError<SPI::Error>> {
        let result = self.bus.command(command, arg).await;
        self.bus.end_transaction().await;
        result
    }

    async fn send_data_packet(
        &mut self,
        start_token: u8,
        data: &[u8; SECTOR_SIZE],
    ) -> Result<(), SdError<SPI::Error>> {
        let _ = self.bus.transfer_byte(start_token).await?;
        for &byte in data.iter() {
            let _ = self.bus.transfer_byte(byte).await?;
        }
        // Dummy CRC16.
        let _ = self.bus.transfer_byte(0xFF).await?;
        let _ = self.bus.transfer_byte(0xFF).await?;
        Ok(())
    }

    async fn wait_start_token(&mut self, r1: R1) -> Result<(), SdError<SPI::Error>> {
        for _ in 0..self.bus.timeouts.start_token_polls {
            let byte = self.bus.transfer_byte(0xFF).await?;
            if byte == token::START_BLOCK {
                return Ok(());
            }
            if byte != 0xFF {
                return Err(SdError::UnexpectedToken { token: byte, r1 });
            }
        }
        Err(SdError::StartTokenTimeout { r1 })
    }

    async fn wait_data_response(&mut self, r1: R1) -> Result<u8, SdError<SPI::Error>> {
        for _ in 0..self.bus.timeouts.data_response_polls {
            let byte = self.bus.transfer_byte(0xFF).await?;
            match byte & token::DATA_RESPONSE_MASK {
                token::DATA_ACCEPTED | token::DATA_CRC_ERROR | token::DATA_WRITE_ERROR => {
                    return Ok(byte)
                }
                _ => {}
            }
        }
        Err(SdError::DataResponseTimeout { r1 })
    }

    async fn wait_not_busy(
        &mut self,
        polls: u32,
        on_timeout: SdError<SPI::Error>,
    ) -> Result<(), SdError<SPI::Error>> {
        for _ in 0..polls {
            if self.bus.transfer_byte(0xFF).await? != 0x00 {
                return Ok(());
            }
        }
        Err(on_timeout)
    }

    /// Clock out idle bytes with CS high; some cards want this between
    /// transactions after power events.
    pub async fn idle_clocks(&mut self, bytes: usize) -> Result<(), SdError<SPI::Error>> {
        self.bus.send_dummy_clocks(bytes).await
    }
}

impl<SPI, CS> BlockDevice for SdCard<SPI, CS>
where
    SPI: SpiBus,
    CS: OutputPin,
{
    type Error = SdError<SPI::Error>;

    async fn read_sector(
        &mut self,
        lba: u32,
        out: &mut [u8; SECTOR_SIZE],
    ) -> Result<(), Self::Error> {
        if self.cached_lba == Some(lba) {
            out.copy_from_slice(&self.cache);
            return Ok(());
        }
        self.read_block(lba, out).await?;
        self.cache.copy_from_slice(out);
        self.cached_lba = Some(lba);
        Ok(())
    }
}
