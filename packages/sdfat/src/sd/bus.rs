use embedded_hal::digital::OutputPin;
use embedded_hal_async::spi::SpiBus;

use super::{R1, SdError, Timeouts};

/// Exclusively owned SPI bus plus chip-select line.
///
/// Every transaction asserts CS before the first byte and must finish with
/// [`SdBus::end_transaction`]; the [`SdCard`](super::SdCard) operations run
/// their bodies under a wrapper that guarantees this on all exit paths.
pub struct SdBus<SPI, CS> {
    spi: SPI,
    cs: CS,
    pub(crate) timeouts: Timeouts,
}

impl<SPI, CS> SdBus<SPI, CS>
where
    SPI: SpiBus,
    CS: OutputPin,
{
    pub fn new(spi: SPI, mut cs: CS, timeouts: Timeouts) -> Result<Self, SdError<SPI::Error>> {
        cs.set_high().map_err(|_| SdError::ChipSelect)?;
        Ok(Self { spi, cs, timeouts })
    }

    pub(crate) async fn transfer_byte(&mut self, byte: u8) -> Result<u8, SdError<SPI::Error>> {
        let mut frame = [byte];
        self.spi
            .transfer_in_place(&mut frame)
            .await
            .map_err(SdError::Bus)?;
        Ok(frame[0])
    }

    pub(crate) async fn send_dummy_clocks(&mut self, bytes: usize) -> Result<(), SdError<SPI::Error>> {
        for _ in 0..bytes {
            let _ = self.transfer_byte(0xFF).await?;
        }
        Ok(())
    }

    /// Write the 6-byte command frame with CS asserted. Does not read R1.
    pub(crate) async fn command_frame(
        &mut self,
        cmd: u8,
        arg: u32,
    ) -> Result<(), SdError<SPI::Error>> {
        // CRC matters only for the bring-up commands, which are out of scope
        // here; data commands go out with the 0xFF placeholder.
        let frame = [
            0x40 | cmd,
            (arg >> 24) as u8,
            (arg >> 16) as u8,
            (arg >> 8) as u8,
            arg as u8,
            0xFF,
        ];
        self.cs.set_low().map_err(|_| SdError::ChipSelect)?;
        for byte in frame {
            let _ = self.transfer_byte(byte).await?;
        }
        Ok(())
    }

    /// Poll for the R1 response: the first byte with the MSB clear, within
    /// the command poll bound.
    pub(crate) async fn read_r1(&mut self, cmd: u8) -> Result<R1, SdError<SPI::Error>> {
        for _ in 0..self.timeouts.command_polls {
            let byte = self.transfer_byte(0xFF).await?;
            if byte & 0x80 == 0 {
                return Ok(R1(byte));
            }
        }
        self.end_transaction().await;
        Err(SdError::NoResponse { cmd })
    }

    /// Command frame plus R1 poll; CS stays asserted on success.
    pub(crate) async fn command(&mut self, cmd: u8, arg: u32) -> Result<R1, SdError<SPI::Error>> {
        self.command_frame(cmd, arg).await?;
        self.read_r1(cmd).await
    }

    /// Deassert CS and clock one trailing byte so the card releases DO.
    pub(crate) async fn end_transaction(&mut self) {
        let _ = self.cs.set_high();
        let _ = self.transfer_byte(0xFF).await;
    }
}
