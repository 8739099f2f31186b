//! SD card access in SPI mode: command framing, R1 handling and the
//! single/multi block data phases from the SD Physical Layer spec.
//!
//! Card bring-up (CMD0/CMD8/ACMD41) is the caller's job; construct
//! [`SdCard`] with the addressing mode bring-up negotiated.

mod bus;
mod card;

pub use card::{Addressing, SdCard};

pub(crate) use bus::SdBus;

use core::fmt;

pub(crate) mod cmd {
    pub const STOP_TRANSMISSION: u8 = 12;
    pub const READ_SINGLE_BLOCK: u8 = 17;
    pub const READ_MULTIPLE_BLOCK: u8 = 18;
    pub const WRITE_BLOCK: u8 = 24;
    pub const WRITE_MULTIPLE_BLOCK: u8 = 25;
    pub const ERASE_WR_BLK_START_ADDR: u8 = 32;
    pub const ERASE_WR_BLK_END_ADDR: u8 = 33;
    pub const ERASE: u8 = 38;
    pub const APP_CMD: u8 = 55;
    /// ACMD22, valid only after APP_CMD.
    pub const SEND_NUM_WR_BLOCKS: u8 = 22;
}

pub(crate) mod token {
    pub const START_BLOCK: u8 = 0xFE;
    pub const START_BLOCK_MULTI: u8 = 0xFC;
    pub const STOP_TRAN: u8 = 0xFD;
    pub const DATA_RESPONSE_MASK: u8 = 0x1F;
    pub const DATA_ACCEPTED: u8 = 0x05;
    pub const DATA_CRC_ERROR: u8 = 0x0B;
    pub const DATA_WRITE_ERROR: u8 = 0x0D;
}

/// The one-byte status the card returns after every command in SPI mode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct R1(pub u8);

impl R1 {
    pub const fn in_idle_state(self) -> bool {
        self.0 & 0x01 != 0
    }
    pub const fn erase_reset(self) -> bool {
        self.0 & 0x02 != 0
    }
    pub const fn illegal_command(self) -> bool {
        self.0 & 0x04 != 0
    }
    pub const fn com_crc_error(self) -> bool {
        self.0 & 0x08 != 0
    }
    pub const fn erase_sequence_error(self) -> bool {
        self.0 & 0x10 != 0
    }
    pub const fn address_error(self) -> bool {
        self.0 & 0x20 != 0
    }
    pub const fn parameter_error(self) -> bool {
        self.0 & 0x40 != 0
    }

    /// Any bit set means the command was not accepted cleanly.
    pub const fn any_error(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for R1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)?;
        const FLAGS: [(u8, &str); 7] = [
            (0x01, "IN_IDLE_STATE"),
            (0x02, "ERASE_RESET"),
            (0x04, "ILLEGAL_COMMAND"),
            (0x08, "COM_CRC_ERROR"),
            (0x10, "ERASE_SEQUENCE_ERROR"),
            (0x20, "ADDRESS_ERROR"),
            (0x40, "PARAMETER_ERROR"),
        ];
        let mut first = true;
        for (bit, name) in FLAGS {
            if self.0 & bit != 0 {
                write!(f, "{}{}", if first { " [" } else { "|" }, name)?;
                first = false;
            }
        }
        if !first {
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// Poll-iteration bounds for every wait class in the protocol. Each bound is
/// a count of dummy-byte exchanges, not wall time.
#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    /// R1 wait after the 6-byte command frame.
    pub command_polls: u32,
    /// Wait for the 0xFE start-block token before a data phase.
    pub start_token_polls: u32,
    /// Wait for the data-response token after sending a block.
    pub data_response_polls: u32,
    /// Wait for the card to release DO after a write.
    pub busy_polls: u32,
    /// Wait for the card to release DO after CMD38.
    pub erase_busy_polls: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command_polls: 0xFF,
            start_token_polls: 50_000,
            data_response_polls: 10_000,
            busy_polls: 200_000,
            erase_busy_polls: 500_000,
        }
    }
}

/// Failure of an SD operation. The operation-level kind and the raw R1 byte
/// are carried separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError<E> {
    /// SPI transfer failed.
    Bus(E),
    /// Chip-select pin refused to switch.
    ChipSelect,
    /// No byte with the MSB clear arrived within the R1 poll bound.
    NoResponse { cmd: u8 },
    /// R1 reported an error for the given command.
    CommandRejected { cmd: u8, r1: R1 },
    StartTokenTimeout { r1: R1 },
    /// A non-0xFF byte arrived where a start-block token was expected.
    UnexpectedToken { token: u8, r1: R1 },
    DataResponseTimeout { r1: R1 },
    CrcErrorToken { r1: R1 },
    WriteErrorToken { r1: R1 },
    InvalidDataResponse { token: u8, r1: R1 },
    CardBusyTimeout { r1: R1 },
    EraseStartRejected { r1: R1 },
    EraseEndRejected { r1: R1 },
    EraseRejected { r1: R1 },
    EraseBusyTimeout { r1: R1 },
}

impl<E> SdError<E> {
    /// The R1 byte attached to the failure, when the exchange got that far.
    pub fn r1(&self) -> Option<R1> {
        match *self {
            SdError::Bus(_) | SdError::ChipSelect | SdError::NoResponse { .. } => None,
            SdError::CommandRejected { r1, .. }
            | SdError::StartTokenTimeout { r1 }
            | SdError::UnexpectedToken { r1, .. }
            | SdError::DataResponseTimeout { r1 }
            | SdError::CrcErrorToken { r1 }
            | SdError::WriteErrorToken { r1 }
            | SdError::InvalidDataResponse { r1, .. }
            | SdError::CardBusyTimeout { r1 }
            | SdError::EraseStartRejected { r1 }
            | SdError::EraseEndRejected { r1 }
            | SdError::EraseRejected { r1 }
            | SdError::EraseBusyTimeout { r1 } => Some(r1),
        }
    }
}

impl<E> fmt::Display for SdError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdError::Bus(_) => write!(f, "SPI_BUS_ERROR"),
            SdError::ChipSelect => write!(f, "CHIP_SELECT_ERROR"),
            SdError::NoResponse { cmd } => write!(f, "NO_RESPONSE (CMD{})", cmd),
            SdError::CommandRejected { cmd, r1 } => {
                write!(f, "R1_ERROR (CMD{}, R1 {})", cmd, r1)
            }
            SdError::StartTokenTimeout { .. } => write!(f, "START_TOKEN_TIMEOUT"),
            SdError::UnexpectedToken { token, .. } => {
                write!(f, "UNEXPECTED_TOKEN (0x{:02X})", token)
            }
            SdError::DataResponseTimeout { .. } => write!(f, "DATA_RESPONSE_TIMEOUT"),
            SdError::CrcErrorToken { .. } => write!(f, "CRC_ERROR_TOKEN_RECEIVED"),
            SdError::WriteErrorToken { .. } => write!(f, "WRITE_ERROR_TOKEN_RECEIVED"),
            SdError::InvalidDataResponse { token, .. } => {
                write!(f, "INVALID_DATA_RESPONSE (0x{:02X})", token)
            }
            SdError::CardBusyTimeout { .. } => write!(f, "CARD_BUSY_TIMEOUT"),
            SdError::EraseStartRejected { .. } => write!(f, "SET_ERASE_START_ADDR_ERROR"),
            SdError::EraseEndRejected { .. } => write!(f, "SET_ERASE_END_ADDR_ERROR"),
            SdError::EraseRejected { .. } => write!(f, "ERASE_ERROR"),
            SdError::EraseBusyTimeout { .. } => write!(f, "ERASE_BUSY_TIMEOUT"),
        }
    }
}
