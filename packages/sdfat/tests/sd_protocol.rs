//! Wire-level tests of the SPI-mode protocol layer: command framing, token
//! handling, error paths and chip-select discipline, all over a scripted
//! bus.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;

use embassy_futures::block_on;
use sdfat::sd::{Addressing, R1, SdCard, SdError, Timeouts};
use sdfat::{BlockDevice, SECTOR_SIZE};

#[derive(Default)]
struct SpiLog {
    responses: VecDeque<u8>,
    sent: Vec<u8>,
}

#[derive(Clone, Default)]
struct ScriptSpi {
    log: Rc<RefCell<SpiLog>>,
}

impl embedded_hal::spi::ErrorType for ScriptSpi {
    type Error = Infallible;
}

impl embedded_hal_async::spi::SpiBus for ScriptSpi {
    async fn read(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        for word in words.iter_mut() {
            let mut log = self.log.borrow_mut();
            log.sent.push(0xFF);
            *word = log.responses.pop_front().unwrap_or(0xFF);
        }
        Ok(())
    }

    async fn write(&mut self, words: &[u8]) -> Result<(), Infallible> {
        let mut log = self.log.borrow_mut();
        for &word in words {
            log.sent.push(word);
            let _ = log.responses.pop_front();
        }
        Ok(())
    }

    async fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Infallible> {
        let mut log = self.log.borrow_mut();
        for at in 0..read.len().max(write.len()) {
            log.sent.push(write.get(at).copied().unwrap_or(0xFF));
            let response = log.responses.pop_front().unwrap_or(0xFF);
            if let Some(slot) = read.get_mut(at) {
                *slot = response;
            }
        }
        Ok(())
    }

    async fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        let mut log = self.log.borrow_mut();
        for word in words.iter_mut() {
            log.sent.push(*word);
            *word = log.responses.pop_front().unwrap_or(0xFF);
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

#[derive(Clone)]
struct ScriptCs {
    high: Rc<Cell<bool>>,
}

impl embedded_hal::digital::ErrorType for ScriptCs {
    type Error = Infallible;
}

impl embedded_hal::digital::OutputPin for ScriptCs {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.high.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.high.set(true);
        Ok(())
    }
}

struct Rig {
    card: SdCard<ScriptSpi, ScriptCs>,
    log: Rc<RefCell<SpiLog>>,
    cs_high: Rc<Cell<bool>>,
}

fn rig(responses: Vec<u8>) -> Rig {
    let spi = ScriptSpi::default();
    let log = spi.log.clone();
    log.borrow_mut().responses = responses.into();
    let cs_high = Rc::new(Cell::new(false));
    let cs = ScriptCs {
        high: cs_high.clone(),
    };
    let timeouts = Timeouts {
        command_polls: 8,
        start_token_polls: 8,
        data_response_polls: 8,
        busy_polls: 16,
        erase_busy_polls: 16,
    };
    let card = SdCard::with_timeouts(spi, cs, Addressing::Block, timeouts).unwrap();
    Rig { card, log, cs_high }
}

fn frame_and_r1(script: &mut Vec<u8>, r1: u8) {
    // Six don't-care bytes while the frame goes out, then R1 on the first
    // poll.
    script.extend_from_slice(&[0xFF; 6]);
    script.push(r1);
}

fn sent(rig: &Rig) -> Vec<u8> {
    rig.log.borrow().sent.clone()
}

#[test]
fn read_block_frames_cmd17_and_returns_payload() {
    let payload: Vec<u8> = (0..SECTOR_SIZE).map(|at| at as u8).collect();
    let mut script = Vec::new();
    frame_and_r1(&mut script, 0x00);
    script.extend_from_slice(&[0xFF, 0xFE]);
    script.extend_from_slice(&payload);
    script.extend_from_slice(&[0xFF; 3]); // CRC16 + drain

    let mut rig = rig(script);
    let mut out = [0u8; SECTOR_SIZE];
    block_on(rig.card.read_block(42, &mut out)).unwrap();

    assert_eq!(&out[..], &payload[..]);
    let sent = sent(&rig);
    assert_eq!(&sent[..6], &[0x51, 0x00, 0x00, 0x00, 42, 0xFF]);
    assert!(rig.cs_high.get());
}

#[test]
fn read_block_surfaces_r1_rejection() {
    let mut script = Vec::new();
    frame_and_r1(&mut script, 0x05);

    let mut rig = rig(script);
    let mut out = [0u8; SECTOR_SIZE];
    assert_eq!(
        block_on(rig.card.read_block(7, &mut out)),
        Err(SdError::CommandRejected {
            cmd: 17,
            r1: R1(0x05)
        })
    );
    assert!(rig.cs_high.get());
}

#[test]
fn read_block_times_out_waiting_for_start_token() {
    let mut script = Vec::new();
    frame_and_r1(&mut script, 0x00);
    // Nothing but idle bytes afterwards.

    let mut rig = rig(script);
    let mut out = [0u8; SECTOR_SIZE];
    assert_eq!(
        block_on(rig.card.read_block(7, &mut out)),
        Err(SdError::StartTokenTimeout { r1: R1(0x00) })
    );
    assert!(rig.cs_high.get());
}

#[test]
fn write_block_sends_token_and_waits_out_busy() {
    let data = [0xA5u8; SECTOR_SIZE];
    let mut script = Vec::new();
    frame_and_r1(&mut script, 0x00);
    script.extend_from_slice(&[0xFF; 516]); // gap + token + data + CRC echoes
    script.push(0xE5); // data-response: accepted
    script.extend_from_slice(&[0x00, 0x00, 0xFF]); // busy, then released

    let mut rig = rig(script);
    block_on(rig.card.write_block(9, &data)).unwrap();

    let sent = sent(&rig);
    assert_eq!(&sent[..6], &[0x58, 0x00, 0x00, 0x00, 9, 0xFF]);
    assert_eq!(sent[8], 0xFE);
    assert_eq!(&sent[9..9 + SECTOR_SIZE], &data[..]);
    assert!(rig.cs_high.get());
}

#[test]
fn write_block_reports_crc_error_token() {
    let data = [0x11u8; SECTOR_SIZE];
    let mut script = Vec::new();
    frame_and_r1(&mut script, 0x00);
    script.extend_from_slice(&[0xFF; 516]);
    script.push(0xEB); // data-response: CRC error

    let mut rig = rig(script);
    assert_eq!(
        block_on(rig.card.write_block(9, &data)),
        Err(SdError::CrcErrorToken { r1: R1(0x00) })
    );
    assert!(rig.cs_high.get());
}

#[test]
fn write_block_times_out_when_card_stays_busy() {
    let data = [0x22u8; SECTOR_SIZE];
    let mut script = Vec::new();
    frame_and_r1(&mut script, 0x00);
    script.extend_from_slice(&[0xFF; 516]);
    script.push(0xE5);
    script.extend_from_slice(&[0x00; 32]); // busy past the poll bound

    let mut rig = rig(script);
    assert_eq!(
        block_on(rig.card.write_block(9, &data)),
        Err(SdError::CardBusyTimeout { r1: R1(0x00) })
    );
    assert!(rig.cs_high.get());
}

#[test]
fn write_blocks_terminates_stream_after_crc_failure() {
    let blocks = [[0x01u8; SECTOR_SIZE], [0x02u8; SECTOR_SIZE]];
    let mut script = Vec::new();
    frame_and_r1(&mut script, 0x00);
    script.extend_from_slice(&[0xFF; 516]); // first block body
    script.push(0xEB); // CRC error token for block 0
    script.extend_from_slice(&[0xFF, 0xFF, 0xFF]); // stop token echo, gap, not busy

    let mut rig = rig(script);
    assert_eq!(
        block_on(rig.card.write_blocks(30, &blocks)),
        Err(SdError::CrcErrorToken { r1: R1(0x00) })
    );

    let sent = sent(&rig);
    assert_eq!(sent[8], 0xFC);
    // The stop-transmission token still goes out after the aborted block.
    assert_eq!(sent[524], 0xFD);
    assert!(rig.cs_high.get());
}

#[test]
fn well_written_blocks_decodes_big_endian_count() {
    let mut script = Vec::new();
    frame_and_r1(&mut script, 0x00); // CMD55
    frame_and_r1(&mut script, 0x00); // ACMD22
    script.push(0xFE);
    script.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
    script.extend_from_slice(&[0xFF; 2]); // CRC16

    let mut rig = rig(script);
    assert_eq!(block_on(rig.card.well_written_blocks()), Ok(1));

    let sent = sent(&rig);
    assert_eq!(sent[0], 0x40 | 55);
    assert_eq!(sent[7], 0x40 | 22);
    assert!(rig.cs_high.get());
}

#[test]
fn erase_range_walks_the_command_sequence() {
    let mut script = Vec::new();
    frame_and_r1(&mut script, 0x00); // CMD32
    script.push(0xFF); // end-transaction clock
    frame_and_r1(&mut script, 0x00); // CMD33
    script.push(0xFF);
    frame_and_r1(&mut script, 0x00); // CMD38
    script.extend_from_slice(&[0x00, 0xFF]); // busy, released

    let mut rig = rig(script);
    block_on(rig.card.erase_range(2, 5)).unwrap();

    let sent = sent(&rig);
    assert_eq!(&sent[..6], &[0x40 | 32, 0x00, 0x00, 0x00, 2, 0xFF]);
    assert_eq!(sent[8], 0x40 | 33);
    assert_eq!(sent[12], 5);
    assert!(rig.cs_high.get());
}

#[test]
fn erase_range_reports_rejected_end_address() {
    let mut script = Vec::new();
    frame_and_r1(&mut script, 0x00); // CMD32 accepted
    script.push(0xFF);
    frame_and_r1(&mut script, 0x40); // CMD33 parameter error

    let mut rig = rig(script);
    assert_eq!(
        block_on(rig.card.erase_range(2, 5)),
        Err(SdError::EraseEndRejected { r1: R1(0x40) })
    );
    assert!(rig.cs_high.get());
}

#[test]
fn read_sector_serves_repeat_reads_from_the_cache() {
    let payload: Vec<u8> = (0..SECTOR_SIZE).map(|at| (at % 7) as u8).collect();
    let mut script = Vec::new();
    frame_and_r1(&mut script, 0x00);
    script.extend_from_slice(&[0xFF, 0xFE]);
    script.extend_from_slice(&payload);
    script.extend_from_slice(&[0xFF; 3]);

    let mut rig = rig(script);
    let mut first = [0u8; SECTOR_SIZE];
    block_on(rig.card.read_sector(3, &mut first)).unwrap();
    let traffic_after_first = rig.log.borrow().sent.len();

    let mut second = [0u8; SECTOR_SIZE];
    block_on(rig.card.read_sector(3, &mut second)).unwrap();

    assert_eq!(first, second);
    assert_eq!(rig.log.borrow().sent.len(), traffic_after_first);
    assert!(rig.cs_high.get());
}
