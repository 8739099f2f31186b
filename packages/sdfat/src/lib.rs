#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait)]

pub mod blockdev;
pub mod console;
pub mod fat;
pub mod sd;

#[cfg(test)]
pub(crate) mod testsupport;

pub use blockdev::{BlockDevice, SECTOR_SIZE};
pub use console::Console;

/// Longest long name the engine will assemble, in bytes.
pub const NAME_MAX: usize = 255;
/// Longest slash-delimited parent path a directory cursor can carry.
pub const PATH_MAX: usize = 512;
