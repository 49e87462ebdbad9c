//! # embedded-sdemu
//!
//! > An SD card, from the card's side, written in Embedded Rust
//!
//! This crate lets your Rust Embedded device pretend to be an SD card. It
//! implements the card's half of the SD protocol (native SD mode, block
//! addressed, one 512 byte block at a time) and hands every block to your
//! software to deal with. It is written in pure-Rust, is `#![no_std]` and
//! does not use `alloc` or `collections` to keep the memory footprint low.
//!
//! The emulator is split across two domains:
//!
//! * The protocol domain, a [`LinkLayer`], which the host talks to. Feed it
//!   command frames (or raw bits, or bytes through a [`ByteLink`]) and it
//!   answers the way a card would.
//! * The consumer domain, a [`Manager`], which supplies and stores the
//!   blocks. It sees block requests raised by the card, moves data through
//!   the [`BufferPair`], and acknowledges each block with a strobe.
//!
//! The two only meet in a [`Bridge`], which can be a `static` and can be
//! shared between threads or interrupt priorities if you pick a suitable
//! `embassy-sync` raw mutex.
//!
//! ## Using the crate
//!
//! You will need something that implements the [`BlockDevice`] trait to
//! keep the card's blocks in.
//!
//! ```rust
//! use embassy_sync::blocking_mutex::raw::NoopRawMutex;
//! use embedded_sdemu::{BlockDevice, Bridge, CommandFrame, LinkLayer, Manager, ReadPoll};
//!
//! fn example<D: BlockDevice>(device: &mut D) -> Result<(), embedded_sdemu::manager::Error<D::Error>> {
//!     let bridge: Bridge<NoopRawMutex> = Bridge::new();
//!     let mut card = LinkLayer::new(&bridge);
//!     let mut manager = Manager::new(&bridge);
//!     // ... the host identifies and selects the card, then asks for block 0
//!     let response = card.command(&CommandFrame::new(17, 0));
//!     println!("Card said {:02x?}", response.as_bytes());
//!     // The consumer supplies it
//!     let events = manager.service(device)?;
//!     println!("Serviced {:?}", events);
//!     // And the host clocks it out
//!     let mut block = [0u8; 512];
//!     if let Ok(ReadPoll::Data { crc, .. }) = card.read_data(&mut block) {
//!         println!("Block 0 has CRC {:04x}", crc);
//!     }
//!     println!("{}", manager.status());
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! * `log`: Enabled by default. Generates log messages using the `log` crate.
//! * `defmt-log`: By turning off the default features and enabling the
//!   `defmt-log` feature you can configure this crate to log messages over defmt
//!   instead.
//!
//! You cannot enable both the `log` feature and the `defmt-log` feature.

#![cfg_attr(not(test), no_std)]

#[cfg(test)]
#[macro_use]
extern crate hex_literal;

#[macro_use]
mod structure;

pub mod blockdevice;
pub mod bridge;
pub mod buffer;
pub mod command;
pub mod link;
pub mod manager;
pub mod proto;
pub mod registers;
pub mod response;
pub mod sequencer;
pub mod transport;

#[doc(inline)]
pub use crate::blockdevice::{Block, BlockCount, BlockDevice, BlockIdx, BlockIter, BLOCK_LEN};

#[doc(inline)]
pub use crate::bridge::{Bridge, Events, LinkStats, ManagerStatus, Pending};

#[doc(inline)]
pub use crate::buffer::{BufferPair, Direction, Port};

#[doc(inline)]
pub use crate::command::{CommandDecoder, CommandFrame};

#[doc(inline)]
pub use crate::link::{CardState, DataResponse, EmulatorOpts, LinkLayer, ReadPoll};

#[doc(inline)]
pub use crate::manager::Manager;

#[doc(inline)]
pub use crate::registers::{
    CardStatus, Cid, Csd, Ocr, Scr, SdStatus, SwitchStatus, CSD_SIZE_UNIT,
};

#[doc(inline)]
pub use crate::response::{Reply, ResponseFrame, ResponseGenerator, ResponseKind};

#[doc(inline)]
pub use crate::sequencer::{BlockRequest, EraseRange};

#[doc(inline)]
pub use crate::transport::{ByteLink, LinkError};

#[cfg(all(feature = "defmt-log", feature = "log"))]
compile_error!("Cannot enable both log and defmt-log");

#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::debug! but does nothing at all
macro_rules! debug {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::trace! but does nothing at all
macro_rules! trace {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::warn! but does nothing at all
macro_rules! warn {
    ($($arg:tt)+) => {};
}

// ****************************************************************************
//
// Public Types
//
// ****************************************************************************

/// All the ways the emulator can refuse an operation.
///
/// Protocol errors on the host's part are not in here. The card reports
/// those to the host in its status, and to the consumer in the
/// [`ManagerStatus`] flags, and carries on.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The consumer took too long to acknowledge a block. The transfer has
    /// been abandoned.
    StallTimeout,
    /// The card isn't in a state where it can do that
    BadState,
    /// The buffer belongs to the other side at the moment
    BufferBusy,
    /// That address (or word index) is outside the buffers
    OutOfBounds(u32),
    /// The data was the wrong length for the data phase under way
    WrongLength(usize),
    /// There is no data phase under way
    NoDataPhase,
}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Error::StallTimeout => embedded_io::ErrorKind::TimedOut,
            Error::BadState | Error::BufferBusy => embedded_io::ErrorKind::Other,
            Error::OutOfBounds(_) | Error::WrongLength(_) | Error::NoDataPhase => {
                embedded_io::ErrorKind::InvalidInput
            }
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::StallTimeout => write!(f, "consumer stalled the transfer"),
            Error::BadState => write!(f, "not possible in the current card state"),
            Error::BufferBusy => write!(f, "buffer owned by the other port"),
            Error::OutOfBounds(address) => write!(f, "address {:#x} outside the buffers", address),
            Error::WrongLength(len) => write!(f, "wrong data length {}", len),
            Error::NoDataPhase => write!(f, "no data phase under way"),
        }
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
