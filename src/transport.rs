//! A byte-oriented host transport.
//!
//! Real SD hosts clock bits, but an emulator usually sits at the end of a
//! byte pipe: a UART, a USB endpoint, a socket in a test. [`ByteLink`]
//! drives a [`LinkLayer`] from anything that implements `embedded_io`'s
//! [`Read`] and [`Write`], one host transaction per call to
//! [`ByteLink::service`].
//!
//! What the host sends, and what it gets back:
//!
//! * `0xFF` is an idle clock. The answer is a single `0xFF` (nothing to
//!   say), a single `0x00` (busy), or a whole data block: `0xFE`, the data,
//!   then its CRC16, big-endian.
//! * A byte of the form `0b01xx_xxxx` starts a six byte command frame. The
//!   answer is the response, if there is one.
//! * `0xFE` starts a block of write data: 512 bytes then the CRC16,
//!   big-endian. The answer is a data response token.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_io::{Read, ReadExactError, Write};

use crate::blockdevice::BLOCK_LEN;
use crate::link::{CardState, DataResponse, LinkLayer, ReadPoll};
use crate::proto::{DATA_START_BLOCK, FRAME_DIRECTION_MASK, FRAME_HOST_TO_CARD};
use crate::{trace, warn};

/// What the host clocks when it has nothing to say
pub const IDLE_BYTE: u8 = 0xFF;

/// What the card sends while it is busy
pub const BUSY_BYTE: u8 = 0x00;

/// All the ways the transport can fail.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError<E> {
    /// The underlying stream threw an error
    Io(E),
    /// The stream ended, possibly part way through a transaction
    Eof,
    /// The card gave up on a stalled transfer
    Link(crate::Error),
}

impl<E> From<ReadExactError<E>> for LinkError<E> {
    fn from(value: ReadExactError<E>) -> LinkError<E> {
        match value {
            ReadExactError::UnexpectedEof => LinkError::Eof,
            ReadExactError::Other(e) => LinkError::Io(e),
        }
    }
}

/// Drives a [`LinkLayer`] from a byte stream.
pub struct ByteLink<T> {
    io: T,
    block: [u8; BLOCK_LEN],
}

impl<T> ByteLink<T>
where
    T: Read + Write,
{
    /// Wrap a stream.
    pub fn new(io: T) -> ByteLink<T> {
        ByteLink {
            io,
            block: [0u8; BLOCK_LEN],
        }
    }

    /// Get at the stream.
    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.io
    }

    /// Give back the stream.
    pub fn into_inner(self) -> T {
        self.io
    }

    /// Handle one host transaction.
    ///
    /// Blocks until the host sends something. A stall timeout is reported
    /// after the card has answered, so the stream stays in step.
    pub fn service<M>(&mut self, link: &mut LinkLayer<'_, M>) -> Result<(), LinkError<T::Error>>
    where
        M: RawMutex,
    {
        let mut first = [0u8; 1];
        self.io.read_exact(&mut first)?;
        let result = match first[0] {
            IDLE_BYTE => self.idle_clock(link),
            DATA_START_BLOCK => self.write_block(link),
            byte if (byte & FRAME_DIRECTION_MASK) == FRAME_HOST_TO_CARD => {
                self.command(link, byte)
            }
            byte => {
                trace!("Ignoring stray byte {:02x}", byte);
                Ok(())
            }
        };
        self.io.flush().map_err(LinkError::Io)?;
        result
    }

    /// Keep handling transactions until the stream runs dry.
    pub fn run<M>(&mut self, link: &mut LinkLayer<'_, M>) -> Result<(), LinkError<T::Error>>
    where
        M: RawMutex,
    {
        loop {
            match self.service(link) {
                Ok(()) => {}
                Err(LinkError::Eof) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn command<M>(&mut self, link: &mut LinkLayer<'_, M>, first: u8) -> Result<(), LinkError<T::Error>>
    where
        M: RawMutex,
    {
        let mut rest = [0u8; 5];
        self.io.read_exact(&mut rest)?;
        let mut response = link.feed_byte(first);
        for byte in rest {
            if let Some(r) = link.feed_byte(byte) {
                response = Some(r);
            }
        }
        if let Some(response) = response {
            self.io
                .write_all(response.as_bytes())
                .map_err(LinkError::Io)?;
        }
        Ok(())
    }

    fn idle_clock<M>(&mut self, link: &mut LinkLayer<'_, M>) -> Result<(), LinkError<T::Error>>
    where
        M: RawMutex,
    {
        if link.state() == CardState::SendData {
            let len = link.register_len().unwrap_or(BLOCK_LEN);
            match link.read_data(&mut self.block[..len]) {
                Ok(ReadPoll::Data { len, crc }) => {
                    self.io.write_all(&[DATA_START_BLOCK]).map_err(LinkError::Io)?;
                    self.io
                        .write_all(&self.block[..len])
                        .map_err(LinkError::Io)?;
                    self.io.write_all(&crc.to_be_bytes()).map_err(LinkError::Io)?;
                    Ok(())
                }
                Ok(ReadPoll::Busy) => self.io.write_all(&[IDLE_BYTE]).map_err(LinkError::Io),
                Err(e) => {
                    self.io.write_all(&[IDLE_BYTE]).map_err(LinkError::Io)?;
                    Err(LinkError::Link(e))
                }
            }
        } else {
            match link.busy() {
                Ok(true) => self.io.write_all(&[BUSY_BYTE]).map_err(LinkError::Io),
                Ok(false) => self.io.write_all(&[IDLE_BYTE]).map_err(LinkError::Io),
                Err(e) => {
                    self.io.write_all(&[IDLE_BYTE]).map_err(LinkError::Io)?;
                    Err(LinkError::Link(e))
                }
            }
        }
    }

    fn write_block<M>(&mut self, link: &mut LinkLayer<'_, M>) -> Result<(), LinkError<T::Error>>
    where
        M: RawMutex,
    {
        self.io.read_exact(&mut self.block)?;
        let mut crc = [0u8; 2];
        self.io.read_exact(&mut crc)?;
        let response = match link.write_data(&self.block, u16::from_be_bytes(crc)) {
            Ok(response) => response,
            Err(e) => {
                warn!("Write data refused: {:?}", e);
                DataResponse::Rejected
            }
        };
        self.io
            .write_all(&[response.token()])
            .map_err(LinkError::Io)
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
