//! The consumer side of the emulator.
//!
//! A [`Manager`] is what the software backing the card holds. It can see
//! the status outputs, get at the buffers while it owns them, and pulse the
//! go and done strobes. [`Manager::service`] does the whole job against a
//! [`BlockDevice`], the way an interrupt handler would.

use core::fmt::Debug;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::delay::DelayNs;
use embedded_io::ErrorKind;

use crate::blockdevice::{Block, BlockDevice, BlockIdx, BLOCK_LEN};
use crate::bridge::{Bridge, Events, ManagerStatus};
use crate::buffer::{Direction, Port};
use crate::sequencer::EraseRange;
use crate::{debug, trace};

// ****************************************************************************
//
// Public Types
//
// ****************************************************************************

/// All the ways servicing the card can fail.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error<E>
where
    E: Debug,
{
    /// The underlying block device threw an error.
    DeviceError(E),
    /// The emulator refused the operation.
    Link(crate::Error),
}

impl<E: Debug> From<crate::Error> for Error<E> {
    fn from(value: crate::Error) -> Error<E> {
        Error::Link(value)
    }
}

impl<E: Debug> embedded_io::Error for Error<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::DeviceError(_) => ErrorKind::Other,
            Error::Link(e) => embedded_io::Error::kind(e),
        }
    }
}

/// Hands blocks between the emulated card and whatever backs it.
pub struct Manager<'a, M: RawMutex> {
    bridge: &'a Bridge<M>,
    read_count: u32,
    write_count: u32,
    erases_seen: u32,
}

// ****************************************************************************
//
// Public Impl
//
// ****************************************************************************

impl<'a, M> Manager<'a, M>
where
    M: RawMutex,
{
    /// Create a new consumer for the given bridge.
    pub fn new(bridge: &'a Bridge<M>) -> Manager<'a, M> {
        Manager {
            bridge,
            read_count: 0,
            write_count: 0,
            erases_seen: bridge.status().stats.erases,
        }
    }

    /// The status outputs, as last published.
    pub fn status(&self) -> ManagerStatus {
        self.bridge.status()
    }

    /// Which requests are waiting. These stay set until serviced.
    pub fn events(&self) -> Events {
        self.bridge.events()
    }

    /// Blocks this manager has supplied to the card.
    pub fn read_count(&self) -> u32 {
        self.read_count
    }

    /// Blocks this manager has taken from the card.
    pub fn write_count(&self) -> u32 {
        self.write_count
    }

    /// The erase parameters the host last set up.
    pub fn erase_range(&self) -> EraseRange {
        self.status().erase_range()
    }

    /// Put a block in the read buffer.
    pub fn fill_read_buffer(&self, block: &Block) -> Result<(), crate::Error> {
        self.bridge
            .with_buffers(|buffers| buffers.load(Port::Consumer, Direction::Read, block))
    }

    /// Copy the block out of the write buffer.
    pub fn drain_write_buffer(&self, block: &mut Block) -> Result<(), crate::Error> {
        self.bridge
            .with_buffers(|buffers| buffers.store(Port::Consumer, Direction::Write, block))
    }

    /// Read a word through the bus window.
    pub fn bus_read(&self, address: u32) -> Result<u32, crate::Error> {
        self.bridge
            .with_buffers(|buffers| buffers.bus_read(Port::Consumer, address))
    }

    /// Write a word through the bus window.
    pub fn bus_write(&self, address: u32, value: u32) -> Result<(), crate::Error> {
        self.bridge
            .with_buffers(|buffers| buffers.bus_write(Port::Consumer, address, value))
    }

    /// Hand the read buffer back and pulse go.
    ///
    /// Returns `false`, and pulses nothing, if there was no read request to
    /// acknowledge.
    pub fn read_go(&self) -> bool {
        let released = self
            .bridge
            .with_buffers(|buffers| buffers.release(Direction::Read, Port::Consumer));
        if released {
            self.bridge.pulse_read_go();
        }
        released
    }

    /// Hand the write buffer back and pulse done.
    ///
    /// Returns `false`, and pulses nothing, if there was no write request to
    /// acknowledge.
    pub fn write_done(&self) -> bool {
        let released = self
            .bridge
            .with_buffers(|buffers| buffers.release(Direction::Write, Port::Consumer));
        if released {
            self.bridge.pulse_write_done();
        }
        released
    }

    /// Service whatever requests are waiting, using `device` as the card's
    /// storage.
    ///
    /// Returns the events that were serviced. A request the card withdrew
    /// while we were working on it is skipped, even if the card has since
    /// raised another one on the same buffer.
    pub fn service<D>(&mut self, device: &mut D) -> Result<Events, Error<D::Error>>
    where
        D: BlockDevice,
    {
        let pending = self.bridge.pending();
        let mut serviced = Events::empty();
        let mut block = [0u8; BLOCK_LEN];

        if pending.events.contains(Events::READ) {
            let idx = BlockIdx(pending.status.block_read_addr);
            trace!("Supplying block {}", idx.0);
            device.read(&mut block, idx).map_err(Error::DeviceError)?;
            if self.withdrawn(self.supply(pending.read_ticket, &block))? {
                debug!("Read of block {} withdrawn", idx.0);
            } else {
                self.bridge.pulse_read_go();
                self.read_count = self.read_count.wrapping_add(1);
                serviced |= Events::READ;
            }
        }

        if pending.events.contains(Events::WRITE) {
            let idx = BlockIdx(pending.status.block_write_addr);
            trace!("Storing block {}", idx.0);
            let ticket = pending.write_ticket;
            if self.withdrawn(self.bridge.with_buffers(|buffers| {
                buffers.claim(Port::Consumer, Direction::Write, ticket)?;
                buffers.store(Port::Consumer, Direction::Write, &mut block)
            }))? {
                debug!("Write of block {} withdrawn", idx.0);
            } else {
                device.write(&block, idx).map_err(Error::DeviceError)?;
                if self.accept(ticket) {
                    self.bridge.pulse_write_done();
                    self.write_count = self.write_count.wrapping_add(1);
                    serviced |= Events::WRITE;
                } else {
                    debug!("Write of block {} withdrawn", idx.0);
                }
            }
        }

        Ok(serviced)
    }

    /// Poll for events, up to `polls` times, 10us apart.
    pub fn wait_pending<DL>(&self, delay: &mut DL, polls: u32) -> Option<Events>
    where
        DL: DelayNs,
    {
        for _ in 0..polls {
            let events = self.events();
            if !events.is_empty() {
                return Some(events);
            }
            delay.delay_us(10);
        }
        None
    }

    /// Carry out any erase the host has asked for since we last looked.
    ///
    /// The card doesn't wait for this; an erase command completes as soon as
    /// its range is checked.
    pub fn erase<D>(&mut self, device: &mut D) -> Result<Option<EraseRange>, Error<D::Error>>
    where
        D: BlockDevice,
    {
        let status = self.status();
        if status.stats.erases == self.erases_seen {
            return Ok(None);
        }
        self.erases_seen = status.stats.erases;
        let range = status.erase_range();
        debug!("Erasing {}..={}", range.start, range.end);
        device
            .erase(BlockIdx(range.start), BlockIdx(range.end))
            .map_err(Error::DeviceError)?;
        Ok(Some(range))
    }

    /// Fill the read buffer and hand it back, if it is still on `ticket`.
    fn supply(&self, ticket: u32, block: &Block) -> Result<(), crate::Error> {
        self.bridge.with_buffers(|buffers| {
            buffers.claim(Port::Consumer, Direction::Read, ticket)?;
            buffers.load(Port::Consumer, Direction::Read, block)?;
            buffers.release(Direction::Read, Port::Consumer);
            Ok(())
        })
    }

    /// Hand the write buffer back, if it is still on `ticket`.
    fn accept(&self, ticket: u32) -> bool {
        self.bridge.with_buffers(|buffers| {
            buffers.claim(Port::Consumer, Direction::Write, ticket).is_ok()
                && buffers.release(Direction::Write, Port::Consumer)
        })
    }

    fn withdrawn(&self, result: Result<(), crate::Error>) -> Result<bool, crate::Error> {
        match result {
            Ok(()) => Ok(false),
            Err(crate::Error::BufferBusy) => Ok(true),
            Err(e) => Err(e),
        }
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
