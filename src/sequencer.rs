//! The Block I/O Sequencer
//!
//! Tracks the data phase of a read or write command, one block at a time,
//! and the request/acknowledge handshake with the consumer that goes with
//! it.
//!
//! Reads: the request is raised as soon as the command is accepted. The
//! consumer fills the read buffer and pulses go, which stages the block for
//! the host and counts it off. Once the host has clocked the block out, the
//! next request goes up, until the count runs out or the host stops.
//!
//! Writes: the host's block lands in the write buffer first, then the
//! request goes up. The consumer drains the buffer and pulses done, which
//! counts the block off and lets the host send the next one.
//!
//! There is exactly one block of slack in each direction. Whenever the host
//! has to wait on the consumer, the wait is counted, and a wait longer than
//! the stall limit is an error.

use heapless::Vec;

use crate::blockdevice::Block;
use crate::buffer::{BufferPair, Direction, Port};
use crate::{trace, Error};

/// Largest register we send over the data lines (CMD6 and ACMD13).
pub const REGISTER_DATA_LEN: usize = 64;

/// One direction's block request, as the consumer sees it.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct BlockRequest {
    /// A block is waiting for the consumer
    pub active: bool,
    /// The block address of the block in question
    pub addr: u32,
    /// Blocks still to be acknowledged in this transfer
    pub num: u32,
    /// The host stopped the transfer early
    pub stop: bool,
}

/// The erase parameters the host has set up.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct EraseRange {
    /// Blocks to pre-erase before a multi-block write (ACMD23, 23 bits)
    pub preerase_num: u32,
    /// First block to erase (CMD32)
    pub start: u32,
    /// Last block to erase (CMD33)
    pub end: u32,
}

/// Did an event move the transfer along, or finish it?
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Progress {
    /// There is more to do
    Continue,
    /// The data phase is over
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    /// `staged` means the block has been acknowledged and is waiting for the
    /// host; otherwise the request is up.
    Read {
        staged: bool,
    },
    /// `pending` means the write buffer holds a block the consumer hasn't
    /// acknowledged yet.
    Write {
        pending: bool,
    },
    Register {
        data: Vec<u8, REGISTER_DATA_LEN>,
    },
}

/// The Block I/O Sequencer.
#[derive(Debug, Clone)]
pub struct Sequencer {
    read: BlockRequest,
    write: BlockRequest,
    erase: EraseRange,
    phase: Phase,
    stalled: u32,
    stall_limit: u32,
}

impl Sequencer {
    /// Create an idle sequencer with the given stall limit.
    pub fn new(stall_limit: u32) -> Sequencer {
        Sequencer {
            read: BlockRequest::default(),
            write: BlockRequest::default(),
            erase: EraseRange::default(),
            phase: Phase::Idle,
            stalled: 0,
            stall_limit,
        }
    }

    /// The read request, as published to the consumer.
    pub fn read_request(&self) -> BlockRequest {
        self.read
    }

    /// The write request, as published to the consumer.
    pub fn write_request(&self) -> BlockRequest {
        self.write
    }

    /// The erase parameters.
    pub fn erase_range(&self) -> EraseRange {
        self.erase
    }

    /// Mutable access to the erase parameters.
    pub fn erase_range_mut(&mut self) -> &mut EraseRange {
        &mut self.erase
    }

    /// Is any data phase under way?
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// Is the consumer holding up a block (in either direction)?
    pub fn awaiting_consumer(&self) -> bool {
        self.read.active || self.write.active
    }

    /// Start a block read of `num` blocks from `addr`.
    pub fn start_read(&mut self, buffers: &mut BufferPair, addr: u32, num: u32) {
        self.read = BlockRequest {
            active: true,
            addr,
            num,
            stop: false,
        };
        self.phase = Phase::Read { staged: false };
        self.stalled = 0;
        buffers.hand_to(Direction::Read, Port::Consumer);
    }

    /// Start a block write of `num` blocks to `addr`.
    pub fn start_write(&mut self, buffers: &mut BufferPair, addr: u32, num: u32) {
        self.write = BlockRequest {
            active: false,
            addr,
            num,
            stop: false,
        };
        self.phase = Phase::Write { pending: false };
        self.stalled = 0;
        buffers.hand_to(Direction::Write, Port::Protocol);
    }

    /// Start sending a register over the data lines.
    pub fn start_register(&mut self, data: &[u8]) {
        let mut register = Vec::new();
        // Registers are at most REGISTER_DATA_LEN bytes long
        let _ = register.extend_from_slice(&data[..data.len().min(REGISTER_DATA_LEN)]);
        self.phase = Phase::Register { data: register };
        self.stalled = 0;
    }

    /// The consumer pulsed go.
    ///
    /// Returns `None` if there was no request for it to acknowledge, or the
    /// consumer never handed the buffer back.
    pub fn read_go(&mut self, buffers: &BufferPair) -> Option<Progress> {
        if self.phase != (Phase::Read { staged: false })
            || buffers.owner(Direction::Read) != Port::Protocol
        {
            return None;
        }
        self.read.active = false;
        self.read.num = self.read.num.saturating_sub(1);
        self.stalled = 0;
        if self.read.stop {
            self.phase = Phase::Idle;
            Some(Progress::Finished)
        } else {
            self.phase = Phase::Read { staged: true };
            Some(Progress::Continue)
        }
    }

    /// The consumer pulsed done.
    pub fn write_done(&mut self, buffers: &BufferPair) -> Option<Progress> {
        if self.phase != (Phase::Write { pending: true })
            || buffers.owner(Direction::Write) != Port::Protocol
        {
            return None;
        }
        self.write.active = false;
        self.write.num = self.write.num.saturating_sub(1);
        self.stalled = 0;
        if self.write.num == 0 || self.write.stop {
            self.phase = Phase::Idle;
            Some(Progress::Finished)
        } else {
            self.write.addr = self.write.addr.wrapping_add(1);
            self.phase = Phase::Write { pending: false };
            Some(Progress::Continue)
        }
    }

    /// The host wants data.
    ///
    /// Fills `out` and returns the progress made (and whether it was a block
    /// rather than a register), or `None` if the data isn't ready yet.
    pub fn host_read(
        &mut self,
        buffers: &mut BufferPair,
        out: &mut [u8],
    ) -> Result<Option<(Progress, bool)>, Error> {
        match &self.phase {
            Phase::Read { staged: true } => {
                let len = out.len();
                let block: &mut Block = out.try_into().map_err(|_| Error::WrongLength(len))?;
                buffers.store(Port::Protocol, Direction::Read, block)?;
                self.stalled = 0;
                if self.read.num > 0 && !self.read.stop {
                    self.read.addr = self.read.addr.wrapping_add(1);
                    self.read.active = true;
                    self.phase = Phase::Read { staged: false };
                    buffers.hand_to(Direction::Read, Port::Consumer);
                    Ok(Some((Progress::Continue, true)))
                } else {
                    self.phase = Phase::Idle;
                    Ok(Some((Progress::Finished, true)))
                }
            }
            Phase::Read { staged: false } => Ok(None),
            Phase::Register { data } => {
                if out.len() != data.len() {
                    return Err(Error::WrongLength(out.len()));
                }
                out.copy_from_slice(data);
                self.phase = Phase::Idle;
                Ok(Some((Progress::Finished, false)))
            }
            _ => Err(Error::NoDataPhase),
        }
    }

    /// How long is the register the host should read next, if any?
    pub fn register_len(&self) -> Option<usize> {
        match &self.phase {
            Phase::Register { data } => Some(data.len()),
            _ => None,
        }
    }

    /// The host sent a block (with a good CRC).
    pub fn host_write(&mut self, buffers: &mut BufferPair, block: &Block) -> Result<(), Error> {
        match self.phase {
            Phase::Write { pending: false } => {
                buffers.load(Port::Protocol, Direction::Write, block)?;
                self.write.active = true;
                self.phase = Phase::Write { pending: true };
                self.stalled = 0;
                buffers.hand_to(Direction::Write, Port::Consumer);
                Ok(())
            }
            Phase::Write { pending: true } => Err(Error::BadState),
            _ => Err(Error::NoDataPhase),
        }
    }

    /// The host sent STOP_TRANSMISSION.
    ///
    /// A request the consumer already has stays up, flagged as stopped, and
    /// the transfer finishes when it is acknowledged. Anything else finishes
    /// now.
    pub fn stop(&mut self) -> Option<Progress> {
        match self.phase {
            Phase::Read { staged: false } => {
                self.read.stop = true;
                Some(Progress::Continue)
            }
            Phase::Read { staged: true } => {
                trace!("Dropping staged block {}", self.read.addr);
                self.read.stop = true;
                self.phase = Phase::Idle;
                Some(Progress::Finished)
            }
            Phase::Write { pending: true } => {
                self.write.stop = true;
                Some(Progress::Continue)
            }
            Phase::Write { pending: false } => {
                self.write.stop = true;
                self.phase = Phase::Idle;
                Some(Progress::Finished)
            }
            Phase::Register { .. } => {
                self.phase = Phase::Idle;
                Some(Progress::Finished)
            }
            Phase::Idle => None,
        }
    }

    /// The host is waiting on the consumer for one more poll.
    pub fn stall(&mut self) -> Result<(), Error> {
        self.stalled = self.stalled.saturating_add(1);
        if self.stalled > self.stall_limit {
            Err(Error::StallTimeout)
        } else {
            Ok(())
        }
    }

    /// Drop any transfer in flight and take both buffers back.
    ///
    /// The request counts are discarded, not kept for resuming.
    pub fn abort(&mut self, buffers: &mut BufferPair) {
        self.read = BlockRequest::default();
        self.write = BlockRequest::default();
        self.phase = Phase::Idle;
        self.stalled = 0;
        buffers.hand_to(Direction::Read, Port::Protocol);
        buffers.hand_to(Direction::Write, Port::Protocol);
    }

    /// Forget the erase parameters too.
    pub fn clear_erase(&mut self) {
        self.erase = EraseRange::default();
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
