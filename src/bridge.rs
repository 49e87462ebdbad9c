//! The bridge between the protocol and consumer clock domains.
//!
//! Everything the two sides share lives here: a snapshot of the status
//! outputs, the buffer pair, and the go/done strobes. The link layer is the
//! only writer of the snapshot. The consumer is the only writer of the
//! strobes. Each strobe is a single pulse that the link layer takes exactly
//! once, however long it takes to notice it.
//!
//! The mutex flavour is up to you. Use
//! `embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex` when the two
//! domains really are on different threads or interrupt priorities, and
//! `NoopRawMutex` when they are polled from the same loop.

use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::buffer::{BufferPair, Direction, Port};
use crate::link::CardState;
use crate::sequencer::{BlockRequest, EraseRange};

/// Running totals kept by the link layer.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Command frames decoded
    pub commands: u32,
    /// Command frames that failed their CRC check
    pub crc_errors: u32,
    /// Commands refused as illegal
    pub illegal_commands: u32,
    /// Blocks sent to the host
    pub blocks_read: u32,
    /// Blocks received from the host and acknowledged by the consumer
    pub blocks_written: u32,
    /// Erase commands accepted
    pub erases: u32,
    /// Data phases abandoned because the consumer stalled
    pub stall_timeouts: u32,
}

impl LinkStats {
    const fn new() -> LinkStats {
        LinkStats {
            commands: 0,
            crc_errors: 0,
            illegal_commands: 0,
            blocks_read: 0,
            blocks_written: 0,
            erases: 0,
            stall_timeouts: 0,
        }
    }
}

/// Everything the consumer can see of the card.
///
/// The error flags are levels: they describe the most recently decoded
/// command and drop when the next one arrives. [`LinkStats`] has the running
/// totals.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ManagerStatus {
    /// A read block is wanted
    pub block_read_act: bool,
    /// The block address of the wanted read block
    pub block_read_addr: u32,
    /// Read blocks still to be acknowledged
    pub block_read_num: u32,
    /// The host stopped the read early
    pub block_read_stop: bool,
    /// A written block is waiting
    pub block_write_act: bool,
    /// The block address of the waiting write block
    pub block_write_addr: u32,
    /// Write blocks still to be acknowledged
    pub block_write_num: u32,
    /// Blocks to pre-erase before the next multi-block write
    pub block_preerase_num: u32,
    /// First block of the erase range
    pub block_erase_start: u32,
    /// Last block of the erase range
    pub block_erase_end: u32,
    /// The host selected some other card while we were transferring
    pub info_card_desel: bool,
    /// The host sent an SPI-mode-only command
    pub err_host_is_spi: bool,
    /// An address was past the end of the card
    pub err_op_out_range: bool,
    /// A command was illegal in the current state
    pub err_unhandled_cmd: bool,
    /// A command failed its CRC check
    pub err_cmd_crc: bool,
    /// A data phase was abandoned because the consumer stalled. Cleared by
    /// CMD0.
    pub fatal_timeout: bool,
    /// The link layer's state
    pub card_state: CardState,
    /// The card status word, as the next R1 would report it
    pub card_status: u32,
    /// Index of the most recently decoded command
    pub most_recent_cmd: u8,
    /// Running totals
    pub stats: LinkStats,
}

impl ManagerStatus {
    /// Bit in [`ManagerStatus::info_bits`] for `info_card_desel`
    pub const INFO_CARD_DESEL: u16 = 1 << 0;
    /// Bit in [`ManagerStatus::info_bits`] for `err_host_is_spi`
    pub const INFO_HOST_IS_SPI: u16 = 1 << 1;
    /// Bit in [`ManagerStatus::info_bits`] for `err_op_out_range`
    pub const INFO_OP_OUT_RANGE: u16 = 1 << 2;
    /// Bit in [`ManagerStatus::info_bits`] for `err_unhandled_cmd`
    pub const INFO_UNHANDLED_CMD: u16 = 1 << 3;
    /// Bit in [`ManagerStatus::info_bits`] for `err_cmd_crc`
    pub const INFO_CMD_CRC: u16 = 1 << 4;
    /// Bit in [`ManagerStatus::info_bits`] for `fatal_timeout`
    pub const INFO_FATAL_TIMEOUT: u16 = 1 << 5;

    /// The status of a card that has just powered up.
    pub const fn new() -> ManagerStatus {
        ManagerStatus {
            block_read_act: false,
            block_read_addr: 0,
            block_read_num: 0,
            block_read_stop: false,
            block_write_act: false,
            block_write_addr: 0,
            block_write_num: 0,
            block_preerase_num: 0,
            block_erase_start: 0,
            block_erase_end: 0,
            info_card_desel: false,
            err_host_is_spi: false,
            err_op_out_range: false,
            err_unhandled_cmd: false,
            err_cmd_crc: false,
            fatal_timeout: false,
            card_state: CardState::Idle,
            card_status: 0,
            most_recent_cmd: 0,
            stats: LinkStats::new(),
        }
    }

    /// The read side outputs, gathered up.
    pub fn read_request(&self) -> BlockRequest {
        BlockRequest {
            active: self.block_read_act,
            addr: self.block_read_addr,
            num: self.block_read_num,
            stop: self.block_read_stop,
        }
    }

    /// The write side outputs, gathered up.
    pub fn write_request(&self) -> BlockRequest {
        BlockRequest {
            active: self.block_write_act,
            addr: self.block_write_addr,
            num: self.block_write_num,
            stop: false,
        }
    }

    /// The erase outputs, gathered up.
    pub fn erase_range(&self) -> EraseRange {
        EraseRange {
            preerase_num: self.block_preerase_num,
            start: self.block_erase_start,
            end: self.block_erase_end,
        }
    }

    /// The info and error flags packed into one word.
    pub fn info_bits(&self) -> u16 {
        let mut bits = 0;
        for (flag, bit) in [
            (self.info_card_desel, Self::INFO_CARD_DESEL),
            (self.err_host_is_spi, Self::INFO_HOST_IS_SPI),
            (self.err_op_out_range, Self::INFO_OP_OUT_RANGE),
            (self.err_unhandled_cmd, Self::INFO_UNHANDLED_CMD),
            (self.err_cmd_crc, Self::INFO_CMD_CRC),
            (self.fatal_timeout, Self::INFO_FATAL_TIMEOUT),
        ] {
            if flag {
                bits |= bit;
            }
        }
        bits
    }
}

impl Default for ManagerStatus {
    fn default() -> Self {
        ManagerStatus::new()
    }
}

impl core::fmt::Display for ManagerStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "rd:{:08x} wr:{:08x} rda:{:08x} wra:{:08x} cardstat:{:08x} info:{:04x} cmd:{}",
            self.stats.blocks_read,
            self.stats.blocks_written,
            self.block_read_addr,
            self.block_write_addr,
            self.card_status,
            self.info_bits(),
            self.most_recent_cmd
        )
    }
}

/// Which block requests are waiting for the consumer.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Events(u8);

impl Events {
    /// A read block is wanted
    pub const READ: Events = Events(1 << 0);
    /// A written block is waiting
    pub const WRITE: Events = Events(1 << 1);

    /// No events.
    pub const fn empty() -> Events {
        Events(0)
    }

    /// Are there no events?
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Are all of `other`'s events present?
    pub fn contains(self, other: Events) -> bool {
        (self.0 & other.0) == other.0
    }

    /// The raw event bits.
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl core::ops::BitOr for Events {
    type Output = Events;
    fn bitor(self, rhs: Events) -> Events {
        Events(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for Events {
    fn bitor_assign(&mut self, rhs: Events) {
        self.0 |= rhs.0;
    }
}

/// The block requests waiting for the consumer, all read at one instant.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Pending {
    /// Which requests are waiting
    pub events: Events,
    /// The status they were raised with
    pub status: ManagerStatus,
    /// The read buffer's ticket
    pub read_ticket: u32,
    /// The write buffer's ticket
    pub write_ticket: u32,
}

/// The shared state between a [`crate::LinkLayer`] and a
/// [`crate::Manager`].
pub struct Bridge<M: RawMutex> {
    status: Mutex<M, Cell<ManagerStatus>>,
    buffers: Mutex<M, RefCell<BufferPair>>,
    read_go: AtomicBool,
    write_done: AtomicBool,
}

impl<M: RawMutex> Bridge<M> {
    /// Create a new bridge, suitable for a `static`.
    pub const fn new() -> Bridge<M> {
        Bridge {
            status: Mutex::new(Cell::new(ManagerStatus::new())),
            buffers: Mutex::new(RefCell::new(BufferPair::new())),
            read_go: AtomicBool::new(false),
            write_done: AtomicBool::new(false),
        }
    }

    /// The most recently published status.
    pub fn status(&self) -> ManagerStatus {
        self.status.lock(|status| status.get())
    }

    pub(crate) fn publish(&self, status: ManagerStatus) {
        self.status.lock(|cell| cell.set(status));
    }

    /// Do something with the buffers.
    ///
    /// Don't do anything slow in here. The other side is locked out for the
    /// duration.
    pub fn with_buffers<F, R>(&self, func: F) -> R
    where
        F: FnOnce(&mut BufferPair) -> R,
    {
        self.buffers.lock(|buffers| func(&mut buffers.borrow_mut()))
    }

    /// The block requests waiting for the consumer.
    ///
    /// A request only counts while its buffer is still with the consumer,
    /// so an acknowledged request the link layer hasn't retired yet is not
    /// reported twice.
    pub fn events(&self) -> Events {
        self.pending().events
    }

    /// The pending events, the status they were raised with, and the
    /// buffer tickets that identify them.
    ///
    /// The link layer hands a buffer over and publishes the request that
    /// goes with it under the buffer lock, so all of it is read under it here.
    pub fn pending(&self) -> Pending {
        self.with_buffers(|buffers| {
            let status = self.status();
            let mut events = Events::empty();
            if status.block_read_act && buffers.owner(Direction::Read) == Port::Consumer {
                events |= Events::READ;
            }
            if status.block_write_act && buffers.owner(Direction::Write) == Port::Consumer {
                events |= Events::WRITE;
            }
            Pending {
                events,
                status,
                read_ticket: buffers.ticket(Direction::Read),
                write_ticket: buffers.ticket(Direction::Write),
            }
        })
    }

    pub(crate) fn pulse_read_go(&self) {
        self.read_go.store(true, Ordering::Release);
    }

    pub(crate) fn pulse_write_done(&self) {
        self.write_done.store(true, Ordering::Release);
    }

    pub(crate) fn take_read_go(&self) -> bool {
        self.read_go.swap(false, Ordering::Acquire)
    }

    pub(crate) fn take_write_done(&self) -> bool {
        self.write_done.swap(false, Ordering::Acquire)
    }

    pub(crate) fn clear_strobes(&self) {
        self.read_go.store(false, Ordering::Release);
        self.write_done.store(false, Ordering::Release);
    }
}

impl<M: RawMutex> Default for Bridge<M> {
    fn default() -> Self {
        Bridge::new()
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
