//! The Link State Machine
//!
//! This is the card, as far as the host can tell. It takes decoded command
//! frames, works out whether each one is legal in the current state, moves
//! the state along, and decides what to say back. Data phases are handed to
//! the [`Sequencer`], and everything the consumer needs to see is published
//! to the [`Bridge`] after every step.
//!
//! Nothing in here waits. The host drives the card by calling
//! [`LinkLayer::command`], [`LinkLayer::read_data`],
//! [`LinkLayer::write_data`] and [`LinkLayer::busy`]. If the host has to wait
//! on the consumer it gets told so (busy, or no data yet) and has to come
//! back, and coming back too many times is an error.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::blockdevice::{Block, BLOCK_LEN_U32};
use crate::bridge::{Bridge, LinkStats, ManagerStatus};
use crate::buffer::BufferPair;
use crate::command::{CommandDecoder, CommandFrame};
use crate::proto::*;
use crate::registers::{CardStatus, Cid, Csd, Ocr, Scr, SdStatus, SwitchStatus, CSD_SIZE_UNIT};
use crate::response::{Reply, ResponseFrame, ResponseGenerator};
use crate::sequencer::{Progress, Sequencer};
use crate::{debug, trace, warn, Error};

/// How many times the host may poll a stalled data phase before we give up
/// on the consumer.
pub const DEFAULT_STALL_LIMIT: u32 = 32_000;

/// The card states, numbered as the CURRENT_STATE field of the card status.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardState {
    /// Powered up, waiting for ACMD41
    Idle,
    /// Operating conditions agreed, waiting for CMD2
    Ready,
    /// CID sent, waiting for CMD3
    Identification,
    /// Addressed but not selected
    Standby,
    /// Selected, no transfer under way
    Transfer,
    /// Sending data to the host
    SendData,
    /// Receiving data from the host
    ReceiveData,
    /// A received block is being written; the card is busy
    Programming,
    /// Inactive until power cycled
    Disconnect,
}

impl CardState {
    /// The four bit CURRENT_STATE code.
    pub fn code(self) -> u8 {
        match self {
            CardState::Idle => 0,
            CardState::Ready => 1,
            CardState::Identification => 2,
            CardState::Standby => 3,
            CardState::Transfer => 4,
            CardState::SendData => 5,
            CardState::ReceiveData => 6,
            CardState::Programming => 7,
            CardState::Disconnect => 8,
        }
    }

    /// Decode a CURRENT_STATE code.
    pub fn from_code(code: u8) -> Option<CardState> {
        match code {
            0 => Some(CardState::Idle),
            1 => Some(CardState::Ready),
            2 => Some(CardState::Identification),
            3 => Some(CardState::Standby),
            4 => Some(CardState::Transfer),
            5 => Some(CardState::SendData),
            6 => Some(CardState::ReceiveData),
            7 => Some(CardState::Programming),
            8 => Some(CardState::Disconnect),
            _ => None,
        }
    }

    /// Has the host selected this card?
    pub fn is_selected(self) -> bool {
        matches!(
            self,
            CardState::Transfer
                | CardState::SendData
                | CardState::ReceiveData
                | CardState::Programming
        )
    }

    const fn bit(self) -> u16 {
        1 << self as u16
    }
}

/// A set of [`CardState`]s, one bit per state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct StateSet(u16);

impl StateSet {
    const NONE: StateSet = StateSet(0);
    const IDLE: StateSet = StateSet(CardState::Idle.bit());
    const READY: StateSet = StateSet(CardState::Ready.bit());
    const IDENT_STANDBY: StateSet =
        StateSet(CardState::Identification.bit() | CardState::Standby.bit());
    const STANDBY: StateSet = StateSet(CardState::Standby.bit());
    const TRANSFER: StateSet = StateSet(CardState::Transfer.bit());
    const SELECTED: StateSet = StateSet(
        CardState::Transfer.bit()
            | CardState::SendData.bit()
            | CardState::ReceiveData.bit()
            | CardState::Programming.bit(),
    );
    const ADDRESSED: StateSet = StateSet(CardState::Standby.bit() | Self::SELECTED.0);
    const DATA: StateSet = StateSet(
        CardState::SendData.bit() | CardState::ReceiveData.bit() | CardState::Programming.bit(),
    );
    const ALIVE: StateSet = StateSet(0x1FF & !CardState::Disconnect.bit());

    fn contains(self, state: CardState) -> bool {
        (self.0 & state.bit()) != 0
    }
}

/// Which states accept a given command.
///
/// Application commands that aren't in this table are treated as the
/// standard command with the same index.
fn accepted_in(index: u8, app: bool) -> Option<StateSet> {
    let states = if app {
        match index {
            ACMD6 | ACMD13 | ACMD23 | ACMD42 | ACMD51 => StateSet::TRANSFER,
            // Re-sending ACMD41 while Ready is harmless
            ACMD41 => StateSet(StateSet::IDLE.0 | StateSet::READY.0),
            _ => return None,
        }
    } else {
        match index {
            CMD0 | CMD55 => StateSet::ALIVE,
            CMD2 => StateSet::READY,
            CMD3 => StateSet::IDENT_STANDBY,
            CMD7 | CMD13 | CMD15 => StateSet::ADDRESSED,
            CMD8 => StateSet::IDLE,
            CMD9 | CMD10 => StateSet::STANDBY,
            CMD12 => StateSet::DATA,
            CMD6 | CMD16 | CMD17 | CMD18 | CMD23 | CMD24 | CMD25 | CMD32 | CMD33 | CMD38 => {
                StateSet::TRANSFER
            }
            _ => StateSet::NONE,
        }
    };
    Some(states)
}

/// Options for the emulated card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone)]
pub struct EmulatorOpts {
    /// Offer the high speed bus mode (CMD6 function 1, 50 MHz)
    pub enable_hs: bool,
    /// Size of the card, in 512 byte blocks. The card rounds this down to a
    /// whole number of [`CSD_SIZE_UNIT`] blocks, and never goes below one
    /// unit, so that its CSD and its range checks agree.
    pub capacity_blocks: u32,
    /// Host polls a data phase may spend waiting on the consumer
    pub stall_limit: u32,
    /// The relative card address published by CMD3. Zero is not allowed and
    /// is replaced with one.
    pub rca: u16,
    /// The card identification register
    pub cid: Cid,
}

impl Default for EmulatorOpts {
    fn default() -> Self {
        EmulatorOpts {
            enable_hs: false,
            // 1 GiB
            capacity_blocks: 2 * 1024 * 1024,
            stall_limit: DEFAULT_STALL_LIMIT,
            rca: 0x0001,
            cid: Cid::default(),
        }
    }
}

/// What [`LinkLayer::read_data`] produced.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadPoll {
    /// Nothing yet; the consumer hasn't supplied the block. Ask again.
    Busy,
    /// The buffer was filled with `len` bytes, which carry this CRC16.
    Data {
        /// Bytes written to the caller's buffer
        len: usize,
        /// The CRC16 the card appends to the data
        crc: u16,
    },
}

/// The card's answer to a block of write data.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataResponse {
    /// The block was taken
    Accepted,
    /// The block failed its CRC16 check and was dropped
    CrcError,
    /// The card couldn't take the block
    Rejected,
}

impl DataResponse {
    /// The data response token as sent on the wire.
    pub fn token(self) -> u8 {
        match self {
            DataResponse::Accepted => DATA_RES_ACCEPTED,
            DataResponse::CrcError => DATA_RES_CRC_ERROR,
            DataResponse::Rejected => DATA_RES_WRITE_ERROR,
        }
    }
}

/// The level error flags, describing the most recent command.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
struct ErrorFlags {
    host_is_spi: bool,
    op_out_range: bool,
    unhandled_cmd: bool,
    cmd_crc: bool,
}

/// The state the host sets up during identification and configuration.
#[derive(Debug, Copy, Clone, Default)]
struct Session {
    high_capacity: bool,
    wide_bus: bool,
    high_speed: bool,
    block_count: Option<u32>,
    erase_start_set: bool,
    erase_end_set: bool,
}

/// The host facing side of the emulated card.
pub struct LinkLayer<'a, M: RawMutex> {
    bridge: &'a Bridge<M>,
    opts: EmulatorOpts,
    decoder: CommandDecoder,
    generator: ResponseGenerator,
    sequencer: Sequencer,
    state: CardState,
    session: Session,
    /// Error bits waiting to be reported in an R1
    pending_status: u32,
    app_cmd: bool,
    flags: ErrorFlags,
    deselected: bool,
    fatal_timeout: bool,
    most_recent_cmd: u8,
    stats: LinkStats,
}

impl<'a, M> LinkLayer<'a, M>
where
    M: RawMutex,
{
    /// Create a card with the default options.
    pub fn new(bridge: &'a Bridge<M>) -> LinkLayer<'a, M> {
        Self::new_with_options(bridge, EmulatorOpts::default())
    }

    /// Create a card with the given options.
    ///
    /// The card starts powered up and Idle, and takes both buffers back from
    /// the consumer.
    pub fn new_with_options(bridge: &'a Bridge<M>, mut opts: EmulatorOpts) -> LinkLayer<'a, M> {
        if opts.rca == 0 {
            opts.rca = 1;
        }
        let capacity = (opts.capacity_blocks / CSD_SIZE_UNIT).max(1) * CSD_SIZE_UNIT;
        if capacity != opts.capacity_blocks {
            warn!(
                "Capacity of {} blocks can't be described, using {}",
                opts.capacity_blocks,
                capacity
            );
            opts.capacity_blocks = capacity;
        }
        let generator = ResponseGenerator::new(
            opts.cid,
            Csd::new(opts.capacity_blocks, false),
            opts.rca,
        );
        let mut link = LinkLayer {
            bridge,
            opts,
            decoder: CommandDecoder::new(),
            generator,
            sequencer: Sequencer::new(opts.stall_limit),
            state: CardState::Idle,
            session: Session::default(),
            pending_status: 0,
            app_cmd: false,
            flags: ErrorFlags::default(),
            deselected: false,
            fatal_timeout: false,
            most_recent_cmd: 0,
            stats: LinkStats::default(),
        };
        bridge.clear_strobes();
        bridge.with_buffers(|buffers| link.sequencer.abort(buffers));
        link.publish();
        link
    }

    /// Power cycle the card.
    ///
    /// This is the only way out of the Disconnect state.
    pub fn reset(&mut self) {
        debug!("Power cycle");
        *self = Self::new_with_options(self.bridge, self.opts);
    }

    /// The current state.
    pub fn state(&self) -> CardState {
        self.state
    }

    /// The options this card was built with.
    pub fn options(&self) -> &EmulatorOpts {
        &self.opts
    }

    /// What the consumer sees.
    pub fn status(&self) -> ManagerStatus {
        self.bridge.status()
    }

    /// The card status word the next R1 would carry.
    pub fn card_status(&self) -> CardStatus {
        self.current_status(self.state)
    }

    /// Look for go/done pulses from the consumer, and publish.
    ///
    /// Every other entry point does this first anyway.
    pub fn poll(&mut self) {
        self.service_strobes();
        self.publish();
    }

    /// Clock one bit in from the CMD line.
    ///
    /// Returns the response once a whole command has arrived.
    pub fn feed_bit(&mut self, bit: bool) -> Option<ResponseFrame> {
        let frame = self.decoder.push_bit(bit)?;
        Some(self.command(&frame))
    }

    /// Clock one byte in from the CMD line, most significant bit first.
    pub fn feed_byte(&mut self, byte: u8) -> Option<ResponseFrame> {
        let mut response = None;
        for bit in (0..8).rev() {
            if let Some(r) = self.feed_bit((byte >> bit) & 1 != 0) {
                response = Some(r);
            }
        }
        response
    }

    /// Handle one decoded command frame.
    pub fn command(&mut self, frame: &CommandFrame) -> ResponseFrame {
        self.service_strobes();
        let response = self.dispatch(frame);
        self.publish();
        response
    }

    /// The host is clocking data in from the card.
    ///
    /// `out` must be exactly as long as the data the card is sending: a
    /// whole block for CMD17/CMD18, or the register for CMD6, ACMD13 and
    /// ACMD51.
    pub fn read_data(&mut self, out: &mut [u8]) -> Result<ReadPoll, Error> {
        self.service_strobes();
        if self.state != CardState::SendData {
            return Err(Error::NoDataPhase);
        }
        let result = self.with_sequencer(|sequencer, buffers| sequencer.host_read(buffers, out))?;
        let poll = match result {
            Some((progress, block)) => {
                if block {
                    self.stats.blocks_read = self.stats.blocks_read.wrapping_add(1);
                }
                if progress == Progress::Finished {
                    self.set_state(CardState::Transfer);
                }
                ReadPoll::Data {
                    len: out.len(),
                    crc: crc16(out),
                }
            }
            None => {
                self.stall()?;
                ReadPoll::Busy
            }
        };
        self.publish();
        Ok(poll)
    }

    /// The length of the register the host should read next, if the card is
    /// in a register data phase.
    pub fn register_len(&self) -> Option<usize> {
        self.sequencer.register_len()
    }

    /// The host sent a block of write data, with the given CRC16.
    pub fn write_data(&mut self, data: &[u8], crc: u16) -> Result<DataResponse, Error> {
        self.service_strobes();
        match self.state {
            CardState::ReceiveData => {}
            CardState::Programming => return Err(Error::BadState),
            _ => return Err(Error::NoDataPhase),
        }
        let block: &Block = data
            .try_into()
            .map_err(|_| Error::WrongLength(data.len()))?;
        if crc16(block) != crc {
            warn!("Bad data CRC for block {}", self.sequencer.write_request().addr);
            self.publish();
            return Ok(DataResponse::CrcError);
        }
        self.with_sequencer(|sequencer, buffers| sequencer.host_write(buffers, block))?;
        self.set_state(CardState::Programming);
        self.publish();
        Ok(DataResponse::Accepted)
    }

    /// Is the card holding DAT0 busy?
    ///
    /// The card is busy while a written block waits for the consumer, and
    /// after a stop while a read request is still outstanding.
    pub fn busy(&mut self) -> Result<bool, Error> {
        self.service_strobes();
        let busy = match self.state {
            CardState::Programming => true,
            CardState::SendData => {
                let read = self.sequencer.read_request();
                read.stop && read.active
            }
            _ => false,
        };
        if busy {
            self.stall()?;
        }
        self.publish();
        Ok(busy)
    }

    fn stall(&mut self) -> Result<(), Error> {
        if let Err(e) = self.sequencer.stall() {
            warn!("Consumer stalled in {:?}, abandoning transfer", self.state);
            self.abort_transfer();
            self.fatal_timeout = true;
            self.stats.stall_timeouts = self.stats.stall_timeouts.wrapping_add(1);
            self.set_state(CardState::Transfer);
            self.publish();
            return Err(e);
        }
        Ok(())
    }

    fn service_strobes(&mut self) {
        if self.bridge.take_read_go() {
            let sequencer = &mut self.sequencer;
            match self.bridge.with_buffers(|buffers| sequencer.read_go(buffers)) {
                Some(Progress::Finished) => self.set_state(CardState::Transfer),
                Some(Progress::Continue) => {}
                None => trace!("Ignoring stray read go"),
            }
        }
        if self.bridge.take_write_done() {
            let sequencer = &mut self.sequencer;
            match self.bridge.with_buffers(|buffers| sequencer.write_done(buffers)) {
                Some(progress) => {
                    self.stats.blocks_written = self.stats.blocks_written.wrapping_add(1);
                    if progress == Progress::Finished {
                        self.set_state(CardState::Transfer);
                    } else {
                        self.set_state(CardState::ReceiveData);
                    }
                }
                None => trace!("Ignoring stray write done"),
            }
        }
    }

    fn set_state(&mut self, state: CardState) {
        if state != self.state {
            debug!("{:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn abort_transfer(&mut self) {
        let sequencer = &mut self.sequencer;
        self.bridge.clear_strobes();
        self.bridge.with_buffers(|buffers| sequencer.abort(buffers));
    }

    fn current_status(&self, state: CardState) -> CardStatus {
        let mut bits = self.pending_status;
        if state != CardState::Programming {
            bits |= STATUS_READY_FOR_DATA;
        }
        if self.app_cmd {
            bits |= STATUS_APP_CMD;
        }
        CardStatus::new(bits, state)
    }

    /// Run a sequencer step that may hand a buffer to the consumer, and
    /// publish before the buffer lock is dropped.
    fn with_sequencer<F, R>(&mut self, func: F) -> R
    where
        F: FnOnce(&mut Sequencer, &mut BufferPair) -> R,
    {
        let bridge = self.bridge;
        bridge.with_buffers(|buffers| {
            let result = func(&mut self.sequencer, buffers);
            bridge.publish(self.snapshot());
            result
        })
    }

    fn publish(&self) {
        self.bridge.publish(self.snapshot());
    }

    fn snapshot(&self) -> ManagerStatus {
        let read = self.sequencer.read_request();
        let write = self.sequencer.write_request();
        let erase = self.sequencer.erase_range();
        ManagerStatus {
            block_read_act: read.active,
            block_read_addr: read.addr,
            block_read_num: read.num,
            block_read_stop: read.stop,
            block_write_act: write.active,
            block_write_addr: write.addr,
            block_write_num: write.num,
            block_preerase_num: erase.preerase_num,
            block_erase_start: erase.start,
            block_erase_end: erase.end,
            info_card_desel: self.deselected,
            err_host_is_spi: self.flags.host_is_spi,
            err_op_out_range: self.flags.op_out_range,
            err_unhandled_cmd: self.flags.unhandled_cmd,
            err_cmd_crc: self.flags.cmd_crc,
            fatal_timeout: self.fatal_timeout,
            card_state: self.state,
            card_status: self.current_status(self.state).0,
            most_recent_cmd: self.most_recent_cmd,
            stats: self.stats,
        }
    }

    fn dispatch(&mut self, frame: &CommandFrame) -> ResponseFrame {
        self.flags = ErrorFlags::default();
        self.stats.commands = self.stats.commands.wrapping_add(1);
        self.most_recent_cmd = frame.index;

        if self.state == CardState::Disconnect {
            trace!("Disconnected, ignoring CMD{}", frame.index);
            return ResponseFrame::none();
        }

        if !frame.crc_valid {
            warn!("CRC error on CMD{}", frame.index);
            self.flags.cmd_crc = true;
            self.pending_status |= STATUS_COM_CRC_ERROR;
            self.stats.crc_errors = self.stats.crc_errors.wrapping_add(1);
            self.app_cmd = false;
            return ResponseFrame::none();
        }

        let state_before = self.state;
        let was_app = core::mem::replace(&mut self.app_cmd, false);
        let app = was_app && accepted_in(frame.index, true).is_some();
        let legal = accepted_in(frame.index, app)
            .map(|states| states.contains(state_before))
            .unwrap_or(false);

        let reply = if !legal {
            self.illegal(frame, app)
        } else if app {
            self.application_command(frame)
        } else {
            self.standard_command(frame)
        };

        // The APP_CMD bit goes out in the response to CMD55 and to the
        // ACMD itself
        let report_app = self.app_cmd || app;
        let mut status = self.current_status(state_before);
        if report_app {
            status.0 |= STATUS_APP_CMD;
        } else {
            status.0 &= !STATUS_APP_CMD;
        }
        if matches!(reply, Reply::Status | Reply::StatusBusy | Reply::Rca) {
            self.pending_status &= !STATUS_CLEAR_ON_READ;
        }
        self.generator.render(reply, frame.index, status)
    }

    fn illegal(&mut self, frame: &CommandFrame, app: bool) -> Reply {
        match frame.index {
            CMD58 | CMD59 if !app => {
                warn!("CMD{} is SPI mode only", frame.index);
                self.flags.host_is_spi = true;
            }
            _ => {
                warn!(
                    "Illegal {}CMD{} in {:?}",
                    if app { "A" } else { "" },
                    frame.index,
                    self.state
                );
            }
        }
        self.flags.unhandled_cmd = true;
        self.pending_status |= STATUS_ILLEGAL_COMMAND;
        self.stats.illegal_commands = self.stats.illegal_commands.wrapping_add(1);
        Reply::Silent
    }

    fn out_of_range(&mut self, bits: u32) {
        warn!("CMD{} argument out of range", self.most_recent_cmd);
        self.flags.op_out_range = true;
        self.pending_status |= bits;
    }

    fn for_us(&self, frame: &CommandFrame) -> bool {
        frame.rca() == self.generator.rca()
    }

    fn standard_command(&mut self, frame: &CommandFrame) -> Reply {
        match frame.index {
            CMD0 => {
                self.abort_transfer();
                self.sequencer.clear_erase();
                self.session = Session::default();
                self.deselected = false;
                self.fatal_timeout = false;
                self.generator.set_csd(Csd::new(self.opts.capacity_blocks, false));
                self.set_state(CardState::Idle);
                Reply::Silent
            }
            CMD2 => {
                self.set_state(CardState::Identification);
                Reply::Cid
            }
            CMD3 => {
                self.set_state(CardState::Standby);
                Reply::Rca
            }
            CMD6 => {
                let (switch, high_speed) = SwitchStatus::new(
                    frame.argument,
                    self.opts.enable_hs,
                    self.session.high_speed,
                );
                // Bit 31 set means switch, clear means just ask
                if (frame.argument & (1 << 31)) != 0 && high_speed != self.session.high_speed {
                    debug!("High speed {}", high_speed);
                    self.session.high_speed = high_speed;
                    self.generator
                        .set_csd(Csd::new(self.opts.capacity_blocks, high_speed));
                }
                self.start_register(&switch.data);
                Reply::Status
            }
            CMD7 => self.select(frame),
            CMD8 => {
                if (frame.argument & IF_COND_VHS_MASK) == IF_COND_VHS_27_36 {
                    Reply::IfCond(frame.argument & (IF_COND_VHS_MASK | IF_COND_PATTERN_MASK))
                } else {
                    debug!("Unsupported voltage in CMD8 {:08x}", frame.argument);
                    Reply::Silent
                }
            }
            CMD9 if self.for_us(frame) => Reply::Csd,
            CMD10 if self.for_us(frame) => Reply::Cid,
            CMD12 => self.stop(),
            CMD13 if self.for_us(frame) => Reply::Status,
            CMD15 if self.for_us(frame) => {
                self.abort_transfer();
                self.set_state(CardState::Disconnect);
                Reply::Silent
            }
            CMD16 => {
                if frame.argument != BLOCK_LEN_U32 {
                    warn!("Block length {} not supported", frame.argument);
                    self.pending_status |= STATUS_BLOCK_LEN_ERROR;
                }
                Reply::Status
            }
            CMD17 | CMD18 | CMD24 | CMD25 => self.start_blocks(frame),
            CMD23 => {
                self.session.block_count = if frame.argument == 0 {
                    None
                } else {
                    Some(frame.argument)
                };
                Reply::Status
            }
            CMD32 | CMD33 => {
                if frame.argument >= self.opts.capacity_blocks {
                    self.out_of_range(STATUS_OUT_OF_RANGE);
                } else if frame.index == CMD32 {
                    self.sequencer.erase_range_mut().start = frame.argument;
                    self.session.erase_start_set = true;
                } else {
                    self.sequencer.erase_range_mut().end = frame.argument;
                    self.session.erase_end_set = true;
                }
                Reply::Status
            }
            CMD38 => {
                let range = self.sequencer.erase_range();
                if !(self.session.erase_start_set && self.session.erase_end_set) {
                    warn!("Erase without a range");
                    self.pending_status |= STATUS_ERASE_SEQ_ERROR;
                } else if range.start > range.end {
                    self.out_of_range(STATUS_ERASE_PARAM);
                } else {
                    debug!("Erase {}..={}", range.start, range.end);
                    self.stats.erases = self.stats.erases.wrapping_add(1);
                }
                self.session.erase_start_set = false;
                self.session.erase_end_set = false;
                Reply::StatusBusy
            }
            CMD55 => {
                self.app_cmd = true;
                Reply::Status
            }
            // Addressed to some other card
            _ => Reply::Silent,
        }
    }

    fn application_command(&mut self, frame: &CommandFrame) -> Reply {
        match frame.index {
            ACMD6 => {
                self.session.wide_bus = (frame.argument & 0x3) == 0x2;
                debug!("Wide bus {}", self.session.wide_bus);
                Reply::Status
            }
            ACMD13 => {
                let status = SdStatus::new(self.session.wide_bus);
                self.start_register(&status.data);
                Reply::Status
            }
            ACMD23 => {
                self.sequencer.erase_range_mut().preerase_num = frame.argument & 0x007F_FFFF;
                Reply::Status
            }
            ACMD41 => {
                if (frame.argument & OCR_VOLTAGE_WINDOW) == 0 {
                    // Inquiry
                    Reply::Ocr(Ocr::new(false, false))
                } else {
                    self.session.high_capacity = (frame.argument & ACMD41_HCS) != 0;
                    self.set_state(CardState::Ready);
                    Reply::Ocr(Ocr::new(true, self.session.high_capacity))
                }
            }
            ACMD51 => {
                self.start_register(&Scr::new().data);
                Reply::Status
            }
            _ => Reply::Status,
        }
    }

    fn select(&mut self, frame: &CommandFrame) -> Reply {
        if self.for_us(frame) {
            if self.state == CardState::Standby {
                self.deselected = false;
                self.set_state(CardState::Transfer);
            }
            Reply::Status
        } else {
            if self.state.is_selected() {
                if !self.sequencer.is_idle() {
                    warn!("Deselected mid transfer");
                }
                self.abort_transfer();
                self.deselected = true;
                self.set_state(CardState::Idle);
            }
            Reply::Silent
        }
    }

    fn stop(&mut self) -> Reply {
        match self.sequencer.stop() {
            Some(Progress::Finished) => {
                self.set_state(CardState::Transfer);
                Reply::StatusBusy
            }
            Some(Progress::Continue) => {
                debug!("Stop, waiting on consumer");
                Reply::StatusBusy
            }
            None => {
                self.set_state(CardState::Transfer);
                Reply::StatusBusy
            }
        }
    }

    fn start_register(&mut self, data: &[u8]) {
        self.sequencer.start_register(data);
        self.set_state(CardState::SendData);
    }

    fn start_blocks(&mut self, frame: &CommandFrame) -> Reply {
        let addr = frame.argument;
        let capacity = self.opts.capacity_blocks;
        let count = self.session.block_count.take();
        let num = match frame.index {
            CMD17 | CMD24 => 1,
            _ => count.unwrap_or_else(|| capacity.saturating_sub(addr)),
        };
        if addr >= capacity || u64::from(addr) + u64::from(num) > u64::from(capacity) {
            self.out_of_range(STATUS_OUT_OF_RANGE);
            return Reply::Status;
        }
        if frame.index == CMD17 || frame.index == CMD18 {
            debug!("Read {} blocks from {}", num, addr);
            self.set_state(CardState::SendData);
            self.with_sequencer(|sequencer, buffers| sequencer.start_read(buffers, addr, num));
        } else {
            debug!("Write {} blocks to {}", num, addr);
            self.set_state(CardState::ReceiveData);
            self.with_sequencer(|sequencer, buffers| sequencer.start_write(buffers, addr, num));
        }
        Reply::Status
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
