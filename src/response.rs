//! The Response Generator
//!
//! Renders what the link layer decided to say into the bits that go back up
//! the CMD line. Short responses are 48 bits, long (R2) responses are 136.

use byteorder::{BigEndian, ByteOrder};
use heapless::Vec;

use crate::proto::*;
use crate::registers::{CardStatus, Cid, Csd, Ocr};

/// Number of bytes in a short response.
pub const SHORT_LEN: usize = 6;

/// Number of bytes in a long response.
pub const LONG_LEN: usize = 17;

/// The shape of a response.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    /// The card stays silent
    None,
    /// R1, R1b, R3, R6 or R7
    Short48,
    /// R2
    Long136,
}

/// What the link layer wants to say to the host.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Reply {
    /// No response
    Silent,
    /// R1: the card status
    Status,
    /// R1b: the card status, then busy on DAT0
    StatusBusy,
    /// R2: the card identification register
    Cid,
    /// R2: the card specific data register
    Csd,
    /// R3: the operating conditions register
    Ocr(Ocr),
    /// R6: the published relative card address
    Rca,
    /// R7: the interface condition, echoing the voltage and check pattern
    IfCond(u32),
}

/// One response, ready to transmit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    kind: ResponseKind,
    bytes: Vec<u8, LONG_LEN>,
    /// Does the card hold DAT0 busy after this response?
    pub busy: bool,
}

impl ResponseFrame {
    /// The card says nothing.
    pub fn none() -> ResponseFrame {
        ResponseFrame {
            kind: ResponseKind::None,
            bytes: Vec::new(),
            busy: false,
        }
    }

    fn short(leading: u8, argument: u32, crc: bool) -> ResponseFrame {
        let mut bytes = [0u8; SHORT_LEN];
        bytes[0] = leading;
        BigEndian::write_u32(&mut bytes[1..5], argument);
        bytes[5] = if crc {
            crc7(&bytes[0..5])
        } else {
            FRAME_NO_CRC
        };
        ResponseFrame {
            kind: ResponseKind::Short48,
            bytes: Vec::from_slice(&bytes).unwrap_or_default(),
            busy: false,
        }
    }

    /// An R1 (or, with `busy`, R1b) response.
    pub fn r1(index: u8, status: CardStatus, busy: bool) -> ResponseFrame {
        let mut frame = Self::short(FRAME_CARD_TO_HOST | (index & FRAME_INDEX_MASK), status.0, true);
        frame.busy = busy;
        frame
    }

    /// An R2 response carrying a 16 byte register.
    ///
    /// The register's own last byte already holds its CRC and end bit, so it
    /// goes out unchanged.
    pub fn r2(register: &[u8; 16]) -> ResponseFrame {
        let mut bytes: Vec<u8, LONG_LEN> = Vec::new();
        // Capacity is exactly 17 bytes, so neither of these can fail
        let _ = bytes.push(FRAME_RESERVED_INDEX);
        let _ = bytes.extend_from_slice(register);
        ResponseFrame {
            kind: ResponseKind::Long136,
            bytes,
            busy: false,
        }
    }

    /// An R3 response. R3 has no CRC.
    pub fn r3(ocr: Ocr) -> ResponseFrame {
        Self::short(FRAME_RESERVED_INDEX, ocr.0, false)
    }

    /// An R6 response, publishing a relative card address.
    pub fn r6(rca: u16, status: CardStatus) -> ResponseFrame {
        let argument = (u32::from(rca) << 16) | u32::from(status.r6_bits());
        Self::short(FRAME_CARD_TO_HOST | CMD3, argument, true)
    }

    /// An R7 response, echoing the interface condition.
    pub fn r7(argument: u32) -> ResponseFrame {
        Self::short(FRAME_CARD_TO_HOST | CMD8, argument, true)
    }

    /// What shape is this response?
    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    /// The bytes to send, in order.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The command index field of a short response (0x3F for R3).
    pub fn index(&self) -> Option<u8> {
        match self.kind {
            ResponseKind::Short48 => Some(self.bytes[0] & FRAME_INDEX_MASK),
            _ => None,
        }
    }

    /// The 32-bit argument field of a short response.
    pub fn argument(&self) -> Option<u32> {
        match self.kind {
            ResponseKind::Short48 => Some(BigEndian::read_u32(&self.bytes[1..5])),
            _ => None,
        }
    }

    /// The card status carried by an R1 response.
    pub fn status(&self) -> Option<CardStatus> {
        match self.index() {
            Some(FRAME_RESERVED_INDEX) | Some(CMD3) | Some(CMD8) | None => None,
            Some(_) => self.argument().map(CardStatus),
        }
    }

    /// The 16 byte register carried by an R2 response.
    pub fn register(&self) -> Option<[u8; 16]> {
        match self.kind {
            ResponseKind::Long136 => {
                let mut register = [0u8; 16];
                register.copy_from_slice(&self.bytes[1..LONG_LEN]);
                Some(register)
            }
            _ => None,
        }
    }
}

/// Builds response frames from the card's registers.
#[derive(Debug, Clone)]
pub struct ResponseGenerator {
    cid: Cid,
    csd: Csd,
    rca: u16,
}

impl ResponseGenerator {
    /// Create a generator for a card with the given registers.
    pub fn new(cid: Cid, csd: Csd, rca: u16) -> ResponseGenerator {
        ResponseGenerator { cid, csd, rca }
    }

    /// The relative card address this card publishes.
    pub fn rca(&self) -> u16 {
        self.rca
    }

    /// The card identification register.
    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    /// The card specific data register.
    pub fn csd(&self) -> &Csd {
        &self.csd
    }

    /// Swap in a new CSD (the transfer speed changes with high speed mode).
    pub fn set_csd(&mut self, csd: Csd) {
        self.csd = csd;
    }

    /// Render a reply to command `index`, given the status to report.
    pub fn render(&self, reply: Reply, index: u8, status: CardStatus) -> ResponseFrame {
        match reply {
            Reply::Silent => ResponseFrame::none(),
            Reply::Status => ResponseFrame::r1(index, status, false),
            Reply::StatusBusy => ResponseFrame::r1(index, status, true),
            Reply::Cid => ResponseFrame::r2(&self.cid.data),
            Reply::Csd => ResponseFrame::r2(&self.csd.data),
            Reply::Ocr(ocr) => ResponseFrame::r3(ocr),
            Reply::Rca => ResponseFrame::r6(self.rca, status),
            Reply::IfCond(argument) => ResponseFrame::r7(argument),
        }
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
