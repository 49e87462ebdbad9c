//! The Buffer Pair
//!
//! Two single-block buffers, one per transfer direction. Each is a 128 word
//! memory with two ports: the protocol side moves data to or from the host,
//! the consumer side moves data to or from whatever is backing the card.
//!
//! Only one port may touch a buffer at a time. Ownership moves from one port
//! to the other as block requests are raised and acknowledged, and any access
//! through the port that doesn't currently own the buffer is refused with
//! [`Error::BufferBusy`].
//!
//! Every time a buffer passes to the consumer it is given a new ticket. A
//! consumer that took note of the ticket when it picked up a request can
//! later tell whether the buffer it holds is still for that request, or for
//! one the link layer raised after withdrawing it.
//!
//! The consumer also sees both buffers through a single 1 KiB bus window.
//! Address bit 9 picks the buffer: the read buffer sits at `0x000..0x200`,
//! the write buffer at `0x200..0x400`. Words are little-endian.

use byteorder::{ByteOrder, LittleEndian};

use crate::blockdevice::{Block, BLOCK_LEN, BLOCK_LEN_U32};
use crate::Error;

/// Number of 32-bit words in one buffer.
pub const BUFFER_WORDS: usize = BLOCK_LEN / 4;

/// The bus address bit which selects the write buffer.
pub const WRITE_WINDOW: u32 = 1 << 9;

/// Size of the whole bus window, both buffers.
pub const WINDOW_LEN: u32 = 2 * BLOCK_LEN_U32;

/// Which side of the emulator is accessing a buffer.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Port {
    /// The host facing link layer
    Protocol,
    /// The software servicing block requests
    Consumer,
}

impl Port {
    fn other(self) -> Port {
        match self {
            Port::Protocol => Port::Consumer,
            Port::Consumer => Port::Protocol,
        }
    }
}

/// Which of the two buffers.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Data on its way to the host (the consumer fills it)
    Read,
    /// Data on its way from the host (the consumer drains it)
    Write,
}

#[derive(Debug, Clone)]
struct Buffer {
    words: [u32; BUFFER_WORDS],
    owner: Port,
    ticket: u32,
}

impl Buffer {
    const fn new() -> Buffer {
        Buffer {
            words: [0; BUFFER_WORDS],
            owner: Port::Protocol,
            ticket: 0,
        }
    }

    fn give(&mut self, port: Port) {
        if port == Port::Consumer {
            self.ticket = self.ticket.wrapping_add(1);
        }
        self.owner = port;
    }

    fn check(&self, port: Port) -> Result<(), Error> {
        if self.owner == port {
            Ok(())
        } else {
            Err(Error::BufferBusy)
        }
    }
}

/// The read and write buffers.
#[derive(Debug, Clone)]
pub struct BufferPair {
    read: Buffer,
    write: Buffer,
}

impl BufferPair {
    /// Create a pair of zeroed buffers, both owned by the protocol side.
    pub const fn new() -> BufferPair {
        BufferPair {
            read: Buffer::new(),
            write: Buffer::new(),
        }
    }

    fn buffer(&self, direction: Direction) -> &Buffer {
        match direction {
            Direction::Read => &self.read,
            Direction::Write => &self.write,
        }
    }

    fn buffer_mut(&mut self, direction: Direction) -> &mut Buffer {
        match direction {
            Direction::Read => &mut self.read,
            Direction::Write => &mut self.write,
        }
    }

    /// Who may currently access the given buffer?
    pub fn owner(&self, direction: Direction) -> Port {
        self.buffer(direction).owner
    }

    /// Give a buffer to a port, whoever holds it now.
    ///
    /// Only the link layer does this; it is how a request is raised and how
    /// an aborted transfer takes its buffers back.
    pub(crate) fn hand_to(&mut self, direction: Direction, port: Port) {
        self.buffer_mut(direction).give(port);
    }

    /// The ticket the given buffer was last handed to the consumer with.
    pub fn ticket(&self, direction: Direction) -> u32 {
        self.buffer(direction).ticket
    }

    /// Check that `port` owns a buffer, and still on the given ticket.
    pub fn claim(&self, port: Port, direction: Direction, ticket: u32) -> Result<(), Error> {
        let buffer = self.buffer(direction);
        buffer.check(port)?;
        if buffer.ticket == ticket {
            Ok(())
        } else {
            Err(Error::BufferBusy)
        }
    }

    /// Give up a buffer, passing it to the other port.
    ///
    /// Returns `false`, and changes nothing, if `port` didn't own it.
    pub fn release(&mut self, direction: Direction, port: Port) -> bool {
        let buffer = self.buffer_mut(direction);
        if buffer.owner == port {
            buffer.give(port.other());
            true
        } else {
            false
        }
    }

    /// Read one word from a buffer.
    pub fn read_word(&self, port: Port, direction: Direction, index: usize) -> Result<u32, Error> {
        let buffer = self.buffer(direction);
        buffer.check(port)?;
        buffer
            .words
            .get(index)
            .copied()
            .ok_or(Error::OutOfBounds(index as u32))
    }

    /// Write one word into a buffer.
    pub fn write_word(
        &mut self,
        port: Port,
        direction: Direction,
        index: usize,
        value: u32,
    ) -> Result<(), Error> {
        let buffer = self.buffer_mut(direction);
        buffer.check(port)?;
        let word = buffer
            .words
            .get_mut(index)
            .ok_or(Error::OutOfBounds(index as u32))?;
        *word = value;
        Ok(())
    }

    /// Copy a whole block into a buffer.
    pub fn load(&mut self, port: Port, direction: Direction, block: &Block) -> Result<(), Error> {
        let buffer = self.buffer_mut(direction);
        buffer.check(port)?;
        LittleEndian::read_u32_into(block, &mut buffer.words);
        Ok(())
    }

    /// Copy a whole buffer out into a block.
    pub fn store(&self, port: Port, direction: Direction, block: &mut Block) -> Result<(), Error> {
        let buffer = self.buffer(direction);
        buffer.check(port)?;
        LittleEndian::write_u32_into(&buffer.words, block);
        Ok(())
    }

    /// Decode a bus address into a buffer and a word index.
    pub fn decode_address(address: u32) -> Result<(Direction, usize), Error> {
        if address >= WINDOW_LEN || (address & 3) != 0 {
            return Err(Error::OutOfBounds(address));
        }
        let direction = if (address & WRITE_WINDOW) != 0 {
            Direction::Write
        } else {
            Direction::Read
        };
        Ok((direction, ((address & !WRITE_WINDOW) / 4) as usize))
    }

    /// Read a word through the bus window.
    pub fn bus_read(&self, port: Port, address: u32) -> Result<u32, Error> {
        let (direction, index) = Self::decode_address(address)?;
        self.read_word(port, direction, index)
    }

    /// Write a word through the bus window.
    pub fn bus_write(&mut self, port: Port, address: u32, value: u32) -> Result<(), Error> {
        let (direction, index) = Self::decode_address(address)?;
        self.write_word(port, direction, index, value)
    }
}

impl Default for BufferPair {
    fn default() -> Self {
        BufferPair::new()
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
