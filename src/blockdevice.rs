//! Traits and types for working with Block Devices.
//!
//! The emulated card has no storage of its own. Whoever services the block
//! requests (see [`crate::manager`]) backs them with something that
//! implements [`BlockDevice`].

/// A standard 512 byte block (also known as a sector).
///
/// This is the only block size the SD protocol lets a high capacity card
/// use, so it is the only one we support.
pub type Block = [u8; BLOCK_LEN];

/// All our blocks are a fixed length of 512 bytes.
pub const BLOCK_LEN: usize = 512;

/// Sometimes we want `LEN` as a `u32` and the casts don't look nice.
pub const BLOCK_LEN_U32: u32 = 512;

/// The linear numeric address of a block (or sector).
///
/// SDHC cards are block addressed, so this is exactly what the host puts in
/// the argument of a read or write command.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockIdx(pub u32);

/// A number of blocks (or sectors).
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockCount(pub u32);

/// A device which can read and write 512-byte blocks.
pub trait BlockDevice {
    /// The errors that the `BlockDevice` can return. Must be debug formattable.
    type Error: core::fmt::Debug;
    /// Read one block at the given block index.
    fn read(&mut self, block: &mut Block, block_idx: BlockIdx) -> Result<(), Self::Error>;
    /// Write one block at the given block index.
    fn write(&mut self, block: &Block, block_idx: BlockIdx) -> Result<(), Self::Error>;
    /// Determine how many blocks this device can hold.
    fn num_blocks(&self) -> Result<BlockCount, Self::Error>;
    /// Erase the given range of blocks, including both ends.
    ///
    /// The default writes zeros over every block in the range. Devices that
    /// can do better should.
    fn erase(&mut self, first: BlockIdx, last: BlockIdx) -> Result<(), Self::Error> {
        let zeros = [0u8; BLOCK_LEN];
        for block_idx in BlockIter::new(first, last) {
            self.write(&zeros, block_idx)?;
        }
        Ok(())
    }
}

impl BlockIdx {
    /// Convert a block index into a 64-bit byte offset from the start of the
    /// device. Useful if your backing store works in bytes, like a file does.
    pub fn into_bytes(self) -> u64 {
        u64::from(self.0) * u64::from(BLOCK_LEN_U32)
    }
}

/// An iterator over an inclusive range of blocks, as used to walk an erase
/// range.
pub struct BlockIter {
    current: BlockIdx,
    remaining: u64,
}

impl BlockIter {
    /// Create a new `BlockIter`, from the given start block, through (and
    /// including) the given end block.
    pub const fn new(start: BlockIdx, inclusive_end: BlockIdx) -> BlockIter {
        let remaining = if inclusive_end.0 < start.0 {
            0
        } else {
            (inclusive_end.0 - start.0) as u64 + 1
        };
        BlockIter {
            current: start,
            remaining,
        }
    }
}

impl core::iter::Iterator for BlockIter {
    type Item = BlockIdx;
    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            None
        } else {
            let this = self.current;
            self.remaining -= 1;
            self.current.0 = self.current.0.wrapping_add(1);
            Some(this)
        }
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
