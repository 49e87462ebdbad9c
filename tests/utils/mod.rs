//! Useful library code for tests

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_sdemu::proto::*;
use embedded_sdemu::{
    Block, BlockCount, BlockDevice, BlockIdx, CardState, CommandFrame, LinkLayer, ReadPoll,
    ResponseFrame, BLOCK_LEN,
};

/// The RCA our cards publish, already shifted into place for an argument.
#[allow(unused)]
pub const RCA_ARG: u32 = 0x0001_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Asked for a block we don't have
    OutOfBounds(BlockIdx),
}

/// Implements the block device trait for a chunk of bytes in RAM.
pub struct RamDisk {
    contents: Vec<u8>,
}

impl RamDisk {
    /// A disk where every block holds [`pattern`] for its index.
    pub fn patterned(num_blocks: u32) -> RamDisk {
        let mut contents = Vec::with_capacity(num_blocks as usize * BLOCK_LEN);
        for idx in 0..num_blocks {
            contents.extend_from_slice(&pattern(idx));
        }
        RamDisk { contents }
    }

    /// Look at one block.
    #[allow(unused)]
    pub fn block(&self, idx: u32) -> &[u8] {
        let start = idx as usize * BLOCK_LEN;
        &self.contents[start..start + BLOCK_LEN]
    }
}

impl BlockDevice for RamDisk {
    type Error = Error;

    fn read(&mut self, block: &mut Block, block_idx: BlockIdx) -> Result<(), Self::Error> {
        let start_offset = block_idx.0 as usize * BLOCK_LEN;
        let end_offset = start_offset + BLOCK_LEN;
        if end_offset > self.contents.len() {
            return Err(Error::OutOfBounds(block_idx));
        }
        block.copy_from_slice(&self.contents[start_offset..end_offset]);
        Ok(())
    }

    fn write(&mut self, block: &Block, block_idx: BlockIdx) -> Result<(), Self::Error> {
        let start_offset = block_idx.0 as usize * BLOCK_LEN;
        let end_offset = start_offset + BLOCK_LEN;
        if end_offset > self.contents.len() {
            return Err(Error::OutOfBounds(block_idx));
        }
        self.contents[start_offset..end_offset].copy_from_slice(block);
        Ok(())
    }

    fn num_blocks(&self) -> Result<BlockCount, Self::Error> {
        Ok(BlockCount((self.contents.len() / BLOCK_LEN) as u32))
    }
}

/// The contents of block `idx` on a fresh [`RamDisk`].
pub fn pattern(idx: u32) -> Block {
    let mut block = [0u8; BLOCK_LEN];
    for (i, b) in block.iter_mut().enumerate() {
        *b = (idx as u8).wrapping_mul(7).wrapping_add(i as u8);
    }
    block
}

/// Send the card one command, the way a host would.
pub fn cmd<M: RawMutex>(card: &mut LinkLayer<'_, M>, index: u8, argument: u32) -> ResponseFrame {
    card.command(&CommandFrame::new(index, argument))
}

/// Send the card an application command.
#[allow(unused)]
pub fn acmd<M: RawMutex>(card: &mut LinkLayer<'_, M>, index: u8, argument: u32) -> ResponseFrame {
    let response = cmd(card, CMD55, RCA_ARG);
    assert!(response.status().unwrap().is_app_cmd());
    cmd(card, index, argument)
}

/// Take a fresh card all the way to the Transfer state.
pub fn select_card<M: RawMutex>(card: &mut LinkLayer<'_, M>) {
    cmd(card, CMD0, 0);
    assert_eq!(cmd(card, CMD8, 0x1AA).argument(), Some(0x1AA));
    cmd(card, CMD55, 0);
    let ocr = cmd(card, ACMD41, 0x4030_0000);
    assert_eq!(ocr.argument(), Some(0xC0FF_8000));
    assert_eq!(card.state(), CardState::Ready);
    assert!(cmd(card, CMD2, 0).register().is_some());
    let rca = cmd(card, CMD3, 0).argument().unwrap() >> 16;
    assert_eq!(rca, RCA_ARG >> 16);
    cmd(card, CMD7, RCA_ARG);
    assert_eq!(card.state(), CardState::Transfer);
}

/// Poll the card for data until it arrives, calling `between` each time it
/// isn't ready.
#[allow(unused)]
pub fn read_block<M, F>(card: &mut LinkLayer<'_, M>, mut between: F) -> Block
where
    M: RawMutex,
    F: FnMut(),
{
    let mut block = [0u8; BLOCK_LEN];
    loop {
        match card.read_data(&mut block).unwrap() {
            ReadPoll::Busy => between(),
            ReadPoll::Data { len, crc } => {
                assert_eq!(len, BLOCK_LEN);
                assert_eq!(crc, crc16(&block));
                return block;
            }
        }
    }
}

/// Install a logger, once.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
