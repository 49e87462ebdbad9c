//! embedded-sdemu - Constants from the SD Specifications
//!
//! The CRC routines are based on SdFat, under the following terms:
//!
//! > Copyright (c) 2011-2018 Bill Greiman
//! > This file is part of the SdFat library for SD memory cards.
//! >
//! > MIT License
//! >
//! > Permission is hereby granted, free of charge, to any person obtaining a
//! > copy of this software and associated documentation files (the "Software"),
//! > to deal in the Software without restriction, including without limitation
//! > the rights to use, copy, modify, merge, publish, distribute, sublicense,
//! > and/or sell copies of the Software, and to permit persons to whom the
//! > Software is furnished to do so, subject to the following conditions:
//! >
//! > The above copyright notice and this permission notice shall be included
//! > in all copies or substantial portions of the Software.
//! >
//! > THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
//! > OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//! > FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//! > AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//! > LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
//! > FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
//! > DEALINGS IN THE SOFTWARE.

//==============================================================================

// SD Card Commands (native mode, as seen by the card)

/// GO_IDLE_STATE - reset the card to idle
pub const CMD0: u8 = 0x00;
/// ALL_SEND_CID - ask every card on the bus for its CID
pub const CMD2: u8 = 0x02;
/// SEND_RELATIVE_ADDR - ask the card to publish a new RCA
pub const CMD3: u8 = 0x03;
/// SWITCH_FUNC - check or switch card function (high speed)
pub const CMD6: u8 = 0x06;
/// SELECT/DESELECT_CARD - toggle between standby and transfer
pub const CMD7: u8 = 0x07;
/// SEND_IF_COND - verify SD Memory Card interface operating condition
pub const CMD8: u8 = 0x08;
/// SEND_CSD - read the Card Specific Data (CSD register)
pub const CMD9: u8 = 0x09;
/// SEND_CID - read the Card Identification (CID register)
pub const CMD10: u8 = 0x0A;
/// STOP_TRANSMISSION - end multiple block read or write sequence
pub const CMD12: u8 = 0x0C;
/// SEND_STATUS - read the card status register
pub const CMD13: u8 = 0x0D;
/// GO_INACTIVE_STATE - park the addressed card
pub const CMD15: u8 = 0x0F;
/// SET_BLOCKLEN - set the block length (only 512 is accepted on SDHC)
pub const CMD16: u8 = 0x10;
/// READ_SINGLE_BLOCK - read a single data block from the card
pub const CMD17: u8 = 0x11;
/// READ_MULTIPLE_BLOCK - read a multiple data blocks from the card
pub const CMD18: u8 = 0x12;
/// SET_BLOCK_COUNT - pre-define the length of the next multi-block command
pub const CMD23: u8 = 0x17;
/// WRITE_BLOCK - write a single data block to the card
pub const CMD24: u8 = 0x18;
/// WRITE_MULTIPLE_BLOCK - write blocks of data until a STOP_TRANSMISSION
pub const CMD25: u8 = 0x19;
/// ERASE_WR_BLK_START - first block of the erase range
pub const CMD32: u8 = 0x20;
/// ERASE_WR_BLK_END - last block of the erase range
pub const CMD33: u8 = 0x21;
/// ERASE - erase the selected range
pub const CMD38: u8 = 0x26;
/// APP_CMD - escape for application specific command
pub const CMD55: u8 = 0x37;
/// READ_OCR - read the OCR register of a card (SPI mode only)
pub const CMD58: u8 = 0x3A;
/// CRC_ON_OFF - enable or disable CRC checking (SPI mode only)
pub const CMD59: u8 = 0x3B;

/// SET_BUS_WIDTH - select 1-bit or 4-bit data bus
pub const ACMD6: u8 = 0x06;
/// SD_STATUS - read the 512-bit SD status
pub const ACMD13: u8 = 0x0D;
/// SET_WR_BLK_ERASE_COUNT - number of blocks to pre-erase before writing
pub const ACMD23: u8 = 0x17;
/// SD_SEND_OP_COND - Sends host capacity support information and activates
/// the card's initialization process
pub const ACMD41: u8 = 0x29;
/// SET_CLR_CARD_DETECT - connect or disconnect the DAT3 pull-up
pub const ACMD42: u8 = 0x2A;
/// SEND_SCR - read the SD Configuration Register
pub const ACMD51: u8 = 0x33;

//==============================================================================

// Card status (R1) bits

/// The command's argument was out of the allowed range for this card
pub const STATUS_OUT_OF_RANGE: u32 = 1 << 31;
/// A misaligned address was used in the command
pub const STATUS_ADDRESS_ERROR: u32 = 1 << 30;
/// The transferred block length is not allowed for this card
pub const STATUS_BLOCK_LEN_ERROR: u32 = 1 << 29;
/// An error in the sequence of erase commands occurred
pub const STATUS_ERASE_SEQ_ERROR: u32 = 1 << 28;
/// An invalid selection of write-blocks for erase occurred
pub const STATUS_ERASE_PARAM: u32 = 1 << 27;
/// The CRC check of the previous command failed
pub const STATUS_COM_CRC_ERROR: u32 = 1 << 23;
/// Command not legal for the card state
pub const STATUS_ILLEGAL_COMMAND: u32 = 1 << 22;
/// A general or an unknown error occurred during the operation
pub const STATUS_ERROR: u32 = 1 << 19;
/// Mask for the CURRENT_STATE field
pub const STATUS_STATE_MASK: u32 = 0xF << STATUS_STATE_SHIFT;
/// Position of the CURRENT_STATE field
pub const STATUS_STATE_SHIFT: u32 = 9;
/// Corresponds to buffer empty signaling on the bus
pub const STATUS_READY_FOR_DATA: u32 = 1 << 8;
/// The card will expect ACMD, or the command has been interpreted as ACMD
pub const STATUS_APP_CMD: u32 = 1 << 5;

/// Bits which are cleared once they have been reported in a response
pub const STATUS_CLEAR_ON_READ: u32 = STATUS_OUT_OF_RANGE
    | STATUS_ADDRESS_ERROR
    | STATUS_BLOCK_LEN_ERROR
    | STATUS_ERASE_SEQ_ERROR
    | STATUS_ERASE_PARAM
    | STATUS_COM_CRC_ERROR
    | STATUS_ILLEGAL_COMMAND
    | STATUS_ERROR;

//==============================================================================

// OCR bits

/// Card power up status bit (busy bit, set when the card is ready)
pub const OCR_POWER_UP: u32 = 1 << 31;
/// Card Capacity Status - set for block addressed (SDHC/SDXC) cards
pub const OCR_CCS: u32 = 1 << 30;
/// The 2.7 V - 3.6 V voltage window
pub const OCR_VOLTAGE_WINDOW: u32 = 0x00FF_8000;
/// Host Capacity Support bit in the ACMD41 argument
pub const ACMD41_HCS: u32 = 1 << 30;

/// Voltage supplied field of the CMD8 argument
pub const IF_COND_VHS_MASK: u32 = 0x0000_0F00;
/// The only voltage range we accept, 2.7 V - 3.6 V
pub const IF_COND_VHS_27_36: u32 = 0x0000_0100;
/// Check pattern field of the CMD8 argument
pub const IF_COND_PATTERN_MASK: u32 = 0x0000_00FF;

//==============================================================================

// Framing

/// Start bit clear, transmission bit set: a frame travelling host to card
pub const FRAME_HOST_TO_CARD: u8 = 0x40;
/// Start and transmission bits both clear: a frame travelling card to host
pub const FRAME_CARD_TO_HOST: u8 = 0x00;
/// Mask for the start and transmission bits
pub const FRAME_DIRECTION_MASK: u8 = 0xC0;
/// Mask for the command index
pub const FRAME_INDEX_MASK: u8 = 0x3F;
/// Leading byte of R2 and R3 responses (reserved field of all ones)
pub const FRAME_RESERVED_INDEX: u8 = 0x3F;
/// The trailing byte of an R3 response (no CRC, end bit set)
pub const FRAME_NO_CRC: u8 = 0xFF;

/// start data token for a data block
pub const DATA_START_BLOCK: u8 = 0xFE;

/// mask for data response tokens after a write block operation
pub const DATA_RES_MASK: u8 = 0x1F;

/// write data accepted token
pub const DATA_RES_ACCEPTED: u8 = 0x05;

/// write data rejected due to a CRC error
pub const DATA_RES_CRC_ERROR: u8 = 0x0B;

/// write data rejected due to a write error
pub const DATA_RES_WRITE_ERROR: u8 = 0x0D;

/// Perform the 7-bit CRC used on the SD card
///
/// The CRC is returned in the top seven bits, with the end bit set, so the
/// result can be used directly as the last byte of a frame.
pub fn crc7(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for mut d in data.iter().cloned() {
        for _bit in 0..8 {
            crc <<= 1;
            if ((d & 0x80) ^ (crc & 0x80)) != 0 {
                crc ^= 0x09;
            }
            d <<= 1;
        }
    }
    (crc << 1) | 1
}

/// Perform the CRC-16 (CCITT polynomial, zero seed) used on data blocks.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &byte in data {
        crc = ((crc >> 8) & 0xFF) | (crc << 8);
        crc ^= u16::from(byte);
        crc ^= (crc & 0xFF) >> 4;
        crc ^= crc << 12;
        crc ^= (crc & 0xFF) << 5;
    }
    crc
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
