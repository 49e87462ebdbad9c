//! The Command Decoder
//!
//! Turns the host's CMD line into [`CommandFrame`]s. A command is 48 bits:
//!
//! ```text
//! 47    46    45..40  39..8     7..1  0
//! start trans index   argument  crc7  end
//! 0     1
//! ```
//!
//! The line idles high. The decoder waits for a start bit, checks that the
//! transmission bit marks the frame as host-to-card (anything else is a card
//! talking, and is skipped), then collects the rest of the frame.

use byteorder::{BigEndian, ByteOrder};

use crate::proto::{crc7, FRAME_DIRECTION_MASK, FRAME_HOST_TO_CARD, FRAME_INDEX_MASK};
use crate::trace;

/// Number of bits in a command frame.
pub const COMMAND_BITS: u8 = 48;

/// Number of bytes in a command frame.
pub const COMMAND_LEN: usize = 6;

/// A command, as decoded from the CMD line.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// The 6-bit command index
    pub index: u8,
    /// The 32-bit argument
    pub argument: u32,
    /// The 7-bit CRC as received
    pub crc: u8,
    /// Did the CRC (and end bit) check out?
    pub crc_valid: bool,
}

impl CommandFrame {
    /// Build a frame the way a host would, with a correct CRC.
    pub fn new(index: u8, argument: u32) -> CommandFrame {
        let mut bytes = [0u8; COMMAND_LEN];
        bytes[0] = FRAME_HOST_TO_CARD | (index & FRAME_INDEX_MASK);
        BigEndian::write_u32(&mut bytes[1..5], argument);
        CommandFrame {
            index: index & FRAME_INDEX_MASK,
            argument,
            crc: crc7(&bytes[0..5]) >> 1,
            crc_valid: true,
        }
    }

    /// Serialise the frame, using whatever CRC it carries.
    pub fn encode(&self) -> [u8; COMMAND_LEN] {
        let mut bytes = [0u8; COMMAND_LEN];
        bytes[0] = FRAME_HOST_TO_CARD | (self.index & FRAME_INDEX_MASK);
        BigEndian::write_u32(&mut bytes[1..5], self.argument);
        bytes[5] = (self.crc << 1) | 1;
        bytes
    }

    /// Parse six bytes from the CMD line.
    ///
    /// Returns `None` if the start and transmission bits don't mark a
    /// host-to-card frame. A bad CRC or a missing end bit still produce a
    /// frame, with `crc_valid` clear.
    pub fn decode(bytes: &[u8; COMMAND_LEN]) -> Option<CommandFrame> {
        if (bytes[0] & FRAME_DIRECTION_MASK) != FRAME_HOST_TO_CARD {
            return None;
        }
        Some(CommandFrame {
            index: bytes[0] & FRAME_INDEX_MASK,
            argument: BigEndian::read_u32(&bytes[1..5]),
            crc: bytes[5] >> 1,
            crc_valid: crc7(&bytes[0..5]) == bytes[5],
        })
    }

    /// The relative card address carried in the top half of the argument.
    pub fn rca(&self) -> u16 {
        (self.argument >> 16) as u16
    }
}

/// Collects bits from the CMD line into frames.
#[derive(Debug, Default, Clone)]
pub struct CommandDecoder {
    shift: u64,
    count: u8,
}

impl CommandDecoder {
    /// Create a decoder waiting for a start bit.
    pub const fn new() -> CommandDecoder {
        CommandDecoder { shift: 0, count: 0 }
    }

    /// Forget any partial frame.
    pub fn reset(&mut self) {
        self.shift = 0;
        self.count = 0;
    }

    /// Is a frame partly received?
    pub fn is_busy(&self) -> bool {
        self.count != 0
    }

    /// Clock one bit in from the CMD line.
    ///
    /// Returns a frame on the bit that completes it, and only then.
    pub fn push_bit(&mut self, bit: bool) -> Option<CommandFrame> {
        if self.count == 0 && bit {
            // Idle line
            return None;
        }
        self.shift = (self.shift << 1) | u64::from(bit);
        self.count += 1;
        if self.count == 2 && !bit {
            trace!("Skipping card-to-host frame");
            // Not for us. The rest of it gets skipped as noise, since an R2
            // is too long for us to track without knowing the command.
            self.reset();
            return None;
        }
        if self.count < COMMAND_BITS {
            return None;
        }
        let mut bytes = [0u8; 8];
        BigEndian::write_u64(&mut bytes, self.shift);
        self.reset();
        let mut frame = [0u8; COMMAND_LEN];
        frame.copy_from_slice(&bytes[2..8]);
        let decoded = CommandFrame::decode(&frame);
        if let Some(ref f) = decoded {
            trace!(
                "CMD{} arg {:08x} crc {:02x} valid {}",
                f.index,
                f.argument,
                f.crc,
                f.crc_valid
            );
        }
        decoded
    }

    /// Clock eight bits in, most significant first.
    pub fn push_byte(&mut self, byte: u8) -> Option<CommandFrame> {
        let mut result = None;
        for bit in (0..8).rev() {
            if let Some(frame) = self.push_bit((byte >> bit) & 1 != 0) {
                result = Some(frame);
            }
        }
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_known_frames() {
        assert_eq!(CommandFrame::new(0, 0).encode(), hex!("40 00 00 00 00 95"));
        assert_eq!(
            CommandFrame::new(8, 0x1AA).encode(),
            hex!("48 00 00 01 AA 87")
        );
    }

    #[test]
    fn decode_recovers_index_and_argument() {
        for index in 0..64u8 {
            for &argument in &[0, 1, 0x1AA, 0x8000_0000, 0xDEAD_BEEF, u32::MAX] {
                let frame = CommandFrame::decode(&CommandFrame::new(index, argument).encode())
                    .unwrap();
                assert_eq!(frame.index, index);
                assert_eq!(frame.argument, argument);
                assert!(frame.crc_valid);
            }
        }
    }

    #[test]
    fn any_single_bit_flip_is_caught() {
        let good = CommandFrame::new(17, 0x0000_1234).encode();
        // Flip every bit after the start and transmission bits
        for bit in 2..48 {
            let mut bad = good;
            bad[bit / 8] ^= 0x80 >> (bit % 8);
            let frame = CommandFrame::decode(&bad).unwrap();
            assert!(!frame.crc_valid, "flip of bit {} not caught", bit);
        }
    }

    #[test]
    fn wrong_direction_is_not_a_command() {
        assert_eq!(CommandFrame::decode(&hex!("00 00 00 00 00 01")), None);
        assert_eq!(CommandFrame::decode(&hex!("C0 00 00 00 00 01")), None);
    }

    #[test]
    fn decoder_skips_idle_bits() {
        let mut decoder = CommandDecoder::new();
        for _ in 0..20 {
            assert_eq!(decoder.push_bit(true), None);
        }
        assert!(!decoder.is_busy());
        let bytes = CommandFrame::new(55, 0).encode();
        let mut frames = 0;
        for (i, b) in bytes.iter().enumerate() {
            let result = decoder.push_byte(*b);
            if i < 5 {
                assert_eq!(result, None);
            } else {
                assert_eq!(result, Some(CommandFrame::new(55, 0)));
                frames += 1;
            }
        }
        assert_eq!(frames, 1);
        assert!(!decoder.is_busy());
    }

    #[test]
    fn decoder_handles_unaligned_frames() {
        let mut decoder = CommandDecoder::new();
        // Three idle bits, then the frame, then idle
        for _ in 0..3 {
            decoder.push_bit(true);
        }
        let bytes = CommandFrame::new(13, 0x0001_0000).encode();
        let mut found = None;
        for b in bytes.iter() {
            for bit in (0..8).rev() {
                if let Some(f) = decoder.push_bit((b >> bit) & 1 != 0) {
                    found = Some(f);
                }
            }
        }
        assert_eq!(found, Some(CommandFrame::new(13, 0x0001_0000)));
        assert_eq!(found.map(|f| f.rca()), Some(1));
    }

    #[test]
    fn decoder_surfaces_bad_crc() {
        let mut decoder = CommandDecoder::new();
        let mut bytes = CommandFrame::new(17, 100).encode();
        bytes[5] ^= 0x02;
        let mut found = None;
        for b in bytes.iter() {
            found = decoder.push_byte(*b).or(found);
        }
        let frame = found.unwrap();
        assert_eq!(frame.index, 17);
        assert_eq!(frame.argument, 100);
        assert!(!frame.crc_valid);
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
