//! embedded-sdemu - Card registers
//!
//! The registers a card presents to the host during identification and
//! configuration. Unlike a host-side driver, we have to build these rather
//! than just parse them, so each one has a constructor as well as the usual
//! field getters.

use byteorder::{BigEndian, ByteOrder};

use crate::link::CardState;
use crate::proto::*;

/// The 32-bit card status, as carried in an R1 response.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CardStatus(pub u32);

impl CardStatus {
    /// Build a status word from a set of flag bits and the current state.
    pub fn new(flags: u32, state: CardState) -> CardStatus {
        CardStatus(
            (flags & !STATUS_STATE_MASK) | (u32::from(state.code()) << STATUS_STATE_SHIFT),
        )
    }

    /// The CURRENT_STATE field, decoded.
    pub fn state(self) -> Option<CardState> {
        CardState::from_code(((self.0 & STATUS_STATE_MASK) >> STATUS_STATE_SHIFT) as u8)
    }

    /// Is the given bit (or bits) set?
    pub fn contains(self, bits: u32) -> bool {
        (self.0 & bits) == bits
    }

    /// Was the previous command received with a bad CRC?
    pub fn is_com_crc_error(self) -> bool {
        self.contains(STATUS_COM_CRC_ERROR)
    }

    /// Was a command illegal in the state it was received in?
    pub fn is_illegal_command(self) -> bool {
        self.contains(STATUS_ILLEGAL_COMMAND)
    }

    /// Was an argument out of range?
    pub fn is_out_of_range(self) -> bool {
        self.contains(STATUS_OUT_OF_RANGE)
    }

    /// Is the card expecting an application command?
    pub fn is_app_cmd(self) -> bool {
        self.contains(STATUS_APP_CMD)
    }

    /// Is the card ready to accept another data block?
    pub fn is_ready_for_data(self) -> bool {
        self.contains(STATUS_READY_FOR_DATA)
    }

    /// The 16 status bits carried in an R6 response.
    ///
    /// Bits 23, 22 and 19 of the card status move down to bits 15, 14 and
    /// 13, and the bottom 13 bits come across unchanged.
    pub fn r6_bits(self) -> u16 {
        let mut bits = (self.0 & 0x1FFF) as u16;
        if self.contains(STATUS_COM_CRC_ERROR) {
            bits |= 1 << 15;
        }
        if self.contains(STATUS_ILLEGAL_COMMAND) {
            bits |= 1 << 14;
        }
        if self.contains(STATUS_ERROR) {
            bits |= 1 << 13;
        }
        bits
    }
}

/// The Operating Conditions Register, as returned by ACMD41.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Ocr(pub u32);

impl Ocr {
    /// An OCR for a card that supports 2.7 V - 3.6 V.
    pub fn new(powered_up: bool, block_addressed: bool) -> Ocr {
        let mut value = OCR_VOLTAGE_WINDOW;
        if powered_up {
            value |= OCR_POWER_UP;
            // CCS is only valid once the power up bit is set
            if block_addressed {
                value |= OCR_CCS;
            }
        }
        Ocr(value)
    }

    /// Has the card finished powering up?
    pub fn is_powered_up(self) -> bool {
        (self.0 & OCR_POWER_UP) != 0
    }

    /// Is this a block addressed (high capacity) card?
    pub fn is_block_addressed(self) -> bool {
        (self.0 & OCR_CCS) != 0
    }
}

/// Card Identification register
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Cid {
    /// The 16-bytes of data in this Card Identification register
    pub data: [u8; 16],
}

impl Cid {
    /// Build a CID, including its CRC.
    ///
    /// The manufacturing date is stored as years since 2000, so years before
    /// 2000 are clamped.
    pub fn new(
        manufacturer_id: u8,
        oem_id: [u8; 2],
        product_name: [u8; 5],
        product_revision: u8,
        serial_number: u32,
        year: u16,
        month: u8,
    ) -> Cid {
        let mut data = [0u8; 16];
        data[0] = manufacturer_id;
        data[1..3].copy_from_slice(&oem_id);
        data[3..8].copy_from_slice(&product_name);
        data[8] = product_revision;
        BigEndian::write_u32(&mut data[9..13], serial_number);
        let year = year.saturating_sub(2000).min(0xFF) as u8;
        data[13] = year >> 4;
        data[14] = (year << 4) | (month & 0x0F);
        data[15] = crc7(&data[0..15]);
        Cid { data }
    }

    define_field!(manufacturer_id, u8, 0);
    define_field!(product_revision, u8, 8);
    define_field!(serial_number, u32, 9);
    define_field!(manufacturing_year, u8, [(13, 0, 4), (14, 4, 4)]);
    define_field!(manufacturing_month, u8, 14, 0, 4);
    define_field!(crc, u8, 15);

    /// The two character OEM/application ID
    pub fn oem_id(&self) -> [u8; 2] {
        [self.data[1], self.data[2]]
    }

    /// The five character product name
    pub fn product_name(&self) -> [u8; 5] {
        let mut name = [0u8; 5];
        name.copy_from_slice(&self.data[3..8]);
        name
    }
}

impl Default for Cid {
    fn default() -> Self {
        Cid::new(0xF5, *b"SE", *b"SDEMU", 0x10, 0xF00D_1E55, 2024, 1)
    }
}

/// A version 2 CSD counts capacity in units of this many 512-byte blocks.
pub const CSD_SIZE_UNIT: u32 = 1024;

/// Card Specific Data, version 2 (SDHC/SDXC layout)
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Csd {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; 16],
}

impl Csd {
    /// Build a CSD describing a card of the given number of 512-byte blocks.
    ///
    /// Capacity is expressed in units of [`CSD_SIZE_UNIT`] blocks, so the
    /// reported size is rounded down to a whole unit. Anything under one unit
    /// is reported as one unit, the smallest size the register can hold.
    pub fn new(capacity_blocks: u32, high_speed: bool) -> Csd {
        let device_size = (capacity_blocks / CSD_SIZE_UNIT).saturating_sub(1) & 0x003F_FFFF;
        let mut data = [0u8; 16];
        // CSD_STRUCTURE = 1
        data[0] = 0x40;
        // TAAC = 1 ms, NSAC = 0
        data[1] = 0x0E;
        data[2] = 0x00;
        // TRAN_SPEED = 25 MHz or 50 MHz
        data[3] = if high_speed { 0x5A } else { 0x32 };
        // CCC = 0x5B5, READ_BL_LEN = 9 (512 bytes)
        data[4] = 0x5B;
        data[5] = 0x59;
        data[6] = 0x00;
        data[7] = (device_size >> 16) as u8 & 0x3F;
        data[8] = (device_size >> 8) as u8;
        data[9] = device_size as u8;
        // ERASE_BLK_EN = 1, SECTOR_SIZE = 0x7F
        data[10] = 0x7F;
        data[11] = 0x80;
        // R2W_FACTOR = 2, WRITE_BL_LEN = 9
        data[12] = 0x0A;
        data[13] = 0x40;
        data[14] = 0x00;
        data[15] = crc7(&data[0..15]);
        Csd { data }
    }

    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(data_read_access_time1, u8, 1, 0, 8);
    define_field!(max_data_transfer_rate, u8, 3, 0, 8);
    define_field!(card_command_classes, u16, [(4, 0, 8), (5, 4, 4)]);
    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(device_size, u32, [(7, 0, 6), (8, 0, 8), (9, 0, 8)]);
    define_field!(erase_single_block_enabled, bool, 10, 6);
    define_field!(erase_sector_size, u8, [(10, 0, 6), (11, 7, 1)]);
    define_field!(write_speed_factor, u8, 12, 2, 3);
    define_field!(max_write_data_length, u8, [(12, 0, 2), (13, 6, 2)]);
    define_field!(crc, u8, 15, 0, 8);

    /// Returns the card capacity in bytes
    pub fn card_capacity_bytes(&self) -> u64 {
        (u64::from(self.device_size()) + 1) * 512 * 1024
    }

    /// Returns the card capacity in 512-byte blocks
    pub fn card_capacity_blocks(&self) -> u32 {
        (self.device_size() + 1) * CSD_SIZE_UNIT
    }
}

/// SD Configuration Register, sent as an 8-byte data block by ACMD51
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Scr {
    /// The 8-bytes of data in this register
    pub data: [u8; 8],
}

impl Scr {
    /// An SCR for a Physical Layer v3.0 card with 1-bit and 4-bit buses and
    /// CMD23 support.
    pub fn new() -> Scr {
        Scr {
            data: [0x02, 0x05, 0x80, 0x02, 0x00, 0x00, 0x00, 0x00],
        }
    }

    define_field!(scr_structure, u8, 0, 4, 4);
    define_field!(sd_spec, u8, 0, 0, 4);
    define_field!(bus_widths, u8, 1, 0, 4);
    define_field!(sd_spec3, bool, 2, 7);
    define_field!(cmd23_supported, bool, 3, 1);
}

impl Default for Scr {
    fn default() -> Self {
        Scr::new()
    }
}

/// The 512-bit switch function status returned as data by CMD6
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SwitchStatus {
    /// The 64 bytes of the status block
    pub data: [u8; 64],
}

impl SwitchStatus {
    /// Function group 1 function 1: high speed / SDR25
    pub const HIGH_SPEED: u8 = 0x1;

    /// Result nibble for a function that cannot be selected
    pub const UNSUPPORTED: u8 = 0xF;

    /// Work out the answer to a CMD6 with the given argument.
    ///
    /// `current_hs` is whether high speed has already been switched on. The
    /// returned flag says whether group 1 ends up on the high speed function.
    pub fn new(argument: u32, enable_hs: bool, current_hs: bool) -> (SwitchStatus, bool) {
        let mut data = [0u8; 64];
        // Maximum current consumption, 100 mA
        BigEndian::write_u16(&mut data[0..2], 100);
        // Support bits for groups 6 down to 2: default function only
        for group in 0..5 {
            BigEndian::write_u16(&mut data[2 + group * 2..4 + group * 2], 0x8001);
        }
        // Group 1
        let group1_support = if enable_hs { 0x8003 } else { 0x8001 };
        BigEndian::write_u16(&mut data[12..14], group1_support);

        let requested = (argument & 0xF) as u8;
        let group1 = match requested {
            0xF => {
                if current_hs {
                    Self::HIGH_SPEED
                } else {
                    0
                }
            }
            0 => 0,
            Self::HIGH_SPEED if enable_hs => Self::HIGH_SPEED,
            _ => Self::UNSUPPORTED,
        };
        // Groups 2 to 6 only know their default function
        let mut others = [0u8; 5];
        for (group, result) in others.iter_mut().enumerate() {
            let request = ((argument >> (4 * (group + 1))) & 0xF) as u8;
            *result = match request {
                0 | 0xF => 0,
                _ => Self::UNSUPPORTED,
            };
        }
        data[14] = (others[4] << 4) | others[3];
        data[15] = (others[2] << 4) | others[1];
        data[16] = (others[0] << 4) | group1;

        (SwitchStatus { data }, group1 == Self::HIGH_SPEED)
    }

    define_field!(max_current, u16, 0);
    define_field!(group1_support, u16, 12);
    define_field!(group1_selection, u8, 16, 0, 4);
}

/// The 512-bit SD status returned as data by ACMD13
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SdStatus {
    /// The 64 bytes of the status block
    pub data: [u8; 64],
}

impl SdStatus {
    /// Build the status for the current bus width.
    pub fn new(wide_bus: bool) -> SdStatus {
        let mut data = [0u8; 64];
        // DAT_BUS_WIDTH: 0b00 = 1 bit, 0b10 = 4 bit
        data[0] = if wide_bus { 0x80 } else { 0x00 };
        // SPEED_CLASS = class 10
        data[8] = 0x04;
        // PERFORMANCE_MOVE = 1 MB/s
        data[9] = 0x01;
        SdStatus { data }
    }

    define_field!(bus_width, u8, 0, 6, 2);
    define_field!(speed_class, u8, 8);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn csd_matches_real_card() {
        // The CSD of a real 4 GB SDHC card, with the same device size
        let csd = Csd::new(7_710_720, false);
        assert_eq!(
            csd.data,
            hex!("40 0E 00 32 5B 59 00 00 1D 69 7F 80 0A 40 00 8B")
        );
        assert_eq!(csd.csd_ver(), 0x01);
        assert_eq!(csd.card_command_classes(), 0x5b5);
        assert_eq!(csd.read_block_length(), 0x09);
        assert_eq!(csd.device_size(), 7529);
        assert!(csd.erase_single_block_enabled());
        assert_eq!(csd.erase_sector_size(), 0x7F);
        assert_eq!(csd.write_speed_factor(), 0x2);
        assert_eq!(csd.max_write_data_length(), 0x9);
        assert_eq!(csd.crc(), 0x8b);
        assert_eq!(csd.card_capacity_bytes(), 3_947_888_640);
        assert_eq!(csd.card_capacity_blocks(), 7_710_720);
    }

    #[test]
    fn csd_high_speed() {
        let csd = Csd::new(2 * 1024 * 1024, true);
        assert_eq!(csd.max_data_transfer_rate(), 0x5A);
        assert_eq!(csd.card_capacity_blocks(), 2 * 1024 * 1024);
        assert_eq!(csd.crc() & 1, 1);
    }

    #[test]
    fn csd_capacity_rounds_down() {
        assert_eq!(Csd::new(5000, false).card_capacity_blocks(), 4096);
        assert_eq!(Csd::new(2047, false).card_capacity_blocks(), 1024);
        assert_eq!(Csd::new(100, false).card_capacity_blocks(), 1024);
        assert_eq!(Csd::new(0, false).device_size(), 0);
    }

    #[test]
    fn cid_fields() {
        let cid = Cid::new(0x03, *b"SD", *b"SU04G", 0x80, 0x1234_5678, 2013, 11);
        assert_eq!(cid.manufacturer_id(), 0x03);
        assert_eq!(&cid.oem_id(), b"SD");
        assert_eq!(&cid.product_name(), b"SU04G");
        assert_eq!(cid.product_revision(), 0x80);
        assert_eq!(cid.serial_number(), 0x1234_5678);
        assert_eq!(cid.manufacturing_year(), 13);
        assert_eq!(cid.manufacturing_month(), 11);
        assert_eq!(cid.crc(), crc7(&cid.data[0..15]));
    }

    #[test]
    fn card_status_state_field() {
        let status = CardStatus::new(STATUS_APP_CMD | STATUS_READY_FOR_DATA, CardState::Transfer);
        assert_eq!(status.0, 0x0000_0920);
        assert_eq!(status.state(), Some(CardState::Transfer));
        assert!(status.is_app_cmd());
        assert!(status.is_ready_for_data());
        assert!(!status.is_com_crc_error());
    }

    #[test]
    fn card_status_r6() {
        let status = CardStatus::new(
            STATUS_COM_CRC_ERROR | STATUS_ILLEGAL_COMMAND | STATUS_ERROR | STATUS_APP_CMD,
            CardState::Identification,
        );
        assert_eq!(status.r6_bits(), 0xE000 | 0x0400 | 0x0020);
    }

    #[test]
    fn ocr_ccs_needs_power_up() {
        assert_eq!(Ocr::new(false, true).0, OCR_VOLTAGE_WINDOW);
        let ocr = Ocr::new(true, true);
        assert!(ocr.is_powered_up());
        assert!(ocr.is_block_addressed());
        assert!(!Ocr::new(true, false).is_block_addressed());
    }

    #[test]
    fn scr_fields() {
        let scr = Scr::new();
        assert_eq!(scr.scr_structure(), 0);
        assert_eq!(scr.sd_spec(), 2);
        assert_eq!(scr.bus_widths(), 0x5);
        assert!(scr.sd_spec3());
        assert!(scr.cmd23_supported());
    }

    #[test]
    fn switch_high_speed() {
        // Check mode, ask for high speed
        let (status, hs) = SwitchStatus::new(0x00FF_FFF1, true, false);
        assert!(hs);
        assert_eq!(status.group1_support(), 0x8003);
        assert_eq!(status.group1_selection(), SwitchStatus::HIGH_SPEED);
        assert_eq!(status.max_current(), 100);

        // The capability isn't there
        let (status, hs) = SwitchStatus::new(0x80FF_FFF1, false, false);
        assert!(!hs);
        assert_eq!(status.group1_support(), 0x8001);
        assert_eq!(status.group1_selection(), SwitchStatus::UNSUPPORTED);

        // No change requested keeps the current function
        let (status, hs) = SwitchStatus::new(0x00FF_FFFF, true, true);
        assert!(hs);
        assert_eq!(status.group1_selection(), SwitchStatus::HIGH_SPEED);
    }

    #[test]
    fn sd_status_bus_width() {
        assert_eq!(SdStatus::new(true).bus_width(), 0b10);
        assert_eq!(SdStatus::new(false).bus_width(), 0b00);
        assert_eq!(SdStatus::new(false).speed_class(), 0x04);
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
