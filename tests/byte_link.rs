//! Driving the card over a byte stream

mod utils;

use std::collections::VecDeque;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embedded_sdemu::proto::*;
use embedded_sdemu::transport::{BUSY_BYTE, IDLE_BYTE};
use embedded_sdemu::{
    Bridge, ByteLink, CardState, CardStatus, CommandFrame, EmulatorOpts, LinkLayer, Manager,
};

use utils::{pattern, RamDisk, RCA_ARG};

/// One end of an in-memory pipe.
#[derive(Default)]
struct Wire {
    from_host: VecDeque<u8>,
    to_host: Vec<u8>,
}

impl embedded_io::ErrorType for Wire {
    type Error = core::convert::Infallible;
}

impl embedded_io::Read for Wire {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut count = 0;
        for slot in buf.iter_mut() {
            match self.from_host.pop_front() {
                Some(b) => {
                    *slot = b;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }
}

impl embedded_io::Write for Wire {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.to_host.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Send one transaction and collect what comes back.
fn transact(
    wire: &mut ByteLink<Wire>,
    card: &mut LinkLayer<'_, NoopRawMutex>,
    bytes: &[u8],
) -> Vec<u8> {
    wire.inner_mut().from_host.extend(bytes.iter().copied());
    wire.service(card).unwrap();
    assert!(wire.inner_mut().from_host.is_empty());
    core::mem::take(&mut wire.inner_mut().to_host)
}

fn command(
    wire: &mut ByteLink<Wire>,
    card: &mut LinkLayer<'_, NoopRawMutex>,
    index: u8,
    argument: u32,
) -> Vec<u8> {
    transact(wire, card, &CommandFrame::new(index, argument).encode())
}

fn r1_status(bytes: &[u8]) -> CardStatus {
    assert_eq!(bytes.len(), 6);
    CardStatus(u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]))
}

fn identify(wire: &mut ByteLink<Wire>, card: &mut LinkLayer<'_, NoopRawMutex>) {
    assert!(command(wire, card, CMD0, 0).is_empty());
    assert_eq!(
        command(wire, card, CMD8, 0x1AA),
        hex_literal::hex!("08 00 00 01 AA 13")
    );
    assert_eq!(command(wire, card, CMD55, 0).len(), 6);
    assert_eq!(
        command(wire, card, ACMD41, 0x4030_0000),
        hex_literal::hex!("3F C0 FF 80 00 FF")
    );
    assert_eq!(command(wire, card, CMD2, 0).len(), 17);
    let r6 = command(wire, card, CMD3, 0);
    assert_eq!(&r6[1..3], &[0x00, 0x01]);
    command(wire, card, CMD7, RCA_ARG);
    assert_eq!(card.state(), CardState::Transfer);
}

#[test]
fn identify_and_read() {
    utils::init_logging();
    let bridge = Bridge::<NoopRawMutex>::new();
    let opts = EmulatorOpts {
        capacity_blocks: 1024,
        ..Default::default()
    };
    let mut card = LinkLayer::new_with_options(&bridge, opts);
    let mut manager = Manager::new(&bridge);
    let mut disk = RamDisk::patterned(1024);
    let mut wire = ByteLink::new(Wire::default());
    identify(&mut wire, &mut card);

    // Idle clocks in Transfer just get idle back
    assert_eq!(transact(&mut wire, &mut card, &[IDLE_BYTE]), [IDLE_BYTE]);

    let r1 = command(&mut wire, &mut card, CMD17, 12);
    assert_eq!(r1_status(&r1).state(), Some(CardState::Transfer));
    // Nobody has fetched the block yet
    assert_eq!(transact(&mut wire, &mut card, &[IDLE_BYTE]), [IDLE_BYTE]);

    manager.service(&mut disk).unwrap();
    let data = transact(&mut wire, &mut card, &[IDLE_BYTE]);
    assert_eq!(data.len(), 1 + 512 + 2);
    assert_eq!(data[0], DATA_START_BLOCK);
    assert_eq!(&data[1..513], &pattern(12)[..]);
    assert_eq!(
        u16::from_be_bytes([data[513], data[514]]),
        crc16(&pattern(12))
    );
    assert_eq!(card.state(), CardState::Transfer);

    // The SCR comes back at its own length
    command(&mut wire, &mut card, CMD55, RCA_ARG);
    command(&mut wire, &mut card, ACMD51, 0);
    let scr = transact(&mut wire, &mut card, &[IDLE_BYTE]);
    assert_eq!(scr.len(), 1 + 8 + 2);
    assert_eq!(scr[0], DATA_START_BLOCK);
}

#[test]
fn write_over_the_wire() {
    let bridge = Bridge::<NoopRawMutex>::new();
    let opts = EmulatorOpts {
        capacity_blocks: 1024,
        ..Default::default()
    };
    let mut card = LinkLayer::new_with_options(&bridge, opts);
    let mut manager = Manager::new(&bridge);
    let mut disk = RamDisk::patterned(1024);
    let mut wire = ByteLink::new(Wire::default());
    identify(&mut wire, &mut card);

    command(&mut wire, &mut card, CMD24, 7);
    let block = pattern(40);
    let mut packet = vec![DATA_START_BLOCK];
    packet.extend_from_slice(&block);

    // A corrupted block is refused
    let bad_crc = crc16(&block) ^ 0x8000;
    let mut bad = packet.clone();
    bad.extend_from_slice(&bad_crc.to_be_bytes());
    assert_eq!(transact(&mut wire, &mut card, &bad), [DATA_RES_CRC_ERROR]);
    assert_eq!(card.state(), CardState::ReceiveData);

    packet.extend_from_slice(&crc16(&block).to_be_bytes());
    assert_eq!(transact(&mut wire, &mut card, &packet), [DATA_RES_ACCEPTED]);
    assert_eq!(transact(&mut wire, &mut card, &[IDLE_BYTE]), [BUSY_BYTE]);

    manager.service(&mut disk).unwrap();
    assert_eq!(transact(&mut wire, &mut card, &[IDLE_BYTE]), [IDLE_BYTE]);
    assert_eq!(card.state(), CardState::Transfer);
    assert_eq!(disk.block(7), &block[..]);

    // Data when nothing is expected is rejected
    assert_eq!(transact(&mut wire, &mut card, &packet), [DATA_RES_WRITE_ERROR]);
}

#[test]
fn run_until_the_stream_ends() {
    let bridge = Bridge::<NoopRawMutex>::new();
    let mut card = LinkLayer::new(&bridge);
    let mut wire = ByteLink::new(Wire::default());
    {
        let from_host = &mut wire.inner_mut().from_host;
        from_host.extend(CommandFrame::new(CMD0, 0).encode());
        // A stray byte is skipped
        from_host.push_back(0x12);
        from_host.extend(CommandFrame::new(CMD8, 0x1AA).encode());
        from_host.push_back(IDLE_BYTE);
    }
    assert_eq!(wire.run(&mut card), Ok(()));
    let to_host = wire.into_inner().to_host;
    assert_eq!(to_host, hex_literal::hex!("08 00 00 01 AA 13 FF"));
    assert_eq!(bridge.status().stats.commands, 2);
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
