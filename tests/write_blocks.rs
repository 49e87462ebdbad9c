//! Writing related tests

mod utils;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embedded_sdemu::proto::*;
use embedded_sdemu::{
    Bridge, CardState, DataResponse, EmulatorOpts, EraseRange, Error, Events, LinkLayer, Manager,
};

use utils::{cmd, pattern, RamDisk};

const CAPACITY: u32 = 1024;

fn opts() -> EmulatorOpts {
    EmulatorOpts {
        capacity_blocks: CAPACITY,
        ..Default::default()
    }
}

#[test]
fn write_two_blocks() {
    utils::init_logging();
    let bridge = Bridge::<NoopRawMutex>::new();
    let mut card = LinkLayer::new_with_options(&bridge, opts());
    let mut manager = Manager::new(&bridge);
    let mut disk = RamDisk::patterned(CAPACITY);
    utils::select_card(&mut card);

    cmd(&mut card, CMD23, 2);
    cmd(&mut card, CMD25, 100);
    assert_eq!(card.state(), CardState::ReceiveData);
    // Nothing for the consumer until the data arrives
    assert!(!manager.status().block_write_act);
    assert!(manager.events().is_empty());

    let first = pattern(200);
    assert_eq!(
        card.write_data(&first, crc16(&first)),
        Ok(DataResponse::Accepted)
    );
    let status = manager.status();
    assert!(status.block_write_act);
    assert_eq!(status.block_write_addr, 100);
    assert_eq!(status.block_write_num, 2);
    assert_eq!(card.state(), CardState::Programming);

    assert_eq!(manager.service(&mut disk), Ok(Events::WRITE));
    assert_eq!(disk.block(100), &first[..]);
    assert_eq!(card.busy(), Ok(false));
    let status = manager.status();
    assert_eq!(status.block_write_num, 1);
    assert!(!status.block_write_act);
    assert_eq!(card.state(), CardState::ReceiveData);

    let second = pattern(201);
    card.write_data(&second, crc16(&second)).unwrap();
    let status = manager.status();
    assert!(status.block_write_act);
    assert_eq!(status.block_write_addr, 101);
    assert_eq!(status.block_write_num, 1);

    assert_eq!(manager.service(&mut disk), Ok(Events::WRITE));
    assert_eq!(card.busy(), Ok(false));
    assert!(!manager.status().block_write_act);
    assert_eq!(card.state(), CardState::Transfer);
    assert_eq!(disk.block(101), &second[..]);
    assert_eq!(manager.write_count(), 2);
    assert_eq!(manager.status().stats.blocks_written, 2);
    // Re-acknowledging does nothing
    assert!(!manager.write_done());
}

#[test]
fn bad_data_crc() {
    let bridge = Bridge::<NoopRawMutex>::new();
    let mut card = LinkLayer::new_with_options(&bridge, opts());
    let mut manager = Manager::new(&bridge);
    let mut disk = RamDisk::patterned(CAPACITY);
    utils::select_card(&mut card);

    cmd(&mut card, CMD24, 5);
    let block = [0xA5u8; 512];
    let crc = crc16(&block);
    assert_eq!(
        card.write_data(&block, crc ^ 1),
        Ok(DataResponse::CrcError)
    );
    assert_eq!(card.state(), CardState::ReceiveData);
    assert!(!manager.status().block_write_act);
    assert_eq!(manager.service(&mut disk), Ok(Events::empty()));
    assert_eq!(disk.block(5), &pattern(5)[..]);

    // The host tries again
    assert_eq!(card.write_data(&block, crc), Ok(DataResponse::Accepted));
    manager.service(&mut disk).unwrap();
    card.poll();
    assert_eq!(card.state(), CardState::Transfer);
    assert_eq!(disk.block(5), &block[..]);
}

#[test]
fn stop_between_blocks() {
    let bridge = Bridge::<NoopRawMutex>::new();
    let mut card = LinkLayer::new_with_options(&bridge, opts());
    let mut manager = Manager::new(&bridge);
    let mut disk = RamDisk::patterned(CAPACITY);
    utils::select_card(&mut card);

    cmd(&mut card, CMD25, 50);
    assert_eq!(manager.status().block_write_num, CAPACITY - 50);
    let block = pattern(0);
    card.write_data(&block, crc16(&block)).unwrap();
    manager.service(&mut disk).unwrap();
    assert_eq!(card.busy(), Ok(false));
    assert_eq!(card.state(), CardState::ReceiveData);

    let r = cmd(&mut card, CMD12, 0);
    assert!(r.busy);
    assert_eq!(card.state(), CardState::Transfer);
    assert_eq!(disk.block(50), &block[..]);
    assert_eq!(disk.block(51), &pattern(51)[..]);
}

#[test]
fn stop_while_programming() {
    let bridge = Bridge::<NoopRawMutex>::new();
    let mut card = LinkLayer::new_with_options(&bridge, opts());
    let mut manager = Manager::new(&bridge);
    let mut disk = RamDisk::patterned(CAPACITY);
    utils::select_card(&mut card);

    cmd(&mut card, CMD25, 60);
    let block = pattern(1);
    card.write_data(&block, crc16(&block)).unwrap();
    let r = cmd(&mut card, CMD12, 0);
    assert!(r.busy);
    assert!(!r.status().unwrap().is_ready_for_data());
    assert_eq!(card.state(), CardState::Programming);
    assert_eq!(card.busy(), Ok(true));

    manager.service(&mut disk).unwrap();
    assert_eq!(card.busy(), Ok(false));
    assert_eq!(card.state(), CardState::Transfer);
    assert_eq!(disk.block(60), &block[..]);
}

#[test]
fn stalled_write_consumer() {
    let bridge = Bridge::<NoopRawMutex>::new();
    let opts = EmulatorOpts {
        stall_limit: 3,
        ..opts()
    };
    let mut card = LinkLayer::new_with_options(&bridge, opts);
    let mut manager = Manager::new(&bridge);
    let mut disk = RamDisk::patterned(CAPACITY);
    utils::select_card(&mut card);

    cmd(&mut card, CMD24, 12);
    let block = pattern(3);
    assert_eq!(
        card.write_data(&block, crc16(&block)),
        Ok(DataResponse::Accepted)
    );
    assert_eq!(card.state(), CardState::Programming);
    assert_eq!(manager.events(), Events::WRITE);

    // Nobody drains the buffer, so the card gives up
    for _ in 0..3 {
        assert_eq!(card.busy(), Ok(true));
    }
    assert_eq!(card.busy(), Err(Error::StallTimeout));
    assert_eq!(card.busy(), Ok(false));
    assert_eq!(card.state(), CardState::Transfer);

    let status = manager.status();
    assert!(!status.block_write_act);
    assert!(status.fatal_timeout);
    assert_eq!(status.stats.stall_timeouts, 1);
    assert_eq!(status.stats.blocks_written, 0);
    assert!(manager.events().is_empty());

    // Too late now
    let mut out = [0u8; 512];
    assert_eq!(manager.drain_write_buffer(&mut out), Err(Error::BufferBusy));
    assert!(!manager.write_done());
    assert_eq!(manager.service(&mut disk), Ok(Events::empty()));
    assert_eq!(disk.block(12), &pattern(12)[..]);

    // The card takes the next write as normal
    cmd(&mut card, CMD24, 12);
    card.write_data(&block, crc16(&block)).unwrap();
    assert_eq!(manager.service(&mut disk), Ok(Events::WRITE));
    assert_eq!(card.busy(), Ok(false));
    assert_eq!(disk.block(12), &block[..]);
}

#[test]
fn write_data_misuse() {
    let bridge = Bridge::<NoopRawMutex>::new();
    let mut card = LinkLayer::new_with_options(&bridge, opts());
    utils::select_card(&mut card);

    let block = [0u8; 512];
    assert_eq!(
        card.write_data(&block, crc16(&block)),
        Err(Error::NoDataPhase)
    );
    cmd(&mut card, CMD24, 0);
    assert_eq!(
        card.write_data(&block[..100], 0),
        Err(Error::WrongLength(100))
    );
    card.write_data(&block, crc16(&block)).unwrap();
    // The host should have waited for busy to clear
    assert_eq!(card.write_data(&block, crc16(&block)), Err(Error::BadState));
}

#[test]
fn erase_is_left_to_the_consumer() {
    let bridge = Bridge::<NoopRawMutex>::new();
    let mut card = LinkLayer::new_with_options(&bridge, opts());
    let mut manager = Manager::new(&bridge);
    let mut disk = RamDisk::patterned(CAPACITY);
    utils::select_card(&mut card);

    utils::acmd(&mut card, ACMD23, 4);
    cmd(&mut card, CMD32, 3);
    cmd(&mut card, CMD33, 5);
    let r = cmd(&mut card, CMD38, 0);
    assert_eq!(r.status().unwrap().0 & STATUS_CLEAR_ON_READ, 0);
    assert_eq!(card.state(), CardState::Transfer);

    let expected = EraseRange {
        preerase_num: 4,
        start: 3,
        end: 5,
    };
    assert_eq!(manager.erase_range(), expected);
    assert_eq!(manager.erase(&mut disk), Ok(Some(expected)));
    for idx in 3..=5 {
        assert_eq!(disk.block(idx), &[0u8; 512][..]);
    }
    assert_eq!(disk.block(2), &pattern(2)[..]);
    assert_eq!(disk.block(6), &pattern(6)[..]);
    // Once only
    assert_eq!(manager.erase(&mut disk), Ok(None));

    // Past the end of the card
    let r = cmd(&mut card, CMD32, CAPACITY);
    assert!(r.status().unwrap().is_out_of_range());
    assert!(manager.status().err_op_out_range);
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
