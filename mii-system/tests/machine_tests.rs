// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::sync::Arc;

use mii_core::audio::AudioSink;
use mii_core::factory::Addressable;
use mii_system::device::AnalogInputs;
use mii_system::machine::{CardConfig, Mii};
use mii_system::{Config, Model};

/// 16 KiB ROM image with a keyboard polling loop at $F800 and the reset
/// vector pointing at it.
fn build_rom() -> Vec<u8> {
    let mut rom = vec![0xea; 0x4000];
    let program = [
        0xad, 0x00, 0xc0, // lda $c000
        0x4c, 0x00, 0xf8, // jmp $f800
    ];
    rom[0x3800..0x3800 + program.len()].copy_from_slice(&program);
    rom[0x3ffc] = 0x00;
    rom[0x3ffd] = 0xf8;
    rom
}

fn setup_machine() -> Mii {
    let mut config = Config::new(Model::iie());
    config.roms.main = build_rom();
    let mut mii = Mii::new(config, AudioSink::new(), Arc::new(AnalogInputs::new())).unwrap();
    mii.reset(true);
    mii
}

#[test]
fn boot_without_slots_stays_in_rom() {
    let mut mii = setup_machine();
    while mii.get_cycles() < 1_000_000 {
        mii.run_frame();
    }
    let pc = mii.get_cpu().get_pc();
    assert!(pc >= 0xf800, "pc 0x{:04x}", pc);
    assert!(mii.get_frame_count() >= 1);
}

#[test]
fn ram_write_read_round_trip() {
    let mut mii = setup_machine();
    let mem = mii.get_mem();
    mem.borrow_mut().write(0x1000, 0x5a);
    assert_eq!(0x5a, mem.borrow_mut().read(0x1000));
    assert_eq!(0x5a, mii.peek(0x1000));
}

#[test]
fn trace_ring_records_boot_loop() {
    let mut mii = setup_machine();
    mii.set_trace(true);
    for _ in 0..3 {
        mii.step();
    }
    let records = mii.drain_trace();
    assert_eq!(3, records.len());
    assert_eq!(0xf800, records[0].pc);
    assert_eq!(0xad, records[0].bytes[0]);
    assert_eq!(0xf803, records[1].pc);
    assert_eq!(0xf800, records[2].pc);
}

#[test]
fn cfff_clears_every_aux_rom_flag() {
    let mut mii = setup_machine();
    mii.attach_card(4, CardConfig::Mockingboard).unwrap();
    let slots = mii.get_slots();
    for slot_id in 1..=7 {
        if let Some(flag) = slots.borrow().aux_rom_flag(slot_id) {
            flag.set(true);
        }
    }
    let mem = mii.get_mem();
    mem.borrow_mut().read(0xcfff);
    for slot_id in 1..=7 {
        assert!(!slots.borrow().aux_rom_flag(slot_id).unwrap().get());
    }
}

#[test]
fn empty_slot_io_reads_vapor() {
    let mut mii = setup_machine();
    // fill the visible text page so the video bus carries a known byte
    for address in 0x0400..0x0800u16 {
        mii.get_mem().borrow_mut().write(address, 0xab);
    }
    // slot 7 is empty
    assert_eq!(0xab, mii.get_mem().borrow_mut().read(0xc0f0));
}

#[test]
fn keyboard_latch_and_strobe() {
    let mut mii = setup_machine();
    mii.key_down(0x41);
    let mem = mii.get_mem();
    assert_eq!(0xc1, mem.borrow_mut().read(0xc000));
    mem.borrow_mut().read(0xc010);
    assert_eq!(0x41, mem.borrow_mut().read(0xc000));
}

#[test]
fn paste_delivers_one_character_per_frame() {
    let mut mii = setup_machine();
    mii.paste("AB");
    mii.run_frame();
    assert_eq!(0xc1, mii.get_mem().borrow_mut().read(0xc000));
    // strobe still set, second character waits
    mii.run_frame();
    assert_eq!(0xc1, mii.get_mem().borrow_mut().read(0xc000));
    mii.get_mem().borrow_mut().read(0xc010);
    mii.run_frame();
    assert_eq!(0xc2, mii.get_mem().borrow_mut().read(0xc000));
}

#[test]
fn card_reset_is_idempotent() {
    let mut mii = setup_machine();
    mii.attach_card(2, CardConfig::Mockingboard).unwrap();
    mii.reset(false);
    let first = mii.card_status(2).unwrap();
    mii.reset(false);
    let second = mii.card_status(2).unwrap();
    assert_eq!(first, second);
}

#[test]
fn vbl_status_follows_scan_position() {
    let mut mii = setup_machine();
    let mem = mii.get_mem();
    // at power on the scan is inside the visible field
    assert_ne!(0, mem.borrow_mut().read(0xc019) & 0x80);
    // advance into vertical blanking
    while !mii.get_video().in_vbl(mii.get_cycles()) {
        mii.step();
    }
    assert_eq!(0, mem.borrow_mut().read(0xc019) & 0x80);
}
