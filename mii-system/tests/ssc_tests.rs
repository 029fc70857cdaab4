// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mii_core::audio::AudioSink;
use mii_core::factory::Addressable;
use mii_system::card::ssc::{SscConfig, SscKind};
use mii_system::device::AnalogInputs;
use mii_system::machine::Mii;
use mii_system::slot::CardCommand;
use mii_system::{Config, Model};

fn build_rom() -> Vec<u8> {
    let mut rom = vec![0xea; 0x4000];
    rom[0x3800] = 0x4c; // jmp $f800
    rom[0x3801] = 0x00;
    rom[0x3802] = 0xf8;
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
fn pty_round_trip() {
    let mut mii = setup_machine();
    let conf = SscConfig {
        kind: SscKind::Pty,
        ..SscConfig::default()
    };
    let card = mii.attach_ssc(2, conf).unwrap();

    // assert DTR: opens the pty and starts the worker
    mii.get_mem().borrow_mut().write(0xc0aa, 0x03);
    let path = card.borrow().get_tty_path().to_string();
    assert!(path.starts_with("/dev/"), "slave path {}", path);

    let mut tty = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .expect("pty slave should be attachable");
    unsafe {
        let fd = tty.as_raw_fd();
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
    tty.write_all(b"HELLO").unwrap();

    // wait for the worker to shovel the bytes into the rx ring while the
    // machine keeps running frames
    let mut status = 0;
    for _ in 0..500 {
        mii.run_frame();
        status = mii.get_mem().borrow_mut().read(0xc0a9);
        if card.borrow().get_shared().rx.len() >= 5 && status & 0x08 != 0 {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert_ne!(0, status & 0x08, "RX_FULL never set, status {:02x}", status);

    let mut received = Vec::new();
    for _ in 0..5 {
        received.push(mii.get_mem().borrow_mut().read(0xc0a8));
    }
    assert_eq!(b"HELLO".to_vec(), received);

    // guest transmit drains to the host end
    for byte in b"OK" {
        mii.get_mem().borrow_mut().write(0xc0a8, *byte);
    }
    let mut out = [0u8; 2];
    let mut got = 0;
    for _ in 0..500 {
        mii.run_frame();
        match tty.read(&mut out[got..]) {
            Ok(count) => got += count,
            Err(_) => {}
        }
        if got >= 2 {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(b"OK"[..], out[..2]);

    mii.dispose();
}

#[test]
fn dip_switches_and_soft_reset() {
    let mut mii = setup_machine();
    let conf = SscConfig {
        kind: SscKind::Pty,
        ..SscConfig::default()
    };
    mii.attach_ssc(2, conf).unwrap();
    let mem = mii.get_mem();
    // DIPSW1 reads communication mode at 9600 baud
    assert_eq!(0x80 | 14, mem.borrow_mut().read(0xc0a1));
    // soft reset via a status register write
    mem.borrow_mut().write(0xc0a9, 0x00);
    assert_eq!(0x10, mem.borrow_mut().read(0xc0aa));
    let status = mem.borrow_mut().read(0xc0a9);
    assert_ne!(0, status & 0x10, "TX_EMPTY expected, status {:02x}", status);
    // reconfiguring over the slot command interface moves the dip switches
    let conf = SscConfig {
        kind: SscKind::Pty,
        baud: 19_200,
        ..SscConfig::default()
    };
    mii.slot_command(2, &CardCommand::SscSetConf(conf)).unwrap();
    assert_eq!(0x80 | 15, mem.borrow_mut().read(0xc0a1));
}
