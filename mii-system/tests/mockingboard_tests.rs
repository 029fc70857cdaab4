// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::sync::Arc;

use mii_core::audio::{AudioSink, SourceState};
use mii_system::device::AnalogInputs;
use mii_system::machine::Mii;
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

fn emit_lda_sta(code: &mut Vec<u8>, value: u8, address: u16) {
    code.push(0xa9);
    code.push(value);
    code.push(0x8d);
    code.push((address & 0xff) as u8);
    code.push((address >> 8) as u8);
}

/// LATCH_ADDRESS, INACTIVE, WRITE, INACTIVE through the VIA ports of the
/// chip at $C400.
fn emit_psg_write(code: &mut Vec<u8>, reg: u8, value: u8) {
    emit_lda_sta(code, reg, 0xc401);
    emit_lda_sta(code, 0x07, 0xc400);
    emit_lda_sta(code, 0x04, 0xc400);
    emit_lda_sta(code, value, 0xc401);
    emit_lda_sta(code, 0x06, 0xc400);
    emit_lda_sta(code, 0x04, 0xc400);
}

#[test]
fn one_khz_tone_reaches_the_audio_source() {
    let mut config = Config::new(Model::iie());
    config.roms.main = build_rom();
    let mut mii = Mii::new(config, AudioSink::new(), Arc::new(AnalogInputs::new())).unwrap();
    mii.reset(true);
    let card = mii.attach_mockingboard(4).unwrap();
    let source = card.borrow().get_source();

    // guest program: open the VIA ports, then set enable, tone A period
    // and amplitude, and spin
    let origin = 0x0300u16;
    let mut program = Vec::new();
    emit_lda_sta(&mut program, 0xff, 0xc403); // DDRA
    emit_lda_sta(&mut program, 0xff, 0xc402); // DDRB
    emit_psg_write(&mut program, 0x07, 0x3e); // enable: tone A only
    emit_psg_write(&mut program, 0x00, 0xfd); // tone A period fine
    emit_psg_write(&mut program, 0x01, 0x00); // tone A period coarse
    emit_psg_write(&mut program, 0x08, 0x0f); // amplitude A
    let loop_address = origin + program.len() as u16;
    program.push(0x4c);
    program.push((loop_address & 0xff) as u8);
    program.push((loop_address >> 8) as u8);
    mii.load(&program, origin);
    mii.get_cpu_mut().set_pc(origin);

    source.set_state(SourceState::Playing);
    let mut left = Vec::new();
    let mut buffer = [0f32; 512];
    while left.len() < 4410 {
        for _ in 0..500 {
            mii.step();
        }
        let count = source.read(&mut buffer);
        for pair in buffer[..count].chunks(2) {
            left.push(pair[0]);
        }
        assert!(mii.get_cycles() < 4_000_000, "tone never rendered");
    }

    let nonzero = left.iter().filter(|s| s.abs() > 1e-6).count();
    assert!(nonzero > left.len() / 2, "nonzero {}/{}", nonzero, left.len());
    let mut sign_changes = 0;
    for i in 1..left.len() {
        if left[i].signum() != left[i - 1].signum() && left[i].abs() > 1e-6 {
            sign_changes += 1;
        }
    }
    assert!(sign_changes >= 200, "sign changes {}", sign_changes);
}

#[test]
fn via_timer_interrupt_reaches_the_cpu() {
    let mut config = Config::new(Model::iie());
    config.roms.main = build_rom();
    let mut mii = Mii::new(config, AudioSink::new(), Arc::new(AnalogInputs::new())).unwrap();
    mii.reset(true);
    mii.attach_mockingboard(4).unwrap();

    // enable timer 1 interrupts, free run, short period; the rom loop at
    // $f800 never touches the card again
    let origin = 0x0300u16;
    let mut program = Vec::new();
    emit_lda_sta(&mut program, 0xff, 0xc403);
    emit_lda_sta(&mut program, 0xff, 0xc402);
    emit_lda_sta(&mut program, 0x40, 0xc40b); // ACR: T1 free run
    emit_lda_sta(&mut program, 0xc0, 0xc40e); // IER: set timer 1
    emit_lda_sta(&mut program, 0x50, 0xc404); // T1 latch low
    emit_lda_sta(&mut program, 0x00, 0xc405); // T1 high, starts the timer
    program.push(0x58); // cli
    let loop_address = origin + program.len() as u16;
    program.push(0x4c);
    program.push((loop_address & 0xff) as u8);
    program.push((loop_address >> 8) as u8);
    // interrupt handler: read T1CL to acknowledge, rti
    let handler = [
        0xad, 0x04, 0xc4, // lda $c404
        0x40, // rti
    ];
    mii.load(&program, origin);
    mii.load(&handler, 0x0380);
    // interrupt vector through ram is not possible, the rom holds $fffe;
    // point the rom vector at the handler instead
    let rom_bank = mii.get_rom_bank();
    rom_bank.borrow_mut().poke(0xfffe, 0x80);
    rom_bank.borrow_mut().poke(0xffff, 0x03);
    mii.get_cpu_mut().set_pc(origin);

    let mut serviced = false;
    for _ in 0..20_000 {
        mii.step();
        let pc = mii.get_cpu().get_pc();
        if (0x0380..0x0390).contains(&pc) {
            serviced = true;
            break;
        }
    }
    assert!(serviced, "timer interrupt never serviced");
}
