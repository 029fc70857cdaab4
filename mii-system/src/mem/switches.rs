// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use mii_core::{Clock, Shared};

use super::bank::Bank;
use crate::device::AnalogInputs;
use crate::sound::Speaker;
use crate::video::Video;

// Spec: Apple //e technical reference, memory mapped I/O at $C000-$C0FF
// Design:
//   All switch state lives in Cells so one callback installed on the $C0
//   page of the switch bank can flip it without borrow gymnastics; the
//   memory dispatcher consults the same cells on every access. Everything
//   below $C090 is claimed here; $C090-$C0FF belongs to the slot I/O
//   windows and is left to the slot framework's own callback.

// cycles for one unit of the paddle charge timer
const PADDLE_CYCLES_PER_UNIT: u64 = 11;

pub struct SwitchState {
    // memory mapping
    pub store80: Cell<bool>,
    pub ramrd: Cell<bool>,
    pub ramwrt: Cell<bool>,
    pub altzp: Cell<bool>,
    pub intcxrom: Cell<bool>,
    pub slotc3rom: Cell<bool>,
    // language card
    pub lc_read: Cell<bool>,
    pub lc_write: Cell<bool>,
    pub lc_bank2: Cell<bool>,
    lc_prewrite: Cell<bool>,
    // video
    pub text: Cell<bool>,
    pub mixed: Cell<bool>,
    pub page2: Cell<bool>,
    pub hires: Cell<bool>,
    pub col80: Cell<bool>,
    pub altcharset: Cell<bool>,
    // keyboard latch, bit 7 is the strobe
    key: Cell<u8>,
    // paddle charge timer
    paddle_trigger: Cell<u64>,
}

impl SwitchState {
    pub fn new() -> Self {
        Self {
            store80: Cell::new(false),
            ramrd: Cell::new(false),
            ramwrt: Cell::new(false),
            altzp: Cell::new(false),
            intcxrom: Cell::new(false),
            slotc3rom: Cell::new(false),
            lc_read: Cell::new(false),
            lc_write: Cell::new(false),
            lc_bank2: Cell::new(false),
            lc_prewrite: Cell::new(false),
            text: Cell::new(true),
            mixed: Cell::new(false),
            page2: Cell::new(false),
            hires: Cell::new(false),
            col80: Cell::new(false),
            altcharset: Cell::new(false),
            key: Cell::new(0),
            paddle_trigger: Cell::new(0),
        }
    }

    pub fn reset(&self) {
        self.store80.set(false);
        self.ramrd.set(false);
        self.ramwrt.set(false);
        self.altzp.set(false);
        self.intcxrom.set(false);
        self.slotc3rom.set(false);
        self.lc_read.set(false);
        self.lc_write.set(false);
        self.lc_bank2.set(false);
        self.lc_prewrite.set(false);
        self.text.set(true);
        self.mixed.set(false);
        self.page2.set(false);
        self.hires.set(false);
        self.col80.set(false);
        self.altcharset.set(false);
        self.key.set(0);
        self.paddle_trigger.set(0);
    }

    pub fn key_down(&self, code: u8) {
        self.key.set(code | 0x80);
    }

    pub fn key(&self) -> u8 {
        self.key.get()
    }

    pub fn key_strobe(&self) -> bool {
        self.key.get() & 0x80 != 0
    }

    pub fn clear_key_strobe(&self) {
        self.key.set(self.key.get() & 0x7f);
    }

    fn language_card(&self, address: u16, write: bool) {
        self.lc_bank2.set(address & 0x08 == 0);
        self.lc_read.set(matches!(address & 0x03, 0x00 | 0x03));
        if address & 0x01 != 0 {
            if !write && self.lc_prewrite.get() {
                self.lc_write.set(true);
            }
            self.lc_prewrite.set(!write);
        } else {
            self.lc_write.set(false);
            self.lc_prewrite.set(false);
        }
    }
}

pub fn install_switches(
    sw: &Shared<Bank>,
    switches: &Rc<SwitchState>,
    video: &Rc<Video>,
    speaker: &Rc<Speaker>,
    analog: &Arc<AnalogInputs>,
    clock: &Rc<Clock>,
) {
    let switches = switches.clone();
    let video = video.clone();
    let speaker = speaker.clone();
    let analog = analog.clone();
    let clock = clock.clone();
    sw.borrow_mut().install_access_callback(
        0xc0,
        0xc0,
        Rc::new(move |_bank, address, byte, write| {
            let now = clock.get();
            match address {
                0xc000..=0xc00f => {
                    if write {
                        let on = address & 0x01 != 0;
                        match address & 0x0e {
                            0x00 => switches.store80.set(on),
                            0x02 => switches.ramrd.set(on),
                            0x04 => switches.ramwrt.set(on),
                            0x06 => switches.intcxrom.set(on),
                            0x08 => switches.altzp.set(on),
                            0x0a => switches.slotc3rom.set(on),
                            0x0c => switches.col80.set(on),
                            0x0e => switches.altcharset.set(on),
                            _ => unreachable!(),
                        }
                    } else {
                        *byte = switches.key();
                    }
                }
                0xc010 => {
                    switches.clear_key_strobe();
                    if !write {
                        *byte = switches.key();
                    }
                }
                0xc011..=0xc01f => {
                    switches.clear_key_strobe();
                    if !write {
                        let status = match address {
                            0xc011 => switches.lc_bank2.get(),
                            0xc012 => switches.lc_read.get(),
                            0xc013 => switches.ramrd.get(),
                            0xc014 => switches.ramwrt.get(),
                            0xc015 => switches.intcxrom.get(),
                            0xc016 => switches.altzp.get(),
                            0xc017 => switches.slotc3rom.get(),
                            0xc018 => switches.store80.get(),
                            // RDVBLBAR, high outside vertical blanking
                            0xc019 => !video.in_vbl(now),
                            0xc01a => switches.text.get(),
                            0xc01b => switches.mixed.get(),
                            0xc01c => switches.page2.get(),
                            0xc01d => switches.hires.get(),
                            0xc01e => switches.altcharset.get(),
                            _ => switches.col80.get(),
                        };
                        let flag = if status { 0x80 } else { 0x00 };
                        *byte = flag | (switches.key() & 0x7f);
                    }
                }
                0xc030..=0xc03f => {
                    speaker.toggle(now);
                    if !write {
                        *byte = video.vapor(now);
                    }
                }
                0xc050..=0xc057 => {
                    let on = address & 0x01 != 0;
                    match address & 0x06 {
                        0x00 => switches.text.set(on),
                        0x02 => switches.mixed.set(on),
                        0x04 => switches.page2.set(on),
                        0x06 => switches.hires.set(on),
                        _ => unreachable!(),
                    }
                    if !write {
                        *byte = video.vapor(now);
                    }
                }
                0xc061..=0xc063 => {
                    if !write {
                        *byte = analog.get_button((address - 0xc061) as usize);
                    }
                }
                0xc064..=0xc067 => {
                    if !write {
                        let index = (address - 0xc064) as usize;
                        let charge =
                            u64::from(analog.get_axis(index)) * PADDLE_CYCLES_PER_UNIT;
                        let elapsed = now.saturating_sub(switches.paddle_trigger.get());
                        *byte = if elapsed < charge { 0x80 } else { 0x00 };
                    }
                }
                0xc070 => {
                    switches.paddle_trigger.set(now);
                    if !write {
                        *byte = video.vapor(now);
                    }
                }
                0xc080..=0xc08f => {
                    switches.language_card(address, write);
                    if !write {
                        *byte = video.vapor(now);
                    }
                }
                0xc090..=0xc0ff => {
                    // slot I/O windows, handled by the slot framework
                    return false;
                }
                _ => {
                    if !write {
                        *byte = video.vapor(now);
                    }
                }
            }
            true
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_card_write_enable_needs_two_reads() {
        let switches = SwitchState::new();
        switches.language_card(0xc081, false);
        assert!(!switches.lc_write.get());
        switches.language_card(0xc081, false);
        assert!(switches.lc_write.get());
        assert!(!switches.lc_read.get());
        assert!(switches.lc_bank2.get());
    }

    #[test]
    fn language_card_write_access_resets_prewrite() {
        let switches = SwitchState::new();
        switches.language_card(0xc081, true);
        switches.language_card(0xc081, false);
        assert!(!switches.lc_write.get());
        switches.language_card(0xc081, false);
        assert!(switches.lc_write.get());
    }

    #[test]
    fn language_card_bank_select() {
        let switches = SwitchState::new();
        switches.language_card(0xc080, false);
        assert!(switches.lc_bank2.get());
        assert!(switches.lc_read.get());
        assert!(!switches.lc_write.get());
        switches.language_card(0xc088, false);
        assert!(!switches.lc_bank2.get());
    }

    #[test]
    fn keyboard_strobe() {
        let switches = SwitchState::new();
        switches.key_down(0x41);
        assert_eq!(0xc1, switches.key());
        assert!(switches.key_strobe());
        switches.clear_key_strobe();
        assert_eq!(0x41, switches.key());
    }
}
