// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::rc::Rc;
use std::sync::Arc;

use mii_core::audio::{AudioSink, AudioSource};
use mii_core::{new_shared, Clock, IrqLine, Shared, Timers};

use crate::io::Via;
use crate::mem::Bank;
use crate::slot::{Card, Slots};
use crate::sound::clock::{RefClock, PSG_CLOCK_HZ};
use crate::sound::Ay3;
use crate::video::Video;

// Spec: Mockingboard schematic; 6522 to AY-3-891x wiring
// Design:
//   Two VIA/PSG pairs behind the slot's $Cn00 ROM page, chip selected by
//   bit 7 of the page offset. The card is ticked from a cycle timer: each
//   PHI0 step drives the VIA ports onto the shared bus bytes and lets the
//   PSG decode the bus control lines. Audio is rendered in slices on a
//   512 sample cadence and pushed to the card's sink source as stereo
//   pairs, PSG 0 left, PSG 1 right.

// scratch for one render slice; headroom above the 1,024 sample contract
const RENDER_BUFFER: usize = 1224;
const RENDER_LIMIT: usize = 1024;
const FLUSH_SAMPLES: u64 = 512;

pub struct Mockingboard {
    slot_id: u8,
    via: [Via; 2],
    psg: [Ay3; 2],
    bus: [u8; 2],
    bus_control: [u8; 2],
    // all in reference clocks
    sync_budget: u64,
    render_slice: u64,
    last_ts: u64,
    // audio
    source: Arc<AudioSource>,
    sample_rate: u32,
    flush_cycles: u64,
    last_flush_cycle: u64,
    init_done: bool,
}

impl Mockingboard {
    fn new(slot_id: u8, now: u64, sample_rate: u32, cycles_per_sample: f64) -> Self {
        Self {
            slot_id,
            via: [Via::new(), Via::new()],
            psg: [Ay3::new(PSG_CLOCK_HZ), Ay3::new(PSG_CLOCK_HZ)],
            bus: [0; 2],
            bus_control: [0; 2],
            sync_budget: 0,
            render_slice: 0,
            last_ts: RefClock::from_cycles(now).ts,
            source: AudioSource::new(),
            sample_rate,
            flush_cycles: (FLUSH_SAMPLES as f64 * cycles_per_sample) as u64,
            last_flush_cycle: now,
            init_done: false,
        }
    }

    pub fn get_source(&self) -> Arc<AudioSource> {
        self.source.clone()
    }

    fn io_reset(&mut self, now: u64) {
        for via in self.via.iter_mut() {
            via.reset();
        }
        for psg in self.psg.iter_mut() {
            psg.reset(0.0);
        }
        self.bus = [0; 2];
        self.bus_control = [0; 2];
        self.sync_budget = 0;
        self.render_slice = 0;
        self.last_ts = RefClock::from_cycles(now).ts;
        self.last_flush_cycle = now;
    }

    /// Pull the card's time budget forward in ref_step chunks. Returns
    /// whether either VIA asserts its interrupt.
    pub fn sync(&mut self, now: u64) -> bool {
        let clock = RefClock::from_cycles(now);
        let dt = clock.ts.saturating_sub(self.last_ts);
        self.sync_budget += dt;
        while self.sync_budget > u64::from(clock.ref_step) {
            for chip in 0..2 {
                let mut port_a = self.bus[chip];
                let mut port_b = self.bus_control[chip];
                self.via[chip].tick(&mut port_a, &mut port_b);
                self.bus[chip] = port_a;
                self.bus_control[chip] = port_b;
                let mut bus = self.bus[chip];
                self.psg[chip].update(&mut bus, self.bus_control[chip], self.render_slice);
                self.bus[chip] = bus;
            }
            self.sync_budget -= u64::from(clock.ref_step);
            self.render_slice += u64::from(clock.ref_step);
        }
        self.last_ts = clock.ts;
        self.via[0].irq_active() || self.via[1].irq_active()
    }

    /// Render the accumulated slice, both PSGs in stereo lockstep, and
    /// hand the samples to the audio source.
    pub fn render(&mut self) -> usize {
        let mut buffer = [0f32; RENDER_BUFFER];
        let duration = self.render_slice;
        let lcount = self.psg[0].render(
            duration,
            0,
            &mut buffer,
            RENDER_LIMIT,
            2,
            self.sample_rate,
        );
        let rcount = self.psg[1].render(
            duration,
            1,
            &mut buffer,
            RENDER_LIMIT,
            2,
            self.sample_rate,
        );
        // zero fill the shorter channel so the pair stays aligned
        let count = usize::max(lcount, rcount);
        for sample in lcount..count {
            buffer[sample * 2] = 0.0;
        }
        for sample in rcount..count {
            buffer[sample * 2 + 1] = 0.0;
        }
        self.render_slice = 0;
        // never split a stereo pair across a full ring
        let free = self.source.free_len() & !1;
        let take = usize::min(count * 2, free);
        self.source.write(&buffer[..take]);
        count
    }

    fn maybe_flush(&mut self, now: u64) {
        if now.saturating_sub(self.last_flush_cycle) >= self.flush_cycles {
            self.last_flush_cycle = now;
            self.render();
        }
    }

    fn rom_access(&mut self, address: u16, byte: &mut u8, write: bool) -> bool {
        let offset = (address & 0xff) as u8;
        // registers decode at $00-$0F and $80-$8F of the page
        if offset & 0x70 != 0 {
            return false;
        }
        if write {
            // the card counts as initialised once the guest programs a DDR
            if offset & 0x7f == 0x02 && *byte == 0xff {
                self.init_done = true;
            }
            self.io_write(offset, *byte);
            self.init_done
        } else if self.init_done {
            *byte = self.io_read(offset);
            true
        } else {
            false
        }
    }

    pub fn io_read(&mut self, offset: u8) -> u8 {
        let chip = (offset >> 7) as usize;
        self.via[chip].read(offset & 0x0f)
    }

    pub fn io_write(&mut self, offset: u8, value: u8) {
        let chip = (offset >> 7) as usize;
        self.via[chip].write(offset & 0x0f, value);
    }
}

impl Card for Mockingboard {
    fn name(&self) -> &'static str {
        "mockingboard"
    }

    fn reset(&mut self) {
        let now = self.last_flush_cycle;
        self.io_reset(now);
    }

    fn access(&mut self, _address: u16, byte: u8, _write: bool) -> u8 {
        // nothing lives in the $C0nX window, registers are in ROM space
        byte
    }

    fn status(&self) -> String {
        format!(
            "mockingboard slot {}: via irq {}/{} pending events {}/{}",
            self.slot_id,
            self.via[0].irq_active(),
            self.via[1].irq_active(),
            self.psg[0].pending_events(),
            self.psg[1].pending_events(),
        )
    }
}

#[cfg_attr(feature = "cargo-clippy", allow(clippy::too_many_arguments))]
pub fn attach(
    slot_id: u8,
    clock: &Rc<Clock>,
    timers: &Shared<Timers>,
    irq_line: &Shared<IrqLine>,
    sink: &Arc<AudioSink>,
    card_rom: &Shared<Bank>,
    slots: &Shared<Slots>,
    _video: &Rc<Video>,
    sample_rate: u32,
    cycles_per_sample: f64,
) -> Result<Shared<Mockingboard>, String> {
    let now = clock.get();
    let card = new_shared(Mockingboard::new(
        slot_id,
        now,
        sample_rate,
        cycles_per_sample,
    ));
    sink.add_source(&card.borrow().get_source());
    slots.borrow_mut().attach(slot_id, card.clone())?;

    // VIA registers live in the slot's ROM page
    let page = 0xc1 + (slot_id - 1);
    let hook_card = card.clone();
    card_rom.borrow_mut().install_access_callback(
        page,
        page,
        Rc::new(move |_bank, address, byte, write| {
            hook_card.borrow_mut().rom_access(address, byte, write)
        }),
    );

    // per cycle sync; the late figure keeps the deadline at now + 1
    let name = format!("MB {}", slot_id);
    let irq_source = irq_line.borrow_mut().register(&name);
    let timer_card = card.clone();
    let timer_clock = clock.clone();
    let timer_irq = irq_line.clone();
    timers
        .borrow_mut()
        .register(
            &name,
            Box::new(move |late| {
                let now = timer_clock.get();
                let mut card = timer_card.borrow_mut();
                let active = card.sync(now);
                timer_irq.borrow_mut().set_low(irq_source, active);
                card.maybe_flush(now);
                1 + late
            }),
            1,
            now,
        )
        .ok_or_else(|| "out of timers".to_string())?;
    info!(target: "mb", "Mockingboard attached to slot {}", slot_id);
    Ok(card)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::via;
    use crate::sound::ay3;

    fn setup_card() -> Mockingboard {
        let mut card = Mockingboard::new(4, 0, 44_100, 23.2);
        // open both ports as outputs, the standard driver init
        card.io_write(via::reg::DDRA, 0xff);
        card.io_write(via::reg::DDRB, 0xff);
        card
    }

    fn psg_write(card: &mut Mockingboard, now: &mut u64, reg: u8, value: u8) {
        // LATCH_ADDRESS, INACTIVE, WRITE, INACTIVE through VIA ports
        let steps: [(u8, u8); 4] = [(reg, 0x07), (reg, 0x04), (value, 0x06), (value, 0x04)];
        for (bus, ctl) in steps.iter() {
            card.io_write(via::reg::ORA, *bus);
            card.io_write(via::reg::ORB, *ctl);
            *now += 4;
            card.sync(*now);
        }
    }

    #[test]
    fn guest_writes_reach_the_psg() {
        let mut card = setup_card();
        let mut now = 0;
        psg_write(&mut card, &mut now, ay3::reg::ENABLE, 0x3e);
        psg_write(&mut card, &mut now, ay3::reg::A_PERIOD_FINE, 0xfd);
        psg_write(&mut card, &mut now, ay3::reg::A_PERIOD_COARSE, 0x00);
        psg_write(&mut card, &mut now, ay3::reg::A_AMPLITUDE, 0x0f);
        assert!(card.psg[0].pending_events() >= 4);
    }

    #[test]
    fn one_khz_tone_renders_on_left_channel() {
        let mut card = setup_card();
        let mut now = 0;
        psg_write(&mut card, &mut now, ay3::reg::ENABLE, 0x3e);
        psg_write(&mut card, &mut now, ay3::reg::A_PERIOD_FINE, 0xfd);
        psg_write(&mut card, &mut now, ay3::reg::A_PERIOD_COARSE, 0x00);
        psg_write(&mut card, &mut now, ay3::reg::A_AMPLITUDE, 0x0f);
        // accumulate a 0.1 s slice and render it in flush sized chunks
        let mut samples = Vec::new();
        let mut buffer = [0f32; RENDER_BUFFER];
        let mut rendered = 0;
        while rendered < 4410 {
            now += 11_887; // ~512 samples worth of cycles
            card.sync(now);
            for sample in buffer.iter_mut() {
                *sample = 0.0;
            }
            let duration = card.render_slice;
            let l = card.psg[0].render(duration, 0, &mut buffer, RENDER_LIMIT, 2, 44_100);
            let r = card.psg[1].render(duration, 1, &mut buffer, RENDER_LIMIT, 2, 44_100);
            card.render_slice = 0;
            assert!(l >= r);
            for i in 0..l {
                samples.push(buffer[i * 2]);
            }
            rendered += l;
        }
        let nonzero = samples.iter().filter(|s| s.abs() > 1e-6).count();
        assert!(nonzero > samples.len() / 2);
        let mut sign_changes = 0;
        for i in 1..samples.len() {
            if samples[i].signum() != samples[i - 1].signum() {
                sign_changes += 1;
            }
        }
        assert!(sign_changes >= 200, "sign changes {}", sign_changes);
    }

    #[test]
    fn via_timer_raises_card_irq() {
        let mut card = setup_card();
        card.io_write(via::reg::IER, 0x80 | via::ier::TIMER1);
        card.io_write(via::reg::T1CL, 0x10);
        card.io_write(via::reg::T1CH, 0x00);
        let mut now = 0;
        let mut asserted = false;
        for _ in 0..64 {
            now += 1;
            if card.sync(now) {
                asserted = true;
                break;
            }
        }
        assert!(asserted);
    }
}
