// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

// Spec: AY-3-8910 datasheet; GI programming primer for the Mockingboard
// Design:
//   The PSG runs in two phases. update() is driven once per PHI0 tick from
//   the 6522 side and decodes the bus control lines; register writes are
//   queued with the offset of the current render slice instead of being
//   synthesised immediately. render() is called at audio pull time, walks
//   the slice in sample steps, applies queued events as their offsets come
//   due and synthesises tone, noise and envelope per sample. This keeps
//   audio generation off the cpu path entirely.

use super::clock::{clocks_from_ns, ns_from_clocks};

pub const AY_QUEUE_SIZE: usize = 64;

pub mod reg {
    pub const A_PERIOD_FINE: u8 = 0x00;
    pub const A_PERIOD_COARSE: u8 = 0x01;
    pub const B_PERIOD_FINE: u8 = 0x02;
    pub const B_PERIOD_COARSE: u8 = 0x03;
    pub const C_PERIOD_FINE: u8 = 0x04;
    pub const C_PERIOD_COARSE: u8 = 0x05;
    pub const NOISE_PERIOD: u8 = 0x06;
    pub const ENABLE: u8 = 0x07;
    pub const A_AMPLITUDE: u8 = 0x08;
    pub const B_AMPLITUDE: u8 = 0x09;
    pub const C_AMPLITUDE: u8 = 0x0a;
    pub const ENVELOPE_COARSE: u8 = 0x0b;
    pub const ENVELOPE_FINE: u8 = 0x0c;
    pub const ENVELOPE_SHAPE: u8 = 0x0d;
    pub const IO_A: u8 = 0x0e;
    pub const IO_B: u8 = 0x0f;
}

const TONE_LEVEL_HIGH: u32 = 0x8000_0000;
const TONE_LEVEL_ENABLED: u32 = 0x4000_0000;
const TONE_NOISE_ENABLED: u32 = 0x2000_0000;

const AMP_VARIABLE_MODE: u8 = 0x10;
const AMP_FIXED_LEVEL_MASK: u8 = 0x0f;

const ENV_HOLD: u8 = 0x01;
const ENV_ALTERNATE: u8 = 0x02;
const ENV_ATTACK: u8 = 0x04;
const ENV_CONTINUE: u8 = 0x08;

// bus control bits as wired on the card: BC1, BDIR, /RESET
const BUS_BC1: u8 = 0x01;
const BUS_BDIR: u8 = 0x02;
const BUS_RESET: u8 = 0x04;

// measured output DAC levels, normalized
const AMPL_FACTOR: [f32; 16] = [
    0.000, 0.010, 0.015, 0.022, 0.031, 0.046, 0.064, 0.106, 0.132, 0.216, 0.297, 0.391, 0.513,
    0.637, 0.819, 1.000,
];

#[derive(Clone, Copy)]
struct Event {
    reg: u8,
    value: u8,
    at: u64,
}

pub struct Ay3 {
    // register reflection, for reads back over the bus
    tone_period: [u16; 3],
    envelope_period: u16,
    amplitude: [u8; 3],
    noise_period: u8,
    enable: u8,
    envelope_shape: u8,
    // event queue for the current render slice
    queue: Vec<Event>,
    // bus state
    bus_control: u8,
    reg_latch: u8,
    clock_freq: f32,
    // mixer state, only touched from render time
    mixer_tone_period: [u16; 3],
    tone_half_period: [f32; 3],
    tone_time: [f32; 3],
    tone_level: [u32; 3],
    noise_half_period: f32,
    noise_time: f32,
    noise_level: u32,
    noise_seed: u32,
    mixer_amp: [u8; 3],
    // high nibble counts envelope periods, low nibble is the shape
    envelope_control: u8,
    envelope_time: f32,
    envelope_period_reg: u16,
    envelope_secs: f32,
}

impl Ay3 {
    pub fn new(clock_freq: f32) -> Self {
        let mut psg = Self {
            tone_period: [0; 3],
            envelope_period: 0,
            amplitude: [0; 3],
            noise_period: 0,
            enable: 0,
            envelope_shape: 0,
            queue: Vec::with_capacity(AY_QUEUE_SIZE),
            bus_control: 0,
            reg_latch: 0,
            clock_freq,
            mixer_tone_period: [0; 3],
            tone_half_period: [0.0; 3],
            tone_time: [0.0; 3],
            tone_level: [0; 3],
            noise_half_period: 0.0,
            noise_time: 0.0,
            noise_level: 0,
            noise_seed: 0,
            mixer_amp: [0; 3],
            envelope_control: 0,
            envelope_time: 0.0,
            envelope_period_reg: 0,
            envelope_secs: 0.0,
        };
        psg.reset(clock_freq);
        psg
    }

    /// Passing 0.0 keeps the previously configured clock.
    pub fn reset(&mut self, clock_freq: f32) {
        let clock_freq = if clock_freq != 0.0 {
            clock_freq
        } else {
            self.clock_freq
        };
        *self = Self {
            queue: Vec::with_capacity(AY_QUEUE_SIZE),
            clock_freq,
            noise_seed: 0xa010_2035,
            mixer_amp: [0x0f; 3],
            tone_period: [0; 3],
            envelope_period: 0,
            amplitude: [0; 3],
            noise_period: 0,
            enable: 0,
            envelope_shape: 0,
            bus_control: 0,
            reg_latch: 0,
            mixer_tone_period: [0; 3],
            tone_half_period: [0.0; 3],
            tone_time: [0.0; 3],
            tone_level: [0; 3],
            noise_half_period: 0.0,
            noise_time: 0.0,
            noise_level: 0,
            envelope_control: 0,
            envelope_time: 0.0,
            envelope_period_reg: 0,
            envelope_secs: 0.0,
        };
    }

    /// Bus transaction from the 6522, tagged with the offset into the
    /// current render slice.
    pub fn update(&mut self, bus: &mut u8, bus_control: u8, slice_offset: u64) {
        if bus_control == self.bus_control {
            return;
        }
        if bus_control & BUS_RESET == 0 {
            self.reset(0.0);
            return;
        }
        let mut queued = None;
        match bus_control & (BUS_BC1 | BUS_BDIR) {
            0x03 => {
                // LATCH_ADDRESS
                self.reg_latch = *bus;
            }
            0x01 => {
                // READ
                *bus = self.get(self.reg_latch);
            }
            0x02 => {
                // WRITE
                self.set(self.reg_latch, *bus);
                queued = Some(Event {
                    reg: self.reg_latch,
                    value: *bus,
                    at: slice_offset,
                });
            }
            _ => {
                // INACTIVE
            }
        }
        if let Some(event) = queued {
            if self.queue.len() < AY_QUEUE_SIZE {
                self.queue.push(event);
            } else {
                warn!(
                    target: "ay3",
                    "lost synth event reg {:02x} = {:02x}",
                    event.reg,
                    event.value
                );
            }
        }
        self.bus_control = bus_control;
    }

    fn get(&self, reg_index: u8) -> u8 {
        match reg_index {
            reg::A_PERIOD_FINE => (self.tone_period[0] & 0xff) as u8,
            reg::A_PERIOD_COARSE => (self.tone_period[0] >> 8) as u8,
            reg::B_PERIOD_FINE => (self.tone_period[1] & 0xff) as u8,
            reg::B_PERIOD_COARSE => (self.tone_period[1] >> 8) as u8,
            reg::C_PERIOD_FINE => (self.tone_period[2] & 0xff) as u8,
            reg::C_PERIOD_COARSE => (self.tone_period[2] >> 8) as u8,
            reg::NOISE_PERIOD => self.noise_period,
            reg::ENABLE => self.enable,
            reg::A_AMPLITUDE => self.amplitude[0],
            reg::B_AMPLITUDE => self.amplitude[1],
            reg::C_AMPLITUDE => self.amplitude[2],
            reg::ENVELOPE_FINE => (self.envelope_period & 0xff) as u8,
            reg::ENVELOPE_COARSE => (self.envelope_period >> 8) as u8,
            reg::ENVELOPE_SHAPE => self.envelope_shape,
            _ => 0,
        }
    }

    fn set(&mut self, reg_index: u8, value: u8) {
        match reg_index {
            reg::A_PERIOD_FINE => {
                self.tone_period[0] = (self.tone_period[0] & 0xff00) | u16::from(value);
            }
            reg::A_PERIOD_COARSE => {
                self.tone_period[0] =
                    (self.tone_period[0] & 0x00ff) | (u16::from(value & 0x0f) << 8);
            }
            reg::B_PERIOD_FINE => {
                self.tone_period[1] = (self.tone_period[1] & 0xff00) | u16::from(value);
            }
            reg::B_PERIOD_COARSE => {
                self.tone_period[1] =
                    (self.tone_period[1] & 0x00ff) | (u16::from(value & 0x0f) << 8);
            }
            reg::C_PERIOD_FINE => {
                self.tone_period[2] = (self.tone_period[2] & 0xff00) | u16::from(value);
            }
            reg::C_PERIOD_COARSE => {
                self.tone_period[2] =
                    (self.tone_period[2] & 0x00ff) | (u16::from(value & 0x0f) << 8);
            }
            reg::NOISE_PERIOD => self.noise_period = value & 0x1f,
            reg::ENABLE => self.enable = value,
            reg::A_AMPLITUDE => self.amplitude[0] = value & 0x1f,
            reg::B_AMPLITUDE => self.amplitude[1] = value & 0x1f,
            reg::C_AMPLITUDE => self.amplitude[2] = value & 0x1f,
            reg::ENVELOPE_COARSE => {
                self.envelope_period = (self.envelope_period & 0x00ff) | (u16::from(value) << 8);
            }
            reg::ENVELOPE_FINE => {
                self.envelope_period = (self.envelope_period & 0xff00) | u16::from(value);
            }
            reg::ENVELOPE_SHAPE => self.envelope_shape = value & 0x0f,
            _ => {}
        }
    }

    // -- Mixer event application, render time only

    fn mix_event(&mut self, reg_index: u8, value: u8) {
        match reg_index {
            reg::A_PERIOD_FINE => self.tone_setup(0, value, false),
            reg::A_PERIOD_COARSE => self.tone_setup(0, value, true),
            reg::B_PERIOD_FINE => self.tone_setup(1, value, false),
            reg::B_PERIOD_COARSE => self.tone_setup(1, value, true),
            reg::C_PERIOD_FINE => self.tone_setup(2, value, false),
            reg::C_PERIOD_COARSE => self.tone_setup(2, value, true),
            reg::NOISE_PERIOD => self.noise_setup(value),
            reg::ENABLE => self.tone_enable(value),
            reg::A_AMPLITUDE => self.mixer_amp[0] = value,
            reg::B_AMPLITUDE => self.mixer_amp[1] = value,
            reg::C_AMPLITUDE => self.mixer_amp[2] = value,
            reg::ENVELOPE_COARSE => self.envelope_setup(value, true),
            reg::ENVELOPE_FINE => self.envelope_setup(value, false),
            reg::ENVELOPE_SHAPE => self.envelope_control = value & 0x0f,
            _ => {}
        }
    }

    fn tone_setup(&mut self, channel: usize, value: u8, coarse: bool) {
        let mut period = self.mixer_tone_period[channel];
        if coarse {
            period = (period & 0x00ff) | (u16::from(value & 0x0f) << 8);
        } else {
            period = (period & 0x0f00) | u16::from(value);
        }
        self.mixer_tone_period[channel] = period;
        self.tone_half_period[channel] = f32::from(period) * 8.0 / self.clock_freq;
        if self.tone_time[channel] > self.tone_half_period[channel] {
            self.tone_time[channel] = self.tone_half_period[channel];
        }
    }

    fn noise_setup(&mut self, value: u8) {
        self.noise_half_period = f32::from(value & 0x1f) * 8.0 / self.clock_freq;
        if self.noise_time > self.noise_half_period {
            self.noise_time = self.noise_half_period;
        }
    }

    fn envelope_setup(&mut self, value: u8, coarse: bool) {
        let mut period = self.envelope_period_reg;
        if coarse {
            period = (period & 0x00ff) | (u16::from(value) << 8);
        } else {
            period = (period & 0xff00) | u16::from(value);
        }
        self.envelope_period_reg = period;
        self.envelope_secs = f32::from(period) * 256.0 / self.clock_freq;
        if self.envelope_time > self.envelope_secs {
            self.envelope_time = self.envelope_secs;
        }
    }

    fn tone_enable(&mut self, value: u8) {
        for channel in 0..3 {
            if value & (1 << channel) != 0 {
                self.tone_level[channel] &= !TONE_LEVEL_ENABLED;
            } else {
                self.tone_level[channel] |= TONE_LEVEL_ENABLED;
            }
            if value & (1 << (channel + 3)) != 0 {
                self.tone_level[channel] &= !TONE_NOISE_ENABLED;
            } else {
                self.tone_level[channel] |= TONE_NOISE_ENABLED;
            }
        }
    }

    fn noise_gen(&mut self, sample_dt: f32) -> u32 {
        if self.noise_half_period < f32::EPSILON {
            return 0;
        }
        let mut dt_wave = self.noise_time + sample_dt;
        if dt_wave >= self.noise_half_period {
            dt_wave -= self.noise_half_period;
            self.noise_level = self.noise_seed & 1;
            self.noise_seed = (self.noise_seed.wrapping_mul(3)).wrapping_add(4) % 7;
        }
        self.noise_time = dt_wave;
        self.noise_level
    }

    fn tone_render(&mut self, channel: usize, noise: u32, sample_dt: f32) -> f32 {
        if self.tone_half_period[channel] < f32::EPSILON {
            return 0.0;
        }
        let mut dt_wave = self.tone_time[channel];
        let magnitude = if self.tone_level[channel] & TONE_LEVEL_ENABLED != 0 {
            let mut level = u32::from(self.tone_level[channel] & TONE_LEVEL_HIGH != 0);
            if self.tone_level[channel] & TONE_NOISE_ENABLED != 0 {
                level &= noise;
            }
            ((level << 1) as i32 - 1) as f32
        } else {
            0.0
        };
        dt_wave += sample_dt;
        if dt_wave >= self.tone_half_period[channel] {
            dt_wave -= self.tone_half_period[channel];
            self.tone_level[channel] ^= TONE_LEVEL_HIGH;
        }
        self.tone_time[channel] = dt_wave;
        magnitude
    }

    fn envelope_gen(&mut self, sample_dt: f32) -> usize {
        if (self.mixer_amp[0] | self.mixer_amp[1] | self.mixer_amp[2]) & AMP_VARIABLE_MODE == 0 {
            return 0;
        }
        if self.envelope_secs < f32::EPSILON {
            return 0;
        }
        let control = self.envelope_control;
        let cycle = control >> 4;
        let dt = self.envelope_time;
        let ramp_up = ((dt * 16.0 / self.envelope_secs) as usize).min(15);
        let level = if cycle & 1 != 0 {
            // past the first period
            if control & ENV_CONTINUE == 0 {
                0
            } else if control & ENV_HOLD != 0 {
                let held_high = (control & ENV_ATTACK != 0) != (control & ENV_ALTERNATE != 0);
                if held_high {
                    15
                } else {
                    0
                }
            } else {
                let rising = (control & ENV_ATTACK != 0) != (control & ENV_ALTERNATE != 0);
                if rising {
                    ramp_up
                } else {
                    15 - ramp_up
                }
            }
        } else if control & ENV_ATTACK != 0 {
            ramp_up
        } else {
            15 - ramp_up
        };
        let mut dt = dt + sample_dt;
        if dt >= self.envelope_secs {
            if control & ENV_CONTINUE == 0 || control & ENV_HOLD != 0 {
                self.envelope_control = 0x10 | (control & 0x0f);
            } else {
                self.envelope_control = control.wrapping_add(0x10);
            }
            dt -= self.envelope_secs;
        }
        self.envelope_time = dt;
        level
    }

    fn amp_modify(&self, channel: usize, sample: f32, envelope: usize) -> f32 {
        if self.mixer_amp[channel] & AMP_VARIABLE_MODE != 0 {
            sample * AMPL_FACTOR[envelope & 0x0f]
        } else {
            sample * AMPL_FACTOR[(self.mixer_amp[channel] & AMP_FIXED_LEVEL_MASK) as usize]
        }
    }

    /// Render the slice covering `duration` reference clocks into `out`,
    /// writing every `stride` samples starting at `channel`. Queued events
    /// are applied as their offsets come due; anything left over is applied
    /// at the end so no write is lost.
    pub fn render(
        &mut self,
        duration: u64,
        channel: usize,
        out: &mut [f32],
        out_limit: usize,
        stride: usize,
        sample_rate: u32,
    ) -> usize {
        let render_window_secs = ns_from_clocks(duration) as f32 * 1e-9;
        let sample_dt = 1.0 / sample_rate as f32;
        let render_dt = clocks_from_ns(sample_dt * 1e9);
        let mut render_ts = 0u64;
        let mut render_t = 0.0f32;
        let mut sample_count = 0usize;
        let mut queue_index = 0usize;
        while render_t < render_window_secs
            && sample_count < out_limit
            && sample_count * stride + channel < out.len()
        {
            while queue_index < self.queue.len() && self.queue[queue_index].at <= render_ts {
                let event = self.queue[queue_index];
                self.mix_event(event.reg, event.value);
                queue_index += 1;
            }
            let noise = self.noise_gen(sample_dt);
            let envelope = self.envelope_gen(sample_dt);
            let mut acc = 0.0;
            for ch in 0..3 {
                let sample = self.tone_render(ch, noise, sample_dt);
                acc += self.amp_modify(ch, sample, envelope);
            }
            acc *= 0.166_667;
            let index = sample_count * stride + channel;
            let mut current = out[index] + acc;
            if current > 0.75 {
                current = 0.75;
            } else if current < -0.75 {
                current = -0.75;
            }
            out[index] = current;
            render_ts += render_dt;
            render_t += sample_dt;
            sample_count += 1;
        }
        // consume remaining events to prevent data loss
        while queue_index < self.queue.len() {
            let event = self.queue[queue_index];
            self.mix_event(event.reg, event.value);
            queue_index += 1;
        }
        self.queue.clear();
        sample_count
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }
}
