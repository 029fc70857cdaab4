// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use mii_core::audio::AudioSink;
use mii_core::factory::Addressable;
use mii_core::signal::{flags, SignalId, SignalPool};
use mii_core::{new_shared, Clock, IrqLine, Shared, Timers};

use crate::card::ssc::SscConfig;
use crate::card::{mockingboard, ssc, SscWorker};
use crate::config::Config;
use crate::cpu::{Cpu, TraceRecord};
use crate::device::AnalogInputs;
use crate::mem::{install_switches, Bank, Memory, SwitchState};
use crate::slot::{self, Card, CardCommand, Slots};
use crate::sound::Speaker;
use crate::video::Video;

// Design:
//   Mii represents the machine itself and all of its components.
//   Connections between components are managed as component dependencies;
//   everything the cpu thread touches is single threaded behind Rc, the
//   cross thread edges (audio source rings, serial rings, paddle bytes)
//   are the only shared state.

#[derive(Clone, Debug)]
pub enum CardConfig {
    Mockingboard,
    Ssc(SscConfig),
}

pub struct Mii {
    // Dependencies
    config: Config,
    // Chipset
    clock: Rc<Clock>,
    cpu: Cpu,
    timers: Shared<Timers>,
    irq_line: Shared<IrqLine>,
    nmi_line: Shared<IrqLine>,
    // Memory
    main: Shared<Bank>,
    aux: Shared<Bank>,
    rom: Shared<Bank>,
    card_rom: Shared<Bank>,
    sw: Shared<Bank>,
    mem: Shared<Memory>,
    switches: Rc<SwitchState>,
    // Peripherals
    video: Rc<Video>,
    speaker: Rc<Speaker>,
    slots: Shared<Slots>,
    analog: Arc<AnalogInputs>,
    audio_sink: Arc<AudioSink>,
    ssc_worker: Rc<RefCell<SscWorker>>,
    // Tracing
    sig_pool: Shared<SignalPool>,
    sig_irq: SignalId,
    sig_vbl: SignalId,
    // Runtime State
    paste_buffer: VecDeque<u8>,
}

impl Mii {
    pub fn new(
        config: Config,
        audio_sink: Arc<AudioSink>,
        analog: Arc<AnalogInputs>,
    ) -> Result<Mii, String> {
        info!(target: "mii", "Initializing system");
        let clock = Rc::new(Clock::new());
        let timers = new_shared(Timers::new());
        let irq_line = new_shared(IrqLine::new("irq"));
        let nmi_line = new_shared(IrqLine::new("nmi"));

        // Memory
        let main = new_shared(Bank::new("main", 0x0000, 0x10000));
        let aux = new_shared(Bank::new("aux", 0x0000, 0x10000));
        let rom = new_shared(Bank::new("rom", 0xc000, 0x4000));
        let card_rom = new_shared(Bank::new("card rom", 0xc100, 0x0f00));
        let sw = new_shared(Bank::new("sw", 0xc000, 0x0100));
        rom.borrow_mut().set_read_only(true);
        card_rom.borrow_mut().set_read_only(true);
        if !config.roms.main.is_empty() {
            if config.roms.main.len() == 0x4000 {
                rom.borrow_mut().write_block(0xc000, &config.roms.main);
            } else {
                return Err(format!(
                    "invalid rom image size {}",
                    config.roms.main.len()
                ));
            }
        }

        let switches = Rc::new(SwitchState::new());
        let speaker = Rc::new(Speaker::new(config.cycles_per_sample()));
        audio_sink.add_source(&speaker.get_source());
        let video = Rc::new(Video::new(&config.model, main.clone(), switches.clone()));

        install_switches(&sw, &switches, &video, &speaker, &analog, &clock);
        let slots = new_shared(Slots::new());
        slot::install_io_windows(&sw, &slots, &video, &clock);
        slot::install_expansion_window(&card_rom, &slots, &video, &clock);

        let mem = new_shared(Memory::new(
            main.clone(),
            aux.clone(),
            rom.clone(),
            card_rom.clone(),
            sw.clone(),
            switches.clone(),
        ));
        let mut cpu = Cpu::new(mem.clone(), irq_line.clone(), nmi_line.clone());
        cpu.set_trace(config.trace);

        let mut sig_pool = SignalPool::new();
        let sig_irq = sig_pool.alloc(0, "cpu.irq");
        let sig_vbl = sig_pool.alloc(1, "video.vbl");
        sig_pool.set_flags(sig_irq, flags::FILTERED | flags::INIT);
        sig_pool.set_flags(sig_vbl, flags::FILTERED | flags::INIT);

        Ok(Mii {
            config,
            clock,
            cpu,
            timers,
            irq_line,
            nmi_line,
            main,
            aux,
            rom,
            card_rom,
            sw,
            mem,
            switches,
            video,
            speaker,
            slots,
            analog,
            audio_sink,
            ssc_worker: Rc::new(RefCell::new(SscWorker::new())),
            sig_pool: new_shared(sig_pool),
            sig_irq,
            sig_vbl,
            paste_buffer: VecDeque::new(),
        })
    }

    // -- Accessors

    pub fn get_config(&self) -> &Config {
        &self.config
    }

    pub fn get_clock(&self) -> Rc<Clock> {
        self.clock.clone()
    }

    pub fn get_irq_line(&self) -> Shared<IrqLine> {
        self.irq_line.clone()
    }

    pub fn get_nmi_line(&self) -> Shared<IrqLine> {
        self.nmi_line.clone()
    }

    pub fn get_rom_bank(&self) -> Shared<Bank> {
        self.rom.clone()
    }

    pub fn get_sw_bank(&self) -> Shared<Bank> {
        self.sw.clone()
    }

    pub fn get_cycles(&self) -> u64 {
        self.clock.get()
    }

    pub fn get_cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn get_cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn get_mem(&self) -> Shared<Memory> {
        self.mem.clone()
    }

    pub fn get_switches(&self) -> Rc<SwitchState> {
        self.switches.clone()
    }

    pub fn get_video(&self) -> Rc<Video> {
        self.video.clone()
    }

    pub fn get_analog(&self) -> Arc<AnalogInputs> {
        self.analog.clone()
    }

    pub fn get_audio_sink(&self) -> Arc<AudioSink> {
        self.audio_sink.clone()
    }

    pub fn get_signal_pool(&self) -> Shared<SignalPool> {
        self.sig_pool.clone()
    }

    pub fn get_slots(&self) -> Shared<Slots> {
        self.slots.clone()
    }

    pub fn get_frame_count(&self) -> u32 {
        self.video.frame_count()
    }

    pub fn is_tracing(&self) -> bool {
        self.cpu.is_tracing()
    }

    pub fn set_trace(&mut self, enabled: bool) {
        self.cpu.set_trace(enabled);
    }

    pub fn drain_trace(&mut self) -> Vec<TraceRecord> {
        self.cpu.drain_trace()
    }

    // -- Memory Ops

    pub fn load(&mut self, data: &[u8], offset: u16) {
        let mut mem = self.mem.borrow_mut();
        let mut address = offset;
        for byte in data {
            mem.write(address, *byte);
            address = address.wrapping_add(1);
        }
    }

    pub fn peek(&self, address: u16) -> u8 {
        self.main.borrow().peek(address)
    }

    // -- Peripheral Ops

    pub fn attach_card(&mut self, slot_id: u8, config: CardConfig) -> Result<(), String> {
        match config {
            CardConfig::Mockingboard => self.attach_mockingboard(slot_id).map(|_| ()),
            CardConfig::Ssc(conf) => self.attach_ssc(slot_id, conf).map(|_| ()),
        }
    }

    pub fn attach_mockingboard(
        &mut self,
        slot_id: u8,
    ) -> Result<Shared<mockingboard::Mockingboard>, String> {
        mockingboard::attach(
            slot_id,
            &self.clock,
            &self.timers,
            &self.irq_line,
            &self.audio_sink,
            &self.card_rom,
            &self.slots,
            &self.video,
            self.config.sound.sample_rate,
            self.config.cycles_per_sample(),
        )
    }

    pub fn attach_ssc(
        &mut self,
        slot_id: u8,
        conf: SscConfig,
    ) -> Result<Shared<ssc::Ssc>, String> {
        ssc::attach(
            slot_id,
            conf,
            &self.clock,
            &self.timers,
            &self.irq_line,
            &self.card_rom,
            &self.slots,
            &self.ssc_worker,
            self.config.model.cpu_freq,
            self.config.speed,
        )
    }

    pub fn slot_command(&mut self, slot_id: u8, command: &CardCommand) -> Result<(), String> {
        let card = self
            .slots
            .borrow()
            .card(slot_id)
            .ok_or_else(|| format!("no card in slot {}", slot_id))?;
        let result = card.borrow_mut().command(command);
        result
    }

    pub fn card_status(&self, slot_id: u8) -> Option<String> {
        self.slots
            .borrow()
            .card(slot_id)
            .map(|card| card.borrow().status())
    }

    pub fn key_down(&self, code: u8) {
        self.switches.key_down(code);
    }

    pub fn paste(&mut self, text: &str) {
        for byte in text.bytes() {
            self.paste_buffer
                .push_back(if byte == b'\n' { b'\r' } else { byte });
        }
    }

    // -- Execution

    #[inline(always)]
    pub fn step(&mut self) -> u32 {
        let delta = self.cpu.step();
        self.clock.tick_delta(u64::from(delta));
        let now = self.clock.get();
        self.timers.borrow_mut().run(now);
        self.video.clock(now);
        let mut pool = self.sig_pool.borrow_mut();
        pool.raise(self.sig_irq, self.irq_line.borrow().is_low() as u32);
        pool.raise(self.sig_vbl, self.video.in_vbl(now) as u32);
        delta
    }

    /// Run until the video frame counter advances, delivering at most one
    /// pasted character so receivers see a realistic cadence.
    pub fn run_frame(&mut self) -> u32 {
        if !self.switches.key_strobe() {
            if let Some(byte) = self.paste_buffer.pop_front() {
                self.switches.key_down(byte);
            }
        }
        let frame = self.video.frame_count();
        while self.video.frame_count() == frame {
            self.step();
        }
        self.speaker.flush(self.clock.get());
        self.video.frame_count()
    }

    pub fn reset(&mut self, hard: bool) {
        info!(target: "mii", "Resetting system");
        if hard {
            self.main.borrow_mut().clear();
            self.aux.borrow_mut().clear();
        }
        let now = self.clock.get();
        self.switches.reset();
        self.slots.borrow().reset();
        self.speaker.reset(now);
        self.video.reset(now);
        self.audio_sink.reset();
        self.cpu.reset();
    }

    /// Cooperative shutdown: cards first, then the I/O worker.
    pub fn dispose(&mut self) {
        let cards: Vec<Shared<dyn Card>> = self
            .slots
            .borrow()
            .occupied()
            .map(|(_, card)| card)
            .collect();
        for card in cards {
            card.borrow_mut().dispose();
        }
        self.ssc_worker.borrow_mut().terminate();
    }
}

impl Drop for Mii {
    fn drop(&mut self) {
        self.dispose();
    }
}
