// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mii_core::Fifo;
use mii_debug::{Command, Disassembler, COMMAND_QUEUE_SIZE};
use mii_system::Mii;

// Design:
//   Frame paced state machine for the cpu thread. Each wake drains every
//   command ring, runs the machine according to the current state and
//   sleeps until the next frame deadline. Step mode executes one
//   instruction per wake and drops to Stopped when the step budget runs
//   out; Terminate leaves the loop and disposes the machine.

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum State {
    Init,
    Running,
    Step,
    Stopped,
    Terminate,
}

pub struct ExecutionEngine {
    // Dependencies
    mii: Mii,
    // Runtime State
    state: State,
    step_budget: u16,
    commands: Vec<Arc<Fifo<Command, COMMAND_QUEUE_SIZE>>>,
    frame_duration: Duration,
    next_frame: Option<Instant>,
}

impl ExecutionEngine {
    pub fn new(mii: Mii, commands: Vec<Arc<Fifo<Command, COMMAND_QUEUE_SIZE>>>) -> Self {
        let frame_duration = Duration::from_nanos(mii.get_config().frame_duration_ns());
        Self {
            mii,
            state: State::Init,
            step_budget: 0,
            commands,
            frame_duration,
            next_frame: None,
        }
    }

    pub fn get_state(&self) -> State {
        self.state
    }

    pub fn get_mii(&self) -> &Mii {
        &self.mii
    }

    pub fn get_mii_mut(&mut self) -> &mut Mii {
        &mut self.mii
    }

    pub fn run(&mut self) {
        info!(target: "exec", "Running cpu loop");
        while self.tick() {}
        info!(target: "exec", "State {:?}", self.state);
        self.mii.dispose();
    }

    /// One wake of the regulator. Returns false once terminated.
    pub fn tick(&mut self) -> bool {
        self.handle_commands();
        match self.state {
            State::Init => {
                self.state = State::Running;
            }
            State::Running => {
                self.mii.run_frame();
                self.sync_frame();
            }
            State::Step => {
                self.mii.step();
                if self.step_budget > 1 {
                    self.step_budget -= 1;
                } else {
                    self.step_budget = 0;
                    self.state = State::Stopped;
                    self.dump_trace();
                }
                self.sync_frame();
            }
            State::Stopped => {
                thread::sleep(self.frame_duration);
            }
            State::Terminate => return false,
        }
        true
    }

    fn handle_commands(&mut self) {
        // rings are single producer, one per producing thread
        let queues = self.commands.clone();
        for queue in &queues {
            while let Some(command) = queue.pop() {
                self.handle_command(command);
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Reset(hard) => {
                self.mii.reset(hard);
            }
            Command::Stop => {
                self.dump_trace();
                self.state = State::Stopped;
            }
            Command::Step(count) => {
                self.step_budget = u16::max(count, 1);
                self.state = State::Step;
            }
            Command::Run => {
                // a pending step budget keeps stepping; Run resumes from
                // Stopped
                if self.state != State::Step {
                    self.state = State::Running;
                    self.next_frame = None;
                }
            }
            Command::Paste(text) => {
                self.mii.paste(&text);
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status_text());
            }
            Command::Trace(enabled) => {
                self.mii.set_trace(enabled);
            }
            Command::Terminate => {
                self.state = State::Terminate;
            }
        }
    }

    fn status_text(&self) -> String {
        let cpu = self.mii.get_cpu();
        let mut text = format!(
            "state: {:?} cycles: {} frames: {} pc: {:04x}",
            self.state,
            self.mii.get_cycles(),
            self.mii.get_frame_count(),
            cpu.get_pc(),
        );
        for slot_id in 1..=7 {
            if let Some(status) = self.mii.card_status(slot_id) {
                if !status.is_empty() {
                    text.push('\n');
                    text.push_str(&status);
                }
            }
        }
        text
    }

    fn dump_trace(&mut self) {
        if !self.mii.is_tracing() {
            return;
        }
        for record in self.mii.drain_trace() {
            info!(target: "trace", "{}", Disassembler::format_trace(&record));
        }
    }

    fn sync_frame(&mut self) {
        let now = Instant::now();
        if let Some(deadline) = self.next_frame {
            if deadline > now {
                let wait = deadline - now;
                if wait <= self.frame_duration {
                    thread::sleep(wait);
                }
            }
        }
        self.next_frame = Some(Instant::now() + self.frame_duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mii_core::audio::AudioSink;
    use mii_system::device::AnalogInputs;
    use mii_system::{Config, Model};
    use std::sync::mpsc;

    fn build_rom() -> Vec<u8> {
        let mut rom = vec![0xea; 0x4000];
        rom[0x3800] = 0x4c; // jmp $f800
        rom[0x3801] = 0x00;
        rom[0x3802] = 0xf8;
        rom[0x3ffc] = 0x00;
        rom[0x3ffd] = 0xf8;
        rom
    }

    fn setup_engine() -> (
        ExecutionEngine,
        Arc<Fifo<Command, COMMAND_QUEUE_SIZE>>,
    ) {
        let mut config = Config::new(Model::iie());
        config.roms.main = build_rom();
        config.trace = true;
        let mut mii = Mii::new(
            config,
            AudioSink::new(),
            Arc::new(AnalogInputs::new()),
        )
        .unwrap();
        mii.reset(true);
        let commands = Arc::new(Fifo::new());
        let engine = ExecutionEngine::new(mii, vec![commands.clone()]);
        (engine, commands)
    }

    #[test]
    fn step_mode_executes_exactly_n_instructions() {
        let (mut engine, commands) = setup_engine();
        commands.push(Command::Step(3)).ok().unwrap();
        commands.push(Command::Run).ok().unwrap();
        let start_cycles = engine.get_mii().get_cycles();
        let mut wakes = 0;
        while engine.get_state() != State::Stopped {
            engine.tick();
            wakes += 1;
            assert!(wakes < 10, "step mode never stopped");
        }
        // three instructions of the rom loop: jmp, jmp, jmp
        assert_eq!(9, engine.get_mii().get_cycles() - start_cycles);
    }

    #[test]
    fn step_trace_holds_disassembly_in_order() {
        let (mut engine, commands) = setup_engine();
        commands.push(Command::Step(3)).ok().unwrap();
        while engine.get_state() != State::Stopped {
            engine.tick();
        }
        // stopping dumped the ring into the log; step once more and check
        // the ring fills again
        commands.push(Command::Step(2)).ok().unwrap();
        engine.tick();
        let records = engine.get_mii_mut().drain_trace();
        assert_eq!(1, records.len());
        assert_eq!(0xf800, records[0].pc);
    }

    #[test]
    fn terminate_leaves_the_loop() {
        let (mut engine, commands) = setup_engine();
        commands.push(Command::Terminate).ok().unwrap();
        assert!(!engine.tick());
        assert_eq!(State::Terminate, engine.get_state());
    }

    #[test]
    fn status_reports_over_the_channel() {
        let (mut engine, commands) = setup_engine();
        let (tx, rx) = mpsc::channel();
        commands.push(Command::Status(tx)).ok().unwrap();
        engine.tick();
        let status = rx.recv().unwrap();
        assert!(status.contains("state:"));
        assert!(status.contains("pc:"));
    }

    #[test]
    fn paste_reaches_the_keyboard_latch() {
        let (mut engine, commands) = setup_engine();
        commands.push(Command::Paste("A".to_string())).ok().unwrap();
        commands.push(Command::Run).ok().unwrap();
        engine.tick(); // drains commands, Init -> Running
        engine.tick(); // first frame delivers the character
        let switches = engine.get_mii().get_switches();
        assert_eq!(0xc1, switches.key());
    }
}
