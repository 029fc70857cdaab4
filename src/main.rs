// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

#[macro_use]
extern crate log;

mod audio;
mod cli;
mod execution;
mod joystick;
mod logger;
mod settings;

use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use structopt::StructOpt;

use mii_core::audio::AudioSink;
use mii_core::Fifo;
use mii_debug::{Command, Console, Vcd, COMMAND_QUEUE_SIZE};
use mii_system::device::AnalogInputs;
use mii_system::Mii;

use crate::cli::Opt;
use crate::execution::ExecutionEngine;
use crate::logger::Logger;
use crate::settings::Settings;

static NAME: &str = "mii_emu";

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_shutdown(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn main() {
    let opt = Opt::from_args();
    match run(&opt) {
        Ok(_) => process::exit(0),
        Err(err) => {
            eprintln!("Error: {}", err);
            process::exit(1)
        }
    };
}

fn run(opt: &Opt) -> Result<(), String> {
    let logger = Logger::build(opt.log_level.as_str(), &opt.log_target_level)?;
    Logger::enable(logger)?;
    info!("Starting {}", NAME);
    let mut settings = Settings::load_default();
    cli::apply_settings(opt, &mut settings);
    if !opt.images.is_empty() {
        eprintln!("disk images are not supported by this build, ignoring");
    }

    let audio_sink = AudioSink::new();
    audio_sink.set_muted(opt.audio_off);
    let _audio_driver = if opt.audio_off {
        info!(target: "main", "Audio disabled");
        None
    } else {
        match audio::CpalDriver::build(audio_sink.clone()) {
            Ok(driver) => Some(driver),
            Err(error) => {
                warn!(target: "main", "Audio unavailable: {}", error);
                None
            }
        }
    };

    let analog = Arc::new(AnalogInputs::new());
    let _joystick = joystick::start(analog.clone());

    // one command ring per producing thread
    let ui_commands = Arc::new(Fifo::<Command, COMMAND_QUEUE_SIZE>::new());
    let console_commands = Arc::new(Fifo::<Command, COMMAND_QUEUE_SIZE>::new());
    if let Ok(port) = env::var("MISH_TELNET_PORT") {
        match port.parse::<u16>() {
            Ok(port) => {
                let commands = console_commands.clone();
                thread::spawn(move || {
                    let console = Console::new(commands);
                    if let Err(error) = console.start(port) {
                        warn!(target: "main", "Debug console failed: {}", error);
                    }
                });
            }
            Err(_) => eprintln!("Invalid MISH_TELNET_PORT value: {}", port),
        }
    }

    // the machine is built by and owned by the cpu thread
    let config = cli::build_machine_config(opt, &settings)?;
    let slot_bindings = opt.slots.clone();
    let vcd_path = opt.vcd.clone();
    let cpu_sink = audio_sink.clone();
    let cpu_analog = analog;
    let cpu_queues = vec![ui_commands.clone(), console_commands];
    let cpu_thread = thread::Builder::new()
        .name("cpu".to_string())
        .spawn(move || -> Result<(), String> {
            let mut mii = Mii::new(config, cpu_sink, cpu_analog)?;
            for binding in &slot_bindings {
                // a bad slot binding is reported and skipped
                if let Err(error) = cli::attach_slot(&mut mii, binding) {
                    eprintln!("{}", error);
                }
            }
            mii.reset(true);
            let mut vcd = match vcd_path {
                Some(path) => {
                    let mut vcd = Vcd::new(
                        mii.get_signal_pool(),
                        mii.get_clock(),
                        &path.to_string_lossy(),
                        978,
                    );
                    let pool = mii.get_signal_pool();
                    let irq = pool.borrow().find("cpu.irq");
                    let vbl = pool.borrow().find("video.vbl");
                    if let Some(irq) = irq {
                        vcd.add_signal(irq, 1, "cpu.irq")?;
                    }
                    if let Some(vbl) = vbl {
                        vcd.add_signal(vbl, 1, "video.vbl")?;
                    }
                    vcd.start()?;
                    Some(vcd)
                }
                None => None,
            };
            let mut engine = ExecutionEngine::new(mii, cpu_queues);
            engine.run();
            if let Some(vcd) = vcd.as_mut() {
                vcd.stop();
            }
            Ok(())
        })
        .map_err(|error| format!("{}", error))?;

    unsafe {
        let handler = handle_shutdown as extern "C" fn(libc::c_int);
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
    while !SHUTDOWN.load(Ordering::SeqCst) && !cpu_thread.is_finished() {
        thread::sleep(Duration::from_millis(100));
    }
    if ui_commands.push(Command::Terminate).is_err() {
        warn!(target: "main", "Command queue full on shutdown");
    }
    match cpu_thread.join() {
        Ok(result) => result?,
        Err(_) => return Err("cpu thread panicked".to_string()),
    }
    settings.save_default();
    info!("Exiting {}", NAME);
    Ok(())
}
