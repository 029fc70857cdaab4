// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use structopt::StructOpt;

use mii_system::card::ssc::{SscConfig, SscKind};
use mii_system::machine::CardConfig;
use mii_system::{Config, Mii, Model};

use crate::settings::Settings;

#[derive(Clone, Debug)]
pub struct SlotBinding {
    pub slot: u8,
    pub driver: String,
    pub options: Vec<(String, String)>,
}

#[derive(StructOpt, Debug)]
#[structopt(name = "mii_emu")]
pub struct Opt {
    /// disk images to mount
    #[structopt(parse(from_os_str))]
    pub images: Vec<PathBuf>,

    /// attach a card, N=DRIVER[,key=value...]
    #[structopt(long = "slot", parse(try_from_str = parse_slot_binding), number_of_values = 1)]
    pub slots: Vec<SlotBinding>,
    /// disable the audio driver entirely
    #[structopt(long = "audio-off")]
    pub audio_off: bool,
    /// start fullscreen
    #[structopt(long)]
    pub fullscreen: bool,
    /// start with the ui panels hidden
    #[structopt(long = "hide-ui")]
    pub hide_ui: bool,
    /// enable the instruction trace ring
    #[structopt(long)]
    pub trace: bool,
    /// record traced signals to a vcd file
    #[structopt(long, parse(from_os_str))]
    pub vcd: Option<PathBuf>,

    // -- Machine
    /// filename of the system ROM
    #[structopt(long, parse(from_os_str))]
    pub rom: Option<PathBuf>,
    /// emulation speed multiplier
    #[structopt(long, default_value = "1.0")]
    pub speed: f64,

    // -- Logging
    /// set log level
    #[structopt(long = "loglevel", default_value = "info")]
    pub log_level: String,
    /// set log level for a target
    #[structopt(long = "log", parse(try_from_str = parse_key_val), number_of_values = 1)]
    pub log_target_level: Vec<(String, String)>,
}

pub fn build_machine_config(opt: &Opt, settings: &Settings) -> Result<Config, String> {
    let mut config = Config::new(Model::iie());
    config.speed = opt.speed;
    config.trace = opt.trace;
    let rom_path = opt
        .rom
        .clone()
        .or_else(|| settings.get("machine", "rom").map(PathBuf::from));
    match rom_path {
        Some(path) => {
            config.roms.main = load_file(&path)
                .map_err(|_| format!("Invalid rom: {}", path.to_string_lossy()))?;
        }
        None => {
            warn!(target: "main", "No system ROM configured, memory boots empty");
        }
    }
    Ok(config)
}

/// Remember the window mode hints and audio state for the next start.
pub fn apply_settings(opt: &Opt, settings: &mut Settings) {
    if opt.fullscreen {
        settings.set("window", "fullscreen", "1");
    }
    if opt.hide_ui {
        settings.set("window", "hide_ui", "1");
    }
    settings.set("audio", "off", if opt.audio_off { "1" } else { "0" });
    if let Some(rom) = &opt.rom {
        settings.set("machine", "rom", &rom.to_string_lossy());
    }
}

/// Attach one `--slot` binding. Unknown or unsupported drivers are a
/// configuration error: reported, skipped, startup continues.
pub fn attach_slot(mii: &mut Mii, binding: &SlotBinding) -> Result<(), String> {
    match binding.driver.as_str() {
        "mockingboard" => mii.attach_card(binding.slot, CardConfig::Mockingboard),
        "ssc" => {
            let conf = build_ssc_config(&binding.options)?;
            mii.attach_card(binding.slot, CardConfig::Ssc(conf))
        }
        "disk2" | "smartport" | "rom1mb" => Err(format!(
            "slot {}: driver '{}' is not supported by this build",
            binding.slot, binding.driver
        )),
        other => Err(format!("slot {}: unknown driver '{}'", binding.slot, other)),
    }
}

fn build_ssc_config(options: &[(String, String)]) -> Result<SscConfig, String> {
    let mut conf = SscConfig::default();
    for (key, value) in options {
        match key.as_str() {
            "kind" => {
                conf.kind = match value.as_str() {
                    "device" => SscKind::Device,
                    "pty" => SscKind::Pty,
                    "socket" => SscKind::Socket,
                    other => return Err(format!("invalid ssc kind '{}'", other)),
                };
            }
            "device" => conf.device = value.clone(),
            "port" => {
                conf.socket_port = value
                    .parse()
                    .map_err(|_| format!("invalid ssc port '{}'", value))?;
                conf.kind = SscKind::Socket;
            }
            "baud" => {
                conf.baud = value
                    .parse()
                    .map_err(|_| format!("invalid baud '{}'", value))?;
            }
            other => return Err(format!("unknown ssc option '{}'", other)),
        }
    }
    Ok(conf)
}

fn load_file(path: &Path) -> Result<Vec<u8>, io::Error> {
    let mut data = Vec::new();
    let mut file = File::open(path)?;
    file.read_to_end(&mut data)?;
    Ok(data)
}

fn parse_slot_binding(s: &str) -> Result<SlotBinding, String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid slot binding, no `=` found in `{}`", s))?;
    let slot: u8 = s[..pos]
        .parse()
        .map_err(|_| format!("invalid slot number in `{}`", s))?;
    if slot < 1 || slot > 7 {
        return Err(format!("slot number out of range in `{}`", s));
    }
    let mut parts = s[pos + 1..].split(',');
    let driver = parts
        .next()
        .filter(|driver| !driver.is_empty())
        .ok_or_else(|| format!("missing driver name in `{}`", s))?
        .to_string();
    let mut options = Vec::new();
    for part in parts {
        let eq = part
            .find('=')
            .ok_or_else(|| format!("invalid option `{}` in `{}`", part, s))?;
        options.push((part[..eq].to_string(), part[eq + 1..].to_string()));
    }
    Ok(SlotBinding {
        slot,
        driver,
        options,
    })
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=value: no `=` found in `{}`", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_binding() {
        let binding = parse_slot_binding("4=mockingboard").unwrap();
        assert_eq!(4, binding.slot);
        assert_eq!("mockingboard", binding.driver);
        assert!(binding.options.is_empty());
    }

    #[test]
    fn parse_binding_with_options() {
        let binding = parse_slot_binding("2=ssc,kind=pty,baud=19200").unwrap();
        assert_eq!(2, binding.slot);
        assert_eq!("ssc", binding.driver);
        assert_eq!(
            vec![
                ("kind".to_string(), "pty".to_string()),
                ("baud".to_string(), "19200".to_string())
            ],
            binding.options
        );
        let conf = build_ssc_config(&binding.options).unwrap();
        assert_eq!(SscKind::Pty, conf.kind);
        assert_eq!(19200, conf.baud);
    }

    #[test]
    fn parse_rejects_bad_slot() {
        assert!(parse_slot_binding("0=ssc").is_err());
        assert!(parse_slot_binding("8=ssc").is_err());
        assert!(parse_slot_binding("ssc").is_err());
        assert!(parse_slot_binding("2=").is_err());
    }
}
