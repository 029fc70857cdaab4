// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

// Design:
//   Plain text `key = value` pairs under `[section]` headers, order
//   preserving so a hand edited file round trips. Loaded from the working
//   directory first, then from the preferences directory; persisted on
//   clean exit.

const SETTINGS_FILE: &str = "mii.conf";

pub struct Settings {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl Settings {
    pub fn new() -> Self {
        Self {
            sections: Vec::new(),
        }
    }

    /// `$HOME/.local/share/mii`
    pub fn prefs_dir() -> PathBuf {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Path::new(&home).join(".local/share/mii")
    }

    pub fn load_default() -> Settings {
        let cwd = PathBuf::from(SETTINGS_FILE);
        let prefs = Self::prefs_dir().join(SETTINGS_FILE);
        for path in &[cwd, prefs] {
            if let Ok(settings) = Self::load(path) {
                info!(target: "settings", "Loaded {}", path.to_string_lossy());
                return settings;
            }
        }
        Settings::new()
    }

    pub fn load(path: &Path) -> Result<Settings, String> {
        let text =
            fs::read_to_string(path).map_err(|error| format!("{}: {}", path.display(), error))?;
        let mut settings = Settings::new();
        let mut section = String::new();
        for (line_num, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].to_string();
                continue;
            }
            match line.find('=') {
                Some(pos) => {
                    let key = line[..pos].trim();
                    let value = line[pos + 1..].trim();
                    settings.set(&section, key, value);
                }
                None => {
                    return Err(format!(
                        "{}: invalid line {}",
                        path.display(),
                        line_num + 1
                    ));
                }
            }
        }
        Ok(settings)
    }

    pub fn save_default(&self) {
        let dir = Self::prefs_dir();
        if let Err(error) = fs::create_dir_all(&dir) {
            warn!(target: "settings", "{}: {}", dir.display(), error);
            return;
        }
        let path = dir.join(SETTINGS_FILE);
        if let Err(error) = self.save(&path) {
            warn!(target: "settings", "{}", error);
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), String> {
        let mut file =
            fs::File::create(path).map_err(|error| format!("{}: {}", path.display(), error))?;
        for (section, entries) in &self.sections {
            if !section.is_empty() {
                writeln!(file, "[{}]", section)
                    .map_err(|error| format!("{}: {}", path.display(), error))?;
            }
            for (key, value) in entries {
                writeln!(file, "{} = {}", key, value)
                    .map_err(|error| format!("{}: {}", path.display(), error))?;
            }
        }
        Ok(())
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(name, _)| name == section)
            .and_then(|(_, entries)| {
                entries
                    .iter()
                    .find(|(entry_key, _)| entry_key == key)
                    .map(|(_, value)| value.as_str())
            })
    }

    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        let index = match self.sections.iter().position(|(name, _)| name == section) {
            Some(index) => index,
            None => {
                self.sections.push((section.to_string(), Vec::new()));
                self.sections.len() - 1
            }
        };
        let entries = &mut self.sections[index].1;
        match entries.iter_mut().find(|(entry_key, _)| entry_key == key) {
            Some((_, entry_value)) => *entry_value = value.to_string(),
            None => entries.push((key.to_string(), value.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut settings = Settings::new();
        settings.set("window", "fullscreen", "1");
        settings.set("window", "fullscreen", "0");
        settings.set("audio", "off", "1");
        assert_eq!(Some("0"), settings.get("window", "fullscreen"));
        assert_eq!(Some("1"), settings.get("audio", "off"));
        assert_eq!(None, settings.get("window", "missing"));
    }

    #[test]
    fn save_and_load_round_trip() {
        let mut settings = Settings::new();
        settings.set("window", "fullscreen", "1");
        settings.set("machine", "rom", "/tmp/iie.rom");
        let mut path = std::env::temp_dir();
        path.push("mii_settings_test.conf");
        settings.save(&path).unwrap();
        let loaded = Settings::load(&path).unwrap();
        assert_eq!(Some("1"), loaded.get("window", "fullscreen"));
        assert_eq!(Some("/tmp/iie.rom"), loaded.get("machine", "rom"));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn load_rejects_garbage() {
        let mut path = std::env::temp_dir();
        path.push("mii_settings_bad.conf");
        fs::write(&path, "[window]\nnot a key value line\n").unwrap();
        assert!(Settings::load(&path).is_err());
        fs::remove_file(&path).ok();
    }
}
