// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::collections::HashMap;
use std::str::FromStr;

use log::{Level, LevelFilter, Metadata, Record};

pub struct Logger {
    level: Level,
    targets: HashMap<String, Level>,
}

impl Logger {
    pub fn build(level: &str, target_levels: &[(String, String)]) -> Result<Logger, String> {
        let level =
            Level::from_str(level).map_err(|_| format!("invalid log level {}", level))?;
        let mut logger = Logger {
            level,
            targets: HashMap::new(),
        };
        for (target, target_level) in target_levels {
            logger.add_target(target.clone(), target_level)?;
        }
        Ok(logger)
    }

    pub fn enable(logger: Logger) -> Result<(), String> {
        let filter = logger
            .targets
            .values()
            .fold(logger.level, |acc, level| acc.max(*level))
            .to_level_filter();
        log::set_boxed_logger(Box::new(logger))
            .map(|_| log::set_max_level(filter))
            .map_err(|_| "cannot initialize logging".to_string())
    }

    pub fn add_target(&mut self, target: String, level: &str) -> Result<(), String> {
        let level = Level::from_str(level)
            .map_err(|_| format!("invalid log level {} for target {}", level, target))?;
        self.targets.insert(target, level);
        Ok(())
    }

    #[allow(unused)]
    pub fn get_level(&self) -> LevelFilter {
        self.level.to_level_filter()
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        // target overrides may be scoped, "via" covers "via::reg"
        let target = metadata.target().split("::").next().unwrap_or_default();
        if let Some(target_level) = self.targets.get(target) {
            metadata.level() <= *target_level
        } else {
            metadata.level() <= self.level
        }
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!(
                "{} [{}] - {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_rejects_bad_level() {
        assert!(Logger::build("noisy", &[]).is_err());
    }

    #[test]
    fn target_overrides_scope() {
        let logger = Logger::build(
            "info",
            &[("via".to_string(), "trace".to_string())],
        )
        .unwrap();
        let metadata = Metadata::builder()
            .level(Level::Trace)
            .target("via::reg")
            .build();
        assert!(log::Log::enabled(&logger, &metadata));
        let metadata = Metadata::builder()
            .level(Level::Trace)
            .target("cpu")
            .build();
        assert!(!log::Log::enabled(&logger, &metadata));
    }
}
