// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use bit_field::BitField;
use log::Level;

/// Aggregated interrupt line. Every interrupt source registers itself and
/// gets a private bit; the line is asserted while any bit is set.
pub struct IrqLine {
    kind: &'static str,
    signal: u32,
    sources: Vec<Option<String>>,
}

impl IrqLine {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            signal: 0,
            sources: Vec::new(),
        }
    }

    pub fn register(&mut self, name: &str) -> usize {
        for (index, slot) in self.sources.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(name.to_string());
                return index;
            }
        }
        self.sources.push(Some(name.to_string()));
        self.sources.len() - 1
    }

    pub fn unregister(&mut self, source: usize) {
        if let Some(slot) = self.sources.get_mut(source) {
            *slot = None;
        }
        self.signal.set_bit(source, false);
    }

    pub fn is_low(&self) -> bool {
        self.signal != 0
    }

    pub fn reset(&mut self) {
        self.signal = 0;
    }

    pub fn set_low(&mut self, source: usize, value: bool) {
        if log_enabled!(Level::Trace) {
            trace!(
                target: "cpu::int", "{}.{} {}",
                self.kind,
                self.sources
                    .get(source)
                    .and_then(|name| name.as_deref())
                    .unwrap_or("?"),
                if value { "set" } else { "cleared" }
            );
        }
        self.signal.set_bit(source, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_sources() {
        let mut line = IrqLine::new("irq");
        let a = line.register("timer");
        let b = line.register("serial");
        assert_ne!(a, b);
        line.set_low(a, true);
        line.set_low(b, true);
        line.set_low(a, false);
        assert!(line.is_low());
        line.set_low(b, false);
        assert!(!line.is_low());
    }

    #[test]
    fn recycles_slots() {
        let mut line = IrqLine::new("irq");
        let a = line.register("one");
        line.unregister(a);
        let b = line.register("two");
        assert_eq!(a, b);
    }
}
