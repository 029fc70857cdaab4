// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::cell::Cell;
use std::sync::Arc;

use mii_core::audio::{AudioSource, SourceState};

const SPEAKER_LEVEL: f32 = 0.20;
// stop pushing samples after half a second without a click
const IDLE_CYCLES: u64 = 512_000;

/// One-bit speaker driven by accesses to its soft switch. Samples are
/// synthesised lazily: each toggle (and the per frame flush) fills the
/// source ring with the level held since the previous fill.
pub struct Speaker {
    source: Arc<AudioSource>,
    level: Cell<f32>,
    last_cycle: Cell<u64>,
    last_toggle: Cell<u64>,
    cycle_err: Cell<f64>,
    cycles_per_sample: f64,
}

impl Speaker {
    pub fn new(cycles_per_sample: f64) -> Self {
        Self {
            source: AudioSource::new(),
            level: Cell::new(SPEAKER_LEVEL),
            last_cycle: Cell::new(0),
            last_toggle: Cell::new(0),
            cycle_err: Cell::new(0.0),
            cycles_per_sample,
        }
    }

    pub fn get_source(&self) -> Arc<AudioSource> {
        self.source.clone()
    }

    pub fn reset(&self, now: u64) {
        self.level.set(SPEAKER_LEVEL);
        self.last_cycle.set(now);
        self.last_toggle.set(now);
        self.cycle_err.set(0.0);
        self.source.set_state(SourceState::Idle);
    }

    pub fn toggle(&self, now: u64) {
        self.fill(now);
        self.level.set(-self.level.get());
        self.last_toggle.set(now);
    }

    /// Called once per frame to keep the ring topped up between clicks.
    pub fn flush(&self, now: u64) {
        if now.saturating_sub(self.last_toggle.get()) > IDLE_CYCLES {
            if self.source.get_state() == SourceState::Playing {
                self.source.set_state(SourceState::Stopping);
            }
            self.last_cycle.set(now);
            self.cycle_err.set(0.0);
            return;
        }
        self.fill(now);
    }

    fn fill(&self, now: u64) {
        let elapsed = now.saturating_sub(self.last_cycle.get());
        let mut acc = self.cycle_err.get() + elapsed as f64;
        let level = self.level.get();
        while acc >= self.cycles_per_sample {
            // interleaved stereo, same level both sides; drop whole
            // pairs when the ring is full
            if self.source.free_len() < 2 {
                acc %= self.cycles_per_sample;
                break;
            }
            self.source.push(level);
            self.source.push(level);
            acc -= self.cycles_per_sample;
        }
        self.cycle_err.set(acc);
        self.last_cycle.set(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mii_core::audio::AudioSink;

    #[test]
    fn toggle_produces_alternating_levels() {
        let speaker = Speaker::new(23.2);
        speaker.reset(0);
        // click at roughly 1 kHz for 10 ms
        let mut now = 0;
        for _ in 0..20 {
            now += 500;
            speaker.toggle(now);
        }
        let sink = AudioSink::new();
        let source = speaker.get_source();
        sink.add_source(&source);
        source.set_state(SourceState::Playing);
        let mut out = vec![0f32; 1024];
        sink.mix(&mut out);
        let positive = out.iter().filter(|s| **s > 0.0).count();
        let negative = out.iter().filter(|s| **s < 0.0).count();
        assert!(positive > 0);
        assert!(negative > 0);
    }

    #[test]
    fn goes_idle_without_clicks() {
        let speaker = Speaker::new(23.2);
        speaker.reset(0);
        speaker.toggle(100);
        let source = speaker.get_source();
        source.set_state(SourceState::Playing);
        speaker.flush(IDLE_CYCLES + 1000);
        assert_eq!(SourceState::Stopping, source.get_state());
    }
}
