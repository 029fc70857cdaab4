// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::util::Fifo;

pub const AUDIO_FREQ: u32 = 44_100;
pub const AUDIO_CHANNELS: usize = 2;
pub const AUDIO_FRAME_SIZE: usize = 4096;

pub const VOLUME_MAX: f32 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SourceState {
    Idle = 0,
    Starting = 1,
    Playing = 2,
    Stopping = 3,
}

impl SourceState {
    fn from_u8(value: u8) -> SourceState {
        match value {
            1 => SourceState::Starting,
            2 => SourceState::Playing,
            3 => SourceState::Stopping,
            _ => SourceState::Idle,
        }
    }
}

/// A producer of interleaved stereo f32 samples. The owning card fills the
/// ring from the cpu thread; the sink drains it from the audio callback.
pub struct AudioSource {
    fifo: Fifo<f32, AUDIO_FRAME_SIZE>,
    state: AtomicU8,
    // multiplier derived from the 0..=10 volume, stored as f32 bits
    multiplier: AtomicU32,
    underruns: AtomicUsize,
}

impl AudioSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fifo: Fifo::new(),
            state: AtomicU8::new(SourceState::Idle as u8),
            multiplier: AtomicU32::new(1.0f32.to_bits()),
            underruns: AtomicUsize::new(0),
        })
    }

    pub fn get_state(&self) -> SourceState {
        SourceState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn set_state(&self, state: SourceState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Volume in 0..=10, attenuated into a sample multiplier.
    pub fn set_volume(&self, volume: f32) {
        let volume = volume.max(0.0).min(VOLUME_MAX);
        self.multiplier
            .store((volume / VOLUME_MAX).to_bits(), Ordering::Relaxed);
    }

    pub fn get_multiplier(&self) -> f32 {
        f32::from_bits(self.multiplier.load(Ordering::Relaxed))
    }

    pub fn free_len(&self) -> usize {
        self.fifo.free_len()
    }

    pub fn len(&self) -> usize {
        self.fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    /// Drain samples directly, for drivers that do their own mixing.
    pub fn read(&self, out: &mut [f32]) -> usize {
        self.fifo.bulk_read(out)
    }

    #[inline]
    pub fn push(&self, sample: f32) -> bool {
        if self.get_state() == SourceState::Idle {
            self.set_state(SourceState::Starting);
        }
        self.fifo.push(sample).is_ok()
    }

    pub fn write(&self, samples: &[f32]) -> usize {
        if self.get_state() == SourceState::Idle {
            self.set_state(SourceState::Starting);
        }
        self.fifo.bulk_write(samples)
    }

    pub fn underruns(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }
}

/// Pulls samples from every attached source, mixes them and hands the
/// result to the host audio driver's data callback.
pub struct AudioSink {
    sources: Mutex<Vec<Arc<AudioSource>>>,
    muted: AtomicBool,
}

impl AudioSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sources: Mutex::new(Vec::new()),
            muted: AtomicBool::new(false),
        })
    }

    pub fn add_source(&self, source: &Arc<AudioSource>) {
        let mut sources = self.sources.lock().unwrap();
        if !sources.iter().any(|s| Arc::ptr_eq(s, source)) {
            sources.push(source.clone());
        }
    }

    pub fn remove_source(&self, source: &Arc<AudioSource>) {
        let mut sources = self.sources.lock().unwrap();
        sources.retain(|s| !Arc::ptr_eq(s, source));
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        let sources = self.sources.lock().unwrap();
        for source in sources.iter() {
            while source.fifo.pop().is_some() {}
            source.set_state(SourceState::Idle);
        }
    }

    /// Mix one block of interleaved stereo samples into `out`.
    pub fn mix(&self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = 0.0;
        }
        if self.is_muted() {
            return;
        }
        let sources = self.sources.lock().unwrap();
        let mut chunk = [0f32; 512];
        for source in sources.iter() {
            match source.get_state() {
                SourceState::Idle => continue,
                SourceState::Starting => {
                    // wait for half a frame of backlog before playing so a
                    // slow producer does not underrun immediately
                    if source.fifo.len() < out.len() {
                        continue;
                    }
                    source.set_state(SourceState::Playing);
                }
                _ => {}
            }
            let mut offset = 0;
            while offset < out.len() {
                let want = usize::min(chunk.len(), out.len() - offset);
                let count = source.fifo.bulk_read(&mut chunk[..want]);
                if count == 0 {
                    break;
                }
                let multiplier = source.get_multiplier();
                for i in 0..count {
                    out[offset + i] += chunk[i] * multiplier;
                }
                offset += count;
            }
            if offset < out.len() {
                match source.get_state() {
                    SourceState::Stopping => source.set_state(SourceState::Idle),
                    SourceState::Playing => {
                        source.underruns.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            target: "audio",
                            "source underrun {}/{}",
                            offset,
                            out.len()
                        );
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Host audio output. The implementation owns the device stream and calls
/// `AudioSink::mix` from its data callback.
pub trait AudioDriver {
    fn start(&mut self);
    fn stop(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_applies_volume() {
        let sink = AudioSink::new();
        let source = AudioSource::new();
        sink.add_source(&source);
        source.set_volume(5.0);
        source.set_state(SourceState::Playing);
        source.write(&[1.0, 1.0, 1.0, 1.0]);
        let mut out = [0f32; 4];
        sink.mix(&mut out);
        for sample in out.iter() {
            assert!((sample - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn mix_is_additive() {
        let sink = AudioSink::new();
        let a = AudioSource::new();
        let b = AudioSource::new();
        sink.add_source(&a);
        sink.add_source(&b);
        a.set_state(SourceState::Playing);
        b.set_state(SourceState::Playing);
        a.write(&[0.25, 0.25]);
        b.write(&[0.5, 0.5]);
        let mut out = [0f32; 2];
        sink.mix(&mut out);
        assert!((out[0] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn muted_outputs_silence() {
        let sink = AudioSink::new();
        let source = AudioSource::new();
        sink.add_source(&source);
        source.set_state(SourceState::Playing);
        source.write(&[1.0, 1.0]);
        sink.set_muted(true);
        let mut out = [1f32; 2];
        sink.mix(&mut out);
        assert_eq!([0.0, 0.0], out);
    }

    #[test]
    fn stopping_source_goes_idle_when_drained() {
        let sink = AudioSink::new();
        let source = AudioSource::new();
        sink.add_source(&source);
        source.set_state(SourceState::Playing);
        source.write(&[0.5, 0.5]);
        source.set_state(SourceState::Stopping);
        let mut out = [0f32; 4];
        sink.mix(&mut out);
        assert_eq!(SourceState::Idle, source.get_state());
    }
}
