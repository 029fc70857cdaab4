// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::sync::atomic::{AtomicU8, Ordering};

/// Paddle and button state shared with the joystick thread. Each entry is
/// a single aligned byte store so the cpu thread's reads are tear free
/// without further synchronisation.
pub struct AnalogInputs {
    axes: [AtomicU8; 4],
    buttons: [AtomicU8; 3],
}

impl AnalogInputs {
    pub fn new() -> Self {
        Self {
            axes: [
                AtomicU8::new(127),
                AtomicU8::new(127),
                AtomicU8::new(127),
                AtomicU8::new(127),
            ],
            buttons: [AtomicU8::new(0), AtomicU8::new(0), AtomicU8::new(0)],
        }
    }

    pub fn set_axis(&self, index: usize, value: u8) {
        if let Some(axis) = self.axes.get(index) {
            axis.store(value, Ordering::Relaxed);
        }
    }

    pub fn get_axis(&self, index: usize) -> u8 {
        self.axes
            .get(index)
            .map(|axis| axis.load(Ordering::Relaxed))
            .unwrap_or(127)
    }

    pub fn set_button(&self, index: usize, pressed: bool) {
        if let Some(button) = self.buttons.get(index) {
            button.store(if pressed { 0x80 } else { 0x00 }, Ordering::Relaxed);
        }
    }

    pub fn get_button(&self, index: usize) -> u8 {
        self.buttons
            .get(index)
            .map(|button| button.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}
