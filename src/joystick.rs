// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::ffi::CString;
use std::sync::Arc;
use std::thread;

use mii_system::device::AnalogInputs;

// Design:
//   Dedicated thread blocking on the kernel joystick device. Axis events
//   are remapped from the circular response of modern sticks to the
//   square field the original paddles produced and stored as single
//   aligned byte writes into the shared analog state, which the cpu
//   thread reads without further synchronisation.

const JS_DEVICE: &str = "/dev/input/js0";

const JS_EVENT_BUTTON: u8 = 0x01;
const JS_EVENT_AXIS: u8 = 0x02;

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct JsEvent {
    time: u32,
    value: i16,
    event_type: u8,
    number: u8,
}

pub fn start(analog: Arc<AnalogInputs>) -> Option<thread::JoinHandle<()>> {
    let path = CString::new(JS_DEVICE).ok()?;
    let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDONLY) };
    if fd < 0 {
        info!(target: "joystick", "No joystick found");
        return None;
    }
    info!(target: "joystick", "Joystick found at {}", JS_DEVICE);
    let handle = thread::Builder::new()
        .name("joystick".to_string())
        .spawn(move || {
            let mut axis = [0i16; 2];
            loop {
                let mut event = JsEvent::default();
                let res = unsafe {
                    libc::read(
                        fd,
                        &mut event as *mut JsEvent as *mut libc::c_void,
                        std::mem::size_of::<JsEvent>(),
                    )
                };
                if res != std::mem::size_of::<JsEvent>() as isize {
                    break;
                }
                match event.event_type & !0x80 {
                    JS_EVENT_BUTTON => {
                        if let 0..=2 = event.number {
                            analog.set_button(event.number as usize, event.value != 0);
                        }
                    }
                    JS_EVENT_AXIS => {
                        if let 0..=1 = event.number {
                            axis[event.number as usize] = event.value;
                            let remapped = remap_square(axis);
                            analog.set_axis(0, remapped[0]);
                            analog.set_axis(1, remapped[1]);
                        }
                    }
                    _ => {}
                }
            }
            unsafe {
                libc::close(fd);
            }
            info!(target: "joystick", "Joystick thread terminated");
        })
        .ok();
    handle
}

/// Remap the circular field of a modern stick to the square response the
/// original hardware had, per axis: v' = v + |other| * (v / 256). Games
/// that expect to reach the corners need this.
fn remap_square(axis: [i16; 2]) -> [u8; 2] {
    let mut projected = [
        f32::from(axis[0]) / 256.0,
        f32::from(axis[1]) / 256.0,
    ];
    let x = projected[0] / 256.0;
    let y = projected[1] / 256.0;
    projected[0] += projected[1].abs() * x;
    projected[1] += projected[0].abs() * y;
    let mut out = [0u8; 2];
    for (slot, value) in out.iter_mut().zip(projected.iter()) {
        let centred = (*value + 127.0).round();
        *slot = centred.max(0.0).min(255.0) as u8;
    }
    out
}
