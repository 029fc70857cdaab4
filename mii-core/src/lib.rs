// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

#[macro_use]
extern crate log;

pub mod audio;
pub mod clock;
pub mod factory;
pub mod signal;
pub mod util;

pub use crate::clock::{Clock, TimerCallback, TimerId, Timers};
pub use crate::signal::{SignalId, SignalNotify, SignalPool};
pub use crate::util::{new_shared, new_shared_cell, Fifo, IrqLine, Shared, SharedCell};
