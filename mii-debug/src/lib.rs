// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

#[macro_use]
extern crate log;

mod console;
mod disassembler;
mod vcd;

pub use crate::console::{Command, Console, COMMAND_QUEUE_SIZE};
pub use crate::disassembler::Disassembler;
pub use crate::vcd::Vcd;
