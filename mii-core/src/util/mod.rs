// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

mod fifo;
mod irq_line;
mod shared;

pub use self::fifo::Fifo;
pub use self::irq_line::IrqLine;
pub use self::shared::{new_shared, new_shared_cell, Shared, SharedCell};
