// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

pub mod mockingboard;
pub mod ssc;
pub mod ssc_worker;

pub use self::mockingboard::Mockingboard;
pub use self::ssc::{Ssc, SscConfig, SscKind};
pub use self::ssc_worker::{CardState, SscShared, SscWorker};
