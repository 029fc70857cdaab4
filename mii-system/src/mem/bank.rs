// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::rc::Rc;

// Design:
//   A bank is a named contiguous region with optional backing storage and
//   an ordered list of access callbacks, each covering a closed range of
//   256-byte pages. An access first runs every matching callback in
//   insertion order; if any of them report the access as consumed, the
//   default backing store is bypassed. Cards use callbacks to claim their
//   ROM pages and I/O windows without owning the bank.

/// Access hook: `(bank, addr, byte, is_write) -> consumed`. On reads the
/// callback stores the result through `byte`.
pub type AccessCallback = Rc<dyn Fn(&mut Bank, u16, &mut u8, bool) -> bool>;

struct AccessHook {
    page_first: u8,
    page_last: u8,
    callback: AccessCallback,
}

pub struct Bank {
    name: &'static str,
    base: u16,
    mem: Vec<u8>,
    read_only: bool,
    hooks: Vec<AccessHook>,
}

impl Bank {
    pub fn new(name: &'static str, base: u16, size: usize) -> Self {
        Self {
            name,
            base,
            mem: vec![0; size],
            read_only: false,
            hooks: Vec::new(),
        }
    }

    /// Unconsumed writes are dropped instead of hitting the backing store.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.mem.len()
    }

    pub fn contains(&self, address: u16) -> bool {
        address >= self.base && (address as usize) < self.base as usize + self.mem.len()
    }

    /// Overlapping ranges are permitted; hooks run in insertion order.
    pub fn install_access_callback(
        &mut self,
        page_first: u8,
        page_last: u8,
        callback: AccessCallback,
    ) {
        self.hooks.push(AccessHook {
            page_first,
            page_last,
            callback,
        });
    }

    pub fn access(&mut self, address: u16, byte: &mut u8, write: bool) {
        let page = (address >> 8) as u8;
        let hooks: Vec<AccessCallback> = self
            .hooks
            .iter()
            .filter(|hook| page >= hook.page_first && page <= hook.page_last)
            .map(|hook| hook.callback.clone())
            .collect();
        let mut consumed = false;
        for hook in hooks {
            if hook(self, address, byte, write) {
                consumed = true;
            }
        }
        if !consumed {
            let offset = address.wrapping_sub(self.base) as usize;
            if write {
                if !self.read_only {
                    self.mem[offset] = *byte;
                }
            } else {
                *byte = self.mem[offset];
            }
        }
    }

    /// Read the backing store directly, bypassing callbacks.
    #[inline]
    pub fn peek(&self, address: u16) -> u8 {
        self.mem[address.wrapping_sub(self.base) as usize]
    }

    /// Write the backing store directly, bypassing callbacks.
    #[inline]
    pub fn poke(&mut self, address: u16, value: u8) {
        self.mem[address.wrapping_sub(self.base) as usize] = value;
    }

    pub fn write_block(&mut self, address: u16, data: &[u8]) {
        let offset = address.wrapping_sub(self.base) as usize;
        self.mem[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn clear(&mut self) {
        for byte in self.mem.iter_mut() {
            *byte = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn write_then_read_round_trip() {
        let mut bank = Bank::new("main", 0x0000, 0x1000);
        let mut byte = 0xa5;
        bank.access(0x0123, &mut byte, true);
        let mut out = 0;
        bank.access(0x0123, &mut out, false);
        assert_eq!(0xa5, out);
    }

    #[test]
    fn consumed_access_bypasses_backing() {
        let mut bank = Bank::new("io", 0xc000, 0x100);
        bank.poke(0xc010, 0x42);
        bank.install_access_callback(
            0xc0,
            0xc0,
            Rc::new(|_bank, _addr, byte, write| {
                if !write {
                    *byte = 0x99;
                }
                true
            }),
        );
        let mut out = 0;
        bank.access(0xc010, &mut out, false);
        assert_eq!(0x99, out);
        let mut byte = 0x11;
        bank.access(0xc010, &mut byte, true);
        assert_eq!(0x42, bank.peek(0xc010));
    }

    #[test]
    fn overlapping_hooks_run_in_order() {
        let order = Rc::new(Cell::new(0u8));
        let mut bank = Bank::new("io", 0xc000, 0x100);
        let order_1 = order.clone();
        bank.install_access_callback(
            0xc0,
            0xc0,
            Rc::new(move |_, _, _, _| {
                order_1.set(order_1.get() * 10 + 1);
                false
            }),
        );
        let order_2 = order.clone();
        bank.install_access_callback(
            0xc0,
            0xc0,
            Rc::new(move |_, _, _, _| {
                order_2.set(order_2.get() * 10 + 2);
                false
            }),
        );
        let mut byte = 0;
        bank.access(0xc000, &mut byte, false);
        assert_eq!(12, order.get());
    }
}
