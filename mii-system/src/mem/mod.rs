// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

mod bank;
mod switches;

pub use self::bank::{AccessCallback, Bank};
pub use self::switches::{install_switches, SwitchState};

use std::rc::Rc;

use mii_core::factory::Addressable;
use mii_core::Shared;

// Design:
//   Memory routes every cpu access to the bank the current switch state
//   selects: main/aux RAM with the 80STORE display overrides, the switch
//   page, internal or card ROM for $C100-$CFFF, and the language card
//   over $D000-$FFFF. Bank callbacks implement all I/O side effects; this
//   layer only picks banks and folds the language card addressing.

pub struct Memory {
    main: Shared<Bank>,
    aux: Shared<Bank>,
    rom: Shared<Bank>,
    card_rom: Shared<Bank>,
    sw: Shared<Bank>,
    switches: Rc<SwitchState>,
}

impl Memory {
    pub fn new(
        main: Shared<Bank>,
        aux: Shared<Bank>,
        rom: Shared<Bank>,
        card_rom: Shared<Bank>,
        sw: Shared<Bank>,
        switches: Rc<SwitchState>,
    ) -> Self {
        Self {
            main,
            aux,
            rom,
            card_rom,
            sw,
            switches,
        }
    }

    fn ram_bank(&self, address: u16, write: bool) -> &Shared<Bank> {
        if address < 0x0200 {
            return if self.switches.altzp.get() {
                &self.aux
            } else {
                &self.main
            };
        }
        if self.switches.store80.get() {
            let text_page = (0x0400..0x0800).contains(&address);
            let hires_page =
                self.switches.hires.get() && (0x2000..0x4000).contains(&address);
            if text_page || hires_page {
                return if self.switches.page2.get() {
                    &self.aux
                } else {
                    &self.main
                };
            }
        }
        let aux_selected = if write {
            self.switches.ramwrt.get()
        } else {
            self.switches.ramrd.get()
        };
        if aux_selected {
            &self.aux
        } else {
            &self.main
        }
    }

    /// Fold the language card's $D000 bank 2 window into the RAM address
    /// space; bank 2 shadows $C000-$CFFF of the selected RAM bank.
    fn lc_address(&self, address: u16) -> u16 {
        if self.switches.lc_bank2.get() && address < 0xe000 {
            address - 0x1000
        } else {
            address
        }
    }

    fn lc_bank(&self) -> &Shared<Bank> {
        if self.switches.altzp.get() {
            &self.aux
        } else {
            &self.main
        }
    }

    fn access(&mut self, address: u16, byte: &mut u8, write: bool) {
        match address {
            0x0000..=0xbfff => {
                let bank = self.ram_bank(address, write);
                bank.borrow_mut().access(address, byte, write);
            }
            0xc000..=0xc0ff => {
                self.sw.borrow_mut().access(address, byte, write);
            }
            0xc100..=0xcfff => {
                let internal = self.switches.intcxrom.get()
                    || (!self.switches.slotc3rom.get() && address & 0xff00 == 0xc300);
                if internal && address != 0xcfff {
                    self.rom.borrow_mut().access(address, byte, write);
                } else {
                    self.card_rom.borrow_mut().access(address, byte, write);
                }
            }
            0xd000..=0xffff => {
                if write {
                    if self.switches.lc_write.get() {
                        let lc_address = self.lc_address(address);
                        self.lc_bank().borrow_mut().access(lc_address, byte, write);
                    }
                    // ROM writes are dropped
                } else if self.switches.lc_read.get() {
                    let lc_address = self.lc_address(address);
                    self.lc_bank().borrow_mut().access(lc_address, byte, write);
                } else {
                    self.rom.borrow_mut().access(address, byte, write);
                }
            }
        }
    }
}

impl Addressable for Memory {
    fn read(&mut self, address: u16) -> u8 {
        let mut byte = 0;
        self.access(address, &mut byte, false);
        byte
    }

    fn write(&mut self, address: u16, value: u8) {
        let mut byte = value;
        self.access(address, &mut byte, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mii_core::new_shared;

    fn setup_memory() -> Memory {
        let main = new_shared(Bank::new("main", 0x0000, 0x10000));
        let aux = new_shared(Bank::new("aux", 0x0000, 0x10000));
        let rom = new_shared(Bank::new("rom", 0xc000, 0x4000));
        let card_rom = new_shared(Bank::new("card rom", 0xc100, 0x0f00));
        let sw = new_shared(Bank::new("sw", 0xc000, 0x100));
        rom.borrow_mut().set_read_only(true);
        card_rom.borrow_mut().set_read_only(true);
        let switches = Rc::new(SwitchState::new());
        Memory::new(main, aux, rom, card_rom, sw, switches)
    }

    #[test]
    fn ram_round_trip() {
        let mut mem = setup_memory();
        mem.write(0x1234, 0x77);
        assert_eq!(0x77, mem.read(0x1234));
    }

    #[test]
    fn aux_ram_selected_by_switches() {
        let mut mem = setup_memory();
        mem.write(0x2000, 0x11);
        mem.switches.ramwrt.set(true);
        mem.write(0x2000, 0x22);
        assert_eq!(0x11, mem.read(0x2000));
        mem.switches.ramrd.set(true);
        assert_eq!(0x22, mem.read(0x2000));
    }

    #[test]
    fn altzp_switches_zero_page() {
        let mut mem = setup_memory();
        mem.write(0x0080, 0x11);
        mem.switches.altzp.set(true);
        assert_eq!(0x00, mem.read(0x0080));
        mem.write(0x0080, 0x22);
        mem.switches.altzp.set(false);
        assert_eq!(0x11, mem.read(0x0080));
    }

    #[test]
    fn store80_overrides_text_page() {
        let mut mem = setup_memory();
        mem.switches.store80.set(true);
        mem.switches.page2.set(true);
        mem.write(0x0400, 0x42);
        assert_eq!(0x42, mem.aux.borrow().peek(0x0400));
        assert_eq!(0x00, mem.main.borrow().peek(0x0400));
    }

    #[test]
    fn rom_read_and_write_protect() {
        let mut mem = setup_memory();
        mem.rom.borrow_mut().poke(0xf800, 0x60);
        assert_eq!(0x60, mem.read(0xf800));
        mem.write(0xf800, 0x00);
        assert_eq!(0x60, mem.read(0xf800));
    }

    #[test]
    fn language_card_banking() {
        let mut mem = setup_memory();
        mem.rom.borrow_mut().poke(0xd000, 0xaa);
        // enable read+write bank 1
        mem.switches.lc_read.set(true);
        mem.switches.lc_write.set(true);
        mem.write(0xd000, 0x55);
        assert_eq!(0x55, mem.read(0xd000));
        // bank 2 shadows a different 4K
        mem.switches.lc_bank2.set(true);
        mem.write(0xd000, 0x66);
        assert_eq!(0x66, mem.read(0xd000));
        assert_eq!(0x66, mem.main.borrow().peek(0xc000));
        mem.switches.lc_bank2.set(false);
        assert_eq!(0x55, mem.read(0xd000));
        // back to rom
        mem.switches.lc_read.set(false);
        assert_eq!(0xaa, mem.read(0xd000));
    }

    #[test]
    fn intcxrom_selects_internal_rom() {
        let mut mem = setup_memory();
        mem.rom.borrow_mut().poke(0xc500, 0x12);
        mem.card_rom.borrow_mut().poke(0xc500, 0x34);
        assert_eq!(0x34, mem.read(0xc500));
        mem.switches.intcxrom.set(true);
        assert_eq!(0x12, mem.read(0xc500));
    }

    #[test]
    fn slotc3rom_defaults_to_internal() {
        let mut mem = setup_memory();
        mem.rom.borrow_mut().poke(0xc300, 0x12);
        mem.card_rom.borrow_mut().poke(0xc300, 0x34);
        assert_eq!(0x12, mem.read(0xc300));
        mem.switches.slotc3rom.set(true);
        assert_eq!(0x34, mem.read(0xc300));
    }
}
