// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::cell::Cell;
use std::rc::Rc;

use mii_core::{Clock, Shared};

use crate::card::ssc::SscConfig;
use crate::mem::Bank;
use crate::video::Video;

// Design:
//   Slots 1-7 each hold at most one card behind a small trait object; the
//   framework owns the routing only. The $C0n0-$C0nF I/O window arrives
//   through the switch bank callback installed here, the $Cn00-$CnFF ROM
//   pages and the shared $C800-$CFFF expansion window live in the card
//   ROM bank, where cards install their own callbacks. Reading or writing
//   $CFFF releases the shared window by clearing every slot's aux ROM
//   flag before anything else sees the access.

pub const SLOT_COUNT: usize = 7;

/// Out of band card control, the emulator side equivalent of flipping
/// switches on the physical card.
#[derive(Clone, Debug)]
pub enum CardCommand {
    SscSetConf(SscConfig),
}

pub trait Card {
    fn name(&self) -> &'static str;
    fn reset(&mut self);
    /// Release host side resources ahead of machine teardown.
    fn dispose(&mut self) {}
    /// Access to the card's $C0n0-$C0nF I/O window. Returns the byte
    /// driven onto the bus for reads.
    fn access(&mut self, address: u16, byte: u8, write: bool) -> u8;
    fn command(&mut self, command: &CardCommand) -> Result<(), String> {
        let _ = command;
        Err(format!("{}: unsupported command", self.name()))
    }
    /// Human readable card state for the debug console.
    fn status(&self) -> String {
        String::new()
    }
}

pub struct Slot {
    pub aux_rom_selected: Rc<Cell<bool>>,
    card: Option<Shared<dyn Card>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            aux_rom_selected: Rc::new(Cell::new(false)),
            card: None,
        }
    }
}

pub struct Slots {
    slots: Vec<Slot>,
}

impl Slots {
    pub fn new() -> Self {
        Self {
            slots: (0..SLOT_COUNT).map(|_| Slot::new()).collect(),
        }
    }

    pub fn attach(&mut self, slot_id: u8, card: Shared<dyn Card>) -> Result<(), String> {
        let slot = self.slot_mut(slot_id)?;
        if slot.card.is_some() {
            return Err(format!("slot {} is already occupied", slot_id));
        }
        slot.card = Some(card);
        Ok(())
    }

    pub fn detach(&mut self, slot_id: u8) -> Result<(), String> {
        let slot = self.slot_mut(slot_id)?;
        slot.card = None;
        slot.aux_rom_selected.set(false);
        Ok(())
    }

    pub fn card(&self, slot_id: u8) -> Option<Shared<dyn Card>> {
        self.slots
            .get(slot_id.wrapping_sub(1) as usize)
            .and_then(|slot| slot.card.clone())
    }

    pub fn aux_rom_flag(&self, slot_id: u8) -> Option<Rc<Cell<bool>>> {
        self.slots
            .get(slot_id.wrapping_sub(1) as usize)
            .map(|slot| slot.aux_rom_selected.clone())
    }

    pub fn clear_aux_rom(&self) {
        for slot in &self.slots {
            slot.aux_rom_selected.set(false);
        }
    }

    pub fn reset(&self) {
        self.clear_aux_rom();
        for slot in &self.slots {
            if let Some(card) = &slot.card {
                card.borrow_mut().reset();
            }
        }
    }

    pub fn occupied(&self) -> impl Iterator<Item = (u8, Shared<dyn Card>)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.card
                .clone()
                .map(|card| (index as u8 + 1, card))
        })
    }

    fn slot_mut(&mut self, slot_id: u8) -> Result<&mut Slot, String> {
        if slot_id < 1 || slot_id > SLOT_COUNT as u8 {
            return Err(format!("invalid slot {}", slot_id));
        }
        Ok(&mut self.slots[slot_id as usize - 1])
    }
}

/// Route the $C090-$C0FF I/O windows to the attached cards. Must be
/// installed after the soft switch callback so the switch page keeps
/// first claim on $C000-$C08F.
pub fn install_io_windows(
    sw: &Shared<Bank>,
    slots: &Shared<Slots>,
    video: &Rc<Video>,
    clock: &Rc<Clock>,
) {
    let slots = slots.clone();
    let video = video.clone();
    let clock = clock.clone();
    sw.borrow_mut().install_access_callback(
        0xc0,
        0xc0,
        Rc::new(move |_bank, address, byte, write| {
            if address < 0xc090 {
                return false;
            }
            let slot_id = ((address >> 4) & 0x0f) as u8 - 8;
            let card = slots.borrow().card(slot_id);
            match card {
                Some(card) => {
                    let result = card.borrow_mut().access(address, *byte, write);
                    if !write {
                        *byte = result;
                    }
                }
                None => {
                    if !write {
                        *byte = video.vapor(clock.get());
                    }
                }
            }
            true
        }),
    );
}

/// Arbitrate the shared expansion ROM window: any access to $CFFF gives
/// the window back before other callbacks see the access.
pub fn install_expansion_window(
    card_rom: &Shared<Bank>,
    slots: &Shared<Slots>,
    video: &Rc<Video>,
    clock: &Rc<Clock>,
) {
    let slots = slots.clone();
    let video = video.clone();
    let clock = clock.clone();
    card_rom.borrow_mut().install_access_callback(
        0xcf,
        0xcf,
        Rc::new(move |_bank, address, byte, write| {
            if address != 0xcfff {
                return false;
            }
            slots.borrow().clear_aux_rom();
            if !write {
                *byte = video.vapor(clock.get());
            }
            true
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use mii_core::new_shared;

    struct NullCard;

    impl Card for NullCard {
        fn name(&self) -> &'static str {
            "null"
        }

        fn reset(&mut self) {}

        fn access(&mut self, _address: u16, _byte: u8, _write: bool) -> u8 {
            0x42
        }
    }

    #[test]
    fn attach_rejects_occupied_slot() {
        let mut slots = Slots::new();
        slots.attach(4, new_shared(NullCard)).unwrap();
        assert!(slots.attach(4, new_shared(NullCard)).is_err());
        assert!(slots.attach(0, new_shared(NullCard)).is_err());
        assert!(slots.attach(8, new_shared(NullCard)).is_err());
    }

    #[test]
    fn clear_aux_rom_covers_all_slots() {
        let mut slots = Slots::new();
        slots.attach(1, new_shared(NullCard)).unwrap();
        slots.attach(2, new_shared(NullCard)).unwrap();
        slots.aux_rom_flag(1).unwrap().set(true);
        slots.aux_rom_flag(2).unwrap().set(true);
        slots.clear_aux_rom();
        assert!(!slots.aux_rom_flag(1).unwrap().get());
        assert!(!slots.aux_rom_flag(2).unwrap().get());
    }
}
