// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use core::cell::Cell;

/// Monotonic PHI0 cycle counter shared by the cpu and all peripherals.
pub struct Clock {
    counter: Cell<u64>,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            counter: Cell::new(0),
        }
    }

    #[inline]
    pub fn elapsed(&self, prev: u64) -> u64 {
        self.counter.get() - prev
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.counter.get()
    }

    pub fn reset(&self) {
        self.counter.set(0);
    }

    #[inline]
    pub fn tick(&self) {
        let result = self.counter.get().wrapping_add(1);
        self.counter.set(result);
    }

    #[inline]
    pub fn tick_delta(&self, delta: u64) {
        let result = self.counter.get().wrapping_add(delta);
        self.counter.set(result);
    }
}

pub const MAX_TIMERS: usize = 64;

pub type TimerId = u8;

/// Called when the timer expires with the number of cycles it is late by.
/// Returning 0 releases the slot, a positive value reschedules the timer
/// that many cycles after its previous deadline.
pub type TimerCallback = Box<dyn FnMut(u64) -> u64>;

struct TimerSlot {
    fire_at: u64,
    callback: TimerCallback,
    #[allow(unused)]
    name: String,
}

/// Cycle-scheduled callback registry. Slots are tracked in a 64-bit bitmap
/// and allocated lowest-clear-bit first. Simultaneous timers fire in
/// ascending slot order; callers must not assume any fairness beyond that.
pub struct Timers {
    map: u64,
    slots: Vec<Option<TimerSlot>>,
}

impl Timers {
    pub fn new() -> Self {
        Self {
            map: 0,
            slots: (0..MAX_TIMERS).map(|_| None).collect(),
        }
    }

    pub fn register(
        &mut self,
        name: &str,
        callback: TimerCallback,
        delay: u64,
        now: u64,
    ) -> Option<TimerId> {
        if self.map == !0u64 {
            warn!(target: "timer", "Unable to register timer {}", name);
            return None;
        }
        let index = (!self.map).trailing_zeros() as usize;
        self.map |= 1 << index;
        self.slots[index] = Some(TimerSlot {
            fire_at: now + delay,
            callback,
            name: name.to_string(),
        });
        Some(index as TimerId)
    }

    pub fn unregister(&mut self, id: TimerId) {
        let index = id as usize;
        if index < MAX_TIMERS {
            self.map &= !(1 << index);
            self.slots[index] = None;
        }
    }

    /// Remaining cycles until the timer fires, negative when overdue.
    pub fn get(&self, id: TimerId, now: u64) -> i64 {
        match self.slots.get(id as usize).and_then(|slot| slot.as_ref()) {
            Some(slot) => slot.fire_at as i64 - now as i64,
            None => 0,
        }
    }

    pub fn set(&mut self, id: TimerId, delay: u64, now: u64) {
        if let Some(slot) = self.slots.get_mut(id as usize).and_then(|slot| slot.as_mut()) {
            slot.fire_at = now + delay;
        }
    }

    pub fn active_count(&self) -> u32 {
        self.map.count_ones()
    }

    pub fn run(&mut self, now: u64) {
        let mut pending = self.map;
        while pending != 0 {
            let index = pending.trailing_zeros() as usize;
            pending &= pending - 1;
            let due = match self.slots[index] {
                Some(ref slot) => slot.fire_at <= now,
                None => false,
            };
            if !due {
                continue;
            }
            // The slot is parked while its callback runs; the bitmap keeps
            // the index reserved so a re-entrant register cannot claim it.
            let mut slot = self.slots[index].take().unwrap();
            let late = now - slot.fire_at;
            let delay = (slot.callback)(late);
            if delay == 0 {
                self.map &= !(1 << index);
            } else {
                slot.fire_at += delay;
                self.slots[index] = Some(slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn register_recycles_slot() {
        let mut timers = Timers::new();
        let id = timers
            .register("a", Box::new(|_| 0), 10, 0)
            .unwrap();
        assert_eq!(1, timers.active_count());
        timers.unregister(id);
        assert_eq!(0, timers.active_count());
        let id2 = timers
            .register("b", Box::new(|_| 0), 10, 0)
            .unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn bitmap_tracks_active_entries() {
        let mut timers = Timers::new();
        for i in 0..MAX_TIMERS {
            assert!(timers
                .register(&format!("t{}", i), Box::new(|_| 0), 1, 0)
                .is_some());
        }
        assert_eq!(MAX_TIMERS as u32, timers.active_count());
        assert!(timers.register("overflow", Box::new(|_| 0), 1, 0).is_none());
    }

    #[test]
    fn one_shot_releases_slot() {
        let mut timers = Timers::new();
        let fired = Rc::new(Cell::new(0u64));
        let fired_clone = fired.clone();
        timers
            .register(
                "one-shot",
                Box::new(move |late| {
                    fired_clone.set(fired_clone.get() + 1 + late);
                    0
                }),
                100,
                0,
            )
            .unwrap();
        timers.run(99);
        assert_eq!(0, fired.get());
        timers.run(105);
        assert_eq!(6, fired.get());
        assert_eq!(0, timers.active_count());
    }

    #[test]
    fn periodic_reschedules_from_deadline() {
        let mut timers = Timers::new();
        let count = Rc::new(Cell::new(0u32));
        let count_clone = count.clone();
        let id = timers
            .register(
                "periodic",
                Box::new(move |_| {
                    count_clone.set(count_clone.get() + 1);
                    100
                }),
                100,
                0,
            )
            .unwrap();
        timers.run(100);
        assert_eq!(1, count.get());
        assert_eq!(100, timers.get(id, 100));
        timers.run(250);
        assert_eq!(2, count.get());
        // deadline accumulates from fire_at, not from now
        assert_eq!(50, timers.get(id, 250));
    }
}
