// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

// Design:
//   Named 32-bit signals with fan-out hooks, used for tracing and wiring
//   loosely coupled components together. A hook is either a notify closure
//   or a chain to another signal; raising a signal runs its hooks depth
//   first. The stored value is updated after the hooks so a notify can
//   compare the value it is handed against the previous one. Signals live
//   in a pool slab and are addressed by handle, which keeps enumeration
//   for trace sinks trivial and avoids intrusive lists.

pub mod flags {
    /// Invert the value on raise.
    pub const NOT: u8 = 1;
    /// Suppress hooks when the raised value equals the stored one.
    pub const FILTERED: u8 = 1 << 1;
    /// The signal has never been raised.
    pub const INIT: u8 = 1 << 3;
    /// The wire is floating.
    pub const FLOATING: u8 = 1 << 4;
}

pub type SignalId = usize;

/// Called with the post-NOT value of the raise and the signal's flags as
/// they stand during the raise. A notify must not re-enter the pool it is
/// registered in; chain signals exist for that.
pub type SignalNotify = Box<dyn FnMut(u32, u8)>;

enum HookKind {
    // parked (None) while its notify is being called
    Notify(Option<SignalNotify>),
    Chain(SignalId),
}

struct Hook {
    busy: bool,
    kind: HookKind,
}

struct Signal {
    name: String,
    tag: u32,
    value: u32,
    flags: u8,
    hooks: Vec<Hook>,
}

pub struct SignalPool {
    signals: Vec<Option<Signal>>,
}

impl SignalPool {
    pub fn new() -> Self {
        Self {
            signals: Vec::new(),
        }
    }

    pub fn alloc(&mut self, tag: u32, name: &str) -> SignalId {
        let signal = Signal {
            name: name.to_string(),
            tag,
            value: 0,
            flags: flags::INIT,
            hooks: Vec::new(),
        };
        for (id, slot) in self.signals.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(signal);
                return id;
            }
        }
        self.signals.push(Some(signal));
        self.signals.len() - 1
    }

    /// Allocate a run of signals tagged `base..base + names.len()`.
    pub fn alloc_many(&mut self, base: u32, names: &[&str]) -> Vec<SignalId> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| self.alloc(base + i as u32, name))
            .collect()
    }

    /// Detach the signal from the pool, dropping all of its hooks.
    pub fn free(&mut self, id: SignalId) {
        if let Some(slot) = self.signals.get_mut(id) {
            *slot = None;
        }
        // drop chains pointing at the freed signal
        for slot in self.signals.iter_mut() {
            if let Some(signal) = slot {
                signal
                    .hooks
                    .retain(|hook| !matches!(hook.kind, HookKind::Chain(dst) if dst == id));
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<SignalId> {
        self.signals.iter().position(|slot| match slot {
            Some(signal) => signal.name == name,
            None => false,
        })
    }

    pub fn ids(&self) -> impl Iterator<Item = SignalId> + '_ {
        self.signals
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|_| id))
    }

    pub fn name(&self, id: SignalId) -> Option<&str> {
        self.signal(id).map(|signal| signal.name.as_str())
    }

    pub fn tag(&self, id: SignalId) -> Option<u32> {
        self.signal(id).map(|signal| signal.tag)
    }

    pub fn value(&self, id: SignalId) -> Option<u32> {
        self.signal(id).map(|signal| signal.value)
    }

    pub fn get_flags(&self, id: SignalId) -> u8 {
        self.signal(id).map(|signal| signal.flags).unwrap_or(0)
    }

    pub fn set_flags(&mut self, id: SignalId, flags: u8) {
        if let Some(signal) = self.signal_mut(id) {
            signal.flags = flags;
        }
    }

    /// Connect `src` to `dst` so that raising `src` raises `dst` with the
    /// same value. Duplicate connections are rejected.
    pub fn connect(&mut self, src: SignalId, dst: SignalId) {
        if src == dst || self.signal(dst).is_none() {
            warn!(target: "signal", "Invalid connection {} -> {}", src, dst);
            return;
        }
        if let Some(signal) = self.signal_mut(src) {
            let exists = signal
                .hooks
                .iter()
                .any(|hook| matches!(hook.kind, HookKind::Chain(id) if id == dst));
            if !exists {
                signal.hooks.push(Hook {
                    busy: false,
                    kind: HookKind::Chain(dst),
                });
            }
        }
    }

    pub fn disconnect(&mut self, src: SignalId, dst: SignalId) {
        if let Some(signal) = self.signal_mut(src) {
            signal
                .hooks
                .retain(|hook| !matches!(hook.kind, HookKind::Chain(id) if id == dst));
        }
    }

    pub fn register_notify(&mut self, id: SignalId, notify: SignalNotify) {
        if let Some(signal) = self.signal_mut(id) {
            signal.hooks.push(Hook {
                busy: false,
                kind: HookKind::Notify(Some(notify)),
            });
        }
    }

    pub fn raise(&mut self, id: SignalId, value: u32) {
        let floating = self.get_flags(id) & flags::FLOATING != 0;
        self.raise_float(id, value, floating);
    }

    pub fn raise_float(&mut self, id: SignalId, value: u32, floating: bool) {
        let output = {
            let signal = match self.signal_mut(id) {
                Some(signal) => signal,
                None => return,
            };
            let output = if signal.flags & flags::NOT != 0 {
                (value == 0) as u32
            } else {
                value
            };
            // an equal value still propagates on the very first raise
            if signal.value == output
                && signal.flags & flags::FILTERED != 0
                && signal.flags & flags::INIT == 0
            {
                return;
            }
            signal.flags &= !(flags::INIT | flags::FLOATING);
            if floating {
                signal.flags |= flags::FLOATING;
            }
            output
        };
        let flags_now = self.get_flags(id);
        enum Action {
            CallNotify(SignalNotify),
            RaiseChain(SignalId),
            Skip,
            Done,
        }
        let mut index = 0;
        loop {
            let action = match self.signal_mut(id) {
                Some(signal) => {
                    if index >= signal.hooks.len() {
                        Action::Done
                    } else {
                        let hook = &mut signal.hooks[index];
                        if hook.busy {
                            Action::Skip
                        } else {
                            hook.busy = true;
                            match hook.kind {
                                HookKind::Notify(ref mut slot) => match slot.take() {
                                    Some(notify) => Action::CallNotify(notify),
                                    None => Action::Skip,
                                },
                                HookKind::Chain(dst) => Action::RaiseChain(dst),
                            }
                        }
                    }
                }
                None => Action::Done,
            };
            match action {
                Action::Done => break,
                Action::Skip => index += 1,
                Action::CallNotify(mut notify) => {
                    notify(output, flags_now);
                    if let Some(signal) = self.signal_mut(id) {
                        if let Some(hook) = signal.hooks.get_mut(index) {
                            if let HookKind::Notify(ref mut slot) = hook.kind {
                                *slot = Some(notify);
                            }
                            hook.busy = false;
                        }
                    }
                    index += 1;
                }
                Action::RaiseChain(dst) => {
                    self.raise_float(dst, output, floating);
                    if let Some(signal) = self.signal_mut(id) {
                        if let Some(hook) = signal.hooks.get_mut(index) {
                            hook.busy = false;
                        }
                    }
                    index += 1;
                }
            }
        }
        if let Some(signal) = self.signal_mut(id) {
            signal.value = output;
        }
    }

    fn signal(&self, id: SignalId) -> Option<&Signal> {
        self.signals.get(id).and_then(|slot| slot.as_ref())
    }

    fn signal_mut(&mut self, id: SignalId) -> Option<&mut Signal> {
        self.signals.get_mut(id).and_then(|slot| slot.as_mut())
    }
}
