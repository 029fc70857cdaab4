// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::cell::RefCell;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::rc::Rc;

use mii_core::signal::{flags, SignalId, SignalPool};
use mii_core::{Clock, Fifo, Shared};

// Design:
//   Value change dump generation for debugging. Each traced wire gets a
//   proxy signal chained off the source; the proxy's notify queues a
//   timestamped transition into a 256 deep ring which is flushed to the
//   output file when full, or when recording stops. Timestamps use a
//   10 ns timescale; when two transitions of one wire land in the same
//   bucket the second is nudged forward one unit so the waveform still
//   shows a pulse.

pub const VCD_MAX_SIGNALS: usize = 64;
const VCD_LOG_SIZE: usize = 256;

// 10 ns base, aka 100MHz
const TIMESCALE_NS: u64 = 10;

#[derive(Clone, Copy)]
struct VcdLog {
    sig_index: u8,
    when: u64,
    value: u32,
    floating: bool,
}

struct VcdSignalMeta {
    name: String,
    alias: char,
    size: u8,
}

struct VcdInner {
    filename: String,
    output: Option<BufWriter<File>>,
    signals: Vec<VcdSignalMeta>,
    log: Fifo<VcdLog, VCD_LOG_SIZE>,
    cycle_to_nsec: u64,
    start: u64,
}

impl VcdInner {
    fn signal_text(&self, index: usize, value: u32, floating: bool) -> String {
        let meta = &self.signals[index];
        let mut out = String::new();
        if meta.size > 1 {
            out.push('b');
        }
        for bit in (0..meta.size).rev() {
            if floating {
                out.push('x');
            } else {
                out.push(if value & (1 << bit) != 0 { '1' } else { '0' });
            }
        }
        if meta.size > 1 {
            out.push(' ');
        }
        out.push(meta.alias);
        out
    }

    fn flush(&mut self) {
        if self.output.is_none() {
            // keep discarding entries so the ring never wedges
            while self.log.pop().is_some() {}
            return;
        }
        let mut seen = 0u64;
        let mut oldbase = 0u64;
        let mut first = true;
        while let Some(entry) = self.log.pop() {
            let mut base =
                (entry.when.saturating_sub(self.start)) * self.cycle_to_nsec / TIMESCALE_NS;
            // a transition landing in an already used bucket is nudged
            // forward one unit so every pulse stays visible
            if !first && base <= oldbase && seen != 0 {
                base = oldbase + 1;
            }
            if base > oldbase || first {
                seen = 0;
                let output = self.output.as_mut().unwrap();
                let _ = writeln!(output, "#{}", base);
                oldbase = base;
                first = false;
            }
            seen |= 1 << entry.sig_index;
            let text = self.signal_text(entry.sig_index as usize, entry.value, entry.floating);
            let output = self.output.as_mut().unwrap();
            let _ = writeln!(output, "{}", text);
        }
    }
}

pub struct Vcd {
    inner: Rc<RefCell<VcdInner>>,
    pool: Shared<SignalPool>,
    clock: Rc<Clock>,
    proxies: Vec<SignalId>,
}

impl Vcd {
    pub fn new(
        pool: Shared<SignalPool>,
        clock: Rc<Clock>,
        filename: &str,
        cycle_to_nsec: u64,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(VcdInner {
                filename: filename.to_string(),
                output: None,
                signals: Vec::new(),
                log: Fifo::new(),
                cycle_to_nsec,
                start: 0,
            })),
            pool,
            clock,
            proxies: Vec::new(),
        }
    }

    /// Register a wire to be logged. Must be called before `start`.
    pub fn add_signal(&mut self, source: SignalId, size: u8, name: &str) -> Result<(), String> {
        let index = {
            let mut inner = self.inner.borrow_mut();
            if inner.signals.len() == VCD_MAX_SIGNALS {
                return Err(format!("unable to add signal '{}'", name));
            }
            let index = inner.signals.len();
            inner.signals.push(VcdSignalMeta {
                name: name.to_string(),
                // one printable character per signal from '!' up
                alias: (0x21 + index as u8) as char,
                size,
            });
            index
        };
        let mut pool = self.pool.borrow_mut();
        let proxy = pool.alloc(index as u32, &format!(">vcd.{}", name));
        let inner = self.inner.clone();
        let clock = self.clock.clone();
        pool.register_notify(
            proxy,
            Box::new(move |value, sig_flags| {
                let mut inner = inner.borrow_mut();
                let entry = VcdLog {
                    sig_index: index as u8,
                    when: clock.get(),
                    value,
                    floating: sig_flags & flags::FLOATING != 0,
                };
                if inner.log.is_full() {
                    inner.flush();
                }
                let _ = inner.log.push(entry);
            }),
        );
        pool.connect(source, proxy);
        self.proxies.push(proxy);
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), String> {
        {
            let mut inner = self.inner.borrow_mut();
            inner.start = self.clock.get();
            while inner.log.pop().is_some() {}
            let file = File::create(&inner.filename)
                .map_err(|error| format!("{}: {}", inner.filename, error))?;
            let mut output = BufWriter::new(file);
            let _ = writeln!(output, "$version mii-emu $end");
            let _ = writeln!(output, "$timescale {}ns $end", TIMESCALE_NS);
            let _ = writeln!(output, "$scope module logic $end");
            for meta in &inner.signals {
                let _ = writeln!(
                    output,
                    "$var wire {} {} {} $end",
                    meta.size, meta.alias, meta.name
                );
            }
            let _ = writeln!(output, "$upscope $end");
            let _ = writeln!(output, "$enddefinitions $end");
            let _ = writeln!(output, "$dumpvars");
            for index in 0..inner.signals.len() {
                let text = inner.signal_text(index, 0, true);
                let _ = writeln!(output, "{}", text);
            }
            let _ = writeln!(output, "$end");
            inner.output = Some(output);
        }
        info!(target: "vcd", "Recording to {}", self.inner.borrow().filename);
        Ok(())
    }

    pub fn stop(&mut self) {
        let mut inner = self.inner.borrow_mut();
        inner.flush();
        if let Some(mut output) = inner.output.take() {
            let _ = output.flush();
        }
    }
}

impl Drop for Vcd {
    fn drop(&mut self) {
        self.stop();
        let mut pool = self.pool.borrow_mut();
        for proxy in self.proxies.drain(..) {
            pool.free(proxy);
        }
    }
}
