// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::cell::RefCell;
use std::ffi::CString;
use std::io;
use std::mem;
use std::net::TcpStream;
use std::os::unix::io::IntoRawFd;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use bit_field::BitField;
use mii_core::{new_shared, Clock, IrqLine, Shared, TimerId, Timers};

use super::ssc_worker::{CardState, SscShared, SscWorker};
use crate::mem::Bank;
use crate::slot::{Card, CardCommand, Slots};

// Spec: MOS 6551 ACIA datasheet; Super Serial Card manual
// Design:
//   The card models the 6551 registers and the DIP switch banks; all host
//   I/O lives in the shared worker thread. The cpu side only ever touches
//   the two 16 byte rings and the atomics in SscShared, so a register
//   access can never block on the host. A cyclic status poll timer paced
//   to the configured baud rate refreshes RX_FULL/TX_EMPTY and arbitrates
//   the IRQ line.

// control register fields
const CONTROL_BAUD_MASK: u8 = 0x0f;
const CONTROL_WLEN_SHIFT: u8 = 5;
const CONTROL_STOP_SHIFT: u8 = 7;

// command register fields
const COMMAND_DTR: u8 = 1 << 0;
const COMMAND_IRQ_R_DISABLE: u8 = 1 << 1;
const COMMAND_IRQ_T_SHIFT: u8 = 2;
const COMMAND_PARITY_SHIFT: u8 = 5;

pub const COMMAND_RESET: u8 = COMMAND_IRQ_R_DISABLE;
// value programmed by a write to the status register
pub const COMMAND_SOFT_RESET: u8 = 0x10;

// status register bits
pub mod status {
    pub const PARITY_ERROR: u8 = 1 << 0;
    pub const FRAMING_ERROR: u8 = 1 << 1;
    pub const OVERRUN: u8 = 1 << 2;
    pub const RX_FULL: u8 = 1 << 3;
    pub const TX_EMPTY: u8 = 1 << 4;
    pub const DCD: u8 = 1 << 5;
    pub const DSR: u8 = 1 << 6;
    pub const IRQ: u8 = 1 << 7;
}

pub const STATUS_RESET: u8 = status::TX_EMPTY;

// DIP switch bank 2
const SW2_IRQEN: u8 = 1 << 0;

// SW1-4, SW1 is MSB; entries without a tty speed are invalid
const BAUD_RATE: [i32; 16] = [
    1_152_000, 50, 75, 110, 134, 150, 300, 600, 1200, 1800, 2400, -3600, 4800, -7200, 9600,
    19_200,
];

const BAUD_CONST: [libc::speed_t; 16] = [
    libc::B1152000,
    libc::B50,
    libc::B75,
    libc::B110,
    libc::B134,
    libc::B150,
    libc::B300,
    libc::B600,
    libc::B1200,
    libc::B1800,
    libc::B2400,
    0,
    libc::B4800,
    0,
    libc::B9600,
    libc::B19200,
];

const BITS_COUNT: [u32; 4] = [8, 7, 6, 5];
const BITS_FLAG: [libc::tcflag_t; 4] = [libc::CS8, libc::CS7, libc::CS6, libc::CS5];
const PARITY_FLAG: [libc::tcflag_t; 4] = [
    0,
    libc::PARODD,
    libc::PARENB,
    libc::PARENB | libc::PARODD,
];

const DEFAULT_TIMER_DELAY: u64 = 11_520;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SscKind {
    Device,
    Pty,
    Socket,
}

#[derive(Clone, Debug)]
pub struct SscConfig {
    pub kind: SscKind,
    pub device: String,
    pub socket_port: u16,
    pub baud: u32,
    /// Word length index: 0 = 8 bits down to 3 = 5 bits.
    pub bits: u8,
    /// 0 = none, 1 = odd, 2 = even, 3 = mark/space.
    pub parity: u8,
    /// 0 = one stop bit, 1 = two.
    pub stop: u8,
    pub handshake: bool,
}

impl Default for SscConfig {
    fn default() -> Self {
        Self {
            kind: SscKind::Device,
            device: "/dev/tnt0".to_string(),
            socket_port: 0,
            baud: 9600,
            bits: 0,
            parity: 0,
            stop: 0,
            handshake: false,
        }
    }
}

pub struct Ssc {
    slot_id: u8,
    // Dependencies
    shared: Arc<SscShared>,
    worker: Rc<RefCell<SscWorker>>,
    timers: Shared<Timers>,
    clock: Rc<Clock>,
    irq_line: Shared<IrqLine>,
    irq_source: usize,
    self_ref: Weak<RefCell<Ssc>>,
    // Configuration
    conf: SscConfig,
    tty_path: String,
    human_config: String,
    cpu_freq: u32,
    speed: f64,
    // Runtime State
    timer_id: Option<TimerId>,
    timer_delay: u64,
    total_rx: u32,
    total_tx: u32,
    // 6551 registers
    dipsw1: u8,
    dipsw2: u8,
    control: u8,
    command: u8,
    status: u8,
}

impl Ssc {
    fn new(
        slot_id: u8,
        conf: SscConfig,
        clock: Rc<Clock>,
        timers: Shared<Timers>,
        irq_line: Shared<IrqLine>,
        irq_source: usize,
        worker: Rc<RefCell<SscWorker>>,
        cpu_freq: u32,
        speed: f64,
    ) -> Self {
        Self {
            slot_id,
            shared: SscShared::new(),
            worker,
            timers,
            clock,
            irq_line,
            irq_source,
            self_ref: Weak::new(),
            tty_path: conf.device.clone(),
            conf,
            human_config: String::new(),
            cpu_freq,
            speed,
            timer_id: None,
            timer_delay: DEFAULT_TIMER_DELAY,
            total_rx: 0,
            total_tx: 0,
            dipsw1: 0x80 | 14, // communication mode, 9600
            dipsw2: SW2_IRQEN, // programs read this to decide on IRQs
            control: 0,
            command: COMMAND_RESET,
            status: STATUS_RESET,
        }
    }

    pub fn get_shared(&self) -> Arc<SscShared> {
        self.shared.clone()
    }

    /// The path external programs attach to; for a pty this is the slave
    /// side reported back from openpty.
    pub fn get_tty_path(&self) -> &str {
        &self.tty_path
    }

    pub fn get_conf(&self) -> SscConfig {
        self.conf.clone()
    }

    pub fn set_conf(&mut self, conf: &SscConfig) -> Result<(), String> {
        self.apply_conf(Some(conf), false)
    }

    fn rx_irq_enabled(&self) -> bool {
        !self.command.get_bit(1)
    }

    fn tx_irq_enabled(&self) -> bool {
        (self.command >> COMMAND_IRQ_T_SHIFT) & 0x03 == 1
    }

    fn dtr_asserted(&self) -> bool {
        self.command & COMMAND_DTR != 0
    }

    fn raise_irq(&mut self) {
        self.status |= status::IRQ;
        self.irq_line.borrow_mut().set_low(self.irq_source, true);
    }

    fn clear_irq(&mut self) {
        self.status &= !status::IRQ;
        self.irq_line.borrow_mut().set_low(self.irq_source, false);
    }

    /// Periodic status refresh and IRQ arbitration, paced to roughly one
    /// character time. Exactness does not matter as long as it runs often
    /// enough not to miss data.
    fn poll(&mut self, _late: u64) -> u64 {
        match self.shared.get_state() {
            CardState::Running => {}
            // the worker has not picked the card up yet
            CardState::Start => return self.timer_delay,
            _ => {
                self.timer_id = None;
                return 0;
            }
        }
        let rx_full = !self.shared.rx.is_empty();
        let tx_empty = !self.shared.tx.is_full();
        self.status = (self.status & !status::RX_FULL)
            | if rx_full { status::RX_FULL } else { 0 };
        self.status = (self.status & !status::TX_EMPTY)
            | if tx_empty { status::TX_EMPTY } else { 0 };
        let mut irq = false;
        if rx_full && self.rx_irq_enabled() {
            irq = true;
        }
        if !irq && tx_empty && self.tx_irq_enabled() {
            irq = true;
        }
        if irq {
            self.raise_irq();
        }
        self.timer_delay
    }

    fn start(&mut self) {
        match self.shared.get_state() {
            CardState::Start | CardState::Running => return,
            _ => {}
        }
        if self.shared.get_fd() < 0 {
            warn!(target: "ssc", "SSC{}: endpoint not open, not starting", self.slot_id);
            return;
        }
        if let Err(error) = self.worker.borrow_mut().start_card(&self.shared) {
            warn!(target: "ssc", "SSC{}: {}", self.slot_id, error);
            return;
        }
        let now = self.clock.get();
        match self.timer_id {
            Some(id) => self.timers.borrow_mut().set(id, self.timer_delay, now),
            None => {
                let weak = self.self_ref.clone();
                self.timer_id = self.timers.borrow_mut().register(
                    &format!("SSC {}", self.slot_id),
                    Box::new(move |late| match weak.upgrade() {
                        Some(card) => card.borrow_mut().poll(late),
                        None => 0,
                    }),
                    0,
                    now,
                );
            }
        }
    }

    fn stop(&mut self) {
        if self.shared.get_state() == CardState::Running {
            self.worker.borrow_mut().stop_card(&self.shared);
            info!(target: "ssc", "SSC{}: stopped", self.slot_id);
        }
        if let Some(id) = self.timer_id.take() {
            self.timers.borrow_mut().unregister(id);
        }
        self.clear_irq();
    }

    fn apply_conf(&mut self, conf: Option<&SscConfig>, re_open: bool) -> Result<(), String> {
        let conf = conf.cloned().unwrap_or_else(|| self.conf.clone());
        let unchanged = !re_open
            && self.conf.device == conf.device
            && self.conf.kind == conf.kind
            && self.conf.baud == conf.baud
            && self.conf.bits == conf.bits
            && self.conf.parity == conf.parity
            && self.conf.stop == conf.stop
            && self.conf.handshake == conf.handshake
            && self.conf.socket_port == conf.socket_port;
        if unchanged {
            return Ok(());
        }
        if re_open || self.conf.device != conf.device || self.conf.kind != conf.kind {
            // closing also wakes the worker out of its select
            self.shared.close_fd();
        }
        self.conf = conf;
        if self.shared.get_fd() < 0 {
            self.open_endpoint()?;
        }
        self.apply_termios_from_conf();
        self.dipsw1 = 0x80 | baud_index(self.conf.baud).unwrap_or(14);
        self.dipsw2 = SW2_IRQEN;
        self.control = 0;
        while self.shared.rx.pop().is_some() {}
        while self.shared.tx.pop().is_some() {}
        Ok(())
    }

    fn open_endpoint(&mut self) -> Result<(), String> {
        let fd = match self.conf.kind {
            SscKind::Device => {
                let path = CString::new(self.conf.device.as_str())
                    .map_err(|_| "invalid device path".to_string())?;
                let fd = unsafe {
                    libc::open(
                        path.as_ptr(),
                        libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK,
                    )
                };
                if fd < 0 {
                    return Err(format!(
                        "SSC{} open({}): {}",
                        self.slot_id,
                        self.conf.device,
                        io::Error::last_os_error()
                    ));
                }
                self.tty_path = self.conf.device.clone();
                fd
            }
            SscKind::Pty => {
                let mut master: libc::c_int = -1;
                let mut slave: libc::c_int = -1;
                let mut name = [0 as libc::c_char; 128];
                let res = unsafe {
                    libc::openpty(
                        &mut master,
                        &mut slave,
                        name.as_mut_ptr(),
                        std::ptr::null_mut(),
                        std::ptr::null_mut(),
                    )
                };
                if res < 0 {
                    return Err(format!(
                        "SSC{} openpty: {}",
                        self.slot_id,
                        io::Error::last_os_error()
                    ));
                }
                // the slave side belongs to whoever attaches a terminal
                unsafe {
                    libc::close(slave);
                }
                let path = unsafe { std::ffi::CStr::from_ptr(name.as_ptr()) };
                self.tty_path = path.to_string_lossy().into_owned();
                info!(target: "ssc", "SSC{}: pty at {}", self.slot_id, self.tty_path);
                master
            }
            SscKind::Socket => {
                let stream = TcpStream::connect(("127.0.0.1", self.conf.socket_port))
                    .map_err(|error| {
                        format!(
                            "SSC{} connect 127.0.0.1:{}: {}",
                            self.slot_id, self.conf.socket_port, error
                        )
                    })?;
                stream
                    .set_nonblocking(true)
                    .map_err(|error| format!("SSC{}: {}", self.slot_id, error))?;
                self.tty_path = format!("127.0.0.1:{}", self.conf.socket_port);
                stream.into_raw_fd()
            }
        };
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL, 0);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
        self.shared.set_fd(fd);
        Ok(())
    }

    fn apply_termios_from_conf(&mut self) {
        let baud = baud_index(self.conf.baud).unwrap_or(14);
        let bits = self.conf.bits & 0x03;
        let parity = self.conf.parity & 0x03;
        let stop = self.conf.stop & 0x01;
        self.apply_termios(baud, bits, parity, stop);
        self.human_config = format!(
            "Baud:{} {}{}{}",
            BAUD_RATE[baud as usize],
            BITS_COUNT[bits as usize],
            ['n', 'o', 'e', 'b'][parity as usize],
            if stop != 0 { '2' } else { '1' },
        );
    }

    fn apply_termios(&mut self, baud: u8, bits: u8, parity: u8, stop: u8) {
        let fd = self.shared.get_fd();
        if fd < 0 {
            return;
        }
        unsafe {
            let mut tio: libc::termios = mem::zeroed();
            if libc::tcgetattr(fd, &mut tio) != 0 {
                // sockets have no terminal attributes
                return;
            }
            libc::cfmakeraw(&mut tio);
            let speed = BAUD_CONST[baud as usize & 0x0f];
            if speed != 0 {
                libc::cfsetospeed(&mut tio, speed);
                libc::cfsetispeed(&mut tio, speed);
            }
            tio.c_cflag &=
                !(libc::PARENB | libc::PARODD | libc::CSTOPB | libc::CSIZE | libc::CRTSCTS);
            tio.c_cflag |= BITS_FLAG[bits as usize & 0x03];
            tio.c_cflag |= PARITY_FLAG[parity as usize & 0x03];
            if stop != 0 {
                tio.c_cflag |= libc::CSTOPB;
            }
            if self.conf.handshake {
                tio.c_cflag |= libc::CRTSCTS;
            }
            libc::tcsetattr(fd, libc::TCSANOW, &tio);
        }
    }

    fn command_set(&mut self, byte: u8) {
        if !self.dtr_asserted() && byte & COMMAND_DTR != 0 {
            if let Err(error) = self.apply_conf(None, true) {
                warn!(target: "ssc", "{}", error);
            }
            self.start();
        }
        // enabling the receive IRQ while the flag is pending retriggers
        // it, level rather than edge behaviour
        if self.command & COMMAND_IRQ_R_DISABLE != 0
            && byte & COMMAND_IRQ_R_DISABLE == 0
            && self.status & status::IRQ != 0
        {
            self.irq_line.borrow_mut().set_low(self.irq_source, true);
        }
        // TODO: command bit 4 selects local echo; decoded here but not
        // acted upon
        let fd = self.shared.get_fd();
        if fd >= 0 {
            unsafe {
                let mut state: libc::c_int = 0;
                if libc::ioctl(fd, libc::TIOCMGET, &mut state) == 0 {
                    let old = state;
                    if byte & COMMAND_DTR != 0 {
                        state |= libc::TIOCM_DTR;
                    } else {
                        state &= !libc::TIOCM_DTR;
                    }
                    if (byte >> COMMAND_IRQ_T_SHIFT) & 0x03 == 0 {
                        state |= libc::TIOCM_RTS;
                    } else {
                        state &= !libc::TIOCM_RTS;
                    }
                    if old != state {
                        libc::ioctl(fd, libc::TIOCMSET, &state);
                    }
                }
            }
        }
        self.command = byte;
    }

    fn control_set(&mut self, byte: u8) {
        self.control = byte;
        let baud = byte & CONTROL_BAUD_MASK;
        let bits = (byte >> CONTROL_WLEN_SHIFT) & 0x03;
        let stop = (byte >> CONTROL_STOP_SHIFT) & 0x01;
        let parity = (self.command >> COMMAND_PARITY_SHIFT) & 0x03;
        self.apply_termios(baud, bits, parity, stop);
        let rate = BAUD_RATE[baud as usize];
        if rate <= 0 {
            warn!(target: "ssc", "SSC{}: invalid baud selector {}", self.slot_id, baud);
            return;
        }
        let framesize = 1
            + BITS_COUNT[bits as usize]
            + 1
            + u32::from(stop)
            + if parity != 0 { 1 } else { 0 };
        let cps = rate as f64 / f64::from(framesize);
        self.timer_delay = (f64::from(self.cpu_freq) * self.speed / cps) as u64;
        info!(
            target: "ssc",
            "SSC{}: baud:{} stop:{} data:{} parity:{} (frame {})",
            self.slot_id,
            rate,
            stop + 1,
            BITS_COUNT[bits as usize],
            parity,
            framesize
        );
        // pull the poll timer in if it is too far out
        if let Some(id) = self.timer_id {
            let now = self.clock.get();
            let mut timers = self.timers.borrow_mut();
            if timers.get(id, now) > self.timer_delay as i64 {
                timers.set(id, self.timer_delay, now);
            }
        }
    }

    fn read_data(&mut self) -> u8 {
        if self.shared.rx.is_empty() {
            return 0;
        }
        self.total_rx += 1;
        let was_full = self.shared.rx.is_full();
        let byte = self.shared.rx.pop().unwrap_or(0);
        if self.shared.rx.is_empty() {
            self.status &= !status::RX_FULL;
        } else {
            if was_full {
                // make room known to the worker
                self.worker.borrow().signal();
            }
            if self.rx_irq_enabled() {
                self.raise_irq();
            }
        }
        byte
    }

    fn write_data(&mut self, byte: u8) {
        let was_empty = self.shared.tx.is_empty();
        self.total_tx += 1;
        if self.shared.tx.push(byte).is_err() {
            self.status |= status::OVERRUN;
            return;
        }
        if was_empty {
            self.worker.borrow().signal();
        }
        if self.shared.tx.is_full() {
            self.status &= !status::TX_EMPTY;
        }
    }
}

impl Card for Ssc {
    fn name(&self) -> &'static str {
        "ssc"
    }

    fn reset(&mut self) {
        self.command_set(COMMAND_RESET);
        self.status = STATUS_RESET;
        self.control = 0;
        self.clear_irq();
    }

    fn dispose(&mut self) {
        self.stop();
        self.shared.close_fd();
    }

    fn access(&mut self, address: u16, byte: u8, write: bool) -> u8 {
        let mut res = 0;
        match address & 0x0f {
            0x1 => {
                if !write {
                    res = self.dipsw1;
                }
            }
            0x2 => {
                if !write {
                    res = self.dipsw2;
                }
            }
            0x8 => {
                if self.shared.get_state() != CardState::Running {
                    return 0;
                }
                if write {
                    self.write_data(byte);
                } else {
                    res = self.read_data();
                }
            }
            0x9 => {
                if write {
                    info!(target: "ssc", "SSC{}: reset request", self.slot_id);
                    self.command_set(COMMAND_SOFT_RESET);
                    self.status = STATUS_RESET;
                } else {
                    res = self.status;
                    self.clear_irq();
                }
            }
            0xa => {
                if write {
                    self.command_set(byte);
                } else {
                    res = self.command;
                }
            }
            0xb => {
                if write {
                    self.control_set(byte);
                } else {
                    res = self.control;
                }
            }
            _ => {}
        }
        res
    }

    fn command(&mut self, command: &CardCommand) -> Result<(), String> {
        match command {
            CardCommand::SscSetConf(conf) => {
                let res = self.apply_conf(Some(conf), false);
                info!(
                    target: "ssc",
                    "SSC{}: set tty {}: {}",
                    self.slot_id,
                    conf.device,
                    self.human_config
                );
                res
            }
        }
    }

    fn status(&self) -> String {
        format!(
            "SSC {}: {} fd: {} path:{} {}\n  RX: {:2}/{:2} TX: {:2}/{:2} -- total rx:{} tx:{}\n  CONTROL: {:08b} COMMAND: {:08b} STATUS: {:08b}",
            self.slot_id,
            if self.shared.get_state() == CardState::Running {
                "running"
            } else {
                "stopped"
            },
            self.shared.get_fd(),
            self.tty_path,
            self.human_config,
            self.shared.rx.len(),
            self.shared.rx.free_len(),
            self.shared.tx.len(),
            self.shared.tx.free_len(),
            self.total_rx,
            self.total_tx,
            self.control,
            self.command,
            self.status,
        )
    }
}

impl Drop for Ssc {
    fn drop(&mut self) {
        self.stop();
        self.shared.close_fd();
    }
}

fn baud_index(rate: u32) -> Option<u8> {
    BAUD_RATE
        .iter()
        .position(|entry| *entry == rate as i32)
        .map(|index| index as u8)
}

#[cfg_attr(feature = "cargo-clippy", allow(clippy::too_many_arguments))]
pub fn attach(
    slot_id: u8,
    conf: SscConfig,
    clock: &Rc<Clock>,
    timers: &Shared<Timers>,
    irq_line: &Shared<IrqLine>,
    card_rom: &Shared<Bank>,
    slots: &Shared<Slots>,
    worker: &Rc<RefCell<SscWorker>>,
    cpu_freq: u32,
    speed: f64,
) -> Result<Shared<Ssc>, String> {
    let name = format!("SSC {}", slot_id);
    let irq_source = irq_line.borrow_mut().register(&name);
    let card = new_shared(Ssc::new(
        slot_id,
        conf,
        clock.clone(),
        timers.clone(),
        irq_line.clone(),
        irq_source,
        worker.clone(),
        cpu_freq,
        speed,
    ));
    card.borrow_mut().self_ref = Rc::downgrade(&card);
    slots.borrow_mut().attach(slot_id, card.clone())?;

    // Accessing the slot's ROM page maps the shared $C800 window to this
    // card until something touches $CFFF.
    let aux_flag = slots
        .borrow()
        .aux_rom_flag(slot_id)
        .ok_or_else(|| format!("invalid slot {}", slot_id))?;
    let page = 0xc1 + (slot_id - 1);
    card_rom.borrow_mut().install_access_callback(
        page,
        page,
        Rc::new(move |_bank, _address, _byte, _write| {
            aux_flag.set(true);
            false
        }),
    );
    info!(target: "ssc", "SSC attached to slot {}", slot_id);
    Ok(card)
}

#[cfg(test)]
mod tests {
    use super::super::ssc_worker::SSC_FIFO_SIZE;
    use super::*;

    fn setup_card() -> Shared<Ssc> {
        let clock = Rc::new(Clock::new());
        let timers = new_shared(Timers::new());
        let irq_line = new_shared(IrqLine::new("irq"));
        let irq_source = irq_line.borrow_mut().register("SSC 2");
        let worker = Rc::new(RefCell::new(SscWorker::new()));
        let card = new_shared(Ssc::new(
            2,
            SscConfig::default(),
            clock,
            timers,
            irq_line,
            irq_source,
            worker,
            1_023_000,
            1.0,
        ));
        card.borrow_mut().self_ref = Rc::downgrade(&card);
        card
    }

    #[test]
    fn soft_reset_restores_defaults() {
        let card = setup_card();
        let mut card = card.borrow_mut();
        card.access(0xc0aa, 0xff & !COMMAND_DTR, true); // command, no DTR
        card.access(0xc0a9, 0x00, true); // status write = program reset
        assert_eq!(COMMAND_SOFT_RESET, card.access(0xc0aa, 0, false));
        assert_eq!(STATUS_RESET, card.access(0xc0a9, 0, false));
    }

    #[test]
    fn dip_switches_read_back() {
        let card = setup_card();
        let mut card = card.borrow_mut();
        assert_eq!(0x80 | 14, card.access(0xc0a1, 0, false));
        assert_eq!(SW2_IRQEN, card.access(0xc0a2, 0, false));
    }

    #[test]
    fn control_write_rescales_poll_timer() {
        let card = setup_card();
        let mut card = card.borrow_mut();
        // 300 baud, 8 bits, 1 stop: frame of 10 bits, 30 cps
        card.control_set(0x06);
        assert_eq!(34_100, card.timer_delay);
        // 9600 baud
        card.control_set(0x0e);
        assert_eq!(1_065, card.timer_delay);
    }

    #[test]
    fn status_poll_reflects_rings() {
        let card = setup_card();
        let mut card = card.borrow_mut();
        card.shared.set_state(CardState::Running);
        card.shared.rx.push(0x41).unwrap();
        card.poll(0);
        assert_ne!(0, card.status & status::RX_FULL);
        assert_ne!(0, card.status & status::TX_EMPTY);
        // receive irq disabled by default command value
        assert_eq!(0, card.status & status::IRQ);
        card.command = 0; // enable rx irq
        card.poll(0);
        assert_ne!(0, card.status & status::IRQ);
    }

    #[test]
    fn data_read_drains_rx_ring() {
        let card = setup_card();
        let mut card = card.borrow_mut();
        card.shared.set_state(CardState::Running);
        for byte in b"HELLO" {
            card.shared.rx.push(*byte).unwrap();
        }
        card.poll(0);
        let mut received = Vec::new();
        while card.status & status::RX_FULL != 0 {
            received.push(card.access(0xc0a8, 0, false));
            if card.shared.rx.is_empty() {
                break;
            }
        }
        assert_eq!(b"HELLO".to_vec(), received);
        assert_eq!(0, card.status & status::RX_FULL);
    }

    #[test]
    fn data_write_fills_tx_ring() {
        let card = setup_card();
        let mut card = card.borrow_mut();
        card.shared.set_state(CardState::Running);
        card.poll(0);
        for _ in 0..SSC_FIFO_SIZE - 1 {
            card.access(0xc0a8, 0x55, true);
        }
        assert!(card.shared.tx.is_full());
        assert_eq!(0, card.status & status::TX_EMPTY);
    }
}
