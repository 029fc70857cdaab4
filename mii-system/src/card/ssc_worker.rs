// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mii_core::Fifo;

// Design:
//   One worker thread serves every running serial card. It multiplexes
//   over a wakeup socketpair plus each card's host descriptor with a 1 ms
//   select timeout, moving bytes between the descriptors and the per card
//   rx/tx rings. The cpu thread owns the tx producer and rx consumer
//   sides; the worker owns the other two, so the rings never see two
//   writers. All host I/O is non-blocking and bounded by ring occupancy.

pub const SSC_FIFO_SIZE: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CardState {
    Init = 0,
    Start = 1,
    Running = 2,
    Stop = 3,
    Stopped = 4,
}

impl CardState {
    fn from_u8(value: u8) -> CardState {
        match value {
            1 => CardState::Start,
            2 => CardState::Running,
            3 => CardState::Stop,
            4 => CardState::Stopped,
            _ => CardState::Init,
        }
    }
}

/// Card state shared between the cpu thread and the worker.
pub struct SscShared {
    pub rx: Fifo<u8, SSC_FIFO_SIZE>,
    pub tx: Fifo<u8, SSC_FIFO_SIZE>,
    state: AtomicU8,
    fd: AtomicI32,
}

impl SscShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rx: Fifo::new(),
            tx: Fifo::new(),
            state: AtomicU8::new(CardState::Init as u8),
            fd: AtomicI32::new(-1),
        })
    }

    pub fn get_state(&self) -> CardState {
        CardState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: CardState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn get_fd(&self) -> RawFd {
        self.fd.load(Ordering::Acquire)
    }

    pub fn set_fd(&self, fd: RawFd) {
        self.fd.store(fd, Ordering::Release);
    }

    pub fn close_fd(&self) {
        let fd = self.fd.swap(-1, Ordering::AcqRel);
        if fd >= 0 {
            unsafe {
                libc::close(fd);
            }
        }
    }
}

enum WorkerCommand {
    Start(Arc<SscShared>),
    Stop(Arc<SscShared>),
    Terminate,
}

/// Owner handle for the worker thread; lives on the cpu thread.
pub struct SscWorker {
    commands: Arc<Fifo<WorkerCommand, 8>>,
    signal: [RawFd; 2],
    thread: Option<thread::JoinHandle<()>>,
}

impl SscWorker {
    pub fn new() -> Self {
        Self {
            commands: Arc::new(Fifo::new()),
            signal: [-1, -1],
            thread: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    pub fn start_card(&mut self, shared: &Arc<SscShared>) -> Result<(), String> {
        if shared.get_fd() < 0 {
            return Err("host endpoint not open".to_string());
        }
        shared.set_state(CardState::Start);
        if self
            .commands
            .push(WorkerCommand::Start(shared.clone()))
            .is_err()
        {
            return Err("worker command queue full".to_string());
        }
        if self.thread.is_none() {
            let mut fds = [0 as libc::c_int; 2];
            let res = unsafe {
                libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr())
            };
            if res < 0 {
                return Err(format!("socketpair: {}", io::Error::last_os_error()));
            }
            self.signal = [fds[0], fds[1]];
            let commands = self.commands.clone();
            let signal_fd = self.signal[0];
            info!(target: "ssc", "Starting I/O worker");
            self.thread = Some(thread::spawn(move || worker_loop(commands, signal_fd)));
        } else {
            self.signal();
        }
        Ok(())
    }

    pub fn stop_card(&mut self, shared: &Arc<SscShared>) {
        if shared.get_state() != CardState::Running {
            return;
        }
        shared.set_state(CardState::Stop);
        if self
            .commands
            .push(WorkerCommand::Stop(shared.clone()))
            .is_err()
        {
            warn!(target: "ssc", "worker command queue full on stop");
            return;
        }
        self.signal();
        for _ in 0..1000 {
            if shared.get_state() == CardState::Stopped {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        shared.close_fd();
    }

    pub fn terminate(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = self.commands.push(WorkerCommand::Terminate);
            self.signal();
            let _ = handle.join();
            info!(target: "ssc", "I/O worker stopped");
        }
        for fd in self.signal.iter_mut() {
            if *fd >= 0 {
                unsafe {
                    libc::close(*fd);
                }
                *fd = -1;
            }
        }
    }

    /// Wake the worker out of its select wait.
    pub fn signal(&self) {
        if self.signal[1] >= 0 {
            let byte = 0x55u8;
            unsafe {
                libc::write(self.signal[1], &byte as *const u8 as *const libc::c_void, 1);
            }
        }
    }
}

impl Drop for SscWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn is_transient_error(error: &io::Error) -> bool {
    matches!(
        error.raw_os_error(),
        Some(libc::EINTR) | Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK)
    )
}

fn worker_loop(commands: Arc<Fifo<WorkerCommand, 8>>, signal_fd: RawFd) {
    let mut cards: Vec<Arc<SscShared>> = Vec::new();
    loop {
        while let Some(command) = commands.pop() {
            match command {
                WorkerCommand::Start(card) => {
                    card.set_state(CardState::Running);
                    cards.push(card);
                }
                WorkerCommand::Stop(card) => {
                    cards.retain(|entry| !Arc::ptr_eq(entry, &card));
                    card.set_state(CardState::Stopped);
                }
                WorkerCommand::Terminate => {
                    for card in &cards {
                        card.set_state(CardState::Stopped);
                    }
                    return;
                }
            }
        }
        let mut rfds: libc::fd_set = unsafe { mem::zeroed() };
        let mut wfds: libc::fd_set = unsafe { mem::zeroed() };
        let mut maxfd = signal_fd;
        unsafe {
            libc::FD_ZERO(&mut rfds);
            libc::FD_ZERO(&mut wfds);
            libc::FD_SET(signal_fd, &mut rfds);
        }
        for card in &cards {
            let fd = card.get_fd();
            if fd < 0 {
                continue;
            }
            unsafe {
                if !card.tx.is_empty() {
                    libc::FD_SET(fd, &mut wfds);
                }
                if !card.rx.is_full() {
                    libc::FD_SET(fd, &mut rfds);
                }
            }
            if fd > maxfd {
                maxfd = fd;
            }
        }
        let mut timeout = libc::timeval {
            tv_sec: 0,
            tv_usec: 1000,
        };
        let res = unsafe {
            libc::select(
                maxfd + 1,
                &mut rfds,
                &mut wfds,
                ptr::null_mut(),
                &mut timeout,
            )
        };
        if res < 0 {
            let error = io::Error::last_os_error();
            if is_transient_error(&error) {
                continue;
            }
            error!(target: "ssc", "worker select: {}", error);
            return;
        }
        if res == 0 {
            continue;
        }
        if unsafe { libc::FD_ISSET(signal_fd, &mut rfds) } {
            let mut byte = [0u8; 8];
            unsafe {
                libc::read(signal_fd, byte.as_mut_ptr() as *mut libc::c_void, byte.len());
            }
        }
        for card in &cards {
            let fd = card.get_fd();
            if fd < 0 {
                continue;
            }
            if unsafe { libc::FD_ISSET(fd, &mut rfds) } {
                let mut buffer = [0u8; SSC_FIFO_SIZE];
                let max = usize::min(card.rx.free_len(), buffer.len());
                let res = unsafe {
                    libc::read(fd, buffer.as_mut_ptr() as *mut libc::c_void, max)
                };
                if res < 0 {
                    let error = io::Error::last_os_error();
                    if !is_transient_error(&error) {
                        warn!(target: "ssc", "worker read: {}", error);
                        card.close_fd();
                        card.set_state(CardState::Init);
                        continue;
                    }
                } else {
                    card.rx.bulk_write(&buffer[..res as usize]);
                }
            }
            if unsafe { libc::FD_ISSET(fd, &mut wfds) } {
                let mut buffer = [0u8; SSC_FIFO_SIZE];
                let pending = card.tx.len();
                let mut count = 0;
                while count < pending {
                    match card.tx.peek_at(count) {
                        Some(byte) => {
                            buffer[count] = byte;
                            count += 1;
                        }
                        None => break,
                    }
                }
                let res = unsafe {
                    libc::write(fd, buffer.as_ptr() as *const libc::c_void, count)
                };
                if res < 0 {
                    let error = io::Error::last_os_error();
                    if !is_transient_error(&error) {
                        warn!(target: "ssc", "worker write: {}", error);
                        card.close_fd();
                        card.set_state(CardState::Init);
                    }
                } else {
                    // only consume what actually went out
                    for _ in 0..res {
                        card.tx.pop();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_moves_bytes_over_a_socketpair() {
        let mut pair = [0 as libc::c_int; 2];
        let res = unsafe {
            libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, pair.as_mut_ptr())
        };
        assert_eq!(0, res);
        unsafe {
            let flags = libc::fcntl(pair[0], libc::F_GETFL, 0);
            libc::fcntl(pair[0], libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
        let shared = SscShared::new();
        shared.set_fd(pair[0]);
        let mut worker = SscWorker::new();
        worker.start_card(&shared).unwrap();
        // host -> card
        let hello = b"HELLO";
        unsafe {
            libc::write(
                pair[1],
                hello.as_ptr() as *const libc::c_void,
                hello.len(),
            );
        }
        let mut received = Vec::new();
        for _ in 0..200 {
            while let Some(byte) = shared.rx.pop() {
                received.push(byte);
            }
            if received.len() == hello.len() {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(hello.to_vec(), received);
        // card -> host
        for byte in b"OK" {
            shared.tx.push(*byte).unwrap();
        }
        worker.signal();
        let mut out = [0u8; 8];
        let mut got = 0;
        for _ in 0..200 {
            let res = unsafe {
                libc::read(
                    pair[1],
                    out[got..].as_mut_ptr() as *mut libc::c_void,
                    out.len() - got,
                )
            };
            if res > 0 {
                got += res as usize;
            }
            if got >= 2 {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(b"OK"[..], out[..2]);
        worker.stop_card(&shared);
        assert_eq!(CardState::Stopped, shared.get_state());
        worker.terminate();
        unsafe {
            libc::close(pair[1]);
        }
    }
}
