// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::io;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use mii_core::Fifo;

// Design:
//   Line oriented debug console served over TCP. Each connection parses
//   commands and pushes them into the command ring the cpu thread drains
//   once per frame; queries that need an answer carry a channel sender the
//   execution engine replies on. The console never touches machine state
//   itself.

pub const COMMAND_QUEUE_SIZE: usize = 16;

/// Commands understood by the cpu thread regulator.
pub enum Command {
    Reset(bool),
    Stop,
    Step(u16),
    Run,
    Paste(String),
    Status(mpsc::Sender<String>),
    Trace(bool),
    Terminate,
}

pub struct Console {
    commands: Arc<Fifo<Command, COMMAND_QUEUE_SIZE>>,
}

impl Console {
    pub fn new(commands: Arc<Fifo<Command, COMMAND_QUEUE_SIZE>>) -> Self {
        Self { commands }
    }

    pub fn start(&self, port: u16) -> io::Result<()> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        info!(target: "console", "Debug console on port {}", port);
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let mut connection = Connection::new(self.commands.clone(), stream)?;
                    match connection.handle() {
                        Ok(_) => info!(target: "console", "Connection closed"),
                        Err(error) => {
                            warn!(target: "console", "Connection failed, error - {}", error)
                        }
                    }
                }
                Err(_) => {}
            }
        }
        Ok(())
    }
}

struct Connection {
    commands: Arc<Fifo<Command, COMMAND_QUEUE_SIZE>>,
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    running: bool,
}

impl Connection {
    fn new(
        commands: Arc<Fifo<Command, COMMAND_QUEUE_SIZE>>,
        stream: TcpStream,
    ) -> io::Result<Self> {
        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream);
        Ok(Self {
            commands,
            reader,
            writer,
            running: true,
        })
    }

    fn handle(&mut self) -> io::Result<()> {
        self.writeln("mii debug console, 'help' for commands")?;
        while self.running {
            write!(self.writer, "> ")?;
            self.writer.flush()?;
            let mut input = String::new();
            if self.reader.read_line(&mut input)? == 0 {
                break;
            }
            self.handle_request(input.trim())?;
        }
        self.writer.flush()?;
        Ok(())
    }

    fn handle_request(&mut self, input: &str) -> io::Result<()> {
        let mut tokens = input.split_whitespace();
        match tokens.next() {
            None => Ok(()),
            Some("help") => {
                self.writeln("status | reset [hard] | stop | step [n] | run")?;
                self.writeln("trace on|off | paste <text> | quit | shutdown")
            }
            Some("status") => {
                let (tx, rx) = mpsc::channel();
                self.send(Command::Status(tx))?;
                match rx.recv_timeout(Duration::from_secs(1)) {
                    Ok(status) => self.writeln(&status),
                    Err(_) => self.writeln("no response"),
                }
            }
            Some("reset") => {
                let hard = tokens.next() == Some("hard");
                self.send(Command::Reset(hard))
            }
            Some("stop") => self.send(Command::Stop),
            Some("step") => {
                let count = tokens
                    .next()
                    .and_then(|token| token.parse().ok())
                    .unwrap_or(1);
                self.send(Command::Step(count))
            }
            Some("run") => self.send(Command::Run),
            Some("trace") => match tokens.next() {
                Some("on") => self.send(Command::Trace(true)),
                Some("off") => self.send(Command::Trace(false)),
                _ => self.writeln("trace on|off"),
            },
            Some("paste") => {
                let text = input.splitn(2, ' ').nth(1).unwrap_or("").to_string();
                self.send(Command::Paste(text))
            }
            Some("quit") => {
                self.running = false;
                Ok(())
            }
            Some("shutdown") => {
                self.send(Command::Terminate)?;
                self.running = false;
                Ok(())
            }
            Some(other) => self.writeln(&format!("unknown command '{}'", other)),
        }
    }

    fn send(&mut self, command: Command) -> io::Result<()> {
        if self.commands.push(command).is_err() {
            return self.writeln("command queue full, try again");
        }
        self.writeln("ok")
    }

    fn writeln(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()
    }
}
