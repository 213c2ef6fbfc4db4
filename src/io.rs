//! Console collaborators.
//!
//! The machine only talks to the outside world through [`Console`]: a
//! non-blocking key check (used by the keyboard status register), a
//! blocking key read (used by the GETC and IN traps), and byte output.

use std::collections::VecDeque;
use std::io::{self, Read, Stdout, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use log::{debug, error};

/// Character-level console device.
pub trait Console {
    /// Returns true if a key can be read without blocking.
    fn key_available(&mut self) -> bool;

    /// Read the next key, blocking until one arrives.
    fn read_key(&mut self) -> io::Result<u8>;

    /// Write one byte of output.
    fn write_byte(&mut self, byte: u8) -> io::Result<()>;

    /// Flush buffered output.
    fn flush(&mut self) -> io::Result<()>;

    /// Write a string of bytes.
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        for &b in bytes {
            self.write_byte(b)?;
        }
        Ok(())
    }
}

// ============================================================================
// BufferConsole
// ============================================================================

/// In-memory console: queued input, captured output.
#[derive(Debug, Default, Clone)]
pub struct BufferConsole {
    input: VecDeque<u8>,
    output: Vec<u8>,
    flushes: usize,
}

impl BufferConsole {
    /// Create an empty console.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a console with pending input.
    pub fn with_input(input: &[u8]) -> Self {
        let mut console = Self::new();
        console.push_input(input);
        console
    }

    /// Queue more input.
    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes.iter().copied());
    }

    /// Everything written so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Output decoded lossily as text.
    pub fn output_str(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// Number of flushes requested.
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Number of queued input bytes.
    pub fn pending_input(&self) -> usize {
        self.input.len()
    }
}

impl Console for BufferConsole {
    fn key_available(&mut self) -> bool {
        !self.input.is_empty()
    }

    fn read_key(&mut self) -> io::Result<u8> {
        self.input
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "console input exhausted"))
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.output.push(byte);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

// ============================================================================
// KeyQueue
// ============================================================================

/// Keys delivered by a reader thread.
///
/// Holding at most one peeked key lets `available` stay non-blocking.
#[derive(Debug)]
pub struct KeyQueue {
    rx: Receiver<u8>,
    peeked: Option<u8>,
}

impl KeyQueue {
    pub fn new(rx: Receiver<u8>) -> Self {
        Self { rx, peeked: None }
    }

    /// Non-blocking check for a pending key.
    pub fn available(&mut self) -> bool {
        if self.peeked.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(key) => {
                self.peeked = Some(key);
                true
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
        }
    }

    /// Block until a key arrives. Fails once the sender is gone.
    pub fn next(&mut self) -> io::Result<u8> {
        if let Some(key) = self.peeked.take() {
            return Ok(key);
        }
        self.rx
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "console input closed"))
    }
}

// ============================================================================
// StdioConsole
// ============================================================================

/// Console over plain stdin/stdout, for piped input.
pub struct StdioConsole {
    keys: KeyQueue,
    out: Stdout,
}

impl StdioConsole {
    /// Start pumping stdin on a background thread.
    pub fn new() -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("stdin-reader".into())
            .spawn(move || {
                for byte in io::stdin().lock().bytes() {
                    match byte {
                        Ok(b) => {
                            if tx.send(b).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            error!("stdin: {}", e);
                            return;
                        }
                    }
                }
                debug!("stdin reached end of input");
            })?;

        Ok(Self {
            keys: KeyQueue::new(rx),
            out: io::stdout(),
        })
    }
}

impl Console for StdioConsole {
    fn key_available(&mut self) -> bool {
        self.keys.available()
    }

    fn read_key(&mut self) -> io::Result<u8> {
        self.keys.next()
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.out.write_all(&[byte])
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
