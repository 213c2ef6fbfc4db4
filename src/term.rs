//! Raw-mode terminal console.
//!
//! Programs expect unbuffered, unechoed keys, so the terminal is put in raw
//! mode for as long as a [`Terminal`] is alive. Keys are read by a
//! background thread so the keyboard status register can be polled without
//! blocking the CPU.

use std::io::{self, Stdout, Write};
use std::sync::mpsc::{self, Sender};
use std::thread;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use log::{error, warn};

use crate::io::{Console, KeyQueue};

/// Exit status after Ctrl+C, matching a shell's SIGINT convention.
pub const INTERRUPT_EXIT_CODE: i32 = 130;

/// Console on the controlling terminal, in raw mode.
pub struct Terminal {
    keys: KeyQueue,
    out: Stdout,
}

impl Terminal {
    /// Enter raw mode and start the key reader.
    ///
    /// Raw mode is left again when the terminal is dropped.
    pub fn acquire() -> io::Result<Self> {
        enable_raw_mode()?;

        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("key-reader".into())
            .spawn(move || read_keys(tx));
        if let Err(e) = spawned {
            let _ = disable_raw_mode();
            return Err(e);
        }

        Ok(Self {
            keys: KeyQueue::new(rx),
            out: io::stdout(),
        })
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        let _ = self.out.flush();
        if let Err(e) = disable_raw_mode() {
            warn!("failed to restore terminal: {}", e);
        }
    }
}

impl Console for Terminal {
    fn key_available(&mut self) -> bool {
        self.keys.available()
    }

    fn read_key(&mut self) -> io::Result<u8> {
        self.keys.next()
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        // Raw mode turns off output processing.
        if byte == b'\n' {
            self.out.write_all(b"\r\n")
        } else {
            self.out.write_all(&[byte])
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

fn read_keys(tx: Sender<u8>) {
    loop {
        let key = match event::read() {
            Ok(Event::Key(key)) => key,
            Ok(_) => continue,
            Err(e) => {
                error!("terminal: {}", e);
                return;
            }
        };

        if key.kind == KeyEventKind::Release {
            continue;
        }
        if is_interrupt(&key) {
            interrupt();
        }
        if let Some(byte) = key_to_byte(&key) {
            if tx.send(byte).is_err() {
                return;
            }
        }
    }
}

fn is_interrupt(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && matches!(key.code, KeyCode::Char('c' | 'C'))
}

/// Restore the terminal and leave, as the SIGINT default would.
fn interrupt() -> ! {
    let _ = disable_raw_mode();
    let mut out = io::stdout();
    let _ = out.write_all(b"\r\n");
    let _ = out.flush();
    std::process::exit(INTERRUPT_EXIT_CODE);
}

/// Translate a key event to the byte a program would read.
fn key_to_byte(key: &KeyEvent) -> Option<u8> {
    match key.code {
        KeyCode::Char(c) if c.is_ascii() => {
            let b = c as u8;
            if key.modifiers.contains(KeyModifiers::CONTROL) && b.is_ascii_alphabetic() {
                Some(b.to_ascii_lowercase() - b'a' + 1)
            } else {
                Some(b)
            }
        }
        KeyCode::Enter => Some(b'\n'),
        KeyCode::Tab => Some(b'\t'),
        KeyCode::Backspace => Some(0x08),
        KeyCode::Esc => Some(0x1B),
        _ => None,
    }
}
