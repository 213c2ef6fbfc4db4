//! Trap service routines.
//!
//! The LC-3 operating system's console routines are emulated natively
//! rather than executed from memory.

use log::debug;

use crate::cpu::execute::{Cpu, CpuError, CpuState};
use crate::cpu::memory::{Memory, MEMORY_SIZE};
use crate::cpu::registers::Reg;
use crate::io::Console;
use crate::word::Word;

/// Prompt written by the IN trap.
pub const IN_PROMPT: &[u8] = b"Enter a character: ";

/// Notice written by the HALT trap.
pub const HALT_NOTICE: &[u8] = b"HALT\n";

/// Trap vectors with a service routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCode {
    /// Read a key into R0, no echo.
    Getc = 0x20,
    /// Write the character in R0.
    Out = 0x21,
    /// Write a string of one character per word.
    Puts = 0x22,
    /// Prompt for a key, echo it, store it in R0.
    In = 0x23,
    /// Write a string of two characters per word.
    Putsp = 0x24,
    /// Stop the machine.
    Halt = 0x25,
}

impl TrapCode {
    pub fn from_vector(vector: u8) -> Option<Self> {
        Some(match vector {
            0x20 => TrapCode::Getc,
            0x21 => TrapCode::Out,
            0x22 => TrapCode::Puts,
            0x23 => TrapCode::In,
            0x24 => TrapCode::Putsp,
            0x25 => TrapCode::Halt,
            _ => return None,
        })
    }

    pub fn vector(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for TrapCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TrapCode::Getc => "GETC",
            TrapCode::Out => "OUT",
            TrapCode::Puts => "PUTS",
            TrapCode::In => "IN",
            TrapCode::Putsp => "PUTSP",
            TrapCode::Halt => "HALT",
        };
        f.write_str(name)
    }
}

/// Words from `start` up to, not including, the first zero word.
fn string_at(mem: &Memory, start: Word) -> impl Iterator<Item = Word> + '_ {
    (0..MEMORY_SIZE)
        .map(move |i| mem.peek(start.wrapping_add(i as Word)))
        .take_while(|&word| word != 0)
}

impl Cpu {
    /// Run the service routine for `vector`.
    pub(crate) fn trap(&mut self, vector: u8, io: &mut dyn Console) -> Result<(), CpuError> {
        let code = TrapCode::from_vector(vector).ok_or(CpuError::UnknownTrap {
            vector,
            addr: self.regs.pc.wrapping_sub(1),
        })?;

        match code {
            TrapCode::Getc => {
                self.regs[Reg::R0] = io.read_key()? as Word;
            }

            TrapCode::Out => {
                io.write_byte(self.regs[Reg::R0] as u8)?;
                io.flush()?;
            }

            TrapCode::Puts => {
                for word in string_at(&self.mem, self.regs[Reg::R0]) {
                    io.write_byte(word as u8)?;
                }
                io.flush()?;
            }

            TrapCode::In => {
                io.write_bytes(IN_PROMPT)?;
                io.flush()?;
                let key = io.read_key()?;
                io.write_byte(key)?;
                io.flush()?;
                self.regs[Reg::R0] = key as Word;
            }

            TrapCode::Putsp => {
                for word in string_at(&self.mem, self.regs[Reg::R0]) {
                    io.write_byte(word as u8)?;
                    let high = (word >> 8) as u8;
                    if high != 0 {
                        io.write_byte(high)?;
                    }
                }
                io.flush()?;
            }

            TrapCode::Halt => {
                io.write_bytes(HALT_NOTICE)?;
                io.flush()?;
                self.state = CpuState::Halted;
                debug!("halted at {:#06x} after {} instructions", self.regs.pc.wrapping_sub(1), self.cycles + 1);
            }
        }

        Ok(())
    }
}
