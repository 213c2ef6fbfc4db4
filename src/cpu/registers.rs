//! LC-3 registers.
//!
//! The LC-3 has:
//! - R0-R7: eight general purpose registers
//! - PC: program counter
//! - COND: condition flags, exactly one of N, Z, P

use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::word::Word;

/// Address where programs start by convention.
pub const PC_START: Word = 0x3000;

/// A general purpose register index (0-7).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Reg(u8);

impl Reg {
    pub const R0: Reg = Reg(0);
    pub const R7: Reg = Reg(7);

    /// Create from an index; only the low three bits are used.
    pub const fn new(index: u8) -> Self {
        Self(index & 0x7)
    }

    /// Extract the 3-bit register field at `shift` in an instruction.
    #[inline]
    pub const fn from_field(instr: Word, shift: u32) -> Self {
        Self(((instr >> shift) & 0x7) as u8)
    }

    /// The register index.
    #[inline]
    pub const fn index(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Condition flag.
///
/// The discriminants are the bit positions used by the `nzp` field of BR.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Flag {
    Pos = 1 << 0,
    Zero = 1 << 1,
    Neg = 1 << 2,
}

impl Flag {
    /// The flag describing the sign of `value`.
    pub fn of(value: Word) -> Self {
        if value == 0 {
            Flag::Zero
        } else if value >> 15 == 1 {
            Flag::Neg
        } else {
            Flag::Pos
        }
    }

    /// The flag as an `nzp` bit.
    #[inline]
    pub const fn bits(self) -> u8 {
        self as u8
    }
}

/// The LC-3 register file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    /// R0-R7.
    pub r: [Word; 8],

    /// Address of the next instruction.
    pub pc: Word,

    /// Sign of the most recent flag-affecting register write.
    pub cond: Flag,
}

impl Registers {
    /// Create a register file in the power-on state.
    pub fn new() -> Self {
        Self {
            r: [0; 8],
            pc: PC_START,
            cond: Flag::Zero,
        }
    }

    /// Reset to the power-on state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Recompute COND from the value now in `reg`.
    pub fn update_flags(&mut self, reg: Reg) {
        self.cond = Flag::of(self[reg]);
    }

    /// Write `value` to `reg` and update COND from it.
    pub fn set_with_flags(&mut self, reg: Reg, value: Word) {
        self[reg] = value;
        self.update_flags(reg);
    }

    /// Increment the program counter by 1.
    /// Returns the old value.
    pub fn advance_pc(&mut self) -> Word {
        let old = self.pc;
        self.pc = self.pc.wrapping_add(1);
        old
    }

    /// PC plus a sign-extended offset.
    #[inline]
    pub fn pc_relative(&self, offset: Word) -> Word {
        self.pc.wrapping_add(offset)
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<Reg> for Registers {
    type Output = Word;

    fn index(&self, reg: Reg) -> &Word {
        &self.r[reg.0 as usize]
    }
}

impl IndexMut<Reg> for Registers {
    fn index_mut(&mut self, reg: Reg) -> &mut Word {
        &mut self.r[reg.0 as usize]
    }
}
