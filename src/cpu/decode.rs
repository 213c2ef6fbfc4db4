//! Instruction decoder for the LC-3.
//!
//! Every instruction is one 16-bit word. Bits 15-12 hold the opcode; the
//! remaining 12 bits are opcode-specific register, immediate and offset
//! fields. Offsets and immediates are sign-extended at decode time, so a
//! decoded [`Instruction`] carries full-width words ready for wrapping
//! arithmetic.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpu::registers::{Flag, Reg};
use crate::cpu::trap::TrapCode;
use crate::word::{sign_extend, Word};

/// The 4-bit opcode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Br = 0,
    Add = 1,
    Ld = 2,
    St = 3,
    Jsr = 4,
    And = 5,
    Ldr = 6,
    Str = 7,
    /// Return from interrupt; unused without privilege modes.
    Rti = 8,
    Not = 9,
    Ldi = 10,
    Sti = 11,
    Jmp = 12,
    /// Reserved.
    Res = 13,
    Lea = 14,
    Trap = 15,
}

impl Opcode {
    /// Extract the opcode from an instruction word.
    pub fn of(instr: Word) -> Self {
        match instr >> 12 {
            0 => Opcode::Br,
            1 => Opcode::Add,
            2 => Opcode::Ld,
            3 => Opcode::St,
            4 => Opcode::Jsr,
            5 => Opcode::And,
            6 => Opcode::Ldr,
            7 => Opcode::Str,
            8 => Opcode::Rti,
            9 => Opcode::Not,
            10 => Opcode::Ldi,
            11 => Opcode::Sti,
            12 => Opcode::Jmp,
            13 => Opcode::Res,
            14 => Opcode::Lea,
            _ => Opcode::Trap,
        }
    }
}

/// Second operand of ADD and AND.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    /// SR2 (mode bit clear).
    Reg(Reg),
    /// imm5, already sign-extended (mode bit set).
    Imm(Word),
}

/// Decoded LC-3 instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// Branch if any of the `nzp` condition bits matches COND.
    Br { nzp: u8, offset: Word },

    /// DR := SR1 + operand
    Add { dr: Reg, sr1: Reg, op: Operand },

    /// DR := mem[PC + offset]
    Ld { dr: Reg, offset: Word },

    /// mem[PC + offset] := SR
    St { sr: Reg, offset: Word },

    /// R7 := PC; PC := PC + offset
    Jsr { offset: Word },

    /// R7 := PC; PC := BaseR
    Jsrr { base: Reg },

    /// DR := SR1 & operand
    And { dr: Reg, sr1: Reg, op: Operand },

    /// DR := mem[BaseR + offset]
    Ldr { dr: Reg, base: Reg, offset: Word },

    /// mem[BaseR + offset] := SR
    Str { sr: Reg, base: Reg, offset: Word },

    /// DR := !SR
    Not { dr: Reg, sr: Reg },

    /// DR := mem[mem[PC + offset]]
    Ldi { dr: Reg, offset: Word },

    /// mem[mem[PC + offset]] := SR
    Sti { sr: Reg, offset: Word },

    /// PC := BaseR
    Jmp { base: Reg },

    /// DR := PC + offset
    Lea { dr: Reg, offset: Word },

    /// Call the trap routine at `vector`.
    Trap { vector: u8 },
}

#[inline]
fn pc_offset9(instr: Word) -> Word {
    sign_extend(instr & 0x1FF, 9)
}

#[inline]
fn offset6(instr: Word) -> Word {
    sign_extend(instr & 0x3F, 6)
}

#[inline]
fn operand(instr: Word) -> Operand {
    if (instr >> 5) & 1 == 1 {
        Operand::Imm(sign_extend(instr & 0x1F, 5))
    } else {
        Operand::Reg(Reg::from_field(instr, 0))
    }
}

/// Decode one instruction word.
///
/// Unused bits are ignored rather than rejected.
pub fn decode(instr: Word) -> Result<Instruction, DecodeError> {
    let dr = Reg::from_field(instr, 9);
    let sr1 = Reg::from_field(instr, 6);

    let instruction = match Opcode::of(instr) {
        Opcode::Br => Instruction::Br {
            nzp: ((instr >> 9) & 0x7) as u8,
            offset: pc_offset9(instr),
        },
        Opcode::Add => Instruction::Add { dr, sr1, op: operand(instr) },
        Opcode::And => Instruction::And { dr, sr1, op: operand(instr) },
        Opcode::Not => Instruction::Not { dr, sr: sr1 },
        Opcode::Ld => Instruction::Ld { dr, offset: pc_offset9(instr) },
        Opcode::Ldi => Instruction::Ldi { dr, offset: pc_offset9(instr) },
        Opcode::Ldr => Instruction::Ldr { dr, base: sr1, offset: offset6(instr) },
        Opcode::Lea => Instruction::Lea { dr, offset: pc_offset9(instr) },
        Opcode::St => Instruction::St { sr: dr, offset: pc_offset9(instr) },
        Opcode::Sti => Instruction::Sti { sr: dr, offset: pc_offset9(instr) },
        Opcode::Str => Instruction::Str { sr: dr, base: sr1, offset: offset6(instr) },
        Opcode::Jmp => Instruction::Jmp { base: sr1 },
        Opcode::Jsr => {
            if (instr >> 11) & 1 == 1 {
                Instruction::Jsr { offset: sign_extend(instr & 0x7FF, 11) }
            } else {
                Instruction::Jsrr { base: sr1 }
            }
        }
        Opcode::Trap => Instruction::Trap { vector: (instr & 0xFF) as u8 },
        op @ (Opcode::Rti | Opcode::Res) => {
            return Err(DecodeError::ReservedOpcode(op as u8));
        }
    };

    Ok(instruction)
}

/// Encode an instruction back to a word.
pub fn encode(instr: &Instruction) -> Word {
    fn op(code: Opcode) -> Word {
        (code as Word) << 12
    }
    fn reg(r: Reg, shift: u32) -> Word {
        (r.index() as Word) << shift
    }
    fn operand(o: Operand) -> Word {
        match o {
            Operand::Reg(r) => reg(r, 0),
            Operand::Imm(imm) => (1 << 5) | (imm & 0x1F),
        }
    }

    match *instr {
        Instruction::Br { nzp, offset } => {
            op(Opcode::Br) | ((nzp as Word & 0x7) << 9) | (offset & 0x1FF)
        }
        Instruction::Add { dr, sr1, op: o } => {
            op(Opcode::Add) | reg(dr, 9) | reg(sr1, 6) | operand(o)
        }
        Instruction::And { dr, sr1, op: o } => {
            op(Opcode::And) | reg(dr, 9) | reg(sr1, 6) | operand(o)
        }
        // Bits 5-0 of NOT are all ones in the canonical encoding.
        Instruction::Not { dr, sr } => op(Opcode::Not) | reg(dr, 9) | reg(sr, 6) | 0x3F,
        Instruction::Ld { dr, offset } => op(Opcode::Ld) | reg(dr, 9) | (offset & 0x1FF),
        Instruction::Ldi { dr, offset } => op(Opcode::Ldi) | reg(dr, 9) | (offset & 0x1FF),
        Instruction::Ldr { dr, base, offset } => {
            op(Opcode::Ldr) | reg(dr, 9) | reg(base, 6) | (offset & 0x3F)
        }
        Instruction::Lea { dr, offset } => op(Opcode::Lea) | reg(dr, 9) | (offset & 0x1FF),
        Instruction::St { sr, offset } => op(Opcode::St) | reg(sr, 9) | (offset & 0x1FF),
        Instruction::Sti { sr, offset } => op(Opcode::Sti) | reg(sr, 9) | (offset & 0x1FF),
        Instruction::Str { sr, base, offset } => {
            op(Opcode::Str) | reg(sr, 9) | reg(base, 6) | (offset & 0x3F)
        }
        Instruction::Jmp { base } => op(Opcode::Jmp) | reg(base, 6),
        Instruction::Jsr { offset } => op(Opcode::Jsr) | (1 << 11) | (offset & 0x7FF),
        Instruction::Jsrr { base } => op(Opcode::Jsr) | reg(base, 6),
        Instruction::Trap { vector } => op(Opcode::Trap) | vector as Word,
    }
}

// ============================================================================
// Disassembly
// ============================================================================

/// Offsets print as signed decimals.
struct Signed(Word);

impl std::fmt::Display for Signed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0 as i16)
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Operand::Reg(r) => write!(f, "{}", r),
            Operand::Imm(imm) => write!(f, "{}", Signed(imm)),
        }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Instruction::Br { nzp: 0, .. } => write!(f, "NOP"),
            Instruction::Br { nzp, offset } => {
                write!(f, "BR")?;
                for (flag, c) in [(Flag::Neg, 'n'), (Flag::Zero, 'z'), (Flag::Pos, 'p')] {
                    if nzp & flag.bits() != 0 {
                        write!(f, "{}", c)?;
                    }
                }
                write!(f, " {}", Signed(offset))
            }
            Instruction::Add { dr, sr1, op } => write!(f, "ADD {}, {}, {}", dr, sr1, op),
            Instruction::And { dr, sr1, op } => write!(f, "AND {}, {}, {}", dr, sr1, op),
            Instruction::Not { dr, sr } => write!(f, "NOT {}, {}", dr, sr),
            Instruction::Ld { dr, offset } => write!(f, "LD {}, {}", dr, Signed(offset)),
            Instruction::Ldi { dr, offset } => write!(f, "LDI {}, {}", dr, Signed(offset)),
            Instruction::Ldr { dr, base, offset } => {
                write!(f, "LDR {}, {}, {}", dr, base, Signed(offset))
            }
            Instruction::Lea { dr, offset } => write!(f, "LEA {}, {}", dr, Signed(offset)),
            Instruction::St { sr, offset } => write!(f, "ST {}, {}", sr, Signed(offset)),
            Instruction::Sti { sr, offset } => write!(f, "STI {}, {}", sr, Signed(offset)),
            Instruction::Str { sr, base, offset } => {
                write!(f, "STR {}, {}, {}", sr, base, Signed(offset))
            }
            Instruction::Jmp { base: Reg::R7 } => write!(f, "RET"),
            Instruction::Jmp { base } => write!(f, "JMP {}", base),
            Instruction::Jsr { offset } => write!(f, "JSR {}", Signed(offset)),
            Instruction::Jsrr { base } => write!(f, "JSRR {}", base),
            Instruction::Trap { vector } => match TrapCode::from_vector(vector) {
                Some(code) => write!(f, "{}", code),
                None => write!(f, "TRAP x{:02X}", vector),
            },
        }
    }
}

/// Disassemble a single word, falling back to a data directive.
pub fn disassemble_word(word: Word) -> String {
    match decode(word) {
        Ok(instr) => instr.to_string(),
        Err(_) => format!(".FILL x{:04X}", word),
    }
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),
}
