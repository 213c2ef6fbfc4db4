//! CPU execution engine for the LC-3.
//!
//! Implements the fetch-decode-execute cycle and all instruction behaviors.

use std::io::Read;

use log::trace;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpu::decode::{self, DecodeError, Instruction, Operand};
use crate::cpu::registers::Reg;
use crate::cpu::{Memory, Registers};
use crate::image::{self, ImageError, LoadedImage};
use crate::io::Console;
use crate::word::Word;

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has halted (executed the HALT trap).
    Halted,
    /// CPU hit a fatal condition.
    Error,
}

/// The LC-3 CPU: the whole machine state.
#[derive(Clone)]
pub struct Cpu {
    /// CPU registers.
    pub regs: Registers,
    /// Main memory.
    pub mem: Memory,
    /// Current execution state.
    pub state: CpuState,
    /// Instructions executed.
    pub cycles: u64,
    /// Last instruction that completed.
    last_instr: Option<Instruction>,
}

impl Cpu {
    /// Create a new CPU in the power-on state.
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            mem: Memory::new(),
            state: CpuState::Running,
            cycles: 0,
            last_instr: None,
        }
    }

    /// Reset the CPU to the power-on state.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mem.clear();
        self.state = CpuState::Running;
        self.cycles = 0;
        self.last_instr = None;
    }

    /// Load an object image into memory.
    pub fn load_image<R: Read>(&mut self, reader: R) -> Result<LoadedImage, ImageError> {
        image::load_image(reader, &mut self.mem)
    }

    /// Execute a single instruction.
    ///
    /// Returns the instruction that was executed, or an error. Any error
    /// other than [`CpuError::NotRunning`] leaves the CPU in
    /// [`CpuState::Error`].
    pub fn step(&mut self, io: &mut dyn Console) -> Result<Instruction, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        self.fetch_execute(io).map_err(|e| {
            self.state = CpuState::Error;
            e
        })
    }

    fn fetch_execute(&mut self, io: &mut dyn Console) -> Result<Instruction, CpuError> {
        // Fetch
        let addr = self.regs.pc;
        let raw = self.mem.read(addr, io)?;

        // PC moves on before execution; jumps overwrite it.
        self.regs.advance_pc();

        // Decode
        let instr = decode::decode(raw).map_err(|source| CpuError::Decode { addr, source })?;
        trace!("{:04x}: {:04x}  {}", addr, raw, instr);

        // Execute
        self.execute(instr, io)?;

        self.cycles += 1;
        self.last_instr = Some(instr);

        Ok(instr)
    }

    /// Run until halt or error.
    ///
    /// Returns the number of instructions executed.
    pub fn run(&mut self, io: &mut dyn Console) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;

        while self.state == CpuState::Running {
            self.step(io)?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited(&mut self, io: &mut dyn Console, max_cycles: u64) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;
        let limit = self.cycles.saturating_add(max_cycles);

        while self.state == CpuState::Running && self.cycles < limit {
            self.step(io)?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Execute a decoded instruction.
    fn execute(&mut self, instr: Instruction, io: &mut dyn Console) -> Result<(), CpuError> {
        match instr {
            // ==================== Operate ====================

            Instruction::Add { dr, sr1, op } => {
                let result = self.regs[sr1].wrapping_add(self.operand(op));
                self.regs.set_with_flags(dr, result);
            }

            Instruction::And { dr, sr1, op } => {
                let result = self.regs[sr1] & self.operand(op);
                self.regs.set_with_flags(dr, result);
            }

            Instruction::Not { dr, sr } => {
                let result = !self.regs[sr];
                self.regs.set_with_flags(dr, result);
            }

            // ==================== Data Movement ====================

            Instruction::Ld { dr, offset } => {
                let addr = self.regs.pc_relative(offset);
                let value = self.mem.read(addr, io)?;
                self.regs.set_with_flags(dr, value);
            }

            Instruction::Ldi { dr, offset } => {
                let pointer = self.mem.read(self.regs.pc_relative(offset), io)?;
                let value = self.mem.read(pointer, io)?;
                self.regs.set_with_flags(dr, value);
            }

            Instruction::Ldr { dr, base, offset } => {
                let addr = self.regs[base].wrapping_add(offset);
                let value = self.mem.read(addr, io)?;
                self.regs.set_with_flags(dr, value);
            }

            Instruction::Lea { dr, offset } => {
                let addr = self.regs.pc_relative(offset);
                self.regs.set_with_flags(dr, addr);
            }

            Instruction::St { sr, offset } => {
                let addr = self.regs.pc_relative(offset);
                self.mem.write(addr, self.regs[sr]);
            }

            Instruction::Sti { sr, offset } => {
                let pointer = self.mem.read(self.regs.pc_relative(offset), io)?;
                self.mem.write(pointer, self.regs[sr]);
            }

            Instruction::Str { sr, base, offset } => {
                let addr = self.regs[base].wrapping_add(offset);
                self.mem.write(addr, self.regs[sr]);
            }

            // ==================== Control Flow ====================

            Instruction::Br { nzp, offset } => {
                if nzp & self.regs.cond.bits() != 0 {
                    self.regs.pc = self.regs.pc_relative(offset);
                }
            }

            Instruction::Jmp { base } => {
                self.regs.pc = self.regs[base];
            }

            Instruction::Jsr { offset } => {
                let ret = self.regs.pc;
                self.regs[Reg::R7] = ret;
                self.regs.pc = ret.wrapping_add(offset);
            }

            Instruction::Jsrr { base } => {
                // R7 is saved first; JSRR R7 lands on the return address.
                self.regs[Reg::R7] = self.regs.pc;
                self.regs.pc = self.regs[base];
            }

            Instruction::Trap { vector } => {
                self.trap(vector, io)?;
            }
        }

        Ok(())
    }

    #[inline]
    fn operand(&self, op: Operand) -> Word {
        match op {
            Operand::Reg(r) => self.regs[r],
            Operand::Imm(imm) => imm,
        }
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Check if the CPU is halted.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .finish()
    }
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("{source} at {addr:#06x}")]
    Decode {
        addr: Word,
        #[source]
        source: DecodeError,
    },

    #[error("unknown trap vector {vector:#04x} at {addr:#06x}")]
    UnknownTrap { vector: u8, addr: Word },

    #[error("console I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::encode;
    use crate::cpu::registers::{Flag, PC_START};
    use crate::image::Image;
    use crate::io::BufferConsole;

    const HALT: Word = 0xF025;

    fn r(index: u8) -> Reg {
        Reg::new(index)
    }

    fn cpu_with(program: &[Word]) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.mem.load(PC_START, program);
        cpu
    }

    fn make_program(instructions: &[Instruction]) -> Vec<Word> {
        instructions.iter().map(encode).collect()
    }

    #[test]
    fn test_add_immediate_then_halt() {
        let image = Image::new(0x3000, vec![0x1021, HALT]);
        let mut cpu = Cpu::new();
        cpu.load_image(image.to_bytes().as_slice()).unwrap();
        let mut io = BufferConsole::new();

        cpu.step(&mut io).unwrap();
        assert_eq!(cpu.regs[Reg::R0], 1);
        assert_eq!(cpu.regs.cond, Flag::Pos);
        assert_eq!(cpu.regs.pc, 0x3001);

        cpu.step(&mut io).unwrap();
        assert!(cpu.is_halted());
        assert_eq!(cpu.cycles, 2);
        assert_eq!(io.output_str(), "HALT\n");
    }

    #[test]
    fn test_reserved_opcode_is_fatal() {
        let mut cpu = cpu_with(&[0x8000, HALT]);
        let mut io = BufferConsole::new();
        let before = cpu.regs.clone();

        let err = cpu.run(&mut io).unwrap_err();
        assert!(matches!(
            err,
            CpuError::Decode { addr: 0x3000, source: DecodeError::ReservedOpcode(8) }
        ));
        assert_eq!(cpu.state, CpuState::Error);
        assert_eq!(cpu.regs.pc, 0x3001);
        assert_eq!(cpu.regs.r, before.r);
        assert_eq!(cpu.regs.cond, before.cond);
        assert_eq!(cpu.cycles, 0);
        assert!(io.output().is_empty());

        // A dead CPU refuses to step.
        assert!(matches!(cpu.step(&mut io), Err(CpuError::NotRunning(CpuState::Error))));
    }

    #[test]
    fn test_res_opcode_is_fatal() {
        let mut cpu = cpu_with(&[0xD000]);
        let err = cpu.step(&mut BufferConsole::new()).unwrap_err();
        assert!(matches!(err, CpuError::Decode { source: DecodeError::ReservedOpcode(13), .. }));
    }

    #[test]
    fn test_add_register_and_wraparound() {
        let mut cpu = cpu_with(&make_program(&[
            Instruction::Add { dr: r(2), sr1: r(0), op: Operand::Reg(r(1)) },
            Instruction::Add { dr: r(3), sr1: r(3), op: Operand::Imm(0xFFFF) },
        ]));
        cpu.regs[r(0)] = 0xFFFF;
        cpu.regs[r(1)] = 2;
        let mut io = BufferConsole::new();

        cpu.step(&mut io).unwrap();
        assert_eq!(cpu.regs[r(2)], 1);
        assert_eq!(cpu.regs.cond, Flag::Pos);

        cpu.step(&mut io).unwrap();
        assert_eq!(cpu.regs[r(3)], 0xFFFF);
        assert_eq!(cpu.regs.cond, Flag::Neg);
    }

    #[test]
    fn test_and_not() {
        let mut cpu = cpu_with(&make_program(&[
            Instruction::And { dr: r(1), sr1: r(0), op: Operand::Imm(0) },
            Instruction::And { dr: r(2), sr1: r(0), op: Operand::Reg(r(3)) },
            Instruction::Not { dr: r(4), sr: r(0) },
        ]));
        cpu.regs[r(0)] = 0x0F0F;
        cpu.regs[r(3)] = 0x00FF;
        let mut io = BufferConsole::new();

        cpu.step(&mut io).unwrap();
        assert_eq!(cpu.regs[r(1)], 0);
        assert_eq!(cpu.regs.cond, Flag::Zero);

        cpu.step(&mut io).unwrap();
        assert_eq!(cpu.regs[r(2)], 0x000F);
        assert_eq!(cpu.regs.cond, Flag::Pos);

        cpu.step(&mut io).unwrap();
        assert_eq!(cpu.regs[r(4)], 0xF0F0);
        assert_eq!(cpu.regs.cond, Flag::Neg);
    }

    #[test]
    fn test_branch_taken_and_not_taken() {
        let mut cpu = cpu_with(&make_program(&[
            // COND starts at Z.
            Instruction::Br { nzp: Flag::Pos.bits(), offset: 5 },
            Instruction::Br { nzp: Flag::Zero.bits() | Flag::Neg.bits(), offset: 0xFFFE },
        ]));
        let mut io = BufferConsole::new();

        cpu.step(&mut io).unwrap();
        assert_eq!(cpu.regs.pc, 0x3001);

        cpu.step(&mut io).unwrap();
        assert_eq!(cpu.regs.pc, 0x3000);
        assert_eq!(cpu.regs.cond, Flag::Zero);
    }

    #[test]
    fn test_jmp_and_ret() {
        let mut cpu = cpu_with(&make_program(&[Instruction::Jmp { base: Reg::R7 }]));
        cpu.regs[Reg::R7] = 0x4000;
        cpu.step(&mut BufferConsole::new()).unwrap();
        assert_eq!(cpu.regs.pc, 0x4000);
    }

    #[test]
    fn test_jsr_long_form() {
        let mut cpu = cpu_with(&make_program(&[Instruction::Jsr { offset: 5 }]));
        cpu.step(&mut BufferConsole::new()).unwrap();

        assert_eq!(cpu.regs[Reg::R7], 0x3001);
        assert_eq!(cpu.regs.pc, 0x3006);
    }

    #[test]
    fn test_jsrr() {
        let mut cpu = cpu_with(&make_program(&[
            Instruction::Jsrr { base: r(3) },
        ]));
        cpu.regs[r(3)] = 0x5000;
        cpu.mem.write(0x5000, encode(&Instruction::Jsrr { base: Reg::R7 }));
        let mut io = BufferConsole::new();

        cpu.step(&mut io).unwrap();
        assert_eq!(cpu.regs[Reg::R7], 0x3001);
        assert_eq!(cpu.regs.pc, 0x5000);

        // JSRR R7 saves the return address, then jumps through it.
        cpu.step(&mut io).unwrap();
        assert_eq!(cpu.regs[Reg::R7], 0x5001);
        assert_eq!(cpu.regs.pc, 0x5001);
    }

    #[test]
    fn test_loads() {
        let mut cpu = cpu_with(&make_program(&[
            Instruction::Ld { dr: r(0), offset: 3 },
            Instruction::Ldi { dr: r(1), offset: 3 },
            Instruction::Ldr { dr: r(2), base: r(5), offset: 0xFFFF },
            Instruction::Lea { dr: r(3), offset: 0xFFFC },
        ]));
        cpu.mem.write(0x3004, 0x8001);
        cpu.mem.write(0x3005, 0x4000);
        cpu.mem.write(0x4000, 0);
        cpu.mem.write(0x4FFF, 77);
        cpu.regs[r(5)] = 0x5000;
        let mut io = BufferConsole::new();

        cpu.step(&mut io).unwrap();
        assert_eq!(cpu.regs[r(0)], 0x8001);
        assert_eq!(cpu.regs.cond, Flag::Neg);

        cpu.step(&mut io).unwrap();
        assert_eq!(cpu.regs[r(1)], 0);
        assert_eq!(cpu.regs.cond, Flag::Zero);

        cpu.step(&mut io).unwrap();
        assert_eq!(cpu.regs[r(2)], 77);
        assert_eq!(cpu.regs.cond, Flag::Pos);

        // LEA yields the address, not the memory contents.
        cpu.step(&mut io).unwrap();
        assert_eq!(cpu.regs[r(3)], 0x3000);
        assert_eq!(cpu.regs.cond, Flag::Pos);
    }

    #[test]
    fn test_stores_leave_flags() {
        let mut cpu = cpu_with(&make_program(&[
            Instruction::St { sr: r(0), offset: 2 },
            Instruction::Sti { sr: r(1), offset: 2 },
            Instruction::Str { sr: r(2), base: r(3), offset: 4 },
        ]));
        cpu.mem.write(0x3004, 0x6000);
        cpu.regs[r(0)] = 0xAAAA;
        cpu.regs[r(1)] = 0xBBBB;
        cpu.regs[r(2)] = 0xCCCC;
        cpu.regs[r(3)] = 0x7000;
        let mut io = BufferConsole::new();

        cpu.run_limited(&mut io, 3).unwrap();
        assert_eq!(cpu.mem.peek(0x3003), 0xAAAA);
        assert_eq!(cpu.mem.peek(0x6000), 0xBBBB);
        assert_eq!(cpu.mem.peek(0x7004), 0xCCCC);
        assert_eq!(cpu.regs.cond, Flag::Zero);
    }

    #[test]
    fn test_pc_relative_wraps() {
        let mut cpu = Cpu::new();
        cpu.regs.pc = 0xFFFF;
        cpu.mem.write(0xFFFF, encode(&Instruction::Ld { dr: r(0), offset: 1 }));
        cpu.mem.write(0x0001, 9);

        cpu.step(&mut BufferConsole::new()).unwrap();
        assert_eq!(cpu.regs.pc, 0);
        assert_eq!(cpu.regs[r(0)], 9);
    }

    #[test]
    fn test_ldi_polls_keyboard() {
        // LDI R0, KBSR_PTR ; LDI R1, KBDR_PTR
        let mut cpu = cpu_with(&make_program(&[
            Instruction::Ldi { dr: r(0), offset: 1 },
            Instruction::Ldi { dr: r(1), offset: 1 },
        ]));
        cpu.mem.write(0x3002, 0xFE00);
        cpu.mem.write(0x3003, 0xFE02);
        let mut io = BufferConsole::with_input(b"k");

        cpu.step(&mut io).unwrap();
        assert_eq!(cpu.regs[r(0)], 0x8000);
        assert_eq!(cpu.regs.cond, Flag::Neg);

        cpu.step(&mut io).unwrap();
        assert_eq!(cpu.regs[r(1)], b'k' as Word);
    }

    #[test]
    fn test_run_limited_stops() {
        // BRnzp #-1: spin forever.
        let mut cpu = cpu_with(&[0x0FFF]);
        let executed = cpu.run_limited(&mut BufferConsole::new(), 100).unwrap();

        assert_eq!(executed, 100);
        assert!(cpu.is_running());
        assert_eq!(cpu.regs.pc, 0x3000);
    }

    #[test]
    fn test_countdown_loop() {
        // R1 = 5; loop: R0 += 2, R1 -= 1, BRp loop; HALT
        let program = make_program(&[
            Instruction::And { dr: r(0), sr1: r(0), op: Operand::Imm(0) },
            Instruction::Add { dr: r(1), sr1: r(0), op: Operand::Imm(5) },
            Instruction::Add { dr: r(0), sr1: r(0), op: Operand::Imm(2) },
            Instruction::Add { dr: r(1), sr1: r(1), op: Operand::Imm(0xFFFF) },
            Instruction::Br { nzp: Flag::Pos.bits(), offset: 0xFFFD },
            Instruction::Trap { vector: 0x25 },
        ]);
        let mut cpu = cpu_with(&program);
        let mut io = BufferConsole::new();

        let executed = cpu.run(&mut io).unwrap();
        assert_eq!(cpu.regs[r(0)], 10);
        assert_eq!(cpu.regs[r(1)], 0);
        assert_eq!(executed, 2 + 5 * 3 + 1);
        assert_eq!(cpu.last_instruction(), Some(Instruction::Trap { vector: 0x25 }));
    }

    #[test]
    fn test_reset() {
        let mut cpu = cpu_with(&[HALT]);
        cpu.run(&mut BufferConsole::new()).unwrap();
        cpu.reset();

        assert!(cpu.is_running());
        assert_eq!(cpu.regs, Registers::new());
        assert_eq!(cpu.mem.peek(PC_START), 0);
        assert_eq!(cpu.last_instruction(), None);
    }
}
