//! CPU emulation for the LC-3.
//!
//! This module implements the complete LC-3 architecture:
//! - 65,536 sixteen-bit memory words with a memory-mapped keyboard
//! - R0-R7, PC and the N/Z/P condition flags
//! - 14 defined opcodes and the six console trap routines

pub mod memory;
pub mod registers;
pub mod decode;
pub mod execute;
pub mod trap;

pub use memory::Memory;
pub use registers::{Flag, Reg, Registers};
pub use decode::{Instruction, Operand, DecodeError};
pub use execute::{Cpu, CpuError, CpuState};
pub use trap::TrapCode;
