//! # LC-3 Emulator
//!
//! An emulator for the LC-3, a 16-bit educational computer with a
//! 65,536-word address space, eight general purpose registers and a
//! 16-opcode instruction set.
//!
//! Load an object image into a [`Cpu`] and run it against any [`Console`]:
//!
//! ```
//! use lc3::{BufferConsole, Cpu, Image};
//!
//! // ADD R0, R0, #1 ; HALT
//! let image = Image::new(0x3000, vec![0x1021, 0xF025]);
//! let mut cpu = Cpu::new();
//! cpu.load_image(image.to_bytes().as_slice()).unwrap();
//!
//! let mut console = BufferConsole::new();
//! cpu.run(&mut console).unwrap();
//! assert_eq!(cpu.regs.r[0], 1);
//! assert_eq!(console.output_str(), "HALT\n");
//! ```

pub mod word;
pub mod cpu;
pub mod image;
pub mod io;

#[cfg(feature = "term")]
pub mod term;

// Re-export commonly used types
pub use word::{Word, sign_extend, byte_swap};
pub use cpu::{Cpu, CpuState, CpuError, Memory, Registers, Instruction, Reg, Flag};
pub use image::{Image, ImageError, LoadedImage, load_image, load_image_file};
pub use io::{Console, BufferConsole, StdioConsole};

#[cfg(feature = "term")]
pub use term::Terminal;
