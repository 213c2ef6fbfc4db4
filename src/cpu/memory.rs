//! LC-3 memory subsystem.
//!
//! The LC-3 addresses 65,536 sixteen-bit words. Two addresses near the top
//! of the space are device registers for the keyboard rather than storage.

use std::io;

use crate::io::Console;
use crate::word::Word;

/// The number of addressable words.
pub const MEMORY_SIZE: usize = 1 << 16;

/// Keyboard status register. Bit 15 is set while a key is waiting.
pub const KBSR: Word = 0xFE00;

/// Keyboard data register. Holds the last key latched by a KBSR read.
pub const KBDR: Word = 0xFE02;

/// LC-3 memory: 65,536 words.
#[derive(Clone)]
pub struct Memory {
    cells: Vec<Word>,
}

impl Memory {
    /// Create a new memory with all cells zeroed.
    pub fn new() -> Self {
        Self {
            cells: vec![0; MEMORY_SIZE],
        }
    }

    /// Read a word as the CPU sees it.
    ///
    /// Reading [`KBSR`] polls the console on every read: if a key is
    /// pending it is latched into [`KBDR`] and the ready bit is set,
    /// otherwise the status is cleared. No other address has side effects.
    pub fn read(&mut self, addr: Word, io: &mut dyn Console) -> io::Result<Word> {
        if addr == KBSR {
            if io.key_available() {
                self.cells[KBSR as usize] = 1 << 15;
                self.cells[KBDR as usize] = io.read_key()? as Word;
            } else {
                self.cells[KBSR as usize] = 0;
            }
        }
        Ok(self.cells[addr as usize])
    }

    /// Read a word without device side effects.
    #[inline]
    pub fn peek(&self, addr: Word) -> Word {
        self.cells[addr as usize]
    }

    /// Write a word.
    #[inline]
    pub fn write(&mut self, addr: Word, value: Word) {
        self.cells[addr as usize] = value;
    }

    /// Clear all memory to zeros.
    pub fn clear(&mut self) {
        self.cells.fill(0);
    }

    /// Copy `words` in starting at `origin`, stopping at the end of memory.
    ///
    /// Returns the number of words written.
    pub fn load(&mut self, origin: Word, words: &[Word]) -> usize {
        let start = origin as usize;
        let count = words.len().min(MEMORY_SIZE - start);
        self.cells[start..start + count].copy_from_slice(&words[..count]);
        count
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_zero = self.cells.iter().filter(|&&cell| cell != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_cells", &non_zero)
            .field("total_cells", &MEMORY_SIZE)
            .finish()
    }
}
