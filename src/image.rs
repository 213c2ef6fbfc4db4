//! Object image format for LC-3 programs.
//!
//! An image is a flat byte stream of big-endian words:
//! - Word 0 is the origin, the address the payload is loaded at
//! - Every following word is stored at origin, origin + 1, ...
//!
//! There is no header, checksum or length field; the payload runs to the
//! end of the stream. Loading stops at the top of the address space.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use thiserror::Error;

use crate::cpu::memory::{Memory, MEMORY_SIZE};
use crate::word::{from_wire, to_wire, Word};

/// A parsed object image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Load address of the first payload word.
    pub origin: Word,
    /// Payload, already in native order.
    pub words: Vec<Word>,
}

/// Where an image landed in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
    pub origin: Word,
    pub len: usize,
}

impl Image {
    /// Create an image from words.
    pub fn new(origin: Word, words: Vec<Word>) -> Self {
        Self { origin, words }
    }

    /// Words that fit between `origin` and the end of memory.
    ///
    /// Computed at full width, so origin 0 allows all 65,536 words.
    pub fn capacity(origin: Word) -> usize {
        MEMORY_SIZE - origin as usize
    }

    /// Parse an image from a byte stream.
    ///
    /// Words past the end of the address space are dropped, as is a
    /// trailing odd byte; neither is an error.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, ImageError> {
        let mut origin = [0u8; 2];
        reader.read_exact(&mut origin).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => ImageError::MissingOrigin,
            _ => ImageError::Read(e),
        })?;
        let origin = from_wire(origin);

        let capacity = Self::capacity(origin);
        let mut payload = Vec::new();
        reader
            .by_ref()
            .take(capacity as u64 * 2)
            .read_to_end(&mut payload)?;

        if payload.len() % 2 != 0 {
            warn!("image has a trailing odd byte; ignored");
        }
        let mut probe = [0u8; 1];
        if payload.len() == capacity * 2 && reader.read(&mut probe)? > 0 {
            warn!("image at {:#06x} overflows memory; truncated to {} words", origin, capacity);
        }

        let words = payload
            .chunks_exact(2)
            .map(|pair| from_wire([pair[0], pair[1]]))
            .collect();

        Ok(Self { origin, words })
    }

    /// Copy the payload into memory.
    pub fn load_into(&self, mem: &mut Memory) -> LoadedImage {
        let len = mem.load(self.origin, &self.words);
        debug!("loaded {} words at {:#06x}", len, self.origin);
        LoadedImage {
            origin: self.origin,
            len,
        }
    }

    /// Serialize to the wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity((self.words.len() + 1) * 2);
        bytes.extend_from_slice(&to_wire(self.origin));
        for &word in &self.words {
            bytes.extend_from_slice(&to_wire(word));
        }
        bytes
    }

    /// Number of payload words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Check if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Parse an image from `reader` and load it into `mem`.
pub fn load_image<R: Read>(reader: R, mem: &mut Memory) -> Result<LoadedImage, ImageError> {
    Ok(Image::read_from(reader)?.load_into(mem))
}

/// Read an image file from disk.
pub fn read_image_file<P: AsRef<Path>>(path: P) -> Result<Image, ImageError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|source| ImageError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Image::read_from(io::BufReader::new(file))
}

/// Load an image file from disk into `mem`.
pub fn load_image_file<P: AsRef<Path>>(path: P, mem: &mut Memory) -> Result<LoadedImage, ImageError> {
    Ok(read_image_file(path)?.load_into(mem))
}

/// Errors that can occur while loading an image.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Read(#[from] io::Error),

    #[error("image is too short to hold an origin")]
    MissingOrigin,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> Result<Image, ImageError> {
        Image::read_from(bytes)
    }

    #[test]
    fn test_load_basic_image() {
        let mut mem = Memory::new();
        let bytes: [u8; 6] = [0x30, 0x00, 0x10, 0x21, 0xF0, 0x25];

        let loaded = load_image(&bytes[..], &mut mem).unwrap();
        assert_eq!(loaded, LoadedImage { origin: 0x3000, len: 2 });
        assert_eq!(mem.peek(0x3000), 0x1021);
        assert_eq!(mem.peek(0x3001), 0xF025);
        assert_eq!(mem.peek(0x3002), 0);
    }

    #[test]
    fn test_origin_only() {
        let image = parse(&[0x40, 0x00]).unwrap();
        assert_eq!(image.origin, 0x4000);
        assert!(image.is_empty());
    }

    #[test]
    fn test_missing_origin() {
        assert!(matches!(parse(&[]), Err(ImageError::MissingOrigin)));
        assert!(matches!(parse(&[0x30]), Err(ImageError::MissingOrigin)));
    }

    #[test]
    fn test_trailing_odd_byte_ignored() {
        let image = parse(&[0x30, 0x00, 0x12, 0x34, 0x56]).unwrap();
        assert_eq!(image.words, vec![0x1234]);
    }

    #[test]
    fn test_truncated_at_end_of_memory() {
        let mut mem = Memory::new();
        let image = Image::new(0xFFFE, vec![1, 2, 3, 4]);

        let loaded = load_image(image.to_bytes().as_slice(), &mut mem).unwrap();
        assert_eq!(loaded.len, 2);
        assert_eq!(mem.peek(0xFFFE), 1);
        assert_eq!(mem.peek(0xFFFF), 2);
        // Nothing wrapped around to the bottom of memory.
        assert_eq!(mem.peek(0x0000), 0);
        assert_eq!(mem.peek(0x0001), 0);
    }

    #[test]
    fn test_origin_zero_has_full_capacity() {
        assert_eq!(Image::capacity(0), 65_536);
        assert_eq!(Image::capacity(0x3000), 0xD000);
        assert_eq!(Image::capacity(0xFFFF), 1);

        let mut mem = Memory::new();
        let image = Image::new(0, vec![0xAAAA; MEMORY_SIZE]);
        let loaded = load_image(image.to_bytes().as_slice(), &mut mem).unwrap();
        assert_eq!(loaded.len, MEMORY_SIZE);
        assert_eq!(mem.peek(0), 0xAAAA);
        assert_eq!(mem.peek(0xFFFF), 0xAAAA);
    }

    #[test]
    fn test_to_bytes_is_big_endian() {
        let image = Image::new(0x3000, vec![0x1021, 0xF025]);
        assert_eq!(image.to_bytes(), vec![0x30, 0x00, 0x10, 0x21, 0xF0, 0x25]);
        assert_eq!(parse(&image.to_bytes()).unwrap(), image);
    }

    #[test]
    fn test_open_missing_file() {
        let mut mem = Memory::new();
        let err = load_image_file("/nonexistent/lc3/program.obj", &mut mem).unwrap_err();
        assert!(matches!(err, ImageError::Open { .. }));
        assert!(err.to_string().contains("program.obj"));
    }
}
