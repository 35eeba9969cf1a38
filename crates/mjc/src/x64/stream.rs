use std::fmt::Write as _;

use super::Instruction;
use crate::{Error, Result};

/// One instruction as it sits in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emitted {
    pub instruction: Instruction,
    /// Byte offset of the first byte, relative to the start of the code.
    pub start: usize,
    pub bytes: Vec<u8>,
}

impl Emitted {
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn end(&self) -> usize {
        self.start + self.bytes.len()
    }
}

/// Append-only sequence of encoded instructions, addressable by index.
///
/// Instructions are encoded as they are appended, so `current_size` is
/// always the address of the next instruction. `patch` replaces an earlier
/// instruction in place and refuses any replacement whose encoding would
/// shift the instructions after it.
#[derive(Debug, Default, Clone)]
pub struct InstructionStream {
    instructions: Vec<Emitted>,
    size: usize,
}

impl InstructionStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes and appends `instruction`, returning its index.
    pub fn append(&mut self, instruction: Instruction) -> Result<usize> {
        let bytes = instruction.encode()?;
        let index = self.instructions.len();
        let start = self.size;
        self.size += bytes.len();
        self.instructions.push(Emitted {
            instruction,
            start,
            bytes,
        });
        Ok(index)
    }

    /// Byte length so far, which is also the address of the next append.
    #[must_use]
    pub const fn current_size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Emitted> {
        self.instructions.get(index)
    }

    /// Start address of the instruction at `index`.
    pub fn start_of(&self, index: usize) -> Result<usize> {
        self.get(index)
            .map(|e| e.start)
            .ok_or(Error::PatchOutOfRange {
                index,
                len: self.instructions.len(),
            })
    }

    /// Re-encodes `replacement` over the instruction at `index`.
    pub fn patch(&mut self, index: usize, replacement: Instruction) -> Result<()> {
        let len = self.instructions.len();
        let slot = self
            .instructions
            .get_mut(index)
            .ok_or(Error::PatchOutOfRange { index, len })?;
        let bytes = replacement.encode()?;
        if bytes.len() != slot.bytes.len() {
            return Err(Error::PatchLengthMismatch {
                index,
                expected: slot.bytes.len(),
                actual: bytes.len(),
            });
        }
        slot.instruction = replacement;
        slot.bytes = bytes;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Emitted> {
        self.instructions.iter()
    }

    /// Concatenated machine code.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size);
        for emitted in &self.instructions {
            out.extend_from_slice(&emitted.bytes);
        }
        out
    }

    /// `address  bytes  mnemonic` lines, with addresses offset by `base`.
    #[must_use]
    pub fn listing(&self, base: u64) -> String {
        let mut out = String::new();
        for emitted in &self.instructions {
            let hex = emitted
                .bytes
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(" ");
            let _ = writeln!(
                out,
                "{:08x}  {hex:<30} {}",
                base + emitted.start as u64,
                emitted.instruction
            );
        }
        out
    }
}
