// ELF header fields are fixed-width; sizes are checked against u64 on the way in.
#![allow(clippy::cast_possible_truncation)]

use std::path::Path;

use crate::codegen::{GeneratedCode, static_area_offset};
use crate::{Error, Result};

pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const EV_CURRENT: u8 = 1;
const ELFOSABI_SYSV: u8 = 0;

pub const ET_EXEC: u16 = 2;
pub const EM_X86_64: u16 = 62;
pub const PT_LOAD: u32 = 1;

pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

pub const ELF_HEADER_SIZE: usize = 64;
pub const PROGRAM_HEADER_SIZE: usize = 56;

/// File offset of the first code byte: right after the one program header.
pub const CODE_OFFSET: usize = ELF_HEADER_SIZE + PROGRAM_HEADER_SIZE;

pub const DEFAULT_LOAD_ADDRESS: u64 = 0x40_0000;
pub const SEGMENT_ALIGN: u64 = 0x1000;

/// Virtual address of code byte `offset` when the image is loaded at `load_address`.
#[must_use]
pub const fn code_address(load_address: u64, offset: usize) -> u64 {
    load_address + (CODE_OFFSET + offset) as u64
}

/// A minimal static executable: one header, one loadable segment, no sections.
///
/// The segment maps the whole file (headers included) at the load address.
/// Any zero-initialized data follows the code in memory only.
#[derive(Debug, Clone)]
pub struct ElfExecutable {
    code: Vec<u8>,
    entry_offset: usize,
    load_address: u64,
    bss_size: usize,
}

impl ElfExecutable {
    #[must_use]
    pub fn new(code: Vec<u8>, entry_offset: usize) -> Self {
        Self {
            code,
            entry_offset,
            load_address: DEFAULT_LOAD_ADDRESS,
            bss_size: 0,
        }
    }

    /// The segment is mapped at `address`, so it must sit on a page boundary.
    pub fn with_load_address(mut self, address: u64) -> Result<Self> {
        if address % SEGMENT_ALIGN != 0 {
            return Err(Error::MisalignedLoadAddress(address));
        }
        self.load_address = address;
        Ok(self)
    }

    /// Zero-filled bytes reserved after the (8-byte aligned) code.
    #[must_use]
    pub fn with_bss_size(mut self, size: usize) -> Self {
        self.bss_size = size;
        self
    }

    /// Packages generated code. Fails if no entry routine was generated or
    /// `load_address` is not page-aligned.
    pub fn from_generated(generated: &GeneratedCode, load_address: u64) -> Result<Self> {
        let entry = generated.entry.ok_or(Error::MissingEntryPoint)?;
        Ok(Self::new(generated.stream.to_bytes(), entry)
            .with_load_address(load_address)?
            .with_bss_size(generated.static_size))
    }

    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    #[must_use]
    pub fn load_address(&self) -> u64 {
        self.load_address
    }

    #[must_use]
    pub fn entry_address(&self) -> u64 {
        code_address(self.load_address, self.entry_offset)
    }

    fn file_size(&self) -> u64 {
        (CODE_OFFSET + self.code.len()) as u64
    }

    fn memory_size(&self) -> u64 {
        if self.bss_size == 0 {
            self.file_size()
        } else {
            (CODE_OFFSET + static_area_offset(self.code.len()) + self.bss_size) as u64
        }
    }

    fn segment_flags(&self) -> u32 {
        if self.bss_size == 0 {
            PF_R | PF_X
        } else {
            PF_R | PF_W | PF_X
        }
    }

    /// Serializes the image.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CODE_OFFSET + self.code.len());

        // e_ident
        out.extend_from_slice(&ELF_MAGIC);
        out.extend_from_slice(&[ELFCLASS64, ELFDATA2LSB, EV_CURRENT, ELFOSABI_SYSV]);
        out.extend_from_slice(&[0u8; 8]);

        out.extend_from_slice(&ET_EXEC.to_le_bytes());
        out.extend_from_slice(&EM_X86_64.to_le_bytes());
        out.extend_from_slice(&u32::from(EV_CURRENT).to_le_bytes());
        out.extend_from_slice(&self.entry_address().to_le_bytes());
        out.extend_from_slice(&(ELF_HEADER_SIZE as u64).to_le_bytes()); // e_phoff
        out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&(ELF_HEADER_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&(PROGRAM_HEADER_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
        debug_assert_eq!(out.len(), ELF_HEADER_SIZE);

        out.extend_from_slice(&PT_LOAD.to_le_bytes());
        out.extend_from_slice(&self.segment_flags().to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // p_offset
        out.extend_from_slice(&self.load_address.to_le_bytes()); // p_vaddr
        out.extend_from_slice(&self.load_address.to_le_bytes()); // p_paddr
        out.extend_from_slice(&self.file_size().to_le_bytes());
        out.extend_from_slice(&self.memory_size().to_le_bytes());
        out.extend_from_slice(&SEGMENT_ALIGN.to_le_bytes());
        debug_assert_eq!(out.len(), CODE_OFFSET);

        out.extend_from_slice(&self.code);
        out
    }

    /// Writes the image to `path` and marks it executable.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.encode())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
        }
        tracing::info!(
            "wrote {} ({} bytes, entry {:#x})",
            path.display(),
            CODE_OFFSET + self.code.len(),
            self.entry_address()
        );
        Ok(())
    }
}
