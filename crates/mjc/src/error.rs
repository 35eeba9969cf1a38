use crate::diagnostics::Diagnostic;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid operand: {0}")]
    InvalidOperand(String),

    #[error("Patch index {index} out of range (stream holds {len} instructions)")]
    PatchOutOfRange { index: usize, len: usize },

    #[error("Patch at index {index} changes encoded length from {expected} to {actual} bytes")]
    PatchLengthMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Compilation failed with {} error(s): {}", .0.len(), summarize(.0))]
    CompilationFailed(Vec<Diagnostic>),

    #[error("Load address {0:#x} is not aligned to a {align:#x}-byte page", align = crate::elf::SEGMENT_ALIGN)]
    MisalignedLoadAddress(u64),

    #[error("No entry routine address was recorded")]
    MissingEntryPoint,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;
