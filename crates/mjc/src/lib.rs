#![allow(
    clippy::cast_possible_truncation, // intentional: displacements and immediates are packed into fixed-width fields
    clippy::cast_possible_wrap, // intentional: code offsets are usize, displacements are i32
    clippy::cast_sign_loss, // intentional: non-negative i32 slot offsets widen into u64 addresses
    clippy::missing_errors_doc // every fallible fn returns crate::Error, documented on the enum
)]

pub mod abi;
pub mod ast;
pub mod codegen;
pub mod diagnostics;
pub mod elf;
pub mod error;
pub mod x64;

/// Test harness module for writing unit and integration tests.
///
/// This module is only available when running tests or when the
/// `test-harness` feature is enabled.
#[cfg(any(test, feature = "test-harness"))]
pub mod test_harness;

pub use ast::Program;
pub use codegen::{CompileOptions, GeneratedCode, generate};
pub use diagnostics::{Diagnostic, ErrorReporter};
pub use elf::ElfExecutable;
pub use error::{Error, Result};

/// Compiles a resolved program into an executable image.
///
/// Returns [`Error::CompilationFailed`] with every recorded diagnostic if
/// generation reported any; no image is built in that case.
pub fn compile(program: &Program, options: &CompileOptions) -> Result<ElfExecutable> {
    let mut reporter = ErrorReporter::new();
    let generated = generate(program, options, &mut reporter)?;
    if reporter.has_errors() {
        return Err(Error::CompilationFailed(reporter.drain()));
    }
    ElfExecutable::from_generated(&generated, options.load_address)
}
