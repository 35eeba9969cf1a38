// x86-64 encoding packs register numbers and displacements with explicit 'as' casts.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

mod instruction;
mod operand;
mod register;
mod stream;

pub use instruction::{AluOp, Instruction, Rel};
pub use operand::Operand;
pub use register::{Condition, Reg64, Scale};
pub use stream::{Emitted, InstructionStream};
