//! x86-64 Linux ABI constants (registers, frame layout, system calls).
//!
//! The code generator, runtime primitives, and tests all read the fixed
//! register convention and frame offsets from here.

use crate::x64::Reg64;

// ── Register Assignments ──

/// Frame-base register. Parameters sit above it, locals below.
pub const FRAME_BASE: Reg64 = Reg64::Rbp;

/// Operand stack pointer. Every expression leaves one word on this stack.
pub const STACK_PTR: Reg64 = Reg64::Rsp;

/// Return value register; also the left operand of binary operators.
pub const RETURN_VALUE_REG: Reg64 = Reg64::Rax;

/// Right operand of binary operators and array index.
pub const SCRATCH: Reg64 = Reg64::Rcx;

/// Value register for indexed stores.
pub const STORE_VALUE_REG: Reg64 = Reg64::Rbx;

/// Receives the 0/1 result of comparisons (via its low byte).
pub const FLAG_RESULT_REG: Reg64 = Reg64::Rdx;

// ── Stack Frame Layout ──

pub const WORD_SIZE: i32 = 8;

/// `[rbp + 0]` saved frame base, `[rbp + 8]` return address.
pub const FRAME_HEADER_SIZE: i32 = 16;

/// Offset of the receiver in instance routines.
pub const RECEIVER_OFFSET: i32 = FRAME_HEADER_SIZE;

/// Offset of the first local; later locals grow downwards.
pub const FIRST_LOCAL_OFFSET: i32 = -WORD_SIZE;

// ── System Calls ──

pub const SYS_WRITE: i32 = 1;
pub const SYS_MMAP: i32 = 9;
pub const SYS_EXIT: i32 = 60;

pub const STDOUT_FD: i32 = 1;

/// Size of every allocation, objects and arrays alike.
pub const ALLOCATION_SIZE: i32 = 0x1000;

/// `PROT_READ | PROT_WRITE`
pub const MMAP_PROT: i32 = 0x3;

/// `MAP_PRIVATE | MAP_ANONYMOUS`
pub const MMAP_FLAGS: i32 = 0x22;
