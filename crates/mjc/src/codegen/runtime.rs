//! Hand-written runtime routines, called by name like user routines.

use crate::abi::{
    ALLOCATION_SIZE, FRAME_BASE, FRAME_HEADER_SIZE, MMAP_FLAGS, MMAP_PROT,
    RETURN_VALUE_REG, STACK_PTR, STDOUT_FD, SYS_EXIT, SYS_MMAP, SYS_WRITE,
};
use crate::x64::{AluOp, Instruction, Reg64};

/// Routine name of the allocator.
pub const ALLOC_ROUTINE: &str = "_alloc";

/// Routine name of the built-in output operation.
pub const PRINTLN_ROUTINE: &str = "System.out.println";

/// `_alloc`: maps one fresh zero-filled region and returns its address in rax.
///
/// Every allocation gets exactly [`ALLOCATION_SIZE`] bytes, whatever the
/// object or array needs. Regions are never unmapped.
#[must_use]
pub fn allocation_routine() -> Vec<Instruction> {
    vec![
        Instruction::mov_imm(RETURN_VALUE_REG, SYS_MMAP),
        // addr = NULL
        Instruction::alu(AluOp::Xor, Reg64::Rdi, Reg64::Rdi),
        Instruction::mov_imm(Reg64::Rsi, ALLOCATION_SIZE),
        Instruction::mov_imm(Reg64::Rdx, MMAP_PROT),
        Instruction::mov_imm(Reg64::R10, MMAP_FLAGS),
        // fd = -1
        Instruction::mov_imm(Reg64::R8, -1),
        Instruction::alu(AluOp::Xor, Reg64::R9, Reg64::R9),
        Instruction::Syscall,
        Instruction::Ret,
    ]
}

/// `System.out.println(x)`: writes the low byte of its one argument to stdout.
///
/// The argument word is written straight out of the caller's stack slot.
#[must_use]
pub fn println_routine() -> Vec<Instruction> {
    let mut routine = prologue();
    routine.extend([
        Instruction::mov_imm(RETURN_VALUE_REG, SYS_WRITE),
        Instruction::mov_imm(Reg64::Rdi, STDOUT_FD),
        Instruction::lea(Reg64::Rsi, FRAME_BASE, FRAME_HEADER_SIZE),
        Instruction::mov_imm(Reg64::Rdx, 1),
        Instruction::Syscall,
    ]);
    routine.extend(epilogue());
    routine
}

/// `push rbp; mov rbp, rsp`
#[must_use]
pub fn prologue() -> Vec<Instruction> {
    vec![
        Instruction::push(FRAME_BASE),
        Instruction::mov(FRAME_BASE, STACK_PTR),
    ]
}

/// `mov rsp, rbp; pop rbp; ret`
#[must_use]
pub fn epilogue() -> Vec<Instruction> {
    vec![
        Instruction::mov(STACK_PTR, FRAME_BASE),
        Instruction::pop(FRAME_BASE),
        Instruction::Ret,
    ]
}

/// Terminates the process with status 0; the entry routine has nowhere to return to.
#[must_use]
pub fn exit_sequence() -> Vec<Instruction> {
    vec![
        Instruction::mov_imm(RETURN_VALUE_REG, SYS_EXIT),
        // status = 0
        Instruction::alu(AluOp::Xor, Reg64::Rdi, Reg64::Rdi),
        Instruction::Syscall,
    ]
}
