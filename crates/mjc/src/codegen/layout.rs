//! Field slots and per-routine frame offsets.

use std::collections::HashMap;

use crate::abi::{FIRST_LOCAL_OFFSET, FRAME_HEADER_SIZE, RECEIVER_OFFSET, WORD_SIZE};
use crate::ast::{FieldRef, MethodDecl, Program, VarId};

/// Where a field lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSlot {
    /// Byte offset within an instance of the owning class.
    Instance { offset: i32 },
    /// Byte offset within the shared static area.
    Static { offset: i32 },
}

/// Field slots for a whole program, assigned once before emission.
#[derive(Debug, Clone, Default)]
pub struct ProgramLayout {
    fields: HashMap<FieldRef, FieldSlot>,
    static_count: usize,
}

impl ProgramLayout {
    /// Non-static fields take sequential slots in their class; static fields
    /// take sequential slots in one area shared by all classes.
    #[must_use]
    pub fn new(program: &Program) -> Self {
        let mut fields = HashMap::new();
        let mut static_count = 0usize;

        for (class, decl) in program.classes.iter().enumerate() {
            let mut instance_count = 0usize;
            for (field, field_decl) in decl.fields.iter().enumerate() {
                let slot = if field_decl.is_static {
                    let slot = FieldSlot::Static {
                        offset: slot_offset(static_count),
                    };
                    static_count += 1;
                    slot
                } else {
                    let slot = FieldSlot::Instance {
                        offset: slot_offset(instance_count),
                    };
                    instance_count += 1;
                    slot
                };
                fields.insert(FieldRef { class, field }, slot);
            }
        }

        Self {
            fields,
            static_count,
        }
    }

    #[must_use]
    pub fn field(&self, field: FieldRef) -> Option<FieldSlot> {
        self.fields.get(&field).copied()
    }

    /// Static area size in bytes.
    #[must_use]
    pub fn static_size(&self) -> usize {
        self.static_count * WORD_SIZE as usize
    }
}

fn slot_offset(slot: usize) -> i32 {
    i32::try_from(slot).map_or(i32::MAX, |s| s.saturating_mul(WORD_SIZE))
}

/// Offset of the static area from the start of the code: the first 8-byte
/// boundary at or after the end of the code.
#[must_use]
pub const fn static_area_offset(code_len: usize) -> usize {
    code_len.next_multiple_of(WORD_SIZE as usize)
}

/// Frame-base offsets for one routine.
///
/// ```text
///   [rbp + 16 + 8k]  parameters (last parameter lowest)
///   [rbp + 16]       receiver (instance routines)
///   [rbp + 8]        return address
///   [rbp + 0]        saved rbp
///   [rbp - 8]        first local
/// ```
#[derive(Debug, Clone)]
pub struct FrameLayout {
    has_receiver: bool,
    param_count: usize,
    /// Live locals, innermost last. A local's slot is its position here.
    locals: Vec<VarId>,
}

impl FrameLayout {
    #[must_use]
    pub fn for_method(method: &MethodDecl) -> Self {
        Self {
            has_receiver: !method.is_static,
            param_count: method.params.len(),
            locals: Vec::new(),
        }
    }

    #[must_use]
    pub const fn receiver(&self) -> Option<i32> {
        if self.has_receiver {
            Some(RECEIVER_OFFSET)
        } else {
            None
        }
    }

    /// Arguments are pushed left to right, so the last one ends up closest
    /// to the frame base.
    #[must_use]
    pub fn param(&self, index: usize) -> Option<i32> {
        if index >= self.param_count {
            return None;
        }
        let first = if self.has_receiver {
            RECEIVER_OFFSET + WORD_SIZE
        } else {
            FRAME_HEADER_SIZE
        };
        let from_top = i32::try_from(self.param_count - 1 - index).ok()?;
        Some(first + WORD_SIZE * from_top)
    }

    /// Claims the next slot below the live locals.
    pub fn declare_local(&mut self, id: VarId) -> i32 {
        self.locals.push(id);
        local_offset(self.locals.len() - 1)
    }

    #[must_use]
    pub fn local(&self, id: VarId) -> Option<i32> {
        self.locals
            .iter()
            .rposition(|local| *local == id)
            .map(local_offset)
    }

    #[must_use]
    pub fn live_locals(&self) -> usize {
        self.locals.len()
    }

    #[must_use]
    pub fn scope_mark(&self) -> usize {
        self.locals.len()
    }

    /// Forgets locals declared since `mark`; returns how many were released.
    pub fn release_scope(&mut self, mark: usize) -> usize {
        let released = self.locals.len().saturating_sub(mark);
        self.locals.truncate(mark);
        released
    }
}

fn local_offset(slot: usize) -> i32 {
    i32::try_from(slot).map_or(i32::MIN, |s| FIRST_LOCAL_OFFSET - WORD_SIZE * s)
}
