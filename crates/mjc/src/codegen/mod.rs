//! Tree walk producing x86-64 machine code.
//!
//! Values travel on the machine stack: every expression pushes exactly one
//! word and every consumer pops what it needs into fixed scratch registers.
//! Calls to routines that have not been emitted yet are placeholders queued
//! in the [`PatchTable`] and rewritten the moment their target starts.

mod layout;
mod patch;
mod runtime;
mod stack;

use std::collections::BTreeMap;

pub use layout::{FieldSlot, FrameLayout, ProgramLayout, static_area_offset};
pub use patch::{PatchTable, PendingCall};
pub use runtime::{ALLOC_ROUTINE, PRINTLN_ROUTINE};

use crate::abi::{
    FLAG_RESULT_REG, FRAME_BASE, RETURN_VALUE_REG, SCRATCH, STACK_PTR, STORE_VALUE_REG, WORD_SIZE,
};
use crate::ast::{
    BinaryOp, Expression, FieldRef, Literal, LocalRef, Member, MethodDecl, MethodRef, Program,
    Reference, Statement, TypeDenoter, UnaryOp,
};
use crate::diagnostics::{Diagnostic, ErrorReporter};
use crate::elf::{DEFAULT_LOAD_ADDRESS, code_address};
use crate::x64::{AluOp, Condition, Instruction, InstructionStream, Operand, Reg64, Rel, Scale};
use crate::{Error, Result};
use stack::StackDepth;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Virtual address the image is loaded at.
    pub load_address: u64,
    /// Name of the entry routine.
    pub entry_name: String,
    /// Restricts the entry routine search to one class.
    pub entry_class: Option<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            load_address: DEFAULT_LOAD_ADDRESS,
            entry_name: "main".to_string(),
            entry_class: None,
        }
    }
}

/// Output of a generation run.
#[derive(Debug, Default)]
pub struct GeneratedCode {
    pub stream: InstructionStream,
    /// Code offset of the entry routine. `None` if generation never reached it.
    pub entry: Option<usize>,
    /// Bytes of static area to reserve after the code.
    pub static_size: usize,
    /// Start offset of every emitted routine, runtime routines included.
    pub routines: BTreeMap<String, usize>,
}

impl GeneratedCode {
    #[must_use]
    pub fn code(&self) -> Vec<u8> {
        self.stream.to_bytes()
    }

    #[must_use]
    pub fn routine_start(&self, name: &str) -> Option<usize> {
        self.routines.get(name).copied()
    }

    /// Annotated listing with load-time addresses.
    #[must_use]
    pub fn listing(&self, load_address: u64) -> String {
        self.stream.listing(code_address(load_address, 0))
    }
}

/// Generates code for `program`.
///
/// Entry point problems are reported to `reporter` and stop generation
/// before anything is emitted. Unresolved calls are reported after the whole
/// tree has been walked. `Err` is reserved for internal failures.
pub fn generate(
    program: &Program,
    options: &CompileOptions,
    reporter: &mut ErrorReporter,
) -> Result<GeneratedCode> {
    let Some(entry) = find_entry(program, options, reporter) else {
        return Ok(GeneratedCode::default());
    };

    let mut generator = CodeGenerator::new(program, options);
    generator.emit_runtime()?;
    for (method, decl) in program.methods() {
        generator.routine(method, decl, method == entry)?;
    }
    generator.finish(reporter)
}

/// Whether `decl` has the shape `public static void <name>(String[] args)`.
#[must_use]
pub fn is_entry_shape(decl: &MethodDecl, name: &str) -> bool {
    let takes_args = matches!(
        decl.params.as_slice(),
        [param] if matches!(&param.ty, TypeDenoter::Array(element) if is_args_element(element))
    );
    decl.name == name
        && !decl.is_private
        && decl.is_static
        && decl.return_type == TypeDenoter::Void
        && takes_args
}

/// `String` is opaque to the language; a front end may hand it over either way.
fn is_args_element(ty: &TypeDenoter) -> bool {
    match ty {
        TypeDenoter::Unsupported => true,
        TypeDenoter::Class(name) => name == "String",
        _ => false,
    }
}

fn find_entry(
    program: &Program,
    options: &CompileOptions,
    reporter: &mut ErrorReporter,
) -> Option<MethodRef> {
    let candidates: Vec<MethodRef> = program
        .methods()
        .filter(|(method, decl)| {
            let in_class = options
                .entry_class
                .as_ref()
                .is_none_or(|class| program.classes[method.class].name == *class);
            in_class && is_entry_shape(decl, &options.entry_name)
        })
        .map(|(method, _)| method)
        .collect();

    match candidates.as_slice() {
        [entry] => Some(*entry),
        [] => {
            reporter.report(Diagnostic::NoEntryPoint {
                name: options.entry_name.clone(),
            });
            None
        }
        _ => {
            reporter.report(Diagnostic::MultipleEntryPoints {
                name: options.entry_name.clone(),
                candidates: candidates
                    .iter()
                    .filter_map(|m| program.routine_name(*m))
                    .collect(),
            });
            None
        }
    }
}

/// Name for a call target the tree references but never declares.
fn dangling_routine_name(program: &Program, method: MethodRef) -> String {
    match program.classes.get(method.class) {
        Some(class) => format!("{}.#{}", class.name, method.method),
        None => format!("#{}.#{}", method.class, method.method),
    }
}

/// Whether a reference is evaluated for its value or for the address it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Value,
    Address,
}

/// Who a call passes as the receiver.
enum Receiver<'r> {
    Static,
    This,
    Base(&'r Reference),
}

/// A forward jump waiting for its landing address.
#[derive(Debug, Clone, Copy)]
struct Fixup {
    index: usize,
    origin: usize,
}

/// A `movabs rax, <static slot>` waiting for the final code size.
#[derive(Debug, Clone, Copy)]
struct StaticLoad {
    index: usize,
    offset: i32,
}

/// Per-routine state.
struct RoutineContext {
    frame: FrameLayout,
    is_entry: bool,
}

pub(crate) struct CodeGenerator<'a> {
    program: &'a Program,
    options: &'a CompileOptions,
    layout: ProgramLayout,
    stream: InstructionStream,
    patches: PatchTable,
    routines: BTreeMap<String, usize>,
    static_loads: Vec<StaticLoad>,
    stack: StackDepth,
    entry: Option<usize>,
}

impl<'a> CodeGenerator<'a> {
    pub(crate) fn new(program: &'a Program, options: &'a CompileOptions) -> Self {
        Self {
            program,
            options,
            layout: ProgramLayout::new(program),
            stream: InstructionStream::new(),
            patches: PatchTable::new(),
            routines: BTreeMap::new(),
            static_loads: Vec::new(),
            stack: StackDepth::new(),
            entry: None,
        }
    }

    // ── Routines ──

    fn emit_runtime(&mut self) -> Result<()> {
        for (name, body) in [
            (ALLOC_ROUTINE, runtime::allocation_routine()),
            (PRINTLN_ROUTINE, runtime::println_routine()),
        ] {
            self.begin_routine(name)?;
            self.emit_untracked(body)?;
        }
        Ok(())
    }

    /// Records the routine's start and resolves every call already waiting on it.
    fn begin_routine(&mut self, name: &str) -> Result<usize> {
        let start = self.stream.current_size();
        let pending = self.patches.take(name);
        for call in &pending {
            self.retarget(call.index, call.origin, start)?;
        }
        self.routines.insert(name.to_string(), start);
        tracing::debug!(
            "routine {name} at {start:#x} ({} earlier call site(s) patched)",
            pending.len()
        );
        Ok(start)
    }

    fn routine(&mut self, method: MethodRef, decl: &MethodDecl, is_entry: bool) -> Result<()> {
        let name = self
            .program
            .routine_name(method)
            .ok_or_else(|| Error::Internal(format!("unknown routine {method:?}")))?;
        let start = self.begin_routine(&name)?;
        if is_entry {
            self.entry = Some(start);
        }

        let mut ctx = RoutineContext {
            frame: FrameLayout::for_method(decl),
            is_entry,
        };
        self.stack.reset();
        self.emit_untracked(runtime::prologue())?;
        for stmt in &decl.body {
            self.statement(stmt, &mut ctx)?;
        }
        self.routine_exit(&ctx)?;

        tracing::trace!(
            "routine {name}: {} bytes, max operand depth {}",
            self.stream.current_size() - start,
            self.stack.max_depth()
        );
        Ok(())
    }

    /// Epilogue, or process exit for the entry routine.
    fn routine_exit(&mut self, ctx: &RoutineContext) -> Result<()> {
        if ctx.is_entry {
            self.emit_untracked(runtime::exit_sequence())
        } else {
            self.emit_untracked(runtime::epilogue())
        }
    }

    fn finish(mut self, reporter: &mut ErrorReporter) -> Result<GeneratedCode> {
        for (routine, calls) in self.patches.routines() {
            reporter.report(Diagnostic::UnresolvedCall {
                routine: routine.to_string(),
                sites: calls.len(),
            });
        }

        let code_len = self.stream.current_size();
        let static_base = code_address(self.options.load_address, static_area_offset(code_len));
        for load in &self.static_loads {
            let offset = u64::try_from(load.offset)
                .map_err(|_| Error::Internal(format!("negative static slot {}", load.offset)))?;
            self.stream.patch(
                load.index,
                Instruction::MovAbs {
                    dst: RETURN_VALUE_REG,
                    value: static_base + offset,
                },
            )?;
        }

        let static_size = self.layout.static_size();
        tracing::info!(
            "generated {code_len} bytes in {} routines, entry {:?}, {static_size} bytes of statics",
            self.routines.len(),
            self.entry
        );
        Ok(GeneratedCode {
            stream: self.stream,
            entry: self.entry,
            static_size,
            routines: self.routines,
        })
    }

    // ── Emission helpers ──

    /// Appends one instruction and accounts for its effect on the operand stack.
    fn emit(&mut self, instruction: Instruction) -> Result<usize> {
        let effect = instruction.stack_effect();
        let index = self.stream.append(instruction)?;
        if effect >= 0 {
            self.stack.push(effect.unsigned_abs());
        } else {
            self.stack.pop(effect.unsigned_abs())?;
        }
        Ok(index)
    }

    /// Appends frame bookkeeping that sits outside the operand stack.
    fn emit_untracked(&mut self, instructions: Vec<Instruction>) -> Result<()> {
        for instruction in instructions {
            self.stream.append(instruction)?;
        }
        Ok(())
    }

    fn emit_placeholder(&mut self, instruction: Instruction) -> Result<Fixup> {
        let origin = self.stream.current_size();
        let index = self.emit(instruction)?;
        Ok(Fixup { index, origin })
    }

    /// Lands `fixup` on the next instruction to be emitted.
    fn land_here(&mut self, fixup: Fixup) -> Result<()> {
        let target = self.stream.current_size();
        self.retarget(fixup.index, fixup.origin, target)
    }

    fn retarget(&mut self, index: usize, origin: usize, target: usize) -> Result<()> {
        let current = self.stream.get(index).ok_or(Error::PatchOutOfRange {
            index,
            len: self.stream.len(),
        })?;
        let replacement = current.instruction.retarget(origin, target)?;
        tracing::trace!("patch #{index} at {origin:#x} -> {target:#x}");
        self.stream.patch(index, replacement)
    }

    fn emit_call(&mut self, routine: &str) -> Result<()> {
        let origin = self.stream.current_size();
        if let Some(&target) = self.routines.get(routine) {
            self.emit(Instruction::call(origin, target)?)?;
        } else {
            let index = self.emit(Instruction::Call { rel: 0 })?;
            self.patches.record(routine, PendingCall { index, origin });
        }
        Ok(())
    }

    fn release_words(&mut self, words: usize) -> Result<()> {
        if words == 0 {
            return Ok(());
        }
        let bytes = i32::try_from(words)
            .ok()
            .and_then(|w| w.checked_mul(WORD_SIZE))
            .ok_or_else(|| Error::Internal(format!("cannot release {words} stack words")))?;
        self.emit(Instruction::alu_imm(AluOp::Add, STACK_PTR, bytes))?;
        Ok(())
    }

    fn check_balance(&self, ctx: &RoutineContext) -> Result<()> {
        let live = ctx.frame.live_locals();
        if self.stack.depth() == live {
            Ok(())
        } else {
            Err(Error::Internal(format!(
                "operand stack holds {} word(s) after a statement, expected {live}",
                self.stack.depth()
            )))
        }
    }

    /// `[rax + rcx*8]`
    fn element(reg: Option<Reg64>) -> Result<Operand> {
        Operand::indexed(RETURN_VALUE_REG, SCRATCH, Scale::Eight, 0, reg)
    }

    // ── Statements ──

    fn statement(&mut self, stmt: &Statement, ctx: &mut RoutineContext) -> Result<()> {
        match stmt {
            Statement::Block(body) => self.scoped(body, ctx)?,
            Statement::VarDecl { var, init } => {
                let offset = ctx.frame.declare_local(var.id);
                self.emit(Instruction::PushImm { value: 0 })?;
                self.expression(init, ctx)?;
                self.emit(Instruction::pop(RETURN_VALUE_REG))?;
                self.emit(Instruction::store(FRAME_BASE, offset, RETURN_VALUE_REG))?;
            }
            Statement::Assign { target, value } => {
                self.reference(target, Mode::Address, ctx)?;
                self.expression(value, ctx)?;
                self.emit(Instruction::pop(SCRATCH))?;
                self.emit(Instruction::pop(RETURN_VALUE_REG))?;
                self.emit(Instruction::store(RETURN_VALUE_REG, 0, SCRATCH))?;
            }
            Statement::IndexedAssign {
                array,
                index,
                value,
            } => {
                self.reference(array, Mode::Value, ctx)?;
                self.expression(index, ctx)?;
                self.expression(value, ctx)?;
                self.emit(Instruction::pop(STORE_VALUE_REG))?;
                self.emit(Instruction::pop(SCRATCH))?;
                self.emit(Instruction::pop(RETURN_VALUE_REG))?;
                self.emit(Instruction::MovStore {
                    operand: Self::element(Some(STORE_VALUE_REG))?,
                })?;
            }
            Statement::Call { callee, args } => self.call(callee, args, ctx)?,
            Statement::Return(value) => {
                if let Some(value) = value {
                    self.expression(value, ctx)?;
                    self.emit(Instruction::pop(RETURN_VALUE_REG))?;
                }
                self.routine_exit(ctx)?;
            }
            Statement::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.condition(cond, ctx)?;
                let skip = self.emit_placeholder(Instruction::Jcc {
                    cond: Condition::Equal,
                    rel: Rel::Near(0),
                })?;
                self.scoped(std::slice::from_ref(then_branch.as_ref()), ctx)?;
                if let Some(else_branch) = else_branch {
                    let over = self.emit_placeholder(Instruction::Jmp { rel: Rel::Near(0) })?;
                    self.land_here(skip)?;
                    self.scoped(std::slice::from_ref(else_branch.as_ref()), ctx)?;
                    self.land_here(over)?;
                } else {
                    self.land_here(skip)?;
                }
            }
            Statement::While { cond, body } => {
                let top = self.stream.current_size();
                self.condition(cond, ctx)?;
                let exit = self.emit_placeholder(Instruction::Jcc {
                    cond: Condition::Equal,
                    rel: Rel::Near(0),
                })?;
                self.scoped(std::slice::from_ref(body.as_ref()), ctx)?;
                let origin = self.stream.current_size();
                self.emit(Instruction::jmp_fitted(origin, top)?)?;
                self.land_here(exit)?;
            }
        }
        self.check_balance(ctx)
    }

    /// Emits `body`, then drops the locals it declared.
    fn scoped(&mut self, body: &[Statement], ctx: &mut RoutineContext) -> Result<()> {
        let mark = ctx.frame.scope_mark();
        for stmt in body {
            self.statement(stmt, ctx)?;
        }
        let released = ctx.frame.release_scope(mark);
        self.release_words(released)
    }

    /// Leaves the flags of `cond != 0` without pushing anything.
    fn condition(&mut self, cond: &Expression, ctx: &mut RoutineContext) -> Result<()> {
        self.expression(cond, ctx)?;
        self.emit(Instruction::pop(RETURN_VALUE_REG))?;
        self.emit(Instruction::alu_imm(AluOp::Cmp, RETURN_VALUE_REG, 0))?;
        Ok(())
    }

    // ── Expressions ──

    fn expression(&mut self, expr: &Expression, ctx: &mut RoutineContext) -> Result<()> {
        match expr {
            Expression::Literal(literal) => {
                let value = match literal {
                    Literal::Int(v) => *v,
                    Literal::Bool(b) => i32::from(*b),
                    Literal::Null => 0,
                };
                self.emit(Instruction::PushImm { value })?;
            }
            Expression::Ref(reference) => self.reference(reference, Mode::Value, ctx)?,
            Expression::Index { array, index } => {
                self.reference(array, Mode::Value, ctx)?;
                self.expression(index, ctx)?;
                self.emit(Instruction::pop(SCRATCH))?;
                self.emit(Instruction::pop(RETURN_VALUE_REG))?;
                self.emit(Instruction::MovLoad {
                    operand: Self::element(Some(RETURN_VALUE_REG))?,
                })?;
                self.emit(Instruction::push(RETURN_VALUE_REG))?;
            }
            Expression::Unary { op, operand } => {
                self.expression(operand, ctx)?;
                self.emit(Instruction::pop(RETURN_VALUE_REG))?;
                self.emit(match op {
                    UnaryOp::Not => Instruction::alu_imm(AluOp::Xor, RETURN_VALUE_REG, 1),
                    UnaryOp::Neg => Instruction::Neg {
                        operand: Operand::reg(RETURN_VALUE_REG),
                    },
                })?;
                self.emit(Instruction::push(RETURN_VALUE_REG))?;
            }
            Expression::Binary { op, left, right } => {
                self.expression(left, ctx)?;
                self.expression(right, ctx)?;
                self.emit(Instruction::pop(SCRATCH))?;
                self.emit(Instruction::pop(RETURN_VALUE_REG))?;
                self.binary(*op)?;
            }
            Expression::Call { callee, args } => {
                self.call(callee, args, ctx)?;
                self.emit(Instruction::push(RETURN_VALUE_REG))?;
            }
            Expression::NewObject { .. } => {
                self.emit_call(ALLOC_ROUTINE)?;
                self.emit(Instruction::push(RETURN_VALUE_REG))?;
            }
            Expression::NewArray { size, .. } => {
                // Every allocation has the same size; the length is evaluated and dropped.
                self.expression(size, ctx)?;
                self.emit(Instruction::pop(SCRATCH))?;
                self.emit_call(ALLOC_ROUTINE)?;
                self.emit(Instruction::push(RETURN_VALUE_REG))?;
            }
        }
        Ok(())
    }

    /// Combines rax (left) and rcx (right) and pushes the result.
    fn binary(&mut self, op: BinaryOp) -> Result<()> {
        let cond = match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::And | BinaryOp::Or => {
                let alu = match op {
                    BinaryOp::Add => AluOp::Add,
                    BinaryOp::Sub => AluOp::Sub,
                    BinaryOp::And => AluOp::And,
                    _ => AluOp::Or,
                };
                self.emit(Instruction::alu(alu, RETURN_VALUE_REG, SCRATCH))?;
                self.emit(Instruction::push(RETURN_VALUE_REG))?;
                return Ok(());
            }
            BinaryOp::Mul => {
                self.emit(Instruction::Imul {
                    operand: Operand::pair(SCRATCH, RETURN_VALUE_REG),
                })?;
                self.emit(Instruction::push(RETURN_VALUE_REG))?;
                return Ok(());
            }
            BinaryOp::Div => {
                self.emit(Instruction::Cqo)?;
                self.emit(Instruction::Idiv {
                    operand: Operand::reg(SCRATCH),
                })?;
                self.emit(Instruction::push(RETURN_VALUE_REG))?;
                return Ok(());
            }
            BinaryOp::Eq => Condition::Equal,
            BinaryOp::Ne => Condition::NotEqual,
            BinaryOp::Lt => Condition::Less,
            BinaryOp::Le => Condition::LessEqual,
            BinaryOp::Gt => Condition::Greater,
            BinaryOp::Ge => Condition::GreaterEqual,
        };
        // Clear before the compare: xor would clobber the flags afterwards.
        self.emit(Instruction::alu(AluOp::Xor, FLAG_RESULT_REG, FLAG_RESULT_REG))?;
        self.emit(Instruction::alu(AluOp::Cmp, RETURN_VALUE_REG, SCRATCH))?;
        self.emit(Instruction::SetCc {
            cond,
            dst: FLAG_RESULT_REG,
        })?;
        self.emit(Instruction::push(FLAG_RESULT_REG))?;
        Ok(())
    }

    /// Pushes arguments left to right, then the receiver, calls, and pops them
    /// again. The result is left in rax.
    fn call(
        &mut self,
        callee: &Reference,
        args: &[Expression],
        ctx: &mut RoutineContext,
    ) -> Result<()> {
        let (routine, receiver) = self.call_target(callee)?;
        for arg in args {
            self.expression(arg, ctx)?;
        }
        let mut words = args.len();
        match receiver {
            Receiver::Static => {}
            Receiver::This => {
                self.this(ctx)?;
                words += 1;
            }
            Receiver::Base(base) => {
                self.reference(base, Mode::Value, ctx)?;
                words += 1;
            }
        }
        self.emit_call(&routine)?;
        self.release_words(words)
    }

    fn call_target<'r>(&self, callee: &'r Reference) -> Result<(String, Receiver<'r>)> {
        let (method, base) = match callee {
            Reference::Println => return Ok((PRINTLN_ROUTINE.to_string(), Receiver::Static)),
            Reference::Method(method) => (*method, None),
            Reference::Qualified {
                base,
                member: Member::Method(method),
            } => (*method, Some(base.as_ref())),
            other => {
                return Err(Error::Internal(format!("{other:?} is not callable")));
            }
        };
        let (Some(decl), Some(name)) = (
            self.program.method(method),
            self.program.routine_name(method),
        ) else {
            // No routine will ever start under this name, so the call stays in
            // the patch table and is reported as unresolved.
            let name = dangling_routine_name(self.program, method);
            tracing::debug!("call to undeclared routine {name}");
            let receiver = base.map_or(Receiver::Static, Receiver::Base);
            return Ok((name, receiver));
        };
        let receiver = match (decl.is_static, base) {
            (true, _) => Receiver::Static,
            (false, None) => Receiver::This,
            (false, Some(base)) => Receiver::Base(base),
        };
        Ok((name, receiver))
    }

    // ── References ──

    fn reference(
        &mut self,
        reference: &Reference,
        mode: Mode,
        ctx: &mut RoutineContext,
    ) -> Result<()> {
        match reference {
            Reference::This => {
                if mode == Mode::Address {
                    return Err(Error::Internal("`this` is not assignable".to_string()));
                }
                self.this(ctx)
            }
            Reference::Local(LocalRef::Param(index)) => {
                let offset = ctx.frame.param(*index).ok_or_else(|| {
                    Error::Internal(format!("parameter {index} out of range"))
                })?;
                self.frame_slot(offset, mode)
            }
            Reference::Local(LocalRef::Var(id)) => {
                let offset = ctx
                    .frame
                    .local(*id)
                    .ok_or_else(|| Error::Internal(format!("local {id:?} is not in scope")))?;
                self.frame_slot(offset, mode)
            }
            Reference::Field(field) => self.field(*field, None, mode, ctx),
            Reference::Qualified {
                base,
                member: Member::Field(field),
            } => self.field(*field, Some(base.as_ref()), mode, ctx),
            other => Err(Error::Internal(format!("{other:?} does not denote a value"))),
        }
    }

    fn this(&mut self, ctx: &RoutineContext) -> Result<()> {
        let offset = ctx
            .frame
            .receiver()
            .ok_or_else(|| Error::Internal("`this` used in a static routine".to_string()))?;
        self.emit(Instruction::Push {
            operand: Operand::mem(FRAME_BASE, offset),
        })?;
        Ok(())
    }

    fn frame_slot(&mut self, offset: i32, mode: Mode) -> Result<()> {
        match mode {
            Mode::Value => {
                self.emit(Instruction::Push {
                    operand: Operand::mem(FRAME_BASE, offset),
                })?;
            }
            Mode::Address => {
                self.emit(Instruction::lea(RETURN_VALUE_REG, FRAME_BASE, offset))?;
                self.emit(Instruction::push(RETURN_VALUE_REG))?;
            }
        }
        Ok(())
    }

    fn field(
        &mut self,
        field: FieldRef,
        base: Option<&Reference>,
        mode: Mode,
        ctx: &mut RoutineContext,
    ) -> Result<()> {
        let slot = self
            .layout
            .field(field)
            .ok_or_else(|| Error::Internal(format!("unknown field {field:?}")))?;
        let offset = match slot {
            FieldSlot::Static { offset } => {
                // The static area's address is only known once all code is out.
                let index = self.emit(Instruction::MovAbs {
                    dst: RETURN_VALUE_REG,
                    value: 0,
                })?;
                self.static_loads.push(StaticLoad { index, offset });
                0
            }
            FieldSlot::Instance { offset } => {
                match base {
                    None => {
                        let receiver = ctx.frame.receiver().ok_or_else(|| {
                            Error::Internal(format!("instance field {field:?} in a static routine"))
                        })?;
                        self.emit(Instruction::load(RETURN_VALUE_REG, FRAME_BASE, receiver))?;
                    }
                    Some(base) => {
                        self.reference(base, Mode::Value, ctx)?;
                        self.emit(Instruction::pop(RETURN_VALUE_REG))?;
                    }
                }
                offset
            }
        };
        match mode {
            Mode::Value => {
                self.emit(Instruction::Push {
                    operand: Operand::mem(RETURN_VALUE_REG, offset),
                })?;
            }
            Mode::Address => {
                if offset != 0 {
                    self.emit(Instruction::lea(RETURN_VALUE_REG, RETURN_VALUE_REG, offset))?;
                }
                self.emit(Instruction::push(RETURN_VALUE_REG))?;
            }
        }
        Ok(())
    }
}

/// Emits `expr` alone, in the frame of `method`, and returns the stream.
#[cfg(any(test, feature = "test-harness"))]
pub fn generate_expression(
    program: &Program,
    method: MethodRef,
    expr: &Expression,
) -> Result<InstructionStream> {
    let decl = program
        .method(method)
        .ok_or_else(|| Error::Internal(format!("unknown routine {method:?}")))?;
    let options = CompileOptions::default();
    let mut generator = CodeGenerator::new(program, &options);
    let mut ctx = RoutineContext {
        frame: FrameLayout::for_method(decl),
        is_entry: false,
    };
    generator.expression(expr, &mut ctx)?;
    Ok(generator.stream)
}
