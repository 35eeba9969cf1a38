//! Test harness for mjc unit and integration tests
//!
//! Builders for resolved program trees, plus pattern matching over the
//! generated instruction stream.
//!
//! # Example
//!
//! ```rust
//! use mjc::test_harness::*;
//! use mjc::x64::{AluOp, Reg64};
//!
//! let program = ProgramBuilder::new()
//!     .class(
//!         ClassBuilder::new("Main").method(entry_method(vec![println(add(int(1), int(2)))])),
//!     )
//!     .build();
//!
//! let code = generate_ok(&program);
//! let instructions = instructions(&code);
//!
//! assert_has_pattern(&instructions, &[
//!     InstructionPattern::PushImm { value: Pat::Exact(1) },
//!     InstructionPattern::PushImm { value: Pat::Exact(2) },
//!     InstructionPattern::Pop { reg: Pat::Exact(Reg64::Rcx) },
//!     InstructionPattern::Pop { reg: Pat::Exact(Reg64::Rax) },
//!     InstructionPattern::Alu { op: Pat::Exact(AluOp::Add) },
//! ]);
//! ```

#![allow(
    clippy::match_same_arms,
    clippy::must_use_candidate,
    clippy::manual_assert,
    clippy::missing_panics_doc,
    clippy::needless_pass_by_value,
    clippy::uninlined_format_args
)]

use crate::ast::{
    BinaryOp, ClassDecl, Expression, FieldDecl, FieldRef, Literal, LocalRef, Member, MethodDecl,
    MethodRef, ParameterDecl, Program, Reference, Statement, TypeDenoter, UnaryOp, VarDecl, VarId,
};
use crate::codegen::{CompileOptions, GeneratedCode, generate};
use crate::diagnostics::ErrorReporter;
use crate::x64::{AluOp, Condition, Emitted, Instruction, InstructionStream, Operand, Reg64};

// ── Tree builders ──

#[derive(Debug, Default)]
pub struct ProgramBuilder {
    classes: Vec<ClassDecl>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class(mut self, class: ClassBuilder) -> Self {
        self.classes.push(class.build());
        self
    }

    pub fn build(self) -> Program {
        Program {
            classes: self.classes,
        }
    }
}

#[derive(Debug)]
pub struct ClassBuilder {
    decl: ClassDecl,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            decl: ClassDecl {
                name: name.to_string(),
                fields: Vec::new(),
                methods: Vec::new(),
            },
        }
    }

    pub fn field(mut self, name: &str, ty: TypeDenoter) -> Self {
        self.decl.fields.push(FieldDecl {
            name: name.to_string(),
            ty,
            is_static: false,
            is_private: false,
        });
        self
    }

    pub fn static_field(mut self, name: &str, ty: TypeDenoter) -> Self {
        self.decl.fields.push(FieldDecl {
            name: name.to_string(),
            ty,
            is_static: true,
            is_private: false,
        });
        self
    }

    pub fn method(mut self, method: MethodDecl) -> Self {
        self.decl.methods.push(method);
        self
    }

    pub fn build(self) -> ClassDecl {
        self.decl
    }
}

/// `public static void main(String[] args) { body }`
pub fn entry_method(body: Vec<Statement>) -> MethodDecl {
    MethodDecl {
        name: "main".to_string(),
        return_type: TypeDenoter::Void,
        is_static: true,
        is_private: false,
        params: vec![ParameterDecl {
            name: "args".to_string(),
            ty: TypeDenoter::Array(Box::new(TypeDenoter::Class("String".to_string()))),
        }],
        body,
    }
}

/// Static routine taking `params` int parameters.
pub fn static_method(
    name: &str,
    return_type: TypeDenoter,
    params: usize,
    body: Vec<Statement>,
) -> MethodDecl {
    MethodDecl {
        is_static: true,
        ..instance_method(name, return_type, params, body)
    }
}

/// Instance routine taking `params` int parameters.
pub fn instance_method(
    name: &str,
    return_type: TypeDenoter,
    params: usize,
    body: Vec<Statement>,
) -> MethodDecl {
    MethodDecl {
        name: name.to_string(),
        return_type,
        is_static: false,
        is_private: false,
        params: (0..params)
            .map(|i| ParameterDecl {
                name: format!("p{i}"),
                ty: TypeDenoter::Int,
            })
            .collect(),
        body,
    }
}

pub fn int(value: i32) -> Expression {
    Expression::Literal(Literal::Int(value))
}

pub fn boolean(value: bool) -> Expression {
    Expression::Literal(Literal::Bool(value))
}

pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Expression {
    Expression::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn add(left: Expression, right: Expression) -> Expression {
    binary(BinaryOp::Add, left, right)
}

pub fn unary(op: UnaryOp, operand: Expression) -> Expression {
    Expression::Unary {
        op,
        operand: Box::new(operand),
    }
}

pub fn param(index: usize) -> Expression {
    Expression::Ref(Reference::Local(LocalRef::Param(index)))
}

pub fn local(id: u32) -> Expression {
    Expression::Ref(Reference::Local(LocalRef::Var(VarId(id))))
}

pub fn local_ref(id: u32) -> Reference {
    Reference::Local(LocalRef::Var(VarId(id)))
}

pub fn field_ref(class: usize, field: usize) -> Reference {
    Reference::Field(FieldRef { class, field })
}

/// `base.field`
pub fn qualified_field(base: Reference, class: usize, field: usize) -> Reference {
    Reference::Qualified {
        base: Box::new(base),
        member: Member::Field(FieldRef { class, field }),
    }
}

pub fn method_ref(class: usize, method: usize) -> Reference {
    Reference::Method(MethodRef { class, method })
}

/// `Class.method` or `object.method`
pub fn qualified_method(base: Reference, class: usize, method: usize) -> Reference {
    Reference::Qualified {
        base: Box::new(base),
        member: Member::Method(MethodRef { class, method }),
    }
}

pub fn call(callee: Reference, args: Vec<Expression>) -> Expression {
    Expression::Call { callee, args }
}

pub fn call_stmt(callee: Reference, args: Vec<Expression>) -> Statement {
    Statement::Call { callee, args }
}

pub fn println(value: Expression) -> Statement {
    call_stmt(Reference::Println, vec![value])
}

pub fn var_decl(id: u32, init: Expression) -> Statement {
    Statement::VarDecl {
        var: VarDecl {
            name: format!("v{id}"),
            ty: TypeDenoter::Int,
            id: VarId(id),
        },
        init,
    }
}

pub fn assign(target: Reference, value: Expression) -> Statement {
    Statement::Assign { target, value }
}

pub fn if_stmt(cond: Expression, then_branch: Statement, else_branch: Option<Statement>) -> Statement {
    Statement::If {
        cond,
        then_branch: Box::new(then_branch),
        else_branch: else_branch.map(Box::new),
    }
}

pub fn while_stmt(cond: Expression, body: Statement) -> Statement {
    Statement::While {
        cond,
        body: Box::new(body),
    }
}

pub fn return_value(value: Expression) -> Statement {
    Statement::Return(Some(value))
}

// ── Generation helpers ──

/// Generates with default options, panicking on diagnostics or internal errors.
pub fn generate_ok(program: &Program) -> GeneratedCode {
    let mut reporter = ErrorReporter::new();
    let code = generate(program, &CompileOptions::default(), &mut reporter)
        .expect("generation failed with an internal error");
    if reporter.has_errors() {
        panic!(
            "unexpected diagnostics: {:?}",
            reporter.iter().collect::<Vec<_>>()
        );
    }
    code
}

/// Generates with default options, returning whatever diagnostics were reported.
pub fn generate_with_diagnostics(program: &Program) -> (GeneratedCode, ErrorReporter) {
    let mut reporter = ErrorReporter::new();
    let code = generate(program, &CompileOptions::default(), &mut reporter)
        .expect("generation failed with an internal error");
    (code, reporter)
}

pub fn instructions(code: &GeneratedCode) -> Vec<Instruction> {
    code.stream.iter().map(|e| e.instruction.clone()).collect()
}

/// Instructions of the routine starting at `start`, up to the next routine.
pub fn routine_instructions(code: &GeneratedCode, name: &str) -> Vec<Instruction> {
    let start = code
        .routine_start(name)
        .unwrap_or_else(|| panic!("routine {name} was not generated"));
    let end = code
        .routines
        .values()
        .copied()
        .filter(|&s| s > start)
        .min()
        .unwrap_or(usize::MAX);
    code.stream
        .iter()
        .filter(|e| e.start >= start && e.start < end)
        .map(|e| e.instruction.clone())
        .collect()
}

/// Every call site as `(call start, resolved target)`.
pub fn call_sites(code: &GeneratedCode) -> Vec<(usize, usize)> {
    code.stream
        .iter()
        .filter(|e| matches!(e.instruction, Instruction::Call { .. }))
        .filter_map(|e| Some((e.start, e.instruction.branch_target(e.start)?)))
        .collect()
}

/// Call sites whose target is the routine called `name`.
pub fn calls_to(code: &GeneratedCode, name: &str) -> Vec<usize> {
    let Some(target) = code.routine_start(name) else {
        return Vec::new();
    };
    call_sites(code)
        .into_iter()
        .filter(|&(_, t)| t == target)
        .map(|(site, _)| site)
        .collect()
}

/// The instruction starting exactly at `address`, if any.
pub fn instruction_at(stream: &InstructionStream, address: usize) -> Option<&Emitted> {
    stream.iter().find(|e| e.start == address)
}

/// Net words pushed by a run of instructions.
pub fn stack_effect<'a>(instructions: impl IntoIterator<Item = &'a Instruction>) -> isize {
    instructions.into_iter().map(Instruction::stack_effect).sum()
}

// ── Instruction patterns ──

/// Pattern matching for instruction fields
#[derive(Debug, Clone)]
pub enum Pat<T> {
    /// Match any value
    Any,
    /// Match exact value
    Exact(T),
    /// Match if value satisfies predicate
    Predicate(fn(&T) -> bool),
}

impl<T: PartialEq> Pat<T> {
    /// Check if a value matches this pattern
    pub fn matches(&self, value: &T) -> bool {
        match self {
            Pat::Any => true,
            Pat::Exact(expected) => value == expected,
            Pat::Predicate(pred) => pred(value),
        }
    }
}

/// Pattern for matching instructions in tests
#[derive(Debug, Clone)]
pub enum InstructionPattern {
    /// Match any instruction
    Any,
    /// `push r64`
    Push { reg: Pat<Reg64> },
    /// `push [m]`
    PushMem { operand: Pat<Operand> },
    PushImm { value: Pat<i32> },
    /// `pop r64`
    Pop { reg: Pat<Reg64> },
    /// `op r, r`
    Alu { op: Pat<AluOp> },
    AluImm { op: Pat<AluOp>, value: Pat<i32> },
    Store { operand: Pat<Operand> },
    Load { operand: Pat<Operand> },
    MovImm { value: Pat<i32> },
    MovAbs { value: Pat<u64> },
    Lea,
    Imul,
    Idiv,
    Neg,
    Cqo,
    SetCc { cond: Pat<Condition> },
    Jmp,
    Jcc { cond: Pat<Condition> },
    Call,
    Ret,
    Syscall,
}

impl InstructionPattern {
    /// Check if an instruction matches this pattern
    pub fn matches(&self, instr: &Instruction) -> bool {
        use InstructionPattern as P;

        match (self, instr) {
            (P::Any, _) => true,
            (
                P::Push { reg },
                Instruction::Push {
                    operand: Operand::Reg(r),
                },
            ) => reg.matches(r),
            (P::PushMem { operand }, Instruction::Push { operand: o }) => {
                o.is_memory() && operand.matches(o)
            }
            (P::PushImm { value }, Instruction::PushImm { value: v }) => value.matches(v),
            (
                P::Pop { reg },
                Instruction::Pop {
                    operand: Operand::Reg(r),
                },
            ) => reg.matches(r),
            (P::Alu { op }, Instruction::Alu { op: o, .. }) => op.matches(o),
            (P::AluImm { op, value }, Instruction::AluImm { op: o, value: v, .. }) => {
                op.matches(o) && value.matches(v)
            }
            (P::Store { operand }, Instruction::MovStore { operand: o }) => operand.matches(o),
            (P::Load { operand }, Instruction::MovLoad { operand: o }) => operand.matches(o),
            (P::MovImm { value }, Instruction::MovImm { value: v, .. }) => value.matches(v),
            (P::MovAbs { value }, Instruction::MovAbs { value: v, .. }) => value.matches(v),
            (P::Lea, Instruction::Lea { .. }) => true,
            (P::Imul, Instruction::Imul { .. }) => true,
            (P::Idiv, Instruction::Idiv { .. }) => true,
            (P::Neg, Instruction::Neg { .. }) => true,
            (P::Cqo, Instruction::Cqo) => true,
            (P::SetCc { cond }, Instruction::SetCc { cond: c, .. }) => cond.matches(c),
            (P::Jmp, Instruction::Jmp { .. }) => true,
            (P::Jcc { cond }, Instruction::Jcc { cond: c, .. }) => cond.matches(c),
            (P::Call, Instruction::Call { .. }) => true,
            (P::Ret, Instruction::Ret) => true,
            (P::Syscall, Instruction::Syscall) => true,
            _ => false,
        }
    }
}

/// Find the first occurrence of a pattern sequence in instructions
pub fn find_pattern(instructions: &[Instruction], pattern: &[InstructionPattern]) -> Option<usize> {
    if pattern.is_empty() {
        return Some(0);
    }

    'outer: for start in 0..=instructions.len().saturating_sub(pattern.len()) {
        for (i, pat) in pattern.iter().enumerate() {
            match instructions.get(start + i) {
                Some(instr) if pat.matches(instr) => {}
                _ => continue 'outer,
            }
        }
        return Some(start);
    }
    None
}

/// Assert that a pattern sequence appears somewhere in instructions
pub fn assert_has_pattern(instructions: &[Instruction], pattern: &[InstructionPattern]) {
    if find_pattern(instructions, pattern).is_none() {
        panic!(
            "Pattern not found in instruction sequence.\n\nExpected pattern:\n{}\n\nActual instructions:\n{}",
            format_patterns(pattern),
            format_instructions(instructions)
        );
    }
}

/// Count instructions matching a pattern
pub fn count_matching(instructions: &[Instruction], pattern: &InstructionPattern) -> usize {
    instructions.iter().filter(|i| pattern.matches(i)).count()
}

/// Format patterns for display
fn format_patterns(patterns: &[InstructionPattern]) -> String {
    patterns
        .iter()
        .map(|p| format!("  {:?}", p))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format instructions for display
fn format_instructions(instructions: &[Instruction]) -> String {
    instructions
        .iter()
        .map(|i| format!("  {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}
