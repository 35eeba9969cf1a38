use std::fmt;

use super::operand::RegField;
use super::{Condition, Operand, Reg64};
use crate::{Error, Result};

/// Two-operand ALU operations sharing the `op r/m, r` and `op r/m, imm32` forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Add,
    Or,
    And,
    Sub,
    Xor,
    Cmp,
}

impl AluOp {
    /// Opcode of the `op r/m64, r64` form.
    const fn rm_reg_opcode(self) -> u8 {
        match self {
            Self::Add => 0x01,
            Self::Or => 0x09,
            Self::And => 0x21,
            Self::Sub => 0x29,
            Self::Xor => 0x31,
            Self::Cmp => 0x39,
        }
    }

    /// `/digit` of the `81 /digit id` form.
    const fn extension(self) -> u8 {
        match self {
            Self::Add => 0,
            Self::Or => 1,
            Self::And => 4,
            Self::Sub => 5,
            Self::Xor => 6,
            Self::Cmp => 7,
        }
    }

    const fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Or => "or",
            Self::And => "and",
            Self::Sub => "sub",
            Self::Xor => "xor",
            Self::Cmp => "cmp",
        }
    }
}

/// Relative branch displacement, measured from the end of the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rel {
    Short(i8),
    Near(i32),
}

impl Rel {
    fn value(self) -> i32 {
        match self {
            Self::Short(d) => i32::from(d),
            Self::Near(d) => d,
        }
    }
}

/// Encoded lengths of the branch forms.
const JMP_SHORT_LEN: usize = 2;
const JMP_NEAR_LEN: usize = 5;
const JCC_SHORT_LEN: usize = 2;
const JCC_NEAR_LEN: usize = 6;
const CALL_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// `op r/m64, r64`
    Alu { op: AluOp, operand: Operand },
    /// `op r/m64, imm32`, always in the 4-byte immediate form.
    AluImm {
        op: AluOp,
        operand: Operand,
        value: i32,
    },
    /// `mov r/m64, r64`
    MovStore { operand: Operand },
    /// `mov r64, r/m64`
    MovLoad { operand: Operand },
    /// `mov r/m64, imm32` (sign-extended)
    MovImm { operand: Operand, value: i32 },
    /// `mov r64, imm64`
    MovAbs { dst: Reg64, value: u64 },
    /// `lea r64, m`
    Lea { operand: Operand },
    /// `imul r64, r/m64`
    Imul { operand: Operand },
    /// `idiv r/m64` (rdx:rax / operand)
    Idiv { operand: Operand },
    Neg { operand: Operand },
    Not { operand: Operand },
    /// Sign-extend rax into rdx:rax.
    Cqo,
    /// `push r64` or `push r/m64`
    Push { operand: Operand },
    /// `push imm32` (sign-extended)
    PushImm { value: i32 },
    /// `pop r64` or `pop r/m64`
    Pop { operand: Operand },
    /// `setcc r8` on the low byte of `dst`
    SetCc { cond: Condition, dst: Reg64 },
    Jmp { rel: Rel },
    Jcc { cond: Condition, rel: Rel },
    /// `call rel32`
    Call { rel: i32 },
    Ret,
    Syscall,
}

#[derive(Debug, Clone, Copy, Default)]
struct Rex {
    w: bool,
    r: bool,
    x: bool,
    b: bool,
}

impl Rex {
    const fn is_needed(self) -> bool {
        self.w || self.r || self.x || self.b
    }

    const fn encode(self) -> u8 {
        0x40 | ((self.w as u8) << 3) | ((self.r as u8) << 2) | ((self.x as u8) << 1) | self.b as u8
    }
}

impl Instruction {
    // ── Shorthands used by the code generator ──

    #[must_use]
    pub const fn push(reg: Reg64) -> Self {
        Self::Push {
            operand: Operand::Reg(reg),
        }
    }

    #[must_use]
    pub const fn pop(reg: Reg64) -> Self {
        Self::Pop {
            operand: Operand::Reg(reg),
        }
    }

    /// `mov dst, src`
    #[must_use]
    pub const fn mov(dst: Reg64, src: Reg64) -> Self {
        Self::MovStore {
            operand: Operand::pair(dst, src),
        }
    }

    /// `mov dst, [base + disp]`
    #[must_use]
    pub const fn load(dst: Reg64, base: Reg64, disp: i32) -> Self {
        Self::MovLoad {
            operand: Operand::mem_reg(base, disp, dst),
        }
    }

    /// `mov [base + disp], src`
    #[must_use]
    pub const fn store(base: Reg64, disp: i32, src: Reg64) -> Self {
        Self::MovStore {
            operand: Operand::mem_reg(base, disp, src),
        }
    }

    /// `mov dst, imm32`
    #[must_use]
    pub const fn mov_imm(dst: Reg64, value: i32) -> Self {
        Self::MovImm {
            operand: Operand::Reg(dst),
            value,
        }
    }

    /// `op dst, src`
    #[must_use]
    pub const fn alu(op: AluOp, dst: Reg64, src: Reg64) -> Self {
        Self::Alu {
            op,
            operand: Operand::pair(dst, src),
        }
    }

    /// `op dst, imm32`
    #[must_use]
    pub const fn alu_imm(op: AluOp, dst: Reg64, value: i32) -> Self {
        Self::AluImm {
            op,
            operand: Operand::Reg(dst),
            value,
        }
    }

    /// `lea dst, [base + disp]`
    #[must_use]
    pub const fn lea(dst: Reg64, base: Reg64, disp: i32) -> Self {
        Self::Lea {
            operand: Operand::mem_reg(base, disp, dst),
        }
    }

    // ── Branches ──

    /// Near jump from `origin` (its own start address) to `target`.
    pub fn jmp_near(origin: usize, target: usize) -> Result<Self> {
        Ok(Self::Jmp {
            rel: Rel::Near(displacement(origin, target, JMP_NEAR_LEN)?),
        })
    }

    /// Jump to an already known `target`, using the 2-byte form when it reaches.
    pub fn jmp_fitted(origin: usize, target: usize) -> Result<Self> {
        if let Ok(short) = i8::try_from(displacement(origin, target, JMP_SHORT_LEN)?) {
            return Ok(Self::Jmp {
                rel: Rel::Short(short),
            });
        }
        Self::jmp_near(origin, target)
    }

    pub fn jcc_near(cond: Condition, origin: usize, target: usize) -> Result<Self> {
        Ok(Self::Jcc {
            cond,
            rel: Rel::Near(displacement(origin, target, JCC_NEAR_LEN)?),
        })
    }

    pub fn jcc_fitted(cond: Condition, origin: usize, target: usize) -> Result<Self> {
        if let Ok(short) = i8::try_from(displacement(origin, target, JCC_SHORT_LEN)?) {
            return Ok(Self::Jcc {
                cond,
                rel: Rel::Short(short),
            });
        }
        Self::jcc_near(cond, origin, target)
    }

    pub fn call(origin: usize, target: usize) -> Result<Self> {
        Ok(Self::Call {
            rel: displacement(origin, target, CALL_LEN)?,
        })
    }

    /// Same branch, re-aimed at `target`. Only the fixed-width forms can be
    /// retargeted, since the encoded length must not change.
    pub fn retarget(&self, origin: usize, target: usize) -> Result<Self> {
        match self {
            Self::Jmp {
                rel: Rel::Near(_), ..
            } => Self::jmp_near(origin, target),
            Self::Jcc {
                cond,
                rel: Rel::Near(_),
            } => Self::jcc_near(*cond, origin, target),
            Self::Call { .. } => Self::call(origin, target),
            other => Err(Error::Internal(format!(
                "cannot retarget non-patchable instruction `{other}`"
            ))),
        }
    }

    /// Absolute branch target, given the instruction's own start address.
    #[must_use]
    pub fn branch_target(&self, origin: usize) -> Option<usize> {
        let (rel, len) = match self {
            Self::Jmp { rel: rel @ Rel::Short(_) } => (rel.value(), JMP_SHORT_LEN),
            Self::Jmp { rel: rel @ Rel::Near(_) } => (rel.value(), JMP_NEAR_LEN),
            Self::Jcc {
                rel: rel @ Rel::Short(_),
                ..
            } => (rel.value(), JCC_SHORT_LEN),
            Self::Jcc {
                rel: rel @ Rel::Near(_),
                ..
            } => (rel.value(), JCC_NEAR_LEN),
            Self::Call { rel } => (*rel, CALL_LEN),
            _ => return None,
        };
        let end = i64::try_from(origin + len).ok()?;
        usize::try_from(end + i64::from(rel)).ok()
    }

    /// Whether the instruction can be replaced in place once its operand is known.
    #[must_use]
    pub const fn is_patchable(&self) -> bool {
        matches!(
            self,
            Self::Jmp {
                rel: Rel::Near(_)
            } | Self::Jcc {
                rel: Rel::Near(_),
                ..
            } | Self::Call { .. }
                | Self::MovAbs { .. }
        )
    }

    /// Net words this instruction pushes onto the machine stack, as seen by
    /// the routine executing it. Calls count as zero: the callee pops its
    /// own return address.
    #[must_use]
    pub fn stack_effect(&self) -> isize {
        const WORD: i32 = 8;
        match self {
            Self::Push { .. } | Self::PushImm { .. } => 1,
            Self::Pop { .. } => -1,
            Self::AluImm {
                op: AluOp::Add,
                operand: Operand::Reg(Reg64::Rsp),
                value,
            } => -(value / WORD) as isize,
            Self::AluImm {
                op: AluOp::Sub,
                operand: Operand::Reg(Reg64::Rsp),
                value,
            } => (value / WORD) as isize,
            _ => 0,
        }
    }

    // ── Encoding ──

    /// Exact machine bytes for this instruction. Pure: equal inputs give equal bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Alu { op, operand } => {
                encode_modrm(true, &[op.rm_reg_opcode()], operand, RegField::Operand)
            }
            Self::AluImm { op, operand, value } => {
                let mut bytes =
                    encode_modrm(true, &[0x81], operand, RegField::Extension(op.extension()))?;
                bytes.extend_from_slice(&value.to_le_bytes());
                Ok(bytes)
            }
            Self::MovStore { operand } => encode_modrm(true, &[0x89], operand, RegField::Operand),
            Self::MovLoad { operand } => {
                require_memory_or_pair(self, operand)?;
                encode_modrm(true, &[0x8B], operand, RegField::Operand)
            }
            Self::MovImm { operand, value } => {
                let mut bytes = encode_modrm(true, &[0xC7], operand, RegField::Extension(0))?;
                bytes.extend_from_slice(&value.to_le_bytes());
                Ok(bytes)
            }
            Self::MovAbs { dst, value } => {
                let rex = Rex {
                    w: true,
                    b: dst.is_extended(),
                    ..Rex::default()
                };
                let mut bytes = vec![rex.encode(), 0xB8 + dst.low_bits()];
                bytes.extend_from_slice(&value.to_le_bytes());
                Ok(bytes)
            }
            Self::Lea { operand } => {
                if !operand.is_memory() {
                    return Err(Error::InvalidOperand(format!(
                        "lea needs a memory operand, got `{operand}`"
                    )));
                }
                encode_modrm(true, &[0x8D], operand, RegField::Operand)
            }
            Self::Imul { operand } => {
                require_memory_or_pair(self, operand)?;
                encode_modrm(true, &[0x0F, 0xAF], operand, RegField::Operand)
            }
            Self::Idiv { operand } => encode_modrm(true, &[0xF7], operand, RegField::Extension(7)),
            Self::Neg { operand } => encode_modrm(true, &[0xF7], operand, RegField::Extension(3)),
            Self::Not { operand } => encode_modrm(true, &[0xF7], operand, RegField::Extension(2)),
            Self::Cqo => Ok(vec![0x48, 0x99]),
            Self::Push { operand } => match operand {
                Operand::Reg(reg) => Ok(short_reg_form(0x50, *reg)),
                Operand::RegPair { .. } => Err(Error::InvalidOperand(format!(
                    "push takes a single register or memory operand, got `{self}`"
                ))),
                _ => encode_modrm(false, &[0xFF], operand, RegField::Extension(6)),
            },
            Self::PushImm { value } => {
                let mut bytes = vec![0x68];
                bytes.extend_from_slice(&value.to_le_bytes());
                Ok(bytes)
            }
            Self::Pop { operand } => match operand {
                Operand::Reg(reg) => Ok(short_reg_form(0x58, *reg)),
                Operand::RegPair { .. } => Err(Error::InvalidOperand(format!(
                    "pop takes a single register or memory operand, got `{self}`"
                ))),
                _ => encode_modrm(false, &[0x8F], operand, RegField::Extension(0)),
            },
            Self::SetCc { cond, dst } => {
                let mut bytes = Vec::with_capacity(4);
                // Without a REX prefix, encodings 4-7 would name ah/ch/dh/bh.
                if dst.is_extended() || dst.low_bits() >= 4 {
                    let rex = Rex {
                        b: dst.is_extended(),
                        ..Rex::default()
                    };
                    bytes.push(rex.encode());
                }
                bytes.extend_from_slice(&[0x0F, 0x90 | cond.code(), 0xC0 | dst.low_bits()]);
                Ok(bytes)
            }
            Self::Jmp { rel } => Ok(match rel {
                Rel::Short(d) => vec![0xEB, d.to_le_bytes()[0]],
                Rel::Near(d) => with_rel32(&[0xE9], *d),
            }),
            Self::Jcc { cond, rel } => Ok(match rel {
                Rel::Short(d) => vec![0x70 | cond.code(), d.to_le_bytes()[0]],
                Rel::Near(d) => with_rel32(&[0x0F, 0x80 | cond.code()], *d),
            }),
            Self::Call { rel } => Ok(with_rel32(&[0xE8], *rel)),
            Self::Ret => Ok(vec![0xC3]),
            Self::Syscall => Ok(vec![0x0F, 0x05]),
        }
    }
}

fn encode_modrm(
    wide: bool,
    opcode: &[u8],
    operand: &Operand,
    field: RegField,
) -> Result<Vec<u8>> {
    let addressing = operand.encode(field)?;
    let rex = Rex {
        w: wide,
        r: addressing.rex_r,
        x: addressing.rex_x,
        b: addressing.rex_b,
    };
    let mut bytes = Vec::with_capacity(1 + opcode.len() + addressing.bytes.len());
    if rex.is_needed() {
        bytes.push(rex.encode());
    }
    bytes.extend_from_slice(opcode);
    bytes.extend_from_slice(&addressing.bytes);
    Ok(bytes)
}

/// `push`/`pop` register forms: opcode + low register bits, REX.B for r8-r15.
fn short_reg_form(base_opcode: u8, reg: Reg64) -> Vec<u8> {
    if reg.is_extended() {
        let rex = Rex {
            b: true,
            ..Rex::default()
        };
        vec![rex.encode(), base_opcode + reg.low_bits()]
    } else {
        vec![base_opcode + reg.low_bits()]
    }
}

fn with_rel32(opcode: &[u8], rel: i32) -> Vec<u8> {
    let mut bytes = opcode.to_vec();
    bytes.extend_from_slice(&rel.to_le_bytes());
    bytes
}

fn require_memory_or_pair(instr: &Instruction, operand: &Operand) -> Result<()> {
    if let Operand::Reg(_) = operand {
        return Err(Error::InvalidOperand(format!(
            "`{instr}` needs a destination register"
        )));
    }
    Ok(())
}

/// `target - (origin + len)` as a signed 32-bit displacement.
fn displacement(origin: usize, target: usize, len: usize) -> Result<i32> {
    let end = i64::try_from(origin + len)
        .map_err(|_| Error::Internal(format!("branch origin {origin:#x} out of range")))?;
    let target = i64::try_from(target)
        .map_err(|_| Error::Internal(format!("branch target {target:#x} out of range")))?;
    i32::try_from(target - end).map_err(|_| {
        Error::Internal(format!(
            "branch from {origin:#x} to {target:#x} exceeds a 32-bit displacement"
        ))
    })
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reg = |operand: &Operand| {
            operand
                .register_field()
                .map_or_else(|| "?".to_string(), |r| r.to_string())
        };
        match self {
            Self::Alu { op, operand } => write!(f, "{} {operand}, {}", op.mnemonic(), reg(operand)),
            Self::AluImm { op, operand, value } => {
                write!(f, "{} {operand}, {value:#x}", op.mnemonic())
            }
            Self::MovStore { operand } => write!(f, "mov {operand}, {}", reg(operand)),
            Self::MovLoad { operand } => write!(f, "mov {}, {operand}", reg(operand)),
            Self::MovImm { operand, value } => write!(f, "mov {operand}, {value:#x}"),
            Self::MovAbs { dst, value } => write!(f, "movabs {dst}, {value:#x}"),
            Self::Lea { operand } => write!(f, "lea {}, {operand}", reg(operand)),
            Self::Imul { operand } => write!(f, "imul {}, {operand}", reg(operand)),
            Self::Idiv { operand } => write!(f, "idiv {operand}"),
            Self::Neg { operand } => write!(f, "neg {operand}"),
            Self::Not { operand } => write!(f, "not {operand}"),
            Self::Cqo => f.write_str("cqo"),
            Self::Push { operand } => write!(f, "push {operand}"),
            Self::PushImm { value } => write!(f, "push {value:#x}"),
            Self::Pop { operand } => write!(f, "pop {operand}"),
            Self::SetCc { cond, dst } => write!(f, "set{} {}", cond.suffix(), dst.byte_name()),
            Self::Jmp { rel } => write!(f, "jmp {:+}", rel.value()),
            Self::Jcc { cond, rel } => write!(f, "j{} {:+}", cond.suffix(), rel.value()),
            Self::Call { rel } => write!(f, "call {rel:+}"),
            Self::Ret => f.write_str("ret"),
            Self::Syscall => f.write_str("syscall"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x64::Scale;

    fn enc(instr: &Instruction) -> Vec<u8> {
        instr.encode().expect("encodable")
    }

    #[test]
    fn test_frame_setup_encodings() {
        assert_eq!(enc(&Instruction::push(Reg64::Rbp)), vec![0x55]);
        assert_eq!(enc(&Instruction::mov(Reg64::Rbp, Reg64::Rsp)), vec![0x48, 0x89, 0xE5]);
        assert_eq!(enc(&Instruction::mov(Reg64::Rsp, Reg64::Rbp)), vec![0x48, 0x89, 0xEC]);
        assert_eq!(enc(&Instruction::pop(Reg64::Rbp)), vec![0x5D]);
        assert_eq!(enc(&Instruction::Ret), vec![0xC3]);
    }

    #[test]
    fn test_push_pop_forms() {
        assert_eq!(enc(&Instruction::push(Reg64::R8)), vec![0x41, 0x50]);
        assert_eq!(enc(&Instruction::pop(Reg64::Rcx)), vec![0x59]);
        assert_eq!(enc(&Instruction::pop(Reg64::R15)), vec![0x41, 0x5F]);
        assert_eq!(
            enc(&Instruction::Push {
                operand: Operand::mem(Reg64::Rbp, 16)
            }),
            vec![0xFF, 0x75, 0x10]
        );
        assert_eq!(
            enc(&Instruction::Pop {
                operand: Operand::mem(Reg64::Rax, 0)
            }),
            vec![0x8F, 0x00]
        );
        assert_eq!(
            enc(&Instruction::PushImm { value: 0 }),
            vec![0x68, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            enc(&Instruction::PushImm { value: -1 }),
            vec![0x68, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_push_rejects_register_pair() {
        let push = Instruction::Push {
            operand: Operand::pair(Reg64::Rax, Reg64::Rcx),
        };
        assert!(matches!(push.encode(), Err(Error::InvalidOperand(_))));
        let pop = Instruction::Pop {
            operand: Operand::pair(Reg64::Rax, Reg64::Rcx),
        };
        assert!(pop.encode().is_err());
    }

    #[test]
    fn test_alu_register_forms() {
        assert_eq!(
            enc(&Instruction::alu(AluOp::Add, Reg64::Rax, Reg64::Rcx)),
            vec![0x48, 0x01, 0xC8]
        );
        assert_eq!(
            enc(&Instruction::alu(AluOp::Sub, Reg64::Rax, Reg64::Rcx)),
            vec![0x48, 0x29, 0xC8]
        );
        assert_eq!(
            enc(&Instruction::alu(AluOp::Xor, Reg64::Rdx, Reg64::Rdx)),
            vec![0x48, 0x31, 0xD2]
        );
        assert_eq!(
            enc(&Instruction::alu(AluOp::Xor, Reg64::R9, Reg64::R9)),
            vec![0x4D, 0x31, 0xC9]
        );
        assert_eq!(
            enc(&Instruction::alu(AluOp::Cmp, Reg64::Rax, Reg64::Rcx)),
            vec![0x48, 0x39, 0xC8]
        );
    }

    #[test]
    fn test_alu_immediate_forms() {
        assert_eq!(
            enc(&Instruction::alu_imm(AluOp::Cmp, Reg64::Rax, 0)),
            vec![0x48, 0x81, 0xF8, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            enc(&Instruction::alu_imm(AluOp::Add, Reg64::Rsp, 16)),
            vec![0x48, 0x81, 0xC4, 0x10, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            enc(&Instruction::alu_imm(AluOp::Xor, Reg64::Rax, 1)),
            vec![0x48, 0x81, 0xF0, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_mov_forms() {
        assert_eq!(
            enc(&Instruction::load(Reg64::Rax, Reg64::Rbp, 16)),
            vec![0x48, 0x8B, 0x45, 0x10]
        );
        assert_eq!(
            enc(&Instruction::store(Reg64::Rax, 0, Reg64::Rcx)),
            vec![0x48, 0x89, 0x08]
        );
        assert_eq!(
            enc(&Instruction::store(Reg64::Rbp, -8, Reg64::Rax)),
            vec![0x48, 0x89, 0x45, 0xF8]
        );
        assert_eq!(
            enc(&Instruction::mov_imm(Reg64::Rax, 60)),
            vec![0x48, 0xC7, 0xC0, 0x3C, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            enc(&Instruction::mov_imm(Reg64::R10, 0x22)),
            vec![0x49, 0xC7, 0xC2, 0x22, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            enc(&Instruction::mov_imm(Reg64::R8, -1)),
            vec![0x49, 0xC7, 0xC0, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_indexed_store_and_load() {
        let store = Instruction::MovStore {
            operand: Operand::indexed(Reg64::Rax, Reg64::Rcx, Scale::Eight, 0, Some(Reg64::Rbx))
                .expect("valid"),
        };
        assert_eq!(enc(&store), vec![0x48, 0x89, 0x1C, 0xC8]);
        let load = Instruction::MovLoad {
            operand: Operand::indexed(Reg64::Rax, Reg64::Rcx, Scale::Eight, 0, Some(Reg64::Rax))
                .expect("valid"),
        };
        assert_eq!(enc(&load), vec![0x48, 0x8B, 0x04, 0xC8]);
    }

    #[test]
    fn test_movabs() {
        assert_eq!(
            enc(&Instruction::MovAbs {
                dst: Reg64::Rax,
                value: 0x0040_1000
            }),
            vec![0x48, 0xB8, 0x00, 0x10, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            enc(&Instruction::MovAbs {
                dst: Reg64::R11,
                value: 0
            })[..2],
            [0x49, 0xBB]
        );
    }

    #[test]
    fn test_lea_and_arithmetic() {
        assert_eq!(
            enc(&Instruction::lea(Reg64::Rsi, Reg64::Rbp, 16)),
            vec![0x48, 0x8D, 0x75, 0x10]
        );
        assert!(
            Instruction::Lea {
                operand: Operand::pair(Reg64::Rax, Reg64::Rcx)
            }
            .encode()
            .is_err()
        );
        assert_eq!(
            enc(&Instruction::Imul {
                operand: Operand::pair(Reg64::Rcx, Reg64::Rax)
            }),
            vec![0x48, 0x0F, 0xAF, 0xC1]
        );
        assert_eq!(enc(&Instruction::Cqo), vec![0x48, 0x99]);
        assert_eq!(
            enc(&Instruction::Idiv {
                operand: Operand::reg(Reg64::Rcx)
            }),
            vec![0x48, 0xF7, 0xF9]
        );
        assert_eq!(
            enc(&Instruction::Neg {
                operand: Operand::reg(Reg64::Rax)
            }),
            vec![0x48, 0xF7, 0xD8]
        );
        assert_eq!(
            enc(&Instruction::Not {
                operand: Operand::reg(Reg64::Rax)
            }),
            vec![0x48, 0xF7, 0xD0]
        );
    }

    #[test]
    fn test_setcc() {
        assert_eq!(
            enc(&Instruction::SetCc {
                cond: Condition::Equal,
                dst: Reg64::Rdx
            }),
            vec![0x0F, 0x94, 0xC2]
        );
        assert_eq!(
            enc(&Instruction::SetCc {
                cond: Condition::Less,
                dst: Reg64::Rdx
            }),
            vec![0x0F, 0x9C, 0xC2]
        );
        // sil needs an empty REX prefix.
        assert_eq!(
            enc(&Instruction::SetCc {
                cond: Condition::Greater,
                dst: Reg64::Rsi
            }),
            vec![0x40, 0x0F, 0x9F, 0xC6]
        );
        assert_eq!(
            enc(&Instruction::SetCc {
                cond: Condition::NotEqual,
                dst: Reg64::R9
            }),
            vec![0x41, 0x0F, 0x95, 0xC1]
        );
    }

    #[test]
    fn test_branch_encodings() {
        assert_eq!(enc(&Instruction::Syscall), vec![0x0F, 0x05]);
        assert_eq!(
            enc(&Instruction::Jmp { rel: Rel::Near(0) }),
            vec![0xE9, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(enc(&Instruction::Jmp { rel: Rel::Short(-2) }), vec![0xEB, 0xFE]);
        assert_eq!(
            enc(&Instruction::Jcc {
                cond: Condition::Equal,
                rel: Rel::Near(0x10)
            }),
            vec![0x0F, 0x84, 0x10, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            enc(&Instruction::Jcc {
                cond: Condition::Equal,
                rel: Rel::Short(4)
            }),
            vec![0x74, 0x04]
        );
        assert_eq!(
            enc(&Instruction::Call { rel: -5 }),
            vec![0xE8, 0xFB, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_displacements_measured_from_instruction_end() {
        let call = Instruction::call(100, 40).expect("in range");
        assert_eq!(call, Instruction::Call { rel: 40 - 105 });
        assert_eq!(call.branch_target(100), Some(40));

        let jmp = Instruction::jmp_near(10, 30).expect("in range");
        assert_eq!(jmp, Instruction::Jmp { rel: Rel::Near(15) });
        assert_eq!(jmp.branch_target(10), Some(30));

        let jcc = Instruction::jcc_near(Condition::Equal, 10, 30).expect("in range");
        assert_eq!(jcc.branch_target(10), Some(30));
    }

    #[test]
    fn test_fitted_jumps_pick_short_form_when_reachable() {
        let back = Instruction::jmp_fitted(100, 50).expect("in range");
        assert_eq!(back, Instruction::Jmp { rel: Rel::Short(-52) });
        assert_eq!(back.branch_target(100), Some(50));

        let far = Instruction::jmp_fitted(1000, 0).expect("in range");
        assert!(matches!(far, Instruction::Jmp { rel: Rel::Near(_) }));
        assert_eq!(far.branch_target(1000), Some(0));

        let cond = Instruction::jcc_fitted(Condition::NotEqual, 0, 400).expect("in range");
        assert!(matches!(cond, Instruction::Jcc { rel: Rel::Near(_), .. }));
        assert_eq!(cond.branch_target(0), Some(400));
    }

    #[test]
    fn test_retarget_keeps_kind() {
        let placeholder = Instruction::Jcc {
            cond: Condition::Equal,
            rel: Rel::Near(0),
        };
        let patched = placeholder.retarget(20, 80).expect("patchable");
        assert_eq!(
            patched.encode().expect("encodable").len(),
            placeholder.encode().expect("encodable").len()
        );
        assert_eq!(patched.branch_target(20), Some(80));

        let short = Instruction::Jmp { rel: Rel::Short(0) };
        assert!(short.retarget(0, 10).is_err());
        assert!(Instruction::Ret.retarget(0, 10).is_err());
    }

    #[test]
    fn test_stack_effect() {
        assert_eq!(Instruction::push(Reg64::Rax).stack_effect(), 1);
        assert_eq!(Instruction::PushImm { value: 7 }.stack_effect(), 1);
        assert_eq!(Instruction::pop(Reg64::Rcx).stack_effect(), -1);
        assert_eq!(
            Instruction::alu_imm(AluOp::Add, Reg64::Rsp, 24).stack_effect(),
            -3
        );
        assert_eq!(
            Instruction::alu_imm(AluOp::Add, Reg64::Rax, 24).stack_effect(),
            0
        );
        assert_eq!(Instruction::Call { rel: 0 }.stack_effect(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(Instruction::push(Reg64::Rbp).to_string(), "push rbp");
        assert_eq!(
            Instruction::load(Reg64::Rax, Reg64::Rbp, 16).to_string(),
            "mov rax, qword [rbp+0x10]"
        );
        assert_eq!(
            Instruction::alu(AluOp::Add, Reg64::Rax, Reg64::Rcx).to_string(),
            "add rax, rcx"
        );
        assert_eq!(
            Instruction::SetCc {
                cond: Condition::LessEqual,
                dst: Reg64::Rdx
            }
            .to_string(),
            "setle dl"
        );
    }
}
