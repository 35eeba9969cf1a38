use std::fmt;

use super::{Reg64, Scale};
use crate::{Error, Result};

/// Operand descriptor: the register/memory shape an instruction addresses.
///
/// `reg` is the optional register that lands in the ModR/M `reg` field. It is
/// left empty for instructions that use that field as an opcode extension
/// (`push [m]`, `neg r/m`, `op r/m, imm32`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Bare register, register-direct (`mod = 11`).
    Reg(Reg64),
    /// Register-direct with a second register in the `reg` field.
    RegPair { rm: Reg64, reg: Reg64 },
    /// `[base + disp]`
    Mem {
        base: Reg64,
        disp: i32,
        reg: Option<Reg64>,
    },
    /// `[base + index * scale + disp]`
    Indexed {
        base: Reg64,
        index: Reg64,
        scale: Scale,
        disp: i32,
        reg: Option<Reg64>,
    },
}

/// What goes into the ModR/M `reg` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegField {
    /// The operand's own secondary register.
    Operand,
    /// A fixed `/digit` opcode extension.
    Extension(u8),
}

/// Encoded addressing bytes plus the REX bits they require.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Addressing {
    pub rex_r: bool,
    pub rex_x: bool,
    pub rex_b: bool,
    pub bytes: Vec<u8>,
}

impl Operand {
    #[must_use]
    pub const fn reg(reg: Reg64) -> Self {
        Self::Reg(reg)
    }

    /// `rm, reg` register pair; `rm` is the destination for `op r/m, r` forms.
    #[must_use]
    pub const fn pair(rm: Reg64, reg: Reg64) -> Self {
        Self::RegPair { rm, reg }
    }

    #[must_use]
    pub const fn mem(base: Reg64, disp: i32) -> Self {
        Self::Mem {
            base,
            disp,
            reg: None,
        }
    }

    #[must_use]
    pub const fn mem_reg(base: Reg64, disp: i32, reg: Reg64) -> Self {
        Self::Mem {
            base,
            disp,
            reg: Some(reg),
        }
    }

    /// Indexed memory operand. `rsp` cannot be an index register.
    pub fn indexed(
        base: Reg64,
        index: Reg64,
        scale: Scale,
        disp: i32,
        reg: Option<Reg64>,
    ) -> Result<Self> {
        if index == Reg64::Rsp {
            return Err(Error::InvalidOperand(
                "rsp cannot be used as an index register".to_string(),
            ));
        }
        Ok(Self::Indexed {
            base,
            index,
            scale,
            disp,
            reg,
        })
    }

    #[must_use]
    pub const fn is_memory(&self) -> bool {
        matches!(self, Self::Mem { .. } | Self::Indexed { .. })
    }

    /// The register carried for the ModR/M `reg` field, if any.
    #[must_use]
    pub const fn register_field(&self) -> Option<Reg64> {
        match self {
            Self::Reg(_) => None,
            Self::RegPair { reg, .. } => Some(*reg),
            Self::Mem { reg, .. } | Self::Indexed { reg, .. } => *reg,
        }
    }

    pub(crate) fn encode(&self, field: RegField) -> Result<Addressing> {
        let (reg_bits, rex_r) = match (field, self.register_field()) {
            (RegField::Operand, Some(reg)) => (reg.low_bits(), reg.is_extended()),
            (RegField::Operand, None) => {
                return Err(Error::InvalidOperand(format!(
                    "operand `{self}` is missing its register"
                )));
            }
            (RegField::Extension(digit), None) => (digit & 0x07, false),
            (RegField::Extension(_), Some(reg)) => {
                return Err(Error::InvalidOperand(format!(
                    "operand `{self}` carries unexpected register {reg}"
                )));
            }
        };

        match *self {
            Self::Reg(rm) | Self::RegPair { rm, .. } => Ok(Addressing {
                rex_r,
                rex_x: false,
                rex_b: rm.is_extended(),
                bytes: vec![modrm(0b11, reg_bits, rm.low_bits())],
            }),
            Self::Mem { base, disp, .. } => {
                let (mode, disp_bytes) = displacement(base, disp);
                let mut bytes = vec![modrm(mode, reg_bits, base.low_bits())];
                // rsp/r12 as base can only be expressed through a SIB byte.
                if base.low_bits() == 0b100 {
                    bytes.push(sib(0, 0b100, 0b100));
                }
                bytes.extend_from_slice(&disp_bytes);
                Ok(Addressing {
                    rex_r,
                    rex_x: false,
                    rex_b: base.is_extended(),
                    bytes,
                })
            }
            Self::Indexed {
                base,
                index,
                scale,
                disp,
                ..
            } => {
                if index == Reg64::Rsp {
                    return Err(Error::InvalidOperand(
                        "rsp cannot be used as an index register".to_string(),
                    ));
                }
                let (mode, disp_bytes) = displacement(base, disp);
                let mut bytes = vec![
                    modrm(mode, reg_bits, 0b100),
                    sib(scale.bits(), index.low_bits(), base.low_bits()),
                ];
                bytes.extend_from_slice(&disp_bytes);
                Ok(Addressing {
                    rex_r,
                    rex_x: index.is_extended(),
                    rex_b: base.is_extended(),
                    bytes,
                })
            }
        }
    }
}

/// Picks the `mod` bits and displacement bytes for a memory operand.
/// rbp/r13 as base has no `mod = 00` form, so a zero disp8 is emitted.
fn displacement(base: Reg64, disp: i32) -> (u8, Vec<u8>) {
    if disp == 0 && base.low_bits() != 0b101 {
        (0b00, Vec::new())
    } else if let Ok(short) = i8::try_from(disp) {
        (0b01, short.to_le_bytes().to_vec())
    } else {
        (0b10, disp.to_le_bytes().to_vec())
    }
}

const fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    (mode << 6) | ((reg & 0x07) << 3) | (rm & 0x07)
}

const fn sib(scale: u8, index: u8, base: u8) -> u8 {
    (scale << 6) | ((index & 0x07) << 3) | (base & 0x07)
}

struct Disp(i32);

impl fmt::Display for Disp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => Ok(()),
            d if d < 0 => write!(f, "-{:#x}", i64::from(d).unsigned_abs()),
            d => write!(f, "+{d:#x}"),
        }
    }
}

/// Renders the r/m side only; instructions print the `reg` side themselves.
impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reg(rm) | Self::RegPair { rm, .. } => write!(f, "{rm}"),
            Self::Mem { base, disp, .. } => write!(f, "qword [{base}{}]", Disp(*disp)),
            Self::Indexed {
                base,
                index,
                scale,
                disp,
                ..
            } => write!(
                f,
                "qword [{base}+{index}*{}{}]",
                scale.factor(),
                Disp(*disp)
            ),
        }
    }
}
