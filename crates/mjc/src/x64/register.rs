use std::fmt;

/// x86-64 general purpose register, numbered by its hardware encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg64 {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg64 {
    /// Low three bits, as placed in ModR/M, SIB, or the opcode itself.
    #[must_use]
    pub const fn low_bits(self) -> u8 {
        (self as u8) & 0x07
    }

    /// Whether the register lives in r8-r15 and needs a REX extension bit.
    #[must_use]
    pub const fn is_extended(self) -> bool {
        (self as u8) >= 8
    }

    /// Name of the low 8-bit view (`al`, `dl`, `r9b`, ...).
    #[must_use]
    pub const fn byte_name(self) -> &'static str {
        match self {
            Self::Rax => "al",
            Self::Rcx => "cl",
            Self::Rdx => "dl",
            Self::Rbx => "bl",
            Self::Rsp => "spl",
            Self::Rbp => "bpl",
            Self::Rsi => "sil",
            Self::Rdi => "dil",
            Self::R8 => "r8b",
            Self::R9 => "r9b",
            Self::R10 => "r10b",
            Self::R11 => "r11b",
            Self::R12 => "r12b",
            Self::R13 => "r13b",
            Self::R14 => "r14b",
            Self::R15 => "r15b",
        }
    }
}

impl fmt::Display for Reg64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rax => "rax",
            Self::Rcx => "rcx",
            Self::Rdx => "rdx",
            Self::Rbx => "rbx",
            Self::Rsp => "rsp",
            Self::Rbp => "rbp",
            Self::Rsi => "rsi",
            Self::Rdi => "rdi",
            Self::R8 => "r8",
            Self::R9 => "r9",
            Self::R10 => "r10",
            Self::R11 => "r11",
            Self::R12 => "r12",
            Self::R13 => "r13",
            Self::R14 => "r14",
            Self::R15 => "r15",
        };
        f.write_str(name)
    }
}

/// Condition codes shared by `Jcc` and `SETcc` (low nibble of the opcode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Condition {
    Equal = 0x4,
    NotEqual = 0x5,
    Less = 0xC,
    GreaterEqual = 0xD,
    LessEqual = 0xE,
    Greater = 0xF,
}

impl Condition {
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn negate(self) -> Self {
        match self {
            Self::Equal => Self::NotEqual,
            Self::NotEqual => Self::Equal,
            Self::Less => Self::GreaterEqual,
            Self::GreaterEqual => Self::Less,
            Self::LessEqual => Self::Greater,
            Self::Greater => Self::LessEqual,
        }
    }

    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Equal => "e",
            Self::NotEqual => "ne",
            Self::Less => "l",
            Self::GreaterEqual => "ge",
            Self::LessEqual => "le",
            Self::Greater => "g",
        }
    }
}

/// SIB scale factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scale {
    One,
    Two,
    Four,
    Eight,
}

impl Scale {
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::One => 0b00,
            Self::Two => 0b01,
            Self::Four => 0b10,
            Self::Eight => 0b11,
        }
    }

    #[must_use]
    pub const fn factor(self) -> u8 {
        1 << self.bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extended_registers() {
        assert!(!Reg64::Rdi.is_extended());
        assert!(Reg64::R8.is_extended());
        assert_eq!(Reg64::R12.low_bits(), Reg64::Rsp.low_bits());
        assert_eq!(Reg64::R13.low_bits(), Reg64::Rbp.low_bits());
    }

    #[test]
    fn test_condition_negation_is_involutive() {
        for cond in [
            Condition::Equal,
            Condition::NotEqual,
            Condition::Less,
            Condition::GreaterEqual,
            Condition::LessEqual,
            Condition::Greater,
        ] {
            assert_eq!(cond.negate().negate(), cond);
            assert_ne!(cond.negate().code(), cond.code());
        }
    }

    #[test]
    fn test_scale_factor() {
        let factors = [Scale::One, Scale::Two, Scale::Four, Scale::Eight].map(Scale::factor);
        assert_eq!(factors, [1, 2, 4, 8]);
    }
}
