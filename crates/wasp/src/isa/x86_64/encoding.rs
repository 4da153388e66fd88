//! Opcode templates and the abstract instruction catalog.
//!
//! Each `AbstrInstr` constant below describes one concrete encoding variant
//! of an x86-64 instruction: its opcode template plus the operand-form
//! constraints instruction selection matches against. Catalog order at the
//! call sites matters: callers list cheaper encodings (immediates, then
//! register forms) before more expensive ones.

use wasp_core::MachineType;

/// An x86-64 condition code, i.e. the low nibble of `Jcc`/`SETcc`/`CMOVcc`
/// opcodes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Cc {
    O = 0x0,
    No = 0x1,
    B = 0x2,
    Ae = 0x3,
    E = 0x4,
    Ne = 0x5,
    Be = 0x6,
    A = 0x7,
    S = 0x8,
    Ns = 0x9,
    P = 0xA,
    Np = 0xB,
    L = 0xC,
    Ge = 0xD,
    Le = 0xE,
    G = 0xF,
}

impl Cc {
    /// Returns the inverted condition code (`E` ↔ `NE`, `L` ↔ `GE`, …).
    pub fn negate(self) -> Self {
        // Flipping the low bit inverts any x86 condition.
        match self as u8 ^ 1 {
            0x0 => Self::O,
            0x1 => Self::No,
            0x2 => Self::B,
            0x3 => Self::Ae,
            0x4 => Self::E,
            0x5 => Self::Ne,
            0x6 => Self::Be,
            0x7 => Self::A,
            0x8 => Self::S,
            0x9 => Self::Ns,
            0xA => Self::P,
            0xB => Self::Np,
            0xC => Self::L,
            0xD => Self::Ge,
            0xE => Self::Le,
            _ => Self::G,
        }
    }
}

/// REX prefix requirement of an opcode template.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Rex {
    /// No REX unless an extended register forces one.
    None,
    /// REX.W: 64-bit operand size.
    W,
}

/// Marks the `r` and/or `rm` operand of a template as 8-bit.
///
/// The assembler needs this to emit a plain REX prefix for `spl`, `bpl`,
/// `sil`, `dil` (which would otherwise encode `ah`..`bh`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum B8 {
    None,
    R,
    Rm,
    Both,
}

impl B8 {
    pub fn covers_r(self) -> bool {
        matches!(self, Self::R | Self::Both)
    }

    pub fn covers_rm(self) -> bool {
        matches!(self, Self::Rm | Self::Both)
    }
}

/// The opcode extension: what the ModRM `reg` field carries, or whether the
/// register is added into the opcode byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpcodeExt {
    /// `/0`..`/7`: the `reg` field is a fixed digit.
    Digit(u8),
    /// `/r`: the `reg` field names a register operand.
    R,
    /// `+r`: the register is added to the last opcode byte; no ModRM.
    RAdd,
    /// No ModRM byte at all.
    None,
}

/// Basic template for one x86-64 opcode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OpcodeTemplate {
    /// Mandatory prefix byte (`0x66`, `0xF2`, `0xF3`) or 0.
    pub prefix: u8,
    /// REX requirement.
    pub rex: Rex,
    /// 8-bit operand marking.
    pub b8: B8,
    /// Opcode extension.
    pub ext: OpcodeExt,
    /// Opcode bytes, most significant first (`0x0F2E` emits `0F 2E`).
    pub opcode: u32,
}

impl OpcodeTemplate {
    pub const fn new(prefix: u8, rex: Rex, b8: B8, ext: OpcodeExt, opcode: u32) -> Self {
        Self {
            prefix,
            rex,
            b8,
            ext,
            opcode,
        }
    }
}

/// Operand-form constraint of one `AbstrInstr` slot.
///
/// Encodes both the machine type and the storage classes an operand may be
/// in for the instruction to be usable without lifting.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ArgType {
    /// The slot does not exist (unary instructions).
    None,
    // 32-bit integer forms
    R32,
    Rm32,
    Imm32,
    Imm8Sx32,
    Imm8_32,
    /// The literal constant 1 (shift-by-one encodings).
    C1_32,
    // 64-bit integer forms
    R64,
    Rm64,
    Imm32Sx64,
    Imm8Sx64,
    Imm8_64,
    C1_64,
    // float forms
    R32F,
    Rm32F,
    R64F,
    Rm64F,
}

impl ArgType {
    /// Returns the machine type this constraint ranges over.
    pub fn machine_type(self) -> Option<MachineType> {
        match self {
            Self::None => Option::None,
            Self::R32 | Self::Rm32 | Self::Imm32 | Self::Imm8Sx32 | Self::Imm8_32 | Self::C1_32 => {
                Some(MachineType::I32)
            }
            Self::R64 | Self::Rm64 | Self::Imm32Sx64 | Self::Imm8Sx64 | Self::Imm8_64
            | Self::C1_64 => Some(MachineType::I64),
            Self::R32F | Self::Rm32F => Some(MachineType::F32),
            Self::R64F | Self::Rm64F => Some(MachineType::F64),
        }
    }

    /// Returns `true` if the constraint admits a memory operand.
    pub fn admits_memory(self) -> bool {
        matches!(
            self,
            Self::Rm32 | Self::Rm64 | Self::Rm32F | Self::Rm64F
        )
    }

    /// Returns `true` if the constraint admits a register operand.
    pub fn admits_register(self) -> bool {
        matches!(
            self,
            Self::R32
                | Self::Rm32
                | Self::R64
                | Self::Rm64
                | Self::R32F
                | Self::Rm32F
                | Self::R64F
                | Self::Rm64F
        )
    }

    /// Returns `true` if the constraint is an immediate form.
    pub fn is_immediate(self) -> bool {
        matches!(
            self,
            Self::Imm32
                | Self::Imm8Sx32
                | Self::Imm8_32
                | Self::C1_32
                | Self::Imm32Sx64
                | Self::Imm8Sx64
                | Self::Imm8_64
                | Self::C1_64
        )
    }
}

/// Complete description of one encodable x86-64 instruction variant.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AbstrInstr {
    pub template: OpcodeTemplate,
    pub dst_type: ArgType,
    pub src_type: ArgType,
    /// `true` if the instruction has a single input (the destination does
    /// not contribute to the result).
    pub unop: bool,
    /// `true` if destination and source slots may be swapped.
    pub commutative: bool,
}

impl AbstrInstr {
    pub const fn new(
        template: OpcodeTemplate,
        dst_type: ArgType,
        src_type: ArgType,
        unop: bool,
        commutative: bool,
    ) -> Self {
        Self {
            template,
            dst_type,
            src_type,
            unop,
            commutative,
        }
    }

    /// Returns `self` with the commutative flag set.
    ///
    /// Used for comparisons: `CMP` is not commutative as an instruction,
    /// but a comparison consumer can undo a swap by reversing its branch
    /// condition, so selection is allowed to commute it.
    pub const fn commutative(mut self) -> Self {
        self.commutative = true;
        self
    }
}

macro_rules! instr {
    ($name:ident: ($prefix:expr, $rex:expr, $b8:expr, $ext:expr, $opcode:expr),
     $dst:expr, $src:expr, unop: $unop:expr, comm: $comm:expr) => {
        pub const $name: AbstrInstr = AbstrInstr::new(
            OpcodeTemplate::new($prefix, $rex, $b8, $ext, $opcode),
            $dst,
            $src,
            $unop,
            $comm,
        );
    };
}

use ArgType::*;
use OpcodeExt::{Digit, R, RAdd};

// ---- compare / test --------------------------------------------------------

instr!(CMP_RM32_IMM8SX: (0, Rex::None, B8::None, Digit(7), 0x83), Rm32, Imm8Sx32, unop: false, comm: false);
instr!(CMP_RM32_IMM32:  (0, Rex::None, B8::None, Digit(7), 0x81), Rm32, Imm32, unop: false, comm: false);
instr!(CMP_RM32_R32:    (0, Rex::None, B8::None, R, 0x39), Rm32, R32, unop: false, comm: false);
instr!(CMP_R32_RM32:    (0, Rex::None, B8::None, R, 0x3B), R32, Rm32, unop: false, comm: false);
instr!(CMP_RM64_IMM8SX: (0, Rex::W, B8::None, Digit(7), 0x83), Rm64, Imm8Sx64, unop: false, comm: false);
instr!(CMP_RM64_IMM32SX:(0, Rex::W, B8::None, Digit(7), 0x81), Rm64, Imm32Sx64, unop: false, comm: false);
instr!(CMP_RM64_R64:    (0, Rex::W, B8::None, R, 0x39), Rm64, R64, unop: false, comm: false);
instr!(CMP_R64_RM64:    (0, Rex::W, B8::None, R, 0x3B), R64, Rm64, unop: false, comm: false);

instr!(TEST_RM32_R32:   (0, Rex::None, B8::None, R, 0x85), Rm32, R32, unop: false, comm: true);
instr!(TEST_RM32_IMM32: (0, Rex::None, B8::None, Digit(0), 0xF7), Rm32, Imm32, unop: false, comm: false);
instr!(TEST_RM64_R64:   (0, Rex::W, B8::None, R, 0x85), Rm64, R64, unop: false, comm: true);

instr!(UCOMISS_RF_RMF:  (0, Rex::None, B8::None, R, 0x0F2E), R32F, Rm32F, unop: false, comm: false);
instr!(UCOMISD_RF_RMF:  (0x66, Rex::None, B8::None, R, 0x0F2E), R64F, Rm64F, unop: false, comm: false);

// ---- integer arithmetic ----------------------------------------------------

instr!(ADD_RM32_IMM8SX: (0, Rex::None, B8::None, Digit(0), 0x83), Rm32, Imm8Sx32, unop: false, comm: true);
instr!(ADD_RM32_IMM32:  (0, Rex::None, B8::None, Digit(0), 0x81), Rm32, Imm32, unop: false, comm: true);
instr!(ADD_RM32_R32:    (0, Rex::None, B8::None, R, 0x01), Rm32, R32, unop: false, comm: true);
instr!(ADD_R32_RM32:    (0, Rex::None, B8::None, R, 0x03), R32, Rm32, unop: false, comm: true);
instr!(ADD_RM64_IMM8SX: (0, Rex::W, B8::None, Digit(0), 0x83), Rm64, Imm8Sx64, unop: false, comm: true);
instr!(ADD_RM64_IMM32SX:(0, Rex::W, B8::None, Digit(0), 0x81), Rm64, Imm32Sx64, unop: false, comm: true);
instr!(ADD_RM64_R64:    (0, Rex::W, B8::None, R, 0x01), Rm64, R64, unop: false, comm: true);
instr!(ADD_R64_RM64:    (0, Rex::W, B8::None, R, 0x03), R64, Rm64, unop: false, comm: true);

instr!(SUB_RM32_IMM8SX: (0, Rex::None, B8::None, Digit(5), 0x83), Rm32, Imm8Sx32, unop: false, comm: false);
instr!(SUB_RM32_IMM32:  (0, Rex::None, B8::None, Digit(5), 0x81), Rm32, Imm32, unop: false, comm: false);
instr!(SUB_RM32_R32:    (0, Rex::None, B8::None, R, 0x29), Rm32, R32, unop: false, comm: false);
instr!(SUB_R32_RM32:    (0, Rex::None, B8::None, R, 0x2B), R32, Rm32, unop: false, comm: false);
instr!(SUB_RM64_IMM8SX: (0, Rex::W, B8::None, Digit(5), 0x83), Rm64, Imm8Sx64, unop: false, comm: false);
instr!(SUB_RM64_IMM32SX:(0, Rex::W, B8::None, Digit(5), 0x81), Rm64, Imm32Sx64, unop: false, comm: false);
instr!(SUB_RM64_R64:    (0, Rex::W, B8::None, R, 0x29), Rm64, R64, unop: false, comm: false);
instr!(SUB_R64_RM64:    (0, Rex::W, B8::None, R, 0x2B), R64, Rm64, unop: false, comm: false);

instr!(AND_RM32_IMM8SX: (0, Rex::None, B8::None, Digit(4), 0x83), Rm32, Imm8Sx32, unop: false, comm: true);
instr!(AND_RM32_IMM32:  (0, Rex::None, B8::None, Digit(4), 0x81), Rm32, Imm32, unop: false, comm: true);
instr!(AND_RM32_R32:    (0, Rex::None, B8::None, R, 0x21), Rm32, R32, unop: false, comm: true);
instr!(AND_R32_RM32:    (0, Rex::None, B8::None, R, 0x23), R32, Rm32, unop: false, comm: true);
instr!(AND_RM64_IMM8SX: (0, Rex::W, B8::None, Digit(4), 0x83), Rm64, Imm8Sx64, unop: false, comm: true);
instr!(AND_RM64_IMM32SX:(0, Rex::W, B8::None, Digit(4), 0x81), Rm64, Imm32Sx64, unop: false, comm: true);
instr!(AND_RM64_R64:    (0, Rex::W, B8::None, R, 0x21), Rm64, R64, unop: false, comm: true);
instr!(AND_R64_RM64:    (0, Rex::W, B8::None, R, 0x23), R64, Rm64, unop: false, comm: true);

instr!(OR_RM32_IMM8SX:  (0, Rex::None, B8::None, Digit(1), 0x83), Rm32, Imm8Sx32, unop: false, comm: true);
instr!(OR_RM32_IMM32:   (0, Rex::None, B8::None, Digit(1), 0x81), Rm32, Imm32, unop: false, comm: true);
instr!(OR_RM32_R32:     (0, Rex::None, B8::None, R, 0x09), Rm32, R32, unop: false, comm: true);
instr!(OR_R32_RM32:     (0, Rex::None, B8::None, R, 0x0B), R32, Rm32, unop: false, comm: true);
instr!(OR_RM64_IMM8SX:  (0, Rex::W, B8::None, Digit(1), 0x83), Rm64, Imm8Sx64, unop: false, comm: true);
instr!(OR_RM64_IMM32SX: (0, Rex::W, B8::None, Digit(1), 0x81), Rm64, Imm32Sx64, unop: false, comm: true);
instr!(OR_RM64_R64:     (0, Rex::W, B8::None, R, 0x09), Rm64, R64, unop: false, comm: true);
instr!(OR_R64_RM64:     (0, Rex::W, B8::None, R, 0x0B), R64, Rm64, unop: false, comm: true);

instr!(XOR_RM32_IMM8SX: (0, Rex::None, B8::None, Digit(6), 0x83), Rm32, Imm8Sx32, unop: false, comm: true);
instr!(XOR_RM32_IMM32:  (0, Rex::None, B8::None, Digit(6), 0x81), Rm32, Imm32, unop: false, comm: true);
instr!(XOR_RM32_R32:    (0, Rex::None, B8::None, R, 0x31), Rm32, R32, unop: false, comm: true);
instr!(XOR_R32_RM32:    (0, Rex::None, B8::None, R, 0x33), R32, Rm32, unop: false, comm: true);
instr!(XOR_RM64_IMM8SX: (0, Rex::W, B8::None, Digit(6), 0x83), Rm64, Imm8Sx64, unop: false, comm: true);
instr!(XOR_RM64_IMM32SX:(0, Rex::W, B8::None, Digit(6), 0x81), Rm64, Imm32Sx64, unop: false, comm: true);
instr!(XOR_RM64_R64:    (0, Rex::W, B8::None, R, 0x31), Rm64, R64, unop: false, comm: true);
instr!(XOR_R64_RM64:    (0, Rex::W, B8::None, R, 0x33), R64, Rm64, unop: false, comm: true);

instr!(IMUL_R32_RM32:   (0, Rex::None, B8::None, R, 0x0FAF), R32, Rm32, unop: false, comm: true);
instr!(IMUL_R64_RM64:   (0, Rex::W, B8::None, R, 0x0FAF), R64, Rm64, unop: false, comm: true);

instr!(NEG_RM32: (0, Rex::None, B8::None, Digit(3), 0xF7), Rm32, None, unop: true, comm: false);
instr!(NEG_RM64: (0, Rex::W, B8::None, Digit(3), 0xF7), Rm64, None, unop: true, comm: false);
instr!(DIV_RM32: (0, Rex::None, B8::None, Digit(6), 0xF7), Rm32, None, unop: true, comm: false);
instr!(DIV_RM64: (0, Rex::W, B8::None, Digit(6), 0xF7), Rm64, None, unop: true, comm: false);
instr!(IDIV_RM32:(0, Rex::None, B8::None, Digit(7), 0xF7), Rm32, None, unop: true, comm: false);
instr!(IDIV_RM64:(0, Rex::W, B8::None, Digit(7), 0xF7), Rm64, None, unop: true, comm: false);

instr!(LZCNT_R32_RM32:  (0xF3, Rex::None, B8::None, R, 0x0FBD), R32, Rm32, unop: true, comm: false);
instr!(LZCNT_R64_RM64:  (0xF3, Rex::W, B8::None, R, 0x0FBD), R64, Rm64, unop: true, comm: false);
instr!(TZCNT_R32_RM32:  (0xF3, Rex::None, B8::None, R, 0x0FBC), R32, Rm32, unop: true, comm: false);
instr!(TZCNT_R64_RM64:  (0xF3, Rex::W, B8::None, R, 0x0FBC), R64, Rm64, unop: true, comm: false);
instr!(POPCNT_R32_RM32: (0xF3, Rex::None, B8::None, R, 0x0FB8), R32, Rm32, unop: true, comm: false);
instr!(POPCNT_R64_RM64: (0xF3, Rex::W, B8::None, R, 0x0FB8), R64, Rm64, unop: true, comm: false);

// ---- shifts and rotates ----------------------------------------------------

instr!(SHL_RM32_C1:   (0, Rex::None, B8::None, Digit(4), 0xD1), Rm32, C1_32, unop: false, comm: false);
instr!(SHL_RM32_IMM8: (0, Rex::None, B8::None, Digit(4), 0xC1), Rm32, Imm8_32, unop: false, comm: false);
instr!(SHL_RM32_CL:   (0, Rex::None, B8::None, Digit(4), 0xD3), Rm32, None, unop: true, comm: false);
instr!(SHR_RM32_C1:   (0, Rex::None, B8::None, Digit(5), 0xD1), Rm32, C1_32, unop: false, comm: false);
instr!(SHR_RM32_IMM8: (0, Rex::None, B8::None, Digit(5), 0xC1), Rm32, Imm8_32, unop: false, comm: false);
instr!(SHR_RM32_CL:   (0, Rex::None, B8::None, Digit(5), 0xD3), Rm32, None, unop: true, comm: false);
instr!(SAR_RM32_C1:   (0, Rex::None, B8::None, Digit(7), 0xD1), Rm32, C1_32, unop: false, comm: false);
instr!(SAR_RM32_IMM8: (0, Rex::None, B8::None, Digit(7), 0xC1), Rm32, Imm8_32, unop: false, comm: false);
instr!(SAR_RM32_CL:   (0, Rex::None, B8::None, Digit(7), 0xD3), Rm32, None, unop: true, comm: false);
instr!(ROL_RM32_C1:   (0, Rex::None, B8::None, Digit(0), 0xD1), Rm32, C1_32, unop: false, comm: false);
instr!(ROL_RM32_IMM8: (0, Rex::None, B8::None, Digit(0), 0xC1), Rm32, Imm8_32, unop: false, comm: false);
instr!(ROL_RM32_CL:   (0, Rex::None, B8::None, Digit(0), 0xD3), Rm32, None, unop: true, comm: false);
instr!(ROR_RM32_C1:   (0, Rex::None, B8::None, Digit(1), 0xD1), Rm32, C1_32, unop: false, comm: false);
instr!(ROR_RM32_IMM8: (0, Rex::None, B8::None, Digit(1), 0xC1), Rm32, Imm8_32, unop: false, comm: false);
instr!(ROR_RM32_CL:   (0, Rex::None, B8::None, Digit(1), 0xD3), Rm32, None, unop: true, comm: false);

instr!(SHL_RM64_C1:   (0, Rex::W, B8::None, Digit(4), 0xD1), Rm64, C1_64, unop: false, comm: false);
instr!(SHL_RM64_IMM8: (0, Rex::W, B8::None, Digit(4), 0xC1), Rm64, Imm8_64, unop: false, comm: false);
instr!(SHL_RM64_CL:   (0, Rex::W, B8::None, Digit(4), 0xD3), Rm64, None, unop: true, comm: false);
instr!(SHR_RM64_C1:   (0, Rex::W, B8::None, Digit(5), 0xD1), Rm64, C1_64, unop: false, comm: false);
instr!(SHR_RM64_IMM8: (0, Rex::W, B8::None, Digit(5), 0xC1), Rm64, Imm8_64, unop: false, comm: false);
instr!(SHR_RM64_CL:   (0, Rex::W, B8::None, Digit(5), 0xD3), Rm64, None, unop: true, comm: false);
instr!(SAR_RM64_C1:   (0, Rex::W, B8::None, Digit(7), 0xD1), Rm64, C1_64, unop: false, comm: false);
instr!(SAR_RM64_IMM8: (0, Rex::W, B8::None, Digit(7), 0xC1), Rm64, Imm8_64, unop: false, comm: false);
instr!(SAR_RM64_CL:   (0, Rex::W, B8::None, Digit(7), 0xD3), Rm64, None, unop: true, comm: false);
instr!(ROL_RM64_C1:   (0, Rex::W, B8::None, Digit(0), 0xD1), Rm64, C1_64, unop: false, comm: false);
instr!(ROL_RM64_IMM8: (0, Rex::W, B8::None, Digit(0), 0xC1), Rm64, Imm8_64, unop: false, comm: false);
instr!(ROL_RM64_CL:   (0, Rex::W, B8::None, Digit(0), 0xD3), Rm64, None, unop: true, comm: false);
instr!(ROR_RM64_C1:   (0, Rex::W, B8::None, Digit(1), 0xD1), Rm64, C1_64, unop: false, comm: false);
instr!(ROR_RM64_IMM8: (0, Rex::W, B8::None, Digit(1), 0xC1), Rm64, Imm8_64, unop: false, comm: false);
instr!(ROR_RM64_CL:   (0, Rex::W, B8::None, Digit(1), 0xD3), Rm64, None, unop: true, comm: false);

// ---- moves and extensions --------------------------------------------------

instr!(MOV_RM32_R32:   (0, Rex::None, B8::None, R, 0x89), Rm32, R32, unop: true, comm: false);
instr!(MOV_R32_RM32:   (0, Rex::None, B8::None, R, 0x8B), R32, Rm32, unop: true, comm: false);
instr!(MOV_RM32_IMM32: (0, Rex::None, B8::None, Digit(0), 0xC7), Rm32, Imm32, unop: true, comm: false);
instr!(MOV_RM64_R64:   (0, Rex::W, B8::None, R, 0x89), Rm64, R64, unop: true, comm: false);
instr!(MOV_R64_RM64:   (0, Rex::W, B8::None, R, 0x8B), R64, Rm64, unop: true, comm: false);
instr!(MOV_RM64_IMM32SX:(0, Rex::W, B8::None, Digit(0), 0xC7), Rm64, Imm32Sx64, unop: true, comm: false);
instr!(MOV_R64_IMM64:  (0, Rex::W, B8::None, RAdd, 0xB8), R64, None, unop: true, comm: false);
instr!(MOV_RM8_R8:     (0, Rex::None, B8::Both, R, 0x88), Rm32, R32, unop: true, comm: false);
instr!(MOV_RM16_R16:   (0x66, Rex::None, B8::None, R, 0x89), Rm32, R32, unop: true, comm: false);

instr!(MOVSXD_R64_RM32:(0, Rex::W, B8::None, R, 0x63), R64, Rm32, unop: true, comm: false);
instr!(MOVSX_R32_RM8:  (0, Rex::None, B8::Rm, R, 0x0FBE), R32, Rm32, unop: true, comm: false);
instr!(MOVSX_R32_RM16: (0, Rex::None, B8::None, R, 0x0FBF), R32, Rm32, unop: true, comm: false);
instr!(MOVSX_R64_RM8:  (0, Rex::W, B8::Rm, R, 0x0FBE), R64, Rm64, unop: true, comm: false);
instr!(MOVSX_R64_RM16: (0, Rex::W, B8::None, R, 0x0FBF), R64, Rm64, unop: true, comm: false);
instr!(MOVZX_R32_RM8:  (0, Rex::None, B8::Rm, R, 0x0FB6), R32, Rm32, unop: true, comm: false);
instr!(MOVZX_R32_RM16: (0, Rex::None, B8::None, R, 0x0FB7), R32, Rm32, unop: true, comm: false);

instr!(LEA_R64_M:      (0, Rex::W, B8::None, R, 0x8D), R64, Rm64, unop: true, comm: false);
instr!(XCHG_RM64_R64:  (0, Rex::W, B8::None, R, 0x87), Rm64, R64, unop: false, comm: true);
// CMOVcc base; the condition nibble is added via `set_cc`.
instr!(CMOVCC_R32_RM32: (0, Rex::None, B8::None, R, 0x0F40), R32, Rm32, unop: false, comm: false);
instr!(CMOVCC_R64_RM64: (0, Rex::W, B8::None, R, 0x0F40), R64, Rm64, unop: false, comm: false);
instr!(BTS_RM64_IMM8:  (0, Rex::W, B8::None, Digit(5), 0x0FBA), Rm64, Imm8_64, unop: false, comm: false);

instr!(PUSH_R64: (0, Rex::None, B8::None, RAdd, 0x50), Rm64, None, unop: true, comm: false);
instr!(POP_R64:  (0, Rex::None, B8::None, RAdd, 0x58), Rm64, None, unop: true, comm: false);

// ---- float arithmetic ------------------------------------------------------

instr!(MOVSS_RF_RMF: (0xF3, Rex::None, B8::None, R, 0x0F10), R32F, Rm32F, unop: true, comm: false);
instr!(MOVSS_RMF_RF: (0xF3, Rex::None, B8::None, R, 0x0F11), Rm32F, R32F, unop: true, comm: false);
instr!(MOVSD_RF_RMF: (0xF2, Rex::None, B8::None, R, 0x0F10), R64F, Rm64F, unop: true, comm: false);
instr!(MOVSD_RMF_RF: (0xF2, Rex::None, B8::None, R, 0x0F11), Rm64F, R64F, unop: true, comm: false);
instr!(MOVAPS_RF_RF: (0, Rex::None, B8::None, R, 0x0F28), R32F, R32F, unop: true, comm: false);

instr!(MOVD_RF_RM32: (0x66, Rex::None, B8::None, R, 0x0F6E), R32F, Rm32, unop: true, comm: false);
instr!(MOVD_RM32_RF: (0x66, Rex::None, B8::None, R, 0x0F7E), Rm32, R32F, unop: true, comm: false);
instr!(MOVQ_RF_RM64: (0x66, Rex::W, B8::None, R, 0x0F6E), R64F, Rm64, unop: true, comm: false);
instr!(MOVQ_RM64_RF: (0x66, Rex::W, B8::None, R, 0x0F7E), Rm64, R64F, unop: true, comm: false);

instr!(ADDSS_RF_RMF: (0xF3, Rex::None, B8::None, R, 0x0F58), R32F, Rm32F, unop: false, comm: true);
instr!(ADDSD_RF_RMF: (0xF2, Rex::None, B8::None, R, 0x0F58), R64F, Rm64F, unop: false, comm: true);
instr!(SUBSS_RF_RMF: (0xF3, Rex::None, B8::None, R, 0x0F5C), R32F, Rm32F, unop: false, comm: false);
instr!(SUBSD_RF_RMF: (0xF2, Rex::None, B8::None, R, 0x0F5C), R64F, Rm64F, unop: false, comm: false);
instr!(MULSS_RF_RMF: (0xF3, Rex::None, B8::None, R, 0x0F59), R32F, Rm32F, unop: false, comm: true);
instr!(MULSD_RF_RMF: (0xF2, Rex::None, B8::None, R, 0x0F59), R64F, Rm64F, unop: false, comm: true);
instr!(DIVSS_RF_RMF: (0xF3, Rex::None, B8::None, R, 0x0F5E), R32F, Rm32F, unop: false, comm: false);
instr!(DIVSD_RF_RMF: (0xF2, Rex::None, B8::None, R, 0x0F5E), R64F, Rm64F, unop: false, comm: false);

instr!(SQRTSS_RF_RMF: (0xF3, Rex::None, B8::None, R, 0x0F51), R32F, Rm32F, unop: true, comm: false);
instr!(SQRTSD_RF_RMF: (0xF2, Rex::None, B8::None, R, 0x0F51), R64F, Rm64F, unop: true, comm: false);

// MINSS/MAXSS pick the wrong operand for NaN and signed zeros, so the
// backend only uses them on the strictly-ordered unequal path.
instr!(MINSS_RF_RMF: (0xF3, Rex::None, B8::None, R, 0x0F5D), R32F, Rm32F, unop: false, comm: false);
instr!(MINSD_RF_RMF: (0xF2, Rex::None, B8::None, R, 0x0F5D), R64F, Rm64F, unop: false, comm: false);
instr!(MAXSS_RF_RMF: (0xF3, Rex::None, B8::None, R, 0x0F5F), R32F, Rm32F, unop: false, comm: false);
instr!(MAXSD_RF_RMF: (0xF2, Rex::None, B8::None, R, 0x0F5F), R64F, Rm64F, unop: false, comm: false);

// ROUNDSS/ROUNDSD carry their rounding mode as a trailing imm8 set by the
// backend, not matched by selection.
instr!(ROUNDSS_RF_RMF: (0x66, Rex::None, B8::None, R, 0x0F3A0A), R32F, Rm32F, unop: true, comm: false);
instr!(ROUNDSD_RF_RMF: (0x66, Rex::None, B8::None, R, 0x0F3A0B), R64F, Rm64F, unop: true, comm: false);

// Bitwise ops on float registers; register-only so selection lifts memory
// operands instead of risking unaligned 128-bit accesses.
instr!(ANDPS_RF_RF: (0, Rex::None, B8::None, R, 0x0F54), R32F, R32F, unop: false, comm: true);
instr!(ANDPD_RF_RF: (0x66, Rex::None, B8::None, R, 0x0F54), R64F, R64F, unop: false, comm: true);
instr!(ORPS_RF_RF:  (0, Rex::None, B8::None, R, 0x0F56), R32F, R32F, unop: false, comm: true);
instr!(ORPD_RF_RF:  (0x66, Rex::None, B8::None, R, 0x0F56), R64F, R64F, unop: false, comm: true);
instr!(XORPS_RF_RF: (0, Rex::None, B8::None, R, 0x0F57), R32F, R32F, unop: false, comm: true);
instr!(XORPD_RF_RF: (0x66, Rex::None, B8::None, R, 0x0F57), R64F, R64F, unop: false, comm: true);

instr!(PSLLD_RF_IMM8: (0x66, Rex::None, B8::None, Digit(6), 0x0F72), R32F, Imm8_32, unop: false, comm: false);
instr!(PSRLD_RF_IMM8: (0x66, Rex::None, B8::None, Digit(2), 0x0F72), R32F, Imm8_32, unop: false, comm: false);
instr!(PSLLQ_RF_IMM8: (0x66, Rex::None, B8::None, Digit(6), 0x0F73), R64F, Imm8_64, unop: false, comm: false);
instr!(PSRLQ_RF_IMM8: (0x66, Rex::None, B8::None, Digit(2), 0x0F73), R64F, Imm8_64, unop: false, comm: false);

// ---- conversions -----------------------------------------------------------

instr!(CVTSI2SS_RF_RM32: (0xF3, Rex::None, B8::None, R, 0x0F2A), R32F, Rm32, unop: true, comm: false);
instr!(CVTSI2SS_RF_RM64: (0xF3, Rex::W, B8::None, R, 0x0F2A), R32F, Rm64, unop: true, comm: false);
instr!(CVTSI2SD_RF_RM32: (0xF2, Rex::None, B8::None, R, 0x0F2A), R64F, Rm32, unop: true, comm: false);
instr!(CVTSI2SD_RF_RM64: (0xF2, Rex::W, B8::None, R, 0x0F2A), R64F, Rm64, unop: true, comm: false);
instr!(CVTTSS2SI_R32_RMF: (0xF3, Rex::None, B8::None, R, 0x0F2C), R32, Rm32F, unop: true, comm: false);
instr!(CVTTSS2SI_R64_RMF: (0xF3, Rex::W, B8::None, R, 0x0F2C), R64, Rm32F, unop: true, comm: false);
instr!(CVTTSD2SI_R32_RMF: (0xF2, Rex::None, B8::None, R, 0x0F2C), R32, Rm64F, unop: true, comm: false);
instr!(CVTTSD2SI_R64_RMF: (0xF2, Rex::W, B8::None, R, 0x0F2C), R64, Rm64F, unop: true, comm: false);
instr!(CVTSS2SD_RF_RMF:  (0xF3, Rex::None, B8::None, R, 0x0F5A), R64F, Rm32F, unop: true, comm: false);
instr!(CVTSD2SS_RF_RMF:  (0xF2, Rex::None, B8::None, R, 0x0F5A), R32F, Rm64F, unop: true, comm: false);

// ---- control transfer and misc --------------------------------------------

instr!(JMP_REL8:  (0, Rex::None, B8::None, OpcodeExt::None, 0xEB), None, None, unop: false, comm: false);
instr!(JMP_REL32: (0, Rex::None, B8::None, OpcodeExt::None, 0xE9), None, None, unop: false, comm: false);
instr!(JCC_REL8:  (0, Rex::None, B8::None, OpcodeExt::None, 0x70), None, None, unop: false, comm: false);
instr!(JCC_REL32: (0, Rex::None, B8::None, OpcodeExt::None, 0x0F80), None, None, unop: false, comm: false);
instr!(CALL_REL32:(0, Rex::None, B8::None, OpcodeExt::None, 0xE8), None, None, unop: false, comm: false);
instr!(CALL_RM64: (0, Rex::None, B8::None, Digit(2), 0xFF), Rm64, None, unop: true, comm: false);
instr!(JMP_RM64:  (0, Rex::None, B8::None, Digit(4), 0xFF), Rm64, None, unop: true, comm: false);
instr!(RET:       (0, Rex::None, B8::None, OpcodeExt::None, 0xC3), None, None, unop: false, comm: false);
instr!(UD2:       (0, Rex::None, B8::None, OpcodeExt::None, 0x0F0B), None, None, unop: false, comm: false);

instr!(SETCC_RM8:     (0, Rex::None, B8::Rm, Digit(0), 0x0F90), Rm32, None, unop: true, comm: false);
instr!(CDQ: (0, Rex::None, B8::None, OpcodeExt::None, 0x99), None, None, unop: false, comm: false);
instr!(CQO: (0, Rex::W, B8::None, OpcodeExt::None, 0x99), None, None, unop: false, comm: false);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cc_negation_flips_the_low_bit() {
        assert_eq!(Cc::E.negate(), Cc::Ne);
        assert_eq!(Cc::Ne.negate(), Cc::E);
        assert_eq!(Cc::L.negate(), Cc::Ge);
        assert_eq!(Cc::A.negate(), Cc::Be);
        assert_eq!(Cc::P.negate(), Cc::Np);
    }

    #[test]
    fn catalog_families_share_types_and_commutativity() {
        for family in [
            [ADD_RM32_IMM8SX, ADD_RM32_IMM32, ADD_RM32_R32, ADD_R32_RM32],
            [SUB_RM32_IMM8SX, SUB_RM32_IMM32, SUB_RM32_R32, SUB_R32_RM32],
            [AND_RM64_IMM8SX, AND_RM64_IMM32SX, AND_RM64_R64, AND_R64_RM64],
        ] {
            let first = family[0];
            for instr in family {
                assert_eq!(instr.commutative, first.commutative);
                assert_eq!(instr.unop, first.unop);
                assert_eq!(
                    instr.dst_type.machine_type(),
                    first.dst_type.machine_type()
                );
            }
        }
    }

    #[test]
    fn commutative_override_only_touches_the_flag() {
        let cmp = CMP_RM32_R32.commutative();
        assert!(cmp.commutative);
        assert_eq!(cmp.template, CMP_RM32_R32.template);
        assert!(!CMP_RM32_R32.commutative);
    }
}
