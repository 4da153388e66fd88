use super::regs::Reg;
use crate::{
    compiler::MemWriter,
    isa::safe_int::{SafeInt, SafeUint},
    Error,
};

/// An AArch64 condition code (the low nibble of `B.cond`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    Eq = 0x0,
    Ne = 0x1,
    Cs = 0x2,
    Cc = 0x3,
    Mi = 0x4,
    Pl = 0x5,
    Vs = 0x6,
    Vc = 0x7,
    Hi = 0x8,
    Ls = 0x9,
    Ge = 0xA,
    Lt = 0xB,
    Gt = 0xC,
    Le = 0xD,
    Al = 0xE,
}

/// Base word of one AArch64 instruction with all operand fields zero.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OpcodeTemplate(pub u32);

/// Templates for the instruction classes the port emits.
#[rustfmt::skip]
pub mod templates {
    use super::OpcodeTemplate;

    // arithmetic, immediate and shifted-register forms
    pub const ADD_X_IMM12: OpcodeTemplate = OpcodeTemplate(0x9100_0000);
    pub const ADD_W_IMM12: OpcodeTemplate = OpcodeTemplate(0x1100_0000);
    pub const SUB_X_IMM12: OpcodeTemplate = OpcodeTemplate(0xD100_0000);
    pub const SUB_W_IMM12: OpcodeTemplate = OpcodeTemplate(0x5100_0000);
    pub const SUBS_X_IMM12: OpcodeTemplate = OpcodeTemplate(0xF100_0000);
    pub const ADD_X_REG: OpcodeTemplate = OpcodeTemplate(0x8B00_0000);
    pub const ADD_W_REG: OpcodeTemplate = OpcodeTemplate(0x0B00_0000);
    pub const SUB_X_REG: OpcodeTemplate = OpcodeTemplate(0xCB00_0000);
    pub const SUB_W_REG: OpcodeTemplate = OpcodeTemplate(0x4B00_0000);
    pub const SUBS_X_REG: OpcodeTemplate = OpcodeTemplate(0xEB00_0000);
    pub const SUBS_W_REG: OpcodeTemplate = OpcodeTemplate(0x6B00_0000);

    // logical, shifted-register forms
    pub const AND_X_REG: OpcodeTemplate = OpcodeTemplate(0x8A00_0000);
    pub const ORR_X_REG: OpcodeTemplate = OpcodeTemplate(0xAA00_0000);
    pub const EOR_X_REG: OpcodeTemplate = OpcodeTemplate(0xCA00_0000);

    // wide moves
    pub const MOVZ_X: OpcodeTemplate = OpcodeTemplate(0xD280_0000);
    pub const MOVK_X: OpcodeTemplate = OpcodeTemplate(0xF280_0000);
    pub const MOVN_X: OpcodeTemplate = OpcodeTemplate(0x9280_0000);

    // loads and stores, unsigned scaled offset
    pub const LDR_X_IMM12: OpcodeTemplate = OpcodeTemplate(0xF940_0000);
    pub const STR_X_IMM12: OpcodeTemplate = OpcodeTemplate(0xF900_0000);
    pub const LDR_W_IMM12: OpcodeTemplate = OpcodeTemplate(0xB940_0000);
    pub const STR_W_IMM12: OpcodeTemplate = OpcodeTemplate(0xB900_0000);

    // branches
    pub const B: OpcodeTemplate = OpcodeTemplate(0x1400_0000);
    pub const BL: OpcodeTemplate = OpcodeTemplate(0x9400_0000);
    pub const B_COND: OpcodeTemplate = OpcodeTemplate(0x5400_0000);
    pub const CBZ_X: OpcodeTemplate = OpcodeTemplate(0xB400_0000);
    pub const CBNZ_X: OpcodeTemplate = OpcodeTemplate(0xB500_0000);
    pub const BR: OpcodeTemplate = OpcodeTemplate(0xD61F_0000);
    pub const BLR: OpcodeTemplate = OpcodeTemplate(0xD63F_0000);
    pub const RET: OpcodeTemplate = OpcodeTemplate(0xD65F_03C0);
    pub const BRK: OpcodeTemplate = OpcodeTemplate(0xD420_0000);
}

/// Builder for one 32-bit AArch64 instruction word.
///
/// Operand fields are or-ed into the template; [`emit`](Instruction::emit)
/// writes the word little-endian. Dropping a built-but-unemitted
/// instruction asserts in debug builds.
#[derive(Debug)]
pub struct Instruction {
    word: u32,
    emitted: bool,
}

impl Drop for Instruction {
    fn drop(&mut self) {
        debug_assert!(self.emitted, "instruction built but never emitted");
    }
}

impl Instruction {
    /// Creates a builder from a template.
    pub fn new(template: OpcodeTemplate) -> Self {
        Self {
            word: template.0,
            emitted: false,
        }
    }

    /// Sets the destination register field `Rd` (bits 4:0).
    pub fn set_d(mut self, reg: Reg) -> Self {
        self.word |= reg.enc();
        self
    }

    /// Sets the first source register field `Rn` (bits 9:5).
    pub fn set_n(mut self, reg: Reg) -> Self {
        self.word |= reg.enc() << 5;
        self
    }

    /// Sets the second source register field `Rm` (bits 20:16).
    pub fn set_m(mut self, reg: Reg) -> Self {
        self.word |= reg.enc() << 16;
        self
    }

    /// Sets the transfer register field `Rt` (bits 4:0).
    pub fn set_t(mut self, reg: Reg) -> Self {
        self.word |= reg.enc();
        self
    }

    /// Sets an unsigned 12-bit immediate (bits 21:10).
    pub fn set_imm12(mut self, imm: SafeUint<12>) -> Self {
        self.word |= imm.field() << 10;
        self
    }

    /// Sets a 16-bit wide-move immediate with its half-word shift
    /// (`hw` in bits 22:21, imm16 in bits 20:5).
    pub fn set_imm16_hw(mut self, imm: u16, hw: SafeUint<2>) -> Self {
        self.word |= hw.field() << 21;
        self.word |= u32::from(imm) << 5;
        self
    }

    /// Sets a 19-bit word-scaled branch displacement (bits 23:5).
    pub fn set_imm19(mut self, words: SafeInt<19>) -> Self {
        self.word |= words.field() << 5;
        self
    }

    /// Sets a 26-bit word-scaled branch displacement (bits 25:0).
    pub fn set_imm26(mut self, words: SafeInt<26>) -> Self {
        self.word |= words.field();
        self
    }

    /// Sets the condition field of `B.cond` (bits 3:0).
    pub fn set_cond(mut self, cond: Cond) -> Self {
        self.word |= u32::from(cond as u8);
        self
    }

    /// Returns the instruction word without emitting it.
    pub fn word(&self) -> u32 {
        self.word
    }

    /// Writes the assembled word to `out`.
    pub fn emit(mut self, out: &mut MemWriter) -> Result<(), Error> {
        self.emitted = true;
        out.write_u32(self.word)
    }
}

#[cfg(test)]
mod tests {
    use super::{templates::*, *};

    fn emit(instr: Instruction) -> u32 {
        let mut out = MemWriter::default();
        instr.emit(&mut out).unwrap();
        out.read_bytes_le(0, 4) as u32
    }

    #[test]
    fn add_x_immediate() {
        // add x0, x1, #16
        let word = emit(
            Instruction::new(ADD_X_IMM12)
                .set_d(Reg::X0)
                .set_n(Reg::X1)
                .set_imm12(SafeUint::new(16).unwrap()),
        );
        assert_eq!(word, 0x9100_4020);
    }

    #[test]
    fn subs_discards_to_zr_as_cmp() {
        // cmp x2, x3 == subs xzr, x2, x3
        let word = emit(
            Instruction::new(SUBS_X_REG)
                .set_d(Reg::SpZr)
                .set_n(Reg::X2)
                .set_m(Reg::X3),
        );
        assert_eq!(word, 0xEB03_005F);
    }

    #[test]
    fn ldr_scaled_offset() {
        // ldr x0, [x19, #8]; imm12 counts 8-byte units.
        let word = emit(
            Instruction::new(LDR_X_IMM12)
                .set_t(Reg::X0)
                .set_n(Reg::X19)
                .set_imm12(SafeUint::new(1).unwrap()),
        );
        assert_eq!(word, 0xF940_0660);
    }

    #[test]
    fn conditional_branch_backward() {
        // b.ne .-8 (displacement of -2 words)
        let word = emit(
            Instruction::new(B_COND)
                .set_cond(Cond::Ne)
                .set_imm19(SafeInt::new(-2).unwrap()),
        );
        assert_eq!(word, 0x54FF_FFC1);
    }

    #[test]
    fn unconditional_branch_forward() {
        // b .+16 (4 words)
        let word = emit(Instruction::new(B).set_imm26(SafeInt::new(4).unwrap()));
        assert_eq!(word, 0x1400_0004);
    }

    #[test]
    fn movz_with_shift() {
        // movz x5, #0xBEEF, lsl #16
        let word = emit(
            Instruction::new(MOVZ_X)
                .set_d(Reg::X5)
                .set_imm16_hw(0xBEEF, SafeUint::new(1).unwrap()),
        );
        assert_eq!(word, 0xD2B7_DDE5);
    }
}
