use super::{
    encoding::{AbstrInstr, Cc, OpcodeExt, OpcodeTemplate, Rex, B8},
    regs::Reg,
};
use crate::{compiler::MemWriter, Error};

/// Which kind of operand occupies the ModRM `r/m` field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum RmKind {
    None,
    /// A register operand (`mod == 11`).
    Reg(Reg),
    /// A memory operand `[base + index * scale + disp]`.
    Mem {
        base: Reg,
        disp: i32,
        index: Option<Reg>,
        scale_pow2: u8,
    },
    /// A RIP-relative memory operand; the displacement is measured from
    /// the *start* of this instruction and rebased at emission.
    RipRel { disp_from_start: i32 },
}

/// Which immediate trails the instruction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ImmKind {
    None,
    Imm8,
    Imm16,
    Imm32,
    Imm64,
}

impl ImmKind {
    fn len(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Imm8 => 1,
            Self::Imm16 => 2,
            Self::Imm32 => 4,
            Self::Imm64 => 8,
        }
    }
}

/// Builder that accumulates the operand fields of one x86-64 instruction
/// and assembles the bytes on [`emit`](Instruction::emit).
///
/// Dropping a builder that was never emitted is a bug in the caller; debug
/// builds assert on it so dangling half-built encodings are caught early.
#[derive(Debug)]
pub struct Instruction {
    template: OpcodeTemplate,
    cc: Option<Cc>,
    r_reg: Option<Reg>,
    rm: RmKind,
    imm_kind: ImmKind,
    imm: u64,
    rel: Option<(bool, i32)>,
    emitted: bool,
}

impl Drop for Instruction {
    fn drop(&mut self) {
        debug_assert!(self.emitted, "instruction built but never emitted");
    }
}

impl Instruction {
    /// Creates a builder from an opcode template.
    pub fn new(template: OpcodeTemplate) -> Self {
        Self {
            template,
            cc: None,
            r_reg: None,
            rm: RmKind::None,
            imm_kind: ImmKind::None,
            imm: 0,
            rel: None,
            emitted: false,
        }
    }

    /// Creates a builder from an abstract instruction.
    pub fn from_abstr(abstr: &AbstrInstr) -> Self {
        Self::new(abstr.template)
    }

    /// Sets a register into the ModRM `reg` field (or the opcode byte for
    /// `+r` templates).
    pub fn set_r(mut self, reg: Reg) -> Self {
        debug_assert!(self.r_reg.is_none());
        self.r_reg = Some(reg);
        self
    }

    /// Sets a register into the `r/m` field.
    pub fn set_r4rm(mut self, reg: Reg) -> Self {
        debug_assert_eq!(self.rm, RmKind::None);
        self.rm = RmKind::Reg(reg);
        self
    }

    /// Sets a memory operand `[base + disp]` into the `r/m` field.
    pub fn set_m4rm(mut self, base: Reg, disp: i32) -> Self {
        debug_assert_eq!(self.rm, RmKind::None);
        debug_assert!(base.is_gpr());
        self.rm = RmKind::Mem {
            base,
            disp,
            index: None,
            scale_pow2: 0,
        };
        self
    }

    /// Sets a memory operand `[base + index * 2^scale + disp]` into the
    /// `r/m` field.
    pub fn set_m4rm_indexed(mut self, base: Reg, disp: i32, index: Reg, scale_pow2: u8) -> Self {
        debug_assert_eq!(self.rm, RmKind::None);
        debug_assert!(base.is_gpr() && index.is_gpr());
        debug_assert!(index != Reg::Sp, "rsp cannot be an index register");
        debug_assert!(scale_pow2 < 4);
        self.rm = RmKind::Mem {
            base,
            disp,
            index: Some(index),
            scale_pow2,
        };
        self
    }

    /// Sets a RIP-relative memory operand whose target is `disp` bytes from
    /// the start of this instruction.
    pub fn set_mip4rm(mut self, disp_from_start: i32) -> Self {
        debug_assert_eq!(self.rm, RmKind::None);
        self.rm = RmKind::RipRel {
            disp_from_start,
        };
        self
    }

    /// Sets a RIP-relative memory operand targeting absolute position
    /// `binary_pos`, given the current end `cur_pos` of the output binary
    /// (where this instruction will start).
    pub fn set_mip4rm_abs(self, binary_pos: u32, cur_pos: u32) -> Self {
        let disp = i64::from(binary_pos) - i64::from(cur_pos);
        debug_assert!(i32::try_from(disp).is_ok());
        self.set_mip4rm(disp as i32)
    }

    /// Sets an 8-bit immediate.
    pub fn set_imm8(mut self, imm: u8) -> Self {
        debug_assert_eq!(self.imm_kind, ImmKind::None);
        self.imm_kind = ImmKind::Imm8;
        self.imm = u64::from(imm);
        self
    }

    /// Sets a 16-bit immediate.
    pub fn set_imm16(mut self, imm: u16) -> Self {
        debug_assert_eq!(self.imm_kind, ImmKind::None);
        self.imm_kind = ImmKind::Imm16;
        self.imm = u64::from(imm);
        self
    }

    /// Sets a 32-bit immediate.
    pub fn set_imm32(mut self, imm: u32) -> Self {
        debug_assert_eq!(self.imm_kind, ImmKind::None);
        self.imm_kind = ImmKind::Imm32;
        self.imm = u64::from(imm);
        self
    }

    /// Sets a 64-bit immediate.
    pub fn set_imm64(mut self, imm: u64) -> Self {
        debug_assert_eq!(self.imm_kind, ImmKind::None);
        self.imm_kind = ImmKind::Imm64;
        self.imm = imm;
        self
    }

    /// Sets an 8-bit relative branch offset.
    pub fn set_rel8(mut self, rel: i8) -> Self {
        debug_assert!(self.rel.is_none());
        self.rel = Some((true, i32::from(rel)));
        self
    }

    /// Sets a 32-bit relative branch offset.
    pub fn set_rel32(mut self, rel: i32) -> Self {
        debug_assert!(self.rel.is_none());
        self.rel = Some((false, rel));
        self
    }

    /// Sets the condition code, added into the last opcode byte.
    pub fn set_cc(mut self, cc: Cc) -> Self {
        debug_assert!(self.cc.is_none());
        self.cc = Some(cc);
        self
    }

    /// Assembles the instruction and appends its bytes to `out`.
    pub fn emit(mut self, out: &mut MemWriter) -> Result<(), Error> {
        self.emitted = true;
        let bytes = self.assemble();
        for &byte in &bytes {
            out.write_byte(byte)?;
        }
        Ok(())
    }

    /// Returns the length in bytes this instruction will assemble to.
    pub fn encoded_len(&self) -> u32 {
        self.encode_into(&mut [0u8; 24])
    }

    fn assemble(&self) -> Vec<u8> {
        let mut buf = [0u8; 24];
        let len = self.encode_into(&mut buf);
        buf[..len as usize].to_vec()
    }

    /// Encodes into `buf` and returns the length.
    fn encode_into(&self, buf: &mut [u8; 24]) -> u32 {
        let mut at = 0usize;
        macro_rules! push {
            ($byte:expr) => {{
                buf[at] = $byte;
                at += 1;
            }};
        }

        // Legacy prefix first, then REX, then opcode bytes.
        if self.template.prefix != 0 {
            push!(self.template.prefix);
        }

        let (rm_ext, index_ext) = match self.rm {
            RmKind::Reg(reg) => (reg.needs_rex_ext(), false),
            RmKind::Mem { base, index, .. } => {
                (base.needs_rex_ext(), index.is_some_and(Reg::needs_rex_ext))
            }
            RmKind::None | RmKind::RipRel { .. } => {
                // For +r templates the register extends REX.B.
                let radd_ext = matches!(self.template.ext, OpcodeExt::RAdd)
                    && self.r_reg.is_some_and(Reg::needs_rex_ext);
                (radd_ext, false)
            }
        };
        let r_ext = match self.template.ext {
            OpcodeExt::RAdd => false,
            _ => self.r_reg.is_some_and(Reg::needs_rex_ext),
        };

        let mut rex: u8 = 0x40;
        if self.template.rex == Rex::W {
            rex |= 0x08;
        }
        if r_ext {
            rex |= 0x04;
        }
        if index_ext {
            rex |= 0x02;
        }
        if rm_ext {
            rex |= 0x01;
        }
        // An 8-bit spl/bpl/sil/dil operand needs a bare REX to not mean
        // ah/ch/dh/bh.
        let force_rex = self.needs_bare_rex();
        if rex != 0x40 || force_rex {
            push!(rex);
        }

        // Opcode bytes, most significant first.
        let mut opcode = self.template.opcode;
        if let Some(cc) = self.cc {
            opcode += cc as u32;
        }
        if matches!(self.template.ext, OpcodeExt::RAdd) {
            opcode += u32::from(self.r_reg.expect("+r template without register").enc());
        }
        let opcode_bytes = [
            (opcode >> 24) as u8,
            (opcode >> 16) as u8,
            (opcode >> 8) as u8,
            opcode as u8,
        ];
        let significant = 4 - opcode_bytes.iter().take_while(|&&byte| byte == 0).count().min(3);
        for &byte in &opcode_bytes[4 - significant..] {
            push!(byte);
        }

        // ModRM, SIB and displacement.
        let reg_field = match self.template.ext {
            OpcodeExt::Digit(digit) => Some(digit),
            OpcodeExt::R => Some(self.r_reg.expect("/r template without register").enc()),
            OpcodeExt::RAdd | OpcodeExt::None => None,
        };
        let mut rip_disp_at = None;
        if let Some(reg_field) = reg_field {
            match self.rm {
                RmKind::None => {
                    debug_assert!(false, "template has a ModRM byte but no r/m operand was set")
                }
                RmKind::Reg(reg) => {
                    push!(modrm(0b11, reg_field, reg.enc()));
                }
                RmKind::RipRel { disp_from_start } => {
                    push!(modrm(0b00, reg_field, 0b101));
                    rip_disp_at = Some((at, disp_from_start));
                    for _ in 0..4 {
                        push!(0);
                    }
                }
                RmKind::Mem {
                    base,
                    disp,
                    index,
                    scale_pow2,
                } => {
                    let needs_sib = index.is_some() || base.enc() == 0b100;
                    // rbp/r13 as base cannot use mod=00; use a zero disp8.
                    let disp_mode = if disp == 0 && base.enc() != 0b101 {
                        0b00
                    } else if i8::try_from(disp).is_ok() {
                        0b01
                    } else {
                        0b10
                    };
                    let rm_field = if needs_sib { 0b100 } else { base.enc() };
                    push!(modrm(disp_mode, reg_field, rm_field));
                    if needs_sib {
                        let index_field = index.map_or(0b100, Reg::enc);
                        push!(sib(scale_pow2, index_field, base.enc()));
                    }
                    match disp_mode {
                        0b01 => push!(disp as u8),
                        0b10 => {
                            for &byte in &disp.to_le_bytes() {
                                push!(byte);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        // Relative branch offset.
        if let Some((short, rel)) = self.rel {
            if short {
                push!(rel as u8);
            } else {
                for &byte in &rel.to_le_bytes() {
                    push!(byte);
                }
            }
        }

        // Trailing immediate.
        for i in 0..self.imm_kind.len() {
            push!((self.imm >> (8 * i)) as u8);
        }

        let len = at as u32;
        // A RIP-relative displacement counts from the end of the whole
        // instruction; rebase it now that the length is known.
        if let Some((pos, disp_from_start)) = rip_disp_at {
            let disp = disp_from_start.wrapping_sub(len as i32);
            buf[pos..pos + 4].copy_from_slice(&disp.to_le_bytes());
        }
        len
    }

    fn needs_bare_rex(&self) -> bool {
        let high_byte_reg = |reg: Reg| (4..=7).contains(&(reg as u8));
        let rm_needs = self.template.b8.covers_rm()
            && match self.rm {
                RmKind::Reg(reg) => high_byte_reg(reg),
                _ => false,
            };
        let r_needs = self.template.b8.covers_r() && self.r_reg.is_some_and(high_byte_reg);
        rm_needs || r_needs
    }
}

#[inline]
fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    debug_assert!(mode < 4 && reg < 8 && rm < 8);
    (mode << 6) | (reg << 3) | rm
}

#[inline]
fn sib(scale: u8, index: u8, base: u8) -> u8 {
    debug_assert!(scale < 4 && index < 8 && base < 8);
    (scale << 6) | (index << 3) | base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::x86_64::encoding::*;

    fn emit(instr: Instruction) -> Vec<u8> {
        let mut out = MemWriter::default();
        instr.emit(&mut out).unwrap();
        out.as_slice().to_vec()
    }

    #[test]
    fn add_reg_reg_32() {
        // add ecx, eax
        let bytes = emit(
            Instruction::from_abstr(&ADD_RM32_R32)
                .set_r4rm(Reg::C)
                .set_r(Reg::A),
        );
        assert_eq!(bytes, [0x01, 0xC1]);
    }

    #[test]
    fn add_reg_reg_64_extended() {
        // add r9, rax
        let bytes = emit(
            Instruction::from_abstr(&ADD_RM64_R64)
                .set_r4rm(Reg::R9)
                .set_r(Reg::A),
        );
        assert_eq!(bytes, [0x49, 0x01, 0xC1]);
    }

    #[test]
    fn sub_imm8_sign_extended() {
        // sub rsp, 0x28
        let bytes = emit(
            Instruction::from_abstr(&SUB_RM64_IMM8SX)
                .set_r4rm(Reg::Sp)
                .set_imm8(0x28),
        );
        assert_eq!(bytes, [0x48, 0x83, 0xEC, 0x28]);
    }

    #[test]
    fn mov_load_with_displacement() {
        // mov eax, [rbx + 0x10]
        let bytes = emit(
            Instruction::from_abstr(&MOV_R32_RM32)
                .set_r(Reg::A)
                .set_m4rm(Reg::B, 0x10),
        );
        assert_eq!(bytes, [0x8B, 0x43, 0x10]);
    }

    #[test]
    fn mov_store_through_rsp_needs_sib() {
        // mov [rsp + 8], rdi
        let bytes = emit(
            Instruction::from_abstr(&MOV_RM64_R64)
                .set_r(Reg::Di)
                .set_m4rm(Reg::Sp, 8),
        );
        assert_eq!(bytes, [0x48, 0x89, 0x7C, 0x24, 0x08]);
    }

    #[test]
    fn base_rbp_uses_zero_disp8() {
        // mov eax, [rbp]
        let bytes = emit(
            Instruction::from_abstr(&MOV_R32_RM32)
                .set_r(Reg::A)
                .set_m4rm(Reg::Bp, 0),
        );
        assert_eq!(bytes, [0x8B, 0x45, 0x00]);
    }

    #[test]
    fn base_r13_uses_zero_disp8() {
        // mov eax, [r13]; r13 shares the rbp encoding quirk.
        let bytes = emit(
            Instruction::from_abstr(&MOV_R32_RM32)
                .set_r(Reg::A)
                .set_m4rm(Reg::R13, 0),
        );
        assert_eq!(bytes, [0x41, 0x8B, 0x45, 0x00]);
    }

    #[test]
    fn scaled_index_addressing() {
        // mov edx, [rbx + rcx*4 + 0x100]
        let bytes = emit(
            Instruction::from_abstr(&MOV_R32_RM32)
                .set_r(Reg::D)
                .set_m4rm_indexed(Reg::B, 0x100, Reg::C, 2),
        );
        assert_eq!(bytes, [0x8B, 0x94, 0x8B, 0x00, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn mov_imm64_radd() {
        // mov r10, 0x1122334455667788
        let bytes = emit(
            Instruction::from_abstr(&MOV_R64_IMM64)
                .set_r(Reg::R10)
                .set_imm64(0x1122_3344_5566_7788),
        );
        assert_eq!(
            bytes,
            [0x49, 0xBA, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
        );
    }

    #[test]
    fn jcc_rel32_adds_condition() {
        // jne +0x10 (rel32 form)
        let bytes = emit(Instruction::from_abstr(&JCC_REL32).set_cc(Cc::Ne).set_rel32(0x10));
        assert_eq!(bytes, [0x0F, 0x85, 0x10, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn setcc_high_byte_register_forces_rex() {
        // sete sil; without REX this would be "sete dh".
        let bytes = emit(
            Instruction::from_abstr(&SETCC_RM8)
                .set_cc(Cc::E)
                .set_r4rm(Reg::Si),
        );
        assert_eq!(bytes, [0x40, 0x0F, 0x94, 0xC6]);
        // sete al needs no REX.
        let bytes = emit(
            Instruction::from_abstr(&SETCC_RM8)
                .set_cc(Cc::E)
                .set_r4rm(Reg::A),
        );
        assert_eq!(bytes, [0x0F, 0x94, 0xC0]);
    }

    #[test]
    fn ucomiss_and_sd_prefix() {
        // ucomiss xmm0, xmm4
        let bytes = emit(
            Instruction::from_abstr(&UCOMISS_RF_RMF)
                .set_r(Reg::Xmm0)
                .set_r4rm(Reg::Xmm4),
        );
        assert_eq!(bytes, [0x0F, 0x2E, 0xC4]);
        // ucomisd xmm1, xmm8
        let bytes = emit(
            Instruction::from_abstr(&UCOMISD_RF_RMF)
                .set_r(Reg::Xmm1)
                .set_r4rm(Reg::Xmm8),
        );
        assert_eq!(bytes, [0x66, 0x41, 0x0F, 0x2E, 0xC8]);
    }

    #[test]
    fn movq_between_gpr_and_xmm() {
        // movq xmm0, rax
        let bytes = emit(
            Instruction::from_abstr(&MOVQ_RF_RM64)
                .set_r(Reg::Xmm0)
                .set_r4rm(Reg::A),
        );
        assert_eq!(bytes, [0x66, 0x48, 0x0F, 0x6E, 0xC0]);
    }

    #[test]
    fn rip_relative_displacement_counts_from_instruction_end() {
        // movss xmm0, [rip + 0] pointing at the instruction start itself:
        // encoded disp must be -(length) = -8.
        let bytes = emit(
            Instruction::from_abstr(&MOVSS_RF_RMF)
                .set_r(Reg::Xmm0)
                .set_mip4rm(0),
        );
        assert_eq!(bytes, [0xF3, 0x0F, 0x10, 0x05, 0xF8, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn roundss_carries_mode_immediate() {
        // roundss xmm2, xmm3, 3 (toward zero)
        let bytes = emit(
            Instruction::from_abstr(&ROUNDSS_RF_RMF)
                .set_r(Reg::Xmm2)
                .set_r4rm(Reg::Xmm3)
                .set_imm8(3),
        );
        assert_eq!(bytes, [0x66, 0x0F, 0x3A, 0x0A, 0xD3, 0x03]);
    }

    #[test]
    fn push_pop_radd() {
        let bytes = emit(Instruction::from_abstr(&PUSH_R64).set_r(Reg::Bp));
        assert_eq!(bytes, [0x55]);
        let bytes = emit(Instruction::from_abstr(&POP_R64).set_r(Reg::R15));
        assert_eq!(bytes, [0x41, 0x5F]);
    }
}
