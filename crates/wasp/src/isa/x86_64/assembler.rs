//! Instruction selection and the low-level emission helpers of the x86-64
//! backend: `select_instr`, the move emitter, stack-pointer adjustment,
//! trap sequences and patchable jumps.

use super::{
    encoding::{AbstrInstr, ArgType, Cc, JCC_REL32, JCC_REL8, JMP_REL32, JMP_REL8, LEA_R64_M},
    instruction::Instruction,
    regs::{pinned, Reg, RegMask},
    relpatch::RelPatchObj,
};
use crate::{
    compiler::{
        elem::{ElemKind, StackElement},
        storage::VariableStorage,
        Compiler,
    },
    Error,
};
use wasp_core::MachineType;

/// Result of [`Compiler::select_instr`]: where the output now lives, and
/// whether the operands were emitted in swapped order.
#[derive(Debug)]
pub struct SelectResult {
    pub elem: StackElement,
    pub reversed: bool,
}

/// Mutable operand state threaded through one instruction selection.
struct SelState {
    args: [StackElement; 2],
    can_be_dst: [bool; 2],
    lifted: [bool; 2],
    started_writable: [bool; 2],
    args_equal: bool,
    changed: bool,
}

impl Compiler<'_, '_> {
    /// Creates an instruction builder for `abstr`.
    pub(crate) fn instr(&self, abstr: &AbstrInstr) -> Instruction {
        Instruction::from_abstr(abstr)
    }

    /// Selects the cheapest matching encoding from `candidates` for the
    /// given operands and emits it.
    ///
    /// Candidates are tried in order, so callers list immediate forms
    /// before register and memory forms. When no candidate matches the
    /// current operand storages, operands are lifted into registers one at
    /// a time (never-matched operands first, then constants, then
    /// non-scratch registers) and the candidates are retried. Three
    /// rounds suffice: by the third both operands are in writable
    /// registers, which every family can encode.
    ///
    /// `arg0` is the destination (or destination-source); passing `None`
    /// with a two-slot unary candidate asks the selector to choose a
    /// destination. `prot` registers are never allocated. With `readonly`
    /// the instruction writes no operand (`cmp`, `test`, `ucomiss`).
    pub(crate) fn select_instr(
        &mut self,
        candidates: &[AbstrInstr],
        arg0: Option<&StackElement>,
        arg1: Option<&StackElement>,
        target_hint: Option<&StackElement>,
        prot: RegMask,
        readonly: bool,
    ) -> Result<SelectResult, Error> {
        debug_assert!(!candidates.is_empty(), "zero instructions to select from");
        let commutative = candidates[0].commutative;
        let unop = candidates[0].unop;
        let dst_ty = candidates[0].dst_type.machine_type();
        let src_ty = candidates[0].src_type.machine_type();
        debug_assert!(
            dst_ty.is_some() || src_ty.is_some(),
            "instruction without any operand type"
        );
        debug_assert!(
            unop || (dst_ty.is_some() && src_ty.is_some()),
            "binary instruction with a missing operand type"
        );
        debug_assert!(!(unop && commutative), "unary operations cannot commute");
        debug_assert!(src_ty.is_none() || arg1.is_some(), "missing source operand");
        debug_assert!(
            unop || dst_ty.is_none() || arg0.is_some(),
            "missing destination operand"
        );

        let hint = target_hint.filter(|_| dst_ty.is_some()).and_then(|h| {
            self.hint_reg_if_suitable(Some(h), dst_ty.unwrap(), prot)
                .map(|_| *h)
        });
        let hint = hint.as_ref();

        let started_writable = [
            arg0.is_some_and(|elem| self.is_writable_scratch(elem)),
            arg1.is_some_and(|elem| self.is_writable_scratch(elem)),
        ];
        let in_hint_reg = |elem: Option<&StackElement>, compiler: &Self| -> bool {
            match (elem, hint) {
                (Some(elem), Some(hint)) => {
                    compiler.info.reg_of(elem).is_some()
                        && compiler.info.reg_of(elem) == compiler.info.reg_of(hint)
                }
                _ => false,
            }
        };
        let hint_dst = [in_hint_reg(arg0, self), in_hint_reg(arg1, self)];
        let invalid = StackElement::invalid();
        let mut st = SelState {
            args: [
                arg0.copied().unwrap_or(invalid),
                arg1.copied().unwrap_or(invalid),
            ],
            can_be_dst: if readonly {
                [false, false]
            } else {
                [
                    started_writable[0] || hint_dst[0],
                    started_writable[1] || hint_dst[1],
                ]
            },
            lifted: [false, false],
            started_writable,
            args_equal: arg0.is_some()
                && arg1.is_some()
                && arg0.unwrap().equals_variable(arg1.unwrap()),
            changed: false,
        };

        // Normalization before matching.
        if unop {
            if !readonly && src_ty.is_none() && !st.can_be_dst[0] {
                // In-place unary (neg, not, shift-by-cl): the destination
                // must be writable.
                self.lift_sel_arg(&mut st, 0, false, commutative, prot, hint)?;
            } else if let (Some(dst_ty), Some(_)) = (dst_ty, src_ty) {
                // Two-slot unary: choose a destination.
                if let Some(hint) = hint {
                    st.args[0] = *hint;
                } else if st.can_be_dst[1]
                    && dst_ty.is_int() == src_ty.unwrap().is_int()
                {
                    // Source register can also hold the result type;
                    // reuse it as the destination.
                    let mut dst = st.args[1];
                    dst.retype(dst_ty);
                    st.args[0] = dst;
                    st.args_equal = true;
                } else if arg0.is_none() {
                    let reg = self.req_scratch_reg(
                        dst_ty,
                        prot | self.info.mask_for_elem(Some(&st.args[1])),
                        false,
                        false,
                    )?;
                    st.args[0] = StackElement::scratch(dst_ty, reg);
                }
                st.can_be_dst[0] = true;
            }
        } else if !readonly {
            // Float constants can never be immediates; non-commutative
            // first operands must be writable destinations.
            if st.args[0].is_float_constant() || (!commutative && !st.can_be_dst[0]) {
                let co_lift = !st.args[1].is_constant();
                self.lift_sel_arg(&mut st, 0, co_lift, commutative, prot, hint)?;
            }
            if st.args[1].is_float_constant() {
                self.lift_sel_arg(&mut st, 1, false, commutative, prot, hint)?;
            }
        }

        let mut has_matched = [false, false];
        for tries in 0..3 {
            for cand in candidates {
                debug_assert_eq!(cand.commutative, commutative);
                debug_assert_eq!(cand.unop, unop);
                debug_assert_eq!(cand.dst_type.machine_type(), dst_ty);
                debug_assert_eq!(cand.src_type.machine_type(), src_ty);

                let commutation_tries = if commutative && !st.args_equal { 2 } else { 1 };
                let storages = [
                    self.info.storage_of(&st.args[0]),
                    self.info.storage_of(&st.args[1]),
                ];
                let mut matched_dst: Option<usize> = None;
                for dst_idx in 0..commutation_tries {
                    let src_idx = dst_idx ^ 1;
                    let mut matches = [false, false];
                    if readonly || st.can_be_dst[dst_idx] || dst_ty.is_none() {
                        matches[dst_idx] = fits_arg_type(cand.dst_type, &storages[dst_idx]);
                    }
                    matches[src_idx] = fits_arg_type(cand.src_type, &storages[src_idx]);

                    has_matched[dst_idx] |= matches[dst_idx];
                    has_matched[src_idx] |= matches[src_idx];
                    if st.args_equal {
                        has_matched[dst_idx] |= matches[src_idx];
                        has_matched[src_idx] |= matches[dst_idx];
                    }

                    if matches[0] && matches[1] {
                        match matched_dst {
                            Some(previous) => {
                                // Both orders match; prefer the one whose
                                // destination is the target hint.
                                if let Some(hint) = hint {
                                    let hint_storage = self.info.storage_of(hint);
                                    if storages[previous].in_same_location(&hint_storage) {
                                        // keep previous
                                    } else if storages[dst_idx].in_same_location(&hint_storage) {
                                        matched_dst = Some(dst_idx);
                                    }
                                }
                            }
                            None => matched_dst = Some(dst_idx),
                        }
                    }
                }
                if let Some(dst_idx) = matched_dst {
                    self.emit_action_arg(cand, &storages[dst_idx], &storages[dst_idx ^ 1])?;
                    let elem = match dst_ty {
                        None => StackElement::invalid(),
                        Some(ty) => {
                            let mut result = st.args[dst_idx];
                            result.retype(ty);
                            result.prev_occ = None;
                            result.next_occ = None;
                            result
                        }
                    };
                    return Ok(SelectResult {
                        elem,
                        reversed: dst_idx != 0,
                    });
                }
            }

            debug_assert!(
                !prot.all_marked() && tries < 2,
                "instruction selection failed to converge"
            );

            // No candidate matched: lift and retry.
            if unop {
                if dst_ty.is_none() {
                    self.lift_sel_arg(&mut st, 1, false, commutative, prot, hint)?;
                } else if src_ty.is_none() {
                    self.lift_sel_arg(&mut st, 0, false, commutative, prot, hint)?;
                } else {
                    st.changed = false;
                    if !has_matched[0] {
                        self.lift_sel_arg(&mut st, 0, false, commutative, prot, hint)?;
                    }
                    if !(st.changed && st.args_equal) && !has_matched[1] {
                        self.lift_sel_arg(&mut st, 1, false, commutative, prot, hint)?;
                    }
                }
            } else {
                st.changed = false;
                if !has_matched[0] {
                    self.lift_sel_arg(&mut st, 0, true, commutative, prot, hint)?;
                }
                if st.args_equal && st.changed {
                    continue;
                }
                if !has_matched[1] {
                    self.lift_sel_arg(&mut st, 1, false, commutative, prot, hint)?;
                }
                if st.changed {
                    continue;
                }
                // Everything matched somewhere, just never both at once.
                // Prefer lifting whichever keeps an immediate form usable.
                if !st.lifted[0] && st.args[1].is_constant() {
                    self.lift_sel_arg(&mut st, 0, false, commutative, prot, hint)?;
                } else if !st.lifted[1] && st.args[0].is_constant() {
                    self.lift_sel_arg(&mut st, 1, false, commutative, prot, hint)?;
                } else if !st.lifted[0] && !st.started_writable[0] {
                    self.lift_sel_arg(&mut st, 0, true, commutative, prot, hint)?;
                } else if !st.lifted[1] && !st.started_writable[1] {
                    self.lift_sel_arg(&mut st, 1, true, commutative, prot, hint)?;
                }
            }
        }
        unreachable!("instruction selection exceeded three lifting rounds")
    }

    /// Lifts one selection operand into a writable register, co-lifting
    /// its twin when both operands are the same variable.
    fn lift_sel_arg(
        &mut self,
        st: &mut SelState,
        idx: usize,
        co_lift: bool,
        commutative: bool,
        prot: RegMask,
        hint: Option<&StackElement>,
    ) -> Result<(), Error> {
        debug_assert!(!st.lifted[idx], "cannot lift an operand twice");
        let other = idx ^ 1;
        if st.args_equal && st.lifted[other] {
            st.args[idx] = st.args[other];
        } else {
            let prot = prot | self.info.mask_for_elem(Some(&st.args[other]));
            let hint = if idx == 1 && !commutative { None } else { hint };
            let mut elem = st.args[idx];
            self.lift_to_reg(&mut elem, true, hint, prot, false)?;
            st.args[idx] = elem;
        }
        st.can_be_dst[idx] = true;
        st.lifted[idx] = true;
        st.changed = true;
        if co_lift && st.args_equal && !st.lifted[other] {
            st.args[other] = st.args[idx];
            st.can_be_dst[other] = true;
            st.lifted[other] = true;
        }
        Ok(())
    }

    /// Assembles `abstr` with the matched destination and source storages.
    fn emit_action_arg(
        &mut self,
        abstr: &AbstrInstr,
        dst: &VariableStorage,
        src: &VariableStorage,
    ) -> Result<(), Error> {
        let mut instr = self.instr(abstr);
        for (arg_type, storage) in [(abstr.dst_type, dst), (abstr.src_type, src)] {
            instr = self.apply_operand(instr, arg_type, storage);
        }
        instr.emit(&mut self.out)
    }

    /// Applies one operand to the builder according to its constraint
    /// class.
    fn apply_operand(
        &self,
        instr: Instruction,
        arg_type: ArgType,
        storage: &VariableStorage,
    ) -> Instruction {
        use ArgType::*;
        match arg_type {
            None => instr,
            C1_32 | C1_64 => {
                debug_assert!(matches!(
                    storage,
                    VariableStorage::Constant { bits: 1, .. }
                ));
                instr
            }
            R32 | R64 | R32F | R64F => {
                let reg = storage.as_reg().expect("register constraint requires a register");
                instr.set_r(reg)
            }
            Rm32 | Rm64 | Rm32F | Rm64F => match *storage {
                VariableStorage::Register { reg, .. } => instr.set_r4rm(reg),
                VariableStorage::StackMemory { sp_offset, .. } => {
                    instr.set_m4rm(Reg::Sp, sp_offset)
                }
                VariableStorage::LinkData { offset, .. } => {
                    instr.set_m4rm(pinned::LIN_MEM, offset)
                }
                _ => unreachable!("memory constraint requires a location"),
            },
            Imm32 => {
                let bits = storage_bits(storage);
                instr.set_imm32(bits as u32)
            }
            Imm32Sx64 => {
                let bits = storage_bits(storage);
                instr.set_imm32(bits as i64 as i32 as u32)
            }
            Imm8Sx32 | Imm8Sx64 | Imm8_32 | Imm8_64 => {
                let bits = storage_bits(storage);
                instr.set_imm8(bits as u8)
            }
        }
    }

    // --- moves --------------------------------------------------------------

    /// Emits the minimum code moving `src` into `dst`.
    ///
    /// Never clobbers CPU flags unless `preserve_flags` is false and a
    /// cheaper flag-writing form (like `xor reg, reg`) is available.
    pub(crate) fn emit_move(
        &mut self,
        dst: VariableStorage,
        src: VariableStorage,
        preserve_flags: bool,
    ) -> Result<(), Error> {
        self.emit_move_prot(dst, src, RegMask::none(), preserve_flags)
    }

    /// [`emit_move`](Self::emit_move) with a protection mask for the
    /// scratch register a float-constant materialization may need.
    pub(crate) fn emit_move_prot(
        &mut self,
        dst: VariableStorage,
        src: VariableStorage,
        prot: RegMask,
        preserve_flags: bool,
    ) -> Result<(), Error> {
        use super::encoding::*;
        if dst.in_same_location(&src) {
            return Ok(());
        }
        let ty = dst.ty().expect("move to an invalid storage");
        let (dst_reg, src_reg) = (dst.as_reg(), src.as_reg());
        match (dst_reg, src_reg, ty.is_int()) {
            // integer register destinations
            (Some(d), _, true) if d.is_gpr() => match src {
                VariableStorage::Constant { bits, .. } => {
                    self.emit_mov_imm_to_gpr(d, ty, bits, preserve_flags)
                }
                VariableStorage::Register { reg: s, .. } if s.is_fpr() => {
                    // reinterpret: xmm -> gpr
                    let abstr = if ty.is_wide() { MOVQ_RM64_RF } else { MOVD_RM32_RF };
                    self.instr(&abstr).set_r(s).set_r4rm(d).emit(&mut self.out)
                }
                VariableStorage::Register { reg: s, .. } => self
                    .instr(&MOV_R64_RM64)
                    .set_r(d)
                    .set_r4rm(s)
                    .emit(&mut self.out),
                _ => {
                    let abstr = if ty.is_wide() { MOV_R64_RM64 } else { MOV_R32_RM32 };
                    let (base, disp) = mem_base_disp(&src);
                    self.instr(&abstr).set_r(d).set_m4rm(base, disp).emit(&mut self.out)
                }
            },
            // float register destinations
            (Some(d), _, false) => match src {
                VariableStorage::Constant { bits, .. } => {
                    let int_ty = ty.as_int();
                    let gpr = self.req_scratch_reg(int_ty, prot, false, preserve_flags)?;
                    self.emit_mov_imm_to_gpr(gpr, int_ty, bits, preserve_flags)?;
                    let abstr = if ty.is_wide() { MOVQ_RF_RM64 } else { MOVD_RF_RM32 };
                    self.instr(&abstr).set_r(d).set_r4rm(gpr).emit(&mut self.out)
                }
                VariableStorage::Register { reg: s, .. } if s.is_gpr() => {
                    // reinterpret: gpr -> xmm
                    let abstr = if ty.is_wide() { MOVQ_RF_RM64 } else { MOVD_RF_RM32 };
                    self.instr(&abstr).set_r(d).set_r4rm(s).emit(&mut self.out)
                }
                VariableStorage::Register { reg: s, .. } => self
                    .instr(&MOVAPS_RF_RF)
                    .set_r(d)
                    .set_r4rm(s)
                    .emit(&mut self.out),
                _ => {
                    let abstr = if ty.is_wide() { MOVSD_RF_RMF } else { MOVSS_RF_RMF };
                    let (base, disp) = mem_base_disp(&src);
                    self.instr(&abstr).set_r(d).set_m4rm(base, disp).emit(&mut self.out)
                }
            },
            // memory destinations
            (Some(_), _, true) => unreachable!("integer-typed register destination must be a gpr"),
            (None, Some(s), _) => {
                let (base, disp) = mem_base_disp(&dst);
                if s.is_gpr() {
                    let abstr = if ty.is_wide() { MOV_RM64_R64 } else { MOV_RM32_R32 };
                    self.instr(&abstr).set_r(s).set_m4rm(base, disp).emit(&mut self.out)
                } else {
                    let abstr = if ty.is_wide() { MOVSD_RMF_RF } else { MOVSS_RMF_RF };
                    self.instr(&abstr).set_r(s).set_m4rm(base, disp).emit(&mut self.out)
                }
            }
            (None, None, _) => match src {
                VariableStorage::Constant { bits, .. } => {
                    let (base, disp) = mem_base_disp(&dst);
                    if !ty.is_wide() {
                        self.instr(&MOV_RM32_IMM32)
                            .set_m4rm(base, disp)
                            .set_imm32(bits as u32)
                            .emit(&mut self.out)
                    } else if i32::try_from(bits as i64).is_ok() {
                        self.instr(&MOV_RM64_IMM32SX)
                            .set_m4rm(base, disp)
                            .set_imm32(bits as u32)
                            .emit(&mut self.out)
                    } else {
                        // Two 32-bit halves: no scratch register needed
                        // and flag-safe.
                        self.instr(&MOV_RM32_IMM32)
                            .set_m4rm(base, disp)
                            .set_imm32(bits as u32)
                            .emit(&mut self.out)?;
                        self.instr(&MOV_RM32_IMM32)
                            .set_m4rm(base, disp + 4)
                            .set_imm32((bits >> 32) as u32)
                            .emit(&mut self.out)
                    }
                }
                _ => {
                    // memory to memory through the pinned helper register
                    let helper = pinned::MOVE_HELPER;
                    let (src_base, src_disp) = mem_base_disp(&src);
                    let (dst_base, dst_disp) = mem_base_disp(&dst);
                    let (load, store) = if ty.is_wide() {
                        (MOVSD_RF_RMF, MOVSD_RMF_RF)
                    } else {
                        (MOVSS_RF_RMF, MOVSS_RMF_RF)
                    };
                    self.instr(&load)
                        .set_r(helper)
                        .set_m4rm(src_base, src_disp)
                        .emit(&mut self.out)?;
                    self.instr(&store)
                        .set_r(helper)
                        .set_m4rm(dst_base, dst_disp)
                        .emit(&mut self.out)
                }
            },
        }
    }

    /// Loads an immediate into a general purpose register with the
    /// shortest usable encoding.
    pub(crate) fn emit_mov_imm_to_gpr(
        &mut self,
        reg: Reg,
        ty: MachineType,
        bits: u64,
        preserve_flags: bool,
    ) -> Result<(), Error> {
        use super::encoding::*;
        debug_assert!(reg.is_gpr() && ty.is_int());
        if bits == 0 && !preserve_flags {
            return self
                .instr(&XOR_RM32_R32)
                .set_r(reg)
                .set_r4rm(reg)
                .emit(&mut self.out);
        }
        if !ty.is_wide() || u32::try_from(bits).is_ok() {
            // A 32-bit move zero-extends, which also covers small u64s.
            return self
                .instr(&MOV_RM32_IMM32)
                .set_r4rm(reg)
                .set_imm32(bits as u32)
                .emit(&mut self.out);
        }
        if i32::try_from(bits as i64).is_ok() {
            return self
                .instr(&MOV_RM64_IMM32SX)
                .set_r4rm(reg)
                .set_imm32(bits as u32)
                .emit(&mut self.out);
        }
        self.instr(&MOV_R64_IMM64)
            .set_r(reg)
            .set_imm64(bits)
            .emit(&mut self.out)
    }

    // --- stack pointer ------------------------------------------------------

    /// Emits the SP adjustment from the current physical frame size to
    /// `new_size` without updating any bookkeeping.
    ///
    /// Uses `lea` when flags must survive (the adjustment may sit between
    /// a comparison and its consuming branch).
    pub(crate) fn adjust_sp(&mut self, new_size: u32, preserve_flags: bool) -> Result<(), Error> {
        use super::encoding::*;
        let current = self.info.fnc.stack_frame_size;
        if new_size == current {
            return Ok(());
        }
        let delta = i64::from(current) - i64::from(new_size);
        if preserve_flags {
            return self
                .instr(&LEA_R64_M)
                .set_r(Reg::Sp)
                .set_m4rm(Reg::Sp, delta as i32)
                .emit(&mut self.out);
        }
        let (abstr8, abstr32, magnitude) = if delta < 0 {
            (SUB_RM64_IMM8SX, SUB_RM64_IMM32SX, -delta)
        } else {
            (ADD_RM64_IMM8SX, ADD_RM64_IMM32SX, delta)
        };
        if magnitude <= i64::from(i8::MAX) {
            self.instr(&abstr8)
                .set_r4rm(Reg::Sp)
                .set_imm8(magnitude as u8)
                .emit(&mut self.out)
        } else {
            self.instr(&abstr32)
                .set_r4rm(Reg::Sp)
                .set_imm32(magnitude as u32)
                .emit(&mut self.out)
        }
    }

    // --- jumps and traps ----------------------------------------------------

    /// Emits a jump with a placeholder displacement and returns its patch
    /// handle. `cc` of `None` emits an unconditional `jmp`.
    pub(crate) fn prepare_jmp(&mut self, short: bool, cc: Option<Cc>) -> Result<RelPatchObj, Error> {
        let abstr = match (short, cc.is_some()) {
            (true, false) => JMP_REL8,
            (false, false) => JMP_REL32,
            (true, true) => JCC_REL8,
            (false, true) => JCC_REL32,
        };
        let mut instr = self.instr(&abstr);
        if let Some(cc) = cc {
            instr = instr.set_cc(cc);
        }
        instr = if short { instr.set_rel8(0) } else { instr.set_rel32(0) };
        instr.emit(&mut self.out)?;
        Ok(RelPatchObj::new(short, self.out.pos()))
    }

    /// Emits `lea reg, [rip + 0]` and returns the patch handle of its
    /// displacement, to be linked at the referenced data.
    pub(crate) fn prepare_pc_rel_lea(&mut self, reg: Reg) -> Result<RelPatchObj, Error> {
        self.instr(&LEA_R64_M)
            .set_r(reg)
            .set_mip4rm(0)
            .emit(&mut self.out)?;
        Ok(RelPatchObj::new(false, self.out.pos()))
    }

    /// Emits the trap sequence: trap code into the pinned trap register,
    /// bytecode position breadcrumb in debug builds, then a jump into the
    /// per-module generic trap handler.
    pub(crate) fn emit_trap(&mut self, code: wasp_core::TrapCode) -> Result<(), Error> {
        self.emit_mov_imm_to_gpr(
            pinned::TRAP_REG,
            MachineType::I32,
            u64::from(u8::from(code)),
            true,
        )?;
        if self.config.debug_breadcrumbs {
            self.emit_mov_imm_to_gpr(
                pinned::TRAP_POS_REG,
                MachineType::I32,
                u64::from(self.info.bytecode_pos),
                true,
            )?;
        }
        let patch = self.prepare_jmp(false, None)?;
        patch.link_to_binary_pos(&mut self.out, self.info.helpers.generic_trap_handler)
    }

    /// Emits a conditional trap: branches over the trap sequence unless
    /// `cc` holds.
    pub(crate) fn emit_ctrap(&mut self, code: wasp_core::TrapCode, cc: Cc) -> Result<(), Error> {
        let skip = self.prepare_jmp(true, Some(cc.negate()))?;
        self.emit_trap(code)?;
        skip.link_to_here(&mut self.out)
    }
}

/// Returns `true` if a storage satisfies an operand-form constraint.
fn fits_arg_type(arg_type: ArgType, storage: &VariableStorage) -> bool {
    use ArgType::*;
    let Some(want) = arg_type.machine_type() else {
        return matches!(storage, VariableStorage::Invalid);
    };
    if storage.ty() != Some(want) {
        return false;
    }
    match arg_type {
        None => unreachable!(),
        R32 | R64 | R32F | R64F => matches!(
            storage,
            VariableStorage::Register { reg, .. } if reg.holds(want)
        ),
        Rm32 | Rm64 | Rm32F | Rm64F => match storage {
            VariableStorage::Register { reg, .. } => reg.holds(want),
            VariableStorage::StackMemory { .. } | VariableStorage::LinkData { .. } => true,
            _ => false,
        },
        Imm32 => matches!(storage, VariableStorage::Constant { .. }),
        Imm32Sx64 => matches!(
            storage,
            VariableStorage::Constant { bits, .. } if i32::try_from(*bits as i64).is_ok()
        ),
        Imm8Sx32 => matches!(
            storage,
            VariableStorage::Constant { bits, .. } if i8::try_from(*bits as u32 as i32).is_ok()
        ),
        Imm8Sx64 => matches!(
            storage,
            VariableStorage::Constant { bits, .. } if i8::try_from(*bits as i64).is_ok()
        ),
        Imm8_32 | Imm8_64 => matches!(
            storage,
            VariableStorage::Constant { bits, .. } if *bits <= 0xFF
        ),
        C1_32 | C1_64 => matches!(storage, VariableStorage::Constant { bits: 1, .. }),
    }
}

fn storage_bits(storage: &VariableStorage) -> u64 {
    match storage {
        VariableStorage::Constant { bits, .. } => *bits,
        _ => unreachable!("immediate constraint requires a constant"),
    }
}

fn mem_base_disp(storage: &VariableStorage) -> (Reg, i32) {
    match *storage {
        VariableStorage::StackMemory { sp_offset, .. } => (Reg::Sp, sp_offset),
        VariableStorage::LinkData { offset, .. } => (pinned::LIN_MEM, offset),
        _ => unreachable!("not a memory storage"),
    }
}
