//! Opcode lowering for x86-64: function prologue and epilogue, the
//! deferred-comparison machinery, integer and float arithmetic, the
//! conversion sequences and linear memory accesses.

use super::{
    encoding::{self as enc, AbstrInstr, Cc},
    regs::{pinned, Reg, RegMask, WasmAbi},
    relpatch::RelPatchObj,
};
use crate::{
    binary::LinkDataLayout,
    compiler::{
        elem::{ElemKind, StackElement},
        module_info::{LocalDef, LocalStorage},
        storage::VariableStorage,
        Compiler,
    },
    isa::BranchCond,
    BoundsCheckMode, Error,
};
use wasp_core::{MachineType, TrapCode, TruncLimits};

// Candidate tables, cheaper encodings first.
pub(crate) const ADD32: &[AbstrInstr] = &[
    enc::ADD_RM32_IMM8SX,
    enc::ADD_RM32_IMM32,
    enc::ADD_RM32_R32,
    enc::ADD_R32_RM32,
];
pub(crate) const ADD64: &[AbstrInstr] = &[
    enc::ADD_RM64_IMM8SX,
    enc::ADD_RM64_IMM32SX,
    enc::ADD_RM64_R64,
    enc::ADD_R64_RM64,
];
pub(crate) const SUB32: &[AbstrInstr] = &[
    enc::SUB_RM32_IMM8SX,
    enc::SUB_RM32_IMM32,
    enc::SUB_RM32_R32,
    enc::SUB_R32_RM32,
];
pub(crate) const SUB64: &[AbstrInstr] = &[
    enc::SUB_RM64_IMM8SX,
    enc::SUB_RM64_IMM32SX,
    enc::SUB_RM64_R64,
    enc::SUB_R64_RM64,
];
pub(crate) const AND32: &[AbstrInstr] = &[
    enc::AND_RM32_IMM8SX,
    enc::AND_RM32_IMM32,
    enc::AND_RM32_R32,
    enc::AND_R32_RM32,
];
pub(crate) const AND64: &[AbstrInstr] = &[
    enc::AND_RM64_IMM8SX,
    enc::AND_RM64_IMM32SX,
    enc::AND_RM64_R64,
    enc::AND_R64_RM64,
];
pub(crate) const OR32: &[AbstrInstr] = &[
    enc::OR_RM32_IMM8SX,
    enc::OR_RM32_IMM32,
    enc::OR_RM32_R32,
    enc::OR_R32_RM32,
];
pub(crate) const OR64: &[AbstrInstr] = &[
    enc::OR_RM64_IMM8SX,
    enc::OR_RM64_IMM32SX,
    enc::OR_RM64_R64,
    enc::OR_R64_RM64,
];
pub(crate) const XOR32: &[AbstrInstr] = &[
    enc::XOR_RM32_IMM8SX,
    enc::XOR_RM32_IMM32,
    enc::XOR_RM32_R32,
    enc::XOR_R32_RM32,
];
pub(crate) const XOR64: &[AbstrInstr] = &[
    enc::XOR_RM64_IMM8SX,
    enc::XOR_RM64_IMM32SX,
    enc::XOR_RM64_R64,
    enc::XOR_R64_RM64,
];
pub(crate) const MUL32: &[AbstrInstr] = &[enc::IMUL_R32_RM32];
pub(crate) const MUL64: &[AbstrInstr] = &[enc::IMUL_R64_RM64];

const CMP32: &[AbstrInstr] = &[
    enc::CMP_RM32_IMM8SX.commutative(),
    enc::CMP_RM32_IMM32.commutative(),
    enc::CMP_RM32_R32.commutative(),
    enc::CMP_R32_RM32.commutative(),
];
const CMP64: &[AbstrInstr] = &[
    enc::CMP_RM64_IMM8SX.commutative(),
    enc::CMP_RM64_IMM32SX.commutative(),
    enc::CMP_RM64_R64.commutative(),
    enc::CMP_R64_RM64.commutative(),
];
const UCOMIS32: &[AbstrInstr] = &[enc::UCOMISS_RF_RMF.commutative()];
const UCOMIS64: &[AbstrInstr] = &[enc::UCOMISD_RF_RMF.commutative()];

/// Maps an integer branch condition to its condition code.
///
/// Float conditions never map to a single code (NaN turns into parity);
/// they go through [`Compiler::emit_branch_cc`] instead.
fn cc_for_int_bc(cond: BranchCond) -> Cc {
    match cond {
        BranchCond::Truthy => Cc::Ne,
        BranchCond::Falsy => Cc::E,
        BranchCond::Eq => Cc::E,
        BranchCond::Ne => Cc::Ne,
        BranchCond::LtS => Cc::L,
        BranchCond::LtU => Cc::B,
        BranchCond::GtS => Cc::G,
        BranchCond::GtU => Cc::A,
        BranchCond::LeS => Cc::Le,
        BranchCond::LeU => Cc::Be,
        BranchCond::GeS => Cc::Ge,
        BranchCond::GeU => Cc::Ae,
        _ => unreachable!("float conditions have no single condition code"),
    }
}

impl Compiler<'_, '_> {
    // --- function prologue and epilogue ----------------------------------

    /// Assigns a register or frame slot to one local, params first.
    ///
    /// Parameters must all be allocated before the first non-parameter
    /// local; their homes are exactly the ABI positions the Wasm calling
    /// convention delivers them in, so no prologue moves are needed.
    pub(crate) fn allocate_local(&mut self, ty: MachineType, is_param: bool) -> Result<(), Error> {
        let mode = self.config.bounds_checks;
        let gpr_pool = WasmAbi::gpr(mode);
        let fpr_pool = WasmAbi::FPR;
        let (pool, in_regs, reg_params) = if ty.is_int() {
            (
                gpr_pool,
                self.info.fnc.num_locals_in_gpr,
                self.param_reg_count(true),
            )
        } else {
            (
                fpr_pool,
                self.info.fnc.num_locals_in_fpr,
                self.param_reg_count(false),
            )
        };

        let storage = if is_param {
            debug_assert_eq!(self.info.fnc.num_params, self.info.fnc.num_locals);
            if (in_regs as usize) < WasmAbi::REGS_FOR_PARAMS {
                LocalStorage::Reg(pool[in_regs as usize])
            } else {
                let offset = self.info.fnc.param_width;
                self.info.fnc.param_width += 8;
                LocalStorage::StackParam(offset)
            }
        } else {
            // Continue the pool after the parameter registers, skipping
            // globals-bound registers and stopping short of the reserved
            // scratch slots.
            let reserve = if ty.is_int() {
                WasmAbi::RES_SCRATCH_GPR
            } else {
                WasmAbi::RES_SCRATCH_FPR
            };
            let mut slot = (in_regs as usize).max(reg_params);
            while slot < pool.len() - reserve && self.info.global_regs.contains(pool[slot]) {
                slot += 1;
            }
            if slot < pool.len() - reserve {
                LocalStorage::Reg(pool[slot])
            } else {
                let pos = self.info.fnc.direct_locals_width;
                self.info.fnc.direct_locals_width += 8;
                LocalStorage::FramePos(pos)
            }
        };

        let save_pos = if let LocalStorage::Reg(reg) = storage {
            if ty.is_int() {
                self.info.fnc.num_locals_in_gpr = self.next_pool_count(gpr_pool, reg);
            } else {
                self.info.fnc.num_locals_in_fpr = self.next_pool_count(fpr_pool, reg);
            }
            let pos = self.info.fnc.direct_locals_width;
            self.info.fnc.direct_locals_width += 8;
            Some(pos)
        } else {
            None
        };

        self.info.fnc.local_defs.push(LocalDef {
            ty,
            storage,
            save_pos,
        });
        self.info.fnc.num_locals += 1;
        if is_param {
            self.info.fnc.num_params += 1;
        }
        Ok(())
    }

    fn next_pool_count(&self, pool: &[Reg], reg: Reg) -> u32 {
        pool.iter().position(|&r| r == reg).map_or(0, |p| p as u32 + 1)
    }

    fn param_reg_count(&self, int: bool) -> usize {
        self.info
            .fnc
            .local_defs
            .iter()
            .take(self.info.fnc.num_params as usize)
            .filter(|def| def.ty.is_int() == int && matches!(def.storage, LocalStorage::Reg(_)))
            .count()
    }

    /// Opens the function body: resolves pending calls to this function,
    /// sets up the stack frame, saves the callee-saved locals registers
    /// and zero-initializes the non-parameter locals.
    pub(crate) fn entered_function(&mut self) -> Result<(), Error> {
        let label = self.info.func_labels[self.info.fnc.index as usize];
        self.labels.pin(label, &mut self.out)?;

        let frame = self.info.fnc.direct_locals_width.next_multiple_of(16);
        self.adjust_sp_from(0, frame, false)?;
        self.info.fnc.stack_frame_size = frame;
        self.info.fnc.frame_used = self.info.fnc.direct_locals_width;

        if self.config.stack_fence_check {
            self.instr(&enc::CMP_R64_RM64)
                .set_r(Reg::Sp)
                .set_m4rm(pinned::LIN_MEM, LinkDataLayout::STACK_FENCE)
                .emit(&mut self.out)?;
            self.emit_ctrap(TrapCode::StackFenceBreached, Cc::B)?;
        }

        if self.config.debug_breadcrumbs {
            // Patch this function's index into the caller-pushed
            // stacktrace record; indirect callers cannot know it.
            self.instr(&enc::MOV_R64_RM64)
                .set_r(Reg::A)
                .set_m4rm(pinned::LIN_MEM, LinkDataLayout::LAST_FRAME_REF_PTR)
                .emit(&mut self.out)?;
            self.instr(&enc::MOV_RM32_IMM32)
                .set_m4rm(Reg::A, 4)
                .set_imm32(self.info.fnc.index)
                .emit(&mut self.out)?;
        }

        // Save the callee-saved homes this function assigns to its
        // non-parameter locals, then zero-initialize those locals.
        for local in self.info.fnc.num_params..self.info.fnc.num_locals {
            let def = self.info.fnc.local_defs[local as usize];
            if let (LocalStorage::Reg(reg), Some(save_pos)) = (def.storage, def.save_pos) {
                let wide = if reg.is_gpr() {
                    MachineType::I64
                } else {
                    MachineType::F64
                };
                self.emit_move(
                    VariableStorage::stack(wide, self.info.sp_offset_of_frame_pos(save_pos)),
                    VariableStorage::reg(wide, reg),
                    false,
                )?;
            }
            let elem = StackElement::new(ElemKind::Local { ty: def.ty, index: local });
            let home = self.info.storage_of(&elem);
            self.emit_move(home, VariableStorage::zero(def.ty), false)?;
        }
        Ok(())
    }

    /// Emits the return sequence: restore the callee-saved locals homes,
    /// release the frame and return. Expects the results already moved to
    /// their return-convention positions.
    ///
    /// With `temporary` the frame bookkeeping is left untouched because
    /// the return sits on a conditionally-taken path.
    pub(crate) fn emit_return_and_unwind(&mut self, _temporary: bool) -> Result<(), Error> {
        for local in self.info.fnc.num_params..self.info.fnc.num_locals {
            let def = self.info.fnc.local_defs[local as usize];
            if let (LocalStorage::Reg(reg), Some(save_pos)) = (def.storage, def.save_pos) {
                let wide = if reg.is_gpr() {
                    MachineType::I64
                } else {
                    MachineType::F64
                };
                self.emit_move(
                    VariableStorage::reg(wide, reg),
                    VariableStorage::stack(wide, self.info.sp_offset_of_frame_pos(save_pos)),
                    false,
                )?;
            }
        }
        let frame = self.info.fnc.stack_frame_size;
        self.adjust_sp_from(frame, 0, false)?;
        self.instr(&enc::RET).emit(&mut self.out)
    }

    /// Emits an SP adjustment between two explicit frame sizes without
    /// touching the frame bookkeeping.
    pub(crate) fn adjust_sp_from(
        &mut self,
        current: u32,
        target: u32,
        preserve_flags: bool,
    ) -> Result<(), Error> {
        let saved = self.info.fnc.stack_frame_size;
        self.info.fnc.stack_frame_size = current;
        let result = self.adjust_sp(target, preserve_flags);
        self.info.fnc.stack_frame_size = saved;
        result
    }

    // --- comparisons and their consumers ---------------------------------

    /// Emits a comparison, choosing the cheapest operand order, and
    /// returns the branch condition adjusted for any operand swap.
    ///
    /// No destination is produced; the condition lives in the CPU flags
    /// until the next consumer materializes or branches on it.
    pub(crate) fn emit_comparison(
        &mut self,
        ty: MachineType,
        cond: BranchCond,
        lhs: &StackElement,
        rhs: &StackElement,
    ) -> Result<BranchCond, Error> {
        let table = match ty {
            MachineType::I32 => CMP32,
            MachineType::I64 => CMP64,
            MachineType::F32 => UCOMIS32,
            MachineType::F64 => UCOMIS64,
        };
        let reversed = self
            .select_instr(table, Some(lhs), Some(rhs), None, RegMask::none(), true)?
            .reversed;
        let cond = if reversed { cond.reverse() } else { cond };
        self.info.last_bc = Some(cond);
        Ok(cond)
    }

    /// Emits the conditional-jump sequence for `cond` with placeholder
    /// targets, returning the patch handles of every jump that must land
    /// on the taken target.
    ///
    /// Float conditions expand into the parity dance: equality must also
    /// be ordered (`jp` skips), inequality is also taken for unordered,
    /// and the ordered relations take the unordered-is-false edge through
    /// operand-order-aware encodings.
    pub(crate) fn emit_branch_cc(&mut self, cond: BranchCond) -> Result<Vec<RelPatchObj>, Error> {
        use BranchCond::*;
        let taken = |compiler: &mut Self, cc: Cc| compiler.prepare_jmp(false, Some(cc));
        Ok(match cond {
            Unconditional => vec![self.prepare_jmp(false, None)?],
            FEq => {
                let skip = self.prepare_jmp(true, Some(Cc::P))?;
                let patch = taken(self, Cc::E)?;
                skip.link_to_here(&mut self.out)?;
                vec![patch]
            }
            FNe => {
                let unordered = taken(self, Cc::P)?;
                let not_equal = taken(self, Cc::Ne)?;
                vec![unordered, not_equal]
            }
            FLt => {
                let skip = self.prepare_jmp(true, Some(Cc::P))?;
                let patch = taken(self, Cc::B)?;
                skip.link_to_here(&mut self.out)?;
                vec![patch]
            }
            FLe => {
                let skip = self.prepare_jmp(true, Some(Cc::P))?;
                let patch = taken(self, Cc::Be)?;
                skip.link_to_here(&mut self.out)?;
                vec![patch]
            }
            FGt => vec![taken(self, Cc::A)?],
            FGe => vec![taken(self, Cc::Ae)?],
            FNotLt => vec![taken(self, Cc::Ae)?, taken(self, Cc::P)?],
            FNotLe => vec![taken(self, Cc::A)?, taken(self, Cc::P)?],
            FNotGt => vec![taken(self, Cc::Be)?],
            FNotGe => vec![taken(self, Cc::B)?],
            int => vec![taken(self, cc_for_int_bc(int))?],
        })
    }

    /// Materializes the pending condition bits into a fresh `0`/`1`
    /// register value.
    pub(crate) fn emit_cmp_result(
        &mut self,
        cond: BranchCond,
        hint: Option<&StackElement>,
    ) -> Result<StackElement, Error> {
        let reg = match self.hint_reg_if_suitable(hint, MachineType::I32, RegMask::none()) {
            Some(reg) => reg,
            None => self.req_scratch_reg(MachineType::I32, RegMask::none(), false, true)?,
        };
        if cond.is_float() {
            // mov reg, 1; branch-if-cond over the clear; mov reg, 0
            self.emit_mov_imm_to_gpr(reg, MachineType::I32, 1, true)?;
            let patches = self.emit_branch_cc(cond)?;
            self.emit_mov_imm_to_gpr(reg, MachineType::I32, 0, true)?;
            for patch in patches {
                patch.link_to_here(&mut self.out)?;
            }
        } else {
            // mov reg, 0 keeps the flags alive for setcc.
            self.emit_mov_imm_to_gpr(reg, MachineType::I32, 0, true)?;
            self.instr(&enc::SETCC_RM8)
                .set_cc(cc_for_int_bc(cond))
                .set_r4rm(reg)
                .emit(&mut self.out)?;
        }
        Ok(StackElement::scratch(MachineType::I32, reg))
    }

    /// Lowers `select`: keeps `truthy` when the condition holds,
    /// otherwise replaces it with `falsy`.
    pub(crate) fn emit_select(
        &mut self,
        truthy: &mut StackElement,
        falsy: &mut StackElement,
        cond: BranchCond,
        hint: Option<&StackElement>,
    ) -> Result<StackElement, Error> {
        let ty = truthy.ty().expect("select operands are values");
        let reg = self.lift_to_reg(
            truthy,
            true,
            hint,
            self.info.mask_for_elem(Some(falsy)),
            true,
        )?;
        if ty.is_int() && !cond.is_float() {
            // cmov!cond reg, falsy
            if falsy.is_constant() {
                self.lift_to_reg(falsy, false, None, RegMask::of(reg), true)?;
            }
            let abstr = if ty.is_wide() {
                enc::CMOVCC_R64_RM64
            } else {
                enc::CMOVCC_R32_RM32
            };
            let falsy_storage = self.info.storage_of(falsy);
            let mut instr = self
                .instr(&abstr)
                .set_cc(cc_for_int_bc(cond).negate())
                .set_r(reg);
            instr = match falsy_storage {
                VariableStorage::Register { reg: s, .. } => instr.set_r4rm(s),
                VariableStorage::StackMemory { sp_offset, .. } => instr.set_m4rm(Reg::Sp, sp_offset),
                VariableStorage::LinkData { offset, .. } => {
                    instr.set_m4rm(pinned::LIN_MEM, offset)
                }
                _ => unreachable!("constants were lifted above"),
            };
            instr.emit(&mut self.out)?;
        } else {
            // Branch-and-move: floats have no flag-safe conditional move
            // over parity combinations.
            let patches = self.emit_branch_cc(cond)?;
            let falsy_storage = self.info.storage_of(falsy);
            self.emit_move(VariableStorage::reg(ty, reg), falsy_storage, false)?;
            for patch in patches {
                patch.link_to_here(&mut self.out)?;
            }
        }
        Ok(StackElement::scratch(ty, reg))
    }

    // --- integer arithmetic ----------------------------------------------

    /// Binary operation through instruction selection; the workhorse of
    /// the arithmetic families.
    pub(crate) fn emit_binop(
        &mut self,
        table: &[AbstrInstr],
        lhs: &StackElement,
        rhs: &StackElement,
        hint: Option<&StackElement>,
    ) -> Result<StackElement, Error> {
        Ok(self
            .select_instr(table, Some(lhs), Some(rhs), hint, RegMask::none(), false)?
            .elem)
    }

    /// Two-slot unary operation (`clz`, `sqrt`, conversions): the
    /// selector chooses a destination register.
    pub(crate) fn emit_unop(
        &mut self,
        table: &[AbstrInstr],
        arg: &StackElement,
        hint: Option<&StackElement>,
    ) -> Result<StackElement, Error> {
        Ok(self
            .select_instr(table, None, Some(arg), hint, RegMask::none(), false)?
            .elem)
    }

    /// Shift or rotate. Constant counts use the immediate (or by-one)
    /// encodings; dynamic counts go through `cl`.
    pub(crate) fn emit_shift(
        &mut self,
        c1: AbstrInstr,
        imm8: AbstrInstr,
        by_cl: AbstrInstr,
        mut value: StackElement,
        mut count: StackElement,
        hint: Option<&StackElement>,
    ) -> Result<StackElement, Error> {
        let ty = value.ty().expect("shift value is typed");
        let mask = if ty.is_wide() { 63 } else { 31 };
        if let ElemKind::Constant { bits, .. } = count.kind {
            let amount = bits & mask;
            if amount == 0 {
                // Shifting by zero is the identity; still normalize the
                // result into a writable location like any other shift.
                let reg = self.lift_to_reg(&mut value, true, hint, RegMask::none(), false)?;
                return Ok(StackElement::scratch(ty, reg));
            }
            let count = StackElement::constant(ty, amount);
            return Ok(self
                .select_instr(
                    &[c1, imm8],
                    Some(&value),
                    Some(&count),
                    hint,
                    RegMask::none(),
                    false,
                )?
                .elem);
        }
        let value_mask = self.info.mask_for_elem(Some(&value));
        self.force_into_reg(&mut count, Reg::C, value_mask, false)?;
        Ok(self
            .select_instr(
                &[by_cl],
                Some(&value),
                None,
                hint,
                RegMask::of(Reg::C),
                false,
            )?
            .elem)
    }

    /// Moves `elem` into the specific register `reg`, evicting any
    /// current tenant. `prot` additionally protects registers holding
    /// other live popped operands from being chosen as the eviction
    /// target.
    pub(crate) fn force_into_reg(
        &mut self,
        elem: &mut StackElement,
        reg: Reg,
        prot: RegMask,
        preserve_flags: bool,
    ) -> Result<(), Error> {
        let ty = elem.ty().expect("cannot force a non-value into a register");
        if self.info.reg_of(elem) == Some(reg) {
            return Ok(());
        }
        self.spill_reg(
            reg,
            prot | self.info.mask_for_elem(Some(elem)),
            false,
            preserve_flags,
        )?;
        let source = self.info.storage_of(elem);
        self.emit_move(VariableStorage::reg(ty, reg), source, preserve_flags)?;
        elem.kind = ElemKind::Scratch { ty, reg };
        Ok(())
    }

    /// Integer division and remainder: `rax`/`rdx` fixed-register forms
    /// with the Wasm trap semantics.
    pub(crate) fn emit_div_rem(
        &mut self,
        ty: MachineType,
        signed: bool,
        want_rem: bool,
        mut dividend: StackElement,
        mut divisor: StackElement,
    ) -> Result<StackElement, Error> {
        debug_assert!(ty.is_int());
        let wide = ty.is_wide();

        // rax takes the dividend, rdx the sign extension; the divisor may
        // live anywhere else, so evict it from both first.
        let prot = RegMask::of(Reg::A) | RegMask::of(Reg::D);
        if divisor.is_constant()
            || matches!(self.info.reg_of(&divisor), Some(Reg::A) | Some(Reg::D))
        {
            let dividend_mask = self.info.mask_for_elem(Some(&dividend));
            self.lift_to_reg(&mut divisor, false, None, prot | dividend_mask, false)?;
        }
        let divisor_mask = self.info.mask_for_elem(Some(&divisor));
        self.force_into_reg(&mut dividend, Reg::A, divisor_mask, false)?;
        self.spill_reg(Reg::D, RegMask::of(Reg::A) | divisor_mask, false, false)?;
        let divisor_storage = self.info.storage_of(&divisor);

        let (cmp_table, cmp0): (&[AbstrInstr], _) = if wide {
            (CMP64, StackElement::constant(ty, 0))
        } else {
            (CMP32, StackElement::constant(ty, 0))
        };
        self.select_instr(cmp_table, Some(&divisor), Some(&cmp0), None, prot, true)?;
        self.emit_ctrap(TrapCode::DivZero, Cc::E)?;

        let apply_rm = |instr: super::instruction::Instruction,
                        storage: &VariableStorage| match *storage {
            VariableStorage::Register { reg, .. } => instr.set_r4rm(reg),
            VariableStorage::StackMemory { sp_offset, .. } => instr.set_m4rm(Reg::Sp, sp_offset),
            VariableStorage::LinkData { offset, .. } => instr.set_m4rm(pinned::LIN_MEM, offset),
            _ => unreachable!("divisor was lifted out of constants"),
        };

        if signed {
            // divisor == -1 needs the overflow check (div) or a fixed
            // zero result (rem): INT_MIN / -1 overflows the quotient.
            let minus_one = StackElement::constant(ty, if wide { u64::MAX } else { u32::MAX as u64 });
            self.select_instr(cmp_table, Some(&divisor), Some(&minus_one), None, prot, true)?;
            if want_rem {
                let ordinary = self.prepare_jmp(true, Some(Cc::Ne))?;
                // rem by -1 is 0, bypassing the faulting idiv.
                self.emit_mov_imm_to_gpr(Reg::D, ty, 0, false)?;
                let done = self.prepare_jmp(true, None)?;
                ordinary.link_to_here(&mut self.out)?;
                self.instr(if wide { &enc::CQO } else { &enc::CDQ })
                    .emit(&mut self.out)?;
                apply_rm(
                    self.instr(if wide { &enc::IDIV_RM64 } else { &enc::IDIV_RM32 }),
                    &divisor_storage,
                )
                .emit(&mut self.out)?;
                done.link_to_here(&mut self.out)?;
            } else {
                let ordinary = self.prepare_jmp(true, Some(Cc::Ne))?;
                let int_min = if wide { 1u64 << 63 } else { 1 << 31 };
                let min_elem = StackElement::constant(ty, int_min);
                let dividend_elem = StackElement::scratch(ty, Reg::A);
                self.select_instr(
                    cmp_table,
                    Some(&dividend_elem),
                    Some(&min_elem),
                    None,
                    prot,
                    true,
                )?;
                self.emit_ctrap(TrapCode::DivOverflow, Cc::E)?;
                ordinary.link_to_here(&mut self.out)?;
                self.instr(if wide { &enc::CQO } else { &enc::CDQ })
                    .emit(&mut self.out)?;
                apply_rm(
                    self.instr(if wide { &enc::IDIV_RM64 } else { &enc::IDIV_RM32 }),
                    &divisor_storage,
                )
                .emit(&mut self.out)?;
            }
        } else {
            self.emit_mov_imm_to_gpr(Reg::D, ty, 0, false)?;
            apply_rm(
                self.instr(if wide { &enc::DIV_RM64 } else { &enc::DIV_RM32 }),
                &divisor_storage,
            )
            .emit(&mut self.out)?;
        }

        let result = if want_rem { Reg::D } else { Reg::A };
        Ok(StackElement::scratch(ty, result))
    }

    // --- float min/max, sign ops -----------------------------------------

    /// `f{32,64}.{min,max}` with the Wasm NaN and signed-zero semantics:
    /// NaN operands propagate (via an add), equal operands merge their
    /// sign bits, and only the strictly ordered path uses the hardware
    /// min/max.
    pub(crate) fn emit_float_min_max(
        &mut self,
        ty: MachineType,
        is_min: bool,
        mut lhs: StackElement,
        mut rhs: StackElement,
    ) -> Result<StackElement, Error> {
        let wide = ty.is_wide();
        let reg = self.lift_to_reg(&mut lhs, true, None, RegMask::none(), false)?;
        let rhs_reg = self.lift_to_reg(
            &mut rhs,
            false,
            None,
            RegMask::of(reg),
            false,
        )?;

        self.instr(if wide { &enc::UCOMISD_RF_RMF } else { &enc::UCOMISS_RF_RMF })
            .set_r(reg)
            .set_r4rm(rhs_reg)
            .emit(&mut self.out)?;
        let nan = self.prepare_jmp(true, Some(Cc::P))?;
        let strict = self.prepare_jmp(true, Some(Cc::Ne))?;
        // Equal: merge signs so min(-0, +0) is -0 and max(-0, +0) is +0.
        let merge = match (is_min, wide) {
            (true, false) => &enc::ORPS_RF_RF,
            (true, true) => &enc::ORPD_RF_RF,
            (false, false) => &enc::ANDPS_RF_RF,
            (false, true) => &enc::ANDPD_RF_RF,
        };
        self.instr(merge).set_r(reg).set_r4rm(rhs_reg).emit(&mut self.out)?;
        let done_equal = self.prepare_jmp(true, None)?;
        strict.link_to_here(&mut self.out)?;
        let pick = match (is_min, wide) {
            (true, false) => &enc::MINSS_RF_RMF,
            (true, true) => &enc::MINSD_RF_RMF,
            (false, false) => &enc::MAXSS_RF_RMF,
            (false, true) => &enc::MAXSD_RF_RMF,
        };
        self.instr(pick).set_r(reg).set_r4rm(rhs_reg).emit(&mut self.out)?;
        let done_strict = self.prepare_jmp(true, None)?;
        nan.link_to_here(&mut self.out)?;
        // Unordered: an add of the operands produces a quiet NaN.
        self.instr(if wide { &enc::ADDSD_RF_RMF } else { &enc::ADDSS_RF_RMF })
            .set_r(reg)
            .set_r4rm(rhs_reg)
            .emit(&mut self.out)?;
        done_equal.link_to_here(&mut self.out)?;
        done_strict.link_to_here(&mut self.out)?;
        Ok(StackElement::scratch(ty, reg))
    }

    /// `fN.abs`: clear the sign bit by shifting it out and back in.
    pub(crate) fn emit_float_abs(
        &mut self,
        ty: MachineType,
        arg: &StackElement,
        hint: Option<&StackElement>,
    ) -> Result<StackElement, Error> {
        let (shl, shr) = if ty.is_wide() {
            (enc::PSLLQ_RF_IMM8, enc::PSRLQ_RF_IMM8)
        } else {
            (enc::PSLLD_RF_IMM8, enc::PSRLD_RF_IMM8)
        };
        let one = StackElement::constant(ty.as_int(), 1);
        let shifted = self
            .select_instr(&[shl], Some(arg), Some(&one), hint, RegMask::none(), false)?
            .elem;
        Ok(self
            .select_instr(&[shr], Some(&shifted), Some(&one), hint, RegMask::none(), false)?
            .elem)
    }

    /// `fN.neg`: flip the sign bit with an xor against the sign mask.
    pub(crate) fn emit_float_neg(
        &mut self,
        ty: MachineType,
        arg: &StackElement,
        hint: Option<&StackElement>,
    ) -> Result<StackElement, Error> {
        let (xor, mask): (_, u64) = if ty.is_wide() {
            (enc::XORPD_RF_RF, 1 << 63)
        } else {
            (enc::XORPS_RF_RF, 1 << 31)
        };
        let mask_elem = StackElement::constant(ty, mask);
        Ok(self
            .select_instr(&[xor], Some(arg), Some(&mask_elem), hint, RegMask::none(), false)?
            .elem)
    }

    /// `fN.copysign`: sign bit of `rhs`, everything else of `lhs`.
    pub(crate) fn emit_float_copysign(
        &mut self,
        ty: MachineType,
        lhs: &StackElement,
        rhs: &StackElement,
        hint: Option<&StackElement>,
    ) -> Result<StackElement, Error> {
        let (and, or, sign): (_, _, u64) = if ty.is_wide() {
            (enc::ANDPD_RF_RF, enc::ORPD_RF_RF, 1 << 63)
        } else {
            (enc::ANDPS_RF_RF, enc::ORPS_RF_RF, 1 << 31)
        };
        let sign_mask = StackElement::constant(ty, sign);
        let rest_mask = StackElement::constant(ty, !sign & if ty.is_wide() { u64::MAX } else { u32::MAX as u64 });
        let sign_part = self
            .select_instr(&[and], Some(rhs), Some(&sign_mask), None, RegMask::none(), false)?
            .elem;
        let rest_part = self
            .select_instr(
                &[and],
                Some(lhs),
                Some(&rest_mask),
                hint,
                self.info.mask_for_elem(Some(&sign_part)),
                false,
            )?
            .elem;
        Ok(self
            .select_instr(
                &[or],
                Some(&rest_part),
                Some(&sign_part),
                hint,
                RegMask::none(),
                false,
            )?
            .elem)
    }

    /// `fN.ceil/floor/trunc/nearest` through `roundss`/`roundsd`; the
    /// rounding mode is the trailing immediate.
    pub(crate) fn emit_float_round(
        &mut self,
        ty: MachineType,
        mode: u8,
        arg: &StackElement,
        hint: Option<&StackElement>,
    ) -> Result<StackElement, Error> {
        let table = if ty.is_wide() {
            &[enc::ROUNDSD_RF_RMF]
        } else {
            &[enc::ROUNDSS_RF_RMF]
        };
        let result = self
            .select_instr(table, None, Some(arg), hint, RegMask::none(), false)?
            .elem;
        self.out.write_byte(mode)?;
        Ok(result)
    }

    // --- conversions ------------------------------------------------------

    /// Checked float-to-integer truncation: traps on NaN and on values at
    /// or beyond the exclusive bounds, then truncates, with the unsigned
    /// 64-bit domain split at `2^63`.
    pub(crate) fn emit_float_trunc(
        &mut self,
        src: MachineType,
        dst: MachineType,
        signed: bool,
        mut arg: StackElement,
    ) -> Result<StackElement, Error> {
        let limits = TruncLimits::raw_limits(signed, src, dst);
        let src_wide = src.is_wide();
        let width = src.width();

        // The boundary constants live inline, jumped over, addressed
        // RIP-relative by the compares.
        let skip = self.prepare_jmp(true, None)?;
        self.out.align_to(width)?;
        let max_pos = self.out.pos();
        self.out.write_bytes_le(limits.max, width)?;
        let min_pos = self.out.pos();
        self.out.write_bytes_le(limits.min, width)?;
        // The 2^63 split constant for unsigned 64-bit results.
        let split_pos = if dst.is_wide() && !signed {
            let pos = self.out.pos();
            let two_pow_63 = if src_wide { 0x43E0_0000_0000_0000u64 } else { 0x5F00_0000 };
            self.out.write_bytes_le(two_pow_63, width)?;
            Some(pos)
        } else {
            None
        };
        skip.link_to_here(&mut self.out)?;

        let freg = self.lift_to_reg(&mut arg, true, None, RegMask::none(), false)?;
        let ucomis = if src_wide { &enc::UCOMISD_RF_RMF } else { &enc::UCOMISS_RF_RMF };

        let cur = self.out.pos();
        self.instr(ucomis)
            .set_r(freg)
            .set_mip4rm_abs(max_pos, cur)
            .emit(&mut self.out)?;
        self.emit_ctrap(TrapCode::TruncOverflow, Cc::P)?;
        self.emit_ctrap(TrapCode::TruncOverflow, Cc::Ae)?;
        let cur = self.out.pos();
        self.instr(ucomis)
            .set_r(freg)
            .set_mip4rm_abs(min_pos, cur)
            .emit(&mut self.out)?;
        self.emit_ctrap(TrapCode::TruncOverflow, Cc::Be)?;

        // Round toward zero, then convert.
        let round = if src_wide { &enc::ROUNDSD_RF_RMF } else { &enc::ROUNDSS_RF_RMF };
        self.instr(round).set_r(freg).set_r4rm(freg).emit(&mut self.out)?;
        self.out.write_byte(3)?;

        let out_reg = self.req_scratch_reg(dst, RegMask::none(), false, false)?;
        let cvt = match (src_wide, dst.is_wide() || !signed) {
            // unsigned 32-bit results convert through the 64-bit form,
            // whose range covers all of u32.
            (false, false) => &enc::CVTTSS2SI_R32_RMF,
            (false, true) => &enc::CVTTSS2SI_R64_RMF,
            (true, false) => &enc::CVTTSD2SI_R32_RMF,
            (true, true) => &enc::CVTTSD2SI_R64_RMF,
        };

        if let Some(split_pos) = split_pos {
            // Unsigned 64-bit: values at or above 2^63 convert shifted.
            let cur = self.out.pos();
            self.instr(ucomis)
                .set_r(freg)
                .set_mip4rm_abs(split_pos, cur)
                .emit(&mut self.out)?;
            let small = self.prepare_jmp(true, Some(Cc::B))?;
            let sub = if src_wide { &enc::SUBSD_RF_RMF } else { &enc::SUBSS_RF_RMF };
            let cur = self.out.pos();
            self.instr(sub)
                .set_r(freg)
                .set_mip4rm_abs(split_pos, cur)
                .emit(&mut self.out)?;
            self.instr(cvt).set_r(out_reg).set_r4rm(freg).emit(&mut self.out)?;
            self.instr(&enc::BTS_RM64_IMM8)
                .set_r4rm(out_reg)
                .set_imm8(63)
                .emit(&mut self.out)?;
            let done = self.prepare_jmp(true, None)?;
            small.link_to_here(&mut self.out)?;
            self.instr(cvt).set_r(out_reg).set_r4rm(freg).emit(&mut self.out)?;
            done.link_to_here(&mut self.out)?;
        } else {
            self.instr(cvt).set_r(out_reg).set_r4rm(freg).emit(&mut self.out)?;
        }
        Ok(StackElement::scratch(dst, out_reg))
    }

    /// Integer-to-float conversion.
    pub(crate) fn emit_int_to_float(
        &mut self,
        src: MachineType,
        dst: MachineType,
        signed: bool,
        mut arg: StackElement,
        hint: Option<&StackElement>,
    ) -> Result<StackElement, Error> {
        let cvt_32: &[AbstrInstr] = if dst.is_wide() {
            &[enc::CVTSI2SD_RF_RM32]
        } else {
            &[enc::CVTSI2SS_RF_RM32]
        };
        let cvt_64: &[AbstrInstr] = if dst.is_wide() {
            &[enc::CVTSI2SD_RF_RM64]
        } else {
            &[enc::CVTSI2SS_RF_RM64]
        };
        match (src.is_wide(), signed) {
            (false, true) => self.emit_unop(cvt_32, &arg, hint),
            (false, false) => {
                // Zero-extend to 64 bits, then the signed 64-bit convert
                // is exact over all of u32.
                let reg = self.lift_to_reg(&mut arg, true, None, RegMask::none(), false)?;
                // A 32-bit move of the register to itself clears the
                // upper half.
                self.instr(&enc::MOV_R32_RM32)
                    .set_r(reg)
                    .set_r4rm(reg)
                    .emit(&mut self.out)?;
                arg.kind = ElemKind::Scratch {
                    ty: MachineType::I64,
                    reg,
                };
                self.emit_unop(cvt_64, &arg, hint)
            }
            (true, true) => self.emit_unop(cvt_64, &arg, hint),
            (true, false) => {
                // Unsigned 64-bit: halve-with-rounding-bit for the upper
                // domain, plain convert below 2^63.
                let reg = self.lift_to_reg(&mut arg, true, None, RegMask::none(), false)?;
                let freg = self.req_scratch_reg(dst, RegMask::none(), false, false)?;
                self.instr(&enc::TEST_RM64_R64)
                    .set_r4rm(reg)
                    .set_r(reg)
                    .emit(&mut self.out)?;
                let small = self.prepare_jmp(true, Some(Cc::Ns))?;
                let tmp =
                    self.req_scratch_reg(MachineType::I64, RegMask::of(reg), false, false)?;
                self.emit_move(
                    VariableStorage::reg(MachineType::I64, tmp),
                    VariableStorage::reg(MachineType::I64, reg),
                    false,
                )?;
                let one = StackElement::constant(MachineType::I64, 1);
                let tmp_elem = StackElement::scratch(MachineType::I64, tmp);
                self.select_instr(AND64, Some(&tmp_elem), Some(&one), None, RegMask::of(reg), false)?;
                let reg_elem = StackElement::scratch(MachineType::I64, reg);
                self.select_instr(
                    &[enc::SHR_RM64_C1],
                    Some(&reg_elem),
                    Some(&one),
                    None,
                    RegMask::of(tmp),
                    false,
                )?;
                self.select_instr(
                    OR64,
                    Some(&reg_elem),
                    Some(&tmp_elem),
                    None,
                    RegMask::none(),
                    false,
                )?;
                let cvt = if dst.is_wide() {
                    &enc::CVTSI2SD_RF_RM64
                } else {
                    &enc::CVTSI2SS_RF_RM64
                };
                self.instr(cvt).set_r(freg).set_r4rm(reg).emit(&mut self.out)?;
                let double = if dst.is_wide() {
                    &enc::ADDSD_RF_RMF
                } else {
                    &enc::ADDSS_RF_RMF
                };
                self.instr(double).set_r(freg).set_r4rm(freg).emit(&mut self.out)?;
                let done = self.prepare_jmp(true, None)?;
                small.link_to_here(&mut self.out)?;
                self.instr(cvt).set_r(freg).set_r4rm(reg).emit(&mut self.out)?;
                done.link_to_here(&mut self.out)?;
                Ok(StackElement::scratch(dst, freg))
            }
        }
    }

    /// `iN.reinterpret_fN` and back: a register-class move, or a free
    /// retype for constants and spill slots.
    pub(crate) fn emit_reinterpret(
        &mut self,
        dst: MachineType,
        mut arg: StackElement,
    ) -> Result<StackElement, Error> {
        match arg.kind {
            ElemKind::Constant { .. } | ElemKind::Temp { .. } => {
                arg.retype(dst);
                Ok(arg)
            }
            _ => {
                let src_reg = self.lift_to_reg(&mut arg, false, None, RegMask::none(), false)?;
                let dst_reg = self.req_scratch_reg(dst, RegMask::of(src_reg), false, false)?;
                let src_ty = arg.ty().expect("reinterpret argument is a value");
                self.emit_move(
                    VariableStorage::reg(dst, dst_reg),
                    VariableStorage::reg(src_ty, src_reg),
                    false,
                )?;
                Ok(StackElement::scratch(dst, dst_reg))
            }
        }
    }

    // --- linear memory ----------------------------------------------------

    /// Computes the effective address of a linear-memory access and emits
    /// the bounds check (explicit mode), returning `(index_reg, disp)` to
    /// address `[lin_mem + index_reg + disp]`.
    pub(crate) fn prepare_linmem_addr(
        &mut self,
        mut addr: StackElement,
        offset: u64,
        access_width: u32,
        prot: RegMask,
    ) -> Result<(Reg, i32), Error> {
        // The extension-request helper communicates through the pinned
        // index register; the address must live elsewhere.
        let prot = prot | RegMask::of(pinned::INDIRECT_CALL_REG);
        let addr_reg = self.lift_to_reg(&mut addr, true, None, prot, false)?;
        let prot = prot | RegMask::of(addr_reg);

        match self.config.bounds_checks {
            BoundsCheckMode::Explicit => {
                // Fold the static offset into the index register with
                // 64-bit arithmetic: addr and offset are both 32-bit, so
                // the sum needs 33 bits and must not wrap.
                if offset != 0 {
                    if let Ok(disp) = i32::try_from(offset) {
                        self.instr(&enc::LEA_R64_M)
                            .set_r(addr_reg)
                            .set_m4rm(addr_reg, disp)
                            .emit(&mut self.out)?;
                    } else {
                        let tmp = self.req_scratch_reg(MachineType::I64, prot, false, false)?;
                        self.emit_mov_imm_to_gpr(tmp, MachineType::I64, offset, false)?;
                        let addr_elem = StackElement::scratch(MachineType::I64, addr_reg);
                        let tmp_elem = StackElement::scratch(MachineType::I64, tmp);
                        self.select_instr(
                            ADD64,
                            Some(&addr_elem),
                            Some(&tmp_elem),
                            None,
                            prot,
                            false,
                        )?;
                    }
                }
                // One signed compare against size-8 covers every access
                // width up to 8 bytes; the near-the-end cases escalate to
                // the extension-request helper which re-checks exactly.
                self.instr(&enc::CMP_RM64_R64)
                    .set_r4rm(addr_reg)
                    .set_r(pinned::MEM_SIZE)
                    .emit(&mut self.out)?;
                let in_bounds = self.prepare_jmp(true, Some(Cc::Be))?;
                self.emit_extension_request(addr_reg, access_width, prot)?;
                in_bounds.link_to_here(&mut self.out)?;
                Ok((addr_reg, 0))
            }
            BoundsCheckMode::Guarded => {
                // The guard region absorbs any 33-bit effective address.
                if let Ok(disp) = i32::try_from(offset) {
                    Ok((addr_reg, disp))
                } else {
                    let tmp = self.req_scratch_reg(MachineType::I64, prot, false, false)?;
                    self.emit_mov_imm_to_gpr(tmp, MachineType::I64, offset, false)?;
                    let addr_elem = StackElement::scratch(MachineType::I64, addr_reg);
                    let tmp_elem = StackElement::scratch(MachineType::I64, tmp);
                    self.select_instr(ADD64, Some(&addr_elem), Some(&tmp_elem), None, prot, false)?;
                    Ok((addr_reg, 0))
                }
            }
        }
    }

    /// Calls the extension-request helper for an access ending at
    /// `addr_reg + width`, trapping if the host cannot extend far enough.
    fn emit_extension_request(
        &mut self,
        addr_reg: Reg,
        width: u32,
        prot: RegMask,
    ) -> Result<(), Error> {
        // The helper takes the requested end address in the pinned
        // indirect-call register and reports through it.
        let arg = pinned::INDIRECT_CALL_REG;
        self.spill_reg(arg, prot, false, false)?;
        let saved = self.save_locals_for_call(self.memory_helper_clobbers())?;
        self.instr(&enc::LEA_R64_M)
            .set_r(arg)
            .set_m4rm(addr_reg, width as i32)
            .emit(&mut self.out)?;
        let call = self.prepare_jmp_call()?;
        call.link_to_binary_pos(&mut self.out, self.info.helpers.extension_request)?;
        // 1 = extended or already in bounds, 0 = hard out of bounds,
        // anything else = the host could not extend.
        let one = StackElement::constant(MachineType::I32, 1);
        let arg_elem = StackElement::scratch(MachineType::I32, arg);
        self.select_instr(CMP32, Some(&arg_elem), Some(&one), None, prot, true)?;
        let ok = self.prepare_jmp(true, Some(Cc::E))?;
        let zero = StackElement::constant(MachineType::I32, 0);
        self.select_instr(CMP32, Some(&arg_elem), Some(&zero), None, prot, true)?;
        self.emit_ctrap(TrapCode::LinMemOutOfBoundsAccess, Cc::E)?;
        self.emit_trap(TrapCode::LinMemCouldNotExtend)?;
        ok.link_to_here(&mut self.out)?;
        self.restore_locals_after_call(&saved)?;
        Ok(())
    }

    /// Emits a `call rel32` with a placeholder displacement.
    pub(crate) fn prepare_jmp_call(&mut self) -> Result<RelPatchObj, Error> {
        self.instr(&enc::CALL_REL32)
            .set_rel32(0)
            .emit(&mut self.out)?;
        Ok(RelPatchObj::new(false, self.out.pos()))
    }

    /// The registers the memory-helper wrappers clobber from the caller's
    /// point of view (argument registers only; everything else is saved
    /// inside the wrapper).
    pub(crate) fn memory_helper_clobbers(&self) -> RegMask {
        RegMask::of(pinned::INDIRECT_CALL_REG)
            | RegMask::of(Reg::R13)
            | RegMask::of(Reg::R14)
            | RegMask::of(Reg::R15)
    }

    /// Lowers one linear-memory load.
    pub(crate) fn emit_memory_load(
        &mut self,
        result_ty: MachineType,
        access_width: u32,
        sign_extend: bool,
        offset: u64,
        addr: StackElement,
    ) -> Result<StackElement, Error> {
        let (index, disp) = self.prepare_linmem_addr(addr, offset, access_width, RegMask::none())?;
        let result = self.req_scratch_reg(result_ty, RegMask::of(index), false, false)?;
        let abstr = match (result_ty, access_width, sign_extend) {
            (MachineType::I32, 1, false) => &enc::MOVZX_R32_RM8,
            (MachineType::I32, 1, true) => &enc::MOVSX_R32_RM8,
            (MachineType::I32, 2, false) => &enc::MOVZX_R32_RM16,
            (MachineType::I32, 2, true) => &enc::MOVSX_R32_RM16,
            (MachineType::I32, 4, _) => &enc::MOV_R32_RM32,
            (MachineType::I64, 1, false) => &enc::MOVZX_R32_RM8,
            (MachineType::I64, 1, true) => &enc::MOVSX_R64_RM8,
            (MachineType::I64, 2, false) => &enc::MOVZX_R32_RM16,
            (MachineType::I64, 2, true) => &enc::MOVSX_R64_RM16,
            (MachineType::I64, 4, false) => &enc::MOV_R32_RM32,
            (MachineType::I64, 4, true) => &enc::MOVSXD_R64_RM32,
            (MachineType::I64, 8, _) => &enc::MOV_R64_RM64,
            (MachineType::F32, 4, _) => &enc::MOVSS_RF_RMF,
            (MachineType::F64, 8, _) => &enc::MOVSD_RF_RMF,
            _ => unreachable!("validated loads only"),
        };
        self.instr(abstr)
            .set_r(result)
            .set_m4rm_indexed(pinned::LIN_MEM, disp, index, 0)
            .emit(&mut self.out)?;
        Ok(StackElement::scratch(result_ty, result))
    }

    /// Lowers one linear-memory store.
    pub(crate) fn emit_memory_store(
        &mut self,
        access_width: u32,
        offset: u64,
        addr: StackElement,
        mut value: StackElement,
    ) -> Result<(), Error> {
        let value_ty = value.ty().expect("store value is typed");
        let value_reg = self.lift_to_reg(
            &mut value,
            false,
            None,
            RegMask::of(pinned::INDIRECT_CALL_REG),
            false,
        )?;
        let (index, disp) =
            self.prepare_linmem_addr(addr, offset, access_width, RegMask::of(value_reg))?;
        let abstr = match (value_ty.is_int(), access_width) {
            (true, 1) => &enc::MOV_RM8_R8,
            (true, 2) => &enc::MOV_RM16_R16,
            (true, 4) => &enc::MOV_RM32_R32,
            (true, 8) => &enc::MOV_RM64_R64,
            (false, 4) => &enc::MOVSS_RMF_RF,
            (false, 8) => &enc::MOVSD_RMF_RF,
            _ => unreachable!("validated stores only"),
        };
        self.instr(abstr)
            .set_r(value_reg)
            .set_m4rm_indexed(pinned::LIN_MEM, disp, index, 0)
            .emit(&mut self.out)?;
        Ok(())
    }

    /// `memory.size`: the current page count from link data.
    pub(crate) fn emit_memory_size(&mut self) -> Result<StackElement, Error> {
        let reg = self.req_scratch_reg(MachineType::I32, RegMask::none(), false, false)?;
        self.instr(&enc::MOV_R32_RM32)
            .set_r(reg)
            .set_m4rm(pinned::LIN_MEM, LinkDataLayout::MEM_PAGES)
            .emit(&mut self.out)?;
        Ok(StackElement::scratch(MachineType::I32, reg))
    }

    /// `memory.grow`: zero deltas answer with the current size without
    /// reaching the host; everything else goes through the grow helper,
    /// which returns the previous page count or `0xFFFF_FFFF`.
    pub(crate) fn emit_memory_grow(
        &mut self,
        mut delta: StackElement,
    ) -> Result<StackElement, Error> {
        let arg = pinned::INDIRECT_CALL_REG;
        self.spill_reg(arg, self.info.mask_for_elem(Some(&delta)), false, false)?;
        let saved = self.save_locals_for_call(self.memory_helper_clobbers())?;
        self.force_into_reg(&mut delta, arg, RegMask::none(), false)?;

        let zero = StackElement::constant(MachineType::I32, 0);
        let arg_elem = StackElement::scratch(MachineType::I32, arg);
        self.select_instr(CMP32, Some(&arg_elem), Some(&zero), None, RegMask::of(arg), true)?;
        let nonzero = self.prepare_jmp(true, Some(Cc::Ne))?;
        self.instr(&enc::MOV_R32_RM32)
            .set_r(arg)
            .set_m4rm(pinned::LIN_MEM, LinkDataLayout::MEM_PAGES)
            .emit(&mut self.out)?;
        let done = self.prepare_jmp(true, None)?;
        nonzero.link_to_here(&mut self.out)?;
        let call = self.prepare_jmp_call()?;
        call.link_to_binary_pos(&mut self.out, self.info.helpers.mem_grow)?;
        done.link_to_here(&mut self.out)?;
        self.restore_locals_after_call(&saved)?;
        Ok(StackElement::scratch(MachineType::I32, arg))
    }

    /// `memory.copy` and `memory.fill` through the bulk helper, which
    /// carries memmove semantics and its own bounds checks.
    pub(crate) fn emit_memory_bulk(
        &mut self,
        helper_offset: u32,
        mut a: StackElement,
        mut b: StackElement,
        mut n: StackElement,
    ) -> Result<(), Error> {
        let arg0 = pinned::INDIRECT_CALL_REG;
        let arg1 = Reg::R13;
        let arg2 = Reg::R14;
        let live = self.info.mask_for_elem(Some(&a))
            | self.info.mask_for_elem(Some(&b))
            | self.info.mask_for_elem(Some(&n));
        self.spill_reg(arg0, live, false, false)?;
        self.spill_reg(arg1, live, false, false)?;
        self.spill_reg(arg2, live, false, false)?;
        let saved = self.save_locals_for_call(self.memory_helper_clobbers())?;
        let b_mask = self.info.mask_for_elem(Some(&b));
        let n_mask = self.info.mask_for_elem(Some(&n));
        self.force_into_reg(&mut a, arg0, b_mask | n_mask, false)?;
        let n_mask = self.info.mask_for_elem(Some(&n));
        self.force_into_reg(&mut b, arg1, n_mask | RegMask::of(arg0), false)?;
        self.force_into_reg(&mut n, arg2, RegMask::of(arg0) | RegMask::of(arg1), false)?;
        let call = self.prepare_jmp_call()?;
        call.link_to_binary_pos(&mut self.out, helper_offset)?;
        // 1 = done, anything else = out of bounds.
        let one = StackElement::constant(MachineType::I32, 1);
        let arg_elem = StackElement::scratch(MachineType::I32, arg0);
        self.select_instr(CMP32, Some(&arg_elem), Some(&one), None, RegMask::none(), true)?;
        self.emit_ctrap(TrapCode::LinMemOutOfBoundsAccess, Cc::Ne)?;
        self.restore_locals_after_call(&saved)?;
        Ok(())
    }

    /// Polls the status-flags bitfield and traps when the host requested
    /// interruption. Emitted at loop back edges when enabled.
    pub(crate) fn emit_interruption_check(&mut self) -> Result<(), Error> {
        self.instr(&enc::CMP_RM32_IMM8SX)
            .set_m4rm(pinned::LIN_MEM, LinkDataLayout::STATUS_FLAGS)
            .set_imm8(0)
            .emit(&mut self.out)?;
        self.emit_ctrap(TrapCode::BuiltinTrap, Cc::Ne)
    }
}
