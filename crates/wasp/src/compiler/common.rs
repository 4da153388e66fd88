//! ISA-neutral compiler helpers: lifting values into registers, scratch
//! register requests, the spill engine, and the value moves around
//! branches and calls.

use super::{
    elem::{ElemKind, ElemRef, StackElement},
    module_info::{GlobalStorage, LocalStorage},
    storage::VariableStorage,
    Compiler,
};
use crate::{
    isa::x86_64::regs::{Reg, RegMask, WasmAbi},
    Error,
};
use wasp_core::MachineType;

/// Where a branch or block-end places one of its values.
///
/// Register and frame-position targets stay valid while the physical frame
/// grows and shrinks; the SP-relative offset is computed at use time.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BranchTarget {
    /// A return-convention register.
    Reg(Reg),
    /// A frame slot at a fixed frame position.
    Frame(u32),
    /// A slot in the caller-provided stack return area, at the given
    /// offset within that area.
    RetSlot(u32),
}

impl Compiler<'_, '_> {
    /// Converts a [`BranchTarget`] into a storage under the current frame
    /// size.
    pub(crate) fn target_storage(&self, target: BranchTarget, ty: MachineType) -> VariableStorage {
        match target {
            BranchTarget::Reg(reg) => VariableStorage::reg(ty, reg),
            BranchTarget::Frame(pos) => {
                VariableStorage::stack(ty, self.info.sp_offset_of_frame_pos(pos))
            }
            BranchTarget::RetSlot(offset) => VariableStorage::stack(
                ty,
                self.info.fnc.stack_frame_size as i32
                    + 8
                    + self.info.fnc.param_width as i32
                    + offset as i32,
            ),
        }
    }

    /// Returns `true` if overwriting `elem` cannot destroy any other live
    /// value: it is a reserved scratch register no stack element refers
    /// to.
    pub(crate) fn is_writable_scratch(&self, elem: &StackElement) -> bool {
        match elem.kind {
            ElemKind::Scratch { reg, .. } => {
                WasmAbi::is_res_scratch(self.config.bounds_checks, reg)
                    && self.info.reg_unreferenced(reg)
            }
            _ => false,
        }
    }

    /// Obtains a scratch register of the requested type.
    ///
    /// Prefers an empty register from the reserved scratch pool; when all
    /// are occupied (and `must_be_empty` is false) the least-referenced
    /// tenant is spilled. Registers in `prot` and globals-bound registers
    /// are never returned.
    pub(crate) fn req_scratch_reg(
        &mut self,
        ty: MachineType,
        prot: RegMask,
        must_be_empty: bool,
        preserve_flags: bool,
    ) -> Result<Reg, Error> {
        let pool = WasmAbi::scratch_pool(self.config.bounds_checks, ty);
        let usable = |compiler: &Self, reg: Reg| {
            !prot.contains(reg) && !compiler.info.global_regs.contains(reg)
        };
        for &reg in pool {
            if usable(self, reg) && self.info.reg_unreferenced(reg) {
                return Ok(reg);
            }
        }
        debug_assert!(!must_be_empty, "no empty scratch register available");
        let victim = pool
            .iter()
            .copied()
            .filter(|&reg| usable(self, reg))
            .min_by_key(|&reg| self.info.reg_use_count(&self.stack, reg))
            .expect("protection mask excludes every scratch register");
        log::trace!("spilling scratch {victim:?} to free a register");
        self.spill_reg(victim, prot, false, preserve_flags)?;
        Ok(victim)
    }

    /// Returns the register behind `hint` if it can serve as a result
    /// target for type `ty`.
    pub(crate) fn hint_reg_if_suitable(
        &self,
        hint: Option<&StackElement>,
        ty: MachineType,
        prot: RegMask,
    ) -> Option<Reg> {
        let reg = hint?.scratch_reg()?;
        let suitable = reg.holds(ty)
            && WasmAbi::is_res_scratch(self.config.bounds_checks, reg)
            && !prot.contains(reg)
            && !self.info.global_regs.contains(reg)
            && self.info.reg_unreferenced(reg);
        suitable.then_some(reg)
    }

    /// Ensures `elem` lives in a register, lifting it if necessary.
    ///
    /// If `writable` is requested the register must additionally be safe
    /// to overwrite. `elem` is rewritten in place to its new storage; the
    /// caller owns the element (popped from the stack), so no reference
    /// chain updates happen here.
    pub(crate) fn lift_to_reg(
        &mut self,
        elem: &mut StackElement,
        writable: bool,
        hint: Option<&StackElement>,
        prot: RegMask,
        preserve_flags: bool,
    ) -> Result<Reg, Error> {
        let ty = elem.ty().expect("lift of a non-value element");
        if let Some(reg) = self.info.reg_of(elem) {
            // A value already sitting in a protected register must still
            // be relocated: protection means the register is about to be
            // repurposed by the caller.
            let overwrite_safe = WasmAbi::is_res_scratch(self.config.bounds_checks, reg)
                && self.info.reg_unreferenced(reg)
                && !self.info.global_regs.contains(reg)
                && !prot.contains(reg);
            if (!writable && !prot.contains(reg)) || overwrite_safe {
                return Ok(reg);
            }
        }
        let source = self.info.storage_of(elem);
        let prot = prot | self.info.mask_for_elem(Some(elem));
        let target = match self.hint_reg_if_suitable(hint, ty, prot) {
            Some(reg) => reg,
            None => self.req_scratch_reg(ty, prot, false, preserve_flags)?,
        };
        self.emit_move(VariableStorage::reg(ty, target), source, preserve_flags)?;
        elem.kind = ElemKind::Scratch { ty, reg: target };
        Ok(target)
    }

    /// Allocates a fresh 8-byte spill slot and grows the physical frame
    /// when the high-water mark passes it.
    pub(crate) fn alloc_spill_slot(&mut self, preserve_flags: bool) -> Result<u32, Error> {
        let pos = self.info.alloc_frame_pos(8)?;
        if self.info.fnc.frame_used > self.info.fnc.stack_frame_size {
            // Grow in 32-byte steps so bursts of spills settle quickly.
            let growth =
                (self.info.fnc.frame_used - self.info.fnc.stack_frame_size).next_multiple_of(32);
            let new_size = self.info.fnc.stack_frame_size + growth;
            self.adjust_sp(new_size, preserve_flags)?;
            self.info.fnc.stack_frame_size = new_size;
        }
        Ok(pos)
    }

    /// Chooses a relocation target for a value being evicted: another
    /// empty scratch register, or a fresh frame slot when none is free or
    /// `force_to_stack` is set.
    pub(crate) fn req_spill_target(
        &mut self,
        ty: MachineType,
        prot: RegMask,
        force_to_stack: bool,
        preserve_flags: bool,
    ) -> Result<VariableStorage, Error> {
        if !force_to_stack {
            let pool = WasmAbi::scratch_pool(self.config.bounds_checks, ty);
            for &reg in pool {
                if !prot.contains(reg)
                    && !self.info.global_regs.contains(reg)
                    && self.info.reg_unreferenced(reg)
                {
                    return Ok(VariableStorage::reg(ty, reg));
                }
            }
        }
        let pos = self.alloc_spill_slot(preserve_flags)?;
        Ok(VariableStorage::stack(ty, self.info.sp_offset_of_frame_pos(pos)))
    }

    /// Relocates the value currently in `reg` and rewrites every stack
    /// element that referred to it.
    pub(crate) fn spill_reg(
        &mut self,
        reg: Reg,
        prot: RegMask,
        force_to_stack: bool,
        preserve_flags: bool,
    ) -> Result<(), Error> {
        if self.info.reg_unreferenced(reg) {
            return Ok(());
        }
        // Move the full register payload; the chain elements keep their
        // own narrower types at the new location.
        let ty = if reg.is_gpr() {
            MachineType::I64
        } else {
            MachineType::F64
        };
        let target =
            self.req_spill_target(ty, prot | RegMask::of(reg), force_to_stack, preserve_flags)?;
        self.emit_move(target, VariableStorage::reg(ty, reg), preserve_flags)?;
        self.info.rewrite_references(&mut self.stack, reg, target);
        Ok(())
    }

    /// Spills every register referenced from the operand stack to a frame
    /// slot: scratch registers, register-homed locals and register-bound
    /// globals alike.
    ///
    /// Called when a block is entered so code inside the block can freely
    /// reuse any register without invalidating values produced outside,
    /// and before calls.
    pub(crate) fn spill_all_variables(&mut self) -> Result<(), Error> {
        for index in 0..self.info.ref_map.len() {
            if let Some(at) = self.info.ref_map[index] {
                let reg = self
                    .info
                    .reg_of(self.stack.get(at))
                    .expect("reference map entries point at register elements");
                self.spill_reg(reg, RegMask::none(), true, false)?;
            }
        }
        Ok(())
    }

    /// Materializes a pending comparison on top of the stack into a
    /// register via `SETcc`, if one exists.
    ///
    /// Every opcode that is not a fusion consumer must call this before
    /// touching the stack, keeping the invariant that at most one pending
    /// comparison exists and only as the top element.
    pub(crate) fn materialize_pending_cmp(&mut self) -> Result<(), Error> {
        let Some(top) = self.stack.last() else {
            return Ok(());
        };
        let ElemKind::PendingCmp { cond } = self.stack.get(top).kind else {
            return Ok(());
        };
        self.info.pop_unlinked(&mut self.stack);
        let result = self.emit_cmp_result(cond, None)?;
        self.info.last_bc = None;
        self.info.push_linked(&mut self.stack, result)?;
        Ok(())
    }

    /// Moves the top `targets.len()` stack values into their branch
    /// targets, bottom value first.
    ///
    /// With `keep` the values stay on the stack (conditional branches fall
    /// through with the operand stack intact); otherwise they are popped.
    /// All emitted code is flag-safe when `preserve_flags` is set.
    pub(crate) fn load_branch_values(
        &mut self,
        targets: &[(BranchTarget, MachineType)],
        preserve_flags: bool,
        keep: bool,
    ) -> Result<(), Error> {
        let n = targets.len();
        if n == 0 {
            return Ok(());
        }
        let refs: Vec<ElemRef> = (0..n)
            .map(|i| {
                self.stack
                    .nth_from_top((n - 1 - i) as u32)
                    .expect("validated input provides the branch values")
            })
            .collect();

        // Evict foreign tenants of target registers: any stack element in
        // a target register that is not the value assigned to it would be
        // destroyed by the moves below.
        for (i, &(target, _)) in targets.iter().enumerate() {
            let BranchTarget::Reg(reg) = target else {
                continue;
            };
            let mut conflict = false;
            let mut walk = self.info.ref_map[reg as usize & 31];
            while let Some(at) = walk {
                if refs
                    .iter()
                    .position(|&candidate| candidate == at)
                    .is_none_or(|pos| pos != i)
                {
                    conflict = true;
                    break;
                }
                walk = self.stack.get(at).prev_occ;
            }
            if conflict {
                self.spill_reg(reg, RegMask::none(), true, preserve_flags)?;
            }
        }

        // Registers already loaded below carry values nothing references;
        // protect them from being grabbed as scratch by later moves.
        let mut loaded = RegMask::none();
        for &(target, _) in targets {
            if let BranchTarget::Reg(reg) = target {
                loaded.insert(reg);
            }
        }
        for (i, &at) in refs.iter().enumerate() {
            let (target, ty) = targets[i];
            let dst = self.target_storage(target, ty);
            let src = self.info.storage_of(self.stack.get(at));
            if !src.in_same_location(&dst) {
                self.emit_move_prot(dst, src, loaded, preserve_flags)?;
            }
        }
        if !keep {
            for _ in 0..n {
                self.info.pop_unlinked(&mut self.stack);
            }
        }
        Ok(())
    }

    /// Computes the return-value convention for a result list: up to two
    /// values per register class, the rest in consecutive 8-byte slots.
    ///
    /// `slot` maps the running byte offset of an overflow value to its
    /// [`BranchTarget`]; blocks reserve frame slots, calls and returns use
    /// the stack return area.
    pub(crate) fn result_convention(
        results: &[MachineType],
        mut slot: impl FnMut(u32) -> BranchTarget,
    ) -> Vec<(BranchTarget, MachineType)> {
        let mut gpr_used = 0;
        let mut fpr_used = 0;
        let mut stack_off = 0;
        results
            .iter()
            .map(|&ty| {
                let target = if ty.is_int() && gpr_used < WasmAbi::GP_RET_REGS.len() {
                    gpr_used += 1;
                    BranchTarget::Reg(WasmAbi::GP_RET_REGS[gpr_used - 1])
                } else if ty.is_float() && fpr_used < WasmAbi::FP_RET_REGS.len() {
                    fpr_used += 1;
                    BranchTarget::Reg(WasmAbi::FP_RET_REGS[fpr_used - 1])
                } else {
                    stack_off += 8;
                    slot(stack_off - 8)
                };
                (target, ty)
            })
            .collect()
    }

    /// Byte width of the stack return area of a signature.
    pub(crate) fn stack_return_width(results: &[MachineType]) -> u32 {
        let mut gpr_used = 0;
        let mut fpr_used = 0;
        let mut width = 0;
        for ty in results {
            if ty.is_int() && gpr_used < WasmAbi::GP_RET_REGS.len() {
                gpr_used += 1;
            } else if ty.is_float() && fpr_used < WasmAbi::FP_RET_REGS.len() {
                fpr_used += 1;
            } else {
                width += 8;
            }
        }
        width
    }

    /// Saves every register-homed local whose home is in `clobbered` to
    /// its frame save slot, returning the list for the post-call restore.
    pub(crate) fn save_locals_for_call(
        &mut self,
        clobbered: RegMask,
    ) -> Result<Vec<(Reg, u32)>, Error> {
        let mut saved = Vec::new();
        for local in 0..self.info.fnc.local_defs.len() {
            let def = self.info.fnc.local_defs[local];
            let LocalStorage::Reg(reg) = def.storage else {
                continue;
            };
            if !clobbered.contains(reg) {
                continue;
            }
            let save_pos = def
                .save_pos
                .expect("register-homed locals always carry a save slot");
            let ty = if reg.is_gpr() {
                MachineType::I64
            } else {
                MachineType::F64
            };
            self.emit_move(
                VariableStorage::stack(ty, self.info.sp_offset_of_frame_pos(save_pos)),
                VariableStorage::reg(ty, reg),
                false,
            )?;
            saved.push((reg, save_pos));
        }
        Ok(saved)
    }

    /// Reloads the locals saved by [`save_locals_for_call`].
    ///
    /// [`save_locals_for_call`]: Self::save_locals_for_call
    pub(crate) fn restore_locals_after_call(
        &mut self,
        saved: &[(Reg, u32)],
    ) -> Result<(), Error> {
        for &(reg, save_pos) in saved {
            let ty = if reg.is_gpr() {
                MachineType::I64
            } else {
                MachineType::F64
            };
            self.emit_move(
                VariableStorage::reg(ty, reg),
                VariableStorage::stack(ty, self.info.sp_offset_of_frame_pos(save_pos)),
                false,
            )?;
        }
        Ok(())
    }

    /// Writes every register-bound global back to its link-data slot.
    /// Required before native calls, which may observe globals.
    pub(crate) fn move_globals_to_linkdata(&mut self) -> Result<(), Error> {
        for index in 0..self.info.global_storage.len() {
            if let GlobalStorage::Reg(reg) = self.info.global_storage[index] {
                let ty = self.info.global_types[index];
                self.emit_move(
                    VariableStorage::link_data(ty, self.layout.global_offset(index as u32)),
                    VariableStorage::reg(ty, reg),
                    false,
                )?;
            }
        }
        Ok(())
    }

    /// Reloads every register-bound global from link data. Required after
    /// native calls, which may have written globals.
    pub(crate) fn recover_globals_to_regs(&mut self) -> Result<(), Error> {
        for index in 0..self.info.global_storage.len() {
            if let GlobalStorage::Reg(reg) = self.info.global_storage[index] {
                let ty = self.info.global_types[index];
                self.emit_move(
                    VariableStorage::reg(ty, reg),
                    VariableStorage::link_data(ty, self.layout.global_offset(index as u32)),
                    false,
                )?;
            }
        }
        Ok(())
    }
}
