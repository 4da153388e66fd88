//! The per-function driver: feeds validated operators into the backend,
//! maintains the operand stack and the control frame stack, and owns the
//! structured control flow semantics.

use super::{
    common::BranchTarget,
    elem::{CtrlKind, ElemKind, ElemRef, StackElement},
    labels::LabelRef,
    module_info::{GlobalStorage, LocalStorage, NUM_DIRECT_LOCALS},
    storage::VariableStorage,
    Compiler,
};
use crate::{
    isa::{
        x86_64::{backend, encoding as enc, regs::RegMask, relpatch::RelPatchObj},
        BranchCond,
    },
    Error, LimitKind, TrapCode, UnsupportedKind,
};
use wasp_core::MachineType;
use wasmparser::{BlockType, FunctionBody, Operator, ValType};

/// One structured control flow construct in flight.
#[derive(Debug)]
pub(crate) struct CtrlFrame {
    pub kind: CtrlKind,
    pub params: Vec<MachineType>,
    pub results: Vec<MachineType>,
    /// Physical frame size on entry; reinstated at the end of the block.
    pub entry_frame_size: u32,
    /// Frame allocation high-water mark on entry.
    pub entry_frame_used: u32,
    /// Branch destination for everything but loops.
    pub end_label: LabelRef,
    /// Branch destination for loops: the position of the loop head.
    pub loop_head: u32,
    /// Pending conditional branch of an `if`, landing on `else` or `end`.
    pub else_patches: Vec<RelPatchObj>,
    /// Where branch values go: the result convention for blocks and ifs,
    /// the materialized parameter slots for loops.
    pub branch_targets: Vec<(BranchTarget, MachineType)>,
    /// Parameter elements at entry, for restoring the `else` arm.
    pub param_elems: Vec<StackElement>,
    /// The control marker on the operand stack, if this frame was entered
    /// in reachable code.
    pub marker: Option<ElemRef>,
    pub entry_reachable: bool,
    /// Whether any branch targets this frame.
    pub branched_to: bool,
}

impl Compiler<'_, '_> {
    /// Compiles one function body.
    pub(crate) fn compile_function(
        &mut self,
        func_index: u32,
        body: &FunctionBody<'_>,
    ) -> Result<(), Error> {
        log::trace!("compiling function {func_index}");
        self.info.reset_function();
        self.stack.reset();
        self.ctrl.clear();
        self.reachable = true;
        self.info.fnc.index = func_index;
        let sig_index = self.meta.functions[func_index as usize].sig_index;
        self.info.fnc.sig_index = sig_index;

        let sig = self.meta.signatures[sig_index as usize].clone();
        for &ty in &sig.params {
            self.allocate_local(ty, true)?;
        }
        let mut locals = body.get_locals_reader()?;
        for _ in 0..locals.get_count() {
            let (count, ty) = locals.read()?;
            let ty = local_type(ty)?;
            for _ in 0..count {
                self.allocate_local(ty, false)?;
            }
        }
        if self.info.fnc.num_locals > NUM_DIRECT_LOCALS {
            return Err(Error::ImplementationLimit(LimitKind::TooManyLocals));
        }

        self.entered_function()?;

        // The implicit function-level frame: its end is the epilogue.
        let end_label = self.labels.new_label();
        let branch_targets = Self::result_convention(&sig.results, BranchTarget::RetSlot);
        self.ctrl.push(CtrlFrame {
            kind: CtrlKind::Block,
            params: Vec::new(),
            results: sig.results.clone(),
            entry_frame_size: self.info.fnc.stack_frame_size,
            entry_frame_used: self.info.fnc.frame_used,
            end_label,
            loop_head: 0,
            else_patches: Vec::new(),
            branch_targets,
            param_elems: Vec::new(),
            marker: None,
            entry_reachable: true,
            branched_to: false,
        });

        let base_offset = body.get_operators_reader()?.original_position();
        let mut reader = body.get_operators_reader()?;
        while !reader.eof() {
            self.info.bytecode_pos = (reader.original_position() - base_offset) as u32;
            let op = reader.read()?;
            self.visit_operator(&op)?;
        }
        debug_assert!(self.ctrl.is_empty(), "unbalanced control frames");
        Ok(())
    }

    // --- small operand-stack helpers -------------------------------------

    fn pop1(&mut self) -> StackElement {
        self.info.pop_unlinked(&mut self.stack)
    }

    fn pop2(&mut self) -> (StackElement, StackElement) {
        let rhs = self.pop1();
        let lhs = self.pop1();
        (lhs, rhs)
    }

    fn push(&mut self, elem: StackElement) -> Result<(), Error> {
        self.info.push_linked(&mut self.stack, elem)?;
        Ok(())
    }

    /// Pops the branch/select condition: consumes a pending comparison
    /// directly, or compares an ordinary value against zero.
    fn pop_condition(&mut self) -> Result<BranchCond, Error> {
        if let Some(top) = self.stack.last() {
            if let ElemKind::PendingCmp { cond } = self.stack.get(top).kind {
                self.info.pop_unlinked(&mut self.stack);
                self.info.last_bc = None;
                return Ok(cond);
            }
        }
        let value = self.pop1();
        let ty = value.ty().expect("condition is a value");
        let zero = StackElement::constant(ty, 0);
        self.emit_comparison(ty, BranchCond::Truthy, &value, &zero)
    }

    fn do_binop(&mut self, table: &[enc::AbstrInstr]) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let (lhs, rhs) = self.pop2();
        let result = self.emit_binop(table, &lhs, &rhs, None)?;
        self.push(result)
    }

    fn do_unop(&mut self, table: &[enc::AbstrInstr]) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let arg = self.pop1();
        let result = self.emit_unop(table, &arg, None)?;
        self.push(result)
    }

    fn do_shift(
        &mut self,
        c1: enc::AbstrInstr,
        imm8: enc::AbstrInstr,
        by_cl: enc::AbstrInstr,
    ) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let (value, count) = self.pop2();
        let result = self.emit_shift(c1, imm8, by_cl, value, count, None)?;
        self.push(result)
    }

    fn do_div_rem(&mut self, ty: MachineType, signed: bool, rem: bool) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let (lhs, rhs) = self.pop2();
        let result = self.emit_div_rem(ty, signed, rem, lhs, rhs)?;
        self.push(result)
    }

    fn do_compare(&mut self, ty: MachineType, cond: BranchCond) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let (lhs, rhs) = self.pop2();
        let cond = self.emit_comparison(ty, cond, &lhs, &rhs)?;
        self.push(StackElement::new(ElemKind::PendingCmp { cond }))
    }

    fn do_eqz(&mut self, ty: MachineType) -> Result<(), Error> {
        // Fusion: negating a pending comparison emits no code at all.
        if let Some(top) = self.stack.last() {
            if let ElemKind::PendingCmp { cond } = self.stack.get(top).kind {
                let negated = cond.negate();
                self.stack.get_mut(top).kind = ElemKind::PendingCmp { cond: negated };
                self.info.last_bc = Some(negated);
                return Ok(());
            }
        }
        let value = self.pop1();
        let zero = StackElement::constant(ty, 0);
        let cond = self.emit_comparison(ty, BranchCond::Eq, &value, &zero)?;
        self.push(StackElement::new(ElemKind::PendingCmp { cond }))
    }

    fn do_load(&mut self, ty: MachineType, width: u32, sign: bool, offset: u64) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let addr = self.pop1();
        let result = self.emit_memory_load(ty, width, sign, offset, addr)?;
        self.push(result)
    }

    fn do_store(&mut self, width: u32, offset: u64) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let (addr, value) = self.pop2();
        self.emit_memory_store(width, offset, addr, value)
    }

    fn do_trunc(&mut self, src: MachineType, dst: MachineType, signed: bool) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let arg = self.pop1();
        let result = self.emit_float_trunc(src, dst, signed, arg)?;
        self.push(result)
    }

    fn do_convert(&mut self, src: MachineType, dst: MachineType, signed: bool) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let arg = self.pop1();
        let result = self.emit_int_to_float(src, dst, signed, arg, None)?;
        self.push(result)
    }

    /// Narrows an `i64` element to its low 32 bits without moving it when
    /// the storage allows.
    fn do_wrap(&mut self) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let mut value = self.pop1();
        match value.kind {
            ElemKind::Constant { bits, .. } => {
                value.kind = ElemKind::Constant {
                    ty: MachineType::I32,
                    bits: bits & 0xFFFF_FFFF,
                };
            }
            ElemKind::Scratch { .. } | ElemKind::Temp { .. } => value.retype(MachineType::I32),
            _ => {
                // Locals and globals are shared storage; narrow a copy.
                let reg = self.lift_to_reg(&mut value, true, None, RegMask::none(), false)?;
                value = StackElement::scratch(MachineType::I64, reg);
                value.retype(MachineType::I32);
            }
        }
        self.push(value)
    }

    /// Reinterprets the low 32 bits of an `i64` element as `i32` for the
    /// 32-to-64 sign extension, which encodes its source as 32-bit.
    fn do_extend32_s(&mut self) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let mut value = self.pop1();
        match value.kind {
            ElemKind::Constant { .. } | ElemKind::Scratch { .. } | ElemKind::Temp { .. } => {
                value.retype(MachineType::I32)
            }
            _ => {
                let reg = self.lift_to_reg(&mut value, true, None, RegMask::none(), false)?;
                value = StackElement::scratch(MachineType::I32, reg);
            }
        }
        let result = self.emit_unop(&[enc::MOVSXD_R64_RM32], &value, None)?;
        self.push(result)
    }

    /// Zero-extension from `i32` is a plain 32-bit move retyped to 64.
    fn do_extend32_u(&mut self) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let arg = self.pop1();
        let mut result = self.emit_unop(&[enc::MOV_R32_RM32], &arg, None)?;
        result.retype(MachineType::I64);
        self.push(result)
    }

    // --- structured control flow -----------------------------------------

    fn blocktype_sig(&self, blockty: BlockType) -> Result<(Vec<MachineType>, Vec<MachineType>), Error> {
        match blockty {
            BlockType::Empty => Ok((Vec::new(), Vec::new())),
            BlockType::Type(ty) => Ok((Vec::new(), vec![local_type(ty)?])),
            BlockType::FuncType(index) => {
                let sig = &self.meta.signatures[index as usize];
                Ok((sig.params.clone(), sig.results.clone()))
            }
        }
    }

    /// Computes the result targets of a block: return-convention registers
    /// plus freshly reserved frame slots for the overflow.
    fn block_result_targets(
        &mut self,
        results: &[MachineType],
    ) -> Result<Vec<(BranchTarget, MachineType)>, Error> {
        let mut slots = Vec::new();
        for _ in 0..Self::stack_return_width(results) / 8 {
            slots.push(self.alloc_spill_slot(false)?);
        }
        let mut next = 0;
        Ok(Self::result_convention(results, |_| {
            let pos = slots[next];
            next += 1;
            BranchTarget::Frame(pos)
        }))
    }

    /// Inserts the control marker below the `n` parameter elements.
    fn insert_marker(&mut self, kind: CtrlKind, n: usize) -> Result<ElemRef, Error> {
        let marker = StackElement::new(ElemKind::Ctrl {
            kind,
            index: self.ctrl.len() as u32,
        });
        if n == 0 {
            return self.stack.push(marker);
        }
        let below = self
            .stack
            .nth_from_top(n as u32 - 1)
            .expect("validated blocks have their parameters");
        self.stack.insert_before(below, marker)
    }

    /// Collects the parameter elements above the marker, bottom first.
    fn collect_params(&self, n: usize) -> Vec<StackElement> {
        (0..n)
            .map(|i| {
                let at = self
                    .stack
                    .nth_from_top((n - 1 - i) as u32)
                    .expect("validated blocks have their parameters");
                *self.stack.get(at)
            })
            .collect()
    }

    /// Ensures every block parameter sits in a stable frame slot, so
    /// loop back-edges have fixed move targets.
    fn materialize_params_to_slots(&mut self, n: usize) -> Result<(), Error> {
        for i in 0..n {
            let at = self
                .stack
                .nth_from_top((n - 1 - i) as u32)
                .expect("validated blocks have their parameters");
            let elem = *self.stack.get(at);
            if matches!(elem.kind, ElemKind::Temp { .. }) {
                continue;
            }
            let ty = elem.ty().expect("block parameters are values");
            let pos = self.alloc_spill_slot(false)?;
            let dst = VariableStorage::stack(ty, self.info.sp_offset_of_frame_pos(pos));
            let src = self.info.storage_of(&elem);
            self.emit_move(dst, src, false)?;
            self.info.unlink(&mut self.stack, at);
            self.stack.get_mut(at).kind = ElemKind::Temp { ty, pos };
        }
        Ok(())
    }

    fn visit_block(&mut self, blockty: BlockType, kind: CtrlKind) -> Result<(), Error> {
        let (params, results) = self.blocktype_sig(blockty)?;
        if !self.reachable {
            self.push_dead_frame(kind, params, results);
            return Ok(());
        }
        self.materialize_pending_cmp()?;
        self.spill_all_variables()?;
        let end_label = self.labels.new_label();

        let (branch_targets, loop_head) = if kind == CtrlKind::Loop {
            self.materialize_params_to_slots(params.len())?;
            let targets = self
                .collect_params(params.len())
                .iter()
                .map(|elem| match elem.kind {
                    ElemKind::Temp { ty, pos } => (BranchTarget::Frame(pos), ty),
                    _ => unreachable!("loop parameters were materialized"),
                })
                .collect();
            if self.config.interruption_checks {
                self.emit_interruption_check()?;
            }
            (targets, self.out.pos())
        } else {
            (self.block_result_targets(&results)?, 0)
        };

        let param_elems = self.collect_params(params.len());
        let marker = self.insert_marker(kind, params.len())?;
        self.ctrl.push(CtrlFrame {
            kind,
            params,
            results,
            entry_frame_size: self.info.fnc.stack_frame_size,
            entry_frame_used: self.info.fnc.frame_used,
            end_label,
            loop_head,
            else_patches: Vec::new(),
            branch_targets,
            param_elems,
            marker: Some(marker),
            entry_reachable: true,
            branched_to: false,
        });
        Ok(())
    }

    fn push_dead_frame(
        &mut self,
        kind: CtrlKind,
        params: Vec<MachineType>,
        results: Vec<MachineType>,
    ) {
        let end_label = self.labels.new_label();
        self.ctrl.push(CtrlFrame {
            kind,
            params,
            results,
            entry_frame_size: self.info.fnc.stack_frame_size,
            entry_frame_used: self.info.fnc.frame_used,
            end_label,
            loop_head: 0,
            else_patches: Vec::new(),
            branch_targets: Vec::new(),
            param_elems: Vec::new(),
            marker: None,
            entry_reachable: false,
            branched_to: false,
        });
    }

    fn visit_if(&mut self, blockty: BlockType) -> Result<(), Error> {
        if !self.reachable {
            let (params, results) = self.blocktype_sig(blockty)?;
            self.push_dead_frame(CtrlKind::If, params, results);
            return Ok(());
        }
        let cond = self.pop_condition()?;
        let (params, results) = self.blocktype_sig(blockty)?;
        // Spills and parameter moves below must not disturb the live
        // condition flags.
        self.spill_all_flag_safe()?;
        let end_label = self.labels.new_label();
        let branch_targets = self.block_result_targets_flag_safe(&results)?;
        if params == results && !params.is_empty() {
            // An if without else falls through to end with its params as
            // results; place them before the conditional branch.
            self.load_branch_values(&branch_targets, true, true)?;
        }
        let param_elems = self.collect_params(params.len());
        let marker = self.insert_marker(CtrlKind::If, params.len())?;
        let else_patches = self.emit_branch_cc(cond.negate())?;
        self.ctrl.push(CtrlFrame {
            kind: CtrlKind::If,
            params,
            results,
            entry_frame_size: self.info.fnc.stack_frame_size,
            entry_frame_used: self.info.fnc.frame_used,
            end_label,
            loop_head: 0,
            else_patches,
            branch_targets,
            param_elems,
            marker: Some(marker),
            entry_reachable: true,
            branched_to: false,
        });
        Ok(())
    }

    /// A flag-preserving spill-all used on the `if` path.
    fn spill_all_flag_safe(&mut self) -> Result<(), Error> {
        for index in 0..self.info.ref_map.len() {
            if let Some(at) = self.info.ref_map[index] {
                let reg = self
                    .info
                    .reg_of(self.stack.get(at))
                    .expect("reference map entries point at register elements");
                self.spill_reg(reg, RegMask::none(), true, true)?;
            }
        }
        Ok(())
    }

    fn block_result_targets_flag_safe(
        &mut self,
        results: &[MachineType],
    ) -> Result<Vec<(BranchTarget, MachineType)>, Error> {
        let mut slots = Vec::new();
        for _ in 0..Self::stack_return_width(results) / 8 {
            let pos = self.info.alloc_frame_pos(8)?;
            if self.info.fnc.frame_used > self.info.fnc.stack_frame_size {
                let growth = (self.info.fnc.frame_used - self.info.fnc.stack_frame_size)
                    .next_multiple_of(32);
                let new_size = self.info.fnc.stack_frame_size + growth;
                self.adjust_sp(new_size, true)?;
                self.info.fnc.stack_frame_size = new_size;
            }
            slots.push(pos);
        }
        let mut next = 0;
        Ok(Self::result_convention(results, |_| {
            let pos = slots[next];
            next += 1;
            BranchTarget::Frame(pos)
        }))
    }

    fn visit_else(&mut self) -> Result<(), Error> {
        let mut frame = self.ctrl.pop().expect("validated else has its if");
        debug_assert_eq!(frame.kind, CtrlKind::If);
        if self.reachable {
            // Finish the then arm: results to their targets, frame back
            // to the entry size, jump over the else arm.
            let targets = frame.branch_targets.clone();
            self.load_branch_values(&targets, false, false)?;
            self.adjust_sp(frame.entry_frame_size, false)?;
            let jump = self.prepare_jmp(false, None)?;
            self.labels.add_user(frame.end_label, jump, &mut self.out)?;
        }
        if let Some(marker) = frame.marker {
            self.truncate_to_marker(marker);
        }
        // The else arm starts in the entry state.
        self.info.fnc.stack_frame_size = frame.entry_frame_size;
        self.info.fnc.frame_used = frame.entry_frame_used;
        for patch in core::mem::take(&mut frame.else_patches) {
            patch.link_to_here(&mut self.out)?;
        }
        if frame.entry_reachable {
            for elem in frame.param_elems.clone() {
                self.push(elem)?;
            }
        }
        self.reachable = frame.entry_reachable;
        frame.kind = CtrlKind::Else;
        self.ctrl.push(frame);
        Ok(())
    }

    /// Pops everything above (and including consumed values up to) the
    /// marker, then removes the marker itself.
    fn truncate_to_marker(&mut self, marker: ElemRef) {
        loop {
            let top = self.stack.last().expect("marker is still on the stack");
            if top == marker {
                self.stack.erase(marker);
                return;
            }
            self.info.pop_unlinked(&mut self.stack);
        }
    }

    fn visit_end(&mut self) -> Result<(), Error> {
        let frame = self.ctrl.pop().expect("validated end has its frame");
        let is_func_end = self.ctrl.is_empty();

        if !frame.entry_reachable {
            debug_assert!(!is_func_end);
            self.info.fnc.stack_frame_size = frame.entry_frame_size;
            self.info.fnc.frame_used = frame.entry_frame_used;
            self.reachable = false;
            return Ok(());
        }

        if self.reachable {
            let targets = frame.branch_targets.clone();
            if frame.kind != CtrlKind::Loop {
                self.load_branch_values(&targets, false, false)?;
            } else {
                // Loop fallthrough: results stay where they are; the
                // loop's branch targets are its parameters.
                let results = frame.results.clone();
                let result_targets = self.block_result_targets(&results)?;
                self.load_branch_values(&result_targets, false, false)?;
                self.adjust_sp(frame.entry_frame_size, false)?;
                self.labels.pin(frame.end_label, &mut self.out)?;
                if let Some(marker) = frame.marker {
                    self.truncate_to_marker(marker);
                }
                self.info.fnc.stack_frame_size = frame.entry_frame_size;
                self.info.fnc.frame_used = frame.entry_frame_used;
                self.push_block_results(&result_targets)?;
                self.reachable = true;
                debug_assert!(!is_func_end);
                return Ok(());
            }
            self.adjust_sp(frame.entry_frame_size, false)?;
        }

        // An if without an else: the false path lands here.
        for patch in &frame.else_patches {
            patch.link_to_here(&mut self.out)?;
        }
        self.labels.pin(frame.end_label, &mut self.out)?;

        if let Some(marker) = frame.marker {
            self.truncate_to_marker(marker);
        }
        self.info.fnc.stack_frame_size = frame.entry_frame_size;
        self.info.fnc.frame_used = frame.entry_frame_used;

        let may_fall_through = self.reachable
            || frame.branched_to
            || (frame.kind == CtrlKind::If && frame.entry_reachable);

        if is_func_end {
            self.emit_return_and_unwind(false)?;
            self.reachable = false;
            return Ok(());
        }

        if may_fall_through {
            self.push_block_results(&frame.branch_targets)?;
        }
        self.reachable = may_fall_through;
        Ok(())
    }

    fn push_block_results(
        &mut self,
        targets: &[(BranchTarget, MachineType)],
    ) -> Result<(), Error> {
        for &(target, ty) in targets {
            let elem = match target {
                BranchTarget::Reg(reg) => StackElement::scratch(ty, reg),
                BranchTarget::Frame(pos) => StackElement::temp(ty, pos),
                BranchTarget::RetSlot(_) => unreachable!("blocks use frame slots"),
            };
            self.push(elem)?;
        }
        Ok(())
    }

    fn branch_arity(frame: &CtrlFrame) -> usize {
        if frame.kind == CtrlKind::Loop {
            frame.params.len()
        } else {
            frame.results.len()
        }
    }

    /// Emits the value moves, frame unification and jump of a taken
    /// branch to `depth`.
    fn emit_taken_branch(&mut self, depth: u32) -> Result<(), Error> {
        let index = self.ctrl.len() - 1 - depth as usize;
        let targets = self.ctrl[index].branch_targets.clone();
        let entry_size = self.ctrl[index].entry_frame_size;
        self.load_branch_values(&targets, false, true)?;
        let current = self.info.fnc.stack_frame_size;
        if current != entry_size {
            self.adjust_sp_from(current, entry_size, false)?;
        }
        let jump = self.prepare_jmp(false, None)?;
        let frame = &mut self.ctrl[index];
        frame.branched_to = true;
        if frame.kind == CtrlKind::Loop {
            let loop_head = frame.loop_head;
            jump.link_to_binary_pos(&mut self.out, loop_head)
        } else {
            let label = frame.end_label;
            self.labels.add_user(label, jump, &mut self.out)
        }
    }

    fn visit_br(&mut self, depth: u32) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        self.emit_taken_branch(depth)?;
        self.reachable = false;
        Ok(())
    }

    fn visit_br_if(&mut self, depth: u32) -> Result<(), Error> {
        let cond = self.pop_condition()?;
        let index = self.ctrl.len() - 1 - depth as usize;
        let arity = Self::branch_arity(&self.ctrl[index]);
        let needs_unification =
            self.ctrl[index].entry_frame_size != self.info.fnc.stack_frame_size;

        if arity == 0 && !needs_unification {
            // The fused fast path: one comparison, one conditional jump.
            let patches = self.emit_branch_cc(cond)?;
            let frame = &mut self.ctrl[index];
            frame.branched_to = true;
            if frame.kind == CtrlKind::Loop {
                let loop_head = frame.loop_head;
                for patch in patches {
                    patch.link_to_binary_pos(&mut self.out, loop_head)?;
                }
            } else {
                let label = frame.end_label;
                for patch in patches {
                    self.labels.add_user(label, patch, &mut self.out)?;
                }
            }
            return Ok(());
        }

        // Taken path carries value moves and the SP unification; a short
        // inverted conditional skips it on the fallthrough path.
        let skip = self.emit_branch_cc(cond.negate())?;
        self.emit_taken_branch(depth)?;
        for patch in skip {
            patch.link_to_here(&mut self.out)?;
        }
        Ok(())
    }

    fn visit_br_table(&mut self, targets_depths: &[u32], default_depth: u32) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let mut index_elem = self.pop1();
        let index_reg = self.lift_to_reg(&mut index_elem, false, None, RegMask::none(), false)?;
        let base = self.req_scratch_reg(
            MachineType::I64,
            RegMask::of(index_reg),
            false,
            false,
        )?;
        let entry = self.req_scratch_reg(
            MachineType::I64,
            RegMask::of(index_reg) | RegMask::of(base),
            false,
            false,
        )?;

        let count = targets_depths.len() as u32;
        self.instr(&enc::CMP_RM32_IMM32)
            .set_r4rm(index_reg)
            .set_imm32(count)
            .emit(&mut self.out)?;
        let to_default = self.prepare_jmp(false, Some(enc::Cc::Ae))?;

        // lea base, [rip + table]; mov entry32, [base + index*4];
        // add base, entry; jmp base
        let table_lea = self.prepare_pc_rel_lea(base)?;
        self.instr(&enc::MOV_R32_RM32)
            .set_r(entry)
            .set_m4rm_indexed(base, 0, index_reg, 2)
            .emit(&mut self.out)?;
        self.instr(&enc::ADD_R64_RM64)
            .set_r(base)
            .set_r4rm(entry)
            .emit(&mut self.out)?;
        self.instr(&enc::JMP_RM64)
            .set_r4rm(base)
            .emit(&mut self.out)?;

        // The jump table itself: one u32 offset per case, patched as the
        // per-case branch sequences are emitted below.
        self.out.align_to(4)?;
        let table_pos = self.out.pos();
        table_lea.link_to_here(&mut self.out)?;
        self.out.step(4 * count)?;

        for (case, &depth) in targets_depths.iter().enumerate() {
            let seq_pos = self.out.pos();
            self.out
                .patch_bytes_le(table_pos + 4 * case as u32, u64::from(seq_pos - table_pos), 4);
            self.emit_taken_branch(depth)?;
        }
        to_default.link_to_here(&mut self.out)?;
        self.emit_taken_branch(default_depth)?;
        self.reachable = false;
        Ok(())
    }

    fn visit_return(&mut self) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let targets = self.ctrl[0].branch_targets.clone();
        self.load_branch_values(&targets, false, true)?;
        self.emit_return_and_unwind(true)?;
        self.ctrl[0].branched_to = true;
        self.reachable = false;
        Ok(())
    }

    // --- locals and globals ----------------------------------------------

    fn visit_local_get(&mut self, index: u32) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let ty = self.info.fnc.local_defs[index as usize].ty;
        self.push(StackElement::new(ElemKind::Local { ty, index }))
    }

    /// Materializes every stale alias of local `index` before its value
    /// changes.
    fn materialize_local_aliases(&mut self, index: u32) -> Result<(), Error> {
        match self.info.fnc.local_defs[index as usize].storage {
            LocalStorage::Reg(reg) => self.spill_reg(reg, RegMask::none(), true, false),
            LocalStorage::FramePos(_) | LocalStorage::StackParam(_) => {
                // Slot-homed locals are not in any reference chain; scan.
                let aliases: Vec<ElemRef> = self
                    .stack
                    .iter()
                    .filter(|&at| {
                        matches!(
                            self.stack.get(at).kind,
                            ElemKind::Local { index: i, .. } if i == index
                        )
                    })
                    .collect();
                for at in aliases {
                    let elem = *self.stack.get(at);
                    let ty = elem.ty().expect("locals are values");
                    let pos = self.alloc_spill_slot(false)?;
                    let dst = VariableStorage::stack(ty, self.info.sp_offset_of_frame_pos(pos));
                    let src = self.info.storage_of(&elem);
                    self.emit_move(dst, src, false)?;
                    self.stack.get_mut(at).kind = ElemKind::Temp { ty, pos };
                }
                Ok(())
            }
        }
    }

    fn visit_local_set(&mut self, index: u32, tee: bool) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        self.materialize_local_aliases(index)?;
        let value = self.pop1();
        let def = self.info.fnc.local_defs[index as usize];
        let home = self.info.storage_of(&StackElement::new(ElemKind::Local {
            ty: def.ty,
            index,
        }));
        let src = self.info.storage_of(&value);
        self.emit_move(home, src, false)?;
        if tee {
            self.push(StackElement::new(ElemKind::Local { ty: def.ty, index }))?;
        }
        Ok(())
    }

    fn visit_global_get(&mut self, index: u32) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let ty = self.info.global_types[index as usize];
        self.push(StackElement::new(ElemKind::Global { ty, index }))
    }

    fn visit_global_set(&mut self, index: u32) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        match self.info.global_storage[index as usize] {
            GlobalStorage::Reg(reg) => self.spill_reg(reg, RegMask::none(), true, false)?,
            GlobalStorage::LinkData(_) => {
                let aliases: Vec<ElemRef> = self
                    .stack
                    .iter()
                    .filter(|&at| {
                        matches!(
                            self.stack.get(at).kind,
                            ElemKind::Global { index: i, .. } if i == index
                        )
                    })
                    .collect();
                for at in aliases {
                    let elem = *self.stack.get(at);
                    let ty = elem.ty().expect("globals are values");
                    let pos = self.alloc_spill_slot(false)?;
                    let dst = VariableStorage::stack(ty, self.info.sp_offset_of_frame_pos(pos));
                    let src = self.info.storage_of(&elem);
                    self.emit_move(dst, src, false)?;
                    self.stack.get_mut(at).kind = ElemKind::Temp { ty, pos };
                }
            }
        }
        let value = self.pop1();
        let ty = self.info.global_types[index as usize];
        let home = self
            .info
            .storage_of(&StackElement::new(ElemKind::Global { ty, index }));
        let src = self.info.storage_of(&value);
        self.emit_move(home, src, false)
    }

    // --- the dispatch -----------------------------------------------------

    /// Lowers one validated operator.
    pub(crate) fn visit_operator(&mut self, op: &Operator<'_>) -> Result<(), Error> {
        use MachineType::{F32, F64, I32, I64};
        if !self.reachable {
            // Dead code: only the control structure is tracked.
            match op {
                Operator::Block { blockty } | Operator::Loop { blockty } => {
                    let (params, results) = self.blocktype_sig(*blockty)?;
                    self.push_dead_frame(CtrlKind::Block, params, results);
                }
                Operator::If { blockty } => {
                    let (params, results) = self.blocktype_sig(*blockty)?;
                    self.push_dead_frame(CtrlKind::If, params, results);
                }
                Operator::Else => return self.visit_else(),
                Operator::End => return self.visit_end(),
                _ => {}
            }
            return Ok(());
        }

        match *op {
            // control
            Operator::Unreachable => {
                self.materialize_pending_cmp()?;
                self.emit_trap(TrapCode::BuiltinTrap)?;
                self.reachable = false;
            }
            Operator::Nop => {}
            Operator::Block { blockty } => self.visit_block(blockty, CtrlKind::Block)?,
            Operator::Loop { blockty } => self.visit_block(blockty, CtrlKind::Loop)?,
            Operator::If { blockty } => self.visit_if(blockty)?,
            Operator::Else => self.visit_else()?,
            Operator::End => self.visit_end()?,
            Operator::Br { relative_depth } => self.visit_br(relative_depth)?,
            Operator::BrIf { relative_depth } => self.visit_br_if(relative_depth)?,
            Operator::BrTable { ref targets } => {
                let depths: Vec<u32> = targets.targets().collect::<Result<_, _>>()?;
                self.visit_br_table(&depths, targets.default())?;
            }
            Operator::Return => self.visit_return()?,
            Operator::Call { function_index } => {
                self.materialize_pending_cmp()?;
                self.exec_direct_call(function_index)?;
            }
            Operator::CallIndirect { type_index, .. } => {
                self.exec_indirect_call(type_index)?;
            }
            Operator::Drop => {
                if let Some(top) = self.stack.last() {
                    if matches!(self.stack.get(top).kind, ElemKind::PendingCmp { .. }) {
                        self.info.last_bc = None;
                    }
                }
                self.pop1();
            }
            Operator::Select => {
                let cond = self.pop_condition()?;
                let (mut truthy, mut falsy) = self.pop2();
                let result = self.emit_select(&mut truthy, &mut falsy, cond, None)?;
                self.push(result)?;
            }

            // locals, globals
            Operator::LocalGet { local_index } => self.visit_local_get(local_index)?,
            Operator::LocalSet { local_index } => self.visit_local_set(local_index, false)?,
            Operator::LocalTee { local_index } => self.visit_local_set(local_index, true)?,
            Operator::GlobalGet { global_index } => self.visit_global_get(global_index)?,
            Operator::GlobalSet { global_index } => self.visit_global_set(global_index)?,

            // constants
            Operator::I32Const { value } => {
                self.materialize_pending_cmp()?;
                self.push(StackElement::constant(I32, value as u32 as u64))?;
            }
            Operator::I64Const { value } => {
                self.materialize_pending_cmp()?;
                self.push(StackElement::constant(I64, value as u64))?;
            }
            Operator::F32Const { value } => {
                self.materialize_pending_cmp()?;
                self.push(StackElement::constant(F32, u64::from(value.bits())))?;
            }
            Operator::F64Const { value } => {
                self.materialize_pending_cmp()?;
                self.push(StackElement::constant(F64, value.bits()))?;
            }

            // comparisons
            Operator::I32Eqz => self.do_eqz(I32)?,
            Operator::I64Eqz => self.do_eqz(I64)?,
            Operator::I32Eq => self.do_compare(I32, BranchCond::Eq)?,
            Operator::I32Ne => self.do_compare(I32, BranchCond::Ne)?,
            Operator::I32LtS => self.do_compare(I32, BranchCond::LtS)?,
            Operator::I32LtU => self.do_compare(I32, BranchCond::LtU)?,
            Operator::I32GtS => self.do_compare(I32, BranchCond::GtS)?,
            Operator::I32GtU => self.do_compare(I32, BranchCond::GtU)?,
            Operator::I32LeS => self.do_compare(I32, BranchCond::LeS)?,
            Operator::I32LeU => self.do_compare(I32, BranchCond::LeU)?,
            Operator::I32GeS => self.do_compare(I32, BranchCond::GeS)?,
            Operator::I32GeU => self.do_compare(I32, BranchCond::GeU)?,
            Operator::I64Eq => self.do_compare(I64, BranchCond::Eq)?,
            Operator::I64Ne => self.do_compare(I64, BranchCond::Ne)?,
            Operator::I64LtS => self.do_compare(I64, BranchCond::LtS)?,
            Operator::I64LtU => self.do_compare(I64, BranchCond::LtU)?,
            Operator::I64GtS => self.do_compare(I64, BranchCond::GtS)?,
            Operator::I64GtU => self.do_compare(I64, BranchCond::GtU)?,
            Operator::I64LeS => self.do_compare(I64, BranchCond::LeS)?,
            Operator::I64LeU => self.do_compare(I64, BranchCond::LeU)?,
            Operator::I64GeS => self.do_compare(I64, BranchCond::GeS)?,
            Operator::I64GeU => self.do_compare(I64, BranchCond::GeU)?,
            Operator::F32Eq => self.do_compare(F32, BranchCond::FEq)?,
            Operator::F32Ne => self.do_compare(F32, BranchCond::FNe)?,
            Operator::F32Lt => self.do_compare(F32, BranchCond::FLt)?,
            Operator::F32Gt => self.do_compare(F32, BranchCond::FGt)?,
            Operator::F32Le => self.do_compare(F32, BranchCond::FLe)?,
            Operator::F32Ge => self.do_compare(F32, BranchCond::FGe)?,
            Operator::F64Eq => self.do_compare(F64, BranchCond::FEq)?,
            Operator::F64Ne => self.do_compare(F64, BranchCond::FNe)?,
            Operator::F64Lt => self.do_compare(F64, BranchCond::FLt)?,
            Operator::F64Gt => self.do_compare(F64, BranchCond::FGt)?,
            Operator::F64Le => self.do_compare(F64, BranchCond::FLe)?,
            Operator::F64Ge => self.do_compare(F64, BranchCond::FGe)?,

            // i32 arithmetic
            Operator::I32Clz => self.do_unop(&[enc::LZCNT_R32_RM32])?,
            Operator::I32Ctz => self.do_unop(&[enc::TZCNT_R32_RM32])?,
            Operator::I32Popcnt => self.do_unop(&[enc::POPCNT_R32_RM32])?,
            Operator::I32Add => self.do_binop(backend::ADD32)?,
            Operator::I32Sub => self.do_binop(backend::SUB32)?,
            Operator::I32Mul => self.do_binop(backend::MUL32)?,
            Operator::I32DivS => self.do_div_rem(I32, true, false)?,
            Operator::I32DivU => self.do_div_rem(I32, false, false)?,
            Operator::I32RemS => self.do_div_rem(I32, true, true)?,
            Operator::I32RemU => self.do_div_rem(I32, false, true)?,
            Operator::I32And => self.do_binop(backend::AND32)?,
            Operator::I32Or => self.do_binop(backend::OR32)?,
            Operator::I32Xor => self.do_binop(backend::XOR32)?,
            Operator::I32Shl => {
                self.do_shift(enc::SHL_RM32_C1, enc::SHL_RM32_IMM8, enc::SHL_RM32_CL)?
            }
            Operator::I32ShrS => {
                self.do_shift(enc::SAR_RM32_C1, enc::SAR_RM32_IMM8, enc::SAR_RM32_CL)?
            }
            Operator::I32ShrU => {
                self.do_shift(enc::SHR_RM32_C1, enc::SHR_RM32_IMM8, enc::SHR_RM32_CL)?
            }
            Operator::I32Rotl => {
                self.do_shift(enc::ROL_RM32_C1, enc::ROL_RM32_IMM8, enc::ROL_RM32_CL)?
            }
            Operator::I32Rotr => {
                self.do_shift(enc::ROR_RM32_C1, enc::ROR_RM32_IMM8, enc::ROR_RM32_CL)?
            }

            // i64 arithmetic
            Operator::I64Clz => self.do_unop(&[enc::LZCNT_R64_RM64])?,
            Operator::I64Ctz => self.do_unop(&[enc::TZCNT_R64_RM64])?,
            Operator::I64Popcnt => self.do_unop(&[enc::POPCNT_R64_RM64])?,
            Operator::I64Add => self.do_binop(backend::ADD64)?,
            Operator::I64Sub => self.do_binop(backend::SUB64)?,
            Operator::I64Mul => self.do_binop(backend::MUL64)?,
            Operator::I64DivS => self.do_div_rem(I64, true, false)?,
            Operator::I64DivU => self.do_div_rem(I64, false, false)?,
            Operator::I64RemS => self.do_div_rem(I64, true, true)?,
            Operator::I64RemU => self.do_div_rem(I64, false, true)?,
            Operator::I64And => self.do_binop(backend::AND64)?,
            Operator::I64Or => self.do_binop(backend::OR64)?,
            Operator::I64Xor => self.do_binop(backend::XOR64)?,
            Operator::I64Shl => {
                self.do_shift(enc::SHL_RM64_C1, enc::SHL_RM64_IMM8, enc::SHL_RM64_CL)?
            }
            Operator::I64ShrS => {
                self.do_shift(enc::SAR_RM64_C1, enc::SAR_RM64_IMM8, enc::SAR_RM64_CL)?
            }
            Operator::I64ShrU => {
                self.do_shift(enc::SHR_RM64_C1, enc::SHR_RM64_IMM8, enc::SHR_RM64_CL)?
            }
            Operator::I64Rotl => {
                self.do_shift(enc::ROL_RM64_C1, enc::ROL_RM64_IMM8, enc::ROL_RM64_CL)?
            }
            Operator::I64Rotr => {
                self.do_shift(enc::ROR_RM64_C1, enc::ROR_RM64_IMM8, enc::ROR_RM64_CL)?
            }

            // float arithmetic
            Operator::F32Abs => {
                self.materialize_pending_cmp()?;
                let arg = self.pop1();
                let result = self.emit_float_abs(F32, &arg, None)?;
                self.push(result)?;
            }
            Operator::F64Abs => {
                self.materialize_pending_cmp()?;
                let arg = self.pop1();
                let result = self.emit_float_abs(F64, &arg, None)?;
                self.push(result)?;
            }
            Operator::F32Neg => {
                self.materialize_pending_cmp()?;
                let arg = self.pop1();
                let result = self.emit_float_neg(F32, &arg, None)?;
                self.push(result)?;
            }
            Operator::F64Neg => {
                self.materialize_pending_cmp()?;
                let arg = self.pop1();
                let result = self.emit_float_neg(F64, &arg, None)?;
                self.push(result)?;
            }
            Operator::F32Ceil => self.do_round(F32, 2)?,
            Operator::F32Floor => self.do_round(F32, 1)?,
            Operator::F32Trunc => self.do_round(F32, 3)?,
            Operator::F32Nearest => self.do_round(F32, 0)?,
            Operator::F64Ceil => self.do_round(F64, 2)?,
            Operator::F64Floor => self.do_round(F64, 1)?,
            Operator::F64Trunc => self.do_round(F64, 3)?,
            Operator::F64Nearest => self.do_round(F64, 0)?,
            Operator::F32Sqrt => self.do_unop(&[enc::SQRTSS_RF_RMF])?,
            Operator::F64Sqrt => self.do_unop(&[enc::SQRTSD_RF_RMF])?,
            Operator::F32Add => self.do_binop(&[enc::ADDSS_RF_RMF])?,
            Operator::F32Sub => self.do_binop(&[enc::SUBSS_RF_RMF])?,
            Operator::F32Mul => self.do_binop(&[enc::MULSS_RF_RMF])?,
            Operator::F32Div => self.do_binop(&[enc::DIVSS_RF_RMF])?,
            Operator::F64Add => self.do_binop(&[enc::ADDSD_RF_RMF])?,
            Operator::F64Sub => self.do_binop(&[enc::SUBSD_RF_RMF])?,
            Operator::F64Mul => self.do_binop(&[enc::MULSD_RF_RMF])?,
            Operator::F64Div => self.do_binop(&[enc::DIVSD_RF_RMF])?,
            Operator::F32Min => self.do_min_max(F32, true)?,
            Operator::F32Max => self.do_min_max(F32, false)?,
            Operator::F64Min => self.do_min_max(F64, true)?,
            Operator::F64Max => self.do_min_max(F64, false)?,
            Operator::F32Copysign => {
                self.materialize_pending_cmp()?;
                let (lhs, rhs) = self.pop2();
                let result = self.emit_float_copysign(F32, &lhs, &rhs, None)?;
                self.push(result)?;
            }
            Operator::F64Copysign => {
                self.materialize_pending_cmp()?;
                let (lhs, rhs) = self.pop2();
                let result = self.emit_float_copysign(F64, &lhs, &rhs, None)?;
                self.push(result)?;
            }

            // conversions
            Operator::I32WrapI64 => self.do_wrap()?,
            Operator::I32TruncF32S => self.do_trunc(F32, I32, true)?,
            Operator::I32TruncF32U => self.do_trunc(F32, I32, false)?,
            Operator::I32TruncF64S => self.do_trunc(F64, I32, true)?,
            Operator::I32TruncF64U => self.do_trunc(F64, I32, false)?,
            Operator::I64ExtendI32S => {
                self.materialize_pending_cmp()?;
                let arg = self.pop1();
                let result = self.emit_unop(&[enc::MOVSXD_R64_RM32], &arg, None)?;
                self.push(result)?;
            }
            Operator::I64ExtendI32U => self.do_extend32_u()?,
            Operator::I64TruncF32S => self.do_trunc(F32, I64, true)?,
            Operator::I64TruncF32U => self.do_trunc(F32, I64, false)?,
            Operator::I64TruncF64S => self.do_trunc(F64, I64, true)?,
            Operator::I64TruncF64U => self.do_trunc(F64, I64, false)?,
            Operator::F32ConvertI32S => self.do_convert(I32, F32, true)?,
            Operator::F32ConvertI32U => self.do_convert(I32, F32, false)?,
            Operator::F32ConvertI64S => self.do_convert(I64, F32, true)?,
            Operator::F32ConvertI64U => self.do_convert(I64, F32, false)?,
            Operator::F32DemoteF64 => self.do_unop(&[enc::CVTSD2SS_RF_RMF])?,
            Operator::F64ConvertI32S => self.do_convert(I32, F64, true)?,
            Operator::F64ConvertI32U => self.do_convert(I32, F64, false)?,
            Operator::F64ConvertI64S => self.do_convert(I64, F64, true)?,
            Operator::F64ConvertI64U => self.do_convert(I64, F64, false)?,
            Operator::F64PromoteF32 => self.do_unop(&[enc::CVTSS2SD_RF_RMF])?,
            Operator::I32ReinterpretF32 => self.do_reinterpret(I32)?,
            Operator::I64ReinterpretF64 => self.do_reinterpret(I64)?,
            Operator::F32ReinterpretI32 => self.do_reinterpret(F32)?,
            Operator::F64ReinterpretI64 => self.do_reinterpret(F64)?,
            Operator::I32Extend8S => self.do_unop(&[enc::MOVSX_R32_RM8])?,
            Operator::I32Extend16S => self.do_unop(&[enc::MOVSX_R32_RM16])?,
            Operator::I64Extend8S => self.do_unop(&[enc::MOVSX_R64_RM8])?,
            Operator::I64Extend16S => self.do_unop(&[enc::MOVSX_R64_RM16])?,
            Operator::I64Extend32S => self.do_extend32_s()?,

            // linear memory
            Operator::I32Load { memarg } => self.do_load(I32, 4, false, memarg.offset)?,
            Operator::I64Load { memarg } => self.do_load(I64, 8, false, memarg.offset)?,
            Operator::F32Load { memarg } => self.do_load(F32, 4, false, memarg.offset)?,
            Operator::F64Load { memarg } => self.do_load(F64, 8, false, memarg.offset)?,
            Operator::I32Load8S { memarg } => self.do_load(I32, 1, true, memarg.offset)?,
            Operator::I32Load8U { memarg } => self.do_load(I32, 1, false, memarg.offset)?,
            Operator::I32Load16S { memarg } => self.do_load(I32, 2, true, memarg.offset)?,
            Operator::I32Load16U { memarg } => self.do_load(I32, 2, false, memarg.offset)?,
            Operator::I64Load8S { memarg } => self.do_load(I64, 1, true, memarg.offset)?,
            Operator::I64Load8U { memarg } => self.do_load(I64, 1, false, memarg.offset)?,
            Operator::I64Load16S { memarg } => self.do_load(I64, 2, true, memarg.offset)?,
            Operator::I64Load16U { memarg } => self.do_load(I64, 2, false, memarg.offset)?,
            Operator::I64Load32S { memarg } => self.do_load(I64, 4, true, memarg.offset)?,
            Operator::I64Load32U { memarg } => self.do_load(I64, 4, false, memarg.offset)?,
            Operator::I32Store { memarg } => self.do_store(4, memarg.offset)?,
            Operator::I64Store { memarg } => self.do_store(8, memarg.offset)?,
            Operator::F32Store { memarg } => self.do_store(4, memarg.offset)?,
            Operator::F64Store { memarg } => self.do_store(8, memarg.offset)?,
            Operator::I32Store8 { memarg } => self.do_store(1, memarg.offset)?,
            Operator::I32Store16 { memarg } => self.do_store(2, memarg.offset)?,
            Operator::I64Store8 { memarg } => self.do_store(1, memarg.offset)?,
            Operator::I64Store16 { memarg } => self.do_store(2, memarg.offset)?,
            Operator::I64Store32 { memarg } => self.do_store(4, memarg.offset)?,
            Operator::MemorySize { .. } => {
                self.materialize_pending_cmp()?;
                let result = self.emit_memory_size()?;
                self.push(result)?;
            }
            Operator::MemoryGrow { .. } => {
                self.materialize_pending_cmp()?;
                let delta = self.pop1();
                let result = self.emit_memory_grow(delta)?;
                self.push(result)?;
            }
            Operator::MemoryCopy { .. } => {
                self.materialize_pending_cmp()?;
                let n = self.pop1();
                let (dst, src) = self.pop2();
                let helper = self.info.helpers.mem_copy;
                self.emit_memory_bulk(helper, dst, src, n)?;
            }
            Operator::MemoryFill { .. } => {
                self.materialize_pending_cmp()?;
                let n = self.pop1();
                let (dst, value) = self.pop2();
                let helper = self.info.helpers.mem_fill;
                self.emit_memory_bulk(helper, dst, value, n)?;
            }

            _ => return Err(Error::FeatureNotSupported(UnsupportedKind::Proposal)),
        }
        Ok(())
    }

    fn do_round(&mut self, ty: MachineType, mode: u8) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let arg = self.pop1();
        let result = self.emit_float_round(ty, mode, &arg, None)?;
        self.push(result)
    }

    fn do_min_max(&mut self, ty: MachineType, is_min: bool) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let (lhs, rhs) = self.pop2();
        let result = self.emit_float_min_max(ty, is_min, lhs, rhs)?;
        self.push(result)
    }

    fn do_reinterpret(&mut self, dst: MachineType) -> Result<(), Error> {
        self.materialize_pending_cmp()?;
        let arg = self.pop1();
        let result = self.emit_reinterpret(dst, arg)?;
        self.push(result)
    }
}

fn local_type(ty: ValType) -> Result<MachineType, Error> {
    match ty {
        ValType::I32 => Ok(MachineType::I32),
        ValType::I64 => Ok(MachineType::I64),
        ValType::F32 => Ok(MachineType::F32),
        ValType::F64 => Ok(MachineType::F64),
        ValType::V128 => Err(Error::FeatureNotSupported(UnsupportedKind::Simd)),
        ValType::Ref(_) => Err(Error::FeatureNotSupported(UnsupportedKind::ReferenceTypes)),
    }
}
