//! Call dispatch: the shared call-frame layout, internal and indirect
//! Wasm calls, imported native calls over both conventions, the host-ABI
//! entry adapters and the per-module helper functions.

use super::{
    encoding as enc,
    regs::{pinned, NativeAbi, Reg, RegMask, WasmAbi, CALL_SCR_REGS},
};
use crate::{
    binary::LinkDataLayout,
    compiler::{
        common::BranchTarget,
        elem::{ElemKind, StackElement},
        regcopy::RegisterCopyResolver,
        storage::VariableStorage,
        Compiler,
    },
    module::{ImportAbi, NativeSymbol},
    BoundsCheckMode, Error, TrapCode, UnsupportedKind,
};
use wasp_core::MachineType;

/// Function index written into stacktrace records when the callee is not
/// statically known (indirect calls).
const UNKNOWN_INDEX: u32 = u32::MAX;

/// Width of one stacktrace record: packed position/index word plus the
/// previous-record pointer.
const STACKTRACE_RECORD: u32 = 16;

/// Layout of the transient region a call reserves below the frame.
///
/// The region stays part of the frame after the call, since stack-passed
/// results live in it; it is reclaimed when the enclosing block
/// reinstates its entry frame size.
#[derive(Debug, Copy, Clone)]
pub(crate) struct CallFrame {
    /// Bytes reserved below the previous frame end.
    pub total: u32,
    /// SP offset of the outgoing stack parameters.
    pub of_params: u32,
    /// SP offset of the incoming stack return values.
    pub of_returns: u32,
    /// SP offset of the stacktrace record.
    pub of_record: u32,
    /// SP offset of the cached job-memory pointer slot, when bounds
    /// checks need the post-call refetch.
    pub of_jobmem: Option<u32>,
}

/// Tracker for argument and return value position assignment.
#[derive(Debug, Default)]
pub(crate) struct RegStackTracker {
    pub gpr: usize,
    pub fpr: usize,
    pub stack_bytes: u32,
}

impl Compiler<'_, '_> {
    /// Returns the Wasm-ABI argument position for the next parameter of
    /// type `ty`: a register for the leading four per class, then stack.
    pub(crate) fn wasm_arg_position(
        &self,
        tracker: &mut RegStackTracker,
        ty: MachineType,
    ) -> Option<Reg> {
        let (pool, used) = if ty.is_int() {
            (WasmAbi::gpr(self.config.bounds_checks), &mut tracker.gpr)
        } else {
            (WasmAbi::FPR, &mut tracker.fpr)
        };
        if *used < WasmAbi::REGS_FOR_PARAMS {
            *used += 1;
            return Some(pool[*used - 1]);
        }
        tracker.stack_bytes += 8;
        None
    }

    /// Returns the native-ABI argument position for the next parameter.
    pub(crate) fn native_arg_position(
        &self,
        tracker: &mut RegStackTracker,
        ty: MachineType,
    ) -> Option<Reg> {
        let mutual = NativeAbi::REG_ARG_ALLOCATION
            == super::regs::RegArgAllocation::Mutual;
        let params: &[Reg] = if ty.is_int() {
            NativeAbi::GP_PARAMS
        } else {
            NativeAbi::FP_PARAMS
        };
        let slot = if mutual {
            tracker.gpr.max(tracker.fpr)
        } else if ty.is_int() {
            tracker.gpr
        } else {
            tracker.fpr
        };
        if slot < params.len() {
            if mutual {
                tracker.gpr = slot + 1;
                tracker.fpr = slot + 1;
            } else if ty.is_int() {
                tracker.gpr += 1;
            } else {
                tracker.fpr += 1;
            }
            return Some(params[slot]);
        }
        tracker.stack_bytes += 8;
        None
    }

    /// Byte width of the stack-passed arguments of signature `sig_index`
    /// under the given convention.
    fn stack_param_width(&self, sig_index: u32, native: bool) -> u32 {
        let mut tracker = RegStackTracker::default();
        let sig = &self.meta.signatures[sig_index as usize];
        for &ty in &sig.params {
            if native {
                self.native_arg_position(&mut tracker, ty);
            } else {
                self.wasm_arg_position(&mut tracker, ty);
            }
        }
        if native {
            // The opaque context rides along as the trailing argument.
            self.native_arg_position(&mut tracker, MachineType::I64);
        }
        tracker.stack_bytes
    }

    /// Reserves the call region below the current frame. The frame
    /// bookkeeping is updated so storage lookups see the new SP.
    pub(crate) fn prepare_call_frame(
        &mut self,
        shadow: u32,
        stack_param_width: u32,
        stack_return_width: u32,
        with_jobmem: bool,
    ) -> Result<CallFrame, Error> {
        let of_params = shadow;
        let of_returns = of_params + stack_param_width;
        let of_record = of_returns + stack_return_width;
        let mut total = of_record + STACKTRACE_RECORD;
        let of_jobmem = if with_jobmem {
            total += 8;
            Some(total - 8)
        } else {
            None
        };
        // Keep the call-site alignment discipline: frames are 16-byte
        // granular, entry SP is 8 (mod 16), so the region must be 8
        // (mod 16) for the callee to see an aligned frame.
        if total % 16 != 8 {
            total += 8;
        }
        let new_size = self.info.fnc.stack_frame_size + total;
        self.adjust_sp(new_size, false)?;
        self.info.fnc.stack_frame_size = new_size;
        self.info.fnc.frame_used = self.info.fnc.frame_used.max(new_size);
        Ok(CallFrame {
            total,
            of_params,
            of_returns,
            of_record,
            of_jobmem,
        })
    }

    /// Pushes the stacktrace record for an outgoing call and links it into
    /// the record list.
    fn push_stacktrace_record(&mut self, frame: &CallFrame, func_index: u32) -> Result<(), Error> {
        let off = frame.of_record as i32;
        self.instr(&enc::MOV_RM32_IMM32)
            .set_m4rm(Reg::Sp, off)
            .set_imm32(self.info.bytecode_pos)
            .emit(&mut self.out)?;
        self.instr(&enc::MOV_RM32_IMM32)
            .set_m4rm(Reg::Sp, off + 4)
            .set_imm32(func_index)
            .emit(&mut self.out)?;
        self.instr(&enc::MOV_R64_RM64)
            .set_r(Reg::A)
            .set_m4rm(pinned::LIN_MEM, LinkDataLayout::LAST_FRAME_REF_PTR)
            .emit(&mut self.out)?;
        self.instr(&enc::MOV_RM64_R64)
            .set_r(Reg::A)
            .set_m4rm(Reg::Sp, off + 8)
            .emit(&mut self.out)?;
        self.instr(&enc::LEA_R64_M)
            .set_r(Reg::A)
            .set_m4rm(Reg::Sp, off)
            .emit(&mut self.out)?;
        self.instr(&enc::MOV_RM64_R64)
            .set_r(Reg::A)
            .set_m4rm(pinned::LIN_MEM, LinkDataLayout::LAST_FRAME_REF_PTR)
            .emit(&mut self.out)
    }

    /// Unlinks the stacktrace record after the call returned.
    fn pop_stacktrace_record(&mut self, frame: &CallFrame) -> Result<(), Error> {
        // The return registers are live; go through a call-scratch
        // register instead.
        let scratch = CALL_SCR_REGS[0];
        self.instr(&enc::MOV_R64_RM64)
            .set_r(scratch)
            .set_m4rm(Reg::Sp, frame.of_record as i32 + 8)
            .emit(&mut self.out)?;
        self.instr(&enc::MOV_RM64_R64)
            .set_r(scratch)
            .set_m4rm(pinned::LIN_MEM, LinkDataLayout::LAST_FRAME_REF_PTR)
            .emit(&mut self.out)
    }

    /// Reloads the pinned memory-size cache from link data.
    pub(crate) fn reload_mem_size(&mut self) -> Result<(), Error> {
        if self.config.bounds_checks != BoundsCheckMode::Explicit {
            return Ok(());
        }
        self.instr(&enc::MOV_R64_RM64)
            .set_r(pinned::MEM_SIZE)
            .set_m4rm(pinned::LIN_MEM, LinkDataLayout::ACTUAL_LINMEM_BYTE_SIZE)
            .emit(&mut self.out)?;
        self.instr(&enc::SUB_RM64_IMM8SX)
            .set_r4rm(pinned::MEM_SIZE)
            .set_imm8(8)
            .emit(&mut self.out)
    }

    /// Caches the job-memory descriptor pointer before an imported call
    /// and re-derives the linear memory base from it afterwards; the host
    /// may have reallocated linear memory during the call.
    fn cache_jobmem(&mut self, frame: &CallFrame) -> Result<(), Error> {
        let Some(off) = frame.of_jobmem else {
            return Ok(());
        };
        self.instr(&enc::MOV_R64_RM64)
            .set_r(Reg::A)
            .set_m4rm(pinned::LIN_MEM, LinkDataLayout::CUSTOM_CTX)
            .emit(&mut self.out)?;
        self.instr(&enc::MOV_RM64_R64)
            .set_r(Reg::A)
            .set_m4rm(Reg::Sp, off as i32)
            .emit(&mut self.out)
    }

    fn restore_from_jobmem(&mut self, frame: &CallFrame) -> Result<(), Error> {
        let Some(off) = frame.of_jobmem else {
            return Ok(());
        };
        let scratch = CALL_SCR_REGS[0];
        self.instr(&enc::MOV_R64_RM64)
            .set_r(scratch)
            .set_m4rm(Reg::Sp, off as i32)
            .emit(&mut self.out)?;
        self.instr(&enc::MOV_R64_RM64)
            .set_r(pinned::LIN_MEM)
            .set_m4rm(scratch, 0)
            .emit(&mut self.out)
    }

    /// Moves the call arguments from the operand stack into their ABI
    /// positions and pops them. `extra` schedules additional moves (the
    /// indirect-call index, the context argument) through the same
    /// resolver pass.
    fn marshal_args(
        &mut self,
        num_params: usize,
        native: bool,
        frame: &CallFrame,
        extra: impl FnOnce(&Self, &mut RegisterCopyResolver),
    ) -> Result<(), Error> {
        let mut tracker = RegStackTracker::default();
        let mut resolver = RegisterCopyResolver::default();
        let mut stack_off = frame.of_params;
        for i in 0..num_params {
            let at = self
                .stack
                .nth_from_top((num_params - 1 - i) as u32)
                .expect("validated call sites provide the arguments");
            let elem = *self.stack.get(at);
            let ty = elem.ty().expect("call arguments are values");
            let src = self.info.storage_of(&elem);
            let position = if native {
                self.native_arg_position(&mut tracker, ty)
            } else {
                self.wasm_arg_position(&mut tracker, ty)
            };
            match position {
                Some(reg) => resolver.push(ty, reg, src),
                None => {
                    self.emit_move(VariableStorage::stack(ty, stack_off as i32), src, false)?;
                    stack_off += 8;
                }
            }
        }
        extra(self, &mut resolver);
        resolver.resolve(self)?;
        for _ in 0..num_params {
            self.info.pop_unlinked(&mut self.stack);
        }
        Ok(())
    }

    /// Pushes the result elements of a call according to the return
    /// convention: scratch registers first, then the stack return area.
    fn push_call_results(&mut self, sig_index: u32, frame: &CallFrame) -> Result<(), Error> {
        let results = self.meta.signatures[sig_index as usize].results.clone();
        let of_returns = frame.of_returns;
        let frame_size = self.info.fnc.stack_frame_size;
        let targets = Self::result_convention(&results, |off| {
            BranchTarget::Frame(frame_size - of_returns - off - 8)
        });
        for (target, ty) in targets {
            let elem = match target {
                BranchTarget::Reg(reg) => StackElement::scratch(ty, reg),
                BranchTarget::Frame(pos) => StackElement::temp(ty, pos),
                BranchTarget::RetSlot(_) => unreachable!("calls use frame slots"),
            };
            self.info.push_linked(&mut self.stack, elem)?;
        }
        Ok(())
    }

    /// The registers an internal Wasm callee clobbers from the caller's
    /// point of view: its parameter registers, the reserved scratch pools
    /// (returns arrive there), and the call-scratch registers every call
    /// sequence is free to use.
    fn wasm_callee_clobbers(&self, sig_index: u32, indirect: bool) -> RegMask {
        let mut mask = RegMask::none();
        let mut tracker = RegStackTracker::default();
        let sig = &self.meta.signatures[sig_index as usize];
        for &ty in &sig.params {
            if let Some(reg) = self.wasm_arg_position(&mut tracker, ty) {
                mask.insert(reg);
            }
        }
        for &reg in WasmAbi::scratch_pool(self.config.bounds_checks, MachineType::I32) {
            mask.insert(reg);
        }
        for &reg in WasmAbi::scratch_pool(self.config.bounds_checks, MachineType::F64) {
            mask.insert(reg);
        }
        for reg in CALL_SCR_REGS {
            mask.insert(reg);
        }
        if indirect {
            mask.insert(pinned::INDIRECT_CALL_REG);
        }
        mask
    }

    /// All caller-saved registers of the native ABI, plus the
    /// call-scratch registers the import-call sequence itself uses for
    /// the stacktrace record and the job-memory refetch.
    fn native_volatile_mask(&self) -> RegMask {
        let mut mask = RegMask::none();
        for &reg in NativeAbi::VOL_REGS {
            mask.insert(reg);
        }
        for reg in CALL_SCR_REGS {
            mask.insert(reg);
        }
        mask
    }

    // --- call flavors -----------------------------------------------------

    /// Lowers `call` to a defined or imported function.
    pub(crate) fn exec_direct_call(&mut self, func_index: u32) -> Result<(), Error> {
        let func = &self.meta.functions[func_index as usize];
        let sig_index = func.sig_index;
        if let Some(import) = func.imported.clone() {
            return self.exec_import_call(func_index, &import);
        }
        let num_params = self.meta.signatures[sig_index as usize].params.len();

        self.spill_all_variables()?;
        let frame = self.prepare_call_frame(
            0,
            self.stack_param_width(sig_index, false),
            Self::stack_return_width(&self.meta.signatures[sig_index as usize].results),
            false,
        )?;
        self.push_stacktrace_record(&frame, func_index)?;
        let saved = self.save_locals_for_call(self.wasm_callee_clobbers(sig_index, false))?;
        self.marshal_args(num_params, false, &frame, |_, _| {})?;

        let call = self.prepare_jmp_call()?;
        let label = self.info.func_labels[func_index as usize];
        self.labels.add_user(label, call, &mut self.out)?;

        self.pop_stacktrace_record(&frame)?;
        self.reload_mem_size()?;
        self.restore_locals_after_call(&saved)?;
        self.push_call_results(sig_index, &frame)
    }

    /// Lowers `call_indirect`: bounds check, signature check, link check,
    /// then a call through the table record's binary offset.
    pub(crate) fn exec_indirect_call(&mut self, sig_index: u32) -> Result<(), Error> {
        debug_assert!(self.info.table_initial > 0 || self.meta.table.is_some());
        let num_params = self.meta.signatures[sig_index as usize].params.len();

        self.materialize_pending_cmp()?;
        self.spill_all_variables()?;
        let frame = self.prepare_call_frame(
            0,
            self.stack_param_width(sig_index, false),
            Self::stack_return_width(&self.meta.signatures[sig_index as usize].results),
            false,
        )?;
        self.push_stacktrace_record(&frame, UNKNOWN_INDEX)?;
        let saved = self.save_locals_for_call(self.wasm_callee_clobbers(sig_index, true))?;

        // The table index is on top of the stack, above the arguments; it
        // rides through the same resolver into the pinned index register.
        let index_at = self.stack.last().expect("call_indirect has an index");
        let index_storage = self.info.storage_of(self.stack.get(index_at));
        self.info.pop_unlinked(&mut self.stack);
        self.marshal_args(num_params, false, &frame, |_, resolver| {
            resolver.push(MachineType::I32, pinned::INDIRECT_CALL_REG, index_storage);
        })?;

        let table_size = self.info.table_initial;
        let idx = pinned::INDIRECT_CALL_REG;
        self.instr(&enc::CMP_RM32_IMM32)
            .set_r4rm(idx)
            .set_imm32(table_size)
            .emit(&mut self.out)?;
        self.emit_ctrap(TrapCode::IndirectCallOutOfBounds, enc::Cc::Ae)?;

        let record = CALL_SCR_REGS[0];
        let offset = CALL_SCR_REGS[1];
        self.instr(&enc::MOV_R64_RM64)
            .set_r(record)
            .set_m4rm(pinned::LIN_MEM, LinkDataLayout::TABLE_ADDR)
            .emit(&mut self.out)?;
        self.instr(&enc::LEA_R64_M)
            .set_r(record)
            .set_m4rm_indexed(record, 0, idx, 3)
            .emit(&mut self.out)?;
        self.instr(&enc::CMP_RM32_IMM32)
            .set_m4rm(record, 4)
            .set_imm32(sig_index)
            .emit(&mut self.out)?;
        self.emit_ctrap(TrapCode::IndirectCallWrongSig, enc::Cc::Ne)?;

        self.instr(&enc::MOV_R32_RM32)
            .set_r(offset)
            .set_m4rm(record, 0)
            .emit(&mut self.out)?;
        self.instr(&enc::CMP_RM32_IMM32)
            .set_r4rm(offset)
            .set_imm32(0)
            .emit(&mut self.out)?;
        self.emit_ctrap(TrapCode::CalledFunctionNotLinked, enc::Cc::E)?;

        self.instr(&enc::MOV_R64_RM64)
            .set_r(record)
            .set_m4rm(pinned::LIN_MEM, LinkDataLayout::BINARY_START_ADDR)
            .emit(&mut self.out)?;
        self.instr(&enc::ADD_R64_RM64)
            .set_r(record)
            .set_r4rm(offset)
            .emit(&mut self.out)?;
        self.instr(&enc::CALL_RM64)
            .set_r4rm(record)
            .emit(&mut self.out)?;

        self.pop_stacktrace_record(&frame)?;
        self.reload_mem_size()?;
        self.restore_locals_after_call(&saved)?;
        self.push_call_results(sig_index, &frame)
    }

    /// Lowers a direct call to an imported native function.
    fn exec_import_call(
        &mut self,
        func_index: u32,
        import: &crate::module::ImportedFunc,
    ) -> Result<(), Error> {
        let sig_index = self.meta.functions[func_index as usize].sig_index;
        let abi = if self.config.v2_imports {
            ImportAbi::V2
        } else {
            import.abi
        };
        let sig = self.meta.signatures[sig_index as usize].clone();
        if sig.results.len() > 1 {
            return Err(Error::FeatureNotSupported(
                UnsupportedKind::V2MultiValueReturns,
            ));
        }
        let num_params = sig.params.len();
        let import_index = self.import_index_of(func_index);

        self.spill_all_variables()?;
        self.move_globals_to_linkdata()?;
        let with_jobmem = self.config.bounds_checks == BoundsCheckMode::Explicit;
        let frame = match abi {
            ImportAbi::V1 => self.prepare_call_frame(
                NativeAbi::SHADOW_SPACE_SIZE,
                self.stack_param_width(sig_index, true),
                Self::stack_return_width(&sig.results),
                with_jobmem,
            )?,
            ImportAbi::V2 => self.prepare_call_frame(
                NativeAbi::SHADOW_SPACE_SIZE,
                (num_params as u32) * 8,
                sig.results.len() as u32 * 8,
                with_jobmem,
            )?,
        };
        self.push_stacktrace_record(&frame, func_index)?;
        let saved = self.save_locals_for_call(self.native_volatile_mask())?;

        match abi {
            ImportAbi::V1 => {
                let ctx_storage =
                    VariableStorage::link_data(MachineType::I64, LinkDataLayout::CUSTOM_CTX);
                let mut probe = RegStackTracker::default();
                let sigref = &self.meta.signatures[sig_index as usize];
                for &ty in &sigref.params {
                    self.native_arg_position(&mut probe, ty);
                }
                let ctx_reg = self.native_arg_position(&mut probe, MachineType::I64);
                let ctx_stack_off = frame.of_params + probe.stack_bytes.saturating_sub(8);
                self.marshal_args(num_params, true, &frame, |_, resolver| {
                    if let Some(reg) = ctx_reg {
                        resolver.push(MachineType::I64, reg, ctx_storage);
                    }
                })?;
                if ctx_reg.is_none() {
                    self.emit_move(
                        VariableStorage::stack(MachineType::I64, ctx_stack_off as i32),
                        ctx_storage,
                        false,
                    )?;
                }
            }
            ImportAbi::V2 => {
                // Arguments go into the params buffer in order.
                for i in 0..num_params {
                    let at = self
                        .stack
                        .nth_from_top((num_params - 1 - i) as u32)
                        .expect("validated call sites provide the arguments");
                    let elem = *self.stack.get(at);
                    let ty = elem.ty().expect("call arguments are values");
                    let src = self.info.storage_of(&elem);
                    self.emit_move(
                        VariableStorage::stack(ty, (frame.of_params + 8 * i as u32) as i32),
                        src,
                        false,
                    )?;
                }
                for _ in 0..num_params {
                    self.info.pop_unlinked(&mut self.stack);
                }
                self.instr(&enc::LEA_R64_M)
                    .set_r(NativeAbi::GP_PARAMS[0])
                    .set_m4rm(Reg::Sp, frame.of_params as i32)
                    .emit(&mut self.out)?;
                self.instr(&enc::LEA_R64_M)
                    .set_r(NativeAbi::GP_PARAMS[1])
                    .set_m4rm(Reg::Sp, frame.of_returns as i32)
                    .emit(&mut self.out)?;
                self.instr(&enc::MOV_R64_RM64)
                    .set_r(NativeAbi::GP_PARAMS[2])
                    .set_m4rm(pinned::LIN_MEM, LinkDataLayout::CUSTOM_CTX)
                    .emit(&mut self.out)?;
            }
        }

        self.cache_jobmem(&frame)?;
        match import.symbol {
            NativeSymbol::Static { addr } => {
                self.emit_mov_imm_to_gpr(Reg::A, MachineType::I64, addr as u64, false)?;
                self.instr(&enc::CALL_RM64).set_r4rm(Reg::A).emit(&mut self.out)?;
            }
            NativeSymbol::Dynamic => {
                self.instr(&enc::CALL_RM64)
                    .set_m4rm(
                        pinned::LIN_MEM,
                        self.layout.import_ptr_offset(import_index),
                    )
                    .emit(&mut self.out)?;
            }
        }
        self.restore_from_jobmem(&frame)?;
        self.reload_mem_size()?;
        self.recover_globals_to_regs()?;
        self.pop_stacktrace_record(&frame)?;
        self.restore_locals_after_call(&saved)?;

        match abi {
            ImportAbi::V1 => {
                // The native return registers coincide with the leading
                // Wasm return registers, so results are already in place.
                self.push_call_results(sig_index, &frame)
            }
            ImportAbi::V2 => {
                for (i, &ty) in sig.results.clone().iter().enumerate() {
                    let pos =
                        self.info.fnc.stack_frame_size - (frame.of_returns + 8 * i as u32) - 8;
                    let elem = StackElement::temp(ty, pos);
                    self.info.push_linked(&mut self.stack, elem)?;
                }
                Ok(())
            }
        }
    }

    fn import_index_of(&self, func_index: u32) -> u32 {
        debug_assert!(self.meta.functions[func_index as usize].imported.is_some());
        func_index
    }

    // --- adapters ---------------------------------------------------------

    /// Emits the host-ABI entry adapter for function `func_index`:
    /// `extern "C" fn(params: *const u64, results: *mut u64, ctx) -> u32`
    /// returning 0 on success or the trap code.
    pub(crate) fn emit_function_entry_point(&mut self, func_index: u32) -> Result<u32, Error> {
        let adapter_start = self.out.pos();
        let sig = self.meta.signatures
            [self.meta.functions[func_index as usize].sig_index as usize]
            .clone();

        let params_reg = NativeAbi::GP_PARAMS[0];
        let results_reg = NativeAbi::GP_PARAMS[1];
        let ctx_reg = NativeAbi::GP_PARAMS[2];

        // Save the native callee-saved registers the Wasm world clobbers.
        let nonvol_gprs: Vec<Reg> = NativeAbi::NONVOL_REGS
            .iter()
            .copied()
            .filter(|reg| reg.is_gpr())
            .collect();
        let nonvol_fprs: Vec<Reg> = NativeAbi::NONVOL_REGS
            .iter()
            .copied()
            .filter(|reg| reg.is_fpr())
            .collect();
        for &reg in &nonvol_gprs {
            self.instr(&enc::PUSH_R64).set_r(reg).emit(&mut self.out)?;
        }
        if !nonvol_fprs.is_empty() {
            let area = (nonvol_fprs.len() as u32 * 8).next_multiple_of(16);
            self.instr(&enc::SUB_RM64_IMM8SX)
                .set_r4rm(Reg::Sp)
                .set_imm8(area as u8)
                .emit(&mut self.out)?;
            for (i, &reg) in nonvol_fprs.iter().enumerate() {
                self.instr(&enc::MOVSD_RMF_RF)
                    .set_r(reg)
                    .set_m4rm(Reg::Sp, 8 * i as i32)
                    .emit(&mut self.out)?;
            }
        }

        // Establish the pinned linear-memory base from the context.
        self.instr(&enc::MOV_R64_RM64)
            .set_r(pinned::LIN_MEM)
            .set_m4rm(ctx_reg, 0)
            .emit(&mut self.out)?;

        // Save the previous trap context (re-entrancy), then the buffer
        // pointers.
        for slot in [
            LinkDataLayout::TRAP_STACK_REENTRY,
            LinkDataLayout::TRAP_REENTRY_PC,
        ] {
            self.instr(&enc::MOV_R64_RM64)
                .set_r(Reg::A)
                .set_m4rm(pinned::LIN_MEM, slot)
                .emit(&mut self.out)?;
            self.instr(&enc::PUSH_R64).set_r(Reg::A).emit(&mut self.out)?;
        }
        self.instr(&enc::PUSH_R64).set_r(results_reg).emit(&mut self.out)?;
        self.instr(&enc::PUSH_R64).set_r(params_reg).emit(&mut self.out)?;

        // Arm the trap context at the current stack depth.
        let reentry_lea = self.prepare_pc_rel_lea(Reg::A)?;
        self.instr(&enc::MOV_RM64_R64)
            .set_r(Reg::A)
            .set_m4rm(pinned::LIN_MEM, LinkDataLayout::TRAP_REENTRY_PC)
            .emit(&mut self.out)?;
        self.instr(&enc::MOV_RM64_R64)
            .set_r(Reg::Sp)
            .set_m4rm(pinned::LIN_MEM, LinkDataLayout::TRAP_STACK_REENTRY)
            .emit(&mut self.out)?;

        self.reload_mem_size()?;
        self.recover_globals_to_regs()?;

        // Compute the argument area: stack args of the callee plus its
        // stack return area, padded to keep the call aligned.
        let mut tracker = RegStackTracker::default();
        let mut reg_args: Vec<(Reg, MachineType, usize)> = Vec::new();
        let mut stack_args: Vec<(u32, usize)> = Vec::new();
        for (i, &ty) in sig.params.iter().enumerate() {
            match self.wasm_arg_position(&mut tracker, ty) {
                Some(reg) => reg_args.push((reg, ty, i)),
                None => {
                    stack_args.push((tracker.stack_bytes - 8, i));
                }
            }
        }
        let ret_width = Self::stack_return_width(&sig.results);
        let mut area = tracker.stack_bytes + ret_width;
        // Keep the call site 16-byte aligned: the host entered with the
        // return address pushed, and everything below is what we pushed.
        let fpr_area = if nonvol_fprs.is_empty() {
            0
        } else {
            (nonvol_fprs.len() as u32 * 8).next_multiple_of(16)
        };
        let pushed = nonvol_gprs.len() as u32 * 8 + fpr_area + 4 * 8;
        if (pushed + area + 8) % 16 != 0 {
            area += 8;
        }

        // params pointer, from the save slot.
        self.instr(&enc::MOV_R64_RM64)
            .set_r(Reg::R10)
            .set_m4rm(Reg::Sp, 0)
            .emit(&mut self.out)?;
        if area != 0 {
            self.instr(&enc::SUB_RM64_IMM32SX)
                .set_r4rm(Reg::Sp)
                .set_imm32(area)
                .emit(&mut self.out)?;
        }
        for &(reg, ty, i) in &reg_args {
            let load = if ty.is_int() { &enc::MOV_R64_RM64 } else { &enc::MOVSD_RF_RMF };
            self.instr(load)
                .set_r(reg)
                .set_m4rm(Reg::R10, 8 * i as i32)
                .emit(&mut self.out)?;
        }
        for &(off, i) in &stack_args {
            self.instr(&enc::MOV_R64_RM64)
                .set_r(Reg::R11)
                .set_m4rm(Reg::R10, 8 * i as i32)
                .emit(&mut self.out)?;
            self.instr(&enc::MOV_RM64_R64)
                .set_r(Reg::R11)
                .set_m4rm(Reg::Sp, off as i32)
                .emit(&mut self.out)?;
        }

        let call = self.prepare_jmp_call()?;
        let label = self.info.func_labels[func_index as usize];
        self.labels.add_user(label, call, &mut self.out)?;

        // Store the results into the results buffer.
        self.instr(&enc::MOV_R64_RM64)
            .set_r(Reg::R10)
            .set_m4rm(Reg::Sp, area as i32 + 8)
            .emit(&mut self.out)?;
        let ret_targets = Self::result_convention(&sig.results, BranchTarget::RetSlot);
        let stack_param_width = tracker.stack_bytes;
        for (i, (target, ty)) in ret_targets.iter().enumerate() {
            match *target {
                BranchTarget::Reg(reg) => {
                    let store = if ty.is_int() { &enc::MOV_RM64_R64 } else { &enc::MOVSD_RMF_RF };
                    self.instr(store)
                        .set_r(reg)
                        .set_m4rm(Reg::R10, 8 * i as i32)
                        .emit(&mut self.out)?;
                }
                BranchTarget::RetSlot(off) => {
                    self.instr(&enc::MOV_R64_RM64)
                        .set_r(Reg::R11)
                        .set_m4rm(Reg::Sp, (stack_param_width + off) as i32)
                        .emit(&mut self.out)?;
                    self.instr(&enc::MOV_RM64_R64)
                        .set_r(Reg::R11)
                        .set_m4rm(Reg::R10, 8 * i as i32)
                        .emit(&mut self.out)?;
                }
                BranchTarget::Frame(_) => unreachable!("returns use ret slots"),
            }
        }
        if area != 0 {
            self.instr(&enc::ADD_RM64_IMM32SX)
                .set_r4rm(Reg::Sp)
                .set_imm32(area)
                .emit(&mut self.out)?;
        }
        self.emit_mov_imm_to_gpr(Reg::A, MachineType::I32, 0, false)?;

        // Trap re-entry lands here with the code in the trap register and
        // the stack pointer restored to the armed depth.
        reentry_lea.link_to_here(&mut self.out)?;
        self.move_globals_to_linkdata()?;
        self.instr(&enc::POP_R64).set_r(Reg::R10).emit(&mut self.out)?;
        self.instr(&enc::POP_R64).set_r(Reg::R10).emit(&mut self.out)?;
        for slot in [
            LinkDataLayout::TRAP_REENTRY_PC,
            LinkDataLayout::TRAP_STACK_REENTRY,
        ] {
            self.instr(&enc::POP_R64).set_r(Reg::C).emit(&mut self.out)?;
            self.instr(&enc::MOV_RM64_R64)
                .set_r(Reg::C)
                .set_m4rm(pinned::LIN_MEM, slot)
                .emit(&mut self.out)?;
        }
        if !nonvol_fprs.is_empty() {
            let fpr_area = (nonvol_fprs.len() as u32 * 8).next_multiple_of(16);
            for (i, &reg) in nonvol_fprs.iter().enumerate() {
                self.instr(&enc::MOVSD_RF_RMF)
                    .set_r(reg)
                    .set_m4rm(Reg::Sp, 8 * i as i32)
                    .emit(&mut self.out)?;
            }
            self.instr(&enc::ADD_RM64_IMM8SX)
                .set_r4rm(Reg::Sp)
                .set_imm8(fpr_area as u8)
                .emit(&mut self.out)?;
        }
        for &reg in nonvol_gprs.iter().rev() {
            self.instr(&enc::POP_R64).set_r(reg).emit(&mut self.out)?;
        }
        self.instr(&enc::RET).emit(&mut self.out)?;
        Ok(adapter_start)
    }

    /// Emits the Wasm-ABI adapter that forwards to an imported native
    /// function, so imports are reachable through the indirect-call table
    /// and the entry points.
    pub(crate) fn emit_wasm_to_native_adapter(&mut self, func_index: u32) -> Result<(), Error> {
        let label = self.info.func_labels[func_index as usize];
        self.labels.pin(label, &mut self.out)?;
        let import = self.meta.functions[func_index as usize]
            .imported
            .clone()
            .expect("adapter target is an import");
        let sig_index = self.meta.functions[func_index as usize].sig_index;
        let sig = self.meta.signatures[sig_index as usize].clone();
        if sig.results.len() > 1 {
            return Err(Error::FeatureNotSupported(
                UnsupportedKind::V2MultiValueReturns,
            ));
        }
        let abi = if self.config.v2_imports {
            ImportAbi::V2
        } else {
            import.abi
        };

        // The adapter is a Wasm callee: indirect callers only saved the
        // parameter registers, so every Wasm-callee-saved register the
        // native call may clobber must be preserved here.
        let mut tracker = RegStackTracker::default();
        let mut wasm_positions: Vec<(Option<Reg>, MachineType, u32)> = Vec::new();
        for &ty in &sig.params {
            let reg = self.wasm_arg_position(&mut tracker, ty);
            let stack_off = tracker.stack_bytes.wrapping_sub(8);
            wasm_positions.push((reg, ty, stack_off));
        }
        let incoming_stack = tracker.stack_bytes;

        let param_regs: Vec<Reg> = wasm_positions.iter().filter_map(|&(reg, ..)| reg).collect();
        let to_save: Vec<Reg> = NativeAbi::VOL_REGS
            .iter()
            .copied()
            .filter(|&reg| {
                let pool = if reg.is_gpr() {
                    WasmAbi::gpr(self.config.bounds_checks)
                } else {
                    WasmAbi::FPR
                };
                pool.contains(&reg)
                    && !param_regs.contains(&reg)
                    && !WasmAbi::is_res_scratch(self.config.bounds_checks, reg)
            })
            .collect();

        let save_area = (to_save.len() as u32 * 8).next_multiple_of(8);
        let (native_width, buffer_width) = match abi {
            ImportAbi::V1 => (self.stack_param_width(sig_index, true), 0),
            ImportAbi::V2 => (0, (sig.params.len() + sig.results.len()) as u32 * 8),
        };
        let mut total = save_area + native_width + buffer_width + NativeAbi::SHADOW_SPACE_SIZE;
        if total % 16 != 8 {
            total += 8;
        }
        self.instr(&enc::SUB_RM64_IMM32SX)
            .set_r4rm(Reg::Sp)
            .set_imm32(total)
            .emit(&mut self.out)?;
        let of_native = NativeAbi::SHADOW_SPACE_SIZE;
        let of_buffer = of_native + native_width;
        let of_saves = of_buffer + buffer_width;
        for (i, &reg) in to_save.iter().enumerate() {
            let wide = MachineType::I64;
            let storage = VariableStorage::stack(wide, (of_saves + 8 * i as u32) as i32);
            if reg.is_gpr() {
                self.emit_move(storage, VariableStorage::reg(wide, reg), false)?;
            } else {
                self.emit_move(
                    VariableStorage::stack(MachineType::F64, (of_saves + 8 * i as u32) as i32),
                    VariableStorage::reg(MachineType::F64, reg),
                    false,
                )?;
            }
        }
        self.move_globals_to_linkdata()?;

        match abi {
            ImportAbi::V1 => {
                let mut native_tracker = RegStackTracker::default();
                let mut resolver = RegisterCopyResolver::default();
                let mut native_stack = of_native;
                for &(wasm_reg, ty, stack_off) in &wasm_positions {
                    let src = match wasm_reg {
                        Some(reg) => VariableStorage::reg(ty, reg),
                        None => VariableStorage::stack(
                            ty,
                            (total + 8 + stack_off) as i32,
                        ),
                    };
                    match self.native_arg_position(&mut native_tracker, ty) {
                        Some(reg) => resolver.push(ty, reg, src),
                        None => {
                            self.emit_move(
                                VariableStorage::stack(ty, native_stack as i32),
                                src,
                                false,
                            )?;
                            native_stack += 8;
                        }
                    }
                }
                let ctx = VariableStorage::link_data(MachineType::I64, LinkDataLayout::CUSTOM_CTX);
                match self.native_arg_position(&mut native_tracker, MachineType::I64) {
                    Some(reg) => resolver.push(MachineType::I64, reg, ctx),
                    None => {
                        self.emit_move(
                            VariableStorage::stack(MachineType::I64, native_stack as i32),
                            ctx,
                            false,
                        )?;
                    }
                }
                resolver.resolve(self)?;
            }
            ImportAbi::V2 => {
                for (i, &(wasm_reg, ty, stack_off)) in wasm_positions.iter().enumerate() {
                    let src = match wasm_reg {
                        Some(reg) => VariableStorage::reg(ty, reg),
                        None => VariableStorage::stack(ty, (total + 8 + stack_off) as i32),
                    };
                    self.emit_move(
                        VariableStorage::stack(ty, (of_buffer + 8 * i as u32) as i32),
                        src,
                        false,
                    )?;
                }
                self.instr(&enc::LEA_R64_M)
                    .set_r(NativeAbi::GP_PARAMS[0])
                    .set_m4rm(Reg::Sp, of_buffer as i32)
                    .emit(&mut self.out)?;
                self.instr(&enc::LEA_R64_M)
                    .set_r(NativeAbi::GP_PARAMS[1])
                    .set_m4rm(Reg::Sp, (of_buffer + sig.params.len() as u32 * 8) as i32)
                    .emit(&mut self.out)?;
                self.instr(&enc::MOV_R64_RM64)
                    .set_r(NativeAbi::GP_PARAMS[2])
                    .set_m4rm(pinned::LIN_MEM, LinkDataLayout::CUSTOM_CTX)
                    .emit(&mut self.out)?;
            }
        }

        match import.symbol {
            NativeSymbol::Static { addr } => {
                self.emit_mov_imm_to_gpr(Reg::A, MachineType::I64, addr as u64, false)?;
                self.instr(&enc::CALL_RM64).set_r4rm(Reg::A).emit(&mut self.out)?;
            }
            NativeSymbol::Dynamic => {
                self.instr(&enc::CALL_RM64)
                    .set_m4rm(pinned::LIN_MEM, self.layout.import_ptr_offset(func_index))
                    .emit(&mut self.out)?;
            }
        }

        self.reload_mem_size()?;
        self.recover_globals_to_regs()?;
        if abi == ImportAbi::V2 {
            if let Some(&ty) = sig.results.first() {
                let slot = of_buffer + sig.params.len() as u32 * 8;
                let target = if ty.is_int() {
                    WasmAbi::GP_RET_REGS[0]
                } else {
                    WasmAbi::FP_RET_REGS[0]
                };
                self.emit_move(
                    VariableStorage::reg(ty, target),
                    VariableStorage::stack(ty, slot as i32),
                    false,
                )?;
            }
        }
        for (i, &reg) in to_save.iter().enumerate() {
            let off = (of_saves + 8 * i as u32) as i32;
            if reg.is_gpr() {
                self.emit_move(
                    VariableStorage::reg(MachineType::I64, reg),
                    VariableStorage::stack(MachineType::I64, off),
                    false,
                )?;
            } else {
                self.emit_move(
                    VariableStorage::reg(MachineType::F64, reg),
                    VariableStorage::stack(MachineType::F64, off),
                    false,
                )?;
            }
        }
        debug_assert_eq!(incoming_stack % 8, 0);
        self.instr(&enc::ADD_RM64_IMM32SX)
            .set_r4rm(Reg::Sp)
            .set_imm32(total)
            .emit(&mut self.out)?;
        self.instr(&enc::RET).emit(&mut self.out)
    }

    // --- module helpers ---------------------------------------------------

    /// Emits the per-module helper functions and records their offsets.
    pub(crate) fn emit_module_helpers(&mut self) -> Result<(), Error> {
        // Generic trap handler: unwind to the armed entry adapter.
        self.info.helpers.generic_trap_handler = self.out.pos();
        self.instr(&enc::MOV_R64_RM64)
            .set_r(Reg::Sp)
            .set_m4rm(pinned::LIN_MEM, LinkDataLayout::TRAP_STACK_REENTRY)
            .emit(&mut self.out)?;
        self.instr(&enc::JMP_RM64)
            .set_m4rm(pinned::LIN_MEM, LinkDataLayout::TRAP_REENTRY_PC)
            .emit(&mut self.out)?;

        // The memory helper wrapper: saves the whole volatile context,
        // calls the host helper `(ctx, a, b, c, mode)` and reports back
        // through the pinned index register.
        let common = self.emit_memory_wrapper_common()?;
        for (mode, slot) in [(0u32, 0usize), (1, 1), (2, 2), (3, 3)] {
            let stub = self.out.pos();
            match slot {
                0 => self.info.helpers.extension_request = stub,
                1 => self.info.helpers.mem_grow = stub,
                2 => self.info.helpers.mem_copy = stub,
                _ => self.info.helpers.mem_fill = stub,
            }
            self.emit_mov_imm_to_gpr(Reg::R15, MachineType::I32, u64::from(mode), true)?;
            let jump = self.prepare_jmp(false, None)?;
            jump.link_to_binary_pos(&mut self.out, common)?;
        }

        self.emit_stacktrace_collector()?;

        if self.config.bounds_checks == BoundsCheckMode::Guarded {
            // Signal-mode landing pad: the host signal handler redirects
            // faulting accesses here.
            self.info.helpers.landing_pad = self.out.pos();
            self.emit_mov_imm_to_gpr(
                pinned::TRAP_REG,
                MachineType::I32,
                u64::from(u8::from(TrapCode::LinMemOutOfBoundsAccess)),
                true,
            )?;
            let jump = self.prepare_jmp(false, None)?;
            jump.link_to_binary_pos(&mut self.out, self.info.helpers.generic_trap_handler)?;
        }
        Ok(())
    }

    /// The shared body of the memory-helper wrappers.
    ///
    /// Inputs: `a` in the pinned index register, `b` in `r13`, `c` in
    /// `r14`, mode in `r15`. Returns the helper's result in the index
    /// register and refreshes the pinned memory-size cache.
    fn emit_memory_wrapper_common(&mut self) -> Result<u32, Error> {
        let start = self.out.pos();
        let arg = pinned::INDIRECT_CALL_REG;
        let saves = [
            Reg::Bp,
            Reg::A,
            Reg::C,
            Reg::Di,
            Reg::Si,
            Reg::R8,
            Reg::R9,
            Reg::R10,
            Reg::R11,
        ];
        for &reg in &saves {
            self.instr(&enc::PUSH_R64).set_r(reg).emit(&mut self.out)?;
        }
        let xmm_area = 16 * 8;
        self.instr(&enc::SUB_RM64_IMM32SX)
            .set_r4rm(Reg::Sp)
            .set_imm32(xmm_area)
            .emit(&mut self.out)?;
        for i in 0..15u32 {
            let reg = xmm(i);
            self.instr(&enc::MOVSD_RMF_RF)
                .set_r(reg)
                .set_m4rm(Reg::Sp, 8 * i as i32)
                .emit(&mut self.out)?;
        }
        // Align dynamically; the wrapper is reachable from any call-site
        // parity.
        self.instr(&enc::MOV_RM64_R64)
            .set_r(Reg::Sp)
            .set_r4rm(Reg::Bp)
            .emit(&mut self.out)?;
        self.instr(&enc::AND_RM64_IMM8SX)
            .set_r4rm(Reg::Sp)
            .set_imm8(0xF0)
            .emit(&mut self.out)?;

        // (ctx, a, b, c, mode)
        self.instr(&enc::MOV_R64_RM64)
            .set_r(NativeAbi::GP_PARAMS[0])
            .set_m4rm(pinned::LIN_MEM, LinkDataLayout::CUSTOM_CTX)
            .emit(&mut self.out)?;
        self.instr(&enc::MOV_R64_RM64)
            .set_r(NativeAbi::GP_PARAMS[1])
            .set_r4rm(arg)
            .emit(&mut self.out)?;
        self.instr(&enc::MOV_R64_RM64)
            .set_r(NativeAbi::GP_PARAMS[2])
            .set_r4rm(Reg::R13)
            .emit(&mut self.out)?;
        self.instr(&enc::MOV_R64_RM64)
            .set_r(NativeAbi::GP_PARAMS[3])
            .set_r4rm(Reg::R14)
            .emit(&mut self.out)?;
        if let Some(&mode_reg) = NativeAbi::GP_PARAMS.get(4) {
            self.instr(&enc::MOV_R64_RM64)
                .set_r(mode_reg)
                .set_r4rm(Reg::R15)
                .emit(&mut self.out)?;
        } else {
            // Win64: the fifth argument goes right above the shadow space.
            self.instr(&enc::MOV_RM64_R64)
                .set_r(Reg::R15)
                .set_m4rm(Reg::Sp, NativeAbi::SHADOW_SPACE_SIZE as i32)
                .emit(&mut self.out)?;
        }
        self.instr(&enc::MOV_R64_RM64)
            .set_r(Reg::A)
            .set_m4rm(pinned::LIN_MEM, LinkDataLayout::MEMORY_HELPER_PTR)
            .emit(&mut self.out)?;
        self.instr(&enc::CALL_RM64).set_r4rm(Reg::A).emit(&mut self.out)?;

        self.instr(&enc::MOV_RM64_R64)
            .set_r(Reg::Bp)
            .set_r4rm(Reg::Sp)
            .emit(&mut self.out)?;
        self.instr(&enc::MOV_R64_RM64)
            .set_r(arg)
            .set_r4rm(Reg::A)
            .emit(&mut self.out)?;
        for i in 0..15u32 {
            let reg = xmm(i);
            self.instr(&enc::MOVSD_RF_RMF)
                .set_r(reg)
                .set_m4rm(Reg::Sp, 8 * i as i32)
                .emit(&mut self.out)?;
        }
        self.instr(&enc::ADD_RM64_IMM32SX)
            .set_r4rm(Reg::Sp)
            .set_imm32(xmm_area)
            .emit(&mut self.out)?;
        for &reg in saves.iter().rev() {
            self.instr(&enc::POP_R64).set_r(reg).emit(&mut self.out)?;
        }
        self.reload_mem_size()?;
        self.instr(&enc::RET).emit(&mut self.out)?;
        Ok(start)
    }

    /// Emits the stacktrace collector: walks the frame record chain into
    /// the auxiliary linked-memory buffer, bounded by the configured
    /// record count.
    fn emit_stacktrace_collector(&mut self) -> Result<(), Error> {
        use super::regs::stacktrace;
        self.info.helpers.stacktrace_collector = self.out.pos();
        self.instr(&enc::MOV_R64_RM64)
            .set_r(stacktrace::FRAME_REF)
            .set_m4rm(pinned::LIN_MEM, LinkDataLayout::LAST_FRAME_REF_PTR)
            .emit(&mut self.out)?;
        self.emit_mov_imm_to_gpr(
            stacktrace::COUNTER,
            MachineType::I32,
            u64::from(self.config.stacktrace_record_count),
            false,
        )?;
        self.instr(&enc::MOV_R64_RM64)
            .set_r(stacktrace::SCRATCH)
            .set_m4rm(pinned::LIN_MEM, LinkDataLayout::LINKED_MEM_PTR)
            .emit(&mut self.out)?;

        let loop_head = self.out.pos();
        self.instr(&enc::TEST_RM64_R64)
            .set_r4rm(stacktrace::FRAME_REF)
            .set_r(stacktrace::FRAME_REF)
            .emit(&mut self.out)?;
        let done_null = self.prepare_jmp(true, Some(enc::Cc::E))?;
        self.instr(&enc::CMP_RM32_IMM8SX)
            .set_r4rm(stacktrace::COUNTER)
            .set_imm8(0)
            .emit(&mut self.out)?;
        let done_count = self.prepare_jmp(true, Some(enc::Cc::E))?;

        self.instr(&enc::MOV_R64_RM64)
            .set_r(Reg::A)
            .set_m4rm(stacktrace::FRAME_REF, 0)
            .emit(&mut self.out)?;
        self.instr(&enc::MOV_RM64_R64)
            .set_r(Reg::A)
            .set_m4rm(stacktrace::SCRATCH, 0)
            .emit(&mut self.out)?;
        self.instr(&enc::ADD_RM64_IMM8SX)
            .set_r4rm(stacktrace::SCRATCH)
            .set_imm8(8)
            .emit(&mut self.out)?;
        self.instr(&enc::MOV_R64_RM64)
            .set_r(stacktrace::FRAME_REF)
            .set_m4rm(stacktrace::FRAME_REF, 8)
            .emit(&mut self.out)?;
        self.instr(&enc::SUB_RM32_IMM8SX)
            .set_r4rm(stacktrace::COUNTER)
            .set_imm8(1)
            .emit(&mut self.out)?;
        let back = self.prepare_jmp(true, None)?;
        back.link_to_binary_pos(&mut self.out, loop_head)?;
        done_null.link_to_here(&mut self.out)?;
        done_count.link_to_here(&mut self.out)?;
        self.instr(&enc::RET).emit(&mut self.out)
    }
}

fn xmm(i: u32) -> Reg {
    match i {
        0 => Reg::Xmm0,
        1 => Reg::Xmm1,
        2 => Reg::Xmm2,
        3 => Reg::Xmm3,
        4 => Reg::Xmm4,
        5 => Reg::Xmm5,
        6 => Reg::Xmm6,
        7 => Reg::Xmm7,
        8 => Reg::Xmm8,
        9 => Reg::Xmm9,
        10 => Reg::Xmm10,
        11 => Reg::Xmm11,
        12 => Reg::Xmm12,
        13 => Reg::Xmm13,
        14 => Reg::Xmm14,
        _ => Reg::Xmm15,
    }
}
