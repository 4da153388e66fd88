use super::{
    elem::{ElemKind, ElemRef, StackElement},
    labels::LabelRef,
    stack::Stack,
    storage::VariableStorage,
};
use crate::{
    binary::HelperOffsets,
    isa::{
        x86_64::regs::{Reg, RegMask},
        BranchCond,
    },
    Error, LimitKind,
};
use wasp_core::MachineType;

/// Upper bound on locals per function.
pub const NUM_DIRECT_LOCALS: u32 = 1 << 16;

/// Where a local variable lives for the whole function.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LocalStorage {
    /// A register from the locals pool.
    Reg(Reg),
    /// A frame slot at the given frame position.
    FramePos(u32),
    /// An incoming stack parameter at the given byte offset above the
    /// return address.
    StackParam(u32),
}

/// Per-local descriptor created at function prologue.
#[derive(Debug, Copy, Clone)]
pub struct LocalDef {
    pub ty: MachineType,
    pub storage: LocalStorage,
    /// Frame position of the save slot of a register-homed local; used
    /// around calls that clobber the home register.
    pub save_pos: Option<u32>,
}

/// Where a global variable lives for the whole module.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GlobalStorage {
    /// A register dedicated at module prologue.
    Reg(Reg),
    /// Its link-data slot.
    LinkData(i32),
}

/// Per-function compiler state, reset between functions.
#[derive(Debug, Default)]
pub struct FuncState {
    pub index: u32,
    pub sig_index: u32,
    pub num_params: u32,
    pub num_locals: u32,
    pub num_locals_in_gpr: u32,
    pub num_locals_in_fpr: u32,
    /// Bytes of incoming stack parameters.
    pub param_width: u32,
    /// Frame bytes holding slot locals and register-local save slots.
    pub direct_locals_width: u32,
    /// Physical distance between the entry SP and the current SP.
    pub stack_frame_size: u32,
    /// High-water mark of allocated frame positions.
    pub frame_used: u32,
    pub local_defs: Vec<LocalDef>,
}

impl FuncState {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Per-module and per-function bookkeeping: global storage assignments,
/// function body labels, helper offsets, the per-register reverse index
/// into the operand stack, and the deferred-comparison latch.
#[derive(Debug, Default)]
pub struct ModuleInfo {
    /// Storage of every global, assigned at module prologue.
    pub global_storage: Vec<GlobalStorage>,
    /// Types of every global, copied from the metadata.
    pub global_types: Vec<MachineType>,
    /// Mask of registers permanently bound to globals.
    pub global_regs: RegMask,
    /// Per function index: the label of its body (or adapter), used as
    /// the patch-chain head for calls to not-yet-emitted functions.
    pub func_labels: Vec<LabelRef>,
    /// Binary offsets of the per-module helper functions.
    pub helpers: HelperOffsets,
    /// Initial size of the function table.
    pub table_initial: u32,
    /// State of the function currently being compiled.
    pub fnc: FuncState,
    /// For each register, the last stack element referring to it.
    ///
    /// This is the sole oracle for "is this register free" and "which
    /// elements must be rewritten when this register is relocated".
    pub ref_map: [Option<ElemRef>; 32],
    /// The branch condition of the pending comparison, if any.
    pub last_bc: Option<BranchCond>,
    /// Bytecode offset of the opcode being lowered (breadcrumbs).
    pub bytecode_pos: u32,
}

impl ModuleInfo {
    /// Resets the per-function state.
    pub fn reset_function(&mut self) {
        self.fnc.reset();
        self.ref_map = [None; 32];
        self.last_bc = None;
    }

    /// Lowers a stack element to its normalized storage description.
    pub fn storage_of(&self, elem: &StackElement) -> VariableStorage {
        match elem.kind {
            ElemKind::Invalid | ElemKind::PendingCmp { .. } | ElemKind::Ctrl { .. } => {
                VariableStorage::Invalid
            }
            ElemKind::Constant { ty, bits } => VariableStorage::constant(ty, bits),
            ElemKind::Scratch { ty, reg } => VariableStorage::reg(ty, reg),
            ElemKind::Temp { ty, pos } => {
                VariableStorage::stack(ty, self.sp_offset_of_frame_pos(pos))
            }
            ElemKind::Local { ty, index } => match self.fnc.local_defs[index as usize].storage {
                LocalStorage::Reg(reg) => VariableStorage::reg(ty, reg),
                LocalStorage::FramePos(pos) => {
                    VariableStorage::stack(ty, self.sp_offset_of_frame_pos(pos))
                }
                LocalStorage::StackParam(offset) => VariableStorage::stack(
                    ty,
                    self.fnc.stack_frame_size as i32 + 8 + offset as i32,
                ),
            },
            ElemKind::Global { ty, index } => match self.global_storage[index as usize] {
                GlobalStorage::Reg(reg) => VariableStorage::reg(ty, reg),
                GlobalStorage::LinkData(offset) => VariableStorage::link_data(ty, offset),
            },
        }
    }

    /// Converts a frame position into the current SP-relative offset.
    ///
    /// Frame positions are fixed at allocation time and measured downward
    /// from the entry SP; the SP-relative offset changes whenever the
    /// frame grows or shrinks.
    pub fn sp_offset_of_frame_pos(&self, pos: u32) -> i32 {
        debug_assert!(pos + 8 <= self.fnc.stack_frame_size);
        (self.fnc.stack_frame_size - pos - 8) as i32
    }

    /// Returns the register an element's storage occupies, if any.
    pub fn reg_of(&self, elem: &StackElement) -> Option<Reg> {
        self.storage_of(elem).as_reg()
    }

    /// Returns a protection mask covering the element's register, or the
    /// empty mask for non-register storages.
    pub fn mask_for_elem(&self, elem: Option<&StackElement>) -> RegMask {
        elem.and_then(|elem| self.reg_of(elem))
            .map_or(RegMask::none(), RegMask::of)
    }

    /// Allocates `bytes` of fresh frame positions and returns the first.
    ///
    /// The caller is responsible for growing the physical frame when the
    /// high-water mark exceeds [`FuncState::stack_frame_size`].
    pub fn alloc_frame_pos(&mut self, bytes: u32) -> Result<u32, Error> {
        let pos = self.fnc.frame_used;
        self.fnc.frame_used = self
            .fnc
            .frame_used
            .checked_add(bytes)
            .filter(|&used| used <= i32::MAX as u32)
            .ok_or(Error::ImplementationLimit(LimitKind::StackFrameTooLarge))?;
        Ok(pos)
    }

    // --- reference chain maintenance ------------------------------------

    /// Pushes `elem` and, if its storage is a register, threads it into
    /// that register's reference chain.
    pub fn push_linked(
        &mut self,
        stack: &mut Stack,
        elem: StackElement,
    ) -> Result<ElemRef, Error> {
        let at = stack.push(elem)?;
        self.link(stack, at);
        Ok(at)
    }

    /// Threads the already-inserted element at `at` into its register's
    /// reference chain.
    pub fn link(&mut self, stack: &mut Stack, at: ElemRef) {
        let Some(reg) = self.reg_of(stack.get(at)) else {
            return;
        };
        let prev = self.ref_map[reg as usize & 31];
        {
            let elem = stack.get_mut(at);
            elem.prev_occ = prev;
            elem.next_occ = None;
        }
        if let Some(prev) = prev {
            stack.get_mut(prev).next_occ = Some(at);
        }
        self.ref_map[reg as usize & 31] = Some(at);
    }

    /// Unthreads the element at `at` from its reference chain. Must be
    /// called before erasing or rewriting the element.
    pub fn unlink(&mut self, stack: &mut Stack, at: ElemRef) {
        let elem = *stack.get(at);
        let Some(reg) = self.reg_of(&elem) else {
            return;
        };
        if let Some(prev) = elem.prev_occ {
            stack.get_mut(prev).next_occ = elem.next_occ;
        }
        if let Some(next) = elem.next_occ {
            stack.get_mut(next).prev_occ = elem.prev_occ;
        } else {
            debug_assert_eq!(self.ref_map[reg as usize & 31], Some(at));
            self.ref_map[reg as usize & 31] = elem.prev_occ;
        }
        let elem = stack.get_mut(at);
        elem.prev_occ = None;
        elem.next_occ = None;
    }

    /// Pops the top element, unthreading it from its chain first.
    pub fn pop_unlinked(&mut self, stack: &mut Stack) -> StackElement {
        let at = stack.last().expect("pop from empty operand stack");
        self.unlink(stack, at);
        stack.pop()
    }

    /// Erases the element at `at`, unthreading it first.
    pub fn erase_unlinked(&mut self, stack: &mut Stack, at: ElemRef) -> StackElement {
        self.unlink(stack, at);
        stack.erase(at)
    }

    /// Returns `true` if no stack element refers to `reg`.
    pub fn reg_unreferenced(&self, reg: Reg) -> bool {
        self.ref_map[reg as usize & 31].is_none()
    }

    /// Returns the number of stack elements referring to `reg`.
    pub fn reg_use_count(&self, stack: &Stack, reg: Reg) -> u32 {
        let mut count = 0;
        let mut walk = self.ref_map[reg as usize & 31];
        while let Some(at) = walk {
            count += 1;
            walk = stack.get(at).prev_occ;
        }
        count
    }

    /// Rewrites every stack element whose storage is `from` so it now
    /// describes `to`, rethreading reference chains.
    ///
    /// `to` must either be a register with an empty reference chain or a
    /// non-register storage.
    pub fn rewrite_references(&mut self, stack: &mut Stack, from: Reg, to: VariableStorage) {
        if let Some(to_reg) = to.as_reg() {
            debug_assert!(self.reg_unreferenced(to_reg), "spill target in use");
        }
        let mut walk = core::mem::take(&mut self.ref_map[from as usize & 31]);
        while let Some(at) = walk {
            let prev = stack.get(at).prev_occ;
            {
                let elem = stack.get_mut(at);
                let ty = elem.ty().expect("reference chains hold value elements");
                elem.kind = match to {
                    VariableStorage::Register { reg, .. } => ElemKind::Scratch { ty, reg },
                    VariableStorage::StackMemory { .. } => {
                        // Recover the frame position from the target; the
                        // caller allocated one slot for the whole chain.
                        ElemKind::Temp {
                            ty,
                            pos: self.frame_pos_of_storage(&to),
                        }
                    }
                    _ => unreachable!("spill targets are registers or frame slots"),
                };
                elem.prev_occ = None;
                elem.next_occ = None;
            }
            if to.as_reg().is_some() {
                self.link(stack, at);
            }
            walk = prev;
        }
    }

    /// Recovers the frame position behind a `StackMemory` storage.
    pub fn frame_pos_of_storage(&self, storage: &VariableStorage) -> u32 {
        match *storage {
            VariableStorage::StackMemory { sp_offset, .. } => {
                debug_assert!(sp_offset >= 0);
                self.fnc.stack_frame_size - sp_offset as u32 - 8
            }
            _ => unreachable!("not a frame storage"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasp_core::MachineType;

    fn setup() -> (ModuleInfo, Stack) {
        let mut info = ModuleInfo::default();
        info.fnc.stack_frame_size = 64;
        (info, Stack::new().unwrap())
    }

    #[test]
    fn chains_track_last_occurrence_per_register() {
        let (mut info, mut stack) = setup();
        let first = info
            .push_linked(&mut stack, StackElement::scratch(MachineType::I32, Reg::A))
            .unwrap();
        let second = info
            .push_linked(&mut stack, StackElement::scratch(MachineType::I32, Reg::A))
            .unwrap();
        assert_eq!(info.ref_map[Reg::A as usize], Some(second));
        assert_eq!(stack.get(second).prev_occ, Some(first));
        assert_eq!(stack.get(first).next_occ, Some(second));
        assert_eq!(info.reg_use_count(&stack, Reg::A), 2);

        let popped = info.pop_unlinked(&mut stack);
        assert_eq!(popped.scratch_reg(), Some(Reg::A));
        assert_eq!(info.ref_map[Reg::A as usize], Some(first));
        assert_eq!(stack.get(first).next_occ, None);
        assert_eq!(info.reg_use_count(&stack, Reg::A), 1);

        info.pop_unlinked(&mut stack);
        assert!(info.reg_unreferenced(Reg::A));
    }

    #[test]
    fn unlink_in_the_middle_of_a_chain() {
        let (mut info, mut stack) = setup();
        let a = info
            .push_linked(&mut stack, StackElement::scratch(MachineType::I64, Reg::D))
            .unwrap();
        let b = info
            .push_linked(&mut stack, StackElement::scratch(MachineType::I64, Reg::D))
            .unwrap();
        let c = info
            .push_linked(&mut stack, StackElement::scratch(MachineType::I64, Reg::D))
            .unwrap();
        info.erase_unlinked(&mut stack, b);
        assert_eq!(stack.get(a).next_occ, Some(c));
        assert_eq!(stack.get(c).prev_occ, Some(a));
        assert_eq!(info.reg_use_count(&stack, Reg::D), 2);
    }

    #[test]
    fn rewrite_moves_a_whole_chain_to_a_spill_slot() {
        let (mut info, mut stack) = setup();
        info.push_linked(&mut stack, StackElement::scratch(MachineType::I32, Reg::C))
            .unwrap();
        info.push_linked(&mut stack, StackElement::scratch(MachineType::I32, Reg::C))
            .unwrap();
        let slot = VariableStorage::stack(MachineType::I32, info.sp_offset_of_frame_pos(16));
        info.rewrite_references(&mut stack, Reg::C, slot);
        assert!(info.reg_unreferenced(Reg::C));
        for at in stack.iter().collect::<Vec<_>>() {
            assert_eq!(
                info.storage_of(stack.get(at)),
                VariableStorage::stack(MachineType::I32, 40)
            );
        }
    }

    #[test]
    fn local_storage_tracks_frame_growth() {
        let (mut info, _stack) = setup();
        info.fnc.local_defs.push(LocalDef {
            ty: MachineType::I32,
            storage: LocalStorage::FramePos(0),
            save_pos: None,
        });
        let local = StackElement::new(ElemKind::Local {
            ty: MachineType::I32,
            index: 0,
        });
        assert_eq!(
            info.storage_of(&local),
            VariableStorage::stack(MachineType::I32, 56)
        );
        info.fnc.stack_frame_size += 32;
        assert_eq!(
            info.storage_of(&local),
            VariableStorage::stack(MachineType::I32, 88)
        );
    }
}
