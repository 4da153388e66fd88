use crate::BoundsCheckMode;
use wasp_core::MachineType;

/// An x86-64 register, general purpose or SSE.
///
/// The discriminant is the hardware encoding: 0..=15 are the general
/// purpose registers, 16..=31 are `xmm0..=xmm15`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    A = 0,
    C = 1,
    D = 2,
    B = 3,
    Sp = 4,
    Bp = 5,
    Si = 6,
    Di = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
    Xmm0 = 16,
    Xmm1 = 17,
    Xmm2 = 18,
    Xmm3 = 19,
    Xmm4 = 20,
    Xmm5 = 21,
    Xmm6 = 22,
    Xmm7 = 23,
    Xmm8 = 24,
    Xmm9 = 25,
    Xmm10 = 26,
    Xmm11 = 27,
    Xmm12 = 28,
    Xmm13 = 29,
    Xmm14 = 30,
    Xmm15 = 31,
}

impl Reg {
    /// Returns `true` if `self` is a general purpose register.
    pub fn is_gpr(self) -> bool {
        (self as u8) < 16
    }

    /// Returns `true` if `self` is an SSE register.
    pub fn is_fpr(self) -> bool {
        !self.is_gpr()
    }

    /// Returns `true` if `self` can hold a value of type `ty`.
    pub fn holds(self, ty: MachineType) -> bool {
        self.is_gpr() == ty.is_int()
    }

    /// The low 3 bits of the hardware encoding (the ModRM field value).
    pub fn enc(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Returns `true` if encoding `self` requires a REX extension bit.
    pub fn needs_rex_ext(self) -> bool {
        ((self as u8) & 0xF) >= 8
    }
}

/// A bitmap over all 32 registers of the ISA.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RegMask(u32);

impl RegMask {
    /// The empty mask.
    pub const fn none() -> Self {
        Self(0)
    }

    /// A mask containing exactly `reg`.
    pub const fn of(reg: Reg) -> Self {
        Self(1 << (reg as u8))
    }

    /// Returns `true` if `reg` is marked in `self`.
    pub fn contains(self, reg: Reg) -> bool {
        self.0 & (1 << (reg as u8)) != 0
    }

    /// Marks `reg` in `self`.
    pub fn insert(&mut self, reg: Reg) {
        self.0 |= 1 << (reg as u8);
    }

    /// Returns `true` if every allocatable register of both pools is
    /// marked. Used by debug assertions guarding instruction selection.
    pub fn all_marked(self) -> bool {
        let mut all = Self::none();
        for &reg in WasmAbi::GPR_GUARDED {
            all.insert(reg);
        }
        for &reg in WasmAbi::FPR {
            all.insert(reg);
        }
        self.0 & all.0 == all.0
    }
}

impl core::ops::BitOr for RegMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for RegMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl core::ops::BitAnd for RegMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl From<Reg> for RegMask {
    fn from(reg: Reg) -> Self {
        Self::of(reg)
    }
}

/// The calling convention used between Wasm functions, and the register
/// allocation pools of the compiler.
///
/// The pool arrays are ordered so that the first slots hold locals and the
/// last [`WasmAbi::RES_SCRATCH_GPR`]/[`WasmAbi::RES_SCRATCH_FPR`] slots are
/// reserved scratch registers. The native-ABI return registers appear among
/// the reserved scratch slots so function results need no extra shuffling.
pub struct WasmAbi;

impl WasmAbi {
    /// Reserved scratch general purpose registers, taken from the end of
    /// the GPR pool.
    pub const RES_SCRATCH_GPR: usize = 4;
    /// Reserved scratch floating point registers, taken from the end of
    /// the FPR pool.
    pub const RES_SCRATCH_FPR: usize = 4;
    /// At most this many leading parameters live in registers; the rest
    /// are passed on the stack.
    pub const REGS_FOR_PARAMS: usize = 4;
    /// General purpose return registers, in allocation order.
    pub const GP_RET_REGS: [Reg; 2] = [Reg::A, Reg::C];
    /// Floating point return registers, in allocation order.
    pub const FP_RET_REGS: [Reg; 2] = [Reg::Xmm0, Reg::Xmm1];

    /// GPR pool with explicit bounds checks: `rsi` is pinned as the cached
    /// memory size and excluded.
    pub const GPR_EXPLICIT: &'static [Reg] = &[
        Reg::Bp,
        Reg::Di,
        Reg::R9,
        Reg::R10,
        Reg::R11,
        Reg::R12,
        Reg::R13,
        Reg::R14,
        Reg::R15,
        // last 4 reserved as scratch registers
        Reg::A,
        Reg::D,
        Reg::C,
        Reg::R8,
    ];

    /// GPR pool with guard-page bounds checks: `rsi` is allocatable.
    pub const GPR_GUARDED: &'static [Reg] = &[
        Reg::Bp,
        Reg::Di,
        Reg::Si,
        Reg::R9,
        Reg::R10,
        Reg::R11,
        Reg::R12,
        Reg::R13,
        Reg::R14,
        Reg::R15,
        // last 4 reserved as scratch registers
        Reg::A,
        Reg::D,
        Reg::C,
        Reg::R8,
    ];

    /// FPR pool; `xmm15` is pinned as the move helper and excluded.
    pub const FPR: &'static [Reg] = &[
        Reg::Xmm4,
        Reg::Xmm5,
        Reg::Xmm6,
        Reg::Xmm7,
        Reg::Xmm8,
        Reg::Xmm9,
        Reg::Xmm10,
        Reg::Xmm11,
        Reg::Xmm12,
        Reg::Xmm13,
        Reg::Xmm14,
        // last 4 reserved as scratch registers
        Reg::Xmm0,
        Reg::Xmm1,
        Reg::Xmm2,
        Reg::Xmm3,
    ];

    /// Returns the GPR pool for the given bounds check mode.
    pub fn gpr(mode: BoundsCheckMode) -> &'static [Reg] {
        match mode {
            BoundsCheckMode::Explicit => Self::GPR_EXPLICIT,
            BoundsCheckMode::Guarded => Self::GPR_GUARDED,
        }
    }

    /// Returns the position of `reg` in its pool, or `None` if it is not
    /// allocatable.
    pub fn reg_pos(mode: BoundsCheckMode, reg: Reg) -> Option<usize> {
        let pool = if reg.is_gpr() { Self::gpr(mode) } else { Self::FPR };
        pool.iter().position(|&candidate| candidate == reg)
    }

    /// Returns `true` if `reg` is one of the reserved scratch registers.
    pub fn is_res_scratch(mode: BoundsCheckMode, reg: Reg) -> bool {
        let (pool, reserve) = if reg.is_gpr() {
            (Self::gpr(mode), Self::RES_SCRATCH_GPR)
        } else {
            (Self::FPR, Self::RES_SCRATCH_FPR)
        };
        match Self::reg_pos(mode, reg) {
            Some(pos) => pos >= pool.len() - reserve,
            None => false,
        }
    }

    /// Returns the scratch sub-slice of the pool for `ty`.
    pub fn scratch_pool(mode: BoundsCheckMode, ty: MachineType) -> &'static [Reg] {
        if ty.is_int() {
            let pool = Self::gpr(mode);
            &pool[pool.len() - Self::RES_SCRATCH_GPR..]
        } else {
            &Self::FPR[Self::FPR.len() - Self::RES_SCRATCH_FPR..]
        }
    }
}

/// Registers with a dedicated, pinned meaning.
pub mod pinned {
    use super::Reg;

    /// Base of linear memory; link data sits at negative offsets below it.
    pub const LIN_MEM: Reg = Reg::B;
    /// Cached linear memory size in bytes minus 8 (explicit checks only).
    pub const MEM_SIZE: Reg = Reg::Si;
    /// Carries the trap code into the generic trap handler.
    pub const TRAP_REG: Reg = Reg::A;
    /// Carries the bytecode position of a trap (debug breadcrumbs only).
    pub const TRAP_POS_REG: Reg = Reg::C;
    /// Carries the table index during an indirect call.
    pub const INDIRECT_CALL_REG: Reg = Reg::D;
    /// Scratch register for memory-to-memory float moves.
    pub const MOVE_HELPER: Reg = Reg::Xmm15;
}

/// Registers usable as scratch during any call sequence.
///
/// These are never parameter, return or indirect-call-index registers in
/// either ABI.
pub const CALL_SCR_REGS: [Reg; 3] = [Reg::R13, Reg::R14, Reg::R15];

/// Register roles of the stacktrace collector helper.
pub mod stacktrace {
    use super::{Reg, CALL_SCR_REGS};

    /// Walks the frame record chain.
    pub const FRAME_REF: Reg = CALL_SCR_REGS[0];
    /// Counts remaining records.
    pub const COUNTER: Reg = CALL_SCR_REGS[1];
    /// General scratch.
    pub const SCRATCH: Reg = CALL_SCR_REGS[2];
}

/// Whether GP and FP parameter registers draw from separate counters or a
/// shared one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegArgAllocation {
    /// System V: 6 GP slots and 8 FP slots, counted independently.
    Separate,
    /// Win64: 4 slots total, shared between GP and FP.
    Mutual,
}

/// The host calling convention, used when Wasm code calls imported native
/// functions and when the host calls exported Wasm functions.
pub struct NativeAbi;

#[cfg(not(windows))]
impl NativeAbi {
    /// General purpose parameter registers, in order.
    pub const GP_PARAMS: &'static [Reg] = &[Reg::Di, Reg::Si, Reg::D, Reg::C, Reg::R8, Reg::R9];
    /// Floating point parameter registers, in order.
    pub const FP_PARAMS: &'static [Reg] = &[
        Reg::Xmm0,
        Reg::Xmm1,
        Reg::Xmm2,
        Reg::Xmm3,
        Reg::Xmm4,
        Reg::Xmm5,
        Reg::Xmm6,
        Reg::Xmm7,
    ];
    /// Callee-saved registers.
    pub const NONVOL_REGS: &'static [Reg] =
        &[Reg::B, Reg::Bp, Reg::R12, Reg::R13, Reg::R14, Reg::R15];
    /// Caller-saved registers.
    pub const VOL_REGS: &'static [Reg] = &[
        Reg::A,
        Reg::C,
        Reg::D,
        Reg::Di,
        Reg::Si,
        Reg::R8,
        Reg::R9,
        Reg::R10,
        Reg::R11,
        Reg::Xmm0,
        Reg::Xmm1,
        Reg::Xmm2,
        Reg::Xmm3,
        Reg::Xmm4,
        Reg::Xmm5,
        Reg::Xmm6,
        Reg::Xmm7,
        Reg::Xmm8,
        Reg::Xmm9,
        Reg::Xmm10,
        Reg::Xmm11,
        Reg::Xmm12,
        Reg::Xmm13,
        Reg::Xmm14,
        Reg::Xmm15,
    ];
    /// General purpose return register.
    pub const GP_RET_REG: Reg = Reg::A;
    /// Floating point return register.
    pub const FP_RET_REG: Reg = Reg::Xmm0;
    /// Bytes of callee-owned spill space below the return address.
    pub const SHADOW_SPACE_SIZE: u32 = 0;
    /// Parameter register counting scheme.
    pub const REG_ARG_ALLOCATION: RegArgAllocation = RegArgAllocation::Separate;
}

#[cfg(windows)]
impl NativeAbi {
    /// General purpose parameter registers, in order.
    pub const GP_PARAMS: &'static [Reg] = &[Reg::C, Reg::D, Reg::R8, Reg::R9];
    /// Floating point parameter registers, in order.
    pub const FP_PARAMS: &'static [Reg] = &[Reg::Xmm0, Reg::Xmm1, Reg::Xmm2, Reg::Xmm3];
    /// Callee-saved registers.
    pub const NONVOL_REGS: &'static [Reg] = &[
        Reg::B,
        Reg::Bp,
        Reg::Di,
        Reg::Si,
        Reg::R12,
        Reg::R13,
        Reg::R14,
        Reg::R15,
        Reg::Xmm6,
        Reg::Xmm7,
        Reg::Xmm8,
        Reg::Xmm9,
        Reg::Xmm10,
        Reg::Xmm11,
        Reg::Xmm12,
        Reg::Xmm13,
        Reg::Xmm14,
        Reg::Xmm15,
    ];
    /// Caller-saved registers.
    pub const VOL_REGS: &'static [Reg] = &[
        Reg::A,
        Reg::C,
        Reg::D,
        Reg::R8,
        Reg::R9,
        Reg::R10,
        Reg::R11,
        Reg::Xmm0,
        Reg::Xmm1,
        Reg::Xmm2,
        Reg::Xmm3,
        Reg::Xmm4,
        Reg::Xmm5,
    ];
    /// General purpose return register.
    pub const GP_RET_REG: Reg = Reg::A;
    /// Floating point return register.
    pub const FP_RET_REG: Reg = Reg::Xmm0;
    /// Bytes of callee-owned spill space below the return address.
    pub const SHADOW_SPACE_SIZE: u32 = 32;
    /// Parameter register counting scheme.
    pub const REG_ARG_ALLOCATION: RegArgAllocation = RegArgAllocation::Mutual;
}

impl NativeAbi {
    /// Returns `true` if `reg` is caller-saved in the native ABI.
    pub fn is_volatile(reg: Reg) -> bool {
        Self::VOL_REGS.contains(&reg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_end_in_the_reserved_scratch_registers() {
        for mode in [BoundsCheckMode::Explicit, BoundsCheckMode::Guarded] {
            let gpr = WasmAbi::gpr(mode);
            for &reg in &gpr[gpr.len() - WasmAbi::RES_SCRATCH_GPR..] {
                assert!(WasmAbi::is_res_scratch(mode, reg), "{reg:?}");
            }
            for &reg in &gpr[..gpr.len() - WasmAbi::RES_SCRATCH_GPR] {
                assert!(!WasmAbi::is_res_scratch(mode, reg), "{reg:?}");
            }
        }
    }

    #[test]
    fn pinned_registers_are_not_allocatable() {
        assert_eq!(WasmAbi::reg_pos(BoundsCheckMode::Explicit, pinned::LIN_MEM), None);
        assert_eq!(WasmAbi::reg_pos(BoundsCheckMode::Explicit, pinned::MEM_SIZE), None);
        assert_eq!(WasmAbi::reg_pos(BoundsCheckMode::Explicit, Reg::Sp), None);
        assert_eq!(WasmAbi::reg_pos(BoundsCheckMode::Explicit, pinned::MOVE_HELPER), None);
        // With guard pages rsi is free for allocation.
        assert!(WasmAbi::reg_pos(BoundsCheckMode::Guarded, Reg::Si).is_some());
    }

    #[test]
    fn return_registers_are_reserved_scratch() {
        for reg in WasmAbi::GP_RET_REGS.iter().chain(&WasmAbi::FP_RET_REGS) {
            assert!(WasmAbi::is_res_scratch(BoundsCheckMode::Explicit, *reg), "{reg:?}");
        }
    }

    #[test]
    fn call_scratch_registers_are_never_native_params() {
        for reg in CALL_SCR_REGS {
            assert!(!NativeAbi::GP_PARAMS.contains(&reg));
            assert!(!NativeAbi::FP_PARAMS.contains(&reg));
        }
    }

    #[test]
    fn regmask_set_operations() {
        let mut mask = RegMask::of(Reg::A) | RegMask::of(Reg::Xmm3);
        assert!(mask.contains(Reg::A));
        assert!(mask.contains(Reg::Xmm3));
        assert!(!mask.contains(Reg::C));
        mask.insert(Reg::C);
        assert!(mask.contains(Reg::C));
        assert!(!mask.all_marked());
        assert_eq!(mask & RegMask::of(Reg::A), RegMask::of(Reg::A));
    }
}
