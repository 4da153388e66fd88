/// An AArch64 register.
///
/// `X0`..`X30` are the general purpose registers; 31 encodes `sp` or `xzr`
/// depending on the instruction. `V0`..`V31` are the SIMD/FP registers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
#[rustfmt::skip]
pub enum Reg {
    X0 = 0, X1, X2, X3, X4, X5, X6, X7,
    X8, X9, X10, X11, X12, X13, X14, X15,
    X16, X17, X18, X19, X20, X21, X22, X23,
    X24, X25, X26, X27, X28, X29, X30,
    /// `sp` or `xzr`, depending on the instruction class.
    SpZr = 31,
    V0 = 32, V1, V2, V3, V4, V5, V6, V7,
    V8, V9, V10, V11, V12, V13, V14, V15,
    V16, V17, V18, V19, V20, V21, V22, V23,
    V24, V25, V26, V27, V28, V29, V30, V31,
}

impl Reg {
    /// Returns `true` for a general purpose register (including `SpZr`).
    pub fn is_gpr(self) -> bool {
        (self as u8) < 32
    }

    /// The 5-bit register field value.
    pub fn enc(self) -> u32 {
        u32::from(self as u8 & 0x1F)
    }
}

/// Allocation pools and pinned registers of the AArch64 port.
///
/// Ordering rules match the other targets: the native return registers sit
/// among the reserved scratch slots at the end of each pool, the leading
/// slots are as congruent as possible with the native parameter registers.
/// `x18` is platform-reserved and never allocated; `x29`/`x30` are frame
/// pointer and link register.
pub struct WasmAbi;

impl WasmAbi {
    /// Reserved scratch registers at the end of each pool.
    pub const RES_SCRATCH: usize = 4;
    /// Leading parameters passed in registers.
    pub const REGS_FOR_PARAMS: usize = 4;

    /// Allocatable general purpose registers.
    pub const GPR: &'static [Reg] = &[
        Reg::X2,
        Reg::X3,
        Reg::X4,
        Reg::X5,
        Reg::X6,
        Reg::X7,
        Reg::X8,
        Reg::X9,
        Reg::X10,
        Reg::X11,
        Reg::X12,
        Reg::X13,
        Reg::X14,
        Reg::X15,
        Reg::X21,
        Reg::X22,
        Reg::X23,
        Reg::X24,
        Reg::X25,
        Reg::X26,
        Reg::X27,
        Reg::X28,
        // last 4 reserved as scratch registers
        Reg::X0,
        Reg::X1,
        Reg::X16,
        Reg::X17,
    ];

    /// Allocatable SIMD/FP registers.
    pub const FPR: &'static [Reg] = &[
        Reg::V4,
        Reg::V5,
        Reg::V6,
        Reg::V7,
        Reg::V8,
        Reg::V9,
        Reg::V10,
        Reg::V11,
        Reg::V12,
        Reg::V13,
        Reg::V14,
        Reg::V15,
        Reg::V16,
        Reg::V17,
        Reg::V18,
        Reg::V19,
        Reg::V20,
        Reg::V21,
        Reg::V22,
        Reg::V23,
        // last 4 reserved as scratch registers
        Reg::V0,
        Reg::V1,
        Reg::V2,
        Reg::V3,
    ];
}

/// Registers with a dedicated, pinned meaning.
pub mod pinned {
    use super::Reg;

    /// Base of linear memory.
    pub const LIN_MEM: Reg = Reg::X19;
    /// Cached linear memory size minus 8 (explicit bounds checks).
    pub const MEM_SIZE: Reg = Reg::X20;
    /// Carries the trap code into the generic trap handler.
    pub const TRAP_REG: Reg = Reg::X0;
    /// Carries the table index during an indirect call.
    pub const INDIRECT_CALL_REG: Reg = Reg::X9;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_do_not_contain_pinned_or_reserved_registers() {
        for banned in [pinned::LIN_MEM, pinned::MEM_SIZE, Reg::X18, Reg::X29, Reg::X30, Reg::SpZr] {
            assert!(!WasmAbi::GPR.contains(&banned), "{banned:?}");
        }
    }

    #[test]
    fn return_registers_are_reserved_scratch() {
        let scratch = &WasmAbi::GPR[WasmAbi::GPR.len() - WasmAbi::RES_SCRATCH..];
        assert!(scratch.contains(&Reg::X0));
        assert!(scratch.contains(&Reg::X1));
        let scratch = &WasmAbi::FPR[WasmAbi::FPR.len() - WasmAbi::RES_SCRATCH..];
        assert!(scratch.contains(&Reg::V0));
        assert!(scratch.contains(&Reg::V1));
    }
}
