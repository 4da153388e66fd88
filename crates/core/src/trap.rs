use core::fmt::{self, Display};

macro_rules! define_trap_codes {
    (
        $(
            $( #[$attr:meta] )*
            $ident:ident = $discr:literal => $display:literal
        ),* $(,)?
    ) => {
        /// The reason why emitted machine code aborted execution.
        ///
        /// Discriminant values are wire-stable: they are what the trap
        /// protocol stores in the pinned trap register and what entry point
        /// adapters hand back to the host, so reordering or renumbering them
        /// is a breaking change.
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        #[repr(u8)]
        pub enum TrapCode {
            $(
                $( #[$attr] )*
                $ident = $discr
            ),*
        }

        impl TrapCode {
            /// All trap codes in wire order.
            pub const ALL: &'static [Self] = &[ $( Self::$ident ),* ];
        }

        impl From<TrapCode> for u8 {
            fn from(trap_code: TrapCode) -> Self {
                trap_code as _
            }
        }

        impl TryFrom<u8> for TrapCode {
            type Error = InvalidTrapCode;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $discr => Ok(TrapCode::$ident), )*
                    _ => Err(InvalidTrapCode),
                }
            }
        }

        impl Display for TrapCode {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let message = match self {
                    $( Self::$ident => $display, )*
                };
                f.write_str(message)
            }
        }
    };
}

define_trap_codes! {
    /// A float-to-integer truncation saw NaN or a value outside the
    /// exclusive conversion range.
    TruncOverflow = 1 => "invalid conversion to integer",
    /// An integer division or remainder by zero.
    DivZero = 2 => "integer divide by zero",
    /// `i{32,64}.div_s` with `INT_MIN / -1`.
    DivOverflow = 3 => "integer overflow",
    /// An indirect call index past the end of the table.
    IndirectCallOutOfBounds = 4 => "undefined element",
    /// An indirect call whose table entry has the wrong signature.
    IndirectCallWrongSig = 5 => "indirect call type mismatch",
    /// An indirect call to a table slot that holds no linked function.
    CalledFunctionNotLinked = 6 => "uninitialized element",
    /// A linear memory access outside the current memory size.
    LinMemOutOfBoundsAccess = 7 => "out of bounds memory access",
    /// The host declined to extend linear memory far enough to cover an
    /// access that the bounds check escalated.
    LinMemCouldNotExtend = 8 => "linear memory could not be extended",
    /// A builtin touched the auxiliary linked-memory buffer while it was
    /// held elsewhere.
    LinkedMemoryMux = 9 => "linked memory busy",
    /// The native or Wasm stack pointer crossed its fence value.
    StackFenceBreached = 10 => "call stack exhausted",
    /// A builtin function raised a trap, or execution was interrupted on
    /// request of the host.
    BuiltinTrap = 11 => "builtin function trapped",
}

/// Error returned when converting an out-of-range `u8` into a [`TrapCode`].
#[derive(Debug, Copy, Clone)]
pub struct InvalidTrapCode;

impl Display for InvalidTrapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid u8 representation of a trap code")
    }
}

#[cfg(test)]
mod tests {
    use super::TrapCode;

    #[test]
    fn trap_code_roundtrip() {
        for &code in TrapCode::ALL {
            assert_eq!(TrapCode::try_from(u8::from(code)).unwrap(), code);
        }
    }

    #[test]
    fn trap_code_wire_order_is_stable() {
        let discrs: Vec<u8> = TrapCode::ALL.iter().copied().map(u8::from).collect();
        assert_eq!(discrs, (1..=11).collect::<Vec<u8>>());
    }

    #[test]
    fn zero_is_not_a_trap_code() {
        // 0 is the "no trap" sentinel of the entry point adapters.
        assert!(TrapCode::try_from(0).is_err());
    }
}
