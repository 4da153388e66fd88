//! Core primitives shared between the `wasp` compiler pipeline and its hosts.
//!
//! This crate defines the small, dependency-free vocabulary of the system:
//!
//! - [`MachineType`]: the four WebAssembly 1.0 value types as seen by the
//!   register allocator and instruction selection.
//! - [`TrapCode`]: the wire-stable set of abrupt-termination reasons raised
//!   by emitted machine code.
//! - [`trunc`]: the exact exclusive boundary constants used by the
//!   float-to-integer truncation sequences.
//! - [`units`]: linear-memory page arithmetic.

mod trap;
mod trunc;
mod units;
mod value;

pub use self::{
    trap::{InvalidTrapCode, TrapCode},
    trunc::{RawLimits, TruncLimits},
    units::{Pages, BYTES_PER_PAGE, MAX_PAGES},
    value::MachineType,
};
