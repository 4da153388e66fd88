use core::fmt::{self, Display};

/// An error that may occur while compiling a WebAssembly module.
#[derive(Debug)]
pub enum Error {
    /// The memory extender callback could not satisfy a buffer grow.
    OutOfMemory,
    /// A hard implementation limit was exceeded.
    ///
    /// These are limits of this compiler, not of the WebAssembly
    /// specification; the input module is valid but cannot be compiled.
    ImplementationLimit(LimitKind),
    /// The module uses a proposal or calling convention this compiler
    /// deliberately does not implement.
    FeatureNotSupported(UnsupportedKind),
    /// The input binary failed parsing or validation.
    ///
    /// The compiler itself assumes validated input; this variant only
    /// surfaces from the up-front `wasmparser` validation pass.
    Validation(wasmparser::BinaryReaderError),
}

/// The specific implementation limit that was exceeded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LimitKind {
    /// A function's stack frame grew beyond `i32::MAX` bytes.
    StackFrameTooLarge,
    /// The module defines more than `2^31` functions.
    TooManyFunctions,
    /// A branch displacement does not fit the encoding of the emitted
    /// branch instruction.
    BranchDistanceTooLarge,
    /// A function declares more locals than the per-target
    /// `NUM_DIRECT_LOCALS` bound.
    TooManyLocals,
    /// The emitted binary grew beyond `u32::MAX` bytes.
    BinaryTooLarge,
}

/// The specific unsupported feature that was encountered.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnsupportedKind {
    /// Any operator or type of the `simd` proposal.
    Simd,
    /// `funcref`/`externref` outside of a function table.
    ReferenceTypes,
    /// More than one linear memory.
    MultiMemory,
    /// More than one table.
    MultiTable,
    /// A v2 imported function with more than one return value.
    V2MultiValueReturns,
    /// A WebAssembly proposal outside the 1.0 + multi-value scope.
    Proposal,
}

impl Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            Self::StackFrameTooLarge => "stack frame larger than i32::MAX bytes",
            Self::TooManyFunctions => "more than 2^31 functions",
            Self::BranchDistanceTooLarge => "branch distance exceeds encoding width",
            Self::TooManyLocals => "too many locals in one function",
            Self::BinaryTooLarge => "emitted binary larger than u32::MAX bytes",
        };
        f.write_str(what)
    }
}

impl Display for UnsupportedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            Self::Simd => "the `simd` proposal",
            Self::ReferenceTypes => "reference types",
            Self::MultiMemory => "multiple linear memories",
            Self::MultiTable => "multiple tables",
            Self::V2MultiValueReturns => "multi-value returns over the v2 import ABI",
            Self::Proposal => "a proposal outside WebAssembly 1.0",
        };
        f.write_str(what)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of memory while growing a compiler buffer"),
            Self::ImplementationLimit(what) => {
                write!(f, "implementation limit reached: {what}")
            }
            Self::FeatureNotSupported(what) => write!(f, "feature not supported: {what}"),
            Self::Validation(error) => write!(f, "invalid WebAssembly input: {error}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<wasmparser::BinaryReaderError> for Error {
    fn from(error: wasmparser::BinaryReaderError) -> Self {
        Self::Validation(error)
    }
}
