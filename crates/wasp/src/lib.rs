//! A single-pass baseline just-in-time compiler for WebAssembly 1.0.
//!
//! `wasp` translates a validated WebAssembly module into native machine code
//! in one left-to-right pass over the bytecode. No intermediate
//! representation is built: the compiler mirrors the WebAssembly operand
//! stack symbolically, tracking for every value *where* it currently lives
//! (constant, register, local slot, spill slot, or still-pending CPU flags)
//! and materializing values as late as possible. This is what allows
//! peephole fusion such as collapsing `i32.eq` + `br_if` into a single
//! `CMP` + `Jcc` pair.
//!
//! The primary target is x86-64. The AArch64 and TriCore instruction
//! encoders live in [`isa`] alongside it.
//!
//! # Example
//!
//! ```no_run
//! use wasp::{compile_module, runtime::Instance, Config};
//!
//! let wasm = wat::parse_str(
//!     r#"(module (func (export "answer") (result i32) i32.const 42))"#,
//! )
//! .unwrap();
//! let compiled = compile_module(&wasm, &Config::default()).unwrap();
//! let mut instance = Instance::new(&compiled).unwrap();
//! let mut results = [0u64; 1];
//! instance.invoke_export("answer", &[], &mut results).unwrap();
//! assert_eq!(results[0] as u32, 42);
//! ```

mod binary;
mod compiler;
mod config;
mod error;
mod module;
pub mod isa;
pub mod runtime;

pub use self::{
    binary::{CompiledModule, LinkDataLayout, ManagedBinary},
    compiler::compile_module,
    config::{BoundsCheckMode, Config},
    error::{Error, LimitKind, UnsupportedKind},
    module::{ModuleMeta, NativeSymbol},
};
pub use wasp_core::{MachineType, TrapCode};
