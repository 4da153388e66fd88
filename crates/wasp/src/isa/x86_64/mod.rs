//! The x86-64 target: encoder, register tables, assembler and backend.

pub mod assembler;
pub mod backend;
pub mod call_dispatch;
pub mod encoding;
pub mod instruction;
pub mod regs;
pub mod relpatch;
