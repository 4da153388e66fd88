//! The TriCore target: instruction encoder, relative-patch objects and
//! register tables.
//!
//! Encoder layer of the TriCore port (TC1.6 ISA). Instructions are 32-bit
//! words assembled by a field-setter builder. Branch displacements are
//! half-word scaled: 15-bit for conditional branches (BRC/BRR formats) and
//! 24-bit for `J`/`JL`/`CALL` (B format), patched through
//! [`relpatch::RelPatchObj`].

pub mod instruction;
pub mod regs;
pub mod relpatch;
