//! The AArch64 target: instruction encoder, relative-patch objects and
//! register tables.
//!
//! This is the encoder layer of the AArch64 port. Instructions are fixed
//! 32-bit words assembled by a field-setter builder; branch displacements
//! are 19-bit (conditional, `CBZ`/`CBNZ`) or 26-bit (`B`/`BL`) word
//! offsets, patched through [`relpatch::RelPatchObj`].

pub mod instruction;
pub mod regs;
pub mod relpatch;
