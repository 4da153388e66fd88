//! Parallel register-move resolution for call argument marshalling.
//!
//! Re-sorting arguments from Wasm-ABI positions into host-ABI positions is
//! a general "permute N registers" problem: the moves form a dependency
//! graph where a move may only run once its destination is no longer
//! needed as a source. Acyclic parts resolve by topological emission;
//! cycles are broken with an exchange (`xchg` for integer registers) or a
//! rotation through the pinned move-helper register for float registers.

use super::{storage::VariableStorage, Compiler};
use crate::{
    isa::x86_64::{
        encoding::{MOVAPS_RF_RF, XCHG_RM64_R64},
        regs::{pinned, Reg},
    },
    Error,
};
use wasp_core::MachineType;

/// One pending move into a register.
#[derive(Debug, Copy, Clone)]
struct PendingMove {
    dst: Reg,
    src: VariableStorage,
    ty: MachineType,
}

/// Collects register moves and emits them in a conflict-free order.
#[derive(Debug, Default)]
pub struct RegisterCopyResolver {
    moves: Vec<PendingMove>,
}

impl RegisterCopyResolver {
    /// Schedules a move of `src` into register `dst`.
    pub fn push(&mut self, ty: MachineType, dst: Reg, src: VariableStorage) {
        debug_assert!(
            self.moves.iter().all(|pending| pending.dst != dst),
            "two moves into the same register"
        );
        if src.as_reg() == Some(dst) {
            return;
        }
        self.moves.push(PendingMove { dst, src, ty });
    }

    /// Emits all scheduled moves.
    ///
    /// Register-to-register moves are ordered so no source is clobbered
    /// before it is read; memory and constant sources are emitted last,
    /// once their destinations are dead as sources.
    pub fn resolve(mut self, compiler: &mut Compiler<'_, '_>) -> Result<(), Error> {
        // Phase 1: the register permutation.
        let mut reg_moves: Vec<PendingMove> = self
            .moves
            .iter()
            .copied()
            .filter(|pending| pending.src.as_reg().is_some())
            .collect();
        self.moves.retain(|pending| pending.src.as_reg().is_none());

        while !reg_moves.is_empty() {
            // Emit every move whose destination no other pending move
            // still reads.
            let mut progressed = false;
            let mut index = 0;
            while index < reg_moves.len() {
                let candidate = reg_moves[index];
                let dst_is_source = reg_moves
                    .iter()
                    .any(|pending| pending.src.as_reg() == Some(candidate.dst));
                if dst_is_source {
                    index += 1;
                    continue;
                }
                compiler.emit_move(
                    VariableStorage::reg(candidate.ty, candidate.dst),
                    candidate.src,
                    false,
                )?;
                reg_moves.swap_remove(index);
                progressed = true;
            }
            if progressed {
                continue;
            }
            // Only cycles remain; break one edge of the first cycle.
            let first = reg_moves[0];
            let src = first.src.as_reg().expect("phase 1 holds register sources");
            if first.dst.is_gpr() {
                compiler
                    .instr(&XCHG_RM64_R64)
                    .set_r4rm(first.dst)
                    .set_r(src)
                    .emit(&mut compiler.out)?;
            } else {
                // xmm registers have no exchange; rotate through the
                // pinned helper.
                let helper = pinned::MOVE_HELPER;
                compiler
                    .instr(&MOVAPS_RF_RF)
                    .set_r(helper)
                    .set_r4rm(first.dst)
                    .emit(&mut compiler.out)?;
                compiler
                    .instr(&MOVAPS_RF_RF)
                    .set_r(first.dst)
                    .set_r4rm(src)
                    .emit(&mut compiler.out)?;
                compiler
                    .instr(&MOVAPS_RF_RF)
                    .set_r(src)
                    .set_r4rm(helper)
                    .emit(&mut compiler.out)?;
            }
            // The exchange satisfied the first move and turned every
            // other reader of `src` into a reader of `first.dst`.
            reg_moves.swap_remove(0);
            for pending in &mut reg_moves {
                if pending.src.as_reg() == Some(src) {
                    pending.src = VariableStorage::reg(
                        pending.src.ty().expect("register sources are typed"),
                        first.dst,
                    );
                } else if pending.src.as_reg() == Some(first.dst) {
                    pending.src = VariableStorage::reg(
                        pending.src.ty().expect("register sources are typed"),
                        src,
                    );
                }
            }
            // Drop moves the exchange already satisfied.
            reg_moves.retain(|pending| pending.src.as_reg() != Some(pending.dst));
        }

        // Phase 2: memory and constant sources.
        for pending in self.moves {
            compiler.emit_move(
                VariableStorage::reg(pending.ty, pending.dst),
                pending.src,
                false,
            )?;
        }
        Ok(())
    }
}
