use crate::{compiler::MemWriter, Error, LimitKind};

/// Handle to an already-emitted instruction that encodes a relative
/// displacement whose target was not yet known: a branch, a call, or a
/// RIP-relative `LEA`.
///
/// The handle stores the binary position directly *after* the instruction
/// (which is what the CPU measures displacements from) and whether the
/// displacement field is the short 8-bit or the 32-bit form. It does not
/// borrow the output buffer; the buffer is passed to the link calls, so
/// handles can be stored in patch chains freely.
#[derive(Debug, Copy, Clone)]
pub struct RelPatchObj {
    /// Position of the first byte after the referenced instruction.
    pos_after_instr: u32,
    /// `true` for a `rel8` displacement, `false` for `rel32`.
    short: bool,
}

impl RelPatchObj {
    /// Creates a handle for an instruction ending at `pos_after_instr`.
    pub fn new(short: bool, pos_after_instr: u32) -> Self {
        Self {
            pos_after_instr,
            short,
        }
    }

    /// Returns the position of the first byte after the instruction.
    pub fn pos_after_instr(self) -> u32 {
        self.pos_after_instr
    }

    /// Rewrites the displacement so the instruction targets the current
    /// end of `out`.
    pub fn link_to_here(self, out: &mut MemWriter) -> Result<(), Error> {
        self.link_to_binary_pos(out, out.pos())
    }

    /// Rewrites the displacement so the instruction targets the absolute
    /// binary position `target`.
    pub fn link_to_binary_pos(self, out: &mut MemWriter, target: u32) -> Result<(), Error> {
        let delta = i64::from(target) - i64::from(self.pos_after_instr);
        if self.short {
            let delta = i8::try_from(delta)
                .map_err(|_| Error::ImplementationLimit(LimitKind::BranchDistanceTooLarge))?;
            out.patch_bytes_le(self.pos_after_instr - 1, delta as u8 as u64, 1);
        } else {
            let delta = i32::try_from(delta)
                .map_err(|_| Error::ImplementationLimit(LimitKind::BranchDistanceTooLarge))?;
            out.patch_bytes_le(self.pos_after_instr - 4, delta as u32 as u64, 4);
        }
        Ok(())
    }

    /// Reads back the binary position the instruction currently targets.
    pub fn linked_binary_pos(self, out: &MemWriter) -> u32 {
        let delta = if self.short {
            i64::from(out.read_bytes_le(self.pos_after_instr - 1, 1) as u8 as i8)
        } else {
            i64::from(out.read_bytes_le(self.pos_after_instr - 4, 4) as u32 as i32)
        };
        (i64::from(self.pos_after_instr) + delta) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn rel32_roundtrip() {
        let mut out = MemWriter::default();
        // jmp rel32 with placeholder
        out.write_byte(0xE9).unwrap();
        out.write_u32(0).unwrap();
        let patch = RelPatchObj::new(false, out.pos());
        out.step(0x30).unwrap();
        patch.link_to_here(&mut out).unwrap();
        assert_eq!(patch.linked_binary_pos(&out), out.pos());
        assert_eq!(out.read_bytes_le(1, 4), 0x30);
    }

    #[test]
    fn rel8_backward_branch() {
        let mut out = MemWriter::default();
        out.step(0x10).unwrap();
        let loop_head = out.pos();
        out.step(0x08).unwrap();
        out.write_byte(0xEB).unwrap();
        out.write_byte(0).unwrap();
        let patch = RelPatchObj::new(true, out.pos());
        patch.link_to_binary_pos(&mut out, loop_head).unwrap();
        assert_eq!(patch.linked_binary_pos(&out), loop_head);
        // -(8 + 2) = -10
        assert_eq!(out.read_bytes_le(out.pos() - 1, 1) as u8 as i8, -10);
    }

    #[test]
    fn rel8_overflow_is_an_implementation_limit() {
        let mut out = MemWriter::default();
        out.write_byte(0xEB).unwrap();
        out.write_byte(0).unwrap();
        let patch = RelPatchObj::new(true, out.pos());
        out.step(0x200).unwrap();
        assert_matches!(
            patch.link_to_here(&mut out),
            Err(Error::ImplementationLimit(
                crate::LimitKind::BranchDistanceTooLarge
            ))
        );
    }
}
