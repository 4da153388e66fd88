use super::MemWriter;
use crate::{isa::x86_64::relpatch::RelPatchObj, Error};

/// A reference to a [`Label`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LabelRef(usize);

impl From<usize> for LabelRef {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

/// A branch target during compilation.
///
/// Forward branches are emitted with placeholder displacements and
/// registered as users of an unpinned label; pinning the label walks the
/// pending patch chain and rewrites every displacement. Function bodies
/// use the same mechanism for not-yet-emitted call targets.
#[derive(Debug)]
pub enum Label {
    /// The target position is known.
    Pinned(u32),
    /// The target is not yet emitted; pending branch sites accumulate.
    Unpinned(Vec<RelPatchObj>),
}

/// The label registry.
#[derive(Debug, Default)]
pub struct LabelRegistry {
    labels: Vec<Label>,
}

impl LabelRegistry {
    /// Allocates a new unpinned label.
    pub fn new_label(&mut self) -> LabelRef {
        let index = self.labels.len();
        self.labels.push(Label::Unpinned(Vec::new()));
        LabelRef(index)
    }

    /// Returns the pinned position of `label`, if it is pinned.
    pub fn pinned_pos(&self, label: LabelRef) -> Option<u32> {
        match self.labels[label.0] {
            Label::Pinned(pos) => Some(pos),
            Label::Unpinned(_) => None,
        }
    }

    /// Registers `patch` as a user of `label`.
    ///
    /// If the label is already pinned the displacement is rewritten
    /// immediately; otherwise the site joins the patch chain.
    pub fn add_user(
        &mut self,
        label: LabelRef,
        patch: RelPatchObj,
        out: &mut MemWriter,
    ) -> Result<(), Error> {
        match &mut self.labels[label.0] {
            Label::Pinned(pos) => patch.link_to_binary_pos(out, *pos),
            Label::Unpinned(users) => {
                users.push(patch);
                Ok(())
            }
        }
    }

    /// Pins `label` to the current end of `out` and resolves its patch
    /// chain.
    ///
    /// # Panics
    ///
    /// If the label was already pinned.
    pub fn pin(&mut self, label: LabelRef, out: &mut MemWriter) -> Result<(), Error> {
        self.pin_to(label, out, out.pos())
    }

    /// Pins `label` to `pos` and resolves its patch chain.
    pub fn pin_to(&mut self, label: LabelRef, out: &mut MemWriter, pos: u32) -> Result<(), Error> {
        let cell = &mut self.labels[label.0];
        let users = match cell {
            Label::Pinned(_) => panic!("label pinned twice"),
            Label::Unpinned(users) => core::mem::take(users),
        };
        *cell = Label::Pinned(pos);
        for patch in users {
            patch.link_to_binary_pos(out, pos)?;
        }
        Ok(())
    }

    /// Returns `true` if no label has a pending, unresolved user.
    ///
    /// This is the branch-patching closure check run at the end of every
    /// function.
    pub fn all_resolved(&self) -> bool {
        self.labels.iter().all(|label| match label {
            Label::Pinned(_) => true,
            Label::Unpinned(users) => users.is_empty(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_branch_patches_on_pin() {
        let mut out = MemWriter::default();
        let mut labels = LabelRegistry::default();
        let label = labels.new_label();
        // jmp rel32 placeholder
        out.write_byte(0xE9).unwrap();
        out.write_u32(0).unwrap();
        labels
            .add_user(label, RelPatchObj::new(false, out.pos()), &mut out)
            .unwrap();
        assert!(!labels.all_resolved());
        out.step(0x20).unwrap();
        labels.pin(label, &mut out).unwrap();
        assert!(labels.all_resolved());
        assert_eq!(out.read_bytes_le(1, 4), 0x20);
    }

    #[test]
    fn user_after_pin_links_immediately() {
        let mut out = MemWriter::default();
        let mut labels = LabelRegistry::default();
        let label = labels.new_label();
        labels.pin_to(label, &mut out, 0).unwrap();
        out.step(0x10).unwrap();
        out.write_byte(0xE9).unwrap();
        out.write_u32(0).unwrap();
        let end = out.pos();
        labels
            .add_user(label, RelPatchObj::new(false, end), &mut out)
            .unwrap();
        // displacement = 0 - end
        assert_eq!(out.read_bytes_le(end - 4, 4) as u32, (0i64 - i64::from(end)) as u32);
    }
}
