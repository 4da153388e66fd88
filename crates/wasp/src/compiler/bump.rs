use crate::Error;

/// Sentinel index marking the end of the intrusive free list.
const FREE_LIST_END: u32 = u32::MAX;

/// Elements per slab.
const SLAB_SIZE: u32 = 64;

/// A fixed-element-size slab allocator.
///
/// Allocations pop an intrusive free list threaded through the unused
/// slots; a new slab is chained when the list is empty. [`reset`] releases
/// everything but the first slab in one sweep, which is how all
/// per-function stack nodes are freed at function exit.
///
/// No destructors run on [`reset`], so `T` must be trivially droppable,
/// enforced here by the `Copy` bound.
///
/// [`reset`]: BumpAllocator::reset
#[derive(Debug)]
pub struct BumpAllocator<T: Copy + Default> {
    slabs: Vec<Box<[Entry<T>]>>,
    free_head: u32,
    live: u32,
}

#[derive(Debug, Copy, Clone)]
struct Entry<T> {
    value: T,
    free_next: u32,
}

impl<T: Copy + Default> Default for BumpAllocator<T> {
    fn default() -> Self {
        Self {
            slabs: Vec::new(),
            free_head: FREE_LIST_END,
            live: 0,
        }
    }
}

impl<T: Copy + Default> BumpAllocator<T> {
    /// Allocates a slot holding `value` and returns its index.
    pub fn alloc(&mut self, value: T) -> Result<u32, Error> {
        if self.free_head == FREE_LIST_END {
            self.push_slab()?;
        }
        let id = self.free_head;
        let entry = self.entry_mut(id);
        let next_free = entry.free_next;
        entry.value = value;
        entry.free_next = FREE_LIST_END;
        self.free_head = next_free;
        self.live += 1;
        Ok(id)
    }

    /// Returns the slot `id` to the free list.
    pub fn free(&mut self, id: u32) {
        debug_assert!(self.live > 0);
        let head = self.free_head;
        let entry = self.entry_mut(id);
        entry.free_next = head;
        self.free_head = id;
        self.live -= 1;
    }

    /// Returns a shared reference to the value in slot `id`.
    #[inline]
    pub fn get(&self, id: u32) -> &T {
        let (slab, slot) = Self::locate(id);
        &self.slabs[slab][slot].value
    }

    /// Returns an exclusive reference to the value in slot `id`.
    #[inline]
    pub fn get_mut(&mut self, id: u32) -> &mut T {
        &mut self.entry_mut(id).value
    }

    /// Returns the number of live allocations.
    pub fn live(&self) -> u32 {
        self.live
    }

    /// Releases all slabs but the first and rebuilds the free list in the
    /// retained slab.
    pub fn reset(&mut self) {
        self.slabs.truncate(1);
        self.free_head = FREE_LIST_END;
        self.live = 0;
        if let Some(slab) = self.slabs.first_mut() {
            for (slot, entry) in slab.iter_mut().enumerate().rev() {
                entry.free_next = core::mem::replace(&mut self.free_head, slot as u32);
            }
        }
    }

    fn push_slab(&mut self) -> Result<(), Error> {
        self.slabs.try_reserve(1).map_err(|_| Error::OutOfMemory)?;
        let base = self.slabs.len() as u32 * SLAB_SIZE;
        let mut slab = Vec::new();
        slab.try_reserve_exact(SLAB_SIZE as usize)
            .map_err(|_| Error::OutOfMemory)?;
        // Thread the fresh slab into the free list back to front so
        // allocation order matches slot order.
        for slot in 0..SLAB_SIZE {
            slab.push(Entry {
                value: T::default(),
                free_next: if slot + 1 < SLAB_SIZE {
                    base + slot + 1
                } else {
                    self.free_head
                },
            });
        }
        self.free_head = base;
        self.slabs.push(slab.into_boxed_slice());
        Ok(())
    }

    #[inline]
    fn entry_mut(&mut self, id: u32) -> &mut Entry<T> {
        let (slab, slot) = Self::locate(id);
        &mut self.slabs[slab][slot]
    }

    #[inline]
    fn locate(id: u32) -> (usize, usize) {
        ((id / SLAB_SIZE) as usize, (id % SLAB_SIZE) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_alloc_reuses_the_slot() {
        let mut bump = BumpAllocator::<u64>::default();
        let a = bump.alloc(1).unwrap();
        let b = bump.alloc(2).unwrap();
        assert_ne!(a, b);
        bump.free(a);
        let c = bump.alloc(3).unwrap();
        assert_eq!(a, c);
        assert_eq!(*bump.get(c), 3);
        assert_eq!(*bump.get(b), 2);
    }

    #[test]
    fn grows_past_one_slab() {
        let mut bump = BumpAllocator::<u32>::default();
        let ids: Vec<u32> = (0..200).map(|i| bump.alloc(i).unwrap()).collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(*bump.get(*id), i as u32);
        }
        assert_eq!(bump.live(), 200);
    }

    #[test]
    fn reset_retains_one_slab() {
        let mut bump = BumpAllocator::<u8>::default();
        for _ in 0..200 {
            bump.alloc(0xFF).unwrap();
        }
        bump.reset();
        assert_eq!(bump.live(), 0);
        // The retained slab serves allocations without growing again.
        let id = bump.alloc(7).unwrap();
        assert_eq!(id, 0);
        assert_eq!(*bump.get(id), 7);
    }
}
