use crate::{Error, LimitKind};

/// Append-only growable byte buffer backing the code and scratch-metadata
/// buffers of the compiler.
///
/// Positions are `u32`: the emitted binary is addressed with 32-bit offsets
/// throughout the patch system, so the writer refuses to grow past
/// `u32::MAX` with [`LimitKind::BinaryTooLarge`].
#[derive(Debug, Default)]
pub struct MemWriter {
    /// The underlying allocation. `bytes.len()` is the capacity; the active
    /// size is tracked separately so `flush` can reset without releasing.
    bytes: Vec<u8>,
    /// Current active size, i.e. the position of the next write.
    size: u32,
}

impl MemWriter {
    /// Creates an empty writer with `capacity` bytes preallocated.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity],
            size: 0,
        }
    }

    /// Returns the current active size.
    #[inline]
    pub fn pos(&self) -> u32 {
        self.size
    }

    /// Returns the size of the underlying allocation.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Resets the active size to zero without releasing capacity.
    pub fn flush(&mut self) {
        self.size = 0;
    }

    /// Truncates the active size back to `pos`.
    ///
    /// Used by the driver's unwind path so partial-function bytes never
    /// leak into the output.
    pub fn truncate(&mut self, pos: u32) {
        debug_assert!(pos <= self.size);
        self.size = pos;
    }

    /// Reserves `n` bytes of undefined content and returns the position of
    /// the first reserved byte.
    pub fn step(&mut self, n: u32) -> Result<u32, Error> {
        let start = self.size;
        let new_size = self
            .size
            .checked_add(n)
            .ok_or(Error::ImplementationLimit(LimitKind::BinaryTooLarge))?;
        if new_size as usize > self.bytes.len() {
            self.grow_to(new_size as usize)?;
        }
        self.size = new_size;
        Ok(start)
    }

    /// Advances the active size so the next write begins at a multiple of
    /// `align` and returns the new position. `align` must be a power of two.
    pub fn align_to(&mut self, align: u32) -> Result<u32, Error> {
        debug_assert!(align.is_power_of_two());
        let misalign = self.size & (align - 1);
        if misalign != 0 {
            self.step(align - misalign)?;
        }
        Ok(self.size)
    }

    /// Appends a single byte.
    #[inline]
    pub fn write_byte(&mut self, byte: u8) -> Result<(), Error> {
        let pos = self.step(1)?;
        self.bytes[pos as usize] = byte;
        Ok(())
    }

    /// Appends the `n` least significant bytes of `data` in little-endian
    /// order.
    pub fn write_bytes_le(&mut self, data: u64, n: u32) -> Result<(), Error> {
        debug_assert!(n <= 8);
        let pos = self.step(n)? as usize;
        self.bytes[pos..pos + n as usize].copy_from_slice(&data.to_le_bytes()[..n as usize]);
        Ok(())
    }

    /// Appends a `u32` in little-endian order.
    #[inline]
    pub fn write_u32(&mut self, data: u32) -> Result<(), Error> {
        self.write_bytes_le(u64::from(data), 4)
    }

    /// Appends a `u64` in little-endian order.
    #[inline]
    pub fn write_u64(&mut self, data: u64) -> Result<(), Error> {
        self.write_bytes_le(data, 8)
    }

    /// Rewrites `n` already-written bytes at `pos` in little-endian order.
    ///
    /// This is the primitive behind the branch patch system: displacements
    /// are written as placeholders and rewritten once the target is known.
    pub fn patch_bytes_le(&mut self, pos: u32, data: u64, n: u32) {
        debug_assert!(n <= 8);
        debug_assert!(pos + n <= self.size, "patch outside the written region");
        let pos = pos as usize;
        self.bytes[pos..pos + n as usize].copy_from_slice(&data.to_le_bytes()[..n as usize]);
    }

    /// Reads back `n` bytes at `pos` as a little-endian integer.
    pub fn read_bytes_le(&self, pos: u32, n: u32) -> u64 {
        debug_assert!(n <= 8);
        debug_assert!(pos + n <= self.size);
        let mut buf = [0u8; 8];
        let pos = pos as usize;
        buf[..n as usize].copy_from_slice(&self.bytes[pos..pos + n as usize]);
        u64::from_le_bytes(buf)
    }

    /// Returns the written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.size as usize]
    }

    /// Consumes the writer and returns the written bytes, trimmed to the
    /// active size.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.bytes.truncate(self.size as usize);
        self.bytes
    }

    fn grow_to(&mut self, needed: usize) -> Result<(), Error> {
        // Doubling growth; the extender failing is surfaced as OutOfMemory.
        let new_cap = needed.max(self.bytes.len().saturating_mul(2)).max(256);
        self.bytes
            .try_reserve_exact(new_cap - self.bytes.len())
            .map_err(|_| Error::OutOfMemory)?;
        self.bytes.resize(new_cap, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_advances_only_when_misaligned() {
        let mut writer = MemWriter::default();
        writer.write_byte(0xAA).unwrap();
        assert_eq!(writer.align_to(4).unwrap(), 4);
        assert_eq!(writer.align_to(4).unwrap(), 4);
        writer.write_u32(0xDEAD_BEEF).unwrap();
        assert_eq!(writer.pos(), 8);
    }

    #[test]
    fn patch_rewrites_in_place() {
        let mut writer = MemWriter::default();
        writer.write_u32(0).unwrap();
        writer.write_byte(0xCC).unwrap();
        writer.patch_bytes_le(0, 0x1122_3344, 4);
        assert_eq!(writer.read_bytes_le(0, 4), 0x1122_3344);
        assert_eq!(writer.as_slice(), &[0x44, 0x33, 0x22, 0x11, 0xCC]);
    }

    #[test]
    fn flush_keeps_capacity() {
        let mut writer = MemWriter::default();
        writer.step(1000).unwrap();
        let cap = writer.capacity();
        writer.flush();
        assert_eq!(writer.pos(), 0);
        assert_eq!(writer.capacity(), cap);
    }

    #[test]
    fn little_endian_partial_writes() {
        let mut writer = MemWriter::default();
        writer.write_bytes_le(0x0102_0304_0506_0708, 3).unwrap();
        assert_eq!(writer.as_slice(), &[0x08, 0x07, 0x06]);
    }
}
