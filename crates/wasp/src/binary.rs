use crate::module::{ExportMeta, FuncType, GlobalMeta, ImportedFunc, MemoryMeta, TableMeta};

/// The immutable emitted binary, handed off by the compiler on success.
#[derive(Debug)]
pub struct ManagedBinary {
    bytes: Vec<u8>,
}

impl ManagedBinary {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Returns the emitted machine code bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if no code was emitted.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Layout of the link-data region.
///
/// Link data lives directly *below* the linear memory base held in the
/// pinned `LIN_MEM` register; every slot is addressed with a fixed negative
/// offset from that register. The fixed header is followed by the global
/// variable area, the imported-function pointer area and the function
/// table records.
#[derive(Debug, Clone, Copy)]
pub struct LinkDataLayout {
    pub num_globals: u32,
    pub num_imports: u32,
    pub table_entries: u32,
}

/// Byte size of one link-data slot.
pub const SLOT: i32 = 8;

/// Fixed header slots, as negative offsets from the linear memory base.
impl LinkDataLayout {
    /// Called on linear-memory grow or extension-request.
    pub const MEMORY_HELPER_PTR: i32 = -8;
    /// Stack pointer to restore when a trap unwinds.
    pub const TRAP_STACK_REENTRY: i32 = -16;
    /// Code address inside the active entry adapter to re-enter on trap.
    pub const TRAP_REENTRY_PC: i32 = -24;
    /// Address of the generic trap handler of this module.
    pub const TRAP_HANDLER_PTR: i32 = -32;
    /// Host stack fence; native code below this SP raises a trap.
    pub const NATIVE_STACK_FENCE: i32 = -40;
    /// Wasm stack fence checked by function prologues.
    pub const STACK_FENCE: i32 = -48;
    /// Head of the stacktrace record list.
    pub const LAST_FRAME_REF_PTR: i32 = -56;
    /// Opaque host context passed to every imported call.
    pub const CUSTOM_CTX: i32 = -64;
    /// Read-only auxiliary buffer for builtin functions.
    pub const LINKED_MEM_PTR: i32 = -72;
    /// Length of the auxiliary buffer.
    pub const LINKED_MEM_LEN: i32 = -80;
    /// Bitfield polled by interruption-request checks.
    pub const STATUS_FLAGS: i32 = -88;
    /// Current linear memory size in bytes; the pinned size register is
    /// reloaded from here after every call that may grow memory.
    pub const ACTUAL_LINMEM_BYTE_SIZE: i32 = -96;
    /// Absolute address where this module's emitted binary starts.
    pub const BINARY_START_ADDR: i32 = -104;
    /// Absolute address of the function table records.
    pub const TABLE_ADDR: i32 = -112;
    /// Current and maximum linear memory pages, packed as two `u32`s.
    pub const MEM_PAGES: i32 = -120;

    const HEADER_SLOTS: i32 = 15;

    /// Creates the layout for a module with the given counts.
    pub fn new(num_globals: u32, num_imports: u32, table_entries: u32) -> Self {
        Self {
            num_globals,
            num_imports,
            table_entries,
        }
    }

    /// Offset of the link-data storage of global `index`.
    pub fn global_offset(&self, index: u32) -> i32 {
        debug_assert!(index < self.num_globals);
        -(Self::HEADER_SLOTS + 1 + index as i32) * SLOT
    }

    /// Offset of the function pointer of import `index`.
    pub fn import_ptr_offset(&self, index: u32) -> i32 {
        debug_assert!(index < self.num_imports);
        -(Self::HEADER_SLOTS + 1 + self.num_globals as i32 + index as i32) * SLOT
    }

    /// Offset of the first table record. Each record is 8 bytes:
    /// a `u32` binary offset of the target function (0 = not linked)
    /// followed by its `u32` signature index.
    pub fn table_offset(&self) -> i32 {
        -(Self::HEADER_SLOTS + 1 + self.num_globals as i32 + self.num_imports as i32) * SLOT
            - (self.table_entries as i32) * SLOT
            + SLOT
    }

    /// Total size of the link-data region in bytes.
    pub fn total_size(&self) -> u32 {
        ((Self::HEADER_SLOTS
            + self.num_globals as i32
            + self.num_imports as i32
            + self.table_entries as i32)
            * SLOT) as u32
    }
}

/// Where one exported function can be entered from host code.
#[derive(Debug, Clone)]
pub struct ExportedEntryPoint {
    pub name: String,
    pub func_index: u32,
    /// Binary offset of the host-ABI entry adapter.
    pub adapter_offset: u32,
}

/// Binary offsets of the per-module helper functions.
#[derive(Debug, Default, Clone, Copy)]
pub struct HelperOffsets {
    /// Restores the saved stack pointer and re-enters the host on a trap.
    pub generic_trap_handler: u32,
    /// Walks the stacktrace record chain into the auxiliary buffer.
    pub stacktrace_collector: u32,
    /// Grows linear memory from a failed explicit bounds check.
    pub extension_request: u32,
    /// `memory.grow` entry of the memory helper wrapper.
    pub mem_grow: u32,
    /// `memory.copy` entry of the memory helper wrapper.
    pub mem_copy: u32,
    /// `memory.fill` entry of the memory helper wrapper.
    pub mem_fill: u32,
    /// Signal-mode landing pad (guarded builds only).
    pub landing_pad: u32,
}

/// The result of compiling a module: the emitted binary plus the metadata
/// the runtime needs to instantiate and enter it.
#[derive(Debug)]
pub struct CompiledModule {
    pub binary: ManagedBinary,
    pub layout: LinkDataLayout,
    pub helpers: HelperOffsets,
    /// Entry adapters for every export of kind `Func`.
    pub entry_points: Vec<ExportedEntryPoint>,
    /// Binary offset of every function body, by function index. Imported
    /// functions carry the offset of their Wasm-to-native adapter.
    pub func_offsets: Vec<u32>,
    /// Signatures, copied out of the parsed module.
    pub signatures: Vec<FuncType>,
    /// Signature index per function.
    pub func_sigs: Vec<u32>,
    /// Imported functions in index order.
    pub imports: Vec<ImportedFunc>,
    pub globals: Vec<GlobalMeta>,
    pub table: Option<TableMeta>,
    pub memory: Option<MemoryMeta>,
    pub exports: Vec<ExportMeta>,
    pub start: Option<u32>,
}

impl CompiledModule {
    /// Looks up the entry point of export `name`.
    pub fn entry_point(&self, name: &str) -> Option<&ExportedEntryPoint> {
        self.entry_points.iter().find(|entry| entry.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_regions_do_not_overlap() {
        let layout = LinkDataLayout::new(3, 2, 4);
        let globals: Vec<i32> = (0..3).map(|i| layout.global_offset(i)).collect();
        let imports: Vec<i32> = (0..2).map(|i| layout.import_ptr_offset(i)).collect();
        assert_eq!(globals, [-128, -136, -144]);
        assert_eq!(imports, [-152, -160]);
        // Table records grow upward from the bottom of the region.
        assert_eq!(layout.table_offset(), -192);
        assert_eq!(layout.total_size(), 192);
        // The lowest slot stays inside the region.
        assert!(layout.table_offset() + 4 * SLOT <= 0);
        assert!(-(layout.total_size() as i32) <= layout.table_offset());
    }

    #[test]
    fn header_is_fifteen_slots() {
        let layout = LinkDataLayout::new(0, 0, 0);
        assert_eq!(layout.total_size(), 120);
        assert_eq!(LinkDataLayout::MEM_PAGES, -120);
    }
}
