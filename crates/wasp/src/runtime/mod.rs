//! A minimal execution harness for compiled modules.
//!
//! This is the test-and-embedding scaffold, not a production runtime: it
//! maps the emitted binary executable, materializes the link-data contract
//! (trap re-entry slots, fences, helper pointers, globals, the function
//! table), provides the native memory helper, and invokes entry-point
//! adapters.
//!
//! Linear memory is allocated at its maximum size up front, so growing
//! never relocates the base and the pinned base register stays valid for
//! the lifetime of an instance.

use crate::{
    binary::{CompiledModule, LinkDataLayout},
    TrapCode,
};
use wasp_core::{BYTES_PER_PAGE, MAX_PAGES};
use core::fmt::{self, Display};

/// An error raised while instantiating or running a compiled module.
#[derive(Debug)]
pub enum RuntimeError {
    /// The executed code trapped.
    Trap(TrapCode),
    /// No export with the requested name exists.
    UnknownExport,
    /// An imported function was invoked without being bound.
    UnboundImport,
    /// Result buffer too small for the signature.
    ResultBufferTooSmall,
    /// The host rejected the executable mapping.
    Map(region::Error),
    /// The host architecture cannot execute the emitted code.
    UnsupportedHost,
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trap(code) => write!(f, "trap: {code}"),
            Self::UnknownExport => f.write_str("unknown export"),
            Self::UnboundImport => f.write_str("imported function was not bound"),
            Self::ResultBufferTooSmall => f.write_str("result buffer too small"),
            Self::Map(error) => write!(f, "executable mapping failed: {error}"),
            Self::UnsupportedHost => f.write_str("host architecture cannot run this code"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<region::Error> for RuntimeError {
    fn from(error: region::Error) -> Self {
        Self::Map(error)
    }
}

/// The context handed to every imported call and to the memory helper.
///
/// The first field must stay the linear memory base: entry adapters load
/// the pinned base register from offset 0.
#[repr(C)]
struct VmContext {
    lin_mem_base: *mut u8,
    link_base: *mut u8,
    memory_bytes: u64,
    max_pages: u32,
    min_pages: u32,
}

/// Result codes of the mode-0 extension request.
const EXT_OK: u64 = 1;
const EXT_OOB: u64 = 0;

/// The native memory helper behind the emitted wrapper stubs.
///
/// `mode`: 0 = extension request (`a` = required end address), 1 = grow
/// (`a` = delta pages), 2 = copy (`a` = dst, `b` = src, `c` = len),
/// 3 = fill (`a` = dst, `b` = value, `c` = len).
unsafe extern "sysv64" fn memory_helper(ctx: *mut VmContext, a: u64, b: u64, c: u64, mode: u64) -> u64 {
    let ctx = &mut *ctx;
    let size = ctx.memory_bytes;
    match mode {
        0 => {
            if a <= size {
                return EXT_OK;
            }
            // Extend to cover the access, page-granular, capped at max.
            let needed_pages = a.div_ceil(u64::from(BYTES_PER_PAGE));
            if needed_pages > u64::from(ctx.max_pages) {
                return EXT_OOB;
            }
            set_memory_pages(ctx, needed_pages as u32);
            EXT_OK
        }
        1 => {
            let current = (size / u64::from(BYTES_PER_PAGE)) as u32;
            if a == 0 {
                return u64::from(current);
            }
            let Some(new_pages) = current.checked_add(a as u32) else {
                return u64::from(u32::MAX);
            };
            if a > u64::from(u32::MAX) || new_pages > ctx.max_pages {
                return u64::from(u32::MAX);
            }
            set_memory_pages(ctx, new_pages);
            u64::from(current)
        }
        2 => {
            let (dst, src, len) = (a, b, c);
            if dst.checked_add(len).is_none_or(|end| end > size)
                || src.checked_add(len).is_none_or(|end| end > size)
            {
                return EXT_OOB;
            }
            core::ptr::copy(
                ctx.lin_mem_base.add(src as usize),
                ctx.lin_mem_base.add(dst as usize),
                len as usize,
            );
            EXT_OK
        }
        3 => {
            let (dst, value, len) = (a, b, c);
            if dst.checked_add(len).is_none_or(|end| end > size) {
                return EXT_OOB;
            }
            core::ptr::write_bytes(ctx.lin_mem_base.add(dst as usize), value as u8, len as usize);
            EXT_OK
        }
        _ => EXT_OOB,
    }
}

unsafe fn set_memory_pages(ctx: &mut VmContext, pages: u32) {
    ctx.memory_bytes = u64::from(pages) * u64::from(BYTES_PER_PAGE);
    let base = ctx.lin_mem_base;
    write_slot(base, LinkDataLayout::ACTUAL_LINMEM_BYTE_SIZE, ctx.memory_bytes);
    let packed = u64::from(pages) | (u64::from(ctx.max_pages) << 32);
    write_slot(base, LinkDataLayout::MEM_PAGES, packed);
}

unsafe fn write_slot(lin_mem_base: *mut u8, offset: i32, value: u64) {
    lin_mem_base.offset(offset as isize).cast::<u64>().write_unaligned(value);
}

/// An instantiated module: executable code plus its memory image.
pub struct Instance {
    code: region::Allocation,
    /// Link data followed by linear memory, allocated at maximum size.
    memory: Box<[u8]>,
    /// Offset of the linear memory base within `memory`.
    lin_mem_offset: usize,
    layout: LinkDataLayout,
    ctx: Box<VmContext>,
    /// Auxiliary buffer exposed as the linked memory.
    _aux: Box<[u8]>,
    module_info: InstanceInfo,
}

struct InstanceInfo {
    entry_points: Vec<(String, u32, u32)>,
    signatures: Vec<(usize, usize)>,
    sig_of_func: Vec<u32>,
}

impl Instance {
    /// Maps `module` executable, initializes link data, memory, globals
    /// and the function table, binds nothing, and runs the start function
    /// if one exists.
    pub fn new(module: &CompiledModule) -> Result<Self, RuntimeError> {
        if !cfg!(target_arch = "x86_64") {
            return Err(RuntimeError::UnsupportedHost);
        }
        // Executable mapping.
        let code_bytes = module.binary.as_slice();
        let mut code = region::alloc(code_bytes.len().max(1), region::Protection::READ_WRITE)?;
        unsafe {
            core::ptr::copy_nonoverlapping(
                code_bytes.as_ptr(),
                code.as_mut_ptr::<u8>(),
                code_bytes.len(),
            );
            region::protect(
                code.as_ptr::<u8>(),
                code.len(),
                region::Protection::READ_EXECUTE,
            )?;
        }

        // Link data + linear memory at maximum size.
        let link_size = module.layout.total_size() as usize;
        let (min_pages, max_pages) = module
            .memory
            .as_ref()
            .map(|memory| {
                (
                    memory.initial.into_inner(),
                    memory.max.map_or(MAX_PAGES, |max| max.into_inner()),
                )
            })
            .unwrap_or((0, 0));
        let mem_bytes = max_pages as usize * BYTES_PER_PAGE as usize;
        let memory = vec![0u8; link_size + mem_bytes].into_boxed_slice();
        let lin_mem_offset = link_size;
        let aux = vec![0u8; 4096].into_boxed_slice();

        let mut instance = Self {
            code,
            memory,
            lin_mem_offset,
            layout: module.layout,
            ctx: Box::new(VmContext {
                lin_mem_base: core::ptr::null_mut(),
                link_base: core::ptr::null_mut(),
                memory_bytes: u64::from(min_pages) * u64::from(BYTES_PER_PAGE),
                max_pages,
                min_pages,
            }),
            _aux: aux,
            module_info: InstanceInfo {
                entry_points: module
                    .entry_points
                    .iter()
                    .map(|entry| (entry.name.clone(), entry.func_index, entry.adapter_offset))
                    .collect(),
                signatures: module
                    .signatures
                    .iter()
                    .map(|sig| (sig.params.len(), sig.results.len()))
                    .collect(),
                sig_of_func: module.func_sigs.clone(),
            },
        };
        instance.init_link_data(module);
        instance.init_memory_image(module);

        if module.start.is_some() {
            let adapter = module
                .entry_points
                .iter()
                .find(|entry| entry.name.is_empty())
                .map(|entry| entry.adapter_offset)
                .expect("the start function has an entry adapter");
            instance.invoke_adapter(adapter, &[], &mut [])?;
        }
        Ok(instance)
    }

    fn lin_mem_base(&mut self) -> *mut u8 {
        unsafe { self.memory.as_mut_ptr().add(self.lin_mem_offset) }
    }

    fn write_slot(&mut self, offset: i32, value: u64) {
        let base = self.lin_mem_base();
        unsafe { write_slot(base, offset, value) };
    }

    fn init_link_data(&mut self, module: &CompiledModule) {
        let base = self.lin_mem_base();
        self.ctx.lin_mem_base = base;
        self.ctx.link_base = base;

        let helper: unsafe extern "sysv64" fn(*mut VmContext, u64, u64, u64, u64) -> u64 =
            memory_helper;
        self.write_slot(LinkDataLayout::MEMORY_HELPER_PTR, helper as usize as u64);
        self.write_slot(LinkDataLayout::TRAP_STACK_REENTRY, 0);
        self.write_slot(LinkDataLayout::TRAP_REENTRY_PC, 0);
        let trap_handler =
            self.code.as_ptr::<u8>() as u64 + u64::from(module.helpers.generic_trap_handler);
        self.write_slot(LinkDataLayout::TRAP_HANDLER_PTR, trap_handler);
        // Fences low enough that any sane host stack passes.
        self.write_slot(LinkDataLayout::NATIVE_STACK_FENCE, 64 * 1024);
        self.write_slot(LinkDataLayout::STACK_FENCE, 64 * 1024);
        self.write_slot(LinkDataLayout::LAST_FRAME_REF_PTR, 0);
        let ctx_ptr = &mut *self.ctx as *mut VmContext as u64;
        self.write_slot(LinkDataLayout::CUSTOM_CTX, ctx_ptr);
        let aux_ptr = self._aux.as_ptr() as u64;
        let aux_len = self._aux.len() as u64;
        self.write_slot(LinkDataLayout::LINKED_MEM_PTR, aux_ptr);
        self.write_slot(LinkDataLayout::LINKED_MEM_LEN, aux_len);
        self.write_slot(LinkDataLayout::STATUS_FLAGS, 0);
        self.write_slot(
            LinkDataLayout::ACTUAL_LINMEM_BYTE_SIZE,
            self.ctx.memory_bytes,
        );
        let binary_start = self.code.as_ptr::<u8>() as u64;
        self.write_slot(LinkDataLayout::BINARY_START_ADDR, binary_start);
        let table_addr = base.wrapping_offset(module.layout.table_offset() as isize) as u64;
        self.write_slot(LinkDataLayout::TABLE_ADDR, table_addr);
        let packed = u64::from(self.ctx.min_pages) | (u64::from(self.ctx.max_pages) << 32);
        self.write_slot(LinkDataLayout::MEM_PAGES, packed);

        // Globals: their link-data slots carry the initial values; entry
        // adapters load the register-bound ones from here.
        for (index, global) in module.globals.iter().enumerate() {
            self.write_slot(module.layout.global_offset(index as u32), global.init);
        }
        // Import pointers start unbound; calling one faults via the null
        // check at bind time, so leave zero.
        for index in 0..module.layout.num_imports {
            self.write_slot(module.layout.import_ptr_offset(index), 0);
        }
        // The function table: 8-byte records of binary offset plus
        // signature index.
        if let Some(table) = &module.table {
            for (offset, funcs) in &table.elements {
                for (i, &func) in funcs.iter().enumerate() {
                    let slot = *offset + i as u32;
                    if slot >= module.layout.table_entries {
                        continue;
                    }
                    let record = u64::from(module.func_offsets[func as usize])
                        | (u64::from(module.func_sigs[func as usize]) << 32);
                    self.write_slot(
                        module.layout.table_offset() + 8 * slot as i32,
                        record,
                    );
                }
            }
        }
    }

    fn init_memory_image(&mut self, module: &CompiledModule) {
        let Some(memory) = &module.memory else {
            return;
        };
        for (offset, bytes) in &memory.data {
            let start = self.lin_mem_offset + *offset as usize;
            self.memory[start..start + bytes.len()].copy_from_slice(bytes);
        }
    }

    /// Binds the imported function `index` to a native code pointer
    /// following the compiled convention.
    ///
    /// # Safety
    ///
    /// `ptr` must be a function with the exact signature and convention
    /// the import was compiled against.
    pub unsafe fn bind_import(&mut self, index: u32, ptr: *const u8) {
        let offset = self.layout.import_ptr_offset(index);
        self.write_slot(offset, ptr as u64);
    }

    /// Invokes exported function `name` with `params` (one `u64` per
    /// parameter, bit patterns), writing one `u64` per result.
    pub fn invoke_export(
        &mut self,
        name: &str,
        params: &[u64],
        results: &mut [u64],
    ) -> Result<(), RuntimeError> {
        let (func_index, adapter) = self
            .module_info
            .entry_points
            .iter()
            .find(|(export, ..)| export == name)
            .map(|&(_, func, adapter)| (func, adapter))
            .ok_or(RuntimeError::UnknownExport)?;
        let sig = self.module_info.sig_of_func[func_index as usize];
        let (num_params, num_results) = self.module_info.signatures[sig as usize];
        debug_assert_eq!(params.len(), num_params);
        if results.len() < num_results {
            return Err(RuntimeError::ResultBufferTooSmall);
        }
        self.invoke_adapter(adapter, params, results)
    }

    fn invoke_adapter(
        &mut self,
        adapter_offset: u32,
        params: &[u64],
        results: &mut [u64],
    ) -> Result<(), RuntimeError> {
        #[cfg(target_arch = "x86_64")]
        {
            type EntryFn =
                unsafe extern "sysv64" fn(*const u64, *mut u64, *mut VmContext) -> u32;
            let entry: EntryFn = unsafe {
                core::mem::transmute(self.code.as_ptr::<u8>().add(adapter_offset as usize))
            };
            let ctx = &mut *self.ctx as *mut VmContext;
            let code = unsafe { entry(params.as_ptr(), results.as_mut_ptr(), ctx) };
            match code {
                0 => Ok(()),
                code => Err(RuntimeError::Trap(
                    TrapCode::try_from(code as u8).unwrap_or(TrapCode::BuiltinTrap),
                )),
            }
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            let _ = (adapter_offset, params, results);
            Err(RuntimeError::UnsupportedHost)
        }
    }

    /// Reads `len` bytes of linear memory at `offset`.
    pub fn read_memory(&self, offset: u32, len: usize) -> &[u8] {
        let start = self.lin_mem_offset + offset as usize;
        &self.memory[start..start + len]
    }
}
