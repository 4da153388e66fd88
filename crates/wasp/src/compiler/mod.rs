//! The compiler driver: owns all per-compilation state and walks the
//! module, lowering every function body in one pass.

pub(crate) mod bump;
pub(crate) mod common;
pub(crate) mod driver;
pub(crate) mod elem;
pub(crate) mod labels;
mod mem_writer;
pub(crate) mod module_info;
pub(crate) mod regcopy;
pub(crate) mod stack;
pub(crate) mod storage;

pub use mem_writer::MemWriter;

use self::{
    driver::CtrlFrame,
    labels::LabelRegistry,
    module_info::ModuleInfo,
    stack::Stack,
};
use crate::{
    binary::{CompiledModule, ExportedEntryPoint, LinkDataLayout, ManagedBinary},
    module::{parse_module, ModuleMeta},
    Config, Error, LimitKind,
};
use wasmparser::ExternalKind;

/// All state of one compilation run.
///
/// A single `Compiler` value holds exclusive borrows of the output buffer,
/// the operand stack, the module info and the label registry for the whole
/// run; the backend, the instruction selector and the common helpers are
/// method families on this type, split across their modules.
pub struct Compiler<'meta, 'wasm> {
    pub(crate) meta: &'meta ModuleMeta<'wasm>,
    pub(crate) config: Config,
    pub(crate) layout: LinkDataLayout,
    /// The code buffer.
    pub(crate) out: MemWriter,
    /// The symbolic operand stack.
    pub(crate) stack: Stack,
    /// Per-module and per-function bookkeeping.
    pub(crate) info: ModuleInfo,
    /// Branch targets and function-body patch chains.
    pub(crate) labels: LabelRegistry,
    /// Control frame stack, parallel to the markers on the operand stack.
    pub(crate) ctrl: Vec<CtrlFrame>,
    /// Whether the current code position is reachable.
    pub(crate) reachable: bool,
}

impl<'meta, 'wasm> Compiler<'meta, 'wasm> {
    fn new(meta: &'meta ModuleMeta<'wasm>, config: Config, layout: LinkDataLayout) -> Result<Self, Error> {
        let mut labels = LabelRegistry::default();
        let mut info = ModuleInfo::default();
        info.func_labels = (0..meta.functions.len())
            .map(|_| labels.new_label())
            .collect();
        info.table_initial = meta.table.as_ref().map_or(0, |table| table.initial);
        info.global_types = meta.globals.iter().map(|global| global.ty).collect();
        Ok(Self {
            meta,
            config,
            layout,
            out: MemWriter::with_capacity(4096),
            stack: Stack::new()?,
            info,
            labels,
            ctrl: Vec::new(),
            reachable: true,
        })
    }

    /// Dedicates registers to the leading globals at module prologue; the
    /// rest live in their link-data slots.
    ///
    /// One general purpose and one float register are bound: `r12` is
    /// callee-saved in the native ABI and outside the call-scratch set, so
    /// internal calls preserve it for free; the float binding is written
    /// back around native calls like any register global.
    fn assign_global_storage(&mut self) {
        use crate::isa::x86_64::regs::{Reg, RegMask};
        use module_info::GlobalStorage;
        let mut int_bound = false;
        let mut float_bound = false;
        for (index, global) in self.meta.globals.iter().enumerate() {
            let storage = if global.ty.is_int() && !int_bound && global.mutable {
                int_bound = true;
                self.info.global_regs |= RegMask::of(Reg::R12);
                GlobalStorage::Reg(Reg::R12)
            } else if global.ty.is_float() && !float_bound && global.mutable {
                float_bound = true;
                self.info.global_regs |= RegMask::of(Reg::Xmm14);
                GlobalStorage::Reg(Reg::Xmm14)
            } else {
                GlobalStorage::LinkData(self.layout.global_offset(index as u32))
            };
            self.info.global_storage.push(storage);
        }
    }
}

/// Compiles a validated WebAssembly module to native code.
///
/// This is the single entry point of the pipeline: it parses and validates
/// `wasm`, then performs one left-to-right pass over every function body,
/// emitting machine code, the per-module helper functions, the
/// Wasm-to-native adapters for imports and a host-ABI entry adapter for
/// every exported function.
pub fn compile_module(wasm: &[u8], config: &Config) -> Result<CompiledModule, Error> {
    let meta = parse_module(wasm)?;
    if meta.functions.len() as u64 > 1 << 31 {
        return Err(Error::ImplementationLimit(LimitKind::TooManyFunctions));
    }
    let layout = LinkDataLayout::new(
        meta.globals.len() as u32,
        meta.num_imported_funcs(),
        meta.table.as_ref().map_or(0, |table| table.initial),
    );

    let mut compiler = Compiler::new(&meta, config.clone(), layout)?;
    compiler.assign_global_storage();
    compiler.emit_module_helpers()?;

    // Function bodies in index order; calls to later functions go through
    // the per-function patch chains and resolve as bodies are emitted.
    let num_imported = meta.num_imported_funcs();
    for (defined_index, body) in meta.bodies.iter().enumerate() {
        let func_index = num_imported + defined_index as u32;
        let body_start = compiler.out.pos();
        compiler.compile_function(func_index, body).inspect_err(|_| {
            // Partial-function bytes never leak into the output.
            compiler.out.truncate(body_start);
        })?;
    }

    // Wasm-to-native adapters so imported functions are callable through
    // the Wasm ABI (directly and through the indirect-call table).
    for import_index in 0..num_imported {
        compiler.emit_wasm_to_native_adapter(import_index)?;
    }

    // Host-ABI entry adapters for the exports.
    let mut entry_points = Vec::new();
    for export in &meta.exports {
        if export.kind != ExternalKind::Func {
            continue;
        }
        let adapter_offset = compiler.emit_function_entry_point(export.index)?;
        entry_points.push(ExportedEntryPoint {
            name: export.name.clone(),
            func_index: export.index,
            adapter_offset,
        });
    }
    if let Some(start) = meta.start {
        let adapter_offset = compiler.emit_function_entry_point(start)?;
        entry_points.push(ExportedEntryPoint {
            name: String::new(),
            func_index: start,
            adapter_offset,
        });
    }

    debug_assert!(
        compiler.labels.all_resolved(),
        "pending branch chains survived compilation"
    );

    let func_offsets = compiler
        .info
        .func_labels
        .iter()
        .map(|&label| {
            compiler
                .labels
                .pinned_pos(label)
                .expect("every function label is pinned after compilation")
        })
        .collect();
    let helpers = compiler.info.helpers;

    Ok(CompiledModule {
        binary: ManagedBinary::new(compiler.out.into_bytes()),
        layout,
        helpers,
        entry_points,
        func_offsets,
        signatures: meta.signatures.clone(),
        func_sigs: meta.functions.iter().map(|func| func.sig_index).collect(),
        imports: meta
            .functions
            .iter()
            .filter_map(|func| func.imported.clone())
            .collect(),
        globals: meta.globals.clone(),
        table: meta.table.clone(),
        memory: meta.memory.clone(),
        exports: meta.exports.clone(),
        start: meta.start,
    })
}
