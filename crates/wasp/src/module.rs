use crate::{Error, UnsupportedKind};
use wasp_core::{MachineType, Pages, MAX_PAGES};
use wasmparser::{
    ExternalKind, FunctionBody, Operator, Parser, Payload, ValType, Validator, WasmFeatures,
};

/// A function signature over the four WebAssembly 1.0 value types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncType {
    /// Parameter types, in order.
    pub params: Vec<MachineType>,
    /// Result types, in order.
    pub results: Vec<MachineType>,
}

/// How an imported native function is reached at run time.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NativeSymbol {
    /// The address is known at compile time and embedded into the call
    /// sequence (builtin functions).
    Static { addr: usize },
    /// The address is read from the link-data slot assigned to this
    /// import; the runtime patches it at instantiation.
    Dynamic,
}

/// The calling convention an imported function follows.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ImportAbi {
    /// The native platform ABI with per-argument register dispatch.
    #[default]
    V1,
    /// The uniform `(params_ptr, results_ptr, ctx)` convention.
    V2,
}

/// An imported function entry.
#[derive(Debug, Clone)]
pub struct ImportedFunc {
    /// Import module name.
    pub module: String,
    /// Import field name.
    pub name: String,
    /// How the target address is obtained.
    pub symbol: NativeSymbol,
    /// Which convention the target follows.
    pub abi: ImportAbi,
}

/// One function of the module: its signature, plus import information for
/// imported entries.
#[derive(Debug, Clone)]
pub struct FuncMeta {
    /// Index into [`ModuleMeta::signatures`].
    pub sig_index: u32,
    /// `Some` for imported functions.
    pub imported: Option<ImportedFunc>,
}

/// A global variable declaration with its constant initializer.
#[derive(Debug, Copy, Clone)]
pub struct GlobalMeta {
    pub ty: MachineType,
    pub mutable: bool,
    /// Initial value, zero-extended bits.
    pub init: u64,
}

/// The function table (at most one).
#[derive(Debug, Clone, Default)]
pub struct TableMeta {
    pub initial: u32,
    pub max: Option<u32>,
    /// Active element segments: `(table_offset, function_indices)`.
    pub elements: Vec<(u32, Vec<u32>)>,
}

/// The linear memory (at most one).
#[derive(Debug, Clone)]
pub struct MemoryMeta {
    pub initial: Pages,
    pub max: Option<Pages>,
    /// Active data segments: `(memory_offset, bytes)`.
    pub data: Vec<(u32, Vec<u8>)>,
}

/// An exported item.
#[derive(Debug, Clone)]
pub struct ExportMeta {
    pub name: String,
    pub kind: ExternalKind,
    pub index: u32,
}

/// Parsed and validated module metadata: everything the compiler consumes
/// besides the per-function operator streams.
#[derive(Debug)]
pub struct ModuleMeta<'wasm> {
    pub signatures: Vec<FuncType>,
    /// All functions, imported first, in index order.
    pub functions: Vec<FuncMeta>,
    pub globals: Vec<GlobalMeta>,
    pub table: Option<TableMeta>,
    pub memory: Option<MemoryMeta>,
    pub exports: Vec<ExportMeta>,
    pub start: Option<u32>,
    /// Code bodies of the non-imported functions, in definition order.
    pub bodies: Vec<FunctionBody<'wasm>>,
}

impl ModuleMeta<'_> {
    /// Returns the number of imported functions, which is also the index
    /// of the first defined function.
    pub fn num_imported_funcs(&self) -> u32 {
        self.functions
            .iter()
            .take_while(|func| func.imported.is_some())
            .count() as u32
    }

    /// Returns the signature of function `index`.
    pub fn sig_of_func(&self, index: u32) -> &FuncType {
        &self.signatures[self.functions[index as usize].sig_index as usize]
    }
}

fn machine_type(ty: ValType) -> Result<MachineType, Error> {
    match ty {
        ValType::I32 => Ok(MachineType::I32),
        ValType::I64 => Ok(MachineType::I64),
        ValType::F32 => Ok(MachineType::F32),
        ValType::F64 => Ok(MachineType::F64),
        ValType::V128 => Err(Error::FeatureNotSupported(UnsupportedKind::Simd)),
        ValType::Ref(_) => Err(Error::FeatureNotSupported(UnsupportedKind::ReferenceTypes)),
    }
}

/// The feature set this compiler accepts: WebAssembly 1.0 plus multi-value
/// results, sign extension operators and the bulk memory operations the
/// backend lowers inline. Everything else is rejected during validation.
fn accepted_features() -> WasmFeatures {
    WasmFeatures::MUTABLE_GLOBAL
        | WasmFeatures::MULTI_VALUE
        | WasmFeatures::SIGN_EXTENSION
        | WasmFeatures::BULK_MEMORY
        | WasmFeatures::FLOATS
}

/// Evaluates the constant initializer expression of a global or segment
/// offset. The validator has already checked its type and shape.
fn eval_const_expr(expr: &wasmparser::ConstExpr<'_>) -> Result<u64, Error> {
    let mut reader = expr.get_operators_reader();
    let bits = match reader.read()? {
        Operator::I32Const { value } => value as u32 as u64,
        Operator::I64Const { value } => value as u64,
        Operator::F32Const { value } => u64::from(value.bits()),
        Operator::F64Const { value } => value.bits(),
        Operator::GlobalGet { .. } => {
            return Err(Error::FeatureNotSupported(UnsupportedKind::Proposal))
        }
        _ => return Err(Error::FeatureNotSupported(UnsupportedKind::Proposal)),
    };
    Ok(bits)
}

/// Parses and validates `wasm`, producing the metadata the compiler runs
/// on.
///
/// # Errors
///
/// - [`Error::Validation`] for malformed or invalid binaries.
/// - [`Error::FeatureNotSupported`] for recognized-but-rejected proposals
///   (SIMD, reference types, multiple memories or tables).
pub fn parse_module(wasm: &[u8]) -> Result<ModuleMeta<'_>, Error> {
    let mut validator = Validator::new_with_features(accepted_features());
    let mut signatures = Vec::new();
    let mut functions: Vec<FuncMeta> = Vec::new();
    let mut globals = Vec::new();
    let mut table: Option<TableMeta> = None;
    let mut memory: Option<MemoryMeta> = None;
    let mut exports = Vec::new();
    let mut start = None;
    let mut bodies = Vec::new();

    for payload in Parser::new(0).parse_all(wasm) {
        let payload = payload?;
        match &payload {
            Payload::TypeSection(reader) => {
                validator.type_section(reader)?;
                for group in reader.clone() {
                    for ty in group?.into_types() {
                        let func = ty
                            .unwrap_func();
                        let params = func
                            .params()
                            .iter()
                            .map(|&ty| machine_type(ty))
                            .collect::<Result<Vec<_>, _>>()?;
                        let results = func
                            .results()
                            .iter()
                            .map(|&ty| machine_type(ty))
                            .collect::<Result<Vec<_>, _>>()?;
                        signatures.push(FuncType { params, results });
                    }
                }
            }
            Payload::ImportSection(reader) => {
                validator.import_section(reader)?;
                for import in reader.clone() {
                    let import = import?;
                    match import.ty {
                        wasmparser::TypeRef::Func(sig_index) => {
                            functions.push(FuncMeta {
                                sig_index,
                                imported: Some(ImportedFunc {
                                    module: import.module.to_string(),
                                    name: import.name.to_string(),
                                    symbol: NativeSymbol::Dynamic,
                                    abi: ImportAbi::default(),
                                }),
                            });
                        }
                        _ => {
                            return Err(Error::FeatureNotSupported(UnsupportedKind::Proposal));
                        }
                    }
                }
            }
            Payload::FunctionSection(reader) => {
                validator.function_section(reader)?;
                for sig_index in reader.clone() {
                    functions.push(FuncMeta {
                        sig_index: sig_index?,
                        imported: None,
                    });
                }
            }
            Payload::TableSection(reader) => {
                validator.table_section(reader)?;
                for entry in reader.clone() {
                    let entry = entry?;
                    if table.is_some() {
                        return Err(Error::FeatureNotSupported(UnsupportedKind::MultiTable));
                    }
                    table = Some(TableMeta {
                        initial: entry.ty.initial as u32,
                        max: entry.ty.maximum.map(|max| max as u32),
                        elements: Vec::new(),
                    });
                }
            }
            Payload::MemorySection(reader) => {
                validator.memory_section(reader)?;
                for entry in reader.clone() {
                    let entry = entry?;
                    if memory.is_some() {
                        return Err(Error::FeatureNotSupported(UnsupportedKind::MultiMemory));
                    }
                    let initial = Pages::new(entry.initial.min(u64::from(MAX_PAGES)) as u32)
                        .expect("validator bounds initial pages");
                    let max = entry
                        .maximum
                        .map(|max| Pages::new(max.min(u64::from(MAX_PAGES)) as u32))
                        .map(|pages| pages.expect("validator bounds maximum pages"));
                    memory = Some(MemoryMeta {
                        initial,
                        max,
                        data: Vec::new(),
                    });
                }
            }
            Payload::GlobalSection(reader) => {
                validator.global_section(reader)?;
                for global in reader.clone() {
                    let global = global?;
                    globals.push(GlobalMeta {
                        ty: machine_type(global.ty.content_type)?,
                        mutable: global.ty.mutable,
                        init: eval_const_expr(&global.init_expr)?,
                    });
                }
            }
            Payload::ExportSection(reader) => {
                validator.export_section(reader)?;
                for export in reader.clone() {
                    let export = export?;
                    exports.push(ExportMeta {
                        name: export.name.to_string(),
                        kind: export.kind,
                        index: export.index,
                    });
                }
            }
            Payload::StartSection { func, range } => {
                validator.start_section(*func, range)?;
                start = Some(*func);
            }
            Payload::ElementSection(reader) => {
                validator.element_section(reader)?;
                for element in reader.clone() {
                    let element = element?;
                    let wasmparser::ElementKind::Active {
                        table_index,
                        offset_expr,
                    } = &element.kind
                    else {
                        return Err(Error::FeatureNotSupported(UnsupportedKind::Proposal));
                    };
                    if table_index.unwrap_or(0) != 0 {
                        return Err(Error::FeatureNotSupported(UnsupportedKind::MultiTable));
                    }
                    let offset = eval_const_expr(offset_expr)? as u32;
                    let wasmparser::ElementItems::Functions(items) = element.items else {
                        return Err(Error::FeatureNotSupported(
                            UnsupportedKind::ReferenceTypes,
                        ));
                    };
                    let funcs = items.into_iter().collect::<Result<Vec<_>, _>>()?;
                    let table = table
                        .as_mut()
                        .expect("validator requires a table for active elements");
                    table.elements.push((offset, funcs));
                }
            }
            Payload::DataSection(reader) => {
                validator.data_section(reader)?;
                for segment in reader.clone() {
                    let segment = segment?;
                    let wasmparser::DataKind::Active {
                        memory_index,
                        offset_expr,
                    } = &segment.kind
                    else {
                        return Err(Error::FeatureNotSupported(UnsupportedKind::Proposal));
                    };
                    if *memory_index != 0 {
                        return Err(Error::FeatureNotSupported(UnsupportedKind::MultiMemory));
                    }
                    let offset = eval_const_expr(offset_expr)? as u32;
                    let memory = memory
                        .as_mut()
                        .expect("validator requires a memory for active data");
                    memory.data.push((offset, segment.data.to_vec()));
                }
            }
            Payload::CodeSectionStart { count, range, .. } => {
                validator.code_section_start(*count, range)?;
            }
            Payload::CodeSectionEntry(body) => {
                let func_validator = validator.code_section_entry(body)?;
                func_validator
                    .into_validator(Default::default())
                    .validate(body)?;
                bodies.push(body.clone());
            }
            other => {
                // Version, custom sections, section ends: validate and
                // move on.
                let _ = validator.payload(other)?;
            }
        }
    }

    Ok(ModuleMeta {
        signatures,
        functions,
        globals,
        table,
        memory,
        exports,
        start,
        bodies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn parse_wat(wat: &str) -> Result<(), Error> {
        let wasm = wat::parse_str(wat).unwrap();
        parse_module(&wasm).map(drop)
    }

    #[test]
    fn parses_a_small_module() {
        let wasm = wat::parse_str(
            r#"
            (module
                (memory 1 4)
                (global $g (mut i32) (i32.const 7))
                (table 2 funcref)
                (elem (i32.const 0) $f $f)
                (func $f (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add)
                (export "f" (func $f)))
            "#,
        )
        .unwrap();
        let meta = parse_module(&wasm).unwrap();
        assert_eq!(meta.functions.len(), 1);
        assert_eq!(meta.num_imported_funcs(), 0);
        assert_eq!(meta.globals.len(), 1);
        assert_eq!(meta.globals[0].init, 7);
        assert_eq!(meta.table.as_ref().unwrap().elements.len(), 1);
        assert_eq!(meta.memory.as_ref().unwrap().initial.into_inner(), 1);
        assert_eq!(meta.sig_of_func(0).params.len(), 2);
        assert_eq!(meta.bodies.len(), 1);
    }

    #[test]
    fn rejects_simd() {
        let result = parse_wat(
            r#"
            (module (func (result v128) v128.const i64x2 0 0))
            "#,
        );
        assert_matches!(result, Err(Error::Validation(_)));
    }

    #[test]
    fn rejects_invalid_bytecode() {
        let wasm = wat::parse_str("(module (func (result i32) i32.const 1))").unwrap();
        // Corrupt the body so validation fails.
        let mut broken = wasm.clone();
        let pos = broken.len() - 3;
        broken[pos] = 0x6A; // i32.add with an empty stack
        assert_matches!(parse_module(&broken), Err(Error::Validation(_)));
    }

    #[test]
    fn multi_value_results_are_accepted() {
        parse_wat(
            r#"
            (module (func (result i32 i32) i32.const 1 i32.const 2))
            "#,
        )
        .unwrap();
    }
}
