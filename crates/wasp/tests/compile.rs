//! Compilation-level tests: these inspect the compiler's output without
//! executing it, so they run on every host architecture.

use assert_matches::assert_matches;
use wasp::{compile_module, Config, Error, UnsupportedKind};

fn compile(wat: &str) -> wasp::CompiledModule {
    let wasm = wat::parse_str(wat).expect("test module is valid wat");
    compile_module(&wasm, &Config::default()).expect("test module compiles")
}

#[test]
fn empty_module_compiles() {
    let module = compile("(module)");
    assert!(module.entry_points.is_empty());
    assert!(module.func_offsets.is_empty());
}

#[test]
fn every_function_body_is_pinned() {
    let module = compile(
        r#"
        (module
            (func $a (result i32) call $b i32.const 1 i32.add)
            (func $b (result i32) i32.const 41)
            (export "a" (func $a)))
        "#,
    );
    assert_eq!(module.func_offsets.len(), 2);
    // Function a calls forward into b; both offsets resolved and inside
    // the binary.
    for &offset in &module.func_offsets {
        assert!((offset as usize) < module.binary.len());
    }
    assert_eq!(module.entry_points.len(), 1);
    assert!(module.entry_point("a").is_some());
}

#[test]
fn comparison_branch_fusion_emits_no_setcc() {
    let module = compile(
        r#"
        (module
            (func (export "f") (param i32) (result i32)
                block
                    local.get 0
                    i32.const 0
                    i32.eq
                    br_if 0
                end
                i32.const 7))
        "#,
    );
    // The fused path must consist of one cmp and one conditional jump,
    // with no `setcc` materialization (0F 90..0F 9F) anywhere in the
    // function body.
    let body_start = module.func_offsets[0] as usize;
    let body = &module.binary.as_slice()[body_start..];
    let setcc = body
        .windows(2)
        .any(|pair| pair[0] == 0x0F && (0x90..=0x9F).contains(&pair[1]));
    assert!(!setcc, "fused compare+branch materialized its result");
}

#[test]
fn unfused_comparison_materializes() {
    let module = compile(
        r#"
        (module
            (func (export "f") (param i32) (result i32)
                local.get 0
                i32.const 0
                i32.eq))
        "#,
    );
    let body_start = module.func_offsets[0] as usize;
    let body = &module.binary.as_slice()[body_start..];
    let setcc = body
        .windows(2)
        .any(|pair| pair[0] == 0x0F && (0x90..=0x9F).contains(&pair[1]));
    assert!(setcc, "a comparison result returned to the caller needs setcc");
}

#[test]
fn imports_get_adapters_and_link_slots() {
    let module = compile(
        r#"
        (module
            (import "env" "helper" (func $h (param i32) (result i32)))
            (func (export "f") (param i32) (result i32)
                local.get 0 call $h))
        "#,
    );
    assert_eq!(module.imports.len(), 1);
    assert_eq!(module.layout.num_imports, 1);
    // The import's function label points at its Wasm-to-native adapter.
    assert!((module.func_offsets[0] as usize) < module.binary.len());
}

#[test]
fn multi_value_import_results_are_rejected() {
    let wasm = wat::parse_str(
        r#"
        (module
            (import "env" "pair" (func $p (result i32 i32)))
            (func (export "f") (result i32)
                call $p i32.sub))
        "#,
    )
    .unwrap();
    assert_matches!(
        compile_module(&wasm, &Config::default()),
        Err(Error::FeatureNotSupported(
            UnsupportedKind::V2MultiValueReturns
        ))
    );
}

#[test]
fn helpers_are_emitted_before_the_first_function() {
    let module = compile(r#"(module (func (export "f")))"#);
    // The generic trap handler is the first helper in the image.
    assert_eq!(module.helpers.generic_trap_handler, 0);
    assert!(module.helpers.extension_request > 0);
    assert!(module.helpers.mem_grow > module.helpers.extension_request);
    assert!(module.helpers.stacktrace_collector > 0);
    assert!(module.func_offsets[0] > module.helpers.stacktrace_collector);
}

#[test]
fn table_metadata_flows_into_the_layout() {
    let module = compile(
        r#"
        (module
            (table 4 funcref)
            (func $f (result i32) i32.const 1)
            (elem (i32.const 1) $f))
        "#,
    );
    assert_eq!(module.layout.table_entries, 4);
    let table = module.table.as_ref().unwrap();
    assert_eq!(table.elements, vec![(1, vec![0])]);
}

#[test]
fn deeply_nested_blocks_compile() {
    let mut body = String::new();
    for _ in 0..64 {
        body.push_str("(block ");
    }
    body.push_str("(br 63)");
    for _ in 0..64 {
        body.push(')');
    }
    let module = compile(&format!(
        "(module (func (export \"deep\") {body}))"
    ));
    assert!(module.entry_point("deep").is_some());
}

#[test]
fn dead_code_after_unconditional_branches_is_skipped() {
    let module = compile(
        r#"
        (module
            (func (export "f") (result i32)
                block (result i32)
                    i32.const 1
                    br 0
                    i32.const 2
                    i32.add
                end))
        "#,
    );
    assert!(module.entry_point("f").is_some());
}

#[test]
fn loops_with_parameters_compile() {
    let module = compile(
        r#"
        (module
            (func (export "count") (param i32) (result i32)
                (local $acc i32)
                local.get 0
                loop (param i32) (result i32)
                    i32.const 1
                    i32.sub
                    local.tee $acc
                    local.get $acc
                    i32.const 0
                    i32.gt_s
                    br_if 0
                end))
        "#,
    );
    assert!(module.entry_point("count").is_some());
}
