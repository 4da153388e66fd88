//! End-to-end execution tests: compile, instantiate, run, observe.
//!
//! These drive the emitted x86-64 code directly, so they only run on
//! x86-64 hosts with the System V ABI.
#![cfg(all(target_arch = "x86_64", unix))]

use assert_matches::assert_matches;
use wasp::{
    compile_module,
    runtime::{Instance, RuntimeError},
    Config, TrapCode,
};

fn instantiate(wat: &str) -> Instance {
    let wasm = wat::parse_str(wat).expect("test module is valid wat");
    let module = compile_module(&wasm, &Config::default()).expect("test module compiles");
    Instance::new(&module).expect("test module instantiates")
}

fn call(instance: &mut Instance, name: &str, params: &[u64]) -> Result<Vec<u64>, RuntimeError> {
    let mut results = vec![0u64; 4];
    instance.invoke_export(name, params, &mut results)?;
    Ok(results)
}

fn call1(instance: &mut Instance, name: &str, params: &[u64]) -> u64 {
    call(instance, name, params).expect("invocation succeeds")[0]
}

fn trap_of(result: Result<Vec<u64>, RuntimeError>) -> TrapCode {
    match result {
        Err(RuntimeError::Trap(code)) => code,
        other => panic!("expected a trap, got {other:?}"),
    }
}

#[test]
fn constant_return() {
    let mut instance = instantiate(
        r#"(module (func (export "answer") (result i32) i32.const 42))"#,
    );
    assert_eq!(call1(&mut instance, "answer", &[]) as u32, 42);
}

#[test]
fn parameter_arithmetic() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "add") (param i32 i32) (result i32)
                local.get 0 local.get 1 i32.add)
            (func (export "sub") (param i32 i32) (result i32)
                local.get 0 local.get 1 i32.sub)
            (func (export "mul64") (param i64 i64) (result i64)
                local.get 0 local.get 1 i64.mul))
        "#,
    );
    assert_eq!(call1(&mut instance, "add", &[2, 3]) as u32, 5);
    assert_eq!(call1(&mut instance, "sub", &[2, 3]) as u32, (-1i32) as u32);
    assert_eq!(
        call1(&mut instance, "mul64", &[1 << 33, 3]),
        3 << 33
    );
}

#[test]
fn subtracting_a_value_from_itself_is_zero() {
    let mut instance = instantiate(
        r#"
        (module (func (export "f") (param i32) (result i32)
            local.get 0 local.get 0 i32.sub))
        "#,
    );
    for value in [0u64, 1, 0xFFFF_FFFF, 0x8000_0000] {
        assert_eq!(call1(&mut instance, "f", &[value]) as u32, 0);
    }
}

#[test]
fn commutative_operand_order_is_unobservable() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "ab") (param i32 i32) (result i32)
                local.get 0 local.get 1 i32.add)
            (func (export "ba") (param i32 i32) (result i32)
                local.get 1 local.get 0 i32.add))
        "#,
    );
    for (a, b) in [(1u64, 2u64), (0xFFFF_FFFF, 1), (123, 0)] {
        assert_eq!(
            call1(&mut instance, "ab", &[a, b]),
            call1(&mut instance, "ba", &[a, b]),
        );
    }
}

#[test]
fn fib_loop() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "fib") (param i32) (result i32)
                (local $a i32) (local $b i32) (local $i i32)
                i32.const 0 local.set $a
                i32.const 1 local.set $b
                block
                    loop
                        local.get $i local.get 0 i32.ge_u br_if 1
                        local.get $a local.get $b i32.add
                        local.get $b local.set $a
                        local.set $b
                        local.get $i i32.const 1 i32.add local.set $i
                        br 0
                    end
                end
                local.get $a))
        "#,
    );
    assert_eq!(call1(&mut instance, "fib", &[0]) as u32, 0);
    assert_eq!(call1(&mut instance, "fib", &[1]) as u32, 1);
    assert_eq!(call1(&mut instance, "fib", &[10]) as u32, 55);
    assert_eq!(call1(&mut instance, "fib", &[20]) as u32, 6765);
}

#[test]
fn if_else_and_select() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "pick") (param i32) (result i32)
                local.get 0
                if (result i32)
                    i32.const 11
                else
                    i32.const 22
                end)
            (func (export "sel") (param i32 i32 i32) (result i32)
                local.get 0 local.get 1 local.get 2 select))
        "#,
    );
    assert_eq!(call1(&mut instance, "pick", &[1]) as u32, 11);
    assert_eq!(call1(&mut instance, "pick", &[0]) as u32, 22);
    assert_eq!(call1(&mut instance, "sel", &[7, 9, 1]) as u32, 7);
    assert_eq!(call1(&mut instance, "sel", &[7, 9, 0]) as u32, 9);
}

#[test]
fn internal_calls_preserve_locals() {
    let mut instance = instantiate(
        r#"
        (module
            (func $double (param i32) (result i32)
                local.get 0 local.get 0 i32.add)
            (func (export "f") (param i32) (result i32)
                (local $kept i32)
                i32.const 1000 local.set $kept
                local.get 0 call $double
                local.get $kept i32.add))
        "#,
    );
    // double(21) + 1000
    assert_eq!(call1(&mut instance, "f", &[21]) as u32, 1042);
}

#[test]
fn indirect_dispatch() {
    let mut instance = instantiate(
        r#"
        (module
            (type $bin (func (param i32 i32) (result i32)))
            (table 5 funcref)
            (func $add (type $bin) local.get 0 local.get 1 i32.add)
            (func $sub (type $bin) local.get 0 local.get 1 i32.sub)
            (func $one (param i32) (result i32) local.get 0)
            (elem (i32.const 0) $add $sub $one)
            (func (export "dispatch") (param i32 i32 i32) (result i32)
                local.get 1 local.get 2 local.get 0
                call_indirect (type $bin)))
        "#,
    );
    assert_eq!(call1(&mut instance, "dispatch", &[0, 2, 3]) as u32, 5);
    assert_eq!(
        call1(&mut instance, "dispatch", &[1, 2, 3]) as u32,
        (-1i32) as u32
    );
    assert_eq!(
        trap_of(call(&mut instance, "dispatch", &[5, 2, 3])),
        TrapCode::IndirectCallOutOfBounds
    );
    assert_eq!(
        trap_of(call(&mut instance, "dispatch", &[2, 2, 3])),
        TrapCode::IndirectCallWrongSig
    );
    assert_eq!(
        trap_of(call(&mut instance, "dispatch", &[3, 2, 3])),
        TrapCode::CalledFunctionNotLinked
    );
}

#[test]
fn memory_store_load_and_bounds() {
    let mut instance = instantiate(
        r#"
        (module
            (memory 1 4)
            (func (export "store") (param i32 i32)
                local.get 0 local.get 1 i32.store)
            (func (export "load") (param i32) (result i32)
                local.get 0 i32.load))
        "#,
    );
    call(&mut instance, "store", &[0, 0x1234_5678]).unwrap();
    assert_eq!(call1(&mut instance, "load", &[0]) as u32, 0x1234_5678);
    assert_eq!(
        instance.read_memory(0, 4),
        0x1234_5678u32.to_le_bytes()
    );
    // A 4-byte load at 65533 crosses the end of the single page.
    assert_eq!(
        trap_of(call(&mut instance, "load", &[65533])),
        TrapCode::LinMemOutOfBoundsAccess
    );
    // The last fully-inside word is fine.
    assert_eq!(call1(&mut instance, "load", &[65532]) as u32, 0);
}

#[test]
fn memory_grow_and_size() {
    let mut instance = instantiate(
        r#"
        (module
            (memory 1 4)
            (func (export "size") (result i32) memory.size)
            (func (export "grow") (param i32) (result i32)
                local.get 0 memory.grow))
        "#,
    );
    assert_eq!(call1(&mut instance, "size", &[]) as u32, 1);
    // Growing by zero reports the current size without growing.
    assert_eq!(call1(&mut instance, "grow", &[0]) as u32, 1);
    assert_eq!(call1(&mut instance, "size", &[]) as u32, 1);
    assert_eq!(call1(&mut instance, "grow", &[1]) as u32, 1);
    assert_eq!(call1(&mut instance, "size", &[]) as u32, 2);
    // Growing past the declared maximum fails with -1.
    assert_eq!(call1(&mut instance, "grow", &[100]) as u32, u32::MAX);
    assert_eq!(call1(&mut instance, "size", &[]) as u32, 2);
}

#[test]
fn memory_copy_and_fill() {
    let mut instance = instantiate(
        r#"
        (module
            (memory 1)
            (func (export "fill") (param i32 i32 i32)
                local.get 0 local.get 1 local.get 2 memory.fill)
            (func (export "copy") (param i32 i32 i32)
                local.get 0 local.get 1 local.get 2 memory.copy)
            (func (export "load8") (param i32) (result i32)
                local.get 0 i32.load8_u))
        "#,
    );
    call(&mut instance, "fill", &[16, 0xAB, 8]).unwrap();
    assert_eq!(call1(&mut instance, "load8", &[16]) as u32, 0xAB);
    assert_eq!(call1(&mut instance, "load8", &[23]) as u32, 0xAB);
    assert_eq!(call1(&mut instance, "load8", &[24]) as u32, 0);
    call(&mut instance, "copy", &[100, 16, 8]).unwrap();
    assert_eq!(call1(&mut instance, "load8", &[107]) as u32, 0xAB);
    assert_eq!(
        trap_of(call(&mut instance, "copy", &[65530, 0, 100])),
        TrapCode::LinMemOutOfBoundsAccess
    );
}

#[test]
fn division_traps() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "div_s") (param i32 i32) (result i32)
                local.get 0 local.get 1 i32.div_s)
            (func (export "div_u") (param i32 i32) (result i32)
                local.get 0 local.get 1 i32.div_u)
            (func (export "rem_s") (param i32 i32) (result i32)
                local.get 0 local.get 1 i32.rem_s))
        "#,
    );
    assert_eq!(call1(&mut instance, "div_s", &[7, 2]) as u32, 3);
    assert_eq!(
        call1(&mut instance, "div_s", &[(-7i32) as u32 as u64, 2]) as u32,
        (-3i32) as u32
    );
    assert_eq!(call1(&mut instance, "div_u", &[7, 2]) as u32, 3);
    assert_eq!(
        trap_of(call(&mut instance, "div_u", &[7, 0])),
        TrapCode::DivZero
    );
    assert_eq!(
        trap_of(call(&mut instance, "rem_s", &[7, 0])),
        TrapCode::DivZero
    );
    assert_eq!(
        trap_of(call(
            &mut instance,
            "div_s",
            &[0x8000_0000, 0xFFFF_FFFF]
        )),
        TrapCode::DivOverflow
    );
    // INT_MIN % -1 is 0, not a trap.
    assert_eq!(
        call1(&mut instance, "rem_s", &[0x8000_0000, 0xFFFF_FFFF]) as u32,
        0
    );
}

#[test]
fn truncation_boundaries() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "trunc_s") (param f32) (result i32)
                local.get 0 i32.trunc_f32_s)
            (func (export "trunc_u") (param f32) (result i32)
                local.get 0 i32.trunc_f32_u)
            (func (export "convert_u") (param i32) (result f32)
                local.get 0 f32.convert_i32_u))
        "#,
    );
    let f32_bits = |value: f32| u64::from(value.to_bits());
    assert_eq!(call1(&mut instance, "trunc_s", &[f32_bits(3.7)]) as u32, 3);
    assert_eq!(
        call1(&mut instance, "trunc_s", &[f32_bits(-3.7)]) as u32,
        (-3i32) as u32
    );
    assert_eq!(
        trap_of(call(&mut instance, "trunc_s", &[f32_bits(f32::NAN)])),
        TrapCode::TruncOverflow
    );
    // 2^31 is the smallest f32 that overflows the signed range.
    assert_eq!(
        trap_of(call(&mut instance, "trunc_s", &[f32_bits(2147483648.0)])),
        TrapCode::TruncOverflow
    );
    assert_eq!(
        call1(&mut instance, "trunc_s", &[f32_bits(-2147483648.0)]) as u32,
        0x8000_0000
    );
    // -0.9 truncates to 0 inside the exclusive unsigned range; -1.0 is
    // out.
    assert_eq!(call1(&mut instance, "trunc_u", &[f32_bits(-0.9)]) as u32, 0);
    assert_eq!(
        trap_of(call(&mut instance, "trunc_u", &[f32_bits(-1.0)])),
        TrapCode::TruncOverflow
    );
    let converted = call1(&mut instance, "convert_u", &[0xFFFF_FFFF]);
    assert_eq!(f32::from_bits(converted as u32), 4.2949673e9);
}

#[test]
fn float_arithmetic_and_min_max() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "madd") (param f64 f64 f64) (result f64)
                local.get 0 local.get 1 f64.mul local.get 2 f64.add)
            (func (export "min") (param f64 f64) (result f64)
                local.get 0 local.get 1 f64.min)
            (func (export "max") (param f64 f64) (result f64)
                local.get 0 local.get 1 f64.max))
        "#,
    );
    let bits = |value: f64| value.to_bits();
    let val = |raw: u64| f64::from_bits(raw);
    assert_eq!(
        val(call1(&mut instance, "madd", &[bits(2.5), bits(4.0), bits(1.5)])),
        11.5
    );
    assert_eq!(
        val(call1(&mut instance, "min", &[bits(1.0), bits(2.0)])),
        1.0
    );
    assert_eq!(
        val(call1(&mut instance, "max", &[bits(1.0), bits(2.0)])),
        2.0
    );
    // NaN propagates.
    assert!(val(call1(&mut instance, "min", &[bits(f64::NAN), bits(2.0)])).is_nan());
    assert!(val(call1(&mut instance, "max", &[bits(1.0), bits(f64::NAN)])).is_nan());
    // Signed zeros: min picks -0, max picks +0.
    assert_eq!(
        call1(&mut instance, "min", &[bits(-0.0), bits(0.0)]),
        bits(-0.0)
    );
    assert_eq!(
        call1(&mut instance, "max", &[bits(-0.0), bits(0.0)]),
        bits(0.0)
    );
}

#[test]
fn multi_value_block() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "mv") (result i32)
                block (result i32 i32)
                    i32.const 1
                    i32.const 2
                end
                i32.sub))
        "#,
    );
    // The receiver sees 1 below, 2 on top; 1 - 2 = -1.
    assert_eq!(call1(&mut instance, "mv", &[]) as u32, (-1i32) as u32);
}

#[test]
fn br_table_dispatch() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "classify") (param i32) (result i32)
                block
                    block
                        block
                            local.get 0
                            br_table 0 1 2
                        end
                        i32.const 10
                        return
                    end
                    i32.const 20
                    return
                end
                i32.const 30))
        "#,
    );
    assert_eq!(call1(&mut instance, "classify", &[0]) as u32, 10);
    assert_eq!(call1(&mut instance, "classify", &[1]) as u32, 20);
    assert_eq!(call1(&mut instance, "classify", &[2]) as u32, 30);
    assert_eq!(call1(&mut instance, "classify", &[99]) as u32, 30);
}

#[test]
fn globals_persist_across_invocations() {
    let mut instance = instantiate(
        r#"
        (module
            (global $g (mut i32) (i32.const 5))
            (func (export "bump") (result i32)
                global.get $g i32.const 1 i32.add global.set $g
                global.get $g))
        "#,
    );
    assert_eq!(call1(&mut instance, "bump", &[]) as u32, 6);
    assert_eq!(call1(&mut instance, "bump", &[]) as u32, 7);
}

#[test]
fn spill_roundtrip_under_register_pressure() {
    // Twelve live values force spills; the sum checks every one survived
    // its round trip bit-exactly.
    let mut instance = instantiate(
        r#"
        (module
            (func (export "sum12") (param i32) (result i32)
                (local i32 i32 i32 i32 i32 i32 i32 i32 i32 i32 i32 i32)
                local.get 0 i32.const 1 i32.add local.set 1
                local.get 0 i32.const 2 i32.add local.set 2
                local.get 0 i32.const 3 i32.add local.set 3
                local.get 0 i32.const 4 i32.add local.set 4
                local.get 0 i32.const 5 i32.add local.set 5
                local.get 0 i32.const 6 i32.add local.set 6
                local.get 0 i32.const 7 i32.add local.set 7
                local.get 0 i32.const 8 i32.add local.set 8
                local.get 0 i32.const 9 i32.add local.set 9
                local.get 0 i32.const 10 i32.add local.set 10
                local.get 0 i32.const 11 i32.add local.set 11
                local.get 0 i32.const 12 i32.add local.set 12
                local.get 1 local.get 2 local.get 3 local.get 4
                local.get 5 local.get 6 local.get 7 local.get 8
                local.get 9 local.get 10 local.get 11 local.get 12
                i32.add i32.add i32.add i32.add i32.add i32.add
                i32.add i32.add i32.add i32.add i32.add))
        "#,
    );
    // sum of (x+1..x+12) with x=0: 78
    assert_eq!(call1(&mut instance, "sum12", &[0]) as u32, 78);
    assert_eq!(call1(&mut instance, "sum12", &[10]) as u32, 78 + 120);
}

#[test]
fn imported_native_function_v1() {
    let wasm = wat::parse_str(
        r#"
        (module
            (import "env" "mul2" (func $m (param i32) (result i32)))
            (func (export "f") (param i32) (result i32)
                local.get 0 call $m i32.const 1 i32.add))
        "#,
    )
    .unwrap();
    let module = compile_module(&wasm, &Config::default()).unwrap();
    let mut instance = Instance::new(&module).unwrap();

    // The v1 convention passes the opaque context as the trailing
    // argument.
    unsafe extern "sysv64" fn mul2(value: i32, _ctx: *mut u8) -> i32 {
        value * 2
    }
    unsafe {
        instance.bind_import(0, mul2 as usize as *const u8);
    }
    let mut results = [0u64; 1];
    instance.invoke_export("f", &[21], &mut results).unwrap();
    assert_eq!(results[0] as u32, 43);
}

#[test]
fn unreachable_traps() {
    let mut instance = instantiate(
        r#"(module (func (export "boom") unreachable))"#,
    );
    assert_matches!(
        call(&mut instance, "boom", &[]),
        Err(RuntimeError::Trap(_))
    );
}

#[test]
fn sign_extension_operators() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "ext8") (param i32) (result i32)
                local.get 0 i32.extend8_s)
            (func (export "ext16") (param i32) (result i32)
                local.get 0 i32.extend16_s)
            (func (export "wrap") (param i64) (result i32)
                local.get 0 i32.wrap_i64)
            (func (export "extend_u") (param i32) (result i64)
                local.get 0 i64.extend_i32_u)
            (func (export "extend_s") (param i32) (result i64)
                local.get 0 i64.extend_i32_s))
        "#,
    );
    assert_eq!(call1(&mut instance, "ext8", &[0x80]) as u32, 0xFFFF_FF80);
    assert_eq!(call1(&mut instance, "ext8", &[0x7F]) as u32, 0x7F);
    assert_eq!(call1(&mut instance, "ext16", &[0x8000]) as u32, 0xFFFF_8000);
    assert_eq!(
        call1(&mut instance, "wrap", &[0xAAAA_BBBB_CCCC_DDDD]) as u32,
        0xCCCC_DDDD
    );
    assert_eq!(
        call1(&mut instance, "extend_u", &[0xFFFF_FFFF]),
        0xFFFF_FFFF
    );
    assert_eq!(
        call1(&mut instance, "extend_s", &[0xFFFF_FFFF]),
        u64::MAX
    );
}
