use crate::value::LuaValue;
use crate::vm::LuaVM;
use crate::{execute, execute_with_vm};

fn nums(values: &[LuaValue]) -> Vec<f64> {
    values.iter().map(|v| v.as_number().unwrap()).collect()
}

fn as_str(vm: &LuaVM, v: &LuaValue) -> String {
    match v {
        LuaValue::String(id) => vm.heap().strings.get(id.0).data.as_str().to_string(),
        other => panic!("not a string: {:?}", other.type_name()),
    }
}

#[test]
fn s1_table_literal_with_sparse_index_and_length() {
    let r = execute("local t = {10, 20, 30}\nt[5] = 50\nreturn #t, t[1], t[3], t[5]").unwrap();
    assert_eq!(nums(&r), vec![3.0, 10.0, 30.0, 50.0]);
}

#[test]
fn s2_recursive_factorial() {
    let r = execute(
        "local function fact(n) if n<2 then return 1 end return n*fact(n-1) end\nreturn fact(6)",
    )
    .unwrap();
    assert_eq!(nums(&r), vec![720.0]);
}

#[test]
fn s3_independent_closures_share_their_own_upvalue() {
    let r = execute(
        r#"
        local function mk()
          local x = 0
          return function() x = x+1; return x end
        end
        local f = mk(); local g = mk()
        return f(), f(), g(), f(), g()
        "#,
    )
    .unwrap();
    assert_eq!(nums(&r), vec![1.0, 2.0, 1.0, 3.0, 2.0]);
}

#[test]
fn s4_arithmetic_and_concat_coerce_strings() {
    let mut vm = LuaVM::new();
    let r = execute_with_vm(&mut vm, r#"return 1 + "2", "3" .. 4, "0x10" + 0"#).unwrap();
    assert_eq!(r[0].as_number(), Some(3.0));
    assert_eq!(as_str(&vm, &r[1]), "34");
    assert_eq!(r[2].as_number(), Some(16.0));
}

#[test]
fn s5_indexing_a_nil_field_raises_a_located_error() {
    let err = execute("local t = {}\nreturn t.missing.field").unwrap_err();
    assert!(err.message.contains("test:2:") || err.message.contains(":2:"));
    assert!(err.message.contains("attempt to index"));
}

#[test]
fn s6_numeric_for_accumulates() {
    let r = execute("local s = 0\nfor i=1,10 do s = s + i end\nreturn s").unwrap();
    assert_eq!(nums(&r), vec![55.0]);
}

#[test]
fn p6_numeric_for_step_zero_is_a_runtime_error() {
    let err = execute("for i=1,10,0 do end").unwrap_err();
    assert!(err.message.contains("'for' step"));
}

#[test]
fn p6_numeric_for_descending_step() {
    let r = execute("local out = {}\nlocal n = 0\nfor i=5,1,-1 do n = n + 1 end\nreturn n").unwrap();
    assert_eq!(nums(&r), vec![5.0]);
}

#[test]
fn p8_and_short_circuits_without_evaluating_rhs() {
    let r = execute(
        r#"
        local touched = false
        local function side() touched = true; return true end
        local ok = false and side()
        return ok, touched
        "#,
    )
    .unwrap();
    assert!(matches!(r[0], LuaValue::Boolean(false)));
    assert!(matches!(r[1], LuaValue::Boolean(false)));
}

#[test]
fn p8_or_short_circuits_without_evaluating_rhs() {
    let r = execute(
        r#"
        local touched = false
        local function side() touched = true; return false end
        local ok = true or side()
        return ok, touched
        "#,
    )
    .unwrap();
    assert!(matches!(r[0], LuaValue::Boolean(true)));
    assert!(matches!(r[1], LuaValue::Boolean(false)));
}

#[test]
fn p9_error_line_matches_the_faulting_statement() {
    let err = execute("local a = 1\nlocal b = 2\nreturn a + nil").unwrap_err();
    assert!(err.message.contains(":3:"));
}

#[test]
fn multiple_assignment_adjusts_extra_and_missing_values() {
    let r = execute("local a, b, c = 1, 2\nreturn a, b, c").unwrap();
    assert_eq!(r[0].as_number(), Some(1.0));
    assert_eq!(r[1].as_number(), Some(2.0));
    assert!(r[2].is_nil());
}

#[test]
fn nested_call_argument_does_not_corrupt_earlier_arguments() {
    // Regression: a prior register-allocation bug placed a nested
    // call's result ahead of an already-parsed earlier argument.
    let r = execute(
        r#"
        local function g() return 9 end
        local function f(a, b) return a, b end
        return f(1, g())
        "#,
    )
    .unwrap();
    assert_eq!(nums(&r), vec![1.0, 9.0]);
}
