use crate::execute;
use crate::value::LuaValue;

fn nums(values: &[LuaValue]) -> Vec<f64> {
    values.iter().map(|v| v.as_number().unwrap()).collect()
}

#[test]
fn p5_two_closures_share_one_upvalue() {
    let r = execute(
        r#"
        local x = 1
        local f = function() x = x+1; return x end
        local g = function() return x end
        f(); f()
        return g()
        "#,
    )
    .unwrap();
    assert_eq!(nums(&r), vec![3.0]);
}

#[test]
fn upvalue_survives_after_enclosing_scope_exits() {
    let r = execute(
        r#"
        local function mk()
          local count = 0
          local function inc() count = count + 1; return count end
          return inc
        end
        local inc = mk()
        return inc(), inc(), inc()
        "#,
    )
    .unwrap();
    assert_eq!(nums(&r), vec![1.0, 2.0, 3.0]);
}

#[test]
fn closures_over_different_loop_iterations_stay_independent() {
    // Each `for` iteration's `i` is a fresh local, so closures made in
    // different iterations must not end up sharing one upvalue cell.
    let r = execute(
        r#"
        local fns = {}
        for i = 1, 3 do
          fns[i] = function() return i end
        end
        return fns[1](), fns[2](), fns[3]()
        "#,
    )
    .unwrap();
    assert_eq!(nums(&r), vec![1.0, 2.0, 3.0]);
}

#[test]
fn nested_closures_capture_through_two_levels() {
    let r = execute(
        r#"
        local function outer()
          local x = 10
          local function middle()
            local function inner() return x end
            return inner()
          end
          return middle()
        end
        return outer()
        "#,
    )
    .unwrap();
    assert_eq!(nums(&r), vec![10.0]);
}

#[test]
fn recursive_local_function_calls_itself_through_its_own_upvalue() {
    let r = execute(
        r#"
        local function fib(n)
          if n < 2 then return n end
          return fib(n-1) + fib(n-2)
        end
        return fib(10)
        "#,
    )
    .unwrap();
    assert_eq!(nums(&r), vec![55.0]);
}
