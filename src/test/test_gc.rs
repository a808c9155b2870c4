use crate::gc::GcRoots;
use crate::value::LuaValue;
use crate::vm::LuaVM;

#[test]
fn collect_garbage_frees_unreachable_tables() {
    let mut vm = LuaVM::new();
    // Create a table reachable only from the stack, then drop it.
    let id = vm.heap_mut().new_table();
    vm.main.stack.push(LuaValue::Table(id));
    let before = vm.heap().tables.live_count;
    assert_eq!(vm.collect_garbage(), 0, "still on the stack, must survive");
    assert_eq!(vm.heap().tables.live_count, before);

    vm.main.stack.pop();
    let freed = vm.collect_garbage();
    assert!(freed > 0);
    assert_eq!(vm.heap().tables.live_count, before - 1);
}

#[test]
fn global_table_is_always_a_root() {
    let mut vm = LuaVM::new();
    let globals = vm.global.globals;
    vm.collect_garbage();
    // The arena slot for the global table must still be live; `get`
    // would panic into a freed slot otherwise.
    let _ = vm.heap().tables.get(globals.0);
}

#[test]
fn gc_roots_cover_open_upvalues() {
    let mut vm = LuaVM::new();
    let roots = GcRoots {
        stack: &vm.main.stack,
        globals: vm.global.globals,
        open_upvalues: &vm.main.open_upvalues,
        frame_functions: &[],
    };
    assert!(roots.open_upvalues.is_empty());
}

#[test]
fn table_survives_a_collection_reachable_only_through_a_nested_value() {
    let mut vm = LuaVM::new();
    let outer = vm.heap_mut().new_table();
    let inner = vm.heap_mut().new_table();
    let key = LuaValue::String(vm.intern("nested"));
    vm.heap_mut()
        .tables
        .get_mut(outer.0)
        .data
        .set(key, LuaValue::Table(inner));
    vm.main.stack.push(LuaValue::Table(outer));

    vm.collect_garbage();

    let got = vm.heap().tables.get(outer.0).data.get(&key);
    assert!(matches!(got, LuaValue::Table(t) if t == inner));
}
