use crate::gc::{GcConfig, Heap};
use crate::value::LuaValue;

fn heap() -> Heap {
    Heap::new(GcConfig::default())
}

#[test]
fn round_trip_set_get_delete_set() {
    let mut h = heap();
    let t = h.new_table();
    let key = LuaValue::String(h.intern_str("k"));
    let table = &mut h.tables.get_mut(t.0).data;
    table.set(key, LuaValue::Number(1.0));
    assert_eq!(table.get(&key).as_number(), Some(1.0));
    table.set(key, LuaValue::Nil);
    assert!(table.get(&key).is_nil());
    table.set(key, LuaValue::Number(2.0));
    assert_eq!(table.get(&key).as_number(), Some(2.0));
}

#[test]
fn array_part_handles_dense_integer_keys() {
    let mut h = heap();
    let t = h.new_table();
    let table = &mut h.tables.get_mut(t.0).data;
    for i in 1..=5 {
        table.set(LuaValue::Number(i as f64), LuaValue::Number((i * 10) as f64));
    }
    assert_eq!(table.len(), 5);
    assert_eq!(table.get(&LuaValue::Number(3.0)).as_number(), Some(30.0));
}

#[test]
fn sparse_keys_go_through_hash_part_and_border_still_resolves() {
    let mut h = heap();
    let t = h.new_table();
    let table = &mut h.tables.get_mut(t.0).data;
    table.set(LuaValue::Number(1.0), LuaValue::Number(10.0));
    table.set(LuaValue::Number(2.0), LuaValue::Number(20.0));
    table.set(LuaValue::Number(3.0), LuaValue::Number(30.0));
    table.set(LuaValue::Number(5.0), LuaValue::Number(50.0));
    assert_eq!(table.len(), 3);
    assert_eq!(table.get(&LuaValue::Number(5.0)).as_number(), Some(50.0));
}

#[test]
fn next_visits_every_entry_exactly_once() {
    let mut h = heap();
    let t = h.new_table();
    {
        let table = &mut h.tables.get_mut(t.0).data;
        for i in 1..=4 {
            table.set(LuaValue::Number(i as f64), LuaValue::Number((i * i) as f64));
        }
    }
    let table = &h.tables.get(t.0).data;
    let mut seen = Vec::new();
    let mut key = LuaValue::Nil;
    loop {
        match table.next(&key).unwrap() {
            Some((k, v)) => {
                seen.push((k.as_number().unwrap() as i64, v.as_number().unwrap() as i64));
                key = k;
            }
            None => break,
        }
    }
    seen.sort();
    assert_eq!(seen, vec![(1, 1), (2, 4), (3, 9), (4, 16)]);
}
