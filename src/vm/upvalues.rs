//! Open-upvalue finder and close (spec §4.7, invariant I3).

use crate::gc::{GcHeader, GcUpvalue, Heap, UpvalueId};
use crate::value::LuaValue;
use crate::vm::closure::Upvalue;

/// Find (sharing) or create the open upvalue aliasing `stack_index`.
/// `open` is kept sorted by descending stack address.
pub fn find_or_create(
    heap: &mut Heap,
    open: &mut Vec<UpvalueId>,
    stack_index: usize,
) -> UpvalueId {
    let mut insert_at = open.len();
    for (i, &id) in open.iter().enumerate() {
        let obj = heap.upvalues.get(id.0);
        if let Upvalue::Open { stack_index: idx } = obj.data {
            if idx == stack_index {
                return id;
            }
            if idx < stack_index {
                insert_at = i;
                break;
            }
        }
    }
    let idx = heap.upvalues.insert(GcUpvalue {
        header: GcHeader::new(),
        data: Upvalue::Open { stack_index },
    });
    let id = UpvalueId(idx);
    open.insert(insert_at, id);
    id
}

/// Close every open upvalue at or above `level`: copy the stack slot
/// into the upvalue's own storage and unlink it from `open`.
pub fn close_from(heap: &mut Heap, open: &mut Vec<UpvalueId>, stack: &[LuaValue], level: usize) {
    open.retain(|&id| {
        let obj = heap.upvalues.get(id.0);
        match obj.data {
            Upvalue::Open { stack_index } if stack_index >= level => {
                let value = stack[stack_index];
                heap.upvalues.get_mut(id.0).data = Upvalue::Closed(value);
                false
            }
            Upvalue::Open { stack_index } => {
                // list is sorted descending: once we see one below
                // `level` every later (smaller) entry is also below.
                debug_assert!(stack_index < level);
                true
            }
            Upvalue::Closed(_) => true,
        }
    });
}

pub fn read(heap: &Heap, stack: &[LuaValue], id: UpvalueId) -> LuaValue {
    match heap.upvalues.get(id.0).data {
        Upvalue::Open { stack_index } => stack[stack_index],
        Upvalue::Closed(v) => v,
    }
}

pub fn write(heap: &mut Heap, stack: &mut [LuaValue], id: UpvalueId, value: LuaValue) {
    let is_open = matches!(heap.upvalues.get(id.0).data, Upvalue::Open { .. });
    if is_open {
        if let Upvalue::Open { stack_index } = heap.upvalues.get(id.0).data {
            stack[stack_index] = value;
        }
    } else {
        heap.upvalues.get_mut(id.0).data = Upvalue::Closed(value);
    }
}
