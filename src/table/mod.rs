//! Hybrid array+hash table (spec §4.3).

mod hash;

pub use hash::hash_key;
use hash::HashPart;

use crate::gc::TableId;
use crate::value::LuaValue;

const MAX_BUCKET_BITS: u32 = 30;

pub struct LuaTable {
    array: Vec<LuaValue>,
    hash: HashPart,
    pub metatable: Option<TableId>,
    /// Cache bitmap of absent metamethods; bit i set means method i is
    /// confirmed missing on this table's metatable chain.
    pub flags: u8,
}

fn raw_eq(a: &LuaValue, b: &LuaValue) -> bool {
    a.raw_eq(b)
}

/// An integer-valued number key in `[1, len]` routes to the array.
fn array_index(key: &LuaValue, array_len: usize) -> Option<usize> {
    if let LuaValue::Number(n) = key {
        if n.fract() == 0.0 && *n >= 1.0 && *n <= array_len as f64 {
            return Some(*n as usize - 1);
        }
    }
    None
}

impl LuaTable {
    pub fn new() -> Self {
        LuaTable {
            array: Vec::new(),
            hash: HashPart::with_capacity(0),
            metatable: None,
            flags: 0,
        }
    }

    pub fn with_hints(array_hint: usize, hash_hint: usize) -> Self {
        let mut t = LuaTable::new();
        if array_hint > 0 {
            t.array.resize(array_hint, LuaValue::Nil);
        }
        if hash_hint > 0 {
            t.hash = HashPart::with_capacity(hash_hint.next_power_of_two());
        }
        t
    }

    pub fn get(&self, key: &LuaValue) -> LuaValue {
        if let Some(idx) = array_index(key, self.array.len()) {
            return self.array[idx];
        }
        self.hash.get(key, raw_eq)
    }

    pub fn set(&mut self, key: LuaValue, value: LuaValue) {
        if let Some(idx) = array_index(&key, self.array.len()) {
            self.array[idx] = value;
            return;
        }
        // A nil-key write is a no-op for array growth; a write to the
        // next array slot (len+1) is the common append path.
        if let LuaValue::Number(n) = key {
            if n.fract() == 0.0 && n >= 1.0 && (n as usize) == self.array.len() + 1 && !value.is_nil() {
                self.array.push(value);
                self.absorb_hash_tail();
                return;
            }
        }
        if !value.is_nil() && self.hash.is_full_for_insert() {
            self.rehash(Some(key));
        }
        loop {
            match self.hash.set(key, value, raw_eq) {
                Ok(()) => return,
                Err(()) => {
                    if value.is_nil() {
                        return;
                    }
                    self.rehash(Some(key));
                }
            }
        }
    }

    /// After appending to the array, pull any hash entries that now
    /// fall into the contiguous array range back into the array.
    fn absorb_hash_tail(&mut self) {
        loop {
            let next_idx = self.array.len() + 1;
            let probe = LuaValue::Number(next_idx as f64);
            let v = self.hash.get(&probe, raw_eq);
            if v.is_nil() {
                break;
            }
            self.hash.set(probe, LuaValue::Nil, raw_eq).ok();
            self.array.push(v);
        }
    }

    /// Rehash per spec §4.3: count integer keys (including an
    /// about-to-be-inserted `extra_key`, if any) by power-of-two range,
    /// find the largest P where more than half of [1..P] is occupied,
    /// and resize the array to P.
    fn rehash(&mut self, extra_key: Option<LuaValue>) {
        let mut counts = vec![0usize; (MAX_BUCKET_BITS + 1) as usize];
        let mut total_integers = 0usize;

        let mut count_int = |n: f64, counts: &mut Vec<usize>, total: &mut usize| {
            // `bit` is the number of bits needed to represent `i`, which
            // must stay within `counts`' `MAX_BUCKET_BITS + 1` slots, so
            // the admitted range has to match that bound exactly rather
            // than some unrelated integer ceiling like `u32::MAX`.
            if n.fract() == 0.0 && n >= 1.0 && n < (1u64 << MAX_BUCKET_BITS) as f64 {
                let i = n as u64;
                let bit = 64 - i.leading_zeros();
                counts[bit as usize] += 1;
                *total += 1;
            }
        };

        for (i, v) in self.array.iter().enumerate() {
            if !v.is_nil() {
                count_int((i + 1) as f64, &mut counts, &mut total_integers);
            }
        }
        for (k, _) in self.hash.live_entries() {
            if let LuaValue::Number(n) = k {
                count_int(n, &mut counts, &mut total_integers);
            }
        }
        if let Some(LuaValue::Number(n)) = extra_key {
            count_int(n, &mut counts, &mut total_integers);
        }

        let mut best_p = 0usize;
        let mut running = 0usize;
        for bit in 1..counts.len() {
            running += counts[bit];
            let p = 1usize << (bit - 1);
            if running > p / 2 || p == 1 {
                if running * 2 > p {
                    best_p = p;
                }
            }
        }
        // final check against the accumulated total at the top bit too
        if best_p == 0 && total_integers > 0 {
            best_p = 1;
        }

        let mut all_entries: Vec<(LuaValue, LuaValue)> = Vec::new();
        for (i, v) in self.array.iter().enumerate() {
            if !v.is_nil() {
                all_entries.push((LuaValue::Number((i + 1) as f64), *v));
            }
        }
        all_entries.extend(self.hash.live_entries());
        if let Some(k) = extra_key {
            all_entries.push((k, LuaValue::Nil));
        }

        let mut new_array = vec![LuaValue::Nil; best_p];
        let mut remaining = Vec::new();
        for (k, v) in all_entries {
            if let Some(idx) = array_index(&k, best_p) {
                if !v.is_nil() {
                    new_array[idx] = v;
                }
            } else if !v.is_nil() {
                remaining.push((k, v));
            }
        }

        let hash_cap = remaining.len().next_power_of_two().max(1);
        let mut new_hash = HashPart::with_capacity(hash_cap.max(2));
        for (k, v) in remaining {
            loop {
                match new_hash.set(k, v, raw_eq) {
                    Ok(()) => break,
                    Err(()) => new_hash = grow_and_reinsert(&new_hash),
                }
            }
        }

        self.array = new_array;
        self.hash = new_hash;
    }

    /// Length operator: binary search the array for the border, then
    /// fall into the hash part if the array's last slot is occupied.
    pub fn len(&self) -> usize {
        let mut n = self.array.len();
        if n > 0 && self.array[n - 1].is_nil() {
            // binary search for a border inside the array
            let mut lo = 0usize;
            let mut hi = n;
            while hi - lo > 1 {
                let mid = (lo + hi) / 2;
                if self.array[mid - 1].is_nil() {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            return lo;
        }
        if n == 0 || !self.array[n - 1].is_nil() {
            // extend into the hash part while consecutive integers exist
            loop {
                let probe = LuaValue::Number((n + 1) as f64);
                if self.hash.get(&probe, raw_eq).is_nil() {
                    break;
                }
                n += 1;
            }
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.hash.live_entries().next().is_none()
    }

    /// `next(t, key)`: array first, then hash. `key == nil` starts
    /// iteration. An absent, non-nil key is a runtime error (returned
    /// as `Err(())` for the caller to translate).
    pub fn next(&self, key: &LuaValue) -> Result<Option<(LuaValue, LuaValue)>, ()> {
        if key.is_nil() {
            for (i, v) in self.array.iter().enumerate() {
                if !v.is_nil() {
                    return Ok(Some((LuaValue::Number((i + 1) as f64), *v)));
                }
            }
            return Ok(self.hash.live_entries().next());
        }
        if let Some(idx) = array_index(key, self.array.len()) {
            for (i, v) in self.array.iter().enumerate().skip(idx + 1) {
                if !v.is_nil() {
                    return Ok(Some((LuaValue::Number((i + 1) as f64), *v)));
                }
            }
            return Ok(self.hash.live_entries().next());
        }
        match self.hash.next_after(key, raw_eq) {
            Some(next) => Ok(next),
            None => Err(()),
        }
    }
}

fn grow_and_reinsert(old: &HashPart) -> HashPart {
    let mut grown = HashPart::with_capacity((old.capacity() * 2).max(2));
    for (k, v) in old.live_entries() {
        grown.set(k, v, raw_eq).expect("freshly grown segment cannot be full");
    }
    grown
}

impl Default for LuaTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(v: f64) -> LuaValue {
        LuaValue::Number(v)
    }

    #[test]
    fn array_roundtrip_and_length() {
        let mut t = LuaTable::new();
        t.set(n(1.0), n(10.0));
        t.set(n(2.0), n(20.0));
        t.set(n(3.0), n(30.0));
        assert_eq!(t.len(), 3);
        t.set(n(5.0), n(50.0));
        assert_eq!(t.len(), 3);
        assert_eq!(t.get(&n(1.0)).as_number(), Some(10.0));
        assert_eq!(t.get(&n(3.0)).as_number(), Some(30.0));
        assert_eq!(t.get(&n(5.0)).as_number(), Some(50.0));
    }

    #[test]
    fn set_then_delete_then_set_again() {
        let mut t = LuaTable::new();
        t.set(n(1.0), n(1.0));
        t.set(n(1.0), LuaValue::Nil);
        assert!(t.get(&n(1.0)).is_nil());
        t.set(n(1.0), n(9.0));
        assert_eq!(t.get(&n(1.0)).as_number(), Some(9.0));
    }

    #[test]
    fn hash_entries_survive_rehash() {
        let mut t = LuaTable::new();
        for i in 0..200 {
            t.set(n(i as f64 * 2.0), n(i as f64));
        }
        for i in 0..200 {
            assert_eq!(t.get(&n(i as f64 * 2.0)).as_number(), Some(i as f64));
        }
    }

    #[test]
    fn iteration_visits_every_entry_once() {
        let mut t = LuaTable::new();
        t.set(n(1.0), n(1.0));
        t.set(n(2.0), n(2.0));
        t.set(LuaValue::Boolean(true), n(3.0));
        let mut seen = Vec::new();
        let mut key = LuaValue::Nil;
        loop {
            match t.next(&key).unwrap() {
                Some((k, v)) => {
                    seen.push(v.as_number());
                    key = k;
                }
                None => break,
            }
        }
        assert_eq!(seen.len(), 3);
    }
}
