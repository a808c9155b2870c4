//! Open-addressed hash segment of a [`super::LuaTable`] (spec §4.3).
//!
//! Capacity is always a power of two. Deletion leaves a tombstone
//! (nil key, `true` value) so existing probe chains stay intact
//! (invariant I4).

use crate::value::LuaValue;

#[derive(Clone, Copy)]
pub struct Entry {
    pub key: LuaValue,
    pub value: LuaValue,
}

impl Entry {
    fn empty() -> Self {
        Entry {
            key: LuaValue::Nil,
            value: LuaValue::Nil,
        }
    }

    fn is_empty(&self) -> bool {
        self.key.is_nil() && self.value.is_nil()
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_nil() && !self.value.is_nil()
    }
}

pub struct HashPart {
    slots: Vec<Entry>,
    pub count: usize, // live entries, excludes tombstones
}

fn load_factor_trigger(cap: usize) -> usize {
    if cap > 8 { (cap * 3) / 4 } else { cap }
}

pub fn hash_key(key: &LuaValue) -> u64 {
    match key {
        LuaValue::Number(n) => n.to_bits(),
        LuaValue::Boolean(b) => *b as u64 + 1,
        LuaValue::String(id) => id.0 as u64 ^ 0x9e3779b97f4a7c15,
        LuaValue::Table(id) => id.0 as u64 ^ 0xbf58476d1ce4e5b9,
        LuaValue::Function(id) => id.0 as u64 ^ 0x94d049bb133111eb,
        LuaValue::Prototype(id) => id.0 as u64 ^ 0xff51afd7ed558ccd,
        LuaValue::LightUserdata(p) => *p as u64,
        LuaValue::Nil => 0,
    }
}

impl HashPart {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.next_power_of_two().max(0);
        HashPart {
            slots: vec![Entry::empty(); cap],
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn probe(&self, key: &LuaValue, eq: impl Fn(&LuaValue, &LuaValue) -> bool) -> Option<usize> {
        if self.slots.is_empty() {
            return None;
        }
        let cap = self.slots.len();
        let mut idx = (hash_key(key) as usize) & (cap - 1);
        for _ in 0..cap {
            let slot = &self.slots[idx];
            if slot.is_empty() {
                return None;
            }
            if !slot.is_tombstone() && eq(&slot.key, key) {
                return Some(idx);
            }
            idx = (idx + 1) & (cap - 1);
        }
        None
    }

    pub fn get(&self, key: &LuaValue, eq: impl Fn(&LuaValue, &LuaValue) -> bool) -> LuaValue {
        match self.probe(key, eq) {
            Some(idx) => self.slots[idx].value,
            None => LuaValue::Nil,
        }
    }

    /// Insert, returning `Err(())` when the segment is full and must
    /// be rehashed by the caller before retrying.
    pub fn set(
        &mut self,
        key: LuaValue,
        value: LuaValue,
        eq: impl Fn(&LuaValue, &LuaValue) -> bool,
    ) -> Result<(), ()> {
        if self.slots.is_empty() {
            return Err(());
        }
        let cap = self.slots.len();
        let mut idx = (hash_key(&key) as usize) & (cap - 1);
        let mut first_tombstone = None;
        for _ in 0..cap {
            let slot = self.slots[idx];
            if slot.is_empty() {
                let target = first_tombstone.unwrap_or(idx);
                if value.is_nil() {
                    return Ok(());
                }
                self.slots[target] = Entry { key, value };
                self.count += 1;
                return Ok(());
            }
            if !slot.is_tombstone() && eq(&slot.key, &key) {
                if value.is_nil() {
                    self.slots[idx] = Entry {
                        key: LuaValue::Nil,
                        value: LuaValue::Boolean(true),
                    };
                    self.count -= 1;
                } else {
                    self.slots[idx].value = value;
                }
                return Ok(());
            }
            if slot.is_tombstone() && first_tombstone.is_none() {
                first_tombstone = Some(idx);
            }
            idx = (idx + 1) & (cap - 1);
        }
        if let Some(target) = first_tombstone {
            if !value.is_nil() {
                self.slots[target] = Entry { key, value };
                self.count += 1;
            }
            return Ok(());
        }
        Err(())
    }

    pub fn is_full_for_insert(&self) -> bool {
        self.slots.is_empty() || self.count + 1 > load_factor_trigger(self.slots.len())
    }

    pub fn live_entries(&self) -> impl Iterator<Item = (LuaValue, LuaValue)> + '_ {
        self.slots
            .iter()
            .filter(|s| !s.is_empty() && !s.is_tombstone())
            .map(|s| (s.key, s.value))
    }

    pub fn entries_in_order(&self) -> &[Entry] {
        &self.slots
    }

    pub fn next_after(
        &self,
        key: &LuaValue,
        eq: impl Fn(&LuaValue, &LuaValue) -> bool,
    ) -> Option<Option<(LuaValue, LuaValue)>> {
        let start = match self.probe(key, &eq) {
            Some(idx) => idx + 1,
            None => return None,
        };
        for slot in &self.slots[start..] {
            if !slot.is_empty() && !slot.is_tombstone() {
                return Some(Some((slot.key, slot.value)));
            }
        }
        Some(None)
    }
}
