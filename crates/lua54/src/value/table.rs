//! `LuaTable` — array part + hash part, as in `luars::lua_value::lua_table`.
//!
//! Grounded on the teacher's `LuaTable` (array `Vec` for the dense `[1..n]`
//! prefix, `hashbrown::HashMap` for everything else), re-expressed over the
//! safe `Value`/`TableKey` types instead of the teacher's `Copy` GC-id
//! `LuaValue`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::value::{TableKey, Value};

pub struct LuaTable {
    array: Vec<Value>,
    hash: hashbrown::HashMap<TableKey, Value, ahash::RandomState>,
    metatable: Option<Rc<RefCell<LuaTable>>>,
}

impl LuaTable {
    pub fn new() -> Self {
        LuaTable {
            array: Vec::new(),
            hash: hashbrown::HashMap::with_hasher(ahash::RandomState::new()),
            metatable: None,
        }
    }

    pub fn with_capacity(narr: usize, nrec: usize) -> Self {
        LuaTable {
            array: Vec::with_capacity(narr),
            hash: hashbrown::HashMap::with_capacity_and_hasher(nrec, ahash::RandomState::new()),
            metatable: None,
        }
    }

    pub fn metatable(&self) -> Option<Rc<RefCell<LuaTable>>> {
        self.metatable.clone()
    }

    pub fn set_metatable(&mut self, mt: Option<Rc<RefCell<LuaTable>>>) {
        self.metatable = mt;
    }

    /// Raw (metamethod-free) get.
    pub fn get(&self, key: &Value) -> Value {
        if let Value::Integer(i) = key {
            if *i >= 1 && (*i as usize) <= self.array.len() {
                return self.array[(*i - 1) as usize].clone();
            }
        }
        match TableKey::normalize(key.clone()) {
            Some(k) => self.hash.get(&k).cloned().unwrap_or(Value::Nil),
            None => Value::Nil,
        }
    }

    pub fn get_str(&self, key: &str) -> Value {
        self.hash
            .iter()
            .find_map(|(k, v)| match &k.0 {
                Value::Str(s) if s.as_str() == key => Some(v.clone()),
                _ => None,
            })
            .unwrap_or(Value::Nil)
    }

    /// Raw (metamethod-free) set. Returns an error description if `key` is
    /// nil or NaN (caller turns it into a `TypeError`).
    pub fn set(&mut self, key: Value, value: Value) -> Result<(), &'static str> {
        if key.is_nil() {
            return Err("table index is nil");
        }
        if let Value::Float(f) = &key {
            if f.is_nan() {
                return Err("table index is NaN");
            }
        }
        if let Value::Integer(i) = &key {
            let i = *i;
            if i >= 1 && (i as usize) <= self.array.len() {
                self.array[(i - 1) as usize] = value;
                return Ok(());
            }
            if i >= 1 && (i as usize) == self.array.len() + 1 {
                if value.is_nil() {
                    return Ok(());
                }
                self.array.push(value);
                self.migrate_from_hash();
                return Ok(());
            }
        }
        let k = TableKey::normalize(key).expect("nil/NaN already rejected above");
        if value.is_nil() {
            self.hash.remove(&k);
        } else {
            self.hash.insert(k, value);
        }
        Ok(())
    }

    /// After appending to the array part, absorb any hash-part entries that
    /// now extend the dense prefix (e.g. `t[5]=x; t[4]=y` then `t[3]=z`).
    fn migrate_from_hash(&mut self) {
        loop {
            let next = (self.array.len() + 1) as i64;
            let key = TableKey(Value::Integer(next));
            match self.hash.remove(&key) {
                Some(v) => self.array.push(v),
                None => break,
            }
        }
    }

    /// The `#` border operator (spec §3: any `n` with `t[n]≠nil, t[n+1]=nil`).
    /// Uses the array part's trailing-nil-trimmed length when it's dense,
    /// otherwise a binary search over the hash part per the reference
    /// algorithm.
    pub fn length(&self) -> i64 {
        let mut n = self.array.len();
        while n > 0 && self.array[n - 1].is_nil() {
            n -= 1;
        }
        if n == self.array.len() {
            // Array part is fully dense; the border might extend into the
            // hash part if the caller later set t[n+1] directly.
            let mut j = n as i64;
            loop {
                let probe = TableKey(Value::Integer(j + 1));
                if self.hash.contains_key(&probe) {
                    j += 1;
                } else {
                    break;
                }
            }
            j
        } else {
            n as i64
        }
    }

    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    pub fn array_part(&self) -> &[Value] {
        &self.array
    }

    /// Bulk-append used by `SETLIST` (spec §4.4 "for array-style fields use
    /// `SETLIST` in batches").
    pub fn append_array(&mut self, values: impl IntoIterator<Item = Value>) {
        for v in values {
            self.array.push(v);
        }
    }

    pub fn set_array_index(&mut self, index1: usize, value: Value) {
        if index1 == 0 {
            return;
        }
        if index1 <= self.array.len() {
            self.array[index1 - 1] = value;
        } else {
            while self.array.len() + 1 < index1 {
                self.array.push(Value::Nil);
            }
            self.array.push(value);
        }
    }

    /// `next(t, key)` iteration order: array part in order, then hash part
    /// in (arbitrary but stable-per-call) insertion order.
    pub fn next_key(&self, key: &Value) -> Option<(Value, Value)> {
        let start_hash_from = match key {
            Value::Nil => {
                for (i, v) in self.array.iter().enumerate() {
                    if !v.is_nil() {
                        return Some((Value::Integer((i + 1) as i64), v.clone()));
                    }
                }
                None
            }
            Value::Integer(i) if *i >= 1 && (*i as usize) <= self.array.len() => {
                for j in (*i as usize)..self.array.len() {
                    if !self.array[j].is_nil() {
                        return Some((Value::Integer((j + 1) as i64), self.array[j].clone()));
                    }
                }
                None
            }
            other => Some(TableKey::normalize(other.clone())?),
        };
        let mut iter = self.hash.iter();
        match start_hash_from {
            None => iter.next().map(|(k, v)| (k.0.clone(), v.clone())),
            Some(target) => {
                let mut found = false;
                for (k, v) in iter.by_ref() {
                    if found {
                        return Some((k.0.clone(), v.clone()));
                    }
                    if k.0.raw_eq(&target.0) {
                        found = true;
                    }
                }
                if found { None } else { None }
            }
        }
    }
}

impl Default for LuaTable {
    fn default() -> Self {
        Self::new()
    }
}
