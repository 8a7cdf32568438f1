//! Interpreter memory: variable stores and the heap
//!
//! Five stores back the evaluator: procedure locals, globals, old values
//! of globals, constants, and the set of globals modified since procedure
//! entry. All stores maintain heap reference counts on insertion and
//! removal. The old store is filled lazily: a global's value is mirrored
//! into it the first time the global is materialized or modified inside
//! the current procedure.

use crate::heap::Heap;
use crate::value::Value;
use boogie_core::Id;
use im::{OrdMap, OrdSet};
use std::fmt;

/// Which store a name lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Local,
    Global,
    OldGlobal,
    Constant,
}

/// Saved caller state around a procedure call
#[derive(Debug, Clone)]
pub struct OldFrame {
    old_globals: OrdMap<Id, Value>,
    modified: OrdSet<Id>,
}

/// Saved locals around a procedure call
#[derive(Debug, Clone)]
pub struct LocalsFrame {
    locals: OrdMap<Id, Value>,
}

/// The memory of one execution branch
#[derive(Debug, Clone, Default)]
pub struct Memory {
    pub locals: OrdMap<Id, Value>,
    pub globals: OrdMap<Id, Value>,
    pub old_globals: OrdMap<Id, Value>,
    pub constants: OrdMap<Id, Value>,
    pub modified: OrdSet<Id>,
    pub heap: Heap,
}

impl Memory {
    pub fn new() -> Self {
        Memory::default()
    }

    fn store_of(&self, kind: StoreKind) -> &OrdMap<Id, Value> {
        match kind {
            StoreKind::Local => &self.locals,
            StoreKind::Global => &self.globals,
            StoreKind::OldGlobal => &self.old_globals,
            StoreKind::Constant => &self.constants,
        }
    }

    fn store_of_mut(&mut self, kind: StoreKind) -> &mut OrdMap<Id, Value> {
        match kind {
            StoreKind::Local => &mut self.locals,
            StoreKind::Global => &mut self.globals,
            StoreKind::OldGlobal => &mut self.old_globals,
            StoreKind::Constant => &mut self.constants,
        }
    }

    pub fn get(&self, kind: StoreKind, name: &str) -> Option<&Value> {
        self.store_of(kind).get(name)
    }

    /// Store a value, retaining it and releasing whatever it replaces
    pub fn set(&mut self, kind: StoreKind, name: impl Into<Id>, value: Value) {
        self.heap.retain_value(&value);
        let replaced = self.store_of_mut(kind).insert(name.into(), value);
        if let Some(old) = replaced {
            self.heap.release_value(&old);
        }
    }

    /// Remove a binding, releasing its value
    pub fn unset(&mut self, kind: StoreKind, name: &str) {
        if let Some(old) = self.store_of_mut(kind).remove(name) {
            self.heap.release_value(&old);
        }
    }

    /// Mirror a global's current value into the old store, unless the old
    /// store already has an entry for it
    pub fn mirror_old(&mut self, name: &str) {
        if self.old_globals.contains_key(name) {
            return;
        }
        if let Some(v) = self.globals.get(name).cloned() {
            self.set(StoreKind::OldGlobal, name.to_string(), v);
        }
    }

    /// Record a global as modified inside the current procedure, saving
    /// its pre-modification value for `old` first
    pub fn mark_modified(&mut self, name: &str) {
        if !self.modified.contains(name) {
            self.mirror_old(name);
            self.modified.insert(name.to_string());
        }
    }

    pub fn is_modified(&self, name: &str) -> bool {
        self.modified.contains(name)
    }

    /// Begin a procedure scope: the callee sees an empty old store and an
    /// empty modified set
    pub fn save_old(&mut self) -> OldFrame {
        OldFrame {
            old_globals: std::mem::take(&mut self.old_globals),
            modified: std::mem::take(&mut self.modified),
        }
    }

    /// End a procedure scope. The caller's old values are kept for names
    /// the caller had already modified; for clean names the callee's
    /// mirrored old values are adopted (they are the values those globals
    /// had when the caller, too, first saw them). The modified sets are
    /// merged.
    pub fn restore_old(&mut self, frame: OldFrame) {
        let callee_old = std::mem::take(&mut self.old_globals);
        let callee_modified = std::mem::take(&mut self.modified);

        let mut merged = OrdMap::default();
        for (name, value) in frame.old_globals.iter() {
            if frame.modified.contains(name) {
                merged.insert(name.clone(), value.clone());
            }
        }
        // Clean names adopt the callee's mirrored entry values; names the
        // caller modified must not: the callee saw post-modification state
        for (name, value) in callee_old.iter() {
            if !frame.modified.contains(name) && !merged.contains_key(name) {
                merged.insert(name.clone(), value.clone());
            }
        }
        // Caller old entries for clean names the callee never saw
        for (name, value) in frame.old_globals.iter() {
            if !merged.contains_key(name) {
                merged.insert(name.clone(), value.clone());
            }
        }

        // Rebalance reference counts: retain survivors, release the rest
        for v in merged.values() {
            self.heap.retain_value(v);
        }
        for v in frame.old_globals.values() {
            self.heap.release_value(v);
        }
        for v in callee_old.values() {
            self.heap.release_value(v);
        }

        self.old_globals = merged;
        self.modified = frame.modified.union(callee_modified);
    }

    /// Begin a local frame with the given bindings already retained
    pub fn push_locals(&mut self, bindings: Vec<(Id, Value)>) -> LocalsFrame {
        let frame = LocalsFrame {
            locals: std::mem::take(&mut self.locals),
        };
        for (name, value) in bindings {
            self.set(StoreKind::Local, name, value);
        }
        frame
    }

    /// Drop the current local frame and restore the saved one
    pub fn pop_locals(&mut self, frame: LocalsFrame) {
        let dropped = std::mem::replace(&mut self.locals, frame.locals);
        for v in dropped.values() {
            self.heap.release_value(v);
        }
    }

    /// Scoped (re)binding of a single local, as used by quantifier
    /// enumeration and definition application: returns the shadowed value
    pub fn bind_local(&mut self, name: &str, value: Value) -> Option<Value> {
        self.heap.retain_value(&value);
        let shadowed = self.locals.insert(name.to_string(), value);
        // the shadowed entry keeps its count until restored
        shadowed
    }

    /// Undo a [`Memory::bind_local`]
    pub fn unbind_local(&mut self, name: &str, shadowed: Option<Value>) {
        let current = match shadowed {
            Some(prev) => self.locals.insert(name.to_string(), prev),
            None => self.locals.remove(name),
        };
        if let Some(v) = current {
            self.heap.release_value(&v);
        }
    }

    /// Render a value, flattening map references through the heap
    pub fn show_value(&self, v: &Value) -> String {
        match v {
            Value::Reference(r) if self.heap.is_live(*r) => {
                let (_, cache) = self.heap.flatten(*r);
                let entries: Vec<String> = cache
                    .iter()
                    .map(|(k, val)| {
                        format!("{} -> {}", crate::value::format_key(k), self.show_value(val))
                    })
                    .collect();
                format!("[{}]", entries.join(", "))
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let section = |f: &mut fmt::Formatter<'_>,
                       title: &str,
                       store: &OrdMap<Id, Value>|
         -> fmt::Result {
            if store.is_empty() {
                return Ok(());
            }
            writeln!(f, "{}:", title)?;
            for (name, v) in store.iter() {
                writeln!(f, "  {} = {}", name, self.show_value(v))?;
            }
            Ok(())
        };
        section(f, "locals", &self.locals)?;
        section(f, "globals", &self.globals)?;
        section(f, "old globals", &self.old_globals)?;
        section(f, "constants", &self.constants)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::MapRepr;

    #[test]
    fn set_and_unset_maintain_counts() {
        let mut mem = Memory::new();
        let r = mem.heap.alloc(MapRepr::empty_source());
        mem.set(StoreKind::Local, "m", Value::Reference(r));
        assert_eq!(mem.heap.count(r), 1);
        mem.set(StoreKind::Global, "g", Value::Reference(r));
        assert_eq!(mem.heap.count(r), 2);
        mem.unset(StoreKind::Local, "m");
        assert_eq!(mem.heap.count(r), 1);
        mem.unset(StoreKind::Global, "g");
        mem.heap.collect_garbage();
        assert!(mem.heap.is_empty());
    }

    #[test]
    fn mark_modified_mirrors_once() {
        let mut mem = Memory::new();
        mem.set(StoreKind::Global, "g", Value::int(1));
        mem.mark_modified("g");
        assert_eq!(mem.get(StoreKind::OldGlobal, "g"), Some(&Value::int(1)));

        mem.set(StoreKind::Global, "g", Value::int(2));
        mem.mark_modified("g");
        // the first mirror survives later modifications
        assert_eq!(mem.get(StoreKind::OldGlobal, "g"), Some(&Value::int(1)));
    }

    #[test]
    fn restore_old_partitions_on_callers_modified_set() {
        let mut mem = Memory::new();
        // caller modified a (old value 1); callee freshly saw b (old 7)
        mem.set(StoreKind::Global, "a", Value::int(10));
        mem.set(StoreKind::OldGlobal, "a", Value::int(1));
        mem.modified.insert("a".to_string());

        let frame = mem.save_old();
        assert!(mem.old_globals.is_empty());

        mem.set(StoreKind::Global, "b", Value::int(7));
        mem.mirror_old("b");
        mem.mark_modified("b");
        mem.set(StoreKind::Global, "b", Value::int(8));

        mem.restore_old(frame);
        assert_eq!(mem.get(StoreKind::OldGlobal, "a"), Some(&Value::int(1)));
        // b was clean for the caller: the callee's mirrored value is kept
        assert_eq!(mem.get(StoreKind::OldGlobal, "b"), Some(&Value::int(7)));
        assert!(mem.is_modified("a"));
        assert!(mem.is_modified("b"));
    }

    #[test]
    fn locals_frame_releases_dropped_bindings() {
        let mut mem = Memory::new();
        let r = mem.heap.alloc(MapRepr::empty_source());
        mem.set(StoreKind::Local, "outer", Value::Reference(r));

        let frame = mem.push_locals(vec![("inner".to_string(), Value::int(1))]);
        assert!(mem.get(StoreKind::Local, "outer").is_none());
        assert_eq!(mem.get(StoreKind::Local, "inner"), Some(&Value::int(1)));

        mem.pop_locals(frame);
        assert_eq!(mem.heap.count(r), 1);
        assert!(mem.get(StoreKind::Local, "inner").is_none());
    }

    #[test]
    fn bind_unbind_restores_shadowed() {
        let mut mem = Memory::new();
        mem.set(StoreKind::Local, "x", Value::int(1));
        let shadowed = mem.bind_local("x", Value::int(2));
        assert_eq!(mem.get(StoreKind::Local, "x"), Some(&Value::int(2)));
        mem.unbind_local("x", shadowed);
        assert_eq!(mem.get(StoreKind::Local, "x"), Some(&Value::int(1)));
    }

    #[test]
    fn show_value_flattens_maps() {
        let mut mem = Memory::new();
        let r = mem.heap.alloc(MapRepr::empty_source());
        mem.set(StoreKind::Global, "m", Value::Reference(r));
        mem.heap.store_at(r, vec![Value::int(0)], Value::int(-5));
        mem.heap.store_at(r, vec![Value::int(1)], Value::int(14));
        assert_eq!(
            mem.show_value(&Value::Reference(r)),
            "[0 -> -5, 1 -> 14]"
        );
    }
}
