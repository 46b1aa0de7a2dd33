// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Heap registry and garbage collector for Lox objects.
//!
//! Objects live in a slot vector indexed by [`ObjRef`]; a free list makes
//! allocation O(1) and sweep enumerates the slots. Collection is a
//! stop-the-world tri-color mark-sweep: roots are grayed, the gray worklist
//! is drained by blackening one object at a time, the intern pool is
//! weak-scanned, and unmarked slots are reclaimed.
//!
//! The heap does not find roots on its own; the VM marks its stack, frames,
//! upvalue list and globals, and the compiler keeps in-progress objects
//! reachable through the protected-root stash. The heap itself never
//! triggers a collection - it only reports allocation pressure through
//! [`Heap::should_collect`], and the owner decides when to run one. That
//! keeps allocations made while a collection is impossible (mid-mutation)
//! from recursing into the collector.


use crate::object::{Class, Closure, Function, HeapString, Instance, Obj, ObjRef, Upvalue};
use crate::table::{Table, hash_str};
use crate::value::Value;

/// Heap growth factor: the next collection triggers at live-bytes times this.
const HEAP_GROW_FACTOR: usize = 2;

/// Allocation-pressure threshold before the first collection.
const FIRST_GC_THRESHOLD: usize = 1024;

/// One registry slot: the object plus its GC bookkeeping.
///
/// `marked` is the tri-color bit: unmarked is white, marked-and-on-worklist
/// is gray, marked-and-drained is black. `size` is the byte estimate
/// recorded at allocation so sweep subtracts exactly what allocation added.
#[derive(Debug)]
struct Slot {
    marked: bool,
    size: usize,
    obj: Obj,
}

/// The object heap.
#[derive(Debug)]
pub struct Heap {
    /// Registry of all objects; `None` slots are free.
    slots: Vec<Option<Slot>>,
    /// Indices of free slots, reused before the registry grows.
    free: Vec<usize>,
    /// String intern pool. Weak: keys are deleted when unreachable.
    strings: Table,
    /// Values kept alive while not yet reachable from the VM, reported as
    /// roots during marking. The compiler stashes in-progress functions here.
    protected: Vec<Value>,
    /// Gray worklist: marked objects whose references are not yet traced.
    gray: Vec<ObjRef>,
    /// Estimated bytes held by live objects.
    bytes_allocated: usize,
    /// Collection triggers when `bytes_allocated` crosses this.
    next_gc: usize,
    /// Collect on every allocation.
    stress: bool,
}

impl Heap {
    /// Create an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            strings: Table::new(),
            protected: Vec::new(),
            gray: Vec::new(),
            bytes_allocated: 0,
            next_gc: FIRST_GC_THRESHOLD,
            stress: cfg!(feature = "stress-gc"),
        }
    }

    /// Toggle collect-on-every-allocation at runtime.
    pub fn set_stress(&mut self, stress: bool) {
        self.stress = stress;
    }

    /// Estimated bytes held by live objects.
    #[must_use]
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Number of live objects in the registry.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Whether the owner should run a collection before allocating.
    #[must_use]
    pub fn should_collect(&self) -> bool {
        self.stress || self.bytes_allocated > self.next_gc
    }

    /// Place an object into the registry and return its handle.
    ///
    /// Accounts the object's shallow size. Does not collect; check
    /// [`Heap::should_collect`] first.
    pub fn allocate(&mut self, obj: Obj) -> ObjRef {
        let size = shallow_size(&obj);
        self.bytes_allocated += size;
        let slot = Slot {
            marked: false,
            size,
            obj,
        };
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                ObjRef::new(index)
            }
            None => {
                self.slots.push(Some(slot));
                ObjRef::new(self.slots.len() - 1)
            }
        }
    }

    /// Look up an interned string by content.
    #[must_use]
    pub fn find_interned(&self, chars: &str) -> Option<ObjRef> {
        let hash = hash_str(chars);
        self.strings.find_string(hash, |key| {
            let s = self.string(key);
            s.chars.len() == chars.len() && s.chars == chars
        })
    }

    /// Intern a string: return the canonical handle for this content,
    /// allocating it on first sight.
    pub fn intern(&mut self, chars: &str) -> ObjRef {
        if let Some(existing) = self.find_interned(chars) {
            return existing;
        }
        let hash = hash_str(chars);
        let r = self.allocate(Obj::String(HeapString {
            chars: chars.to_owned(),
            hash,
        }));
        self.strings.set(r, hash, Value::Nil);
        r
    }

    /// Keep a value reachable across allocations until the matching
    /// [`Heap::pop_root`].
    pub fn push_root(&mut self, value: Value) {
        self.protected.push(value);
    }

    /// Release the most recently protected value.
    pub fn pop_root(&mut self) {
        self.protected.pop();
    }

    // --- Object access ---
    //
    // A handle that survives collection always refers to a live slot of the
    // right variant; anything else is an interpreter bug, so the accessors
    // panic rather than force error plumbing through unreachable paths.

    /// Borrow the object behind a handle.
    ///
    /// # Panics
    ///
    /// Panics if the handle refers to a collected slot.
    #[must_use]
    pub fn get(&self, r: ObjRef) -> &Obj {
        match self.slots[r.index()].as_ref() {
            Some(slot) => &slot.obj,
            None => panic!("use of collected object {r:?}"),
        }
    }

    /// Mutably borrow the object behind a handle.
    ///
    /// # Panics
    ///
    /// Panics if the handle refers to a collected slot.
    pub fn get_mut(&mut self, r: ObjRef) -> &mut Obj {
        match self.slots[r.index()].as_mut() {
            Some(slot) => &mut slot.obj,
            None => panic!("use of collected object {r:?}"),
        }
    }

    /// Borrow a string object.
    ///
    /// # Panics
    ///
    /// Panics if the handle is not a live string.
    #[must_use]
    pub fn string(&self, r: ObjRef) -> &HeapString {
        match self.get(r) {
            Obj::String(s) => s,
            other => panic!("expected string, found {}", other.type_name()),
        }
    }

    /// Borrow a function object.
    ///
    /// # Panics
    ///
    /// Panics if the handle is not a live function.
    #[must_use]
    pub fn function(&self, r: ObjRef) -> &Function {
        match self.get(r) {
            Obj::Function(f) => f,
            other => panic!("expected function, found {}", other.type_name()),
        }
    }

    /// Mutably borrow a function object.
    ///
    /// # Panics
    ///
    /// Panics if the handle is not a live function.
    pub fn function_mut(&mut self, r: ObjRef) -> &mut Function {
        match self.get_mut(r) {
            Obj::Function(f) => f,
            other => panic!("expected function, found {}", other.type_name()),
        }
    }

    /// Borrow a closure object.
    ///
    /// # Panics
    ///
    /// Panics if the handle is not a live closure.
    #[must_use]
    pub fn closure(&self, r: ObjRef) -> &Closure {
        match self.get(r) {
            Obj::Closure(c) => c,
            other => panic!("expected closure, found {}", other.type_name()),
        }
    }

    /// Mutably borrow a closure object.
    ///
    /// # Panics
    ///
    /// Panics if the handle is not a live closure.
    pub fn closure_mut(&mut self, r: ObjRef) -> &mut Closure {
        match self.get_mut(r) {
            Obj::Closure(c) => c,
            other => panic!("expected closure, found {}", other.type_name()),
        }
    }

    /// Borrow an upvalue cell.
    ///
    /// # Panics
    ///
    /// Panics if the handle is not a live upvalue.
    #[must_use]
    pub fn upvalue(&self, r: ObjRef) -> &Upvalue {
        match self.get(r) {
            Obj::Upvalue(u) => u,
            other => panic!("expected upvalue, found {}", other.type_name()),
        }
    }

    /// Mutably borrow an upvalue cell.
    ///
    /// # Panics
    ///
    /// Panics if the handle is not a live upvalue.
    pub fn upvalue_mut(&mut self, r: ObjRef) -> &mut Upvalue {
        match self.get_mut(r) {
            Obj::Upvalue(u) => u,
            other => panic!("expected upvalue, found {}", other.type_name()),
        }
    }

    /// Borrow a class object.
    ///
    /// # Panics
    ///
    /// Panics if the handle is not a live class.
    #[must_use]
    pub fn class(&self, r: ObjRef) -> &Class {
        match self.get(r) {
            Obj::Class(c) => c,
            other => panic!("expected class, found {}", other.type_name()),
        }
    }

    /// Mutably borrow a class object.
    ///
    /// # Panics
    ///
    /// Panics if the handle is not a live class.
    pub fn class_mut(&mut self, r: ObjRef) -> &mut Class {
        match self.get_mut(r) {
            Obj::Class(c) => c,
            other => panic!("expected class, found {}", other.type_name()),
        }
    }

    /// Borrow an instance object.
    ///
    /// # Panics
    ///
    /// Panics if the handle is not a live instance.
    #[must_use]
    pub fn instance(&self, r: ObjRef) -> &Instance {
        match self.get(r) {
            Obj::Instance(i) => i,
            other => panic!("expected instance, found {}", other.type_name()),
        }
    }

    /// Mutably borrow an instance object.
    ///
    /// # Panics
    ///
    /// Panics if the handle is not a live instance.
    pub fn instance_mut(&mut self, r: ObjRef) -> &mut Instance {
        match self.get_mut(r) {
            Obj::Instance(i) => i,
            other => panic!("expected instance, found {}", other.type_name()),
        }
    }

    // --- Collection phases ---
    //
    // The VM drives a cycle as: mark roots, trace_references,
    // remove_white_strings, sweep. Marking is idempotent: null-equivalent
    // and already-marked handles are no-ops, which both bounds work and
    // keeps the worklist duplicate-free.

    /// Mark a value as reachable if it references an object.
    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(r) = value {
            self.mark_object(r);
        }
    }

    /// Mark an object as reachable and queue it for tracing.
    pub fn mark_object(&mut self, r: ObjRef) {
        let Some(slot) = self.slots[r.index()].as_mut() else {
            return;
        };
        if slot.marked {
            return;
        }
        slot.marked = true;
        self.gray.push(r);
    }

    /// Mark every key and value of a table.
    pub fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_object(key);
            self.mark_value(value);
        }
    }

    /// Mark every value on the protected-root stash.
    pub fn mark_protected(&mut self) {
        for index in 0..self.protected.len() {
            let value = self.protected[index];
            self.mark_value(value);
        }
    }

    /// Drain the gray worklist, blackening one object at a time.
    pub fn trace_references(&mut self) {
        while let Some(r) = self.gray.pop() {
            self.blacken(r);
        }
    }

    /// Weak-scan the intern pool: delete entries whose key is unmarked.
    pub fn remove_white_strings(&mut self) {
        let Self { strings, slots, .. } = self;
        strings.remove_white(|key| {
            slots[key.index()]
                .as_ref()
                .is_some_and(|slot| slot.marked)
        });
    }

    /// Reclaim every unmarked slot, clear marks on survivors, and retune
    /// the next collection threshold.
    pub fn sweep(&mut self) {
        for index in 0..self.slots.len() {
            let reclaimed = match &mut self.slots[index] {
                Some(slot) if slot.marked => {
                    slot.marked = false;
                    None
                }
                Some(slot) => Some(slot.size),
                None => None,
            };
            if let Some(size) = reclaimed {
                self.bytes_allocated -= size;
                self.slots[index] = None;
                self.free.push(index);
            }
        }
        self.next_gc = self.bytes_allocated * HEAP_GROW_FACTOR;
    }

    /// Follow all owned outgoing references of a marked object.
    fn blacken(&mut self, r: ObjRef) {
        // Copy the outgoing references first; marking needs the registry
        // mutably while the object borrows it.
        let mut outgoing: Vec<Value> = Vec::new();
        match self.get(r) {
            Obj::String(_) | Obj::Native(_) => {}
            Obj::Function(f) => {
                if let Some(name) = f.name {
                    outgoing.push(Value::Obj(name));
                }
                outgoing.extend_from_slice(&f.chunk.constants);
            }
            Obj::Closure(c) => {
                outgoing.push(Value::Obj(c.function));
                outgoing.extend(c.upvalues.iter().map(|&uv| Value::Obj(uv)));
            }
            Obj::Upvalue(u) => {
                // Open upvalues point into the stack, which is marked as a
                // root; only a closed cell owns its value.
                if let crate::object::UpvalueState::Closed(value) = u.state {
                    outgoing.push(value);
                }
            }
            Obj::Class(c) => {
                outgoing.push(Value::Obj(c.name));
                for (key, value) in c.methods.iter() {
                    outgoing.push(Value::Obj(key));
                    outgoing.push(value);
                }
            }
            Obj::Instance(i) => {
                outgoing.push(Value::Obj(i.class));
                for (key, value) in i.fields.iter() {
                    outgoing.push(Value::Obj(key));
                    outgoing.push(value);
                }
            }
            Obj::BoundMethod(b) => {
                outgoing.push(b.receiver);
                outgoing.push(Value::Obj(b.method));
            }
        }
        for value in outgoing {
            self.mark_value(value);
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

/// Shallow byte estimate for an object: discriminant plus owned payload
/// capacity at allocation time.
fn shallow_size(obj: &Obj) -> usize {
    let payload = match obj {
        Obj::String(s) => s.chars.capacity(),
        Obj::Function(f) => {
            f.chunk.code.capacity()
                + f.chunk.constants.capacity() * size_of::<Value>()
                + f.chunk.lines.capacity() * size_of::<u32>()
        }
        Obj::Closure(c) => c.upvalues.capacity() * size_of::<ObjRef>(),
        Obj::Class(c) => c.methods.size_bytes(),
        Obj::Instance(i) => i.fields.size_bytes(),
        Obj::Native(_) | Obj::Upvalue(_) | Obj::BoundMethod(_) => 0,
    };
    size_of::<Obj>() + payload
}
