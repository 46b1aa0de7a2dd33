// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the hash table.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;

use proptest::prelude::*;

use super::{Table, hash_str};
use crate::heap::Heap;
use crate::object::ObjRef;
use crate::value::Value;

fn key(heap: &mut Heap, name: &str) -> (ObjRef, u32) {
    let r = heap.intern(name);
    let hash = heap.string(r).hash;
    (r, hash)
}

#[test]
fn fnv1a_matches_reference_vectors() {
    assert_eq!(hash_str(""), 0x811c_9dc5);
    assert_eq!(hash_str("a"), 0xe40c_292c);
    assert_eq!(hash_str("foobar"), 0xbf9c_f968);
}

#[test]
fn get_on_empty_table() {
    let mut heap = Heap::new();
    let (k, h) = key(&mut heap, "missing");
    let table = Table::new();
    assert_eq!(table.get(k, h), None);
}

#[test]
fn set_then_get() {
    let mut heap = Heap::new();
    let (k, h) = key(&mut heap, "answer");
    let mut table = Table::new();
    assert!(table.set(k, h, Value::Number(42.0)));
    assert_eq!(table.get(k, h), Some(Value::Number(42.0)));
}

#[test]
fn set_overwrites_and_reports_not_new() {
    let mut heap = Heap::new();
    let (k, h) = key(&mut heap, "x");
    let mut table = Table::new();
    assert!(table.set(k, h, Value::Number(1.0)));
    assert!(!table.set(k, h, Value::Number(2.0)));
    assert_eq!(table.get(k, h), Some(Value::Number(2.0)));
}

#[test]
fn delete_leaves_other_entries_findable() {
    let mut heap = Heap::new();
    let mut table = Table::new();
    let keys: Vec<_> = (0..16)
        .map(|i| key(&mut heap, &format!("entry{i}")))
        .collect();
    for &(k, h) in &keys {
        table.set(k, h, Value::Bool(true));
    }
    for &(k, h) in &keys[..8] {
        assert!(table.delete(k, h));
    }
    // Deletion tombstones must not break probe sequences for survivors.
    for &(k, h) in &keys[8..] {
        assert_eq!(table.get(k, h), Some(Value::Bool(true)));
    }
    for &(k, h) in &keys[..8] {
        assert_eq!(table.get(k, h), None);
    }
}

#[test]
fn delete_missing_returns_false() {
    let mut heap = Heap::new();
    let (k, h) = key(&mut heap, "a");
    let (other, other_hash) = key(&mut heap, "b");
    let mut table = Table::new();
    table.set(k, h, Value::Nil);
    assert!(!table.delete(other, other_hash));
}

#[test]
fn reinsert_after_delete_reuses_tombstone() {
    let mut heap = Heap::new();
    let (k, h) = key(&mut heap, "cell");
    let mut table = Table::new();
    table.set(k, h, Value::Number(1.0));
    let capacity = table.capacity();
    // Repeated delete/insert of the same key must not grow the table:
    // the insertion lands in the tombstone already counted.
    for round in 0..100 {
        assert!(table.delete(k, h));
        assert!(table.set(k, h, Value::Number(f64::from(round))));
    }
    assert_eq!(table.capacity(), capacity);
    assert_eq!(table.get(k, h), Some(Value::Number(99.0)));
}

#[test]
fn growth_replays_live_entries() {
    let mut heap = Heap::new();
    let mut table = Table::new();
    let keys: Vec<_> = (0..24)
        .map(|i| key(&mut heap, &format!("grow{i}")))
        .collect();
    for (i, &(k, h)) in keys.iter().enumerate() {
        table.set(k, h, Value::Number(i as f64));
    }
    assert!(table.capacity() >= 32);
    for (i, &(k, h)) in keys.iter().enumerate() {
        assert_eq!(table.get(k, h), Some(Value::Number(i as f64)));
    }
}

#[test]
fn add_all_copies_live_entries_only() {
    let mut heap = Heap::new();
    let (a, ah) = key(&mut heap, "a");
    let (b, bh) = key(&mut heap, "b");
    let mut from = Table::new();
    from.set(a, ah, Value::Number(1.0));
    from.set(b, bh, Value::Number(2.0));
    from.delete(b, bh);

    let mut to = Table::new();
    to.add_all(&from);
    assert_eq!(to.get(a, ah), Some(Value::Number(1.0)));
    assert_eq!(to.get(b, bh), None);
}

#[test]
fn find_string_probes_by_content_hash() {
    let mut heap = Heap::new();
    let (k, h) = key(&mut heap, "needle");
    let mut table = Table::new();
    table.set(k, h, Value::Nil);
    assert_eq!(table.find_string(h, |candidate| candidate == k), Some(k));
    assert_eq!(table.find_string(hash_str("straw"), |_| true), None);
}

#[test]
fn remove_white_tombstones_unmarked_keys() {
    let mut heap = Heap::new();
    let (keep, keep_hash) = key(&mut heap, "keep");
    let (drop, drop_hash) = key(&mut heap, "drop");
    let mut table = Table::new();
    table.set(keep, keep_hash, Value::Nil);
    table.set(drop, drop_hash, Value::Nil);

    table.remove_white(|k| k == keep);
    assert_eq!(table.get(keep, keep_hash), Some(Value::Nil));
    assert_eq!(table.get(drop, drop_hash), None);
}

#[test]
fn iter_skips_tombstones() {
    let mut heap = Heap::new();
    let (a, ah) = key(&mut heap, "a");
    let (b, bh) = key(&mut heap, "b");
    let mut table = Table::new();
    table.set(a, ah, Value::Number(1.0));
    table.set(b, bh, Value::Number(2.0));
    table.delete(a, ah);
    let entries: Vec<_> = table.iter().collect();
    assert_eq!(entries, vec![(b, Value::Number(2.0))]);
}

proptest! {
    /// Under arbitrary insert/overwrite/delete sequences the table agrees
    /// with a reference map on every key.
    #[test]
    fn behaves_like_a_map(
        ops in prop::collection::vec((0usize..12, prop::option::of(-1000i32..1000)), 0..200)
    ) {
        let mut heap = Heap::new();
        let keys: Vec<(ObjRef, u32)> = (0..12)
            .map(|i| key(&mut heap, &format!("key{i}")))
            .collect();
        let mut table = Table::new();
        let mut model: HashMap<usize, i32> = HashMap::new();

        for (index, action) in ops {
            let (k, h) = keys[index];
            match action {
                Some(v) => {
                    let was_new = table.set(k, h, Value::Number(f64::from(v)));
                    prop_assert_eq!(was_new, !model.contains_key(&index));
                    model.insert(index, v);
                }
                None => {
                    let existed = table.delete(k, h);
                    prop_assert_eq!(existed, model.remove(&index).is_some());
                }
            }
            for (i, &(k, h)) in keys.iter().enumerate() {
                let expected = model.get(&i).map(|&v| Value::Number(f64::from(v)));
                prop_assert_eq!(table.get(k, h), expected);
            }
        }
    }
}
