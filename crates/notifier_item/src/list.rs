//! Insertion-ordered list of sources, keyed by the handle the bus gave us.
//!
//! Nodes live in a slab and link to each other by index, so inserting and unlinking are O(1) and nothing
//! outside of this module ever sees a node pointer. A map from handle to slot replaces the back-reference
//! a bus library would otherwise store on its own handle.

use std::{collections::HashMap, hash::Hash};

struct Node<K, T> {
    key: K,
    value: T,
    prev: Option<usize>,
    next: Option<usize>,
}

enum Slot<K, T> {
    Occupied(Node<K, T>),
    Free { next_free: Option<usize> },
}

pub struct SourceList<K, T> {
    slots: Vec<Slot<K, T>>,
    free_head: Option<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    index: HashMap<K, usize>,
}

impl<K, T> Default for SourceList<K, T> {
    fn default() -> Self {
        Self { slots: Vec::new(), free_head: None, head: None, tail: None, index: HashMap::new() }
    }
}

impl<K: Copy + Eq + Hash, T> SourceList<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Append `value` under `key`. If the key is already present, its value is replaced in place, keeping its
    /// position, and the old value is returned.
    pub fn insert(&mut self, key: K, value: T) -> Option<T> {
        if let Some(&idx) = self.index.get(&key) {
            return self.node_mut(idx).map(|node| std::mem::replace(&mut node.value, value));
        }

        let node = Node { key, value, prev: self.tail, next: None };
        let idx = match self.free_head {
            Some(idx) => {
                self.free_head = match self.slots[idx] {
                    Slot::Free { next_free } => next_free,
                    Slot::Occupied(_) => unreachable!("free list must only contain free slots"),
                };
                self.slots[idx] = Slot::Occupied(node);
                idx
            }
            None => {
                self.slots.push(Slot::Occupied(node));
                self.slots.len() - 1
            }
        };

        match self.tail.and_then(|tail| self.node_mut(tail)) {
            Some(tail) => tail.next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.index.insert(key, idx);
        None
    }

    /// Unlink and return the value stored under `key`. Removing a key that isn't present is a no-op.
    pub fn remove(&mut self, key: &K) -> Option<T> {
        let idx = self.index.remove(key)?;
        let node = match std::mem::replace(&mut self.slots[idx], Slot::Free { next_free: self.free_head }) {
            Slot::Occupied(node) => node,
            Slot::Free { .. } => unreachable!("index must only point at occupied slots"),
        };
        self.free_head = Some(idx);

        match node.prev.and_then(|prev| self.node_mut(prev)) {
            Some(prev) => prev.next = node.next,
            None => self.head = node.next,
        }
        match node.next.and_then(|next| self.node_mut(next)) {
            Some(next) => next.prev = node.prev,
            None => self.tail = node.prev,
        }
        Some(node.value)
    }

    pub fn get(&self, key: &K) -> Option<&T> {
        let idx = *self.index.get(key)?;
        self.node(idx).map(|node| &node.value)
    }

    /// Iterate over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> Iter<'_, K, T> {
        Iter { list: self, cursor: self.head }
    }

    fn node(&self, idx: usize) -> Option<&Node<K, T>> {
        match self.slots.get(idx) {
            Some(Slot::Occupied(node)) => Some(node),
            _ => None,
        }
    }

    fn node_mut(&mut self, idx: usize) -> Option<&mut Node<K, T>> {
        match self.slots.get_mut(idx) {
            Some(Slot::Occupied(node)) => Some(node),
            _ => None,
        }
    }

    /// Walk the links in both directions and check that they agree with each other and with the index.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let mut forward = Vec::new();
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = self.node(idx).expect("link points at a free slot");
            assert_eq!(node.prev, prev, "prev link of slot {} is broken", idx);
            assert_eq!(self.index.get(&node.key), Some(&idx), "index disagrees with slot {}", idx);
            forward.push(idx);
            prev = Some(idx);
            cursor = node.next;
        }
        assert_eq!(self.tail, prev, "tail does not point at the last node");
        assert_eq!(forward.len(), self.index.len(), "list and index have different lengths");
    }
}

pub struct Iter<'a, K, T> {
    list: &'a SourceList<K, T>,
    cursor: Option<usize>,
}

impl<'a, K: Copy + Eq + Hash, T> Iterator for Iter<'a, K, T> {
    type Item = (K, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.list.node(self.cursor?)?;
        self.cursor = node.next;
        Some((node.key, &node.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn keys(list: &SourceList<u32, &'static str>) -> Vec<u32> {
        list.iter().map(|(key, _)| key).collect()
    }

    #[test]
    fn test_insertion_order() {
        let mut list = SourceList::new();
        list.insert(3, "c");
        list.insert(1, "a");
        list.insert(2, "b");
        assert_eq!(keys(&list), vec![3, 1, 2]);
        list.assert_consistent();
    }

    #[test]
    fn test_remove_middle_head_and_tail() {
        let mut list = SourceList::new();
        for key in 0..5 {
            list.insert(key, "x");
        }
        assert_eq!(list.remove(&2), Some("x"));
        assert_eq!(list.remove(&0), Some("x"));
        assert_eq!(list.remove(&4), Some("x"));
        assert_eq!(keys(&list), vec![1, 3]);
        list.assert_consistent();
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut list = SourceList::new();
        assert_eq!(list.remove(&9), None);
        list.insert(1, "a");
        assert_eq!(list.remove(&1), Some("a"));
        assert_eq!(list.remove(&1), None);
        assert!(list.is_empty());
        list.assert_consistent();
    }

    #[test]
    fn test_reinsert_keeps_position() {
        let mut list = SourceList::new();
        list.insert(1, "a");
        list.insert(2, "b");
        assert_eq!(list.insert(1, "z"), Some("a"));
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![(1, &"z"), (2, &"b")]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_free_slots_are_reused() {
        let mut list = SourceList::new();
        list.insert(1, "a");
        list.insert(2, "b");
        list.remove(&1);
        list.insert(3, "c");
        assert_eq!(list.slots.len(), 2);
        assert_eq!(keys(&list), vec![2, 3]);
        list.assert_consistent();
    }
}
