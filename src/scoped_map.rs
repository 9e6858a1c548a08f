//! `ScopedMap`
//!
//! This module defines a struct `ScopedMap<K, V>` which defines an
//! `FxHashMap`-like container that has a concept of scopes that can be
//! entered and exited, such that bindings inserted while inside a scope
//! aren't visible outside the scope.
//!
//! Unlike a plain map, an inner scope may rebind a key that an outer scope
//! already binds; the inner binding shadows the outer one until the scope is
//! exited. C block scoping for ordinary identifiers and structure tags both
//! need exactly this.

use crate::fx::FxHashMap;
use core::hash::Hash;

/// A stack of hash maps, one per open scope. Lookups walk from the innermost
/// scope outwards.
pub struct ScopedMap<K, V> {
    scopes: Vec<FxHashMap<K, V>>,
}

impl<K, V> ScopedMap<K, V>
where
    K: PartialEq + Eq + Hash + Clone,
{
    /// Creates a `ScopedMap` with the root (file) scope open.
    pub fn new() -> Self {
        Self {
            scopes: vec![FxHashMap::default()],
        }
    }

    /// Enter a new scope.
    pub fn push_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    /// Exit the current scope, dropping every binding made in it.
    pub fn pop_scope(&mut self) {
        self.scopes.pop();
        debug_assert!(!self.scopes.is_empty(), "popped the root scope");
    }

    /// Bind `key` in the current scope, returning any binding it replaces
    /// *in this same scope* (shadowed outer bindings are untouched).
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.scopes
            .last_mut()
            .expect("root scope is always open")
            .insert(key, value)
    }

    /// Look `key` up, innermost scope first.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.scopes.iter().rev().find_map(|scope| scope.get(key))
    }

    /// Look `key` up in the current scope only.
    pub fn get_in_current_scope(&self, key: &K) -> Option<&V> {
        self.scopes
            .last()
            .expect("root scope is always open")
            .get(key)
    }

    /// Is the root (file) scope the current scope?
    pub fn at_file_scope(&self) -> bool {
        self.scopes.len() == 1
    }
}

impl<K, V> Default for ScopedMap<K, V>
where
    K: PartialEq + Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic() {
        let mut map: ScopedMap<&str, i32> = ScopedMap::new();
        assert!(map.at_file_scope());

        assert_eq!(map.insert("x", 1), None);
        assert_eq!(map.get(&"x"), Some(&1));

        map.push_scope();
        assert!(!map.at_file_scope());
        // The outer binding is visible until shadowed.
        assert_eq!(map.get(&"x"), Some(&1));
        assert_eq!(map.get_in_current_scope(&"x"), None);

        // Shadow it; the outer binding is untouched.
        assert_eq!(map.insert("x", 2), None);
        assert_eq!(map.get(&"x"), Some(&2));

        // Rebinding within one scope replaces the binding.
        assert_eq!(map.insert("x", 3), Some(2));

        map.pop_scope();
        assert_eq!(map.get(&"x"), Some(&1));
        assert!(map.at_file_scope());
    }

    #[test]
    fn deep_shadowing() {
        let mut map: ScopedMap<&str, i32> = ScopedMap::new();
        map.insert("t", 0);
        for depth in 1..5 {
            map.push_scope();
            map.insert("t", depth);
            assert_eq!(map.get(&"t"), Some(&depth));
        }
        for depth in (0..4).rev() {
            map.pop_scope();
            assert_eq!(map.get(&"t"), Some(&depth));
        }
    }
}
