//! An insertion-ordered map.
//!
//! Digest siblings are rendered in the order they were first seen, so a hash
//! map alone is not enough. Entries live in a `Vec`; a side index maps each
//! key to its slot.

use std::{collections::HashMap, hash::Hash};

#[derive(Debug, Clone)]
pub struct OrderedMap<K, V> {
  entries: Vec<(K, V)>,
  index:   HashMap<K, usize>,
}

impl<K, V> Default for OrderedMap<K, V> {
  fn default() -> Self { Self { entries: Vec::new(), index: HashMap::new() } }
}

impl<K: Eq + Hash + Clone, V> OrderedMap<K, V> {
  pub fn new() -> Self { Self::default() }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  pub fn contains_key(&self, key: &K) -> bool { self.index.contains_key(key) }

  pub fn get(&self, key: &K) -> Option<&V> {
    self.index.get(key).map(|&i| &self.entries[i].1)
  }

  pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
    self.index.get(key).map(|&i| &mut self.entries[i].1)
  }

  /// Insert or replace. A replaced value keeps its original position.
  /// Returns the previous value, if any.
  pub fn insert(&mut self, key: K, value: V) -> Option<V> {
    match self.index.get(&key) {
      Some(&i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
      None => {
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        None
      }
    }
  }

  /// Return the value for `key`, appending `make()` first if absent.
  pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V {
    let i = match self.index.get(&key) {
      Some(&i) => i,
      None => {
        let i = self.entries.len();
        self.index.insert(key.clone(), i);
        self.entries.push((key, make()));
        i
      }
    };
    &mut self.entries[i].1
  }

  pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
    self.entries.iter().map(|(k, v)| (k, v))
  }

  pub fn keys(&self) -> impl Iterator<Item = &K> { self.entries.iter().map(|(k, _)| k) }

  pub fn values(&self) -> impl Iterator<Item = &V> { self.entries.iter().map(|(_, v)| v) }

  pub fn into_values(self) -> impl Iterator<Item = V> {
    self.entries.into_iter().map(|(_, v)| v)
  }
}

impl<K: Eq + Hash + Clone, V> FromIterator<(K, V)> for OrderedMap<K, V> {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    let mut map = Self::new();
    for (k, v) in iter {
      map.insert(k, v);
    }
    map
  }
}

impl<K, V> IntoIterator for OrderedMap<K, V> {
  type Item = (K, V);
  type IntoIter = std::vec::IntoIter<(K, V)>;

  fn into_iter(self) -> Self::IntoIter { self.entries.into_iter() }
}
