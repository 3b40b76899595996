//! Insertion-ordered map that keeps duplicate keys

use std::borrow::Borrow;

use crate::error::MultimapError;

/// A sequence of `(key, value)` pairs.
///
/// Lookups return values in insertion order and duplicate keys are kept, so
/// repeated HTTP headers or form fields survive exactly as they appeared on
/// the wire. There is deliberately no unordered bulk view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedMultimap<K, V> {
    entries: Vec<(K, V)>,
}

impl<K, V> Default for OrderedMultimap<K, V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<K, V> OrderedMultimap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append an entry, even if `key` is already present
    pub fn put(&mut self, key: K, value: V) {
        self.entries.push((key, value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Keys in insertion order, repeated once per entry
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// Values in insertion order
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// Number of entries stored under `key`
    fn count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.keys().filter(|k| (*k).borrow() == key).count()
    }

    /// First value stored under `key`
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.entries
            .iter()
            .find(|(k, _)| k.borrow() == key)
            .map(|(_, v)| v)
    }

    /// Mutable access to the first value stored under `key`
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.entries
            .iter_mut()
            .find(|(k, _)| k.borrow() == key)
            .map(|(_, v)| v)
    }

    /// Every value stored under `key`, in insertion order
    pub fn get_all<Q>(&self, key: &Q) -> Vec<&V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.entries
            .iter()
            .filter(|(k, _)| k.borrow() == key)
            .map(|(_, v)| v)
            .collect()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Remove every entry stored under `key`, returning the values in
    /// insertion order. Other entries keep their relative order.
    pub fn remove_all<Q>(&mut self, key: &Q) -> Vec<V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|(k, _)| k.borrow() == key);
        self.entries = kept;
        removed.into_iter().map(|(_, v)| v).collect()
    }

    /// Insert `value` under a key expected to be unique.
    ///
    /// Appends when `key` is absent and replaces the value in place when it
    /// occurs exactly once. Fails without modifying the map when `key`
    /// occurs more than once.
    pub fn add_or_replace_unique_entry(&mut self, key: K, value: V) -> Result<(), MultimapError>
    where
        K: PartialEq,
    {
        match self.count(&key) {
            0 => {
                self.put(key, value);
                Ok(())
            },
            1 => {
                if let Some(slot) = self.get_mut(&key) {
                    *slot = value;
                }
                Ok(())
            },
            count => Err(MultimapError::AmbiguousReplace { count }),
        }
    }
}

impl<V> OrderedMultimap<String, V> {
    /// First value whose key equals `name` ignoring ASCII case
    pub fn get_ignore_ascii_case(&self, name: &str) -> Option<&V> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Every value whose key equals `name` ignoring ASCII case
    pub fn get_all_ignore_ascii_case(&self, name: &str) -> Vec<&V> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
            .collect()
    }
}

impl<K, V> Extend<(K, V)> for OrderedMultimap<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}

impl<K, V> FromIterator<(K, V)> for OrderedMultimap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<K, V> IntoIterator for OrderedMultimap<K, V> {
    type Item = (K, V);
    type IntoIter = std::vec::IntoIter<(K, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
