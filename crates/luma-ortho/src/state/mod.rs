//! Bucketed aggregation state.
//!
//! Maps each bucket key to the union of every bitmap seen under it. Union is
//! commutative, associative and idempotent, so the content of a state does not
//! depend on the order of `add` or `merge` calls.

pub mod codec;
pub mod key;

pub use codec::STATE_FORMAT_VERSION;
pub use key::{BucketKey, KeyKind};

use roaring::RoaringBitmap;
use std::borrow::Cow;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct BucketedState<K: BucketKey> {
    buckets: HashMap<K, RoaringBitmap>,
}

impl<K: BucketKey> Default for BucketedState<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: BucketKey> BucketedState<K> {
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
        }
    }

    /// Union `bitmap` into the bucket for `key`, creating the bucket if absent.
    pub fn add(&mut self, key: &K, bitmap: &RoaringBitmap) {
        match self.buckets.get_mut(key) {
            Some(existing) => *existing |= bitmap,
            None => {
                self.buckets.insert(key.clone(), bitmap.clone());
            }
        }
    }

    /// Add a single element to the bucket for `key`.
    pub fn insert(&mut self, key: &K, element: u32) {
        match self.buckets.get_mut(key) {
            Some(existing) => {
                existing.insert(element);
            }
            None => {
                let mut bitmap = RoaringBitmap::new();
                bitmap.insert(element);
                self.buckets.insert(key.clone(), bitmap);
            }
        }
    }

    /// Bucket-wise union of `other` into `self`.
    pub fn merge(&mut self, other: &BucketedState<K>) {
        for (key, bitmap) in &other.buckets {
            self.add(key, bitmap);
        }
    }

    /// Same as [`merge`](Self::merge), moving bitmaps out of `other` where possible.
    pub fn merge_owned(&mut self, other: BucketedState<K>) {
        for (key, bitmap) in other.buckets {
            match self.buckets.get_mut(&key) {
                Some(existing) => *existing |= bitmap,
                None => {
                    self.buckets.insert(key, bitmap);
                }
            }
        }
    }

    /// Bitmap for `key`; an unknown key yields the empty bitmap.
    pub fn get(&self, key: &K) -> Cow<'_, RoaringBitmap> {
        match self.buckets.get(key) {
            Some(bitmap) => Cow::Borrowed(bitmap),
            None => Cow::Owned(RoaringBitmap::new()),
        }
    }

    pub fn lookup(&self, key: &K) -> Option<&RoaringBitmap> {
        self.buckets.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.buckets.contains_key(key)
    }

    /// Number of buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &RoaringBitmap)> {
        self.buckets.iter()
    }

    /// Buckets ordered by key.
    pub fn sorted(&self) -> Vec<(&K, &RoaringBitmap)> {
        let mut entries: Vec<_> = self.buckets.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Union of every bucket.
    pub fn union_all(&self) -> RoaringBitmap {
        let mut result = RoaringBitmap::new();
        for bitmap in self.buckets.values() {
            result |= bitmap;
        }
        result
    }

    /// Intersection of the named buckets. A key with no bucket contributes the
    /// empty set, and an empty key list yields the empty set.
    pub fn intersect(&self, keys: &[K]) -> RoaringBitmap {
        let mut bitmaps = Vec::with_capacity(keys.len());
        for key in keys {
            match self.buckets.get(key) {
                Some(bitmap) => bitmaps.push(bitmap),
                None => return RoaringBitmap::new(),
            }
        }
        // Smallest first keeps the running intersection small.
        bitmaps.sort_by_key(|b| b.len());

        let mut iter = bitmaps.into_iter();
        let mut result = match iter.next() {
            Some(first) => first.clone(),
            None => return RoaringBitmap::new(),
        };
        for bitmap in iter {
            if result.is_empty() {
                break;
            }
            result &= bitmap;
        }
        result
    }
}
