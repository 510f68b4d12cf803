// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{Bssid, Pmkid},
    std::collections::VecDeque,
};

#[derive(Clone, Debug, PartialEq)]
pub struct KeyIdEntry {
    pub bssid: Bssid,
    pub id: Pmkid,
}

/// Fixed-capacity ring of key identifiers (PMKIDs, or BKIDs for WAPI). Once full, every
/// insert overwrites the oldest entry. A stale entry costs one full authentication at worst.
#[derive(Clone, Debug)]
pub struct KeyIdCache {
    /// Oldest first.
    entries: VecDeque<KeyIdEntry>,
    capacity: usize,
}

pub type PmkidCache = KeyIdCache;
pub type BkidCache = KeyIdCache;

impl KeyIdCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "key id cache needs a non-zero capacity");
        KeyIdCache { entries: VecDeque::with_capacity(capacity), capacity }
    }

    /// Refreshes the identifier in place if `bssid` is already cached.
    pub fn insert(&mut self, bssid: Bssid, id: Pmkid) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.bssid == bssid) {
            entry.id = id;
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(KeyIdEntry { bssid, id });
    }

    pub fn lookup(&self, bssid: &Bssid) -> Option<Pmkid> {
        self.entries.iter().find(|e| &e.bssid == bssid).map(|e| e.id)
    }

    pub fn remove(&mut self, bssid: &Bssid) -> bool {
        match self.entries.iter().position(|e| &e.bssid == bssid) {
            Some(idx) => self.entries.remove(idx).is_some(),
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
