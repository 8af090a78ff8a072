//! Thread-safe set of keys with an operation in flight.
//!
//! The content cache uses it so that a page requested many times while its
//! fetch is outstanding is fetched once.

use crate::error::LockResultExt;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// Cheaply cloneable set of in-flight keys.
///
/// ```ignore
/// let fetching: InProgressSet<String> = InProgressSet::new();
/// assert!(fetching.try_start(&key));   // caller schedules the fetch
/// assert!(!fetching.try_start(&key));  // duplicate, skip
/// fetching.finish(&key);
/// ```
#[derive(Clone)]
pub struct InProgressSet<T> {
    items: Arc<Mutex<HashSet<T>>>,
}

impl<T: Eq + Hash + Clone> InProgressSet<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Returns `true` if this call started the operation, `false` if it was
    /// already running.
    pub fn try_start(&self, item: &T) -> bool {
        self.items
            .lock()
            .recover_poison("InProgressSet::try_start")
            .insert(item.clone())
    }

    pub fn finish(&self, item: &T) {
        self.items
            .lock()
            .recover_poison("InProgressSet::finish")
            .remove(item);
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items
            .lock()
            .recover_poison("InProgressSet::contains")
            .contains(item)
    }

    pub fn len(&self) -> usize {
        self.items.lock().recover_poison("InProgressSet::len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Eq + Hash + Clone> Default for InProgressSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
