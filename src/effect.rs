//! Once-per-key side effects.

use std::collections::HashSet;
use std::hash::Hash;

/// Runs an effect at most once for each distinct key.
///
/// Keys are remembered for the lifetime of the value, so returning to an
/// earlier key does not run the effect again.
#[derive(Debug, Clone)]
pub struct OncePerKey<K> {
    seen: HashSet<K>,
}

impl<K: Eq + Hash + Clone> OncePerKey<K> {
    pub fn new() -> Self {
        Self {
            seen: HashSet::new(),
        }
    }

    /// Run `effect` unless it already ran for `key`. Returns whether it ran.
    pub fn run<F: FnOnce(&K)>(&mut self, key: &K, effect: F) -> bool {
        if self.seen.contains(key) {
            return false;
        }
        self.seen.insert(key.clone());
        effect(key);
        true
    }

    pub fn has_run(&self, key: &K) -> bool {
        self.seen.contains(key)
    }
}

impl<K: Eq + Hash + Clone> Default for OncePerKey<K> {
    fn default() -> Self {
        Self::new()
    }
}
