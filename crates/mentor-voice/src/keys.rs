//! Round-robin rotation over a pool of synthesis API keys.
//!
//! A key that fails a request is not penalized or skipped; the cursor simply
//! moves on, so quota is spread evenly but a dead key keeps getting its turn.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Ordered credential pool with a wrapping cursor. Each session owns its own.
pub struct KeyRotator {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl KeyRotator {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next key in strict round-robin order starting at index 0.
    /// `None` when the pool is empty.
    pub fn next_key(&self) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let n = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(self.keys[n % self.keys.len()].as_str())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// Keys never reach logs.
impl fmt::Debug for KeyRotator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRotator")
            .field("keys", &self.keys.len())
            .field("cursor", &self.cursor.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_pool_yields_none() {
        let r = KeyRotator::new(Vec::new());
        assert!(r.next_key().is_none());
        assert!(r.next_key().is_none());
    }

    #[test]
    fn strict_round_robin_from_zero() {
        let r = KeyRotator::new(vec!["a".into(), "b".into(), "c".into()]);
        let seq: Vec<&str> = (0..7).filter_map(|_| r.next_key()).collect();
        assert_eq!(seq, vec!["a", "b", "c", "a", "b", "c", "a"]);
    }

    #[test]
    fn usage_counts_differ_by_at_most_one() {
        for n in 1..6usize {
            for m in 0..25usize {
                let keys: Vec<String> = (0..n).map(|i| format!("k{i}")).collect();
                let r = KeyRotator::new(keys);
                let mut counts: HashMap<String, usize> = HashMap::new();
                for _ in 0..m {
                    *counts.entry(r.next_key().unwrap().to_string()).or_default() += 1;
                }
                let max = counts.values().copied().max().unwrap_or(0);
                let min = if counts.len() < n {
                    0
                } else {
                    counts.values().copied().min().unwrap_or(0)
                };
                assert!(max - min <= 1, "n={n} m={m} counts={counts:?}");
            }
        }
    }

    #[test]
    fn debug_does_not_leak_keys() {
        let r = KeyRotator::new(vec!["secret-key".into()]);
        assert!(!format!("{r:?}").contains("secret"));
    }
}
