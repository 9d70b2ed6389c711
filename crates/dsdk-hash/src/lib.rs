// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stable step identity hashing (spec §4.1, C1).
//!
//! Maps `(user_id, position_index)` to a deterministic 40-char lower-hex
//! SHA1 digest — the hashed id the server uses to key memoized step state.
//! Collisions across distinct `(id, index)` pairs are not a practical
//! concern; re-use of the same pair is intentional and means "the same step".
#![deny(unsafe_code)]
#![warn(missing_docs)]

use sha1::{Digest, Sha1};

/// Compute the hashed id for a step occurrence.
///
/// Matches the wire format `SHA1(id + ":" + index)`, truncated to (all of)
/// its 40 hex characters.
///
/// ```
/// assert_eq!(
///     dsdk_hash::hash("my-step", 0),
///     "8ddd9bbb600d3bde738ce16bb9a8691f87afeec5"
/// );
/// ```
#[must_use]
pub fn hash(id: &str, index: u32) -> String {
    let mut hasher = Sha1::new();
    hasher.update(id.as_bytes());
    hasher.update(b":");
    hasher.update(index.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(40);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Reduce a user-supplied step id to the safe subset `[a-z0-9-]` for
/// transport and logging, collapsing runs of unsafe characters to a single
/// `-`. The raw id is preserved separately wherever it's stored; this is a
/// display/transport helper only.
#[must_use]
pub fn slugify(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    let mut last_was_dash = false;
    for ch in id.to_ascii_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

/// Tracks how many times each user-supplied step id has occurred within a
/// single run, so repeated ids get distinct hashed ids (spec §3: "duplicate
/// ids are allowed but each occurrence gets an increasing index appended").
#[derive(Debug, Default)]
pub struct PositionTracker {
    counts: std::collections::HashMap<String, u32>,
}

impl PositionTracker {
    /// Create an empty tracker (use one per run/request).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an occurrence of `id`, returning its `(index, hashed_id)`.
    pub fn next(&mut self, id: &str) -> (u32, String) {
        let entry = self.counts.entry(id.to_string()).or_insert(0);
        let index = *entry;
        *entry += 1;
        (index, hash(id, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_spec_literal_example() {
        // SHA1("my-step:0")
        assert_eq!(hash("my-step", 0), "8ddd9bbb600d3bde738ce16bb9a8691f87afeec5");
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash("a", 3), hash("a", 3));
    }

    #[test]
    fn different_indices_hash_differently() {
        assert_ne!(hash("a", 0), hash("a", 1));
    }

    #[test]
    fn position_tracker_increments_on_reuse() {
        let mut tracker = PositionTracker::new();
        let (i0, h0) = tracker.next("dup");
        let (i1, h1) = tracker.next("dup");
        assert_eq!(i0, 0);
        assert_eq!(i1, 1);
        assert_ne!(h0, h1);
        assert_eq!(h0, hash("dup", 0));
        assert_eq!(h1, hash("dup", 1));
    }

    #[test]
    fn slugify_collapses_unsafe_chars() {
        assert_eq!(slugify("My Step! #1"), "my-step-1");
        assert_eq!(slugify("already-safe"), "already-safe");
    }

    proptest::proptest! {
        #[test]
        fn hash_is_pure(id in "[a-zA-Z0-9_-]{1,32}", index in 0u32..1000) {
            let a = hash(&id, index);
            let b = hash(&id, index);
            proptest::prop_assert_eq!(a, b);
            proptest::prop_assert_eq!(a.len(), 40);
        }
    }
}
