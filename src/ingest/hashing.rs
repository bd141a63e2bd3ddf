//! Content fingerprints for change detection
//!
//! Stable hashes that change when a node's meaningful content changes while
//! being tolerant to whitespace reflows and tag ordering.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Fingerprint a node's title, content and tag set.
///
/// Whitespace runs collapse to one space and tags are hashed in sorted order,
/// so reformatting a note or reordering its tags keeps the fingerprint.
pub fn content_fingerprint(title: &str, content: &str, tags: &BTreeSet<String>) -> String {
    let mut hasher = Sha256::new();

    hasher.update(b"title:");
    hasher.update(normalize_whitespace(title).as_bytes());
    hasher.update(b"\ncontent:");
    hasher.update(normalize_whitespace(content).as_bytes());
    hasher.update(b"\ntags:");
    for (i, tag) in tags.iter().enumerate() {
        if i > 0 {
            hasher.update(b",");
        }
        hasher.update(tag.as_bytes());
    }

    hex::encode(hasher.finalize())
}

/// Collapse whitespace runs to a single space and trim the ends
fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fingerprint_ignores_whitespace() {
        let a = content_fingerprint("Title", "line one\n\nline  two", &tags(&["x"]));
        let b = content_fingerprint(" Title ", "line one line two", &tags(&["x"]));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_detects_changes() {
        let base = content_fingerprint("Title", "body", &tags(&["x"]));
        assert_ne!(base, content_fingerprint("Title", "body!", &tags(&["x"])));
        assert_ne!(base, content_fingerprint("Title", "body", &tags(&["x", "y"])));
        assert_ne!(base, content_fingerprint("Other", "body", &tags(&["x"])));
    }

    #[test]
    fn test_fingerprint_separates_fields() {
        // Moving text between title and content must change the hash
        assert_ne!(
            content_fingerprint("ab", "c", &BTreeSet::new()),
            content_fingerprint("a", "bc", &BTreeSet::new())
        );
    }
}
