//! Child keys for `push`
//!
//! Keys are UUIDv7 strings in lowercase hyphenated form. Version 7 UUIDs lead
//! with a millisecond timestamp and are monotonic within a process, so their
//! text sorts in creation order and pushed children come back in the order
//! they were pushed.

use uuid::Uuid;

/// Generate a fresh key for a pushed child.
pub fn push_key() -> String {
    Uuid::now_v7().hyphenated().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsondb_core::path::validate_key;
    use std::collections::HashSet;

    #[test]
    fn test_keys_are_valid_path_segments() {
        let key = push_key();
        assert_eq!(key.len(), 36);
        assert!(validate_key(&key).is_ok());
        assert_eq!(Uuid::parse_str(&key).unwrap().get_version_num(), 7);
    }

    #[test]
    fn test_keys_are_unique() {
        let keys: HashSet<String> = (0..1000).map(|_| push_key()).collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn test_keys_sort_in_creation_order() {
        let keys: Vec<String> = (0..200).map(|_| push_key()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
