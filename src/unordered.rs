//! Order-insensitive comparison of collections.

use std::{collections::HashMap, fmt::Debug, hash::Hash};

/// Check whether the given collections contain the same elements, ignoring their order but
/// respecting how often each element occurs.
///
/// Elements are compared by their canonical string form, i.e. their `Debug` rendering: two values
/// which render identically are considered equal.
pub fn unordered_eq<T>(first: &[T], second: &[T]) -> bool
where
    T: Debug,
{
    let key = |value: &T| format!("{value:?}");
    multiset_eq(first.iter().map(key), second.iter().map(key), first.len(), second.len())
}

/// Check whether the given byte sequences contain the same payloads, ignoring their order but
/// respecting how often each payload occurs.
pub fn unordered_eq_bytes<A, B>(first: &[A], second: &[B]) -> bool
where
    A: AsRef<[u8]>,
    B: AsRef<[u8]>,
{
    multiset_eq(
        first.iter().map(AsRef::as_ref),
        second.iter().map(AsRef::as_ref),
        first.len(),
        second.len(),
    )
}

/// Render byte sequences as (lossy UTF-8) strings for diagnostics.
pub fn readable_payloads<T>(payloads: &[T]) -> Vec<String>
where
    T: AsRef<[u8]>,
{
    payloads
        .iter()
        .map(|payload| String::from_utf8_lossy(payload.as_ref()).into_owned())
        .collect()
}

fn multiset_eq<K>(
    first: impl Iterator<Item = K>,
    second: impl Iterator<Item = K>,
    first_len: usize,
    second_len: usize,
) -> bool
where
    K: Eq + Hash,
{
    if first_len != second_len {
        return false;
    }

    let mut counts = HashMap::<K, usize>::with_capacity(first_len);
    for key in first {
        *counts.entry(key).or_default() += 1;
    }

    for key in second {
        match counts.get_mut(&key) {
            Some(0) | None => return false,
            Some(count) => *count -= 1,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use crate::unordered::{readable_payloads, unordered_eq, unordered_eq_bytes};

    #[test]
    fn test_unordered_eq() {
        assert!(unordered_eq(&["one", "two"], &["two", "one"]));
        assert!(unordered_eq(&[true, true, false], &[false, true, true]));
        assert!(unordered_eq(&[1, 2, 3], &[3, 2, 1]));
        assert!(!unordered_eq(&[1, 3], &[2, 3]));
        assert!(!unordered_eq(&["one"], &["two"]));
    }

    #[test]
    fn test_unordered_eq_respects_multiplicity() {
        assert!(!unordered_eq(&[1, 1, 2], &[1, 2, 2]));
        assert!(unordered_eq(&[1, 2, 1], &[1, 1, 2]));
    }

    #[test]
    fn test_unordered_eq_different_lengths() {
        assert!(!unordered_eq(&[1, 2], &[1, 2, 2]));
        assert!(!unordered_eq::<u8>(&[], &[1]));
        assert!(unordered_eq::<u8>(&[], &[]));
    }

    #[test]
    fn test_unordered_eq_uses_canonical_form() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct Account {
            user_id: i32,
            username: &'static str,
        }

        let first = [
            Account {
                user_id: 1,
                username: "myUser",
            },
            Account {
                user_id: 2,
                username: "mySecondUser",
            },
        ];
        let second = [
            Account {
                user_id: 2,
                username: "mySecondUser",
            },
            Account {
                user_id: 1,
                username: "myUser",
            },
        ];
        assert!(unordered_eq(&first, &second));
    }

    #[test]
    fn test_unordered_eq_bytes() {
        let first = [br#"{"foo":"bar"}"#.to_vec(), b"!@#$%^&*()".to_vec()];
        let second = [b"!@#$%^&*()".to_vec(), br#"{"foo":"bar"}"#.to_vec()];
        assert!(unordered_eq_bytes(&first, &second));

        let first = [b"someBytes".as_slice(), b"moreBytes".as_slice()];
        let second = [b"someBytes".as_slice()];
        assert!(!unordered_eq_bytes(&first, &second));
    }

    #[test]
    fn test_readable_payloads() {
        let payloads = readable_payloads(&[b"A".to_vec(), vec![0xff]]);
        assert_eq!(payloads, vec!["A".to_string(), "\u{fffd}".to_string()]);
    }
}
