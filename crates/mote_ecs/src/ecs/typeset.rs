//! # Type-Set Utilities
//!
//! Set algebra over ordered component lists. Archetypes and queries are both
//! described by an ordered list of [`ComponentId`](super::ComponentId)s; these
//! helpers decide which archetypes satisfy which queries and how columns line
//! up across a migration.
//!
//! Lists are short (a handful of components), so every operation is a plain
//! linear scan over a slice.

/// Position of `item` in `set`.
#[inline]
#[must_use]
pub fn position<T: PartialEq>(set: &[T], item: &T) -> Option<usize> {
    set.iter().position(|x| x == item)
}

/// Checks if `set` contains `item`.
#[inline]
#[must_use]
pub fn contains<T: PartialEq>(set: &[T], item: &T) -> bool {
    set.contains(item)
}

/// Checks that no element appears twice. Returns the first repeat if any.
#[must_use]
pub fn first_duplicate<T: PartialEq>(set: &[T]) -> Option<&T> {
    set.iter()
        .enumerate()
        .find(|(i, item)| set[..*i].contains(item))
        .map(|(_, item)| item)
}

/// Checks that no element appears twice.
#[inline]
#[must_use]
pub fn is_unique<T: PartialEq>(set: &[T]) -> bool {
    first_duplicate(set).is_none()
}

/// Checks if every element of `subset` is in `superset`.
#[must_use]
pub fn is_subset<T: PartialEq>(subset: &[T], superset: &[T]) -> bool {
    subset.iter().all(|item| superset.contains(item))
}

/// Checks if both lists hold the same elements, in any order.
#[must_use]
pub fn same_set<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    a.len() == b.len() && is_subset(a, b) && is_subset(b, a)
}

/// Checks if both lists hold the same elements in the same order.
///
/// This is the identity used by `World::archetype_exists`.
#[inline]
#[must_use]
pub fn same_order<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    a == b
}

/// `a` followed by the elements of `b` not already present, in order.
#[must_use]
pub fn union<T: PartialEq + Clone>(a: &[T], b: &[T]) -> Vec<T> {
    let mut out = a.to_vec();
    for item in b {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

/// Elements of `a` not in `b`, in `a`'s order.
#[must_use]
pub fn difference<T: PartialEq + Clone>(a: &[T], b: &[T]) -> Vec<T> {
    a.iter().filter(|item| !b.contains(item)).cloned().collect()
}

/// For every element of `from`, its position in `to`.
#[must_use]
pub fn mapping<T: PartialEq>(from: &[T], to: &[T]) -> Vec<Option<usize>> {
    from.iter().map(|item| position(to, item)).collect()
}

/// Keeps only the elements of `candidates` also present in `other`.
///
/// Both lists must be sorted ascending.
pub fn retain_sorted<T: Ord>(candidates: &mut Vec<T>, other: &[T]) {
    candidates.retain(|item| other.binary_search(item).is_ok());
}
