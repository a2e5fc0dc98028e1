//! A sparse, totally-ordered map from participant id to a monotonic counter.
//!
//! This is the vector-clock half of adOPTed: every participant tracks, for
//! every participant it knows about (including itself), how many
//! buffer-affecting Do-requests that participant has contributed.

use std::cmp::Ordering;
use std::fmt;

use smallvec::SmallVec;

use crate::error::StateVectorError;

/// Missing keys read as zero. Entries are kept sorted by user id so that
/// `compare`, serialization and diffing don't need to sort on every call.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StateVector {
    // (user id, count). Invariant: sorted by user id, no duplicate ids, no
    // zero-valued entries (a missing key and a zero entry mean the same
    // thing, so we normalize to the former).
    entries: SmallVec<[(u32, u32); 4]>,
}

impl StateVector {
    pub fn new() -> Self {
        Self { entries: SmallVec::new() }
    }

    fn find(&self, user: u32) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&user, |&(u, _)| u)
    }

    /// Missing keys read as zero.
    pub fn get(&self, user: u32) -> u32 {
        match self.find(user) {
            Ok(idx) => self.entries[idx].1,
            Err(_) => 0,
        }
    }

    /// Set `user`'s counter to `n`. `n` must be >= the current value.
    pub fn set(&mut self, user: u32, n: u32) -> Result<(), StateVectorError> {
        match self.find(user) {
            Ok(idx) => {
                if n < self.entries[idx].1 {
                    return Err(StateVectorError::MonotonicityViolation);
                }
                self.entries[idx].1 = n;
            }
            Err(idx) => {
                if n == 0 {
                    return Ok(());
                }
                self.entries.insert(idx, (user, n));
            }
        }
        Ok(())
    }

    /// Add `k` to `user`'s counter (k may be 0, a no-op).
    pub fn add(&mut self, user: u32, k: u32) {
        let cur = self.get(user);
        // Can't overflow in practice (u32 request counts) and there's no
        // monotonicity risk since we're strictly increasing.
        self.set(user, cur + k).expect("add never decreases a counter");
    }

    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Iterate over the non-zero (user, count) pairs, sorted by user id.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.entries.iter().copied()
    }

    /// True iff every key in `self` has a value <= the matching key in `other`.
    pub fn causally_before(&self, other: &StateVector) -> bool {
        self.entries.iter().all(|&(u, n)| n <= other.get(u))
    }

    /// Lexicographic order over the union of keys, with a tie-break so the
    /// order is total even between vectors with disjoint keys: first by
    /// the highest-valued differing user id, then by that user's count, and
    /// finally (if that's also equal - i.e. truly equal vectors) Equal.
    ///
    /// This is used only to pick a canonical winner for the concurrency-id
    /// tie-break in `operation::transform`; any total order over vectors
    /// would do, but it must be the *same* order at every site.
    pub fn compare(&self, other: &StateVector) -> Ordering {
        let mut users: SmallVec<[u32; 8]> = SmallVec::new();
        for &(u, _) in self.entries.iter().chain(other.entries.iter()) {
            if !users.contains(&u) {
                users.push(u);
            }
        }
        users.sort_unstable();
        for u in users {
            match self.get(u).cmp(&other.get(u)) {
                Ordering::Equal => continue,
                other_ord => return other_ord,
            }
        }
        Ordering::Equal
    }

    /// `uid:count(;uid:count)*`, sorted by uid, omitting zero entries.
    pub fn to_string(&self) -> String {
        let mut out = String::new();
        for (i, &(u, n)) in self.entries.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            out.push_str(&u.to_string());
            out.push(':');
            out.push_str(&n.to_string());
        }
        out
    }

    /// Same grammar, but only keys whose value differs from `base` are
    /// emitted. Keys present in `base` but absent from `self` (i.e. that
    /// would need to be "removed") cannot be represented by this grammar, so
    /// such a diff is disallowed: `to_string_diff` panics in debug builds
    /// if it would be required to encode a removal (which cannot happen
    /// through any of this module's public constructors, since counters are
    /// monotonic and `self` is always causally-reachable-or-ahead of `base`
    /// in every call site in this crate).
    pub fn to_string_diff(&self, base: &StateVector) -> String {
        let mut out = String::new();
        let mut first = true;
        for &(u, n) in self.entries.iter() {
            if base.get(u) != n {
                if !first {
                    out.push(';');
                }
                first = false;
                out.push_str(&u.to_string());
                out.push(':');
                out.push_str(&n.to_string());
            }
        }
        debug_assert!(
            base.entries.iter().all(|&(u, _)| self.get(u) != 0 || base.get(u) == 0),
            "diff would need to encode removal of key {:?}, which this grammar can't express",
            base.entries.iter().find(|&&(u, _)| self.get(u) == 0).map(|&(u, _)| u)
        );
        out
    }

    pub fn from_string(s: &str) -> Result<Self, StateVectorError> {
        let mut entries: SmallVec<[(u32, u32); 4]> = SmallVec::new();
        if !s.is_empty() {
            for pair in s.split(';') {
                let (uid, count) = pair.split_once(':').ok_or(StateVectorError::ParseError)?;
                let uid: u32 = uid.parse().map_err(|_| StateVectorError::ParseError)?;
                let count: u32 = count.parse().map_err(|_| StateVectorError::ParseError)?;
                entries.push((uid, count));
            }
        }
        entries.sort_unstable_by_key(|&(u, _)| u);
        if entries.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(StateVectorError::ParseError);
        }
        entries.retain(|&(_, n)| n != 0);
        Ok(Self { entries })
    }

    /// Inverse of `to_string_diff`: apply the differing keys on top of `base`.
    pub fn from_string_diff(s: &str, base: &StateVector) -> Result<Self, StateVectorError> {
        let mut result = base.clone();
        if !s.is_empty() {
            for pair in s.split(';') {
                let (uid, count) = pair.split_once(':').ok_or(StateVectorError::ParseError)?;
                let uid: u32 = uid.parse().map_err(|_| StateVectorError::ParseError)?;
                let count: u32 = count.parse().map_err(|_| StateVectorError::ParseError)?;
                result.set(uid, count).map_err(|_| StateVectorError::ParseError)?;
            }
        }
        Ok(result)
    }

    /// Component-wise minimum over a set of vectors, used by the algorithm's
    /// cleanup sweep to find the global lower bound.
    pub fn componentwise_min<'a>(vectors: impl IntoIterator<Item = &'a StateVector>) -> StateVector {
        let mut iter = vectors.into_iter();
        let Some(first) = iter.next() else { return StateVector::new() };
        let mut users: SmallVec<[u32; 8]> = first.entries.iter().map(|&(u, _)| u).collect();
        let mut result = first.clone();
        for v in iter {
            for &(u, _) in v.entries.iter() {
                if !users.contains(&u) {
                    users.push(u);
                }
            }
            for &u in &users {
                let min = result.get(u).min(v.get(u));
                // Bypass the monotonicity check: a lower bound may decrease
                // relative to `result`'s running accumulation as we fold in
                // more vectors, that's the entire point.
                match result.find(u) {
                    Ok(idx) => result.entries[idx].1 = min,
                    Err(idx) => {
                        if min != 0 {
                            result.entries.insert(idx, (u, min));
                        }
                    }
                }
            }
        }
        result.entries.retain(|&(_, n)| n != 0);
        result
    }

    pub fn sum(&self) -> u64 {
        self.entries.iter().map(|&(_, n)| n as u64).sum()
    }
}

impl fmt::Display for StateVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string())
    }
}

impl PartialOrd for StateVector {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for StateVector {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_missing_is_zero() {
        let v = StateVector::new();
        assert_eq!(v.get(1), 0);
    }

    #[test]
    fn set_and_get() {
        let mut v = StateVector::new();
        v.set(1, 5).unwrap();
        v.set(2, 3).unwrap();
        assert_eq!(v.get(1), 5);
        assert_eq!(v.get(2), 3);
        assert_eq!(v.get(3), 0);
    }

    #[test]
    fn set_rejects_decrease() {
        let mut v = StateVector::new();
        v.set(1, 5).unwrap();
        assert_eq!(v.set(1, 4), Err(StateVectorError::MonotonicityViolation));
    }

    #[test]
    fn add_accumulates() {
        let mut v = StateVector::new();
        v.add(1, 2);
        v.add(1, 3);
        assert_eq!(v.get(1), 5);
    }

    #[test]
    fn causally_before() {
        let mut a = StateVector::new();
        a.set(1, 2).unwrap();
        let mut b = StateVector::new();
        b.set(1, 3).unwrap();
        b.set(2, 1).unwrap();
        assert!(a.causally_before(&b));
        assert!(!b.causally_before(&a));
        assert!(a.causally_before(&a));
    }

    #[test]
    fn round_trip_string() {
        let mut v = StateVector::new();
        v.set(2, 3).unwrap();
        v.set(1, 7).unwrap();
        let s = v.to_string();
        assert_eq!(s, "1:7;2:3");
        assert_eq!(StateVector::from_string(&s).unwrap(), v);
    }

    #[test]
    fn round_trip_diff() {
        let mut base = StateVector::new();
        base.set(1, 5).unwrap();
        base.set(2, 2).unwrap();

        let mut v = base.clone();
        v.set(1, 8).unwrap();
        v.set(3, 1).unwrap();

        let diff = v.to_string_diff(&base);
        assert_eq!(diff, "1:8;3:1");
        assert_eq!(StateVector::from_string_diff(&diff, &base).unwrap(), v);
    }

    #[test]
    fn empty_diff_when_equal() {
        let mut v = StateVector::new();
        v.set(1, 5).unwrap();
        assert_eq!(v.to_string_diff(&v), "");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(StateVector::from_string("not-a-vector").unwrap_err(), StateVectorError::ParseError);
        assert_eq!(StateVector::from_string("1:2;1:3").unwrap_err(), StateVectorError::ParseError);
    }

    #[test]
    fn total_order_tie_break() {
        let mut a = StateVector::new();
        a.set(1, 1).unwrap();
        let mut b = StateVector::new();
        b.set(2, 1).unwrap();
        // Disjoint keys still produce a deterministic, antisymmetric order.
        let ord = a.compare(&b);
        assert_ne!(ord, Ordering::Equal);
        assert_eq!(ord, b.compare(&a).reverse());
    }

    #[test]
    fn componentwise_min() {
        let mut a = StateVector::new();
        a.set(1, 5).unwrap();
        a.set(2, 1).unwrap();
        let mut b = StateVector::new();
        b.set(1, 2).unwrap();
        b.set(3, 4).unwrap();

        let min = StateVector::componentwise_min([&a, &b]);
        assert_eq!(min.get(1), 2);
        assert_eq!(min.get(2), 0);
        assert_eq!(min.get(3), 0);
    }
}
