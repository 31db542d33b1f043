//! Immutable sets of logical CPU ids
//!
//! A [`Cpuset`] is the value type behind every CPU list this daemon handles:
//! the reserved pool given on the command line, the mutual pool derived from
//! it, and the `cpus` field the runtime hands us for each container.
//!
//! # Textual Form
//!
//! ```text
//! "0-3,5,7-10"   ← comma-separated singletons and inclusive ranges
//!  │   │  └───── range 7..=10
//!  │   └──────── singleton 5
//!  └──────────── range 0..=3
//! ```
//!
//! Parsing accepts any mix of singletons and ranges in any order, with
//! duplicates. Formatting is canonical: ids ascending, every run of two or
//! more consecutive ids collapsed into a range. Two sets are equal when they
//! hold the same ids, whatever text they were parsed from.
//!
//! Every operation returns a new value; a `Cpuset` is never mutated after
//! construction.
//!
//! Ids above [`MAX_CPU_ID`] are rejected, so a hostile range such as
//! `0-4294967295` in a container spec fails to parse instead of being
//! expanded.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Largest CPU id accepted (the kernel's NR_CPUS tops out at 8192)
pub const MAX_CPU_ID: usize = 8191;

/// Error returned when a cpuset string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CpusetParseError {
    /// A token is not a CPU id in `0..=MAX_CPU_ID` (e.g. "x", "1.5", "", "9000")
    InvalidId { token: String },
    /// A range token is malformed, descending or out of bounds (e.g. "3-1", "1-2-3", "0-9000")
    InvalidRange { token: String },
}

impl fmt::Display for CpusetParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpusetParseError::InvalidId { token } => {
                write!(f, "invalid cpu id {:?}", token)
            }
            CpusetParseError::InvalidRange { token } => {
                write!(f, "invalid cpu range {:?}", token)
            }
        }
    }
}

impl std::error::Error for CpusetParseError {}

impl CpusetParseError {
    /// The token that failed to parse
    pub fn token(&self) -> &str {
        match self {
            CpusetParseError::InvalidId { token } | CpusetParseError::InvalidRange { token } => {
                token
            }
        }
    }
}

/// An immutable, ordered set of logical CPU ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Cpuset(BTreeSet<usize>);

impl Cpuset {
    /// The empty set
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Parse a cpuset string such as `"0-3,5"`
    ///
    /// Surrounding whitespace (e.g. the newline at the end of a cgroup file)
    /// is ignored; the empty string is the empty set.
    pub fn parse(text: &str) -> Result<Self, CpusetParseError> {
        text.parse()
    }

    /// Number of CPUs in the set
    pub fn size(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: usize) -> bool {
        self.0.contains(&id)
    }

    /// Ids present in either set
    pub fn union(&self, other: &Cpuset) -> Cpuset {
        Self(self.0.union(&other.0).copied().collect())
    }

    /// Ids present in both sets
    pub fn intersection(&self, other: &Cpuset) -> Cpuset {
        Self(self.0.intersection(&other.0).copied().collect())
    }

    /// Ids present in `self` but not in `other`
    pub fn difference(&self, other: &Cpuset) -> Cpuset {
        Self(self.0.difference(&other.0).copied().collect())
    }

    /// Ids in ascending order
    pub fn to_sorted_vec(&self) -> Vec<usize> {
        self.0.iter().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
}

/// Parse a cpuset string and return its ids in the order they are written
///
/// Duplicates are dropped, keeping the first occurrence. This is the
/// "enumeration order" of a configured CPU list: `"8-9,0-3"` yields
/// `[8, 9, 0, 1, 2, 3]`.
pub fn ids_in_written_order(text: &str) -> Result<Vec<usize>, CpusetParseError> {
    let text = text.trim();
    let mut ids = Vec::new();
    if text.is_empty() {
        return Ok(ids);
    }

    let mut seen = BTreeSet::new();
    for token in text.split(',') {
        match token.split_once('-') {
            Some((start, end)) => {
                let invalid = || CpusetParseError::InvalidRange {
                    token: token.to_string(),
                };
                let start = parse_id(start).map_err(|_| invalid())?;
                let end = parse_id(end).map_err(|_| invalid())?; // inclusive
                if end < start {
                    return Err(invalid());
                }
                for id in start..=end {
                    if seen.insert(id) {
                        ids.push(id);
                    }
                }
            }
            None => {
                let id = parse_id(token)?;
                if seen.insert(id) {
                    ids.push(id);
                }
            }
        }
    }

    Ok(ids)
}

fn parse_id(token: &str) -> Result<usize, CpusetParseError> {
    // usize::from_str accepts a leading '+', which is not valid cpuset syntax
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CpusetParseError::InvalidId {
            token: token.to_string(),
        });
    }
    match token.parse::<usize>() {
        Ok(id) if id <= MAX_CPU_ID => Ok(id),
        _ => Err(CpusetParseError::InvalidId {
            token: token.to_string(),
        }),
    }
}

impl FromStr for Cpuset {
    type Err = CpusetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ids_in_written_order(s).map(|ids| ids.into_iter().collect())
    }
}

impl FromIterator<usize> for Cpuset {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Cpuset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // [0, 1, 2, 3, 5, 7, 8] => [(0, 3), (5, 5), (7, 8)]
        let mut runs: Vec<(usize, usize)> = Vec::new();
        for id in self.iter() {
            match runs.last_mut() {
                Some((_, end)) if *end + 1 == id => *end = id,
                _ => runs.push((id, id)),
            }
        }

        for (i, (start, end)) in runs.into_iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}-{}", start, end)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(s: &str) -> Cpuset {
        Cpuset::parse(s).unwrap()
    }

    #[test]
    fn test_parse_singletons_and_ranges() {
        let c = set("0-3,5,7-10");
        assert_eq!(c.to_sorted_vec(), vec![0, 1, 2, 3, 5, 7, 8, 9, 10]);
        assert_eq!(c.size(), 9);
        assert!(c.contains(8));
        assert!(!c.contains(4));
    }

    #[test]
    fn test_parse_empty() {
        assert!(set("").is_empty());
        assert!(set("  \n").is_empty());
    }

    #[test]
    fn test_canonical_format() {
        assert_eq!(set("7,5,0-3,8,9,10").to_string(), "0-3,5,7-10");
        assert_eq!(set("1,2").to_string(), "1-2");
        assert_eq!(set("4").to_string(), "4");
        assert_eq!(set("").to_string(), "");
    }

    #[test]
    fn test_round_trip() {
        for text in ["0", "0-9", "1,3,5", "2-3,0,0,1", "10-12,4-4,6"] {
            let parsed = set(text);
            assert_eq!(set(&parsed.to_string()), parsed, "round trip of {text:?}");
        }
    }

    #[test]
    fn test_equality_ignores_representation() {
        assert_eq!(set("1,2,4,5,6,7,8,9"), set("1-2,4-9"));
        assert_eq!(set("3,2,1"), set("1-3"));
        assert_eq!(set("1,1,1"), set("1"));
    }

    #[test]
    fn test_parse_errors_name_token() {
        let err = Cpuset::parse("0-3,x").unwrap_err();
        assert_eq!(err, CpusetParseError::InvalidId { token: "x".into() });

        let err = Cpuset::parse("5-2").unwrap_err();
        assert_eq!(err.token(), "5-2");

        let err = Cpuset::parse("-1").unwrap_err();
        assert!(matches!(err, CpusetParseError::InvalidRange { .. }));

        assert!(Cpuset::parse("1-2-3").is_err());
        assert!(Cpuset::parse("1,,2").is_err());
        assert!(Cpuset::parse("+1").is_err());
        assert!(Cpuset::parse("1 ,2").is_err());
    }

    #[test]
    fn test_set_operations() {
        let a = set("0-5");
        let b = set("4-9");
        assert_eq!(a.union(&b), set("0-9"));
        assert_eq!(a.intersection(&b), set("4-5"));
        assert_eq!(a.difference(&b), set("0-3"));
        assert_eq!(b.difference(&a), set("6-9"));
    }

    #[test]
    fn test_set_operation_laws() {
        let sets = [set(""), set("0-3"), set("2,4,6"), set("5-9"), set("1,9")];
        for a in &sets {
            assert!(a.difference(a).is_empty());
            for b in &sets {
                assert_eq!(a.union(b), b.union(a));
                assert_eq!(a.intersection(b), b.intersection(a));
                for c in &sets {
                    assert_eq!(a.union(b).union(c), a.union(&b.union(c)));
                    assert_eq!(
                        a.intersection(b).intersection(c),
                        a.intersection(&b.intersection(c))
                    );
                }
            }
        }
    }

    #[test]
    fn test_operations_do_not_mutate_inputs() {
        let a = set("0-3");
        let b = set("8");
        let _ = a.union(&b);
        let _ = a.difference(&b);
        assert_eq!(a.to_string(), "0-3");
        assert_eq!(b.to_string(), "8");
    }

    #[test]
    fn test_written_order() {
        assert_eq!(
            ids_in_written_order("8-9,0-3,9").unwrap(),
            vec![8, 9, 0, 1, 2, 3]
        );
        assert!(ids_in_written_order("").unwrap().is_empty());
    }

    #[test]
    fn test_ids_are_bounded() {
        assert_eq!(set("8190-8191").size(), 2);
        assert_eq!(set("0-8191").size(), MAX_CPU_ID + 1);

        let err = Cpuset::parse("0-4294967295").unwrap_err();
        assert_eq!(
            err,
            CpusetParseError::InvalidRange {
                token: "0-4294967295".into()
            }
        );
        let err = Cpuset::parse("1,0-5000000").unwrap_err();
        assert!(matches!(err, CpusetParseError::InvalidRange { .. }));

        let err = Cpuset::parse("8192").unwrap_err();
        assert_eq!(err, CpusetParseError::InvalidId { token: "8192".into() });
        assert!(Cpuset::parse("99999999999999999999999").is_err());
    }
}
