// puc-core/src/intersect.rs
use puc_common::error::{PucError, Result};
use puc_common::model::VersionRange;
use semver::Version;

/// A lower bound: the version and whether it is excluded.
type Lower = (Version, bool);
/// An upper bound; `None` is unbounded.
type Upper = Option<(Version, bool)>;

/// Narrows `ranges` to their common overlap. An empty slice is the unbounded
/// range; an empty overlap is `IncompatibleRanges`.
pub fn intersect(ranges: &[VersionRange]) -> Result<VersionRange> {
    let unbounded = VersionRange::unbounded();
    let mut lower: Lower = (unbounded.minimum().clone(), unbounded.is_minimum_exclusive());
    let mut upper: Upper = None;

    for range in ranges {
        lower = tighter_lower(lower, (range.minimum().clone(), range.is_minimum_exclusive()));
        let other = range
            .maximum()
            .map(|max| (max.clone(), range.is_maximum_exclusive()));
        upper = tighter_upper(upper, other);
    }

    let (minimum, minimum_exclusive) = lower;
    if let Some((maximum, maximum_exclusive)) = &upper {
        let empty = minimum > *maximum
            || (minimum == *maximum && (minimum_exclusive || *maximum_exclusive));
        if empty {
            return Err(PucError::IncompatibleRanges(describe(ranges)));
        }
    }

    let (maximum, maximum_exclusive) = match upper {
        Some((max, exclusive)) => (Some(max), exclusive),
        None => (None, false),
    };
    VersionRange::new(minimum, minimum_exclusive, maximum, maximum_exclusive)
        .map_err(|_| PucError::IncompatibleRanges(describe(ranges)))
}

fn tighter_lower(a: Lower, b: Lower) -> Lower {
    match a.0.cmp(&b.0) {
        std::cmp::Ordering::Greater => a,
        std::cmp::Ordering::Less => b,
        std::cmp::Ordering::Equal => (a.0, a.1 || b.1),
    }
}

fn tighter_upper(a: Upper, b: Upper) -> Upper {
    match (a, b) {
        (None, other) | (other, None) => other,
        (Some(a), Some(b)) => Some(match a.0.cmp(&b.0) {
            std::cmp::Ordering::Less => a,
            std::cmp::Ordering::Greater => b,
            std::cmp::Ordering::Equal => (a.0, a.1 || b.1),
        }),
    }
}

fn describe(ranges: &[VersionRange]) -> String {
    ranges
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ∩ ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(s: &str) -> VersionRange {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_input_is_unbounded() {
        assert_eq!(intersect(&[]).unwrap(), VersionRange::unbounded());
    }

    #[test]
    fn test_overlapping_ranges() {
        let narrowed = intersect(&[r("[1.0,2.0)"), r("[1.5,3.0)")]).unwrap();
        assert_eq!(narrowed, r("[1.5,2.0)"));
        assert_eq!(intersect(&[r("[1.0,2.0)"), r("1.2")]).unwrap(), r("[1.2,2.0)"));
    }

    #[test]
    fn test_tied_bounds_keep_exclusivity() {
        // a tie must stay exclusive whichever side carried the exclusion
        assert_eq!(intersect(&[r("[1.0,2.0]"), r("(1.0,2.0)")]).unwrap(), r("(1.0,2.0)"));
        assert_eq!(intersect(&[r("(1.0,2.0)"), r("[1.0,2.0]")]).unwrap(), r("(1.0,2.0)"));
    }

    #[test]
    fn test_disjoint_ranges_fail() {
        let err = intersect(&[r("[1.0,2.0)"), r("[2.0,3.0)")]).unwrap_err();
        assert!(matches!(err, PucError::IncompatibleRanges(_)));
        assert!(intersect(&[r("[1.0,1.5]"), r("[1.6,2.0]")]).is_err());
    }

    #[test]
    fn test_single_point() {
        assert_eq!(intersect(&[r("[1.0,2.0]"), r("[2.0,3.0]")]).unwrap(), r("[2.0,2.0]"));
        assert!(intersect(&[r("[1.0,2.0)"), r("[1.0,1.0]")]).is_ok());
        assert!(intersect(&[r("[1.0,1.0]"), r("(1.0,2.0]")]).is_err());
    }
}
