// puc-common/src/model/version.rs
//! Module versions and version ranges.
//!
//! Module versions are written the OSGi way (`1`, `1.2`, `1.2.3`,
//! `1.2.3.qualifier`) and normalised into [`semver::Version`]. Ranges use the
//! interval notation `[1.0,2.0)`; a bare version `1.0` means "1.0 or later".
use std::fmt;
use std::str::FromStr;

use semver::{BuildMetadata, Version};
use serde::{Deserialize, Deserializer};

use crate::error::{PucError, Result};

/// Parses a version, padding missing minor/patch components with zero and
/// turning a fourth dotted segment into build metadata.
pub fn parse_version(input: &str) -> Result<Version> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(PucError::InvalidVersion(input.to_string()));
    }

    let mut parts = trimmed.splitn(4, '.');
    let mut numbers = [0u64; 3];
    for slot in numbers.iter_mut() {
        match parts.next() {
            Some(segment) => {
                *slot = segment
                    .parse::<u64>()
                    .map_err(|_| PucError::InvalidVersion(input.to_string()))?;
            }
            None => break,
        }
    }

    let mut version = Version::new(numbers[0], numbers[1], numbers[2]);
    if let Some(qualifier) = parts.next() {
        // OSGi qualifiers allow '_', semver build metadata does not.
        let normalised = qualifier.replace('_', "-");
        version.build = BuildMetadata::new(&normalised)
            .map_err(|_| PucError::InvalidVersion(input.to_string()))?;
    }
    Ok(version)
}

/// Serde helper accepting the lenient version syntax.
pub fn deserialize_lenient<'de, D>(deserializer: D) -> std::result::Result<Version, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_version(&raw).map_err(serde::de::Error::custom)
}

/// An interval over versions. `maximum == None` means unbounded above.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRange {
    minimum: Version,
    minimum_exclusive: bool,
    maximum: Option<Version>,
    maximum_exclusive: bool,
}

impl VersionRange {
    /// Builds a range; rejects `minimum > maximum` and a single point with both
    /// ends exclusive.
    pub fn new(
        minimum: Version,
        minimum_exclusive: bool,
        maximum: Option<Version>,
        maximum_exclusive: bool,
    ) -> Result<Self> {
        if let Some(max) = &maximum {
            if minimum > *max || (minimum == *max && minimum_exclusive && maximum_exclusive) {
                return Err(PucError::Parse(
                    "version range",
                    format!("minimum {minimum} is above maximum {max}"),
                ));
            }
        }
        Ok(Self {
            minimum,
            minimum_exclusive,
            maximum,
            maximum_exclusive,
        })
    }

    /// `[0.0.0, ∞)`, the range every version satisfies.
    pub fn unbounded() -> Self {
        Self {
            minimum: Version::new(0, 0, 0),
            minimum_exclusive: false,
            maximum: None,
            maximum_exclusive: false,
        }
    }

    /// `[minimum, ∞)`.
    pub fn at_least(minimum: Version) -> Self {
        Self {
            minimum,
            minimum_exclusive: false,
            maximum: None,
            maximum_exclusive: false,
        }
    }

    pub fn minimum(&self) -> &Version {
        &self.minimum
    }

    pub fn is_minimum_exclusive(&self) -> bool {
        self.minimum_exclusive
    }

    pub fn maximum(&self) -> Option<&Version> {
        self.maximum.as_ref()
    }

    pub fn is_maximum_exclusive(&self) -> bool {
        self.maximum_exclusive
    }

    pub fn is_maximum_unbounded(&self) -> bool {
        self.maximum.is_none()
    }

    pub fn includes(&self, version: &Version) -> bool {
        let above_min = if self.minimum_exclusive {
            *version > self.minimum
        } else {
            *version >= self.minimum
        };
        if !above_min {
            return false;
        }
        match &self.maximum {
            None => true,
            Some(max) if self.maximum_exclusive => version < max,
            Some(max) => version <= max,
        }
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl FromStr for VersionRange {
    type Err = PucError;

    fn from_str(input: &str) -> Result<Self> {
        let s = input.trim();
        let open = s.chars().next();
        if !matches!(open, Some('[') | Some('(')) {
            return Ok(Self::at_least(parse_version(s)?));
        }

        let close = s.chars().last();
        if !matches!(close, Some(']') | Some(')')) || s.len() < 2 {
            return Err(PucError::Parse(
                "version range",
                format!("'{input}' is missing a closing bracket"),
            ));
        }
        let body = &s[1..s.len() - 1];
        let (low, high) = body.split_once(',').ok_or_else(|| {
            PucError::Parse("version range", format!("'{input}' needs two bounds"))
        })?;

        Self::new(
            parse_version(low)?,
            open == Some('('),
            Some(parse_version(high)?),
            close == Some(')'),
        )
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.maximum {
            None => write!(f, "{}", self.minimum),
            Some(max) => write!(
                f,
                "{}{},{}{}",
                if self.minimum_exclusive { '(' } else { '[' },
                self.minimum,
                max,
                if self.maximum_exclusive { ')' } else { ']' }
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        parse_version(s).unwrap()
    }

    #[test]
    fn test_parse_version_pads_components() {
        assert_eq!(v("1"), Version::new(1, 0, 0));
        assert_eq!(v("1.5"), Version::new(1, 5, 0));
        assert_eq!(v(" 2.0.3 "), Version::new(2, 0, 3));
    }

    #[test]
    fn test_parse_version_qualifier_sorts_after_release() {
        let qualified = v("1.0.0.Final_1");
        assert_eq!(qualified.build.as_str(), "Final-1");
        assert!(qualified > v("1.0.0"));
    }

    #[test]
    fn test_parse_version_rejects_garbage() {
        assert!(parse_version("").is_err());
        assert!(parse_version("one.two").is_err());
        assert!(parse_version("1.x").is_err());
    }

    #[test]
    fn test_range_parse_and_display() {
        let range: VersionRange = "[1.0,2.0)".parse().unwrap();
        assert_eq!(range.to_string(), "[1.0.0,2.0.0)");
        assert!(range.includes(&v("1.0")));
        assert!(range.includes(&v("1.9.9")));
        assert!(!range.includes(&v("2.0")));

        let open: VersionRange = "(1.0,2.0]".parse().unwrap();
        assert!(!open.includes(&v("1.0")));
        assert!(open.includes(&v("2.0")));
    }

    #[test]
    fn test_bare_version_is_lower_bound() {
        let range: VersionRange = "1.5".parse().unwrap();
        assert!(range.is_maximum_unbounded());
        assert!(range.includes(&v("99.0")));
        assert!(!range.includes(&v("1.4")));
        assert_eq!(range.to_string(), "1.5.0");
    }

    #[test]
    fn test_range_rejects_inverted_bounds() {
        assert!("[2.0,1.0]".parse::<VersionRange>().is_err());
        assert!("(1.0,1.0)".parse::<VersionRange>().is_err());
        assert!("[1.0,1.0)".parse::<VersionRange>().is_ok());
        assert!("[1.0,2.0".parse::<VersionRange>().is_err());
        assert!("[1.0]".parse::<VersionRange>().is_err());
    }
}
