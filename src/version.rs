use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A framework version: `MAJOR.MINOR[.PATCH][-devN]`.
///
/// A missing patch component normalizes to 0, so `1.3` equals `1.3.0`.
/// A release compares greater than any dev pre-release of the same triple:
/// `1.3-dev1 < 1.3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Dev pre-release number, absent for releases.
    pub dev: Option<u32>,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32, dev: Option<u32>) -> Self {
        Self {
            major,
            minor,
            patch,
            dev,
        }
    }
}

impl FromStr for Version {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || CoreError::VersionFormat(format!("invalid version string {s:?}"));

        let (base, dev) = match s.split_once('-') {
            Some((base, suffix)) => {
                let num = suffix.strip_prefix("dev").ok_or_else(bad)?;
                if num.is_empty() {
                    return Err(bad());
                }
                (base, Some(num.parse::<u32>().map_err(|_| bad())?))
            }
            None => (s, None),
        };

        let mut parts = base.split('.');
        let major = parse_segment(parts.next(), s)?;
        let minor = parse_segment(parts.next(), s)?;
        let patch = match parts.next() {
            Some(p) => parse_segment(Some(p), s)?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(bad());
        }

        Ok(Version {
            major,
            minor,
            patch,
            dev,
        })
    }
}

fn parse_segment(seg: Option<&str>, whole: &str) -> Result<u32, CoreError> {
    seg.filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| CoreError::VersionFormat(format!("invalid version string {whole:?}")))
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(n) = self.dev {
            write!(f, "-dev{n}")?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (self.dev, other.dev) {
                (None, None) => Ordering::Equal,
                // A release is newer than any dev pre-release of the same triple.
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(&b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A parsed version-compatibility expression.
///
/// Exactly one of:
/// - a bare version → exact match,
/// - `<=V` → candidate must be at most `V`,
/// - `LO..HI` → inclusive range at both ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionValidator {
    condition: Condition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition {
    Exact(Version),
    AtMost(Version),
    Range(Version, Version),
}

impl VersionValidator {
    /// Parse a compatibility expression.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::VersionFormat`] for malformed expressions:
    /// empty range bounds, more than one `..` separator, any relational
    /// operator other than a leading `<=`, or an operator with no operand.
    pub fn new(expr: &str) -> Result<Self, CoreError> {
        let condition = if let Some(bound) = expr.strip_prefix("<=") {
            Condition::AtMost(bound.parse()?)
        } else if expr.contains("..") {
            let parts: Vec<&str> = expr.split("..").collect();
            if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
                return Err(CoreError::VersionFormat(format!(
                    "invalid version range {expr:?}"
                )));
            }
            Condition::Range(parts[0].parse()?, parts[1].parse()?)
        } else {
            Condition::Exact(expr.parse()?)
        };

        Ok(Self { condition })
    }

    /// Whether the candidate version satisfies this expression.
    pub fn validate(&self, candidate: &Version) -> bool {
        match &self.condition {
            Condition::Exact(v) => candidate == v,
            Condition::AtMost(v) => candidate <= v,
            Condition::Range(lo, hi) => lo <= candidate && candidate <= hi,
        }
    }

    /// Parse and validate a candidate version string.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::VersionFormat`] if the candidate is malformed.
    pub fn validate_str(&self, candidate: &str) -> Result<bool, CoreError> {
        Ok(self.validate(&candidate.parse()?))
    }
}
