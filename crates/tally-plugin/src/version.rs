// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic-version constraints and "latest compatible" selection.
//!
//! Accepted syntax:
//!
//! | Form              | Meaning                              |
//! |-------------------|--------------------------------------|
//! | `1.2.3`, `=1.2.3` | exactly that version                 |
//! | `^1.2`            | `>=1.2.0` within the same major      |
//! | `~1.2.3`          | `>=1.2.3` within the same major.minor |
//! | `>=1.0, <2.0`     | explicit range (comma or space separated) |
//! | `*`               | any release                          |
//!
//! Pre-release versions only ever satisfy an exact constraint.

use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version constraint `{input}`: {reason}")]
pub struct ConstraintError {
    pub input: String,
    pub reason: String,
}

/// One bound of a range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

/// A parsed version constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionConstraint {
    Exact(Version),
    Caret(Version),
    Tilde(Version),
    Range {
        min: Option<Bound>,
        max: Option<Bound>,
    },
}

impl VersionConstraint {
    /// Constraint matching every release version.
    pub fn any() -> Self {
        VersionConstraint::Range {
            min: None,
            max: None,
        }
    }

    pub fn parse(input: &str) -> Result<Self, ConstraintError> {
        let err = |reason: &str| ConstraintError {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        let s = input.trim();

        if s.is_empty() || s == "*" {
            return Ok(Self::any());
        }
        if let Some(rest) = s.strip_prefix('^') {
            return parse_partial(rest).map(VersionConstraint::Caret).map_err(|r| err(&r));
        }
        if let Some(rest) = s.strip_prefix('~') {
            return parse_partial(rest).map(VersionConstraint::Tilde).map_err(|r| err(&r));
        }
        if let Some(rest) = s.strip_prefix('=') {
            if !rest.starts_with(['<', '>']) {
                return Version::parse(rest.trim())
                    .map(VersionConstraint::Exact)
                    .map_err(|e| err(&e.to_string()));
            }
        }
        if !s.starts_with(['<', '>', '=']) {
            return Version::parse(s)
                .map(VersionConstraint::Exact)
                .map_err(|e| err(&e.to_string()));
        }

        let mut min: Option<Bound> = None;
        let mut max: Option<Bound> = None;
        for token in comparator_tokens(s) {
            let (op, rest) = split_operator(&token).ok_or_else(|| err("expected a comparator"))?;
            let version = parse_partial(rest).map_err(|r| err(&r))?;
            match op {
                ">=" | ">" => {
                    if min.is_some() {
                        return Err(err("more than one lower bound"));
                    }
                    min = Some(Bound {
                        version,
                        inclusive: op == ">=",
                    });
                }
                "<=" | "<" => {
                    if max.is_some() {
                        return Err(err("more than one upper bound"));
                    }
                    max = Some(Bound {
                        version,
                        inclusive: op == "<=",
                    });
                }
                _ => return Err(err("unsupported comparator")),
            }
        }

        if let (Some(lo), Some(hi)) = (&min, &max) {
            let empty = lo.version > hi.version
                || (lo.version == hi.version && !(lo.inclusive && hi.inclusive));
            if empty {
                return Err(err("lower bound is above upper bound"));
            }
        }
        Ok(VersionConstraint::Range { min, max })
    }

    pub fn matches(&self, v: &Version) -> bool {
        if let VersionConstraint::Exact(want) = self {
            return v == want;
        }
        if !v.pre.is_empty() {
            return false;
        }
        match self {
            VersionConstraint::Exact(_) => false,
            VersionConstraint::Caret(base) => v.major == base.major && v >= base,
            VersionConstraint::Tilde(base) => {
                v.major == base.major && v.minor == base.minor && v >= base
            }
            VersionConstraint::Range { min, max } => {
                let above = min.as_ref().is_none_or(|b| {
                    if b.inclusive {
                        v >= &b.version
                    } else {
                        v > &b.version
                    }
                });
                let below = max.as_ref().is_none_or(|b| {
                    if b.inclusive {
                        v <= &b.version
                    } else {
                        v < &b.version
                    }
                });
                above && below
            }
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Exact(v) => write!(f, "={v}"),
            VersionConstraint::Caret(v) => write!(f, "^{v}"),
            VersionConstraint::Tilde(v) => write!(f, "~{v}"),
            VersionConstraint::Range { min: None, max: None } => write!(f, "*"),
            VersionConstraint::Range { min, max } => {
                let mut parts = Vec::new();
                if let Some(b) = min {
                    parts.push(format!("{}{}", if b.inclusive { ">=" } else { ">" }, b.version));
                }
                if let Some(b) = max {
                    parts.push(format!("{}{}", if b.inclusive { "<=" } else { "<" }, b.version));
                }
                write!(f, "{}", parts.join(", "))
            }
        }
    }
}

impl std::str::FromStr for VersionConstraint {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Split `>=1.0, <2.0` or `>=1.0 <2.0` into comparator tokens, joining an
/// operator separated from its version by whitespace.
fn comparator_tokens(s: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for piece in s.split([',', ' ']).filter(|p| !p.is_empty()) {
        match tokens.last_mut() {
            Some(last) if matches!(last.as_str(), ">" | ">=" | "<" | "<=") => last.push_str(piece),
            _ => tokens.push(piece.to_string()),
        }
    }
    tokens
}

fn split_operator(token: &str) -> Option<(&str, &str)> {
    [">=", "<=", ">", "<"]
        .into_iter()
        .find_map(|op| token.strip_prefix(op).map(|rest| (op, rest)))
}

/// Parse `1`, `1.2` or `1.2.3`, padding missing components with zero.
fn parse_partial(s: &str) -> Result<Version, String> {
    let s = s.trim();
    let dots = s.split(['-', '+']).next().unwrap_or(s).matches('.').count();
    let padded = match dots {
        0 => format!("{s}.0.0"),
        1 => format!("{s}.0"),
        _ => s.to_string(),
    };
    Version::parse(&padded).map_err(|e| e.to_string())
}

/// Highest version satisfying `constraint`.
pub fn resolve_version<'a, I>(constraint: &VersionConstraint, available: I) -> Option<&'a Version>
where
    I: IntoIterator<Item = &'a Version>,
{
    available.into_iter().filter(|v| constraint.matches(v)).max()
}

/// Size of the step between two versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Patch,
    Minor,
    Major,
    /// Target is not newer than the current version.
    NotNewer,
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UpdateKind::Patch => "patch",
            UpdateKind::Minor => "minor",
            UpdateKind::Major => "major",
            UpdateKind::NotNewer => "not_newer",
        })
    }
}

/// Classify the semantic-version delta of `from -> to`.
pub fn classify_update(from: &Version, to: &Version) -> UpdateKind {
    if to <= from {
        UpdateKind::NotNewer
    } else if to.major != from.major {
        UpdateKind::Major
    } else if to.minor != from.minor {
        UpdateKind::Minor
    } else {
        UpdateKind::Patch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn resolver_picks_highest_match() {
        let available = [v("1.2.0"), v("1.3.0"), v("1.2.5")];
        let c = VersionConstraint::parse("^1.2.0").unwrap();
        assert_eq!(resolve_version(&c, &available), Some(&v("1.3.0")));

        let c = VersionConstraint::parse("~1.2.0").unwrap();
        assert_eq!(resolve_version(&c, &available), Some(&v("1.2.5")));

        let c = VersionConstraint::parse("1.2.0").unwrap();
        assert_eq!(resolve_version(&c, &available), Some(&v("1.2.0")));

        let c = VersionConstraint::parse(">=1.2.1, <1.3").unwrap();
        assert_eq!(resolve_version(&c, &available), Some(&v("1.2.5")));

        let c = VersionConstraint::parse("^2").unwrap();
        assert_eq!(resolve_version(&c, &available), None);
    }

    #[test]
    fn caret_stays_within_major() {
        let c = VersionConstraint::parse("^1.2.0").unwrap();
        assert!(c.matches(&v("1.9.9")));
        assert!(!c.matches(&v("2.0.0")));
        assert!(!c.matches(&v("1.1.9")));

        let zero = VersionConstraint::parse("^0.2").unwrap();
        assert!(zero.matches(&v("0.3.0")));
        assert!(!zero.matches(&v("1.0.0")));
    }

    #[test]
    fn prereleases_need_exact() {
        let pre = v("1.3.0-beta.1");
        assert!(!VersionConstraint::parse("^1.0.0").unwrap().matches(&pre));
        assert!(!VersionConstraint::any().matches(&pre));
        assert!(VersionConstraint::parse("=1.3.0-beta.1").unwrap().matches(&pre));
    }

    #[test]
    fn range_forms() {
        let c = VersionConstraint::parse(">= 1.0.0 < 2.0.0").unwrap();
        assert!(c.matches(&v("1.5.0")));
        assert!(!c.matches(&v("2.0.0")));
        let c = VersionConstraint::parse(">1.0.0").unwrap();
        assert!(!c.matches(&v("1.0.0")));
        assert!(c.matches(&v("7.0.0")));
        assert_eq!(c.to_string(), ">1.0.0");
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["^^1", "~x", ">=2.0.0, <1.0.0", ">=1, >=2", "one", "=>1.0.0"] {
            assert!(VersionConstraint::parse(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn update_classification() {
        assert_eq!(classify_update(&v("1.0.0"), &v("1.0.1")), UpdateKind::Patch);
        assert_eq!(classify_update(&v("1.0.0"), &v("1.1.0")), UpdateKind::Minor);
        assert_eq!(classify_update(&v("1.4.2"), &v("2.0.0")), UpdateKind::Major);
        assert_eq!(classify_update(&v("1.4.2"), &v("1.4.2")), UpdateKind::NotNewer);
        assert_eq!(classify_update(&v("1.4.2"), &v("1.3.0")), UpdateKind::NotNewer);
    }

    proptest! {
        #[test]
        fn resolved_version_is_maximal(
            versions in proptest::collection::vec((0u64..4, 0u64..6, 0u64..6), 1..20),
            base in (0u64..4, 0u64..6, 0u64..6),
        ) {
            let available: Vec<Version> = versions
                .iter()
                .map(|(a, b, c)| Version::new(*a, *b, *c))
                .collect();
            let c = VersionConstraint::Caret(Version::new(base.0, base.1, base.2));
            match resolve_version(&c, &available) {
                Some(chosen) => {
                    prop_assert!(c.matches(chosen));
                    for other in available.iter().filter(|o| c.matches(o)) {
                        prop_assert!(other <= chosen);
                    }
                }
                None => prop_assert!(available.iter().all(|o| !c.matches(o))),
            }
        }
    }
}
