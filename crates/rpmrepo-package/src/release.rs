use std::{fmt, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::Serialize;

use crate::error::ReleaseError;

static DIST_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z]+)([0-9]+)$").expect("valid regex"));

static DIST_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z]+)/?([0-9]+)/?$").expect("valid regex"));

/// Distribution a package belongs to, e.g. `el8`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Distribution {
    letters: String,
    digits: String,
}

impl Distribution {
    pub fn letters(&self) -> &str {
        &self.letters
    }

    pub fn digits(&self) -> &str {
        &self.digits
    }

    /// Store path segment, `{letters}/{digits}`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.letters, self.digits)
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.letters, self.digits)
    }
}

/// Accepts both the compact (`el8`) and the path form (`el/8`).
impl FromStr for Distribution {
    type Err = ReleaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DIST_PATH
            .captures(s)
            .map(|caps| {
                Distribution {
                    letters: caps[1].to_string(),
                    digits: caps[2].to_string(),
                }
            })
            .ok_or_else(|| ReleaseError::UnparseableRelease(s.to_string()))
    }
}

/// Extracts the distribution from a release string.
///
/// The release is split on dots and the first field consisting of lowercase
/// letters immediately followed by digits wins: `1.el8.2` yields `el8`.
///
/// # Errors
///
/// [`ReleaseError::UnparseableRelease`] when no field matches.
pub fn parse_release(release: &str) -> Result<Distribution, ReleaseError> {
    release
        .split('.')
        .find_map(|field| DIST_FIELD.captures(field))
        .map(|caps| {
            Distribution {
                letters: caps[1].to_string(),
                digits: caps[2].to_string(),
            }
        })
        .ok_or_else(|| ReleaseError::UnparseableRelease(release.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(release: &str) -> (String, String) {
        let dist = parse_release(release).unwrap();
        (dist.letters().to_string(), dist.digits().to_string())
    }

    #[test]
    fn test_parse_release_common_tags() {
        assert_eq!(parsed("1.el8"), ("el".into(), "8".into()));
        assert_eq!(parsed("1.el8.2"), ("el".into(), "8".into()));
        assert_eq!(parsed("3.fc39"), ("fc".into(), "39".into()));
        assert_eq!(parsed("0.1.amzn2"), ("amzn".into(), "2".into()));
        assert_eq!(parsed("12.mga9.1"), ("mga".into(), "9".into()));
    }

    #[test]
    fn test_parse_release_first_match_wins() {
        assert_eq!(parsed("1.el7.el8"), ("el".into(), "7".into()));
        assert_eq!(parsed("el9.1"), ("el".into(), "9".into()));
    }

    #[test]
    fn test_parse_release_failures() {
        for release in [
            "1",
            "1.noreleaseinfo",
            "",
            "1.el",
            "1.8el",
            "1.EL8",
            "1.el8_4",
            "1.e-l8",
            "1..",
        ] {
            assert_eq!(
                parse_release(release),
                Err(ReleaseError::UnparseableRelease(release.to_string())),
                "{release} should not parse"
            );
        }
    }

    #[test]
    fn test_distribution_display_and_path() {
        let dist = parse_release("1.el8").unwrap();
        assert_eq!(dist.to_string(), "el8");
        assert_eq!(dist.path(), "el/8");
    }

    #[test]
    fn test_distribution_from_str() {
        assert_eq!("el8".parse::<Distribution>().unwrap().path(), "el/8");
        assert_eq!("el/8".parse::<Distribution>().unwrap().path(), "el/8");
        assert_eq!("el/8/".parse::<Distribution>().unwrap().path(), "el/8");
        assert!("8el".parse::<Distribution>().is_err());
        assert!("el/8/x".parse::<Distribution>().is_err());
    }
}
