//! Protocol and software versions.
//!
//! Versions compare by `(major, minor, patch)` with a missing patch counting
//! as zero. Numbers (`6.4`) and strings (`"6.4.1"`) are converted to a
//! [`Version`] first, so mixed comparisons order the same way whichever side
//! the richer type is on.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, ProtocolError, Result};

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.(\d+)(?:\.(\d+))?$").expect("version pattern is valid")
});

/// Oldest release the library is known to work with.
pub const MIN_SUPPORTED: Version = Version::release(5, 0);

/// Newest release the library was tested against.
pub const MAX_SUPPORTED: Version = Version::release(7, 0);

#[derive(Debug, Clone, Copy)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: Option<u32>,
}

impl Version {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch: Some(patch),
        }
    }

    /// A `major.minor` version without a patch component.
    #[must_use]
    pub const fn release(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            patch: None,
        }
    }

    /// Parse `major.minor` or `major.minor.patch`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::BadVersion` if the text is not a dotted version.
    pub fn parse(text: &str) -> std::result::Result<Self, ProtocolError> {
        let trimmed = text.trim();
        let bad = || ProtocolError::BadVersion(text.to_string());

        let caps = VERSION_RE.captures(trimmed).ok_or_else(bad)?;
        let field = |i: usize| -> std::result::Result<Option<u32>, ProtocolError> {
            caps.get(i)
                .map(|m| m.as_str().parse::<u32>().map_err(|_| bad()))
                .transpose()
        };

        Ok(Self {
            major: field(1)?.ok_or_else(bad)?,
            minor: field(2)?.ok_or_else(bad)?,
            patch: field(3)?,
        })
    }

    /// Long-term-support releases are the `.0` minor releases.
    #[must_use]
    pub fn is_lts(&self) -> bool {
        self.minor == 0
    }

    /// The release line as a number, e.g. `6.4` for `6.4.12`.
    #[must_use]
    pub fn major_minor(&self) -> f64 {
        format!("{}.{}", self.major, self.minor)
            .parse()
            .unwrap_or(f64::from(self.major))
    }

    /// This version with the patch component dropped.
    #[must_use]
    pub fn to_release(&self) -> Self {
        Self::release(self.major, self.minor)
    }

    fn key(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.patch.unwrap_or(0))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{patch}", self.major, self.minor),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

impl FromStr for Version {
    type Err = ProtocolError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Explicit conversion of loosely-typed comparands into a [`Version`].
pub trait IntoVersion {
    /// # Errors
    ///
    /// Returns `ProtocolError::BadVersion` if the value is not a version.
    fn into_version(self) -> std::result::Result<Version, ProtocolError>;
}

impl IntoVersion for Version {
    fn into_version(self) -> std::result::Result<Version, ProtocolError> {
        Ok(self)
    }
}

impl IntoVersion for &Version {
    fn into_version(self) -> std::result::Result<Version, ProtocolError> {
        Ok(*self)
    }
}

/// Numbers carry `major.minor` only. `5.10` and `5.1` are the same float and
/// therefore the same version; use a string for such releases.
///
/// The comparisons against `f64` built on this still weigh the patch of the
/// other side, so `7.0.5 > 7.0`. Compare `v.to_release()` to match on the
/// release line alone.
impl IntoVersion for f64 {
    fn into_version(self) -> std::result::Result<Version, ProtocolError> {
        if !self.is_finite() || self.is_sign_negative() {
            return Err(ProtocolError::BadVersion(self.to_string()));
        }
        let text = self.to_string();
        if text.contains('.') {
            Version::parse(&text)
        } else {
            Version::parse(&format!("{text}.0"))
        }
    }
}

impl IntoVersion for &str {
    fn into_version(self) -> std::result::Result<Version, ProtocolError> {
        Version::parse(self)
    }
}

impl IntoVersion for &String {
    fn into_version(self) -> std::result::Result<Version, ProtocolError> {
        Version::parse(self)
    }
}

impl IntoVersion for String {
    fn into_version(self) -> std::result::Result<Version, ProtocolError> {
        Version::parse(&self)
    }
}

/// Compare two loosely-typed versions.
///
/// # Errors
///
/// Returns `ProtocolError::BadVersion` if either side is not a version.
pub fn compare(
    a: impl IntoVersion,
    b: impl IntoVersion,
) -> std::result::Result<Ordering, ProtocolError> {
    Ok(a.into_version()?.cmp(&b.into_version()?))
}

macro_rules! loose_comparisons {
    ($($ty:ty),*) => {$(
        impl PartialEq<$ty> for Version {
            fn eq(&self, other: &$ty) -> bool {
                other.clone().into_version().is_ok_and(|v| *self == v)
            }
        }

        impl PartialEq<Version> for $ty {
            fn eq(&self, other: &Version) -> bool {
                other == self
            }
        }

        impl PartialOrd<$ty> for Version {
            fn partial_cmp(&self, other: &$ty) -> Option<Ordering> {
                other.clone().into_version().ok().map(|v| self.cmp(&v))
            }
        }

        impl PartialOrd<Version> for $ty {
            fn partial_cmp(&self, other: &Version) -> Option<Ordering> {
                PartialOrd::<$ty>::partial_cmp(other, self).map(Ordering::reverse)
            }
        }
    )*};
}

loose_comparisons!(f64, &str, String);

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error as _;

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(f64),
        }

        let version = match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.into_version(),
            Raw::Number(n) => n.into_version(),
        };
        version.map_err(D::Error::custom)
    }
}

/// Check a peer version against the supported window.
///
/// With `skip` set an out-of-window version is only logged.
///
/// # Errors
///
/// Returns `Error::Config` if the version is outside the window and `skip` is false.
pub fn check_supported(version: &Version, skip: bool) -> Result<()> {
    let release = version.to_release();
    let skip_hint = "Set skip_version_check to use it anyway.";

    if release < MIN_SUPPORTED {
        if !skip {
            return Err(Error::config(format!(
                "version {version} is not supported; the oldest supported version is {MIN_SUPPORTED}. {skip_hint}"
            )));
        }
        tracing::debug!(
            "Version {} is older than the library supports, continuing at your own risk",
            version
        );
    }

    if release > MAX_SUPPORTED {
        if !skip {
            return Err(Error::config(format!(
                "version {version} was not tested with the library; the latest tested version is {MAX_SUPPORTED}. {skip_hint}"
            )));
        }
        tracing::debug!(
            "Version {} is newer than the library was tested on, continuing at your own risk",
            version
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_full_and_short() {
        let full = v("6.4.12");
        assert_eq!((full.major, full.minor, full.patch), (6, 4, Some(12)));

        let short = v("7.0");
        assert_eq!((short.major, short.minor, short.patch), (7, 0, None));

        assert_eq!(v(" 5.0.1 \n").patch, Some(1));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "7", "7.", "7.0.", "v7.0.0", "7.0.0.1", "7.a", "-1.0", "7.0.0rc1"] {
            let result = Version::parse(bad);
            assert!(
                matches!(result, Err(ProtocolError::BadVersion(_))),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn test_equality_against_numbers() {
        assert!(v("7.0.0") == 7.0_f64);
        assert!(7.0_f64 == v("7.0.0"));
        assert!(v("6.4") == 6.4_f64);
        assert!(v("6.4.1") != 6.4_f64);
    }

    #[test]
    fn test_ordering_across_types() {
        assert!(v("7.0.0") > v("6.0"));
        assert!(v("7.0.0") > 6.0_f64);
        assert!(6.0_f64 < v("7.0.0"));
        assert!(v("5.4.3") < "6.0");
        assert!("6.0" > v("5.4.3"));
        assert!(v("6.0.1") > "6.0");
        assert!(v("6.0.0") >= 6.0_f64);
        assert!(v("6.0.0") <= "6.0.0".to_string());
    }

    #[test]
    fn test_inequality_against_strings() {
        assert!(v("7.0") != "7.0.1");
        assert!("7.0.1" != v("7.0"));
        assert!(v("7.0") == "7.0.0");
    }

    #[test]
    fn test_unparseable_comparand_is_unordered() {
        let version = v("6.0.0");
        assert!(version != "latest");
        assert_eq!(version.partial_cmp(&"latest"), None);
        assert_eq!(version.partial_cmp(&f64::NAN), None);
    }

    #[test]
    fn test_compare_function() {
        assert_eq!(compare("6.0", 6.0_f64).unwrap(), Ordering::Equal);
        assert_eq!(compare(v("6.0.2"), "6.0").unwrap(), Ordering::Greater);
        assert_eq!(compare(5.4_f64, "6.0.0").unwrap(), Ordering::Less);
        assert!(matches!(
            compare("six", 6.0_f64),
            Err(ProtocolError::BadVersion(_))
        ));
    }

    #[test]
    fn test_is_lts() {
        assert!(v("7.0.0").is_lts());
        assert!(v("6.0.25").is_lts());
        assert!(!v("6.4.0").is_lts());
        assert!(!v("5.2").is_lts());
    }

    #[test]
    fn test_float_comparand_weighs_patch() {
        let v = Version::parse("7.0.5").unwrap();
        assert!(v > 7.0_f64);
        assert!(v != 7.0_f64);
        assert!(v.to_release() == 7.0_f64);
    }

    #[test]
    fn test_major_minor() {
        assert_eq!(v("6.4.12").major_minor(), 6.4);
        assert_eq!(v("7.0").major_minor(), 7.0);
    }

    #[test]
    fn test_display_keeps_patch_presence() {
        assert_eq!(v("6.4.12").to_string(), "6.4.12");
        assert_eq!(v("6.4").to_string(), "6.4");
    }

    #[test]
    fn test_integral_float_converts() {
        assert_eq!(7.0_f64.into_version().unwrap(), Version::release(7, 0));
        assert!(matches!(
            f64::INFINITY.into_version(),
            Err(ProtocolError::BadVersion(_))
        ));
    }

    #[test]
    fn test_serde_string_and_number() {
        let from_str: Version = serde_json::from_str("\"6.4.3\"").unwrap();
        assert_eq!(from_str, Version::new(6, 4, 3));

        let from_num: Version = serde_json::from_str("6.4").unwrap();
        assert_eq!(from_num, Version::release(6, 4));

        assert_eq!(serde_json::to_string(&from_str).unwrap(), "\"6.4.3\"");
        assert!(serde_json::from_str::<Version>("\"abc\"").is_err());
    }

    #[test]
    fn test_check_supported_window() {
        assert!(check_supported(&v("6.0.0"), false).is_ok());
        assert!(check_supported(&v("7.0.5"), false).is_ok());
        assert!(matches!(
            check_supported(&v("4.0.0"), false),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            check_supported(&v("7.2.0"), false),
            Err(Error::Config(_))
        ));
        assert!(check_supported(&v("4.0.0"), true).is_ok());
        assert!(check_supported(&v("7.2.0"), true).is_ok());
    }
}
