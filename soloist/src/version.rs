//! Comparable build versions
//!
//! Versions are dot-separated numbers with an optional leading `v` and an
//! ignored `-`/`+` suffix. Trailing zero components don't matter, so `1.2`
//! and `1.2.0` are equal.

use std::fmt;

/// Version announced by this build
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Totally ordered build version
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    // Trailing zeros stripped; empty is the lowest version
    parts: Vec<u64>,
}

impl Version {
    /// Parse a version string, returning `None` if it is malformed
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s.strip_prefix(['v', 'V']).unwrap_or(s);
        let core = s.split(['-', '+']).next().unwrap_or_default();
        if core.is_empty() {
            return None;
        }

        let mut parts = core
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                part.parse::<u64>().ok()
            })
            .collect::<Option<Vec<_>>>()?;

        while parts.last() == Some(&0) {
            parts.pop();
        }
        Some(Self { parts })
    }

    /// Parse a version string, mapping malformed input to [`Version::lowest`]
    pub fn lossy(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(Self::lowest)
    }

    /// Version that compares below every other version
    pub fn lowest() -> Self {
        Self { parts: Vec::new() }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parts.is_empty() {
            return f.write_str("0");
        }
        let joined = self
            .parts
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&joined)
    }
}
