//! MCP version numbers: `major.minor` integer pairs.

use std::fmt;
use std::str::FromStr;

use crate::error::McpError;

/// An MCP protocol or package version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct McpVer {
    pub major: u16,
    pub minor: u16,
}

/// The version meaning "unsupported".
pub const NULL_VER: McpVer = McpVer { major: 0, minor: 0 };

/// The one protocol version this server speaks.
pub const SERVER_MCP_VERSION: McpVer = McpVer { major: 2, minor: 1 };

impl McpVer {
    /// Builds a version.
    pub fn new(major: u16, minor: u16) -> Self {
        McpVer { major, minor }
    }

    /// Whether this is the null (unsupported) version.
    pub fn is_null(&self) -> bool {
        *self == NULL_VER
    }
}

impl fmt::Display for McpVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for McpVer {
    type Err = McpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| McpError::parse(format!("bad version {s}")))?;
        Ok(McpVer {
            major: major
                .parse()
                .map_err(|_| McpError::parse(format!("bad version {s}")))?,
            minor: minor
                .parse()
                .map_err(|_| McpError::parse(format!("bad version {s}")))?,
        })
    }
}

/// Picks the highest version in the intersection of two ranges, or the
/// null version when the ranges do not overlap.
pub fn version_select(min_a: McpVer, max_a: McpVer, min_b: McpVer, max_b: McpVer) -> McpVer {
    let low = min_a.max(min_b);
    let high = max_a.min(max_b);
    if low <= high {
        high
    } else {
        NULL_VER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        let v: McpVer = "2.1".parse().unwrap();
        assert_eq!(v, McpVer::new(2, 1));
        assert_eq!(v.to_string(), "2.1");
        assert!("21".parse::<McpVer>().is_err());
        assert!("a.b".parse::<McpVer>().is_err());
    }

    #[test]
    fn ordering_is_major_then_minor() {
        assert!(McpVer::new(1, 9) < McpVer::new(2, 0));
        assert!(McpVer::new(2, 0) < McpVer::new(2, 1));
    }

    #[test]
    fn selection_takes_the_highest_overlap() {
        let selected = version_select(
            McpVer::new(1, 0),
            McpVer::new(2, 0),
            McpVer::new(1, 5),
            McpVer::new(3, 0),
        );
        assert_eq!(selected, McpVer::new(2, 0));

        let none = version_select(
            McpVer::new(2, 0),
            McpVer::new(2, 0),
            McpVer::new(1, 0),
            McpVer::new(1, 9),
        );
        assert!(none.is_null());
    }
}
