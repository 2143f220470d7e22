use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DavError, Result};

/// The `Depth` request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Depth {
    pub fn as_header(&self) -> &'static str {
        match self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "0" => Some(Depth::Zero),
            "1" => Some(Depth::One),
            t if t.eq_ignore_ascii_case("infinity") => Some(Depth::Infinity),
            _ => None,
        }
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_header())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    #[default]
    Exclusive,
    Shared,
}

impl LockScope {
    pub fn element_name(&self) -> &'static str {
        match self {
            LockScope::Exclusive => "exclusive",
            LockScope::Shared => "shared",
        }
    }
}

/// Lock lifetime, as requested by the client or advised by the server.
///
/// Informational only: nothing expires a held lock locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockTimeout {
    Seconds(u64),
    Infinite,
}

impl LockTimeout {
    /// Parse a `Timeout` header or element value. When several
    /// comma-separated values are present the first valid one wins.
    pub fn parse(text: &str) -> Option<Self> {
        text.split(',').find_map(|part| {
            let part = part.trim();
            if part.eq_ignore_ascii_case("infinite") {
                return Some(LockTimeout::Infinite);
            }
            let (prefix, secs) = part.split_at_checked(7)?;
            if !prefix.eq_ignore_ascii_case("second-") {
                return None;
            }
            secs.parse().ok().map(LockTimeout::Seconds)
        })
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            LockTimeout::Seconds(s) => Some(Duration::from_secs(*s)),
            LockTimeout::Infinite => None,
        }
    }
}

impl fmt::Display for LockTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTimeout::Seconds(s) => write!(f, "Second-{}", s),
            LockTimeout::Infinite => f.write_str("Infinite"),
        }
    }
}

/// Parameters of a LOCK request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub scope: LockScope,
    /// Only `Zero` and `Infinity` are accepted.
    pub depth: Depth,
    /// Free text placed in the `owner` element.
    pub owner: Option<String>,
    pub timeout: Option<LockTimeout>,
}

impl Default for LockRequest {
    fn default() -> Self {
        Self {
            scope: LockScope::Exclusive,
            depth: Depth::Infinity,
            owner: None,
            timeout: None,
        }
    }
}

impl LockRequest {
    pub fn validate(&self) -> Result<()> {
        if self.depth == Depth::One {
            return Err(DavError::InvalidInput(
                "LOCK depth must be 0 or infinity, not 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_header() {
        assert_eq!(Depth::Zero.as_header(), "0");
        assert_eq!(Depth::One.as_header(), "1");
        assert_eq!(Depth::Infinity.as_header(), "infinity");
        assert_eq!(Depth::parse("Infinity"), Some(Depth::Infinity));
        assert_eq!(Depth::parse("2"), None);
    }

    #[test]
    fn test_lock_timeout_parse() {
        assert_eq!(LockTimeout::parse("Second-3600"), Some(LockTimeout::Seconds(3600)));
        assert_eq!(LockTimeout::parse("second-10"), Some(LockTimeout::Seconds(10)));
        assert_eq!(LockTimeout::parse("Infinite"), Some(LockTimeout::Infinite));
        assert_eq!(
            LockTimeout::parse("Infinite, Second-4100000000"),
            Some(LockTimeout::Infinite)
        );
        assert_eq!(
            LockTimeout::parse("Minute-5, Second-60"),
            Some(LockTimeout::Seconds(60))
        );
        assert_eq!(LockTimeout::parse("Second-"), None);
        assert_eq!(LockTimeout::parse("soon"), None);
    }

    #[test]
    fn test_lock_timeout_display() {
        assert_eq!(LockTimeout::Seconds(600).to_string(), "Second-600");
        assert_eq!(LockTimeout::Infinite.to_string(), "Infinite");
        assert_eq!(
            LockTimeout::Seconds(5).as_duration(),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_lock_request_rejects_depth_one() {
        let request = LockRequest {
            depth: Depth::One,
            ..Default::default()
        };
        let err = request.validate().unwrap_err();
        assert!(matches!(err, DavError::InvalidInput(_)));

        assert!(LockRequest::default().validate().is_ok());
        let zero = LockRequest {
            depth: Depth::Zero,
            ..Default::default()
        };
        assert!(zero.validate().is_ok());
    }
}
