use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Normalized ICAO airport code (trimmed, upper-cased).
///
/// Every entry point that accepts an airport converts through this type,
/// so `" egll"` and `"EGLL"` address the same registry bucket and session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct AirportCode(Arc<str>);

impl AirportCode {
    pub fn new(raw: &str) -> Self {
        Self(Arc::from(raw.trim().to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AirportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AirportCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AirportCode {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<&String> for AirportCode {
    fn from(raw: &String) -> Self {
        Self::new(raw)
    }
}

impl From<String> for AirportCode {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<&AirportCode> for AirportCode {
    fn from(code: &AirportCode) -> Self {
        code.clone()
    }
}

impl From<AirportCode> for String {
    fn from(code: AirportCode) -> Self {
        code.0.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(AirportCode::new("  egll\t"), AirportCode::new("EGLL"));
        assert_eq!(AirportCode::from("kjfk").as_str(), "KJFK");
    }

    #[test]
    fn blank_is_empty() {
        assert!(AirportCode::new("   ").is_empty());
        assert!(!AirportCode::new("YSSY").is_empty());
    }
}
