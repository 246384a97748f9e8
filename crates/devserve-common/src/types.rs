//! Core identifier types shared across the devserve crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a server definition, unique within one scope (a repository
/// session or one repository inside a workspace).
///
/// # Example
/// ```
/// use devserve_common::ServerName;
///
/// let name = ServerName::from("database");
/// assert_eq!(name.as_str(), "database");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerName(String);

impl ServerName {
    /// Creates a new ServerName from a string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the server name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ServerName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServerName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ServerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_name_conversions() {
        let a = ServerName::from("api");
        let b = ServerName::new(String::from("api"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "api");
    }
}
