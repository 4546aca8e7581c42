//! Human-readable name resolution for router addresses.
//!
//! A `#`-prefixed address passes through untouched; `.rdv` names come from
//! the well-known table. Everything else is unknown — the router never
//! guesses.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("empty address")]
    Empty,
    #[error("unknown address")]
    Unknown,
}

pub struct NameResolver {
    names: HashMap<String, String>,
}

impl NameResolver {
    pub fn new() -> Self {
        let mut names = HashMap::new();
        names.insert(
            "relay01.rdv".to_string(),
            "#kqfc2fwogggtlsf7vnh46hhgdjmheiqvqycapj2f2xe2d5jz".to_string(),
        );
        Self { names }
    }

    pub fn with_names(names: HashMap<String, String>) -> Self {
        Self { names }
    }

    /// `resolve(humanName) → #addr`.
    pub fn resolve(&self, name: &str) -> Result<String, ResolveError> {
        if name.is_empty() {
            return Err(ResolveError::Empty);
        }
        if name.starts_with('#') {
            return Ok(name.to_string());
        }
        self.names.get(name).cloned().ok_or(ResolveError::Unknown)
    }
}

impl Default for NameResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_address_passes_through() {
        let r = NameResolver::new();
        assert_eq!(r.resolve("#abc").unwrap(), "#abc");
    }

    #[test]
    fn test_known_name_resolves() {
        let r = NameResolver::new();
        assert!(r.resolve("relay01.rdv").unwrap().starts_with('#'));
    }

    #[test]
    fn test_unknown_and_empty() {
        let r = NameResolver::new();
        assert_eq!(r.resolve(""), Err(ResolveError::Empty));
        assert_eq!(r.resolve("nobody.rdv"), Err(ResolveError::Unknown));
    }
}
