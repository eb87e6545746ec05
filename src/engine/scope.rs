use std::collections::BTreeSet;
use std::fmt;

pub const DEFAULT_SCOPE: &str = "default";

/// Reserved for "every scope" in reset requests.
pub const ALL_SCOPES: &str = "all";

const MAX_SCOPE_NAME: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    Duplicate(String),
    Invalid(String),
    Unknown(String),
    NoActiveScope,
}

impl fmt::Display for ScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate(name) => write!(f, "scope already exists: {name}"),
            Self::Invalid(name) => write!(f, "invalid scope name: {name:?}"),
            Self::Unknown(name) => write!(f, "unknown scope: {name}"),
            Self::NoActiveScope => write!(f, "no named scope is current"),
        }
    }
}

impl std::error::Error for ScopeError {}

/// `default` is inclusive of all history; named scopes match only themselves.
pub fn scope_matches(query_scope: &str, record_scope: &str) -> bool {
    query_scope == DEFAULT_SCOPE || query_scope == record_scope
}

/// Owns the "current scope" pointer and the set of live scopes.
///
/// `default` is always live. Creating a scope makes it current; finishing the
/// current scope retires it and points back at `default`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeManager {
    current: String,
    live: BTreeSet<String>,
}

impl Default for ScopeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeManager {
    pub fn new() -> Self {
        let mut live = BTreeSet::new();
        live.insert(DEFAULT_SCOPE.to_string());
        Self {
            current: DEFAULT_SCOPE.to_string(),
            live,
        }
    }

    /// Restore from persisted state; the current scope is forced live.
    pub fn from_parts<I: IntoIterator<Item = String>>(current: &str, live: I) -> Self {
        let mut mgr = Self::new();
        mgr.live.extend(live);
        let current = if current.trim().is_empty() {
            DEFAULT_SCOPE
        } else {
            current
        };
        mgr.live.insert(current.to_string());
        mgr.current = current.to_string();
        mgr
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn is_live(&self, name: &str) -> bool {
        self.live.contains(name)
    }

    pub fn live(&self) -> impl Iterator<Item = &str> {
        self.live.iter().map(String::as_str)
    }

    /// Explicit scope if given, otherwise the current pointer.
    pub fn resolve<'a>(&'a self, scope: Option<&'a str>) -> &'a str {
        match scope.map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => self.current.as_str(),
        }
    }

    pub fn validate_name(name: &str) -> Result<String, ScopeError> {
        let name = name.trim();
        let invalid = name.is_empty()
            || name.chars().count() > MAX_SCOPE_NAME
            || name.eq_ignore_ascii_case(ALL_SCOPES)
            || name.chars().any(|c| c.is_control() || c == '/' || c == '\\');
        if invalid {
            return Err(ScopeError::Invalid(name.to_string()));
        }
        Ok(name.to_string())
    }

    pub fn create(&mut self, name: &str) -> Result<String, ScopeError> {
        let name = Self::validate_name(name)?;
        if self.live.contains(&name) {
            return Err(ScopeError::Duplicate(name));
        }
        self.live.insert(name.clone());
        self.current = name.clone();
        Ok(name)
    }

    /// Retire the current scope. Returns its name.
    pub fn finish(&mut self) -> Result<String, ScopeError> {
        if self.current == DEFAULT_SCOPE {
            return Err(ScopeError::NoActiveScope);
        }
        let name = std::mem::replace(&mut self.current, DEFAULT_SCOPE.to_string());
        self.live.remove(&name);
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_switches_current() {
        let mut mgr = ScopeManager::new();
        assert_eq!(mgr.create(" event1 ").unwrap(), "event1");
        assert_eq!(mgr.current(), "event1");
        assert!(mgr.is_live("event1"));
        assert!(mgr.is_live(DEFAULT_SCOPE));
    }

    #[test]
    fn duplicate_and_invalid_names_are_rejected() {
        let mut mgr = ScopeManager::new();
        mgr.create("event1").unwrap();
        assert_eq!(mgr.create("event1"), Err(ScopeError::Duplicate("event1".into())));
        assert_eq!(mgr.create("default"), Err(ScopeError::Duplicate("default".into())));
        assert!(matches!(mgr.create("   "), Err(ScopeError::Invalid(_))));
        assert!(matches!(mgr.create("ALL"), Err(ScopeError::Invalid(_))));
        assert!(matches!(mgr.create("../etc"), Err(ScopeError::Invalid(_))));
    }

    #[test]
    fn finish_reverts_to_default() {
        let mut mgr = ScopeManager::new();
        mgr.create("event1").unwrap();
        assert_eq!(mgr.finish().unwrap(), "event1");
        assert_eq!(mgr.current(), DEFAULT_SCOPE);
        assert!(!mgr.is_live("event1"));
        assert_eq!(mgr.finish(), Err(ScopeError::NoActiveScope));
    }

    #[test]
    fn default_is_inclusive_named_is_exclusive() {
        assert!(scope_matches(DEFAULT_SCOPE, "event1"));
        assert!(scope_matches("event1", "event1"));
        assert!(!scope_matches("event2", "event1"));
    }

    #[test]
    fn resolve_prefers_explicit_scope() {
        let mut mgr = ScopeManager::new();
        mgr.create("event1").unwrap();
        assert_eq!(mgr.resolve(None), "event1");
        assert_eq!(mgr.resolve(Some("  ")), "event1");
        assert_eq!(mgr.resolve(Some("default")), "default");
    }
}
