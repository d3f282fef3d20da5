//! Multi-Instance Router (C7)
//!
//! Maps a (port, path) pair to the name of the instance that owns it, with a
//! secondary port → paths index so the registry can answer "what's already
//! on this port" without scanning the whole table. Grounded in
//! `original_source/src/streamer/router.py`, generalized into an explicit
//! Rust error type the way the teacher's `registry/store.rs` generalizes its
//! lookups into `RegistryError`.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::RouteConflict;

/// Canonical (port, case-folded path) key. Path comparison throughout the
/// router is case-insensitive; the fold happens once here so every other
/// method can compare keys structurally.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    port: u16,
    path_lower: String,
}

impl RouteKey {
    pub fn new(port: u16, path: &str) -> Self {
        Self {
            port,
            path_lower: path.to_lowercase(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.port, self.path_lower)
    }
}

/// Reasons a path fails the validity rules of §4.7: must start with `/`, no
/// whitespace, no `..` traversal, no backslashes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path must start with '/': {0}")]
    MissingLeadingSlash(String),
    #[error("path must not contain whitespace: {0}")]
    ContainsWhitespace(String),
    #[error("path must not contain '..': {0}")]
    ContainsDotDot(String),
    #[error("path must not contain a backslash: {0}")]
    ContainsBackslash(String),
}

pub fn validate_path(path: &str) -> Result<(), PathError> {
    if !path.starts_with('/') {
        return Err(PathError::MissingLeadingSlash(path.to_string()));
    }
    if path.chars().any(char::is_whitespace) {
        return Err(PathError::ContainsWhitespace(path.to_string()));
    }
    if path.contains("..") {
        return Err(PathError::ContainsDotDot(path.to_string()));
    }
    if path.contains('\\') {
        return Err(PathError::ContainsBackslash(path.to_string()));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct Router {
    routes: HashMap<RouteKey, String>,
    by_port: HashMap<u16, HashSet<String>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` at (port, path). Fails if the key already exists.
    /// Does not validate the path's shape; callers validate at config-load
    /// time with [`validate_path`] so a single bad path is reported with
    /// full config context rather than a bare `RouteConflict`.
    pub fn add(&mut self, port: u16, path: &str, name: &str) -> Result<(), RouteConflict> {
        let key = RouteKey::new(port, path);
        if self.routes.contains_key(&key) {
            return Err(RouteConflict(key));
        }
        self.by_port
            .entry(port)
            .or_default()
            .insert(path.to_lowercase());
        self.routes.insert(key, name.to_string());
        Ok(())
    }

    pub fn remove(&mut self, port: u16, path: &str) -> Option<String> {
        let key = RouteKey::new(port, path);
        let name = self.routes.remove(&key)?;
        if let Some(paths) = self.by_port.get_mut(&port) {
            paths.remove(&key.path_lower);
            if paths.is_empty() {
                self.by_port.remove(&port);
            }
        }
        Some(name)
    }

    pub fn lookup(&self, port: u16, path: &str) -> Option<&str> {
        self.routes
            .get(&RouteKey::new(port, path))
            .map(String::as_str)
    }

    pub fn paths_for(&self, port: u16) -> Vec<String> {
        self.by_port
            .get(&port)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_port(&mut self, port: u16) {
        if let Some(paths) = self.by_port.remove(&port) {
            for path in paths {
                self.routes.remove(&RouteKey::new(port, &path));
            }
        }
    }

    pub fn has_route(&self, port: u16, path: &str) -> bool {
        self.routes.contains_key(&RouteKey::new(port, path))
    }

    /// Returns the name of the other instance already holding (port, path),
    /// ignoring `exclude` itself — used by the registry's edit-time conflict
    /// check (§4.8).
    pub fn conflict(&self, port: u16, path: &str, exclude: &str) -> Option<&str> {
        self.lookup(port, path).filter(|name| *name != exclude)
    }

    /// True if `port` is bound to at least one path (used for a fast
    /// port-in-use check during allocation, §4.8).
    pub fn port_in_use(&self, port: u16) -> bool {
        self.by_port.contains_key(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_lookup_round_trips() {
        let mut r = Router::new();
        r.add(8765, "/", "cam1").unwrap();
        assert_eq!(r.lookup(8765, "/"), Some("cam1"));
    }

    #[test]
    fn lookup_is_case_insensitive_in_path_case_sensitive_in_port() {
        let mut r = Router::new();
        r.add(8765, "/a", "x").unwrap();
        assert_eq!(r.lookup(8765, "/A"), Some("x"));
        assert_eq!(r.lookup(8766, "/a"), None);
    }

    #[test]
    fn conflicting_add_fails_case_insensitively() {
        let mut r = Router::new();
        r.add(8765, "/a", "x").unwrap();
        let err = r.add(8765, "/A", "y").unwrap_err();
        assert_eq!(err.0, RouteKey::new(8765, "/a"));
    }

    #[test]
    fn remove_clears_secondary_index_when_last_path_on_port() {
        let mut r = Router::new();
        r.add(8765, "/a", "x").unwrap();
        assert_eq!(r.paths_for(8765), vec!["/a".to_string()]);
        r.remove(8765, "/a");
        assert!(r.paths_for(8765).is_empty());
        assert!(!r.port_in_use(8765));
    }

    #[test]
    fn multiple_instances_share_a_port_on_distinct_paths() {
        let mut r = Router::new();
        r.add(8765, "/a", "x").unwrap();
        r.add(8765, "/b", "y").unwrap();
        assert_eq!(r.lookup(8765, "/a"), Some("x"));
        assert_eq!(r.lookup(8765, "/b"), Some("y"));
    }

    #[test]
    fn clear_port_drops_every_route_on_it() {
        let mut r = Router::new();
        r.add(8765, "/a", "x").unwrap();
        r.add(8765, "/b", "y").unwrap();
        r.clear_port(8765);
        assert_eq!(r.lookup(8765, "/a"), None);
        assert_eq!(r.lookup(8765, "/b"), None);
    }

    #[test]
    fn conflict_ignores_the_excluded_name() {
        let mut r = Router::new();
        r.add(8765, "/a", "x").unwrap();
        assert_eq!(r.conflict(8765, "/a", "x"), None);
        assert_eq!(r.conflict(8765, "/a", "y"), Some("x"));
    }

    #[test]
    fn validate_path_rejects_malformed_paths() {
        assert!(validate_path("a").is_err());
        assert!(validate_path("/a b").is_err());
        assert!(validate_path("/../a").is_err());
        assert!(validate_path("/a\\b").is_err());
        assert!(validate_path("/ok").is_ok());
    }
}
