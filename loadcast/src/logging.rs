use std::sync::Arc;

/// Log target handed down from the listener to every session.
///
/// The library never installs a logger itself. Whoever owns the process sets
/// up the `log` backend and decides the root target; components only derive
/// children from the scope they were given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    target: Arc<str>,
}

impl Scope {
    pub fn new(target: &str) -> Self {
        Self {
            target: Arc::from(target),
        }
    }

    pub fn child(&self, name: &str) -> Self {
        Self::new(&format!("{}::{}", self.target, name))
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new("loadcast")
    }
}
