//! Name-keyed registry with registration-order listing.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{SwitchboardError, SwitchboardResult};

/// Anything that can be registered under a unique name.
pub trait Named {
    fn name(&self) -> &str;
}

/// Maps names to shared entries. Names are unique within one registry.
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    entries: Vec<Arc<T>>,
    index: HashMap<String, usize>,
}

impl<T: Named + ?Sized> Registry<T> {
    /// Create an empty registry. `kind` labels errors ("tool", "prompt", ...).
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn register(&mut self, entry: Arc<T>) -> SwitchboardResult<()> {
        let name = entry.name().to_string();
        if self.index.contains_key(&name) {
            return Err(SwitchboardError::DuplicateName(format!(
                "{} '{name}' is already registered",
                self.kind
            )));
        }
        tracing::debug!("Registered {} '{name}'", self.kind);
        self.index.insert(name, self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> SwitchboardResult<Arc<T>> {
        self.get(name)
            .cloned()
            .ok_or_else(|| SwitchboardError::NotFound(format!("{} '{name}'", self.kind)))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<T>> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All entries in registration order.
    pub fn list(&self) -> &[Arc<T>] {
        &self.entries
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name())
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<T>> {
        let position = self.index.remove(name)?;
        let removed = self.entries.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Entry(&'static str);

    impl Named for Entry {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = Registry::new("tool");
        registry.register(Arc::new(Entry("echo"))).unwrap();
        let err = registry.register(Arc::new(Entry("echo"))).unwrap_err();
        assert!(matches!(err, SwitchboardError::DuplicateName(_)));
        assert_eq!(registry.names().filter(|n| *n == "echo").count(), 1);
    }

    #[test]
    fn test_registration_order() {
        let mut registry = Registry::new("prompt");
        for name in ["zeta", "alpha", "mid"] {
            registry.register(Arc::new(Entry(name))).unwrap();
        }
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_resolve_missing() {
        let registry: Registry<Entry> = Registry::new("tool");
        assert!(matches!(
            registry.resolve("nope"),
            Err(SwitchboardError::NotFound(_))
        ));
    }

    #[test]
    fn test_unregister_keeps_index_consistent() {
        let mut registry = Registry::new("tool");
        for name in ["a", "b", "c"] {
            registry.register(Arc::new(Entry(name))).unwrap();
        }
        assert!(registry.unregister("a").is_some());
        assert_eq!(registry.resolve("c").unwrap().name(), "c");
        registry.register(Arc::new(Entry("a"))).unwrap();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }
}
