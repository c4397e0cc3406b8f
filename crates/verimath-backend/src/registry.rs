//! Capability registry
//!
//! Built once at startup and shared read-only afterwards. Registration
//! order is preserved and is the dispatch order when a subgoal states no
//! backend preference.

use crate::backend::{Backend, BackendRequest, Method};
use crate::numeric::NumericBackend;
use crate::symbolic::SymbolicBackend;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Serialisable snapshot of which backend implements which methods
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityTable {
    pub backends: IndexMap<String, Vec<Method>>,
}

impl CapabilityTable {
    /// Backends declaring `method`, in registration order
    #[must_use]
    pub fn providers(&self, method: Method) -> Vec<&str> {
        self.backends
            .iter()
            .filter(|(_, methods)| methods.contains(&method))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Whether any backend declares `method`
    #[inline]
    #[must_use]
    pub fn supports(&self, method: Method) -> bool {
        self.backends.values().any(|m| m.contains(&method))
    }
}

/// Ordered set of backends keyed by name
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: IndexMap<String, Arc<dyn Backend>>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BackendRegistry {
    /// An empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Symbolic then numeric
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new()
            .with_backend(Arc::new(SymbolicBackend::new()))
            .with_backend(Arc::new(NumericBackend::new()))
    }

    /// Add a backend, replacing any backend registered under the same name
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        let name = backend.name().to_string();
        tracing::debug!(backend = %name, methods = backend.capabilities().len(), "registering backend");
        self.backends.insert(name, backend);
        self
    }

    /// Remove a backend by name
    #[must_use]
    pub fn without_backend(mut self, name: &str) -> Self {
        self.backends.shift_remove(name);
        self
    }

    /// Backend registered as `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.get(name).cloned()
    }

    /// Backend names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    /// Number of backends
    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Whether no backend is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Whether any backend declares `method`
    #[must_use]
    pub fn supports(&self, method: Method) -> bool {
        self.backends
            .values()
            .any(|b| b.capabilities().contains(&method))
    }

    /// Names of the backends declaring `method`, in registration order
    #[must_use]
    pub fn providers(&self, method: Method) -> Vec<String> {
        self.backends
            .iter()
            .filter(|(_, b)| b.capabilities().contains(&method))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// First backend in `preference` order that accepts the request.
    /// An empty preference means registration order.
    #[must_use]
    pub fn select(&self, request: &BackendRequest, preference: &[String]) -> Option<Arc<dyn Backend>> {
        let accepts = |b: &Arc<dyn Backend>| b.can_handle(request);
        if preference.is_empty() {
            return self.backends.values().find(|b| accepts(b)).cloned();
        }
        preference
            .iter()
            .filter_map(|name| self.backends.get(name))
            .find(|b| accepts(b))
            .cloned()
    }

    /// Methods per backend, serialisable for display
    #[must_use]
    pub fn capability_table(&self) -> CapabilityTable {
        CapabilityTable {
            backends: self
                .backends
                .iter()
                .map(|(name, b)| (name.clone(), b.capabilities().to_vec()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verimath_expr::parse_statement;

    fn solve_request(statement: &str) -> BackendRequest {
        BackendRequest::new(Method::Solve)
            .with_statement(parse_statement(statement).unwrap())
            .with_variable("x")
    }

    #[test]
    fn defaults_are_ordered() {
        let registry = BackendRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["symbolic", "numeric"]);
        assert_eq!(registry.providers(Method::LinearSolve), vec!["symbolic", "numeric"]);
        assert!(!registry.supports(Method::Reproduce));
    }

    #[test]
    fn selection_follows_preference_and_capability() {
        let registry = BackendRegistry::with_defaults();
        let req = solve_request("x^2 = 4");
        let picked = registry.select(&req, &["numeric".into(), "symbolic".into()]).unwrap();
        // numeric declares no `solve`
        assert_eq!(picked.name(), "symbolic");

        let transcendental = solve_request("sin(x) = 0");
        assert!(registry.select(&transcendental, &[]).is_none());
    }

    #[test]
    fn unknown_preferences_are_skipped() {
        let registry = BackendRegistry::with_defaults().without_backend("symbolic");
        let req = solve_request("x = 1");
        assert!(registry.select(&req, &["symbolic".into()]).is_none());
    }

    #[test]
    fn capability_table_serialises_in_order() {
        let table = BackendRegistry::with_defaults().capability_table();
        let json = serde_json::to_string(&table).unwrap();
        assert!(json.starts_with("{\"backends\":{\"symbolic\":[\"solve\""));
        assert_eq!(table.providers(Method::RootFind), vec!["numeric"]);
    }
}
