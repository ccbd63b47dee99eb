use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::{CapabilityFlags, CockroachDialect, Dialect, PostgresDialect};
use crate::error::{AdapterError, Result};

/// Builds a dialect, applying `[capabilities]` overrides from configuration.
pub type DialectFactory = Box<dyn Fn(&toml::Table) -> Result<Arc<dyn Dialect>> + Send + Sync>;

/// Explicit registry of dialect factories.
///
/// Created once at application startup and handed to the connection
/// configuration step; there is no process-wide instance.
pub struct DialectRegistry {
    factories: HashMap<String, DialectFactory>,
    aliases: HashMap<String, String>,
}

impl DialectRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Registry with the built-in dialects and their aliases.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();

        registry.register("postgresql", &["postgres", "pg"], |overrides| {
            let caps = CapabilityFlags::postgres().with_overrides(overrides)?;
            Ok(Arc::new(PostgresDialect::with_capabilities(caps)) as Arc<dyn Dialect>)
        });

        registry.register("cockroachdb", &["cockroach", "crdb"], |overrides| {
            let defaults = CockroachDialect::new();
            let caps = defaults.capabilities().as_ref().clone().with_overrides(overrides)?;
            let base = Box::new(PostgresDialect::new());
            Ok(Arc::new(CockroachDialect::with_capabilities(base, caps)) as Arc<dyn Dialect>)
        });

        registry
    }

    /// Register a dialect factory under a canonical name and aliases.
    pub fn register<F>(&mut self, name: &str, aliases: &[&str], factory: F)
    where
        F: Fn(&toml::Table) -> Result<Arc<dyn Dialect>> + Send + Sync + 'static,
    {
        debug!("Registering dialect: {}", name);
        for alias in aliases {
            self.aliases.insert(alias.to_string(), name.to_string());
        }
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Canonical name for a dialect name or alias.
    pub fn canonical_name<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        if self.factories.contains_key(name) {
            return Some(name);
        }
        self.aliases.get(name).map(String::as_str)
    }

    /// Build the named dialect with no capability overrides.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Dialect>> {
        self.resolve_with(name, &toml::Table::new())
    }

    /// Build the named dialect, applying capability overrides.
    pub fn resolve_with(&self, name: &str, overrides: &toml::Table) -> Result<Arc<dyn Dialect>> {
        let canonical = self
            .canonical_name(name)
            .ok_or_else(|| AdapterError::Configuration(format!("unknown dialect: {}", name)))?;
        let factory = &self.factories[canonical];
        factory(overrides)
    }

    /// List registered dialect names, sorted.
    pub fn dialect_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for DialectRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
