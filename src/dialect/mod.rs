/// Dialect layer: capability negotiation and SQL fragment rewriting.
///
/// ```text
/// DialectRegistry (startup)
///       ↓ resolve(name)
/// Dialect (PostgresDialect, wrapped by CockroachDialect)
///       ↓ capabilities()
/// CapabilityFlags  →  SqlRewriter / QueryBuilder / Introspector / TransactionManager
/// ```
pub mod capability;
pub mod registry;
pub mod rewriter;

use std::sync::Arc;

pub use capability::{Capability, CapabilityFlags, CapabilityValue, IsolationLevel};
pub use registry::DialectRegistry;
pub use rewriter::SqlRewriter;

/// A SQL dialect the adapter can target.
///
/// Dialects differ only through their capability table; behaviour is
/// selected by checking capabilities, never by comparing names.
pub trait Dialect: Send + Sync {
    /// Canonical dialect name.
    fn name(&self) -> &str;

    /// Capability table, fixed for the lifetime of the dialect.
    fn capabilities(&self) -> &Arc<CapabilityFlags>;

    /// Fragment rewriter bound to this dialect's capabilities.
    fn rewriter(&self) -> SqlRewriter {
        SqlRewriter::new(Arc::clone(self.capabilities()))
    }
}

/// The PostgreSQL dialect of the reused driver.
pub struct PostgresDialect {
    capabilities: Arc<CapabilityFlags>,
}

impl PostgresDialect {
    pub fn new() -> Self {
        Self::with_capabilities(CapabilityFlags::postgres())
    }

    pub fn with_capabilities(capabilities: CapabilityFlags) -> Self {
        Self {
            capabilities: Arc::new(capabilities),
        }
    }
}

impl Default for PostgresDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgresql"
    }

    fn capabilities(&self) -> &Arc<CapabilityFlags> {
        &self.capabilities
    }
}

/// Decorator that layers the distributed engine's restrictions and
/// extensions over a base PostgreSQL-family dialect.
pub struct CockroachDialect {
    base: Box<dyn Dialect>,
    capabilities: Arc<CapabilityFlags>,
}

impl CockroachDialect {
    /// Wrap the stock PostgreSQL dialect.
    pub fn new() -> Self {
        Self::wrap(Box::new(PostgresDialect::new()))
    }

    /// Wrap an arbitrary base dialect, overriding the capabilities the
    /// distributed engine changes and inheriting the rest.
    pub fn wrap(base: Box<dyn Dialect>) -> Self {
        let defaults = CapabilityFlags::cockroachdb();
        let capabilities = CapabilityFlags {
            supports_partial_index: base.capabilities().supports_partial_index,
            supports_expression_index: base.capabilities().supports_expression_index,
            supports_comments: base.capabilities().supports_comments,
            ..defaults
        };
        Self::with_capabilities(base, capabilities)
    }

    pub fn with_capabilities(base: Box<dyn Dialect>, capabilities: CapabilityFlags) -> Self {
        Self {
            base,
            capabilities: Arc::new(capabilities),
        }
    }

    /// The wrapped dialect.
    pub fn base(&self) -> &dyn Dialect {
        self.base.as_ref()
    }
}

impl Default for CockroachDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for CockroachDialect {
    fn name(&self) -> &str {
        "cockroachdb"
    }

    fn capabilities(&self) -> &Arc<CapabilityFlags> {
        &self.capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cockroach_wraps_postgres() {
        let dialect = CockroachDialect::new();
        assert_eq!(dialect.name(), "cockroachdb");
        assert_eq!(dialect.base().name(), "postgresql");
        assert!(dialect.capabilities().supports_index_hints);
        assert!(!dialect.base().capabilities().supports_index_hints);
    }

    #[test]
    fn test_decorator_inherits_base_feature_restrictions() {
        let base = CapabilityFlags {
            supports_expression_index: false,
            ..CapabilityFlags::postgres()
        };
        let dialect = CockroachDialect::wrap(Box::new(PostgresDialect::with_capabilities(base)));
        assert!(!dialect.capabilities().supports_expression_index);
        assert!(dialect.capabilities().quote_numeric_literals);
    }

    #[test]
    fn test_rewriter_shares_capabilities() {
        let dialect = CockroachDialect::new();
        let rewriter = dialect.rewriter();
        assert_eq!(rewriter.identifier_length_limit(), 63);
    }
}
