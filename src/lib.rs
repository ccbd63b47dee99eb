pub mod adapter;
pub mod ast;
pub mod db;
pub mod dialect;
pub mod error;
pub mod interval;

pub use adapter::Adapter;
pub use ast::QueryBuilder;
pub use dialect::rewriter::Value;
pub use dialect::{Capability, CapabilityFlags, Dialect, DialectRegistry, IsolationLevel};
pub use error::{AdapterError, Result};
pub use interval::Duration;
