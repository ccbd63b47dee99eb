/// Query extension layer.
///
/// ```text
/// QueryBuilder (copy-on-write)
///       ↓
/// SelectQuery AST          (types.rs)
///       ↓
/// Extension passes         (passes.rs: AS OF check, hint push-down, literal quoting)
///       ↓
/// SQL compiler             (compiler.rs)
/// ```
pub mod builder;
pub mod compiler;
pub mod passes;
pub mod types;

pub use builder::QueryBuilder;
pub use compiler::compile;
pub use passes::{ExtensionPass, Pipeline};
pub use types::*;
