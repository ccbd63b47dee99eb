mod connection;
pub mod executor;
pub mod schema;
mod transaction;

pub use connection::*;
pub use executor::{CatalogRow, Executor};
pub use schema::*;
pub use transaction::*;
