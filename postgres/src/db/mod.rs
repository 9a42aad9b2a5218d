//! Database module for PostgreSQL persistence.

mod entities;
mod pool;
mod query;

pub use entities::*;
pub use pool::*;
pub use query::*;
