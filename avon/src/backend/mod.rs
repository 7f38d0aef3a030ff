//! Storage backends
//!
//! - [`CollectionRepository`]: shared in-memory records
//! - [`FileRepository`]: one JSON array file per resource
//! - [`SqlRepository`]: PostgreSQL via `sqlx` (feature `database`)
//!
//! Collection and file backends evaluate queries with the same in-memory
//! matcher; the SQL backend translates them into equivalent statements.

mod collection;
mod file;
mod memory;
#[cfg(feature = "database")]
pub mod sql;

pub use collection::{Collection, CollectionRepository};
pub use file::FileRepository;
#[cfg(feature = "database")]
pub use sql::SqlRepository;
