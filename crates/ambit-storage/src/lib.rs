// Postgres storage layer with sqlx

pub mod memory;
pub mod models;
pub mod repositories;
pub mod store;

pub use memory::{memory_table_name, MemoryScope};
pub use models::*;
pub use repositories::{CompletedInstanceInfo, Database};
pub use store::{validate_identifier, ExecuteResult, GetOptions, SqlValue, Store};
