//! Revision store engines.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "redb")]
pub mod redb;

pub use memory::MemoryPageStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresPageStore;
#[cfg(feature = "redb")]
pub use redb::RedbPageStore;
