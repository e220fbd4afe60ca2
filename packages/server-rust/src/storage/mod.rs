//! Revision store: durable page rows, slug reservations, and user records.
//!
//! - [`PageStore`]: the async contract, with compare-and-set as the only
//!   cross-request coordination primitive
//! - [`engines`]: in-memory, redb, and `PostgreSQL` implementations
//! - [`TimedStore`]: wraps any engine so every call is bounded by a timeout

pub mod engines;
pub mod page_store;
pub mod timed;

pub use engines::MemoryPageStore;
#[cfg(feature = "postgres")]
pub use engines::PostgresPageStore;
#[cfg(feature = "redb")]
pub use engines::RedbPageStore;
pub use page_store::*;
pub use timed::TimedStore;
