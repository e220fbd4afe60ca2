//! `PageDrop` Core: page model, document contract, slug rules, and caller identity.

pub mod clock;
pub mod context;
pub mod document;
pub mod error;
pub mod slug;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{AnonymousClaim, CallerIdentity};
pub use document::{Background, Block, BlockKind, DocumentLimits, PageDocument};
pub use error::ValidationError;
pub use types::{Page, PageId, PageSummary, User};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
