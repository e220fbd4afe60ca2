//! Validation errors raised at the document and identity boundaries.

/// Input rejected before any side effect took place.
///
/// Always safe to retry once the input is fixed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("document is {actual} bytes, limit is {limit}")]
    TooLarge { actual: usize, limit: usize },
    #[error("document has {actual} blocks, limit is {limit}")]
    TooManyBlocks { actual: usize, limit: usize },
    #[error("malformed document: {reason}")]
    Malformed { reason: String },
    #[error("duplicate block id: {id}")]
    DuplicateBlockId { id: String },
    #[error("invalid block {id}: {reason}")]
    InvalidBlock { id: String, reason: String },
    #[error("invalid color: {value}")]
    InvalidColor { value: String },
    #[error("invalid url in {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("invalid anonymous token")]
    InvalidToken,
    #[error("invalid username: {value}")]
    InvalidUsername { value: String },
}
