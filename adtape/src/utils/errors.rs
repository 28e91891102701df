use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdError {
    #[error("Out of memory: arena could not reserve a block of {bytes} bytes")]
    OutOfMemory { bytes: usize },
    #[error("Stale handle: node was invalidated by a recovery of the tape")]
    StaleHandle,
    #[error("No nested scope is open on this thread's tape")]
    NoNestedScope,
    #[error("Operation requires an empty nested stack, but a nested scope is open")]
    NestedScopeActive,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Out of range in {function}: index {index} for size {size}")]
    OutOfRange {
        function: String,
        index: usize,
        size: usize,
    },
    #[error("Domain error: {0}")]
    DomainError(String),
    #[error("Tape in use: cannot reconfigure a tape that holds nodes")]
    TapeInUse,
}

pub type Result<T> = std::result::Result<T, AdError>;

impl From<AdError> for String {
    fn from(e: AdError) -> Self {
        e.to_string()
    }
}
