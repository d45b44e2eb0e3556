use thiserror::Error;

use super::types::PageId;

/// Storage engine error types
#[derive(Error, Debug)]
pub enum KarstError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("buffer pool is full, no evictable frames available")]
    PoolExhausted,

    #[error("invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("disk scheduler channel error: {0}")]
    Channel(String),
}

pub type Result<T> = std::result::Result<T, KarstError>;
