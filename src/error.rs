use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Read-only access by key found no entry.
    #[error("key not found")]
    KeyNotFound,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
