use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The store failed mid-poll. Fatal to the loop.
    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
