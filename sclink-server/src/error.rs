use std::io;
use std::path::PathBuf;

use sclink_osc::{CodecError, TransportError};
use thiserror::Error;

/// Result type for session and handle operations.
pub type SessionResult<T = ()> = Result<T, SessionError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("cannot allocate {size} id(s): pool of {capacity} exhausted")]
    Exhausted { size: usize, capacity: usize },
    #[error("allocation size must be at least 1")]
    ZeroSize,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error("{0} is only available on control-rate buses")]
    ControlRateOnly(&'static str),
    #[error("path {0:?} is not valid UTF-8")]
    NonUtf8Path(PathBuf),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),
}
