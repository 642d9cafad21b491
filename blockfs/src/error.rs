//! The error taxonomy shared by every fallible operation in this crate.

use thiserror::Error;

/// Everything that can go wrong while driving the block store or the file
/// system built on top of it.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("type mismatch: {0}")]
    TypeMismatch(&'static str),

    #[error("already exists: {0}")]
    Exists(&'static str),

    #[error("out of space")]
    OutOfSpace,

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("structural failure: {0}")]
    Structural(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
