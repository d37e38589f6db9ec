//! Error types for MAGSAV decoding.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::session::ParseState;

/// Errors that stop decoding a MAGSAV stream.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A record that doesn't fit the state the decoder is in.
    #[error("misformatted MAGSAV tape in state {state}: {reason}")]
    Format {
        /// State the decoder was in when the record arrived.
        state: ParseState,
        /// What was wrong with the record.
        reason: String,
    },

    /// A read or tape-control failure that wasn't caused by reaching end-of-tape.
    #[error("tape device error: {0}")]
    Device(#[source] io::Error),

    /// Prompting the operator or reading the reply failed.
    #[error("operator console error: {0}")]
    Console(#[source] io::Error),

    /// Operator input was closed while waiting for the next volume.
    #[error("operator input closed while waiting for the next volume")]
    OperatorAborted,

    /// Creating an output directory failed.
    #[error("can't make directory {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Creating an output file failed.
    #[error("can't create {}: {source}", path.display())]
    CreateFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Writing to an output file failed.
    #[error("error writing {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Writing the listing failed.
    #[error("error writing listing: {0}")]
    Listing(#[source] io::Error),

    /// Path reconstructed from a treename record exceeds the configured maximum.
    #[error("path exceeds limit: {len} bytes > {limit} bytes")]
    PathTooLong {
        /// Actual path length.
        len: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Treename record claims more entries than the configured maximum.
    #[error("too many treename entries: {count} > {limit}")]
    TooManyEntries {
        /// Entry count derived from the record length.
        count: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Path that would escape the extraction root.
    #[error("refusing to extract unsafe path {0:?}")]
    UnsafePath(String),
}

impl DecodeError {
    pub(crate) fn format(state: ParseState, reason: impl Into<String>) -> Self {
        Self::Format {
            state,
            reason: reason.into(),
        }
    }
}

/// Result type for decoding operations.
pub type Result<T> = std::result::Result<T, DecodeError>;
