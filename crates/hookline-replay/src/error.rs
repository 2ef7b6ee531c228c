/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The recording couldn't be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A recorded message envelope isn't valid JSON.
    #[error("line {line}: {source}")]
    Json {
        /// Line of the recording (1-based).
        line: usize,
        /// JSON error.
        source: serde_json::Error,
    },

    /// A recorded binary buffer isn't valid hex.
    #[error("line {line}: {source}")]
    Hex {
        /// Line of the recording (1-based).
        line: usize,
        /// Hex decoding error.
        source: hex::FromHexError,
    },

    /// A recording directive isn't supported.
    #[error("line {line}: unknown directive {directive:?}")]
    UnknownDirective {
        /// Line of the recording (1-based).
        line: usize,
        /// Offending directive.
        directive: String,
    },
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
