/// Custom Result type for bgzip operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the bgzip library, encompassing all possible error cases
/// that can occur while decoding or encoding blocked gzip streams.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub enum Error {
    /// Operating on a reader or writer that can no longer be used
    StateError(#[from] StateError),
    /// The compressed stream does not follow the BGZF block structure
    FormatError(#[from] FormatError),
    /// A pre-allocated buffer is too small to make any progress
    BufferError(#[from] BufferError),
    /// Failures of the background worker used by the pipelined variants
    PipelineError(#[from] PipelineError),
    /// Invalid reader or writer configuration
    ConfigError(#[from] ConfigError),
    /// Standard I/O errors raised by the byte source or sink
    IoError(#[from] std::io::Error),
    /// The codec thread pool could not be started
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
}
impl Error {
    /// Checks if the error was caused by a malformed compressed stream
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::FormatError(_))
    }

    /// Checks if the error was caused by using a closed reader or writer
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::StateError(StateError::Closed))
    }

    /// Checks if the error was raised by a fail-fast pipeline that fell behind
    #[must_use]
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::PipelineError(PipelineError::Backpressure { .. }))
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::IoError(err) => err,
            Error::FormatError(_) => Self::new(std::io::ErrorKind::InvalidData, err),
            other => Self::other(other),
        }
    }
}

/// Takes the failure stored in `slot`, leaving behind what later calls must raise
///
/// Format errors stay in place so that every following call reports them again.
/// Any other failure is raised once and replaced with [`StateError::Poisoned`].
pub(crate) fn take_sticky(slot: &mut Option<Error>) -> Option<Error> {
    let (kept, raised) = match slot.take()? {
        Error::FormatError(err) => (err.clone().into(), err.into()),
        Error::StateError(err) => (err.into(), err.into()),
        other => (StateError::Poisoned.into(), other),
    };
    *slot = Some(kept);
    Some(raised)
}

/// Errors raised when a reader or writer is used outside of its lifecycle
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    /// The reader or writer has already been closed
    #[error("I/O operation on a closed stream")]
    Closed,

    /// An earlier failure left the stream in an unusable state
    #[error("Stream is unusable after an earlier failure")]
    Poisoned,
}

/// Errors describing framing that is inconsistent with the BGZF block structure
///
/// These are `Clone` so that a reader can re-raise the same failure on every
/// read that follows it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The block does not start with the gzip magic and DEFLATE method bytes
    ///
    /// # Arguments
    /// * `[u8; 3]` - The three bytes found where the magic was expected
    #[error("Invalid gzip magic: {0:02x?}")]
    InvalidMagic([u8; 3]),

    /// The gzip flags do not announce an extra field
    #[error("Unsupported gzip flags: {0:#04x}")]
    UnsupportedFlags(u8),

    /// The extra field does not carry the `BC` block size subfield
    #[error("Missing BC subfield in gzip extra field")]
    MissingBlockSize,

    /// The announced block size cannot hold the header and footer
    #[error("Invalid block size: {0}")]
    InvalidBlockSize(usize),

    /// The footer announces more inflated bytes than a block may hold
    #[error("Block inflates to {0} bytes, above the 64 KiB limit")]
    PayloadTooLarge(usize),

    /// The DEFLATE payload of a block could not be inflated
    #[error("Failed to inflate block: {0}")]
    Inflate(String),

    /// The inflated payload length disagrees with the block footer
    #[error("Block inflated to {got} bytes. Expected: {expected}")]
    SizeMismatch { expected: usize, got: usize },

    /// The source ended inside a block
    ///
    /// # Arguments
    /// * `usize` - Number of dangling bytes left over at the end of the source
    #[error("Stream ended with {0} bytes of an incomplete block")]
    Truncated(usize),
}

/// Errors raised when a fixed-size buffer cannot make progress
#[derive(thiserror::Error, Debug)]
pub enum BufferError {
    /// The whole decode buffer is too small to hold the next block
    #[error("Buffer of {capacity} bytes cannot hold the next block")]
    InsufficientCapacity { capacity: usize },

    /// Fewer destination buffers were provided than chunks to encode
    #[error("{chunks} chunks to encode but only {buffers} buffers provided")]
    TooFewBuffers { chunks: usize, buffers: usize },

    /// A destination buffer is too small for the compressed block
    #[error("Compressed block does not fit into a {0} byte buffer")]
    BlockOverflow(usize),
}

/// Errors raised by the background worker of the pipelined reader and writer
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Too many tasks are outstanding in a fail-fast pipeline
    #[error("{outstanding} tasks outstanding, above the limit of {limit}")]
    Backpressure { outstanding: usize, limit: usize },

    /// The background worker stopped answering
    #[error("Background worker disconnected")]
    WorkerDisconnected,

    /// The background worker panicked
    #[error("Background worker panicked")]
    WorkerPanicked,
}

/// Errors raised by reader and writer builders
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The decode buffer must hold at least one byte
    #[error("Buffer size must be positive")]
    ZeroCapacity,

    /// The batch size is outside of the supported range
    ///
    /// # Fields
    /// * `got` - The requested batch size
    /// * `max` - The largest supported batch size
    #[error("Batch size ({got}) must be between 1 and {max}")]
    InvalidBatchSize { got: usize, max: usize },

    /// Pipelines need room for at least one task
    #[error("Queue size must be positive")]
    ZeroQueueSize,

    /// The source must be read in positive increments
    #[error("Read chunk size must be positive")]
    ZeroChunkSize,

    /// The compression level is outside of the DEFLATE range
    #[error("Compression level ({0}) must be between 0 and 9")]
    InvalidLevel(u32),
}
