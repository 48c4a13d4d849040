use std::path::PathBuf;

/// All errors that can occur within motion.
///
/// One enum covers the whole pipeline: path resolution, archive decoding,
/// configuration, rasterization and loading. Errors raised inside loader
/// workers travel back to the consumer unchanged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A dataset key could not be resolved to an existing path.
    #[error("path not found: {key} (data root: {root})")]
    PathNotFound { key: String, root: PathBuf },

    /// The chunked archive exists but its layout or metadata is unusable.
    #[error("malformed archive at {path}: {reason}")]
    ArchiveMalformed { path: PathBuf, reason: String },

    /// A numpy type string or structured dtype we cannot decode.
    #[error("unsupported dtype: {0}")]
    UnsupportedDtype(String),

    /// Chunk compressor other than none/zlib/gzip.
    #[error("unsupported compressor: {0}")]
    UnsupportedCompressor(String),

    /// Rasterizer `map_type` that this build cannot produce.
    #[error("unsupported rasterizer: {map_type} (supported: {supported})")]
    UnsupportedRasterizer { map_type: String, supported: String },

    /// Index past the end of a dataset or array.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Array shapes that should agree do not.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    /// Configuration value rejected by validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Eligibility mask missing, unreadable or of the wrong length.
    #[error("agent mask error: {0}")]
    Mask(String),

    /// Image encoding or writing failed.
    #[error("image error: {0}")]
    Image(String),

    /// Visualization requested before any agent dataset was built.
    #[error("no agent dataset has been built yet; build a loader first")]
    NoActiveDataset,

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Shorthand for [`Error::ArchiveMalformed`].
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::ArchiveMalformed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience Result type used throughout motion.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
