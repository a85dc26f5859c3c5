/// Core error types for the Vidlink pipeline.

/// A specialized Result type for Vidlink operations.
pub type VidlinkResult<T> = Result<T, VidlinkError>;

/// Top-level error type encompassing all Vidlink subsystems.
#[derive(Debug, thiserror::Error)]
pub enum VidlinkError {
    #[error("invalid frame dimensions {width}x{height}: {reason}")]
    Dimensions {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("unsupported pixel format: {0:#010x}")]
    UnsupportedFormat(u32),

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("readback failed: {0}")]
    Readback(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Other(String),
}

impl VidlinkError {
    /// Create a dimension error for a frame of the given size.
    pub fn dimensions(width: u32, height: u32, reason: impl Into<String>) -> Self {
        VidlinkError::Dimensions {
            width,
            height,
            reason: reason.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        VidlinkError::Transport(message.into())
    }
}
