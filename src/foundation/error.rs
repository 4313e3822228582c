use std::path::{Path, PathBuf};

use crate::template::model::BlendMode;

/// Convenience result type used across posterkit.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures while resolving or decoding an input asset.
#[derive(thiserror::Error, Debug)]
pub enum AssetError {
    /// The referenced file does not exist.
    #[error("asset not found: '{}'", path.display())]
    NotFound { path: PathBuf },

    /// The bytes are not in a format the loader understands.
    #[error("unsupported asset format for '{}': {detail}", path.display())]
    UnsupportedFormat { path: PathBuf, detail: String },

    /// The format was recognized but the payload failed to decode.
    #[error("corrupt asset data in '{}': {detail}", path.display())]
    CorruptData { path: PathBuf, detail: String },

    /// Reading the asset failed for a reason other than absence.
    #[error("io error reading asset '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AssetError {
    pub fn unsupported(path: impl AsRef<Path>, detail: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            path: path.as_ref().to_path_buf(),
            detail: detail.into(),
        }
    }

    pub fn corrupt(path: impl AsRef<Path>, detail: impl Into<String>) -> Self {
        Self::CorruptData {
            path: path.as_ref().to_path_buf(),
            detail: detail.into(),
        }
    }

    /// Map a filesystem error, folding `NotFound` into [`AssetError::NotFound`].
    pub fn from_io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { path }
        } else {
            Self::Io { path, source }
        }
    }
}

/// Failures while interpreting a template against a target canvas.
#[derive(thiserror::Error, Debug)]
pub enum LayoutError {
    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("scale factors out of range: sx={sx}, sy={sy}")]
    ScaleOutOfRange { sx: f64, sy: f64 },
}

impl LayoutError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidTemplate(msg.into())
    }
}

/// Failures while executing draw operations onto a canvas.
#[derive(thiserror::Error, Debug)]
pub enum CompositeError {
    #[error("blend mode '{0}' is not supported")]
    UnsupportedBlendMode(BlendMode),

    #[error("layer '{layer_id}' cannot be placed: {detail}")]
    OutOfBounds { layer_id: String, detail: String },
}

impl CompositeError {
    pub fn out_of_bounds(layer_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::OutOfBounds {
            layer_id: layer_id.into(),
            detail: detail.into(),
        }
    }
}

/// Failures in the demux, per-frame, or mux stages of a video job.
#[derive(thiserror::Error, Debug)]
pub enum VideoError {
    #[error("video decode error: {0}")]
    Decode(String),

    #[error("video encode error: {0}")]
    Encode(String),

    #[error("unsupported codec '{codec}' for container '{container}'")]
    UnsupportedCodec { codec: String, container: String },

    /// The external decoder/encoder process could not be started.
    #[error("failed to spawn '{program}'")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl VideoError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }
}

/// Failures while persisting the final output.
#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error("io error writing '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("export encode error: {0}")]
    Encode(String),
}

impl ExportError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }
}

/// Top-level error taxonomy returned by engine APIs.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Composite(#[from] CompositeError),

    #[error(transparent)]
    Video(#[from] VideoError),

    #[error(transparent)]
    Export(#[from] ExportError),

    /// The job observed its cancellation token and stopped.
    #[error("render job cancelled")]
    Cancelled,

    /// Invalid engine configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Wrapped lower-level error from dependencies.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether resubmitting the same job may succeed.
    ///
    /// The engine never retries on its own; this only classifies the failure for callers.
    pub fn is_retryable(&self) -> bool {
        fn transient(err: &std::io::Error) -> bool {
            matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::ResourceBusy
                    | std::io::ErrorKind::StorageFull
            )
        }

        match self {
            Self::Asset(AssetError::Io { source, .. }) => transient(source),
            Self::Export(ExportError::Io { source, .. }) => transient(source),
            Self::Video(VideoError::Spawn { source, .. }) => {
                transient(source) || source.kind() == std::io::ErrorKind::OutOfMemory
            }
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
