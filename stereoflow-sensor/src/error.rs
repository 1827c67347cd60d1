//! Error types for sensor components.

use std::error::Error as StdError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use stereoflow_frontend::FrontendError;
use thiserror::Error;

/// Errors surfaced by the stereo camera and flow sensor components.
///
/// `Clone` so the flow loop can hand the same carried error to every reader.
#[derive(Debug, Clone, Error)]
pub enum SensorError {
    /// Reconstruction or motion estimation rejected its input.
    #[error(transparent)]
    Frontend(#[from] FrontendError),

    /// The cached velocity sample is older than the freshness window.
    #[error("stale data: {}", describe_age(.age, .max_age))]
    StaleData {
        /// Age of the last update, `None` if there never was one.
        age: Option<Duration>,
        /// Freshness window.
        max_age: Duration,
    },

    /// A frame source failed; the upstream error is passed through as is.
    #[error("{0}")]
    Acquisition(Arc<dyn StdError + Send + Sync>),

    /// A frame source returned nothing.
    #[error("source {source_name} returned no images")]
    NoFrames {
        /// Name of the frame source.
        source_name: String,
    },

    /// Configuration failed validation or parsing.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Reading frames or configuration from disk failed.
    #[error("{}: {message}", .path.display())]
    Io {
        /// File or directory that failed.
        path: PathBuf,
        /// Upstream message.
        message: String,
    },

    /// The component does not implement this reading.
    #[error("{0} is not supported")]
    Unsupported(&'static str),
}

fn describe_age(age: &Option<Duration>, max_age: &Duration) -> String {
    match age {
        Some(age) => format!("no update for {age:?}, freshness window is {max_age:?}"),
        None => format!("no update yet, freshness window is {max_age:?}"),
    }
}

impl SensorError {
    /// Wraps an upstream frame-source error.
    pub fn acquisition(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Acquisition(Arc::from(err.into()))
    }

    /// Creates a stale data error.
    #[must_use]
    pub const fn stale(age: Option<Duration>, max_age: Duration) -> Self {
        Self::StaleData { age, max_age }
    }

    /// Creates an I/O error for `path`.
    pub fn io(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
