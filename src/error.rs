//! Error types for the export pipeline

use std::fmt;
use thiserror::Error;

/// Result type alias for export operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which live source a request was missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Map,
    Grid,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Map => f.write_str("map"),
            SourceKind::Grid => f.write_str("grid"),
        }
    }
}

/// Which rasterizer failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterTarget {
    Map,
    Grid,
}

impl fmt::Display for RasterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterTarget::Map => f.write_str("map"),
            RasterTarget::Grid => f.write_str("grid"),
        }
    }
}

/// Errors that can occur while exporting
#[derive(Error, Debug)]
pub enum Error {
    /// The map or grid handle was absent; nothing was allocated
    #[error("Missing export source: {0}")]
    MissingSourceError(SourceKind),

    /// Capturing one of the surfaces failed
    #[error("Rasterization of {0} failed: {1}")]
    RasterizationError(RasterTarget, String),

    /// Allocating or drawing the composite canvas failed
    #[error("Composition failed: {0}")]
    CompositionError(String),

    /// A node could not be attached to the document
    #[error("Failed to attach node: {0}")]
    AttachError(String),

    /// Encoding or saving the image failed
    #[error("Failed to emit image: {0}")]
    EmitError(String),

    /// An export is already running for this pipeline
    #[error("An export is already running")]
    Busy,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a map rasterization failure
    pub fn map_raster(msg: impl Into<String>) -> Self {
        Error::RasterizationError(RasterTarget::Map, msg.into())
    }

    /// Shorthand for a grid rasterization failure
    pub fn grid_raster(msg: impl Into<String>) -> Self {
        Error::RasterizationError(RasterTarget::Grid, msg.into())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::EmitError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}
