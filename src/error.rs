//! Error type shared by every stage of the conversion pipeline.

use std::path::PathBuf;

/// Errors that can occur while loading, converting, rendering or exporting.
///
/// Missing or degenerate UVs are deliberately absent: they reduce coverage and
/// are reported through [`crate::conversion::ConversionStats`] instead.
#[derive(Debug, thiserror::Error)]
pub enum SplatError {
    /// Caller supplied an unusable value (bad resolution, unknown format, ...).
    #[error("Invalid input: {0}")]
    Input(String),
    /// The input mesh file does not exist.
    #[error("Input file does not exist: {}", .0.display())]
    MissingInput(PathBuf),
    /// The mesh loader rejected the file.
    #[error("Failed to load mesh: {0}")]
    Load(String),
    /// No GPU adapter found (neither hardware nor software fallback).
    #[error("No GPU adapter found. Neither hardware nor software rendering is available.")]
    NoGpuAdapter,
    /// Failed to create GPU device.
    #[error("Failed to create GPU device: {0}")]
    DeviceCreation(String),
    /// A buffer for the requested resolution exceeds what the device allows.
    #[error(
        "Cannot allocate {requested} bytes for {what} (device limit {limit}); retry with a smaller resolution"
    )]
    Resource {
        what: &'static str,
        requested: u64,
        limit: u64,
    },
    /// Pipeline controller was asked for a transition its state does not allow.
    #[error("Cannot {action} while pipeline is {from}")]
    InvalidTransition { from: &'static str, action: &'static str },
    /// GPU submission or readback failed.
    #[error("Render failed: {0}")]
    RenderFailed(String),
    /// Serializing splats failed.
    #[error("Export error: {0}")]
    Export(String),
    /// Image encoding/decoding failed.
    #[error("Image error: {0}")]
    Image(String),
    /// Configuration file could not be parsed.
    #[error("Config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for SplatError {
    fn from(e: serde_json::Error) -> Self {
        SplatError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SplatError>;
