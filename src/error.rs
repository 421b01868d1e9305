//! Error types for the mixing engine
//!
//! Expected errors use `Result<T, E>` with meaningful error enums; the audio
//! pull path never panics on a single-voice failure.

use crate::playback::state::PlaybackStatus;
use thiserror::Error;

/// Result type alias using the crate error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the mixing engine
#[derive(Debug, Error)]
pub enum Error {
    /// IO errors from file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Decoding-specific errors
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Playback-specific errors
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    /// Configuration errors (invalid rate, channels, buffer size)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Audio device errors (enumeration, open, stream build)
    #[error("Audio output error: {0}")]
    Output(String),

    /// Parameter validation errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Errors related to audio decoding
#[derive(Debug, Error)]
pub enum DecodeError {
    /// File does not exist or cannot be opened
    #[error("Audio file not found: {path}")]
    FileNotFound { path: String },

    /// Container or codec not recognized
    #[error("Unsupported audio format: {path}")]
    UnsupportedFormat { path: String },

    /// File probed but stream parameters are missing or inconsistent
    #[error("Malformed audio file: {detail}")]
    Malformed { detail: String },

    /// No decodable audio track in the container
    #[error("No audio track found in file")]
    NoAudioTrack,

    /// Too many consecutive undecodable packets
    #[error("Decode failed: {detail}")]
    DecodeFailed { detail: String },

    /// Seek target could not be reached
    #[error("Failed to seek to {position_s} s")]
    SeekFailed { position_s: f64 },
}

/// Errors related to playback state and the layer registry
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Illegal lifecycle transition; no state change was made
    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: PlaybackStatus,
        to: PlaybackStatus,
    },

    /// Layer name collision on create
    #[error("Layer '{name}' already exists")]
    LayerExists { name: String },

    /// Lookup or delete of an unknown layer
    #[error("Layer '{name}' not found")]
    LayerNotFound { name: String },
}
