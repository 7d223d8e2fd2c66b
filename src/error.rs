//! Error types for the broadcast engine

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote media catalog errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog unreachable: {0}")]
    Unreachable(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Collection contains no playable tracks")]
    EmptyCollection,

    #[error("Track not found: {0}")]
    NotFound(String),

    #[error("Unexpected catalog response: {0}")]
    BadResponse(String),
}

/// Transcoding errors
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Encoder unavailable: {0}")]
    EncoderUnavailable(String),

    #[error("Decode/encode failed: {0}")]
    DecodeFailed(String),

    #[error("Failed reading source audio: {0}")]
    SourceRead(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
