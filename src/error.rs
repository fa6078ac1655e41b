//! src/error.rs
//!
//! Defines the library's custom, comprehensive `Error` enum using `thiserror`.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cryptography error: {0}")]
    Crypto(#[from] ed25519_dalek::SignatureError),

    #[error("Invalid identity key file")]
    InvalidKeyFile,

    /// Recoverable at edge construction: the overlay already holds its
    /// configured peering degree of connections.
    #[error("Peering degree reached")]
    PeeringDegreeReached,

    /// Fatal: a published payload did not match the fixed packet size. This
    /// indicates an implementation bug, not a network condition, so callers
    /// are expected to abort the offending iteration rather than retry.
    #[error("Size invariant violation: expected {expected} bytes, got {actual}")]
    SizeInvariant { expected: usize, actual: usize },

    #[error("Sphinx packet build failed: {0}")]
    PacketBuild(String),
}
