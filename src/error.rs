//! Error types for the pgp-attest library.

use std::fmt;
use thiserror::Error;

/// The main error type for pgp-attest operations.
///
/// Every variant belongs to exactly one [`Stage`], available through
/// [`AttestError::stage`]. Errors are permanent: malformed input stays
/// malformed, so nothing in this crate retries.
#[derive(Error, Debug)]
pub enum AttestError {
    /// The key ring handed to a signer cannot back one.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Armored or binary key material could not be parsed.
    #[error("Key parse error: {0}")]
    KeyParse(String),

    /// The ASCII armor framing is broken.
    #[error("Armor format error: {0}")]
    ArmorFormat(String),

    /// The packet stream inside a signature is not a supported attached message.
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    /// No key in the ring matches the signature issuer.
    #[error("No key in the key ring matches issuer {key_id}")]
    KeyNotFound { key_id: String },

    /// The signature does not validate over the recovered payload.
    #[error("Signature mismatch: {0}")]
    SignatureMismatch(String),

    /// The message ended without a signature packet.
    #[error("Message contains no signature")]
    MissingSignature,

    /// Producing a signature failed.
    #[error("Signing error: {0}")]
    Signing(String),

    /// Error reading or writing buffers.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error with JSON serialization/deserialization.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The processing stage that produced an [`AttestError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    SignerSetup,
    KeyLoading,
    ArmorDecoding,
    PacketParsing,
    KeyLookup,
    Verification,
    Signing,
    Io,
    Serialization,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::SignerSetup => "signer setup",
            Stage::KeyLoading => "key loading",
            Stage::ArmorDecoding => "armor decoding",
            Stage::PacketParsing => "packet parsing",
            Stage::KeyLookup => "key lookup",
            Stage::Verification => "verification",
            Stage::Signing => "signing",
            Stage::Io => "io",
            Stage::Serialization => "serialization",
        };
        f.write_str(name)
    }
}

impl AttestError {
    /// The stage this error was raised in.
    pub fn stage(&self) -> Stage {
        match self {
            AttestError::Configuration(_) => Stage::SignerSetup,
            AttestError::KeyParse(_) => Stage::KeyLoading,
            AttestError::ArmorFormat(_) => Stage::ArmorDecoding,
            AttestError::MalformedPacket(_) => Stage::PacketParsing,
            AttestError::KeyNotFound { .. } => Stage::KeyLookup,
            AttestError::SignatureMismatch(_) | AttestError::MissingSignature => {
                Stage::Verification
            }
            AttestError::Signing(_) => Stage::Signing,
            AttestError::Io(_) => Stage::Io,
            AttestError::Json(_) => Stage::Serialization,
        }
    }

    /// Re-tag armor and packet failures raised while loading keys.
    pub(crate) fn into_key_parse(self) -> Self {
        match self {
            AttestError::ArmorFormat(msg) | AttestError::MalformedPacket(msg) => {
                AttestError::KeyParse(msg)
            }
            other => other,
        }
    }
}

/// Result type alias for pgp-attest operations.
pub type Result<T> = std::result::Result<T, AttestError>;
