//! # pgp-attest
//!
//! ASCII-armored, attached OpenPGP signatures ("attestations") over arbitrary
//! payloads, with signers identified by public key fingerprint.
//!
//! ## Features
//!
//! - **Attached signatures** that carry the payload inside the armored message
//! - **Ed25519 and RSA** keys, including keys exported by GnuPG
//! - **SHA-256** signatures, with a configurable digest allow-list on verification
//! - **Two-phase verification** that streams the payload before the verdict
//! - **JSON output** for attestations
//!
//! ## Quick Start
//!
//! ### Create a Key
//!
//! ```rust
//! use chrono::Utc;
//! use ed25519_dalek::SigningKey;
//! use pgp_attest::Key;
//! use rand::rngs::OsRng;
//!
//! let key = Key::from_ed25519(
//!     SigningKey::generate(&mut OsRng),
//!     "Alice <alice@example.com>",
//!     Utc::now(),
//! )
//! .unwrap();
//!
//! let private_block = key.armor_secret().unwrap();
//! let public_block = key.armor_public();
//! assert!(public_block.starts_with("-----BEGIN PGP PUBLIC KEY BLOCK-----"));
//! # let _ = private_block;
//! ```
//!
//! ### Sign a Payload
//!
//! ```rust
//! use chrono::Utc;
//! use ed25519_dalek::SigningKey;
//! use pgp_attest::{new_signer, Key, Signer};
//! use rand::rngs::OsRng;
//!
//! let key = Key::from_ed25519(SigningKey::generate(&mut OsRng), "Alice", Utc::now()).unwrap();
//! let signer = new_signer(key.armor_secret().unwrap().as_bytes()).unwrap();
//!
//! let attestation = signer.create_attestation(b"hello world").unwrap();
//! assert_eq!(attestation.public_key_id, key.key_id());
//! println!("{}", attestation.to_json().unwrap());
//! ```
//!
//! ### Verify an Attestation
//!
//! ```rust
//! use chrono::Utc;
//! use ed25519_dalek::SigningKey;
//! use pgp_attest::{new_signer, verify, Key, Signer};
//! use rand::rngs::OsRng;
//!
//! let key = Key::from_ed25519(SigningKey::generate(&mut OsRng), "Alice", Utc::now()).unwrap();
//! let signer = new_signer(key.armor_secret().unwrap().as_bytes()).unwrap();
//! let attestation = signer.create_attestation(b"hello world").unwrap();
//!
//! let payload = verify(&attestation.signature, key.armor_public().as_bytes()).unwrap();
//! assert_eq!(payload, b"hello world");
//! ```
//!
//! ### Stream Before Trusting
//!
//! ```rust
//! use chrono::Utc;
//! use ed25519_dalek::SigningKey;
//! use pgp_attest::{new_signer, Key, KeyRing, PgpVerifier, Signer};
//! use rand::rngs::OsRng;
//! use std::io::Read;
//!
//! let key = Key::from_ed25519(SigningKey::generate(&mut OsRng), "Alice", Utc::now()).unwrap();
//! let signer = new_signer(key.armor_secret().unwrap().as_bytes()).unwrap();
//! let attestation = signer.create_attestation(b"large payload").unwrap();
//!
//! let ring = KeyRing::from_armored(key.armor_public().as_bytes()).unwrap();
//! let mut reader = PgpVerifier::new().open(&attestation.signature, &ring).unwrap();
//!
//! // Unverified bytes: process, but do not act on them yet.
//! let mut unverified = Vec::new();
//! reader.read_to_end(&mut unverified).unwrap();
//!
//! let message = reader.finish().unwrap();
//! assert_eq!(message.payload(), unverified.as_slice());
//! assert_eq!(message.primary_fingerprint(), key.fingerprint());
//! ```

pub mod armor;
pub mod error;
pub mod hash;
pub mod keys;
pub mod packet;
pub mod signature;
pub mod signer;
pub mod verifier;

// Re-export main types for convenience
pub use error::{AttestError, Result, Stage};
pub use hash::{HashAlgorithm, SIGNING_HASH};
pub use keys::{Fingerprint, Key, KeyFlags, KeyId, KeyRing};
pub use signer::{new_signer, Attestation, PgpSigner, Signer};
pub use verifier::{
    verify, MessageReader, PgpVerifier, VerificationPolicy, VerificationState, VerifiedMessage,
    Verifier,
};
