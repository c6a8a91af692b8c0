//! Attestation creation.

use crate::armor::{self, Armor, BlockType};
use crate::error::{AttestError, Result};
use crate::keys::{Key, KeyRing};
use crate::packet::{write_packet, Tag};
use crate::signature::{LiteralData, OnePassSignature, SignatureBuilder, SignatureType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An armored attached signature together with the signer's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    /// Uppercase hex fingerprint of the signer's primary key.
    pub public_key_id: String,

    /// The complete `PGP SIGNATURE` armor, trailing newline included.
    #[serde(with = "armor_text")]
    pub signature: Vec<u8>,
}

impl Attestation {
    /// The signature as text. Armor is always ASCII.
    pub fn signature_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.signature).ok()
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

mod armor_text {
    use serde::{de, ser, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let text = std::str::from_utf8(bytes).map_err(<S::Error as ser::Error>::custom)?;
        serializer.serialize_str(text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        if !text.is_ascii() {
            return Err(de::Error::custom("armored signature must be ASCII"));
        }
        Ok(text.into_bytes())
    }
}

/// Something that can attest to payloads.
pub trait Signer: Send + Sync {
    /// Sign `payload`, producing an attached armored signature.
    fn create_attestation(&self, payload: &[u8]) -> Result<Attestation>;
}

/// An OpenPGP signer bound to exactly one private key.
///
/// Holds only immutable options, so one instance can be shared across
/// threads and used for any number of payloads.
#[derive(Debug, Clone)]
pub struct PgpSigner {
    key: Key,
    public_key_id: String,
    comment: Option<String>,
    file_name: String,
    creation_time: Option<DateTime<Utc>>,
}

impl PgpSigner {
    /// Create a signer from an armored private key block holding one key.
    pub fn new(private_key: &[u8]) -> Result<Self> {
        let ring = KeyRing::from_armored(private_key)?;
        if ring.len() != 1 {
            return Err(AttestError::Configuration(format!(
                "expected 1 key in keyring, got {}",
                ring.len()
            )));
        }
        let key = ring.keys()[0].clone();
        Self::from_key(key)
    }

    /// Create a signer from an already parsed key.
    pub fn from_key(key: Key) -> Result<Self> {
        let signing_key = key.signing_key().ok_or_else(|| {
            AttestError::Configuration(format!(
                "key {} has no usable secret signing key",
                key.fingerprint()
            ))
        })?;
        tracing::debug!(
            "signer ready: primary {} signs with {}",
            key.fingerprint(),
            signing_key.fingerprint()
        );

        Ok(Self {
            public_key_id: key.key_id(),
            key,
            comment: None,
            file_name: String::new(),
            creation_time: None,
        })
    }

    /// Add a `Comment` header to the armor. The comment must fit on one
    /// armor line: no control characters and no surrounding whitespace.
    pub fn with_comment<S: Into<String>>(mut self, comment: S) -> Result<Self> {
        let comment = comment.into();
        armor::check_header("Comment", &comment)?;
        self.comment = Some(comment);
        Ok(self)
    }

    /// Set the file name recorded in the literal data packet.
    pub fn with_file_name<S: Into<String>>(mut self, file_name: S) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Pin the signature creation time. Together with a deterministic
    /// signature algorithm this makes the output reproducible.
    pub fn with_creation_time(mut self, time: DateTime<Utc>) -> Self {
        self.creation_time = Some(time);
        self
    }

    /// Uppercase hex fingerprint of the primary key.
    pub fn public_key_id(&self) -> &str {
        &self.public_key_id
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Build the binary attached message: one-pass signature, literal data,
    /// signature.
    pub fn sign_message(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let signing_key = self.key.signing_key().ok_or_else(|| {
            AttestError::Signing(format!("key {} cannot sign", self.key.fingerprint()))
        })?;
        let created = self.creation_time.unwrap_or_else(Utc::now);

        let builder = SignatureBuilder::new(SignatureType::Binary, created);
        let mut ctx = builder.digest_context();
        ctx.update(payload);
        let signature = builder.sign(signing_key, ctx)?;

        let one_pass = OnePassSignature::for_signature(&signature, signing_key.key_id());
        let literal = LiteralData::binary(&self.file_name, created, payload.to_vec())?;

        let mut out = Vec::new();
        write_packet(&mut out, Tag::OnePassSignature, &one_pass.to_body());
        write_packet(&mut out, Tag::LiteralData, &literal.to_body());
        write_packet(&mut out, Tag::Signature, &signature.to_body());
        Ok(out)
    }
}

impl Signer for PgpSigner {
    fn create_attestation(&self, payload: &[u8]) -> Result<Attestation> {
        tracing::debug!("signing {} byte payload as {}", payload.len(), self.public_key_id);
        let message = self.sign_message(payload)?;

        let mut armor = Armor::new(BlockType::Signature, message);
        if let Some(comment) = &self.comment {
            armor = armor.with_header("Comment", comment.as_str())?;
        }
        let armored = armor.to_text();

        Ok(Attestation {
            public_key_id: self.public_key_id.clone(),
            signature: armored.into_bytes(),
        })
    }
}

/// Create a signer from an armored private key block holding exactly one key.
pub fn new_signer(private_key: &[u8]) -> Result<PgpSigner> {
    PgpSigner::new(private_key)
}
