//! Attestation verification.
//!
//! Verification is two-phase. [`PgpVerifier::open`] decodes the armor, walks
//! the packet stream up to the literal data and, when the message carries a
//! one-pass header, resolves the signing key. The returned [`MessageReader`]
//! streams the payload, which is unverified until [`MessageReader::finish`]
//! checks the trailing signature.

use crate::armor::{self, BlockType};
use crate::error::{AttestError, Result, Stage};
use crate::hash::{DigestContext, HashAlgorithm, TextCanonicalizer};
use crate::keys::{Fingerprint, Key, KeyPacket, KeyRing};
use crate::packet::{malformed, parse_packets, Packet, Tag};
use crate::signature::{Issuer, LiteralData, OnePassSignature, SignaturePacket, SignatureType};
use chrono::{DateTime, Utc};
use std::fmt;
use std::io::{self, Read};

/// Digest algorithms a verifier accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationPolicy {
    allowed: Vec<HashAlgorithm>,
}

impl VerificationPolicy {
    /// A policy accepting exactly the given algorithms.
    pub fn new<I: IntoIterator<Item = HashAlgorithm>>(allowed: I) -> Self {
        let mut policy = Self { allowed: Vec::new() };
        for alg in allowed {
            policy = policy.allow(alg);
        }
        policy
    }

    pub fn allow(mut self, algorithm: HashAlgorithm) -> Self {
        if !self.allowed.contains(&algorithm) {
            self.allowed.push(algorithm);
        }
        self
    }

    pub fn allows(&self, algorithm: HashAlgorithm) -> bool {
        self.allowed.contains(&algorithm)
    }

    pub fn allowed(&self) -> &[HashAlgorithm] {
        &self.allowed
    }
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self::new([
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ])
    }
}

/// Progress of a single verification.
///
/// A [`MessageReader`] reports its live state through
/// [`MessageReader::state`], and [`MessageReader::finish_with_state`] returns
/// the terminal state next to the result. A failed [`PgpVerifier::open`]
/// maps to its terminal state with `VerificationState::from(&err)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationState {
    Start,
    ArmorDecoded,
    KeyMatched,
    StreamingPayload,
    Valid,
    SignatureMismatch,
    MissingSignature,
    Error(Stage),
}

impl VerificationState {
    fn advance(&mut self, next: VerificationState) {
        tracing::debug!("verification state {} -> {}", self, next);
        *self = next;
    }

    fn fail(&mut self, err: &AttestError) {
        self.advance(Self::from(err));
    }

    /// Whether no further transition can happen.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Valid | Self::SignatureMismatch | Self::MissingSignature | Self::Error(_)
        )
    }
}

impl From<&AttestError> for VerificationState {
    fn from(err: &AttestError) -> Self {
        match err {
            AttestError::SignatureMismatch(_) => Self::SignatureMismatch,
            AttestError::MissingSignature => Self::MissingSignature,
            other => Self::Error(other.stage()),
        }
    }
}

impl fmt::Display for VerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::ArmorDecoded => f.write_str("armor decoded"),
            Self::KeyMatched => f.write_str("key matched"),
            Self::StreamingPayload => f.write_str("streaming payload"),
            Self::Valid => f.write_str("valid"),
            Self::SignatureMismatch => f.write_str("signature mismatch"),
            Self::MissingSignature => f.write_str("missing signature"),
            Self::Error(stage) => write!(f, "error during {stage}"),
        }
    }
}

/// A payload whose signature has been checked.
#[derive(Debug, Clone)]
pub struct VerifiedMessage {
    payload: Vec<u8>,
    signer: Fingerprint,
    primary: Fingerprint,
    hash: HashAlgorithm,
    signature_type: SignatureType,
    created: Option<DateTime<Utc>>,
    file_name: Vec<u8>,
    literal_date: u32,
}

impl VerifiedMessage {
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Fingerprint of the key packet (primary or subkey) that signed.
    pub fn signer_fingerprint(&self) -> Fingerprint {
        self.signer
    }

    /// Fingerprint of the signer's primary key.
    pub fn primary_fingerprint(&self) -> Fingerprint {
        self.primary
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash
    }

    pub fn signature_type(&self) -> SignatureType {
        self.signature_type
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    /// File name from the literal data packet; may be empty.
    pub fn file_name(&self) -> String {
        String::from_utf8_lossy(&self.file_name).into_owned()
    }

    /// Date from the literal data packet, if set.
    pub fn literal_date(&self) -> Option<DateTime<Utc>> {
        (self.literal_date != 0).then(|| crate::keys::from_timestamp(self.literal_date))
    }
}

/// What preceded the literal data.
#[derive(Debug)]
enum Header<'r> {
    OnePass {
        one_pass: OnePassSignature,
        key: &'r Key,
        signer: &'r KeyPacket,
    },
    SignatureFirst {
        signature: SignaturePacket,
        key: &'r Key,
        signer: &'r KeyPacket,
    },
    Unsigned,
}

/// Streams the unverified payload of an opened message.
///
/// Bytes read here carry no trust verdict. Call [`finish`] to check the
/// signature and obtain a [`VerifiedMessage`].
///
/// [`finish`]: MessageReader::finish
#[derive(Debug)]
pub struct MessageReader<'r> {
    state: VerificationState,
    policy: VerificationPolicy,
    header: Header<'r>,
    literal: LiteralData,
    position: usize,
    digest: Option<DigestContext>,
    text: Option<TextCanonicalizer>,
    trailer: Vec<Packet>,
}

fn absorb(digest: &mut Option<DigestContext>, text: &mut Option<TextCanonicalizer>, data: &[u8]) {
    if let Some(ctx) = digest.as_mut() {
        match text {
            Some(text) => text.update(ctx, data),
            None => ctx.update(data),
        }
    }
}

impl<'r> MessageReader<'r> {
    pub fn state(&self) -> VerificationState {
        self.state
    }

    /// Drain the rest of the payload, then check the signature.
    pub fn finish(self) -> Result<VerifiedMessage> {
        self.finish_with_state().1
    }

    /// Like [`finish`](Self::finish), also returning the terminal state the
    /// verification ended in.
    pub fn finish_with_state(mut self) -> (VerificationState, Result<VerifiedMessage>) {
        absorb(&mut self.digest, &mut self.text, &self.literal.data[self.position..]);
        self.position = self.literal.data.len();

        let mut state = self.state;
        let result = self.check();
        match &result {
            Ok(message) => {
                state.advance(VerificationState::Valid);
                tracing::debug!(
                    "verified {} byte payload signed by {}",
                    message.payload.len(),
                    message.signer
                );
            }
            Err(e) => state.fail(e),
        }
        (state, result)
    }

    fn check(self) -> Result<VerifiedMessage> {
        let MessageReader {
            policy,
            header,
            literal,
            digest,
            trailer,
            ..
        } = self;

        let (signature, key, signer) = match header {
            Header::Unsigned => return Err(AttestError::MissingSignature),
            Header::SignatureFirst { signature, key, signer } => {
                if let Some(extra) = trailer.first() {
                    return Err(malformed(format!(
                        "unexpected {:?} packet after literal data",
                        extra.tag
                    )));
                }
                (signature, key, signer)
            }
            Header::OnePass { one_pass, key, signer } => {
                let signature = trailing_signature(trailer)?;
                if signature.sig_type() != one_pass.sig_type
                    || signature.hash_id() != one_pass.hash_id
                    || signature.algorithm() != one_pass.algorithm
                {
                    return Err(malformed("signature does not match its one-pass header"));
                }
                if let Some(issuer) = signature.issuer() {
                    if !signer.matches(&issuer) {
                        return Err(AttestError::SignatureMismatch(format!(
                            "signature issued by {issuer}, one-pass header names {}",
                            one_pass.key_id
                        )));
                    }
                }
                (signature, key, signer)
            }
        };

        let hash = signature.hash_algorithm().ok_or_else(|| {
            AttestError::SignatureMismatch(format!(
                "unsupported hash algorithm {}",
                signature.hash_id()
            ))
        })?;
        if !policy.allows(hash) {
            return Err(AttestError::SignatureMismatch(format!(
                "hash algorithm {hash} is not allowed"
            )));
        }
        let ctx = digest.ok_or_else(|| {
            AttestError::SignatureMismatch(format!("no digest computed for {hash}"))
        })?;

        signature.verify_with(signer, ctx)?;

        Ok(VerifiedMessage {
            signer: signer.fingerprint(),
            primary: key.fingerprint(),
            hash,
            signature_type: signature.sig_type(),
            created: signature.created(),
            file_name: literal.file_name,
            literal_date: literal.date,
            payload: literal.data,
        })
    }
}

impl Read for MessageReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.literal.data[self.position..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        absorb(&mut self.digest, &mut self.text, &remaining[..n]);
        self.position += n;
        Ok(n)
    }
}

/// The single signature packet after the literal data.
fn trailing_signature(trailer: Vec<Packet>) -> Result<SignaturePacket> {
    let mut packets = trailer.into_iter();
    let packet = match packets.next() {
        None => return Err(AttestError::MissingSignature),
        Some(p) if p.tag == Tag::Signature => p,
        Some(p) => {
            return Err(malformed(format!(
                "expected a signature after literal data, found {:?}",
                p.tag
            )))
        }
    };
    if let Some(extra) = packets.next() {
        return Err(match extra.tag {
            Tag::Signature => malformed("multiple signatures are not supported"),
            tag => malformed(format!("unexpected {tag:?} packet after signature")),
        });
    }
    SignaturePacket::parse(&packet.body)
}

/// Strip marker packets and unwrap an uncompressed Compressed Data packet.
fn flatten(mut packets: Vec<Packet>) -> Result<Vec<Packet>> {
    packets.retain(|p| p.tag != Tag::Marker);
    if packets.len() != 1 || packets[0].tag != Tag::CompressedData {
        return Ok(packets);
    }
    let compressed = packets.remove(0);
    let (&algorithm, inner) = compressed
        .body
        .split_first()
        .ok_or_else(|| malformed("empty compressed data packet"))?;
    if algorithm != 0 {
        return Err(malformed(format!(
            "compression algorithm {algorithm} is not supported"
        )));
    }
    let mut inner = parse_packets(inner)?;
    inner.retain(|p| p.tag != Tag::Marker);
    Ok(inner)
}

fn document_type(sig_type: SignatureType) -> Result<()> {
    if sig_type.is_document() {
        Ok(())
    } else {
        Err(malformed(format!("{sig_type:?} is not a document signature")))
    }
}

fn find_key<'r>(ring: &'r KeyRing, issuer: &Issuer) -> Result<(&'r Key, &'r KeyPacket)> {
    ring.find_issuer(issuer).ok_or_else(|| AttestError::KeyNotFound {
        key_id: issuer.to_string(),
    })
}

/// Verifies attached OpenPGP signatures.
#[derive(Debug, Clone, Default)]
pub struct PgpVerifier {
    policy: VerificationPolicy,
}

impl PgpVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the digest allow-list.
    pub fn with_policy(mut self, policy: VerificationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &VerificationPolicy {
        &self.policy
    }

    /// Start verifying an armored attached signature against `ring`.
    pub fn open<'r>(&self, signature: &[u8], ring: &'r KeyRing) -> Result<MessageReader<'r>> {
        let mut state = VerificationState::Start;
        let result = self.open_message(signature, ring, &mut state);
        if let Err(e) = &result {
            state.fail(e);
        }
        result
    }

    fn open_message<'r>(
        &self,
        signature: &[u8],
        ring: &'r KeyRing,
        state: &mut VerificationState,
    ) -> Result<MessageReader<'r>> {
        let armor = armor::decode(signature)?;
        match armor.block_type {
            BlockType::Signature | BlockType::Message => {}
            other => {
                return Err(AttestError::ArmorFormat(format!(
                    "expected a signature block, found armor type {other}"
                )))
            }
        }
        state.advance(VerificationState::ArmorDecoded);

        let mut packets = flatten(parse_packets(&armor.body)?)?.into_iter();
        let first = packets.next().ok_or_else(|| malformed("message contains no packets"))?;

        let header = match first.tag {
            Tag::OnePassSignature => {
                let one_pass = OnePassSignature::parse(&first.body)?;
                if !one_pass.last {
                    return Err(malformed("multiple signatures are not supported"));
                }
                document_type(one_pass.sig_type)?;
                let (key, signer) = find_key(ring, &Issuer::KeyId(one_pass.key_id))?;
                Header::OnePass { one_pass, key, signer }
            }
            Tag::Signature => {
                let signature = SignaturePacket::parse(&first.body)?;
                document_type(signature.sig_type())?;
                let issuer = signature
                    .issuer()
                    .ok_or_else(|| malformed("signature carries no issuer"))?;
                let (key, signer) = find_key(ring, &issuer)?;
                Header::SignatureFirst { signature, key, signer }
            }
            Tag::LiteralData => Header::Unsigned,
            other => {
                return Err(malformed(format!(
                    "unexpected {other:?} packet at start of message"
                )))
            }
        };
        if let Header::OnePass { signer, .. } | Header::SignatureFirst { signer, .. } = &header {
            tracing::debug!("matched signing key {}", signer.fingerprint());
            state.advance(VerificationState::KeyMatched);
        }

        let literal = if first.tag == Tag::LiteralData {
            LiteralData::parse(&first.body)?
        } else {
            match packets.next() {
                Some(p) if p.tag == Tag::LiteralData => LiteralData::parse(&p.body)?,
                Some(p) => {
                    return Err(malformed(format!(
                        "expected literal data, found {:?}",
                        p.tag
                    )))
                }
                None => return Err(malformed("message contains no literal data")),
            }
        };

        let (hash_id, sig_type) = match &header {
            Header::OnePass { one_pass, .. } => (Some(one_pass.hash_id), one_pass.sig_type),
            Header::SignatureFirst { signature, .. } => {
                (Some(signature.hash_id()), signature.sig_type())
            }
            Header::Unsigned => (None, SignatureType::Binary),
        };
        let digest = hash_id
            .and_then(HashAlgorithm::from_id)
            .filter(|alg| self.policy.allows(*alg))
            .map(HashAlgorithm::context);
        let text = (sig_type == SignatureType::Text).then(TextCanonicalizer::default);

        state.advance(VerificationState::StreamingPayload);
        Ok(MessageReader {
            state: *state,
            policy: self.policy.clone(),
            header,
            literal,
            position: 0,
            digest,
            text,
            trailer: packets.collect(),
        })
    }

    /// Verify against an already loaded key ring and return the payload.
    pub fn verify_with_ring(&self, signature: &[u8], ring: &KeyRing) -> Result<Vec<u8>> {
        Ok(self.open(signature, ring)?.finish()?.into_payload())
    }
}

/// Something that can check attestations.
pub trait Verifier: Send + Sync {
    /// Check `signature` against the armored `public_key` block and return
    /// the signed payload.
    fn verify(&self, signature: &[u8], public_key: &[u8]) -> Result<Vec<u8>>;
}

impl Verifier for PgpVerifier {
    fn verify(&self, signature: &[u8], public_key: &[u8]) -> Result<Vec<u8>> {
        let ring = KeyRing::from_armored(public_key)?;
        self.verify_with_ring(signature, &ring)
    }
}

/// Verify with the default policy.
pub fn verify(signature: &[u8], public_key: &[u8]) -> Result<Vec<u8>> {
    PgpVerifier::default().verify(signature, public_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::write_packet;
    use crate::signer::{PgpSigner, Signer};
    use chrono::TimeZone;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn fresh_key() -> Key {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        Key::from_ed25519(SigningKey::generate(&mut OsRng), "Test <test@example.com>", created)
            .unwrap()
    }

    fn signed(key: &Key, payload: &[u8]) -> Vec<u8> {
        PgpSigner::from_key(key.clone())
            .unwrap()
            .create_attestation(payload)
            .unwrap()
            .signature
    }

    fn rearmor(packets: &[Packet]) -> Vec<u8> {
        let mut body = Vec::new();
        for p in packets {
            write_packet(&mut body, p.tag, &p.body);
        }
        armor::encode(&BlockType::Message, &body).into_bytes()
    }

    fn message_packets(key: &Key, payload: &[u8]) -> Vec<Packet> {
        parse_packets(&armor::decode(&signed(key, payload)).unwrap().body).unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let key = fresh_key();
        let ring = KeyRing::from_keys(vec![key.to_public()]);
        let payload = PgpVerifier::new()
            .verify_with_ring(&signed(&key, b"payload"), &ring)
            .unwrap();
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn test_two_phase_reader() {
        let key = fresh_key();
        let ring = KeyRing::from_keys(vec![key.clone()]);
        let signature = signed(&key, b"streamed payload");

        let mut reader = PgpVerifier::new().open(&signature, &ring).unwrap();
        assert_eq!(reader.state(), VerificationState::StreamingPayload);

        let mut head = [0u8; 8];
        reader.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"streamed");

        let (state, message) = reader.finish_with_state();
        assert_eq!(state, VerificationState::Valid);
        assert!(state.is_terminal());
        let message = message.unwrap();
        assert_eq!(message.payload(), b"streamed payload");
        assert_eq!(message.primary_fingerprint(), key.fingerprint());
        assert_eq!(message.signer_fingerprint(), key.fingerprint());
        assert_eq!(message.hash_algorithm(), HashAlgorithm::Sha256);
        assert!(message.created().is_some());
    }

    #[test]
    fn test_unknown_key_fails_at_open() {
        let signature = signed(&fresh_key(), b"x");
        let ring = KeyRing::from_keys(vec![fresh_key()]);
        let err = PgpVerifier::new().open(&signature, &ring).unwrap_err();
        assert!(matches!(err, AttestError::KeyNotFound { .. }));
        assert_eq!(
            VerificationState::from(&err),
            VerificationState::Error(Stage::KeyLookup)
        );
    }

    #[test]
    fn test_terminal_states() {
        let key = fresh_key();
        let ring = KeyRing::from_keys(vec![key.clone()]);
        let verifier = PgpVerifier::new();

        let mut packets = message_packets(&key, b"original");
        let mut literal = LiteralData::parse(&packets[1].body).unwrap();
        literal.data = b"forged!!".to_vec();
        packets[1].body = literal.to_body();
        let forged = rearmor(&packets);
        let (state, result) = verifier.open(&forged, &ring).unwrap().finish_with_state();
        assert_eq!(state, VerificationState::SignatureMismatch);
        assert!(matches!(result, Err(AttestError::SignatureMismatch(_))));

        let unsigned = rearmor(&packets[1..2]);
        let reader = verifier.open(&unsigned, &ring).unwrap();
        assert_eq!(reader.state(), VerificationState::StreamingPayload);
        assert!(!reader.state().is_terminal());
        let (state, result) = reader.finish_with_state();
        assert_eq!(state, VerificationState::MissingSignature);
        assert!(state.is_terminal());
        assert!(matches!(result, Err(AttestError::MissingSignature)));

        let reader = verifier.open(&signed(&key, b"ok"), &ring).unwrap();
        let (state, result) = reader.finish_with_state();
        assert_eq!(state, VerificationState::Valid);
        assert_eq!(result.unwrap().payload(), b"ok");

        let err = verifier.open(b"not armor", &ring).unwrap_err();
        assert_eq!(
            VerificationState::from(&err),
            VerificationState::Error(Stage::ArmorDecoding)
        );
    }

    #[test]
    fn test_signature_first_layout() {
        let key = fresh_key();
        let packets = message_packets(&key, b"reordered");
        let reordered = rearmor(&[packets[2].clone(), packets[1].clone()]);

        let ring = KeyRing::from_keys(vec![key]);
        let payload = PgpVerifier::new().verify_with_ring(&reordered, &ring).unwrap();
        assert_eq!(payload, b"reordered");
    }

    #[test]
    fn test_signature_first_with_key_id_issuer() {
        let key = fresh_key();
        let signing = key.signing_key().unwrap();
        let created = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();

        // Creation time hashed, issuer key ID unhashed, no issuer fingerprint.
        let mut hashed = vec![5, 2];
        hashed.extend_from_slice(&(created.timestamp() as u32).to_be_bytes());
        let mut unhashed = vec![9, 16];
        unhashed.extend_from_slice(signing.key_id().as_bytes());

        let mut ctx = crate::hash::SIGNING_HASH.context();
        ctx.update(b"legacy issuer");
        let signature =
            SignaturePacket::sign_areas(SignatureType::Binary, signing, hashed, unhashed, ctx)
                .unwrap();
        assert_eq!(signature.issuer(), Some(Issuer::KeyId(signing.key_id())));

        let literal = LiteralData::binary("", created, b"legacy issuer".to_vec()).unwrap();
        let message = rearmor(&[
            Packet {
                tag: Tag::Signature,
                body: signature.to_body(),
            },
            Packet {
                tag: Tag::LiteralData,
                body: literal.to_body(),
            },
        ]);

        let ring = KeyRing::from_keys(vec![key.to_public()]);
        let verified = PgpVerifier::new().open(&message, &ring).unwrap().finish().unwrap();
        assert_eq!(verified.payload(), b"legacy issuer");
        assert_eq!(verified.primary_fingerprint(), key.fingerprint());
        assert_eq!(verified.created(), Some(created));
    }

    #[test]
    fn test_uncompressed_wrapper_accepted() {
        let key = fresh_key();
        let mut inner = vec![0u8];
        for p in message_packets(&key, b"wrapped") {
            write_packet(&mut inner, p.tag, &p.body);
        }
        let wrapped = rearmor(&[Packet {
            tag: Tag::CompressedData,
            body: inner,
        }]);

        let ring = KeyRing::from_keys(vec![key]);
        assert_eq!(PgpVerifier::new().verify_with_ring(&wrapped, &ring).unwrap(), b"wrapped");
    }

    #[test]
    fn test_zlib_rejected() {
        let key = fresh_key();
        let wrapped = rearmor(&[Packet {
            tag: Tag::CompressedData,
            body: vec![2, 0x78, 0x9C],
        }]);
        let ring = KeyRing::from_keys(vec![key]);
        let err = PgpVerifier::new().verify_with_ring(&wrapped, &ring).unwrap_err();
        assert!(matches!(err, AttestError::MalformedPacket(_)));
    }

    #[test]
    fn test_missing_signature() {
        let key = fresh_key();
        let packets = message_packets(&key, b"unsigned");
        let ring = KeyRing::from_keys(vec![key]);

        let truncated = rearmor(&packets[..2]);
        let err = PgpVerifier::new().verify_with_ring(&truncated, &ring).unwrap_err();
        assert!(matches!(err, AttestError::MissingSignature));

        let bare = rearmor(&packets[1..2]);
        let err = PgpVerifier::new().verify_with_ring(&bare, &ring).unwrap_err();
        assert!(matches!(err, AttestError::MissingSignature));
    }

    #[test]
    fn test_multiple_signatures_rejected() {
        let key = fresh_key();
        let packets = message_packets(&key, b"twice");
        let doubled = rearmor(&[
            packets[0].clone(),
            packets[1].clone(),
            packets[2].clone(),
            packets[2].clone(),
        ]);
        let ring = KeyRing::from_keys(vec![key]);
        let err = PgpVerifier::new().verify_with_ring(&doubled, &ring).unwrap_err();
        assert!(matches!(err, AttestError::MalformedPacket(_)));
    }

    #[test]
    fn test_replaced_payload_mismatch() {
        let key = fresh_key();
        let mut packets = message_packets(&key, b"original");
        let mut literal = LiteralData::parse(&packets[1].body).unwrap();
        literal.data = b"forged!!".to_vec();
        packets[1].body = literal.to_body();

        let ring = KeyRing::from_keys(vec![key]);
        let err = PgpVerifier::new()
            .verify_with_ring(&rearmor(&packets), &ring)
            .unwrap_err();
        assert!(matches!(err, AttestError::SignatureMismatch(_)));
    }

    #[test]
    fn test_policy_rejects_disallowed_hash() {
        let key = fresh_key();
        let ring = KeyRing::from_keys(vec![key.clone()]);
        let verifier =
            PgpVerifier::new().with_policy(VerificationPolicy::new([HashAlgorithm::Sha512]));
        let err = verifier.verify_with_ring(&signed(&key, b"x"), &ring).unwrap_err();
        assert!(matches!(err, AttestError::SignatureMismatch(_)));
    }

    #[test]
    fn test_key_block_is_not_a_signature() {
        let key = fresh_key();
        let ring = KeyRing::from_keys(vec![key.clone()]);
        let err = PgpVerifier::new()
            .verify_with_ring(key.armor_public().as_bytes(), &ring)
            .unwrap_err();
        assert!(matches!(err, AttestError::ArmorFormat(_)));
    }

    #[test]
    fn test_default_policy() {
        let policy = VerificationPolicy::default();
        assert!(policy.allows(HashAlgorithm::Sha256));
        assert!(policy.allows(HashAlgorithm::Sha512));
        assert!(!policy.allows(HashAlgorithm::Sha1));
        assert!(!policy.allows(HashAlgorithm::Sha224));
    }
}
