//! OpenPGP key material: key packets, fingerprints, transferable keys and
//! key rings.

use crate::armor::{self, BlockType};
use crate::error::{AttestError, Result};
use crate::hash::{HashAlgorithm, DigestContext, SIGNING_HASH};
use crate::packet::{self, left_pad, malformed, write_mpi, write_packet, Packet, Reader, Tag};
use crate::signature::{Issuer, SignatureBuilder, SignaturePacket, SignatureType, SignatureValue};
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer as DalekSigner, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use std::fmt;

/// Object identifier of Curve25519 in its Ed25519 signing role.
const ED25519_OID: [u8; 9] = [0x2B, 0x06, 0x01, 0x04, 0x01, 0xDA, 0x47, 0x0F, 0x01];

/// Largest RSA modulus accepted when loading keys.
const RSA_MAX_BITS: usize = 16384;

bitflags! {
    /// Key usage flags from a self-signature.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct KeyFlags: u8 {
        const CERTIFY = 0x01;
        const SIGN = 0x02;
        const ENCRYPT_COMMUNICATIONS = 0x04;
        const ENCRYPT_STORAGE = 0x08;
        const SPLIT = 0x10;
        const AUTHENTICATION = 0x20;
        const GROUP = 0x80;
    }
}

/// OpenPGP public-key algorithm identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublicKeyAlgorithm {
    Rsa,
    RsaEncryptOnly,
    RsaSignOnly,
    ElGamal,
    Dsa,
    Ecdh,
    Ecdsa,
    EdDsaLegacy,
    X25519,
    X448,
    Ed25519,
    Ed448,
    Other(u8),
}

impl PublicKeyAlgorithm {
    pub fn from_id(id: u8) -> Self {
        match id {
            1 => Self::Rsa,
            2 => Self::RsaEncryptOnly,
            3 => Self::RsaSignOnly,
            16 => Self::ElGamal,
            17 => Self::Dsa,
            18 => Self::Ecdh,
            19 => Self::Ecdsa,
            22 => Self::EdDsaLegacy,
            25 => Self::X25519,
            26 => Self::X448,
            27 => Self::Ed25519,
            28 => Self::Ed448,
            other => Self::Other(other),
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Self::Rsa => 1,
            Self::RsaEncryptOnly => 2,
            Self::RsaSignOnly => 3,
            Self::ElGamal => 16,
            Self::Dsa => 17,
            Self::Ecdh => 18,
            Self::Ecdsa => 19,
            Self::EdDsaLegacy => 22,
            Self::X25519 => 25,
            Self::X448 => 26,
            Self::Ed25519 => 27,
            Self::Ed448 => 28,
            Self::Other(id) => id,
        }
    }

    /// Whether this crate can sign and verify with the algorithm.
    pub fn is_supported_signer(self) -> bool {
        matches!(
            self,
            Self::Rsa | Self::RsaSignOnly | Self::EdDsaLegacy | Self::Ed25519
        )
    }
}

/// A v4 key fingerprint: SHA-1 over the public key packet.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 20]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// The 64-bit key ID: the low 8 bytes of the fingerprint.
    pub fn key_id(&self) -> KeyId {
        let mut id = [0u8; 8];
        id.copy_from_slice(&self.0[12..]);
        KeyId(id)
    }

    /// Uppercase hexadecimal encoding.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

/// A 64-bit OpenPGP key ID.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId([u8; 8]);

impl KeyId {
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self.to_hex())
    }
}

/// Public key parameters this crate can use.
#[derive(Debug, Clone)]
pub enum PublicParams {
    Rsa(RsaPublicKey),
    Ed25519(VerifyingKey),
    /// Parsed for its length only: fingerprints work, cryptography does not.
    Unsupported,
}

/// Secret key parameters.
#[derive(Clone)]
pub enum SecretParams {
    Rsa(RsaPrivateKey),
    Ed25519(SigningKey),
    /// Protected by a passphrase; never decrypted here.
    Locked,
    Unsupported,
}

impl fmt::Debug for SecretParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            SecretParams::Rsa(_) => "Rsa",
            SecretParams::Ed25519(_) => "Ed25519",
            SecretParams::Locked => "Locked",
            SecretParams::Unsupported => "Unsupported",
        };
        write!(f, "SecretParams::{kind}(..)")
    }
}

pub(crate) fn to_timestamp(time: DateTime<Utc>) -> Result<u32> {
    u32::try_from(time.timestamp()).map_err(|_| {
        AttestError::Signing(format!("timestamp {time} does not fit an OpenPGP time field"))
    })
}

pub(crate) fn from_timestamp(secs: u32) -> DateTime<Utc> {
    DateTime::from_timestamp(i64::from(secs), 0).unwrap_or_default()
}

fn pkcs1v15(hash: HashAlgorithm) -> Pkcs1v15Sign {
    match hash {
        HashAlgorithm::Sha1 => Pkcs1v15Sign::new::<sha1::Sha1>(),
        HashAlgorithm::Sha224 => Pkcs1v15Sign::new::<sha2::Sha224>(),
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
        HashAlgorithm::Sha384 => Pkcs1v15Sign::new::<sha2::Sha384>(),
        HashAlgorithm::Sha512 => Pkcs1v15Sign::new::<sha2::Sha512>(),
    }
}

fn mismatch<S: Into<String>>(msg: S) -> AttestError {
    AttestError::SignatureMismatch(msg.into())
}

fn read_oid<'a>(reader: &mut Reader<'a>) -> Result<&'a [u8]> {
    let len = reader.read_u8()?;
    if len == 0 || len == 0xFF {
        return Err(malformed(format!("reserved curve OID length {len}")));
    }
    reader.take(usize::from(len))
}

/// Parse the algorithm-specific public fields, leaving the reader after them.
fn read_public_params(
    reader: &mut Reader<'_>,
    algorithm: PublicKeyAlgorithm,
) -> Result<PublicParams> {
    use PublicKeyAlgorithm as A;
    let params = match algorithm {
        A::Rsa | A::RsaEncryptOnly | A::RsaSignOnly => {
            let n = BigUint::from_bytes_be(reader.read_mpi()?);
            let e = BigUint::from_bytes_be(reader.read_mpi()?);
            let key = RsaPublicKey::new_with_max_size(n, e, RSA_MAX_BITS)
                .map_err(|e| malformed(format!("invalid RSA public key: {e}")))?;
            PublicParams::Rsa(key)
        }
        A::Dsa => {
            for _ in 0..4 {
                reader.read_mpi()?;
            }
            PublicParams::Unsupported
        }
        A::ElGamal => {
            for _ in 0..3 {
                reader.read_mpi()?;
            }
            PublicParams::Unsupported
        }
        A::Ecdsa => {
            read_oid(reader)?;
            reader.read_mpi()?;
            PublicParams::Unsupported
        }
        A::Ecdh => {
            read_oid(reader)?;
            reader.read_mpi()?;
            let kdf_len = reader.read_u8()?;
            reader.take(usize::from(kdf_len))?;
            PublicParams::Unsupported
        }
        A::EdDsaLegacy => {
            let oid = read_oid(reader)?;
            let point = reader.read_mpi()?;
            if oid != ED25519_OID {
                PublicParams::Unsupported
            } else {
                // Native point encoding: 0x40 prefix followed by 32 bytes.
                match point {
                    [0x40, rest @ ..] if rest.len() == 32 => {
                        PublicParams::Ed25519(parse_ed25519_public(rest)?)
                    }
                    _ => return Err(malformed("invalid Ed25519 point encoding")),
                }
            }
        }
        A::Ed25519 => PublicParams::Ed25519(parse_ed25519_public(reader.take(32)?)?),
        A::X25519 => {
            reader.take(32)?;
            PublicParams::Unsupported
        }
        A::X448 => {
            reader.take(56)?;
            PublicParams::Unsupported
        }
        A::Ed448 => {
            reader.take(57)?;
            PublicParams::Unsupported
        }
        A::Other(id) => {
            return Err(malformed(format!("unknown public-key algorithm {id}")));
        }
    };
    Ok(params)
}

fn parse_ed25519_public(bytes: &[u8]) -> Result<VerifyingKey> {
    let mut arr = [0u8; 32];
    arr.copy_from_slice(bytes);
    VerifyingKey::from_bytes(&arr)
        .map_err(|e| malformed(format!("invalid Ed25519 public key: {e}")))
}

/// Parse unprotected secret fields and check the two-octet checksum.
fn read_secret_params(
    reader: &mut Reader<'_>,
    algorithm: PublicKeyAlgorithm,
    public: &PublicParams,
) -> Result<SecretParams> {
    use PublicKeyAlgorithm as A;
    let start = reader.position();
    let params = match (algorithm, public) {
        (A::Rsa | A::RsaEncryptOnly | A::RsaSignOnly, PublicParams::Rsa(public)) => {
            let d = BigUint::from_bytes_be(reader.read_mpi()?);
            let p = BigUint::from_bytes_be(reader.read_mpi()?);
            let q = BigUint::from_bytes_be(reader.read_mpi()?);
            let _u = reader.read_mpi()?;
            let (n, e) = (public.n().clone(), public.e().clone());
            let key = RsaPrivateKey::from_components(n, e, d, vec![p, q])
                .map_err(|err| malformed(format!("invalid RSA secret key: {err}")))?;
            SecretParams::Rsa(key)
        }
        (A::EdDsaLegacy, PublicParams::Ed25519(public)) => {
            let seed = left_pad(reader.read_mpi()?, 32)
                .ok_or_else(|| malformed("Ed25519 secret scalar is too long"))?;
            SecretParams::Ed25519(ed25519_signing_key(&seed, public)?)
        }
        (A::Ed25519, PublicParams::Ed25519(public)) => {
            SecretParams::Ed25519(ed25519_signing_key(reader.take(32)?, public)?)
        }
        _ => return Ok(SecretParams::Unsupported),
    };

    let secret_bytes = &reader.consumed()[start..];
    let expected = reader.read_u16()?;
    let actual = secret_bytes.iter().fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)));
    if expected != actual {
        return Err(malformed("secret key checksum mismatch"));
    }
    Ok(params)
}

fn ed25519_signing_key(seed: &[u8], public: &VerifyingKey) -> Result<SigningKey> {
    let mut arr = [0u8; 32];
    arr.copy_from_slice(seed);
    let key = SigningKey::from_bytes(&arr);
    if key.verifying_key() != *public {
        return Err(malformed("Ed25519 secret key does not match its public key"));
    }
    Ok(key)
}

/// A single primary key or subkey packet.
#[derive(Debug, Clone)]
pub struct KeyPacket {
    created: u32,
    algorithm: PublicKeyAlgorithm,
    public: PublicParams,
    secret: Option<SecretParams>,
    public_body: Vec<u8>,
    secret_body: Option<Vec<u8>>,
    fingerprint: Fingerprint,
}

impl KeyPacket {
    /// Parse a public or secret key packet body.
    pub fn parse(body: &[u8], has_secret: bool) -> Result<Self> {
        let mut reader = Reader::new(body);
        let version = reader.read_u8()?;
        if version != 4 {
            return Err(malformed(format!("unsupported key packet version {version}")));
        }
        let created = reader.read_u32()?;
        let algorithm = PublicKeyAlgorithm::from_id(reader.read_u8()?);
        let public = read_public_params(&mut reader, algorithm)?;
        let public_len = reader.position();

        let (secret, secret_body) = if has_secret {
            let usage = reader.read_u8()?;
            let secret = if usage == 0 {
                read_secret_params(&mut reader, algorithm, &public)?
            } else {
                SecretParams::Locked
            };
            (Some(secret), Some(body[public_len..].to_vec()))
        } else {
            if !reader.is_empty() {
                return Err(malformed("trailing data after public key fields"));
            }
            (None, None)
        };

        let public_body = body[..public_len].to_vec();
        Ok(Self {
            created,
            algorithm,
            public,
            secret,
            fingerprint: compute_fingerprint(&public_body),
            public_body,
            secret_body,
        })
    }

    /// Wrap an Ed25519 signing key as a legacy EdDSA key packet, the encoding
    /// GnuPG uses for v4 Ed25519 keys.
    pub fn from_ed25519(signing_key: SigningKey, created: DateTime<Utc>) -> Result<Self> {
        let created = to_timestamp(created)?;
        let algorithm = PublicKeyAlgorithm::EdDsaLegacy;

        let mut public_body = vec![4];
        public_body.extend_from_slice(&created.to_be_bytes());
        public_body.push(algorithm.id());
        public_body.push(ED25519_OID.len() as u8);
        public_body.extend_from_slice(&ED25519_OID);
        let mut point = vec![0x40];
        point.extend_from_slice(signing_key.verifying_key().as_bytes());
        write_mpi(&mut public_body, &point);

        let mut secret_mpi = Vec::new();
        write_mpi(&mut secret_mpi, signing_key.as_bytes());
        let checksum = secret_mpi.iter().fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)));
        let mut secret_body = vec![0];
        secret_body.extend_from_slice(&secret_mpi);
        secret_body.extend_from_slice(&checksum.to_be_bytes());

        Ok(Self {
            created,
            algorithm,
            public: PublicParams::Ed25519(signing_key.verifying_key()),
            secret: Some(SecretParams::Ed25519(signing_key)),
            fingerprint: compute_fingerprint(&public_body),
            public_body,
            secret_body: Some(secret_body),
        })
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn key_id(&self) -> KeyId {
        self.fingerprint.key_id()
    }

    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        self.algorithm
    }

    pub fn created(&self) -> DateTime<Utc> {
        from_timestamp(self.created)
    }

    pub fn public_params(&self) -> &PublicParams {
        &self.public
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Whether the secret material is present, unlocked and usable here.
    pub fn has_usable_secret(&self) -> bool {
        matches!(
            self.secret,
            Some(SecretParams::Rsa(_)) | Some(SecretParams::Ed25519(_))
        )
    }

    /// Whether the algorithm and parameters allow signatures at all.
    pub fn is_signing_algorithm(&self) -> bool {
        self.algorithm.is_supported_signer() && !matches!(self.public, PublicParams::Unsupported)
    }

    pub fn matches(&self, issuer: &Issuer) -> bool {
        match issuer {
            Issuer::Fingerprint(fp) => *fp == self.fingerprint,
            Issuer::KeyId(id) => *id == self.key_id(),
        }
    }

    /// Feed the public key, framed as for fingerprints and key signatures.
    pub fn hash_into(&self, ctx: &mut DigestContext) {
        ctx.update(&[0x99]);
        ctx.update(&(self.public_body.len() as u16).to_be_bytes());
        ctx.update(&self.public_body);
    }

    /// Sign a finished digest with the secret key.
    pub fn sign(&self, hash: HashAlgorithm, digest: &[u8]) -> Result<SignatureValue> {
        if !self.is_signing_algorithm() {
            return Err(AttestError::Signing(format!(
                "key {} uses {:?}, which cannot sign",
                self.fingerprint, self.algorithm
            )));
        }
        match &self.secret {
            Some(SecretParams::Rsa(key)) => key
                .sign_with_rng(&mut OsRng, pkcs1v15(hash), digest)
                .map(SignatureValue::Rsa)
                .map_err(|e| AttestError::Signing(format!("RSA signing failed: {e}"))),
            Some(SecretParams::Ed25519(key)) => {
                let bytes = key.sign(digest).to_bytes();
                Ok(match self.algorithm {
                    PublicKeyAlgorithm::Ed25519 => SignatureValue::Ed25519(bytes),
                    _ => SignatureValue::EdDsa {
                        r: bytes[..32].to_vec(),
                        s: bytes[32..].to_vec(),
                    },
                })
            }
            Some(SecretParams::Locked) => Err(AttestError::Signing(format!(
                "secret key {} is passphrase-protected",
                self.fingerprint
            ))),
            _ => Err(AttestError::Signing(format!(
                "key {} has no usable secret material",
                self.fingerprint
            ))),
        }
    }

    /// Check a signature value over a finished digest.
    pub fn verify(&self, hash: HashAlgorithm, digest: &[u8], value: &SignatureValue) -> Result<()> {
        match (&self.public, value) {
            (PublicParams::Rsa(key), SignatureValue::Rsa(sig)) => {
                let sig = left_pad(sig, key.size())
                    .ok_or_else(|| mismatch("RSA signature is longer than the modulus"))?;
                key.verify(pkcs1v15(hash), digest, &sig)
                    .map_err(|_| mismatch("RSA signature does not verify"))
            }
            (PublicParams::Ed25519(key), SignatureValue::EdDsa { r, s }) => {
                let r = left_pad(r, 32).ok_or_else(|| mismatch("EdDSA R value is too long"))?;
                let s = left_pad(s, 32).ok_or_else(|| mismatch("EdDSA S value is too long"))?;
                let mut bytes = [0u8; 64];
                bytes[..32].copy_from_slice(&r);
                bytes[32..].copy_from_slice(&s);
                verify_ed25519(key, digest, &bytes)
            }
            (PublicParams::Ed25519(key), SignatureValue::Ed25519(bytes)) => {
                verify_ed25519(key, digest, bytes)
            }
            _ => Err(mismatch(format!(
                "signature algorithm does not match key {} ({:?})",
                self.fingerprint, self.algorithm
            ))),
        }
    }

    /// Write the key packet, in secret form when `with_secret` is set and
    /// secret material is present.
    fn write_key_packet(&self, out: &mut Vec<u8>, subkey: bool, with_secret: bool) {
        let secret = self.secret_body.as_deref().filter(|_| with_secret);
        let tag = match (subkey, secret.is_some()) {
            (false, false) => Tag::PublicKey,
            (false, true) => Tag::SecretKey,
            (true, false) => Tag::PublicSubkey,
            (true, true) => Tag::SecretSubkey,
        };
        let mut body = self.public_body.clone();
        if let Some(secret) = secret {
            body.extend_from_slice(secret);
        }
        write_packet(out, tag, &body);
    }

    fn without_secret(&self) -> Self {
        Self {
            secret: None,
            secret_body: None,
            ..self.clone()
        }
    }
}

fn verify_ed25519(key: &VerifyingKey, digest: &[u8], bytes: &[u8; 64]) -> Result<()> {
    let signature = ed25519_dalek::Signature::from_bytes(bytes);
    key.verify_strict(digest, &signature)
        .map_err(|_| mismatch("Ed25519 signature does not verify"))
}

fn compute_fingerprint(public_body: &[u8]) -> Fingerprint {
    let mut ctx = HashAlgorithm::Sha1.context();
    ctx.update(&[0x99]);
    ctx.update(&(public_body.len() as u16).to_be_bytes());
    ctx.update(public_body);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ctx.finalize());
    Fingerprint(out)
}

/// A user ID together with the signatures on it.
#[derive(Debug, Clone)]
pub struct UserId {
    raw: Vec<u8>,
    signatures: Vec<SignaturePacket>,
}

impl UserId {
    /// The user ID text; invalid UTF-8 is replaced.
    pub fn value(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn signatures(&self) -> &[SignaturePacket] {
        &self.signatures
    }
}

fn hash_user_id(ctx: &mut DigestContext, raw: &[u8]) {
    ctx.update(&[0xB4]);
    ctx.update(&(raw.len() as u32).to_be_bytes());
    ctx.update(raw);
}

/// A subkey accepted through a valid binding signature.
#[derive(Debug, Clone)]
pub struct Subkey {
    key: KeyPacket,
    flags: Option<KeyFlags>,
    signatures: Vec<SignaturePacket>,
}

impl Subkey {
    pub fn key(&self) -> &KeyPacket {
        &self.key
    }

    pub fn flags(&self) -> Option<KeyFlags> {
        self.flags
    }

    pub fn can_sign(&self) -> bool {
        self.key.is_signing_algorithm() && self.flags.is_some_and(|f| f.contains(KeyFlags::SIGN))
    }
}

/// A transferable OpenPGP key: primary key, user IDs and subkeys.
///
/// Immutable once parsed.
#[derive(Debug, Clone)]
pub struct Key {
    primary: KeyPacket,
    direct_signatures: Vec<SignaturePacket>,
    user_ids: Vec<UserId>,
    subkeys: Vec<Subkey>,
    flags: Option<KeyFlags>,
}

impl Key {
    /// Bind a user ID to a primary key with a positive self-certification,
    /// marking the key for certification and signing.
    pub fn certify(primary: KeyPacket, user_id: &str, created: DateTime<Utc>) -> Result<Self> {
        let flags = KeyFlags::CERTIFY | KeyFlags::SIGN;
        let raw = user_id.as_bytes().to_vec();

        let mut ctx = SIGNING_HASH.context();
        primary.hash_into(&mut ctx);
        hash_user_id(&mut ctx, &raw);
        let signature = SignatureBuilder::new(SignatureType::PositiveCertification, created)
            .with_key_flags(flags)
            .sign(&primary, ctx)?;

        Ok(Self {
            primary,
            direct_signatures: Vec::new(),
            user_ids: vec![UserId {
                raw,
                signatures: vec![signature],
            }],
            subkeys: Vec::new(),
            flags: Some(flags),
        })
    }

    /// Certify an Ed25519 signing key under `user_id`.
    pub fn from_ed25519(
        signing_key: SigningKey,
        user_id: &str,
        created: DateTime<Utc>,
    ) -> Result<Self> {
        Self::certify(KeyPacket::from_ed25519(signing_key, created)?, user_id, created)
    }

    pub fn primary(&self) -> &KeyPacket {
        &self.primary
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.primary.fingerprint()
    }

    /// Uppercase hex of the primary key fingerprint.
    pub fn key_id(&self) -> String {
        self.primary.fingerprint().to_hex()
    }

    pub fn user_ids(&self) -> &[UserId] {
        &self.user_ids
    }

    pub fn subkeys(&self) -> &[Subkey] {
        &self.subkeys
    }

    /// Key flags from the newest valid self-signature, if any carried them.
    pub fn flags(&self) -> Option<KeyFlags> {
        self.flags
    }

    pub fn has_secret(&self) -> bool {
        self.primary.has_secret()
    }

    fn primary_can_sign(&self) -> bool {
        self.primary.is_signing_algorithm()
            && self.flags.map_or(true, |f| f.contains(KeyFlags::SIGN))
    }

    /// Whether the primary key or any subkey may make signatures.
    pub fn can_sign(&self) -> bool {
        self.primary_can_sign() || self.subkeys.iter().any(Subkey::can_sign)
    }

    /// The key packet used for new signatures: the newest signing subkey
    /// with usable secret material, else the primary key.
    pub fn signing_key(&self) -> Option<&KeyPacket> {
        self.subkeys
            .iter()
            .filter(|s| s.can_sign() && s.key.has_usable_secret())
            .max_by_key(|s| s.key.created)
            .map(|s| &s.key)
            .or_else(|| {
                (self.primary_can_sign() && self.primary.has_usable_secret())
                    .then_some(&self.primary)
            })
    }

    /// The signing-capable key packet matching a signature issuer.
    pub fn verifying_key(&self, issuer: &Issuer) -> Option<&KeyPacket> {
        if self.primary.matches(issuer) && self.primary_can_sign() {
            return Some(&self.primary);
        }
        self.subkeys
            .iter()
            .find(|s| s.key.matches(issuer) && s.can_sign())
            .map(|s| &s.key)
    }

    /// A copy with all secret material removed.
    pub fn to_public(&self) -> Self {
        Self {
            primary: self.primary.without_secret(),
            direct_signatures: self.direct_signatures.clone(),
            user_ids: self.user_ids.clone(),
            subkeys: self
                .subkeys
                .iter()
                .map(|s| Subkey {
                    key: s.key.without_secret(),
                    ..s.clone()
                })
                .collect(),
            flags: self.flags,
        }
    }

    fn write_transferable(&self, out: &mut Vec<u8>, with_secret: bool) {
        self.primary.write_key_packet(out, false, with_secret);
        for sig in &self.direct_signatures {
            write_packet(out, Tag::Signature, &sig.to_body());
        }
        for uid in &self.user_ids {
            write_packet(out, Tag::UserId, &uid.raw);
            for sig in &uid.signatures {
                write_packet(out, Tag::Signature, &sig.to_body());
            }
        }
        for sub in &self.subkeys {
            sub.key.write_key_packet(out, true, with_secret);
            for sig in &sub.signatures {
                write_packet(out, Tag::Signature, &sig.to_body());
            }
        }
    }

    /// Serialize as a transferable public key.
    pub fn write_public_packets(&self, out: &mut Vec<u8>) {
        self.write_transferable(out, false);
    }

    /// Serialize as a transferable secret key. Subkeys without secret
    /// material are written in public form.
    pub fn write_secret_packets(&self, out: &mut Vec<u8>) -> Result<()> {
        if !self.has_secret() {
            return Err(AttestError::Configuration(format!(
                "key {} has no secret material",
                self.fingerprint()
            )));
        }
        self.write_transferable(out, true);
        Ok(())
    }

    /// Armored public key block.
    pub fn armor_public(&self) -> String {
        let mut body = Vec::new();
        self.write_public_packets(&mut body);
        armor::encode(&BlockType::PublicKey, &body)
    }

    /// Armored private key block; fails when the key has no secret material.
    pub fn armor_secret(&self) -> Result<String> {
        let mut body = Vec::new();
        self.write_secret_packets(&mut body)?;
        Ok(armor::encode(&BlockType::PrivateKey, &body))
    }
}

enum Section {
    Direct,
    UserId,
    UserAttribute,
    Subkey,
}

struct PendingKey {
    primary: KeyPacket,
    direct_signatures: Vec<SignaturePacket>,
    user_ids: Vec<UserId>,
    subkeys: Vec<(KeyPacket, Vec<SignaturePacket>)>,
    section: Section,
}

impl PendingKey {
    fn new(primary: KeyPacket) -> Self {
        Self {
            primary,
            direct_signatures: Vec::new(),
            user_ids: Vec::new(),
            subkeys: Vec::new(),
            section: Section::Direct,
        }
    }

    fn push_signature(&mut self, sig: SignaturePacket) {
        match self.section {
            Section::Direct => self.direct_signatures.push(sig),
            Section::UserId => {
                if let Some(uid) = self.user_ids.last_mut() {
                    uid.signatures.push(sig);
                }
            }
            Section::UserAttribute => {}
            Section::Subkey => {
                if let Some((_, sigs)) = self.subkeys.last_mut() {
                    sigs.push(sig);
                }
            }
        }
    }

    /// Validate self-signatures and binding signatures.
    fn finish(self) -> Key {
        let primary = self.primary;
        let mut newest: Option<(u32, Option<KeyFlags>)> = None;
        let mut consider = |sig: &SignaturePacket| {
            let created = sig.created_timestamp().unwrap_or(0);
            if newest.map_or(true, |(t, _)| created >= t) {
                newest = Some((created, sig.key_flags()));
            }
        };

        for sig in &self.direct_signatures {
            if sig.sig_type() != SignatureType::DirectKey || !sig.issued_by(&primary) {
                continue;
            }
            let mut ctx = match sig.digest_context() {
                Some(ctx) => ctx,
                None => continue,
            };
            primary.hash_into(&mut ctx);
            if sig.verify_with(&primary, ctx).is_ok() {
                consider(sig);
            }
        }

        for uid in &self.user_ids {
            for sig in &uid.signatures {
                if !sig.sig_type().is_certification() || !sig.issued_by(&primary) {
                    continue;
                }
                let mut ctx = match sig.digest_context() {
                    Some(ctx) => ctx,
                    None => continue,
                };
                primary.hash_into(&mut ctx);
                hash_user_id(&mut ctx, &uid.raw);
                match sig.verify_with(&primary, ctx) {
                    Ok(()) => consider(sig),
                    Err(e) => tracing::debug!(
                        "ignoring self-signature on {:?} of key {}: {}",
                        uid.value(),
                        primary.fingerprint(),
                        e
                    ),
                }
            }
        }

        let mut subkeys = Vec::new();
        for (key, signatures) in self.subkeys {
            let binding_flags = signatures
                .iter()
                .filter(|sig| {
                    sig.sig_type() == SignatureType::SubkeyBinding && sig.issued_by(&primary)
                })
                .filter(|sig| {
                    let Some(mut ctx) = sig.digest_context() else {
                        return false;
                    };
                    primary.hash_into(&mut ctx);
                    key.hash_into(&mut ctx);
                    sig.verify_with(&primary, ctx).is_ok()
                })
                .max_by_key(|sig| sig.created_timestamp().unwrap_or(0))
                .map(SignaturePacket::key_flags);
            match binding_flags {
                Some(flags) => subkeys.push(Subkey {
                    key,
                    flags,
                    signatures,
                }),
                None => tracing::warn!(
                    "dropping subkey {} of key {}: no valid binding signature",
                    key.fingerprint(),
                    primary.fingerprint()
                ),
            }
        }

        Key {
            primary,
            direct_signatures: self.direct_signatures,
            user_ids: self.user_ids,
            subkeys,
            flags: newest.and_then(|(_, flags)| flags),
        }
    }
}

/// An ordered set of keys, unique by primary fingerprint. Read-only.
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: Vec<Key>,
}

impl KeyRing {
    /// Load an armored public or private key block.
    pub fn from_armored(data: &[u8]) -> Result<Self> {
        let armor = armor::decode(data).map_err(AttestError::into_key_parse)?;
        match armor.block_type {
            BlockType::PublicKey | BlockType::PrivateKey => {}
            other => {
                return Err(AttestError::KeyParse(format!(
                    "expected a key block, found armor type {other}"
                )))
            }
        }
        Self::from_packets(&armor.body)
    }

    /// Load unarmored (binary) key material.
    pub fn from_packets(data: &[u8]) -> Result<Self> {
        let packets = packet::parse_packets(data).map_err(AttestError::into_key_parse)?;
        Self::from_packet_list(packets).map_err(AttestError::into_key_parse)
    }

    fn from_packet_list(packets: Vec<Packet>) -> Result<Self> {
        let mut keys = Vec::new();
        let mut current: Option<PendingKey> = None;

        for packet in packets {
            match packet.tag {
                Tag::PublicKey | Tag::SecretKey => {
                    let primary = KeyPacket::parse(&packet.body, packet.tag == Tag::SecretKey)?;
                    if let Some(done) = current.replace(PendingKey::new(primary)) {
                        keys.push(done.finish());
                    }
                }
                Tag::Trust | Tag::Marker => {}
                tag => {
                    let pending = current.as_mut().ok_or_else(|| {
                        malformed(format!("{tag:?} packet before any primary key"))
                    })?;
                    match tag {
                        Tag::UserId => {
                            pending.user_ids.push(UserId {
                                raw: packet.body,
                                signatures: Vec::new(),
                            });
                            pending.section = Section::UserId;
                        }
                        Tag::UserAttribute => pending.section = Section::UserAttribute,
                        Tag::PublicSubkey | Tag::SecretSubkey => {
                            let key = KeyPacket::parse(&packet.body, tag == Tag::SecretSubkey)?;
                            pending.subkeys.push((key, Vec::new()));
                            pending.section = Section::Subkey;
                        }
                        Tag::Signature => match SignaturePacket::parse(&packet.body) {
                            Ok(sig) => pending.push_signature(sig),
                            Err(e) => tracing::warn!(
                                "skipping unparseable signature on key {}: {}",
                                pending.primary.fingerprint(),
                                e
                            ),
                        },
                        other => {
                            return Err(malformed(format!(
                                "unexpected {other:?} packet in key material"
                            )));
                        }
                    }
                }
            }
        }
        if let Some(done) = current {
            keys.push(done.finish());
        }
        Ok(Self::from_keys(keys))
    }

    /// Build a ring from parsed keys; later duplicates of a fingerprint are dropped.
    pub fn from_keys(keys: Vec<Key>) -> Self {
        let mut unique: Vec<Key> = Vec::with_capacity(keys.len());
        for key in keys {
            if unique.iter().any(|k| k.fingerprint() == key.fingerprint()) {
                tracing::debug!("ignoring duplicate key {}", key.fingerprint());
                continue;
            }
            unique.push(key);
        }
        Self { keys: unique }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter()
    }

    /// Look up a key by primary fingerprint.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&Key> {
        self.keys.iter().find(|k| k.fingerprint() == *fingerprint)
    }

    /// Find the signing-capable key packet (primary or subkey) for an issuer.
    pub fn find_issuer(&self, issuer: &Issuer) -> Option<(&Key, &KeyPacket)> {
        self.keys
            .iter()
            .find_map(|key| key.verifying_key(issuer).map(|packet| (key, packet)))
    }

    /// Armored public key block holding every key in the ring.
    pub fn armor_public(&self) -> String {
        let mut body = Vec::new();
        for key in &self.keys {
            key.write_public_packets(&mut body);
        }
        armor::encode(&BlockType::PublicKey, &body)
    }

    /// Armored private key block holding every key in the ring.
    pub fn armor_secret(&self) -> Result<String> {
        let mut body = Vec::new();
        for key in &self.keys {
            key.write_secret_packets(&mut body)?;
        }
        Ok(armor::encode(&BlockType::PrivateKey, &body))
    }
}

impl<'a> IntoIterator for &'a KeyRing {
    type Item = &'a Key;
    type IntoIter = std::slice::Iter<'a, Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ED25519_PUBLIC: &str = include_str!("../tests/fixtures/ed25519_public.asc");
    const ED25519_SECRET: &str = include_str!("../tests/fixtures/ed25519_secret.asc");
    const DEFAULT_PUBLIC: &str = include_str!("../tests/fixtures/default_public.asc");
    const RSA_SECRET: &str = include_str!("../tests/fixtures/rsa_secret.asc");

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_load_gpg_public_key() {
        let ring = KeyRing::from_armored(ED25519_PUBLIC.as_bytes()).unwrap();
        assert_eq!(ring.len(), 1);

        let key = &ring.keys()[0];
        assert_eq!(key.key_id(), "725C431A370654405BF75D5FE7AF7881DA2D6E7E");
        assert_eq!(key.primary().key_id().to_hex(), "E7AF7881DA2D6E7E");
        assert_eq!(key.primary().algorithm(), PublicKeyAlgorithm::EdDsaLegacy);
        assert_eq!(key.user_ids()[0].value(), "Fixture Signer <fixture@example.com>");
        assert_eq!(key.flags(), Some(KeyFlags::CERTIFY | KeyFlags::SIGN));
        assert!(key.can_sign());
        assert!(!key.has_secret());
        assert!(key.signing_key().is_none());
    }

    #[test]
    fn test_load_gpg_secret_key() {
        let ring = KeyRing::from_armored(ED25519_SECRET.as_bytes()).unwrap();
        let key = &ring.keys()[0];
        assert!(key.has_secret());
        let signing = key.signing_key().unwrap();
        assert_eq!(signing.fingerprint(), key.fingerprint());
    }

    #[test]
    fn test_load_rsa_secret_key() {
        let ring = KeyRing::from_armored(RSA_SECRET.as_bytes()).unwrap();
        let key = &ring.keys()[0];
        assert_eq!(key.key_id(), "5420F689EAF2DEB71274312C81554DDCF2895C7A");
        assert_eq!(key.primary().algorithm(), PublicKeyAlgorithm::Rsa);
        assert!(key.signing_key().is_some());
    }

    #[test]
    fn test_encryption_subkey_is_not_for_signing() {
        let ring = KeyRing::from_armored(DEFAULT_PUBLIC.as_bytes()).unwrap();
        let key = &ring.keys()[0];
        assert_eq!(key.subkeys().len(), 1);

        let sub = &key.subkeys()[0];
        assert_eq!(sub.key().fingerprint().to_hex(), "274F6C60C612D840838E3E8839B34FD03FE2CD34");
        assert_eq!(sub.key().algorithm(), PublicKeyAlgorithm::Ecdh);
        assert!(!sub.can_sign());

        let issuer = Issuer::KeyId(sub.key().key_id());
        assert!(ring.find_issuer(&issuer).is_none());
        let issuer = Issuer::Fingerprint(key.fingerprint());
        assert!(ring.find_issuer(&issuer).is_some());
    }

    #[test]
    fn test_multiple_keys_in_one_block() {
        let ed25519 = KeyRing::from_armored(ED25519_PUBLIC.as_bytes()).unwrap();
        let default = KeyRing::from_armored(DEFAULT_PUBLIC.as_bytes()).unwrap();
        let mut combined = ed25519.keys().to_vec();
        combined.extend_from_slice(default.keys());
        let armored = KeyRing::from_keys(combined).armor_public();

        let ring = KeyRing::from_armored(armored.as_bytes()).unwrap();
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.keys()[1].key_id(), "39EA3088F38D537657B763338C72617D26BC8F34");
    }

    #[test]
    fn test_duplicate_keys_are_collapsed() {
        let key = KeyRing::from_armored(ED25519_PUBLIC.as_bytes()).unwrap().keys()[0].clone();
        let ring = KeyRing::from_keys(vec![key.clone(), key]);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_empty_key_block() {
        let armored = armor::encode(&BlockType::PublicKey, &[]);
        let ring = KeyRing::from_armored(armored.as_bytes()).unwrap();
        assert!(ring.is_empty());
    }

    #[test]
    fn test_wrong_armor_type_fails() {
        let armored = armor::encode(&BlockType::Message, &[]);
        let err = KeyRing::from_armored(armored.as_bytes()).unwrap_err();
        assert!(matches!(err, AttestError::KeyParse(_)));
    }

    #[test]
    fn test_bad_checksum_is_key_parse_error() {
        let broken: String = ED25519_PUBLIC
            .lines()
            .map(|line| {
                if line.len() == 5 && line.starts_with('=') {
                    "=AAAA\n".to_string()
                } else {
                    format!("{line}\n")
                }
            })
            .collect();
        let err = KeyRing::from_armored(broken.as_bytes()).unwrap_err();
        assert!(matches!(err, AttestError::KeyParse(ref m) if m.contains("CRC24")));
    }

    #[test]
    fn test_garbage_packets_fail() {
        let armored = armor::encode(&BlockType::PublicKey, &[0xC6, 0x03, 0x04, 0x00, 0x00]);
        let err = KeyRing::from_armored(armored.as_bytes()).unwrap_err();
        assert!(matches!(err, AttestError::KeyParse(_)));
    }

    #[test]
    fn test_user_id_before_key_fails() {
        let mut body = Vec::new();
        write_packet(&mut body, Tag::UserId, b"nobody");
        let err = KeyRing::from_packets(&body).unwrap_err();
        assert!(matches!(err, AttestError::KeyParse(_)));
    }

    #[test]
    fn test_certified_key_roundtrip() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let key = Key::from_ed25519(signing_key, "Test <test@example.com>", fixed_time()).unwrap();
        assert_eq!(key.primary().created(), fixed_time());

        let secret = KeyRing::from_armored(key.armor_secret().unwrap().as_bytes()).unwrap();
        let loaded = &secret.keys()[0];
        assert_eq!(loaded.fingerprint(), key.fingerprint());
        assert_eq!(loaded.flags(), Some(KeyFlags::CERTIFY | KeyFlags::SIGN));
        assert!(loaded.signing_key().is_some());

        let public = KeyRing::from_armored(key.armor_public().as_bytes()).unwrap();
        assert!(!public.keys()[0].has_secret());
        assert_eq!(public.keys()[0].fingerprint(), key.fingerprint());
    }

    #[test]
    fn test_to_public_strips_secrets() {
        let key = Key::from_ed25519(SigningKey::generate(&mut OsRng), "x", fixed_time()).unwrap();
        let public = key.to_public();
        assert!(!public.has_secret());
        assert!(public.armor_secret().is_err());
    }

    #[test]
    fn test_public_export_of_secret_key() {
        let key = Key::from_ed25519(SigningKey::generate(&mut OsRng), "x", fixed_time()).unwrap();
        let mut body = Vec::new();
        key.write_public_packets(&mut body);
        let tags: Vec<Tag> = packet::parse_packets(&body).unwrap().iter().map(|p| p.tag).collect();
        assert_eq!(tags, vec![Tag::PublicKey, Tag::UserId, Tag::Signature]);

        let ring = KeyRing::from_keys(vec![key.clone(), key.to_public()]);
        let armored = ring.armor_public();
        let reloaded = KeyRing::from_armored(armored.as_bytes()).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(!reloaded.keys()[0].has_secret());
        assert_eq!(armored, key.armor_public());
    }

    #[test]
    fn test_secret_export_requires_secret() {
        let public = Key::from_ed25519(SigningKey::generate(&mut OsRng), "x", fixed_time())
            .unwrap()
            .to_public();
        let mut body = Vec::new();
        let err = public.write_secret_packets(&mut body).unwrap_err();
        assert!(matches!(err, AttestError::Configuration(_)));
        assert!(body.is_empty());

        let ring = KeyRing::from_keys(vec![public]);
        assert!(matches!(ring.armor_secret(), Err(AttestError::Configuration(_))));
    }

    #[test]
    fn test_tampered_self_signature_drops_flags() {
        let key = KeyRing::from_armored(ED25519_PUBLIC.as_bytes()).unwrap().keys()[0].clone();
        let mut body = Vec::new();
        key.write_public_packets(&mut body);
        // Swap the user ID for one the self-signature does not cover.
        let mut packets = packet::parse_packets(&body).unwrap();
        packets[1].body = b"Mallory <mallory@example.com>".to_vec();
        let mut rebuilt = Vec::new();
        for p in &packets {
            write_packet(&mut rebuilt, p.tag, &p.body);
        }
        let ring = KeyRing::from_packets(&rebuilt).unwrap();
        assert_eq!(ring.keys()[0].flags(), None);
    }

    #[test]
    fn test_sign_and_verify_digest() {
        let packet =
            KeyPacket::from_ed25519(SigningKey::generate(&mut OsRng), fixed_time()).unwrap();
        let digest = crate::hash::hash_bytes(SIGNING_HASH, b"digest input");
        let value = packet.sign(SIGNING_HASH, &digest).unwrap();
        assert!(packet.verify(SIGNING_HASH, &digest, &value).is_ok());

        let other = crate::hash::hash_bytes(SIGNING_HASH, b"other input");
        assert!(matches!(
            packet.verify(SIGNING_HASH, &other, &value),
            Err(AttestError::SignatureMismatch(_))
        ));
    }

    #[test]
    fn test_public_packet_cannot_sign() {
        let packet =
            KeyPacket::from_ed25519(SigningKey::generate(&mut OsRng), fixed_time()).unwrap();
        let public = packet.without_secret();
        let err = public.sign(SIGNING_HASH, &[0u8; 32]).unwrap_err();
        assert!(matches!(err, AttestError::Signing(_)));
    }

    #[test]
    fn test_fingerprint_formatting() {
        let fp = Fingerprint::from_bytes([0xAB; 20]);
        assert_eq!(fp.to_hex(), "AB".repeat(20));
        assert_eq!(fp.key_id().to_hex(), "AB".repeat(8));
        assert_eq!(format!("{fp}"), fp.to_hex());
    }
}
