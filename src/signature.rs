//! Signature, one-pass signature and literal data packets.

use crate::error::{AttestError, Result};
use crate::hash::{DigestContext, HashAlgorithm, SIGNING_HASH};
use crate::keys::{
    from_timestamp, to_timestamp, Fingerprint, KeyFlags, KeyId, KeyPacket, PublicKeyAlgorithm,
};
use crate::packet::{malformed, write_mpi, Reader};
use chrono::{DateTime, Utc};
use std::fmt;

const SUBPACKET_CREATION_TIME: u8 = 2;
const SUBPACKET_ISSUER: u8 = 16;
const SUBPACKET_KEY_FLAGS: u8 = 27;
const SUBPACKET_ISSUER_FINGERPRINT: u8 = 33;

/// Subpacket types whose meaning is understood well enough to honor a
/// critical bit. A critical subpacket outside this list invalidates the
/// signature.
const KNOWN_SUBPACKETS: &[u8] = &[2, 3, 4, 9, 11, 16, 21, 22, 23, 25, 27, 30, 33, 34, 39];

/// OpenPGP signature types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureType {
    Binary,
    Text,
    GenericCertification,
    PersonaCertification,
    CasualCertification,
    PositiveCertification,
    SubkeyBinding,
    PrimaryKeyBinding,
    DirectKey,
    KeyRevocation,
    SubkeyRevocation,
    CertificationRevocation,
    Other(u8),
}

impl SignatureType {
    pub fn from_id(id: u8) -> Self {
        match id {
            0x00 => Self::Binary,
            0x01 => Self::Text,
            0x10 => Self::GenericCertification,
            0x11 => Self::PersonaCertification,
            0x12 => Self::CasualCertification,
            0x13 => Self::PositiveCertification,
            0x18 => Self::SubkeyBinding,
            0x19 => Self::PrimaryKeyBinding,
            0x1F => Self::DirectKey,
            0x20 => Self::KeyRevocation,
            0x28 => Self::SubkeyRevocation,
            0x30 => Self::CertificationRevocation,
            other => Self::Other(other),
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Self::Binary => 0x00,
            Self::Text => 0x01,
            Self::GenericCertification => 0x10,
            Self::PersonaCertification => 0x11,
            Self::CasualCertification => 0x12,
            Self::PositiveCertification => 0x13,
            Self::SubkeyBinding => 0x18,
            Self::PrimaryKeyBinding => 0x19,
            Self::DirectKey => 0x1F,
            Self::KeyRevocation => 0x20,
            Self::SubkeyRevocation => 0x28,
            Self::CertificationRevocation => 0x30,
            Self::Other(id) => id,
        }
    }

    /// User ID certification (0x10 to 0x13).
    pub fn is_certification(self) -> bool {
        matches!(
            self,
            Self::GenericCertification
                | Self::PersonaCertification
                | Self::CasualCertification
                | Self::PositiveCertification
        )
    }

    /// Signature over document data (binary or text).
    pub fn is_document(self) -> bool {
        matches!(self, Self::Binary | Self::Text)
    }
}

/// Who made a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Issuer {
    Fingerprint(Fingerprint),
    KeyId(KeyId),
}

impl Issuer {
    pub fn key_id(&self) -> KeyId {
        match self {
            Issuer::Fingerprint(fp) => fp.key_id(),
            Issuer::KeyId(id) => *id,
        }
    }
}

impl fmt::Display for Issuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issuer::Fingerprint(fp) => write!(f, "{fp}"),
            Issuer::KeyId(id) => write!(f, "{id}"),
        }
    }
}

/// Algorithm-specific signature material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureValue {
    /// PKCS#1 v1.5 signature integer.
    Rsa(Vec<u8>),
    /// Legacy EdDSA: the R and S halves as separate integers.
    EdDsa { r: Vec<u8>, s: Vec<u8> },
    /// Native Ed25519 signature.
    Ed25519([u8; 64]),
    /// Material for an algorithm this crate does not implement.
    Unsupported(Vec<u8>),
}

impl SignatureValue {
    fn parse(reader: &mut Reader<'_>, algorithm: PublicKeyAlgorithm) -> Result<Self> {
        Ok(match algorithm {
            PublicKeyAlgorithm::Rsa | PublicKeyAlgorithm::RsaSignOnly => {
                SignatureValue::Rsa(reader.read_mpi()?.to_vec())
            }
            PublicKeyAlgorithm::EdDsaLegacy => {
                let r = reader.read_mpi()?.to_vec();
                let s = reader.read_mpi()?.to_vec();
                SignatureValue::EdDsa { r, s }
            }
            PublicKeyAlgorithm::Ed25519 => SignatureValue::Ed25519(reader.read_array()?),
            _ => SignatureValue::Unsupported(reader.rest().to_vec()),
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            SignatureValue::Rsa(value) => write_mpi(out, value),
            SignatureValue::EdDsa { r, s } => {
                write_mpi(out, r);
                write_mpi(out, s);
            }
            SignatureValue::Ed25519(bytes) => out.extend_from_slice(bytes),
            SignatureValue::Unsupported(raw) => out.extend_from_slice(raw),
        }
    }
}

/// A signature subpacket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subpacket {
    pub kind: u8,
    pub critical: bool,
    pub data: Vec<u8>,
}

fn parse_subpackets(area: &[u8]) -> Result<Vec<Subpacket>> {
    let mut reader = Reader::new(area);
    let mut out = Vec::new();
    while !reader.is_empty() {
        let first = reader.read_u8()?;
        let len = match first {
            0..=191 => usize::from(first),
            192..=254 => ((usize::from(first) - 192) << 8) + usize::from(reader.read_u8()?) + 192,
            255 => reader.read_u32()? as usize,
        };
        if len == 0 {
            return Err(malformed("empty signature subpacket"));
        }
        let body = reader.take(len)?;
        out.push(Subpacket {
            kind: body[0] & 0x7F,
            critical: body[0] & 0x80 != 0,
            data: body[1..].to_vec(),
        });
    }
    Ok(out)
}

/// A subpacket area: the raw bytes covered by the hash and their parsed
/// subpackets, always built together from the raw form.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SubpacketArea {
    raw: Vec<u8>,
    subpackets: Vec<Subpacket>,
}

impl SubpacketArea {
    fn parse(raw: Vec<u8>) -> Result<Self> {
        let subpackets = parse_subpackets(&raw)?;
        Ok(Self { raw, subpackets })
    }

    fn find(&self, kind: u8) -> Option<&Subpacket> {
        self.subpackets.iter().find(|sp| sp.kind == kind)
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.raw.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.raw);
    }
}

fn write_subpacket(out: &mut Vec<u8>, kind: u8, data: &[u8]) {
    // Every subpacket written here is far below the one-octet length limit.
    out.push((data.len() + 1) as u8);
    out.push(kind);
    out.extend_from_slice(data);
}

/// A version 4 signature packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePacket {
    sig_type: SignatureType,
    algorithm: PublicKeyAlgorithm,
    hash_id: u8,
    hashed: SubpacketArea,
    unhashed: SubpacketArea,
    hash_prefix: [u8; 2],
    value: SignatureValue,
}

impl SignaturePacket {
    /// Parse a signature packet body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(body);
        let version = reader.read_u8()?;
        if version != 4 {
            return Err(malformed(format!("unsupported signature version {version}")));
        }
        let sig_type = SignatureType::from_id(reader.read_u8()?);
        let algorithm = PublicKeyAlgorithm::from_id(reader.read_u8()?);
        let hash_id = reader.read_u8()?;

        let hashed_len = usize::from(reader.read_u16()?);
        let hashed_area = reader.take(hashed_len)?.to_vec();
        let unhashed_len = usize::from(reader.read_u16()?);
        let unhashed_area = reader.take(unhashed_len)?.to_vec();
        let hash_prefix = reader.read_array()?;
        let value = SignatureValue::parse(&mut reader, algorithm)?;
        if !reader.is_empty() {
            return Err(malformed("trailing data after signature value"));
        }

        Ok(Self {
            sig_type,
            algorithm,
            hash_id,
            hashed: SubpacketArea::parse(hashed_area)?,
            unhashed: SubpacketArea::parse(unhashed_area)?,
            hash_prefix,
            value,
        })
    }

    /// Sign raw subpacket areas over the data already fed into `ctx`.
    pub(crate) fn sign_areas(
        sig_type: SignatureType,
        key: &KeyPacket,
        hashed_area: Vec<u8>,
        unhashed_area: Vec<u8>,
        mut ctx: DigestContext,
    ) -> Result<Self> {
        let hash = ctx.algorithm();
        let mut packet = Self {
            sig_type,
            algorithm: key.algorithm(),
            hash_id: hash.id(),
            hashed: SubpacketArea::parse(hashed_area)?,
            unhashed: SubpacketArea::parse(unhashed_area)?,
            hash_prefix: [0, 0],
            value: SignatureValue::Unsupported(Vec::new()),
        };

        packet.hash_trailer(&mut ctx);
        let digest = ctx.finalize();
        packet.hash_prefix = [digest[0], digest[1]];
        packet.value = key.sign(hash, &digest)?;
        Ok(packet)
    }

    /// Serialize the packet body.
    pub fn to_body(&self) -> Vec<u8> {
        let mut out = self.hashed_header();
        self.unhashed.write(&mut out);
        out.extend_from_slice(&self.hash_prefix);
        self.value.write(&mut out);
        out
    }

    /// Version through the end of the hashed subpacket area.
    fn hashed_header(&self) -> Vec<u8> {
        let mut out = vec![4, self.sig_type.id(), self.algorithm.id(), self.hash_id];
        self.hashed.write(&mut out);
        out
    }

    pub fn sig_type(&self) -> SignatureType {
        self.sig_type
    }

    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        self.algorithm
    }

    /// The digest algorithm, if this crate implements it.
    pub fn hash_algorithm(&self) -> Option<HashAlgorithm> {
        HashAlgorithm::from_id(self.hash_id)
    }

    pub fn hash_id(&self) -> u8 {
        self.hash_id
    }

    pub fn value(&self) -> &SignatureValue {
        &self.value
    }

    fn hashed_subpacket(&self, kind: u8) -> Option<&Subpacket> {
        self.hashed.find(kind)
    }

    fn any_subpacket(&self, kind: u8) -> Option<&Subpacket> {
        self.hashed.find(kind).or_else(|| self.unhashed.find(kind))
    }

    pub(crate) fn created_timestamp(&self) -> Option<u32> {
        let data = &self.hashed_subpacket(SUBPACKET_CREATION_TIME)?.data;
        let bytes: [u8; 4] = data.as_slice().try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    /// Signature creation time from the hashed area.
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created_timestamp().map(from_timestamp)
    }

    /// Key flags from the hashed area.
    pub fn key_flags(&self) -> Option<KeyFlags> {
        let data = &self.hashed_subpacket(SUBPACKET_KEY_FLAGS)?.data;
        data.first().map(|&b| KeyFlags::from_bits_retain(b))
    }

    /// The issuer, preferring the full fingerprint over the key ID.
    pub fn issuer(&self) -> Option<Issuer> {
        if let Some(sp) = self.any_subpacket(SUBPACKET_ISSUER_FINGERPRINT) {
            if let [4, rest @ ..] = sp.data.as_slice() {
                if let Ok(bytes) = <[u8; 20]>::try_from(rest) {
                    return Some(Issuer::Fingerprint(Fingerprint::from_bytes(bytes)));
                }
            }
        }
        let sp = self.any_subpacket(SUBPACKET_ISSUER)?;
        let bytes = <[u8; 8]>::try_from(sp.data.as_slice()).ok()?;
        Some(Issuer::KeyId(KeyId::from_bytes(bytes)))
    }

    /// Whether `key` made this signature. Signatures without any issuer
    /// subpacket are attributed to the key they are checked against.
    pub fn issued_by(&self, key: &KeyPacket) -> bool {
        self.issuer().map_or(true, |issuer| key.matches(&issuer))
    }

    /// A digest context for this signature's hash algorithm.
    pub fn digest_context(&self) -> Option<DigestContext> {
        self.hash_algorithm().map(HashAlgorithm::context)
    }

    /// Append the v4 trailer to a digest over the signed data.
    pub fn hash_trailer(&self, ctx: &mut DigestContext) {
        let header = self.hashed_header();
        ctx.update(&header);
        ctx.update(&[0x04, 0xFF]);
        ctx.update(&(header.len() as u32).to_be_bytes());
    }

    /// Finish `ctx` (already fed the signed data) and check the signature
    /// against `key`.
    pub fn verify_with(&self, key: &KeyPacket, mut ctx: DigestContext) -> Result<()> {
        if ctx.algorithm().id() != self.hash_id {
            return Err(AttestError::SignatureMismatch(format!(
                "digest context is {} but signature uses hash {}",
                ctx.algorithm(),
                self.hash_id
            )));
        }
        if let Some(sp) = self
            .hashed
            .subpackets
            .iter()
            .find(|sp| sp.critical && !KNOWN_SUBPACKETS.contains(&sp.kind))
        {
            return Err(AttestError::SignatureMismatch(format!(
                "unknown critical subpacket {}",
                sp.kind
            )));
        }
        if key.algorithm() != self.algorithm {
            return Err(AttestError::SignatureMismatch(format!(
                "signature made with {:?}, key {} is {:?}",
                self.algorithm,
                key.fingerprint(),
                key.algorithm()
            )));
        }

        let hash = ctx.algorithm();
        self.hash_trailer(&mut ctx);
        let digest = ctx.finalize();
        if digest[..2] != self.hash_prefix {
            return Err(AttestError::SignatureMismatch(
                "digest prefix does not match".to_string(),
            ));
        }
        key.verify(hash, &digest, &self.value)
    }
}

/// Builds and signs new v4 signatures with the pinned digest.
#[derive(Debug, Clone)]
pub struct SignatureBuilder {
    sig_type: SignatureType,
    created: DateTime<Utc>,
    key_flags: Option<KeyFlags>,
}

impl SignatureBuilder {
    pub fn new(sig_type: SignatureType, created: DateTime<Utc>) -> Self {
        Self {
            sig_type,
            created,
            key_flags: None,
        }
    }

    pub fn with_key_flags(mut self, flags: KeyFlags) -> Self {
        self.key_flags = Some(flags);
        self
    }

    /// A digest context to feed the signed data into before calling [`sign`].
    ///
    /// [`sign`]: SignatureBuilder::sign
    pub fn digest_context(&self) -> DigestContext {
        SIGNING_HASH.context()
    }

    /// Sign the data already fed into `ctx` with `key`.
    pub fn sign(self, key: &KeyPacket, ctx: DigestContext) -> Result<SignaturePacket> {
        if ctx.algorithm() != SIGNING_HASH {
            return Err(AttestError::Signing(format!(
                "signatures are made with {SIGNING_HASH}, not {}",
                ctx.algorithm()
            )));
        }
        let fingerprint = key.fingerprint();

        let mut hashed_area = Vec::new();
        write_subpacket(
            &mut hashed_area,
            SUBPACKET_CREATION_TIME,
            &to_timestamp(self.created)?.to_be_bytes(),
        );
        let mut issuer_fpr = vec![4];
        issuer_fpr.extend_from_slice(fingerprint.as_bytes());
        write_subpacket(&mut hashed_area, SUBPACKET_ISSUER_FINGERPRINT, &issuer_fpr);
        if let Some(flags) = self.key_flags {
            write_subpacket(&mut hashed_area, SUBPACKET_KEY_FLAGS, &[flags.bits()]);
        }

        let mut unhashed_area = Vec::new();
        write_subpacket(&mut unhashed_area, SUBPACKET_ISSUER, fingerprint.key_id().as_bytes());

        SignaturePacket::sign_areas(self.sig_type, key, hashed_area, unhashed_area, ctx)
    }
}

/// A version 3 one-pass signature packet announcing a trailing signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnePassSignature {
    pub sig_type: SignatureType,
    pub hash_id: u8,
    pub algorithm: PublicKeyAlgorithm,
    pub key_id: KeyId,
    /// Set when no further one-pass packet follows.
    pub last: bool,
}

impl OnePassSignature {
    pub fn for_signature(signature: &SignaturePacket, key_id: KeyId) -> Self {
        Self {
            sig_type: signature.sig_type,
            hash_id: signature.hash_id,
            algorithm: signature.algorithm,
            key_id,
            last: true,
        }
    }

    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(body);
        let version = reader.read_u8()?;
        if version != 3 {
            return Err(malformed(format!("unsupported one-pass signature version {version}")));
        }
        let sig_type = SignatureType::from_id(reader.read_u8()?);
        let hash_id = reader.read_u8()?;
        let algorithm = PublicKeyAlgorithm::from_id(reader.read_u8()?);
        let key_id = KeyId::from_bytes(reader.read_array()?);
        let last = reader.read_u8()? != 0;
        if !reader.is_empty() {
            return Err(malformed("trailing data after one-pass signature"));
        }
        Ok(Self {
            sig_type,
            hash_id,
            algorithm,
            key_id,
            last,
        })
    }

    pub fn to_body(&self) -> Vec<u8> {
        let mut out = vec![3, self.sig_type.id(), self.hash_id, self.algorithm.id()];
        out.extend_from_slice(self.key_id.as_bytes());
        out.push(u8::from(self.last));
        out
    }
}

/// A literal data packet carrying the signed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralData {
    /// `b` for binary, `t` or `u` for text.
    pub format: u8,
    pub file_name: Vec<u8>,
    pub date: u32,
    pub data: Vec<u8>,
}

impl LiteralData {
    pub fn binary(file_name: &str, date: DateTime<Utc>, data: Vec<u8>) -> Result<Self> {
        let file_name = file_name.as_bytes();
        if file_name.len() > usize::from(u8::MAX) {
            return Err(AttestError::Signing(format!(
                "literal file name is {} bytes, the limit is 255",
                file_name.len()
            )));
        }
        Ok(Self {
            format: b'b',
            file_name: file_name.to_vec(),
            date: to_timestamp(date)?,
            data,
        })
    }

    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(body);
        let format = reader.read_u8()?;
        let name_len = usize::from(reader.read_u8()?);
        let file_name = reader.take(name_len)?.to_vec();
        let date = reader.read_u32()?;
        let data = reader.rest().to_vec();
        Ok(Self {
            format,
            file_name,
            date,
            data,
        })
    }

    pub fn to_body(&self) -> Vec<u8> {
        let mut out = vec![self.format, self.file_name.len() as u8];
        out.extend_from_slice(&self.file_name);
        out.extend_from_slice(&self.date.to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}
