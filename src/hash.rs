//! Hash algorithms for OpenPGP signatures and fingerprints.

use digest::DynDigest;
use std::fmt;

/// The digest used for every signature this crate creates.
///
/// Fixed rather than taken from key preferences so that the output of a
/// signer does not depend on metadata inside the key.
pub const SIGNING_HASH: HashAlgorithm = HashAlgorithm::Sha256;

/// OpenPGP hash algorithms with an implementation in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Map an OpenPGP hash algorithm ID.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            2 => Some(Self::Sha1),
            8 => Some(Self::Sha256),
            9 => Some(Self::Sha384),
            10 => Some(Self::Sha512),
            11 => Some(Self::Sha224),
            _ => None,
        }
    }

    /// The OpenPGP algorithm ID.
    pub fn id(self) -> u8 {
        match self {
            Self::Sha1 => 2,
            Self::Sha256 => 8,
            Self::Sha384 => 9,
            Self::Sha512 => 10,
            Self::Sha224 => 11,
        }
    }

    /// Start a streaming digest.
    pub fn context(self) -> DigestContext {
        let inner: Box<dyn DynDigest + Send> = match self {
            Self::Sha1 => Box::new(sha1::Sha1::default()),
            Self::Sha224 => Box::new(sha2::Sha224::default()),
            Self::Sha256 => Box::new(sha2::Sha256::default()),
            Self::Sha384 => Box::new(sha2::Sha384::default()),
            Self::Sha512 => Box::new(sha2::Sha512::default()),
        };
        DigestContext {
            algorithm: self,
            inner,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sha1 => "SHA1",
            Self::Sha224 => "SHA224",
            Self::Sha256 => "SHA256",
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
        };
        f.write_str(name)
    }
}

/// An in-progress digest over signed data.
pub struct DigestContext {
    algorithm: HashAlgorithm,
    inner: Box<dyn DynDigest + Send>,
}

impl DigestContext {
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> Vec<u8> {
        self.inner.finalize().into_vec()
    }
}

impl fmt::Debug for DigestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestContext")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Compute a one-shot digest of `data`.
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Vec<u8> {
    let mut ctx = algorithm.context();
    ctx.update(data);
    ctx.finalize()
}

/// Feeds a digest with text normalized to CRLF line endings, as required for
/// OpenPGP text-mode signatures. State carries across calls so input may be
/// split anywhere.
#[derive(Debug, Default)]
pub struct TextCanonicalizer {
    previous_cr: bool,
}

impl TextCanonicalizer {
    pub fn update(&mut self, ctx: &mut DigestContext, data: &[u8]) {
        let mut start = 0;
        for (i, &byte) in data.iter().enumerate() {
            if byte == b'\n' && !self.previous_cr {
                ctx.update(&data[start..i]);
                ctx.update(b"\r\n");
                start = i + 1;
            }
            self.previous_cr = byte == b'\r';
        }
        ctx.update(&data[start..]);
    }
}
