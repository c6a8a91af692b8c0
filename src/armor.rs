//! ASCII armor framing for OpenPGP packet streams.
//!
//! An armored block looks like:
//!
//! ```text
//! -----BEGIN PGP SIGNATURE-----
//! Comment: optional header
//!
//! <radix-64 body, 64 characters per line>
//! =<4-char radix-64 CRC24>
//! -----END PGP SIGNATURE-----
//! ```

use crate::error::{AttestError, Result};
use base64::Engine;
use std::fmt;

/// Width of the radix-64 body lines written by [`encode`] and [`Armor::to_text`].
pub const LINE_WIDTH: usize = 64;

const CRC24_INIT: u32 = 0x00B7_04CE;
const CRC24_POLY: u32 = 0x0186_4CFB;

const BEGIN_PREFIX: &str = "-----BEGIN PGP ";
const END_PREFIX: &str = "-----END PGP ";
const DASHES: &str = "-----";

/// The type tag carried in the armor header and footer lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockType {
    Signature,
    Message,
    PublicKey,
    PrivateKey,
    /// Any other label, kept verbatim.
    Other(String),
}

impl BlockType {
    /// The label between `BEGIN PGP ` and the trailing dashes.
    pub fn label(&self) -> &str {
        match self {
            BlockType::Signature => "SIGNATURE",
            BlockType::Message => "MESSAGE",
            BlockType::PublicKey => "PUBLIC KEY BLOCK",
            BlockType::PrivateKey => "PRIVATE KEY BLOCK",
            BlockType::Other(label) => label,
        }
    }

    fn from_label(label: &str) -> Self {
        match label {
            "SIGNATURE" => BlockType::Signature,
            "MESSAGE" => BlockType::Message,
            "PUBLIC KEY BLOCK" => BlockType::PublicKey,
            "PRIVATE KEY BLOCK" => BlockType::PrivateKey,
            other => BlockType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A decoded armor block.
///
/// Headers are checked on the way in, so [`Armor::to_text`] always renders
/// text that [`decode`] reads back unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Armor {
    pub block_type: BlockType,
    headers: Vec<(String, String)>,
    /// The raw binary packet stream.
    pub body: Vec<u8>,
}

impl Armor {
    /// Create an armor block without headers.
    pub fn new(block_type: BlockType, body: Vec<u8>) -> Self {
        Self {
            block_type,
            headers: Vec::new(),
            body,
        }
    }

    /// Add an armor header. Fails when the pair cannot survive a round trip
    /// through [`decode`].
    pub fn with_header<K, V>(mut self, key: K, value: V) -> Result<Self>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let (key, value) = (key.into(), value.into());
        check_header(&key, &value)?;
        self.headers.push((key, value));
        Ok(self)
    }

    /// Armor headers in input order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Look up the first header with the given key.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Render the block as armor text.
    pub fn to_text(&self) -> String {
        render(&self.block_type, &self.headers, &self.body)
    }
}

/// Check that an armor header renders as a single `Key: Value` line.
///
/// Keys are non-empty printable ASCII without `:`. Values may be empty but
/// carry no control characters and no surrounding whitespace.
pub fn check_header(key: &str, value: &str) -> Result<()> {
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_graphic() && c != ':') {
        return Err(armor_error(format!("invalid armor header key {key:?}")));
    }
    if value.chars().any(char::is_control) || value.trim() != value {
        return Err(armor_error(format!(
            "invalid value for armor header {key}: {value:?}"
        )));
    }
    Ok(())
}

/// Compute the OpenPGP CRC24 of `data`.
pub fn crc24(data: &[u8]) -> u32 {
    let mut crc = CRC24_INIT;
    for &byte in data {
        crc ^= u32::from(byte) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= CRC24_POLY;
            }
        }
    }
    crc & 0x00FF_FFFF
}

/// Encode a binary body as header-less armor text, including the trailing
/// newline.
pub fn encode(block_type: &BlockType, body: &[u8]) -> String {
    render(block_type, &[], body)
}

fn render(block_type: &BlockType, headers: &[(String, String)], body: &[u8]) -> String {
    let engine = base64::engine::general_purpose::STANDARD;
    let label = block_type.label();

    let mut out = String::new();
    out.push_str(BEGIN_PREFIX);
    out.push_str(label);
    out.push_str(DASHES);
    out.push('\n');
    for (key, value) in headers {
        out.push_str(key);
        out.push(':');
        if !value.is_empty() {
            out.push(' ');
            out.push_str(value);
        }
        out.push('\n');
    }
    out.push('\n');

    let encoded = engine.encode(body);
    // Radix-64 output is pure ASCII, so byte chunks are char boundaries.
    for line in encoded.as_bytes().chunks(LINE_WIDTH) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }

    let crc = crc24(body).to_be_bytes();
    out.push('=');
    out.push_str(&engine.encode(&crc[1..]));
    out.push('\n');

    out.push_str(END_PREFIX);
    out.push_str(label);
    out.push_str(DASHES);
    out.push('\n');
    out
}

fn armor_error<S: Into<String>>(msg: S) -> AttestError {
    AttestError::ArmorFormat(msg.into())
}

/// Decode the first armor block found in `text`.
///
/// Any text before the `BEGIN` line is ignored. The CRC24 line is required.
pub fn decode(text: &[u8]) -> Result<Armor> {
    let text = std::str::from_utf8(text).map_err(|_| armor_error("armor is not valid UTF-8"))?;
    let mut lines = text.lines().map(str::trim_end);

    let label = lines
        .by_ref()
        .find_map(|line| {
            line.strip_prefix(BEGIN_PREFIX)
                .and_then(|rest| rest.strip_suffix(DASHES))
        })
        .ok_or_else(|| armor_error("missing armor header line"))?;
    let block_type = BlockType::from_label(label);

    let mut headers = Vec::new();
    let mut body_lines: Vec<&str> = Vec::new();
    for line in lines.by_ref() {
        if line.is_empty() {
            break;
        }
        // Radix-64 never contains ':', so any line with one is a header.
        match line.split_once(':') {
            Some((key, value)) => {
                let value = value.trim_start();
                check_header(key, value)?;
                headers.push((key.to_string(), value.to_string()));
            }
            None => {
                // No blank separator: the body started right after the header line.
                body_lines.push(line);
                break;
            }
        }
    }

    let mut checksum = None;
    let mut footer = None;
    for line in lines.by_ref() {
        if line.starts_with(END_PREFIX) {
            footer = Some(line);
            break;
        }
        if line.len() == 5 && line.starts_with('=') {
            checksum = Some(&line[1..]);
            footer = lines.next();
            break;
        }
        body_lines.push(line.trim_start());
    }

    let footer = footer.ok_or_else(|| armor_error("missing armor footer line"))?;
    let footer_label = footer
        .strip_prefix(END_PREFIX)
        .and_then(|rest| rest.strip_suffix(DASHES))
        .ok_or_else(|| armor_error(format!("unexpected line before footer: {footer:?}")))?;
    if footer_label != label {
        return Err(armor_error(format!(
            "footer type {footer_label:?} does not match header type {label:?}"
        )));
    }
    let checksum = checksum.ok_or_else(|| armor_error("missing CRC24 checksum line"))?;

    let engine = base64::engine::general_purpose::STANDARD;
    let body = engine
        .decode(body_lines.concat())
        .map_err(|e| armor_error(format!("invalid radix-64 body: {e}")))?;
    let crc_bytes = engine
        .decode(checksum)
        .map_err(|e| armor_error(format!("invalid CRC24 encoding: {e}")))?;
    if crc_bytes.len() != 3 {
        return Err(armor_error("CRC24 checksum must be 3 bytes"));
    }
    let expected = u32::from_be_bytes([0, crc_bytes[0], crc_bytes[1], crc_bytes[2]]);
    let actual = crc24(&body);
    if expected != actual {
        return Err(armor_error(format!(
            "CRC24 mismatch: armor says {expected:06X}, body hashes to {actual:06X}"
        )));
    }

    Ok(Armor {
        block_type,
        headers,
        body,
    })
}
