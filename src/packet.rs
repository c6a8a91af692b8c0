//! OpenPGP packet framing.
//!
//! Packets are parsed from a fully buffered stream. Both the old (RFC 1991)
//! and the new header formats are understood, including partial body lengths
//! and the old format's indeterminate length. Packets are always written in
//! the new format with definite lengths.

use crate::error::{AttestError, Result};

/// Packet tags used by this crate. Unknown tags are kept as [`Tag::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Signature,
    OnePassSignature,
    SecretKey,
    PublicKey,
    SecretSubkey,
    CompressedData,
    Marker,
    LiteralData,
    Trust,
    UserId,
    PublicSubkey,
    UserAttribute,
    Other(u8),
}

impl From<u8> for Tag {
    fn from(value: u8) -> Self {
        match value {
            2 => Tag::Signature,
            4 => Tag::OnePassSignature,
            5 => Tag::SecretKey,
            6 => Tag::PublicKey,
            7 => Tag::SecretSubkey,
            8 => Tag::CompressedData,
            10 => Tag::Marker,
            11 => Tag::LiteralData,
            12 => Tag::Trust,
            13 => Tag::UserId,
            14 => Tag::PublicSubkey,
            17 => Tag::UserAttribute,
            other => Tag::Other(other),
        }
    }
}

impl From<Tag> for u8 {
    fn from(tag: Tag) -> Self {
        match tag {
            Tag::Signature => 2,
            Tag::OnePassSignature => 4,
            Tag::SecretKey => 5,
            Tag::PublicKey => 6,
            Tag::SecretSubkey => 7,
            Tag::CompressedData => 8,
            Tag::Marker => 10,
            Tag::LiteralData => 11,
            Tag::Trust => 12,
            Tag::UserId => 13,
            Tag::PublicSubkey => 14,
            Tag::UserAttribute => 17,
            Tag::Other(other) => other,
        }
    }
}

/// A single packet with its body reassembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub tag: Tag,
    pub body: Vec<u8>,
}

pub(crate) fn malformed<S: Into<String>>(msg: S) -> AttestError {
    AttestError::MalformedPacket(msg.into())
}

/// Bounds-checked big-endian reader over a byte slice.
#[derive(Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Everything consumed so far.
    pub fn consumed(&self) -> &'a [u8] {
        &self.data[..self.pos]
    }

    /// Everything not consumed yet.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(malformed(format!(
                "truncated data: wanted {len} bytes, {} left",
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read a multiprecision integer and return its magnitude bytes.
    pub fn read_mpi(&mut self) -> Result<&'a [u8]> {
        let bits = usize::from(self.read_u16()?);
        self.take(bits.div_ceil(8))
    }
}

/// Write `bytes` as a multiprecision integer, stripping leading zero bytes.
pub fn write_mpi(out: &mut Vec<u8>, bytes: &[u8]) {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    let bytes = &bytes[start..];
    let bits = match bytes.first() {
        Some(&first) => (bytes.len() - 1) * 8 + (8 - first.leading_zeros() as usize),
        None => 0,
    };
    out.extend_from_slice(&(bits as u16).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Left-pad a big-endian integer to `len` bytes.
pub fn left_pad(bytes: &[u8], len: usize) -> Option<Vec<u8>> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    let bytes = &bytes[start..];
    if bytes.len() > len {
        return None;
    }
    let mut out = vec![0u8; len - bytes.len()];
    out.extend_from_slice(bytes);
    Some(out)
}

/// Read a new-format length; the flag is set for a partial body chunk.
fn read_new_length(reader: &mut Reader<'_>) -> Result<(usize, bool)> {
    let first = reader.read_u8()?;
    Ok(match first {
        0..=191 => (usize::from(first), false),
        192..=223 => {
            let second = reader.read_u8()?;
            (((usize::from(first) - 192) << 8) + usize::from(second) + 192, false)
        }
        224..=254 => (1 << (first & 0x1F), true),
        255 => (reader.read_u32()? as usize, false),
    })
}

fn read_packet(reader: &mut Reader<'_>) -> Result<Packet> {
    let ctb = reader.read_u8()?;
    if ctb & 0x80 == 0 {
        return Err(malformed(format!("invalid packet header byte 0x{ctb:02X}")));
    }

    if ctb & 0x40 != 0 {
        let tag = Tag::from(ctb & 0x3F);
        let mut body = Vec::new();
        loop {
            let (len, partial) = read_new_length(reader)?;
            body.extend_from_slice(reader.take(len)?);
            if !partial {
                break;
            }
        }
        return Ok(Packet { tag, body });
    }

    let tag = Tag::from((ctb >> 2) & 0x0F);
    let body = match ctb & 0x03 {
        0 => {
            let len = usize::from(reader.read_u8()?);
            reader.take(len)?
        }
        1 => {
            let len = usize::from(reader.read_u16()?);
            reader.take(len)?
        }
        2 => {
            let len = reader.read_u32()? as usize;
            reader.take(len)?
        }
        // Indeterminate: the packet runs to the end of the stream.
        _ => reader.rest(),
    };
    let body = body.to_vec();
    Ok(Packet { tag, body })
}

/// Split a binary stream into packets.
pub fn parse_packets(data: &[u8]) -> Result<Vec<Packet>> {
    let mut reader = Reader::new(data);
    let mut packets = Vec::new();
    while !reader.is_empty() {
        packets.push(read_packet(&mut reader)?);
    }
    Ok(packets)
}

/// Append a new-format packet with a definite length.
pub fn write_packet(out: &mut Vec<u8>, tag: Tag, body: &[u8]) {
    out.push(0xC0 | u8::from(tag));
    let len = body.len();
    if len < 192 {
        out.push(len as u8);
    } else if len < 8384 {
        let adjusted = len - 192;
        out.push(((adjusted >> 8) as u8) + 192);
        out.push(adjusted as u8);
    } else {
        out.push(0xFF);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
    out.extend_from_slice(body);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_format_lengths() {
        for len in [0usize, 1, 191, 192, 500, 8383, 8384, 70_000] {
            let body = vec![0x5Au8; len];
            let mut out = Vec::new();
            write_packet(&mut out, Tag::LiteralData, &body);
            let packets = parse_packets(&out).unwrap();
            assert_eq!(packets.len(), 1, "length {len}");
            assert_eq!(packets[0].tag, Tag::LiteralData);
            assert_eq!(packets[0].body.len(), len);
        }
    }

    #[test]
    fn test_old_format_headers() {
        // tag 4, one-byte length; tag 11, two-byte length; tag 2, indeterminate
        let mut data = vec![0x90, 0x02, 0xAA, 0xBB];
        data.extend_from_slice(&[0xAD, 0x00, 0x01, 0xCC]);
        data.extend_from_slice(&[0x8B, 0x01, 0x02, 0x03]);
        let packets = parse_packets(&data).unwrap();
        assert_eq!(packets[0], Packet { tag: Tag::OnePassSignature, body: vec![0xAA, 0xBB] });
        assert_eq!(packets[1], Packet { tag: Tag::LiteralData, body: vec![0xCC] });
        assert_eq!(packets[2], Packet { tag: Tag::Signature, body: vec![0x01, 0x02, 0x03] });
    }

    #[test]
    fn test_partial_body_lengths() {
        // 0xE1 = partial chunk of 2 bytes, then a final definite chunk of 1 byte.
        let data = [0xCB, 0xE1, b'a', b'b', 0x01, b'c'];
        let packets = parse_packets(&data).unwrap();
        assert_eq!(packets[0].body, b"abc");
    }

    #[test]
    fn test_truncated_packet_fails() {
        let err = parse_packets(&[0xC2, 0x05, 0x01]).unwrap_err();
        assert!(matches!(err, AttestError::MalformedPacket(_)));
    }

    #[test]
    fn test_invalid_header_byte_fails() {
        assert!(parse_packets(&[0x42, 0x00]).is_err());
    }

    #[test]
    fn test_mpi_encoding() {
        let mut out = Vec::new();
        write_mpi(&mut out, &[0x00, 0x01, 0xFF]);
        assert_eq!(out, vec![0x00, 0x09, 0x01, 0xFF]);

        let mut reader = Reader::new(&out);
        assert_eq!(reader.read_mpi().unwrap(), &[0x01, 0xFF]);
        assert!(reader.is_empty());

        let mut zero = Vec::new();
        write_mpi(&mut zero, &[0, 0]);
        assert_eq!(zero, vec![0, 0]);
    }

    #[test]
    fn test_left_pad() {
        assert_eq!(left_pad(&[1, 2], 4), Some(vec![0, 0, 1, 2]));
        assert_eq!(left_pad(&[0, 0, 1], 1), Some(vec![1]));
        assert_eq!(left_pad(&[1, 2, 3], 2), None);
    }
}
