use proptest::prelude::*;

use chrono::{TimeZone, Utc};
use ed25519_dalek::SigningKey;
use pgp_attest::armor::{self, Armor, BlockType};
use pgp_attest::packet::{parse_packets, write_packet, Tag};
use pgp_attest::signature::LiteralData;
use pgp_attest::{AttestError, Key, KeyRing, PgpSigner, PgpVerifier, Signer};
use std::sync::OnceLock;

const RADIX64: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn fixture() -> &'static (PgpSigner, KeyRing) {
    static FIXTURE: OnceLock<(PgpSigner, KeyRing)> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let seed = SigningKey::from_bytes(&[7u8; 32]);
        let key = Key::from_ed25519(seed, "Property <prop@example.com>", created).unwrap();
        let ring = KeyRing::from_keys(vec![key.to_public()]);
        (PgpSigner::from_key(key).unwrap(), ring)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn sign_verify_roundtrip(payload in prop::collection::vec(any::<u8>(), 0..2048)) {
        let (signer, ring) = fixture();
        let attestation = signer.create_attestation(&payload).unwrap();
        let recovered = PgpVerifier::new().verify_with_ring(&attestation.signature, ring).unwrap();
        prop_assert_eq!(recovered, payload);
    }

    #[test]
    fn armored_body_tamper_detected(
        payload in prop::collection::vec(any::<u8>(), 1..256),
        pick in any::<prop::sample::Index>(),
        replacement in any::<prop::sample::Index>(),
    ) {
        let (signer, ring) = fixture();
        let attestation = signer.create_attestation(&payload).unwrap();
        let text = String::from_utf8(attestation.signature).unwrap();

        // Radix-64 body lines sit between the blank separator and the CRC line.
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.iter().position(|l| l.is_empty()).unwrap() + 1;
        let end = lines.iter().position(|l| l.starts_with('=')).unwrap();
        let positions: Vec<(usize, usize)> = (start..end)
            .flat_map(|i| (0..lines[i].len()).map(move |j| (i, j)))
            .collect();
        let (line, col) = positions[pick.index(positions.len())];

        let original = lines[line].as_bytes()[col];
        let candidates: Vec<u8> = RADIX64.iter().copied().filter(|&c| c != original).collect();
        let mut tampered_line = lines[line].as_bytes().to_vec();
        tampered_line[col] = candidates[replacement.index(candidates.len())];

        let mut tampered: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        tampered[line] = String::from_utf8(tampered_line).unwrap();
        let tampered = tampered.join("\n") + "\n";

        let err = PgpVerifier::new().verify_with_ring(tampered.as_bytes(), ring).unwrap_err();
        prop_assert!(
            matches!(err, AttestError::ArmorFormat(_) | AttestError::SignatureMismatch(_)),
            "unexpected error {:?}", err
        );
    }

    #[test]
    fn payload_bit_flip_detected(
        payload in prop::collection::vec(any::<u8>(), 1..256),
        pick in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let (signer, ring) = fixture();
        let attestation = signer.create_attestation(&payload).unwrap();
        let decoded = armor::decode(&attestation.signature).unwrap();
        let mut packets = parse_packets(&decoded.body).unwrap();

        let mut literal = LiteralData::parse(&packets[1].body).unwrap();
        let i = pick.index(literal.data.len());
        literal.data[i] ^= 1 << bit;
        packets[1].body = literal.to_body();

        let mut body = Vec::new();
        for p in &packets {
            write_packet(&mut body, p.tag, &p.body);
        }
        let rearmored = armor::encode(&BlockType::Signature, &body);

        let err = PgpVerifier::new().verify_with_ring(rearmored.as_bytes(), ring).unwrap_err();
        prop_assert!(matches!(err, AttestError::SignatureMismatch(_)));
    }

    #[test]
    fn armor_roundtrip(
        body in prop::collection::vec(any::<u8>(), 0..1024),
        comment in "[ -~]{0,40}",
    ) {
        let block = Armor::new(BlockType::Message, body.clone());
        let block = match block.with_header("Comment", comment.clone()) {
            Ok(block) => block,
            Err(err) => {
                // Only values with surrounding spaces are refused.
                prop_assert_ne!(comment.trim(), comment.as_str());
                prop_assert!(matches!(err, AttestError::ArmorFormat(_)));
                return Ok(());
            }
        };
        let text = block.to_text();
        let decoded = armor::decode(text.as_bytes()).unwrap();
        prop_assert_eq!(decoded.header("Comment"), Some(comment.as_str()));
        prop_assert_eq!(&decoded.body, &body);
        prop_assert_eq!(decoded.to_text(), text);
    }

    #[test]
    fn packet_framing_roundtrip(body in prop::collection::vec(any::<u8>(), 0..10_000)) {
        let mut out = Vec::new();
        write_packet(&mut out, Tag::LiteralData, &body);
        let packets = parse_packets(&out).unwrap();
        prop_assert_eq!(packets.len(), 1);
        prop_assert_eq!(&packets[0].body, &body);
    }
}
