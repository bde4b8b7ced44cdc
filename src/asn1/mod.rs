//! Minimal ASN.1 DER codec.
//!
//! Covers exactly what is needed to build PKCS#10 requests and to walk an issued X.509
//! certificate: tag-length-value framing, INTEGER, OBJECT IDENTIFIER, BIT STRING, OCTET STRING,
//! UTF8String, SEQUENCE, SET and context-specific tags.
//!
//! Encoders return complete TLVs so they can be nested by concatenation. Decoders borrow from the
//! input and never read past it; any framing problem is a [`DecodeError`].

use crate::util::{concat, uint_from_be_bytes, uint_to_be_bytes};

mod time;

pub use self::time::{decode_time, parse_generalized_time, parse_utc_time};

pub const INTEGER: u8 = 0x02;
pub const BIT_STRING: u8 = 0x03;
pub const OCTET_STRING: u8 = 0x04;
pub const NULL: u8 = 0x05;
pub const OBJECT_IDENTIFIER: u8 = 0x06;
pub const UTF8_STRING: u8 = 0x0c;
pub const UTC_TIME: u8 = 0x17;
pub const GENERALIZED_TIME: u8 = 0x18;
pub const SEQUENCE: u8 = 0x30;
pub const SET: u8 = 0x31;

pub const CONSTRUCTED: u8 = 0x20;
pub const CONTEXT_SPECIFIC: u8 = 0x80;

/// Low five bits of an identifier octet that announce a multi-byte tag number.
const HIGH_TAG_NUMBER: u8 = 0x1f;

/// Errors produced while decoding DER or PEM input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated DER input: needed {needed} more byte(s)")]
    Truncated { needed: usize },

    #[error("DER length uses {0} octets, which is unsupported")]
    LengthOverflow(usize),

    #[error("indefinite length is not allowed in DER")]
    IndefiniteLength,

    #[error("unexpected tag {found:#04x}, expected {expected:#04x}")]
    UnexpectedTag { expected: u8, found: u8 },

    #[error("missing {0}")]
    MissingElement(&'static str),

    #[error("invalid {0} encoding")]
    InvalidValue(&'static str),

    #[error("invalid time {0:?}")]
    InvalidTime(String),

    #[error("malformed PEM: {0}")]
    Pem(String),
}

/// One decoded tag-length-value element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    /// The identifier octet.
    pub tag: u8,

    /// Declared content length.
    pub length: usize,

    /// Content octets.
    pub value: &'a [u8],

    /// The complete element, identifier and length octets included.
    pub raw: &'a [u8],
}

impl<'a> Tlv<'a> {
    /// Fails unless this element carries `tag`.
    pub fn expect(self, tag: u8) -> Result<Self, DecodeError> {
        if self.tag == tag {
            Ok(self)
        } else {
            Err(DecodeError::UnexpectedTag {
                expected: tag,
                found: self.tag,
            })
        }
    }

    pub fn is_constructed(&self) -> bool {
        self.tag & CONSTRUCTED != 0
    }

    /// Decodes the content octets as a series of complete TLVs.
    pub fn children(&self) -> Result<Vec<Tlv<'a>>, DecodeError> {
        decode_all(self.value)
    }

    /// Returns the magnitude of a non-negative INTEGER, without the sign octet.
    ///
    /// DER integers are minimal, so this is the input of [`uint`] with its leading zeros removed.
    pub fn as_uint(&self) -> Result<&'a [u8], DecodeError> {
        let value = self.expect(INTEGER)?.value;

        match value {
            [] => Err(DecodeError::InvalidValue("INTEGER")),
            [first, ..] if first & 0x80 != 0 => Err(DecodeError::InvalidValue("INTEGER")),
            [0, rest @ ..] if !rest.is_empty() => Ok(rest),
            _ => Ok(value),
        }
    }

    /// Returns the payload of a BIT STRING with no unused bits.
    pub fn as_bit_string(&self) -> Result<&'a [u8], DecodeError> {
        match self.expect(BIT_STRING)?.value {
            [0, rest @ ..] => Ok(rest),
            _ => Err(DecodeError::InvalidValue("BIT STRING")),
        }
    }

    pub fn as_utf8(&self) -> Result<&'a str, DecodeError> {
        std::str::from_utf8(self.expect(UTF8_STRING)?.value)
            .map_err(|_| DecodeError::InvalidValue("UTF8String"))
    }

    pub fn as_oid(&self) -> Result<Vec<u64>, DecodeError> {
        decode_oid(self.expect(OBJECT_IDENTIFIER)?.value)
    }
}

/// Encodes a DER length.
///
/// Lengths below 128 take a single octet; longer ones use the long form: `0x80 | n` followed by
/// the `n` big-endian length octets.
pub fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }

    let octets = uint_to_be_bytes(len as u64);
    concat([&[0x80 | octets.len() as u8][..], &octets])
}

pub fn encode_tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    concat([&[tag][..], &encode_length(value.len()), value])
}

/// INTEGER from unsigned big-endian bytes.
///
/// Redundant leading zeros are dropped and a zero octet is prepended whenever the high bit is set,
/// so the result never reads as negative. [`Tlv::as_uint`] therefore returns the minimal magnitude:
/// `[0x00, 0x05]` comes back as `[0x05]` and an empty input as `[0x00]`.
pub fn uint(bytes: &[u8]) -> Vec<u8> {
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    let magnitude = &bytes[first..];

    match magnitude.first() {
        None => encode_tlv(INTEGER, &[0]),
        Some(b) if b & 0x80 != 0 => encode_tlv(INTEGER, &concat([&[0][..], magnitude])),
        Some(_) => encode_tlv(INTEGER, magnitude),
    }
}

pub fn integer(n: u64) -> Vec<u8> {
    uint(&uint_to_be_bytes(n))
}

/// OBJECT IDENTIFIER from its arcs.
///
/// Missing leading arcs read as zero and the combined first subidentifier saturates.
pub(crate) fn oid(arcs: &[u64]) -> Vec<u8> {
    let (head, rest) = match arcs {
        [first, second, rest @ ..] => (first.saturating_mul(40).saturating_add(*second), rest),
        [first] => (first.saturating_mul(40), &[][..]),
        [] => (0, &[][..]),
    };

    let mut value = Vec::new();
    for arc in std::iter::once(head).chain(rest.iter().copied()) {
        value.extend(base128(arc));
    }

    encode_tlv(OBJECT_IDENTIFIER, &value)
}

fn base128(mut arc: u64) -> Vec<u8> {
    let mut out = vec![(arc & 0x7f) as u8];
    arc >>= 7;

    while arc > 0 {
        out.push(0x80 | (arc & 0x7f) as u8);
        arc >>= 7;
    }

    out.reverse();
    out
}

/// BIT STRING over whole octets (zero unused bits).
pub fn bit_string(bytes: &[u8]) -> Vec<u8> {
    encode_tlv(BIT_STRING, &concat([&[0][..], bytes]))
}

pub fn octet_string(bytes: &[u8]) -> Vec<u8> {
    encode_tlv(OCTET_STRING, bytes)
}

pub fn utf8_string(s: &str) -> Vec<u8> {
    encode_tlv(UTF8_STRING, s.as_bytes())
}

pub fn sequence<I, T>(children: I) -> Vec<u8>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    encode_tlv(SEQUENCE, &concat(children))
}

pub fn set<I, T>(children: I) -> Vec<u8>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    encode_tlv(SET, &concat(children))
}

/// Context-specific `[number]` tag around raw content octets.
pub fn context(number: u8, constructed: bool, value: &[u8]) -> Vec<u8> {
    let mut tag = CONTEXT_SPECIFIC | (number & HIGH_TAG_NUMBER);
    if constructed {
        tag |= CONSTRUCTED;
    }

    encode_tlv(tag, value)
}

/// Decodes the first TLV in `input`.
///
/// Trailing bytes after the element are ignored; see [`Tlv::raw`] for how much was consumed.
pub fn decode_tlv(input: &[u8]) -> Result<Tlv<'_>, DecodeError> {
    let (&tag, _) = input
        .split_first()
        .ok_or(DecodeError::Truncated { needed: 1 })?;

    let mut pos = 1;

    if tag & HIGH_TAG_NUMBER == HIGH_TAG_NUMBER {
        loop {
            let b = *input
                .get(pos)
                .ok_or(DecodeError::Truncated { needed: 1 })?;
            pos += 1;

            if b & 0x80 == 0 {
                break;
            }
        }
    }

    let first_len = *input
        .get(pos)
        .ok_or(DecodeError::Truncated { needed: 1 })?;
    pos += 1;

    let length = if first_len & 0x80 == 0 {
        usize::from(first_len)
    } else {
        let count = usize::from(first_len & 0x7f);

        if count == 0 {
            return Err(DecodeError::IndefiniteLength);
        }
        if count > std::mem::size_of::<usize>() {
            return Err(DecodeError::LengthOverflow(count));
        }

        let octets = input
            .get(pos..pos + count)
            .ok_or_else(|| DecodeError::Truncated {
                needed: (pos + count).saturating_sub(input.len()),
            })?;
        pos += count;

        uint_from_be_bytes(octets)
            .and_then(|len| usize::try_from(len).ok())
            .ok_or(DecodeError::LengthOverflow(count))?
    };

    let end = pos
        .checked_add(length)
        .ok_or(DecodeError::LengthOverflow(length))?;

    if end > input.len() {
        return Err(DecodeError::Truncated {
            needed: end - input.len(),
        });
    }

    Ok(Tlv {
        tag,
        length,
        value: &input[pos..end],
        raw: &input[..end],
    })
}

/// Decodes a SEQUENCE (or SET) and returns its child elements.
///
/// Children are returned as complete TLVs so callers can re-decode them by type.
pub fn decode_sequence(input: &[u8]) -> Result<Vec<Tlv<'_>>, DecodeError> {
    let tlv = decode_tlv(input)?;

    if tlv.tag != SEQUENCE && tlv.tag != SET {
        return Err(DecodeError::UnexpectedTag {
            expected: SEQUENCE,
            found: tlv.tag,
        });
    }

    tlv.children()
}

/// Decodes back-to-back TLVs until `input` is exhausted.
pub fn decode_all(mut input: &[u8]) -> Result<Vec<Tlv<'_>>, DecodeError> {
    let mut children = Vec::new();

    while !input.is_empty() {
        let child = decode_tlv(input)?;
        input = &input[child.raw.len()..];
        children.push(child);
    }

    Ok(children)
}

fn decode_oid(value: &[u8]) -> Result<Vec<u64>, DecodeError> {
    let mut subids = Vec::new();
    let mut acc: u64 = 0;
    let mut pending = false;

    for &b in value {
        if acc > (u64::MAX >> 7) {
            return Err(DecodeError::InvalidValue("OBJECT IDENTIFIER"));
        }

        acc = (acc << 7) | u64::from(b & 0x7f);
        pending = b & 0x80 != 0;

        if !pending {
            subids.push(acc);
            acc = 0;
        }
    }

    if pending || subids.is_empty() {
        return Err(DecodeError::InvalidValue("OBJECT IDENTIFIER"));
    }

    let first = subids[0];
    let (arc1, arc2) = match first {
        0..=39 => (0, first),
        40..=79 => (1, first - 40),
        _ => (2, first - 80),
    };

    let mut arcs = vec![arc1, arc2];
    arcs.extend_from_slice(&subids[1..]);
    Ok(arcs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_and_long_lengths() {
        assert_eq!(encode_length(0), [0x00]);
        assert_eq!(encode_length(127), [0x7f]);
        assert_eq!(encode_length(128), [0x81, 0x80]);
        assert_eq!(encode_length(256), [0x82, 0x01, 0x00]);
    }

    #[test]
    fn test_integer_never_negative() {
        assert_eq!(uint(&[0x7f]), [0x02, 0x01, 0x7f]);
        assert_eq!(uint(&[0x80]), [0x02, 0x02, 0x00, 0x80]);
        assert_eq!(uint(&[0x00, 0x00, 0x01]), [0x02, 0x01, 0x01]);
        assert_eq!(uint(&[]), [0x02, 0x01, 0x00]);
        assert_eq!(integer(0), [0x02, 0x01, 0x00]);
    }

    #[test]
    fn test_oid_encoding() {
        // id-ecPublicKey
        assert_eq!(
            oid(&[1, 2, 840, 10045, 2, 1]),
            [0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01],
        );
        // commonName
        assert_eq!(oid(&[2, 5, 4, 3]), [0x06, 0x03, 0x55, 0x04, 0x03]);
    }

    #[test]
    fn test_oid_decoding() {
        let encoded = oid(&[1, 2, 840, 113549, 1, 9, 14]);
        let tlv = decode_tlv(&encoded).unwrap();
        assert_eq!(tlv.as_oid().unwrap(), [1, 2, 840, 113549, 1, 9, 14]);

        let encoded = oid(&[2, 999, 3]);
        assert_eq!(decode_tlv(&encoded).unwrap().as_oid().unwrap(), [2, 999, 3]);
    }

    #[test]
    fn test_primitives_decode_what_they_encode() {
        let big = vec![0xa5; 300];

        let encoded = uint(&big);
        assert_eq!(decode_tlv(&encoded).unwrap().as_uint().unwrap(), &big[..]);

        let encoded = octet_string(&big);
        let tlv = decode_tlv(&encoded).unwrap().expect(OCTET_STRING).unwrap();
        assert_eq!(tlv.value, &big[..]);
        assert_eq!(tlv.length, 300);
        assert_eq!(tlv.raw.len(), encoded.len());

        let encoded = utf8_string("bücher.example");
        assert_eq!(
            decode_tlv(&encoded).unwrap().as_utf8().unwrap(),
            "bücher.example"
        );

        let encoded = bit_string(&[1, 2, 3]);
        assert_eq!(decode_tlv(&encoded).unwrap().as_bit_string().unwrap(), [1, 2, 3]);
    }

    #[test]
    fn test_sequence_children_are_whole_tlvs() {
        let first = integer(5);
        let second = utf8_string("x");
        let seq = sequence([&first, &second]);

        let children = decode_sequence(&seq).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].raw, &first[..]);
        assert_eq!(children[1].raw, &second[..]);

        let set = set([&first]);
        assert_eq!(decode_sequence(&set).unwrap().len(), 1);
    }

    #[test]
    fn test_context_tags() {
        assert_eq!(context(0, true, &[])[0], 0xa0);
        assert_eq!(context(2, false, b"a")[..], [0x82, 0x01, b'a']);
    }

    #[test]
    fn test_truncated_input_fails() {
        assert_eq!(decode_tlv(&[]), Err(DecodeError::Truncated { needed: 1 }));
        assert_eq!(decode_tlv(&[0x30]), Err(DecodeError::Truncated { needed: 1 }));
        assert_eq!(
            decode_tlv(&[0x04, 0x05, 0x01]),
            Err(DecodeError::Truncated { needed: 4 })
        );
        assert_eq!(
            decode_tlv(&[0x04, 0x82, 0x01]),
            Err(DecodeError::Truncated { needed: 1 })
        );
        assert_eq!(decode_tlv(&[0x30, 0x80]), Err(DecodeError::IndefiniteLength));
    }

    #[test]
    fn test_child_overrunning_parent_fails() {
        // the SEQUENCE claims 3 bytes, but its only child claims 4
        let input = [0x30, 0x03, 0x04, 0x04, 0x00];
        assert!(matches!(
            decode_sequence(&input),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_unexpected_tag() {
        let encoded = octet_string(b"abc");
        assert_eq!(
            decode_tlv(&encoded).unwrap().as_uint(),
            Err(DecodeError::UnexpectedTag {
                expected: INTEGER,
                found: OCTET_STRING,
            })
        );
        assert!(matches!(
            decode_sequence(&encoded),
            Err(DecodeError::UnexpectedTag { .. })
        ));
    }

    #[test]
    fn test_long_form_octet_strings() {
        for len in [128, 256, 65536] {
            let payload = vec![7; len];
            let encoded = octet_string(&payload);

            let tlv = decode_tlv(&encoded).unwrap().expect(OCTET_STRING).unwrap();
            assert_eq!(tlv.length, len);
            assert_eq!(tlv.value, &payload[..]);
            assert_eq!(tlv.raw.len(), encoded.len());
        }
    }

    #[test]
    fn test_round_trip_at_length_boundaries() {
        let mut payloads: Vec<Vec<u8>> = vec![vec![], vec![0x80]];
        payloads.extend([127, 128, 255, 256, 65536].map(|len| vec![0x80; len]));

        for payload in &payloads {
            let encoded = octet_string(payload);
            let tlv = decode_tlv(&encoded).unwrap();
            assert_eq!(tlv.value, &payload[..], "OCTET STRING of {} bytes", payload.len());
            assert_eq!(tlv.raw, &encoded[..]);

            let encoded = bit_string(payload);
            assert_eq!(decode_tlv(&encoded).unwrap().as_bit_string().unwrap(), &payload[..]);

            if !payload.is_empty() {
                let encoded = uint(payload);
                assert_eq!(decode_tlv(&encoded).unwrap().as_uint().unwrap(), &payload[..]);
            }

            let text = "a".repeat(payload.len());
            let encoded = utf8_string(&text);
            assert_eq!(decode_tlv(&encoded).unwrap().as_utf8().unwrap(), text);
        }
    }

    #[test]
    fn test_sequence_inside_long_form_sequence() {
        let leaf = octet_string(&[1; 200]);
        let inner = sequence([&leaf]);
        let outer = sequence([&inner[..], &integer(7)[..]]);
        assert_eq!(outer[1], 0x81);

        let children = decode_sequence(&outer).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].raw, &inner[..]);
        assert_eq!(children[1].as_uint().unwrap(), [7]);

        let grandchildren = children[0].expect(SEQUENCE).unwrap().children().unwrap();
        assert_eq!(grandchildren.len(), 1);
        assert_eq!(grandchildren[0].value, &[1; 200][..]);
    }

    #[test]
    fn test_uint_round_trip_is_minimal() {
        let encoded = uint(&[0x00, 0x05]);
        assert_eq!(decode_tlv(&encoded).unwrap().as_uint().unwrap(), [0x05]);

        let encoded = uint(&[]);
        assert_eq!(decode_tlv(&encoded).unwrap().as_uint().unwrap(), [0x00]);
    }

    #[test]
    fn test_oid_with_too_few_arcs() {
        assert_eq!(oid(&[]), [0x06, 0x01, 0x00]);
        assert_eq!(oid(&[1]), [0x06, 0x01, 0x28]);
        assert_eq!(decode_tlv(&oid(&[2])).unwrap().as_oid().unwrap(), [2, 0]);

        // saturates instead of overflowing
        let encoded = oid(&[u64::MAX, 1]);
        assert_eq!(decode_tlv(&encoded).unwrap().as_oid().unwrap()[0], 2);
    }
}
