use base64::prelude::*;

pub(crate) fn base64url<T: ?Sized + AsRef<[u8]>>(input: &T) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(input)
}

/// Minimal big-endian encoding of `n`.
///
/// Zero encodes as a single `0x00` byte so the result is never empty.
pub(crate) fn uint_to_be_bytes(n: u64) -> Vec<u8> {
    let bytes = n.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
    bytes[first..].to_vec()
}

/// Reads a big-endian unsigned integer of at most eight bytes.
pub(crate) fn uint_from_be_bytes(bytes: &[u8]) -> Option<u64> {
    if bytes.len() > 8 {
        return None;
    }

    Some(bytes.iter().fold(0, |acc, &b| (acc << 8) | u64::from(b)))
}

pub(crate) fn concat<I, T>(parts: I) -> Vec<u8>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    parts.into_iter().fold(Vec::new(), |mut buf, part| {
        buf.extend_from_slice(part.as_ref());
        buf
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_to_be_bytes() {
        assert_eq!(uint_to_be_bytes(0), [0x00]);
        assert_eq!(uint_to_be_bytes(0x7f), [0x7f]);
        assert_eq!(uint_to_be_bytes(0x0100), [0x01, 0x00]);
        assert_eq!(uint_to_be_bytes(0x01_0000), [0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_uint_from_be_bytes() {
        assert_eq!(uint_from_be_bytes(&[]), Some(0));
        assert_eq!(uint_from_be_bytes(&[0x01, 0x00]), Some(256));
        assert_eq!(uint_from_be_bytes(&[0xff; 8]), Some(u64::MAX));
        assert_eq!(uint_from_be_bytes(&[0x01; 9]), None);
    }

    #[test]
    fn test_concat() {
        assert_eq!(concat([&[1u8, 2][..], &[], &[3]]), [1, 2, 3]);
    }

    #[test]
    fn test_base64url_has_no_padding() {
        assert_eq!(base64url("ab"), "YWI");
        assert_eq!(base64url(&[0xfb, 0xff]), "-_8");
    }
}
