use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

use super::{DecodeError, Tlv, GENERALIZED_TIME, UTC_TIME};

/// Decodes an X.509 `Time` (either UTCTime or GeneralizedTime) by its tag.
pub fn decode_time(tlv: &Tlv<'_>) -> Result<OffsetDateTime, DecodeError> {
    let text = std::str::from_utf8(tlv.value)
        .map_err(|_| DecodeError::InvalidTime(String::from_utf8_lossy(tlv.value).into_owned()))?;

    match tlv.tag {
        UTC_TIME => parse_utc_time(text),
        GENERALIZED_TIME => parse_generalized_time(text),
        found => Err(DecodeError::UnexpectedTag {
            expected: UTC_TIME,
            found,
        }),
    }
}

/// Parses `YYMMDDHHMM[SS]Z`.
///
/// Two-digit years of 50 and above are 19xx, the rest 20xx (RFC 5280 §4.1.2.5.1).
pub fn parse_utc_time(text: &str) -> Result<OffsetDateTime, DecodeError> {
    let (digits, fields) = split_fields(text, 2)?;
    let yy = digits[0];
    let year = if yy >= 50 { 1900 + yy } else { 2000 + yy };

    assemble(text, year, &digits[1..fields])
}

/// Parses `YYYYMMDDHHMM[SS]Z`.
pub fn parse_generalized_time(text: &str) -> Result<OffsetDateTime, DecodeError> {
    let (digits, fields) = split_fields(text, 4)?;
    assemble(text, digits[0], &digits[1..fields])
}

/// Splits the digits into `[year, month, day, hour, minute, second?]`.
fn split_fields(text: &str, year_len: usize) -> Result<([u32; 6], usize), DecodeError> {
    let invalid = || DecodeError::InvalidTime(text.to_owned());

    let body = text.strip_suffix('Z').ok_or_else(invalid)?;
    if !body.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let fields = match body.len().checked_sub(year_len) {
        Some(8) => 5,
        Some(10) => 6,
        _ => return Err(invalid()),
    };

    let mut digits = [0; 6];
    let mut rest = body;
    for (i, slot) in digits.iter_mut().take(fields).enumerate() {
        let width = if i == 0 { year_len } else { 2 };
        let (field, tail) = rest.split_at(width);
        *slot = field.parse().map_err(|_| invalid())?;
        rest = tail;
    }

    Ok((digits, fields))
}

/// `rest` holds month, day, hour, minute and, optionally, seconds (defaulting to zero).
fn assemble(text: &str, year: u32, rest: &[u32]) -> Result<OffsetDateTime, DecodeError> {
    let invalid = |_| DecodeError::InvalidTime(text.to_owned());

    let second = rest.get(4).copied().unwrap_or(0);
    let month = Month::try_from(rest[0] as u8).map_err(invalid)?;
    let date = Date::from_calendar_date(year as i32, month, rest[1] as u8).map_err(invalid)?;
    let time = Time::from_hms(rest[2] as u8, rest[3] as u8, second as u8).map_err(invalid)?;

    Ok(PrimitiveDateTime::new(date, time).assume_utc())
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::asn1::{decode_tlv, encode_tlv};

    #[test]
    fn test_utc_time() {
        assert_eq!(
            parse_utc_time("240101000000Z").unwrap(),
            datetime!(2024-01-01 00:00:00 UTC)
        );
        assert_eq!(
            parse_utc_time("4912312359Z").unwrap(),
            datetime!(2049-12-31 23:59:00 UTC)
        );
        assert_eq!(
            parse_utc_time("500101000001Z").unwrap(),
            datetime!(1950-01-01 00:00:01 UTC)
        );
    }

    #[test]
    fn test_generalized_time() {
        assert_eq!(
            parse_generalized_time("20600101120000Z").unwrap(),
            datetime!(2060-01-01 12:00:00 UTC)
        );
        assert_eq!(
            parse_generalized_time("205001011230Z").unwrap(),
            datetime!(2050-01-01 12:30:00 UTC)
        );
    }

    #[test]
    fn test_bad_formats() {
        for text in [
            "",
            "Z",
            "240101000000",
            "2401010000000Z",
            "24010100000+0100",
            "24o101000000Z",
            "241301000000Z",
            "240230000000Z",
            "240101250000Z",
        ] {
            assert!(
                matches!(parse_utc_time(text), Err(DecodeError::InvalidTime(_))),
                "{text:?} should not parse"
            );
        }

        assert!(parse_generalized_time("202401010000Z").is_ok());
        assert!(parse_generalized_time("2401010000Z").is_err());
    }

    #[test]
    fn test_decode_time_dispatches_on_tag() {
        let utc = encode_tlv(UTC_TIME, b"240331000000Z");
        let gen = encode_tlv(GENERALIZED_TIME, b"20240331000000Z");

        assert_eq!(
            decode_time(&decode_tlv(&utc).unwrap()).unwrap(),
            decode_time(&decode_tlv(&gen).unwrap()).unwrap(),
        );

        let other = encode_tlv(0x13, b"240331000000Z");
        assert!(decode_time(&decode_tlv(&other).unwrap()).is_err());
    }
}
