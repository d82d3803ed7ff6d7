//! Encoding and timestamp formatting helpers shared with the host layer.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::error::EncodingError;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";
const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn decode_hex(text: &str) -> Result<Vec<u8>, EncodingError> {
    Ok(hex::decode(text)?)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>, EncodingError> {
    Ok(STANDARD.decode(text)?)
}

/// The UTC date (`YYYY-MM-DD`) if `timestamp` is more than 24 hours old,
/// otherwise the UTC time of day (`HH:MM:SS`).
pub fn extract_date_or_time(timestamp: i64) -> String {
    extract_date_or_time_at(Utc::now(), timestamp)
}

/// [`extract_date_or_time`] against an explicit `now`.
pub fn extract_date_or_time_at(now: DateTime<Utc>, timestamp: i64) -> String {
    let Some(time) = DateTime::from_timestamp(timestamp, 0) else {
        return timestamp.to_string();
    };

    if now.signed_duration_since(time).num_seconds() > 24 * 60 * 60 {
        time.format(DATE_FORMAT).to_string()
    } else {
        time.format(TIME_FORMAT).to_string()
    }
}

/// `YYYY-MM-DD HH:MM:SS` in UTC.
pub fn format_utc_time(timestamp: i64) -> String {
    match DateTime::from_timestamp(timestamp, 0) {
        Some(time) => time.format(DATE_TIME_FORMAT).to_string(),
        None => timestamp.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let bytes: Vec<u8> = (0..=255).collect();
        let encoded = encode_hex(&bytes);
        assert_eq!(&encoded[..6], "000102");
        assert_eq!(decode_hex(&encoded).unwrap(), bytes);
        assert_eq!(decode_hex("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_base64_round_trip() {
        for bytes in [&b""[..], b"f", b"fo", b"foo", b"\x00\xff\x10binary"] {
            assert_eq!(decode_base64(&encode_base64(bytes)).unwrap(), bytes);
        }
        assert_eq!(encode_base64(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn test_decode_failures() {
        assert!(matches!(decode_hex("abc"), Err(EncodingError::Hex(_))));
        assert!(matches!(decode_hex("zz"), Err(EncodingError::Hex(_))));
        assert!(matches!(decode_base64("not base64!"), Err(EncodingError::Base64(_))));
    }

    #[test]
    fn test_format_utc_time() {
        assert_eq!(format_utc_time(0), "1970-01-01 00:00:00");
        assert_eq!(format_utc_time(1_700_000_000), "2023-11-14 22:13:20");
    }

    #[test]
    fn test_extract_date_or_time() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(extract_date_or_time_at(now, 1_700_000_000 - 60), "22:12:20");
        assert_eq!(extract_date_or_time_at(now, 1_700_000_000 - 86_400), "22:13:20");
        assert_eq!(extract_date_or_time_at(now, 1_700_000_000 - 86_401), "2023-11-13");
    }
}
