//! RFC 6238 time-based one-time passwords (HMAC-SHA1, 6 digits, 30 s step).

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

pub const DIGITS: u32 = 6;
pub const STEP_SECONDS: i64 = 30;
/// Codes from one step either side of the current one are accepted.
pub const SKEW_STEPS: u64 = 1;
pub const SECRET_LEN: usize = 20;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

pub fn generate_secret() -> Vec<u8> {
    let mut secret = vec![0u8; SECRET_LEN];
    OsRng.fill_bytes(&mut secret);
    secret
}

/// RFC 4648 base32 without padding, as authenticator apps expect.
pub fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
        buffer &= (1 << bits) - 1;
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

pub fn time_step(unix_seconds: i64) -> u64 {
    (unix_seconds.max(0) / STEP_SECONDS) as u64
}

/// RFC 4226 HOTP value for `counter`, zero-padded.
pub fn hotp(secret: &[u8], counter: u64) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha1::new_from_slice(secret)
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = (u32::from(digest[offset] & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);
    let value = binary % 10u32.pow(DIGITS);
    Ok(format!("{:0width$}", value, width = DIGITS as usize))
}

pub fn totp_at(secret: &[u8], unix_seconds: i64) -> Result<String, anyhow::Error> {
    hotp(secret, time_step(unix_seconds))
}

/// Time step whose code matches `code` within the skew window, if any.
/// Comparison is constant-time per candidate.
pub fn matching_step(
    secret: &[u8],
    code: &str,
    unix_seconds: i64,
) -> Result<Option<u64>, anyhow::Error> {
    let current = time_step(unix_seconds);
    let first = current.saturating_sub(SKEW_STEPS);
    for step in first..=current + SKEW_STEPS {
        let expected = hotp(secret, step)?;
        if bool::from(expected.as_bytes().ct_eq(code.trim().as_bytes())) {
            return Ok(Some(step));
        }
    }
    Ok(None)
}

/// `otpauth://` URI for QR enrollment.
pub fn provisioning_uri(issuer: &str, account: &str, secret: &[u8]) -> String {
    format!(
        "otpauth://totp/{}:{}?secret={}&issuer={}&algorithm=SHA1&digits={}&period={}",
        urlencoding::encode(issuer),
        urlencoding::encode(account),
        base32_encode(secret),
        urlencoding::encode(issuer),
        DIGITS,
        STEP_SECONDS
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC_SECRET: &[u8] = b"12345678901234567890";

    #[test]
    fn test_rfc6238_vectors() {
        assert_eq!(totp_at(RFC_SECRET, 59).unwrap(), "287082");
        assert_eq!(totp_at(RFC_SECRET, 1111111109).unwrap(), "081804");
        assert_eq!(totp_at(RFC_SECRET, 1234567890).unwrap(), "005924");
    }

    #[test]
    fn test_base32_of_rfc_secret() {
        assert_eq!(base32_encode(RFC_SECRET), "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ");
        assert_eq!(base32_encode(b"f"), "MY");
    }

    #[test]
    fn test_matching_step_allows_one_step_skew() {
        let now = 1_700_000_000;
        let previous = totp_at(RFC_SECRET, now - 30).unwrap();
        let too_old = totp_at(RFC_SECRET, now - 90).unwrap();

        assert_eq!(
            matching_step(RFC_SECRET, &previous, now).unwrap(),
            Some(time_step(now) - 1)
        );
        assert_eq!(matching_step(RFC_SECRET, &too_old, now).unwrap(), None);
    }

    #[test]
    fn test_provisioning_uri_escapes_account() {
        let uri = provisioning_uri("Deal Room", "ann@example.com", RFC_SECRET);
        assert!(uri.starts_with("otpauth://totp/Deal%20Room:ann%40example.com?secret=GEZD"));
        assert!(uri.contains("issuer=Deal%20Room"));
    }

    #[test]
    fn test_generated_secret_length() {
        assert_eq!(generate_secret().len(), SECRET_LEN);
    }
}
