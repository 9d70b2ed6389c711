// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request-signature verification (spec §6.4): `t=<unix-seconds>&s=<hex-hmac>`,
//! HMAC-SHA256 of `<timestamp>.<raw-body>`.

use std::time::{SystemTime, UNIX_EPOCH};

use dsdk_error::{DsdkError, ErrorCode};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Clock-skew window a signature's timestamp is accepted within (spec
/// §6.4: "~5 min").
pub const CLOCK_SKEW_WINDOW_SECS: u64 = 300;

/// Strip a signing key's `signkey-<env>-` prefix before using it as raw
/// HMAC key material (spec §6.4).
fn raw_key_material(signing_key: &str) -> &str {
    signing_key.rsplit('-').next().unwrap_or(signing_key)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Constant-time string comparison — the hex digests being compared are
/// fixed-length, so this never leaks length, only per-byte timing.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn parse_header(header: &str) -> Result<(u64, String), DsdkError> {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split('&') {
        let mut kv = part.splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(v)) => timestamp = v.parse::<u64>().ok(),
            (Some("s"), Some(v)) => signature = Some(v.to_string()),
            _ => {}
        }
    }
    match (timestamp, signature) {
        (Some(t), Some(s)) => Ok((t, s)),
        _ => Err(DsdkError::new(
            ErrorCode::SignatureMissing,
            "malformed x-inngest-signature header",
        )),
    }
}

/// Verify `header` against `body` using `signing_key`.
///
/// # Errors
///
/// [`ErrorCode::SignatureMissing`] if `header` doesn't parse,
/// [`ErrorCode::SignatureExpired`] if the timestamp falls outside
/// [`CLOCK_SKEW_WINDOW_SECS`], [`ErrorCode::SignatureInvalid`] if the
/// computed HMAC doesn't match.
pub fn verify_signature(header: &str, body: &[u8], signing_key: &str) -> Result<(), DsdkError> {
    let (timestamp, signature) = parse_header(header)?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    if now.abs_diff(timestamp) > CLOCK_SKEW_WINDOW_SECS {
        return Err(DsdkError::new(
            ErrorCode::SignatureExpired,
            "request signature timestamp outside clock-skew window",
        ));
    }

    let mut mac = HmacSha256::new_from_slice(raw_key_material(signing_key).as_bytes())
        .map_err(|_| DsdkError::new(ErrorCode::SignatureInvalid, "signing key is not valid HMAC key material"))?;
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(body);
    let expected = hex_encode(&mac.finalize().into_bytes());

    if constant_time_eq(&expected, &signature) {
        Ok(())
    } else {
        Err(DsdkError::new(ErrorCode::SignatureInvalid, "signature does not match body"))
    }
}

/// Verify a request, retrying with `fallback_key` on primary failure (spec
/// §4.7 step 1), and relaxing enforcement in dev mode (glossary: "dev
/// mode ... with relaxed auth requirements").
///
/// # Errors
///
/// Returns the primary (or, if a fallback was tried, the fallback)
/// verification error in cloud mode. In dev mode, verification failures
/// are logged and swallowed.
pub fn verify_with_fallback(
    header: Option<&str>,
    body: &[u8],
    signing_key: Option<&str>,
    fallback_key: Option<&str>,
    mode_is_dev: bool,
) -> Result<(), DsdkError> {
    let result = (|| {
        let header = header.ok_or_else(|| {
            DsdkError::new(ErrorCode::SignatureMissing, "missing x-inngest-signature header")
        })?;
        let key = signing_key
            .ok_or_else(|| DsdkError::new(ErrorCode::SignatureMissing, "no signing key configured"))?;
        match verify_signature(header, body, key) {
            Ok(()) => Ok(()),
            Err(primary_err) => match fallback_key {
                Some(fallback) => verify_signature(header, body, fallback),
                None => Err(primary_err),
            },
        }
    })();

    match result {
        Ok(()) => Ok(()),
        Err(err) if mode_is_dev => {
            tracing::debug!(error = %err, "signature verification failed in dev mode; allowing request through");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(timestamp: u64, body: &[u8], key: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(raw_key_material(key).as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(body);
        hex_encode(&mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_verifies() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let body = b"{}";
        let key = "signkey-prod-abc123";
        let sig = sign(now, body, key);
        let header = format!("t={now}&s={sig}");
        assert!(verify_signature(&header, body, key).is_ok());
    }

    #[test]
    fn wrong_key_fails() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let body = b"{}";
        let sig = sign(now, body, "signkey-prod-abc123");
        let header = format!("t={now}&s={sig}");
        let err = verify_signature(&header, body, "signkey-prod-other").unwrap_err();
        assert_eq!(err.code, ErrorCode::SignatureInvalid);
    }

    #[test]
    fn expired_timestamp_is_rejected() {
        let stale = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            .saturating_sub(CLOCK_SKEW_WINDOW_SECS + 60);
        let body = b"{}";
        let key = "signkey-prod-abc123";
        let sig = sign(stale, body, key);
        let header = format!("t={stale}&s={sig}");
        let err = verify_signature(&header, body, key).unwrap_err();
        assert_eq!(err.code, ErrorCode::SignatureExpired);
    }

    #[test]
    fn malformed_header_is_rejected() {
        let err = verify_signature("garbage", b"{}", "signkey-prod-abc").unwrap_err();
        assert_eq!(err.code, ErrorCode::SignatureMissing);
    }

    #[test]
    fn fallback_key_recovers_after_primary_mismatch() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let body = b"{}";
        let sig = sign(now, body, "signkey-prod-new");
        let header = format!("t={now}&s={sig}");
        let result = verify_with_fallback(
            Some(&header),
            body,
            Some("signkey-prod-old"),
            Some("signkey-prod-new"),
            false,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn dev_mode_swallows_verification_failure() {
        let result = verify_with_fallback(None, b"{}", None, None, true);
        assert!(result.is_ok());
    }

    #[test]
    fn cloud_mode_rejects_missing_header() {
        let result = verify_with_fallback(None, b"{}", Some("signkey-prod-abc"), None, false);
        assert_eq!(result.unwrap_err().code, ErrorCode::SignatureMissing);
    }
}
