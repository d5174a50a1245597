//! HMAC-SHA256 authentication of inbound webhook deliveries.
//!
//! The platform signs every delivery body with the shared webhook secret and
//! sends the digest in `X-Hub-Signature-256` as `sha256=<hex>`. Verification
//! runs on the raw bytes, before anything is decoded or dispatched.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Prefix naming the digest algorithm in the signature header.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Extracts the raw digest bytes from a signature header value.
///
/// Returns `None` when the `sha256=` prefix is absent or the remainder is not
/// valid hex.
///
/// ```
/// use otto::webhooks::parse_signature_header;
///
/// assert_eq!(parse_signature_header("sha256=00ff"), Some(vec![0x00, 0xff]));
/// assert!(parse_signature_header("sha1=00ff").is_none());
/// assert!(parse_signature_header("sha256=zz").is_none());
/// ```
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let digest = header.strip_prefix(SIGNATURE_PREFIX)?;
    hex::decode(digest).ok()
}

fn keyed_mac(secret: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length, so this cannot fail.
    HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any size")
}

/// Computes the HMAC-SHA256 digest of `payload` under `secret`.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = keyed_mac(secret);
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Renders a digest as a header value (`sha256=<lowercase hex>`).
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("{SIGNATURE_PREFIX}{}", hex::encode(signature))
}

/// Convenience for tests and tooling: signs `payload` and formats the header.
pub fn sign_payload(payload: &[u8], secret: &[u8]) -> String {
    format_signature_header(&compute_signature(payload, secret))
}

/// Checks a delivery's signature header against its body.
///
/// A header without the `sha256=` prefix is rejected before any digest is
/// computed. Undecodable hex is rejected. The digest comparison is constant
/// time.
///
/// ```
/// use otto::webhooks::{sign_payload, verify_signature};
///
/// let header = sign_payload(b"{}", b"s3cret");
/// assert!(verify_signature(b"{}", &header, b"s3cret"));
/// assert!(!verify_signature(b"{ }", &header, b"s3cret"));
/// ```
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let Some(supplied) = parse_signature_header(signature_header) else {
        return false;
    };

    let mut mac = keyed_mac(secret);
    mac.update(payload);
    mac.verify_slice(&supplied).is_ok()
}
