use base64::{Engine as _, engine::general_purpose};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Generate a payload signature
///
/// Format: Base64(HMAC-SHA256(payload, secret))
pub fn sign_payload(payload: &[u8], secret: &str) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(payload);

    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Verify a Base64 HMAC-SHA256 payload signature using constant-time comparison
pub fn verify_payload(
    payload: &[u8],
    secret: &str,
    provided: &str,
) -> Result<bool, anyhow::Error> {
    let expected = sign_payload(payload, secret)?;

    let expected_bytes = expected.as_bytes();
    let provided_bytes = provided.trim().as_bytes();

    if expected_bytes.len() != provided_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(provided_bytes).into())
}
