use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    MissingSecret,
    Encoding,
    Mismatch,
}

/// HMAC-SHA256 of `message`, base64url without padding.
pub fn sign(secret: &str, message: &str) -> Result<String, SignatureError> {
    let mac = keyed_mac(secret, message)?;
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a base64url signature produced by [`sign`].
pub fn verify(secret: &str, message: &str, signature_b64: &str) -> Result<(), SignatureError> {
    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| SignatureError::Encoding)?;

    keyed_mac(secret, message)?
        .verify_slice(&signature)
        .map_err(|_| SignatureError::Mismatch)
}

fn keyed_mac(secret: &str, message: &str) -> Result<HmacSha256, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::MissingSecret);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::MissingSecret)?;
    mac.update(message.as_bytes());
    Ok(mac)
}
