use crate::error::{AppError, Result};
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};

/// XChaCha nonce length; prepended to every ciphertext.
const NONCE_SIZE: usize = 24;

/// Longest accepted text body, counted in characters of the raw input.
pub const MAX_CONTENT_CHARS: usize = 5000;

/// Entities produced by [`sanitize`]. A `&` introducing one of these is
/// already escaped output and must not be escaped again.
const ENTITIES: [&str; 5] = ["amp;", "lt;", "gt;", "quot;", "#x27;"];

/// Symmetric codec for stored message bodies, keyed by a process-wide
/// secret. Ciphertexts are self-contained: a random nonce followed by the
/// AEAD output.
#[derive(Clone)]
pub struct MessageCodec {
    cipher: XChaCha20Poly1305,
}

impl std::fmt::Debug for MessageCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCodec").finish_non_exhaustive()
    }
}

impl MessageCodec {
    /// Builds the codec from a hex-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Rejects keys that are not 64 hex characters and the all-zero key;
    /// both indicate a misconfigured deployment and must fail startup.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key)
            .map_err(|_| AppError::Validation("Message key must be hex-encoded".to_string()))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AppError::Validation("Message key must be 64 hex characters".to_string()))?;
        if key.iter().all(|&b| b == 0) {
            return Err(AppError::Validation("Message key must not be all zeroes".to_string()));
        }
        Ok(Self { cipher: XChaCha20Poly1305::new(&key.into()) })
    }

    /// Encrypts a sanitized text body. Callers must sanitize first;
    /// ciphertext is opaque so there is no later chance to do it.
    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| AppError::Internal("Encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts a stored body.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::DecryptionFailed`] for truncated input, a wrong
    /// key, or tampered ciphertext. Callers loading history substitute a
    /// placeholder per message instead of propagating this.
    pub fn decrypt(&self, data: &[u8]) -> Result<String> {
        if data.len() < NONCE_SIZE {
            return Err(AppError::DecryptionFailed);
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let nonce = XNonce::from_slice(nonce_bytes);
        let plaintext = self.cipher.decrypt(nonce, ciphertext).map_err(|_| AppError::DecryptionFailed)?;
        String::from_utf8(plaintext).map_err(|_| AppError::DecryptionFailed)
    }
}

/// Validates a raw text body before sanitization. The length cap applies
/// to what the user typed, not the escaped form.
pub fn validate_content(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(AppError::EmptyContent);
    }
    if text.chars().count() > MAX_CONTENT_CHARS {
        return Err(AppError::TooLong { limit: MAX_CONTENT_CHARS });
    }
    Ok(())
}

/// Escapes markup-significant characters. Idempotent: a `&` that already
/// introduces one of our entities is passed through untouched, so running
/// the sanitizer over its own output changes nothing.
#[must_use]
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (idx, ch) in text.char_indices() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '&' => {
                let tail = &text[idx + 1..];
                if ENTITIES.iter().any(|entity| tail.starts_with(entity)) {
                    out.push('&');
                } else {
                    out.push_str("&amp;");
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> MessageCodec {
        MessageCodec::from_hex(&hex::encode([7u8; 32])).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let codec = codec();
        let sanitized = sanitize("Hello <world> & friends");

        let ciphertext = codec.encrypt(&sanitized).unwrap();
        assert_ne!(ciphertext, sanitized.as_bytes());
        assert_eq!(codec.decrypt(&ciphertext).unwrap(), sanitized);
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let ciphertext = codec().encrypt("secret").unwrap();
        let other = MessageCodec::from_hex(&hex::encode([8u8; 32])).unwrap();

        assert!(matches!(other.decrypt(&ciphertext), Err(AppError::DecryptionFailed)));
    }

    #[test]
    fn test_decrypt_tampered_ciphertext_fails() {
        let codec = codec();
        let mut ciphertext = codec.encrypt("secret").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xff;

        assert!(matches!(codec.decrypt(&ciphertext), Err(AppError::DecryptionFailed)));
    }

    #[test]
    fn test_decrypt_truncated_input_fails() {
        let codec = codec();
        assert!(matches!(codec.decrypt(&[1, 2, 3]), Err(AppError::DecryptionFailed)));
        assert!(matches!(codec.decrypt(&[]), Err(AppError::DecryptionFailed)));
    }

    #[test]
    fn test_nonces_are_unique_per_encryption() {
        let codec = codec();
        let first = codec.encrypt("same").unwrap();
        let second = codec.encrypt("same").unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_key_validation() {
        assert!(matches!(MessageCodec::from_hex("not hex"), Err(AppError::Validation(_))));
        assert!(matches!(MessageCodec::from_hex("abcd"), Err(AppError::Validation(_))));
        assert!(matches!(
            MessageCodec::from_hex(&hex::encode([0u8; 32])),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_sanitize_escapes_markup() {
        assert_eq!(sanitize("<b>\"hi\" & 'bye'</b>"), "&lt;b&gt;&quot;hi&quot; &amp; &#x27;bye&#x27;&lt;/b&gt;");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for input in ["a & b", "<script>", "&amp; already", "plain", "&quot;", "mixed & <t> 'q'"] {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn test_validate_content_rejects_empty() {
        assert!(matches!(validate_content(""), Err(AppError::EmptyContent)));
        assert!(matches!(validate_content("   \n\t "), Err(AppError::EmptyContent)));
    }

    #[test]
    fn test_validate_content_rejects_over_limit() {
        let long = "x".repeat(MAX_CONTENT_CHARS + 1);
        assert!(matches!(validate_content(&long), Err(AppError::TooLong { .. })));
        assert!(validate_content(&"x".repeat(MAX_CONTENT_CHARS)).is_ok());
    }
}
