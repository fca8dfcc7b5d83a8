//! Webhook signature verification.
//!
//! Providers sign delivery callbacks with HMAC-SHA256 over the canonical
//! callback URL concatenated with the raw request body, and carry the tag
//! in a `sha256=<hex>` header. Verification is constant-time via the mac's
//! own comparison.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{NotificationError, NotificationResult};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the provider's signature.
pub const SIGNATURE_HEADER: &str = "x-provider-signature";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verifies an inbound callback before its payload is parsed.
pub trait SignatureVerifier: Send + Sync {
    /// Check the signature header against the canonical URL and raw body.
    fn verify(&self, url: &str, body: &[u8], header: Option<&str>) -> NotificationResult<()>;
}

/// HMAC-SHA256 verifier over a shared secret.
///
/// Without a provisioned secret it runs permissive: every callback is
/// accepted and a warning is logged, so a missing deployment secret
/// degrades loudly instead of dropping delivery feedback.
pub struct HmacVerifier {
    secret: Option<Vec<u8>>,
}

impl HmacVerifier {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.map(String::into_bytes),
        }
    }

    /// Compute the signature header value for a message. Used by tests and
    /// by outbound callback registration.
    pub fn sign(&self, url: &str, body: &[u8]) -> Option<String> {
        let secret = self.secret.as_deref()?;
        let mut mac =
            HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
        mac.update(url.as_bytes());
        mac.update(body);
        Some(format!(
            "{}{}",
            SIGNATURE_PREFIX,
            hex::encode(mac.finalize().into_bytes())
        ))
    }
}

impl SignatureVerifier for HmacVerifier {
    fn verify(&self, url: &str, body: &[u8], header: Option<&str>) -> NotificationResult<()> {
        let Some(secret) = self.secret.as_deref() else {
            tracing::warn!("No webhook secret configured, accepting callback unverified");
            return Ok(());
        };

        let header = header.ok_or(NotificationError::SignatureInvalid)?;
        let hex_tag = header
            .strip_prefix(SIGNATURE_PREFIX)
            .ok_or(NotificationError::SignatureInvalid)?;
        let tag = hex::decode(hex_tag).map_err(|_| NotificationError::SignatureInvalid)?;

        let mut mac =
            HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
        mac.update(url.as_bytes());
        mac.update(body);
        mac.verify_slice(&tag)
            .map_err(|_| NotificationError::SignatureInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://relay.example.com/webhooks/email";

    #[test]
    fn test_valid_signature_accepted() {
        let verifier = HmacVerifier::new(Some("topsecret".to_string()));
        let body = br#"{"status":"delivered"}"#;
        let header = verifier.sign(URL, body).unwrap();
        assert!(verifier.verify(URL, body, Some(&header)).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let verifier = HmacVerifier::new(Some("topsecret".to_string()));
        let header = verifier.sign(URL, b"original").unwrap();
        let err = verifier.verify(URL, b"tampered", Some(&header)).unwrap_err();
        assert!(matches!(err, NotificationError::SignatureInvalid));
    }

    #[test]
    fn test_missing_or_malformed_header_rejected() {
        let verifier = HmacVerifier::new(Some("topsecret".to_string()));
        assert!(verifier.verify(URL, b"x", None).is_err());
        assert!(verifier.verify(URL, b"x", Some("md5=abc")).is_err());
        assert!(verifier.verify(URL, b"x", Some("sha256=zz-not-hex")).is_err());
    }

    #[test]
    fn test_permissive_without_secret() {
        let verifier = HmacVerifier::new(None);
        assert!(verifier.verify(URL, b"anything", None).is_ok());
        assert!(verifier.sign(URL, b"anything").is_none());
    }
}
