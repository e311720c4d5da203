use fleet_core::{FleetError, FleetResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Signs outbound messages and verifies inbound ones.
///
/// Implementations operate on the canonical byte form of a message (its JSON
/// encoding without the signature field); callers are responsible for
/// producing those bytes.
pub trait MessageSigner: Send + Sync {
    /// Produce a signature for `bytes`.
    fn sign(&self, bytes: &[u8]) -> String;

    /// Check `signature` against `bytes`.
    fn verify(&self, bytes: &[u8], signature: &str) -> bool;

    /// Short name for logs.
    fn scheme(&self) -> &'static str;
}

/// HMAC-SHA256 signer keyed by a secret shared across the fleet.
pub struct HmacSigner {
    key: Vec<u8>,
}

impl HmacSigner {
    /// Create a signer from a shared secret. Empty secrets are rejected.
    pub fn new(secret: impl AsRef<[u8]>) -> FleetResult<Self> {
        let key = secret.as_ref().to_vec();
        if key.is_empty() {
            return Err(FleetError::Config("Signing secret must not be empty".into()));
        }
        Ok(Self { key })
    }

    fn mac(&self) -> Option<HmacSha256> {
        // HMAC accepts keys of any length, so this only fails on a broken hmac build.
        HmacSha256::new_from_slice(&self.key).ok()
    }
}

impl MessageSigner for HmacSigner {
    fn sign(&self, bytes: &[u8]) -> String {
        match self.mac() {
            Some(mut mac) => {
                mac.update(bytes);
                hex::encode(mac.finalize().into_bytes())
            }
            None => String::new(),
        }
    }

    fn verify(&self, bytes: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        match self.mac() {
            Some(mut mac) => {
                mac.update(bytes);
                mac.verify_slice(&expected).is_ok()
            }
            None => false,
        }
    }

    fn scheme(&self) -> &'static str {
        "hmac-sha256"
    }
}

/// Signer for fleets running without message authentication.
///
/// Every message is signed with the fixed marker `unsigned` and every inbound
/// message verifies, signed or not. Only suitable for trusted single-process
/// deployments and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSigner;

impl MessageSigner for NoopSigner {
    fn sign(&self, _bytes: &[u8]) -> String {
        "unsigned".to_string()
    }

    fn verify(&self, _bytes: &[u8], _signature: &str) -> bool {
        true
    }

    fn scheme(&self) -> &'static str {
        "none"
    }
}

/// Pick the signer for an optional shared secret.
///
/// `None` selects [`NoopSigner`] and logs a warning so the no-security mode is
/// never silent.
pub fn signer_from_secret(secret: Option<&str>) -> FleetResult<Arc<dyn MessageSigner>> {
    match secret {
        Some(secret) => Ok(Arc::new(HmacSigner::new(secret)?)),
        None => {
            warn!("No signing secret configured, A2A messages are not authenticated");
            Ok(Arc::new(NoopSigner))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_sign_and_verify() {
        let signer = HmacSigner::new("fleet-secret").unwrap();
        let sig = signer.sign(b"{\"id\":\"m1\"}");
        assert_eq!(sig.len(), 64);
        assert!(signer.verify(b"{\"id\":\"m1\"}", &sig));
    }

    #[test]
    fn test_hmac_rejects_tampered_body() {
        let signer = HmacSigner::new("fleet-secret").unwrap();
        let sig = signer.sign(b"payload");
        assert!(!signer.verify(b"payload!", &sig));
    }

    #[test]
    fn test_hmac_rejects_other_key() {
        let a = HmacSigner::new("secret-a").unwrap();
        let b = HmacSigner::new("secret-b").unwrap();
        let sig = a.sign(b"payload");
        assert!(!b.verify(b"payload", &sig));
    }

    #[test]
    fn test_hmac_rejects_garbage_signature() {
        let signer = HmacSigner::new("fleet-secret").unwrap();
        assert!(!signer.verify(b"payload", "not-hex"));
        assert!(!signer.verify(b"payload", "unsigned"));
        assert!(!signer.verify(b"payload", ""));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(HmacSigner::new("").is_err());
    }

    #[test]
    fn test_noop_accepts_everything() {
        let signer = NoopSigner;
        assert_eq!(signer.sign(b"x"), "unsigned");
        assert!(signer.verify(b"x", "anything"));
        assert_eq!(signer.scheme(), "none");
    }

    #[test]
    fn test_signer_from_secret() {
        assert_eq!(signer_from_secret(Some("k")).unwrap().scheme(), "hmac-sha256");
        assert_eq!(signer_from_secret(None).unwrap().scheme(), "none");
    }
}
