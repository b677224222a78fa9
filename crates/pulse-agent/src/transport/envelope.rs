//! Payload sealing: sign the plaintext, encrypt, compress.
//!
//! Each step is skipped when its setting is absent.

use std::sync::Arc;

use pulse_core::SecurityError;
use pulse_core::security::{self, RsaPublicKey};

/// Sealing settings shared by every send.
#[derive(Clone, Default)]
pub struct Sealer {
    key: Option<Vec<u8>>,
    public_key: Option<Arc<RsaPublicKey>>,
    compress: bool,
}

/// A body ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub body: Vec<u8>,
    /// Hex HMAC-SHA256 of the plaintext.
    pub signature: Option<String>,
    pub compressed: bool,
}

impl Sealer {
    pub fn new(key: Option<Vec<u8>>, public_key: Option<Arc<RsaPublicKey>>, compress: bool) -> Self {
        Self {
            key: key.filter(|k| !k.is_empty()),
            public_key,
            compress,
        }
    }

    pub fn seal(&self, plaintext: Vec<u8>) -> Result<Sealed, SecurityError> {
        let signature = self
            .key
            .as_deref()
            .map(|key| security::sign(key, &plaintext))
            .transpose()?;

        let body = match self.public_key.as_deref() {
            Some(public_key) => security::encrypt_chunked(public_key, &plaintext)?,
            None => plaintext,
        };

        let (body, compressed) = if self.compress {
            (security::gzip(&body)?, true)
        } else {
            (body, false)
        };

        Ok(Sealed {
            body,
            signature,
            compressed,
        })
    }
}

#[cfg(test)]
mod tests {
    use pulse_core::security::RsaPrivateKey;

    use super::*;

    #[test]
    fn plain_sealer_passes_through() {
        let sealed = Sealer::default().seal(b"[]".to_vec()).unwrap();
        assert_eq!(sealed.body, b"[]");
        assert_eq!(sealed.signature, None);
        assert!(!sealed.compressed);
    }

    #[test]
    fn empty_key_disables_signing() {
        let sealed = Sealer::new(Some(Vec::new()), None, false)
            .seal(b"x".to_vec())
            .unwrap();
        assert_eq!(sealed.signature, None);
    }

    #[test]
    fn full_pipeline_reverses_in_order() {
        let mut rng = rsa::rand_core::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public = Arc::new(RsaPublicKey::from(&private));
        let plaintext = br#"[{"id":"PollCount","type":"counter","delta":1}]"#.to_vec();

        let sealed = Sealer::new(Some(b"k".to_vec()), Some(public), true)
            .seal(plaintext.clone())
            .unwrap();
        assert!(sealed.compressed);

        let ciphertext = security::gunzip(&sealed.body).unwrap();
        let opened = security::decrypt_chunked(&private, &ciphertext).unwrap();
        assert_eq!(opened, plaintext);
        security::verify(b"k", &opened, sealed.signature.as_deref().unwrap()).unwrap();
    }
}
