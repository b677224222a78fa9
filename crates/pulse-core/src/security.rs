//! Request security primitives used on both ends of the wire.
//!
//! The agent seals a payload in this order: sign the plaintext, encrypt,
//! compress. The server undoes it in reverse: decompress, decrypt, verify.

use std::io::{Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use hmac::{Hmac, Mac};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::Oaep;
use sha2::Sha256;

use crate::error::SecurityError;

pub use rsa::{RsaPrivateKey, RsaPublicKey};

/// Header carrying the hex HMAC-SHA256 of the plaintext body.
pub const SIGNATURE_HEADER: &str = "HashSHA256";

/// Header carrying the sender's own address for the trusted-subnet check.
pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// SHA-256 output size, used twice in the OAEP overhead.
const HASH_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `body` under `key`.
pub fn sign(key: &[u8], body: &[u8]) -> Result<String, SecurityError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| SecurityError::Key(e.to_string()))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a hex signature in constant time.
pub fn verify(key: &[u8], body: &[u8], signature_hex: &str) -> Result<(), SecurityError> {
    let expected =
        hex::decode(signature_hex).map_err(|e| SecurityError::SignatureEncoding(e.to_string()))?;
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| SecurityError::Key(e.to_string()))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| SecurityError::SignatureMismatch)
}

/// Largest plaintext slice one OAEP-SHA256 block can hold for this key.
pub fn oaep_chunk_len(key: &RsaPublicKey) -> usize {
    key.size().saturating_sub(2 * HASH_LEN + 2)
}

/// RSA-OAEP(SHA-256) encrypt, splitting the message into key-sized chunks.
///
/// Each ciphertext block is exactly `key.size()` bytes, so the receiver can
/// split on that boundary.
pub fn encrypt_chunked(key: &RsaPublicKey, message: &[u8]) -> Result<Vec<u8>, SecurityError> {
    let step = oaep_chunk_len(key);
    if step == 0 {
        return Err(SecurityError::Encrypt("key too small for OAEP-SHA256".to_string()));
    }
    let mut out = Vec::with_capacity(message.len().div_ceil(step) * key.size());
    let mut rng = OsRng;
    for chunk in message.chunks(step) {
        let block = key
            .encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)
            .map_err(|e| SecurityError::Encrypt(e.to_string()))?;
        out.extend_from_slice(&block);
    }
    Ok(out)
}

/// Inverse of [`encrypt_chunked`].
pub fn decrypt_chunked(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, SecurityError> {
    let step = key.size();
    if ciphertext.len() % step != 0 {
        return Err(SecurityError::Decrypt(format!(
            "ciphertext length {} is not a multiple of the {step}-byte block",
            ciphertext.len()
        )));
    }
    let mut out = Vec::with_capacity(ciphertext.len());
    for block in ciphertext.chunks(step) {
        let plain = key
            .decrypt(Oaep::new::<Sha256>(), block)
            .map_err(|e| SecurityError::Decrypt(e.to_string()))?;
        out.extend_from_slice(&plain);
    }
    Ok(out)
}

pub fn gzip(data: &[u8]) -> Result<Vec<u8>, SecurityError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn gunzip(data: &[u8]) -> Result<Vec<u8>, SecurityError> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// Load a PKCS#1 `RSA PUBLIC KEY` PEM file.
pub fn read_public_key(path: &Path) -> Result<RsaPublicKey, SecurityError> {
    let pem = read_pem(path)?;
    RsaPublicKey::from_pkcs1_pem(&pem).map_err(|e| SecurityError::KeyFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Load a PKCS#1 `RSA PRIVATE KEY` PEM file.
pub fn read_private_key(path: &Path) -> Result<RsaPrivateKey, SecurityError> {
    let pem = read_pem(path)?;
    RsaPrivateKey::from_pkcs1_pem(&pem).map_err(|e| SecurityError::KeyFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn read_pem(path: &Path) -> Result<String, SecurityError> {
    std::fs::read_to_string(path).map_err(|e| SecurityError::KeyFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// A freshly generated key pair, PEM encoded.
pub struct KeyPairPem {
    pub private_pem: String,
    pub public_pem: String,
}

pub fn generate_key_pair(bits: usize) -> Result<KeyPairPem, SecurityError> {
    let private = RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| SecurityError::Key(e.to_string()))?;
    let public = RsaPublicKey::from(&private);
    let private_pem = private
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| SecurityError::Key(e.to_string()))?;
    let public_pem = public
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| SecurityError::Key(e.to_string()))?;
    Ok(KeyPairPem {
        private_pem: private_pem.to_string(),
        public_pem,
    })
}
