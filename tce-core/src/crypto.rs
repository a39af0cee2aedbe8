//! Cryptographic primitives for attestation.
//!
//! RSA signatures over SHA-256 digests. The padding scheme is a
//! configuration choice carried on every bundle, so signer and verifier
//! never disagree silently.
//!
//! PSS signatures use MGF1-SHA-256 with the maximum salt length the modulus
//! allows (`emLen - hLen - 2`, 222 bytes for a 2048-bit key), which is what
//! `cryptography`'s `PSS.MAX_LENGTH` produces. Verification also accepts the
//! 32-byte digest-length salt that most other RSA libraries default to.

use crate::types::Hash256;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::{CryptoRng, RngCore};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

pub use rsa::traits::PublicKeyParts;

/// Default RSA modulus size in bits
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Compute SHA-256 hash of data.
pub fn sha256(data: &[u8]) -> Hash256 {
    let hash = Sha256::digest(data);
    hash.into()
}

/// SHA-256 as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Signature primitive failed: {0}")]
    Primitive(#[from] rsa::Error),

    #[error("Signature encoding error: {0}")]
    Encoding(String),

    #[error("Public key export failed: {0}")]
    KeyExport(String),
}

/// RSA padding scheme used for signatures (always over SHA-256).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SigningScheme {
    /// Probabilistic PSS padding, MGF1-SHA-256, maximum-length salt
    #[default]
    #[serde(rename = "rsa-pss-sha256")]
    RsaPssSha256,
    /// Deterministic PKCS#1 v1.5 padding
    #[serde(rename = "rsa-pkcs1v15-sha256")]
    RsaPkcs1v15Sha256,
}

impl fmt::Display for SigningScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningScheme::RsaPssSha256 => write!(f, "rsa-pss-sha256"),
            SigningScheme::RsaPkcs1v15Sha256 => write!(f, "rsa-pkcs1v15-sha256"),
        }
    }
}

/// Text encoding of signature bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureEncoding {
    #[default]
    Hex,
    Base64,
}

impl SignatureEncoding {
    pub fn encode(&self, bytes: &[u8]) -> String {
        match self {
            SignatureEncoding::Hex => hex::encode(bytes),
            SignatureEncoding::Base64 => BASE64.encode(bytes),
        }
    }

    pub fn decode(&self, text: &str) -> Result<Vec<u8>, SigningError> {
        match self {
            SignatureEncoding::Hex => {
                hex::decode(text).map_err(|e| SigningError::Encoding(e.to_string()))
            }
            SignatureEncoding::Base64 => BASE64
                .decode(text)
                .map_err(|e| SigningError::Encoding(e.to_string())),
        }
    }
}

impl fmt::Display for SignatureEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureEncoding::Hex => write!(f, "hex"),
            SignatureEncoding::Base64 => write!(f, "base64"),
        }
    }
}

/// A signer binding a private key to a padding scheme.
pub struct Signer<'k> {
    private_key: &'k RsaPrivateKey,
    scheme: SigningScheme,
}

impl<'k> Signer<'k> {
    pub fn new(private_key: &'k RsaPrivateKey, scheme: SigningScheme) -> Self {
        Self { private_key, scheme }
    }

    /// Sign a message. The RNG feeds PSS salt and RSA blinding.
    pub fn sign<R: CryptoRng + RngCore>(
        &self,
        rng: &mut R,
        message: &[u8],
    ) -> Result<Vec<u8>, SigningError> {
        let digest = Sha256::digest(message);
        let signature = match self.scheme {
            SigningScheme::RsaPssSha256 => {
                let salt_len = max_pss_salt_len(self.private_key.n().bits());
                self.private_key
                    .sign_with_rng(rng, Pss::new_with_salt::<Sha256>(salt_len), &digest)?
            }
            SigningScheme::RsaPkcs1v15Sha256 => {
                self.private_key
                    .sign_with_rng(rng, Pkcs1v15Sign::new::<Sha256>(), &digest)?
            }
        };
        Ok(signature)
    }

    pub fn scheme(&self) -> SigningScheme {
        self.scheme
    }

    /// Get the public key.
    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }
}

/// Largest PSS salt for a modulus of `modulus_bits` with a SHA-256 digest.
pub fn max_pss_salt_len(modulus_bits: usize) -> usize {
    let em_len = modulus_bits.saturating_sub(1).div_ceil(8);
    em_len.saturating_sub(<Sha256 as Digest>::output_size() + 2)
}

/// Verify a signature over `message` made with `scheme`.
pub fn verify(
    public_key: &RsaPublicKey,
    scheme: SigningScheme,
    message: &[u8],
    signature: &[u8],
) -> Result<(), rsa::Error> {
    let digest = Sha256::digest(message);
    match scheme {
        SigningScheme::RsaPssSha256 => {
            let max_salt = max_pss_salt_len(public_key.n().bits());
            public_key
                .verify(Pss::new_with_salt::<Sha256>(max_salt), &digest, signature)
                .or_else(|_| public_key.verify(Pss::new::<Sha256>(), &digest, signature))
        }
        SigningScheme::RsaPkcs1v15Sha256 => {
            public_key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        }
    }
}

/// Export a public key as SubjectPublicKeyInfo PEM.
pub fn public_key_pem(public_key: &RsaPublicKey) -> Result<String, SigningError> {
    public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| SigningError::KeyExport(e.to_string()))
}

/// Parse a SubjectPublicKeyInfo PEM public key.
pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey, rsa::pkcs8::spki::Error> {
    RsaPublicKey::from_public_key_pem(pem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_key, test_rng};

    #[test]
    fn test_sha256() {
        let data = b"test data";
        let hash1 = sha256(data);
        let hash2 = sha256(data);
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 32);
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_pss_signer() {
        let key = test_key();
        let signer = Signer::new(&key, SigningScheme::RsaPssSha256);
        let message = b"test message";
        let signature = signer.sign(&mut test_rng(), message).unwrap();

        assert!(verify(&signer.public_key(), signer.scheme(), message, &signature).is_ok());
        assert!(verify(&signer.public_key(), signer.scheme(), b"other", &signature).is_err());
    }

    #[test]
    fn test_pss_salt_lengths() {
        assert_eq!(max_pss_salt_len(2048), 222);
        assert_eq!(max_pss_salt_len(1024), 94);

        let key = test_key();
        let digest = Sha256::digest(b"m");
        let short_salt = key
            .sign_with_rng(&mut test_rng(), Pss::new::<Sha256>(), &digest)
            .unwrap();
        let max_salt = Signer::new(&key, SigningScheme::RsaPssSha256)
            .sign(&mut test_rng(), b"m")
            .unwrap();

        let public_key = key.to_public_key();
        assert!(public_key
            .verify(Pss::new_with_salt::<Sha256>(94), &digest, &max_salt)
            .is_ok());
        assert!(verify(&public_key, SigningScheme::RsaPssSha256, b"m", &max_salt).is_ok());
        assert!(verify(&public_key, SigningScheme::RsaPssSha256, b"m", &short_salt).is_ok());
    }

    #[test]
    fn test_pss_is_probabilistic() {
        let key = test_key();
        let signer = Signer::new(&key, SigningScheme::RsaPssSha256);
        let mut rng = test_rng();
        let a = signer.sign(&mut rng, b"m").unwrap();
        let b = signer.sign(&mut rng, b"m").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_pkcs1v15_is_deterministic() {
        let key = test_key();
        let signer = Signer::new(&key, SigningScheme::RsaPkcs1v15Sha256);
        let mut rng = test_rng();
        let a = signer.sign(&mut rng, b"m").unwrap();
        let b = signer.sign(&mut rng, b"m").unwrap();
        assert_eq!(a, b);
        assert!(verify(&signer.public_key(), SigningScheme::RsaPkcs1v15Sha256, b"m", &a).is_ok());
    }

    #[test]
    fn test_schemes_do_not_cross_verify() {
        let key = test_key();
        let signature = Signer::new(&key, SigningScheme::RsaPssSha256)
            .sign(&mut test_rng(), b"m")
            .unwrap();
        assert!(verify(&key.to_public_key(), SigningScheme::RsaPkcs1v15Sha256, b"m", &signature).is_err());
    }

    #[test]
    fn test_signature_encodings() {
        let bytes = [0xde, 0xad, 0xbe, 0xef];
        assert_eq!(SignatureEncoding::Hex.encode(&bytes), "deadbeef");
        assert_eq!(SignatureEncoding::Base64.encode(&bytes), "3q2+7w==");
        assert_eq!(SignatureEncoding::Base64.decode("3q2+7w==").unwrap(), bytes);
        assert!(SignatureEncoding::Hex.decode("zz").is_err());
    }

    #[test]
    fn test_public_key_pem_roundtrip() {
        let key = test_key();
        let pem = public_key_pem(&key.to_public_key()).unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert_eq!(public_key_from_pem(&pem).unwrap(), key.to_public_key());
    }

    #[test]
    fn test_scheme_wire_names() {
        assert_eq!(
            serde_json::to_string(&SigningScheme::RsaPkcs1v15Sha256).unwrap(),
            "\"rsa-pkcs1v15-sha256\""
        );
        assert_eq!(SigningScheme::default().to_string(), "rsa-pss-sha256");
    }
}
