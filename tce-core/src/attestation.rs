//! Record attestation: signing and verification.
//!
//! Two protocols share one signer:
//!
//! - **Direct**: the signature covers the canonical record bytes.
//! - **Commit-reveal**: a fresh salt is drawn, the commitment
//!   `SHA-256(canonical ‖ salt)` is computed, and the signature covers the
//!   commitment. The commitment and signature can be published while the
//!   record is withheld; disclosing record and salt later lets anyone
//!   recompute the commitment.

use crate::crypto::{
    self, public_key_from_pem, sha256_hex, SignatureEncoding, SigningError, SigningScheme,
};
use crate::keystore::{KeyId, KeyPair};
use crate::serialization::{to_canonical_json, CanonicalJson, SerializationError};
use crate::types::{RecordId, TceRecord};
use rand::distributions::Alphanumeric;
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Salt length in alphanumeric characters
pub const SALT_LEN: usize = 32;

/// Attestation protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttestationMode {
    #[default]
    Direct,
    CommitReveal,
}

impl fmt::Display for AttestationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttestationMode::Direct => write!(f, "direct"),
            AttestationMode::CommitReveal => write!(f, "commit-reveal"),
        }
    }
}

/// Signing strategy: padding scheme, signature encoding and protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    pub scheme: SigningScheme,
    pub encoding: SignatureEncoding,
    pub mode: AttestationMode,
}

#[derive(Debug, Error)]
pub enum AttestError {
    #[error("Record violates an invariant and will not be attested: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Signing(#[from] SigningError),
}

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("Malformed attestation bundle: {0}")]
    MalformedBundle(String),

    #[error("Signature scheme {found} not accepted (expected {expected})")]
    SchemeNotAllowed {
        expected: SigningScheme,
        found: SigningScheme,
    },

    #[error("Public key could not be decoded: {0}")]
    KeyDecode(String),

    #[error("Commitment does not match record and salt")]
    CommitmentMismatch,

    #[error("Invalid signature")]
    InvalidSignature,
}

/// A signed proof over one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    pub tce_id: RecordId,
    pub key_id: KeyId,
    /// Canonical record JSON, the exact signed (or committed) bytes
    #[serde(rename = "activityDataJson")]
    pub canonical_record: String,
    #[serde(rename = "activitySignature")]
    pub signature: String,
    #[serde(rename = "activityPublicKeyPem")]
    pub public_key_pem: String,
    pub signature_scheme: SigningScheme,
    pub signature_encoding: SignatureEncoding,
    pub mode: AttestationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment: Option<String>,
}

impl Attestation {
    /// The publishable part of a commit-reveal attestation, without record or salt.
    ///
    /// Returns `None` for direct attestations.
    pub fn seal(&self) -> Option<SealedCommitment> {
        if self.mode != AttestationMode::CommitReveal {
            return None;
        }
        Some(SealedCommitment {
            tce_id: self.tce_id.clone(),
            key_id: self.key_id,
            commitment: self.commitment.clone()?,
            signature: self.signature.clone(),
            public_key_pem: self.public_key_pem.clone(),
            signature_scheme: self.signature_scheme,
            signature_encoding: self.signature_encoding,
        })
    }
}

/// Commitment and its signature, published before the record is disclosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedCommitment {
    pub tce_id: RecordId,
    pub key_id: KeyId,
    pub commitment: String,
    pub signature: String,
    pub public_key_pem: String,
    pub signature_scheme: SigningScheme,
    pub signature_encoding: SignatureEncoding,
}

/// `hex(SHA-256(canonical ‖ salt))`
pub fn commitment_for(canonical: &[u8], salt: &str) -> String {
    let mut preimage = Vec::with_capacity(canonical.len() + salt.len());
    preimage.extend_from_slice(canonical);
    preimage.extend_from_slice(salt.as_bytes());
    sha256_hex(&preimage)
}

fn fresh_salt<R: CryptoRng + RngCore>(rng: &mut R) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(SALT_LEN)
        .map(char::from)
        .collect()
}

/// Stateless record signer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Attestor {
    config: SigningConfig,
}

impl Attestor {
    pub fn new(config: SigningConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SigningConfig {
        &self.config
    }

    /// Validate, canonicalize and attest a record.
    pub fn attest<R: CryptoRng + RngCore>(
        &self,
        record: &TceRecord,
        key: &KeyPair,
        rng: &mut R,
    ) -> Result<Attestation, AttestError> {
        record.validate().map_err(AttestError::InvariantViolation)?;
        let canonical = to_canonical_json(record)?;
        self.attest_canonical(record.tce_id.clone(), &canonical, key, rng)
    }

    /// Attest externally supplied record JSON; it must already be canonical.
    pub fn attest_json<R: CryptoRng + RngCore>(
        &self,
        tce_id: RecordId,
        record_json: &str,
        key: &KeyPair,
        rng: &mut R,
    ) -> Result<Attestation, AttestError> {
        let canonical = CanonicalJson::parse(record_json)?;
        self.attest_canonical(tce_id, &canonical, key, rng)
    }

    pub fn attest_canonical<R: CryptoRng + RngCore>(
        &self,
        tce_id: RecordId,
        canonical: &CanonicalJson,
        key: &KeyPair,
        rng: &mut R,
    ) -> Result<Attestation, AttestError> {
        let signer = key.signer(self.config.scheme);

        let (signature, salt, commitment) = match self.config.mode {
            AttestationMode::Direct => (signer.sign(rng, canonical.as_bytes())?, None, None),
            AttestationMode::CommitReveal => {
                let salt = fresh_salt(rng);
                let commitment = commitment_for(canonical.as_bytes(), &salt);
                let signature = signer.sign(rng, commitment.as_bytes())?;
                (signature, Some(salt), Some(commitment))
            }
        };

        tracing::debug!(
            record_id = %tce_id,
            key_id = %key.id(),
            mode = %self.config.mode,
            scheme = %self.config.scheme,
            "record attested"
        );

        Ok(Attestation {
            tce_id,
            key_id: key.id(),
            canonical_record: canonical.as_str().to_string(),
            signature: self.config.encoding.encode(&signature),
            public_key_pem: key.public_key_pem()?,
            signature_scheme: self.config.scheme,
            signature_encoding: self.config.encoding,
            mode: self.config.mode,
            salt,
            commitment,
        })
    }
}

/// Checks attestations against the public key they carry.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier {
    required_scheme: Option<SigningScheme>,
}

impl Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject bundles signed with any other scheme.
    pub fn require_scheme(mut self, scheme: SigningScheme) -> Self {
        self.required_scheme = Some(scheme);
        self
    }

    /// Verify a complete bundle in either mode.
    pub fn verify(&self, bundle: &Attestation) -> Result<(), VerificationError> {
        let canonical = CanonicalJson::parse(&bundle.canonical_record)?;
        check_record_id(&canonical, &bundle.tce_id)?;

        match bundle.mode {
            AttestationMode::Direct => {
                if bundle.salt.is_some() || bundle.commitment.is_some() {
                    return Err(VerificationError::MalformedBundle(
                        "direct attestation carries salt or commitment".into(),
                    ));
                }
                self.check_signature(
                    &bundle.public_key_pem,
                    bundle.signature_scheme,
                    bundle.signature_encoding,
                    canonical.as_bytes(),
                    &bundle.signature,
                )
            }
            AttestationMode::CommitReveal => {
                let salt = bundle.salt.as_deref().ok_or_else(|| {
                    VerificationError::MalformedBundle("commit-reveal attestation without salt".into())
                })?;
                let sealed = bundle.seal().ok_or_else(|| {
                    VerificationError::MalformedBundle(
                        "commit-reveal attestation without commitment".into(),
                    )
                })?;

                self.verify_commitment(&sealed)?;

                if commitment_for(canonical.as_bytes(), salt) != sealed.commitment {
                    return Err(VerificationError::CommitmentMismatch);
                }
                Ok(())
            }
        }
    }

    /// Verify authorship of a commitment before the record is revealed.
    pub fn verify_commitment(&self, sealed: &SealedCommitment) -> Result<(), VerificationError> {
        let well_formed = sealed.commitment.len() == 64
            && sealed.commitment.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !well_formed {
            return Err(VerificationError::MalformedBundle(
                "commitment is not a lowercase hex SHA-256 digest".into(),
            ));
        }
        self.check_signature(
            &sealed.public_key_pem,
            sealed.signature_scheme,
            sealed.signature_encoding,
            sealed.commitment.as_bytes(),
            &sealed.signature,
        )
    }

    fn check_signature(
        &self,
        public_key_pem: &str,
        scheme: SigningScheme,
        encoding: SignatureEncoding,
        message: &[u8],
        signature: &str,
    ) -> Result<(), VerificationError> {
        if let Some(expected) = self.required_scheme {
            if expected != scheme {
                return Err(VerificationError::SchemeNotAllowed {
                    expected,
                    found: scheme,
                });
            }
        }

        let public_key = public_key_from_pem(public_key_pem)
            .map_err(|e| VerificationError::KeyDecode(e.to_string()))?;
        let signature = encoding
            .decode(signature)
            .map_err(|e| VerificationError::MalformedBundle(e.to_string()))?;

        crypto::verify(&public_key, scheme, message, &signature)
            .map_err(|_| VerificationError::InvalidSignature)
    }
}

fn check_record_id(canonical: &CanonicalJson, tce_id: &RecordId) -> Result<(), VerificationError> {
    let value: serde_json::Value = serde_json::from_str(canonical.as_str())
        .map_err(SerializationError::Decode)?;
    match value.get("tceId").and_then(|v| v.as_str()) {
        Some(id) if id == tce_id.0 => Ok(()),
        Some(id) => Err(VerificationError::MalformedBundle(format!(
            "bundle is for {tce_id} but record is {id}"
        ))),
        None => Err(VerificationError::MalformedBundle("record has no tceId".into())),
    }
}
