//! # TCE Core
//!
//! Synthesizes Transport Carbon Emission (TCE) activity records and attests
//! them with RSA signatures that a third party can verify against the exact
//! signed bytes.
//!
//! ## Key Features
//! - **Canonical JSON serialization**: sorted keys, no whitespace, absent fields dropped
//! - **Two attestation modes**: direct signing and commit-reveal
//! - **Key pool**: lazily provisioned, persisted, selectable by id or at random
//! - **Verification**: symmetric checks for both modes, including pre-reveal commitments

pub mod attestation;
pub mod config;
pub mod crypto;
pub mod keystore;
pub mod pipeline;
pub mod serialization;
pub mod sink;
pub mod synthesis;
pub mod types;

#[cfg(test)]
mod testutil;

pub use attestation::{
    AttestError, Attestation, AttestationMode, Attestor, SealedCommitment, SigningConfig,
    VerificationError, Verifier,
};
pub use config::{ConfigError, OracleConfig};
pub use crypto::{SignatureEncoding, Signer, SigningError, SigningScheme};
pub use keystore::{
    FsKeyProvider, KeyId, KeyPair, KeyProvider, KeySelectionPolicy, KeyStore, KeyStoreError,
    MemoryKeyProvider, PoolReport,
};
pub use pipeline::{Correlation, ErrorKind, Oracle, OracleError, OracleRequest, OracleResponse};
pub use serialization::{to_canonical_json, CanonicalJson, SerializationError};
pub use sink::{AttestationSink, MemorySink, SinkEntry, SinkError, SinkReceipt};
pub use synthesis::{SynthesisError, SynthesisRequest, Synthesizer};
pub use types::*;

#[cfg(feature = "async")]
pub use sink::FileSink;
