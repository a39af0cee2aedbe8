//! End-to-end oracle pipeline.
//!
//! One request flows through key selection, synthesis, canonicalization and
//! signing, and optionally on to an [`AttestationSink`]. The key is chosen
//! first so an unusable pool fails the request before any cryptography runs.

use crate::attestation::{AttestError, Attestation, Attestor, SigningConfig};
use crate::config::OracleConfig;
use crate::keystore::{
    FsKeyProvider, KeyId, KeyProvider, KeySelectionPolicy, KeyStore, KeyStoreError, PoolReport,
};
use crate::serialization::SerializationError;
use crate::sink::{AttestationSink, SinkEntry, SinkError, SinkReceipt};
use crate::synthesis::{SynthesisError, SynthesisRequest, Synthesizer};
use crate::types::{RecordId, ShipmentId};
use rand::rngs::{OsRng, StdRng};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Failure category reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InvalidInput,
    InvariantViolation,
    SerializationError,
    KeyNotFound,
    CryptoLoadError,
    SigningError,
    SinkSubmissionError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error(transparent)]
    Attestation(#[from] AttestError),

    #[error("Sink submission failed: {0}")]
    Sink(#[from] SinkError),
}

impl From<SerializationError> for OracleError {
    fn from(e: SerializationError) -> Self {
        OracleError::Attestation(AttestError::Serialization(e))
    }
}

impl OracleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OracleError::Synthesis(SynthesisError::InvalidInput(_)) => ErrorKind::InvalidInput,
            OracleError::Synthesis(SynthesisError::InvariantViolation(_)) => {
                ErrorKind::InvariantViolation
            }
            OracleError::KeyStore(
                KeyStoreError::KeyNotFound(_)
                | KeyStoreError::EmptyPool
                | KeyStoreError::InvalidKeyId(_),
            ) => ErrorKind::KeyNotFound,
            OracleError::KeyStore(_) => ErrorKind::CryptoLoadError,
            OracleError::Attestation(AttestError::InvariantViolation(_)) => {
                ErrorKind::InvariantViolation
            }
            OracleError::Attestation(AttestError::Serialization(_)) => {
                ErrorKind::SerializationError
            }
            OracleError::Attestation(AttestError::Signing(_)) => ErrorKind::SigningError,
            OracleError::Sink(_) => ErrorKind::SinkSubmissionError,
        }
    }
}

pub type Result<T> = std::result::Result<T, OracleError>;

/// Workflow correlation ids, echoed back untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    #[serde(
        rename = "camundaProcessInstanceKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub process_instance_key: Option<String>,
    #[serde(
        rename = "camundaActivityId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub activity_id: Option<String>,
}

/// One attestation request.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub synthesis: SynthesisRequest,
    pub correlation: Correlation,
    /// Overrides the configured selection policy
    pub key_id: Option<KeyId>,
}

impl OracleRequest {
    pub fn new(synthesis: SynthesisRequest) -> Self {
        Self {
            synthesis,
            correlation: Correlation::default(),
            key_id: None,
        }
    }

    pub fn correlation(mut self, correlation: Correlation) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn key_id(mut self, id: KeyId) -> Self {
        self.key_id = Some(id);
        self
    }
}

/// Attestation bundle plus the request context it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleResponse {
    pub shipment_id: ShipmentId,
    #[serde(flatten)]
    pub correlation: Correlation,
    #[serde(flatten)]
    pub attestation: Attestation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<SinkReceipt>,
}

pub struct Oracle<P> {
    keys: KeyStore<P>,
    pool_size: u32,
    selection: KeySelectionPolicy,
    synthesizer: Synthesizer,
    attestor: Attestor,
    rng: Mutex<StdRng>,
}

impl Oracle<FsKeyProvider> {
    /// Build the file-backed oracle described by `config`.
    pub fn from_config(config: &OracleConfig) -> Self {
        let keys = KeyStore::new(FsKeyProvider::new(&config.keys.dir)).with_key_bits(config.keys.bits);
        let oracle = Oracle::new(keys, config.signing)
            .with_pool_size(config.keys.pool_size)
            .with_selection(config.keys.selection.clone());
        match config.seed {
            Some(seed) => oracle.with_seed(seed),
            None => oracle,
        }
    }
}

impl<P: KeyProvider> Oracle<P> {
    pub fn new(keys: KeyStore<P>, signing: SigningConfig) -> Self {
        Self {
            keys,
            pool_size: OracleConfig::default().keys.pool_size,
            selection: KeySelectionPolicy::default(),
            synthesizer: Synthesizer::new(),
            attestor: Attestor::new(signing),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_selection(mut self, selection: KeySelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Synthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    /// Seed synthesis, key selection and key generation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn keys(&self) -> &KeyStore<P> {
        &self.keys
    }

    pub fn signing(&self) -> &SigningConfig {
        self.attestor.config()
    }

    /// The RNG holds no invariant a panicking holder could break, so a
    /// poisoned lock is taken over as is.
    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make sure the configured key pool exists. Safe to call on every start.
    pub fn init(&self) -> Result<PoolReport> {
        let mut rng = self.rng();
        let report = self.keys.ensure_pool(self.pool_size, &mut *rng)?;
        tracing::info!(
            existing = report.existing,
            generated = report.generated,
            pool_size = self.pool_size,
            "key pool initialized"
        );
        Ok(report)
    }

    /// Synthesize and attest one record.
    pub fn attest(&self, request: &OracleRequest) -> Result<OracleResponse> {
        let policy = request
            .key_id
            .map(KeySelectionPolicy::Id)
            .unwrap_or_else(|| self.selection.clone());

        let (key, record) = {
            let mut rng = self.rng();
            let key = self.keys.select(&policy, self.pool_size, &mut *rng)?;
            let record = self.synthesizer.synthesize(&request.synthesis, &mut *rng)?;
            (key, record)
        };

        let attestation = self.attestor.attest(&record, &key, &mut OsRng)?;

        tracing::debug!(
            record_id = %attestation.tce_id,
            key_id = %attestation.key_id,
            mode = %attestation.mode,
            "request attested"
        );

        Ok(OracleResponse {
            shipment_id: record.shipment_id,
            correlation: request.correlation.clone(),
            attestation,
            receipt: None,
        })
    }

    /// Attest one record and hand the bundle to `sink`.
    ///
    /// A request naming a record id the sink already holds is answered with
    /// the stored bundle and receipt, so a retried request succeeds instead
    /// of colliding with its own earlier submission.
    pub async fn attest_and_submit(
        &self,
        request: &OracleRequest,
        sink: &dyn AttestationSink,
    ) -> Result<OracleResponse> {
        if let Some(tce_id) = &request.synthesis.record_id {
            if let Some(entry) = sink.lookup(tce_id).await? {
                tracing::info!(record_id = %tce_id, sink = sink.name(), "record already submitted");
                return replay(request, tce_id, entry);
            }
        }

        let mut response = self.attest(request)?;

        match sink.submit(&response.attestation).await {
            Ok(receipt) => {
                tracing::debug!(
                    record_id = %response.attestation.tce_id,
                    sink = sink.name(),
                    pcf = receipt.pcf,
                    "attestation submitted"
                );
                response.receipt = Some(receipt);
                Ok(response)
            }
            Err(SinkError::Conflict(tce_id)) if request.synthesis.record_id.is_some() => {
                // A concurrent retry submitted first
                match sink.lookup(&tce_id).await? {
                    Some(entry) => replay(request, &tce_id, entry),
                    None => Err(SinkError::Conflict(tce_id).into()),
                }
            }
            Err(e) => {
                tracing::warn!(
                    record_id = %response.attestation.tce_id,
                    sink = sink.name(),
                    error = %e,
                    "sink submission failed"
                );
                Err(e.into())
            }
        }
    }
}

/// Answer `request` with a bundle the sink already holds for `tce_id`.
fn replay(request: &OracleRequest, tce_id: &RecordId, entry: SinkEntry) -> Result<OracleResponse> {
    let stored_shipment = serde_json::from_str::<serde_json::Value>(&entry.attestation.canonical_record)
        .ok()
        .and_then(|record| record.get("shipmentId")?.as_str().map(str::to_string));
    if stored_shipment.as_deref() != Some(request.synthesis.shipment_id.0.as_str()) {
        return Err(SinkError::Conflict(tce_id.clone()).into());
    }

    Ok(OracleResponse {
        shipment_id: request.synthesis.shipment_id.clone(),
        correlation: request.correlation.clone(),
        attestation: entry.attestation,
        receipt: Some(entry.receipt),
    })
}
