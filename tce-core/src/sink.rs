//! Attestation sinks.
//!
//! A sink accepts finished attestation bundles and answers with a receipt.
//! The real proofing ledger is external; the sinks here are mocks that
//! behave like it: submissions are idempotent per record id, and a second,
//! different bundle for an already-submitted record is refused.

use crate::attestation::Attestation;
use crate::types::RecordId;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

const PROOF_ALPHABET: &[u8] = b"ABCDEFabcdef0123456789";
const PROOF_LEN: usize = 64;
const PCF_MAX: f64 = 1000.0;

/// Acknowledgement returned by a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkReceipt {
    pub proof: String,
    /// Product carbon footprint reported back by the ledger, two decimals
    pub pcf: f64,
}

impl SinkReceipt {
    fn mock<R: Rng>(rng: &mut R) -> Self {
        let proof = (0..PROOF_LEN)
            .map(|_| PROOF_ALPHABET[rng.gen_range(0..PROOF_ALPHABET.len())] as char)
            .collect();
        Self {
            proof,
            pcf: (rng.gen_range(0.0..=PCF_MAX) * 100.0).round() / 100.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("A different attestation for {0} was already submitted")]
    Conflict(RecordId),

    #[error("Submission rejected: {0}")]
    Rejected(String),

    #[error("Sink serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A submitted bundle and the receipt it was answered with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkEntry {
    pub attestation: Attestation,
    pub receipt: SinkReceipt,
}

/// Destination for attestation bundles.
#[async_trait]
pub trait AttestationSink: Send + Sync {
    fn name(&self) -> &str;

    /// Submit a bundle; resubmitting the identical bundle returns the original receipt.
    async fn submit(&self, attestation: &Attestation) -> Result<SinkReceipt, SinkError>;

    /// The entry already held for a record, if any.
    async fn lookup(&self, _tce_id: &RecordId) -> Result<Option<SinkEntry>, SinkError> {
        Ok(None)
    }
}

type Ledger = BTreeMap<String, SinkEntry>;

fn receipt_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Record a submission in `ledger`, or return the receipt it already holds.
fn record<R: Rng>(
    ledger: &mut Ledger,
    attestation: &Attestation,
    rng: &mut R,
) -> Result<(SinkReceipt, bool), SinkError> {
    if let Some(entry) = ledger.get(&attestation.tce_id.0) {
        if entry.attestation != *attestation {
            return Err(SinkError::Conflict(attestation.tce_id.clone()));
        }
        return Ok((entry.receipt.clone(), false));
    }

    let receipt = SinkReceipt::mock(rng);
    ledger.insert(
        attestation.tce_id.0.clone(),
        SinkEntry {
            attestation: attestation.clone(),
            receipt: receipt.clone(),
        },
    );
    Ok((receipt, true))
}

/// In-memory sink for tests and embedding.
#[derive(Debug)]
pub struct MemorySink {
    ledger: Mutex<Ledger>,
    rng: Mutex<StdRng>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger::new()),
            rng: Mutex::new(receipt_rng(None)),
        }
    }

    /// Draw receipts from a seeded RNG.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(receipt_rng(Some(seed)));
        self
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.ledger().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The stored bundle for a record, if any.
    pub fn get(&self, tce_id: &RecordId) -> Option<Attestation> {
        self.ledger().get(&tce_id.0).map(|e| e.attestation.clone())
    }
}

#[async_trait]
impl AttestationSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn submit(&self, attestation: &Attestation) -> Result<SinkReceipt, SinkError> {
        let mut ledger = self.ledger();
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let (receipt, _) = record(&mut ledger, attestation, &mut *rng)?;
        Ok(receipt)
    }

    async fn lookup(&self, tce_id: &RecordId) -> Result<Option<SinkEntry>, SinkError> {
        Ok(self.ledger().get(&tce_id.0).cloned())
    }
}

#[cfg(feature = "async")]
pub use file::FileSink;

#[cfg(feature = "async")]
mod file {
    use super::*;
    use std::path::Path;

    /// Mock proofing service persisting every bundle, keyed by record id,
    /// as pretty JSON in a single file.
    ///
    /// The receipt RNG doubles as the write lock.
    #[derive(Debug)]
    pub struct FileSink {
        path: PathBuf,
        rng: tokio::sync::Mutex<StdRng>,
    }

    impl FileSink {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self {
                path: path.into(),
                rng: tokio::sync::Mutex::new(receipt_rng(None)),
            }
        }

        /// Draw receipts from a seeded RNG.
        pub fn with_seed(mut self, seed: u64) -> Self {
            self.rng = tokio::sync::Mutex::new(receipt_rng(Some(seed)));
            self
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        fn io_err(&self, source: std::io::Error) -> SinkError {
            SinkError::Io {
                path: self.path.clone(),
                source,
            }
        }

        async fn read_ledger(&self) -> Result<Ledger, SinkError> {
            match tokio::fs::read(&self.path).await {
                Ok(bytes) if bytes.is_empty() => Ok(Ledger::new()),
                Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Ledger::new()),
                Err(e) => Err(self.io_err(e)),
            }
        }

        async fn write_ledger(&self, ledger: &Ledger) -> Result<(), SinkError> {
            let bytes = serde_json::to_vec_pretty(ledger)?;
            let mut tmp = self.path.clone().into_os_string();
            tmp.push(".tmp");
            let tmp = PathBuf::from(tmp);

            tokio::fs::write(&tmp, bytes)
                .await
                .map_err(|e| self.io_err(e))?;
            tokio::fs::rename(&tmp, &self.path)
                .await
                .map_err(|e| self.io_err(e))
        }
    }

    #[async_trait]
    impl AttestationSink for FileSink {
        fn name(&self) -> &str {
            "file"
        }

        async fn submit(&self, attestation: &Attestation) -> Result<SinkReceipt, SinkError> {
            let mut rng = self.rng.lock().await;

            let mut ledger = self.read_ledger().await?;
            let (receipt, inserted) = record(&mut ledger, attestation, &mut *rng)?;
            if inserted {
                self.write_ledger(&ledger).await?;
                tracing::debug!(
                    record_id = %attestation.tce_id,
                    path = %self.path.display(),
                    "attestation stored"
                );
            }
            Ok(receipt)
        }

        async fn lookup(&self, tce_id: &RecordId) -> Result<Option<SinkEntry>, SinkError> {
            let _guard = self.rng.lock().await;
            Ok(self.read_ledger().await?.remove(&tce_id.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::sample_attestation;

    #[test]
    fn test_mock_receipt_shape() {
        let receipt = SinkReceipt::mock(&mut StdRng::seed_from_u64(1));
        assert_eq!(receipt.proof.len(), PROOF_LEN);
        assert!(receipt.proof.bytes().all(|b| PROOF_ALPHABET.contains(&b)));
        assert!((0.0..=PCF_MAX).contains(&receipt.pcf));
    }

    #[tokio::test]
    async fn test_memory_sink_is_idempotent() {
        let sink = MemorySink::new();
        let bundle = sample_attestation();

        let first = sink.submit(&bundle).await.unwrap();
        let second = sink.submit(&bundle).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.get(&bundle.tce_id), Some(bundle));
    }

    #[tokio::test]
    async fn test_seeded_sinks_issue_identical_receipts() {
        let bundle = sample_attestation();
        let a = MemorySink::new().with_seed(9).submit(&bundle).await.unwrap();
        let b = MemorySink::new().with_seed(9).submit(&bundle).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_memory_sink_lookup() {
        let sink = MemorySink::new();
        let bundle = sample_attestation();
        assert_eq!(sink.lookup(&bundle.tce_id).await.unwrap(), None);

        let receipt = sink.submit(&bundle).await.unwrap();
        let entry = sink.lookup(&bundle.tce_id).await.unwrap().unwrap();
        assert_eq!(entry.attestation, bundle);
        assert_eq!(entry.receipt, receipt);
    }

    #[tokio::test]
    async fn test_memory_sink_conflict() {
        let sink = MemorySink::new();
        let bundle = sample_attestation();
        sink.submit(&bundle).await.unwrap();

        let mut other = bundle.clone();
        other.signature = "00".into();
        assert!(matches!(
            sink.submit(&other).await,
            Err(SinkError::Conflict(id)) if id == bundle.tce_id
        ));
        assert_eq!(sink.get(&bundle.tce_id), Some(bundle));
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_file_sink_persists_bundles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activities.json");
        let bundle = sample_attestation();

        let receipt = FileSink::new(&path).submit(&bundle).await.unwrap();

        let stored: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(
            stored["TCE_test"]["attestation"]["activityDataJson"],
            bundle.canonical_record.as_str()
        );
        assert_eq!(stored["TCE_test"]["receipt"]["proof"], receipt.proof.as_str());

        // A fresh sink over the same file sees the earlier submission
        let reopened = FileSink::new(&path);
        assert_eq!(reopened.submit(&bundle).await.unwrap(), receipt);
        let entry = reopened.lookup(&bundle.tce_id).await.unwrap().unwrap();
        assert_eq!(entry.receipt, receipt);

        let mut other = bundle.clone();
        other.signature = "00".into();
        assert!(matches!(
            reopened.submit(&other).await,
            Err(SinkError::Conflict(_))
        ));
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_file_sink_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activities.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FileSink::new(&path).submit(&sample_attestation()).await,
            Err(SinkError::Serialization(_))
        ));
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_file_sink_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("missing").join("activities.json"));
        assert!(matches!(
            sink.submit(&sample_attestation()).await,
            Err(SinkError::Io { .. })
        ));
    }
}
