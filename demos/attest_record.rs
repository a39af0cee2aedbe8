//! Example: Synthesizing, attesting and verifying a TCE record
//!
//! Run with: cargo run --example attest_record

use tce_core::attestation::commitment_for;
use tce_core::{
    AttestationMode, AttestationSink, FileSink, FsKeyProvider, KeyId, KeyStore, Oracle,
    OracleRequest, SigningConfig, SynthesisRequest, Verifier,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("🚚 TCE Oracle - Example Usage\n");
    println!("==============================================\n");

    let workdir = tempfile::tempdir()?;
    let key_dir = workdir.path().join("keys");

    // Step 1: Provision the key pool (idempotent; a second call generates nothing)
    println!("1️⃣  Provisioning key pool in {}...", key_dir.display());
    let signing = SigningConfig {
        mode: AttestationMode::CommitReveal,
        ..SigningConfig::default()
    };
    let oracle = Oracle::new(KeyStore::new(FsKeyProvider::new(&key_dir)), signing)
        .with_pool_size(2)
        .with_seed(42);
    let report = oracle.init()?;
    println!("   ✓ {} generated, {} existing", report.generated, report.existing);
    let report = oracle.init()?;
    println!("   ✓ Re-run: {} generated, {} existing\n", report.generated, report.existing);

    // Step 2: Synthesize and attest a record in commit-reveal mode
    println!("2️⃣  Attesting shipment SHIP_1 (5000 kg over 300 km)...");
    let request = OracleRequest::new(
        SynthesisRequest::new("SHIP_1")
            .mass_kg(5000.0)
            .distance_km(300.0),
    )
    .key_id(KeyId::new(1).ok_or_else(|| anyhow::anyhow!("invalid key index"))?);
    let response = oracle.attest(&request)?;
    let bundle = &response.attestation;
    println!("   Record ID: {}", bundle.tce_id);
    println!("   Key: {} ({})", bundle.key_id, bundle.signature_scheme);
    println!("   Canonical record: {} bytes", bundle.canonical_record.len());
    println!("   Commitment: {}", bundle.commitment.as_deref().unwrap_or("-"));
    println!("   Salt: {}\n", bundle.salt.as_deref().unwrap_or("-"));

    // Step 3: Publish only the sealed commitment and check authorship
    println!("3️⃣  Verifying the sealed commitment before reveal...");
    let sealed = bundle
        .seal()
        .ok_or_else(|| anyhow::anyhow!("commit-reveal bundle without commitment"))?;
    match Verifier::new().verify_commitment(&sealed) {
        Ok(()) => println!("   ✅ Commitment signature VALID\n"),
        Err(e) => println!("   ❌ Commitment signature INVALID: {e}\n"),
    }

    // Step 4: Reveal record and salt, recompute the commitment
    println!("4️⃣  Verifying the revealed record...");
    if let Some(salt) = bundle.salt.as_deref() {
        let recomputed = commitment_for(bundle.canonical_record.as_bytes(), salt);
        println!("   ✓ Recomputed commitment: {recomputed}");
    }
    match Verifier::new().verify(bundle) {
        Ok(()) => println!("   ✅ Disclosure VALID\n"),
        Err(e) => println!("   ❌ Disclosure INVALID: {e}\n"),
    }

    // Step 5: Submit to the mock proofing sink
    println!("5️⃣  Submitting to the proofing sink...");
    let sink = FileSink::new(workdir.path().join("activities.json"));
    let receipt = sink.submit(bundle).await?;
    println!("   ✓ Proof: {}", receipt.proof);
    println!("   ✓ PCF: {:.2}", receipt.pcf);
    let again = sink.submit(bundle).await?;
    println!("   ✓ Resubmission returns the same receipt: {}\n", again == receipt);

    println!("==============================================");
    println!("✅ Attestation workflow complete!");
    Ok(())
}
