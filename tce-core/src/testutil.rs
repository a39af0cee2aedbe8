//! Shared fixtures for unit tests.

use crate::types::*;
use chrono::{TimeZone, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rsa::RsaPrivateKey;
use std::sync::OnceLock;

/// Small keys keep the suite fast; the 2048-bit default has its own test.
pub const TEST_KEY_BITS: usize = 1024;

pub fn test_rng() -> StdRng {
    StdRng::seed_from_u64(7)
}

pub fn test_key() -> RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| {
        RsaPrivateKey::new(&mut StdRng::seed_from_u64(42), TEST_KEY_BITS).unwrap()
    })
    .clone()
}

pub fn sample_record() -> TceRecord {
    let departure = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
    TceRecord {
        tce_id: RecordId("TCE_test".to_string()),
        shipment_id: ShipmentId("SHIP_1".to_string()),
        mass: "5000.00".to_string(),
        distance: Distance {
            value: "300.00".to_string(),
            unit: "km".to_string(),
            data_source: "Simulated".to_string(),
        },
        transport_activity: "1500.000".to_string(),
        emissions: Emissions {
            co2_factor_ttw_per_tkm: "0.080".to_string(),
            co2e_ttw: "120.000".to_string(),
            wtw_multiplier: "1.200".to_string(),
            co2e_wtw: "144.000".to_string(),
            nox_ttw: Some("1.5000".to_string()),
            sox_ttw: None,
            ch4_ttw: None,
            pm_ttw: None,
        },
        operator: OperatorId::Transport("TOC_1".to_string()),
        prev_tce_ids: None,
        consignment_id: None,
        packaging: None,
        origin: Location::physical("Berlin", "DE", "10115".to_string()),
        destination: Location::physical("Hamburg", "DE", "20095".to_string()),
        departure_at: departure,
        arrival_at: departure + chrono::Duration::hours(5),
        incoterms: None,
        temperature_control: None,
        flight_no: None,
        voyage_no: None,
    }
}

pub fn sample_attestation() -> crate::attestation::Attestation {
    let key = crate::keystore::KeyPair::from_private(
        crate::keystore::KeyId::new(1).unwrap(),
        test_key(),
    );
    crate::attestation::Attestor::default()
        .attest(&sample_record(), &key, &mut test_rng())
        .unwrap()
}
