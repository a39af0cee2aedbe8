//! Core types used across the emission attestation system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SHA-256 hash (32 bytes)
pub type Hash256 = [u8; 32];

/// TCE record identifier (globally unique, `TCE_<uuid>` when generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shipment identifier supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShipmentId(pub String);

impl fmt::Display for ShipmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Distance travelled on one transport leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distance {
    /// Fixed two-decimal value
    pub value: String,
    pub unit: String,
    pub data_source: String,
}

/// A physical location (origin or destination of a leg).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(rename = "type")]
    pub kind: String,
    pub location_name: String,
    pub country_code: String,
    pub postal_code: String,
    pub city: String,
}

impl Location {
    pub fn physical(city: &str, country_code: &str, postal_code: String) -> Self {
        Self {
            kind: "PhysicalLocation".to_string(),
            location_name: city.to_string(),
            country_code: country_code.to_string(),
            postal_code,
            city: city.to_string(),
        }
    }
}

/// The operator responsible for the leg.
///
/// Exactly one of `tocId` / `hocId` appears on the wire; the enum makes the
/// "both" case unrepresentable, and [`TceRecord::validate`] rejects empty ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorId {
    /// Transport operator
    #[serde(rename = "tocId")]
    Transport(String),
    /// Handling operator (hub / warehouse)
    #[serde(rename = "hocId")]
    Handling(String),
}

impl OperatorId {
    pub fn as_str(&self) -> &str {
        match self {
            OperatorId::Transport(id) | OperatorId::Handling(id) => id,
        }
    }
}

/// Emission quantities derived from transport activity.
///
/// All values are pre-formatted fixed-precision decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emissions {
    pub co2_factor_ttw_per_tkm: String,
    #[serde(rename = "co2eTTW")]
    pub co2e_ttw: String,
    pub wtw_multiplier: String,
    #[serde(rename = "co2eWTW")]
    pub co2e_wtw: String,
    #[serde(rename = "noxTTW", default, skip_serializing_if = "Option::is_none")]
    pub nox_ttw: Option<String>,
    #[serde(rename = "soxTTW", default, skip_serializing_if = "Option::is_none")]
    pub sox_ttw: Option<String>,
    #[serde(rename = "ch4TTW", default, skip_serializing_if = "Option::is_none")]
    pub ch4_ttw: Option<String>,
    #[serde(rename = "pmTTW", default, skip_serializing_if = "Option::is_none")]
    pub pm_ttw: Option<String>,
}

/// Packaging or transport equipment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackagingType {
    Pallet,
    #[serde(rename = "Container-TEU")]
    ContainerTeu,
    Bulk,
    Box,
    Crate,
}

impl PackagingType {
    pub const ALL: [PackagingType; 5] = [
        PackagingType::Pallet,
        PackagingType::ContainerTeu,
        PackagingType::Bulk,
        PackagingType::Box,
        PackagingType::Crate,
    ];
}

impl fmt::Display for PackagingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackagingType::Pallet => write!(f, "Pallet"),
            PackagingType::ContainerTeu => write!(f, "Container-TEU"),
            PackagingType::Bulk => write!(f, "Bulk"),
            PackagingType::Box => write!(f, "Box"),
            PackagingType::Crate => write!(f, "Crate"),
        }
    }
}

/// Packaging descriptor; the amount format depends on the type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packaging {
    #[serde(rename = "packagingOrTrEqType")]
    pub kind: PackagingType,
    #[serde(rename = "packagingOrTrEqAmount")]
    pub amount: String,
}

/// Incoterms 2020 rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Incoterms {
    Exw,
    Fca,
    Cpt,
    Cip,
    Dap,
    Dpu,
    Ddp,
    Fas,
    Fob,
    Cfr,
    Cif,
}

impl Incoterms {
    pub const ALL: [Incoterms; 11] = [
        Incoterms::Exw,
        Incoterms::Fca,
        Incoterms::Cpt,
        Incoterms::Cip,
        Incoterms::Dap,
        Incoterms::Dpu,
        Incoterms::Ddp,
        Incoterms::Fas,
        Incoterms::Fob,
        Incoterms::Cfr,
        Incoterms::Cif,
    ];
}

/// Temperature control mode for the cargo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureControl {
    Ambient,
    Refrigerated,
}

impl TemperatureControl {
    pub const ALL: [TemperatureControl; 2] =
        [TemperatureControl::Ambient, TemperatureControl::Refrigerated];
}

/// A Transport Carbon Emission record: one transport leg's emission activity.
///
/// Optional fields that hold no value are skipped entirely when serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TceRecord {
    pub tce_id: RecordId,
    pub shipment_id: ShipmentId,
    /// Mass in kg (two decimals)
    pub mass: String,
    pub distance: Distance,
    /// mass × distance / 1000 in tonne-km (three decimals)
    pub transport_activity: String,
    #[serde(flatten)]
    pub emissions: Emissions,
    #[serde(flatten)]
    pub operator: OperatorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_tce_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consignment_id: Option<String>,
    #[serde(flatten)]
    pub packaging: Option<Packaging>,
    pub origin: Location,
    pub destination: Location,
    #[serde(with = "utc_seconds")]
    pub departure_at: DateTime<Utc>,
    #[serde(with = "utc_seconds")]
    pub arrival_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incoterms: Option<Incoterms>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_control: Option<TemperatureControl>,
    /// Reserved for air legs; never set for road transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flight_no: Option<String>,
    /// Reserved for sea legs; never set for road transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voyage_no: Option<String>,
}

/// Relative slack on top of the rounding error of the formatted inputs.
const ACTIVITY_TOLERANCE_REL: f64 = 1e-6;

impl TceRecord {
    /// Check the structural invariants a record must satisfy before it may be attested.
    ///
    /// Returns a description of the first violated invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.operator.as_str().trim().is_empty() {
            return Err("operator id is empty".to_string());
        }
        if self.arrival_at <= self.departure_at {
            return Err(format!(
                "arrival {} is not after departure {}",
                self.arrival_at, self.departure_at
            ));
        }
        if self.origin.city == self.destination.city {
            return Err(format!("origin equals destination ({})", self.origin.city));
        }

        let mass = parse_positive("mass", &self.mass)?;
        let distance = parse_positive("distance", &self.distance.value)?;
        let activity = parse_positive("transportActivity", &self.transport_activity)?;
        let expected = mass * distance / 1000.0;
        // mass/distance are rounded to 0.005, so allow their propagated error
        let tolerance = 0.0005 + 0.005 * (mass + distance) / 1000.0 + expected * ACTIVITY_TOLERANCE_REL;
        if (activity - expected).abs() > tolerance {
            return Err(format!(
                "transportActivity {} deviates from mass × distance / 1000 = {:.3}",
                self.transport_activity, expected
            ));
        }

        if let Some(packaging) = &self.packaging {
            parse_positive("packagingOrTrEqAmount", &packaging.amount)?;
        }

        Ok(())
    }
}

fn parse_positive(field: &str, value: &str) -> Result<f64, String> {
    let parsed: f64 = value
        .parse()
        .map_err(|_| format!("{field} is not a decimal: {value:?}"))?;
    if !(parsed.is_finite() && parsed > 0.0) {
        return Err(format!("{field} must be positive, got {value}"));
    }
    Ok(parsed)
}

/// UTC timestamps with second precision, rendered as `YYYY-MM-DDTHH:MM:SSZ`.
pub mod utc_seconds {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(|e| serde::de::Error::custom(format!("invalid timestamp {raw:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::sample_record;

    #[test]
    fn test_record_id_display() {
        let id = RecordId("TCE_1".to_string());
        assert_eq!(id.to_string(), "TCE_1");
    }

    #[test]
    fn test_sample_record_is_valid() {
        assert!(sample_record().validate().is_ok());
    }

    #[test]
    fn test_operator_serializes_as_single_key() {
        let record = sample_record();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["tocId"], "TOC_1");
        assert!(value.get("hocId").is_none());
    }

    #[test]
    fn test_absent_optionals_are_skipped() {
        let value = serde_json::to_value(sample_record()).unwrap();
        let object = value.as_object().unwrap();
        for key in ["prevTceIds", "consignmentId", "packagingOrTrEqType", "flightNo", "voyageNo", "soxTTW"] {
            assert!(!object.contains_key(key), "{key} should be absent");
        }
        assert_eq!(value["noxTTW"], "1.5000");
    }

    #[test]
    fn test_timestamp_format() {
        let value = serde_json::to_value(sample_record()).unwrap();
        assert_eq!(value["departureAt"], "2025-03-01T08:00:00Z");
        assert_eq!(value["arrivalAt"], "2025-03-01T13:00:00Z");
    }

    #[test]
    fn test_packaging_wire_names() {
        let mut record = sample_record();
        record.packaging = Some(Packaging {
            kind: PackagingType::ContainerTeu,
            amount: "2.25".to_string(),
        });
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["packagingOrTrEqType"], "Container-TEU");
        assert_eq!(value["packagingOrTrEqAmount"], "2.25");
    }

    #[test]
    fn test_validate_rejects_arrival_before_departure() {
        let mut record = sample_record();
        record.arrival_at = record.departure_at;
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_operator() {
        let mut record = sample_record();
        record.operator = OperatorId::Handling(String::new());
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_wrong_activity() {
        let mut record = sample_record();
        record.transport_activity = "1600.000".to_string();
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_same_origin_and_destination() {
        let mut record = sample_record();
        record.destination = record.origin.clone();
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_record_deserializes_back() {
        let record = sample_record();
        let json = serde_json::to_string(&record).unwrap();
        let decoded: TceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, decoded);
    }
}
