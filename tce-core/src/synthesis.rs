//! Synthetic TCE record generation.
//!
//! Produces structurally valid emission records for one road transport leg.
//! Every random draw comes from the caller's RNG, so a seeded RNG yields the
//! same record byte for byte.

use crate::serialization::ordered_set;
use crate::types::*;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use std::ops::Range;
use thiserror::Error;

pub const CITIES: [&str; 24] = [
    "Berlin", "Hamburg", "München", "Köln", "Frankfurt", "Stuttgart", "Düsseldorf",
    "Dortmund", "Essen", "Leipzig", "Bremen", "Dresden", "Hannover", "Nürnberg",
    "Duisburg", "Bochum", "Wuppertal", "Bielefeld", "Bonn", "Münster", "Karlsruhe",
    "Mannheim", "Augsburg", "Wiesbaden",
];
pub const COUNTRY_CODE: &str = "DE";

const MASS_KG: Range<f64> = 1000.0..20000.0;
const DISTANCE_KM: Range<f64> = 10.0..1000.0;
const SPEED_KMH: Range<f64> = 60.0..80.0;
const INEFFICIENCY: Range<f64> = 1.0..1.2;

const CO2_FACTOR_TTW: Range<f64> = 0.06..0.12;
const WTW_MULTIPLIER: Range<f64> = 1.15..1.25;

/// (inclusion probability, factor range per tonne-km, decimals)
const NOX: (f64, Range<f64>, usize) = (0.8, 0.0005..0.003, 4);
const SOX: (f64, Range<f64>, usize) = (0.3, 0.00001..0.00005, 5);
const CH4: (f64, Range<f64>, usize) = (0.5, 0.00002..0.0001, 5);
const PM: (f64, Range<f64>, usize) = (0.7, 0.00003..0.00015, 5);

const CONSIGNMENT_PROBABILITY: f64 = 0.7;
const TEU_SMALL_PROBABILITY: f64 = 0.7;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, SynthesisError>;

/// Constraints for one synthesized record. Unset values are drawn at random.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub shipment_id: ShipmentId,
    pub record_id: Option<RecordId>,
    pub mass_kg: Option<f64>,
    pub distance_km: Option<f64>,
    pub prev_tce_ids: Vec<String>,
    pub start_time: Option<DateTime<Utc>>,
}

impl SynthesisRequest {
    pub fn new(shipment_id: impl Into<String>) -> Self {
        Self {
            shipment_id: ShipmentId(shipment_id.into()),
            record_id: None,
            mass_kg: None,
            distance_km: None,
            prev_tce_ids: Vec::new(),
            start_time: None,
        }
    }

    pub fn record_id(mut self, id: impl Into<String>) -> Self {
        self.record_id = Some(RecordId(id.into()));
        self
    }

    pub fn mass_kg(mut self, mass: f64) -> Self {
        self.mass_kg = Some(mass);
        self
    }

    pub fn distance_km(mut self, distance: f64) -> Self {
        self.distance_km = Some(distance);
        self
    }

    /// Chain-of-custody links in the given order.
    pub fn prev_tce_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prev_tce_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Chain-of-custody links from an unordered collection; sorted and deduplicated.
    pub fn prev_tce_set<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prev_tce_ids = ordered_set(ids);
        self
    }

    pub fn start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    fn check(&self) -> Result<()> {
        if self.shipment_id.0.trim().is_empty() {
            return Err(SynthesisError::InvalidInput("shipment id is empty".into()));
        }
        if let Some(id) = &self.record_id {
            if id.0.trim().is_empty() {
                return Err(SynthesisError::InvalidInput("record id is empty".into()));
            }
        }
        for (name, value) in [("mass", self.mass_kg), ("distance", self.distance_km)] {
            if let Some(v) = value {
                if !(v.is_finite() && v > 0.0) {
                    return Err(SynthesisError::InvalidInput(format!(
                        "{name} must be a positive number, got {v}"
                    )));
                }
            }
        }
        if self.prev_tce_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(SynthesisError::InvalidInput("empty previous record id".into()));
        }
        Ok(())
    }
}

/// Record synthesizer.
#[derive(Debug, Clone)]
pub struct Synthesizer {
    clock: fn() -> DateTime<Utc>,
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Synthesizer {
    pub fn new() -> Self {
        Self { clock: Utc::now }
    }

    /// Use a fixed clock for the default departure time.
    pub fn with_clock(clock: fn() -> DateTime<Utc>) -> Self {
        Self { clock }
    }

    /// Build one record satisfying every structural invariant, or fail.
    pub fn synthesize<R: Rng>(&self, request: &SynthesisRequest, rng: &mut R) -> Result<TceRecord> {
        request.check()?;

        let mass_kg = request.mass_kg.unwrap_or_else(|| rng.gen_range(MASS_KG));
        let distance_km = request.distance_km.unwrap_or_else(|| rng.gen_range(DISTANCE_KM));
        let tce_id = request
            .record_id
            .clone()
            .unwrap_or_else(|| RecordId(prefixed_id(rng, "TCE")));

        let activity = distance_km * mass_kg / 1000.0;
        let mass = format!("{mass_kg:.2}");
        let distance = format!("{distance_km:.2}");
        let transport_activity = format!("{activity:.3}");
        for (name, rendered) in [
            ("mass", &mass),
            ("distance", &distance),
            ("transport activity", &transport_activity),
        ] {
            if !rendered.parse::<f64>().is_ok_and(|v| v.is_finite() && v > 0.0) {
                return Err(SynthesisError::InvalidInput(format!(
                    "{name} renders as {rendered}, outside the recordable range"
                )));
            }
        }
        let emissions = draw_emissions(rng, activity);

        let operator = draw_operator(rng).unwrap_or_else(|| fallback_operator(rng));

        let prev_tce_ids = (!request.prev_tce_ids.is_empty()).then(|| request.prev_tce_ids.clone());
        let consignment_id = rng
            .gen_bool(CONSIGNMENT_PROBABILITY)
            .then(|| prefixed_id(rng, "CON"));
        let packaging = draw_packaging(rng);

        let (origin, destination) = draw_route(rng);

        let departure_at = request
            .start_time
            .unwrap_or_else(self.clock)
            .trunc_subsecs(0);
        let hours = travel_hours(rng, distance_km);
        let arrival_at = Duration::try_hours(hours)
            .and_then(|travel| departure_at.checked_add_signed(travel))
            .ok_or_else(|| {
                SynthesisError::InvalidInput(format!(
                    "arrival {hours}h after {departure_at} is out of range"
                ))
            })?;

        let incoterms = pick_optional(rng, &Incoterms::ALL);
        let temperature_control = pick_optional(rng, &TemperatureControl::ALL);

        let record = TceRecord {
            tce_id,
            shipment_id: request.shipment_id.clone(),
            mass,
            distance: Distance {
                value: distance,
                unit: "km".to_string(),
                data_source: "Simulated".to_string(),
            },
            transport_activity,
            emissions,
            operator,
            prev_tce_ids,
            consignment_id,
            packaging,
            origin,
            destination,
            departure_at,
            arrival_at,
            incoterms,
            temperature_control,
            flight_no: None,
            voyage_no: None,
        };

        record.validate().map_err(SynthesisError::InvariantViolation)?;

        tracing::debug!(
            record_id = %record.tce_id,
            shipment_id = %record.shipment_id,
            transport_activity = %record.transport_activity,
            "synthesized record"
        );
        Ok(record)
    }
}

/// `<prefix>_<uuid-v4>` with the UUID drawn from `rng`.
fn prefixed_id<R: Rng>(rng: &mut R, prefix: &str) -> String {
    let uuid = uuid::Builder::from_random_bytes(rng.gen()).into_uuid();
    format!("{prefix}_{uuid}")
}

fn draw_emissions<R: Rng>(rng: &mut R, activity: f64) -> Emissions {
    let co2_factor = rng.gen_range(CO2_FACTOR_TTW);
    let co2e_ttw = activity * co2_factor;
    let wtw_multiplier = rng.gen_range(WTW_MULTIPLIER);
    let co2e_wtw = co2e_ttw * wtw_multiplier;

    let mut pollutant = |(probability, range, decimals): (f64, Range<f64>, usize)| {
        rng.gen_bool(probability)
            .then(|| format!("{:.*}", decimals, activity * rng.gen_range(range)))
    };
    let nox_ttw = pollutant(NOX);
    let sox_ttw = pollutant(SOX);
    let ch4_ttw = pollutant(CH4);
    let pm_ttw = pollutant(PM);

    Emissions {
        co2_factor_ttw_per_tkm: format!("{co2_factor:.3}"),
        co2e_ttw: format!("{co2e_ttw:.3}"),
        wtw_multiplier: format!("{wtw_multiplier:.3}"),
        co2e_wtw: format!("{co2e_wtw:.3}"),
        nox_ttw,
        sox_ttw,
        ch4_ttw,
        pm_ttw,
    }
}

/// Coin flip between transport and handling operator; `None` if the id came out empty.
fn draw_operator<R: Rng>(rng: &mut R) -> Option<OperatorId> {
    let operator = if rng.gen_bool(0.5) {
        OperatorId::Transport(prefixed_id(rng, "TOC"))
    } else {
        OperatorId::Handling(prefixed_id(rng, "HOC"))
    };
    (!operator.as_str().is_empty()).then_some(operator)
}

fn fallback_operator<R: Rng>(rng: &mut R) -> OperatorId {
    tracing::warn!("operator id missing, synthesizing fallback transport operator");
    OperatorId::Transport(prefixed_id(rng, "TOC_fallback"))
}

fn draw_packaging<R: Rng>(rng: &mut R) -> Option<Packaging> {
    let kind = pick_optional(rng, &PackagingType::ALL)?;
    let amount = match kind {
        PackagingType::ContainerTeu => {
            let teu = if rng.gen_bool(TEU_SMALL_PROBABILITY) { "2.00" } else { "2.25" };
            teu.to_string()
        }
        PackagingType::Pallet => format!("{}.00", rng.gen_range(1..=26u32)),
        _ => format!("{:.2}", rng.gen_range(1.0..10.0f64)),
    };
    Some(Packaging { kind, amount })
}

fn draw_route<R: Rng>(rng: &mut R) -> (Location, Location) {
    let origin = *CITIES.choose(rng).unwrap_or(&CITIES[0]);
    let others: Vec<&str> = CITIES.iter().copied().filter(|c| *c != origin).collect();
    let destination = *others.choose(rng).unwrap_or(&CITIES[1]);

    (location(rng, origin), location(rng, destination))
}

fn location<R: Rng>(rng: &mut R, city: &str) -> Location {
    Location::physical(city, COUNTRY_CODE, rng.gen_range(10000..=99999u32).to_string())
}

/// Whole hours of travel, rounded up so every leg takes at least one hour.
/// Saturates at `i64::MAX` for absurd distances.
fn travel_hours<R: Rng>(rng: &mut R, distance_km: f64) -> i64 {
    let speed = rng.gen_range(SPEED_KMH);
    let inefficiency = rng.gen_range(INEFFICIENCY);
    ((distance_km / speed) * inefficiency).ceil().max(1.0) as i64
}

/// Uniform over `options` plus one extra "none selected" outcome.
fn pick_optional<R: Rng, T: Copy>(rng: &mut R, options: &[T]) -> Option<T> {
    let index = rng.gen_range(0..=options.len());
    options.get(index).copied()
}
