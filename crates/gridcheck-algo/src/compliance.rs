//! Threshold checks over snapshot tables.
//!
//! | Check | Passes when |
//! |-------|-------------|
//! | steady-state voltage | every bus voltage lies inside its band (inclusive) |
//! | step change | every `|v - v_base| <= limit` (0.10 pu circuit switching, 0.03 pu voltage control) |
//! | loading | every rated element has `loading < rating` |
//!
//! Buses isolated under a contingency are left out of that contingency's
//! voltage checks. Sentinel (non-convergent) cells always fail. The base case
//! is compliant by definition and is never evaluated.

use crate::snapshot::{SnapshotStore, SnapshotTable, BASE_CASE};
use gridcheck_core::model::{RatingColumn, Ratings};
use gridcheck_core::{BusNumber, Diagnostics, GridError, GridResult, Kilovolts, MegavoltAmperes, PerUnit};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use tracing::{debug, warn};

/// Slack on inclusive pu limits, absorbing rounding in `v - v_base` and in
/// the band fractions.
pub(crate) const VOLTAGE_TOLERANCE: f64 = 1e-9;

/// Steady-state voltage band for a nominal-voltage interval.
///
/// A bus belongs to the band when `nominal_lower < base_kv <= nominal_upper`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoltageBand {
    pub nominal_lower: Kilovolts,
    pub nominal_upper: Kilovolts,
    pub lower: PerUnit,
    pub upper: PerUnit,
}

impl VoltageBand {
    pub fn new(nominal: (f64, f64), limits: (f64, f64)) -> Self {
        Self {
            nominal_lower: Kilovolts(nominal.0),
            nominal_upper: Kilovolts(nominal.1),
            lower: PerUnit(limits.0),
            upper: PerUnit(limits.1),
        }
    }

    pub fn covers(&self, base_kv: Kilovolts) -> bool {
        base_kv > self.nominal_lower && base_kv <= self.nominal_upper
    }

    pub fn admits(&self, voltage: f64) -> bool {
        voltage >= self.lower.value() - VOLTAGE_TOLERANCE
            && voltage <= self.upper.value() + VOLTAGE_TOLERANCE
    }

    /// Amount by which `voltage` exceeds the upper limit (zero or negative
    /// when within).
    pub fn excess(&self, voltage: f64) -> f64 {
        voltage - self.upper.value()
    }
}

/// Ordered, non-overlapping voltage bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoltageBands(Vec<VoltageBand>);

impl Default for VoltageBands {
    fn default() -> Self {
        Self(vec![
            VoltageBand::new((109.0, 111.0), (99.0 / 110.0, 120.0 / 110.0)),
            VoltageBand::new((219.0, 221.0), (200.0 / 220.0, 240.0 / 220.0)),
            VoltageBand::new((250.0, 276.0), (250.0 / 275.0, 303.0 / 275.0)),
            VoltageBand::new((379.0, 401.0), (360.0 / 380.0, 410.0 / 380.0)),
        ])
    }
}

impl VoltageBands {
    pub fn new(bands: Vec<VoltageBand>) -> Self {
        Self(bands)
    }

    pub fn bands(&self) -> &[VoltageBand] {
        &self.0
    }

    pub fn band_for(&self, base_kv: Kilovolts) -> Option<&VoltageBand> {
        self.0.iter().find(|band| band.covers(base_kv))
    }

    /// Nominal-voltage span of all bands, used to restrict the bus subsystem.
    pub fn kv_span(&self) -> Option<(Kilovolts, Kilovolts)> {
        let lo = self
            .0
            .iter()
            .map(|b| b.nominal_lower)
            .reduce(Kilovolts::min)?;
        let hi = self
            .0
            .iter()
            .map(|b| b.nominal_upper)
            .reduce(Kilovolts::max)?;
        Some((lo, hi))
    }

    pub fn validate(&self) -> GridResult<()> {
        if self.0.is_empty() {
            return Err(GridError::Config("no voltage bands configured".into()));
        }
        for band in &self.0 {
            if band.nominal_lower >= band.nominal_upper {
                return Err(GridError::Config(format!(
                    "voltage band ({}, {}] is empty",
                    band.nominal_lower.value(),
                    band.nominal_upper.value()
                )));
            }
            if band.lower >= band.upper {
                return Err(GridError::Config(format!(
                    "voltage band ({}, {}] has lower limit {} not below upper limit {}",
                    band.nominal_lower.value(),
                    band.nominal_upper.value(),
                    band.lower.value(),
                    band.upper.value()
                )));
            }
        }
        let mut sorted: Vec<&VoltageBand> = self.0.iter().collect();
        sorted.sort_by(|a, b| a.nominal_lower.value().total_cmp(&b.nominal_lower.value()));
        for pair in sorted.windows(2) {
            if pair[1].nominal_lower < pair[0].nominal_upper {
                return Err(GridError::Config(format!(
                    "voltage bands ({}, {}] and ({}, {}] overlap",
                    pair[0].nominal_lower.value(),
                    pair[0].nominal_upper.value(),
                    pair[1].nominal_lower.value(),
                    pair[1].nominal_upper.value()
                )));
            }
        }
        Ok(())
    }

    /// Every bus must fall in exactly one band.
    pub fn check_coverage(&self, store: &SnapshotStore) -> GridResult<()> {
        let uncovered: Vec<String> = store
            .buses()
            .iter()
            .filter(|bus| self.band_for(bus.base_kv).is_none())
            .map(|bus| format!("{} ({} kV)", bus.number, bus.base_kv.value()))
            .collect();
        if uncovered.is_empty() {
            Ok(())
        } else {
            Err(GridError::Config(format!(
                "no voltage band covers bus(es): {}",
                uncovered.join(", ")
            )))
        }
    }
}

fn default_step_circuit() -> f64 {
    0.10
}

fn default_step_voltage_control() -> f64 {
    0.03
}

/// Compliance limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceThresholds {
    #[serde(default)]
    pub voltage_bands: VoltageBands,
    /// Step-change limit for circuit-switching contingencies (pu)
    #[serde(default = "default_step_circuit")]
    pub step_circuit: f64,
    /// Step-change limit for voltage-control contingencies (pu)
    #[serde(default = "default_step_voltage_control")]
    pub step_voltage_control: f64,
    /// Elements rated at or below this are left out of loading checks
    #[serde(default)]
    pub rating_threshold: MegavoltAmperes,
    #[serde(default)]
    pub rating: RatingColumn,
}

impl Default for ComplianceThresholds {
    fn default() -> Self {
        Self {
            voltage_bands: VoltageBands::default(),
            step_circuit: default_step_circuit(),
            step_voltage_control: default_step_voltage_control(),
            rating_threshold: MegavoltAmperes(0.0),
            rating: RatingColumn::A,
        }
    }
}

impl ComplianceThresholds {
    pub fn validate(&self) -> GridResult<()> {
        self.voltage_bands.validate()?;
        for (name, limit) in [
            ("step_circuit", self.step_circuit),
            ("step_voltage_control", self.step_voltage_control),
        ] {
            if !(limit.is_finite() && limit > 0.0) {
                return Err(GridError::Config(format!(
                    "{name} must be a positive number of pu, got {limit}"
                )));
            }
        }
        if self.rating_threshold.value() < 0.0 {
            return Err(GridError::Config(
                "rating_threshold must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// One verdict per contingency name, in the order asked for.
pub type Verdicts = Vec<(String, bool)>;

/// Step-change compliance: `|v - v_base| <= limit` at every bus.
pub fn check_step(store: &SnapshotStore, names: &[String], limit: f64) -> Verdicts {
    names
        .iter()
        .map(|name| (name.clone(), step_compliant(store, name, limit)))
        .collect()
}

fn step_compliant(store: &SnapshotStore, name: &str, limit: f64) -> bool {
    if name == BASE_CASE {
        return true;
    }
    let Some(rows) = store.step_voltage().rows_for(name) else {
        return false;
    };
    for (bus, base, value) in rows {
        if store.is_isolated(name, bus) {
            continue;
        }
        match (base, value) {
            (Some(base), Some(value)) => {
                if (value - base).abs() > limit + VOLTAGE_TOLERANCE {
                    debug!(contingency = name, bus = %bus, delta = value - base, "step change exceeds limit");
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}

/// Steady-state voltage compliance against the bands.
pub fn check_steady_voltage(
    store: &SnapshotStore,
    names: &[String],
    bands: &VoltageBands,
) -> Verdicts {
    let limits: HashMap<BusNumber, Option<VoltageBand>> = store
        .buses()
        .iter()
        .map(|bus| (bus.number, bands.band_for(bus.base_kv).copied()))
        .collect();

    names
        .iter()
        .map(|name| {
            let compliant = name == BASE_CASE || steady_compliant(store, name, &limits);
            (name.clone(), compliant)
        })
        .collect()
}

fn steady_compliant(
    store: &SnapshotStore,
    name: &str,
    limits: &HashMap<BusNumber, Option<VoltageBand>>,
) -> bool {
    let Some(rows) = store.steady_voltage().rows_for(name) else {
        return false;
    };
    for (bus, _, value) in rows {
        if store.is_isolated(name, bus) {
            continue;
        }
        let Some(value) = value else {
            return false;
        };
        match limits.get(bus).copied().flatten() {
            Some(band) if band.admits(*value) => {}
            _ => {
                debug!(contingency = name, bus = %bus, voltage = value, "voltage outside band");
                return false;
            }
        }
    }
    true
}

/// Loading compliance for one element table. Elements rated at or below the
/// threshold are skipped and reported once in `diagnostics`.
pub fn check_loading<K>(
    table: &SnapshotTable<K, f64>,
    ratings: &HashMap<K, Ratings>,
    names: &[String],
    thresholds: &ComplianceThresholds,
    element_kind: &str,
    diagnostics: &mut Diagnostics,
) -> Verdicts
where
    K: Clone + Eq + Hash + Display,
{
    let mut rated: Vec<(usize, f64)> = Vec::new();
    for (row, key) in table.keys().iter().enumerate() {
        let rating = ratings
            .get(key)
            .map(|r| r.rating(thresholds.rating))
            .unwrap_or_default();
        if rating <= thresholds.rating_threshold {
            warn!(
                element = %key,
                rating = rating.value(),
                "{element_kind} has no usable rating; excluded from loading checks"
            );
            diagnostics.add_warning_with_entity(
                "rating",
                &format!(
                    "rating {:.1} MVA at or below threshold {:.1} MVA; excluded from loading checks",
                    rating.value(),
                    thresholds.rating_threshold.value()
                ),
                &format!("{element_kind} {key}"),
            );
            continue;
        }
        rated.push((row, rating.value()));
    }

    names
        .iter()
        .map(|name| {
            if name == BASE_CASE {
                return (name.clone(), true);
            }
            let compliant = match table.column(name) {
                Some(cells) => rated.iter().all(|&(row, rating)| match cells[row] {
                    Some(loading) => loading < rating,
                    None => false,
                }),
                None => false,
            };
            (name.clone(), compliant)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedSession;
    use gridcheck_core::BranchKey;

    #[test]
    fn default_bands_match_nominal_voltages() {
        let bands = VoltageBands::default();
        let cases = [
            (110.0, 99.0 / 110.0, 120.0 / 110.0),
            (220.0, 200.0 / 220.0, 240.0 / 220.0),
            (275.0, 250.0 / 275.0, 303.0 / 275.0),
            (380.0, 360.0 / 380.0, 410.0 / 380.0),
        ];
        for (kv, lower, upper) in cases {
            let band = bands.band_for(Kilovolts(kv)).unwrap();
            assert_eq!(band.lower.value(), lower);
            assert_eq!(band.upper.value(), upper);
        }
        // lower bound exclusive, upper inclusive
        assert!(bands.band_for(Kilovolts(219.0)).is_none());
        assert!(bands.band_for(Kilovolts(221.0)).is_some());
        assert!(bands.band_for(Kilovolts(33.0)).is_none());
        assert_eq!(
            bands.kv_span(),
            Some((Kilovolts(109.0), Kilovolts(401.0)))
        );
        bands.validate().unwrap();
    }

    #[test]
    fn band_limits_are_inclusive() {
        let band = VoltageBand::new((219.0, 221.0), (0.9, 1.1));
        // 0.9 + 0.2 rounds to 1.1000000000000001
        assert!(band.admits(0.9 + 0.2));
        assert!(band.admits(0.9));
        assert!(!band.admits(1.1001));
        assert!(!band.admits(0.8999));

        let bands = VoltageBands::default();
        let band = bands.band_for(Kilovolts(220.0)).unwrap();
        assert!(band.admits(240.0 / 220.0));
        assert!(band.admits(200.0 / 220.0));
    }

    #[test]
    fn overlapping_bands_are_rejected() {
        let bands = VoltageBands::new(vec![
            VoltageBand::new((100.0, 230.0), (0.9, 1.1)),
            VoltageBand::new((219.0, 240.0), (0.9, 1.1)),
        ]);
        assert!(matches!(bands.validate(), Err(GridError::Config(_))));
    }

    fn store_with_step(delta: f64) -> SnapshotStore {
        let mut session = ScriptedSession::new()
            .with_bus(1, 220.0, 1.0)
            .with_bus(2, 220.0, 1.0);
        let mut store = SnapshotStore::capture_base(&session).unwrap();
        session.network.set_voltage(2, 1.0 - delta);
        store.capture_switching(&session, "C").unwrap();
        store.record_step_voltages(&session, "C").unwrap();
        store
    }

    #[test]
    fn step_limit_is_inclusive() {
        let names = vec!["C".to_string()];
        assert!(check_step(&store_with_step(0.10), &names, 0.10)[0].1);
        assert!(!check_step(&store_with_step(0.1001), &names, 0.10)[0].1);
        assert!(check_step(&store_with_step(0.03), &names, 0.03)[0].1);
        assert!(!check_step(&store_with_step(0.031), &names, 0.03)[0].1);
    }

    #[test]
    fn sentinel_columns_fail_and_base_passes() {
        let session = ScriptedSession::new().with_bus(1, 220.0, 1.0);
        let mut store = SnapshotStore::capture_base(&session).unwrap();
        store.capture_switching(&session, "C").unwrap();
        store.record_step_sentinel("C").unwrap();
        store.record_steady_sentinel("C").unwrap();

        let names = vec![BASE_CASE.to_string(), "C".to_string()];
        let step = check_step(&store, &names, 0.1);
        assert_eq!(step, vec![(BASE_CASE.to_string(), true), ("C".to_string(), false)]);
        let steady = check_steady_voltage(&store, &names, &VoltageBands::default());
        assert_eq!(steady[1], ("C".to_string(), false));
    }

    #[test]
    fn steady_voltage_skips_isolated_buses() {
        let mut session = ScriptedSession::new()
            .with_bus(1, 220.0, 1.0)
            .with_bus(2, 220.0, 1.0);
        let mut store = SnapshotStore::capture_base(&session).unwrap();
        session.network.set_voltage(2, 0.0);
        store.capture_switching(&session, "C").unwrap();
        store.mark_isolated("C", &[BusNumber::new(2)]).unwrap();
        store.record_steady_state(&session, "C").unwrap();

        let verdicts = check_steady_voltage(&store, &["C".to_string()], &VoltageBands::default());
        assert!(verdicts[0].1);
    }

    #[test]
    fn loading_ignores_unrated_elements() {
        let rated = BranchKey::new(1, 2, "1");
        let unrated = BranchKey::new(1, 2, "2");
        let mut session = ScriptedSession::new()
            .with_bus(1, 220.0, 1.0)
            .with_bus(2, 220.0, 1.0)
            .with_circuit(rated.clone(), 100.0, 50.0)
            .with_circuit(unrated.clone(), 0.0, 500.0);
        let mut store = SnapshotStore::capture_base(&session).unwrap();
        session.network.set_loading(&unrated, 900.0);
        store.capture_switching(&session, "OK").unwrap();
        store.record_steady_state(&session, "OK").unwrap();
        session.network.set_loading(&rated, 100.0);
        store.capture_switching(&session, "OVER").unwrap();
        store.record_steady_state(&session, "OVER").unwrap();

        let mut diagnostics = Diagnostics::new();
        let verdicts = check_loading(
            store.circuit_loading(),
            store.circuit_ratings(),
            &["OK".to_string(), "OVER".to_string()],
            &ComplianceThresholds::default(),
            "Circuit",
            &mut diagnostics,
        );
        assert_eq!(
            verdicts,
            vec![("OK".to_string(), true), ("OVER".to_string(), false)]
        );
        assert_eq!(diagnostics.warning_count(), 1);
    }
}
