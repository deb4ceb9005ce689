//! Contingency definitions: which elements a contingency switches.

use crate::snapshot::{SnapshotStore, BASE_CASE};
use crate::session::ElementAction;
use gridcheck_core::{
    BranchKey, BusNumber, BusType, ElementKey, ElementStatus, GridError, GridResult, ShuntKey,
    Tx3Key,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use tracing::warn;

/// An element and the status it is switched to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Switch<K> {
    #[serde(flatten)]
    pub element: K,
    #[serde(deserialize_with = "status_from_code_or_name")]
    pub status: ElementStatus,
}

impl<K> Switch<K> {
    pub fn new(element: K, status: ElementStatus) -> Self {
        Self { element, status }
    }

    pub fn out_of_service(element: K) -> Self {
        Self::new(element, ElementStatus::OutOfService)
    }
}

/// Busbar switching: the bus is given a new type code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusbarSwitch {
    pub bus: BusNumber,
    #[serde(deserialize_with = "bus_type_from_code_or_name")]
    pub state: BusType,
}

/// Status columns are written as `0`/`1` in most inputs.
pub fn status_from_code_or_name<'de, D>(deserializer: D) -> Result<ElementStatus, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Code(i64),
        Name(ElementStatus),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Name(status) => Ok(status),
        Raw::Code(code) => i32::try_from(code)
            .ok()
            .and_then(ElementStatus::from_code)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid status code {code}"))),
    }
}

pub fn bus_type_from_code_or_name<'de, D>(deserializer: D) -> Result<BusType, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Code(i64),
        Name(BusType),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Name(bus_type) => Ok(bus_type),
        Raw::Code(code) => i32::try_from(code)
            .ok()
            .and_then(BusType::from_code)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid bus type code {code}"))),
    }
}

/// Which step-change limit applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContingencyKind {
    /// Switches at least one circuit, transformer or busbar.
    CircuitSwitching,
    /// Switches only shunts, or nothing at all.
    VoltageControl,
}

impl fmt::Display for ContingencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContingencyKind::CircuitSwitching => f.write_str("circuit-switching"),
            ContingencyKind::VoltageControl => f.write_str("voltage-control"),
        }
    }
}

/// One named contingency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContingencyDefinition {
    pub name: String,
    #[serde(default)]
    pub circuits: Vec<Switch<BranchKey>>,
    #[serde(default)]
    pub two_winding: Vec<Switch<BranchKey>>,
    #[serde(default)]
    pub three_winding: Vec<Switch<Tx3Key>>,
    #[serde(default)]
    pub busbars: Vec<BusbarSwitch>,
    #[serde(default)]
    pub fixed_shunts: Vec<Switch<ShuntKey>>,
    #[serde(default)]
    pub switched_shunts: Vec<Switch<ShuntKey>>,
    /// Buses the compensation search ignores for this contingency.
    #[serde(default)]
    pub excluded_buses: BTreeSet<BusNumber>,
}

impl ContingencyDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_circuit(mut self, key: BranchKey, status: ElementStatus) -> Self {
        self.circuits.push(Switch::new(key, status));
        self
    }

    pub fn with_two_winding(mut self, key: BranchKey, status: ElementStatus) -> Self {
        self.two_winding.push(Switch::new(key, status));
        self
    }

    pub fn with_three_winding(mut self, key: Tx3Key, status: ElementStatus) -> Self {
        self.three_winding.push(Switch::new(key, status));
        self
    }

    pub fn with_busbar(mut self, bus: u32, state: BusType) -> Self {
        self.busbars.push(BusbarSwitch {
            bus: BusNumber::new(bus),
            state,
        });
        self
    }

    pub fn with_fixed_shunt(mut self, key: ShuntKey, status: ElementStatus) -> Self {
        self.fixed_shunts.push(Switch::new(key, status));
        self
    }

    pub fn with_switched_shunt(mut self, key: ShuntKey, status: ElementStatus) -> Self {
        self.switched_shunts.push(Switch::new(key, status));
        self
    }

    pub fn excluding(mut self, bus: u32) -> Self {
        self.excluded_buses.insert(BusNumber::new(bus));
        self
    }

    pub fn kind(&self) -> ContingencyKind {
        if self.circuits.is_empty()
            && self.two_winding.is_empty()
            && self.three_winding.is_empty()
            && self.busbars.is_empty()
        {
            ContingencyKind::VoltageControl
        } else {
            ContingencyKind::CircuitSwitching
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions().is_empty()
    }

    /// Switching actions in application order: circuits, two-winding,
    /// three-winding, busbars, fixed shunts, switched shunts.
    pub fn actions(&self) -> Vec<(ElementKey, ElementAction)> {
        let mut actions = Vec::new();
        actions.extend(self.circuits.iter().map(|s| {
            (
                ElementKey::Circuit(s.element.clone()),
                ElementAction::Status(s.status),
            )
        }));
        actions.extend(self.two_winding.iter().map(|s| {
            (
                ElementKey::TwoWinding(s.element.clone()),
                ElementAction::Status(s.status),
            )
        }));
        actions.extend(self.three_winding.iter().map(|s| {
            (
                ElementKey::ThreeWinding(s.element.clone()),
                ElementAction::Status(s.status),
            )
        }));
        actions.extend(
            self.busbars
                .iter()
                .map(|b| (ElementKey::Bus(b.bus), ElementAction::BusType(b.state))),
        );
        actions.extend(self.fixed_shunts.iter().map(|s| {
            (
                ElementKey::FixedShunt(s.element.clone()),
                ElementAction::Status(s.status),
            )
        }));
        actions.extend(self.switched_shunts.iter().map(|s| {
            (
                ElementKey::SwitchedShunt(s.element.clone()),
                ElementAction::Status(s.status),
            )
        }));
        actions
    }

    /// Switching targets with no row in the monitored tables. They will fail
    /// when the contingency is applied.
    pub fn unknown_elements(&self, store: &SnapshotStore) -> Vec<ElementKey> {
        let buses: HashSet<BusNumber> = store.buses().iter().map(|b| b.number).collect();
        let known_branch = |keys: &[BranchKey], key: &BranchKey| {
            keys.iter().any(|k| k.same_element(key))
        };

        self.actions()
            .into_iter()
            .map(|(element, _)| element)
            .filter(|element| match element {
                ElementKey::Bus(bus) => !buses.contains(bus),
                ElementKey::Circuit(key) => !known_branch(store.circuit_status().keys(), key),
                ElementKey::TwoWinding(key) => !known_branch(store.tx2_status().keys(), key),
                ElementKey::ThreeWinding(key) => !store.tx3_status().keys().contains(key),
                ElementKey::FixedShunt(key) => !store.fixed_shunt_status().keys().contains(key),
                ElementKey::SwitchedShunt(key) => {
                    !store.switched_shunt_status().keys().contains(key)
                }
                ElementKey::Machine(key) => !store.machine_status().contains_key(key),
            })
            .collect()
    }
}

/// Validated, ordered list of contingencies.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContingencySet {
    contingencies: Vec<ContingencyDefinition>,
}

impl ContingencySet {
    /// Rejects an empty list, duplicate names and the reserved base-case name.
    pub fn new(contingencies: Vec<ContingencyDefinition>) -> GridResult<Self> {
        if contingencies.is_empty() {
            return Err(GridError::Config("no contingencies defined".into()));
        }
        let mut seen = HashSet::new();
        for contingency in &contingencies {
            let name = contingency.name.as_str();
            if name.trim().is_empty() {
                return Err(GridError::Config("contingency with an empty name".into()));
            }
            if name == BASE_CASE {
                return Err(GridError::Config(format!(
                    "'{BASE_CASE}' is reserved and cannot name a contingency"
                )));
            }
            if !seen.insert(name) {
                return Err(GridError::Config(format!(
                    "duplicate contingency name '{name}'"
                )));
            }
        }
        Ok(Self { contingencies })
    }

    /// Merge per-contingency bus exclusions. Returns the names that match no
    /// contingency.
    pub fn apply_exclusions(&mut self, exclusions: &HashMap<String, BTreeSet<BusNumber>>) -> Vec<String> {
        let mut unknown = Vec::new();
        for (name, buses) in exclusions {
            match self.contingencies.iter_mut().find(|c| &c.name == name) {
                Some(contingency) => contingency.excluded_buses.extend(buses.iter().copied()),
                None => {
                    warn!(contingency = %name, "bus exclusions reference an unknown contingency");
                    unknown.push(name.clone());
                }
            }
        }
        unknown.sort();
        unknown
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContingencyDefinition> {
        self.contingencies.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ContingencyDefinition> {
        self.contingencies.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.contingencies.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.contingencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contingencies.is_empty()
    }
}

impl<'a> IntoIterator for &'a ContingencySet {
    type Item = &'a ContingencyDefinition;
    type IntoIter = std::slice::Iter<'a, ContingencyDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.contingencies.iter()
    }
}
