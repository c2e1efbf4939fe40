//! Deployable units and the dependency graph between them.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where one constructor argument comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "value", rename_all = "camelCase")]
pub enum ArgSource {
    /// Address of another unit. This is a dependency edge.
    Unit(String),
    /// Address supplied by the environment.
    Param(String),
}

/// A named deployable unit and how to construct it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitSpec {
    pub name: String,
    /// Contract the unit is deployed with; distinct from `name`.
    pub contract_kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ArgSource>,
}

impl UnitSpec {
    pub fn new(name: impl Into<String>, contract_kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contract_kind: contract_kind.into(),
            args: Vec::new(),
        }
    }

    pub fn unit_arg(mut self, unit: impl Into<String>) -> Self {
        self.args.push(ArgSource::Unit(unit.into()));
        self
    }

    pub fn param_arg(mut self, key: impl Into<String>) -> Self {
        self.args.push(ArgSource::Param(key.into()));
        self
    }

    /// Units whose addresses this unit's constructor needs.
    pub fn needs(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(|arg| match arg {
            ArgSource::Unit(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

/// `from` cannot be constructed before `to` has an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
}

pub fn edges(units: &[UnitSpec]) -> Vec<DependencyEdge> {
    units
        .iter()
        .flat_map(|unit| {
            unit.needs().map(move |need| DependencyEdge {
                from: unit.name.clone(),
                to: need.to_string(),
            })
        })
        .collect()
}

/// Topologically sort units so every dependency precedes its dependents.
///
/// Units with no ordering constraint between them keep their input order.
pub fn order_units(units: &[UnitSpec]) -> Result<Vec<UnitSpec>> {
    let mut id_index = HashMap::new();
    for (idx, unit) in units.iter().enumerate() {
        if id_index.contains_key(unit.name.as_str()) {
            return Err(Error::invalid_graph(
                format!("Duplicate unit name '{}'", unit.name),
                Some(vec![unit.name.clone()]),
            ));
        }
        id_index.insert(unit.name.as_str(), idx);
    }

    let mut indegree = vec![0usize; units.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); units.len()];

    for (idx, unit) in units.iter().enumerate() {
        for need in unit.needs() {
            if let Some(&parent_idx) = id_index.get(need) {
                indegree[idx] += 1;
                dependents[parent_idx].push(idx);
            } else {
                return Err(Error::invalid_graph(
                    format!("Unit '{}' depends on unknown unit '{}'", unit.name, need),
                    Some(vec![unit.name.clone(), need.to_string()]),
                ));
            }
        }
    }

    let mut queue = VecDeque::new();
    for (idx, count) in indegree.iter().enumerate() {
        if *count == 0 {
            queue.push_back(idx);
        }
    }

    let mut ordered = Vec::with_capacity(units.len());
    while let Some(idx) = queue.pop_front() {
        ordered.push(units[idx].clone());
        for &child in &dependents[idx] {
            if indegree[child] > 0 {
                indegree[child] -= 1;
            }
            if indegree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if ordered.len() != units.len() {
        let pending: Vec<String> = units
            .iter()
            .enumerate()
            .filter(|(idx, _)| indegree[*idx] > 0)
            .map(|(_, unit)| unit.name.clone())
            .collect();
        return Err(Error::invalid_graph("Units contain a dependency cycle", Some(pending)));
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn position(order: &[UnitSpec], name: &str) -> usize {
        order.iter().position(|u| u.name == name).unwrap()
    }

    #[test]
    fn dependencies_come_first() {
        let units = vec![
            UnitSpec::new("Beacon", "UpgradeableBeacon").unit_arg("Impl"),
            UnitSpec::new("Impl", "Logic"),
        ];
        let order = order_units(&units).unwrap();
        assert!(position(&order, "Impl") < position(&order, "Beacon"));
    }

    #[test]
    fn independent_units_keep_input_order() {
        let units = vec![UnitSpec::new("B", "K"), UnitSpec::new("A", "K")];
        let order = order_units(&units).unwrap();
        assert_eq!(order[0].name, "B");
        assert_eq!(order[1].name, "A");
    }

    #[test]
    fn cycle_is_rejected_with_members() {
        let units = vec![
            UnitSpec::new("A", "K").unit_arg("B"),
            UnitSpec::new("B", "K").unit_arg("A"),
            UnitSpec::new("C", "K"),
        ];
        let err = order_units(&units).unwrap_err();
        assert_eq!(err.code, ErrorCode::PlanInvalidGraph);
        let members = err.details["units"].as_array().unwrap();
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let units = vec![UnitSpec::new("A", "K").unit_arg("Missing")];
        let err = order_units(&units).unwrap_err();
        assert_eq!(err.code, ErrorCode::PlanInvalidGraph);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let units = vec![UnitSpec::new("A", "K"), UnitSpec::new("A", "Other")];
        assert!(order_units(&units).is_err());
    }

    #[test]
    fn edges_only_follow_unit_args() {
        let units = vec![UnitSpec::new("F", "Factory")
            .param_arg("GNOSIS_SAFE_TEMPLATE")
            .unit_arg("R")];
        assert_eq!(
            edges(&units),
            vec![DependencyEdge {
                from: "F".to_string(),
                to: "R".to_string()
            }]
        );
    }
}
