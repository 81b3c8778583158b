//! Dependency-ordered execution plans.
//!
//! Systems run group by group (civilization, inter-civilization, galactic).
//! Inside a group the order is topological on `depends_on`; ties go to the
//! higher priority, then to the lower id.

use crate::error::PlanError;
use crate::models::{ExecutionGroup, Priority, SystemDefinition};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Systems of one execution group, in run order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPhase {
    pub group: ExecutionGroup,
    pub systems: Vec<String>,
}

/// Ordered phases for one tick.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub phases: Vec<ExecutionPhase>,
}

impl ExecutionPlan {
    pub fn build(definitions: &[SystemDefinition]) -> Result<Self, PlanError> {
        let mut by_id: HashMap<&str, &SystemDefinition> = HashMap::new();
        for def in definitions {
            if by_id.insert(def.id.as_str(), def).is_some() {
                return Err(PlanError::DuplicateSystem(def.id.clone()));
            }
        }

        for def in definitions {
            for dep in &def.depends_on {
                let Some(target) = by_id.get(dep.as_str()) else {
                    return Err(PlanError::UnknownDependency {
                        system_id: def.id.clone(),
                        dependency: dep.clone(),
                    });
                };
                if target.execution_group > def.execution_group {
                    return Err(PlanError::ForwardDependency {
                        system_id: def.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut phases = Vec::new();
        for group in ExecutionGroup::ALL {
            let members: Vec<&SystemDefinition> = definitions
                .iter()
                .filter(|d| d.execution_group == group)
                .collect();
            if members.is_empty() {
                continue;
            }
            let systems = order_group(&members)?;
            debug!("Planned {} phase: {}", group, systems.join(" -> "));
            phases.push(ExecutionPhase { group, systems });
        }

        Ok(Self { phases })
    }

    /// All system ids in run order.
    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.phases
            .iter()
            .flat_map(|p| p.systems.iter().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.phases.iter().map(|p| p.systems.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn order_group(members: &[&SystemDefinition]) -> Result<Vec<String>, PlanError> {
    let in_group: BTreeMap<&str, &SystemDefinition> =
        members.iter().map(|d| (d.id.as_str(), *d)).collect();

    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for def in members {
        let local_deps: Vec<&str> = def
            .depends_on
            .iter()
            .map(String::as_str)
            .filter(|dep| in_group.contains_key(dep))
            .collect();
        pending.insert(def.id.as_str(), local_deps.len());
        for dep in local_deps {
            dependents.entry(dep).or_default().push(def.id.as_str());
        }
    }

    let mut ready: BTreeSet<(Reverse<Priority>, &str)> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| (Reverse(in_group[id].priority), *id))
        .collect();

    let mut ordered = Vec::with_capacity(members.len());
    while let Some(next) = ready.pop_first() {
        let id = next.1;
        ordered.push(id.to_string());
        pending.remove(id);

        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert((Reverse(in_group[dependent].priority), *dependent));
                }
            }
        }
    }

    if !pending.is_empty() {
        return Err(PlanError::Cycle {
            systems: pending.keys().map(|id| id.to_string()).collect(),
        });
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn civ(id: &str, priority: Priority) -> SystemDefinition {
        SystemDefinition::new(id, id)
            .tier(1, ExecutionGroup::Civilization)
            .priority(priority)
    }

    #[test]
    fn test_groups_in_order() {
        let defs = vec![
            SystemDefinition::new("trade_routes", "Trade"),
            SystemDefinition::new("diplomacy", "Diplomacy")
                .tier(2, ExecutionGroup::InterCivilization)
                .depends_on(&["population"]),
            civ("population", Priority::High),
        ];

        let plan = ExecutionPlan::build(&defs).unwrap();
        let order: Vec<&str> = plan.order().collect();
        assert_eq!(order, vec!["population", "diplomacy", "trade_routes"]);
        assert_eq!(plan.phases.len(), 3);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_dependencies_then_priority() {
        let defs = vec![
            civ("economy", Priority::Medium),
            civ("population", Priority::High),
            civ("governance", Priority::Critical).depends_on(&["economy"]),
            civ("culture", Priority::Medium),
        ];

        let plan = ExecutionPlan::build(&defs).unwrap();
        let order: Vec<&str> = plan.order().collect();
        assert_eq!(order, vec!["population", "culture", "economy", "governance"]);
    }

    #[test]
    fn test_unknown_dependency() {
        let defs = vec![civ("population", Priority::High).depends_on(&["weather"])];
        assert_eq!(
            ExecutionPlan::build(&defs).unwrap_err(),
            PlanError::UnknownDependency {
                system_id: "population".to_string(),
                dependency: "weather".to_string(),
            }
        );
    }

    #[test]
    fn test_forward_dependency() {
        let defs = vec![
            civ("population", Priority::High).depends_on(&["galaxy"]),
            SystemDefinition::new("galaxy", "Galaxy"),
        ];
        assert!(matches!(
            ExecutionPlan::build(&defs),
            Err(PlanError::ForwardDependency { .. })
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let defs = vec![
            civ("a", Priority::High).depends_on(&["b"]),
            civ("b", Priority::High).depends_on(&["a"]),
            civ("c", Priority::Low),
        ];
        assert_eq!(
            ExecutionPlan::build(&defs).unwrap_err(),
            PlanError::Cycle {
                systems: vec!["a".to_string(), "b".to_string()]
            }
        );
    }

    #[test]
    fn test_duplicate_system() {
        let defs = vec![civ("a", Priority::High), civ("a", Priority::Low)];
        assert_eq!(
            ExecutionPlan::build(&defs).unwrap_err(),
            PlanError::DuplicateSystem("a".to_string())
        );
    }
}
