//! Placement constraints.
//!
//! A constraint restricts which node a request may land on. The only
//! kind today is anti-affinity: the target node must NOT already carry
//! a given label. Constraints combine with AND semantics within one
//! request. Placement groups are built on top: each bundle of a group
//! carries an anti-affinity constraint keyed by the reserved `_PG`
//! label and the group id, so two bundles of the same group never
//! co-locate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::PLACEMENT_GROUP_LABEL;

/// A placement constraint on a resource request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlacementConstraint {
    AntiAffinity(AntiAffinityConstraint),
}

/// The target node must not already carry `label_name=label_value`.
///
/// When `create_label_on_schedule` is set, satisfying the constraint
/// also writes the label onto the node's label set at schedule time,
/// atomically with allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntiAffinityConstraint {
    pub label_name: String,
    pub label_value: String,
    #[serde(default)]
    pub create_label_on_schedule: bool,
}

impl PlacementConstraint {
    /// Whether a node carrying `labels` satisfies this constraint.
    pub fn is_satisfied_by(&self, labels: &HashMap<String, String>) -> bool {
        match self {
            PlacementConstraint::AntiAffinity(anti) => {
                labels.get(&anti.label_name) != Some(&anti.label_value)
            }
        }
    }

    /// Apply the schedule-time side effect of this constraint to a
    /// node's label set. Part of the same atomic allocation transaction
    /// as the placement decision itself.
    pub fn apply_on_schedule(&self, labels: &mut HashMap<String, String>) {
        match self {
            PlacementConstraint::AntiAffinity(anti) => {
                if anti.create_label_on_schedule {
                    labels.insert(anti.label_name.clone(), anti.label_value.clone());
                }
            }
        }
    }
}

/// Build the anti-affinity constraint tying one placement group's
/// bundles together.
pub fn placement_group_constraint(group_id: &str) -> PlacementConstraint {
    PlacementConstraint::AntiAffinity(AntiAffinityConstraint {
        label_name: PLACEMENT_GROUP_LABEL.to_string(),
        label_value: group_id.to_string(),
        create_label_on_schedule: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anti_affinity_blocks_matching_label() {
        let c = placement_group_constraint("pg-1");
        let mut labels = HashMap::new();
        assert!(c.is_satisfied_by(&labels));

        labels.insert(PLACEMENT_GROUP_LABEL.to_string(), "pg-1".to_string());
        assert!(!c.is_satisfied_by(&labels));
    }

    #[test]
    fn anti_affinity_ignores_other_values() {
        let c = placement_group_constraint("pg-1");
        let mut labels = HashMap::new();
        labels.insert(PLACEMENT_GROUP_LABEL.to_string(), "pg-2".to_string());
        // A different group's occupancy does not block this one.
        assert!(c.is_satisfied_by(&labels));
    }

    #[test]
    fn apply_on_schedule_writes_label() {
        let c = placement_group_constraint("pg-1");
        let mut labels = HashMap::new();
        c.apply_on_schedule(&mut labels);
        assert_eq!(labels.get(PLACEMENT_GROUP_LABEL).unwrap(), "pg-1");

        // The node now rejects a second bundle of the same group.
        assert!(!c.is_satisfied_by(&labels));
    }

    #[test]
    fn apply_on_schedule_noop_without_flag() {
        let c = PlacementConstraint::AntiAffinity(AntiAffinityConstraint {
            label_name: "zone".to_string(),
            label_value: "a".to_string(),
            create_label_on_schedule: false,
        });
        let mut labels = HashMap::new();
        c.apply_on_schedule(&mut labels);
        assert!(labels.is_empty());
    }
}
