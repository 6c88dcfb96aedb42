//! Resolved per-role plans

use std::collections::BTreeMap;

use crate::job::{RestartPolicy, RoleKind, StorageBinding};
use crate::resources::ResourceList;

/// Concrete values for one role of a job
///
/// Produced by the planner for a single compilation and never shared across
/// jobs. `replicas` is always greater than zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RolePlan {
    /// Role kind
    pub kind: RoleKind,
    /// Number of replicas (> 0)
    pub replicas: u32,
    /// Flavour the resources were resolved from
    pub flavour: String,
    /// Per-replica resources
    pub resources: ResourceList,
    /// Shell command for the role's main container
    pub command: String,
    /// Container image
    pub image: String,
    /// Environment, keys unique
    pub env: BTreeMap<String, String>,
    /// Shared storage volume
    pub storage: Option<StorageBinding>,
    /// Pod restart policy
    pub restart_policy: RestartPolicy,
}

impl RolePlan {
    /// Resources for all replicas of this role, or the resource that overflowed
    pub fn total_resources(&self) -> Result<ResourceList, String> {
        self.resources.checked_scale(u64::from(self.replicas))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{CPU, MEMORY};

    #[test]
    fn total_resources_scale_by_replicas() {
        let plan = RolePlan {
            kind: RoleKind::Worker,
            replicas: 3,
            flavour: "cpu".to_string(),
            resources: ResourceList::new().with(CPU, 1500).with(MEMORY, 1 << 30),
            command: "python train.py".to_string(),
            image: "paddle:2.4".to_string(),
            env: BTreeMap::new(),
            storage: None,
            restart_policy: RestartPolicy::Never,
        };
        let total = plan.total_resources().unwrap();
        assert_eq!(total.get(CPU), Some(4500));
        assert_eq!(total.get(MEMORY), Some(3 << 30));
    }
}
