//! Gang-scheduling aggregation over role plans
//!
//! The declaration is advisory: Volcano consults it when admitting the job's
//! PodGroup. Nothing here enforces admission.

use rolecast_common::{Error, ResourceList, Result, RolePlan};
use tracing::debug;

/// What the gang scheduler must see before any pod of the job starts
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulingDeclaration {
    /// Pods that must be schedulable together: the sum of all replicas
    pub min_available: u32,
    /// Aggregate resources across every replica of every role
    pub min_resources: ResourceList,
}

/// Compute the scheduling declaration for a job's role plans.
///
/// `job` is only used for error context.
pub fn aggregate(job: &str, plans: &[RolePlan]) -> Result<SchedulingDeclaration> {
    if plans.is_empty() {
        return Err(Error::empty_topology(job));
    }

    let mut min_available: u32 = 0;
    let mut min_resources = ResourceList::new();

    for plan in plans {
        min_available = min_available.checked_add(plan.replicas).ok_or_else(|| {
            Error::invalid_resource(
                &plan.flavour,
                plan.kind.as_str(),
                "total replica count overflows",
            )
        })?;

        let role_total = plan
            .total_resources()
            .map_err(|e| Error::invalid_resource(&plan.flavour, plan.kind.as_str(), e))?;
        min_resources
            .checked_accumulate(&role_total)
            .map_err(|e| Error::invalid_resource(&plan.flavour, plan.kind.as_str(), e))?;
    }

    debug!(
        job = %job,
        min_available,
        resources = min_resources.len(),
        "aggregated scheduling declaration"
    );

    Ok(SchedulingDeclaration {
        min_available,
        min_resources,
    })
}
