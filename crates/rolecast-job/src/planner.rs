//! Role planner: job descriptor and overrides into per-role plans

use std::collections::BTreeMap;

use tracing::debug;

use rolecast_common::conf::{
    ENV_JOB_ID, ENV_JOB_NAME, ENV_JOB_NAMESPACE, ENV_JOB_QUEUE_NAME, ENV_JOB_ROLE,
};
use rolecast_common::{
    Error, FlavourResolver, JobDescriptor, Result, RoleKind, RoleOverride, RolePlan,
};

use crate::topology::{RoleDescriptor, Topology};

/// Plan every role of a job.
///
/// Plans come back in topology order. Optional roles with zero replicas are
/// omitted; required roles with zero replicas fail the whole job.
pub fn plan<R>(
    job: &JobDescriptor,
    overrides: &[RoleOverride],
    resolver: &R,
) -> Result<Vec<RolePlan>>
where
    R: FlavourResolver + ?Sized,
{
    job.validate()?;
    let topology = Topology::lookup(job.job_type, job.job_mode)?;
    let overrides = index_overrides(topology, overrides)?;

    let mut plans = Vec::with_capacity(topology.roles.len());
    for role in topology.roles {
        let role_override = overrides.get(&role.kind).copied();
        if let Some(plan) = plan_role(job, topology, role, role_override, resolver)? {
            plans.push(plan);
        }
    }
    Ok(plans)
}

/// Overrides keyed by role, dropping roles the topology does not have
fn index_overrides<'a>(
    topology: &Topology,
    overrides: &'a [RoleOverride],
) -> Result<BTreeMap<RoleKind, &'a RoleOverride>> {
    let mut indexed = BTreeMap::new();
    for o in overrides {
        if topology.role(o.role).is_none() {
            debug!(
                role = %o.role,
                job_mode = %topology.job_mode,
                "ignoring override for role outside the topology"
            );
            continue;
        }
        if indexed.insert(o.role, o).is_some() {
            return Err(Error::validation_for_field(
                "overrides",
                format!("role {} is overridden more than once", o.role),
            ));
        }
    }
    Ok(indexed)
}

fn plan_role<R>(
    job: &JobDescriptor,
    topology: &Topology,
    role: &RoleDescriptor,
    role_override: Option<&RoleOverride>,
    resolver: &R,
) -> Result<Option<RolePlan>>
where
    R: FlavourResolver + ?Sized,
{
    let replicas = role_override
        .and_then(|o| o.replicas)
        .unwrap_or(role.default_replicas);

    if replicas == 0 {
        if role.optional {
            debug!(role = %role.kind, "optional role has no replicas, omitting");
            return Ok(None);
        }
        return Err(Error::invalid_topology(
            topology.job_mode.as_str(),
            role.kind.as_str(),
            format!("{} requires at least one {} replica", topology.job_mode, role.kind),
        ));
    }
    if let Some(max) = role.max_replicas.filter(|max| replicas > *max) {
        return Err(Error::invalid_topology(
            topology.job_mode.as_str(),
            role.kind.as_str(),
            format!("{} runs at most {} {} replica(s), got {}", topology.kind, max, role.kind, replicas),
        ));
    }

    let flavour_name = role_override
        .and_then(|o| o.flavour.as_deref())
        .or(job.flavour.as_deref())
        .ok_or_else(|| {
            Error::invalid_resource(
                rolecast_common::error::UNKNOWN_CONTEXT,
                role.kind.as_str(),
                "no flavour set for the role and no job default",
            )
        })?;
    let flavour = resolver
        .resolve(flavour_name)
        .map_err(|e| e.for_role(role.kind.as_str()))?;

    let command = role_override
        .and_then(|o| o.command.clone())
        .unwrap_or_else(|| job.command.clone());

    let mut env = identity_env(job, role.kind);
    env.extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    if let Some(o) = role_override {
        env.extend(o.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    debug!(
        role = %role.kind,
        replicas,
        flavour = %flavour.name,
        "planned role"
    );

    Ok(Some(RolePlan {
        kind: role.kind,
        replicas,
        flavour: flavour.name,
        resources: flavour.resources,
        command,
        image: job.image.clone(),
        env,
        storage: job.storage.clone(),
        restart_policy: job.restart_policy,
    }))
}

/// Job identity variables every role container sees; user keys override them
fn identity_env(job: &JobDescriptor, role: RoleKind) -> BTreeMap<String, String> {
    let mut env = BTreeMap::from([
        (ENV_JOB_ID.to_string(), job.id.clone()),
        (ENV_JOB_NAME.to_string(), job.name.clone()),
        (ENV_JOB_NAMESPACE.to_string(), job.namespace.clone()),
        (ENV_JOB_ROLE.to_string(), role.as_str().to_string()),
    ]);
    if let Some(ref queue) = job.queue {
        env.insert(ENV_JOB_QUEUE_NAME.to_string(), queue.clone());
    }
    env
}
