//! Compiles rolecast job descriptors into distributed training job resources
//!
//! The pipeline runs in one direction:
//! - `planner::plan` resolves each role of the job's topology into a `RolePlan`
//! - `rolecast_volcano::aggregate` sums plans into the gang-scheduling declaration
//! - `SpecCompiler` patches plans and declaration into a freshly loaded template
//!
//! `compile_job` runs all three against a flavour resolver and template loader.

pub mod compiler;
pub mod planner;
pub mod template;
pub mod topology;

use tracing::info;

use rolecast_common::{
    CompilerConfig, FlavourResolver, JobDescriptor, Result, RoleOverride, RolePlan,
};
use rolecast_volcano::SchedulingDeclaration;

pub use compiler::{CompiledSpec, SpecCompiler};
pub use template::{
    BuiltinTemplateLoader, CachedTemplateLoader, FsTemplateLoader, TemplateDocument,
    TemplateLoader, TemplateRequest,
};
pub use topology::{RoleDescriptor, Topology};

/// Everything compiled for one job
#[derive(Clone, Debug)]
pub struct CompiledJob {
    /// The patched framework resource
    pub spec: CompiledSpec,
    /// Role plans, in topology order
    pub plans: Vec<RolePlan>,
    /// Gang-scheduling declaration embedded in `spec`
    pub declaration: SchedulingDeclaration,
}

/// Compile a job into its framework resource.
///
/// Pure compilation: nothing is submitted. The template is loaded once per
/// call and never shared with another compilation.
pub fn compile_job<R, L>(
    job: &JobDescriptor,
    overrides: &[RoleOverride],
    resolver: &R,
    loader: &L,
    config: &CompilerConfig,
) -> Result<CompiledJob>
where
    R: FlavourResolver + ?Sized,
    L: TemplateLoader + ?Sized,
{
    let plans = planner::plan(job, overrides, resolver)?;
    let declaration = rolecast_volcano::aggregate(&job.id, &plans)?;
    let template = loader.load(&TemplateRequest::for_job(job))?;
    let spec = SpecCompiler::new(config).compile(template, &plans, &declaration, &job.identity())?;

    info!(
        job = %job.id,
        job_type = %job.job_type,
        job_mode = %job.job_mode,
        roles = plans.len(),
        min_available = declaration.min_available,
        "compiled job"
    );

    Ok(CompiledJob {
        spec,
        plans,
        declaration,
    })
}
