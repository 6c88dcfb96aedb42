//! Volcano gang-scheduling support for rolecast jobs
//!
//! Aggregates role plans into the minimum replica count and minimum resources a
//! job needs, and renders them as the scheduling policy embedded in the job.
//! Pure computation crate: no template handling.

mod aggregator;
mod types;

pub use aggregator::{aggregate, SchedulingDeclaration};
pub use types::SchedulingPolicy;
