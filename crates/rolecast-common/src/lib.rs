//! Common types for Rolecast: job descriptors, role plans, resource quantities,
//! flavours, configuration and errors

#![deny(missing_docs)]

pub mod conf;
pub mod config;
pub mod error;
pub mod flavour;
pub mod job;
pub mod plan;
pub mod resources;
pub mod yaml;

pub use config::CompilerConfig;
pub use error::Error;
pub use flavour::{Flavour, FlavourCatalog, FlavourResolver};
pub use job::{
    JobDescriptor, JobIdentity, JobMode, JobType, Priority, RestartPolicy, RoleKind,
    RoleOverride, StorageBinding,
};
pub use plan::RolePlan;
pub use resources::ResourceList;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default namespace for jobs that do not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default Volcano scheduler name written into every pod template
pub const DEFAULT_SCHEDULER_NAME: &str = "volcano";

/// Prefix for labels and annotations owned by rolecast
pub const LABEL_PREFIX: &str = "rolecast.io";
