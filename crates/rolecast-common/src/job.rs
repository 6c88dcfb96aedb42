//! Job descriptor types
//!
//! `JobDescriptor` is the framework-agnostic description of a distributed
//! training job. `RoleOverride` adjusts one role of it. Both are produced by an
//! outer configuration layer (see [`crate::conf`]) and consumed by the planner.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, DEFAULT_NAMESPACE};

// =============================================================================
// Job Type
// =============================================================================

/// Training framework the job targets
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// PaddlePaddle operator (`PaddleJob`)
    #[default]
    Paddle,
    /// Kubeflow training operator (`TFJob`)
    TensorFlow,
    /// Kubeflow training operator (`PyTorchJob`)
    PyTorch,
}

impl JobType {
    /// Get the string representation of this job type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paddle => "paddle",
            Self::TensorFlow => "tensorflow",
            Self::PyTorch => "pytorch",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "paddle" | "paddlejob" => Ok(Self::Paddle),
            "tensorflow" | "tf" | "tfjob" => Ok(Self::TensorFlow),
            "pytorch" | "pytorchjob" => Ok(Self::PyTorch),
            _ => Err(Error::validation(format!("unknown job type '{}'", s))),
        }
    }
}

// =============================================================================
// Job Mode
// =============================================================================

/// Distributed topology of the job
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum JobMode {
    /// Parameter servers plus workers
    #[serde(rename = "PS")]
    Ps,
    /// Workers only, all-reduce communication
    #[default]
    Collective,
}

impl JobMode {
    /// Get the string representation of this job mode
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ps => "PS",
            Self::Collective => "Collective",
        }
    }
}

impl std::fmt::Display for JobMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ps" => Ok(Self::Ps),
            "collective" => Ok(Self::Collective),
            _ => Err(Error::validation(format!("unknown job mode '{}'", s))),
        }
    }
}

// =============================================================================
// Role Kind
// =============================================================================

/// Logical role within a distributed job
///
/// Frameworks name the sections differently (`ps`, `PS`, `Master`); the
/// topology table maps each kind to its framework section. A master
/// coordinates a collective job and is never a parameter server.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    /// Parameter server
    PServer,
    /// Rank-zero coordinator of a collective job
    Master,
    /// Training worker
    Worker,
}

impl RoleKind {
    /// Get the string representation of this role kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PServer => "pserver",
            Self::Master => "master",
            Self::Worker => "worker",
        }
    }
}

impl std::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Priority
// =============================================================================

/// Job priority, mapped onto a Kubernetes PriorityClass
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    /// Lowest priority
    VeryLow,
    /// Below normal
    Low,
    /// Default priority
    #[default]
    Normal,
    /// Above normal
    High,
    /// Highest priority
    VeryHigh,
}

impl Priority {
    /// Name of the PriorityClass this priority maps to
    pub fn priority_class_name(&self) -> &'static str {
        match self {
            Self::VeryLow => "very-low",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::VeryHigh => "very-high",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.priority_class_name())
    }
}

impl std::str::FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "very-low" => Ok(Self::VeryLow),
            "low" => Ok(Self::Low),
            "normal" | "" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "very-high" => Ok(Self::VeryHigh),
            _ => Err(Error::validation(format!("unknown priority '{}'", s))),
        }
    }
}

// =============================================================================
// RestartPolicy
// =============================================================================

/// Pod restart policy for job roles (the job's fault-tolerance mode)
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never restart on failure
    #[default]
    Never,
    /// Restart on failure
    OnFailure,
    /// Always restart
    Always,
}

impl RestartPolicy {
    /// Get the string representation used in pod specs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "Never",
            Self::OnFailure => "OnFailure",
            Self::Always => "Always",
        }
    }
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RestartPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "onfailure" | "on-failure" => Ok(Self::OnFailure),
            "always" => Ok(Self::Always),
            _ => Err(Error::validation(format!("unknown restart policy '{}'", s))),
        }
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Shared storage volume mounted into every role container
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageBinding {
    /// Volume identifier; also the pod volume and mount name
    pub volume_name: String,
    /// PersistentVolumeClaim backing the volume
    pub claim_name: String,
}

// =============================================================================
// Descriptor
// =============================================================================

/// Framework-agnostic description of one distributed training job
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    /// Unique job id; becomes the compiled resource name
    pub id: String,

    /// Human-readable job name
    pub name: String,

    /// Target namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Training framework
    #[serde(default)]
    pub job_type: JobType,

    /// Distributed topology
    #[serde(default)]
    pub job_mode: JobMode,

    /// Default command for every role
    #[serde(default)]
    pub command: String,

    /// Container image for every role
    pub image: String,

    /// Environment shared by every role
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Flavour used by roles without their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavour: Option<String>,

    /// Volcano queue name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,

    /// Job priority
    #[serde(default)]
    pub priority: Priority,

    /// Shared storage volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageBinding>,

    /// Pod restart policy for every role
    #[serde(default)]
    pub restart_policy: RestartPolicy,

    /// Template path on the storage volume; built-in template when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<String>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl JobDescriptor {
    /// Create a descriptor with the required fields and defaults for the rest
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            namespace: default_namespace(),
            image: image.into(),
            ..Default::default()
        }
    }

    /// Validate identity fields
    ///
    /// Mode/type compatibility is checked by the planner's topology lookup.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::validation_for_field("id", "job id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(Error::validation_for_field(
                "name",
                format!("job {} has an empty name", self.id),
            ));
        }
        if self.namespace.trim().is_empty() {
            return Err(Error::validation_for_field(
                "namespace",
                format!("job {} has an empty namespace", self.id),
            ));
        }
        if let Some(ref storage) = self.storage {
            if storage.volume_name.is_empty() || storage.claim_name.is_empty() {
                return Err(Error::validation_for_field(
                    "storage",
                    format!("job {} storage needs both a volume and a claim name", self.id),
                ));
            }
        }
        Ok(())
    }

    /// Identity and scheduling fields the compiler writes into the template
    pub fn identity(&self) -> JobIdentity {
        JobIdentity {
            id: self.id.clone(),
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            job_type: self.job_type,
            job_mode: self.job_mode,
            queue: self.queue.clone(),
            priority: self.priority,
        }
    }
}

/// Identity of the job being compiled
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobIdentity {
    /// Unique job id
    pub id: String,
    /// Human-readable job name
    pub name: String,
    /// Target namespace
    pub namespace: String,
    /// Training framework
    pub job_type: JobType,
    /// Distributed topology
    pub job_mode: JobMode,
    /// Volcano queue name
    pub queue: Option<String>,
    /// Job priority
    pub priority: Priority,
}

// =============================================================================
// Role Override
// =============================================================================

/// Per-role adjustments to the descriptor defaults
///
/// Unset fields inherit from the `JobDescriptor`. A replica count of zero
/// drops the role from the compiled job.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleOverride {
    /// Role being adjusted
    pub role: RoleKind,

    /// Command replacing the job default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Flavour replacing the job default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavour: Option<String>,

    /// Replica count replacing the topology default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,

    /// Environment merged over the job environment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl RoleOverride {
    /// Create an override that changes nothing
    pub fn new(role: RoleKind) -> Self {
        Self {
            role,
            command: None,
            flavour: None,
            replicas: None,
            env: BTreeMap::new(),
        }
    }

    /// Set the replica count
    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = Some(replicas);
        self
    }

    /// Set the flavour
    pub fn with_flavour(mut self, flavour: impl Into<String>) -> Self {
        self.flavour = Some(flavour.into());
        self
    }

    /// Set the command
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}
