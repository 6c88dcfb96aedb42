//! Key/value job configuration
//!
//! Jobs submitted through the queueing front end arrive as a name, command and
//! image plus a flat map of settings. [`JobConf`] turns those settings into a
//! [`JobDescriptor`] and its [`RoleOverride`]s. All settings are also exported
//! to the job environment so training scripts can read them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::job::{
    JobDescriptor, JobMode, JobType, Priority, RestartPolicy, RoleKind, RoleOverride,
    StorageBinding,
};
use crate::{Error, Result, DEFAULT_NAMESPACE};

/// Framework (`paddle`, `tensorflow`, `pytorch`)
pub const ENV_JOB_TYPE: &str = "ROLECAST_JOB_TYPE";
/// Distributed topology (`PS`, `Collective`)
pub const ENV_JOB_MODE: &str = "ROLECAST_JOB_MODE";
/// Default flavour for every role
pub const ENV_JOB_FLAVOUR: &str = "ROLECAST_JOB_FLAVOUR";
/// Parameter server command
pub const ENV_JOB_PS_COMMAND: &str = "ROLECAST_JOB_PS_COMMAND";
/// Parameter server flavour
pub const ENV_JOB_PS_FLAVOUR: &str = "ROLECAST_JOB_PS_FLAVOUR";
/// Parameter server replica count
pub const ENV_JOB_PS_REPLICAS: &str = "ROLECAST_JOB_PS_REPLICAS";
/// Master command
pub const ENV_JOB_MASTER_COMMAND: &str = "ROLECAST_JOB_MASTER_COMMAND";
/// Master flavour
pub const ENV_JOB_MASTER_FLAVOUR: &str = "ROLECAST_JOB_MASTER_FLAVOUR";
/// Master replica count
pub const ENV_JOB_MASTER_REPLICAS: &str = "ROLECAST_JOB_MASTER_REPLICAS";
/// Worker command
pub const ENV_JOB_WORKER_COMMAND: &str = "ROLECAST_JOB_WORKER_COMMAND";
/// Worker flavour
pub const ENV_JOB_WORKER_FLAVOUR: &str = "ROLECAST_JOB_WORKER_FLAVOUR";
/// Worker replica count
pub const ENV_JOB_WORKER_REPLICAS: &str = "ROLECAST_JOB_WORKER_REPLICAS";
/// Storage volume identifier
pub const ENV_FS_ID: &str = "ROLECAST_FS_ID";
/// PersistentVolumeClaim for the storage volume
pub const ENV_FS_CLAIM: &str = "ROLECAST_FS_CLAIM";
/// Target namespace
pub const ENV_JOB_NAMESPACE: &str = "ROLECAST_JOB_NAMESPACE";
/// Job priority
pub const ENV_JOB_PRIORITY: &str = "ROLECAST_JOB_PRIORITY";
/// Volcano queue
pub const ENV_JOB_QUEUE_NAME: &str = "ROLECAST_JOB_QUEUE_NAME";
/// Template path on the storage volume
pub const ENV_JOB_TEMPLATE_PATH: &str = "ROLECAST_JOB_TEMPLATE_PATH";
/// Pod restart policy
pub const ENV_JOB_RESTART_POLICY: &str = "ROLECAST_JOB_RESTART_POLICY";

/// Job id, injected into every role container
pub const ENV_JOB_ID: &str = "ROLECAST_JOB_ID";
/// Job name, injected into every role container
pub const ENV_JOB_NAME: &str = "ROLECAST_JOB_NAME";
/// Role kind of the container, injected into every role container
pub const ENV_JOB_ROLE: &str = "ROLECAST_JOB_ROLE";

/// Setting keys that configure one role
struct RoleKeys {
    role: RoleKind,
    command: &'static str,
    flavour: &'static str,
    replicas: &'static str,
}

const ROLE_KEYS: &[RoleKeys] = &[
    RoleKeys {
        role: RoleKind::PServer,
        command: ENV_JOB_PS_COMMAND,
        flavour: ENV_JOB_PS_FLAVOUR,
        replicas: ENV_JOB_PS_REPLICAS,
    },
    RoleKeys {
        role: RoleKind::Master,
        command: ENV_JOB_MASTER_COMMAND,
        flavour: ENV_JOB_MASTER_FLAVOUR,
        replicas: ENV_JOB_MASTER_REPLICAS,
    },
    RoleKeys {
        role: RoleKind::Worker,
        command: ENV_JOB_WORKER_COMMAND,
        flavour: ENV_JOB_WORKER_FLAVOUR,
        replicas: ENV_JOB_WORKER_REPLICAS,
    },
];

/// A job as submitted: name, command, image and settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobConf {
    /// Human-readable job name
    pub name: String,
    /// Default command for every role
    #[serde(default)]
    pub command: String,
    /// Container image
    pub image: String,
    /// Settings; exported to the job environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// A descriptor with its role overrides
#[derive(Clone, Debug, PartialEq)]
pub struct JobRequest {
    /// Job descriptor
    pub descriptor: JobDescriptor,
    /// Per-role overrides, in role order
    pub overrides: Vec<RoleOverride>,
}

impl JobConf {
    /// Create a configuration with no settings
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            image: image.into(),
            env: BTreeMap::new(),
        }
    }

    /// Set a setting, replacing any previous value
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    /// Value of a non-empty setting
    pub fn get(&self, key: &str) -> Option<&str> {
        self.env
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn parse_setting<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| {
                    Error::validation_for_field(key, format!("invalid value '{}': {}", raw, e))
                })
            })
            .transpose()
    }

    /// Build the descriptor and role overrides for job `id`
    pub fn to_request(&self, id: impl Into<String>) -> Result<JobRequest> {
        let mut descriptor = JobDescriptor::new(id, self.name.clone(), self.image.clone());
        descriptor.command = self.command.clone();
        descriptor.env = self.env.clone();
        descriptor.namespace = self
            .get(ENV_JOB_NAMESPACE)
            .unwrap_or(DEFAULT_NAMESPACE)
            .to_string();

        if let Some(job_type) = self.parse_setting::<JobType>(ENV_JOB_TYPE)? {
            descriptor.job_type = job_type;
        }
        if let Some(job_mode) = self.parse_setting::<JobMode>(ENV_JOB_MODE)? {
            descriptor.job_mode = job_mode;
        }
        if let Some(priority) = self.parse_setting::<Priority>(ENV_JOB_PRIORITY)? {
            descriptor.priority = priority;
        }
        if let Some(restart_policy) = self.parse_setting::<RestartPolicy>(ENV_JOB_RESTART_POLICY)? {
            descriptor.restart_policy = restart_policy;
        }
        descriptor.flavour = self.get(ENV_JOB_FLAVOUR).map(str::to_string);
        descriptor.queue = self.get(ENV_JOB_QUEUE_NAME).map(str::to_string);
        descriptor.template_path = self.get(ENV_JOB_TEMPLATE_PATH).map(str::to_string);
        descriptor.storage = self.get(ENV_FS_ID).map(|fs_id| StorageBinding {
            volume_name: fs_id.to_string(),
            claim_name: self
                .get(ENV_FS_CLAIM)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}-pvc", fs_id)),
        });

        let mut overrides = Vec::new();
        for keys in ROLE_KEYS {
            let role_override = RoleOverride {
                role: keys.role,
                command: self.get(keys.command).map(str::to_string),
                flavour: self.get(keys.flavour).map(str::to_string),
                replicas: self.parse_setting::<u32>(keys.replicas)?,
                env: BTreeMap::new(),
            };
            if role_override != RoleOverride::new(keys.role) {
                overrides.push(role_override);
            }
        }

        descriptor.validate()?;
        Ok(JobRequest {
            descriptor,
            overrides,
        })
    }
}
