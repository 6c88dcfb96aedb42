//! Compiler configuration
//!
//! Everything the spec compiler derives from deployment conventions rather than
//! from the job itself: which scheduler pods are handed to, where storage
//! volumes are mounted, and which shell wraps role commands.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{yaml, Error, Result, DEFAULT_SCHEDULER_NAME};

/// Mount path used for volumes without an entry in `mount_paths`
pub const DEFAULT_MOUNT_PATH: &str = "/home/rolecast/storage/mnt";

/// Shell used to run role commands
pub const DEFAULT_CONTAINER_SHELL: &str = "bash";

/// Compiler configuration
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerConfig {
    /// Scheduler name written into every pod template
    pub scheduler_name: String,

    /// Mount path for volumes not listed in `mount_paths`
    pub default_mount_path: String,

    /// Mount path per storage volume identifier
    pub mount_paths: BTreeMap<String, String>,

    /// Shell that runs role commands (`<shell> -c <command>`)
    pub container_shell: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            scheduler_name: DEFAULT_SCHEDULER_NAME.to_string(),
            default_mount_path: DEFAULT_MOUNT_PATH.to_string(),
            mount_paths: BTreeMap::new(),
            container_shell: DEFAULT_CONTAINER_SHELL.to_string(),
        }
    }
}

impl CompilerConfig {
    /// Load configuration from YAML; missing keys take their defaults
    pub fn from_yaml(input: &str) -> Result<Self> {
        let value = yaml::parse_yaml(input, "compiler config")?;
        let config: Self = if value.is_null() {
            Self::default()
        } else {
            serde_json::from_value(value)
                .map_err(|e| Error::serialization_for_kind("CompilerConfig", e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the mount path for a volume
    pub fn with_mount_path(mut self, volume: impl Into<String>, path: impl Into<String>) -> Self {
        self.mount_paths.insert(volume.into(), path.into());
        self
    }

    /// Mount path for a storage volume identifier
    pub fn mount_path_for(&self, volume: &str) -> &str {
        self.mount_paths
            .get(volume)
            .map(String::as_str)
            .unwrap_or(&self.default_mount_path)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scheduler_name.trim().is_empty() {
            return Err(Error::validation_for_field(
                "schedulerName",
                "scheduler name must not be empty",
            ));
        }
        if self.container_shell.trim().is_empty() {
            return Err(Error::validation_for_field(
                "containerShell",
                "container shell must not be empty",
            ));
        }
        let paths = std::iter::once(("default", &self.default_mount_path))
            .chain(self.mount_paths.iter().map(|(k, v)| (k.as_str(), v)));
        for (volume, path) in paths {
            if !path.starts_with('/') {
                return Err(Error::validation_for_field(
                    "mountPaths",
                    format!("mount path '{}' for volume {} must be absolute", path, volume),
                ));
            }
        }
        Ok(())
    }
}
