//! Error types for job compilation
//!
//! Every variant carries enough context (job mode, role kind, flavour name,
//! template section) to diagnose a bad job without retrying it.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Rolecast operations
#[derive(Debug, Error)]
pub enum Error {
    /// The job mode and role replica counts cannot produce a valid plan
    #[error("invalid topology for mode {job_mode} (role {role}): {message}")]
    InvalidTopology {
        /// Job mode being planned (e.g., "PS", "Collective")
        job_mode: String,
        /// Role kind that could not be planned
        role: String,
        /// Description of what's invalid
        message: String,
    },

    /// A flavour resolved but its quantities are unusable
    #[error("invalid resource for flavour {flavour} (role {role}): {message}")]
    InvalidResource {
        /// Flavour being resolved
        flavour: String,
        /// Role kind requesting the flavour
        role: String,
        /// Description of what's invalid
        message: String,
    },

    /// A flavour name is not present in the catalog
    #[error("unknown flavour {flavour} (role {role})")]
    UnknownFlavour {
        /// Flavour name that did not resolve
        flavour: String,
        /// Role kind requesting the flavour
        role: String,
    },

    /// No role survived planning
    #[error("job {job} has no schedulable roles")]
    EmptyTopology {
        /// Job the declaration was computed for
        job: String,
    },

    /// Loaded template is structurally incompatible with the planned roles
    #[error("template shape error at {section}: {message}")]
    TemplateShape {
        /// Document path of the offending section (e.g., "spec.worker")
        section: String,
        /// Description of what's missing or unexpected
        message: String,
    },

    /// Template could not be read or parsed
    #[error("template error for {path}: {message}")]
    Template {
        /// Path (or built-in key) of the template
        path: String,
        /// Description of what failed
        message: String,
        /// Whether the failure came from I/O and may succeed later
        retryable: bool,
    },

    /// Validation error for descriptors, settings or configuration
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field or setting key (if known)
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },
}

impl Error {
    /// Create an invalid topology error for a job mode and role
    pub fn invalid_topology(
        job_mode: impl Into<String>,
        role: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::InvalidTopology {
            job_mode: job_mode.into(),
            role: role.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid resource error for a flavour requested by a role
    pub fn invalid_resource(
        flavour: impl Into<String>,
        role: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::InvalidResource {
            flavour: flavour.into(),
            role: role.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid resource error without flavour or role context
    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::invalid_resource(UNKNOWN_CONTEXT, UNKNOWN_CONTEXT, msg)
    }

    /// Create an unknown flavour error
    pub fn unknown_flavour(flavour: impl Into<String>) -> Self {
        Self::UnknownFlavour {
            flavour: flavour.into(),
            role: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Attach the requesting role to a flavour error
    ///
    /// Resolvers do not know which role asked; the planner fills it in.
    pub fn for_role(self, role: impl Into<String>) -> Self {
        match self {
            Self::UnknownFlavour { flavour, .. } => Self::UnknownFlavour {
                flavour,
                role: role.into(),
            },
            Self::InvalidResource {
                flavour, message, ..
            } => Self::InvalidResource {
                flavour,
                role: role.into(),
                message,
            },
            other => other,
        }
    }

    /// Create an empty topology error for a job
    pub fn empty_topology(job: impl Into<String>) -> Self {
        Self::EmptyTopology { job: job.into() }
    }

    /// Create a template shape error for a document section
    pub fn template_shape(section: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TemplateShape {
            section: section.into(),
            message: msg.into(),
        }
    }

    /// Create a template error caused by I/O (retryable)
    pub fn template_io(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Template {
            path: path.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a template error caused by malformed content (not retryable)
    pub fn template_parse(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Template {
            path: path.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific field or setting key
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Check if this error is retryable
    ///
    /// Compilation errors describe a defect in the job or its configuration and
    /// never succeed on retry. Only template I/O may.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Template { retryable, .. } => *retryable,
            Error::InvalidTopology { .. }
            | Error::InvalidResource { .. }
            | Error::UnknownFlavour { .. }
            | Error::EmptyTopology { .. }
            | Error::TemplateShape { .. }
            | Error::Validation { .. }
            | Error::Serialization { .. } => false,
        }
    }

    /// Get the role kind if this error is associated with a specific role
    pub fn role(&self) -> Option<&str> {
        match self {
            Error::InvalidTopology { role, .. }
            | Error::InvalidResource { role, .. }
            | Error::UnknownFlavour { role, .. } => Some(role),
            _ => None,
        }
    }

    /// Get the flavour name if this error is about a flavour
    pub fn flavour(&self) -> Option<&str> {
        match self {
            Error::InvalidResource { flavour, .. } | Error::UnknownFlavour { flavour, .. } => {
                Some(flavour)
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_topology_names_mode_and_role() {
        let err = Error::invalid_topology("Collective", "worker", "replicas must be > 0");
        let msg = err.to_string();
        assert!(msg.contains("Collective"));
        assert!(msg.contains("worker"));
        assert!(msg.contains("replicas must be > 0"));
        assert_eq!(err.role(), Some("worker"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn unknown_flavour_gets_role_attached() {
        let err = Error::unknown_flavour("gpu-xl").for_role("pserver");
        assert_eq!(err.flavour(), Some("gpu-xl"));
        assert_eq!(err.role(), Some("pserver"));
        assert_eq!(err.to_string(), "unknown flavour gpu-xl (role pserver)");
    }

    #[test]
    fn for_role_leaves_other_errors_alone() {
        let err = Error::empty_topology("job-1").for_role("worker");
        assert!(matches!(err, Error::EmptyTopology { ref job } if job == "job-1"));
        assert_eq!(err.role(), None);
    }

    #[test]
    fn invalid_quantity_uses_unknown_context() {
        let err = Error::invalid_quantity("bad cpu");
        assert_eq!(err.flavour(), Some(UNKNOWN_CONTEXT));
        assert_eq!(err.role(), Some(UNKNOWN_CONTEXT));
    }

    #[test]
    fn only_template_io_is_retryable() {
        assert!(Error::template_io("/tmp/x.yaml", "not found").is_retryable());
        assert!(!Error::template_parse("/tmp/x.yaml", "bad yaml").is_retryable());
        assert!(!Error::template_shape("spec.worker", "missing").is_retryable());
        assert!(!Error::empty_topology("j").is_retryable());
        assert!(!Error::validation("bad").is_retryable());
        assert!(!Error::serialization("bad").is_retryable());
        assert!(!Error::unknown_flavour("x").is_retryable());
    }

    #[test]
    fn validation_for_field_keeps_field() {
        let err = Error::validation_for_field("ROLECAST_JOB_PS_REPLICAS", "not a number");
        match err {
            Error::Validation { field, message } => {
                assert_eq!(field.as_deref(), Some("ROLECAST_JOB_PS_REPLICAS"));
                assert_eq!(message, "not a number");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn serde_json_errors_convert() {
        let parse: std::result::Result<u32, serde_json::Error> = serde_json::from_str("\"x\"");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { kind: None, .. }));
    }
}
