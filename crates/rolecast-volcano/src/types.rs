//! Volcano scheduling-policy serialization types
//!
//! PaddleJob (`spec.schedulingPolicy`) and the Kubeflow training operators
//! (`spec.runPolicy.schedulingPolicy`) both hand this shape to the Volcano
//! PodGroup they create for the job.

use std::collections::BTreeMap;

use rolecast_common::JobIdentity;
use serde::{Deserialize, Serialize};

use crate::aggregator::SchedulingDeclaration;

/// Gang-scheduling policy embedded in a distributed job resource
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_available: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class: Option<String>,

    /// Aggregate resources as Kubernetes quantity strings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub min_resources: BTreeMap<String, String>,
}

impl SchedulingPolicy {
    /// Policy for a job's scheduling declaration
    pub fn from_declaration(declaration: &SchedulingDeclaration, job: &JobIdentity) -> Self {
        Self {
            min_available: Some(declaration.min_available),
            queue: job.queue.clone(),
            priority_class: Some(job.priority.priority_class_name().to_string()),
            min_resources: declaration.min_resources.to_strings(),
        }
    }
}
