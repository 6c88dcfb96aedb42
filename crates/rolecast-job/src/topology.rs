//! Role topology per framework and job mode
//!
//! Which roles a job has, where each role lives in the framework's resource
//! and whether it may be dropped are data, not control flow: adding a
//! topology means adding a row to [`TOPOLOGIES`].

use serde_json::{json, Map, Value};

use rolecast_common::{Error, JobMode, JobType, Result, RoleKind};

/// One role of a topology
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoleDescriptor {
    /// Role kind
    pub kind: RoleKind,
    /// Key of the role's section in the framework resource
    pub section: &'static str,
    /// Whether the role may be planned with zero replicas
    pub optional: bool,
    /// Replica count when no override sets one
    pub default_replicas: u32,
    /// Upper bound on replicas, for roles the operator runs exactly once
    pub max_replicas: Option<u32>,
}

/// Shape of one framework resource in one job mode
#[derive(Debug, PartialEq, Eq)]
pub struct Topology {
    /// Training framework
    pub job_type: JobType,
    /// Distributed topology
    pub job_mode: JobMode,
    /// `apiVersion` of the framework resource
    pub api_version: &'static str,
    /// `kind` of the framework resource
    pub kind: &'static str,
    /// Name the framework operator expects on the main container
    pub container_name: &'static str,
    /// Path to the mapping holding the role sections
    pub sections_path: &'static [&'static str],
    /// Path to the gang-scheduling policy
    pub scheduling_policy_path: &'static [&'static str],
    /// Whether role sections carry their own `restartPolicy`
    pub section_restart_policy: bool,
    /// Roles in planning order
    pub roles: &'static [RoleDescriptor],
}

const PADDLE_API: &str = "batch.paddlepaddle.org/v1";
const KUBEFLOW_API: &str = "kubeflow.org/v1";

const fn role(
    kind: RoleKind,
    section: &'static str,
    optional: bool,
) -> RoleDescriptor {
    RoleDescriptor {
        kind,
        section,
        optional,
        default_replicas: 1,
        max_replicas: None,
    }
}

/// A required role with exactly one replica
const fn singleton(kind: RoleKind, section: &'static str) -> RoleDescriptor {
    RoleDescriptor {
        max_replicas: Some(1),
        ..role(kind, section, false)
    }
}

/// Every supported topology
pub static TOPOLOGIES: &[Topology] = &[
    Topology {
        job_type: JobType::Paddle,
        job_mode: JobMode::Ps,
        api_version: PADDLE_API,
        kind: "PaddleJob",
        container_name: "paddle",
        sections_path: &["spec"],
        scheduling_policy_path: &["spec", "schedulingPolicy"],
        section_restart_policy: false,
        roles: &[
            role(RoleKind::PServer, "ps", true),
            role(RoleKind::Worker, "worker", false),
        ],
    },
    Topology {
        job_type: JobType::Paddle,
        job_mode: JobMode::Collective,
        api_version: PADDLE_API,
        kind: "PaddleJob",
        container_name: "paddle",
        sections_path: &["spec"],
        scheduling_policy_path: &["spec", "schedulingPolicy"],
        section_restart_policy: false,
        roles: &[role(RoleKind::Worker, "worker", false)],
    },
    Topology {
        job_type: JobType::TensorFlow,
        job_mode: JobMode::Ps,
        api_version: KUBEFLOW_API,
        kind: "TFJob",
        container_name: "tensorflow",
        sections_path: &["spec", "tfReplicaSpecs"],
        scheduling_policy_path: &["spec", "runPolicy", "schedulingPolicy"],
        section_restart_policy: true,
        roles: &[
            role(RoleKind::PServer, "PS", true),
            role(RoleKind::Worker, "Worker", false),
        ],
    },
    Topology {
        job_type: JobType::TensorFlow,
        job_mode: JobMode::Collective,
        api_version: KUBEFLOW_API,
        kind: "TFJob",
        container_name: "tensorflow",
        sections_path: &["spec", "tfReplicaSpecs"],
        scheduling_policy_path: &["spec", "runPolicy", "schedulingPolicy"],
        section_restart_policy: true,
        roles: &[role(RoleKind::Worker, "Worker", false)],
    },
    Topology {
        job_type: JobType::PyTorch,
        job_mode: JobMode::Collective,
        api_version: KUBEFLOW_API,
        kind: "PyTorchJob",
        container_name: "pytorch",
        sections_path: &["spec", "pytorchReplicaSpecs"],
        scheduling_policy_path: &["spec", "runPolicy", "schedulingPolicy"],
        section_restart_policy: true,
        roles: &[
            singleton(RoleKind::Master, "Master"),
            role(RoleKind::Worker, "Worker", false),
        ],
    },
];

impl Topology {
    /// Topology for a framework and job mode
    pub fn lookup(job_type: JobType, job_mode: JobMode) -> Result<&'static Topology> {
        TOPOLOGIES
            .iter()
            .find(|t| t.job_type == job_type && t.job_mode == job_mode)
            .ok_or_else(|| {
                Error::invalid_topology(
                    job_mode.as_str(),
                    rolecast_common::error::UNKNOWN_CONTEXT,
                    format!("{} jobs do not support {} mode", job_type, job_mode),
                )
            })
    }

    /// Descriptor for a role kind, if the topology has it
    pub fn role(&self, kind: RoleKind) -> Option<&RoleDescriptor> {
        self.roles.iter().find(|r| r.kind == kind)
    }

    /// Role section keys other modes of the same framework use but this one does not
    pub fn foreign_sections(&self) -> Vec<&'static str> {
        let mut foreign: Vec<&'static str> = TOPOLOGIES
            .iter()
            .filter(|t| t.job_type == self.job_type && t.job_mode != self.job_mode)
            .flat_map(|t| t.roles.iter().map(|r| r.section))
            .filter(|section| self.roles.iter().all(|r| r.section != *section))
            .collect();
        foreign.sort_unstable();
        foreign.dedup();
        foreign
    }

    /// Dotted document path of a role section, for error messages
    pub fn section_path(&self, section: &str) -> String {
        let mut parts: Vec<&str> = self.sections_path.to_vec();
        parts.push(section);
        parts.join(".")
    }

    /// File name of this topology's template in a template directory
    pub fn template_file_name(&self) -> String {
        format!(
            "{}_{}.yaml",
            self.job_type.as_str(),
            self.job_mode.as_str().to_ascii_lowercase()
        )
    }

    /// Skeleton for a role section created in a template that lacks it
    pub fn section_skeleton(&self, role: &RoleDescriptor) -> Value {
        let mut section = json!({
            "replicas": role.default_replicas,
            "template": {
                "spec": {
                    "containers": [{ "name": self.container_name }]
                }
            }
        });
        if self.section_restart_policy {
            section["restartPolicy"] = json!("Never");
        }
        section
    }

    /// Built-in template used when the job names none
    pub fn default_template(&self) -> Value {
        let mut sections = Map::new();
        for role in self.roles {
            sections.insert(role.section.to_string(), self.section_skeleton(role));
        }

        let mut doc = json!({
            "apiVersion": self.api_version,
            "kind": self.kind,
            "metadata": {},
        });
        insert_at(&mut doc, self.sections_path, Value::Object(sections));
        insert_at(&mut doc, self.scheduling_policy_path, json!({}));
        if self.job_type == JobType::Paddle {
            doc["spec"]["cleanPodPolicy"] = json!("Never");
            doc["spec"]["withGloo"] = json!(1);
        }
        doc
    }
}

/// Insert `value` at `path`, creating intermediate mappings
fn insert_at(doc: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cursor = doc;
    for key in parents {
        if !cursor.get(*key).is_some_and(Value::is_object) {
            cursor[*key] = json!({});
        }
        cursor = &mut cursor[*key];
    }
    cursor[*last] = value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_topology_has_a_required_role() {
        for t in TOPOLOGIES {
            assert!(
                t.roles.iter().any(|r| !r.optional),
                "{} {} has no required role",
                t.job_type,
                t.job_mode
            );
        }
    }

    #[test]
    fn topologies_are_unique_per_type_and_mode() {
        for (i, a) in TOPOLOGIES.iter().enumerate() {
            for b in &TOPOLOGIES[i + 1..] {
                assert!(!(a.job_type == b.job_type && a.job_mode == b.job_mode));
            }
        }
    }

    #[test]
    fn paddle_ps_orders_pserver_before_worker() {
        let t = Topology::lookup(JobType::Paddle, JobMode::Ps).unwrap();
        let kinds: Vec<RoleKind> = t.roles.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![RoleKind::PServer, RoleKind::Worker]);
        assert!(t.role(RoleKind::PServer).unwrap().optional);
        assert!(!t.role(RoleKind::Worker).unwrap().optional);
    }

    #[test]
    fn collective_has_only_workers() {
        let t = Topology::lookup(JobType::Paddle, JobMode::Collective).unwrap();
        assert!(t.role(RoleKind::PServer).is_none());
        assert_eq!(t.foreign_sections(), vec!["ps"]);
    }

    #[test]
    fn ps_mode_has_no_foreign_sections() {
        let t = Topology::lookup(JobType::Paddle, JobMode::Ps).unwrap();
        assert!(t.foreign_sections().is_empty());
    }

    #[test]
    fn pytorch_ps_is_not_supported() {
        let err = Topology::lookup(JobType::PyTorch, JobMode::Ps).unwrap_err();
        assert!(matches!(err, Error::InvalidTopology { ref job_mode, .. } if job_mode == "PS"));
    }

    #[test]
    fn pytorch_collective_runs_one_master_and_workers() {
        let t = Topology::lookup(JobType::PyTorch, JobMode::Collective).unwrap();
        let kinds: Vec<RoleKind> = t.roles.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![RoleKind::Master, RoleKind::Worker]);
        assert_eq!(t.role(RoleKind::Master).unwrap().max_replicas, Some(1));
        assert!(t.role(RoleKind::PServer).is_none());
        assert!(t.foreign_sections().is_empty());
    }

    #[test]
    fn tensorflow_parameter_servers_are_optional() {
        let t = Topology::lookup(JobType::TensorFlow, JobMode::Ps).unwrap();
        assert!(t.role(RoleKind::PServer).unwrap().optional);
        assert!(!t.role(RoleKind::Worker).unwrap().optional);
    }

    #[test]
    fn section_paths_and_file_names() {
        let tf = Topology::lookup(JobType::TensorFlow, JobMode::Ps).unwrap();
        assert_eq!(tf.section_path("PS"), "spec.tfReplicaSpecs.PS");
        assert_eq!(tf.template_file_name(), "tensorflow_ps.yaml");

        let paddle = Topology::lookup(JobType::Paddle, JobMode::Collective).unwrap();
        assert_eq!(paddle.template_file_name(), "paddle_collective.yaml");
    }

    #[test]
    fn default_paddle_template_shape() {
        let t = Topology::lookup(JobType::Paddle, JobMode::Ps).unwrap();
        let doc = t.default_template();
        assert_eq!(doc["apiVersion"], "batch.paddlepaddle.org/v1");
        assert_eq!(doc["kind"], "PaddleJob");
        assert_eq!(doc["spec"]["ps"]["replicas"], 1);
        assert_eq!(
            doc["spec"]["worker"]["template"]["spec"]["containers"][0]["name"],
            "paddle"
        );
        assert!(doc["spec"]["schedulingPolicy"].is_object());
        assert!(doc["spec"]["worker"].get("restartPolicy").is_none());
    }

    #[test]
    fn default_kubeflow_template_shape() {
        let t = Topology::lookup(JobType::PyTorch, JobMode::Collective).unwrap();
        let doc = t.default_template();
        assert_eq!(doc["kind"], "PyTorchJob");
        assert_eq!(
            doc["spec"]["pytorchReplicaSpecs"]["Master"]["restartPolicy"],
            "Never"
        );
        assert!(doc["spec"]["runPolicy"]["schedulingPolicy"].is_object());
        assert!(doc["spec"].get("withGloo").is_none());
    }
}
