//! SpecCompiler: patches role plans and the scheduling declaration into a template
//!
//! For each planned role:
//! - Sets the section's replica count (and restart policy where the framework
//!   keeps it on the section)
//! - Patches the main container: image, command, environment, resources and
//!   the storage mount
//! - Patches the pod spec: scheduler, priority class, restart policy and the
//!   storage volume
//!
//! Then drops sections of unplanned optional roles, overwrites the embedded
//! gang-scheduling policy and stamps the resource metadata.

use k8s_openapi::api::core::v1::{
    Container, EnvVar, PersistentVolumeClaimVolumeSource, Volume, VolumeMount,
};
use serde_json::{json, Map, Value};

use rolecast_common::{
    CompilerConfig, Error, JobIdentity, Result, RoleKind, RolePlan, LABEL_PREFIX,
};
use rolecast_volcano::{SchedulingDeclaration, SchedulingPolicy};

use crate::template::TemplateDocument;
use crate::topology::{RoleDescriptor, Topology};

/// A compiled framework resource
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledSpec {
    topology: &'static Topology,
    document: Value,
}

impl CompiledSpec {
    /// Topology the resource was compiled for
    pub fn topology(&self) -> &'static Topology {
        self.topology
    }

    /// The compiled document
    pub fn as_value(&self) -> &Value {
        &self.document
    }

    /// Section of a role, if the role is present
    pub fn role_section(&self, kind: RoleKind) -> Option<&Value> {
        let role = self.topology.role(kind)?;
        value_at(&self.document, self.topology.sections_path)?.get(role.section)
    }

    /// Replica count of a role, if the role is present
    pub fn replicas(&self, kind: RoleKind) -> Option<u64> {
        self.role_section(kind)?.get("replicas")?.as_u64()
    }

    /// Main container of a role
    pub fn main_container(&self, kind: RoleKind) -> Option<Container> {
        let container = self
            .role_section(kind)?
            .pointer("/template/spec/containers/0")?;
        serde_json::from_value(container.clone()).ok()
    }

    /// Embedded gang-scheduling policy
    pub fn scheduling_policy(&self) -> Option<SchedulingPolicy> {
        let policy = value_at(&self.document, self.topology.scheduling_policy_path)?;
        serde_json::from_value(policy.clone()).ok()
    }

    /// Render as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.document)
            .map_err(|e| Error::serialization_for_kind(self.topology.kind, e.to_string()))
    }

    /// Take the compiled document
    pub fn into_value(self) -> Value {
        self.document
    }
}

/// Compiles role plans into a template
pub struct SpecCompiler<'a> {
    config: &'a CompilerConfig,
}

impl<'a> SpecCompiler<'a> {
    /// Create a compiler
    pub fn new(config: &'a CompilerConfig) -> Self {
        Self { config }
    }

    /// Patch a freshly loaded template.
    ///
    /// The template is consumed; compiling the same inputs against two loads
    /// of the same template yields equal specs.
    pub fn compile(
        &self,
        template: TemplateDocument,
        plans: &[RolePlan],
        declaration: &SchedulingDeclaration,
        job: &JobIdentity,
    ) -> Result<CompiledSpec> {
        let topology = Topology::lookup(job.job_type, job.job_mode)?;
        let mut document = template.into_value();

        check_kind(&mut document, topology)?;

        if let Some(stray) = plans.iter().find(|p| topology.role(p.kind).is_none()) {
            return Err(Error::invalid_topology(
                topology.job_mode.as_str(),
                stray.kind.as_str(),
                "role is not part of this topology",
            ));
        }

        let sections = mapping_at_mut(&mut document, topology.sections_path)?;
        for foreign in topology.foreign_sections() {
            if sections.contains_key(foreign) {
                return Err(Error::template_shape(
                    topology.section_path(foreign),
                    format!("section does not belong to a {} job", topology.job_mode),
                ));
            }
        }

        for role in topology.roles {
            let plan = plans.iter().find(|p| p.kind == role.kind);
            let path = topology.section_path(role.section);

            match (plan, sections.contains_key(role.section)) {
                (None, _) if role.optional => {
                    sections.remove(role.section);
                }
                (None, _) => {
                    return Err(Error::invalid_topology(
                        topology.job_mode.as_str(),
                        role.kind.as_str(),
                        "required role has no plan",
                    ));
                }
                (Some(_), false) if !role.optional => {
                    return Err(Error::template_shape(path, "required role section is missing"));
                }
                (Some(plan), present) => {
                    if !present {
                        sections.insert(role.section.to_string(), topology.section_skeleton(role));
                    }
                    let section = sections
                        .get_mut(role.section)
                        .ok_or_else(|| Error::template_shape(path.as_str(), "section vanished"))?;
                    self.patch_section(section, &path, topology, role, plan, job)?;
                }
            }
        }

        let policy = SchedulingPolicy::from_declaration(declaration, job);
        patch_scheduling_policy(&mut document, topology, &policy)?;
        patch_metadata(&mut document, job)?;

        Ok(CompiledSpec { topology, document })
    }

    fn patch_section(
        &self,
        section: &mut Value,
        path: &str,
        topology: &Topology,
        role: &RoleDescriptor,
        plan: &RolePlan,
        job: &JobIdentity,
    ) -> Result<()> {
        if section.is_null() {
            *section = topology.section_skeleton(role);
        }
        let section = section
            .as_object_mut()
            .ok_or_else(|| Error::template_shape(path, "expected a mapping"))?;

        section.insert("replicas".to_string(), json!(plan.replicas));
        if topology.section_restart_policy {
            section.insert("restartPolicy".to_string(), json!(plan.restart_policy.as_str()));
        }

        let template_path = format!("{}.template", path);
        let template = object_entry(section, "template", &template_path)?;

        let metadata_path = format!("{}.metadata", template_path);
        let labels = object_entry(
            object_entry(template, "metadata", &metadata_path)?,
            "labels",
            &format!("{}.labels", metadata_path),
        )?;
        labels.insert(format!("{}/job-id", LABEL_PREFIX), json!(job.id));
        labels.insert(format!("{}/role", LABEL_PREFIX), json!(role.kind.as_str()));

        let spec_path = format!("{}.spec", template_path);
        let spec = object_entry(template, "spec", &spec_path)?;
        spec.insert("schedulerName".to_string(), json!(self.config.scheduler_name));
        spec.insert(
            "priorityClassName".to_string(),
            json!(job.priority.priority_class_name()),
        );
        spec.insert("restartPolicy".to_string(), json!(plan.restart_policy.as_str()));

        let containers_path = format!("{}.containers", spec_path);
        let containers = list_entry(spec, "containers", &containers_path)?;
        if containers.is_empty() {
            containers.push(json!({ "name": topology.container_name }));
        }
        let main_path = format!("{}[0]", containers_path);
        let main = containers[0]
            .as_object_mut()
            .ok_or_else(|| Error::template_shape(main_path.as_str(), "expected a mapping"))?;
        main.entry("name")
            .or_insert_with(|| json!(topology.container_name));
        self.patch_container(main, &main_path, plan)?;

        if let Some(ref storage) = plan.storage {
            let volume = Volume {
                name: storage.volume_name.clone(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: storage.claim_name.clone(),
                    read_only: None,
                }),
                ..Default::default()
            };
            let volumes = list_entry(spec, "volumes", &format!("{}.volumes", spec_path))?;
            upsert_named(volumes, serde_json::to_value(volume)?, false);
        }
        Ok(())
    }

    /// Overwrite the container fields a plan owns; every other key stays as authored
    fn patch_container(
        &self,
        container: &mut Map<String, Value>,
        path: &str,
        plan: &RolePlan,
    ) -> Result<()> {
        container.insert("image".to_string(), json!(plan.image));

        if !plan.command.trim().is_empty() {
            let command = match plan.storage {
                Some(ref storage) => format!(
                    "cd {}; {}",
                    self.config.mount_path_for(&storage.volume_name),
                    plan.command
                ),
                None => plan.command.clone(),
            };
            container.insert(
                "command".to_string(),
                json!([self.config.container_shell, "-c", command]),
            );
        }

        let env = list_entry(container, "env", &format!("{}.env", path))?;
        for (name, value) in &plan.env {
            let existing = env
                .iter_mut()
                .find(|e| e.get("name").and_then(Value::as_str) == Some(name.as_str()));
            match existing {
                Some(Value::Object(existing)) => {
                    existing.remove("valueFrom");
                    existing.insert("value".to_string(), json!(value));
                }
                _ => env.push(serde_json::to_value(EnvVar {
                    name: name.clone(),
                    value: Some(value.clone()),
                    ..Default::default()
                })?),
            }
        }

        let quantities = serde_json::to_value(plan.resources.to_quantities())?;
        let resources = object_entry(container, "resources", &format!("{}.resources", path))?;
        resources.insert("requests".to_string(), quantities.clone());
        resources.insert("limits".to_string(), quantities);

        if let Some(ref storage) = plan.storage {
            let mount = VolumeMount {
                name: storage.volume_name.clone(),
                mount_path: self.config.mount_path_for(&storage.volume_name).to_string(),
                ..Default::default()
            };
            let mounts = list_entry(container, "volumeMounts", &format!("{}.volumeMounts", path))?;
            upsert_named(mounts, serde_json::to_value(mount)?, true);
        }
        Ok(())
    }
}

/// Replace the entry named like `entry`, or merge into it, or append it
fn upsert_named(list: &mut Vec<Value>, entry: Value, merge: bool) {
    let name = entry.get("name").cloned();
    let Some(current) = list.iter_mut().find(|v| v.get("name") == name.as_ref()) else {
        list.push(entry);
        return;
    };
    if merge {
        if let (Some(current), Value::Object(patch)) = (current.as_object_mut(), &entry) {
            current.extend(patch.clone());
            return;
        }
    }
    *current = entry;
}

/// Reject templates of a different framework resource; fill in an absent kind
fn check_kind(document: &mut Value, topology: &Topology) -> Result<()> {
    let root = document
        .as_object_mut()
        .ok_or_else(|| Error::template_shape("<root>", "expected a mapping"))?;

    let kind = root.get("kind").and_then(Value::as_str).map(str::to_string);
    match kind.as_deref() {
        Some(kind) if kind != topology.kind => Err(Error::template_shape(
            "kind",
            format!("template is a {}, job needs a {}", kind, topology.kind),
        )),
        Some(_) => Ok(()),
        None => {
            root.insert("kind".to_string(), json!(topology.kind));
            root.entry("apiVersion")
                .or_insert_with(|| json!(topology.api_version));
            Ok(())
        }
    }
}

fn patch_scheduling_policy(
    document: &mut Value,
    topology: &Topology,
    policy: &SchedulingPolicy,
) -> Result<()> {
    let slot = mapping_at_mut(document, topology.scheduling_policy_path)?;
    // Keys the policy leaves unset (queue) keep their template value
    if let Value::Object(patch) = serde_json::to_value(policy)? {
        slot.extend(patch);
    }
    Ok(())
}

fn patch_metadata(document: &mut Value, job: &JobIdentity) -> Result<()> {
    let meta = mapping_at_mut(document, &["metadata"])?;
    meta.insert("name".to_string(), json!(job.id));
    meta.insert("namespace".to_string(), json!(job.namespace));

    let labels = object_entry(meta, "labels", "metadata.labels")?;
    labels.insert(format!("{}/job-id", LABEL_PREFIX), json!(job.id));
    labels.insert(format!("{}/job-type", LABEL_PREFIX), json!(job.job_type.as_str()));
    labels.insert(format!("{}/job-mode", LABEL_PREFIX), json!(job.job_mode.as_str()));

    object_entry(meta, "annotations", "metadata.annotations")?
        .insert(format!("{}/job-name", LABEL_PREFIX), json!(job.name));
    Ok(())
}

/// Mapping under `key`, created when missing or null
fn object_entry<'v>(
    map: &'v mut Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<&'v mut Map<String, Value>> {
    let slot = map.entry(key.to_string()).or_insert(Value::Null);
    if slot.is_null() {
        *slot = Value::Object(Map::new());
    }
    slot.as_object_mut()
        .ok_or_else(|| Error::template_shape(path, "expected a mapping"))
}

/// List under `key`, created when missing or null
fn list_entry<'v>(map: &'v mut Map<String, Value>, key: &str, path: &str) -> Result<&'v mut Vec<Value>> {
    let slot = map.entry(key.to_string()).or_insert(Value::Null);
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    slot.as_array_mut()
        .ok_or_else(|| Error::template_shape(path, "expected a list"))
}

/// Mapping at `path`, creating missing or null levels
fn mapping_at_mut<'v>(doc: &'v mut Value, path: &[&str]) -> Result<&'v mut Map<String, Value>> {
    let mut cursor = doc;
    for (depth, key) in path.iter().enumerate() {
        if cursor.is_null() {
            *cursor = Value::Object(Map::new());
        }
        let map = cursor
            .as_object_mut()
            .ok_or_else(|| Error::template_shape(display_path(&path[..depth]), "expected a mapping"))?;
        cursor = map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if cursor.is_null() {
        *cursor = Value::Object(Map::new());
    }
    cursor
        .as_object_mut()
        .ok_or_else(|| Error::template_shape(display_path(path), "expected a mapping"))
}

fn value_at<'v>(doc: &'v Value, path: &[&str]) -> Option<&'v Value> {
    path.iter().try_fold(doc, |cursor, key| cursor.get(*key))
}

fn display_path(path: &[&str]) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.join(".")
    }
}
