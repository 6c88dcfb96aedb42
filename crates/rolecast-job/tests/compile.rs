//! End-to-end compilation tests
//!
//! Run descriptors through planning, aggregation and template patching with a
//! YAML flavour catalog and the built-in and filesystem template loaders.

use rolecast_common::conf::{
    JobConf, ENV_FS_ID, ENV_JOB_FLAVOUR, ENV_JOB_MODE, ENV_JOB_PS_FLAVOUR, ENV_JOB_PS_REPLICAS,
    ENV_JOB_QUEUE_NAME, ENV_JOB_TEMPLATE_PATH, ENV_JOB_WORKER_FLAVOUR, ENV_JOB_WORKER_REPLICAS,
};
use rolecast_common::resources::{CPU, MEMORY, NVIDIA_GPU};
use rolecast_common::{
    CompilerConfig, Error, FlavourCatalog, JobDescriptor, JobMode, JobType, RoleKind,
    RoleOverride,
};
use rolecast_job::{
    compile_job, BuiltinTemplateLoader, CachedTemplateLoader, FsTemplateLoader, TemplateDocument,
    TemplateLoader, TemplateRequest,
};

// =============================================================================
// Fixtures
// =============================================================================

const FLAVOURS: &str = r#"
flavours:
  - name: cpu
    cpu: 4
    mem: 8Gi
  - name: gpu
    cpu: 8
    mem: 32Gi
    scalarResources:
      nvidia.com/gpu: 1
"#;

const PADDLE_PS_TEMPLATE: &str = r#"
apiVersion: batch.paddlepaddle.org/v1
kind: PaddleJob
metadata:
  name: default-name
spec:
  cleanPodPolicy: Never
  withGloo: 1
  ps:
    replicas: 1
    template:
      spec:
        containers:
          - name: paddle
            image: registry.baidubce.com/paddle-image:v1
  worker:
    replicas: 1
    template:
      spec:
        containers:
          - name: paddle
            image: registry.baidubce.com/paddle-image:v1
            env:
              - name: TEMPLATE_ONLY
                value: kept
  schedulingPolicy:
    minAvailable: 99
"#;

fn catalog() -> FlavourCatalog {
    FlavourCatalog::from_yaml(FLAVOURS).unwrap()
}

fn ps_job() -> JobDescriptor {
    let mut job = JobDescriptor::new("job-ps-1", "ctr-train", "paddle:2.4.2");
    job.job_mode = JobMode::Ps;
    job.command = "python -m paddle.distributed.launch train.py".to_string();
    job.flavour = Some("cpu".to_string());
    job.queue = Some("train-queue".to_string());
    job
}

/// Loader that always serves the same YAML text
struct FixedLoader(&'static str);

impl TemplateLoader for FixedLoader {
    fn load(&self, _request: &TemplateRequest) -> rolecast_common::Result<TemplateDocument> {
        TemplateDocument::from_yaml(self.0, "fixed")
    }
}

// =============================================================================
// Topology and gang scheduling
// =============================================================================

#[test]
fn ps_cpu_and_gpu_workers_scale_by_two() {
    let overrides = vec![
        RoleOverride::new(RoleKind::PServer)
            .with_replicas(2)
            .with_flavour("cpu"),
        RoleOverride::new(RoleKind::Worker)
            .with_replicas(2)
            .with_flavour("gpu"),
    ];

    let compiled = compile_job(
        &ps_job(),
        &overrides,
        &catalog(),
        &FixedLoader(PADDLE_PS_TEMPLATE),
        &CompilerConfig::default(),
    )
    .unwrap();

    assert_eq!(compiled.plans.len(), 2);
    assert_eq!(compiled.declaration.min_available, 4);
    let min = &compiled.declaration.min_resources;
    assert_eq!(min.get(CPU), Some(2 * 4000 + 2 * 8000));
    assert_eq!(min.get(MEMORY), Some((2 * 8 + 2 * 32) << 30));
    assert_eq!(min.get(NVIDIA_GPU), Some(2));

    let spec = &compiled.spec;
    assert_eq!(spec.replicas(RoleKind::PServer), Some(2));
    assert_eq!(spec.replicas(RoleKind::Worker), Some(2));

    let policy = spec.scheduling_policy().unwrap();
    assert_eq!(policy.min_available, Some(4));
    assert_eq!(policy.min_resources["cpu"], "24");
    assert_eq!(policy.min_resources["memory"], "80Gi");
    assert_eq!(policy.min_resources["nvidia.com/gpu"], "2");
    assert_eq!(policy.queue.as_deref(), Some("train-queue"));

    let worker = spec.main_container(RoleKind::Worker).unwrap();
    let requests = worker.resources.unwrap().requests.unwrap();
    assert_eq!(requests["nvidia.com/gpu"].0, "1");
    let ps = spec.main_container(RoleKind::PServer).unwrap();
    assert!(!ps
        .resources
        .unwrap()
        .requests
        .unwrap()
        .contains_key("nvidia.com/gpu"));
}

#[test]
fn ps_mode_without_parameter_servers_drops_the_section() {
    let overrides = vec![
        RoleOverride::new(RoleKind::PServer).with_replicas(0),
        RoleOverride::new(RoleKind::Worker).with_replicas(3),
    ];

    let compiled = compile_job(
        &ps_job(),
        &overrides,
        &catalog(),
        &FixedLoader(PADDLE_PS_TEMPLATE),
        &CompilerConfig::default(),
    )
    .unwrap();

    assert_eq!(compiled.declaration.min_available, 3);
    assert!(compiled.spec.role_section(RoleKind::PServer).is_none());
    assert!(compiled.spec.as_value()["spec"].get("ps").is_none());
    assert_eq!(compiled.spec.replicas(RoleKind::Worker), Some(3));
}

#[test]
fn tensorflow_ps_without_parameter_servers_drops_the_section() {
    let mut job = ps_job();
    job.job_type = JobType::TensorFlow;
    let overrides = vec![
        RoleOverride::new(RoleKind::PServer).with_replicas(0),
        RoleOverride::new(RoleKind::Worker).with_replicas(2),
    ];

    let compiled = compile_job(
        &job,
        &overrides,
        &catalog(),
        &BuiltinTemplateLoader,
        &CompilerConfig::default(),
    )
    .unwrap();

    let sections = &compiled.spec.as_value()["spec"]["tfReplicaSpecs"];
    assert!(sections.get("PS").is_none());
    assert_eq!(sections["Worker"]["replicas"], 2);
    assert_eq!(compiled.declaration.min_available, 2);
    assert_eq!(compiled.spec.scheduling_policy().unwrap().min_available, Some(2));
}

#[test]
fn pytorch_collective_runs_one_master_and_the_workers() {
    let mut job = JobDescriptor::new("job-ddp-1", "ddp", "pytorch:2.1");
    job.job_type = JobType::PyTorch;
    job.command = "torchrun train.py".to_string();
    job.flavour = Some("gpu".to_string());
    let overrides = vec![RoleOverride::new(RoleKind::Worker).with_replicas(3)];

    let compiled = compile_job(
        &job,
        &overrides,
        &catalog(),
        &BuiltinTemplateLoader,
        &CompilerConfig::default(),
    )
    .unwrap();

    let sections = &compiled.spec.as_value()["spec"]["pytorchReplicaSpecs"];
    assert_eq!(sections["Master"]["replicas"], 1);
    assert_eq!(sections["Worker"]["replicas"], 3);
    assert_eq!(compiled.declaration.min_available, 4);

    let master = compiled.spec.main_container(RoleKind::Master).unwrap();
    assert_eq!(master.name, "pytorch");
    let role_env = master
        .env
        .unwrap()
        .into_iter()
        .find(|e| e.name == "ROLECAST_JOB_ROLE")
        .and_then(|e| e.value);
    assert_eq!(role_env.as_deref(), Some("master"));
}

#[test]
fn min_available_and_resources_match_the_plans() {
    let overrides = vec![
        RoleOverride::new(RoleKind::PServer).with_replicas(3),
        RoleOverride::new(RoleKind::Worker)
            .with_replicas(5)
            .with_flavour("gpu"),
    ];
    let compiled = compile_job(
        &ps_job(),
        &overrides,
        &catalog(),
        &BuiltinTemplateLoader,
        &CompilerConfig::default(),
    )
    .unwrap();

    let replicas: u32 = compiled.plans.iter().map(|p| p.replicas).sum();
    assert_eq!(compiled.declaration.min_available, replicas);

    for (kind, total) in compiled.declaration.min_resources.iter() {
        let expected: u64 = compiled
            .plans
            .iter()
            .map(|p| u64::from(p.replicas) * p.resources.get(kind).unwrap_or(0))
            .sum();
        assert_eq!(total, expected, "resource {}", kind);
    }
}

#[test]
fn collective_without_workers_is_invalid() {
    let mut job = ps_job();
    job.job_mode = JobMode::Collective;
    let overrides = vec![RoleOverride::new(RoleKind::Worker).with_replicas(0)];

    let err = compile_job(
        &job,
        &overrides,
        &catalog(),
        &BuiltinTemplateLoader,
        &CompilerConfig::default(),
    )
    .unwrap_err();

    assert!(matches!(
        err,
        Error::InvalidTopology { ref job_mode, ref role, .. }
            if job_mode == "Collective" && role == "worker"
    ));
    assert!(!err.is_retryable());
}

#[test]
fn unknown_flavour_fails_compilation() {
    let overrides = vec![RoleOverride::new(RoleKind::Worker).with_flavour("v100-x8")];
    let err = compile_job(
        &ps_job(),
        &overrides,
        &catalog(),
        &BuiltinTemplateLoader,
        &CompilerConfig::default(),
    )
    .unwrap_err();

    assert_eq!(err.flavour(), Some("v100-x8"));
    assert_eq!(err.role(), Some("worker"));
}

#[test]
fn aggregating_no_plans_is_an_empty_topology() {
    let err = rolecast_volcano::aggregate("job-empty", &[]).unwrap_err();
    assert!(matches!(err, Error::EmptyTopology { ref job } if job == "job-empty"));
}

// =============================================================================
// Environment
// =============================================================================

#[test]
fn role_env_overrides_job_env() {
    let mut job = ps_job();
    job.env.insert("LR".to_string(), "0.01".to_string());
    job.env.insert("EPOCHS".to_string(), "10".to_string());
    let overrides = vec![RoleOverride::new(RoleKind::Worker)
        .with_env("LR", "0.1")
        .with_env("NCCL_DEBUG", "INFO")];

    let compiled = compile_job(
        &job,
        &overrides,
        &catalog(),
        &FixedLoader(PADDLE_PS_TEMPLATE),
        &CompilerConfig::default(),
    )
    .unwrap();

    let env: Vec<(String, Option<String>)> = compiled
        .spec
        .main_container(RoleKind::Worker)
        .unwrap()
        .env
        .unwrap()
        .into_iter()
        .map(|e| (e.name, e.value))
        .collect();
    let value = |name: &str| {
        env.iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.clone())
    };

    assert_eq!(value("LR").as_deref(), Some("0.1"));
    assert_eq!(value("EPOCHS").as_deref(), Some("10"));
    assert_eq!(value("NCCL_DEBUG").as_deref(), Some("INFO"));
    assert_eq!(value("TEMPLATE_ONLY").as_deref(), Some("kept"));
    assert_eq!(value("ROLECAST_JOB_ROLE").as_deref(), Some("worker"));

    let ps_env = compiled
        .spec
        .main_container(RoleKind::PServer)
        .unwrap()
        .env
        .unwrap();
    let ps_lr = ps_env.iter().find(|e| e.name == "LR").unwrap();
    assert_eq!(ps_lr.value.as_deref(), Some("0.01"));
    assert!(ps_env.iter().all(|e| e.name != "NCCL_DEBUG"));
}

// =============================================================================
// Idempotence and template loading
// =============================================================================

#[test]
fn compiling_twice_yields_equal_specs() {
    let overrides = vec![RoleOverride::new(RoleKind::Worker)
        .with_replicas(2)
        .with_flavour("gpu")];
    let loader = CachedTemplateLoader::new(FixedLoader(PADDLE_PS_TEMPLATE));
    let config = CompilerConfig::default();

    let first = compile_job(&ps_job(), &overrides, &catalog(), &loader, &config).unwrap();
    let second = compile_job(&ps_job(), &overrides, &catalog(), &loader, &config).unwrap();

    assert_eq!(first.spec, second.spec);
    assert_eq!(first.spec.to_json().unwrap(), second.spec.to_json().unwrap());
    assert_eq!(loader.len(), 1);
}

#[test]
fn key_value_settings_compile_from_storage_volume() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("templates")).unwrap();
    std::fs::write(root.path().join("templates/ps.yaml"), PADDLE_PS_TEMPLATE).unwrap();

    let mut conf = JobConf::new("ctr-train", "python train.py", "paddle:2.4.2");
    conf.set_env(ENV_JOB_MODE, "PS");
    conf.set_env(ENV_JOB_FLAVOUR, "cpu");
    conf.set_env(ENV_JOB_PS_FLAVOUR, "cpu");
    conf.set_env(ENV_JOB_PS_REPLICAS, "2");
    conf.set_env(ENV_JOB_WORKER_FLAVOUR, "gpu");
    conf.set_env(ENV_JOB_WORKER_REPLICAS, "2");
    conf.set_env(ENV_JOB_QUEUE_NAME, "train-queue");
    conf.set_env(ENV_FS_ID, "fs-root-sample");
    conf.set_env(ENV_JOB_TEMPLATE_PATH, "templates/ps.yaml");
    let request = conf.to_request("job-kv-1").unwrap();

    let loader = FsTemplateLoader::new().with_volume_root("fs-root-sample", root.path());
    let config = CompilerConfig::default();
    let compiled = compile_job(
        &request.descriptor,
        &request.overrides,
        &catalog(),
        &loader,
        &config,
    )
    .unwrap();

    assert_eq!(compiled.declaration.min_available, 4);
    let worker = compiled.spec.main_container(RoleKind::Worker).unwrap();
    assert_eq!(
        worker.command.unwrap(),
        vec![
            "bash".to_string(),
            "-c".to_string(),
            format!("cd {}; python train.py", config.default_mount_path),
        ]
    );
    assert_eq!(worker.volume_mounts.unwrap()[0].name, "fs-root-sample");

    let pod_spec = &compiled.spec.role_section(RoleKind::PServer).unwrap()["template"]["spec"];
    assert_eq!(
        pod_spec["volumes"][0]["persistentVolumeClaim"]["claimName"],
        "fs-root-sample-pvc"
    );
    assert_eq!(compiled.spec.as_value()["metadata"]["name"], "job-kv-1");
}

#[test]
fn missing_template_file_is_retryable() {
    let dir = tempfile::tempdir().unwrap();
    let mut job = ps_job();
    job.template_path = Some("absent.yaml".to_string());
    let loader = FsTemplateLoader::new().with_default_dir(dir.path());

    let err = compile_job(
        &job,
        &[],
        &catalog(),
        &loader,
        &CompilerConfig::default(),
    )
    .unwrap_err();
    assert!(err.is_retryable());
}
