//! Template loading
//!
//! A template is a framework resource authored as YAML (a `PaddleJob`, `TFJob`
//! or `PyTorchJob`) that the spec compiler patches. Loaders hand out owned
//! documents: every compilation mutates its own copy.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use dashmap::DashMap;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use tracing::debug;

use rolecast_common::{yaml, Error, JobDescriptor, JobMode, JobType, Result};

use crate::topology::Topology;

/// Key used in errors and cache entries for built-in templates
const BUILTIN_SOURCE: &str = "<builtin>";

/// A loaded template: a mapping at the document root
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateDocument(Value);

impl TemplateDocument {
    /// Wrap a value, requiring a mapping at the root
    pub fn new(value: Value, source: &str) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::template_parse(
                source,
                "expected a mapping at the document root",
            ));
        }
        Ok(Self(value))
    }

    /// Parse a YAML template
    pub fn from_yaml(input: &str, source: &str) -> Result<Self> {
        let map = yaml::parse_yaml_mapping(input, source)?;
        Ok(Self(Value::Object(map)))
    }

    /// Borrow the document
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Take the document
    pub fn into_value(self) -> Value {
        self.0
    }
}

/// What a loader is asked for
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TemplateRequest {
    /// Template path; the framework default when absent
    pub path: Option<String>,
    /// Storage volume the path is relative to
    pub volume: Option<String>,
    /// Framework of the job
    pub job_type: JobType,
    /// Topology of the job
    pub job_mode: JobMode,
}

impl TemplateRequest {
    /// Request for a job's template
    pub fn for_job(job: &JobDescriptor) -> Self {
        Self {
            path: job.template_path.clone(),
            volume: job.storage.as_ref().map(|s| s.volume_name.clone()),
            job_type: job.job_type,
            job_mode: job.job_mode,
        }
    }

    fn source(&self) -> String {
        match (&self.path, &self.volume) {
            (Some(path), Some(volume)) => format!("{}:{}", volume, path),
            (Some(path), None) => path.clone(),
            (None, _) => format!("{}/{}/{}", BUILTIN_SOURCE, self.job_type, self.job_mode),
        }
    }
}

/// Loads template documents
#[cfg_attr(test, automock)]
pub trait TemplateLoader: Send + Sync {
    /// Load the template for a request
    fn load(&self, request: &TemplateRequest) -> Result<TemplateDocument>;
}

// =============================================================================
// Built-in templates
// =============================================================================

/// Built-in template per framework and mode
///
/// Only serves requests without a path.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinTemplateLoader;

impl TemplateLoader for BuiltinTemplateLoader {
    fn load(&self, request: &TemplateRequest) -> Result<TemplateDocument> {
        if let Some(ref path) = request.path {
            return Err(Error::template_parse(
                path.as_str(),
                "built-in templates cannot load from a path",
            ));
        }
        let topology = Topology::lookup(request.job_type, request.job_mode)?;
        TemplateDocument::new(topology.default_template(), &request.source())
    }
}

// =============================================================================
// Filesystem templates
// =============================================================================

/// Loads templates from the filesystem
///
/// A path with a volume is resolved under that volume's root. A path without a
/// volume is resolved under the default directory when relative. No path loads
/// `<framework>_<mode>.yaml` from the default directory, or the built-in
/// template when no default directory is set.
#[derive(Clone, Debug, Default)]
pub struct FsTemplateLoader {
    volume_roots: BTreeMap<String, PathBuf>,
    default_dir: Option<PathBuf>,
}

impl FsTemplateLoader {
    /// Create a loader with no roots
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the directory holding per-framework default templates
    pub fn with_default_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_dir = Some(dir.into());
        self
    }

    /// Set the host root of a storage volume
    pub fn with_volume_root(mut self, volume: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.volume_roots.insert(volume.into(), root.into());
        self
    }

    /// File the request resolves to, or `None` for the built-in template
    pub fn resolve(&self, request: &TemplateRequest) -> Result<Option<PathBuf>> {
        let Some(ref path) = request.path else {
            let Some(ref dir) = self.default_dir else {
                return Ok(None);
            };
            let topology = Topology::lookup(request.job_type, request.job_mode)?;
            return Ok(Some(dir.join(topology.template_file_name())));
        };

        let relative = Path::new(path);
        if relative.components().any(|c| c == Component::ParentDir) {
            return Err(Error::validation_for_field(
                "templatePath",
                format!("template path '{}' must not leave its root", path),
            ));
        }

        match request.volume {
            Some(ref volume) => {
                let root = self.volume_roots.get(volume).ok_or_else(|| {
                    Error::validation_for_field(
                        "templatePath",
                        format!("no root configured for storage volume {}", volume),
                    )
                })?;
                Ok(Some(root.join(strip_root(relative))))
            }
            None if relative.is_absolute() => Ok(Some(relative.to_path_buf())),
            None => match self.default_dir {
                Some(ref dir) => Ok(Some(dir.join(relative))),
                None => Ok(Some(relative.to_path_buf())),
            },
        }
    }
}

/// Drop the leading `/` so the path joins under a root instead of replacing it
fn strip_root(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect()
}

impl TemplateLoader for FsTemplateLoader {
    fn load(&self, request: &TemplateRequest) -> Result<TemplateDocument> {
        let Some(file) = self.resolve(request)? else {
            return BuiltinTemplateLoader.load(request);
        };
        let source = file.display().to_string();
        let text = std::fs::read_to_string(&file)
            .map_err(|e| Error::template_io(source.as_str(), e.to_string()))?;
        debug!(path = %source, bytes = text.len(), "loaded template");
        TemplateDocument::from_yaml(&text, &source)
    }
}

// =============================================================================
// Caching
// =============================================================================

/// Caches parsed templates from an inner loader
///
/// Each `load` returns a fresh clone; cached documents are never handed out
/// by reference. Failed loads are not cached.
#[derive(Debug)]
pub struct CachedTemplateLoader<L> {
    inner: L,
    cache: DashMap<TemplateRequest, TemplateDocument>,
}

impl<L: TemplateLoader> CachedTemplateLoader<L> {
    /// Wrap a loader
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    /// Number of cached templates
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Drop every cached template
    pub fn clear(&self) {
        self.cache.clear();
    }
}

impl<L: TemplateLoader> TemplateLoader for CachedTemplateLoader<L> {
    fn load(&self, request: &TemplateRequest) -> Result<TemplateDocument> {
        if let Some(doc) = self.cache.get(request) {
            return Ok(doc.value().clone());
        }
        let doc = self.inner.load(request)?;
        self.cache.insert(request.clone(), doc.clone());
        Ok(doc)
    }
}
