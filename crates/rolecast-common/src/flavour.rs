//! Flavours: named bundles of per-replica resources
//!
//! The planner only needs [`FlavourResolver`]. [`FlavourCatalog`] is the
//! in-memory implementation, built from a YAML catalog such as:
//!
//! ```yaml
//! flavours:
//!   - name: cpu
//!     cpu: "4"
//!     mem: 8Gi
//!   - name: gpu
//!     cpu: 8
//!     mem: 32Gi
//!     scalarResources:
//!       nvidia.com/gpu: "1"
//! ```

use std::collections::BTreeMap;

#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::resources::{ResourceList, CPU, MEMORY};
use crate::{yaml, Error, Result};

/// A resolved flavour
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Flavour {
    /// Flavour name
    pub name: String,
    /// Per-replica resources
    pub resources: ResourceList,
}

/// Resolves flavour names into per-replica resources
///
/// Implementations must fail with [`Error::UnknownFlavour`] for names they do
/// not know; the planner attaches the requesting role.
#[cfg_attr(test, automock)]
pub trait FlavourResolver: Send + Sync {
    /// Resolve a flavour by name
    fn resolve(&self, name: &str) -> Result<Flavour>;
}

/// One catalog entry as authored
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlavourSpec {
    /// Flavour name
    pub name: String,
    /// CPU quantity (e.g., "4", "500m")
    #[serde(deserialize_with = "quantity_string")]
    pub cpu: String,
    /// Memory quantity (e.g., "8Gi")
    #[serde(alias = "memory", deserialize_with = "quantity_string")]
    pub mem: String,
    /// Extended resources such as accelerators, by resource name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scalar_resources: BTreeMap<String, QuantityValue>,
}

/// Quantity authored as either a string or a bare YAML number
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(transparent)]
pub struct QuantityValue(pub String);

impl<'de> Deserialize<'de> for QuantityValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        quantity_string(deserializer).map(QuantityValue)
    }
}

fn quantity_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a quantity string or number, found {}",
            other
        ))),
    }
}

impl FlavourSpec {
    /// Parse quantities into a [`Flavour`]
    pub fn to_flavour(&self) -> Result<Flavour> {
        let mut resources = ResourceList::new();
        let bad = |e: String| Error::invalid_resource(&self.name, crate::error::UNKNOWN_CONTEXT, e);

        resources.insert_quantity(CPU, &self.cpu).map_err(bad)?;
        resources.insert_quantity(MEMORY, &self.mem).map_err(bad)?;
        for (name, qty) in &self.scalar_resources {
            if name == CPU || name == MEMORY {
                return Err(bad(format!(
                    "{} must not be listed under scalarResources",
                    name
                )));
            }
            resources.insert_quantity(name, &qty.0).map_err(bad)?;
        }

        Ok(Flavour {
            name: self.name.clone(),
            resources,
        })
    }
}

#[derive(Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    flavours: Vec<FlavourSpec>,
}

/// In-memory flavour catalog
#[derive(Clone, Debug, Default)]
pub struct FlavourCatalog {
    flavours: BTreeMap<String, Flavour>,
}

impl FlavourCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from authored entries
    ///
    /// Duplicate names and malformed quantities are rejected up front so a bad
    /// catalog never surfaces as a per-job error.
    pub fn from_specs(specs: impl IntoIterator<Item = FlavourSpec>) -> Result<Self> {
        let mut catalog = Self::new();
        for spec in specs {
            let flavour = spec.to_flavour()?;
            if catalog.flavours.contains_key(&flavour.name) {
                return Err(Error::validation_for_field(
                    "flavours",
                    format!("flavour '{}' is defined more than once", flavour.name),
                ));
            }
            catalog.flavours.insert(flavour.name.clone(), flavour);
        }
        debug!(flavours = catalog.len(), "loaded flavour catalog");
        Ok(catalog)
    }

    /// Build a catalog from a YAML document with a top-level `flavours` list
    pub fn from_yaml(input: &str) -> Result<Self> {
        let value = yaml::parse_yaml(input, "flavour catalog")?;
        let doc: CatalogDocument = serde_json::from_value(value)
            .map_err(|e| Error::serialization_for_kind("FlavourCatalog", e.to_string()))?;
        Self::from_specs(doc.flavours)
    }

    /// Add or replace a flavour
    pub fn insert(&mut self, flavour: Flavour) {
        self.flavours.insert(flavour.name.clone(), flavour);
    }

    /// Number of flavours
    pub fn len(&self) -> usize {
        self.flavours.len()
    }

    /// True if the catalog has no flavours
    pub fn is_empty(&self) -> bool {
        self.flavours.is_empty()
    }
}

impl FlavourResolver for FlavourCatalog {
    fn resolve(&self, name: &str) -> Result<Flavour> {
        self.flavours
            .get(name)
            .cloned()
            .ok_or_else(|| Error::unknown_flavour(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::NVIDIA_GPU;

    const CATALOG: &str = r#"
flavours:
  - name: cpu
    cpu: 4
    mem: 8Gi
  - name: gpu
    cpu: "8"
    mem: 32Gi
    scalarResources:
      nvidia.com/gpu: 1
  - name: small
    cpu: 0.5
    memory: 512Mi
"#;

    #[test]
    fn catalog_from_yaml() {
        let catalog = FlavourCatalog::from_yaml(CATALOG).unwrap();
        assert_eq!(catalog.len(), 3);

        let gpu = catalog.resolve("gpu").unwrap();
        assert_eq!(gpu.resources.get(CPU), Some(8000));
        assert_eq!(gpu.resources.get(MEMORY), Some(32 << 30));
        assert_eq!(gpu.resources.get(NVIDIA_GPU), Some(1));

        let cpu = catalog.resolve("cpu").unwrap();
        assert_eq!(cpu.resources.get(NVIDIA_GPU), None);

        let small = catalog.resolve("small").unwrap();
        assert_eq!(small.resources.get(CPU), Some(500));
        assert_eq!(small.resources.get(MEMORY), Some(512 << 20));
    }

    #[test]
    fn unknown_flavour_is_reported() {
        let catalog = FlavourCatalog::from_yaml(CATALOG).unwrap();
        let err = catalog.resolve("tpu").unwrap_err();
        assert!(matches!(err, Error::UnknownFlavour { ref flavour, .. } if flavour == "tpu"));
    }

    #[test]
    fn bad_quantity_fails_at_load() {
        let yaml = "flavours:\n  - name: broken\n    cpu: lots\n    mem: 1Gi\n";
        let err = FlavourCatalog::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, Error::InvalidResource { ref flavour, .. } if flavour == "broken"));
    }

    #[test]
    fn duplicate_names_rejected() {
        let yaml = "flavours:\n  - {name: a, cpu: 1, mem: 1Gi}\n  - {name: a, cpu: 2, mem: 1Gi}\n";
        assert!(matches!(
            FlavourCatalog::from_yaml(yaml),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn cpu_under_scalar_resources_rejected() {
        let spec = FlavourSpec {
            name: "odd".to_string(),
            cpu: "1".to_string(),
            mem: "1Gi".to_string(),
            scalar_resources: BTreeMap::from([(
                CPU.to_string(),
                QuantityValue("2".to_string()),
            )]),
        };
        assert!(spec.to_flavour().is_err());
    }

    #[test]
    fn mock_resolver_is_usable_as_trait_object() {
        let mut resolver = MockFlavourResolver::new();
        resolver.expect_resolve().returning(|name| {
            Ok(Flavour {
                name: name.to_string(),
                resources: ResourceList::new().with(CPU, 1000),
            })
        });
        let dyn_resolver: &dyn FlavourResolver = &resolver;
        assert_eq!(
            dyn_resolver.resolve("any").unwrap().resources.get(CPU),
            Some(1000)
        );
    }
}
