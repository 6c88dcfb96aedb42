//! Resource quantities in exact integer units
//!
//! Kubernetes quantity strings are parsed into base units without going through
//! floating point: CPU in millicores, memory in bytes, everything else (GPUs and
//! other extended resources) as a plain count. Sums and products are checked so
//! an aggregate can never silently wrap.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};

/// Resource name for CPU
pub const CPU: &str = "cpu";

/// Resource name for memory
pub const MEMORY: &str = "memory";

/// Default extended resource name for accelerators
pub const NVIDIA_GPU: &str = "nvidia.com/gpu";

/// Base unit a resource is counted in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceUnit {
    /// Thousandths of a core
    Millicores,
    /// Bytes
    Bytes,
    /// Whole devices
    Count,
}

impl ResourceUnit {
    /// Unit used for the named resource
    pub fn for_resource(name: &str) -> Self {
        match name {
            CPU => Self::Millicores,
            MEMORY => Self::Bytes,
            _ => Self::Count,
        }
    }

    /// Parse a quantity string into this unit
    pub fn parse(self, qty: &str) -> Result<u64, String> {
        match self {
            Self::Millicores => parse_cpu_millis(qty),
            Self::Bytes => parse_memory_bytes(qty),
            Self::Count => parse_count(qty),
        }
    }

    /// Render an amount in this unit as a quantity string
    pub fn format(self, amount: u64) -> String {
        match self {
            Self::Millicores => format_cpu_millis(amount),
            Self::Bytes => format_memory_bytes(amount),
            Self::Count => amount.to_string(),
        }
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// A non-negative decimal literal as `digits / 10^scale`
struct Decimal {
    digits: u128,
    scale: u32,
}

impl Decimal {
    fn parse(s: &str) -> Option<Self> {
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return None;
        }
        let scale = u32::try_from(frac_part.len()).ok()?;
        let mut digits: u128 = 0;
        for c in int_part.chars().chain(frac_part.chars()) {
            digits = digits
                .checked_mul(10)?
                .checked_add(u128::from(c.to_digit(10)?))?;
        }
        Some(Self { digits, scale })
    }

    /// Multiply by `factor`; `None` unless the result is a whole number
    fn times_exact(&self, factor: u128) -> Option<u128> {
        let divisor = 10u128.checked_pow(self.scale)?;
        let numerator = self.digits.checked_mul(factor)?;
        if numerator % divisor != 0 {
            return None;
        }
        Some(numerator / divisor)
    }
}

fn to_u64(v: u128, qty: &str) -> Result<u64, String> {
    u64::try_from(v).map_err(|_| format!("quantity '{}' is too large", qty))
}

/// Parse a CPU quantity ("100m", "1", "0.5", "2.25") into millicores
pub fn parse_cpu_millis(qty: &str) -> Result<u64, String> {
    let qty = qty.trim();
    let invalid = || {
        format!(
            "invalid cpu quantity '{}' (expected e.g., '100m', '1', '0.5')",
            qty
        )
    };

    if let Some(stripped) = qty.strip_suffix('m') {
        return stripped.parse::<u64>().map_err(|_| invalid());
    }

    let decimal = Decimal::parse(qty).ok_or_else(invalid)?;
    let millis = decimal.times_exact(1000).ok_or_else(|| {
        format!(
            "cpu quantity '{}' is finer than one millicore",
            qty
        )
    })?;
    to_u64(millis, qty)
}

const MEMORY_SUFFIXES: &[(&str, u128)] = &[
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("Pi", 1 << 50),
    ("Ei", 1 << 60),
    ("k", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("E", 1_000_000_000_000_000_000),
];

/// Parse a memory quantity ("128Mi", "1.5Gi", "1G", "1000000") into bytes
pub fn parse_memory_bytes(qty: &str) -> Result<u64, String> {
    let qty = qty.trim();
    let invalid = || {
        format!(
            "invalid memory quantity '{}' (expected e.g., '128Mi', '1Gi')",
            qty
        )
    };

    // Binary suffixes are listed first so "Mi" is never read as "M" + garbage
    let (number, multiplier) = MEMORY_SUFFIXES
        .iter()
        .find_map(|(suffix, mult)| qty.strip_suffix(suffix).map(|n| (n, *mult)))
        .unwrap_or((qty, 1));

    let decimal = Decimal::parse(number).ok_or_else(invalid)?;
    let bytes = decimal
        .times_exact(multiplier)
        .ok_or_else(|| format!("memory quantity '{}' is not a whole number of bytes", qty))?;
    to_u64(bytes, qty)
}

/// Parse a device count ("1", "8")
pub fn parse_count(qty: &str) -> Result<u64, String> {
    qty.trim()
        .parse::<u64>()
        .map_err(|_| format!("invalid device count '{}' (expected a whole number)", qty))
}

// =============================================================================
// Formatting
// =============================================================================

/// Render millicores as "2" or "1500m"
pub fn format_cpu_millis(millis: u64) -> String {
    if millis % 1000 == 0 {
        (millis / 1000).to_string()
    } else {
        format!("{}m", millis)
    }
}

/// Render bytes with the largest binary suffix that divides them exactly
pub fn format_memory_bytes(bytes: u64) -> String {
    const BINARY: &[(&str, u64)] = &[
        ("Ei", 1 << 60),
        ("Pi", 1 << 50),
        ("Ti", 1 << 40),
        ("Gi", 1 << 30),
        ("Mi", 1 << 20),
        ("Ki", 1 << 10),
    ];
    if bytes == 0 {
        return "0".to_string();
    }
    BINARY
        .iter()
        .find(|(_, size)| bytes % size == 0)
        .map(|(suffix, size)| format!("{}{}", bytes / size, suffix))
        .unwrap_or_else(|| bytes.to_string())
}

// =============================================================================
// Resource List
// =============================================================================

/// Per-resource amounts in base units, keyed by Kubernetes resource name
///
/// Zero amounts are never stored, so a resource absent from every input stays
/// absent from any sum built from them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceList(BTreeMap<String, u64>);

impl ResourceList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an amount in base units; zero removes the entry
    pub fn insert(&mut self, name: impl Into<String>, amount: u64) {
        let name = name.into();
        if amount == 0 {
            self.0.remove(&name);
        } else {
            self.0.insert(name, amount);
        }
    }

    /// Builder form of [`ResourceList::insert`]
    pub fn with(mut self, name: impl Into<String>, amount: u64) -> Self {
        self.insert(name, amount);
        self
    }

    /// Parse and set a quantity string using the resource's unit
    pub fn insert_quantity(&mut self, name: &str, qty: &str) -> Result<(), String> {
        let amount = ResourceUnit::for_resource(name)
            .parse(qty)
            .map_err(|e| format!("{}: {}", name, e))?;
        self.insert(name, amount);
        Ok(())
    }

    /// Amount in base units, if present
    pub fn get(&self, name: &str) -> Option<u64> {
        self.0.get(name).copied()
    }

    /// True if no resource has a non-zero amount
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of distinct resources
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over `(name, amount)` in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Every amount multiplied by `factor`, or the resource that overflowed
    pub fn checked_scale(&self, factor: u64) -> Result<Self, String> {
        let mut out = BTreeMap::new();
        for (name, amount) in &self.0 {
            let scaled = amount
                .checked_mul(factor)
                .ok_or_else(|| format!("{} overflows when scaled by {}", name, factor))?;
            if scaled > 0 {
                out.insert(name.clone(), scaled);
            }
        }
        Ok(Self(out))
    }

    /// Add every amount of `other` into `self`, or the resource that overflowed
    pub fn checked_accumulate(&mut self, other: &ResourceList) -> Result<(), String> {
        for (name, amount) in &other.0 {
            let entry = self.0.entry(name.clone()).or_insert(0);
            *entry = entry
                .checked_add(*amount)
                .ok_or_else(|| format!("{} overflows when summed", name))?;
        }
        Ok(())
    }

    /// Render as Kubernetes quantity strings
    pub fn to_strings(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(name, amount)| {
                (
                    name.clone(),
                    ResourceUnit::for_resource(name).format(*amount),
                )
            })
            .collect()
    }

    /// Render as `k8s-openapi` quantities for container resource requirements
    pub fn to_quantities(&self) -> BTreeMap<String, Quantity> {
        self.to_strings()
            .into_iter()
            .map(|(name, qty)| (name, Quantity(qty)))
            .collect()
    }
}
