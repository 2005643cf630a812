//! Ledger configuration.

use crate::error::{LedgerError, Result};
use crate::types::ProductType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Expected output mass per unit of input mass, keyed by
/// `(input product, output product)`.
#[derive(Clone, Debug, PartialEq)]
pub struct YieldTable {
    factors: BTreeMap<(ProductType, ProductType), f64>,
}

/// Serialized form of a yield-table row.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct YieldEntry {
    from: ProductType,
    to: ProductType,
    factor: f64,
}

impl YieldTable {
    /// An empty table: no transformation is yield-checked.
    pub fn empty() -> Self {
        Self {
            factors: BTreeMap::new(),
        }
    }

    /// Typical mill and refinery extraction rates.
    pub fn palm_oil_defaults() -> Self {
        let mut table = Self::empty();
        table.set(ProductType::Ffb, ProductType::Cpo, 0.20);
        table.set(ProductType::Ffb, ProductType::PalmKernel, 0.05);
        table.set(ProductType::PalmKernel, ProductType::Pko, 0.45);
        table.set(ProductType::PalmKernel, ProductType::Pkc, 0.50);
        table.set(ProductType::Cpo, ProductType::Rbdpo, 0.95);
        table.set(ProductType::Cpo, ProductType::Pfad, 0.045);
        table
    }

    pub fn set(&mut self, input: ProductType, output: ProductType, factor: f64) {
        self.factors.insert((input, output), factor);
    }

    pub fn get(&self, input: ProductType, output: ProductType) -> Option<f64> {
        self.factors.get(&(input, output)).copied()
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    fn validate(&self) -> Result<()> {
        for (&(from, to), &factor) in &self.factors {
            if !factor.is_finite() || factor <= 0.0 {
                return Err(LedgerError::Validation(format!(
                    "yield factor {} -> {} must be a positive number, got {}",
                    from, to, factor
                )));
            }
        }
        Ok(())
    }
}

impl Default for YieldTable {
    fn default() -> Self {
        Self::palm_oil_defaults()
    }
}

impl Serialize for YieldTable {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let entries: Vec<YieldEntry> = self
            .factors
            .iter()
            .map(|(&(from, to), &factor)| YieldEntry { from, to, factor })
            .collect();
        entries.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for YieldTable {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let entries = Vec::<YieldEntry>::deserialize(deserializer)?;
        let mut table = YieldTable::empty();
        for entry in entries {
            table.set(entry.from, entry.to, entry.factor);
        }
        Ok(table)
    }
}

/// Ledger configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Directory for the durable event log. `None` keeps the ledger in memory.
    pub path: Option<PathBuf>,

    /// Sync the log file every N committed batches.
    pub sync_interval: u64,

    /// Allowed imbalance as a fraction of total input.
    pub tolerance_ratio: f64,

    /// Maximum lineage distance walked from the validated chain.
    pub max_traversal_depth: usize,

    /// Maximum number of chains examined by one validation.
    pub max_traversal_nodes: usize,

    /// How long a mutation waits for chain locks before giving up.
    pub lock_timeout_ms: u64,

    /// Buffer size for notification subscriptions.
    pub notification_buffer: usize,

    /// Expected yields used to judge transformations.
    pub yields: YieldTable,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: None,
            sync_interval: 1,
            tolerance_ratio: 0.005,
            max_traversal_depth: 256,
            max_traversal_nodes: 10_000,
            lock_timeout_ms: 2_000,
            notification_buffer: 1_000,
            yields: YieldTable::default(),
        }
    }
}

impl LedgerConfig {
    /// In-memory ledger with default settings.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Durable ledger stored under `path`.
    pub fn durable(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: LedgerConfig = serde_json::from_str(json)
            .map_err(|e| LedgerError::Validation(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.tolerance_ratio.is_finite() || !(0.0..1.0).contains(&self.tolerance_ratio) {
            return Err(LedgerError::Validation(format!(
                "tolerance_ratio must be in [0, 1), got {}",
                self.tolerance_ratio
            )));
        }
        if self.max_traversal_depth == 0 || self.max_traversal_nodes == 0 {
            return Err(LedgerError::Validation(
                "traversal limits must be positive".into(),
            ));
        }
        if self.notification_buffer == 0 {
            return Err(LedgerError::Validation(
                "notification_buffer must be positive".into(),
            ));
        }
        self.yields.validate()
    }
}
