//! Workload definitions: operation mixes, benchmarks and the built-in suite

pub mod driver;
pub mod script;
pub mod template;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};
use crate::types::OpKind;

pub use driver::WorkloadDriver;
pub use script::parse_script;
pub use template::Template;

/// Tolerance when checking that mix weights sum to one
const WEIGHT_EPSILON: f64 = 1e-6;

/// Relative frequency of each operation kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperationMix {
    #[serde(default)]
    pub insert: f64,
    #[serde(default)]
    pub select: f64,
    #[serde(default)]
    pub update: f64,
    #[serde(default)]
    pub delete: f64,
}

impl OperationMix {
    pub fn new(insert: f64, select: f64, update: f64, delete: f64) -> Self {
        Self {
            insert,
            select,
            update,
            delete,
        }
    }

    /// A mix that only issues `kind`. `Statement` has no weight and yields an
    /// empty (invalid) mix.
    pub fn only(kind: OpKind) -> Self {
        let mut mix = Self::new(0.0, 0.0, 0.0, 0.0);
        match kind {
            OpKind::Insert => mix.insert = 1.0,
            OpKind::Select => mix.select = 1.0,
            OpKind::Update => mix.update = 1.0,
            OpKind::Delete => mix.delete = 1.0,
            OpKind::Statement => {}
        }
        mix
    }

    pub fn weight(&self, kind: OpKind) -> f64 {
        match kind {
            OpKind::Insert => self.insert,
            OpKind::Select => self.select,
            OpKind::Update => self.update,
            OpKind::Delete => self.delete,
            OpKind::Statement => 0.0,
        }
    }

    /// Weights must be finite, non-negative and sum to 1.0
    pub fn validate(&self) -> Result<()> {
        let weights = [self.insert, self.select, self.update, self.delete];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(BenchError::Config(format!(
                "operation mix weights must be non-negative numbers: {}",
                self
            )));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(BenchError::Config(format!(
                "operation mix weights must sum to 1.0, got {:.6} ({})",
                sum, self
            )));
        }
        Ok(())
    }

    /// Select an operation kind for a uniform draw `r` in `[0, 1)`
    pub fn select(&self, r: f64) -> OpKind {
        let mut cumulative = 0.0;

        cumulative += self.insert;
        if r < cumulative {
            return OpKind::Insert;
        }

        cumulative += self.select;
        if r < cumulative {
            return OpKind::Select;
        }

        cumulative += self.update;
        if r < cumulative {
            return OpKind::Update;
        }

        // Rounding can leave the last bucket a hair short; fall back to the
        // last kind that actually has weight.
        if self.delete > 0.0 {
            OpKind::Delete
        } else if self.update > 0.0 {
            OpKind::Update
        } else if self.select > 0.0 {
            OpKind::Select
        } else {
            OpKind::Insert
        }
    }
}

impl std::fmt::Display for OperationMix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "insert={},select={},update={},delete={}",
            self.insert, self.select, self.update, self.delete
        )
    }
}

impl FromStr for OperationMix {
    type Err = String;

    /// Parse `insert=0.8,select=0.2`. Kinds that are not named get weight 0.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut mix = Self::new(0.0, 0.0, 0.0, 0.0);
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = part
                .split_once('=')
                .ok_or_else(|| format!("expected kind=weight, got '{}'", part))?;
            let kind: OpKind = name.parse()?;
            let weight: f64 = value
                .trim()
                .parse()
                .map_err(|_| format!("invalid weight '{}' for {}", value.trim(), kind))?;
            match kind {
                OpKind::Insert => mix.insert = weight,
                OpKind::Select => mix.select = weight,
                OpKind::Update => mix.update = weight,
                OpKind::Delete => mix.delete = weight,
                OpKind::Statement => {
                    return Err("statements cannot be part of an operation mix".to_string())
                }
            }
        }
        Ok(mix)
    }
}

/// Whether a benchmark runs for the configured iterations or exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BenchMode {
    Loop,
    Once,
}

/// What a benchmark executes
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    /// Abstract CRUD operations drawn from a mix
    Mix(OperationMix),
    /// A statement template rendered once per iteration
    Script(Template),
}

/// A named unit of a suite. Each benchmark is one runner run and yields
/// one report.
#[derive(Debug, Clone, PartialEq)]
pub struct Benchmark {
    pub name: String,
    pub mode: BenchMode,
    /// Run alongside the next sequential benchmark instead of blocking it
    pub parallel: bool,
    pub workload: Workload,
}

impl Benchmark {
    pub fn mixed(name: impl Into<String>, mix: OperationMix) -> Self {
        Self {
            name: name.into(),
            mode: BenchMode::Loop,
            parallel: false,
            workload: Workload::Mix(mix),
        }
    }

    pub fn statement(name: impl Into<String>, mode: BenchMode, template: Template) -> Self {
        Self {
            name: name.into(),
            mode,
            parallel: false,
            workload: Workload::Script(template),
        }
    }

    pub fn is_script(&self) -> bool {
        matches!(self.workload, Workload::Script(_))
    }
}

/// Built-in suite shared by every backend: inserts, then selects, updates
/// and deletes over the rows the inserts created.
pub fn builtin_suite() -> Vec<Benchmark> {
    [
        ("inserts", OpKind::Insert),
        ("selects", OpKind::Select),
        ("updates", OpKind::Update),
        ("deletes", OpKind::Delete),
    ]
    .into_iter()
    .map(|(name, kind)| Benchmark::mixed(name, OperationMix::only(kind)))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mix() {
        let mix: OperationMix = "insert=0.8, selects=0.2".parse().unwrap();
        assert_eq!(mix, OperationMix::new(0.8, 0.2, 0.0, 0.0));
        assert!(mix.validate().is_ok());
    }

    #[test]
    fn test_parse_mix_rejects_garbage() {
        assert!("insert".parse::<OperationMix>().is_err());
        assert!("insert=abc".parse::<OperationMix>().is_err());
        assert!("statement=1.0".parse::<OperationMix>().is_err());
        assert!("merge=1.0".parse::<OperationMix>().is_err());
    }

    #[test]
    fn test_validate_sum() {
        assert!(OperationMix::new(0.5, 0.4, 0.0, 0.0).validate().is_err());
        assert!(OperationMix::new(0.5, 0.6, 0.0, 0.0).validate().is_err());
        assert!(OperationMix::new(-0.5, 1.5, 0.0, 0.0).validate().is_err());
        assert!(OperationMix::new(0.25, 0.25, 0.25, 0.25).validate().is_ok());
        assert!(OperationMix::only(OpKind::Statement).validate().is_err());
    }

    #[test]
    fn test_select_boundaries() {
        let mix = OperationMix::new(0.5, 0.5, 0.0, 0.0);
        assert_eq!(mix.select(0.0), OpKind::Insert);
        assert_eq!(mix.select(0.4999), OpKind::Insert);
        assert_eq!(mix.select(0.5), OpKind::Select);
        assert_eq!(mix.select(0.9999999), OpKind::Select);
        // Never picks a kind without weight, even past the last bucket
        assert_eq!(mix.select(1.0), OpKind::Select);
    }

    #[test]
    fn test_builtin_suite_order() {
        let names: Vec<_> = builtin_suite().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["inserts", "selects", "updates", "deletes"]);
    }
}
