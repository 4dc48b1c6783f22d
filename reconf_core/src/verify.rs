//! Result Verifier - compares node reports to golden fixtures.
//!
//! A fixture is a YAML document holding an `expected_result` mapping from
//! node index to the report fields that must match:
//!
//! ```yaml
//! expected_result:
//!   0:
//!     finished: true
//!     finish_time: 1.11
//!     received: 5
//! ```
//!
//! Only listed fields are checked. Numbers match within [`FLOAT_TOLERANCE`].

use crate::engine::NodeReport;
use reconf_env::{SweepError, TopologyId};
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Absolute tolerance for numeric fields.
pub const FLOAT_TOLERANCE: f64 = 1e-6;

/// Expected report fields, by node then field name.
pub type ExpectedResult = BTreeMap<usize, BTreeMap<String, Value>>;

/// Compares expected results against a results directory.
pub trait ResultVerifier: Send + Sync {
    /// Returns every mismatch in order (empty = pass).
    ///
    /// Mismatches are results, not errors: `Err` is reserved for failing
    /// to read the fixture or the directory itself.
    fn verify(&self, expected: &ExpectedResult, results_dir: &Path) -> Result<Vec<String>, SweepError>;
}

/// A loaded fixture document.
#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    pub expected_result: ExpectedResult,
}

impl Fixture {
    /// Loads a fixture document.
    pub fn load(path: &Path) -> Result<Self, SweepError> {
        let raw = std::fs::read_to_string(path).map_err(|e| SweepError::io(path, e))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| SweepError::Serialization(format!("{}: {}", path.display(), e)))
    }

    /// Fixture path for a topology: `<dir>/<topology>.yaml`.
    pub fn path_for(dir: &Path, topology: TopologyId) -> PathBuf {
        dir.join(format!("{}.yaml", topology))
    }
}

/// Verifier reading the `node_<i>.yaml` reports written by the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureVerifier;

impl ResultVerifier for FixtureVerifier {
    fn verify(&self, expected: &ExpectedResult, results_dir: &Path) -> Result<Vec<String>, SweepError> {
        if !results_dir.is_dir() {
            return Err(SweepError::invalid(format!(
                "results directory {} does not exist",
                results_dir.display()
            )));
        }

        let mut errors = Vec::new();
        for (node, fields) in expected {
            let path = results_dir.join(NodeReport::file_name(*node));
            let actual: BTreeMap<String, Value> = match std::fs::read_to_string(&path) {
                Ok(raw) => serde_yaml::from_str(&raw).map_err(SweepError::serialization)?,
                Err(_) => {
                    errors.push(format!("node {}: no report at {}", node, path.display()));
                    continue;
                }
            };

            for (field, want) in fields {
                match actual.get(field) {
                    None => errors.push(format!("node {}: field `{}` missing from report", node, field)),
                    Some(got) if !values_match(want, got) => errors.push(format!(
                        "node {}: {} expected {}, got {}",
                        node,
                        field,
                        render(want),
                        render(got)
                    )),
                    Some(_) => {}
                }
            }
        }
        Ok(errors)
    }
}

fn values_match(want: &Value, got: &Value) -> bool {
    match (want, got) {
        (Value::Number(w), Value::Number(g)) => match (w.as_f64(), g.as_f64()) {
            (Some(w), Some(g)) => (w - g).abs() <= FLOAT_TOLERANCE,
            _ => w == g,
        },
        _ => want == got,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_else(|_| format!("{:?}", other)),
    }
}
