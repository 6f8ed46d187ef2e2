use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::attr::Schema;

/// Parameters of a simplification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplifyConfig {
    /// Features with a smaller area than this get merged into a neighbor.
    pub area_lim: f64,
    /// Columns whose values a sliver takes over from its chosen neighbor.
    pub cat_cols: Vec<String>,
    /// Columns that must match for two features to merge; never rewritten.
    pub keep_cols: Vec<String>,
    /// Upper bound on scan/dissolve passes.
    pub max_passes: usize,
    /// Raster mean differences within this distance of the minimum count as a tie.
    pub tie_epsilon: f64,
    /// Drop empty geometries instead of carrying them through.
    pub drop_empty: bool,
}

impl Default for SimplifyConfig {
    fn default() -> Self {
        Self {
            area_lim: 0.0,
            cat_cols: Vec::new(),
            keep_cols: Vec::new(),
            max_passes: 100,
            tie_epsilon: 0.0,
            drop_empty: false,
        }
    }
}

impl SimplifyConfig {
    pub fn new(area_lim: f64, cat_cols: &[&str]) -> Self {
        Self {
            area_lim,
            cat_cols: cat_cols.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_keep_cols(mut self, keep_cols: &[&str]) -> Self {
        self.keep_cols = keep_cols.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Read a configuration from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Check the configuration against a layer schema, returning resolved
    /// `(category, keep)` column positions.
    pub(crate) fn validate(&self, schema: &Schema) -> Result<(Vec<usize>, Vec<usize>)> {
        ensure!(self.area_lim.is_finite() && self.area_lim >= 0.0,
            "area_lim must be a finite, non-negative number (got {})", self.area_lim);
        ensure!(!self.cat_cols.is_empty(), "at least one category column is required");
        ensure!(self.max_passes > 0, "max_passes must be positive");
        ensure!(self.tie_epsilon.is_finite() && self.tie_epsilon >= 0.0,
            "tie_epsilon must be a finite, non-negative number (got {})", self.tie_epsilon);

        let cat = schema.resolve(&self.cat_cols).context("Invalid category columns")?;
        let keep = schema.resolve(&self.keep_cols).context("Invalid keep columns")?;
        ensure!(!cat.iter().any(|c| keep.contains(c)), "a column cannot be both category and keep column");

        Ok((cat, keep))
    }
}

/// How quadrant inputs and outputs travel between the coordinator and workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Staging {
    /// Hand owned collections to worker threads directly.
    #[default]
    InMemory,
    /// Round-trip every quadrant through temporary shapefiles.
    Shapefile,
}

/// Parameters of the partitioned variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Width of the guard band along the inner quadrant edges, in CRS units.
    pub dist_lim: f64,
    pub staging: Staging,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self { dist_lim: 10_000.0, staging: Staging::InMemory }
    }
}

impl PartitionConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(self.dist_lim.is_finite() && self.dist_lim >= 0.0,
            "dist_lim must be a finite, non-negative number (got {})", self.dist_lim);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::ColumnType;

    fn schema() -> Schema {
        Schema::from_pairs([("cat", ColumnType::Text), ("owner", ColumnType::Text)])
    }

    #[test]
    fn validate_resolves_columns() {
        let cfg = SimplifyConfig::new(10.0, &["cat"]).with_keep_cols(&["owner"]);
        assert_eq!(cfg.validate(&schema()).unwrap(), (vec![0], vec![1]));
    }

    #[test]
    fn validate_rejects_bad_usage() {
        assert!(SimplifyConfig::new(10.0, &[]).validate(&schema()).is_err());
        assert!(SimplifyConfig::new(-1.0, &["cat"]).validate(&schema()).is_err());
        assert!(SimplifyConfig::new(f64::NAN, &["cat"]).validate(&schema()).is_err());
        assert!(SimplifyConfig::new(10.0, &["nope"]).validate(&schema()).is_err());
        assert!(SimplifyConfig::new(10.0, &["cat"]).with_keep_cols(&["cat"]).validate(&schema()).is_err());
    }

    #[test]
    fn json_config_fills_defaults() {
        let cfg: SimplifyConfig = serde_json::from_str(r#"{"area_lim": 5.0, "cat_cols": ["cat"]}"#).unwrap();
        assert_eq!(cfg.max_passes, 100);
        assert_eq!(cfg.tie_epsilon, 0.0);
        assert!(cfg.keep_cols.is_empty());

        let part: PartitionConfig = serde_json::from_str(r#"{"staging": "shapefile"}"#).unwrap();
        assert_eq!(part.dist_lim, 10_000.0);
        assert_eq!(part.staging, Staging::Shapefile);
    }
}
