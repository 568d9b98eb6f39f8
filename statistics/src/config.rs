use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt};

use crate::error::{ConfigJsonSnafu, InvalidConfigSnafu};
use crate::Result;

/// Knobs used when collecting and building statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Target number of histogram buckets.
    pub num_buckets: usize,
    /// Maximum number of explicit frequent values.
    pub num_topn: usize,
    /// Reservoir capacity per column.
    pub max_sample_size: usize,
    /// Hash set capacity of the distinct-count sketch.
    pub max_fm_sketch_size: usize,
    pub cm_sketch_depth: usize,
    pub cm_sketch_width: usize,
    /// Fixes the reservoir RNG so samples are reproducible.
    pub sample_seed: Option<u64>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            num_buckets: 256,
            num_topn: 100,
            max_sample_size: 10_000,
            max_fm_sketch_size: 10_000,
            cm_sketch_depth: 5,
            cm_sketch_width: 2048,
            sample_seed: None,
        }
    }
}

impl StatsConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context(ConfigJsonSnafu)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.num_buckets > 0,
            InvalidConfigSnafu {
                message: "num_buckets must be positive"
            }
        );
        ensure!(
            self.max_sample_size > 0,
            InvalidConfigSnafu {
                message: "max_sample_size must be positive"
            }
        );
        ensure!(
            self.max_fm_sketch_size > 0,
            InvalidConfigSnafu {
                message: "max_fm_sketch_size must be positive"
            }
        );
        ensure!(
            self.cm_sketch_depth > 0 && self.cm_sketch_width > 0,
            InvalidConfigSnafu {
                message: format!(
                    "count-min sketch dimensions must be positive, got {}x{}",
                    self.cm_sketch_depth, self.cm_sketch_width
                )
            }
        );
        Ok(())
    }
}
