use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use scenario_schema::AgentAttributes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::region::DEFAULT_REGION_SIZE;
use crate::stitching::RetryPolicy;

pub const BUILTIN_LARGE_INIT_CONFIG: &str = include_str!("data/large_init_config.json");

pub const CONFIG_PATH_ENV: &str = "LARGE_INIT_CONFIG_PATH";

/// Tunables for grid layout, allocation and stitching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LargeInitConfig {
    /// Edge length of each square region.
    pub region_size: f64,
    /// Extra width added to a region's square when collecting agents from
    /// neighbouring regions as conditioning context.
    pub fov_buffer: f64,
    /// One extra initialize attempt per this many regions in the batch.
    pub attempts_per_num_regions: usize,
    pub grid_stride: f64,
    pub default_agents_per_region: usize,
    /// Attributes appended for every agent the allocator assigns.
    pub default_vehicle: AgentAttributes,
    /// Pixels whose channel sum is at or below this are off-road.
    pub birdview_offroad_threshold: u16,
}

impl Default for LargeInitConfig {
    fn default() -> Self {
        Self {
            region_size: DEFAULT_REGION_SIZE,
            fov_buffer: 20.0,
            attempts_per_num_regions: 15,
            grid_stride: 50.0,
            default_agents_per_region: 10,
            default_vehicle: AgentAttributes::new(4.5, 1.9, 1.35),
            birdview_offroad_threshold: 0,
        }
    }
}

impl LargeInitConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_LARGE_INIT_CONFIG)
                .expect("builtin large init config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, LargeInitConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|source| LargeInitConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        let config = LargeInitConfig::from_json_str(&contents)?;
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts_per_num_regions)
    }
}

#[derive(Debug, Error)]
pub enum LargeInitConfigError {
    #[error("failed to parse large init config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read large init config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Load the config named by `LARGE_INIT_CONFIG_PATH`, falling back to the
/// builtin copy when the variable is unset or the file is unusable.
pub fn load_large_init_config_from_env() -> (Arc<LargeInitConfig>, Option<PathBuf>) {
    let Some(path) = env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from) else {
        tracing::info!(
            target: "large_init::config",
            "large_init_config.loaded=builtin"
        );
        return (LargeInitConfig::builtin(), None);
    };

    match LargeInitConfig::from_file(&path) {
        Ok(config) => {
            tracing::info!(
                target: "large_init::config",
                path = %path.display(),
                "large_init_config.loaded=file"
            );
            (Arc::new(config), Some(path))
        }
        Err(err) => {
            tracing::warn!(
                target: "large_init::config",
                path = %path.display(),
                error = %err,
                "large_init_config.load_failed"
            );
            (LargeInitConfig::builtin(), None)
        }
    }
}
