use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::params::CollectiveParams;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectivesConfig {
    // built-in collectives to register, all of them when unset
    #[serde(default)]
    pub enabled: Option<Vec<String>>,
    // used when an all-reduce carries no subdivision offsets of its own
    #[serde(default = "default_ring_subdiv_offsets")]
    pub ring_subdiv_offsets: Vec<i64>,
}

fn default_ring_subdiv_offsets() -> Vec<i64> {
    vec![0]
}

impl Default for CollectivesConfig {
    fn default() -> Self {
        CollectivesConfig {
            enabled: None,
            ring_subdiv_offsets: default_ring_subdiv_offsets(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub collectives: CollectivesConfig,
}

impl Config {
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl CollectiveParams {
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let params = toml::from_str(&content)?;
        Ok(params)
    }
}
