//! Cluster spec file parser.
//!
//! The file is TOML (or JSON when the path ends in `.json`). Parsing only
//! checks shape; range checks happen in [`crate::spec::ClusterSpec::load`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::AutoscalingMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub cluster_name: String,
    #[serde(default)]
    pub min_workers: u32,
    pub max_workers: u32,
    pub initial_workers: Option<u32>,
    #[serde(default)]
    pub autoscaling_mode: AutoscalingMode,
    pub target_utilization_fraction: f64,
    pub idle_timeout_minutes: u64,
    pub upscaling_speed: Option<f64>,
    pub provider: ProviderConfig,
    pub auth: AuthConfig,
    pub head_node: NodeTypeConfig,
    pub worker_nodes: NodeTypeConfig,
    #[serde(default)]
    pub setup_commands: Vec<String>,
    #[serde(default)]
    pub head_setup_commands: Vec<String>,
    #[serde(default)]
    pub worker_setup_commands: Vec<String>,
    pub autoscaler: Option<AutoscalerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub region: String,
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    pub ssh_user: String,
    pub ssh_private_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeTypeConfig {
    pub image_id: String,
    pub instance_type: String,
    #[serde(default)]
    pub block_device_mappings: Vec<BlockDeviceMapping>,
    pub market_options: Option<MarketOptions>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockDeviceMapping {
    pub device_name: String,
    pub volume_size_gb: u32,
    pub volume_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketOptions {
    /// e.g. "spot".
    pub market_type: String,
    pub max_price: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoscalerConfig {
    pub reconcile_interval_secs: Option<u64>,
    pub provider_timeout_secs: Option<u64>,
    pub alert_after_failures: Option<u32>,
    pub state_dir: Option<String>,
}

impl ClusterConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a minimal cluster file that runs against the local provider.
    pub fn scaffold(name: &str) -> Self {
        let node = |instance_type: &str| NodeTypeConfig {
            image_id: "local-image".to_string(),
            instance_type: instance_type.to_string(),
            block_device_mappings: vec![BlockDeviceMapping {
                device_name: "/dev/sda1".to_string(),
                volume_size_gb: 100,
                volume_type: None,
            }],
            market_options: None,
            tags: BTreeMap::new(),
        };
        ClusterConfig {
            cluster_name: name.to_string(),
            min_workers: 0,
            max_workers: 10,
            initial_workers: Some(2),
            autoscaling_mode: AutoscalingMode::Conservative,
            target_utilization_fraction: 0.8,
            idle_timeout_minutes: 5,
            upscaling_speed: None,
            provider: ProviderConfig {
                kind: "local".to_string(),
                region: "local".to_string(),
                availability_zone: None,
            },
            auth: AuthConfig {
                ssh_user: "ubuntu".to_string(),
                ssh_private_key: None,
            },
            head_node: node("m5.large"),
            worker_nodes: node("m5.xlarge"),
            setup_commands: Vec::new(),
            head_setup_commands: Vec::new(),
            worker_setup_commands: Vec::new(),
            autoscaler: Some(AutoscalerConfig {
                reconcile_interval_secs: Some(5),
                provider_timeout_secs: Some(30),
                alert_after_failures: Some(3),
                state_dir: None,
            }),
        }
    }
}
