//! Validated cluster spec.
//!
//! [`ClusterSpec::load`] is the only way to build a spec from a raw
//! [`ClusterConfig`]. Every problem in the raw file is collected so the
//! operator sees all of them at once.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{
    AuthConfig, BlockDeviceMapping, ClusterConfig, MarketOptions, NodeTypeConfig, ProviderConfig,
};
use crate::error::ValidationError;
use crate::types::{AutoscalingMode, NodeRole};

const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 5;
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_ALERT_AFTER_FAILURES: u32 = 3;

/// Launch shape for one node role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTypeSpec {
    pub role: NodeRole,
    pub image_id: String,
    pub instance_type: String,
    pub block_device_mappings: Vec<BlockDeviceMapping>,
    pub market_options: Option<MarketOptions>,
    /// Extra provider tags applied at launch.
    pub tags: BTreeMap<String, String>,
    /// Shared setup commands followed by the role-specific ones.
    pub setup_commands: Vec<String>,
}

/// Loop tuning knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoscalerSettings {
    pub reconcile_interval: Duration,
    /// Deadline for a single provider call; expiry means "unknown outcome".
    pub provider_timeout: Duration,
    /// Consecutive failures of one action before an alert is raised.
    pub alert_after_failures: u32,
    pub state_dir: Option<PathBuf>,
}

impl Default for AutoscalerSettings {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
            provider_timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
            alert_after_failures: DEFAULT_ALERT_AFTER_FAILURES,
            state_dir: None,
        }
    }
}

/// Immutable, validated cluster spec.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSpec {
    pub cluster_name: String,
    pub min_workers: u32,
    pub max_workers: u32,
    /// Already clamped to `[min_workers, max_workers]`.
    pub initial_workers: u32,
    pub target_utilization: f64,
    pub idle_timeout: Duration,
    pub mode: AutoscalingMode,
    pub upscaling_speed: Option<f64>,
    pub provider: ProviderConfig,
    pub auth: AuthConfig,
    pub head: NodeTypeSpec,
    pub worker: NodeTypeSpec,
    pub settings: AutoscalerSettings,
}

impl ClusterSpec {
    /// Validate a raw config into a spec.
    pub fn load(raw: ClusterConfig) -> Result<Self, ValidationError> {
        let mut problems = Vec::new();

        if raw.cluster_name.trim().is_empty() {
            problems.push("cluster_name must not be empty".to_string());
        }
        if raw.cluster_name.contains(':') {
            problems.push(format!(
                "cluster_name must not contain ':', got {:?}",
                raw.cluster_name
            ));
        }
        if raw.min_workers > raw.max_workers {
            problems.push(format!(
                "min_workers ({}) exceeds max_workers ({})",
                raw.min_workers, raw.max_workers
            ));
        }
        let util = raw.target_utilization_fraction;
        if !(util > 0.0 && util <= 1.0) {
            problems.push(format!(
                "target_utilization_fraction must be in (0, 1], got {util}"
            ));
        }
        let idle_timeout_secs = raw.idle_timeout_minutes.checked_mul(60);
        if raw.idle_timeout_minutes == 0 {
            problems.push("idle_timeout_minutes must be > 0".to_string());
        } else if idle_timeout_secs.is_none() {
            problems.push(format!(
                "idle_timeout_minutes is too large, got {}",
                raw.idle_timeout_minutes
            ));
        }
        if let Some(speed) = raw.upscaling_speed
            && !(speed > 0.0 && speed.is_finite())
        {
            problems.push(format!("upscaling_speed must be > 0, got {speed}"));
        }
        if raw.provider.kind.trim().is_empty() {
            problems.push("provider.type must not be empty".to_string());
        }
        if raw.provider.region.trim().is_empty() {
            problems.push("provider.region must not be empty".to_string());
        }
        if raw.auth.ssh_user.trim().is_empty() {
            problems.push("auth.ssh_user must not be empty".to_string());
        }
        check_node_type("head_node", &raw.head_node, &mut problems);
        check_node_type("worker_nodes", &raw.worker_nodes, &mut problems);

        let tuning = raw.autoscaler.clone().unwrap_or_default();
        if tuning.reconcile_interval_secs == Some(0) {
            problems.push("autoscaler.reconcile_interval_secs must be > 0".to_string());
        }
        if tuning.provider_timeout_secs == Some(0) {
            problems.push("autoscaler.provider_timeout_secs must be > 0".to_string());
        }
        if tuning.alert_after_failures == Some(0) {
            problems.push("autoscaler.alert_after_failures must be > 0".to_string());
        }

        if !problems.is_empty() {
            return Err(ValidationError::Invalid(problems));
        }

        let initial_workers = raw
            .initial_workers
            .unwrap_or(raw.min_workers)
            .clamp(raw.min_workers, raw.max_workers);

        let head = node_type_spec(
            NodeRole::Head,
            raw.head_node,
            &raw.setup_commands,
            raw.head_setup_commands,
        );
        let worker = node_type_spec(
            NodeRole::Worker,
            raw.worker_nodes,
            &raw.setup_commands,
            raw.worker_setup_commands,
        );

        let defaults = AutoscalerSettings::default();
        let settings = AutoscalerSettings {
            reconcile_interval: tuning
                .reconcile_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_interval),
            provider_timeout: tuning
                .provider_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.provider_timeout),
            alert_after_failures: tuning
                .alert_after_failures
                .unwrap_or(defaults.alert_after_failures),
            state_dir: tuning.state_dir.map(PathBuf::from),
        };

        Ok(ClusterSpec {
            cluster_name: raw.cluster_name,
            min_workers: raw.min_workers,
            max_workers: raw.max_workers,
            initial_workers,
            target_utilization: util,
            idle_timeout: idle_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_default(),
            mode: raw.autoscaling_mode,
            upscaling_speed: raw.upscaling_speed,
            provider: raw.provider,
            auth: raw.auth,
            head,
            worker,
            settings,
        })
    }

    /// Read, parse, and validate a cluster spec file.
    pub fn from_file(path: &Path) -> Result<Self, ValidationError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ValidationError::Read(e.to_string()))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let raw: ClusterConfig = if is_json {
            serde_json::from_str(&content).map_err(|e| ValidationError::Parse(e.to_string()))?
        } else {
            ClusterConfig::from_toml_str(&content)
                .map_err(|e| ValidationError::Parse(e.to_string()))?
        };
        Self::load(raw)
    }

    /// Value of the cluster membership tag for this cluster's nodes.
    pub fn cluster_tag(&self) -> &str {
        &self.cluster_name
    }

    /// Clamp a worker count into `[min_workers, max_workers]`.
    pub fn clamp_workers(&self, n: u32) -> u32 {
        n.clamp(self.min_workers, self.max_workers)
    }
}

fn check_node_type(field: &str, node: &NodeTypeConfig, problems: &mut Vec<String>) {
    if node.image_id.trim().is_empty() {
        problems.push(format!("{field}.image_id must not be empty"));
    }
    if node.instance_type.trim().is_empty() {
        problems.push(format!("{field}.instance_type must not be empty"));
    }
    for mapping in &node.block_device_mappings {
        if mapping.volume_size_gb == 0 {
            problems.push(format!(
                "{field}.block_device_mappings[{}].volume_size_gb must be > 0",
                mapping.device_name
            ));
        }
    }
}

fn node_type_spec(
    role: NodeRole,
    raw: NodeTypeConfig,
    shared_setup: &[String],
    role_setup: Vec<String>,
) -> NodeTypeSpec {
    let mut setup_commands = shared_setup.to_vec();
    setup_commands.extend(role_setup);
    NodeTypeSpec {
        role,
        image_id: raw.image_id,
        instance_type: raw.instance_type,
        block_device_mappings: raw.block_device_mappings,
        market_options: raw.market_options,
        tags: raw.tags,
        setup_commands,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> ClusterConfig {
        let mut config = ClusterConfig::scaffold("tally");
        config.min_workers = 2;
        config.max_workers = 300;
        config.initial_workers = Some(10);
        config.setup_commands = vec!["echo shared".to_string()];
        config.worker_setup_commands = vec!["echo worker".to_string()];
        config
    }

    #[test]
    fn load_valid_spec() {
        let spec = ClusterSpec::load(raw()).unwrap();
        assert_eq!(spec.cluster_tag(), "tally");
        assert_eq!(spec.initial_workers, 10);
        assert_eq!(spec.idle_timeout, Duration::from_secs(300));
        assert_eq!(spec.settings.provider_timeout, Duration::from_secs(30));
        assert_eq!(spec.worker.role, NodeRole::Worker);
        assert_eq!(spec.worker.setup_commands, vec!["echo shared", "echo worker"]);
        assert_eq!(spec.head.setup_commands, vec!["echo shared"]);
    }

    #[test]
    fn initial_workers_is_clamped() {
        let mut config = raw();
        config.initial_workers = Some(1000);
        assert_eq!(ClusterSpec::load(config).unwrap().initial_workers, 300);

        let mut config = raw();
        config.initial_workers = Some(0);
        assert_eq!(ClusterSpec::load(config).unwrap().initial_workers, 2);

        let mut config = raw();
        config.initial_workers = None;
        assert_eq!(ClusterSpec::load(config).unwrap().initial_workers, 2);
    }

    #[test]
    fn min_above_max_rejected() {
        let mut config = raw();
        config.min_workers = 5;
        config.max_workers = 2;
        let err = ClusterSpec::load(config).unwrap_err();
        assert!(err.to_string().contains("min_workers (5) exceeds max_workers (2)"));
    }

    #[test]
    fn utilization_range_enforced() {
        for bad in [0.0, -0.5, 1.01, f64::NAN] {
            let mut config = raw();
            config.target_utilization_fraction = bad;
            assert!(ClusterSpec::load(config).is_err(), "accepted {bad}");
        }
        let mut config = raw();
        config.target_utilization_fraction = 1.0;
        assert!(ClusterSpec::load(config).is_ok());
    }

    #[test]
    fn zero_idle_timeout_rejected() {
        let mut config = raw();
        config.idle_timeout_minutes = 0;
        assert!(ClusterSpec::load(config).is_err());
    }

    #[test]
    fn oversized_idle_timeout_rejected() {
        let mut config = raw();
        config.idle_timeout_minutes = u64::MAX / 30;
        let err = ClusterSpec::load(config).unwrap_err();
        assert_eq!(err.problems().len(), 1);
        assert!(err.problems()[0].contains("idle_timeout_minutes"));

        let mut config = raw();
        config.idle_timeout_minutes = u64::MAX / 60;
        assert!(ClusterSpec::load(config).is_ok());
    }

    #[test]
    fn cluster_name_with_colon_rejected() {
        let mut config = raw();
        config.cluster_name = "prod:eu".to_string();
        let err = ClusterSpec::load(config).unwrap_err();
        assert!(err.to_string().contains("cluster_name must not contain ':'"));
    }

    #[test]
    fn empty_node_type_rejected() {
        let mut config = raw();
        config.worker_nodes.image_id = String::new();
        config.head_node.instance_type = " ".to_string();
        let err = ClusterSpec::load(config).unwrap_err();
        let problems = err.problems();
        assert_eq!(problems.len(), 2);
        assert!(problems.iter().any(|p| p.contains("worker_nodes.image_id")));
        assert!(problems.iter().any(|p| p.contains("head_node.instance_type")));
    }

    #[test]
    fn all_problems_reported_together() {
        let mut config = raw();
        config.cluster_name = String::new();
        config.idle_timeout_minutes = 0;
        config.upscaling_speed = Some(0.0);
        let err = ClusterSpec::load(config).unwrap_err();
        assert_eq!(err.problems().len(), 3);
    }

    #[test]
    fn from_file_maps_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.toml");
        std::fs::write(&path, "cluster_name = 42").unwrap();
        assert!(matches!(
            ClusterSpec::from_file(&path),
            Err(ValidationError::Parse(_))
        ));
        assert!(matches!(
            ClusterSpec::from_file(&dir.path().join("missing.toml")),
            Err(ValidationError::Read(_))
        ));
    }

    #[test]
    fn from_file_reads_scaffold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.toml");
        let toml_str = ClusterConfig::scaffold("disk").to_toml_string().unwrap();
        std::fs::write(&path, toml_str).unwrap();
        let spec = ClusterSpec::from_file(&path).unwrap();
        assert_eq!(spec.cluster_name, "disk");
        assert_eq!(spec.clamp_workers(50), 10);
    }

    #[test]
    fn from_file_reads_json_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.json");
        let config = ClusterConfig::scaffold("json-cluster");
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        let spec = ClusterSpec::from_file(&path).unwrap();
        assert_eq!(spec.cluster_name, "json-cluster");
    }
}
