//! `validate` and `scaffold` subcommands.

use std::path::Path;

use anyhow::{Context, bail};
use fleet_core::{ClusterConfig, ClusterSpec};
use fleetgrid_provider::AccessPolicy;
use tracing::info;

pub fn validate(config: &Path, policy: Option<&Path>) -> anyhow::Result<()> {
    let spec = ClusterSpec::from_file(config)
        .with_context(|| format!("invalid cluster spec {}", config.display()))?;

    println!("cluster:       {}", spec.cluster_name);
    println!("provider:      {} ({})", spec.provider.kind, spec.provider.region);
    println!(
        "workers:       min {} / initial {} / max {}",
        spec.min_workers, spec.initial_workers, spec.max_workers
    );
    println!("mode:          {:?}", spec.mode);
    println!("utilization:   {}", spec.target_utilization);
    println!("idle timeout:  {}s", spec.idle_timeout.as_secs());

    if let Some(path) = policy {
        let policy = AccessPolicy::from_file(path)
            .with_context(|| format!("invalid access policy {}", path.display()))?;
        let missing = policy.missing_actions();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|a| a.iam_action()).collect();
            bail!("access policy does not grant: {}", names.join(", "));
        }
        println!("policy:        all required actions granted");
    }

    info!(cluster = %spec.cluster_name, "cluster spec valid");
    Ok(())
}

pub fn scaffold(name: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let content = ClusterConfig::scaffold(name).to_toml_string()?;
    match output {
        Some(path) => {
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            std::fs::write(path, content)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "cluster spec written");
        }
        None => print!("{content}"),
    }
    Ok(())
}
