use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::confpatch::{apply_mesh, replace_private_access_addresses, seeds_for, SeedPolicy};
use crate::error::DeployError;
use crate::fanout::{collect_node_results, map_limit};
use crate::types::{ClusterRole, FilePayload, NodeId, AEROSPIKE_CONF_PATH};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixMeshReport {
    pub patched: Vec<NodeId>,
    /// Nodes with no IP, usually stopped
    pub skipped: Vec<NodeId>,
}

/// Rewrite mesh seeds on every node of `cluster` from the current IP list.
///
/// Private access addresses are moved to each node's current IP as well;
/// failing to do so only logs a warning.
pub async fn fix_mesh(
    backend: &Arc<dyn Backend>,
    cluster: &str,
    policy: SeedPolicy,
    parallel: usize,
) -> Result<FixMeshReport, DeployError> {
    let role = ClusterRole::Server;
    let nodes = backend.node_list_in_cluster(role, cluster).await?;
    if nodes.is_empty() {
        return Err(DeployError::validation(format!(
            "cluster {} does not exist",
            cluster
        )));
    }

    let node_ips = Arc::new(backend.get_node_ip_map(role, cluster, true).await?);
    let all_ips: Arc<Vec<String>> = Arc::new(node_ips.values().cloned().collect());
    let (targets, skipped): (Vec<NodeId>, Vec<NodeId>) =
        nodes.into_iter().partition(|n| node_ips.contains_key(n));
    for node in &skipped {
        warn!("Skipping node {} of {}: no IP", node, cluster);
    }

    let executor = backend.executor();
    let name: Arc<str> = Arc::from(cluster);
    let results = map_limit(targets.clone(), parallel, move |node| {
        let executor = executor.clone();
        let name = name.clone();
        let node_ips = node_ips.clone();
        let all_ips = all_ips.clone();
        async move {
            let ip = node_ips.get(&node).cloned().unwrap_or_default();
            let cat = vec!["cat".to_string(), AEROSPIKE_CONF_PATH.to_string()];
            let conf = executor
                .run(role, &name, node, &[cat])
                .await
                .context("Failed to read config")?;

            let seeds = seeds_for(&all_ips, Some(ip.as_str()), policy);
            let mut text = apply_mesh(&String::from_utf8_lossy(&conf), &seeds)?.text;
            match replace_private_access_addresses(&text, &ip) {
                Ok(fixed) => text = fixed,
                Err(e) => warn!("Could not fix access-address on node {}: {}", node, e),
            }
            executor
                .copy_files(
                    role,
                    &name,
                    node,
                    &[FilePayload::from_bytes(AEROSPIKE_CONF_PATH, text)],
                )
                .await
        }
    })
    .await;
    collect_node_results("fix mesh", &targets, results)?;

    info!("Mesh seeds refreshed on {} nodes of {}", targets.len(), cluster);
    Ok(FixMeshReport {
        patched: targets,
        skipped,
    })
}
