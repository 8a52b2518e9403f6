use anyhow::{bail, Context};
use std::sync::Arc;
use tracing::info;

use crate::backend::{outputs_error, Backend, Command};
use crate::confpatch::{apply_xdr, XdrDestination, XdrOptions, XdrVersion};
use crate::error::DeployError;
use crate::fanout::{collect_node_results, map_limit};
use crate::types::{ClusterRole, FilePayload, NodeId, AEROSPIKE_CONF_PATH, VERSION_MARKER_PATH};

/// Directory holding the v4 digest log on source nodes
pub const XDR_WORK_DIR: &str = "/opt/aerospike/xdr";

#[derive(Debug, Clone)]
pub struct XdrConnectRequest {
    pub source: String,
    pub destinations: Vec<String>,
    pub namespaces: Vec<String>,
    /// `None` detects the dialect per node from the version marker
    pub version: Option<XdrVersion>,
    /// Destinations are connector clusters in the client namespace
    pub connector: bool,
    pub restart: bool,
    pub parallel: usize,
}

/// Wires XDR shipping from one source cluster to destination clusters
pub struct XdrConnector {
    backend: Arc<dyn Backend>,
}

impl XdrConnector {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Patch every source node's config, returning the nodes updated
    pub async fn connect(&self, req: &XdrConnectRequest) -> Result<Vec<NodeId>, DeployError> {
        let dest_role = if req.connector {
            ClusterRole::Client
        } else {
            ClusterRole::Server
        };

        if req.destinations.is_empty() {
            return Err(DeployError::validation("at least one destination is required"));
        }
        if req.namespaces.is_empty() {
            return Err(DeployError::validation("at least one namespace is required"));
        }
        let sources = self.backend.cluster_list(ClusterRole::Server).await?;
        if !sources.contains(&req.source) {
            return Err(DeployError::validation(format!(
                "source cluster {} does not exist",
                req.source
            )));
        }
        let available = self.backend.cluster_list(dest_role).await?;

        let mut destinations = Vec::with_capacity(req.destinations.len());
        for name in &req.destinations {
            if !available.contains(name) {
                return Err(DeployError::validation(format!(
                    "destination {} {} does not exist",
                    dest_role, name
                )));
            }
            let nodes = self.backend.node_list_in_cluster(dest_role, name).await?;
            let ips = self.backend.get_cluster_node_ips(dest_role, name).await?;
            if ips.len() != nodes.len() {
                return Err(DeployError::validation(format!(
                    "destination {} has {} nodes but only {} IPs, are all nodes running?",
                    name,
                    nodes.len(),
                    ips.len()
                )));
            }
            destinations.push(XdrDestination {
                name: name.clone(),
                endpoints: ips,
            });
        }

        let nodes = self
            .backend
            .node_list_in_cluster(ClusterRole::Server, &req.source)
            .await?;
        let mkdir: Vec<Command> = vec![vec![
            "mkdir".to_string(),
            "-p".to_string(),
            XDR_WORK_DIR.to_string(),
        ]];
        let outputs = self
            .backend
            .run_commands(ClusterRole::Server, &req.source, &mkdir, &nodes, req.parallel)
            .await?;
        outputs_error("create xdr directory", &outputs)?;

        let executor = self.backend.executor();
        let source: Arc<str> = Arc::from(req.source.as_str());
        let template = Arc::new(XdrOptions {
            version: req.version.unwrap_or(XdrVersion::V5),
            destinations,
            namespaces: req.namespaces.clone(),
            connector: req.connector,
        });
        let detect = req.version.is_none();

        let results = map_limit(nodes.clone(), req.parallel, move |node| {
            let executor = executor.clone();
            let source = source.clone();
            let template = template.clone();
            async move {
                let mut opts = (*template).clone();
                if detect {
                    let cat = vec!["cat".to_string(), VERSION_MARKER_PATH.to_string()];
                    let marker = executor
                        .run(ClusterRole::Server, &source, node, &[cat])
                        .await
                        .context("Failed to read server version")?;
                    opts.version = XdrVersion::for_server_version(&String::from_utf8_lossy(&marker));
                }
                if opts.version == XdrVersion::V4 && opts.connector {
                    bail!("connector destinations need server version 5 or later");
                }

                let cat = vec!["cat".to_string(), AEROSPIKE_CONF_PATH.to_string()];
                let conf = executor
                    .run(ClusterRole::Server, &source, node, &[cat])
                    .await
                    .context("Failed to read config")?;
                let patched = apply_xdr(&String::from_utf8_lossy(&conf), &opts)?;
                executor
                    .copy_files(
                        ClusterRole::Server,
                        &source,
                        node,
                        &[FilePayload::from_bytes(AEROSPIKE_CONF_PATH, patched)],
                    )
                    .await
            }
        })
        .await;
        collect_node_results("xdr config", &nodes, results)?;
        info!(
            "XDR connected: source={} destinations={:?} namespaces={:?}",
            req.source, req.destinations, req.namespaces
        );

        if req.restart {
            let restart: Vec<Command> = vec![vec![
                "service".to_string(),
                "aerospike".to_string(),
                "restart".to_string(),
            ]];
            let outputs = self
                .backend
                .run_commands(ClusterRole::Server, &req.source, &restart, &nodes, req.parallel)
                .await?;
            outputs_error("restart", &outputs)?;
        }
        Ok(nodes)
    }
}
