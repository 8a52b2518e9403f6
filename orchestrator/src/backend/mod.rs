//! Provider-agnostic lifecycle contract and its adapters.

pub mod docker;
#[cfg(any(test, feature = "dev-stubs"))]
pub mod stub;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::error::{DeployError, NodeFailure};
use crate::fanout::map_limit;
use crate::shutdown::ShutdownRegistry;
use crate::types::{Arch, ClusterRole, ExtraParams, FilePayload, NodeId, TemplateKey};

/// One shell-free command as an argument vector
pub type Command = Vec<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Docker,
    Aws,
    Gcp,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Docker => write!(f, "docker"),
            BackendKind::Aws => write!(f, "aws"),
            BackendKind::Gcp => write!(f, "gcp"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(BackendKind::Docker),
            "aws" => Ok(BackendKind::Aws),
            "gcp" => Ok(BackendKind::Gcp),
            other => anyhow::bail!("Unknown backend type: {}", other),
        }
    }
}

/// Output of one node's command sequence
#[derive(Debug, Clone)]
pub struct NodeOutput {
    pub node: NodeId,
    pub output: Vec<u8>,
    pub error: Option<String>,
}

impl NodeOutput {
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.output).to_string()
    }
}

/// Single aggregated error over per-node outputs, if any node failed
pub fn outputs_error(step: &str, outputs: &[NodeOutput]) -> Result<(), DeployError> {
    let failures: Vec<NodeFailure> = outputs
        .iter()
        .filter_map(|o| {
            o.error.as_ref().map(|e| NodeFailure {
                node: o.node,
                error: e.clone(),
            })
        })
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(DeployError::distribution(step, failures))
    }
}

/// Runs work on a single node of a named cluster
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run commands in order on one node, returning combined output
    async fn run(
        &self,
        role: ClusterRole,
        cluster: &str,
        node: NodeId,
        commands: &[Command],
    ) -> Result<Vec<u8>>;

    /// Stream payloads to their destination paths on one node
    async fn copy_files(
        &self,
        role: ClusterRole,
        cluster: &str,
        node: NodeId,
        payloads: &[FilePayload],
    ) -> Result<()>;

    /// Run a command with the caller's terminal attached
    async fn attach_and_run(
        &self,
        role: ClusterRole,
        cluster: &str,
        node: NodeId,
        command: &[String],
        interactive: bool,
    ) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: String,
    pub driver: String,
    pub subnet: Option<String>,
}

/// Network management, offered only by some providers
#[async_trait]
pub trait NetworkAdmin: Send + Sync {
    async fn create_network(
        &self,
        name: &str,
        driver: Option<&str>,
        subnet: Option<&str>,
        mtu: Option<u32>,
    ) -> Result<()>;
    async fn list_networks(&self) -> Result<Vec<NetworkInfo>>;
    async fn delete_network(&self, name: &str) -> Result<()>;
}

/// Lifecycle contract every infrastructure adapter implements.
///
/// Every mutating call names one cluster or template and an explicit node
/// subset (`None` meaning every node). Adapters return errors rather than
/// logging and continuing.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Idempotent bootstrap, safe to call on every invocation
    async fn init(&self) -> Result<()>;

    async fn cluster_list(&self, role: ClusterRole) -> Result<Vec<String>>;
    async fn node_list_in_cluster(&self, role: ClusterRole, name: &str) -> Result<Vec<NodeId>>;

    async fn list_templates(&self) -> Result<Vec<TemplateKey>>;
    /// Build a template: one ephemeral instance runs `script` with `payloads`
    /// in place, then is snapshotted under `key` and removed.
    ///
    /// On failure the instance is kept so it can be inspected, and the caller
    /// owns its removal through [`Backend::vacuum_template`].
    /// `TemplateCache::ensure` does this unless `no_vacuum_on_fail` is set.
    async fn deploy_template(
        &self,
        key: &TemplateKey,
        script: &str,
        payloads: &[FilePayload],
        extra: &ExtraParams,
    ) -> Result<()>;
    /// Remove a leftover build instance for `key`
    async fn vacuum_template(&self, key: &TemplateKey) -> Result<()>;
    /// Remove every leftover build instance
    async fn vacuum_templates(&self) -> Result<()>;
    /// Remove a finished template image
    async fn template_destroy(&self, key: &TemplateKey) -> Result<()>;

    /// Create `count` new nodes from a template, numbered after existing ones
    async fn deploy_cluster(
        &self,
        role: ClusterRole,
        key: &TemplateKey,
        name: &str,
        count: usize,
        extra: &ExtraParams,
    ) -> Result<()>;
    async fn cluster_start(
        &self,
        role: ClusterRole,
        name: &str,
        nodes: Option<&[NodeId]>,
    ) -> Result<()>;
    async fn cluster_stop(
        &self,
        role: ClusterRole,
        name: &str,
        nodes: Option<&[NodeId]>,
    ) -> Result<()>;
    async fn cluster_destroy(
        &self,
        role: ClusterRole,
        name: &str,
        nodes: Option<&[NodeId]>,
    ) -> Result<()>;

    /// IPs of running nodes ordered by node id
    async fn get_cluster_node_ips(&self, role: ClusterRole, name: &str) -> Result<Vec<String>>;
    async fn get_node_ip_map(
        &self,
        role: ClusterRole,
        name: &str,
        internal: bool,
    ) -> Result<BTreeMap<NodeId, String>>;

    async fn is_system_arm(&self) -> Result<bool>;
    /// Architecture constraint, or `Arch::Either` to follow the host
    fn arch(&self) -> Arch;

    fn executor(&self) -> Arc<dyn RemoteExecutor>;

    fn network_admin(&self) -> Option<&dyn NetworkAdmin> {
        None
    }

    /// Run `commands` on every listed node, at most `limit` nodes at a time.
    ///
    /// Returns one output per node in `nodes` order. A node's failure is
    /// recorded in its output and does not stop the others.
    async fn run_commands(
        &self,
        role: ClusterRole,
        cluster: &str,
        commands: &[Command],
        nodes: &[NodeId],
        limit: usize,
    ) -> Result<Vec<NodeOutput>> {
        let executor = self.executor();
        let cluster: Arc<str> = Arc::from(cluster);
        let commands: Arc<[Command]> = Arc::from(commands.to_vec());

        let results = map_limit(nodes.to_vec(), limit, move |node| {
            let executor = executor.clone();
            let cluster = cluster.clone();
            let commands = commands.clone();
            async move { executor.run(role, &cluster, node, &commands).await }
        })
        .await;

        Ok(to_outputs(nodes, results))
    }

    /// Copy the same payloads to every listed node
    async fn copy_files_to_cluster(
        &self,
        role: ClusterRole,
        cluster: &str,
        payloads: &[FilePayload],
        nodes: &[NodeId],
        limit: usize,
    ) -> Result<Vec<NodeOutput>> {
        let executor = self.executor();
        let cluster: Arc<str> = Arc::from(cluster);
        let payloads: Arc<[FilePayload]> = Arc::from(payloads.to_vec());

        let results = map_limit(nodes.to_vec(), limit, move |node| {
            let executor = executor.clone();
            let cluster = cluster.clone();
            let payloads = payloads.clone();
            async move {
                executor
                    .copy_files(role, &cluster, node, &payloads)
                    .await
                    .map(|_| Vec::new())
            }
        })
        .await;

        Ok(to_outputs(nodes, results))
    }

    async fn attach_and_run(
        &self,
        role: ClusterRole,
        cluster: &str,
        node: NodeId,
        command: &[String],
        interactive: bool,
    ) -> Result<()> {
        self.executor()
            .attach_and_run(role, cluster, node, command, interactive)
            .await
    }
}

fn to_outputs(nodes: &[NodeId], results: Vec<Result<Vec<u8>>>) -> Vec<NodeOutput> {
    nodes
        .iter()
        .zip(results)
        .map(|(node, result)| match result {
            Ok(output) => NodeOutput {
                node: *node,
                output,
                error: None,
            },
            Err(e) => NodeOutput {
                node: *node,
                output: Vec::new(),
                error: Some(format!("{:#}", e)),
            },
        })
        .collect()
}

/// Turn a missing optional capability into an `Unsupported` error
pub fn require_network_admin<'a>(
    backend: &'a dyn Backend,
    operation: &str,
) -> Result<&'a dyn NetworkAdmin, DeployError> {
    backend
        .network_admin()
        .ok_or_else(|| DeployError::unsupported(backend.kind().to_string(), operation))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Force an architecture instead of following the host
    pub arch: Option<Arch>,
    /// Cloud region, ignored by local adapters
    pub region: Option<String>,
}

/// Build the adapter for the configured backend
pub fn select(
    config: &BackendConfig,
    shutdown: Arc<ShutdownRegistry>,
) -> Result<Arc<dyn Backend>, DeployError> {
    info!("Selecting backend: kind={}", config.kind);
    match config.kind {
        BackendKind::Docker => Ok(Arc::new(docker::DockerBackend::new(
            config.arch.unwrap_or(Arch::Either),
            shutdown,
        ))),
        other => Err(DeployError::unsupported(
            other.to_string(),
            "backend selection (adapter not built into this binary)",
        )),
    }
}
