use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::backend::Backend;
use crate::error::DeployError;
use crate::types::{ClusterRole, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterSummary {
    pub name: String,
    pub role: ClusterRole,
    pub nodes: Vec<NodeId>,
    /// Internal IPs of running nodes, in node order
    pub ips: Vec<String>,
}

/// Start, stop, destroy, list and attach for existing clusters
pub struct ClusterLifecycle {
    backend: Arc<dyn Backend>,
}

impl ClusterLifecycle {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub async fn list(&self, role: ClusterRole) -> Result<Vec<ClusterSummary>, DeployError> {
        let mut summaries = Vec::new();
        for name in self.backend.cluster_list(role).await? {
            let nodes = self.backend.node_list_in_cluster(role, &name).await?;
            let ips = self.backend.get_cluster_node_ips(role, &name).await?;
            summaries.push(ClusterSummary {
                name,
                role,
                nodes,
                ips,
            });
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    pub async fn start(
        &self,
        role: ClusterRole,
        name: &str,
        nodes: Option<&[NodeId]>,
    ) -> Result<(), DeployError> {
        self.require(role, name, nodes).await?;
        self.backend.cluster_start(role, name, nodes).await?;
        info!("Started {} cluster {} nodes={:?}", role, name, nodes);
        Ok(())
    }

    pub async fn stop(
        &self,
        role: ClusterRole,
        name: &str,
        nodes: Option<&[NodeId]>,
    ) -> Result<(), DeployError> {
        self.require(role, name, nodes).await?;
        self.backend.cluster_stop(role, name, nodes).await?;
        info!("Stopped {} cluster {} nodes={:?}", role, name, nodes);
        Ok(())
    }

    pub async fn destroy(
        &self,
        role: ClusterRole,
        name: &str,
        nodes: Option<&[NodeId]>,
    ) -> Result<(), DeployError> {
        self.require(role, name, nodes).await?;
        self.backend.cluster_destroy(role, name, nodes).await?;
        info!("Destroyed {} cluster {} nodes={:?}", role, name, nodes);
        Ok(())
    }

    /// Run a command on one node with the terminal attached
    pub async fn attach(
        &self,
        role: ClusterRole,
        name: &str,
        node: NodeId,
        command: &[String],
        interactive: bool,
    ) -> Result<(), DeployError> {
        self.require(role, name, Some(&[node][..])).await?;
        self.backend
            .attach_and_run(role, name, node, command, interactive)
            .await?;
        Ok(())
    }

    /// The cluster must exist and contain every requested node
    async fn require(
        &self,
        role: ClusterRole,
        name: &str,
        nodes: Option<&[NodeId]>,
    ) -> Result<(), DeployError> {
        let existing = self.backend.node_list_in_cluster(role, name).await?;
        if existing.is_empty() {
            return Err(DeployError::validation(format!(
                "{} cluster {} does not exist",
                role, name
            )));
        }
        if let Some(missing) = nodes
            .unwrap_or_default()
            .iter()
            .find(|n| !existing.contains(n))
        {
            return Err(DeployError::validation(format!(
                "node {} is not part of cluster {}",
                missing, name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::stub::StubBackend;

    #[tokio::test]
    async fn test_stop_start_destroy_subset() {
        let stub = Arc::new(StubBackend::new());
        stub.seed_cluster(ClusterRole::Server, "dc1", 3, "");
        let lifecycle = ClusterLifecycle::new(stub.clone());

        lifecycle
            .stop(ClusterRole::Server, "dc1", Some(&[NodeId(2)][..]))
            .await
            .unwrap();
        let listed = lifecycle.list(ClusterRole::Server).await.unwrap();
        assert_eq!(listed[0].nodes.len(), 3);
        assert_eq!(listed[0].ips, vec!["172.17.0.2", "172.17.0.4"]);

        lifecycle.start(ClusterRole::Server, "dc1", None).await.unwrap();
        assert!(stub.node(ClusterRole::Server, "dc1", NodeId(2)).unwrap().running);

        lifecycle
            .destroy(ClusterRole::Server, "dc1", Some(&[NodeId(3)][..]))
            .await
            .unwrap();
        let listed = lifecycle.list(ClusterRole::Server).await.unwrap();
        assert_eq!(listed[0].nodes, vec![NodeId(1), NodeId(2)]);

        lifecycle.destroy(ClusterRole::Server, "dc1", None).await.unwrap();
        assert!(lifecycle.list(ClusterRole::Server).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_cluster_or_node_is_rejected() {
        let stub = Arc::new(StubBackend::new());
        stub.seed_cluster(ClusterRole::Client, "tools", 1, "");
        let lifecycle = ClusterLifecycle::new(stub.clone());

        let err = lifecycle
            .destroy(ClusterRole::Server, "tools", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("server cluster tools does not exist"));

        let err = lifecycle
            .attach(ClusterRole::Client, "tools", NodeId(4), &["ls".to_string()], false)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Validation(_)));

        lifecycle
            .attach(ClusterRole::Client, "tools", NodeId(1), &["ls".to_string()], false)
            .await
            .unwrap();
    }
}
