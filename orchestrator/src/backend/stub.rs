//! In-memory backend for tests and local development.
//!
//! Nodes are records holding a file map and a command log. `cat <path>`
//! reads from the file map; every other command only gets logged. Failures
//! can be injected per node or per operation.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Backend, BackendKind, Command, RemoteExecutor};
use crate::installer::{Credentials, InstallerSource, Resolved};
use crate::types::{
    Arch, ClusterRole, ExtraParams, FilePayload, NodeId, TemplateKey, AEROSPIKE_CONF_PATH,
};

#[derive(Debug, Clone, Default)]
pub struct StubNode {
    pub running: bool,
    pub files: BTreeMap<String, Vec<u8>>,
    pub commands: Vec<Command>,
}

#[derive(Default)]
struct StubState {
    clusters: BTreeMap<(ClusterRole, String), BTreeMap<NodeId, StubNode>>,
    templates: Vec<TemplateKey>,
    /// Leftover build instances by template key
    build_instances: BTreeSet<String>,
    base_config: String,
    deploy_template_calls: usize,
    vacuum_calls: usize,
    fail_deploy_template: bool,
    fail_commands: BTreeSet<NodeId>,
    fail_copies: BTreeSet<NodeId>,
    fail_commands_matching: Option<String>,
}

#[derive(Clone, Default)]
struct Shared(Arc<Mutex<StubState>>);

impl Shared {
    fn lock(&self) -> MutexGuard<'_, StubState> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub struct StubBackend {
    state: Shared,
    executor: Arc<StubExecutor>,
    kind: BackendKind,
    arch: Arch,
    is_arm: bool,
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StubBackend {
    pub fn new() -> Self {
        let state = Shared::default();
        state.lock().base_config = "service {\n}\n".to_string();
        Self {
            executor: Arc::new(StubExecutor {
                state: state.clone(),
            }),
            state,
            kind: BackendKind::Docker,
            arch: Arch::Either,
            is_arm: false,
        }
    }

    /// Config text placed at the server config path of every new node
    pub fn with_base_config(self, config: &str) -> Self {
        self.state.lock().base_config = config.to_string();
        self
    }

    /// Report a different provider kind so kind-specific steps run
    pub fn with_kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_arch(mut self, arch: Arch, is_arm: bool) -> Self {
        self.arch = arch;
        self.is_arm = is_arm;
        self
    }

    /// Create a running cluster directly, bypassing templates
    pub fn seed_cluster(&self, role: ClusterRole, name: &str, count: u32, config: &str) {
        let mut state = self.state.lock();
        let nodes = state.clusters.entry((role, name.to_string())).or_default();
        for n in 1..=count {
            let mut node = StubNode {
                running: true,
                ..Default::default()
            };
            node.files
                .insert(AEROSPIKE_CONF_PATH.to_string(), config.as_bytes().to_vec());
            nodes.insert(NodeId(n), node);
        }
    }

    pub fn add_template(&self, key: TemplateKey) {
        self.state.lock().templates.push(key);
    }

    pub fn fail_deploy_template(&self) {
        self.state.lock().fail_deploy_template = true;
    }

    pub fn fail_commands_on(&self, node: NodeId) {
        self.state.lock().fail_commands.insert(node);
    }

    /// Fail any command whose joined argv contains `needle`
    pub fn fail_commands_matching(&self, needle: &str) {
        self.state.lock().fail_commands_matching = Some(needle.to_string());
    }

    pub fn fail_copies_on(&self, node: NodeId) {
        self.state.lock().fail_copies.insert(node);
    }

    pub fn deploy_template_calls(&self) -> usize {
        self.state.lock().deploy_template_calls
    }

    pub fn vacuum_calls(&self) -> usize {
        self.state.lock().vacuum_calls
    }

    pub fn build_instances(&self) -> Vec<String> {
        self.state.lock().build_instances.iter().cloned().collect()
    }

    pub fn templates(&self) -> Vec<TemplateKey> {
        self.state.lock().templates.clone()
    }

    pub fn node(&self, role: ClusterRole, cluster: &str, node: NodeId) -> Option<StubNode> {
        self.state
            .lock()
            .clusters
            .get(&(role, cluster.to_string()))
            .and_then(|nodes| nodes.get(&node).cloned())
    }

    /// Server node file content as text
    pub fn file(&self, cluster: &str, node: NodeId, path: &str) -> Option<String> {
        self.node(ClusterRole::Server, cluster, node)
            .and_then(|n| n.files.get(path).cloned())
            .map(|b| String::from_utf8_lossy(&b).to_string())
    }

    /// Commands run on a server node
    pub fn commands_run(&self, node: NodeId) -> Vec<Command> {
        let state = self.state.lock();
        state
            .clusters
            .iter()
            .filter(|((role, _), _)| *role == ClusterRole::Server)
            .filter_map(|(_, nodes)| nodes.get(&node))
            .flat_map(|n| n.commands.clone())
            .collect()
    }

    fn ip_of(node: NodeId) -> String {
        format!("172.17.0.{}", node.0 + 1)
    }

    fn with_nodes<F>(&self, role: ClusterRole, name: &str, nodes: Option<&[NodeId]>, f: F) -> Result<()>
    where
        F: Fn(&mut StubNode),
    {
        let mut state = self.state.lock();
        let cluster = state
            .clusters
            .get_mut(&(role, name.to_string()))
            .ok_or_else(|| anyhow!("Cluster {} not found", name))?;
        for (id, node) in cluster.iter_mut() {
            if nodes.map_or(true, |list| list.contains(id)) {
                f(node);
            }
        }
        Ok(())
    }
}

fn template_tag(key: &TemplateKey) -> String {
    key.to_string()
}

#[async_trait]
impl Backend for StubBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn cluster_list(&self, role: ClusterRole) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .clusters
            .keys()
            .filter(|(r, _)| *r == role)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn node_list_in_cluster(&self, role: ClusterRole, name: &str) -> Result<Vec<NodeId>> {
        Ok(self
            .state
            .lock()
            .clusters
            .get(&(role, name.to_string()))
            .map(|nodes| nodes.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn list_templates(&self) -> Result<Vec<TemplateKey>> {
        Ok(self.state.lock().templates.clone())
    }

    async fn deploy_template(
        &self,
        key: &TemplateKey,
        _script: &str,
        payloads: &[FilePayload],
        _extra: &ExtraParams,
    ) -> Result<()> {
        for payload in payloads {
            payload.read_all().await?;
        }
        let mut state = self.state.lock();
        state.deploy_template_calls += 1;
        if state.fail_deploy_template {
            state.build_instances.insert(template_tag(key));
            bail!("install script exited with status 1");
        }
        state.templates.push(key.clone());
        Ok(())
    }

    async fn vacuum_template(&self, key: &TemplateKey) -> Result<()> {
        let mut state = self.state.lock();
        state.vacuum_calls += 1;
        state.build_instances.remove(&template_tag(key));
        Ok(())
    }

    async fn vacuum_templates(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.vacuum_calls += 1;
        state.build_instances.clear();
        Ok(())
    }

    async fn template_destroy(&self, key: &TemplateKey) -> Result<()> {
        let mut state = self.state.lock();
        let before = state.templates.len();
        state.templates.retain(|t| !t.matches(key));
        if state.templates.len() == before {
            bail!("Template {} not found", key);
        }
        Ok(())
    }

    async fn deploy_cluster(
        &self,
        role: ClusterRole,
        key: &TemplateKey,
        name: &str,
        count: usize,
        _extra: &ExtraParams,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if !state.templates.iter().any(|t| t.matches(key)) {
            bail!("Template {} not found", key);
        }
        let config = state.base_config.clone().into_bytes();
        let nodes = state.clusters.entry((role, name.to_string())).or_default();
        let next = nodes.keys().last().map_or(1, |n| n.0 + 1);
        for n in next..next + count as u32 {
            let mut node = StubNode::default();
            node.files
                .insert(AEROSPIKE_CONF_PATH.to_string(), config.clone());
            nodes.insert(NodeId(n), node);
        }
        Ok(())
    }

    async fn cluster_start(
        &self,
        role: ClusterRole,
        name: &str,
        nodes: Option<&[NodeId]>,
    ) -> Result<()> {
        self.with_nodes(role, name, nodes, |n| n.running = true)
    }

    async fn cluster_stop(
        &self,
        role: ClusterRole,
        name: &str,
        nodes: Option<&[NodeId]>,
    ) -> Result<()> {
        self.with_nodes(role, name, nodes, |n| n.running = false)
    }

    async fn cluster_destroy(
        &self,
        role: ClusterRole,
        name: &str,
        nodes: Option<&[NodeId]>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let key = (role, name.to_string());
        let cluster = state
            .clusters
            .get_mut(&key)
            .ok_or_else(|| anyhow!("Cluster {} not found", name))?;
        match nodes {
            Some(list) => cluster.retain(|id, _| !list.contains(id)),
            None => cluster.clear(),
        }
        if cluster.is_empty() {
            state.clusters.remove(&key);
        }
        Ok(())
    }

    async fn get_cluster_node_ips(&self, role: ClusterRole, name: &str) -> Result<Vec<String>> {
        Ok(self
            .get_node_ip_map(role, name, true)
            .await?
            .into_values()
            .collect())
    }

    async fn get_node_ip_map(
        &self,
        role: ClusterRole,
        name: &str,
        _internal: bool,
    ) -> Result<BTreeMap<NodeId, String>> {
        let state = self.state.lock();
        Ok(state
            .clusters
            .get(&(role, name.to_string()))
            .map(|nodes| {
                nodes
                    .iter()
                    .filter(|(_, n)| n.running)
                    .map(|(id, _)| (*id, Self::ip_of(*id)))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn is_system_arm(&self) -> Result<bool> {
        Ok(self.is_arm)
    }

    fn arch(&self) -> Arch {
        self.arch
    }

    fn executor(&self) -> Arc<dyn RemoteExecutor> {
        self.executor.clone()
    }
}

pub struct StubExecutor {
    state: Shared,
}

#[async_trait]
impl RemoteExecutor for StubExecutor {
    async fn run(
        &self,
        role: ClusterRole,
        cluster: &str,
        node: NodeId,
        commands: &[Command],
    ) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        let fail_node = state.fail_commands.contains(&node);
        let fail_matching = state.fail_commands_matching.clone();
        let target = state
            .clusters
            .get_mut(&(role, cluster.to_string()))
            .and_then(|nodes| nodes.get_mut(&node))
            .ok_or_else(|| anyhow!("Node {} of {} not found", node, cluster))?;

        let mut output = Vec::new();
        for command in commands {
            target.commands.push(command.clone());
            if fail_node {
                bail!("command {:?} exited with status 1", command);
            }
            if let Some(needle) = &fail_matching {
                if command.join(" ").contains(needle.as_str()) {
                    bail!("command {:?} exited with status 1", command);
                }
            }
            if let [cat, path] = command.as_slice() {
                if cat == "cat" {
                    let content = target
                        .files
                        .get(path)
                        .ok_or_else(|| anyhow!("cat: {}: No such file or directory", path))?;
                    output.extend_from_slice(content);
                }
            }
        }
        Ok(output)
    }

    async fn copy_files(
        &self,
        role: ClusterRole,
        cluster: &str,
        node: NodeId,
        payloads: &[FilePayload],
    ) -> Result<()> {
        let mut contents = HashMap::new();
        for payload in payloads {
            contents.insert(payload.path.clone(), payload.read_all().await?);
        }

        let mut state = self.state.lock();
        if state.fail_copies.contains(&node) {
            bail!("copy to node {} failed: connection reset", node);
        }
        let target = state
            .clusters
            .get_mut(&(role, cluster.to_string()))
            .and_then(|nodes| nodes.get_mut(&node))
            .ok_or_else(|| anyhow!("Node {} of {} not found", node, cluster))?;
        target.files.extend(contents);
        Ok(())
    }

    async fn attach_and_run(
        &self,
        role: ClusterRole,
        cluster: &str,
        node: NodeId,
        command: &[String],
        _interactive: bool,
    ) -> Result<()> {
        self.run(role, cluster, node, &[command.to_vec()]).await.map(|_| ())
    }
}

/// Installer source that resolves patterns to fixed values and writes a
/// small placeholder archive
#[derive(Debug, Clone)]
pub struct StubInstallerSource {
    pub latest_version: String,
    pub latest_distro_version: String,
    downloads: Arc<Mutex<Vec<String>>>,
}

impl StubInstallerSource {
    pub fn new(latest_version: &str, latest_distro_version: &str) -> Self {
        Self {
            latest_version: latest_version.to_string(),
            latest_distro_version: latest_distro_version.to_string(),
            downloads: Arc::default(),
        }
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl InstallerSource for StubInstallerSource {
    async fn resolve(&self, key: &TemplateKey, _credentials: &Credentials) -> Result<Resolved> {
        let version = key.product_version();
        let mut resolved = key.clone();
        if version.needs_resolution() {
            resolved.version = format!("{}{}", self.latest_version, version.edition.suffix());
        }
        if resolved.distro_version == "latest" {
            resolved.distro_version = self.latest_distro_version.clone();
        }
        let url = format!("https://installers.invalid/{}", resolved.installer_file_name());
        Ok(Resolved { key: resolved, url })
    }

    async fn download(&self, url: &str, dest: &Path, _credentials: &Credentials) -> Result<()> {
        tokio::fs::write(dest, b"installer").await?;
        if let Ok(mut downloads) = self.downloads.lock() {
            downloads.push(url.to_string());
        }
        Ok(())
    }
}
