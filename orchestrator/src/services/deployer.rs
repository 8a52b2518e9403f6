//! Cluster create/grow state machine.

use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backend::{outputs_error, Backend, BackendKind, Command};
use crate::confpatch::{
    apply_mcast, apply_mesh, redirect_console_log, referenced_directories, seeds_for,
    set_access_addresses, set_cluster_name, SeedPolicy,
};
use crate::error::DeployError;
use crate::fanout::{collect_node_results, map_limit};
use crate::features::{select_features_file, FeaturesSelection};
use crate::template::TemplateCache;
use crate::types::{
    validate_cluster_name, Arch, ClusterRole, ExtraParams, FilePayload, HeartbeatMode, NodeId,
    TemplateKey, AEROSPIKE_CONF_PATH, MAX_CLUSTER_NODES, VERSION_MARKER_PATH,
};

pub const TOOLS_CONF_PATH: &str = "/etc/aerospike/astools.conf";
pub const FEATURES_CONF_PATH: &str = "/etc/aerospike/features.conf";
pub const EARLY_SCRIPT_PATH: &str = "/usr/local/bin/early.sh";
pub const LATE_SCRIPT_PATH: &str = "/usr/local/bin/late.sh";
/// Log file that replaces console logging on container backends
pub const CONTAINER_LOG_PATH: &str = "/var/log/aerospike.log";

// ============================================================================
// Request and Report Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeployState {
    Validating,
    TemplateResolving,
    Provisioning,
    Starting,
    ConfigPatching,
    FileStaging,
    PostProvisioning,
    ServiceStarting,
    Done,
    Aborted,
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Everything a create or grow needs
#[derive(Debug, Clone)]
pub struct ClusterSpec {
    pub name: String,
    /// Nodes to add
    pub node_count: usize,
    pub distro: String,
    pub distro_version: String,
    pub version: String,
    pub heartbeat: HeartbeatMode,
    pub multicast_address: Option<String>,
    pub multicast_port: Option<String>,
    pub seed_policy: SeedPolicy,
    pub custom_config: Option<PathBuf>,
    pub tools_config: Option<PathBuf>,
    pub features_file: Option<PathBuf>,
    pub early_script: Option<PathBuf>,
    pub late_script: Option<PathBuf>,
    pub skip_cluster_name: bool,
    pub autostart: bool,
    pub no_vacuum_on_fail: bool,
    /// Fan-out limit, 0 for sequential
    pub parallel: usize,
    pub extra: ExtraParams,
}

impl Default for ClusterSpec {
    fn default() -> Self {
        Self {
            name: "mydc".to_string(),
            node_count: 1,
            distro: "ubuntu".to_string(),
            distro_version: "latest".to_string(),
            version: "latest".to_string(),
            heartbeat: HeartbeatMode::Mesh,
            multicast_address: None,
            multicast_port: None,
            seed_policy: SeedPolicy::default(),
            custom_config: None,
            tools_config: None,
            features_file: None,
            early_script: None,
            late_script: None,
            skip_cluster_name: false,
            autostart: true,
            no_vacuum_on_fail: false,
            parallel: 50,
            extra: ExtraParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub operation_id: Uuid,
    pub cluster: String,
    pub new_nodes: Vec<NodeId>,
    pub template: TemplateKey,
    pub template_cache_hit: bool,
    /// Mesh transformations per new node
    pub heartbeat_transformations: BTreeMap<NodeId, u32>,
    pub warnings: Vec<String>,
    pub state: DeployState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Create,
    Grow,
}

struct Progress {
    op: Uuid,
    cluster: String,
    state: DeployState,
    warnings: Vec<String>,
}

impl Progress {
    fn enter(&mut self, next: DeployState) {
        info!(
            "[{}] cluster={} state {} -> {}",
            self.op, self.cluster, self.state, next
        );
        self.state = next;
    }

    fn warn(&mut self, msg: String) {
        warn!("[{}] cluster={} {}", self.op, self.cluster, msg);
        self.warnings.push(msg);
    }
}

// ============================================================================
// Deployer
// ============================================================================

pub struct ClusterDeployer {
    backend: Arc<dyn Backend>,
    templates: Arc<TemplateCache>,
}

impl ClusterDeployer {
    pub fn new(backend: Arc<dyn Backend>, templates: Arc<TemplateCache>) -> Self {
        Self { backend, templates }
    }

    /// Create a new cluster of `spec.node_count` nodes
    pub async fn create(&self, spec: &ClusterSpec) -> Result<DeployReport, DeployError> {
        self.deploy(spec, Mode::Create).await
    }

    /// Add `spec.node_count` nodes to an existing cluster
    pub async fn grow(&self, spec: &ClusterSpec) -> Result<DeployReport, DeployError> {
        self.deploy(spec, Mode::Grow).await
    }

    async fn deploy(&self, spec: &ClusterSpec, mode: Mode) -> Result<DeployReport, DeployError> {
        let mut progress = Progress {
            op: Uuid::new_v4(),
            cluster: spec.name.clone(),
            state: DeployState::Validating,
            warnings: Vec::new(),
        };
        info!(
            "[{}] {:?} cluster={} nodes={} version={} distro={}:{}",
            progress.op,
            mode,
            spec.name,
            spec.node_count,
            spec.version,
            spec.distro,
            spec.distro_version
        );

        match self.run(spec, mode, &mut progress).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(
                    "[{}] cluster={} aborted in state {}: {}",
                    progress.op, spec.name, progress.state, e
                );
                progress.state = DeployState::Aborted;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        spec: &ClusterSpec,
        mode: Mode,
        progress: &mut Progress,
    ) -> Result<DeployReport, DeployError> {
        let role = ClusterRole::Server;
        let backend = &self.backend;

        self.validate(spec, mode).await?;

        progress.enter(DeployState::TemplateResolving);
        let arch = match backend.arch() {
            Arch::Either => Arch::from_is_arm(backend.is_system_arm().await?),
            arch => arch,
        };
        let wanted = TemplateKey::new(&spec.distro, &spec.distro_version, &spec.version, arch);
        let template = self
            .templates
            .ensure(&wanted, &spec.extra, spec.no_vacuum_on_fail)
            .await?;
        let key = template.key.clone();

        progress.enter(DeployState::Provisioning);
        let previous = backend.node_list_in_cluster(role, &spec.name).await?;
        backend
            .deploy_cluster(role, &key, &spec.name, spec.node_count, &spec.extra)
            .await
            .map_err(|e| DeployError::provisioning(format!("{}: {:#}", spec.name, e)))?;
        let current = backend.node_list_in_cluster(role, &spec.name).await?;
        let new_nodes: Vec<NodeId> = current
            .iter()
            .filter(|n| !previous.contains(n))
            .copied()
            .collect();
        if new_nodes.is_empty() {
            return Err(DeployError::provisioning(format!(
                "{}: backend reported no new nodes",
                spec.name
            )));
        }
        info!("[{}] new nodes: {:?}", progress.op, new_nodes);

        progress.enter(DeployState::Starting);
        let subset = match mode {
            Mode::Create => None,
            Mode::Grow => Some(new_nodes.as_slice()),
        };
        backend
            .cluster_start(role, &spec.name, subset)
            .await
            .map_err(|e| DeployError::provisioning(format!("start {}: {:#}", spec.name, e)))?;

        progress.enter(DeployState::ConfigPatching);
        let base = self.base_config(spec, &current).await?;
        let ips = backend.get_cluster_node_ips(role, &spec.name).await?;
        let node_ips = backend.get_node_ip_map(role, &spec.name, true).await?;

        let mut configs = BTreeMap::new();
        let mut transformations = BTreeMap::new();
        for node in &new_nodes {
            let mut conf = match spec.heartbeat {
                HeartbeatMode::Default => base.clone(),
                HeartbeatMode::Mcast => apply_mcast(
                    &base,
                    spec.multicast_address.as_deref().unwrap_or_default(),
                    spec.multicast_port.as_deref(),
                )?,
                HeartbeatMode::Mesh => {
                    let seeds = seeds_for(
                        &ips,
                        node_ips.get(node).map(String::as_str),
                        spec.seed_policy,
                    );
                    let report = apply_mesh(&base, &seeds)?;
                    transformations.insert(*node, report.transformations);
                    report.text
                }
            };
            if !spec.skip_cluster_name {
                conf = set_cluster_name(&conf, &spec.name);
            }
            configs.insert(*node, conf);
        }

        progress.enter(DeployState::FileStaging);
        let mut common = Vec::new();
        if let Some(tools) = &spec.tools_config {
            common.push(
                FilePayload::from_file(TOOLS_CONF_PATH, tools)
                    .await
                    .context("Failed to stage tools config")?,
            );
        }
        if let Some(features) = self.features_payload(spec, &key, progress).await? {
            common.push(features);
        }
        common.push(FilePayload::from_bytes(
            VERSION_MARKER_PATH,
            key.version.clone(),
        ));

        let staged: Arc<BTreeMap<NodeId, Vec<FilePayload>>> = Arc::new(
            configs
                .iter()
                .map(|(node, conf)| {
                    let mut files = vec![FilePayload::from_bytes(AEROSPIKE_CONF_PATH, conf.clone())];
                    files.extend(common.iter().cloned());
                    (*node, files)
                })
                .collect(),
        );
        let executor = backend.executor();
        let cluster: Arc<str> = Arc::from(spec.name.as_str());
        let results = map_limit(new_nodes.clone(), spec.parallel, move |node| {
            let executor = executor.clone();
            let cluster = cluster.clone();
            let staged = staged.clone();
            async move {
                let files = staged.get(&node).cloned().unwrap_or_default();
                executor.copy_files(role, &cluster, node, &files).await
            }
        })
        .await;
        collect_node_results("file staging", &new_nodes, results)?;

        progress.enter(DeployState::PostProvisioning);
        self.post_provision(spec, &new_nodes, &configs, progress).await;

        if spec.autostart {
            progress.enter(DeployState::ServiceStarting);
            let start: Vec<Command> = vec![vec![
                "service".to_string(),
                "aerospike".to_string(),
                "start".to_string(),
            ]];
            let outputs = backend
                .run_commands(role, &spec.name, &start, &new_nodes, spec.parallel)
                .await?;
            outputs_error("service start", &outputs)?;
        }

        progress.enter(DeployState::Done);
        Ok(DeployReport {
            operation_id: progress.op,
            cluster: spec.name.clone(),
            new_nodes,
            template: key,
            template_cache_hit: template.cache_hit,
            heartbeat_transformations: transformations,
            warnings: std::mem::take(&mut progress.warnings),
            state: DeployState::Done,
        })
    }

    /// Reject bad input before any mutating backend call
    async fn validate(&self, spec: &ClusterSpec, mode: Mode) -> Result<(), DeployError> {
        validate_cluster_name(&spec.name)?;

        if spec.node_count == 0 {
            return Err(DeployError::validation("node count must be at least 1"));
        }
        if spec.heartbeat == HeartbeatMode::Mcast && spec.multicast_address.is_none() {
            return Err(DeployError::validation(
                "multicast heartbeat requires a multicast address",
            ));
        }
        if spec.heartbeat != HeartbeatMode::Mcast
            && (spec.multicast_address.is_some() || spec.multicast_port.is_some())
        {
            return Err(DeployError::validation(
                "multicast address and port only apply to the mcast heartbeat mode",
            ));
        }
        if !spec.extra.expose_ports.is_empty() && (spec.node_count != 1 || mode == Mode::Grow) {
            return Err(DeployError::validation(
                "ports can only be exposed on a single-node cluster",
            ));
        }

        let files = [
            ("custom config", &spec.custom_config),
            ("tools config", &spec.tools_config),
            ("features file", &spec.features_file),
            ("early script", &spec.early_script),
            ("late script", &spec.late_script),
        ];
        for (what, path) in files {
            if let Some(path) = path {
                if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                    return Err(DeployError::validation(format!(
                        "{} {:?} does not exist",
                        what, path
                    )));
                }
            }
        }

        let exists = self
            .backend
            .cluster_list(ClusterRole::Server)
            .await?
            .contains(&spec.name);
        let existing = self
            .backend
            .node_list_in_cluster(ClusterRole::Server, &spec.name)
            .await?
            .len();
        match mode {
            Mode::Create if exists => Err(DeployError::validation(format!(
                "cluster {} already exists, use grow to add nodes",
                spec.name
            ))),
            Mode::Grow if !exists => Err(DeployError::validation(format!(
                "cluster {} does not exist",
                spec.name
            ))),
            _ if existing + spec.node_count > MAX_CLUSTER_NODES => {
                Err(DeployError::validation(format!(
                    "a cluster holds at most {} nodes, {} requested on top of {}",
                    MAX_CLUSTER_NODES, spec.node_count, existing
                )))
            }
            _ => Ok(()),
        }
    }

    /// Config every new node starts from
    async fn base_config(&self, spec: &ClusterSpec, nodes: &[NodeId]) -> Result<String, DeployError> {
        let mut text = match &spec.custom_config {
            Some(path) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read custom config {:?}", path))?,
            None => {
                let first = nodes.first().copied().ok_or_else(|| {
                    DeployError::provisioning(format!("{} has no nodes", spec.name))
                })?;
                let cat = vec!["cat".to_string(), AEROSPIKE_CONF_PATH.to_string()];
                let out = self
                    .backend
                    .executor()
                    .run(ClusterRole::Server, &spec.name, first, &[cat])
                    .await
                    .with_context(|| format!("Failed to read config from node {}", first))?;
                String::from_utf8_lossy(&out).to_string()
            }
        };
        if self.backend.kind() == BackendKind::Docker {
            text = redirect_console_log(&text, CONTAINER_LOG_PATH);
        }
        Ok(text)
    }

    async fn features_payload(
        &self,
        spec: &ClusterSpec,
        key: &TemplateKey,
        progress: &mut Progress,
    ) -> Result<Option<FilePayload>, DeployError> {
        let Some(source) = &spec.features_file else {
            return Ok(None);
        };
        let today = time::OffsetDateTime::now_utc().date();
        match select_features_file(source, &key.product_version(), today).await? {
            FeaturesSelection::NotRequired => Ok(None),
            FeaturesSelection::Selected(path) => {
                info!("[{}] using features file {:?}", progress.op, path);
                Ok(Some(FilePayload::from_file(FEATURES_CONF_PATH, path).await?))
            }
            FeaturesSelection::NotFound { wanted } => {
                progress.warn(format!(
                    "no valid version {} features file found in {:?}",
                    wanted, source
                ));
                Ok(None)
            }
        }
    }

    /// Steps whose failure only produces warnings
    async fn post_provision(
        &self,
        spec: &ClusterSpec,
        new_nodes: &[NodeId],
        configs: &BTreeMap<NodeId, String>,
        progress: &mut Progress,
    ) {
        let role = ClusterRole::Server;
        let backend = &self.backend;

        let mut dirs: Vec<String> = configs
            .values()
            .flat_map(|conf| referenced_directories(conf))
            .collect();
        dirs.sort();
        dirs.dedup();
        if !dirs.is_empty() {
            let mut mkdir = vec!["mkdir".to_string(), "-p".to_string()];
            mkdir.extend(dirs);
            match backend
                .run_commands(role, &spec.name, &[mkdir], new_nodes, spec.parallel)
                .await
            {
                Ok(outputs) => {
                    if let Err(e) = outputs_error("create directories", &outputs) {
                        progress.warn(e.to_string());
                    }
                }
                Err(e) => progress.warn(format!("create directories: {:#}", e)),
            }
        }

        if backend.kind() != BackendKind::Docker {
            let executor = backend.executor();
            let cluster: Arc<str> = Arc::from(spec.name.as_str());
            let results = map_limit(new_nodes.to_vec(), spec.parallel, move |node| {
                let executor = executor.clone();
                let cluster = cluster.clone();
                async move {
                    let hostname = hostname_for(&cluster, node);
                    let cmd = vec!["hostnamectl".to_string(), "set-hostname".to_string(), hostname];
                    executor.run(role, &cluster, node, &[cmd]).await
                }
            })
            .await;
            if let Err(e) = collect_node_results("set hostname", new_nodes, results) {
                progress.warn(e.to_string());
            }

            if spec.extra.public_ip {
                if let Err(e) = self.fix_access_addresses(spec, new_nodes, configs).await {
                    progress.warn(format!("access-address fixup: {}", e));
                }
            }
        }

        for (path, script) in [
            (EARLY_SCRIPT_PATH, &spec.early_script),
            (LATE_SCRIPT_PATH, &spec.late_script),
        ] {
            let Some(local) = script else {
                continue;
            };
            let result = match FilePayload::from_file(path, local).await {
                Ok(payload) => backend
                    .copy_files_to_cluster(role, &spec.name, &[payload], new_nodes, spec.parallel)
                    .await
                    .map_err(DeployError::from)
                    .and_then(|outputs| outputs_error(path, &outputs)),
                Err(e) => Err(DeployError::from(e)),
            };
            if let Err(e) = result {
                progress.warn(format!("install {}: {}", path, e));
            }
        }
    }

    /// Point access addresses at each node's private IP and advertise its public one
    async fn fix_access_addresses(
        &self,
        spec: &ClusterSpec,
        new_nodes: &[NodeId],
        configs: &BTreeMap<NodeId, String>,
    ) -> Result<(), DeployError> {
        let role = ClusterRole::Server;
        let private = self.backend.get_node_ip_map(role, &spec.name, true).await?;
        let public = self.backend.get_node_ip_map(role, &spec.name, false).await?;
        let executor = self.backend.executor();

        let mut failures = Vec::new();
        for node in new_nodes {
            let (Some(conf), Some(inner), Some(outer)) =
                (configs.get(node), private.get(node), public.get(node))
            else {
                failures.push(format!("node {}: no private or public IP", node));
                continue;
            };
            let patched = set_access_addresses(conf, inner, outer)?;
            let payload = FilePayload::from_bytes(AEROSPIKE_CONF_PATH, patched);
            if let Err(e) = executor.copy_files(role, &spec.name, *node, &[payload]).await {
                failures.push(format!("node {}: {:#}", node, e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DeployError::provisioning(failures.join("; ")))
        }
    }
}

/// Hostname assigned to a node on machine backends
pub fn hostname_for(cluster: &str, node: NodeId) -> String {
    format!("{}-{}", cluster, node).replace('_', "-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::stub::{StubBackend, StubInstallerSource};
    use crate::installer::Credentials;
    use crate::scripts::ScriptTable;
    use std::path::Path;

    const BASE: &str = "service {\n    proto-fd-max 15000\n}\nlogging {\n    console {\n        context any info\n    }\n}\nnetwork {\n    heartbeat {\n        mode multicast\n        multicast-group 239.1.99.222\n        port 9918\n        interval 150\n    }\n}\nnamespace test {\n    storage-engine device {\n        file /opt/aerospike/data/test.dat\n    }\n}\n";

    fn deployer(backend: Arc<StubBackend>, dir: &Path) -> ClusterDeployer {
        let cache = TemplateCache::new(
            backend.clone(),
            Arc::new(StubInstallerSource::new("7.0.0.5", "22.04")),
            Arc::new(ScriptTable::builtin()),
            dir,
            Credentials::default(),
        );
        ClusterDeployer::new(backend, Arc::new(cache))
    }

    fn spec(name: &str, count: usize) -> ClusterSpec {
        ClusterSpec {
            name: name.to_string(),
            node_count: count,
            parallel: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_hostname_for() {
        assert_eq!(hostname_for("my_dc", NodeId(3)), "my-dc-3");
    }

    #[tokio::test]
    async fn test_create_three_node_mesh() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(StubBackend::new().with_base_config(BASE));
        let report = deployer(backend.clone(), dir.path())
            .create(&spec("dc1", 3))
            .await
            .unwrap();

        assert_eq!(report.state, DeployState::Done);
        assert_eq!(report.new_nodes, vec![NodeId(1), NodeId(2), NodeId(3)]);
        assert!(!report.template_cache_hit);
        assert_eq!(report.template.version, "7.0.0.5");
        assert!(report.warnings.is_empty());

        for n in 1..=3 {
            assert_eq!(report.heartbeat_transformations[&NodeId(n)], 2);
            let conf = backend.file("dc1", NodeId(n), AEROSPIKE_CONF_PATH).unwrap();
            assert_eq!(conf.matches("mesh-seed-address-port").count(), 3);
            assert!(conf.contains("mode mesh"));
            assert!(!conf.contains("multicast-group"));
            assert!(conf.contains("cluster-name dc1"));
            assert!(conf.contains("file /var/log/aerospike.log {"));
            assert_eq!(
                backend.file("dc1", NodeId(n), VERSION_MARKER_PATH).unwrap(),
                "7.0.0.5"
            );
            let commands = backend.commands_run(NodeId(n));
            assert!(commands.iter().any(|c| c.join(" ") == "service aerospike start"));
            assert!(commands
                .iter()
                .any(|c| c.join(" ") == "mkdir -p /opt/aerospike/data /var/log"));
        }
    }

    #[tokio::test]
    async fn test_grow_touches_only_new_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(StubBackend::new().with_base_config(BASE));
        let deployer = deployer(backend.clone(), dir.path());
        deployer.create(&spec("dc1", 3)).await.unwrap();
        let before = backend.commands_run(NodeId(1)).len();

        let report = deployer.grow(&spec("dc1", 2)).await.unwrap();
        assert_eq!(report.new_nodes, vec![NodeId(4), NodeId(5)]);
        assert!(report.template_cache_hit);
        assert_eq!(backend.commands_run(NodeId(1)).len(), before + 1);

        let conf = backend.file("dc1", NodeId(5), AEROSPIKE_CONF_PATH).unwrap();
        assert_eq!(conf.matches("mesh-seed-address-port").count(), 5);
    }

    #[tokio::test]
    async fn test_validation_happens_before_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(StubBackend::new().with_base_config(BASE));
        let deployer = deployer(backend.clone(), dir.path());

        let bad = [
            spec("this-name-is-far-too-long", 1),
            spec("dc1", 0),
            ClusterSpec {
                heartbeat: HeartbeatMode::Mcast,
                ..spec("dc1", 1)
            },
            ClusterSpec {
                custom_config: Some(dir.path().join("missing.conf")),
                ..spec("dc1", 1)
            },
            ClusterSpec {
                extra: ExtraParams {
                    expose_ports: vec!["3100:3000".to_string()],
                    ..Default::default()
                },
                ..spec("dc1", 2)
            },
        ];
        for s in &bad {
            let err = deployer.create(s).await.unwrap_err();
            assert!(matches!(err, DeployError::Validation(_)), "{:?}", err);
        }

        let err = deployer.grow(&spec("nosuch", 1)).await.unwrap_err();
        assert!(matches!(err, DeployError::Validation(_)));
        assert_eq!(backend.deploy_template_calls(), 0);
        assert!(backend.templates().is_empty());
    }

    #[tokio::test]
    async fn test_staging_failure_names_node() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(StubBackend::new().with_base_config(BASE));
        backend.fail_copies_on(NodeId(2));
        let err = deployer(backend.clone(), dir.path())
            .create(&spec("dc1", 3))
            .await
            .unwrap_err();

        assert_eq!(err.failed_nodes(), vec![NodeId(2)]);
        assert!(err.to_string().starts_with("file staging"));
    }

    #[tokio::test]
    async fn test_best_effort_failures_become_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(StubBackend::new().with_base_config(BASE));
        backend.fail_commands_matching("mkdir");
        let report = deployer(backend.clone(), dir.path())
            .create(&spec("dc1", 2))
            .await
            .unwrap();

        assert_eq!(report.state, DeployState::Done);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("create directories"));
    }

    #[tokio::test]
    async fn test_custom_config_with_mcast() {
        let dir = tempfile::tempdir().unwrap();
        let custom = dir.path().join("custom.conf");
        std::fs::write(&custom, BASE).unwrap();

        let backend = Arc::new(StubBackend::new());
        let report = deployer(backend.clone(), dir.path())
            .create(&ClusterSpec {
                heartbeat: HeartbeatMode::Mcast,
                multicast_address: Some("239.1.99.100".to_string()),
                custom_config: Some(custom),
                skip_cluster_name: true,
                autostart: false,
                ..spec("dc2", 2)
            })
            .await
            .unwrap();

        assert!(report.heartbeat_transformations.is_empty());
        let conf = backend.file("dc2", NodeId(2), AEROSPIKE_CONF_PATH).unwrap();
        assert!(conf.contains("multicast-group 239.1.99.100"));
        assert!(!conf.contains("cluster-name"));
        assert!(!backend
            .commands_run(NodeId(1))
            .iter()
            .any(|c| c.join(" ") == "service aerospike start"));
    }
}
