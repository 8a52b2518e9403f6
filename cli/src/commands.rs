use aerofleet_orchestrator::backend::{require_network_admin, Backend, BackendKind};
use aerofleet_orchestrator::confpatch::{SeedPolicy, XdrVersion};
use aerofleet_orchestrator::installer::HttpInstallerSource;
use aerofleet_orchestrator::scripts::ScriptTable;
use aerofleet_orchestrator::services::{
    fix_mesh, ClusterDeployer, ClusterLifecycle, ClusterSpec, DeployReport, XdrConnectRequest,
    XdrConnector,
};
use aerofleet_orchestrator::template::TemplateCache;
use aerofleet_orchestrator::{Arch, ClusterRole, ExtraParams, HeartbeatMode, NodeId, TemplateKey};
use anyhow::{bail, Result};
use clap::{Args, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const DOWNLOAD_RETRIES: u32 = 3;

/// Everything a command needs, built once from config
pub struct Context {
    backend: Arc<dyn Backend>,
    templates: Arc<TemplateCache>,
    parallel: usize,
}

impl Context {
    pub fn new(backend: Arc<dyn Backend>, cfg: &Config) -> Result<Self> {
        let source = HttpInstallerSource::new(cfg.artifacts_url(), DOWNLOAD_TIMEOUT, DOWNLOAD_RETRIES)?;
        let templates = TemplateCache::new(
            backend.clone(),
            Arc::new(source),
            Arc::new(ScriptTable::builtin()),
            cfg.work_dir(),
            cfg.download.clone(),
        );
        Ok(Self {
            backend,
            templates: Arc::new(templates),
            parallel: cfg.parallel_threads(),
        })
    }
}

// ============================================================================
// Arguments
// ============================================================================

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SeedPolicyArg {
    All,
    ExcludeSelf,
}

impl From<SeedPolicyArg> for SeedPolicy {
    fn from(arg: SeedPolicyArg) -> Self {
        match arg {
            SeedPolicyArg::All => SeedPolicy::AllNodes,
            SeedPolicyArg::ExcludeSelf => SeedPolicy::ExcludeSelf,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum XdrVersionArg {
    Auto,
    #[value(name = "4")]
    V4,
    #[value(name = "5")]
    V5,
}

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Cluster name
    #[arg(short = 'n', long, default_value = "mydc")]
    name: String,

    /// Number of nodes to add
    #[arg(short = 'c', long, default_value_t = 1)]
    count: usize,

    #[arg(short = 'd', long, default_value = "ubuntu")]
    distro: String,

    /// Distro version, or `latest`
    #[arg(short = 'i', long, default_value = "latest")]
    distro_version: String,

    /// Server version: `7.0.0.5`, `6.4.0.2c`, `7.1*`, `latest`, `latestc`
    #[arg(short = 'v', long = "aerospike-version", default_value = "latest")]
    version: String,

    /// mesh, mcast or default
    #[arg(short = 'm', long, default_value = "mesh")]
    heartbeat: HeartbeatMode,

    #[arg(long)]
    multicast_address: Option<String>,

    #[arg(long)]
    multicast_port: Option<String>,

    #[arg(long, value_enum, default_value = "all")]
    seed_policy: SeedPolicyArg,

    /// Custom aerospike.conf to start from
    #[arg(short = 'o', long)]
    custom_conf: Option<PathBuf>,

    /// Custom astools.conf
    #[arg(short = 'z', long)]
    tools_conf: Option<PathBuf>,

    /// Features file, or a directory to pick one from
    #[arg(short = 'f', long, env = "AEROFLEET_FEATURES_FILE")]
    features_file: Option<PathBuf>,

    #[arg(long)]
    early_script: Option<PathBuf>,

    #[arg(long)]
    late_script: Option<PathBuf>,

    /// Leave cluster-name untouched
    #[arg(long)]
    skip_cluster_name: bool,

    /// Do not start the service after deployment
    #[arg(short = 's', long)]
    no_start: bool,

    /// Keep a failed template build instance for inspection
    #[arg(long)]
    no_vacuum_on_fail: bool,

    #[arg(long)]
    cpu_limit: Option<String>,

    #[arg(long)]
    ram_limit: Option<String>,

    #[arg(long)]
    swap_limit: Option<String>,

    #[arg(long)]
    privileged: bool,

    #[arg(long)]
    network: Option<String>,

    /// host:container port mappings, single-node clusters only
    #[arg(short = 'e', long, value_delimiter = ',')]
    expose_ports: Vec<String>,

    #[arg(long = "label")]
    labels: Vec<String>,

    #[arg(long)]
    instance_type: Option<String>,

    /// Advertise public IPs through alternate-access-address
    #[arg(long)]
    public_ip: bool,
}

impl DeployArgs {
    fn spec(&self, parallel: usize) -> ClusterSpec {
        ClusterSpec {
            name: self.name.clone(),
            node_count: self.count,
            distro: self.distro.clone(),
            distro_version: self.distro_version.clone(),
            version: self.version.clone(),
            heartbeat: self.heartbeat,
            multicast_address: self.multicast_address.clone(),
            multicast_port: self.multicast_port.clone(),
            seed_policy: self.seed_policy.into(),
            custom_config: self.custom_conf.clone(),
            tools_config: self.tools_conf.clone(),
            features_file: self.features_file.clone(),
            early_script: self.early_script.clone(),
            late_script: self.late_script.clone(),
            skip_cluster_name: self.skip_cluster_name,
            autostart: !self.no_start,
            no_vacuum_on_fail: self.no_vacuum_on_fail,
            parallel,
            extra: ExtraParams {
                cpu_limit: self.cpu_limit.clone(),
                ram_limit: self.ram_limit.clone(),
                swap_limit: self.swap_limit.clone(),
                privileged: self.privileged,
                network: self.network.clone(),
                expose_ports: self.expose_ports.clone(),
                labels: self.labels.clone(),
                instance_type: self.instance_type.clone(),
                public_ip: self.public_ip,
            },
        }
    }
}

#[derive(Args, Debug)]
pub struct TargetArgs {
    #[arg(short = 'n', long, default_value = "mydc")]
    name: String,

    /// Comma-separated node numbers, all nodes when omitted
    #[arg(short = 'l', long, value_delimiter = ',')]
    nodes: Vec<u32>,

    /// Work on client clusters
    #[arg(long)]
    client: bool,
}

impl TargetArgs {
    fn role(&self) -> ClusterRole {
        if self.client {
            ClusterRole::Client
        } else {
            ClusterRole::Server
        }
    }

    fn nodes(&self) -> Option<Vec<NodeId>> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(self.nodes.iter().copied().map(NodeId).collect())
        }
    }
}

#[derive(Args, Debug)]
pub struct TemplateArgs {
    #[arg(short = 'd', long)]
    distro: Option<String>,

    #[arg(short = 'i', long)]
    distro_version: Option<String>,

    #[arg(short = 'v', long = "aerospike-version")]
    version: Option<String>,

    #[arg(long, default_value = "either")]
    arch: Arch,
}

impl TemplateArgs {
    fn key(&self) -> Option<TemplateKey> {
        match (&self.distro, &self.distro_version, &self.version) {
            (Some(d), Some(dv), Some(v)) => Some(TemplateKey::new(d, dv, v, self.arch)),
            _ => None,
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum ClusterCommand {
    /// Create a new cluster
    Create(DeployArgs),
    /// Add nodes to an existing cluster
    Grow(DeployArgs),
    Start(TargetArgs),
    Stop(TargetArgs),
    Destroy(TargetArgs),
    /// List clusters and their nodes
    List {
        #[arg(long)]
        client: bool,
        #[arg(long)]
        json: bool,
    },
    /// Run a command on one node (a shell when none is given)
    Attach {
        #[arg(short = 'n', long, default_value = "mydc")]
        name: String,
        #[arg(short = 'l', long, default_value_t = 1)]
        node: u32,
        #[arg(long)]
        client: bool,
        #[arg(last = true)]
        command: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum TemplateCommand {
    List,
    /// Remove leftover build instances (all of them unless a full key is given)
    Vacuum(TemplateArgs),
    /// Remove a template image
    Destroy(TemplateArgs),
}

#[derive(Subcommand, Debug)]
pub enum XdrCommand {
    /// Ship namespaces from a source cluster to destination clusters
    Connect {
        #[arg(short = 's', long, default_value = "mydc")]
        source: String,
        #[arg(short = 'd', long, value_delimiter = ',', required = true)]
        destinations: Vec<String>,
        #[arg(short = 'm', long, value_delimiter = ',', default_value = "test")]
        namespaces: Vec<String>,
        #[arg(long = "xdr-version", value_enum, default_value = "auto")]
        version: XdrVersionArg,
        /// Destinations are connector clients
        #[arg(long)]
        connector: bool,
        /// Restart the service on source nodes afterwards
        #[arg(long)]
        restart: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfCommand {
    /// Rewrite mesh seeds on every node from current IPs
    FixMesh {
        #[arg(short = 'n', long, default_value = "mydc")]
        name: String,
        #[arg(long, value_enum, default_value = "all")]
        seed_policy: SeedPolicyArg,
    },
}

#[derive(Subcommand, Debug)]
pub enum NetworkCommand {
    Create {
        #[arg(short = 'n', long)]
        name: String,
        #[arg(short = 'd', long)]
        driver: Option<String>,
        #[arg(short = 's', long)]
        subnet: Option<String>,
        #[arg(short = 'm', long)]
        mtu: Option<u32>,
    },
    List,
    Delete {
        #[arg(short = 'n', long)]
        name: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Set the backend and its options
    Backend {
        #[arg(short = 't', long = "type")]
        kind: BackendKind,
        #[arg(long)]
        arch: Option<Arch>,
        #[arg(long)]
        region: Option<String>,
    },
    /// Set defaults for later commands
    Defaults {
        #[arg(long)]
        work_dir: Option<PathBuf>,
        #[arg(long)]
        parallel_threads: Option<usize>,
        #[arg(long)]
        artifacts_url: Option<String>,
        #[arg(long, env = "AEROFLEET_DOWNLOAD_USER")]
        download_user: Option<String>,
        #[arg(long, env = "AEROFLEET_DOWNLOAD_PASS", hide_env_values = true)]
        download_pass: Option<String>,
    },
    Show,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn cluster(ctx: &Context, cmd: &ClusterCommand) -> Result<()> {
    let lifecycle = ClusterLifecycle::new(ctx.backend.clone());
    match cmd {
        ClusterCommand::Create(args) => {
            let deployer = ClusterDeployer::new(ctx.backend.clone(), ctx.templates.clone());
            print_report(&deployer.create(&args.spec(ctx.parallel)).await?);
        }
        ClusterCommand::Grow(args) => {
            let deployer = ClusterDeployer::new(ctx.backend.clone(), ctx.templates.clone());
            print_report(&deployer.grow(&args.spec(ctx.parallel)).await?);
        }
        ClusterCommand::Start(t) => {
            lifecycle
                .start(t.role(), &t.name, t.nodes().as_deref())
                .await?
        }
        ClusterCommand::Stop(t) => lifecycle.stop(t.role(), &t.name, t.nodes().as_deref()).await?,
        ClusterCommand::Destroy(t) => {
            lifecycle
                .destroy(t.role(), &t.name, t.nodes().as_deref())
                .await?
        }
        ClusterCommand::List { client, json } => {
            let role = if *client {
                ClusterRole::Client
            } else {
                ClusterRole::Server
            };
            let clusters = lifecycle.list(role).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&clusters)?);
            } else {
                println!("{:<22} {:<8} {:<16} {}", "CLUSTER", "NODE", "IP", "ROLE");
                for c in &clusters {
                    for (i, node) in c.nodes.iter().enumerate() {
                        let ip = c.ips.get(i).map(String::as_str).unwrap_or("-");
                        println!("{:<22} {:<8} {:<16} {}", c.name, node, ip, c.role);
                    }
                }
            }
        }
        ClusterCommand::Attach {
            name,
            node,
            client,
            command,
        } => {
            let role = if *client {
                ClusterRole::Client
            } else {
                ClusterRole::Server
            };
            let (command, interactive) = if command.is_empty() {
                (vec!["/bin/bash".to_string()], true)
            } else {
                (command.clone(), false)
            };
            lifecycle
                .attach(role, name, NodeId(*node), &command, interactive)
                .await?;
        }
    }
    Ok(())
}

fn print_report(report: &DeployReport) {
    println!(
        "Cluster {} ready: nodes={:?} template={} (cache {})",
        report.cluster,
        report.new_nodes.iter().map(|n| n.0).collect::<Vec<_>>(),
        report.template,
        if report.template_cache_hit { "hit" } else { "miss" }
    );
    for warning in &report.warnings {
        println!("WARNING: {}", warning);
    }
}

pub async fn template(ctx: &Context, cmd: &TemplateCommand) -> Result<()> {
    match cmd {
        TemplateCommand::List => {
            for key in ctx.templates.list().await? {
                println!(
                    "{:<10} {:<10} {:<14} {}",
                    key.distro, key.distro_version, key.version, key.arch
                );
            }
        }
        TemplateCommand::Vacuum(args) => ctx.templates.vacuum(args.key().as_ref()).await?,
        TemplateCommand::Destroy(args) => {
            let Some(key) = args.key() else {
                bail!("template destroy needs --distro, --distro-version and --aerospike-version");
            };
            ctx.templates.destroy(&key).await?;
        }
    }
    Ok(())
}

pub async fn xdr(ctx: &Context, cmd: &XdrCommand) -> Result<()> {
    let XdrCommand::Connect {
        source,
        destinations,
        namespaces,
        version,
        connector,
        restart,
    } = cmd;
    let req = XdrConnectRequest {
        source: source.clone(),
        destinations: destinations.clone(),
        namespaces: namespaces.clone(),
        version: match version {
            XdrVersionArg::Auto => None,
            XdrVersionArg::V4 => Some(XdrVersion::V4),
            XdrVersionArg::V5 => Some(XdrVersion::V5),
        },
        connector: *connector,
        restart: *restart,
        parallel: ctx.parallel,
    };
    let nodes = XdrConnector::new(ctx.backend.clone()).connect(&req).await?;
    println!(
        "Connected {} ({} nodes) to {}",
        source,
        nodes.len(),
        destinations.join(",")
    );
    Ok(())
}

pub async fn conf(ctx: &Context, cmd: &ConfCommand) -> Result<()> {
    let ConfCommand::FixMesh { name, seed_policy } = cmd;
    let report = fix_mesh(&ctx.backend, name, (*seed_policy).into(), ctx.parallel).await?;
    println!(
        "Mesh fixed on {} nodes, skipped {:?}",
        report.patched.len(),
        report.skipped
    );
    Ok(())
}

pub async fn network(ctx: &Context, cmd: &NetworkCommand) -> Result<()> {
    match cmd {
        NetworkCommand::Create {
            name,
            driver,
            subnet,
            mtu,
        } => {
            require_network_admin(ctx.backend.as_ref(), "network create")?
                .create_network(name, driver.as_deref(), subnet.as_deref(), *mtu)
                .await?
        }
        NetworkCommand::List => {
            let networks = require_network_admin(ctx.backend.as_ref(), "network list")?
                .list_networks()
                .await?;
            for n in networks {
                println!(
                    "{:<24} {:<10} {}",
                    n.name,
                    n.driver,
                    n.subnet.unwrap_or_default()
                );
            }
        }
        NetworkCommand::Delete { name } => {
            require_network_admin(ctx.backend.as_ref(), "network delete")?
                .delete_network(name)
                .await?
        }
    }
    Ok(())
}

pub fn config(cmd: &ConfigCommand, cfg: &mut Config, path: &Path) -> Result<()> {
    match cmd {
        ConfigCommand::Backend { kind, arch, region } => {
            cfg.backend.kind = *kind;
            cfg.backend.arch = *arch;
            cfg.backend.region = region.clone();
            cfg.save(path)?;
        }
        ConfigCommand::Defaults {
            work_dir,
            parallel_threads,
            artifacts_url,
            download_user,
            download_pass,
        } => {
            if work_dir.is_some() {
                cfg.work_dir = work_dir.clone();
            }
            if parallel_threads.is_some() {
                cfg.parallel_threads = *parallel_threads;
            }
            if artifacts_url.is_some() {
                cfg.artifacts_url = artifacts_url.clone();
            }
            if download_user.is_some() {
                cfg.download.user = download_user.clone();
            }
            if download_pass.is_some() {
                cfg.download.pass = download_pass.clone();
            }
            cfg.save(path)?;
        }
        ConfigCommand::Show => {}
    }
    let mut shown = cfg.clone();
    if shown.download.pass.is_some() {
        shown.download.pass = Some("********".to_string());
    }
    print!("{}", toml::to_string_pretty(&shown)?);
    println!("# {}", path.display());
    Ok(())
}
