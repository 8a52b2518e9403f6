use aerofleet_orchestrator::backend::stub::{StubBackend, StubInstallerSource};
use aerofleet_orchestrator::backend::Backend;
use aerofleet_orchestrator::installer::Credentials;
use aerofleet_orchestrator::scripts::ScriptTable;
use aerofleet_orchestrator::services::{ClusterDeployer, ClusterSpec};
use aerofleet_orchestrator::template::TemplateCache;
use aerofleet_orchestrator::{NodeId, AEROSPIKE_CONF_PATH};
use std::sync::Arc;
use tempfile::TempDir;

pub const LATEST_VERSION: &str = "7.1.0.2";
pub const LATEST_UBUNTU: &str = "24.04";

/// Stock server config as shipped in the installer
pub const STOCK_CONF: &str = "\
service {
    proto-fd-max 15000
}

logging {
    console {
        context any info
    }
}

network {
    service {
        address any
        port 3000
    }

    heartbeat {
        mode multicast
        multicast-group 239.1.99.222
        port 9918

        interval 150
        timeout 10
    }

    fabric {
        port 3001
    }
}

namespace test {
    replication-factor 2
    storage-engine memory {
        data-size 4G
    }
}
";

/// An in-memory fleet with a template cache and a deployer wired to it
pub struct TestFleet {
    pub stub: Arc<StubBackend>,
    pub backend: Arc<dyn Backend>,
    pub source: Arc<StubInstallerSource>,
    pub templates: Arc<TemplateCache>,
    pub deployer: ClusterDeployer,
    _work_dir: TempDir,
}

impl TestFleet {
    pub fn new() -> Self {
        Self::with_stub(StubBackend::new().with_base_config(STOCK_CONF))
    }

    pub fn with_stub(stub: StubBackend) -> Self {
        let work_dir = TempDir::new().expect("Failed to create temp dir");
        let stub = Arc::new(stub);
        let backend: Arc<dyn Backend> = stub.clone();
        let source = Arc::new(StubInstallerSource::new(LATEST_VERSION, LATEST_UBUNTU));
        let templates = Arc::new(TemplateCache::new(
            backend.clone(),
            source.clone(),
            Arc::new(ScriptTable::builtin()),
            work_dir.path(),
            Credentials::default(),
        ));
        let deployer = ClusterDeployer::new(backend.clone(), templates.clone());
        Self {
            stub,
            backend,
            source,
            templates,
            deployer,
            _work_dir: work_dir,
        }
    }

    /// Server config currently on a node
    pub fn conf(&self, cluster: &str, node: u32) -> String {
        self.stub
            .file(cluster, NodeId(node), AEROSPIKE_CONF_PATH)
            .unwrap_or_else(|| panic!("node {} of {} has no config", node, cluster))
    }
}

pub fn spec(name: &str, count: usize) -> ClusterSpec {
    ClusterSpec {
        name: name.to_string(),
        node_count: count,
        parallel: 4,
        ..Default::default()
    }
}

/// Values of every `mesh-seed-address-port` line, in order
pub fn seed_ips(conf: &str) -> Vec<String> {
    conf.lines()
        .filter_map(|l| {
            let mut words = l.split_whitespace();
            match words.next() {
                Some("mesh-seed-address-port") => words.next().map(str::to_string),
                _ => None,
            }
        })
        .collect()
}
