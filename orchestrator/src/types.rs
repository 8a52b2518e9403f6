use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::AsyncRead;

use crate::error::DeployError;

pub const MAX_CLUSTER_NAME_LEN: usize = 20;
pub const MAX_CLUSTER_NODES: usize = 255;

/// File written on every server node holding the deployed product version
pub const VERSION_MARKER_PATH: &str = "/opt/aerolab.aerospike.version";
pub const AEROSPIKE_CONF_PATH: &str = "/etc/aerospike/aerospike.conf";

// ============================================================================
// Node Types
// ============================================================================

/// Ordinal node number inside a cluster, starting at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which naming namespace a cluster lives in on the backend
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ClusterRole {
    #[default]
    Server,
    Client,
}

impl fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterRole::Server => write!(f, "server"),
            ClusterRole::Client => write!(f, "client"),
        }
    }
}

pub fn validate_cluster_name(name: &str) -> Result<(), DeployError> {
    if name.is_empty() {
        return Err(DeployError::validation("cluster name must not be empty"));
    }
    if name.len() > MAX_CLUSTER_NAME_LEN {
        return Err(DeployError::validation(format!(
            "cluster name '{}' is longer than {} characters",
            name, MAX_CLUSTER_NAME_LEN
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(DeployError::validation(format!(
            "cluster name '{}' contains invalid character '{}', allowed: a-z A-Z 0-9 _ -",
            name, c
        )));
    }
    Ok(())
}

// ============================================================================
// Template Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Amd64,
    Arm64,
    /// No constraint; matches either concrete architecture
    Either,
}

impl Arch {
    pub fn matches(self, other: Arch) -> bool {
        self == other || self == Arch::Either || other == Arch::Either
    }

    /// Architecture token used in installer file names
    pub fn installer_token(self) -> &'static str {
        match self {
            Arch::Arm64 => "arm64",
            Arch::Amd64 | Arch::Either => "x86_64",
        }
    }

    pub fn from_is_arm(is_arm: bool) -> Self {
        if is_arm {
            Arch::Arm64
        } else {
            Arch::Amd64
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::Amd64 => write!(f, "amd64"),
            Arch::Arm64 => write!(f, "arm64"),
            Arch::Either => write!(f, "either"),
        }
    }
}

impl FromStr for Arch {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "amd64" | "x86_64" => Ok(Arch::Amd64),
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            "" | "either" | "any" => Ok(Arch::Either),
            other => anyhow::bail!("Unknown architecture: {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edition {
    Enterprise,
    Community,
    Federal,
}

impl Edition {
    pub fn suffix(self) -> &'static str {
        match self {
            Edition::Enterprise => "",
            Edition::Community => "c",
            Edition::Federal => "f",
        }
    }
}

impl fmt::Display for Edition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edition::Enterprise => write!(f, "enterprise"),
            Edition::Community => write!(f, "community"),
            Edition::Federal => write!(f, "federal"),
        }
    }
}

/// A product version spec such as `7.0.0.5`, `6.4.0.2c`, `latest` or `7.1*f`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProductVersion {
    pub number: String,
    pub edition: Edition,
}

impl ProductVersion {
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        let (number, edition) = match spec.strip_suffix('c') {
            Some(rest) => (rest, Edition::Community),
            None => match spec.strip_suffix('f') {
                Some(rest) => (rest, Edition::Federal),
                None => (spec, Edition::Enterprise),
            },
        };
        Self {
            number: number.to_string(),
            edition,
        }
    }

    /// True when the version is a pattern that must be resolved to a concrete version
    pub fn needs_resolution(&self) -> bool {
        self.number.starts_with("latest") || self.number.ends_with('*')
    }

    /// Numeric components of the version, stopping at the first non-numeric part
    pub fn components(&self) -> Vec<u32> {
        self.number
            .split(['.', '-'])
            .map_while(|p| p.parse::<u32>().ok())
            .collect()
    }

    pub fn major_minor(&self) -> Option<(u32, u32)> {
        let parts = self.components();
        match parts.as_slice() {
            [major, minor, ..] => Some((*major, *minor)),
            [major] => Some((*major, 0)),
            [] => None,
        }
    }

    /// Wildcard prefix for `7.1*` style specs; `latest*` has none
    pub fn wildcard_prefix(&self) -> Option<&str> {
        self.number
            .strip_suffix('*')
            .filter(|prefix| !prefix.starts_with("latest"))
    }
}

impl fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.number, self.edition.suffix())
    }
}

/// Identity of a reusable machine image
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateKey {
    pub distro: String,
    pub distro_version: String,
    /// Product version including the edition suffix
    pub version: String,
    pub arch: Arch,
}

impl TemplateKey {
    pub fn new(
        distro: impl Into<String>,
        distro_version: impl Into<String>,
        version: impl Into<String>,
        arch: Arch,
    ) -> Self {
        Self {
            distro: distro.into(),
            distro_version: distro_version.into(),
            version: version.into(),
            arch,
        }
    }

    pub fn product_version(&self) -> ProductVersion {
        ProductVersion::parse(&self.version)
    }

    pub fn needs_resolution(&self) -> bool {
        self.product_version().needs_resolution() || self.distro_version == "latest"
    }

    /// Structural equality with `Arch::Either` acting as a wildcard
    pub fn matches(&self, other: &TemplateKey) -> bool {
        self.distro == other.distro
            && self.distro_version == other.distro_version
            && self.version == other.version
            && self.arch.matches(other.arch)
    }

    /// Local file name of the installer archive for this key
    pub fn installer_file_name(&self) -> String {
        let v = self.product_version();
        format!(
            "aerospike-server-{}-{}-{}{}.{}.tgz",
            v.edition,
            v.number,
            self.distro,
            self.distro_version,
            self.arch.installer_token()
        )
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.distro, self.distro_version, self.version, self.arch
        )
    }
}

// ============================================================================
// Payload Types
// ============================================================================

#[derive(Debug, Clone)]
pub enum PayloadSource {
    Bytes(Arc<Vec<u8>>),
    File(PathBuf),
}

/// One file to place on nodes, streamed from memory or a local file
#[derive(Debug, Clone)]
pub struct FilePayload {
    /// Destination path on the node
    pub path: String,
    pub source: PayloadSource,
    pub len: u64,
}

impl FilePayload {
    pub fn from_bytes(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        Self {
            path: path.into(),
            len: bytes.len() as u64,
            source: PayloadSource::Bytes(Arc::new(bytes)),
        }
    }

    pub async fn from_file(path: impl Into<String>, local: impl Into<PathBuf>) -> Result<Self> {
        let local = local.into();
        let meta = tokio::fs::metadata(&local)
            .await
            .with_context(|| format!("Failed to stat {:?}", local))?;
        Ok(Self {
            path: path.into(),
            len: meta.len(),
            source: PayloadSource::File(local),
        })
    }

    /// Open the content as a byte stream
    pub async fn open(&self) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        match &self.source {
            PayloadSource::Bytes(bytes) => Ok(Box::new(std::io::Cursor::new(bytes.to_vec()))),
            PayloadSource::File(local) => {
                let file = tokio::fs::File::open(local)
                    .await
                    .with_context(|| format!("Failed to open {:?}", local))?;
                Ok(Box::new(file))
            }
        }
    }

    pub async fn read_all(&self) -> Result<Vec<u8>> {
        match &self.source {
            PayloadSource::Bytes(bytes) => Ok(bytes.to_vec()),
            PayloadSource::File(local) => tokio::fs::read(local)
                .await
                .with_context(|| format!("Failed to read {:?}", local)),
        }
    }
}

// ============================================================================
// Deployment Parameters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatMode {
    /// Leave the heartbeat stanza untouched
    #[default]
    Default,
    Mesh,
    Mcast,
}

impl FromStr for HeartbeatMode {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, DeployError> {
        match s.to_lowercase().as_str() {
            "" | "default" => Ok(HeartbeatMode::Default),
            "mesh" => Ok(HeartbeatMode::Mesh),
            "mcast" | "multicast" => Ok(HeartbeatMode::Mcast),
            other => Err(DeployError::validation(format!(
                "heartbeat mode must be one of mesh, mcast, default; got '{}'",
                other
            ))),
        }
    }
}

/// Provider-specific knobs passed through to the backend untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtraParams {
    pub cpu_limit: Option<String>,
    pub ram_limit: Option<String>,
    pub swap_limit: Option<String>,
    pub privileged: bool,
    pub network: Option<String>,
    /// `host:container` port mappings, single-node clusters only
    pub expose_ports: Vec<String>,
    pub labels: Vec<String>,
    pub instance_type: Option<String>,
    pub public_ip: bool,
}
