//! Container-engine adapter driving the local `docker` CLI.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::FutureExt;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as Process;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{Backend, BackendKind, Command, NetworkAdmin, NetworkInfo, RemoteExecutor};
use crate::shutdown::ShutdownRegistry;
use crate::types::{Arch, ClusterRole, ExtraParams, FilePayload, NodeId, TemplateKey};

const SERVER_PREFIX: &str = "aerolab-";
const CLIENT_PREFIX: &str = "aerolab_c-";
const TEMPLATE_PREFIX: &str = "aerolab-";
const BUILD_PREFIX: &str = "aerotmpl-";

fn prefix(role: ClusterRole) -> &'static str {
    match role {
        ClusterRole::Server => SERVER_PREFIX,
        ClusterRole::Client => CLIENT_PREFIX,
    }
}

pub fn container_name(role: ClusterRole, cluster: &str, node: NodeId) -> String {
    format!("{}{}_{}", prefix(role), cluster, node)
}

/// Parse `<prefix><cluster>_<node>` back into its parts
fn parse_container_name(role: ClusterRole, name: &str) -> Option<(String, NodeId)> {
    let rest = name.trim_start_matches('/').strip_prefix(prefix(role))?;
    let (cluster, node) = rest.rsplit_once('_')?;
    let node = node.parse::<u32>().ok()?;
    Some((cluster.to_string(), NodeId(node)))
}

pub fn template_image(key: &TemplateKey) -> String {
    format!(
        "{}{}_{}_{}:{}",
        TEMPLATE_PREFIX, key.distro, key.distro_version, key.arch, key.version
    )
}

fn parse_template_image(image: &str) -> Option<TemplateKey> {
    let (repo, tag) = image.rsplit_once(':')?;
    let rest = repo.strip_prefix(TEMPLATE_PREFIX)?;
    let mut parts = rest.splitn(3, '_');
    let (distro, distro_version, arch) = (parts.next()?, parts.next()?, parts.next()?);
    let arch = arch.parse::<Arch>().ok()?;
    Some(TemplateKey::new(distro, distro_version, tag, arch))
}

fn build_container(key: &TemplateKey) -> String {
    format!(
        "{}{}-{}-{}-{}",
        BUILD_PREFIX, key.distro, key.distro_version, key.version, key.arch
    )
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Run `docker <args>` and return stdout, failing with stderr on a non-zero exit
async fn docker(args: &[&str]) -> Result<String> {
    debug!("docker {}", args.join(" "));
    let out = Process::new("docker")
        .args(args)
        .output()
        .await
        .context("Failed to run docker, is it installed and on PATH?")?;
    if !out.status.success() {
        bail!(
            "docker {} failed: {}",
            args.first().copied().unwrap_or_default(),
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}

#[derive(Debug, Deserialize)]
struct InspectEntry {
    #[serde(rename = "NetworkSettings")]
    network_settings: InspectNetworkSettings,
}

#[derive(Debug, Deserialize)]
struct InspectNetworkSettings {
    #[serde(rename = "Networks", default)]
    networks: BTreeMap<String, InspectNetwork>,
    #[serde(rename = "Ports", default)]
    ports: Option<BTreeMap<String, Option<Vec<InspectPortBinding>>>>,
}

#[derive(Debug, Deserialize)]
struct InspectNetwork {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

#[derive(Debug, Deserialize)]
struct InspectPortBinding {
    #[serde(rename = "HostIp", default)]
    host_ip: String,
    #[serde(rename = "HostPort", default)]
    host_port: String,
}

pub struct DockerBackend {
    arch: Arch,
    system_arch: OnceCell<String>,
    shutdown: Arc<ShutdownRegistry>,
    executor: Arc<DockerExecutor>,
}

impl DockerBackend {
    pub fn new(arch: Arch, shutdown: Arc<ShutdownRegistry>) -> Self {
        Self {
            arch,
            system_arch: OnceCell::new(),
            shutdown,
            executor: Arc::new(DockerExecutor),
        }
    }

    async fn system_arch(&self) -> Result<&str> {
        let arch = self
            .system_arch
            .get_or_try_init(|| async {
                let out = docker(&["info", "--format", "{{.Architecture}}"]).await?;
                Ok::<_, anyhow::Error>(out.trim().to_string())
            })
            .await?;
        Ok(arch.as_str())
    }

    async fn containers(&self, role: ClusterRole) -> Result<Vec<(String, NodeId)>> {
        let out = docker(&["container", "list", "-a", "--format", "{{.Names}}"]).await?;
        Ok(out
            .lines()
            .filter_map(|line| parse_container_name(role, line.trim()))
            .collect())
    }

    async fn selected(
        &self,
        role: ClusterRole,
        name: &str,
        nodes: Option<&[NodeId]>,
    ) -> Result<Vec<String>> {
        let all = self.node_list_in_cluster(role, name).await?;
        if all.is_empty() {
            bail!("Cluster {} not found", name);
        }
        let mut names = Vec::new();
        for node in all {
            if nodes.map_or(true, |list| list.contains(&node)) {
                names.push(container_name(role, name, node));
            }
        }
        Ok(names)
    }

    async fn inspect(&self, container: &str) -> Result<InspectEntry> {
        let out = docker(&["container", "inspect", container]).await?;
        let mut entries: Vec<InspectEntry> = serde_json::from_str(&out)
            .with_context(|| format!("Failed to parse inspect output for {}", container))?;
        entries
            .pop()
            .with_context(|| format!("No inspect data for {}", container))
    }
}

#[async_trait]
impl Backend for DockerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Docker
    }

    async fn init(&self) -> Result<()> {
        let arch = self.system_arch().await?;
        info!("Docker backend ready: host architecture={}", arch);
        Ok(())
    }

    async fn cluster_list(&self, role: ClusterRole) -> Result<Vec<String>> {
        let names: BTreeSet<String> = self
            .containers(role)
            .await?
            .into_iter()
            .map(|(cluster, _)| cluster)
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn node_list_in_cluster(&self, role: ClusterRole, name: &str) -> Result<Vec<NodeId>> {
        let mut nodes: Vec<NodeId> = self
            .containers(role)
            .await?
            .into_iter()
            .filter(|(cluster, _)| cluster == name)
            .map(|(_, node)| node)
            .collect();
        nodes.sort();
        Ok(nodes)
    }

    async fn list_templates(&self) -> Result<Vec<TemplateKey>> {
        let out = docker(&["image", "list", "--format", "{{.Repository}}:{{.Tag}}"]).await?;
        Ok(out
            .lines()
            .filter_map(|line| parse_template_image(line.trim()))
            .collect())
    }

    async fn deploy_template(
        &self,
        key: &TemplateKey,
        script: &str,
        payloads: &[FilePayload],
        extra: &ExtraParams,
    ) -> Result<()> {
        let build = build_container(key);
        let image = template_image(key);
        info!("Building template {} in container {}", image, build);

        let cleanup = build.clone();
        self.shutdown.register(build.clone(), move || {
            async move {
                if let Err(e) = docker(&["rm", "-f", &cleanup]).await {
                    warn!("Failed to remove build container {}: {:#}", cleanup, e);
                }
            }
            .boxed()
        });

        let steps = build_template(&build, &image, key, script, payloads, extra);
        release_build_handler(&self.shutdown, &build, steps).await?;
        info!("Template {} ready", image);
        Ok(())
    }

    async fn vacuum_template(&self, key: &TemplateKey) -> Result<()> {
        let build = build_container(key);
        match docker(&["rm", "-f", &build]).await {
            Ok(_) => {}
            Err(e) if format!("{:#}", e).contains("No such container") => {}
            Err(e) => return Err(e),
        }
        self.shutdown.unregister(&build);
        Ok(())
    }

    async fn vacuum_templates(&self) -> Result<()> {
        let out = docker(&["container", "list", "-a", "--format", "{{.Names}}"]).await?;
        for name in out.lines().map(str::trim).filter(|n| n.starts_with(BUILD_PREFIX)) {
            info!("Removing leftover build container {}", name);
            docker(&["rm", "-f", name]).await?;
        }
        Ok(())
    }

    async fn template_destroy(&self, key: &TemplateKey) -> Result<()> {
        let images: Vec<TemplateKey> = self
            .list_templates()
            .await?
            .into_iter()
            .filter(|t| t.matches(key))
            .collect();
        if images.is_empty() {
            bail!("Template {} not found", key);
        }
        for t in images {
            docker(&["image", "rm", &template_image(&t)]).await?;
        }
        Ok(())
    }

    async fn deploy_cluster(
        &self,
        role: ClusterRole,
        key: &TemplateKey,
        name: &str,
        count: usize,
        extra: &ExtraParams,
    ) -> Result<()> {
        let image = template_image(key);
        let existing = self.node_list_in_cluster(role, name).await?;
        let first = existing.last().map_or(1, |n| n.0 + 1);

        for n in first..first + count as u32 {
            let container = container_name(role, name, NodeId(n));
            let mut args: Vec<String> = vec![
                "run".into(),
                "-td".into(),
                "--name".into(),
                container.clone(),
                "--hostname".into(),
                format!("{}-{}", name.replace('_', "-"), n),
            ];
            if let Some(net) = &extra.network {
                args.extend(["--network".into(), net.clone()]);
            }
            if let Some(cpus) = &extra.cpu_limit {
                args.extend(["--cpus".into(), cpus.clone()]);
            }
            if let Some(ram) = &extra.ram_limit {
                args.extend(["-m".into(), ram.clone()]);
            }
            if let Some(swap) = &extra.swap_limit {
                args.extend(["--memory-swap".into(), swap.clone()]);
            }
            if extra.privileged {
                args.push("--privileged".into());
            }
            for port in &extra.expose_ports {
                args.extend(["-p".into(), port.clone()]);
            }
            for label in &extra.labels {
                args.extend(["--label".into(), label.clone()]);
            }
            args.push(image.clone());

            let refs: Vec<&str> = args.iter().map(String::as_str).collect();
            docker(&refs)
                .await
                .with_context(|| format!("Failed to create container {}", container))?;
            info!("Created container {}", container);
        }
        Ok(())
    }

    async fn cluster_start(
        &self,
        role: ClusterRole,
        name: &str,
        nodes: Option<&[NodeId]>,
    ) -> Result<()> {
        let names = self.selected(role, name, nodes).await?;
        let mut args = vec!["start"];
        args.extend(names.iter().map(String::as_str));
        docker(&args).await?;
        Ok(())
    }

    async fn cluster_stop(
        &self,
        role: ClusterRole,
        name: &str,
        nodes: Option<&[NodeId]>,
    ) -> Result<()> {
        let names = self.selected(role, name, nodes).await?;
        let mut args = vec!["stop", "-t", "10"];
        args.extend(names.iter().map(String::as_str));
        docker(&args).await?;
        Ok(())
    }

    async fn cluster_destroy(
        &self,
        role: ClusterRole,
        name: &str,
        nodes: Option<&[NodeId]>,
    ) -> Result<()> {
        let names = self.selected(role, name, nodes).await?;
        let mut args = vec!["rm", "-f"];
        args.extend(names.iter().map(String::as_str));
        docker(&args).await?;
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
        internal: bool,
    ) -> Result<BTreeMap<NodeId, String>> {
        let mut map = BTreeMap::new();
        for node in self.node_list_in_cluster(role, name).await? {
            let entry = self.inspect(&container_name(role, name, node)).await?;
            let ip = if internal {
                entry
                    .network_settings
                    .networks
                    .values()
                    .map(|n| n.ip_address.clone())
                    .find(|ip| !ip.is_empty())
            } else {
                entry
                    .network_settings
                    .ports
                    .into_iter()
                    .flat_map(|ports| ports.into_values())
                    .flatten()
                    .flatten()
                    .map(|b| match b.host_ip.as_str() {
                        "" | "0.0.0.0" => format!("127.0.0.1:{}", b.host_port),
                        host => format!("{}:{}", host, b.host_port),
                    })
                    .next()
            };
            if let Some(ip) = ip {
                map.insert(node, ip);
            }
        }
        Ok(map)
    }

    async fn is_system_arm(&self) -> Result<bool> {
        let arch = self.system_arch().await?;
        Ok(matches!(arch, "aarch64" | "arm64"))
    }

    fn arch(&self) -> Arch {
        self.arch
    }

    fn executor(&self) -> Arc<dyn RemoteExecutor> {
        self.executor.clone()
    }

    fn network_admin(&self) -> Option<&dyn NetworkAdmin> {
        Some(self)
    }
}

/// Stream each payload into a container through `docker exec -i`
async fn copy_into(container: &str, payloads: &[FilePayload]) -> Result<()> {
    for payload in payloads {
        let dir = payload
            .path
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .filter(|d| !d.is_empty())
            .unwrap_or("/");
        let script = format!(
            "mkdir -p {} && cat > {}",
            shell_quote(dir),
            shell_quote(&payload.path)
        );

        let mut child = Process::new("docker")
            .args(["exec", "-i", container, "/bin/sh", "-c", script.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to run docker exec")?;

        let mut reader = payload.open().await?;
        let mut stdin = child.stdin.take().context("docker exec stdin unavailable")?;
        let copied = tokio::io::copy(&mut reader, &mut stdin)
            .await
            .with_context(|| format!("Failed to stream {} into {}", payload.path, container))?;
        stdin.shutdown().await.ok();
        drop(stdin);

        let out = child.wait_with_output().await?;
        if !out.status.success() {
            bail!(
                "Copy of {} into {} failed: {}",
                payload.path,
                container,
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        if copied != payload.len {
            warn!(
                "Copied {} bytes to {}:{}, expected {}",
                copied, container, payload.path, payload.len
            );
        }
    }
    Ok(())
}

pub struct DockerExecutor;

#[async_trait]
impl RemoteExecutor for DockerExecutor {
    async fn run(
        &self,
        role: ClusterRole,
        cluster: &str,
        node: NodeId,
        commands: &[Command],
    ) -> Result<Vec<u8>> {
        let container = container_name(role, cluster, node);
        let env = format!("NODE={}", node);
        let mut output = Vec::new();
        for command in commands {
            let out = Process::new("docker")
                .args(["exec", "-e", env.as_str(), container.as_str()])
                .args(command)
                .output()
                .await
                .context("Failed to run docker exec")?;
            output.extend_from_slice(&out.stdout);
            if !out.status.success() {
                bail!(
                    "{:?} exited with {}: {}",
                    command,
                    out.status,
                    String::from_utf8_lossy(&out.stderr).trim()
                );
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
        copy_into(&container_name(role, cluster, node), payloads).await
    }

    async fn attach_and_run(
        &self,
        role: ClusterRole,
        cluster: &str,
        node: NodeId,
        command: &[String],
        interactive: bool,
    ) -> Result<()> {
        let container = container_name(role, cluster, node);
        let env = format!("NODE={}", node);
        let mut args = vec!["exec", "-e", env.as_str()];
        if interactive {
            args.push("-it");
        }
        args.push(container.as_str());
        let status = Process::new("docker")
            .args(&args)
            .args(command)
            .status()
            .await
            .context("Failed to run docker exec")?;
        if !status.success() {
            bail!("Command on {} exited with {}", container, status);
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkAdmin for DockerBackend {
    async fn create_network(
        &self,
        name: &str,
        driver: Option<&str>,
        subnet: Option<&str>,
        mtu: Option<u32>,
    ) -> Result<()> {
        let mut args = vec![
            "network".to_string(),
            "create".to_string(),
            "--driver".to_string(),
            driver.unwrap_or("bridge").to_string(),
        ];
        if let Some(subnet) = subnet {
            args.extend(["--subnet".to_string(), subnet.to_string()]);
        }
        if let Some(mtu) = mtu {
            args.extend([
                "-o".to_string(),
                format!("com.docker.network.driver.mtu={}", mtu),
            ]);
        }
        args.push(name.to_string());
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        docker(&refs).await?;
        info!("Created network {}", name);
        Ok(())
    }

    async fn list_networks(&self) -> Result<Vec<NetworkInfo>> {
        let out = docker(&[
            "network",
            "list",
            "--format",
            "{{.Name}}\t{{.Driver}}",
        ])
        .await?;
        let mut networks = Vec::new();
        for line in out.lines() {
            let Some((name, driver)) = line.split_once('\t') else {
                continue;
            };
            let subnet = docker(&[
                "network",
                "inspect",
                name,
                "--format",
                "{{range .IPAM.Config}}{{.Subnet}} {{end}}",
            ])
            .await
            .ok()
            .and_then(|s| s.split_whitespace().next().map(str::to_string));
            networks.push(NetworkInfo {
                name: name.to_string(),
                driver: driver.to_string(),
                subnet,
            });
        }
        Ok(networks)
    }

    async fn delete_network(&self, name: &str) -> Result<()> {
        docker(&["network", "rm", name]).await?;
        Ok(())
    }
}

/// Start the build container, install into it and commit it as `image`
async fn build_template(
    build: &str,
    image: &str,
    key: &TemplateKey,
    script: &str,
    payloads: &[FilePayload],
    extra: &ExtraParams,
) -> Result<()> {
    let base_image = format!("{}:{}", key.distro, key.distro_version);
    let platform;
    let mut args = vec!["run", "-td", "--name", build];
    if key.arch != Arch::Either {
        platform = format!("linux/{}", key.arch);
        args.extend(["--platform", platform.as_str()]);
    }
    if extra.privileged {
        args.push("--privileged");
    }
    args.push(base_image.as_str());
    docker(&args).await.context("Failed to start build container")?;

    let mut files = payloads.to_vec();
    files.push(FilePayload::from_bytes("/root/install.sh", script));
    copy_into(build, &files).await?;

    let out = Process::new("docker")
        .args([
            "exec",
            build,
            "/bin/bash",
            "-c",
            "chmod 755 /root/install.sh && /root/install.sh",
        ])
        .output()
        .await
        .context("Failed to run install script")?;
    if !out.status.success() {
        bail!(
            "Install script failed in {}: {}{}",
            build,
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        );
    }

    docker(&["stop", "-t", "1", build]).await?;
    docker(&["commit", build, image]).await?;
    docker(&["rm", "-f", build]).await?;
    Ok(())
}

/// Await the build steps, then drop the interrupt handler for `build`.
///
/// A failed build container is left for `vacuum_template`.
async fn release_build_handler(
    shutdown: &ShutdownRegistry,
    build: &str,
    steps: impl std::future::Future<Output = Result<()>>,
) -> Result<()> {
    let result = steps.await;
    shutdown.unregister(build);
    if let Err(e) = &result {
        warn!("Template build in {} failed: {:#}", build, e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_names_round_trip() {
        let name = container_name(ClusterRole::Server, "my_dc", NodeId(3));
        assert_eq!(name, "aerolab-my_dc_3");
        assert_eq!(
            parse_container_name(ClusterRole::Server, &name),
            Some(("my_dc".to_string(), NodeId(3)))
        );
        assert_eq!(parse_container_name(ClusterRole::Client, &name), None);
        assert_eq!(
            parse_container_name(ClusterRole::Client, "aerolab_c-tools_1"),
            Some(("tools".to_string(), NodeId(1)))
        );
        assert_eq!(parse_container_name(ClusterRole::Server, "aerotmpl-x"), None);
    }

    #[test]
    fn test_template_image_names() {
        let key = TemplateKey::new("ubuntu", "22.04", "7.0.0.5c", Arch::Arm64);
        let image = template_image(&key);
        assert_eq!(image, "aerolab-ubuntu_22.04_arm64:7.0.0.5c");
        assert_eq!(parse_template_image(&image), Some(key));
        assert_eq!(parse_template_image("ubuntu:22.04"), None);
        assert_eq!(parse_template_image("aerolab-my_dc_1:latest"), None);
    }

    #[test]
    fn test_inspect_parsing() {
        let raw = r#"[{"Id":"abc","NetworkSettings":{"Ports":{"3000/tcp":[{"HostIp":"0.0.0.0","HostPort":"3100"}]},"Networks":{"bridge":{"IPAddress":"172.17.0.2"}}}}]"#;
        let entries: Vec<InspectEntry> = serde_json::from_str(raw).unwrap();
        let settings = &entries[0].network_settings;
        assert_eq!(settings.networks["bridge"].ip_address, "172.17.0.2");
        let ports = settings.ports.as_ref().unwrap();
        let binding = &ports["3000/tcp"].as_ref().unwrap()[0];
        assert_eq!(binding.host_ip, "0.0.0.0");
        assert_eq!(binding.host_port, "3100");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/etc/aerospike"), "'/etc/aerospike'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[tokio::test]
    async fn test_failed_build_drops_interrupt_handler() {
        let shutdown = ShutdownRegistry::new();
        shutdown.register("aerotmpl-a", || async {}.boxed());
        shutdown.register("aerotmpl-b", || async {}.boxed());

        let err = release_build_handler(&shutdown, "aerotmpl-a", async {
            Err::<(), _>(anyhow::anyhow!("Install script failed in aerotmpl-a"))
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Install script failed"));
        assert_eq!(shutdown.len(), 1);

        let steps = async { Ok::<(), anyhow::Error>(()) };
        release_build_handler(&shutdown, "aerotmpl-b", steps)
            .await
            .unwrap();
        assert!(shutdown.is_empty());
    }
}
