//! Installer discovery and download against the public artifacts index.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{Arch, Edition, ProductVersion, TemplateKey};

pub const DEFAULT_ARTIFACTS_URL: &str = "https://artifacts.aerospike.com/";

/// Download credentials for restricted editions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub user: Option<String>,
    pub pass: Option<String>,
}

/// A template key with every pattern replaced by a concrete value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub key: TemplateKey,
    pub url: String,
}

/// Source of installer archives
#[async_trait]
pub trait InstallerSource: Send + Sync {
    /// Resolve version and distro-version patterns and find the installer URL
    async fn resolve(&self, key: &TemplateKey, credentials: &Credentials) -> Result<Resolved>;

    /// Fetch `url` to `dest`
    async fn download(&self, url: &str, dest: &Path, credentials: &Credentials) -> Result<()>;
}

/// One installer archive found in a version directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerEntry {
    pub url: String,
    pub distro: String,
    pub distro_version: String,
    pub arch: Arch,
}

pub struct HttpInstallerSource {
    base_url: Url,
    http: reqwest::Client,
    user_agent: String,
    retries: u32,
}

impl HttpInstallerSource {
    pub fn new(base_url: &str, timeout: Duration, retries: u32) -> Result<Self> {
        let base_url = Url::parse(base_url).context("Invalid artifacts base URL")?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url,
            http,
            user_agent: format!("aerofleet/{}", env!("CARGO_PKG_VERSION")),
            retries,
        })
    }

    fn edition_url(&self, edition: Edition) -> Result<Url> {
        let path = format!("aerospike-server-{}/", edition);
        self.base_url.join(&path).with_context(|| {
            format!(
                "Failed to join base_url={} with path={}",
                self.base_url, path
            )
        })
    }

    fn request(&self, url: &Url, credentials: &Credentials, auth: bool) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .get(url.clone())
            .header("user-agent", &self.user_agent)
            .header("x-request-id", Uuid::new_v4().to_string());
        if auth {
            if let Some(user) = &credentials.user {
                req = req.basic_auth(user, credentials.pass.as_ref());
            }
        }
        req
    }

    /// GET a listing page, retrying with credentials and on server errors
    async fn get_text(&self, url: &Url, credentials: &Credentials) -> Result<String> {
        let mut attempt: u32 = 0;
        let mut auth = false;
        loop {
            attempt += 1;
            debug!("HTTP GET {} (attempt {}, auth={})", url, attempt, auth);
            let resp = self
                .request(url, credentials, auth)
                .send()
                .await
                .with_context(|| format!("Request to {} failed", url))?;
            let status = resp.status();

            if status.is_success() {
                return resp.text().await.context("Failed to read listing body");
            }
            if !auth && credentials.user.is_some() {
                auth = true;
                continue;
            }
            if status == StatusCode::UNAUTHORIZED {
                anyhow::bail!(
                    "HTTP 401 for {}: unauthorized access, check download username and password",
                    url
                );
            }
            if status.is_server_error() && attempt <= self.retries {
                tokio::time::sleep(Duration::from_millis(300)).await;
                continue;
            }
            anyhow::bail!("HTTP GET {} failed: status={}", url, status.as_u16());
        }
    }
}

#[async_trait]
impl InstallerSource for HttpInstallerSource {
    async fn resolve(&self, key: &TemplateKey, credentials: &Credentials) -> Result<Resolved> {
        let version = key.product_version();
        let edition_url = self.edition_url(version.edition)?;

        let number = if version.needs_resolution() {
            let listing = self.get_text(&edition_url, credentials).await?;
            latest_version(&listing, version.wildcard_prefix()).with_context(|| {
                format!("No version matching '{}' listed at {}", version, edition_url)
            })?
        } else {
            version.number.clone()
        };

        let version_url = edition_url
            .join(&format!("{}/", number))
            .context("Failed to build version URL")?;
        let listing = self.get_text(&version_url, credentials).await?;
        let installers = parse_installers(version_url.as_str(), &listing);
        let entry = pick_installer(&installers, &key.distro, &key.distro_version, key.arch)
            .with_context(|| {
                format!(
                    "Installer for {}:{}:{} not found for version {}",
                    key.distro, key.distro_version, key.arch, number
                )
            })?;

        let resolved = TemplateKey {
            distro: key.distro.clone(),
            distro_version: entry.distro_version.clone(),
            version: format!("{}{}", number, version.edition.suffix()),
            arch: key.arch,
        };
        info!("Resolved {} to {} ({})", key, resolved, entry.url);
        Ok(Resolved {
            key: resolved,
            url: entry.url.clone(),
        })
    }

    async fn download(&self, url: &str, dest: &Path, credentials: &Credentials) -> Result<()> {
        let url = Url::parse(url).with_context(|| format!("Invalid installer URL {}", url))?;
        debug!("HTTP(download) GET {}", url);

        let mut resp = self
            .request(&url, credentials, false)
            .send()
            .await
            .context("Request failed")?;
        if !resp.status().is_success() && credentials.user.is_some() {
            resp = self
                .request(&url, credentials, true)
                .send()
                .await
                .context("Request failed")?;
        }
        let status = resp.status();
        if !status.is_success() {
            let bytes = resp.bytes().await.unwrap_or_default();
            anyhow::bail!(
                "Download failed: status={} body={}",
                status.as_u16(),
                String::from_utf8_lossy(&bytes)
            );
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create dir {:?}", parent))?;
        }

        let partial = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&partial)
            .await
            .with_context(|| format!("Failed to create {:?}", partial))?;

        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Stream read failed")?;
            file.write_all(&chunk).await.context("file write failed")?;
        }
        file.flush().await.context("file flush failed")?;
        tokio::fs::rename(&partial, dest)
            .await
            .with_context(|| format!("Failed to move download into {:?}", dest))?;
        info!("Downloaded {} to {:?}", url, dest);
        Ok(())
    }
}

const ARCH_SUFFIXES: [(&str, Arch); 8] = [
    (".x86_64", Arch::Amd64),
    ("_x86_64", Arch::Amd64),
    (".amd64", Arch::Amd64),
    ("_amd64", Arch::Amd64),
    (".arm64", Arch::Arm64),
    ("_arm64", Arch::Arm64),
    (".aarch64", Arch::Arm64),
    ("_aarch64", Arch::Arm64),
];

fn hrefs(listing: &str) -> impl Iterator<Item = &str> {
    listing.split("href=\"").skip(1).filter_map(|rest| rest.split('"').next())
}

/// Highest version directory in an edition listing, optionally under a prefix
pub fn latest_version(listing: &str, prefix: Option<&str>) -> Option<String> {
    hrefs(listing)
        .filter_map(|href| href.strip_suffix('/'))
        .map(|dir| dir.rsplit('/').next().unwrap_or(dir))
        .filter(|dir| dir.starts_with(|c: char| c.is_ascii_digit()))
        .filter(|dir| prefix.map_or(true, |p| dir.starts_with(p)))
        .max_by_key(|dir| ProductVersion::parse(dir).components())
        .map(|dir| dir.to_string())
}

/// Installer archives listed in a version directory
pub fn parse_installers(base_url: &str, listing: &str) -> Vec<InstallerEntry> {
    let base = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{}/", base_url)
    };

    let mut out = Vec::new();
    for file in hrefs(listing) {
        if !file.starts_with("aerospike-") || !file.ends_with(".tgz") {
            continue;
        }
        let stem = file.trim_end_matches(".tgz");
        let (platform, arches) = match ARCH_SUFFIXES
            .iter()
            .find_map(|(suffix, arch)| stem.strip_suffix(suffix).map(|rest| (rest, vec![*arch])))
        {
            Some(found) => found,
            None => (stem, vec![Arch::Amd64, Arch::Arm64]),
        };
        let Some(platform) = platform.rsplit(['-', '_']).next() else {
            continue;
        };
        let platform = platform.trim_start_matches(|c: char| c.is_ascii_digit());

        let distros: Vec<(&str, String)> = if let Some(v) = platform.strip_prefix("ubuntu") {
            vec![("ubuntu", v.to_string())]
        } else if let Some(v) = platform.strip_prefix("debian") {
            vec![("debian", v.to_string())]
        } else if let Some(v) = platform.strip_prefix("amzn") {
            vec![("amazon", v.to_string())]
        } else if let Some(v) = platform.strip_prefix("el") {
            let mut d = vec![("centos", v.to_string()), ("rocky", v.to_string())];
            if v == "7" {
                d.push(("amazon", "2".to_string()));
            }
            d
        } else {
            continue;
        };

        for (distro, distro_version) in distros {
            for arch in &arches {
                out.push(InstallerEntry {
                    url: format!("{}{}", base, file),
                    distro: distro.to_string(),
                    distro_version: distro_version.clone(),
                    arch: *arch,
                });
            }
        }
    }
    out
}

/// Exact distro version, or the numerically highest one for `latest`
pub fn pick_installer<'a>(
    installers: &'a [InstallerEntry],
    distro: &str,
    distro_version: &str,
    arch: Arch,
) -> Option<&'a InstallerEntry> {
    let mut candidates = installers
        .iter()
        .filter(|i| i.distro == distro && i.arch.matches(arch));
    if distro_version != "latest" {
        return candidates.find(|i| i.distro_version == distro_version);
    }
    candidates.max_by_key(|i| {
        i.distro_version
            .split('.')
            .map(|p| p.parse::<u32>().unwrap_or(0))
            .collect::<Vec<_>>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EDITION_LISTING: &str = r#"<html><body>
<img src="/icons/folder.gif"> <a href="6.4.0.2/">6.4.0.2/</a>
<img src="/icons/folder.gif"> <a href="7.0.0.5/">7.0.0.5/</a>
<img src="/icons/folder.gif"> <a href="7.0.0.10/">7.0.0.10/</a>
<img src="/icons/folder.gif"> <a href="7.1.0.0/">7.1.0.0/</a>
<img src="/icons/back.gif"> <a href="/">Parent Directory</a>
</body></html>"#;

    const VERSION_LISTING: &str = r#"
<a href="aerospike-server-enterprise_7.0.0.5_tools-10.0.0_ubuntu20.04_x86_64.tgz">x</a>
<a href="aerospike-server-enterprise_7.0.0.5_tools-10.0.0_ubuntu22.04_x86_64.tgz">x</a>
<a href="aerospike-server-enterprise_7.0.0.5_tools-10.0.0_ubuntu22.04_aarch64.tgz">x</a>
<a href="aerospike-server-enterprise_7.0.0.5_tools-10.0.0_el7_x86_64.tgz">x</a>
<a href="aerospike-server-enterprise_7.0.0.5_tools-10.0.0_debian12_x86_64.tgz">x</a>
<a href="aerospike-server-enterprise_7.0.0.5_tools-10.0.0_debian12_x86_64.tgz.sha256">x</a>
"#;

    #[test]
    fn test_latest_version() {
        assert_eq!(latest_version(EDITION_LISTING, None).unwrap(), "7.1.0.0");
        assert_eq!(
            latest_version(EDITION_LISTING, Some("7.0")).unwrap(),
            "7.0.0.10"
        );
        assert!(latest_version(EDITION_LISTING, Some("8.")).is_none());
    }

    #[test]
    fn test_latest_star_resolves_to_highest_version() {
        let listing = r#"<a href="7.1.0.2/">7.1.0.2/</a> <a href="7.2.0.1/">7.2.0.1/</a>"#;
        let version = ProductVersion::parse("latest*");
        assert!(version.needs_resolution());
        assert_eq!(
            latest_version(listing, version.wildcard_prefix()).as_deref(),
            Some("7.2.0.1")
        );
    }

    #[test]
    fn test_parse_and_pick_installers() {
        let base = "https://artifacts.aerospike.com/aerospike-server-enterprise/7.0.0.5/";
        let installers = parse_installers(base, VERSION_LISTING);
        assert!(installers.iter().all(|i| i.url.starts_with(base)));

        let latest = pick_installer(&installers, "ubuntu", "latest", Arch::Amd64).unwrap();
        assert_eq!(latest.distro_version, "22.04");

        let arm = pick_installer(&installers, "ubuntu", "22.04", Arch::Arm64).unwrap();
        assert!(arm.url.ends_with("_aarch64.tgz"));

        assert!(pick_installer(&installers, "ubuntu", "20.04", Arch::Arm64).is_none());
        assert!(pick_installer(&installers, "rocky", "7", Arch::Amd64).is_some());
        assert!(pick_installer(&installers, "amazon", "2", Arch::Amd64).is_some());
        assert!(pick_installer(&installers, "debian", "12", Arch::Amd64).is_some());
    }
}
