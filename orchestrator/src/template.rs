//! Template cache: one reusable image per resolved [`TemplateKey`].
//!
//! There is no locking around a key. Two concurrent builds of the same key
//! may both provision; callers serialize template work per key.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::error::DeployError;
use crate::installer::{Credentials, InstallerSource};
use crate::scripts::ScriptTable;
use crate::types::{ExtraParams, FilePayload, TemplateKey};

/// Destination of the installer archive inside a build instance
pub const INSTALLER_PATH: &str = "/root/installer.tgz";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateOutcome {
    /// Fully resolved key the template is stored under
    pub key: TemplateKey,
    pub cache_hit: bool,
}

pub struct TemplateCache {
    backend: Arc<dyn Backend>,
    source: Arc<dyn InstallerSource>,
    scripts: Arc<ScriptTable>,
    work_dir: PathBuf,
    credentials: Credentials,
}

impl TemplateCache {
    pub fn new(
        backend: Arc<dyn Backend>,
        source: Arc<dyn InstallerSource>,
        scripts: Arc<ScriptTable>,
        work_dir: impl Into<PathBuf>,
        credentials: Credentials,
    ) -> Self {
        Self {
            backend,
            source,
            scripts,
            work_dir: work_dir.into(),
            credentials,
        }
    }

    /// Make sure a template for `key` exists, building it on a miss
    pub async fn ensure(
        &self,
        key: &TemplateKey,
        extra: &ExtraParams,
        no_vacuum_on_fail: bool,
    ) -> Result<TemplateOutcome, DeployError> {
        let mut key = key.clone();
        let mut url = None;

        if key.needs_resolution() {
            let resolved = self
                .source
                .resolve(&key, &self.credentials)
                .await
                .map_err(|e| DeployError::resolution(format!("{}: {:#}", key, e)))?;
            info!("Resolved {} to {}", key, resolved.key);
            key = resolved.key;
            url = Some(resolved.url);
        }

        let templates = self.backend.list_templates().await?;
        if templates.iter().any(|t| t.matches(&key)) {
            info!("Template cache hit: {}", key);
            return Ok(TemplateOutcome {
                key,
                cache_hit: true,
            });
        }
        info!("Template cache miss: {}", key);

        let script = self
            .scripts
            .lookup(self.backend.kind(), &key.distro, &key.distro_version)
            .ok_or_else(|| {
                DeployError::validation(format!(
                    "no provisioning script for {}:{}:{}",
                    self.backend.kind(),
                    key.distro,
                    key.distro_version
                ))
            })?
            .to_string();

        let installer = self.work_dir.join(key.installer_file_name());
        if tokio::fs::try_exists(&installer).await.unwrap_or(false) {
            info!("Using existing installer {:?}", installer);
        } else {
            let url = match url {
                Some(url) => url,
                None => {
                    self.source
                        .resolve(&key, &self.credentials)
                        .await
                        .map_err(|e| DeployError::resolution(format!("{}: {:#}", key, e)))?
                        .url
                }
            };
            tokio::fs::create_dir_all(&self.work_dir)
                .await
                .map_err(|e| DeployError::provisioning(format!("work directory: {}", e)))?;
            info!("Downloading installer {}", url);
            self.source
                .download(&url, &installer, &self.credentials)
                .await
                .map_err(|e| DeployError::resolution(format!("download {}: {:#}", url, e)))?;
        }

        let payload = FilePayload::from_file(INSTALLER_PATH, &installer)
            .await
            .map_err(|e| DeployError::provisioning(format!("{:#}", e)))?;

        if let Err(e) = self
            .backend
            .deploy_template(&key, &script, &[payload], extra)
            .await
        {
            if no_vacuum_on_fail {
                warn!("Template build for {} failed, leaving build instance in place", key);
            } else if let Err(ve) = self.backend.vacuum_template(&key).await {
                warn!("Failed to vacuum template build for {}: {:#}", key, ve);
            }
            return Err(DeployError::provisioning(format!(
                "template {}: {:#}",
                key, e
            )));
        }

        info!("Template {} created", key);
        Ok(TemplateOutcome {
            key,
            cache_hit: false,
        })
    }

    pub async fn list(&self) -> Result<Vec<TemplateKey>, DeployError> {
        Ok(self.backend.list_templates().await?)
    }

    /// Remove leftover build instances, for one key or all of them
    pub async fn vacuum(&self, key: Option<&TemplateKey>) -> Result<(), DeployError> {
        match key {
            Some(key) => self.backend.vacuum_template(key).await?,
            None => self.backend.vacuum_templates().await?,
        }
        Ok(())
    }

    pub async fn destroy(&self, key: &TemplateKey) -> Result<(), DeployError> {
        self.backend.template_destroy(key).await?;
        info!("Template {} destroyed", key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::stub::{StubBackend, StubInstallerSource};
    use crate::backend::BackendKind;
    use crate::types::Arch;

    fn cache(
        backend: Arc<StubBackend>,
        source: Arc<StubInstallerSource>,
        dir: &std::path::Path,
    ) -> TemplateCache {
        TemplateCache::new(
            backend,
            source,
            Arc::new(ScriptTable::builtin()),
            dir,
            Credentials::default(),
        )
    }

    #[tokio::test]
    async fn test_cache_hit_skips_provisioning() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(StubBackend::new());
        let source = Arc::new(StubInstallerSource::new("7.0.0.5", "22.04"));
        backend.add_template(TemplateKey::new("ubuntu", "22.04", "7.0.0.5", Arch::Amd64));

        let outcome = cache(backend.clone(), source.clone(), dir.path())
            .ensure(
                &TemplateKey::new("ubuntu", "22.04", "latest", Arch::Either),
                &ExtraParams::default(),
                false,
            )
            .await
            .unwrap();

        assert!(outcome.cache_hit);
        assert_eq!(outcome.key.version, "7.0.0.5");
        assert_eq!(backend.deploy_template_calls(), 0);
        assert!(source.downloads().is_empty());
    }

    #[tokio::test]
    async fn test_miss_downloads_once_and_builds() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(StubBackend::new());
        let source = Arc::new(StubInstallerSource::new("7.0.0.5", "22.04"));
        let cache = cache(backend.clone(), source.clone(), dir.path());
        let key = TemplateKey::new("ubuntu", "22.04", "6.4.0.2c", Arch::Amd64);

        let first = cache.ensure(&key, &ExtraParams::default(), false).await.unwrap();
        assert!(!first.cache_hit);
        assert_eq!(backend.deploy_template_calls(), 1);
        assert_eq!(source.downloads().len(), 1);
        assert!(dir.path().join(key.installer_file_name()).exists());

        let second = cache.ensure(&key, &ExtraParams::default(), false).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(backend.deploy_template_calls(), 1);
    }

    #[tokio::test]
    async fn test_existing_installer_is_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let key = TemplateKey::new("debian", "12", "7.1.0.0", Arch::Arm64);
        std::fs::write(dir.path().join(key.installer_file_name()), b"cached").unwrap();

        let backend = Arc::new(StubBackend::new());
        let source = Arc::new(StubInstallerSource::new("7.1.0.0", "12"));
        cache(backend.clone(), source.clone(), dir.path())
            .ensure(&key, &ExtraParams::default(), false)
            .await
            .unwrap();

        assert!(source.downloads().is_empty());
        assert_eq!(backend.templates(), vec![key]);
    }

    #[tokio::test]
    async fn test_failed_build_is_vacuumed_unless_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let key = TemplateKey::new("rocky", "9", "7.0.0.5", Arch::Amd64);

        let backend = Arc::new(StubBackend::new());
        backend.fail_deploy_template();
        let source = Arc::new(StubInstallerSource::new("7.0.0.5", "9"));
        let err = cache(backend.clone(), source.clone(), dir.path())
            .ensure(&key, &ExtraParams::default(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Provisioning(_)));
        assert_eq!(backend.vacuum_calls(), 1);
        assert!(backend.build_instances().is_empty());

        let kept = Arc::new(StubBackend::new());
        kept.fail_deploy_template();
        cache(kept.clone(), source, dir.path())
            .ensure(&key, &ExtraParams::default(), true)
            .await
            .unwrap_err();
        assert_eq!(kept.vacuum_calls(), 0);
        assert_eq!(kept.build_instances().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_script_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(StubBackend::new().with_kind(BackendKind::Gcp));
        let source = Arc::new(StubInstallerSource::new("7.0.0.5", "22.04"));
        let err = cache(backend.clone(), source.clone(), dir.path())
            .ensure(
                &TemplateKey::new("ubuntu", "16.04", "7.0.0.5", Arch::Amd64),
                &ExtraParams::default(),
                false,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Validation(_)));
        assert!(err.to_string().contains("gcp:ubuntu:16.04"));
        assert_eq!(backend.deploy_template_calls(), 0);
        assert!(source.downloads().is_empty());
    }
}
