use aerofleet_orchestrator::backend::BackendConfig;
use aerofleet_orchestrator::installer::{Credentials, DEFAULT_ARTIFACTS_URL};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_PARALLEL_THREADS: usize = 50;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    /// Where installers are downloaded to
    pub work_dir: Option<PathBuf>,
    pub parallel_threads: Option<usize>,
    pub artifacts_url: Option<String>,
    pub download: Credentials,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text =
            fs::read_to_string(path).with_context(|| format!("Failed to read config {:?}", path))?;
        let cfg = toml::from_str(&text).with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create dir {:?}", parent))?;
        }
        let text = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, text).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(|| {
            let mut dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
            dir.push("aerofleet");
            dir
        })
    }

    pub fn parallel_threads(&self) -> usize {
        self.parallel_threads.unwrap_or(DEFAULT_PARALLEL_THREADS)
    }

    pub fn artifacts_url(&self) -> &str {
        self.artifacts_url.as_deref().unwrap_or(DEFAULT_ARTIFACTS_URL)
    }
}

pub fn default_config_path() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("aerofleet");
    dir.push("config.toml");
    dir
}

#[cfg(test)]
mod tests {
    use super::*;
    use aerofleet_orchestrator::backend::BackendKind;
    use aerofleet_orchestrator::Arch;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.backend.kind, BackendKind::Docker);
        assert_eq!(cfg.parallel_threads(), DEFAULT_PARALLEL_THREADS);
        assert_eq!(cfg.artifacts_url(), DEFAULT_ARTIFACTS_URL);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "parallel_threads = 8\n\n[backend]\narch = \"arm64\"\n\n[download]\nuser = \"me\"\n",
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.parallel_threads(), 8);
        assert_eq!(cfg.backend.kind, BackendKind::Docker);
        assert_eq!(cfg.backend.arch, Some(Arch::Arm64));
        assert_eq!(cfg.download.user.as_deref(), Some("me"));
        assert!(cfg.download.pass.is_none());
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            work_dir: Some(PathBuf::from("/srv/installers")),
            ..Default::default()
        };
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.work_dir(), PathBuf::from("/srv/installers"));
    }
}
