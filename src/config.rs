use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cli::GlobalArgs;

pub const CONFIG_FILE_NAME: &str = ".rasactl.yaml";
/// Per-project marker file holding the deployment name.
pub const STATUS_FILE_NAME: &str = ".rasactl";

pub const ENV_RASA_X_URL: &str = "RASACTL_RASA_X_URL";
pub const ENV_SKIP_DOCKER_VERSION_CHECK: &str = "RASACTL_SKIP_DOCKER_VERSION_CHECK";
pub const ENV_CREDENTIALS_HELPER: &str = "RASACTL_CREDENTIALS_HELPER";

/// Contents of `~/.rasactl.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_deployment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_helper: Option<String>,
}

impl ConfigFile {
    /// Load the config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content)
            .with_context(|| format!("parse config file {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("write config file {}", path.display()))
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_FILE_NAME)
}

pub fn default_kubeconfig_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kube")
        .join("config")
}

/// Effective settings after merging flags, environment and the config file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config_path: PathBuf,
    pub config: ConfigFile,
    pub kubeconfig: PathBuf,
    pub kube_context: Option<String>,
    pub credentials_helper: Option<String>,
    pub verbose: bool,
    pub debug: bool,
}

impl Settings {
    pub fn resolve(global: &GlobalArgs) -> Result<Self> {
        let config_path = global.config.clone().unwrap_or_else(default_config_path);
        let config = ConfigFile::load(&config_path)?;

        let kubeconfig = global
            .kubeconfig
            .clone()
            .or_else(|| config.kubeconfig.clone())
            .unwrap_or_else(default_kubeconfig_path);
        let kube_context = global
            .kube_context
            .clone()
            .or_else(|| config.kube_context.clone())
            .filter(|c| !c.is_empty());
        let credentials_helper = std::env::var(ENV_CREDENTIALS_HELPER)
            .ok()
            .or_else(|| config.credentials_helper.clone())
            .filter(|h| !h.is_empty());

        Ok(Self {
            config_path,
            config,
            kubeconfig,
            kube_context,
            credentials_helper,
            verbose: global.verbose,
            debug: global.debug,
        })
    }

    /// Spinner and boxes are replaced by log lines in verbose/debug mode.
    pub fn interactive_output(&self) -> bool {
        !self.verbose && !self.debug
    }
}

/// Read the deployment name from the status file in `dir`, if any.
pub fn read_status_file(dir: &Path) -> Option<String> {
    let content = std::fs::read_to_string(dir.join(STATUS_FILE_NAME)).ok()?;
    let name = content.trim();
    (!name.is_empty()).then(|| name.to_string())
}

pub fn write_status_file(dir: &Path, namespace: &str) -> Result<()> {
    let path = dir.join(STATUS_FILE_NAME);
    std::fs::write(&path, namespace).with_context(|| format!("write {}", path.display()))
}

pub fn remove_status_file(dir: &Path) -> Result<()> {
    let path = dir.join(STATUS_FILE_NAME);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
    }
}

/// Deployment name from the cwd status file, then from the config file.
pub fn implicit_namespace(cwd: &Path, config: &ConfigFile) -> Option<String> {
    read_status_file(cwd).or_else(|| {
        config
            .current_deployment
            .clone()
            .filter(|d| !d.is_empty())
    })
}

/// Rasa X URL override: a per-deployment variable beats the global one.
pub fn rasa_x_url_override(namespace: &str) -> Option<String> {
    rasa_x_url_override_with(namespace, |key| std::env::var(key).ok())
}

fn rasa_x_url_override_with(
    namespace: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let scoped = format!(
        "{}_{}",
        ENV_RASA_X_URL,
        namespace.replace('-', "_").to_uppercase()
    );
    lookup(&scoped)
        .or_else(|| lookup(ENV_RASA_X_URL))
        .filter(|url| !url.is_empty())
}

pub fn skip_docker_version_check() -> bool {
    std::env::var(ENV_SKIP_DOCKER_VERSION_CHECK)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_config_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ConfigFile::load(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(cfg, ConfigFile::default());
    }

    #[test]
    fn config_file_round_trips_kebab_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let cfg = ConfigFile {
            current_deployment: Some("my-bot".into()),
            ..Default::default()
        };
        cfg.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("current-deployment: my-bot"));
        assert!(!raw.contains("kubeconfig"));
        assert_eq!(ConfigFile::load(&path).unwrap(), cfg);
    }

    #[test]
    fn invalid_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "current-deployment: [unclosed").unwrap();
        assert!(ConfigFile::load(&path).is_err());
    }

    #[test]
    fn status_file_wins_over_config() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ConfigFile {
            current_deployment: Some("from-config".into()),
            ..Default::default()
        };
        assert_eq!(
            implicit_namespace(dir.path(), &cfg).as_deref(),
            Some("from-config")
        );

        write_status_file(dir.path(), "from-project\n").unwrap();
        assert_eq!(
            implicit_namespace(dir.path(), &cfg).as_deref(),
            Some("from-project")
        );

        remove_status_file(dir.path()).unwrap();
        remove_status_file(dir.path()).unwrap();
        assert_eq!(read_status_file(dir.path()), None);
    }

    #[test]
    fn url_override_prefers_scoped_variable() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("RASACTL_RASA_X_URL", "http://global"),
            ("RASACTL_RASA_X_URL_MY_BOT", "http://scoped"),
        ]);
        let lookup = |k: &str| env.get(k).map(|v| v.to_string());

        assert_eq!(
            rasa_x_url_override_with("my-bot", lookup).as_deref(),
            Some("http://scoped")
        );
        assert_eq!(
            rasa_x_url_override_with("other", lookup).as_deref(),
            Some("http://global")
        );
        assert_eq!(rasa_x_url_override_with("x", |_| None), None);
    }
}
