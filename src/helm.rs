use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::command::{require_tool, CommandBuilder};
use crate::values::write_values_file;

pub const CHART_NAME: &str = "rasa-x";
pub const REPO_URL: &str = "https://rasahq.github.io/rasa-x-helm";
const DESCRIPTION: &str = "rasactl";
const HISTORY_MAX: &str = "10";
const TIMEOUT_MESSAGE: &str = "timed out waiting for the condition";

/// Latest revision of a release as reported by `helm history`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReleaseRevision {
    pub revision: i64,
    #[serde(default)]
    pub updated: String,
    pub status: String,
    /// `<name>-<version>`, e.g. `rasa-x-4.3.1`
    pub chart: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub description: String,
}

impl ReleaseRevision {
    /// Split `rasa-x-4.3.1` into `("rasa-x", "4.3.1")`.
    pub fn chart_name_and_version(&self) -> (String, String) {
        match self.chart.rfind('-') {
            Some(idx) => (self.chart[..idx].to_string(), self.chart[idx + 1..].to_string()),
            None => (self.chart.clone(), String::new()),
        }
    }
}

/// Options of an install or upgrade run.
#[derive(Debug, Clone, Default)]
pub struct ReleaseOptions {
    pub chart_version: Option<String>,
    pub timeout: String,
    pub atomic: bool,
    pub reuse_values: bool,
}

/// Rewrite helm errors into something actionable.
pub fn rewrite_error(stderr: &str) -> anyhow::Error {
    let message = stderr.trim().trim_start_matches("Error: ");
    if message.contains(TIMEOUT_MESSAGE) {
        anyhow::anyhow!(
            "{}. Check your deployment status manually with `rasactl status`",
            TIMEOUT_MESSAGE
        )
    } else {
        anyhow::anyhow!("{}", message)
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("release: not found")
}

/// Fail early when the `helm` binary is missing.
pub fn require_helm() -> Result<()> {
    require_tool("helm", "see https://helm.sh/docs/intro/install/")?;
    Ok(())
}

/// Driver for the `helm` binary, bound to one release in one namespace.
#[derive(Debug, Clone)]
pub struct Helm {
    pub namespace: String,
    pub release_name: String,
    kubeconfig: PathBuf,
    kube_context: Option<String>,
    chart_dir: Option<PathBuf>,
}

impl Helm {
    pub fn new(namespace: &str, kubeconfig: &Path, kube_context: Option<&str>) -> Self {
        let local_chart = Path::new(CHART_NAME);
        let chart_dir = local_chart.is_dir().then(|| local_chart.to_path_buf());
        if chart_dir.is_some() {
            warn!(
                "the {} directory in the current working directory is used as the helm chart source",
                CHART_NAME
            );
        }

        Self {
            namespace: namespace.to_string(),
            release_name: CHART_NAME.to_string(),
            kubeconfig: kubeconfig.to_path_buf(),
            kube_context: kube_context.map(str::to_string),
            chart_dir,
        }
    }

    fn command(&self, subcommand: &[&str]) -> CommandBuilder {
        CommandBuilder::new("helm")
            .args(subcommand)
            .arg("--namespace")
            .arg(&self.namespace)
            .arg("--kubeconfig")
            .arg(&self.kubeconfig)
            .opt_arg("--kube-context", self.kube_context.as_deref())
            .context(format!("run helm {}", subcommand.join(" ")))
    }

    fn with_chart(&self, cmd: CommandBuilder, version: Option<&str>) -> CommandBuilder {
        match &self.chart_dir {
            Some(dir) => cmd.arg(dir),
            None => cmd
                .arg(CHART_NAME)
                .arg("--repo")
                .arg(REPO_URL)
                .opt_arg("--version", version),
        }
    }

    async fn run(&self, cmd: CommandBuilder) -> Result<String> {
        let out = cmd.output().await?;
        if out.success {
            Ok(out.stdout)
        } else {
            Err(rewrite_error(&out.stderr))
        }
    }

    pub async fn install(&self, values: &Value, opts: &ReleaseOptions) -> Result<()> {
        let file = write_values_file(values)?;
        let cmd = self.command(&["install"]).arg(&self.release_name);
        let cmd = self
            .with_chart(cmd, opts.chart_version.as_deref())
            .args(["--wait", "--timeout", opts.timeout.as_str()])
            .args(["--description", DESCRIPTION])
            .arg("-f")
            .arg(file.path());

        info!(release = %self.release_name, namespace = %self.namespace, "installing helm chart");
        self.run(cmd).await?;
        info!(release = %self.release_name, "installation has finished");
        Ok(())
    }

    pub async fn upgrade(&self, values: &Value, opts: &ReleaseOptions) -> Result<()> {
        let file = write_values_file(values)?;
        let cmd = self.command(&["upgrade"]).arg(&self.release_name);
        let mut cmd = self
            .with_chart(cmd, opts.chart_version.as_deref())
            .args(["--wait", "--timeout", opts.timeout.as_str()])
            .args(["--description", DESCRIPTION])
            .args(["--history-max", HISTORY_MAX])
            .arg("-f")
            .arg(file.path());
        if opts.atomic {
            cmd = cmd.arg("--atomic");
        }
        if opts.reuse_values {
            cmd = cmd.arg("--reuse-values");
        }

        info!(release = %self.release_name, namespace = %self.namespace, "upgrading helm release");
        self.run(cmd).await?;
        info!(release = %self.release_name, "upgrade has finished");
        Ok(())
    }

    pub async fn uninstall(&self) -> Result<()> {
        let cmd = self
            .command(&["uninstall"])
            .arg(&self.release_name)
            .args(["--wait", "--timeout", "10m"]);
        self.run(cmd).await?;
        info!(release = %self.release_name, "release uninstalled");
        Ok(())
    }

    /// Latest revision of the release, `None` when it doesn't exist.
    pub async fn latest_revision(&self) -> Result<Option<ReleaseRevision>> {
        let out = self
            .command(&["history"])
            .arg(&self.release_name)
            .args(["--max", "1", "-o", "json"])
            .output()
            .await?;
        if !out.success {
            if is_not_found(&out.stderr) {
                debug!(release = %self.release_name, "release not found");
                return Ok(None);
            }
            return Err(rewrite_error(&out.stderr));
        }
        let revisions: Vec<ReleaseRevision> =
            serde_json::from_str(&out.stdout).context("parse helm history")?;
        Ok(revisions.into_iter().max_by_key(|r| r.revision))
    }

    pub async fn is_deployed(&self) -> Result<bool> {
        Ok(self.latest_revision().await?.is_some())
    }

    /// Latest revision, failing when the release doesn't exist.
    pub async fn status(&self) -> Result<ReleaseRevision> {
        self.latest_revision().await?.ok_or_else(|| {
            anyhow::anyhow!(
                "the {} release doesn't exist in the {} namespace",
                self.release_name,
                self.namespace
            )
        })
    }

    /// All values of the release, computed ones included.
    pub async fn values(&self) -> Result<Value> {
        let cmd = self
            .command(&["get", "values"])
            .arg(&self.release_name)
            .args(["--all", "-o", "json"]);
        let out = self.run(cmd).await?;
        let values: Option<Value> = serde_json::from_str(&out).context("parse helm values")?;
        Ok(values.unwrap_or_else(|| serde_json::json!({})))
    }
}
