use anyhow::{Context, Result};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{release_options, RasaCtl};
use crate::api::Version;
use crate::cli::StartArgs;
use crate::compat::{self, DEFAULT_CHART_VERSION};
use crate::config;
use crate::docker::DockerEngine;
use crate::hosts::{self, HOSTS_FILE};
use crate::names;
use crate::rasax::{self, RasaX};
use crate::state::{DeploymentState, StartAction, StateSecret};
use crate::tui;
use crate::values::{self, InstallValues};

const NOT_KIND: &str = "It looks like you don't use kind as a current Kubernetes context, \
                        the project-path flag is supported only with kind.";
const LOCAL_IP: &str = "127.0.0.1";
const NO_VERSION: &str = "0.0.0";

/// Directory to mount into Rasa X: the cwd with `--project`, else `--project-path`.
pub fn project_directory(
    project: bool,
    project_path: Option<&Path>,
    cwd: &Path,
) -> Result<Option<PathBuf>> {
    if project {
        return Ok(Some(cwd.to_path_buf()));
    }
    let Some(path) = project_path else {
        return Ok(None);
    };
    let path = cwd.join(path);
    let meta = std::fs::metadata(&path)
        .with_context(|| format!("the {} path doesn't exist", path.display()))?;
    if !meta.is_dir() {
        anyhow::bail!(
            "The {} path can't point to a file, it has to be a directory",
            path.display()
        );
    }
    Ok(Some(path))
}

fn is_unknown(version: &str) -> bool {
    version.is_empty() || version == NO_VERSION
}

/// Body of the box printed after a fresh install.
pub fn summary(version: &Version, url: &str, password: &str) -> String {
    let mut lines = vec![format!("URL: {}", url)];
    if !is_unknown(&version.rasa.production) && !is_unknown(&version.rasa.worker) {
        lines.push(format!("Rasa production version: {}", version.rasa.production));
        lines.push(format!("Rasa worker version: {}", version.rasa.worker));
    }
    lines.push(format!("Rasa X version: {}", version.rasa_x));
    lines.push(format!("Rasa X password: {}", password));
    lines.join("\n")
}

/// What `start` does for an observed deployment state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPlan {
    pub action: StartAction,
    /// The hosts file gets a new entry, so it must be writable up front.
    pub check_hosts_file: bool,
    pub print_summary: bool,
}

pub fn plan_start(state: DeploymentState, local_without_cloud: bool) -> StartPlan {
    let action = state.start_action();
    let install = action == StartAction::Install;
    StartPlan {
        action,
        check_hosts_file: install && local_without_cloud,
        print_summary: install,
    }
}

/// Once other deployments exist, an unknown name is only created on request.
pub fn check_new_deployment(
    namespace: &str,
    creating: bool,
    others_managed: bool,
    exists: bool,
) -> Result<()> {
    if !creating && others_managed && !exists {
        anyhow::bail!(
            "The {} deployment doesn't exist, use the --create flag to create a new deployment",
            namespace
        );
    }
    Ok(())
}

impl RasaCtl {
    async fn ensure_start_target(&self, args: &StartArgs) -> Result<()> {
        let creating = args.create || args.project || args.project_path.is_some();
        if creating {
            return Ok(());
        }
        let others_managed = !self.kube.managed_namespaces().await?.is_empty();
        let exists = others_managed && self.kube.namespace_exists().await?;
        check_new_deployment(&self.namespace, creating, others_managed, exists)
    }

    pub async fn start(&self, args: StartArgs) -> Result<()> {
        compat::check_chart_version(args.helm.rasa_x_chart_version.as_deref())?;
        if config::skip_docker_version_check() {
            debug!("skipping the Docker version check");
        } else {
            DockerEngine::connect()?.check_version().await?;
        }

        debug!(namespace = %self.namespace, "validating deployment name");
        names::validate_name(&self.namespace)?;

        self.ensure_start_target(&args).await?;

        let plan = plan_start(
            self.check_deployment_status().await?,
            self.is_local_without_cloud(),
        );
        if plan.action == StartAction::AlreadyRunning {
            println!("Rasa X for the {} namespace is running.", self.namespace);
            return Ok(());
        }
        if plan.check_hosts_file {
            hosts::ensure_writable(Path::new(HOSTS_FILE))?;
        }

        let password = if args.rasa_x_password_stdin {
            tui::read_stdin_secret(std::io::stdin().lock())?
        } else {
            args.rasa_x_password.clone()
        };

        self.kube.create_namespace().await?;
        self.kube.add_namespace_label().await?;

        match plan.action {
            StartAction::Install => self.install(&args, &password).await?,
            StartAction::StartStopped => self.start_stopped(&args).await?,
            StartAction::AlreadyRunning => {}
        }

        let rasax = RasaX::new(&self.rasa_x_url().await?)?.with_token(self.kube.rasa_x_token().await?);
        self.wait_for_rasa_x(&rasax).await?;
        info!(url = %rasax.url(), password = %values::mask_secret(&password), "Rasa X is ready");
        self.printer.spin("Ready!");
        self.printer.stop_spinner();

        let version = rasax.version().await?;
        let release = self.helm.status().await?;
        self.record_version(&version, Some(&release)).await?;

        if plan.print_summary {
            self.print_summary(&rasax, &version, &password).await?;
        }
        Ok(())
    }

    async fn install(&self, args: &StartArgs, password: &str) -> Result<()> {
        let cwd = std::env::current_dir().context("get the current working directory")?;
        let project = project_directory(args.project, args.project_path.as_deref(), &cwd)?;

        let mut pvc = None;
        if let Some(path) = &project {
            let control_plane = self
                .kube
                .kind_control_plane()
                .await?
                .ok_or_else(|| anyhow::anyhow!(NOT_KIND))?;
            self.printer.spin("Creating and joining a kind node");
            DockerEngine::connect()?
                .create_kind_node(&self.namespace, &control_plane, path)
                .await?;
            pvc = Some(self.kube.create_volume(path).await?);
            config::write_status_file(path, &self.namespace)?;
        }

        let state = StateSecret {
            project_path: project
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
            helm_release_name: self.helm.release_name.clone(),
            ..Default::default()
        };
        self.kube.save_state(&state).await?;

        let user = match &args.helm.values_file {
            Some(path) => values::read_values_file(path)?,
            None => json!({}),
        };
        let install = InstallValues {
            namespace: &self.namespace,
            backend: self.kube.backend,
            cloud: self.cloud.is_known(),
            edge_release: args.rasa_x_edge_release,
            project_pvc: pvc.as_deref(),
            password,
            erlang_cookie: values::erlang_cookie()?,
        };
        let chart_values = install.compose(user);

        let mut opts = release_options(&args.helm, false, false);
        if opts.chart_version.is_none() {
            opts.chart_version = Some(DEFAULT_CHART_VERSION.to_string());
        }

        self.printer.spin("Deploying Rasa X");
        self.helm.install(&chart_values, &opts).await?;

        if install.needs_hosts_entry() {
            let host = values::local_host(&self.namespace);
            hosts::add_host(Path::new(HOSTS_FILE), &host, LOCAL_IP)?;
            debug!(%host, "hosts entry added");
        }
        Ok(())
    }

    async fn start_stopped(&self, args: &StartArgs) -> Result<()> {
        let state = self.kube.read_state().await?;
        self.printer.spin("Starting Rasa X");
        info!(namespace = %self.namespace, "starting Rasa X");

        if state.has_project() && self.kube.kind_control_plane().await?.is_some() {
            DockerEngine::connect()?.start_node(&self.namespace).await?;
        }

        let mut opts = release_options(&args.helm, false, true);
        if opts.chart_version.is_none() && !state.helm_chart_version.is_empty() {
            opts.chart_version = Some(state.helm_chart_version.clone());
        }
        self.helm.upgrade(&json!({}), &opts).await?;
        self.kube.scale_up().await
    }

    async fn print_summary(&self, rasax: &RasaX, version: &Version, password: &str) -> Result<()> {
        self.printer
            .green_box("Rasa X", &summary(version, rasax.url(), password));

        if !rasax::is_url_accessible(rasax.url()).await {
            self.printer.yellow_box(
                "Hint",
                &format!(
                    "It looks like the {} URL is not accessible, check if all needed firewall rules are in place",
                    rasax.url()
                ),
            );
        }

        let state = self.kube.read_state().await?;
        if state.has_project() && !compat::satisfies(&version.rasa_x, ">=1.0.0").unwrap_or(true) {
            self.printer.yellow_box(
                "Notice",
                &format!(
                    "You're using Rasa X in the {} version, mounting a local rasa project is supported for Rasa X / Enterprise >= 1.0.0",
                    version.rasa_x
                ),
            );
        }
        Ok(())
    }
}
