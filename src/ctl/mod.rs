use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::Version;
use crate::cli::{
    AuthCommands, Commands, ConfigCommands, ConnectCommands, EnterpriseCommands, HelmArgs,
};
use crate::cloud::CloudProvider;
use crate::config::{self, Settings};
use crate::credentials::{Credentials, ProgramHelper};
use crate::health::{self, HealthEvent, Readiness};
use crate::helm::{self, Helm, ReleaseOptions, ReleaseRevision, CHART_NAME};
use crate::k8s::{BackendType, Kubernetes};
use crate::names;
use crate::output::Printer;
use crate::rasax::RasaX;
use crate::state::DeploymentState;

mod add;
mod auth;
mod connect;
mod delete;
mod enterprise;
mod logs;
mod model;
mod start;
mod status;
mod stop;
mod upgrade;
mod use_deployment;

const BOOTSTRAP_NAMESPACE: &str = "default";

/// What to do when no deployment name resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Make up a new name (`start`).
    Generate,
    /// Use the only managed deployment, if there is exactly one.
    SingleManaged,
}

/// Pick a deployment name: explicit argument, then the status file or
/// config file, then the fallback.
pub fn choose_namespace(
    explicit: Option<String>,
    implicit: Option<String>,
    managed: &[String],
    fallback: Fallback,
) -> Result<String> {
    if let Some(name) = explicit.filter(|n| !n.is_empty()).or(implicit) {
        return Ok(name);
    }
    match fallback {
        Fallback::Generate => names::random_name(),
        Fallback::SingleManaged => match managed {
            [only] => Ok(only.clone()),
            [] => anyhow::bail!(
                "no deployment found, use the 'rasactl start' command to create a new one"
            ),
            _ => anyhow::bail!(
                "found {} deployments, pass a deployment name or set the current one with 'rasactl config use-deployment'",
                managed.len()
            ),
        },
    }
}

async fn resolve_namespace(
    explicit: Option<String>,
    settings: &Settings,
    kube: &Kubernetes,
    fallback: Fallback,
) -> Result<String> {
    let cwd = std::env::current_dir().context("get the current working directory")?;
    let implicit = config::implicit_namespace(&cwd, &settings.config);
    let managed = if explicit.is_none() && implicit.is_none() && fallback == Fallback::SingleManaged {
        kube.managed_namespaces().await?
    } else {
        Vec::new()
    };
    let namespace = choose_namespace(explicit, implicit, &managed, fallback)?;
    debug!(%namespace, "deployment resolved");
    Ok(namespace)
}

fn release_options(helm: &HelmArgs, atomic: bool, reuse_values: bool) -> ReleaseOptions {
    ReleaseOptions {
        chart_version: helm.rasa_x_chart_version.clone(),
        timeout: helm.wait_timeout.clone(),
        atomic,
        reuse_values,
    }
}

/// Clients and settings for one deployment.
pub struct RasaCtl {
    pub settings: Settings,
    pub namespace: String,
    pub kube: Kubernetes,
    pub helm: Helm,
    pub cloud: CloudProvider,
    pub printer: Printer,
}

impl RasaCtl {
    /// Resolve the deployment and set up the clients. The helm release name
    /// comes from `release_name`, then the state secret.
    pub async fn connect(
        settings: Settings,
        target: Option<String>,
        fallback: Fallback,
        release_name: Option<&str>,
    ) -> Result<Self> {
        helm::require_helm()?;
        let base = cluster(&settings).await?;
        let namespace = resolve_namespace(target, &settings, &base, fallback).await?;
        let cloud = CloudProvider::detect().await;
        Self::assemble(settings, &base, namespace, release_name, cloud).await
    }

    /// Clients for `namespace` on top of an existing cluster connection.
    pub async fn assemble(
        settings: Settings,
        base: &Kubernetes,
        namespace: String,
        release_name: Option<&str>,
        cloud: CloudProvider,
    ) -> Result<Self> {
        let mut kube = base.for_namespace(&namespace);
        let release = match release_name {
            Some(name) => name.to_string(),
            None => stored_release_name(&kube).await,
        };
        kube.release_name = release.clone();

        let mut helm = Helm::new(&namespace, &settings.kubeconfig, settings.kube_context.as_deref());
        helm.release_name = release;

        let printer = Printer::new(settings.interactive_output());
        debug!(
            %namespace,
            release = %kube.release_name,
            backend = ?kube.backend,
            "clients initialized"
        );

        Ok(Self {
            settings,
            namespace,
            kube,
            helm,
            cloud,
            printer,
        })
    }

    pub async fn check_deployment_status(&self) -> Result<DeploymentState> {
        let deployed = self.helm.is_deployed().await?;
        let running = self.kube.is_rasa_x_running().await?;
        let state = DeploymentState::observe(deployed, running);
        debug!(namespace = %self.namespace, deployed, running, state = state.label(), "deployment status");
        Ok(state)
    }

    /// Fail unless the namespace exists and carries the rasactl label.
    pub async fn require_managed(&self) -> Result<()> {
        if !self.kube.namespace_exists().await? {
            anyhow::bail!("The {} deployment doesn't exist.", self.namespace);
        }
        if !self.kube.is_namespace_manageable().await {
            anyhow::bail!(
                "The {} namespace exists but is not managed by rasactl, can't continue :(",
                self.namespace
            );
        }
        Ok(())
    }

    /// `true` when Rasa X runs; otherwise tell the user and return `false`.
    pub async fn running_or_notice(&self) -> Result<bool> {
        self.require_managed().await?;
        if self.check_deployment_status().await? == DeploymentState::Running {
            return Ok(true);
        }
        println!("Rasa X for the {} deployment is not running.", self.namespace);
        Ok(false)
    }

    /// Local cluster without a cloud provider; Rasa X is reached through
    /// a hosts entry.
    pub fn is_local_without_cloud(&self) -> bool {
        self.kube.backend == BackendType::Local && !self.cloud.is_known()
    }

    pub async fn rasa_x_url(&self) -> Result<String> {
        if let Some(url) = config::rasa_x_url_override(&self.namespace) {
            debug!(%url, "using the Rasa X URL from the environment");
            return Ok(url);
        }
        let values = self.helm.values().await?;
        let url = self.kube.rasa_x_url(&values, &self.cloud).await?;
        debug!(%url, "Rasa X URL");
        Ok(url)
    }

    pub async fn rasax(&self) -> Result<RasaX> {
        RasaX::new(&self.rasa_x_url().await?)
    }

    pub fn credentials(&self) -> Credentials<ProgramHelper> {
        let helper = match &self.settings.credentials_helper {
            Some(name) => ProgramHelper::new(name),
            None => ProgramHelper::platform_default(),
        };
        Credentials::new(helper, &self.namespace)
    }

    /// Rasa X client carrying a valid access token.
    pub async fn authorized_rasax(&self) -> Result<RasaX> {
        let rasax = self.rasax().await?;
        let token = self.credentials().token(&rasax).await?;
        Ok(rasax.with_token(token))
    }

    /// Forward readiness events to the spinner until the sender is dropped.
    fn relay_events(&self) -> (mpsc::UnboundedSender<HealthEvent>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<HealthEvent>();
        let printer = self.printer.clone();
        let relay = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                info!("{}", event.message());
                printer.spin(event.message());
            }
        });
        (tx, relay)
    }

    /// Wait for the database migration and the worker. The deadline is
    /// fixed; `--wait-timeout` only applies to helm.
    pub async fn wait_for_rasa_x(&self, rasax: &RasaX) -> Result<()> {
        let (tx, relay) = self.relay_events();
        let result = health::wait_for_rasa_x(rasax, Readiness::default(), &tx).await;
        drop(tx);
        relay.await.ok();
        result
    }

    pub async fn wait_for_database_migration(&self, rasax: &RasaX) -> Result<()> {
        let (tx, relay) = self.relay_events();
        let result = health::wait_for_database_migration(rasax, Readiness::default(), &tx).await;
        drop(tx);
        relay.await.ok();
        result
    }

    /// Store the versions reported by Rasa X, and the release, in the state secret.
    pub async fn record_version(
        &self,
        version: &Version,
        release: Option<&ReleaseRevision>,
    ) -> Result<()> {
        let release_name = self.helm.release_name.clone();
        self.kube
            .update_state(|state| {
                state.rasa_x_version = version.rasa_x.clone();
                state.rasa_worker_version = version.rasa.worker.clone();
                state.rasa_production_version = version.rasa.production.clone();
                state.enterprise = version.enterprise;
                if let Some(release) = release {
                    let (chart, chart_version) = release.chart_name_and_version();
                    state.helm_chart_name = chart;
                    state.helm_chart_version = chart_version;
                    state.helm_release_status = release.status.clone();
                    state.helm_release_name = release_name;
                }
            })
            .await?;
        debug!(namespace = %self.namespace, rasa_x = %version.rasa_x, "state updated");
        Ok(())
    }
}

/// Cluster connection not yet bound to a deployment.
pub async fn cluster(settings: &Settings) -> Result<Kubernetes> {
    Kubernetes::connect(
        &settings.kubeconfig,
        settings.kube_context.as_deref(),
        BOOTSTRAP_NAMESPACE,
    )
    .await
}

async fn stored_release_name(kube: &Kubernetes) -> String {
    match kube.read_state().await {
        Ok(state) if !state.helm_release_name.is_empty() => state.helm_release_name,
        Ok(_) => CHART_NAME.to_string(),
        Err(e) => {
            debug!(error = %e, "no stored release name, using the default");
            CHART_NAME.to_string()
        }
    }
}

/// Run one command.
pub async fn run(command: Commands, settings: Settings) -> Result<()> {
    use Fallback::SingleManaged;

    match command {
        Commands::Start(args) => {
            let release = args.rasa_x_release_name.clone();
            let ctl = RasaCtl::connect(settings, args.name.clone(), Fallback::Generate, Some(&release))
                .await?;
            ctl.start(args).await
        }
        Commands::Stop(args) => {
            RasaCtl::connect(settings, args.name, SingleManaged, None)
                .await?
                .stop()
                .await
        }
        Commands::Upgrade(args) => {
            RasaCtl::connect(settings, args.name.clone(), SingleManaged, None)
                .await?
                .upgrade(args)
                .await
        }
        Commands::Delete(args) => {
            RasaCtl::connect(settings, args.name.clone(), SingleManaged, None)
                .await?
                .delete(args)
                .await
        }
        Commands::Status(args) => {
            RasaCtl::connect(settings, args.name.clone(), SingleManaged, None)
                .await?
                .status(args)
                .await
        }
        Commands::List => status::list(settings).await,
        Commands::Add(args) => {
            let release = args.rasa_x_release_name.clone();
            RasaCtl::connect(settings, Some(args.namespace), SingleManaged, Some(&release))
                .await?
                .add()
                .await
        }
        Commands::Open(args) => {
            RasaCtl::connect(settings, args.name, SingleManaged, None)
                .await?
                .open()
                .await
        }
        Commands::Logs(args) => {
            RasaCtl::connect(settings, args.name.clone(), SingleManaged, None)
                .await?
                .logs(args)
                .await
        }
        Commands::Auth(AuthCommands::Login(args)) => {
            RasaCtl::connect(settings, args.name.clone(), SingleManaged, None)
                .await?
                .auth_login(args)
                .await
        }
        Commands::Auth(AuthCommands::Logout(args)) => {
            RasaCtl::connect(settings, args.name, SingleManaged, None)
                .await?
                .auth_logout()
                .await
        }
        Commands::Model(cmd) => model::run(settings, cmd).await,
        Commands::Enterprise(EnterpriseCommands::Activate(args)) => {
            RasaCtl::connect(settings, args.name.clone(), SingleManaged, None)
                .await?
                .enterprise_activate(args)
                .await
        }
        Commands::Enterprise(EnterpriseCommands::Deactivate(args)) => {
            RasaCtl::connect(settings, args.name, SingleManaged, None)
                .await?
                .enterprise_deactivate()
                .await
        }
        Commands::Connect(ConnectCommands::Rasa(args)) => {
            RasaCtl::connect(settings, args.name.clone(), SingleManaged, None)
                .await?
                .connect_rasa(args)
                .await
        }
        Commands::Config(ConfigCommands::UseDeployment(args)) => {
            use_deployment::run(settings, args).await
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::path::PathBuf;

    /// `RasaCtl` talking to a mock API server; helm and docker calls fail.
    pub async fn mock_ctl(api_server: &str, namespace: &str) -> RasaCtl {
        let settings = Settings {
            config_path: PathBuf::from("/nonexistent/.rasactl.yaml"),
            config: Default::default(),
            kubeconfig: PathBuf::from("/nonexistent/kubeconfig"),
            kube_context: None,
            credentials_helper: None,
            verbose: true,
            debug: false,
        };
        let base = Kubernetes::from_url(api_server, BOOTSTRAP_NAMESPACE).unwrap();
        RasaCtl::assemble(
            settings,
            &base,
            namespace.to_string(),
            Some(CHART_NAME),
            CloudProvider::default(),
        )
        .await
        .unwrap()
    }

    pub fn k8s_status(code: u16, reason: &str) -> wiremock::ResponseTemplate {
        wiremock::ResponseTemplate::new(code).set_body_json(serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": reason,
            "reason": reason,
            "code": code
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_name_wins() {
        let name = choose_namespace(
            Some("bot".into()),
            Some("other".into()),
            &[],
            Fallback::SingleManaged,
        )
        .unwrap();
        assert_eq!(name, "bot");

        let name = choose_namespace(None, Some("other".into()), &[], Fallback::SingleManaged).unwrap();
        assert_eq!(name, "other");
    }

    #[test]
    fn single_managed_deployment_is_used() {
        let managed = vec!["only".to_string()];
        assert_eq!(
            choose_namespace(None, None, &managed, Fallback::SingleManaged).unwrap(),
            "only"
        );

        let many = vec!["a".to_string(), "b".to_string()];
        let err = choose_namespace(None, None, &many, Fallback::SingleManaged).unwrap_err();
        assert!(err.to_string().contains("found 2 deployments"));
        assert!(choose_namespace(None, None, &[], Fallback::SingleManaged).is_err());
    }

    #[test]
    fn start_generates_a_valid_name() {
        let name = choose_namespace(None, None, &[], Fallback::Generate).unwrap();
        names::validate_name(&name).unwrap();
    }
}
