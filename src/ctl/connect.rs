use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info};

use super::RasaCtl;
use crate::api::EnvironmentsConfig;
use crate::cli::ConnectRasaArgs;
use crate::command::{require_tool, CommandBuilder};
use crate::helm::ReleaseOptions;
use crate::k8s::BackendType;
use crate::values::{self, str_at};

const NOT_KIND: &str = "It looks like you're not using kind as a backend for Kubernetes cluster, the connect rasa command is available only if you use kind.";
const MODEL_PULL_INTERVAL: u32 = 10;

/// `credentials.yml` of a Rasa server.
#[derive(Debug, Serialize)]
struct CredentialsFile {
    rasa: RasaChannel,
    rest: Option<String>,
}

#[derive(Debug, Serialize)]
struct RasaChannel {
    url: String,
}

/// `endpoints.yml` of a Rasa server.
#[derive(Debug, Serialize)]
struct EndpointsFile {
    models: ModelServer,
    tracker_store: TrackerStore,
    event_broker: EventBroker,
}

#[derive(Debug, Serialize)]
struct ModelServer {
    url: String,
    token: String,
    wait_time_between_pulls: u32,
}

#[derive(Debug, Serialize)]
struct TrackerStore {
    #[serde(rename = "type")]
    kind: String,
    dialect: String,
    url: String,
    port: i32,
    username: String,
    password: String,
    db: String,
    login_db: String,
}

#[derive(Debug, Serialize)]
struct EventBroker {
    #[serde(rename = "type")]
    kind: String,
    url: String,
    port: i32,
    username: String,
    password: String,
    queues: Vec<String>,
}

fn credentials_file(rasa_x_url: &str) -> CredentialsFile {
    CredentialsFile {
        rasa: RasaChannel {
            url: format!("{}/api", rasa_x_url),
        },
        rest: None,
    }
}

/// Environments served on the host and the ports they listen on.
pub fn server_plan(port: u16, separate_worker: bool) -> Vec<(&'static str, u16)> {
    if separate_worker {
        vec![("production", port), ("worker", port + 1)]
    } else {
        vec![("production-worker", port)]
    }
}

fn rasa_run_args(
    token: &str,
    credentials: &Path,
    endpoints: &Path,
    extra: &[String],
    port: u16,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "--verbose".into(),
        "--enable-api".into(),
        "--cors".into(),
        "*".into(),
        "--auth-token".into(),
        token.into(),
        "--credentials".into(),
        credentials.display().to_string(),
        "--endpoints".into(),
        endpoints.display().to_string(),
    ];
    args.extend(extra.iter().cloned());
    args.push("-p".into());
    args.push(port.to_string());
    args
}

fn write_yaml<T: Serialize>(path: &Path, content: &T) -> Result<()> {
    let yaml = serde_yaml::to_string(content)?;
    std::fs::write(path, yaml).with_context(|| format!("write {}", path.display()))?;
    debug!(file = %path.display(), "file written");
    Ok(())
}

fn prefixed(environment: &str, raw: &[u8]) -> String {
    let line = String::from_utf8_lossy(raw);
    format!("({}) {}", environment, line.trim_end_matches(['\n', '\r']))
}

/// Hand every line of `reader`, prefixed with the environment name, to
/// `emit`. The pipe is drained until EOF, whatever the encoding.
async fn forward_lines<R, F>(environment: &str, reader: R, mut emit: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => emit(prefixed(environment, &buf)),
            Err(e) => {
                debug!(environment, error = %e, "can't read the Rasa server output");
                break;
            }
        }
    }
}

async fn run_server(environment: &'static str, args: Vec<String>) -> Result<()> {
    info!(environment, "starting a Rasa server");
    let mut child = CommandBuilder::new("rasa")
        .args(&args)
        .context(format!("start the Rasa server for the {} environment", environment))
        .spawn()?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let out = async {
        if let Some(stdout) = stdout {
            forward_lines(environment, stdout, |line| println!("{}", line)).await;
        }
    };
    let err = async {
        if let Some(stderr) = stderr {
            forward_lines(environment, stderr, |line| println!("{}", line)).await;
        }
    };
    let (status, _, _) = tokio::join!(child.wait(), out, err);
    let status = status.with_context(|| format!("wait for the {} Rasa server", environment))?;
    if !status.success() {
        anyhow::bail!("the Rasa server for the {} environment exited with {}", environment, status);
    }
    Ok(())
}

impl RasaCtl {
    fn config_dir(&self, project_path: &str) -> Result<PathBuf> {
        let dir = if project_path.is_empty() {
            std::env::temp_dir().join(format!("rasactl-{}", self.namespace))
        } else {
            PathBuf::from(project_path)
        };
        std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        Ok(dir)
    }

    async fn endpoints_file(&self, rasa_x_url: &str) -> Result<EndpointsFile> {
        let chart_values = self.helm.values().await?;
        let (pg_user, pg_password) = self.kube.postgresql_credentials(&chart_values).await?;
        let (rabbit_user, rabbit_password) = self.kube.rabbitmq_credentials(&chart_values).await?;

        Ok(EndpointsFile {
            models: ModelServer {
                url: format!("{}/api/projects/default/models/tags/production", rasa_x_url),
                token: self.kube.rasa_x_token().await?,
                wait_time_between_pulls: MODEL_PULL_INTERVAL,
            },
            tracker_store: TrackerStore {
                kind: "sql".into(),
                dialect: "postgresql".into(),
                url: "127.0.0.1".into(),
                port: self.kube.postgresql_node_port().await?,
                username: pg_user,
                password: pg_password,
                db: "tracker".into(),
                login_db: str_at(&chart_values, "global.postgresql.postgresqlDatabase")
                    .unwrap_or_else(|| "rasa".into()),
            },
            event_broker: EventBroker {
                kind: "pika".into(),
                url: "127.0.0.1".into(),
                port: self.kube.rabbitmq_node_port(&chart_values).await?,
                username: rabbit_user,
                password: rabbit_password,
                queues: vec![str_at(&chart_values, "rasa.rabbitQueue")
                    .unwrap_or_else(|| "rasa_production_events".into())],
            },
        })
    }

    pub async fn connect_rasa(&self, args: ConnectRasaArgs) -> Result<()> {
        self.printer.spin("Connecting Rasa Server to Rasa X");
        if self.kube.backend != BackendType::Local {
            anyhow::bail!(NOT_KIND);
        }
        require_tool("rasa", "see https://rasa.com/docs/rasa/installation")?;
        self.require_managed().await?;

        let token = values::generate_token()?;
        let state = self.kube.read_state().await?;
        let config_dir = self.config_dir(&state.project_path)?;

        let opts = ReleaseOptions {
            chart_version: Some(state.helm_chart_version.clone()).filter(|v| !v.is_empty()),
            timeout: "10m".into(),
            atomic: false,
            reuse_values: true,
        };
        self.helm.upgrade(&values::connect_values(), &opts).await?;

        let environments = EnvironmentsConfig::local(args.port, args.run_separate_worker, &token);
        self.kube
            .update_environments_config(environments.to_yaml()?)
            .await?;
        self.kube.delete_rasa_x_pods().await?;

        let url = self.rasa_x_url().await?;
        let credentials = config_dir.join(".credentials.yaml");
        let endpoints = config_dir.join(".endpoints.yaml");
        write_yaml(&credentials, &credentials_file(&url))?;
        write_yaml(&endpoints, &self.endpoints_file(&url).await?)?;

        self.wait_for_database_migration(&self.rasax().await?).await?;
        self.printer.stop_spinner();

        let servers = server_plan(args.port, args.run_separate_worker)
            .into_iter()
            .map(|(environment, port)| {
                let run_args = rasa_run_args(&token, &credentials, &endpoints, &args.extra_args, port);
                run_server(environment, run_args)
            });

        tokio::select! {
            result = futures::future::try_join_all(servers) => {
                result?;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Bye");
            }
        }
        Ok(())
    }
}
