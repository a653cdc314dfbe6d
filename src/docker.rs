use anyhow::{Context, Result};
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use bollard::Docker;
use futures::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::compat;
use crate::k8s::KindControlPlane;

const KIND_IMAGE: &str = "kindest/node";
const MAX_PULL_RETRIES: u32 = 3;
const STOP_TIMEOUT_SECS: i64 = 60;
const JOIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const NODE_LABEL: &str = "rasactl-project";
const NODE_TAINT: &str = "rasactl";

/// Name of the kind node (and its container) dedicated to one deployment.
pub fn kind_node_name(namespace: &str) -> String {
    format!("kind-{}", namespace)
}

fn is_status(err: &bollard::errors::Error, code: u16) -> bool {
    matches!(err, bollard::errors::Error::DockerResponseServerError { status_code, .. } if *status_code == code)
}

/// Errors a retry won't fix.
fn is_local_docker_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("credential")
        || lower.contains("permission denied")
        || lower.contains("cannot connect to the docker daemon")
        || lower.contains("not found")
}

/// kubeadm JoinConfiguration for a worker node labelled and tainted for one deployment.
pub fn join_configuration(namespace: &str, control_plane_host: &str, token: &str) -> Result<String> {
    let config = json!({
        "apiVersion": "kubeadm.k8s.io/v1beta2",
        "kind": "JoinConfiguration",
        "discovery": {
            "bootstrapToken": {
                "apiServerEndpoint": format!("{}:6443", control_plane_host),
                "token": token,
                "unsafeSkipCAVerification": true,
            },
            "timeout": "5m0s",
            "tlsBootstrapToken": token,
        },
        "nodeRegistration": {
            "criSocket": "unix:///run/containerd/containerd.sock",
            "kubeletExtraArgs": {
                "fail-swap-on": "false",
                "node-labels": format!("{}={}", NODE_LABEL, namespace),
            },
            "name": kind_node_name(namespace),
            "taints": [{ "key": NODE_TAINT, "value": "true", "effect": "NoSchedule" }],
        },
    });
    Ok(serde_yaml::to_string(&config)?)
}

/// Single-file tar archive, the format the upload endpoint expects.
fn tar_file(name: &str, content: &[u8]) -> Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, name, content)?;
    Ok(builder.into_inner()?)
}

/// Docker engine driving the kind nodes of local projects.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().context("connect to the Docker daemon")?;
        Ok(Self { docker })
    }

    pub async fn server_version(&self) -> Result<String> {
        let version = self
            .docker
            .version()
            .await
            .context("get Docker server version")?;
        Ok(version.version.unwrap_or_default())
    }

    /// Fail unless the daemon satisfies the supported version range.
    pub async fn check_version(&self) -> Result<()> {
        let version = self.server_version().await?;
        debug!(%version, "docker server version");
        compat::check_docker_version(&version)
    }

    async fn pull(&self, image: &str, tag: &str) -> Result<()> {
        for attempt in 1..=MAX_PULL_RETRIES {
            let options = Some(CreateImageOptions {
                from_image: image,
                tag,
                ..Default::default()
            });
            let mut stream = self.docker.create_image(options, None, None);
            let mut failure = None;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(info) => {
                        if let Some(error) = info.error {
                            failure = Some(error);
                            break;
                        }
                        if let Some(status) = info.status {
                            debug!(image, tag, %status, "pulling image");
                        }
                    }
                    Err(e) => {
                        failure = Some(e.to_string());
                        break;
                    }
                }
            }

            let Some(error) = failure else {
                return Ok(());
            };
            if is_local_docker_error(&error) || attempt == MAX_PULL_RETRIES {
                anyhow::bail!("pull {}:{}: {}", image, tag, error);
            }
            let backoff = Duration::from_secs(2u64.pow(attempt));
            debug!(image, tag, attempt, ?backoff, "retrying image pull");
            tokio::time::sleep(backoff).await;
        }
        Ok(())
    }

    /// Run a command in a container and return its combined output.
    async fn exec(&self, container: &str, cmd: &[&str]) -> Result<(String, String)> {
        let exec = self
            .docker
            .create_exec(
                container,
                CreateExecOptions {
                    cmd: Some(cmd.iter().map(|s| s.to_string()).collect()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some("/".to_string()),
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("create exec `{}` in {}", cmd.join(" "), container))?;

        let mut collected = String::new();
        if let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None).await?
        {
            while let Some(chunk) = output.next().await {
                let chunk = chunk?;
                let text = String::from_utf8_lossy(&chunk.into_bytes()).to_string();
                for line in text.lines().filter(|l| !l.is_empty()) {
                    debug!(container, details = line, "exec output");
                }
                collected.push_str(&text);
            }
        }
        Ok((exec.id, collected))
    }

    async fn network_of(&self, container: &str) -> Result<Option<String>> {
        let inspect = self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
            .with_context(|| format!("inspect container {}", container))?;
        Ok(inspect.host_config.and_then(|h| h.network_mode))
    }

    /// Create a kind worker node for `namespace`, mount `project_path` into it
    /// and join it to the cluster of `control_plane`.
    pub async fn create_kind_node(
        &self,
        namespace: &str,
        control_plane: &KindControlPlane,
        project_path: &Path,
    ) -> Result<()> {
        let name = kind_node_name(namespace);
        let tag = control_plane.kubelet_version.as_str();
        info!(image = KIND_IMAGE, tag, "pulling image");
        self.pull(KIND_IMAGE, tag).await?;

        let project = project_path.to_string_lossy().to_string();
        let host_config = HostConfig {
            privileged: Some(true),
            security_opt: Some(vec!["apparmor=unconfined".into(), "seccomp=unconfined".into()]),
            tmpfs: Some(HashMap::from([
                ("/run".to_string(), String::new()),
                ("/tmp".to_string(), String::new()),
            ])),
            extra_hosts: Some(vec![
                "rasa.localhost:host-gateway".into(),
                "host.docker.internal:host-gateway".into(),
            ]),
            mounts: Some(vec![
                Mount {
                    typ: Some(MountTypeEnum::BIND),
                    source: Some("/lib/modules".into()),
                    target: Some("/lib/modules".into()),
                    read_only: Some(true),
                    ..Default::default()
                },
                Mount {
                    typ: Some(MountTypeEnum::BIND),
                    source: Some(project.clone()),
                    target: Some(project),
                    ..Default::default()
                },
            ]),
            network_mode: self.network_of(&control_plane.host).await?,
            ..Default::default()
        };
        let config = Config {
            image: Some(format!("{}:{}", KIND_IMAGE, tag)),
            hostname: Some(name.clone()),
            env: Some(vec!["container=docker".to_string()]),
            volumes: Some(HashMap::from([("/var".to_string(), HashMap::new())])),
            host_config: Some(host_config),
            ..Default::default()
        };

        info!(node = %name, "creating a kind node");
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    ..Default::default()
                }),
                config,
            )
            .await
            .with_context(|| format!("create container {}", name))?;
        self.start_node(namespace).await?;
        self.join_node(namespace, control_plane).await
    }

    async fn join_node(&self, namespace: &str, control_plane: &KindControlPlane) -> Result<()> {
        let name = kind_node_name(namespace);
        let (_, output) = self
            .exec(
                &control_plane.host,
                &["kubeadm", "token", "create", "--ttl", "180s"],
            )
            .await?;
        let token = output
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string();
        if token.is_empty() {
            anyhow::bail!("can't create a kubeadm join token on {}", control_plane.host);
        }

        let config = join_configuration(namespace, &control_plane.host, &token)?;
        let archive = tar_file("config.yaml", config.as_bytes())?;
        self.docker
            .upload_to_container(
                &name,
                Some(UploadToContainerOptions {
                    path: "/",
                    ..Default::default()
                }),
                archive.into(),
            )
            .await
            .with_context(|| format!("copy join configuration to {}", name))?;

        info!(node = %name, "joining the kind node to the cluster");
        let (exec_id, _) = self
            .exec(
                &name,
                &["kubeadm", "join", "--config", "config.yaml", "--skip-phases=preflight", "-v", "6"],
            )
            .await?;

        loop {
            let status = self.docker.inspect_exec(&exec_id).await?;
            debug!(node = %name, running = ?status.running, exit_code = ?status.exit_code, "waiting for the node to join");
            if status.exit_code.is_some_and(|code| code != 0) {
                anyhow::bail!("can't join kind node {} to the cluster", name);
            }
            if !status.running.unwrap_or(false) {
                break;
            }
            tokio::time::sleep(JOIN_POLL_INTERVAL).await;
        }

        self.exec(&control_plane.host, &["kubeadm", "token", "delete", &token])
            .await?;
        debug!(node = %name, "join token removed");
        Ok(())
    }

    pub async fn start_node(&self, namespace: &str) -> Result<()> {
        let name = kind_node_name(namespace);
        self.docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await
            .with_context(|| format!("start container {}", name))?;
        info!(node = %name, "kind node started");
        Ok(())
    }

    pub async fn stop_node(&self, namespace: &str) -> Result<()> {
        let name = kind_node_name(namespace);
        match self
            .docker
            .stop_container(&name, Some(StopContainerOptions { t: STOP_TIMEOUT_SECS }))
            .await
        {
            Ok(()) => {}
            // already stopped
            Err(e) if is_status(&e, 304) => {}
            Err(e) => return Err(e).with_context(|| format!("stop container {}", name)),
        }
        info!(node = %name, "kind node stopped");
        Ok(())
    }

    pub async fn remove_node(&self, namespace: &str) -> Result<()> {
        let name = kind_node_name(namespace);
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(&name, Some(options)).await {
            Ok(()) => {}
            Err(e) if is_status(&e, 404) => debug!(node = %name, "container doesn't exist"),
            Err(e) => return Err(e).with_context(|| format!("remove container {}", name)),
        }
        info!(node = %name, "kind node removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_configuration_labels_and_taints_the_node() {
        let raw = join_configuration("bot", "kind-control-plane", "abcdef.0123456789abcdef").unwrap();
        let config: serde_yaml::Value = serde_yaml::from_str(&raw).unwrap();

        assert_eq!(config["kind"].as_str(), Some("JoinConfiguration"));
        assert_eq!(
            config["discovery"]["bootstrapToken"]["apiServerEndpoint"].as_str(),
            Some("kind-control-plane:6443")
        );
        let registration = &config["nodeRegistration"];
        assert_eq!(registration["name"].as_str(), Some("kind-bot"));
        assert_eq!(
            registration["kubeletExtraArgs"]["node-labels"].as_str(),
            Some("rasactl-project=bot")
        );
        assert_eq!(registration["taints"][0]["effect"].as_str(), Some("NoSchedule"));
    }

    #[test]
    fn tar_archive_holds_the_file() {
        let data = tar_file("config.yaml", b"kind: JoinConfiguration\n").unwrap();
        let mut archive = tar::Archive::new(data.as_slice());
        let entries: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["config.yaml".to_string()]);
    }

    #[test]
    fn pull_errors_worth_retrying() {
        assert!(is_local_docker_error("Cannot connect to the Docker daemon at unix:///var/run/docker.sock"));
        assert!(is_local_docker_error("manifest for kindest/node:v9 not found"));
        assert!(!is_local_docker_error("net/http: TLS handshake timeout"));
    }
}
