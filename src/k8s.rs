use anyhow::{Context, Result};
use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod, Secret, Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, info};

use crate::cloud::CloudProvider;
use crate::state::{self, StateSecret, WorkloadReplicas};
use crate::values::{bool_at, str_at};

const FIELD_MANAGER: &str = "rasactl";
pub const MANAGED_LABEL: &str = "rasactl";
const CONTROL_PLANE_SELECTOR: &str = "node-role.kubernetes.io/control-plane=";
const RASA_X_POD_SELECTOR: &str = "app.kubernetes.io/component=rasa-x";

/// Where the Kubernetes API server runs relative to this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Local,
    Remote,
}

/// Loopback API servers (kind, minikube, k3d, ...) are local.
pub fn detect_backend(host: &str) -> BackendType {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") {
        return BackendType::Local;
    }
    match host.parse::<IpAddr>() {
        Ok(ip) if ip.is_loopback() => BackendType::Local,
        _ => BackendType::Remote,
    }
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == code)
}

/// Control-plane node of a kind cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindControlPlane {
    pub host: String,
    pub kubelet_version: String,
}

/// One row of the `status --details` pod table.
#[derive(Debug, Clone, Serialize)]
pub struct PodSummary {
    pub name: String,
    pub condition: String,
    pub phase: String,
    pub containers: Vec<String>,
}

/// How the Rasa X URL is exposed, derived from the chart values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlSource {
    LoadBalancer,
    NodePort,
    Ingress,
    Unknown,
}

pub fn url_source(values: &Value, backend: BackendType, cloud_known: bool) -> UrlSource {
    let nginx_enabled = bool_at(values, "nginx.enabled");
    let service_type = str_at(values, "nginx.service.type").unwrap_or_default();

    if service_type == "LoadBalancer"
        && nginx_enabled
        && (backend != BackendType::Local || cloud_known)
    {
        UrlSource::LoadBalancer
    } else if service_type == "NodePort"
        && nginx_enabled
        && backend == BackendType::Local
        && cloud_known
    {
        UrlSource::NodePort
    } else if bool_at(values, "ingress.enabled") {
        UrlSource::Ingress
    } else {
        UrlSource::Unknown
    }
}

pub fn pod_condition(pod: &Pod) -> &'static str {
    let all_true = pod
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| conds.iter().all(|c| c.status == "True"))
        .unwrap_or(false);
    if all_true {
        "Ready"
    } else {
        "NotReady"
    }
}

fn secret_string(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| String::from_utf8_lossy(&v.0).to_string())
}

/// Kubernetes client scoped to one deployment namespace.
#[derive(Clone)]
pub struct Kubernetes {
    client: Client,
    pub namespace: String,
    pub release_name: String,
    pub backend: BackendType,
}

impl Kubernetes {
    pub async fn connect(kubeconfig: &Path, context: Option<&str>, namespace: &str) -> Result<Self> {
        let config = if kubeconfig.exists() {
            let kc = Kubeconfig::read_from(kubeconfig)
                .with_context(|| format!("read kubeconfig {}", kubeconfig.display()))?;
            let options = KubeConfigOptions {
                context: context.map(str::to_string),
                ..Default::default()
            };
            kube::Config::from_custom_kubeconfig(kc, &options)
                .await
                .context("load kubeconfig")?
        } else {
            kube::Config::infer()
                .await
                .context("no kubeconfig found and not running inside a cluster")?
        };

        Self::from_config(config, namespace)
    }

    fn from_config(config: kube::Config, namespace: &str) -> Result<Self> {
        let host = config.cluster_url.host().unwrap_or_default().to_string();
        let backend = detect_backend(&host);
        debug!(%host, ?backend, "detected Kubernetes backend");

        let client = Client::try_from(config).context("create Kubernetes client")?;
        Ok(Self {
            client,
            namespace: namespace.to_string(),
            release_name: "rasa-x".to_string(),
            backend,
        })
    }

    /// Client for an API server at `url`, without a kubeconfig.
    #[cfg(test)]
    pub fn from_url(url: &str, namespace: &str) -> Result<Self> {
        let cluster_url = url.parse().context("parse the API server URL")?;
        Self::from_config(kube::Config::new(cluster_url), namespace)
    }

    /// Same connection, different deployment.
    pub fn for_namespace(&self, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            ..self.clone()
        }
    }

    fn ns_api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    pub async fn server_version(&self) -> Result<String> {
        let ver = self.client.apiserver_version().await?;
        Ok(format!("{}.{}", ver.major, ver.minor))
    }

    // --- namespaces ---

    pub async fn namespace_exists(&self) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api
            .get_opt(&self.namespace)
            .await
            .context("get namespace")?
            .is_some())
    }

    /// Create the namespace; an existing one is fine.
    pub async fn create_namespace(&self) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns: Namespace = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": self.namespace }
        }))?;
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => debug!(namespace = %self.namespace, "namespace created"),
            Err(e) if is_status(&e, 409) => {
                debug!(namespace = %self.namespace, "namespace already exists")
            }
            Err(e) => return Err(e).context("create namespace"),
        }
        Ok(())
    }

    pub async fn delete_namespace(&self) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(&self.namespace, &DeleteParams::default())
            .await
            .context("delete namespace")?;
        Ok(())
    }

    pub async fn is_namespace_manageable(&self) -> bool {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get(&self.namespace).await {
            Ok(ns) => ns
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(MANAGED_LABEL))
                .is_some_and(|v| v == "true"),
            Err(_) => false,
        }
    }

    async fn patch_namespace_label(&self, value: Value) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let patch = json!({ "metadata": { "labels": { MANAGED_LABEL: value } } });
        api.patch(&self.namespace, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .context("patch namespace labels")?;
        Ok(())
    }

    pub async fn add_namespace_label(&self) -> Result<()> {
        self.patch_namespace_label(json!("true")).await
    }

    pub async fn delete_namespace_label(&self) -> Result<()> {
        self.patch_namespace_label(Value::Null).await
    }

    /// Active namespaces labelled as managed by rasactl.
    pub async fn managed_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let lp = ListParams::default().labels(&format!("{}=true", MANAGED_LABEL));
        let list = api.list(&lp).await.context("list namespaces")?;
        Ok(list
            .items
            .into_iter()
            .filter(|ns| {
                ns.status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    .map_or(true, |p| p == "Active")
            })
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    // --- workloads ---

    pub async fn workloads(&self) -> Result<(Vec<WorkloadReplicas>, Vec<WorkloadReplicas>)> {
        let deployments: Api<Deployment> = self.ns_api();
        let statefulsets: Api<StatefulSet> = self.ns_api();

        let deploys = deployments
            .list(&ListParams::default())
            .await
            .context("list deployments")?
            .items
            .into_iter()
            .map(|d| {
                let desired = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                let status = d.status.unwrap_or_default();
                WorkloadReplicas {
                    name: d.metadata.name.unwrap_or_default(),
                    desired,
                    replicas: status.replicas.unwrap_or(0),
                    ready_replicas: status.ready_replicas.unwrap_or(0),
                }
            })
            .collect();
        let sets = statefulsets
            .list(&ListParams::default())
            .await
            .context("list statefulsets")?
            .items
            .into_iter()
            .map(|s| {
                let desired = s.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                let status = s.status.unwrap_or_default();
                WorkloadReplicas {
                    name: s.metadata.name.unwrap_or_default(),
                    desired,
                    replicas: status.replicas,
                    ready_replicas: status.ready_replicas.unwrap_or(0),
                }
            })
            .collect();
        Ok((deploys, sets))
    }

    pub async fn is_rasa_x_running(&self) -> Result<bool> {
        let (deploys, sets) = self.workloads().await?;
        for w in deploys.iter().chain(&sets).filter(|w| !w.is_up()) {
            debug!(
                workload = %w.name,
                replicas = w.replicas,
                ready = w.ready_replicas,
                "workload is not up"
            );
        }
        Ok(state::workloads_running(&deploys, &sets))
    }

    async fn scale<K>(&self, api: &Api<K>, name: &str, replicas: i32) -> Result<()>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        let patch = json!({ "spec": { "replicas": replicas } });
        api.patch_scale(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("scale {} to {}", name, replicas))?;
        Ok(())
    }

    /// Scale every Deployment and StatefulSet to zero.
    pub async fn scale_down(&self) -> Result<()> {
        let deployments: Api<Deployment> = self.ns_api();
        let statefulsets: Api<StatefulSet> = self.ns_api();
        let (deploys, sets) = self.workloads().await?;

        for d in &deploys {
            info!(deployment = %d.name, "scaling down");
            self.scale(&deployments, &d.name, 0).await?;
        }
        for s in &sets {
            info!(statefulset = %s.name, "scaling down");
            self.scale(&statefulsets, &s.name, 0).await?;
        }
        Ok(())
    }

    /// `spec.replicas` of the scale subresource.
    async fn desired_replicas<K>(&self, api: &Api<K>, name: &str) -> Result<i32>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        let scale = api
            .get_scale(name)
            .await
            .with_context(|| format!("get scale of {}", name))?;
        Ok(scale.spec.and_then(|s| s.replicas).unwrap_or(0))
    }

    /// Scale workloads asked to run zero replicas back to one.
    pub async fn scale_up(&self) -> Result<()> {
        let deployments: Api<Deployment> = self.ns_api();
        let statefulsets: Api<StatefulSet> = self.ns_api();
        let (mut deploys, mut sets) = self.workloads().await?;

        // Re-read the desired count right before deciding; a helm upgrade
        // may have just changed it.
        for d in &mut deploys {
            d.desired = self.desired_replicas(&deployments, &d.name).await?;
        }
        for s in &mut sets {
            s.desired = self.desired_replicas(&statefulsets, &s.name).await?;
        }

        for name in state::scaled_down(&deploys) {
            info!(deployment = %name, "scaling up");
            self.scale(&deployments, name, 1).await?;
        }
        for name in state::scaled_down(&sets) {
            info!(statefulset = %name, "scaling up");
            self.scale(&statefulsets, name, 1).await?;
        }
        Ok(())
    }

    // --- state secret ---

    pub async fn save_state(&self, state: &StateSecret) -> Result<()> {
        let encoded: BTreeMap<String, k8s_openapi::ByteString> = state
            .to_map()
            .into_iter()
            .map(|(k, v)| (k, k8s_openapi::ByteString(v.into_bytes())))
            .collect();

        let secret = Secret {
            metadata: kube::api::ObjectMeta {
                name: Some(state::STATE_SECRET_NAME.into()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([(MANAGED_LABEL.into(), "true".into())])),
                ..Default::default()
            },
            type_: Some(state::STATE_SECRET_TYPE.into()),
            data: Some(encoded),
            ..Default::default()
        };

        let api: Api<Secret> = self.ns_api();
        api.patch(
            state::STATE_SECRET_NAME,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&secret),
        )
        .await
        .context("save state secret")?;
        Ok(())
    }

    pub async fn read_state(&self) -> Result<StateSecret> {
        let api: Api<Secret> = self.ns_api();
        let secret = api
            .get(state::STATE_SECRET_NAME)
            .await
            .with_context(|| format!("read the state of the {} deployment", self.namespace))?;
        let data: BTreeMap<String, String> = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, String::from_utf8_lossy(&v.0).to_string()))
            .collect();
        Ok(StateSecret::from_map(&data))
    }

    /// Read-modify-write of the state secret.
    pub async fn update_state(&self, update: impl FnOnce(&mut StateSecret)) -> Result<StateSecret> {
        let mut state = self.read_state().await?;
        update(&mut state);
        self.save_state(&state).await?;
        Ok(state)
    }

    pub async fn delete_state(&self) -> Result<()> {
        let api: Api<Secret> = self.ns_api();
        match api.delete(state::STATE_SECRET_NAME, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e).context("delete state secret"),
        }
    }

    // --- project volume ---

    pub fn pv_name(&self) -> String {
        format!("rasactl-pv-{}", self.namespace)
    }

    pub fn pvc_name(&self) -> String {
        format!("rasactl-pvc-{}", self.namespace)
    }

    /// Create a hostPath PV and its claim for a mounted project directory.
    pub async fn create_volume(&self, host_path: &Path) -> Result<String> {
        let pv: PersistentVolume = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "PersistentVolume",
            "metadata": { "name": self.pv_name(), "labels": { MANAGED_LABEL: "true" } },
            "spec": {
                "storageClassName": "standard",
                "accessModes": ["ReadWriteOnce"],
                "capacity": { "storage": "2Gi" },
                "hostPath": { "path": host_path.to_string_lossy() },
            }
        }))?;
        let pvc: PersistentVolumeClaim = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": {
                "name": self.pvc_name(),
                "namespace": self.namespace,
                "labels": { MANAGED_LABEL: "true" },
            },
            "spec": {
                "storageClassName": "standard",
                "accessModes": ["ReadWriteOnce"],
                "resources": { "requests": { "storage": "2Gi" } },
                "volumeName": self.pv_name(),
            }
        }))?;

        let pvs: Api<PersistentVolume> = Api::all(self.client.clone());
        pvs.create(&PostParams::default(), &pv)
            .await
            .context("create persistent volume")?;
        let pvcs: Api<PersistentVolumeClaim> = self.ns_api();
        pvcs.create(&PostParams::default(), &pvc)
            .await
            .context("create persistent volume claim")?;

        debug!(pv = %self.pv_name(), path = %host_path.display(), "project volume created");
        Ok(self.pvc_name())
    }

    pub async fn delete_volume(&self) -> Result<()> {
        let pvcs: Api<PersistentVolumeClaim> = self.ns_api();
        match pvcs.delete(&self.pvc_name(), &DeleteParams::default()).await {
            Ok(_) => {}
            Err(e) if is_status(&e, 404) => {}
            Err(e) => return Err(e).context("delete persistent volume claim"),
        }
        let pvs: Api<PersistentVolume> = Api::all(self.client.clone());
        match pvs.delete(&self.pv_name(), &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e).context("delete persistent volume"),
        }
    }

    // --- nodes ---

    /// Control-plane node of a kind cluster, if the current context is kind.
    pub async fn kind_control_plane(&self) -> Result<Option<KindControlPlane>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = match api.list(&ListParams::default().labels(CONTROL_PLANE_SELECTOR)).await {
            Ok(nodes) => nodes,
            // Listing nodes needs cluster-wide permissions; without them this isn't kind.
            Err(e) if is_status(&e, 403) => return Ok(None),
            Err(e) => return Err(e).context("list control-plane nodes"),
        };

        let node = nodes.items.into_iter().find(|n| {
            let name = n.metadata.name.as_deref().unwrap_or_default();
            let provider = n
                .spec
                .as_ref()
                .and_then(|s| s.provider_id.as_deref())
                .unwrap_or_default();
            provider.starts_with("kind://") || name.ends_with("-control-plane")
        });

        Ok(node.map(|n| KindControlPlane {
            host: n.metadata.name.unwrap_or_default(),
            kubelet_version: n
                .status
                .and_then(|s| s.node_info)
                .map(|i| i.kubelet_version)
                .unwrap_or_default(),
        }))
    }

    pub async fn delete_node(&self, name: &str) -> Result<()> {
        let api: Api<Node> = Api::all(self.client.clone());
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("delete node {}", name)),
        }
    }

    // --- Rasa X resources ---

    /// Admin token stored by the chart.
    pub async fn rasa_x_token(&self) -> Result<String> {
        let api: Api<Secret> = self.ns_api();
        let name = format!("{}-rasa", self.release_name);
        let secret = api.get(&name).await.with_context(|| format!("get secret {}", name))?;
        secret_string(&secret, "rasaXToken")
            .ok_or_else(|| anyhow::anyhow!("the {} secret has no rasaXToken key", name))
    }

    pub async fn postgresql_credentials(&self, values: &Value) -> Result<(String, String)> {
        let api: Api<Secret> = self.ns_api();
        let name = format!("{}-postgresql", self.release_name);
        let secret = api.get(&name).await.with_context(|| format!("get secret {}", name))?;
        let username =
            str_at(values, "global.postgresql.postgresqlUsername").unwrap_or_else(|| "postgres".into());
        let password = secret_string(&secret, "postgresql-password").unwrap_or_default();
        Ok((username, password))
    }

    pub async fn rabbitmq_credentials(&self, values: &Value) -> Result<(String, String)> {
        let api: Api<Secret> = self.ns_api();
        let name = format!("{}-rabbit", self.release_name);
        let secret = api.get(&name).await.with_context(|| format!("get secret {}", name))?;
        let username = str_at(values, "rabbitmq.rabbitmq.username").unwrap_or_else(|| "user".into());
        let password = secret_string(&secret, "rabbitmq-password").unwrap_or_default();
        Ok((username, password))
    }

    async fn service(&self, name: &str) -> Result<Service> {
        let api: Api<Service> = self.ns_api();
        api.get(name).await.with_context(|| format!("get service {}", name))
    }

    pub async fn postgresql_node_port(&self) -> Result<i32> {
        let svc = self.service(&format!("{}-postgresql", self.release_name)).await?;
        svc.spec
            .and_then(|s| s.ports)
            .and_then(|ports| ports.into_iter().next())
            .and_then(|p| p.node_port)
            .ok_or_else(|| anyhow::anyhow!("the PostgreSQL service has no node port"))
    }

    pub async fn rabbitmq_node_port(&self, values: &Value) -> Result<i32> {
        let port: i32 = str_at(values, "rabbitmq.service.port")
            .and_then(|p| p.parse().ok())
            .unwrap_or(5672);
        let svc = self.service(&format!("{}-rabbit", self.release_name)).await?;
        svc.spec
            .and_then(|s| s.ports)
            .unwrap_or_default()
            .into_iter()
            .find(|p| p.port == port)
            .and_then(|p| p.node_port)
            .ok_or_else(|| anyhow::anyhow!("the RabbitMQ service has no node port for port {}", port))
    }

    /// Point the Rasa X environments at servers running on the host.
    pub async fn update_environments_config(&self, environments_yaml: String) -> Result<()> {
        let api: Api<ConfigMap> = self.ns_api();
        let name = format!("{}-rasa-x-configuration-files", self.release_name);
        let patch = json!({
            "metadata": { "labels": { MANAGED_LABEL: "true" } },
            "data": { "environments": environments_yaml },
        });
        api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("update configmap {}", name))?;
        Ok(())
    }

    /// Delete the Rasa X pods so they restart with a new configuration.
    pub async fn delete_rasa_x_pods(&self) -> Result<()> {
        let api: Api<Pod> = self.ns_api();
        let pods = api
            .list(&ListParams::default().labels(RASA_X_POD_SELECTOR))
            .await
            .context("list Rasa X pods")?;
        for pod in pods.items {
            let name = pod.metadata.name.unwrap_or_default();
            debug!(pod = %name, "deleting pod");
            api.delete(&name, &DeleteParams::default())
                .await
                .with_context(|| format!("delete pod {}", name))?;
        }
        Ok(())
    }

    pub async fn rasa_x_url(&self, values: &Value, cloud: &CloudProvider) -> Result<String> {
        let scheme = str_at(values, "rasax.scheme").unwrap_or_else(|| "http".into());
        let nginx = format!("{}-nginx", self.release_name);

        let url = match url_source(values, self.backend, cloud.is_known()) {
            UrlSource::LoadBalancer => {
                let svc = self.service(&nginx).await?;
                let ip = svc
                    .status
                    .and_then(|s| s.load_balancer)
                    .and_then(|lb| lb.ingress)
                    .and_then(|i| i.into_iter().next())
                    .and_then(|i| i.ip.or(i.hostname))
                    .ok_or_else(|| anyhow::anyhow!("the {} load balancer has no address yet", nginx))?;
                let port = svc
                    .spec
                    .and_then(|s| s.ports)
                    .and_then(|p| p.into_iter().next())
                    .map(|p| p.port)
                    .unwrap_or(80);
                format!("{}://{}:{}", scheme, ip, port)
            }
            UrlSource::NodePort => {
                let svc = self.service(&nginx).await?;
                let port = svc
                    .spec
                    .and_then(|s| s.ports)
                    .and_then(|p| p.into_iter().next())
                    .and_then(|p| p.node_port)
                    .ok_or_else(|| anyhow::anyhow!("the {} service has no node port", nginx))?;
                format!("{}://{}:{}", scheme, cloud.external_ip, port)
            }
            UrlSource::Ingress => {
                let api: Api<Ingress> = self.ns_api();
                let ingress = api
                    .get(&self.release_name)
                    .await
                    .with_context(|| format!("get ingress {}", self.release_name))?;
                let spec = ingress.spec.unwrap_or_default();
                let host = spec
                    .rules
                    .and_then(|r| r.into_iter().next())
                    .and_then(|r| r.host)
                    .unwrap_or_default();
                let scheme = if spec.tls.is_some_and(|t| !t.is_empty()) {
                    "https".to_string()
                } else {
                    scheme
                };
                format!("{}://{}", scheme, host)
            }
            UrlSource::Unknown => "UNKNOWN".to_string(),
        };
        Ok(url)
    }

    // --- pods and logs ---

    pub async fn pods(&self) -> Result<Vec<PodSummary>> {
        let api: Api<Pod> = self.ns_api();
        let pods = api.list(&ListParams::default()).await.context("list pods")?;
        Ok(pods
            .items
            .iter()
            .map(|pod| PodSummary {
                name: pod.metadata.name.clone().unwrap_or_default(),
                condition: pod_condition(pod).to_string(),
                phase: pod
                    .status
                    .as_ref()
                    .and_then(|s| s.phase.clone())
                    .unwrap_or_else(|| "Unknown".into()),
                containers: pod
                    .spec
                    .as_ref()
                    .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
                    .unwrap_or_default(),
            })
            .collect())
    }

    /// Stream a container's logs to stdout.
    pub async fn stream_logs(
        &self,
        pod: &str,
        container: Option<&str>,
        follow: bool,
        previous: bool,
        tail: i64,
    ) -> Result<()> {
        let api: Api<Pod> = self.ns_api();
        let params = LogParams {
            container: container.map(str::to_string),
            follow,
            previous,
            tail_lines: (tail >= 0).then_some(tail),
            ..Default::default()
        };
        let stream = api
            .log_stream(pod, &params)
            .await
            .with_context(|| format!("get logs of pod {}", pod))?;
        let mut lines = stream.lines();
        while let Some(line) = lines.try_next().await? {
            println!("{}", line);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_hosts_are_local() {
        assert_eq!(detect_backend("127.0.0.1"), BackendType::Local);
        assert_eq!(detect_backend("localhost"), BackendType::Local);
        assert_eq!(detect_backend("[::1]"), BackendType::Local);
        assert_eq!(detect_backend("10.0.0.12"), BackendType::Remote);
        assert_eq!(detect_backend("k8s.example.com"), BackendType::Remote);
    }

    fn values(nginx_enabled: bool, service: &str, ingress: bool) -> Value {
        json!({
            "nginx": { "enabled": nginx_enabled, "service": { "type": service } },
            "ingress": { "enabled": ingress },
        })
    }

    #[test]
    fn url_source_load_balancer_on_remote_or_cloud() {
        let v = values(true, "LoadBalancer", false);
        assert_eq!(url_source(&v, BackendType::Remote, false), UrlSource::LoadBalancer);
        assert_eq!(url_source(&v, BackendType::Local, true), UrlSource::LoadBalancer);
        assert_eq!(url_source(&v, BackendType::Local, false), UrlSource::Unknown);
    }

    #[test]
    fn url_source_node_port_only_on_local_cloud_vm() {
        let v = values(true, "NodePort", true);
        assert_eq!(url_source(&v, BackendType::Local, true), UrlSource::NodePort);
        assert_eq!(url_source(&v, BackendType::Remote, true), UrlSource::Ingress);
        assert_eq!(url_source(&v, BackendType::Local, false), UrlSource::Ingress);
    }

    #[test]
    fn url_source_ingress_and_unknown() {
        assert_eq!(
            url_source(&values(false, "ClusterIP", true), BackendType::Local, false),
            UrlSource::Ingress
        );
        assert_eq!(
            url_source(&values(false, "ClusterIP", false), BackendType::Local, false),
            UrlSource::Unknown
        );
        assert_eq!(url_source(&json!({}), BackendType::Remote, false), UrlSource::Unknown);
    }

    #[test]
    fn pod_condition_requires_all_true() {
        let ready: Pod = serde_json::from_value(json!({
            "metadata": { "name": "a" },
            "status": { "conditions": [
                { "type": "Ready", "status": "True" },
                { "type": "PodScheduled", "status": "True" }
            ]}
        }))
        .unwrap();
        let not_ready: Pod = serde_json::from_value(json!({
            "metadata": { "name": "b" },
            "status": { "conditions": [
                { "type": "Ready", "status": "False" }
            ]}
        }))
        .unwrap();
        assert_eq!(pod_condition(&ready), "Ready");
        assert_eq!(pod_condition(&not_ready), "NotReady");
        assert_eq!(pod_condition(&Pod::default()), "NotReady");
    }

    mod api_server {
        use super::*;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        const DEPLOYMENTS: &str = "/apis/apps/v1/namespaces/bot/deployments";
        const STATEFULSETS: &str = "/apis/apps/v1/namespaces/bot/statefulsets";

        fn deployment(name: &str, desired: i32, running: i32) -> Value {
            json!({
                "metadata": { "name": name },
                "spec": { "replicas": desired, "selector": {}, "template": {} },
                "status": { "replicas": running }
            })
        }

        fn scale(name: &str, desired: i32) -> Value {
            json!({
                "apiVersion": "autoscaling/v1",
                "kind": "Scale",
                "metadata": { "name": name, "namespace": "bot" },
                "spec": { "replicas": desired },
                "status": { "replicas": 0 }
            })
        }

        fn not_found(name: &str) -> ResponseTemplate {
            ResponseTemplate::new(404).set_body_json(json!({
                "kind": "Status",
                "apiVersion": "v1",
                "metadata": {},
                "status": "Failure",
                "message": format!("namespaces \"{}\" not found", name),
                "reason": "NotFound",
                "code": 404
            }))
        }

        #[tokio::test]
        async fn scale_up_skips_workloads_already_asked_for_replicas() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path(DEPLOYMENTS))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "apiVersion": "apps/v1",
                    "kind": "DeploymentList",
                    "metadata": {},
                    "items": [deployment("rasa-x", 2, 0), deployment("db-migration", 0, 0)]
                })))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(STATEFULSETS))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "apiVersion": "apps/v1",
                    "kind": "StatefulSetList",
                    "metadata": {},
                    "items": []
                })))
                .mount(&server)
                .await;
            for (name, desired) in [("rasa-x", 2), ("db-migration", 0)] {
                Mock::given(method("GET"))
                    .and(path(format!("{}/{}/scale", DEPLOYMENTS, name)))
                    .respond_with(ResponseTemplate::new(200).set_body_json(scale(name, desired)))
                    .mount(&server)
                    .await;
            }
            Mock::given(method("PATCH"))
                .and(path(format!("{}/db-migration/scale", DEPLOYMENTS)))
                .respond_with(ResponseTemplate::new(200).set_body_json(scale("db-migration", 1)))
                .expect(1)
                .mount(&server)
                .await;
            Mock::given(method("PATCH"))
                .and(path(format!("{}/rasa-x/scale", DEPLOYMENTS)))
                .respond_with(ResponseTemplate::new(200).set_body_json(scale("rasa-x", 1)))
                .expect(0)
                .mount(&server)
                .await;

            let kube = Kubernetes::from_url(&server.uri(), "bot").unwrap();
            kube.scale_up().await.unwrap();
            server.verify().await;
        }

        #[tokio::test]
        async fn missing_namespace_is_not_an_error() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/api/v1/namespaces/bot"))
                .respond_with(not_found("bot"))
                .mount(&server)
                .await;

            let kube = Kubernetes::from_url(&server.uri(), "bot").unwrap();
            assert_eq!(kube.backend, BackendType::Local);
            assert!(!kube.namespace_exists().await.unwrap());
            assert!(!kube.is_namespace_manageable().await);
        }

        #[tokio::test]
        async fn terminating_namespaces_are_not_listed() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/api/v1/namespaces"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "apiVersion": "v1",
                    "kind": "NamespaceList",
                    "metadata": {},
                    "items": [
                        { "metadata": { "name": "bot" }, "status": { "phase": "Active" } },
                        { "metadata": { "name": "old" }, "status": { "phase": "Terminating" } }
                    ]
                })))
                .mount(&server)
                .await;

            let kube = Kubernetes::from_url(&server.uri(), "default").unwrap();
            assert_eq!(kube.managed_namespaces().await.unwrap(), vec!["bot"]);
        }
    }
}
