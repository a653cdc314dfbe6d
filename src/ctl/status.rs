use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{cluster, RasaCtl};
use crate::api::Version;
use crate::cli::{OutputFormat, StatusArgs};
use crate::cloud::CloudProvider;
use crate::config::{self, Settings};
use crate::k8s::PodSummary;
use crate::output::{self, fields_to_json};
use crate::state::StateSecret;

const NOT_DEFINED: &str = "not defined";
const NO_VERSION: &str = "0.0.0";
const LIST_HEADER: [&str; 7] = [
    "Current",
    "Name",
    "Status",
    "Rasa production",
    "Rasa worker",
    "Enterprise",
    "Version",
];

fn running_label(running: bool) -> &'static str {
    if running {
        "Running"
    } else {
        "Stopped"
    }
}

fn or_zero(version: &str) -> String {
    if version.is_empty() {
        NO_VERSION.to_string()
    } else {
        version.to_string()
    }
}

fn enterprise_label(active: bool) -> &'static str {
    if active {
        "active"
    } else {
        "inactive"
    }
}

/// Labelled status fields; versions come from the API when it answered,
/// else from the state secret.
pub fn status_fields(
    name: &str,
    running: bool,
    url: &str,
    version: Option<&Version>,
    state: &StateSecret,
) -> Vec<(String, Value)> {
    let mut fields = vec![
        ("Name".to_string(), json!(name)),
        ("Status".to_string(), json!(running_label(running))),
        ("URL".to_string(), json!(url)),
    ];
    match version {
        Some(v) => fields.extend([
            ("Version".to_string(), json!(v.rasa_x)),
            ("Enterprise".to_string(), json!(v.enterprise)),
            ("Rasa production version".to_string(), json!(v.rasa.production)),
            ("Rasa worker version".to_string(), json!(v.rasa.worker)),
        ]),
        None => fields.extend([
            ("Version".to_string(), json!(state.rasa_x_version)),
            ("Enterprise".to_string(), json!(state.enterprise)),
            ("Rasa production version".to_string(), json!(state.rasa_production_version)),
            ("Rasa worker version".to_string(), json!(state.rasa_worker_version)),
        ]),
    }
    let project = if state.has_project() {
        state.project_path.as_str()
    } else {
        NOT_DEFINED
    };
    fields.push(("Project path".to_string(), json!(project)));
    fields
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn pod_rows(pods: &[PodSummary]) -> Vec<Vec<String>> {
    pods.iter()
        .map(|p| vec![p.name.clone(), p.condition.clone(), p.phase.clone()])
        .collect()
}

/// One row of `rasactl list`. Rasa versions read `0.0.0` unless Rasa X
/// answered with them.
pub fn list_row(
    current: bool,
    name: &str,
    running: bool,
    version: Option<&Version>,
    state: &StateSecret,
) -> Vec<String> {
    let (production, worker, enterprise, rasa_x) = match version {
        Some(v) => (
            or_zero(&v.rasa.production),
            or_zero(&v.rasa.worker),
            enterprise_label(v.enterprise),
            v.rasa_x.clone(),
        ),
        None => (
            NO_VERSION.to_string(),
            NO_VERSION.to_string(),
            enterprise_label(state.enterprise),
            state.rasa_x_version.clone(),
        ),
    };
    vec![
        if current { "*".into() } else { String::new() },
        name.to_string(),
        running_label(running).to_string(),
        production,
        worker,
        enterprise.to_string(),
        rasa_x,
    ]
}

impl RasaCtl {
    /// `/api/version`, `None` when Rasa X can't be reached.
    async fn version_if_reachable(&self, url: &str) -> Option<Version> {
        let rasax = crate::rasax::RasaX::new(url).ok()?;
        match rasax.version().await {
            Ok(version) => Some(version),
            Err(e) => {
                debug!(namespace = %self.namespace, error = %e, "can't get the Rasa X version");
                None
            }
        }
    }

    pub async fn status(&self, args: StatusArgs) -> Result<()> {
        self.require_managed().await?;

        let running = self.kube.is_rasa_x_running().await?;
        let state = self.kube.read_state().await?;
        let url = self.rasa_x_url().await?;
        let version = self.version_if_reachable(&url).await;

        let mut fields = status_fields(&self.namespace, running, &url, version.as_ref(), &state);
        let mut pods = Vec::new();
        if args.details {
            let release = self.helm.status().await?;
            let (chart, chart_version) = release.chart_name_and_version();
            fields.push(("Helm chart".into(), json!(format!("{}-{}", chart, chart_version))));
            fields.push(("Helm release".into(), json!(self.helm.release_name)));
            fields.push(("Helm release status".into(), json!(release.status)));
            pods = self.kube.pods().await?;
        }

        match args.output {
            OutputFormat::Json => {
                let mut object = fields_to_json(&fields);
                if args.details {
                    object["pods"] = json!(pods
                        .iter()
                        .map(|p| json!({"name": p.name, "condition": p.condition, "status": p.phase}))
                        .collect::<Vec<_>>());
                }
                println!(
                    "{}",
                    serde_json::to_string_pretty(&object).context("encode status")?
                );
            }
            OutputFormat::Table => {
                for (label, value) in &fields {
                    println!("{}: {}", label, display(value));
                }
                if !pods.is_empty() {
                    println!("\nPod details:");
                    output::print_table(&["Name", "Condition", "Status"], &pod_rows(&pods));
                }
            }
        }
        Ok(())
    }
}

/// Table of every managed deployment.
pub async fn list(settings: Settings) -> Result<()> {
    crate::helm::require_helm()?;
    let base = cluster(&settings).await?;
    let namespaces = base.managed_namespaces().await?;
    if namespaces.is_empty() {
        println!("Nothing to show, use the start command to create a new project");
        return Ok(());
    }

    let cwd = std::env::current_dir().context("get the current working directory")?;
    let current = config::implicit_namespace(&cwd, &settings.config);
    let cloud = CloudProvider::detect().await;

    let mut rows = Vec::new();
    for namespace in namespaces {
        let ctl = RasaCtl::assemble(settings.clone(), &base, namespace, None, cloud.clone()).await?;
        let state = ctl.kube.read_state().await.unwrap_or_else(|e| {
            info!(namespace = %ctl.namespace, error = %e, "can't read a secret with state");
            StateSecret::default()
        });
        let running = ctl.kube.is_rasa_x_running().await?;
        let version = match ctl.rasa_x_url().await {
            Ok(url) => ctl.version_if_reachable(&url).await,
            Err(e) => {
                debug!(namespace = %ctl.namespace, error = %e, "can't get the Rasa X URL");
                None
            }
        };
        let is_current = current.as_deref() == Some(ctl.namespace.as_str());
        rows.push(list_row(is_current, &ctl.namespace, running, version.as_ref(), &state));
    }
    output::print_table(&LIST_HEADER, &rows);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RasaVersions;

    fn version() -> Version {
        Version {
            rasa: RasaVersions {
                production: String::new(),
                worker: "2.8.1".into(),
            },
            rasa_x: "1.0.1".into(),
            enterprise: true,
        }
    }

    fn state() -> StateSecret {
        StateSecret {
            rasa_x_version: "0.42.0".into(),
            rasa_worker_version: "2.7.0".into(),
            enterprise: false,
            ..Default::default()
        }
    }

    #[test]
    fn status_prefers_the_api() {
        let fields = status_fields("bot", true, "http://x", Some(&version()), &state());
        let object = fields_to_json(&fields);
        assert_eq!(object["version"], "1.0.1");
        assert_eq!(object["enterprise"], true);
        assert_eq!(object["project_path"], NOT_DEFINED);
        assert_eq!(object["status"], "Running");
    }

    #[test]
    fn status_falls_back_to_state() {
        let mut state = state();
        state.project_path = "/home/me/bot".into();
        let fields = status_fields("bot", false, "http://x", None, &state);
        let object = fields_to_json(&fields);
        assert_eq!(object["version"], "0.42.0");
        assert_eq!(object["rasa_worker_version"], "2.7.0");
        assert_eq!(object["project_path"], "/home/me/bot");
        assert_eq!(object["status"], "Stopped");
        assert_eq!(display(&fields[0].1), "bot");
    }

    #[test]
    fn list_rows() {
        let row = list_row(true, "bot", true, Some(&version()), &state());
        assert_eq!(row, vec!["*", "bot", "Running", "0.0.0", "2.8.1", "active", "1.0.1"]);

        let row = list_row(false, "old", false, None, &state());
        assert_eq!(row, vec!["", "old", "Stopped", "0.0.0", "0.0.0", "inactive", "0.42.0"]);
    }
}
