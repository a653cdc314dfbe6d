use std::collections::BTreeMap;

/// Observed lifecycle state of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentState {
    NotDeployed,
    Stopped,
    Running,
}

impl DeploymentState {
    /// `deployed` comes from the helm release history, `running` from the
    /// replica counts of the namespace workloads.
    pub fn observe(deployed: bool, running: bool) -> Self {
        match (deployed, running) {
            (_, true) => DeploymentState::Running,
            (true, false) => DeploymentState::Stopped,
            (false, false) => DeploymentState::NotDeployed,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeploymentState::NotDeployed => "Not deployed",
            DeploymentState::Stopped => "Stopped",
            DeploymentState::Running => "Running",
        }
    }

    pub fn start_action(&self) -> StartAction {
        match self {
            DeploymentState::NotDeployed => StartAction::Install,
            DeploymentState::Stopped => StartAction::StartStopped,
            DeploymentState::Running => StartAction::AlreadyRunning,
        }
    }
}

/// What `start` does for a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAction {
    /// Fresh helm install, optionally with a kind node and project volume.
    Install,
    /// Upgrade with reused values, then scale workloads back to one replica.
    StartStopped,
    AlreadyRunning,
}

/// Replica counts of a single Deployment or StatefulSet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadReplicas {
    pub name: String,
    /// `spec.replicas`, what the workload is asked to run.
    pub desired: i32,
    /// `status.replicas`, what it runs right now.
    pub replicas: i32,
    pub ready_replicas: i32,
}

impl WorkloadReplicas {
    pub fn is_up(&self) -> bool {
        self.replicas != 0 && self.ready_replicas != 0
    }
}

/// Running means at least one Deployment and one StatefulSet exist and every
/// one of them has non-zero desired and ready replicas.
pub fn workloads_running(deployments: &[WorkloadReplicas], statefulsets: &[WorkloadReplicas]) -> bool {
    if deployments.is_empty() || statefulsets.is_empty() {
        return false;
    }
    deployments.iter().chain(statefulsets).all(WorkloadReplicas::is_up)
}

/// Names of workloads whose desired replica count is zero. A workload that
/// is already asked for replicas but has not started them yet is left alone.
pub fn scaled_down(workloads: &[WorkloadReplicas]) -> Vec<&str> {
    workloads
        .iter()
        .filter(|w| w.desired == 0)
        .map(|w| w.name.as_str())
        .collect()
}

pub const STATE_SECRET_NAME: &str = "rasactl";
pub const STATE_SECRET_TYPE: &str = "rasa.com/rasactl.state";

pub const KEY_RASA_X_VERSION: &str = "rasa-x-version";
pub const KEY_RASA_WORKER_VERSION: &str = "rasa-worker-version";
pub const KEY_RASA_PRODUCTION_VERSION: &str = "rasa-production-version";
pub const KEY_PROJECT_PATH: &str = "project-path";
pub const KEY_ENTERPRISE: &str = "enterprise";
pub const KEY_HELM_CHART_NAME: &str = "helm-chart-name";
pub const KEY_HELM_RELEASE_NAME: &str = "helm-release-name";
pub const KEY_HELM_CHART_VERSION: &str = "helm-chart-version";
pub const KEY_HELM_RELEASE_STATUS: &str = "helm-release-status";

/// Deployment facts persisted in the `rasactl` secret of the namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSecret {
    pub rasa_x_version: String,
    pub rasa_worker_version: String,
    pub rasa_production_version: String,
    pub project_path: String,
    pub enterprise: bool,
    pub helm_chart_name: String,
    pub helm_release_name: String,
    pub helm_chart_version: String,
    pub helm_release_status: String,
}

impl StateSecret {
    pub fn from_map(data: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| data.get(key).cloned().unwrap_or_default();
        Self {
            rasa_x_version: get(KEY_RASA_X_VERSION),
            rasa_worker_version: get(KEY_RASA_WORKER_VERSION),
            rasa_production_version: get(KEY_RASA_PRODUCTION_VERSION),
            project_path: get(KEY_PROJECT_PATH),
            enterprise: get(KEY_ENTERPRISE) == "active",
            helm_chart_name: get(KEY_HELM_CHART_NAME),
            helm_release_name: get(KEY_HELM_RELEASE_NAME),
            helm_chart_version: get(KEY_HELM_CHART_VERSION),
            helm_release_status: get(KEY_HELM_RELEASE_STATUS),
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        let enterprise = if self.enterprise { "active" } else { "inactive" };
        BTreeMap::from([
            (KEY_RASA_X_VERSION.into(), self.rasa_x_version.clone()),
            (KEY_RASA_WORKER_VERSION.into(), self.rasa_worker_version.clone()),
            (
                KEY_RASA_PRODUCTION_VERSION.into(),
                self.rasa_production_version.clone(),
            ),
            (KEY_PROJECT_PATH.into(), self.project_path.clone()),
            (KEY_ENTERPRISE.into(), enterprise.into()),
            (KEY_HELM_CHART_NAME.into(), self.helm_chart_name.clone()),
            (KEY_HELM_RELEASE_NAME.into(), self.helm_release_name.clone()),
            (KEY_HELM_CHART_VERSION.into(), self.helm_chart_version.clone()),
            (KEY_HELM_RELEASE_STATUS.into(), self.helm_release_status.clone()),
        ])
    }

    pub fn has_project(&self) -> bool {
        !self.project_path.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(name: &str, replicas: i32, ready: i32) -> WorkloadReplicas {
        WorkloadReplicas {
            name: name.into(),
            desired: replicas,
            replicas,
            ready_replicas: ready,
        }
    }

    #[test]
    fn state_table_maps_to_actions() {
        assert_eq!(
            DeploymentState::observe(false, false).start_action(),
            StartAction::Install
        );
        assert_eq!(
            DeploymentState::observe(true, false).start_action(),
            StartAction::StartStopped
        );
        assert_eq!(
            DeploymentState::observe(true, true).start_action(),
            StartAction::AlreadyRunning
        );
        // Workloads up without a helm release (e.g. release record lost) still count as running.
        assert_eq!(
            DeploymentState::observe(false, true),
            DeploymentState::Running
        );
    }

    #[test]
    fn running_requires_both_workload_kinds() {
        let deploys = vec![w("rasa-x", 1, 1), w("nginx", 1, 1)];
        let sets = vec![w("postgresql", 1, 1)];
        assert!(workloads_running(&deploys, &sets));
        assert!(!workloads_running(&deploys, &[]));
        assert!(!workloads_running(&[], &sets));
    }

    #[test]
    fn any_scaled_or_unready_workload_means_not_running() {
        let sets = vec![w("postgresql", 1, 1)];
        assert!(!workloads_running(&[w("rasa-x", 0, 0)], &sets));
        assert!(!workloads_running(&[w("rasa-x", 1, 0)], &sets));
        assert!(!workloads_running(&[w("rasa-x", 1, 1)], &[w("redis", 1, 0)]));
    }

    #[test]
    fn only_zero_replica_workloads_are_scaled_up() {
        let all = vec![w("a", 0, 0), w("b", 2, 1), w("c", 0, 0)];
        assert_eq!(scaled_down(&all), vec!["a", "c"]);
    }

    #[test]
    fn workload_still_starting_is_not_scaled_up() {
        let starting = WorkloadReplicas {
            desired: 3,
            ..w("rasa-x", 0, 0)
        };
        let stopped = WorkloadReplicas {
            desired: 0,
            ..w("postgresql", 0, 0)
        };
        assert_eq!(scaled_down(&[starting, stopped]), vec!["postgresql"]);
    }

    #[test]
    fn state_secret_round_trip_and_defaults() {
        let state = StateSecret {
            rasa_x_version: "1.0.1".into(),
            project_path: "/home/me/bot".into(),
            enterprise: true,
            helm_release_name: "rasa-x".into(),
            ..Default::default()
        };
        let map = state.to_map();
        assert_eq!(map[KEY_ENTERPRISE], "active");
        assert_eq!(StateSecret::from_map(&map), state);

        let empty = StateSecret::from_map(&BTreeMap::new());
        assert!(!empty.enterprise);
        assert!(!empty.has_project());
        assert_eq!(empty.to_map()[KEY_ENTERPRISE], "inactive");
    }
}
