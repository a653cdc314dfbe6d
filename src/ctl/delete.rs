use anyhow::Result;
use std::path::Path;
use tracing::{debug, info, warn};

use super::RasaCtl;
use crate::cli::DeleteArgs;
use crate::config;
use crate::docker::{kind_node_name, DockerEngine};
use crate::hosts::{self, HOSTS_FILE};
use crate::state::StateSecret;
use crate::tui;
use crate::values;

const PRUNE_QUESTION: &str =
    "You're about to delete the namespace with all resources in it, are you sure?";

/// With `--force` a failed step is logged and skipped.
fn tolerate<T: Default>(force: bool, step: &str, result: Result<T>) -> Result<T> {
    match result {
        Err(e) if force => {
            warn!(step, error = %e, "ignoring error");
            Ok(T::default())
        }
        other => other,
    }
}

impl RasaCtl {
    pub async fn delete(&self, args: DeleteArgs) -> Result<()> {
        let force = args.force;
        if !force {
            self.require_managed().await?;
        }
        if args.prune && !tui::confirm(PRUNE_QUESTION, std::io::stdin().lock(), std::io::stdout())? {
            return Ok(());
        }
        self.remove_deployment(force, args.prune).await?;
        self.printer.spin("Done!");
        self.printer.stop_spinner();
        Ok(())
    }

    async fn remove_deployment(&self, force: bool, prune: bool) -> Result<()> {
        self.printer.spin("Deleting Rasa X");
        info!(namespace = %self.namespace, "deleting Rasa X");
        let state: StateSecret = tolerate(force, "read state", self.kube.read_state().await)?;

        if !prune {
            tolerate(force, "helm uninstall", self.helm.uninstall().await)?;
            self.printer.spin("Deleting secret with rasactl state");
            tolerate(force, "delete state", self.kube.delete_state().await)?;
            tolerate(force, "delete label", self.kube.delete_namespace_label().await)?;
        }

        let kind = tolerate(force, "kind detection", self.kube.kind_control_plane().await)?;
        if (kind.is_some() && state.has_project()) || force {
            self.printer.spin("Deleting persistent volume");
            tolerate(force, "delete volume", self.kube.delete_volume().await)?;

            self.printer.spin("Deleting a kind node");
            let node = kind_node_name(&self.namespace);
            info!(%node, "deleting a kind node");
            let removed = match DockerEngine::connect() {
                Ok(docker) => docker.remove_node(&self.namespace).await,
                Err(e) => Err(e),
            };
            tolerate(force, "remove kind container", removed)?;
            tolerate(force, "delete node", self.kube.delete_node(&node).await)?;
        }

        if self.is_local_without_cloud() {
            let host = values::local_host(&self.namespace);
            tolerate(
                force,
                "remove hosts entry",
                hosts::remove_host(Path::new(HOSTS_FILE), &host),
            )?;
        }

        if prune {
            info!(namespace = %self.namespace, "deleting namespace");
            tolerate(force, "delete namespace", self.kube.delete_namespace().await)?;
        }

        if state.has_project() {
            if let Err(e) = config::remove_status_file(Path::new(&state.project_path)) {
                debug!(error = %e, "can't remove the status file");
            }
        }
        Ok(())
    }
}
