use anyhow::Result;
use tracing::info;

use super::RasaCtl;
use crate::docker::DockerEngine;

impl RasaCtl {
    pub async fn stop(&self) -> Result<()> {
        if !self.running_or_notice().await? {
            return Ok(());
        }

        self.printer.spin("Stopping Rasa X");
        let version = self.rasax().await?.version().await?;
        self.record_version(&version, None).await?;

        self.kube.scale_down().await?;

        let state = self.kube.read_state().await?;
        if state.has_project() && self.kube.kind_control_plane().await?.is_some() {
            DockerEngine::connect()?.stop_node(&self.namespace).await?;
        }

        self.printer.stop_spinner();
        info!(namespace = %self.namespace, "deployment stopped");
        println!("Rasa X for the {} deployment has been stopped", self.namespace);
        Ok(())
    }
}
