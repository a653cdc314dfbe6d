use anyhow::Result;
use tracing::info;

use super::RasaCtl;
use crate::compat;
use crate::state::StateSecret;

impl RasaCtl {
    /// Take over a Rasa X release that was installed without rasactl.
    pub async fn add(&self) -> Result<()> {
        if self.kube.is_namespace_manageable().await {
            println!("Already added");
            return Ok(());
        }
        info!(
            namespace = %self.namespace,
            release = %self.helm.release_name,
            "adding existing deployment"
        );

        let release = self.helm.status().await?;
        let (_, chart_version) = release.chart_name_and_version();
        compat::check_chart_version(Some(&chart_version))?;

        let version = self.rasax().await?.version().await?;

        let state = StateSecret {
            helm_release_name: self.helm.release_name.clone(),
            ..Default::default()
        };
        self.kube.save_state(&state).await?;
        self.record_version(&version, Some(&release)).await?;
        self.kube.add_namespace_label().await?;

        println!("The {} has been added as a deployment.", self.namespace);
        Ok(())
    }
}
