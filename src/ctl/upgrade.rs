use anyhow::Result;
use serde_json::json;

use super::{release_options, RasaCtl};
use crate::cli::UpgradeArgs;
use crate::compat;
use crate::names;
use crate::values;

impl RasaCtl {
    pub async fn upgrade(&self, args: UpgradeArgs) -> Result<()> {
        if !self.running_or_notice().await? {
            return Ok(());
        }
        names::validate_name(&self.namespace)?;
        compat::check_chart_version(args.helm.rasa_x_chart_version.as_deref())?;

        let overrides = match &args.helm.values_file {
            Some(path) => values::read_values_file(path)?,
            None => json!({}),
        };
        let mut opts = release_options(&args.helm, args.atomic, args.reuse_values);
        if opts.chart_version.is_none() {
            let state = self.kube.read_state().await?;
            if !state.helm_chart_version.is_empty() {
                opts.chart_version = Some(state.helm_chart_version);
            }
        }

        self.printer.spin("Upgrading Rasa X");
        self.helm.upgrade(&overrides, &opts).await?;

        let rasax = self.rasax().await?;
        self.wait_for_rasa_x(&rasax).await?;

        let version = rasax.version().await?;
        let release = self.helm.status().await?;
        self.record_version(&version, Some(&release)).await?;
        self.printer.stop_spinner();
        println!("Rasa X for the {} deployment has been upgraded", self.namespace);
        Ok(())
    }
}
