use anyhow::Result;
use tracing::debug;

use super::RasaCtl;
use crate::cli::LogsArgs;
use crate::tui;

impl RasaCtl {
    pub async fn logs(&self, args: LogsArgs) -> Result<()> {
        if !self.running_or_notice().await? {
            return Ok(());
        }

        let pods = self.kube.pods().await?;
        let pod_name = match args.pod {
            Some(pod) => pod,
            None => {
                let names = pods.iter().map(|p| p.name.clone()).collect();
                match tui::select("Choose a pod:", names)? {
                    Some(pod) => pod,
                    None => {
                        println!("Interrupted");
                        return Ok(());
                    }
                }
            }
        };
        let pod = pods
            .iter()
            .find(|p| p.name == pod_name)
            .ok_or_else(|| {
                anyhow::anyhow!("the {} pod doesn't exist in the {} deployment", pod_name, self.namespace)
            })?;

        let container = match args.container {
            Some(container) => Some(container),
            None if pod.containers.len() > 1 => {
                match tui::select("Choose a container:", pod.containers.clone())? {
                    Some(container) => Some(container),
                    None => {
                        println!("Interrupted");
                        return Ok(());
                    }
                }
            }
            None => None,
        };

        debug!(pod = %pod_name, container = ?container, follow = args.follow, "streaming logs");
        self.kube
            .stream_logs(
                &pod_name,
                container.as_deref(),
                args.follow,
                args.previous,
                args.tail,
            )
            .await
    }

    pub async fn open(&self) -> Result<()> {
        if !self.running_or_notice().await? {
            return Ok(());
        }
        let url = self.rasa_x_url().await?;
        open::that(&url).map_err(|e| {
            anyhow::anyhow!("Can't open the URL {} in your web browser: {}", url, e)
        })?;
        println!("The URL {} has been opened in your web browser", url);
        Ok(())
    }
}
