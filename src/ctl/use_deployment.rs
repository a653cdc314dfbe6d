use anyhow::Result;
use std::path::Path;
use tracing::info;

use super::cluster;
use crate::cli::UseDeploymentArgs;
use crate::config::Settings;

/// The config file has to exist unless it may be created.
pub fn ensure_config_file(path: &Path, create: bool) -> Result<()> {
    if !create && !path.exists() {
        anyhow::bail!(
            "the {} config file doesn't exist, use the --create-file flag to create it",
            path.display()
        );
    }
    Ok(())
}

pub async fn run(settings: Settings, args: UseDeploymentArgs) -> Result<()> {
    ensure_config_file(&settings.config_path, args.create_file)?;

    let kube = cluster(&settings).await?.for_namespace(&args.name);
    if !kube.namespace_exists().await? {
        anyhow::bail!("The {} deployment doesn't exist.", args.name);
    }

    let mut config = settings.config.clone();
    config.current_deployment = Some(args.name.clone());
    config.save(&settings.config_path)?;
    info!(deployment = %args.name, file = %settings.config_path.display(), "current deployment set");
    println!("The {} deployment has been set as the current deployment.", args.name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_needs_create_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".rasactl.yaml");
        let err = ensure_config_file(&path, false).unwrap_err();
        assert!(err.to_string().contains("--create-file"));
        assert!(ensure_config_file(&path, true).is_ok());

        std::fs::write(&path, "current-deployment: bot\n").unwrap();
        assert!(ensure_config_file(&path, false).is_ok());
    }
}
