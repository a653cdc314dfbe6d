use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::{Fallback, RasaCtl};
use crate::api::Model;
use crate::cli::{split_target, ModelCommands};
use crate::config::{self, Settings};
use crate::output;

const MODEL_HEADER: [&str; 6] = ["Name", "Version", "Compatible", "Tags", "Hash", "Trained At"];

/// Arguments of `model download`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub deployment: Option<String>,
    pub model: String,
    pub destination: Option<PathBuf>,
}

/// `[NAME] MODEL [DEST]`. Two arguments mean `MODEL DEST` when the
/// deployment is already known from the status or config file.
pub fn split_download_args(args: &[String], implicit_deployment: bool) -> Result<DownloadTarget> {
    let target = match args {
        [model] => DownloadTarget {
            deployment: None,
            model: model.clone(),
            destination: None,
        },
        [model, dest] if implicit_deployment => DownloadTarget {
            deployment: None,
            model: model.clone(),
            destination: Some(PathBuf::from(dest)),
        },
        [name, model] => DownloadTarget {
            deployment: Some(name.clone()),
            model: model.clone(),
            destination: None,
        },
        [name, model, dest] => DownloadTarget {
            deployment: Some(name.clone()),
            model: model.clone(),
            destination: Some(PathBuf::from(dest)),
        },
        _ => anyhow::bail!("expected [NAME] MODEL [DESTINATION], got {} arguments", args.len()),
    };
    Ok(target)
}

fn model_rows(models: &[Model]) -> Result<Vec<Vec<String>>> {
    models
        .iter()
        .map(|m| {
            Ok(vec![
                m.model.clone(),
                m.version.clone(),
                m.is_compatible.to_string(),
                m.tags.join(", "),
                m.hash.clone(),
                output::format_timestamp(m.trained_at)?,
            ])
        })
        .collect()
}

async fn deployment(settings: Settings, name: Option<String>) -> Result<RasaCtl> {
    RasaCtl::connect(settings, name, Fallback::SingleManaged, None).await
}

pub async fn run(settings: Settings, cmd: ModelCommands) -> Result<()> {
    match cmd {
        ModelCommands::Upload { args } => {
            let (name, rest) = split_target(&args, 1);
            let [file] = rest.as_slice() else {
                anyhow::bail!("expected [NAME] MODEL_FILE");
            };
            deployment(settings, name).await?.model_upload(Path::new(file)).await
        }
        ModelCommands::Download { args } => {
            let cwd = std::env::current_dir().context("get the current working directory")?;
            let implicit = config::implicit_namespace(&cwd, &settings.config).is_some();
            let target = split_download_args(&args, implicit)?;
            let destination = target
                .destination
                .unwrap_or_else(|| cwd.join(format!("{}.tar.gz", target.model)));
            deployment(settings, target.deployment)
                .await?
                .model_download(&target.model, &destination)
                .await
        }
        ModelCommands::Tag { args } => {
            let (name, rest) = split_target(&args, 2);
            let [model, tag] = rest.as_slice() else {
                anyhow::bail!("expected [NAME] MODEL TAG");
            };
            deployment(settings, name).await?.model_tag(model, tag).await
        }
        ModelCommands::Delete { args } => {
            let (name, rest) = split_target(&args, 1);
            let [model] = rest.as_slice() else {
                anyhow::bail!("expected [NAME] MODEL");
            };
            deployment(settings, name).await?.model_delete(model).await
        }
        ModelCommands::List(args) => deployment(settings, args.name).await?.model_list().await,
    }
}

impl RasaCtl {
    pub async fn model_upload(&self, file: &Path) -> Result<()> {
        let length = std::fs::metadata(file)
            .with_context(|| format!("can't read the {} model", file.display()))?
            .len();
        let rasax = self.authorized_rasax().await?;
        let bar = self.printer.bytes_bar(length, "Uploading model");
        rasax.upload_model(file, &bar).await?;
        println!("Model has been uploaded successfully.");
        Ok(())
    }

    pub async fn model_download(&self, model: &str, destination: &Path) -> Result<()> {
        let rasax = self.authorized_rasax().await?;
        let bar = self.printer.bytes_bar(0, "Downloading model");
        rasax.download_model(model, destination, &bar).await?;
        println!("Model has been downloaded successfully.");
        Ok(())
    }

    pub async fn model_tag(&self, model: &str, tag: &str) -> Result<()> {
        self.authorized_rasax().await?.tag_model(model, tag).await?;
        println!("The {} tag has been added to the {} model.", tag, model);
        Ok(())
    }

    pub async fn model_delete(&self, model: &str) -> Result<()> {
        self.authorized_rasax().await?.delete_model(model).await?;
        println!("The {} model has been deleted.", model);
        Ok(())
    }

    pub async fn model_list(&self) -> Result<()> {
        let models = self.authorized_rasax().await?.list_models().await?;
        if models.is_empty() {
            println!("Nothing to show, upload model to see results.");
            return Ok(());
        }
        output::print_table(&MODEL_HEADER, &model_rows(&models)?);
        Ok(())
    }
}
