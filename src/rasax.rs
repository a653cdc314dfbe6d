use anyhow::{Context, Result};
use futures::{StreamExt, TryStreamExt};
use indicatif::ProgressBar;
use reqwest::{Client, Response, StatusCode};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::api::{AuthRequest, AuthResponse, Health, LicenseRequest, Model, Version};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(9);
const UPLOAD_CHUNK: usize = 64 * 1024;
const MODELS_PATH: &str = "api/projects/default/models";

pub const UNAUTHORIZED: &str =
    "unauthorized, use the 'rasactl auth login' command to authorized";

/// `scheme://127.0.0.1[:port]` for a URL whose host can't be reached.
pub fn internal_url(address: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(address).ok()?;
    let mut url = format!("{}://127.0.0.1", parsed.scheme());
    if let Some(port) = parsed.port() {
        url.push_str(&format!(":{}", port));
    }
    Some(url)
}

/// Any response, whatever its status, makes an address accessible.
pub async fn is_url_accessible(address: &str) -> bool {
    let client = match Client::builder()
        .timeout(REACHABILITY_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
    {
        Ok(client) => client,
        Err(_) => return false,
    };
    client.get(address).send().await.is_ok()
}

async fn error_body(resp: Response) -> anyhow::Error {
    let content = resp.text().await.unwrap_or_default();
    anyhow::anyhow!("{}", content.trim())
}

/// Client of the Rasa X REST API of one deployment.
#[derive(Debug, Clone)]
pub struct RasaX {
    client: Client,
    url: String,
    token: Option<String>,
}

impl RasaX {
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("rasactl/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build Rasa X HTTP client")?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The configured URL, or its loopback form when it can't be reached.
    async fn base_url(&self) -> String {
        if is_url_accessible(&self.url).await {
            return self.url.clone();
        }
        match internal_url(&self.url) {
            Some(internal) => {
                debug!(url = %self.url, internal_url = %internal, "URL is not accessible, using internal address");
                internal
            }
            None => self.url.clone(),
        }
    }

    fn bearer(&self) -> Result<&str> {
        self.token.as_deref().ok_or_else(|| anyhow::anyhow!(UNAUTHORIZED))
    }

    fn models_url(&self, rest: &str) -> String {
        if rest.is_empty() {
            format!("{}/{}", self.url, MODELS_PATH)
        } else {
            format!("{}/{}/{}", self.url, MODELS_PATH, rest)
        }
    }

    pub async fn health(&self) -> Result<Health> {
        let url = format!("{}/api/health", self.base_url().await);
        debug!(%url, "sending a request to Rasa X");
        let resp = self.client.get(&url).send().await?;

        match resp.status().as_u16() {
            200 | 304 | 502 => {
                let body = resp.bytes().await?;
                Ok(serde_json::from_slice(&body).unwrap_or_default())
            }
            _ => anyhow::bail!(
                "The Rasa X health endpoint has returned status code {}",
                resp.status()
            ),
        }
    }

    pub async fn version(&self) -> Result<Version> {
        let url = format!("{}/api/version", self.base_url().await);
        debug!(%url, "sending a request to Rasa X");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("get {}", url))?;

        if resp.status() != StatusCode::OK {
            anyhow::bail!(
                "The Rasa X version endpoint has returned status code {}",
                resp.status()
            );
        }
        resp.json().await.context("parse Rasa X version")
    }

    /// Exchange a username and password for an access token.
    pub async fn auth(&self, username: &str, password: &str) -> Result<String> {
        let url = format!("{}/api/auth", self.base_url().await);
        let resp = self
            .client
            .post(&url)
            .json(&AuthRequest { username, password })
            .send()
            .await
            .with_context(|| format!("post {}", url))?;

        match resp.status() {
            StatusCode::OK => {
                let body: AuthResponse = resp.json().await.context("parse auth response")?;
                Ok(body.access_token)
            }
            StatusCode::UNAUTHORIZED => anyhow::bail!("Unauthorized"),
            status => anyhow::bail!(
                "The Rasa X auth endpoint has returned status code {}",
                status
            ),
        }
    }

    pub async fn validate_token(&self, token: &str) -> bool {
        let url = format!("{}/api/config", self.base_url().await);
        match self.client.get(&url).bearer_auth(token).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => true,
            Ok(resp) => {
                debug!(status = %resp.status(), "token is invalid");
                false
            }
            Err(e) => {
                debug!(error = %e, "can't validate token");
                false
            }
        }
    }

    pub async fn activate_license(&self, license: &str) -> Result<()> {
        let url = format!("{}/api/license", self.base_url().await);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.bearer()?)
            .json(&LicenseRequest { license })
            .send()
            .await
            .with_context(|| format!("post {}", url))?;

        match resp.status() {
            StatusCode::CREATED => Ok(()),
            StatusCode::UNAUTHORIZED => anyhow::bail!("Unauthorized"),
            status => {
                let body = error_body(resp).await;
                anyhow::bail!(
                    "The Rasa X license endpoint has returned status code {}, body: {}",
                    status,
                    body
                )
            }
        }
    }

    pub async fn deactivate_license(&self) -> Result<()> {
        let url = format!("{}/api/license", self.base_url().await);
        let resp = self
            .client
            .delete(&url)
            .bearer_auth(self.bearer()?)
            .send()
            .await
            .with_context(|| format!("delete {}", url))?;

        match resp.status() {
            StatusCode::NO_CONTENT => Ok(()),
            StatusCode::UNAUTHORIZED => anyhow::bail!("Unauthorized"),
            status => {
                let body = error_body(resp).await;
                anyhow::bail!(
                    "The Rasa X license endpoint has returned status code {}, body: {}",
                    status,
                    body
                )
            }
        }
    }

    /// Upload a model archive, advancing `progress` as bytes are sent.
    pub async fn upload_model(&self, path: &Path, progress: &ProgressBar) -> Result<()> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("open {}", path.display()))?;
        let length = file
            .metadata()
            .await
            .with_context(|| format!("read {}", path.display()))?
            .len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "model.tar.gz".into());
        progress.set_length(length);

        let bar = progress.clone();
        let stream = ReaderStream::with_capacity(file, UPLOAD_CHUNK).inspect_ok(move |chunk| {
            bar.inc(chunk.len() as u64);
        });
        let part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(stream),
            length,
        )
        .file_name(file_name);
        let form = reqwest::multipart::Form::new().part("model", part);

        let url = self.models_url("");
        debug!(%url, "sending a request to Rasa X");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.bearer()?)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("post {}", url))?;

        match resp.status() {
            StatusCode::CREATED => {
                progress.finish_and_clear();
                Ok(())
            }
            StatusCode::CONFLICT => anyhow::bail!("A model with that name already exists."),
            StatusCode::UNAUTHORIZED => anyhow::bail!(UNAUTHORIZED),
            _ => Err(error_body(resp).await),
        }
    }

    /// Download a model into `dest`.
    pub async fn download_model(&self, name: &str, dest: &Path, progress: &ProgressBar) -> Result<()> {
        let url = self.models_url(name);
        debug!(%url, "sending a request to Rasa X");
        let resp = self
            .client
            .get(&url)
            .bearer_auth(self.bearer()?)
            .send()
            .await
            .with_context(|| format!("get {}", url))?;

        match resp.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => anyhow::bail!("model '{}' not found", name),
            StatusCode::UNAUTHORIZED => anyhow::bail!(UNAUTHORIZED),
            _ => return Err(error_body(resp).await),
        }

        info!(model = name, store_path = %dest.display(), "starting to download the model");
        if let Some(length) = resp.content_length() {
            progress.set_length(length);
        }
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("create {}", dest.display()))?;
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.context("read model")?;
            file.write_all(&chunk).await?;
            progress.inc(chunk.len() as u64);
        }
        file.flush().await?;
        progress.finish_and_clear();
        Ok(())
    }

    pub async fn list_models(&self) -> Result<Vec<Model>> {
        let url = self.models_url("");
        debug!(%url, "sending a request to Rasa X");
        let resp = self
            .client
            .get(&url)
            .bearer_auth(self.bearer()?)
            .send()
            .await
            .with_context(|| format!("get {}", url))?;

        match resp.status() {
            StatusCode::OK => resp.json().await.context("parse model list"),
            StatusCode::UNAUTHORIZED => anyhow::bail!(UNAUTHORIZED),
            _ => Err(error_body(resp).await),
        }
    }

    pub async fn tag_model(&self, model: &str, tag: &str) -> Result<()> {
        let url = self.models_url(&format!("{}/tags/{}", model, tag));
        debug!(%url, "sending a request to Rasa X");
        let resp = self
            .client
            .put(&url)
            .bearer_auth(self.bearer()?)
            .send()
            .await
            .with_context(|| format!("put {}", url))?;

        match resp.status() {
            StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => anyhow::bail!("model '{}' not found", model),
            StatusCode::UNAUTHORIZED => anyhow::bail!(UNAUTHORIZED),
            _ => Err(error_body(resp).await),
        }
    }

    pub async fn delete_model(&self, name: &str) -> Result<()> {
        let url = self.models_url(name);
        debug!(%url, "sending a request to Rasa X");
        let resp = self
            .client
            .delete(&url)
            .bearer_auth(self.bearer()?)
            .send()
            .await
            .with_context(|| format!("delete {}", url))?;

        match resp.status() {
            StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => anyhow::bail!("model '{}' not found", name),
            StatusCode::UNAUTHORIZED => anyhow::bail!(UNAUTHORIZED),
            _ => Err(error_body(resp).await),
        }
    }
}
