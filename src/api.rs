use serde::{Deserialize, Serialize};

/// Body of `/api/health`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Health {
    pub database_migration: DatabaseMigration,
    pub worker: EnvironmentHealth,
    pub production: EnvironmentHealth,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseMigration {
    pub status: String,
    pub progress_in_percent: f32,
}

impl DatabaseMigration {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnvironmentHealth {
    pub version: String,
    pub minimum_compatible_version: String,
    pub status: u16,
}

impl EnvironmentHealth {
    pub fn is_ready(&self) -> bool {
        self.status == 200
    }
}

/// Body of `/api/version`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Version {
    pub rasa: RasaVersions,
    #[serde(rename = "rasa-x")]
    pub rasa_x: String,
    pub enterprise: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RasaVersions {
    pub production: String,
    pub worker: String,
}

#[derive(Debug, Serialize)]
pub struct AuthRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct LicenseRequest<'a> {
    pub license: &'a str,
}

/// One entry of the model list.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Model {
    pub model: String,
    pub version: String,
    pub is_compatible: bool,
    pub tags: Vec<String>,
    pub hash: String,
    /// Unix timestamp with fractional seconds.
    pub trained_at: f64,
}

/// `environments` entry of the Rasa X configuration files ConfigMap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentsConfig {
    pub rasa: Environments,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Environments {
    pub production: EnvironmentEndpoint,
    pub worker: EnvironmentEndpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentEndpoint {
    pub url: String,
    pub token: String,
}

impl EnvironmentsConfig {
    /// Environments pointing at Rasa servers running on the host.
    /// With a separate worker it listens on `port + 1`.
    pub fn local(port: u16, separate_worker: bool, token: &str) -> Self {
        let worker_port = if separate_worker { port + 1 } else { port };
        let endpoint = |port: u16| EnvironmentEndpoint {
            url: format!("http://host.docker.internal:{}", port),
            token: token.to_string(),
        };
        Self {
            rasa: Environments {
                production: endpoint(port),
                worker: endpoint(worker_port),
            },
        }
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
