use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::command::CommandBuilder;
use crate::rasax::RasaX;

pub const LOGIN_ENTRY: &str = "rasactl-login";
pub const TOKEN_ENTRY: &str = "rasactl-token";
const NOT_FOUND: &str = "credentials not found";

/// Credential store speaking the docker credential helper protocol.
#[allow(async_fn_in_trait)]
pub trait CredentialHelper {
    async fn store(&self, server_url: &str, username: &str, secret: &str) -> Result<()>;
    /// `(username, secret)`, `None` when nothing is stored for the URL.
    async fn get(&self, server_url: &str) -> Result<Option<(String, String)>>;
    async fn erase(&self, server_url: &str) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HelperEntry {
    #[serde(rename = "ServerURL", default)]
    server_url: String,
    username: String,
    secret: String,
}

/// One of the `docker-credential-<name>` binaries.
#[derive(Debug, Clone)]
pub struct ProgramHelper {
    program: String,
}

impl ProgramHelper {
    pub fn new(name: &str) -> Self {
        Self {
            program: format!("docker-credential-{}", name),
        }
    }

    /// Helper of the platform keychain.
    pub fn platform_default() -> Self {
        let name = if cfg!(target_os = "macos") {
            "osxkeychain"
        } else if cfg!(windows) {
            "wincred"
        } else {
            "secretservice"
        };
        Self::new(name)
    }

    fn command(&self, action: &str) -> CommandBuilder {
        CommandBuilder::new(&self.program)
            .arg(action)
            .context(format!("run {} {}", self.program, action))
    }
}

fn is_not_found(stdout: &str, stderr: &str) -> bool {
    stdout.contains(NOT_FOUND) || stderr.contains(NOT_FOUND)
}

impl CredentialHelper for ProgramHelper {
    async fn store(&self, server_url: &str, username: &str, secret: &str) -> Result<()> {
        let entry = HelperEntry {
            server_url: server_url.to_string(),
            username: username.to_string(),
            secret: secret.to_string(),
        };
        let payload = serde_json::to_string(&entry)?;
        self.command("store").run_with_stdin(&payload).await?;
        Ok(())
    }

    async fn get(&self, server_url: &str) -> Result<Option<(String, String)>> {
        let out = self.command("get").output_with_stdin(server_url).await?;
        if !out.success {
            if is_not_found(&out.stdout, &out.stderr) {
                return Ok(None);
            }
            anyhow::bail!("{} get: {}{}", self.program, out.stdout.trim(), out.stderr.trim());
        }
        let entry: HelperEntry =
            serde_json::from_str(&out.stdout).context("parse credential helper output")?;
        Ok(Some((entry.username, entry.secret)))
    }

    async fn erase(&self, server_url: &str) -> Result<()> {
        let out = self.command("erase").output_with_stdin(server_url).await?;
        if out.success || is_not_found(&out.stdout, &out.stderr) {
            Ok(())
        } else {
            anyhow::bail!("{} erase: {}{}", self.program, out.stdout.trim(), out.stderr.trim())
        }
    }
}

/// Expiry (`exp` claim) of a JWT, read without verifying the signature.
pub fn jwt_expires_at(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let raw = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&raw).ok()?;
    match &claims["exp"] {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

/// Tokens without a readable expiry count as expired.
pub fn is_jwt_current(token: &str, now: i64) -> bool {
    jwt_expires_at(token).is_some_and(|exp| now < exp)
}

/// Login and token entries of one deployment.
pub struct Credentials<H> {
    helper: H,
    namespace: String,
}

impl<H: CredentialHelper> Credentials<H> {
    pub fn new(helper: H, namespace: &str) -> Self {
        Self {
            helper,
            namespace: namespace.to_string(),
        }
    }

    fn server_url(&self, entry: &str) -> String {
        format!("https://{}-{}", entry, self.namespace)
    }

    pub async fn set(&self, entry: &str, username: &str, secret: &str) -> Result<()> {
        debug!(name = entry, namespace = %self.namespace, "storing credentials in the store");
        self.helper
            .store(&self.server_url(entry), username, secret)
            .await
    }

    pub async fn get(&self, entry: &str) -> Result<Option<(String, String)>> {
        debug!(name = entry, namespace = %self.namespace, "getting credentials from the store");
        self.helper.get(&self.server_url(entry)).await
    }

    pub async fn delete(&self, entry: &str) -> Result<()> {
        debug!(name = entry, namespace = %self.namespace, "deleting credentials from the store");
        self.helper.erase(&self.server_url(entry)).await
    }

    pub async fn is_logged(&self) -> bool {
        match self.get(LOGIN_ENTRY).await {
            Ok(Some((user, password))) => !user.is_empty() && !password.is_empty(),
            Ok(None) => false,
            Err(e) => {
                debug!(error = %e, "can't get credentials from the store");
                false
            }
        }
    }

    pub async fn save_login(&self, username: &str, password: &str, token: &str) -> Result<()> {
        self.set(LOGIN_ENTRY, username, password).await?;
        self.set(TOKEN_ENTRY, &self.namespace, token).await
    }

    pub async fn logout(&self) -> Result<()> {
        self.delete(LOGIN_ENTRY).await?;
        self.delete(TOKEN_ENTRY).await
    }

    /// A usable access token, re-authenticating with the stored login when
    /// the stored token has expired or is rejected.
    pub async fn token(&self, rasax: &RasaX) -> Result<String> {
        let (_, token) = self
            .get(TOKEN_ENTRY)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no token stored, use the 'rasactl auth login' command"))?;

        let now = chrono::Utc::now().timestamp();
        if is_jwt_current(&token, now) && rasax.validate_token(&token).await {
            return Ok(token);
        }

        debug!(namespace = %self.namespace, "token expired, authenticating again");
        let (username, password) = self
            .get(LOGIN_ENTRY)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no credentials stored, use the 'rasactl auth login' command"))?;
        let fresh = rasax.auth(&username, &password).await?;
        self.set(TOKEN_ENTRY, &self.namespace, &fresh).await?;
        Ok(fresh)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Credential store kept in memory.
    #[derive(Default)]
    pub struct MemoryHelper {
        pub entries: Mutex<HashMap<String, (String, String)>>,
    }

    impl CredentialHelper for &MemoryHelper {
        async fn store(&self, server_url: &str, username: &str, secret: &str) -> Result<()> {
            self.entries
                .lock()
                .unwrap()
                .insert(server_url.into(), (username.into(), secret.into()));
            Ok(())
        }

        async fn get(&self, server_url: &str) -> Result<Option<(String, String)>> {
            Ok(self.entries.lock().unwrap().get(server_url).cloned())
        }

        async fn erase(&self, server_url: &str) -> Result<()> {
            self.entries.lock().unwrap().remove(server_url);
            Ok(())
        }
    }

    pub fn jwt(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"username":"me","exp":{}}}"#, exp));
        format!("{}.{}.signature", header, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{jwt, MemoryHelper};
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn jwt_expiry() {
        let token = jwt(2_000_000_000);
        assert_eq!(jwt_expires_at(&token), Some(2_000_000_000));
        assert!(is_jwt_current(&token, 1_600_000_000));
        assert!(!is_jwt_current(&token, 2_000_000_001));
        assert!(!is_jwt_current("garbage", 0));
    }

    #[test]
    fn helper_entry_wire_format() {
        let entry = HelperEntry {
            server_url: "https://rasactl-login-bot".into(),
            username: "me".into(),
            secret: "pw".into(),
        };
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({"ServerURL": "https://rasactl-login-bot", "Username": "me", "Secret": "pw"})
        );
    }

    #[tokio::test]
    async fn entries_are_scoped_to_the_namespace() {
        let store = MemoryHelper::default();
        let creds = Credentials::new(&store, "bot");
        assert!(!creds.is_logged().await);

        creds.save_login("me", "pw", "tok").await.unwrap();
        assert!(creds.is_logged().await);
        {
            let entries = store.entries.lock().unwrap();
            assert_eq!(
                entries.get("https://rasactl-token-bot"),
                Some(&("bot".to_string(), "tok".to_string()))
            );
        }

        creds.logout().await.unwrap();
        assert!(!creds.is_logged().await);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed() {
        let server = MockServer::start().await;
        let fresh = jwt(4_000_000_000);
        Mock::given(method("POST"))
            .and(path("/api/auth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": fresh})))
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryHelper::default();
        let creds = Credentials::new(&store, "bot");
        creds.save_login("me", "pw", &jwt(1_000)).await.unwrap();

        let rasax = RasaX::new(&server.uri()).unwrap();
        assert_eq!(creds.token(&rasax).await.unwrap(), fresh);
        let (_, stored) = creds.get(TOKEN_ENTRY).await.unwrap().unwrap();
        assert_eq!(stored, fresh);
    }

    #[tokio::test]
    async fn valid_token_is_reused() {
        let server = MockServer::start().await;
        let token = jwt(4_000_000_000);
        Mock::given(method("GET"))
            .and(path("/api/config"))
            .and(header("authorization", format!("Bearer {}", token).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let store = MemoryHelper::default();
        let creds = Credentials::new(&store, "bot");
        creds.save_login("me", "pw", &token).await.unwrap();

        let rasax = RasaX::new(&server.uri()).unwrap();
        assert_eq!(creds.token(&rasax).await.unwrap(), token);
    }

    #[tokio::test]
    async fn missing_token_asks_for_login() {
        let store = MemoryHelper::default();
        let creds = Credentials::new(&store, "bot");
        let rasax = RasaX::new("http://127.0.0.1:9").unwrap();
        let err = creds.token(&rasax).await.unwrap_err();
        assert!(err.to_string().contains("rasactl auth login"));
    }
}
