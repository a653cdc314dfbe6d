use anyhow::{Context, Result};
use regex::{Captures, Regex};
use serde_json::{json, Value};
use std::path::Path;

use crate::k8s::BackendType;

/// Domain used for ingress hosts on local clusters.
pub const LOCAL_DOMAIN: &str = "rasactl.localhost";
pub const PROJECT_VOLUME_NAME: &str = "rasa-x-local-path";
pub const PROJECT_MOUNT_PATH: &str = "/app/local_project";

/// Deep-merge `overlay` into `base`. Maps merge key by key, anything else
/// (including lists) is replaced by the overlay.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Merge fragments in order, later ones win.
pub fn merge_all(fragments: impl IntoIterator<Item = Value>) -> Value {
    let mut result = json!({});
    for fragment in fragments {
        if fragment.is_null() {
            continue;
        }
        merge(&mut result, fragment);
    }
    result
}

/// Look up a dotted path such as `rabbitmq.service.port`.
pub fn value_at<'a>(values: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(values, |node, key| node.get(key))
}

pub fn str_at(values: &Value, path: &str) -> Option<String> {
    match value_at(values, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn bool_at(values: &Value, path: &str) -> bool {
    value_at(values, path)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Expand `${VAR}` and `$VAR` references; unset variables expand to "".
pub fn expand_env(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let re = match Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)") {
        Ok(re) => re,
        Err(_) => return template.to_string(),
    };
    re.replace_all(template, |caps: &Captures| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        lookup(name).unwrap_or_default()
    })
    .into_owned()
}

/// Read a user values file, expanding environment variables first.
pub fn read_values_file(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read values file {}", path.display()))?;
    let expanded = expand_env(&raw, |name| std::env::var(name).ok());
    let values: Option<Value> = serde_yaml::from_str(&expanded)
        .with_context(|| format!("parse values file {}", path.display()))?;
    Ok(values.unwrap_or_else(|| json!({})))
}

/// Write values to a temporary YAML file handed to helm with `-f`.
pub fn write_values_file(values: &Value) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("rasactl-values-")
        .suffix(".yaml")
        .tempfile()
        .context("create values file")?;
    serde_yaml::to_writer(&mut file, values).context("write values file")?;
    Ok(file)
}

fn random_hex(len: usize) -> Result<String> {
    let mut bytes = vec![0u8; len];
    getrandom::getrandom(&mut bytes).map_err(|e| anyhow::anyhow!("random bytes: {}", e))?;
    Ok(hex::encode(bytes))
}

/// Random 32-byte hex token.
pub fn generate_token() -> Result<String> {
    random_hex(32)
}

/// Mask a secret value showing only the last 4 characters.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

pub fn local_host(namespace: &str) -> String {
    format!("{}.{}", namespace, LOCAL_DOMAIN)
}

/// Inputs for the values of a fresh install.
#[derive(Debug, Clone)]
pub struct InstallValues<'a> {
    pub namespace: &'a str,
    pub backend: BackendType,
    /// A known cloud provider was detected on the machine running the cluster.
    pub cloud: bool,
    pub edge_release: bool,
    /// PVC holding the mounted project, when a project path is used.
    pub project_pvc: Option<&'a str>,
    pub password: &'a str,
    pub erlang_cookie: String,
}

impl InstallValues<'_> {
    /// Compose chart values. User values are merged last and always win.
    pub fn compose(&self, user: Value) -> Value {
        let mut fragments = vec![json!({
            "rabbitmq": { "auth": { "erlangCookie": self.erlang_cookie } }
        })];

        if self.edge_release {
            fragments.push(json!({
                "rasax": { "tag": "latest" },
                "eventService": { "tag": "latest" },
                "dbMigrationService": { "tag": "latest" },
            }));
        }

        if let (Some(pvc), BackendType::Local) = (self.project_pvc, self.backend) {
            fragments.push(json!({
                "rasax": {
                    "extraVolumes": [{
                        "name": PROJECT_VOLUME_NAME,
                        "persistentVolumeClaim": { "claimName": pvc },
                    }],
                    "extraVolumeMounts": [{
                        "name": PROJECT_VOLUME_NAME,
                        "mountPath": PROJECT_MOUNT_PATH,
                    }],
                    "tolerations": [{
                        "key": "rasactl",
                        "operator": "Equal",
                        "value": "true",
                        "effect": "NoSchedule",
                    }],
                    "nodeSelector": { "rasactl-project": self.namespace },
                }
            }));
        }

        match (self.backend, self.cloud) {
            (BackendType::Local, false) => {
                fragments.push(json!({
                    "rasa": { "versions": { "rasaProduction": { "enabled": false } } },
                    "nginx": { "enabled": false },
                    "ingress": {
                        "enabled": true,
                        "hosts": [{ "host": local_host(self.namespace), "paths": ["/"] }],
                    },
                }));
            }
            (BackendType::Local, true) => {
                fragments.push(json!({
                    "rasa": { "versions": { "rasaProduction": { "enabled": true } } },
                    "nginx": { "service": { "type": "NodePort" } },
                }));
            }
            (BackendType::Remote, _) => {}
        }

        fragments.push(json!({
            "rasax": { "initialUser": { "password": self.password } }
        }));
        fragments.push(user);
        merge_all(fragments)
    }

    /// Local non-cloud installs expose Rasa X through a hosts entry.
    pub fn needs_hosts_entry(&self) -> bool {
        self.backend == BackendType::Local && !self.cloud
    }
}

/// Values that expose the databases and the event broker to a Rasa server
/// running on the host.
pub fn connect_values() -> Value {
    json!({
        "rabbitmq": { "service": { "type": "NodePort" } },
        "postgresql": { "service": { "type": "NodePort" } },
        "rasax": { "hostNetwork": true },
    })
}

pub fn erlang_cookie() -> Result<String> {
    random_hex(16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn local(pvc: Option<&str>) -> InstallValues<'_> {
        InstallValues {
            namespace: "bot",
            backend: BackendType::Local,
            cloud: false,
            edge_release: false,
            project_pvc: pvc,
            password: "secret",
            erlang_cookie: "cookie".into(),
        }
    }

    #[test]
    fn merge_is_deep_and_replaces_lists() {
        let mut base = json!({"a": {"b": 1, "c": [1, 2]}, "d": "x"});
        merge(&mut base, json!({"a": {"c": [3], "e": true}}));
        assert_eq!(base, json!({"a": {"b": 1, "c": [3], "e": true}, "d": "x"}));
    }

    #[test]
    fn dotted_lookup() {
        let v = json!({"rabbitmq": {"service": {"port": 5672}}, "x": {"on": true}});
        assert_eq!(str_at(&v, "rabbitmq.service.port").as_deref(), Some("5672"));
        assert!(bool_at(&v, "x.on"));
        assert!(!bool_at(&v, "x.off"));
        assert!(value_at(&v, "rabbitmq.nope.port").is_none());
    }

    #[test]
    fn env_expansion() {
        let env = HashMap::from([("USER_NAME", "me"), ("TAG", "1.0")]);
        let out = expand_env("user: ${USER_NAME}\ntag: $TAG\nmissing: ${NOPE}", |k| {
            env.get(k).map(|v| v.to_string())
        });
        assert_eq!(out, "user: me\ntag: 1.0\nmissing: ");
    }

    #[test]
    fn values_file_is_expanded_and_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.yaml");
        std::fs::write(&path, "rasax:\n  tag: \"1.2.3\"\n").unwrap();
        let values = read_values_file(&path).unwrap();
        assert_eq!(str_at(&values, "rasax.tag").as_deref(), Some("1.2.3"));

        std::fs::write(&path, "").unwrap();
        assert_eq!(read_values_file(&path).unwrap(), json!({}));
    }

    #[test]
    fn local_install_uses_ingress_and_disables_nginx() {
        let opts = local(None);
        let values = opts.compose(json!({}));
        assert!(!bool_at(&values, "nginx.enabled"));
        assert!(bool_at(&values, "ingress.enabled"));
        assert_eq!(
            value_at(&values, "ingress.hosts").unwrap(),
            &json!([{"host": "bot.rasactl.localhost", "paths": ["/"]}])
        );
        assert_eq!(
            str_at(&values, "rasax.initialUser.password").as_deref(),
            Some("secret")
        );
        assert_eq!(
            str_at(&values, "rabbitmq.auth.erlangCookie").as_deref(),
            Some("cookie")
        );
        assert!(opts.needs_hosts_entry());
        assert!(value_at(&values, "rasax.extraVolumes").is_none());
    }

    #[test]
    fn project_mount_adds_volume_and_node_selection() {
        let values = local(Some("rasactl-pvc-bot")).compose(json!({}));
        assert_eq!(
            str_at(&values, "rasax.nodeSelector.rasactl-project").as_deref(),
            Some("bot")
        );
        let volumes = value_at(&values, "rasax.extraVolumes").unwrap();
        assert_eq!(
            volumes[0]["persistentVolumeClaim"]["claimName"],
            json!("rasactl-pvc-bot")
        );
    }

    #[test]
    fn cloud_vm_uses_node_port() {
        let mut opts = local(None);
        opts.cloud = true;
        let values = opts.compose(json!({}));
        assert_eq!(str_at(&values, "nginx.service.type").as_deref(), Some("NodePort"));
        assert!(bool_at(&values, "rasa.versions.rasaProduction.enabled"));
        assert!(!opts.needs_hosts_entry());
    }

    #[test]
    fn remote_backend_ignores_project_and_user_values_win() {
        let mut opts = local(Some("pvc"));
        opts.backend = BackendType::Remote;
        opts.edge_release = true;
        let values = opts.compose(json!({"rasax": {"tag": "1.0.0", "initialUser": {"password": "mine"}}}));
        assert_eq!(str_at(&values, "rasax.tag").as_deref(), Some("1.0.0"));
        assert_eq!(str_at(&values, "eventService.tag").as_deref(), Some("latest"));
        assert_eq!(
            str_at(&values, "rasax.initialUser.password").as_deref(),
            Some("mine")
        );
        assert!(value_at(&values, "ingress").is_none());
        assert!(value_at(&values, "rasax.extraVolumes").is_none());
    }

    #[test]
    fn tokens_and_masking() {
        let token = generate_token().unwrap();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(mask_secret("sk-abcdefXYZ1"), "****XYZ1");
        assert_eq!(mask_secret("abc"), "****");
    }

    #[test]
    fn written_values_file_is_yaml() {
        let file = write_values_file(&json!({"nginx": {"enabled": false}})).unwrap();
        let raw = std::fs::read_to_string(file.path()).unwrap();
        assert!(raw.contains("enabled: false"));
    }
}
