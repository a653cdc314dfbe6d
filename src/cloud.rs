use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const DMI_ROOT: &str = "/sys/class/dmi/id";
const METADATA_TIMEOUT: Duration = Duration::from_secs(20);
const ANY_ADDRESS: &str = "0.0.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudName {
    Google,
    Amazon,
    Azure,
    Alibaba,
    Oracle,
    DigitalOcean,
    Unknown,
}

impl CloudName {
    /// DMI file and marker substring identifying each provider, in detection order.
    const SIGNATURES: [(CloudName, &'static str, &'static str); 6] = [
        (CloudName::Google, "product_name", "Google"),
        (CloudName::Amazon, "product_version", "amazon"),
        (CloudName::Azure, "sys_vendor", "Microsoft Corporation"),
        (CloudName::Alibaba, "product_name", "Alibaba Cloud"),
        (CloudName::Oracle, "chassis_asset_tag", "OracleCloud"),
        (CloudName::DigitalOcean, "sys_vendor", "DigitalOcean"),
    ];

    fn metadata_endpoint(&self) -> Option<(&'static str, Option<(&'static str, &'static str)>)> {
        match self {
            CloudName::Google => Some((
                "http://169.254.169.254/computeMetadata/v1/instance/network-interfaces/0/access-configs/0/external-ip",
                Some(("Metadata-Flavor", "Google")),
            )),
            CloudName::Amazon => Some(("http://169.254.169.254/latest/meta-data/public-ipv4", None)),
            CloudName::Azure => Some((
                "http://169.254.169.254/metadata/instance/network/interface/0/ipv4/ipAddress/0/publicIpAddress?api-version=2017-08-01&format=text",
                Some(("Metadata", "true")),
            )),
            CloudName::Alibaba => Some(("http://100.100.100.200/latest/meta-data/eipv4", None)),
            CloudName::DigitalOcean => Some((
                "http://169.254.169.254/metadata/v1/interfaces/public/0/ipv4/address",
                None,
            )),
            CloudName::Oracle | CloudName::Unknown => None,
        }
    }
}

/// Cloud provider of the machine rasactl runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudProvider {
    pub name: CloudName,
    pub external_ip: String,
}

impl Default for CloudProvider {
    fn default() -> Self {
        Self {
            name: CloudName::Unknown,
            external_ip: ANY_ADDRESS.into(),
        }
    }
}

impl CloudProvider {
    pub fn is_known(&self) -> bool {
        self.name != CloudName::Unknown
    }

    /// Detect the provider and fetch its external IP from the metadata service.
    pub async fn detect() -> Self {
        let name = detect_name(Path::new(DMI_ROOT));
        let external_ip = match name.metadata_endpoint() {
            Some((url, header)) => external_ip(url, header).await,
            None => ANY_ADDRESS.into(),
        };
        info!(provider = ?name, %external_ip, "detected cloud provider");
        Self { name, external_ip }
    }
}

pub fn detect_name(dmi_root: &Path) -> CloudName {
    for (name, file, marker) in CloudName::SIGNATURES {
        let path: PathBuf = dmi_root.join(file);
        if let Ok(data) = std::fs::read_to_string(&path) {
            if data.contains(marker) {
                return name;
            }
        }
    }
    CloudName::Unknown
}

/// External IP reported by the metadata service, `0.0.0.0` when it can't be read.
async fn external_ip(url: &str, header: Option<(&str, &str)>) -> String {
    fetch_external_ip(url, header)
        .await
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| ANY_ADDRESS.into())
}

async fn fetch_external_ip(url: &str, header: Option<(&str, &str)>) -> Option<String> {
    let client = reqwest::Client::builder()
        .timeout(METADATA_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .ok()?;
    let mut req = client.get(url);
    if let Some((key, value)) = header {
        req = req.header(key, value);
    }
    match req.send().await {
        Ok(resp) if resp.status().is_success() => resp.text().await.ok().map(|t| t.trim().to_string()),
        Ok(resp) => {
            debug!(status = %resp.status(), url, "metadata service refused the request");
            None
        }
        Err(e) => {
            debug!(error = %e, url, "metadata service unreachable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_provider_from_dmi_files() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_name(dir.path()), CloudName::Unknown);

        std::fs::write(dir.path().join("product_version"), "4.11.amazon\n").unwrap();
        assert_eq!(detect_name(dir.path()), CloudName::Amazon);

        std::fs::write(dir.path().join("product_name"), "Google Compute Engine\n").unwrap();
        assert_eq!(detect_name(dir.path()), CloudName::Google);
    }

    #[test]
    fn oracle_and_digital_ocean() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("chassis_asset_tag"), "OracleCloud.com").unwrap();
        assert_eq!(detect_name(dir.path()), CloudName::Oracle);
        assert!(CloudName::Oracle.metadata_endpoint().is_none());

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sys_vendor"), "DigitalOcean").unwrap();
        assert_eq!(detect_name(dir.path()), CloudName::DigitalOcean);
    }

    #[tokio::test]
    async fn external_ip_from_the_metadata_service() {
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ip"))
            .and(header("Metadata", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_string("203.0.113.7\n"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/empty"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let url = |p: &str| format!("{}{}", server.uri(), p);
        assert_eq!(external_ip(&url("/ip"), Some(("Metadata", "true"))).await, "203.0.113.7");
        assert_eq!(external_ip(&url("/broken"), None).await, "0.0.0.0");
        assert_eq!(external_ip(&url("/empty"), None).await, "0.0.0.0");
    }

    #[test]
    fn default_is_unknown() {
        let cloud = CloudProvider::default();
        assert!(!cloud.is_known());
        assert_eq!(cloud.external_ip, "0.0.0.0");
    }
}
