use anyhow::{Context, Result};
use semver::{Version, VersionReq};

/// Chart version installed when none is requested.
pub const DEFAULT_CHART_VERSION: &str = "4.3.1";
pub const CHART_VERSION_CONSTRAINT: &str = ">=4.3.1, <5.0.0";
pub const DOCKER_VERSION_CONSTRAINT: &str = ">=20.10.0";
/// Enterprise licensing and local project mounts need Rasa X 1.0 or newer.
pub const RASA_X_ENTERPRISE_CONSTRAINT: &str = ">=1.0.0";

/// Parse loosely formatted versions: `v1.2`, `20.10.7+dfsg1`, `1.0.0a1`.
/// Only the leading numeric `major[.minor[.patch]]` part is considered.
pub fn parse_lenient(raw: &str) -> Result<Version> {
    let trimmed = raw.trim().trim_start_matches('v');
    let numeric: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut parts = numeric
        .split('.')
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u64>());
    let major = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("invalid version '{}'", raw))?
        .with_context(|| format!("invalid version '{}'", raw))?;
    let minor = parts.next().transpose()?.unwrap_or(0);
    let patch = parts.next().transpose()?.unwrap_or(0);
    Ok(Version::new(major, minor, patch))
}

pub fn satisfies(version: &str, constraint: &str) -> Result<bool> {
    let req = VersionReq::parse(constraint)
        .with_context(|| format!("invalid version constraint '{}'", constraint))?;
    Ok(req.matches(&parse_lenient(version)?))
}

/// A requested helm chart version must fall inside the supported range.
pub fn check_chart_version(version: Option<&str>) -> Result<()> {
    let Some(version) = version.filter(|v| !v.is_empty()) else {
        return Ok(());
    };
    if !satisfies(version, CHART_VERSION_CONSTRAINT)? {
        anyhow::bail!(
            "the {} version of the rasa-x helm chart is not supported, supported versions: {}",
            version,
            CHART_VERSION_CONSTRAINT
        );
    }
    Ok(())
}

pub fn check_docker_version(version: &str) -> Result<()> {
    if version.trim().is_empty() {
        anyhow::bail!("can't determine the Docker version");
    }
    if !satisfies(version, DOCKER_VERSION_CONSTRAINT)? {
        anyhow::bail!(
            "Docker {} is not supported, the required version is {}",
            version,
            DOCKER_VERSION_CONSTRAINT
        );
    }
    Ok(())
}

pub fn supports_enterprise(rasa_x_version: &str) -> bool {
    satisfies(rasa_x_version, RASA_X_ENTERPRISE_CONSTRAINT).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_parsing() {
        assert_eq!(parse_lenient("v1.2").unwrap(), Version::new(1, 2, 0));
        assert_eq!(parse_lenient("20.10.7+dfsg1").unwrap(), Version::new(20, 10, 7));
        assert_eq!(parse_lenient("1.0.0a1").unwrap(), Version::new(1, 0, 0));
        assert_eq!(parse_lenient("1.2.3.4").unwrap(), Version::new(1, 2, 3));
        assert_eq!(parse_lenient("19.03.12").unwrap(), Version::new(19, 3, 12));
        assert!(parse_lenient("latest").is_err());
    }

    #[test]
    fn chart_version_range() {
        assert!(check_chart_version(None).is_ok());
        assert!(check_chart_version(Some("4.3.1")).is_ok());
        assert!(check_chart_version(Some("4.9.0")).is_ok());
        assert!(check_chart_version(Some("4.3.0")).is_err());
        let err = check_chart_version(Some("5.0.0")).unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn docker_version_range() {
        assert!(check_docker_version("20.10.0").is_ok());
        assert!(check_docker_version("24.0.7").is_ok());
        assert!(check_docker_version("19.03.12").is_err());
        assert!(check_docker_version("").is_err());
    }

    #[test]
    fn enterprise_requires_rasa_x_1() {
        assert!(supports_enterprise("1.0.1"));
        assert!(!supports_enterprise("0.42.6"));
        assert!(!supports_enterprise("0.0.0"));
        assert!(!supports_enterprise("garbage"));
    }
}
