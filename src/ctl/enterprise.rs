use anyhow::Result;
use colored::Colorize;

use super::RasaCtl;
use crate::api::Version;
use crate::cli::ActivateArgs;
use crate::compat;
use crate::tui;

const LICENSE_FLAG_WARNING: &str =
    "WARNING! Using the --license flag is insecure. Use the --license-stdin flag.";
const UNSUPPORTED: &str = "this command is available for Rasa X 1.0.0 or newer";

#[derive(Debug, PartialEq, Eq)]
enum LicenseChange {
    Apply,
    AlreadyActive,
}

/// The version gate comes first, then the current license state.
fn license_change(version: &Version, activate: bool) -> Result<LicenseChange> {
    if !compat::supports_enterprise(&version.rasa_x) {
        anyhow::bail!(UNSUPPORTED);
    }
    match (activate, version.enterprise) {
        (true, true) => Ok(LicenseChange::AlreadyActive),
        (false, false) => anyhow::bail!("an Enterprise license is not active"),
        _ => Ok(LicenseChange::Apply),
    }
}

impl RasaCtl {
    pub async fn enterprise_activate(&self, args: ActivateArgs) -> Result<()> {
        let version = self.rasax().await?.version().await?;
        if license_change(&version, true)? == LicenseChange::AlreadyActive {
            println!("The Enterprise license is already active.");
            return Ok(());
        }

        let rasax = self.authorized_rasax().await?;
        let license = if let Some(license) = args.license {
            eprintln!("{}", LICENSE_FLAG_WARNING.yellow());
            license
        } else if args.license_stdin {
            tui::read_stdin_secret(std::io::stdin().lock())?
        } else {
            tui::read_secret("License: ")?
        };
        let license = license.trim();
        if license.is_empty() {
            anyhow::bail!("the license can't be empty");
        }
        rasax.activate_license(license).await?;

        let version = rasax.version().await?;
        self.record_version(&version, None).await?;
        println!("The Enterprise license has been activated.");
        Ok(())
    }

    pub async fn enterprise_deactivate(&self) -> Result<()> {
        let version = self.rasax().await?.version().await?;
        license_change(&version, false)?;

        let rasax = self.authorized_rasax().await?;
        rasax.deactivate_license().await?;

        let version = rasax.version().await?;
        self.record_version(&version, None).await?;
        println!("The Enterprise license has been deactivated.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(rasa_x: &str, enterprise: bool) -> Version {
        Version {
            rasa_x: rasa_x.into(),
            enterprise,
            ..Default::default()
        }
    }

    #[test]
    fn old_releases_are_refused_before_the_license_state() {
        let err = license_change(&version("0.42.6", true), true).unwrap_err();
        assert_eq!(err.to_string(), UNSUPPORTED);
        let err = license_change(&version("0.42.6", false), false).unwrap_err();
        assert_eq!(err.to_string(), UNSUPPORTED);
    }

    #[test]
    fn license_state_on_supported_releases() {
        assert_eq!(
            license_change(&version("1.0.1", true), true).unwrap(),
            LicenseChange::AlreadyActive
        );
        assert_eq!(
            license_change(&version("1.0.1", false), true).unwrap(),
            LicenseChange::Apply
        );
        assert_eq!(
            license_change(&version("1.0.1", true), false).unwrap(),
            LicenseChange::Apply
        );
        let err = license_change(&version("1.0.1", false), false).unwrap_err();
        assert_eq!(err.to_string(), "an Enterprise license is not active");
    }
}
