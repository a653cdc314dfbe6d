use anyhow::Result;
use colored::Colorize;
use tracing::info;

use super::RasaCtl;
use crate::cli::LoginArgs;
use crate::tui;

const PASSWORD_FLAG_WARNING: &str =
    "WARNING! Using the --password flag is insecure. Use the --password-stdin flag.";

impl RasaCtl {
    pub async fn auth_login(&self, args: LoginArgs) -> Result<()> {
        let credentials = self.credentials();
        if credentials.is_logged().await {
            println!("Already logged.");
            return Ok(());
        }

        let username = match args.username {
            Some(username) => username,
            None => tui::prompt_line("Username: ")?,
        };
        let password = if let Some(password) = args.password {
            eprintln!("{}", PASSWORD_FLAG_WARNING.yellow());
            password
        } else if args.password_stdin {
            tui::read_stdin_secret(std::io::stdin().lock())?
        } else {
            tui::read_secret("Password: ")?
        };
        if username.is_empty() || password.is_empty() {
            anyhow::bail!("username and password can't be empty");
        }

        info!("getting a token");
        let rasax = self.rasax().await?;
        let token = rasax.auth(&username, &password).await?;
        credentials.save_login(&username, &password, &token).await?;

        println!();
        println!("Successfully logged.");
        Ok(())
    }

    pub async fn auth_logout(&self) -> Result<()> {
        self.credentials().logout().await?;
        info!(namespace = %self.namespace, "credentials removed");
        println!("Successfully logged out.");
        Ok(())
    }
}
