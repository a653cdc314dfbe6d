use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "rasactl",
    version,
    about = "rasactl deploys Rasa X on your local or remote Kubernetes cluster"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Config file (default is $HOME/.rasactl.yaml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Show info-level logs instead of the spinner
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Show debug-level logs
    #[arg(long, global = true)]
    pub debug: bool,

    /// Absolute path to the kubeconfig file (default is $HOME/.kube/config)
    #[arg(long, global = true, env = "RASACTL_KUBECONFIG", value_name = "PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// Name of the kubeconfig context to use
    #[arg(long, global = true, env = "RASACTL_KUBE_CONTEXT", value_name = "NAME")]
    pub kube_context: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a Rasa X deployment, installing it when it doesn't exist yet
    Start(StartArgs),

    /// Stop a running Rasa X deployment
    Stop(TargetArgs),

    /// Upgrade a Rasa X deployment
    Upgrade(UpgradeArgs),

    /// Delete a Rasa X deployment
    #[command(visible_alias = "del")]
    Delete(DeleteArgs),

    /// Show the status of a deployment
    Status(StatusArgs),

    /// List deployments managed by rasactl
    #[command(visible_alias = "ls")]
    List,

    /// Add an existing Rasa X deployment to rasactl
    Add(AddArgs),

    /// Open Rasa X in a web browser
    Open(TargetArgs),

    /// Print logs for a container in a pod
    Logs(LogsArgs),

    /// Manage Rasa X authentication
    #[command(subcommand)]
    Auth(AuthCommands),

    /// Manage models in Rasa X
    #[command(subcommand)]
    Model(ModelCommands),

    /// Manage the Rasa X Enterprise license
    #[command(subcommand)]
    Enterprise(EnterpriseCommands),

    /// Connect Rasa X to external components
    #[command(subcommand)]
    Connect(ConnectCommands),

    /// Modify the rasactl configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Deployment name (defaults to the current deployment)
    pub name: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct HelmArgs {
    /// Values file passed to the Rasa X chart
    #[arg(long, value_name = "PATH")]
    pub values_file: Option<PathBuf>,

    /// Rasa X helm chart version (default: the latest supported)
    #[arg(long, value_name = "VERSION")]
    pub rasa_x_chart_version: Option<String>,

    /// Time to wait for Kubernetes operations, e.g. 10m or 90s
    #[arg(long, default_value = "10m", value_name = "DURATION")]
    pub wait_timeout: String,
}

#[derive(Args, Debug, Clone, Default)]
pub struct StartArgs {
    /// Deployment name (a random one is generated if omitted)
    pub name: Option<String>,

    #[command(flatten)]
    pub helm: HelmArgs,

    /// Helm release name of Rasa X
    #[arg(long, default_value = "rasa-x")]
    pub rasa_x_release_name: String,

    /// Absolute path to a project directory mounted into Rasa X
    #[arg(long, value_name = "PATH")]
    pub project_path: Option<PathBuf>,

    /// Use the current working directory as the project directory
    #[arg(short = 'p', long)]
    pub project: bool,

    /// Password for the Rasa X admin user
    #[arg(long, default_value = "rasaxlocal")]
    pub rasa_x_password: String,

    /// Read the Rasa X password from stdin
    #[arg(long)]
    pub rasa_x_password_stdin: bool,

    /// Use the latest edge release of Rasa X
    #[arg(long)]
    pub rasa_x_edge_release: bool,

    /// Create a new deployment even when other deployments exist
    #[arg(long)]
    pub create: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct UpgradeArgs {
    pub name: Option<String>,

    #[command(flatten)]
    pub helm: HelmArgs,

    /// Roll back the upgrade if it fails
    #[arg(long)]
    pub atomic: bool,

    /// Reuse the values of the last release and merge any overrides
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, value_name = "BOOL")]
    pub reuse_values: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DeleteArgs {
    pub name: Option<String>,

    /// Ignore errors and delete whatever can be deleted
    #[arg(long)]
    pub force: bool,

    /// Delete the whole namespace
    #[arg(long)]
    pub prune: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Args, Debug, Clone, Default)]
pub struct StatusArgs {
    pub name: Option<String>,

    /// Show the helm release and pod details
    #[arg(short, long)]
    pub details: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// Namespace where Rasa X is already deployed
    pub namespace: String,

    /// Helm release name of Rasa X
    #[arg(long, default_value = "rasa-x")]
    pub rasa_x_release_name: String,
}

#[derive(Args, Debug, Clone, Default)]
pub struct LogsArgs {
    pub name: Option<String>,

    /// Pod to print logs for (picked interactively if omitted)
    pub pod: Option<String>,

    /// Stream the logs
    #[arg(short, long)]
    pub follow: bool,

    /// Print logs of the previous container instance
    #[arg(short, long)]
    pub previous: bool,

    /// Number of recent lines to show, -1 for all
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub tail: i64,

    /// Container name
    #[arg(short, long)]
    pub container: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Log in to Rasa X
    Login(LoginArgs),
    /// Log out from Rasa X
    Logout(TargetArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct LoginArgs {
    pub name: Option<String>,

    #[arg(short, long)]
    pub username: Option<String>,

    #[arg(short, long)]
    pub password: Option<String>,

    /// Read the password from stdin
    #[arg(long)]
    pub password_stdin: bool,
}

#[derive(Subcommand, Debug)]
pub enum ModelCommands {
    /// Upload a model to Rasa X
    Upload {
        /// Deployment name followed by the model file, or just the model file
        #[arg(num_args = 1..=2, required = true)]
        args: Vec<String>,
    },
    /// Download a model from Rasa X
    Download {
        /// [NAME] MODEL [DESTINATION]
        #[arg(num_args = 1..=3, required = true)]
        args: Vec<String>,
    },
    /// Tag a model
    Tag {
        /// [NAME] MODEL TAG
        #[arg(num_args = 2..=3, required = true)]
        args: Vec<String>,
    },
    /// Delete a model
    Delete {
        /// [NAME] MODEL
        #[arg(num_args = 1..=2, required = true)]
        args: Vec<String>,
    },
    /// List models
    #[command(visible_alias = "ls")]
    List(TargetArgs),
}

#[derive(Subcommand, Debug)]
pub enum EnterpriseCommands {
    /// Activate an Enterprise license
    Activate(ActivateArgs),
    /// Deactivate the Enterprise license
    Deactivate(TargetArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ActivateArgs {
    pub name: Option<String>,

    /// License key
    #[arg(short, long)]
    pub license: Option<String>,

    /// Read the license from stdin
    #[arg(long)]
    pub license_stdin: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConnectCommands {
    /// Run a local Rasa server connected to Rasa X
    Rasa(ConnectRasaArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ConnectRasaArgs {
    pub name: Option<String>,

    /// Port the Rasa server listens on
    #[arg(short, long, default_value_t = 5005)]
    pub port: u16,

    /// Run a separate Rasa server for the worker environment
    #[arg(long)]
    pub run_separate_worker: bool,

    /// Extra arguments for `rasa run`
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub extra_args: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Set the current deployment
    UseDeployment(UseDeploymentArgs),
}

#[derive(Args, Debug, Clone)]
pub struct UseDeploymentArgs {
    pub name: String,

    /// Create the config file if it doesn't exist
    #[arg(long)]
    pub create_file: bool,
}

/// Split positional model arguments into an optional deployment name and the rest.
/// `expected` is the number of arguments the command needs besides the name.
pub fn split_target(args: &[String], expected: usize) -> (Option<String>, Vec<String>) {
    if args.len() > expected {
        (Some(args[0].clone()), args[1..].to_vec())
    } else {
        (None, args.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn start_defaults() {
        let cli = Cli::parse_from(["rasactl", "start"]);
        match cli.command {
            Commands::Start(args) => {
                assert_eq!(args.rasa_x_release_name, "rasa-x");
                assert_eq!(args.rasa_x_password, "rasaxlocal");
                assert_eq!(args.helm.wait_timeout, "10m");
                assert!(args.name.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn upgrade_reuse_values_can_be_disabled() {
        let cli = Cli::parse_from(["rasactl", "upgrade", "bot", "--reuse-values", "false"]);
        match cli.command {
            Commands::Upgrade(args) => {
                assert!(!args.reuse_values);
                assert_eq!(args.name.as_deref(), Some("bot"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn logs_tail_accepts_negative() {
        let cli = Cli::parse_from(["rasactl", "logs", "--tail", "-1"]);
        match cli.command {
            Commands::Logs(args) => assert_eq!(args.tail, -1),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn connect_extra_args_split_on_comma() {
        let cli = Cli::parse_from([
            "rasactl",
            "connect",
            "rasa",
            "--extra-args",
            "--debug,--cors=*",
        ]);
        match cli.command {
            Commands::Connect(ConnectCommands::Rasa(args)) => {
                assert_eq!(args.port, 5005);
                assert_eq!(args.extra_args, vec!["--debug", "--cors=*"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn split_target_detects_deployment_name() {
        let args = vec!["bot".to_string(), "model.tar.gz".to_string()];
        assert_eq!(
            split_target(&args, 1),
            (Some("bot".into()), vec!["model.tar.gz".to_string()])
        );
        assert_eq!(split_target(&args[1..], 1), (None, vec!["model.tar.gz".to_string()]));
    }
}
