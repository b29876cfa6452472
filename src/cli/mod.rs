pub mod account;
pub mod config;
pub mod stats;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use crate::api::ApiClient;
use crate::models::config::load_config;
use crate::models::{AuthMode, ClientConfig, Credentials};
use crate::storage::JsonProfileStorage;

/// AutoApply - drive the job application backend from the terminal
#[derive(Parser, Debug)]
#[command(
    name = "autoapply",
    version,
    about = "AutoApply - drive the job application backend from the terminal"
)]
pub struct Cli {
    /// Backend base URL (overrides config)
    #[arg(long = "api-url", global = true)]
    pub api_url: Option<String>,

    /// Authentication mode (overrides config)
    #[arg(long, value_enum, global = true)]
    pub mode: Option<AuthMode>,

    /// Path to configuration file
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Account email
    #[arg(long, global = true)]
    pub email: Option<String>,

    /// Account password
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in and cache a session token (cached-token mode)
    Login,

    /// Forget the cached session token
    Logout,

    /// Show backend and authentication status
    Status,

    /// Show or change the search configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },

    /// Start an application session
    Start,

    /// Show basic application statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the statistics dashboard
    Dashboard {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete all stored data for the account
    Clear {
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the saved configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Change the configuration and save it
    Set(ConfigSetArgs),
}

#[derive(Args, Debug, Default, Clone, PartialEq)]
pub struct ConfigSetArgs {
    /// Search term (repeat to set several; replaces the list)
    #[arg(short = 't', long = "term")]
    pub terms: Vec<String>,

    /// Excluded keyword (repeat to set several; replaces the list)
    #[arg(short = 'x', long = "exclude")]
    pub excludes: Vec<String>,

    /// Contract type: permanent, contractor, fixed-term, apprenticeship, internship
    #[arg(long = "contract")]
    pub contracts: Vec<String>,

    /// Remote type: partial, full, none
    #[arg(long = "remote")]
    pub remotes: Vec<String>,

    /// Publication timeframe: less_than_24_hours, less_than_7_days,
    /// less_than_14_days, less_than_30_days
    #[arg(long)]
    pub timeframe: Option<String>,

    /// Application message sent with each application
    #[arg(short = 'm', long)]
    pub message: Option<String>,

    /// Maximum applications per session (1-1000)
    #[arg(long)]
    pub max: Option<u32>,

    /// Delay between applications in seconds (1-60)
    #[arg(long)]
    pub delay: Option<u32>,
}

/// Resolved configuration, client and identity for one command.
pub struct Context {
    pub config: ClientConfig,
    pub client: Arc<ApiClient>,
    pub credentials: Option<Credentials>,
}

/// Build credentials from `--email` / `--password`. Both or neither.
pub fn credentials_from_flags(
    email: Option<&str>,
    password: Option<&str>,
) -> anyhow::Result<Option<Credentials>> {
    match (email, password) {
        (None, None) => Ok(None),
        (Some(email), Some(password)) => {
            let credentials = Credentials::new(email.trim(), password);
            credentials.validate()?;
            Ok(Some(credentials))
        }
        (Some(_), None) => anyhow::bail!("--password is required with --email"),
        (None, Some(_)) => anyhow::bail!("--email is required with --password"),
    }
}

/// Load config, apply flag overrides, and build the API client.
pub async fn connect(cli: &Cli) -> anyhow::Result<Context> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(api_url) = &cli.api_url {
        config.api_url = api_url.clone();
    }
    if let Some(mode) = cli.mode {
        config.auth_mode = mode;
    }
    tracing::debug!("Using backend {} in {:?} mode", config.api_url, config.auth_mode);

    let credentials = credentials_from_flags(cli.email.as_deref(), cli.password.as_deref())?;
    let storage = JsonProfileStorage::new(config.resolve_profile_dir()).await?;
    let client = ApiClient::new(&config, Arc::new(storage))?;

    Ok(Context {
        config,
        client: Arc::new(client),
        credentials,
    })
}

impl Context {
    /// Make sure requests will carry an identity: explicit credentials win,
    /// otherwise a cached token is resumed.
    pub async fn ensure_authenticated(&self) -> anyhow::Result<()> {
        if let Some(credentials) = &self.credentials {
            self.client.authenticate(credentials).await?;
            return Ok(());
        }
        match self.client.mode() {
            AuthMode::CredentialPerCall => {
                anyhow::bail!("Credentials required: pass --email and --password")
            }
            AuthMode::CachedToken => {
                if !self.client.resume().await? {
                    anyhow::bail!("Not logged in (try: autoapply login)");
                }
                Ok(())
            }
        }
    }
}

/// Dispatch the CLI command to the appropriate handler.
pub async fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    let Some(command) = &cli.command else {
        // No subcommand provided -- print help
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let ctx = connect(cli).await?;
    match command {
        Commands::Login => account::cmd_login(&ctx).await,
        Commands::Logout => account::cmd_logout(&ctx).await,
        Commands::Status => account::cmd_status(&ctx).await,
        Commands::Config { action } => match action {
            ConfigCommand::Show { json } => config::cmd_show(&ctx, *json).await,
            ConfigCommand::Set(args) => config::cmd_set(&ctx, args).await,
        },
        Commands::Start => account::cmd_start(&ctx).await,
        Commands::Stats { json } => stats::cmd_stats(&ctx, *json).await,
        Commands::Dashboard { json } => stats::cmd_dashboard(&ctx, *json).await,
        Commands::Clear { yes } => account::cmd_clear(&ctx, *yes).await,
    }
}
