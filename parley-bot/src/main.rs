//! Parley CLI - conversational session engine
//!
//! Runs the demo conversation on Telegram or in the terminal and manages
//! the configuration file.

#![allow(clippy::print_stdout)] // CLI program intentionally uses stdout

mod demo;

use clap::{Args, Parser, Subcommand};
use demo::DemoApp;
use parley_bot::config::{CONFIG_ENV, IssueLevel, TOKEN_ENV};
use parley_bot::error::{BotError, DisplayError, ErrorContext, Result};
use parley_bot::prelude::*;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Parley - conversational session engine for chat bots
#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = CONFIG_ENV, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init(InitArgs),

    /// Run the bot until Ctrl+C
    Run(RunArgs),

    /// Show configuration, users and stored sessions
    Status,

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the init command
#[derive(Args)]
struct InitArgs {
    /// Force overwrite existing configuration
    #[arg(short, long)]
    force: bool,
}

/// Arguments for the run command
#[derive(Args)]
struct RunArgs {
    /// Talk through the terminal instead of Telegram
    #[arg(long)]
    cli: bool,

    /// Open the accept window at startup
    #[arg(long)]
    accept: bool,

    /// Prompt shown by the terminal transport
    #[arg(short, long, default_value = "> ")]
    prompt: String,
}

/// Arguments for the config command
#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Show configuration file path
    Path,
    /// Validate configuration
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");

    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", DisplayError(&e));
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with the given verbosity level.
///
/// Logs go to stderr so the terminal transport keeps stdout to itself.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "parley_bot={level},parley={level},{}",
            if verbosity >= 2 { "debug" } else { "warn" }
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let config_file = cli.config.unwrap_or_else(config_path);
    match cli.command {
        Commands::Init(args) => cmd_init(args, &config_file).await,
        Commands::Run(args) => cmd_run(args, &config_file).await,
        Commands::Status => cmd_status(&config_file).await,
        Commands::Config(args) => cmd_config(args, &config_file).await,
    }
}

/// Initialize configuration.
async fn cmd_init(args: InitArgs, config_file: &Path) -> Result<()> {
    if config_file.exists() && !args.force {
        println!("Configuration already exists at: {}", config_file.display());
        println!("Use --force to overwrite.");
        return Ok(());
    }

    let config = init_config(config_file, args.force)
        .await
        .context("failed to initialize config")?;

    println!("Configuration created: {}", config_file.display());
    println!("Data directory:        {}", config.storage.data_dir.display());
    println!();
    println!("Next steps:");
    println!("  1. export {TOKEN_ENV}=<token>");
    println!("  2. set telegram.enabled to true");
    println!("  3. parley run --accept");

    Ok(())
}

/// Build the engine and run it until Ctrl+C or end of input.
async fn cmd_run(args: RunArgs, config_file: &Path) -> Result<()> {
    let config = load_config_from(config_file).await?;
    for issue in config.validate() {
        if issue.level == IssueLevel::Warning {
            tracing::warn!("{issue}");
        }
    }
    config.ensure_valid()?;

    let users_path = config.storage.users_path();
    let directory = Arc::new(
        FileUserDirectory::open(&users_path)
            .await
            .with_context(|| format!("failed to open {}", users_path.display()))?,
    );
    let users: Arc<dyn UserDirectory> = directory;
    let store = Arc::new(FileSessionStore::<DemoApp>::new(config.storage.sessions_dir()));

    let (transport, cli): (Arc<dyn Transport>, Option<Arc<CliTransport>>) =
        if args.cli || !config.telegram.enabled {
            let cli_config = CliTransportConfig::new().prompt(args.prompt);
            // the local operator is always admitted
            users
                .register(UserId(cli_config.user_id), &cli_config.display_name)
                .await?;
            let cli = Arc::new(CliTransport::with_config(cli_config));
            let transport: Arc<dyn Transport> = Arc::<CliTransport>::clone(&cli);
            (transport, Some(cli))
        } else {
            (telegram_transport(&config)?, None)
        };

    let engine = Engine::builder()
        .transport(transport)
        .users(Arc::clone(&users))
        .store(store)
        .root(demo::root())
        .admin(demo::admin(Arc::clone(&users)))
        .app_factory(|_, _| DemoApp::default())
        .settings(EngineSettings::from(&config.engine))
        .build()?;

    if args.accept {
        engine.open_accept_window(None);
    }

    let on_signal = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nShutting down...");
            on_signal.shutdown();
        }
    });
    if let Some(cli) = cli {
        let on_close = engine.clone();
        tokio::spawn(async move {
            cli.closed().await;
            on_close.shutdown();
        });
    } else {
        println!("Bot running. Press Ctrl+C to stop.\n");
    }

    engine.run().await
}

#[cfg(feature = "telegram")]
fn telegram_transport(config: &BotConfig) -> Result<Arc<dyn Transport>> {
    let token = config
        .telegram
        .resolve_token()
        .ok_or_else(|| BotError::config(format!("no Telegram token, set {TOKEN_ENV}")))?;
    Ok(Arc::new(TelegramTransport::new(TelegramTransportConfig::new(
        token,
    ))))
}

#[cfg(not(feature = "telegram"))]
fn telegram_transport(_config: &BotConfig) -> Result<Arc<dyn Transport>> {
    Err(BotError::config(
        "built without the telegram feature, use --cli",
    ))
}

/// Show status.
async fn cmd_status(config_file: &Path) -> Result<()> {
    println!("Parley Status\n");

    println!("Configuration:");
    println!("  Path:   {}", config_file.display());
    println!(
        "  Exists: {}",
        if config_file.exists() { "yes" } else { "no" }
    );

    let config = match load_config_from(config_file).await {
        Ok(config) => {
            println!("  Valid:  yes");
            config
        }
        Err(e) => {
            println!("  Valid:  no ({e})");
            return Ok(());
        }
    };

    println!();
    println!("Transport:");
    println!(
        "  Telegram: {}",
        if config.telegram.enabled {
            "enabled"
        } else {
            "disabled (terminal)"
        }
    );

    println!();
    println!("Engine:");
    println!("  Accept window:  {}s", config.engine.accept_window_secs);
    println!("  Persist every:  {}s", config.engine.persist_interval_secs);
    println!("  Reactivate:     {} days", config.engine.reactivate_within_days);

    println!();
    println!("Data ({}):", config.storage.data_dir.display());
    match FileUserDirectory::open(config.storage.users_path()).await {
        Ok(directory) => println!("  Known users:     {}", directory.list().await?.len()),
        Err(e) => println!("  Known users:     unreadable ({e})"),
    }
    let store = FileSessionStore::<DemoApp>::new(config.storage.sessions_dir());
    match store.load_all().await {
        Ok(sessions) => println!("  Stored sessions: {}", sessions.len()),
        Err(e) => println!("  Stored sessions: unreadable ({e})"),
    }

    println!();
    println!("Environment:");
    print_env_status(TOKEN_ENV);
    print_env_status(CONFIG_ENV);

    Ok(())
}

/// Configuration management.
async fn cmd_config(args: ConfigArgs, config_file: &Path) -> Result<()> {
    match args.command {
        ConfigCommands::Path => {
            println!("{}", config_file.display());
        }
        ConfigCommands::Show => {
            let config = load_config_from(config_file).await?;
            if !config_file.exists() {
                println!("# {} does not exist, showing defaults", config_file.display());
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Validate => {
            let config = match load_config_from(config_file).await {
                Ok(config) => config,
                Err(e) => {
                    println!("error: {e}");
                    return Ok(());
                }
            };
            let issues = config.validate();
            if issues.is_empty() {
                println!("Configuration is valid");
            }
            for issue in issues {
                println!("{issue}");
            }
        }
    }

    Ok(())
}

/// Print environment variable status.
fn print_env_status(name: &str) {
    let status = if std::env::var(name).is_ok() {
        "set"
    } else {
        "-"
    };
    println!("  {name}: {status}");
}
