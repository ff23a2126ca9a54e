use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use moneydigest::config::{default_config_path, ResolvedConfig};
use moneydigest::credentials::{Credentials, EnvCredentialStore};
use moneydigest::extract::{extract_accounts, extract_expense};
use moneydigest::notes::NotionNotes;
use moneydigest::notify::{LineNotifier, LogNotifier, Notifier};
use moneydigest::runner::{login_with_chrome, notify_failure, Runner};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "moneydigest")]
#[command(about = "Daily balance digest from the aggregation portal")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Log in, scrape balances, update the baseline and send the report (default)
    Run,
    /// Log in and refresh the saved cookie jar
    Login,
    /// Parse a saved home page and print the account tree as JSON
    ParseAccounts { file: PathBuf },
    /// Parse a saved cash-flow summary page and print the expense
    ParseExpense { file: PathBuf },
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "info,chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off",
            )
        }))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .json(),
        )
        .init();

    if let Err(err) = dotenv::dotenv() {
        tracing::debug!(error = %err, "No .env file loaded");
    }

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "Failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(dispatch(cli.command.unwrap_or(Command::Run), &config_path)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "moneydigest failed");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Command, config_path: &Path) -> Result<()> {
    match command {
        Command::Config => {
            let config = ResolvedConfig::load_or_default(config_path)?;
            println!("Config file: {}", config_path.display());
            println!("Data directory: {}", config.data_dir.display());
            println!("Cookie file: {}", config.cookie_file.display());
            println!("Debug directory: {}", config.debug_dir.display());
            println!("Baseline pointer: {}", config.baseline.pointer_file.display());
            println!("Portal: {}", config.portal.base_url);
            Ok(())
        }
        Command::ParseAccounts { file } => {
            let markup = read_markup(&file)?;
            let extraction = extract_accounts(&markup)?;
            for warning in &extraction.warnings {
                tracing::warn!(?warning, "Extraction warning");
            }
            println!("{}", serde_json::to_string_pretty(&extraction.tree)?);
            Ok(())
        }
        Command::ParseExpense { file } => {
            let markup = read_markup(&file)?;
            println!("{}", extract_expense(&markup)?);
            Ok(())
        }
        Command::Login => {
            let config = ResolvedConfig::load_or_default(config_path)?;
            let store = EnvCredentialStore::new();
            let credentials = Credentials::load(&store).await?;
            let state = login_with_chrome(&config, &credentials).await?;
            println!("Login state: {state:?}");
            Ok(())
        }
        Command::Run => run(config_path).await,
    }
}

async fn run(config_path: &Path) -> Result<()> {
    let config = ResolvedConfig::load_or_default(config_path)?;
    let store = EnvCredentialStore::new();

    let notifier: Box<dyn Notifier> = match LineNotifier::from_credentials(&store).await? {
        Some(line) => Box::new(line),
        None => {
            tracing::warn!("LINE_ACCESS_TOKEN not set; the report will only be logged");
            Box::new(LogNotifier)
        }
    };

    let setup = async {
        let credentials = Credentials::load(&store).await?;
        let notes = NotionNotes::from_credentials(&store).await?;
        anyhow::Ok((credentials, notes))
    };
    let (credentials, notes) = match setup.await {
        Ok(parts) => parts,
        Err(err) => {
            notify_failure(notifier.as_ref(), &err).await;
            return Err(err);
        }
    };

    let runner = Runner::new(&config, &credentials, &notes, notifier.as_ref());
    match runner.run_with_chrome().await {
        Ok(report) => {
            tracing::info!(
                net_balance = report.summary.net_balance,
                expense = report.expense,
                "Run finished"
            );
            Ok(())
        }
        Err(err) => {
            runner.report_failure(&err).await;
            Err(err)
        }
    }
}

fn read_markup(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
