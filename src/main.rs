use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rakumon::config::PortalConfig;
use rakumon::credentials::{CredentialStore, Credentials, FileCredentialStore};
use rakumon::engine::UsageEngine;
use rakumon::progress::ProgressSender;
use rakumon::scheduler::{DirectFactory, Monitor, TransportFactory};
use rakumon::store::{JsonFileStore, ReadingStore};

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    rakumon::duration::parse_duration(s).map_err(|e| e.to_string())
}

#[derive(Parser)]
#[command(name = "rakumon")]
#[command(about = "Data-usage monitor for the Rakuten Mobile portal")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store portal credentials for later fetches
    Login {
        /// Rakuten ID (prompted for when omitted)
        #[arg(long)]
        identifier: Option<String>,
    },
    /// Log in and print the current usage figure once
    Fetch {
        #[arg(long, value_enum, default_value_t = TransportKind::default())]
        transport: TransportKind,
    },
    /// Fetch on an interval, persisting each reading
    Watch {
        /// Time between fetches (e.g. "30m", "1h")
        #[arg(long, default_value = "30m", value_parser = parse_duration_arg)]
        interval: Duration,

        #[arg(long, value_enum, default_value_t = TransportKind::default())]
        transport: TransportKind,
    },
    /// Print the most recently stored reading
    Latest,
    /// Delete stored credentials
    Clear,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TransportKind {
    /// Plain HTTP with manual redirect and cookie handling
    Direct,
    /// Headless Chrome over the DevTools protocol
    #[cfg(feature = "browser")]
    Browser,
}

impl Default for TransportKind {
    fn default() -> Self {
        #[cfg(feature = "browser")]
        {
            TransportKind::Browser
        }
        #[cfg(not(feature = "browser"))]
        {
            TransportKind::Direct
        }
    }
}

fn build_factory(kind: TransportKind, config: &PortalConfig) -> Arc<dyn TransportFactory> {
    match kind {
        TransportKind::Direct => Arc::new(DirectFactory::new(config.clone())),
        #[cfg(feature = "browser")]
        TransportKind::Browser => Arc::new(rakumon::scheduler::BrowserFactory::new(config.clone())),
    }
}

/// Cancelled on Ctrl-C so in-flight fetches can release the renderer.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    cancel
}

fn prompt_credentials(identifier: Option<String>) -> Result<Credentials> {
    use dialoguer::theme::ColorfulTheme;
    use dialoguer::{Input, Password};

    let theme = ColorfulTheme::default();
    let identifier = match identifier {
        Some(id) => id,
        None => Input::with_theme(&theme)
            .with_prompt("Rakuten ID")
            .interact_text()
            .context("Failed to read Rakuten ID")?,
    };
    let secret: String = Password::with_theme(&theme)
        .with_prompt("Password")
        .interact()
        .context("Failed to read password")?;

    Ok(Credentials::new(identifier, secret))
}

async fn fetch_once(
    config: PortalConfig,
    kind: TransportKind,
    credentials: &Credentials,
) -> Result<()> {
    let engine = UsageEngine::new(config.clone());
    let (progress, mut events) = ProgressSender::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            eprintln!("{}", event.message);
        }
    });

    let transport = build_factory(kind, &config).create().await?;
    let cancel = cancel_on_ctrl_c();
    let report = engine
        .fetch_usage(transport.as_ref(), credentials, &progress, &cancel)
        .await;
    drop(progress);
    let _ = printer.await;

    match report.outcome {
        rakumon::outcome::Outcome::Success(reading) => {
            println!("{:.1} GB", reading.gigabytes);
            Ok(())
        }
        other => anyhow::bail!("fetch failed after {} attempts: {:?}", report.attempts, other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
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
                .with_level(true),
        )
        .init();

    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => PortalConfig::default_path()?,
    };
    let config = PortalConfig::load(&config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;

    let credentials = FileCredentialStore::new()?;

    match cli.command {
        Command::Login { identifier } => {
            let creds = prompt_credentials(identifier)?;
            credentials.set(&creds).await?;
            println!("Credentials stored for {}.", creds.identifier);
        }
        Command::Fetch { transport } => {
            let creds = credentials
                .get()
                .await?
                .context("No stored credentials; run `rakumon login` first")?;
            fetch_once(config, transport, &creds).await?;
        }
        Command::Watch {
            interval,
            transport,
        } => {
            let factory = build_factory(transport, &config);
            let readings = Arc::new(JsonFileStore::new()?);
            let monitor = Monitor::new(config, Arc::new(credentials), readings, factory);
            let cancel = cancel_on_ctrl_c();
            monitor.run(interval, &cancel).await?;
        }
        Command::Latest => {
            let readings = JsonFileStore::new()?;
            match readings.latest().await? {
                Some(reading) => {
                    println!("{:.1} GB (fetched {})", reading.gigabytes, reading.fetched_at)
                }
                None => println!("No readings stored yet."),
            }
        }
        Command::Clear => {
            credentials.clear().await?;
            println!("Credentials cleared.");
        }
    }

    Ok(())
}
