//! socialconnector CLI entry point.
//!
//! Provides `providers`, `send`, `health` and `listen` subcommands over the
//! built-in adapters, configured from `~/.socialconnector/config.toml` and
//! `~/.socialconnector/.env`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use socialconnector::config::{config_dir, load_config, load_config_or_default, Config};
use socialconnector::credentials::{load_credentials, load_default_credentials, Credentials};
use socialconnector::logging::{self, LogSink};
use socialconnector::middleware::{LoggingMiddleware, RetryMiddleware, ValidationMiddleware};
use socialconnector::models::{Event, EventType, Media, MediaKind};
use socialconnector::{Connector, EventSelector, ProviderRegistry};

/// Unified messaging client for the command line.
#[derive(Parser)]
#[command(name = "socialconnector", version, about)]
struct Cli {
    /// Config file (default: ~/.socialconnector/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Credentials file (default: ~/.socialconnector/.env).
    #[arg(long, global = true)]
    env: Option<PathBuf>,

    /// Write rotating JSON logs to this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// List registered providers and the credentials they need.
    Providers,
    /// Send a text or media message.
    Send {
        /// Provider name.
        #[arg(long, short)]
        provider: String,
        /// Target chat id.
        #[arg(long, short)]
        chat: String,
        /// Message text (used as caption when sending media).
        text: Option<String>,
        /// Message id to reply to.
        #[arg(long)]
        reply_to: Option<String>,
        /// Attach media from a URL.
        #[arg(long)]
        media_url: Option<String>,
        /// Kind of the attached media.
        #[arg(long, value_enum, default_value_t = MediaArg::Image)]
        media_kind: MediaArg,
    },
    /// Check provider health.
    Health {
        /// Provider names (default: every provider in the config file).
        providers: Vec<String>,
    },
    /// Connect, poll and print inbound events as JSON lines until Ctrl-C.
    Listen {
        /// Provider name.
        #[arg(long, short)]
        provider: String,
        /// Only print these event types (default: all).
        #[arg(long = "event", value_enum)]
        events: Vec<EventArg>,
    },
}

/// Media kinds accepted on the command line.
#[derive(Clone, Copy, ValueEnum)]
enum MediaArg {
    /// Photo.
    Image,
    /// Video clip.
    Video,
    /// Audio track.
    Audio,
    /// Generic file.
    Document,
    /// Sticker.
    Sticker,
    /// Voice note.
    Voice,
    /// GIF or silent video.
    Animation,
}

impl From<MediaArg> for MediaKind {
    fn from(arg: MediaArg) -> Self {
        match arg {
            MediaArg::Image => Self::Image,
            MediaArg::Video => Self::Video,
            MediaArg::Audio => Self::Audio,
            MediaArg::Document => Self::Document,
            MediaArg::Sticker => Self::Sticker,
            MediaArg::Voice => Self::Voice,
            MediaArg::Animation => Self::Animation,
        }
    }
}

/// Event types accepted by `listen --event`.
#[derive(Clone, Copy, ValueEnum)]
enum EventArg {
    /// New inbound message.
    MessageReceived,
    /// Message edited.
    MessageEdited,
    /// Message deleted.
    MessageDeleted,
    /// Reaction added.
    ReactionAdded,
    /// Reaction removed.
    ReactionRemoved,
    /// Member joined a chat.
    UserJoined,
    /// Member left a chat.
    UserLeft,
    /// Someone is typing.
    Typing,
    /// Platform-specific event.
    Custom,
}

impl From<EventArg> for EventType {
    fn from(arg: EventArg) -> Self {
        match arg {
            EventArg::MessageReceived => Self::MessageReceived,
            EventArg::MessageEdited => Self::MessageEdited,
            EventArg::MessageDeleted => Self::MessageDeleted,
            EventArg::ReactionAdded => Self::ReactionAdded,
            EventArg::ReactionRemoved => Self::ReactionRemoved,
            EventArg::UserJoined => Self::UserJoined,
            EventArg::UserLeft => Self::UserLeft,
            EventArg::Typing => Self::Typing,
            EventArg::Custom => Self::Custom,
        }
    }
}

/// Loaded configuration and credentials.
struct Runtime {
    config: Config,
    credentials: Credentials,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let runtime = load_runtime(&cli)?;

    let log_dir = cli.log_dir.clone().or_else(|| runtime.config.logging.dir.clone());
    let sink = LogSink::select(matches!(cli.command, Command::Listen { .. }), log_dir);
    let _logging_guard = logging::install(&sink, &runtime.config.logging.level)?;

    match cli.command {
        Command::Providers => handle_providers(),
        Command::Send {
            provider,
            chat,
            text,
            reply_to,
            media_url,
            media_kind,
        } => {
            let media = media_url.map(|url| Media::from_url(media_kind.into(), url));
            handle_send(&runtime, &provider, &chat, text, reply_to, media).await
        }
        Command::Health { providers } => handle_health(&runtime, providers).await,
        Command::Listen { provider, events } => handle_listen(&runtime, &provider, events).await,
    }
}

fn load_runtime(cli: &Cli) -> anyhow::Result<Runtime> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_config_or_default(&config_dir()?.join("config.toml"))?,
    };
    let credentials = match &cli.env {
        Some(path) => load_credentials(path)?,
        None => load_default_credentials()?,
    };
    Ok(Runtime {
        config,
        credentials,
    })
}

/// Build a connector for `provider` with the standard outbound middleware.
fn build_connector(runtime: &Runtime, provider: &str) -> anyhow::Result<Connector> {
    let adapter_config = runtime
        .config
        .adapter_config(provider, &runtime.credentials)?;
    let infra = runtime.config.resilience.shared_infra()?;

    let mut builder = Connector::builder(provider)
        .config(adapter_config)
        .shared_infra(infra)
        .middleware(LoggingMiddleware)
        .middleware(ValidationMiddleware::default());
    if runtime.config.retry.enabled {
        builder = builder.middleware(RetryMiddleware::new(runtime.config.retry.policy()));
    }
    builder
        .build()
        .with_context(|| format!("failed to build connector for '{provider}'"))
}

fn handle_providers() -> anyhow::Result<()> {
    let registry = ProviderRegistry::global();
    for name in registry.list() {
        let descriptor = registry.resolve(&name)?;
        let required = descriptor.required_credentials();
        if required.is_empty() {
            println!("{name}");
        } else {
            println!("{name}\trequires: {}", required.join(", "));
        }
    }
    Ok(())
}

async fn handle_send(
    runtime: &Runtime,
    provider: &str,
    chat: &str,
    text: Option<String>,
    reply_to: Option<String>,
    media: Option<Media>,
) -> anyhow::Result<()> {
    let connector = build_connector(runtime, provider)?;
    connector
        .connect()
        .await
        .with_context(|| format!("failed to connect to '{provider}'"))?;

    let result = match media {
        Some(media) => connector.send_media(chat, media, text.as_deref()).await,
        None => {
            let text = text.ok_or_else(|| anyhow::anyhow!("nothing to send: give TEXT or --media-url"))?;
            connector
                .send_message(chat, &text, reply_to.as_deref())
                .await
        }
    };

    if let Err(e) = connector.disconnect().await {
        warn!(error = %e, "disconnect failed");
    }
    let response = result.with_context(|| format!("send via '{provider}' failed"))?;
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}

async fn handle_health(runtime: &Runtime, providers: Vec<String>) -> anyhow::Result<()> {
    let providers = if providers.is_empty() {
        runtime.config.providers.keys().cloned().collect()
    } else {
        providers
    };
    if providers.is_empty() {
        anyhow::bail!("no providers given and none configured");
    }

    let mut all_healthy = true;
    for provider in providers {
        let connector = build_connector(runtime, &provider)?;
        if let Err(e) = connector.connect().await {
            warn!(provider = %provider, error = %e, "connect failed before health check");
        }
        let status = connector.health_check().await;
        all_healthy &= status.healthy;
        println!("{}", serde_json::to_string(&status)?);
        if let Err(e) = connector.disconnect().await {
            warn!(provider = %provider, error = %e, "disconnect failed");
        }
    }
    if !all_healthy {
        anyhow::bail!("one or more providers are unhealthy");
    }
    Ok(())
}

async fn handle_listen(
    runtime: &Runtime,
    provider: &str,
    events: Vec<EventArg>,
) -> anyhow::Result<()> {
    let connector = build_connector(runtime, provider)?;
    let selectors: Vec<EventSelector> = if events.is_empty() {
        vec![EventSelector::All]
    } else {
        events
            .into_iter()
            .map(|arg| EventSelector::Type(arg.into()))
            .collect()
    };
    for selector in selectors {
        connector.subscribe(selector, |event: Event| async move {
            println!("{}", serde_json::to_string(&event)?);
            Ok(())
        });
    }

    connector
        .connect()
        .await
        .with_context(|| format!("failed to connect to '{provider}'"))?;
    connector.start_polling().await?;
    info!(provider = %provider, "listening; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for Ctrl-C")?;

    info!(provider = %provider, "shutting down");
    connector.stop_polling().await?;
    connector.disconnect().await?;
    Ok(())
}
