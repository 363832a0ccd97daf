use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, EnvFilter};

use radiobot_common::models::voice::{SessionEvent, SessionState, VoiceTarget};
use radiobot_core::platforms::discord::{DiscordChannelStatus, DiscordPlatform, SongbirdTransport};
use radiobot_core::platforms::PlatformIntegration;
use radiobot_core::status::HttpMetadataSource;
use radiobot_core::tasks::{spawn_status_publisher, StatusPublisher};
use radiobot_core::VoiceSession;

mod config;
use config::{AppConfig, Args};

/// How long the gateway gets to deliver READY before start-up is abandoned.
const GATEWAY_READY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
enum Shutdown {
    Signal,
    Fatal(String),
    EventsClosed,
}

fn init_tracing() -> anyhow::Result<()> {
    let directive = "radiobot=info"
        .parse::<Directive>()
        .context("invalid default log directive")?;
    let filter = EnvFilter::from_default_env().add_directive(directive);
    let sub = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(sub).context("Failed to set global subscriber")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // A missing .env is fine; the environment may already be populated.
    dotenv::dotenv().ok();
    init_tracing()?;

    let args = Args::parse();
    let config = AppConfig::from_args(args).context("invalid configuration")?;
    info!(
        "Radiobot starting. guild={}, channel={}, stream={}",
        config.guild_id, config.voice_channel_id, config.stream_url
    );

    run(config).await
}

async fn run(config: AppConfig) -> anyhow::Result<ExitCode> {
    let mut discord = DiscordPlatform::new(config.token.clone());
    discord
        .connect()
        .await
        .context("failed to connect to the Discord gateway")?;
    discord
        .wait_until_ready(GATEWAY_READY_TIMEOUT)
        .await
        .context("Discord gateway never became ready")?;

    let transport = Arc::new(SongbirdTransport::from_platform(&discord)?);
    let target = VoiceTarget::new(config.guild_id, config.voice_channel_id);
    let session = VoiceSession::spawn(transport, target, config.session_config());
    let mut events = session.subscribe();
    let mut state = session.watch_state();

    if let Err(e) = session.start().await {
        warn!("First voice connection attempt failed: {e}. Retrying in the background.");
    }

    let shutdown = CancellationToken::new();
    let publisher = match &config.status_url {
        Some(url) => {
            let source = HttpMetadataSource::new(url.as_str())?;
            let sink = DiscordChannelStatus::new(config.token.clone(), config.voice_channel_id)?;
            let publisher =
                StatusPublisher::new(Arc::new(source), Arc::new(sink), config.status_config());
            info!("Channel status publisher enabled (feed={url})");
            Some(spawn_status_publisher(publisher, shutdown.clone()))
        }
        None => {
            info!("No status feed configured; channel status publisher disabled");
            None
        }
    };

    let reason = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("Failed to listen for Ctrl-C: {e}");
            }
            info!("Shutdown requested");
            Shutdown::Signal
        }
        reason = watch_session(&mut events, &mut state) => reason,
    };

    session.destroy().await;
    shutdown.cancel();
    if let Some(handle) = publisher {
        if let Err(e) = handle.await {
            warn!("Status publisher task ended abnormally: {e}");
        }
    }
    if let Err(e) = discord.disconnect().await {
        warn!("Error while closing the gateway: {e}");
    }

    match reason {
        Shutdown::Fatal(detail) => {
            error!("Exiting after unrecoverable voice failure: {detail}");
            Ok(ExitCode::FAILURE)
        }
        Shutdown::Signal | Shutdown::EventsClosed => {
            info!("Radiobot stopped");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Follows session events until one of them is fatal. The state watch backs
/// this up: a lagging receiver can miss the fatal report but not `Destroyed`.
async fn watch_session(
    events: &mut broadcast::Receiver<SessionEvent>,
    state: &mut watch::Receiver<SessionState>,
) -> Shutdown {
    if *state.borrow_and_update() == SessionState::Destroyed {
        return Shutdown::Fatal("voice session is already destroyed".into());
    }
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(SessionEvent::Failure { kind, detail }) if kind.is_fatal() => {
                    return Shutdown::Fatal(format!("{kind}: {detail}"));
                }
                Ok(SessionEvent::Failure { kind, detail }) => {
                    debug!("voice failure ({kind}): {detail}")
                }
                Ok(SessionEvent::RetryScheduled { attempt, delay }) => {
                    info!("Voice reconnect #{attempt} in {delay:?}");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!("Missed {missed} session events"),
                Err(RecvError::Closed) => return Shutdown::EventsClosed,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    return Shutdown::EventsClosed;
                }
                if *state.borrow_and_update() == SessionState::Destroyed {
                    return Shutdown::Fatal("voice session destroyed itself".into());
                }
            }
        }
    }
}
