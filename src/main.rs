use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voice_relay::audio::{AudioOutput, AudioSource, WavFileOutput};
use voice_relay::session::SessionState;
use voice_relay::{create_router, AppState, CallOptions, CallSession, Config, KeepAlive};

/// Real-time voice relay for the dental AI receptionist
#[derive(Parser, Debug)]
#[command(name = "voice-relay", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file, without extension
    #[arg(long, global = true, value_name = "PATH", default_value = "config/voice-relay")]
    config: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server
    Serve,

    /// Place a call through a running relay, speaking a WAV file
    Call {
        /// Mono WAV file at the configured sample rate
        #[arg(long, value_name = "FILE")]
        input: PathBuf,

        /// Write the assistant's audio to this WAV file
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Typed message sent once the call is up
        #[arg(long)]
        text: Option<String>,

        /// Hang up after this many seconds
        #[arg(long, value_name = "SECONDS", default_value = "30")]
        duration: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Voice relay v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::Call {
            input,
            output,
            text,
            duration,
        } => call(cfg, input, output, text, Duration::from_secs(duration)).await,
    }
}

async fn serve(cfg: Config) -> Result<()> {
    cfg.validate().context("Invalid configuration")?;
    info!("Loaded config: {}", cfg.service.name);
    info!("Upstream: {:?}", cfg.upstream);

    let state = AppState::from_config(&cfg)?;
    let keepalive = KeepAlive::start(
        state.sessions.clone(),
        Duration::from_secs(cfg.relay.keepalive_interval_secs),
    );

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
        .context("HTTP server failed")?;

    keepalive.shutdown().await;
    Ok(())
}

async fn call(
    cfg: Config,
    input: PathBuf,
    output: Option<PathBuf>,
    text: Option<String>,
    duration: Duration,
) -> Result<()> {
    let options = CallOptions::from_config(&cfg, AudioSource::File(input));
    let sample_rate = options.playback_sample_rate;

    let mut session = CallSession::new(options);
    if let Some(path) = output {
        session = session.with_output(Box::new(
            move || -> Result<Box<dyn AudioOutput>> {
                Ok(Box::new(WavFileOutput::create(&path, sample_rate)?))
            },
        ));
    }

    session.start_call().await?;

    if let Some(text) = text {
        session.send_text_message(&text).await?;
    }

    let deadline = tokio::time::Instant::now() + duration;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                if session.state().await == SessionState::Closed {
                    break;
                }
            }
        }
    }

    session.stop_call().await?;

    let snapshot = session.snapshot().await;
    if let Some(error) = &snapshot.last_error {
        warn!("Call ended with error: {}", error);
    }
    println!("{}", snapshot.transcript);

    Ok(())
}
