use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use futures::stream;
use std::path::PathBuf;
use std::time::Instant;
use talkback::audio::write_pcm_wav;
use talkback::{
    AudioPayload, AudioSession, ChannelSink, Config, HeadlessAudioHost, PlayOptions,
    PlaybackEngine, WavCaptureHost,
};
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "talkback", version, about = "Voice capture and response playback")]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(long, global = true, default_value = "config/talkback")]
    config: String,

    /// Log at debug level regardless of configuration
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the capture pipeline over a WAV file and print chunks as JSON lines
    Capture {
        input: PathBuf,

        /// Pace blocks at the real sample rate
        #[arg(long)]
        realtime: bool,

        /// Re-assemble delivered PCM into a 16-bit mono WAV
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Stream a file into the dynamic playback slot and wait for it to finish
    Play {
        file: PathBuf,

        #[arg(long)]
        volume: Option<f32>,
    },

    /// Load the configured sound catalog and play each effect once
    Effects,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load_or_default(&cli.config)?;

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        cfg.log_level()
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Capture {
            input,
            realtime,
            save,
        } => capture(&cfg, input, realtime, save).await,
        Command::Play { file, volume } => play(&cfg, file, volume).await,
        Command::Effects => effects(&cfg).await,
    }
}

async fn capture(cfg: &Config, input: PathBuf, realtime: bool, save: Option<PathBuf>) -> Result<()> {
    let capture_host = WavCaptureHost::new(&input, cfg.capture.block_size, realtime);
    let session = AudioSession::new(capture_host, HeadlessAudioHost::new()?, cfg.session_config());

    let (sink, mut chunks) = ChannelSink::new();
    let printer = tokio::spawn(async move {
        let mut samples = Vec::new();
        while let Some(chunk) = chunks.recv().await {
            match serde_json::to_string(&chunk) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize chunk: {}", e),
            }
            match chunk.decode_samples() {
                Ok(decoded) => samples.extend(decoded),
                Err(e) => warn!("Failed to decode chunk: {:#}", e),
            }
        }
        samples
    });

    if !session.start_listening(sink).await? {
        bail!("Recorder is already active");
    }

    session.recorder().host().wait_drained().await;
    let stats = session.shutdown().await;
    let samples = printer.await?;

    info!(
        "Capture complete: {} chunks, {} bytes, {} blocks kept, {} gated as silence",
        stats.capture.chunks_delivered,
        stats.capture.bytes_delivered,
        stats.capture.blocks_captured,
        stats.capture.blocks_gated
    );

    if let Some(path) = save {
        write_pcm_wav(&path, &samples, cfg.capture.sample_rate)?;
        info!("Saved {} samples to {}", samples.len(), path.display());
    }

    Ok(())
}

async fn play(cfg: &Config, path: PathBuf, volume: Option<f32>) -> Result<()> {
    let engine = PlaybackEngine::new(HeadlessAudioHost::new()?, cfg.playback.to_playback_config());

    let file = tokio::fs::File::open(&path).await?;
    let reads = stream::unfold(Some(file), |file| async move {
        let mut file = file?;
        let mut buf = vec![0u8; 8192];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(buf), Some(file)))
            }
            Err(e) => Some((Err(e.into()), None)),
        }
    });

    let mut options = PlayOptions::new().on_end(|| info!("Playback finished"));
    if let Some(volume) = volume {
        options = options.volume(volume);
    }

    let started = Instant::now();
    let completed = engine
        .play_dynamic_audio(AudioPayload::from_stream(reads), options)
        .await?;

    info!(
        "{} {} after {:.2}s",
        path.display(),
        if completed { "completed" } else { "was interrupted" },
        started.elapsed().as_secs_f64()
    );

    engine.cleanup();
    Ok(())
}

async fn effects(cfg: &Config) -> Result<()> {
    let engine = PlaybackEngine::new(HeadlessAudioHost::new()?, cfg.playback.to_playback_config());

    let loaded = engine.load_sounds(cfg.playback.manifest()).await;
    if loaded == 0 {
        bail!("No sounds could be loaded from the configured catalog");
    }

    let background = &cfg.playback.background;
    if engine.has_sound(&background.id) {
        engine.manage_background_sound(true, background.volume);
        info!("Background '{}' looping at volume {}", background.id, background.volume);
    }

    for entry in &cfg.playback.sounds {
        if entry.id == background.id || !engine.has_sound(&entry.id) {
            continue;
        }

        let (done_tx, done_rx) = oneshot::channel();
        let started = Instant::now();
        engine.play_sound(&entry.id, PlayOptions::new().on_end(move || {
            let _ = done_tx.send(());
        }))?;

        if done_rx.await.is_ok() {
            info!("{}: {:.2}s", entry.id, started.elapsed().as_secs_f64());
        }
    }

    engine.cleanup();
    Ok(())
}
