//! Tandem CLI Application

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tandem_core::domain::audio::{
    AudioEnumerator, AudioError, DecodedTrack, Track, TrackId, TrackLibrary, CHANNELS,
};
use tandem_core::domain::config::{Command, CommandExecutor, ControlBus, TandemConfig};
use tandem_core::domain::deck::DeckId;
use tandem_core::domain::mixer::Mixer;
use tandem_infra::audio::{tap_pair, AudioEngine, CpalEnumerator, SpectrumAnalyser};

#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "A two-deck audio mixing engine", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List available output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Play the built-in demo tones through both decks
    #[arg(long)]
    demo: bool,
}

/// Built-in library of generated test tones
///
/// Stands in for a real track library so the engine can run end to end
/// without any media on disk.
struct ToneLibrary {
    sample_rate: u32,
}

impl ToneLibrary {
    fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    fn tone(&self, id: &str, frequency: f32, duration_secs: f64) -> DecodedTrack {
        let frames = (duration_secs * self.sample_rate as f64) as usize;
        let mut samples = Vec::with_capacity(frames * CHANNELS);
        for i in 0..frames {
            let t = i as f32 / self.sample_rate as f32;
            let sample = (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.4;
            for _ in 0..CHANNELS {
                samples.push(sample);
            }
        }
        DecodedTrack::new(
            Track {
                id: TrackId::new(id),
                title: format!("{frequency} Hz tone"),
                duration_secs,
            },
            self.sample_rate,
            samples,
        )
    }
}

impl TrackLibrary for ToneLibrary {
    fn fetch(&self, id: &TrackId) -> Result<DecodedTrack, AudioError> {
        match id.as_str() {
            "tone-a" => Ok(self.tone("tone-a", 220.0, 30.0)),
            "tone-b" => Ok(self.tone("tone-b", 330.0, 30.0)),
            other => Err(AudioError::DecodeFailure(format!(
                "no such track: {other}"
            ))),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    tracing::info!("Tandem starting...");

    let enumerator = CpalEnumerator::new();

    if cli.list_devices {
        for device in enumerator.output_devices()? {
            let default = device
                .default_sample_rate
                .map(|sr| format!(" (default {} Hz)", sr.hz()))
                .unwrap_or_default();
            println!("{}{}", device.name, default);
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => TandemConfig::load_from_file(path).await?,
        None => TandemConfig::load_or_default().await,
    };

    let device = enumerator.open_output(&config.audio.output_device)?;
    let (mixer, mut bus) = Mixer::new(config.engine.sample_rate as f32);

    // Per-deck analysis taps for visualization consumers
    let (writer_a, reader_a) = tap_pair(config.engine.analyser_window * CHANNELS * 8);
    let (writer_b, reader_b) = tap_pair(config.engine.analyser_window * CHANNELS * 8);
    bus.set_tap(DeckId::A, Box::new(writer_a));
    bus.set_tap(DeckId::B, Box::new(writer_b));
    let mut analyser_a = SpectrumAnalyser::new(reader_a, config.engine.analyser_window);
    let mut analyser_b = SpectrumAnalyser::new(reader_b, config.engine.analyser_window);

    let engine = AudioEngine::start(&device, &config.engine, bus)?;
    tracing::info!(sample_rate = engine.sample_rate(), "Engine running");

    let library = Arc::new(ToneLibrary::new(config.engine.sample_rate));
    let control = ControlBus::new(mixer, library);

    if cli.demo {
        for (deck, track) in [(DeckId::A, "tone-a"), (DeckId::B, "tone-b")] {
            control
                .execute(Command::LoadTrack {
                    deck,
                    track_id: TrackId::new(track),
                })
                .await;
            control.execute(Command::TogglePlay { deck }).await;
        }
        control
            .execute(Command::SetCrossfader { position: 0.5 })
            .await;
        tracing::info!("Demo tones playing on both decks, press Ctrl-C to stop");
    } else {
        tracing::info!("Engine idle (no control surface attached), press Ctrl-C to stop");
    }

    // Keep the visualization feed warm until shutdown
    let mut frame = tokio::time::interval(std::time::Duration::from_millis(16));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = frame.tick() => {
                analyser_a.update();
                analyser_b.update();
            }
        }
    }

    tracing::info!("Shutting down");
    drop(engine);
    Ok(())
}
