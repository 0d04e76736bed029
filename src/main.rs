use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voicestream::config::{Config, LoggingConfig};
use voicestream::voice::provider::SAMPLE_RATE;
use voicestream::voice::sink::{AudioSink, NullSink, WavFileSink};
use voicestream::voice::voices::VoiceCatalog;
use voicestream::voice::{self, PipelineEvent};

/// Streaming text-to-speech
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.voicestream/config.toml)
    #[arg(short, long, env = "VOICESTREAM_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synthesize text and play it to the configured sink
    Speak(SpeakArgs),

    /// List available voices
    Voices {
        /// Print the catalog as JSON
        #[arg(long)]
        json: bool,
    },

    /// Download voice style data into the cache
    Fetch {
        /// Voice ids (default: the configured default voice)
        voices: Vec<String>,
    },
}

#[derive(Parser, Debug)]
struct SpeakArgs {
    /// Text to speak
    text: Option<String>,

    /// Read the text from a file
    #[arg(short, long, conflicts_with = "text")]
    file: Option<PathBuf>,

    /// Voice id
    #[arg(short, long)]
    voice: Option<String>,

    /// Write audio to this WAV file
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Maximum chunk length in characters
    #[arg(long)]
    max_chunk_len: Option<usize>,

    /// Speaking speed factor
    #[arg(long)]
    speed: Option<f32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Speak(args) => speak(config, args).await,
        Commands::Voices { json } => list_voices(json),
        Commands::Fetch { voices } => fetch(config, voices).await,
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("voicestream={}", logging.level).into());

    let fmt_layer = if logging.json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().with_writer(std::io::stderr).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

async fn speak(mut config: Config, args: SpeakArgs) -> Result<()> {
    let text = match (&args.text, &args.file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => bail!("nothing to speak: pass TEXT or --file"),
    };

    if let Some(len) = args.max_chunk_len {
        config.pipeline.max_chunk_len = len;
    }
    if let Some(speed) = args.speed {
        config.pipeline.speed = speed;
    }
    if let Some(voice) = &args.voice {
        config.voices.default_voice = voice.clone();
    }
    if let Some(out) = &args.out {
        config.playback.sink = "wav".to_string();
        config.playback.output = out.to_string_lossy().into_owned();
    }
    config.validate()?;

    let sink: Box<dyn AudioSink> = match config.playback.sink.as_str() {
        "wav" => Box::new(WavFileSink::create(config.output_path(), SAMPLE_RATE)?.paced(config.playback.paced)),
        _ => Box::new(NullSink::default()),
    };

    let mut controller = voice::start_pipeline(&config, sink)?;
    controller.wait_ready().await?;

    let chunks = controller.speak_default(&text)?;
    if chunks == 0 {
        warn!("Nothing to speak");
    }

    let events = tokio::select! {
        events = controller.finish() => events?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            controller.stop().await;
            Vec::new()
        }
    };

    let mut spoken = 0;
    let mut failed = 0;
    let mut seconds = 0.0;
    for event in &events {
        match event {
            PipelineEvent::Audio { duration, .. } => {
                spoken += 1;
                seconds += duration.as_secs_f64();
            }
            PipelineEvent::ChunkFailed { index, error } => {
                failed += 1;
                eprintln!("chunk {:?} failed: {}", index, error);
            }
            _ => {}
        }
    }

    controller.shutdown().await?;
    println!("{spoken}/{chunks} chunks synthesized ({seconds:.1}s of audio), {failed} failed");
    if config.playback.sink == "wav" {
        println!("wrote {}", config.output_path().display());
    }
    Ok(())
}

fn list_voices(json: bool) -> Result<()> {
    let catalog = VoiceCatalog::kokoro();
    if json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }

    println!("{:<12} {:<10} {:<6} {:<7} {:<7} {}", "ID", "NAME", "LANG", "GENDER", "GRADE", "TRAITS");
    for v in catalog.iter() {
        println!(
            "{:<12} {:<10} {:<6} {:<7} {:<7} {}",
            v.id,
            v.name,
            v.language,
            format!("{:?}", v.gender),
            v.overall_grade,
            v.traits.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn fetch(config: Config, voices: Vec<String>) -> Result<()> {
    let voices = if voices.is_empty() {
        vec![config.voices.default_voice.clone()]
    } else {
        voices
    };

    let styles = voice::build_style_cache(&config)?;
    let mut failures = 0;
    for id in &voices {
        match styles.load(id).await {
            Ok(table) => println!("{id}: {} styles", table.style_count()),
            Err(e) => {
                failures += 1;
                eprintln!("{id}: {e}");
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} voices failed to load", voices.len());
    }
    Ok(())
}
