//! Metaq CLI Tool
//!
//! Command-line interface for resolving metaq deliveries and replaying them
//! against a simulated playback clock.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};
use metaq_core::{
    BackendRegistry, Declaration, ManualClock, MediaSession, Metadata, Pipeline, PlaybackClock,
    SessionConfig,
};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "metaq")]
#[command(about = "Metaq - timed cue pipeline for media metadata")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a metadata delivery and print the scheduled cues as JSON
    Resolve {
        /// Metadata file ({"captions": [...], "metaq": {...}})
        input: PathBuf,

        /// Session configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Pretty-print the output
        #[arg(long)]
        pretty: bool,
    },

    /// Replay a metadata delivery against a simulated playback clock
    Play {
        /// Metadata file ({"captions": [...], "metaq": {...}})
        input: PathBuf,

        /// Session configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Playback position to stop at, in seconds
        #[arg(long, default_value = "30")]
        until: f64,

        /// Override the clock poll interval in milliseconds
        #[arg(long)]
        tick_ms: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Resolve {
            input,
            config,
            pretty,
        } => resolve(input, config, pretty)?,

        Commands::Play {
            input,
            config,
            until,
            tick_ms,
        } => play(input, config, until, tick_ms)?,
    }

    Ok(())
}

/// 0 (default) = warn, 1 = info, 2 = debug, 3+ = trace; RUST_LOG wins when no flag is given
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_default_env();
    if verbosity > 0 || std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(level);
    }
    builder.format_timestamp_millis().init();
}

fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    match path {
        Some(path) => {
            let file = File::open(path).context("Failed to open config file")?;
            let config = SessionConfig::from_reader(BufReader::new(file))
                .context("Failed to parse config file")?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        }
        None => Ok(SessionConfig::default()),
    }
}

fn load_metadata(path: &Path) -> Result<Metadata> {
    let file = File::open(path).context("Failed to open metadata file")?;
    Metadata::from_reader(BufReader::new(file)).context("Failed to parse metadata file")
}

fn resolve(input: PathBuf, config: Option<PathBuf>, pretty: bool) -> Result<()> {
    let config = load_config(config.as_deref())?;
    let metadata = load_metadata(&input)?;

    let resolved = Pipeline::new(config.types).resolve(metadata.metaq);

    let output = if pretty {
        serde_json::to_string_pretty(&resolved)
    } else {
        serde_json::to_string(&resolved)
    }
    .context("Failed to serialize resolved cues")?;
    println!("{}", output);

    Ok(())
}

fn play(input: PathBuf, config: Option<PathBuf>, until: f64, tick_ms: Option<u64>) -> Result<()> {
    let mut config = load_config(config.as_deref())?;
    if let Some(tick_ms) = tick_ms {
        config.tick_ms = tick_ms;
    }
    if config.tick_ms == 0 {
        bail!("Tick interval must be greater than zero");
    }
    let metadata = load_metadata(&input)?;

    println!("Replaying: {}", input.display());
    println!("Poll interval: {} ms, stopping at {:.2}s", config.tick_ms, until);

    let clock = ManualClock::new();
    let backends = printing_backends(&config, &metadata, &clock);
    debug!("Printing backends installed: {:?}", backends);

    let render_clock = clock.clone();
    let renderer = move |text: &str| -> metaq_core::Result<()> {
        if text.is_empty() {
            println!("[{:>8.3}s] caption cleared", render_clock.current_time());
        } else {
            println!("[{:>8.3}s] caption: {:?}", render_clock.current_time(), text);
        }
        Ok(())
    };

    let mut session = MediaSession::new(config, backends, clock.clone(), renderer)
        .context("Failed to create media session")?;

    let ticket = session.begin_load();
    let resolved = session
        .deliver(ticket, metadata)
        .context("Failed to apply metadata")?
        .context("Delivery was superseded")?;
    println!("Resolved {} cue types", resolved.len());

    clock.set_playing(true);
    session
        .notify_playback(true)
        .context("Failed to start playback")?;

    let step = session.config().tick_delay();
    let mut now = Instant::now();
    while clock.current_time() < until {
        clock.advance(step.as_secs_f64());
        now += step;
        session.poll(now).context("Playback poll failed")?;
    }

    clock.set_playing(false);
    session
        .notify_playback(false)
        .context("Failed to stop playback")?;
    println!("Stopped at {:.3}s", clock.current_time());

    Ok(())
}

/// Installs a backend printing each scheduled cue for every type the
/// delivery or the configuration can produce
fn printing_backends(config: &SessionConfig, metadata: &Metadata, clock: &ManualClock) -> BackendRegistry {
    let mut types: BTreeSet<String> = metadata.metaq.keys().cloned().collect();
    for (cue_type, type_config) in &config.types {
        types.insert(cue_type.clone());
        types.extend(type_config.clone.iter().cloned());
    }

    let mut backends = BackendRegistry::new();
    for cue_type in types {
        if config.is_caption_type(&cue_type) {
            continue;
        }
        let clock = clock.clone();
        let name = cue_type.clone();
        backends.register(&cue_type, move |declaration: &Declaration| -> metaq_core::Result<()> {
            println!(
                "[{:>8.3}s] {} scheduled {:?} -> {:?}: {}",
                clock.current_time(),
                name,
                declaration.start(),
                declaration.end(),
                serde_json::Value::Object(declaration.options().clone())
            );
            Ok(())
        });
    }
    backends
}
