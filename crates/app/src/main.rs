use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use gif_player_core::{
    frame_interval, optimal_cache_size, refresh_divisor, PlaybackEvent, Player, PlayerConfig,
    PlayerError, RefreshSignalAdapter, SoftwareRefreshSource, Visibility,
};
use tracing_subscriber::EnvFilter;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> gif_player_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { input, config } => run_inspect(&input, config.as_deref()),
        Commands::Play {
            input,
            seconds,
            cache,
            realtime,
            config,
        } => run_play(&input, seconds, cache, realtime, config.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> gif_player_core::Result<PlayerConfig> {
    match path {
        Some(path) => PlayerConfig::from_path(path),
        None => Ok(PlayerConfig::default()),
    }
}

fn read_input(input: &Path) -> gif_player_core::Result<Vec<u8>> {
    std::fs::read(input)
        .map_err(|err| PlayerError::msg(format!("failed to read {}: {err}", input.display())))
}

fn run_inspect(input: &Path, config: Option<&Path>) -> gif_player_core::Result<()> {
    let config = load_config(config)?;
    let player = Player::new(config);
    let sequence = player.load_gif(read_input(input)?)?;

    let divisor = refresh_divisor(sequence.durations());
    let optimal = player.config().cache.optimal_frame_cache_size.unwrap_or_else(|| {
        optimal_cache_size(sequence.frame_count(), sequence.decoded_size_bytes())
    });
    let report = serde_json::json!({
        "sequence": sequence.summary(),
        "total_duration": sequence.total_duration(),
        "refresh_divisor": divisor,
        "frame_interval": frame_interval(divisor, player.config().display_refresh_rate),
        "optimal_cache_size": optimal,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_play(
    input: &Path,
    seconds: f64,
    cache: Option<usize>,
    realtime: bool,
    config: Option<&Path>,
) -> gif_player_core::Result<()> {
    let mut config = load_config(config)?;
    if cache.is_some() {
        config.cache.max_frame_cache_size = cache;
    }
    config.validate()?;
    tracing::info!(?input, seconds, ?cache, realtime, "starting playback");

    let display_refresh_rate = config.display_refresh_rate;
    let player = Rc::new(RefCell::new(Player::new(config)));
    {
        let mut player = player.borrow_mut();
        let sequence = player.load_gif(read_input(input)?)?;
        player.set_sequence(Some(sequence))?;
        player.set_visibility(Visibility::visible());
    }

    let mut source = SoftwareRefreshSource::new(display_refresh_rate);
    source.add_listener(Box::new(RefreshSignalAdapter::new(&player)));

    let refreshes = (seconds * display_refresh_rate).round().max(0.0) as u64;
    let refresh_period = Duration::from_secs_f64(1.0 / display_refresh_rate);
    let mut redisplays = 0usize;

    for _ in 0..refreshes {
        {
            let mut player = player.borrow_mut();
            if realtime {
                player.poll();
            } else {
                player.settle(SETTLE_TIMEOUT);
            }
            source.set_paused(!player.is_animating());
            if let Some(interval) = player.frame_interval() {
                source.set_frame_interval(interval);
            }
        }

        source.refresh();

        for event in player.borrow_mut().take_events() {
            match event {
                PlaybackEvent::Redisplay => redisplays += 1,
                PlaybackEvent::LoopCompleted { remaining } => {
                    tracing::info!(remaining, "loop completed")
                }
                PlaybackEvent::Finished => tracing::info!("playback finished"),
            }
        }

        if realtime {
            thread::sleep(refresh_period);
        }
    }

    let player = player.borrow();
    let resident = player.cache().map_or(0, |cache| cache.resident_len());
    tracing::info!(
        frame = ?player.current_frame_index(),
        redisplays,
        resident,
        animating = player.is_animating(),
        "playback stopped"
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Animated GIF playback with a bounded frame cache", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print frame timing and cache sizing for a GIF as JSON.
    Inspect {
        /// Path to the GIF file.
        input: PathBuf,
        /// Optional JSON player configuration.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Play a GIF headlessly against a simulated display refresh.
    Play {
        /// Path to the GIF file.
        input: PathBuf,
        /// Simulated playback length in seconds.
        #[arg(short, long, default_value_t = 5.0)]
        seconds: f64,
        /// Ceiling on the number of decoded frames kept resident.
        #[arg(long)]
        cache: Option<usize>,
        /// Pace refreshes in wall-clock time instead of waiting on decodes.
        #[arg(long)]
        realtime: bool,
        /// Optional JSON player configuration.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
