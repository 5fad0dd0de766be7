use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use pinalbum::{
    AlbumState, AlbumSummary, AlbumSyncCoordinator, Config, Pin, PinPhotoCache, YamlStore,
};

#[derive(Parser)]
#[command(author, version, about = "Photo albums for map pins, cached locally")]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct PinArgs {
    /// Latitude in decimal degrees
    #[arg(long, allow_negative_numbers = true)]
    lat: f64,

    /// Longitude in decimal degrees
    #[arg(long, allow_negative_numbers = true)]
    lon: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize with a default config file
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Open a pin's album, downloading page 1 if nothing is cached yet
    Load {
        #[command(flatten)]
        pin: PinArgs,

        /// Title for a new pin
        #[arg(short, long, default_value = "Dropped pin")]
        title: String,
    },

    /// Replace a pin's album with the next page of photos
    Refresh {
        #[command(flatten)]
        pin: PinArgs,
    },

    /// List pins, or the photos of one pin when a coordinate is given
    List {
        #[arg(long, allow_negative_numbers = true, requires = "lon")]
        lat: Option<f64>,

        #[arg(long, allow_negative_numbers = true, requires = "lat")]
        lon: Option<f64>,
    },

    /// Delete one photo from a pin's album
    Delete {
        #[command(flatten)]
        pin: PinArgs,

        /// Remote photo id
        #[arg(long)]
        id: String,
    },

    /// Delete a pin together with its album
    RemovePin {
        #[command(flatten)]
        pin: PinArgs,
    },

    /// Show configuration and cache statistics
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Init { force } => init_config(&cli.config, *force),
        Commands::Load { pin, title } => {
            let config = load_config(&cli.config)?;
            require_api_key(&config)?;
            let coordinator = open_coordinator(&config)?;
            let pin = Pin::new(pin.lat, pin.lon, title.clone());

            let existing = coordinator.cache().pin(&pin.key())?;
            let pin = existing.unwrap_or(pin);
            println!("Loading album for {} at {}...", pin.title, pin.coordinate);

            let summary = coordinator
                .load_initial(&pin)
                .await
                .with_context(|| format!("Failed to load album for {}", pin.coordinate))?;
            print_summary(&summary);
            Ok(())
        }
        Commands::Refresh { pin } => {
            let config = load_config(&cli.config)?;
            require_api_key(&config)?;
            let coordinator = open_coordinator(&config)?;
            let key = pin_for(pin).key();
            let pin = coordinator
                .cache()
                .pin(&key)?
                .with_context(|| format!("No pin at {key}. Load it first."))?;
            println!("Refreshing album for {} at {}...", pin.title, pin.coordinate);

            let summary = coordinator
                .refresh(&pin)
                .await
                .with_context(|| format!("Failed to refresh album for {}", pin.coordinate))?;
            print_summary(&summary);
            Ok(())
        }
        Commands::List { lat, lon } => {
            let config = load_config(&cli.config)?;
            let cache = open_cache(&config)?;

            match (lat, lon) {
                (Some(lat), Some(lon)) => {
                    let key = Pin::new(*lat, *lon, "").key();
                    let photos = cache.list_for(&key)?;
                    println!("{} photos for pin {key}", photos.len());
                    for photo in photos {
                        let size = photo.image.as_ref().map(Vec::len).unwrap_or_default();
                        println!("  {}  {:>8} bytes  {}", photo.id, size, photo.title);
                    }
                }
                _ => {
                    let pins = cache.pins()?;
                    println!("{} pins", pins.len());
                    for pin in pins {
                        let key = pin.key();
                        let count = cache.count_for(&key)?;
                        let page = cache
                            .cursor(&key)?
                            .map(|c| format!("page {}/{}", c.page, c.total_pages))
                            .unwrap_or_else(|| "not loaded".to_string());
                        println!("  {}  {}  {count} photos, {page}", pin.coordinate, pin.title);
                    }
                }
            }
            Ok(())
        }
        Commands::Delete { pin, id } => {
            let config = load_config(&cli.config)?;
            let coordinator = open_coordinator(&config)?;
            let key = pin_for(pin).key();

            if coordinator.delete_photo(&key, id)? {
                println!("Deleted photo {id}");
            } else {
                println!("Photo {id} was not in the album of pin {key}");
            }
            Ok(())
        }
        Commands::RemovePin { pin } => {
            let config = load_config(&cli.config)?;
            let coordinator = open_coordinator(&config)?;
            let key = pin_for(pin).key();

            if coordinator.remove_pin(&key)? {
                println!("Removed pin {key}");
            } else {
                println!("No pin at {key}");
            }
            Ok(())
        }
        Commands::Status => {
            let config = load_config(&cli.config)?;
            println!("pinalbum Status");
            println!("Configuration:");
            println!("  API URL: {}", config.api_url);
            println!("  Photo URL: {}", config.photo_url);
            println!("  API key set: {}", !config.api_key.is_empty());
            println!("  Radius: {} km, {} photos per page", config.radius_km, config.per_page);
            println!("  Data file: {}", config.data_file);

            let store = YamlStore::open(&config.data_file)
                .with_context(|| format!("Failed to open data file {}", config.data_file))?;
            let last_updated = store.last_updated();
            let cache = PinPhotoCache::new(store);
            let pins = cache.pins()?;
            let mut photos = 0;
            for pin in &pins {
                photos += cache.count_for(&pin.key())?;
            }
            println!("Cache:");
            println!("  Pins: {}", pins.len());
            println!("  Photos: {photos}");
            println!("  Last updated: {last_updated}");
            Ok(())
        }
    }
}

fn pin_for(args: &PinArgs) -> Pin {
    Pin::new(args.lat, args.lon, "")
}

fn print_summary(summary: &AlbumSummary) {
    if summary.is_empty() {
        println!("No photos found near this pin");
        return;
    }
    let source = if summary.from_cache { " (from cache)" } else { "" };
    println!(
        "Page {}/{}: {} photos cached{source}",
        summary.page, summary.total_pages, summary.cached
    );
    if summary.skipped > 0 {
        println!("  {} photos could not be downloaded", summary.skipped);
    }
}

fn open_cache(config: &Config) -> Result<PinPhotoCache> {
    let store = YamlStore::open(&config.data_file)
        .with_context(|| format!("Failed to open data file {}", config.data_file))?;
    Ok(PinPhotoCache::new(store))
}

/// Load and refresh talk to the photo service and need a key
fn require_api_key(config: &Config) -> Result<()> {
    if config.api_key.is_empty() {
        anyhow::bail!(
            "No API key configured. Set api_key in the config file or {}.",
            pinalbum::config::API_KEY_ENV
        );
    }
    Ok(())
}

fn open_coordinator(config: &Config) -> Result<AlbumSyncCoordinator> {
    let cache = Arc::new(open_cache(config)?);
    let coordinator = AlbumSyncCoordinator::from_config(config, cache)?;

    // Mirror state transitions into the log
    let mut events = coordinator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event.state {
                AlbumState::Loading { page } => info!("Pin {}: loading page {page}", event.pin),
                AlbumState::Ready(summary) => info!(
                    "Pin {}: ready with {} photos",
                    event.pin, summary.cached
                ),
                AlbumState::Failed { message } => info!("Pin {}: failed: {message}", event.pin),
                AlbumState::Idle => info!("Pin {}: idle", event.pin),
            }
        }
    });

    Ok(coordinator)
}

fn init_config(config_path_opt: &Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = Config::get_config_path(config_path_opt);

    if config_path.exists() && !force {
        println!("Config file already exists at {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    let config = Config::default();
    config
        .save_to_file(&config_path)
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    println!("Created config file at {}", config_path.display());
    Ok(())
}

fn load_config(config_path_opt: &Option<PathBuf>) -> Result<Config> {
    let config_path = Config::get_config_path(config_path_opt);

    if !config_path.exists() {
        anyhow::bail!(
            "Config file not found at {}. Run 'pinalbum init' to create one.",
            config_path.display()
        );
    }

    Config::load_from_file(&config_path)
}
