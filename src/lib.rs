//! # pinalbum
//!
//! Keeps a photo album for every pin dropped on a map.
//!
//! For each pin the library searches a public photo service for pictures
//! taken near the pin's coordinate, downloads one page of them and caches the
//! result locally so it survives restarts. Refreshing an album swaps in the
//! next page of results; individual photos can be deleted.
//!
//! ## Components
//!
//! - [`search`]: paged photo search around a coordinate
//! - [`image`]: image downloads from the deterministic URL template
//! - [`cache`]: per-pin record cache with change notifications
//! - [`store`]: the CRUD store behind the cache (memory or YAML on disk)
//! - [`coordinator`]: the load / refresh / delete state machine
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pinalbum::{AlbumSyncCoordinator, Config, Pin, PinPhotoCache, YamlStore};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load_from_file("pinalbum.yaml".as_ref())?;
//! let cache = Arc::new(PinPhotoCache::new(YamlStore::open(&config.data_file)?));
//! let coordinator = AlbumSyncCoordinator::from_config(&config, cache)?;
//!
//! let pin = Pin::new(19.3126, -99.0778, "Iztapalapa");
//! let album = coordinator.load_initial(&pin).await?;
//! println!("{} photos cached", album.cached);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod image;
pub mod mock;
pub mod model;
pub mod search;
pub mod store;

pub use cache::{CacheEvent, PinPhotoCache};
pub use config::Config;
pub use coordinator::{AlbumEvent, AlbumState, AlbumSummary, AlbumSyncCoordinator, SyncOptions};
pub use error::{StoreError, SyncError};
pub use model::{AlbumPage, Coordinate, PageCursor, PhotoDescriptor, PhotoRecord, Pin, PinKey};
pub use store::{MemoryStore, PhotoStore, YamlStore};
