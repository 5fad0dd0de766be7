//! Album synchronization for map pins.
//!
//! `AlbumSyncCoordinator` owns the per-pin state machine:
//!
//! ```text
//! Idle -> Loading -> Ready | Failed
//!         ^                  |
//!         +---- refresh -----+
//! ```
//!
//! - `load_initial` serves a pin's album from the cache when it has any
//!   records, otherwise searches page 1 and adds each image to the cache as it
//!   arrives.
//! - `refresh` searches the next page (wrapping to 1 after the last one),
//!   downloads it into a staging buffer and swaps it in with a single
//!   `replace_all`.
//! - Only one load/refresh runs per pin at a time; a second request gets
//!   `SyncError::Busy`.
//! - `cancel` bumps the pin's generation. Every cache write checks the
//!   generation under that pin's slot lock first, so results of an abandoned
//!   operation are dropped. Pins never wait on each other's slot.
//!
//! Image download failures are logged and skipped. Search and storage
//! failures end the operation in `Failed` and are returned to the caller.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::cache::PinPhotoCache;
use crate::config::Config;
use crate::error::{Result, StoreError, SyncError};
use crate::image::{HttpImageFetcher, ImageSource};
use crate::model::{AlbumPage, PageCursor, PhotoDescriptor, PhotoRecord, Pin, PinKey};
use crate::search::{FlickrSearchClient, PhotoSearch};

const EVENT_CAPACITY: usize = 256;

/// Knobs for downloading one page of images
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Preferred image size variant
    pub size_variant: String,
    /// Image downloads in flight at once
    pub concurrency: usize,
    /// Time allowed for one page of downloads; unbounded when `None`
    pub page_budget: Option<Duration>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            size_variant: "q".to_string(),
            concurrency: 8,
            page_budget: Some(Duration::from_secs(60)),
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            size_variant: config.size_variant.clone(),
            concurrency: config.concurrency.max(1),
            page_budget: config.page_budget(),
        }
    }
}

/// Outcome of a completed load or refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlbumSummary {
    /// Page the album now holds
    pub page: u32,
    pub total_pages: u32,
    /// Item count the server reported
    pub total: u32,
    /// Records cached for the pin by this operation (or already cached)
    pub cached: usize,
    /// Photos the server listed that could not be downloaded in time or at all
    pub skipped: usize,
    /// True when served from the cache without a network call
    pub from_cache: bool,
}

impl AlbumSummary {
    /// The server has no photos for this place
    pub fn is_empty(&self) -> bool {
        self.total == 0 && self.cached == 0
    }

    /// Refreshing an empty album cannot produce anything new
    pub fn can_refresh(&self) -> bool {
        !self.is_empty()
    }
}

/// Where a pin's album is in its lifecycle
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AlbumState {
    #[default]
    Idle,
    Loading {
        page: u32,
    },
    Ready(AlbumSummary),
    Failed {
        message: String,
    },
}

/// State transition published to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct AlbumEvent {
    pub pin: PinKey,
    pub state: AlbumState,
}

#[derive(Debug, Default)]
struct PinSlot {
    state: AlbumState,
    generation: u64,
    in_flight: bool,
}

/// Counts for one page of image downloads
#[derive(Debug, Default, Clone, Copy)]
struct PageTally {
    stored: usize,
    failed: usize,
    abandoned: usize,
}

impl PageTally {
    fn skipped(&self) -> usize {
        self.failed + self.abandoned
    }
}

type SlotHandle = Arc<Mutex<PinSlot>>;

fn lock_slot(slot: &Mutex<PinSlot>) -> MutexGuard<'_, PinSlot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks a pin busy for the lifetime of one operation. Dropping it (including
/// when the operation's future is dropped) releases the pin.
struct InFlight<'a> {
    coordinator: &'a AlbumSyncCoordinator,
    slot: SlotHandle,
    key: PinKey,
    generation: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut slot = lock_slot(&self.slot);
        if slot.generation == self.generation {
            slot.in_flight = false;
            if matches!(slot.state, AlbumState::Loading { .. }) {
                slot.state = AlbumState::Idle;
                self.coordinator.publish(&self.key, AlbumState::Idle);
            }
        }
    }
}

/// Loads, refreshes and edits the photo albums of map pins
pub struct AlbumSyncCoordinator {
    search: Arc<dyn PhotoSearch>,
    images: Arc<dyn ImageSource>,
    cache: Arc<PinPhotoCache>,
    options: SyncOptions,
    slots: Mutex<HashMap<PinKey, SlotHandle>>,
    events: broadcast::Sender<AlbumEvent>,
}

impl AlbumSyncCoordinator {
    pub fn new(
        search: Arc<dyn PhotoSearch>,
        images: Arc<dyn ImageSource>,
        cache: Arc<PinPhotoCache>,
        options: SyncOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            search,
            images,
            cache,
            options,
            slots: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Wires the HTTP search client and image fetcher described by `config`
    pub fn from_config(config: &Config, cache: Arc<PinPhotoCache>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SyncError::network("building HTTP client", e))?;

        Ok(Self::new(
            Arc::new(FlickrSearchClient::new(client.clone(), config)),
            Arc::new(HttpImageFetcher::new(client, config)),
            cache,
            SyncOptions::from_config(config),
        ))
    }

    pub fn cache(&self) -> &Arc<PinPhotoCache> {
        &self.cache
    }

    /// Receives every state transition published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<AlbumEvent> {
        self.events.subscribe()
    }

    /// Current state of a pin's album
    pub fn state(&self, key: &PinKey) -> AlbumState {
        self.existing_slot(key)
            .map(|slot| lock_slot(&slot).state.clone())
            .unwrap_or_default()
    }

    /// Opens a pin's album, fetching page 1 only when nothing is cached
    pub async fn load_initial(&self, pin: &Pin) -> Result<AlbumSummary> {
        let op = self.begin(&pin.key())?;
        let result = self.run_load_initial(pin, &op).await;
        self.finish(&op, &result);
        result
    }

    /// Replaces a pin's album with the next page of search results
    pub async fn refresh(&self, pin: &Pin) -> Result<AlbumSummary> {
        let op = self.begin(&pin.key())?;
        let result = self.run_refresh(pin, &op).await;
        self.finish(&op, &result);
        result
    }

    /// Deletes one cached photo. Local only; deleting a missing id is a no-op.
    pub fn delete_photo(&self, key: &PinKey, id: &str) -> Result<bool> {
        let removed = self.cache.remove(key, id)?;
        if removed {
            debug!("Deleted photo {id} of pin {key}");
        }
        Ok(removed)
    }

    /// Abandons the pin's in-flight operation, if any. Returns true when
    /// something was cancelled.
    pub fn cancel(&self, key: &PinKey) -> bool {
        let Some(handle) = self.existing_slot(key) else {
            return false;
        };
        let mut slot = lock_slot(&handle);
        if !slot.in_flight {
            return false;
        }

        slot.generation += 1;
        slot.in_flight = false;
        slot.state = AlbumState::Idle;
        self.publish(key, AlbumState::Idle);
        info!("Cancelled album operation for pin {key}");
        true
    }

    /// Deletes a pin and its album, abandoning any operation in flight
    pub fn remove_pin(&self, key: &PinKey) -> Result<bool> {
        self.cancel(key);
        let removed = self.cache.remove_pin(key)?;

        if let Some(handle) = self.existing_slot(key) {
            let mut slot = lock_slot(&handle);
            if slot.state != AlbumState::Idle {
                slot.state = AlbumState::Idle;
                self.publish(key, AlbumState::Idle);
            }
        }
        Ok(removed)
    }

    async fn run_load_initial(&self, pin: &Pin, op: &InFlight<'_>) -> Result<AlbumSummary> {
        let key = &op.key;
        self.commit(op, || self.cache.add_pin(pin))?;

        let cached = self.cache.count_for(key)?;
        if cached > 0 {
            let cursor = self.cache.cursor(key)?.unwrap_or_default();
            info!("Album of pin {key} served from cache ({cached} photos)");
            return Ok(AlbumSummary {
                page: cursor.page,
                total_pages: cursor.total_pages,
                total: cursor.total,
                cached,
                skipped: 0,
                from_cache: true,
            });
        }

        self.transition(op, AlbumState::Loading { page: 1 });
        info!("Loading album for pin {key} around {}", pin.coordinate);
        let album = self.search.search(pin.coordinate, 1).await?;

        let cursor = cursor_for(&album, 1);
        self.commit(op, || self.cache.set_cursor(key, cursor))?;

        if album.is_empty() {
            info!("No photos found around {}", pin.coordinate);
            return Ok(summary(cursor, 0, PageTally::default()));
        }

        let tally = self
            .download_page(key, &album.photos, |record| {
                self.commit(op, move || self.cache.add(key, record))
            })
            .await?;

        info!(
            "Loaded page {}/{} for pin {key}: {} photos cached, {} skipped",
            cursor.page,
            cursor.total_pages,
            tally.stored,
            tally.skipped()
        );
        Ok(summary(cursor, tally.stored, tally))
    }

    async fn run_refresh(&self, pin: &Pin, op: &InFlight<'_>) -> Result<AlbumSummary> {
        let key = &op.key;
        self.commit(op, || self.cache.add_pin(pin))?;

        let current = self.cache.cursor(key)?.unwrap_or_default();
        let next = current.next_page();
        self.transition(op, AlbumState::Loading { page: next });
        info!(
            "Refreshing album for pin {key}: page {} -> {next} of {}",
            current.page, current.total_pages
        );

        // A failed search leaves the cached album untouched
        let album = self.search.search(pin.coordinate, next).await?;
        let cursor = cursor_for(&album, next);

        let mut staged = Vec::with_capacity(album.photos.len());
        let tally = if album.is_empty() {
            PageTally::default()
        } else {
            self.download_page(key, &album.photos, |record| {
                staged.push(record);
                Ok(())
            })
            .await?
        };

        if tally.stored == 0 && album.total > 0 {
            warn!("No image of page {next} could be downloaded for pin {key}; album will be empty");
        }

        let stored = staged.len();
        self.commit(op, || self.cache.replace_all(key, staged, cursor))?;

        info!(
            "Refreshed pin {key} to page {}/{}: {stored} photos, {} skipped",
            cursor.page,
            cursor.total_pages,
            tally.skipped()
        );
        Ok(summary(cursor, stored, tally))
    }

    /// Downloads every photo of a page concurrently, handing each success to
    /// `on_arrival` as soon as it lands. Failed downloads are skipped. When the
    /// page budget runs out the remaining downloads are abandoned.
    async fn download_page<F>(
        &self,
        key: &PinKey,
        photos: &[PhotoDescriptor],
        mut on_arrival: F,
    ) -> Result<PageTally>
    where
        F: FnMut(PhotoRecord) -> Result<()>,
    {
        let mut tally = PageTally::default();
        let size = self.options.size_variant.as_str();

        let fetches: Vec<BoxFuture<'_, _>> = photos
            .iter()
            .map(|descriptor| {
                async move {
                    let result = self
                        .images
                        .fetch(
                            &descriptor.server,
                            &descriptor.id,
                            &descriptor.secret,
                            descriptor.pick_size(size),
                        )
                        .await;
                    (descriptor, result)
                }
                .boxed()
            })
            .collect();
        let mut downloads = stream::iter(fetches)
            .buffer_unordered(self.options.concurrency.max(1));

        let drain = async {
            while let Some((descriptor, result)) = downloads.next().await {
                match result {
                    Ok(bytes) => {
                        on_arrival(PhotoRecord::from_descriptor(
                            key.clone(),
                            descriptor,
                            Some(bytes),
                        ))?;
                        tally.stored += 1;
                    }
                    Err(e) => {
                        warn!("Skipping photo {} of pin {key}: {e}", descriptor.id);
                        tally.failed += 1;
                    }
                }
            }
            Ok::<(), SyncError>(())
        };

        let outcome = match self.options.page_budget {
            Some(budget) => tokio::time::timeout(budget, drain).await.ok(),
            None => Some(drain.await),
        };

        match outcome {
            Some(result) => result?,
            None => {
                tally.abandoned = photos.len() - tally.stored - tally.failed;
                warn!(
                    "Page budget exhausted for pin {key}; abandoned {} downloads",
                    tally.abandoned
                );
            }
        }

        Ok(tally)
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<PinKey, SlotHandle>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The pin's slot, created on first use. The map lock is released before
    /// the slot itself is locked.
    fn slot(&self, key: &PinKey) -> SlotHandle {
        Arc::clone(self.slots().entry(key.clone()).or_default())
    }

    fn existing_slot(&self, key: &PinKey) -> Option<SlotHandle> {
        self.slots().get(key).cloned()
    }

    fn publish(&self, key: &PinKey, state: AlbumState) {
        // No subscribers is fine
        let _ = self.events.send(AlbumEvent {
            pin: key.clone(),
            state,
        });
    }

    /// Claims the pin for one operation, or reports it busy
    fn begin(&self, key: &PinKey) -> Result<InFlight<'_>> {
        let handle = self.slot(key);
        let generation = {
            let mut slot = lock_slot(&handle);
            if slot.in_flight {
                debug!("Rejecting album operation for busy pin {key}");
                return Err(SyncError::Busy(key.clone()));
            }
            slot.in_flight = true;
            slot.generation += 1;
            slot.generation
        };

        Ok(InFlight {
            coordinator: self,
            slot: handle,
            key: key.clone(),
            generation,
        })
    }

    /// Moves the pin to `state` unless its operation was cancelled
    fn transition(&self, op: &InFlight<'_>, state: AlbumState) -> bool {
        let mut slot = lock_slot(&op.slot);
        if slot.generation != op.generation {
            return false;
        }
        slot.state = state.clone();
        self.publish(&op.key, state);
        true
    }

    /// Runs a cache write only if the operation is still current. The pin's
    /// slot lock is held across the write so `cancel` cannot slip in between
    /// the check and the write.
    fn commit<T>(
        &self,
        op: &InFlight<'_>,
        write: impl FnOnce() -> std::result::Result<T, StoreError>,
    ) -> Result<T> {
        let slot = lock_slot(&op.slot);
        if slot.generation != op.generation {
            debug!("Dropping late result for pin {}", op.key);
            return Err(SyncError::Cancelled(op.key.clone()));
        }
        Ok(write()?)
    }

    fn finish(&self, op: &InFlight<'_>, result: &Result<AlbumSummary>) {
        match result {
            Ok(summary) => {
                self.transition(op, AlbumState::Ready(*summary));
            }
            Err(SyncError::Cancelled(_)) => {}
            Err(e) => {
                warn!("Album operation for pin {} failed: {e}", op.key);
                self.transition(
                    op,
                    AlbumState::Failed {
                        message: e.to_string(),
                    },
                );
            }
        }
    }
}

/// Cursor describing a fetched page; falls back to the requested page number
/// when the response does not echo it
fn cursor_for(album: &AlbumPage, requested: u32) -> PageCursor {
    let mut cursor = PageCursor::from_page(album);
    if cursor.page == 0 {
        cursor.page = requested;
    }
    cursor
}

fn summary(cursor: PageCursor, cached: usize, tally: PageTally) -> AlbumSummary {
    AlbumSummary {
        page: cursor.page,
        total_pages: cursor.total_pages,
        total: cursor.total,
        cached,
        skipped: tally.skipped(),
        from_cache: false,
    }
}
