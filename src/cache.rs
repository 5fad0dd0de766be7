//! Per-pin photo cache on top of a `PhotoStore`.
//!
//! Every mutation takes the cache lock, applies the change to the store,
//! saves it and then publishes a `CacheEvent`. `replace_all` swaps a pin's
//! records and cursor while holding the lock, so readers see either the old
//! page or the new one, never an empty or mixed album in between.

use log::{debug, warn};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::model::{PageCursor, PhotoRecord, Pin, PinKey};
use crate::store::{PhotoStore, StoreResult};

/// Buffered notifications per subscriber before the oldest are dropped
const EVENT_CAPACITY: usize = 256;

/// Change notification published after each committed mutation
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    PinAdded(PinKey),
    PinRemoved(PinKey),
    PhotoAdded { pin: PinKey, id: String },
    PhotoRemoved { pin: PinKey, id: String },
    AlbumReplaced { pin: PinKey, count: usize },
}

/// Shared, thread-safe view of every pin's cached album
pub struct PinPhotoCache {
    store: Mutex<Box<dyn PhotoStore>>,
    events: broadcast::Sender<CacheEvent>,
}

impl PinPhotoCache {
    pub fn new(store: impl PhotoStore + 'static) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store: Mutex::new(Box::new(store)),
            events,
        }
    }

    /// Receives every change committed after this call
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Box<dyn PhotoStore>>> {
        self.store.lock().map_err(|_| StoreError::Poisoned)
    }

    fn publish(&self, event: CacheEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn pins(&self) -> StoreResult<Vec<Pin>> {
        Ok(self.lock()?.pins())
    }

    pub fn pin(&self, key: &PinKey) -> StoreResult<Option<Pin>> {
        Ok(self.lock()?.pin(key))
    }

    /// Registers a pin; does nothing if it is already known
    pub fn add_pin(&self, pin: &Pin) -> StoreResult<()> {
        let key = pin.key();
        let created = {
            let mut store = self.lock()?;
            let created = store.create_pin(pin.clone())?;
            if created {
                store.save()?;
            }
            created
        };
        if created {
            debug!("Added pin {key} ({})", pin.title);
            self.publish(CacheEvent::PinAdded(key));
        }
        Ok(())
    }

    /// Deletes a pin and everything cached for it
    pub fn remove_pin(&self, key: &PinKey) -> StoreResult<bool> {
        let removed = {
            let mut store = self.lock()?;
            let removed = store.delete_pin(key)?;
            if removed {
                store.save()?;
            }
            removed
        };
        if removed {
            debug!("Removed pin {key}");
            self.publish(CacheEvent::PinRemoved(key.clone()));
        }
        Ok(removed)
    }

    /// The pin's records in grid order: ascending creation time, ties in
    /// insertion order
    pub fn list_for(&self, key: &PinKey) -> StoreResult<Vec<PhotoRecord>> {
        let mut records = self.lock()?.fetch_photos(key)?;
        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }

    /// Record count from the store's index; image bytes are not read
    pub fn count_for(&self, key: &PinKey) -> StoreResult<usize> {
        Ok(self.lock()?.photo_count(key))
    }

    pub fn cursor(&self, key: &PinKey) -> StoreResult<Option<PageCursor>> {
        Ok(self.lock()?.cursor(key))
    }

    pub fn set_cursor(&self, key: &PinKey, cursor: PageCursor) -> StoreResult<()> {
        let mut store = self.lock()?;
        store.set_cursor(key, cursor)?;
        store.save()
    }

    /// Appends one freshly downloaded record
    pub fn add(&self, key: &PinKey, mut record: PhotoRecord) -> StoreResult<()> {
        record.pin = key.clone();
        let id = record.id.clone();
        {
            let mut store = self.lock()?;
            store.create_photo(record)?;
            store.save()?;
        }
        self.publish(CacheEvent::PhotoAdded {
            pin: key.clone(),
            id,
        });
        Ok(())
    }

    /// Removes one record. Absent ids are not an error; returns whether
    /// anything was removed.
    pub fn remove(&self, key: &PinKey, id: &str) -> StoreResult<bool> {
        let removed = {
            let mut store = self.lock()?;
            let removed = store.delete_photos_where(key, &|record| record.id == id)?;
            if removed > 0 {
                store.save()?;
            }
            removed > 0
        };
        if removed {
            self.publish(CacheEvent::PhotoRemoved {
                pin: key.clone(),
                id: id.to_string(),
            });
        }
        Ok(removed)
    }

    /// Discards every record of the pin and installs `records` and `cursor`
    /// as one visible step.
    ///
    /// A store failure part-way leaves whatever the store managed to apply;
    /// it is reported, not repaired.
    pub fn replace_all(
        &self,
        key: &PinKey,
        records: Vec<PhotoRecord>,
        cursor: PageCursor,
    ) -> StoreResult<()> {
        let count = records.len();
        {
            let mut store = self.lock()?;
            let discarded = store.delete_photos_where(key, &|_| true)?;
            for mut record in records {
                record.pin = key.clone();
                store.create_photo(record)?;
            }
            store.set_cursor(key, cursor)?;
            if let Err(e) = store.save() {
                warn!("Failed to save album of pin {key} after replacing {discarded} photos");
                return Err(e);
            }
            debug!(
                "Replaced {discarded} photos of pin {key} with {count} from page {}",
                cursor.page
            );
        }
        self.publish(CacheEvent::AlbumReplaced {
            pin: key.clone(),
            count,
        });
        Ok(())
    }
}
