//! In-process stand-ins for the photo service and the store.
//!
//! Used by the unit and integration tests to script search pages, image
//! failures, storage failures and slow responses without touching the
//! network.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::error::{Result, StoreError, SyncError};
use crate::image::ImageSource;
use crate::model::{AlbumPage, Coordinate, PageCursor, PhotoDescriptor, PhotoRecord, Pin, PinKey};
use crate::search::PhotoSearch;
use crate::store::{MemoryStore, PhotoStore, StoreResult};

/// Builds the page a search for `page` would return from a result set of
/// `total` photos split into pages of `per_page`. Photo ids are `p{page}_{n}`.
pub fn album_page(page: u32, total: u32, per_page: u32) -> AlbumPage {
    let pages = total.div_ceil(per_page.max(1));
    let on_page = if page == 0 || page > pages {
        0
    } else {
        per_page.min(total - (page - 1) * per_page)
    };

    AlbumPage {
        page,
        pages,
        per_page,
        total,
        photos: (0..on_page)
            .map(|n| PhotoDescriptor {
                id: format!("p{page}_{n}"),
                owner: "mock@N00".to_string(),
                secret: format!("secret{n}"),
                server: "65535".to_string(),
                farm: 66,
                title: format!("Mock photo {n} of page {page}"),
                sizes: vec!["q".to_string()],
            })
            .collect(),
    }
}

/// Scripted photo search that records every request
#[derive(Default)]
pub struct MockSearch {
    total: AtomicUsize,
    per_page: AtomicUsize,
    overrides: Mutex<HashMap<u32, AlbumPage>>,
    offline: AtomicBool,
    calls: Mutex<Vec<(Coordinate, u32)>>,
    gate: Option<Arc<Semaphore>>,
}

impl MockSearch {
    /// A result set of `total` photos served `per_page` at a time
    pub fn new(total: u32, per_page: u32) -> Self {
        Self {
            total: AtomicUsize::new(total as usize),
            per_page: AtomicUsize::new(per_page as usize),
            ..Default::default()
        }
    }

    /// Every search waits for a permit on `gate` before answering
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Serve `album` verbatim whenever its page is requested
    pub fn serve(&self, album: AlbumPage) {
        if let Ok(mut overrides) = self.overrides.lock() {
            overrides.insert(album.page, album);
        }
    }

    /// Changes the size of the server-side result set
    pub fn set_total(&self, total: u32) {
        self.total.store(total as usize, Ordering::SeqCst);
    }

    /// While offline every search fails with a network error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Pages requested so far, in order
    pub fn requested_pages(&self) -> Vec<u32> {
        self.calls
            .lock()
            .map(|c| c.iter().map(|(_, page)| *page).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PhotoSearch for MockSearch {
    async fn search(&self, coordinate: Coordinate, page: u32) -> Result<AlbumPage> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((coordinate, page));
        }

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| SyncError::network("mock search gate", e))?;
            permit.forget();
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::network(
                format!("mock search around {coordinate}"),
                std::io::Error::new(std::io::ErrorKind::NotConnected, "network is unreachable"),
            ));
        }

        if let Some(album) = self.overrides.lock().ok().and_then(|o| o.get(&page).cloned()) {
            return Ok(album);
        }

        Ok(album_page(
            page,
            self.total.load(Ordering::SeqCst) as u32,
            self.per_page.load(Ordering::SeqCst) as u32,
        ))
    }
}

/// Image source returning `jpeg:<id>` for every photo, except the ids told to fail
#[derive(Default)]
pub struct MockImages {
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl MockImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Makes downloads of these photo ids fail with a 404-style network error
    pub fn fail_ids<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut failing) = self.failing.lock() {
            failing.extend(ids.into_iter().map(Into::into));
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Bytes the mock serves for a photo id
    pub fn bytes_for(id: &str) -> Vec<u8> {
        format!("jpeg:{id}").into_bytes()
    }
}

#[async_trait]
impl ImageSource for MockImages {
    async fn fetch(&self, server: &str, id: &str, secret: &str, size: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        crate::image::image_url("https://mock.invalid", server, id, secret, size)?;

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| SyncError::network("mock image gate", e))?;
            permit.forget();
        }

        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(id))
            .unwrap_or_default();
        if failing {
            return Err(SyncError::network(
                format!("GET {server}/{id}_{secret}_{size}.jpg"),
                std::io::Error::new(std::io::ErrorKind::NotFound, "404 Not Found"),
            ));
        }

        Ok(Self::bytes_for(id))
    }
}

/// Memory store whose writes can be switched to fail
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    broken: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared switch; set to true to make every write fail
    pub fn switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.broken)
    }

    fn check(&self) -> StoreResult<()> {
        if self.broken.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("disk full".to_string()))
        } else {
            Ok(())
        }
    }
}

impl PhotoStore for FlakyStore {
    fn pins(&self) -> Vec<Pin> {
        self.inner.pins()
    }

    fn pin(&self, key: &PinKey) -> Option<Pin> {
        self.inner.pin(key)
    }

    fn create_pin(&mut self, pin: Pin) -> StoreResult<bool> {
        self.check()?;
        self.inner.create_pin(pin)
    }

    fn delete_pin(&mut self, key: &PinKey) -> StoreResult<bool> {
        self.check()?;
        self.inner.delete_pin(key)
    }

    fn fetch_photos(&self, key: &PinKey) -> StoreResult<Vec<PhotoRecord>> {
        self.inner.fetch_photos(key)
    }

    fn photo_count(&self, key: &PinKey) -> usize {
        self.inner.photo_count(key)
    }

    fn create_photo(&mut self, record: PhotoRecord) -> StoreResult<()> {
        self.check()?;
        self.inner.create_photo(record)
    }

    fn delete_photos_where(
        &mut self,
        key: &PinKey,
        predicate: &dyn Fn(&PhotoRecord) -> bool,
    ) -> StoreResult<usize> {
        self.check()?;
        self.inner.delete_photos_where(key, predicate)
    }

    fn cursor(&self, key: &PinKey) -> Option<PageCursor> {
        self.inner.cursor(key)
    }

    fn set_cursor(&mut self, key: &PinKey, cursor: PageCursor) -> StoreResult<()> {
        self.check()?;
        self.inner.set_cursor(key, cursor)
    }

    fn save(&mut self) -> StoreResult<()> {
        self.check()
    }
}
