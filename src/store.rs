//! Persistent storage for pins, their page cursors and photo records.
//!
//! The cache only needs a narrow CRUD contract, captured by the `PhotoStore`
//! trait. Two implementations ship with the crate:
//!
//! - `MemoryStore` keeps everything in process memory.
//! - `YamlStore` keeps pins, cursors and record metadata in a YAML index file,
//!   and image bytes as individual files in a sibling directory
//!   (`<data file stem>_images/<pin key>/<photo id>.jpg`).
//!
//! Records of a pin are kept in insertion order.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::model::{PageCursor, PhotoRecord, Pin, PinKey};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// CRUD operations the photo cache relies on
pub trait PhotoStore: Send {
    /// All stored pins, ordered by key
    fn pins(&self) -> Vec<Pin>;

    fn pin(&self, key: &PinKey) -> Option<Pin>;

    /// Creates the pin if it does not exist yet. Returns true when created.
    fn create_pin(&mut self, pin: Pin) -> StoreResult<bool>;

    /// Deletes the pin together with its records and cursor.
    /// Returns false when the pin was not stored.
    fn delete_pin(&mut self, key: &PinKey) -> StoreResult<bool>;

    /// Records of a pin in insertion order
    fn fetch_photos(&self, key: &PinKey) -> StoreResult<Vec<PhotoRecord>>;

    /// Number of records stored for a pin, without loading them
    fn photo_count(&self, key: &PinKey) -> usize;

    /// Appends a record to the pin named by `record.pin`
    fn create_photo(&mut self, record: PhotoRecord) -> StoreResult<()>;

    /// Deletes the pin's records matching `predicate`, returning how many went away
    fn delete_photos_where(
        &mut self,
        key: &PinKey,
        predicate: &dyn Fn(&PhotoRecord) -> bool,
    ) -> StoreResult<usize>;

    fn cursor(&self, key: &PinKey) -> Option<PageCursor>;

    fn set_cursor(&mut self, key: &PinKey, cursor: PageCursor) -> StoreResult<()>;

    /// Makes pending changes durable
    fn save(&mut self) -> StoreResult<()>;
}

#[derive(Debug, Clone)]
struct MemoryPin {
    pin: Pin,
    cursor: Option<PageCursor>,
    photos: Vec<PhotoRecord>,
}

/// Store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    pins: BTreeMap<PinKey, MemoryPin>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_mut(&mut self, key: &PinKey) -> StoreResult<&mut MemoryPin> {
        self.pins
            .get_mut(key)
            .ok_or_else(|| StoreError::UnknownPin(key.clone()))
    }
}

impl PhotoStore for MemoryStore {
    fn pins(&self) -> Vec<Pin> {
        self.pins.values().map(|entry| entry.pin.clone()).collect()
    }

    fn pin(&self, key: &PinKey) -> Option<Pin> {
        self.pins.get(key).map(|entry| entry.pin.clone())
    }

    fn create_pin(&mut self, pin: Pin) -> StoreResult<bool> {
        let key = pin.key();
        if self.pins.contains_key(&key) {
            return Ok(false);
        }
        self.pins.insert(
            key,
            MemoryPin {
                pin,
                cursor: None,
                photos: Vec::new(),
            },
        );
        Ok(true)
    }

    fn delete_pin(&mut self, key: &PinKey) -> StoreResult<bool> {
        Ok(self.pins.remove(key).is_some())
    }

    fn fetch_photos(&self, key: &PinKey) -> StoreResult<Vec<PhotoRecord>> {
        Ok(self
            .pins
            .get(key)
            .map(|entry| entry.photos.clone())
            .unwrap_or_default())
    }

    fn photo_count(&self, key: &PinKey) -> usize {
        self.pins.get(key).map_or(0, |entry| entry.photos.len())
    }

    fn create_photo(&mut self, record: PhotoRecord) -> StoreResult<()> {
        let key = record.pin.clone();
        self.entry_mut(&key)?.photos.push(record);
        Ok(())
    }

    fn delete_photos_where(
        &mut self,
        key: &PinKey,
        predicate: &dyn Fn(&PhotoRecord) -> bool,
    ) -> StoreResult<usize> {
        let Some(entry) = self.pins.get_mut(key) else {
            return Ok(0);
        };
        let before = entry.photos.len();
        entry.photos.retain(|record| !predicate(record));
        Ok(before - entry.photos.len())
    }

    fn cursor(&self, key: &PinKey) -> Option<PageCursor> {
        self.pins.get(key).and_then(|entry| entry.cursor)
    }

    fn set_cursor(&mut self, key: &PinKey, cursor: PageCursor) -> StoreResult<()> {
        self.entry_mut(key)?.cursor = Some(cursor);
        Ok(())
    }

    fn save(&mut self) -> StoreResult<()> {
        Ok(())
    }
}

/// Photo metadata as written to the YAML index
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPhoto {
    id: String,
    server: String,
    secret: String,
    title: String,
    created_at: DateTime<Utc>,
    /// Image file relative to the images directory, absent if never downloaded
    image_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPin {
    pin: Pin,
    cursor: Option<PageCursor>,
    photos: Vec<StoredPhoto>,
}

/// On-disk layout of the YAML index
#[derive(Debug, Clone, Serialize, Deserialize)]
struct YamlIndex {
    last_updated: DateTime<Utc>,
    pins: BTreeMap<PinKey, StoredPin>,
}

impl Default for YamlIndex {
    fn default() -> Self {
        Self {
            last_updated: Utc::now(),
            pins: BTreeMap::new(),
        }
    }
}

/// Store backed by a YAML index file plus one file per downloaded image
#[derive(Debug)]
pub struct YamlStore {
    path: PathBuf,
    images_dir: PathBuf,
    index: YamlIndex,
}

impl YamlStore {
    /// Opens the store at `path`, starting empty when the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let images_dir = images_dir_for(&path);

        let index = if path.exists() {
            let yaml = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
            serde_yaml::from_str(&yaml)?
        } else {
            YamlIndex::default()
        };

        debug!(
            "Opened store {} with {} pins",
            path.display(),
            index.pins.len()
        );
        Ok(Self {
            path,
            images_dir,
            index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.index.last_updated
    }

    fn touch(&mut self) {
        self.index.last_updated = Utc::now();
    }

    fn image_path(&self, relative: &Path) -> PathBuf {
        self.images_dir.join(relative)
    }

    /// A record whose image file has gone missing comes back without bytes
    fn read_record(&self, key: &PinKey, stored: &StoredPhoto) -> StoreResult<PhotoRecord> {
        let image = match &stored.image_file {
            Some(relative) => {
                let path = self.image_path(relative);
                match fs::read(&path) {
                    Ok(bytes) => Some(bytes),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        warn!(
                            "Image of photo {} (pin {key}) is missing at {}",
                            stored.id,
                            path.display()
                        );
                        None
                    }
                    Err(e) => return Err(StoreError::io(&path, e)),
                }
            }
            None => None,
        };

        Ok(PhotoRecord {
            id: stored.id.clone(),
            pin: key.clone(),
            server: stored.server.clone(),
            secret: stored.secret.clone(),
            title: stored.title.clone(),
            image,
            created_at: stored.created_at,
        })
    }

    fn remove_image(&self, stored: &StoredPhoto) -> StoreResult<()> {
        if let Some(relative) = &stored.image_file {
            let path = self.image_path(relative);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }
        Ok(())
    }
}

/// `data/pinalbum.yaml` keeps its images under `data/pinalbum_images/`
fn images_dir_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pinalbum".to_string());
    path.with_file_name(format!("{stem}_images"))
}

impl PhotoStore for YamlStore {
    fn pins(&self) -> Vec<Pin> {
        self.index.pins.values().map(|p| p.pin.clone()).collect()
    }

    fn pin(&self, key: &PinKey) -> Option<Pin> {
        self.index.pins.get(key).map(|p| p.pin.clone())
    }

    fn create_pin(&mut self, pin: Pin) -> StoreResult<bool> {
        let key = pin.key();
        if self.index.pins.contains_key(&key) {
            return Ok(false);
        }
        self.index.pins.insert(
            key,
            StoredPin {
                pin,
                cursor: None,
                photos: Vec::new(),
            },
        );
        self.touch();
        Ok(true)
    }

    fn delete_pin(&mut self, key: &PinKey) -> StoreResult<bool> {
        let Some(stored) = self.index.pins.remove(key) else {
            return Ok(false);
        };
        for photo in &stored.photos {
            self.remove_image(photo)?;
        }
        let pin_dir = self.images_dir.join(key.as_str());
        if pin_dir.exists() {
            fs::remove_dir_all(&pin_dir).map_err(|e| StoreError::io(&pin_dir, e))?;
        }
        self.touch();
        Ok(true)
    }

    fn fetch_photos(&self, key: &PinKey) -> StoreResult<Vec<PhotoRecord>> {
        let Some(stored) = self.index.pins.get(key) else {
            return Ok(Vec::new());
        };
        stored
            .photos
            .iter()
            .map(|photo| self.read_record(key, photo))
            .collect()
    }

    fn photo_count(&self, key: &PinKey) -> usize {
        self.index.pins.get(key).map_or(0, |p| p.photos.len())
    }

    fn create_photo(&mut self, record: PhotoRecord) -> StoreResult<()> {
        let key = record.pin.clone();
        if !self.index.pins.contains_key(&key) {
            return Err(StoreError::UnknownPin(key));
        }

        let image_file = match &record.image {
            Some(bytes) => {
                let relative = Path::new(key.as_str()).join(format!("{}.jpg", record.id));
                let path = self.image_path(&relative);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
                }
                fs::write(&path, bytes).map_err(|e| StoreError::io(&path, e))?;
                Some(relative)
            }
            None => None,
        };

        let stored = StoredPhoto {
            id: record.id,
            server: record.server,
            secret: record.secret,
            title: record.title,
            created_at: record.created_at,
            image_file,
        };
        if let Some(pin) = self.index.pins.get_mut(&key) {
            pin.photos.push(stored);
        }
        self.touch();
        Ok(())
    }

    fn delete_photos_where(
        &mut self,
        key: &PinKey,
        predicate: &dyn Fn(&PhotoRecord) -> bool,
    ) -> StoreResult<usize> {
        let Some(stored) = self.index.pins.get(key) else {
            return Ok(0);
        };

        // Predicates see records without image bytes
        let mut doomed = Vec::new();
        for photo in &stored.photos {
            let record = PhotoRecord {
                id: photo.id.clone(),
                pin: key.clone(),
                server: photo.server.clone(),
                secret: photo.secret.clone(),
                title: photo.title.clone(),
                image: None,
                created_at: photo.created_at,
            };
            if predicate(&record) {
                doomed.push(photo.clone());
            }
        }
        if doomed.is_empty() {
            return Ok(0);
        }

        for photo in &doomed {
            self.remove_image(photo)?;
        }
        if let Some(pin) = self.index.pins.get_mut(key) {
            pin.photos
                .retain(|photo| !doomed.iter().any(|d| d.id == photo.id));
        }
        self.touch();
        Ok(doomed.len())
    }

    fn cursor(&self, key: &PinKey) -> Option<PageCursor> {
        self.index.pins.get(key).and_then(|p| p.cursor)
    }

    fn set_cursor(&mut self, key: &PinKey, cursor: PageCursor) -> StoreResult<()> {
        let pin = self
            .index
            .pins
            .get_mut(key)
            .ok_or_else(|| StoreError::UnknownPin(key.clone()))?;
        pin.cursor = Some(cursor);
        self.touch();
        Ok(())
    }

    fn save(&mut self) -> StoreResult<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
        }

        let yaml = serde_yaml::to_string(&self.index)?;

        // Write beside the target and rename so readers never see a torn file
        let tmp = self.path.with_extension("yaml.tmp");
        fs::write(&tmp, yaml).map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PhotoDescriptor;
    use tempfile::tempdir;

    fn record(pin: &Pin, id: &str, image: Option<&[u8]>) -> PhotoRecord {
        let descriptor = PhotoDescriptor {
            id: id.to_string(),
            server: "65535".to_string(),
            secret: format!("secret_{id}"),
            title: format!("Photo {id}"),
            ..Default::default()
        };
        PhotoRecord::from_descriptor(pin.key(), &descriptor, image.map(<[u8]>::to_vec))
    }

    fn exercise_crud(store: &mut dyn PhotoStore) -> StoreResult<()> {
        let pin = Pin::new(41.8781, -87.6298, "Chicago");
        let key = pin.key();

        assert!(store.create_pin(pin.clone())?);
        assert!(!store.create_pin(pin.clone())?);

        store.create_photo(record(&pin, "a", Some(b"aaa")))?;
        store.create_photo(record(&pin, "b", None))?;
        store.create_photo(record(&pin, "c", Some(b"ccc")))?;
        store.set_cursor(
            &key,
            PageCursor {
                page: 1,
                total_pages: 4,
                total: 100,
            },
        )?;

        let ids: Vec<_> = store
            .fetch_photos(&key)?
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);

        let removed = store.delete_photos_where(&key, &|r| r.id == "b")?;
        assert_eq!(removed, 1);
        assert_eq!(store.delete_photos_where(&key, &|r| r.id == "b")?, 0);
        assert_eq!(store.fetch_photos(&key)?.len(), 2);
        assert_eq!(store.cursor(&key).map(|c| c.total_pages), Some(4));

        Ok(())
    }

    #[test]
    fn test_memory_store_crud() -> StoreResult<()> {
        let mut store = MemoryStore::new();
        exercise_crud(&mut store)?;

        let key = Pin::new(41.8781, -87.6298, "").key();
        assert!(store.delete_pin(&key)?);
        assert!(store.fetch_photos(&key)?.is_empty());
        assert!(store.cursor(&key).is_none());
        Ok(())
    }

    #[test]
    fn test_photo_for_unknown_pin_is_rejected() {
        let mut store = MemoryStore::new();
        let pin = Pin::new(1.0, 2.0, "nowhere");

        let err = store.create_photo(record(&pin, "x", None)).unwrap_err();
        assert!(matches!(err, StoreError::UnknownPin(_)));
    }

    #[test]
    fn test_yaml_store_round_trip() -> StoreResult<()> {
        let temp_dir = tempdir().map_err(|e| StoreError::io("tempdir", e))?;
        let path = temp_dir.path().join("data/pinalbum.yaml");

        let mut store = YamlStore::open(&path)?;
        exercise_crud(&mut store)?;
        store.save()?;

        let reopened = YamlStore::open(&path)?;
        let key = Pin::new(41.8781, -87.6298, "").key();
        let photos = reopened.fetch_photos(&key)?;

        assert_eq!(reopened.pins().len(), 1);
        assert_eq!(reopened.pins()[0].title, "Chicago");
        assert_eq!(photos.len(), 2);
        assert_eq!(photos[0].id, "a");
        assert_eq!(photos[0].image.as_deref(), Some(&b"aaa"[..]));
        assert_eq!(photos[1].id, "c");
        assert_eq!(
            reopened.cursor(&key),
            Some(PageCursor {
                page: 1,
                total_pages: 4,
                total: 100
            })
        );

        // Deleted photo's image file is gone, kept ones remain
        let images = temp_dir.path().join("data/pinalbum_images").join(key.as_str());
        assert!(images.join("a.jpg").exists());
        assert!(!images.join("b.jpg").exists());
        Ok(())
    }

    #[test]
    fn test_yaml_store_delete_pin_removes_images() -> StoreResult<()> {
        let temp_dir = tempdir().map_err(|e| StoreError::io("tempdir", e))?;
        let path = temp_dir.path().join("pins.yaml");
        let pin = Pin::new(51.5074, -0.1278, "London");

        let mut store = YamlStore::open(&path)?;
        store.create_pin(pin.clone())?;
        store.create_photo(record(&pin, "x", Some(b"xxx")))?;
        store.save()?;

        let pin_dir = temp_dir.path().join("pins_images").join(pin.key().as_str());
        assert!(pin_dir.join("x.jpg").exists());

        assert!(store.delete_pin(&pin.key())?);
        store.save()?;
        assert!(!pin_dir.exists());
        assert!(YamlStore::open(&path)?.pins().is_empty());
        Ok(())
    }

    #[test]
    fn test_missing_image_file_is_not_fatal() -> StoreResult<()> {
        let temp_dir = tempdir().map_err(|e| StoreError::io("tempdir", e))?;
        let path = temp_dir.path().join("pins.yaml");
        let pin = Pin::new(35.6762, 139.6503, "Tokyo");
        let key = pin.key();

        let mut store = YamlStore::open(&path)?;
        store.create_pin(pin.clone())?;
        for id in ["p1_0", "p1_1", "p1_2"] {
            store.create_photo(record(&pin, id, Some(id.as_bytes())))?;
        }
        store.save()?;

        let lost = temp_dir
            .path()
            .join("pins_images")
            .join(key.as_str())
            .join("p1_0.jpg");
        fs::remove_file(&lost).map_err(|e| StoreError::io(&lost, e))?;

        let reopened = YamlStore::open(&path)?;
        let photos = reopened.fetch_photos(&key)?;

        assert_eq!(reopened.photo_count(&key), 3);
        assert_eq!(photos.len(), 3);
        assert_eq!(photos[0].id, "p1_0");
        assert!(photos[0].image.is_none());
        assert_eq!(photos[1].image.as_deref(), Some(&b"p1_1"[..]));
        Ok(())
    }

    #[test]
    fn test_photo_count_reads_only_the_index() -> StoreResult<()> {
        let temp_dir = tempdir().map_err(|e| StoreError::io("tempdir", e))?;
        let path = temp_dir.path().join("pins.yaml");
        let pin = Pin::new(-22.9068, -43.1729, "Rio");
        let key = pin.key();

        let mut store = YamlStore::open(&path)?;
        assert_eq!(store.photo_count(&key), 0);
        store.create_pin(pin.clone())?;
        store.create_photo(record(&pin, "a", Some(b"aaa")))?;
        store.create_photo(record(&pin, "b", None))?;

        // Even an unreadable images directory does not affect counting
        let images = temp_dir.path().join("pins_images");
        fs::remove_dir_all(&images).map_err(|e| StoreError::io(&images, e))?;
        assert_eq!(store.photo_count(&key), 2);

        let mut memory = MemoryStore::new();
        memory.create_pin(pin.clone())?;
        memory.create_photo(record(&pin, "a", None))?;
        assert_eq!(memory.photo_count(&key), 1);
        Ok(())
    }

    #[test]
    fn test_images_dir_naming() {
        assert_eq!(
            images_dir_for(Path::new("data/pinalbum.yaml")),
            PathBuf::from("data/pinalbum_images")
        );
    }
}
