//! Domain types shared by the search client, the cache and the coordinator.
//!
//! A `Pin` is identified by its coordinate. Because floating point values are
//! neither `Eq` nor `Hash`, every lookup goes through a `PinKey`, the
//! coordinate rendered at a fixed precision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fractional digits kept when deriving a pin key from a coordinate
const KEY_PRECISION: usize = 6;

/// A point on the map in signed decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// The stable identity of a pin placed at this coordinate
    pub fn key(&self) -> PinKey {
        PinKey(format!(
            "{}_{}",
            key_component(self.latitude),
            key_component(self.longitude)
        ))
    }
}

/// Fixed-precision rendering where anything that rounds to zero reads `0.000000`
fn key_component(value: f64) -> String {
    let text = format!("{value:.prec$}", prec = KEY_PRECISION);
    match text.strip_prefix('-') {
        Some(magnitude) if magnitude.bytes().all(|b| b == b'0' || b == b'.') => {
            magnitude.to_string()
        }
        _ => text,
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.latitude, self.longitude)
    }
}

/// Hashable identity of a pin. Safe to use as a file or directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinKey(String);

impl PinKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A saved point of interest with its own photo album
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    pub coordinate: Coordinate,
    pub title: String,
}

impl Pin {
    pub fn new(latitude: f64, longitude: f64, title: impl Into<String>) -> Self {
        Self {
            coordinate: Coordinate::new(latitude, longitude),
            title: title.into(),
        }
    }

    pub fn key(&self) -> PinKey {
        self.coordinate.key()
    }
}

/// A locally cached photo belonging to exactly one pin
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoRecord {
    /// Remote photo id
    pub id: String,
    /// Owning pin
    pub pin: PinKey,
    /// Server shard the image lives on
    pub server: String,
    pub secret: String,
    pub title: String,
    /// Downloaded image bytes, absent until fetched
    pub image: Option<Vec<u8>>,
    /// Set when the record is created; defines grid order
    pub created_at: DateTime<Utc>,
}

impl PhotoRecord {
    /// Creates a record for a descriptor, stamping the creation time
    pub fn from_descriptor(
        pin: PinKey,
        descriptor: &PhotoDescriptor,
        image: Option<Vec<u8>>,
    ) -> Self {
        Self {
            id: descriptor.id.clone(),
            pin,
            server: descriptor.server.clone(),
            secret: descriptor.secret.clone(),
            title: descriptor.title.clone(),
            image,
            created_at: Utc::now(),
        }
    }
}

/// Which page of the remote search a pin currently holds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    /// Page number whose items are cached (1-based, 0 if nothing was ever fetched)
    pub page: u32,
    /// Page count the server reported for that fetch
    pub total_pages: u32,
    /// Item count the server reported for that fetch
    pub total: u32,
}

impl PageCursor {
    pub fn from_page(page: &AlbumPage) -> Self {
        Self {
            page: page.page,
            total_pages: page.pages,
            total: page.total,
        }
    }

    /// The page a refresh should request.
    ///
    /// Advances by one and wraps back to 1 once the current page reaches the
    /// reported page count. With no page count known there is nothing to
    /// advance through, so page 1 is requested again.
    pub fn next_page(&self) -> u32 {
        if self.total_pages == 0 || self.page >= self.total_pages {
            1
        } else {
            self.page + 1
        }
    }
}

/// One remote search result item
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhotoDescriptor {
    pub id: String,
    pub owner: String,
    pub secret: String,
    pub server: String,
    pub farm: i64,
    pub title: String,
    /// Size variants the server advertised for this photo (e.g. `q`, `m`).
    /// Empty when the response carried no size extras.
    pub sizes: Vec<String>,
}

impl PhotoDescriptor {
    /// Picks the preferred size variant when it is available (or availability
    /// is unknown), otherwise the first advertised one.
    pub fn pick_size<'a>(&'a self, preferred: &'a str) -> &'a str {
        if self.sizes.is_empty() || self.sizes.iter().any(|s| s == preferred) {
            preferred
        } else {
            &self.sizes[0]
        }
    }
}

/// One successful search response. Never persisted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlbumPage {
    pub page: u32,
    pub pages: u32,
    pub per_page: u32,
    pub total: u32,
    pub photos: Vec<PhotoDescriptor>,
}

impl AlbumPage {
    pub fn is_empty(&self) -> bool {
        self.total == 0 || self.photos.is_empty()
    }
}
