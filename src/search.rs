//! Paged photo search around a coordinate.
//!
//! `FlickrSearchClient` issues one `flickr.photos.search` request per call and
//! decodes the JSON envelope into an `AlbumPage`. Radius and page size are
//! configuration, not call parameters. There are no retries here; callers
//! decide what to do with a failure.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::model::{AlbumPage, Coordinate, PhotoDescriptor};

/// Extras requested so the response advertises which sizes exist
const SIZE_EXTRAS: &str = "url_q,url_m";

/// Source of paged photo search results
#[async_trait]
pub trait PhotoSearch: Send + Sync {
    /// Fetches `page` (1-based) of the photos around `coordinate`
    async fn search(&self, coordinate: Coordinate, page: u32) -> Result<AlbumPage>;
}

/// HTTP client for the Flickr REST search endpoint
#[derive(Debug, Clone)]
pub struct FlickrSearchClient {
    client: Client,
    api_url: String,
    api_key: String,
    radius_km: u32,
    per_page: u32,
}

impl FlickrSearchClient {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            radius_km: config.radius_km,
            per_page: config.per_page,
        }
    }

    fn query(&self, coordinate: Coordinate, page: u32) -> Vec<(&'static str, String)> {
        vec![
            ("method", "flickr.photos.search".to_string()),
            ("api_key", self.api_key.clone()),
            ("lat", coordinate.latitude.to_string()),
            ("lon", coordinate.longitude.to_string()),
            ("radius", self.radius_km.to_string()),
            ("page", page.to_string()),
            ("per_page", self.per_page.to_string()),
            ("extras", SIZE_EXTRAS.to_string()),
            ("format", "json".to_string()),
            ("nojsoncallback", "1".to_string()),
        ]
    }
}

#[async_trait]
impl PhotoSearch for FlickrSearchClient {
    async fn search(&self, coordinate: Coordinate, page: u32) -> Result<AlbumPage> {
        if page == 0 {
            return Err(SyncError::Validation(
                "search pages are 1-based, got page 0".to_string(),
            ));
        }

        debug!("Searching photos around {coordinate}, page {page}");
        let context = format!("photo search around {coordinate} page {page}");

        let response = self
            .client
            .get(&self.api_url)
            .query(&self.query(coordinate, page))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::network(context.clone(), e))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::network(context, e))?;

        let album = decode_search_response(&body)?;
        debug!(
            "Page {}/{} around {coordinate}: {} of {} photos",
            album.page,
            album.pages,
            album.photos.len(),
            album.total
        );
        Ok(album)
    }
}

/// Top-level response. On failure the service sends `stat: "fail"` plus a code
/// and message instead of `photos`.
#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    stat: Option<String>,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    photos: Option<WirePhotos>,
}

#[derive(Debug, Deserialize)]
struct WirePhotos {
    #[serde(deserialize_with = "lenient_u32")]
    page: u32,
    #[serde(deserialize_with = "lenient_u32")]
    pages: u32,
    #[serde(deserialize_with = "lenient_u32")]
    perpage: u32,
    #[serde(deserialize_with = "lenient_u32")]
    total: u32,
    #[serde(rename = "photo", alias = "items", default)]
    items: Vec<WirePhoto>,
}

#[derive(Debug, Deserialize)]
struct WirePhoto {
    id: String,
    #[serde(default)]
    owner: String,
    secret: String,
    server: String,
    #[serde(default)]
    farm: i64,
    #[serde(default)]
    title: String,
    /// `url_q`, `ispublic` and any other extras
    #[serde(flatten)]
    extras: HashMap<String, serde_json::Value>,
}

impl From<WirePhoto> for PhotoDescriptor {
    fn from(wire: WirePhoto) -> Self {
        let mut sizes: Vec<String> = wire
            .extras
            .iter()
            .filter(|(_, value)| value.as_str().is_some_and(|s| !s.is_empty()))
            .filter_map(|(key, _)| key.strip_prefix("url_").map(str::to_string))
            .collect();
        sizes.sort();

        Self {
            id: wire.id,
            owner: wire.owner,
            secret: wire.secret,
            server: wire.server,
            farm: wire.farm,
            title: wire.title,
            sizes,
        }
    }
}

/// Accepts a count either as a JSON number or as a decimal string
fn lenient_u32<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u32),
        Text(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Decodes a search response body into an `AlbumPage`
pub fn decode_search_response(body: &[u8]) -> Result<AlbumPage> {
    let envelope: SearchEnvelope = serde_json::from_slice(body).map_err(SyncError::Decode)?;

    if envelope.stat.as_deref() == Some("fail") {
        return Err(SyncError::Api {
            code: envelope.code.unwrap_or_default(),
            message: envelope.message.unwrap_or_default(),
        });
    }

    let photos = envelope.photos.ok_or_else(|| {
        SyncError::Decode(<serde_json::Error as serde::de::Error>::missing_field(
            "photos",
        ))
    })?;

    Ok(AlbumPage {
        page: photos.page,
        pages: photos.pages,
        per_page: photos.perpage,
        total: photos.total,
        photos: photos.items.into_iter().map(PhotoDescriptor::from).collect(),
    })
}
