//! Image downloads.
//!
//! Image addresses follow a fixed template,
//! `{photo_url}/{server}/{id}_{secret}_{size}.jpg`, so no lookup request is
//! needed before downloading.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;

use crate::config::Config;
use crate::error::{Result, SyncError};

/// Source of raw image bytes for a remote photo
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, server: &str, id: &str, secret: &str, size: &str) -> Result<Vec<u8>>;
}

/// Builds the image address, rejecting parts that would produce a malformed path
pub fn image_url(base: &str, server: &str, id: &str, secret: &str, size: &str) -> Result<String> {
    for (name, value) in [("server", server), ("id", id), ("secret", secret), ("size", size)] {
        if value.trim().is_empty() {
            return Err(SyncError::Validation(format!("image {name} is empty")));
        }
        if value.contains('/') {
            return Err(SyncError::Validation(format!(
                "image {name} '{value}' contains a path separator"
            )));
        }
    }

    Ok(format!(
        "{}/{server}/{id}_{secret}_{size}.jpg",
        base.trim_end_matches('/')
    ))
}

/// Downloads images over HTTP. Holds no mutable state, so one instance can
/// serve any number of concurrent fetches.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: Client,
    photo_url: String,
}

impl HttpImageFetcher {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            photo_url: config.photo_url.clone(),
        }
    }
}

#[async_trait]
impl ImageSource for HttpImageFetcher {
    async fn fetch(&self, server: &str, id: &str, secret: &str, size: &str) -> Result<Vec<u8>> {
        let url = image_url(&self.photo_url, server, id, secret, size)?;
        debug!("Downloading image {url}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::network(format!("GET {url}"), e))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::network(format!("reading body of {url}"), e))?;

        Ok(bytes.to_vec())
    }
}
