// File: src/status/metadata.rs

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::{trace, warn};
use url::Url;

use radiobot_common::models::now_playing::{FeedEntry, NowPlaying};
use crate::status::MetadataSource;
use crate::Error;

/// Polls the station's now-playing feed over HTTP.
pub struct HttpMetadataSource {
    client: reqwest::Client,
    url: Url,
}

impl HttpMetadataSource {
    pub fn new(url: &str) -> Result<Self, Error> {
        let url = Url::parse(url)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn fetch(&self) -> Result<NowPlaying, Error> {
        // The feed sits behind a cache; a fresh query string defeats it.
        let cache_buster = Utc::now().timestamp_millis().to_string();
        let body: Value = self
            .client
            .get(self.url.clone())
            .query(&[("_", cache_buster.as_str())])
            .header(ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_feed(body)
    }
}

/// Keeps the last song and the last DJ entry of the feed array. Anything
/// that is neither is skipped.
pub fn parse_feed(body: Value) -> Result<NowPlaying, Error> {
    let Value::Array(items) = body else {
        warn!("[Metadata] unexpected feed shape: {body}");
        return Err(Error::Parse("now-playing feed is not an array".into()));
    };

    let entries = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<FeedEntry>(item) {
            Ok(entry) => Some(entry),
            Err(e) => {
                trace!("[Metadata] skipping feed item: {e}");
                None
            }
        });
    Ok(NowPlaying::from_entries(entries))
}
