//! Remote media catalog client
//!
//! The engine only ever talks to the catalog through the [`Catalog`] trait:
//! list the playable tracks of one collection, and open the raw audio bytes
//! of a single track. [`JellyfinCatalog`] implements it against a
//! Jellyfin-compatible server and performs the fail-fast startup checks
//! (auth, admin user, collection lookup).

use std::io;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use serde::Deserialize;
use tracing::info;

use crate::error::CatalogError;

/// Raw audio bytes of one track, as fetched from the catalog.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// One playable track. Immutable once fetched; metadata is opaque to the
/// engine and only used for logging and the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub duration_secs: Option<u64>,
}

impl Track {
    /// "artist1, artist2 - title" display form used in logs
    pub fn display_name(&self) -> String {
        if self.artists.is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.artists.join(", "), self.title)
        }
    }
}

/// Interface to the remote music library.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// List every playable track of the configured collection.
    async fn list_tracks(&self) -> Result<Vec<Track>, CatalogError>;

    /// Open the raw (undecoded) audio byte stream of one track.
    async fn open_audio(&self, track_id: &str) -> Result<ByteStream, CatalogError>;
}

#[derive(Deserialize)]
struct JellyfinUser {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Policy")]
    policy: JellyfinUserPolicy,
}

#[derive(Deserialize)]
struct JellyfinUserPolicy {
    #[serde(rename = "IsAdministrator")]
    is_administrator: bool,
}

#[derive(Deserialize)]
struct JellyfinView {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Deserialize)]
struct JellyfinItem {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Artists", default)]
    artists: Vec<String>,
    #[serde(rename = "RunTimeTicks")]
    run_time_ticks: Option<u64>,
}

#[derive(Deserialize)]
struct JellyfinItemList<T> {
    #[serde(rename = "Items")]
    items: Vec<T>,
}

// Jellyfin durations are in 100ns ticks.
const TICKS_PER_SECOND: u64 = 10_000_000;

impl From<JellyfinItem> for Track {
    fn from(item: JellyfinItem) -> Self {
        Track {
            id: item.id,
            title: item.name,
            artists: item.artists,
            duration_secs: item.run_time_ticks.map(|t| t / TICKS_PER_SECOND),
        }
    }
}

/// Jellyfin-compatible catalog client bound to one user and one collection.
pub struct JellyfinCatalog {
    base_url: String,
    api_token: String,
    user_id: String,
    collection_id: String,
    client: reqwest::Client,
}

impl JellyfinCatalog {
    /// Connect to the server and resolve the administrator user and the
    /// named collection. Fails fast so a bad URL, key or collection name
    /// halts startup instead of surfacing mid-broadcast.
    pub async fn connect(
        base_url: &str,
        api_token: &str,
        collection_name: &str,
    ) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CatalogError::Unreachable(e.to_string()))?;

        let mut catalog = Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            user_id: String::new(),
            collection_id: String::new(),
            client,
        };

        let users: Vec<JellyfinUser> = catalog.get_json("/Users", &[]).await?;
        let admin = users
            .into_iter()
            .find(|u| u.policy.is_administrator)
            .ok_or_else(|| CatalogError::AuthFailed("no administrator user visible".into()))?;
        info!(user = %admin.name, "resolved catalog user");
        catalog.user_id = admin.id;

        let views: JellyfinItemList<JellyfinView> = catalog
            .get_json(&format!("/Users/{}/Views", catalog.user_id), &[])
            .await?;
        let collection = views
            .items
            .into_iter()
            .find(|v| v.name == collection_name)
            .ok_or_else(|| CatalogError::CollectionNotFound(collection_name.to_string()))?;
        info!(collection = %collection.name, id = %collection.id, "resolved collection");
        catalog.collection_id = collection.id;

        Ok(catalog)
    }

    fn auth_header(&self) -> String {
        format!("MediaBrowser Token=\"{}\"", self.api_token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, CatalogError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| CatalogError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(CatalogError::AuthFailed(format!("{} returned {}", path, status)));
        }
        if !status.is_success() {
            return Err(CatalogError::BadResponse(format!("{} returned {}", path, status)));
        }

        response
            .json()
            .await
            .map_err(|e| CatalogError::BadResponse(e.to_string()))
    }
}

#[async_trait]
impl Catalog for JellyfinCatalog {
    async fn list_tracks(&self) -> Result<Vec<Track>, CatalogError> {
        let list: JellyfinItemList<JellyfinItem> = self
            .get_json(
                &format!("/Users/{}/Items", self.user_id),
                &[
                    ("ParentId", self.collection_id.as_str()),
                    ("Filters", "IsNotFolder"),
                    ("Recursive", "true"),
                    ("MediaTypes", "Audio"),
                    ("ExcludeLocationTypes", "Virtual"),
                    ("CollapseBoxSetItems", "false"),
                ],
            )
            .await?;

        Ok(list.items.into_iter().map(Track::from).collect())
    }

    async fn open_audio(&self, track_id: &str) -> Result<ByteStream, CatalogError> {
        let url = format!("{}/Items/{}/Download", self.base_url, track_id);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| CatalogError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound(track_id.to_string()));
        }
        if !status.is_success() {
            return Err(CatalogError::BadResponse(format!(
                "download of {} returned {}",
                track_id, status
            )));
        }

        let stream = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        Ok(Box::pin(stream))
    }
}
