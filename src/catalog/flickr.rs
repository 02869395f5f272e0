//! Flickr REST implementation of [`CatalogApi`].
//!
//! Every call is a GET against `services/rest/` with `format=json` and
//! `nojsoncallback=1`. Flickr reports most failures as HTTP 200 with
//! `{"stat": "fail", "code": N, "message": ...}`, so the JSON envelope is
//! checked before the payload is decoded.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::{
    CatalogApi, CatalogError, Collection, CollectionKind, ContentStream, MediaItem, MediaKind,
    Page, Variant,
};
use crate::limiter::parse_retry_after;

pub const DEFAULT_ENDPOINT: &str = "https://api.flickr.com/services/rest/";
const PER_PAGE: u32 = 500;
const ITEM_EXTRAS: &str = "media,original_format";
const API_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// Flickr error codes shared across methods.
const CODE_NOT_FOUND: i64 = 1;
const CODE_PERMISSION_DENIED: i64 = 2;
const CODE_SERVICE_UNAVAILABLE: i64 = 105;
const CODE_WRITE_UNAVAILABLE: i64 = 106;

pub struct FlickrCatalog {
    http: Client,
    endpoint: String,
    api_key: String,
    user_id: String,
}

impl std::fmt::Debug for FlickrCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlickrCatalog")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"********")
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl FlickrCatalog {
    pub fn new(api_key: &str, user_id: &str) -> Result<Self, reqwest::Error> {
        Self::with_endpoint(DEFAULT_ENDPOINT, api_key, user_id)
    }

    pub fn with_endpoint(endpoint: &str, api_key: &str, user_id: &str) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(concat!("flickrpd-rs/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            user_id: user_id.to_string(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, &str)],
    ) -> Result<T, CatalogError> {
        tracing::debug!(method, ?params, "Flickr API call");
        let response = self
            .http
            .get(&self.endpoint)
            .timeout(API_TIMEOUT)
            .query(&[
                ("method", method),
                ("api_key", self.api_key.as_str()),
                ("format", "json"),
                ("nojsoncallback", "1"),
            ])
            .query(params)
            .send()
            .await
            .map_err(|e| CatalogError::network(method, e))?;

        let response = check_status(response, method)?;
        let body = response
            .bytes()
            .await
            .map_err(|e| CatalogError::network(method, e))?;
        let value: Value = serde_json::from_slice(&body).map_err(|source| CatalogError::Decode {
            context: method.to_string(),
            source,
        })?;
        check_envelope(&value, method)?;
        serde_json::from_value(value).map_err(|source| CatalogError::Decode {
            context: method.to_string(),
            source,
        })
    }
}

/// Map a non-success HTTP status to a catalog error.
fn check_status(response: Response, context: &str) -> Result<Response, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let err = match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            CatalogError::Throttled {
                context: context.to_string(),
                retry_after,
            }
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => CatalogError::NotFound(context.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            CatalogError::Forbidden(context.to_string())
        }
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => CatalogError::Server {
            context: context.to_string(),
            status: s.as_u16(),
        },
        s => CatalogError::Api {
            context: context.to_string(),
            code: i64::from(s.as_u16()),
            message: s.canonical_reason().unwrap_or("unexpected status").to_string(),
        },
    };
    Err(err)
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    stat: String,
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

fn check_envelope(value: &Value, method: &str) -> Result<(), CatalogError> {
    let envelope = Envelope::deserialize(value).map_err(|source| CatalogError::Decode {
        context: method.to_string(),
        source,
    })?;
    if envelope.stat != "fail" {
        return Ok(());
    }
    let context = format!("{method}: {}", envelope.message);
    Err(match envelope.code {
        CODE_NOT_FOUND => CatalogError::NotFound(context),
        CODE_PERMISSION_DENIED => CatalogError::Forbidden(context),
        CODE_SERVICE_UNAVAILABLE | CODE_WRITE_UNAVAILABLE => CatalogError::Server {
            context,
            status: 503,
        },
        code => CatalogError::Api {
            context: method.to_string(),
            code,
            message: envelope.message,
        },
    })
}

/// Flickr serializes counters and dimensions as numbers or strings
/// depending on the method.
fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_opt_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Default, Deserialize)]
struct TextContent {
    #[serde(rename = "_content", default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct PhotosetListResponse {
    photosets: PhotosetList,
}

#[derive(Debug, Deserialize)]
struct PhotosetList {
    #[serde(default, deserialize_with = "lenient_u64")]
    page: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pages: u64,
    #[serde(default)]
    photoset: Vec<RawPhotoset>,
}

#[derive(Debug, Deserialize)]
struct RawPhotoset {
    id: String,
    #[serde(default)]
    title: TextContent,
    #[serde(default, deserialize_with = "lenient_opt_u64")]
    photos: Option<u64>,
    #[serde(default, deserialize_with = "lenient_opt_u64")]
    videos: Option<u64>,
}

impl From<RawPhotoset> for Collection {
    fn from(raw: RawPhotoset) -> Self {
        Collection {
            id: raw.id,
            title: raw.title.content,
            kind: CollectionKind::Manual,
            photo_count: raw.photos,
            video_count: raw.videos,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PhotosetPhotosResponse {
    photoset: PhotoList,
}

#[derive(Debug, Deserialize)]
struct PeoplePhotosResponse {
    photos: PhotoList,
}

#[derive(Debug, Deserialize)]
struct PhotoList {
    #[serde(default, deserialize_with = "lenient_u64")]
    page: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pages: u64,
    #[serde(default)]
    photo: Vec<RawPhoto>,
}

#[derive(Debug, Deserialize)]
struct RawPhoto {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    media: String,
    #[serde(default)]
    originalformat: Option<String>,
}

impl From<RawPhoto> for MediaItem {
    fn from(raw: RawPhoto) -> Self {
        MediaItem {
            id: raw.id,
            title: raw.title,
            kind: if raw.media == "video" {
                MediaKind::Video
            } else {
                MediaKind::Photo
            },
            format: raw.originalformat,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SizesResponse {
    sizes: SizeList,
}

#[derive(Debug, Deserialize)]
struct SizeList {
    #[serde(default)]
    size: Vec<RawSize>,
}

#[derive(Debug, Deserialize)]
struct RawSize {
    label: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    width: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    height: u64,
    source: String,
    #[serde(default)]
    media: String,
}

impl From<RawSize> for Variant {
    fn from(raw: RawSize) -> Self {
        // Older responses omit `media`; video renditions live under /play/.
        let is_video = raw.media == "video"
            || (raw.media.is_empty()
                && (raw.source.contains("/play/") || raw.label.to_ascii_lowercase().contains("video")));
        Variant {
            label: raw.label,
            width: u32::try_from(raw.width).unwrap_or(u32::MAX),
            height: u32::try_from(raw.height).unwrap_or(u32::MAX),
            url: raw.source,
            size: None,
            media: if is_video {
                MediaKind::Video
            } else {
                MediaKind::Photo
            },
        }
    }
}

fn into_page<R, T: From<R>>(raw: Vec<R>, page: u64, pages: u64, requested: u32) -> Page<T> {
    Page {
        items: raw.into_iter().map(T::from).collect(),
        page: u32::try_from(page).ok().filter(|p| *p > 0).unwrap_or(requested),
        pages: u32::try_from(pages).unwrap_or(u32::MAX),
    }
}

#[async_trait]
impl CatalogApi for FlickrCatalog {
    async fn list_collections(&self, page: u32) -> Result<Page<Collection>, CatalogError> {
        let page_str = page.to_string();
        let per_page = PER_PAGE.to_string();
        let resp: PhotosetListResponse = self
            .call(
                "flickr.photosets.getList",
                &[
                    ("user_id", self.user_id.as_str()),
                    ("page", page_str.as_str()),
                    ("per_page", per_page.as_str()),
                ],
            )
            .await?;
        let list = resp.photosets;
        Ok(into_page(list.photoset, list.page, list.pages, page))
    }

    async fn list_collection_items(
        &self,
        collection_id: &str,
        page: u32,
    ) -> Result<Page<MediaItem>, CatalogError> {
        let page_str = page.to_string();
        let per_page = PER_PAGE.to_string();
        let resp: PhotosetPhotosResponse = self
            .call(
                "flickr.photosets.getPhotos",
                &[
                    ("photoset_id", collection_id),
                    ("user_id", self.user_id.as_str()),
                    ("extras", ITEM_EXTRAS),
                    ("page", page_str.as_str()),
                    ("per_page", per_page.as_str()),
                ],
            )
            .await?;
        let list = resp.photoset;
        Ok(into_page(list.photo, list.page, list.pages, page))
    }

    async fn list_all_items(&self, page: u32) -> Result<Page<MediaItem>, CatalogError> {
        let page_str = page.to_string();
        let per_page = PER_PAGE.to_string();
        let resp: PeoplePhotosResponse = self
            .call(
                "flickr.people.getPhotos",
                &[
                    ("user_id", self.user_id.as_str()),
                    ("extras", ITEM_EXTRAS),
                    ("page", page_str.as_str()),
                    ("per_page", per_page.as_str()),
                ],
            )
            .await?;
        let list = resp.photos;
        Ok(into_page(list.photo, list.page, list.pages, page))
    }

    async fn get_item_variants(&self, item_id: &str) -> Result<Vec<Variant>, CatalogError> {
        let resp: SizesResponse = self
            .call("flickr.photos.getSizes", &[("photo_id", item_id)])
            .await?;
        Ok(resp.sizes.size.into_iter().map(Variant::from).collect())
    }

    async fn open_content(&self, variant: &Variant) -> Result<ContentStream, CatalogError> {
        let context = format!("download {}", variant.url);
        let response = self
            .http
            .get(&variant.url)
            .send()
            .await
            .map_err(|e| CatalogError::network(context.clone(), e))?;
        let response = check_status(response, &context)?;
        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| CatalogError::network(context.clone(), e)))
            .boxed();
        Ok(ContentStream {
            content_length,
            body,
        })
    }
}
