//! Source library client (section 6): the three methods the engine
//! needs from Audiobookshelf-style source library service, plus a
//! concrete client built in the same request-building style as the
//! original `AbsClient` this crate descends from — base URL + bearer
//! auth + plain `reqwest` GET/POST, JSON-decoded by hand rather than
//! through an OpenAPI-generated surface.

use async_trait::async_trait;
use serde::Deserialize;

use crate::identifiers;
use crate::model::{BookFormat, SeriesRef, SourceBook};

#[derive(Debug, Clone, Copy, Default)]
pub struct LibraryStats {
    pub total: u64,
    pub in_progress: u64,
    pub completed: u64,
}

#[async_trait]
pub trait SourceLibraryClient: Send + Sync {
    async fn get_user_library_books(&self, user: &str) -> anyhow::Result<Vec<SourceBook>>;

    /// Optional; callers degrade gracefully (log + skip) on `Err`.
    async fn get_library_stats(&self, user: &str) -> anyhow::Result<LibraryStats>;

    async fn test_connection(&self) -> anyhow::Result<bool>;
}

/// Strips a literal leading `Bearer ` (any case/spacing) from a raw
/// token, warning since tokens should be configured bare (section 6).
pub fn strip_bearer_prefix(token: &str) -> String {
    let trimmed = token.trim();
    let lower = trimmed.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("bearer") {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            tracing::warn!("configured token had a leading 'Bearer' prefix; stripping it");
            let stripped = &trimmed["bearer".len()..];
            return stripped.trim_start().to_string();
        }
    }
    trimmed.to_string()
}

#[derive(Clone, Debug)]
pub struct AbsSourceClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl AbsSourceClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: strip_bearer_prefix(&token.into()),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("Authorization", format!("Bearer {}", self.token))
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    async fn fetch_library_ids(&self, user_id: &str) -> anyhow::Result<Vec<String>> {
        let _ = user_id;
        let resp = self
            .request(reqwest::Method::GET, "/api/libraries")
            .send()
            .await?
            .error_for_status()?;
        let body: LibrariesResponse = resp.json().await?;
        Ok(body.libraries.into_iter().map(|l| l.id).collect())
    }
}

#[async_trait]
impl SourceLibraryClient for AbsSourceClient {
    #[tracing::instrument(skip(self), fields(user_id = %user))]
    async fn get_user_library_books(&self, user: &str) -> anyhow::Result<Vec<SourceBook>> {
        let library_ids = self.fetch_library_ids(user).await?;
        let mut books = Vec::new();
        for library_id in library_ids {
            let path = format!("/api/libraries/{library_id}/items?minified=0");
            let resp = self
                .request(reqwest::Method::GET, &path)
                .send()
                .await?
                .error_for_status()?;
            let body: LibraryItemsResponse = resp.json().await?;
            books.extend(body.results.into_iter().filter_map(to_source_book));
        }
        Ok(books)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user))]
    async fn get_library_stats(&self, user: &str) -> anyhow::Result<LibraryStats> {
        let path = format!("/api/me/stats?user={user}");
        let resp = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await?
            .error_for_status()?;
        let body: MeStatsResponse = resp.json().await?;
        Ok(LibraryStats {
            total: body.total_items.unwrap_or(0),
            in_progress: body.in_progress.unwrap_or(0),
            completed: body.completed.unwrap_or(0),
        })
    }

    async fn test_connection(&self) -> anyhow::Result<bool> {
        let resp = self.request(reqwest::Method::GET, "/status").send().await;
        Ok(resp.map(|r| r.status().is_success()).unwrap_or(false))
    }
}

#[derive(Debug, Deserialize)]
struct LibrariesResponse {
    libraries: Vec<LibraryRef>,
}

#[derive(Debug, Deserialize)]
struct LibraryRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct LibraryItemsResponse {
    results: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
struct MeStatsResponse {
    #[serde(rename = "totalItems")]
    total_items: Option<u64>,
    #[serde(rename = "itemsInProgress")]
    in_progress: Option<u64>,
    #[serde(rename = "itemsFinished")]
    completed: Option<u64>,
}

/// Flattens an Audiobookshelf library-item record into a `SourceBook`,
/// using the same direct -> media -> media.metadata precedence as the
/// rest of the crate's field extraction.
fn to_source_book(item: serde_json::Value) -> Option<SourceBook> {
    let id = item.get("id")?.as_str()?.to_string();
    let title = identifiers::extract_string_field(&item, "title")?;
    let author = identifiers::extract_string_field(&item, "author").unwrap_or_default();
    let narrator = identifiers::extract_string_field(&item, "narrator");
    let asin = identifiers::extract_string_field(&item, "asin");
    let isbn = identifiers::extract_string_field(&item, "isbn");

    let series = item
        .get("media")
        .and_then(|m| m.get("metadata"))
        .and_then(|m| m.get("series"))
        .and_then(|s| s.as_array())
        .and_then(|arr| arr.first())
        .and_then(|s| {
            let name = s.get("name")?.as_str()?.to_string();
            let sequence = s
                .get("sequence")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<f64>().ok())
                .or_else(|| s.get("sequence").and_then(|v| v.as_f64()));
            Some(SeriesRef { name, sequence })
        });

    let published_year = identifiers::extract_string_field(&item, "publishedYear")
        .and_then(|y| y.parse::<i32>().ok());

    let duration_seconds = item
        .get("media")
        .and_then(|m| m.get("duration"))
        .and_then(|v| v.as_f64());
    let pages = identifiers::extract_string_field(&item, "pages").and_then(|p| p.parse::<u32>().ok());

    let progress = item.get("userMediaProgress");
    let progress_percentage = progress
        .and_then(|p| p.get("progress"))
        .and_then(|v| v.as_f64())
        .map(|p| p * 100.0)
        .unwrap_or(0.0);
    let is_finished = progress
        .and_then(|p| p.get("isFinished"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let current_time_seconds = progress
        .and_then(|p| p.get("currentTime"))
        .and_then(|v| v.as_f64());

    let started_at = progress
        .and_then(|p| p.get("startedAt"))
        .and_then(|v| v.as_i64())
        .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms));
    let last_listened_at = progress
        .and_then(|p| p.get("lastUpdate"))
        .and_then(|v| v.as_i64())
        .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms));

    let media_type = item
        .get("mediaType")
        .and_then(|v| v.as_str())
        .unwrap_or("audiobook");

    Some(SourceBook {
        id,
        title,
        author,
        narrator,
        series,
        published_year,
        asin,
        isbn,
        duration_seconds,
        pages,
        current_time_seconds,
        progress_percentage,
        is_finished,
        started_at,
        last_listened_at,
        format_hint: BookFormat::from_hint(media_type),
    })
}
