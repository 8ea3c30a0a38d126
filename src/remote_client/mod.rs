//! Remote book-tracking service client (section 6): the mutations and
//! searches the matcher/reconciler need, plus a concrete GraphQL-over-
//! `reqwest` client in the same request-building style as the source
//! client — one POST endpoint, a query string + JSON variables, bearer
//! auth stripped of any literal `Bearer ` prefix.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::model::{ApiResponseInfo, Edition};
use crate::source_client::strip_bearer_prefix;

#[derive(Debug, Clone, PartialEq)]
pub struct UserBook {
    pub user_book_id: i64,
    pub book_id: i64,
    pub edition_id: i64,
    pub progress_percent: f64,
}

#[async_trait]
pub trait RemoteBookService: Send + Sync {
    async fn search_editions_by_asin(&self, asin: &str) -> anyhow::Result<Vec<Edition>>;
    async fn search_editions_by_isbn(&self, isbn: &str) -> anyhow::Result<Vec<Edition>>;
    async fn search_by_title_author(
        &self,
        title: &str,
        author: &str,
        limit: u32,
    ) -> anyhow::Result<Vec<Edition>>;
    async fn get_user_book(&self, book_id: i64) -> anyhow::Result<Option<UserBook>>;
    async fn update_progress(
        &self,
        user_book_id: i64,
        edition_id: i64,
        progress_percent: f64,
        position_seconds: Option<f64>,
        position_pages: Option<u32>,
    ) -> anyhow::Result<ApiResponseInfo>;
    async fn mark_complete(
        &self,
        user_book_id: i64,
        edition_id: i64,
        completed_at: DateTime<Utc>,
    ) -> anyhow::Result<ApiResponseInfo>;
    async fn add_book_to_library(
        &self,
        book_id: i64,
        edition_id: i64,
        initial_progress: f64,
    ) -> anyhow::Result<(i64, ApiResponseInfo)>;
    async fn test_connection(&self) -> anyhow::Result<bool>;
}

#[derive(Clone, Debug)]
pub struct HardcoverClient {
    endpoint: String,
    token: String,
    client: reqwest::Client,
}

impl HardcoverClient {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            token: strip_bearer_prefix(&token.into()),
            client,
        })
    }

    #[tracing::instrument(skip(self, query, variables))]
    async fn graphql(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let started = std::time::Instant::now();
        let resp = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?
            .error_for_status()?;
        let body: GraphQlResponse = resp.json().await?;
        tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "graphql round trip");
        if let Some(errors) = body.errors {
            if !errors.is_empty() {
                anyhow::bail!("hardcover graphql errors: {errors:?}");
            }
        }
        body.data.ok_or_else(|| anyhow::anyhow!("hardcover graphql response had no data"))
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<serde_json::Value>,
    errors: Option<Vec<serde_json::Value>>,
}

const SEARCH_EDITIONS_QUERY: &str = r#"
query SearchEditions($identifier: String!) {
  editions(where: {identifier: {_eq: $identifier}}) {
    id
    book_id
    reading_format
    pages
    audio_seconds
    release_year
    activity_count
  }
}
"#;

const SEARCH_TITLE_AUTHOR_QUERY: &str = r#"
query SearchByTitleAuthor($title: String!, $author: String!, $limit: Int!) {
  editions(where: {title: {_ilike: $title}, contributions: {author: {name: {_ilike: $author}}}}, limit: $limit) {
    id
    book_id
    reading_format
    pages
    audio_seconds
    release_year
    activity_count
  }
}
"#;

fn parse_editions(value: serde_json::Value) -> Vec<Edition> {
    value
        .get("editions")
        .and_then(|e| e.as_array())
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(parse_edition)
        .collect()
}

fn parse_edition(value: serde_json::Value) -> Option<Edition> {
    let edition_id = value.get("id")?.as_i64()?;
    let book_id = value.get("book_id")?.as_i64()?;
    let reading_format = value
        .get("reading_format")
        .and_then(|v| v.as_str())
        .map(String::from);
    let format = reading_format
        .as_deref()
        .map(crate::model::BookFormat::from_hint)
        .unwrap_or_default();
    Some(Edition {
        edition_id,
        book_id,
        format,
        audio_seconds: value.get("audio_seconds").and_then(|v| v.as_f64()),
        pages: value.get("pages").and_then(|v| v.as_u64()).map(|p| p as u32),
        release_year: value.get("release_year").and_then(|v| v.as_i64()).map(|y| y as i32),
        reading_format,
        contributions: Vec::new(),
        activity_count: value.get("activity_count").and_then(|v| v.as_u64()),
    })
}

#[async_trait]
impl RemoteBookService for HardcoverClient {
    async fn search_editions_by_asin(&self, asin: &str) -> anyhow::Result<Vec<Edition>> {
        let data = self
            .graphql(SEARCH_EDITIONS_QUERY, json!({ "identifier": asin }))
            .await?;
        Ok(parse_editions(data))
    }

    async fn search_editions_by_isbn(&self, isbn: &str) -> anyhow::Result<Vec<Edition>> {
        let data = self
            .graphql(SEARCH_EDITIONS_QUERY, json!({ "identifier": isbn }))
            .await?;
        Ok(parse_editions(data))
    }

    async fn search_by_title_author(
        &self,
        title: &str,
        author: &str,
        limit: u32,
    ) -> anyhow::Result<Vec<Edition>> {
        let data = self
            .graphql(
                SEARCH_TITLE_AUTHOR_QUERY,
                json!({ "title": format!("%{title}%"), "author": format!("%{author}%"), "limit": limit }),
            )
            .await?;
        Ok(parse_editions(data))
    }

    async fn get_user_book(&self, book_id: i64) -> anyhow::Result<Option<UserBook>> {
        let query = r#"
            query GetUserBook($bookId: bigint!) {
              user_books(where: {book_id: {_eq: $bookId}}, limit: 1) {
                id
                book_id
                edition_id
                progress
              }
            }
        "#;
        let data = self.graphql(query, json!({ "bookId": book_id })).await?;
        let row = data
            .get("user_books")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .cloned();
        Ok(row.and_then(|row| {
            Some(UserBook {
                user_book_id: row.get("id")?.as_i64()?,
                book_id: row.get("book_id")?.as_i64()?,
                edition_id: row.get("edition_id")?.as_i64()?,
                progress_percent: row.get("progress").and_then(|v| v.as_f64()).unwrap_or(0.0),
            })
        }))
    }

    #[tracing::instrument(skip(self), fields(user_book_id, edition_id))]
    async fn update_progress(
        &self,
        user_book_id: i64,
        edition_id: i64,
        progress_percent: f64,
        position_seconds: Option<f64>,
        position_pages: Option<u32>,
    ) -> anyhow::Result<ApiResponseInfo> {
        let started = std::time::Instant::now();
        let mutation = r#"
            mutation UpdateProgress($userBookId: bigint!, $editionId: bigint!, $progress: float8!, $seconds: float8, $pages: Int) {
              update_user_book_reads(
                where: {user_book_id: {_eq: $userBookId}},
                _set: {edition_id: $editionId, progress: $progress, progress_seconds: $seconds, progress_pages: $pages}
              ) {
                affected_rows
              }
            }
        "#;
        let result = self
            .graphql(
                mutation,
                json!({
                    "userBookId": user_book_id,
                    "editionId": edition_id,
                    "progress": progress_percent,
                    "seconds": position_seconds,
                    "pages": position_pages,
                }),
            )
            .await;
        Ok(ApiResponseInfo {
            success: result.is_ok(),
            status: Some(if result.is_ok() { 200 } else { 500 }),
            duration_s: started.elapsed().as_secs_f64(),
        })
    }

    #[tracing::instrument(skip(self), fields(user_book_id, edition_id))]
    async fn mark_complete(
        &self,
        user_book_id: i64,
        edition_id: i64,
        completed_at: DateTime<Utc>,
    ) -> anyhow::Result<ApiResponseInfo> {
        let started = std::time::Instant::now();
        let mutation = r#"
            mutation MarkComplete($userBookId: bigint!, $editionId: bigint!, $completedAt: timestamptz!) {
              update_user_books(
                where: {id: {_eq: $userBookId}},
                _set: {edition_id: $editionId, status_id: 3, completed_at: $completedAt}
              ) {
                affected_rows
              }
            }
        "#;
        let result = self
            .graphql(
                mutation,
                json!({
                    "userBookId": user_book_id,
                    "editionId": edition_id,
                    "completedAt": completed_at.to_rfc3339(),
                }),
            )
            .await;
        Ok(ApiResponseInfo {
            success: result.is_ok(),
            status: Some(if result.is_ok() { 200 } else { 500 }),
            duration_s: started.elapsed().as_secs_f64(),
        })
    }

    async fn add_book_to_library(
        &self,
        book_id: i64,
        edition_id: i64,
        initial_progress: f64,
    ) -> anyhow::Result<(i64, ApiResponseInfo)> {
        let started = std::time::Instant::now();
        let mutation = r#"
            mutation AddBook($bookId: bigint!, $editionId: bigint!, $progress: float8!) {
              insert_user_books_one(object: {book_id: $bookId, edition_id: $editionId, progress: $progress, status_id: 2}) {
                id
              }
            }
        "#;
        let data = self
            .graphql(
                mutation,
                json!({ "bookId": book_id, "editionId": edition_id, "progress": initial_progress }),
            )
            .await?;
        let user_book_id = data
            .get("insert_user_books_one")
            .and_then(|v| v.get("id"))
            .and_then(|v| v.as_i64())
            .ok_or_else(|| anyhow::anyhow!("hardcover add_book_to_library returned no id"))?;
        Ok((
            user_book_id,
            ApiResponseInfo {
                success: true,
                status: Some(200),
                duration_s: started.elapsed().as_secs_f64(),
            },
        ))
    }

    async fn test_connection(&self) -> anyhow::Result<bool> {
        let query = "query Me { me { id } }";
        Ok(self.graphql(query, json!({})).await.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_edition_list_from_graphql_shape() {
        let value = json!({
            "editions": [
                {"id": 1, "book_id": 10, "reading_format": "audiobook", "audio_seconds": 3600.0, "activity_count": 500}
            ]
        });
        let editions = parse_editions(value);
        assert_eq!(editions.len(), 1);
        assert_eq!(editions[0].edition_id, 1);
        assert_eq!(editions[0].format, crate::model::BookFormat::Audiobook);
    }

    #[test]
    fn parse_editions_skips_malformed_entries() {
        let value = json!({ "editions": [{"book_id": 10}] });
        assert!(parse_editions(value).is_empty());
    }
}
