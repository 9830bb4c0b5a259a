//! REST/JSON remote store client.
//!
//! Endpoints, relative to the base URL:
//!
//! ```text
//! POST   /collections/{c}/documents          {id, data, written_at}
//! PUT    /collections/{c}/documents/{id}     {data, written_at}
//! DELETE /collections/{c}/documents/{id}
//! GET    /collections/{c}/documents?since=..&limit=..  -> [RemoteDocument]
//! GET    /health
//! ```
//!
//! Collection names and document ids are sent as single percent-encoded
//! path segments, so ids may contain `/`, `?` or `#`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;

use super::{RemoteError, RemoteStore};
use crate::error::SyncError;
use crate::network::ConnectivityProbe;
use crate::types::RemoteDocument;

#[derive(Serialize)]
struct CreateRequest<'a> {
    id: &'a str,
    data: &'a Value,
    written_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct UpdateRequest<'a> {
    data: &'a Value,
    written_at: DateTime<Utc>,
}

/// Remote store reached over HTTP
#[derive(Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Result<Self, SyncError> {
        let raw = base_url.into();
        let base_url = Url::parse(raw.trim_end_matches('/'))
            .map_err(|e| SyncError::Config(format!("Invalid remote URL '{}': {}", raw, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::Config(format!(
                "Invalid remote URL '{}': not a hierarchical URL",
                raw
            )));
        }
        let client = Client::builder()
            .build()
            .map_err(|e| SyncError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url,
            api_token,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Base URL with `segments` appended, each percent-encoded on its own
    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base_url.clone();
        // Never fails: `new` rejects cannot-be-a-base URLs
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn documents_url(&self, collection: &str, id: Option<&str>) -> Url {
        let mut segments = vec!["collections", collection, "documents"];
        segments.extend(id);
        self.endpoint(segments)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))
    }
}

/// RFC 3339 at the precision of the watermark, so a document stamped inside
/// the watermark's millisecond is not fetched again
fn since_param(since: DateTime<Utc>) -> String {
    since.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Map a non-success status onto the remote error classes. Client errors
/// are rejections except request timeout and rate limiting.
fn classify_status(status: StatusCode, context: &str) -> RemoteError {
    let message = format!("{} failed: {}", context, status);
    if status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
    {
        RemoteError::Rejected(message)
    } else {
        RemoteError::Network(message)
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn create_document(
        &self,
        collection: &str,
        id: &str,
        data: &Value,
        written_at: DateTime<Utc>,
    ) -> Result<(), RemoteError> {
        let request = self
            .client
            .post(self.documents_url(collection, None))
            .json(&CreateRequest { id, data, written_at });
        let response = self.send(request).await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(classify_status(response.status(), "create"))
        }
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        data: &Value,
        written_at: DateTime<Utc>,
    ) -> Result<(), RemoteError> {
        let request = self
            .client
            .put(self.documents_url(collection, Some(id)))
            .json(&UpdateRequest { data, written_at });
        let response = self.send(request).await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(classify_status(response.status(), "update"))
        }
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        let request = self.client.delete(self.documents_url(collection, Some(id)));
        let response = self.send(request).await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(classify_status(status, "delete"))
        }
    }

    async fn query_updated_since(
        &self,
        collection: &str,
        since: Option<DateTime<Utc>>,
        page_size: usize,
    ) -> Result<Vec<RemoteDocument>, RemoteError> {
        let mut query = vec![("limit", page_size.to_string())];
        if let Some(since) = since {
            query.push(("since", since_param(since)));
        }
        let request = self.client.get(self.documents_url(collection, None)).query(&query);
        let response = self.send(request).await?;

        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| RemoteError::Network(format!("invalid query response: {}", e)))
        } else {
            Err(classify_status(response.status(), "query"))
        }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpRemote {
    async fn check(&self) -> bool {
        let request = self.client.get(self.endpoint(["health"]));
        match self.send(request).await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
