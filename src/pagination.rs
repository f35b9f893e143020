//! Provider-agnostic cursor over paginated APIs.
//!
//! A [`Cursor`] drives any page fetcher that takes an optional continuation
//! token and returns a JSON page. The token and the item list are located by
//! dot-separated paths into the page, so one cursor works for
//! `meta.next_token` style APIs as well as flat `next_cursor` ones.
//!
//! Pages are fetched by a background task and handed over through a bounded
//! channel, so at most one page is fetched ahead of the consumer.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::error::ConnectorError;

/// Default location of the continuation token.
pub const DEFAULT_NEXT_TOKEN_FIELD: &str = "meta.next_token";

/// Default location of the item list.
pub const DEFAULT_DATA_FIELD: &str = "data";

type PageFuture = Pin<Box<dyn Future<Output = Result<Value, ConnectorError>> + Send>>;
type PageFetcher = Arc<dyn Fn(Option<String>) -> PageFuture + Send + Sync>;

/// Stream of pages or items. Ends after the first error.
pub type PageStream = ReceiverStream<Result<Value, ConnectorError>>;

/// Follow a dot-separated `path` into `value`.
///
/// Returns `None` as soon as a segment is missing or the current value is
/// not an object.
pub fn extract_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

/// A usable continuation token: a non-empty string, or a number.
fn token_at(page: &Value, path: &str) -> Option<String> {
    match extract_path(page, path)? {
        Value::String(token) if !token.is_empty() => Some(token.clone()),
        Value::Number(token) => Some(token.to_string()),
        _ => None,
    }
}

/// Async cursor over a paginated call.
#[derive(Clone)]
pub struct Cursor {
    fetch: PageFetcher,
    next_token_field: String,
    data_field: String,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("next_token_field", &self.next_token_field)
            .field("data_field", &self.data_field)
            .finish_non_exhaustive()
    }
}

impl Cursor {
    /// Cursor over `fetch`, which receives `None` for the first page and the
    /// previous page's token afterwards.
    pub fn new<F, Fut>(fetch: F) -> Self
    where
        F: Fn(Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ConnectorError>> + Send + 'static,
    {
        Self {
            fetch: Arc::new(move |token| Box::pin(fetch(token))),
            next_token_field: DEFAULT_NEXT_TOKEN_FIELD.to_owned(),
            data_field: DEFAULT_DATA_FIELD.to_owned(),
        }
    }

    /// Dot-path of the continuation token in each page.
    #[must_use]
    pub fn next_token_field(mut self, path: impl Into<String>) -> Self {
        self.next_token_field = path.into();
        self
    }

    /// Dot-path of the item list in each page.
    #[must_use]
    pub fn data_field(mut self, path: impl Into<String>) -> Self {
        self.data_field = path.into();
        self
    }

    /// Raw pages, at most `limit` of them. Stops when a page carries no
    /// token, after a fetch error, or when the stream is dropped.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn pages(&self, limit: Option<usize>) -> PageStream {
        let (tx, rx) = mpsc::channel(1);
        let cursor = self.clone();
        tokio::spawn(async move {
            let mut token: Option<String> = None;
            let mut fetched: usize = 0;
            while limit.map_or(true, |limit| fetched < limit) {
                let page = match (cursor.fetch)(token.take()).await {
                    Ok(page) => page,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };
                fetched = fetched.saturating_add(1);
                token = token_at(&page, &cursor.next_token_field);
                debug!(page = fetched, has_next = token.is_some(), "page fetched");
                if tx.send(Ok(page)).await.is_err() || token.is_none() {
                    return;
                }
            }
        });
        ReceiverStream::new(rx)
    }

    /// Individual items across pages, at most `limit` of them. A page whose
    /// data field is missing or not an array contributes nothing.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn items(&self, limit: Option<usize>) -> PageStream {
        let (tx, rx) = mpsc::channel(1);
        if limit == Some(0) {
            return ReceiverStream::new(rx);
        }
        let mut pages = self.pages(None);
        let data_field = self.data_field.clone();
        tokio::spawn(async move {
            let mut yielded: usize = 0;
            while let Some(page) = pages.next().await {
                let page = match page {
                    Ok(page) => page,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };
                let items = match extract_path(&page, &data_field) {
                    Some(Value::Array(items)) => items.clone(),
                    _ => Vec::new(),
                };
                for item in items {
                    if tx.send(Ok(item)).await.is_err() {
                        return;
                    }
                    yielded = yielded.saturating_add(1);
                    if limit.is_some_and(|limit| yielded >= limit) {
                        return;
                    }
                }
            }
        });
        ReceiverStream::new(rx)
    }

    /// Collect up to `limit` items.
    ///
    /// # Errors
    ///
    /// The first fetch error.
    pub async fn collect_items(&self, limit: Option<usize>) -> Result<Vec<Value>, ConnectorError> {
        let mut items = self.items(limit);
        let mut collected = Vec::new();
        while let Some(item) = items.next().await {
            collected.push(item?);
        }
        Ok(collected)
    }
}
