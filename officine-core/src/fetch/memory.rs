//! In-memory fragment store. Records every request, in order.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{FetchResponse, Fetcher};
use crate::error::AppResult;

#[derive(Debug, Clone)]
struct Entry {
    response: FetchResponse,
    delay: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct MemoryFetcher {
    entries: Mutex<HashMap<String, Entry>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_page(self, url: &str, body: &str) -> Self {
        self.insert(url, FetchResponse::ok(body));
        self
    }

    #[must_use]
    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.insert(url, FetchResponse::status(status));
        self
    }

    /// Responses for `url` are held back by `delay`.
    #[must_use]
    pub fn with_delay(self, url: &str, delay: Duration) -> Self {
        if let Some(entry) = self.entries.lock().get_mut(url) {
            entry.delay = Some(delay);
        }
        self
    }

    pub fn insert(&self, url: &str, response: FetchResponse) {
        self.entries.lock().insert(
            url.to_string(),
            Entry {
                response,
                delay: None,
            },
        );
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|r| *r == url).count()
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> AppResult<FetchResponse> {
        self.requests.lock().push(url.to_string());
        let entry: Option<Entry> = self.entries.lock().get(url).cloned();

        match entry {
            Some(entry) => {
                if let Some(delay) = entry.delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(entry.response)
            }
            None => Ok(FetchResponse::status(404)),
        }
    }
}
