//! Retrieval of markup fragments.
//!
//! Everything the runtime displays arrives through a [`Fetcher`]: routes,
//! included partials and templates. A non-success status is an ordinary
//! response; only an unreachable resource is an error.

use async_trait::async_trait;

use crate::error::{AppError, AppResult};

pub mod http;
pub mod memory;
pub mod static_dir;

pub use http::HttpFetcher;
pub use memory::MemoryFetcher;
pub use static_dir::StaticDirFetcher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> AppResult<FetchResponse>;

    /// Body of a successful response; any other status is
    /// [`AppError::FetchStatus`].
    async fn fetch_text(&self, url: &str) -> AppResult<String> {
        let response: FetchResponse = self.fetch(url).await?;
        if response.is_success() {
            Ok(response.body)
        } else {
            Err(AppError::fetch_status(url, response.status))
        }
    }
}
