//! Fetches fragments from a remote origin.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::{debug, info};

use super::{FetchResponse, Fetcher};
use crate::error::{AppError, AppResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: Url,
}

impl HttpFetcher {
    /// Relative URLs are resolved against `base_url`, which is treated as a
    /// directory.
    pub fn new(base_url: &str) -> AppResult<Self> {
        let normalized: String = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url: Url = Url::parse(&normalized)
            .map_err(|e| AppError::invalid_path(base_url, format!("invalid base URL: {e}")))?;

        let client: Client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("officine-core/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Other(format!("Failed to create HTTP client: {e}")))?;

        info!("Created HttpFetcher for base_url: {base_url}");
        Ok(Self { client, base_url })
    }

    pub fn resolve(&self, url: &str) -> AppResult<Url> {
        self.base_url
            .join(url)
            .map_err(|e| AppError::invalid_path(url, e.to_string()))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> AppResult<FetchResponse> {
        let target: Url = self.resolve(url)?;
        debug!("GET {target}");

        let response = self
            .client
            .get(target)
            .send()
            .await
            .map_err(|e| AppError::transport(url, e.to_string()))?;

        let status: u16 = response.status().as_u16();
        let body: String = response
            .text()
            .await
            .map_err(|e| AppError::transport(url, e.to_string()))?;

        Ok(FetchResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_urls_resolve_under_base_directory() {
        let fetcher = HttpFetcher::new("https://officine.example/app").unwrap();
        assert_eq!(
            fetcher.resolve("views/a.html").unwrap().as_str(),
            "https://officine.example/app/views/a.html"
        );
        assert_eq!(
            fetcher.resolve("/partials/nav.html").unwrap().as_str(),
            "https://officine.example/partials/nav.html"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        assert!(matches!(
            HttpFetcher::new("not a url"),
            Err(AppError::InvalidPath { .. })
        ));
    }
}
