//! Serves fragments from a local asset tree, the way the back office's
//! static file server does.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs as TokioFs;
use tracing::debug;

use super::{FetchResponse, Fetcher};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct StaticDirFetcher {
    root: PathBuf,
}

impl StaticDirFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a URL path onto the asset tree. Query strings and fragments are
    /// ignored; parent-directory segments are refused.
    pub fn resolve(&self, url: &str) -> AppResult<PathBuf> {
        let path: &str = url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_start_matches('/');
        if path.is_empty() {
            return Err(AppError::invalid_path(url, "empty path"));
        }

        let relative: &Path = Path::new(path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(AppError::invalid_path(url, "path escapes the asset root"));
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Fetcher for StaticDirFetcher {
    async fn fetch(&self, url: &str) -> AppResult<FetchResponse> {
        let path: PathBuf = match self.resolve(url) {
            Ok(path) => path,
            Err(AppError::InvalidPath { .. }) => return Ok(FetchResponse::status(400)),
            Err(e) => return Err(e),
        };

        match TokioFs::read_to_string(&path).await {
            Ok(body) => {
                debug!("served {url} from {}", path.display());
                Ok(FetchResponse::ok(body))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(FetchResponse::status(404)),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Ok(FetchResponse::status(403)),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}
