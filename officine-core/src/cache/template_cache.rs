//! `src/cache/template_cache.rs`
//! ============================================================================
//! # Template Cache
//!
//! Loads markup fragments by URL through the configured [`Fetcher`] and keeps
//! them for the life of the process:
//! - no TTL, capacity bound only
//! - concurrent loads of one URL share a single fetch
//! - failed loads are never cached
//! - `${path.to.value}` placeholder substitution against a JSON context

use std::{
    sync::{
        Arc, LazyLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use moka::future::Cache;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::TemplateCacheConfig,
    dom::{Document, NodeId},
    error::{AppError, AppResult},
    fetch::Fetcher,
};

/// Cache key: the URL exactly as requested.
pub type TemplateKey = Arc<str>;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(.*?)\}").expect("valid placeholder pattern"));

/// Cache statistics for monitoring and debugging
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_exceptions: AtomicU64,
    total_load_time_ns: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[expect(clippy::cast_possible_truncation, reason = "Expected accuracy")]
    pub fn record_load(&self, duration: Duration, success: bool) {
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.total_load_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);

        if !success {
            self.load_exceptions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let loads: u64 = self.loads.load(Ordering::Relaxed);
        let total_load_time_ns: u64 = self.total_load_time_ns.load(Ordering::Relaxed);

        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads,
            load_exceptions: self.load_exceptions.load(Ordering::Relaxed),
            average_load_penalty: if loads > 0 {
                Duration::from_nanos(total_load_time_ns / loads)
            } else {
                Duration::ZERO
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub load_exceptions: u64,
    pub average_load_penalty: Duration,
}

impl CacheStatsSnapshot {
    #[expect(clippy::cast_precision_loss, reason = "Expected precision loss")]
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Clone)]
pub struct TemplateCache {
    inner: Cache<TemplateKey, Arc<str>>,
    fetcher: Arc<dyn Fetcher>,
    config: TemplateCacheConfig,
    stats: Arc<CacheStats>,
}

impl std::fmt::Debug for TemplateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateCache")
            .field("entries", &self.inner.entry_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TemplateCache {
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>, config: TemplateCacheConfig) -> Self {
        let inner: Cache<TemplateKey, Arc<str>> =
            Cache::builder().max_capacity(config.max_capacity).build();

        Self {
            inner,
            fetcher,
            config,
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Cached text for `url` without fetching.
    pub async fn get(&self, url: &str) -> Option<Arc<str>> {
        self.inner.get(url).await
    }

    /// Text of `url`, fetched on first use.
    ///
    /// A non-success response yields [`AppError::FetchStatus`] and leaves
    /// nothing behind in the cache; the next call fetches again.
    #[instrument(skip(self), fields(operation_type = "template_load"))]
    pub async fn load(&self, url: &str) -> AppResult<Arc<str>> {
        let key: TemplateKey = Arc::from(url);
        let fetcher: Arc<dyn Fetcher> = Arc::clone(&self.fetcher);
        let stats: Arc<CacheStats> = Arc::clone(&self.stats);
        let enable_stats: bool = self.config.enable_stats;
        let owned_url: String = url.to_string();

        let entry = self
            .inner
            .entry(key)
            .or_try_insert_with(async move {
                let started: Instant = Instant::now();
                let result: AppResult<String> = fetcher.fetch_text(&owned_url).await;
                if enable_stats {
                    stats.record_load(started.elapsed(), result.is_ok());
                }
                result.map(Arc::<str>::from)
            })
            .await
            .map_err(|e: Arc<AppError>| {
                warn!(
                    marker = "CACHE_OPERATION",
                    operation_type = "load_failed",
                    cache_key = %url,
                    error = %e,
                    "Template load failed"
                );
                (*e).clone()
            })?;

        if self.config.enable_stats {
            if entry.is_fresh() {
                self.stats.record_miss();
                debug!(
                    marker = "CACHE_OPERATION",
                    operation_type = "cache_miss",
                    cache_key = %url,
                    "Template fetched and cached"
                );
            } else {
                self.stats.record_hit();
            }
        }

        Ok(entry.into_value())
    }

    /// Replaces every `${path}` token with the dotted lookup of `path` in
    /// `data`. Unresolvable and `null` paths keep their token.
    pub fn render_string(template: &str, data: &Value) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures<'_>| {
                let whole: &str = caps.get(0).map_or("", |m| m.as_str());
                let path: &str = caps.get(1).map_or("", |m| m.as_str());
                match lookup(data, path) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => whole.to_string(),
                    Some(other) => other.to_string(),
                }
            })
            .into_owned()
    }

    /// [`render_string`](Self::render_string) against any serializable
    /// context.
    pub fn render_serialized<T: Serialize + ?Sized>(template: &str, data: &T) -> AppResult<String> {
        let value: Value = serde_json::to_value(data)?;
        Ok(Self::render_string(template, &value))
    }

    /// Loads `url`, renders it against `data` and writes the result into
    /// `target`, replacing its children or appending after them.
    pub async fn render_into(
        &self,
        url: &str,
        data: &Value,
        document: &Document,
        target: NodeId,
        replace: bool,
    ) -> AppResult<Vec<NodeId>> {
        let template: Arc<str> = self.load(url).await?;
        let rendered: String = Self::render_string(&template, data);

        let inserted: Vec<NodeId> = if replace {
            document.set_inner_html(target, &rendered)?
        } else {
            document.append_html(target, &rendered)?
        };

        info!("Template {url} inserted into {target}");
        Ok(inserted)
    }
}

fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |acc, segment| match acc {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;
    use serde_json::json;

    fn cache_with(fetcher: Arc<MemoryFetcher>) -> TemplateCache {
        TemplateCache::new(fetcher, TemplateCacheConfig::default())
    }

    #[test]
    fn test_render_substitutes_dotted_paths() {
        let data = json!({"a": {"b": "X"}, "n": 3, "items": ["zero", "one"]});
        assert_eq!(TemplateCache::render_string("${a.b}", &data), "X");
        assert_eq!(
            TemplateCache::render_string("<b>${n}</b> ${items.1}", &data),
            "<b>3</b> one"
        );
    }

    #[test]
    fn test_render_serialized_struct() {
        #[derive(Serialize)]
        struct Patient {
            nom: &'static str,
            doses: Vec<u32>,
        }
        let rendered = TemplateCache::render_serialized(
            "<p>${nom}: ${doses.1}</p>",
            &Patient { nom: "Durand", doses: vec![1, 2] },
        )
        .unwrap();
        assert_eq!(rendered, "<p>Durand: 2</p>");
    }

    #[test]
    fn test_render_keeps_unresolved_tokens() {
        let data = json!({"a": null});
        assert_eq!(TemplateCache::render_string("${missing}", &json!({})), "${missing}");
        assert_eq!(TemplateCache::render_string("${a}-${a.b}", &data), "${a}-${a.b}");
    }

    #[tokio::test]
    async fn test_second_load_is_served_from_cache() {
        let fetcher = Arc::new(MemoryFetcher::new().with_page("t.html", "<p>${x}</p>"));
        let cache = cache_with(Arc::clone(&fetcher));

        let first = cache.load("t.html").await.unwrap();
        let second = cache.load("t.html").await.unwrap();
        assert_eq!(&*first, "<p>${x}</p>");
        assert_eq!(first, second);
        assert_eq!(fetcher.request_count("t.html"), 1);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.loads), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let cache = cache_with(Arc::clone(&fetcher));

        let err = cache.load("missing.html").await.unwrap_err();
        assert!(matches!(err, AppError::FetchStatus { status: 404, .. }));
        assert!(cache.get("missing.html").await.is_none());

        fetcher.insert("missing.html", crate::fetch::FetchResponse::ok("late"));
        assert_eq!(&*cache.load("missing.html").await.unwrap(), "late");
        assert_eq!(fetcher.request_count("missing.html"), 2);
    }

    #[tokio::test]
    async fn test_render_into_replaces_or_appends() {
        let fetcher = Arc::new(MemoryFetcher::new().with_page("row.html", "<li>${name}</li>"));
        let cache = cache_with(fetcher);
        let doc = Document::parse(r#"<body><ul id="list"><li>old</li></ul></body>"#);
        let list = doc.get_element_by_id("list").unwrap();

        cache
            .render_into("row.html", &json!({"name": "a"}), &doc, list, false)
            .await
            .unwrap();
        assert_eq!(doc.inner_html(list), "<li>old</li><li>a</li>");

        cache
            .render_into("row.html", &json!({"name": "b"}), &doc, list, true)
            .await
            .unwrap();
        assert_eq!(doc.inner_html(list), "<li>b</li>");
    }
}
