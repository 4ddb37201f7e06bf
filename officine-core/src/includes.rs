//! src/includes.rs
//! ============================================================================
//! # Include Resolver
//!
//! Replaces every element carrying the include attribute (`data-include` by
//! default) with the markup its URL names. All directives found in one pass
//! are fetched concurrently; the pass is then repeated on the same root for
//! directives the inserted markup brought in, up to `max_depth` passes.
//!
//! A failed directive degrades to an inline error marker and never stops its
//! siblings from resolving.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::{
    cache::template_cache::TemplateCache,
    config::IncludeConfig,
    dom::{Document, NodeId, Selector, markup},
    error::{AppError, AppResult},
};

/// Outcome of one [`IncludeResolver::resolve`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IncludeReport {
    pub resolved: usize,
    pub failed: usize,
    pub passes: u32,
    pub depth_exceeded: bool,
}

#[derive(Debug, Clone)]
pub struct IncludeResolver {
    templates: TemplateCache,
    config: IncludeConfig,
}

impl IncludeResolver {
    pub fn new(templates: TemplateCache, config: IncludeConfig) -> Self {
        Self { templates, config }
    }

    pub fn config(&self) -> &IncludeConfig {
        &self.config
    }

    pub async fn resolve(&self, document: &Document, root: NodeId) -> IncludeReport {
        self.resolve_from(document, root, 0).await
    }

    /// Resolves directives under `root`, counting passes from `depth`.
    pub async fn resolve_from(
        &self,
        document: &Document,
        root: NodeId,
        depth: u32,
    ) -> IncludeReport {
        let selector: Selector = Selector::attr(&self.config.attribute);
        let mut report: IncludeReport = IncludeReport::default();
        let mut depth: u32 = depth;

        loop {
            let directives: Vec<NodeId> = document.query_all(root, &selector);
            if directives.is_empty() {
                break;
            }
            if depth >= self.config.max_depth {
                warn!(
                    "Include depth limit ({}) reached under {root}, {} directive(s) left unresolved",
                    self.config.max_depth,
                    directives.len()
                );
                report.depth_exceeded = true;
                break;
            }

            let fetches = directives.into_iter().map(|node| {
                let url: String = document
                    .attr(node, &self.config.attribute)
                    .unwrap_or_default();
                async move {
                    let result: AppResult<Arc<str>> = if url.trim().is_empty() {
                        Err(AppError::invalid_path(url.as_str(), "empty include directive"))
                    } else {
                        self.templates.load(&url).await
                    };
                    (node, url, result)
                }
            });

            for (node, url, result) in join_all(fetches).await {
                // an earlier replacement in this pass may have removed it
                if !document.contains(node) {
                    debug!("Include {url} dropped with its enclosing fragment");
                    continue;
                }
                match result {
                    Ok(body) => match document.replace_with_html(node, &body) {
                        Ok(_) => report.resolved += 1,
                        Err(e) => {
                            warn!("Could not splice include {url}: {e}");
                            report.failed += 1;
                        }
                    },
                    Err(e) => {
                        warn!("Include {url} failed: {e}");
                        report.failed += 1;
                        if let Err(e) = document.replace_with_html(node, &error_marker(&url)) {
                            warn!("Could not mark failed include {url}: {e}");
                        }
                    }
                }
            }

            depth += 1;
            report.passes += 1;
        }

        if report.resolved + report.failed > 0 {
            info!(
                "Includes under {root}: {} resolved, {} failed in {} pass(es)",
                report.resolved, report.failed, report.passes
            );
        }
        report
    }
}

fn error_marker(url: &str) -> String {
    let url = markup::escape_attr(url);
    format!(
        r#"<div class="include-error" data-include-error="{url}" role="alert">Erreur : impossible de charger {url}</div>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemplateCacheConfig;
    use crate::fetch::MemoryFetcher;

    fn resolver(fetcher: MemoryFetcher) -> (IncludeResolver, Arc<MemoryFetcher>) {
        let fetcher = Arc::new(fetcher);
        let templates = TemplateCache::new(fetcher.clone(), TemplateCacheConfig::default());
        (IncludeResolver::new(templates, IncludeConfig::default()), fetcher)
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let (resolver, _) = resolver(
            MemoryFetcher::new()
                .with_page("p/one.html", "<p id=\"one\">1</p>")
                .with_page("p/three.html", "<p id=\"three\">3</p>"),
        );
        let doc = Document::parse(
            r#"<body><main id="root">
                <div data-include="p/one.html"></div>
                <div data-include="p/missing.html"></div>
                <div data-include="p/three.html"></div>
            </main></body>"#,
        );
        let root = doc.get_element_by_id("root").unwrap();

        let report = resolver.resolve(&doc, root).await;
        assert_eq!((report.resolved, report.failed), (2, 1));
        assert!(doc.get_element_by_id("one").is_some());
        assert!(doc.get_element_by_id("three").is_some());
        let markers = doc.query_all(root, &Selector::attr("data-include-error"));
        assert_eq!(markers.len(), 1);
        assert_eq!(
            doc.attr(markers[0], "data-include-error").as_deref(),
            Some("p/missing.html")
        );
        assert!(doc.query_all(root, &Selector::attr("data-include")).is_empty());
    }

    #[tokio::test]
    async fn test_nested_includes_resolve_in_later_passes() {
        let (resolver, _) = resolver(
            MemoryFetcher::new()
                .with_page("outer.html", r#"<section><div data-include="inner.html"></div></section>"#)
                .with_page("inner.html", r#"<span id="leaf">leaf</span>"#),
        );
        let doc = Document::parse(r#"<body><div data-include="outer.html"></div></body>"#);

        let report = resolver.resolve(&doc, doc.body()).await;
        assert_eq!(report.resolved, 2);
        assert_eq!(report.passes, 2);
        assert!(doc.get_element_by_id("leaf").is_some());
    }

    #[tokio::test]
    async fn test_self_inclusion_stops_at_depth_limit() {
        let (resolver, fetcher) = resolver(
            MemoryFetcher::new().with_page("loop.html", r#"<div data-include="loop.html"></div>"#),
        );
        let doc = Document::parse(r#"<body><div data-include="loop.html"></div></body>"#);

        let report = resolver.resolve(&doc, doc.body()).await;
        assert!(report.depth_exceeded);
        assert_eq!(report.passes, 5);
        // the template cache serves every pass after the first
        assert_eq!(fetcher.request_count("loop.html"), 1);
    }

    #[tokio::test]
    async fn test_starting_depth_counts_toward_limit() {
        let (resolver, fetcher) = resolver(MemoryFetcher::new().with_page("a.html", "<p>a</p>"));
        let doc = Document::parse(r#"<body><div data-include="a.html"></div></body>"#);

        let report = resolver.resolve_from(&doc, doc.body(), 5).await;
        assert!(report.depth_exceeded);
        assert_eq!(report.passes, 0);
        assert!(fetcher.requests().is_empty());
    }
}
