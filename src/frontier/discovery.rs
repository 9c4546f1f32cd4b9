//! Frontier discovery
//!
//! `SitemapDiscovery` walks a sitemap index: the index lists one sub-sitemap
//! per group, and each group's `urlset` lists locators with their `lastmod`.
//! Every request goes through the shared rate limiter.

use crate::crawler::{DocumentSource, RateLimiter, SourceResponse};
use crate::frontier::FrontierItem;
use crate::{HarvestError, Result};
use std::future::Future;
use std::sync::Arc;
use sxd_document::parser;
use sxd_xpath::{Context, Factory, Value};

/// Enumerates the current frontier
pub trait DiscoverySource: Send + Sync {
    fn discover(&self) -> impl Future<Output = Result<Vec<FrontierItem>>> + Send;
}

/// A frontier that is already known, e.g. loaded from the store
#[derive(Debug, Clone, Default)]
pub struct StaticFrontier {
    items: Vec<FrontierItem>,
}

impl StaticFrontier {
    pub fn new(items: Vec<FrontierItem>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl DiscoverySource for StaticFrontier {
    async fn discover(&self) -> Result<Vec<FrontierItem>> {
        Ok(self.items.clone())
    }
}

/// One `<url>` entry of a urlset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub loc: String,
    pub lastmod: Option<String>,
}

/// A parsed sitemap document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapDocument {
    /// `<sitemapindex>`: locations of sub-sitemaps, in document order
    Index(Vec<String>),

    /// `<urlset>`: item entries, in document order
    UrlSet(Vec<SitemapEntry>),
}

/// Parses a sitemap index or urlset
///
/// Element names are matched by local name so documents with and without the
/// sitemaps.org namespace are both accepted.
pub fn parse_sitemap(locator: &str, xml: &str) -> Result<SitemapDocument> {
    let discovery_error = |message: String| HarvestError::Discovery {
        locator: locator.to_string(),
        message,
    };

    let package = parser::parse(xml).map_err(|e| discovery_error(format!("invalid XML: {}", e)))?;
    let document = package.as_document();
    let root = document.root();

    let is_index = evaluate(root, "boolean(/*[local-name()='sitemapindex'])")
        .map_err(discovery_error)?
        .boolean();

    if is_index {
        let locations = match evaluate(
            root,
            "/*[local-name()='sitemapindex']/*[local-name()='sitemap']/*[local-name()='loc']",
        )
        .map_err(discovery_error)?
        {
            Value::Nodeset(nodes) => nodes
                .document_order()
                .into_iter()
                .map(|node| node.string_value().trim().to_string())
                .filter(|loc| !loc.is_empty())
                .collect(),
            _ => Vec::new(),
        };
        return Ok(SitemapDocument::Index(locations));
    }

    let is_urlset = evaluate(root, "boolean(/*[local-name()='urlset'])")
        .map_err(discovery_error)?
        .boolean();
    if !is_urlset {
        return Err(discovery_error(
            "root element is neither sitemapindex nor urlset".to_string(),
        ));
    }

    let mut entries = Vec::new();
    if let Value::Nodeset(nodes) = evaluate(
        root,
        "/*[local-name()='urlset']/*[local-name()='url']",
    )
    .map_err(discovery_error)?
    {
        for node in nodes.document_order() {
            let loc = evaluate(node, "string(*[local-name()='loc'])")
                .map_err(discovery_error)?
                .string();
            let lastmod = evaluate(node, "string(*[local-name()='lastmod'])")
                .map_err(discovery_error)?
                .string();

            let loc = loc.trim();
            if loc.is_empty() {
                continue;
            }

            let lastmod = lastmod.trim();
            entries.push(SitemapEntry {
                loc: loc.to_string(),
                lastmod: (!lastmod.is_empty()).then(|| lastmod.to_string()),
            });
        }
    }

    Ok(SitemapDocument::UrlSet(entries))
}

fn evaluate<'d, N>(node: N, expression: &str) -> std::result::Result<Value<'d>, String>
where
    N: Into<sxd_xpath::nodeset::Node<'d>>,
{
    let factory = Factory::new();
    let xpath = factory
        .build(expression)
        .map_err(|e| format!("invalid XPath {}: {}", expression, e))?
        .ok_or_else(|| format!("empty XPath {}", expression))?;

    let context = Context::new();
    xpath
        .evaluate(&context, node)
        .map_err(|e| format!("XPath {} failed: {}", expression, e))
}

/// Extracts the item id: the first run of digits in the locator's path
///
/// # Example
///
/// ```
/// use crag_harvest::frontier::extract_item_id;
///
/// let id = extract_item_id("https://example.com/route/105748391/the-nose");
/// assert_eq!(id.as_deref(), Some("105748391"));
/// assert_eq!(extract_item_id("https://example.com/about"), None);
/// ```
pub fn extract_item_id(locator: &str) -> Option<String> {
    let path = url::Url::parse(locator)
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| locator.to_string());

    let start = path.find(|c: char| c.is_ascii_digit())?;
    let digits: String = path[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();

    Some(digits)
}

/// Sitemap-index backed discovery
pub struct SitemapDiscovery<S> {
    source: Arc<S>,
    limiter: Arc<RateLimiter>,
    sitemap_url: String,
    skip_groups: usize,
    locator_filter: Option<String>,
}

impl<S: DocumentSource> SitemapDiscovery<S> {
    pub fn new(source: Arc<S>, limiter: Arc<RateLimiter>, sitemap_url: impl Into<String>) -> Self {
        Self {
            source,
            limiter,
            sitemap_url: sitemap_url.into(),
            skip_groups: 0,
            locator_filter: None,
        }
    }

    /// Ignores the first `count` groups listed by the index
    pub fn skip_groups(mut self, count: usize) -> Self {
        self.skip_groups = count;
        self
    }

    /// Keeps only locators containing `filter`
    pub fn locator_filter(mut self, filter: Option<String>) -> Self {
        self.locator_filter = filter;
        self
    }

    async fn fetch_sitemap(&self, locator: &str) -> Result<SitemapDocument> {
        self.limiter.acquire().await;

        match self.source.get(locator).await {
            SourceResponse::Ok(body) => parse_sitemap(locator, &body),
            other => Err(HarvestError::Discovery {
                locator: locator.to_string(),
                message: format!("sitemap request failed: {}", other.describe()),
            }),
        }
    }

    fn accept(&self, locator: &str) -> bool {
        self.locator_filter
            .as_deref()
            .map_or(true, |filter| locator.contains(filter))
    }

    fn collect_group(
        &self,
        group: &str,
        entries: Vec<SitemapEntry>,
        items: &mut Vec<FrontierItem>,
    ) {
        let mut accepted = 0usize;

        for entry in entries {
            if !self.accept(&entry.loc) {
                continue;
            }

            let Some(id) = extract_item_id(&entry.loc) else {
                tracing::warn!(locator = %entry.loc, "No item id in locator, skipping");
                continue;
            };

            let version = entry.lastmod.unwrap_or_else(|| {
                tracing::debug!(locator = %entry.loc, "No lastmod in sitemap entry");
                String::new()
            });

            items.push(FrontierItem::new(id, entry.loc, group, version));
            accepted += 1;
        }

        tracing::debug!(group, accepted, "Sitemap group collected");
    }
}

impl<S: DocumentSource> DiscoverySource for SitemapDiscovery<S> {
    async fn discover(&self) -> Result<Vec<FrontierItem>> {
        let mut items = Vec::new();

        let groups = match self.fetch_sitemap(&self.sitemap_url).await? {
            SitemapDocument::Index(groups) => groups,
            SitemapDocument::UrlSet(entries) => {
                // A plain urlset is a single group
                self.collect_group(&self.sitemap_url, entries, &mut items);
                return Ok(items);
            }
        };

        tracing::info!(
            "Sitemap index lists {} groups, skipping the first {}",
            groups.len(),
            self.skip_groups
        );

        let mut failed_groups = 0usize;
        for group in groups.iter().skip(self.skip_groups) {
            match self.fetch_sitemap(group).await {
                Ok(SitemapDocument::UrlSet(entries)) => {
                    self.collect_group(group, entries, &mut items)
                }
                Ok(SitemapDocument::Index(_)) => {
                    failed_groups += 1;
                    tracing::warn!(group = %group, "Nested sitemap index ignored");
                }
                Err(e) => {
                    failed_groups += 1;
                    tracing::warn!(group = %group, "Skipping sitemap group: {}", e);
                }
            }
        }

        tracing::info!(
            "Discovered {} items ({} groups failed)",
            items.len(),
            failed_groups
        );

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::testutil::MockSource;
    use std::time::Duration;

    const INDEX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://example.com/sitemaps/areas.xml</loc></sitemap>
  <sitemap><loc>https://example.com/sitemaps/routes-1.xml</loc></sitemap>
  <sitemap><loc>https://example.com/sitemaps/routes-2.xml</loc></sitemap>
</sitemapindex>"#;

    const ROUTES_1: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://example.com/route/101/crack-one</loc><lastmod>2024-01-05</lastmod></url>
  <url><loc>https://example.com/route/102/arete</loc><lastmod>2024-02-11</lastmod></url>
  <url><loc>https://example.com/area/900/crag</loc><lastmod>2024-02-11</lastmod></url>
</urlset>"#;

    const ROUTES_2: &str = r#"<urlset>
  <url><loc>https://example.com/route/103/slab</loc></url>
</urlset>"#;

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(100, Duration::from_secs(1)))
    }

    #[test]
    fn test_parse_sitemap_index() {
        let parsed = parse_sitemap("index", INDEX).unwrap();
        match parsed {
            SitemapDocument::Index(groups) => {
                assert_eq!(groups.len(), 3);
                assert_eq!(groups[1], "https://example.com/sitemaps/routes-1.xml");
            }
            other => panic!("expected index, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_urlset_with_and_without_namespace() {
        let SitemapDocument::UrlSet(entries) = parse_sitemap("r1", ROUTES_1).unwrap() else {
            panic!("expected urlset");
        };
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].lastmod.as_deref(), Some("2024-01-05"));

        let SitemapDocument::UrlSet(entries) = parse_sitemap("r2", ROUTES_2).unwrap() else {
            panic!("expected urlset");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].lastmod, None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_sitemap("bad", "<html><body>nope</body></html>").is_err());
        assert!(parse_sitemap("bad", "not xml at all <<<").is_err());
    }

    #[test]
    fn test_extract_item_id() {
        assert_eq!(
            extract_item_id("https://example.com/route/105748391/the-nose").as_deref(),
            Some("105748391")
        );
        assert_eq!(
            extract_item_id("https://www2.example.com/route/42").as_deref(),
            Some("42")
        );
        assert_eq!(extract_item_id("https://example.com/route/"), None);
    }

    #[tokio::test]
    async fn test_sitemap_discovery_skips_groups_and_filters() {
        let source = Arc::new(
            MockSource::new()
                .with_body("https://example.com/sitemap.xml", INDEX)
                .with_body("https://example.com/sitemaps/routes-1.xml", ROUTES_1)
                .with_body("https://example.com/sitemaps/routes-2.xml", ROUTES_2),
        );

        let discovery =
            SitemapDiscovery::new(source.clone(), limiter(), "https://example.com/sitemap.xml")
                .skip_groups(1)
            .locator_filter(Some("/route/".to_string()));

        let items = discovery.discover().await.unwrap();

        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["101", "102", "103"]);
        assert_eq!(items[0].source_group, "https://example.com/sitemaps/routes-1.xml");
        assert_eq!(items[1].remote_version, "2024-02-11");
        assert_eq!(items[2].remote_version, "");
        assert!(!source
            .calls()
            .contains(&"https://example.com/sitemaps/areas.xml".to_string()));
    }

    #[tokio::test]
    async fn test_failed_group_is_skipped() {
        let source = Arc::new(
            MockSource::new()
                .with_body("https://example.com/sitemap.xml", INDEX)
                .with_body("https://example.com/sitemaps/routes-2.xml", ROUTES_2),
        );

        let discovery = SitemapDiscovery::new(source, limiter(), "https://example.com/sitemap.xml")
            .skip_groups(1);

        let items = discovery.discover().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "103");
    }

    #[tokio::test]
    async fn test_missing_index_is_an_error() {
        let source = Arc::new(MockSource::new());
        let discovery = SitemapDiscovery::new(source, limiter(), "https://example.com/sitemap.xml");

        assert!(matches!(
            discovery.discover().await,
            Err(HarvestError::Discovery { .. })
        ));
    }

    #[tokio::test]
    async fn test_static_frontier() {
        let frontier =
            StaticFrontier::new(vec![FrontierItem::new("1", "https://x/route/1", "g", "v")]);
        assert_eq!(frontier.discover().await.unwrap().len(), 1);
    }
}
