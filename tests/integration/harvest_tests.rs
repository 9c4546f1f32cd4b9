//! Integration tests for the harvester
//!
//! These tests use wiremock to stand in for the remote site and drive full
//! harvest runs against an on-disk SQLite database.

use crag_harvest::config::{
    ClassifyConfig, Config, HarvestConfig, NotFoundPolicy, OutputConfig, RateLimitConfig,
    SourceConfig, SourceKind, UserAgentConfig,
};
use crag_harvest::crawler::{Coordinator, HttpSource, RateLimiter};
use crag_harvest::extract::{RouteExtractor, StatsExtractor};
use crag_harvest::frontier::{FrontierItem, SitemapDiscovery, StaticFrontier};
use crag_harvest::output::check_stats;
use crag_harvest::storage::{RunStatus, SqliteStorage, Storage};
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing at the mock server
fn create_test_config(base_url: &str, db_path: &str) -> Config {
    Config {
        harvest: HarvestConfig {
            rate_limit: RateLimitConfig {
                calls: 1000,
                period_seconds: 1,
            },
            batch_size: 2,
            staleness_threshold_days: 30,
            max_retries_per_item: 1,
            rate_limited_backoff_secs: 0, // No waiting in tests
            transient_backoff_secs: 0,
            max_concurrency: Some(2),
            not_found_policy: NotFoundPolicy::Retry,
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        output: OutputConfig {
            database_path: db_path.to_string(),
        },
        source: SourceConfig {
            kind: SourceKind::Routes,
            sitemap_url: format!("{}/sitemap.xml", base_url),
            skip_groups: 1,
            locator_filter: Some("/route/".to_string()),
            api_base: Some(format!("{}/api/routes", base_url)),
        },
        classify: ClassifyConfig {
            description: vec!["Description".to_string()],
            directions: vec!["Location".to_string()],
            protection: vec!["Protection".to_string()],
            csv_path: None,
        },
    }
}

fn route_page(id: &str, name: &str) -> String {
    format!(
        r#"<html><head>
<script type="application/ld+json">{{"@type": "Place", "geo": {{"latitude": 37.73, "longitude": -119.63}}}}</script>
</head><body>
<div class="mb-half small text-warm"><a href="/areas">All Locations</a> &gt; <a href="/area/1">California</a></div>
<h1>{name}</h1>
<h2 class="inline-block mr-2">5.10a YDS</h2>
<span id="starsWithAvgText-{id}">Avg: 3.5 from 20 votes</span>
<h2 class="mt-2">Description</h2>
<div class="fr-view">Climb the crack.</div>
</body></html>"#
    )
}

fn html(body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body.into())
        .insert_header("content-type", "text/html")
}

fn xml(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body)
        .insert_header("content-type", "application/xml")
}

/// Mounts a sitemap index with one ignored group and one route group
async fn mount_site(server: &MockServer) {
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(xml(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>{base}/sitemap-areas.xml</loc></sitemap>
  <sitemap><loc>{base}/sitemap-routes.xml</loc></sitemap>
</sitemapindex>"#
        )))
        .mount(server)
        .await;

    // Skipped group; would fail the test's counts if it were read
    Mock::given(method("GET"))
        .and(path("/sitemap-areas.xml"))
        .respond_with(xml(format!(
            r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>{base}/route/999/ghost</loc><lastmod>2024-01-01</lastmod></url>
</urlset>"#
        )))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sitemap-routes.xml"))
        .respond_with(xml(format!(
            r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>{base}/route/101/the-nose</loc><lastmod>2024-01-01</lastmod></url>
  <url><loc>{base}/route/102/slow-crack</loc><lastmod>2024-01-02</lastmod></url>
  <url><loc>{base}/route/103/gone</loc><lastmod>2024-01-03</lastmod></url>
  <url><loc>{base}/route/104/broken</loc><lastmod>2024-01-04</lastmod></url>
  <url><loc>{base}/area/5/yosemite</loc><lastmod>2024-01-05</lastmod></url>
</urlset>"#
        )))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/route/101/the-nose"))
        .respond_with(html(route_page("101", "The Nose")))
        .mount(server)
        .await;

    // First request is throttled, the retry succeeds
    Mock::given(method("GET"))
        .and(path("/route/102/slow-crack"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/route/102/slow-crack"))
        .respond_with(html(route_page("102", "Slow Crack")))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/route/103/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/route/104/broken"))
        .respond_with(html("<html><body><p>Under construction</p></body></html>"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_harvest_from_sitemap() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server).await;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("harvest.db");
    let config = create_test_config(&mock_server.uri(), db_path.to_str().unwrap());

    let source = Arc::new(HttpSource::from_config(&config.user_agent).unwrap());
    let limiter = Arc::new(RateLimiter::from_config(&config.harvest.rate_limit));
    let discovery = SitemapDiscovery::new(
        source.clone(),
        limiter.clone(),
        config.source.sitemap_url.clone(),
    )
    .skip_groups(config.source.skip_groups)
    .locator_filter(config.source.locator_filter.clone());

    let extractor = Arc::new(RouteExtractor::from_config(&config.classify).unwrap());
    let coordinator =
        Coordinator::with_limiter(config.harvest.clone(), source, extractor, limiter)
            .with_config_hash("abc123");

    let mut storage = SqliteStorage::new(&db_path).expect("Failed to open storage");

    let first = coordinator.run(&discovery, &mut storage).await.unwrap();

    assert_eq!(first.discovered, 4);
    assert_eq!(first.fetched, 3);
    assert_eq!(first.persisted, 2);
    assert_eq!(first.failed, 2);
    assert_eq!(first.not_found, 1);
    assert_eq!(first.parse_failures, 1);
    assert!(!first.interrupted);
    assert_eq!(storage.count_rows("routes").unwrap(), 2);

    let run = storage.get_latest_run().unwrap().expect("run recorded");
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.config_hash, "abc123");
    assert_eq!(run.summary, first);

    // Fresh items are skipped, failures are asked for again
    let second = coordinator.run(&discovery, &mut storage).await.unwrap();

    assert_eq!(second.skipped, 2);
    assert_eq!(second.fetched, 1);
    assert_eq!(second.not_found, 1);
    assert_eq!(second.persisted, 0);
    assert_eq!(storage.count_rows("routes").unwrap(), 2);
    assert_eq!(storage.list_runs(10).unwrap().len(), 2);
}

#[tokio::test]
async fn test_not_found_watermark_policy() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server).await;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("harvest.db");
    let mut config = create_test_config(&mock_server.uri(), db_path.to_str().unwrap());
    config.harvest.not_found_policy = NotFoundPolicy::Watermark;

    let base = mock_server.uri();
    let frontier = StaticFrontier::new(vec![
        FrontierItem::new("101", format!("{}/route/101/the-nose", base), "routes", "2024-01-01"),
        FrontierItem::new("103", format!("{}/route/103/gone", base), "routes", "2024-01-03"),
    ]);

    let extractor = Arc::new(RouteExtractor::from_config(&config.classify).unwrap());
    let mut storage = SqliteStorage::new(&db_path).expect("Failed to open storage");

    let first = crag_harvest::run(&frontier, &mut storage, extractor.clone(), &config)
        .await
        .unwrap();
    assert_eq!(first.not_found, 1);
    assert_eq!(first.persisted, 1);

    // The tombstone keeps the missing route out of the next run
    let second = crag_harvest::run(&frontier, &mut storage, extractor, &config)
        .await
        .unwrap();
    assert_eq!(second.skipped, 2);
    assert_eq!(second.fetched, 0);
    assert_eq!(storage.count_rows("routes").unwrap(), 1);
}

#[tokio::test]
async fn test_stats_harvest_with_pagination() {
    let mock_server = MockServer::start().await;

    // Page 2 is registered first so it wins over the unqualified mock
    Mock::given(method("GET"))
        .and(path("/api/routes/101/stars"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total": 3,
            "last_page": 2,
            "data": [{"id": 3, "user": {"name": "carol"}, "score": 2}]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/routes/101/stars"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total": 3,
            "last_page": 2,
            "data": [
                {"id": 1, "user": {"name": "alice"}, "score": 4, "createdAt": "2024-01-01"},
                {"id": 2, "user": {"name": "bob"}, "score": 3}
            ]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/routes/101/ticks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total": 1,
            "data": [{"id": 9, "user": {"name": "alice"}, "text": "&middot; Lead / Onsight."}]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/routes/101/todos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total": 0,
            "data": []
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/routes/101/ratings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total": 2,
            "data": [
                {"id": 5, "user": {"name": "bob"}, "allRatings": ["5.10a", "PG13"]},
                {"id": 6, "userId": 77}
            ]
        })))
        .mount(&mock_server)
        .await;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("stats.db");
    let mut config = create_test_config(&mock_server.uri(), db_path.to_str().unwrap());
    config.source.kind = SourceKind::Stats;

    let frontier = StaticFrontier::new(vec![FrontierItem::new(
        "101",
        format!("{}/route/101/the-nose", mock_server.uri()),
        "routes",
        "2024-01-01",
    )]);

    let api_base = config.source.api_base.clone().unwrap();
    let extractor = Arc::new(StatsExtractor::new(api_base));
    let mut storage = SqliteStorage::new(&db_path).expect("Failed to open storage");

    let summary = crag_harvest::run(&frontier, &mut storage, extractor, &config)
        .await
        .unwrap();

    assert_eq!(summary.persisted, 1);
    assert_eq!(storage.count_rows("stats_count").unwrap(), 1);
    // Three stars across two pages, one tick, one rating without a user id
    assert_eq!(storage.count_rows("stats_entries").unwrap(), 5);

    let rows = check_stats(&mut storage).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].stars_difference, 0);
    assert_eq!(rows[0].ratings_difference, 1);
    assert_eq!(rows[0].sum_difference, 1);
}
