//! Batch scraping against a local mock HTTP server.

use std::sync::Arc;
use std::time::Duration;

use webgrab::{
    BatchScraper, Engine, EngineConfig, RequestOptions, RetryConfig, ScraperMode,
};

fn engine() -> Arc<Engine> {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = EngineConfig {
        rate_limit_rps: 1000.0,
        rate_limit_burst: 1000,
        http_timeout: Duration::from_secs(5),
        ..EngineConfig::default()
    };
    let engine = Engine::new(config)
        .expect("engine should build")
        .with_retry_config(RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        });
    Arc::new(engine)
}

#[tokio::test]
async fn batch_delivers_one_result_per_request() {
    let mut server = mockito::Server::new_async().await;
    let mut mocks = Vec::new();
    for path in ["/a", "/b", "/c"] {
        mocks.push(
            server
                .mock("GET", path)
                .with_status(200)
                .with_body(format!(
                    "<html><head><title>{path}</title></head><body>ok</body></html>"
                ))
                .create_async()
                .await,
        );
    }
    mocks.push(
        server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await,
    );

    let engine = engine();
    let scraper = BatchScraper::new(Arc::clone(&engine)).with_workers(3);
    let requests: Vec<RequestOptions> = ["/a", "/b", "/c", "/missing"]
        .iter()
        .map(|p| RequestOptions::new(format!("{}{p}", server.url())).with_mode(ScraperMode::Static))
        .collect();

    let mut rx = scraper.scrape_batch(requests).await;
    let mut results = Vec::new();
    while let Some(result) = rx.recv().await {
        results.push(result);
    }

    assert_eq!(results.len(), 4);
    assert_eq!(results.iter().filter(|r| r.is_success()).count(), 3);
    let failed = results.iter().find(|r| !r.is_success()).expect("one failure");
    assert!(failed.url.ends_with("/missing"));
    assert_eq!(
        failed.error.as_ref().and_then(|e| e.status_code()),
        Some(404)
    );

    engine.close().await;
}

#[tokio::test]
async fn empty_batch_completes_immediately() {
    let engine = engine();
    let scraper = BatchScraper::new(Arc::clone(&engine));
    let mut rx = scraper.scrape_batch(Vec::new()).await;
    assert!(rx.recv().await.is_none());
    engine.close().await;
}

#[tokio::test]
async fn dropping_the_receiver_cancels_the_batch() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/slow")
        .with_status(200)
        .with_body("<html><body>ok</body></html>")
        .expect_at_least(0)
        .create_async()
        .await;

    let engine = engine();
    let scraper = BatchScraper::new(Arc::clone(&engine)).with_workers(2);
    let requests: Vec<RequestOptions> = (0..20)
        .map(|_| RequestOptions::new(format!("{}/slow", server.url())).with_mode(ScraperMode::Static))
        .collect();

    let rx = scraper.scrape_batch(requests).await;
    drop(rx);

    // Workers notice the closed result channel and wind down; nothing to
    // assert beyond the absence of a hang.
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.close().await;
}
