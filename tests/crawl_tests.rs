//! Integration tests for the ingestion pipeline
//!
//! Most tests drive a full run against the in-memory store with scripted
//! fetch and discovery collaborators. The last test goes end-to-end over
//! HTTP against a wiremock server and an on-disk SQLite store.

use async_trait::async_trait;
use librarian::crawler::{
    ingest_web_source, Discoverer, Discovery, FetchError, FetchOptions, FetchedPage,
    HeadlessRenderer, HttpDiscoverer, HttpFetcher, IngestOptions, IngestServices, IngestSummary,
    NoProgress, PageFetcher, ParagraphChunker, ProgressEvent, ProgressSink,
};
use librarian::config::CrawlerConfig;
use librarian::storage::{
    lock, shared, MemoryStorage, NewWebSource, SharedStorage, SqliteStorage, Storage,
};
use librarian::{LibrarianError, PageStatus, PathPrefixSet};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ROOT: &str = "https://example.com/docs";

/// Remote site whose pages can be edited between runs
#[derive(Clone, Default)]
struct Site {
    pages: Arc<Mutex<HashMap<String, Result<(String, Vec<String>), u16>>>>,
}

impl Site {
    fn page(&self, url: &str, body: &str, links: &[&str]) {
        self.pages.lock().unwrap().insert(
            url.to_string(),
            Ok((body.to_string(), links.iter().map(|l| l.to_string()).collect())),
        );
    }

    fn status(&self, url: &str, status: u16) {
        self.pages.lock().unwrap().insert(url.to_string(), Err(status));
    }
}

#[async_trait]
impl PageFetcher for Site {
    async fn fetch(&self, url: &Url, _options: &FetchOptions) -> Result<FetchedPage, FetchError> {
        let entry = self.pages.lock().unwrap().get(url.as_str()).cloned();
        match entry {
            Some(Ok((content, links))) => Ok(FetchedPage {
                content,
                title: None,
                path: url.path().to_string(),
                links,
            }),
            Some(Err(status)) => Err(FetchError::Status {
                status,
                url: url.to_string(),
            }),
            None => Err(FetchError::Status {
                status: 404,
                url: url.to_string(),
            }),
        }
    }

    async fn fetch_manifest(&self, url: &Url) -> Result<Vec<String>, FetchError> {
        Err(FetchError::Status {
            status: 404,
            url: url.to_string(),
        })
    }
}

/// Discovery that always proposes the same URLs
struct FixedDiscovery(Vec<&'static str>);

#[async_trait]
impl Discoverer for FixedDiscovery {
    async fn discover(&self, _root: &Url) -> Discovery {
        Discovery {
            urls: self.0.iter().map(|u| Url::parse(u).unwrap()).collect(),
            manifest_url: None,
            manifest_found: false,
            sitemap_found: !self.0.is_empty(),
        }
    }
}

#[derive(Default)]
struct SpyRenderer {
    closed: AtomicBool,
}

#[async_trait]
impl HeadlessRenderer for SpyRenderer {
    async fn render(&self, _url: &Url) -> Result<String, FetchError> {
        Err(FetchError::RendererUnavailable)
    }

    async fn close(&self) -> Result<(), FetchError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink for RecordingProgress {
    fn report(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

fn code_page(title: &str) -> String {
    format!(
        "# {}\n\nThis page explains how the library is used in practice.\n\n```rust\nfn main() {{}}\n```\n",
        title
    )
}

fn example_source(store: &mut MemoryStorage, max_depth: u32, max_pages: u32) -> i64 {
    let root = Url::parse(ROOT).unwrap();
    let source = NewWebSource {
        max_depth,
        max_pages,
        ..NewWebSource::new(&root)
    }
    .with_allowed_paths(&root, PathPrefixSet::new(["/docs"]).unwrap());
    store.add_web_source(&source).unwrap()
}

fn services(site: &Site, discovered: Vec<&'static str>) -> IngestServices {
    IngestServices {
        fetcher: Arc::new(site.clone()),
        discoverer: Arc::new(FixedDiscovery(discovered)),
        chunker: Arc::new(ParagraphChunker::default()),
        progress: Arc::new(NoProgress),
        renderer: None,
    }
}

fn options() -> IngestOptions {
    IngestOptions {
        min_content_chars: 20,
        ..IngestOptions::default()
    }
}

async fn ingest<S: Storage + Send + 'static>(
    storage: &SharedStorage<S>,
    source_id: i64,
    services: IngestServices,
    options: &IngestOptions,
) -> Result<IngestSummary, LibrarianError> {
    let (_tx, rx) = watch::channel(false);
    ingest_web_source(Arc::clone(storage), source_id, services, options, rx).await
}

fn counts(summary: &IngestSummary) -> (u64, u64, u64, u64) {
    (
        summary.processed,
        summary.updated,
        summary.skipped,
        summary.failed,
    )
}

fn three_page_site() -> Site {
    let site = Site::default();
    site.page(ROOT, &code_page("Docs"), &["https://example.com/docs/a"]);
    site.page("https://example.com/docs/a", &code_page("A"), &[]);
    site.page("https://example.com/docs/b", &code_page("B"), &[]);
    site
}

const DISCOVERED: [&str; 3] = [
    "https://example.com/docs",
    "https://example.com/docs/a",
    "https://example.com/docs/b",
];

#[tokio::test]
async fn test_first_run_then_unchanged_rerun() {
    let mut store = MemoryStorage::new();
    let id = example_source(&mut store, 1, 10);
    let storage = shared(store);
    let site = three_page_site();

    let first = ingest(&storage, id, services(&site, DISCOVERED.to_vec()), &options())
        .await
        .unwrap();
    assert_eq!(counts(&first), (3, 3, 0, 0));
    assert_eq!(first.version_label, "latest");
    let writes_after_first = lock(&storage).unwrap().chunk_writes();

    let second = ingest(&storage, id, services(&site, DISCOVERED.to_vec()), &options())
        .await
        .unwrap();
    assert_eq!(counts(&second), (3, 0, 0, 0));
    assert_eq!(second.deactivated, 0);

    let store = lock(&storage).unwrap();
    assert_eq!(store.chunk_writes(), writes_after_first);
    assert_eq!(store.count_documents(id).unwrap(), (3, 0));
    assert_eq!(store.list_pages(id).unwrap().len(), 3);
}

#[tokio::test]
async fn test_changed_page_rebuilds_only_its_chunks() {
    let mut store = MemoryStorage::new();
    let id = example_source(&mut store, 1, 10);
    let storage = shared(store);
    let site = three_page_site();

    ingest(&storage, id, services(&site, DISCOVERED.to_vec()), &options())
        .await
        .unwrap();
    let writes_before = lock(&storage).unwrap().chunk_writes();

    site.page("https://example.com/docs/b", &code_page("B, revised"), &[]);
    let summary = ingest(&storage, id, services(&site, DISCOVERED.to_vec()), &options())
        .await
        .unwrap();

    assert_eq!(counts(&summary), (3, 1, 0, 0));
    // One delete and one insert for the single changed document
    assert_eq!(lock(&storage).unwrap().chunk_writes(), writes_before + 2);
}

#[tokio::test]
async fn test_depth_never_exceeds_max_depth() {
    let mut store = MemoryStorage::new();
    let id = example_source(&mut store, 2, 100);
    let storage = shared(store);

    let site = Site::default();
    site.page(ROOT, &code_page("Root"), &["https://example.com/docs/l1"]);
    site.page("https://example.com/docs/l1", &code_page("L1"), &["https://example.com/docs/l2"]);
    site.page("https://example.com/docs/l2", &code_page("L2"), &["https://example.com/docs/l3"]);
    site.page("https://example.com/docs/l3", &code_page("L3"), &[]);

    let summary = ingest(&storage, id, services(&site, vec![]), &options())
        .await
        .unwrap();
    assert_eq!(summary.processed, 3);

    let pages = lock(&storage).unwrap().list_pages(id).unwrap();
    let by_url: HashMap<&str, u32> = pages
        .iter()
        .map(|p| (p.normalized_url.as_str(), p.depth))
        .collect();
    assert_eq!(by_url.get(ROOT), Some(&0));
    assert_eq!(by_url.get("https://example.com/docs/l1"), Some(&1));
    assert_eq!(by_url.get("https://example.com/docs/l2"), Some(&2));
    assert!(!by_url.contains_key("https://example.com/docs/l3"));
}

#[tokio::test]
async fn test_page_budget_is_never_exceeded() {
    let mut store = MemoryStorage::new();
    let id = example_source(&mut store, 3, 4);
    let storage = shared(store);

    let links: Vec<String> = (0..10).map(|i| format!("https://example.com/docs/p{}", i)).collect();
    let link_refs: Vec<&str> = links.iter().map(String::as_str).collect();
    let site = Site::default();
    site.page(ROOT, &code_page("Root"), &link_refs);
    for link in &links {
        site.page(link, &code_page("Child"), &link_refs);
    }

    let summary = ingest(&storage, id, services(&site, vec![]), &options())
        .await
        .unwrap();

    let store = lock(&storage).unwrap();
    let page_counts = store.count_pages(id).unwrap();
    assert_eq!(page_counts.total, 4);
    assert_eq!(page_counts.pending, 0);
    assert_eq!(summary.processed, 4);
}

#[tokio::test]
async fn test_scope_rules_filter_links() {
    let root = Url::parse(ROOT).unwrap();
    let mut store = MemoryStorage::new();
    let source = NewWebSource {
        denied_paths: PathPrefixSet::new(["/docs/internal"]).unwrap(),
        ..NewWebSource::new(&root)
    };
    let id = store.add_web_source(&source).unwrap();
    let storage = shared(store);

    let site = Site::default();
    site.page(
        ROOT,
        &code_page("Root"),
        &[
            "https://example.com/docs/guide",
            "https://example.com/docs/internal/secret",
            "https://example.com/blog/news",
            "https://elsewhere.com/docs/guide",
        ],
    );
    site.page("https://example.com/docs/guide", &code_page("Guide"), &[]);

    ingest(&storage, id, services(&site, vec![]), &options())
        .await
        .unwrap();

    let pages = lock(&storage).unwrap().list_pages(id).unwrap();
    let urls: Vec<&str> = pages.iter().map(|p| p.normalized_url.as_str()).collect();
    assert_eq!(urls, vec![ROOT, "https://example.com/docs/guide"]);
}

#[tokio::test]
async fn test_not_found_is_skip_and_errors_are_isolated() {
    let mut store = MemoryStorage::new();
    let id = example_source(&mut store, 1, 10);
    let storage = shared(store);

    let site = Site::default();
    site.page(ROOT, &code_page("Root"), &[]);
    site.status("https://example.com/docs/a", 404);
    site.status("https://example.com/docs/b", 503);
    site.page("https://example.com/docs/c", &code_page("C"), &[]);

    let mut options = options();
    options.concurrency = 4;
    let summary = ingest(
        &storage,
        id,
        services(
            &site,
            vec![
                "https://example.com/docs/a",
                "https://example.com/docs/b",
                "https://example.com/docs/c",
            ],
        ),
        &options,
    )
    .await
    .unwrap();

    assert_eq!(counts(&summary), (2, 2, 1, 1));

    let store = lock(&storage).unwrap();
    let pages = store.list_pages(id).unwrap();
    let status_of = |url: &str| {
        pages
            .iter()
            .find(|p| p.normalized_url == url)
            .map(|p| p.status)
    };
    assert_eq!(status_of("https://example.com/docs/a"), Some(PageStatus::Done));
    assert_eq!(status_of("https://example.com/docs/b"), Some(PageStatus::Failed));
    assert_eq!(status_of("https://example.com/docs/c"), Some(PageStatus::Done));
}

#[tokio::test]
async fn test_content_gate_rejections_are_skips() {
    let mut store = MemoryStorage::new();
    let id = example_source(&mut store, 1, 10);
    let storage = shared(store);

    let site = Site::default();
    site.page(ROOT, &code_page("Root"), &[]);
    site.page(
        "https://example.com/docs/prose",
        "Only prose here, long enough to pass the size check but without code.",
        &[],
    );
    site.page("https://example.com/docs/tiny", "tiny", &[]);

    let summary = ingest(
        &storage,
        id,
        services(
            &site,
            vec!["https://example.com/docs/prose", "https://example.com/docs/tiny"],
        ),
        &options(),
    )
    .await
    .unwrap();

    assert_eq!(counts(&summary), (1, 1, 2, 0));
    let store = lock(&storage).unwrap();
    let messages: Vec<String> = store
        .list_pages(id)
        .unwrap()
        .into_iter()
        .filter_map(|p| p.error_message)
        .collect();
    assert!(messages.iter().any(|m| m == "Document missing code snippets"));
    assert!(messages
        .iter()
        .any(|m| m.starts_with("Document too small after sanitization")));
}

#[tokio::test]
async fn test_vanished_page_is_deactivated_and_refetched_page_stays_active() {
    let mut store = MemoryStorage::new();
    let id = example_source(&mut store, 1, 10);
    let storage = shared(store);
    let site = three_page_site();

    ingest(&storage, id, services(&site, DISCOVERED.to_vec()), &options())
        .await
        .unwrap();

    site.status("https://example.com/docs/b", 404);
    let summary = ingest(&storage, id, services(&site, DISCOVERED.to_vec()), &options())
        .await
        .unwrap();

    assert_eq!(counts(&summary), (2, 0, 1, 0));
    assert_eq!(summary.deactivated, 1);

    let store = lock(&storage).unwrap();
    let docs = store.list_documents(id, "latest").unwrap();
    let active_of = |path: &str| docs.iter().find(|d| d.path == path).map(|d| d.active);
    assert_eq!(active_of("/docs"), Some(true));
    assert_eq!(active_of("/docs/a"), Some(true));
    assert_eq!(active_of("/docs/b"), Some(false));
}

#[tokio::test]
async fn test_failed_pages_wait_for_force() {
    let mut store = MemoryStorage::new();
    let id = example_source(&mut store, 1, 10);
    let storage = shared(store);

    let site = Site::default();
    site.page(ROOT, &code_page("Root"), &[]);
    site.status("https://example.com/docs/a", 500);
    let discovered = vec!["https://example.com/docs/a"];

    let first = ingest(&storage, id, services(&site, discovered.clone()), &options())
        .await
        .unwrap();
    assert_eq!(first.failed, 1);

    // Not retried on a normal re-run
    site.page("https://example.com/docs/a", &code_page("A"), &[]);
    let second = ingest(&storage, id, services(&site, discovered.clone()), &options())
        .await
        .unwrap();
    assert_eq!(counts(&second), (1, 0, 0, 0));

    let old_ids: Vec<i64> = lock(&storage)
        .unwrap()
        .list_pages(id)
        .unwrap()
        .iter()
        .map(|p| p.id)
        .collect();

    let mut forced = options();
    forced.force = true;
    let third = ingest(&storage, id, services(&site, discovered), &forced)
        .await
        .unwrap();
    assert_eq!(counts(&third), (2, 1, 0, 0));

    let pages = lock(&storage).unwrap().list_pages(id).unwrap();
    assert_eq!(pages.len(), 2);
    assert!(pages.iter().all(|p| !old_ids.contains(&p.id)));
    assert!(pages.iter().all(|p| p.status == PageStatus::Done));
}

#[tokio::test]
async fn test_missing_root_url_is_fatal_and_recorded() {
    let mut store = MemoryStorage::new();
    let root = Url::parse(ROOT).unwrap();
    let id = store
        .add_web_source(&NewWebSource {
            root_url: String::new(),
            ..NewWebSource::new(&root)
        })
        .unwrap();
    let storage = shared(store);
    let site = three_page_site();

    let result = ingest(&storage, id, services(&site, DISCOVERED.to_vec()), &options()).await;
    assert!(matches!(result, Err(LibrarianError::MissingRootUrl(_))));

    let store = lock(&storage).unwrap();
    assert_eq!(store.count_pages(id).unwrap().total, 0);
    let source = store.get_source(id).unwrap().unwrap();
    assert!(source.last_error.is_some());
    assert!(source.last_sync_at.is_none());
}

#[tokio::test]
async fn test_renderer_is_closed_when_run_fails_early() {
    let mut store = MemoryStorage::new();
    let root = Url::parse(ROOT).unwrap();
    let id = store
        .add_web_source(&NewWebSource {
            root_url: String::new(),
            ..NewWebSource::new(&root)
        })
        .unwrap();
    let storage = shared(store);
    let site = three_page_site();

    let renderer = Arc::new(SpyRenderer::default());
    let mut missing_root = services(&site, DISCOVERED.to_vec());
    missing_root.renderer = Some(renderer.clone());
    let result = ingest(&storage, id, missing_root, &options()).await;
    assert!(matches!(result, Err(LibrarianError::MissingRootUrl(_))));
    assert!(renderer.closed.load(Ordering::SeqCst));

    let renderer = Arc::new(SpyRenderer::default());
    let mut unknown_source = services(&site, DISCOVERED.to_vec());
    unknown_source.renderer = Some(renderer.clone());
    let result = ingest(&storage, id + 100, unknown_source, &options()).await;
    assert!(matches!(result, Err(LibrarianError::SourceNotFound(_))));
    assert!(renderer.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_renderer_is_closed_after_run() {
    let mut store = MemoryStorage::new();
    let id = example_source(&mut store, 1, 10);
    let storage = shared(store);
    let site = three_page_site();
    let renderer = Arc::new(SpyRenderer::default());

    let mut services = services(&site, DISCOVERED.to_vec());
    services.renderer = Some(renderer.clone());
    ingest(&storage, id, services, &options()).await.unwrap();

    assert!(renderer.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_interrupted_run_skips_sweep_and_resumes() {
    let mut store = MemoryStorage::new();
    let id = example_source(&mut store, 1, 10);
    let storage = shared(store);
    let site = three_page_site();
    let renderer = Arc::new(SpyRenderer::default());

    let mut services = services(&site, DISCOVERED.to_vec());
    services.renderer = Some(renderer.clone());
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    let summary = ingest_web_source(Arc::clone(&storage), id, services, &options(), rx)
        .await
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.processed, 0);
    assert!(renderer.closed.load(Ordering::SeqCst));
    {
        let store = lock(&storage).unwrap();
        assert_eq!(store.count_pages(id).unwrap().pending, 3);
        assert!(store.get_source(id).unwrap().unwrap().last_sync_at.is_none());
    }

    let resumed = ingest(&storage, id, services_for(&site), &options())
        .await
        .unwrap();
    assert!(!resumed.interrupted);
    assert_eq!(counts(&resumed), (3, 3, 0, 0));
}

fn services_for(site: &Site) -> IngestServices {
    services(site, DISCOVERED.to_vec())
}

#[tokio::test]
async fn test_fetching_pages_resume_after_crash() {
    let mut store = MemoryStorage::new();
    let id = example_source(&mut store, 0, 10);
    store.upsert_crawl_page(id, ROOT, ROOT, 0).unwrap();
    let page = store.pending_pages(id, 1).unwrap().remove(0);
    store
        .set_page_status(page.id, PageStatus::Fetching, None)
        .unwrap();
    let storage = shared(store);
    let site = three_page_site();

    let summary = ingest(&storage, id, services(&site, vec![]), &options())
        .await
        .unwrap();

    assert_eq!(counts(&summary), (1, 1, 0, 0));
    let pages = lock(&storage).unwrap().list_pages(id).unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].id, page.id);
    assert_eq!(pages[0].status, PageStatus::Done);
}

#[tokio::test]
async fn test_progress_reports_discovery_and_pages() {
    let mut store = MemoryStorage::new();
    let id = example_source(&mut store, 1, 10);
    let storage = shared(store);
    let site = three_page_site();
    let progress = Arc::new(RecordingProgress::default());

    let mut services = services(&site, DISCOVERED.to_vec());
    services.progress = progress.clone();
    ingest(&storage, id, services, &options()).await.unwrap();

    let events = progress.events.lock().unwrap();
    let messages: Vec<&str> = events.iter().filter_map(|e| e.message.as_deref()).collect();
    assert_eq!(messages[0], "Discovering URLs...");
    assert_eq!(messages[1], "Found 3 URLs (manifest: false, sitemap: true)");
    assert_eq!(messages[2], "Seeded 3 pages");
    assert_eq!(events.iter().filter(|e| e.url.is_some()).count(), 3);
}

#[tokio::test]
async fn test_http_ingest_into_sqlite() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/docs"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "# Welcome\n\nStart with the [guide](/docs/guide) or read the [blog](/blog/news).\n\n```sh\ncargo install thing\n```\n",
            "text/markdown",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs/guide"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<html><head><title>Guide</title></head><body><main><h1>Guide</h1>\
             <p>The guide walks through configuration and the first crawl.</p></main></body></html>",
            "text/html",
        ))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut store = SqliteStorage::open(&dir.path().join("librarian.db")).unwrap();
    let root = Url::parse(&format!("{}/docs", base)).unwrap();
    let id = store
        .add_web_source(&NewWebSource {
            require_code_snippets: false,
            ..NewWebSource::new(&root)
        })
        .unwrap();
    let storage = shared(store);

    let crawler_config = CrawlerConfig::default();
    let services = IngestServices {
        fetcher: Arc::new(HttpFetcher::from_config(&crawler_config).unwrap()),
        discoverer: Arc::new(HttpDiscoverer::from_config(&crawler_config).unwrap()),
        chunker: Arc::new(ParagraphChunker::default()),
        progress: Arc::new(NoProgress),
        renderer: None,
    };

    let summary = ingest(&storage, id, services, &options()).await.unwrap();
    assert_eq!(counts(&summary), (2, 2, 0, 0));

    let store = lock(&storage).unwrap();
    let host = root.host_str().unwrap().to_string();
    let port = root.port().unwrap();
    let doc = store.get_document(id, "/docs/guide", "latest").unwrap().unwrap();
    assert_eq!(doc.title, "Guide");
    assert_eq!(doc.uri, format!("web://{}:{}/docs/guide", host, port));
    assert_eq!(doc.content_type, "text/markdown");
    assert!(!store.list_chunks(doc.id).unwrap().is_empty());

    let urls: Vec<String> = store
        .list_pages(id)
        .unwrap()
        .into_iter()
        .map(|p| p.normalized_url)
        .collect();
    assert!(!urls.iter().any(|u| u.contains("/blog")));
    assert!(store.get_source(id).unwrap().unwrap().last_sync_at.is_some());
}
