//! Ingestion run coordinator
//!
//! One call to [`ingest_web_source`] is one ingestion run for one source:
//! - Loading the source and building its crawl scope
//! - Resetting page state (forced reseed, crash recovery, new pass)
//! - Discovery and seeding of the page queue
//! - Running the scheduler with the run-scoped headless renderer
//! - The deactivation sweep and sync status write-back

use crate::config::Config;
use crate::crawler::chunk::{ChunkBuilder, ParagraphChunker};
use crate::crawler::discovery::{Discoverer, Discovery, HttpDiscoverer};
use crate::crawler::fetcher::{FetchOptions, HttpFetcher, PageFetcher};
use crate::crawler::gate::GateRules;
use crate::crawler::progress::{ProgressEvent, ProgressSink, TracingProgress};
use crate::crawler::renderer::{BrowserlessRenderer, HeadlessRenderer};
use crate::crawler::scheduler::{CrawlPlan, CrawlServices, CrawlTally, Scheduler};
use crate::storage::{lock, SharedStorage, SourceRecord, Storage, SyncStatus};
use crate::url::{host_key, normalize_url, CrawlScope};
use crate::{LibrarianError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

/// Run-level knobs
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Delete all page state for the source before discovery
    pub force: bool,
    /// Pages processed concurrently per batch
    pub concurrency: usize,
    /// Upper bound on one page's fetch, gate and store
    pub page_timeout: Duration,
    pub min_content_chars: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            force: false,
            concurrency: crate::config::DEFAULT_CONCURRENCY,
            page_timeout: Duration::from_secs(crate::config::DEFAULT_FETCH_TIMEOUT_SECS),
            min_content_chars: crate::config::DEFAULT_MIN_CONTENT_CHARS,
        }
    }
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            force: false,
            concurrency: config.crawler.concurrency,
            page_timeout: Duration::from_secs(config.crawler.fetch_timeout_secs),
            min_content_chars: config.crawler.min_content_chars,
        }
    }
}

/// What a run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub processed: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Documents marked inactive by the sweep
    pub deactivated: u64,
    pub version_label: String,
    /// Stopped early on shutdown; the sweep was not run
    pub interrupted: bool,
}

/// Collaborators for one ingestion run
///
/// The renderer, when present, belongs to the run and is closed when the run
/// ends.
pub struct IngestServices {
    pub fetcher: Arc<dyn PageFetcher>,
    pub discoverer: Arc<dyn Discoverer>,
    pub chunker: Arc<dyn ChunkBuilder>,
    pub progress: Arc<dyn ProgressSink>,
    pub renderer: Option<Arc<dyn HeadlessRenderer>>,
}

impl IngestServices {
    /// HTTP fetcher and discovery, paragraph chunking, tracing progress, and
    /// a Browserless renderer when headless rendering is enabled
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = Duration::from_secs(config.crawler.fetch_timeout_secs);
        let renderer = BrowserlessRenderer::from_config(&config.headless, timeout)
            .map_err(|e| LibrarianError::Renderer(e.to_string()))?
            .map(|r| Arc::new(r) as Arc<dyn HeadlessRenderer>);

        Ok(Self {
            fetcher: Arc::new(HttpFetcher::from_config(&config.crawler)?),
            discoverer: Arc::new(HttpDiscoverer::from_config(&config.crawler)?),
            chunker: Arc::new(ParagraphChunker::default()),
            progress: Arc::new(TracingProgress),
            renderer,
        })
    }
}

/// Runs one ingestion for a web source
///
/// # Arguments
///
/// * `storage` - Shared store; the single source of truth for page state
/// * `source_id` - Source to ingest
/// * `services` - Fetcher, discovery, chunker, progress sink and renderer
/// * `options` - Run options
/// * `shutdown` - Flips to `true` to stop after the in-flight batch
///
/// # Returns
///
/// * `Ok(IngestSummary)` - The run finished or was interrupted cleanly
/// * `Err(LibrarianError)` - Unknown source, missing root URL, or a store fault
pub async fn ingest_web_source<S: Storage + Send + 'static>(
    storage: SharedStorage<S>,
    source_id: i64,
    services: IngestServices,
    options: &IngestOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<IngestSummary> {
    let renderer = services.renderer.clone();
    let result = ingest_and_record(&storage, source_id, services, options, shutdown).await;

    // Every exit path releases the renderer, fatal ones included
    if let Some(renderer) = renderer {
        if let Err(e) = renderer.close().await {
            warn!(source_id, error = %e, "Failed to close headless renderer");
        }
    }

    result
}

/// Runs the crawl and writes the sync status back to the source
async fn ingest_and_record<S: Storage + Send + 'static>(
    storage: &SharedStorage<S>,
    source_id: i64,
    services: IngestServices,
    options: &IngestOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<IngestSummary> {
    let source = lock(storage)?
        .get_source(source_id)?
        .ok_or(LibrarianError::SourceNotFound(source_id))?;

    let result = run(storage, &source, services, options, shutdown).await;

    let status = match &result {
        Ok(summary) if summary.interrupted => None,
        Ok(_) => Some(SyncStatus {
            last_sync_at: Some(chrono::Utc::now().to_rfc3339()),
            last_error: None,
        }),
        Err(e) => Some(SyncStatus {
            last_sync_at: source.last_sync_at.clone(),
            last_error: Some(e.to_string()),
        }),
    };

    if let Some(status) = status {
        let written = lock(storage).and_then(|mut store| store.update_source_sync(source_id, &status));
        match (written, &result) {
            (Err(e), Ok(_)) => return Err(e.into()),
            (Err(e), Err(_)) => warn!(source_id, error = %e, "Failed to record sync error"),
            (Ok(()), _) => {}
        }
    }

    result
}

async fn run<S: Storage + Send + 'static>(
    storage: &SharedStorage<S>,
    source: &SourceRecord,
    services: IngestServices,
    options: &IngestOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<IngestSummary> {
    let root_url = source
        .root_url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .ok_or(LibrarianError::MissingRootUrl(source.id))?;
    let root = normalize_url(root_url)?;
    let scope = CrawlScope::new(&root, &source.allowed_paths, &source.denied_paths)?;
    let version_label = source.effective_version().to_string();

    info!(
        source_id = source.id,
        root = %root,
        version = %version_label,
        force = options.force,
        "Starting ingestion"
    );

    prepare_pages(storage, source.id, options.force)?;

    services
        .progress
        .report(&ProgressEvent::discovery(0, 0, "Discovering URLs..."));
    let discovery = services.discoverer.discover(&root).await;
    services.progress.report(&ProgressEvent::discovery(
        0,
        discovery.urls.len() as u64,
        format!(
            "Found {} URLs (manifest: {}, sitemap: {})",
            discovery.urls.len(),
            discovery.manifest_found,
            discovery.sitemap_found
        ),
    ));

    let seeded = seed_pages(storage, source, &scope, root_url, &root, &discovery)?;
    services.progress.report(&ProgressEvent::discovery(
        seeded,
        seeded,
        format!("Seeded {} pages", seeded),
    ));

    let plan = CrawlPlan {
        source_id: source.id,
        scope,
        max_depth: source.max_depth,
        max_pages: source.max_pages,
        version_label: version_label.clone(),
        gate: GateRules {
            min_chars: options.min_content_chars,
            require_code_snippets: source.require_code_snippets,
        },
        fetch: FetchOptions {
            force_headless: source.force_headless,
            renderer: services.renderer.clone(),
        },
        concurrency: options.concurrency.max(1),
        page_timeout: options.page_timeout,
        prefix: host_key(&root).into_iter().collect(),
    };
    let crawl_services = CrawlServices {
        storage: Arc::clone(storage),
        fetcher: services.fetcher,
        chunker: services.chunker,
        progress: services.progress,
    };

    let tally = Scheduler::new(crawl_services, plan, shutdown).run().await?;
    let deactivated = if tally.interrupted {
        info!(source_id = source.id, "Run interrupted, skipping deactivation sweep");
        0
    } else {
        sweep(storage, source.id, &version_label, &tally)?
    };

    let summary = IngestSummary {
        processed: tally.processed,
        updated: tally.updated,
        skipped: tally.skipped,
        failed: tally.failed,
        deactivated,
        version_label,
        interrupted: tally.interrupted,
    };
    info!(
        source_id = source.id,
        processed = summary.processed,
        updated = summary.updated,
        skipped = summary.skipped,
        failed = summary.failed,
        deactivated = summary.deactivated,
        "Ingestion finished"
    );
    Ok(summary)
}

/// Brings page state to the start of a pass
fn prepare_pages<S: Storage>(storage: &SharedStorage<S>, source_id: i64, force: bool) -> Result<()> {
    let mut store = lock(storage)?;

    if force {
        let cleared = store.clear_pages(source_id)?;
        info!(source_id, cleared, "Cleared crawl pages for forced reseed");
        return Ok(());
    }

    let resumed = store.reset_interrupted_pages(source_id)?;
    if resumed > 0 {
        info!(source_id, resumed, "Resuming pages left in fetching");
    }

    let counts = store.count_pages(source_id)?;
    if counts.pending == 0 && counts.done > 0 {
        let reset = store.begin_pass(source_id)?;
        info!(source_id, reset, "Previous pass complete, starting a new pass");
    }
    Ok(())
}

/// Seeds the root, the manifest and discovered URLs
///
/// # Returns
///
/// The number of pages newly created
fn seed_pages<S: Storage>(
    storage: &SharedStorage<S>,
    source: &SourceRecord,
    scope: &CrawlScope,
    raw_root: &str,
    root: &Url,
    discovery: &Discovery,
) -> Result<u64> {
    let mut store = lock(storage)?;
    let budget = u64::from(source.max_pages);
    let mut total = store.count_pages(source.id)?.total;
    let mut created = 0;

    // The root is always seeded
    if store.upsert_crawl_page(source.id, raw_root, root.as_str(), 0)? {
        total += 1;
        created += 1;
    }

    if let Some(manifest) = discovery.manifest_url.as_ref().filter(|m| scope.contains(m)) {
        if total < budget && store.upsert_crawl_page(source.id, manifest.as_str(), manifest.as_str(), 0)? {
            total += 1;
            created += 1;
        }
    }

    if source.max_depth >= 1 {
        for url in &discovery.urls {
            if total >= budget {
                break;
            }
            let Ok(normalized) = normalize_url(url.as_str()) else {
                continue;
            };
            if !scope.contains(&normalized) {
                continue;
            }
            if store.upsert_crawl_page(source.id, url.as_str(), normalized.as_str(), 1)? {
                total += 1;
                created += 1;
            }
        }
    }

    Ok(created)
}

/// Marks documents not produced by the current pass as inactive
fn sweep<S: Storage>(
    storage: &SharedStorage<S>,
    source_id: i64,
    version_label: &str,
    tally: &CrawlTally,
) -> Result<u64> {
    let mut store = lock(storage)?;
    let mut kept = store.done_document_paths(source_id)?;
    kept.extend(tally.kept_paths.iter().cloned());

    let deactivated = store.deactivate_missing_documents(source_id, version_label, &kept)?;
    if deactivated > 0 {
        info!(source_id, deactivated, kept = kept.len(), "Deactivated stale documents");
    }
    Ok(deactivated)
}
