//! Crawl scheduler
//!
//! The scheduler is a loop over persisted state. Every iteration re-reads
//! page counts and pulls a bounded batch of pending pages from storage; no
//! queue is carried in memory between iterations. Each batch is processed
//! concurrently and fully settled before the next one starts.
//!
//! Page state machine: `pending -> fetching -> {done, failed}`.

use crate::crawler::change::{content_hash, detect_change, document_uri, DOCUMENT_CONTENT_TYPE};
use crate::crawler::chunk::{ChunkBuilder, ChunkInput};
use crate::crawler::fetcher::{FetchError, FetchOptions, FetchedPage, PageFetcher};
use crate::crawler::gate::{check_content, GateRules};
use crate::crawler::progress::{PageOutcome, ProgressEvent, ProgressSink};
use crate::state::PageStatus;
use crate::storage::{lock, CrawlPageRecord, DocumentUpsert, SharedStorage, Storage};
use crate::url::{is_manifest_url, normalize_url, CrawlScope};
use crate::{LibrarianError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Everything the scheduler needs to know about one source's crawl
pub struct CrawlPlan {
    pub source_id: i64,
    pub scope: CrawlScope,
    pub max_depth: u32,
    pub max_pages: u32,
    pub version_label: String,
    pub gate: GateRules,
    pub fetch: FetchOptions,
    pub concurrency: usize,
    pub page_timeout: Duration,
    /// Tokens handed to the chunk builder, e.g. the source host
    pub prefix: Vec<String>,
}

/// Collaborators shared by all page tasks
pub struct CrawlServices<S> {
    pub storage: SharedStorage<S>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub chunker: Arc<dyn ChunkBuilder>,
    pub progress: Arc<dyn ProgressSink>,
}

impl<S> Clone for CrawlServices<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            fetcher: Arc::clone(&self.fetcher),
            chunker: Arc::clone(&self.chunker),
            progress: Arc::clone(&self.progress),
        }
    }
}

/// Counters accumulated over one scheduler run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlTally {
    pub processed: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Document paths successfully produced during this run
    pub kept_paths: HashSet<String>,
    /// The loop stopped early because shutdown was requested
    pub interrupted: bool,
}

/// How one page settled
#[derive(Debug, Clone, PartialEq, Eq)]
enum PageResult {
    Success {
        path: Option<String>,
        links: Vec<String>,
        updated: bool,
    },
    Skipped(String),
    Failed(String),
}

impl From<FetchError> for PageResult {
    fn from(err: FetchError) -> Self {
        if err.is_skippable() {
            PageResult::Skipped(err.to_string())
        } else {
            PageResult::Failed(err.to_string())
        }
    }
}

/// Drives batches of pending pages until none remain
pub struct Scheduler<S> {
    services: CrawlServices<S>,
    plan: Arc<CrawlPlan>,
    shutdown: watch::Receiver<bool>,
}

impl<S: Storage + Send + 'static> Scheduler<S> {
    pub fn new(
        services: CrawlServices<S>,
        plan: CrawlPlan,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            services,
            plan: Arc::new(plan),
            shutdown,
        }
    }

    /// Runs the crawl loop
    ///
    /// Page-level problems are counted and recorded on the page. Only
    /// storage faults abort the loop.
    pub async fn run(&mut self) -> Result<CrawlTally> {
        let mut tally = CrawlTally::default();
        let source_id = self.plan.source_id;

        loop {
            if *self.shutdown.borrow() {
                info!(source_id, "Shutdown requested, stopping after settled batch");
                tally.interrupted = true;
                break;
            }

            let (counts, batch) = {
                let mut store = lock(&self.services.storage)?;
                let counts = store.count_pages(source_id)?;
                if counts.pending == 0 {
                    break;
                }

                let batch = store.pending_pages(source_id, self.plan.concurrency)?;
                for page in &batch {
                    transition(&mut *store, page.id, page.status, PageStatus::Fetching, None)?;
                }
                (counts, batch)
            };

            self.services
                .progress
                .report(&ProgressEvent::batch(counts.done, counts.total));
            debug!(source_id, batch = batch.len(), "Dispatching batch");

            let handles: Vec<JoinHandle<Result<PageResult>>> = batch
                .iter()
                .map(|page| {
                    let services = self.services.clone();
                    let plan = Arc::clone(&self.plan);
                    let page = page.clone();
                    tokio::spawn(async move {
                        let timeout = plan.page_timeout;
                        match tokio::time::timeout(timeout, process_page(services, plan, page)).await
                        {
                            Ok(result) => result,
                            Err(_) => Ok(FetchError::Timeout(timeout).into()),
                        }
                    })
                })
                .collect();

            // Settle every task before acting on any outcome
            let mut settled = Vec::with_capacity(handles.len());
            for handle in handles {
                settled.push(match handle.await {
                    Ok(result) => result,
                    Err(join_err) => Ok(FetchError::Aborted(join_err.to_string()).into()),
                });
            }

            for (page, result) in batch.iter().zip(settled) {
                self.apply_result(page, result?, &mut tally, counts.total)?;
            }
        }

        Ok(tally)
    }

    fn apply_result(
        &self,
        page: &CrawlPageRecord,
        result: PageResult,
        tally: &mut CrawlTally,
        total: u64,
    ) -> Result<()> {
        let mut store = lock(&self.services.storage)?;

        let (outcome, message) = match result {
            PageResult::Success {
                path,
                links,
                updated,
            } => {
                tally.processed += 1;
                if updated {
                    tally.updated += 1;
                }
                transition(&mut *store, page.id, PageStatus::Fetching, PageStatus::Done, None)?;
                store.set_page_document_path(page.id, path.as_deref())?;
                if let Some(path) = path {
                    tally.kept_paths.insert(path);
                }
                let enqueued = enqueue_links(&mut *store, &self.plan, page, &links)?;
                debug!(url = %page.url, links = links.len(), enqueued, "Page done");
                (PageOutcome::Success, None)
            }
            PageResult::Skipped(reason) => {
                tally.skipped += 1;
                transition(
                    &mut *store,
                    page.id,
                    PageStatus::Fetching,
                    PageStatus::Done,
                    Some(&reason),
                )?;
                (PageOutcome::Skip, Some(reason))
            }
            PageResult::Failed(message) => {
                tally.failed += 1;
                warn!(url = %page.url, error = %message, "Page failed");
                transition(
                    &mut *store,
                    page.id,
                    PageStatus::Fetching,
                    PageStatus::Failed,
                    Some(&message),
                )?;
                (PageOutcome::Error, Some(message))
            }
        };
        drop(store);

        self.services.progress.report(&ProgressEvent::page(
            tally.processed,
            total,
            &page.url,
            outcome,
            message,
        ));
        Ok(())
    }
}

/// Applies a checked status change
fn transition<S: Storage + ?Sized>(
    store: &mut S,
    page_id: i64,
    from: PageStatus,
    to: PageStatus,
    error_message: Option<&str>,
) -> Result<()> {
    if !from.can_transition_to(to) {
        return Err(LibrarianError::InvalidTransition { from, to });
    }
    store.set_page_status(page_id, to, error_message)?;
    Ok(())
}

/// Enqueues a page's outbound links subject to scope, depth and budget
///
/// # Returns
///
/// The number of new pages created
fn enqueue_links<S: Storage + ?Sized>(
    store: &mut S,
    plan: &CrawlPlan,
    parent: &CrawlPageRecord,
    links: &[String],
) -> Result<u64> {
    let depth = parent.depth + 1;
    if depth > plan.max_depth || links.is_empty() {
        return Ok(0);
    }

    let budget = u64::from(plan.max_pages);
    let mut total = store.count_pages(plan.source_id)?.total;
    let mut created = 0;

    for link in links {
        if total >= budget {
            debug!(source_id = plan.source_id, budget, "Page budget reached");
            break;
        }

        let Ok(normalized) = normalize_url(link) else {
            continue;
        };
        if !plan.scope.contains(&normalized) {
            continue;
        }

        if store.upsert_crawl_page(plan.source_id, link, normalized.as_str(), depth)? {
            total += 1;
            created += 1;
        }
    }

    Ok(created)
}

/// Fetches, gates and stores one page
///
/// `Err` is reserved for storage faults; everything that goes wrong with the
/// page itself comes back as a skip or failure.
async fn process_page<S: Storage + Send + 'static>(
    services: CrawlServices<S>,
    plan: Arc<CrawlPlan>,
    page: CrawlPageRecord,
) -> Result<PageResult> {
    let url = match Url::parse(&page.normalized_url) {
        Ok(url) => url,
        Err(e) => return Ok(FetchError::InvalidUrl(e.to_string()).into()),
    };

    if is_manifest_url(&url) {
        return Ok(match services.fetcher.fetch_manifest(&url).await {
            Ok(links) => PageResult::Success {
                path: None,
                links,
                updated: false,
            },
            Err(e) => e.into(),
        });
    }

    let fetched = match services.fetcher.fetch(&url, &plan.fetch).await {
        Ok(fetched) => fetched,
        Err(e) => return Ok(e.into()),
    };

    let stored_hash = {
        let store = lock(&services.storage)?;
        store
            .get_document(plan.source_id, &fetched.path, &plan.version_label)?
            .map(|doc| doc.content_hash)
    };
    store_fetched(&services, &plan, &url, fetched, stored_hash.as_deref())
}

/// Gates, chunks and stores fetched content
///
/// `stored_hash` was read before the write lock is taken and may be stale by
/// then. An unchanged verdict is re-checked under the write lock; if the
/// stored content moved in between, the page is gated and rebuilt in full.
fn store_fetched<S: Storage>(
    services: &CrawlServices<S>,
    plan: &CrawlPlan,
    url: &Url,
    fetched: FetchedPage,
    stored_hash: Option<&str>,
) -> Result<PageResult> {
    let hash = content_hash(&fetched.content);
    let title = fetched
        .title
        .clone()
        .unwrap_or_else(|| fetched.path.clone());
    let uri = document_uri(url, &fetched.path);
    let document = DocumentUpsert {
        source_id: plan.source_id,
        path: &fetched.path,
        uri: &uri,
        title: &title,
        hash: &hash,
        content_type: DOCUMENT_CONTENT_TYPE,
        version_label: &plan.version_label,
        content: &fetched.content,
    };

    // Unchanged content is kept fresh without re-gating or re-chunking
    if !detect_change(stored_hash, &hash).needs_rebuild() {
        let mut store = lock(&services.storage)?;
        let current = store
            .get_document(plan.source_id, &fetched.path, &plan.version_label)?
            .map(|doc| doc.content_hash);
        if current.as_deref() == Some(hash.as_str()) {
            let updated = store.store_document(&document, &[])?.changed;
            return Ok(PageResult::Success {
                path: Some(fetched.path),
                links: fetched.links,
                updated,
            });
        }
        debug!(url = %url, "Stored content changed since it was read, rebuilding");
    }

    if let Err(rejection) = check_content(&fetched.content, &plan.gate) {
        return Ok(FetchError::from(rejection).into());
    }
    let drafts = services.chunker.build(&ChunkInput {
        content: &fetched.content,
        path: &fetched.path,
        title: &title,
        prefix: &plan.prefix,
    });
    let updated = lock(&services.storage)?
        .store_document(&document, &drafts)?
        .changed;

    Ok(PageResult::Success {
        path: Some(fetched.path),
        links: fetched.links,
        updated,
    })
}
