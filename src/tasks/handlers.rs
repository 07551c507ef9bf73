use anyhow::{Result, Context};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::automation::deletion::delete_products;
use crate::automation::order::place_order;
use crate::automation::registration::register_all;
use crate::browser::forms::{SiteListingAdmin, SiteOrderForm, SiteRegistrationPage};
use crate::browser::page::AdminPage;
use crate::browser::session::SessionKey;
use crate::browser::session::SessionPool;
use crate::cli::config::AppConfig;
use crate::dispatch::envelope::{JobPayload, PlaceOrdersData, SoldoutData};
use crate::notify::Notifier;
use crate::queue::engine::{JobHandler, JobQueue};
use crate::queue::job::Job;
use crate::scrape::catalog::{self, CatalogEntry, ProductRecord};
use crate::scrape::delivery;
use crate::scrape::pagination::{paginate, PageChunk};
use crate::scrape::soldout::{self, extract_product_codes, SoldoutRow};
use crate::storage::products::{save_in_batches, ProductStore};

/// Shared services injected into every job handler
pub struct TaskContext {
    pub config: AppConfig,
    pub pool: SessionPool,
    pub store: Arc<dyn ProductStore>,
    pub notifier: Arc<dyn Notifier>,
}

impl TaskContext {
    fn payload(job: &Job) -> Result<JobPayload> {
        serde_json::from_value(job.payload.clone())
            .context("Job payload does not match the envelope contract")
    }

    fn dialog_timeout(&self) -> Duration {
        Duration::from_secs(self.config.webdriver.wait_timeout)
    }
}

/// Register every queued task handler on the queue
pub fn register_handlers(queue: &JobQueue, ctx: Arc<TaskContext>) {
    queue.register_handler(
        "crawlOnchSoldoutProducts",
        Arc::new(CrawlSoldoutHandler { ctx: ctx.clone() }),
    );
    queue.register_handler(
        "deleteOnchProducts",
        Arc::new(DeleteProductsHandler { ctx: ctx.clone() }),
    );
    queue.register_handler(
        "crawlOnchRegisteredProducts",
        Arc::new(CrawlCatalogHandler { ctx: ctx.clone() }),
    );
    queue.register_handler(
        "placeOnchOrders",
        Arc::new(PlaceOrdersHandler { ctx: ctx.clone() }),
    );
    queue.register_handler(
        "extractOnchDeliveries",
        Arc::new(ExtractDeliveriesHandler { ctx: ctx.clone() }),
    );
    queue.register_handler("registerOnchProducts", Arc::new(RegisterProductsHandler { ctx }));
}

/// Crawl the sold-out listing through a page fetcher, returning the
/// distinct product codes as the job result.
///
/// Factored over the fetcher so the flow runs identically against a live
/// page or a mocked source.
pub async fn crawl_soldout_flow<F, Fut>(fetch: F) -> Value
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PageChunk<SoldoutRow>>>,
{
    let result = paginate(fetch).await;
    let codes = extract_product_codes(&result.records);

    json!({ "soldoutProductCodes": codes })
}

/// Cutoff for sold-out detection: the payload value, or 24 hours before
/// the job starts
fn soldout_cutoff(data: &SoldoutData) -> DateTime<Utc> {
    data.since.unwrap_or_else(|| Utc::now() - ChronoDuration::hours(24))
}

fn resolve_url(base: &str, href: &str) -> Result<String> {
    let base = Url::parse(base).context(format!("Invalid base URL: {}", base))?;
    let resolved = base
        .join(href)
        .context(format!("Failed to resolve detail URL: {}", href))?;

    Ok(resolved.to_string())
}

struct CrawlSoldoutHandler {
    ctx: Arc<TaskContext>,
}

#[async_trait]
impl JobHandler for CrawlSoldoutHandler {
    async fn run(&self, job: &Job) -> Result<Value> {
        let payload = TaskContext::payload(job)?;
        let data: SoldoutData = serde_json::from_value(payload.data.clone()).unwrap_or_default();
        let since = soldout_cutoff(&data);

        let key = SessionKey::new(&payload.store, &payload.job_id);
        let guard = self.ctx.pool.context_guard(key.clone());
        let page = self.ctx.pool.acquire_session(&key).await?;

        let config = &self.ctx.config;
        let selectors = &config.selectors.soldout;
        let result = crawl_soldout_flow(|page_no| {
            let page = page.clone();
            async move {
                page.goto(&config.page_url(&config.store.soldout_path, page_no)).await?;
                let html = page.source().await?;
                let records = soldout::parse_soldout_rows(&html, selectors, since)?;
                let has_next = soldout::has_next_page(&html, selectors)?;
                Ok(PageChunk { records, has_next })
            }
        })
        .await;

        guard.release().await;

        info!("Job {}: sold-out crawl finished", payload.job_id);
        Ok(result)
    }
}

struct DeleteProductsHandler {
    ctx: Arc<TaskContext>,
}

#[async_trait]
impl JobHandler for DeleteProductsHandler {
    async fn run(&self, job: &Job) -> Result<Value> {
        let payload = TaskContext::payload(job)?;
        let data: SoldoutData = serde_json::from_value(payload.data.clone()).unwrap_or_default();
        let since = soldout_cutoff(&data);

        let key = SessionKey::new(&payload.store, &payload.job_id);
        let guard = self.ctx.pool.context_guard(key.clone());
        let page = self.ctx.pool.acquire_session(&key).await?;

        let config = &self.ctx.config;
        let selectors = &config.selectors.soldout;

        // First sweep the sold-out listing for the codes to remove
        let crawled = paginate(|page_no| {
            let page = page.clone();
            async move {
                page.goto(&config.page_url(&config.store.soldout_path, page_no)).await?;
                let html = page.source().await?;
                let records = soldout::parse_soldout_rows(&html, selectors, since)?;
                let has_next = soldout::has_next_page(&html, selectors)?;
                Ok(PageChunk { records, has_next })
            }
        })
        .await;

        let codes = extract_product_codes(&crawled.records);
        info!("Job {}: deleting {} sold-out listing(s)", payload.job_id, codes.len());

        let admin = SiteListingAdmin::new(
            page.clone(),
            config.selectors.order.clone(),
            config.url(&config.store.order_path),
            self.ctx.dialog_timeout(),
        );
        let outcomes = delete_products(&admin, &codes).await;
        let deleted = outcomes.iter().filter(|outcome| outcome.deleted).count();

        guard.release().await;

        Ok(json!({
            "requested": codes.len(),
            "deleted": deleted,
            "outcomes": outcomes,
        }))
    }
}

struct CrawlCatalogHandler {
    ctx: Arc<TaskContext>,
}

impl CrawlCatalogHandler {
    /// Extract details for one worker's share of the catalog entries.
    ///
    /// A single failed detail page is logged and skipped; the sweep is
    /// best effort.
    async fn extract_details(
        page: AdminPage,
        entries: &[CatalogEntry],
        config: &AppConfig,
    ) -> Vec<ProductRecord> {
        let mut records = Vec::new();

        for entry in entries {
            match Self::extract_one(&page, entry, config).await {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("Detail extraction failed for {}: {:#}", entry.product_code, e);
                }
            }
        }

        records
    }

    async fn extract_one(
        page: &AdminPage,
        entry: &CatalogEntry,
        config: &AppConfig,
    ) -> Result<ProductRecord> {
        let url = resolve_url(&config.store.base_url, &entry.detail_url)?;
        page.goto(&url).await?;
        let html = page.source().await?;

        catalog::parse_product_detail(&html, &config.selectors.catalog, &entry.product_code)
    }
}

#[async_trait]
impl JobHandler for CrawlCatalogHandler {
    async fn run(&self, job: &Job) -> Result<Value> {
        let payload = TaskContext::payload(job)?;

        let key = SessionKey::new(&payload.store, &payload.job_id);
        let guard = self.ctx.pool.context_guard(key.clone());
        let page = self.ctx.pool.acquire_session(&key).await?;

        let config = &self.ctx.config;
        let selectors = &config.selectors.catalog;

        let listing = paginate(|page_no| {
            let page = page.clone();
            async move {
                page.goto(&config.page_url(&config.store.catalog_path, page_no)).await?;
                let html = page.source().await?;
                let records = catalog::parse_catalog_rows(&html, selectors)?;
                let has_next = catalog::has_next_page(&html, selectors)?;
                Ok(PageChunk { records, has_next })
            }
        })
        .await;

        let entries = listing.records;
        info!(
            "Job {}: {} catalog entries over {} page(s)",
            payload.job_id,
            entries.len(),
            listing.pages_fetched
        );

        let mut records = Vec::new();
        if !entries.is_empty() {
            // Fan the detail pages out over siblings of the logged-in
            // context, with an all-complete barrier before flushing
            let workers = config.automation.parallel_pages.max(1).min(entries.len());
            let pages = self.ctx.pool.create_parallel_pages(&key, workers).await?;

            let chunk_size = (entries.len() + workers - 1) / workers;
            let sweeps = pages
                .iter()
                .zip(entries.chunks(chunk_size))
                .map(|(page, chunk)| Self::extract_details(page.clone(), chunk, config));

            for extracted in join_all(sweeps).await {
                records.extend(extracted);
            }
        }

        let batches = save_in_batches(
            self.ctx.store.as_ref(),
            &records,
            config.automation.detail_batch_size,
        )
        .await?;

        guard.release().await;

        Ok(json!({
            "entries": entries.len(),
            "products": records.len(),
            "batches": batches,
        }))
    }
}

struct PlaceOrdersHandler {
    ctx: Arc<TaskContext>,
}

#[async_trait]
impl JobHandler for PlaceOrdersHandler {
    async fn run(&self, job: &Job) -> Result<Value> {
        let payload = TaskContext::payload(job)?;
        let data: PlaceOrdersData = serde_json::from_value(payload.data.clone())
            .context("placeOnchOrders payload must carry an orders list")?;

        let key = SessionKey::new(&payload.store, &payload.job_id);
        let guard = self.ctx.pool.context_guard(key.clone());
        let page = self.ctx.pool.acquire_session(&key).await?;

        let config = &self.ctx.config;
        let form = SiteOrderForm::new(
            page.clone(),
            config.selectors.order.clone(),
            config.url(&config.store.order_path),
            self.ctx.dialog_timeout(),
        );

        let mut results = Vec::with_capacity(data.orders.len());
        for order in &data.orders {
            // Missing receiver fields abort the job; item-level failures
            // are already folded into the outcome
            let outcome = place_order(&form, order).await?;
            results.push(outcome);
        }

        guard.release().await;

        info!("Job {}: placed {} order(s)", payload.job_id, results.len());
        Ok(json!({ "results": results }))
    }
}

struct ExtractDeliveriesHandler {
    ctx: Arc<TaskContext>,
}

#[async_trait]
impl JobHandler for ExtractDeliveriesHandler {
    async fn run(&self, job: &Job) -> Result<Value> {
        let payload = TaskContext::payload(job)?;

        let key = SessionKey::new(&payload.store, &payload.job_id);
        let guard = self.ctx.pool.context_guard(key.clone());
        let page = self.ctx.pool.acquire_session(&key).await?;

        let config = &self.ctx.config;
        let selectors = &config.selectors.delivery;
        let couriers = &config.automation.courier_allow_list;

        let result = paginate(|page_no| {
            let page = page.clone();
            async move {
                page.goto(&config.page_url(&config.store.delivery_path, page_no)).await?;
                let html = page.source().await?;
                let records = delivery::parse_delivery_rows(&html, selectors, couriers)?;
                let has_next = delivery::has_next_page(&html, selectors)?;
                Ok(PageChunk { records, has_next })
            }
        })
        .await;

        guard.release().await;

        info!(
            "Job {}: {} delivery record(s) over {} page(s)",
            payload.job_id,
            result.records.len(),
            result.pages_fetched
        );
        Ok(json!({ "deliveries": result.records }))
    }
}

struct RegisterProductsHandler {
    ctx: Arc<TaskContext>,
}

#[async_trait]
impl JobHandler for RegisterProductsHandler {
    async fn run(&self, job: &Job) -> Result<Value> {
        let payload = TaskContext::payload(job)?;

        let key = SessionKey::new(&payload.store, &payload.job_id);
        let guard = self.ctx.pool.context_guard(key.clone());
        let page = self.ctx.pool.acquire_session(&key).await?;

        let config = &self.ctx.config;
        let registration = SiteRegistrationPage::new(
            page.clone(),
            config.selectors.registration.clone(),
            config.url(&config.store.registration_path),
            Duration::from_secs(config.automation.registration_wait_secs),
            config.automation.rate_limit_phrases.clone(),
        );

        let summary = register_all(&registration, self.ctx.notifier.as_ref(), &config.automation).await?;

        guard.release().await;

        info!(
            "Job {}: registration batch done, {} succeeded, daily limit: {}",
            payload.job_id, summary.counts.success, summary.daily_limit_reached
        );
        Ok(serde_json::to_value(summary)?)
    }
}
