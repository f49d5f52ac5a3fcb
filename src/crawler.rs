use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rusqlite::Connection;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::db;
use crate::extract;
use crate::hook::OutputHook;
use crate::input::RunInput;
use crate::limiter;
use crate::record;

const CONCURRENCY: usize = 10;
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;
const READ_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CrawlStats {
    pub pages: usize,
    pub records: usize,
    pub errors: usize,
    /// The run ended because maxItems was reached.
    pub capped: bool,
}

/// Everything one page handler produces: its record batch, the pagination
/// link, or the fetch error after retries were exhausted.
struct PageOutcome {
    page_id: i64,
    url: String,
    records: Vec<serde_json::Value>,
    next_page_url: Option<String>,
    error: Option<String>,
}

#[derive(Clone)]
pub struct Crawler {
    max_items: Option<usize>,
    fetch_email_from_detail: bool,
    proxy_urls: Vec<String>,
    hook: Option<OutputHook>,
}

impl Crawler {
    pub fn from_input(input: &RunInput) -> Self {
        Self {
            max_items: input.max_items,
            fetch_email_from_detail: input.fetch_email_from_detail,
            proxy_urls: input
                .proxy_configuration
                .as_ref()
                .map(|p| p.proxy_urls.clone())
                .unwrap_or_default(),
            hook: input
                .extend_output_cmd
                .clone()
                .map(OutputHook::new),
        }
    }

    /// Crawl in waves over the unvisited frontier until it is empty, the
    /// page limit is hit, or the record cap stops the run.
    pub async fn run(&self, conn: &Connection, page_limit: Option<usize>) -> Result<CrawlStats> {
        let mut stats = CrawlStats {
            pages: 0,
            records: 0,
            errors: 0,
            capped: false,
        };

        loop {
            // A resumed run may already be at the cap before fetching anything.
            if let Some(max) = self.max_items {
                let count = db::record_count(conn)?;
                if count >= max {
                    info!(
                        "Dataset already holds {} records (maxItems {}), stopping",
                        count, max
                    );
                    stats.capped = true;
                    break;
                }
            }

            let wave_limit = match page_limit {
                Some(limit) => {
                    let remaining = limit.saturating_sub(stats.pages);
                    if remaining == 0 {
                        break;
                    }
                    Some(remaining)
                }
                None => None,
            };

            let pages = db::fetch_unvisited(conn, wave_limit)?;
            if pages.is_empty() {
                break;
            }

            debug!("Crawling wave of {} pages", pages.len());
            let stopped = self.crawl_wave(conn, pages, &mut stats).await?;
            if stopped {
                stats.capped = true;
                break;
            }
        }

        Ok(stats)
    }

    /// One wave: fetch every page concurrently under the semaphore, stream
    /// outcomes to this single consumer. All store/enqueue operations happen
    /// here, serialized, so the record cap is enforced exactly.
    async fn crawl_wave(
        &self,
        conn: &Connection,
        pages: Vec<(i64, String)>,
        stats: &mut CrawlStats,
    ) -> Result<bool> {
        let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
        let pb = ProgressBar::new(pages.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                .progress_chars("=> "),
        );

        let (tx, mut rx) = mpsc::channel::<PageOutcome>(CONCURRENCY * 2);

        for (page_id, url) in pages {
            let crawler = self.clone();
            let sem = Arc::clone(&semaphore);
            let tx = tx.clone();

            tokio::spawn(async move {
                let _permit = sem.acquire().await.unwrap();
                let outcome = crawler.handle_page(page_id, &url).await;
                let _ = tx.send(outcome).await;
            });
        }

        // Drop our copy of tx so rx closes when all spawned tasks finish
        drop(tx);

        let mut stopped = false;
        while let Some(outcome) = rx.recv().await {
            pb.inc(1);

            if let Some(err) = &outcome.error {
                warn!("Giving up on {}: {}", outcome.url, err);
                stats.errors += 1;
                db::mark_visited(conn, outcome.page_id, Some(err))?;
                continue;
            }

            if stopped {
                // Cap already hit: discard this in-flight result; the page
                // stays unvisited so a resumed run can pick it up.
                debug!("Discarding late result for {}", outcome.url);
                continue;
            }

            let current = db::record_count(conn)?;
            let decision = limiter::apply_cap(current, self.max_items, outcome.records.len());

            info!("Found {} results on {}", outcome.records.len(), outcome.url);
            if decision.take > 0 {
                db::push_records(conn, &outcome.url, &outcome.records[..decision.take])?;
                stats.records += decision.take;
            }
            db::mark_visited(conn, outcome.page_id, None)?;
            stats.pages += 1;

            if decision.stop {
                info!(
                    "Reached maxItems ({}), stopping",
                    self.max_items.unwrap_or(current)
                );
                stopped = true;
                continue;
            }

            match &outcome.next_page_url {
                Some(next) => {
                    if db::enqueue(conn, next)? {
                        info!("Found next page, adding to queue: {}", next);
                    } else {
                        info!("Next page already in queue: {}", next);
                    }
                }
                None => info!("No next page found on {}", outcome.url),
            }
        }

        pb.finish_and_clear();
        Ok(stopped)
    }

    async fn handle_page(&self, page_id: i64, url: &str) -> PageOutcome {
        let html = match self.fetch_with_retry(url).await {
            Ok(html) => html,
            Err(e) => {
                return PageOutcome {
                    page_id,
                    url: url.to_string(),
                    records: Vec::new(),
                    next_page_url: None,
                    error: Some(format!("{e:#}")),
                }
            }
        };

        let page = extract::extract_results(&html, url);
        let mut records = Vec::with_capacity(page.listings.len());

        for mut raw in page.listings {
            if self.fetch_email_from_detail && raw.email_attr.is_none() {
                if let Some(detail_url) = raw.url.clone() {
                    match self.fetch_with_retry(&detail_url).await {
                        Ok(detail) => raw.email_attr = extract::extract_detail_email(&detail),
                        Err(e) => warn!("Detail fetch failed for {}: {:#}", detail_url, e),
                    }
                }
            }

            let rec = record::normalize(&raw);
            let mut value = match serde_json::to_value(&rec) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Failed to serialize record from {}: {}", url, e);
                    continue;
                }
            };
            if let Some(hook) = &self.hook {
                hook.apply(&mut value).await;
            }
            records.push(value);
        }

        PageOutcome {
            page_id,
            url: url.to_string(),
            records,
            next_page_url: page.next_page_url,
            error: None,
        }
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<String> {
        for attempt in 0..=MAX_RETRIES {
            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    if !is_retryable(&e) || attempt == MAX_RETRIES {
                        return Err(e);
                    }
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(
                        "Fetch failed for {} (attempt {}/{}), backing off {:.1}s: {:#}",
                        url,
                        attempt + 1,
                        MAX_RETRIES,
                        backoff.as_secs_f64(),
                        e
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
        bail!("retries exhausted for {url}")
    }

    async fn fetch_once(&self, url: &str) -> Result<String> {
        let client = self.build_client()?;
        let response = client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    fn build_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().read_timeout(READ_TIMEOUT);
        if let Some(proxy) = self.proxy_urls.choose(&mut rand::thread_rng()) {
            builder = builder
                .proxy(reqwest::Proxy::http(proxy)?)
                .proxy(reqwest::Proxy::https(proxy)?);
        }
        Ok(builder.build()?)
    }
}

fn is_retryable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<reqwest::Error>().is_some_and(|e| {
        e.is_timeout()
            || e.is_connect()
            || e.status()
                .is_some_and(|s| s.as_u16() == 429 || s.is_server_error())
    })
}
