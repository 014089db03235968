use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Datelike;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::aggregate::AggregateTable;
use crate::extract::{self, ListingItem, TemplateId};
use crate::fetch::{Fetch, FetchError};
use crate::paginate::{PageResult, Paginator};
use crate::record::{AwardRecord, ExtractionOutcome, FieldWarning};

/// One run's worth of source and policy knobs, consumed as plain values.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub template: TemplateId,
    pub base_url: String,
    pub page_size: u32,
    pub page_limit: Option<usize>,
    pub item_concurrency: usize,
    /// Abort the run when failed units / processed units exceeds this.
    pub failure_tolerance: f64,
    pub query: Option<String>,
    pub from_year: Option<i32>,
    pub to_year: Option<i32>,
}

impl RunConfig {
    pub fn new(template: TemplateId, base_url: impl Into<String>) -> Self {
        RunConfig {
            template,
            base_url: base_url.into(),
            page_size: 50,
            page_limit: None,
            item_concurrency: 8,
            failure_tolerance: 0.25,
            query: None,
            from_year: None,
            to_year: None,
        }
    }
}

/// Run totals, reported whether or not the run finished cleanly.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub pages_done: usize,
    pub pages_failed: usize,
    pub items_done: usize,
    pub items_failed: usize,
    pub items_filtered: usize,
    pub ok: usize,
    pub partial: usize,
    pub merge_conflicts: usize,
    /// Set when the run stopped early, with the reason.
    pub aborted: Option<String>,
}

impl RunSummary {
    pub fn print(&self) {
        println!(
            "Pages: {} ok, {} failed. Items: {} aggregated ({} clean, {} partial), {} failed, {} filtered.",
            self.pages_done,
            self.pages_failed,
            self.items_done,
            self.ok,
            self.partial,
            self.items_failed,
            self.items_filtered,
        );
        if self.merge_conflicts > 0 {
            println!("Merge conflicts: {}", self.merge_conflicts);
        }
        if let Some(reason) = &self.aborted {
            println!("Run aborted early: {}", reason);
        }
    }

    fn failure_rate(&self) -> f64 {
        let failed = self.items_failed + self.pages_failed;
        let total = self.items_done + self.items_filtered + failed;
        if total == 0 {
            0.0
        } else {
            failed as f64 / total as f64
        }
    }
}

/// Drive paginator -> extractor -> normalizer -> aggregator until the source
/// is exhausted, the stop signal fires, or the failure tolerance trips.
/// Always returns the table built so far plus the run summary; an item's
/// outcome is merged atomically or not at all.
pub async fn run<F: Fetch>(
    fetcher: Arc<F>,
    config: &RunConfig,
    stop: Arc<AtomicBool>,
) -> (AggregateTable, RunSummary) {
    let mut paginator = Paginator::new(config.template, &config.base_url, config.page_size);
    let mut table = AggregateTable::new();
    let mut summary = RunSummary::default();

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {pos} items ({per_sec})")
            .expect("static progress template"),
    );

    loop {
        if stop.load(Ordering::Relaxed) {
            summary.aborted = Some("stopped".to_string());
            break;
        }
        if let Some(limit) = config.page_limit {
            if summary.pages_done + summary.pages_failed >= limit {
                break;
            }
        }

        let (items, total_hint) = match paginator.next_page(&*fetcher).await {
            PageResult::End => break,
            PageResult::FetchError(e) => {
                warn!(cursor = %paginator.cursor(), error = %e, "listing page fetch failed");
                summary.pages_failed += 1;
                if !paginator.skip_page() {
                    summary.aborted = Some(format!("unrecoverable fetch error: {}", e));
                    break;
                }
                if summary.failure_rate() > config.failure_tolerance {
                    summary.aborted = Some("failure tolerance exceeded".to_string());
                    break;
                }
                continue;
            }
            PageResult::Page { items, total_hint } => (items, total_hint),
        };

        if let Some(total) = total_hint {
            pb.set_length(total as u64);
        }

        process_page(&fetcher, config, &stop, items, &mut table, &mut summary, &pb).await;
        summary.pages_done += 1;
        info!(
            pages_done = summary.pages_done,
            items_done = summary.items_done,
            items_failed = summary.items_failed,
            "page processed"
        );

        if summary.failure_rate() > config.failure_tolerance {
            summary.aborted = Some("failure tolerance exceeded".to_string());
            break;
        }
    }

    pb.finish_and_clear();
    summary.ok = table.ok;
    summary.partial = table.partial;
    summary.merge_conflicts = table.merge_conflicts.len();
    (table, summary)
}

/// Extract one page's items with a bounded worker pool. Workers send outcomes
/// over a channel; this task is the single aggregator writer.
#[allow(clippy::too_many_arguments)]
async fn process_page<F: Fetch>(
    fetcher: &Arc<F>,
    config: &RunConfig,
    stop: &Arc<AtomicBool>,
    items: Vec<ListingItem>,
    table: &mut AggregateTable,
    summary: &mut RunSummary,
    pb: &ProgressBar,
) {
    let semaphore = Arc::new(Semaphore::new(config.item_concurrency.max(1)));
    let (tx, mut rx) =
        tokio::sync::mpsc::channel::<ExtractionOutcome>(config.item_concurrency.max(1) * 2);

    for item in items {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let fetcher = Arc::clone(fetcher);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        let template = config.template;
        tokio::spawn(async move {
            let _permit = sem.acquire().await.expect("semaphore closed");
            let outcome = process_item(item, template, &*fetcher).await;
            let _ = tx.send(outcome).await;
        });
    }
    drop(tx);

    while let Some(outcome) = rx.recv().await {
        match &outcome {
            ExtractionOutcome::Failure(_) => {
                summary.items_failed += 1;
                table.add(outcome);
            }
            _ => {
                let keep = outcome
                    .record()
                    .map(|r| passes_filters(r, config))
                    .unwrap_or(true);
                if keep {
                    summary.items_done += 1;
                    table.add(outcome);
                } else {
                    summary.items_filtered += 1;
                }
            }
        }
        pb.inc(1);
    }
}

/// Fetch the detail document when the template requires one, then finalize.
async fn process_item<F: Fetch>(
    mut item: ListingItem,
    template: TemplateId,
    fetcher: &F,
) -> ExtractionOutcome {
    let mut source_url = item.listing_url.clone();
    let mut fetched_at = item.fetched_at;

    if !template.rules().detail.is_empty() {
        match item.detail_url.clone() {
            Some(url) => match fetcher.fetch(&url).await {
                Ok(page) => {
                    extract::apply_detail(&page, template, &mut item.fields, &mut item.warnings);
                    source_url = page.url;
                    fetched_at = page.fetched_at;
                }
                Err(FetchError::Timeout(_)) => {
                    return ExtractionOutcome::Failure("timeout".to_string())
                }
                Err(e) => return ExtractionOutcome::Failure(e.to_string()),
            },
            None => item.warnings.push(FieldWarning {
                field: "detail".to_string(),
                message: "detail link not found in listing item".to_string(),
            }),
        }
    }

    extract::finalize(template, item.fields, item.warnings, source_url, fetched_at)
}

fn passes_filters(record: &AwardRecord, config: &RunConfig) -> bool {
    if let Some(query) = &config.query {
        let needle = query.to_lowercase();
        let hit = [record.title.as_deref(), record.recipient.as_deref()]
            .iter()
            .flatten()
            .any(|text| text.to_lowercase().contains(&needle));
        if !hit {
            return false;
        }
    }

    // Undated records pass date filters rather than being silently dropped.
    if let Some(date) = record.date_announced {
        if let Some(from) = config.from_year {
            if date.year() < from {
                return false;
            }
        }
        if let Some(to) = config.to_year {
            if date.year() > to {
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{RawPage, StaticFetcher};

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    fn data_list_fetcher() -> Arc<StaticFetcher> {
        Arc::new(StaticFetcher::new(&[
            (
                "https://grants.example.org/grants-database?limit=3&page=1",
                fixture("data_list_page1"),
            ),
            (
                "https://grants.example.org/grants-database?limit=3&page=2",
                fixture("data_list_page2"),
            ),
            (
                "https://grants.example.org/grants-database?limit=3&page=3",
                fixture("data_list_empty"),
            ),
        ]))
    }

    fn data_list_config() -> RunConfig {
        let mut config = RunConfig::new(
            TemplateId::DataList,
            "https://grants.example.org/grants-database",
        );
        config.page_size = 3;
        config.failure_tolerance = 0.5;
        config
    }

    #[tokio::test]
    async fn data_list_run_merges_duplicates() {
        let (table, summary) = run(
            data_list_fetcher(),
            &data_list_config(),
            Arc::new(AtomicBool::new(false)),
        )
        .await;

        assert_eq!(summary.pages_done, 2);
        assert_eq!(summary.items_done, 4);
        assert_eq!(summary.items_failed, 1);
        assert!(summary.aborted.is_none());

        // A1 appeared on both pages; the page-2 copy had no amount. The merged
        // row keeps page 1's value.
        assert_eq!(table.len(), 3);
        let a1 = table.rows().iter().find(|r| r.award_id == "A1").unwrap();
        assert_eq!(a1.amount, Some(50000.0));
        assert_eq!(a1.title.as_deref(), Some("Grant X"));

        // Boilerplate got stripped on the way in
        let a3 = table.rows().iter().find(|r| r.award_id == "A3").unwrap();
        assert_eq!(a3.title.as_deref(), Some("Grant Z"));
    }

    #[tokio::test]
    async fn malformed_item_does_not_poison_run() {
        let (table, summary) = run(
            data_list_fetcher(),
            &data_list_config(),
            Arc::new(AtomicBool::new(false)),
        )
        .await;
        // One orphaned item on page 1 failed; everything else went through.
        assert_eq!(summary.items_failed, 1);
        assert!(summary.aborted.is_none());
        assert!(table.len() >= 2);
    }

    #[tokio::test]
    async fn card_grid_run_pulls_amounts_from_detail_pages() {
        let fetcher = Arc::new(StaticFetcher::new(&[
            (
                "https://grants.example.org/grants?limit=2&offset=0",
                fixture("card_grid_page1"),
            ),
            (
                "https://grants.example.org/grants?limit=2&offset=2",
                fixture("card_grid_page2"),
            ),
            ("https://grants.example.org/grants/m1", fixture("card_detail_m1")),
            ("https://grants.example.org/grants/m2", fixture("card_detail_m2")),
            ("https://grants.example.org/grants/m3", fixture("card_detail_m3")),
        ]));
        let mut config = RunConfig::new(TemplateId::CardGrid, "https://grants.example.org/grants");
        config.page_size = 2;

        let (table, summary) = run(fetcher, &config, Arc::new(AtomicBool::new(false))).await;

        assert_eq!(summary.pages_done, 2);
        assert_eq!(table.len(), 3);
        let m1 = table.rows().iter().find(|r| r.award_id == "M1").unwrap();
        assert_eq!(m1.amount, Some(2500000.0));
        assert!(m1.source_url.ends_with("/grants/m1"));
        let m3 = table.rows().iter().find(|r| r.award_id == "M3").unwrap();
        assert_eq!(m3.amount, Some(180000.0));
    }

    #[tokio::test]
    async fn missing_detail_page_fails_only_that_item() {
        // M2's detail page is gone (404): that item fails, its siblings on
        // both pages still come through.
        let fetcher = Arc::new(StaticFetcher::new(&[
            (
                "https://grants.example.org/grants?limit=2&offset=0",
                fixture("card_grid_page1"),
            ),
            (
                "https://grants.example.org/grants?limit=2&offset=2",
                fixture("card_grid_page2"),
            ),
            ("https://grants.example.org/grants/m1", fixture("card_detail_m1")),
            ("https://grants.example.org/grants/m3", fixture("card_detail_m3")),
        ]));
        let mut config = RunConfig::new(TemplateId::CardGrid, "https://grants.example.org/grants");
        config.page_size = 2;
        config.failure_tolerance = 0.6;

        let (table, summary) = run(fetcher, &config, Arc::new(AtomicBool::new(false))).await;

        assert_eq!(summary.items_failed, 1);
        assert!(summary.aborted.is_none());
        assert_eq!(table.len(), 2);
        assert!(table.rows().iter().all(|r| r.award_id != "M2"));
        assert!(table.rows().iter().any(|r| r.award_id == "M1"));
        assert!(table.rows().iter().any(|r| r.award_id == "M3"));
    }

    #[tokio::test]
    async fn detail_timeout_lands_as_tallied_failure() {
        struct SlowDetailFetcher {
            inner: StaticFetcher,
            slow_url: String,
        }

        impl Fetch for SlowDetailFetcher {
            async fn fetch(&self, url: &str) -> Result<RawPage, FetchError> {
                if url == self.slow_url {
                    return Err(FetchError::Timeout(url.to_string()));
                }
                self.inner.fetch(url).await
            }
        }

        let fetcher = Arc::new(SlowDetailFetcher {
            inner: StaticFetcher::new(&[
                (
                    "https://grants.example.org/grants?limit=2&offset=0",
                    fixture("card_grid_page1"),
                ),
                (
                    "https://grants.example.org/grants?limit=2&offset=2",
                    fixture("card_grid_page2"),
                ),
                ("https://grants.example.org/grants/m1", fixture("card_detail_m1")),
                ("https://grants.example.org/grants/m3", fixture("card_detail_m3")),
            ]),
            slow_url: "https://grants.example.org/grants/m2".to_string(),
        });
        let mut config = RunConfig::new(TemplateId::CardGrid, "https://grants.example.org/grants");
        config.page_size = 2;
        config.failure_tolerance = 0.6;

        let (table, summary) = run(fetcher, &config, Arc::new(AtomicBool::new(false))).await;

        assert_eq!(summary.items_failed, 1);
        assert!(summary.aborted.is_none());
        assert_eq!(table.len(), 2);
        assert!(table.rows().iter().all(|r| r.award_id != "M2"));
    }

    #[tokio::test]
    async fn stop_signal_returns_partial_table() {
        let stop = Arc::new(AtomicBool::new(true));
        let (table, summary) = run(data_list_fetcher(), &data_list_config(), stop).await;
        assert!(table.is_empty());
        assert_eq!(summary.pages_done, 0);
        assert_eq!(summary.aborted.as_deref(), Some("stopped"));
    }

    #[tokio::test]
    async fn page_fetch_error_skips_to_next_cursor() {
        // Page 2 is missing: its fetch fails, the paginator skips to page 3,
        // which ends the run cleanly.
        let fetcher = Arc::new(StaticFetcher::new(&[
            (
                "https://grants.example.org/grants-database?limit=3&page=1",
                fixture("data_list_page1"),
            ),
            (
                "https://grants.example.org/grants-database?limit=3&page=3",
                fixture("data_list_empty"),
            ),
        ]));
        let mut config = data_list_config();
        config.failure_tolerance = 0.9;

        let (table, summary) = run(fetcher, &config, Arc::new(AtomicBool::new(false))).await;
        assert_eq!(summary.pages_failed, 1);
        assert_eq!(summary.pages_done, 1);
        assert!(summary.aborted.is_none());
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn failure_tolerance_aborts_run() {
        let mut config = data_list_config();
        // Page 1 has one bad item in three; a zero tolerance trips after it.
        config.failure_tolerance = 0.0;
        let (table, summary) = run(
            data_list_fetcher(),
            &config,
            Arc::new(AtomicBool::new(false)),
        )
        .await;
        assert_eq!(summary.aborted.as_deref(), Some("failure tolerance exceeded"));
        // Partial results still come back
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn query_filter_drops_non_matching_records() {
        let mut config = data_list_config();
        config.query = Some("coastal".to_string());
        let (table, summary) = run(
            data_list_fetcher(),
            &config,
            Arc::new(AtomicBool::new(false)),
        )
        .await;
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0].award_id, "A2");
        assert!(summary.items_filtered >= 3);
    }

    #[tokio::test]
    async fn year_filter_respects_range() {
        let mut config = data_list_config();
        config.from_year = Some(2024);
        let (table, _summary) = run(
            data_list_fetcher(),
            &config,
            Arc::new(AtomicBool::new(false)),
        )
        .await;
        // Everything in the fixtures is dated 2023
        assert!(table.is_empty());
    }
}
