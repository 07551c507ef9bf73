use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Serialize, Deserialize};
use serde_json::json;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

use crate::cli::config::AutomationSettings;
use crate::notify::Notifier;

/// What a registration page attempt resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// The confirm dialog appeared; message text attached
    Confirmed(String),

    /// A rate-limit phrase was observed in the site's responses
    RateLimited(String),

    /// Neither dialog nor rate limit within the combined wait
    TimedOut,
}

/// The channel-registration surface of the admin site.
///
/// `await_outcome` races the native confirm dialog against rate-limit
/// detection under the configured combined timeout.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegistrationPage: Send + Sync {
    /// Load (or reload) the pending-registration listing
    async fn open(&self) -> Result<()>;

    /// Items still awaiting registration on the current page
    async fn pending_items(&self) -> Result<usize>;

    async fn select_all(&self) -> Result<()>;

    /// Trigger the channel push action for the selection
    async fn trigger_channel_push(&self) -> Result<()>;

    async fn submit(&self) -> Result<()>;

    async fn await_outcome(&self) -> Result<PageOutcome>;
}

/// Result of one paginated registration attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationPageResult {
    pub page: u32,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Counts recovered from a confirmation message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationCounts {
    pub success: u64,
    pub fail: u64,
    pub duplicate: u64,
    pub already_registered: u64,
}

impl RegistrationCounts {
    fn add(&mut self, other: RegistrationCounts) {
        self.success += other.success;
        self.fail += other.fail;
        self.duplicate += other.duplicate;
        self.already_registered += other.already_registered;
    }
}

/// Aggregated outcome of a registration batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationSummary {
    pub counts: RegistrationCounts,
    pub daily_limit_reached: bool,
    pub pages: Vec<RegistrationPageResult>,
}

fn success_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)success\D*(\d+)").expect("invalid regex"))
}

fn fail_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)fail(?:ed)?\D*(\d+)").expect("invalid regex"))
}

fn duplicate_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)duplicate\D*(\d+)").expect("invalid regex"))
}

fn already_registered_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)already[ -]registered\D*(\d+)").expect("invalid regex"))
}

/// Recover per-page counts from the free-text confirmation message.
///
/// The message format is fixed by the site; absent fragments count as zero.
pub fn parse_registration_counts(message: &str) -> RegistrationCounts {
    let capture = |re: &Regex| {
        re.captures(message)
            .and_then(|caps| caps[1].parse().ok())
            .unwrap_or(0)
    };

    RegistrationCounts {
        success: capture(success_regex()),
        fail: capture(fail_regex()),
        duplicate: capture(duplicate_regex()),
        already_registered: capture(already_registered_regex()),
    }
}

enum PageAttempt {
    /// No pending items left; the whole batch is done
    Drained,
    Outcome(PageOutcome),
}

/// Push every pending page of products to the sales channel.
///
/// Pages advance until the listing drains, the repeat bound is hit, or the
/// daily limit is observed. A page failure after all retries is recorded
/// and the next page still runs; a rate limit halts the batch.
pub async fn register_all(
    page: &dyn RegistrationPage,
    notifier: &dyn Notifier,
    settings: &AutomationSettings,
) -> Result<RegistrationSummary> {
    let mut summary = RegistrationSummary {
        counts: RegistrationCounts::default(),
        daily_limit_reached: false,
        pages: Vec::new(),
    };

    'pages: for page_no in 1..=settings.registration_repeat_count {
        let mut last_error = String::new();
        let mut outcome = None;

        for attempt in 1..=settings.max_retry_count {
            match attempt_page(page).await {
                Ok(PageAttempt::Drained) => {
                    info!("No pending items left after {} page(s)", summary.pages.len());
                    break 'pages;
                }
                Ok(PageAttempt::Outcome(PageOutcome::TimedOut)) => {
                    last_error = "timed out waiting for confirmation".to_string();
                    warn!(
                        "Registration page {} attempt {}/{} timed out",
                        page_no, attempt, settings.max_retry_count
                    );
                }
                Ok(PageAttempt::Outcome(resolved)) => {
                    outcome = Some(resolved);
                    break;
                }
                Err(e) => {
                    last_error = format!("{:#}", e);
                    warn!(
                        "Registration page {} attempt {}/{} failed: {:#}",
                        page_no, attempt, settings.max_retry_count, e
                    );
                }
            }

            if attempt < settings.max_retry_count {
                tokio::time::sleep(Duration::from_millis(settings.retry_delay_ms)).await;
            }
        }

        match outcome {
            Some(PageOutcome::Confirmed(message)) => {
                let counts = parse_registration_counts(&message);
                summary.counts.add(counts);
                summary.pages.push(RegistrationPageResult {
                    page: page_no,
                    success: true,
                    alert_message: Some(message),
                    error_message: None,
                });
            }
            Some(PageOutcome::RateLimited(phrase)) => {
                warn!("Daily registration limit reached on page {}: {}", page_no, phrase);
                summary.daily_limit_reached = true;
                summary.pages.push(RegistrationPageResult {
                    page: page_no,
                    success: false,
                    alert_message: None,
                    error_message: Some(phrase.clone()),
                });
                notifier
                    .emit("registration", "daily-limit", json!({ "page": page_no, "phrase": phrase }))
                    .await;
                // No further page advances once the limit is seen
                break 'pages;
            }
            Some(PageOutcome::TimedOut) | None => {
                summary.pages.push(RegistrationPageResult {
                    page: page_no,
                    success: false,
                    alert_message: None,
                    error_message: Some(last_error),
                });
            }
        }
    }

    notifier
        .emit(
            "registration",
            "summary",
            serde_json::to_value(&summary).unwrap_or_default(),
        )
        .await;

    Ok(summary)
}

/// One select-all → push → submit → await pass over the current page
async fn attempt_page(page: &dyn RegistrationPage) -> Result<PageAttempt> {
    page.open().await?;

    if page.pending_items().await? == 0 {
        return Ok(PageAttempt::Drained);
    }

    page.select_all().await?;
    page.trigger_channel_push().await?;
    page.submit().await?;

    Ok(PageAttempt::Outcome(page.await_outcome().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::Value;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    /// Records emitted events for assertions
    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<(String, String, Value)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn emit(&self, topic: &str, event: &str, payload: Value) {
            self.events
                .lock()
                .await
                .push((topic.to_string(), event.to_string(), payload));
        }
    }

    fn settings() -> AutomationSettings {
        AutomationSettings {
            max_retry_count: 3,
            retry_delay_ms: 1,
            registration_wait_secs: 1,
            registration_repeat_count: 5,
            parallel_pages: 2,
            detail_batch_size: 50,
            courier_allow_list: vec![],
            rate_limit_phrases: vec!["daily registration limit".to_string()],
        }
    }

    #[test]
    fn confirmation_counts_are_parsed_with_fixed_regexes() {
        let message = "Push finished. success: 8, fail: 1, duplicate: 2, already-registered: 3";
        let counts = parse_registration_counts(message);
        assert_eq!(
            counts,
            RegistrationCounts { success: 8, fail: 1, duplicate: 2, already_registered: 3 }
        );
    }

    #[test]
    fn absent_count_fragments_default_to_zero() {
        let counts = parse_registration_counts("success: 4");
        assert_eq!(counts.success, 4);
        assert_eq!(counts.fail, 0);
        assert_eq!(counts.duplicate, 0);
        assert_eq!(counts.already_registered, 0);
    }

    #[tokio::test]
    async fn failing_page_is_attempted_exactly_max_retry_count_times() {
        let opens = Arc::new(AtomicU32::new(0));
        let opens_in_mock = opens.clone();

        let mut page = MockRegistrationPage::new();
        page.expect_open().returning(move || {
            opens_in_mock.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        page.expect_pending_items().returning(|| Ok(10));
        page.expect_select_all().returning(|| Ok(()));
        page.expect_trigger_channel_push().returning(|| Ok(()));
        page.expect_submit().returning(|| Err(anyhow!("click intercepted")));

        let notifier = RecordingNotifier::default();
        let mut settings = settings();
        settings.registration_repeat_count = 1;

        let summary = register_all(&page, &notifier, &settings).await.unwrap();

        assert_eq!(opens.load(Ordering::SeqCst), 3);
        assert_eq!(summary.pages.len(), 1);
        assert!(!summary.pages[0].success);
        assert!(summary.pages[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("click intercepted"));
    }

    #[tokio::test]
    async fn rate_limit_halts_all_further_pages() {
        let opens = Arc::new(AtomicU32::new(0));
        let opens_in_mock = opens.clone();

        let mut page = MockRegistrationPage::new();
        page.expect_open().returning(move || {
            opens_in_mock.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        page.expect_pending_items().returning(|| Ok(10));
        page.expect_select_all().returning(|| Ok(()));
        page.expect_trigger_channel_push().returning(|| Ok(()));
        page.expect_submit().returning(|| Ok(()));
        page.expect_await_outcome()
            .returning(|| Ok(PageOutcome::RateLimited("daily registration limit".to_string())));

        let notifier = RecordingNotifier::default();
        let summary = register_all(&page, &notifier, &settings()).await.unwrap();

        // Despite a repeat bound of 5, nothing runs past the rate-limited
        // page
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(summary.daily_limit_reached);
        assert_eq!(summary.pages.len(), 1);

        let events = notifier.events.lock().await;
        assert!(events
            .iter()
            .any(|(topic, event, _)| topic == "registration" && event == "daily-limit"));
    }

    #[tokio::test]
    async fn drained_listing_ends_the_batch() {
        let mut page = MockRegistrationPage::new();
        let pages_seen = Arc::new(AtomicU32::new(0));
        let seen_in_mock = pages_seen.clone();

        page.expect_open().returning(|| Ok(()));
        page.expect_pending_items().returning(move || {
            // First page has items, second is drained
            if seen_in_mock.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(3)
            } else {
                Ok(0)
            }
        });
        page.expect_select_all().returning(|| Ok(()));
        page.expect_trigger_channel_push().returning(|| Ok(()));
        page.expect_submit().returning(|| Ok(()));
        page.expect_await_outcome()
            .returning(|| Ok(PageOutcome::Confirmed("success: 3, fail: 0".to_string())));

        let notifier = RecordingNotifier::default();
        let summary = register_all(&page, &notifier, &settings()).await.unwrap();

        assert_eq!(summary.pages.len(), 1);
        assert_eq!(summary.counts.success, 3);
        assert!(!summary.daily_limit_reached);
    }

    #[tokio::test]
    async fn counts_accumulate_across_pages() {
        let mut page = MockRegistrationPage::new();
        let pages_seen = Arc::new(AtomicU32::new(0));
        let seen_in_mock = pages_seen.clone();

        page.expect_open().returning(|| Ok(()));
        page.expect_pending_items().returning(move || {
            if seen_in_mock.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(5)
            } else {
                Ok(0)
            }
        });
        page.expect_select_all().returning(|| Ok(()));
        page.expect_trigger_channel_push().returning(|| Ok(()));
        page.expect_submit().returning(|| Ok(()));
        page.expect_await_outcome()
            .returning(|| Ok(PageOutcome::Confirmed("success: 4, duplicate: 1".to_string())));

        let notifier = RecordingNotifier::default();
        let summary = register_all(&page, &notifier, &settings()).await.unwrap();

        assert_eq!(summary.pages.len(), 2);
        assert_eq!(summary.counts.success, 8);
        assert_eq!(summary.counts.duplicate, 2);

        // The batch summary is emitted once at the end
        let events = notifier.events.lock().await;
        let summaries: Vec<_> = events.iter().filter(|(_, event, _)| event == "summary").collect();
        assert_eq!(summaries.len(), 1);
    }
}
