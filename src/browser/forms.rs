use anyhow::{Result, Context};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::automation::deletion::ListingAdmin;
use crate::automation::order::{OrderForm, Receiver};
use crate::automation::registration::{PageOutcome, RegistrationPage};
use crate::browser::page::AdminPage;
use crate::cli::config::{OrderSelectors, RegistrationSelectors};

/// How often the registration outcome race re-checks dialog and responses
const OUTCOME_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Order form driven through a live admin page
pub struct SiteOrderForm {
    page: AdminPage,
    selectors: OrderSelectors,
    order_url: String,
    dialog_timeout: Duration,
}

impl SiteOrderForm {
    pub fn new(page: AdminPage, selectors: OrderSelectors, order_url: String, dialog_timeout: Duration) -> Self {
        Self {
            page,
            selectors,
            order_url,
            dialog_timeout,
        }
    }
}

#[async_trait]
impl OrderForm for SiteOrderForm {
    async fn open_order_form(&self, product_code: &str) -> Result<bool> {
        self.page.goto(&self.order_url).await?;
        self.page.fill(&self.selectors.search_input, product_code).await?;
        self.page.click(&self.selectors.search_button).await?;

        // The order affordance only renders for listed products
        match self.page.try_wait_for(&self.selectors.order_button).await? {
            Some(button) => {
                button.click().await
                    .context("Failed to open the order form")?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn option_labels(&self) -> Result<Vec<String>> {
        self.page.texts(&self.selectors.option_row).await
    }

    async fn choose_option(&self, index: usize) -> Result<()> {
        let rows = self
            .page
            .driver()
            .find_all(thirtyfour::By::Css(&self.selectors.option_row))
            .await
            .context("Failed to find option rows")?;

        let row = rows
            .get(index)
            .context(format!("Option index {} out of range", index))?;
        row.click().await
            .context("Failed to select option")?;

        Ok(())
    }

    async fn set_quantity(&self, quantity: u32) -> Result<()> {
        self.page
            .fill(&self.selectors.quantity_input, &quantity.to_string())
            .await
    }

    async fn fill_receiver(&self, receiver: &Receiver) -> Result<()> {
        self.page.fill(&self.selectors.receiver_name_input, &receiver.name).await?;
        self.page.fill(&self.selectors.receiver_phone_input, &receiver.phone).await?;
        self.page.fill(&self.selectors.postcode_input, &receiver.postcode).await?;
        self.page.fill(&self.selectors.address_input, &receiver.address).await?;

        if let Some(memo) = &receiver.memo {
            self.page.fill(&self.selectors.memo_input, memo).await?;
        }

        Ok(())
    }

    async fn submit_and_confirm(&self) -> Result<()> {
        // Arm the one-shot acceptor before the click so the native confirm
        // prompt is always answered exactly once
        let acceptor = self.page.arm_dialog_acceptor(self.dialog_timeout);

        self.page.click(&self.selectors.submit_button).await?;

        let message = acceptor
            .await
            .context("Dialog acceptor task failed")??;
        debug!("Order submission confirmed: {}", message);

        Ok(())
    }
}

/// Channel-registration screen driven through a live admin page
pub struct SiteRegistrationPage {
    page: AdminPage,
    selectors: RegistrationSelectors,
    registration_url: String,
    outcome_timeout: Duration,
    rate_limit_phrases: Vec<String>,
}

impl SiteRegistrationPage {
    pub fn new(
        page: AdminPage,
        selectors: RegistrationSelectors,
        registration_url: String,
        outcome_timeout: Duration,
        rate_limit_phrases: Vec<String>,
    ) -> Self {
        Self {
            page,
            selectors,
            registration_url,
            outcome_timeout,
            rate_limit_phrases,
        }
    }

    fn matched_phrase(&self, text: &str) -> Option<String> {
        self.rate_limit_phrases
            .iter()
            .find(|phrase| text.contains(phrase.as_str()))
            .cloned()
    }
}

#[async_trait]
impl RegistrationPage for SiteRegistrationPage {
    async fn open(&self) -> Result<()> {
        self.page.goto(&self.registration_url).await
    }

    async fn pending_items(&self) -> Result<usize> {
        let rows = self
            .page
            .driver()
            .find_all(thirtyfour::By::Css(&self.selectors.item_row))
            .await
            .context("Failed to count pending items")?;

        Ok(rows.len())
    }

    async fn select_all(&self) -> Result<()> {
        self.page.click(&self.selectors.select_all_checkbox).await
    }

    async fn trigger_channel_push(&self) -> Result<()> {
        self.page.click(&self.selectors.push_button).await
    }

    async fn submit(&self) -> Result<()> {
        self.page.click(&self.selectors.submit_button).await
    }

    async fn await_outcome(&self) -> Result<PageOutcome> {
        let deadline = Instant::now() + self.outcome_timeout;

        loop {
            // Dialog first: accepting it is what unblocks the page either
            // way
            if let Ok(text) = self.page.driver().get_alert_text().await {
                self.page.driver().accept_alert().await
                    .context("Failed to accept confirmation dialog")?;

                if let Some(phrase) = self.matched_phrase(&text) {
                    return Ok(PageOutcome::RateLimited(phrase));
                }
                return Ok(PageOutcome::Confirmed(text));
            }

            // The site reports the daily limit in a response body rendered
            // into the page rather than in the dialog
            let source = self.page.source().await?;
            if let Some(phrase) = self.matched_phrase(&source) {
                return Ok(PageOutcome::RateLimited(phrase));
            }

            if Instant::now() >= deadline {
                return Ok(PageOutcome::TimedOut);
            }

            tokio::time::sleep(OUTCOME_POLL_INTERVAL).await;
        }
    }
}

/// Listing-management screen used by the sold-out deletion sweep
pub struct SiteListingAdmin {
    page: AdminPage,
    selectors: OrderSelectors,
    search_url: String,
    dialog_timeout: Duration,
}

impl SiteListingAdmin {
    pub fn new(page: AdminPage, selectors: OrderSelectors, search_url: String, dialog_timeout: Duration) -> Self {
        Self {
            page,
            selectors,
            search_url,
            dialog_timeout,
        }
    }
}

#[async_trait]
impl ListingAdmin for SiteListingAdmin {
    async fn search(&self, product_code: &str) -> Result<bool> {
        self.page.goto(&self.search_url).await?;
        self.page.fill(&self.selectors.search_input, product_code).await?;
        self.page.click(&self.selectors.search_button).await?;

        Ok(self.page.try_wait_for(&self.selectors.delete_button).await?.is_some())
    }

    async fn delete_listed(&self) -> Result<()> {
        let acceptor = self.page.arm_dialog_acceptor(self.dialog_timeout);

        self.page.click(&self.selectors.delete_button).await?;

        let message = acceptor
            .await
            .context("Dialog acceptor task failed")??;
        debug!("Deletion confirmed: {}", message);

        Ok(())
    }
}
