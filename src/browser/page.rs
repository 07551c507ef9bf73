use anyhow::{Result, Context};
use thirtyfour::prelude::*;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// How often the dialog acceptor re-checks for a native alert
const DIALOG_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Interval between selector wait polls
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Handle to one admin-site browser tab.
///
/// Cloning shares the underlying WebDriver session; the session pool owns
/// the lifecycle and quits the driver when the owning job releases it.
#[derive(Clone)]
pub struct AdminPage {
    driver: WebDriver,
    wait_timeout: Duration,
}

impl AdminPage {
    pub fn new(driver: WebDriver, wait_timeout: Duration) -> Self {
        Self { driver, wait_timeout }
    }

    pub fn driver(&self) -> &WebDriver {
        &self.driver
    }

    /// Navigate to a URL
    pub async fn goto(&self, url: &str) -> Result<()> {
        debug!("Navigating to: {}", url);
        self.driver.goto(url).await
            .context(format!("Failed to navigate to URL: {}", url))?;

        Ok(())
    }

    /// Get the current DOM snapshot
    pub async fn source(&self) -> Result<String> {
        let source = self.driver.source().await
            .context("Failed to get page source")?;

        Ok(source)
    }

    /// Wait for an element to be present, failing after the configured
    /// timeout
    pub async fn wait_for(&self, selector: &str) -> Result<WebElement> {
        let element = self.driver.query(By::Css(selector))
            .wait(self.wait_timeout, WAIT_POLL_INTERVAL)
            .first()
            .await
            .context(format!("Element not found: {}", selector))?;

        Ok(element)
    }

    /// Wait for an element, returning None instead of an error when it
    /// never appears
    pub async fn try_wait_for(&self, selector: &str) -> Result<Option<WebElement>> {
        let deadline = Instant::now() + self.wait_timeout;

        loop {
            let mut elements = self.driver.find_all(By::Css(selector)).await
                .context(format!("Failed to query element: {}", selector))?;

            if !elements.is_empty() {
                return Ok(Some(elements.remove(0)));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }

            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Whether the element exists right now, without waiting
    pub async fn exists_now(&self, selector: &str) -> Result<bool> {
        let elements = self.driver.find_all(By::Css(selector)).await
            .context(format!("Failed to query element: {}", selector))?;

        Ok(!elements.is_empty())
    }

    /// Click the first element matching the selector
    pub async fn click(&self, selector: &str) -> Result<()> {
        let element = self.wait_for(selector).await?;
        element.click().await
            .context(format!("Failed to click element: {}", selector))?;

        Ok(())
    }

    /// Clear an input and type the given text into it
    pub async fn fill(&self, selector: &str, text: &str) -> Result<()> {
        let element = self.wait_for(selector).await?;
        element.clear().await
            .context(format!("Failed to clear input: {}", selector))?;
        element.send_keys(text).await
            .context(format!("Failed to type into input: {}", selector))?;

        Ok(())
    }

    /// Collect the text of every element matching the selector
    pub async fn texts(&self, selector: &str) -> Result<Vec<String>> {
        let elements = self.driver.find_all(By::Css(selector)).await
            .context(format!("Failed to find elements: {}", selector))?;

        let mut texts = Vec::new();
        for element in elements {
            let text = element.text().await
                .context(format!("Failed to read element text: {}", selector))?;
            texts.push(text);
        }

        Ok(texts)
    }

    /// Accept the next native dialog within the timeout, returning its
    /// message text.
    ///
    /// The dialog is accepted exactly once; if none appears in time the
    /// call fails.
    pub async fn accept_next_dialog(&self, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.driver.get_alert_text().await {
                Ok(text) => {
                    self.driver.accept_alert().await
                        .context("Failed to accept dialog")?;
                    debug!("Accepted dialog: {}", text);
                    return Ok(text);
                }
                Err(_) if Instant::now() < deadline => {
                    tokio::time::sleep(DIALOG_POLL_INTERVAL).await;
                }
                Err(_) => {
                    anyhow::bail!("No dialog appeared within {:?}", timeout);
                }
            }
        }
    }

    /// Arm a one-shot acceptor for the next dialog before triggering the
    /// action that opens it.
    ///
    /// Returns a handle resolving to the dialog message, or to an error if
    /// the timeout elapses first.
    pub fn arm_dialog_acceptor(&self, timeout: Duration) -> JoinHandle<Result<String>> {
        let page = self.clone();
        tokio::spawn(async move { page.accept_next_dialog(timeout).await })
    }

    /// Quit the underlying driver session
    pub async fn quit(self) -> Result<()> {
        self.driver.quit().await
            .context("Failed to quit browser session")?;

        Ok(())
    }
}
