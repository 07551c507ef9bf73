use anyhow::{Result, Context};
use thirtyfour::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::browser::page::AdminPage;
use crate::cli::config::{LoginSelectors, StoreSettings, WebDriverSettings};
use crate::utils::error::WorkerError;

/// Identifies an authenticated browser context.
///
/// Keyed by store AND job id so concurrent jobs against the same store
/// never share a context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub store: String,
    pub job_id: String,
}

impl SessionKey {
    pub fn new(store: &str, job_id: &str) -> Self {
        Self {
            store: store.to_string(),
            job_id: job_id.to_string(),
        }
    }
}

/// One authenticated context: the page that performed the login plus any
/// sibling pages fanned out from it
struct Session {
    primary: AdminPage,
    siblings: Vec<AdminPage>,
}

struct PoolInner {
    webdriver: WebDriverSettings,
    store: StoreSettings,
    login: LoginSelectors,
    sessions: Mutex<HashMap<SessionKey, Session>>,
}

/// Pool of authenticated browser sessions, one per (store, job id).
///
/// Every acquire must be paired with `release_context` on all exit paths;
/// `context_guard` gives callers a drop-time backstop.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl SessionPool {
    pub fn new(webdriver: WebDriverSettings, store: StoreSettings, login: LoginSelectors) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                webdriver,
                store,
                login,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Get the authenticated primary page for the key, logging in on first
    /// use.
    ///
    /// Login failure is fatal for the whole job.
    pub async fn acquire_session(&self, key: &SessionKey) -> Result<AdminPage> {
        let mut sessions = self.inner.sessions.lock().await;

        if let Some(session) = sessions.get(key) {
            debug!("Reusing session for {}/{}", key.store, key.job_id);
            return Ok(session.primary.clone());
        }

        info!("Opening new session for {}/{}", key.store, key.job_id);
        let page = self.new_page().await?;

        if let Err(e) = self.login(&page).await {
            // Half-open sessions must not linger in the driver
            if let Err(quit_err) = page.quit().await {
                error!("Failed to close session after login failure: {:#}", quit_err);
            }
            return Err(WorkerError::LoginFailed {
                store: key.store.clone(),
                reason: format!("{:#}", e),
            }
            .into());
        }

        sessions.insert(
            key.clone(),
            Session {
                primary: page.clone(),
                siblings: Vec::new(),
            },
        );

        Ok(page)
    }

    /// Open one extra page sharing the key's authenticated state
    pub async fn create_page(&self, key: &SessionKey) -> Result<AdminPage> {
        let primary = {
            let sessions = self.inner.sessions.lock().await;
            sessions
                .get(key)
                .map(|session| session.primary.clone())
                .context(format!("No session for {}/{}", key.store, key.job_id))?
        };

        let page = self.clone_authenticated(&primary).await?;

        let mut sessions = self.inner.sessions.lock().await;
        match sessions.get_mut(key) {
            Some(session) => session.siblings.push(page.clone()),
            None => {
                // The context was released while the page was being
                // prepared; do not leak the fresh driver
                let _ = page.quit().await;
                anyhow::bail!("Session for {}/{} was released", key.store, key.job_id);
            }
        }

        Ok(page)
    }

    /// Open `n` sibling pages for fan-out extraction
    pub async fn create_parallel_pages(&self, key: &SessionKey, n: usize) -> Result<Vec<AdminPage>> {
        let mut pages = Vec::with_capacity(n);
        for _ in 0..n {
            pages.push(self.create_page(key).await?);
        }

        debug!("Opened {} parallel pages for {}/{}", n, key.store, key.job_id);
        Ok(pages)
    }

    /// Close one sibling page
    pub async fn release_page(&self, key: &SessionKey, page: AdminPage) -> Result<()> {
        {
            let mut sessions = self.inner.sessions.lock().await;
            if let Some(session) = sessions.get_mut(key) {
                session
                    .siblings
                    .retain(|sibling| sibling.driver().handle.session_id != page.driver().handle.session_id);
            }
        }

        page.quit().await
    }

    /// Close every page of the key and forget the session.
    ///
    /// Safe to call twice; the second call is a no-op.
    pub async fn release_context(&self, key: &SessionKey) {
        let session = {
            let mut sessions = self.inner.sessions.lock().await;
            sessions.remove(key)
        };

        let Some(session) = session else {
            return;
        };

        debug!("Releasing context for {}/{}", key.store, key.job_id);

        for sibling in session.siblings {
            if let Err(e) = sibling.quit().await {
                warn!("Failed to close sibling page: {:#}", e);
            }
        }
        if let Err(e) = session.primary.quit().await {
            warn!("Failed to close primary page: {:#}", e);
        }
    }

    /// Guard that releases the key's context when dropped, covering error
    /// and cancellation exits
    pub fn context_guard(&self, key: SessionKey) -> ContextGuard {
        ContextGuard {
            pool: self.clone(),
            key: Some(key),
        }
    }

    /// Start a fresh driver session
    async fn new_page(&self) -> Result<AdminPage> {
        let settings = &self.inner.webdriver;

        let mut caps = DesiredCapabilities::chrome();
        if settings.headless {
            caps.set_headless()?;
        }
        caps.add_chrome_arg("--disable-dev-shm-usage")?;

        let driver = WebDriver::new(&settings.endpoint, caps).await
            .context("Failed to connect to WebDriver")?;

        driver
            .set_page_load_timeout(Duration::from_secs(settings.page_load_timeout))
            .await?;

        Ok(AdminPage::new(driver, Duration::from_secs(settings.wait_timeout)))
    }

    /// Authenticate a fresh page against the admin site
    async fn login(&self, page: &AdminPage) -> Result<()> {
        let store = &self.inner.store;
        let login = &self.inner.login;
        let url = format!("{}{}", store.base_url.trim_end_matches('/'), store.login_path);

        page.goto(&url).await?;
        page.fill(&login.username_input, &store.username).await?;
        page.fill(&login.password_input, &store.password).await?;
        page.click(&login.submit_button).await?;

        // The marker only renders once the session is authenticated
        page.wait_for(&login.logged_in_marker).await
            .context("Login marker did not appear")?;

        debug!("Logged in to {}", store.base_url);
        Ok(())
    }

    /// Start a sibling driver session carrying the primary's cookies
    async fn clone_authenticated(&self, primary: &AdminPage) -> Result<AdminPage> {
        let page = self.new_page().await?;

        // Cookies can only be set for the current domain
        page.goto(&self.inner.store.base_url).await?;

        let cookies = primary.driver().get_all_cookies().await
            .context("Failed to read session cookies")?;
        for cookie in cookies {
            page.driver().add_cookie(cookie).await
                .context("Failed to copy session cookie")?;
        }

        Ok(page)
    }
}

/// Releases a session context when dropped.
///
/// Handlers release explicitly at the end of the happy path; the guard
/// covers early returns and cancellation.
pub struct ContextGuard {
    pool: SessionPool,
    key: Option<SessionKey>,
}

impl ContextGuard {
    /// Release now instead of at drop time
    pub async fn release(mut self) {
        if let Some(key) = self.key.take() {
            self.pool.release_context(&key).await;
        }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let pool = self.pool.clone();
            // Drop cannot await; quit the drivers from a task
            tokio::spawn(async move {
                pool.release_context(&key).await;
            });
        }
    }
}
