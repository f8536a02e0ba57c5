use crate::classifier::{normalize_handle, Classifier};
use crate::config::{Config, Delays};
use crate::driver::{PageDriver, WaitState};
use crate::error::{DriverError, ErrorRecovery, LoginError, NavigationError, RemovalFailure, SweepError};
use crate::follower::FollowerRecord;
use crate::login::{LoginGate, LoginState};
use chrono::Local;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Direction the follower list is walked in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Down,
    Up,
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// Selector-driven operations on the followers page of one account
pub struct FollowersPage<'a, D: PageDriver> {
    driver: &'a D,
    config: &'a Config,
    delays: Delays,
}

impl<'a, D: PageDriver> FollowersPage<'a, D> {
    pub fn new(driver: &'a D, config: &'a Config) -> Self {
        Self {
            driver,
            config,
            delays: config.delays.resolve(),
        }
    }

    pub fn with_delays(mut self, delays: Delays) -> Self {
        self.delays = delays;
        self
    }

    pub fn driver(&self) -> &'a D {
        self.driver
    }

    pub fn config(&self) -> &'a Config {
        self.config
    }

    pub fn delays(&self) -> &Delays {
        &self.delays
    }

    /// Profile button or home timeline present means a logged-in session
    pub async fn is_logged_in(&self) -> bool {
        let selectors = &self.config.selectors;
        for selector in [&selectors.profile_button, &selectors.home_timeline] {
            match self.driver.query_one(selector).await {
                Ok(Some(_)) => return true,
                Ok(None) => {}
                Err(e) => {
                    debug!("Login probe failed: {}", e);
                    return false;
                }
            }
        }
        false
    }

    /// Open the site and block until the operator has logged in
    pub async fn wait_for_login(&self) -> Result<(), LoginError> {
        let base = &self.config.urls.base;
        info!("Navigating to {}", base);
        if let Err(e) = self.driver.navigate(base).await {
            warn!("Initial page load slow, continuing anyway: {}", e);
        }
        pause(self.delays.page_load).await;

        if self.is_logged_in().await {
            info!("Already logged in");
            return Ok(());
        }

        println!();
        println!("{}", "=".repeat(60));
        println!("  MANUAL LOGIN REQUIRED");
        println!("{}", "=".repeat(60));
        println!();
        println!("  Please log in to your account in the browser window.");
        println!("  The sweep continues automatically once login is detected.");
        println!();
        println!("{}", "=".repeat(60));
        println!();

        let limits = &self.config.limits;
        let gate = LoginGate::new(
            self.delays.login_check_interval,
            Duration::from_secs(limits.login_timeout_secs),
        )
        .with_progress_every(Duration::from_secs(limits.login_progress_every_secs));

        match gate.wait(move || self.is_logged_in()).await {
            LoginState::LoggedIn => {
                info!("Login detected");
                Ok(())
            }
            _ => Err(LoginError::TimedOut {
                waited_secs: limits.login_timeout_secs,
            }),
        }
    }

    /// Detect the platform's transient error view and recover from it.
    /// Returns true when a recovery action was taken.
    pub async fn handle_page_error(&self) -> bool {
        match self.recover_error_page().await {
            Ok(recovered) => recovered,
            Err(e) => {
                debug!("Error page check failed: {}", e);
                false
            }
        }
    }

    async fn recover_error_page(&self) -> Result<bool, DriverError> {
        let selectors = &self.config.selectors;
        let retry_label = self.config.text.retry_label.to_lowercase();

        for button in self.driver.query_all(&selectors.retry_button).await? {
            let label = self.driver.text(&button).await?;
            if label.to_lowercase().contains(&retry_label) {
                info!("Found '{}' button, clicking it", self.config.text.retry_label);
                self.driver.click(&button).await?;
                pause(self.delays.page_load).await;
                return Ok(true);
            }
        }

        if let Some(body) = self.driver.query_one(&selectors.page_body).await? {
            let text = self.driver.text(&body).await?;
            if text.contains(&self.config.text.error_phrase) {
                info!("Error page detected, reloading");
                self.driver.reload().await?;
                pause(self.delays.page_load).await;
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Load the followers list of `user_id`, retrying up to the configured ceiling
    pub async fn navigate_to_followers(&self, user_id: &str) -> Result<(), NavigationError> {
        let url = self.config.urls.followers_url(user_id);
        Url::parse(&url).map_err(|e| NavigationError::InvalidUrl(format!("{url}: {e}")))?;
        info!("Navigating to followers page: {}", url);

        let attempts = self.config.limits.max_retry_attempts;
        for attempt in 0..attempts {
            match self.load_followers(&url).await {
                Ok(()) => {
                    info!("Followers page loaded");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Loading followers failed (attempt {}/{}): {}",
                        attempt + 1,
                        attempts,
                        e
                    );
                    if attempt + 1 < attempts {
                        if e.is_timeout() {
                            self.handle_page_error().await;
                        }
                        let delay = ErrorRecovery::retry_delay(&SweepError::Driver(e), attempt, &self.delays);
                        pause(delay).await;
                    }
                }
            }
        }

        Err(NavigationError::RetriesExhausted { url, attempts })
    }

    async fn load_followers(&self, url: &str) -> Result<(), DriverError> {
        self.driver.navigate(url).await?;
        pause(self.delays.page_load).await;

        if self.handle_page_error().await {
            info!("Handled page error, waiting for content");
            pause(self.delays.page_load).await;
        }

        self.driver
            .wait_for(
                &self.config.selectors.follower_cell,
                WaitState::Visible,
                Duration::from_secs(self.config.limits.followers_load_timeout_secs),
            )
            .await
    }

    pub async fn cells(&self) -> Result<Vec<D::Element>, DriverError> {
        self.driver.query_all(&self.config.selectors.follower_cell).await
    }

    /// Handle of the account a cell links to, if it links to a profile at all
    pub async fn cell_username(&self, cell: &D::Element) -> Option<String> {
        let link = match self
            .driver
            .query_within(cell, &self.config.selectors.user_name_link)
            .await
        {
            Ok(Some(link)) => link,
            Ok(None) => return None,
            Err(e) => {
                debug!("Profile link lookup failed: {}", e);
                return None;
            }
        };

        let href = match self.driver.attribute(&link, "href").await {
            Ok(Some(href)) => href,
            Ok(None) => return None,
            Err(e) => {
                debug!("Profile link href unreadable: {}", e);
                return None;
            }
        };

        self.username_from_href(&href)
    }

    pub fn username_from_href(&self, href: &str) -> Option<String> {
        let base = Url::parse(&self.config.urls.base).ok()?;
        let resolved = base.join(href).ok()?;
        let first = resolved.path_segments()?.find(|segment| !segment.is_empty())?;

        let reserved = self
            .config
            .urls
            .reserved_paths
            .iter()
            .any(|path| path.eq_ignore_ascii_case(first));
        if reserved {
            return None;
        }

        normalize_handle(first)
    }

    /// Build a record for a rendered cell. Cells without a usable profile link,
    /// or whose account `is_seen` already knows, yield `None`.
    pub async fn extract_follower(
        &self,
        cell: &D::Element,
        classifier: &Classifier,
        is_seen: impl Fn(&str) -> bool,
    ) -> Option<FollowerRecord> {
        let username = self.cell_username(cell).await?;
        if is_seen(&username) {
            return None;
        }

        let display_name = match self
            .driver
            .query_within(cell, &self.config.selectors.user_name_span)
            .await
        {
            Ok(Some(span)) => self.driver.text(&span).await.unwrap_or_default(),
            _ => String::new(),
        };

        let verdict = classifier.classify(&username);
        Some(FollowerRecord::new(username, display_name.trim(), verdict))
    }

    async fn find_menu_button(&self, cell: &D::Element) -> Result<Option<D::Element>, DriverError> {
        for selector in &self.config.selectors.more_menu_buttons {
            if let Some(button) = self.driver.query_within(cell, selector).await? {
                debug!("Found menu button with selector: {}", selector);
                return Ok(Some(button));
            }
        }

        let more = self.config.text.more_label.to_lowercase();
        for button in self.driver.query_all_within(cell, "button").await? {
            let label = self.driver.attribute(&button, "aria-label").await?;
            if label.is_some_and(|label| label.to_lowercase().contains(&more)) {
                return Ok(Some(button));
            }
        }

        Ok(None)
    }

    async fn find_remove_item(&self) -> Result<Option<D::Element>, DriverError> {
        let selector = &self.config.selectors.menu_item;
        let timeout = Duration::from_millis(self.config.limits.menu_timeout_ms);
        match self.driver.wait_for(selector, WaitState::Visible, timeout).await {
            Ok(()) => {}
            Err(e) if e.is_timeout() => return Ok(None),
            Err(e) => return Err(e),
        }

        let phrases: Vec<String> = self
            .config
            .text
            .remove_follower
            .iter()
            .map(|phrase| phrase.to_lowercase())
            .collect();

        for item in self.driver.query_all(selector).await? {
            let text = self.driver.text(&item).await?.to_lowercase();
            if phrases.iter().any(|phrase| text.contains(phrase)) {
                return Ok(Some(item));
            }
        }

        Ok(None)
    }

    /// Accept the confirmation sheet when one shows up; its absence is fine
    async fn confirm_if_asked(&self) -> Result<(), DriverError> {
        let selector = &self.config.selectors.confirm_button;
        let timeout = Duration::from_millis(self.config.limits.confirm_timeout_ms);
        match self.driver.wait_for(selector, WaitState::Visible, timeout).await {
            Ok(()) => {
                if let Some(button) = self.driver.query_one(selector).await? {
                    self.driver.click(&button).await?;
                    pause(self.delays.menu_animation).await;
                }
                Ok(())
            }
            Err(e) if e.is_timeout() => Ok(()),
            Err(e) => {
                debug!("Confirmation dialog handling: {}", e);
                Ok(())
            }
        }
    }

    async fn try_remove(&self, cell: &D::Element) -> Result<(), RemovalFailure> {
        self.driver.scroll_into_view(cell).await?;
        pause(self.delays.menu_animation).await;

        let button = self
            .find_menu_button(cell)
            .await?
            .ok_or(RemovalFailure::MenuButtonNotFound)?;
        self.driver.click(&button).await?;
        pause(self.delays.menu_animation).await;

        let item = self
            .find_remove_item()
            .await?
            .ok_or(RemovalFailure::RemoveOptionNotFound)?;
        self.driver.click(&item).await?;
        pause(self.delays.menu_animation).await;

        self.confirm_if_asked().await?;
        Ok(())
    }

    /// Remove the follower shown in `cell` through its more-actions menu.
    /// On failure any open menu is dismissed before returning.
    pub async fn remove_from_cell(&self, cell: &D::Element, username: &str) -> Result<(), RemovalFailure> {
        let result = self.try_remove(cell).await;
        if let Err(failure) = &result {
            debug!("Removing @{} failed: {}", username, failure);
            if let Err(e) = self.driver.press_escape().await {
                debug!("Could not dismiss menu: {}", e);
            }
        }
        result
    }

    /// Scroll from the top of the list until the cell for `username` is rendered
    pub async fn find_user_cell(&self, username: &str) -> Result<Option<D::Element>, DriverError> {
        self.driver.scroll_to_top().await?;
        pause(self.delays.menu_animation).await;

        for _ in 0..self.config.limits.find_user_max_scrolls {
            if self.handle_page_error().await {
                pause(self.delays.error_recovery).await;
            }

            let cells = self.cells().await?;
            if cells.is_empty() {
                pause(self.delays.lookup_scroll).await;
                continue;
            }

            for cell in cells {
                let matches = self
                    .cell_username(&cell)
                    .await
                    .is_some_and(|found| found.eq_ignore_ascii_case(username));
                if matches {
                    self.driver.scroll_into_view(&cell).await?;
                    pause(self.delays.menu_animation).await;
                    return Ok(Some(cell));
                }
            }

            self.driver.scroll_by(self.config.limits.lookup_step_px).await?;
            pause(self.delays.lookup_scroll).await;
        }

        Ok(None)
    }

    /// Look up `username` in the list and remove it, retrying transient failures
    pub async fn remove_follower(&self, username: &str) -> Result<(), RemovalFailure> {
        info!("Attempting to remove @{}", username);
        let attempts = self.config.limits.max_retry_attempts;
        let mut last_failure = RemovalFailure::UserNotFound {
            username: username.to_string(),
        };

        for attempt in 0..attempts {
            let retry_left = attempt + 1 < attempts;

            let cell = match self.find_user_cell(username).await {
                Ok(Some(cell)) => cell,
                Ok(None) => {
                    warn!("Could not find @{} after scrolling", username);
                    return Err(RemovalFailure::UserNotFound {
                        username: username.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Lookup of @{} failed (attempt {}): {}", username, attempt + 1, e);
                    if retry_left {
                        pause(ErrorRecovery::retry_delay(&SweepError::Driver(e.clone()), 0, &self.delays)).await;
                    }
                    last_failure = RemovalFailure::Driver(e);
                    continue;
                }
            };

            match self.remove_from_cell(&cell, username).await {
                Ok(()) => {
                    info!("Removed @{}", username);
                    return Ok(());
                }
                Err(RemovalFailure::Driver(e)) => {
                    warn!("Removal of @{} failed (attempt {}): {}", username, attempt + 1, e);
                    if retry_left {
                        pause(ErrorRecovery::retry_delay(&SweepError::Driver(e.clone()), 0, &self.delays)).await;
                    }
                    last_failure = RemovalFailure::Driver(e);
                }
                Err(RemovalFailure::MenuButtonNotFound) => {
                    warn!("Could not find menu button for @{}", username);
                    if retry_left {
                        pause(self.delays.error_recovery).await;
                    }
                    last_failure = RemovalFailure::MenuButtonNotFound;
                }
                Err(other) => {
                    warn!("Could not remove @{}: {}", username, other);
                    return Err(other);
                }
            }
        }

        Err(last_failure)
    }

    /// Step the list in `direction` and let it settle
    pub async fn advance(&self, direction: ScrollDirection) -> Result<(), DriverError> {
        let step = self.config.limits.scroll_step_px;
        let delta = match direction {
            ScrollDirection::Down => step,
            ScrollDirection::Up => -step,
        };
        self.driver.scroll_by(delta).await?;
        pause(self.delays.after_scroll).await;
        Ok(())
    }

    /// Jump to the bottom to trigger loading of the next page of followers
    pub async fn load_more(&self) -> Result<(), DriverError> {
        self.driver.scroll_to_bottom().await?;
        pause(self.delays.after_scroll).await;
        self.wait_spinner_hidden().await;
        Ok(())
    }

    pub async fn wait_spinner_hidden(&self) {
        let timeout = Duration::from_millis(self.config.limits.spinner_timeout_ms);
        match self
            .driver
            .wait_for(&self.config.selectors.loading_spinner, WaitState::Hidden, timeout)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_timeout() => debug!("Loading spinner still visible, moving on"),
            Err(e) => debug!("Spinner check failed: {}", e),
        }
    }

    /// Keep jumping to the bottom until the document height stops changing
    pub async fn scroll_to_end(&self) -> Result<(), DriverError> {
        info!("Scrolling to end of followers list...");
        let limits = &self.config.limits;
        let mut last_height = 0;
        let mut stable_checks = 0;
        let mut jumps = 0;

        while stable_checks < limits.end_of_list_stable_checks {
            if jumps >= limits.max_scroll_attempts {
                warn!("List still growing after {} jumps, starting from here", jumps);
                return Ok(());
            }
            jumps += 1;

            self.driver.scroll_to_bottom().await?;
            pause(self.delays.after_scroll).await;

            if self.handle_page_error().await {
                pause(self.delays.error_recovery).await;
            }

            let height = self.driver.scroll_height().await?;
            if height == last_height {
                stable_checks += 1;
            } else {
                stable_checks = 0;
                last_height = height;
                debug!("Scrolling... (height: {})", height);
            }
        }

        info!("Reached end of followers list");
        Ok(())
    }

    /// Save a full-page screenshot as `<name>_<timestamp>.png`
    pub async fn take_screenshot(&self, name: &str) -> Result<PathBuf, DriverError> {
        let dir = &self.config.output.screenshots_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| DriverError::Screenshot(format!("{}: {e}", dir.display())))?;

        let path = dir.join(format!("{}_{}.png", name, Local::now().format("%Y%m%d_%H%M%S")));
        self.driver.screenshot(&path).await?;
        info!("Screenshot saved: {}", path.display());
        Ok(path)
    }
}
