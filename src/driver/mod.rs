//! Browser capabilities needed by the follower page.
//!
//! [`PageDriver`] is the seam between the session logic and a real browser. The live
//! implementation speaks the Chrome DevTools Protocol ([`cdp`]); `memory` provides a
//! scripted in-process page for tests, built with the `test-util` feature.

pub mod cdp;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;

use crate::error::DriverError;
use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Element presence condition for [`PageDriver::wait_for`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Visible,
    Hidden,
}

#[allow(async_fn_in_trait)] // Single-task use, no Send bound needed
pub trait PageDriver {
    /// Handle to an element of the current document
    type Element: Clone + Debug;

    async fn navigate(&self, url: &str) -> Result<(), DriverError>;
    async fn reload(&self) -> Result<(), DriverError>;

    async fn query_all(&self, selector: &str) -> Result<Vec<Self::Element>, DriverError>;
    async fn query_all_within(
        &self,
        scope: &Self::Element,
        selector: &str,
    ) -> Result<Vec<Self::Element>, DriverError>;

    async fn query_one(&self, selector: &str) -> Result<Option<Self::Element>, DriverError> {
        Ok(self.query_all(selector).await?.into_iter().next())
    }

    async fn query_within(
        &self,
        scope: &Self::Element,
        selector: &str,
    ) -> Result<Option<Self::Element>, DriverError> {
        Ok(self
            .query_all_within(scope, selector)
            .await?
            .into_iter()
            .next())
    }

    /// Rendered text of an element
    async fn text(&self, element: &Self::Element) -> Result<String, DriverError>;
    async fn attribute(
        &self,
        element: &Self::Element,
        name: &str,
    ) -> Result<Option<String>, DriverError>;

    async fn click(&self, element: &Self::Element) -> Result<(), DriverError>;
    async fn scroll_into_view(&self, element: &Self::Element) -> Result<(), DriverError>;

    /// Scroll the window vertically; negative values scroll up
    async fn scroll_by(&self, delta_y: i64) -> Result<(), DriverError>;
    async fn scroll_to_top(&self) -> Result<(), DriverError>;
    async fn scroll_to_bottom(&self) -> Result<(), DriverError>;
    async fn scroll_height(&self) -> Result<i64, DriverError>;

    async fn press_escape(&self) -> Result<(), DriverError>;

    /// Full-page PNG screenshot written to `path`
    async fn screenshot(&self, path: &Path) -> Result<(), DriverError>;

    /// Poll until `selector` is present (or absent) or `timeout` elapses
    async fn wait_for(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let started = Instant::now();
        loop {
            let present = !self.query_all(selector).await?.is_empty();
            let satisfied = match state {
                WaitState::Visible => present,
                WaitState::Hidden => !present,
            };
            if satisfied {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(DriverError::timeout(selector, timeout));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL.min(timeout)).await;
        }
    }
}
