//! Scripted in-process follower list implementing [`PageDriver`].
//!
//! The page renders a sliding window over a list of followers and reacts to the
//! configured selectors the way the real followers page does: cells carry a profile
//! link, a display name and a more-actions button; the menu offers a removal entry
//! that may be followed by a confirmation sheet. Failure modes are set per follower.

use super::PageDriver;
use crate::config::{Config, SelectorConfig, TextConfig};
use crate::error::DriverError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

const CELL_HEIGHT: i64 = 80;

/// How a follower's more-actions menu behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MenuBehaviour {
    #[default]
    Normal,
    /// Removal completes without a confirmation sheet
    NoConfirmation,
    /// The cell has no recognizable menu button
    NoMenuButton,
    /// Only a plain button labelled "More" is present
    AriaLabelOnly,
    /// The menu opens but has no removal entry
    NoRemoveOption,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryFollower {
    pub username: String,
    pub display_name: String,
    /// Overrides the profile link; `Some("")` renders a cell without a link
    pub href: Option<String>,
    pub menu: MenuBehaviour,
}

impl MemoryFollower {
    pub fn new(username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            display_name: format!("{username} display"),
            username,
            href: None,
            menu: MenuBehaviour::Normal,
        }
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn href(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }

    pub fn menu(mut self, menu: MenuBehaviour) -> Self {
        self.menu = menu;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryElement {
    Cell(String),
    ProfileLink(String),
    NameSpan(String),
    MenuButton(String),
    PlainButton(String),
    MenuItem { owner: String, label: String },
    ConfirmButton,
    Spinner,
    RetryButton,
    ProfileButton,
    Timeline,
    LoginForm,
    Body,
}

/// Interaction counters for assertions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub navigations: usize,
    pub reloads: usize,
    pub escapes: usize,
    pub clicks: usize,
    pub scrolls: usize,
    pub last_url: Option<String>,
    pub screenshots: Vec<PathBuf>,
}

#[derive(Debug)]
struct PageState {
    followers: Vec<MemoryFollower>,
    removed: Vec<String>,
    offset: usize,
    page_size: usize,
    advance: usize,
    loaded: usize,
    open_menu: Option<String>,
    pending_confirm: Option<String>,
    login_after_probes: usize,
    login_probes: usize,
    error_page: bool,
    error_pages_on_navigate: usize,
    failing_navigations: usize,
    spinner_polls: usize,
    stats: MemoryStats,
}

impl PageState {
    fn logged_in(&self) -> bool {
        self.login_probes > self.login_after_probes
    }

    fn max_offset(&self) -> usize {
        self.followers.len().saturating_sub(self.page_size)
    }

    fn visible(&self) -> Vec<MemoryElement> {
        if self.error_page {
            return Vec::new();
        }
        self.followers
            .iter()
            .skip(self.offset)
            .take(self.page_size)
            .map(|f| MemoryElement::Cell(f.username.clone()))
            .collect()
    }

    fn follower(&self, username: &str) -> Option<&MemoryFollower> {
        self.followers.iter().find(|f| f.username == username)
    }

    fn remove(&mut self, username: String) {
        if !self.removed.contains(&username) {
            self.removed.push(username);
        }
    }

    fn refresh(&mut self) {
        let removed = &self.removed;
        self.followers.retain(|f| !removed.contains(&f.username));
        self.offset = 0;
        self.loaded = self.page_size.min(self.followers.len());
        self.open_menu = None;
        self.pending_confirm = None;
    }

    fn note_window(&mut self) {
        self.loaded = self
            .loaded
            .max((self.offset + self.page_size).min(self.followers.len()));
    }
}

pub struct MemoryPage {
    selectors: SelectorConfig,
    text: TextConfig,
    state: Mutex<PageState>,
}

impl MemoryPage {
    pub fn new(config: &Config) -> Self {
        Self {
            selectors: config.selectors.clone(),
            text: config.text.clone(),
            state: Mutex::new(PageState {
                followers: Vec::new(),
                removed: Vec::new(),
                offset: 0,
                page_size: 4,
                advance: 4,
                loaded: 0,
                open_menu: None,
                pending_confirm: None,
                login_after_probes: 0,
                login_probes: 0,
                error_page: false,
                error_pages_on_navigate: 0,
                failing_navigations: 0,
                spinner_polls: 0,
                stats: MemoryStats::default(),
            }),
        }
    }

    pub fn with_usernames<I, S>(self, usernames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        usernames
            .into_iter()
            .fold(self, |page, name| page.with_follower(MemoryFollower::new(name)))
    }

    pub fn with_follower(mut self, follower: MemoryFollower) -> Self {
        let state = self.state.get_mut();
        state.followers.push(follower);
        state.loaded = state.page_size.min(state.followers.len());
        self
    }

    /// Cells rendered at once and cells revealed per scroll step
    pub fn with_window(mut self, page_size: usize, advance: usize) -> Self {
        let state = self.state.get_mut();
        state.page_size = page_size.max(1);
        state.advance = advance.max(1);
        state.loaded = state.page_size.min(state.followers.len());
        self
    }

    /// Report logged out for the first `probes` login probes
    pub fn logged_in_after(mut self, probes: usize) -> Self {
        self.state.get_mut().login_after_probes = probes;
        self
    }

    /// The next `count` navigations time out
    pub fn failing_navigations(mut self, count: usize) -> Self {
        self.state.get_mut().failing_navigations = count;
        self
    }

    /// The next `count` navigations land on an error page with a retry button
    pub fn error_pages_on_navigate(mut self, count: usize) -> Self {
        self.state.get_mut().error_pages_on_navigate = count;
        self
    }

    /// The loading spinner stays visible for `polls` queries
    pub fn with_spinner(mut self, polls: usize) -> Self {
        self.state.get_mut().spinner_polls = polls;
        self
    }

    pub async fn set_error_page(&self, error_page: bool) {
        self.state.lock().await.error_page = error_page;
    }

    /// Usernames removed so far, in removal order
    pub async fn removed(&self) -> Vec<String> {
        self.state.lock().await.removed.clone()
    }

    pub async fn menu_open(&self) -> bool {
        let state = self.state.lock().await;
        state.open_menu.is_some() || state.pending_confirm.is_some()
    }

    pub async fn stats(&self) -> MemoryStats {
        self.state.lock().await.stats.clone()
    }

    fn is_remove_label(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        self.text
            .remove_follower
            .iter()
            .any(|phrase| label.contains(&phrase.to_lowercase()))
    }

    fn menu_items(&self, follower: &MemoryFollower) -> Vec<MemoryElement> {
        let owner = &follower.username;
        let mut labels = vec![format!("Mute @{owner}"), format!("Block @{owner}")];
        if follower.menu != MenuBehaviour::NoRemoveOption {
            let phrase = self
                .text
                .remove_follower
                .first()
                .cloned()
                .unwrap_or_else(|| "Remove this follower".to_string());
            labels.insert(1, phrase);
        }
        labels
            .into_iter()
            .map(|label| MemoryElement::MenuItem {
                owner: owner.clone(),
                label,
            })
            .collect()
    }
}

impl PageDriver for MemoryPage {
    type Element = MemoryElement;

    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock().await;
        state.stats.navigations += 1;
        state.stats.last_url = Some(url.to_string());
        if state.failing_navigations > 0 {
            state.failing_navigations -= 1;
            return Err(DriverError::timeout(
                format!("navigation to {url}"),
                Duration::from_secs(60),
            ));
        }
        state.refresh();
        if state.error_pages_on_navigate > 0 {
            state.error_pages_on_navigate -= 1;
            state.error_page = true;
        }
        Ok(())
    }

    async fn reload(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock().await;
        state.stats.reloads += 1;
        state.error_page = false;
        state.refresh();
        Ok(())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<MemoryElement>, DriverError> {
        let mut state = self.state.lock().await;
        let s = &self.selectors;

        let found = if selector == s.follower_cell {
            state.visible()
        } else if selector == s.menu_item {
            match state.open_menu.clone() {
                Some(owner) => state
                    .follower(&owner)
                    .map(|f| self.menu_items(f))
                    .unwrap_or_default(),
                None => Vec::new(),
            }
        } else if selector == s.confirm_button {
            state
                .pending_confirm
                .as_ref()
                .map(|_| vec![MemoryElement::ConfirmButton])
                .unwrap_or_default()
        } else if selector == s.loading_spinner {
            if state.spinner_polls > 0 {
                state.spinner_polls -= 1;
                vec![MemoryElement::Spinner]
            } else {
                Vec::new()
            }
        } else if selector == s.retry_button {
            if state.error_page {
                vec![MemoryElement::RetryButton]
            } else {
                Vec::new()
            }
        } else if selector == s.profile_button {
            state.login_probes += 1;
            if state.logged_in() {
                vec![MemoryElement::ProfileButton]
            } else {
                Vec::new()
            }
        } else if selector == s.home_timeline {
            if state.logged_in() {
                vec![MemoryElement::Timeline]
            } else {
                Vec::new()
            }
        } else if selector == s.login_form {
            if state.logged_in() {
                Vec::new()
            } else {
                vec![MemoryElement::LoginForm]
            }
        } else if selector == s.page_body {
            vec![MemoryElement::Body]
        } else {
            Vec::new()
        };

        Ok(found)
    }

    async fn query_all_within(
        &self,
        scope: &MemoryElement,
        selector: &str,
    ) -> Result<Vec<MemoryElement>, DriverError> {
        let state = self.state.lock().await;
        let MemoryElement::Cell(username) = scope else {
            return Ok(Vec::new());
        };
        let Some(follower) = state.follower(username) else {
            return Err(DriverError::ElementNotFound {
                selector: format!("cell @{username}"),
            });
        };
        let s = &self.selectors;

        let found = if selector == s.user_name_link {
            match follower.href.as_deref() {
                Some("") => Vec::new(),
                _ => vec![MemoryElement::ProfileLink(username.clone())],
            }
        } else if selector == s.user_name_span {
            if follower.display_name.is_empty() {
                Vec::new()
            } else {
                vec![MemoryElement::NameSpan(username.clone())]
            }
        } else if s.more_menu_buttons.first().is_some_and(|first| first == selector) {
            match follower.menu {
                MenuBehaviour::NoMenuButton | MenuBehaviour::AriaLabelOnly => Vec::new(),
                _ => vec![MemoryElement::MenuButton(username.clone())],
            }
        } else if selector == "button" && follower.menu == MenuBehaviour::AriaLabelOnly {
            vec![MemoryElement::PlainButton(username.clone())]
        } else {
            Vec::new()
        };

        Ok(found)
    }

    async fn text(&self, element: &MemoryElement) -> Result<String, DriverError> {
        let state = self.state.lock().await;
        let text = match element {
            MemoryElement::NameSpan(username) => state
                .follower(username)
                .map(|f| f.display_name.clone())
                .unwrap_or_default(),
            MemoryElement::Cell(username) => state
                .follower(username)
                .map(|f| format!("{}\n@{}", f.display_name, f.username))
                .unwrap_or_default(),
            MemoryElement::MenuItem { label, .. } => label.clone(),
            MemoryElement::RetryButton => self.text.retry_label.clone(),
            MemoryElement::Body if state.error_page => {
                format!("{}. Try reloading.", self.text.error_phrase)
            }
            MemoryElement::Body => "Followers".to_string(),
            _ => String::new(),
        };
        Ok(text)
    }

    async fn attribute(
        &self,
        element: &MemoryElement,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let state = self.state.lock().await;
        let value = match (element, name) {
            (MemoryElement::ProfileLink(username), "href") => state
                .follower(username)
                .map(|f| f.href.clone().unwrap_or_else(|| format!("/{}", f.username))),
            (MemoryElement::MenuButton(_) | MemoryElement::PlainButton(_), "aria-label") => {
                Some("More".to_string())
            }
            _ => None,
        };
        Ok(value)
    }

    async fn click(&self, element: &MemoryElement) -> Result<(), DriverError> {
        let mut state = self.state.lock().await;
        state.stats.clicks += 1;
        match element {
            MemoryElement::MenuButton(owner) | MemoryElement::PlainButton(owner) => {
                state.open_menu = Some(owner.clone());
            }
            MemoryElement::MenuItem { owner, label } => {
                state.open_menu = None;
                if self.is_remove_label(label) {
                    let confirm = state
                        .follower(owner)
                        .map(|f| f.menu != MenuBehaviour::NoConfirmation)
                        .unwrap_or(false);
                    if confirm {
                        state.pending_confirm = Some(owner.clone());
                    } else {
                        state.remove(owner.clone());
                    }
                }
            }
            MemoryElement::ConfirmButton => {
                if let Some(owner) = state.pending_confirm.take() {
                    state.remove(owner);
                }
            }
            MemoryElement::RetryButton => {
                state.error_page = false;
            }
            _ => {}
        }
        Ok(())
    }

    async fn scroll_into_view(&self, _element: &MemoryElement) -> Result<(), DriverError> {
        Ok(())
    }

    async fn scroll_by(&self, delta_y: i64) -> Result<(), DriverError> {
        let mut state = self.state.lock().await;
        state.stats.scrolls += 1;
        if delta_y > 0 {
            state.offset = (state.offset + state.advance).min(state.max_offset());
        } else if delta_y < 0 {
            state.offset = state.offset.saturating_sub(state.advance);
        }
        state.note_window();
        Ok(())
    }

    async fn scroll_to_top(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock().await;
        state.stats.scrolls += 1;
        state.offset = 0;
        Ok(())
    }

    async fn scroll_to_bottom(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock().await;
        state.stats.scrolls += 1;
        // Lazy loading: each jump to the bottom reveals one more window
        state.loaded = (state.loaded + state.page_size).min(state.followers.len());
        state.offset = state.loaded.saturating_sub(state.page_size);
        Ok(())
    }

    async fn scroll_height(&self) -> Result<i64, DriverError> {
        let state = self.state.lock().await;
        Ok(state.loaded as i64 * CELL_HEIGHT)
    }

    async fn press_escape(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock().await;
        state.stats.escapes += 1;
        state.open_menu = None;
        state.pending_confirm = None;
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), DriverError> {
        tokio::fs::write(path, b"\x89PNG\r\n\x1a\n")
            .await
            .map_err(|e| DriverError::Screenshot(e.to_string()))?;
        self.state.lock().await.stats.screenshots.push(path.to_path_buf());
        Ok(())
    }
}
