use crate::classifier::{normalize_handle, Classifier};
use crate::driver::PageDriver;
use crate::error::SweepError;
use crate::follower::{FollowerRecord, SessionReport};
use crate::page::{FollowersPage, ScrollDirection};
use crate::prompt::Confirm;
use crate::report::{progress_bar, review_list};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a scan-and-remove run is driven
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Removal cap for the run; the session maximum still applies
    pub limit: Option<usize>,
    pub require_confirmation: bool,
    /// Start at the bottom of the list and walk upward
    pub from_end: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    RemovalLimit,
    ScanLimit,
    EndOfList,
    TickCeiling,
}

/// Removal state that outlives a single tick
#[derive(Debug, Clone, Copy)]
struct SessionState {
    removals_enabled: bool,
    confirmation_pending: bool,
    removal_limit: usize,
}

struct Harvest<E> {
    new_accounts: usize,
    bots: Vec<(usize, E)>,
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// Tick loop over the followers page: harvest, classify, remove, scroll
pub struct ScanEngine<'e, 'a, D: PageDriver, C: Confirm> {
    page: &'e FollowersPage<'a, D>,
    classifier: &'e Classifier,
    confirm: &'e mut C,
}

impl<'e, 'a, D: PageDriver, C: Confirm> ScanEngine<'e, 'a, D, C> {
    pub fn new(page: &'e FollowersPage<'a, D>, classifier: &'e Classifier, confirm: &'e mut C) -> Self {
        Self {
            page,
            classifier,
            confirm,
        }
    }

    /// Requested cap bounded by the session maximum; no cap or zero means the maximum
    fn removal_limit(&self, requested: Option<usize>) -> usize {
        let session_max = self.page.config().limits.max_removals_per_session;
        requested
            .filter(|limit| *limit > 0)
            .map_or(session_max, |limit| limit.min(session_max))
    }

    /// Read the rendered cells and record every account not seen before
    async fn harvest(
        &self,
        session: &mut SessionReport,
        reverse: bool,
        scan_cap: Option<usize>,
    ) -> Result<Harvest<D::Element>, SweepError> {
        let mut cells = self.page.cells().await?;
        if reverse {
            cells.reverse();
        }

        let mut harvest = Harvest {
            new_accounts: 0,
            bots: Vec::new(),
        };

        for cell in cells {
            if scan_cap.is_some_and(|cap| session.followers().len() >= cap) {
                break;
            }

            let Some(record) = self
                .page
                .extract_follower(&cell, self.classifier, |name| session.has_seen(name))
                .await
            else {
                continue;
            };

            let is_bot = record.is_bot;
            let Some(index) = session.insert(record) else {
                continue;
            };
            harvest.new_accounts += 1;

            if let Some(record) = session.follower(index) {
                if is_bot {
                    info!("  Bot detected: @{} - {}", record.username, record.bot_reason);
                    harvest.bots.push((index, cell));
                } else {
                    debug!("  Scanned: @{}", record.username);
                }
            }
        }

        Ok(harvest)
    }

    /// Ask before the first removal. A decline switches the rest of the run to dry-run.
    async fn approve_first_batch(
        &mut self,
        state: &mut SessionState,
        prompt: &str,
    ) -> Result<bool, SweepError> {
        if !state.confirmation_pending {
            return Ok(true);
        }

        if self.confirm.confirm(prompt, false).await? {
            state.confirmation_pending = false;
            Ok(true)
        } else {
            info!("Removal cancelled, continuing in dry-run mode");
            state.removals_enabled = false;
            Ok(false)
        }
    }

    async fn remove_batch(
        &mut self,
        session: &mut SessionReport,
        state: &mut SessionState,
        bots: Vec<(usize, D::Element)>,
    ) -> Result<(), SweepError> {
        if state.confirmation_pending {
            println!(
                "\n  Found {} bots so far. First batch has {} bots.",
                session.bot_count(),
                bots.len()
            );
        }
        if !self
            .approve_first_batch(state, "Start removing bots as they're found?")
            .await?
        {
            return Ok(());
        }

        let between_removals = self.page.delays().between_removals;
        for (position, (index, cell)) in bots.into_iter().enumerate() {
            if session.removed_count() >= state.removal_limit {
                info!("Reached removal limit of {}", state.removal_limit);
                break;
            }
            if position > 0 {
                pause(between_removals).await;
            }

            let Some(username) = session.follower(index).map(|f| f.username.clone()) else {
                continue;
            };

            info!("  Removing @{}...", username);
            match self.page.remove_from_cell(&cell, &username).await {
                Ok(()) => {
                    session.record_removed(index);
                    info!(
                        "  Removed @{} ({}/{})",
                        username,
                        session.removed_count(),
                        state.removal_limit
                    );
                }
                Err(failure) => {
                    warn!("  Failed to remove @{}: {}", username, failure);
                    session.record_failed(index, failure.to_string());
                }
            }
        }

        Ok(())
    }

    /// Scan the list tick by tick, removing bots while their cells are on screen
    pub async fn scan_and_remove(
        &mut self,
        session: &mut SessionReport,
        options: &RunOptions,
    ) -> Result<StopReason, SweepError> {
        let limits = &self.page.config().limits;
        let mut state = SessionState {
            removals_enabled: !options.dry_run,
            confirmation_pending: options.require_confirmation,
            removal_limit: self.removal_limit(options.limit),
        };

        let direction = if options.from_end {
            info!("Starting batch scan and remove (from the end of the list)");
            self.page.scroll_to_end().await?;
            ScrollDirection::Up
        } else {
            info!("Starting batch scan and remove");
            ScrollDirection::Down
        };

        let mut empty_ticks = 0;
        for tick in 0..limits.max_scroll_attempts {
            if self.page.handle_page_error().await {
                pause(self.page.delays().error_recovery).await;
            }

            let harvest = self.harvest(session, options.from_end, None).await?;

            if !harvest.bots.is_empty() && state.removals_enabled {
                self.remove_batch(session, &mut state, harvest.bots).await?;
            }

            if !options.dry_run && session.removed_count() >= state.removal_limit {
                info!("Reached removal limit of {}", state.removal_limit);
                return Ok(StopReason::RemovalLimit);
            }

            let stats = session.stats();
            info!(
                "Progress: {} scanned, {} bots, {} removed, {} failed",
                stats.scanned, stats.bots, stats.removed, stats.failed
            );

            if harvest.new_accounts == 0 {
                empty_ticks += 1;
                if empty_ticks >= limits.empty_ticks_before_stop {
                    info!("No more followers to load");
                    return Ok(StopReason::EndOfList);
                }
            } else {
                empty_ticks = 0;
            }

            debug!("Tick {} done, scrolling {:?}", tick + 1, direction);
            self.page.advance(direction).await?;
        }

        warn!(
            "Stopped after {} scroll steps without reaching the end",
            limits.max_scroll_attempts
        );
        Ok(StopReason::TickCeiling)
    }

    /// Scan without removing anything, up to `limit` accounts
    pub async fn collect_followers(
        &mut self,
        session: &mut SessionReport,
        limit: Option<usize>,
    ) -> Result<StopReason, SweepError> {
        info!("Starting to scan followers...");
        let limits = &self.page.config().limits;
        let mut empty_ticks = 0;

        for _ in 0..limits.max_scroll_attempts {
            let harvest = self.harvest(session, false, limit).await?;

            let stats = session.stats();
            let expected = limit.unwrap_or(stats.scanned + 50);
            info!(
                "Progress: {} scanned, {} bots found {}",
                stats.scanned,
                stats.bots,
                progress_bar(stats.scanned, expected, 30)
            );

            if limit.is_some_and(|cap| stats.scanned >= cap) {
                info!("Reached scan limit of {}", stats.scanned);
                return Ok(StopReason::ScanLimit);
            }

            if harvest.new_accounts == 0 {
                empty_ticks += 1;
                if empty_ticks >= limits.empty_ticks_before_stop {
                    info!("No more followers to load");
                    return Ok(StopReason::EndOfList);
                }
            } else {
                empty_ticks = 0;
            }

            self.page.load_more().await?;
        }

        Ok(StopReason::TickCeiling)
    }

    /// Remove the named accounts one by one through list lookup
    pub async fn remove_listed(
        &mut self,
        session: &mut SessionReport,
        handles: &[String],
        options: &RunOptions,
    ) -> Result<usize, SweepError> {
        let mut targets = Vec::new();
        for raw in handles {
            let Some(handle) = normalize_handle(raw) else {
                warn!("Ignoring invalid handle '{}'", raw);
                continue;
            };
            let verdict = self.classifier.classify(&handle);
            if let Some(index) = session.insert(FollowerRecord::new(handle, "", verdict)) {
                targets.push(index);
            }
        }

        if targets.is_empty() {
            info!("Nothing to remove");
            return Ok(0);
        }
        if options.dry_run {
            info!("DRY RUN: {} listed followers would be removed", targets.len());
            return Ok(0);
        }

        let prompt = format!("Proceed with removing {} listed followers?", targets.len());
        self.remove_by_lookup(session, targets, options, &prompt, false)
            .await
    }

    /// Scan the whole list first, show the bots found, then remove them one by one
    /// through list lookup after a fresh load of the followers page
    pub async fn review_and_remove(
        &mut self,
        session: &mut SessionReport,
        options: &RunOptions,
    ) -> Result<usize, SweepError> {
        let stop = self.collect_followers(session, None).await?;
        debug!("Review scan finished: {:?}", stop);

        let bots: Vec<usize> = session
            .followers()
            .iter()
            .enumerate()
            .filter(|(_, follower)| follower.is_bot && !follower.removed)
            .map(|(index, _)| index)
            .collect();
        if bots.is_empty() {
            info!("No bot accounts identified, nothing to remove");
            return Ok(0);
        }

        let room = self
            .removal_limit(options.limit)
            .saturating_sub(session.removed_count());
        let targets: Vec<usize> = bots.iter().copied().take(room).collect();
        let listed = targets.iter().filter_map(|index| session.follower(*index));
        println!("\n{}\n", review_list(listed, bots.len()));

        if targets.is_empty() {
            info!("Removal limit already reached");
            return Ok(0);
        }
        if options.dry_run {
            info!("DRY RUN: no followers will be removed");
            return Ok(0);
        }

        let prompt = format!("Proceed with removing {} bot followers?", targets.len());
        self.remove_by_lookup(session, targets, options, &prompt, true)
            .await
    }

    /// Shared removal loop for recorded followers that are no longer on screen
    async fn remove_by_lookup(
        &mut self,
        session: &mut SessionReport,
        targets: Vec<usize>,
        options: &RunOptions,
        prompt: &str,
        reload_first: bool,
    ) -> Result<usize, SweepError> {
        let mut state = SessionState {
            removals_enabled: true,
            confirmation_pending: options.require_confirmation,
            removal_limit: self.removal_limit(options.limit),
        };
        if !self.approve_first_batch(&mut state, prompt).await? {
            return Ok(0);
        }

        let page = self.page;
        if reload_first {
            info!("Refreshing followers page before removal");
            page.navigate_to_followers(session.user_id()).await?;
        }

        let limits = &page.config().limits;
        let total = targets.len();
        let progress = ProgressBar::new(total as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let removed_before = session.removed_count();
        let mut failed = 0;
        let mut consecutive_failures = 0;

        for (position, index) in targets.into_iter().enumerate() {
            if session.removed_count() >= state.removal_limit {
                info!("Reached removal limit of {}", state.removal_limit);
                break;
            }

            let Some(username) = session.follower(index).map(|f| f.username.clone()) else {
                continue;
            };
            progress.set_message(format!("@{username}"));

            if page.handle_page_error().await {
                info!("Recovered from page error, continuing");
                pause(page.delays().error_recovery).await;
            }

            match page.remove_follower(&username).await {
                Ok(()) => {
                    session.record_removed(index);
                    consecutive_failures = 0;
                }
                Err(failure) => {
                    session.record_failed(index, failure.to_string());
                    failed += 1;
                    consecutive_failures += 1;

                    if consecutive_failures >= limits.consecutive_failures_before_refresh {
                        warn!("{} consecutive failures, refreshing page", consecutive_failures);
                        page.navigate_to_followers(session.user_id()).await?;
                        consecutive_failures = 0;
                    }
                }
            }
            progress.inc(1);

            let done = position + 1;
            if limits.batch_size > 0 && done % limits.batch_size == 0 {
                progress.suspend(|| {
                    info!(
                        "Batch progress: {} removed, {} failed {}",
                        session.removed_count() - removed_before,
                        failed,
                        progress_bar(done, total, 30)
                    )
                });
            }

            if done < total {
                pause(page.delays().between_removals).await;
            }
        }

        progress.finish_and_clear();
        let removed = session.removed_count() - removed_before;
        info!("Removal complete: {} removed, {} failed", removed, failed);
        Ok(removed)
    }
}
