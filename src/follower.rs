use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::classifier::Verdict;

/// One scraped follower account and what happened to it this run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowerRecord {
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub bot_reason: String,
    #[serde(default)]
    pub removed: bool,
    #[serde(default)]
    pub removal_error: String,
    pub timestamp: DateTime<Local>,
}

impl FollowerRecord {
    pub fn new(username: impl Into<String>, display_name: impl Into<String>, verdict: Verdict) -> Self {
        Self {
            username: username.into(),
            display_name: display_name.into(),
            is_bot: verdict.is_bot,
            bot_reason: verdict.reason,
            removed: false,
            removal_error: String::new(),
            timestamp: Local::now(),
        }
    }

    pub fn mark_removed(&mut self) {
        self.removed = true;
        self.removal_error.clear();
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.removed = false;
        self.removal_error = reason.into();
    }
}

/// Aggregate counts derived from the follower list and the removal counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub scanned: usize,
    pub bots: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Mutable state of a running session.
///
/// The seen-set is keyed by username, so a follower is classified and recorded at most once.
/// `finalize` consumes the session, which is the only way to obtain a [`FinalReport`].
#[derive(Debug)]
pub struct SessionReport {
    session_start: DateTime<Local>,
    user_id: String,
    dry_run: bool,
    seen: HashSet<String>,
    followers: Vec<FollowerRecord>,
    removed: usize,
    failed: usize,
    errors: Vec<String>,
}

impl SessionReport {
    pub fn new(user_id: impl Into<String>, dry_run: bool) -> Self {
        Self {
            session_start: Local::now(),
            user_id: user_id.into(),
            dry_run,
            seen: HashSet::new(),
            followers: Vec::new(),
            removed: 0,
            failed: 0,
            errors: Vec::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn has_seen(&self, username: &str) -> bool {
        self.seen.contains(username)
    }

    /// Record a newly scanned follower. Returns its index, or `None` when already seen.
    pub fn insert(&mut self, record: FollowerRecord) -> Option<usize> {
        if !self.seen.insert(record.username.clone()) {
            return None;
        }
        self.followers.push(record);
        Some(self.followers.len() - 1)
    }

    pub fn followers(&self) -> &[FollowerRecord] {
        &self.followers
    }

    pub fn follower(&self, index: usize) -> Option<&FollowerRecord> {
        self.followers.get(index)
    }

    pub fn record_removed(&mut self, index: usize) {
        if let Some(record) = self.followers.get_mut(index) {
            if !record.removed {
                record.mark_removed();
                self.removed += 1;
            }
        }
    }

    pub fn record_failed(&mut self, index: usize, reason: impl Into<String>) {
        if let Some(record) = self.followers.get_mut(index) {
            record.mark_failed(reason);
            self.failed += 1;
        }
    }

    pub fn push_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn removed_count(&self) -> usize {
        self.removed
    }

    pub fn failed_count(&self) -> usize {
        self.failed
    }

    pub fn bot_count(&self) -> usize {
        self.followers.iter().filter(|f| f.is_bot).count()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            scanned: self.followers.len(),
            bots: self.bot_count(),
            removed: self.removed,
            failed: self.failed,
        }
    }

    /// Close the session and take an immutable snapshot of it
    pub fn finalize(self) -> FinalReport {
        let stats = self.stats();
        FinalReport {
            session_start: self.session_start,
            session_end: Local::now(),
            user_id: self.user_id,
            total_followers_scanned: stats.scanned,
            bot_accounts_identified: stats.bots,
            successfully_removed: stats.removed,
            failed_removals: stats.failed,
            dry_run: self.dry_run,
            followers: self.followers,
            errors: self.errors,
        }
    }
}

/// Finished session as persisted to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub session_start: DateTime<Local>,
    pub session_end: DateTime<Local>,
    pub user_id: String,
    pub total_followers_scanned: usize,
    pub bot_accounts_identified: usize,
    pub successfully_removed: usize,
    pub failed_removals: usize,
    pub dry_run: bool,
    pub followers: Vec<FollowerRecord>,
    pub errors: Vec<String>,
}

impl FinalReport {
    pub fn removed_followers(&self) -> impl Iterator<Item = &FollowerRecord> {
        self.followers.iter().filter(|f| f.removed)
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.session_end - self.session_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bot() -> Verdict {
        Verdict {
            is_bot: true,
            reason: "Username ends with 5+ consecutive digits".to_string(),
        }
    }

    fn human() -> Verdict {
        Verdict {
            is_bot: false,
            reason: String::new(),
        }
    }

    #[test]
    fn test_record_outcomes() {
        let mut record = FollowerRecord::new("user12345", "User", bot());
        assert!(record.is_bot);
        assert!(!record.removed);

        record.mark_failed("More-actions menu button not found");
        assert!(!record.removed);
        assert!(!record.removal_error.is_empty());

        record.mark_removed();
        assert!(record.removed);
        assert!(record.removal_error.is_empty());
    }

    #[test]
    fn test_insert_is_duplicate_free() {
        let mut session = SessionReport::new("alice", false);
        assert_eq!(session.insert(FollowerRecord::new("a", "", human())), Some(0));
        assert_eq!(session.insert(FollowerRecord::new("b", "", bot())), Some(1));
        assert_eq!(session.insert(FollowerRecord::new("a", "Again", bot())), None);

        assert_eq!(session.followers().len(), 2);
        assert!(session.has_seen("a"));
        assert!(!session.follower(0).unwrap().is_bot);
        assert_eq!(session.bot_count(), 1);
    }

    #[test]
    fn test_counters_and_finalize() {
        let mut session = SessionReport::new("alice", true);
        let first = session.insert(FollowerRecord::new("bot11111", "", bot())).unwrap();
        let second = session.insert(FollowerRecord::new("bot22222", "", bot())).unwrap();
        session.insert(FollowerRecord::new("carol", "Carol", human()));

        session.record_removed(first);
        session.record_removed(first);
        session.record_failed(second, "Remove follower option not found in menu");
        session.push_error("something broke");

        assert_eq!(
            session.stats(),
            SessionStats {
                scanned: 3,
                bots: 2,
                removed: 1,
                failed: 1,
            }
        );

        let report = session.finalize();
        assert_eq!(report.user_id, "alice");
        assert!(report.dry_run);
        assert_eq!(report.total_followers_scanned, 3);
        assert_eq!(report.bot_accounts_identified, 2);
        assert_eq!(report.successfully_removed, 1);
        assert_eq!(report.failed_removals, 1);
        assert!(report.session_end >= report.session_start);
        assert_eq!(report.removed_followers().count(), 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_report_serialization() {
        let mut session = SessionReport::new("alice", false);
        session.insert(FollowerRecord::new("bob_2024", "Bob", bot()));
        let report = session.finalize();

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"total_followers_scanned\":1"));
        assert!(json.contains("\"session_end\""));
        assert!(json.contains("\"removal_error\":\"\""));

        let parsed: FinalReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.followers[0].username, "bob_2024");
    }
}
