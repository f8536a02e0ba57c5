use crate::config::OutputConfig;
use crate::error::ReportError;
use crate::follower::{FinalReport, FollowerRecord};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Removed followers, kept so removals can be reviewed or undone by hand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub user_id: String,
    pub timestamp: DateTime<Local>,
    pub followers: Vec<FollowerRecord>,
}

/// Files written for one finished session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WrittenReport {
    pub json: PathBuf,
    pub csv: Option<PathBuf>,
}

/// Writes session reports and removal backups below the configured directories
#[derive(Debug, Clone)]
pub struct ReportWriter {
    reports_dir: PathBuf,
    backup_dir: PathBuf,
    write_csv: bool,
}

impl ReportWriter {
    pub fn new(reports_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
            backup_dir: backup_dir.into(),
            write_csv: true,
        }
    }

    pub fn from_config(output: &OutputConfig) -> Self {
        Self::new(&output.reports_dir, &output.backup_dir).with_csv(output.csv)
    }

    pub fn with_csv(mut self, write_csv: bool) -> Self {
        self.write_csv = write_csv;
        self
    }

    fn stamp(report: &FinalReport) -> String {
        report.session_end.format("%Y%m%d_%H%M%S").to_string()
    }

    /// JSON report plus, when enabled and non-empty, a CSV of every scanned follower
    pub fn write_report(&self, report: &FinalReport) -> Result<WrittenReport, ReportError> {
        fs::create_dir_all(&self.reports_dir)?;
        let base_name = format!("cleanup_report_{}_{}", report.user_id, Self::stamp(report));

        let json = self.reports_dir.join(format!("{base_name}.json"));
        fs::write(&json, serde_json::to_string_pretty(report)?)?;
        debug!("Wrote JSON report to {}", json.display());

        let csv = if self.write_csv && !report.followers.is_empty() {
            let path = self.reports_dir.join(format!("{base_name}_followers.csv"));
            write_followers_csv(&path, &report.followers)?;
            debug!("Wrote follower list to {}", path.display());
            Some(path)
        } else {
            None
        };

        Ok(WrittenReport { json, csv })
    }

    /// Backup of the removed subset. Nothing is written when no removal succeeded.
    pub fn write_backup(&self, report: &FinalReport) -> Result<Option<PathBuf>, ReportError> {
        let removed: Vec<FollowerRecord> = report.removed_followers().cloned().collect();
        if removed.is_empty() {
            return Ok(None);
        }

        fs::create_dir_all(&self.backup_dir)?;
        let path = self.backup_dir.join(format!(
            "removed_followers_{}_{}.json",
            report.user_id,
            Self::stamp(report)
        ));

        let backup = Backup {
            user_id: report.user_id.clone(),
            timestamp: Local::now(),
            followers: removed,
        };
        fs::write(&path, serde_json::to_string_pretty(&backup)?)?;
        info!("Backup saved: {}", path.display());
        Ok(Some(path))
    }
}

fn write_followers_csv(path: &Path, followers: &[FollowerRecord]) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path)?;
    for follower in followers {
        writer.serialize(follower)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_report(path: &Path) -> Result<FinalReport, ReportError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// "1h 2m 3s", "2m 3s" or "3s"
pub fn format_duration(duration: chrono::Duration) -> String {
    let total = duration.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Text progress bar such as `[█████░░░░░] 50.0%`
pub fn progress_bar(current: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return format!("[{}] 100%", "=".repeat(width));
    }

    let ratio = current as f64 / total as f64;
    let filled = ((width as f64 * ratio) as usize).min(width);
    format!(
        "[{}{}] {:.1}%",
        "█".repeat(filled),
        "░".repeat(width - filled),
        ratio * 100.0
    )
}

pub fn summary(report: &FinalReport) -> String {
    let mode = if report.dry_run { "DRY RUN" } else { "LIVE" };
    let rule = "─".repeat(62);
    let rows = [
        ("User ID:", format!("@{}", report.user_id)),
        ("Total Followers Scanned:", report.total_followers_scanned.to_string()),
        ("Bot Accounts Identified:", report.bot_accounts_identified.to_string()),
        ("Successfully Removed:", report.successfully_removed.to_string()),
        ("Failed Removals:", report.failed_removals.to_string()),
        ("Session Duration:", format_duration(report.duration())),
    ];

    let mut out = String::new();
    out.push_str(&format!("┌{rule}┐\n"));
    out.push_str(&format!("│{:^62}│\n", format!("CLEANUP SUMMARY ({mode})")));
    out.push_str(&format!("├{rule}┤\n"));
    for (label, value) in rows {
        out.push_str(&format!("│  {label:<28} {value:<31}│\n"));
    }
    if !report.errors.is_empty() {
        out.push_str(&format!("│  {:<28} {:<31}│\n", "Errors:", report.errors.len()));
    }
    out.push_str(&format!("└{rule}┘"));
    out
}

const REVIEW_SHOWN: usize = 20;

/// Numbered list of the bots about to be removed; only the first twenty are spelled out
pub fn review_list<'r>(
    bots: impl IntoIterator<Item = &'r FollowerRecord>,
    total_bots: usize,
) -> String {
    let bots: Vec<&FollowerRecord> = bots.into_iter().collect();
    let rule = "=".repeat(60);

    let mut out = format!("{rule}\n  BOT ACCOUNTS IDENTIFIED ({total_bots} total)\n{rule}\n");
    for (position, bot) in bots.iter().take(REVIEW_SHOWN).enumerate() {
        out.push_str(&format!(
            "  {:3}. @{:<20} - {}\n",
            position + 1,
            bot.username,
            bot.bot_reason
        ));
    }
    if bots.len() > REVIEW_SHOWN {
        out.push_str(&format!("  ... and {} more\n", bots.len() - REVIEW_SHOWN));
    }
    out.push_str(&rule);
    out
}

pub fn print_summary(report: &FinalReport) {
    println!();
    println!("{}", summary(report));
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Verdict;
    use crate::follower::SessionReport;

    fn verdict(is_bot: bool) -> Verdict {
        Verdict {
            is_bot,
            reason: if is_bot {
                "Username ends with 5+ consecutive digits".to_string()
            } else {
                String::new()
            },
        }
    }

    fn finished(removed: bool) -> FinalReport {
        let mut session = SessionReport::new("alice", false);
        let bot = session
            .insert(FollowerRecord::new("bot12345", "Bot, \"Inc\"", verdict(true)))
            .unwrap();
        session.insert(FollowerRecord::new("human", "Human", verdict(false)));
        if removed {
            session.record_removed(bot);
        } else {
            session.record_failed(bot, "Remove follower option not found in menu");
        }
        session.finalize()
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::seconds(0)), "0s");
        assert_eq!(format_duration(chrono::Duration::seconds(59)), "59s");
        assert_eq!(format_duration(chrono::Duration::seconds(125)), "2m 5s");
        assert_eq!(format_duration(chrono::Duration::seconds(3723)), "1h 2m 3s");
        assert_eq!(format_duration(chrono::Duration::seconds(-5)), "0s");
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0, 0, 4), "[====] 100%");
        assert_eq!(progress_bar(5, 10, 10), "[█████░░░░░] 50.0%");
        assert_eq!(progress_bar(20, 10, 4), "[████] 200.0%");
    }

    #[test]
    fn test_write_report_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().join("reports"), dir.path().join("backups"));
        let report = finished(true);

        let written = writer.write_report(&report).unwrap();
        let name = written.json.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("cleanup_report_alice_"));
        assert!(name.ends_with(".json"));
        assert_eq!(read_report(&written.json).unwrap(), report);

        let csv_path = written.csv.unwrap();
        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "username");
        assert_eq!(&headers[3], "bot_reason");
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "Bot, \"Inc\"");
        assert_eq!(&rows[0][4], "true");
    }

    #[test]
    fn test_csv_skipped_when_disabled_or_empty() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path(), dir.path()).with_csv(false);
        assert!(writer.write_report(&finished(true)).unwrap().csv.is_none());

        let writer = writer.with_csv(true);
        let empty = SessionReport::new("alice", true).finalize();
        let written = writer.write_report(&empty).unwrap();
        assert!(written.csv.is_none());
        assert!(written.json.exists());
    }

    #[test]
    fn test_backup_only_when_something_was_removed() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().join("reports"), dir.path().join("backups"));

        assert!(writer.write_backup(&finished(false)).unwrap().is_none());
        assert!(!dir.path().join("backups").exists());

        let path = writer.write_backup(&finished(true)).unwrap().unwrap();
        let backup: Backup = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(backup.user_id, "alice");
        assert_eq!(backup.followers.len(), 1);
        assert_eq!(backup.followers[0].username, "bot12345");
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("removed_followers_alice_"));
    }

    #[test]
    fn test_review_list_shows_first_twenty() {
        let bots: Vec<FollowerRecord> = (0..23)
            .map(|i| FollowerRecord::new(format!("bot{:06}", i), "", verdict(true)))
            .collect();

        let text = review_list(&bots, 30);
        assert!(text.contains("BOT ACCOUNTS IDENTIFIED (30 total)"));
        assert!(text.contains("    1. @bot000000"));
        assert!(text.contains("   20. @bot000019"));
        assert!(!text.contains("@bot000020"));
        assert!(text.contains("... and 3 more"));

        let short = review_list(&bots[..2], 2);
        assert!(!short.contains("more"));
        assert_eq!(short.lines().count(), 6);
    }

    #[test]
    fn test_summary_box() {
        let mut report = finished(true);
        report.errors.push("Navigation error: boom".to_string());
        let text = summary(&report);
        assert!(text.contains("CLEANUP SUMMARY (LIVE)"));
        assert!(text.contains("@alice"));
        assert!(text.contains("Successfully Removed:"));
        assert!(text.contains("Errors:"));
        let widths: Vec<usize> = text.lines().map(|line| line.chars().count()).collect();
        assert!(widths.iter().all(|w| *w == widths[0]));
    }
}
