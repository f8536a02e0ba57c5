use follower_sweep::classifier::Classifier;
use follower_sweep::config::{Config, ConfigError, Delays};
use follower_sweep::driver::memory::{MemoryFollower, MemoryPage, MenuBehaviour};
use follower_sweep::engine::{RunOptions, ScanEngine, StopReason};
use follower_sweep::follower::SessionReport;
use follower_sweep::login::await_login;
use follower_sweep::page::FollowersPage;
use follower_sweep::prompt::{Confirm, ScriptedConfirm};
use follower_sweep::report::{read_report, Backup, ReportWriter};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Default configuration with every wait shortened for the in-memory page
fn create_test_config() -> Config {
    let mut config = Config::default();
    config.limits.menu_timeout_ms = 0;
    config.limits.confirm_timeout_ms = 0;
    config.limits.spinner_timeout_ms = 0;
    config.limits.followers_load_timeout_secs = 0;
    config
}

/// Two bots and two people in every block of four
fn twelve_followers() -> Vec<String> {
    (0..12)
        .map(|i| {
            if i % 2 == 0 {
                format!("acct{:06}", i)
            } else {
                format!("person_{}", (b'a' + i as u8) as char)
            }
        })
        .collect()
}

/// An operator who never answers
struct SilentOperator;

impl Confirm for SilentOperator {
    async fn confirm(&mut self, _prompt: &str, _default: bool) -> std::io::Result<bool> {
        std::future::pending().await
    }
}

fn live(limit: usize) -> RunOptions {
    RunOptions {
        dry_run: false,
        limit: Some(limit),
        require_confirmation: false,
        from_end: false,
    }
}

#[tokio::test]
async fn test_config_loading_and_env_overrides() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("follower-sweep.toml");

    let config_content = r#"
[browser]
user_data_dir = "./profile"

[limits]
batch_size = 4
empty_ticks_before_stop = 2

[urls]
base = "https://example.social"
followers_template = "https://example.social/{user_id}/followers"

[classifier]
digit_suffix_min = 4

[[classifier.rules]]
kind = "hex_string"
min_len = 10
reason = "Hex name"

[output]
reports_dir = "./out/reports"
"#;
    std::fs::write(&config_path, config_content).unwrap();

    let config = Config::load(Some(config_path.clone())).unwrap();
    assert_eq!(config.limits.batch_size, 4);
    assert_eq!(config.limits.empty_ticks_before_stop, 2);
    assert_eq!(
        config.urls.followers_url("alice"),
        "https://example.social/alice/followers"
    );
    assert_eq!(config.classifier.digit_suffix_min, 4);

    let classifier = Classifier::from_config(&config.classifier).unwrap();
    assert_eq!(classifier.rule_count(), 2);
    assert_eq!(classifier.classify("deadbeef42").reason, "Hex name");
    assert_eq!(
        classifier.classify("user1234").reason,
        "Username ends with 4+ consecutive digits"
    );

    std::env::set_var("FOLLOWER_SWEEP_DIGIT_SUFFIX_MIN", "6");
    let config = Config::load(Some(config_path.clone())).unwrap();
    assert_eq!(config.classifier.digit_suffix_min, 6);

    std::env::set_var("FOLLOWER_SWEEP_DIGIT_SUFFIX_MIN", "0");
    let result = Config::load(Some(config_path.clone()));
    assert!(result.is_err());

    std::env::set_var("FOLLOWER_SWEEP_DIGIT_SUFFIX_MIN", "many");
    let result = Config::load(Some(config_path));
    assert!(matches!(result, Err(ConfigError::InvalidValue(_))));

    std::env::remove_var("FOLLOWER_SWEEP_DIGIT_SUFFIX_MIN");

    // A missing file means defaults
    let config = Config::load(Some(temp_dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config.limits.max_removals_per_session, 1000);
}

#[test]
fn test_invalid_rule_pattern_is_rejected() {
    let config: Config =
        toml::from_str("[[classifier.rules]]\nkind = \"pattern\"\npattern = \"([a-z\"\n").unwrap();

    let result = config.validate();
    assert!(matches!(result, Err(ConfigError::InvalidPattern { .. })));
}

#[tokio::test]
async fn test_end_to_end_session_with_removal_limit() {
    let config = create_test_config();
    let driver = MemoryPage::new(&config)
        .with_usernames(twelve_followers())
        .with_window(4, 4);
    let classifier = Classifier::from_config(&config.classifier).unwrap();
    let page = FollowersPage::new(&driver, &config).with_delays(Delays::zero());
    let mut confirm = ScriptedConfirm::always(true);
    let mut session = SessionReport::new("alice", false);

    page.navigate_to_followers(session.user_id()).await.unwrap();
    let stop = ScanEngine::new(&page, &classifier, &mut confirm)
        .scan_and_remove(&mut session, &live(5))
        .await
        .unwrap();
    assert_eq!(stop, StopReason::RemovalLimit);

    let report = session.finalize();
    assert_eq!(report.total_followers_scanned, 12);
    assert_eq!(report.bot_accounts_identified, 6);
    assert_eq!(report.successfully_removed, 5);
    assert_eq!(report.failed_removals, 0);
    assert!(report.session_end >= report.session_start);
    assert!(report.is_clean());
    assert_eq!(driver.removed().await.len(), 5);

    let temp_dir = tempfile::tempdir().unwrap();
    let writer = ReportWriter::new(temp_dir.path().join("reports"), temp_dir.path().join("backups"));
    let written = writer.write_report(&report).unwrap();
    assert_eq!(read_report(&written.json).unwrap(), report);
    assert!(written.csv.unwrap().exists());

    let backup_path = writer.write_backup(&report).unwrap().unwrap();
    let backup: Backup =
        serde_json::from_str(&std::fs::read_to_string(backup_path).unwrap()).unwrap();
    assert_eq!(backup.user_id, "alice");
    assert_eq!(backup.followers.len(), 5);
    assert!(backup.followers.iter().all(|f| f.removed && f.is_bot));
}

#[tokio::test]
async fn test_overlapping_live_session_stops_at_exact_limit() {
    let config = create_test_config();
    let driver = MemoryPage::new(&config)
        .with_usernames(twelve_followers())
        .with_window(4, 2);
    let classifier = Classifier::from_config(&config.classifier).unwrap();
    let page = FollowersPage::new(&driver, &config).with_delays(Delays::zero());
    let mut confirm = ScriptedConfirm::always(true);
    let mut session = SessionReport::new("alice", false);

    let stop = ScanEngine::new(&page, &classifier, &mut confirm)
        .scan_and_remove(&mut session, &live(5))
        .await
        .unwrap();
    assert_eq!(stop, StopReason::RemovalLimit);

    let report = session.finalize();
    let usernames: Vec<&str> = report.followers.iter().map(|f| f.username.as_str()).collect();
    let unique: HashSet<&str> = usernames.iter().copied().collect();
    assert_eq!(usernames.len(), unique.len());
    assert!(report.total_followers_scanned <= 12);
    assert_eq!(report.successfully_removed, 5);
    assert_eq!(report.failed_removals, 0);
    // Nothing is attempted once the limit is reached
    assert!(report
        .followers
        .iter()
        .filter(|f| f.is_bot && !f.removed)
        .all(|f| f.removal_error.is_empty()));
    assert_eq!(
        driver.removed().await,
        vec!["acct000000", "acct000002", "acct000004", "acct000006", "acct000008"]
    );
    assert!(report.session_end >= report.session_start);
}

#[tokio::test]
async fn test_interrupt_drops_a_pending_confirmation() {
    let config = create_test_config();
    let driver = MemoryPage::new(&config)
        .with_usernames(twelve_followers())
        .with_window(4, 4);
    let classifier = Classifier::from_config(&config.classifier).unwrap();
    let page = FollowersPage::new(&driver, &config).with_delays(Delays::zero());
    let mut confirm = SilentOperator;
    let mut session = SessionReport::new("alice", false);

    let options = RunOptions {
        require_confirmation: true,
        ..live(5)
    };
    let started = Instant::now();
    let mut engine = ScanEngine::new(&page, &classifier, &mut confirm);
    let finished = tokio::select! {
        result = engine.scan_and_remove(&mut session, &options) => Some(result),
        _ = tokio::time::sleep(Duration::from_millis(100)) => None,
    };

    assert!(finished.is_none());
    assert!(started.elapsed() < Duration::from_secs(1));

    // The partial session is still there to be reported
    let report = session.finalize();
    assert_eq!(report.total_followers_scanned, 4);
    assert_eq!(report.successfully_removed, 0);
    assert!(driver.removed().await.is_empty());
}

#[tokio::test]
async fn test_declined_first_batch_keeps_scanning() {
    let config = create_test_config();
    let driver = MemoryPage::new(&config)
        .with_usernames(twelve_followers())
        .with_window(4, 4);
    let classifier = Classifier::from_config(&config.classifier).unwrap();
    let page = FollowersPage::new(&driver, &config).with_delays(Delays::zero());
    let mut confirm = ScriptedConfirm::always(false);
    let mut session = SessionReport::new("alice", false);

    let options = RunOptions {
        require_confirmation: true,
        ..live(5)
    };
    let stop = ScanEngine::new(&page, &classifier, &mut confirm)
        .scan_and_remove(&mut session, &options)
        .await
        .unwrap();
    assert_eq!(stop, StopReason::EndOfList);
    assert_eq!(confirm.asked().len(), 1);

    let report = session.finalize();
    assert_eq!(report.total_followers_scanned, 12);
    assert_eq!(report.bot_accounts_identified, 6);
    assert_eq!(report.successfully_removed, 0);
    // The report keeps the requested mode
    assert!(!report.dry_run);

    let temp_dir = tempfile::tempdir().unwrap();
    let writer = ReportWriter::new(temp_dir.path(), temp_dir.path().join("backups"));
    assert!(writer.write_backup(&report).unwrap().is_none());
}

#[tokio::test]
async fn test_overlapping_ticks_record_each_follower_once() {
    let config = create_test_config();
    let names: Vec<String> = (0..10).map(|i| format!("member{i}x")).collect();
    let driver = MemoryPage::new(&config)
        .with_usernames(names.clone())
        .with_window(5, 1);
    let classifier = Classifier::from_config(&config.classifier).unwrap();
    let page = FollowersPage::new(&driver, &config).with_delays(Delays::zero());
    let mut confirm = ScriptedConfirm::always(true);
    let mut session = SessionReport::new("alice", true);

    ScanEngine::new(&page, &classifier, &mut confirm)
        .scan_and_remove(&mut session, &RunOptions { dry_run: true, ..live(10) })
        .await
        .unwrap();

    let recorded: Vec<&str> = session.followers().iter().map(|f| f.username.as_str()).collect();
    let unique: HashSet<&str> = recorded.iter().copied().collect();
    assert_eq!(recorded.len(), unique.len());
    assert_eq!(recorded, names.iter().map(String::as_str).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_stops_after_consecutive_empty_ticks() {
    let config = create_test_config();
    let driver = MemoryPage::new(&config).with_usernames(["one", "two", "three", "four"]);
    let classifier = Classifier::from_config(&config.classifier).unwrap();
    let page = FollowersPage::new(&driver, &config).with_delays(Delays::zero());
    let mut confirm = ScriptedConfirm::always(true);
    let mut session = SessionReport::new("alice", false);

    let stop = ScanEngine::new(&page, &classifier, &mut confirm)
        .scan_and_remove(&mut session, &live(10))
        .await
        .unwrap();

    assert_eq!(stop, StopReason::EndOfList);
    assert_eq!(session.followers().len(), 4);
    assert_eq!(session.bot_count(), 0);
    // One productive tick, then three empty ones; no scroll after the last
    assert_eq!(driver.stats().await.scrolls, 3);
}

#[tokio::test]
async fn test_failures_do_not_count_toward_limit() {
    let config = create_test_config();
    let driver = MemoryPage::new(&config)
        .with_follower(MemoryFollower::new("spam000001").menu(MenuBehaviour::NoRemoveOption))
        .with_follower(MemoryFollower::new("spam000002"))
        .with_follower(MemoryFollower::new("spam000003").menu(MenuBehaviour::NoConfirmation))
        .with_follower(MemoryFollower::new("spam000004"));
    let classifier = Classifier::from_config(&config.classifier).unwrap();
    let page = FollowersPage::new(&driver, &config).with_delays(Delays::zero());
    let mut confirm = ScriptedConfirm::always(true);
    let mut session = SessionReport::new("alice", false);

    let stop = ScanEngine::new(&page, &classifier, &mut confirm)
        .scan_and_remove(&mut session, &live(2))
        .await
        .unwrap();

    assert_eq!(stop, StopReason::RemovalLimit);
    let report = session.finalize();
    assert_eq!(report.successfully_removed, 2);
    assert_eq!(report.failed_removals, 1);
    assert_eq!(
        report.followers[0].removal_error,
        "Remove follower option not found in menu"
    );
    assert!(!report.followers[3].removed);
    assert!(report.followers[3].removal_error.is_empty());
}

#[tokio::test]
async fn test_targeted_list_removal() {
    let config = create_test_config();
    let driver = MemoryPage::new(&config)
        .with_usernames((0..9).map(|i| format!("friend{i}")))
        .with_window(3, 1);
    let classifier = Classifier::from_config(&config.classifier).unwrap();
    let page = FollowersPage::new(&driver, &config).with_delays(Delays::zero());
    let mut confirm = ScriptedConfirm::always(true);
    let mut session = SessionReport::new("alice", false);

    let handles = vec!["@friend7".to_string(), "friend2".to_string(), "friend7".to_string()];
    let removed = ScanEngine::new(&page, &classifier, &mut confirm)
        .remove_listed(&mut session, &handles, &live(10))
        .await
        .unwrap();

    assert_eq!(removed, 2);
    assert_eq!(session.followers().len(), 2);
    assert_eq!(
        driver.removed().await,
        vec!["friend7".to_string(), "friend2".to_string()]
    );
}

#[tokio::test]
async fn test_login_gate_against_a_probe() {
    let probes = AtomicUsize::new(0);
    let logged_in = await_login(
        || {
            let seen = probes.fetch_add(1, Ordering::SeqCst);
            async move { seen >= 2 }
        },
        Duration::from_millis(1),
        Duration::from_secs(5),
    )
    .await;
    assert!(logged_in);
    assert_eq!(probes.load(Ordering::SeqCst), 3);

    let timed_out = await_login(
        || async { false },
        Duration::from_millis(1),
        Duration::from_millis(20),
    )
    .await;
    assert!(!timed_out);
}
