use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use follower_sweep::classifier::{normalize_handle, Classifier};
use follower_sweep::config::Config;
use follower_sweep::driver::cdp::ChromeSession;
use follower_sweep::engine::{RunOptions, ScanEngine};
use follower_sweep::error::{ErrorRecovery, SweepError};
use follower_sweep::follower::{FinalReport, SessionReport};
use follower_sweep::page::FollowersPage;
use follower_sweep::prompt::{Confirm, Operator};
use follower_sweep::report::{self, ReportWriter};

const EXIT_INTERRUPTED: u8 = 130;
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "follower-sweep")]
#[command(about = "Finds bot-like followers by username and removes them through the browser")]
#[command(version)]
struct Cli {
    /// Account whose followers are swept
    #[arg(short, long, value_name = "HANDLE")]
    user_id: String,

    /// Classify and report only, never remove
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Maximum number of removals this run (scan cap with --scan-only); 0 means the session maximum
    #[arg(short, long, default_value_t = 100)]
    limit: usize,

    /// Continue headless once logged in
    #[arg(long)]
    headless: bool,

    /// Enable verbose logging (equivalent to --log-level debug)
    #[arg(short, long)]
    verbose: bool,

    /// Answer yes to every confirmation
    #[arg(short, long)]
    yes: bool,

    /// Start at the end of the follower list and work upward
    #[arg(long, conflicts_with_all = ["scan_only", "review"])]
    from_end: bool,

    /// Remove exactly these handles (comma separated) instead of scanning
    #[arg(long, value_name = "HANDLE", value_delimiter = ',', num_args = 1..)]
    remove: Vec<String>,

    /// Collect and classify followers without removing anything
    #[arg(long, conflicts_with = "remove")]
    scan_only: bool,

    /// Scan the whole list, show the bots found, then remove them after one confirmation
    #[arg(long, conflicts_with_all = ["remove", "scan_only"])]
    review: bool,

    /// Path to configuration file (can also be set via FOLLOWER_SWEEP_CONFIG env var)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Skip the CSV follower list next to the JSON report
    #[arg(long)]
    no_csv: bool,
}

impl Cli {
    /// Get config path from CLI arg or FOLLOWER_SWEEP_CONFIG environment variable
    fn config_path(&self) -> Option<PathBuf> {
        self.config
            .clone()
            .or_else(|| std::env::var("FOLLOWER_SWEEP_CONFIG").ok().map(PathBuf::from))
    }

    fn run_options(&self) -> RunOptions {
        RunOptions {
            dry_run: self.dry_run || self.scan_only,
            limit: Some(self.limit),
            require_confirmation: !self.yes,
            from_end: self.from_end,
        }
    }

    /// Scan cap for --scan-only; 0 scans the whole list
    fn scan_cap(&self) -> Option<usize> {
        (self.limit > 0).then_some(self.limit)
    }

    fn mode(&self) -> &'static str {
        if self.scan_only {
            "SCAN ONLY"
        } else if self.review && !self.dry_run {
            "REVIEW"
        } else if self.dry_run {
            "DRY RUN"
        } else {
            "LIVE"
        }
    }
}

/// Console output filtered by the chosen level, plus a plain debug log file.
/// The returned guard flushes the file writer when dropped.
#[allow(clippy::result_large_err)]
fn init_logging(config: &Config, cli: &Cli) -> Result<WorkerGuard, SweepError> {
    let log_level = if cli.verbose {
        "debug"
    } else if let Some(ref level) = cli.log_level {
        level.as_str()
    } else {
        config.logging.level.as_deref().unwrap_or("info")
    };

    let _level = match log_level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => {
            return Err(SweepError::InvalidData(format!(
                "Invalid log level: {log_level}. Valid levels are: error, warn, info, debug, trace"
            )));
        }
    };

    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| SweepError::InvalidData(format!("Failed to create log filter: {e}")))?;
    let file_filter = EnvFilter::try_new("info,follower_sweep=debug")
        .map_err(|e| SweepError::InvalidData(format!("Failed to create log filter: {e}")))?;

    let log_file = &config.output.log_file;
    let directory = log_file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .ok_or_else(|| SweepError::InvalidData(format!("Invalid log file: {}", log_file.display())))?;
    std::fs::create_dir_all(directory)?;

    let file_appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false)
                .with_filter(console_filter),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .try_init()
        .map_err(|e| SweepError::InvalidData(format!("Failed to initialize logging: {e}")))?;

    debug!("Logging initialized with level: {}", log_level);
    Ok(guard)
}

fn print_banner() {
    let rule = "=".repeat(60);
    println!();
    println!("{rule}");
    println!("  follower-sweep v{}", env!("CARGO_PKG_VERSION"));
    println!("  Remove suspected bot followers based on username patterns");
    println!("{rule}");
    println!();
}

/// How the browser part of a run ended
enum Completion {
    Finished,
    /// The operator declined to start scanning
    Declined,
}

/// Login, optional headless switch, then the chosen removal flow
async fn run_sweep(
    cli: &Cli,
    config: &Config,
    classifier: &Classifier,
    browser: &mut ChromeSession,
    session: &mut SessionReport,
    confirm: &mut Operator,
) -> Result<Completion, SweepError> {
    FollowersPage::new(browser.page(), config)
        .wait_for_login()
        .await?;

    let prompt = format!(
        "Proceed with scanning followers of @{} ({})?",
        session.user_id(),
        cli.mode()
    );
    if !confirm.confirm(&prompt, true).await? {
        info!("Cancelled by user");
        return Ok(Completion::Declined);
    }

    if cli.headless && !browser.is_headless() {
        browser.relaunch_headless().await?;
    }

    let page = FollowersPage::new(browser.page(), config);
    page.navigate_to_followers(session.user_id()).await?;

    let options = cli.run_options();
    let mut engine = ScanEngine::new(&page, classifier, confirm);

    if !cli.remove.is_empty() {
        engine.remove_listed(session, &cli.remove, &options).await?;
    } else if cli.scan_only {
        let stop = engine.collect_followers(session, cli.scan_cap()).await?;
        debug!("Scan finished: {:?}", stop);
    } else if cli.review {
        let removed = engine.review_and_remove(session, &options).await?;
        debug!("Review finished with {} removals", removed);
    } else {
        let stop = engine.scan_and_remove(session, &options).await?;
        debug!("Sweep finished: {:?}", stop);
    }

    Ok(Completion::Finished)
}

/// Finalize the session, persist it and print the summary.
/// Returns the report and whether it was written.
fn finish(session: SessionReport, writer: &ReportWriter) -> (FinalReport, bool) {
    let report = session.finalize();
    let mut saved = true;

    match writer.write_report(&report) {
        Ok(written) => {
            info!("Report saved: {}", written.json.display());
            if let Some(csv) = written.csv {
                info!("Follower list saved: {}", csv.display());
            }
        }
        Err(e) => {
            error!("Failed to save report: {}", e);
            saved = false;
        }
    }

    if let Err(e) = writer.write_backup(&report) {
        error!("Failed to save backup: {}", e);
        saved = false;
    }

    report::print_summary(&report);
    (report, saved)
}

/// Resolves on the first SIGINT/SIGTERM. A second one ends the process at once.
fn watch_for_interrupt() -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = tx.send(());
        shutdown_signal().await;
        warn!("Second interrupt received, exiting immediately");
        std::process::exit(i32::from(EXIT_INTERRUPTED));
    });
    rx
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl+C, stopping"),
            Err(e) => {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        },
        _ = terminate => info!("Received SIGTERM, stopping"),
    }
}

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(run(Cli::parse()));
    // A terminal read abandoned by an interrupt never finishes on its own
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    code
}

async fn run(cli: Cli) -> ExitCode {
    let mut config = match Config::load(cli.config_path()) {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt().init();
            error!("Configuration error: {}", e);
            error!("Please check your configuration file and environment variables");
            return ExitCode::FAILURE;
        }
    };
    if cli.no_csv {
        config.output.csv = false;
    }

    let _guard = match init_logging(&config, &cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    print_banner();
    info!("Starting follower-sweep v{}", env!("CARGO_PKG_VERSION"));
    debug!("Configuration file path: {:?}", cli.config_path());

    let Some(user_id) = normalize_handle(&cli.user_id) else {
        error!("Invalid user id '{}': use letters, digits and underscores", cli.user_id);
        return ExitCode::FAILURE;
    };

    let classifier = match Classifier::from_config(&config.classifier) {
        Ok(classifier) => classifier,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Target account: @{}", user_id);
    info!("Mode: {}", cli.mode());
    if cli.limit == 0 {
        info!(
            "Removal limit: session maximum {}",
            config.limits.max_removals_per_session
        );
    } else {
        info!(
            "Removal limit: {} (session maximum {})",
            cli.limit, config.limits.max_removals_per_session
        );
    }
    info!(
        "Classifier: {} rules, digit suffix threshold {}",
        classifier.rule_count(),
        config.classifier.digit_suffix_min
    );
    info!("Browser profile: {}", config.browser.user_data_dir.display());
    if cli.dry_run || cli.scan_only {
        info!("DRY RUN MODE - no followers will be removed");
    }

    let writer = ReportWriter::from_config(&config.output);
    let mut session = SessionReport::new(&user_id, cli.dry_run || cli.scan_only);
    let mut confirm = Operator::new(cli.yes);

    let mut browser = match ChromeSession::launch(&config.browser, false).await {
        Ok(browser) => browser,
        Err(e) => {
            error!("Failed to start browser: {}", e);
            session.push_error(SweepError::Driver(e).to_string());
            finish(session, &writer);
            return ExitCode::FAILURE;
        }
    };

    let interrupt = watch_for_interrupt();
    let outcome = tokio::select! {
        result = run_sweep(&cli, &config, &classifier, &mut browser, &mut session, &mut confirm) => Some(result),
        _ = interrupt => None,
    };

    let exit = match outcome {
        Some(Ok(Completion::Finished)) => None,
        Some(Ok(Completion::Declined)) => Some(ExitCode::SUCCESS),
        Some(Err(e)) => {
            error!("Sweep failed: {}", e);
            if ErrorRecovery::is_recoverable(&e) && !ErrorRecovery::should_shutdown(&e) {
                info!("The error looks transient, running again may succeed");
            }
            session.push_error(e.to_string());

            let page = FollowersPage::new(browser.page(), &config);
            if let Err(shot) = page.take_screenshot("error").await {
                debug!("Error screenshot failed: {}", shot);
            }
            Some(ExitCode::FAILURE)
        }
        None => {
            warn!("Interrupted, saving partial report");
            session.push_error(SweepError::Interrupted.to_string());
            Some(ExitCode::from(EXIT_INTERRUPTED))
        }
    };

    browser.close().await;
    info!("Browser closed");

    let (report, saved) = finish(session, &writer);
    match exit {
        Some(code) => code,
        None if saved && report.is_clean() => ExitCode::SUCCESS,
        None => ExitCode::FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["follower-sweep", "--user-id", "alice"]);
        assert_eq!(cli.user_id, "alice");
        assert_eq!(cli.limit, 100);
        assert!(!cli.dry_run);
        assert!(!cli.yes);
        assert!(cli.remove.is_empty());
        assert!(cli.config.is_none());

        let cli = Cli::parse_from(["follower-sweep", "-u", "alice", "-n", "-l", "5", "-v", "-y"]);
        assert!(cli.dry_run);
        assert_eq!(cli.limit, 5);
        assert!(cli.verbose);
        assert!(cli.yes);

        let cli = Cli::parse_from(["follower-sweep", "-u", "alice", "--log-level", "debug"]);
        assert_eq!(cli.log_level, Some("debug".to_string()));

        assert!(Cli::try_parse_from(["follower-sweep"]).is_err());
    }

    #[test]
    fn test_remove_list_and_modes() {
        let cli = Cli::parse_from(["follower-sweep", "-u", "alice", "--remove", "bot1,@bot2", "--remove", "bot3"]);
        assert_eq!(cli.remove, vec!["bot1", "@bot2", "bot3"]);

        let cli = Cli::parse_from(["follower-sweep", "-u", "alice", "--scan-only", "--limit", "0"]);
        assert_eq!(cli.mode(), "SCAN ONLY");
        assert_eq!(cli.scan_cap(), None);
        let options = cli.run_options();
        assert!(options.dry_run);
        assert!(options.require_confirmation);

        let cli = Cli::parse_from(["follower-sweep", "-u", "alice", "--from-end"]);
        assert!(cli.run_options().from_end);
        assert_eq!(cli.scan_cap(), Some(100));

        let cli = Cli::parse_from(["follower-sweep", "-u", "alice", "--review"]);
        assert_eq!(cli.mode(), "REVIEW");
        assert!(!cli.run_options().dry_run);

        let cli = Cli::parse_from(["follower-sweep", "-u", "alice", "--yes", "--headless"]);
        assert_eq!(cli.mode(), "LIVE");
        assert!(cli.headless);
        assert!(!cli.run_options().require_confirmation);

        assert!(Cli::try_parse_from(["follower-sweep", "-u", "a", "--scan-only", "--remove", "b"]).is_err());
        assert!(Cli::try_parse_from(["follower-sweep", "-u", "a", "--scan-only", "--from-end"]).is_err());
        assert!(Cli::try_parse_from(["follower-sweep", "-u", "a", "--review", "--from-end"]).is_err());
        assert!(Cli::try_parse_from(["follower-sweep", "-u", "a", "--review", "--remove", "b"]).is_err());
    }

    #[test]
    fn test_follower_sweep_config_env_var() {
        std::env::set_var("FOLLOWER_SWEEP_CONFIG", "/env/path/to/config.toml");

        let cli = Cli::parse_from(["follower-sweep", "-u", "alice"]);
        assert_eq!(
            cli.config_path(),
            Some(PathBuf::from("/env/path/to/config.toml"))
        );

        let cli = Cli::parse_from(["follower-sweep", "-u", "alice", "--config", "/cli/config.toml"]);
        assert_eq!(cli.config_path(), Some(PathBuf::from("/cli/config.toml")));

        std::env::remove_var("FOLLOWER_SWEEP_CONFIG");

        let cli = Cli::parse_from(["follower-sweep", "-u", "alice"]);
        assert_eq!(cli.config_path(), None);
    }
}
