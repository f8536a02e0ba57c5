use crate::classifier::{default_rules, Classifier, RuleSpec};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const CONFIG_FILE_NAME: &str = "follower-sweep.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
    #[error("Invalid classifier pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub browser: BrowserConfig,
    pub delays: DelayConfig,
    pub limits: LimitConfig,
    pub selectors: SelectorConfig,
    pub text: TextConfig,
    pub urls: UrlConfig,
    pub classifier: ClassifierConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Persistent profile directory so the login survives between runs
    pub user_data_dir: PathBuf,
    pub executable: Option<PathBuf>,
    pub slow_mo_ms: u64,
    pub window_width: Option<u32>,
    pub window_height: Option<u32>,
    pub launch_timeout_secs: u64,
    pub navigation_timeout_secs: u64,
}

/// Pauses in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayConfig {
    pub between_removals: f64,
    pub after_scroll: f64,
    pub menu_animation: f64,
    pub page_load: f64,
    pub rate_limit_backoff: f64,
    pub login_check_interval: f64,
    pub error_recovery: f64,
    pub lookup_scroll: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    pub max_removals_per_session: usize,
    pub max_retry_attempts: u32,
    pub max_scroll_attempts: u32,
    pub batch_size: usize,
    pub login_timeout_secs: u64,
    pub login_progress_every_secs: u64,
    pub empty_ticks_before_stop: u32,
    pub find_user_max_scrolls: u32,
    pub consecutive_failures_before_refresh: u32,
    pub scroll_step_px: i64,
    pub lookup_step_px: i64,
    pub end_of_list_stable_checks: u32,
    pub followers_load_timeout_secs: u64,
    pub menu_timeout_ms: u64,
    pub confirm_timeout_ms: u64,
    pub spinner_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub follower_cell: String,
    pub user_name_link: String,
    pub user_name_span: String,
    /// Tried in order inside a cell until one matches
    pub more_menu_buttons: Vec<String>,
    pub menu_item: String,
    pub profile_button: String,
    pub home_timeline: String,
    pub login_form: String,
    pub confirm_button: String,
    pub loading_spinner: String,
    pub retry_button: String,
    pub page_body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// Accepted menu labels, matched case-insensitively as substrings
    pub remove_follower: Vec<String>,
    pub retry_label: String,
    pub error_phrase: String,
    pub more_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlConfig {
    pub base: String,
    pub followers_template: String,
    /// First path segments that are never profile handles
    pub reserved_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub digit_suffix_min: usize,
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub reports_dir: PathBuf,
    pub screenshots_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub log_file: PathBuf,
    pub csv: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

/// Resolved pauses used by the page and the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delays {
    pub between_removals: Duration,
    pub after_scroll: Duration,
    pub menu_animation: Duration,
    pub page_load: Duration,
    pub rate_limit_backoff: Duration,
    pub login_check_interval: Duration,
    pub error_recovery: Duration,
    pub lookup_scroll: Duration,
}

impl Delays {
    /// No pauses at all, for in-memory drivers
    pub fn zero() -> Self {
        Self {
            between_removals: Duration::ZERO,
            after_scroll: Duration::ZERO,
            menu_animation: Duration::ZERO,
            page_load: Duration::ZERO,
            rate_limit_backoff: Duration::ZERO,
            login_check_interval: Duration::ZERO,
            error_recovery: Duration::ZERO,
            lookup_scroll: Duration::ZERO,
        }
    }
}

fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

impl DelayConfig {
    pub fn resolve(&self) -> Delays {
        Delays {
            between_removals: seconds(self.between_removals),
            after_scroll: seconds(self.after_scroll),
            menu_animation: seconds(self.menu_animation),
            page_load: seconds(self.page_load),
            rate_limit_backoff: seconds(self.rate_limit_backoff),
            login_check_interval: seconds(self.login_check_interval),
            error_recovery: seconds(self.error_recovery),
            lookup_scroll: seconds(self.lookup_scroll),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            user_data_dir: PathBuf::from("./browser_data"),
            executable: None,
            slow_mo_ms: 100,
            window_width: None,
            window_height: None,
            launch_timeout_secs: 60,
            navigation_timeout_secs: 60,
        }
    }
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            between_removals: 2.0,
            after_scroll: 1.5,
            menu_animation: 0.5,
            page_load: 3.0,
            rate_limit_backoff: 60.0,
            login_check_interval: 2.0,
            error_recovery: 2.0,
            lookup_scroll: 0.8,
        }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_removals_per_session: 1000,
            max_retry_attempts: 3,
            max_scroll_attempts: 150,
            batch_size: 10,
            login_timeout_secs: 300,
            login_progress_every_secs: 30,
            empty_ticks_before_stop: 3,
            find_user_max_scrolls: 15,
            consecutive_failures_before_refresh: 5,
            scroll_step_px: 600,
            lookup_step_px: 400,
            end_of_list_stable_checks: 5,
            followers_load_timeout_secs: 15,
            menu_timeout_ms: 3000,
            confirm_timeout_ms: 2000,
            spinner_timeout_ms: 5000,
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            follower_cell: r#"[data-testid="UserCell"]"#.to_string(),
            user_name_link: r#"a[role="link"][href^="/"]"#.to_string(),
            user_name_span: r#"[dir="ltr"] > span"#.to_string(),
            more_menu_buttons: vec![
                r#"[data-testid="caret"]"#.to_string(),
                r#"[aria-label="More"]"#.to_string(),
                r#"[data-testid="userActions"]"#.to_string(),
                r#"button[aria-haspopup="menu"]"#.to_string(),
                r#"[role="button"][aria-haspopup="menu"]"#.to_string(),
            ],
            menu_item: r#"[role="menuitem"]"#.to_string(),
            profile_button: r#"[data-testid="SideNav_AccountSwitcher_Button"]"#.to_string(),
            home_timeline: r#"[data-testid="primaryColumn"]"#.to_string(),
            login_form: r#"[data-testid="loginButton"]"#.to_string(),
            confirm_button: r#"[data-testid="confirmationSheetConfirm"]"#.to_string(),
            loading_spinner: r#"[role="progressbar"]"#.to_string(),
            retry_button: r#"button, [role="button"]"#.to_string(),
            page_body: "body".to_string(),
        }
    }
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            remove_follower: vec![
                "Remove this follower".to_string(),
                "Remove follower".to_string(),
            ],
            retry_label: "Retry".to_string(),
            error_phrase: "Something went wrong".to_string(),
            more_label: "more".to_string(),
        }
    }
}

impl Default for UrlConfig {
    fn default() -> Self {
        Self {
            base: "https://x.com".to_string(),
            followers_template: "https://x.com/{user_id}/followers".to_string(),
            reserved_paths: vec![
                "home".to_string(),
                "explore".to_string(),
                "notifications".to_string(),
                "messages".to_string(),
            ],
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            digit_suffix_min: 5,
            rules: default_rules(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from("./reports"),
            screenshots_dir: PathBuf::from("./screenshots"),
            backup_dir: PathBuf::from("./backups"),
            log_file: PathBuf::from("./follower_sweep.log"),
            csv: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Some("info".to_string()),
        }
    }
}

impl UrlConfig {
    /// Followers page URL for a handle
    pub fn followers_url(&self, user_id: &str) -> String {
        self.followers_template.replace("{user_id}", user_id)
    }
}

impl Config {
    /// Load configuration from TOML with XDG directory support and environment variable overrides
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config_file = if let Some(path) = config_path {
            path
        } else {
            Self::find_config_file()
        };

        let mut config = if config_file.exists() {
            tracing::debug!("Loading config from: {}", config_file.display());
            let content = std::fs::read_to_string(&config_file)?;
            toml::from_str::<Config>(&content)?
        } else {
            tracing::debug!("No config file found, using defaults and environment variables");
            Config::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Find configuration file in the working directory, then the user config directory
    fn find_config_file() -> PathBuf {
        let current_dir_config = PathBuf::from(CONFIG_FILE_NAME);
        if current_dir_config.exists() {
            return current_dir_config;
        }

        let xdg_config = if let Ok(xdg_config_home) = env::var("XDG_CONFIG_HOME") {
            Some(PathBuf::from(xdg_config_home))
        } else {
            dirs::config_dir()
        }
        .map(|dir| dir.join("follower-sweep").join(CONFIG_FILE_NAME));

        match xdg_config {
            Some(path) if path.exists() => path,
            _ => current_dir_config,
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(dir) = env::var("FOLLOWER_SWEEP_USER_DATA_DIR") {
            self.browser.user_data_dir = PathBuf::from(dir);
        }
        if let Ok(executable) = env::var("FOLLOWER_SWEEP_BROWSER_EXECUTABLE") {
            self.browser.executable = Some(PathBuf::from(executable));
        }
        if let Ok(base) = env::var("FOLLOWER_SWEEP_BASE_URL") {
            self.urls.base = base;
        }
        if let Ok(level) = env::var("FOLLOWER_SWEEP_LOG_LEVEL") {
            self.logging.level = Some(level);
        }
        if let Ok(dir) = env::var("FOLLOWER_SWEEP_REPORTS_DIR") {
            self.output.reports_dir = PathBuf::from(dir);
        }
        if let Ok(max) = env::var("FOLLOWER_SWEEP_MAX_REMOVALS") {
            self.limits.max_removals_per_session = max.parse().map_err(|_| {
                ConfigError::InvalidValue(
                    "FOLLOWER_SWEEP_MAX_REMOVALS must be a valid number".to_string(),
                )
            })?;
        }
        if let Ok(attempts) = env::var("FOLLOWER_SWEEP_MAX_RETRY_ATTEMPTS") {
            self.limits.max_retry_attempts = attempts.parse().map_err(|_| {
                ConfigError::InvalidValue(
                    "FOLLOWER_SWEEP_MAX_RETRY_ATTEMPTS must be a valid number".to_string(),
                )
            })?;
        }
        if let Ok(scrolls) = env::var("FOLLOWER_SWEEP_MAX_SCROLL_ATTEMPTS") {
            self.limits.max_scroll_attempts = scrolls.parse().map_err(|_| {
                ConfigError::InvalidValue(
                    "FOLLOWER_SWEEP_MAX_SCROLL_ATTEMPTS must be a valid number".to_string(),
                )
            })?;
        }
        if let Ok(min_digits) = env::var("FOLLOWER_SWEEP_DIGIT_SUFFIX_MIN") {
            self.classifier.digit_suffix_min = min_digits.parse().map_err(|_| {
                ConfigError::InvalidValue(
                    "FOLLOWER_SWEEP_DIGIT_SUFFIX_MIN must be a valid number".to_string(),
                )
            })?;
        }

        Ok(())
    }

    /// Validate that the configuration can drive a session
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.selectors.follower_cell.trim().is_empty() {
            return Err(ConfigError::MissingRequired(
                "selectors.follower_cell".to_string(),
            ));
        }

        if self.selectors.more_menu_buttons.is_empty() {
            return Err(ConfigError::MissingRequired(
                "selectors.more_menu_buttons".to_string(),
            ));
        }

        if self.text.remove_follower.is_empty() {
            return Err(ConfigError::MissingRequired(
                "text.remove_follower".to_string(),
            ));
        }

        if !self.urls.followers_template.contains("{user_id}") {
            return Err(ConfigError::InvalidValue(
                "urls.followers_template must contain {user_id}".to_string(),
            ));
        }

        url::Url::parse(&self.urls.base)
            .map_err(|e| ConfigError::InvalidValue(format!("urls.base is not a valid URL: {e}")))?;

        if self.limits.max_retry_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "limits.max_retry_attempts must be at least 1".to_string(),
            ));
        }

        if self.limits.max_scroll_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "limits.max_scroll_attempts must be at least 1".to_string(),
            ));
        }

        if self.limits.empty_ticks_before_stop == 0 {
            return Err(ConfigError::InvalidValue(
                "limits.empty_ticks_before_stop must be at least 1".to_string(),
            ));
        }

        if self.classifier.digit_suffix_min == 0 {
            return Err(ConfigError::InvalidValue(
                "classifier.digit_suffix_min must be at least 1".to_string(),
            ));
        }

        Classifier::from_config(&self.classifier)?;

        Ok(())
    }
}
